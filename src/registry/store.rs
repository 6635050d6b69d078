//! Live source registry implementation
//!
//! The registry maps each logical source key to a slot holding the handles
//! currently open for it and owns every create/reuse/teardown decision.
//!
//! Slot lookups, consumer count changes, registration and deregistration all
//! happen under one short-lived lock that is never held across an await. The
//! physical open runs outside it: the first acquirer for a key marks the slot
//! as opening, and acquirers arriving meanwhile wait on that marker and take
//! the same outcome. A failed open fails all of its waiters at once; a
//! successful one leaves a registered handle for them to reuse. Close always
//! runs after the handle has been deregistered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::RegistryConfig;
use super::consumer::LiveStreamConsumer;
use super::error::LiveStreamError;
use super::handle::{LiveStreamHandle, LiveStreamStats};
use super::key::{LiveSourceKey, LiveStreamRequest, MediaSourceInfo};
use super::source::TunerSource;
use crate::stats::{BrokerMetrics, BrokerStats};

/// Result of an open, published to the acquirers waiting on it
type OpenOutcome = Result<(), LiveStreamError>;

/// Present in a slot while one acquirer is opening a handle for it
type OpenMarker = watch::Receiver<Option<OpenOutcome>>;

/// Handles registered under one source key
#[derive(Default)]
struct SourceSlot {
    /// The shared handle offered to new consumers
    shared: Option<Arc<LiveStreamHandle>>,
    /// Handles never offered for reuse: exclusive handles, and shared
    /// handles whose source ended while consumers were still attached
    unshared: HashMap<Uuid, Arc<LiveStreamHandle>>,
    opening: Option<OpenMarker>,
}

impl SourceSlot {
    fn is_empty(&self) -> bool {
        !self.has_handles() && self.opening.is_none()
    }

    fn has_handles(&self) -> bool {
        self.shared.is_some() || !self.unshared.is_empty()
    }

    fn is_registered(&self, handle: &Arc<LiveStreamHandle>) -> bool {
        let shared = self
            .shared
            .as_ref()
            .is_some_and(|registered| Arc::ptr_eq(registered, handle));
        let unshared = self
            .unshared
            .get(&handle.unique_id())
            .is_some_and(|registered| Arc::ptr_eq(registered, handle));
        shared || unshared
    }

    fn register(&mut self, handle: Arc<LiveStreamHandle>) {
        if handle.enable_sharing() && self.shared.is_none() {
            self.shared = Some(handle);
        } else {
            self.unshared.insert(handle.unique_id(), handle);
        }
    }

    fn deregister(&mut self, handle: &Arc<LiveStreamHandle>) {
        if self
            .shared
            .as_ref()
            .is_some_and(|registered| Arc::ptr_eq(registered, handle))
        {
            self.shared = None;
        } else {
            self.unshared.remove(&handle.unique_id());
        }
    }

    fn handles(&self) -> impl Iterator<Item = &Arc<LiveStreamHandle>> {
        self.shared.iter().chain(self.unshared.values())
    }

    fn take_handles(&mut self) -> Vec<Arc<LiveStreamHandle>> {
        let mut handles: Vec<_> = self.shared.take().into_iter().collect();
        handles.extend(self.unshared.drain().map(|(_, handle)| handle));
        handles
    }
}

/// What an acquirer does after inspecting the slot
enum Step {
    Attached(LiveStreamConsumer),
    Wait(OpenMarker),
    Open(watch::Sender<Option<OpenOutcome>>, OpenMarker),
}

/// Registry of open live streams
///
/// Thread-safe; share it behind an `Arc`.
pub struct LiveSourceRegistry {
    /// Map of source key to that key's slot
    slots: Mutex<HashMap<LiveSourceKey, SourceSlot>>,

    /// Configuration
    config: RegistryConfig,

    metrics: BrokerMetrics,
}

impl LiveSourceRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            config,
            metrics: BrokerMetrics::new(),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get a snapshot of the broker counters
    pub fn metrics(&self) -> BrokerStats {
        self.metrics.snapshot()
    }

    /// Attach a consumer to the stream for `key`
    ///
    /// Reuses the registered shared handle while its source is still live.
    /// Otherwise calls `open` to construct and open a new handle and registers
    /// it with one consumer. Concurrent acquires for a key that arrive while
    /// an open is in flight wait for it: on success they reuse its handle, on
    /// failure they all receive its error. Nothing is registered on failure.
    pub async fn acquire<F, Fut>(
        &self,
        key: &LiveSourceKey,
        open: F,
    ) -> Result<LiveStreamConsumer, LiveStreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LiveStreamHandle, LiveStreamError>>,
    {
        self.acquire_inner(key, None, None, open).await
    }

    /// Attach a consumer to the stream described by `request`
    ///
    /// Like [`acquire`](Self::acquire), opening through `tuner` when a new
    /// handle is needed. A shared handle already streaming a different media
    /// source for the same key is reported as `DescriptorMismatch`.
    /// Cancelling `cancel` aborts this caller's open or its wait for another
    /// caller's open; it has no effect once the consumer is attached.
    pub async fn acquire_source(
        &self,
        request: &LiveStreamRequest,
        tuner: Arc<dyn TunerSource>,
        cancel: CancellationToken,
    ) -> Result<LiveStreamConsumer, LiveStreamError> {
        let config = &self.config;
        let open_cancel = cancel.clone();
        let open = move || async move {
            let handle = LiveStreamHandle::new(request.clone(), tuner, config);
            handle.open(open_cancel).await?;
            Ok::<_, LiveStreamError>(handle)
        };

        self.acquire_inner(
            &request.key,
            Some(&request.media_source),
            Some(&cancel),
            open,
        )
        .await
    }

    async fn acquire_inner<F, Fut>(
        &self,
        key: &LiveSourceKey,
        requested: Option<&MediaSourceInfo>,
        cancel: Option<&CancellationToken>,
        open: F,
    ) -> Result<LiveStreamConsumer, LiveStreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LiveStreamHandle, LiveStreamError>>,
    {
        let (outcome_tx, marker) = loop {
            match self.next_step(key, requested)? {
                Step::Attached(consumer) => return Ok(consumer),
                Step::Open(outcome_tx, marker) => break (outcome_tx, marker),
                Step::Wait(marker) => {
                    let outcome = match cancel {
                        Some(cancel) => tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return Err(LiveStreamError::Cancelled(key.clone()));
                            }
                            outcome = wait_for_open(marker) => outcome,
                        },
                        None => wait_for_open(marker).await,
                    };

                    // A successful or abandoned open sends us back to the slot
                    if let Some(Err(e)) = outcome {
                        tracing::debug!(
                            stream = %key,
                            error = %e,
                            "Joined live stream open failed"
                        );
                        return Err(e);
                    }
                }
            }
        };

        let mut in_flight = OpenInFlight {
            registry: self,
            key,
            marker,
            finished: false,
        };

        let handle = match open().await {
            Ok(handle) => handle,
            Err(e) => {
                in_flight.finish(None);
                self.metrics.record_open_failure();
                tracing::warn!(stream = %key, error = %e, "Failed to open live stream");
                let _ = outcome_tx.send(Some(Err(e.clone())));
                return Err(e);
            }
        };

        if handle.key() != key || !handle.is_connected() {
            let detail = format!(
                "open produced a {:?} handle for {} while acquiring",
                handle.state(),
                handle.key()
            );
            tracing::error!(stream = %key, detail = %detail, "Rejected handle from open");
            in_flight.finish(None);

            let err = LiveStreamError::invariant(key, detail);
            let _ = outcome_tx.send(Some(Err(err.clone())));
            if let Err(e) = handle.close().await {
                tracing::warn!(stream = %key, error = %e, "Failed to close rejected handle");
            }
            return Err(err);
        }

        let handle = Arc::new(handle);
        handle.add_consumer();
        self.metrics.record_open();
        in_flight.finish(Some(Arc::clone(&handle)));

        tracing::info!(
            stream = %key,
            unique_id = %handle.unique_id(),
            sharing = handle.enable_sharing(),
            "Consumer attached to new live stream"
        );

        let _ = outcome_tx.send(Some(Ok(())));
        Ok(LiveStreamConsumer::attach(&handle))
    }

    /// Reuse the shared handle, join an open in flight, or start an open
    fn next_step(
        &self,
        key: &LiveSourceKey,
        requested: Option<&MediaSourceInfo>,
    ) -> Result<Step, LiveStreamError> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();

        if let Some(existing) = slot.shared.clone() {
            if existing.consumer_count() == 0 {
                tracing::error!(
                    stream = %key,
                    unique_id = %existing.unique_id(),
                    "Registered live stream has no consumers"
                );
                return Err(LiveStreamError::invariant(
                    key,
                    "registered shared handle has consumer count 0",
                ));
            }

            if existing.is_open() {
                if let Some(requested) = requested {
                    if existing.media_source() != requested {
                        tracing::warn!(
                            stream = %key,
                            registered = %existing.media_source().id,
                            requested = %requested.id,
                            "Media source mismatch for shared live stream"
                        );
                        return Err(LiveStreamError::DescriptorMismatch {
                            key: key.clone(),
                            registered: Box::new(existing.media_source().clone()),
                            requested: Box::new(requested.clone()),
                        });
                    }
                }

                let consumers = existing.add_consumer();
                self.metrics.record_reuse();

                tracing::info!(
                    stream = %key,
                    unique_id = %existing.unique_id(),
                    consumers = consumers,
                    "Consumer attached to existing live stream"
                );

                return Ok(Step::Attached(LiveStreamConsumer::attach(&existing)));
            }

            // Its consumers still release it; new ones get a replacement
            tracing::warn!(
                stream = %key,
                unique_id = %existing.unique_id(),
                consumers = existing.consumer_count(),
                "Shared live stream ended, opening a replacement"
            );
            slot.shared = None;
            slot.unshared.insert(existing.unique_id(), existing);
        }

        if let Some(marker) = slot
            .opening
            .as_ref()
            .filter(|marker| marker.has_changed().is_ok())
        {
            return Ok(Step::Wait(marker.clone()));
        }

        // No open in flight, or its opener went away without finishing
        let (outcome_tx, marker) = watch::channel(None);
        slot.opening = Some(marker.clone());
        Ok(Step::Open(outcome_tx, marker))
    }

    /// Clear the opening marker and register the opened handle, if any
    fn end_open(
        &self,
        key: &LiveSourceKey,
        marker: &OpenMarker,
        handle: Option<Arc<LiveStreamHandle>>,
    ) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();

        if slot
            .opening
            .as_ref()
            .is_some_and(|current| current.same_channel(marker))
        {
            slot.opening = None;
        }
        if let Some(handle) = handle {
            slot.register(handle);
        }
        if slot.is_empty() {
            slots.remove(key);
        }
    }

    /// Detach a consumer
    ///
    /// The consumer that takes a handle's count to zero deregisters it and
    /// closes it. A close failure is returned, but the handle stays
    /// deregistered.
    pub async fn release(&self, consumer: LiveStreamConsumer) -> Result<(), LiveStreamError> {
        let key = consumer.key().clone();
        let unique_id = consumer.unique_id();

        let Some(handle) = consumer.detach() else {
            tracing::error!(
                stream = %key,
                unique_id = %unique_id,
                "Released consumer outlived its live stream"
            );
            return Err(LiveStreamError::invariant(
                &key,
                "released consumer's handle no longer exists",
            ));
        };

        {
            let mut slots = self.slots.lock();
            let Some(slot) = slots
                .get_mut(&key)
                .filter(|slot| slot.is_registered(&handle))
            else {
                tracing::error!(
                    stream = %key,
                    unique_id = %unique_id,
                    "Released live stream is not registered"
                );
                return Err(LiveStreamError::invariant(&key, "released handle is not registered"));
            };

            let Some(remaining) = handle.remove_consumer() else {
                tracing::error!(
                    stream = %key,
                    unique_id = %unique_id,
                    "Released live stream already had no consumers"
                );
                return Err(LiveStreamError::invariant(
                    &key,
                    "consumer count would drop below zero",
                ));
            };

            if remaining > 0 {
                tracing::debug!(
                    stream = %key,
                    unique_id = %unique_id,
                    consumers = remaining,
                    "Consumer detached"
                );
                return Ok(());
            }

            slot.deregister(&handle);
            if slot.is_empty() {
                slots.remove(&key);
            }
        }

        tracing::debug!(
            stream = %key,
            unique_id = %unique_id,
            "Last consumer detached, closing live stream"
        );

        self.close_handle(&handle).await
    }

    /// Deregister and close every handle
    ///
    /// Returns the number of handles closed. Close failures are logged and
    /// counted; teardown continues with the remaining handles. Opens still
    /// in flight are not interrupted and register their handles as usual.
    pub async fn close_all(&self) -> usize {
        let handles: Vec<(LiveSourceKey, Arc<LiveStreamHandle>)> = {
            let mut slots = self.slots.lock();
            let mut handles = Vec::new();
            slots.retain(|key, slot| {
                handles.extend(
                    slot.take_handles()
                        .into_iter()
                        .map(|handle| (key.clone(), handle)),
                );
                slot.opening.is_some()
            });
            handles
        };

        let mut closed = 0;
        for (key, handle) in handles {
            tracing::debug!(
                stream = %key,
                unique_id = %handle.unique_id(),
                consumers = handle.consumer_count(),
                "Closing live stream on shutdown"
            );
            let _ = self.close_handle(&handle).await;
            closed += 1;
        }

        closed
    }

    /// Check whether any handle is registered for `key`
    pub fn is_registered(&self, key: &LiveSourceKey) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(SourceSlot::has_handles)
    }

    /// Total consumers attached to handles for `key`
    pub fn consumer_count(&self, key: &LiveSourceKey) -> u32 {
        self.slots.lock().get(key).map_or(0, |slot| {
            slot.handles().map(|handle| handle.consumer_count()).sum()
        })
    }

    /// Get statistics for each handle registered for `key`
    pub fn stats(&self, key: &LiveSourceKey) -> Vec<LiveStreamStats> {
        self.slots.lock().get(key).map_or_else(Vec::new, |slot| {
            slot.handles().map(|handle| handle.stats()).collect()
        })
    }

    /// Get the number of registered handles across all keys
    pub fn stream_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .map(|slot| slot.handles().count())
            .sum()
    }

    async fn close_handle(&self, handle: &LiveStreamHandle) -> Result<(), LiveStreamError> {
        let result = handle.close().await;
        match &result {
            Ok(()) => self.metrics.record_close(),
            Err(e) if e.is_invariant_violation() => {}
            Err(_) => {
                self.metrics.record_close();
                self.metrics.record_close_failure();
            }
        }
        result
    }
}

impl Default for LiveSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// An open in progress for one key
///
/// Clears the slot's opening marker when finished, or when dropped because
/// the acquiring future was abandoned mid-open.
struct OpenInFlight<'a> {
    registry: &'a LiveSourceRegistry,
    key: &'a LiveSourceKey,
    marker: OpenMarker,
    finished: bool,
}

impl OpenInFlight<'_> {
    fn finish(&mut self, handle: Option<Arc<LiveStreamHandle>>) {
        self.finished = true;
        self.registry.end_open(self.key, &self.marker, handle);
    }
}

impl Drop for OpenInFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(stream = %self.key, "Live stream open abandoned");
            self.registry.end_open(self.key, &self.marker, None);
        }
    }
}

/// Wait for the open behind `marker`; `None` if it was abandoned
async fn wait_for_open(mut marker: OpenMarker) -> Option<OpenOutcome> {
    loop {
        let outcome = marker.borrow_and_update().clone();
        if outcome.is_some() {
            return outcome;
        }
        if marker.changed().await.is_err() {
            let outcome = marker.borrow().clone();
            return outcome;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::registry::handle::HandleState;
    use crate::registry::testing::{self, FakeTuner};

    fn opener(
        tuner: &Arc<FakeTuner>,
        request: LiveStreamRequest,
        config: RegistryConfig,
        calls: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> std::pin::Pin<
        Box<dyn Future<Output = Result<LiveStreamHandle, LiveStreamError>> + Send>,
    > {
        let tuner = Arc::clone(tuner);
        let calls = Arc::clone(calls);
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let handle = LiveStreamHandle::new(request, tuner, &config);
                handle.open(CancellationToken::new()).await?;
                Ok::<_, LiveStreamError>(handle)
            })
        }
    }

    #[tokio::test]
    async fn test_acquire_release_single() {
        testing::init_tracing();
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let consumer = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(registry.is_registered(&request.key));
        assert_eq!(registry.consumer_count(&request.key), 1);
        assert_eq!(registry.stream_count(), 1);

        assert_ok!(registry.release(consumer).await);

        assert!(!registry.is_registered(&request.key));
        assert_eq!(registry.stream_count(), 0);
        assert_eq!(tuner.connects(), 1);
        assert_eq!(tuner.shutdowns(), 1);

        let metrics = registry.metrics();
        assert_eq!(metrics.opens, 1);
        assert_eq!(metrics.closes, 1);
    }

    #[tokio::test]
    async fn test_shared_reuse() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let first = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let second = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.unique_id(), second.unique_id());
        assert_eq!(registry.consumer_count(&request.key), 2);
        assert_eq!(tuner.connects(), 1);
        assert_eq!(registry.metrics().reuses, 1);

        // Both consumers read the same payload
        let mut first_reader = first.reader().unwrap();
        let mut second_reader = second.reader().unwrap();
        tuner.push(bytes::Bytes::from_static(b"ts"));
        assert_eq!(first_reader.next_chunk().await.unwrap(), "ts");
        assert_eq!(second_reader.next_chunk().await.unwrap(), "ts");

        registry.release(first).await.unwrap();
        assert_eq!(tuner.shutdowns(), 0);
        assert_eq!(registry.consumer_count(&request.key), 1);

        registry.release(second).await.unwrap();
        assert_eq!(tuner.shutdowns(), 1);
        assert!(!registry.is_registered(&request.key));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_acquires_open_once() {
        let registry = Arc::new(LiveSourceRegistry::new());
        let tuner = FakeTuner::slow(Duration::from_millis(100));
        let request = testing::request("5.1");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let open = opener(&tuner, request.clone(), RegistryConfig::default(), &calls);
            let key = request.key.clone();
            tasks.push(tokio::spawn(async move { registry.acquire(&key, open).await }));
        }

        let mut consumers = Vec::new();
        for task in tasks {
            consumers.push(task.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tuner.connects(), 1);

        let unique_id = consumers[0].unique_id();
        assert!(consumers.iter().all(|c| c.unique_id() == unique_id));
        assert_eq!(registry.consumer_count(&request.key), 8);

        for consumer in consumers {
            registry.release(consumer).await.unwrap();
        }
        assert!(!registry.is_registered(&request.key));
        assert_eq!(tuner.shutdowns(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interleaved_acquire_release_closes_once_per_handle() {
        let registry = Arc::new(LiveSourceRegistry::new());
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let registry = Arc::clone(&registry);
            let tuner = tuner.clone();
            let request = request.clone();
            tasks.push(tokio::spawn(async move {
                let consumer = registry
                    .acquire_source(&request, tuner, CancellationToken::new())
                    .await?;
                tokio::time::sleep(Duration::from_millis(i % 5)).await;
                registry.release(consumer).await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(!registry.is_registered(&request.key));
        assert_eq!(registry.stream_count(), 0);
        // Every physical open was matched by exactly one close
        assert_eq!(tuner.connects(), tuner.shutdowns());

        let metrics = registry.metrics();
        assert_eq!(metrics.opens, metrics.closes);
        assert_eq!(metrics.opens + metrics.reuses, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_release_racing_acquire_keeps_handle_consistent() {
        let registry = Arc::new(LiveSourceRegistry::new());
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let holder = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let leaving = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        let release = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.release(leaving).await })
        };
        let acquire = {
            let registry = Arc::clone(&registry);
            let tuner = tuner.clone();
            let request = request.clone();
            tokio::spawn(async move {
                registry
                    .acquire_source(&request, tuner, CancellationToken::new())
                    .await
            })
        };

        release.await.unwrap().unwrap();
        let joined = acquire.await.unwrap().unwrap();

        assert_eq!(joined.unique_id(), holder.unique_id());
        assert_eq!(registry.consumer_count(&request.key), 2);
        assert_eq!(tuner.shutdowns(), 0);

        let stats = registry.stats(&request.key);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].state, HandleState::Open);

        registry.release(holder).await.unwrap();
        registry.release(joined).await.unwrap();
        assert_eq!(tuner.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_reacquire_after_close_opens_fresh_handle() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let first = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let first_id = first.unique_id();
        registry.release(first).await.unwrap();

        let second = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(second.unique_id(), first_id);
        assert_eq!(tuner.connects(), 2);
        registry.release(second).await.unwrap();
    }

    #[tokio::test]
    async fn test_exclusive_sources_get_own_handles() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::exclusive_request("9.1");

        let first = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let second = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(first.unique_id(), second.unique_id());
        assert_eq!(tuner.connects(), 2);
        assert_eq!(registry.stats(&request.key).len(), 2);
        assert_eq!(registry.consumer_count(&request.key), 2);

        registry.release(first).await.unwrap();
        assert_eq!(tuner.shutdowns(), 1);
        assert!(registry.is_registered(&request.key));

        registry.release(second).await.unwrap();
        assert_eq!(tuner.shutdowns(), 2);
        assert!(!registry.is_registered(&request.key));
    }

    #[tokio::test]
    async fn test_sharing_disabled_by_config() {
        let registry =
            LiveSourceRegistry::with_config(RegistryConfig::default().disable_stream_sharing());
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let first = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let second = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(first.unique_id(), second.unique_id());
        registry.release(first).await.unwrap();
        registry.release(second).await.unwrap();
        assert_eq!(tuner.shutdowns(), 2);
    }

    #[tokio::test]
    async fn test_open_failure_registers_nothing() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::failing();
        let request = testing::request("5.1");

        let err = assert_err!(
            registry
                .acquire_source(&request, tuner.clone(), CancellationToken::new())
                .await
        );

        assert!(matches!(err, LiveStreamError::Connect { .. }));
        assert!(!registry.is_registered(&request.key));
        assert_eq!(registry.metrics().open_failures, 1);

        // A later attempt is not blocked by the failure
        let working = FakeTuner::new();
        let consumer = registry
            .acquire_source(&request, working, CancellationToken::new())
            .await
            .unwrap();
        registry.release(consumer).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_open_leaves_no_entry() {
        let registry = Arc::new(LiveSourceRegistry::new());
        let tuner = FakeTuner::slow(Duration::from_secs(10));
        let request = testing::request("5.1");
        let cancel = CancellationToken::new();

        let pending = {
            let registry = Arc::clone(&registry);
            let tuner = tuner.clone();
            let request = request.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { registry.acquire_source(&request, tuner, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, LiveStreamError::Cancelled(_)));
        assert!(!registry.is_registered(&request.key));
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_ended_source_is_replaced_for_new_consumers() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let stale = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let mut stale_reader = stale.reader().unwrap();

        tuner.end_streams();
        assert_eq!(stale_reader.next_chunk().await, None);

        let fresh = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(fresh.unique_id(), stale.unique_id());
        assert_eq!(tuner.connects(), 2);
        assert_eq!(registry.stats(&request.key).len(), 2);

        let mut fresh_reader = fresh.reader().unwrap();
        tuner.push(bytes::Bytes::from_static(b"ts"));
        assert_eq!(fresh_reader.next_chunk().await.unwrap(), "ts");

        // Later consumers join the replacement, not the ended handle
        let joined = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(joined.unique_id(), fresh.unique_id());

        registry.release(stale).await.unwrap();
        assert_eq!(tuner.shutdowns(), 1);
        assert!(registry.is_registered(&request.key));

        registry.release(joined).await.unwrap();
        registry.release(fresh).await.unwrap();
        assert_eq!(tuner.shutdowns(), 2);
        assert!(!registry.is_registered(&request.key));
        assert!(registry.slots.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquires_share_open_failure() {
        let config = RegistryConfig::default().open_timeout(Duration::from_millis(200));
        let registry = Arc::new(LiveSourceRegistry::with_config(config));
        let tuner = FakeTuner::slow(Duration::from_secs(10));
        let request = testing::request("5.1");
        let started = tokio::time::Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let registry = Arc::clone(&registry);
            let tuner = tuner.clone();
            let request = request.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .acquire_source(&request, tuner, CancellationToken::new())
                    .await
            }));
        }

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, LiveStreamError::OpenTimeout { .. }));
        }

        assert_eq!(tuner.connects(), 1);
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(registry.metrics().open_failures, 1);
        assert!(registry.slots.lock().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_open_leaves_no_slot() {
        let registry = LiveSourceRegistry::new();
        let request = testing::request("5.1");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            registry.acquire_source(
                &request,
                FakeTuner::slow(Duration::from_secs(10)),
                CancellationToken::new(),
            ),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(registry.slots.lock().is_empty());

        // The key opens normally afterwards
        let consumer = registry
            .acquire_source(&request, FakeTuner::new(), CancellationToken::new())
            .await
            .unwrap();
        registry.release(consumer).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_cancel_leaves_open_running() {
        let registry = Arc::new(LiveSourceRegistry::new());
        let tuner = FakeTuner::slow(Duration::from_millis(100));
        let request = testing::request("5.1");

        let opener = {
            let registry = Arc::clone(&registry);
            let tuner = tuner.clone();
            let request = request.clone();
            tokio::spawn(async move {
                registry
                    .acquire_source(&request, tuner, CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = registry
            .acquire_source(&request, tuner.clone(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LiveStreamError::Cancelled(_)));

        let consumer = opener.await.unwrap().unwrap();
        assert_eq!(tuner.connects(), 1);
        registry.release(consumer).await.unwrap();
    }

    #[tokio::test]
    async fn test_descriptor_mismatch_is_surfaced() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let consumer = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        let mut other = request.clone();
        other.media_source = MediaSourceInfo::new(
            "ms-other",
            "http://10.0.0.20:5004/auto/v5.1?transcode=mobile",
        );

        let err = registry
            .acquire_source(&other, tuner.clone(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LiveStreamError::DescriptorMismatch { .. }));
        assert_eq!(registry.consumer_count(&request.key), 1);
        assert_eq!(tuner.connects(), 1);

        registry.release(consumer).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_failure_still_deregisters() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::failing_shutdown();
        let request = testing::request("5.1");

        let consumer = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        let err = registry.release(consumer).await.unwrap_err();
        assert!(matches!(err, LiveStreamError::Shutdown { .. }));
        assert!(!registry.is_registered(&request.key));
        assert_eq!(registry.metrics().close_failures, 1);

        // The key is usable again
        let consumer = registry
            .acquire_source(&request, FakeTuner::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(registry.is_registered(&request.key));
        registry.release(consumer).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_rejects_unopened_handle() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");
        let config = RegistryConfig::default();

        let unopened = LiveStreamHandle::new(request.clone(), tuner, &config);

        let err = registry
            .acquire(&request.key, move || async move {
                Ok::<_, LiveStreamError>(unopened)
            })
            .await
            .unwrap_err();

        assert!(err.is_invariant_violation());
        assert!(!registry.is_registered(&request.key));
    }

    #[tokio::test]
    async fn test_release_from_other_registry_is_invariant_violation() {
        let registry = LiveSourceRegistry::new();
        let other = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();
        let request = testing::request("5.1");

        let consumer = registry
            .acquire_source(&request, tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        let err = other.release(consumer).await.unwrap_err();
        assert!(err.is_invariant_violation());

        // The owning registry still holds the handle with its consumer
        assert_eq!(registry.consumer_count(&request.key), 1);
        assert_eq!(tuner.shutdowns(), 0);
        assert_eq!(registry.close_all().await, 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = LiveSourceRegistry::new();
        let tuner = FakeTuner::new();

        let a = registry
            .acquire_source(&testing::request("5.1"), tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let b = registry
            .acquire_source(&testing::request("7.1"), tuner.clone(), CancellationToken::new())
            .await
            .unwrap();
        let c = registry
            .acquire_source(&testing::request("7.1"), tuner.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(registry.stream_count(), 2);
        assert_eq!(registry.close_all().await, 2);
        assert_eq!(registry.stream_count(), 0);
        assert_eq!(tuner.shutdowns(), 2);

        // Consumers of torn-down streams can no longer read or release cleanly
        assert!(a.reader().is_err());
        assert!(registry.release(b).await.unwrap_err().is_invariant_violation());
        assert!(registry.release(c).await.unwrap_err().is_invariant_violation());
    }
}
