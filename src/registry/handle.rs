//! Live stream handle
//!
//! A handle owns one physical tuner connection. Once open it runs a pump task
//! that reads payload chunks from the connection and fans them out to every
//! subscribed reader over a `tokio::sync::broadcast` channel.
//!
//! The consumer count lives on the handle but is only ever changed by the
//! registry while it holds the lock for the handle's source key.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::RegistryConfig;
use super::error::LiveStreamError;
use super::key::{LiveSourceKey, LiveStreamRequest, MediaSourceInfo, TunerHostInfo};
use super::source::{LiveConnection, TunerSource};

/// Lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Constructed, no physical connection yet
    Unopened,
    /// Physical connection in progress
    Opening,
    /// Connected and pumping payload
    Open,
    /// Connected, but the source stopped delivering payload
    Ended,
    /// Teardown in progress
    Closing,
    /// Physical connection released
    Closed,
}

enum Lifecycle {
    Unopened,
    Opening,
    Open {
        stop: CancellationToken,
        pump: JoinHandle<Box<dyn LiveConnection>>,
    },
    Closing,
    Closed,
}

impl Lifecycle {
    fn state(&self) -> HandleState {
        match self {
            Lifecycle::Unopened => HandleState::Unopened,
            Lifecycle::Opening => HandleState::Opening,
            Lifecycle::Open { .. } => HandleState::Open,
            Lifecycle::Closing => HandleState::Closing,
            Lifecycle::Closed => HandleState::Closed,
        }
    }
}

/// Sender side of the payload fan-out, cleared when the stream stops
type Feed = Arc<Mutex<Option<broadcast::Sender<Bytes>>>>;

/// One open physical connection to a live source
pub struct LiveStreamHandle {
    unique_id: Uuid,
    key: LiveSourceKey,
    media_source: MediaSourceInfo,
    tuner_host: TunerHostInfo,
    enable_sharing: bool,

    /// Number of attached consumers
    consumer_count: AtomicU32,

    source: Arc<dyn TunerSource>,
    open_timeout: Duration,
    broadcast_capacity: usize,
    feed: Feed,
    lifecycle: Mutex<Lifecycle>,
    created_at: Instant,
}

impl LiveStreamHandle {
    /// Create an unopened handle for `request`
    pub fn new(
        request: LiveStreamRequest,
        source: Arc<dyn TunerSource>,
        config: &RegistryConfig,
    ) -> Self {
        let LiveStreamRequest {
            key,
            media_source,
            tuner_host,
        } = request;
        let enable_sharing = config.stream_sharing && tuner_host.allow_stream_sharing;

        Self {
            unique_id: Uuid::new_v4(),
            key,
            media_source,
            tuner_host,
            enable_sharing,
            consumer_count: AtomicU32::new(0),
            source,
            open_timeout: config.open_timeout,
            broadcast_capacity: config.broadcast_capacity.max(1),
            feed: Arc::new(Mutex::new(None)),
            lifecycle: Mutex::new(Lifecycle::Unopened),
            created_at: Instant::now(),
        }
    }

    /// Instance identifier, distinct from every other handle for the same key
    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }

    pub fn key(&self) -> &LiveSourceKey {
        &self.key
    }

    pub fn media_source(&self) -> &MediaSourceInfo {
        &self.media_source
    }

    pub fn tuner_host(&self) -> &TunerHostInfo {
        &self.tuner_host
    }

    /// Whether several consumers may read this handle
    pub fn enable_sharing(&self) -> bool {
        self.enable_sharing
    }

    /// Get the number of attached consumers
    pub fn consumer_count(&self) -> u32 {
        self.consumer_count.load(Ordering::Acquire)
    }

    pub fn state(&self) -> HandleState {
        let state = self.lifecycle.lock().state();
        if state == HandleState::Open && self.feed.lock().is_none() {
            return HandleState::Ended;
        }
        state
    }

    /// Whether the handle is connected and its source is still live
    pub fn is_open(&self) -> bool {
        self.state() == HandleState::Open
    }

    /// Whether a physical connection is held, live or ended
    pub(super) fn is_connected(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Open { .. })
    }

    /// Increment the consumer count, returning the new count
    pub(super) fn add_consumer(&self) -> u32 {
        self.consumer_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the consumer count, returning the new count
    ///
    /// Returns `None` if the count was already zero.
    pub(super) fn remove_consumer(&self) -> Option<u32> {
        self.consumer_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|prev| prev - 1)
    }

    /// Subscribe to the payload of an open stream
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Bytes>, LiveStreamError> {
        self.feed
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| LiveStreamError::Closed(self.key.clone()))
    }

    /// Establish the physical connection
    ///
    /// Fails with `Cancelled` if `cancel` fires first and with `OpenTimeout`
    /// if the tuner does not connect within the configured timeout. On
    /// failure the handle returns to `Unopened`.
    ///
    /// `cancel` only scopes the open. Once connected, the stream belongs to
    /// all of its consumers and is stopped by [`close`](Self::close).
    pub async fn open(&self, cancel: CancellationToken) -> Result<(), LiveStreamError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Unopened) {
                let state = lifecycle.state();
                drop(lifecycle);
                tracing::error!(
                    stream = %self.key,
                    unique_id = %self.unique_id,
                    state = ?state,
                    "Open called on a handle that is not unopened"
                );
                return Err(LiveStreamError::invariant(
                    &self.key,
                    format!("open called on {state:?} handle"),
                ));
            }
            *lifecycle = Lifecycle::Opening;
        }

        let connect = self
            .source
            .connect(&self.media_source, &self.tuner_host, cancel.clone());

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LiveStreamError::Cancelled(self.key.clone())),
            result = tokio::time::timeout(self.open_timeout, connect) => match result {
                Ok(result) => result.map_err(|e| LiveStreamError::Connect {
                    key: self.key.clone(),
                    message: e.to_string(),
                }),
                Err(_) => Err(LiveStreamError::OpenTimeout {
                    key: self.key.clone(),
                    timeout: self.open_timeout,
                }),
            },
        };

        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                *self.lifecycle.lock() = Lifecycle::Unopened;
                return Err(e);
            }
        };

        let (tx, _) = broadcast::channel(self.broadcast_capacity);
        *self.feed.lock() = Some(tx.clone());

        let stop = CancellationToken::new();
        let pump = tokio::spawn(pump(
            self.key.clone(),
            connection,
            tx,
            Arc::clone(&self.feed),
            stop.clone(),
        ));
        *self.lifecycle.lock() = Lifecycle::Open { stop, pump };

        tracing::info!(
            stream = %self.key,
            unique_id = %self.unique_id,
            sharing = self.enable_sharing,
            "Live stream opened"
        );

        Ok(())
    }

    /// Release the physical connection
    ///
    /// Stops the pump, then shuts the connection down. The handle ends in
    /// `Closed` even when shutdown fails. A second call is an invariant
    /// violation and is reported, not ignored.
    pub async fn close(&self) -> Result<(), LiveStreamError> {
        let (stop, pump) = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closing) {
                Lifecycle::Open { stop, pump } => (stop, pump),
                Lifecycle::Unopened => {
                    *lifecycle = Lifecycle::Closed;
                    return Ok(());
                }
                other => {
                    let state = other.state();
                    *lifecycle = other;
                    drop(lifecycle);
                    tracing::error!(
                        stream = %self.key,
                        unique_id = %self.unique_id,
                        state = ?state,
                        "Close called on a handle that is not open"
                    );
                    return Err(LiveStreamError::invariant(
                        &self.key,
                        format!("close called on {state:?} handle"),
                    ));
                }
            }
        };

        self.feed.lock().take();
        stop.cancel();

        let result = match pump.await {
            Ok(connection) => {
                connection
                    .shutdown()
                    .await
                    .map_err(|e| LiveStreamError::Shutdown {
                        key: self.key.clone(),
                        message: e.to_string(),
                    })
            }
            Err(e) => Err(LiveStreamError::Shutdown {
                key: self.key.clone(),
                message: format!("pump task failed: {e}"),
            }),
        };

        *self.lifecycle.lock() = Lifecycle::Closed;

        match &result {
            Ok(()) => tracing::info!(
                stream = %self.key,
                unique_id = %self.unique_id,
                "Live stream closed"
            ),
            Err(e) => tracing::warn!(
                stream = %self.key,
                unique_id = %self.unique_id,
                error = %e,
                "Live stream close failed"
            ),
        }

        result
    }

    /// Snapshot of this handle for reporting
    pub fn stats(&self) -> LiveStreamStats {
        LiveStreamStats {
            unique_id: self.unique_id,
            key: self.key.clone(),
            consumer_count: self.consumer_count(),
            enable_sharing: self.enable_sharing,
            state: self.state(),
            uptime: self.created_at.elapsed(),
        }
    }
}

impl Drop for LiveStreamHandle {
    fn drop(&mut self) {
        if let Lifecycle::Open { stop, .. } = &*self.lifecycle.get_mut() {
            stop.cancel();
            tracing::warn!(
                stream = %self.key,
                unique_id = %self.unique_id,
                "Live stream handle dropped while open"
            );
        }
    }
}

impl std::fmt::Debug for LiveStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStreamHandle")
            .field("unique_id", &self.unique_id)
            .field("key", &self.key)
            .field("enable_sharing", &self.enable_sharing)
            .field("consumer_count", &self.consumer_count())
            .field("state", &self.state())
            .finish()
    }
}

async fn pump(
    key: LiveSourceKey,
    mut connection: Box<dyn LiveConnection>,
    tx: broadcast::Sender<Bytes>,
    feed: Feed,
    stop: CancellationToken,
) -> Box<dyn LiveConnection> {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            chunk = connection.next_chunk() => match chunk {
                // No receivers is fine for a live source
                Ok(Some(data)) => {
                    let _ = tx.send(data);
                }
                Ok(None) => {
                    tracing::debug!(stream = %key, "Live source reached end of stream");
                    break;
                }
                Err(e) => {
                    tracing::warn!(stream = %key, error = %e, "Live source read failed");
                    break;
                }
            },
        }
    }

    feed.lock().take();
    connection
}

/// Statistics for a live stream handle
#[derive(Debug, Clone)]
pub struct LiveStreamStats {
    /// Handle instance identifier
    pub unique_id: Uuid,
    /// Logical source
    pub key: LiveSourceKey,
    /// Number of attached consumers
    pub consumer_count: u32,
    /// Whether the handle is shared
    pub enable_sharing: bool,
    /// Current lifecycle state
    pub state: HandleState,
    /// Time since the handle was created
    pub uptime: Duration,
}
