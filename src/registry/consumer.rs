//! Consumer-side view of a live stream
//!
//! The registry owns every registered [`LiveStreamHandle`]. A consumer holds
//! only a weak reference, used to read payload and to detach through
//! [`LiveSourceRegistry::release`](super::LiveSourceRegistry::release).

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::error::LiveStreamError;
use super::handle::LiveStreamHandle;
use super::key::LiveSourceKey;

/// A consumer attached to a live stream handle
///
/// Released by value, so one consumer can detach at most once.
#[derive(Debug)]
pub struct LiveStreamConsumer {
    handle: Option<Weak<LiveStreamHandle>>,
    key: LiveSourceKey,
    unique_id: Uuid,
}

impl LiveStreamConsumer {
    pub(super) fn attach(handle: &Arc<LiveStreamHandle>) -> Self {
        Self {
            handle: Some(Arc::downgrade(handle)),
            key: handle.key().clone(),
            unique_id: handle.unique_id(),
        }
    }

    /// Instance identifier of the handle this consumer reads
    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }

    pub fn key(&self) -> &LiveSourceKey {
        &self.key
    }

    /// Open a reader on the stream payload
    pub fn reader(&self) -> Result<LiveStreamReader, LiveStreamError> {
        let handle = self
            .handle
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| LiveStreamError::Closed(self.key.clone()))?;

        Ok(LiveStreamReader {
            key: self.key.clone(),
            rx: handle.subscribe()?,
            skipped: 0,
        })
    }

    /// Give up the reference for release; `None` if the handle is gone
    pub(super) fn detach(mut self) -> Option<Arc<LiveStreamHandle>> {
        self.handle.take().and_then(|handle| handle.upgrade())
    }
}

impl Drop for LiveStreamConsumer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!(
                stream = %self.key,
                unique_id = %self.unique_id,
                "Live stream consumer dropped without release"
            );
        }
    }
}

/// Reads payload chunks from a live stream
///
/// Live payload is not replayed: a reader that falls more than the broadcast
/// capacity behind skips the missed chunks and continues from the oldest one
/// still buffered.
pub struct LiveStreamReader {
    key: LiveSourceKey,
    rx: broadcast::Receiver<Bytes>,
    skipped: u64,
}

impl LiveStreamReader {
    /// Next payload chunk, `None` once the stream has ended or closed
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(data) => return Some(data),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.skipped += missed;
                    tracing::debug!(
                        stream = %self.key,
                        missed = missed,
                        "Live stream reader lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total chunks skipped because this reader lagged
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
