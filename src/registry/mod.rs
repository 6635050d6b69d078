//! Live source registry
//!
//! The registry multiplexes one physical tuner connection to many consumers
//! of the same logical source, and closes the connection when the last
//! consumer detaches.
//!
//! # Architecture
//!
//! ```text
//!                      Arc<LiveSourceRegistry>
//!                 ┌───────────────────────────────┐
//!                 │ slots: Mutex<HashMap<Key,     │
//!                 │   SourceSlot {                │
//!                 │     shared: Arc<Handle>,      │
//!                 │     unshared: {id: Handle},   │
//!                 │     opening: watch::Receiver, │
//!                 │   }                           │
//!                 │ >>                            │
//!                 └───────────────┬───────────────┘
//!                                 │ owns
//!                                 ▼
//!                       LiveStreamHandle ◄── TunerSource::connect()
//!                        pump task: LiveConnection::next_chunk()
//!                                 │ broadcast::Sender<Bytes>
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!    [Consumer]              [Consumer]              [Consumer]
//!    Weak<Handle>            Weak<Handle>            Weak<Handle>
//!    reader.next_chunk()     reader.next_chunk()     reader.next_chunk()
//! ```
//!
//! # Lifecycle
//!
//! `acquire` either bumps the consumer count of the registered shared handle
//! or opens a new one. Acquires arriving during an open wait for it and share
//! its outcome. A shared handle whose source has ended is kept for its
//! existing consumers but is no longer handed out. `release` decrements it; the release that reaches zero
//! deregisters the handle and closes it, exactly once. A handle with zero
//! consumers is never handed out.
//!
//! # Zero-Copy Design
//!
//! Payload chunks are `bytes::Bytes`, so every consumer shares the same
//! allocation; the broadcast channel only bumps a reference count.

pub mod config;
pub mod consumer;
pub mod error;
pub mod handle;
pub mod key;
pub mod source;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RegistryConfig;
pub use consumer::{LiveStreamConsumer, LiveStreamReader};
pub use error::LiveStreamError;
pub use handle::{HandleState, LiveStreamHandle, LiveStreamStats};
pub use key::{LiveSourceKey, LiveStreamRequest, MediaSourceInfo, TunerHostInfo};
pub use source::{LiveConnection, TunerSource};
pub use store::LiveSourceRegistry;
