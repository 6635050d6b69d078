//! Tuner collaborator traits
//!
//! The registry never talks to tuner hardware directly. A [`TunerSource`]
//! performs the physical connection and hands back a [`LiveConnection`] that
//! the stream handle pumps payload from until it is closed.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::key::{MediaSourceInfo, TunerHostInfo};

/// Opens physical connections to tuner hosts
#[async_trait]
pub trait TunerSource: Send + Sync + 'static {
    /// Connect to `media_source` on `tuner_host`
    ///
    /// Implementations should return promptly once `cancel` fires. The caller
    /// also races the returned future against cancellation and the configured
    /// open timeout, so dropping the future mid-connect must be safe.
    async fn connect(
        &self,
        media_source: &MediaSourceInfo,
        tuner_host: &TunerHostInfo,
        cancel: CancellationToken,
    ) -> io::Result<Box<dyn LiveConnection>>;
}

/// One established physical connection
///
/// Transport failures surface as `std::io::Error`; the handle attaches the
/// source key when reporting them.
#[async_trait]
pub trait LiveConnection: Send + 'static {
    /// Read the next payload chunk, `None` at end of stream
    ///
    /// Must be cancel safe: the pump drops this future when the stream closes.
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// Release the physical connection
    async fn shutdown(self: Box<Self>) -> io::Result<()>;
}
