//! Tuner fakes shared by registry and gate tests

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::key::{LiveStreamRequest, MediaSourceInfo, TunerHostInfo};
use super::source::{LiveConnection, TunerSource};

pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn request(channel: &str) -> LiveStreamRequest {
    LiveStreamRequest::new(
        channel,
        MediaSourceInfo::new(
            format!("ms-{channel}"),
            format!("http://10.0.0.20:5004/auto/v{channel}"),
        )
        .with_container("ts"),
        TunerHostInfo::new("hdhr-1", "hdhomerun", "http://10.0.0.20"),
    )
}

pub(crate) fn exclusive_request(channel: &str) -> LiveStreamRequest {
    let mut request = request(channel);
    request.tuner_host = request.tuner_host.exclusive();
    request
}

/// Tuner that counts connects and shutdowns and lets tests push payload
pub(crate) struct FakeTuner {
    connect_delay: Duration,
    fail_connect: bool,
    fail_shutdown: bool,
    connects: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
}

impl FakeTuner {
    fn build(connect_delay: Duration, fail_connect: bool, fail_shutdown: bool) -> Arc<Self> {
        Arc::new(Self {
            connect_delay,
            fail_connect,
            fail_shutdown,
            connects: AtomicUsize::new(0),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            feeds: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, false, false)
    }

    pub(crate) fn slow(delay: Duration) -> Arc<Self> {
        Self::build(delay, false, false)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::build(Duration::ZERO, true, false)
    }

    pub(crate) fn failing_shutdown() -> Arc<Self> {
        Self::build(Duration::ZERO, false, true)
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// End every live connection, as if the tuner stopped sending
    pub(crate) fn end_streams(&self) {
        self.feeds.lock().clear();
    }

    /// Deliver a chunk to every live connection
    pub(crate) fn push(&self, data: Bytes) {
        self.feeds
            .lock()
            .retain(|feed| feed.send(data.clone()).is_ok());
    }
}

#[async_trait]
impl TunerSource for FakeTuner {
    async fn connect(
        &self,
        _media_source: &MediaSourceInfo,
        tuner_host: &TunerHostInfo,
        cancel: CancellationToken,
    ) -> io::Result<Box<dyn LiveConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if !self.connect_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "connect cancelled"));
                }
                _ = tokio::time::sleep(self.connect_delay) => {}
            }
        }

        if self.fail_connect {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("tuner {} refused connection", tuner_host.id),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().push(tx);

        Ok(Box::new(FakeConnection {
            rx,
            fail_shutdown: self.fail_shutdown,
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }
}

struct FakeConnection {
    rx: mpsc::UnboundedReceiver<Bytes>,
    fail_shutdown: bool,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl LiveConnection for FakeConnection {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }

    async fn shutdown(self: Box<Self>) -> io::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "tuner went away"));
        }
        Ok(())
    }
}
