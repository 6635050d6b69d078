//! Registry configuration

use std::time::Duration;

/// Configuration for the live source registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a physical open may take before it fails
    pub open_timeout: Duration,

    /// Chunks buffered per stream before slow readers start skipping
    pub broadcast_capacity: usize,

    /// Allow consumers to share one physical connection
    ///
    /// When disabled every consumer gets its own handle, even if the tuner
    /// host supports sharing.
    pub stream_sharing: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(30),
            broadcast_capacity: 256,
            stream_sharing: true,
        }
    }
}

impl RegistryConfig {
    /// Set the open timeout
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the broadcast capacity (at least one chunk)
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Disable stream sharing
    pub fn disable_stream_sharing(mut self) -> Self {
        self.stream_sharing = false;
        self
    }
}
