//! Live source identifiers and descriptors
//!
//! This module defines the key used to look up a logical broadcast source and
//! the descriptors handed to the tuner when a physical stream is opened.

/// Unique identifier for a logical live source (tuner host + channel)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveSourceKey {
    /// Tuner host identifier (e.g., "hdhr-1013A7F2")
    pub tuner_host_id: String,
    /// Channel identifier on that host (e.g., "5.1")
    pub channel_id: String,
}

impl LiveSourceKey {
    /// Create a new live source key
    pub fn new(tuner_host_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            tuner_host_id: tuner_host_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl std::fmt::Display for LiveSourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tuner_host_id, self.channel_id)
    }
}

/// Description of the media a live stream delivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSourceInfo {
    /// Media source identifier
    pub id: String,
    /// Path or URL the tuner streams from
    pub path: String,
    /// Container format, when the tuner reports one (e.g., "ts")
    pub container: Option<String>,
}

impl MediaSourceInfo {
    /// Create a media source descriptor
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            container: None,
        }
    }

    /// Set the container format
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// Description of the tuner host that owns the physical connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunerHostInfo {
    /// Tuner host identifier
    pub id: String,
    /// Host type (e.g., "hdhomerun", "m3u")
    pub host_type: String,
    /// Host URL
    pub url: String,
    /// Whether one physical connection may feed several consumers
    pub allow_stream_sharing: bool,
}

impl TunerHostInfo {
    /// Create a tuner host descriptor that allows stream sharing
    pub fn new(
        id: impl Into<String>,
        host_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            host_type: host_type.into(),
            url: url.into(),
            allow_stream_sharing: true,
        }
    }

    /// Disable stream sharing for this host
    pub fn exclusive(mut self) -> Self {
        self.allow_stream_sharing = false;
        self
    }
}

/// Everything needed to open one live stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStreamRequest {
    /// Logical source being requested
    pub key: LiveSourceKey,
    /// Media the caller expects to receive
    pub media_source: MediaSourceInfo,
    /// Tuner host that serves the source
    pub tuner_host: TunerHostInfo,
}

impl LiveStreamRequest {
    /// Build a request, keying it by the tuner host id and the given channel
    pub fn new(
        channel_id: impl Into<String>,
        media_source: MediaSourceInfo,
        tuner_host: TunerHostInfo,
    ) -> Self {
        Self {
            key: LiveSourceKey::new(tuner_host.id.clone(), channel_id),
            media_source,
            tuner_host,
        }
    }
}
