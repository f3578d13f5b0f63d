//! Media device bridge trait and supporting types.
//!
//! The playback core drives a single host-provided media device. Every load
//! is tagged with a [`LoadToken`]; the device echoes that token in each
//! [`DeviceEvent`] so the core can discard events that belong to a load it
//! has already abandoned.

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Resolved payload handed to the media device.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// File on the local filesystem, indexed by the store.
    LocalFile { path: PathBuf },
    /// Bytes held by the embedded store.
    MemoryBuffer { data: Bytes },
}

impl MediaSource {
    /// Size of the payload when it is known without touching the filesystem.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            MediaSource::LocalFile { .. } => None,
            MediaSource::MemoryBuffer { data } => Some(data.len() as u64),
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, MediaSource::MemoryBuffer { .. })
    }
}

/// Monotonic version token identifying one load request.
///
/// Tokens are issued by the session in strictly increasing order. A device
/// event is only honoured when its token equals the session's pending or
/// current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LoadToken(u64);

impl LoadToken {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The token that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load#{}", self.0)
    }
}

/// Request to load one item into the device.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub token: LoadToken,
    pub source: MediaSource,
    /// Position to seek to once the media is ready, in seconds.
    pub start_position: f64,
    /// Display name surfaced to host media sessions.
    pub title: Option<String>,
}

impl LoadRequest {
    pub fn new(token: LoadToken, source: MediaSource) -> Self {
        Self {
            token,
            source,
            start_position: 0.0,
            title: None,
        }
    }

    pub fn with_start_position(mut self, seconds: f64) -> Self {
        self.start_position = seconds.max(0.0);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Events reported by the host media device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Metadata is loaded and the media can start.
    Ready {
        token: LoadToken,
        duration_seconds: Option<f64>,
    },
    /// Periodic transport time update.
    TimeUpdate { token: LoadToken, position_seconds: f64 },
    /// The media played to its end.
    Ended { token: LoadToken },
    /// The device failed to load or render the media.
    Error { token: LoadToken, message: String },
}

impl DeviceEvent {
    pub fn token(&self) -> LoadToken {
        match self {
            DeviceEvent::Ready { token, .. }
            | DeviceEvent::TimeUpdate { token, .. }
            | DeviceEvent::Ended { token }
            | DeviceEvent::Error { token, .. } => *token,
        }
    }
}

/// Opaque media device capability.
///
/// Implementations deliver [`DeviceEvent`]s on a channel supplied by the host
/// when wiring the engine. `load` must return as soon as the request is
/// accepted; readiness is reported asynchronously through
/// [`DeviceEvent::Ready`].
#[async_trait::async_trait]
pub trait MediaDevice: Send + Sync {
    /// Replace whatever is loaded with the given source.
    async fn load(&self, request: LoadRequest) -> Result<()>;

    /// Start or resume rendering.
    async fn play(&self) -> Result<()>;

    /// Pause rendering, keeping the current position.
    async fn pause(&self) -> Result<()>;

    /// Seek to an absolute position in seconds. The device clamps to the media duration.
    async fn seek(&self, position_seconds: f64) -> Result<()>;

    /// Adjust volume, normalized to `0.0..=1.0`.
    async fn set_volume(&self, volume: f32) -> Result<()>;

    /// Current transport time in seconds.
    async fn current_time(&self) -> Result<f64>;

    /// Duration of the loaded media, when known.
    async fn duration(&self) -> Result<Option<f64>>;

    /// Drop the loaded media and free native resources.
    async fn unload(&self) -> Result<()>;
}
