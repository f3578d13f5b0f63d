//! # Host Bridge Traits
//!
//! Capability contracts that the host application must satisfy for the
//! playback core.
//!
//! ## Overview
//!
//! This crate defines the boundary between the session engine and whatever
//! actually renders audio on the host. The engine never decodes or outputs
//! sound itself: it hands a [`LoadRequest`](playback::LoadRequest) to a
//! [`MediaDevice`](playback::MediaDevice) and reacts to the
//! [`DeviceEvent`](playback::DeviceEvent)s the host reports back.
//!
//! ## Traits
//!
//! ### Playback
//! - [`MediaDevice`](playback::MediaDevice) - Opaque transport with play/pause/seek and a time source
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Provide actionable error messages
//! - Never panic across the bridge; the engine turns errors into notifications
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so the engine can be driven
//! from any tokio task.
//!
//! ## Examples
//!
//! ### Implementing MediaDevice
//!
//! ```ignore
//! use bridge_traits::playback::{DeviceEvent, LoadRequest, MediaDevice};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct HostAudioElement {
//!     events: tokio::sync::mpsc::UnboundedSender<DeviceEvent>,
//! }
//!
//! #[async_trait]
//! impl MediaDevice for HostAudioElement {
//!     async fn load(&self, request: LoadRequest) -> Result<()> {
//!         // Hand the source to the native player, then report
//!         // DeviceEvent::Ready { token: request.token, .. } once metadata is known.
//!         todo!()
//!     }
//!     // ...
//! }
//! ```

pub mod error;
pub mod playback;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use playback::{DeviceEvent, LoadRequest, LoadToken, MediaDevice, MediaSource};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
