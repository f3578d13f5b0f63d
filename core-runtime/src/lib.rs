//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the playback core:
//! - Logging and tracing setup
//! - Configuration loading and validation
//! - Event bus for library, playback and notification events
//!
//! ## Overview
//!
//! Every other core crate emits `tracing` events and publishes
//! [`CoreEvent`](events::CoreEvent)s; this crate owns how those are
//! configured and delivered.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, StoreBackend};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, Notification, NotificationKind};
