//! # Session Synchronization Module
//!
//! Mirrors the playback session into persistent storage and restores it on
//! the next start.
//!
//! ## Overview
//!
//! This module handles:
//! - Rehydrating the library and a consistent restore point at startup
//! - Debounced position flushes with immediate flushes on item switch, pause,
//!   seek and teardown
//! - Immediate persistence of selection changes and collection resume hints

pub mod error;
pub mod synchronizer;

pub use error::{Result, SyncError};
pub use synchronizer::{validate_settings, FlushReason, Rehydrated, RestorePoint, Synchronizer};
