//! # Playback Session Module
//!
//! State machine for the single active playback session and the lifecycle of
//! the payload backing it.
//!
//! ## Overview
//!
//! This module handles:
//! - Selection, transport and volume state ([`PlaybackSession`])
//! - Load tokens that discard stale device events
//! - Payload handles with at most one outstanding at a time ([`ResourceManager`])
//!
//! Neither type talks to the media device directly; the engine in
//! `core-service` drives the device and reports outcomes back here.

pub mod error;
pub mod resources;
pub mod session;

pub use error::{PlaybackError, Result};
pub use resources::{HandleId, PayloadHandle, ResourceManager};
pub use session::{EndOfItem, LoadTicket, PlaybackSession, SessionSnapshot, SessionState};
