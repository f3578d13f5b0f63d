//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `audioshelf-workspace`
//! with the default `service` feature and reach the engine through
//! [`core_service`] without wiring each crate individually.

#[cfg(feature = "service")]
pub use core_service;
