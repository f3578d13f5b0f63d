//! # Library Management Module
//!
//! Owns the audio library: collections, their ordered items, the ungrouped
//! set, and the persisted session settings.
//!
//! ## Overview
//!
//! This module provides:
//! - Domain models ([`Collection`], [`Item`], [`Context`], [`SessionSettings`])
//! - The in-memory [`LibraryModel`] the engine mutates
//! - The [`LibraryStore`] contract and two implementations
//! - SQLite pool creation and schema migrations

pub mod adapters;
pub mod db;
pub mod error;
pub mod library;
pub mod models;
pub mod store;

pub use adapters::{MemoryLibraryStore, SqliteLibraryStore};
pub use error::{LibraryError, Result};
pub use library::{AddItemsOutcome, LibraryModel, UploadPlan};
pub use models::{
    Collection, CollectionId, Context, DedupKey, Item, ItemId, ItemUpload, NewItem, PayloadRef,
    SessionSettings,
};
pub use store::LibraryStore;
