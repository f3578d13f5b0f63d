//! # Event Bus System
//!
//! Typed event broadcasting for the playback core, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The engine publishes three families of events:
//! - **Library events**: collections and items created, updated or removed
//! - **Playback events**: session transitions and position changes
//! - **Notifications**: non-fatal, user-facing messages (storage failures,
//!   missing payloads, skipped duplicates, end of collection)
//!
//! Presentation layers subscribe and re-render from the engine's projections;
//! they never mutate engine state through the bus.
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐    subscribe    ┌────────────┐
//! │ PlayerService├──────────────>│ EventBus  ├────────────────>│ Host UI    │
//! └──────────────┘               │ (broadcast│                 └────────────┘
//!                                │  channel) ├────────────────>┌────────────┐
//!                                └───────────┘                 │ Test probe │
//!                                                              └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, Notification, NotificationKind};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Notification(Notification::new(
//!     NotificationKind::EndOfCollection,
//!     "Playback ended",
//! )))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Notification");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell `n` events behind. Non-fatal.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns `Err`; the engine ignores that case.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Library-related events
    Library(LibraryEvent),
    /// Playback session events
    Playback(PlaybackEvent),
    /// Non-fatal user-facing notifications
    Notification(Notification),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Library(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Notification(_) => "Notification",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Notification(n) => n.kind.severity(),
            CoreEvent::Playback(PlaybackEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::Ready { .. })
            | CoreEvent::Library(LibraryEvent::ItemsAdded { .. })
            | CoreEvent::Library(LibraryEvent::CollectionDeleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Library Events
// ============================================================================

/// Events related to collections and items.
///
/// `context` fields carry either a collection id or the literal `"ungrouped"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    CollectionCreated {
        collection_id: String,
        title: String,
    },
    CollectionUpdated {
        collection_id: String,
        title: String,
    },
    CollectionDeleted {
        collection_id: String,
    },
    ItemsAdded {
        context: String,
        inserted: usize,
        skipped: usize,
    },
    ItemDeleted {
        context: String,
        item_id: String,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::CollectionCreated { .. } => "Collection created",
            LibraryEvent::CollectionUpdated { .. } => "Collection updated",
            LibraryEvent::CollectionDeleted { .. } => "Collection deleted",
            LibraryEvent::ItemsAdded { .. } => "Items added",
            LibraryEvent::ItemDeleted { .. } => "Item deleted",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events describing playback session transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A load was issued for an item.
    Loading {
        item_id: String,
        index: usize,
    },
    /// The device reported the item ready.
    Ready {
        item_id: String,
        /// Start position (milliseconds).
        position_ms: u64,
        /// Media duration when known (milliseconds).
        duration_ms: Option<u64>,
    },
    Started {
        item_id: String,
    },
    Paused {
        item_id: String,
        position_ms: u64,
    },
    /// Seek or natural progression.
    PositionChanged {
        item_id: String,
        position_ms: u64,
    },
    /// The item played to its end.
    ItemEnded {
        item_id: String,
    },
    /// The session returned to the empty state.
    Cleared,
    /// Loading or rendering failed.
    Failed {
        item_id: Option<String>,
        message: String,
    },
    VolumeChanged {
        /// Volume in percent (0..=100).
        volume_percent: u8,
        muted: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Loading { .. } => "Item loading",
            PlaybackEvent::Ready { .. } => "Item ready",
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::PositionChanged { .. } => "Playback position changed",
            PlaybackEvent::ItemEnded { .. } => "Item ended",
            PlaybackEvent::Cleared => "Session cleared",
            PlaybackEvent::Failed { .. } => "Playback failed",
            PlaybackEvent::VolumeChanged { .. } => "Volume changed",
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Category of a user-facing notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationKind {
    /// A store read or write failed; in-memory state was kept.
    StorageUnavailable,
    /// An item's payload could not be resolved.
    PayloadMissing,
    /// An upload batch contained items already present.
    DuplicateUpload { skipped: usize },
    /// The last item of the active context finished.
    EndOfCollection,
    /// The device failed to load or play an item.
    PlaybackFailed,
    /// The request referred to something that does not exist or is not ready.
    InvalidRequest,
}

impl NotificationKind {
    pub fn severity(&self) -> EventSeverity {
        match self {
            NotificationKind::StorageUnavailable | NotificationKind::PlaybackFailed => {
                EventSeverity::Error
            }
            NotificationKind::PayloadMissing | NotificationKind::InvalidRequest => {
                EventSeverity::Warning
            }
            NotificationKind::DuplicateUpload { .. } | NotificationKind::EndOfCollection => {
                EventSeverity::Info
            }
        }
    }
}

/// Non-fatal message surfaced to the user (a toast in most hosts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every `subscribe()` call creates an
/// independent receiver that sees all future events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let notifications = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Notification(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`/`try_recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drains every buffered event that passes the filter.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
