//! # Playback Session
//!
//! The single active playback session as a pure state machine.
//!
//! ## Overview
//!
//! ```text
//!            select                ready(token)             play
//!  Empty ───────────> Loading ───────────────> ReadyPaused <────> ReadyPlaying
//!    ^                   │                          ^      pause        │
//!    │   fail / timeout  │                          │                   │
//!    └───────────────────┘                          └── end of last ────┘
//! ```
//!
//! The session performs no I/O. The engine asks it what to do, performs the
//! device and store calls, and reports the outcome back. Every load is tagged
//! with a [`LoadToken`]; only events carrying the token of the newest load are
//! honoured, so a fast `select(i); select(j)` always settles on `j`.

use bridge_traits::playback::LoadToken;
use core_library::models::{sanitize_position, Context, Item, ItemId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing selected, or the last load failed.
    Empty,
    /// A load was issued and the device has not reported ready yet.
    Loading,
    ReadyPaused,
    ReadyPlaying,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::ReadyPaused | SessionState::ReadyPlaying)
    }
}

/// Load handed to the engine by [`PlaybackSession::begin_load`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadTicket {
    pub token: LoadToken,
    /// Resume position for the new item.
    pub start_position: f64,
}

/// Outcome of the device reporting that the current item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfItem {
    /// Another item follows in the active context.
    Advance { next_index: usize },
    /// The last item finished; the session now rests at position 0.
    EndOfContext,
}

/// Point-in-time view used for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub context: Option<Context>,
    pub index: Option<usize>,
    pub item_id: Option<ItemId>,
    pub position_seconds: f64,
}

#[derive(Debug, Clone)]
struct PendingLoad {
    token: LoadToken,
    autoplay: bool,
    started_at_ms: i64,
}

/// Position carried over from persisted settings for one item.
#[derive(Debug, Clone, Copy)]
struct RestoredPosition {
    item_id: ItemId,
    position_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct PlaybackSession {
    state: SessionState,
    context: Option<Context>,
    index: Option<usize>,
    item_id: Option<ItemId>,
    position_seconds: f64,
    duration_seconds: Option<f64>,
    volume: f32,
    muted: bool,
    current_token: Option<LoadToken>,
    last_token: LoadToken,
    pending: Option<PendingLoad>,
    restored: Option<RestoredPosition>,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PlaybackSession {
    pub fn new(volume: f32) -> Self {
        Self {
            state: SessionState::Empty,
            context: None,
            index: None,
            item_id: None,
            position_seconds: 0.0,
            duration_seconds: None,
            volume: clamp_volume(volume),
            muted: false,
            current_token: None,
            last_token: LoadToken::new(0),
            pending: None,
            restored: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> Option<Context> {
        self.context
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn item_id(&self) -> Option<ItemId> {
        self.item_id
    }

    pub fn position(&self) -> f64 {
        self.position_seconds
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration_seconds
    }

    /// Token of the newest load, pending or completed.
    pub fn current_token(&self) -> Option<LoadToken> {
        self.current_token
    }

    /// Playing, or loading with auto-play requested.
    pub fn is_playing(&self) -> bool {
        match self.state {
            SessionState::ReadyPlaying => true,
            SessionState::Loading => self.pending.as_ref().is_some_and(|p| p.autoplay),
            _ => false,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Volume the device should apply.
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    /// Progress through the current item in percent, when the duration is known.
    pub fn progress_percent(&self) -> Option<f64> {
        self.duration_seconds
            .filter(|d| *d > 0.0)
            .map(|d| (self.position_seconds / d * 100.0).clamp(0.0, 100.0))
    }

    pub fn has_next(&self, context_len: usize) -> bool {
        self.index.is_some_and(|i| i + 1 < context_len)
    }

    pub fn has_previous(&self) -> bool {
        self.index.is_some_and(|i| i > 0)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            context: self.context,
            index: self.index,
            item_id: self.item_id,
            position_seconds: self.position_seconds,
        }
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Seed the session from persisted settings without loading anything.
    ///
    /// `restored_position` applies only to `item_id` and only if that item has
    /// no position of its own when it is loaded.
    pub fn restore(
        &mut self,
        context: Option<Context>,
        index: Option<usize>,
        item: Option<(ItemId, f64)>,
    ) {
        self.state = SessionState::Empty;
        self.context = context;
        self.index = index;
        self.item_id = item.map(|(id, _)| id);
        self.position_seconds = 0.0;
        self.duration_seconds = None;
        self.pending = None;
        self.current_token = None;
        self.restored = item.map(|(item_id, position)| RestoredPosition {
            item_id,
            position_seconds: sanitize_position(position),
        });
    }

    /// Point the session at a context with nothing selected.
    pub fn set_context(&mut self, context: Context) {
        self.clear_item();
        self.context = Some(context);
    }

    /// Start loading `item` at `index` of `context`. Any earlier load is superseded.
    pub fn begin_load(
        &mut self,
        context: Context,
        index: usize,
        item: &Item,
        autoplay: bool,
        now_ms: i64,
    ) -> LoadTicket {
        let start_position = self.resume_position(item);
        self.last_token = self.last_token.next();
        let token = self.last_token;

        self.state = SessionState::Loading;
        self.context = Some(context);
        self.index = Some(index);
        self.item_id = Some(item.id);
        self.position_seconds = start_position;
        self.duration_seconds = None;
        self.current_token = Some(token);
        self.pending = Some(PendingLoad {
            token,
            autoplay,
            started_at_ms: now_ms,
        });
        self.restored = None;

        debug!(%token, index, item_id = %item.id, start_position, autoplay, "Load issued");
        LoadTicket {
            token,
            start_position,
        }
    }

    /// Item-level position, then the restored session position for the same
    /// item, then zero.
    fn resume_position(&self, item: &Item) -> f64 {
        let own = sanitize_position(item.position_seconds);
        if own > 0.0 {
            return own;
        }
        match self.restored {
            Some(restored) if restored.item_id == item.id => restored.position_seconds,
            _ => 0.0,
        }
    }

    /// The device reported ready. Returns whether auto-play was requested,
    /// or `None` for a stale token.
    pub fn accept_ready(&mut self, token: LoadToken, duration_seconds: Option<f64>) -> Option<bool> {
        let pending = self.pending.as_ref().filter(|p| p.token == token)?;
        let autoplay = pending.autoplay;
        self.pending = None;
        self.state = SessionState::ReadyPaused;
        self.duration_seconds = duration_seconds.filter(|d| d.is_finite() && *d >= 0.0);
        Some(autoplay)
    }

    /// The load for `token` failed. Returns `false` for a stale token.
    pub fn fail_load(&mut self, token: LoadToken) -> bool {
        if self.current_token != Some(token) {
            return false;
        }
        self.clear_item();
        true
    }

    /// Token of a pending load older than `timeout_ms`, if any.
    pub fn timed_out_load(&self, now_ms: i64, timeout_ms: i64) -> Option<LoadToken> {
        self.pending
            .as_ref()
            .filter(|p| now_ms.saturating_sub(p.started_at_ms) >= timeout_ms)
            .map(|p| p.token)
    }

    /// Drop the current item, keeping the context.
    pub fn clear_item(&mut self) {
        self.state = SessionState::Empty;
        self.index = None;
        self.item_id = None;
        self.position_seconds = 0.0;
        self.duration_seconds = None;
        self.current_token = None;
        self.pending = None;
        self.restored = None;
    }

    /// Back to a blank session. Volume and mute survive.
    pub fn reset(&mut self) {
        self.clear_item();
        self.context = None;
    }

    /// Adjust the active index after an item at `removed_index` left the active context.
    pub fn item_removed_before(&mut self, removed_index: usize) {
        if let Some(idx) = self.index {
            if removed_index < idx {
                self.index = Some(idx - 1);
            }
        }
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Mark playing. From `Loading` this requests auto-play instead.
    /// Returns `false` when nothing changed.
    pub fn set_playing(&mut self) -> bool {
        match self.state {
            SessionState::ReadyPaused => {
                self.state = SessionState::ReadyPlaying;
                true
            }
            SessionState::Loading => match self.pending.as_mut() {
                Some(pending) if !pending.autoplay => {
                    pending.autoplay = true;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Mark paused. From `Loading` this cancels auto-play. Idempotent.
    pub fn set_paused(&mut self) -> bool {
        match self.state {
            SessionState::ReadyPlaying => {
                self.state = SessionState::ReadyPaused;
                true
            }
            SessionState::Loading => match self.pending.as_mut() {
                Some(pending) if pending.autoplay => {
                    pending.autoplay = false;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Absolute seek target, or `None` when no item is ready.
    ///
    /// Clamped to `[0, duration]` when the duration is known, `[0, ∞)` otherwise.
    pub fn seek_to(&mut self, seconds: f64) -> Option<f64> {
        if !self.state.is_ready() || !seconds.is_finite() {
            return None;
        }
        let mut target = seconds.max(0.0);
        if let Some(duration) = self.duration_seconds {
            target = target.min(duration);
        }
        self.position_seconds = target;
        Some(target)
    }

    /// Relative seek; see [`seek_to`](Self::seek_to).
    pub fn seek_by(&mut self, delta_seconds: f64) -> Option<f64> {
        self.seek_to(self.position_seconds + delta_seconds)
    }

    /// Record a transport time update. Returns `false` for stale tokens or
    /// when no item is ready.
    pub fn update_position(&mut self, token: LoadToken, seconds: f64) -> bool {
        if self.current_token != Some(token) || !self.state.is_ready() {
            return false;
        }
        self.position_seconds = sanitize_position(seconds);
        true
    }

    /// The device reported the end of the current item.
    ///
    /// Returns `None` for stale tokens. At the last item the session pauses
    /// at position 0 of the same item; it never wraps.
    pub fn end_of_item(&mut self, token: LoadToken, context_len: usize) -> Option<EndOfItem> {
        if self.current_token != Some(token) || !self.state.is_ready() {
            return None;
        }
        let index = self.index?;
        if index + 1 < context_len {
            return Some(EndOfItem::Advance {
                next_index: index + 1,
            });
        }
        self.state = SessionState::ReadyPaused;
        self.position_seconds = 0.0;
        Some(EndOfItem::EndOfContext)
    }

    // =========================================================================
    // Volume
    // =========================================================================

    /// Set the volume, clamped to `[0, 1]`. A non-zero volume unmutes.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        if volume > 0.0 {
            self.volume = volume;
            self.muted = false;
        } else {
            self.muted = true;
        }
        self.effective_volume()
    }

    /// Toggle between silent and the last audible volume.
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        if !self.muted && self.volume <= 0.0 {
            self.volume = 1.0;
        }
        self.muted
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        1.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::models::PayloadRef;

    fn item(position: f64) -> Item {
        let mut item = Item::new("chapter.mp3", 10, PayloadRef::Embedded);
        item.position_seconds = position;
        item
    }

    #[test]
    fn test_begin_load_issues_increasing_tokens() {
        let mut session = PlaybackSession::default();
        let a = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        let b = session.begin_load(Context::Ungrouped, 1, &item(0.0), false, 0);
        assert!(b.token > a.token);
        assert_eq!(session.current_token(), Some(b.token));
        assert_eq!(session.state(), SessionState::Loading);
    }

    #[test]
    fn test_stale_ready_is_ignored() {
        let mut session = PlaybackSession::default();
        let first = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        let second = session.begin_load(Context::Ungrouped, 1, &item(0.0), false, 0);

        assert_eq!(session.accept_ready(first.token, Some(10.0)), None);
        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(session.accept_ready(second.token, Some(10.0)), Some(false));
        assert_eq!(session.state(), SessionState::ReadyPaused);
        assert_eq!(session.index(), Some(1));
    }

    #[test]
    fn test_resume_position_precedence() {
        let mut session = PlaybackSession::default();
        let own = item(42.0);
        let fresh = item(0.0);

        session.restore(Some(Context::Ungrouped), Some(0), Some((fresh.id, 17.0)));
        // Item-level position wins.
        let ticket = session.begin_load(Context::Ungrouped, 0, &own, false, 0);
        assert_eq!(ticket.start_position, 42.0);

        // Restored position only applies to the item it was saved for.
        session.restore(Some(Context::Ungrouped), Some(0), Some((fresh.id, 17.0)));
        let ticket = session.begin_load(Context::Ungrouped, 1, &item(0.0), false, 0);
        assert_eq!(ticket.start_position, 0.0);

        session.restore(Some(Context::Ungrouped), Some(0), Some((fresh.id, 17.0)));
        let ticket = session.begin_load(Context::Ungrouped, 0, &fresh, false, 0);
        assert_eq!(ticket.start_position, 17.0);

        // Consumed by the first load.
        let ticket = session.begin_load(Context::Ungrouped, 0, &fresh, false, 0);
        assert_eq!(ticket.start_position, 0.0);
    }

    #[test]
    fn test_play_while_loading_requests_autoplay() {
        let mut session = PlaybackSession::default();
        let ticket = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        assert!(!session.is_playing());

        assert!(session.set_playing());
        assert!(session.is_playing());
        assert!(!session.set_playing());

        assert!(session.set_paused());
        assert!(!session.is_playing());
        assert_eq!(session.accept_ready(ticket.token, None), Some(false));
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut session = PlaybackSession::default();
        let ticket = session.begin_load(Context::Ungrouped, 0, &item(0.0), true, 0);
        assert_eq!(session.accept_ready(ticket.token, Some(30.0)), Some(true));
        assert!(session.set_playing());

        assert!(session.set_paused());
        let after_once = session.snapshot();
        assert!(!session.set_paused());
        assert_eq!(session.snapshot(), after_once);
        assert_eq!(session.state(), SessionState::ReadyPaused);
    }

    #[test]
    fn test_seek_clamps_and_requires_ready() {
        let mut session = PlaybackSession::default();
        assert_eq!(session.seek_to(5.0), None);

        let ticket = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        assert_eq!(session.seek_to(5.0), None);
        session.accept_ready(ticket.token, Some(100.0));

        assert_eq!(session.seek_by(-10.0), Some(0.0));
        assert_eq!(session.seek_by(30.0), Some(30.0));
        assert_eq!(session.seek_to(500.0), Some(100.0));
        assert_eq!(session.seek_to(f64::NAN), None);
        assert_eq!(session.position(), 100.0);
    }

    #[test]
    fn test_seek_without_duration_is_unbounded_above() {
        let mut session = PlaybackSession::default();
        let ticket = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        session.accept_ready(ticket.token, None);
        assert_eq!(session.seek_to(1e6), Some(1e6));
    }

    #[test]
    fn test_end_of_item_advances_or_rests() {
        let mut session = PlaybackSession::default();
        let ticket = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        session.accept_ready(ticket.token, Some(10.0));
        session.set_playing();
        assert_eq!(
            session.end_of_item(ticket.token, 2),
            Some(EndOfItem::Advance { next_index: 1 })
        );

        let last = session.begin_load(Context::Ungrouped, 1, &item(0.0), true, 0);
        session.accept_ready(last.token, Some(10.0));
        session.set_playing();
        session.update_position(last.token, 9.9);

        assert_eq!(session.end_of_item(ticket.token, 2), None);
        assert_eq!(
            session.end_of_item(last.token, 2),
            Some(EndOfItem::EndOfContext)
        );
        assert_eq!(session.state(), SessionState::ReadyPaused);
        assert_eq!(session.position(), 0.0);
        assert_eq!(session.index(), Some(1));
    }

    #[test]
    fn test_fail_and_timeout() {
        let mut session = PlaybackSession::default();
        let ticket = session.begin_load(Context::Ungrouped, 0, &item(0.0), true, 1_000);

        assert_eq!(session.timed_out_load(5_000, 10_000), None);
        assert_eq!(session.timed_out_load(11_000, 10_000), Some(ticket.token));

        assert!(!session.fail_load(LoadToken::new(999)));
        assert!(session.fail_load(ticket.token));
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(session.context(), Some(Context::Ungrouped));
        assert_eq!(session.index(), None);
        assert!(!session.is_playing());
    }

    #[test]
    fn test_stale_time_updates_are_ignored() {
        let mut session = PlaybackSession::default();
        let old = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        session.accept_ready(old.token, None);
        let new = session.begin_load(Context::Ungrouped, 1, &item(0.0), false, 0);

        assert!(!session.update_position(old.token, 50.0));
        assert!(!session.update_position(new.token, 50.0));
        session.accept_ready(new.token, None);
        assert!(session.update_position(new.token, 50.0));
        assert_eq!(session.position(), 50.0);
    }

    #[test]
    fn test_volume_and_mute() {
        let mut session = PlaybackSession::new(0.8);
        assert_eq!(session.set_volume(1.7), 1.0);
        assert_eq!(session.set_volume(0.4), 0.4);

        assert!(session.toggle_mute());
        assert_eq!(session.effective_volume(), 0.0);
        assert!(!session.toggle_mute());
        assert_eq!(session.effective_volume(), 0.4);

        assert_eq!(session.set_volume(0.0), 0.0);
        assert!(session.is_muted());
        assert_eq!(session.volume(), 0.4);
        assert!(!session.toggle_mute());
        assert_eq!(session.effective_volume(), 0.4);
    }

    #[test]
    fn test_neighbours_and_removal_shift() {
        let mut session = PlaybackSession::default();
        session.begin_load(Context::Ungrouped, 2, &item(0.0), false, 0);
        assert!(session.has_previous());
        assert!(session.has_next(4));
        assert!(!session.has_next(3));

        session.item_removed_before(0);
        assert_eq!(session.index(), Some(1));
        session.item_removed_before(5);
        assert_eq!(session.index(), Some(1));
    }

    #[test]
    fn test_progress_percent() {
        let mut session = PlaybackSession::default();
        assert_eq!(session.progress_percent(), None);
        let ticket = session.begin_load(Context::Ungrouped, 0, &item(0.0), false, 0);
        session.accept_ready(ticket.token, Some(200.0));
        session.seek_to(50.0);
        assert_eq!(session.progress_percent(), Some(25.0));
    }

    #[test]
    fn test_reset_keeps_volume() {
        let mut session = PlaybackSession::new(0.3);
        session.begin_load(Context::Ungrouped, 0, &item(0.0), true, 0);
        session.reset();
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(session.context(), None);
        assert_eq!(session.volume(), 0.3);
        assert_eq!(
            session.snapshot(),
            SessionSnapshot {
                context: None,
                index: None,
                item_id: None,
                position_seconds: 0.0,
            }
        );
    }
}
