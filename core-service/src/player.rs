//! # Player Service
//!
//! The engine that owns the library, the playback session and the
//! synchronizer, and drives the media device.
//!
//! ## Overview
//!
//! `PlayerService` is a single logical task. Every intent takes `&mut self`,
//! so state changes never interleave; store calls and device commands are
//! the only suspension points. Device events arrive over an unbounded
//! channel and are matched against the current load token, so events from
//! superseded loads are dropped.
//!
//! Failures never escape as panics. Store and device errors are logged,
//! published as [`Notification`]s on the [`EventBus`], and returned to the
//! caller; in-memory state is left as it was before the failed operation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (device, device_events) = MyDevice::new();
//! let deps = ServiceDependencies::new(store, Arc::new(device))
//!     .with_device_events(device_events);
//! let mut player = PlayerService::start(CoreConfig::default(), deps).await?;
//!
//! player.select_item(Context::Ungrouped, 0).await?;
//! player.play().await?;
//!
//! // or hand the service to its command loop
//! let (commands, rx) = tokio::sync::mpsc::channel(32);
//! tokio::spawn(player.run(rx));
//! commands.send(Command::SkipForward).await?;
//! ```

use crate::error::{Result, ServiceError};
use crate::views::{LibraryView, SessionView, UploadReport};
use bridge_traits::error::BridgeError;
use bridge_traits::playback::{DeviceEvent, LoadRequest, LoadToken, MediaDevice};
use bridge_traits::time::{Clock, SystemClock};
use core_library::models::{sanitize_position, Collection, CollectionId, Context, Item, ItemId, NewItem};
use core_library::store::LibraryStore;
use core_library::{LibraryError, LibraryModel};
use core_playback::{EndOfItem, PlaybackError, PlaybackSession, ResourceManager, SessionSnapshot, SessionState};
use core_runtime::events::{LibraryEvent, PlaybackEvent};
use core_runtime::{CoreConfig, CoreEvent, EventBus, Notification, NotificationKind};
use core_sync::{FlushReason, Rehydrated, RestorePoint, Synchronizer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Dependencies
// ============================================================================

/// Collaborators injected into the engine.
pub struct ServiceDependencies {
    pub store: Arc<dyn LibraryStore>,
    pub device: Arc<dyn MediaDevice>,
    pub device_events: Option<mpsc::UnboundedReceiver<DeviceEvent>>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

impl ServiceDependencies {
    pub fn new(store: Arc<dyn LibraryStore>, device: Arc<dyn MediaDevice>) -> Self {
        Self {
            store,
            device,
            device_events: None,
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
        }
    }

    pub fn with_device_events(mut self, receiver: mpsc::UnboundedReceiver<DeviceEvent>) -> Self {
        self.device_events = Some(receiver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a bus the host already subscribed to, so start-up notifications are seen.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Host intents accepted by [`PlayerService::run`].
#[derive(Debug)]
pub enum Command {
    SelectItem { context: Context, index: usize },
    SelectItemById(ItemId),
    Play,
    Pause,
    TogglePlay,
    Seek(f64),
    SeekAbsolute(f64),
    SkipForward,
    SkipBackward,
    Next,
    Previous,
    SwitchContext(Context),
    CreateCollection {
        title: String,
        cover_ref: Option<String>,
    },
    UpdateCollection {
        id: CollectionId,
        title: String,
        cover_ref: Option<String>,
    },
    DeleteCollection(CollectionId),
    UploadItems {
        context: Context,
        items: Vec<NewItem>,
    },
    DeleteItem(ItemId),
    SetVolume(f32),
    ToggleMute,
    /// Flush and stop the loop.
    Shutdown,
}

// ============================================================================
// Player Service
// ============================================================================

pub struct PlayerService {
    config: CoreConfig,
    library: LibraryModel,
    session: PlaybackSession,
    resources: ResourceManager,
    sync: Synchronizer,
    store: Arc<dyn LibraryStore>,
    device: Arc<dyn MediaDevice>,
    device_events: Option<mpsc::UnboundedReceiver<DeviceEvent>>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl PlayerService {
    /// Rehydrate from the store and prepare the restored item without playing it.
    ///
    /// An unreadable store is not fatal: the engine starts with an empty
    /// library and publishes a `StorageUnavailable` notification.
    ///
    /// # Errors
    /// Only when `config` is invalid.
    #[instrument(skip_all)]
    pub async fn start(config: CoreConfig, deps: ServiceDependencies) -> Result<Self> {
        config.validate()?;

        let ServiceDependencies {
            store,
            device,
            device_events,
            clock,
            events,
        } = deps;

        let mut sync = Synchronizer::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.position_flush_interval(),
        );
        let (library, restore) = match sync.rehydrate().await {
            Ok(Rehydrated { library, restore }) => (library, restore),
            Err(e) => {
                let err = ServiceError::from(e);
                warn!(error = %err, "Rehydration failed, starting with an empty library");
                let _ = events.emit(CoreEvent::Notification(Notification::from(&err)));
                (LibraryModel::new(), RestorePoint::default())
            }
        };

        let mut session = PlaybackSession::new(config.default_volume);
        session.restore(restore.context, restore.index, restore.item);

        let mut service = Self {
            resources: ResourceManager::new(Arc::clone(&store)),
            config,
            library,
            session,
            sync,
            store,
            device,
            device_events,
            events,
            clock,
        };

        if let Err(e) = service.apply_volume().await {
            debug!(error = %e, "Initial volume not applied");
        }

        if let (Some(context), Some(index)) = (restore.context, restore.index) {
            if let Err(e) = service.load_index(context, index, false).await {
                debug!(error = %e, "Restored item could not be prepared");
            }
        }

        info!(
            collections = service.library.collections().len(),
            ungrouped = service.library.ungrouped().len(),
            state = ?service.session.state(),
            "Player service started"
        );
        Ok(service)
    }

    // ========================================================================
    // Projections
    // ========================================================================

    pub fn session_view(&self) -> SessionView {
        let context = self.session.context();
        let active_item = match (context, self.session.index()) {
            (Some(context), Some(index)) => self.library.item_at(&context, index).cloned(),
            _ => None,
        };
        let context_len = context.map_or(0, |c| self.library.len(&c));

        SessionView {
            active_item,
            context,
            active_index: self.session.index(),
            state: self.session.state(),
            is_playing: self.session.is_playing(),
            position_seconds: self.session.position(),
            duration_seconds: self.session.duration(),
            progress_percent: self.session.progress_percent(),
            has_next: self.session.has_next(context_len),
            has_previous: self.session.has_previous(),
            volume: self.session.volume(),
            muted: self.session.is_muted(),
        }
    }

    pub fn library_view(&self) -> LibraryView {
        LibraryView::build(&self.library, self.session.context(), None)
    }

    /// Library listing filtered by a case-insensitive title substring.
    pub fn search_collections(&self, query: &str) -> LibraryView {
        LibraryView::build(&self.library, self.session.context(), Some(query))
    }

    pub fn library(&self) -> &LibraryModel {
        &self.library
    }

    pub fn collections(&self) -> &[Collection] {
        self.library.collections()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Payload handles currently held for the device.
    pub fn outstanding_payloads(&self) -> usize {
        self.resources.outstanding()
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Select an item without starting playback.
    pub async fn select_item(&mut self, context: Context, index: usize) -> Result<()> {
        self.select(context, index, false).await
    }

    /// Select an item by id, resolving which context it lives in.
    pub async fn select_item_by_id(&mut self, item_id: ItemId) -> Result<()> {
        let Some((context, index)) = self.library.find_item(item_id) else {
            return Err(self.report(PlaybackError::ItemNotFound(item_id.to_string()).into()));
        };
        self.select(context, index, false).await
    }

    /// Make `context` active. Selects its resume hint, else its first item,
    /// else leaves the session empty in that context.
    #[instrument(skip(self, context), fields(context = %context))]
    pub async fn switch_context(&mut self, context: Context) -> Result<()> {
        let target = match context {
            Context::Collection(id) => match self.library.collection(id) {
                Some(collection) => collection.resume_index(),
                None => {
                    return Err(self.report(PlaybackError::UnknownContext(context.to_string()).into()));
                }
            },
            Context::Ungrouped => (!self.library.ungrouped().is_empty()).then_some(0),
        };

        match target {
            Some(index) => self.select(context, index, false).await,
            None => {
                if self.session.item_id().is_some() {
                    self.flush_position(FlushReason::ItemSwitch).await;
                }
                self.unload_current().await;
                self.session.set_context(context);
                self.emit_playback(PlaybackEvent::Cleared);
                self.persist_selection().await;
                Ok(())
            }
        }
    }

    pub async fn advance_to_next(&mut self) -> Result<()> {
        let (Some(context), Some(index)) = (self.session.context(), self.session.index()) else {
            return Ok(());
        };
        if !self.session.has_next(self.library.len(&context)) {
            debug!(index, "Already at the last item");
            return Ok(());
        }
        self.select(context, index + 1, true).await
    }

    pub async fn advance_to_previous(&mut self) -> Result<()> {
        let (Some(context), Some(index)) = (self.session.context(), self.session.index()) else {
            return Ok(());
        };
        if !self.session.has_previous() {
            debug!(index, "Already at the first item");
            return Ok(());
        }
        self.select(context, index - 1, true).await
    }

    async fn select(&mut self, context: Context, index: usize, autoplay: bool) -> Result<()> {
        if !self.library.contains_context(&context) {
            return Err(self.report(PlaybackError::UnknownContext(context.to_string()).into()));
        }
        let len = self.library.len(&context);
        if index >= len {
            return Err(self.report(PlaybackError::InvalidIndex { index, len }.into()));
        }

        if self.session.item_id().is_some() {
            self.flush_position(FlushReason::ItemSwitch).await;
        }

        self.load_index(context, index, autoplay).await?;

        if let Some(id) = context.collection_id() {
            self.library.set_last_played_index(id, Some(index));
        }
        self.persist_selection().await;
        Ok(())
    }

    /// Issue a load for `index` of `context`. On failure the session is left
    /// empty and the error has already been reported.
    #[instrument(skip(self, context), fields(context = %context))]
    async fn load_index(&mut self, context: Context, index: usize, autoplay: bool) -> Result<()> {
        let item = match self.library.item_at(&context, index) {
            Some(item) => item.clone(),
            None => {
                let len = self.library.len(&context);
                return Err(self.report(PlaybackError::InvalidIndex { index, len }.into()));
            }
        };

        let ticket = self
            .session
            .begin_load(context, index, &item, autoplay, self.clock.unix_timestamp_millis());
        self.emit_playback(PlaybackEvent::Loading {
            item_id: item.id.to_string(),
            index,
        });

        let handle = match self.resources.acquire(item.id).await {
            Ok(handle) => handle,
            Err(e) => {
                self.abort_load(ticket.token, &e.to_string()).await;
                return Err(self.report(e.into()));
            }
        };

        let request = LoadRequest::new(ticket.token, handle.source)
            .with_start_position(ticket.start_position)
            .with_title(item.name.clone());
        if let Err(e) = self.device.load(request).await {
            self.abort_load(ticket.token, &e.to_string()).await;
            return Err(self.report(PlaybackError::from(e).into()));
        }

        debug!(token = %ticket.token, item_id = %item.id, "Load handed to device");
        Ok(())
    }

    /// Return to `Empty` after a failed load for `token`, releasing the payload.
    async fn abort_load(&mut self, token: LoadToken, message: &str) {
        let item_id = self.session.item_id();
        if !self.session.fail_load(token) {
            return;
        }
        self.unload_current().await;
        self.emit_playback(PlaybackEvent::Failed {
            item_id: item_id.map(|id| id.to_string()),
            message: message.to_string(),
        });
        self.emit_playback(PlaybackEvent::Cleared);
    }

    async fn unload_current(&mut self) {
        self.resources.release_all();
        if let Err(e) = self.device.unload().await {
            warn!(error = %e, "Device unload failed");
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start playback. From an empty session this selects the first item of
    /// the active context (ungrouped by default).
    pub async fn play(&mut self) -> Result<()> {
        match self.session.state() {
            SessionState::Empty => {
                let context = self.session.context().unwrap_or(Context::Ungrouped);
                if self.library.len(&context) == 0 {
                    debug!(context = %context, "Nothing to play");
                    return Ok(());
                }
                self.select(context, 0, true).await
            }
            SessionState::Loading => {
                self.session.set_playing();
                Ok(())
            }
            SessionState::ReadyPaused => self.start_device().await,
            SessionState::ReadyPlaying => Ok(()),
        }
    }

    /// Pause playback. Pausing a paused session does nothing.
    pub async fn pause(&mut self) -> Result<()> {
        match self.session.state() {
            SessionState::ReadyPlaying => {
                if let Err(e) = self.device.pause().await {
                    return Err(self.report(PlaybackError::from(e).into()));
                }
                self.session.set_paused();
                if let (Some(token), Ok(position)) =
                    (self.session.current_token(), self.device.current_time().await)
                {
                    self.session.update_position(token, position);
                }
                if let Some(item_id) = self.session.item_id() {
                    self.emit_playback(PlaybackEvent::Paused {
                        item_id: item_id.to_string(),
                        position_ms: to_millis(self.session.position()),
                    });
                }
                self.flush_position(FlushReason::Pause).await;
                Ok(())
            }
            SessionState::Loading => {
                self.session.set_paused();
                Ok(())
            }
            SessionState::Empty | SessionState::ReadyPaused => Ok(()),
        }
    }

    pub async fn toggle_play(&mut self) -> Result<()> {
        if self.session.is_playing() {
            self.pause().await
        } else {
            self.play().await
        }
    }

    /// Seek relative to the current position. Ignored unless an item is ready.
    pub async fn seek(&mut self, delta_seconds: f64) -> Result<()> {
        let target = self.session.seek_by(delta_seconds);
        self.apply_seek(target).await
    }

    pub async fn seek_absolute(&mut self, seconds: f64) -> Result<()> {
        let target = self.session.seek_to(seconds);
        self.apply_seek(target).await
    }

    pub async fn skip_forward(&mut self) -> Result<()> {
        self.seek(self.config.skip_forward_secs).await
    }

    pub async fn skip_backward(&mut self) -> Result<()> {
        self.seek(-self.config.skip_backward_secs).await
    }

    async fn apply_seek(&mut self, target: Option<f64>) -> Result<()> {
        let Some(target) = target else {
            debug!(state = ?self.session.state(), "Seek ignored, no item is ready");
            return Ok(());
        };
        if let Err(e) = self.device.seek(target).await {
            return Err(self.report(PlaybackError::from(e).into()));
        }
        if let Some(item_id) = self.session.item_id() {
            self.emit_playback(PlaybackEvent::PositionChanged {
                item_id: item_id.to_string(),
                position_ms: to_millis(target),
            });
        }
        self.flush_position(FlushReason::Seek).await;
        Ok(())
    }

    async fn start_device(&mut self) -> Result<()> {
        if let Err(e) = self.device.play().await {
            return Err(self.report(PlaybackError::from(e).into()));
        }
        if self.session.set_playing() {
            if let Some(item_id) = self.session.item_id() {
                self.emit_playback(PlaybackEvent::Started {
                    item_id: item_id.to_string(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Volume
    // ========================================================================

    pub async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.session.set_volume(volume);
        self.apply_volume().await
    }

    pub async fn toggle_mute(&mut self) -> Result<()> {
        self.session.toggle_mute();
        self.apply_volume().await
    }

    async fn apply_volume(&mut self) -> Result<()> {
        if let Err(e) = self.device.set_volume(self.session.effective_volume()).await {
            return Err(self.report(PlaybackError::from(e).into()));
        }
        self.emit_playback(PlaybackEvent::VolumeChanged {
            volume_percent: (self.session.volume() * 100.0).round() as u8,
            muted: self.session.is_muted(),
        });
        Ok(())
    }

    // ========================================================================
    // Library
    // ========================================================================

    /// Create an empty collection. Titles need not be unique but may not be blank.
    #[instrument(skip(self))]
    pub async fn create_collection(
        &mut self,
        title: &str,
        cover_ref: Option<String>,
    ) -> Result<CollectionId> {
        let title = validate_title(title).map_err(|e| self.report(e.into()))?;
        let collection = Collection::new(title, cover_ref);
        if let Err(e) = self.store.create_or_replace_collection(&collection).await {
            return Err(self.report(e.into()));
        }

        let id = collection.id;
        let title = collection.title.clone();
        self.library.insert_collection(collection);
        info!(collection_id = %id, "Collection created");
        self.emit(CoreEvent::Library(LibraryEvent::CollectionCreated {
            collection_id: id.to_string(),
            title,
        }));
        Ok(id)
    }

    /// Rename a collection or change its cover. The store row is upserted,
    /// so a row lost from the store is recreated.
    #[instrument(skip(self, id), fields(collection_id = %id))]
    pub async fn update_collection(
        &mut self,
        id: CollectionId,
        title: &str,
        cover_ref: Option<String>,
    ) -> Result<()> {
        let title = validate_title(title).map_err(|e| self.report(e.into()))?;
        let Some(existing) = self.library.collection(id) else {
            return Err(self.report(not_found("Collection", id).into()));
        };
        let metadata = Collection {
            id,
            title: title.clone(),
            cover_ref: cover_ref.clone(),
            items: Vec::new(),
            last_played_index: existing.last_played_index,
        };
        if let Err(e) = self.store.create_or_replace_collection(&metadata).await {
            return Err(self.report(e.into()));
        }

        self.library.rename_or_recover(id, title.clone(), cover_ref);
        self.emit(CoreEvent::Library(LibraryEvent::CollectionUpdated {
            collection_id: id.to_string(),
            title,
        }));
        Ok(())
    }

    /// Delete a collection and its items. Deleting the active collection
    /// empties the session and clears the persisted selection.
    #[instrument(skip(self, id), fields(collection_id = %id))]
    pub async fn delete_collection(&mut self, id: CollectionId) -> Result<()> {
        let existed = match self.store.delete_collection(id).await {
            Ok(existed) => existed,
            Err(e) => return Err(self.report(e.into())),
        };
        let removed = self.library.delete_collection(id);
        if removed.is_none() && !existed {
            debug!("Collection did not exist");
            return Ok(());
        }

        if self.session.context() == Some(Context::Collection(id)) {
            self.unload_current().await;
            self.session.reset();
            self.emit_playback(PlaybackEvent::Cleared);
            self.persist_selection().await;
        }

        info!(items = removed.map_or(0, |c| c.items.len()), "Collection deleted");
        self.emit(CoreEvent::Library(LibraryEvent::CollectionDeleted {
            collection_id: id.to_string(),
        }));
        Ok(())
    }

    /// Append uploads to a context, dropping duplicates by `(name, size)`.
    #[instrument(skip(self, context, uploads), fields(context = %context, submitted = uploads.len()))]
    pub async fn upload_items(&mut self, context: Context, uploads: Vec<NewItem>) -> Result<UploadReport> {
        let plan = match self.library.plan_upload(&context, uploads) {
            Ok(plan) => plan,
            Err(e) => return Err(self.report(e.into())),
        };

        if !plan.accepted.is_empty() {
            if let Err(e) = self.store.insert_items(&context, &plan.accepted).await {
                return Err(self.report(e.into()));
            }
        }

        let skipped = plan.skipped;
        let items: Vec<Item> = plan.accepted.into_iter().map(|u| u.item).collect();
        let inserted: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        if let Err(e) = self.library.append_items(&context, items) {
            return Err(self.report(e.into()));
        }

        info!(inserted = inserted.len(), skipped, "Items uploaded");
        self.emit(CoreEvent::Library(LibraryEvent::ItemsAdded {
            context: context.to_string(),
            inserted: inserted.len(),
            skipped,
        }));
        if skipped > 0 {
            self.notify(Notification::new(
                NotificationKind::DuplicateUpload { skipped },
                format!("Skipped {} duplicate item(s)", skipped),
            ));
        }

        Ok(UploadReport { inserted, skipped })
    }

    /// Delete a single item. The session follows: deleting the active item
    /// empties it, deleting an earlier item shifts the active index.
    #[instrument(skip(self, item_id), fields(item_id = %item_id))]
    pub async fn delete_item(&mut self, item_id: ItemId) -> Result<()> {
        let Some((context, _)) = self.library.find_item(item_id) else {
            return Err(self.report(PlaybackError::ItemNotFound(item_id.to_string()).into()));
        };
        if let Err(e) = self.store.delete_item(item_id).await {
            return Err(self.report(e.into()));
        }
        let hint_before = self.resume_hint(context);
        let Some((removed_index, _)) = self.library.remove_item(&context, item_id) else {
            return Ok(());
        };

        if self.session.context() == Some(context) {
            let selection_changed = match self.session.index() {
                Some(active) if active == removed_index => {
                    self.unload_current().await;
                    self.session.clear_item();
                    self.emit_playback(PlaybackEvent::Cleared);
                    true
                }
                Some(active) if removed_index < active => {
                    self.session.item_removed_before(removed_index);
                    true
                }
                _ => false,
            };
            if selection_changed {
                if let Some(id) = context.collection_id() {
                    self.library.set_last_played_index(id, self.session.index());
                }
                self.persist_selection().await;
            }
        } else if let Some(id) = context.collection_id() {
            if self.resume_hint(context) != hint_before {
                self.persist_resume_hint(id).await;
            }
        }

        self.emit(CoreEvent::Library(LibraryEvent::ItemDeleted {
            context: context.to_string(),
            item_id: item_id.to_string(),
        }));
        Ok(())
    }

    // ========================================================================
    // Device Events & Ticks
    // ========================================================================

    /// Apply a device event. Events for superseded loads are ignored.
    pub async fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Ready {
                token,
                duration_seconds,
            } => {
                let Some(autoplay) = self.session.accept_ready(token, duration_seconds) else {
                    debug!(%token, "Ignoring stale ready event");
                    return;
                };
                if let Some(item_id) = self.session.item_id() {
                    self.emit_playback(PlaybackEvent::Ready {
                        item_id: item_id.to_string(),
                        position_ms: to_millis(self.session.position()),
                        duration_ms: self.session.duration().map(to_millis),
                    });
                }
                if autoplay {
                    if let Err(e) = self.start_device().await {
                        debug!(error = %e, "Auto-play failed");
                    }
                }
            }
            DeviceEvent::TimeUpdate {
                token,
                position_seconds,
            } => {
                if !self.session.update_position(token, position_seconds) {
                    debug!(%token, "Ignoring stale time update");
                    return;
                }
                self.sync.note_position_change();
                if let Some(item_id) = self.session.item_id() {
                    self.emit_playback(PlaybackEvent::PositionChanged {
                        item_id: item_id.to_string(),
                        position_ms: to_millis(self.session.position()),
                    });
                }
                self.maybe_flush().await;
            }
            DeviceEvent::Ended { token } => self.handle_end_of_item(token).await,
            DeviceEvent::Error { token, message } => {
                if self.session.current_token() != Some(token) {
                    debug!(%token, "Ignoring stale device error");
                    return;
                }
                self.abort_load(token, &message).await;
                self.report(PlaybackError::Device(BridgeError::OperationFailed(message)).into());
            }
        }
    }

    async fn handle_end_of_item(&mut self, token: LoadToken) {
        let Some(context) = self.session.context() else {
            return;
        };
        let finished = self.session.item_id();
        let len = self.library.len(&context);

        match self.session.end_of_item(token, len) {
            None => debug!(%token, "Ignoring stale end-of-item"),
            Some(EndOfItem::Advance { next_index }) => {
                self.emit_item_ended(finished);
                if let Err(e) = self.select(context, next_index, true).await {
                    debug!(error = %e, "Advance failed");
                }
            }
            Some(EndOfItem::EndOfContext) => {
                self.emit_item_ended(finished);
                if let Err(e) = self.device.seek(0.0).await {
                    warn!(error = %e, "Device rewind failed");
                }
                if let Some(item_id) = finished {
                    self.emit_playback(PlaybackEvent::Paused {
                        item_id: item_id.to_string(),
                        position_ms: 0,
                    });
                }
                self.notify(Notification::new(
                    NotificationKind::EndOfCollection,
                    "Reached the end of the collection",
                ));
                self.flush_position(FlushReason::Pause).await;
            }
        }
    }

    /// Handle every device event already queued, including events caused by
    /// handling earlier ones. Returns how many were handled.
    pub async fn pump_device_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(Ok(event)) = self.device_events.as_mut().map(|rx| rx.try_recv()) {
            self.handle_device_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Periodic housekeeping: load timeouts and the debounced position flush.
    pub async fn tick(&mut self) {
        let timeout_ms = i64::try_from(self.config.load_timeout_ms).unwrap_or(i64::MAX);
        let now = self.clock.unix_timestamp_millis();
        if let Some(token) = self.session.timed_out_load(now, timeout_ms) {
            warn!(%token, "Load timed out");
            self.abort_load(token, "load timed out").await;
            self.report(PlaybackError::LoadTimedOut(token).into());
        }
        self.maybe_flush().await;
    }

    // ========================================================================
    // Command Loop & Shutdown
    // ========================================================================

    /// Drive the engine until `Shutdown` arrives or the command channel closes,
    /// then flush and release everything.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        let mut device_events = self.device_events.take();
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Player command loop started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(e) = self.dispatch(command).await {
                            debug!(error = %e, "Command failed");
                        }
                    }
                },
                event = next_device_event(&mut device_events) => match event {
                    Some(event) => self.handle_device_event(event).await,
                    None => {
                        debug!("Device event channel closed");
                        device_events = None;
                    }
                },
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.shutdown().await
    }

    /// Apply one host command.
    pub async fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::SelectItem { context, index } => self.select_item(context, index).await,
            Command::SelectItemById(item_id) => self.select_item_by_id(item_id).await,
            Command::Play => self.play().await,
            Command::Pause => self.pause().await,
            Command::TogglePlay => self.toggle_play().await,
            Command::Seek(delta) => self.seek(delta).await,
            Command::SeekAbsolute(seconds) => self.seek_absolute(seconds).await,
            Command::SkipForward => self.skip_forward().await,
            Command::SkipBackward => self.skip_backward().await,
            Command::Next => self.advance_to_next().await,
            Command::Previous => self.advance_to_previous().await,
            Command::SwitchContext(context) => self.switch_context(context).await,
            Command::CreateCollection { title, cover_ref } => {
                self.create_collection(&title, cover_ref).await.map(|_| ())
            }
            Command::UpdateCollection {
                id,
                title,
                cover_ref,
            } => self.update_collection(id, &title, cover_ref).await,
            Command::DeleteCollection(id) => self.delete_collection(id).await,
            Command::UploadItems { context, items } => {
                self.upload_items(context, items).await.map(|_| ())
            }
            Command::DeleteItem(item_id) => self.delete_item(item_id).await,
            Command::SetVolume(volume) => self.set_volume(volume).await,
            Command::ToggleMute => self.toggle_mute().await,
            Command::Shutdown => Ok(()),
        }
    }

    /// Flush the session unconditionally, release the payload and unload the device.
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) -> Result<()> {
        let snapshot = self.session.snapshot();
        self.record_position(&snapshot);
        let flushed = self.sync.shutdown(&snapshot).await;
        self.unload_current().await;

        match flushed {
            Ok(()) => {
                info!("Player service stopped");
                Ok(())
            }
            Err(e) => Err(self.report(e.into())),
        }
    }

    // ========================================================================
    // Persistence Helpers
    // ========================================================================

    fn record_position(&mut self, snapshot: &SessionSnapshot) {
        if let (Some(context), Some(item_id)) = (snapshot.context, snapshot.item_id) {
            self.library
                .update_item_position(&context, item_id, snapshot.position_seconds);
        }
    }

    async fn flush_position(&mut self, reason: FlushReason) {
        let snapshot = self.session.snapshot();
        self.record_position(&snapshot);
        if let Err(e) = self.sync.flush(&snapshot, reason).await {
            self.report(e.into());
        }
    }

    async fn maybe_flush(&mut self) {
        if !self.sync.is_dirty() {
            return;
        }
        let snapshot = self.session.snapshot();
        self.record_position(&snapshot);
        if let Err(e) = self.sync.maybe_flush(&snapshot).await {
            self.report(e.into());
        }
    }

    async fn persist_selection(&mut self) {
        let snapshot = self.session.snapshot();
        let result = {
            let collection = snapshot
                .context
                .and_then(|c| c.collection_id())
                .and_then(|id| self.library.collection(id));
            self.sync.persist_selection(&snapshot, collection).await
        };
        if let Err(e) = result {
            self.report(e.into());
        }
    }

    fn resume_hint(&self, context: Context) -> Option<usize> {
        context
            .collection_id()
            .and_then(|id| self.library.collection(id))
            .and_then(|c| c.last_played_index)
    }

    /// Write an inactive collection's resume hint after its items shifted.
    async fn persist_resume_hint(&mut self, id: CollectionId) {
        let result = match self.library.collection(id) {
            Some(collection) => {
                self.store
                    .update_collection_metadata(
                        id,
                        &collection.title,
                        collection.cover_ref.clone(),
                        collection.last_played_index,
                    )
                    .await
            }
            None => return,
        };
        if let Err(e) = result {
            self.report(e.into());
        }
    }

    // ========================================================================
    // Event Helpers
    // ========================================================================

    fn emit(&self, event: CoreEvent) {
        // No subscribers is not an error.
        let _ = self.events.emit(event);
    }

    fn emit_playback(&self, event: PlaybackEvent) {
        self.emit(CoreEvent::Playback(event));
    }

    fn emit_item_ended(&self, item_id: Option<ItemId>) {
        if let Some(item_id) = item_id {
            self.emit_playback(PlaybackEvent::ItemEnded {
                item_id: item_id.to_string(),
            });
        }
    }

    fn notify(&self, notification: Notification) {
        self.emit(CoreEvent::Notification(notification));
    }

    /// Log a failure and publish it as a notification.
    fn report(&self, err: ServiceError) -> ServiceError {
        warn!(error = %err, "Operation failed");
        self.notify(Notification::from(&err));
        err
    }
}

async fn next_device_event(
    receiver: &mut Option<mpsc::UnboundedReceiver<DeviceEvent>>,
) -> Option<DeviceEvent> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn to_millis(seconds: f64) -> u64 {
    (sanitize_position(seconds) * 1000.0).round() as u64
}

fn validate_title(title: &str) -> std::result::Result<String, LibraryError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(LibraryError::InvalidInput {
            field: "title".to_string(),
            message: "collection title cannot be blank".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn not_found(entity_type: &str, id: impl ToString) -> LibraryError {
    LibraryError::NotFound {
        entity_type: entity_type.to_string(),
        id: id.to_string(),
    }
}
