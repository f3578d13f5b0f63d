//! Core service façade and bootstrap helpers.
//!
//! This crate wires a host-provided media device into the playback engine
//! and picks the Store Adapter named by [`CoreConfig::store`]. Hosts either
//! call the [`PlayerService`] intent methods directly or hand the service to
//! [`PlayerService::run`] and talk to it through [`Command`]s.

pub mod error;
pub mod player;
pub mod views;

pub use error::{Result, ServiceError};
pub use player::{Command, PlayerService, ServiceDependencies};
pub use views::{CollectionSummary, LibraryView, SessionView, UploadReport};

use std::sync::Arc;

use bridge_traits::playback::{DeviceEvent, MediaDevice};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{LibraryStore, MemoryLibraryStore, SqliteLibraryStore};
use core_runtime::{CoreConfig, EventBus, StoreBackend};
use tokio::sync::mpsc;
use tracing::info;

/// Open the Store Adapter selected by `backend`.
///
/// # Errors
/// `InitializationFailed` when the SQLite database cannot be opened or migrated.
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn LibraryStore>> {
    match backend {
        StoreBackend::Embedded => {
            info!("Using embedded library store");
            Ok(Arc::new(MemoryLibraryStore::new()))
        }
        StoreBackend::Sqlite { database_path } => {
            let pool = create_pool(DatabaseConfig::new(database_path.clone()))
                .await
                .map_err(|err| ServiceError::InitializationFailed(err.to_string()))?;
            info!("Using SQLite library store");
            Ok(Arc::new(SqliteLibraryStore::new(pool)))
        }
    }
}

/// Build a ready-to-use engine from configuration.
///
/// Subscribe to `events` before calling this to receive start-up notifications.
///
/// ```no_run
/// # use std::sync::Arc;
/// # async fn example(device: Arc<dyn bridge_traits::MediaDevice>,
/// #     device_events: tokio::sync::mpsc::UnboundedReceiver<bridge_traits::DeviceEvent>)
/// #     -> core_service::Result<()> {
/// use core_runtime::{CoreConfig, EventBus};
///
/// let config = CoreConfig::builder().database_path("library.db").build()?;
/// let events = EventBus::new(config.event_buffer_size);
/// let mut notifications = events.subscribe();
///
/// let mut player = core_service::bootstrap(config, device, device_events, events).await?;
/// player.play().await?;
/// # Ok(())
/// # }
/// ```
pub async fn bootstrap(
    config: CoreConfig,
    device: Arc<dyn MediaDevice>,
    device_events: mpsc::UnboundedReceiver<DeviceEvent>,
    events: EventBus,
) -> Result<PlayerService> {
    config.validate()?;
    let store = open_store(&config.store).await?;
    let deps = ServiceDependencies::new(store, device)
        .with_device_events(device_events)
        .with_event_bus(events);
    PlayerService::start(config, deps).await
}
