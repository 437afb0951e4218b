use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pcloud_core::action_queue::LibSqlActionStore;
use pcloud_core::backend::{MemoryBackendOptions, MemoryCloudHub};
use pcloud_core::config::SyncConfig;
use pcloud_core::db::{Database, SharedDatabase};
use pcloud_core::models::ClientStorageType;
use pcloud_core::settings::{LibSqlSettingStore, SyncSettings};
use pcloud_core::storage::LibSqlLocalStorage;
use pcloud_core::util::system_clock;
use pcloud_core::{PersonalCloud, PersonalCloudOptions};
use tokio::sync::watch;

use crate::error::CliError;

/// Stores of one local database file
pub struct LocalDatabase {
    pub db: SharedDatabase,
    pub storage: Arc<LibSqlLocalStorage>,
    pub settings: SyncSettings,
    pub actions: LibSqlActionStore,
}

pub async fn open_local_database(db_path: &Path) -> Result<LocalDatabase, CliError> {
    let db = Database::open(db_path).await?.shared();
    tracing::debug!(path = %db_path.display(), "Opened local database");
    Ok(LocalDatabase {
        storage: Arc::new(LibSqlLocalStorage::new(
            db.clone(),
            ClientStorageType::Normal,
        )),
        settings: SyncSettings::new(Arc::new(LibSqlSettingStore::new(db.clone()))),
        actions: LibSqlActionStore::new(db.clone()),
        db,
    })
}

/// Set up an orchestrator on the local database with nobody signed in.
///
/// The queue stays paused, so scheduled actions are only persisted.
pub async fn open_offline_cloud(local: &LocalDatabase) -> Result<PersonalCloud, CliError> {
    let config = SyncConfig::from_env()?;
    let (_, user_changes) = watch::channel(None);
    let hub = MemoryCloudHub::new(system_clock());
    let backend = hub.connect(
        user_changes.clone(),
        local.settings.clone(),
        MemoryBackendOptions::from_config(&config),
    );

    let cloud = PersonalCloud::new(PersonalCloudOptions {
        storage: local.storage.clone(),
        persistent_storage: Arc::new(LibSqlLocalStorage::new(
            local.db.clone(),
            ClientStorageType::Persistent,
        )),
        backend: Arc::new(backend),
        settings: local.settings.clone(),
        action_store: local.actions.clone(),
        user_changes,
        config,
        clock: system_clock(),
    });
    cloud.setup().await?;
    Ok(cloud)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("PCLOUD_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pcloud")
        .join("pcloud.db")
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
