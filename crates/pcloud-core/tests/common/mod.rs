//! Simulated devices syncing through one in-memory hub

#![allow(dead_code)]

use pcloud_core::action_queue::LibSqlActionStore;
use pcloud_core::backend::{CloudBackend, MemoryBackendOptions, MemoryCloudHub};
use pcloud_core::config::SyncConfig;
use pcloud_core::db::{Database, SharedDatabase};
use pcloud_core::models::{ClientStorageType, LocalCollection, ObjectKey, UserId};
use pcloud_core::settings::{LibSqlSettingStore, SyncSettings};
use pcloud_core::storage::{LibSqlLocalStorage, LocalStorage};
use pcloud_core::util::Clock;
use pcloud_core::{PersonalCloud, PersonalCloudOptions};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const PAGE_URL: &str = "getmemexed.com/test";
pub const TEST_USER: &str = "test-user";

/// Millisecond clock starting at 555, one tick per reading
pub fn test_clock() -> Clock {
    let now = Arc::new(AtomicI64::new(555));
    Arc::new(move || now.fetch_add(1, Ordering::SeqCst))
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        retry_interval: Duration::from_millis(10),
        strict_error_reporting: true,
        ..SyncConfig::default()
    }
}

pub fn page(url: &str, title: &str) -> Value {
    let host = url.split('/').next().unwrap_or(url);
    json!({
        "url": url,
        "fullUrl": format!("https://www.{url}"),
        "domain": host,
        "hostname": host,
        "fullTitle": title,
    })
}

pub fn page_key(url: &str) -> ObjectKey {
    ObjectKey::Page {
        url: url.to_string(),
    }
}

/// Local side of one installation
pub struct Device {
    pub db: SharedDatabase,
    pub storage: Arc<LibSqlLocalStorage>,
    pub persistent_storage: Arc<LibSqlLocalStorage>,
    pub settings: SyncSettings,
    pub user: watch::Sender<Option<UserId>>,
}

impl Device {
    pub async fn in_memory(user: Option<UserId>) -> Self {
        let db = Database::open_in_memory().await.unwrap().shared();
        Self::with_database(db, user)
    }

    pub fn with_database(db: SharedDatabase, user: Option<UserId>) -> Self {
        let (user, _) = watch::channel(user);
        Self {
            storage: Arc::new(LibSqlLocalStorage::new(
                db.clone(),
                ClientStorageType::Normal,
            )),
            persistent_storage: Arc::new(LibSqlLocalStorage::new(
                db.clone(),
                ClientStorageType::Persistent,
            )),
            settings: SyncSettings::new(Arc::new(LibSqlSettingStore::new(db.clone()))),
            user,
            db,
        }
    }

    pub fn options(&self, backend: Arc<dyn CloudBackend>, config: SyncConfig) -> PersonalCloudOptions {
        PersonalCloudOptions {
            storage: self.storage.clone(),
            persistent_storage: self.persistent_storage.clone(),
            backend,
            settings: self.settings.clone(),
            action_store: LibSqlActionStore::new(self.db.clone()),
            user_changes: self.user.subscribe(),
            config,
            clock: test_clock(),
        }
    }

    pub async fn objects(&self, collection: LocalCollection) -> Vec<Value> {
        let storage = match collection.storage_type() {
            ClientStorageType::Normal => &self.storage,
            ClientStorageType::Persistent => &self.persistent_storage,
        };
        storage.find_objects(collection).await.unwrap()
    }
}

/// A device connected to the hub with its orchestrator set up
pub struct SyncedDevice {
    pub device: Device,
    pub cloud: PersonalCloud,
}

impl SyncedDevice {
    /// Push everything queued, then pull everything new
    pub async fn sync(&self) {
        self.cloud.wait_for_sync().await.unwrap();
        self.cloud.integrate_all_updates().await.unwrap();
        self.cloud.wait_for_sync().await.unwrap();
    }

    pub async fn create(&self, collection: LocalCollection, object: Value) {
        let storage = match collection.storage_type() {
            ClientStorageType::Normal => &self.device.storage,
            ClientStorageType::Persistent => &self.device.persistent_storage,
        };
        storage.create_object(collection, object).await.unwrap();
    }
}

pub struct TestHub {
    pub hub: MemoryCloudHub,
    pub user: UserId,
}

impl TestHub {
    pub fn new() -> Self {
        Self {
            hub: MemoryCloudHub::new(test_clock()),
            user: UserId::new(TEST_USER),
        }
    }

    pub async fn device(&self) -> SyncedDevice {
        self.device_with(test_config()).await
    }

    pub async fn device_with(&self, config: SyncConfig) -> SyncedDevice {
        let device = Device::in_memory(Some(self.user.clone())).await;
        self.connect(device, config).await
    }

    /// Set up an orchestrator for `device` against this hub
    pub async fn connect(&self, device: Device, config: SyncConfig) -> SyncedDevice {
        let backend = self.hub.connect(
            device.user.subscribe(),
            device.settings.clone(),
            MemoryBackendOptions::from_config(&config),
        );
        let cloud = PersonalCloud::new(device.options(Arc::new(backend), config));
        cloud.setup().await.unwrap();
        SyncedDevice { device, cloud }
    }
}

/// Poll `check` until it holds, failing the test after five seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
