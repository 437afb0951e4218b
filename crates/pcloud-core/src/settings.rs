//! Typed key-value settings kept by each installation

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::db::SharedDatabase;
use crate::error::{Error, Result};
use crate::models::DeviceId;

/// Keys the sync core persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    /// Device id assigned by the backend
    DeviceId,
    /// Change log cursor of the last integrated batch
    LastSeen,
    /// Whether sync has been enabled on this installation
    IsSetUp,
}

impl SettingKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeviceId => "deviceId",
            Self::LastSeen => "lastSeen",
            Self::IsSetUp => "isSetUp",
        }
    }
}

/// Key-value settings storage (async)
#[async_trait]
pub trait SettingStore: Send + Sync {
    /// Read a setting, `None` if it was never written
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a setting, replacing any previous value
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a setting
    async fn remove(&self, key: &str) -> Result<()>;
}

/// libSQL implementation of `SettingStore`
#[derive(Clone)]
pub struct LibSqlSettingStore {
    db: SharedDatabase,
}

impl LibSqlSettingStore {
    /// Create a new store on the given database
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    async fn get_setting(&self, key: &str) -> Result<String> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(value)
        } else {
            Err(Error::NotFound(key.to_string()))
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingStore for LibSqlSettingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.get_setting(key).await {
            Ok(value) => Ok(Some(serde_json::from_str(&value)?)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.set_setting(key, &value.to_string()).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM settings WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}

/// Typed view over the settings the sync core reads and writes
#[derive(Clone)]
pub struct SyncSettings {
    store: Arc<dyn SettingStore>,
}

impl SyncSettings {
    pub fn new(store: Arc<dyn SettingStore>) -> Self {
        Self { store }
    }

    pub async fn device_id(&self) -> Result<Option<DeviceId>> {
        let value = self.store.get(SettingKey::DeviceId.as_str()).await?;
        value.map_or(Ok(None), |value| Ok(Some(serde_json::from_value(value)?)))
    }

    pub async fn set_device_id(&self, device_id: Option<DeviceId>) -> Result<()> {
        let key = SettingKey::DeviceId.as_str();
        match device_id {
            Some(id) => self.store.set(key, serde_json::to_value(id)?).await,
            None => self.store.remove(key).await,
        }
    }

    pub async fn last_seen(&self) -> Result<Option<i64>> {
        let value = self.store.get(SettingKey::LastSeen.as_str()).await?;
        Ok(value.and_then(|value| value.as_i64()))
    }

    pub async fn set_last_seen(&self, last_seen: i64) -> Result<()> {
        self.store
            .set(SettingKey::LastSeen.as_str(), Value::from(last_seen))
            .await
    }

    pub async fn is_set_up(&self) -> Result<bool> {
        let value = self.store.get(SettingKey::IsSetUp.as_str()).await?;
        Ok(value.and_then(|value| value.as_bool()).unwrap_or(false))
    }

    pub async fn set_is_set_up(&self, is_set_up: bool) -> Result<()> {
        self.store
            .set(SettingKey::IsSetUp.as_str(), Value::Bool(is_set_up))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    async fn setup() -> LibSqlSettingStore {
        LibSqlSettingStore::new(Database::open_in_memory().await.unwrap().shared())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_setting_reads_as_none() {
        let store = setup().await;
        assert_eq!(store.get("lastSeen").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_replaces_previous_value() {
        let store = setup().await;
        store.set("custom", json!({ "a": 1 })).await.unwrap();
        store.set("custom", json!([1, 2])).await.unwrap();
        assert_eq!(store.get("custom").await.unwrap(), Some(json!([1, 2])));

        store.remove("custom").await.unwrap();
        assert_eq!(store.get("custom").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_typed_sync_settings() {
        let settings = SyncSettings::new(Arc::new(setup().await));

        assert_eq!(settings.device_id().await.unwrap(), None);
        assert_eq!(settings.last_seen().await.unwrap(), None);
        assert!(!settings.is_set_up().await.unwrap());

        settings
            .set_device_id(Some(DeviceId::new(3)))
            .await
            .unwrap();
        settings.set_last_seen(1_234).await.unwrap();
        settings.set_is_set_up(true).await.unwrap();

        assert_eq!(settings.device_id().await.unwrap(), Some(DeviceId::new(3)));
        assert_eq!(settings.last_seen().await.unwrap(), Some(1_234));
        assert!(settings.is_set_up().await.unwrap());

        settings.set_device_id(None).await.unwrap();
        assert_eq!(settings.device_id().await.unwrap(), None);
    }
}
