//! libSQL-backed local object store

use async_trait::async_trait;
use serde_json::Value;

use super::{
    ChangeHandler, ChangeHandlers, IncomingWrite, LocalStorage, StorageChange, StorageChangeEvent,
    Subscription,
};
use crate::db::SharedDatabase;
use crate::error::{Error, Result};
use crate::models::{ClientStorageType, LocalCollection, ObjectKey, SchemaVersion};

/// Object store holding the collections of one storage type as JSON rows
pub struct LibSqlLocalStorage {
    db: SharedDatabase,
    storage_type: ClientStorageType,
    schema_version: SchemaVersion,
    handlers: ChangeHandlers,
}

impl LibSqlLocalStorage {
    /// Create a store for the collections kept in `storage_type`
    pub fn new(db: SharedDatabase, storage_type: ClientStorageType) -> Self {
        Self {
            db,
            storage_type,
            schema_version: SchemaVersion::CURRENT,
            handlers: ChangeHandlers::default(),
        }
    }

    /// Report an older local schema, as an outdated install would
    #[must_use]
    pub const fn with_schema_version(mut self, schema_version: SchemaVersion) -> Self {
        self.schema_version = schema_version;
        self
    }

    #[must_use]
    pub const fn storage_type(&self) -> ClientStorageType {
        self.storage_type
    }

    /// Create a local object and notify change handlers
    pub async fn create_object(&self, collection: LocalCollection, object: Value) -> Result<()> {
        let key = ObjectKey::of_object(collection, &object)?;
        self.check_storage(collection)?;
        {
            let db = self.db.lock().await;
            if fetch(&db, self.storage_type, &key).await?.is_some() {
                return Err(Error::InvalidInput(format!(
                    "{collection} object {} already exists",
                    key.storage_key()
                )));
            }
            store(&db, self.storage_type, &key, &object).await?;
        }

        self.handlers
            .notify(StorageChangeEvent {
                collection,
                changes: vec![StorageChange::Create { pk: key.pk() }],
            })
            .await;
        Ok(())
    }

    /// Merge `updates` into an existing object and notify change handlers
    pub async fn update_object(&self, key: &ObjectKey, updates: Value) -> Result<()> {
        let collection = key.collection();
        self.check_storage(collection)?;
        {
            let db = self.db.lock().await;
            let Some(mut object) = fetch(&db, self.storage_type, key).await? else {
                return Err(Error::NotFound(format!(
                    "{collection} object {}",
                    key.storage_key()
                )));
            };
            merge_fields(&mut object, updates);
            store(&db, self.storage_type, key, &object).await?;
        }

        self.handlers
            .notify(StorageChangeEvent {
                collection,
                changes: vec![StorageChange::Modify {
                    pks: vec![key.pk()],
                }],
            })
            .await;
        Ok(())
    }

    /// Delete a local object and notify change handlers; returns false if it
    /// did not exist
    pub async fn delete_object(&self, key: &ObjectKey) -> Result<bool> {
        let collection = key.collection();
        self.check_storage(collection)?;
        let deleted = {
            let db = self.db.lock().await;
            remove(&db, self.storage_type, key).await?
        };
        if !deleted {
            return Ok(false);
        }

        self.handlers
            .notify(StorageChangeEvent {
                collection,
                changes: vec![StorageChange::Delete {
                    pks: vec![key.pk()],
                }],
            })
            .await;
        Ok(true)
    }

    fn check_storage(&self, collection: LocalCollection) -> Result<()> {
        if collection.storage_type() == self.storage_type {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "{collection} is not kept in {} storage",
                self.storage_type.as_str()
            )))
        }
    }
}

#[async_trait]
impl LocalStorage for LibSqlLocalStorage {
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<Value>> {
        self.check_storage(key.collection())?;
        let db = self.db.lock().await;
        fetch(&db, self.storage_type, key).await
    }

    async fn find_objects(&self, collection: LocalCollection) -> Result<Vec<Value>> {
        self.check_storage(collection)?;
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT data FROM objects WHERE storage_type = ? AND collection = ? ORDER BY pk",
                [self.storage_type.as_str(), collection.as_str()],
            )
            .await?;

        let mut objects = Vec::new();
        while let Some(row) = rows.next().await? {
            let data: String = row.get(0)?;
            objects.push(serde_json::from_str(&data)?);
        }
        Ok(objects)
    }

    async fn write_incoming_data(&self, write: IncomingWrite) -> Result<()> {
        let IncomingWrite {
            collection,
            where_,
            object,
        } = write;
        self.check_storage(collection)?;
        let key = match where_ {
            Some(key) => key,
            None => ObjectKey::of_object(collection, &object)?,
        };

        let db = self.db.lock().await;
        let replaced = match fetch(&db, self.storage_type, &key).await? {
            Some(existing) => keep_local_fields(collection, existing, object),
            None => object,
        };
        store(&db, self.storage_type, &key, &replaced).await
    }

    async fn remove_objects(&self, keys: &[ObjectKey]) -> Result<usize> {
        for key in keys {
            self.check_storage(key.collection())?;
        }
        let db = self.db.lock().await;
        let mut removed = 0;
        for key in keys {
            if remove(&db, self.storage_type, key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn on_change(&self, handler: ChangeHandler) -> Subscription {
        self.handlers.subscribe(handler)
    }

    async fn schema_version(&self) -> Result<SchemaVersion> {
        Ok(self.schema_version)
    }
}

/// Replace a stored object by a pulled one, keeping the fields of the stored
/// object that pulls never carry
fn keep_local_fields(collection: LocalCollection, existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(existing), Value::Object(mut incoming)) => {
            for (field, value) in existing {
                if collection.is_kept_on_pull(&field) && !incoming.contains_key(&field) {
                    incoming.insert(field, value);
                }
            }
            Value::Object(incoming)
        }
        (_, incoming) => incoming,
    }
}

/// Shallow merge: top-level fields of `updates` replace those of `object`
fn merge_fields(object: &mut Value, updates: Value) {
    match (object, updates) {
        (Value::Object(existing), Value::Object(updates)) => existing.extend(updates),
        (object, updates) => *object = updates,
    }
}

async fn fetch(
    db: &crate::db::Database,
    storage_type: ClientStorageType,
    key: &ObjectKey,
) -> Result<Option<Value>> {
    let pk = key.storage_key();
    let mut rows = db
        .connection()
        .query(
            "SELECT data FROM objects WHERE storage_type = ? AND collection = ? AND pk = ?",
            [storage_type.as_str(), key.collection().as_str(), pk.as_str()],
        )
        .await?;

    if let Some(row) = rows.next().await? {
        let data: String = row.get(0)?;
        Ok(Some(serde_json::from_str(&data)?))
    } else {
        Ok(None)
    }
}

async fn store(
    db: &crate::db::Database,
    storage_type: ClientStorageType,
    key: &ObjectKey,
    object: &Value,
) -> Result<()> {
    let pk = key.storage_key();
    let data = serde_json::to_string(object)?;
    db.connection()
        .execute(
            "INSERT OR REPLACE INTO objects (storage_type, collection, pk, data) VALUES (?, ?, ?, ?)",
            [
                storage_type.as_str(),
                key.collection().as_str(),
                pk.as_str(),
                data.as_str(),
            ],
        )
        .await?;
    Ok(())
}

async fn remove(
    db: &crate::db::Database,
    storage_type: ClientStorageType,
    key: &ObjectKey,
) -> Result<bool> {
    let pk = key.storage_key();
    let affected = db
        .connection()
        .execute(
            "DELETE FROM objects WHERE storage_type = ? AND collection = ? AND pk = ?",
            [storage_type.as_str(), key.collection().as_str(), pk.as_str()],
        )
        .await?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    async fn setup() -> LibSqlLocalStorage {
        let db = Database::open_in_memory().await.unwrap().shared();
        LibSqlLocalStorage::new(db, ClientStorageType::Normal)
    }

    fn recorder() -> (ChangeHandler, Arc<Mutex<Vec<StorageChangeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let handler: ChangeHandler = Arc::new(move |event| {
            sink.lock().unwrap().push(event);
            async {}.boxed()
        });
        (handler, events)
    }

    fn page_key() -> ObjectKey {
        ObjectKey::Page {
            url: "getmemexed.com/test".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_writes_emit_change_events() {
        let storage = setup().await;
        let (handler, events) = recorder();
        let _subscription = storage.on_change(handler);

        storage
            .create_object(
                LocalCollection::Pages,
                json!({ "url": "getmemexed.com/test", "fullTitle": "Title" }),
            )
            .await
            .unwrap();
        storage
            .update_object(&page_key(), json!({ "fullTitle": "Updated title" }))
            .await
            .unwrap();
        assert!(storage.delete_object(&page_key()).await.unwrap());
        assert!(!storage.delete_object(&page_key()).await.unwrap());

        let pk = json!("getmemexed.com/test");
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                StorageChangeEvent {
                    collection: LocalCollection::Pages,
                    changes: vec![StorageChange::Create { pk: pk.clone() }],
                },
                StorageChangeEvent {
                    collection: LocalCollection::Pages,
                    changes: vec![StorageChange::Modify {
                        pks: vec![pk.clone()]
                    }],
                },
                StorageChangeEvent {
                    collection: LocalCollection::Pages,
                    changes: vec![StorageChange::Delete { pks: vec![pk] }],
                },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_subscription_stops_events() {
        let storage = setup().await;
        let (handler, events) = recorder();
        let subscription = storage.on_change(handler);
        subscription.unsubscribe();

        storage
            .create_object(LocalCollection::Pages, json!({ "url": "a.com" }))
            .await
            .unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_incoming_writes_replace_and_stay_silent() {
        let storage = setup().await;
        let (handler, events) = recorder();
        let _subscription = storage.on_change(handler);

        storage
            .write_incoming_data(IncomingWrite {
                collection: LocalCollection::Pages,
                where_: None,
                object: json!({
                    "url": "getmemexed.com/test",
                    "fullTitle": "Title",
                    "lang": "en",
                    "text": "local text",
                    "terms": ["local"],
                }),
            })
            .await
            .unwrap();
        storage
            .write_incoming_data(IncomingWrite {
                collection: LocalCollection::Pages,
                where_: Some(page_key()),
                object: json!({ "url": "getmemexed.com/test", "fullTitle": "Updated title" }),
            })
            .await
            .unwrap();

        assert_eq!(
            storage.get_object(&page_key()).await.unwrap(),
            Some(json!({
                "url": "getmemexed.com/test",
                "fullTitle": "Updated title",
                "text": "local text",
                "terms": ["local"],
            }))
        );
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_incoming_doc_content_keeps_content_it_lacks() {
        let db = Database::open_in_memory().await.unwrap().shared();
        let storage = LibSqlLocalStorage::new(db, ClientStorageType::Persistent);
        let key = ObjectKey::DocContent {
            normalized_url: "getmemexed.com/test".to_string(),
            stored_content_type: crate::models::StoredContentType::HtmlBody,
        };
        let object = json!({ "normalizedUrl": "getmemexed.com/test", "storedContentType": "htmlBody" });
        let mut with_content = object.clone();
        with_content["content"] = json!("<p>body</p>");

        for object in [with_content.clone(), object] {
            storage
                .write_incoming_data(IncomingWrite {
                    collection: LocalCollection::DocContent,
                    where_: Some(key.clone()),
                    object,
                })
                .await
                .unwrap();
        }

        assert_eq!(storage.get_object(&key).await.unwrap(), Some(with_content));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_objects_counts_existing_rows() {
        let storage = setup().await;
        storage
            .create_object(LocalCollection::Pages, json!({ "url": "getmemexed.com/test" }))
            .await
            .unwrap();

        let removed = storage
            .remove_objects(&[
                page_key(),
                ObjectKey::Page {
                    url: "missing.com".to_string(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage
            .find_objects(LocalCollection::Pages)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejects_collections_of_other_storage() {
        let storage = setup().await;
        let result = storage.find_objects(LocalCollection::DocContent).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_rejects_duplicates() {
        let storage = setup().await;
        let page = json!({ "url": "getmemexed.com/test" });
        storage
            .create_object(LocalCollection::Pages, page.clone())
            .await
            .unwrap();
        let result = storage.create_object(LocalCollection::Pages, page).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
