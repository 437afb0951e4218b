//! In-memory remote dataset with its change log
//!
//! Every create, modify and delete of a record appends one [`DataChange`] in
//! the same step, so the log and the tables can never disagree.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::change::{ChangeInfo, ChangeKind, DataChange, MediaChangeInfo, RemoteCollection};
use super::records::{
    Annotation, AnnotationPrivacyLevel, AnnotationSelector, AnnotationShare, Bookmark,
    ContentLocator, ContentMetadata, ContentRead, DeviceInfo, List, ListEntry, ListShare, Record,
    RemoteMeta, RemoteRecord, Tag, TagConnection, TextTemplate,
};
use crate::models::{DeviceId, RemoteId, StoredContentType, UserId};
use crate::util::Clock;

/// Rows of one record family, ordered by id
#[derive(Debug, Clone)]
pub struct Table<T> {
    rows: BTreeMap<RemoteId, Record<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

/// User and device a write is performed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub user: UserId,
    pub device: DeviceId,
}

/// A media blob uploaded by a client
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMedia {
    pub user: UserId,
    pub normalized_url: String,
    pub stored_content_type: StoredContentType,
    pub content_type: String,
    pub content: Value,
}

/// All remote records of every user, plus the change log and media blobs
pub struct RemoteDataset {
    pub(super) content_metadata: Table<ContentMetadata>,
    pub(super) content_locators: Table<ContentLocator>,
    pub(super) content_reads: Table<ContentRead>,
    pub(super) bookmarks: Table<Bookmark>,
    pub(super) tags: Table<Tag>,
    pub(super) tag_connections: Table<TagConnection>,
    pub(super) annotations: Table<Annotation>,
    pub(super) annotation_selectors: Table<AnnotationSelector>,
    pub(super) annotation_privacy_levels: Table<AnnotationPrivacyLevel>,
    pub(super) annotation_shares: Table<AnnotationShare>,
    pub(super) lists: Table<List>,
    pub(super) list_entries: Table<ListEntry>,
    pub(super) list_shares: Table<ListShare>,
    pub(super) text_templates: Table<TextTemplate>,
    pub(super) devices: Table<DeviceInfo>,
    media: BTreeMap<String, StoredMedia>,
    changes: Vec<DataChange>,
    next_ids: HashMap<RemoteCollection, u64>,
    last_change_when: i64,
    clock: Clock,
}

impl RemoteDataset {
    pub fn new(clock: Clock) -> Self {
        Self {
            content_metadata: Table::default(),
            content_locators: Table::default(),
            content_reads: Table::default(),
            bookmarks: Table::default(),
            tags: Table::default(),
            tag_connections: Table::default(),
            annotations: Table::default(),
            annotation_selectors: Table::default(),
            annotation_privacy_levels: Table::default(),
            annotation_shares: Table::default(),
            lists: Table::default(),
            list_entries: Table::default(),
            list_shares: Table::default(),
            text_templates: Table::default(),
            devices: Table::default(),
            media: BTreeMap::new(),
            changes: Vec::new(),
            next_ids: HashMap::new(),
            last_change_when: i64::MIN,
            clock,
        }
    }

    fn next_id(&mut self, collection: RemoteCollection) -> RemoteId {
        let next = self.next_ids.entry(collection).or_insert(1);
        let id = RemoteId::new(*next);
        *next += 1;
        id
    }

    /// Current time, pushed forward when needed so that consecutive writes
    /// never share a timestamp.
    fn next_when(&mut self) -> i64 {
        let now = (self.clock)().max(self.last_change_when.saturating_add(1));
        self.last_change_when = now;
        now
    }

    fn log_change(
        &mut self,
        author: &Author,
        kind: ChangeKind,
        collection: RemoteCollection,
        object_id: RemoteId,
        info: Option<ChangeInfo>,
        created_when: i64,
    ) {
        let id = self.changes.len() as u64 + 1;
        self.changes.push(DataChange {
            id,
            created_when,
            created_by_device: author.device,
            user: author.user.clone(),
            kind,
            collection,
            object_id,
            info,
        });
    }

    /// Insert a record and log its creation.
    pub fn create<T: RemoteRecord>(
        &mut self,
        author: &Author,
        data: T,
        info: Option<ChangeInfo>,
    ) -> RemoteId {
        let id = self.next_id(T::COLLECTION);
        let now = self.next_when();
        let record = Record {
            meta: RemoteMeta {
                id,
                user: author.user.clone(),
                created_by_device: author.device,
                created_when: now,
                updated_when: now,
            },
            data,
        };
        T::table_mut(self).rows.insert(id, record);
        self.log_change(author, ChangeKind::Create, T::COLLECTION, id, info, now);
        id
    }

    /// Replace the data of a record owned by the author's user and log the
    /// modification. Returns `false` when no such record exists.
    pub fn update<T: RemoteRecord>(
        &mut self,
        author: &Author,
        id: RemoteId,
        data: T,
        info: Option<ChangeInfo>,
    ) -> bool {
        if self.get::<T>(&author.user, id).is_none() {
            return false;
        }
        let now = self.next_when();
        if let Some(record) = T::table_mut(self).rows.get_mut(&id) {
            record.data = data;
            record.meta.updated_when = now;
        }
        self.log_change(author, ChangeKind::Modify, T::COLLECTION, id, info, now);
        true
    }

    /// Remove a record owned by the author's user and log the deletion.
    /// Returns `false` when no such record exists.
    pub fn delete<T: RemoteRecord>(
        &mut self,
        author: &Author,
        id: RemoteId,
        info: Option<ChangeInfo>,
    ) -> bool {
        if self.get::<T>(&author.user, id).is_none() {
            return false;
        }
        T::table_mut(self).rows.remove(&id);
        let now = self.next_when();
        self.log_change(author, ChangeKind::Delete, T::COLLECTION, id, info, now);
        true
    }

    pub fn get<T: RemoteRecord>(&self, user: &UserId, id: RemoteId) -> Option<&Record<T>> {
        T::table(self)
            .rows
            .get(&id)
            .filter(|record| &record.meta.user == user)
    }

    /// First record of the user matching the predicate, by id order.
    pub fn find<T: RemoteRecord>(
        &self,
        user: &UserId,
        predicate: impl Fn(&T) -> bool,
    ) -> Option<&Record<T>> {
        T::table(self)
            .rows
            .values()
            .find(|record| &record.meta.user == user && predicate(&record.data))
    }

    /// All records of the user matching the predicate, by id order.
    pub fn filter<T: RemoteRecord>(
        &self,
        user: &UserId,
        predicate: impl Fn(&T) -> bool,
    ) -> Vec<&Record<T>> {
        T::table(self)
            .rows
            .values()
            .filter(|record| &record.meta.user == user && predicate(&record.data))
            .collect()
    }

    pub fn count<T: RemoteRecord>(&self, user: &UserId) -> usize {
        self.filter::<T>(user, |_| true).len()
    }

    /// Register a new device for the user. Device records are not logged.
    pub fn register_device(&mut self, user: &UserId, info: DeviceInfo) -> DeviceId {
        let id = self.next_id(RemoteCollection::DeviceInfo);
        let device = DeviceId::new(id.get());
        let now = (self.clock)();
        self.devices.rows.insert(
            id,
            Record {
                meta: RemoteMeta {
                    id,
                    user: user.clone(),
                    created_by_device: device,
                    created_when: now,
                    updated_when: now,
                },
                data: info,
            },
        );
        device
    }

    /// Whole change log, all users
    #[must_use]
    pub fn changes(&self) -> &[DataChange] {
        &self.changes
    }

    /// Up to `limit` changes of the user created strictly after `start_time`.
    pub fn changes_since(&self, user: &UserId, start_time: i64, limit: usize) -> Vec<&DataChange> {
        self.changes
            .iter()
            .filter(|change| &change.user == user && change.created_when > start_time)
            .take(limit)
            .collect()
    }

    /// Number of the user's changes created strictly after `start_time`.
    pub fn count_changes_since(&self, user: &UserId, start_time: i64) -> usize {
        self.changes
            .iter()
            .filter(|change| &change.user == user && change.created_when > start_time)
            .count()
    }

    /// Store a media blob, replacing older blobs of the same content, and
    /// log it so that other devices pull it.
    pub fn put_media(
        &mut self,
        author: &Author,
        info: MediaChangeInfo,
        content_type: impl Into<String>,
        content: Value,
    ) {
        let replaced = self.remove_media_of(&author.user, &info.normalized_url, info.stored_content_type);
        let kind = if replaced.is_empty() {
            ChangeKind::Create
        } else {
            ChangeKind::Modify
        };
        self.media.insert(
            info.path.clone(),
            StoredMedia {
                user: author.user.clone(),
                normalized_url: info.normalized_url.clone(),
                stored_content_type: info.stored_content_type,
                content_type: content_type.into(),
                content,
            },
        );
        let object_id = self.next_id(RemoteCollection::Media);
        let now = self.next_when();
        self.log_change(
            author,
            kind,
            RemoteCollection::Media,
            object_id,
            Some(ChangeInfo::Media(info)),
            now,
        );
    }

    /// Delete the stored content of a page and log the deletion.
    /// Returns `false` when nothing was stored.
    pub fn delete_media(
        &mut self,
        author: &Author,
        normalized_url: &str,
        stored_content_type: StoredContentType,
    ) -> bool {
        let removed = self.remove_media_of(&author.user, normalized_url, stored_content_type);
        let Some(path) = removed.into_iter().next() else {
            return false;
        };
        let object_id = self.next_id(RemoteCollection::Media);
        let now = self.next_when();
        self.log_change(
            author,
            ChangeKind::Delete,
            RemoteCollection::Media,
            object_id,
            Some(ChangeInfo::Media(MediaChangeInfo {
                normalized_url: normalized_url.to_string(),
                stored_content_type,
                path,
            })),
            now,
        );
        true
    }

    fn remove_media_of(
        &mut self,
        user: &UserId,
        normalized_url: &str,
        stored_content_type: StoredContentType,
    ) -> Vec<String> {
        let paths: Vec<String> = self
            .media
            .iter()
            .filter(|(_, media)| {
                &media.user == user
                    && media.normalized_url == normalized_url
                    && media.stored_content_type == stored_content_type
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in &paths {
            self.media.remove(path);
        }
        paths
    }

    pub fn get_media(&self, path: &str) -> Option<&StoredMedia> {
        self.media.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn fixed_clock(now: i64) -> Clock {
        Arc::new(move || now)
    }

    fn author(user: &str) -> Author {
        Author {
            user: UserId::new(user),
            device: DeviceId::new(1),
        }
    }

    #[test]
    fn writes_are_logged_with_increasing_timestamps() {
        let mut dataset = RemoteDataset::new(fixed_clock(555));
        let alice = author("alice");
        let id = dataset.create(&alice, ContentMetadata::default(), None);
        assert!(dataset.update(
            &alice,
            id,
            ContentMetadata {
                title: Some("Updated title".to_string()),
                ..ContentMetadata::default()
            },
            None,
        ));
        assert!(dataset.delete::<ContentMetadata>(&alice, id, None));

        let log: Vec<(ChangeKind, i64)> = dataset
            .changes()
            .iter()
            .map(|change| (change.kind, change.created_when))
            .collect();
        assert_eq!(
            log,
            vec![
                (ChangeKind::Create, 555),
                (ChangeKind::Modify, 556),
                (ChangeKind::Delete, 557)
            ]
        );
    }

    #[test]
    fn records_are_scoped_to_their_user() {
        let mut dataset = RemoteDataset::new(fixed_clock(1));
        let alice = author("alice");
        let bob = author("bob");
        let id = dataset.create(&alice, Tag { name: "foo".to_string() }, None);

        assert!(dataset.get::<Tag>(&bob.user, id).is_none());
        assert!(!dataset.delete::<Tag>(&bob, id, None));
        assert_eq!(dataset.count::<Tag>(&alice.user), 1);
        assert!(dataset.changes_since(&bob.user, 0, 10).is_empty());
    }

    #[test]
    fn ids_are_assigned_per_collection() {
        let mut dataset = RemoteDataset::new(fixed_clock(1));
        let alice = author("alice");
        let first = dataset.create(&alice, Tag { name: "a".to_string() }, None);
        let metadata = dataset.create(&alice, ContentMetadata::default(), None);
        let second = dataset.create(&alice, Tag { name: "b".to_string() }, None);
        assert_eq!(first, RemoteId::new(1));
        assert_eq!(metadata, RemoteId::new(1));
        assert_eq!(second, RemoteId::new(2));
    }

    #[test]
    fn changes_since_respects_start_and_limit() {
        let ticks = Arc::new(AtomicI64::new(100));
        let clock: Clock = {
            let ticks = Arc::clone(&ticks);
            Arc::new(move || ticks.fetch_add(10, Ordering::SeqCst))
        };
        let mut dataset = RemoteDataset::new(clock);
        let alice = author("alice");
        for name in ["a", "b", "c"] {
            dataset.create(&alice, Tag { name: name.to_string() }, None);
        }
        let changes = dataset.changes_since(&alice.user, 100, 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].created_when, 110);
        assert_eq!(dataset.count_changes_since(&alice.user, 100), 2);
    }

    #[test]
    fn media_upload_replaces_previous_blob() {
        let mut dataset = RemoteDataset::new(fixed_clock(1));
        let alice = author("alice");
        let info = |path: &str| MediaChangeInfo {
            normalized_url: "getmemexed.com/test".to_string(),
            stored_content_type: StoredContentType::HtmlBody,
            path: path.to_string(),
        };
        dataset.put_media(&alice, info("/a"), "text/html", Value::from("<p>1</p>"));
        dataset.put_media(&alice, info("/b"), "text/html", Value::from("<p>2</p>"));

        assert!(dataset.get_media("/a").is_none());
        assert_eq!(dataset.get_media("/b").unwrap().content, Value::from("<p>2</p>"));
        let kinds: Vec<ChangeKind> = dataset.changes().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Create, ChangeKind::Modify]);

        assert!(dataset.delete_media(&alice, "getmemexed.com/test", StoredContentType::HtmlBody));
        assert!(dataset.get_media("/b").is_none());
    }
}
