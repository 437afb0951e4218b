use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::*;
use crate::models::{LocalObject, StoredContentType, UserId};
use crate::remote::{
    ChangeInfo, ChangeKind, ContentLocator, ContentMetadata, ContentRead, RemoteCollection,
    RemoteDataset, Tag, TagConnection,
};
use crate::util::Clock;

const PAGE_URL: &str = "getmemexed.com/test";

fn test_clock() -> Clock {
    let now = Arc::new(AtomicI64::new(555));
    Arc::new(move || now.fetch_add(1, Ordering::SeqCst))
}

fn user() -> UserId {
    UserId::new("test-user")
}

fn first_page() -> Value {
    json!({
        "url": PAGE_URL,
        "fullUrl": "https://www.getmemexed.com/test",
        "domain": "getmemexed.com",
        "hostname": "getmemexed.com",
        "fullTitle": "getmemexed.com title",
        "lang": "en-GB",
        "canonicalUrl": "https://www.getmemexed.com/test",
        "description": "getmemexed.com description",
    })
}

fn second_page() -> Value {
    json!({
        "url": "notionized.com/foo",
        "fullUrl": "https://www.notionized.com/foo",
        "domain": "notionized.com",
        "hostname": "notionized.com",
        "fullTitle": "notionized.com/foo title",
        "lang": "en-US",
        "canonicalUrl": "https://www.notionized.com/foo",
        "description": "notionized.com/foo description",
    })
}

fn annotation() -> Value {
    json!({
        "url": format!("{PAGE_URL}/#1625097600000"),
        "pageUrl": PAGE_URL,
        "pageTitle": "getmemexed.com title",
        "body": "highlighted text",
        "comment": "my note",
        "selector": { "quote": "highlighted text" },
        "createdWhen": 1_625_097_600_000_i64,
    })
}

struct Server {
    dataset: RemoteDataset,
    user: UserId,
}

impl Server {
    fn new() -> Self {
        Self {
            dataset: RemoteDataset::new(test_clock()),
            user: user(),
        }
    }

    fn overwrite(&mut self, collection: LocalCollection, object: Value) -> Vec<ClientInstruction> {
        let update = PushUpdate::overwrite(
            SchemaVersion::CURRENT,
            Some(DeviceId::new(1)),
            collection,
            object,
        );
        upload_client_update(&mut self.dataset, &self.user, &update).unwrap()
    }

    fn delete(&mut self, key: ObjectKey) {
        let update = PushUpdate::delete(SchemaVersion::CURRENT, Some(DeviceId::new(1)), key);
        upload_client_update(&mut self.dataset, &self.user, &update).unwrap();
    }

    fn download(&self, since: i64) -> DownloadedUpdates {
        download_client_updates(
            &self.dataset,
            &self.user,
            since,
            SchemaVersion::CURRENT,
            DOWNLOAD_CHANGE_BATCH_SIZE,
        )
        .unwrap()
    }

    fn log(&self) -> Vec<(ChangeKind, RemoteCollection)> {
        self.dataset
            .changes()
            .iter()
            .map(|change| (change.kind, change.collection))
            .collect()
    }
}

fn page_key(url: &str) -> ObjectKey {
    ObjectKey::Page {
        url: url.to_string(),
    }
}

#[test]
fn page_create_adds_metadata_and_locator() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());

    let metadata = server
        .dataset
        .filter::<ContentMetadata>(&server.user, |_| true);
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].data.title.as_deref(), Some("getmemexed.com title"));

    let locators = server
        .dataset
        .filter::<ContentLocator>(&server.user, |_| true);
    assert_eq!(locators.len(), 1);
    assert_eq!(locators[0].data.personal_content_metadata, metadata[0].id());
    assert_eq!(locators[0].data.location, PAGE_URL);
    assert_eq!(
        server.log(),
        vec![
            (ChangeKind::Create, RemoteCollection::ContentMetadata),
            (ChangeKind::Create, RemoteCollection::ContentLocator),
        ]
    );
}

#[test]
fn page_update_modifies_existing_metadata() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    let metadata_id = server
        .dataset
        .find::<ContentMetadata>(&server.user, |_| true)
        .unwrap()
        .id();

    let mut updated = first_page();
    updated["fullTitle"] = json!("Updated title");
    server.overwrite(LocalCollection::Pages, updated);

    let last = server.dataset.changes().last().unwrap();
    assert_eq!(last.kind, ChangeKind::Modify);
    assert_eq!(last.collection, RemoteCollection::ContentMetadata);
    assert_eq!(last.object_id, metadata_id);
    assert_eq!(server.dataset.count::<ContentMetadata>(&server.user), 1);
    assert_eq!(server.dataset.count::<ContentLocator>(&server.user), 1);
}

#[test]
fn repeated_overwrite_is_a_no_op() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    let logged = server.dataset.changes().len();
    server.overwrite(LocalCollection::Pages, first_page());
    assert_eq!(server.dataset.changes().len(), logged);
}

#[test]
fn page_delete_logs_normalized_url() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.delete(page_key(PAGE_URL));

    let delete = server
        .dataset
        .changes()
        .iter()
        .find(|change| {
            change.kind == ChangeKind::Delete
                && change.collection == RemoteCollection::ContentMetadata
        })
        .unwrap();
    assert_eq!(
        delete.info,
        Some(ChangeInfo::ContentMetadata {
            normalized_url: PAGE_URL.to_string()
        })
    );
    assert_eq!(server.dataset.count::<ContentMetadata>(&server.user), 0);
    assert_eq!(server.dataset.count::<ContentLocator>(&server.user), 0);
}

#[test]
fn deleting_missing_objects_is_harmless() {
    let mut server = Server::new();
    server.delete(page_key(PAGE_URL));
    server.delete(ObjectKey::Tag {
        name: "foo".to_string(),
        url: PAGE_URL.to_string(),
    });
    assert!(server.dataset.changes().is_empty());
}

#[test]
fn removing_last_tag_connection_keeps_the_tag() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.overwrite(
        LocalCollection::Annotations,
        annotation(),
    );
    let annotation_url = format!("{PAGE_URL}/#1625097600000");
    server.overwrite(
        LocalCollection::Tags,
        json!({ "name": "foo", "url": annotation_url }),
    );
    assert_eq!(server.dataset.count::<TagConnection>(&server.user), 1);

    server.delete(ObjectKey::Tag {
        name: "foo".to_string(),
        url: annotation_url.clone(),
    });

    assert_eq!(server.dataset.count::<Tag>(&server.user), 1);
    assert_eq!(server.dataset.count::<TagConnection>(&server.user), 0);
    let last = server.dataset.changes().last().unwrap();
    assert_eq!(last.collection, RemoteCollection::TagConnection);
    assert_eq!(
        last.info,
        Some(ChangeInfo::TagConnection {
            name: "foo".to_string(),
            url: annotation_url,
        })
    );
}

#[test]
fn visits_update_locator_last_visited() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.overwrite(
        LocalCollection::Visits,
        json!({ "url": PAGE_URL, "time": 4545, "duration": 1122, "scrollMaxPerc": 100, "scrollMaxPx": 500, "scrollPerc": 50, "scrollPx": 250 }),
    );
    server.overwrite(LocalCollection::Visits, json!({ "url": PAGE_URL, "time": 3000 }));

    let locator = server
        .dataset
        .find::<ContentLocator>(&server.user, |_| true)
        .unwrap();
    assert_eq!(locator.data.last_visited, 4545);
    assert_eq!(server.dataset.count::<ContentRead>(&server.user), 2);
}

#[test]
fn visits_without_a_page_are_dropped() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Visits, json!({ "url": PAGE_URL, "time": 4545 }));
    assert!(server.dataset.changes().is_empty());
}

#[test]
fn favicons_are_not_uploaded() {
    let mut server = Server::new();
    server.overwrite(
        LocalCollection::FavIcons,
        json!({ "hostname": "getmemexed.com" }),
    );
    assert!(server.dataset.changes().is_empty());
}

#[test]
fn doc_content_push_asks_for_media_upload() {
    let mut server = Server::new();
    let instructions = server.overwrite(
        LocalCollection::DocContent,
        json!({ "normalizedUrl": PAGE_URL, "storedContentType": "htmlBody", "content": "<p>hi</p>" }),
    );
    let [ClientInstruction::UploadToStorage {
        storage,
        collection,
        upload_path,
        upload_as_json,
        change_info,
        ..
    }] = instructions.as_slice()
    else {
        panic!("expected a single upload instruction, got {instructions:?}");
    };
    assert_eq!(*storage, ClientStorageType::Persistent);
    assert_eq!(collection, "docContent");
    assert!(upload_path.starts_with("/u/test-user/docContent/"));
    assert!(!upload_as_json);
    assert_eq!(change_info.path, *upload_path);
    assert_eq!(change_info.stored_content_type, StoredContentType::HtmlBody);
}

#[test]
fn pushes_from_unsupported_schemas_are_rejected() {
    let mut dataset = RemoteDataset::new(test_clock());
    let update = PushUpdate::overwrite(
        SchemaVersion::from_millis(SchemaVersion::V24.as_millis() - 1),
        Some(DeviceId::new(1)),
        LocalCollection::Pages,
        first_page(),
    );
    let err = upload_client_update(&mut dataset, &user(), &update).unwrap_err();
    assert!(matches!(err, crate::Error::UnsupportedSchemaVersion(_)));
}

#[test]
fn pushes_without_device_are_rejected() {
    let mut dataset = RemoteDataset::new(test_clock());
    let update = PushUpdate::overwrite(
        SchemaVersion::CURRENT,
        None,
        LocalCollection::Pages,
        first_page(),
    );
    let err = upload_client_update(&mut dataset, &user(), &update).unwrap_err();
    assert!(matches!(err, crate::Error::MissingDeviceId));
}

#[test]
fn download_rebuilds_pushed_objects() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.overwrite(LocalCollection::Pages, second_page());
    server.overwrite(
        LocalCollection::Tags,
        json!({ "name": "foo-tag", "url": PAGE_URL }),
    );

    let downloaded = server.download(0);
    assert!(!downloaded.may_have_more);
    assert_eq!(
        downloaded.last_seen,
        server.dataset.changes().last().unwrap().created_when
    );
    assert_eq!(
        downloaded.batch,
        vec![
            CloudUpdate::overwrite(LocalCollection::Pages, first_page()),
            CloudUpdate::overwrite(LocalCollection::Pages, second_page()),
            CloudUpdate::overwrite(
                LocalCollection::Tags,
                json!({ "name": "foo-tag", "url": PAGE_URL })
            ),
        ]
    );
}

#[test]
fn download_rebuilds_annotations_with_selector() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.overwrite(LocalCollection::Annotations, annotation());

    let downloaded = server.download(0);
    let pulled = downloaded
        .batch
        .iter()
        .find(|update| update.collection() == LocalCollection::Annotations)
        .unwrap();
    let CloudUpdate::Overwrite { object, .. } = pulled else {
        panic!("expected an overwrite");
    };
    assert_eq!(
        LocalObject::parse(LocalCollection::Annotations, object.clone()).unwrap(),
        LocalObject::parse(LocalCollection::Annotations, annotation()).unwrap()
    );
}

#[test]
fn create_modify_delete_downloads_as_delete() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    let mut updated = first_page();
    updated["fullTitle"] = json!("Updated title");
    server.overwrite(LocalCollection::Pages, updated);
    server.delete(page_key(PAGE_URL));

    let downloaded = server.download(0);
    assert_eq!(downloaded.batch, vec![CloudUpdate::delete(page_key(PAGE_URL))]);
}

#[test]
fn page_delete_cascades_to_dependents() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.overwrite(LocalCollection::Visits, json!({ "url": PAGE_URL, "time": 4545 }));
    server.overwrite(LocalCollection::Bookmarks, json!({ "url": PAGE_URL, "time": 10 }));
    server.overwrite(
        LocalCollection::Tags,
        json!({ "name": "foo-tag", "url": PAGE_URL }),
    );
    let since = server.dataset.changes().last().unwrap().created_when;

    server.delete(page_key(PAGE_URL));

    let mut deleted: Vec<ObjectKey> = server
        .download(since)
        .batch
        .into_iter()
        .map(|update| match update {
            CloudUpdate::Delete { where_, .. } => where_,
            other => panic!("unexpected update {other:?}"),
        })
        .collect();
    deleted.sort_by_key(|key| key.collection());
    assert_eq!(
        deleted,
        vec![
            page_key(PAGE_URL),
            ObjectKey::Visit {
                url: PAGE_URL.to_string(),
                time: 4545
            },
            ObjectKey::Bookmark {
                url: PAGE_URL.to_string()
            },
            ObjectKey::Tag {
                name: "foo-tag".to_string(),
                url: PAGE_URL.to_string()
            },
        ]
    );
}

#[test]
fn newer_collections_are_withheld_from_older_clients() {
    let mut server = Server::new();
    server.overwrite(
        LocalCollection::Templates,
        json!({ "id": 1, "title": "Roam", "code": "{{{PageTitle}}}" }),
    );
    server.overwrite(LocalCollection::Pages, first_page());

    let old_client = download_client_updates(
        &server.dataset,
        &server.user,
        0,
        SchemaVersion::V24,
        DOWNLOAD_CHANGE_BATCH_SIZE,
    )
    .unwrap();
    assert_eq!(
        old_client
            .batch
            .iter()
            .map(CloudUpdate::collection)
            .collect::<Vec<_>>(),
        vec![LocalCollection::Pages]
    );
    assert_eq!(server.download(0).batch.len(), 2);
}

#[test]
fn download_pages_through_the_log() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.overwrite(LocalCollection::Pages, second_page());

    let first = download_client_updates(&server.dataset, &server.user, 0, SchemaVersion::CURRENT, 2)
        .unwrap();
    assert!(first.may_have_more);
    assert_eq!(first.batch.len(), 1);

    let second = download_client_updates(
        &server.dataset,
        &server.user,
        first.last_seen,
        SchemaVersion::CURRENT,
        2,
    )
    .unwrap();
    assert!(second.may_have_more);
    assert_eq!(second.batch.len(), 1);

    let rest = download_client_updates(
        &server.dataset,
        &server.user,
        second.last_seen,
        SchemaVersion::CURRENT,
        2,
    )
    .unwrap();
    assert!(!rest.may_have_more);
    assert!(rest.batch.is_empty());
    assert_eq!(rest.last_seen, second.last_seen);
}

#[test]
fn list_entries_roundtrip_through_remote_lists() {
    let mut server = Server::new();
    server.overwrite(LocalCollection::Pages, first_page());
    server.overwrite(
        LocalCollection::CustomLists,
        json!({ "id": 7, "name": "Reading", "isDeletable": true, "isNestable": true, "createdAt": 100 }),
    );
    let entry = json!({ "listId": 7, "pageUrl": PAGE_URL, "fullUrl": "https://www.getmemexed.com/test", "createdAt": 101 });
    server.overwrite(LocalCollection::PageListEntries, entry.clone());

    let downloaded = server.download(0);
    assert!(downloaded
        .batch
        .contains(&CloudUpdate::overwrite(LocalCollection::PageListEntries, entry)));

    let since = downloaded.last_seen;
    server.delete(ObjectKey::CustomList { id: 7 });
    let deleted: Vec<ObjectKey> = server
        .download(since)
        .batch
        .into_iter()
        .filter_map(|update| match update {
            CloudUpdate::Delete { where_, .. } => Some(where_),
            CloudUpdate::Overwrite { .. } => None,
        })
        .collect();
    assert_eq!(
        deleted,
        vec![
            ObjectKey::PageListEntry {
                list_id: 7,
                page_url: PAGE_URL.to_string()
            },
            ObjectKey::CustomList { id: 7 },
        ]
    );
}

#[test]
fn push_update_flattens_its_change() {
    let update = PushUpdate::delete(
        SchemaVersion::V25,
        Some(DeviceId::new(1)),
        ObjectKey::Page {
            url: "getmemexed.com/test".to_string(),
        },
    );
    assert_eq!(
        serde_json::to_value(&update).unwrap(),
        json!({
            "schemaVersion": SchemaVersion::V25.as_millis(),
            "deviceId": 1,
            "collection": "pages",
            "storage": "normal",
            "type": "Delete",
            "where": { "kind": "page", "url": "getmemexed.com/test" },
        })
    );
    let parsed: PushUpdate = serde_json::from_value(serde_json::to_value(&update).unwrap()).unwrap();
    assert_eq!(parsed, update);
}

#[test]
fn doc_content_updates_target_persistent_storage() {
    let update = CloudUpdate::delete(ObjectKey::DocContent {
        normalized_url: "getmemexed.com/test".to_string(),
        stored_content_type: crate::models::StoredContentType::HtmlBody,
    });
    assert!(matches!(
        update,
        CloudUpdate::Delete {
            storage: ClientStorageType::Persistent,
            ..
        }
    ));
}
