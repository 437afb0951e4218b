//! Passive data clean-up
//!
//! Browsing history collected without any user action (pages that were only
//! visited) is dropped, and long visit histories are cut down. Removal is
//! silent: nothing of it is pushed to the cloud.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::Result;
use crate::models::{
    Annotation, Bookmark, LocalCollection, ObjectKey, Page, PageListEntry, SchemaVersion,
    TagAssignment, TagAssignmentTarget, Visit,
};
use crate::storage::LocalStorage;

/// Visits at or before this time predate cloud sync and count as passive data
pub const PASSIVE_DATA_CUTOFF: i64 = SchemaVersion::V25.as_millis();

/// What a passive data wipe removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassiveDataWipe {
    pub removed_pages: usize,
    pub removed_visits: usize,
    pub removed_fav_icons: usize,
}

async fn load<T: DeserializeOwned>(
    storage: &dyn LocalStorage,
    collection: LocalCollection,
) -> Result<Vec<T>> {
    storage
        .find_objects(collection)
        .await?
        .into_iter()
        .map(|object: Value| Ok(serde_json::from_value(object)?))
        .collect()
}

/// Whether any visit is old enough to be passive data
pub async fn has_passive_data(storage: &dyn LocalStorage) -> Result<bool> {
    let visits: Vec<Visit> = load(storage, LocalCollection::Visits).await?;
    Ok(visits.iter().any(|visit| visit.time <= PASSIVE_DATA_CUTOFF))
}

/// Pages the user did something with
async fn active_page_urls(storage: &dyn LocalStorage) -> Result<HashSet<String>> {
    let mut urls = HashSet::new();

    let bookmarks: Vec<Bookmark> = load(storage, LocalCollection::Bookmarks).await?;
    urls.extend(bookmarks.into_iter().map(|bookmark| bookmark.url));

    let annotations: Vec<Annotation> = load(storage, LocalCollection::Annotations).await?;
    urls.extend(annotations.into_iter().map(|annotation| annotation.page_url));

    let entries: Vec<PageListEntry> = load(storage, LocalCollection::PageListEntries).await?;
    urls.extend(entries.into_iter().map(|entry| entry.page_url));

    let tags: Vec<TagAssignment> = load(storage, LocalCollection::Tags).await?;
    urls.extend(tags.iter().map(|tag| match tag.target() {
        TagAssignmentTarget::Page { url } => url.to_string(),
        TagAssignmentTarget::Annotation { page_url, .. } => page_url.to_string(),
    }));

    Ok(urls)
}

/// Remove pages nobody interacted with, together with their visits and
/// favicon, and keep only the oldest `visit_limit` visits of other pages
pub async fn wipe_passive_data(
    storage: &dyn LocalStorage,
    visit_limit: usize,
) -> Result<PassiveDataWipe> {
    let pages: Vec<Page> = load(storage, LocalCollection::Pages).await?;
    let active = active_page_urls(storage).await?;

    let mut visits_by_page: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    let visits: Vec<Visit> = load(storage, LocalCollection::Visits).await?;
    for visit in visits {
        visits_by_page.entry(visit.url).or_default().push(visit.time);
    }

    let (kept, orphaned): (Vec<Page>, Vec<Page>) =
        pages.into_iter().partition(|page| active.contains(&page.url));
    let kept_hostnames: HashSet<&str> = kept.iter().map(|page| page.hostname.as_str()).collect();

    let mut page_keys = Vec::new();
    let mut visit_keys = Vec::new();
    let mut fav_icon_keys = Vec::new();
    let mut orphaned_hostnames = HashSet::new();

    for page in &orphaned {
        if let Some(times) = visits_by_page.get(&page.url) {
            visit_keys.extend(times.iter().map(|&time| ObjectKey::Visit {
                url: page.url.clone(),
                time,
            }));
        }
        if !page.hostname.is_empty()
            && !kept_hostnames.contains(page.hostname.as_str())
            && orphaned_hostnames.insert(page.hostname.as_str())
        {
            fav_icon_keys.push(ObjectKey::FavIcon {
                hostname: page.hostname.clone(),
            });
        }
        page_keys.push(ObjectKey::Page {
            url: page.url.clone(),
        });
    }

    for page in &kept {
        let Some(times) = visits_by_page.get_mut(&page.url) else {
            continue;
        };
        if times.len() <= visit_limit {
            continue;
        }
        times.sort_unstable();
        visit_keys.extend(times[visit_limit..].iter().map(|&time| ObjectKey::Visit {
            url: page.url.clone(),
            time,
        }));
    }

    let wipe = PassiveDataWipe {
        removed_visits: storage.remove_objects(&visit_keys).await?,
        removed_fav_icons: storage.remove_objects(&fav_icon_keys).await?,
        removed_pages: storage.remove_objects(&page_keys).await?,
    };
    tracing::info!(
        pages = wipe.removed_pages,
        visits = wipe.removed_visits,
        fav_icons = wipe.removed_fav_icons,
        "Wiped passive data"
    );
    Ok(wipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ClientStorageType;
    use crate::storage::{IncomingWrite, LibSqlLocalStorage};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;
    const ACTIVE_PAGE_URLS: [&str; 4] = ["a.com", "b.com", "c.com", "d.com"];
    const ORPHANED_PAGE_URLS: [&str; 4] = ["e.com", "f.com", "g.com", "h.com"];

    async fn put(storage: &LibSqlLocalStorage, collection: LocalCollection, object: Value) {
        storage
            .write_incoming_data(IncomingWrite {
                collection,
                where_: None,
                object,
            })
            .await
            .unwrap();
    }

    async fn storage_with_test_data() -> LibSqlLocalStorage {
        let db = Database::open_in_memory().await.unwrap().shared();
        let storage = LibSqlLocalStorage::new(db, ClientStorageType::Normal);

        for url in ACTIVE_PAGE_URLS.iter().chain(&ORPHANED_PAGE_URLS) {
            put(
                &storage,
                LocalCollection::Pages,
                json!({ "url": url, "fullUrl": format!("https://{url}"), "hostname": url }),
            )
            .await;
            put(&storage, LocalCollection::FavIcons, json!({ "hostname": url })).await;
            for offset in 0..4 {
                put(
                    &storage,
                    LocalCollection::Visits,
                    json!({ "url": url, "time": NOW - offset }),
                )
                .await;
            }
        }

        put(
            &storage,
            LocalCollection::Bookmarks,
            json!({ "url": ACTIVE_PAGE_URLS[0], "time": NOW }),
        )
        .await;
        put(
            &storage,
            LocalCollection::Annotations,
            json!({
                "url": format!("{}/#1234", ACTIVE_PAGE_URLS[1]),
                "pageUrl": ACTIVE_PAGE_URLS[1],
                "createdWhen": NOW,
            }),
        )
        .await;
        put(
            &storage,
            LocalCollection::PageListEntries,
            json!({
                "listId": 123,
                "pageUrl": ACTIVE_PAGE_URLS[2],
                "fullUrl": format!("https://{}", ACTIVE_PAGE_URLS[2]),
                "createdAt": NOW,
            }),
        )
        .await;
        put(
            &storage,
            LocalCollection::Tags,
            json!({ "name": "test-tag", "url": ACTIVE_PAGE_URLS[3] }),
        )
        .await;
        storage
    }

    async fn visit_times(storage: &LibSqlLocalStorage, url: &str) -> Vec<i64> {
        let visits: Vec<Visit> = load(storage, LocalCollection::Visits).await.unwrap();
        let mut times: Vec<i64> = visits
            .into_iter()
            .filter(|visit| visit.url == url)
            .map(|visit| visit.time)
            .collect();
        times.sort_unstable();
        times
    }

    async fn page_exists(storage: &LibSqlLocalStorage, url: &str) -> bool {
        let page = storage
            .get_object(&ObjectKey::Page {
                url: url.to_string(),
            })
            .await
            .unwrap();
        let fav_icon = storage
            .get_object(&ObjectKey::FavIcon {
                hostname: url.to_string(),
            })
            .await
            .unwrap();
        assert_eq!(page.is_some(), fav_icon.is_some(), "favicon of {url}");
        page.is_some()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wipe_keeps_pages_with_user_data() {
        let storage = storage_with_test_data().await;

        let wipe = wipe_passive_data(&storage, 100).await.unwrap();

        assert_eq!(
            wipe,
            PassiveDataWipe {
                removed_pages: 4,
                removed_visits: 16,
                removed_fav_icons: 4,
            }
        );
        for url in ACTIVE_PAGE_URLS {
            assert!(page_exists(&storage, url).await, "{url} should be kept");
            assert_eq!(
                visit_times(&storage, url).await,
                vec![NOW - 3, NOW - 2, NOW - 1, NOW]
            );
        }
        for url in ORPHANED_PAGE_URLS {
            assert!(!page_exists(&storage, url).await, "{url} should be removed");
            assert!(visit_times(&storage, url).await.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wipe_keeps_oldest_visits_over_limit() {
        let storage = storage_with_test_data().await;
        let later = NOW + 10;
        for url in &ACTIVE_PAGE_URLS[..2] {
            for offset in 0..10 {
                put(
                    &storage,
                    LocalCollection::Visits,
                    json!({ "url": url, "time": later - offset }),
                )
                .await;
            }
        }

        let wipe = wipe_passive_data(&storage, 4).await.unwrap();

        assert_eq!(wipe.removed_visits, 16 + 20);
        for url in ACTIVE_PAGE_URLS {
            assert_eq!(
                visit_times(&storage, url).await,
                vec![NOW - 3, NOW - 2, NOW - 1, NOW]
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_passive_data_detection_uses_cutoff() {
        let db = Database::open_in_memory().await.unwrap().shared();
        let storage = LibSqlLocalStorage::new(db, ClientStorageType::Normal);
        put(
            &storage,
            LocalCollection::Visits,
            json!({ "url": "a.com", "time": PASSIVE_DATA_CUTOFF + 1 }),
        )
        .await;
        assert!(!has_passive_data(&storage).await.unwrap());

        put(
            &storage,
            LocalCollection::Visits,
            json!({ "url": "a.com", "time": PASSIVE_DATA_CUTOFF }),
        )
        .await;
        assert!(has_passive_data(&storage).await.unwrap());
    }
}
