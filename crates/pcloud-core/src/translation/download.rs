//! Remote to local: turn change log entries into local updates

use serde::Serialize;
use std::collections::BTreeMap;

use super::lookup::{annotation_url, normalized_locator, normalized_url};
use super::{CloudUpdate, MediaReference, MediaType};
use crate::error::Result;
use crate::models::{
    self, LocalCollection, ObjectKey, RemoteId, SchemaVersion, StoredContentType, UrlParts, UserId,
};
use crate::remote::{
    Annotation, AnnotationPrivacyLevel, AnnotationSelector, AnnotationShare, Bookmark, ChangeInfo,
    ChangeKind, ContentLocator, ContentMetadata, ContentRead, DataChange, List, ListEntry,
    ListShare, RemoteCollection, RemoteDataset, Tag, TagConnection, TagTarget, TextTemplate,
};

/// Change log entries scanned per download
pub const DOWNLOAD_CHANGE_BATCH_SIZE: usize = 1000;

/// One page of pulled updates
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedUpdates {
    pub batch: Vec<CloudUpdate>,
    /// `createdWhen` of the last scanned change, or the start time when
    /// nothing was scanned
    pub last_seen: i64,
    pub may_have_more: bool,
}

/// Build the local updates for up to `batch_size` changes of `user` newer
/// than `start_time`.
///
/// Overwrites are built from the current remote record and skipped when it
/// no longer exists; a later delete entry covers that case. Changes to
/// collections the client's schema predates are withheld.
pub fn download_client_updates(
    dataset: &RemoteDataset,
    user: &UserId,
    start_time: i64,
    client_schema_version: SchemaVersion,
    batch_size: usize,
) -> Result<DownloadedUpdates> {
    let changes = dataset.changes_since(user, start_time, batch_size);
    let last_seen = changes
        .last()
        .map_or(start_time, |change| change.created_when);
    let may_have_more = changes.len() == batch_size;

    let download = Download { dataset, user };
    let mut batch = Vec::new();
    for change in changes {
        let Some(local) = change.collection.pulled_into() else {
            continue;
        };
        if local.introduced_in() > client_schema_version {
            continue;
        }
        let update = match change.kind {
            ChangeKind::Create | ChangeKind::Modify => download.overwrite(change)?,
            ChangeKind::Delete => change
                .info
                .as_ref()
                .and_then(|info| deleted_key(change.collection, info))
                .map(CloudUpdate::delete),
        };
        if let Some(update) = update {
            batch.push(update);
        }
    }

    Ok(DownloadedUpdates {
        batch,
        last_seen,
        may_have_more,
    })
}

/// Local key of a record deleted remotely
fn deleted_key(collection: RemoteCollection, info: &ChangeInfo) -> Option<ObjectKey> {
    let key = match (collection, info) {
        (RemoteCollection::ContentMetadata, ChangeInfo::ContentMetadata { normalized_url }) => {
            ObjectKey::Page {
                url: normalized_url.clone(),
            }
        }
        (RemoteCollection::Bookmark, ChangeInfo::ContentMetadata { normalized_url }) => {
            ObjectKey::Bookmark {
                url: normalized_url.clone(),
            }
        }
        (
            RemoteCollection::ContentRead,
            ChangeInfo::ContentRead {
                normalized_url,
                read_when,
            },
        ) => ObjectKey::Visit {
            url: normalized_url.clone(),
            time: *read_when,
        },
        (RemoteCollection::TagConnection, ChangeInfo::TagConnection { name, url }) => {
            ObjectKey::Tag {
                name: name.clone(),
                url: url.clone(),
            }
        }
        (RemoteCollection::Annotation, ChangeInfo::Annotation { url }) => {
            ObjectKey::Annotation { url: url.clone() }
        }
        (RemoteCollection::AnnotationPrivacyLevel, ChangeInfo::Annotation { url }) => {
            ObjectKey::AnnotationPrivacyLevel {
                annotation: url.clone(),
            }
        }
        (RemoteCollection::AnnotationShare, ChangeInfo::Annotation { url }) => {
            ObjectKey::SharedAnnotationMetadata {
                local_id: url.clone(),
            }
        }
        (RemoteCollection::List, ChangeInfo::List { local_id }) => {
            ObjectKey::CustomList { id: *local_id }
        }
        (RemoteCollection::ListShare, ChangeInfo::List { local_id }) => {
            ObjectKey::SharedListMetadata {
                local_id: *local_id,
            }
        }
        (
            RemoteCollection::ListEntry,
            ChangeInfo::ListEntry {
                list_id,
                normalized_url,
            },
        ) => ObjectKey::PageListEntry {
            list_id: *list_id,
            page_url: normalized_url.clone(),
        },
        (RemoteCollection::TextTemplate, ChangeInfo::TextTemplate { local_id }) => {
            ObjectKey::TextTemplate { id: *local_id }
        }
        (RemoteCollection::Media, ChangeInfo::Media(media)) => ObjectKey::DocContent {
            normalized_url: media.normalized_url.clone(),
            stored_content_type: media.stored_content_type,
        },
        _ => return None,
    };
    Some(key)
}

struct Download<'a> {
    dataset: &'a RemoteDataset,
    user: &'a UserId,
}

impl Download<'_> {
    fn overwrite(&self, change: &DataChange) -> Result<Option<CloudUpdate>> {
        let id = change.object_id;
        let object = match change.collection {
            RemoteCollection::ContentMetadata => to_value(self.page(id))?,
            RemoteCollection::ContentRead => to_value(self.visit(id))?,
            RemoteCollection::Bookmark => to_value(self.bookmark(id))?,
            RemoteCollection::TagConnection => to_value(self.tag(id))?,
            RemoteCollection::Annotation => to_value(self.annotation(id))?,
            RemoteCollection::AnnotationPrivacyLevel => to_value(self.privacy_level(id))?,
            RemoteCollection::AnnotationShare => to_value(self.annotation_share(id))?,
            RemoteCollection::List => to_value(self.list(id))?,
            RemoteCollection::ListEntry => to_value(self.list_entry(id))?,
            RemoteCollection::ListShare => to_value(self.list_share(id))?,
            RemoteCollection::TextTemplate => to_value(self.text_template(id))?,
            RemoteCollection::Media => return Ok(self.media(change)),
            RemoteCollection::ContentLocator
            | RemoteCollection::Tag
            | RemoteCollection::AnnotationSelector
            | RemoteCollection::DeviceInfo => None,
        };
        let Some(object) = object else {
            return Ok(None);
        };
        let Some(collection) = change.collection.pulled_into() else {
            return Ok(None);
        };
        Ok(Some(CloudUpdate::overwrite(collection, object)))
    }

    fn normalized_url(&self, metadata: RemoteId) -> Option<String> {
        normalized_url(self.dataset, self.user, metadata)
    }

    fn annotation_url(&self, annotation: RemoteId) -> Option<String> {
        let annotation = self.dataset.get::<Annotation>(self.user, annotation)?;
        annotation_url(self.dataset, self.user, &annotation.data)
    }

    fn list_local_id(&self, list: RemoteId) -> Option<i64> {
        self.dataset
            .get::<List>(self.user, list)
            .map(|list| list.data.local_id)
    }

    fn page(&self, id: RemoteId) -> Option<models::Page> {
        let metadata = self.dataset.get::<ContentMetadata>(self.user, id)?;
        let locator = normalized_locator(self.dataset, self.user, id)?;
        let ContentLocator {
            location,
            original_location,
            ..
        } = locator.data.clone();
        let parts = UrlParts::extract(&original_location);
        let metadata = metadata.data.clone();
        Some(models::Page {
            url: location,
            domain: parts.as_ref().map(|p| p.domain.clone()).unwrap_or_default(),
            hostname: parts.map(|p| p.hostname).unwrap_or_default(),
            full_url: original_location,
            full_title: metadata.title,
            text: None,
            lang: metadata.lang,
            canonical_url: metadata.canonical_url,
            description: metadata.description,
        })
    }

    fn visit(&self, id: RemoteId) -> Option<models::Visit> {
        let read = &self.dataset.get::<ContentRead>(self.user, id)?.data;
        let url = self
            .dataset
            .get::<ContentLocator>(self.user, read.personal_content_locator)
            .map(|locator| locator.data.location.clone())
            .or_else(|| self.normalized_url(read.personal_content_metadata))?;
        Some(models::Visit {
            url,
            time: read.read_when,
            duration: read.read_duration,
            scroll_max_perc: read.max_progress_percentage,
            scroll_max_px: read.scroll_total,
            scroll_perc: read.progress_percentage,
            scroll_px: read.scroll_progress,
        })
    }

    fn bookmark(&self, id: RemoteId) -> Option<models::Bookmark> {
        let bookmark = &self.dataset.get::<Bookmark>(self.user, id)?.data;
        Some(models::Bookmark {
            url: self.normalized_url(bookmark.personal_content_metadata)?,
            time: bookmark.bookmarked_when,
        })
    }

    fn tag(&self, id: RemoteId) -> Option<models::TagAssignment> {
        let connection = &self.dataset.get::<TagConnection>(self.user, id)?.data;
        let tag = self.dataset.get::<Tag>(self.user, connection.personal_tag)?;
        let url = match connection.target {
            TagTarget::ContentMetadata(metadata) => self.normalized_url(metadata)?,
            TagTarget::Annotation(annotation) => self.annotation_url(annotation)?,
        };
        Some(models::TagAssignment::new(tag.data.name.clone(), url))
    }

    fn annotation(&self, id: RemoteId) -> Option<models::Annotation> {
        let annotation = &self.dataset.get::<Annotation>(self.user, id)?.data;
        let page_url = self.normalized_url(annotation.personal_content_metadata)?;
        let page_title = self
            .dataset
            .get::<ContentMetadata>(self.user, annotation.personal_content_metadata)
            .and_then(|metadata| metadata.data.title.clone());
        let selector = self
            .dataset
            .find::<AnnotationSelector>(self.user, |selector| selector.personal_annotation == id)
            .map(|selector| selector.data.selector.clone());
        Some(models::Annotation {
            url: format!("{page_url}/#{}", annotation.local_id),
            page_url,
            page_title,
            body: annotation.body.clone(),
            comment: annotation.comment.clone(),
            selector,
            created_when: annotation.local_created_when,
            last_edited: annotation.local_last_edited,
        })
    }

    fn privacy_level(&self, id: RemoteId) -> Option<models::AnnotationPrivacyLevel> {
        let level = &self.dataset.get::<AnnotationPrivacyLevel>(self.user, id)?.data;
        Some(models::AnnotationPrivacyLevel {
            annotation: self.annotation_url(level.personal_annotation)?,
            privacy_level: level.privacy_level,
            created_when: level.local_created_when,
            updated_when: level.local_updated_when,
        })
    }

    fn annotation_share(&self, id: RemoteId) -> Option<models::SharedAnnotationMetadata> {
        let share = &self.dataset.get::<AnnotationShare>(self.user, id)?.data;
        Some(models::SharedAnnotationMetadata {
            local_id: self.annotation_url(share.personal_annotation)?,
            remote_id: share.remote_id.clone(),
            exclude_from_lists: share.exclude_from_lists,
        })
    }

    fn list(&self, id: RemoteId) -> Option<models::CustomList> {
        let list = &self.dataset.get::<List>(self.user, id)?.data;
        Some(models::CustomList {
            id: list.local_id,
            name: list.name.clone(),
            is_deletable: list.is_deletable,
            is_nestable: list.is_nestable,
            created_at: list.local_created_when,
        })
    }

    fn list_entry(&self, id: RemoteId) -> Option<models::PageListEntry> {
        let entry = &self.dataset.get::<ListEntry>(self.user, id)?.data;
        Some(models::PageListEntry {
            list_id: self.list_local_id(entry.personal_list)?,
            page_url: self.normalized_url(entry.personal_content_metadata)?,
            full_url: entry.full_url.clone(),
            created_at: entry.local_created_when,
        })
    }

    fn list_share(&self, id: RemoteId) -> Option<models::SharedListMetadata> {
        let share = &self.dataset.get::<ListShare>(self.user, id)?.data;
        Some(models::SharedListMetadata {
            local_id: self.list_local_id(share.personal_list)?,
            remote_id: share.remote_id.clone(),
        })
    }

    fn text_template(&self, id: RemoteId) -> Option<models::TextTemplate> {
        let template = &self.dataset.get::<TextTemplate>(self.user, id)?.data;
        Some(models::TextTemplate {
            id: template.local_id,
            title: template.title.clone(),
            code: template.code.clone(),
            is_favourite: template.is_favourite,
        })
    }

    /// Stored page content, delivered as a persistent-storage overwrite whose
    /// content field is fetched from media storage.
    fn media(&self, change: &DataChange) -> Option<CloudUpdate> {
        let Some(ChangeInfo::Media(info)) = &change.info else {
            return None;
        };
        // Replaced blobs are covered by the later change that replaced them
        self.dataset.get_media(&info.path)?;

        let key = ObjectKey::DocContent {
            normalized_url: info.normalized_url.clone(),
            stored_content_type: info.stored_content_type,
        };
        let media_type = match info.stored_content_type {
            StoredContentType::HtmlBody => MediaType::Text,
            StoredContentType::PdfContent => MediaType::Json,
        };
        Some(CloudUpdate::Overwrite {
            collection: LocalCollection::DocContent,
            storage: LocalCollection::DocContent.storage_type(),
            object: serde_json::json!({
                "normalizedUrl": info.normalized_url,
                "storedContentType": info.stored_content_type,
            }),
            where_: Some(key),
            media: BTreeMap::from([(
                "content".to_string(),
                MediaReference {
                    path: info.path.clone(),
                    media_type,
                },
            )]),
        })
    }
}

/// Serialize an optional typed local object
fn to_value<T: Serialize>(object: Option<T>) -> Result<Option<serde_json::Value>> {
    Ok(object.map(serde_json::to_value).transpose()?)
}
