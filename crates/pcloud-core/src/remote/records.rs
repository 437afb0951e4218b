//! Device-agnostic remote record families

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::change::RemoteCollection;
use super::dataset::{RemoteDataset, Table};
use crate::models::{DeviceId, RemoteId, UserId};

/// Fields stamped on every remote record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMeta {
    pub id: RemoteId,
    pub user: UserId,
    pub created_by_device: DeviceId,
    pub created_when: i64,
    pub updated_when: i64,
}

/// A stored remote record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record<T> {
    #[serde(flatten)]
    pub meta: RemoteMeta,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Record<T> {
    #[must_use]
    pub const fn id(&self) -> RemoteId {
        self.meta.id
    }
}

/// A record family stored in its own table of the [`RemoteDataset`]
pub trait RemoteRecord: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const COLLECTION: RemoteCollection;

    fn table(dataset: &RemoteDataset) -> &Table<Self>;
    fn table_mut(dataset: &mut RemoteDataset) -> &mut Table<Self>;
}

macro_rules! remote_record {
    ($ty:ty, $collection:ident, $field:ident) => {
        impl RemoteRecord for $ty {
            const COLLECTION: RemoteCollection = RemoteCollection::$collection;

            fn table(dataset: &RemoteDataset) -> &Table<Self> {
                &dataset.$field
            }

            fn table_mut(dataset: &mut RemoteDataset) -> &mut Table<Self> {
                &mut dataset.$field
            }
        }
    };
}

/// One unit of content, independent of where it was found
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub lang: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationScheme {
    NormalizedUrlV1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Html,
    Pdf,
}

impl ContentFormat {
    /// Guess the format from the URL a page was loaded from.
    #[must_use]
    pub fn of_url(full_url: &str) -> Self {
        let path = full_url.split(['?', '#']).next().unwrap_or(full_url);
        if path.to_lowercase().ends_with(".pdf") {
            Self::Pdf
        } else {
            Self::Html
        }
    }
}

/// A physical location of some content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLocator {
    pub personal_content_metadata: RemoteId,
    pub location_scheme: LocationScheme,
    pub format: ContentFormat,
    /// Normalized URL
    pub location: String,
    pub original_location: String,
    pub version: i64,
    pub valid: bool,
    pub primary: bool,
    pub last_visited: i64,
}

/// A visit of some content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRead {
    pub personal_content_metadata: RemoteId,
    pub personal_content_locator: RemoteId,
    pub read_when: i64,
    pub read_duration: Option<i64>,
    pub progress_percentage: Option<f64>,
    pub max_progress_percentage: Option<f64>,
    pub scroll_total: Option<f64>,
    pub scroll_progress: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub personal_content_metadata: RemoteId,
    pub bookmarked_when: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,
}

/// Record a tag connection points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "collection", content = "objectId", rename_all = "camelCase")]
pub enum TagTarget {
    ContentMetadata(RemoteId),
    Annotation(RemoteId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagConnection {
    pub personal_tag: RemoteId,
    #[serde(flatten)]
    pub target: TagTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub personal_content_metadata: RemoteId,
    /// Id part of the local annotation URL
    pub local_id: String,
    pub body: Option<String>,
    pub comment: Option<String>,
    pub local_created_when: i64,
    pub local_last_edited: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationSelector {
    pub personal_annotation: RemoteId,
    pub selector: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationPrivacyLevel {
    pub personal_annotation: RemoteId,
    pub privacy_level: i32,
    pub local_created_when: i64,
    pub local_updated_when: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationShare {
    pub personal_annotation: RemoteId,
    pub remote_id: String,
    pub exclude_from_lists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub local_id: i64,
    pub name: String,
    pub is_deletable: bool,
    pub is_nestable: bool,
    pub local_created_when: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub personal_list: RemoteId,
    pub personal_content_metadata: RemoteId,
    pub full_url: String,
    pub local_created_when: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListShare {
    pub personal_list: RemoteId,
    pub remote_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextTemplate {
    pub local_id: i64,
    pub title: String,
    pub code: String,
    pub is_favourite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub product_type: String,
}

remote_record!(ContentMetadata, ContentMetadata, content_metadata);
remote_record!(ContentLocator, ContentLocator, content_locators);
remote_record!(ContentRead, ContentRead, content_reads);
remote_record!(Bookmark, Bookmark, bookmarks);
remote_record!(Tag, Tag, tags);
remote_record!(TagConnection, TagConnection, tag_connections);
remote_record!(Annotation, Annotation, annotations);
remote_record!(AnnotationSelector, AnnotationSelector, annotation_selectors);
remote_record!(AnnotationPrivacyLevel, AnnotationPrivacyLevel, annotation_privacy_levels);
remote_record!(AnnotationShare, AnnotationShare, annotation_shares);
remote_record!(List, List, lists);
remote_record!(ListEntry, ListEntry, list_entries);
remote_record!(ListShare, ListShare, list_shares);
remote_record!(TextTemplate, TextTemplate, text_templates);
remote_record!(DeviceInfo, DeviceInfo, devices);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn content_format_follows_url_extension() {
        assert_eq!(ContentFormat::of_url("https://x.com/paper.PDF?dl=1"), ContentFormat::Pdf);
        assert_eq!(ContentFormat::of_url("https://x.com/pdf"), ContentFormat::Html);
    }

    #[test]
    fn tag_connection_serializes_polymorphic_target() {
        let connection = TagConnection {
            personal_tag: RemoteId::new(1),
            target: TagTarget::Annotation(RemoteId::new(4)),
        };
        assert_eq!(
            serde_json::to_value(&connection).unwrap(),
            json!({ "personalTag": 1, "collection": "annotation", "objectId": 4 })
        );
    }
}
