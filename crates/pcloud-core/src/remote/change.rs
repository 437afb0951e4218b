//! Append-only change log entries

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{DeviceId, LocalCollection, RemoteId, StoredContentType, UserId};

/// Remote record families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteCollection {
    ContentMetadata,
    ContentLocator,
    ContentRead,
    Bookmark,
    Tag,
    TagConnection,
    Annotation,
    AnnotationSelector,
    AnnotationPrivacyLevel,
    AnnotationShare,
    List,
    ListEntry,
    ListShare,
    TextTemplate,
    DeviceInfo,
    /// Media blobs, logged so that devices can pull stored page content
    Media,
}

impl RemoteCollection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContentMetadata => "personalContentMetadata",
            Self::ContentLocator => "personalContentLocator",
            Self::ContentRead => "personalContentRead",
            Self::Bookmark => "personalBookmark",
            Self::Tag => "personalTag",
            Self::TagConnection => "personalTagConnection",
            Self::Annotation => "personalAnnotation",
            Self::AnnotationSelector => "personalAnnotationSelector",
            Self::AnnotationPrivacyLevel => "personalAnnotationPrivacyLevel",
            Self::AnnotationShare => "personalAnnotationShare",
            Self::List => "personalList",
            Self::ListEntry => "personalListEntry",
            Self::ListShare => "personalListShare",
            Self::TextTemplate => "personalTextTemplate",
            Self::DeviceInfo => "personalDeviceInfo",
            Self::Media => "personalMedia",
        }
    }

    /// Local collection that changes of this family are pulled into, if any.
    #[must_use]
    pub const fn pulled_into(self) -> Option<LocalCollection> {
        match self {
            Self::ContentMetadata => Some(LocalCollection::Pages),
            Self::ContentRead => Some(LocalCollection::Visits),
            Self::Bookmark => Some(LocalCollection::Bookmarks),
            Self::TagConnection => Some(LocalCollection::Tags),
            Self::Annotation => Some(LocalCollection::Annotations),
            Self::AnnotationPrivacyLevel => Some(LocalCollection::AnnotationPrivacyLevels),
            Self::AnnotationShare => Some(LocalCollection::SharedAnnotationMetadata),
            Self::List => Some(LocalCollection::CustomLists),
            Self::ListEntry => Some(LocalCollection::PageListEntries),
            Self::ListShare => Some(LocalCollection::SharedListMetadata),
            Self::TextTemplate => Some(LocalCollection::Templates),
            Self::Media => Some(LocalCollection::DocContent),
            Self::ContentLocator
            | Self::Tag
            | Self::AnnotationSelector
            | Self::DeviceInfo => None,
        }
    }
}

impl fmt::Display for RemoteCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

/// Identifies a stored media blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChangeInfo {
    pub normalized_url: String,
    pub stored_content_type: StoredContentType,
    pub path: String,
}

/// Extra information stored with a change, enough to rebuild the local key
/// of a record that no longer exists remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChangeInfo {
    /// Content metadata and bookmarks
    ContentMetadata { normalized_url: String },
    ContentRead { normalized_url: String, read_when: i64 },
    TagConnection { name: String, url: String },
    /// Annotations and their privacy levels and shares
    Annotation { url: String },
    /// Lists and list shares
    List { local_id: i64 },
    ListEntry { list_id: i64, normalized_url: String },
    TextTemplate { local_id: i64 },
    Media(MediaChangeInfo),
}

/// One entry of the change log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChange {
    pub id: u64,
    /// Strictly increasing across all writes
    pub created_when: i64,
    pub created_by_device: DeviceId,
    pub user: UserId,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub collection: RemoteCollection,
    pub object_id: RemoteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ChangeInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn content_metadata_info_carries_normalized_url() {
        let info = ChangeInfo::ContentMetadata {
            normalized_url: "getmemexed.com/test".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({ "type": "contentMetadata", "normalizedUrl": "getmemexed.com/test" })
        );
    }

    #[test]
    fn structural_families_are_not_pulled() {
        assert_eq!(RemoteCollection::ContentLocator.pulled_into(), None);
        assert_eq!(RemoteCollection::AnnotationSelector.pulled_into(), None);
        assert_eq!(
            RemoteCollection::Media.pulled_into(),
            Some(LocalCollection::DocContent)
        );
    }
}
