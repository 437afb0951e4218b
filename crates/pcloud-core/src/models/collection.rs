//! Local collections observed by the sync core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SchemaVersion;
use crate::error::Error;

/// Which local database a collection lives in.
///
/// Persistent storage survives "clear browsing data" style wipes and holds
/// bulky page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStorageType {
    #[default]
    Normal,
    Persistent,
}

impl ClientStorageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Persistent => "persistent",
        }
    }
}

/// A local collection whose changes are pushed to, and pulled from, the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocalCollection {
    #[serde(rename = "pages")]
    Pages,
    #[serde(rename = "visits")]
    Visits,
    #[serde(rename = "bookmarks")]
    Bookmarks,
    #[serde(rename = "favIcons")]
    FavIcons,
    #[serde(rename = "annotations")]
    Annotations,
    #[serde(rename = "annotationPrivacyLevels")]
    AnnotationPrivacyLevels,
    #[serde(rename = "sharedAnnotationMetadata")]
    SharedAnnotationMetadata,
    #[serde(rename = "tags")]
    Tags,
    #[serde(rename = "customLists")]
    CustomLists,
    #[serde(rename = "pageListEntries")]
    PageListEntries,
    #[serde(rename = "sharedListMetadata")]
    SharedListMetadata,
    #[serde(rename = "templates")]
    Templates,
    #[serde(rename = "docContent")]
    DocContent,
}

impl LocalCollection {
    /// All collections, ordered so that every collection comes after the
    /// collections its objects reference.
    pub const ALL: [Self; 13] = [
        Self::Pages,
        Self::FavIcons,
        Self::DocContent,
        Self::Visits,
        Self::Bookmarks,
        Self::Annotations,
        Self::AnnotationPrivacyLevels,
        Self::SharedAnnotationMetadata,
        Self::CustomLists,
        Self::PageListEntries,
        Self::SharedListMetadata,
        Self::Tags,
        Self::Templates,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Visits => "visits",
            Self::Bookmarks => "bookmarks",
            Self::FavIcons => "favIcons",
            Self::Annotations => "annotations",
            Self::AnnotationPrivacyLevels => "annotationPrivacyLevels",
            Self::SharedAnnotationMetadata => "sharedAnnotationMetadata",
            Self::Tags => "tags",
            Self::CustomLists => "customLists",
            Self::PageListEntries => "pageListEntries",
            Self::SharedListMetadata => "sharedListMetadata",
            Self::Templates => "templates",
            Self::DocContent => "docContent",
        }
    }

    /// Storage the collection is kept in.
    #[must_use]
    pub const fn storage_type(self) -> ClientStorageType {
        match self {
            Self::DocContent => ClientStorageType::Persistent,
            _ => ClientStorageType::Normal,
        }
    }

    /// Fields forming the primary key, in key order.
    #[must_use]
    pub const fn pk_fields(self) -> &'static [&'static str] {
        match self {
            Self::Pages | Self::Bookmarks | Self::Annotations => &["url"],
            Self::Visits => &["url", "time"],
            Self::FavIcons => &["hostname"],
            Self::AnnotationPrivacyLevels => &["annotation"],
            Self::SharedAnnotationMetadata | Self::SharedListMetadata => &["localId"],
            Self::Tags => &["name", "url"],
            Self::CustomLists | Self::Templates => &["id"],
            Self::PageListEntries => &["listId", "pageUrl"],
            Self::DocContent => &["normalizedUrl", "storedContentType"],
        }
    }

    /// Fields derived on this device that never travel through the cloud:
    /// search terms, raw page text and favicon image data.
    #[must_use]
    pub fn is_device_local_field(self, field: &str) -> bool {
        let terms = field == "terms" || field.ends_with("Terms") || field.ends_with("_terms");
        terms
            || matches!(
                (self, field),
                (Self::Pages, "text") | (Self::FavIcons, "favIcon")
            )
    }

    /// Fields a pulled overwrite leaves in place when it does not carry them.
    ///
    /// Stored page content arrives as media and may fail to download.
    #[must_use]
    pub fn is_kept_on_pull(self, field: &str) -> bool {
        self.is_device_local_field(field) || matches!((self, field), (Self::DocContent, "content"))
    }

    /// Local schema version that introduced the collection.
    #[must_use]
    pub const fn introduced_in(self) -> SchemaVersion {
        match self {
            Self::AnnotationPrivacyLevels | Self::Templates | Self::DocContent => {
                SchemaVersion::V25
            }
            _ => SchemaVersion::V24,
        }
    }
}

impl fmt::Display for LocalCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalCollection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == s)
            .ok_or_else(|| Error::UnknownCollection(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_roundtrip() {
        for collection in LocalCollection::ALL {
            let parsed: LocalCollection = collection.as_str().parse().unwrap();
            assert_eq!(parsed, collection);
            assert_eq!(
                serde_json::to_value(collection).unwrap(),
                serde_json::Value::String(collection.as_str().to_string())
            );
        }
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let err = "personalCloudAction".parse::<LocalCollection>().unwrap_err();
        assert!(matches!(err, Error::UnknownCollection(name) if name == "personalCloudAction"));
    }

    #[test]
    fn doc_content_lives_in_persistent_storage() {
        assert_eq!(
            LocalCollection::DocContent.storage_type(),
            ClientStorageType::Persistent
        );
        assert_eq!(
            LocalCollection::Pages.storage_type(),
            ClientStorageType::Normal
        );
    }

    #[test]
    fn dependent_collections_come_after_pages() {
        let position = |c: LocalCollection| {
            LocalCollection::ALL
                .iter()
                .position(|candidate| *candidate == c)
                .unwrap()
        };
        assert!(position(LocalCollection::Pages) < position(LocalCollection::Visits));
        assert!(position(LocalCollection::Annotations) < position(LocalCollection::Tags));
        assert!(
            position(LocalCollection::CustomLists) < position(LocalCollection::PageListEntries)
        );
    }
}
