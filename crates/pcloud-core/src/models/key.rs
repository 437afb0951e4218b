//! Typed primary-key predicates for local objects
//!
//! Every local collection has a small, fixed key shape. Deletes travel through
//! the sync pipeline as one of these values instead of an open-ended map, so a
//! delete can always be matched back to exactly one local row.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{LocalCollection, StoredContentType};
use crate::error::{Error, Result};

/// Where-clause identifying a single local object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ObjectKey {
    Page { url: String },
    Visit { url: String, time: i64 },
    Bookmark { url: String },
    FavIcon { hostname: String },
    Annotation { url: String },
    AnnotationPrivacyLevel { annotation: String },
    SharedAnnotationMetadata { local_id: String },
    Tag { name: String, url: String },
    CustomList { id: i64 },
    PageListEntry { list_id: i64, page_url: String },
    SharedListMetadata { local_id: i64 },
    TextTemplate { id: i64 },
    DocContent {
        normalized_url: String,
        stored_content_type: StoredContentType,
    },
}

impl ObjectKey {
    /// Collection the keyed object lives in.
    #[must_use]
    pub const fn collection(&self) -> LocalCollection {
        match self {
            Self::Page { .. } => LocalCollection::Pages,
            Self::Visit { .. } => LocalCollection::Visits,
            Self::Bookmark { .. } => LocalCollection::Bookmarks,
            Self::FavIcon { .. } => LocalCollection::FavIcons,
            Self::Annotation { .. } => LocalCollection::Annotations,
            Self::AnnotationPrivacyLevel { .. } => LocalCollection::AnnotationPrivacyLevels,
            Self::SharedAnnotationMetadata { .. } => LocalCollection::SharedAnnotationMetadata,
            Self::Tag { .. } => LocalCollection::Tags,
            Self::CustomList { .. } => LocalCollection::CustomLists,
            Self::PageListEntry { .. } => LocalCollection::PageListEntries,
            Self::SharedListMetadata { .. } => LocalCollection::SharedListMetadata,
            Self::TextTemplate { .. } => LocalCollection::Templates,
            Self::DocContent { .. } => LocalCollection::DocContent,
        }
    }

    /// Build the key from a primary-key value as emitted in storage change
    /// events: a scalar for single-field keys, an array for compound keys.
    pub fn from_pk(collection: LocalCollection, pk: &Value) -> Result<Self> {
        let invalid = || {
            Error::InvalidInput(format!(
                "primary key {pk} does not match the key of {collection}"
            ))
        };
        let text = |value: &Value| value.as_str().map(ToString::to_string);
        let pair = || match pk.as_array().map(Vec::as_slice) {
            Some([first, second]) => Some((first.clone(), second.clone())),
            _ => None,
        };

        let key = match collection {
            LocalCollection::Pages => Self::Page {
                url: text(pk).ok_or_else(invalid)?,
            },
            LocalCollection::Bookmarks => Self::Bookmark {
                url: text(pk).ok_or_else(invalid)?,
            },
            LocalCollection::Annotations => Self::Annotation {
                url: text(pk).ok_or_else(invalid)?,
            },
            LocalCollection::FavIcons => Self::FavIcon {
                hostname: text(pk).ok_or_else(invalid)?,
            },
            LocalCollection::AnnotationPrivacyLevels => Self::AnnotationPrivacyLevel {
                annotation: text(pk).ok_or_else(invalid)?,
            },
            LocalCollection::SharedAnnotationMetadata => Self::SharedAnnotationMetadata {
                local_id: text(pk).ok_or_else(invalid)?,
            },
            LocalCollection::CustomLists => Self::CustomList {
                id: pk.as_i64().ok_or_else(invalid)?,
            },
            LocalCollection::SharedListMetadata => Self::SharedListMetadata {
                local_id: pk.as_i64().ok_or_else(invalid)?,
            },
            LocalCollection::Templates => Self::TextTemplate {
                id: pk.as_i64().ok_or_else(invalid)?,
            },
            LocalCollection::Visits => {
                let (url, time) = pair().ok_or_else(invalid)?;
                Self::Visit {
                    url: text(&url).ok_or_else(invalid)?,
                    time: time.as_i64().ok_or_else(invalid)?,
                }
            }
            LocalCollection::Tags => {
                let (name, url) = pair().ok_or_else(invalid)?;
                Self::Tag {
                    name: text(&name).ok_or_else(invalid)?,
                    url: text(&url).ok_or_else(invalid)?,
                }
            }
            LocalCollection::PageListEntries => {
                let (list_id, page_url) = pair().ok_or_else(invalid)?;
                Self::PageListEntry {
                    list_id: list_id.as_i64().ok_or_else(invalid)?,
                    page_url: text(&page_url).ok_or_else(invalid)?,
                }
            }
            LocalCollection::DocContent => {
                let (normalized_url, content_type) = pair().ok_or_else(invalid)?;
                Self::DocContent {
                    normalized_url: text(&normalized_url).ok_or_else(invalid)?,
                    stored_content_type: serde_json::from_value(content_type)
                        .map_err(|_| invalid())?,
                }
            }
        };
        Ok(key)
    }

    /// Read the key fields out of a full local object.
    pub fn of_object(collection: LocalCollection, object: &Value) -> Result<Self> {
        let fields = collection.pk_fields();
        let pk = if let [field] = fields {
            object.get(*field).cloned()
        } else {
            fields
                .iter()
                .map(|field| object.get(*field).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        };
        let pk = pk.ok_or_else(|| {
            Error::InvalidInput(format!(
                "{collection} object is missing one of its key fields {fields:?}"
            ))
        })?;
        Self::from_pk(collection, &pk)
    }

    /// Inverse of [`ObjectKey::from_pk`].
    #[must_use]
    pub fn pk(&self) -> Value {
        match self {
            Self::Page { url } | Self::Bookmark { url } | Self::Annotation { url } => json!(url),
            Self::FavIcon { hostname } => json!(hostname),
            Self::AnnotationPrivacyLevel { annotation } => json!(annotation),
            Self::SharedAnnotationMetadata { local_id } => json!(local_id),
            Self::CustomList { id } | Self::TextTemplate { id } => json!(id),
            Self::SharedListMetadata { local_id } => json!(local_id),
            Self::Visit { url, time } => json!([url, time]),
            Self::Tag { name, url } => json!([name, url]),
            Self::PageListEntry { list_id, page_url } => json!([list_id, page_url]),
            Self::DocContent {
                normalized_url,
                stored_content_type,
            } => json!([normalized_url, stored_content_type]),
        }
    }

    /// Canonical text form of the key, used as the storage row key.
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.pk().to_string()
    }
}
