//! Local schema models observed by the sync core

mod annotation;
mod collection;
mod content;
mod ids;
mod key;
mod list;
mod page;
mod tag;
mod template;

pub use annotation::{
    is_annotation_url, split_annotation_url, Annotation, AnnotationPrivacyLevel,
    SharedAnnotationMetadata,
};
pub use collection::{ClientStorageType, LocalCollection};
pub use content::{DocContent, StoredContentType};
pub use ids::{DeviceId, RemoteId, SchemaVersion, UserId};
pub use key::ObjectKey;
pub use list::{CustomList, PageListEntry, SharedListMetadata};
pub use page::{Bookmark, FavIcon, Page, UrlParts, Visit};
pub use tag::{TagAssignment, TagAssignmentTarget};
pub use template::TextTemplate;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// A local object parsed into the typed shape of its collection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LocalObject {
    Page(Page),
    Visit(Visit),
    Bookmark(Bookmark),
    FavIcon(FavIcon),
    Annotation(Annotation),
    AnnotationPrivacyLevel(AnnotationPrivacyLevel),
    SharedAnnotationMetadata(SharedAnnotationMetadata),
    Tag(TagAssignment),
    CustomList(CustomList),
    PageListEntry(PageListEntry),
    SharedListMetadata(SharedListMetadata),
    TextTemplate(TextTemplate),
    DocContent(DocContent),
}

impl LocalObject {
    /// Parse a stored JSON object as a member of `collection`.
    pub fn parse(collection: LocalCollection, object: Value) -> Result<Self> {
        use serde_json::from_value;

        let parsed = match collection {
            LocalCollection::Pages => Self::Page(from_value(object)?),
            LocalCollection::Visits => Self::Visit(from_value(object)?),
            LocalCollection::Bookmarks => Self::Bookmark(from_value(object)?),
            LocalCollection::FavIcons => Self::FavIcon(from_value(object)?),
            LocalCollection::Annotations => Self::Annotation(from_value(object)?),
            LocalCollection::AnnotationPrivacyLevels => {
                Self::AnnotationPrivacyLevel(from_value(object)?)
            }
            LocalCollection::SharedAnnotationMetadata => {
                Self::SharedAnnotationMetadata(from_value(object)?)
            }
            LocalCollection::Tags => Self::Tag(from_value(object)?),
            LocalCollection::CustomLists => Self::CustomList(from_value(object)?),
            LocalCollection::PageListEntries => Self::PageListEntry(from_value(object)?),
            LocalCollection::SharedListMetadata => Self::SharedListMetadata(from_value(object)?),
            LocalCollection::Templates => Self::TextTemplate(from_value(object)?),
            LocalCollection::DocContent => Self::DocContent(from_value(object)?),
        };
        Ok(parsed)
    }

    #[must_use]
    pub const fn collection(&self) -> LocalCollection {
        match self {
            Self::Page(_) => LocalCollection::Pages,
            Self::Visit(_) => LocalCollection::Visits,
            Self::Bookmark(_) => LocalCollection::Bookmarks,
            Self::FavIcon(_) => LocalCollection::FavIcons,
            Self::Annotation(_) => LocalCollection::Annotations,
            Self::AnnotationPrivacyLevel(_) => LocalCollection::AnnotationPrivacyLevels,
            Self::SharedAnnotationMetadata(_) => LocalCollection::SharedAnnotationMetadata,
            Self::Tag(_) => LocalCollection::Tags,
            Self::CustomList(_) => LocalCollection::CustomLists,
            Self::PageListEntry(_) => LocalCollection::PageListEntries,
            Self::SharedListMetadata(_) => LocalCollection::SharedListMetadata,
            Self::TextTemplate(_) => LocalCollection::Templates,
            Self::DocContent(_) => LocalCollection::DocContent,
        }
    }

    /// Primary key of the object
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Page(page) => ObjectKey::Page {
                url: page.url.clone(),
            },
            Self::Visit(visit) => ObjectKey::Visit {
                url: visit.url.clone(),
                time: visit.time,
            },
            Self::Bookmark(bookmark) => ObjectKey::Bookmark {
                url: bookmark.url.clone(),
            },
            Self::FavIcon(icon) => ObjectKey::FavIcon {
                hostname: icon.hostname.clone(),
            },
            Self::Annotation(annotation) => ObjectKey::Annotation {
                url: annotation.url.clone(),
            },
            Self::AnnotationPrivacyLevel(level) => ObjectKey::AnnotationPrivacyLevel {
                annotation: level.annotation.clone(),
            },
            Self::SharedAnnotationMetadata(meta) => ObjectKey::SharedAnnotationMetadata {
                local_id: meta.local_id.clone(),
            },
            Self::Tag(tag) => ObjectKey::Tag {
                name: tag.name.clone(),
                url: tag.url.clone(),
            },
            Self::CustomList(list) => ObjectKey::CustomList { id: list.id },
            Self::PageListEntry(entry) => ObjectKey::PageListEntry {
                list_id: entry.list_id,
                page_url: entry.page_url.clone(),
            },
            Self::SharedListMetadata(meta) => ObjectKey::SharedListMetadata {
                local_id: meta.local_id,
            },
            Self::TextTemplate(template) => ObjectKey::TextTemplate { id: template.id },
            Self::DocContent(content) => ObjectKey::DocContent {
                normalized_url: content.normalized_url.clone(),
                stored_content_type: content.stored_content_type,
            },
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_checks_collection_shape() {
        let visit = LocalObject::parse(
            LocalCollection::Visits,
            json!({ "url": "getmemexed.com/test", "time": 4545, "duration": 1122 }),
        )
        .unwrap();
        assert_eq!(visit.collection(), LocalCollection::Visits);
        assert_eq!(
            visit.key(),
            ObjectKey::Visit {
                url: "getmemexed.com/test".to_string(),
                time: 4545
            }
        );

        let err = LocalObject::parse(LocalCollection::Visits, json!({ "url": "x" }));
        assert!(err.is_err());
    }

    #[test]
    fn key_matches_object_key_fields() {
        let object = json!({ "name": "foo-tag", "url": "getmemexed.com/test" });
        let parsed = LocalObject::parse(LocalCollection::Tags, object.clone()).unwrap();
        assert_eq!(
            parsed.key(),
            ObjectKey::of_object(LocalCollection::Tags, &object).unwrap()
        );
        assert_eq!(parsed.to_value().unwrap(), object);
    }
}
