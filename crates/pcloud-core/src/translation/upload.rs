//! Local to remote: apply one pushed update to the remote dataset
//!
//! Updates come from clients and are not trusted: every lookup and write is
//! scoped to the pushing user, and overwrites are upserts keyed by natural
//! identity so that a retried push never duplicates records.

use uuid::Uuid;

use super::lookup::{annotation_url, find_annotation, find_content, normalized_url, ContentRef};
use super::{ClientInstruction, PushChange, PushUpdate};
use crate::error::{Error, Result};
use crate::models::{
    self, ClientStorageType, LocalCollection, LocalObject, ObjectKey, RemoteId, SchemaVersion,
    StoredContentType, TagAssignment, TagAssignmentTarget, UserId,
};
use crate::remote::{
    Annotation, AnnotationPrivacyLevel, AnnotationSelector, AnnotationShare, Author, Bookmark,
    ChangeInfo, ContentFormat, ContentLocator, ContentMetadata, ContentRead, List, ListEntry,
    ListShare, LocationScheme, MediaChangeInfo, RemoteDataset, RemoteRecord, Tag, TagConnection,
    TagTarget, TextTemplate,
};

/// Apply a pushed update on behalf of `user`.
///
/// Returns the instructions the pushing client must carry out afterwards,
/// such as uploading stored page content as a media blob.
pub fn upload_client_update(
    dataset: &mut RemoteDataset,
    user: &UserId,
    update: &PushUpdate,
) -> Result<Vec<ClientInstruction>> {
    if update.schema_version < SchemaVersion::V24 {
        return Err(Error::UnsupportedSchemaVersion(
            update.schema_version.as_millis(),
        ));
    }
    let device = update.device_id.ok_or(Error::MissingDeviceId)?;
    let mut upload = Upload {
        dataset,
        author: Author {
            user: user.clone(),
            device,
        },
    };

    match &update.change {
        PushChange::Overwrite { object } => {
            let object = LocalObject::parse(update.collection, object.clone())?;
            Ok(upload.overwrite(object))
        }
        PushChange::Delete { where_ } => {
            if where_.collection() != update.collection {
                return Err(Error::InvalidInput(format!(
                    "delete key for {} pushed as {}",
                    where_.collection(),
                    update.collection
                )));
            }
            upload.delete(where_);
            Ok(Vec::new())
        }
    }
}

struct Upload<'a> {
    dataset: &'a mut RemoteDataset,
    author: Author,
}

impl Upload<'_> {
    fn user(&self) -> &UserId {
        &self.author.user
    }

    fn content(&self, normalized_url: &str) -> Option<ContentRef> {
        find_content(self.dataset, self.user(), normalized_url)
    }

    /// Create the record, or replace the data of the first record matching
    /// `existing` when it differs.
    fn upsert<T: RemoteRecord>(
        &mut self,
        existing: impl Fn(&T) -> bool,
        data: T,
        info: Option<ChangeInfo>,
    ) -> RemoteId {
        let current = self
            .dataset
            .find::<T>(&self.author.user, existing)
            .map(|record| (record.id(), record.data == data));
        match current {
            Some((id, true)) => id,
            Some((id, false)) => {
                self.dataset.update(&self.author, id, data, info);
                id
            }
            None => self.dataset.create(&self.author, data, info),
        }
    }

    fn delete_all<T: RemoteRecord>(
        &mut self,
        matches: impl Fn(&T) -> bool,
        info: impl Fn(&T) -> Option<ChangeInfo>,
    ) {
        let doomed: Vec<(RemoteId, Option<ChangeInfo>)> = self
            .dataset
            .filter::<T>(&self.author.user, matches)
            .into_iter()
            .map(|record| (record.id(), info(&record.data)))
            .collect();
        for (id, info) in doomed {
            self.dataset.delete::<T>(&self.author, id, info);
        }
    }

    fn overwrite(&mut self, object: LocalObject) -> Vec<ClientInstruction> {
        match object {
            LocalObject::Page(page) => self.overwrite_page(page),
            LocalObject::Visit(visit) => self.overwrite_visit(&visit),
            LocalObject::Bookmark(bookmark) => {
                if let Some(content) = self.content(&bookmark.url) {
                    self.upsert(
                        |existing: &Bookmark| existing.personal_content_metadata == content.metadata,
                        Bookmark {
                            personal_content_metadata: content.metadata,
                            bookmarked_when: bookmark.time,
                        },
                        None,
                    );
                }
            }
            LocalObject::FavIcon(icon) => {
                tracing::debug!(hostname = %icon.hostname, "Favicons are not synced");
            }
            LocalObject::Annotation(annotation) => self.overwrite_annotation(annotation),
            LocalObject::AnnotationPrivacyLevel(level) => {
                if let Some(annotation) = self.annotation_id(&level.annotation) {
                    self.upsert(
                        |existing: &AnnotationPrivacyLevel| {
                            existing.personal_annotation == annotation
                        },
                        AnnotationPrivacyLevel {
                            personal_annotation: annotation,
                            privacy_level: level.privacy_level,
                            local_created_when: level.created_when,
                            local_updated_when: level.updated_when,
                        },
                        None,
                    );
                }
            }
            LocalObject::SharedAnnotationMetadata(shared) => {
                if let Some(annotation) = self.annotation_id(&shared.local_id) {
                    self.upsert(
                        |existing: &AnnotationShare| existing.personal_annotation == annotation,
                        AnnotationShare {
                            personal_annotation: annotation,
                            remote_id: shared.remote_id,
                            exclude_from_lists: shared.exclude_from_lists,
                        },
                        None,
                    );
                }
            }
            LocalObject::Tag(tag) => self.overwrite_tag(&tag),
            LocalObject::CustomList(list) => {
                self.upsert(
                    |existing: &List| existing.local_id == list.id,
                    List {
                        local_id: list.id,
                        name: list.name,
                        is_deletable: list.is_deletable,
                        is_nestable: list.is_nestable,
                        local_created_when: list.created_at,
                    },
                    None,
                );
            }
            LocalObject::PageListEntry(entry) => {
                let list = self.list_id(entry.list_id);
                let content = self.content(&entry.page_url);
                if let (Some(list), Some(content)) = (list, content) {
                    self.upsert(
                        |existing: &ListEntry| {
                            existing.personal_list == list
                                && existing.personal_content_metadata == content.metadata
                        },
                        ListEntry {
                            personal_list: list,
                            personal_content_metadata: content.metadata,
                            full_url: entry.full_url,
                            local_created_when: entry.created_at,
                        },
                        None,
                    );
                }
            }
            LocalObject::SharedListMetadata(shared) => {
                if let Some(list) = self.list_id(shared.local_id) {
                    self.upsert(
                        |existing: &ListShare| existing.personal_list == list,
                        ListShare {
                            personal_list: list,
                            remote_id: shared.remote_id,
                        },
                        None,
                    );
                }
            }
            LocalObject::TextTemplate(template) => {
                self.upsert(
                    |existing: &TextTemplate| existing.local_id == template.id,
                    TextTemplate {
                        local_id: template.id,
                        title: template.title,
                        code: template.code,
                        is_favourite: template.is_favourite,
                    },
                    None,
                );
            }
            LocalObject::DocContent(content) => {
                return vec![self.doc_content_upload(&content)];
            }
        }
        Vec::new()
    }

    fn overwrite_page(&mut self, page: models::Page) {
        let metadata = ContentMetadata {
            canonical_url: page.canonical_url,
            title: page.full_title,
            lang: page.lang,
            description: page.description,
        };
        let format = ContentFormat::of_url(&page.full_url);

        let Some(content) = self.content(&page.url) else {
            let metadata_id = self.dataset.create(&self.author, metadata, None);
            self.dataset.create(
                &self.author,
                ContentLocator {
                    personal_content_metadata: metadata_id,
                    location_scheme: LocationScheme::NormalizedUrlV1,
                    format,
                    location: page.url,
                    original_location: page.full_url,
                    version: 0,
                    valid: true,
                    primary: true,
                    last_visited: 0,
                },
                None,
            );
            return;
        };

        let metadata_changed = self
            .dataset
            .get::<ContentMetadata>(self.user(), content.metadata)
            .is_some_and(|current| current.data != metadata);
        if metadata_changed {
            self.dataset
                .update(&self.author, content.metadata, metadata, None);
        }

        let locator = self
            .dataset
            .get::<ContentLocator>(self.user(), content.locator)
            .map(|record| record.data.clone());
        if let Some(current) = locator {
            if current.format != format || current.original_location != page.full_url {
                self.dataset.update(
                    &self.author,
                    content.locator,
                    ContentLocator {
                        format,
                        original_location: page.full_url,
                        ..current
                    },
                    None,
                );
            }
        }
    }

    fn overwrite_visit(&mut self, visit: &models::Visit) {
        let Some(content) = self.content(&visit.url) else {
            return;
        };
        self.upsert(
            |existing: &ContentRead| {
                existing.personal_content_metadata == content.metadata
                    && existing.read_when == visit.time
            },
            ContentRead {
                personal_content_metadata: content.metadata,
                personal_content_locator: content.locator,
                read_when: visit.time,
                read_duration: visit.duration,
                progress_percentage: visit.scroll_perc,
                max_progress_percentage: visit.scroll_max_perc,
                scroll_total: visit.scroll_max_px,
                scroll_progress: visit.scroll_px,
            },
            None,
        );

        let locator = self
            .dataset
            .get::<ContentLocator>(self.user(), content.locator)
            .map(|record| record.data.clone());
        if let Some(current) = locator {
            if visit.time > current.last_visited {
                self.dataset.update(
                    &self.author,
                    content.locator,
                    ContentLocator {
                        last_visited: visit.time,
                        ..current
                    },
                    None,
                );
            }
        }
    }

    fn overwrite_annotation(&mut self, annotation: models::Annotation) {
        let Some((page_url, local_id)) = models::split_annotation_url(&annotation.url) else {
            tracing::warn!(url = %annotation.url, "Annotation URL has no local id, skipping");
            return;
        };
        let (page_url, local_id) = (page_url.to_string(), local_id.to_string());
        let Some(content) = self.content(&page_url) else {
            return;
        };

        let data = Annotation {
            personal_content_metadata: content.metadata,
            local_id: local_id.clone(),
            body: annotation.body,
            comment: annotation.comment,
            local_created_when: annotation.created_when,
            local_last_edited: annotation.last_edited,
        };
        let existing = self
            .dataset
            .find::<Annotation>(self.user(), |existing| {
                existing.personal_content_metadata == content.metadata
                    && existing.local_id == local_id
            })
            .map(|record| (record.id(), record.data == data));

        let (annotation_id, unchanged) = match existing {
            Some((id, unchanged)) => (id, unchanged),
            None => {
                let id = self.dataset.create(&self.author, data.clone(), None);
                (id, true)
            }
        };

        let selector = self
            .dataset
            .find::<AnnotationSelector>(self.user(), |existing| {
                existing.personal_annotation == annotation_id
            })
            .map(|record| (record.id(), record.data.selector.clone()));
        let selector_changed = match (selector, annotation.selector) {
            (None, None) => false,
            (Some((_, current)), Some(wanted)) if current == wanted => false,
            (Some((id, _)), Some(wanted)) => {
                self.dataset.update(
                    &self.author,
                    id,
                    AnnotationSelector {
                        personal_annotation: annotation_id,
                        selector: wanted,
                    },
                    None,
                );
                true
            }
            (None, Some(wanted)) => {
                self.dataset.create(
                    &self.author,
                    AnnotationSelector {
                        personal_annotation: annotation_id,
                        selector: wanted,
                    },
                    None,
                );
                existing.is_some()
            }
            (Some((id, _)), None) => {
                self.dataset
                    .delete::<AnnotationSelector>(&self.author, id, None);
                true
            }
        };

        // Selector changes are pulled through the annotation itself
        if !unchanged || selector_changed {
            self.dataset.update(&self.author, annotation_id, data, None);
        }
    }

    fn overwrite_tag(&mut self, tag: &TagAssignment) {
        let Some(target) = self.tag_target(tag) else {
            return;
        };
        let tag_id = self.upsert(
            |existing: &Tag| existing.name == tag.name,
            Tag {
                name: tag.name.clone(),
            },
            None,
        );
        self.upsert(
            |existing: &TagConnection| existing.personal_tag == tag_id && existing.target == target,
            TagConnection {
                personal_tag: tag_id,
                target,
            },
            None,
        );
    }

    fn doc_content_upload(&self, content: &models::DocContent) -> ClientInstruction {
        let path = format!("/u/{}/docContent/{}", self.user(), Uuid::now_v7());
        ClientInstruction::UploadToStorage {
            storage: ClientStorageType::Persistent,
            collection: LocalCollection::DocContent.as_str().to_string(),
            upload_where: ObjectKey::DocContent {
                normalized_url: content.normalized_url.clone(),
                stored_content_type: content.stored_content_type,
            },
            upload_field: "content".to_string(),
            upload_path: path.clone(),
            upload_as_json: content.stored_content_type == StoredContentType::PdfContent,
            upload_content_type: content.stored_content_type.mime_type().to_string(),
            change_info: MediaChangeInfo {
                normalized_url: content.normalized_url.clone(),
                stored_content_type: content.stored_content_type,
                path,
            },
        }
    }

    fn annotation_id(&self, annotation_url: &str) -> Option<RemoteId> {
        find_annotation(self.dataset, self.user(), annotation_url).map(|record| record.id())
    }

    fn list_id(&self, local_id: i64) -> Option<RemoteId> {
        self.dataset
            .find::<List>(self.user(), |list| list.local_id == local_id)
            .map(|record| record.id())
    }

    fn tag_target(&self, tag: &TagAssignment) -> Option<TagTarget> {
        match tag.target() {
            TagAssignmentTarget::Page { url } => self
                .content(url)
                .map(|content| TagTarget::ContentMetadata(content.metadata)),
            TagAssignmentTarget::Annotation { url, .. } => {
                self.annotation_id(url).map(TagTarget::Annotation)
            }
        }
    }

    fn delete(&mut self, key: &ObjectKey) {
        match key {
            ObjectKey::Page { url } => {
                if let Some(content) = self.content(url) {
                    self.delete_content(content.metadata);
                }
            }
            ObjectKey::Visit { url, time } => {
                if let Some(content) = self.content(url) {
                    self.delete_all(
                        |read: &ContentRead| {
                            read.personal_content_metadata == content.metadata
                                && read.read_when == *time
                        },
                        |_| {
                            Some(ChangeInfo::ContentRead {
                                normalized_url: url.clone(),
                                read_when: *time,
                            })
                        },
                    );
                }
            }
            ObjectKey::Bookmark { url } => {
                if let Some(content) = self.content(url) {
                    self.delete_all(
                        |bookmark: &Bookmark| {
                            bookmark.personal_content_metadata == content.metadata
                        },
                        |_| {
                            Some(ChangeInfo::ContentMetadata {
                                normalized_url: url.clone(),
                            })
                        },
                    );
                }
            }
            ObjectKey::FavIcon { .. } => {}
            ObjectKey::Annotation { url } => {
                if let Some(id) = self.annotation_id(url) {
                    self.delete_annotation(id, url);
                }
            }
            ObjectKey::AnnotationPrivacyLevel { annotation } => {
                if let Some(id) = self.annotation_id(annotation) {
                    self.delete_all(
                        |level: &AnnotationPrivacyLevel| level.personal_annotation == id,
                        |_| Some(ChangeInfo::Annotation { url: annotation.clone() }),
                    );
                }
            }
            ObjectKey::SharedAnnotationMetadata { local_id } => {
                if let Some(id) = self.annotation_id(local_id) {
                    self.delete_all(
                        |share: &AnnotationShare| share.personal_annotation == id,
                        |_| Some(ChangeInfo::Annotation { url: local_id.clone() }),
                    );
                }
            }
            ObjectKey::Tag { name, url } => {
                let assignment = TagAssignment::new(name.clone(), url.clone());
                let tag = self
                    .dataset
                    .find::<Tag>(self.user(), |tag| &tag.name == name)
                    .map(|record| record.id());
                // The tag itself is kept even when this was its last connection
                if let (Some(tag), Some(target)) = (tag, self.tag_target(&assignment)) {
                    self.delete_all(
                        |connection: &TagConnection| {
                            connection.personal_tag == tag && connection.target == target
                        },
                        |_| {
                            Some(ChangeInfo::TagConnection {
                                name: name.clone(),
                                url: url.clone(),
                            })
                        },
                    );
                }
            }
            ObjectKey::CustomList { id } => {
                if let Some(list) = self.list_id(*id) {
                    self.delete_list(list, *id);
                }
            }
            ObjectKey::PageListEntry { list_id, page_url } => {
                let list = self.list_id(*list_id);
                let content = self.content(page_url);
                if let (Some(list), Some(content)) = (list, content) {
                    self.delete_all(
                        |entry: &ListEntry| {
                            entry.personal_list == list
                                && entry.personal_content_metadata == content.metadata
                        },
                        |_| {
                            Some(ChangeInfo::ListEntry {
                                list_id: *list_id,
                                normalized_url: page_url.clone(),
                            })
                        },
                    );
                }
            }
            ObjectKey::SharedListMetadata { local_id } => {
                if let Some(list) = self.list_id(*local_id) {
                    self.delete_all(
                        |share: &ListShare| share.personal_list == list,
                        |_| Some(ChangeInfo::List { local_id: *local_id }),
                    );
                }
            }
            ObjectKey::TextTemplate { id } => {
                self.delete_all(
                    |template: &TextTemplate| template.local_id == *id,
                    |_| Some(ChangeInfo::TextTemplate { local_id: *id }),
                );
            }
            ObjectKey::DocContent {
                normalized_url,
                stored_content_type,
            } => {
                self.dataset
                    .delete_media(&self.author, normalized_url, *stored_content_type);
            }
        }
    }

    /// Delete content metadata with everything hanging off it. Dependents are
    /// logged with enough info for other devices to drop their local rows.
    fn delete_content(&mut self, metadata: RemoteId) {
        let Some(url) = normalized_url(self.dataset, self.user(), metadata) else {
            return;
        };

        let annotations: Vec<(RemoteId, Option<String>)> = self
            .dataset
            .filter::<Annotation>(self.user(), |annotation| {
                annotation.personal_content_metadata == metadata
            })
            .into_iter()
            .map(|record| {
                (
                    record.id(),
                    annotation_url(self.dataset, self.user(), &record.data),
                )
            })
            .collect();
        for (id, annotation_url) in annotations {
            if let Some(annotation_url) = annotation_url {
                self.delete_annotation(id, &annotation_url);
            }
        }

        self.delete_all(
            |read: &ContentRead| read.personal_content_metadata == metadata,
            |read| {
                Some(ChangeInfo::ContentRead {
                    normalized_url: url.clone(),
                    read_when: read.read_when,
                })
            },
        );
        self.delete_all(
            |bookmark: &Bookmark| bookmark.personal_content_metadata == metadata,
            |_| {
                Some(ChangeInfo::ContentMetadata {
                    normalized_url: url.clone(),
                })
            },
        );
        self.delete_tag_connections(TagTarget::ContentMetadata(metadata), &url);

        let list_ids: Vec<(RemoteId, i64)> = self
            .dataset
            .filter::<List>(self.user(), |_| true)
            .into_iter()
            .map(|record| (record.id(), record.data.local_id))
            .collect();
        self.delete_all(
            |entry: &ListEntry| entry.personal_content_metadata == metadata,
            |entry| {
                let list_id = list_ids
                    .iter()
                    .find(|(id, _)| *id == entry.personal_list)
                    .map(|(_, local_id)| *local_id)?;
                Some(ChangeInfo::ListEntry {
                    list_id,
                    normalized_url: url.clone(),
                })
            },
        );

        self.dataset.delete::<ContentMetadata>(
            &self.author,
            metadata,
            Some(ChangeInfo::ContentMetadata {
                normalized_url: url.clone(),
            }),
        );
        self.delete_all(
            |locator: &ContentLocator| locator.personal_content_metadata == metadata,
            |_| None,
        );
    }

    fn delete_annotation(&mut self, annotation: RemoteId, url: &str) {
        let info = || {
            Some(ChangeInfo::Annotation {
                url: url.to_string(),
            })
        };
        self.delete_all(
            |selector: &AnnotationSelector| selector.personal_annotation == annotation,
            |_| None,
        );
        self.delete_all(
            |level: &AnnotationPrivacyLevel| level.personal_annotation == annotation,
            |_| info(),
        );
        self.delete_all(
            |share: &AnnotationShare| share.personal_annotation == annotation,
            |_| info(),
        );
        self.delete_tag_connections(TagTarget::Annotation(annotation), url);
        self.dataset
            .delete::<Annotation>(&self.author, annotation, info());
    }

    fn delete_tag_connections(&mut self, target: TagTarget, target_url: &str) {
        let tag_names: Vec<(RemoteId, String)> = self
            .dataset
            .filter::<Tag>(self.user(), |_| true)
            .into_iter()
            .map(|record| (record.id(), record.data.name.clone()))
            .collect();
        self.delete_all(
            |connection: &TagConnection| connection.target == target,
            |connection| {
                let name = tag_names
                    .iter()
                    .find(|(id, _)| *id == connection.personal_tag)
                    .map(|(_, name)| name.clone())?;
                Some(ChangeInfo::TagConnection {
                    name,
                    url: target_url.to_string(),
                })
            },
        );
    }

    fn delete_list(&mut self, list: RemoteId, local_id: i64) {
        let entries: Vec<(RemoteId, Option<String>)> = self
            .dataset
            .filter::<ListEntry>(self.user(), |entry| entry.personal_list == list)
            .into_iter()
            .map(|record| {
                (
                    record.id(),
                    normalized_url(
                        self.dataset,
                        self.user(),
                        record.data.personal_content_metadata,
                    ),
                )
            })
            .collect();
        for (id, url) in entries {
            let info = url.map(|normalized_url| ChangeInfo::ListEntry {
                list_id: local_id,
                normalized_url,
            });
            self.dataset.delete::<ListEntry>(&self.author, id, info);
        }
        self.delete_all(
            |share: &ListShare| share.personal_list == list,
            |_| Some(ChangeInfo::List { local_id }),
        );
        self.dataset
            .delete::<List>(&self.author, list, Some(ChangeInfo::List { local_id }));
    }
}
