//! Remote schema: record families, the in-memory dataset and its change log

mod change;
mod dataset;
mod records;

pub use change::{ChangeInfo, ChangeKind, DataChange, MediaChangeInfo, RemoteCollection};
pub use dataset::{Author, RemoteDataset, StoredMedia, Table};
pub use records::{
    Annotation, AnnotationPrivacyLevel, AnnotationSelector, AnnotationShare, Bookmark,
    ContentFormat, ContentLocator, ContentMetadata, ContentRead, DeviceInfo, List, ListEntry,
    ListShare, LocationScheme, Record, RemoteMeta, RemoteRecord, Tag, TagConnection, TagTarget,
    TextTemplate,
};
