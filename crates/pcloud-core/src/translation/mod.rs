//! Translation between the local schema and the remote schema
//!
//! Upload turns one pushed local change into remote record writes. Download
//! turns change log entries back into local overwrites and deletes.

mod download;
mod lookup;
mod preprocess;
mod upload;

pub use download::{download_client_updates, DownloadedUpdates, DOWNLOAD_CHANGE_BATCH_SIZE};
pub use preprocess::{preprocess_object_for_push, preprocess_pulled_object};
pub use upload::upload_client_update;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{ClientStorageType, DeviceId, LocalCollection, ObjectKey, SchemaVersion};
use crate::remote::MediaChangeInfo;

/// What a pushed update does to its object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushChange {
    Overwrite { object: Value },
    Delete {
        #[serde(rename = "where")]
        where_: ObjectKey,
    },
}

/// A local change on its way to the cloud
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushUpdate {
    pub schema_version: SchemaVersion,
    /// Filled in when the update is executed if unknown when scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    pub collection: LocalCollection,
    #[serde(default)]
    pub storage: ClientStorageType,
    #[serde(flatten)]
    pub change: PushChange,
}

impl PushUpdate {
    #[must_use]
    pub fn overwrite(
        schema_version: SchemaVersion,
        device_id: Option<DeviceId>,
        collection: LocalCollection,
        object: Value,
    ) -> Self {
        Self {
            schema_version,
            device_id,
            collection,
            storage: collection.storage_type(),
            change: PushChange::Overwrite { object },
        }
    }

    #[must_use]
    pub fn delete(
        schema_version: SchemaVersion,
        device_id: Option<DeviceId>,
        where_: ObjectKey,
    ) -> Self {
        let collection = where_.collection();
        Self {
            schema_version,
            device_id,
            collection,
            storage: collection.storage_type(),
            change: PushChange::Delete { where_ },
        }
    }
}

/// How a downloaded media blob is turned into a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Json,
}

/// Blob to download into a field of a pulled object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReference {
    pub path: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

/// An update pulled from the cloud, in local shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CloudUpdate {
    Overwrite {
        collection: LocalCollection,
        #[serde(default)]
        storage: ClientStorageType,
        object: Value,
        #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
        where_: Option<ObjectKey>,
        /// Field name to blob
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        media: BTreeMap<String, MediaReference>,
    },
    Delete {
        collection: LocalCollection,
        #[serde(default)]
        storage: ClientStorageType,
        #[serde(rename = "where")]
        where_: ObjectKey,
    },
}

impl CloudUpdate {
    #[must_use]
    pub const fn collection(&self) -> LocalCollection {
        match self {
            Self::Overwrite { collection, .. } | Self::Delete { collection, .. } => *collection,
        }
    }

    pub(crate) fn overwrite(collection: LocalCollection, object: Value) -> Self {
        Self::Overwrite {
            collection,
            storage: collection.storage_type(),
            object,
            where_: None,
            media: BTreeMap::new(),
        }
    }

    pub(crate) fn delete(where_: ObjectKey) -> Self {
        let collection = where_.collection();
        Self::Delete {
            collection,
            storage: collection.storage_type(),
            where_,
        }
    }
}

/// Follow-up work the backend asks a client to do after a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientInstruction {
    /// Upload one field of a local object as a media blob
    UploadToStorage {
        storage: ClientStorageType,
        /// Kept as text so that instructions naming a collection this build
        /// does not know still load from the queue
        collection: String,
        upload_where: ObjectKey,
        upload_field: String,
        upload_path: String,
        upload_as_json: bool,
        upload_content_type: String,
        change_info: MediaChangeInfo,
    },
}

#[cfg(test)]
mod tests;
