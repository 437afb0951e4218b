//! Contract between the sync orchestrator and the cloud
//!
//! A backend accepts pushed local changes, hands back remote changes as
//! local updates, and stores media blobs. [`MemoryCloudHub`] is an in-process
//! implementation shared by several simulated devices.

mod memory;

pub use memory::{MemoryBackendOptions, MemoryCloudBackend, MemoryCloudHub};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::{DeviceId, UserId};
use crate::remote::MediaChangeInfo;
use crate::translation::{ClientInstruction, CloudUpdate, PushUpdate};

/// Response to a push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub client_instructions: Vec<ClientInstruction>,
}

/// Updates pulled in one go, and the cursor to persist once they are applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedBatch {
    pub batch: Vec<CloudUpdate>,
    pub last_seen: i64,
}

/// Blob upload carried out for a client instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMediaRequest {
    pub device_id: DeviceId,
    pub media_path: String,
    /// Blob body, JSON text for objects uploaded as JSON
    pub media_object: String,
    pub change_info: MediaChangeInfo,
    pub content_type: String,
}

/// Progress of incoming changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    IncomingChangesPending { change_count_delta: usize },
    IncomingChangesProcessed { count: usize },
}

/// Cloud side of personal data sync
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Create the device record of a new installation
    async fn register_device(&self, user: &UserId) -> Result<DeviceId>;

    /// Apply local changes in order
    async fn push_updates(&self, updates: Vec<PushUpdate>) -> Result<PushResult>;

    /// Every update newer than the persisted cursor
    async fn bulk_download_updates(&self) -> Result<DownloadedBatch>;

    /// Endless sequence of update batches, each produced when the previous
    /// one has been consumed
    fn stream_updates(&self) -> BoxStream<'static, Result<DownloadedBatch>>;

    /// Body of a media blob
    async fn download_from_media(&self, path: &str) -> Result<String>;

    async fn upload_to_media(&self, request: UploadMediaRequest) -> Result<()>;

    fn subscribe_events(&self) -> broadcast::Receiver<BackendEvent>;
}
