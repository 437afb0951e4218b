//! In-process cloud shared by simulated devices

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};

use super::{BackendEvent, CloudBackend, DownloadedBatch, PushResult, UploadMediaRequest};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{DeviceId, SchemaVersion, UserId};
use crate::remote::{Author, DeviceInfo, RemoteDataset};
use crate::settings::SyncSettings;
use crate::translation::{
    download_client_updates, upload_client_update, PushUpdate, DOWNLOAD_CHANGE_BATCH_SIZE,
};
use crate::util::Clock;

/// The server: remote dataset, change log and media of every user
#[derive(Clone)]
pub struct MemoryCloudHub {
    dataset: Arc<Mutex<RemoteDataset>>,
    /// Bumped after every write so that streams wake up
    revision: Arc<watch::Sender<u64>>,
}

impl MemoryCloudHub {
    pub fn new(clock: Clock) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            dataset: Arc::new(Mutex::new(RemoteDataset::new(clock))),
            revision: Arc::new(revision),
        }
    }

    /// Inspect the remote dataset
    pub fn read<R>(&self, f: impl FnOnce(&RemoteDataset) -> R) -> R {
        f(&self.lock())
    }

    /// Connect a device: `user` follows the device's login state and
    /// `settings` holds its persisted cursor
    pub fn connect(
        &self,
        user: watch::Receiver<Option<UserId>>,
        settings: SyncSettings,
        options: MemoryBackendOptions,
    ) -> MemoryCloudBackend {
        let (events, _) = broadcast::channel(64);
        MemoryCloudBackend {
            inner: Arc::new(BackendInner {
                hub: self.clone(),
                user,
                settings,
                options,
                events,
            }),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut RemoteDataset) -> Result<R>) -> Result<R> {
        let result = f(&mut self.lock());
        self.revision.send_modify(|revision| *revision += 1);
        result
    }

    fn lock(&self) -> MutexGuard<'_, RemoteDataset> {
        self.dataset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a device tells the server about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBackendOptions {
    /// Local schema of the device, decides which collections it receives
    pub schema_version: SchemaVersion,
    pub batch_size: usize,
}

impl Default for MemoryBackendOptions {
    fn default() -> Self {
        Self {
            schema_version: SchemaVersion::CURRENT,
            batch_size: DOWNLOAD_CHANGE_BATCH_SIZE,
        }
    }
}

impl MemoryBackendOptions {
    /// Current schema, downloading in batches of `config.download_batch_size`
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.download_batch_size,
            ..Self::default()
        }
    }
}

/// One device's connection to a [`MemoryCloudHub`]
#[derive(Clone)]
pub struct MemoryCloudBackend {
    inner: Arc<BackendInner>,
}

struct BackendInner {
    hub: MemoryCloudHub,
    user: watch::Receiver<Option<UserId>>,
    settings: SyncSettings,
    options: MemoryBackendOptions,
    events: broadcast::Sender<BackendEvent>,
}

impl BackendInner {
    fn current_user(&self) -> Result<UserId> {
        self.user.borrow().clone().ok_or(Error::NotAuthenticated)
    }

    fn download(&self, user: &UserId, start_time: i64) -> Result<(DownloadedBatch, bool)> {
        let downloaded = self.hub.read(|dataset| {
            download_client_updates(
                dataset,
                user,
                start_time,
                self.options.schema_version,
                self.options.batch_size,
            )
        })?;
        Ok((
            DownloadedBatch {
                batch: downloaded.batch,
                last_seen: downloaded.last_seen,
            },
            downloaded.may_have_more,
        ))
    }

    async fn last_seen(&self) -> Result<i64> {
        Ok(self.settings.last_seen().await?.unwrap_or(0))
    }

    fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }
}

struct StreamState {
    inner: Arc<BackendInner>,
    user: watch::Receiver<Option<UserId>>,
    revision: watch::Receiver<u64>,
    /// Size of the batch handed out last, reported processed on the next poll
    delivered: Option<usize>,
}

impl StreamState {
    /// Wait until the next batch can be built, then build it.
    ///
    /// Returns `None` once the device's login channel is closed.
    async fn next_batch(&mut self) -> Option<Result<DownloadedBatch>> {
        if let Some(count) = self.delivered.take() {
            self.inner
                .emit(BackendEvent::IncomingChangesProcessed { count });
        }

        loop {
            self.revision.borrow_and_update();
            let user = self.user.borrow_and_update().clone();
            let Some(user) = user else {
                self.user.changed().await.ok()?;
                continue;
            };

            let last_seen = match self.inner.last_seen().await {
                Ok(last_seen) => last_seen,
                Err(e) => return Some(Err(e)),
            };
            let waiting = self
                .inner
                .hub
                .read(|dataset| dataset.count_changes_since(&user, last_seen));
            if waiting == 0 {
                tokio::select! {
                    changed = self.user.changed() => changed.ok()?,
                    // The hub outlives its backends, so this never closes
                    _ = self.revision.changed() => {}
                }
                continue;
            }

            return Some(match self.inner.download(&user, last_seen) {
                Ok((batch, _)) => {
                    let count = batch.batch.len();
                    self.inner.emit(BackendEvent::IncomingChangesPending {
                        change_count_delta: count,
                    });
                    self.delivered = Some(count);
                    Ok(batch)
                }
                Err(e) => Err(e),
            });
        }
    }
}

#[async_trait]
impl CloudBackend for MemoryCloudBackend {
    async fn register_device(&self, user: &UserId) -> Result<DeviceId> {
        let device = self.inner.hub.write(|dataset| {
            Ok(dataset.register_device(
                user,
                DeviceInfo {
                    product_type: "pcloud".to_string(),
                },
            ))
        })?;
        tracing::info!(%user, %device, "Registered device");
        Ok(device)
    }

    async fn push_updates(&self, updates: Vec<PushUpdate>) -> Result<PushResult> {
        let user = self.inner.current_user()?;
        let client_instructions = self.inner.hub.write(|dataset| {
            let mut instructions = Vec::new();
            for update in &updates {
                instructions.extend(upload_client_update(dataset, &user, update)?);
            }
            Ok(instructions)
        })?;
        Ok(PushResult {
            client_instructions,
        })
    }

    async fn bulk_download_updates(&self) -> Result<DownloadedBatch> {
        let user = self.inner.current_user()?;
        let mut last_seen = self.inner.last_seen().await?;
        let mut batch = Vec::new();
        loop {
            let (downloaded, may_have_more) = self.inner.download(&user, last_seen)?;
            batch.extend(downloaded.batch);
            last_seen = downloaded.last_seen;
            if !may_have_more {
                break;
            }
        }
        Ok(DownloadedBatch { batch, last_seen })
    }

    fn stream_updates(&self) -> BoxStream<'static, Result<DownloadedBatch>> {
        let state = StreamState {
            inner: Arc::clone(&self.inner),
            user: self.inner.user.clone(),
            revision: self.inner.hub.revision.subscribe(),
            delivered: None,
        };
        stream::unfold(state, |mut state| async move {
            let next = state.next_batch().await?;
            Some((next, state))
        })
        .boxed()
    }

    async fn download_from_media(&self, path: &str) -> Result<String> {
        let user = self.inner.current_user()?;
        self.inner.hub.read(|dataset| {
            let media = dataset
                .get_media(path)
                .filter(|media| media.user == user)
                .ok_or_else(|| Error::Media(format!("no media stored at {path}")))?;
            Ok(match &media.content {
                Value::String(body) => body.clone(),
                other => other.to_string(),
            })
        })
    }

    async fn upload_to_media(&self, request: UploadMediaRequest) -> Result<()> {
        let user = self.inner.current_user()?;
        let UploadMediaRequest {
            device_id,
            media_path,
            media_object,
            change_info,
            content_type,
        } = request;
        if change_info.path != media_path {
            return Err(Error::Media(format!(
                "media path {media_path} does not match its change info"
            )));
        }
        self.inner.hub.write(|dataset| {
            dataset.put_media(
                &Author {
                    user,
                    device: device_id,
                },
                change_info,
                content_type,
                Value::String(media_object),
            );
            Ok(())
        })
    }

    fn subscribe_events(&self) -> broadcast::Receiver<BackendEvent> {
        self.inner.events.subscribe()
    }
}
