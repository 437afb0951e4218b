//! Sync orchestrator
//!
//! [`PersonalCloud`] turns local storage changes into queued pushes and
//! writes remote changes pulled from a [`CloudBackend`] into local storage.
//! Pushes are serialized by the push mutex and the action queue; pulls by the
//! pull mutex.

mod executor;
mod remote_functions;

pub use executor::{ActionReporter, CloudActionExecutor};

use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::action_queue::{
    ActionQueue, FailedAction, LibSqlActionStore, QueueInteraction, QueueOptions,
};
use crate::backend::{BackendEvent, CloudBackend, DownloadedBatch};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{ClientStorageType, DeviceId, ObjectKey, SchemaVersion, UserId};
use crate::mutex::AsyncMutex;
use crate::settings::SyncSettings;
use crate::state::{SyncPhase, SyncStats};
use crate::storage::{
    ChangeHandler, IncomingWrite, LocalStorage, StorageChange, StorageChangeEvent, Subscription,
};
use crate::translation::{
    preprocess_object_for_push, preprocess_pulled_object, ClientInstruction, CloudUpdate,
    MediaReference, MediaType, PushUpdate,
};
use crate::util::Clock;
use executor::DeviceContext;

/// Work kept in the durable action queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CloudAction {
    /// Push one batch of local changes
    PushObject { updates: Vec<PushUpdate> },
    /// Carry out what the backend asked for after a push
    ExecuteClientInstructions {
        client_instructions: Vec<ClientInstruction>,
    },
}

/// Collaborators of a [`PersonalCloud`]
pub struct PersonalCloudOptions {
    pub storage: Arc<dyn LocalStorage>,
    pub persistent_storage: Arc<dyn LocalStorage>,
    pub backend: Arc<dyn CloudBackend>,
    pub settings: SyncSettings,
    pub action_store: LibSqlActionStore,
    /// Signed-in user, `None` while signed out
    pub user_changes: watch::Receiver<Option<UserId>>,
    pub config: SyncConfig,
    pub clock: Clock,
}

struct Shared {
    storage: Arc<dyn LocalStorage>,
    persistent_storage: Arc<dyn LocalStorage>,
    backend: Arc<dyn CloudBackend>,
    settings: SyncSettings,
    config: SyncConfig,
    user_changes: watch::Receiver<Option<UserId>>,
    queue: ActionQueue<CloudAction>,
    device: Arc<DeviceContext>,
    schema_version: RwLock<SchemaVersion>,
    push_mutex: AsyncMutex,
    pull_mutex: AsyncMutex,
    phase: watch::Sender<SyncPhase>,
    stats: watch::Sender<SyncStats>,
    /// First integration error seen in strict mode
    strict_error: Mutex<Option<Error>>,
    sync_started: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Personal cloud sync of one installation
#[derive(Clone)]
pub struct PersonalCloud {
    shared: Arc<Shared>,
}

impl PersonalCloud {
    #[must_use]
    pub fn new(options: PersonalCloudOptions) -> Self {
        let PersonalCloudOptions {
            storage,
            persistent_storage,
            backend,
            settings,
            action_store,
            user_changes,
            config,
            clock,
        } = options;

        let device = Arc::new(DeviceContext::default());
        let executor = CloudActionExecutor::new(
            Arc::clone(&backend),
            Arc::clone(&storage),
            Arc::clone(&persistent_storage),
            Arc::clone(&device),
        );
        let queue = ActionQueue::new(
            action_store,
            Arc::new(executor),
            QueueOptions {
                retry_interval: config.retry_interval,
                max_attempts: config.max_action_attempts,
            },
            clock,
        );
        let (phase, _) = watch::channel(SyncPhase::Uninitialized);
        let (stats, _) = watch::channel(SyncStats::default());

        Self {
            shared: Arc::new(Shared {
                storage,
                persistent_storage,
                backend,
                settings,
                config,
                user_changes,
                queue,
                device,
                schema_version: RwLock::new(SchemaVersion::CURRENT),
                push_mutex: AsyncMutex::new(),
                pull_mutex: AsyncMutex::new(),
                phase,
                stats,
                strict_error: Mutex::new(None),
                sync_started: AtomicBool::new(false),
                subscriptions: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Load persisted state, start observing local changes and the signed-in
    /// user, and resume syncing if it was enabled before
    pub async fn setup(&self) -> Result<()> {
        if *self.shared.phase.borrow() != SyncPhase::Uninitialized {
            return Err(Error::InvalidInput(
                "personal cloud is already set up".to_string(),
            ));
        }

        let schema_version = self.shared.storage.schema_version().await?;
        *self
            .shared
            .schema_version
            .write()
            .unwrap_or_else(PoisonError::into_inner) = schema_version;

        self.shared.queue.setup(true).await?;
        self.track_stats();
        self.observe_storage_changes();

        let mut user_changes = self.shared.user_changes.clone();
        user_changes.borrow_and_update();
        self.load_device_id().await?;
        self.observe_user_changes(user_changes);

        if self.shared.settings.is_set_up().await? {
            self.start_sync();
        }
        tracing::info!(
            schema_version = schema_version.as_millis(),
            phase = ?*self.shared.phase.borrow(),
            "Personal cloud set up"
        );
        Ok(())
    }

    /// Resolve the device identity of the signed-in user, registering the
    /// device when it has none yet, and pause or resume pushes accordingly
    pub async fn load_device_id(&self) -> Result<Option<DeviceId>> {
        let shared = &self.shared;
        let user = shared.user_changes.borrow().clone();
        let Some(user) = user else {
            shared.queue.pause();
            shared.device.set_device_id(None);
            shared.stats.send_modify(|stats| stats.pending_downloads = 0);
            shared.phase.send_replace(SyncPhase::Paused);
            tracing::info!("No user signed in, sync paused");
            return Ok(None);
        };

        let device_id = match shared.settings.device_id().await? {
            Some(device_id) => device_id,
            None => {
                let device_id = shared.backend.register_device(&user).await?;
                shared.settings.set_device_id(Some(device_id)).await?;
                tracing::info!(device_id = %device_id, "Registered device");
                device_id
            }
        };
        shared.device.set_device_id(Some(device_id));
        shared.queue.unpause();
        shared.phase.send_replace(SyncPhase::Active);
        Ok(Some(device_id))
    }

    /// Remember that sync was turned on and start pulling
    pub async fn enable_sync(&self) -> Result<()> {
        self.shared.settings.set_is_set_up(true).await?;
        self.start_sync();
        Ok(())
    }

    /// Start the continuous pull loop, once
    pub fn start_sync(&self) {
        if self.shared.sync_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Starting continuous integration of remote changes");
        let updates = self.shared.backend.stream_updates();
        let task = tokio::spawn(integrate_stream(Arc::downgrade(&self.shared), updates));
        self.track(task);
    }

    /// Queue pushes for a batch of local changes
    ///
    /// Created and modified objects are read back from storage, so the push
    /// carries what was committed.
    pub async fn handle_post_storage_change(&self, event: StorageChangeEvent) -> Result<()> {
        let _guard = self.shared.push_mutex.lock().await;
        let collection = event.collection;
        let storage = self.storage_for(collection.storage_type());
        let schema_version = self.schema_version();
        let device_id = self.shared.device.device_id();

        for change in event.changes {
            let updates = match change {
                StorageChange::Create { pk } => {
                    let key = ObjectKey::from_pk(collection, &pk)?;
                    storage
                        .get_object(&key)
                        .await?
                        .map(|object| {
                            PushUpdate::overwrite(
                                schema_version,
                                device_id,
                                collection,
                                preprocess_object_for_push(collection, object),
                            )
                        })
                        .into_iter()
                        .collect::<Vec<_>>()
                }
                StorageChange::Modify { pks } => {
                    let mut updates = Vec::with_capacity(pks.len());
                    for pk in &pks {
                        let key = ObjectKey::from_pk(collection, pk)?;
                        if let Some(object) = storage.get_object(&key).await? {
                            updates.push(PushUpdate::overwrite(
                                schema_version,
                                device_id,
                                collection,
                                preprocess_object_for_push(collection, object),
                            ));
                        }
                    }
                    updates
                }
                StorageChange::Delete { pks } => pks
                    .iter()
                    .map(|pk| {
                        ObjectKey::from_pk(collection, pk)
                            .map(|key| PushUpdate::delete(schema_version, device_id, key))
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            if updates.is_empty() {
                continue;
            }

            tracing::debug!(
                collection = %collection,
                count = updates.len(),
                "Scheduling push of local changes"
            );
            self.shared
                .queue
                .schedule_action(
                    CloudAction::PushObject { updates },
                    QueueInteraction::QueueAndReturn,
                )
                .await?;
        }
        Ok(())
    }

    /// Apply pulled updates in order
    ///
    /// A failing update is logged and skipped, unless strict error reporting
    /// is on, in which case the batch stops at the first failure.
    pub async fn integrate_updates(&self, batch: Vec<CloudUpdate>) -> Result<()> {
        let _guard = self.shared.pull_mutex.lock().await;
        self.integrate_batch(batch).await
    }

    /// Pull everything newer than the cursor, apply it, then advance the cursor
    pub async fn integrate_all_updates(&self) -> Result<()> {
        let _guard = self.shared.pull_mutex.lock().await;
        let downloaded = self.shared.backend.bulk_download_updates().await?;
        self.integrate_downloaded(downloaded).await
    }

    /// Apply batches from the backend stream until it ends, or until a
    /// strict-mode error which is kept for [`PersonalCloud::wait_for_sync`]
    pub async fn integrate_continuously(&self) {
        let updates = self.shared.backend.stream_updates();
        integrate_stream(Arc::downgrade(&self.shared), updates).await;
    }

    /// Download the media blobs of a pulled object into its fields
    ///
    /// Downloads run concurrently. Every blob that arrives is written into
    /// `object`; the first failure is returned.
    pub async fn download_media(
        &self,
        object: &mut Value,
        media: &BTreeMap<String, MediaReference>,
    ) -> Result<()> {
        let backend = &self.shared.backend;
        let downloads = media.iter().map(|(field, reference)| async move {
            let body = backend.download_from_media(&reference.path).await?;
            let value = match reference.media_type {
                MediaType::Text => Value::String(body),
                MediaType::Json => serde_json::from_str(&body)?,
            };
            Ok::<_, Error>((field, value))
        });

        let mut first_error = None;
        for result in join_all(downloads).await {
            match result {
                Ok((field, value)) => {
                    if let Some(fields) = object.as_object_mut() {
                        fields.insert(field.clone(), value);
                    }
                }
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Resolve once nothing is being pushed, pulled or queued for execution
    ///
    /// Raises the integration error kept in strict mode, if any.
    pub async fn wait_for_sync(&self) -> Result<()> {
        self.shared.push_mutex.wait().await;
        self.shared.pull_mutex.wait().await;
        self.shared.queue.wait_for_sync().await;
        match lock(&self.shared.strict_error).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Observe every action once it executed
    pub fn set_action_reporter(&self, reporter: Option<ActionReporter>) {
        self.shared.device.set_reporter(reporter);
    }

    #[must_use]
    pub fn stats(&self) -> watch::Receiver<SyncStats> {
        self.shared.stats.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.shared.phase.subscribe()
    }

    #[must_use]
    pub fn device_id(&self) -> Option<DeviceId> {
        self.shared.device.device_id()
    }

    #[must_use]
    pub fn pending_action_count(&self) -> usize {
        self.shared.queue.pending_action_count()
    }

    pub async fn failed_actions(&self) -> Result<Vec<FailedAction<CloudAction>>> {
        self.shared.queue.failed_actions().await
    }

    fn schema_version(&self) -> SchemaVersion {
        *self
            .shared
            .schema_version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn storage_for(&self, storage_type: ClientStorageType) -> &Arc<dyn LocalStorage> {
        match storage_type {
            ClientStorageType::Normal => &self.shared.storage,
            ClientStorageType::Persistent => &self.shared.persistent_storage,
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        lock(&self.shared.tasks).push(task);
    }

    async fn integrate_downloaded(&self, downloaded: DownloadedBatch) -> Result<()> {
        let DownloadedBatch { batch, last_seen } = downloaded;
        self.integrate_batch(batch).await?;
        self.advance_last_seen(last_seen).await
    }

    async fn integrate_batch(&self, batch: Vec<CloudUpdate>) -> Result<()> {
        for update in batch {
            let collection = update.collection();
            let Err(error) = self.integrate_update(update).await else {
                continue;
            };
            let error = Error::integration(collection.as_str(), error);
            if self.shared.config.strict_error_reporting {
                return Err(error);
            }
            tracing::error!(%error, "Skipping update that could not be integrated");
        }
        Ok(())
    }

    async fn integrate_update(&self, update: CloudUpdate) -> Result<()> {
        match update {
            CloudUpdate::Overwrite {
                collection,
                storage,
                object,
                where_,
                media,
            } => {
                tracing::debug!(collection = %collection, "Integrating overwrite");
                let mut object = preprocess_pulled_object(collection, object)?;
                if !media.is_empty() {
                    if let Err(error) = self.download_media(&mut object, &media).await {
                        tracing::error!(
                            collection = %collection,
                            %error,
                            "Failed to download media of incoming update"
                        );
                    }
                }
                self.storage_for(storage)
                    .write_incoming_data(IncomingWrite {
                        collection,
                        where_,
                        object,
                    })
                    .await
            }
            CloudUpdate::Delete {
                collection,
                storage,
                where_,
            } => {
                tracing::debug!(collection = %collection, "Integrating delete");
                self.storage_for(storage)
                    .remove_objects(std::slice::from_ref(&where_))
                    .await?;
                Ok(())
            }
        }
    }

    /// Persist the cursor of an integrated batch; it never moves backwards
    async fn advance_last_seen(&self, last_seen: i64) -> Result<()> {
        let current = self.shared.settings.last_seen().await?;
        if current.is_some_and(|current| current >= last_seen) {
            return Ok(());
        }
        self.shared.settings.set_last_seen(last_seen).await
    }

    fn observe_storage_changes(&self) {
        let handler = change_handler(Arc::downgrade(&self.shared));
        let subscriptions = [
            self.shared.storage.on_change(Arc::clone(&handler)),
            self.shared.persistent_storage.on_change(handler),
        ];
        lock(&self.shared.subscriptions).extend(subscriptions);
    }

    fn observe_user_changes(&self, mut user_changes: watch::Receiver<Option<UserId>>) {
        let shared = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            while user_changes.changed().await.is_ok() {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if let Err(error) = (PersonalCloud { shared }).load_device_id().await {
                    tracing::error!(%error, "Failed to resolve device identity");
                }
            }
        });
        self.track(task);
    }

    fn track_stats(&self) {
        let mut status = self.shared.queue.watch_status();
        let shared = Arc::downgrade(&self.shared);
        let uploads = tokio::spawn(async move {
            loop {
                let pending = status.borrow_and_update().pending;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.stats.send_if_modified(|stats| {
                    let changed = stats.pending_uploads != pending;
                    stats.pending_uploads = pending;
                    changed
                });
                drop(shared);
                if status.changed().await.is_err() {
                    break;
                }
            }
        });

        let mut events = self.shared.backend.subscribe_events();
        let shared = Arc::downgrade(&self.shared);
        let downloads = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed backend events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.stats.send_modify(|stats| match event {
                    BackendEvent::IncomingChangesPending { change_count_delta } => {
                        stats.pending_downloads += change_count_delta;
                    }
                    BackendEvent::IncomingChangesProcessed { count } => {
                        stats.pending_downloads = stats.pending_downloads.saturating_sub(count);
                    }
                });
            }
        });

        self.track(uploads);
        self.track(downloads);
    }
}

fn change_handler(shared: Weak<Shared>) -> ChangeHandler {
    Arc::new(move |event: StorageChangeEvent| {
        let shared = shared.clone();
        async move {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let collection = event.collection;
            if let Err(error) = (PersonalCloud { shared })
                .handle_post_storage_change(event)
                .await
            {
                tracing::error!(
                    collection = %collection,
                    %error,
                    "Failed to schedule push of local changes"
                );
            }
        }
        .boxed()
    })
}

async fn integrate_stream(
    shared: Weak<Shared>,
    mut updates: BoxStream<'static, Result<DownloadedBatch>>,
) {
    while let Some(next) = updates.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let cloud = PersonalCloud { shared };
        let result = match next {
            Ok(downloaded) => {
                let _guard = cloud.shared.pull_mutex.lock().await;
                cloud.integrate_downloaded(downloaded).await
            }
            Err(error) => Err(error),
        };
        let Err(error) = result else {
            continue;
        };

        if cloud.shared.config.strict_error_reporting {
            tracing::error!(%error, "Stopping continuous integration");
            *lock(&cloud.shared.strict_error) = Some(error);
            break;
        }
        tracing::error!(%error, "Failed to integrate incoming changes");
        let retry_interval = cloud.shared.config.retry_interval;
        drop(cloud);
        tokio::time::sleep(retry_interval).await;
    }
}
