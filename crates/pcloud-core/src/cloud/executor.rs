//! Side effects of queued cloud actions

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use super::CloudAction;
use crate::action_queue::{ActionExecutor, ExecutionOutcome, Preprocessed};
use crate::backend::{CloudBackend, UploadMediaRequest};
use crate::error::Result;
use crate::models::{ClientStorageType, DeviceId, LocalCollection};
use crate::storage::LocalStorage;
use crate::translation::{ClientInstruction, PushUpdate};

/// Observer of executed actions
pub type ActionReporter = Arc<dyn Fn(&CloudAction) + Send + Sync>;

/// Device identity and observers shared by the orchestrator and the executor
#[derive(Default)]
pub(crate) struct DeviceContext {
    device_id: RwLock<Option<DeviceId>>,
    reporter: RwLock<Option<ActionReporter>>,
}

impl DeviceContext {
    pub(crate) fn device_id(&self) -> Option<DeviceId> {
        *self
            .device_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_device_id(&self, device_id: Option<DeviceId>) {
        *self
            .device_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = device_id;
    }

    pub(crate) fn set_reporter(&self, reporter: Option<ActionReporter>) {
        *self
            .reporter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = reporter;
    }

    fn report(&self, action: &CloudAction) {
        let reporter = self
            .reporter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reporter) = reporter {
            reporter(action);
        }
    }
}

/// Executes [`CloudAction`]s against the backend
pub struct CloudActionExecutor {
    backend: Arc<dyn CloudBackend>,
    storage: Arc<dyn LocalStorage>,
    persistent_storage: Arc<dyn LocalStorage>,
    device: Arc<DeviceContext>,
}

impl CloudActionExecutor {
    pub(crate) fn new(
        backend: Arc<dyn CloudBackend>,
        storage: Arc<dyn LocalStorage>,
        persistent_storage: Arc<dyn LocalStorage>,
        device: Arc<DeviceContext>,
    ) -> Self {
        Self {
            backend,
            storage,
            persistent_storage,
            device,
        }
    }

    async fn push_object(
        &self,
        device_id: DeviceId,
        updates: &[PushUpdate],
    ) -> Result<ExecutionOutcome<CloudAction>> {
        let updates = updates
            .iter()
            .cloned()
            .map(|mut update| {
                update.device_id = update.device_id.or(Some(device_id));
                update
            })
            .collect();
        let result = self.backend.push_updates(updates).await?;
        if result.client_instructions.is_empty() {
            return Ok(ExecutionOutcome::completed());
        }

        tracing::debug!(
            count = result.client_instructions.len(),
            "Scheduling client instructions"
        );
        Ok(ExecutionOutcome::Completed {
            follow_ups: vec![CloudAction::ExecuteClientInstructions {
                client_instructions: result.client_instructions,
            }],
        })
    }

    async fn execute_client_instructions(
        &self,
        device_id: DeviceId,
        instructions: &[ClientInstruction],
    ) -> Result<ExecutionOutcome<CloudAction>> {
        let uploads = instructions
            .iter()
            .map(|instruction| self.upload_to_storage(device_id, instruction));
        join_all(uploads)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;
        Ok(ExecutionOutcome::completed())
    }

    /// Upload one field of a local object. Instructions that cannot apply to
    /// this client are skipped; upload failures keep the action queued.
    async fn upload_to_storage(
        &self,
        device_id: DeviceId,
        instruction: &ClientInstruction,
    ) -> Result<()> {
        let ClientInstruction::UploadToStorage {
            storage,
            collection,
            upload_where,
            upload_field,
            upload_path,
            upload_as_json,
            upload_content_type,
            change_info,
        } = instruction;

        if LocalCollection::from_str(collection).is_err() {
            tracing::error!(
                collection = %collection,
                "Client instruction names a collection that does not exist"
            );
            return Ok(());
        }

        let store = match storage {
            ClientStorageType::Normal => &self.storage,
            ClientStorageType::Persistent => &self.persistent_storage,
        };
        let object = match store.get_object(upload_where).await {
            Ok(Some(object)) => object,
            Ok(None) => {
                tracing::debug!(
                    collection = %collection,
                    path = %upload_path,
                    "Object to upload no longer exists"
                );
                return Ok(());
            }
            Err(error) => {
                tracing::error!(
                    collection = %collection,
                    %error,
                    "Could not read object named by client instruction"
                );
                return Ok(());
            }
        };

        let media_object = match object.get(upload_field.as_str()) {
            None | Some(Value::Null) => {
                tracing::error!(
                    collection = %collection,
                    field = %upload_field,
                    "Client instruction names a missing field"
                );
                return Ok(());
            }
            Some(value) if *upload_as_json => serde_json::to_string(value)?,
            Some(Value::String(text)) => text.clone(),
            Some(_) => {
                tracing::error!(
                    collection = %collection,
                    field = %upload_field,
                    "Field to upload as text is not a string"
                );
                return Ok(());
            }
        };

        self.backend
            .upload_to_media(UploadMediaRequest {
                device_id,
                media_path: upload_path.clone(),
                media_object,
                change_info: change_info.clone(),
                content_type: upload_content_type.clone(),
            })
            .await
    }
}

#[async_trait]
impl ActionExecutor<CloudAction> for CloudActionExecutor {
    fn preprocess_action(&self, action: &CloudAction) -> Preprocessed {
        match action {
            CloudAction::PushObject { updates } if updates.is_empty() => Preprocessed::Invalid {
                reason: "push without updates".to_string(),
            },
            CloudAction::ExecuteClientInstructions {
                client_instructions,
            } if client_instructions.is_empty() => Preprocessed::Invalid {
                reason: "no client instructions".to_string(),
            },
            _ => Preprocessed::Valid,
        }
    }

    async fn execute_action(&self, action: &CloudAction) -> Result<ExecutionOutcome<CloudAction>> {
        let Some(device_id) = self.device.device_id() else {
            tracing::info!("Device identity unknown, pausing cloud actions");
            return Ok(ExecutionOutcome::PauseAndRetry);
        };

        let outcome = match action {
            CloudAction::PushObject { updates } => self.push_object(device_id, updates).await?,
            CloudAction::ExecuteClientInstructions {
                client_instructions,
            } => {
                self.execute_client_instructions(device_id, client_instructions)
                    .await?
            }
        };
        self.device.report(action);
        Ok(outcome)
    }
}
