//! Operations exposed to the UI and the CLI

use super::{CloudAction, PersonalCloud};
use crate::action_queue::QueueInteraction;
use crate::error::Result;
use crate::maintenance::{has_passive_data, wipe_passive_data, PassiveDataWipe};
use crate::models::{ClientStorageType, LocalCollection};
use crate::translation::{preprocess_object_for_push, PushUpdate};

/// Objects per push scheduled by the migration preparation
const MIGRATION_PUSH_SIZE: usize = 100;

impl PersonalCloud {
    pub async fn is_cloud_sync_enabled(&self) -> Result<bool> {
        self.shared.settings.is_set_up().await
    }

    /// Turn sync on for an installation that has nothing to migrate
    pub async fn enable_cloud_sync_for_new_install(&self) -> Result<()> {
        tracing::info!("Enabling cloud sync for a new install");
        self.enable_sync().await
    }

    /// Wait until the data queued by the migration preparation is pushed
    pub async fn run_data_migration(&self) -> Result<()> {
        self.wait_for_sync().await
    }

    /// Replace whatever is queued by an overwrite of every local object,
    /// collections ordered so referenced objects are pushed first.
    ///
    /// Returns the number of objects scheduled.
    pub async fn run_data_migration_preparation(&self) -> Result<usize> {
        let _guard = self.shared.push_mutex.lock().await;
        let cleared = self.shared.queue.clear_pending_actions().await?;
        if cleared > 0 {
            tracing::info!(cleared, "Dropped queued actions before migration");
        }

        let schema_version = self.schema_version();
        let device_id = self.shared.device.device_id();
        let mut scheduled = 0;
        for collection in LocalCollection::ALL {
            let objects = self
                .storage_for(collection.storage_type())
                .find_objects(collection)
                .await?;
            if objects.is_empty() {
                continue;
            }
            scheduled += objects.len();

            let updates: Vec<PushUpdate> = objects
                .into_iter()
                .map(|object| {
                    PushUpdate::overwrite(
                        schema_version,
                        device_id,
                        collection,
                        preprocess_object_for_push(collection, object),
                    )
                })
                .collect();
            let actions = updates
                .chunks(MIGRATION_PUSH_SIZE)
                .map(|chunk| CloudAction::PushObject {
                    updates: chunk.to_vec(),
                })
                .collect();
            self.shared
                .queue
                .schedule_many_actions(actions, QueueInteraction::QueueAndReturn)
                .await?;
        }

        tracing::info!(scheduled, "Prepared data migration");
        Ok(scheduled)
    }

    /// Whether local history holds visits from before cloud sync existed
    pub async fn is_passive_data_removal_needed(&self) -> Result<bool> {
        has_passive_data(self.storage_for(ClientStorageType::Normal).as_ref()).await
    }

    pub async fn run_passive_data_clean(&self) -> Result<PassiveDataWipe> {
        wipe_passive_data(
            self.storage_for(ClientStorageType::Normal).as_ref(),
            self.shared.config.passive_data_visit_limit,
        )
        .await
    }
}
