use std::path::Path;

use crate::commands::common::{open_local_database, open_offline_cloud};
use crate::error::CliError;

pub async fn run_enable(db_path: &Path) -> Result<(), CliError> {
    let local = open_local_database(db_path).await?;
    let cloud = open_offline_cloud(&local).await?;
    if cloud.is_cloud_sync_enabled().await? {
        println!("Cloud sync is already enabled");
        return Ok(());
    }

    cloud.enable_cloud_sync_for_new_install().await?;
    println!("Cloud sync enabled");
    Ok(())
}

pub async fn run_prepare_migration(db_path: &Path) -> Result<(), CliError> {
    let local = open_local_database(db_path).await?;
    let cloud = open_offline_cloud(&local).await?;

    let scheduled = cloud.run_data_migration_preparation().await?;
    println!(
        "Queued {scheduled} objects for upload ({} actions pending)",
        cloud.pending_action_count()
    );
    Ok(())
}
