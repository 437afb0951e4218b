use std::path::Path;

use pcloud_core::config::SyncConfig;
use pcloud_core::maintenance::{has_passive_data, wipe_passive_data, PassiveDataWipe};

use crate::commands::common::open_local_database;
use crate::error::CliError;

pub async fn run_passive_data_check(db_path: &Path) -> Result<(), CliError> {
    let local = open_local_database(db_path).await?;
    if has_passive_data(local.storage.as_ref()).await? {
        println!("Old browsing history found. Run `pcloud passive-data clean` to remove it.");
    } else {
        println!("No old browsing history stored.");
    }
    Ok(())
}

pub async fn run_passive_data_clean(
    visit_limit: Option<usize>,
    db_path: &Path,
) -> Result<(), CliError> {
    let visit_limit = resolve_visit_limit(visit_limit)?;
    let local = open_local_database(db_path).await?;
    let wipe = wipe_passive_data(local.storage.as_ref(), visit_limit).await?;
    println!("{}", format_wipe_summary(&wipe));
    Ok(())
}

pub fn resolve_visit_limit(visit_limit: Option<usize>) -> Result<usize, CliError> {
    match visit_limit {
        Some(0) => Err(CliError::InvalidVisitLimit),
        Some(limit) => Ok(limit),
        None => Ok(SyncConfig::from_env()?.passive_data_visit_limit),
    }
}

pub fn format_wipe_summary(wipe: &PassiveDataWipe) -> String {
    format!(
        "Removed {} pages, {} visits and {} favicons",
        wipe.removed_pages, wipe.removed_visits, wipe.removed_fav_icons
    )
}
