use std::path::Path;

use pcloud_core::storage::LocalStorage;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, open_local_database, LocalDatabase};
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub sync_enabled: bool,
    pub device_id: Option<u64>,
    pub last_seen: Option<i64>,
    pub schema_version: i64,
    pub pending_actions: usize,
    pub failed_actions: usize,
}

pub async fn collect_status(local: &LocalDatabase) -> Result<StatusReport, CliError> {
    Ok(StatusReport {
        sync_enabled: local.settings.is_set_up().await?,
        device_id: local.settings.device_id().await?.map(|id| id.get()),
        last_seen: local.settings.last_seen().await?,
        schema_version: local.storage.schema_version().await?.as_millis(),
        pending_actions: local.actions.count_pending().await?,
        failed_actions: local.actions.count_failed().await?,
    })
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    vec![
        format!(
            "Cloud sync:      {}",
            if report.sync_enabled { "enabled" } else { "disabled" }
        ),
        format!(
            "Device:          {}",
            report
                .device_id
                .map_or_else(|| "not registered".to_string(), |id| id.to_string())
        ),
        format!(
            "Last pulled:     {}",
            report
                .last_seen
                .map_or_else(|| "never".to_string(), format_sync_timestamp)
        ),
        format!(
            "Schema version:  {}",
            format_sync_timestamp(report.schema_version)
        ),
        format!("Pending actions: {}", report.pending_actions),
        format!("Failed actions:  {}", report.failed_actions),
    ]
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let local = open_local_database(db_path).await?;
    let report = collect_status(&local).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }

    Ok(())
}
