use std::collections::BTreeMap;
use std::path::Path;

use pcloud_core::action_queue::StoredAction;
use pcloud_core::translation::PushChange;
use pcloud_core::util::unix_millis_now;
use pcloud_core::CloudAction;
use serde::Serialize;

use crate::commands::common::{format_relative_time, open_local_database};
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub kind: &'static str,
    pub summary: String,
    pub created_at: i64,
    pub attempts: u32,
    pub failed_at: Option<i64>,
    pub error: Option<String>,
}

/// Short description of what a queued action will do
pub fn describe_action(action: &CloudAction) -> (&'static str, String) {
    match action {
        CloudAction::PushObject { updates } => {
            let mut per_collection: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
            for update in updates {
                let counts = per_collection.entry(update.collection.as_str()).or_default();
                match update.change {
                    PushChange::Overwrite { .. } => counts.0 += 1,
                    PushChange::Delete { .. } => counts.1 += 1,
                }
            }
            let parts = per_collection
                .into_iter()
                .map(|(collection, (overwrites, deletes))| match (overwrites, deletes) {
                    (0, deletes) => format!("{collection} -{deletes}"),
                    (overwrites, 0) => format!("{collection} +{overwrites}"),
                    (overwrites, deletes) => format!("{collection} +{overwrites} -{deletes}"),
                })
                .collect::<Vec<_>>();
            ("push", parts.join(", "))
        }
        CloudAction::ExecuteClientInstructions {
            client_instructions,
        } => (
            "instructions",
            format!("{} media uploads", client_instructions.len()),
        ),
    }
}

pub fn stored_action_to_item(stored: StoredAction) -> Result<QueueItem, CliError> {
    let action: CloudAction =
        serde_json::from_str(&stored.action).map_err(|e| CliError::UnreadableAction {
            id: stored.id,
            message: e.to_string(),
        })?;
    let (kind, summary) = describe_action(&action);
    Ok(QueueItem {
        id: stored.id,
        kind,
        summary,
        created_at: stored.created_at,
        attempts: stored.attempts,
        failed_at: stored.failed_at,
        error: stored.error,
    })
}

pub fn format_queue_lines(items: &[QueueItem], now_ms: i64) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{:>5}  {:<12}  {:<9}  attempts={}  {}",
                item.id,
                item.kind,
                format_relative_time(item.created_at, now_ms),
                item.attempts,
                item.summary
            );
            if let Some(error) = &item.error {
                line.push_str(&format!("  error={error}"));
            }
            line
        })
        .collect()
}

pub async fn run_queue(failed: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let local = open_local_database(db_path).await?;
    let stored = if failed {
        local.actions.failed().await?
    } else {
        local.actions.pending().await?
    };
    let items = stored
        .into_iter()
        .map(stored_action_to_item)
        .collect::<Result<Vec<_>, _>>()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!(
            "{}",
            if failed {
                "No failed actions."
            } else {
                "No queued actions."
            }
        );
        return Ok(());
    }

    for line in format_queue_lines(&items, unix_millis_now()) {
        println!("{line}");
    }
    Ok(())
}
