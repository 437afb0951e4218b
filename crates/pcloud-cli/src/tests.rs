use pcloud_core::models::{LocalCollection, ObjectKey, SchemaVersion};
use pcloud_core::translation::PushUpdate;
use pcloud_core::CloudAction;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::cli::CompletionShell;
use crate::commands::common::{
    format_relative_time, format_sync_timestamp, open_local_database, open_offline_cloud,
};
use crate::commands::completions::render_completions;
use crate::commands::passive_data::{format_wipe_summary, resolve_visit_limit};
use crate::commands::queue::{describe_action, format_queue_lines, stored_action_to_item};
use crate::commands::status::{collect_status, format_status_lines, StatusReport};
use crate::error::CliError;

fn page(url: &str) -> serde_json::Value {
    json!({
        "url": url,
        "fullUrl": format!("https://{url}"),
        "domain": "example.com",
        "hostname": "example.com",
        "fullTitle": "Example",
    })
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn visit_limit_must_be_positive() {
    assert!(matches!(
        resolve_visit_limit(Some(0)),
        Err(CliError::InvalidVisitLimit)
    ));
    assert_eq!(resolve_visit_limit(Some(3)).unwrap(), 3);
}

#[test]
fn push_actions_are_summarized_per_collection() {
    let version = SchemaVersion::CURRENT;
    let action = CloudAction::PushObject {
        updates: vec![
            PushUpdate::overwrite(version, None, LocalCollection::Pages, page("example.com/a")),
            PushUpdate::overwrite(version, None, LocalCollection::Pages, page("example.com/b")),
            PushUpdate::delete(
                version,
                None,
                ObjectKey::Page {
                    url: "example.com/c".to_string(),
                },
            ),
            PushUpdate::overwrite(
                version,
                None,
                LocalCollection::Bookmarks,
                json!({ "url": "example.com/a", "time": 1 }),
            ),
        ],
    };

    assert_eq!(
        describe_action(&action),
        ("push", "bookmarks +1, pages +2 -1".to_string())
    );
    assert_eq!(
        describe_action(&CloudAction::ExecuteClientInstructions {
            client_instructions: Vec::new(),
        }),
        ("instructions", "0 media uploads".to_string())
    );
}

#[test]
fn status_lines_show_missing_values_plainly() {
    let report = StatusReport {
        sync_enabled: false,
        device_id: None,
        last_seen: None,
        schema_version: 0,
        pending_actions: 2,
        failed_actions: 0,
    };

    let lines = format_status_lines(&report);
    assert_eq!(lines[0], "Cloud sync:      disabled");
    assert_eq!(lines[1], "Device:          not registered");
    assert_eq!(lines[2], "Last pulled:     never");
    assert_eq!(lines[4], "Pending actions: 2");
}

#[test]
fn completions_mention_subcommands() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("pcloud"));
    assert!(script.contains("prepare-migration"));
    assert!(script.contains("passive-data"));
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_database_reports_nothing_queued() {
    let dir = tempfile::tempdir().unwrap();
    let local = open_local_database(&dir.path().join("pcloud.db"))
        .await
        .unwrap();

    let report = collect_status(&local).await.unwrap();

    assert_eq!(
        report,
        StatusReport {
            sync_enabled: false,
            device_id: None,
            last_seen: None,
            schema_version: SchemaVersion::CURRENT.as_millis(),
            pending_actions: 0,
            failed_actions: 0,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn migration_preparation_queues_local_objects() {
    let dir = tempfile::tempdir().unwrap();
    let local = open_local_database(&dir.path().join("pcloud.db"))
        .await
        .unwrap();
    local
        .storage
        .create_object(LocalCollection::Pages, page("example.com/a"))
        .await
        .unwrap();

    let cloud = open_offline_cloud(&local).await.unwrap();
    assert_eq!(cloud.run_data_migration_preparation().await.unwrap(), 1);

    let items = local
        .actions
        .pending()
        .await
        .unwrap()
        .into_iter()
        .map(stored_action_to_item)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, "push");
    assert_eq!(items[0].summary, "pages +1");

    let lines = format_queue_lines(&items, items[0].created_at);
    assert!(lines[0].contains("just now"));
    assert_eq!(collect_status(&local).await.unwrap().pending_actions, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn enabling_sync_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pcloud.db");
    {
        let local = open_local_database(&db_path).await.unwrap();
        let cloud = open_offline_cloud(&local).await.unwrap();
        cloud.enable_cloud_sync_for_new_install().await.unwrap();
    }

    let local = open_local_database(&db_path).await.unwrap();
    assert!(collect_status(&local).await.unwrap().sync_enabled);
}

#[tokio::test(flavor = "multi_thread")]
async fn passive_data_clean_removes_unused_pages() {
    let dir = tempfile::tempdir().unwrap();
    let local = open_local_database(&dir.path().join("pcloud.db"))
        .await
        .unwrap();
    local
        .storage
        .create_object(LocalCollection::Pages, page("example.com/a"))
        .await
        .unwrap();
    local
        .storage
        .create_object(
            LocalCollection::Visits,
            json!({ "url": "example.com/a", "time": 1_000 }),
        )
        .await
        .unwrap();

    let wipe = pcloud_core::maintenance::wipe_passive_data(local.storage.as_ref(), 20)
        .await
        .unwrap();

    assert_eq!(
        format_wipe_summary(&wipe),
        "Removed 1 pages, 1 visits and 0 favicons"
    );
    assert_eq!(collect_status(&local).await.unwrap().pending_actions, 0);
}
