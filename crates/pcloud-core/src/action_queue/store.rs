//! Persisted actions in the `personal_cloud_actions` table

use libsql::params;

use crate::db::{Database, SharedDatabase};
use crate::error::Result;

/// One row of the action table, with the action still serialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAction {
    pub id: i64,
    pub action: String,
    pub created_at: i64,
    pub attempts: u32,
    pub failed_at: Option<i64>,
    pub error: Option<String>,
}

/// libSQL storage for queued actions
#[derive(Clone)]
pub struct LibSqlActionStore {
    db: SharedDatabase,
}

const SELECT_COLUMNS: &str =
    "SELECT id, action, created_at, attempts, failed_at, error FROM personal_cloud_actions";

impl LibSqlActionStore {
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Append actions in order, returning their ids. Either all of them are
    /// stored or none is.
    pub async fn append(&self, actions: &[String], created_at: i64) -> Result<Vec<i64>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let ids = match insert_all(&db, actions, created_at).await {
            Ok(ids) => ids,
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        };

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(ids)
    }

    /// Oldest action that has not failed permanently
    pub async fn oldest_pending(&self) -> Result<Option<StoredAction>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!("{SELECT_COLUMNS} WHERE failed_at IS NULL ORDER BY id LIMIT 1"),
                (),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_action(&row)?)),
            None => Ok(None),
        }
    }

    /// All actions still waiting to execute, oldest first
    pub async fn pending(&self) -> Result<Vec<StoredAction>> {
        self.list("WHERE failed_at IS NULL ORDER BY id").await
    }

    /// Actions that exhausted their attempts, oldest first
    pub async fn failed(&self) -> Result<Vec<StoredAction>> {
        self.list("WHERE failed_at IS NOT NULL ORDER BY id").await
    }

    pub async fn count_pending(&self) -> Result<usize> {
        self.count("WHERE failed_at IS NULL").await
    }

    pub async fn count_failed(&self) -> Result<usize> {
        self.count("WHERE failed_at IS NOT NULL").await
    }

    /// Count one more execution attempt, returning the new total
    pub async fn record_attempt(&self, id: i64) -> Result<u32> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "UPDATE personal_cloud_actions SET attempts = attempts + 1 WHERE id = ?",
                [id],
            )
            .await?;
        let mut rows = db
            .connection()
            .query(
                "SELECT attempts FROM personal_cloud_actions WHERE id = ?",
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(u32::try_from(row.get::<i64>(0)?).unwrap_or(u32::MAX)),
            None => Ok(0),
        }
    }

    /// Remove a completed action and persist its follow-ups, in one transaction
    pub async fn complete(
        &self,
        id: i64,
        follow_ups: &[String],
        created_at: i64,
    ) -> Result<Vec<i64>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let ids = match insert_all(&db, follow_ups, created_at).await {
            Ok(ids) => ids,
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        };
        if let Err(e) = conn
            .execute("DELETE FROM personal_cloud_actions WHERE id = ?", [id])
            .await
        {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(ids)
    }

    /// Keep the action but take it out of the pending set
    pub async fn mark_failed(&self, id: i64, failed_at: i64, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "UPDATE personal_cloud_actions SET failed_at = ?, error = ? WHERE id = ?",
                params![failed_at, error, id],
            )
            .await?;
        Ok(())
    }

    /// Delete every pending action, returning how many were removed
    pub async fn clear_pending(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let removed = db
            .connection()
            .execute("DELETE FROM personal_cloud_actions WHERE failed_at IS NULL", ())
            .await?;
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }

    async fn list(&self, clause: &str) -> Result<Vec<StoredAction>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(&format!("{SELECT_COLUMNS} {clause}"), ())
            .await?;

        let mut actions = Vec::new();
        while let Some(row) = rows.next().await? {
            actions.push(row_to_action(&row)?);
        }
        Ok(actions)
    }

    async fn count(&self, clause: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!("SELECT COUNT(*) FROM personal_cloud_actions {clause}"),
                (),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(usize::try_from(row.get::<i64>(0)?).unwrap_or(0)),
            None => Ok(0),
        }
    }
}

async fn insert_all(db: &Database, actions: &[String], created_at: i64) -> Result<Vec<i64>> {
    let conn = db.connection();
    let mut ids = Vec::with_capacity(actions.len());
    for action in actions {
        conn.execute(
            "INSERT INTO personal_cloud_actions (action, created_at) VALUES (?, ?)",
            params![action.as_str(), created_at],
        )
        .await?;
        ids.push(conn.last_insert_rowid());
    }
    Ok(ids)
}

fn row_to_action(row: &libsql::Row) -> Result<StoredAction> {
    Ok(StoredAction {
        id: row.get(0)?,
        action: row.get(1)?,
        created_at: row.get(2)?,
        attempts: u32::try_from(row.get::<i64>(3)?).unwrap_or(u32::MAX),
        failed_at: row.get(4)?,
        error: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn setup() -> LibSqlActionStore {
        LibSqlActionStore::new(Database::open_in_memory().await.unwrap().shared())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_actions_come_back_oldest_first() {
        let store = setup().await;
        let ids = store
            .append(&["first".to_string(), "second".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);

        let oldest = store.oldest_pending().await.unwrap().unwrap();
        assert_eq!(oldest.action, "first");
        assert_eq!(oldest.attempts, 0);
        assert_eq!(store.count_pending().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_stores_nothing_when_one_insert_fails() {
        let store = setup().await;
        store
            .db
            .lock()
            .await
            .connection()
            .execute(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON personal_cloud_actions
                 WHEN NEW.action = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END",
                (),
            )
            .await
            .unwrap();

        let result = store
            .append(&["first".to_string(), "poison".to_string()], 10)
            .await;

        assert!(result.is_err());
        assert_eq!(store.count_pending().await.unwrap(), 0);
        let ids = store.append(&["after".to_string()], 20).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_complete_persists_follow_ups_before_removal() {
        let store = setup().await;
        let ids = store
            .append(&["push".to_string(), "later".to_string()], 10)
            .await
            .unwrap();

        store
            .complete(ids[0], &["upload".to_string()], 20)
            .await
            .unwrap();

        let pending: Vec<String> = store
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|action| action.action)
            .collect();
        // Follow-ups queue behind work that was already waiting
        assert_eq!(pending, vec!["later".to_string(), "upload".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_actions_leave_pending_set() {
        let store = setup().await;
        let ids = store.append(&["push".to_string()], 10).await.unwrap();
        assert_eq!(store.record_attempt(ids[0]).await.unwrap(), 1);
        assert_eq!(store.record_attempt(ids[0]).await.unwrap(), 2);

        store.mark_failed(ids[0], 30, "backend down").await.unwrap();

        assert_eq!(store.count_pending().await.unwrap(), 0);
        let failed = store.failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 2);
        assert_eq!(failed[0].failed_at, Some(30));
        assert_eq!(failed[0].error.as_deref(), Some("backend down"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_pending_keeps_failed_actions() {
        let store = setup().await;
        let ids = store
            .append(&["a".to_string(), "b".to_string()], 10)
            .await
            .unwrap();
        store.mark_failed(ids[0], 20, "boom").await.unwrap();

        assert_eq!(store.clear_pending().await.unwrap(), 1);
        assert_eq!(store.count_pending().await.unwrap(), 0);
        assert_eq!(store.count_failed().await.unwrap(), 1);
    }
}
