//! Observable sync state.

use serde::Serialize;

/// Lifecycle of the sync orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    /// `setup` has not run yet
    #[default]
    Uninitialized,
    /// No authenticated user; local changes are queued but not pushed
    Paused,
    /// Pushing queued changes and pulling remote ones
    Active,
}

/// Live counters shown to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub pending_uploads: usize,
    pub pending_downloads: usize,
}
