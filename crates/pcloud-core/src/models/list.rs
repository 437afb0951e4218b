//! Custom list models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomList {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_deletable: bool,
    #[serde(default)]
    pub is_nestable: bool,
    pub created_at: i64,
}

/// Membership of a page in a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListEntry {
    pub list_id: i64,
    pub page_url: String,
    pub full_url: String,
    pub created_at: i64,
}

/// Marks a list as shared under the given remote id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedListMetadata {
    pub local_id: i64,
    pub remote_id: String,
}
