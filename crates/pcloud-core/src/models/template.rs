//! Text template model

use serde::{Deserialize, Serialize};

/// A copy-paste template rendered from page and annotation data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextTemplate {
    pub id: i64,
    pub title: String,
    pub code: String,
    #[serde(default)]
    pub is_favourite: bool,
}
