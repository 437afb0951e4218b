//! Annotation models

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static ANNOTATION_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)/#(\d+)$").expect("Invalid regex"));

/// Split an annotation URL (`{pageUrl}/#{localId}`) into its page URL and
/// local id. Returns `None` for plain page URLs.
pub fn split_annotation_url(url: &str) -> Option<(&str, &str)> {
    let captures = ANNOTATION_URL.captures(url)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// Whether a tagged URL points at an annotation rather than a page
pub fn is_annotation_url(url: &str) -> bool {
    split_annotation_url(url).is_some()
}

/// A highlight or note attached to a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// `{pageUrl}/#{createdWhen}`
    pub url: String,
    pub page_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    /// Highlighted text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Anchor descriptor, opaque to sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Value>,
    pub created_when: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationPrivacyLevel {
    pub annotation: String,
    pub privacy_level: i32,
    pub created_when: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_when: Option<i64>,
}

/// Marks an annotation as shared under the given remote id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedAnnotationMetadata {
    pub local_id: String,
    pub remote_id: String,
    #[serde(default)]
    pub exclude_from_lists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_urls_split_into_page_and_id() {
        assert_eq!(
            split_annotation_url("getmemexed.com/test/#1625097600000"),
            Some(("getmemexed.com/test", "1625097600000"))
        );
        assert!(!is_annotation_url("getmemexed.com/test"));
        assert!(!is_annotation_url("getmemexed.com/test#section"));
    }
}
