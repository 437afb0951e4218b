//! Stored page content kept in persistent storage

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of content stored for a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoredContentType {
    HtmlBody,
    PdfContent,
}

impl StoredContentType {
    /// MIME type the content is uploaded with
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::HtmlBody => "text/html",
            Self::PdfContent => "application/json",
        }
    }
}

/// Full page content. The content itself is synced as a media blob, only
/// its reference travels through the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocContent {
    pub normalized_url: String,
    pub stored_content_type: StoredContentType,
    /// HTML string for `htmlBody`, page text array for `pdfContent`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}
