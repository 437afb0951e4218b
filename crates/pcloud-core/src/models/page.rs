//! Page, visit, bookmark and favicon models

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static URL_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z][a-zA-Z0-9+.-]*://)?(?:[^@/?#]*@)?([^:/?#]+)").expect("Invalid regex")
});

/// A saved web page, keyed by its normalized URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Normalized URL (scheme and `www.` stripped)
    pub url: String,
    pub full_url: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_title: Option<String>,
    /// Extracted page text, kept on-device only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Host parts of a full URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub hostname: String,
    pub domain: String,
}

impl UrlParts {
    /// Extract the hostname (without `www.`) and the registrable domain.
    ///
    /// Returns `None` when no host can be found.
    pub fn extract(full_url: &str) -> Option<Self> {
        let host = URL_HOST.captures(full_url.trim())?.get(1)?.as_str();
        let hostname = host.strip_prefix("www.").unwrap_or(host).to_lowercase();
        if hostname.is_empty() {
            return None;
        }
        let labels: Vec<&str> = hostname.split('.').collect();
        let domain = if labels.len() > 2 {
            labels[labels.len() - 2..].join(".")
        } else {
            hostname.clone()
        };
        Some(Self { hostname, domain })
    }
}

/// A visit to a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub url: String,
    /// Visit start (Unix ms)
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_max_perc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_max_px: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_perc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_px: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub url: String,
    pub time: i64,
}

/// Favicon of a host. The image data never leaves the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavIcon {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn url_parts_strip_www() {
        assert_eq!(
            UrlParts::extract("https://www.getmemexed.com/test"),
            Some(UrlParts {
                hostname: "getmemexed.com".to_string(),
                domain: "getmemexed.com".to_string(),
            })
        );
    }

    #[test]
    fn url_parts_keep_subdomains_in_hostname() {
        let parts = UrlParts::extract("http://blog.notionized.com:8080/foo?x=1").unwrap();
        assert_eq!(parts.hostname, "blog.notionized.com");
        assert_eq!(parts.domain, "notionized.com");
    }

    #[test]
    fn url_parts_reject_empty() {
        assert_eq!(UrlParts::extract(""), None);
    }

    #[test]
    fn page_uses_camel_case_fields() {
        let page: Page = serde_json::from_value(serde_json::json!({
            "url": "getmemexed.com/test",
            "fullUrl": "https://www.getmemexed.com/test",
            "domain": "getmemexed.com",
            "hostname": "getmemexed.com",
            "fullTitle": "getmemexed.com title",
        }))
        .unwrap();
        assert_eq!(page.full_title.as_deref(), Some("getmemexed.com title"));
        assert_eq!(page.text, None);
    }
}
