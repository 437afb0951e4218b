//! Shared utility functions used across multiple modules.

use std::sync::Arc;

/// Millisecond clock used for remote timestamps and the change log.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock in Unix milliseconds.
pub fn system_clock() -> Clock {
    Arc::new(unix_millis_now)
}

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
