//! ID generation utilities for Corral
//!
//! Task ids, tool-call fallback ids, and checkpoint tag names.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn next_sequence() -> u32 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Generate a unique task ID
///
/// Format: `{timestamp_ms}-{hex4}`
/// Example: `1738300800123-a1b2`
pub fn generate_task_id() -> String {
    let timestamp = now_ms();
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(next_sequence().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", timestamp, &digest[..4])
}

/// Build a checkpoint tag name that sorts chronologically by refname.
///
/// Format: `{prefix}{YYYYmmdd-HHMMSS-mmm}-{seq:04}`
pub fn checkpoint_tag(prefix: &str) -> String {
    checkpoint_tag_at(prefix, Utc::now())
}

pub(crate) fn checkpoint_tag_at(prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}{}-{:04}",
        prefix,
        at.format("%Y%m%d-%H%M%S-%3f"),
        next_sequence() % 10_000
    )
}

/// Short form of a task id used for file names
pub fn short_id(task_id: &str) -> &str {
    let end = task_id
        .char_indices()
        .nth(18)
        .map(|(i, _)| i)
        .unwrap_or(task_id.len());
    &task_id[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_task_id_format() {
        let id = generate_task_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 4);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_task_id_unique() {
        let a = generate_task_id();
        let b = generate_task_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_checkpoint_tag_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let tag = checkpoint_tag_at("corral-checkpoint-", at);
        assert!(tag.starts_with("corral-checkpoint-20260304-050607-000-"));
    }

    #[test]
    fn test_checkpoint_tags_sort_in_creation_order() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let first = checkpoint_tag_at("cp-", at);
        let later = checkpoint_tag_at("cp-", at + chrono::Duration::seconds(1));
        assert!(first < later);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("1738300800123-a1b2-extra"), "1738300800123-a1b2");
    }
}
