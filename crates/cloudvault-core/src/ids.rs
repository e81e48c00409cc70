//! Identifier and storage-path derivation.
//!
//! All three functions are pure apart from the random component of
//! [`new_file_id`], so callers can rely on them for idempotent lookups.

use chrono::{DateTime, Utc};
use uuid::Uuid;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Generate a client-side file identifier.
///
/// Composed of a random base-36 component followed by the base-36 epoch
/// milliseconds of `now`, so ids from different sessions and different
/// instants do not collide.
pub fn new_file_id(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().as_u64_pair().0;
    let millis = now.timestamp_millis().max(0) as u64;
    format!("{}{}", to_base36(random), to_base36(millis))
}

/// Blob path for an upload: `files/{owner}/{epochMillis}_{name}`.
///
/// Path separators in the original name are replaced so the object always
/// lands directly under the owner's prefix.
pub fn blob_path(owner_id: &str, now: DateTime<Utc>, file_name: &str) -> String {
    let safe_name: String = file_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!(
        "files/{}/{}_{}",
        owner_id,
        now.timestamp_millis(),
        safe_name
    )
}

/// Conversation identifier for an unordered pair of participants.
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_file_ids_are_unique() {
        let now = Utc::now();
        let ids: HashSet<String> = (0..1000).map(|_| new_file_id(now)).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_file_id_ends_with_timestamp() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let id = new_file_id(now);
        assert!(id.ends_with(&to_base36(1_700_000_000_000)));
    }

    #[test]
    fn test_blob_path_layout() {
        let now = Utc.timestamp_millis_opt(1_234).unwrap();
        assert_eq!(
            blob_path("uid-1", now, "report.pdf"),
            "files/uid-1/1234_report.pdf"
        );
        assert_eq!(
            blob_path("uid-1", now, "../etc/passwd"),
            "files/uid-1/1234_.._etc_passwd"
        );
    }

    #[test]
    fn test_conversation_id_order_independent() {
        assert_eq!(conversation_id("bob", "alice"), "alice_bob");
        assert_eq!(conversation_id("alice", "bob"), "alice_bob");
    }
}
