//! Optimistic/authoritative reconciliation.
//!
//! The display list is the optimistic (in-flight) list followed by the
//! authoritative list, with later duplicates dropped. This is a union by id,
//! not a field merge: whichever copy comes first is shown as-is.
//!
//! Deduplication must run on every render pass. The pipeline prunes an
//! optimistic entry once its metadata write is acknowledged, but the live
//! feed may deliver the authoritative copy before or after that prune.

use std::collections::HashSet;

use crate::models::FileRecord;

/// Merge optimistic and authoritative records into one display list.
pub fn merge(optimistic: &[FileRecord], authoritative: &[FileRecord]) -> Vec<FileRecord> {
    let combined = optimistic.iter().chain(authoritative.iter()).cloned();
    dedup_by_id(combined)
}

/// Keep the first occurrence of each id, preserving order.
pub fn dedup_by_id<I>(records: I) -> Vec<FileRecord>
where
    I: IntoIterator<Item = FileRecord>,
{
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}

/// Case-insensitive search over name and AI summary. An empty query matches.
pub fn matches_query(record: &FileRecord, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    record.name.to_lowercase().contains(&query)
        || record
            .ai_summary
            .as_ref()
            .is_some_and(|s| s.to_lowercase().contains(&query))
}
