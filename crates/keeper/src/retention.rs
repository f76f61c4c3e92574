//! Retention policy for keep-alive logs.
//!
//! Keeps the `limit` most recent records ordered by `ping_timestamp`
//! descending. Records with equal timestamps are ordered by insertion, the
//! later insertion counting as more recent. The Postgres and MongoDB
//! adapters express the same ordering in their delete statements.

use crate::types::KeepAliveRecord;
use std::cmp::Reverse;

/// Prune `records` (in insertion order) down to `limit` entries.
///
/// Surviving records keep their relative insertion order. Returns the
/// number of records removed.
pub fn prune_to_limit(records: &mut Vec<KeepAliveRecord>, limit: u32) -> u64 {
    let limit = limit as usize;
    if records.len() <= limit {
        return 0;
    }

    let mut ranked: Vec<usize> = (0..records.len()).collect();
    ranked.sort_by_key(|&idx| Reverse((records[idx].ping_timestamp, idx)));

    let mut keep = vec![false; records.len()];
    for &idx in ranked.iter().take(limit) {
        keep[idx] = true;
    }

    let before = records.len();
    let mut position = 0;
    records.retain(|_| {
        let kept = keep[position];
        position += 1;
        kept
    });

    (before - records.len()) as u64
}
