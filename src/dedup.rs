use std::collections::VecDeque;

use rusqlite::Connection;

use crate::db;
use crate::models::{merchant_from_description, Candidate, Direction};
use crate::similarity;

/// Two observations of the same amount/direction/merchant within this window
/// count as one transaction (SMS + push double delivery).
pub const DUPLICATE_WINDOW_MS: i64 = 3 * 60 * 1000;

/// In-memory buffer bound; oldest entries go first when exceeded.
pub const CACHE_CAPACITY: usize = 50;

/// Merchant-similarity bar for "these are literally the same transaction".
/// Stricter than `similarity::CLUSTER_THRESHOLD` (0.7), which answers the
/// looser question "probably the same merchant" for category reassignment.
pub const MERCHANT_MATCH_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone)]
struct CacheEntry {
    amount: f64,
    direction: Direction,
    merchant: String,
    observed_at: i64,
}

/// Short-term duplicate detector. The in-memory buffer is the fast path for
/// duplicates arriving seconds apart on redundant channels; the backing
/// store catches duplicates across process restarts or after the buffer has
/// aged the original out. Constructor-injected so tests get isolated
/// instances; not a module-level singleton.
pub struct DuplicateDetector {
    capacity: usize,
    window_ms: i64,
    entries: VecDeque<CacheEntry>,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::with_config(CACHE_CAPACITY, DUPLICATE_WINDOW_MS)
    }

    pub fn with_config(capacity: usize, window_ms: i64) -> Self {
        Self {
            capacity,
            window_ms,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Whether the candidate matches a previously seen transaction. A
    /// candidate that does NOT match is admitted into the buffer as a side
    /// effect; matches are never admitted.
    pub fn is_duplicate(&mut self, conn: &Connection, candidate: &Candidate) -> bool {
        let ts = candidate.occurred_at.timestamp_millis();
        self.evict_older_than(ts - self.window_ms);

        if self.cached_match(candidate, ts) {
            return true;
        }
        if self.stored_match(conn, candidate, ts) {
            return true;
        }

        self.admit(candidate, ts);
        false
    }

    fn evict_older_than(&mut self, cutoff: i64) {
        self.entries.retain(|e| e.observed_at >= cutoff);
    }

    fn cached_match(&self, candidate: &Candidate, ts: i64) -> bool {
        self.entries.iter().any(|e| {
            e.amount == candidate.amount
                && e.direction == candidate.direction
                && (ts - e.observed_at).abs() <= self.window_ms
                && merchants_match(&e.merchant, &candidate.merchant)
        })
    }

    /// Backing-store fallback. Read failures are fail-open: losing one dedup
    /// opportunity beats blocking ingestion.
    fn stored_match(&self, conn: &Connection, candidate: &Candidate, ts: i64) -> bool {
        match db::find_in_window(conn, candidate.amount, candidate.direction, ts, self.window_ms) {
            Ok(descriptions) => descriptions
                .iter()
                .any(|d| merchants_match(merchant_from_description(d), &candidate.merchant)),
            Err(e) => {
                log::warn!("duplicate lookup failed, admitting candidate: {e}");
                false
            }
        }
    }

    fn admit(&mut self, candidate: &Candidate, ts: i64) {
        self.entries.push_back(CacheEntry {
            amount: candidate.amount,
            direction: candidate.direction,
            merchant: candidate.merchant.clone(),
            observed_at: ts,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn merchants_match(a: &str, b: &str) -> bool {
    similarity::similarity(a, b) >= MERCHANT_MATCH_THRESHOLD
}
