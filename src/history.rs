use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::db;
use crate::error::Result;
use crate::models::{RawMessage, SourceChannel};
use crate::pipeline::{Ingested, Pipeline};

/// At most this many historical messages are fetched per scan.
pub const BACKLOG_FETCH_CAP: usize = 1000;

/// Messages older than this are ignored.
pub const BACKLOG_MAX_AGE_DAYS: i64 = 90;

/// Coarse progress granularity for user-facing feedback.
pub const PROGRESS_INTERVAL: usize = 100;

/// Platform SMS provider, abstracted so the scanner never touches OS
/// permission plumbing. Historical push notifications have no counterpart:
/// they are only observable forward from listener registration.
pub trait MessageSource {
    fn fetch_recent(&self, limit: usize) -> Result<Vec<RawMessage>>;
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BacklogSummary {
    /// Messages inside the age window that were fed through the pipeline.
    pub scanned: usize,
    pub imported: usize,
    pub duplicates: usize,
    /// Non-financial messages (the expected majority).
    pub skipped: usize,
    pub errors: usize,
    /// Accounts with a known balance after the scan.
    pub balances_tracked: usize,
}

/// Bulk replay of the SMS backlog through the ingestion pipeline. Guarded by
/// a single in-flight flag: a second invocation while one runs is rejected
/// as a no-op, not queued.
pub struct HistoryScanner {
    in_flight: AtomicBool,
}

impl Default for HistoryScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryScanner {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one backlog scan. Returns `Ok(None)` when a scan is already in
    /// flight. Message processing is strictly sequential and in timestamp
    /// order so that later balance mentions supersede earlier ones.
    pub fn run(
        &self,
        pipeline: &mut Pipeline,
        source: &dyn MessageSource,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<Option<BacklogSummary>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::info!("historical scan already in flight; ignoring request");
            return Ok(None);
        }
        let result = self.scan(pipeline, source, progress);
        self.in_flight.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    fn scan(
        &self,
        pipeline: &mut Pipeline,
        source: &dyn MessageSource,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<BacklogSummary> {
        let mut messages = source.fetch_recent(BACKLOG_FETCH_CAP)?;
        let cutoff = Utc::now() - Duration::days(BACKLOG_MAX_AGE_DAYS);
        messages.retain(|m| m.received_at >= cutoff);
        messages.sort_by_key(|m| m.received_at);

        let total = messages.len();
        log::info!("historical scan: {total} messages within the {BACKLOG_MAX_AGE_DAYS}-day window");

        let mut summary = BacklogSummary {
            scanned: total,
            ..Default::default()
        };

        for (i, msg) in messages.iter().enumerate() {
            // One bad message must not abort the rest of the backlog
            match pipeline.handle_message(msg, SourceChannel::Sms) {
                Ok(Ingested::Saved(_)) => summary.imported += 1,
                Ok(Ingested::Duplicate) => summary.duplicates += 1,
                Ok(Ingested::NotFinancial) => summary.skipped += 1,
                Err(e) => {
                    log::warn!("historical scan: message from {} failed: {e}", msg.sender);
                    summary.errors += 1;
                }
            }

            let done = i + 1;
            if done % PROGRESS_INTERVAL == 0 {
                log::info!("historical scan progress: {done}/{total}");
                if let Some(cb) = progress {
                    cb(done, total);
                }
            }
        }

        summary.balances_tracked = db::list_balances(pipeline.connection())?.len();
        log::info!(
            "historical scan done: {} imported, {} duplicates, {} skipped, {} errors",
            summary.imported,
            summary.duplicates,
            summary.skipped,
            summary.errors
        );
        Ok(summary)
    }
}
