use std::path::Path;

use rusqlite::Connection;

use crate::balance::BalanceTracker;
use crate::classifier;
use crate::db;
use crate::dedup::DuplicateDetector;
use crate::error::{GagyebuError, Result};
use crate::importer::{self, ParsedStatement, UploadOutcome};
use crate::models::{BalanceSource, Candidate, RawMessage, SourceChannel};
use crate::normalizer::Normalizer;
use crate::templates::{self, BankTemplate};

/// Outcome of feeding one raw message through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Persisted; carries the stored row id.
    Saved(i64),
    /// Matched a previously seen transaction and was dropped.
    Duplicate,
    /// Not a financial message (the common case).
    NotFinancial,
}

/// Owns the store connection, the compiled pattern registries, the duplicate
/// detector and the balance tracker. UI event handlers and the historical
/// scanner both feed messages through here, one at a time.
pub struct Pipeline {
    conn: Connection,
    normalizer: Normalizer,
    detector: DuplicateDetector,
    balances: BalanceTracker,
}

impl Pipeline {
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            conn,
            normalizer: Normalizer::new(),
            detector: DuplicateDetector::new(),
            balances: BalanceTracker::new(),
        })
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        Self::new(db::get_connection(db_path)?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Full ingestion flow for one SMS/notification event: balance tracking
    /// runs unconditionally, then normalize → duplicate check → category
    /// resolution → insert.
    pub fn handle_message(&mut self, msg: &RawMessage, channel: SourceChannel) -> Result<Ingested> {
        let balance_source = match channel {
            SourceChannel::Notification => BalanceSource::Notification,
            _ => BalanceSource::Sms,
        };
        if let Err(e) =
            self.balances
                .extract_and_save(&self.conn, &msg.body, &msg.sender, msg.received_at, balance_source)
        {
            log::warn!("balance tracking failed for message from {}: {e}", msg.sender);
        }

        let Some(candidate) = self.normalizer.parse(&msg.body, &msg.sender, msg.received_at, channel)
        else {
            return Ok(Ingested::NotFinancial);
        };

        if self.detector.is_duplicate(&self.conn, &candidate) {
            log::debug!("duplicate dropped: {}", candidate.description());
            return Ok(Ingested::Duplicate);
        }

        let id = self.persist(&candidate)?;
        Ok(Ingested::Saved(id))
    }

    /// Duplicate-checked insert for an already-built candidate (manual entry).
    pub fn ingest_candidate(&mut self, candidate: &Candidate) -> Result<Ingested> {
        if self.detector.is_duplicate(&self.conn, candidate) {
            return Ok(Ingested::Duplicate);
        }
        let id = self.persist(candidate)?;
        Ok(Ingested::Saved(id))
    }

    fn persist(&self, candidate: &Candidate) -> Result<i64> {
        let category_id = classifier::resolve_category(&self.conn, candidate)?;
        db::insert_transaction(&self.conn, candidate, Some(category_id))
    }

    /// Statement upload: resolve the template (explicit id or header
    /// auto-detection), parse, then categorize-and-persist row by row.
    pub fn upload_statement(
        &mut self,
        rows: &[Vec<String>],
        template_id: Option<&str>,
        filename: &str,
    ) -> Result<UploadOutcome> {
        let template = self.resolve_template(rows, template_id)?;
        let parsed = importer::parse_rows(rows, template);
        let checksum = importer::checksum_rows(rows);
        importer::persist_statement(&self.conn, &mut self.detector, &parsed, template, filename, &checksum)
    }

    /// Parse-only preview of an upload, for UI confirmation screens.
    pub fn preview_statement(
        &self,
        rows: &[Vec<String>],
        template_id: Option<&str>,
    ) -> Result<ParsedStatement> {
        let template = self.resolve_template(rows, template_id)?;
        Ok(importer::parse_rows(rows, template))
    }

    fn resolve_template(
        &self,
        rows: &[Vec<String>],
        template_id: Option<&str>,
    ) -> Result<&'static BankTemplate> {
        match template_id {
            Some(id) => {
                templates::template_by_id(id).ok_or_else(|| GagyebuError::UnknownTemplate(id.to_string()))
            }
            None => rows
                .first()
                .and_then(|header| templates::detect_template(header))
                .ok_or_else(|| GagyebuError::UnknownTemplate("자동 인식 실패".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn test_pipeline() -> (tempfile::TempDir, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let conn = db::get_connection(&dir.path().join("test.db")).unwrap();
        let pipeline = Pipeline::new(conn).unwrap();
        (dir, pipeline)
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 20, 0).unwrap()
    }

    fn sms(body: &str, sender: &str, at: DateTime<Utc>) -> RawMessage {
        RawMessage {
            body: body.to_string(),
            sender: sender.to_string(),
            received_at: at,
        }
    }

    #[test]
    fn test_sms_to_stored_transaction() {
        let (_dir, mut pipeline) = test_pipeline();
        let msg = sms("[신한카드] 03/05 14:20 스타벅스 5,000원 승인", "신한카드", ts());
        let outcome = pipeline.handle_message(&msg, SourceChannel::Sms).unwrap();
        assert!(matches!(outcome, Ingested::Saved(_)));

        let (description, amount, direction, category): (String, f64, String, String) = pipeline
            .connection()
            .query_row(
                "SELECT t.description, t.amount, t.direction, c.name \
                 FROM transactions t JOIN categories c ON t.category_id = c.id",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(description, "신한카드 - 스타벅스");
        assert_eq!(amount, 5000.0);
        assert_eq!(direction, "expense");
        assert_eq!(category, "카페&간식");
    }

    #[test]
    fn test_double_delivery_is_deduplicated() {
        // The same purchase arriving via SMS and push 30 seconds apart
        let (_dir, mut pipeline) = test_pipeline();
        let first = sms("[신한카드] 03/05 14:20 스타벅스 5,000원 승인", "신한카드", ts());
        let second = sms(
            "[신한카드] 03/05 14:20 스타벅스 5,000원 승인",
            "신한카드",
            ts() + Duration::seconds(30),
        );
        assert!(matches!(
            pipeline.handle_message(&first, SourceChannel::Sms).unwrap(),
            Ingested::Saved(_)
        ));
        assert_eq!(
            pipeline.handle_message(&second, SourceChannel::Notification).unwrap(),
            Ingested::Duplicate
        );
        let count: i64 = pipeline
            .connection()
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_learned_mapping_precedence_end_to_end() {
        let (_dir, mut pipeline) = test_pipeline();
        // The user has filed 스타벅스 under 식비; the pattern suggestion
        // (카페&간식) must lose
        let food = db::get_or_create_category(pipeline.connection(), "식비").unwrap();
        db::remember_merchant_category(pipeline.connection(), "스타벅스", food).unwrap();

        let msg = sms("[신한카드] 03/05 14:20 스타벅스 5,000원 승인", "신한카드", ts());
        pipeline.handle_message(&msg, SourceChannel::Sms).unwrap();

        let category: String = pipeline
            .connection()
            .query_row(
                "SELECT c.name FROM transactions t JOIN categories c ON t.category_id = c.id",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(category, "식비");
    }

    #[test]
    fn test_non_financial_message_leaves_no_trace() {
        let (_dir, mut pipeline) = test_pipeline();
        let msg = sms("내일 저녁에 볼까?", "친구", ts());
        assert_eq!(pipeline.handle_message(&msg, SourceChannel::Sms).unwrap(), Ingested::NotFinancial);
        let count: i64 = pipeline
            .connection()
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_message_updates_balance_and_transaction() {
        let (_dir, mut pipeline) = test_pipeline();
        let msg = sms(
            "신한은행 03/05 14:20 전자금융입금 50,000원 홍길동 잔액 1,050,000원",
            "신한은행",
            ts(),
        );
        let outcome = pipeline.handle_message(&msg, SourceChannel::Sms).unwrap();
        assert!(matches!(outcome, Ingested::Saved(_)));

        let balances = db::list_balances(pipeline.connection()).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].balance, 1_050_000.0);

        let direction: String = pipeline
            .connection()
            .query_row("SELECT direction FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(direction, "income");
    }

    #[test]
    fn test_upload_statement_auto_detects() {
        let (_dir, mut pipeline) = test_pipeline();
        let rows: Vec<Vec<String>> = [
            vec!["거래일자", "적요", "출금금액", "입금금액"],
            vec!["2024-01-10", "스타벅스", "5000", ""],
        ]
        .iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect();

        let outcome = pipeline.upload_statement(&rows, None, "stmt.csv").unwrap();
        assert_eq!(outcome.inserted, 1);

        let count: i64 = pipeline
            .connection()
            .query_row(
                "SELECT count(*) FROM transactions WHERE direction = 'expense' AND amount = 5000.0",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_upload_statement_unknown_template() {
        let (_dir, mut pipeline) = test_pipeline();
        let rows: Vec<Vec<String>> = vec![vec!["who".to_string(), "knows".to_string()]];
        assert!(matches!(
            pipeline.upload_statement(&rows, None, "stmt.csv"),
            Err(GagyebuError::UnknownTemplate(_))
        ));
        assert!(matches!(
            pipeline.upload_statement(&rows, Some("nope"), "stmt.csv"),
            Err(GagyebuError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_preview_statement_parses_without_writing() {
        let (_dir, pipeline) = test_pipeline();
        let rows: Vec<Vec<String>> = [
            vec!["거래일자", "적요", "출금금액", "입금금액"],
            vec!["2024-01-10", "스타벅스", "5000", ""],
        ]
        .iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect();

        let parsed = pipeline.preview_statement(&rows, None).unwrap();
        assert_eq!(parsed.transactions.len(), 1);

        let count: i64 = pipeline
            .connection()
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_ingest_candidate_manual_entry() {
        let (_dir, mut pipeline) = test_pipeline();
        let candidate = Candidate {
            amount: 12000.0,
            direction: Direction::Expense,
            merchant: "김밥천국".to_string(),
            institution: "직접입력".to_string(),
            occurred_at: ts(),
            category: None,
            channel: SourceChannel::Manual,
        };
        assert!(matches!(pipeline.ingest_candidate(&candidate).unwrap(), Ingested::Saved(_)));
        assert_eq!(pipeline.ingest_candidate(&candidate).unwrap(), Ingested::Duplicate);
    }
}
