use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::models::{AccountBalance, AccountType, BalanceSource};

/// Sentinel account when neither sender nor body identifies an institution.
pub const UNKNOWN_ACCOUNT: &str = "알수없음";

/// Balance-phrase layouts, specific wordings first. The first matching
/// pattern supplies the amount.
const BALANCE_PATTERNS: &[&str] = &[
    r"평가\s*금액[\s:]*(?P<amount>[\d,]+)원",
    r"(?:사용|이용)\s*가능\s*(?:금액|한도)[\s:]*(?P<amount>[\d,]+)원",
    r"(?:페이머니|머니)\s*잔액[\s:]*(?P<amount>[\d,]+)원",
    r"(?i)krw\s*잔[액고][\s:]*(?P<amount>[\d,]+)",
    r"잔액[\s:]*(?P<amount>[\d,]+)원",
];

/// Institution keyword → account identity. Checked against the sender first,
/// then the body; first match wins, so the more specific names sit above
/// shorter ones they contain.
const ACCOUNT_KEYWORDS: &[(&str, &str, AccountType)] = &[
    ("신한카드", "신한카드", AccountType::Card),
    ("KB국민카드", "KB국민카드", AccountType::Card),
    ("국민카드", "KB국민카드", AccountType::Card),
    ("삼성카드", "삼성카드", AccountType::Card),
    ("현대카드", "현대카드", AccountType::Card),
    ("롯데카드", "롯데카드", AccountType::Card),
    ("하나카드", "하나카드", AccountType::Card),
    ("신한은행", "신한은행", AccountType::Bank),
    ("KB국민은행", "KB국민은행", AccountType::Bank),
    ("국민은행", "KB국민은행", AccountType::Bank),
    ("우리은행", "우리은행", AccountType::Bank),
    ("하나은행", "하나은행", AccountType::Bank),
    ("카카오뱅크", "카카오뱅크", AccountType::Bank),
    ("토스뱅크", "토스뱅크", AccountType::Bank),
    ("삼성증권", "삼성증권", AccountType::Investment),
    ("미래에셋", "미래에셋증권", AccountType::Investment),
    ("키움", "키움증권", AccountType::Investment),
    ("카카오페이", "카카오페이", AccountType::Pay),
    ("네이버페이", "네이버페이", AccountType::Pay),
    ("토스", "토스", AccountType::Pay),
    ("업비트", "업비트", AccountType::Crypto),
    ("빗썸", "빗썸", AccountType::Crypto),
];

/// Extracts account-balance mentions from raw text and keeps the latest
/// known balance per account. Fully decoupled from transaction extraction:
/// one message may contribute a balance update, a transaction, both, or
/// neither.
pub struct BalanceTracker {
    patterns: Vec<Regex>,
}

impl Default for BalanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceTracker {
    pub fn new() -> Self {
        let patterns = BALANCE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("balance pattern"))
            .collect();
        Self { patterns }
    }

    /// Upsert the balance mentioned in `text`, if any. Returns the stored
    /// record for observability; `None` means no balance phrase matched.
    pub fn extract_and_save(
        &self,
        conn: &Connection,
        text: &str,
        sender: &str,
        timestamp: DateTime<Utc>,
        source: BalanceSource,
    ) -> Result<Option<AccountBalance>> {
        let Some(amount) = self.extract_amount(text) else {
            return Ok(None);
        };
        let (account_name, account_type) = identify_account(sender, text);
        let record = AccountBalance {
            account_name: account_name.to_string(),
            account_type,
            balance: amount,
            last_updated: timestamp,
            source,
        };
        db::upsert_balance(conn, &record)?;
        log::debug!("balance update: {} ({}) = {}", record.account_name, account_type.as_str(), amount);
        Ok(Some(record))
    }

    fn extract_amount(&self, text: &str) -> Option<f64> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.captures(text) {
                let raw = caps.name("amount")?.as_str();
                return crate::importer::parse_amount(raw).filter(|a| *a >= 0.0);
            }
        }
        None
    }
}

fn identify_account(sender: &str, text: &str) -> (&'static str, AccountType) {
    for (keyword, name, kind) in ACCOUNT_KEYWORDS {
        if sender.contains(keyword) {
            return (name, *kind);
        }
    }
    for (keyword, name, kind) in ACCOUNT_KEYWORDS {
        if text.contains(keyword) {
            return (name, *kind);
        }
    }
    (UNKNOWN_ACCOUNT, AccountType::Bank)
}

/// Append the day's aggregate snapshot. Card balances are owed amounts, so
/// they are excluded from the total; the per-account breakdown goes into the
/// JSON detail blob. Returns the recorded total.
pub fn record_snapshot(conn: &Connection, date: &str) -> Result<f64> {
    let balances = db::list_balances(conn)?;
    let total: f64 = balances
        .iter()
        .filter(|b| b.account_type != AccountType::Card)
        .map(|b| b.balance)
        .sum();
    let detail: BTreeMap<String, f64> = balances
        .iter()
        .map(|b| (format!("{}/{}", b.account_name, b.account_type.as_str()), b.balance))
        .collect();
    let detail_json = serde_json::to_string(&detail)
        .map_err(|e| crate::error::GagyebuError::Other(format!("스냅샷 직렬화 실패: {e}")))?;
    db::insert_snapshot(conn, date, total, &detail_json)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db, list_balances};
    use chrono::TimeZone;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 20, 0).unwrap()
    }

    #[test]
    fn test_bank_balance_phrase() {
        let (_dir, conn) = test_db();
        let tracker = BalanceTracker::new();
        let record = tracker
            .extract_and_save(
                &conn,
                "신한은행 03/05 출금 50,000원 홍길동 잔액 1,234,567원",
                "신한은행",
                ts(),
                BalanceSource::Sms,
            )
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, 1_234_567.0);
        assert_eq!(record.account_name, "신한은행");
        assert_eq!(record.account_type, AccountType::Bank);
    }

    #[test]
    fn test_card_available_limit_phrase() {
        let (_dir, conn) = test_db();
        let tracker = BalanceTracker::new();
        let record = tracker
            .extract_and_save(
                &conn,
                "신한카드 승인 스타벅스 5,000원 사용가능금액 2,500,000원",
                "신한카드",
                ts(),
                BalanceSource::Sms,
            )
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, 2_500_000.0);
        assert_eq!(record.account_type, AccountType::Card);
    }

    #[test]
    fn test_brokerage_and_exchange_phrases() {
        let (_dir, conn) = test_db();
        let tracker = BalanceTracker::new();
        let invest = tracker
            .extract_and_save(&conn, "키움증권 평가금액 10,000,000원", "키움증권", ts(), BalanceSource::Sms)
            .unwrap()
            .unwrap();
        assert_eq!(invest.account_type, AccountType::Investment);
        assert_eq!(invest.balance, 10_000_000.0);

        let crypto = tracker
            .extract_and_save(&conn, "업비트 KRW 잔액 350,000", "업비트", ts(), BalanceSource::Notification)
            .unwrap()
            .unwrap();
        assert_eq!(crypto.account_type, AccountType::Crypto);
        assert_eq!(crypto.balance, 350_000.0);
    }

    #[test]
    fn test_unknown_institution_uses_sentinel() {
        let (_dir, conn) = test_db();
        let tracker = BalanceTracker::new();
        let record = tracker
            .extract_and_save(&conn, "잔액 77,000원", "15991234", ts(), BalanceSource::Sms)
            .unwrap()
            .unwrap();
        assert_eq!(record.account_name, UNKNOWN_ACCOUNT);
        assert_eq!(record.account_type, AccountType::Bank);
    }

    #[test]
    fn test_no_balance_phrase_is_none() {
        let (_dir, conn) = test_db();
        let tracker = BalanceTracker::new();
        let result = tracker
            .extract_and_save(
                &conn,
                "[신한카드] 03/05 14:20 스타벅스 5,000원 승인",
                "신한카드",
                ts(),
                BalanceSource::Sms,
            )
            .unwrap();
        assert!(result.is_none());
        assert!(list_balances(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_later_mention_supersedes() {
        let (_dir, conn) = test_db();
        let tracker = BalanceTracker::new();
        tracker
            .extract_and_save(&conn, "신한은행 잔액 1,000,000원", "신한은행", ts(), BalanceSource::Sms)
            .unwrap();
        tracker
            .extract_and_save(
                &conn,
                "신한은행 잔액 900,000원",
                "신한은행",
                ts() + chrono::Duration::minutes(5),
                BalanceSource::Sms,
            )
            .unwrap();
        let balances = list_balances(&conn).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].balance, 900_000.0);
    }

    #[test]
    fn test_specific_keyword_beats_contained_one() {
        // "토스뱅크" contains "토스"; the bank identity must win
        let (name, kind) = identify_account("토스뱅크", "잔액 50,000원");
        assert_eq!(name, "토스뱅크");
        assert_eq!(kind, AccountType::Bank);
    }

    #[test]
    fn test_record_snapshot_excludes_card_balances() {
        let (_dir, conn) = test_db();
        let tracker = BalanceTracker::new();
        tracker
            .extract_and_save(&conn, "신한은행 잔액 1,000,000원", "신한은행", ts(), BalanceSource::Sms)
            .unwrap();
        tracker
            .extract_and_save(
                &conn,
                "신한카드 사용가능금액 2,500,000원",
                "신한카드",
                ts(),
                BalanceSource::Sms,
            )
            .unwrap();

        let total = record_snapshot(&conn, "2024-03-05").unwrap();
        assert_eq!(total, 1_000_000.0);

        let detail: String = conn
            .query_row(
                "SELECT detail FROM balance_snapshots WHERE snapshot_date = '2024-03-05'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let parsed: std::collections::BTreeMap<String, f64> = serde_json::from_str(&detail).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("신한카드/card"), Some(&2_500_000.0));
    }
}
