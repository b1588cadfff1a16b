use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use crate::error::Result;
use crate::models::{
    merchant_from_description, AccountBalance, AccountType, BalanceSource, Candidate, Direction,
};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    date TEXT NOT NULL,
    occurred_at INTEGER NOT NULL,
    description TEXT NOT NULL,
    amount REAL NOT NULL,
    direction TEXT NOT NULL,
    category_id INTEGER,
    channel TEXT NOT NULL DEFAULT 'manual',
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_dedup
    ON transactions(amount, direction, occurred_at);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS merchant_category_mappings (
    id INTEGER PRIMARY KEY,
    merchant TEXT NOT NULL UNIQUE,
    category_id INTEGER NOT NULL,
    updated_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS account_balances (
    id INTEGER PRIMARY KEY,
    account_name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    balance REAL NOT NULL,
    source TEXT NOT NULL,
    last_updated INTEGER NOT NULL,
    UNIQUE(account_name, account_type)
);

CREATE TABLE IF NOT EXISTS balance_snapshots (
    id INTEGER PRIMARY KEY,
    snapshot_date TEXT NOT NULL UNIQUE,
    total REAL NOT NULL,
    detail TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS uploads (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    template_id TEXT,
    record_count INTEGER,
    success_count INTEGER,
    error_count INTEGER,
    status TEXT,
    checksum TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);
";

/// Canonical category taxonomy, seeded on first init. The classifier and the
/// learned merchant mappings both resolve into this table; anything not
/// covered lands in 미분류.
const DEFAULT_CATEGORIES: &[&str] = &[
    // Income
    "급여",
    "용돈",
    "금융수입",
    "기타수입",
    // Expenses
    "식비",
    "카페&간식",
    "편의점&마트",
    "쇼핑",
    "교통",
    "주거&통신",
    "의료&건강",
    "교육",
    "문화&여가",
    "여행",
    "보험&금융",
    "이체",
    "미분류",
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for name in DEFAULT_CATEGORIES {
            conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub fn get_or_create_category(conn: &Connection, name: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM categories WHERE name = ?1", [name], |r| r.get(0))
        .ok();
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

pub fn category_name(conn: &Connection, id: i64) -> Result<Option<String>> {
    let name = conn
        .query_row("SELECT name FROM categories WHERE id = ?1", [id], |r| r.get(0))
        .ok();
    Ok(name)
}

// ---------------------------------------------------------------------------
// Learned merchant-category mappings
// ---------------------------------------------------------------------------

pub fn learned_category(conn: &Connection, merchant: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT category_id FROM merchant_category_mappings WHERE merchant = ?1",
            [merchant],
            |r| r.get(0),
        )
        .ok();
    Ok(id)
}

/// Overwrite-on-write association; the system's only persistent learning.
pub fn remember_merchant_category(conn: &Connection, merchant: &str, category_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO merchant_category_mappings (merchant, category_id, updated_at) \
         VALUES (?1, ?2, datetime('now')) \
         ON CONFLICT(merchant) DO UPDATE SET category_id = excluded.category_id, \
         updated_at = excluded.updated_at",
        rusqlite::params![merchant, category_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub fn insert_transaction(conn: &Connection, c: &Candidate, category_id: Option<i64>) -> Result<i64> {
    conn.execute(
        "INSERT INTO transactions (date, occurred_at, description, amount, direction, category_id, channel) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            c.date(),
            c.occurred_at.timestamp_millis(),
            c.description(),
            c.amount,
            c.direction.as_str(),
            category_id,
            c.channel.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Descriptions of stored transactions with the same amount and direction
/// whose timestamp falls within `center_ms ± window_ms`. Used by the
/// duplicate detector's backing-store fallback.
pub fn find_in_window(
    conn: &Connection,
    amount: f64,
    direction: Direction,
    center_ms: i64,
    window_ms: i64,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT description FROM transactions \
         WHERE amount = ?1 AND direction = ?2 AND occurred_at BETWEEN ?3 AND ?4",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![amount, direction.as_str(), center_ms - window_ms, center_ms + window_ms],
            |r| r.get(0),
        )?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(rows)
}

/// Distinct merchant names recovered from stored descriptions.
pub fn list_merchants(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT description FROM transactions")?;
    let descriptions = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut merchants: Vec<String> = descriptions
        .iter()
        .map(|d| merchant_from_description(d).to_string())
        .collect();
    merchants.sort();
    merchants.dedup();
    Ok(merchants)
}

/// Re-point every stored transaction for `merchant` at `category_id`.
/// Returns the number of rows updated.
pub fn update_category_for_merchant(conn: &Connection, merchant: &str, category_id: i64) -> Result<usize> {
    let mut stmt = conn.prepare("SELECT id, description FROM transactions")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut updated = 0usize;
    for (id, description) in rows {
        if merchant_from_description(&description) == merchant {
            conn.execute(
                "UPDATE transactions SET category_id = ?1 WHERE id = ?2",
                rusqlite::params![category_id, id],
            )?;
            updated += 1;
        }
    }
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Account balances & snapshots
// ---------------------------------------------------------------------------

pub fn upsert_balance(conn: &Connection, b: &AccountBalance) -> Result<()> {
    conn.execute(
        "INSERT INTO account_balances (account_name, account_type, balance, source, last_updated) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(account_name, account_type) DO UPDATE SET \
         balance = excluded.balance, source = excluded.source, last_updated = excluded.last_updated",
        rusqlite::params![
            b.account_name,
            b.account_type.as_str(),
            b.balance,
            b.source.as_str(),
            b.last_updated.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn list_balances(conn: &Connection) -> Result<Vec<AccountBalance>> {
    let mut stmt = conn.prepare(
        "SELECT account_name, account_type, balance, source, last_updated \
         FROM account_balances ORDER BY account_name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let balances = rows
        .into_iter()
        .map(|(name, kind, balance, source, ms)| AccountBalance {
            account_name: name,
            account_type: AccountType::from_str(&kind).unwrap_or(AccountType::Bank),
            balance,
            source: match source.as_str() {
                "manual" => BalanceSource::Manual,
                "notification" => BalanceSource::Notification,
                _ => BalanceSource::Sms,
            },
            last_updated: ms_to_datetime(ms),
        })
        .collect();
    Ok(balances)
}

/// Append-only point-in-time snapshot, keyed by date. Re-snapshotting the
/// same day refreshes that day's row; older rows are never touched.
pub fn insert_snapshot(conn: &Connection, date: &str, total: f64, detail: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO balance_snapshots (snapshot_date, total, detail) VALUES (?1, ?2, ?3) \
         ON CONFLICT(snapshot_date) DO UPDATE SET total = excluded.total, detail = excluded.detail",
        rusqlite::params![date, total, detail],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Upload batches
// ---------------------------------------------------------------------------

pub fn upload_checksum_exists(conn: &Connection, checksum: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM uploads WHERE checksum = ?1")?;
    Ok(stmt.exists([checksum])?)
}

#[allow(clippy::too_many_arguments)]
pub fn record_upload(
    conn: &Connection,
    filename: &str,
    template_id: &str,
    record_count: usize,
    success_count: usize,
    error_count: usize,
    status: &str,
    checksum: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO uploads (filename, template_id, record_count, success_count, error_count, status, checksum) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            filename,
            template_id,
            record_count as i64,
            success_count as i64,
            error_count as i64,
            status,
            checksum,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
