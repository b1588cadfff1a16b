use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::classifier;
use crate::db;
use crate::dedup::DuplicateDetector;
use crate::error::Result;
use crate::models::{clean_merchant, Candidate, Direction, SourceChannel};
use crate::templates::{BankTemplate, ColumnMap};

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Parse a statement amount cell. Thousands separators, quotes, currency
/// marks and a leading `+` are stripped; parenthesized values are negative.
/// `None` means the cell is not a number at all.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw
        .replace(',', "")
        .replace('"', "")
        .replace('원', "")
        .replace('₩', "");
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(|v| -v);
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Format-tolerant statement date parser. Accepts `YYYY-MM-DD`,
/// `YYYY.MM.DD`, `YYYYMMDD` and day-first `DD-MM-YYYY` / `DD.MM.YYYY`;
/// trailing time-of-day is ignored. Years outside [2000, 2030] and invalid
/// month/day combinations are rejected. Output is always `YYYY-MM-DD`.
pub fn parse_statement_date(raw: &str) -> Option<String> {
    let token = raw.trim().split_whitespace().next()?;

    if token.len() == 8 && token.chars().all(|c| c.is_ascii_digit()) {
        return build_date(
            token[..4].parse().ok()?,
            token[4..6].parse().ok()?,
            token[6..8].parse().ok()?,
        );
    }

    let parts: Vec<&str> = token.split(['-', '.', '/']).collect();
    if parts.len() != 3 {
        return None;
    }
    if parts[0].len() == 4 {
        build_date(parts[0].parse().ok()?, parts[1].parse().ok()?, parts[2].parse().ok()?)
    } else {
        // Day-first convention for two-digit-led dates
        build_date(parts[2].parse().ok()?, parts[1].parse().ok()?, parts[0].parse().ok()?)
    }
}

fn build_date(y: i32, m: u32, d: u32) -> Option<String> {
    if !(2000..=2030).contains(&y) {
        return None;
    }
    NaiveDate::from_ymd_opt(y, m, d).map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// Template-aware date parse: the template's declared layout first, tolerant
/// fallback second.
fn parse_row_date(raw: &str, date_format: &str) -> Option<String> {
    if let Some(token) = raw.trim().split_whitespace().next() {
        if let Ok(d) = NaiveDate::parse_from_str(token, date_format) {
            if (2000..=2030).contains(&d.year()) {
                return Some(d.format("%Y-%m-%d").to_string());
            }
        }
    }
    parse_statement_date(raw)
}

#[cfg(any(feature = "xlsx", test))]
pub fn excel_serial_to_date(serial: f64) -> String {
    // Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug)
    let base = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap();
    let date = base + chrono::Duration::days(serial as i64);
    date.format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub transactions: Vec<Candidate>,
    pub errors: Vec<String>,
}

impl ParsedStatement {
    /// The batch counts as fully failed only when nothing parsed AND at
    /// least one row errored; an empty input is not a failure.
    pub fn is_failure(&self) -> bool {
        self.transactions.is_empty() && !self.errors.is_empty()
    }
}

/// Parse pre-split statement rows against a template. Row-level failures are
/// collected as 1-based-line-numbered strings and never abort the batch.
pub fn parse_rows(rows: &[Vec<String>], template: &BankTemplate) -> ParsedStatement {
    let mut transactions = Vec::new();
    let mut errors = Vec::new();

    let start = template.skip_rows + usize::from(template.has_header);
    for (idx, row) in rows.iter().enumerate().skip(start) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        match parse_row(row, template) {
            Ok(candidate) => transactions.push(candidate),
            Err(reason) => errors.push(format!("{}행: {reason}", idx + 1)),
        }
    }

    ParsedStatement { transactions, errors }
}

fn parse_row(row: &[String], template: &BankTemplate) -> std::result::Result<Candidate, String> {
    let cols = &template.columns;

    let raw_date = row
        .get(cols.date)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or("날짜 값이 없습니다")?;
    let date = parse_row_date(raw_date, template.date_format)
        .ok_or_else(|| format!("날짜 형식을 알 수 없습니다 ({raw_date})"))?;

    let description = cols
        .description
        .or(cols.merchant)
        .and_then(|i| row.get(i))
        .map(|s| s.as_str())
        .unwrap_or("");
    let merchant = clean_merchant(description);

    let (amount, direction) = extract_amount(row, cols)?;

    let occurred_at = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or("날짜 변환에 실패했습니다")?;

    Ok(Candidate {
        amount,
        direction,
        merchant,
        institution: template.name.to_string(),
        occurred_at,
        category: None,
        channel: SourceChannel::CsvUpload,
    })
}

fn extract_amount(row: &[String], cols: &ColumnMap) -> std::result::Result<(f64, Direction), String> {
    // Single signed column: sign decides the direction
    if let Some(i) = cols.amount {
        let raw = row
            .get(i)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or("금액 값이 없습니다")?;
        let value = parse_amount(raw).ok_or_else(|| format!("금액을 해석할 수 없습니다 ({raw})"))?;
        if value == 0.0 {
            return Err("금액이 0원입니다".to_string());
        }
        return Ok(if value < 0.0 {
            (-value, Direction::Expense)
        } else {
            (value, Direction::Income)
        });
    }

    // Separate withdrawal/deposit columns: the positive side wins
    let withdrawal = cols
        .withdrawal
        .and_then(|i| row.get(i))
        .and_then(|s| parse_amount(s))
        .unwrap_or(0.0);
    let deposit = cols
        .deposit
        .and_then(|i| row.get(i))
        .and_then(|s| parse_amount(s))
        .unwrap_or(0.0);

    if withdrawal > 0.0 {
        Ok((withdrawal, Direction::Expense))
    } else if deposit > 0.0 {
        Ok((deposit, Direction::Income))
    } else {
        Err("출금액과 입금액이 모두 비어 있습니다".to_string())
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Partial,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
    pub status: UploadStatus,
    pub duplicate_file: bool,
}

/// Content checksum over the raw rows, used to reject re-uploads of the same
/// statement export.
pub fn checksum_rows(rows: &[Vec<String>]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        for cell in row {
            hasher.update(cell.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Categorize and insert every parsed row. Each row passes the duplicate
/// check and the learned-mapping-first category resolution; insert failures
/// are collected per row and the batch is graded success/partial/failed.
pub fn persist_statement(
    conn: &Connection,
    detector: &mut DuplicateDetector,
    parsed: &ParsedStatement,
    template: &BankTemplate,
    filename: &str,
    checksum: &str,
) -> Result<UploadOutcome> {
    if db::upload_checksum_exists(conn, checksum)? {
        return Ok(UploadOutcome {
            inserted: 0,
            duplicates: 0,
            errors: Vec::new(),
            status: UploadStatus::Success,
            duplicate_file: true,
        });
    }

    let mut errors = parsed.errors.clone();
    let mut inserted = 0usize;
    let mut duplicates = 0usize;

    for candidate in &parsed.transactions {
        if detector.is_duplicate(conn, candidate) {
            duplicates += 1;
            continue;
        }
        let outcome = classifier::resolve_category(conn, candidate)
            .and_then(|category_id| db::insert_transaction(conn, candidate, Some(category_id)));
        match outcome {
            Ok(_) => inserted += 1,
            Err(e) => errors.push(format!("저장 실패 ({}): {e}", candidate.description())),
        }
    }

    let status = if errors.is_empty() {
        UploadStatus::Success
    } else if inserted > 0 {
        UploadStatus::Partial
    } else {
        UploadStatus::Failed
    };

    db::record_upload(
        conn,
        filename,
        template.id,
        parsed.transactions.len(),
        inserted,
        errors.len(),
        status.as_str(),
        checksum,
    )?;

    Ok(UploadOutcome {
        inserted,
        duplicates,
        errors,
        status,
        duplicate_file: false,
    })
}

// ---------------------------------------------------------------------------
// Raw file → rows collaborators
// ---------------------------------------------------------------------------

/// Split CSV text into rows. Quoting rules (double-quoted fields with
/// embedded commas) are honored here so the template parser only ever sees
/// clean cells.
pub fn rows_from_csv(text: &str) -> Result<Vec<Vec<String>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }
    Ok(rows)
}

#[cfg(feature = "xlsx")]
pub fn rows_from_xlsx(path: &std::path::Path) -> Result<Vec<Vec<String>>> {
    use crate::error::GagyebuError;
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| GagyebuError::Other(format!("XLSX 열기 실패: {e}")))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| GagyebuError::Other("빈 통합문서입니다".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| GagyebuError::Other(format!("시트 읽기 실패: {e}")))?;

    let mut rows = Vec::new();
    for row in range.rows() {
        rows.push(row.iter().map(cell_to_string).collect());
    }
    Ok(rows)
}

#[cfg(feature = "xlsx")]
fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}
