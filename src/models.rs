use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of an extracted merchant string (chars). Anything longer
/// is cut before composing the stored description.
pub const MERCHANT_MAX_LEN: usize = 40;

/// Placeholder merchant when extraction yields an empty string.
pub const UNKNOWN_MERCHANT: &str = "알수없음";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Income,
    Expense,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Sms,
    Notification,
    CsvUpload,
    Manual,
}

impl SourceChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Notification => "notification",
            Self::CsvUpload => "csv_upload",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Bank,
    Card,
    Investment,
    Pay,
    Crypto,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Card => "card",
            Self::Investment => "investment",
            Self::Pay => "pay",
            Self::Crypto => "crypto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bank" => Some(Self::Bank),
            "card" => Some(Self::Card),
            "investment" => Some(Self::Investment),
            "pay" => Some(Self::Pay),
            "crypto" => Some(Self::Crypto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceSource {
    Manual,
    Sms,
    Notification,
}

impl BalanceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Sms => "sms",
            Self::Notification => "notification",
        }
    }
}

/// A parsed transaction candidate. Built once by the normalizer or the
/// statement parser, never mutated, and either persisted after passing the
/// duplicate check or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub amount: f64,
    pub direction: Direction,
    pub merchant: String,
    pub institution: String,
    pub occurred_at: DateTime<Utc>,
    pub category: Option<String>,
    pub channel: SourceChannel,
}

impl Candidate {
    /// Stored description, composed as `"<institution> - <merchant>"`.
    pub fn description(&self) -> String {
        format!("{} - {}", self.institution, self.merchant)
    }

    /// Storage date: the day of `occurred_at`, formatted `YYYY-MM-DD`.
    pub fn date(&self) -> String {
        self.occurred_at.format("%Y-%m-%d").to_string()
    }
}

/// Trim and length-cap a raw merchant string, substituting the placeholder
/// when nothing is left.
pub fn clean_merchant(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return UNKNOWN_MERCHANT.to_string();
    }
    trimmed.chars().take(MERCHANT_MAX_LEN).collect()
}

/// Recover the merchant part of a stored description by reversing the
/// `"<institution> - <merchant>"` composition. Descriptions without the
/// separator are returned whole.
pub fn merchant_from_description(description: &str) -> &str {
    match description.split_once(" - ") {
        Some((_, merchant)) => merchant,
        None => description,
    }
}

/// Raw text event as delivered by the platform SMS/notification listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub body: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
}

/// Latest known balance for one account, upserted by natural key
/// (account_name, account_type). Last write wins; history lives in the
/// append-only snapshot table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_name: String,
    pub account_type: AccountType,
    pub balance: f64,
    pub last_updated: DateTime<Utc>,
    pub source: BalanceSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_description_composition() {
        let c = Candidate {
            amount: 5000.0,
            direction: Direction::Expense,
            merchant: "스타벅스".to_string(),
            institution: "신한카드".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 5, 14, 20, 0).unwrap(),
            category: None,
            channel: SourceChannel::Sms,
        };
        assert_eq!(c.description(), "신한카드 - 스타벅스");
        assert_eq!(c.date(), "2024-03-05");
    }

    #[test]
    fn test_clean_merchant() {
        assert_eq!(clean_merchant("  스타벅스  "), "스타벅스");
        assert_eq!(clean_merchant(""), UNKNOWN_MERCHANT);
        assert_eq!(clean_merchant("   "), UNKNOWN_MERCHANT);
        let long = "가".repeat(100);
        assert_eq!(clean_merchant(&long).chars().count(), MERCHANT_MAX_LEN);
    }

    #[test]
    fn test_merchant_from_description() {
        assert_eq!(merchant_from_description("신한카드 - 스타벅스"), "스타벅스");
        assert_eq!(merchant_from_description("카카오뱅크 - GS25 역삼점"), "GS25 역삼점");
        assert_eq!(merchant_from_description("스타벅스"), "스타벅스");
    }

    #[test]
    fn test_direction_round_trip() {
        assert_eq!(Direction::from_str("income"), Some(Direction::Income));
        assert_eq!(Direction::from_str("expense"), Some(Direction::Expense));
        assert_eq!(Direction::from_str("sideways"), None);
        assert_eq!(Direction::Expense.as_str(), "expense");
    }

    #[test]
    fn test_account_type_round_trip() {
        for t in [
            AccountType::Bank,
            AccountType::Card,
            AccountType::Investment,
            AccountType::Pay,
            AccountType::Crypto,
        ] {
            assert_eq!(AccountType::from_str(t.as_str()), Some(t));
        }
    }
}
