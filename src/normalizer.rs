use chrono::{DateTime, Utc};
use regex::Regex;

use crate::classifier;
use crate::models::{clean_merchant, Candidate, Direction, SourceChannel};

/// Cheap prefilter: a message that mentions none of these is not a financial
/// notification and is dropped before any pattern work.
const FINANCE_KEYWORDS: &[&str] = &[
    "원", "입금", "출금", "승인", "결제", "잔액", "이체", "송금", "충전", "krw",
];

/// Direction markers scanned over the body. Income first, so a cancelled
/// approval (승인취소) reads as income before 승인 reads as expense.
const INCOME_MARKERS: &[&str] = &["승인취소", "취소", "환불", "입금", "수신", "받았"];
const EXPENSE_MARKERS: &[&str] = &["출금", "결제", "승인", "송금", "이체", "사용"];

struct PatternDef {
    institution: &'static str,
    sender: &'static str,
    body: &'static str,
    default_direction: Direction,
}

/// Ordered institution table; first entry whose sender AND body patterns
/// match wins. Specific formats sit above the generic card/bank catch-alls.
const PATTERN_DEFS: &[PatternDef] = &[
    PatternDef {
        institution: "신한카드",
        sender: r"신한카드|신한체크",
        body: r"\d{2}/\d{2}\s+\d{2}:\d{2}\s+(?P<merchant>.+?)\s+(?P<amount>[\d,]+)원",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "KB국민카드",
        sender: r"KB국민카드|국민카드",
        body: r"(?P<amount>[\d,]+)원\s*(?:일시불|할부\d*)?\s*\d{2}/\d{2}\s+\d{2}:\d{2}\s+(?P<merchant>.+?)(?:\s+누적.*)?$",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "삼성카드",
        sender: r"삼성카드",
        body: r"승인.*?(?P<amount>[\d,]+)원\s+\d{2}/\d{2}\s+\d{2}:\d{2}\s+(?P<merchant>.+)$",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "현대카드",
        sender: r"현대카드",
        body: r"승인.*?(?P<amount>[\d,]+)원\s+(?:일시불\s+)?(?P<merchant>\S.*?)\s*$",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "롯데카드",
        sender: r"롯데카드",
        body: r"(?P<merchant>.+?)\s+(?P<amount>[\d,]+)원\s*(?:승인|사용)",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "하나카드",
        sender: r"하나카드",
        body: r"(?P<merchant>.+?)\s+(?P<amount>[\d,]+)원\s*(?:일시불|승인)",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "신한은행",
        sender: r"신한은행",
        body: r"(?:입금|출금)\s+(?P<amount>[\d,]+)원?\s*(?P<merchant>\S*)",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "KB국민은행",
        sender: r"KB국민은행|국민은행",
        body: r"(?P<merchant>\S+)\s+(?:전자금융)?(?:입금|출금)\s+(?P<amount>[\d,]+)원",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "카카오뱅크",
        sender: r"카카오뱅크",
        body: r"\d{2}/\d{2}\s+(?:\d{2}:\d{2}\s+)?(?P<merchant>.+?)\s+(?P<amount>[\d,]+)원\s*(?:입금|출금)",
        default_direction: Direction::Expense,
    },
    // Toss pushes: the incoming-transfer wording first, then payments
    PatternDef {
        institution: "토스",
        sender: r"토스|Toss",
        body: r"(?P<merchant>.+?)님이\s*(?P<amount>[\d,]+)원을?\s*보냈",
        default_direction: Direction::Income,
    },
    PatternDef {
        institution: "토스",
        sender: r"토스|Toss",
        body: r"(?P<merchant>.+?)에서\s*(?P<amount>[\d,]+)원(?:을)?\s*(?:결제|출금)",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "카카오페이",
        sender: r"카카오페이",
        body: r"(?P<merchant>.+?)\s+(?P<amount>[\d,]+)원\s*결제",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "네이버페이",
        sender: r"네이버페이|NAVER",
        body: r"(?P<merchant>.+?)\s+(?P<amount>[\d,]+)원\s*결제",
        default_direction: Direction::Expense,
    },
    // Generic catch-alls for card/bank senders with unrecognized layouts
    PatternDef {
        institution: "카드",
        sender: r"카드",
        body: r"(?P<merchant>\S+)\s+(?P<amount>[\d,]+)원\s*승인",
        default_direction: Direction::Expense,
    },
    PatternDef {
        institution: "은행",
        sender: r"은행|뱅크",
        body: r"(?:입금|출금)\s+(?P<amount>[\d,]+)원?\s*(?P<merchant>\S*)",
        default_direction: Direction::Expense,
    },
];

struct InstitutionPattern {
    institution: &'static str,
    sender: Regex,
    body: Regex,
    default_direction: Direction,
}

/// Classifies raw SMS/push text by institution and extracts a transaction
/// candidate. The pattern table is compiled once at construction and never
/// mutated.
pub struct Normalizer {
    patterns: Vec<InstitutionPattern>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        let patterns = PATTERN_DEFS
            .iter()
            .map(|def| InstitutionPattern {
                institution: def.institution,
                sender: Regex::new(def.sender).expect("institution sender pattern"),
                body: Regex::new(def.body).expect("institution body pattern"),
                default_direction: def.default_direction,
            })
            .collect();
        Self { patterns }
    }

    /// Parse one raw text event into a transaction candidate. `None` is the
    /// expected outcome for the vast majority of messages and is never an
    /// error.
    pub fn parse(
        &self,
        body: &str,
        sender: &str,
        timestamp: DateTime<Utc>,
        channel: SourceChannel,
    ) -> Option<Candidate> {
        if !is_financial_text(sender, body) {
            return None;
        }

        for pattern in &self.patterns {
            if !pattern.sender.is_match(sender) && !pattern.sender.is_match(body) {
                continue;
            }
            let Some(caps) = pattern.body.captures(body) else {
                continue;
            };

            let amount = caps
                .name("amount")
                .and_then(|m| crate::importer::parse_amount(m.as_str()));
            let Some(amount) = amount.filter(|a| *a > 0.0) else {
                continue;
            };

            let raw_merchant = caps.name("merchant").map(|m| m.as_str()).unwrap_or("");
            let raw_merchant = raw_merchant.trim();
            let raw_merchant = raw_merchant.strip_prefix(pattern.institution).unwrap_or(raw_merchant);
            let merchant = clean_merchant(raw_merchant);

            let direction = detect_direction(body).unwrap_or(pattern.default_direction);
            let category = classifier::classify(&merchant, direction).map(str::to_string);

            return Some(Candidate {
                amount,
                direction,
                merchant,
                institution: pattern.institution.to_string(),
                occurred_at: timestamp,
                category,
                channel,
            });
        }
        None
    }
}

fn is_financial_text(sender: &str, body: &str) -> bool {
    let sender = sender.to_lowercase();
    let body = body.to_lowercase();
    FINANCE_KEYWORDS
        .iter()
        .any(|k| sender.contains(k) || body.contains(k))
}

fn detect_direction(body: &str) -> Option<Direction> {
    if INCOME_MARKERS.iter().any(|m| body.contains(m)) {
        return Some(Direction::Income);
    }
    if EXPENSE_MARKERS.iter().any(|m| body.contains(m)) {
        return Some(Direction::Expense);
    }
    None
}
