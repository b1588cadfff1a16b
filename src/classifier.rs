use rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::models::{Candidate, Direction};
use crate::similarity;

/// Matches below this confidence are discarded; the caller falls back to the
/// learned merchant mapping or the generic bucket.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Generic bucket for anything no pattern or mapping covers.
pub const FALLBACK_CATEGORY: &str = "미분류";

pub struct CategoryPattern {
    pub keywords: &'static [&'static str],
    pub category: &'static str,
    pub direction: Direction,
    pub confidence: f64,
}

/// Static keyword table. Keywords are lowercase; matching is substring,
/// case-insensitive. Confidence reflects how unambiguous the keyword set
/// is: brand names score high, generic terms low.
const CATEGORY_PATTERNS: &[CategoryPattern] = &[
    // Expense
    CategoryPattern {
        keywords: &[
            "스타벅스", "이디야", "투썸", "메가커피", "커피", "카페", "베이커리", "파리바게뜨",
            "뚜레쥬르", "배스킨라빈스", "던킨",
        ],
        category: "카페&간식",
        direction: Direction::Expense,
        confidence: 0.9,
    },
    CategoryPattern {
        keywords: &[
            "식당", "김밥", "맥도날드", "버거킹", "롯데리아", "배달의민족", "배민", "요기요",
            "치킨", "피자", "분식", "족발",
        ],
        category: "식비",
        direction: Direction::Expense,
        confidence: 0.85,
    },
    CategoryPattern {
        keywords: &[
            "gs25", "cu ", "세븐일레븐", "이마트24", "이마트", "홈플러스", "롯데마트", "다이소",
            "편의점", "하나로마트",
        ],
        category: "편의점&마트",
        direction: Direction::Expense,
        confidence: 0.8,
    },
    CategoryPattern {
        keywords: &[
            "택시", "카카오t", "고속버스", "코레일", "ktx", "srt", "주유소", "주유", "하이패스",
            "교통카드",
        ],
        category: "교통",
        direction: Direction::Expense,
        confidence: 0.85,
    },
    CategoryPattern {
        keywords: &["쿠팡", "지마켓", "g마켓", "11번가", "옥션", "무신사", "올리브영", "백화점"],
        category: "쇼핑",
        direction: Direction::Expense,
        confidence: 0.8,
    },
    CategoryPattern {
        keywords: &["관리비", "월세", "도시가스", "전기요금", "수도요금", "통신요금", "인터넷요금"],
        category: "주거&통신",
        direction: Direction::Expense,
        confidence: 0.85,
    },
    CategoryPattern {
        keywords: &["병원", "약국", "의원", "치과", "한의원"],
        category: "의료&건강",
        direction: Direction::Expense,
        confidence: 0.9,
    },
    CategoryPattern {
        keywords: &["학원", "교보문고", "영풍문고", "서점", "인강", "학습지"],
        category: "교육",
        direction: Direction::Expense,
        confidence: 0.85,
    },
    CategoryPattern {
        keywords: &["cgv", "메가박스", "롯데시네마", "넷플릭스", "멜론", "왓챠", "노래방"],
        category: "문화&여가",
        direction: Direction::Expense,
        confidence: 0.8,
    },
    CategoryPattern {
        keywords: &["항공", "호텔", "리조트", "야놀자", "여기어때", "펜션"],
        category: "여행",
        direction: Direction::Expense,
        confidence: 0.8,
    },
    CategoryPattern {
        keywords: &["보험", "증권", "카드론", "이자상환"],
        category: "보험&금융",
        direction: Direction::Expense,
        confidence: 0.75,
    },
    CategoryPattern {
        keywords: &["이체", "송금"],
        category: "이체",
        direction: Direction::Expense,
        confidence: 0.75,
    },
    // Generic storefront terms: too weak to auto-assign on their own,
    // deliberately held under the threshold.
    CategoryPattern {
        keywords: &["스토어", "store", "마켓"],
        category: "쇼핑",
        direction: Direction::Expense,
        confidence: 0.65,
    },
    // Income
    CategoryPattern {
        keywords: &["급여", "월급", "상여", "연봉"],
        category: "급여",
        direction: Direction::Income,
        confidence: 0.95,
    },
    CategoryPattern {
        keywords: &["용돈"],
        category: "용돈",
        direction: Direction::Income,
        confidence: 0.9,
    },
    CategoryPattern {
        keywords: &["이자", "배당", "캐시백", "환급"],
        category: "금융수입",
        direction: Direction::Income,
        confidence: 0.8,
    },
    CategoryPattern {
        keywords: &["환불", "중고거래"],
        category: "기타수입",
        direction: Direction::Income,
        confidence: 0.7,
    },
];

/// Pattern-based category suggestion. Only patterns matching the
/// transaction's direction are considered; the highest-confidence keyword
/// match wins and is returned only at or above the threshold.
pub fn classify(description: &str, direction: Direction) -> Option<&'static str> {
    let desc = description.to_lowercase();
    let mut best: Option<&CategoryPattern> = None;
    for pattern in CATEGORY_PATTERNS.iter().filter(|p| p.direction == direction) {
        if pattern.keywords.iter().any(|k| desc.contains(k)) && best.map_or(true, |b| pattern.confidence > b.confidence) {
            best = Some(pattern);
        }
    }
    best.filter(|p| p.confidence >= CONFIDENCE_THRESHOLD).map(|p| p.category)
}

/// Resolve a candidate to a category row id, enforcing the precedence
/// learned merchant mapping > pattern match > 미분류.
pub fn resolve_category(conn: &Connection, candidate: &Candidate) -> Result<i64> {
    if let Some(id) = db::learned_category(conn, &candidate.merchant)? {
        return Ok(id);
    }
    let suggested = candidate
        .category
        .as_deref()
        .or_else(|| classify(&candidate.merchant, candidate.direction));
    match suggested {
        Some(name) => db::get_or_create_category(conn, name),
        None => db::get_or_create_category(conn, FALLBACK_CATEGORY),
    }
}

/// Manual assignment of a category to a merchant, expanded to every stored
/// near-duplicate variant in one operation. Each variant gets a learned
/// mapping (overwriting any previous one) and its transactions re-pointed.
/// Returns the number of transactions updated.
pub fn assign_merchant_category(conn: &Connection, merchant: &str, category_name: &str) -> Result<usize> {
    let category_id = db::get_or_create_category(conn, category_name)?;
    let known = db::list_merchants(conn)?;
    let mut variants = similarity::find_similar(merchant, &known);
    if !variants.iter().any(|v| v == merchant) {
        variants.push(merchant.to_string());
    }

    let mut updated = 0usize;
    for variant in &variants {
        db::remember_merchant_category(conn, variant, category_id)?;
        updated += db::update_category_for_merchant(conn, variant, category_id)?;
    }
    Ok(updated)
}
