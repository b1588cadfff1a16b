//! Declarative column-position templates for tabular statement exports, one
//! per institution format. Selected either by fuzzy header detection or by
//! explicit user choice; the registry itself is immutable.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstitutionKind {
    Bank,
    Card,
    Securities,
    Other,
}

/// Sparse column mapping; only the indices a format actually carries are set.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub date: usize,
    pub description: Option<usize>,
    pub merchant: Option<usize>,
    pub withdrawal: Option<usize>,
    pub deposit: Option<usize>,
    pub amount: Option<usize>,
    pub balance: Option<usize>,
}

#[derive(Debug)]
pub struct BankTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: InstitutionKind,
    pub columns: ColumnMap,
    /// Preferred date layout of this export; the row parser tries it first
    /// and falls back to tolerant parsing.
    pub date_format: &'static str,
    pub has_header: bool,
    pub skip_rows: usize,
    /// Header cell names used for fuzzy auto-detection.
    pub sample_columns: &'static [&'static str],
}

/// Fraction of sample column names that must appear in a header row for a
/// template to be auto-selected.
pub const DETECTION_THRESHOLD: f64 = 0.7;

/// Ordered registry; more specific formats come first because detection is
/// first-match-wins.
pub const TEMPLATES: &[BankTemplate] = &[
    BankTemplate {
        id: "kb_bank",
        name: "KB국민은행",
        kind: InstitutionKind::Bank,
        columns: ColumnMap {
            date: 0,
            description: Some(3),
            merchant: None,
            withdrawal: Some(4),
            deposit: Some(5),
            amount: None,
            balance: Some(6),
        },
        date_format: "%Y.%m.%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &[
            "거래일자", "거래시간", "적요", "기재내용", "출금금액", "입금금액", "거래후잔액",
            "취급점", "메모", "구분",
        ],
    },
    BankTemplate {
        id: "shinhan_bank",
        name: "신한은행",
        kind: InstitutionKind::Bank,
        columns: ColumnMap {
            date: 0,
            description: Some(2),
            merchant: None,
            withdrawal: Some(3),
            deposit: Some(4),
            amount: None,
            balance: Some(5),
        },
        date_format: "%Y-%m-%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &["거래일자", "거래시간", "적요", "출금(원)", "입금(원)", "잔액(원)", "거래점"],
    },
    BankTemplate {
        id: "kakao_bank",
        name: "카카오뱅크",
        kind: InstitutionKind::Bank,
        columns: ColumnMap {
            date: 0,
            description: Some(4),
            merchant: None,
            withdrawal: None,
            deposit: None,
            amount: Some(2),
            balance: Some(3),
        },
        date_format: "%Y.%m.%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &["거래일시", "구분", "거래금액", "거래후잔액", "거래내용"],
    },
    BankTemplate {
        id: "toss_bank",
        name: "토스뱅크",
        kind: InstitutionKind::Bank,
        columns: ColumnMap {
            date: 0,
            description: Some(1),
            merchant: None,
            withdrawal: None,
            deposit: None,
            amount: Some(2),
            balance: Some(3),
        },
        date_format: "%Y-%m-%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &["거래 일시", "적요", "거래 금액", "거래 후 잔액"],
    },
    BankTemplate {
        id: "shinhan_card",
        name: "신한카드",
        kind: InstitutionKind::Card,
        columns: ColumnMap {
            date: 0,
            description: None,
            merchant: Some(1),
            withdrawal: Some(2),
            deposit: None,
            amount: None,
            balance: None,
        },
        date_format: "%Y-%m-%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &["이용일자", "이용가맹점", "이용금액", "할부"],
    },
    BankTemplate {
        id: "samsung_card",
        name: "삼성카드",
        kind: InstitutionKind::Card,
        columns: ColumnMap {
            date: 0,
            description: None,
            merchant: Some(2),
            withdrawal: Some(3),
            deposit: None,
            amount: None,
            balance: None,
        },
        date_format: "%Y-%m-%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &["승인일자", "승인시각", "가맹점명", "승인금액", "할부기간"],
    },
    BankTemplate {
        id: "securities",
        name: "증권사 거래내역",
        kind: InstitutionKind::Securities,
        columns: ColumnMap {
            date: 0,
            description: Some(1),
            merchant: None,
            withdrawal: None,
            deposit: None,
            amount: Some(2),
            balance: Some(3),
        },
        date_format: "%Y-%m-%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &["거래일자", "거래구분", "거래금액", "예수금"],
    },
    // Catch-all for the 거래일자/적요/출금금액/입금금액 layout most bank web
    // exports share; kept last so institution templates win first.
    BankTemplate {
        id: "standard_bank",
        name: "표준 은행양식",
        kind: InstitutionKind::Bank,
        columns: ColumnMap {
            date: 0,
            description: Some(1),
            merchant: None,
            withdrawal: Some(2),
            deposit: Some(3),
            amount: None,
            balance: None,
        },
        date_format: "%Y-%m-%d",
        has_header: true,
        skip_rows: 0,
        sample_columns: &["거래일자", "적요", "출금금액", "입금금액"],
    },
];

/// Auto-detect a template from a header row: the first template whose sample
/// column names appear (as substrings of the joined lowercase header) at a
/// fraction of at least `DETECTION_THRESHOLD` wins. `None` means the caller
/// must fall back to explicit template selection.
pub fn detect_template(header: &[String]) -> Option<&'static BankTemplate> {
    let joined = header.join(" ").to_lowercase();
    TEMPLATES.iter().find(|t| {
        let found = t
            .sample_columns
            .iter()
            .filter(|s| joined.contains(&s.to_lowercase()))
            .count();
        found as f64 / t.sample_columns.len() as f64 >= DETECTION_THRESHOLD
    })
}

pub fn template_by_id(id: &str) -> Option<&'static BankTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_standard_bank_layout() {
        let t = detect_template(&header(&["거래일자", "적요", "출금금액", "입금금액"])).unwrap();
        assert_eq!(t.id, "standard_bank");
    }

    #[test]
    fn test_detect_prefers_specific_template() {
        let t = detect_template(&header(&[
            "거래일자", "거래시간", "적요", "기재내용", "출금금액", "입금금액", "거래후잔액",
            "취급점", "메모", "구분",
        ]))
        .unwrap();
        assert_eq!(t.id, "kb_bank");
    }

    #[test]
    fn test_detect_card_statement() {
        let t = detect_template(&header(&["이용일자", "이용가맹점", "이용금액", "할부"])).unwrap();
        assert_eq!(t.id, "shinhan_card");
        assert_eq!(t.kind, InstitutionKind::Card);
    }

    #[test]
    fn test_detection_threshold_boundary() {
        // kb_bank has ten sample columns: seven present is exactly 70%
        let seven = header(&[
            "거래일자", "거래시간", "적요", "기재내용", "출금금액", "입금금액", "취급점",
        ]);
        assert_eq!(detect_template(&seven).unwrap().id, "kb_bank");

        // Six of ten is 60%: kb_bank no longer qualifies, and this subset
        // avoids every other template too
        let six = header(&["거래일자", "거래시간", "적요", "기재내용", "취급점", "메모"]);
        assert!(detect_template(&six).is_none());
    }

    #[test]
    fn test_detect_unknown_header() {
        assert!(detect_template(&header(&["name", "email", "phone"])).is_none());
        assert!(detect_template(&[]).is_none());
    }

    #[test]
    fn test_template_by_id() {
        assert_eq!(template_by_id("standard_bank").unwrap().name, "표준 은행양식");
        assert!(template_by_id("nope").is_none());
    }

    #[test]
    fn test_registry_column_maps_are_consistent() {
        for t in TEMPLATES {
            let has_amount_source =
                t.columns.amount.is_some() || t.columns.withdrawal.is_some() || t.columns.deposit.is_some();
            assert!(has_amount_source, "template {} has no amount column", t.id);
            assert!(
                t.columns.description.is_some() || t.columns.merchant.is_some(),
                "template {} has no description column",
                t.id
            );
        }
    }
}
