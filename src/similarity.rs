//! Merchant-name similarity. Branch-qualified variants of the same merchant
//! ("스타벅스 강남점", "스타벅스 역삼점") should cluster together for category
//! assignment and duplicate detection.

/// Threshold for clustering merchant variants during bulk category
/// reassignment. The duplicate detector applies its own, stricter bar
/// (`dedup::MERCHANT_MATCH_THRESHOLD`); the two are intentionally distinct.
pub const CLUSTER_THRESHOLD: f64 = 0.7;

/// Canonical form of a merchant name: lowercased, punctuation and whitespace
/// stripped, trailing branch-suffix token (…점) removed when other content
/// remains. Idempotent.
pub fn normalize(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '.' | '-'))
        .collect();
    strip_branch_suffix(&cleaned)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Drop a trailing whitespace-separated token ending in 점 ("X점" = "X
/// branch") unless it is the whole name.
fn strip_branch_suffix(s: &str) -> &str {
    let trimmed = s.trim_end();
    if let Some(idx) = trimmed.rfind(char::is_whitespace) {
        let last = trimmed[idx..].trim_start();
        if last.ends_with('점') && !trimmed[..idx].trim().is_empty() {
            return trimmed[..idx].trim_end();
        }
    }
    trimmed
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1] between two merchant names. Equality after
/// normalization scores 1.0, containment 0.8, anything else the normalized
/// Levenshtein similarity. Symmetric.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na == nb {
        return 1.0;
    }
    if !na.is_empty() && !nb.is_empty() && (na.contains(&nb) || nb.contains(&na)) {
        return 0.8;
    }
    let ca: Vec<char> = na.chars().collect();
    let cb: Vec<char> = nb.chars().collect();
    let max_len = ca.len().max(cb.len());
    let dist = levenshtein(&ca, &cb);
    (max_len - dist) as f64 / max_len as f64
}

/// Candidates scoring at or above `CLUSTER_THRESHOLD` against the target.
pub fn find_similar(target: &str, candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter(|c| similarity(target, c) >= CLUSTER_THRESHOLD)
        .cloned()
        .collect()
}
