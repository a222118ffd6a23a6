//! Fuzzy title and author matching for citation resolution.
//!
//! Composite title score: 70% token overlap + 30% longest-common-subsequence
//! ratio. A cheap token-overlap gate runs first; the full composite is only
//! computed above the gate threshold. Author agreement uses Jaro-Winkler on
//! surnames.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use strsim::jaro_winkler;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "being", "from", "about", "into", "through",
    "during", "before", "after", "above", "below", "between", "under", "over",
];

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let stripped = NON_ALNUM.replace_all(&lower, "");
    SPACES.replace_all(stripped.trim(), " ").to_string()
}

fn title_words(normalized: &str) -> HashSet<&str> {
    normalized
        .split_whitespace()
        .filter(|w| w.len() >= 2 && !STOPWORDS.contains(w))
        .collect()
}

/// Jaccard overlap of significant title words.
pub fn token_overlap(title_a: &str, title_b: &str) -> f64 {
    let norm_a = normalize_title(title_a);
    let norm_b = normalize_title(title_b);
    let words_a = title_words(&norm_a);
    let words_b = title_words(&norm_b);

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Longest-common-subsequence ratio over normalized characters:
/// `2·lcs / (|a| + |b|)`.
pub fn lcs_ratio(title_a: &str, title_b: &str) -> f64 {
    let a: Vec<char> = normalize_title(title_a).chars().collect();
    let b: Vec<char> = normalize_title(title_b).chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Single-row DP; titles are short so O(n·m) is fine.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];
    2.0 * lcs as f64 / (a.len() + b.len()) as f64
}

/// Composite title similarity: 70% token overlap, 30% LCS ratio.
pub fn title_score(title_a: &str, title_b: &str) -> f64 {
    let score = 0.7 * token_overlap(title_a, title_b) + 0.3 * lcs_ratio(title_a, title_b);
    score.min(1.0)
}

/// Surname heuristic for free-form author strings: the part before a comma,
/// otherwise the last whitespace token.
pub fn surname_of(name: &str) -> String {
    let name = name.trim();
    let surname = if let Some((family, _)) = name.split_once(',') {
        family.trim()
    } else {
        name.split_whitespace().next_back().unwrap_or(name)
    };
    surname
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Fraction of reference surnames that find a candidate surname at
/// Jaro-Winkler ≥ 0.8. Returns 1.0 when the reference has no authors
/// (nothing to contradict).
pub fn author_match_rate(ref_authors: &[String], candidate_authors: &[String]) -> f64 {
    let ref_surnames: Vec<String> = ref_authors
        .iter()
        .map(|a| surname_of(a))
        .filter(|s| !s.is_empty())
        .collect();
    if ref_surnames.is_empty() {
        return 1.0;
    }
    let candidate_surnames: Vec<String> = candidate_authors
        .iter()
        .map(|a| surname_of(a))
        .filter(|s| !s.is_empty())
        .collect();
    if candidate_surnames.is_empty() {
        return 0.0;
    }

    let matched = ref_surnames
        .iter()
        .filter(|r| {
            candidate_surnames
                .iter()
                .any(|c| jaro_winkler(r, c) >= 0.8)
        })
        .count();
    matched as f64 / ref_surnames.len() as f64
}

/// Thresholds for the citation acceptance rule. Defaults mirror the service
/// configuration defaults.
#[derive(Debug, Clone, Copy)]
pub struct MatchThresholds {
    /// Token-overlap gate below which no composite score is computed.
    pub gate: f64,
    /// Composite acceptance threshold.
    pub accept: f64,
    /// Allowed absolute year difference.
    pub year_tolerance: i32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            gate: 0.4,
            accept: 0.6,
            year_tolerance: 1,
        }
    }
}

/// Decide whether a parsed reference matches a stored candidate.
/// Returns the composite title score on acceptance.
pub fn accept_candidate(
    ref_title: &str,
    ref_authors: &[String],
    ref_year: Option<i32>,
    candidate_title: &str,
    candidate_authors: &[String],
    candidate_year: Option<i32>,
    thresholds: MatchThresholds,
) -> Option<f64> {
    // Gatekeeper: cheap overlap before the full composite.
    if token_overlap(ref_title, candidate_title) < thresholds.gate {
        return None;
    }
    let score = title_score(ref_title, candidate_title);
    if score < thresholds.accept {
        return None;
    }
    if !ref_authors.is_empty()
        && !candidate_authors.is_empty()
        && author_match_rate(ref_authors, candidate_authors) < 0.5
    {
        return None;
    }
    if let (Some(a), Some(b)) = (ref_year, candidate_year) {
        if (a - b).abs() > thresholds.year_tolerance {
            return None;
        }
    }
    Some(score)
}
