//! Literature ID generation.
//!
//! Format: `{year}-{first-author-surname}-{title-acronym}-{4hex}`, all
//! lowercase. The hex suffix is the first four hex characters of a SHA-256
//! over `normalize(title) + "|" + join(",", surnames) + "|" + year`, so
//! identical metadata always yields the identical LID.
//!
//! Example: `2017-vaswani-aayn-1a2b` for "Attention Is All You Need".

use citegraph_common::entities::LiteratureMetadata;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::matching::normalize_title;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "can", "shall",
];

static LID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}|unkn)-[a-z]{1,8}-[a-z]{1,5}-[0-9a-f]{4}$").unwrap()
});

/// Derive the deterministic LID for a metadata record.
pub fn generate_lid(metadata: &LiteratureMetadata) -> String {
    let year_part = metadata
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "unkn".to_string());
    let author_part = surname_part(metadata);
    let title_part = acronym_part(&metadata.title);
    let hash_part = hash_part(metadata);
    format!("{year_part}-{author_part}-{title_part}-{hash_part}")
}

/// Whether a string looks like a LID this service generated.
pub fn is_lid(candidate: &str) -> bool {
    LID_RE.is_match(candidate)
}

fn surname_part(metadata: &LiteratureMetadata) -> String {
    let surname: String = metadata
        .authors
        .first()
        .map(|a| a.surname().to_string())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_lowercase();
    if surname.is_empty() {
        "noauthor".to_string()
    } else {
        surname.chars().take(8).collect()
    }
}

/// First letters of the first up-to-5 significant title words, stop words
/// removed.
fn acronym_part(title: &str) -> String {
    let words: Vec<&str> = title
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    let significant: Vec<&str> = words
        .iter()
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .copied()
        .collect();

    let pool: Vec<&str> = if significant.len() >= 2 {
        significant
    } else {
        words.iter().filter(|w| w.len() >= 2).copied().collect()
    };

    let acronym: String = pool
        .iter()
        .take(5)
        .filter_map(|w| w.chars().next())
        .collect::<String>()
        .to_lowercase();

    if acronym.is_empty() {
        "x".to_string()
    } else {
        acronym
    }
}

fn hash_part(metadata: &LiteratureMetadata) -> String {
    let surnames = metadata.surnames().join(",");
    let year = metadata
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "unkn".to_string());
    let input = format!("{}|{}|{}", normalize_title(&metadata.title), surnames, year);
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use citegraph_common::entities::AuthorRecord;

    fn attention_metadata() -> LiteratureMetadata {
        LiteratureMetadata {
            title: "Attention Is All You Need".to_string(),
            authors: vec![
                AuthorRecord::new("Ashish Vaswani"),
                AuthorRecord::new("Noam Shazeer"),
            ],
            year: Some(2017),
            ..Default::default()
        }
    }

    #[test]
    fn lid_is_deterministic() {
        let m = attention_metadata();
        assert_eq!(generate_lid(&m), generate_lid(&m));
    }

    #[test]
    fn lid_has_expected_shape() {
        let lid = generate_lid(&attention_metadata());
        assert!(lid.starts_with("2017-vaswani-"), "{lid}");
        assert!(is_lid(&lid), "{lid}");
    }

    #[test]
    fn identical_normalized_inputs_share_a_lid() {
        let mut a = attention_metadata();
        let mut b = attention_metadata();
        a.title = "Attention Is All You Need".to_string();
        b.title = "attention is all you need!".to_string();
        assert_eq!(generate_lid(&a), generate_lid(&b));
    }

    #[test]
    fn different_titles_get_different_suffixes() {
        let a = attention_metadata();
        let mut b = attention_metadata();
        b.title = "Attention Is Not All You Need".to_string();
        assert_ne!(generate_lid(&a), generate_lid(&b));
    }

    #[test]
    fn missing_fields_fall_back() {
        let m = LiteratureMetadata {
            title: "On".to_string(),
            ..Default::default()
        };
        let lid = generate_lid(&m);
        assert!(lid.starts_with("unkn-noauthor-"), "{lid}");
    }

    #[test]
    fn surname_is_capped_at_eight_chars() {
        let m = LiteratureMetadata {
            title: "Some Paper About Things".to_string(),
            authors: vec![AuthorRecord::new("Jane Krishnamurthy")],
            year: Some(2020),
            ..Default::default()
        };
        let lid = generate_lid(&m);
        assert!(lid.starts_with("2020-krishnam-"), "{lid}");
    }
}
