//! Content and title fingerprints used by deduplication and the citation
//! linker.

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::matching::normalize_title;

/// MD5 of the PDF bytes, hex-encoded.
pub fn pdf_fingerprint(pdf: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(pdf);
    hex::encode(hasher.finalize())
}

/// SHA-256 over normalized title, sorted lowercase surnames, and year.
/// The alias index is keyed on this for the phase-4 atomic create.
pub fn title_fingerprint(title: &str, surnames: &[String], year: Option<i32>) -> String {
    let mut sorted: Vec<String> = surnames.iter().map(|s| s.to_lowercase()).collect();
    sorted.sort();
    let year = year.map(|y| y.to_string()).unwrap_or_default();
    let input = format!("{}|{}|{}", normalize_title(title), sorted.join(","), year);
    hex::encode(Sha256::digest(input.as_bytes()))
}
