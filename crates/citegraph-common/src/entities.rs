//! Normalized bibliographic records shared by source clients, fetcher
//! waterfalls, the dedup engine, and the graph DAO.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An author in reading order. `sequence` is 1-based when the source
/// provides ordering, absent otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

impl AuthorRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequence: None,
            affiliation: None,
        }
    }

    /// Surname heuristic: last whitespace token, or the part before a comma
    /// for "Family, Given" forms.
    pub fn surname(&self) -> &str {
        let name = self.name.trim();
        if let Some((family, _)) = name.split_once(',') {
            return family.trim();
        }
        name.split_whitespace().next_back().unwrap_or(name)
    }
}

/// Where a metadata record came from, in waterfall priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    UserSupplied,
    CrossRef,
    Arxiv,
    SemanticScholar,
    Grobid,
    SiteScrape,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataSource::UserSupplied => "user_supplied",
            MetadataSource::CrossRef => "crossref",
            MetadataSource::Arxiv => "arxiv",
            MetadataSource::SemanticScholar => "semantic_scholar",
            MetadataSource::Grobid => "grobid",
            MetadataSource::SiteScrape => "site_scrape",
        }
    }
}

/// Normalized bibliographic metadata, independent of the producing source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteratureMetadata {
    pub title: String,
    pub authors: Vec<AuthorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Sources that contributed fields, highest priority first.
    #[serde(default)]
    pub source_priority: Vec<String>,
}

impl LiteratureMetadata {
    pub fn surnames(&self) -> Vec<String> {
        self.authors
            .iter()
            .map(|a| a.surname().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// External identifiers of a literature. Set-valued fields only grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    /// PDF content fingerprint (md5 of the bytes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
}

impl IdentifierSet {
    pub fn is_empty(&self) -> bool {
        self.doi.is_none()
            && self.arxiv_id.is_none()
            && self.pmid.is_none()
            && self.fingerprint.is_none()
            && self.source_urls.is_empty()
    }

    /// Absorb identifiers from `other` without overwriting existing values.
    pub fn merge(&mut self, other: &IdentifierSet) {
        if self.doi.is_none() {
            self.doi = other.doi.clone();
        }
        if self.arxiv_id.is_none() {
            self.arxiv_id = other.arxiv_id.clone();
        }
        if self.pmid.is_none() {
            self.pmid = other.pmid.clone();
        }
        if self.fingerprint.is_none() {
            self.fingerprint = other.fingerprint.clone();
        }
        for url in &other.source_urls {
            if !self.source_urls.contains(url) {
                self.source_urls.push(url.clone());
            }
        }
    }
}

/// Fulltext-derived content of a literature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulltext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsing_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// A single reference as extracted from an API payload, a parsed PDF
/// bibliography, or a scraped reference list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReference {
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedReference>,
    /// Which waterfall step produced this entry.
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
}

/// User-facing submission: one external handle plus optional hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
}

impl SubmissionSource {
    /// At least one resolvable handle was supplied.
    pub fn has_any_handle(&self) -> bool {
        self.doi.is_some()
            || self.arxiv_id.is_some()
            || self.pmid.is_some()
            || self.url.is_some()
            || self.pdf_url.is_some()
            || self.title.is_some()
    }

    /// Stable normalized form used for in-flight duplicate comparison.
    pub fn normalized_key(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(ref doi) = self.doi {
            parts.push(format!("doi:{}", crate::ident::normalize_doi(doi)));
        }
        if let Some(ref id) = self.arxiv_id {
            parts.push(format!("arxiv:{}", crate::ident::normalize_arxiv_id(id)));
        }
        if let Some(ref pmid) = self.pmid {
            parts.push(format!("pmid:{}", pmid.trim()));
        }
        if let Some(ref url) = self.url {
            parts.push(format!("url:{}", crate::ident::normalize_url(url)));
        }
        if let Some(ref url) = self.pdf_url {
            parts.push(format!("pdf:{}", crate::ident::normalize_url(url)));
        }
        parts.join("|")
    }
}

/// Snapshot of a literature as stored in the graph, minus task bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteratureRecord {
    pub lid: String,
    pub identifiers: IdentifierSet,
    pub metadata: LiteratureMetadata,
    pub content: ContentRecord,
    #[serde(default)]
    pub references: Vec<RawReference>,
    pub placeholder: bool,
    /// Snapshot of the last or ongoing ingestion task for this record.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub task_info: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LiteratureRecord {
    /// Execution status recorded in the embedded task snapshot, if any.
    pub fn task_status(&self) -> Option<&str> {
        self.task_info["execution_status"].as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surname_handles_both_name_orders() {
        assert_eq!(AuthorRecord::new("Ashish Vaswani").surname(), "Vaswani");
        assert_eq!(AuthorRecord::new("Vaswani, Ashish").surname(), "Vaswani");
        assert_eq!(AuthorRecord::new("Plato").surname(), "Plato");
    }

    #[test]
    fn identifier_merge_is_monotonic() {
        let mut a = IdentifierSet {
            doi: Some("10.1/x".into()),
            source_urls: vec!["https://a.example/x".into()],
            ..Default::default()
        };
        let b = IdentifierSet {
            doi: Some("10.1/y".into()),
            arxiv_id: Some("1706.03762".into()),
            source_urls: vec!["https://a.example/x".into(), "https://b.example/y".into()],
            ..Default::default()
        };
        a.merge(&b);
        // Existing DOI wins, new fields fill in, URLs dedup.
        assert_eq!(a.doi.as_deref(), Some("10.1/x"));
        assert_eq!(a.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(a.source_urls.len(), 2);
    }

    #[test]
    fn normalized_key_is_order_stable() {
        let s = SubmissionSource {
            doi: Some("10.48550/arXiv.1706.03762".into()),
            url: Some("https://arxiv.org/abs/1706.03762v2".into()),
            ..Default::default()
        };
        let k1 = s.normalized_key();
        let k2 = s.normalized_key();
        assert_eq!(k1, k2);
        assert!(k1.starts_with("doi:10.48550/arxiv.1706.03762"));
    }
}
