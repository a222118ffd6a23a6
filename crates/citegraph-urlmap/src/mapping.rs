//! The result of mapping a URL onto canonical identifiers.

use serde::{Deserialize, Serialize};

/// Identifier set extracted from a URL by an adapter strategy. `confidence`
/// is the strategy's own estimate in `[0, 1]`; the adapter threshold decides
/// whether the waterfall stops here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlMapping {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    pub confidence: f64,
    /// Adapter and strategy that produced this mapping.
    pub adapter: String,
    pub strategy: String,
}

impl UrlMapping {
    /// A primary identifier was extracted.
    pub fn has_identifiers(&self) -> bool {
        self.doi.is_some() || self.arxiv_id.is_some()
    }

    /// Anything at all worth keeping: identifiers or content pointers.
    pub fn has_useful_info(&self) -> bool {
        self.has_identifiers()
            || self.pdf_url.is_some()
            || self.source_page_url.is_some()
            || self.venue.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usefulness_hierarchy() {
        let empty = UrlMapping::default();
        assert!(!empty.has_identifiers());
        assert!(!empty.has_useful_info());

        let pdf_only = UrlMapping {
            pdf_url: Some("https://example.org/p.pdf".into()),
            ..Default::default()
        };
        assert!(!pdf_only.has_identifiers());
        assert!(pdf_only.has_useful_info());

        let with_doi = UrlMapping {
            doi: Some("10.1/x".into()),
            ..Default::default()
        };
        assert!(with_doi.has_identifiers());
    }
}
