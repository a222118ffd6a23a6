//! Semantic Scholar Graph API client.
//!
//! Supports lookup by external id (`DOI:`, `ARXIV:`, `PMID:`, `URL:`), title
//! search, and reference lists. An API key raises rate limits but is not
//! required.

use std::sync::Arc;

use citegraph_common::entities::{
    AuthorRecord, IdentifierSet, LiteratureMetadata, ParsedReference, RawReference,
};
use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{ident, Settings};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::instrument;

use crate::{SourceError, SourceRecord, SourceResult};

const PROVIDER: &str = "semantic_scholar";

const PAPER_FIELDS: &str =
    "title,abstract,year,venue,authors,externalIds,openAccessPdf,url";
const REFERENCE_FIELDS: &str = "title,year,authors,externalIds";

/// Kinds of external handles Semantic Scholar can resolve directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalIdKind {
    Doi,
    Arxiv,
    Pmid,
    Url,
}

impl ExternalIdKind {
    fn prefix(&self) -> &'static str {
        match self {
            ExternalIdKind::Doi => "DOI",
            ExternalIdKind::Arxiv => "ARXIV",
            ExternalIdKind::Pmid => "PMID",
            ExternalIdKind::Url => "URL",
        }
    }
}

pub struct SemanticScholarClient {
    broker: Arc<RequestBroker>,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(broker: Arc<RequestBroker>, settings: &Settings) -> Self {
        Self {
            broker,
            base_url: settings.semantic_scholar_api_base_url.clone(),
            api_key: settings.semantic_scholar_api_key.clone(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(ref key) = self.api_key {
            if let Ok(v) = HeaderValue::from_str(key) {
                headers.insert("x-api-key", v);
            }
        }
        headers
    }

    /// Look up a paper by any supported external handle.
    #[instrument(skip(self))]
    pub async fn by_external_id(
        &self,
        kind: ExternalIdKind,
        value: &str,
    ) -> SourceResult<Option<SourceRecord>> {
        let id = match kind {
            ExternalIdKind::Doi => ident::normalize_doi(value),
            ExternalIdKind::Arxiv => ident::normalize_arxiv_id(value),
            _ => value.trim().to_string(),
        };
        let url = format!(
            "{}/graph/v1/paper/{}:{}?fields={}",
            self.base_url,
            kind.prefix(),
            id,
            PAPER_FIELDS
        );
        let resp = match self
            .broker
            .get_with_headers(DestClass::External, &url, self.headers())
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(SourceError::from_request(PROVIDER, e)),
        };
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        Ok(Some(paper_to_record(&body)))
    }

    /// Best title-search hit, if any. Looser than the CrossRef search; the
    /// caller applies its own acceptance scoring.
    #[instrument(skip(self))]
    pub async fn search(&self, title: &str) -> SourceResult<Option<SourceRecord>> {
        let url = format!(
            "{}/graph/v1/paper/search?query={}&limit=1&fields={}",
            self.base_url,
            title.replace(' ', "+"),
            PAPER_FIELDS
        );
        let resp = self
            .broker
            .get_with_headers(DestClass::External, &url, self.headers())
            .await
            .map_err(|e| SourceError::from_request(PROVIDER, e))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        Ok(body["data"]
            .as_array()
            .and_then(|items| items.first())
            .map(paper_to_record))
    }

    /// Reference list of a paper identified by an external handle.
    #[instrument(skip(self))]
    pub async fn references_of(
        &self,
        kind: ExternalIdKind,
        value: &str,
    ) -> SourceResult<Vec<RawReference>> {
        let id = match kind {
            ExternalIdKind::Doi => ident::normalize_doi(value),
            ExternalIdKind::Arxiv => ident::normalize_arxiv_id(value),
            _ => value.trim().to_string(),
        };
        let url = format!(
            "{}/graph/v1/paper/{}:{}/references?fields={}&limit=500",
            self.base_url,
            kind.prefix(),
            id,
            REFERENCE_FIELDS
        );
        let resp = match self
            .broker
            .get_with_headers(DestClass::External, &url, self.headers())
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::from_request(PROVIDER, e)),
        };
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        Ok(body["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| cited_paper_to_raw(&item["citedPaper"]))
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────

fn paper_to_record(paper: &serde_json::Value) -> SourceRecord {
    let title = paper["title"].as_str().unwrap_or("").trim().to_string();
    let authors: Vec<AuthorRecord> = paper["authors"]
        .as_array()
        .unwrap_or(&vec![])
        .iter()
        .enumerate()
        .filter_map(|(i, a)| {
            a["name"].as_str().map(|name| AuthorRecord {
                name: name.to_string(),
                sequence: Some(i as u32 + 1),
                affiliation: None,
            })
        })
        .collect();

    let external = &paper["externalIds"];
    let identifiers = IdentifierSet {
        doi: external["DOI"].as_str().map(ident::normalize_doi),
        arxiv_id: external["ArXiv"].as_str().map(ident::normalize_arxiv_id),
        pmid: external["PubMed"].as_str().map(String::from),
        ..Default::default()
    };

    SourceRecord {
        metadata: LiteratureMetadata {
            title,
            authors,
            year: paper["year"].as_i64().map(|y| y as i32),
            journal: paper["venue"]
                .as_str()
                .filter(|v| !v.is_empty())
                .map(String::from),
            abstract_text: paper["abstract"].as_str().map(String::from),
            keywords: Vec::new(),
            source_priority: vec![PROVIDER.to_string()],
        },
        identifiers,
        pdf_url: paper["openAccessPdf"]["url"].as_str().map(String::from),
        source_page_url: paper["url"].as_str().map(String::from),
    }
}

fn cited_paper_to_raw(cited: &serde_json::Value) -> Option<RawReference> {
    let title = cited["title"].as_str()?.trim().to_string();
    if title.is_empty() {
        return None;
    }
    let external = &cited["externalIds"];
    let authors: Vec<String> = cited["authors"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let year = cited["year"].as_i64().map(|y| y as i32);

    Some(RawReference {
        raw_text: title.clone(),
        parsed: Some(ParsedReference {
            title: Some(title),
            authors,
            year,
            doi: external["DOI"].as_str().map(ident::normalize_doi),
            arxiv_id: external["ArXiv"].as_str().map(ident::normalize_arxiv_id),
        }),
        source: PROVIDER.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_payload_is_normalized() {
        let paper = serde_json::json!({
            "title": "Attention Is All You Need",
            "abstract": "Transformers.",
            "year": 2017,
            "venue": "NeurIPS",
            "url": "https://www.semanticscholar.org/paper/abc",
            "authors": [{"name": "Ashish Vaswani"}, {"name": "Noam Shazeer"}],
            "externalIds": {"DOI": "10.48550/arXiv.1706.03762", "ArXiv": "1706.03762"},
            "openAccessPdf": {"url": "https://arxiv.org/pdf/1706.03762.pdf"}
        });
        let r = paper_to_record(&paper);
        assert_eq!(r.identifiers.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(r.identifiers.doi.as_deref(), Some("10.48550/arxiv.1706.03762"));
        assert_eq!(r.metadata.journal.as_deref(), Some("NeurIPS"));
        assert_eq!(r.pdf_url.as_deref(), Some("https://arxiv.org/pdf/1706.03762.pdf"));
    }

    #[test]
    fn cited_paper_without_title_is_dropped() {
        assert!(cited_paper_to_raw(&serde_json::json!({"title": null})).is_none());
        assert!(cited_paper_to_raw(&serde_json::json!({"title": "  "})).is_none());
    }
}
