//! CrossRef works API client.
//!
//! Used for DOI resolution, strict title search, and reference lists.
//! Polite-pool etiquette: the configured mailto is sent with every request.
//!
//! API: https://api.crossref.org/works/{doi}

use std::sync::Arc;

use citegraph_common::entities::{
    AuthorRecord, IdentifierSet, LiteratureMetadata, ParsedReference, RawReference,
};
use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{ident, Settings};
use tracing::{debug, instrument};

use crate::{strip_jats, SourceError, SourceRecord, SourceResult};

const PROVIDER: &str = "crossref";

pub struct CrossRefClient {
    broker: Arc<RequestBroker>,
    base_url: String,
    mailto: Option<String>,
}

impl CrossRefClient {
    pub fn new(broker: Arc<RequestBroker>, settings: &Settings) -> Self {
        Self {
            broker,
            base_url: settings.crossref_api_base_url.clone(),
            mailto: settings.crossref_mailto.clone(),
        }
    }

    fn mailto_query(&self) -> String {
        self.mailto
            .as_deref()
            .map(|m| format!("mailto={m}"))
            .unwrap_or_default()
    }

    /// Resolve a DOI to a normalized record. `None` when CrossRef does not
    /// know the DOI.
    #[instrument(skip(self))]
    pub async fn by_doi(&self, doi: &str) -> SourceResult<Option<SourceRecord>> {
        let doi = ident::normalize_doi(doi);
        let url = format!("{}/works/{}?{}", self.base_url, doi, self.mailto_query());
        let resp = match self.broker.get(DestClass::External, &url).await {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(SourceError::from_request(PROVIDER, e)),
        };
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        Ok(Some(work_to_record(&body["message"])))
    }

    /// Title search restricted to exact matches after normalization, so a
    /// near-miss from CrossRef's relevance ranking never binds to the wrong
    /// work.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> SourceResult<Option<SourceRecord>> {
        let url = format!(
            "{}/works?query.title={}&rows=5&{}",
            self.base_url,
            urlencoding_title(title),
            self.mailto_query()
        );
        let resp = self
            .broker
            .get(DestClass::External, &url)
            .await
            .map_err(|e| SourceError::from_request(PROVIDER, e))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;

        let wanted = normalize_for_compare(title);
        let items = body["message"]["items"].as_array().cloned().unwrap_or_default();
        debug!(n = items.len(), "CrossRef title search results");

        for item in &items {
            let record = work_to_record(item);
            if normalize_for_compare(&record.metadata.title) != wanted {
                continue;
            }
            if let (Some(want), Some(got)) = (year, record.metadata.year) {
                if (want - got).abs() > 1 {
                    continue;
                }
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Reference list of a work, normalized. Empty when CrossRef has no
    /// deposited references for the DOI.
    #[instrument(skip(self))]
    pub async fn references_of(&self, doi: &str) -> SourceResult<Vec<RawReference>> {
        let Some(record) = self.by_doi_raw(doi).await? else {
            return Ok(Vec::new());
        };
        let refs = record["reference"].as_array().cloned().unwrap_or_default();
        Ok(refs.iter().map(reference_to_raw).collect())
    }

    async fn by_doi_raw(&self, doi: &str) -> SourceResult<Option<serde_json::Value>> {
        let doi = ident::normalize_doi(doi);
        let url = format!("{}/works/{}?{}", self.base_url, doi, self.mailto_query());
        let resp = match self.broker.get(DestClass::External, &url).await {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(SourceError::from_request(PROVIDER, e)),
        };
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        Ok(Some(body["message"].clone()))
    }
}

fn urlencoding_title(title: &str) -> String {
    title
        .replace('%', "%25")
        .replace('&', "%26")
        .replace('+', "%2B")
        .replace('#', "%23")
        .replace(' ', "+")
}

fn normalize_for_compare(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

// ── Conversion ─────────────────────────────────────────────────────────────

fn work_to_record(work: &serde_json::Value) -> SourceRecord {
    let doi = work["DOI"].as_str().map(ident::normalize_doi);

    let title = work["title"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    let abstract_text = work["abstract"].as_str().map(strip_jats);

    let authors: Vec<AuthorRecord> = work["author"]
        .as_array()
        .unwrap_or(&vec![])
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let given = a["given"].as_str().unwrap_or("").trim().to_string();
            let family = a["family"].as_str().unwrap_or("").trim().to_string();
            let name = if given.is_empty() {
                family.clone()
            } else {
                format!("{given} {family}")
            };
            AuthorRecord {
                name,
                sequence: Some(i as u32 + 1),
                affiliation: a["affiliation"]
                    .as_array()
                    .and_then(|af| af.first())
                    .and_then(|af| af["name"].as_str())
                    .map(String::from),
            }
        })
        .collect();

    let journal = work["container-title"]
        .as_array()
        .and_then(|j| j.first())
        .and_then(|j| j.as_str())
        .map(String::from);

    let year = work["published"]["date-parts"]
        .as_array()
        .and_then(|dp| dp.first())
        .and_then(|dp| dp.as_array())
        .and_then(|parts| parts.first())
        .and_then(|y| y.as_i64())
        .map(|y| y as i32)
        .or_else(|| {
            work["issued"]["date-parts"][0][0]
                .as_i64()
                .map(|y| y as i32)
        });

    let pdf_url = work["link"].as_array().and_then(|links| {
        links
            .iter()
            .find(|l| l["content-type"].as_str() == Some("application/pdf"))
            .and_then(|l| l["URL"].as_str())
            .map(String::from)
    });

    let source_page_url = work["URL"].as_str().map(String::from);

    SourceRecord {
        metadata: LiteratureMetadata {
            title,
            authors,
            year,
            journal,
            abstract_text,
            keywords: work["subject"]
                .as_array()
                .map(|s| {
                    s.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            source_priority: vec![PROVIDER.to_string()],
        },
        identifiers: IdentifierSet {
            doi,
            ..Default::default()
        },
        pdf_url,
        source_page_url,
    }
}

fn reference_to_raw(item: &serde_json::Value) -> RawReference {
    let title = item["article-title"]
        .as_str()
        .or_else(|| item["volume-title"].as_str())
        .map(|s| s.trim().to_string());
    let doi = item["DOI"].as_str().map(ident::normalize_doi);
    let year = item["year"]
        .as_str()
        .and_then(|y| y.parse().ok())
        .or_else(|| item["year"].as_i64().map(|y| y as i32));
    let authors: Vec<String> = item["author"]
        .as_str()
        .map(|a| vec![a.to_string()])
        .unwrap_or_default();

    let raw_text = item["unstructured"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| {
            let mut parts = Vec::new();
            if let Some(ref a) = authors.first() {
                parts.push(a.to_string());
            }
            if let Some(ref t) = title {
                parts.push(t.to_string());
            }
            if let Some(y) = year {
                parts.push(y.to_string());
            }
            if let Some(ref d) = doi {
                parts.push(format!("doi:{d}"));
            }
            parts.join(". ")
        });

    let has_fields = title.is_some() || doi.is_some() || year.is_some() || !authors.is_empty();
    RawReference {
        raw_text,
        parsed: has_fields.then(|| ParsedReference {
            title,
            authors,
            year,
            doi,
            arxiv_id: None,
        }),
        source: PROVIDER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_to_record_minimal() {
        let work = serde_json::json!({
            "DOI": "10.1000/TEST",
            "title": ["Attention Is All You Need"],
            "abstract": "<jats:p>Transformers.</jats:p>",
            "author": [
                { "given": "Ashish", "family": "Vaswani" },
                { "given": "Noam", "family": "Shazeer" }
            ],
            "container-title": ["NeurIPS"],
            "published": { "date-parts": [[2017, 12, 4]] },
            "URL": "https://doi.org/10.1000/test"
        });
        let r = work_to_record(&work);
        assert_eq!(r.identifiers.doi.as_deref(), Some("10.1000/test"));
        assert_eq!(r.metadata.title, "Attention Is All You Need");
        assert_eq!(r.metadata.year, Some(2017));
        assert_eq!(r.metadata.authors[0].name, "Ashish Vaswani");
        assert_eq!(r.metadata.authors[0].sequence, Some(1));
        assert_eq!(r.metadata.abstract_text.as_deref(), Some("Transformers."));
    }

    #[test]
    fn structured_reference_is_parsed() {
        let item = serde_json::json!({
            "article-title": "Neural Machine Translation",
            "DOI": "10.1/NMT",
            "year": "2015",
            "author": "Bahdanau"
        });
        let r = reference_to_raw(&item);
        let p = r.parsed.unwrap();
        assert_eq!(p.title.as_deref(), Some("Neural Machine Translation"));
        assert_eq!(p.doi.as_deref(), Some("10.1/nmt"));
        assert_eq!(p.year, Some(2015));
        assert_eq!(p.authors, vec!["Bahdanau".to_string()]);
    }

    #[test]
    fn unstructured_reference_keeps_raw_text() {
        let item = serde_json::json!({
            "unstructured": "Smith, J. Some old paper. 1999."
        });
        let r = reference_to_raw(&item);
        assert_eq!(r.raw_text, "Smith, J. Some old paper. 1999.");
        assert!(r.parsed.is_none());
    }

    #[test]
    fn title_comparison_ignores_case_and_punctuation() {
        assert_eq!(
            normalize_for_compare("Attention Is: All You Need!"),
            normalize_for_compare("attention is all you need")
        );
    }
}
