//! Reference-list acquisition waterfall and in-list deduplication.
//!
//! Order: authoritative API lists (CrossRef when a DOI is known, Semantic
//! Scholar otherwise), then the PDF parser bibliography, then identifiers
//! scraped out of the landing page. Duplicates within the final list are
//! dropped by DOI first, then by normalized title + year.

use std::collections::HashSet;
use std::sync::Arc;

use citegraph_common::entities::{IdentifierSet, ParsedReference, RawReference};
use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{ident, CitegraphError, ErrorKind, Result};
use citegraph_sources::crossref::CrossRefClient;
use citegraph_sources::grobid::GrobidClient;
use citegraph_sources::semantic_scholar::{ExternalIdKind, SemanticScholarClient};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::matching::normalize_title;

/// What the waterfall produced and from where. The PDF rung also yields the
/// parsed body text, kept for the literature's fulltext field.
#[derive(Debug, Clone)]
pub struct ReferencesOutcome {
    pub references: Vec<RawReference>,
    pub source: String,
    pub attempts: u32,
    pub fulltext: Option<String>,
}

pub struct ReferencesFetcher {
    crossref: Arc<CrossRefClient>,
    semantic_scholar: Arc<SemanticScholarClient>,
    grobid: Arc<GrobidClient>,
    broker: Arc<RequestBroker>,
}

impl ReferencesFetcher {
    pub fn new(
        crossref: Arc<CrossRefClient>,
        semantic_scholar: Arc<SemanticScholarClient>,
        grobid: Arc<GrobidClient>,
        broker: Arc<RequestBroker>,
    ) -> Self {
        Self {
            crossref,
            semantic_scholar,
            grobid,
            broker,
        }
    }

    #[instrument(skip(self, pdf))]
    pub async fn fetch(
        &self,
        identifiers: &IdentifierSet,
        pdf: Option<&[u8]>,
        landing_page: Option<&str>,
    ) -> Result<ReferencesOutcome> {
        let mut attempts = 0u32;

        if let Some(ref doi) = identifiers.doi {
            attempts += 1;
            match self.crossref.references_of(doi).await {
                Ok(refs) if !refs.is_empty() => {
                    return Ok(finish(refs, "crossref", attempts));
                }
                Ok(_) => debug!(doi, "CrossRef deposited no references"),
                Err(e) => warn!(doi, error = %e, "CrossRef references failed"),
            }
        }

        for (kind, value) in [
            (ExternalIdKind::Doi, identifiers.doi.as_deref()),
            (ExternalIdKind::Arxiv, identifiers.arxiv_id.as_deref()),
        ] {
            let Some(value) = value else { continue };
            attempts += 1;
            match self.semantic_scholar.references_of(kind, value).await {
                Ok(refs) if !refs.is_empty() => {
                    return Ok(finish(refs, "semantic_scholar", attempts));
                }
                Ok(_) => debug!(value, "Semantic Scholar has no references"),
                Err(e) => warn!(value, error = %e, "Semantic Scholar references failed"),
            }
        }

        if let Some(pdf) = pdf {
            attempts += 1;
            match self.grobid.parse_fulltext(pdf).await {
                Ok(doc) if !doc.references.is_empty() => {
                    let mut outcome = finish(doc.references, "grobid", attempts);
                    outcome.fulltext = doc.body_text;
                    return Ok(outcome);
                }
                Ok(_) => debug!("PDF bibliography parse found nothing"),
                Err(e) => warn!(error = %e, "PDF bibliography parse failed"),
            }
        }

        if let Some(page_url) = landing_page {
            attempts += 1;
            match self.scrape_references(page_url).await {
                Ok(refs) if !refs.is_empty() => {
                    return Ok(finish(refs, "site_scrape", attempts));
                }
                Ok(_) => debug!(page_url, "no reference identifiers on landing page"),
                Err(e) => warn!(page_url, error = %e, "reference scrape failed"),
            }
        }

        Err(CitegraphError::domain(
            ErrorKind::NotFound,
            "no reference source succeeded",
        ))
    }

    /// Last-resort rung: DOIs and arXiv ids appearing in the reference
    /// section of the landing-page HTML.
    async fn scrape_references(&self, page_url: &str) -> Result<Vec<RawReference>> {
        let resp = self
            .broker
            .get(DestClass::External, page_url)
            .await
            .map_err(CitegraphError::Request)?;
        let html = resp.text().await.map_err(CitegraphError::Http)?;
        Ok(extract_reference_identifiers(&html))
    }
}

fn finish(references: Vec<RawReference>, source: &str, attempts: u32) -> ReferencesOutcome {
    let deduped = dedup_references(references);
    info!(source, count = deduped.len(), "references resolved");
    ReferencesOutcome {
        references: deduped,
        source: source.to_string(),
        attempts,
        fulltext: None,
    }
}

static HTML_DOI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"doi\.org/(10\.\d{4,9}/[^\s"'<>]+)"#).unwrap());
static HTML_ARXIV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"arxiv\.org/abs/((?:\d{4}\.\d{4,5}|[a-z-]+/\d{7})(?:v\d+)?)").unwrap()
});

/// Pull distinct cited identifiers out of raw HTML.
pub fn extract_reference_identifiers(html: &str) -> Vec<RawReference> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for caps in HTML_DOI.captures_iter(html) {
        let doi = ident::normalize_doi(&caps[1]);
        if seen.insert(format!("doi:{doi}")) {
            refs.push(RawReference {
                raw_text: format!("https://doi.org/{doi}"),
                parsed: Some(ParsedReference {
                    doi: Some(doi),
                    ..Default::default()
                }),
                source: "site_scrape".to_string(),
            });
        }
    }
    for caps in HTML_ARXIV.captures_iter(html) {
        let id = ident::normalize_arxiv_id(&caps[1]);
        if seen.insert(format!("arxiv:{id}")) {
            refs.push(RawReference {
                raw_text: ident::arxiv_abs_url(&id),
                parsed: Some(ParsedReference {
                    arxiv_id: Some(id),
                    ..Default::default()
                }),
                source: "site_scrape".to_string(),
            });
        }
    }
    refs
}

/// Drop duplicates within one reference list: DOI match first, then
/// normalized title + year.
pub fn dedup_references(references: Vec<RawReference>) -> Vec<RawReference> {
    let mut seen_dois: HashSet<String> = HashSet::new();
    let mut seen_titles: HashSet<(String, Option<i32>)> = HashSet::new();
    let mut out = Vec::with_capacity(references.len());

    for reference in references {
        if let Some(parsed) = &reference.parsed {
            if let Some(ref doi) = parsed.doi {
                if !seen_dois.insert(ident::normalize_doi(doi)) {
                    continue;
                }
            }
            if let Some(ref title) = parsed.title {
                let key = (normalize_title(title), parsed.year);
                if !key.0.is_empty() && !seen_titles.insert(key) {
                    continue;
                }
            }
        }
        out.push(reference);
    }
    out
}
