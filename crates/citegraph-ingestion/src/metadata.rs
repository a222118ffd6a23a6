//! Metadata acquisition waterfall.
//!
//! Ordered attempts, each with a confidence grade; the first success at or
//! above its grade wins. User-supplied fields take priority over anything a
//! provider returns, and every contributing source is recorded in
//! `source_priority`.

use std::sync::Arc;

use citegraph_common::entities::{
    AuthorRecord, IdentifierSet, LiteratureMetadata, MetadataSource, SubmissionSource,
};
use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{CitegraphError, ErrorKind, Result, Settings};
use citegraph_sources::arxiv::ArxivClient;
use citegraph_sources::crossref::CrossRefClient;
use citegraph_sources::grobid::GrobidClient;
use citegraph_sources::semantic_scholar::{ExternalIdKind, SemanticScholarClient};
use citegraph_sources::SourceRecord;
use citegraph_urlmap::scrape::extract_page_meta;
use tracing::{debug, info, instrument, warn};

/// What the waterfall produced, with provenance.
#[derive(Debug, Clone)]
pub struct MetadataOutcome {
    pub metadata: LiteratureMetadata,
    pub identifiers: IdentifierSet,
    pub pdf_url: Option<String>,
    pub source_page_url: Option<String>,
    pub source: MetadataSource,
    pub confidence: f64,
    pub attempts: u32,
}

pub struct MetadataFetcher {
    crossref: Arc<CrossRefClient>,
    arxiv: Arc<ArxivClient>,
    semantic_scholar: Arc<SemanticScholarClient>,
    grobid: Arc<GrobidClient>,
    broker: Arc<RequestBroker>,
}

impl MetadataFetcher {
    pub fn new(
        crossref: Arc<CrossRefClient>,
        arxiv: Arc<ArxivClient>,
        semantic_scholar: Arc<SemanticScholarClient>,
        grobid: Arc<GrobidClient>,
        broker: Arc<RequestBroker>,
        _settings: &Settings,
    ) -> Self {
        Self {
            crossref,
            arxiv,
            semantic_scholar,
            grobid,
            broker,
        }
    }

    /// Run the waterfall. `pdf` and `landing_page` feed the lower rungs when
    /// the authoritative APIs come up empty.
    #[instrument(skip(self, pdf, user))]
    pub async fn fetch(
        &self,
        identifiers: &IdentifierSet,
        pdf: Option<&[u8]>,
        landing_page: Option<&str>,
        user: &SubmissionSource,
    ) -> Result<MetadataOutcome> {
        let mut attempts = 0u32;

        if let Some(ref doi) = identifiers.doi {
            attempts += 1;
            match self.crossref.by_doi(doi).await {
                Ok(Some(record)) => {
                    return Ok(self.finish(record, MetadataSource::CrossRef, 0.95, attempts, user));
                }
                Ok(None) => debug!(doi, "CrossRef has no record"),
                Err(e) => warn!(doi, error = %e, "CrossRef lookup failed"),
            }
        }

        if let Some(ref arxiv_id) = identifiers.arxiv_id {
            attempts += 1;
            match self.arxiv.by_id(arxiv_id).await {
                Ok(Some(record)) => {
                    return Ok(self.finish(record, MetadataSource::Arxiv, 0.9, attempts, user));
                }
                Ok(None) => debug!(arxiv_id, "arXiv has no record"),
                Err(e) => warn!(arxiv_id, error = %e, "arXiv lookup failed"),
            }
        }

        for (kind, value) in [
            (ExternalIdKind::Doi, identifiers.doi.as_deref()),
            (ExternalIdKind::Arxiv, identifiers.arxiv_id.as_deref()),
            (ExternalIdKind::Pmid, identifiers.pmid.as_deref()),
        ] {
            let Some(value) = value else { continue };
            attempts += 1;
            match self.semantic_scholar.by_external_id(kind, value).await {
                Ok(Some(record)) => {
                    return Ok(self.finish(
                        record,
                        MetadataSource::SemanticScholar,
                        0.85,
                        attempts,
                        user,
                    ));
                }
                Ok(None) => debug!(value, "Semantic Scholar has no record"),
                Err(e) => warn!(value, error = %e, "Semantic Scholar lookup failed"),
            }
        }

        if let Some(pdf) = pdf {
            attempts += 1;
            match self.grobid.parse_header(pdf).await {
                Ok(Some(metadata)) if !metadata.title.trim().is_empty() => {
                    let record = SourceRecord {
                        metadata,
                        ..Default::default()
                    };
                    return Ok(self.finish(record, MetadataSource::Grobid, 0.7, attempts, user));
                }
                Ok(_) => debug!("PDF header parse produced no title"),
                Err(e) => warn!(error = %e, "PDF header parse failed"),
            }
        }

        if let Some(page_url) = landing_page {
            attempts += 1;
            match self.scrape_landing_page(page_url).await {
                Ok(Some(record)) => {
                    return Ok(self.finish(record, MetadataSource::SiteScrape, 0.5, attempts, user));
                }
                Ok(None) => debug!(page_url, "landing page carried no citation meta"),
                Err(e) => warn!(page_url, error = %e, "landing page scrape failed"),
            }
        }

        Err(CitegraphError::domain(
            ErrorKind::NotFound,
            "no metadata source succeeded",
        ))
    }

    async fn scrape_landing_page(&self, page_url: &str) -> Result<Option<SourceRecord>> {
        let resp = self
            .broker
            .get(DestClass::External, page_url)
            .await
            .map_err(CitegraphError::Request)?;
        let html = resp.text().await.map_err(CitegraphError::Http)?;
        let meta = extract_page_meta(&html);
        let Some(title) = meta.title else {
            return Ok(None);
        };

        Ok(Some(SourceRecord {
            metadata: LiteratureMetadata {
                title,
                authors: meta
                    .authors
                    .iter()
                    .enumerate()
                    .map(|(i, name)| AuthorRecord {
                        name: name.clone(),
                        sequence: Some(i as u32 + 1),
                        affiliation: None,
                    })
                    .collect(),
                year: meta.year,
                journal: meta.journal,
                abstract_text: meta.abstract_text,
                keywords: Vec::new(),
                source_priority: vec![MetadataSource::SiteScrape.as_str().to_string()],
            },
            identifiers: IdentifierSet {
                doi: meta.citation_doi,
                arxiv_id: meta.citation_arxiv_id,
                ..Default::default()
            },
            pdf_url: meta.citation_pdf_url,
            source_page_url: Some(page_url.to_string()),
        }))
    }

    fn finish(
        &self,
        record: SourceRecord,
        source: MetadataSource,
        confidence: f64,
        attempts: u32,
        user: &SubmissionSource,
    ) -> MetadataOutcome {
        let mut outcome = MetadataOutcome {
            metadata: record.metadata,
            identifiers: record.identifiers,
            pdf_url: record.pdf_url,
            source_page_url: record.source_page_url,
            source,
            confidence,
            attempts,
        };
        apply_user_overrides(&mut outcome, user);
        info!(
            source = source.as_str(),
            confidence,
            attempts,
            title = %outcome.metadata.title,
            "metadata resolved"
        );
        outcome
    }
}

/// User input outranks every provider: explicitly supplied title/authors
/// replace fetched values, and the provenance list says so.
fn apply_user_overrides(outcome: &mut MetadataOutcome, user: &SubmissionSource) {
    let mut user_contributed = false;
    if let Some(ref title) = user.title {
        if !title.trim().is_empty() {
            outcome.metadata.title = title.trim().to_string();
            user_contributed = true;
        }
    }
    if !user.authors.is_empty() {
        outcome.metadata.authors = user
            .authors
            .iter()
            .enumerate()
            .map(|(i, name)| AuthorRecord {
                name: name.clone(),
                sequence: Some(i as u32 + 1),
                affiliation: None,
            })
            .collect();
        user_contributed = true;
    }

    let mut priority = Vec::new();
    if user_contributed {
        priority.push(MetadataSource::UserSupplied.as_str().to_string());
    }
    priority.push(outcome.source.as_str().to_string());
    for earlier in &outcome.metadata.source_priority {
        if !priority.contains(earlier) {
            priority.push(earlier.clone());
        }
    }
    outcome.metadata.source_priority = priority;
}

/// Suggested user action after a metadata failure, keyed on what is known.
pub fn next_action_hint(identifiers: &IdentifierSet, had_pdf: bool) -> String {
    if identifiers.doi.is_none() && identifiers.arxiv_id.is_none() {
        "provide a DOI or arXiv id".to_string()
    } else if !had_pdf {
        "upload the PDF".to_string()
    } else {
        "verify the identifier or try again later".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_with_title(title: &str) -> MetadataOutcome {
        MetadataOutcome {
            metadata: LiteratureMetadata {
                title: title.to_string(),
                authors: vec![AuthorRecord::new("Fetched Author")],
                ..Default::default()
            },
            identifiers: IdentifierSet::default(),
            pdf_url: None,
            source_page_url: None,
            source: MetadataSource::CrossRef,
            confidence: 0.95,
            attempts: 1,
        }
    }

    #[test]
    fn user_title_outranks_provider_title() {
        let mut outcome = outcome_with_title("Provider Title");
        let user = SubmissionSource {
            title: Some("User Title".to_string()),
            ..Default::default()
        };
        apply_user_overrides(&mut outcome, &user);
        assert_eq!(outcome.metadata.title, "User Title");
        assert_eq!(
            outcome.metadata.source_priority,
            vec!["user_supplied".to_string(), "crossref".to_string()]
        );
    }

    #[test]
    fn provider_only_provenance_has_single_entry() {
        let mut outcome = outcome_with_title("Provider Title");
        apply_user_overrides(&mut outcome, &SubmissionSource::default());
        assert_eq!(outcome.metadata.source_priority, vec!["crossref".to_string()]);
    }

    #[test]
    fn next_action_depends_on_known_handles() {
        assert_eq!(
            next_action_hint(&IdentifierSet::default(), false),
            "provide a DOI or arXiv id"
        );
        let ids = IdentifierSet {
            doi: Some("10.1/x".into()),
            ..Default::default()
        };
        assert_eq!(next_action_hint(&ids, false), "upload the PDF");
    }
}
