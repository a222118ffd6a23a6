//! Strategy descriptors and the generic driver that runs them.
//!
//! A strategy is data: a tagged variant carrying its parameters plus, for
//! regex strategies, a pure post-processor. The driver owns all I/O, so
//! adapters stay declarative.

use std::sync::Arc;

use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::ident;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use citegraph_sources::arxiv::ArxivClient;
use citegraph_sources::semantic_scholar::{ExternalIdKind, SemanticScholarClient};

use crate::mapping::UrlMapping;
use crate::scrape::extract_page_meta;

/// Pure post-processor applied to a regex match. Fills the mapping from the
/// capture groups; never performs I/O.
pub type PostProcess = fn(&regex::Captures<'_>, &str, &mut UrlMapping);

/// One way to extract identifiers from a URL.
pub enum Strategy {
    /// Per-platform URL patterns plus a pure post-processor.
    Regex {
        name: &'static str,
        priority: u8,
        patterns: Vec<Regex>,
        post: PostProcess,
    },
    /// Call an authoritative API for a fragment already visible in the URL.
    Api {
        name: &'static str,
        priority: u8,
        kind: ApiKind,
    },
    /// Fetch the page and read `citation_*` / OpenGraph meta tags.
    Scraping { name: &'static str, priority: u8 },
    /// Ask a third-party resolver that indexes by URL.
    Database { name: &'static str, priority: u8 },
}

/// Which API an [`Strategy::Api`] descriptor consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    /// Validate and enrich an arXiv id found in the URL.
    ArxivLookup,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Regex { name, .. }
            | Strategy::Api { name, .. }
            | Strategy::Scraping { name, .. }
            | Strategy::Database { name, .. } => name,
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            Strategy::Regex { priority, .. }
            | Strategy::Api { priority, .. }
            | Strategy::Scraping { priority, .. }
            | Strategy::Database { priority, .. } => *priority,
        }
    }
}

/// Shared services a strategy run may touch.
pub struct StrategyContext {
    pub broker: Arc<RequestBroker>,
    pub arxiv: Arc<ArxivClient>,
    pub semantic_scholar: Arc<SemanticScholarClient>,
}

/// Run one strategy against a URL. `None` when the strategy does not apply
/// or found nothing; errors degrade to `None` so the adapter waterfall can
/// continue.
pub async fn run_strategy(
    strategy: &Strategy,
    url: &str,
    ctx: &StrategyContext,
) -> Option<UrlMapping> {
    let mut mapping = match strategy {
        Strategy::Regex { patterns, post, .. } => {
            let mut mapping = UrlMapping::default();
            let caps = patterns.iter().find_map(|p| p.captures(url))?;
            post(&caps, url, &mut mapping);
            mapping
        }
        Strategy::Api { kind, .. } => match kind {
            ApiKind::ArxivLookup => {
                let id = ident::extract_arxiv_id(url)?;
                let record = ctx.arxiv.by_id(&id).await.ok()??;
                UrlMapping {
                    doi: record.identifiers.doi,
                    arxiv_id: record.identifiers.arxiv_id,
                    source_page_url: record.source_page_url,
                    pdf_url: record.pdf_url,
                    venue: record.metadata.journal,
                    confidence: 0.95,
                    ..Default::default()
                }
            }
        },
        Strategy::Scraping { .. } => {
            let resp = ctx.broker.get(DestClass::External, url).await.ok()?;
            let html = resp.text().await.ok()?;
            let meta = extract_page_meta(&html);
            if meta.is_empty() {
                return None;
            }
            let confidence = if meta.citation_doi.is_some() || meta.citation_arxiv_id.is_some() {
                0.8
            } else {
                0.5
            };
            UrlMapping {
                doi: meta.citation_doi,
                arxiv_id: meta.citation_arxiv_id,
                source_page_url: Some(url.to_string()),
                pdf_url: meta.citation_pdf_url,
                venue: meta.journal,
                confidence,
                ..Default::default()
            }
        }
        Strategy::Database { .. } => {
            let record = ctx
                .semantic_scholar
                .by_external_id(ExternalIdKind::Url, url)
                .await
                .ok()??;
            if record.identifiers.is_empty() {
                return None;
            }
            UrlMapping {
                doi: record.identifiers.doi,
                arxiv_id: record.identifiers.arxiv_id,
                source_page_url: record.source_page_url.or_else(|| Some(url.to_string())),
                pdf_url: record.pdf_url,
                venue: record.metadata.journal,
                confidence: 0.85,
                ..Default::default()
            }
        }
    };

    if !mapping.has_useful_info() {
        return None;
    }
    mapping.strategy = strategy.name().to_string();
    debug!(
        strategy = strategy.name(),
        doi = ?mapping.doi,
        arxiv_id = ?mapping.arxiv_id,
        confidence = mapping.confidence,
        "strategy produced mapping"
    );
    Some(mapping)
}

// ── Shared post-processors ─────────────────────────────────────────────────

/// arXiv ids: version stripped for identity, abs/pdf URLs derived.
pub fn post_arxiv(caps: &regex::Captures<'_>, _url: &str, m: &mut UrlMapping) {
    let id = ident::normalize_arxiv_id(&caps[1]);
    m.source_page_url = Some(ident::arxiv_abs_url(&id));
    m.pdf_url = Some(ident::arxiv_pdf_url(&id));
    m.arxiv_id = Some(id);
    m.confidence = 0.95;
}

/// A DOI embedded directly in the URL path.
pub fn post_doi(caps: &regex::Captures<'_>, _url: &str, m: &mut UrlMapping) {
    let doi = ident::normalize_doi(caps[1].trim_end_matches(".pdf"));
    m.source_page_url = Some(format!("https://doi.org/{doi}"));
    m.doi = Some(doi);
    m.confidence = 0.9;
}

pub static DOI_IN_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(10\.\d{4,9}/[^\s?#]+)").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    fn regex_strategy(pattern: &str, post: PostProcess) -> Strategy {
        Strategy::Regex {
            name: "test_regex",
            priority: 1,
            patterns: vec![Regex::new(pattern).unwrap()],
            post,
        }
    }

    #[test]
    fn post_arxiv_strips_versions() {
        let strategy = regex_strategy(
            r"arxiv\.org/(?:abs|pdf)/((?:\d{4}\.\d{4,5}|[a-z-]+/\d{7})(?:v\d+)?)",
            post_arxiv,
        );
        let Strategy::Regex { patterns, post, .. } = &strategy else {
            unreachable!()
        };
        let caps = patterns[0]
            .captures("https://arxiv.org/pdf/1706.03762v2")
            .unwrap();
        let mut m = UrlMapping::default();
        post(&caps, "", &mut m);
        assert_eq!(m.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(m.pdf_url.as_deref(), Some("https://arxiv.org/pdf/1706.03762.pdf"));
        assert!(m.confidence >= 0.9);
    }

    #[test]
    fn post_doi_normalizes_and_links() {
        let caps = DOI_IN_PATH
            .captures("https://dl.acm.org/doi/pdf/10.1145/3292500.3330919.pdf")
            .unwrap();
        let mut m = UrlMapping::default();
        post_doi(&caps, "", &mut m);
        assert_eq!(m.doi.as_deref(), Some("10.1145/3292500.3330919"));
        assert_eq!(
            m.source_page_url.as_deref(),
            Some("https://doi.org/10.1145/3292500.3330919")
        );
    }
}
