//! Platform adapters: a name, the domains it claims, and its ordered
//! strategy list. The Generic adapter claims everything and runs last.

use once_cell::sync::Lazy;
use regex::Regex;

use citegraph_common::ident;

use crate::mapping::UrlMapping;
use crate::strategy::{post_arxiv, post_doi, ApiKind, Strategy};

pub struct Adapter {
    pub name: &'static str,
    pub priority: u8,
    /// Substring-matched host fragments; empty list means always-true.
    pub domains: &'static [&'static str],
    pub strategies: Vec<Strategy>,
    /// A mapping at or above this confidence stops the strategy waterfall.
    pub confidence_threshold: f64,
}

impl Adapter {
    pub fn can_handle(&self, url: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        let lower = url.to_lowercase();
        self.domains.iter().any(|d| lower.contains(d))
    }
}

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).expect("adapter pattern must compile")
}

// ── Per-platform post-processors ───────────────────────────────────────────

fn post_nature(caps: &regex::Captures<'_>, _url: &str, m: &mut UrlMapping) {
    let article_id = &caps[1];
    m.doi = Some(format!("10.1038/{}", article_id.to_lowercase()));
    m.source_page_url = Some(format!("https://www.nature.com/articles/{article_id}"));
    m.venue = Some("Nature".to_string());
    m.confidence = 0.85;
}

fn post_ieee(caps: &regex::Captures<'_>, _url: &str, m: &mut UrlMapping) {
    let document_id = &caps[1];
    m.source_page_url = Some(format!(
        "https://ieeexplore.ieee.org/document/{document_id}"
    ));
    m.venue = Some("IEEE".to_string());
    // No identifier in the URL itself; scraping must finish the job.
    m.confidence = 0.3;
}

fn post_neurips(caps: &regex::Captures<'_>, url: &str, m: &mut UrlMapping) {
    let year = &caps[1];
    let hash = &caps[2];
    m.source_page_url = Some(format!(
        "https://proceedings.neurips.cc/paper/{year}/hash/{hash}-Abstract.html"
    ));
    if url.ends_with("Paper.pdf") {
        m.pdf_url = Some(url.to_string());
    } else {
        m.pdf_url = Some(format!(
            "https://proceedings.neurips.cc/paper/{year}/file/{hash}-Paper.pdf"
        ));
    }
    m.venue = Some("NeurIPS".to_string());
    m.confidence = 0.7;
}

fn post_cvf(caps: &regex::Captures<'_>, url: &str, m: &mut UrlMapping) {
    m.venue = Some(caps[1].to_uppercase());
    if url.ends_with(".pdf") {
        m.pdf_url = Some(url.to_string());
    } else {
        m.source_page_url = Some(url.to_string());
    }
    m.confidence = 0.7;
}

fn post_semantic_scholar(caps: &regex::Captures<'_>, _url: &str, m: &mut UrlMapping) {
    m.source_page_url = Some(format!(
        "https://www.semanticscholar.org/paper/{}",
        &caps[1]
    ));
    m.confidence = 0.3;
}

/// Generic fallback: a DOI or arXiv id anywhere in the URL (PDF paths
/// included) still resolves.
fn post_generic(caps: &regex::Captures<'_>, url: &str, m: &mut UrlMapping) {
    let token = caps[1].trim_end_matches(".pdf");
    if let Some(id) = ident::extract_arxiv_id(url) {
        m.arxiv_id = Some(id.clone());
        m.source_page_url = Some(ident::arxiv_abs_url(&id));
        m.pdf_url = Some(ident::arxiv_pdf_url(&id));
        m.confidence = 0.9;
    } else if token.starts_with("10.") {
        m.doi = Some(ident::normalize_doi(token));
        m.source_page_url = Some(format!("https://doi.org/{}", m.doi.as_deref().unwrap()));
        m.confidence = 0.8;
    }
    if url.to_lowercase().ends_with(".pdf") && m.pdf_url.is_none() {
        m.pdf_url = Some(url.to_string());
    }
}

static GENERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(10\.\d{4,9}/[^\s?#]+|arxiv\.org/[^\s?#]+)").unwrap());

// ── Registry ───────────────────────────────────────────────────────────────

/// Build the full adapter registry, priority-ordered, Generic last.
pub fn build_registry(confidence_threshold: f64) -> Vec<Adapter> {
    vec![
        Adapter {
            name: "arxiv",
            priority: 1,
            domains: &["arxiv.org"],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "arxiv_regex",
                    priority: 1,
                    patterns: vec![
                        rx(r"(?i)arxiv\.org/(?:abs|pdf|html)/(\d{4}\.\d{4,5}(?:v\d+)?)"),
                        rx(r"(?i)arxiv\.org/(?:abs|pdf|html)/([a-z-]+/\d{7}(?:v\d+)?)"),
                    ],
                    post: post_arxiv,
                },
                Strategy::Api {
                    name: "arxiv_api",
                    priority: 2,
                    kind: ApiKind::ArxivLookup,
                },
            ],
        },
        Adapter {
            name: "doi_org",
            priority: 2,
            domains: &["doi.org"],
            confidence_threshold,
            strategies: vec![Strategy::Regex {
                name: "doi_regex",
                priority: 1,
                patterns: vec![rx(r"(?:dx\.)?doi\.org/(10\.\d{4,9}/[^\s?#]+)")],
                post: post_doi,
            }],
        },
        Adapter {
            name: "acm",
            priority: 3,
            domains: &["dl.acm.org"],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "acm_doi_regex",
                    priority: 1,
                    patterns: vec![rx(r"dl\.acm\.org/doi/(?:abs/|full/|pdf/)?(10\.\d{4,9}/[^\s?#]+)")],
                    post: post_doi,
                },
                Strategy::Scraping {
                    name: "acm_scrape",
                    priority: 2,
                },
            ],
        },
        Adapter {
            name: "ieee",
            priority: 3,
            domains: &["ieeexplore.ieee.org"],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "ieee_document_regex",
                    priority: 1,
                    patterns: vec![rx(
                        r"ieeexplore\.ieee\.org/(?:abstract/)?document/(\d+)",
                    )],
                    post: post_ieee,
                },
                Strategy::Scraping {
                    name: "ieee_scrape",
                    priority: 2,
                },
            ],
        },
        Adapter {
            name: "nature",
            priority: 3,
            domains: &["nature.com"],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "nature_article_regex",
                    priority: 1,
                    patterns: vec![rx(r"nature\.com/articles/([^/?#\s]+)")],
                    post: post_nature,
                },
                Strategy::Scraping {
                    name: "nature_scrape",
                    priority: 2,
                },
            ],
        },
        Adapter {
            name: "neurips",
            priority: 3,
            domains: &["proceedings.neurips.cc", "papers.nips.cc"],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "neurips_regex",
                    priority: 1,
                    patterns: vec![rx(
                        r"(?:proceedings\.neurips\.cc|papers\.nips\.cc)/paper(?:_files/paper)?/(\d{4})/(?:file|hash)/([0-9a-f]+)-(?:Paper\.pdf|Abstract\.html)",
                    )],
                    post: post_neurips,
                },
                Strategy::Database {
                    name: "neurips_s2",
                    priority: 2,
                },
            ],
        },
        Adapter {
            name: "cvf",
            priority: 3,
            domains: &["openaccess.thecvf.com"],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "cvf_regex",
                    priority: 1,
                    patterns: vec![rx(r"openaccess\.thecvf\.com/content[_/]([A-Za-z]+)")],
                    post: post_cvf,
                },
                Strategy::Database {
                    name: "cvf_s2",
                    priority: 2,
                },
            ],
        },
        Adapter {
            name: "semantic_scholar",
            priority: 3,
            domains: &["semanticscholar.org"],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "s2_paper_regex",
                    priority: 1,
                    patterns: vec![rx(r"semanticscholar\.org/paper/(?:.+/)?([0-9a-f]{40})")],
                    post: post_semantic_scholar,
                },
                Strategy::Database {
                    name: "s2_by_url",
                    priority: 2,
                },
            ],
        },
        Adapter {
            name: "generic",
            priority: 100,
            domains: &[],
            confidence_threshold,
            strategies: vec![
                Strategy::Regex {
                    name: "generic_token_regex",
                    priority: 1,
                    patterns: vec![GENERIC_TOKEN.clone()],
                    post: post_generic,
                },
                Strategy::Scraping {
                    name: "generic_scrape",
                    priority: 2,
                },
                Strategy::Database {
                    name: "generic_s2",
                    priority: 3,
                },
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ends_with_generic_catch_all() {
        let registry = build_registry(0.6);
        let last = registry.last().unwrap();
        assert_eq!(last.name, "generic");
        assert!(last.can_handle("https://unknown.example.org/whatever"));
    }

    #[test]
    fn domain_claims_are_exclusive_enough() {
        let registry = build_registry(0.6);
        let arxiv = registry.iter().find(|a| a.name == "arxiv").unwrap();
        assert!(arxiv.can_handle("https://arxiv.org/abs/1706.03762"));
        assert!(!arxiv.can_handle("https://dl.acm.org/doi/10.1145/1"));
    }

    #[test]
    fn nature_article_id_maps_to_doi() {
        let registry = build_registry(0.6);
        let nature = registry.iter().find(|a| a.name == "nature").unwrap();
        let Strategy::Regex { patterns, post, .. } = &nature.strategies[0] else {
            panic!("first nature strategy must be regex");
        };
        let caps = patterns[0]
            .captures("https://www.nature.com/articles/nature14539")
            .unwrap();
        let mut m = UrlMapping::default();
        post(&caps, "", &mut m);
        assert_eq!(m.doi.as_deref(), Some("10.1038/nature14539"));
    }

    #[test]
    fn generic_post_handles_doi_pdf_paths() {
        let url = "https://publisher.example.org/files/10.1234/abc.def.pdf";
        let caps = GENERIC_TOKEN.captures(url).unwrap();
        let mut m = UrlMapping::default();
        post_generic(&caps, url, &mut m);
        assert_eq!(m.doi.as_deref(), Some("10.1234/abc.def"));
        assert_eq!(m.pdf_url.as_deref(), Some(url));
    }

    #[test]
    fn generic_post_handles_arxiv_urls() {
        let url = "https://arxiv.org/pdf/cs/0701001v1.pdf";
        let caps = GENERIC_TOKEN.captures(url).unwrap();
        let mut m = UrlMapping::default();
        post_generic(&caps, url, &mut m);
        assert_eq!(m.arxiv_id.as_deref(), Some("cs/0701001"));
    }
}
