//! Landing-page scraping: pull `citation_*` and OpenGraph meta tags out of
//! publisher HTML without a DOM parser.

use once_cell::sync::Lazy;
use regex::Regex;

/// `<meta name="..." content="...">` in either attribute order, `name=` or
/// `property=`.
static META_FORWARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]*(?:name|property)\s*=\s*["']?([a-z0-9_:.-]+)["']?[^>]*content\s*=\s*["']([^"']*)["']"#,
    )
    .unwrap()
});

static META_REVERSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]*content\s*=\s*["']([^"']*)["'][^>]*(?:name|property)\s*=\s*["']?([a-z0-9_:.-]+)["']?"#,
    )
    .unwrap()
});

/// Meta tags relevant to identification, in extraction order.
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    pub citation_doi: Option<String>,
    pub citation_pdf_url: Option<String>,
    pub citation_arxiv_id: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub journal: Option<String>,
    pub abstract_text: Option<String>,
}

impl PageMeta {
    pub fn is_empty(&self) -> bool {
        self.citation_doi.is_none()
            && self.citation_pdf_url.is_none()
            && self.citation_arxiv_id.is_none()
            && self.title.is_none()
    }
}

/// Extract identification meta tags from raw HTML.
pub fn extract_page_meta(html: &str) -> PageMeta {
    let mut meta = PageMeta::default();

    let mut visit = |name: &str, content: &str| {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        match name.to_ascii_lowercase().as_str() {
            "citation_doi" | "dc.identifier.doi" => {
                meta.citation_doi
                    .get_or_insert_with(|| citegraph_common::ident::normalize_doi(content));
            }
            "citation_pdf_url" => {
                meta.citation_pdf_url.get_or_insert_with(|| content.to_string());
            }
            "citation_arxiv_id" => {
                meta.citation_arxiv_id
                    .get_or_insert_with(|| citegraph_common::ident::normalize_arxiv_id(content));
            }
            "citation_title" => {
                meta.title.get_or_insert_with(|| content.to_string());
            }
            "og:title" => {
                if meta.title.is_none() {
                    meta.title = Some(content.to_string());
                }
            }
            "citation_author" => meta.authors.push(content.to_string()),
            "citation_publication_date" | "citation_date" | "citation_online_date" => {
                if meta.year.is_none() {
                    meta.year = content.get(..4).and_then(|y| y.parse().ok());
                }
            }
            "citation_journal_title" | "citation_conference_title" => {
                meta.journal.get_or_insert_with(|| content.to_string());
            }
            "citation_abstract" | "og:description" => {
                if meta.abstract_text.is_none() {
                    meta.abstract_text = Some(content.to_string());
                }
            }
            _ => {}
        }
    };

    for caps in META_FORWARD.captures_iter(html) {
        visit(&caps[1], &caps[2]);
    }
    for caps in META_REVERSED.captures_iter(html) {
        visit(&caps[2], &caps[1]);
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"<html><head>
        <meta name="citation_title" content="Attention Is All You Need">
        <meta name="citation_author" content="Vaswani, Ashish">
        <meta name="citation_author" content="Shazeer, Noam">
        <meta name="citation_doi" content="10.5555/3295222.3295349">
        <meta name="citation_pdf_url" content="https://papers.example.org/attention.pdf">
        <meta name="citation_publication_date" content="2017/12/04">
        <meta content="NeurIPS" name="citation_conference_title">
        <meta property="og:title" content="Attention Is All You Need | Proceedings">
    </head><body></body></html>"#;

    #[test]
    fn citation_tags_are_extracted() {
        let meta = extract_page_meta(SAMPLE_HTML);
        assert_eq!(meta.citation_doi.as_deref(), Some("10.5555/3295222.3295349"));
        assert_eq!(
            meta.citation_pdf_url.as_deref(),
            Some("https://papers.example.org/attention.pdf")
        );
        assert_eq!(meta.title.as_deref(), Some("Attention Is All You Need"));
        assert_eq!(meta.authors.len(), 2);
        assert_eq!(meta.year, Some(2017));
        // Reversed attribute order is still picked up.
        assert_eq!(meta.journal.as_deref(), Some("NeurIPS"));
    }

    #[test]
    fn og_title_is_fallback_only() {
        let html = r#"<meta property="og:title" content="Some Landing Page">"#;
        let meta = extract_page_meta(html);
        assert_eq!(meta.title.as_deref(), Some("Some Landing Page"));
        assert!(meta.is_empty() == false);
    }

    #[test]
    fn empty_html_yields_nothing() {
        assert!(extract_page_meta("<html></html>").is_empty());
    }
}
