//! Identifier normalization and extraction: DOI, arXiv id, source URLs.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static DOI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"10\.\d{4,9}/[^\s\?#]+").unwrap());

/// New-format arXiv id: `YYMM.NNNNN` with optional version.
static ARXIV_NEW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}\.\d{4,5})(v\d+)?$").unwrap());

/// Old-format arXiv id: `archive/NNNNNNN` (e.g. `cs/0701001`) with optional version.
static ARXIV_OLD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z-]+(?:\.[A-Z]{2})?/\d{7})(v\d+)?$").unwrap());

static ARXIV_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)arxiv\.org/(?:abs|pdf|html)/((?:\d{4}\.\d{4,5}|[a-z-]+(?:\.[A-Z]{2})?/\d{7})(?:v\d+)?)(?:\.pdf)?")
        .unwrap()
});

/// DOIs expressed as `doi:`/`https://doi.org/` prefixes reduce to the bare
/// registrant form, lowercased (DOI names are case-insensitive).
pub fn normalize_doi(doi: &str) -> String {
    let mut s = doi.trim();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ] {
        if let Some(rest) = strip_prefix_ignore_case(s, prefix) {
            s = rest;
            break;
        }
    }
    s.trim_end_matches(['.', ',', ';']).to_lowercase()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Find the first DOI embedded in arbitrary text (URL paths included).
pub fn extract_doi(text: &str) -> Option<String> {
    DOI_RE
        .find(text)
        .map(|m| normalize_doi(m.as_str().trim_end_matches(".pdf")))
}

/// Whether the string is a well-formed arXiv id in either format.
pub fn is_arxiv_id(id: &str) -> bool {
    ARXIV_NEW_RE.is_match(id) || ARXIV_OLD_RE.is_match(id)
}

/// Canonical arXiv identity: version suffix stripped, lowercased. Old-format
/// ids (`cs/0701001`) and new-format ids (`1706.03762v2`) both accepted;
/// anything else passes through trimmed.
pub fn normalize_arxiv_id(id: &str) -> String {
    let id = id.trim().trim_end_matches(".pdf");
    let id = id
        .strip_prefix("arXiv:")
        .or_else(|| id.strip_prefix("arxiv:"))
        .unwrap_or(id);
    if let Some(caps) = ARXIV_NEW_RE.captures(id) {
        return caps[1].to_string();
    }
    if let Some(caps) = ARXIV_OLD_RE.captures(id) {
        return caps[1].to_lowercase();
    }
    id.to_string()
}

/// Pull an arXiv id out of an arxiv.org URL (abs, pdf, or html form).
pub fn extract_arxiv_id(url: &str) -> Option<String> {
    ARXIV_URL_RE
        .captures(url)
        .map(|caps| normalize_arxiv_id(&caps[1]))
}

pub fn arxiv_abs_url(arxiv_id: &str) -> String {
    format!("https://arxiv.org/abs/{arxiv_id}")
}

pub fn arxiv_pdf_url(arxiv_id: &str) -> String {
    format!("https://arxiv.org/pdf/{arxiv_id}.pdf")
}

/// Publication year inferred from a new-format arXiv id (`YYMM.NNNNN`).
pub fn arxiv_year(arxiv_id: &str) -> Option<i32> {
    if !ARXIV_NEW_RE.is_match(arxiv_id) {
        return None;
    }
    let yy: i32 = arxiv_id.get(..2)?.parse().ok()?;
    // New-format ids start in 2007; 91-99 would be old format.
    Some(2000 + yy)
}

const TRACKING_PARAMS: &[&str] = &["ref", "source", "fbclid", "gclid"];

/// Normalize a URL for alias comparison: scheme dropped, host lowercased,
/// fragment and tracking params removed, trailing slash trimmed, arXiv pdf
/// variants folded onto the abs page without version suffix.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let Ok(mut url) = Url::parse(&with_scheme) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let q: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&q));
    }

    let host = url.host_str().unwrap_or_default().to_lowercase();

    // Fold arXiv variants onto the canonical abstract page.
    if host == "arxiv.org" || host == "www.arxiv.org" {
        if let Some(id) = extract_arxiv_id(url.as_str()) {
            return format!("arxiv.org/abs/{id}");
        }
    }

    let path = url.path().trim_end_matches('/');
    let mut out = format!("{host}{path}");
    if let Some(q) = url.query() {
        out.push('?');
        out.push_str(q);
    }
    out.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_prefixes_are_stripped() {
        assert_eq!(
            normalize_doi("https://doi.org/10.1038/NATURE14539"),
            "10.1038/nature14539"
        );
        assert_eq!(normalize_doi("doi:10.1/abc."), "10.1/abc");
    }

    #[test]
    fn doi_extracted_from_pdf_path() {
        let url = "https://dl.acm.org/doi/pdf/10.1145/3292500.3330919.pdf";
        assert_eq!(extract_doi(url).as_deref(), Some("10.1145/3292500.3330919"));
    }

    #[test]
    fn arxiv_formats_share_one_identity() {
        assert_eq!(normalize_arxiv_id("1706.03762"), "1706.03762");
        assert_eq!(normalize_arxiv_id("1706.03762v2"), "1706.03762");
        assert_eq!(normalize_arxiv_id("arXiv:1706.03762v5"), "1706.03762");
        assert_eq!(normalize_arxiv_id("cs/0701001"), "cs/0701001");
        assert_eq!(normalize_arxiv_id("cs/0701001v1"), "cs/0701001");
    }

    #[test]
    fn arxiv_id_from_url_variants() {
        for url in [
            "https://arxiv.org/abs/1706.03762",
            "https://arxiv.org/abs/1706.03762v2",
            "https://arxiv.org/pdf/1706.03762.pdf",
            "https://arxiv.org/pdf/1706.03762v2.pdf",
            "http://arxiv.org/html/1706.03762",
        ] {
            assert_eq!(extract_arxiv_id(url).as_deref(), Some("1706.03762"), "{url}");
        }
        assert_eq!(
            extract_arxiv_id("https://arxiv.org/abs/cs/0701001v1").as_deref(),
            Some("cs/0701001")
        );
    }

    #[test]
    fn arxiv_year_from_new_format() {
        assert_eq!(arxiv_year("1706.03762"), Some(2017));
        assert_eq!(arxiv_year("2301.00001"), Some(2023));
        assert_eq!(arxiv_year("cs/0701001"), None);
    }

    #[test]
    fn url_normalization_strips_noise() {
        assert_eq!(
            normalize_url("https://Example.COM/Papers/?utm_source=x&ref=y#frag"),
            "example.com/papers"
        );
        assert_eq!(
            normalize_url("https://example.com/a/b/?page=2&utm_campaign=z"),
            "example.com/a/b?page=2"
        );
    }

    #[test]
    fn url_normalization_folds_arxiv_variants() {
        assert_eq!(
            normalize_url("https://arxiv.org/pdf/1706.03762v2.pdf"),
            "arxiv.org/abs/1706.03762"
        );
        assert_eq!(
            normalize_url("http://arxiv.org/abs/1706.03762"),
            "arxiv.org/abs/1706.03762"
        );
    }
}
