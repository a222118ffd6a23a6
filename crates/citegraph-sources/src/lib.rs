//! citegraph-sources — Thin typed clients over the external bibliographic
//! services: CrossRef, arXiv, Semantic Scholar, Unpaywall-style OA lookup,
//! and the GROBID TEI PDF parser.
//!
//! Every client is stateless and idempotent, goes through the shared
//! [`RequestBroker`], and maps provider payloads onto the normalized
//! records in `citegraph_common::entities`.

pub mod arxiv;
pub mod crossref;
pub mod grobid;
pub mod semantic_scholar;
pub mod unpaywall;

use citegraph_common::entities::{IdentifierSet, LiteratureMetadata};
use citegraph_common::http::RequestError;
use citegraph_common::ErrorKind;
use thiserror::Error;

/// A normalized record returned by a source lookup: bibliographic metadata
/// plus whatever identifiers and content pointers the provider exposes.
#[derive(Debug, Clone, Default)]
pub struct SourceRecord {
    pub metadata: LiteratureMetadata,
    pub identifiers: IdentifierSet,
    pub pdf_url: Option<String>,
    pub source_page_url: Option<String>,
}

/// Error surfaced by a source client.
#[derive(Debug, Error)]
#[error("{provider}: {kind}: {message}")]
pub struct SourceError {
    pub provider: &'static str,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl SourceError {
    pub fn new(provider: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            retryable: kind.is_retryable(),
            message: message.into(),
        }
    }

    pub fn parse(provider: &'static str, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::ParseFailure, message)
    }

    pub fn from_request(provider: &'static str, err: RequestError) -> Self {
        Self::new(provider, err.kind.domain_kind(), err.to_string())
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Strip the JATS markup CrossRef embeds in abstracts.
pub(crate) fn strip_jats(text: &str) -> String {
    text.replace("<jats:p>", "")
        .replace("</jats:p>", "\n")
        .replace("<jats:italic>", "")
        .replace("</jats:italic>", "")
        .replace("<jats:bold>", "")
        .replace("</jats:bold>", "")
        .replace("<jats:title>", "")
        .replace("</jats:title>", "\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jats_tags_are_stripped() {
        let raw = "<jats:p>Hello <jats:italic>world</jats:italic>.</jats:p>";
        assert_eq!(strip_jats(raw), "Hello world.");
    }

    #[test]
    fn source_error_carries_retryability() {
        let e = SourceError::new("crossref", ErrorKind::Timeout, "deadline exceeded");
        assert!(e.retryable);
        let e = SourceError::new("crossref", ErrorKind::NotFound, "no such DOI");
        assert!(!e.retryable);
    }
}
