use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-level error classification surfaced to API clients and recorded in
/// task component status. Implementation errors map onto one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    UnsupportedSource,
    SsrfBlocked,
    TooLarge,
    InvalidPdf,
    Network,
    Timeout,
    ProviderUnavailable,
    NotFound,
    ParseFailure,
    Conflict,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UnsupportedSource => "unsupported_source",
            ErrorKind::SsrfBlocked => "ssrf_blocked",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::InvalidPdf => "invalid_pdf",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a component-local retry is worthwhile for this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::ProviderUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CitegraphError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("graph store error: {0}")]
    Graph(#[from] neo4rs::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("outbound request failed: {0}")]
    Request(#[from] crate::http::RequestError),

    #[error("{kind}: {message}")]
    Domain { kind: ErrorKind, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CitegraphError {
    pub fn domain(kind: ErrorKind, message: impl Into<String>) -> Self {
        CitegraphError::Domain {
            kind,
            message: message.into(),
        }
    }

    /// Collapse any error into its domain kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CitegraphError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            CitegraphError::Http(_) => ErrorKind::Network,
            CitegraphError::Graph(_) => ErrorKind::Internal,
            CitegraphError::Serialization(_) => ErrorKind::ParseFailure,
            CitegraphError::Xml(_) => ErrorKind::ParseFailure,
            CitegraphError::Request(e) => e.kind.domain_kind(),
            CitegraphError::Domain { kind, .. } => *kind,
            CitegraphError::Config(_) => ErrorKind::Internal,
            CitegraphError::Other(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CitegraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_snake_case() {
        assert_eq!(ErrorKind::SsrfBlocked.as_str(), "ssrf_blocked");
        assert_eq!(ErrorKind::InvalidPdf.as_str(), "invalid_pdf");
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }

    #[test]
    fn domain_error_reports_kind() {
        let e = CitegraphError::domain(ErrorKind::TooLarge, "PDF exceeds cap");
        assert_eq!(e.kind(), ErrorKind::TooLarge);
        assert_eq!(e.to_string(), "too_large: PDF exceeds cap");
    }
}
