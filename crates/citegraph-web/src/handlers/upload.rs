//! Object-store upload surface: validated issuance of time-bound write URLs.
//!
//! The store itself is external; this endpoint only validates the request
//! and derives the presigned PUT target. Rejections: path traversal,
//! reserved device names, dangerous extensions, non-PDF MIME types, and
//! oversize declarations.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use citegraph_common::{CitegraphError, ErrorKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

const MAX_FILENAME_LEN: usize = 255;
const ALLOWED_MIME_TYPES: &[&str] = &["application/pdf"];
const DANGEROUS_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/', '\0'];

static RESERVED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])(\.|$)").unwrap());
static DANGEROUS_EXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(exe|bat|cmd|com|pif|scr|vbs|js|jar|sh|php|asp|aspx|jsp|py|pl|rb|ps1)(\.|$)")
        .unwrap()
});

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadGrant {
    /// Time-bound PUT target on the object store.
    pub upload_url: String,
    /// Stable HTTPS URL the stored object will be readable at.
    pub public_url: String,
    pub expires_at: String,
}

/// `POST /api/uploads`
#[instrument(skip(state, request))]
pub async fn issue_upload_url(
    State(state): State<SharedState>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<Json<UploadGrant>> {
    validate_filename(&request.filename).map_err(invalid)?;

    if !ALLOWED_MIME_TYPES.contains(&request.content_type.as_str()) {
        return Err(invalid(format!(
            "content type {:?} is not allowed; only application/pdf",
            request.content_type
        )));
    }
    if request.size == 0 {
        return Err(invalid("size must be greater than zero".to_string()));
    }
    let cap = state.settings().pdf_max_bytes as u64;
    if request.size > cap {
        return Err(ApiError(CitegraphError::domain(
            ErrorKind::TooLarge,
            format!("declared size {} exceeds the {cap}-byte cap", request.size),
        )));
    }

    let base = state
        .settings()
        .object_store_base_url
        .clone()
        .ok_or_else(|| {
            ApiError(CitegraphError::domain(
                ErrorKind::Internal,
                "object store is not configured",
            ))
        })?;

    let key = format!("uploads/{}/{}", Uuid::new_v4(), request.filename);
    let expires_at = Utc::now() + state.settings().upload_url_ttl;
    let expires = expires_at.timestamp();

    Ok(Json(UploadGrant {
        upload_url: format!("{base}/{key}?expires={expires}&sig=presigned"),
        public_url: format!("{base}/{key}"),
        expires_at: expires_at.to_rfc3339(),
    }))
}

fn invalid(message: String) -> ApiError {
    ApiError(CitegraphError::domain(ErrorKind::InvalidInput, message))
}

/// Filename rules: PDF only, no traversal, no separators, no reserved or
/// double-extension tricks.
pub fn validate_filename(filename: &str) -> Result<(), String> {
    let name = filename.trim();
    if name.is_empty() {
        return Err("filename must not be empty".to_string());
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(format!("filename exceeds {MAX_FILENAME_LEN} characters"));
    }
    if name.starts_with('.') {
        return Err("hidden filenames are not allowed".to_string());
    }
    if name.contains("..") {
        return Err("path traversal sequences are not allowed".to_string());
    }
    if let Some(c) = name.chars().find(|c| DANGEROUS_CHARS.contains(c)) {
        return Err(format!("filename contains forbidden character {c:?}"));
    }
    if RESERVED_NAME.is_match(name) {
        return Err("reserved device names are not allowed".to_string());
    }
    if DANGEROUS_EXT.is_match(name) {
        return Err("executable extensions are not allowed".to_string());
    }
    if !name.to_lowercase().ends_with(".pdf") {
        return Err("only .pdf files are accepted".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pdf_names_pass() {
        assert!(validate_filename("attention-is-all-you-need.pdf").is_ok());
        assert!(validate_filename("Paper (final) v2.pdf").is_ok());
    }

    #[test]
    fn traversal_and_separators_are_rejected() {
        assert!(validate_filename("../../etc/passwd.pdf").is_err());
        assert!(validate_filename("dir/paper.pdf").is_err());
        assert!(validate_filename("dir\\paper.pdf").is_err());
    }

    #[test]
    fn reserved_names_are_rejected() {
        assert!(validate_filename("CON.pdf").is_err());
        assert!(validate_filename("lpt1.pdf").is_err());
    }

    #[test]
    fn double_extensions_are_rejected() {
        assert!(validate_filename("paper.exe.pdf").is_err());
        assert!(validate_filename("paper.sh.pdf").is_err());
    }

    #[test]
    fn non_pdf_extensions_are_rejected() {
        assert!(validate_filename("paper.docx").is_err());
        assert!(validate_filename("paper").is_err());
    }

    #[test]
    fn hidden_and_oversized_names_are_rejected() {
        assert!(validate_filename(".hidden.pdf").is_err());
        let long = format!("{}.pdf", "a".repeat(300));
        assert!(validate_filename(&long).is_err());
    }
}
