//! PDF acquisition waterfall.
//!
//! Priority: user-supplied PDF URL, object-store URL (internal path),
//! mapping-provided PDF URL, landing-page scrape, open-access lookup by
//! DOI. Every candidate's bytes are validated before being accepted.

use std::sync::Arc;

use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{CitegraphError, ErrorKind, Result, Settings};
use citegraph_sources::unpaywall::UnpaywallClient;
use citegraph_urlmap::scrape::extract_page_meta;
use citegraph_urlmap::UrlMapping;
use tracing::{debug, info, instrument, warn};
use url::Url;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone)]
pub struct FetchedPdf {
    pub bytes: Vec<u8>,
    pub fetched_url: String,
    pub source: &'static str,
}

pub struct ContentFetcher {
    broker: Arc<RequestBroker>,
    unpaywall: Arc<UnpaywallClient>,
    object_store_host: Option<String>,
    max_bytes: usize,
}

impl ContentFetcher {
    pub fn new(
        broker: Arc<RequestBroker>,
        unpaywall: Arc<UnpaywallClient>,
        settings: &Settings,
    ) -> Self {
        Self {
            broker,
            unpaywall,
            object_store_host: settings.object_store_host.clone(),
            max_bytes: settings.pdf_max_bytes,
        }
    }

    /// Run the acquisition waterfall. The first candidate that yields valid
    /// PDF bytes wins; validation failures are remembered and reported if
    /// every candidate is exhausted.
    #[instrument(skip(self, mapping))]
    pub async fn fetch(
        &self,
        user_pdf_url: Option<&str>,
        mapping: Option<&UrlMapping>,
        doi: Option<&str>,
    ) -> Result<FetchedPdf> {
        let mut candidates: Vec<(String, &'static str)> = Vec::new();

        if let Some(url) = user_pdf_url {
            candidates.push((url.to_string(), "user"));
        }
        if let Some(url) = mapping.and_then(|m| m.pdf_url.clone()) {
            candidates.push((url, "mapping"));
        }

        let mut last_error: Option<CitegraphError> = None;

        for (url, source) in &candidates {
            match self.try_fetch(url, source).await {
                Ok(pdf) => return Ok(pdf),
                Err(e) => {
                    debug!(url = %url, source, error = %e, "PDF candidate failed");
                    last_error = Some(e);
                }
            }
        }

        // Derived candidate: scrape the landing page for citation_pdf_url.
        if let Some(page_url) = mapping.and_then(|m| m.source_page_url.as_deref()) {
            match self.derive_from_landing_page(page_url).await {
                Ok(Some(pdf)) => return Ok(pdf),
                Ok(None) => {}
                Err(e) => last_error = Some(e),
            }
        }

        // Open-access fallback by DOI.
        if let Some(doi) = doi {
            match self.unpaywall.best_pdf_url(doi).await {
                Ok(Some(url)) => match self.try_fetch(&url, "open_access").await {
                    Ok(pdf) => return Ok(pdf),
                    Err(e) => last_error = Some(e),
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(doi, error = %e, "open-access lookup failed");
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CitegraphError::domain(ErrorKind::NotFound, "no PDF source available")
        }))
    }

    async fn derive_from_landing_page(&self, page_url: &str) -> Result<Option<FetchedPdf>> {
        let resp = self
            .broker
            .get(DestClass::External, page_url)
            .await
            .map_err(CitegraphError::Request)?;
        let html = resp.text().await.map_err(CitegraphError::Http)?;
        let Some(pdf_url) = extract_page_meta(&html).citation_pdf_url else {
            return Ok(None);
        };
        debug!(page_url, pdf_url = %pdf_url, "derived PDF URL from landing page");
        self.try_fetch(&pdf_url, "landing_page").await.map(Some)
    }

    async fn try_fetch(&self, url: &str, source: &'static str) -> Result<FetchedPdf> {
        let dest = if self.is_object_store_url(url) {
            DestClass::Internal
        } else {
            DestClass::External
        };
        let resp = self
            .broker
            .get(dest, url)
            .await
            .map_err(CitegraphError::Request)?;

        if let Some(len) = resp.content_length() {
            if len as usize > self.max_bytes {
                return Err(CitegraphError::domain(
                    ErrorKind::TooLarge,
                    format!("PDF is {len} bytes, cap is {}", self.max_bytes),
                ));
            }
        }

        let bytes = resp.bytes().await.map_err(CitegraphError::Http)?.to_vec();
        self.validate(&bytes)?;

        info!(url, source, bytes = bytes.len(), "PDF fetched");
        Ok(FetchedPdf {
            bytes,
            fetched_url: url.to_string(),
            source,
        })
    }

    fn is_object_store_url(&self, url: &str) -> bool {
        let Some(ref host) = self.object_store_host else {
            return false;
        };
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
            .unwrap_or(false)
    }

    /// PDF magic bytes and the configured size cap.
    pub fn validate(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.max_bytes {
            return Err(CitegraphError::domain(
                ErrorKind::TooLarge,
                format!("PDF is {} bytes, cap is {}", bytes.len(), self.max_bytes),
            ));
        }
        if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
            return Err(CitegraphError::domain(
                ErrorKind::InvalidPdf,
                "response does not start with %PDF-",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher_with_cap(max_bytes: usize) -> ContentFetcher {
        let mut settings = Settings::from_env();
        settings.pdf_max_bytes = max_bytes;
        settings.object_store_host = Some("files.internal.example".to_string());
        let broker = Arc::new(RequestBroker::new(&settings).unwrap());
        ContentFetcher::new(
            broker.clone(),
            Arc::new(UnpaywallClient::new(broker, &settings)),
            &settings,
        )
    }

    #[test]
    fn valid_pdf_bytes_pass() {
        let f = fetcher_with_cap(1024);
        assert!(f.validate(b"%PDF-1.7 rest of file").is_ok());
    }

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let f = fetcher_with_cap(1024);
        let err = f.validate(b"<html>not a pdf</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPdf);
    }

    #[test]
    fn oversize_bytes_are_rejected() {
        let f = fetcher_with_cap(8);
        let err = f.validate(b"%PDF-1.7 too big for cap").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooLarge);
    }

    #[test]
    fn object_store_urls_are_recognized_by_host() {
        let f = fetcher_with_cap(1024);
        assert!(f.is_object_store_url("https://files.internal.example/bucket/x.pdf"));
        assert!(!f.is_object_store_url("https://publisher.example.org/x.pdf"));
    }
}
