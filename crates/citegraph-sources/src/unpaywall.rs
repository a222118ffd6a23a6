//! Unpaywall-style open-access lookup by DOI.

use std::sync::Arc;

use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{ident, Settings};
use serde::Deserialize;
use tracing::instrument;

use crate::{SourceError, SourceResult};

const PROVIDER: &str = "unpaywall";

pub struct UnpaywallClient {
    broker: Arc<RequestBroker>,
    base_url: String,
    email: String,
}

impl UnpaywallClient {
    pub fn new(broker: Arc<RequestBroker>, settings: &Settings) -> Self {
        Self {
            broker,
            base_url: settings.unpaywall_api_base_url.clone(),
            email: settings
                .unpaywall_email
                .clone()
                .unwrap_or_else(|| "citegraph@example.com".to_string()),
        }
    }

    /// Best open-access PDF location for a DOI, if one is known.
    #[instrument(skip(self))]
    pub async fn best_pdf_url(&self, doi: &str) -> SourceResult<Option<String>> {
        let doi = ident::normalize_doi(doi);
        let url = format!("{}/v2/{}?email={}", self.base_url, doi, self.email);
        let resp = match self.broker.get(DestClass::External, &url).await {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(SourceError::from_request(PROVIDER, e)),
        };
        let data: OaResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        Ok(data.best_oa_location.and_then(|loc| loc.url_for_pdf))
    }
}

#[derive(Deserialize)]
struct OaResponse {
    best_oa_location: Option<OaLocation>,
}

#[derive(Deserialize)]
struct OaLocation {
    url_for_pdf: Option<String>,
}
