//! Outbound HTTP broker with per-destination policy.
//!
//! Internal destinations (PDF parser, graph, object store) get short
//! timeouts, no proxy, and fail fast. External destinations (publisher APIs,
//! PDF hosts) get the configured proxy, longer timeouts, exponential backoff
//! on retryable failures, and an SSRF guard that refuses requests resolving
//! to loopback, private, or link-local addresses.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::config::Settings;
use crate::error::ErrorKind;

/// Destination class selecting the outbound policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestClass {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    Network,
    Timeout,
    HttpStatus(u16),
    Dns,
    Tls,
    BlockedSsrf,
}

impl RequestErrorKind {
    pub fn domain_kind(&self) -> ErrorKind {
        match self {
            RequestErrorKind::Network | RequestErrorKind::Dns | RequestErrorKind::Tls => {
                ErrorKind::Network
            }
            RequestErrorKind::Timeout => ErrorKind::Timeout,
            RequestErrorKind::HttpStatus(404) => ErrorKind::NotFound,
            RequestErrorKind::HttpStatus(s) if *s >= 500 => ErrorKind::ProviderUnavailable,
            RequestErrorKind::HttpStatus(_) => ErrorKind::Network,
            RequestErrorKind::BlockedSsrf => ErrorKind::SsrfBlocked,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub message: String,
}

impl RequestError {
    fn new(kind: RequestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self.kind {
            RequestErrorKind::HttpStatus(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            RequestErrorKind::Timeout
        } else if e.is_connect() {
            RequestErrorKind::Network
        } else {
            RequestErrorKind::Network
        };
        Self::new(kind, e.to_string())
    }
}

/// Uniform outbound HTTP entry point. One pooled client per destination
/// class; all request policy lives here rather than in the callers.
#[derive(Debug, Clone)]
pub struct RequestBroker {
    internal: Client,
    external: Client,
    max_retries: u32,
}

impl RequestBroker {
    pub fn new(settings: &Settings) -> Result<Self, RequestError> {
        let internal = ClientBuilder::new()
            .timeout(settings.internal_timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(RequestError::from_reqwest)?;

        let mut external_builder = ClientBuilder::new()
            .timeout(settings.external_timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .user_agent("citegraph/0.2 (literature resolver)");
        if let Some(ref proxy) = settings.external_proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| RequestError::new(RequestErrorKind::Network, e.to_string()))?;
            external_builder = external_builder.proxy(proxy);
        }
        let external = external_builder
            .build()
            .map_err(RequestError::from_reqwest)?;

        Ok(Self {
            internal,
            external,
            max_retries: settings.max_retries,
        })
    }

    /// Issue a request under the destination's policy. External requests are
    /// SSRF-guarded and retried with exponential backoff on 408/429/5xx and
    /// connection errors; internal requests fail fast.
    pub async fn request(
        &self,
        dest: DestClass,
        method: Method,
        url: &str,
        headers: Option<HeaderMap>,
        body: Option<Vec<u8>>,
    ) -> Result<Response, RequestError> {
        if dest == DestClass::External {
            guard_external(url).await?;
        }

        let client = match dest {
            DestClass::Internal => &self.internal,
            DestClass::External => &self.external,
        };
        let attempts = match dest {
            DestClass::Internal => 1,
            DestClass::External => self.max_retries.max(1),
        };

        let mut last_err: Option<RequestError> = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = Duration::from_millis(500 * (1u64 << (attempt - 1)));
                debug!(url, attempt, backoff_ms = backoff.as_millis() as u64, "retrying request");
                tokio::time::sleep(backoff).await;
            }

            let mut builder = client.request(method.clone(), url);
            if let Some(ref h) = headers {
                builder = builder.headers(h.clone());
            }
            if let Some(ref b) = body {
                builder = builder.body(b.clone());
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || status.is_redirection() {
                        return Ok(resp);
                    }
                    let err = RequestError::new(
                        RequestErrorKind::HttpStatus(status.as_u16()),
                        format!("{method} {url} returned {status}"),
                    );
                    if !is_retryable_status(status) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => {
                    let err = RequestError::from_reqwest(e);
                    last_err = Some(err);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| RequestError::new(RequestErrorKind::Network, "no attempt made"));
        warn!(url, error = %err, "request exhausted retries");
        Err(err)
    }

    pub async fn get(&self, dest: DestClass, url: &str) -> Result<Response, RequestError> {
        self.request(dest, Method::GET, url, None, None).await
    }

    pub async fn get_with_headers(
        &self,
        dest: DestClass,
        url: &str,
        headers: HeaderMap,
    ) -> Result<Response, RequestError> {
        self.request(dest, Method::GET, url, Some(headers), None)
            .await
    }

    pub async fn post_bytes(
        &self,
        dest: DestClass,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<Response, RequestError> {
        self.request(dest, Method::POST, url, Some(headers), Some(body))
            .await
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Reject external URLs that point at non-public address space, before any
/// connection is attempted. Hostnames are resolved so DNS-based rebinds to
/// private ranges are also refused.
async fn guard_external(raw: &str) -> Result<(), RequestError> {
    let url = Url::parse(raw)
        .map_err(|e| RequestError::new(RequestErrorKind::Network, format!("bad URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(RequestError::new(
                RequestErrorKind::BlockedSsrf,
                format!("scheme {other:?} not allowed for external requests"),
            ));
        }
    }

    let host = url.host().ok_or_else(|| {
        RequestError::new(RequestErrorKind::BlockedSsrf, "URL has no host")
    })?;

    match host {
        Host::Ipv4(ip) => check_public(IpAddr::V4(ip), raw),
        Host::Ipv6(ip) => check_public(IpAddr::V6(ip), raw),
        Host::Domain(domain) => {
            let port = url.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| RequestError::new(RequestErrorKind::Dns, e.to_string()))?;
            for addr in addrs {
                check_public(addr.ip(), raw)?;
            }
            Ok(())
        }
    }
}

fn check_public(ip: IpAddr, url: &str) -> Result<(), RequestError> {
    if is_private_addr(ip) {
        return Err(RequestError::new(
            RequestErrorKind::BlockedSsrf,
            format!("{url} resolves to non-public address {ip}"),
        ));
    }
    Ok(())
}

fn is_private_addr(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // Carrier-grade NAT, 100.64.0.0/10.
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // Unique-local fc00::/7 and link-local fe80::/10.
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().map(|v4| is_private_addr(IpAddr::V4(v4))).unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_flagged() {
        for ip in ["127.0.0.1", "10.0.0.8", "192.168.1.1", "172.16.5.5", "169.254.1.1", "0.0.0.0", "100.64.0.1"] {
            assert!(is_private_addr(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["1.1.1.1", "104.16.0.1", "172.32.0.1"] {
            assert!(!is_private_addr(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn ipv6_private_ranges_are_flagged() {
        for ip in ["::1", "fe80::1", "fc00::1", "::ffff:192.168.0.1"] {
            assert!(is_private_addr(ip.parse().unwrap()), "{ip}");
        }
        assert!(!is_private_addr("2606:4700::1111".parse().unwrap()));
    }

    #[tokio::test]
    async fn literal_private_hosts_are_blocked() {
        let err = guard_external("http://127.0.0.1:8070/api").await.unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::BlockedSsrf);

        let err = guard_external("http://192.168.0.10/paper.pdf").await.unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::BlockedSsrf);
    }

    #[tokio::test]
    async fn non_http_schemes_are_blocked() {
        let err = guard_external("file:///etc/passwd").await.unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::BlockedSsrf);
        let err = guard_external("ftp://198.51.100.1/x").await.unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::BlockedSsrf);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
