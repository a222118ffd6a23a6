//! Application settings, loaded from `CITEGRAPH_*` environment variables.

use std::time::Duration;

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Process-wide configuration. Every field has a usable default so the
/// service starts against a local stack with no environment set.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address for the web server.
    pub host: String,
    pub port: u16,

    // Graph store (Bolt)
    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: String,

    // External service endpoints
    pub grobid_base_url: String,
    pub crossref_api_base_url: String,
    pub semantic_scholar_api_base_url: String,
    pub unpaywall_api_base_url: String,
    pub arxiv_api_base_url: String,

    // Credentials / politeness
    pub crossref_mailto: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    pub unpaywall_email: Option<String>,

    // Outbound HTTP policy
    pub external_proxy: Option<String>,
    pub internal_timeout: Duration,
    pub external_timeout: Duration,
    pub max_retries: u32,

    // Object store surface
    pub object_store_host: Option<String>,
    pub object_store_base_url: Option<String>,
    pub upload_url_ttl: Duration,

    // Task execution
    pub worker_count: usize,
    pub per_task_concurrency: usize,
    pub task_result_ttl: Duration,
    pub task_hard_timeout: Duration,
    pub task_soft_timeout: Duration,

    // Content limits
    pub pdf_max_bytes: usize,

    // Deduplication / linking
    pub inflight_staleness: Duration,
    pub match_gate_threshold: f64,
    pub match_accept_threshold: f64,
    pub match_year_tolerance: i32,
    pub mapping_confidence_threshold: f64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            host: env_str("CITEGRAPH_HOST", "127.0.0.1"),
            port: env_parse("CITEGRAPH_PORT", 8000),

            graph_uri: env_str("CITEGRAPH_GRAPH_URI", "127.0.0.1:7687"),
            graph_user: env_str("CITEGRAPH_GRAPH_USER", "neo4j"),
            graph_password: env_str("CITEGRAPH_GRAPH_PASSWORD", "neo4j"),

            grobid_base_url: env_str("CITEGRAPH_GROBID_URL", "http://localhost:8070"),
            crossref_api_base_url: env_str(
                "CITEGRAPH_CROSSREF_URL",
                "https://api.crossref.org",
            ),
            semantic_scholar_api_base_url: env_str(
                "CITEGRAPH_S2_URL",
                "https://api.semanticscholar.org",
            ),
            unpaywall_api_base_url: env_str(
                "CITEGRAPH_UNPAYWALL_URL",
                "https://api.unpaywall.org",
            ),
            arxiv_api_base_url: env_str("CITEGRAPH_ARXIV_URL", "https://export.arxiv.org"),

            crossref_mailto: env_opt("CITEGRAPH_CROSSREF_MAILTO"),
            semantic_scholar_api_key: env_opt("CITEGRAPH_S2_API_KEY"),
            unpaywall_email: env_opt("CITEGRAPH_UNPAYWALL_EMAIL"),

            external_proxy: env_opt("CITEGRAPH_EXTERNAL_PROXY"),
            internal_timeout: Duration::from_secs(env_parse("CITEGRAPH_INTERNAL_TIMEOUT_SECS", 10)),
            external_timeout: Duration::from_secs(env_parse("CITEGRAPH_EXTERNAL_TIMEOUT_SECS", 30)),
            max_retries: env_parse("CITEGRAPH_MAX_RETRIES", 3),

            object_store_host: env_opt("CITEGRAPH_OBJECT_STORE_HOST"),
            object_store_base_url: env_opt("CITEGRAPH_OBJECT_STORE_URL"),
            upload_url_ttl: Duration::from_secs(env_parse("CITEGRAPH_UPLOAD_URL_TTL_SECS", 900)),

            worker_count: env_parse("CITEGRAPH_WORKERS", 4),
            per_task_concurrency: env_parse("CITEGRAPH_TASK_CONCURRENCY", 3),
            task_result_ttl: Duration::from_secs(env_parse("CITEGRAPH_TASK_TTL_SECS", 3600)),
            task_hard_timeout: Duration::from_secs(env_parse(
                "CITEGRAPH_TASK_HARD_TIMEOUT_SECS",
                30 * 60,
            )),
            task_soft_timeout: Duration::from_secs(env_parse(
                "CITEGRAPH_TASK_SOFT_TIMEOUT_SECS",
                25 * 60,
            )),

            pdf_max_bytes: env_parse("CITEGRAPH_PDF_MAX_BYTES", 50 * 1024 * 1024),

            inflight_staleness: Duration::from_secs(env_parse(
                "CITEGRAPH_INFLIGHT_STALENESS_SECS",
                30 * 60,
            )),
            match_gate_threshold: env_parse("CITEGRAPH_MATCH_GATE", 0.4),
            match_accept_threshold: env_parse("CITEGRAPH_MATCH_ACCEPT", 0.6),
            match_year_tolerance: env_parse("CITEGRAPH_MATCH_YEAR_TOLERANCE", 1),
            mapping_confidence_threshold: env_parse("CITEGRAPH_MAPPING_CONFIDENCE", 0.6),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::from_env();
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.worker_count, 4);
        assert_eq!(s.pdf_max_bytes, 50 * 1024 * 1024);
        assert_eq!(s.task_hard_timeout, Duration::from_secs(1800));
        assert!(s.match_gate_threshold < s.match_accept_threshold);
    }
}
