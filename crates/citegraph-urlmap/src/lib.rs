//! citegraph-urlmap — URL-to-identifier mapping.
//!
//! A registry of platform adapters, each advertising the domains it handles
//! and an ordered list of extraction strategies (regex, API, scraping,
//! third-party database). The service picks the first adapter that claims a
//! URL, runs its strategies in priority order, and stops at the first
//! mapping whose confidence clears the adapter threshold; otherwise the
//! best-confidence mapping observed wins.

pub mod adapters;
pub mod mapping;
pub mod scrape;
pub mod strategy;

use std::sync::Arc;

use citegraph_common::http::RequestBroker;
use citegraph_common::Settings;
use citegraph_sources::arxiv::ArxivClient;
use citegraph_sources::semantic_scholar::SemanticScholarClient;
use tracing::{debug, info, instrument};

use crate::adapters::{build_registry, Adapter};
use crate::strategy::{run_strategy, StrategyContext};

pub use crate::mapping::UrlMapping;

pub struct UrlMappingService {
    registry: Vec<Adapter>,
    ctx: StrategyContext,
}

impl UrlMappingService {
    pub fn new(
        broker: Arc<RequestBroker>,
        arxiv: Arc<ArxivClient>,
        semantic_scholar: Arc<SemanticScholarClient>,
        settings: &Settings,
    ) -> Self {
        let mut registry = build_registry(settings.mapping_confidence_threshold);
        registry.sort_by_key(|a| a.priority);
        Self {
            registry,
            ctx: StrategyContext {
                broker,
                arxiv,
                semantic_scholar,
            },
        }
    }

    /// Map a URL to canonical identifiers. `None` when no adapter produced
    /// anything useful.
    #[instrument(skip(self))]
    pub async fn resolve(&self, url: &str) -> Option<UrlMapping> {
        let adapter = self.registry.iter().find(|a| a.can_handle(url))?;
        debug!(adapter = adapter.name, url, "adapter selected");

        let mut ordered: Vec<_> = adapter.strategies.iter().collect();
        ordered.sort_by_key(|s| s.priority());

        let mut best: Option<UrlMapping> = None;
        for strategy in ordered {
            let Some(mut mapping) = run_strategy(strategy, url, &self.ctx).await else {
                continue;
            };
            mapping.adapter = adapter.name.to_string();

            if mapping.confidence >= adapter.confidence_threshold && mapping.has_identifiers() {
                info!(
                    adapter = adapter.name,
                    strategy = %mapping.strategy,
                    confidence = mapping.confidence,
                    "URL mapped"
                );
                return Some(mapping);
            }

            // Tie-break by strategy priority, then arrival order: a later
            // strategy only replaces the best on strictly higher confidence.
            match best {
                Some(ref b) if b.confidence >= mapping.confidence => {}
                _ => best = Some(mapping),
            }
        }

        if let Some(ref b) = best {
            info!(
                adapter = adapter.name,
                strategy = %b.strategy,
                confidence = b.confidence,
                "URL mapped below threshold, returning best effort"
            );
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;

    fn service() -> UrlMappingService {
        let settings = Settings::from_env();
        let broker = Arc::new(RequestBroker::new(&settings).unwrap());
        UrlMappingService::new(
            broker.clone(),
            Arc::new(ArxivClient::new(broker.clone(), &settings)),
            Arc::new(SemanticScholarClient::new(broker, &settings)),
            &settings,
        )
    }

    #[tokio::test]
    async fn arxiv_urls_resolve_offline() {
        let svc = service();
        // The regex strategy answers before any network strategy runs.
        for url in [
            "https://arxiv.org/abs/1706.03762",
            "https://arxiv.org/abs/1706.03762v2",
            "https://arxiv.org/pdf/1706.03762v2.pdf",
        ] {
            let m = svc.resolve(url).await.expect(url);
            assert_eq!(m.arxiv_id.as_deref(), Some("1706.03762"), "{url}");
            assert_eq!(m.adapter, "arxiv");
        }
    }

    #[tokio::test]
    async fn old_format_arxiv_ids_resolve() {
        let svc = service();
        let m = svc.resolve("https://arxiv.org/abs/cs/0701001v1").await.unwrap();
        assert_eq!(m.arxiv_id.as_deref(), Some("cs/0701001"));
    }

    #[tokio::test]
    async fn doi_org_urls_resolve_offline() {
        let svc = service();
        let m = svc
            .resolve("https://doi.org/10.1038/nature14539")
            .await
            .unwrap();
        assert_eq!(m.doi.as_deref(), Some("10.1038/nature14539"));
        assert_eq!(m.adapter, "doi_org");
    }

    #[tokio::test]
    async fn acm_pdf_urls_carry_embedded_doi() {
        let svc = service();
        let m = svc
            .resolve("https://dl.acm.org/doi/pdf/10.1145/3292500.3330919")
            .await
            .unwrap();
        assert_eq!(m.doi.as_deref(), Some("10.1145/3292500.3330919"));
    }

    #[tokio::test]
    async fn generic_adapter_parses_doi_in_unknown_pdf_url() {
        let svc = service();
        let m = svc
            .resolve("https://repository.example.org/bitstream/10.5555/12345.pdf")
            .await
            .unwrap();
        assert_eq!(m.adapter, "generic");
        assert_eq!(m.doi.as_deref(), Some("10.5555/12345"));
        assert!(m.pdf_url.is_some());
    }

    #[test]
    fn strategies_are_priority_ordered_per_adapter() {
        let registry = build_registry(0.6);
        for adapter in &registry {
            let priorities: Vec<u8> = adapter.strategies.iter().map(Strategy::priority).collect();
            let mut sorted = priorities.clone();
            sorted.sort_unstable();
            assert_eq!(priorities, sorted, "adapter {}", adapter.name);
        }
    }
}
