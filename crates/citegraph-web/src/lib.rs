//! citegraph-web — HTTP surface over the ingestion pipeline and the graph
//! store: submission, task status and streaming, literature and graph
//! reads, and the upload grant endpoint.

pub mod error;
pub mod handlers;
pub mod router;
pub mod sse;
pub mod state;

use std::sync::Arc;

use citegraph_common::http::RequestBroker;
use citegraph_common::{Result, Settings};
use citegraph_graph::{GraphClient, GraphRepository, Neo4jGraphStore};
use citegraph_ingestion::content::ContentFetcher;
use citegraph_ingestion::dedup::DedupEngine;
use citegraph_ingestion::linker::CitationLinker;
use citegraph_ingestion::matching::MatchThresholds;
use citegraph_ingestion::metadata::MetadataFetcher;
use citegraph_ingestion::references::ReferencesFetcher;
use citegraph_ingestion::{PipelineServices, TaskCoordinator, TaskRegistry};
use citegraph_sources::arxiv::ArxivClient;
use citegraph_sources::crossref::CrossRefClient;
use citegraph_sources::grobid::GrobidClient;
use citegraph_sources::semantic_scholar::SemanticScholarClient;
use citegraph_sources::unpaywall::UnpaywallClient;
use citegraph_urlmap::UrlMappingService;

use crate::state::AppState;

/// Wire every service against the given graph repository. Shared between
/// the binary (Bolt-backed store) and tests (in-memory store).
pub fn build_services(
    settings: Settings,
    graph: Arc<dyn GraphRepository>,
) -> Result<Arc<PipelineServices>> {
    let broker = Arc::new(RequestBroker::new(&settings)?);

    let crossref = Arc::new(CrossRefClient::new(broker.clone(), &settings));
    let arxiv = Arc::new(ArxivClient::new(broker.clone(), &settings));
    let semantic_scholar = Arc::new(SemanticScholarClient::new(broker.clone(), &settings));
    let grobid = Arc::new(GrobidClient::new(broker.clone(), &settings));
    let unpaywall = Arc::new(UnpaywallClient::new(broker.clone(), &settings));

    let registry = Arc::new(TaskRegistry::new(
        settings.task_result_ttl,
        settings.inflight_staleness,
    ));
    let thresholds = MatchThresholds {
        gate: settings.match_gate_threshold,
        accept: settings.match_accept_threshold,
        year_tolerance: settings.match_year_tolerance,
    };

    Ok(Arc::new(PipelineServices {
        urlmap: Arc::new(UrlMappingService::new(
            broker.clone(),
            arxiv.clone(),
            semantic_scholar.clone(),
            &settings,
        )),
        metadata: Arc::new(MetadataFetcher::new(
            crossref.clone(),
            arxiv,
            semantic_scholar.clone(),
            grobid.clone(),
            broker.clone(),
            &settings,
        )),
        content: Arc::new(ContentFetcher::new(broker.clone(), unpaywall, &settings)),
        references: Arc::new(ReferencesFetcher::new(
            crossref,
            semantic_scholar,
            grobid,
            broker,
        )),
        dedup: Arc::new(DedupEngine::new(graph.clone(), registry.clone())),
        linker: Arc::new(CitationLinker::new(
            graph.clone(),
            thresholds,
            settings.per_task_concurrency,
        )),
        graph,
        registry,
        settings,
    }))
}

/// Connect to the graph store, ensure the schema, and start the full stack.
pub async fn bootstrap(settings: Settings) -> Result<state::SharedState> {
    let client = GraphClient::connect(&settings).await?;
    client.ensure_schema().await?;
    let graph: Arc<dyn GraphRepository> = Arc::new(Neo4jGraphStore::new(client));

    let services = build_services(settings, graph)?;
    let coordinator = TaskCoordinator::start(services.clone());
    Ok(Arc::new(AppState::new(services, coordinator)))
}
