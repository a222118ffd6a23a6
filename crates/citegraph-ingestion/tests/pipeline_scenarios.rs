//! End-to-end ingestion scenarios against live external APIs.
//!
//! These exercise the full pipeline (URL mapping, metadata/content
//! waterfalls, dedup, linking) with the in-memory graph store, so they need
//! network access but no database. Run with:
//!
//! ```bash
//! cargo test --package citegraph-ingestion --test pipeline_scenarios -- --ignored --nocapture
//! ```

use std::sync::Arc;
use std::time::Duration;

use citegraph_common::entities::SubmissionSource;
use citegraph_common::http::RequestBroker;
use citegraph_common::Settings;
use citegraph_graph::{GraphRepository, MemoryGraphStore};
use citegraph_ingestion::coordinator::{PipelineServices, SubmitOutcome, TaskCoordinator};
use citegraph_ingestion::content::ContentFetcher;
use citegraph_ingestion::dedup::DedupEngine;
use citegraph_ingestion::linker::CitationLinker;
use citegraph_ingestion::matching::MatchThresholds;
use citegraph_ingestion::metadata::MetadataFetcher;
use citegraph_ingestion::references::ReferencesFetcher;
use citegraph_ingestion::store::TaskRegistry;
use citegraph_ingestion::task::{ExecutionStatus, ResultType};
use citegraph_sources::arxiv::ArxivClient;
use citegraph_sources::crossref::CrossRefClient;
use citegraph_sources::grobid::GrobidClient;
use citegraph_sources::semantic_scholar::SemanticScholarClient;
use citegraph_sources::unpaywall::UnpaywallClient;
use citegraph_urlmap::UrlMappingService;

fn build_services(graph: Arc<MemoryGraphStore>) -> Arc<PipelineServices> {
    let settings = Settings::from_env();
    let broker = Arc::new(RequestBroker::new(&settings).unwrap());

    let crossref = Arc::new(CrossRefClient::new(broker.clone(), &settings));
    let arxiv = Arc::new(ArxivClient::new(broker.clone(), &settings));
    let semantic_scholar = Arc::new(SemanticScholarClient::new(broker.clone(), &settings));
    let grobid = Arc::new(GrobidClient::new(broker.clone(), &settings));
    let unpaywall = Arc::new(UnpaywallClient::new(broker.clone(), &settings));

    let registry = Arc::new(TaskRegistry::new(
        settings.task_result_ttl,
        settings.inflight_staleness,
    ));
    let graph_dyn: Arc<dyn GraphRepository> = graph;

    Arc::new(PipelineServices {
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
        dedup: Arc::new(DedupEngine::new(graph_dyn.clone(), registry.clone())),
        linker: Arc::new(CitationLinker::new(
            graph_dyn.clone(),
            MatchThresholds::default(),
            settings.per_task_concurrency,
        )),
        graph: graph_dyn,
        registry,
        settings,
    })
}

async fn wait_for_terminal(
    services: &Arc<PipelineServices>,
    task_id: &str,
    timeout: Duration,
) -> ExecutionStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(snapshot) = services.registry.get(task_id) {
            if snapshot.execution_status.is_terminal() {
                return snapshot.execution_status;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task {task_id} did not finish within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Needs network access to arXiv and Semantic Scholar.
async fn arxiv_fast_path_creates_literature_with_citations() {
    let graph = Arc::new(MemoryGraphStore::new());
    let services = build_services(graph.clone());
    let coordinator = TaskCoordinator::start(services.clone());

    let outcome = coordinator
        .submit(SubmissionSource {
            url: Some("https://arxiv.org/abs/1706.03762".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let SubmitOutcome::Accepted { task_id } = outcome else {
        panic!("expected a new task, got {outcome:?}");
    };

    let status = wait_for_terminal(&services, &task_id, Duration::from_secs(120)).await;
    assert_eq!(status, ExecutionStatus::Completed);

    let snapshot = services.registry.get(&task_id).unwrap();
    assert_eq!(snapshot.result_type, Some(ResultType::Created));

    let lid = snapshot.literature_id.unwrap();
    assert!(lid.starts_with("2017-vaswani-"), "unexpected lid {lid}");

    let record = services.graph.get_literature(&lid).await.unwrap().unwrap();
    assert_eq!(record.identifiers.arxiv_id.as_deref(), Some("1706.03762"));
    assert!(
        !graph.citation_pairs().is_empty(),
        "expected at least one CITES edge"
    );
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Needs network access; run after the fast-path scenario semantics.
async fn doi_resubmission_reports_duplicate_with_same_lid() {
    let graph = Arc::new(MemoryGraphStore::new());
    let services = build_services(graph.clone());
    let coordinator = TaskCoordinator::start(services.clone());

    let first = coordinator
        .submit(SubmissionSource {
            url: Some("https://arxiv.org/abs/1706.03762".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let SubmitOutcome::Accepted { task_id } = first else {
        panic!("expected a task");
    };
    wait_for_terminal(&services, &task_id, Duration::from_secs(120)).await;
    let lid = services.registry.get(&task_id).unwrap().literature_id.unwrap();

    // Cross-identifier resubmission by DOI.
    let second = coordinator
        .submit(SubmissionSource {
            doi: Some("10.48550/arXiv.1706.03762".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    match second {
        SubmitOutcome::Existing { lid: dup } => assert_eq!(dup, lid),
        SubmitOutcome::Accepted { task_id } => {
            wait_for_terminal(&services, &task_id, Duration::from_secs(120)).await;
            let snapshot = services.registry.get(&task_id).unwrap();
            assert_eq!(snapshot.result_type, Some(ResultType::Duplicate));
            assert_eq!(snapshot.literature_id.as_deref(), Some(lid.as_str()));
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Needs network access.
async fn concurrent_same_doi_submissions_create_exactly_one() {
    let graph = Arc::new(MemoryGraphStore::new());
    let services = build_services(graph.clone());
    let coordinator = TaskCoordinator::start(services.clone());

    let mut task_ids = Vec::new();
    for _ in 0..5 {
        let outcome = coordinator
            .submit(SubmissionSource {
                doi: Some("10.48550/arXiv.1706.03762".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        if let SubmitOutcome::Accepted { task_id } = outcome {
            task_ids.push(task_id);
        }
    }

    let mut created = 0usize;
    let mut lids = std::collections::HashSet::new();
    for task_id in &task_ids {
        wait_for_terminal(&services, task_id, Duration::from_secs(180)).await;
        let snapshot = services.registry.get(task_id).unwrap();
        if snapshot.result_type == Some(ResultType::Created) {
            created += 1;
        }
        if let Some(lid) = snapshot.literature_id {
            if !lid.starts_with("pending-") {
                lids.insert(lid);
            }
        }
    }

    assert_eq!(created, 1, "exactly one task may create the record");
    assert!(lids.len() <= 1, "all tasks must converge on one lid: {lids:?}");
}
