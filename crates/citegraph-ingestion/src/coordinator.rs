//! Task coordination: submission intake, the worker pool, and the per-task
//! ingestion plan.
//!
//! Plan per task: URL mapping, pre-metadata dedup, placeholder creation,
//! metadata and content in parallel, post-metadata fingerprint dedup,
//! references, persistence, citation linking, finalize. Cancellation is
//! cooperative: the cancel flag is checked between steps, never mid-request.

use std::sync::Arc;
use std::time::Duration;

use citegraph_common::entities::{
    ContentRecord, IdentifierSet, SubmissionSource,
};
use citegraph_common::{ident, CitegraphError, ErrorKind, Result, Settings};
use citegraph_graph::{AliasType, GraphRepository, LiteratureCandidate};
use citegraph_urlmap::{UrlMapping, UrlMappingService};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::content::{ContentFetcher, FetchedPdf};
use crate::dedup::{effective_identifiers, DedupEngine, DedupOutcome};
use crate::fingerprint::{pdf_fingerprint, title_fingerprint};
use crate::lid::generate_lid;
use crate::linker::CitationLinker;
use crate::metadata::{next_action_hint, MetadataFetcher, MetadataOutcome};
use crate::references::{ReferencesFetcher, ReferencesOutcome};
use crate::store::TaskRegistry;
use crate::task::{
    ComponentState, ErrorInfo, ExecutionStatus, ResultType, TaskEventKind, TaskSnapshot,
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything a worker needs, wired once at startup and injected.
pub struct PipelineServices {
    pub settings: Settings,
    pub graph: Arc<dyn GraphRepository>,
    pub registry: Arc<TaskRegistry>,
    pub urlmap: Arc<UrlMappingService>,
    pub metadata: Arc<MetadataFetcher>,
    pub content: Arc<ContentFetcher>,
    pub references: Arc<ReferencesFetcher>,
    pub dedup: Arc<DedupEngine>,
    pub linker: Arc<CitationLinker>,
}

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Already resolved; no task needed.
    Existing { lid: String },
    /// Queued for ingestion.
    Accepted { task_id: String },
}

struct QueuedTask {
    task_id: String,
    source: SubmissionSource,
}

/// Owns the worker pool and the submission queue.
pub struct TaskCoordinator {
    services: Arc<PipelineServices>,
    queue_tx: async_channel::Sender<QueuedTask>,
}

impl TaskCoordinator {
    /// Spawn the worker pool and the registry sweeper.
    pub fn start(services: Arc<PipelineServices>) -> Arc<Self> {
        let workers = services.settings.worker_count.max(1);
        // Prefetch of 2 per worker; senders block when the backlog is full.
        let (queue_tx, queue_rx) = async_channel::bounded::<QueuedTask>(workers * 2);

        for worker_id in 0..workers {
            let rx = queue_rx.clone();
            let services = services.clone();
            tokio::spawn(worker_loop(worker_id, rx, services));
        }

        let registry = services.registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = registry.sweep_expired();
                if removed > 0 {
                    debug!(removed, "expired task results swept");
                }
            }
        });

        info!(workers, "task coordinator started");
        Arc::new(Self { services, queue_tx })
    }

    /// Submit a source. Checks supplied identifiers against the alias index
    /// first; anything unresolved becomes an asynchronous task.
    #[instrument(skip(self, source))]
    pub async fn submit(&self, source: SubmissionSource) -> Result<SubmitOutcome> {
        if !source.has_any_handle() {
            return Err(CitegraphError::domain(
                ErrorKind::InvalidInput,
                "at least one identifier, URL, or title must be provided",
            ));
        }

        // Fast path: phase-1 dedup on explicitly supplied identifiers only.
        for (alias_type, value) in [
            (
                AliasType::Doi,
                source.doi.as_deref().map(ident::normalize_doi),
            ),
            (
                AliasType::Arxiv,
                source.arxiv_id.as_deref().map(ident::normalize_arxiv_id),
            ),
            (AliasType::Pmid, source.pmid.clone()),
        ] {
            let Some(value) = value else { continue };
            if let Some(lid) = self.services.graph.resolve_alias(alias_type, &value).await? {
                if let Some(record) = self.services.graph.get_literature(&lid).await? {
                    let parsed_ok = !record.placeholder
                        && record.task_status() != Some("failed")
                        && !record.metadata.title.trim().is_empty();
                    if parsed_ok {
                        info!(lid = %lid, "submission resolved immediately");
                        return Ok(SubmitOutcome::Existing { lid });
                    }
                }
            }
        }

        let (task_id, _cancel) = self.services.registry.create(source.clone());
        self.services
            .registry
            .update(&task_id, TaskEventKind::Status, |s| {
                s.current_stage = "Queued".to_string();
            });

        self.queue_tx
            .send(QueuedTask {
                task_id: task_id.clone(),
                source,
            })
            .await
            .map_err(|_| {
                CitegraphError::domain(ErrorKind::Internal, "worker queue is closed")
            })?;

        info!(task_id = %task_id, "ingestion task queued");
        Ok(SubmitOutcome::Accepted { task_id })
    }

    /// Cooperative cancellation; returns false for unknown/terminal tasks.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.services.registry.request_cancel(task_id)
    }
}

// ── Worker ─────────────────────────────────────────────────────────────────

async fn worker_loop(
    worker_id: usize,
    rx: async_channel::Receiver<QueuedTask>,
    services: Arc<PipelineServices>,
) {
    while let Ok(job) = Box::pin(rx.recv()).await {
        let task_id = job.task_id.clone();
        debug!(worker_id, task_id = %task_id, "task picked up");

        let Some(cancel) = services.registry.cancel_token(&task_id) else {
            warn!(task_id = %task_id, "task vanished before execution");
            continue;
        };

        let soft = services.settings.task_soft_timeout;
        let hard = services.settings.task_hard_timeout;

        // Soft-timeout watchdog: a warning event, not a state change.
        let watchdog_registry = services.registry.clone();
        let watchdog_id = task_id.clone();
        let watchdog_cancel = cancel.clone();
        let watchdog = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(soft) => {
                    watchdog_registry.update(&watchdog_id, TaskEventKind::Error, |s| {
                        s.error_info = Some(ErrorInfo::new(
                            ErrorKind::Timeout,
                            "task is approaching its execution deadline",
                        ));
                    });
                }
                _ = watchdog_cancel.cancelled() => {}
            }
        });

        let run = run_task(services.clone(), task_id.clone(), job.source, cancel.clone());
        match tokio::time::timeout(hard, run).await {
            Ok(()) => {}
            Err(_) => {
                warn!(task_id = %task_id, "task exceeded hard timeout");
                fail_task(
                    services.clone(),
                    task_id.clone(),
                    ErrorInfo::new(ErrorKind::Timeout, "task exceeded its execution deadline"),
                )
                .await;
            }
        }
        watchdog.abort();
    }
    debug!(worker_id, "worker loop exited");
}

/// One complete ingestion plan. Never returns an error: every failure path
/// records its outcome on the task.
async fn run_task(
    services: Arc<PipelineServices>,
    task_id: String,
    source: SubmissionSource,
    cancel: CancellationToken,
) {
    let task_id = task_id.as_str();
    services.registry.update(task_id, TaskEventKind::Status, |s| {
        s.transition(ExecutionStatus::Processing);
        s.current_stage = "Resolving source".to_string();
    });

    let plan: std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<(), PlanEnd>> + Send + '_>> =
        Box::pin(execute_plan(&services, task_id, &source, &cancel));
    match plan.await {
        Ok(()) => {}
        Err(PlanEnd::Cancelled) => {
            info!(task_id, "task cancelled");
            services
                .registry
                .update(task_id, TaskEventKind::Failed, |s| {
                    s.transition(ExecutionStatus::Cancelled);
                });
        }
        Err(PlanEnd::Failed(error_info)) => {
            fail_task(services, task_id.to_string(), error_info).await;
        }
    }
}

async fn fail_task(services: Arc<PipelineServices>, task_id: String, error_info: ErrorInfo) {
    let task_id = task_id.as_str();
    let snapshot = services
        .registry
        .update(task_id, TaskEventKind::Failed, |s| {
            s.error_info = Some(error_info);
            s.transition(ExecutionStatus::Failed);
        });
    // Keep the failure visible on the placeholder node for later cleanup.
    if let Some(snapshot) = snapshot {
        if let Some(ref lid) = snapshot.literature_id {
            let _ = services
                .graph
                .set_task_info(lid, snapshot.to_embedded_json())
                .await;
        }
    }
}

/// Why the plan stopped early.
enum PlanEnd {
    Cancelled,
    Failed(ErrorInfo),
}

impl From<CitegraphError> for PlanEnd {
    fn from(e: CitegraphError) -> Self {
        PlanEnd::Failed(ErrorInfo::new(e.kind(), e.to_string()))
    }
}

fn check_cancel(cancel: &CancellationToken) -> std::result::Result<(), PlanEnd> {
    if cancel.is_cancelled() {
        Err(PlanEnd::Cancelled)
    } else {
        Ok(())
    }
}

async fn execute_plan<'a>(
    services: &'a Arc<PipelineServices>,
    task_id: &'a str,
    source: &'a SubmissionSource,
    cancel: &'a CancellationToken,
) -> std::result::Result<(), PlanEnd> {
    let registry = &services.registry;

    // ── 1. URL mapping ────────────────────────────────────────────────────
    let mapping: Option<UrlMapping> = match source.url.as_deref() {
        Some(url) => {
            registry.update(task_id, TaskEventKind::Status, |s| {
                s.current_stage = "Mapping source URL".to_string();
            });
            services.urlmap.resolve(url).await
        }
        None => None,
    };
    check_cancel(cancel)?;

    let ids = effective_identifiers(source, mapping.as_ref());
    if ids.doi.is_none()
        && ids.arxiv_id.is_none()
        && ids.pmid.is_none()
        && source.pdf_url.is_none()
        && mapping.as_ref().map(|m| !m.has_useful_info()).unwrap_or(true)
        && source.title.is_none()
    {
        return Err(PlanEnd::Failed(ErrorInfo::new(
            ErrorKind::UnsupportedSource,
            "URL mapping produced no identifiers and no PDF was provided",
        )));
    }

    // ── 2. Pre-metadata dedup (phases 1-3) ────────────────────────────────
    registry.update(task_id, TaskEventKind::Status, |s| {
        s.current_stage = "Checking for duplicates".to_string();
    });
    match services
        .dedup
        .pre_metadata(task_id, source, mapping.as_ref())
        .await
        .map_err(PlanEnd::from)?
    {
        DedupOutcome::Existing { lid } => {
            merge_aliases_into(services, &lid, source, mapping.as_ref()).await;
            complete_duplicate(services, task_id, &lid).await;
            return Ok(());
        }
        DedupOutcome::InProgress { task_id: other, lid } => {
            info!(task_id, other_task = %other, "deferring to in-flight task");
            registry.update(task_id, TaskEventKind::Completed, |s| {
                s.result_type = Some(ResultType::Duplicate);
                s.literature_id = lid.clone();
                s.transition(ExecutionStatus::Completed);
            });
            return Ok(());
        }
        DedupOutcome::New => {}
    }
    check_cancel(cancel)?;

    // ── 3. Placeholder + parallel metadata/content ────────────────────────
    let placeholder_lid = format!("pending-{}", &task_id[..8.min(task_id.len())]);
    services
        .graph
        .create_placeholder(&placeholder_lid, task_id)
        .await
        .map_err(PlanEnd::from)?;
    registry.set_placeholder_lid(task_id, &placeholder_lid);
    registry.update(task_id, TaskEventKind::Status, |s| {
        s.literature_id = Some(placeholder_lid.clone());
        s.component_status
            .metadata
            .advance(ComponentState::Processing, "Fetching metadata", 10);
        s.component_status
            .content
            .advance(ComponentState::Processing, "Fetching PDF", 10);
        s.component_status
            .references
            .advance(ComponentState::Waiting, "Waiting for metadata", 0);
    });

    let identifier_set = IdentifierSet {
        doi: ids.doi.clone(),
        arxiv_id: ids.arxiv_id.clone(),
        pmid: ids.pmid.clone(),
        fingerprint: None,
        source_urls: ids.urls.clone(),
    };
    let landing_page = mapping
        .as_ref()
        .and_then(|m| m.source_page_url.clone())
        .or_else(|| source.url.clone());

    let metadata_fut = services.metadata.fetch(
        &identifier_set,
        None,
        landing_page.as_deref(),
        source,
    );
    let content_fut = services.content.fetch(
        source.pdf_url.as_deref(),
        mapping.as_ref(),
        ids.doi.as_deref(),
    );
    let (metadata_result, content_result) = tokio::join!(metadata_fut, content_fut);
    check_cancel(cancel)?;

    let pdf: Option<FetchedPdf> = match content_result {
        Ok(pdf) => {
            registry.update(task_id, TaskEventKind::Status, |s| {
                s.component_status
                    .content
                    .succeed("PDF downloaded", Some(pdf.source.to_string()));
            });
            Some(pdf)
        }
        Err(e) => {
            let kind = e.kind();
            registry.update(task_id, TaskEventKind::Error, |s| {
                s.component_status.content.fail(
                    "PDF acquisition failed",
                    ErrorInfo::new(kind, e.to_string()),
                    Some("provide PDF".to_string()),
                );
            });
            None
        }
    };

    // Metadata falls back to the PDF header once content is in hand.
    let metadata_outcome: MetadataOutcome = match metadata_result {
        Ok(outcome) => outcome,
        Err(first_err) => {
            let retry = match pdf {
                Some(ref pdf) => {
                    services
                        .metadata
                        .fetch(
                            &identifier_set,
                            Some(&pdf.bytes),
                            landing_page.as_deref(),
                            source,
                        )
                        .await
                }
                None => Err(first_err),
            };
            match retry {
                Ok(outcome) => outcome,
                Err(e) => {
                    let hint = next_action_hint(&identifier_set, pdf.is_some());
                    let kind = e.kind();
                    registry.update(task_id, TaskEventKind::Error, |s| {
                        s.component_status.metadata.fail(
                            "Metadata resolution failed",
                            ErrorInfo::new(kind, e.to_string()),
                            Some(hint),
                        );
                    });
                    // Without metadata there is no identity to persist under.
                    let _ = services.graph.delete_literature(&placeholder_lid).await;
                    return Err(PlanEnd::Failed(ErrorInfo::new(
                        kind,
                        "all metadata sources failed",
                    )));
                }
            }
        }
    };
    registry.update(task_id, TaskEventKind::Status, |s| {
        s.component_status.metadata.succeed(
            "Metadata resolved",
            Some(metadata_outcome.source.as_str().to_string()),
        );
        s.component_status.metadata.attempts = metadata_outcome.attempts;
    });
    check_cancel(cancel)?;

    // ── 4. Post-metadata dedup (phase 4) ──────────────────────────────────
    let mut identifiers = identifier_set.clone();
    identifiers.merge(&metadata_outcome.identifiers);
    let final_lid = generate_lid(&metadata_outcome.metadata);
    let title_fp = title_fingerprint(
        &metadata_outcome.metadata.title,
        &metadata_outcome.metadata.surnames(),
        metadata_outcome.metadata.year,
    );
    let pdf_fp = pdf.as_ref().map(|p| pdf_fingerprint(&p.bytes));

    if let Some(winner) = services
        .dedup
        .claim_fingerprints(&final_lid, &title_fp, pdf_fp.as_deref())
        .await
        .map_err(PlanEnd::from)?
    {
        merge_aliases_into(services, &winner, source, mapping.as_ref()).await;
        let _ = services.graph.delete_literature(&placeholder_lid).await;
        complete_duplicate(services, task_id, &winner).await;
        return Ok(());
    }
    check_cancel(cancel)?;

    return Ok(());
    // ── 5. References ─────────────────────────────────────────────────────
    registry.update(task_id, TaskEventKind::Status, |s| {
        s.component_status
            .references
            .advance(ComponentState::Processing, "Fetching references", 20);
    });
    let references_outcome: Option<ReferencesOutcome> = match services
        .references
        .fetch(
            &identifiers,
            pdf.as_ref().map(|p| p.bytes.as_slice()),
            landing_page.as_deref(),
        )
        .await
    {
        Ok(outcome) => {
            registry.update(task_id, TaskEventKind::Status, |s| {
                s.component_status
                    .references
                    .succeed("References resolved", Some(outcome.source.clone()));
                s.component_status.references.attempts = outcome.attempts;
            });
            Some(outcome)
        }
        Err(e) => {
            let kind = e.kind();
            registry.update(task_id, TaskEventKind::Error, |s| {
                s.component_status.references.fail(
                    "Reference resolution failed",
                    ErrorInfo::new(kind, e.to_string()),
                    Some("upload the PDF so the bibliography can be parsed".to_string()),
                );
            });
            None
        }
    };
    check_cancel(cancel)?;

    // ── 6. Persist ────────────────────────────────────────────────────────
    registry.update(task_id, TaskEventKind::Status, |s| {
        s.current_stage = "Saving literature".to_string();
    });

    // Reclaim placeholders first so the upsert merges onto a promoted node.
    services
        .linker
        .reclaim_unresolved(
            &final_lid,
            &metadata_outcome.metadata,
            identifiers.doi.as_deref(),
            identifiers.arxiv_id.as_deref(),
        )
        .await
        .map_err(PlanEnd::from)?;

    identifiers.fingerprint = pdf_fp.clone();
    let content = ContentRecord {
        pdf_url: pdf
            .as_ref()
            .map(|p| p.fetched_url.clone())
            .or(metadata_outcome.pdf_url.clone()),
        source_page_url: landing_page.clone(),
        fulltext: references_outcome.as_ref().and_then(|r| r.fulltext.clone()),
        parsing_method: references_outcome.as_ref().map(|r| r.source.clone()),
        quality_score: Some(metadata_outcome.confidence),
    };

    let snapshot = registry.get(task_id);
    let candidate = LiteratureCandidate {
        lid: final_lid.clone(),
        identifiers: identifiers.clone(),
        metadata: metadata_outcome.metadata.clone(),
        content,
        references: references_outcome
            .as_ref()
            .map(|r| r.references.clone())
            .unwrap_or_default(),
        task_info: snapshot
            .map(|s| s.to_embedded_json())
            .unwrap_or(serde_json::Value::Null),
    };
    services
        .graph
        .upsert_literature(&candidate)
        .await
        .map_err(PlanEnd::from)?;

    add_identity_aliases(services, &final_lid, &identifiers).await;
    if placeholder_lid != final_lid {
        let _ = services.graph.delete_literature(&placeholder_lid).await;
    }

    // ── 7. Citation linking ───────────────────────────────────────────────
    if let Some(ref outcome) = references_outcome {
        registry.update(task_id, TaskEventKind::Status, |s| {
            s.current_stage = "Linking citations".to_string();
        });
        services
            .linker
            .link_references(&final_lid, &outcome.references)
            .await
            .map_err(PlanEnd::from)?;
    }

    // ── 8. Finalize ───────────────────────────────────────────────────────
    let snapshot = registry.update(task_id, TaskEventKind::Status, |s| {
        s.literature_id = Some(final_lid.clone());
        s.result_type = Some(ResultType::Created);
    });

    let completed = snapshot
        .as_ref()
        .map(task_met_completion_policy)
        .unwrap_or(false);

    let final_snapshot = if completed {
        registry.update(task_id, TaskEventKind::Completed, |s| {
            s.transition(ExecutionStatus::Completed);
        })
    } else {
        registry.update(task_id, TaskEventKind::Failed, |s| {
            s.error_info = Some(ErrorInfo::new(
                ErrorKind::NotFound,
                "all critical components failed",
            ));
            s.transition(ExecutionStatus::Failed);
        })
    };

    if let Some(final_snapshot) = final_snapshot {
        let _ = services
            .graph
            .set_task_info(&final_lid, final_snapshot.to_embedded_json())
            .await;
    }

    Ok(())
}

/// Completion policy: metadata and references are the critical components;
/// the task completes when at least one of them succeeded (content alone
/// cannot carry a record). Metadata success always implies a usable record.
fn task_met_completion_policy(snapshot: &TaskSnapshot) -> bool {
    let c = &snapshot.component_status;
    c.metadata.status == ComponentState::Success
        || c.references.status == ComponentState::Success
}

/// Duplicate outcome: merge any newly learned aliases into the winner and
/// report success.
async fn complete_duplicate(services: &Arc<PipelineServices>, task_id: &str, lid: &str) {
    let snapshot = services
        .registry
        .update(task_id, TaskEventKind::Completed, |s| {
            s.result_type = Some(ResultType::Duplicate);
            s.literature_id = Some(lid.to_string());
            s.component_status.metadata.succeed("Duplicate of existing record", None);
            s.component_status.content.succeed("Duplicate of existing record", None);
            s.component_status
                .references
                .succeed("Duplicate of existing record", None);
            s.transition(ExecutionStatus::Completed);
        });
    if let Some(snapshot) = snapshot {
        let _ = services
            .graph
            .set_task_info(lid, snapshot.to_embedded_json())
            .await;
    }
}

/// Register every known external handle as an alias of `lid`.
async fn add_identity_aliases(
    services: &Arc<PipelineServices>,
    lid: &str,
    identifiers: &IdentifierSet,
) {
    let mut pairs: Vec<(AliasType, String)> = Vec::new();
    if let Some(ref doi) = identifiers.doi {
        pairs.push((AliasType::Doi, doi.clone()));
    }
    if let Some(ref arxiv_id) = identifiers.arxiv_id {
        pairs.push((AliasType::Arxiv, arxiv_id.clone()));
    }
    if let Some(ref pmid) = identifiers.pmid {
        pairs.push((AliasType::Pmid, pmid.clone()));
    }
    if let Some(ref fingerprint) = identifiers.fingerprint {
        pairs.push((AliasType::ContentFingerprint, fingerprint.clone()));
    }
    for url in &identifiers.source_urls {
        let alias_type = if url.ends_with(".pdf") {
            AliasType::PdfUrl
        } else {
            AliasType::SourcePage
        };
        pairs.push((alias_type, url.clone()));
    }

    for (alias_type, value) in pairs {
        let fut: std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> =
            Box::pin(services.graph.add_alias(lid, alias_type, &value));
        if let Err(e) = fut.await {
            error!(lid, %alias_type, value, error = %e, "alias write failed");
        }
    }
}

/// After a duplicate verdict, fold the submission's handles into the winner.
async fn merge_aliases_into(
    services: &Arc<PipelineServices>,
    lid: &str,
    source: &SubmissionSource,
    mapping: Option<&UrlMapping>,
) {
    let ids = effective_identifiers(source, mapping);
    let identifiers = IdentifierSet {
        doi: ids.doi,
        arxiv_id: ids.arxiv_id,
        pmid: ids.pmid,
        fingerprint: None,
        source_urls: ids.urls,
    };
    add_identity_aliases(services, lid, &identifiers).await;
}
