//! Four-phase waterfall deduplication.
//!
//! 1. Explicit identifiers (DOI, arXiv id, PMID) through the alias index.
//! 2. Normalized source URLs.
//! 3. In-flight tasks with an equal normalized submission.
//! 4. Content / title fingerprints, claimed atomically post-metadata.
//!
//! First match wins. A hit on a literature whose last task terminally
//! failed is deleted (when nothing resolved cites it) so resubmission can
//! retry without manual cleanup.

use std::sync::Arc;

use citegraph_common::entities::SubmissionSource;
use citegraph_common::{ident, Result};
use citegraph_graph::{AliasType, GraphRepository};
use citegraph_urlmap::UrlMapping;
use tracing::{debug, info, instrument};

use crate::store::TaskRegistry;

/// Outcome of the pre-metadata phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// A parsed literature already exists.
    Existing { lid: String },
    /// Another live task is ingesting the same submission.
    InProgress {
        task_id: String,
        lid: Option<String>,
    },
    /// Nothing matched; proceed with ingestion.
    New,
}

/// Identifiers gathered from the submission plus the URL mapping.
#[derive(Debug, Clone, Default)]
pub struct EffectiveIdentifiers {
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub pmid: Option<String>,
    pub urls: Vec<String>,
}

pub fn effective_identifiers(
    source: &SubmissionSource,
    mapping: Option<&UrlMapping>,
) -> EffectiveIdentifiers {
    let mut out = EffectiveIdentifiers::default();

    out.doi = source
        .doi
        .as_deref()
        .map(ident::normalize_doi)
        .or_else(|| mapping.and_then(|m| m.doi.as_deref().map(ident::normalize_doi)))
        .or_else(|| source.url.as_deref().and_then(ident::extract_doi));

    out.arxiv_id = source
        .arxiv_id
        .as_deref()
        .map(ident::normalize_arxiv_id)
        .or_else(|| {
            mapping.and_then(|m| m.arxiv_id.as_deref().map(ident::normalize_arxiv_id))
        })
        .or_else(|| source.url.as_deref().and_then(ident::extract_arxiv_id));

    out.pmid = source.pmid.as_ref().map(|p| p.trim().to_string());

    for url in [
        source.url.as_deref(),
        source.pdf_url.as_deref(),
        mapping.and_then(|m| m.source_page_url.as_deref()),
        mapping.and_then(|m| m.pdf_url.as_deref()),
    ]
    .into_iter()
    .flatten()
    {
        let normalized = ident::normalize_url(url);
        if !normalized.is_empty() && !out.urls.contains(&normalized) {
            out.urls.push(normalized);
        }
    }

    out
}

pub struct DedupEngine {
    graph: Arc<dyn GraphRepository>,
    registry: Arc<TaskRegistry>,
}

impl DedupEngine {
    pub fn new(graph: Arc<dyn GraphRepository>, registry: Arc<TaskRegistry>) -> Self {
        Self { graph, registry }
    }

    /// Phases 1-3, run before any metadata fetching.
    #[instrument(skip(self, source, mapping))]
    pub async fn pre_metadata(
        &self,
        task_id: &str,
        source: &SubmissionSource,
        mapping: Option<&UrlMapping>,
    ) -> Result<DedupOutcome> {
        let ids = effective_identifiers(source, mapping);

        // Phase 1: explicit identifiers.
        for (alias_type, value) in [
            (AliasType::Doi, ids.doi.as_deref()),
            (AliasType::Arxiv, ids.arxiv_id.as_deref()),
            (AliasType::Pmid, ids.pmid.as_deref()),
        ] {
            let Some(value) = value else { continue };
            if let Some(lid) = self.check_alias(alias_type, value).await? {
                info!(task_id, %alias_type, value, lid = %lid, "duplicate by explicit identifier");
                return Ok(DedupOutcome::Existing { lid });
            }
        }

        // Phase 2: normalized source URLs.
        for url in &ids.urls {
            for alias_type in [AliasType::SourcePage, AliasType::PdfUrl] {
                if let Some(lid) = self.check_alias(alias_type, url).await? {
                    info!(task_id, url, lid = %lid, "duplicate by source URL");
                    return Ok(DedupOutcome::Existing { lid });
                }
            }
        }

        // Phase 3: in-flight task with an equal normalized submission.
        if let Some((other_task, lid)) = self
            .registry
            .find_inflight(&source.normalized_key(), task_id)
        {
            info!(task_id, other_task = %other_task, "submission already in flight");
            return Ok(DedupOutcome::InProgress {
                task_id: other_task,
                lid,
            });
        }

        Ok(DedupOutcome::New)
    }

    /// Phase 4: fingerprint claims after metadata (and optionally content)
    /// are known. Claims are conditional inserts on the alias index, so a
    /// concurrent race has exactly one winner; the loser gets the winner's
    /// LID back.
    #[instrument(skip(self))]
    pub async fn claim_fingerprints(
        &self,
        candidate_lid: &str,
        title_fingerprint: &str,
        pdf_fingerprint: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(pdf_fp) = pdf_fingerprint {
            let winner = self
                .graph
                .claim_alias(AliasType::ContentFingerprint, pdf_fp, candidate_lid)
                .await?;
            if winner != candidate_lid {
                // Stale claims from failed ingests surrender ownership.
                if self.still_owns(&winner).await? {
                    info!(candidate_lid, winner = %winner, "duplicate by content fingerprint");
                    return Ok(Some(winner));
                }
            }
        }

        let winner = self
            .graph
            .claim_alias(AliasType::TitleFingerprint, title_fingerprint, candidate_lid)
            .await?;
        if winner != candidate_lid && self.still_owns(&winner).await? {
            info!(candidate_lid, winner = %winner, "duplicate by title fingerprint");
            return Ok(Some(winner));
        }
        Ok(None)
    }

    /// An alias hit only counts when its literature is live and parsed.
    /// Placeholders are invisible; terminally failed uncited records are
    /// deleted so the new submission can retry.
    async fn check_alias(&self, alias_type: AliasType, value: &str) -> Result<Option<String>> {
        let Some(lid) = self.graph.resolve_alias(alias_type, value).await? else {
            return Ok(None);
        };
        let Some(record) = self.graph.get_literature(&lid).await? else {
            debug!(%alias_type, value, lid = %lid, "alias points at a missing node");
            return Ok(None);
        };
        if record.placeholder {
            debug!(lid = %lid, "skipping placeholder node");
            return Ok(None);
        }
        if record.task_status() == Some("failed") {
            if !self.graph.has_incoming_citations(&lid).await? {
                info!(lid = %lid, "cleaning up failed literature for retry");
                self.graph.delete_literature(&lid).await?;
                return Ok(None);
            }
            // Cited failures stay; the submission becomes a retry hit.
        }
        Ok(Some(lid))
    }

    /// A fingerprint winner that has since been deleted does not block.
    async fn still_owns(&self, lid: &str) -> Result<bool> {
        Ok(self.graph.get_literature(lid).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citegraph_common::entities::{AuthorRecord, LiteratureMetadata};
    use citegraph_graph::{LiteratureCandidate, MemoryGraphStore};
    use std::time::Duration;

    fn engine() -> (Arc<MemoryGraphStore>, Arc<TaskRegistry>, DedupEngine) {
        let graph = Arc::new(MemoryGraphStore::new());
        let registry = Arc::new(TaskRegistry::new(
            Duration::from_secs(3600),
            Duration::from_secs(1800),
        ));
        let engine = DedupEngine::new(graph.clone(), registry.clone());
        (graph, registry, engine)
    }

    fn candidate(lid: &str, status: &str) -> LiteratureCandidate {
        LiteratureCandidate {
            lid: lid.to_string(),
            identifiers: Default::default(),
            metadata: LiteratureMetadata {
                title: "Stored Paper".to_string(),
                authors: vec![AuthorRecord::new("Grace Hopper")],
                year: Some(2016),
                ..Default::default()
            },
            content: Default::default(),
            references: Vec::new(),
            task_info: serde_json::json!({
                "task_id": "t-old",
                "execution_status": status,
            }),
        }
    }

    fn doi_submission(doi: &str) -> SubmissionSource {
        SubmissionSource {
            doi: Some(doi.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn explicit_identifier_match_wins() {
        let (graph, _registry, engine) = engine();
        graph
            .upsert_literature(&candidate("lid-1", "completed"))
            .await
            .unwrap();
        graph
            .add_alias("lid-1", AliasType::Doi, "10.1/known")
            .await
            .unwrap();

        let outcome = engine
            .pre_metadata("task-new", &doi_submission("https://doi.org/10.1/KNOWN"), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DedupOutcome::Existing {
                lid: "lid-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn failed_uncited_literature_is_cleaned_up() {
        let (graph, _registry, engine) = engine();
        graph
            .upsert_literature(&candidate("lid-failed", "failed"))
            .await
            .unwrap();
        graph
            .add_alias("lid-failed", AliasType::Doi, "10.1/failed")
            .await
            .unwrap();

        let outcome = engine
            .pre_metadata("task-new", &doi_submission("10.1/failed"), None)
            .await
            .unwrap();
        assert_eq!(outcome, DedupOutcome::New);
        assert!(graph.get_literature("lid-failed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_but_cited_literature_is_kept() {
        let (graph, _registry, engine) = engine();
        graph
            .upsert_literature(&candidate("lid-citing", "completed"))
            .await
            .unwrap();
        graph
            .upsert_literature(&candidate("lid-failed", "failed"))
            .await
            .unwrap();
        graph
            .add_alias("lid-failed", AliasType::Doi, "10.1/failed")
            .await
            .unwrap();
        graph
            .link_cites(
                "lid-citing",
                &citegraph_graph::CitationTarget::Literature("lid-failed".into()),
                1.0,
                "api",
            )
            .await
            .unwrap();

        let outcome = engine
            .pre_metadata("task-new", &doi_submission("10.1/failed"), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DedupOutcome::Existing {
                lid: "lid-failed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn url_phase_matches_normalized_variants() {
        let (graph, _registry, engine) = engine();
        graph
            .upsert_literature(&candidate("lid-url", "completed"))
            .await
            .unwrap();
        graph
            .add_alias("lid-url", AliasType::SourcePage, "arxiv.org/abs/1706.03762")
            .await
            .unwrap();

        let submission = SubmissionSource {
            url: Some("https://arxiv.org/pdf/1706.03762v2.pdf".to_string()),
            ..Default::default()
        };
        // The arXiv id itself is not aliased, so the URL phase must hit.
        let outcome = engine
            .pre_metadata("task-new", &submission, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DedupOutcome::Existing {
                lid: "lid-url".to_string()
            }
        );
    }

    #[tokio::test]
    async fn inflight_submission_is_reported() {
        let (_graph, registry, engine) = engine();
        let (other_task, _cancel) = registry.create(doi_submission("10.1/x"));
        registry.set_placeholder_lid(&other_task, "pending-1");

        let outcome = engine
            .pre_metadata("task-new", &doi_submission("10.1/x"), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DedupOutcome::InProgress {
                task_id: other_task,
                lid: Some("pending-1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn stale_fingerprint_claim_does_not_block() {
        let (_graph, _registry, engine) = engine();
        let first = engine
            .claim_fingerprints("lid-a", "fp-title", None)
            .await
            .unwrap();
        assert_eq!(first, None);

        // lid-a never materialized as a literature node, so its claim is
        // stale and the next candidate proceeds.
        let second = engine
            .claim_fingerprints("lid-b", "fp-title", None)
            .await
            .unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn fingerprint_duplicate_reports_winner() {
        let (graph, _registry, engine) = engine();
        graph
            .upsert_literature(&candidate("lid-a", "completed"))
            .await
            .unwrap();
        let first = engine
            .claim_fingerprints("lid-a", "fp-title", None)
            .await
            .unwrap();
        assert_eq!(first, None);

        let second = engine
            .claim_fingerprints("lid-b", "fp-title", None)
            .await
            .unwrap();
        assert_eq!(second, Some("lid-a".to_string()));
    }

    #[test]
    fn effective_identifiers_prefer_explicit_fields() {
        let submission = SubmissionSource {
            doi: Some("10.1/explicit".to_string()),
            url: Some("https://doi.org/10.1/from-url".to_string()),
            ..Default::default()
        };
        let ids = effective_identifiers(&submission, None);
        assert_eq!(ids.doi.as_deref(), Some("10.1/explicit"));
        assert!(!ids.urls.is_empty());
    }

    #[test]
    fn effective_identifiers_extract_from_url() {
        let submission = SubmissionSource {
            url: Some("https://arxiv.org/abs/1706.03762v2".to_string()),
            ..Default::default()
        };
        let ids = effective_identifiers(&submission, None);
        assert_eq!(ids.arxiv_id.as_deref(), Some("1706.03762"));
    }
}
