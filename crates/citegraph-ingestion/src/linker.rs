//! Citation linking.
//!
//! For every normalized reference of a just-ingested literature: resolve to
//! an existing LID by exact identifier, then by fuzzy title+author+year
//! scoring, else create (or reuse) an Unresolved placeholder. A `CITES`
//! edge is always written. When new literature arrives, matching Unresolved
//! nodes are reclaimed: the first is promoted in place, the rest are folded
//! in.

use std::sync::Arc;

use citegraph_common::entities::{LiteratureMetadata, RawReference};
use citegraph_common::{ident, Result};
use citegraph_graph::{AliasType, CitationTarget, GraphRepository};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument};

use crate::fingerprint::title_fingerprint;
use crate::matching::{accept_candidate, surname_of, MatchThresholds};

const CANDIDATE_LIMIT: usize = 25;

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub total: usize,
    pub linked_existing: usize,
    pub linked_unresolved: usize,
    pub self_loops_rejected: usize,
}

pub struct CitationLinker {
    graph: Arc<dyn GraphRepository>,
    thresholds: MatchThresholds,
    /// Concurrent reference resolutions per literature.
    concurrency: usize,
}

impl CitationLinker {
    pub fn new(
        graph: Arc<dyn GraphRepository>,
        thresholds: MatchThresholds,
        concurrency: usize,
    ) -> Self {
        Self {
            graph,
            thresholds,
            concurrency: concurrency.max(1),
        }
    }

    /// Link every reference of `src_lid`. Self-citations are dropped.
    #[instrument(skip(self, references))]
    pub async fn link_references(
        &self,
        src_lid: &str,
        references: &[RawReference],
    ) -> Result<LinkStats> {
        let mut stats = LinkStats {
            total: references.len(),
            ..Default::default()
        };

        let outcomes: Vec<_> = stream::iter(references)
            .map(|reference| self.link_one(src_lid, reference))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome? {
                Some(CitationTarget::Literature(_)) => stats.linked_existing += 1,
                Some(CitationTarget::Unresolved(_)) => stats.linked_unresolved += 1,
                None => stats.self_loops_rejected += 1,
            }
        }

        info!(
            src_lid,
            total = stats.total,
            existing = stats.linked_existing,
            unresolved = stats.linked_unresolved,
            "references linked"
        );
        Ok(stats)
    }

    async fn link_one(
        &self,
        src_lid: &str,
        reference: &RawReference,
    ) -> Result<Option<CitationTarget>> {
        match self.resolve_target(src_lid, reference).await? {
            Some((target, confidence, how)) => {
                self.graph
                    .link_cites(src_lid, &target, confidence, how)
                    .await?;
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    /// Resolve one reference to a citation target. `None` means the edge
    /// must not be written (self-loop).
    async fn resolve_target(
        &self,
        src_lid: &str,
        reference: &RawReference,
    ) -> Result<Option<(CitationTarget, f64, &'static str)>> {
        let parsed = reference.parsed.as_ref();

        // (a) Exact identifier resolution through the alias index.
        if let Some(doi) = parsed.and_then(|p| p.doi.as_deref()) {
            if let Some(lid) = self
                .graph
                .resolve_alias(AliasType::Doi, &ident::normalize_doi(doi))
                .await?
            {
                return Ok(self.guard_self_loop(src_lid, lid, 1.0, "identifier"));
            }
        }
        if let Some(arxiv_id) = parsed.and_then(|p| p.arxiv_id.as_deref()) {
            if let Some(lid) = self
                .graph
                .resolve_alias(AliasType::Arxiv, &ident::normalize_arxiv_id(arxiv_id))
                .await?
            {
                return Ok(self.guard_self_loop(src_lid, lid, 1.0, "identifier"));
            }
        }

        // (b) Fuzzy title + author + year scoring over store candidates.
        if let Some((title, parsed)) = parsed.and_then(|p| p.title.as_deref().map(|t| (t, p))) {
            let candidates = self
                .graph
                .candidates_by_title(title, CANDIDATE_LIMIT)
                .await?;
            let mut best: Option<(String, f64)> = None;
            for candidate in &candidates {
                let candidate_authors: Vec<String> = candidate
                    .metadata
                    .authors
                    .iter()
                    .map(|a| a.name.clone())
                    .collect();
                if let Some(score) = accept_candidate(
                    title,
                    &parsed.authors,
                    parsed.year,
                    &candidate.metadata.title,
                    &candidate_authors,
                    candidate.metadata.year,
                    self.thresholds,
                ) {
                    if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                        best = Some((candidate.lid.clone(), score));
                    }
                }
            }
            if let Some((lid, score)) = best {
                debug!(title, lid = %lid, score, "fuzzy citation match");
                return Ok(self.guard_self_loop(src_lid, lid, score, "fuzzy_title"));
            }
        }

        // (c) Unresolved placeholder, reusing an equal-fingerprint node.
        let fingerprint = parsed.and_then(reference_fingerprint);
        let uid = match &fingerprint {
            Some(fp) => {
                let existing = self
                    .graph
                    .find_unresolved_matching(
                        parsed.and_then(|p| p.doi.as_deref()),
                        parsed.and_then(|p| p.arxiv_id.as_deref()),
                        Some(fp),
                    )
                    .await?;
                match existing.into_iter().next() {
                    Some(uid) => uid,
                    None => {
                        self.graph
                            .create_unresolved(&reference.raw_text, parsed, Some(fp))
                            .await?
                    }
                }
            }
            None => {
                self.graph
                    .create_unresolved(&reference.raw_text, parsed, None)
                    .await?
            }
        };
        Ok(Some((CitationTarget::Unresolved(uid), 0.5, "unresolved")))
    }

    fn guard_self_loop(
        &self,
        src_lid: &str,
        target_lid: String,
        confidence: f64,
        how: &'static str,
    ) -> Option<(CitationTarget, f64, &'static str)> {
        if target_lid == src_lid {
            debug!(src_lid, "self-citation rejected");
            return None;
        }
        Some((CitationTarget::Literature(target_lid), confidence, how))
    }

    /// Before a new literature node is created, relabel any Unresolved
    /// placeholders it satisfies so their incident `CITES` edges carry over;
    /// extra matches are folded into the first.
    #[instrument(skip(self, metadata))]
    pub async fn reclaim_unresolved(
        &self,
        lid: &str,
        metadata: &LiteratureMetadata,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
    ) -> Result<usize> {
        let fingerprint =
            title_fingerprint(&metadata.title, &metadata.surnames(), metadata.year);
        let matches = self
            .graph
            .find_unresolved_matching(doi, arxiv_id, Some(&fingerprint))
            .await?;
        if matches.is_empty() {
            return Ok(0);
        }

        let count = matches.len();
        let mut iter = matches.into_iter();
        if let Some(first) = iter.next() {
            self.graph.promote_unresolved(&first, lid).await?;
        }
        for extra in iter {
            self.graph.merge_unresolved_into(&extra, lid).await?;
        }
        info!(lid, promoted = count, "unresolved placeholders reclaimed");
        Ok(count)
    }
}

/// Fingerprint of a parsed reference, when it carries enough signal.
fn reference_fingerprint(
    parsed: &citegraph_common::entities::ParsedReference,
) -> Option<String> {
    let title = parsed.title.as_deref()?;
    let surnames: Vec<String> = parsed.authors.iter().map(|a| surname_of(a)).collect();
    Some(title_fingerprint(title, &surnames, parsed.year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use citegraph_common::entities::{AuthorRecord, ParsedReference};
    use citegraph_graph::{LiteratureCandidate, MemoryGraphStore};

    fn stored(lid: &str, title: &str, authors: &[&str], year: i32) -> LiteratureCandidate {
        LiteratureCandidate {
            lid: lid.to_string(),
            identifiers: Default::default(),
            metadata: LiteratureMetadata {
                title: title.to_string(),
                authors: authors.iter().map(|a| AuthorRecord::new(*a)).collect(),
                year: Some(year),
                ..Default::default()
            },
            content: Default::default(),
            references: Vec::new(),
            task_info: serde_json::Value::Null,
        }
    }

    fn reference(title: &str, authors: &[&str], year: Option<i32>) -> RawReference {
        RawReference {
            raw_text: title.to_string(),
            parsed: Some(ParsedReference {
                title: Some(title.to_string()),
                authors: authors.iter().map(|a| a.to_string()).collect(),
                year,
                ..Default::default()
            }),
            source: "test".to_string(),
        }
    }

    fn linker(graph: Arc<MemoryGraphStore>) -> CitationLinker {
        CitationLinker::new(graph, MatchThresholds::default(), 3)
    }

    #[tokio::test]
    async fn doi_reference_links_to_existing_literature() {
        let graph = Arc::new(MemoryGraphStore::new());
        graph
            .upsert_literature(&stored("lid-t", "Target Paper", &["Ada Byron"], 2015))
            .await
            .unwrap();
        graph
            .add_alias("lid-t", AliasType::Doi, "10.1/target")
            .await
            .unwrap();

        let mut r = reference("Anything", &[], None);
        r.parsed.as_mut().unwrap().doi = Some("10.1/target".to_string());

        let stats = linker(graph.clone())
            .link_references("lid-src", &[r])
            .await
            .unwrap();
        assert_eq!(stats.linked_existing, 1);
        assert_eq!(
            graph.citation_pairs(),
            vec![("lid-src".to_string(), "lid-t".to_string())]
        );
    }

    #[tokio::test]
    async fn ambiguous_title_prefers_matching_year_and_authors() {
        let graph = Arc::new(MemoryGraphStore::new());
        graph
            .upsert_literature(&stored(
                "lid-2017",
                "Attention Is All You Need",
                &["Ashish Vaswani", "Noam Shazeer"],
                2017,
            ))
            .await
            .unwrap();
        graph
            .upsert_literature(&stored(
                "lid-2005",
                "Attention Is All You Need: A Cognitive Perspective",
                &["Quentin Pemberton"],
                2005,
            ))
            .await
            .unwrap();

        let r = reference(
            "Attention is all you need",
            &["Vaswani, A.", "Shazeer, N."],
            Some(2017),
        );
        let stats = linker(graph.clone())
            .link_references("lid-src", &[r])
            .await
            .unwrap();

        assert_eq!(stats.linked_existing, 1);
        let pairs = graph.citation_pairs();
        assert_eq!(pairs, vec![("lid-src".to_string(), "lid-2017".to_string())]);
    }

    #[tokio::test]
    async fn unmatched_reference_creates_unresolved_once() {
        let graph = Arc::new(MemoryGraphStore::new());
        let link = linker(graph.clone());
        let r = reference("Completely Unknown Work", &["Nobody, X."], Some(1999));

        link.link_references("lid-a", &[r.clone()]).await.unwrap();
        link.link_references("lid-b", &[r]).await.unwrap();

        // Both sources cite the same placeholder.
        assert_eq!(graph.unresolved_count(), 1);
        assert_eq!(graph.citation_pairs().len(), 2);
    }

    #[tokio::test]
    async fn self_citations_are_rejected() {
        let graph = Arc::new(MemoryGraphStore::new());
        graph
            .upsert_literature(&stored("lid-self", "Recursive Paper", &["M. Ouroboros"], 2020))
            .await
            .unwrap();
        graph
            .add_alias("lid-self", AliasType::Doi, "10.1/self")
            .await
            .unwrap();

        let mut r = reference("Recursive Paper", &[], None);
        r.parsed.as_mut().unwrap().doi = Some("10.1/self".to_string());

        let stats = linker(graph.clone())
            .link_references("lid-self", &[r])
            .await
            .unwrap();
        assert_eq!(stats.self_loops_rejected, 1);
        assert!(graph.citation_pairs().is_empty());
    }

    #[tokio::test]
    async fn reclaim_promotes_then_merges() {
        let graph = Arc::new(MemoryGraphStore::new());
        graph
            .upsert_literature(&stored("lid-citing", "Citing Paper", &["C. Author"], 2021))
            .await
            .unwrap();

        let link = linker(graph.clone());
        let r = reference("The Missing Work", &["Vaswani, A."], Some(2017));
        link.link_references("lid-citing", &[r]).await.unwrap();
        assert_eq!(graph.unresolved_count(), 1);

        let metadata = LiteratureMetadata {
            title: "The Missing Work".to_string(),
            authors: vec![AuthorRecord::new("Ashish Vaswani")],
            year: Some(2017),
            ..Default::default()
        };
        let reclaimed = link
            .reclaim_unresolved("lid-new", &metadata, None, None)
            .await
            .unwrap();

        assert_eq!(reclaimed, 1);
        assert_eq!(graph.unresolved_count(), 0);
        // The citation now terminates on the promoted literature node.
        assert_eq!(
            graph.citation_pairs(),
            vec![("lid-citing".to_string(), "lid-new".to_string())]
        );
    }
}
