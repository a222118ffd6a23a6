//! citegraph-graph — Alias-indexed graph store access.
//!
//! Literature, Alias, and Unresolved nodes with `IDENTIFIES` and `CITES`
//! relationships, behind the [`GraphRepository`] trait. The production
//! implementation speaks Bolt to a Neo4j-compatible store; an in-memory
//! implementation backs unit tests of the pipeline.

pub mod client;
pub mod memory;
pub mod neo4j;

use async_trait::async_trait;
use citegraph_common::entities::{
    ContentRecord, IdentifierSet, LiteratureMetadata, LiteratureRecord, ParsedReference,
    RawReference,
};
use citegraph_common::Result;
use serde::{Deserialize, Serialize};

pub use client::GraphClient;
pub use memory::MemoryGraphStore;
pub use neo4j::Neo4jGraphStore;

/// Kinds of external handles stored as Alias nodes.
/// `(alias_type, alias_value)` is globally unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasType {
    Doi,
    Arxiv,
    Pmid,
    /// Normalized landing-page URL.
    SourcePage,
    PdfUrl,
    /// SHA-256 over normalized title + sorted surnames + year.
    TitleFingerprint,
    /// MD5 of the PDF bytes.
    ContentFingerprint,
}

impl AliasType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasType::Doi => "doi",
            AliasType::Arxiv => "arxiv",
            AliasType::Pmid => "pmid",
            AliasType::SourcePage => "source_page",
            AliasType::PdfUrl => "pdf_url",
            AliasType::TitleFingerprint => "title_fingerprint",
            AliasType::ContentFingerprint => "content_fingerprint",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "doi" => Some(AliasType::Doi),
            "arxiv" => Some(AliasType::Arxiv),
            "pmid" => Some(AliasType::Pmid),
            "source_page" => Some(AliasType::SourcePage),
            "pdf_url" => Some(AliasType::PdfUrl),
            "title_fingerprint" => Some(AliasType::TitleFingerprint),
            "content_fingerprint" => Some(AliasType::ContentFingerprint),
            _ => None,
        }
    }
}

impl std::fmt::Display for AliasType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination of a `CITES` edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationTarget {
    Literature(String),
    Unresolved(String),
}

impl CitationTarget {
    pub fn id(&self) -> &str {
        match self {
            CitationTarget::Literature(lid) => lid,
            CitationTarget::Unresolved(uid) => uid,
        }
    }
}

/// Candidate for literature upsert. The LID is derived deterministically by
/// the caller before persistence.
#[derive(Debug, Clone)]
pub struct LiteratureCandidate {
    pub lid: String,
    pub identifiers: IdentifierSet,
    pub metadata: LiteratureMetadata,
    pub content: ContentRecord,
    pub references: Vec<RawReference>,
    pub task_info: serde_json::Value,
}

/// Result of `upsert_literature`.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub lid: String,
    pub created: bool,
}

// ── Graph read payload ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// "literature" or "unresolved".
    pub node_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMeta {
    pub seed_count: usize,
    pub depth: u32,
    pub node_count: usize,
    pub edge_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: GraphMeta,
}

/// Alias-indexed DAO over the graph store.
///
/// All write operations are idempotent: `MERGE` semantics on the store side,
/// re-running with identical input leaves the graph unchanged.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    /// Deterministic upsert keyed on LID. Returns whether the node was new.
    async fn upsert_literature(&self, candidate: &LiteratureCandidate) -> Result<UpsertOutcome>;

    async fn get_literature(&self, lid: &str) -> Result<Option<LiteratureRecord>>;

    async fn batch_get(&self, lids: &[String]) -> Result<Vec<LiteratureRecord>>;

    /// Create a placeholder node visible to task status while ingestion runs.
    async fn create_placeholder(&self, lid: &str, task_id: &str) -> Result<()>;

    /// Replace the embedded task snapshot on a literature node.
    async fn set_task_info(&self, lid: &str, task_info: serde_json::Value) -> Result<()>;

    /// DETACH-delete the node and cascade its aliases. Used for failed-doc
    /// cleanup and placeholder removal after a duplicate merge.
    async fn delete_literature(&self, lid: &str) -> Result<()>;

    /// No-op when the alias already identifies `lid`.
    async fn add_alias(&self, lid: &str, alias_type: AliasType, value: &str) -> Result<()>;

    async fn resolve_alias(&self, alias_type: AliasType, value: &str) -> Result<Option<String>>;

    /// Atomic conditional insert: claim `(alias_type, value)` for `lid`,
    /// or surrender to the existing owner. Returns the winning LID.
    async fn claim_alias(&self, alias_type: AliasType, value: &str, lid: &str) -> Result<String>;

    async fn aliases_of(&self, lid: &str) -> Result<Vec<(AliasType, String)>>;

    /// Merge a `CITES` edge; self-loops are rejected upstream.
    async fn link_cites(
        &self,
        src_lid: &str,
        target: &CitationTarget,
        confidence: f64,
        source: &str,
    ) -> Result<()>;

    async fn create_unresolved(
        &self,
        raw_text: &str,
        parsed: Option<&ParsedReference>,
        fingerprint: Option<&str>,
    ) -> Result<String>;

    /// Unresolved nodes matching any of the given handles, for promotion.
    async fn find_unresolved_matching(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<Vec<String>>;

    /// Relabel an Unresolved node as Literature with the given LID,
    /// preserving all incident relationships.
    async fn promote_unresolved(&self, uid: &str, lid: &str) -> Result<()>;

    /// Fold a redundant Unresolved node into an existing literature:
    /// incoming `CITES` edges are re-pointed, then the node is removed.
    async fn merge_unresolved_into(&self, uid: &str, lid: &str) -> Result<()>;

    /// Whether any resolved literature cites this node. Guards failed-doc
    /// cleanup.
    async fn has_incoming_citations(&self, lid: &str) -> Result<bool>;

    /// Candidate records for fuzzy citation matching, retrieved by title
    /// tokens. Recall-oriented; the caller scores and filters.
    async fn candidates_by_title(&self, title: &str, limit: usize)
        -> Result<Vec<LiteratureRecord>>;

    /// Depth-bounded neighborhood of the seed set, undirected expansion,
    /// edges reported with their true direction. The returned edge set is
    /// exactly the induced subgraph over the returned nodes.
    async fn neighborhood(&self, seeds: &[String], depth: u32) -> Result<GraphPayload>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_type_round_trips_through_str() {
        for t in [
            AliasType::Doi,
            AliasType::Arxiv,
            AliasType::Pmid,
            AliasType::SourcePage,
            AliasType::PdfUrl,
            AliasType::TitleFingerprint,
            AliasType::ContentFingerprint,
        ] {
            assert!(!t.as_str().is_empty());
        }
        assert_eq!(AliasType::TitleFingerprint.as_str(), "title_fingerprint");
    }
}
