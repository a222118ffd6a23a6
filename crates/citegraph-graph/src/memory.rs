//! In-memory [`GraphRepository`] used by pipeline unit tests.
//!
//! Mirrors the store semantics that matter to callers: MERGE-style
//! idempotent writes, alias-claim atomicity under one lock, relabel-style
//! promotion that preserves incident edges.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use citegraph_common::entities::{LiteratureMetadata, LiteratureRecord, ParsedReference};
use citegraph_common::Result;
use uuid::Uuid;

use crate::{
    AliasType, CitationTarget, GraphEdge, GraphMeta, GraphNode, GraphPayload, GraphRepository,
    LiteratureCandidate, UpsertOutcome,
};

#[derive(Debug, Clone)]
struct StoredUnresolved {
    raw_text: String,
    parsed: Option<ParsedReference>,
    fingerprint: Option<String>,
}

#[derive(Default)]
struct Inner {
    literature: HashMap<String, LiteratureRecord>,
    aliases: HashMap<(AliasType, String), String>,
    unresolved: HashMap<String, StoredUnresolved>,
    /// (source id, target id) -> (confidence, source label)
    cites: HashMap<(String, String), (f64, String)>,
}

#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: all `CITES` pairs currently stored.
    pub fn citation_pairs(&self) -> Vec<(String, String)> {
        let inner = self.inner.read().unwrap();
        inner.cites.keys().cloned().collect()
    }

    /// Test helper: number of unresolved nodes.
    pub fn unresolved_count(&self) -> usize {
        self.inner.read().unwrap().unresolved.len()
    }
}

#[async_trait]
impl GraphRepository for MemoryGraphStore {
    async fn upsert_literature(&self, candidate: &LiteratureCandidate) -> Result<UpsertOutcome> {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        let created = !inner.literature.contains_key(&candidate.lid);
        let created_at = inner
            .literature
            .get(&candidate.lid)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        inner.literature.insert(
            candidate.lid.clone(),
            LiteratureRecord {
                lid: candidate.lid.clone(),
                identifiers: candidate.identifiers.clone(),
                metadata: candidate.metadata.clone(),
                content: candidate.content.clone(),
                references: candidate.references.clone(),
                placeholder: false,
                task_info: candidate.task_info.clone(),
                created_at,
                updated_at: now,
            },
        );
        Ok(UpsertOutcome {
            lid: candidate.lid.clone(),
            created,
        })
    }

    async fn get_literature(&self, lid: &str) -> Result<Option<LiteratureRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.literature.get(lid).cloned())
    }

    async fn batch_get(&self, lids: &[String]) -> Result<Vec<LiteratureRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(lids
            .iter()
            .filter_map(|lid| inner.literature.get(lid).cloned())
            .collect())
    }

    async fn create_placeholder(&self, lid: &str, task_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        inner
            .literature
            .entry(lid.to_string())
            .or_insert_with(|| LiteratureRecord {
                lid: lid.to_string(),
                identifiers: Default::default(),
                metadata: LiteratureMetadata {
                    title: "Processing...".to_string(),
                    ..Default::default()
                },
                content: Default::default(),
                references: Vec::new(),
                placeholder: true,
                task_info: serde_json::json!({ "task_id": task_id }),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn set_task_info(&self, lid: &str, task_info: serde_json::Value) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(record) = inner.literature.get_mut(lid) {
            record.task_info = task_info;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_literature(&self, lid: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.literature.remove(lid);
        inner.aliases.retain(|_, owner| owner != lid);
        inner
            .cites
            .retain(|(src, dst), _| src != lid && dst != lid);
        Ok(())
    }

    async fn add_alias(&self, lid: &str, alias_type: AliasType, value: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .aliases
            .entry((alias_type, value.to_string()))
            .or_insert_with(|| lid.to_string());
        Ok(())
    }

    async fn resolve_alias(&self, alias_type: AliasType, value: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .aliases
            .get(&(alias_type, value.to_string()))
            .cloned())
    }

    async fn claim_alias(&self, alias_type: AliasType, value: &str, lid: &str) -> Result<String> {
        let mut inner = self.inner.write().unwrap();
        let winner = inner
            .aliases
            .entry((alias_type, value.to_string()))
            .or_insert_with(|| lid.to_string());
        Ok(winner.clone())
    }

    async fn aliases_of(&self, lid: &str) -> Result<Vec<(AliasType, String)>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .aliases
            .iter()
            .filter(|(_, owner)| owner.as_str() == lid)
            .map(|((t, v), _)| (*t, v.clone()))
            .collect())
    }

    async fn link_cites(
        &self,
        src_lid: &str,
        target: &CitationTarget,
        confidence: f64,
        source: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.cites.insert(
            (src_lid.to_string(), target.id().to_string()),
            (confidence, source.to_string()),
        );
        Ok(())
    }

    async fn create_unresolved(
        &self,
        raw_text: &str,
        parsed: Option<&ParsedReference>,
        fingerprint: Option<&str>,
    ) -> Result<String> {
        let mut inner = self.inner.write().unwrap();
        let uid = format!("u-{}", Uuid::new_v4());
        inner.unresolved.insert(
            uid.clone(),
            StoredUnresolved {
                raw_text: raw_text.to_string(),
                parsed: parsed.cloned(),
                fingerprint: fingerprint.map(String::from),
            },
        );
        Ok(uid)
    }

    async fn find_unresolved_matching(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .unresolved
            .iter()
            .filter(|(_, u)| {
                let parsed_doi = u.parsed.as_ref().and_then(|p| p.doi.as_deref());
                let parsed_arxiv = u.parsed.as_ref().and_then(|p| p.arxiv_id.as_deref());
                (doi.is_some() && parsed_doi == doi)
                    || (arxiv_id.is_some() && parsed_arxiv == arxiv_id)
                    || (fingerprint.is_some() && u.fingerprint.as_deref() == fingerprint)
            })
            .map(|(uid, _)| uid.clone())
            .collect())
    }

    async fn promote_unresolved(&self, uid: &str, lid: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let Some(unresolved) = inner.unresolved.remove(uid) else {
            return Ok(());
        };
        let now = Utc::now();
        // Relabel: the node becomes a literature shell; edges follow the id.
        inner
            .literature
            .entry(lid.to_string())
            .or_insert_with(|| LiteratureRecord {
                lid: lid.to_string(),
                identifiers: Default::default(),
                metadata: LiteratureMetadata {
                    title: unresolved
                        .parsed
                        .as_ref()
                        .and_then(|p| p.title.clone())
                        .unwrap_or_else(|| unresolved.raw_text.clone()),
                    ..Default::default()
                },
                content: Default::default(),
                references: Vec::new(),
                placeholder: false,
                task_info: serde_json::Value::Null,
                created_at: now,
                updated_at: now,
            });
        let renamed: Vec<((String, String), (f64, String))> = inner
            .cites
            .iter()
            .filter(|((src, dst), _)| src == uid || dst == uid)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for ((src, dst), attrs) in renamed {
            inner.cites.remove(&(src.clone(), dst.clone()));
            let src = if src == uid { lid.to_string() } else { src };
            let dst = if dst == uid { lid.to_string() } else { dst };
            inner.cites.insert((src, dst), attrs);
        }
        Ok(())
    }

    async fn merge_unresolved_into(&self, uid: &str, lid: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.unresolved.remove(uid).is_none() {
            return Ok(());
        }
        let incoming: Vec<((String, String), (f64, String))> = inner
            .cites
            .iter()
            .filter(|((_, dst), _)| dst == uid)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for ((src, dst), attrs) in incoming {
            inner.cites.remove(&(src.clone(), dst));
            inner.cites.insert((src, lid.to_string()), attrs);
        }
        inner.cites.retain(|(src, _), _| src != uid);
        Ok(())
    }

    async fn has_incoming_citations(&self, lid: &str) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.cites.keys().any(|(src, dst)| {
            dst == lid
                && inner
                    .literature
                    .get(src)
                    .map(|r| !r.placeholder)
                    .unwrap_or(false)
        }))
    }

    async fn candidates_by_title(
        &self,
        title: &str,
        limit: usize,
    ) -> Result<Vec<LiteratureRecord>> {
        let token = title
            .to_lowercase()
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_string()
            })
            .filter(|w| w.len() >= 4)
            .max_by_key(|w| w.len())
            .unwrap_or_default();
        if token.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().unwrap();
        Ok(inner
            .literature
            .values()
            .filter(|r| !r.placeholder && r.metadata.title.to_lowercase().contains(&token))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn neighborhood(&self, seeds: &[String], depth: u32) -> Result<GraphPayload> {
        let inner = self.inner.read().unwrap();

        let node_exists = |id: &str| {
            inner.literature.contains_key(id) || inner.unresolved.contains_key(id)
        };

        let mut included: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        for seed in seeds {
            if node_exists(seed) && included.insert(seed.clone()) {
                queue.push_back((seed.clone(), 0));
            }
        }

        while let Some((id, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            for (src, dst) in inner.cites.keys() {
                let neighbor = if src == &id {
                    dst
                } else if dst == &id {
                    src
                } else {
                    continue;
                };
                if node_exists(neighbor) && included.insert(neighbor.clone()) {
                    queue.push_back((neighbor.clone(), hops + 1));
                }
            }
        }

        let mut nodes: Vec<GraphNode> = included
            .iter()
            .map(|id| {
                if let Some(record) = inner.literature.get(id) {
                    GraphNode {
                        id: id.clone(),
                        title: record.metadata.title.clone(),
                        authors: record
                            .metadata
                            .authors
                            .iter()
                            .map(|a| a.name.clone())
                            .collect(),
                        year: record.metadata.year,
                        node_type: "literature".to_string(),
                    }
                } else {
                    let unresolved = &inner.unresolved[id];
                    GraphNode {
                        id: id.clone(),
                        title: unresolved
                            .parsed
                            .as_ref()
                            .and_then(|p| p.title.clone())
                            .unwrap_or_else(|| unresolved.raw_text.clone()),
                        authors: unresolved
                            .parsed
                            .as_ref()
                            .map(|p| p.authors.clone())
                            .unwrap_or_default(),
                        year: unresolved.parsed.as_ref().and_then(|p| p.year),
                        node_type: "unresolved".to_string(),
                    }
                }
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let edges: Vec<GraphEdge> = inner
            .cites
            .iter()
            .filter(|((src, dst), _)| included.contains(src) && included.contains(dst))
            .map(|((src, dst), (confidence, _))| GraphEdge {
                source: src.clone(),
                target: dst.clone(),
                edge_type: "cites".to_string(),
                weight: *confidence,
            })
            .collect();

        Ok(GraphPayload {
            metadata: GraphMeta {
                seed_count: seeds.len(),
                depth,
                node_count: nodes.len(),
                edge_count: edges.len(),
            },
            nodes,
            edges,
        })
    }
}
