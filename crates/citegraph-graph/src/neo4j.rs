//! Neo4j-backed [`GraphRepository`] implementation.
//!
//! One parameterized Cypher statement per operation; each statement runs in
//! its own transaction. Structured fields (author lists, references, task
//! snapshots) are stored as JSON string properties next to the flat,
//! indexed scalars.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use citegraph_common::entities::{
    ContentRecord, IdentifierSet, LiteratureMetadata, LiteratureRecord, ParsedReference,
};
use citegraph_common::Result;
use neo4rs::query;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::GraphClient;
use crate::{
    AliasType, CitationTarget, GraphEdge, GraphMeta, GraphNode, GraphPayload, GraphRepository,
    LiteratureCandidate, UpsertOutcome,
};

#[derive(Clone)]
pub struct Neo4jGraphStore {
    client: GraphClient,
}

impl Neo4jGraphStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn fetch_nodes(&self, ids: &[String]) -> Result<Vec<GraphNode>> {
        let q = query(
            "MATCH (n)
             WHERE (n:Literature OR n:Unresolved) AND coalesce(n.lid, n.uid) IN $ids
             RETURN coalesce(n.lid, n.uid) AS id,
                    coalesce(n.title, '') AS title,
                    coalesce(n.authors, []) AS authors,
                    coalesce(n.year, 0) AS year,
                    'Unresolved' IN labels(n) AS unresolved",
        )
        .param("ids", ids.to_vec());

        let mut stream = self.client.graph.execute(q).await?;
        let mut nodes = Vec::new();
        while let Some(row) = stream.next().await? {
            let year: i64 = row.get("year").unwrap_or(0);
            nodes.push(GraphNode {
                id: row.get::<String>("id").unwrap_or_default(),
                title: row.get::<String>("title").unwrap_or_default(),
                authors: row.get::<Vec<String>>("authors").unwrap_or_default(),
                year: (year > 0).then_some(year as i32),
                node_type: if row.get::<bool>("unresolved").unwrap_or(false) {
                    "unresolved".to_string()
                } else {
                    "literature".to_string()
                },
            });
        }
        Ok(nodes)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl GraphRepository for Neo4jGraphStore {
    async fn upsert_literature(&self, candidate: &LiteratureCandidate) -> Result<UpsertOutcome> {
        let now = now_rfc3339();
        let metadata_json = serde_json::to_string(&candidate.metadata)?;
        let content_json = serde_json::to_string(&candidate.content)?;
        let references_json = serde_json::to_string(&candidate.references)?;
        let task_info_json = serde_json::to_string(&candidate.task_info)?;
        let authors: Vec<String> = candidate
            .metadata
            .authors
            .iter()
            .map(|a| a.name.clone())
            .collect();

        let q = query(
            "MERGE (l:Literature {lid: $lid})
             ON CREATE SET l.created_at = $now
             SET l.updated_at = $now,
                 l.title = $title,
                 l.authors = $authors,
                 l.year = $year,
                 l.doi = $doi,
                 l.arxiv_id = $arxiv_id,
                 l.pmid = $pmid,
                 l.fingerprint = $fingerprint,
                 l.source_urls = $source_urls,
                 l.placeholder = false,
                 l.metadata_json = $metadata_json,
                 l.content_json = $content_json,
                 l.references_json = $references_json,
                 l.task_info_json = $task_info_json,
                 l.task_id = $task_id
             RETURN l.created_at = $now AS created",
        )
        .param("lid", candidate.lid.as_str())
        .param("now", now.as_str())
        .param("title", candidate.metadata.title.as_str())
        .param("authors", authors)
        .param(
            "year",
            candidate.metadata.year.map(|y| y as i64).unwrap_or(0),
        )
        .param(
            "doi",
            candidate.identifiers.doi.clone().unwrap_or_default(),
        )
        .param(
            "arxiv_id",
            candidate.identifiers.arxiv_id.clone().unwrap_or_default(),
        )
        .param(
            "pmid",
            candidate.identifiers.pmid.clone().unwrap_or_default(),
        )
        .param(
            "fingerprint",
            candidate.identifiers.fingerprint.clone().unwrap_or_default(),
        )
        .param("source_urls", candidate.identifiers.source_urls.clone())
        .param("metadata_json", metadata_json)
        .param("content_json", content_json)
        .param("references_json", references_json)
        .param("task_info_json", task_info_json)
        .param(
            "task_id",
            candidate.task_info["task_id"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        );

        let mut stream = self.client.graph.execute(q).await?;
        let created = match stream.next().await? {
            Some(row) => row.get::<bool>("created").unwrap_or(false),
            None => false,
        };

        info!(lid = %candidate.lid, created, "literature upserted");
        Ok(UpsertOutcome {
            lid: candidate.lid.clone(),
            created,
        })
    }

    async fn get_literature(&self, lid: &str) -> Result<Option<LiteratureRecord>> {
        let q = query(
            "MATCH (l:Literature {lid: $lid})
             RETURN l.lid AS lid,
                    coalesce(l.doi, '') AS doi,
                    coalesce(l.arxiv_id, '') AS arxiv_id,
                    coalesce(l.pmid, '') AS pmid,
                    coalesce(l.fingerprint, '') AS fingerprint,
                    coalesce(l.source_urls, []) AS source_urls,
                    coalesce(l.metadata_json, '') AS metadata_json,
                    coalesce(l.content_json, '') AS content_json,
                    coalesce(l.references_json, '') AS references_json,
                    coalesce(l.task_info_json, '') AS task_info_json,
                    coalesce(l.placeholder, false) AS placeholder,
                    coalesce(l.created_at, '') AS created_at,
                    coalesce(l.updated_at, '') AS updated_at",
        )
        .param("lid", lid);

        let mut stream = self.client.graph.execute(q).await?;
        let Some(row) = stream.next().await? else {
            return Ok(None);
        };

        let opt = |s: String| if s.is_empty() { None } else { Some(s) };
        let metadata: LiteratureMetadata = row
            .get::<String>("metadata_json")
            .ok()
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let content: ContentRecord = row
            .get::<String>("content_json")
            .ok()
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let references = row
            .get::<String>("references_json")
            .ok()
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(Some(LiteratureRecord {
            lid: row.get::<String>("lid").unwrap_or_default(),
            identifiers: IdentifierSet {
                doi: opt(row.get::<String>("doi").unwrap_or_default()),
                arxiv_id: opt(row.get::<String>("arxiv_id").unwrap_or_default()),
                pmid: opt(row.get::<String>("pmid").unwrap_or_default()),
                fingerprint: opt(row.get::<String>("fingerprint").unwrap_or_default()),
                source_urls: row.get::<Vec<String>>("source_urls").unwrap_or_default(),
            },
            metadata,
            content,
            references,
            task_info: row
                .get::<String>("task_info_json")
                .ok()
                .filter(|s| !s.is_empty())
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
            placeholder: row.get::<bool>("placeholder").unwrap_or(false),
            created_at: parse_time(&row.get::<String>("created_at").unwrap_or_default()),
            updated_at: parse_time(&row.get::<String>("updated_at").unwrap_or_default()),
        }))
    }

    async fn batch_get(&self, lids: &[String]) -> Result<Vec<LiteratureRecord>> {
        let mut records = Vec::with_capacity(lids.len());
        for lid in lids {
            if let Some(record) = self.get_literature(lid).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn create_placeholder(&self, lid: &str, task_id: &str) -> Result<()> {
        let q = query(
            "MERGE (l:Literature {lid: $lid})
             ON CREATE SET l.created_at = $now
             SET l.updated_at = $now,
                 l.title = 'Processing...',
                 l.placeholder = true,
                 l.task_id = $task_id",
        )
        .param("lid", lid)
        .param("now", now_rfc3339())
        .param("task_id", task_id);
        self.client.graph.run(q).await?;
        debug!(lid, task_id, "placeholder created");
        Ok(())
    }

    async fn set_task_info(&self, lid: &str, task_info: serde_json::Value) -> Result<()> {
        let q = query(
            "MATCH (l:Literature {lid: $lid})
             SET l.task_info_json = $task_info_json, l.updated_at = $now",
        )
        .param("lid", lid)
        .param("task_info_json", serde_json::to_string(&task_info)?)
        .param("now", now_rfc3339());
        self.client.graph.run(q).await?;
        Ok(())
    }

    async fn delete_literature(&self, lid: &str) -> Result<()> {
        let q = query(
            "MATCH (l:Literature {lid: $lid})
             OPTIONAL MATCH (a:Alias)-[:IDENTIFIES]->(l)
             DETACH DELETE a, l",
        )
        .param("lid", lid);
        self.client.graph.run(q).await?;
        warn!(lid, "literature deleted with aliases");
        Ok(())
    }

    async fn add_alias(&self, lid: &str, alias_type: AliasType, value: &str) -> Result<()> {
        let q = query(
            "MATCH (l:Literature {lid: $lid})
             MERGE (a:Alias {alias_type: $alias_type, alias_value: $alias_value})
             ON CREATE SET a.created_at = $now
             MERGE (a)-[:IDENTIFIES]->(l)",
        )
        .param("lid", lid)
        .param("alias_type", alias_type.as_str())
        .param("alias_value", value)
        .param("now", now_rfc3339());
        self.client.graph.run(q).await?;
        Ok(())
    }

    async fn resolve_alias(&self, alias_type: AliasType, value: &str) -> Result<Option<String>> {
        let q = query(
            "MATCH (a:Alias {alias_type: $alias_type, alias_value: $alias_value})
                   -[:IDENTIFIES]->(l:Literature)
             RETURN l.lid AS lid",
        )
        .param("alias_type", alias_type.as_str())
        .param("alias_value", value);

        let mut stream = self.client.graph.execute(q).await?;
        Ok(match stream.next().await? {
            Some(row) => row.get::<String>("lid").ok(),
            None => None,
        })
    }

    async fn claim_alias(&self, alias_type: AliasType, value: &str, lid: &str) -> Result<String> {
        // Single statement so the MERGE and the ownership check commit
        // atomically; the loser of a concurrent race reads the winner's LID.
        let q = query(
            "MERGE (a:Alias {alias_type: $alias_type, alias_value: $alias_value})
             ON CREATE SET a.created_at = $now
             WITH a
             OPTIONAL MATCH (a)-[:IDENTIFIES]->(existing:Literature)
             WITH a, existing
             FOREACH (_ IN CASE WHEN existing IS NULL THEN [1] ELSE [] END |
                 MERGE (l:Literature {lid: $lid})
                 MERGE (a)-[:IDENTIFIES]->(l))
             RETURN coalesce(existing.lid, $lid) AS lid",
        )
        .param("alias_type", alias_type.as_str())
        .param("alias_value", value)
        .param("lid", lid)
        .param("now", now_rfc3339());

        let mut stream = self.client.graph.execute(q).await?;
        let winner = match stream.next().await? {
            Some(row) => row.get::<String>("lid").unwrap_or_else(|_| lid.to_string()),
            None => lid.to_string(),
        };
        if winner != lid {
            debug!(alias_type = %alias_type, value, winner = %winner, "alias already claimed");
        }
        Ok(winner)
    }

    async fn aliases_of(&self, lid: &str) -> Result<Vec<(AliasType, String)>> {
        let q = query(
            "MATCH (a:Alias)-[:IDENTIFIES]->(l:Literature {lid: $lid})
             RETURN a.alias_type AS alias_type, a.alias_value AS alias_value",
        )
        .param("lid", lid);

        let mut stream = self.client.graph.execute(q).await?;
        let mut aliases = Vec::new();
        while let Some(row) = stream.next().await? {
            let t = row.get::<String>("alias_type").unwrap_or_default();
            let v = row.get::<String>("alias_value").unwrap_or_default();
            if let Some(alias_type) = AliasType::parse(&t) {
                aliases.push((alias_type, v));
            }
        }
        Ok(aliases)
    }

    async fn link_cites(
        &self,
        src_lid: &str,
        target: &CitationTarget,
        confidence: f64,
        source: &str,
    ) -> Result<()> {
        let cypher = match target {
            CitationTarget::Literature(_) => {
                "MATCH (src:Literature {lid: $src})
                 MATCH (dst:Literature {lid: $dst})
                 MERGE (src)-[r:CITES]->(dst)
                 SET r.confidence = $confidence, r.source = $source"
            }
            CitationTarget::Unresolved(_) => {
                "MATCH (src:Literature {lid: $src})
                 MATCH (dst:Unresolved {uid: $dst})
                 MERGE (src)-[r:CITES]->(dst)
                 SET r.confidence = $confidence, r.source = $source"
            }
        };
        let q = query(cypher)
            .param("src", src_lid)
            .param("dst", target.id())
            .param("confidence", confidence)
            .param("source", source);
        self.client.graph.run(q).await?;
        Ok(())
    }

    async fn create_unresolved(
        &self,
        raw_text: &str,
        parsed: Option<&ParsedReference>,
        fingerprint: Option<&str>,
    ) -> Result<String> {
        let uid = format!("u-{}", Uuid::new_v4());
        let title = parsed.and_then(|p| p.title.clone()).unwrap_or_default();
        let authors: Vec<String> = parsed.map(|p| p.authors.clone()).unwrap_or_default();
        let year = parsed.and_then(|p| p.year).map(|y| y as i64).unwrap_or(0);
        let doi = parsed.and_then(|p| p.doi.clone()).unwrap_or_default();
        let arxiv_id = parsed.and_then(|p| p.arxiv_id.clone()).unwrap_or_default();
        let parsed_json = match parsed {
            Some(p) => serde_json::to_string(p)?,
            None => String::new(),
        };

        let q = query(
            "CREATE (u:Unresolved {
                 uid: $uid,
                 raw_text: $raw_text,
                 title: $title,
                 authors: $authors,
                 year: $year,
                 doi: $doi,
                 arxiv_id: $arxiv_id,
                 fingerprint: $fingerprint,
                 parsed_json: $parsed_json,
                 created_at: $now
             })",
        )
        .param("uid", uid.as_str())
        .param("raw_text", raw_text)
        .param("title", title)
        .param("authors", authors)
        .param("year", year)
        .param("doi", doi)
        .param("arxiv_id", arxiv_id)
        .param("fingerprint", fingerprint.unwrap_or_default())
        .param("parsed_json", parsed_json)
        .param("now", now_rfc3339());
        self.client.graph.run(q).await?;
        debug!(uid = %uid, "unresolved node created");
        Ok(uid)
    }

    async fn find_unresolved_matching(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<Vec<String>> {
        if doi.is_none() && arxiv_id.is_none() && fingerprint.is_none() {
            return Ok(Vec::new());
        }
        let q = query(
            "MATCH (u:Unresolved)
             WHERE ($doi <> '' AND u.doi = $doi)
                OR ($arxiv_id <> '' AND u.arxiv_id = $arxiv_id)
                OR ($fingerprint <> '' AND u.fingerprint = $fingerprint)
             RETURN u.uid AS uid",
        )
        .param("doi", doi.unwrap_or_default())
        .param("arxiv_id", arxiv_id.unwrap_or_default())
        .param("fingerprint", fingerprint.unwrap_or_default());

        let mut stream = self.client.graph.execute(q).await?;
        let mut uids = Vec::new();
        while let Some(row) = stream.next().await? {
            if let Ok(uid) = row.get::<String>("uid") {
                uids.push(uid);
            }
        }
        Ok(uids)
    }

    async fn promote_unresolved(&self, uid: &str, lid: &str) -> Result<()> {
        // Relabel in place; every incident relationship survives untouched.
        let q = query(
            "MATCH (u:Unresolved {uid: $uid})
             REMOVE u:Unresolved
             SET u:Literature,
                 u.lid = $lid,
                 u.placeholder = false,
                 u.created_at = coalesce(u.created_at, $now),
                 u.updated_at = $now",
        )
        .param("uid", uid)
        .param("lid", lid)
        .param("now", now_rfc3339());
        self.client.graph.run(q).await?;
        info!(uid, lid, "unresolved promoted to literature");
        Ok(())
    }

    async fn merge_unresolved_into(&self, uid: &str, lid: &str) -> Result<()> {
        let q = query(
            "MATCH (u:Unresolved {uid: $uid})
             MATCH (l:Literature {lid: $lid})
             OPTIONAL MATCH (src)-[r:CITES]->(u)
             FOREACH (_ IN CASE WHEN src IS NULL THEN [] ELSE [1] END |
                 MERGE (src)-[nr:CITES]->(l)
                 SET nr.confidence = coalesce(r.confidence, 1.0),
                     nr.source = coalesce(r.source, 'merged'))
             DETACH DELETE u",
        )
        .param("uid", uid)
        .param("lid", lid);
        self.client.graph.run(q).await?;
        debug!(uid, lid, "unresolved merged into literature");
        Ok(())
    }

    async fn has_incoming_citations(&self, lid: &str) -> Result<bool> {
        let q = query(
            "MATCH (src:Literature)-[:CITES]->(l:Literature {lid: $lid})
             WHERE coalesce(src.placeholder, false) = false
             RETURN count(src) > 0 AS cited",
        )
        .param("lid", lid);
        let mut stream = self.client.graph.execute(q).await?;
        Ok(match stream.next().await? {
            Some(row) => row.get::<bool>("cited").unwrap_or(false),
            None => false,
        })
    }

    async fn candidates_by_title(
        &self,
        title: &str,
        limit: usize,
    ) -> Result<Vec<LiteratureRecord>> {
        // Probe the text index with the longest significant token; scoring
        // happens in the citation linker.
        let token = title
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| w.len() >= 4)
            .max_by_key(|w| w.len())
            .unwrap_or_default();
        if token.is_empty() {
            return Ok(Vec::new());
        }

        let q = query(
            "MATCH (l:Literature)
             WHERE toLower(l.title) CONTAINS $token
               AND coalesce(l.placeholder, false) = false
             RETURN l.lid AS lid
             LIMIT $limit",
        )
        .param("token", token)
        .param("limit", limit as i64);

        let mut stream = self.client.graph.execute(q).await?;
        let mut lids = Vec::new();
        while let Some(row) = stream.next().await? {
            if let Ok(lid) = row.get::<String>("lid") {
                lids.push(lid);
            }
        }
        self.batch_get(&lids).await
    }

    async fn neighborhood(&self, seeds: &[String], depth: u32) -> Result<GraphPayload> {
        let mut known: HashMap<String, GraphNode> = HashMap::new();
        for node in self.fetch_nodes(seeds).await? {
            known.insert(node.id.clone(), node);
        }

        let mut frontier: Vec<String> = known.keys().cloned().collect();
        for _hop in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let q = query(
                "MATCH (n)-[:CITES]-(m)
                 WHERE (n:Literature OR n:Unresolved)
                   AND coalesce(n.lid, n.uid) IN $frontier
                   AND (m:Literature OR m:Unresolved)
                 RETURN DISTINCT coalesce(m.lid, m.uid) AS id,
                        coalesce(m.title, '') AS title,
                        coalesce(m.authors, []) AS authors,
                        coalesce(m.year, 0) AS year,
                        'Unresolved' IN labels(m) AS unresolved",
            )
            .param("frontier", frontier.clone());

            let mut stream = self.client.graph.execute(q).await?;
            let mut next_frontier = Vec::new();
            while let Some(row) = stream.next().await? {
                let id: String = row.get("id").unwrap_or_default();
                if id.is_empty() || known.contains_key(&id) {
                    continue;
                }
                let year: i64 = row.get("year").unwrap_or(0);
                known.insert(
                    id.clone(),
                    GraphNode {
                        id: id.clone(),
                        title: row.get::<String>("title").unwrap_or_default(),
                        authors: row.get::<Vec<String>>("authors").unwrap_or_default(),
                        year: (year > 0).then_some(year as i32),
                        node_type: if row.get::<bool>("unresolved").unwrap_or(false) {
                            "unresolved".to_string()
                        } else {
                            "literature".to_string()
                        },
                    },
                );
                next_frontier.push(id);
            }
            frontier = next_frontier;
        }

        let ids: Vec<String> = known.keys().cloned().collect();
        let id_set: HashSet<&String> = ids.iter().collect();

        let q = query(
            "MATCH (a)-[r:CITES]->(b)
             WHERE coalesce(a.lid, a.uid) IN $ids
               AND coalesce(b.lid, b.uid) IN $ids
             RETURN coalesce(a.lid, a.uid) AS source,
                    coalesce(b.lid, b.uid) AS target,
                    coalesce(r.confidence, 1.0) AS weight",
        )
        .param("ids", ids.clone());

        let mut stream = self.client.graph.execute(q).await?;
        let mut edges = Vec::new();
        while let Some(row) = stream.next().await? {
            let source: String = row.get("source").unwrap_or_default();
            let target: String = row.get("target").unwrap_or_default();
            if !id_set.contains(&source) || !id_set.contains(&target) {
                continue;
            }
            edges.push(GraphEdge {
                source,
                target,
                edge_type: "cites".to_string(),
                weight: row.get::<f64>("weight").unwrap_or(1.0),
            });
        }

        let mut nodes: Vec<GraphNode> = known.into_values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

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
