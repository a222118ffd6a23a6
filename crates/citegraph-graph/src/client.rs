//! Bolt connection to the graph store plus one-time schema setup.

use citegraph_common::{Result, Settings};
use neo4rs::{query, Graph};
use tracing::info;

/// Thin wrapper owning the Bolt connection pool.
#[derive(Clone)]
pub struct GraphClient {
    pub graph: Graph,
}

impl GraphClient {
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let graph = Graph::new(
            &settings.graph_uri,
            &settings.graph_user,
            &settings.graph_password,
        )
        .await?;
        info!(uri = %settings.graph_uri, "connected to graph store");
        Ok(Self { graph })
    }

    /// Uniqueness constraints and secondary indexes. Idempotent; run at
    /// startup. Correctness relies only on the two uniqueness constraints.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT literature_lid_unique IF NOT EXISTS \
             FOR (l:Literature) REQUIRE l.lid IS UNIQUE",
            "CREATE CONSTRAINT alias_identity_unique IF NOT EXISTS \
             FOR (a:Alias) REQUIRE (a.alias_type, a.alias_value) IS UNIQUE",
            "CREATE INDEX literature_doi_index IF NOT EXISTS \
             FOR (l:Literature) ON (l.doi)",
            "CREATE INDEX literature_task_index IF NOT EXISTS \
             FOR (l:Literature) ON (l.task_id)",
            "CREATE INDEX unresolved_uid_index IF NOT EXISTS \
             FOR (u:Unresolved) ON (u.uid)",
            "CREATE TEXT INDEX literature_title_index IF NOT EXISTS \
             FOR (l:Literature) ON (l.title)",
        ];
        for stmt in statements {
            self.graph.run(query(stmt)).await?;
        }
        info!("graph schema ensured");
        Ok(())
    }
}
