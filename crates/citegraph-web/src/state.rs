//! Shared application state for the web server.

use std::sync::Arc;

use citegraph_common::Settings;
use citegraph_graph::GraphRepository;
use citegraph_ingestion::{PipelineServices, TaskCoordinator, TaskRegistry};

/// State injected into every handler. All services are constructed once at
/// startup and shared; handlers never build their own clients.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<PipelineServices>,
    pub coordinator: Arc<TaskCoordinator>,
}

impl AppState {
    pub fn new(services: Arc<PipelineServices>, coordinator: Arc<TaskCoordinator>) -> Self {
        Self {
            services,
            coordinator,
        }
    }

    pub fn graph(&self) -> &Arc<dyn GraphRepository> {
        &self.services.graph
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.services.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.services.settings
    }
}

pub type SharedState = Arc<AppState>;
