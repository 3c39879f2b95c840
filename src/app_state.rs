use std::sync::Arc;

use crate::services::{job_store::JobStore, orchestrator::Orchestrator};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobStore>,
    pub orchestrator: Arc<Orchestrator>,
    /// Default window for the admin cleanup endpoint.
    pub retention_days: u32,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, retention_days: u32) -> Self {
        Self {
            jobs: Arc::clone(orchestrator.store()),
            orchestrator,
            retention_days,
        }
    }
}
