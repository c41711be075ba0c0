use crate::coordinator::FetchCoordinator;
use crate::upstream::{AnalysisBackend, HttpBackend};
use sna_gateway_core::{
    GatewaySettings, InMemoryStatusStore, PageRankTable, Result, ResultCache,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: FetchCoordinator,
}

impl AppState {
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&settings.upstream)?);
        Ok(Self::with_backend(&settings, backend))
    }

    /// Wires fresh in-memory stores around an arbitrary backend.
    pub fn with_backend(settings: &GatewaySettings, backend: Arc<dyn AnalysisBackend>) -> Self {
        let coordinator = FetchCoordinator::new(
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(ResultCache::new()),
            Arc::new(PageRankTable::new()),
            backend,
            settings.coordinator.clone(),
        );
        Self { coordinator }
    }
}
