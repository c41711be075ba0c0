use crate::{ArtifactGraph, ProjectKey, ProjectMetrics, Rank, RankTable, ResourceKind};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;

/// Last successfully fetched payload per project, one lock per resource kind.
///
/// Entries never expire within the process lifetime.
#[derive(Default)]
pub struct ResultCache {
    projects: RwLock<HashMap<ProjectKey, ProjectMetrics>>,
    artifacts: RwLock<HashMap<ProjectKey, ArtifactGraph>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_project(&self, key: &ProjectKey, metrics: ProjectMetrics) {
        self.projects.write().insert(key.clone(), metrics);
    }

    pub fn get_project(&self, key: &ProjectKey) -> Option<ProjectMetrics> {
        self.projects.read().get(key).cloned()
    }

    pub fn set_artifacts(&self, key: &ProjectKey, graph: ArtifactGraph) {
        self.artifacts.write().insert(key.clone(), graph);
    }

    pub fn get_artifacts(&self, key: &ProjectKey) -> Option<ArtifactGraph> {
        self.artifacts.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ProjectKey, resource: ResourceKind) -> bool {
        match resource {
            ResourceKind::ProjectMetrics => self.projects.read().contains_key(key),
            ResourceKind::ArtifactMetrics => self.artifacts.read().contains_key(key),
        }
    }

    pub fn len(&self, resource: ResourceKind) -> usize {
        match resource {
            ResourceKind::ProjectMetrics => self.projects.read().len(),
            ResourceKind::ArtifactMetrics => self.artifacts.read().len(),
        }
    }
}

/// Global artifact id → rank index, only ever replaced as a whole.
#[derive(Default)]
pub struct PageRankTable {
    ranks: RwLock<RankTable>,
}

impl PageRankTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ranks(ranks: RankTable) -> Self {
        Self {
            ranks: RwLock::new(ranks),
        }
    }

    /// Swaps in a freshly fetched table. Stale ids are not carried over.
    pub fn replace(&self, ranks: RankTable) {
        *self.ranks.write() = ranks;
    }

    pub fn get(&self, artifact_id: &str) -> Option<Rank> {
        self.ranks.read().get(artifact_id).copied()
    }

    pub fn has_all<'a>(&self, artifact_ids: impl IntoIterator<Item = &'a str>) -> bool {
        let ranks = self.ranks.read();
        artifact_ids.into_iter().all(|id| ranks.contains_key(id))
    }

    /// Holds the table lock for as long as the guard lives.
    pub fn read(&self) -> RwLockReadGuard<'_, RankTable> {
        self.ranks.read()
    }

    pub fn len(&self) -> usize {
        self.ranks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
