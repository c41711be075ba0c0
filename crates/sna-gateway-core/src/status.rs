use crate::{ProjectKey, ResourceKind, Status, StatusKind};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Status Registry: one status per (project, resource kind).
///
/// The conditional operations compare on [`StatusKind`] only; the message is
/// informational. Implementations must make each call atomic with respect to
/// every other call on the same resource kind.
pub trait StatusStore: Send + Sync {
    fn get(&self, key: &ProjectKey, resource: ResourceKind) -> Option<Status>;

    /// Unconditionally overwrites the entry.
    fn set(&self, key: &ProjectKey, resource: ResourceKind, status: Status);

    /// Writes `status` only when the current entry's kind equals `expected`
    /// (`None` meaning no entry). Returns whether the write happened.
    fn compare_and_set(
        &self,
        key: &ProjectKey,
        resource: ResourceKind,
        expected: Option<StatusKind>,
        status: Status,
    ) -> bool;

    /// Removes and returns the entry only when its kind equals `expected`.
    fn compare_and_remove(
        &self,
        key: &ProjectKey,
        resource: ResourceKind,
        expected: StatusKind,
    ) -> Option<Status>;

    fn remove(&self, key: &ProjectKey, resource: ResourceKind) -> Option<Status>;
}

/// Process-lifetime status registry with one lock per resource kind.
#[derive(Default)]
pub struct InMemoryStatusStore {
    projects: RwLock<HashMap<ProjectKey, Status>>,
    artifacts: RwLock<HashMap<ProjectKey, Status>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, resource: ResourceKind) -> &RwLock<HashMap<ProjectKey, Status>> {
        match resource {
            ResourceKind::ProjectMetrics => &self.projects,
            ResourceKind::ArtifactMetrics => &self.artifacts,
        }
    }

    pub fn len(&self, resource: ResourceKind) -> usize {
        self.map(resource).read().len()
    }

    pub fn is_empty(&self, resource: ResourceKind) -> bool {
        self.len(resource) == 0
    }
}

impl StatusStore for InMemoryStatusStore {
    fn get(&self, key: &ProjectKey, resource: ResourceKind) -> Option<Status> {
        self.map(resource).read().get(key).cloned()
    }

    fn set(&self, key: &ProjectKey, resource: ResourceKind, status: Status) {
        self.map(resource).write().insert(key.clone(), status);
    }

    fn compare_and_set(
        &self,
        key: &ProjectKey,
        resource: ResourceKind,
        expected: Option<StatusKind>,
        status: Status,
    ) -> bool {
        let mut map = self.map(resource).write();
        let current = map.get(key).map(Status::kind);
        if current != expected {
            return false;
        }
        map.insert(key.clone(), status);
        true
    }

    fn compare_and_remove(
        &self,
        key: &ProjectKey,
        resource: ResourceKind,
        expected: StatusKind,
    ) -> Option<Status> {
        let mut map = self.map(resource).write();
        match map.get(key) {
            Some(current) if current.kind() == expected => map.remove(key),
            _ => None,
        }
    }

    fn remove(&self, key: &ProjectKey, resource: ResourceKind) -> Option<Status> {
        self.map(resource).write().remove(key)
    }
}
