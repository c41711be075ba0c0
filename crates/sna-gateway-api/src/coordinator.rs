use crate::metrics::{
    ARTIFACTS_DROPPED_TOTAL, CACHE_HITS_TOTAL, FETCHES_STARTED_TOTAL, FETCH_OUTCOMES_TOTAL,
    PAGERANK_REFRESHES_TOTAL,
};
use crate::pool::FetchPool;
use crate::upstream::{status_for_error, AnalysisBackend};
use axum::http::StatusCode;
use sna_gateway_core::{
    merge_with_table, ArtifactsResponse, CoordinatorConfig, GatewayError, IncomingStatus,
    PageRankTable, ProjectKey, ProjectMetrics, ResourceKind, Result, ResultCache, Status,
    StatusKind, StatusStore,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TIMEOUT_MSG: &str = "Upstream request timed out.";
pub const INVALID_TARGET_MSG: &str = "Project is not a valid analysis target.";

/// A lost compare-and-set means another caller changed the entry; the
/// request is re-evaluated against the new state at most this many times.
const MAX_DECISION_ROUNDS: usize = 4;

/// What a request handler should send back.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchReply<T> {
    /// Cached payload, served with 200.
    Ready(T),
    /// Status document with the HTTP code to send it under.
    Pending(StatusCode, Status),
}

enum Decision<T> {
    Reply(FetchReply<T>),
    /// Nothing usable is stored; claim the pair from the observed status kind.
    Claim(Option<StatusKind>),
    Reevaluate,
}

enum ClaimOutcome {
    Won(Status),
    /// Another caller changed the entry first.
    Lost,
    /// A fetch for the pair is still registered in the pool.
    Busy,
}

enum Precheck {
    Stored(ProjectMetrics),
    Valid,
    Rejected(StatusCode, Status),
}

/// Drives the per-request state machine and owns the background fetches.
///
/// Between the `in_progress` claim and the terminal write for a
/// (project, resource) pair no second fetch is launched: the claim is a
/// single compare-and-set on the status store.
#[derive(Clone)]
pub struct FetchCoordinator {
    statuses: Arc<dyn StatusStore>,
    cache: Arc<ResultCache>,
    ranks: Arc<PageRankTable>,
    backend: Arc<dyn AnalysisBackend>,
    pool: Arc<FetchPool>,
    config: CoordinatorConfig,
}

impl FetchCoordinator {
    pub fn new(
        statuses: Arc<dyn StatusStore>,
        cache: Arc<ResultCache>,
        ranks: Arc<PageRankTable>,
        backend: Arc<dyn AnalysisBackend>,
        config: CoordinatorConfig,
    ) -> Self {
        let pool = Arc::new(FetchPool::new(
            config.max_concurrent_fetches,
            config.fetch_timeout(),
        ));
        Self {
            statuses,
            cache,
            ranks,
            backend,
            pool,
            config,
        }
    }

    pub fn statuses(&self) -> &Arc<dyn StatusStore> {
        &self.statuses
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn ranks(&self) -> &Arc<PageRankTable> {
        &self.ranks
    }

    pub fn pool(&self) -> &Arc<FetchPool> {
        &self.pool
    }

    pub async fn project_metrics(&self, key: &ProjectKey) -> FetchReply<ProjectMetrics> {
        let resource = ResourceKind::ProjectMetrics;
        for _ in 0..MAX_DECISION_ROUNDS {
            let observed = match self.decide(key, resource, || self.cache.get_project(key)) {
                Decision::Reply(reply) => return reply,
                Decision::Reevaluate => continue,
                Decision::Claim(observed) => observed,
            };

            let claimed = match self.try_claim(key, resource, observed, "Analysing project.") {
                ClaimOutcome::Won(status) => status,
                ClaimOutcome::Lost => continue,
                ClaimOutcome::Busy => break,
            };

            if self.config.precheck_projects {
                // concurrent callers see the claim and get 202 while this one checks
                let mut guard = ClaimGuard::new(&self.statuses, key, resource);
                match self.precheck(key).await {
                    Precheck::Stored(metrics) => {
                        guard.disarm();
                        return FetchReply::Ready(metrics);
                    }
                    Precheck::Rejected(code, status) => return FetchReply::Pending(code, status),
                    Precheck::Valid => guard.disarm(),
                }
            }

            self.launch(key.clone(), resource);
            return FetchReply::Pending(StatusCode::ACCEPTED, claimed);
        }
        self.settled_reply(key, resource)
    }

    pub async fn artifact_metrics(&self, key: &ProjectKey) -> FetchReply<ArtifactsResponse> {
        let resource = ResourceKind::ArtifactMetrics;
        for _ in 0..MAX_DECISION_ROUNDS {
            let observed = match self.decide(key, resource, || self.cache.get_artifacts(key)) {
                Decision::Reply(FetchReply::Ready(graph)) => {
                    let outcome = merge_with_table(&graph, &self.ranks);
                    if !outcome.missing.is_empty() {
                        ARTIFACTS_DROPPED_TOTAL.inc_by(outcome.missing.len() as u64);
                    }
                    return FetchReply::Ready(outcome.response);
                }
                Decision::Reply(FetchReply::Pending(code, status)) => {
                    return FetchReply::Pending(code, status)
                }
                Decision::Reevaluate => continue,
                Decision::Claim(observed) => observed,
            };

            match self.try_claim(key, resource, observed, "Fetching artifacts.") {
                ClaimOutcome::Won(claimed) => {
                    self.launch(key.clone(), resource);
                    return FetchReply::Pending(StatusCode::ACCEPTED, claimed);
                }
                ClaimOutcome::Lost => continue,
                ClaimOutcome::Busy => break,
            }
        }
        self.settled_reply(key, resource)
    }

    fn decide<T>(
        &self,
        key: &ProjectKey,
        resource: ResourceKind,
        cached: impl FnOnce() -> Option<T>,
    ) -> Decision<T> {
        let current = self.statuses.get(key, resource);
        if let Some(status) = &current {
            match status.kind() {
                StatusKind::NotFound => {
                    return self.report_once(key, resource, StatusKind::NotFound, StatusCode::NOT_FOUND)
                }
                kind @ (StatusKind::Error | StatusKind::Unmapped) => {
                    return self.report_once(key, resource, kind, StatusCode::BAD_GATEWAY)
                }
                StatusKind::InProgress => {
                    debug!(project = %key, resource = %resource, "Fetch already in flight");
                    return Decision::Reply(FetchReply::Pending(
                        StatusCode::ACCEPTED,
                        status.clone(),
                    ));
                }
                StatusKind::CannotParse => {
                    return Decision::Reply(FetchReply::Pending(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        status.clone(),
                    ));
                }
                StatusKind::Complete => {}
            }
        }

        if let Some(payload) = cached() {
            debug!(project = %key, resource = %resource, "Serving from cache");
            CACHE_HITS_TOTAL.with_label_values(&[resource.as_str()]).inc();
            return Decision::Reply(FetchReply::Ready(payload));
        }

        Decision::Claim(current.map(|status| status.kind()))
    }

    /// Hands a failure status to exactly one caller and clears it so the
    /// next request starts a fresh attempt.
    fn report_once<T>(
        &self,
        key: &ProjectKey,
        resource: ResourceKind,
        kind: StatusKind,
        code: StatusCode,
    ) -> Decision<T> {
        match self.statuses.compare_and_remove(key, resource, kind) {
            Some(status) => {
                info!(project = %key, resource = %resource, status = %kind, "Reporting failure and resetting status");
                Decision::Reply(FetchReply::Pending(code, status))
            }
            None => Decision::Reevaluate,
        }
    }

    fn try_claim(
        &self,
        key: &ProjectKey,
        resource: ResourceKind,
        observed: Option<StatusKind>,
        msg: &str,
    ) -> ClaimOutcome {
        if self.pool.is_in_flight(key, resource) {
            debug!(project = %key, resource = %resource, "Previous fetch still registered");
            return ClaimOutcome::Busy;
        }
        let claimed = Status::in_progress(msg);
        if !self
            .statuses
            .compare_and_set(key, resource, observed, claimed.clone())
        {
            debug!(project = %key, resource = %resource, "Lost claim, re-evaluating");
            return ClaimOutcome::Lost;
        }
        ClaimOutcome::Won(claimed)
    }

    fn settled_reply<T>(&self, key: &ProjectKey, resource: ResourceKind) -> FetchReply<T> {
        let status = self
            .statuses
            .get(key, resource)
            .filter(|status| status.kind() == StatusKind::InProgress)
            .unwrap_or_else(|| Status::in_progress(""));
        FetchReply::Pending(StatusCode::ACCEPTED, status)
    }

    async fn precheck(&self, key: &ProjectKey) -> Precheck {
        let resource = ResourceKind::ProjectMetrics;
        match self.backend.fetch_stored_project(key).await {
            Ok(metrics) => {
                info!(project = %key, "Found stored analysis");
                self.cache.set_project(key, metrics.clone());
                self.statuses.set(key, resource, Status::complete());
                return Precheck::Stored(metrics);
            }
            Err(GatewayError::UpstreamRejected(code)) => {
                debug!(project = %key, code, "No stored analysis");
            }
            Err(err) => warn!(project = %key, error = %err, "Stored analysis lookup failed"),
        }

        match self.backend.validate_project(key).await {
            Ok(()) => Precheck::Valid,
            Err(GatewayError::UpstreamRejected(code)) => {
                info!(project = %key, code, "Project rejected as analysis target");
                Precheck::Rejected(StatusCode::NOT_FOUND, Status::not_found(INVALID_TARGET_MSG))
            }
            Err(err) => {
                warn!(project = %key, error = %err, "Project validation failed");
                Precheck::Rejected(
                    StatusCode::BAD_GATEWAY,
                    Status::error(format!("Could not validate project: {err}")),
                )
            }
        }
    }

    fn launch(&self, key: ProjectKey, resource: ResourceKind) {
        FETCHES_STARTED_TOTAL
            .with_label_values(&[resource.as_str()])
            .inc();
        info!(project = %key, resource = %resource, "Launching background fetch");

        let this = self.clone();
        let task_key = key.clone();
        let task = async move {
            match resource {
                ResourceKind::ProjectMetrics => this.run_project_fetch(&task_key).await,
                ResourceKind::ArtifactMetrics => this.run_artifact_fetch(&task_key).await,
            }
        };

        let statuses = self.statuses.clone();
        let cache = self.cache.clone();
        let timeout_key = key.clone();
        let on_timeout = move || {
            // a payload cached before the deadline is still served
            let status = if cache.contains(&timeout_key, resource) {
                Status::complete()
            } else {
                Status::error(TIMEOUT_MSG)
            };
            let kind = status.kind();
            if statuses.compare_and_set(&timeout_key, resource, Some(StatusKind::InProgress), status) {
                FETCH_OUTCOMES_TOTAL
                    .with_label_values(&[resource.as_str(), kind.as_str()])
                    .inc();
            }
        };

        if !self.pool.spawn(key, resource, task, on_timeout) {
            debug!(resource = %resource, "Registered fetch will write the outcome");
        }
    }

    async fn run_project_fetch(&self, key: &ProjectKey) {
        let resource = ResourceKind::ProjectMetrics;
        info!(project = %key, "Requesting project analysis");
        match self.backend.trigger_analysis(key).await {
            Ok(metrics) => {
                self.cache.set_project(key, metrics);
                self.finish(key, resource, Status::complete());
                info!(project = %key, "Project parsed");
            }
            Err(err) => self.fail(key, resource, err),
        }
    }

    async fn run_artifact_fetch(&self, key: &ProjectKey) {
        let resource = ResourceKind::ArtifactMetrics;
        match self.backend.fetch_artifacts(key).await {
            Ok(graph) => {
                let ranked = self.ranks.has_all(graph.artifact_ids());
                self.cache.set_artifacts(key, graph);
                // new artifacts: the global index has to include them before anyone is served
                if !ranked {
                    self.refresh_page_ranks().await;
                }
                self.finish(key, resource, Status::complete());
                info!(project = %key, "Artifacts fetched");
            }
            Err(err) => self.fail(key, resource, err),
        }
    }

    /// Replaces the whole PageRank table. Returns whether the refresh succeeded.
    pub async fn refresh_page_ranks(&self) -> bool {
        info!("Fetching pageRanks");
        match self.backend.fetch_page_ranks().await {
            Ok(table) => {
                let entries = table.len();
                self.ranks.replace(table);
                PAGERANK_REFRESHES_TOTAL.inc();
                info!(entries, "PageRank table replaced");
                true
            }
            Err(err) => {
                warn!(error = %err, "PageRank refresh failed, unranked artifacts will be dropped");
                false
            }
        }
    }

    fn fail(&self, key: &ProjectKey, resource: ResourceKind, err: GatewayError) {
        match status_for_error(resource, &err) {
            Some(status) => {
                warn!(project = %key, resource = %resource, status = %status.kind(), error = %err, "Upstream rejected fetch");
                self.finish(key, resource, status);
            }
            None => {
                warn!(project = %key, resource = %resource, error = %err, "Upstream call failed, status left in progress");
            }
        }
    }

    fn finish(&self, key: &ProjectKey, resource: ResourceKind, status: Status) {
        FETCH_OUTCOMES_TOTAL
            .with_label_values(&[resource.as_str(), status.kind().as_str()])
            .inc();
        self.statuses.set(key, resource, status);
    }

    /// Applies a progress update pushed by the SNA service.
    ///
    /// Returns the status recorded for the project, or `None` when the update
    /// was ignored. While a fetch is registered the fetch owns the terminal
    /// write, so the update only refreshes the `in_progress` message. Without
    /// one, `in_progress` and `complete` are dropped.
    pub fn apply_status_update(
        &self,
        path_key: &ProjectKey,
        incoming: IncomingStatus,
    ) -> Result<Option<Status>> {
        let key = if incoming.project_name.trim().is_empty() {
            path_key.clone()
        } else {
            ProjectKey::parse(&incoming.project_name)?
        };
        let kind: StatusKind = incoming.status.parse()?;
        let resource = ResourceKind::ProjectMetrics;
        info!(project = %key, status = %kind, msg = %incoming.msg, "Progress update");

        if self.cache.contains(&key, resource) {
            debug!(project = %key, "Project already cached, ignoring update");
            return Ok(None);
        }

        let recorded = if self.pool.is_in_flight(&key, resource) {
            let status = Status::in_progress(incoming.msg);
            self.statuses
                .compare_and_set(&key, resource, Some(StatusKind::InProgress), status.clone())
                .then_some(status)
        } else {
            match kind {
                StatusKind::InProgress | StatusKind::Complete => {
                    debug!(project = %key, status = %kind, "No fetch registered, ignoring update");
                    None
                }
                other => {
                    let status = Status::new(other, incoming.msg);
                    self.statuses.set(&key, resource, status.clone());
                    Some(status)
                }
            }
        };

        if recorded.is_some() && self.cache.contains(&key, resource) {
            self.statuses.set(&key, resource, Status::complete());
            return Ok(None);
        }
        Ok(recorded)
    }

    /// Aborts a running fetch and clears its pending status.
    pub fn cancel(&self, key: &ProjectKey, resource: ResourceKind) -> bool {
        if !self.pool.cancel(key, resource) {
            return false;
        }
        self.statuses
            .compare_and_remove(key, resource, StatusKind::InProgress);
        info!(project = %key, resource = %resource, "Fetch cancelled");
        true
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

/// Releases an `in_progress` claim when dropped armed, so an abandoned
/// request does not leave the pair claimed.
struct ClaimGuard<'a> {
    statuses: &'a Arc<dyn StatusStore>,
    key: &'a ProjectKey,
    resource: ResourceKind,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(statuses: &'a Arc<dyn StatusStore>, key: &'a ProjectKey, resource: ResourceKind) -> Self {
        Self {
            statuses,
            key,
            resource,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.statuses
                .compare_and_remove(self.key, self.resource, StatusKind::InProgress);
        }
    }
}
