//! Rank-merge: joins a project's raw dependency graph against the global
//! PageRank table to produce the ranked lists clients see.

use crate::{
    ArtifactGraph, ArtifactMap, ArtifactStats, ArtifactsResponse, PageRankTable,
    ProjectArtifactsStats, RankTable,
};
use tracing::warn;

/// Result of a merge. `missing` lists every artifact id dropped because the
/// table had no entry for it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub response: ArtifactsResponse,
    pub missing: Vec<String>,
}

/// Merges against the shared table, holding its lock for the whole merge so
/// all four lists see the same snapshot.
pub fn merge_with_table(graph: &ArtifactGraph, table: &PageRankTable) -> MergeOutcome {
    let ranks = table.read();
    merge(graph, &ranks)
}

pub fn merge(graph: &ArtifactGraph, ranks: &RankTable) -> MergeOutcome {
    let mut missing = Vec::new();
    let mut response = ArtifactsResponse {
        artifacts: add_rank(&graph.artifacts, ranks, &mut missing),
        direct_dependencies: add_rank(&graph.direct_dependencies, ranks, &mut missing),
        transitive_dependencies: add_rank(&graph.transitive_dependencies, ranks, &mut missing),
        dependents: add_rank(&graph.dependents, ranks, &mut missing),
        ..Default::default()
    };
    response.project_stats = project_stats(&response);
    MergeOutcome { response, missing }
}

fn add_rank(
    artifacts: &ArtifactMap,
    ranks: &RankTable,
    missing: &mut Vec<String>,
) -> Vec<ArtifactStats> {
    let mut ranked = Vec::with_capacity(artifacts.len());
    for (id, artifact) in artifacts {
        match ranks.get(id) {
            Some(rank) => ranked.push(ArtifactStats {
                page_rank: rank.pagerank,
                overall_rank: rank.overall_rank,
                ..artifact.clone()
            }),
            None => {
                warn!(artifact_id = %id, "PageRank not found for artifact, dropping it");
                missing.push(id.clone());
            }
        }
    }
    ranked
}

/// Aggregate stats over a merged response.
///
/// `max_rank` keeps the historical scan: it starts at -1 and is replaced by
/// any rank smaller than the current value, so it ends up holding the
/// lowest overall rank among the project's own artifacts.
pub fn project_stats(response: &ArtifactsResponse) -> ProjectArtifactsStats {
    let mut max = -1;
    for artifact in &response.artifacts {
        if artifact.overall_rank < max || max == -1 {
            max = artifact.overall_rank;
        }
    }
    ProjectArtifactsStats {
        max_rank: max,
        num_of_direct_dependencies: response.direct_dependencies.len(),
        num_of_transitive_dependencies: response.transitive_dependencies.len(),
        num_of_dependents: response.dependents.len(),
    }
}
