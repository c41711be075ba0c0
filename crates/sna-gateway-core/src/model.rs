use crate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// `owner/repo` identifier used as the key of every cache and status map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProjectKey(String);

impl ProjectKey {
    pub fn new(owner: &str, repo: &str) -> Result<Self> {
        let owner = owner.trim();
        let repo = repo.trim();
        if owner.is_empty() || repo.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "owner and repo must both be non-empty".to_string(),
            ));
        }
        if owner.contains('/') || repo.contains('/') {
            return Err(GatewayError::InvalidRequest(format!(
                "owner and repo may not contain '/': {owner}/{repo}"
            )));
        }
        Ok(Self(format!("{owner}/{repo}")))
    }

    pub fn parse(project_name: &str) -> Result<Self> {
        let (owner, repo) = project_name.split_once('/').ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "project name must be of the form owner/repo: {project_name}"
            ))
        })?;
        Self::new(owner, repo)
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(owner, _)| owner).unwrap_or(&self.0)
    }

    pub fn repo(&self) -> &str {
        self.0.split_once('/').map(|(_, repo)| repo).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two independently cached analysis products of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ProjectMetrics,
    ArtifactMetrics,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ProjectMetrics => "project_metrics",
            ResourceKind::ArtifactMetrics => "artifact_metrics",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    NotFound,
    InProgress,
    Complete,
    Error,
    CannotParse,
    /// Upstream answered with a code outside the mapping table.
    Unmapped,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::NotFound => "not_found",
            StatusKind::InProgress => "in_progress",
            StatusKind::Complete => "complete",
            StatusKind::Error => "error",
            StatusKind::CannotParse => "cannot_parse",
            StatusKind::Unmapped => "unmapped",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_found" => Ok(StatusKind::NotFound),
            "in_progress" => Ok(StatusKind::InProgress),
            "complete" => Ok(StatusKind::Complete),
            "error" => Ok(StatusKind::Error),
            "cannot_parse" => Ok(StatusKind::CannotParse),
            "unmapped" => Ok(StatusKind::Unmapped),
            other => Err(GatewayError::Decode(format!("unknown status: {other}"))),
        }
    }
}

/// What a concurrent caller should be told right now about a (project, resource) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: StatusKind,
    #[serde(default)]
    pub msg: String,
}

impl Status {
    pub fn new(status: StatusKind, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
        }
    }

    pub fn in_progress(msg: impl Into<String>) -> Self {
        Self::new(StatusKind::InProgress, msg)
    }

    pub fn complete() -> Self {
        Self::new(StatusKind::Complete, "")
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusKind::NotFound, msg)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, msg)
    }

    pub fn kind(&self) -> StatusKind {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status != StatusKind::InProgress
    }
}

/// Body pushed by the SNA service to the status callback endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingStatus {
    pub status: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub project_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStats {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub internal_id: i64,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub network_comp: f32,
    #[serde(default)]
    pub code_churn: f32,
    #[serde(default)]
    pub network_comp_msg: String,
    #[serde(default)]
    pub code_churn_msg: String,
}

/// Shared shape of package, class/interface and method stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentStats {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub internal_id: i64,
    #[serde(default)]
    pub network_comp: f32,
}

pub type PackageStats = ComponentStats;
pub type ClassOrInterfaceStats = ComponentStats;
pub type MethodStats = ComponentStats;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetrics {
    #[serde(rename = "Project", default)]
    pub project: ProjectStats,
    #[serde(rename = "Package", default)]
    pub packages: Vec<PackageStats>,
    #[serde(rename = "ClassOrInterface", default)]
    pub class_or_interfaces: Vec<ClassOrInterfaceStats>,
    #[serde(rename = "Method", default)]
    pub methods: Vec<MethodStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactStats {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub artifact: String,
    #[serde(default)]
    pub group: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub internal_id: i64,
    #[serde(default)]
    pub page_rank: f32,
    #[serde(default)]
    pub overall_rank: i64,
}

/// Artifact collections keyed by artifact id; ordered so merged output is deterministic.
pub type ArtifactMap = BTreeMap<String, ArtifactStats>;

/// Raw dependency graph of a project as returned by the DNA service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactGraph {
    #[serde(rename = "Artifact", default)]
    pub artifacts: ArtifactMap,
    #[serde(rename = "DirectDependency", default)]
    pub direct_dependencies: ArtifactMap,
    #[serde(rename = "TransitiveDependency", default)]
    pub transitive_dependencies: ArtifactMap,
    #[serde(rename = "Dependent", default)]
    pub dependents: ArtifactMap,
}

impl ArtifactGraph {
    /// Every artifact id appearing in any of the four collections.
    pub fn artifact_ids(&self) -> impl Iterator<Item = &str> {
        self.artifacts
            .keys()
            .chain(self.direct_dependencies.keys())
            .chain(self.transitive_dependencies.keys())
            .chain(self.dependents.keys())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rank {
    #[serde(default)]
    pub overall_rank: i64,
    #[serde(default)]
    pub pagerank: f32,
}

pub type RankTable = HashMap<String, Rank>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectArtifactsStats {
    pub max_rank: i64,
    pub num_of_direct_dependencies: usize,
    pub num_of_transitive_dependencies: usize,
    pub num_of_dependents: usize,
}

/// Rank-merged artifact metrics as served to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsResponse {
    #[serde(rename = "ProjectStats")]
    pub project_stats: ProjectArtifactsStats,
    #[serde(rename = "Artifact")]
    pub artifacts: Vec<ArtifactStats>,
    #[serde(rename = "DirectDependency")]
    pub direct_dependencies: Vec<ArtifactStats>,
    #[serde(rename = "TransitiveDependency")]
    pub transitive_dependencies: Vec<ArtifactStats>,
    #[serde(rename = "Dependent")]
    pub dependents: Vec<ArtifactStats>,
}
