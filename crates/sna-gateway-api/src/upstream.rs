use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use sna_gateway_core::{
    ArtifactGraph, GatewayError, ProjectKey, ProjectMetrics, RankTable, ResourceKind, Result,
    Status, StatusKind, UpstreamConfig,
};
use tracing::debug;

pub const STANDALONE_MSG: &str = "Project cannot be analysed as it has not been parsed and system is running in standalone mode.";
pub const INVALID_GRAPH_MSG: &str = "Cannot parse invalid project's dependency graph.";

/// Calls the gateway makes to its two collaborators.
///
/// Every non-200 answer is reported as [`GatewayError::UpstreamRejected`];
/// unreachable collaborators and undecodable bodies as
/// [`GatewayError::Transport`] / [`GatewayError::Decode`].
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// `GET {SNA}/projects/{owner}/{repo}`: previously completed analysis, if stored.
    async fn fetch_stored_project(&self, key: &ProjectKey) -> Result<ProjectMetrics>;

    /// `GET {SNA}/projects/{owner}/{repo}/valid`.
    async fn validate_project(&self, key: &ProjectKey) -> Result<()>;

    /// `POST {SNA}/analyse`; resolves once the analysis has finished.
    async fn trigger_analysis(&self, key: &ProjectKey) -> Result<ProjectMetrics>;

    /// `GET {DNA}/artifacts/{owner}/{repo}`.
    async fn fetch_artifacts(&self, key: &ProjectKey) -> Result<ArtifactGraph>;

    /// `GET {DNA}/artifacts/pageranks`.
    async fn fetch_page_ranks(&self) -> Result<RankTable>;
}

/// Status a rejected upstream answer translates into.
pub fn classify(resource: ResourceKind, code: u16) -> Status {
    match StatusCode::from_u16(code) {
        Ok(StatusCode::NOT_FOUND) => match resource {
            ResourceKind::ProjectMetrics => Status::not_found("Project not found."),
            ResourceKind::ArtifactMetrics => Status::not_found(INVALID_GRAPH_MSG),
        },
        Ok(StatusCode::INTERNAL_SERVER_ERROR) => Status::error("Upstream analysis failed."),
        Ok(StatusCode::SERVICE_UNAVAILABLE) => Status::new(StatusKind::CannotParse, STANDALONE_MSG),
        _ => Status::new(
            StatusKind::Unmapped,
            format!("Upstream answered with unexpected status {code}."),
        ),
    }
}

/// `None` means the pending status must be left untouched.
pub fn status_for_error(resource: ResourceKind, err: &GatewayError) -> Option<Status> {
    match err {
        GatewayError::UpstreamRejected(code) => Some(classify(resource, *code)),
        _ => None,
    }
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    sna_url: String,
    dna_url: String,
}

impl HttpBackend {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            "sna-gateway/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GatewayError::Configuration(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            sna_url: config.sna_url.trim_end_matches('/').to_string(),
            dna_url: config.dna_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("GET {url}: {e}")))?;
        decode(resp).await
    }
}

fn accept(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status == StatusCode::OK {
        Ok(resp)
    } else {
        Err(GatewayError::UpstreamRejected(status.as_u16()))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let resp = accept(resp)?;
    resp.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    })
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn fetch_stored_project(&self, key: &ProjectKey) -> Result<ProjectMetrics> {
        self.get_json(format!("{}/projects/{}", self.sna_url, key)).await
    }

    async fn validate_project(&self, key: &ProjectKey) -> Result<()> {
        let url = format!("{}/projects/{}/valid", self.sna_url, key);
        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("GET {url}: {e}")))?;
        accept(resp).map(|_| ())
    }

    async fn trigger_analysis(&self, key: &ProjectKey) -> Result<ProjectMetrics> {
        let url = format!("{}/analyse", self.sna_url);
        debug!("POST {} for {}", url, key);
        let resp = self
            .client
            .post(&url)
            .json(&json!({"owner": key.owner(), "repo": key.repo()}))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("POST {url}: {e}")))?;
        decode(resp).await
    }

    async fn fetch_artifacts(&self, key: &ProjectKey) -> Result<ArtifactGraph> {
        self.get_json(format!("{}/artifacts/{}", self.dna_url, key)).await
    }

    async fn fetch_page_ranks(&self) -> Result<RankTable> {
        self.get_json(format!("{}/artifacts/pageranks", self.dna_url)).await
    }
}
