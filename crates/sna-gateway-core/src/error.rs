use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Collaborator unreachable or the connection failed mid-response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Collaborator answered with a non-200 status code.
    #[error("Upstream rejected request with status {0}")]
    UpstreamRejected(u16),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
