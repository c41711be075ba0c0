pub mod cache;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod status;

pub use cache::*;
pub use config::{
    CoordinatorConfig, GatewaySettings, LoggingConfig, ServerConfig, UpstreamConfig,
};
pub use error::*;
pub use merge::{merge, merge_with_table, project_stats, MergeOutcome};
pub use model::*;
pub use status::*;
