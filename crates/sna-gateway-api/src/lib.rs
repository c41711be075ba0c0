pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pool;
pub mod routes;
pub mod server;
pub mod state;
pub mod upstream;

pub use coordinator::{FetchCoordinator, FetchReply};
pub use error::*;
pub use pool::FetchPool;
pub use routes::*;
pub use server::*;
pub use state::*;
pub use upstream::{classify, AnalysisBackend, HttpBackend};
