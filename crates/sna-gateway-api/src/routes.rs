use crate::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/projects/{owner}/{repo}/metrics",
            get(handlers::project_metrics),
        )
        .route(
            "/artifacts/{owner}/{repo}/metrics",
            get(handlers::artifact_metrics),
        )
        .route(
            "/projects/{owner}/{repo}/status",
            post(handlers::update_status),
        )
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        )
        .with_state(state)
}
