use axum::{
    extract::Path,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};
use sna_gateway_api::{create_router, AppState};
use sna_gateway_core::GatewaySettings;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Calls {
    analyses: AtomicUsize,
    artifacts: AtomicUsize,
    page_ranks: AtomicUsize,
}

/// SNA and DNA collaborators on one ephemeral port.
async fn collaborators(calls: Arc<Calls>) -> String {
    let analyse_calls = calls.clone();
    let artifact_calls = calls.clone();
    let rank_calls = calls;

    let router = Router::new()
        .route(
            "/analyse",
            post(move |Json(body): Json<Value>| {
                let calls = analyse_calls.clone();
                async move {
                    calls.analyses.fetch_add(1, Ordering::SeqCst);
                    let id = format!(
                        "{}/{}",
                        body["owner"].as_str().unwrap_or_default(),
                        body["repo"].as_str().unwrap_or_default()
                    );
                    Json(json!({
                        "Project": {"id": id, "type": "project", "network_comp": 0.25},
                        "Package": [{"id": "p1", "name": "core", "network_comp": 0.1}]
                    }))
                }
            }),
        )
        .route(
            "/artifacts/pageranks",
            get(move || {
                let calls = rank_calls.clone();
                async move {
                    calls.page_ranks.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"x": {"pagerank": 0.5, "overall_rank": 3}}))
                }
            }),
        )
        .route(
            "/artifacts/{owner}/{repo}",
            get(move |Path((_, repo)): Path<(String, String)>| {
                let calls = artifact_calls.clone();
                async move {
                    calls.artifacts.fetch_add(1, Ordering::SeqCst);
                    match repo.as_str() {
                        "missing" => StatusCode::NOT_FOUND.into_response(),
                        _ => Json(json!({
                            "Artifact": {
                                "x": {"id": "x", "artifact": "widget-core", "group": "acme", "type": "jar"}
                            }
                        }))
                        .into_response(),
                    }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn gateway(calls: Arc<Calls>) -> TestServer {
    let base = collaborators(calls).await;
    let mut settings = GatewaySettings::default();
    settings.upstream.sna_url = base.clone();
    settings.upstream.dna_url = base;
    settings.upstream.request_timeout_secs = 5;
    let state = tokio_test::assert_ok!(AppState::new(settings));
    TestServer::new(create_router(state)).unwrap()
}

/// Repeats the request until the gateway stops answering 202.
async fn settle(server: &TestServer, path: &str) -> TestResponse {
    for _ in 0..200 {
        let resp = server.get(path).await;
        if resp.status_code() != StatusCode::ACCEPTED {
            return resp;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{path} never left in_progress");
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let server = gateway(Arc::new(Calls::default())).await;

    let resp = server.get("/health").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["in_flight"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn cold_artifact_request_is_merged_with_refreshed_ranks() {
    let calls = Arc::new(Calls::default());
    let server = gateway(calls.clone()).await;

    let first = server.get("/artifacts/acme/widget/metrics").await;
    assert_eq!(first.status_code(), 202);
    let body: Value = first.json();
    assert_eq!(body["status"], "in_progress");

    let done = settle(&server, "/artifacts/acme/widget/metrics").await;
    assert_eq!(done.status_code(), 200);
    let body: Value = done.json();
    assert_eq!(body["Artifact"][0]["id"], "x");
    assert_eq!(body["Artifact"][0]["page_rank"], 0.5);
    assert_eq!(body["Artifact"][0]["overall_rank"], 3);
    assert_eq!(body["ProjectStats"]["max_rank"], 3);
    assert_eq!(body["ProjectStats"]["num_of_dependents"], 0);

    assert_eq!(calls.artifacts.load(Ordering::SeqCst), 1);
    assert_eq!(calls.page_ranks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_requests_share_one_fetch() {
    let calls = Arc::new(Calls::default());
    let server = gateway(calls.clone()).await;

    assert_eq!(server.get("/projects/acme/widget/metrics").await.status_code(), 202);
    for _ in 0..4 {
        let code = server.get("/projects/acme/widget/metrics").await.status_code();
        assert!(code == 202 || code == 200, "unexpected {code}");
    }
    let done = settle(&server, "/projects/acme/widget/metrics").await;
    assert_eq!(done.status_code(), 200);
    let body: Value = done.json();
    assert_eq!(body["Project"]["id"], "acme/widget");
    assert_eq!(body["Package"][0]["name"], "core");

    assert_eq!(calls.analyses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn not_found_is_reported_once_then_retried() {
    let calls = Arc::new(Calls::default());
    let server = gateway(calls.clone()).await;

    assert_eq!(
        server.get("/artifacts/acme/missing/metrics").await.status_code(),
        202
    );
    let reported = settle(&server, "/artifacts/acme/missing/metrics").await;
    assert_eq!(reported.status_code(), 404);
    let body: Value = reported.json();
    assert_eq!(body["status"], "not_found");

    let retried = server.get("/artifacts/acme/missing/metrics").await;
    assert_eq!(retried.status_code(), 202);
    settle(&server, "/artifacts/acme/missing/metrics").await;
    assert_eq!(calls.artifacts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn status_callback_validates_body() {
    let server = gateway(Arc::new(Calls::default())).await;

    let garbled = server
        .post("/projects/acme/widget/status")
        .text("{not json")
        .content_type("application/json")
        .await;
    assert_eq!(garbled.status_code(), 400);
    let body: Value = garbled.json();
    assert_eq!(body["status"], "error");

    let unknown = server
        .post("/projects/acme/widget/status")
        .json(&json!({"status": "parsing", "msg": "", "project_name": ""}))
        .await;
    assert_eq!(unknown.status_code(), 400);
}

#[tokio::test]
async fn progress_push_without_fetch_still_allows_analysis() {
    let calls = Arc::new(Calls::default());
    let server = gateway(calls.clone()).await;

    for status in ["in_progress", "complete"] {
        let pushed = server
            .post("/projects/acme/widget/status")
            .json(&json!({
                "status": status,
                "msg": "Computing network complexity.",
                "project_name": "acme/widget"
            }))
            .await;
        assert_eq!(pushed.status_code(), 204);
    }

    assert_eq!(server.get("/projects/acme/widget/metrics").await.status_code(), 202);
    let done = settle(&server, "/projects/acme/widget/metrics").await;
    assert_eq!(done.status_code(), 200);
    assert_eq!(calls.analyses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pushed_failure_is_reported_once() {
    let calls = Arc::new(Calls::default());
    let server = gateway(calls.clone()).await;

    let pushed = server
        .post("/projects/acme/widget/status")
        .json(&json!({"status": "error", "msg": "Metric step failed.", "project_name": ""}))
        .await;
    assert_eq!(pushed.status_code(), 200);
    let body: Value = pushed.json();
    assert_eq!(body["status"], "error");

    let reported = server.get("/projects/acme/widget/metrics").await;
    assert_eq!(reported.status_code(), 502);
    let body: Value = reported.json();
    assert_eq!(body["msg"], "Metric step failed.");

    assert_eq!(server.get("/projects/acme/widget/metrics").await.status_code(), 202);
    settle(&server, "/projects/acme/widget/metrics").await;
    assert_eq!(calls.analyses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn blank_route_parameters_are_rejected() {
    let server = gateway(Arc::new(Calls::default())).await;

    let resp = server.get("/projects/%20/widget/metrics").await;
    assert_eq!(resp.status_code(), 400);
    let body: Value = resp.json();
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn responses_allow_any_origin() {
    let server = gateway(Arc::new(Calls::default())).await;

    let resp = server
        .get("/health")
        .add_header(header::ORIGIN, HeaderValue::from_static("http://dashboard.local"))
        .await;
    let allowed = resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert_eq!(allowed, "*");
}

#[tokio::test]
async fn metrics_endpoint_exposes_fetch_counters() {
    let server = gateway(Arc::new(Calls::default())).await;
    settle(&server, "/artifacts/acme/gadget/metrics").await;

    let resp = server.get("/metrics").await;
    assert_eq!(resp.status_code(), 200);
    let text = resp.text();
    assert!(text.contains("gateway_fetches_started_total"));
    assert!(text.contains("gateway_fetch_outcomes_total"));
}
