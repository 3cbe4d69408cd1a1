//! Deepfake Detection Proxy
//!
//! Single-binary Rust service that:
//! 1. Loads the token pool from the pool file
//! 2. Accepts detection requests on POST /api/upload
//! 3. Rotates through pool tokens until one attempt succeeds
//! 4. Returns the detection API's response verbatim

mod admin;
mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::admin::AdminState;
use crate::config::Config;
use detector_client::DetectionClient;
use token_pool::{TokenPool, TokenStore};

/// How long to wait for in-flight requests after a shutdown signal.
///
/// A trial loop over a deep pool can legitimately outlive this window;
/// those requests are cut off rather than holding the process open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime counters surfaced on the health endpoint.
#[derive(Debug, Clone)]
struct ServiceMetrics {
    requests_total: Arc<AtomicU64>,
    errors_total: Arc<AtomicU64>,
    started_at: Instant,
}

impl ServiceMetrics {
    fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<TokenPool>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`; excess
/// requests queue rather than being rejected.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let admin = admin::build_admin_router(AdminState::new(state.pool.clone()));
    Router::new()
        .route("/api/upload", post(upload_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(admin)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting deepfake-detection-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        endpoint_url = %config.detection.endpoint_url,
        tokens_file = %config.pool.tokens_file.display(),
        attempt_delay_ms = config.detection.attempt_delay_ms,
        "configuration loaded"
    );

    let store = Arc::new(TokenStore::load(config.pool.tokens_file.clone()).await);
    if store.is_empty().await {
        warn!("token pool is empty, every request will fail until tokens are added");
    }

    let client = DetectionClient::new(
        reqwest::Client::new(),
        config.detection.endpoint_url.clone(),
        Duration::from_secs(config.detection.timeout_secs),
    );
    let pool = Arc::new(TokenPool::new(
        store,
        client,
        Duration::from_millis(config.detection.attempt_delay_ms),
    ));

    let state = AppState {
        pool,
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };

    let app = build_router(state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    // Graceful shutdown: stop accepting on SIGTERM/SIGINT, then give
    // in-flight trial loops a bounded drain window.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// POST /api/upload: run the trial loop for one opaque detection payload.
///
/// Pass-through responses keep the upstream status code and body verbatim.
/// Both terminal pool failures (empty at start, exhausted after trying
/// everything) surface as 500 with a human-readable message; the two cases
/// stay distinguishable in the logs.
async fn upload_handler(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<serde_json::Value>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let started = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = match state.pool.run(&payload).await {
        Ok(pass) => {
            info!(%request_id, status = pass.status, "returning upstream verdict");
            let status = StatusCode::from_u16(pass.status).unwrap_or(StatusCode::OK);
            (
                status,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                pass.body.to_string(),
            )
                .into_response()
        }
        Err(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(%request_id, error = %e, "detection request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                serde_json::json!({ "error": e.to_string() }).to_string(),
            )
                .into_response()
        }
    };

    metrics::record_request(response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// Health endpoint: pool summary plus uptime and request counters.
/// Returns 200 while the pool has tokens, 503 once it is empty.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);

    let mut body = state.pool.health().await;
    let status_code = if body["status"] == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    if let Some(map) = body.as_object_mut() {
        map.insert("uptime_seconds".into(), uptime.into());
        map.insert("requests_served".into(), requests.into());
        map.insert("errors_total".into(), errors.into());
    }

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, served in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global
    /// recorder, avoiding the "recorder already installed" panic when
    /// multiple tests run in the same process.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    /// Start a mock detection API that answers per token and records the
    /// order of tokens it saw.
    async fn scripted_upstream(
        script: HashMap<String, (StatusCode, String)>,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}/detect");

        let calls_handle = calls.clone();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                move |request: axum::http::Request<Body>| {
                    let script = script.clone();
                    let calls = calls_handle.clone();
                    async move {
                        let token = request
                            .headers()
                            .get("token")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        calls.lock().unwrap().push(token.clone());
                        let (status, body) = script.get(&token).cloned().unwrap_or((
                            StatusCode::NOT_FOUND,
                            r#"{"error":"unknown token"}"#.into(),
                        ));
                        (
                            status,
                            [(axum::http::header::CONTENT_TYPE, "application/json")],
                            body,
                        )
                    }
                },
            );
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        (url, calls)
    }

    fn exhausted_body() -> String {
        r#"{"success":false,"message":"No credits available"}"#.into()
    }

    /// Build app state over a temp store seeded with the given tokens.
    async fn test_app_state(
        dir: &tempfile::TempDir,
        upstream_url: &str,
        tokens: &[&str],
    ) -> AppState {
        let store = Arc::new(TokenStore::load(dir.path().join("tokens.json")).await);
        for t in tokens {
            store.add((*t).into()).await;
        }
        let pool = Arc::new(TokenPool::new(
            store,
            DetectionClient::new(
                reqwest::Client::new(),
                upstream_url.to_string(),
                Duration::from_secs(5),
            ),
            Duration::ZERO,
        ));
        AppState {
            pool,
            metrics: ServiceMetrics::new(),
            prometheus: test_prometheus_handle(),
        }
    }

    fn upload_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_rotates_past_exhausted_token() {
        let dir = tempfile::tempdir().unwrap();
        let (url, calls) = scripted_upstream(HashMap::from([
            ("tok-a".into(), (StatusCode::OK, exhausted_body())),
            ("tok-b".into(), (StatusCode::OK, r#"{"result":"real"}"#.into())),
        ]))
        .await;

        let state = test_app_state(&dir, &url, &["tok-a", "tok-b"]).await;
        let app = build_router(state, 1000);

        let payload = json!({
            "doc_base64": "aGVsbG8=",
            "req_id": "req_test",
            "isIOS": false,
            "doc_type": "image",
            "orientation": 0
        });
        let response = app
            .oneshot(upload_request(&payload.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"result": "real"}));
        assert_eq!(*calls.lock().unwrap(), vec!["tok-a", "tok-b"]);

        // The exhausted token must be gone from the persisted pool
        let contents = tokio::fs::read_to_string(dir.path().join("tokens.json"))
            .await
            .unwrap();
        let persisted: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(persisted["available_tokens"], json!(["tok-b"]));
    }

    #[tokio::test]
    async fn upload_with_empty_pool_returns_500_without_upstream_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (url, calls) = scripted_upstream(HashMap::new()).await;

        let state = test_app_state(&dir, &url, &[]).await;
        let errors_total = state.metrics.errors_total.clone();
        let app = build_router(state, 1000);

        let response = app.oneshot(upload_request("{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(
            json["error"].as_str().unwrap().contains("no detection tokens"),
            "error must explain the empty pool, got: {json}"
        );
        assert!(calls.lock().unwrap().is_empty(), "no upstream call expected");
        assert_eq!(errors_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn upload_with_all_tokens_exhausted_returns_500() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _calls) = scripted_upstream(HashMap::from([
            ("tok-a".into(), (StatusCode::OK, exhausted_body())),
            ("tok-b".into(), (StatusCode::OK, exhausted_body())),
        ]))
        .await;

        let state = test_app_state(&dir, &url, &["tok-a", "tok-b"]).await;
        let app = build_router(state, 1000);

        let response = app.oneshot(upload_request("{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(
            json["error"].as_str().unwrap().contains("exhausted or failed"),
            "error must describe exhaustion, got: {json}"
        );
    }

    #[tokio::test]
    async fn upload_transport_failure_keeps_token_and_returns_500() {
        let dir = tempfile::tempdir().unwrap();

        // Dead upstream: the attempt fails at the transport level
        let state = test_app_state(&dir, "http://127.0.0.1:1/detect", &["tok-a"]).await;
        let store = state.pool.store().clone();
        let app = build_router(state, 1000);

        let response = app.oneshot(upload_request("{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            store.snapshot().await,
            vec!["tok-a"],
            "transport errors must not remove the token"
        );
    }

    #[tokio::test]
    async fn upload_passes_through_application_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _calls) = scripted_upstream(HashMap::from([(
            "tok-a".into(),
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"success":false,"message":"Invalid document"}"#.into(),
            ),
        )]))
        .await;

        let state = test_app_state(&dir, &url, &["tok-a"]).await;
        let app = build_router(state, 1000);

        let response = app.oneshot(upload_request("{}")).await.unwrap();

        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "upstream application errors must pass through with their status"
        );
        let json = body_json(response).await;
        assert_eq!(json["message"], "Invalid document");
    }

    #[tokio::test]
    async fn upload_rejects_malformed_json_body() {
        let dir = tempfile::tempdir().unwrap();
        let (url, calls) = scripted_upstream(HashMap::new()).await;

        let state = test_app_state(&dir, &url, &["tok-a"]).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(upload_request("this is not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(calls.lock().unwrap().is_empty(), "no upstream call expected");
    }

    #[tokio::test]
    async fn health_reports_healthy_with_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _calls) = scripted_upstream(HashMap::new()).await;

        let state = test_app_state(&dir, &url, &["tok-a"]).await;
        state.metrics.requests_total.fetch_add(5, Ordering::Relaxed);
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["tokens_available"], 1);
        assert_eq!(json["requests_served"], 5);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn health_reports_unhealthy_with_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _calls) = scripted_upstream(HashMap::new()).await;

        let state = test_app_state(&dir, &url, &[]).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["tokens_available"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _calls) = scripted_upstream(HashMap::new()).await;

        let state = test_app_state(&dir, &url, &[]).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(
            content_type.contains("text/plain"),
            "metrics endpoint must return text/plain Prometheus format"
        );
    }

    #[tokio::test]
    async fn admin_routes_are_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _calls) = scripted_upstream(HashMap::new()).await;

        let state = test_app_state(&dir, &url, &[]).await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/tokens")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"token":"tok-fresh-1234"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["tokens_available"], 1);
    }

    #[tokio::test]
    async fn fake_verdict_passes_through_as_success() {
        // A "fake" classification is a successful proxy call, not an error.
        let dir = tempfile::tempdir().unwrap();
        let (url, _calls) = scripted_upstream(HashMap::from([(
            "tok-a".into(),
            (
                StatusCode::OK,
                r#"{"result":"fake","confidence":0.98}"#.into(),
            ),
        )]))
        .await;

        let state = test_app_state(&dir, &url, &["tok-a"]).await;
        let errors_total = state.metrics.errors_total.clone();
        let app = build_router(state, 1000);

        let response = app.oneshot(upload_request("{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["result"], "fake");
        assert_eq!(errors_total.load(Ordering::Relaxed), 0);
    }
}
