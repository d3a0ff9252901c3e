mod assemble;
mod extract;
mod fetch;
mod http;
mod idempotency;
mod llm;
mod metrics;
mod mirror;
mod models;
mod normalize;
mod pipeline;
mod security;
mod storage;

use axum::{
    Json, Router,
    body::Body,
    extract::{Extension, Path, State},
    http::{StatusCode, header::HeaderValue},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use llm::{LlmClient, LlmConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, IngestRequest, IngestResponse, RawExtraction};
use pipeline::{IngestPipeline, PipelineConfig, PipelineError, PipelineErrorKind};
use security::{AuthContext, AuthState, require_admin_auth};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use storage::{MemoryStore, ObjectStore, SupabaseStorage};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "torii.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let storage: Arc<dyn ObjectStore> = match SupabaseStorage::from_env() {
        Some(supabase) => Arc::new(supabase),
        None => {
            warn!(
                target = "torii.storage",
                "SUPABASE_URL not configured; mirrored images are held in memory only"
            );
            Arc::new(MemoryStore::default())
        }
    };
    let llm = Arc::new(LlmClient::new(LlmConfig::from_env()));
    let pipeline = Arc::new(IngestPipeline::new(
        PipelineConfig::from_env(),
        llm,
        storage.clone(),
    ));

    let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| eyre::eyre!("prometheus recorder: {err}"))?;
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|url| redis::Client::open(url).ok());

    let state = AppState {
        pipeline,
        storage,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/imports", post(create_import))
        .route("/imports/preview", post(preview_import))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            require_admin_auth,
        ));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/images/{key}", get(get_image))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "torii.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<IngestPipeline>,
    storage: Arc<dyn ObjectStore>,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, IngestResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "torii-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Pipeline(PipelineError::invalid_input(
                "docs",
                "unauthorized",
            )));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Torii API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap_or_default()
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap_or_default();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap_or_default()
}

/// Run the URL → reviewed-product-draft ingestion pipeline.
///
/// - Method: `POST`
/// - Path: `/imports`
/// - Auth: `Authorization: Bearer <key>` or `X-Torii-Key: <key>`
/// - Body: `IngestRequest`
/// - Response: `IngestResponse` (normalized draft + raw extraction)
///
/// Honors an `Idempotency-Key` header so a double-submitted form replays
/// the first answer instead of paying for another model call.
async fn create_import(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    metrics::inc_requests("/imports");
    info!(
        target = "torii.api",
        admin_id = %context.admin_id,
        api_key = %context.api_key_id,
        "import pipeline invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let response = state.pipeline.run(payload).await?;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &response, ttl).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let response = state.pipeline.run(payload).await?;
        state.idempotency.lock().await.insert(key, response.clone());
        return Ok(Json(response));
    }

    let response = state.pipeline.run(payload).await?;
    Ok(Json(response))
}

/// Fetch + extract + assemble without the generative stage or mirroring:
/// shows the admin what the heuristics recovered before a model call.
///
/// - Method: `POST`
/// - Path: `/imports/preview`
/// - Body: `IngestRequest`
/// - Response: `RawExtraction`
async fn preview_import(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<RawExtraction>, AppError> {
    metrics::inc_requests("/imports/preview");
    info!(
        target = "torii.api",
        admin_id = %context.admin_id,
        "import preview invoked",
    );
    let raw = state.pipeline.preview(&payload).await?;
    Ok(Json(raw))
}

/// Serve a mirrored product image out of object storage.
async fn get_image(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    metrics::inc_requests("/images");
    match state.storage.get(&key).await {
        Ok(Some(object)) => {
            let content_type = HeaderValue::from_str(&object.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            let mut response = Response::new(Body::from(object.bytes));
            response.headers_mut().insert("Content-Type", content_type);
            response.headers_mut().insert(
                "Cache-Control",
                HeaderValue::from_static("public, max-age=31536000"),
            );
            response
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: "image_not_found".into(),
                detail: None,
            }),
        )
            .into_response(),
        Err(err) => {
            warn!(target = "torii.storage", key, error = %err, "image_read_failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiError {
                    error: "storage_unavailable".into(),
                    detail: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    // The admin must learn the copy was not generated and
                    // enter it by hand; a bare 500 would hide that.
                    PipelineErrorKind::Normalization => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
