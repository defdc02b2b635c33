//! Gateway server: health, raw-graph and parameter invocations

use crate::error::ApiError;
use crate::request::{job_from_graph, job_from_params};
use crate::response::render;
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use comfyrelay_client::{
    ArtifactPostProcessor, CancellationToken, ClientOptions, ExecutionClient, ExecutionSession,
    HttpEngine, Job, Preference, WsConnector,
};
use comfyrelay_core::{Artifact, Error, GraphTemplate, JobParams, RelayConfig, Result};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub client: ExecutionClient,
    pub processor: ArtifactPostProcessor,
    pub config: RelayConfig,
    /// Cancelled on shutdown; in-flight waits end early.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(client: ExecutionClient, config: RelayConfig) -> Self {
        Self {
            client,
            processor: ArtifactPostProcessor::new(config.jpeg_quality),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Real engine over HTTP + WebSocket at `config.engine_address`.
    pub fn from_config(config: RelayConfig) -> Self {
        let engine = Arc::new(HttpEngine::new(config.engine_http_url()));
        let connector = Arc::new(WsConnector::new(config.engine_ws_url()));
        let session = Arc::new(ExecutionSession::new(connector));
        let client = ExecutionClient::new(engine, session).with_options(ClientOptions {
            wait_timeout: config.wait_timeout(),
            ..ClientOptions::default()
        });
        Self::new(client, config)
    }

    /// Execute a job and post-process what it produced.
    pub async fn run(&self, job: Job, preference: Preference) -> Result<Vec<Artifact>> {
        let cancel = self.shutdown.child_token();
        let output = self.client.execute(job, &cancel).await?;

        let processor = self.processor;
        let artifacts = output.artifacts;
        tokio::task::spawn_blocking(move || processor.process_all(artifacts, preference))
            .await
            .map_err(|e| Error::PostProcess(format!("transcoding task failed: {e}")))?
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/invocations", post(invocations_handler))
        .route("/generate", post(generate_handler))
        .layer(middleware::from_fn_with_state(state.clone(), log_headers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

pub async fn start_gateway(config: RelayConfig) -> anyhow::Result<()> {
    let listen = config.listen.clone();
    let state = Arc::new(AppState::from_config(config));
    let app = build_router(state.clone());

    info!("Comfyrelay Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", listen);
    info!("  Engine:       {}", state.config.engine_address);
    info!("  Workflows:    {}", state.config.workflow_dir.display());
    info!("  Responses:    {:?}", state.config.response_mode);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

fn preference(headers: &HeaderMap) -> Preference {
    Preference::from_accept(headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()))
}

async fn log_headers(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if state.config.debug_headers {
        info!("{} {}", request.method(), request.uri());
        for (name, value) in request.headers() {
            info!("  {}: {}", name, value.to_str().unwrap_or("<binary>"));
        }
    }
    next.run(request).await
}

/// 200 when the engine answers, 500 otherwise.
async fn ping_handler(State(state): State<Arc<AppState>>) -> Response {
    let status = if state.client.engine().is_healthy().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, [(header::CONTENT_TYPE, "application/json")], "\n").into_response()
}

async fn invocations_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let text = std::str::from_utf8(&body).map_err(|_| Error::malformed("body is not UTF-8"))?;
    let graph = GraphTemplate::from_json_str(text)?;
    let job = job_from_graph(graph, &state.config.upload_name)?;

    let artifacts = state.run(job, preference(&headers)).await?;
    Ok(render(artifacts, state.config.response_mode))
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let params: JobParams = serde_json::from_slice(&body)
        .map_err(|e| Error::invalid_request(format!("invalid parameters: {e}")))?;
    let job = job_from_params(&params, &state.config.workflow_dir, &state.config.upload_name)?;

    let artifacts = state.run(job, preference(&headers)).await?;
    Ok(render(artifacts, state.config.response_mode))
}
