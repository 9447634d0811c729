use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::gateway::config::GatewayConfig;
use crate::gateway::pipeline::{Pipeline, RequestContext, StageOutcome};
use crate::gateway::{build_pipeline, http_authority};
use crate::security::authority_client::{forwardable, AuthorityService};
use crate::security::rejection::AuthorizationDecision;

type SharedState = Arc<AppState>;

const MAX_FORWARD_BODY: usize = 10 * 1024 * 1024;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub pipeline: Pipeline,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Arc<GatewayConfig>, authority: Arc<dyn AuthorityService>) -> Result<Self> {
        let pipeline = build_pipeline(&config, authority);
        let http_client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .context("creating upstream HTTP client")?;
        Ok(Self {
            config,
            pipeline,
            http_client,
        })
    }
}

// Health check
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": crate::VERSION}))
}

/// Runs the security pipeline before anything behind it sees the request.
async fn guard(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let ctx = RequestContext::new(
        request.method().clone(),
        request.uri(),
        request.headers().clone(),
    );

    match state.pipeline.run(&ctx).await {
        StageOutcome::Continue => next.run(request).await,
        StageOutcome::NoContent => StatusCode::NO_CONTENT.into_response(),
        StageOutcome::Reject(rejection) => {
            info!(
                request_id = %ctx.request_id,
                path = %ctx.path,
                reason = %rejection,
                "request rejected"
            );
            rejection.into_response()
        }
    }
}

/// Error envelope for failures outside the pipeline; carries the real transport status.
fn error_envelope(status: StatusCode, message: &str) -> Response {
    let decision = AuthorizationDecision::failure(i32::from(status.as_u16()), message);
    (status, Json(decision)).into_response()
}

async fn forward(State(state): State<SharedState>, request: Request) -> Response {
    let Some(upstream) = state.config.upstream_url.as_deref() else {
        return error_envelope(StatusCode::NOT_FOUND, "no route for request");
    };

    match proxy(&state.http_client, upstream, request).await {
        Ok(response) => response,
        Err(e) => {
            error!("upstream forwarding failed: {:#}", e);
            error_envelope(StatusCode::BAD_GATEWAY, "upstream service unavailable")
        }
    }
}

async fn proxy(client: &reqwest::Client, upstream: &str, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", upstream.trim_end_matches('/'), path_and_query);
    let body = axum::body::to_bytes(body, MAX_FORWARD_BODY)
        .await
        .context("reading request body")?;

    let upstream_response = client
        .request(parts.method, &url)
        .headers(forwardable(&parts.headers))
        .body(body)
        .send()
        .await
        .with_context(|| format!("sending request to {url}"))?;

    let status = upstream_response.status();
    let headers = forwardable(upstream_response.headers());
    let bytes = upstream_response
        .bytes()
        .await
        .context("reading upstream body")?;

    let mut response = (status, bytes).into_response();
    response.headers_mut().extend(headers);
    Ok(response)
}

/// Wrap `backend` in the security pipeline and add the unguarded health route.
pub fn create_router_with_backend(state: SharedState, backend: Router) -> Router {
    backend
        .layer(middleware::from_fn_with_state(state, guard))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

/// Router that forwards accepted requests to the configured upstream.
pub fn create_router(state: SharedState) -> Router {
    let backend = Router::new().fallback(forward).with_state(state.clone());
    create_router_with_backend(state, backend)
}

pub async fn serve(config: GatewayConfig, port: u16) -> Result<()> {
    let config = Arc::new(config);
    let authority = http_authority(&config)?;
    let state = Arc::new(AppState::new(config, authority)?);
    info!(stages = ?state.pipeline.stage_names(), "gateway pipeline ready");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("gateway listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
