//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, limits, timeout, request ID)
//! - Run invocations through the reconciler
//! - Expose counter and node health queries
//! - Drain in-flight invocations on shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::cache::{CacheError, CounterStore};
use crate::config::TrackerConfig;
use crate::http::request::{self, RequestIdExt};
use crate::http::response::{error_response, InvocationResponse};
use crate::observability::metrics;
use crate::reconcile::{InvocationEvent, Reconciler};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    pub store: Arc<dyn CounterStore>,
    /// Per-invocation processing budget.
    pub deadline: Duration,
    /// Cancelled on shutdown; reconcilers stop between records.
    pub shutdown: CancellationToken,
}

/// HTTP server for the session tracker.
pub struct HttpServer {
    router: Router,
    config: TrackerConfig,
}

impl HttpServer {
    /// Create a new HTTP server over a shared counter store.
    pub fn new(
        config: TrackerConfig,
        store: Arc<dyn CounterStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone())
            .with_observe_reads(config.reconciler.observe_reads);
        let deadline = Duration::from_millis(config.reconciler.deadline_ms);

        let state = AppState {
            reconciler,
            store,
            deadline,
            shutdown,
        };

        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &TrackerConfig, state: AppState) -> Router {
        Router::new()
            .route("/invoke", post(invoke_handler))
            .route("/users/{user}", get(user_handler))
            .route("/nodes", get(nodes_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request.request_id().unwrap_or("unknown"),
                )
            }))
            .layer(request::propagate_layer())
            .layer(request::set_layer())
    }

    /// The configured router, for serving or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` is cancelled, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

/// Decode the invocation payload and reconcile its records.
async fn invoke_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();
    let deadline = Some(start + state.deadline);

    let result = match InvocationEvent::from_slice(&body) {
        Ok(event) => {
            state
                .reconciler
                .process(&event.awslogs.data, &state.shutdown, deadline)
                .await
        }
        Err(e) => Err(e),
    };

    let response = match result {
        Ok(report) => {
            let s = &report.summary;
            tracing::info!(
                status = report.status().status_code(),
                total = s.total,
                applied = s.applied,
                malformed = s.malformed,
                unknown_action = s.unknown_action,
                cache_errors = s.cache_errors,
                skipped = s.skipped,
                "Batch processed"
            );
            InvocationResponse::from_report(&report)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting undecodable payload");
            InvocationResponse::from_payload_error(&e)
        }
    };

    metrics::record_invocation(response.status_code, start);
    response.into_response()
}

/// Current connection count for one user.
async fn user_handler(State(state): State<AppState>, Path(user): Path<String>) -> Response {
    match state.store.get(&user).await {
        Ok(count) => Json(json!({ "user": user, "connections": count })).into_response(),
        Err(e @ CacheError::InvalidKey(_)) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "Counter lookup failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

/// Cache node health snapshot.
async fn nodes_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.nodes())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
