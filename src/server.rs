//! HTTP server: request handling and lifecycle
//!
//! `POST /` is the only route. A request passes through the bearer check,
//! the content type check, payload validation, materialization into a fresh
//! sandbox and the conversion tool, strictly in that order. The first failure
//! ends the request with a status code and an empty body. The sandbox is
//! removed whichever way the request ends.

use crate::config::ServerConfig;
use crate::converter::{ConversionOutcome, Converter};
use crate::error::{Error, Result};
use crate::job::{check_content_type, JobRequest};
use crate::sandbox::Sandbox;
use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Upper bound on the body buffer reserved up front from `Content-Length`
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Shared, read-only state handed to every request
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    converter: Arc<Converter>,
    /// `Bearer <token>`, computed once
    authorization: Option<Arc<str>>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            converter: Arc::new(Converter::from_config(&config)),
            authorization: config.expected_authorization().map(Arc::from),
            config,
        }
    }
}

/// Build the router for the conversion endpoint.
///
/// Unknown paths, request targets carrying a query string and methods other
/// than POST get an empty 404 before any authentication or parsing happens.
pub fn router(config: Arc<ServerConfig>) -> Router {
    let state = AppState::new(config);

    Router::new()
        .route(
            "/",
            post(convert)
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    require_bearer,
                ))
                .route_layer(middleware::from_fn(require_exact_target))
                .fallback(not_found),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// The endpoint is the bare `/` target; `/?anything` is a different one.
async fn require_exact_target(request: Request, next: Next) -> Response {
    if request.uri().query().is_some() {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// Compare `Authorization` verbatim against the configured token.
///
/// Skipped entirely when no token is configured.
async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    if let Some(expected) = state.authorization.as_deref() {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .ok_or(Error::Unauthenticated)?;
        if header.as_bytes() != expected.as_bytes() {
            return Err(Error::Forbidden);
        }
    }
    Ok(next.run(request).await)
}

async fn convert(State(state): State<AppState>, request: Request) -> Response {
    let span = tracing::info_span!("job", id = %uuid::Uuid::new_v4());
    match process_job(&state, request).instrument(span).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn process_job(state: &AppState, request: Request) -> Result<Response> {
    let headers = request.headers();
    check_content_type(headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()))?;

    let max_body_bytes = state.config.max_body_bytes;
    let declared_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > max_body_bytes) {
        return Err(Error::BodyTooLarge {
            max_size: max_body_bytes,
        });
    }

    let mut body = Vec::with_capacity(initial_body_capacity(declared_length));
    let mut stream = request.into_body().into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::BodyRead {
            reason: e.to_string(),
        })?;
        if body.len() + chunk.len() > max_body_bytes {
            return Err(Error::BodyTooLarge {
                max_size: max_body_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    let job = JobRequest::from_slice(&body)?;
    drop(body);

    let sandbox = Sandbox::create(state.config.work_dir.as_deref()).await?;
    tracing::debug!(sandbox = %sandbox.path().display(), "Sandbox created");

    let outcome = run_in_sandbox(state, &job, &sandbox).await;

    if let Err(e) = sandbox.close().await {
        tracing::warn!(error = %e, "Failed to remove sandbox");
    }

    Ok(match outcome? {
        ConversionOutcome::Converted(output) => (
            StatusCode::OK,
            [
                (
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                ),
                (CONTENT_LENGTH, HeaderValue::from(output.len())),
            ],
            output,
        )
            .into_response(),
        ConversionOutcome::Failed { stderr, .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, stderr).into_response()
        }
    })
}

/// `Content-Length` is only a hint; the buffer grows as bytes arrive.
fn initial_body_capacity(declared_length: Option<usize>) -> usize {
    declared_length.unwrap_or(0).min(INITIAL_BODY_CAPACITY)
}

async fn run_in_sandbox(
    state: &AppState,
    job: &JobRequest,
    sandbox: &Sandbox,
) -> Result<ConversionOutcome> {
    sandbox
        .materialize(&job.merged_files(), &state.config)
        .await?;

    state
        .converter
        .run(sandbox.files_dir(), &job.args, &job.input_names())
        .await
}

/// Bind the configured address and serve until SIGINT/SIGTERM.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;

    tracing::info!("Starting Pandoc Server on {}", listener.local_addr()?);

    serve(listener, config, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// Each connection runs on its own task. Once `shutdown` resolves no new
/// connections are accepted, and this returns after the in-flight ones have
/// finished.
pub async fn serve<F>(listener: TcpListener, config: ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::new(config));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
