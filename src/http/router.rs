//! Router construction and server host

use crate::error::{Result, ServiceError};
use crate::http::handlers::{cleanup, health, list_models, remove_background, segment};
use crate::http::state::AppState;
use crate::sweep::spawn_periodic_sweep;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request},
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn, Span};

/// CORS policy for the configured origins, credentials allowed
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    // Wildcards are not allowed together with credentials, so methods and
    // headers mirror the preflight request
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                route = %request.uri().path(),
                status_code = tracing::field::Empty,
                latency_ms = tracing::field::Empty
            )
        })
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &Span| {
                span.record("status_code", response.status().as_u16());
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                span.record("latency_ms", latency_ms);
            },
        );

    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/process/remove-background", post(remove_background))
        .route("/process/segment", post(segment))
        .route("/cleanup", delete(cleanup))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        // CORS needs a `Default` response body, so it sits inside tracing
        .layer(
            ServiceBuilder::new()
                .layer(trace_layer)
                .layer(cors_layer(&state.config.allowed_origins)),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves
///
/// Creates the working directories, starts the periodic sweep when
/// configured, and drains in-flight requests on shutdown.
///
/// # Errors
/// - Working directories cannot be created
/// - The listener cannot bind
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    state.storage.ensure_dirs()?;

    let sweeper = state.config.sweep_interval().map(|interval| {
        info!(interval_secs = interval.as_secs(), "Periodic sweep enabled");
        spawn_periodic_sweep(
            state.storage.clone(),
            interval,
            state.config.sweep_max_age(),
            state.active_jobs.clone(),
        )
    });

    let addr = state.config.bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::file_io_error("bind", addr.to_string(), &e))?;
    info!(%addr, "Image service listening");

    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServiceError::Io);

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Image service stopped");
    result
}
