//! HTTP upload API and STOMP event broker in front of the stacam pipeline.

use std::future::Future;

use axum::extract::Request;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};

pub mod error;
pub mod logging;
pub mod routes;
pub mod state;
pub mod stomp;

pub use error::ApiError;
pub use state::{AppState, ConnectionLimits};

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/detection",
            routes::detection::route(state.max_upload_size),
        )
        .merge(stomp::route())
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                info_span!(
                    "http_request",
                    uri = ?request.uri(),
                    method = ?request.method(),
                )
            }),
        )
        .with_state(state)
}

pub async fn serve<F>(state: AppState, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => info!("Server listening on {}", addr),
        Err(e) => error!("Could not read listener address: {e}"),
    }

    axum::serve(listener, app(state))
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("Application error: {e}"));
}
