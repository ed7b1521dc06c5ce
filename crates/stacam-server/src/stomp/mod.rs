//! STOMP broker on `/ws`, reachable as a plain WebSocket or through the
//! SockJS WebSocket transport.

pub mod connection;
pub mod frame;
pub mod session;
pub mod sockjs;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use connection::Framing;

pub use frame::{parse_frames, Command, Frame, FrameError};
pub use session::{AppCommand, Reply, StompSession};

pub fn route() -> Router<AppState> {
    Router::new()
        .route("/ws", get(raw_handler))
        .route("/ws/websocket", get(raw_handler))
        .route("/ws/info", get(sockjs::info))
        .route("/ws/:server/:session/websocket", get(sockjs_handler))
}

async fn raw_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, Framing::Raw)
}

async fn sockjs_handler(
    ws: WebSocketUpgrade,
    Path((server, session)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    tracing::debug!(%server, %session, "SockJS session requested");
    upgrade(ws, state, Framing::SockJs)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, framing: Framing) -> Response {
    ws.protocols(["v12.stomp", "v11.stomp", "v10.stomp"])
        .max_message_size(state.limits.message_size_limit)
        .on_upgrade(move |socket| connection::serve(socket, state, framing))
}
