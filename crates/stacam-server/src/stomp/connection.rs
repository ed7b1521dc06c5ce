//! One WebSocket connection speaking STOMP, either raw or inside SockJS frames.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use stacam::TopicMessage;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::frame::{parse_frames, Command, Frame};
use super::session::{AppCommand, StompSession};
use super::sockjs;
use crate::state::{AppState, ConnectionLimits};

/// How STOMP frames are carried in WebSocket text messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One or more STOMP frames per message.
    Raw,
    /// SockJS `a[...]` arrays of STOMP frames, plus `o`/`h`/`c` control frames.
    SockJs,
}

impl Framing {
    fn encode(&self, frames: &[Frame]) -> String {
        match self {
            Framing::Raw => frames.iter().map(Frame::to_wire).collect(),
            Framing::SockJs => {
                let wires: Vec<String> = frames.iter().map(Frame::to_wire).collect();
                sockjs::message_frame(&wires)
            }
        }
    }

    fn decode(&self, text: &str) -> Result<Vec<Frame>, String> {
        match self {
            Framing::Raw => parse_frames(text).map_err(|e| e.to_string()),
            Framing::SockJs => {
                let payloads = sockjs::decode_messages(text).map_err(|e| e.to_string())?;
                let mut frames = Vec::new();
                for payload in payloads {
                    frames.extend(parse_frames(&payload).map_err(|e| e.to_string())?);
                }
                Ok(frames)
            }
        }
    }
}

/// Outbound queue with a byte budget. Bytes count from enqueue until the
/// socket write completes.
#[derive(Clone)]
struct Outbox {
    sender: mpsc::UnboundedSender<String>,
    queued: Arc<AtomicUsize>,
    limit: usize,
}

impl Outbox {
    /// Returns false when the connection can no longer take messages.
    fn push(&self, text: String) -> bool {
        let len = text.len();
        let queued = self.queued.fetch_add(len, Ordering::SeqCst) + len;
        if queued > self.limit {
            self.queued.fetch_sub(len, Ordering::SeqCst);
            warn!(
                queued,
                limit = self.limit,
                "Send buffer limit exceeded, closing connection"
            );
            return false;
        }
        self.sender.send(text).is_ok()
    }
}

pub async fn serve(socket: WebSocket, state: AppState, framing: Framing) {
    let session_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("stomp", session = %session_id, ?framing);
    run(socket, state, framing, session_id).instrument(span).await
}

async fn run(socket: WebSocket, state: AppState, framing: Framing, session_id: String) {
    info!("WebSocket connection established");

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let queued = Arc::new(AtomicUsize::new(0));
    let outbox = Outbox {
        sender: tx,
        queued: Arc::clone(&queued),
        limit: state.limits.send_buffer_size_limit,
    };

    let mut send_task = tokio::spawn(
        write_loop(sink, rx, queued, state.limits, framing).in_current_span(),
    );

    let mut session = StompSession::new(session_id);
    let mut topics = state.service.publisher().subscribe();
    let mut open = framing != Framing::SockJs || outbox.push(sockjs::OPEN_FRAME.to_string());

    while open {
        tokio::select! {
            incoming = stream.next() => {
                open = match incoming {
                    Some(Ok(Message::Text(text))) => {
                        on_text(&text, &mut session, &outbox, &state, framing)
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Ignoring binary message");
                        true
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection closed by client");
                        false
                    }
                    Some(Ok(_)) => true,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        false
                    }
                };
            }
            message = topics.recv() => {
                open = match message {
                    Ok(message) => deliver(&message, &mut session, &outbox, framing),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged, messages dropped");
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => false,
                };
            }
            _ = &mut send_task => {
                debug!("Writer stopped");
                break;
            }
        }
    }

    if framing == Framing::SockJs {
        let (code, reason) = sockjs::GO_AWAY;
        let _ = outbox.sender.send(sockjs::close_frame(code, reason));
    }
    drop(outbox);
    if !send_task.is_finished() {
        let _ = tokio::time::timeout(state.limits.send_time_limit, send_task).await;
    }
    info!("WebSocket connection closed");
}

fn on_text(
    text: &str,
    session: &mut StompSession,
    outbox: &Outbox,
    state: &AppState,
    framing: Framing,
) -> bool {
    if text.len() > state.limits.message_size_limit {
        warn!(size = text.len(), "Inbound message over size limit");
        return false;
    }

    let frames = match framing.decode(text) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("Malformed frame: {}", e);
            let error = Frame::new(Command::Error)
                .with_header("message", "Malformed frame")
                .with_body("text/plain", e);
            outbox.push(framing.encode(&[error]));
            return false;
        }
    };

    for frame in &frames {
        let reply = session.handle(frame);
        if !reply.frames.is_empty() && !outbox.push(framing.encode(&reply.frames)) {
            return false;
        }
        if let Some(command) = reply.command {
            run_command(command, state);
        }
        if reply.close {
            return false;
        }
    }
    true
}

fn run_command(command: AppCommand, state: &AppState) {
    match command {
        AppCommand::Snapshot => {
            let service = Arc::clone(&state.service);
            // Reads the database
            tokio::task::spawn_blocking(move || service.publish_snapshot());
        }
        AppCommand::Ping => state.service.publisher().publish_pong(),
    }
}

fn deliver(
    message: &TopicMessage,
    session: &mut StompSession,
    outbox: &Outbox,
    framing: Framing,
) -> bool {
    let frames = session.deliver(message);
    if frames.is_empty() {
        return true;
    }
    // Headers and SockJS escaping grow the body, so the budget is checked on
    // the encoded text. A message that can never fit is skipped.
    let wire = framing.encode(&frames);
    if wire.len() > outbox.limit {
        warn!(
            size = wire.len(),
            limit = outbox.limit,
            destination = %message.destination,
            "Encoded message exceeds send buffer, skipped"
        );
        return true;
    }
    outbox.push(wire)
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
    queued: Arc<AtomicUsize>,
    limits: ConnectionLimits,
    framing: Framing,
) {
    let mut heartbeat = tokio::time::interval(sockjs::HEARTBEAT_INTERVAL);
    heartbeat.reset();

    loop {
        let text = tokio::select! {
            next = rx.recv() => match next {
                Some(text) => text,
                None => break,
            },
            _ = heartbeat.tick(), if framing == Framing::SockJs => {
                sockjs::HEARTBEAT_FRAME.to_string()
            }
        };

        let len = text.len();
        let is_heartbeat = text == sockjs::HEARTBEAT_FRAME;
        match tokio::time::timeout(limits.send_time_limit, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => {
                if !is_heartbeat {
                    queued.fetch_sub(len, Ordering::SeqCst);
                }
            }
            Ok(Err(e)) => {
                debug!("Send failed: {}", e);
                return;
            }
            Err(_) => {
                warn!(
                    limit_ms = limits.send_time_limit.as_millis() as u64,
                    "Send time limit exceeded, closing connection"
                );
                return;
            }
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_framing_concatenates_frames() {
        let frames = [
            Frame::new(Command::Receipt).with_header("receipt-id", "1"),
            Frame::new(Command::Receipt).with_header("receipt-id", "2"),
        ];
        assert_eq!(
            Framing::Raw.encode(&frames),
            "RECEIPT\nreceipt-id:1\n\n\0RECEIPT\nreceipt-id:2\n\n\0"
        );
    }

    #[test]
    fn test_sockjs_framing_round_trip() {
        let wire = Framing::SockJs.encode(&[Frame::new(Command::Send)
            .with_header("destination", "/app/ping")]);
        assert!(wire.starts_with("a[\"SEND\\n"));

        let decoded = Framing::SockJs.decode(&wire[1..]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].header("destination"), Some("/app/ping"));
    }

    #[test]
    fn test_sockjs_decode_rejects_garbage() {
        assert!(Framing::SockJs.decode("{").is_err());
        assert!(Framing::Raw.decode("BOGUS\n\n\0").is_err());
    }

    #[tokio::test]
    async fn test_outbox_enforces_byte_budget() {
        let (sender, mut rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let outbox = Outbox {
            sender,
            queued: Arc::clone(&queued),
            limit: 10,
        };

        assert!(outbox.push("12345".to_string()));
        assert!(outbox.push("12345".to_string()));
        assert!(!outbox.push("1".to_string()));
        assert_eq!(queued.load(Ordering::SeqCst), 10);

        assert_eq!(rx.recv().await.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn test_deliver_skips_message_that_grows_past_budget() {
        let (sender, mut rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let outbox = Outbox {
            sender,
            queued: Arc::clone(&queued),
            limit: 400,
        };
        let mut session = StompSession::new("s1");
        for wire in [
            "CONNECT\naccept-version:1.2\n\n\0",
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/detections\n\n\0",
        ] {
            session.handle(&parse_frames(wire).unwrap()[0]);
        }

        // Fits the budget as a raw frame; SockJS escaping doubles every quote.
        let quoted = TopicMessage {
            destination: "/topic/detections".to_string(),
            content_type: "application/json",
            body: Arc::from("\"".repeat(200)),
        };
        assert!(deliver(&quoted, &mut session, &outbox, Framing::SockJs));
        assert_eq!(queued.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());

        let small = TopicMessage {
            body: Arc::from("{}"),
            ..quoted
        };
        assert!(deliver(&small, &mut session, &outbox, Framing::SockJs));
        let wire = rx.recv().await.unwrap();
        assert!(wire.starts_with("a[\"MESSAGE\\n"), "{wire}");
    }
}
