//! SockJS WebSocket transport framing and the `/info` endpoint.
//!
//! Only the raw WebSocket transport is offered; clients that cannot upgrade
//! get no polling fallback.

use std::time::Duration;

use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

pub const OPEN_FRAME: &str = "o";
pub const HEARTBEAT_FRAME: &str = "h";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Close code and reason sent when the server ends a session.
pub const GO_AWAY: (u16, &str) = (3000, "Go away!");

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Info {
    pub websocket: bool,
    pub cookie_needed: bool,
    pub origins: Vec<String>,
    pub entropy: u32,
}

impl Info {
    pub fn new() -> Self {
        Self {
            websocket: true,
            cookie_needed: false,
            origins: vec!["*:*".to_string()],
            entropy: Uuid::new_v4().as_u128() as u32,
        }
    }
}

impl Default for Info {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /ws/info`
pub async fn info() -> impl IntoResponse {
    (
        [(
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate, max-age=0",
        )],
        Json(Info::new()),
    )
}

/// Wraps outbound payloads in one `a[...]` frame.
pub fn message_frame(payloads: &[String]) -> String {
    // Serializing a slice of strings cannot fail
    let array = serde_json::to_string(payloads).unwrap_or_else(|_| "[]".to_string());
    format!("a{}", array)
}

pub fn close_frame(code: u16, reason: &str) -> String {
    format!("c[{},{}]", code, serde_json::Value::from(reason))
}

/// Payloads carried by one inbound SockJS message: a JSON array of strings,
/// or a single JSON string.
pub fn decode_messages(text: &str) -> Result<Vec<String>, serde_json::Error> {
    let text = text.trim();
    if text.starts_with('[') {
        serde_json::from_str(text)
    } else {
        serde_json::from_str::<String>(text).map(|s| vec![s])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_escapes_stomp_payload() {
        let frame = message_frame(&["MESSAGE\ndestination:/topic/ping\n\npong\0".to_string()]);
        assert_eq!(frame, "a[\"MESSAGE\\ndestination:/topic/ping\\n\\npong\\u0000\"]");
    }

    #[test]
    fn test_close_frame() {
        assert_eq!(close_frame(GO_AWAY.0, GO_AWAY.1), "c[3000,\"Go away!\"]");
    }

    #[test]
    fn test_decode_messages() {
        let decoded =
            decode_messages("[\"CONNECT\\naccept-version:1.2\\n\\n\\u0000\",\"\\n\"]").unwrap();
        assert_eq!(decoded, vec!["CONNECT\naccept-version:1.2\n\n\0", "\n"]);

        assert_eq!(decode_messages("\"x\"").unwrap(), vec!["x"]);
        assert!(decode_messages("not json").is_err());
    }

    #[test]
    fn test_info_shape() {
        let value = serde_json::to_value(Info::new()).unwrap();
        assert_eq!(value["websocket"], true);
        assert_eq!(value["cookie_needed"], false);
        assert_eq!(value["origins"], serde_json::json!(["*:*"]));
        assert!(value["entropy"].is_u64());
    }
}
