use std::sync::Arc;
use std::time::Duration;

use stacam::{Config, DetectionService};

/// Per-connection WebSocket limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub message_size_limit: usize,
    pub send_buffer_size_limit: usize,
    pub send_time_limit: Duration,
}

impl ConnectionLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            message_size_limit: config.websocket.message_size_limit,
            send_buffer_size_limit: config.websocket.send_buffer_size_limit,
            send_time_limit: Duration::from_millis(config.websocket.send_time_limit_ms),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DetectionService>,
    pub limits: ConnectionLimits,
    pub max_upload_size: usize,
}

impl AppState {
    pub fn new(service: Arc<DetectionService>, config: &Config) -> Self {
        Self {
            service,
            limits: ConnectionLimits::from_config(config),
            max_upload_size: config.server.max_upload_size,
        }
    }
}
