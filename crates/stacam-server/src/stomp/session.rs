//! Per-connection STOMP state: handshake, subscriptions and message routing.

use stacam::broadcast::TopicMessage;

use super::frame::{Command, Frame};

pub const SUBSCRIBE_DESTINATION: &str = "/app/subscribe";
pub const PING_DESTINATION: &str = "/app/ping";

const SUPPORTED_VERSIONS: [&str; 3] = ["1.2", "1.1", "1.0"];

/// Application request carried by a client SEND.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    /// Publish the recent-results snapshot.
    Snapshot,
    /// Publish a pong on the ping topic.
    Ping,
}

/// What the connection must do after one inbound frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub frames: Vec<Frame>,
    pub command: Option<AppCommand>,
    pub close: bool,
}

impl Reply {
    fn error(message: &str, receipt: Option<&str>) -> Self {
        let mut frame = Frame::new(Command::Error).with_header("message", message);
        if let Some(receipt) = receipt {
            frame = frame.with_header("receipt-id", receipt);
        }
        Self {
            frames: vec![frame.with_body("text/plain", message)],
            command: None,
            close: true,
        }
    }
}

pub struct StompSession {
    id: String,
    connected: bool,
    subscriptions: Vec<(String, String)>,
    next_message_id: u64,
}

impl StompSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: false,
            subscriptions: Vec::new(),
            next_message_id: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn handle(&mut self, frame: &Frame) -> Reply {
        let receipt = frame.header("receipt");

        if !self.connected {
            return match frame.command {
                Command::Connect | Command::Stomp => self.connect(frame),
                _ => Reply::error("Not connected", receipt),
            };
        }

        let mut reply = match frame.command {
            Command::Connect | Command::Stomp => {
                return Reply::error("Already connected", receipt);
            }
            Command::Subscribe => {
                let (Some(id), Some(destination)) = (frame.header("id"), frame.header("destination"))
                else {
                    return Reply::error("SUBSCRIBE requires 'id' and 'destination'", receipt);
                };
                if self.subscriptions.iter().any(|(existing, _)| existing == id) {
                    return Reply::error("Subscription id already in use", receipt);
                }
                tracing::debug!(session = %self.id, id, destination, "Subscribed");
                self.subscriptions
                    .push((id.to_string(), destination.to_string()));
                Reply::default()
            }
            Command::Unsubscribe => {
                let Some(id) = frame.header("id") else {
                    return Reply::error("UNSUBSCRIBE requires 'id'", receipt);
                };
                self.subscriptions.retain(|(existing, _)| existing != id);
                Reply::default()
            }
            Command::Send => {
                let Some(destination) = frame.header("destination") else {
                    return Reply::error("SEND requires 'destination'", receipt);
                };
                let command = match destination {
                    SUBSCRIBE_DESTINATION => Some(AppCommand::Snapshot),
                    PING_DESTINATION => Some(AppCommand::Ping),
                    other => {
                        tracing::debug!(session = %self.id, destination = other, "Ignoring SEND");
                        None
                    }
                };
                Reply {
                    command,
                    ..Reply::default()
                }
            }
            // Messages are auto-acknowledged and transactions are not supported;
            // these frames only produce their receipt.
            Command::Ack | Command::Nack | Command::Begin | Command::Commit | Command::Abort => {
                Reply::default()
            }
            Command::Disconnect => {
                self.connected = false;
                self.subscriptions.clear();
                Reply {
                    close: true,
                    ..Reply::default()
                }
            }
            Command::Connected | Command::Message | Command::Receipt | Command::Error => {
                return Reply::error("Unexpected server frame from client", receipt);
            }
        };

        if let Some(receipt) = receipt {
            reply
                .frames
                .push(Frame::new(Command::Receipt).with_header("receipt-id", receipt));
        }
        reply
    }

    fn connect(&mut self, frame: &Frame) -> Reply {
        let version = match frame.header("accept-version") {
            None => Some("1.0"),
            Some(accepted) => {
                let accepted: Vec<&str> = accepted.split(',').map(str::trim).collect();
                SUPPORTED_VERSIONS
                    .iter()
                    .copied()
                    .find(|v| accepted.contains(v))
            }
        };
        let Some(version) = version else {
            return Reply::error("Supported protocol versions are 1.0,1.1,1.2", None);
        };

        self.connected = true;
        tracing::debug!(session = %self.id, version, "STOMP session connected");

        Reply {
            frames: vec![Frame::new(Command::Connected)
                .with_header("version", version)
                .with_header("heart-beat", "0,0")
                .with_header("server", concat!("stacam/", env!("CARGO_PKG_VERSION")))
                .with_header("session", self.id.clone())],
            command: None,
            close: false,
        }
    }

    /// MESSAGE frames for every subscription on the message's destination.
    pub fn deliver(&mut self, message: &TopicMessage) -> Vec<Frame> {
        if !self.connected {
            return Vec::new();
        }
        let mut frames = Vec::new();
        for (id, destination) in &self.subscriptions {
            if *destination != message.destination {
                continue;
            }
            let message_id = format!("{}-{}", self.id, self.next_message_id);
            self.next_message_id += 1;
            frames.push(
                Frame::new(Command::Message)
                    .with_header("destination", destination.clone())
                    .with_header("subscription", id.clone())
                    .with_header("message-id", message_id)
                    .with_body(message.content_type, message.body.to_string()),
            );
        }
        frames
    }
}
