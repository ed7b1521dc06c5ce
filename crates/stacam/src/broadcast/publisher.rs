//! Topic publisher feeding the STOMP broker.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::broadcast::events::DetectionEvent;
use crate::error::PublishError;
use crate::record::DetectionRecord;

pub const DETECTIONS_TOPIC: &str = "/topic/detections";
pub const INITIAL_TOPIC: &str = "/topic/detections/initial";
pub const PING_TOPIC: &str = "/topic/ping";

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// A serialized message addressed to one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    pub destination: String,
    pub content_type: &'static str,
    pub body: Arc<str>,
}

/// Destination for pipeline events. Publishing is fire-and-forget: failures
/// are logged by the implementation and never reach the caller.
pub trait DetectionSink: Send + Sync {
    fn publish(&self, event: &DetectionEvent);
}

/// Broadcasts serialized topic messages to every connected subscriber.
///
/// Messages larger than the configured limit are dropped and logged.
#[derive(Clone)]
pub struct EventPublisher {
    sender: Arc<broadcast::Sender<TopicMessage>>,
    max_message_size: usize,
}

impl EventPublisher {
    pub fn new(capacity: usize, max_message_size: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            max_message_size,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopicMessage> {
        self.sender.subscribe()
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Serializes `payload` as JSON and sends it to `destination`.
    /// Returns the number of subscribers that received it.
    pub fn send_json<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<usize, PublishError> {
        let body = serde_json::to_string(payload)?;
        self.send(destination, JSON_CONTENT_TYPE, body)
    }

    pub fn send_text(&self, destination: &str, text: String) -> Result<usize, PublishError> {
        self.send(destination, TEXT_CONTENT_TYPE, text)
    }

    fn send(
        &self,
        destination: &str,
        content_type: &'static str,
        body: String,
    ) -> Result<usize, PublishError> {
        if body.len() > self.max_message_size {
            return Err(PublishError::TooLarge {
                size: body.len(),
                limit: self.max_message_size,
            });
        }

        let message = TopicMessage {
            destination: destination.to_string(),
            content_type,
            body: Arc::from(body),
        };
        // No active receivers is fine
        Ok(self.sender.send(message).unwrap_or(0))
    }

    /// Sends the recent-results snapshot requested by a subscribing client.
    pub fn publish_snapshot(&self, records: &[DetectionRecord]) {
        match self.send_json(INITIAL_TOPIC, records) {
            Ok(_) => tracing::debug!(records = records.len(), "Sent initial snapshot"),
            Err(e) => tracing::warn!("Dropped initial snapshot: {}", e),
        }
    }

    pub fn publish_pong(&self) {
        let text = format!("pong - {}", Utc::now().to_rfc3339());
        if let Err(e) = self.send_text(PING_TOPIC, text) {
            tracing::warn!("Dropped pong: {}", e);
        }
    }
}

impl DetectionSink for EventPublisher {
    fn publish(&self, event: &DetectionEvent) {
        match self.send_json(DETECTIONS_TOPIC, event) {
            Ok(receivers) => tracing::debug!(
                kind = event.kind(),
                id = event.subject_id(),
                receivers,
                "Broadcast event"
            ),
            Err(e) => tracing::warn!(
                kind = event.kind(),
                id = event.subject_id(),
                "Dropped event: {}",
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CameraId;
    use std::path::Path;

    fn record() -> DetectionRecord {
        let mut record = DetectionRecord::new_pending(
            "1_dog.jpg".to_string(),
            Path::new("/tmp/1_dog.jpg"),
            CameraId::CameraOne,
        );
        record.id = Some(1);
        record
    }

    #[test]
    fn test_publish_event_to_detections_topic() {
        let publisher = EventPublisher::new(16, 1024 * 1024);
        let mut rx = publisher.subscribe();

        publisher.publish(&DetectionEvent::single_update(&record(), None));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.destination, DETECTIONS_TOPIC);
        assert_eq!(message.content_type, JSON_CONTENT_TYPE);
        let json: serde_json::Value = serde_json::from_str(&message.body).unwrap();
        assert_eq!(json["type"], "SINGLE_UPDATE");
        assert_eq!(json["id"], 1);
    }

    #[test]
    fn test_no_subscribers_is_not_an_error() {
        let publisher = EventPublisher::new(16, 1024);
        assert_eq!(publisher.send_text(PING_TOPIC, "x".to_string()).unwrap(), 0);
    }

    #[test]
    fn test_oversized_message_dropped() {
        let publisher = EventPublisher::new(16, 64);
        let mut rx = publisher.subscribe();

        let result = publisher.send_text(DETECTIONS_TOPIC, "x".repeat(65));
        assert!(matches!(
            result,
            Err(PublishError::TooLarge { size: 65, limit: 64 })
        ));

        publisher.publish(&DetectionEvent::single_update(&record(), None));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_and_pong_topics() {
        let publisher = EventPublisher::new(16, 1024 * 1024);
        let mut rx = publisher.subscribe();

        publisher.publish_snapshot(&[record(), record()]);
        publisher.publish_pong();

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.destination, INITIAL_TOPIC);
        let list: serde_json::Value = serde_json::from_str(&snapshot.body).unwrap();
        assert_eq!(list.as_array().unwrap().len(), 2);
        assert_eq!(list[0]["fileName"], "1_dog.jpg");

        let pong = rx.try_recv().unwrap();
        assert_eq!(pong.destination, PING_TOPIC);
        assert_eq!(pong.content_type, TEXT_CONTENT_TYPE);
        assert!(pong.body.starts_with("pong - "));
    }
}
