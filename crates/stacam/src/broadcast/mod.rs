//! Real-time event streaming.
//!
//! Pipeline events are typed in [`events`] and serialized onto topics by the
//! [`publisher`], which the server's STOMP broker subscribes to.

pub mod events;
pub mod publisher;

pub use events::DetectionEvent;
pub use publisher::{
    DetectionSink, EventPublisher, TopicMessage, DETECTIONS_TOPIC, INITIAL_TOPIC, PING_TOPIC,
};
