pub mod broadcast;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod record;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod worker;

pub use broadcast::{DetectionEvent, DetectionSink, EventPublisher, TopicMessage};
pub use cancel::CancelFlag;
pub use config::{load_config, Config};
pub use error::{
    ConfigError, DetectorError, PublishError, Result, SamplerError, StacamError, StorageError,
    UploadError, WorkerError,
};
pub use pipeline::{Pipeline, PipelineConfig};
pub use record::{CameraId, DetectionRecord, DetectionStatus, FileType, VideoSummary};
pub use service::{validate_upload, DetectionService};
