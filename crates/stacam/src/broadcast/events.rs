//! Events broadcast on the detections topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::processor::EncodedImage;
use crate::record::{CameraId, DetectionRecord, DetectionStatus};

/// One message on `/topic/detections`, discriminated by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionEvent {
    SingleUpdate(SingleUpdate),
    VideoProcessingStart(VideoProcessingStart),
    FrameDetection(FrameDetection),
    FrameError(FrameError),
    VideoProcessingComplete(VideoProcessingComplete),
    VideoProcessingFailed(VideoProcessingFailed),
}

impl DetectionEvent {
    /// Record or video id the event belongs to.
    pub fn subject_id(&self) -> i64 {
        match self {
            DetectionEvent::SingleUpdate(e) => e.record.id_or_default(),
            DetectionEvent::VideoProcessingStart(e) => e.video_id,
            DetectionEvent::FrameDetection(e) => e.video_id,
            DetectionEvent::FrameError(e) => e.video_id,
            DetectionEvent::VideoProcessingComplete(e) => e.video_id,
            DetectionEvent::VideoProcessingFailed(e) => e.video_id,
        }
    }

    /// True for the one event that ends an upload's sequence.
    pub fn is_terminal(&self) -> bool {
        match self {
            DetectionEvent::SingleUpdate(e) => e.record.status.is_terminal(),
            DetectionEvent::VideoProcessingComplete(_) | DetectionEvent::VideoProcessingFailed(_) => {
                true
            }
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DetectionEvent::SingleUpdate(_) => "SINGLE_UPDATE",
            DetectionEvent::VideoProcessingStart(_) => "VIDEO_PROCESSING_START",
            DetectionEvent::FrameDetection(_) => "FRAME_DETECTION",
            DetectionEvent::FrameError(_) => "FRAME_ERROR",
            DetectionEvent::VideoProcessingComplete(_) => "VIDEO_PROCESSING_COMPLETE",
            DetectionEvent::VideoProcessingFailed(_) => "VIDEO_PROCESSING_FAILED",
        }
    }

    pub fn single_update(record: &DetectionRecord, image: Option<EncodedImage>) -> Self {
        let (image_base64, mime_type) = split_image(image);
        DetectionEvent::SingleUpdate(SingleUpdate {
            record: record.clone(),
            image_base64,
            mime_type,
        })
    }

    pub fn video_start(record: &DetectionRecord, total_frames: usize) -> Self {
        DetectionEvent::VideoProcessingStart(VideoProcessingStart {
            video_id: record.id_or_default(),
            video: VideoRef::from(record),
            total_frames,
            timestamp: Utc::now(),
        })
    }

    pub fn frame_detection(
        record: &DetectionRecord,
        frame_second: u32,
        detections: String,
        processing_time_ms: u64,
        image: Option<EncodedImage>,
    ) -> Self {
        let (image_base64, mime_type) = split_image(image);
        DetectionEvent::FrameDetection(FrameDetection {
            video_id: record.id_or_default(),
            video: VideoRef::from(record),
            frame_second,
            detections,
            processing_time_ms,
            image_base64,
            mime_type,
            timestamp: Utc::now(),
        })
    }

    pub fn frame_error(record: &DetectionRecord, frame_second: u32, error: String) -> Self {
        DetectionEvent::FrameError(FrameError {
            video_id: record.id_or_default(),
            video: VideoRef::from(record),
            frame_second,
            error,
            timestamp: Utc::now(),
        })
    }

    pub fn video_complete(
        record: &DetectionRecord,
        total_frames: usize,
        successful_frames: usize,
    ) -> Self {
        DetectionEvent::VideoProcessingComplete(VideoProcessingComplete {
            video_id: record.id_or_default(),
            video: VideoRef::from(record),
            total_frames,
            successful_frames,
            timestamp: Utc::now(),
        })
    }

    pub fn video_failed(record: &DetectionRecord, error: String) -> Self {
        DetectionEvent::VideoProcessingFailed(VideoProcessingFailed {
            video_id: record.id_or_default(),
            video: VideoRef::from(record),
            error,
            timestamp: Utc::now(),
        })
    }
}

fn split_image(image: Option<EncodedImage>) -> (Option<String>, Option<String>) {
    match image {
        Some(img) => (Some(img.base64), Some(img.mime_type.to_string())),
        None => (None, None),
    }
}

/// Record snapshot plus the transported image, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SingleUpdate {
    #[serde(flatten)]
    pub record: DetectionRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl SingleUpdate {
    pub fn status(&self) -> DetectionStatus {
        self.record.status
    }
}

/// Fields shared by every video event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoRef {
    pub file_name: String,
    pub camera_id: CameraId,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<&DetectionRecord> for VideoRef {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            file_name: record.file_name.clone(),
            camera_id: record.camera_id,
            width: record.width,
            height: record.height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoProcessingStart {
    pub video_id: i64,
    #[serde(flatten)]
    pub video: VideoRef,
    pub total_frames: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetection {
    pub video_id: i64,
    #[serde(flatten)]
    pub video: VideoRef,
    /// 1-based position of the frame in the sampled sequence.
    pub frame_second: u32,
    /// Detector payload as JSON text.
    pub detections: String,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameError {
    pub video_id: i64,
    #[serde(flatten)]
    pub video: VideoRef,
    pub frame_second: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoProcessingComplete {
    pub video_id: i64,
    #[serde(flatten)]
    pub video: VideoRef,
    pub total_frames: usize,
    pub successful_frames: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoProcessingFailed {
    pub video_id: i64,
    #[serde(flatten)]
    pub video: VideoRef,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}
