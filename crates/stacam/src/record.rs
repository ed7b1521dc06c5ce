//! Detection record: the persisted unit of work for one upload.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of uploaded artifact, derived from the file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Image,
    Video,
    Unknown,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" => FileType::Image,
            "mp4" | "avi" | "mov" | "wmv" | "mkv" => FileType::Video,
            _ => FileType::Unknown,
        }
    }

    pub fn from_file_name(name: &str) -> Self {
        Self::from_extension(extension_of(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "IMAGE",
            FileType::Video => "VIDEO",
            FileType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMAGE" => Ok(FileType::Image),
            "VIDEO" => Ok(FileType::Video),
            "UNKNOWN" => Ok(FileType::Unknown),
            other => Err(format!("unknown file type '{}'", other)),
        }
    }
}

/// Processing status of a record.
///
/// Transitions only move forward: `Pending -> Processing -> Completed | Failed`.
/// `Pending -> Failed` is allowed for jobs that never started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStatus::Pending => "PENDING",
            DetectionStatus::Processing => "PROCESSING",
            DetectionStatus::Completed => "COMPLETED",
            DetectionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DetectionStatus::Completed | DetectionStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            DetectionStatus::Pending => 0,
            DetectionStatus::Processing => 1,
            DetectionStatus::Completed | DetectionStatus::Failed => 2,
        }
    }

    /// Returns true if moving from `self` to `next` keeps the status monotonic.
    pub fn can_transition_to(&self, next: DetectionStatus) -> bool {
        match (self, next) {
            (DetectionStatus::Pending, DetectionStatus::Completed) => false,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DetectionStatus::Pending),
            "PROCESSING" => Ok(DetectionStatus::Processing),
            "COMPLETED" => Ok(DetectionStatus::Completed),
            "FAILED" => Ok(DetectionStatus::Failed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// One of the two logical cameras allowed to upload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CameraId {
    CameraOne,
    CameraTwo,
}

impl CameraId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraId::CameraOne => "camera_one",
            CameraId::CameraTwo => "camera_two",
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camera_one" => Ok(CameraId::CameraOne),
            "camera_two" => Ok(CameraId::CameraTwo),
            other => Err(format!("unknown camera id '{}'", other)),
        }
    }
}

/// Attempted a status change that would move the record backwards.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: DetectionStatus,
    pub to: DetectionStatus,
}

/// Summary written to `detections` when a video completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub message: String,
    pub total_frames: usize,
    pub successful_frames: usize,
}

impl VideoSummary {
    pub fn new(total_frames: usize, successful_frames: usize) -> Self {
        Self {
            message: "Video processed frame by frame".to_string(),
            total_frames,
            successful_frames,
        }
    }

    pub fn to_json(&self) -> String {
        // Plain struct of strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    /// Assigned by the repository on first save.
    pub id: Option<i64>,
    /// `<epoch-millis>_<original-name>`.
    pub file_name: String,
    pub file_type: FileType,
    pub file_path: String,
    /// Detector payload (images) or video summary, as JSON text.
    pub detections: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub status: DetectionStatus,
    pub error_message: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub camera_id: CameraId,
}

impl DetectionRecord {
    /// Creates a pending record for a freshly stored upload.
    pub fn new_pending(file_name: String, file_path: &Path, camera_id: CameraId) -> Self {
        let file_type = FileType::from_file_name(&file_name);
        Self {
            id: None,
            file_name,
            file_type,
            file_path: file_path.display().to_string(),
            detections: None,
            processed_at: Utc::now(),
            status: DetectionStatus::Pending,
            error_message: None,
            width: None,
            height: None,
            camera_id,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Option<(u32, u32)>) -> Self {
        if let Some((w, h)) = dimensions {
            self.width = Some(w);
            self.height = Some(h);
        }
        self
    }

    /// Identifier used in events; 0 until the record has been saved.
    pub fn id_or_default(&self) -> i64 {
        self.id.unwrap_or_default()
    }

    fn transition(&mut self, next: DetectionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn begin_processing(&mut self) -> Result<(), TransitionError> {
        self.transition(DetectionStatus::Processing)
    }

    /// Marks the record completed with a non-empty detections payload.
    pub fn complete(&mut self, detections: String) -> Result<(), TransitionError> {
        self.transition(DetectionStatus::Completed)?;
        self.detections = Some(detections);
        self.error_message = None;
        Ok(())
    }

    /// Marks the record failed. An empty message is replaced so that a failed
    /// record always carries an error message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(DetectionStatus::Failed)?;
        let message = message.into();
        self.error_message = Some(if message.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            message
        });
        Ok(())
    }

    /// MIME type advertised for the record's transported image.
    pub fn mime_type(&self) -> &'static str {
        mime_type_for(&self.file_name)
    }
}

/// Returns the lowercase-insensitive extension after the last dot, or "".
pub fn extension_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => "",
    }
}

/// MIME mapping from the original file extension; unknown extensions map to JPEG.
pub fn mime_type_for(file_name: &str) -> &'static str {
    match extension_of(file_name).to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}
