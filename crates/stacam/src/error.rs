use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StacamError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Frame sampling error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Image encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Upload rejected: {0}")]
    Upload(#[from] UploadError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Invalid file name: '{0}'")]
    InvalidName(String),
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to read image header of '{path}': {reason}")]
    ImageHeader { path: PathBuf, reason: String },

    #[error("Failed to run ffprobe: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffprobe failed: {0}")]
    Failed(String),

    #[error("No video stream found in '{0}'")]
    NoVideoStream(PathBuf),

    #[error("Unsupported file type for probing")]
    Unsupported,
}

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Frame extraction failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Frame extraction failed: could not start ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Frame extraction failed: {0}")]
    Decode(String),

    #[error("Frame extraction failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Frame extraction cancelled")]
    Cancelled,
}

/// Failures of one detector invocation.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Python is not installed or not accessible (tried: {tried})")]
    NoInterpreter { tried: String },

    #[error("Failed to start detector with '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Detector script failed with exit code: {code}\nStdout: {stdout}\nStderr: {stderr}")]
    SubprocessFailed {
        code: String,
        stdout: String,
        stderr: String,
    },

    #[error("Invalid JSON output from detector script: {output}")]
    BadOutput { output: String },

    #[error("Detector timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Detector invocation cancelled")]
    Cancelled,
}

impl DetectorError {
    /// Whether this error means the detector cannot run at all, as opposed to
    /// failing on one particular input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectorError::NoInterpreter { .. } | DetectorError::Cancelled
        )
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to read image '{path}': {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to encode JPEG: {0}")]
    Jpeg(String),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker queue is full")]
    QueueFull,
}

/// Reasons an upload is refused before anything is stored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Camera ID is required")]
    MissingCameraId,

    #[error("Invalid camera ID. Must be 'camera_one' or 'camera_two'")]
    InvalidCameraId(String),

    #[error("File is empty")]
    EmptyFile,

    #[error("Invalid file type. Only images and videos are allowed.")]
    InvalidFileType(String),
}

pub type Result<T> = std::result::Result<T, StacamError>;
