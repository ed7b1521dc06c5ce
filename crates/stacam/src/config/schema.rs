use serde::{Deserialize, Serialize};

/// Root configuration. Every section and key is optional; missing values take
/// the documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub python: PythonConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct UploadConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: String,
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PythonConfig {
    #[serde(default)]
    pub script: ScriptConfig,
    /// Interpreter commands probed in order.
    #[serde(default = "default_interpreters")]
    pub interpreters: Vec<String>,
    /// Wall-clock limit for one detector run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ScriptConfig {
    #[serde(default = "default_script_path")]
    pub path: String,
}

fn default_script_path() -> String {
    "python_scripts/yolo_processor.py".to_string()
}

pub fn default_interpreters() -> Vec<String> {
    ["python", "py", "python3", "python.exe"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: default_script_path(),
        }
    }
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            script: ScriptConfig::default(),
            interpreters: default_interpreters(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct WebSocketConfig {
    #[serde(default)]
    pub image: ImageTransportConfig,
    #[serde(default = "default_five_mib")]
    pub message_size_limit: usize,
    #[serde(default = "default_five_mib")]
    pub send_buffer_size_limit: usize,
    #[serde(default = "default_send_time_limit_ms")]
    pub send_time_limit_ms: u64,
}

fn default_five_mib() -> usize {
    5 * 1024 * 1024
}

fn default_send_time_limit_ms() -> u64 {
    20_000
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            image: ImageTransportConfig::default(),
            message_size_limit: default_five_mib(),
            send_buffer_size_limit: default_five_mib(),
            send_time_limit_ms: default_send_time_limit_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ImageTransportConfig {
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_quality")]
    pub quality: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_width() -> u32 {
    800
}

fn default_max_height() -> u32 {
    600
}

fn default_quality() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

impl Default for ImageTransportConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            max_height: default_max_height(),
            quality: default_quality(),
            enabled: true,
        }
    }
}

/// Frame sampling preset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SamplingPreset {
    /// 1 frame per second, at most 300 frames.
    #[default]
    Standard,
    /// 5 frames per second, at most 1500 frames.
    Fast,
}

impl SamplingPreset {
    pub fn target_fps(&self) -> f64 {
        match self {
            SamplingPreset::Standard => 1.0,
            SamplingPreset::Fast => 5.0,
        }
    }

    pub fn max_frames(&self) -> usize {
        match self {
            SamplingPreset::Standard => 300,
            SamplingPreset::Fast => 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct VideoConfig {
    #[serde(default)]
    pub sampling: SamplingPreset,
    /// Frame rate assumed when the container does not expose one.
    #[serde(default = "default_nominal_fps")]
    pub nominal_fps: f64,
    /// Pause between two frames of the same video.
    #[serde(default = "default_frame_delay_ms")]
    pub frame_delay_ms: u64,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

fn default_nominal_fps() -> f64 {
    25.0
}

fn default_frame_delay_ms() -> u64 {
    100
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingPreset::default(),
            nominal_fps: default_nominal_fps(),
            frame_delay_ms: default_frame_delay_ms(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Defaults to twice the worker count when absent.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl WorkerConfig {
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.count * 2)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "data/stacam.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted upload request body, in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_upload_size() -> usize {
    512 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.upload.dir, "uploads");
        assert_eq!(config.python.script.path, "python_scripts/yolo_processor.py");
        assert_eq!(
            config.python.interpreters,
            vec!["python", "py", "python3", "python.exe"]
        );
        assert_eq!(config.websocket.image.max_width, 800);
        assert_eq!(config.websocket.image.max_height, 600);
        assert!((config.websocket.image.quality - 0.7).abs() < f32::EPSILON);
        assert!(config.websocket.image.enabled);
        assert_eq!(config.websocket.message_size_limit, 5 * 1024 * 1024);
        assert_eq!(config.websocket.send_time_limit_ms, 20_000);
        assert_eq!(config.video.sampling, SamplingPreset::Standard);
        assert_eq!(config.video.frame_delay_ms, 100);
        assert!(config.worker.count >= 1);
    }

    #[test]
    fn test_kebab_case_keys() {
        let json = r#"{
            "websocket": { "image": { "max-width": 320, "enabled": false } },
            "video": { "sampling": "fast", "frame-delay-ms": 0 },
            "worker": { "count": 3 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.websocket.image.max_width, 320);
        assert_eq!(config.websocket.image.max_height, 600);
        assert!(!config.websocket.image.enabled);
        assert_eq!(config.video.sampling, SamplingPreset::Fast);
        assert_eq!(config.video.frame_delay_ms, 0);
        assert_eq!(config.worker.effective_queue_capacity(), 6);
    }

    #[test]
    fn test_sampling_presets() {
        assert_eq!(SamplingPreset::Standard.target_fps(), 1.0);
        assert_eq!(SamplingPreset::Standard.max_frames(), 300);
        assert_eq!(SamplingPreset::Fast.target_fps(), 5.0);
        assert_eq!(SamplingPreset::Fast.max_frames(), 1500);
    }
}
