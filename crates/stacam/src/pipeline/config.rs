use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, ImageTransportConfig, PythonConfig, VideoConfig};

/// Settings the pipeline needs, extracted once from the full [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub upload_directory: PathBuf,
    pub python: PythonConfig,
    pub image: ImageTransportConfig,
    pub video: VideoConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            upload_directory: PathBuf::from(&config.upload.dir),
            python: config.python.clone(),
            image: config.websocket.image.clone(),
            video: config.video.clone(),
        }
    }

    /// Pause between two frames of one video.
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.video.frame_delay_ms)
    }
}
