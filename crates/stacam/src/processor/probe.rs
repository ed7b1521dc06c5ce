use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::error::ProbeError;
use crate::record::FileType;

/// Container metadata of a video's first video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Average frame rate, when the container exposes a usable one.
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Reads intrinsic dimensions of images and videos.
///
/// Image headers are decoded in-process; videos are inspected with `ffprobe`.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    ffprobe_path: PathBuf,
}

impl MediaProbe {
    pub fn new<P: AsRef<Path>>(ffprobe_path: P) -> Self {
        Self {
            ffprobe_path: ffprobe_path.as_ref().to_path_buf(),
        }
    }

    /// Best-effort width/height. Failures are logged and yield `None`.
    pub fn dimensions(&self, path: &Path, file_type: FileType) -> Option<(u32, u32)> {
        let result = match file_type {
            FileType::Image => probe_image(path),
            FileType::Video => self.probe_video(path).map(|info| (info.width, info.height)),
            FileType::Unknown => Err(ProbeError::Unsupported),
        };

        match result {
            Ok(dims) => Some(dims),
            Err(e) => {
                tracing::warn!("Could not read dimensions: {}", e);
                None
            }
        }
    }

    pub fn probe_video(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,avg_frame_rate,r_frame_rate",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            return Err(ProbeError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_probe_output(&output.stdout, path)
    }
}

/// Reads an image's dimensions from its header without decoding pixels.
pub fn probe_image(path: &Path) -> Result<(u32, u32), ProbeError> {
    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| ProbeError::ImageHeader {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .into_dimensions()
        .map_err(|e| ProbeError::ImageHeader {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn parse_probe_output(stdout: &[u8], path: &Path) -> Result<VideoInfo, ProbeError> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ProbeError::Failed(format!("unreadable ffprobe output: {}", e)))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ProbeError::NoVideoStream(path.to_path_buf())),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    Ok(VideoInfo { width, height, fps })
}

/// Parses ffprobe rates such as `25/1`, `30000/1001` or `29.97`.
/// `0/0` and other non-positive values mean "unknown".
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };

    (value.is_finite() && value > 0.0).then_some(value)
}
