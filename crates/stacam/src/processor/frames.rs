use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::cancel::CancelFlag;
use crate::config::{SamplingPreset, VideoConfig};
use crate::error::SamplerError;
use crate::processor::probe::MediaProbe;
use crate::sanitize;
use crate::storage::ArtifactStore;

const FRAME_JPEG_QUALITY: u8 = 90;
const STDERR_LIMIT: usize = 16 * 1024;
/// Largest accepted coded width or height.
const MAX_FRAME_DIMENSION: u32 = 8192;
/// Largest accepted pixel count per frame (8K UHD).
const MAX_FRAME_PIXELS: usize = 7680 * 4320;

/// Extracts an ordered, bounded list of JPEG frames from a video.
///
/// Implementations own the returned files until the caller deletes them. An
/// empty list is a valid result; deciding whether that is an error is up to
/// the caller.
pub trait FrameSampler: Send + Sync {
    fn sample(&self, video: &Path, cancel: &CancelFlag) -> Result<Vec<PathBuf>, SamplerError>;
}

/// Number of decoded frames between two samples, never below 1.
pub fn stride(source_fps: f64, target_fps: f64) -> u64 {
    if !(source_fps > 0.0) || !(target_fps > 0.0) {
        return 1;
    }
    ((source_fps / target_fps).round() as u64).max(1)
}

/// Size in bytes of one raw `rgb24` frame, or an error for sizes outside the
/// accepted range.
pub fn rgb_frame_len(width: u32, height: u32) -> Result<usize, SamplerError> {
    let unsupported = || SamplerError::Decode(format!("unsupported frame size {width}x{height}"));
    if width == 0 || height == 0 || width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(unsupported());
    }
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .filter(|&pixels| pixels <= MAX_FRAME_PIXELS)
        .ok_or_else(unsupported)?;
    pixels.checked_mul(3).ok_or_else(unsupported)
}

/// [`FrameSampler`] that decodes with an `ffmpeg` subprocess.
///
/// `ffmpeg` writes raw `rgb24` frames of the probed size to stdout; every
/// `stride`-th frame (1-based) is encoded as JPEG and stored in the frames
/// directory until the preset's frame cap is reached.
pub struct FfmpegFrameSampler {
    store: ArtifactStore,
    probe: MediaProbe,
    ffmpeg_path: PathBuf,
    preset: SamplingPreset,
    nominal_fps: f64,
}

impl FfmpegFrameSampler {
    pub fn new(store: ArtifactStore, config: &VideoConfig) -> Self {
        Self {
            store,
            probe: MediaProbe::new(&config.ffprobe_path),
            ffmpeg_path: PathBuf::from(&config.ffmpeg_path),
            preset: config.sampling,
            nominal_fps: config.nominal_fps,
        }
    }

    fn spawn_decoder(&self, video: &Path) -> Result<Child, SamplerError> {
        Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(video)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(SamplerError::Spawn)
    }

    fn store_frame(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        seconds: f64,
        index: u64,
    ) -> Result<PathBuf, String> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, FRAME_JPEG_QUALITY)
            .write_image(pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| e.to_string())?;
        self.store
            .store_frame(seconds, index, &jpeg)
            .map_err(|e| e.to_string())
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn sample(&self, video: &Path, cancel: &CancelFlag) -> Result<Vec<PathBuf>, SamplerError> {
        let _span = tracing::info_span!("sample_frames", file = %sanitize::redact_path(video))
            .entered();

        let info = self.probe.probe_video(video)?;
        let fps = info.fps.unwrap_or(self.nominal_fps);
        let stride = stride(fps, self.preset.target_fps());
        let max_frames = self.preset.max_frames();
        let frame_len = rgb_frame_len(info.width, info.height)?;

        tracing::debug!(
            width = info.width,
            height = info.height,
            fps,
            stride,
            max_frames,
            "Sampling video"
        );

        let mut child = self.spawn_decoder(video)?;
        let stderr = child.stderr.take().map(capture_stderr);
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SamplerError::Decode("ffmpeg stdout unavailable".to_string()));
        };

        let mut frames: Vec<PathBuf> = Vec::new();
        let mut buffer = vec![0u8; frame_len];
        let mut index: u64 = 0;
        let mut stopped_early = false;
        let mut read_error = None;

        loop {
            if cancel.is_cancelled() {
                stopped_early = true;
                break;
            }
            if frames.len() >= max_frames {
                tracing::info!(max_frames, "Frame cap reached");
                stopped_early = true;
                break;
            }

            match stdout.read_exact(&mut buffer) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    read_error = Some(e.to_string());
                    break;
                }
            }

            index += 1;
            if index % stride != 0 {
                continue;
            }

            let seconds = index as f64 / fps;
            match self.store_frame(&buffer, info.width, info.height, seconds, index) {
                Ok(path) => frames.push(path),
                Err(e) => tracing::warn!(frame = index, "Skipping frame: {}", e),
            }
        }

        drop(stdout);
        if stopped_early || read_error.is_some() {
            let _ = child.kill();
        }
        let status = child.wait().map_err(SamplerError::Spawn)?;
        let stderr_text = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if cancel.is_cancelled() {
            self.store.delete_frames(&frames);
            return Err(SamplerError::Cancelled);
        }

        if let Some(e) = read_error {
            if frames.is_empty() {
                return Err(SamplerError::Decode(e));
            }
            tracing::warn!("Decoder output ended abnormally: {}", e);
        }

        if !stopped_early && !status.success() {
            let detail = sanitize::truncate_for_log(stderr_text.trim(), 512);
            if frames.is_empty() {
                return Err(SamplerError::Decode(format!(
                    "ffmpeg exited with {}: {}",
                    status, detail
                )));
            }
            tracing::warn!("ffmpeg exited with {} after {} frames: {}", status, frames.len(), detail);
        }

        tracing::info!(frames = frames.len(), decoded = index, "Frame sampling finished");
        Ok(frames)
    }
}

fn capture_stderr<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut kept = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = STDERR_LIMIT.saturating_sub(kept.len());
                    kept.write_all(&chunk[..n.min(room)]).ok();
                }
            }
        }
        String::from_utf8_lossy(&kept).into_owned()
    })
}
