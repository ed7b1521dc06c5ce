#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::process::{Command, Stdio};

/// A solid-colour JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg)
        .expect("Failed to encode JPEG");
    out.into_inner()
}

pub fn ffmpeg_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Renders a `seconds`-long 25 fps test pattern MP4 into `path`.
pub fn write_test_video(path: &Path, seconds: u32) {
    let status = Command::new("ffmpeg")
        .args(["-v", "error", "-y", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={seconds}:size=160x120:rate=25"))
        .args(["-pix_fmt", "yuv420p"])
        .arg(path)
        .status()
        .expect("Failed to run ffmpeg");
    assert!(status.success(), "ffmpeg could not render the test clip");
}
