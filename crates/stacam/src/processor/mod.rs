//! Media processing steps used by the pipeline: dimension probing, frame
//! sampling, detector invocation and transport encoding.

pub mod detector;
pub mod encoder;
pub mod frames;
pub mod probe;

pub use detector::{extract_json, DetectorInvoker};
pub use encoder::{fit_within, EncodedImage, ImageTransportEncoder};
pub use frames::{FfmpegFrameSampler, FrameSampler};
pub use probe::{MediaProbe, VideoInfo};
