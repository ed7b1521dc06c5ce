pub mod config;
pub mod context;
pub mod error;
pub mod runner;

pub use config::PipelineConfig;
pub use context::{FrameSet, FrameTally};
pub use error::PipelineError;
pub use runner::Pipeline;
