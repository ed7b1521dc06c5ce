pub mod job;
pub mod pool;

pub use job::DetectionJob;
pub use pool::{WorkerPool, SHUTDOWN_MESSAGE};
