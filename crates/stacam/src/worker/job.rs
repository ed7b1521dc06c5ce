use std::time::{Duration, Instant};

use crate::record::DetectionRecord;

/// A saved, pending record waiting for a worker.
#[derive(Debug, Clone)]
pub struct DetectionJob {
    pub record: DetectionRecord,
    queued_at: Instant,
}

impl DetectionJob {
    pub fn new(record: DetectionRecord) -> Self {
        Self {
            record,
            queued_at: Instant::now(),
        }
    }

    pub fn record_id(&self) -> i64 {
        self.record.id_or_default()
    }

    /// Time spent in the queue so far.
    pub fn waited(&self) -> Duration {
        self.queued_at.elapsed()
    }
}
