use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::error::WorkerError;
use crate::pipeline::Pipeline;
use crate::record::DetectionRecord;
use crate::worker::job::DetectionJob;

/// Error message for jobs that were still queued when the pool stopped.
pub const SHUTDOWN_MESSAGE: &str = "Processing cancelled: server shutting down";

/// Fixed set of threads running the pipeline over a bounded queue.
///
/// `shutdown` cancels in-flight jobs; `wait` joins the workers and fails
/// every job still queued, so each submitted record ends in a terminal state.
pub struct WorkerPool {
    job_sender: Sender<DetectionJob>,
    job_receiver: Receiver<DetectionJob>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    cancel: CancelFlag,
    pipeline: Arc<Pipeline>,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let (job_sender, job_receiver) = bounded::<DetectionJob>(queue_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let cancel = CancelFlag::new();

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_cancel = cancel.clone();
            let worker_pipeline = Arc::clone(&pipeline);

            let handle = thread::Builder::new()
                .name(format!("detector-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, shutdown_flag, worker_cancel, worker_pipeline);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            job_receiver,
            workers,
            shutdown,
            cancel,
            pipeline,
        })
    }

    /// Queues a saved record without blocking.
    pub fn submit(&self, record: DetectionRecord) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .try_send(DetectionJob::new(record))
            .map_err(|e| match e {
                TrySendError::Full(_) => WorkerError::QueueFull,
                TrySendError::Disconnected(_) => WorkerError::ChannelClosed,
            })
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.job_sender.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        self.cancel.cancel();
    }

    pub fn wait(self) {
        let WorkerPool {
            job_sender,
            job_receiver,
            workers,
            pipeline,
            ..
        } = self;

        // Drop sender to signal workers to exit
        drop(job_sender);

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let mut abandoned = 0;
        while let Ok(job) = job_receiver.try_recv() {
            pipeline.abandon(job.record, SHUTDOWN_MESSAGE);
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!("Failed {} queued jobs on shutdown", abandoned);
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<DetectionJob>,
    shutdown: Arc<AtomicBool>,
    cancel: CancelFlag,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(job) => {
                debug!(
                    "Worker {} processing record {} after {:?} in queue",
                    worker_id,
                    job.record_id(),
                    job.waited()
                );

                let record = pipeline.run(job.record, &cancel);
                debug!(
                    "Worker {} finished record {} as {}",
                    worker_id,
                    record.id_or_default(),
                    record.status
                );
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{DetectionEvent, DetectionSink};
    use crate::config::Config;
    use crate::db::{Database, ResultRepository, SqliteResultRepository};
    use crate::pipeline::PipelineConfig;
    use crate::record::{CameraId, DetectionStatus};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[derive(Default)]
    struct TerminalCounter {
        terminal: Mutex<Vec<i64>>,
    }

    impl DetectionSink for TerminalCounter {
        fn publish(&self, event: &DetectionEvent) {
            if event.is_terminal() {
                self.terminal.lock().unwrap().push(event.subject_id());
            }
        }
    }

    struct Fixture {
        temp: TempDir,
        repository: Arc<dyn ResultRepository>,
        sink: Arc<TerminalCounter>,
        pipeline: Arc<Pipeline>,
    }

    fn fixture(script_body: &str) -> Fixture {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("detector.sh");
        std::fs::write(&script, script_body).unwrap();

        let mut config = Config::default();
        config.upload.dir = temp.path().join("uploads").display().to_string();
        config.python.script.path = script.display().to_string();
        config.python.interpreters = vec!["bash".to_string()];
        config.websocket.image.enabled = false;

        let repository: Arc<dyn ResultRepository> = Arc::new(SqliteResultRepository::new(
            Database::open_in_memory().unwrap(),
        ));
        let sink = Arc::new(TerminalCounter::default());
        let pipeline = Arc::new(Pipeline::from_config(
            Arc::new(PipelineConfig::from_config(&config)),
            Arc::clone(&repository),
            sink.clone(),
        ));

        Fixture {
            temp,
            repository,
            sink,
            pipeline,
        }
    }

    fn saved_record(f: &Fixture, name: &str) -> DetectionRecord {
        let path = f.temp.path().join(name);
        std::fs::write(&path, b"not really an image").unwrap();
        let mut record =
            DetectionRecord::new_pending(name.to_string(), Path::new(&path), CameraId::CameraOne);
        f.repository.save(&mut record).unwrap();
        record
    }

    fn status_of(f: &Fixture, id: i64) -> DetectionStatus {
        f.repository.find_by_id(id).unwrap().unwrap().status
    }

    fn wait_for_status(f: &Fixture, id: i64, status: DetectionStatus) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while status_of(f, id) != status {
            assert!(Instant::now() < deadline, "record {} never became {}", id, status);
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_worker_pool_creation() {
        let f = fixture("echo '{}'\n");
        let pool = WorkerPool::new(Arc::clone(&f.pipeline), 2, 4).unwrap();

        assert!(!pool.is_shutdown());

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.submit(saved_record(&f, "1_a.jpg")),
            Err(WorkerError::ChannelClosed)
        ));

        pool.wait();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let f = fixture("echo '{}'\n");
        assert!(matches!(
            WorkerPool::new(Arc::clone(&f.pipeline), 0, 4),
            Err(WorkerError::SpawnFailed(_))
        ));
    }

    #[test]
    fn test_submitted_jobs_complete() {
        let f = fixture("echo '{\"detections\":[]}'\n");
        let pool = WorkerPool::new(Arc::clone(&f.pipeline), 2, 4).unwrap();

        let ids: Vec<i64> = (0..3)
            .map(|i| {
                let record = saved_record(&f, &format!("{}_cam.jpg", i));
                let id = record.id.unwrap();
                pool.submit(record).unwrap();
                id
            })
            .collect();

        // Without shutdown, wait drains the queue first
        pool.wait();

        for id in ids {
            assert_eq!(status_of(&f, id), DetectionStatus::Completed);
        }
        assert_eq!(f.sink.terminal.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_full_queue_and_shutdown() {
        let f = fixture("sleep 30\necho '{}'\n");
        let pool = WorkerPool::new(Arc::clone(&f.pipeline), 1, 1).unwrap();

        let running = saved_record(&f, "1_running.jpg");
        let running_id = running.id.unwrap();
        pool.submit(running).unwrap();
        wait_for_status(&f, running_id, DetectionStatus::Processing);

        let queued = saved_record(&f, "2_queued.jpg");
        let queued_id = queued.id.unwrap();
        pool.submit(queued).unwrap();
        assert_eq!(pool.queued(), 1);

        assert!(matches!(
            pool.submit(saved_record(&f, "3_rejected.jpg")),
            Err(WorkerError::QueueFull)
        ));

        let started = Instant::now();
        pool.shutdown();
        pool.wait();
        assert!(started.elapsed() < Duration::from_secs(10));

        assert_eq!(status_of(&f, running_id), DetectionStatus::Failed);
        let queued = f.repository.find_by_id(queued_id).unwrap().unwrap();
        assert_eq!(queued.status, DetectionStatus::Failed);
        assert_eq!(queued.error_message.as_deref(), Some(SHUTDOWN_MESSAGE));

        let terminal = f.sink.terminal.lock().unwrap();
        assert!(terminal.contains(&running_id));
        assert!(terminal.contains(&queued_id));
    }
}
