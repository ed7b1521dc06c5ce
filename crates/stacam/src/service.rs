//! Upload intake and result queries: the operations behind the HTTP surface.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::broadcast::EventPublisher;
use crate::config::Config;
use crate::db::{Database, DatabaseError, ResultRepository, SqliteResultRepository};
use crate::error::{Result, UploadError, WorkerError};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::processor::MediaProbe;
use crate::record::{CameraId, DetectionRecord, FileType};
use crate::storage::ArtifactStore;
use crate::worker::WorkerPool;

/// Buffered messages per subscriber before a slow one starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Checks an upload request before anything is written.
///
/// Checks run in a fixed order: camera id present, camera id known, file
/// non-empty, then the file extension. Returns the parsed camera and the
/// client's file name.
pub fn validate_upload<'a>(
    camera_id: Option<&str>,
    file_name: Option<&'a str>,
    size: usize,
) -> std::result::Result<(CameraId, &'a str), UploadError> {
    let camera_id = match camera_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => return Err(UploadError::MissingCameraId),
    };
    let camera = camera_id
        .parse::<CameraId>()
        .map_err(|_| UploadError::InvalidCameraId(camera_id.to_string()))?;

    if size == 0 {
        return Err(UploadError::EmptyFile);
    }

    match file_name {
        Some(name) if FileType::from_file_name(name) != FileType::Unknown => Ok((camera, name)),
        other => Err(UploadError::InvalidFileType(
            other.unwrap_or_default().to_string(),
        )),
    }
}

/// Owns the processing stack for one server process.
pub struct DetectionService {
    store: ArtifactStore,
    probe: MediaProbe,
    repository: Arc<dyn ResultRepository>,
    publisher: EventPublisher,
    pipeline: Arc<Pipeline>,
    pool: Mutex<Option<WorkerPool>>,
}

impl DetectionService {
    /// Opens the database, creates the upload directory and starts the
    /// worker pool.
    pub fn from_config(config: &Config) -> Result<Self> {
        let database = Database::from_config(&config.database)?;
        let repository: Arc<dyn ResultRepository> =
            Arc::new(SqliteResultRepository::new(database));
        let publisher = EventPublisher::new(
            EVENT_CHANNEL_CAPACITY,
            config.websocket.message_size_limit,
        );

        let pipeline = Arc::new(Pipeline::from_config(
            Arc::new(PipelineConfig::from_config(config)),
            Arc::clone(&repository),
            Arc::new(publisher.clone()),
        ));
        let store = pipeline.store().clone();
        store.ensure_root()?;

        let pool = WorkerPool::new(
            Arc::clone(&pipeline),
            config.worker.count,
            config.worker.effective_queue_capacity(),
        )?;

        Ok(Self {
            store,
            probe: MediaProbe::new(&config.video.ffprobe_path),
            repository,
            publisher,
            pipeline,
            pool: Mutex::new(Some(pool)),
        })
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Validates and stores an upload, saves its `PENDING` record and queues
    /// it for processing. The returned record is the state at queue time.
    pub fn accept_upload(
        &self,
        camera_id: Option<&str>,
        file_name: Option<&str>,
        content: &[u8],
    ) -> Result<DetectionRecord> {
        let (camera, original_name) = validate_upload(camera_id, file_name, content.len())?;
        let _span = tracing::info_span!("accept_upload", camera = %camera).entered();

        let stored = self.store.store_upload(original_name, content)?;
        let file_type = FileType::from_file_name(&stored.file_name);
        let dimensions = self.probe.dimensions(&stored.path, file_type);

        let mut record = DetectionRecord::new_pending(stored.file_name, &stored.path, camera)
            .with_dimensions(dimensions);
        if let Err(e) = self.repository.save(&mut record) {
            if let Err(cleanup) = self.store.remove(&stored.path) {
                tracing::warn!("Could not remove unsaved upload: {}", cleanup);
            }
            return Err(e.into());
        }

        tracing::info!(
            record_id = record.id_or_default(),
            file_name = %record.file_name,
            file_type = %record.file_type,
            "Upload accepted"
        );

        if let Err(e) = self.submit(record.clone()) {
            tracing::error!(record_id = record.id_or_default(), "Could not queue upload: {}", e);
            self.pipeline
                .abandon(record, &format!("Failed to start processing: {}", e));
            return Err(e.into());
        }

        Ok(record)
    }

    fn submit(&self, record: DetectionRecord) -> std::result::Result<(), WorkerError> {
        let pool = self.pool.lock().unwrap_or_else(|p| p.into_inner());
        match pool.as_ref() {
            Some(pool) => pool.submit(record),
            None => Err(WorkerError::ChannelClosed),
        }
    }

    /// The ten most recent records, newest first.
    pub fn recent(&self) -> std::result::Result<Vec<DetectionRecord>, DatabaseError> {
        self.repository.find_top10_by_processed_at_desc()
    }

    /// Records processed within the last `minutes` minutes, newest first.
    pub fn since_minutes(
        &self,
        minutes: i64,
    ) -> std::result::Result<Vec<DetectionRecord>, DatabaseError> {
        self.repository.find_since(window_start(Utc::now(), minutes))
    }

    pub fn find(&self, id: i64) -> std::result::Result<Option<DetectionRecord>, DatabaseError> {
        self.repository.find_by_id(id)
    }

    /// Sends the recent-results snapshot to `/topic/detections/initial`.
    pub fn publish_snapshot(&self) {
        match self.recent() {
            Ok(records) => self.publisher.publish_snapshot(&records),
            Err(e) => tracing::warn!("Could not load snapshot: {}", e),
        }
    }

    /// Cancels in-flight jobs, fails queued ones and joins the workers.
    /// Blocks; later calls return immediately.
    pub fn shutdown(&self) {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait();
        }
    }
}

/// Start of a look-back window of `minutes` ending at `now`. Windows that
/// reach past the representable range start at the Unix epoch.
fn window_start(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    Duration::try_minutes(minutes)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
