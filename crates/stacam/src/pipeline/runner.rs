use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn};

use crate::broadcast::{DetectionEvent, DetectionSink};
use crate::cancel::CancelFlag;
use crate::db::ResultRepository;
use crate::processor::{
    DetectorInvoker, EncodedImage, FfmpegFrameSampler, FrameSampler, ImageTransportEncoder,
};
use crate::record::{DetectionRecord, DetectionStatus, FileType, VideoSummary};
use crate::sanitize;
use crate::storage::ArtifactStore;

use super::config::PipelineConfig;
use super::context::{FrameSet, FrameTally};
use super::error::PipelineError;

const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// Drives one record from `PENDING` to a terminal status.
///
/// Every run persists the `PROCESSING` state, broadcasts it, does the work
/// and then persists the terminal state before broadcasting exactly one
/// terminal event.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: ArtifactStore,
    sampler: Arc<dyn FrameSampler>,
    detector: DetectorInvoker,
    encoder: ImageTransportEncoder,
    repository: Arc<dyn ResultRepository>,
    sink: Arc<dyn DetectionSink>,
}

impl Pipeline {
    /// Production constructor: ffmpeg sampling and the configured detector.
    pub fn from_config(
        config: Arc<PipelineConfig>,
        repository: Arc<dyn ResultRepository>,
        sink: Arc<dyn DetectionSink>,
    ) -> Self {
        let store = ArtifactStore::new(&config.upload_directory);
        let sampler = Arc::new(FfmpegFrameSampler::new(store.clone(), &config.video));
        let detector = DetectorInvoker::from_config(&config.python);
        Self::new(config, store, sampler, detector, repository, sink)
    }

    /// Assembles a pipeline from explicit parts.
    pub fn new(
        config: Arc<PipelineConfig>,
        store: ArtifactStore,
        sampler: Arc<dyn FrameSampler>,
        detector: DetectorInvoker,
        repository: Arc<dyn ResultRepository>,
        sink: Arc<dyn DetectionSink>,
    ) -> Self {
        let encoder = ImageTransportEncoder::new(config.image.clone());
        Self {
            config,
            store,
            sampler,
            detector,
            encoder,
            repository,
            sink,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Processes a pending record and returns it in its terminal state.
    pub fn run(&self, mut record: DetectionRecord, cancel: &CancelFlag) -> DetectionRecord {
        let _pipeline_span = info_span!("pipeline",
            record_id = record.id_or_default(),
            file_name = %record.file_name,
            camera = %record.camera_id,
        )
        .entered();

        if let Err(e) = record.begin_processing() {
            warn!("Skipping record: {}", e);
            return record;
        }
        if let Err(e) = self.repository.save(&mut record) {
            let message = format!("Failed to persist record: {}", e);
            self.fail_and_publish(&mut record, message.clone(), message);
            return record;
        }
        self.sink
            .publish(&DetectionEvent::single_update(&record, None));

        match record.file_type {
            FileType::Image => {
                let _step = info_span!("process_image").entered();
                self.process_image(&mut record, cancel);
            }
            FileType::Video => {
                let _step = info_span!("process_video").entered();
                self.process_video(&mut record, cancel);
            }
            FileType::Unknown => {
                let message = "Unsupported file type".to_string();
                self.fail_and_publish(&mut record, message.clone(), message);
            }
        }

        info!(status = %record.status, "Processing finished");
        record
    }

    /// Fails a record that will never run (queue full, shutdown) and emits
    /// its terminal event.
    pub fn abandon(&self, mut record: DetectionRecord, reason: &str) -> DetectionRecord {
        let _span = info_span!("abandon", record_id = record.id_or_default()).entered();
        self.fail_and_publish(&mut record, reason.to_string(), reason.to_string());
        record
    }

    fn process_image(&self, record: &mut DetectionRecord, cancel: &CancelFlag) {
        let path = PathBuf::from(&record.file_path);

        match self.detector.detect(&path, cancel) {
            Ok(detections) => {
                if let Err(e) = record.complete(detections) {
                    warn!("Cannot complete record: {}", e);
                }
                self.persist(record);
                let image = if record.status == DetectionStatus::Completed {
                    self.encode_for_transport(&path, &record.file_name)
                } else {
                    None
                };
                self.sink
                    .publish(&DetectionEvent::single_update(record, image));
            }
            Err(e) => {
                warn!("Detection failed: {}", e);
                let message = e.to_string();
                self.fail_and_publish(record, message.clone(), message);
            }
        }
    }

    fn process_video(&self, record: &mut DetectionRecord, cancel: &CancelFlag) {
        match self.process_frames(record, cancel) {
            Ok(tally) => {
                let summary = VideoSummary::new(tally.total, tally.successful);
                if let Err(e) = record.complete(summary.to_json()) {
                    warn!("Cannot complete record: {}", e);
                }
                self.persist(record);
                self.sink.publish(&DetectionEvent::video_complete(
                    record,
                    tally.total,
                    tally.successful,
                ));
            }
            Err(e) => {
                warn!("Video processing failed: {}", e);
                self.fail_and_publish(record, e.record_message(), e.to_string());
            }
        }
    }

    /// Samples the video and runs detection on each frame in order. Frames
    /// are deleted before this returns, on every path.
    fn process_frames(
        &self,
        record: &DetectionRecord,
        cancel: &CancelFlag,
    ) -> Result<FrameTally, PipelineError> {
        let video = PathBuf::from(&record.file_path);
        let sampled = {
            let _step = info_span!("sample_frames").entered();
            self.sampler.sample(&video, cancel)?
        };
        let mut frames = FrameSet::new(self.store.clone(), sampled);
        if frames.is_empty() {
            return Err(PipelineError::NoFrames);
        }

        let mut tally = FrameTally {
            total: frames.len(),
            successful: 0,
        };
        self.sink
            .publish(&DetectionEvent::video_start(record, tally.total));

        let delay = self.config.frame_delay();
        for (i, frame) in frames.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let frame_second = (i + 1) as u32;
            let _frame_span = info_span!("frame", frame_second).entered();

            let started = Instant::now();
            match self.detector.detect(frame, cancel) {
                Ok(detections) => {
                    let processing_time_ms = started.elapsed().as_millis() as u64;
                    let image = self.encode_for_transport(frame, &sanitize::redact_path(frame));
                    tally.successful += 1;
                    self.sink.publish(&DetectionEvent::frame_detection(
                        record,
                        frame_second,
                        detections,
                        processing_time_ms,
                        image,
                    ));
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    debug!("Frame detection failed: {}", e);
                    self.sink.publish(&DetectionEvent::frame_error(
                        record,
                        frame_second,
                        e.to_string(),
                    ));
                }
            }

            if i + 1 < tally.total {
                pause(delay, cancel);
            }
        }

        frames.cleanup();
        Ok(tally)
    }

    /// Moves the record to `FAILED`, persists it and emits the terminal event
    /// matching its file type.
    fn fail_and_publish(&self, record: &mut DetectionRecord, message: String, event_error: String) {
        if let Err(e) = record.fail(message) {
            warn!("Cannot fail record: {}", e);
        }
        self.persist(record);

        let event = match record.file_type {
            FileType::Video => DetectionEvent::video_failed(record, event_error),
            _ => DetectionEvent::single_update(record, None),
        };
        self.sink.publish(&event);
    }

    fn persist(&self, record: &mut DetectionRecord) {
        if let Err(e) = self.repository.save(record) {
            tracing::error!(status = %record.status, "Failed to persist record: {}", e);
        }
    }

    fn encode_for_transport(&self, path: &Path, name: &str) -> Option<EncodedImage> {
        match self.encoder.encode_file(path, name) {
            Ok(image) => image,
            Err(e) => {
                warn!("Image omitted from event: {}", e);
                None
            }
        }
    }
}

/// Sleeps for `delay`, returning early once `cancel` is set.
fn pause(delay: Duration, cancel: &CancelFlag) {
    let deadline = Instant::now() + delay;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}
