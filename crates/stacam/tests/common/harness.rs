//! Test harness running a real `DetectionService` against a fake detector.
//!
//! The detector is a bash script executed through the interpreter candidate
//! `bash`, so exit codes, stdout noise and stderr take the real subprocess
//! path.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use stacam::broadcast::DETECTIONS_TOPIC;
use stacam::config::Config;
use stacam::{DetectionService, TopicMessage};

/// Events seen on `/topic/detections` for one upload, in arrival order.
#[derive(Debug)]
pub struct Collected {
    pub events: Vec<Value>,
}

impl Collected {
    pub fn types(&self) -> Vec<&str> {
        self.events
            .iter()
            .map(|e| e["type"].as_str().unwrap_or_default())
            .collect()
    }

    pub fn last(&self) -> &Value {
        self.events.last().expect("no events collected")
    }

    pub fn of_type(&self, kind: &str) -> Vec<&Value> {
        self.events.iter().filter(|e| e["type"] == kind).collect()
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: Config,
}

impl TestHarness {
    /// Harness whose detector runs `script` with bash. Image transport is
    /// disabled and frames are processed without delay.
    pub fn new(script: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let script_path = base.join("detector.sh");
        std::fs::write(&script_path, script).expect("Failed to write detector script");

        let mut config = Config::default();
        config.upload.dir = base.join("uploads").display().to_string();
        config.database.path = base.join("data").join("stacam.db").display().to_string();
        config.python.script.path = script_path.display().to_string();
        config.python.interpreters = vec!["bash".to_string()];
        config.python.timeout_secs = 20;
        config.websocket.image.enabled = false;
        config.video.frame_delay_ms = 0;
        config.worker.count = 1;

        Self { temp_dir, config }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.upload.dir)
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.upload_dir().join("frames")
    }

    /// Files currently in the frames directory.
    pub fn frame_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.frames_dir()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Starts the service and subscribes before anything is published.
    pub fn start(&self) -> (DetectionService, Receiver<TopicMessage>) {
        let service =
            DetectionService::from_config(&self.config).expect("Failed to start service");
        let rx = service.publisher().subscribe();
        (service, rx)
    }
}

/// Collects detection events for `id` until its terminal event arrives.
pub fn collect_until_terminal(rx: &mut Receiver<TopicMessage>, id: i64) -> Collected {
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut events = Vec::new();

    loop {
        match rx.try_recv() {
            Ok(message) if message.destination == DETECTIONS_TOPIC => {
                let event: Value =
                    serde_json::from_str(&message.body).expect("event is not JSON");
                if subject_of(&event) != Some(id) {
                    continue;
                }
                let terminal = is_terminal(&event);
                events.push(event);
                if terminal {
                    return Collected { events };
                }
            }
            Ok(_) => {}
            Err(TryRecvError::Empty) => {
                assert!(
                    Instant::now() < deadline,
                    "no terminal event for {id}; got {events:?}"
                );
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("event stream broke: {e}"),
        }
    }
}

fn subject_of(event: &Value) -> Option<i64> {
    event["videoId"].as_i64().or_else(|| event["id"].as_i64())
}

fn is_terminal(event: &Value) -> bool {
    match event["type"].as_str() {
        Some("SINGLE_UPDATE") => matches!(event["status"].as_str(), Some("COMPLETED" | "FAILED")),
        Some("VIDEO_PROCESSING_COMPLETE" | "VIDEO_PROCESSING_FAILED") => true,
        _ => false,
    }
}
