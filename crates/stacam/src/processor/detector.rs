use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::cancel::CancelFlag;
use crate::config::PythonConfig;
use crate::error::DetectorError;
use crate::sanitize;

/// Upper bound on captured bytes per stream; the rest is drained and dropped.
const CAPTURE_LIMIT: usize = 1024 * 1024;
/// Portion of captured output repeated in error messages.
const SNIPPET_LIMIT: usize = 4096;
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the external detector on single image files.
///
/// The interpreter is chosen by probing each candidate with `--version` in
/// order. The first one that works is cached for the life of the invoker and
/// forgotten again when spawning it fails at the exec level.
pub struct DetectorInvoker {
    script_path: PathBuf,
    interpreters: Vec<String>,
    timeout: Duration,
    cached_interpreter: Mutex<Option<String>>,
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

struct CapturedOutput {
    stdout: String,
    stderr: String,
}

impl DetectorInvoker {
    pub fn new(script_path: PathBuf, interpreters: Vec<String>, timeout: Duration) -> Self {
        Self {
            script_path,
            interpreters,
            timeout,
            cached_interpreter: Mutex::new(None),
        }
    }

    pub fn from_config(config: &PythonConfig) -> Self {
        Self::new(
            PathBuf::from(&config.script.path),
            config.interpreters.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Runs `<interpreter> <script> <input>` and returns the JSON object
    /// found in its stdout.
    pub fn detect(&self, input: &Path, cancel: &CancelFlag) -> Result<String, DetectorError> {
        let _span = tracing::info_span!("detect", file = %sanitize::redact_path(input)).entered();

        let interpreter = self.interpreter(cancel)?;
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut child = Command::new(&interpreter)
            .arg(&self.script_path)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.forget_interpreter(&interpreter);
                DetectorError::Spawn {
                    interpreter: interpreter.clone(),
                    source: e,
                }
            })?;

        let stdout_reader = child.stdout.take().map(capture);
        let stderr_reader = child.stderr.take().map(capture);

        // Descendants of the detector may keep the pipes open after it exits,
        // so collecting output shares the deadline with the wait.
        let status = match wait_for(&mut child, self.timeout, cancel)? {
            WaitOutcome::Exited(status) => status,
            outcome => return Err(self.abandoned(outcome)),
        };

        let output = CapturedOutput {
            stdout: collect_capture(stdout_reader, deadline, cancel)
                .map_err(|outcome| self.abandoned(outcome))?,
            stderr: collect_capture(stderr_reader, deadline, cancel)
                .map_err(|outcome| self.abandoned(outcome))?,
        };

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            status = %status,
            "Detector finished"
        );

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "terminated by signal".to_string());
            return Err(DetectorError::SubprocessFailed {
                code,
                stdout: sanitize::truncate_for_log(output.stdout.trim(), SNIPPET_LIMIT),
                stderr: sanitize::truncate_for_log(output.stderr.trim(), SNIPPET_LIMIT),
            });
        }

        match extract_json(&output.stdout) {
            Some(json) => Ok(json.to_string()),
            None => Err(DetectorError::BadOutput {
                output: sanitize::truncate_for_log(output.stdout.trim(), SNIPPET_LIMIT),
            }),
        }
    }

    fn abandoned(&self, outcome: WaitOutcome) -> DetectorError {
        match outcome {
            WaitOutcome::Cancelled => DetectorError::Cancelled,
            _ => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Detector timed out");
                DetectorError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            }
        }
    }

    /// Returns the cached interpreter or probes the candidates in order.
    fn interpreter(&self, cancel: &CancelFlag) -> Result<String, DetectorError> {
        if let Some(cached) = self.lock_cache().as_ref() {
            return Ok(cached.clone());
        }

        for candidate in &self.interpreters {
            if cancel.is_cancelled() {
                return Err(DetectorError::Cancelled);
            }
            if probe_interpreter(candidate, cancel) {
                tracing::info!(interpreter = %candidate, "Using detector interpreter");
                *self.lock_cache() = Some(candidate.clone());
                return Ok(candidate.clone());
            }
            tracing::debug!(interpreter = %candidate, "Interpreter candidate unusable");
        }

        Err(DetectorError::NoInterpreter {
            tried: self.interpreters.join(", "),
        })
    }

    fn forget_interpreter(&self, interpreter: &str) {
        let mut cache = self.lock_cache();
        if cache.as_deref() == Some(interpreter) {
            tracing::warn!(interpreter, "Interpreter could not be started, probing again next time");
            *cache = None;
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // The cache is a plain Option; a poisoned lock still holds a usable value.
        self.cached_interpreter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn cached(&self) -> Option<String> {
        self.lock_cache().clone()
    }
}

/// Runs `<cmd> --version`; true if it exits 0 in time.
fn probe_interpreter(command: &str, cancel: &CancelFlag) -> bool {
    let child = Command::new(command)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(mut child) => matches!(
            wait_for(&mut child, VERSION_PROBE_TIMEOUT, cancel),
            Ok(WaitOutcome::Exited(status)) if status.success()
        ),
        Err(_) => false,
    }
}

/// Polls the child until it exits, the deadline passes or `cancel` is set.
/// The child is killed and reaped in the latter two cases.
fn wait_for(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<WaitOutcome, DetectorError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(WaitOutcome::Exited(status)),
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DetectorError::Spawn {
                    interpreter: "<wait>".to_string(),
                    source: e,
                });
            }
        }

        let outcome = if cancel.is_cancelled() {
            Some(WaitOutcome::Cancelled)
        } else if Instant::now() >= deadline {
            Some(WaitOutcome::TimedOut)
        } else {
            None
        };

        if let Some(outcome) = outcome {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(outcome);
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Reads a pipe to the end on a helper thread, keeping at most
/// `CAPTURE_LIMIT` bytes. The text arrives on the returned channel once the
/// pipe closes.
fn capture<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let mut kept: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = CAPTURE_LIMIT.saturating_sub(kept.len());
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&kept).into_owned());
    });
    rx
}

/// Waits for a capture thread until `deadline` or cancellation.
fn collect_capture(
    reader: Option<Receiver<String>>,
    deadline: Instant,
    cancel: &CancelFlag,
) -> Result<String, WaitOutcome> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    loop {
        if cancel.is_cancelled() {
            return Err(WaitOutcome::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WaitOutcome::TimedOut);
        }
        match reader.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(text) => return Ok(text),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(String::new()),
        }
    }
}

/// Extracts the candidate JSON object from noisy detector output.
///
/// Takes the slice from the first `{` to the last `}` and accepts it only if
/// it parses as a JSON object.
pub fn extract_json(output: &str) -> Option<&str> {
    let first = output.find('{')?;
    let last = output.rfind('}')?;
    if first > last {
        return None;
    }
    let candidate = &output[first..=last];
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(value) if value.is_object() => Some(candidate),
        _ => None,
    }
}
