use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::StorageError;
use crate::sanitize;

const FRAMES_DIR: &str = "frames";
const MAX_NAME_ATTEMPTS: u32 = 1000;
const STAGING_SUFFIX: &str = ".partial";

/// An upload persisted under the upload root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// `<epoch-millis>_<original-name>`, possibly with a numeric suffix.
    pub file_name: String,
    pub path: PathBuf,
}

/// Scratch storage for raw uploads and transient video frames.
///
/// Layout: `<root>/` holds originals, `<root>/frames/` holds frames. Both are
/// created on demand.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_directory(&self) -> PathBuf {
        self.root.join(FRAMES_DIR)
    }

    pub fn ensure_root(&self) -> Result<(), StorageError> {
        ensure_directory(&self.root)
    }

    /// Writes the uploaded bytes to `<root>/<epoch-ms>_<original>`.
    pub fn store_upload(
        &self,
        original_name: &str,
        content: &[u8],
    ) -> Result<StoredUpload, StorageError> {
        let name = sanitize::sanitize_file_name(original_name)
            .ok_or_else(|| StorageError::InvalidName(original_name.to_string()))?;
        self.ensure_root()?;

        let file_name = format!("{}_{}", Utc::now().timestamp_millis(), name);
        let path = create_exclusive(&self.root, &file_name, content)?;
        let file_name = sanitize::redact_path(&path);

        log::debug!("Stored upload {} ({} bytes)", file_name, content.len());
        Ok(StoredUpload { file_name, path })
    }

    /// Writes one encoded frame as
    /// `frames/frame_<epoch-ms>_<seconds>s_<index>.jpg`.
    pub fn store_frame(
        &self,
        seconds: f64,
        index: u64,
        jpeg: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.frames_directory();
        ensure_directory(&dir)?;

        let file_name = format!(
            "frame_{}_{:.1}s_{}.jpg",
            Utc::now().timestamp_millis(),
            seconds,
            index
        );
        create_exclusive(&dir, &file_name, jpeg)
    }

    /// Deletes a file. A missing file is not an error.
    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::RemoveFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Deletes every listed frame, logging failures instead of returning them.
    /// Returns the number of files that could not be deleted.
    pub fn delete_frames(&self, frames: &[PathBuf]) -> usize {
        let mut failures = 0;
        for frame in frames {
            if let Err(e) = self.remove(frame) {
                log::warn!("Frame cleanup failed: {}", e);
                failures += 1;
            }
        }
        failures
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Creates `dir/file_name` without replacing anything, falling back to
/// numbered variants (`name_2.ext`, `name_3.ext`, ...) when the name is taken.
///
/// The content is written and synced to a hidden staging file first and then
/// linked under its final name, so the final name never shows a partial file.
fn create_exclusive(dir: &Path, file_name: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
    let staged = stage(dir, file_name, content)?;
    let published = publish(dir, file_name, &staged);
    if let Err(e) = std::fs::remove_file(&staged) {
        log::warn!("Could not remove staging file {}: {}", staged.display(), e);
    }
    published
}

fn stage(dir: &Path, file_name: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let path = dir.join(format!(".{}.{}{}", file_name, attempt, STAGING_SUFFIX));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
                    drop(file);
                    let _ = std::fs::remove_file(&path);
                    return Err(StorageError::WriteFile { path, source: e });
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        }
    }

    Err(StorageError::FileExists(dir.join(file_name)))
}

fn publish(dir: &Path, file_name: &str, staged: &Path) -> Result<PathBuf, StorageError> {
    let (base, ext) = match file_name.rfind('.') {
        Some(dot) if dot > 0 => (&file_name[..dot], Some(&file_name[dot..])),
        _ => (file_name, None),
    };

    for counter in 1..=MAX_NAME_ATTEMPTS {
        let candidate = if counter == 1 {
            file_name.to_string()
        } else {
            match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            }
        };
        let path = dir.join(&candidate);

        match std::fs::hard_link(staged, &path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        }
    }

    Err(StorageError::FileExists(dir.join(file_name)))
}
