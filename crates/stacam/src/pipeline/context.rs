use std::path::PathBuf;

use crate::storage::ArtifactStore;

/// Sampled frames owned by one video run.
///
/// The frames are deleted when the set is cleaned up explicitly or dropped,
/// whichever comes first, so no early return can leak them.
pub struct FrameSet {
    store: ArtifactStore,
    frames: Vec<PathBuf>,
}

impl FrameSet {
    pub fn new(store: ArtifactStore, frames: Vec<PathBuf>) -> Self {
        Self { store, frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.frames.iter()
    }

    /// Deletes every frame. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.frames.is_empty() {
            return;
        }
        let failures = self.store.delete_frames(&self.frames);
        if failures > 0 {
            tracing::warn!(failures, "Some frames could not be deleted");
        }
        self.frames.clear();
    }
}

impl Drop for FrameSet {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Frame counters for one video run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameTally {
    pub total: usize,
    pub successful: usize,
}
