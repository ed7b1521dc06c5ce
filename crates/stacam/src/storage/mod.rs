pub mod artifact;

pub use artifact::{ArtifactStore, StoredUpload};
