//! Per-subject artifact provenance.
//!
//! Every subject owns one [`ArtifactStore`]. The store names derived files
//! deterministically from the subject's base name and a root directory, and
//! answers "most recent X" queries against its current [`ArtifactGroup`].

mod group;
mod layout;
mod store;

pub use group::{ArtifactGroup, ArtifactKey, BlurKind, BlurQuery, LabelSet};
pub use layout::{
    DirectoryLayout, OutputDir, LABELS_DIR, LOG_DIR, RESAMPLED_DIR, STATS_DIR, TMP_DIR, TRANSFORMS_DIR,
};
pub use store::{ArtifactStore, BlurOutputs, BASE_GROUP};
