//! A lock-guarded global stage set for per-subject parallel construction.
//!
//! Each thread builds its subject's graph with its own `ArtifactStore` and
//! `Stages`, then merges into the shared set. The merge is the same
//! deduplicating union used by `Stages::defer`.

use super::{BuildResult, Stages};
use crate::errors::StageGraphError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared accumulator. Cloning yields another handle to the same set.
#[derive(Debug, Clone, Default)]
pub struct SharedStages {
    inner: Arc<Mutex<Stages>>,
}

impl SharedStages {
    /// Creates an empty shared set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a finished per-subject set.
    ///
    /// # Errors
    ///
    /// `NamingCollision` if two subjects claim the same output path.
    pub fn merge(&self, stages: Stages) -> Result<usize, StageGraphError> {
        self.inner.lock().merge(stages)
    }

    /// Merges a sub-result and returns its output.
    ///
    /// # Errors
    ///
    /// The construction error, or `NamingCollision` from the merge.
    pub fn defer<T>(&self, result: Result<BuildResult<T>, StageGraphError>) -> Result<T, StageGraphError> {
        self.inner.lock().defer(result)
    }

    /// Returns the number of stages merged so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if nothing was merged yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns a copy of the current set.
    #[must_use]
    pub fn snapshot(&self) -> Stages {
        self.inner.lock().clone()
    }

    /// Takes the accumulated set, leaving an empty one behind.
    #[must_use]
    pub fn take(&self) -> Stages {
        std::mem::take(&mut *self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FileRef;
    use crate::stages::CmdStage;
    use std::thread;

    fn subject_stages(name: &str) -> Stages {
        let mut stages = Stages::from_stage(
            CmdStage::builder()
                .arg("mincblur")
                .input(&FileRef::new("/model/in.mnc"))
                .output(&FileRef::new("/model/avg.mnc"))
                .log_file(FileRef::new("/model/log/avg.log"))
                .build()
                .unwrap(),
        );
        stages
            .add(
                CmdStage::builder()
                    .arg("mincresample")
                    .input(&FileRef::new(format!("/in/{name}.mnc")))
                    .output(&FileRef::new(format!("/out/{name}/resampled.mnc")))
                    .log_file(FileRef::new(format!("/out/{name}/log/resampled.log")))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        stages
    }

    #[test]
    fn test_parallel_merge_dedups_shared_stages() {
        let shared = SharedStages::new();
        let handles: Vec<_> = ["s1", "s2", "s3"]
            .into_iter()
            .map(|name| {
                let shared = shared.clone();
                thread::spawn(move || shared.merge(subject_stages(name)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // one shared model blur plus one resample per subject
        assert_eq!(shared.len(), 4);
        let taken = shared.take();
        assert_eq!(taken.len(), 4);
        assert!(shared.is_empty());
    }
}
