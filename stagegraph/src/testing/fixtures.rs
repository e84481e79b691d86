//! Test fixtures for building stage graphs.

use crate::artifacts::ArtifactStore;
use crate::core::FileRef;
use crate::errors::StageGraphError;
use crate::pipelines::Subject;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Opens artifact stores for named subjects under one root.
///
/// Input scans live at `<input-dir>/<name>.mnc` with masks at
/// `<input-dir>/<name>_mask.mnc`; nothing is created on disk.
#[derive(Debug, Clone)]
pub struct SubjectFixture {
    /// Root handed to every store.
    pub root: PathBuf,
    /// Directory holding the input scans.
    pub input_dir: PathBuf,
}

impl SubjectFixture {
    /// Creates a fixture whose inputs sit in `<root>/inputs`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            input_dir: root.join("inputs"),
            root,
        }
    }

    /// Uses a different input directory.
    #[must_use]
    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    /// Input scan of `name`.
    #[must_use]
    pub fn input_file(&self, name: &str) -> FileRef {
        FileRef::in_dir(&self.input_dir, &format!("{name}.mnc"))
    }

    /// Input mask of `name`.
    #[must_use]
    pub fn mask_file(&self, name: &str) -> FileRef {
        FileRef::in_dir(&self.input_dir, &format!("{name}_mask.mnc"))
    }

    /// Opens a writable store for `name` without a mask.
    ///
    /// # Errors
    ///
    /// As [`ArtifactStore::new`].
    pub fn store(&self, name: &str) -> Result<ArtifactStore, StageGraphError> {
        ArtifactStore::new(self.input_file(name), None, &self.root)
    }

    /// Opens a writable store for `name` with its mask.
    ///
    /// # Errors
    ///
    /// As [`ArtifactStore::new`].
    pub fn masked_store(&self, name: &str) -> Result<ArtifactStore, StageGraphError> {
        ArtifactStore::new(self.input_file(name), Some(self.mask_file(name)), &self.root)
    }

    /// Opens stores for several subjects, in order.
    ///
    /// # Errors
    ///
    /// As [`ArtifactStore::new`].
    pub fn stores(&self, names: &[&str]) -> Result<Vec<ArtifactStore>, StageGraphError> {
        names.iter().map(|name| self.store(name)).collect()
    }

    /// A longitudinal subject whose scans are named `<id>_<time>`.
    ///
    /// # Errors
    ///
    /// As [`Subject::new`].
    pub fn subject(&self, id: &str, times: &[i32], intersubject: Option<i32>) -> Result<Subject, StageGraphError> {
        let time_points = times
            .iter()
            .map(|&t| Ok((t, self.store(&format!("{id}_{t}"))?)))
            .collect::<Result<BTreeMap<_, _>, StageGraphError>>()?;
        Subject::new(id, time_points, intersubject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_fixture_paths() {
        let fixture = SubjectFixture::new("/proj");
        assert_eq!(fixture.input_file("img"), FileRef::new("/proj/inputs/img.mnc"));
        let store = fixture.masked_store("img").unwrap();
        assert_eq!(store.mask(), Some(&FileRef::new("/proj/inputs/img_mask.mnc")));
        assert_eq!(store.layout().unwrap().subject_dir, Path::new("/proj/img"));
    }

    #[test]
    fn test_fixture_subject() {
        let fixture = SubjectFixture::new("/proj").with_input_dir("/scans");
        let subject = fixture.subject("s7", &[1, 2], Some(1)).unwrap();
        assert_eq!(subject.time_points().len(), 2);
        assert_eq!(subject.intersubject_store().input_file(), &FileRef::new("/scans/s7_1.mnc"));
    }
}
