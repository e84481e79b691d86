//! The per-subject artifact store.
//!
//! An [`ArtifactStore`] is an append-only arena of [`ArtifactGroup`]s plus the
//! subject's fixed directory layout. Construction functions take the store by
//! `&mut` to name new files and record what they produced, and by `&` when they
//! only query it (e.g. a registration target).

use super::group::{ArtifactGroup, ArtifactKey, BlurKind, BlurQuery, LabelSet};
use super::layout::{DirectoryLayout, OutputDir};
use crate::core::{FileRef, Fwhm};
use crate::errors::{ProvenanceKind, ProvenanceMissError, StageGraphError};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Label of the first group.
pub const BASE_GROUP: &str = "base";

static GROUP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("group name pattern is valid"));

/// File names for one `mincblur` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlurOutputs {
    /// Output base handed to `mincblur`, which appends its own suffixes.
    pub base: PathBuf,
    /// The blurred volume.
    pub file: FileRef,
    /// The gradient volume, if requested.
    pub gradient: Option<FileRef>,
    /// Log file for the call.
    pub log: FileRef,
}

/// Grouped derived files of one subject.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStore {
    input_file: FileRef,
    base_name: String,
    base_dir: PathBuf,
    layout: Option<DirectoryLayout>,
    groups: Vec<ArtifactGroup>,
    group_names: Vec<String>,
    current: usize,
}

impl ArtifactStore {
    /// Opens a writable store rooted at `root`; the subject's files go under
    /// `root/<base-name>/`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the input file has no usable base name.
    pub fn new(input_file: impl Into<FileRef>, mask: Option<FileRef>, root: &Path) -> Result<Self, StageGraphError> {
        let input_file = input_file.into();
        let base_name = Self::base_name_of(&input_file)?;
        let layout = DirectoryLayout::new(root, &base_name);
        debug!(subject = %base_name, root = %root.display(), "Opened artifact store");
        Ok(Self::assemble(input_file, mask, base_name, root.to_path_buf(), Some(layout)))
    }

    /// Opens a store that is only ever read, e.g. a registration target.
    ///
    /// It has no directory layout; only `OutputDir::CurrentDir` and literal
    /// directories resolve, relative to the process working directory.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the input file has no usable base name.
    pub fn read_only(input_file: impl Into<FileRef>, mask: Option<FileRef>) -> Result<Self, StageGraphError> {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::read_only_in(input_file, mask, &working_dir)
    }

    /// Like [`ArtifactStore::read_only`] with an explicit working directory.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the input file has no usable base name.
    pub fn read_only_in(
        input_file: impl Into<FileRef>,
        mask: Option<FileRef>,
        working_dir: &Path,
    ) -> Result<Self, StageGraphError> {
        let input_file = input_file.into();
        let base_name = Self::base_name_of(&input_file)?;
        Ok(Self::assemble(input_file, mask, base_name, working_dir.to_path_buf(), None))
    }

    fn base_name_of(input_file: &FileRef) -> Result<String, StageGraphError> {
        let base_name = input_file.stem();
        if base_name.is_empty() {
            return Err(StageGraphError::invalid_input(
                "input_file",
                format!("'{input_file}' has no file name"),
            ));
        }
        Ok(base_name)
    }

    fn assemble(
        input_file: FileRef,
        mask: Option<FileRef>,
        base_name: String,
        base_dir: PathBuf,
        layout: Option<DirectoryLayout>,
    ) -> Self {
        Self {
            groups: vec![ArtifactGroup::new(input_file.clone(), mask)],
            group_names: vec![BASE_GROUP.to_string()],
            current: 0,
            input_file,
            base_name,
            base_dir,
            layout,
        }
    }

    /// Key under which other stores record transforms to this one.
    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::new(self.input_file.clone())
    }

    /// The file the store was opened with.
    #[must_use]
    pub const fn input_file(&self) -> &FileRef {
        &self.input_file
    }

    /// Input file name without directory and extension.
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Directory layout; `None` for read-only stores.
    #[must_use]
    pub const fn layout(&self) -> Option<&DirectoryLayout> {
        self.layout.as_ref()
    }

    /// True if the store was opened without a root directory.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.layout.is_none()
    }

    /// Index of the current group. Only ever increases.
    #[must_use]
    pub const fn current_group_index(&self) -> usize {
        self.current
    }

    /// The current group.
    #[must_use]
    pub fn current_group(&self) -> &ArtifactGroup {
        &self.groups[self.current]
    }

    fn current_group_mut(&mut self) -> &mut ArtifactGroup {
        &mut self.groups[self.current]
    }

    /// Label of the current group.
    #[must_use]
    pub fn current_group_name(&self) -> &str {
        &self.group_names[self.current]
    }

    /// All groups, oldest first.
    #[must_use]
    pub fn groups(&self) -> &[ArtifactGroup] {
        &self.groups
    }

    /// Group at `index`.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` for an index that was never created.
    pub fn group(&self, index: usize) -> Result<&ArtifactGroup, StageGraphError> {
        self.groups.get(index).ok_or_else(|| self.group_miss(index.to_string()))
    }

    /// Label of the group at `index`.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` for an index that was never created.
    pub fn group_name(&self, index: usize) -> Result<&str, StageGraphError> {
        self.group_names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.group_miss(index.to_string()))
    }

    /// Index of the group labelled `name`.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` if no group carries that label.
    pub fn group_by_name(&self, name: &str) -> Result<usize, StageGraphError> {
        self.group_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| self.group_miss(name.to_string()))
    }

    fn group_miss(&self, key: String) -> StageGraphError {
        ProvenanceMissError::new(ProvenanceKind::Group, key)
            .for_subject(self.base_name.clone())
            .into()
    }

    /// Starts a new group and makes it current.
    ///
    /// An unset base volume or mask is inherited from the current group; an
    /// unset name defaults to the new group's index.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `name` is not a usable file-name component or is
    /// already taken; transform names embed the label, so duplicates would
    /// collide.
    pub fn new_group(
        &mut self,
        base_volume: Option<FileRef>,
        mask: Option<FileRef>,
        name: Option<&str>,
    ) -> Result<usize, StageGraphError> {
        let index = self.groups.len();
        let name = name.map_or_else(|| index.to_string(), str::to_string);
        if !GROUP_NAME.is_match(&name) {
            return Err(StageGraphError::invalid_input(
                "name",
                format!("group name '{name}' must be alphanumeric, '.', '_' or '-'"),
            ));
        }
        if self.group_names.contains(&name) {
            return Err(StageGraphError::invalid_input(
                "name",
                format!("subject '{}' already has a group '{name}'", self.base_name),
            ));
        }

        let base_volume = base_volume.unwrap_or_else(|| self.base_volume().clone());
        let mask = mask.or_else(|| self.mask().cloned());
        self.groups.push(ArtifactGroup::new(base_volume, mask));
        self.group_names.push(name);
        self.current = index;
        info!(
            subject = %self.base_name,
            group = %self.group_names[index],
            index,
            base_volume = %self.base_volume(),
            "New artifact group"
        );
        Ok(index)
    }

    /// Mask of the current group.
    #[must_use]
    pub fn mask(&self) -> Option<&FileRef> {
        self.current_group().mask()
    }

    /// Replaces the current group's mask.
    pub fn set_mask(&mut self, mask: Option<FileRef>) {
        self.current_group_mut().set_mask(mask);
    }

    /// Current group's working volume.
    #[must_use]
    pub fn base_volume(&self) -> &FileRef {
        self.current_group().base_volume()
    }

    /// Replaces the current group's working volume; `None` restores the
    /// volume the group was created with.
    pub fn set_base_volume(&mut self, volume: Option<FileRef>) {
        self.current_group_mut().set_base_volume(volume);
    }

    /// Looks up a blur or gradient in the current group.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` naming this subject if the kernel is unknown.
    pub fn get_blur(&self, query: BlurQuery, kind: BlurKind) -> Result<&FileRef, StageGraphError> {
        self.current_group()
            .get_blur(query, kind)
            .map_err(|err| err.for_subject(self.base_name.clone()).into())
    }

    /// Records a blur in the current group and makes it the latest.
    pub fn add_blur(&mut self, file: FileRef, fwhm: Fwhm, gradient: Option<FileRef>) {
        self.current_group_mut().add_blur(file, fwhm, gradient);
    }

    /// Makes an already computed kernel the latest.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` if that kernel was never computed in this group.
    pub fn set_blur_to_use(&mut self, fwhm: Fwhm) -> Result<(), StageGraphError> {
        let subject = self.base_name.clone();
        self.current_group_mut()
            .set_blur_to_use(fwhm)
            .map_err(|err| err.for_subject(subject).into())
    }

    /// Names the outputs of blurring the current volume with `fwhm` and
    /// records them in the current group.
    ///
    /// Files are `<dir>/<stem>_fwhm<k>_blur.mnc` and, with `gradient`,
    /// `<dir>/<stem>_fwhm<k>_dxyz.mnc`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `dir` does not resolve for this store.
    pub fn blur_file(&mut self, fwhm: Fwhm, gradient: bool, dir: &OutputDir) -> Result<BlurOutputs, StageGraphError> {
        let output_dir = self.output_dir(dir)?;
        let base = output_dir.join(format!("{}_fwhm{fwhm}", self.base_volume().stem()));
        let base_str = base.to_string_lossy();
        let file = FileRef::new(format!("{base_str}_blur.mnc"));
        let gradient = gradient.then(|| FileRef::new(format!("{base_str}_dxyz.mnc")));
        let log = self.log_file_for(&file);

        self.add_blur(file.clone(), fwhm, gradient.clone());
        debug!(subject = %self.base_name, %fwhm, file = %file, "Named blur");
        Ok(BlurOutputs {
            base,
            file,
            gradient,
            log,
        })
    }

    /// Records `xfm` as a transform to `target` in the current group and
    /// makes it the latest. Returns `false` if it was already recorded.
    pub fn register_transform(&mut self, target: &ArtifactKey, xfm: FileRef) -> bool {
        let appended = self.current_group_mut().register_transform(target, xfm.clone());
        if !appended {
            warn!(subject = %self.base_name, target = %target, xfm = %xfm, "Transform already registered");
        }
        appended
    }

    /// Latest transform to `target` in `group` (the current group if `None`).
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` if the group or the transform does not exist.
    pub fn last_transform(&self, target: &ArtifactKey, group: Option<usize>) -> Result<&FileRef, StageGraphError> {
        let group = self.group(group.unwrap_or(self.current))?;
        group
            .last_transform(target)
            .map_err(|err| err.for_subject(self.base_name.clone()).into())
    }

    /// All transforms to `target` in the current group, oldest first.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` if none were registered.
    pub fn transforms(&self, target: &ArtifactKey) -> Result<&[FileRef], StageGraphError> {
        self.current_group()
            .transforms(target)
            .map_err(|err| err.for_subject(self.base_name.clone()).into())
    }

    /// Name for the next transform from this store's volume to `target`'s:
    /// `<source>_to_<target>_<group>_<n>.xfm`, where `n` counts the
    /// transforms already recorded to `target` in the current group.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `dir` does not resolve for this store.
    pub fn next_transform_name(&self, target: &Self, dir: &OutputDir) -> Result<FileRef, StageGraphError> {
        let count = self.current_group().transform_count(&target.key());
        let file_name = format!(
            "{}_to_{}_{}_{count}.xfm",
            self.base_volume().stem(),
            target.base_volume().stem(),
            self.current_group_name(),
        );
        Ok(FileRef::in_dir(&self.output_dir(dir)?, &file_name))
    }

    /// Names a transform to `target` and records it as the latest.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `dir` does not resolve for this store.
    pub fn register_volume(&mut self, target: &Self, dir: &OutputDir) -> Result<FileRef, StageGraphError> {
        let xfm = self.next_transform_name(target, dir)?;
        self.register_transform(&target.key(), xfm.clone());
        debug!(subject = %self.base_name, target = %target.base_name, xfm = %xfm, "Named transform");
        Ok(xfm)
    }

    /// Adds a label file to the current group unless present.
    pub fn add_label(&mut self, label: FileRef, set: LabelSet) -> bool {
        self.current_group_mut().add_label(label, set)
    }

    /// Label files of the current group.
    #[must_use]
    pub fn labels(&self, set: LabelSet) -> &[FileRef] {
        self.current_group().labels(set)
    }

    /// Removes all label files of one set from the current group.
    pub fn clear_labels(&mut self, set: LabelSet) {
        self.current_group_mut().clear_labels(set);
    }

    /// Resolves an output-directory policy for this store.
    ///
    /// Literal relative paths are taken relative to the root (or the working
    /// directory of a read-only store).
    ///
    /// # Errors
    ///
    /// `InvalidInput` for `CurrentDir` on a writable store, or for a named
    /// subject directory on a read-only store.
    pub fn output_dir(&self, dir: &OutputDir) -> Result<PathBuf, StageGraphError> {
        match (dir, &self.layout) {
            (OutputDir::Literal(path), _) => Ok(self.base_dir.join(path)),
            (OutputDir::CurrentDir, None) => Ok(self.base_dir.clone()),
            (OutputDir::CurrentDir, Some(_)) => Err(StageGraphError::invalid_input(
                "output_dir",
                format!(
                    "subject '{}' has a root directory; name an output directory instead of the working directory",
                    self.base_name
                ),
            )),
            (named, Some(layout)) => layout.named(named).map(Path::to_path_buf).ok_or_else(|| {
                StageGraphError::invalid_input("output_dir", format!("unresolvable directory {named:?}"))
            }),
            (named, None) => Err(StageGraphError::invalid_input(
                "output_dir",
                format!("subject '{}' is read-only and has no {named:?} directory", self.base_name),
            )),
        }
    }

    /// `preferred` for a writable store, the working directory for a
    /// read-only one.
    #[must_use]
    pub fn dir_or_current(&self, preferred: OutputDir) -> OutputDir {
        if self.is_read_only() {
            OutputDir::CurrentDir
        } else {
            preferred
        }
    }

    /// Directory for log files.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        self.layout.as_ref().map_or(&self.base_dir, |layout| &layout.log_dir)
    }

    /// Log file for a stage producing `output`: `<log-dir>/<output-stem>.log`.
    #[must_use]
    pub fn log_file_for(&self, output: &FileRef) -> FileRef {
        FileRef::in_dir(self.log_dir(), &format!("{}.log", output.stem()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fwhm(v: f64) -> Fwhm {
        Fwhm::new(v).unwrap()
    }

    fn store(name: &str) -> ArtifactStore {
        ArtifactStore::new(format!("/data/{name}.mnc"), None, Path::new("/proj")).unwrap()
    }

    #[test]
    fn test_new_store_has_base_group() {
        let s = store("img_1");
        assert_eq!(s.base_name(), "img_1");
        assert_eq!(s.current_group_index(), 0);
        assert_eq!(s.current_group_name(), BASE_GROUP);
        assert_eq!(s.base_volume(), &FileRef::new("/data/img_1.mnc"));
        assert!(!s.is_read_only());
    }

    #[test]
    fn test_empty_file_name_rejected() {
        let err = ArtifactStore::new("/", None, Path::new("/proj")).unwrap_err();
        assert!(matches!(err, StageGraphError::InvalidInput { ref argument, .. } if argument == "input_file"));
    }

    #[test]
    fn test_new_group_inherits_base_and_mask() {
        let mut s = ArtifactStore::new("/data/a.mnc", Some(FileRef::new("/data/a_mask.mnc")), Path::new("/proj"))
            .unwrap();
        s.set_base_volume(Some(FileRef::new("/proj/a/tmp/a_nuc.mnc")));
        let index = s.new_group(None, None, Some("lsq6")).unwrap();
        assert_eq!(index, 1);
        assert_eq!(s.base_volume(), &FileRef::new("/proj/a/tmp/a_nuc.mnc"));
        assert_eq!(s.mask(), Some(&FileRef::new("/data/a_mask.mnc")));
        assert_eq!(s.group_by_name("lsq6").unwrap(), 1);
    }

    #[test]
    fn test_new_group_keeps_old_group_untouched() {
        let mut s = store("a");
        s.new_group(Some(FileRef::new("/proj/a/resampled/a_lsq6.mnc")), None, None).unwrap();
        s.set_mask(Some(FileRef::new("/proj/a/resampled/a_mask.mnc")));
        assert_eq!(s.current_group_name(), "1");
        assert_eq!(s.group(0).unwrap().mask(), None);
        assert_eq!(s.group(0).unwrap().base_volume(), &FileRef::new("/data/a.mnc"));
    }

    #[test]
    fn test_group_names_must_be_unique_and_valid() {
        let mut s = store("a");
        s.new_group(None, None, Some("lsq12")).unwrap();
        assert!(s.new_group(None, None, Some("lsq12")).is_err());
        assert!(s.new_group(None, None, Some("base")).is_err());
        assert!(s.new_group(None, None, Some("has space")).is_err());
        assert!(s.new_group(None, None, Some("a/b")).is_err());
        assert_eq!(s.current_group_index(), 1);
    }

    #[test]
    fn test_unknown_group_is_provenance_miss() {
        let s = store("a");
        assert!(s.group(3).unwrap_err().is_provenance_miss());
        assert!(s.group_by_name("nlin").unwrap_err().is_provenance_miss());
    }

    #[test]
    fn test_transform_naming_is_stable() {
        let mut a = store("A");
        let b = store("B");
        let first = a.register_volume(&b, &OutputDir::Transforms).unwrap();
        let second = a.register_volume(&b, &OutputDir::Transforms).unwrap();
        assert_eq!(first, FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm"));
        assert_eq!(second, FileRef::new("/proj/A/transforms/A_to_B_base_1.xfm"));
        assert_eq!(a.last_transform(&b.key(), None).unwrap(), &second);
        assert_eq!(a.transforms(&b.key()).unwrap(), &[first, second]);
    }

    #[test]
    fn test_transform_counter_is_per_group() {
        let mut a = store("A");
        let b = store("B");
        a.register_volume(&b, &OutputDir::Tmp).unwrap();
        a.new_group(None, None, Some("lsq12")).unwrap();
        let xfm = a.register_volume(&b, &OutputDir::Tmp).unwrap();
        assert_eq!(xfm, FileRef::new("/proj/A/tmp/A_to_B_lsq12_0.xfm"));
        assert_eq!(
            a.last_transform(&b.key(), Some(0)).unwrap(),
            &FileRef::new("/proj/A/tmp/A_to_B_base_0.xfm")
        );
    }

    #[test]
    fn test_last_transform_without_registration_is_miss() {
        let a = store("A");
        let b = store("B");
        let err = a.last_transform(&b.key(), None).unwrap_err();
        assert!(err.is_provenance_miss());
        assert!(err.to_string().contains("subject 'A'"));
    }

    #[test]
    fn test_blur_file_names_and_registers() {
        let mut s = store("img");
        let out = s.blur_file(fwhm(0.5), true, &OutputDir::Tmp).unwrap();
        assert_eq!(out.base, PathBuf::from("/proj/img/tmp/img_fwhm0.5"));
        assert_eq!(out.file, FileRef::new("/proj/img/tmp/img_fwhm0.5_blur.mnc"));
        assert_eq!(out.gradient, Some(FileRef::new("/proj/img/tmp/img_fwhm0.5_dxyz.mnc")));
        assert_eq!(out.log, FileRef::new("/proj/img/log/img_fwhm0.5_blur.log"));
        assert_eq!(s.get_blur(BlurQuery::Latest, BlurKind::Blur).unwrap(), &out.file);
    }

    #[test]
    fn test_blur_kernel_formatting() {
        let mut s = store("img");
        let out = s.blur_file(fwhm(1.0), false, &OutputDir::Tmp).unwrap();
        assert_eq!(out.file, FileRef::new("/proj/img/tmp/img_fwhm1_blur.mnc"));
        assert_eq!(out.gradient, None);
    }

    #[test]
    fn test_output_dir_policy() {
        let s = store("img");
        assert_eq!(s.output_dir(&OutputDir::Stats).unwrap(), PathBuf::from("/proj/img/stats-volumes"));
        assert_eq!(
            s.output_dir(&OutputDir::Literal(PathBuf::from("pipe_nlin"))).unwrap(),
            PathBuf::from("/proj/pipe_nlin")
        );
        assert!(s.output_dir(&OutputDir::CurrentDir).is_err());
    }

    #[test]
    fn test_read_only_store_resolves_working_dir_only() {
        let s = ArtifactStore::read_only_in("/atlas/avg.mnc", None, Path::new("/work")).unwrap();
        assert!(s.is_read_only());
        assert_eq!(s.output_dir(&OutputDir::CurrentDir).unwrap(), PathBuf::from("/work"));
        assert!(s.output_dir(&OutputDir::Tmp).is_err());
        assert_eq!(s.log_dir(), Path::new("/work"));
    }

    #[test]
    fn test_log_file_for_output() {
        let s = store("img");
        assert_eq!(
            s.log_file_for(&FileRef::new("/proj/img/transforms/img_to_avg_base_0.xfm")),
            FileRef::new("/proj/img/log/img_to_avg_base_0.log")
        );
    }

    #[test]
    fn test_labels_per_current_group() {
        let mut s = store("img");
        assert!(s.add_label(FileRef::new("/data/img_labels.mnc"), LabelSet::Input));
        s.new_group(None, None, None).unwrap();
        assert!(s.labels(LabelSet::Input).is_empty());
        s.add_label(FileRef::new("/proj/img/labels/l.mnc"), LabelSet::Derived);
        s.clear_labels(LabelSet::Derived);
        assert!(s.labels(LabelSet::Derived).is_empty());
    }

    #[test]
    fn test_set_blur_to_use_unknown_kernel() {
        let mut s = store("img");
        let err = s.set_blur_to_use(fwhm(0.2)).unwrap_err();
        assert!(err.is_provenance_miss());
    }
}
