//! One phase of a subject's derived-file bookkeeping.

use crate::core::{FileRef, Fwhm};
use crate::errors::{ProvenanceKind, ProvenanceMissError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies the target a transform was computed against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(FileRef);

impl ArtifactKey {
    /// Creates a key from the target's identifying file.
    #[must_use]
    pub fn new(file: impl Into<FileRef>) -> Self {
        Self(file.into())
    }

    /// Returns the identifying file.
    #[must_use]
    pub const fn file(&self) -> &FileRef {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which kernel a blur lookup wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurQuery {
    /// The unblurred base volume.
    Raw,
    /// Whatever kernel was used last.
    Latest,
    /// Exactly this kernel.
    Specific(Fwhm),
}

/// Blurred intensities or their gradient magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurKind {
    /// Blurred volume.
    #[default]
    Blur,
    /// Gradient of the blurred volume.
    Gradient,
}

/// Regular labels or labels supplied as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSet {
    /// Labels derived by the pipeline.
    Derived,
    /// Labels handed in with the input.
    Input,
}

/// A subject's derived files at one pipeline phase.
///
/// Only the store's current group is ever mutated; superseded groups stay
/// as they were so earlier provenance remains queryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactGroup {
    base_volume: FileRef,
    original_volume: FileRef,
    mask: Option<FileRef>,
    labels: Vec<FileRef>,
    input_labels: Vec<FileRef>,
    blurs: BTreeMap<Fwhm, FileRef>,
    gradients: BTreeMap<Fwhm, FileRef>,
    last_blur: Option<Fwhm>,
    last_gradient: Option<Fwhm>,
    transforms: BTreeMap<ArtifactKey, Vec<FileRef>>,
    last_transform: BTreeMap<ArtifactKey, FileRef>,
}

impl ArtifactGroup {
    /// Creates a group around `base_volume`.
    #[must_use]
    pub fn new(base_volume: FileRef, mask: Option<FileRef>) -> Self {
        Self {
            original_volume: base_volume.clone(),
            base_volume,
            mask,
            labels: Vec::new(),
            input_labels: Vec::new(),
            blurs: BTreeMap::new(),
            gradients: BTreeMap::new(),
            last_blur: None,
            last_gradient: None,
            transforms: BTreeMap::new(),
            last_transform: BTreeMap::new(),
        }
    }

    /// Current working volume.
    #[must_use]
    pub const fn base_volume(&self) -> &FileRef {
        &self.base_volume
    }

    /// Volume the group was created with.
    #[must_use]
    pub const fn original_volume(&self) -> &FileRef {
        &self.original_volume
    }

    /// Mask, if the group has one.
    #[must_use]
    pub const fn mask(&self) -> Option<&FileRef> {
        self.mask.as_ref()
    }

    /// Labels of the requested set.
    #[must_use]
    pub fn labels(&self, set: LabelSet) -> &[FileRef] {
        match set {
            LabelSet::Derived => &self.labels,
            LabelSet::Input => &self.input_labels,
        }
    }

    /// Kernel of the most recent blur or gradient.
    #[must_use]
    pub const fn last_kernel(&self, kind: BlurKind) -> Option<Fwhm> {
        match kind {
            BlurKind::Blur => self.last_blur,
            BlurKind::Gradient => self.last_gradient,
        }
    }

    /// All kernels computed for `kind`, ascending.
    pub fn kernels(&self, kind: BlurKind) -> impl Iterator<Item = Fwhm> + '_ {
        self.blur_map(kind).keys().copied()
    }

    /// Looks up a blurred (or gradient) file.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` if the kernel was never computed, or if `Latest` is
    /// asked before any blur exists.
    pub fn get_blur(&self, query: BlurQuery, kind: BlurKind) -> Result<&FileRef, ProvenanceMissError> {
        let provenance = match kind {
            BlurKind::Blur => ProvenanceKind::Blur,
            BlurKind::Gradient => ProvenanceKind::Gradient,
        };
        let fwhm = match query {
            BlurQuery::Raw => return Ok(&self.base_volume),
            BlurQuery::Latest => self
                .last_kernel(kind)
                .ok_or_else(|| ProvenanceMissError::new(provenance, "latest"))?,
            BlurQuery::Specific(fwhm) => fwhm,
        };
        self.blur_map(kind)
            .get(&fwhm)
            .ok_or_else(|| ProvenanceMissError::new(provenance, fwhm.to_string()))
    }

    /// Records a blur (and optionally its gradient) and makes it the latest.
    pub(crate) fn add_blur(&mut self, file: FileRef, fwhm: Fwhm, gradient: Option<FileRef>) {
        self.blurs.insert(fwhm, file);
        self.last_blur = Some(fwhm);
        if let Some(gradient) = gradient {
            self.gradients.insert(fwhm, gradient);
            self.last_gradient = Some(fwhm);
        }
    }

    /// Points the latest-blur pointer at an existing kernel.
    pub(crate) fn set_blur_to_use(&mut self, fwhm: Fwhm) -> Result<(), ProvenanceMissError> {
        if !self.blurs.contains_key(&fwhm) {
            return Err(ProvenanceMissError::new(ProvenanceKind::Blur, fwhm.to_string()));
        }
        self.last_blur = Some(fwhm);
        Ok(())
    }

    /// Appends `xfm` to the target's list unless already there, then makes
    /// it the latest. Returns `true` if it was appended.
    pub(crate) fn register_transform(&mut self, target: &ArtifactKey, xfm: FileRef) -> bool {
        let list = self.transforms.entry(target.clone()).or_default();
        let appended = !list.contains(&xfm);
        if appended {
            list.push(xfm.clone());
        }
        self.last_transform.insert(target.clone(), xfm);
        appended
    }

    /// Number of transforms already recorded against `target`.
    #[must_use]
    pub fn transform_count(&self, target: &ArtifactKey) -> usize {
        self.transforms.get(target).map_or(0, Vec::len)
    }

    /// All transforms against `target`, oldest first.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` if none were ever registered.
    pub fn transforms(&self, target: &ArtifactKey) -> Result<&[FileRef], ProvenanceMissError> {
        self.transforms
            .get(target)
            .map(Vec::as_slice)
            .ok_or_else(|| ProvenanceMissError::new(ProvenanceKind::Transform, target.to_string()))
    }

    /// Most recent transform against `target`.
    ///
    /// # Errors
    ///
    /// `ProvenanceMiss` if none was ever registered.
    pub fn last_transform(&self, target: &ArtifactKey) -> Result<&FileRef, ProvenanceMissError> {
        self.last_transform
            .get(target)
            .ok_or_else(|| ProvenanceMissError::new(ProvenanceKind::Transform, target.to_string()))
    }

    pub(crate) fn set_mask(&mut self, mask: Option<FileRef>) {
        self.mask = mask;
    }

    /// `None` resets to the volume the group was created with.
    pub(crate) fn set_base_volume(&mut self, volume: Option<FileRef>) {
        self.base_volume = volume.unwrap_or_else(|| self.original_volume.clone());
    }

    /// Adds a label file unless present. Returns `true` if it was added.
    pub(crate) fn add_label(&mut self, label: FileRef, set: LabelSet) -> bool {
        let list = self.label_list_mut(set);
        if list.contains(&label) {
            return false;
        }
        list.push(label);
        true
    }

    pub(crate) fn clear_labels(&mut self, set: LabelSet) {
        self.label_list_mut(set).clear();
    }

    fn label_list_mut(&mut self, set: LabelSet) -> &mut Vec<FileRef> {
        match set {
            LabelSet::Derived => &mut self.labels,
            LabelSet::Input => &mut self.input_labels,
        }
    }

    const fn blur_map(&self, kind: BlurKind) -> &BTreeMap<Fwhm, FileRef> {
        match kind {
            BlurKind::Blur => &self.blurs,
            BlurKind::Gradient => &self.gradients,
        }
    }
}
