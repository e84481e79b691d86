//! Registration, transform algebra and resampling.

use crate::artifacts::{ArtifactStore, BlurKind, BlurQuery, LabelSet, OutputDir};
use super::blur::mincblur;
use crate::core::{FileRef, Fwhm, Image, XfmHandle};
use crate::errors::StageGraphError;
use crate::stages::{BuildResult, CmdStage, Stages};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Degrees of freedom of a `minctracc` fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformType {
    /// Rigid body.
    Lsq6,
    /// Rigid plus scales.
    Lsq9,
    /// Full affine.
    #[default]
    Lsq12,
    /// Nonlinear deformation grid.
    Nonlinear,
}

impl TransformType {
    fn args(self) -> &'static [&'static str] {
        match self {
            Self::Lsq6 => &["-lsq6"],
            Self::Lsq9 => &["-lsq9"],
            Self::Lsq12 => &["-lsq12"],
            Self::Nonlinear => &["-nonlinear", "corrcoeff"],
        }
    }
}

fn default_step() -> f64 {
    4.0
}

fn default_simplex() -> f64 {
    20.0
}

/// Parameters of one `minctracc` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinctraccConf {
    /// Which blur of source and target to register.
    #[serde(default = "default_blur")]
    pub blur: BlurQuery,
    /// Register gradient magnitudes instead of blurred intensities.
    #[serde(default)]
    pub use_gradient: bool,
    /// Degrees of freedom.
    #[serde(default)]
    pub transform_type: TransformType,
    /// Sampling step in mm, used for all three axes.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Simplex radius in mm.
    #[serde(default = "default_simplex")]
    pub simplex: f64,
    /// Where the transform goes.
    #[serde(default = "default_transform_dir")]
    pub output_dir: OutputDir,
}

const fn default_blur() -> BlurQuery {
    BlurQuery::Latest
}

const fn default_transform_dir() -> OutputDir {
    OutputDir::Transforms
}

impl Default for MinctraccConf {
    fn default() -> Self {
        Self {
            blur: default_blur(),
            use_gradient: false,
            transform_type: TransformType::default(),
            step: default_step(),
            simplex: default_simplex(),
            output_dir: default_transform_dir(),
        }
    }
}

impl MinctraccConf {
    /// Sets the blur query.
    #[must_use]
    pub const fn with_blur(mut self, blur: BlurQuery) -> Self {
        self.blur = blur;
        self
    }

    /// Sets the transform type.
    #[must_use]
    pub const fn with_transform_type(mut self, transform_type: TransformType) -> Self {
        self.transform_type = transform_type;
        self
    }

    /// Registers gradients instead of blurs.
    #[must_use]
    pub const fn with_gradient(mut self, use_gradient: bool) -> Self {
        self.use_gradient = use_gradient;
        self
    }
}

/// Registers `source` to `target` with `minctracc`.
///
/// Both blurs are looked up before anything is named, so a provenance miss
/// leaves the source store untouched. The new transform is recorded in the
/// source's current group as the latest transform to `target` as soon as the
/// stage is built, before the caller merges it. A `NamingCollision` from that
/// merge therefore leaves the store ahead of the graph; treat it as fatal for
/// the whole build.
///
/// # Errors
///
/// `ProvenanceMiss` if either side lacks the requested blur, `InvalidInput`
/// if the output directory does not resolve.
pub fn minctracc(
    source: &mut ArtifactStore,
    target: &ArtifactStore,
    conf: &MinctraccConf,
    initial: Option<&FileRef>,
) -> Result<BuildResult<XfmHandle>, StageGraphError> {
    let kind = if conf.use_gradient {
        BlurKind::Gradient
    } else {
        BlurKind::Blur
    };
    let source_blur = source.get_blur(conf.blur, kind)?.clone();
    let target_blur = target.get_blur(conf.blur, kind)?.clone();
    let source_volume = source.base_volume().clone();
    let source_mask = source.mask().cloned();
    let target_mask = target.mask().cloned();
    let xfm = source.next_transform_name(target, &conf.output_dir)?;

    let mut builder = CmdStage::builder().args(["minctracc", "-clobber", "-debug", "-xcorr"]);
    builder = match initial {
        Some(initial) => builder.arg("-transformation").input(initial),
        None => builder.arg("-identity"),
    };
    builder = builder
        .args(conf.transform_type.args().iter().copied())
        .arg("-step")
        .args([conf.step.to_string(), conf.step.to_string(), conf.step.to_string()])
        .arg("-simplex")
        .arg(conf.simplex.to_string());
    if let Some(mask) = &source_mask {
        builder = builder.arg("-source_mask").input(mask);
    }
    if let Some(mask) = &target_mask {
        builder = builder.arg("-model_mask").input(mask);
    }
    let stage = builder
        .input(&source_blur)
        .input(&target_blur)
        .output(&xfm)
        .log_file(source.log_file_for(&xfm))
        .build()?;

    source.register_transform(&target.key(), xfm.clone());
    debug!(
        source = source.base_name(),
        target = target.base_name(),
        xfm = %xfm,
        "Built minctracc stage"
    );
    Ok(BuildResult::single(
        stage,
        XfmHandle {
            source: source_volume,
            target: target.base_volume().clone(),
            xfm,
            resampled: None,
        },
    ))
}

/// Registers `source` to `target` once per kernel, coarse to fine.
///
/// Both stores are blurred at every kernel and each level starts from the
/// previous level's transform, so the last handle holds the full fit.
///
/// # Errors
///
/// `InvalidInput` for an empty kernel list, otherwise as [`mincblur`] and
/// [`minctracc`].
pub fn multilevel_minctracc(
    source: &mut ArtifactStore,
    target: &mut ArtifactStore,
    kernels: &[Fwhm],
    conf: &MinctraccConf,
) -> Result<BuildResult<XfmHandle>, StageGraphError> {
    let mut stages = Stages::new();
    let mut handle: Option<XfmHandle> = None;
    for &fwhm in kernels {
        stages.defer(mincblur(source, fwhm, conf.use_gradient))?;
        stages.defer(mincblur(target, fwhm, conf.use_gradient))?;
        let level = conf.clone().with_blur(BlurQuery::Specific(fwhm));
        let initial = handle.as_ref().map(|h| h.xfm.clone());
        handle = Some(stages.defer(minctracc(source, target, &level, initial.as_ref()))?);
    }
    debug!(
        source = source.base_name(),
        target = target.base_name(),
        levels = kernels.len(),
        "Built multilevel registration"
    );
    handle
        .map(|h| stages.into_result(h))
        .ok_or_else(|| StageGraphError::invalid_input("kernels", "at least one blur kernel is required"))
}

/// Inverts a transform into `<transforms>/<stem>_inverse.xfm`.
///
/// # Errors
///
/// `InvalidInput` if the output directory does not resolve.
pub fn xfm_invert(store: &ArtifactStore, xfm: &FileRef) -> Result<BuildResult<FileRef>, StageGraphError> {
    let dir = store.output_dir(&store.dir_or_current(OutputDir::Transforms))?;
    let inverse = FileRef::in_dir(&dir, &format!("{}_inverse.xfm", xfm.stem()));
    let stage = CmdStage::builder()
        .args(["xfminvert", "-clobber"])
        .input(xfm)
        .output(&inverse)
        .log_file(store.log_file_for(&inverse))
        .build()?;
    Ok(BuildResult::single(stage, inverse))
}

/// Inverts a handle: the result maps `target` back to `source`.
///
/// # Errors
///
/// As [`xfm_invert`].
pub fn invert_handle(store: &ArtifactStore, handle: &XfmHandle) -> Result<BuildResult<XfmHandle>, StageGraphError> {
    Ok(xfm_invert(store, &handle.xfm)?.map(|xfm| XfmHandle {
        source: handle.target.clone(),
        target: handle.source.clone(),
        xfm,
        resampled: None,
    }))
}

/// Concatenates transforms, applied in order, into `<transforms>/<name>`.
///
/// A single transform is returned as is without a stage. `name` gets an
/// `.xfm` extension if it has none.
///
/// # Errors
///
/// `InvalidInput` for an empty list or an unresolvable output directory.
pub fn xfm_concat(store: &ArtifactStore, xfms: &[FileRef], name: &str) -> Result<BuildResult<FileRef>, StageGraphError> {
    match xfms {
        [] => Err(StageGraphError::invalid_input("xfms", "nothing to concatenate")),
        [single] => Ok(BuildResult::pure(single.clone())),
        _ => {
            let dir = store.output_dir(&store.dir_or_current(OutputDir::Transforms))?;
            let file_name = if name.ends_with(".xfm") {
                name.to_string()
            } else {
                format!("{name}.xfm")
            };
            let output = FileRef::in_dir(&dir, &file_name);
            let mut builder = CmdStage::builder().args(["xfmconcat", "-clobber"]);
            for xfm in xfms {
                builder = builder.input(xfm);
            }
            let stage = builder
                .output(&output)
                .log_file(store.log_file_for(&output))
                .build()?;
            Ok(BuildResult::single(stage, output))
        }
    }
}

/// Interpolation used by `mincresample`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Trilinear.
    Trilinear,
    /// Windowed sinc.
    #[default]
    Sinc,
    /// Nearest neighbour; required for masks and labels.
    NearestNeighbour,
}

impl Interpolation {
    const fn arg(self) -> &'static str {
        match self {
            Self::Trilinear => "-trilinear",
            Self::Sinc => "-sinc",
            Self::NearestNeighbour => "-nearest_neighbour",
        }
    }
}

/// Options for [`resample`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleOptions {
    /// Apply the inverse of the transform.
    pub invert: bool,
    /// Interpolation of the volume itself.
    pub interpolation: Interpolation,
    /// Where the resampled files go.
    pub output_dir: OutputDir,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self {
            invert: false,
            interpolation: Interpolation::default(),
            output_dir: OutputDir::Resampled,
        }
    }
}

/// Resamples an image through `xfm` into the space of `like`.
///
/// The output is `<dir>/<stem>-resampled-<xfm-stem>.mnc`. A mask or labels
/// on the image are resampled alongside with nearest-neighbour
/// interpolation into `<output-stem>_mask.mnc` and `<output-stem>_labels.mnc`.
///
/// # Errors
///
/// `InvalidInput` if the output directory does not resolve.
pub fn resample(
    store: &ArtifactStore,
    img: &Image,
    xfm: &FileRef,
    like: &FileRef,
    opts: &ResampleOptions,
) -> Result<BuildResult<Image>, StageGraphError> {
    let dir = store.output_dir(&store.dir_or_current(opts.output_dir.clone()))?;
    let output = FileRef::in_dir(&dir, &format!("{}-resampled-{}.mnc", img.file.stem(), xfm.stem()));

    let mut stages = Stages::new();
    stages.add(resample_stage(store, &img.file, &output, xfm, like, opts.invert, opts.interpolation)?)?;

    let mut resampled = Image::new(output.clone());
    if let Some(mask) = &img.mask {
        let out = output.with_suffix("_mask");
        resampled.mask = Some(stages.defer(
            resample_stage(store, mask, &out, xfm, like, opts.invert, Interpolation::NearestNeighbour)
                .map(|stage| BuildResult::single(stage, out)),
        )?);
    }
    if let Some(labels) = &img.labels {
        let out = output.with_suffix("_labels");
        resampled.labels = Some(stages.defer(
            resample_stage(store, labels, &out, xfm, like, opts.invert, Interpolation::NearestNeighbour)
                .map(|stage| BuildResult::single(stage, out)),
        )?);
    }
    Ok(stages.into_result(resampled))
}

fn resample_stage(
    store: &ArtifactStore,
    input: &FileRef,
    output: &FileRef,
    xfm: &FileRef,
    like: &FileRef,
    invert: bool,
    interpolation: Interpolation,
) -> Result<CmdStage, StageGraphError> {
    let mut builder = CmdStage::builder()
        .args(["mincresample", "-clobber", "-2", "-transformation"])
        .input(xfm)
        .arg("-like")
        .input(like)
        .arg(interpolation.arg());
    if interpolation == Interpolation::NearestNeighbour {
        builder = builder.arg("-keep_real_range");
    }
    if invert {
        builder = builder.arg("-invert_transformation");
    }
    builder
        .input(input)
        .output(output)
        .log_file(store.log_file_for(output))
        .build()
}

/// Resamples the store's current volume (and mask) into `target`'s space and
/// opens a new group holding the resampled state.
///
/// Every label file of the current group follows with nearest-neighbour
/// interpolation into the labels directory and is recorded in the new group
/// under the same [`LabelSet`]. Without an explicit `xfm` the source's latest
/// transform to `target` is used.
///
/// # Errors
///
/// `ProvenanceMiss` if no transform to `target` was recorded, `InvalidInput`
/// for an unusable group name or output directory.
pub fn resample_store(
    source: &mut ArtifactStore,
    target: &ArtifactStore,
    xfm: Option<&FileRef>,
    group_name: Option<&str>,
) -> Result<BuildResult<Image>, StageGraphError> {
    let xfm = match xfm {
        Some(xfm) => xfm.clone(),
        None => source.last_transform(&target.key(), None)?.clone(),
    };
    let mut img = Image::new(source.base_volume().clone());
    img.mask = source.mask().cloned();

    let mut stages = Stages::new();
    let resampled = stages.defer(resample(
        source,
        &img,
        &xfm,
        target.base_volume(),
        &ResampleOptions::default(),
    ))?;

    let label_dir = source.output_dir(&source.dir_or_current(OutputDir::Labels))?;
    let mut labels = Vec::new();
    for set in [LabelSet::Derived, LabelSet::Input] {
        for label in source.labels(set) {
            let out = FileRef::in_dir(&label_dir, &format!("{}-resampled-{}.mnc", label.stem(), xfm.stem()));
            stages.add(resample_stage(
                source,
                label,
                &out,
                &xfm,
                target.base_volume(),
                false,
                Interpolation::NearestNeighbour,
            )?)?;
            labels.push((out, set));
        }
    }

    source.new_group(Some(resampled.file.clone()), resampled.mask.clone(), group_name)?;
    for (label, set) in labels {
        source.add_label(label, set);
    }
    Ok(stages.into_result(resampled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn stores() -> (ArtifactStore, ArtifactStore) {
        let root = Path::new("/proj");
        (
            ArtifactStore::new("/data/A.mnc", Some(FileRef::new("/data/A_mask.mnc")), root).unwrap(),
            ArtifactStore::new("/data/B.mnc", None, root).unwrap(),
        )
    }

    #[test]
    fn test_minctracc_requires_blurs() {
        let (mut a, b) = stores();
        let err = minctracc(&mut a, &b, &MinctraccConf::default(), None).unwrap_err();
        assert!(err.is_provenance_miss());
        assert_eq!(a.current_group().transform_count(&b.key()), 0);
    }

    #[test]
    fn test_minctracc_registers_transform() {
        let (mut a, mut b) = stores();
        let fwhm = Fwhm::new(0.5).unwrap();
        mincblur(&mut a, fwhm, false).unwrap();
        mincblur(&mut b, fwhm, false).unwrap();

        let result = minctracc(&mut a, &b, &MinctraccConf::default(), None).unwrap();
        let handle = &result.output;
        assert_eq!(handle.xfm, FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm"));
        assert_eq!(handle.source, FileRef::new("/data/A.mnc"));
        assert_eq!(handle.target, FileRef::new("/data/B.mnc"));
        assert_eq!(a.last_transform(&b.key(), None).unwrap(), &handle.xfm);

        let stage = result.stages.iter().next().unwrap();
        assert_eq!(stage.program(), "minctracc");
        assert!(stage.inputs().contains(&FileRef::new("/data/A_mask.mnc")));
        assert!(stage.inputs().contains(&FileRef::new("/proj/B/tmp/B_fwhm0.5_blur.mnc")));
        assert_eq!(stage.log_file(), &FileRef::new("/proj/A/log/A_to_B_base_0.log"));
    }

    #[test]
    fn test_minctracc_records_transform_before_merge() {
        let (mut a, b) = stores();
        let conf = MinctraccConf::default().with_blur(BlurQuery::Raw);
        let xfm = FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm");
        let squatter = CmdStage::builder()
            .arg("cp")
            .input(&FileRef::new("/elsewhere/other.xfm"))
            .output(&xfm)
            .log_file(FileRef::new("/proj/A/log/cp.log"))
            .build()
            .unwrap();
        let mut stages = Stages::from_stage(squatter);

        let err = stages.defer(minctracc(&mut a, &b, &conf, None)).unwrap_err();
        assert!(matches!(err, StageGraphError::NamingCollision(_)));
        assert_eq!(stages.len(), 1);
        assert_eq!(a.last_transform(&b.key(), None).unwrap(), &xfm);
    }

    #[test]
    fn test_minctracc_with_initial_transform() {
        let (mut a, b) = stores();
        let conf = MinctraccConf::default()
            .with_blur(BlurQuery::Raw)
            .with_transform_type(TransformType::Lsq6);
        let initial = FileRef::new("/proj/A/transforms/init.xfm");
        let result = minctracc(&mut a, &b, &conf, Some(&initial)).unwrap();
        let stage = result.stages.iter().next().unwrap();
        assert!(stage.inputs().contains(&initial));
        assert!(stage.command_line().contains("-transformation /proj/A/transforms/init.xfm -lsq6"));
    }

    #[test]
    fn test_multilevel_chains_levels() {
        let (mut a, mut b) = stores();
        let kernels = [Fwhm::new(0.5).unwrap(), Fwhm::new(0.2).unwrap()];
        let result = multilevel_minctracc(&mut a, &mut b, &kernels, &MinctraccConf::default()).unwrap();

        // two blurs and one registration per level
        assert_eq!(result.stages.len(), 2 * 3);
        assert_eq!(result.output.xfm, FileRef::new("/proj/A/transforms/A_to_B_base_1.xfm"));
        let fine = result.stages.producer_of(&result.output.xfm).unwrap();
        assert!(fine.inputs().contains(&FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm")));
        assert!(fine.inputs().contains(&FileRef::new("/proj/B/tmp/B_fwhm0.2_blur.mnc")));
        assert_eq!(a.last_transform(&b.key(), None).unwrap(), &result.output.xfm);
    }

    #[test]
    fn test_multilevel_requires_kernels() {
        let (mut a, mut b) = stores();
        let err = multilevel_minctracc(&mut a, &mut b, &[], &MinctraccConf::default()).unwrap_err();
        assert!(matches!(err, StageGraphError::InvalidInput { .. }));
        assert_eq!(a.current_group().transform_count(&b.key()), 0);
    }

    #[test]
    fn test_xfm_invert_name() {
        let (a, _) = stores();
        let result = xfm_invert(&a, &FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm")).unwrap();
        assert_eq!(result.output, FileRef::new("/proj/A/transforms/A_to_B_base_0_inverse.xfm"));
        assert_eq!(result.stages.len(), 1);
    }

    #[test]
    fn test_invert_handle_swaps_direction() {
        let (a, _) = stores();
        let handle = XfmHandle {
            source: FileRef::new("/data/A.mnc"),
            target: FileRef::new("/data/B.mnc"),
            xfm: FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm"),
            resampled: None,
        };
        let inverted = invert_handle(&a, &handle).unwrap().output;
        assert_eq!(inverted.source, handle.target);
        assert_eq!(inverted.target, handle.source);
    }

    #[test]
    fn test_xfm_concat_edge_cases() {
        let (a, _) = stores();
        assert!(xfm_concat(&a, &[], "none").is_err());

        let single = xfm_concat(&a, &[FileRef::new("x.xfm")], "one").unwrap();
        assert!(single.stages.is_empty());
        assert_eq!(single.output, FileRef::new("x.xfm"));

        let both = xfm_concat(&a, &[FileRef::new("x.xfm"), FileRef::new("y.xfm")], "A_lsq6_lsq12").unwrap();
        assert_eq!(both.output, FileRef::new("/proj/A/transforms/A_lsq6_lsq12.xfm"));
        assert_eq!(
            both.stages.iter().next().unwrap().command_line(),
            "xfmconcat -clobber x.xfm y.xfm /proj/A/transforms/A_lsq6_lsq12.xfm"
        );
    }

    #[test]
    fn test_resample_shadows_mask_and_labels() {
        let (a, b) = stores();
        let img = Image::new("/data/A.mnc")
            .with_mask("/data/A_mask.mnc")
            .with_labels("/data/A_labels.mnc");
        let xfm = FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm");
        let result = resample(&a, &img, &xfm, b.base_volume(), &ResampleOptions::default()).unwrap();

        assert_eq!(result.stages.len(), 3);
        let out = &result.output;
        assert_eq!(out.file, FileRef::new("/proj/A/resampled/A-resampled-A_to_B_base_0.mnc"));
        assert_eq!(
            out.mask,
            Some(FileRef::new("/proj/A/resampled/A-resampled-A_to_B_base_0_mask.mnc"))
        );
        let nearest = result
            .stages
            .iter()
            .filter(|s| s.command_line().contains("-nearest_neighbour"))
            .count();
        assert_eq!(nearest, 2);
    }

    #[test]
    fn test_resample_store_opens_group() {
        let (mut a, b) = stores();
        a.register_volume(&b, &OutputDir::Transforms).unwrap();
        let result = resample_store(&mut a, &b, None, Some("lsq12")).unwrap();

        assert_eq!(result.stages.len(), 2);
        assert_eq!(a.current_group_name(), "lsq12");
        assert_eq!(a.base_volume(), &result.output.file);
        assert_eq!(a.mask(), result.output.mask.as_ref());
        assert_eq!(a.group(0).unwrap().base_volume(), &FileRef::new("/data/A.mnc"));
    }

    #[test]
    fn test_resample_store_carries_labels_into_new_group() {
        let (mut a, b) = stores();
        a.add_label(FileRef::new("/data/A_labels.mnc"), LabelSet::Input);
        a.add_label(FileRef::new("/proj/A/labels/A_atlas.mnc"), LabelSet::Derived);
        a.register_volume(&b, &OutputDir::Transforms).unwrap();
        let result = resample_store(&mut a, &b, None, Some("lsq6")).unwrap();

        // volume, mask, then one stage per label
        assert_eq!(result.stages.len(), 4);
        assert_eq!(
            a.labels(LabelSet::Input),
            &[FileRef::new("/proj/A/labels/A_labels-resampled-A_to_B_base_0.mnc")]
        );
        assert_eq!(
            a.labels(LabelSet::Derived),
            &[FileRef::new("/proj/A/labels/A_atlas-resampled-A_to_B_base_0.mnc")]
        );
        let label_stage = result
            .stages
            .producer_of(&FileRef::new("/proj/A/labels/A_labels-resampled-A_to_B_base_0.mnc"))
            .unwrap();
        assert!(label_stage.inputs().contains(&FileRef::new("/data/A_labels.mnc")));
        assert!(label_stage.command_line().contains("-nearest_neighbour -keep_real_range"));
        assert_eq!(a.group(0).unwrap().labels(LabelSet::Input), &[FileRef::new("/data/A_labels.mnc")]);
    }

    #[test]
    fn test_resample_store_without_transform_is_miss() {
        let (mut a, b) = stores();
        let err = resample_store(&mut a, &b, None, None).unwrap_err();
        assert!(err.is_provenance_miss());
        assert_eq!(a.current_group_index(), 0);
    }
}
