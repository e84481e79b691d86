//! Displacement fields and jacobian determinants.
//!
//! For a nonlinear transform from a subject to a common space the linear part
//! is split off, so the log determinants describe only the local nonlinear
//! change; the scaled variants add the overall linear scaling back.

use super::registration::xfm_invert;
use crate::artifacts::{ArtifactStore, OutputDir};
use crate::core::{FileRef, Fwhm};
use crate::errors::StageGraphError;
use crate::stages::{BuildResult, CmdStage, Stages};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Jacobians per blur kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsGroup {
    /// Log determinants.
    pub jacobians: BTreeMap<Fwhm, FileRef>,
    /// Log determinants scaled by the linear part; `None` when computed from
    /// the full displacement.
    pub scaled_jacobians: Option<BTreeMap<Fwhm, FileRef>>,
}

fn transform_to(source: &ArtifactStore, target: &ArtifactStore, xfm: Option<&FileRef>) -> Result<FileRef, StageGraphError> {
    match xfm {
        Some(xfm) => Ok(xfm.clone()),
        None => Ok(source.last_transform(&target.key(), None)?.clone()),
    }
}

/// Extracts the linear part of a nonlinear transform into
/// `<transforms>/<xfm-stem>_linear_part.xfm`.
///
/// Without an explicit `xfm` the source's latest transform to `target` is
/// used.
///
/// # Errors
///
/// `ProvenanceMiss` if there is no such transform, `InvalidInput` if the
/// output directory does not resolve.
pub fn lin_from_nlin(
    source: &ArtifactStore,
    target: &ArtifactStore,
    xfm: Option<&FileRef>,
) -> Result<BuildResult<FileRef>, StageGraphError> {
    let xfm = transform_to(source, target, xfm)?;
    let dir = source.output_dir(&source.dir_or_current(OutputDir::Transforms))?;
    let output = FileRef::in_dir(&dir, &format!("{}_linear_part.xfm", xfm.stem()));

    let mut builder = CmdStage::builder().args(["lin_from_nlin", "-clobber", "-lsq12"]);
    if let Some(mask) = source.mask() {
        builder = builder.arg("-mask").input(mask);
    }
    let stage = builder
        .input(source.base_volume())
        .input(&xfm)
        .output(&output)
        .log_file(source.log_file_for(&output))
        .build()?;
    Ok(BuildResult::single(stage, output))
}

/// Computes the displacement field of a transform into
/// `<tmp>/<xfm-stem>_displacement.mnc`.
///
/// # Errors
///
/// `ProvenanceMiss` if `xfm` is absent and no transform to `target` was
/// recorded, `InvalidInput` if the output directory does not resolve.
pub fn minc_displacement(
    source: &ArtifactStore,
    target: &ArtifactStore,
    xfm: Option<&FileRef>,
) -> Result<BuildResult<FileRef>, StageGraphError> {
    let xfm = transform_to(source, target, xfm)?;
    let dir = source.output_dir(&source.dir_or_current(OutputDir::Tmp))?;
    let output = FileRef::in_dir(&dir, &format!("{}_displacement.mnc", xfm.stem()));
    let stage = CmdStage::builder()
        .args(["minc_displacement", "-clobber"])
        .input(source.base_volume())
        .input(&xfm)
        .output(&output)
        .log_file(source.log_file_for(&output))
        .build()?;
    Ok(BuildResult::single(stage, output))
}

/// Smooths a displacement field at each kernel and derives its log
/// determinant: `smooth_vector`, `mincblob -determinant`, `+1`, `log`, and
/// with a `linear` transform also `scale_voxels`.
///
/// Intermediates go to `tmp`, the determinants to `stats-volumes`.
///
/// # Errors
///
/// `InvalidInput` for an empty kernel list or unresolvable directories.
pub fn determinants(
    store: &ArtifactStore,
    displacement: &FileRef,
    linear: Option<&FileRef>,
    kernels: &[Fwhm],
) -> Result<BuildResult<StatsGroup>, StageGraphError> {
    if kernels.is_empty() {
        return Err(StageGraphError::invalid_input("kernels", "at least one blur kernel is required"));
    }
    let tmp = store.output_dir(&store.dir_or_current(OutputDir::Tmp))?;
    let stats = store.output_dir(&store.dir_or_current(OutputDir::Stats))?;
    let stem = displacement.stem();
    let base = stem.strip_suffix("_displacement").unwrap_or(&stem);

    let mut stages = Stages::new();
    let mut group = StatsGroup {
        jacobians: BTreeMap::new(),
        scaled_jacobians: linear.map(|_| BTreeMap::new()),
    };
    for &fwhm in kernels {
        let smooth = FileRef::in_dir(&tmp, &format!("{base}_smooth_displacement_fwhm{fwhm}.mnc"));
        stages.add(
            CmdStage::builder()
                .args(["smooth_vector", "--clobber", "--filter"])
                .arg(format!("--fwhm={fwhm}"))
                .input(displacement)
                .output(&smooth)
                .log_file(store.log_file_for(&smooth))
                .build()?,
        )?;

        let det = FileRef::in_dir(&tmp, &format!("{base}_determinant_fwhm{fwhm}.mnc"));
        stages.add(
            CmdStage::builder()
                .args(["mincblob", "-clobber", "-determinant"])
                .input(&smooth)
                .output(&det)
                .log_file(store.log_file_for(&det))
                .build()?,
        )?;

        // mincblob reports the determinant minus one
        let det_plus1 = FileRef::in_dir(&tmp, &format!("{base}_det_plus1_fwhm{fwhm}.mnc"));
        stages.add(
            CmdStage::builder()
                .args(["mincmath", "-clobber", "-2", "-const", "1", "-add"])
                .input(&det)
                .output(&det_plus1)
                .log_file(store.log_file_for(&det_plus1))
                .build()?,
        )?;

        let log_det = FileRef::in_dir(&stats, &format!("{base}_log_determinant_fwhm{fwhm}.mnc"));
        stages.add(
            CmdStage::builder()
                .args(["mincmath", "-clobber", "-2", "-log"])
                .input(&det_plus1)
                .output(&log_det)
                .log_file(store.log_file_for(&log_det))
                .build()?,
        )?;

        if let (Some(linear), Some(scaled)) = (linear, group.scaled_jacobians.as_mut()) {
            let log_det_scaled = FileRef::in_dir(&stats, &format!("{base}_log_determinant_scaled_fwhm{fwhm}.mnc"));
            stages.add(
                CmdStage::builder()
                    .args(["scale_voxels", "-clobber", "-invert", "-log"])
                    .input(linear)
                    .input(&log_det)
                    .output(&log_det_scaled)
                    .log_file(store.log_file_for(&log_det_scaled))
                    .build()?,
            )?;
            scaled.insert(fwhm, log_det_scaled);
        }
        group.jacobians.insert(fwhm, log_det);
    }

    debug!(subject = store.base_name(), kernels = kernels.len(), stages = stages.len(), "Built determinant stages");
    Ok(stages.into_result(group))
}

/// Full statistics for the latest transform from `source` to `target`,
/// with the linear part removed from the displacement.
///
/// # Errors
///
/// `ProvenanceMiss` if no transform to `target` was recorded, otherwise as
/// [`determinants`].
pub fn chain_stats(
    source: &ArtifactStore,
    target: &ArtifactStore,
    kernels: &[Fwhm],
) -> Result<BuildResult<StatsGroup>, StageGraphError> {
    let xfm = transform_to(source, target, None)?;
    let mut stages = Stages::new();

    let linear = stages.defer(lin_from_nlin(source, target, Some(&xfm)))?;
    let linear_inverse = stages.defer(xfm_invert(source, &linear))?;
    let linear_disp = stages.defer(minc_displacement(source, target, Some(&linear_inverse)))?;
    let full_disp = stages.defer(minc_displacement(source, target, Some(&xfm)))?;

    let tmp = source.output_dir(&source.dir_or_current(OutputDir::Tmp))?;
    let nlin_disp = FileRef::in_dir(&tmp, &format!("{}_nlin_displacement.mnc", xfm.stem()));
    stages.add(
        CmdStage::builder()
            .args(["mincmath", "-clobber", "-add"])
            .input(&full_disp)
            .input(&linear_disp)
            .output(&nlin_disp)
            .log_file(source.log_file_for(&nlin_disp))
            .build()?,
    )?;

    let group = stages.defer(determinants(source, &nlin_disp, Some(&linear), kernels))?;
    Ok(stages.into_result(group))
}

/// Statistics from the full displacement of the latest transform, without
/// removing the linear part. The result has no scaled jacobians.
///
/// # Errors
///
/// As [`chain_stats`].
pub fn full_displacement_stats(
    source: &ArtifactStore,
    target: &ArtifactStore,
    kernels: &[Fwhm],
) -> Result<BuildResult<StatsGroup>, StageGraphError> {
    let mut stages = Stages::new();
    let full_disp = stages.defer(minc_displacement(source, target, None))?;
    let group = stages.defer(determinants(source, &full_disp, None, kernels))?;
    Ok(stages.into_result(group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_stage_count_by_program;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn kernels(values: &[f64]) -> Vec<Fwhm> {
        values.iter().map(|&v| Fwhm::new(v).unwrap()).collect()
    }

    fn registered() -> (ArtifactStore, ArtifactStore) {
        let root = Path::new("/proj");
        let mut a = ArtifactStore::new("/data/A.mnc", None, root).unwrap();
        let b = ArtifactStore::new("/data/B.mnc", None, root).unwrap();
        a.register_volume(&b, &OutputDir::Transforms).unwrap();
        (a, b)
    }

    #[test]
    fn test_lin_from_nlin_uses_latest_transform() {
        let (a, b) = registered();
        let result = lin_from_nlin(&a, &b, None).unwrap();
        assert_eq!(result.output, FileRef::new("/proj/A/transforms/A_to_B_base_0_linear_part.xfm"));
        let stage = result.stages.iter().next().unwrap();
        assert!(stage.inputs().contains(&FileRef::new("/proj/A/transforms/A_to_B_base_0.xfm")));
    }

    #[test]
    fn test_displacement_without_transform_is_miss() {
        let root = Path::new("/proj");
        let a = ArtifactStore::new("/data/A.mnc", None, root).unwrap();
        let b = ArtifactStore::new("/data/B.mnc", None, root).unwrap();
        assert!(minc_displacement(&a, &b, None).unwrap_err().is_provenance_miss());
    }

    #[test]
    fn test_determinants_requires_kernels() {
        let (a, _) = registered();
        assert!(determinants(&a, &FileRef::new("/proj/A/tmp/x_displacement.mnc"), None, &[]).is_err());
    }

    #[test]
    fn test_chain_stats_stage_counts() {
        let (a, b) = registered();
        let result = chain_stats(&a, &b, &kernels(&[1.0, 0.5])).unwrap();
        let stages = &result.stages;

        // lin_from_nlin, xfminvert, two displacements, nlin mincmath, then
        // five stages per kernel
        assert_eq!(stages.len(), 5 + 2 * 5);
        assert_stage_count_by_program(stages, "minc_displacement", 2);
        assert_stage_count_by_program(stages, "scale_voxels", 2);
        assert_stage_count_by_program(stages, "mincmath", 1 + 2 * 2);

        let group = &result.output;
        assert_eq!(
            group.jacobians[&Fwhm::new(0.5).unwrap()],
            FileRef::new("/proj/A/stats-volumes/A_to_B_base_0_nlin_log_determinant_fwhm0.5.mnc")
        );
        assert_eq!(group.scaled_jacobians.as_ref().map(BTreeMap::len), Some(2));
        assert!(stages.topological_order().is_ok());
    }

    #[test]
    fn test_full_displacement_stats_has_no_scaled_jacobians() {
        let (a, b) = registered();
        let result = full_displacement_stats(&a, &b, &kernels(&[0.2])).unwrap();
        assert_eq!(result.stages.len(), 1 + 4);
        assert_eq!(result.output.scaled_jacobians, None);
        assert_eq!(
            result.output.jacobians[&Fwhm::new(0.2).unwrap()],
            FileRef::new("/proj/A/stats-volumes/A_to_B_base_0_log_determinant_fwhm0.2.mnc")
        );
    }

    #[test]
    fn test_both_variants_fit_one_graph() {
        let (a, b) = registered();
        let mut stages = Stages::new();
        stages.defer(chain_stats(&a, &b, &kernels(&[0.5]))).unwrap();
        stages.defer(full_displacement_stats(&a, &b, &kernels(&[0.5]))).unwrap();
        // the full displacement is shared
        assert_eq!(stages.len(), (5 + 5) + 4);
    }

    #[test]
    fn test_subject_name_containing_displacement() {
        let root = Path::new("/proj");
        let mut a = ArtifactStore::new("/data/mouse_displacement_study.mnc", None, root).unwrap();
        let b = ArtifactStore::new("/data/B.mnc", None, root).unwrap();
        a.register_volume(&b, &OutputDir::Transforms).unwrap();

        let mut stages = Stages::new();
        stages.defer(chain_stats(&a, &b, &kernels(&[0.5]))).unwrap();
        let full = stages.defer(full_displacement_stats(&a, &b, &kernels(&[0.5]))).unwrap();
        assert_eq!(stages.len(), (5 + 5) + 4);
        assert_eq!(
            full.jacobians[&Fwhm::new(0.5).unwrap()],
            FileRef::new(
                "/proj/mouse_displacement_study/stats-volumes/mouse_displacement_study_to_B_base_0_log_determinant_fwhm0.5.mnc"
            )
        );
    }
}
