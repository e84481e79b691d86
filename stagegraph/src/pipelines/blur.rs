//! Blurring with `mincblur`.

use crate::artifacts::{ArtifactStore, BlurOutputs, OutputDir};
use crate::core::Fwhm;
use crate::errors::StageGraphError;
use crate::stages::{BuildResult, CmdStage};

/// Blurs the store's current volume with `fwhm`, optionally also computing
/// the gradient magnitude, and records the result as the latest blur.
///
/// The files go to the subject's `tmp` directory (the working directory for
/// a read-only store).
///
/// # Errors
///
/// `InvalidInput` if the output directory does not resolve.
pub fn mincblur(
    store: &mut ArtifactStore,
    fwhm: Fwhm,
    gradient: bool,
) -> Result<BuildResult<BlurOutputs>, StageGraphError> {
    let dir = store.dir_or_current(OutputDir::Tmp);
    let input = store.base_volume().clone();
    let outputs = store.blur_file(fwhm, gradient, &dir)?;

    let mut builder = CmdStage::builder()
        .args(["mincblur", "-clobber", "-no_apodize", "-fwhm"])
        .arg(fwhm.to_string());
    if gradient {
        builder = builder.arg("-gradient");
    }
    builder = builder
        .input(&input)
        .arg(outputs.base.to_string_lossy())
        .extra_output(&outputs.file);
    if let Some(gradient) = &outputs.gradient {
        builder = builder.extra_output(gradient);
    }
    let stage = builder.log_file(outputs.log.clone()).build()?;

    Ok(BuildResult::single(stage, outputs))
}
