//! Construction functions.
//!
//! Each function names its outputs through an [`ArtifactStore`](crate::artifacts::ArtifactStore),
//! declares the commands that produce them, and returns a
//! [`BuildResult`](crate::stages::BuildResult). Nothing is executed and
//! nothing touches the filesystem. Composite functions fold their parts in
//! with [`Stages::defer`](crate::stages::Stages::defer).

pub mod blur;
pub mod chain;
pub mod registration;
pub mod stats;


pub use blur::mincblur;
pub use chain::{intrasubject_registrations, Subject};
pub use registration::{
    invert_handle, minctracc, multilevel_minctracc, resample, resample_store, xfm_concat, xfm_invert, Interpolation,
    MinctraccConf, ResampleOptions, TransformType,
};
pub use stats::{chain_stats, determinants, full_displacement_stats, lin_from_nlin, minc_displacement, StatsGroup};
