//! # Stagegraph
//!
//! Builds the command graph of an image-registration pipeline without running
//! anything.
//!
//! Stagegraph provides:
//!
//! - **Stages**: immutable external commands with declared inputs, outputs and
//!   a log file, accumulated into a deduplicating [`Stages`](stages::Stages) set
//! - **Composition**: construction functions return a
//!   [`BuildResult`](stages::BuildResult) that callers fold in with `defer`
//! - **Provenance**: a per-subject [`ArtifactStore`](artifacts::ArtifactStore)
//!   that names every derived file deterministically and answers "most recent
//!   blur/transform" queries
//! - **Scheduler handoff**: topological order, required directories and a JSON
//!   manifest of the finished graph
//!
//! ## Quick Start
//!
//! ```rust
//! use stagegraph::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), StageGraphError> {
//! let root = Path::new("/project/pipeline_processed");
//! let mut source = ArtifactStore::new("/scans/A.mnc", None, root)?;
//! let mut target = ArtifactStore::new("/scans/B.mnc", None, root)?;
//! let fwhm = Fwhm::new(0.5)?;
//!
//! let mut stages = Stages::new();
//! stages.defer(mincblur(&mut source, fwhm, false))?;
//! stages.defer(mincblur(&mut target, fwhm, false))?;
//! let xfm = stages.defer(minctracc(&mut source, &target, &MinctraccConf::default(), None))?;
//!
//! assert_eq!(stages.len(), 3);
//! assert!(xfm.xfm.to_string().ends_with("A_to_B_base_0.xfm"));
//! assert_eq!(stages.topological_order()?.last().map(|s| s.program()), Some("minctracc"));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod config;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipelines;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{
        ArtifactGroup, ArtifactKey, ArtifactStore, BlurKind, BlurQuery, DirectoryLayout, LabelSet, OutputDir,
    };
    pub use crate::config::{LoggingConfig, PipelineConfig, RegistrationConfig};
    pub use crate::core::{FileRef, Fwhm, Image, XfmHandle};
    pub use crate::errors::{
        CycleDetectedError, ErrorInfo, MissingLogFileError, NamingCollisionError, ProvenanceKind,
        ProvenanceMissError, StageGraphError,
    };
    pub use crate::observability::init_logging;
    pub use crate::pipelines::{
        chain_stats, intrasubject_registrations, mincblur, minctracc, multilevel_minctracc, resample, resample_store,
        xfm_concat, xfm_invert, MinctraccConf, StatsGroup, Subject,
    };
    pub use crate::stages::{BuildResult, CmdStage, SharedStages, Stages};
}
