//! Stages and the accumulator that composes them.
//!
//! A [`CmdStage`] is one external command with declared files. Construction
//! functions return a [`BuildResult`]; callers fold sub-results into their own
//! [`Stages`] with [`Stages::defer`], so arbitrarily deep composition still
//! ends in a single flat, deduplicated graph.

mod result;
mod shared;
mod stage;
mod stage_set;

pub use result::BuildResult;
pub use shared::SharedStages;
pub use stage::{CmdStage, CmdStageBuilder, CmdToken};
pub use stage_set::{StageRecord, Stages};
