//! Testing utilities for stage graphs.
//!
//! This module provides:
//! - Fixtures that open artifact stores under a fixed root
//! - Assertions over finished stage sets

mod assertions;
mod fixtures;

pub use assertions::{
    assert_acyclic, assert_produces, assert_stage_count_by_program, assert_unique_outputs,
};
pub use fixtures::SubjectFixture;
