//! Test assertions for stage sets.

use crate::core::FileRef;
use crate::stages::Stages;
use std::collections::HashMap;

/// Asserts that no output path is claimed by more than one stage.
pub fn assert_unique_outputs(stages: &Stages) {
    let mut producers: HashMap<&FileRef, &str> = HashMap::new();
    for stage in stages {
        for output in stage.outputs() {
            if let Some(previous) = producers.insert(output, stage.program()) {
                panic!(
                    "Output '{}' is produced twice: by `{}` and by `{}`",
                    output,
                    previous,
                    stage.program()
                );
            }
        }
    }
}

/// Asserts how many stages run `program`.
pub fn assert_stage_count_by_program(stages: &Stages, program: &str, expected: usize) {
    let actual = stages.iter().filter(|s| s.program() == program).count();
    assert_eq!(
        actual, expected,
        "Expected {} `{}` stages, got {}. Programs: {:?}",
        expected,
        program,
        actual,
        stages.iter().map(|s| s.program()).collect::<Vec<_>>()
    );
}

/// Asserts that some stage produces `file`.
pub fn assert_produces(stages: &Stages, file: &FileRef) {
    assert!(
        stages.producer_of(file).is_some(),
        "Expected a stage producing '{file}', but none does"
    );
}

/// Asserts that the stage set can be ordered for execution.
pub fn assert_acyclic(stages: &Stages) {
    if let Err(err) = stages.topological_order() {
        panic!("Expected an acyclic stage graph: {err}");
    }
}
