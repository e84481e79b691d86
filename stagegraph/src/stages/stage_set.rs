//! The deduplicating stage accumulator.

use super::{BuildResult, CmdStage};
use crate::core::FileRef;
use crate::errors::{CycleDetectedError, NamingCollisionError, StageGraphError};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info};

/// A deterministic, insertion-ordered set of stages.
///
/// No two distinct stages in the set share an output path. Adding a stage
/// that is identical to one already present is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Stages {
    stages: Vec<CmdStage>,
    /// Output path -> index of the producing stage.
    producers: HashMap<FileRef, usize>,
}

enum Admission {
    New,
    Duplicate,
}

impl Stages {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding a single stage.
    #[must_use]
    pub fn from_stage(stage: CmdStage) -> Self {
        let mut stages = Self::new();
        stages.insert(stage);
        stages
    }

    /// Adds a stage. Returns `false` if an identical stage was already present.
    ///
    /// # Errors
    ///
    /// `NamingCollision` if a different stage already produces one of its outputs.
    pub fn add(&mut self, stage: CmdStage) -> Result<bool, StageGraphError> {
        match self.admit(&stage)? {
            Admission::Duplicate => {
                debug!(program = stage.program(), "Skipping duplicate stage");
                Ok(false)
            }
            Admission::New => {
                self.insert(stage);
                Ok(true)
            }
        }
    }

    /// Unions `other` into this set and returns how many stages were new.
    ///
    /// Every stage is checked before any is inserted, so a collision leaves
    /// this set unchanged.
    ///
    /// # Errors
    ///
    /// `NamingCollision` if any stage of `other` conflicts with this set.
    pub fn merge(&mut self, other: Self) -> Result<usize, StageGraphError> {
        let mut fresh = Vec::with_capacity(other.stages.len());
        for stage in other.stages {
            if matches!(self.admit(&stage)?, Admission::New) {
                fresh.push(stage);
            }
        }

        let added = fresh.len();
        for stage in fresh {
            self.insert(stage);
        }
        debug!(added, total = self.stages.len(), "Merged stage set");
        Ok(added)
    }

    /// Merges a sub-result's stages and hands back its output.
    ///
    /// A failed construction passes its error through without touching this
    /// set, so a caller can write `let out = s.defer(blur(...))?;`.
    ///
    /// # Errors
    ///
    /// The construction error itself, or `NamingCollision` from the merge.
    pub fn defer<T>(&mut self, result: Result<BuildResult<T>, StageGraphError>) -> Result<T, StageGraphError> {
        let (stages, output) = result?.into_parts();
        self.merge(stages)?;
        Ok(output)
    }

    /// Wraps this set and `output` into a result.
    #[must_use]
    pub fn into_result<T>(self, output: T) -> BuildResult<T> {
        BuildResult::new(self, output)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Iterates the stages in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, CmdStage> {
        self.stages.iter()
    }

    /// Returns true if an identical stage is present.
    #[must_use]
    pub fn contains(&self, stage: &CmdStage) -> bool {
        stage
            .outputs()
            .iter()
            .next()
            .and_then(|out| self.producer_of(out))
            .is_some_and(|existing| existing == stage)
    }

    /// Returns the stage producing `file`, if any.
    #[must_use]
    pub fn producer_of(&self, file: &FileRef) -> Option<&CmdStage> {
        self.producers.get(file).map(|&i| &self.stages[i])
    }

    /// Directories that must exist before any stage runs: the parents of
    /// every output and every log file.
    #[must_use]
    pub fn output_directories(&self) -> BTreeSet<PathBuf> {
        self.stages
            .iter()
            .flat_map(|s| s.outputs().iter().chain(std::iter::once(s.log_file())))
            .map(FileRef::directory)
            .collect()
    }

    /// Orders the stages so every producer precedes its consumers.
    ///
    /// Inputs without a producer in the set are assumed to exist already.
    /// Ties are broken by insertion order, so the result is deterministic.
    ///
    /// # Errors
    ///
    /// `CycleDetected` if outputs feed back into their own producers.
    pub fn topological_order(&self) -> Result<Vec<&CmdStage>, StageGraphError> {
        let mut order = Vec::with_capacity(self.stages.len());
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        let mut path = Vec::new();

        for idx in 0..self.stages.len() {
            self.visit(idx, &mut visited, &mut in_stack, &mut path, &mut order)
                .map_err(CycleDetectedError::new)?;
        }

        Ok(order.into_iter().map(|i| &self.stages[i]).collect())
    }

    fn visit(
        &self,
        idx: usize,
        visited: &mut HashSet<usize>,
        in_stack: &mut HashSet<usize>,
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), Vec<String>> {
        if visited.contains(&idx) {
            return Ok(());
        }
        if in_stack.contains(&idx) {
            let start = path.iter().position(|&n| n == idx).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|&n| self.stages[n].program().to_string())
                .collect();
            cycle.push(self.stages[idx].program().to_string());
            return Err(cycle);
        }

        in_stack.insert(idx);
        path.push(idx);

        // BTreeSet iteration keeps dependency visits deterministic
        for input in self.stages[idx].inputs() {
            if let Some(&dep) = self.producers.get(input) {
                self.visit(dep, visited, in_stack, path, order)?;
            }
        }

        path.pop();
        in_stack.remove(&idx);
        visited.insert(idx);
        order.push(idx);
        Ok(())
    }

    /// Builds the serializable manifest handed to the scheduler.
    #[must_use]
    pub fn manifest(&self) -> Vec<StageRecord<'_>> {
        self.stages.iter().map(StageRecord::from_stage).collect()
    }

    /// Serializes the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String, StageGraphError> {
        Ok(serde_json::to_string_pretty(&self.manifest())?)
    }

    /// Logs a one-line summary of the set.
    pub fn log_summary(&self, name: &str) {
        let programs: BTreeSet<&str> = self.stages.iter().map(CmdStage::program).collect();
        info!(
            pipeline = name,
            stages = self.stages.len(),
            directories = self.output_directories().len(),
            ?programs,
            "Stage graph assembled"
        );
    }

    fn admit(&self, stage: &CmdStage) -> Result<Admission, NamingCollisionError> {
        for output in stage.outputs() {
            if let Some(existing) = self.producer_of(output) {
                if existing == stage {
                    return Ok(Admission::Duplicate);
                }
                return Err(NamingCollisionError::new(
                    output.path(),
                    existing.command_line(),
                    stage.command_line(),
                ));
            }
        }
        Ok(Admission::New)
    }

    fn insert(&mut self, stage: CmdStage) {
        let idx = self.stages.len();
        for output in stage.outputs() {
            self.producers.insert(output.clone(), idx);
        }
        self.stages.push(stage);
    }
}

impl PartialEq for Stages {
    fn eq(&self, other: &Self) -> bool {
        self.stages == other.stages
    }
}

impl Eq for Stages {}

impl<'a> IntoIterator for &'a Stages {
    type Item = &'a CmdStage;
    type IntoIter = std::slice::Iter<'a, CmdStage>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}

impl IntoIterator for Stages {
    type Item = CmdStage;
    type IntoIter = std::vec::IntoIter<CmdStage>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.into_iter()
    }
}

/// Serializable view of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord<'a> {
    /// Stable fingerprint of the stage.
    pub id: String,
    /// Rendered command tokens.
    pub command: Vec<String>,
    /// Declared inputs.
    pub inputs: &'a BTreeSet<FileRef>,
    /// Declared outputs.
    pub outputs: &'a BTreeSet<FileRef>,
    /// Log destination.
    pub log_file: &'a FileRef,
}

impl<'a> StageRecord<'a> {
    fn from_stage(stage: &'a CmdStage) -> Self {
        Self {
            id: stage.fingerprint(),
            command: stage.command().iter().map(super::CmdToken::render).collect(),
            inputs: stage.inputs(),
            outputs: stage.outputs(),
            log_file: stage.log_file(),
        }
    }
}
