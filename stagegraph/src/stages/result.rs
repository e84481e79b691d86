//! The value every construction function returns.

use super::{CmdStage, Stages};

/// Stages accumulated by a construction function plus the value it produced.
///
/// Owned by its producer until a caller merges it with [`Stages::defer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult<T> {
    /// Stages needed to produce `output`.
    pub stages: Stages,
    /// The produced value (a file, a transform handle, a table of handles...).
    pub output: T,
}

impl<T> BuildResult<T> {
    /// Creates a result.
    #[must_use]
    pub const fn new(stages: Stages, output: T) -> Self {
        Self { stages, output }
    }

    /// A result that needs no stages.
    #[must_use]
    pub fn pure(output: T) -> Self {
        Self::new(Stages::new(), output)
    }

    /// A result produced by exactly one stage.
    #[must_use]
    pub fn single(stage: CmdStage, output: T) -> Self {
        Self::new(Stages::from_stage(stage), output)
    }

    /// Returns the produced value.
    #[must_use]
    pub const fn output(&self) -> &T {
        &self.output
    }

    /// Transforms the output, keeping the stages.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> BuildResult<U> {
        BuildResult::new(self.stages, f(self.output))
    }

    /// Splits into stages and output.
    #[must_use]
    pub fn into_parts(self) -> (Stages, T) {
        (self.stages, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FileRef;

    #[test]
    fn test_pure_has_no_stages() {
        let result = BuildResult::pure("identity.xfm");
        assert!(result.stages.is_empty());
        assert_eq!(*result.output(), "identity.xfm");
    }

    #[test]
    fn test_map_keeps_stages() {
        let stage = CmdStage::builder()
            .arg("xfminvert")
            .input(&FileRef::new("a.xfm"))
            .output(&FileRef::new("a_inverse.xfm"))
            .log_file(FileRef::new("a_inverse.log"))
            .build()
            .unwrap();
        let result = BuildResult::single(stage, FileRef::new("a_inverse.xfm")).map(|f| f.stem());
        assert_eq!(result.stages.len(), 1);
        assert_eq!(result.output, "a_inverse");
    }
}
