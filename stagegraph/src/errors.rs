//! Error types for stage-graph construction.
//!
//! Every failure here is raised while the graph is being assembled, before
//! anything reaches the scheduler. Nothing is retried: a construction error
//! means either a bug in a construction function or an ambiguous request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stagegraph operations.
#[derive(Debug, Error)]
pub enum StageGraphError {
    /// A construction function was handed input it cannot work with.
    #[error("Invalid input for '{argument}': {message}")]
    InvalidInput {
        /// The offending argument.
        argument: String,
        /// What is wrong with it.
        message: String,
    },

    /// A derived artifact was requested that was never registered.
    #[error("{0}")]
    ProvenanceMiss(#[from] ProvenanceMissError),

    /// Two different stages claim the same output path.
    #[error("{0}")]
    NamingCollision(#[from] NamingCollisionError),

    /// A stage was declared without a log destination.
    #[error("{0}")]
    MissingLogFile(#[from] MissingLogFileError),

    /// The file dependencies between stages form a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageGraphError {
    /// Creates an invalid-input error naming the offending argument.
    #[must_use]
    pub fn invalid_input(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            argument: argument.into(),
            message: message.into(),
        }
    }

    /// Returns the structured diagnostics, if this variant carries any.
    #[must_use]
    pub const fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::ProvenanceMiss(err) => Some(&err.error_info),
            Self::NamingCollision(err) => Some(&err.error_info),
            Self::MissingLogFile(err) => Some(&err.error_info),
            Self::CycleDetected(err) => Some(&err.error_info),
            _ => None,
        }
    }

    /// Returns true if this is a provenance miss.
    #[must_use]
    pub const fn is_provenance_miss(&self) -> bool {
        matches!(self, Self::ProvenanceMiss(_))
    }
}

impl From<serde_json::Error> for StageGraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Diagnostic metadata attached to structured errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "GRAPH-002-COLLISION").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// The kind of derived artifact a provenance query asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceKind {
    /// A blurred volume.
    Blur,
    /// A gradient volume.
    Gradient,
    /// A transform against some target.
    Transform,
    /// An artifact group, by index or name.
    Group,
}

impl fmt::Display for ProvenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blur => write!(f, "blur"),
            Self::Gradient => write!(f, "gradient"),
            Self::Transform => write!(f, "transform"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// Raised when a blur, gradient, transform or group was never registered.
#[derive(Debug, Clone, Error)]
#[error("Provenance miss: no {kind} '{key}' recorded{}", subject_suffix(.subject.as_deref()))]
pub struct ProvenanceMissError {
    /// What kind of artifact was requested.
    pub kind: ProvenanceKind,
    /// The key that was looked up.
    pub key: String,
    /// The subject whose store was queried, once known.
    pub subject: Option<String>,
    /// Diagnostics.
    pub error_info: ErrorInfo,
}

fn subject_suffix(subject: Option<&str>) -> String {
    subject.map_or_else(String::new, |s| format!(" for subject '{s}'"))
}

impl ProvenanceMissError {
    /// Creates a new provenance miss.
    #[must_use]
    pub fn new(kind: ProvenanceKind, key: impl Into<String>) -> Self {
        let key = key.into();
        let info = ErrorInfo::new(
            "GRAPH-001-PROVENANCE",
            format!("Requested {kind} '{key}' was never produced"),
        )
        .with_fix_hint(format!(
            "Build the stage that produces the {kind} before querying it."
        ));

        Self {
            kind,
            key,
            subject: None,
            error_info: info,
        }
    }

    /// Attaches the subject name.
    #[must_use]
    pub fn for_subject(mut self, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        self.error_info = self.error_info.with_context_entry("subject", subject.clone());
        self.subject = Some(subject);
        self
    }
}

/// Raised when two distinct stages would write the same path.
#[derive(Debug, Clone, Error)]
#[error("Naming collision: '{}' is produced by both `{existing}` and `{incoming}`", .path.display())]
pub struct NamingCollisionError {
    /// The contested output path.
    pub path: PathBuf,
    /// Command line of the stage already in the set.
    pub existing: String,
    /// Command line of the stage being merged.
    pub incoming: String,
    /// Diagnostics.
    pub error_info: ErrorInfo,
}

impl NamingCollisionError {
    /// Creates a new naming collision error.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, existing: impl Into<String>, incoming: impl Into<String>) -> Self {
        let path = path.into();
        let info = ErrorInfo::new(
            "GRAPH-002-COLLISION",
            format!("Output '{}' has two different producers", path.display()),
        )
        .with_fix_hint("Give one of the stages a distinct output name or group label.");

        Self {
            path,
            existing: existing.into(),
            incoming: incoming.into(),
            error_info: info,
        }
    }
}

/// Raised when a stage is built without a log destination.
#[derive(Debug, Clone, Error)]
#[error("No log file for stage: {command}")]
pub struct MissingLogFileError {
    /// Rendered command of the offending stage.
    pub command: String,
    /// Diagnostics.
    pub error_info: ErrorInfo,
}

impl MissingLogFileError {
    /// Creates a new missing-log-file error.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            error_info: ErrorInfo::new("GRAPH-003-NO_LOG", "Stage declares no log file")
                .with_fix_hint("Derive a log path with `ArtifactStore::log_file_for`."),
        }
    }
}

/// Raised when stage outputs feed back into their own inputs.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in stage graph: {}", .cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Diagnostics.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "GRAPH-004-CYCLE",
            format!("Stage graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("A stage must not consume a file produced downstream of itself.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}
