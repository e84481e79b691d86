//! A single external command with declared inputs, outputs and log.

use crate::core::FileRef;
use crate::errors::{MissingLogFileError, StageGraphError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One token of a stage's command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CmdToken {
    /// A literal argument.
    Arg(String),
    /// A file the command reads.
    Input(FileRef),
    /// A file the command writes.
    Output(FileRef),
}

impl CmdToken {
    /// Renders the token as it would appear on a command line.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Arg(arg) => arg.clone(),
            Self::Input(file) | Self::Output(file) => file.to_string(),
        }
    }
}

impl From<&str> for CmdToken {
    fn from(arg: &str) -> Self {
        Self::Arg(arg.to_string())
    }
}

impl From<String> for CmdToken {
    fn from(arg: String) -> Self {
        Self::Arg(arg)
    }
}

/// An immutable external command invocation.
///
/// Identity is the triple (command, inputs, outputs); the log file does not
/// take part in equality or hashing.
#[derive(Debug, Clone, Serialize)]
pub struct CmdStage {
    command: Vec<CmdToken>,
    inputs: BTreeSet<FileRef>,
    outputs: BTreeSet<FileRef>,
    log_file: FileRef,
}

impl CmdStage {
    /// Starts building a stage.
    #[must_use]
    pub fn builder() -> CmdStageBuilder {
        CmdStageBuilder::default()
    }

    /// Returns the command tokens.
    #[must_use]
    pub fn command(&self) -> &[CmdToken] {
        &self.command
    }

    /// Returns the program name (the first literal token).
    #[must_use]
    pub fn program(&self) -> &str {
        match self.command.first() {
            Some(CmdToken::Arg(arg)) => arg,
            _ => "",
        }
    }

    /// Returns the declared inputs.
    #[must_use]
    pub const fn inputs(&self) -> &BTreeSet<FileRef> {
        &self.inputs
    }

    /// Returns the declared outputs.
    #[must_use]
    pub const fn outputs(&self) -> &BTreeSet<FileRef> {
        &self.outputs
    }

    /// Returns the log destination.
    #[must_use]
    pub const fn log_file(&self) -> &FileRef {
        &self.log_file
    }

    /// Returns the rendered command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        render_command(&self.command)
    }

    /// Returns a stable hex SHA-256 of the identity triple.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for token in &self.command {
            let tag: &[u8] = match token {
                CmdToken::Arg(_) => b"a",
                CmdToken::Input(_) => b"i",
                CmdToken::Output(_) => b"o",
            };
            hasher.update(tag);
            hasher.update(token.render().as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(b"\x1finputs");
        for input in &self.inputs {
            hasher.update(input.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(b"\x1foutputs");
        for output in &self.outputs {
            hasher.update(output.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for CmdStage {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command && self.inputs == other.inputs && self.outputs == other.outputs
    }
}

impl Eq for CmdStage {}

impl Hash for CmdStage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.command.hash(state);
        self.inputs.hash(state);
        self.outputs.hash(state);
    }
}

impl fmt::Display for CmdStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

fn render_command(command: &[CmdToken]) -> String {
    command.iter().map(CmdToken::render).collect::<Vec<_>>().join(" ")
}

/// Builder for [`CmdStage`].
///
/// `input`/`output` put the file on the command line and declare it;
/// `extra_input`/`extra_output` only declare it (for files a program derives
/// from some other argument).
#[derive(Debug, Clone, Default)]
pub struct CmdStageBuilder {
    command: Vec<CmdToken>,
    inputs: BTreeSet<FileRef>,
    outputs: BTreeSet<FileRef>,
    log_file: Option<FileRef>,
}

impl CmdStageBuilder {
    /// Appends a literal argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(CmdToken::Arg(arg.into()));
        self
    }

    /// Appends several literal arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(|a| CmdToken::Arg(a.into())));
        self
    }

    /// Appends an input file to the command line.
    #[must_use]
    pub fn input(mut self, file: &FileRef) -> Self {
        self.command.push(CmdToken::Input(file.clone()));
        self.inputs.insert(file.clone());
        self
    }

    /// Appends an output file to the command line.
    #[must_use]
    pub fn output(mut self, file: &FileRef) -> Self {
        self.command.push(CmdToken::Output(file.clone()));
        self.outputs.insert(file.clone());
        self
    }

    /// Declares an input that does not appear on the command line.
    #[must_use]
    pub fn extra_input(mut self, file: &FileRef) -> Self {
        self.inputs.insert(file.clone());
        self
    }

    /// Declares an output that does not appear on the command line.
    #[must_use]
    pub fn extra_output(mut self, file: &FileRef) -> Self {
        self.outputs.insert(file.clone());
        self
    }

    /// Sets the log destination.
    #[must_use]
    pub fn log_file(mut self, file: FileRef) -> Self {
        self.log_file = Some(file);
        self
    }

    /// Finishes the stage.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty command, no outputs, or a file that is both
    /// read and written; `MissingLogFile` when no log destination was set.
    pub fn build(self) -> Result<CmdStage, StageGraphError> {
        if self.command.is_empty() {
            return Err(StageGraphError::invalid_input("command", "stage has an empty command"));
        }
        if self.outputs.is_empty() {
            return Err(StageGraphError::invalid_input(
                "outputs",
                format!("stage `{}` declares no outputs", render_command(&self.command)),
            ));
        }
        if let Some(both) = self.inputs.intersection(&self.outputs).next() {
            return Err(StageGraphError::invalid_input(
                "outputs",
                format!("'{both}' is both read and written by the same stage"),
            ));
        }
        let Some(log_file) = self.log_file else {
            return Err(MissingLogFileError::new(render_command(&self.command)).into());
        };

        Ok(CmdStage {
            command: self.command,
            inputs: self.inputs,
            outputs: self.outputs,
            log_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_stage(src: &str, dst: &str, log: &str) -> CmdStage {
        CmdStage::builder()
            .arg("cp")
            .input(&FileRef::new(src))
            .output(&FileRef::new(dst))
            .log_file(FileRef::new(log))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_records_files() {
        let stage = copy_stage("/in/a.mnc", "/out/a.mnc", "/log/a.log");
        assert_eq!(stage.program(), "cp");
        assert_eq!(stage.command_line(), "cp /in/a.mnc /out/a.mnc");
        assert!(stage.inputs().contains(&FileRef::new("/in/a.mnc")));
        assert!(stage.outputs().contains(&FileRef::new("/out/a.mnc")));
    }

    #[test]
    fn test_missing_log_file_is_error() {
        let err = CmdStage::builder()
            .arg("cp")
            .input(&FileRef::new("a"))
            .output(&FileRef::new("b"))
            .build()
            .unwrap_err();
        assert!(matches!(err, StageGraphError::MissingLogFile(_)));
    }

    #[test]
    fn test_no_outputs_is_error() {
        let err = CmdStage::builder()
            .arg("true")
            .log_file(FileRef::new("x.log"))
            .build()
            .unwrap_err();
        assert!(matches!(err, StageGraphError::InvalidInput { ref argument, .. } if argument == "outputs"));
    }

    #[test]
    fn test_self_feeding_stage_is_error() {
        let f = FileRef::new("a.mnc");
        let err = CmdStage::builder()
            .arg("touch")
            .input(&f)
            .output(&f)
            .log_file(FileRef::new("a.log"))
            .build()
            .unwrap_err();
        assert!(matches!(err, StageGraphError::InvalidInput { .. }));
    }

    #[test]
    fn test_identity_ignores_log_file() {
        let a = copy_stage("x", "y", "one.log");
        let b = copy_stage("x", "y", "two.log");
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_token_roles() {
        let as_arg = CmdStage::builder()
            .args(["cp", "x"])
            .extra_input(&FileRef::new("x"))
            .output(&FileRef::new("y"))
            .log_file(FileRef::new("l"))
            .build()
            .unwrap();
        let as_input = copy_stage("x", "y", "l");
        assert_eq!(as_arg.command_line(), as_input.command_line());
        assert_ne!(as_arg, as_input);
        assert_ne!(as_arg.fingerprint(), as_input.fingerprint());
    }

    #[test]
    fn test_extra_output_not_on_command_line() {
        let stage = CmdStage::builder()
            .args(["mincblur", "-fwhm", "0.5"])
            .input(&FileRef::new("a.mnc"))
            .arg("/tmp/a_fwhm0.5")
            .extra_output(&FileRef::new("/tmp/a_fwhm0.5_blur.mnc"))
            .log_file(FileRef::new("a.log"))
            .build()
            .unwrap();
        assert!(!stage.command_line().contains("_blur.mnc"));
        assert_eq!(stage.outputs().len(), 1);
    }
}
