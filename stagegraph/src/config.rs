//! Pipeline configuration.
//!
//! Configuration is plain serde data with per-field defaults, so a partial
//! JSON document is enough:
//!
//! ```
//! use stagegraph::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{"pipeline_name": "chain"}"#).unwrap();
//! assert_eq!(config.stats_kernels, "1.0,0.5,0.2,0.1");
//! assert_eq!(config.kernels().unwrap().len(), 4);
//! ```

use crate::artifacts::OutputDir;
use crate::core::Fwhm;
use crate::errors::StageGraphError;
use crate::pipelines::MinctraccConf;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Parses a comma-separated kernel list such as `"1.0,0.5,0.2"`.
///
/// # Errors
///
/// `Config` for an empty list, a non-numeric entry, or a kernel that is not
/// a positive finite width.
pub fn parse_kernel_list(list: &str) -> Result<Vec<Fwhm>, StageGraphError> {
    let kernels = list
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let value: f64 = item
                .parse()
                .map_err(|_| StageGraphError::Config(format!("'{item}' is not a blur kernel")))?;
            Fwhm::new(value).map_err(|err| StageGraphError::Config(err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if kernels.is_empty() {
        return Err(StageGraphError::Config(format!("no blur kernels in '{list}'")));
    }
    Ok(kernels)
}

/// Top-level configuration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name used for the processed-files directory.
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Directory under which everything is written.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    /// Kernels for the jacobian statistics.
    #[serde(default = "default_stats_kernels")]
    pub stats_kernels: String,
    /// Registration settings.
    #[serde(default)]
    pub registration: RegistrationConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_pipeline_name() -> String {
    "stagegraph".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_stats_kernels() -> String {
    "1.0,0.5,0.2,0.1".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            output_directory: default_output_directory(),
            stats_kernels: default_stats_kernels(),
            registration: RegistrationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_pipeline_name(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = name.into();
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }

    /// Sets the statistics kernels.
    #[must_use]
    pub fn with_stats_kernels(mut self, kernels: impl Into<String>) -> Self {
        self.stats_kernels = kernels.into();
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// `Serialization` for malformed JSON, `Config` if validation fails.
    pub fn from_json_str(json: &str) -> Result<Self, StageGraphError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`Self::from_json_str`].
    pub fn from_file(path: &Path) -> Result<Self, StageGraphError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks the values that serde cannot.
    ///
    /// # Errors
    ///
    /// `Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), StageGraphError> {
        if self.pipeline_name.trim().is_empty() {
            return Err(StageGraphError::Config("pipeline_name must not be empty".to_string()));
        }
        if self.pipeline_name.contains(std::path::MAIN_SEPARATOR) || self.pipeline_name.contains('/') {
            return Err(StageGraphError::Config(format!(
                "pipeline_name '{}' must not contain a path separator",
                self.pipeline_name
            )));
        }
        self.kernels()?;
        self.registration.kernels()?;
        self.logging.env_filter()?;
        Ok(())
    }

    /// Parsed statistics kernels.
    ///
    /// # Errors
    ///
    /// As [`parse_kernel_list`].
    pub fn kernels(&self) -> Result<Vec<Fwhm>, StageGraphError> {
        parse_kernel_list(&self.stats_kernels)
    }

    /// Root for per-subject stores: `<output>/<pipeline-name>_processed`.
    #[must_use]
    pub fn processed_dir(&self) -> PathBuf {
        self.output_directory.join(format!("{}_processed", self.pipeline_name))
    }
}

/// Registration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Blur kernel per linear registration level.
    #[serde(default = "default_blur_kernels")]
    pub blur_kernels: String,
    /// Register gradient magnitudes instead of blurred intensities.
    #[serde(default)]
    pub use_gradient: bool,
    /// Write transforms to `tmp` rather than `transforms`.
    #[serde(default)]
    pub transforms_in_tmp: bool,
}

fn default_blur_kernels() -> String {
    "0.5,0.2".to_string()
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            blur_kernels: default_blur_kernels(),
            use_gradient: false,
            transforms_in_tmp: false,
        }
    }
}

impl RegistrationConfig {
    /// Parsed blur kernels, one per level of
    /// [`multilevel_minctracc`](crate::pipelines::multilevel_minctracc).
    ///
    /// # Errors
    ///
    /// As [`parse_kernel_list`].
    pub fn kernels(&self) -> Result<Vec<Fwhm>, StageGraphError> {
        parse_kernel_list(&self.blur_kernels)
    }

    /// `minctracc` settings implied by this configuration.
    #[must_use]
    pub fn minctracc_conf(&self) -> MinctraccConf {
        MinctraccConf {
            use_gradient: self.use_gradient,
            output_dir: if self.transforms_in_tmp {
                OutputDir::Tmp
            } else {
                OutputDir::Transforms
            },
            ..MinctraccConf::default()
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `stagegraph=debug`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Enables JSON output.
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Builds the filter for this configuration.
    ///
    /// # Errors
    ///
    /// `Config` if the directive does not parse.
    pub fn env_filter(&self) -> Result<EnvFilter, StageGraphError> {
        EnvFilter::try_new(&self.level)
            .map_err(|err| StageGraphError::Config(format!("invalid log level '{}': {err}", self.level)))
    }
}
