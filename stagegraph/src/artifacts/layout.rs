//! Per-subject directory layout and output-directory policy.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Log files.
pub const LOG_DIR: &str = "log";
/// Resampled volumes.
pub const RESAMPLED_DIR: &str = "resampled";
/// Transforms (xfms, grids).
pub const TRANSFORMS_DIR: &str = "transforms";
/// Resampled labels.
pub const LABELS_DIR: &str = "labels";
/// Intermediate files.
pub const TMP_DIR: &str = "tmp";
/// Statistics volumes.
pub const STATS_DIR: &str = "stats-volumes";

/// The fixed directory tree of one subject:
/// `root/<subject>/{log,resampled,transforms,labels,tmp,stats-volumes}`.
///
/// A pure function of the root and the subject's base name; nothing is
/// created on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryLayout {
    /// `root/<subject>`.
    pub subject_dir: PathBuf,
    /// Log files.
    pub log_dir: PathBuf,
    /// Resampled volumes.
    pub resampled_dir: PathBuf,
    /// Transforms.
    pub transforms_dir: PathBuf,
    /// Resampled labels.
    pub labels_dir: PathBuf,
    /// Intermediate files.
    pub tmp_dir: PathBuf,
    /// Statistics volumes.
    pub stats_dir: PathBuf,
}

impl DirectoryLayout {
    /// Computes the layout for `subject_base_name` under `root`.
    #[must_use]
    pub fn new(root: &Path, subject_base_name: &str) -> Self {
        let subject_dir = root.join(subject_base_name);
        Self {
            log_dir: subject_dir.join(LOG_DIR),
            resampled_dir: subject_dir.join(RESAMPLED_DIR),
            transforms_dir: subject_dir.join(TRANSFORMS_DIR),
            labels_dir: subject_dir.join(LABELS_DIR),
            tmp_dir: subject_dir.join(TMP_DIR),
            stats_dir: subject_dir.join(STATS_DIR),
            subject_dir,
        }
    }

    /// All directories of the layout, subject directory first.
    #[must_use]
    pub fn directories(&self) -> [&Path; 7] {
        [
            &self.subject_dir,
            &self.log_dir,
            &self.resampled_dir,
            &self.transforms_dir,
            &self.labels_dir,
            &self.tmp_dir,
            &self.stats_dir,
        ]
    }

    /// Resolves a named directory; `None` for `CurrentDir` and literals.
    #[must_use]
    pub fn named(&self, dir: &OutputDir) -> Option<&Path> {
        match dir {
            OutputDir::Tmp => Some(&self.tmp_dir),
            OutputDir::Resampled => Some(&self.resampled_dir),
            OutputDir::Labels => Some(&self.labels_dir),
            OutputDir::Transforms => Some(&self.transforms_dir),
            OutputDir::Stats => Some(&self.stats_dir),
            OutputDir::CurrentDir | OutputDir::Literal(_) => None,
        }
    }
}

/// Where a new derived file should go.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputDir {
    /// The working directory; only legal for read-only stores.
    #[default]
    CurrentDir,
    /// The subject's `tmp` directory.
    Tmp,
    /// The subject's `resampled` directory.
    Resampled,
    /// The subject's `labels` directory.
    Labels,
    /// The subject's `transforms` directory.
    Transforms,
    /// The subject's `stats-volumes` directory.
    Stats,
    /// Any other path, taken literally.
    Literal(PathBuf),
}

impl OutputDir {
    /// Maps an optional directory name onto the policy: known names select a
    /// subject directory, anything else is a literal path, absent means the
    /// working directory.
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            None | Some("") => Self::CurrentDir,
            Some("tmp") => Self::Tmp,
            Some("resampled") => Self::Resampled,
            Some("labels") => Self::Labels,
            Some("transforms") => Self::Transforms,
            Some("stats") => Self::Stats,
            Some(other) => Self::Literal(PathBuf::from(other)),
        }
    }
}

impl FromStr for OutputDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(Some(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = DirectoryLayout::new(Path::new("/proj"), "img_1");
        assert_eq!(layout.subject_dir, PathBuf::from("/proj/img_1"));
        assert_eq!(layout.log_dir, PathBuf::from("/proj/img_1/log"));
        assert_eq!(layout.stats_dir, PathBuf::from("/proj/img_1/stats-volumes"));
        assert_eq!(layout.directories().len(), 7);
    }

    #[test]
    fn test_output_dir_names() {
        assert_eq!(OutputDir::from_name(None), OutputDir::CurrentDir);
        assert_eq!("tmp".parse::<OutputDir>().unwrap(), OutputDir::Tmp);
        assert_eq!("stats".parse::<OutputDir>().unwrap(), OutputDir::Stats);
        assert_eq!(
            "/elsewhere/nlin".parse::<OutputDir>().unwrap(),
            OutputDir::Literal(PathBuf::from("/elsewhere/nlin"))
        );
    }

    #[test]
    fn test_named_resolution() {
        let layout = DirectoryLayout::new(Path::new("/proj"), "img_1");
        assert_eq!(layout.named(&OutputDir::Transforms), Some(Path::new("/proj/img_1/transforms")));
        assert_eq!(layout.named(&OutputDir::CurrentDir), None);
    }
}
