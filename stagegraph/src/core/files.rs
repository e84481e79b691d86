//! File references and the image/transform handles built on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A reference to a file that exists or will be produced by some stage.
///
/// Construction never touches the filesystem; a `FileRef` is only a name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(PathBuf);

impl FileRef {
    /// Creates a new file reference.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Returns the underlying path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Returns the file name without directory or extension.
    #[must_use]
    pub fn stem(&self) -> String {
        explode(&self.0).1
    }

    /// Returns the extension including its leading dot, or an empty string.
    #[must_use]
    pub fn extension(&self) -> String {
        explode(&self.0).2
    }

    /// Returns the containing directory.
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        explode(&self.0).0
    }

    /// Same directory and extension, with `suffix` appended to the stem.
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let (dir, stem, ext) = explode(&self.0);
        Self(dir.join(format!("{stem}{suffix}{ext}")))
    }

    /// Same directory and stem with a different extension (`ext` includes the dot).
    #[must_use]
    pub fn with_extension(&self, ext: &str) -> Self {
        let (dir, stem, _) = explode(&self.0);
        Self(dir.join(format!("{stem}{ext}")))
    }

    /// Returns a reference to `file_name` inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path, file_name: &str) -> Self {
        Self(dir.join(file_name))
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for FileRef {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<&str> for FileRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for FileRef {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for FileRef {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&Path> for FileRef {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

/// Splits `path` into its directory, base name and extension.
///
/// ```
/// use std::path::{Path, PathBuf};
/// use stagegraph::core::explode;
///
/// assert_eq!(
///     explode(Path::new("/path/to/some/file.ext")),
///     (PathBuf::from("/path/to/some"), "file".to_string(), ".ext".to_string())
/// );
/// assert_eq!(explode(Path::new("file")), (PathBuf::new(), "file".to_string(), String::new()));
/// ```
#[must_use]
pub fn explode(path: &Path) -> (PathBuf, String, String) {
    let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (directory, stem, ext)
}

/// Consecutive pairs of a list: `[a, b, c]` becomes `[(a, b), (b, c)]`.
#[must_use]
pub fn pairs<T: Clone>(items: &[T]) -> Vec<(T, T)> {
    items
        .windows(2)
        .map(|w| (w[0].clone(), w[1].clone()))
        .collect()
}

/// A volume together with the companion files that follow it through
/// resampling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    /// The volume itself.
    pub file: FileRef,
    /// Optional brain mask in the same space.
    pub mask: Option<FileRef>,
    /// Optional label volume in the same space.
    pub labels: Option<FileRef>,
}

impl Image {
    /// Creates an image with no companions.
    #[must_use]
    pub fn new(file: impl Into<FileRef>) -> Self {
        Self {
            file: file.into(),
            mask: None,
            labels: None,
        }
    }

    /// Sets the mask.
    #[must_use]
    pub fn with_mask(mut self, mask: impl Into<FileRef>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    /// Sets the labels.
    #[must_use]
    pub fn with_labels(mut self, labels: impl Into<FileRef>) -> Self {
        self.labels = Some(labels.into());
        self
    }
}

/// A transform between two volumes, optionally with the resampled source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct XfmHandle {
    /// Volume the transform maps from.
    pub source: FileRef,
    /// Volume the transform maps to.
    pub target: FileRef,
    /// The transform file.
    pub xfm: FileRef,
    /// The source resampled into the target's space, if that was requested.
    pub resampled: Option<Image>,
}
