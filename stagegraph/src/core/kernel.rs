//! Blurring kernel widths.

use crate::errors::StageGraphError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Full-width-at-half-maximum of a Gaussian blurring kernel, in mm.
///
/// Always finite and strictly positive, which makes it usable as a map key.
/// "Use the raw volume" is expressed by `BlurQuery::Raw`, never by a
/// sentinel width.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Fwhm(f64);

impl Fwhm {
    /// Creates a kernel width.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for non-finite or non-positive widths.
    pub fn new(value: f64) -> Result<Self, StageGraphError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(StageGraphError::invalid_input(
                "fwhm",
                format!("kernel width must be a positive number, got {value}"),
            ));
        }
        Ok(Self(value))
    }

    /// Returns the width in mm.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for Fwhm {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Fwhm {}

impl Hash for Fwhm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Fwhm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fwhm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Fwhm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<f64> for Fwhm {
    type Error = StageGraphError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Fwhm> for f64 {
    fn from(fwhm: Fwhm) -> Self {
        fwhm.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_sentinels() {
        assert!(Fwhm::new(-1.0).is_err());
        assert!(Fwhm::new(0.0).is_err());
        assert!(Fwhm::new(f64::NAN).is_err());
        assert!(Fwhm::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_display_matches_file_naming() {
        assert_eq!(Fwhm::new(0.5).unwrap().to_string(), "0.5");
        assert_eq!(Fwhm::new(1.0).unwrap().to_string(), "1");
        assert_eq!(Fwhm::new(0.056).unwrap().to_string(), "0.056");
    }

    #[test]
    fn test_ordering() {
        let mut ks = vec![Fwhm::new(1.0).unwrap(), Fwhm::new(0.1).unwrap(), Fwhm::new(0.5).unwrap()];
        ks.sort();
        let values: Vec<f64> = ks.into_iter().map(f64::from).collect();
        assert_eq!(values, vec![0.1, 0.5, 1.0]);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Fwhm = serde_json::from_str("0.2").unwrap();
        assert_eq!(ok.value(), 0.2);
        assert!(serde_json::from_str::<Fwhm>("-1").is_err());
    }
}
