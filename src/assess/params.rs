//! Classification Parameters
//!
//! Options arrive as loose `key -> value` strings (from the CLI or a host
//! workflow) and are validated here, per kind, before anything touches
//! the filesystem.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{AssessError, Result};
use crate::kind::AssessKind;

/// Options accepted for micrographs.
const MICROGRAPH_OPTIONS: &[&str] = &["threshold", "batch_size", "gpus", "threads", "detector", "dims"];

/// Options accepted for 2D class averages.
const CLASS_OPTIONS: &[&str] = &["threshold", "batch_size", "box_size"];

/// Aspect ratios of the supported cameras and the tolerance used to match them.
const K2_ASPECT: f64 = 1.0345;
const K3_ASPECT: f64 = 1.4076;
const ASPECT_TOLERANCE: f64 = 0.001;

/// Camera the micrographs were recorded on.
///
/// The micrograph model was trained only on Gatan K2 and K3 data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Detector {
    K2,
    K3,
}

impl Detector {
    /// Guesses the camera from micrograph dimensions.
    ///
    /// ```
    /// use cryorunner::assess::Detector;
    ///
    /// assert_eq!(Detector::infer(3838, 3710), Some(Detector::K2));
    /// assert_eq!(Detector::infer(4092, 5760), Some(Detector::K3));
    /// assert_eq!(Detector::infer(4096, 4096), None);
    /// ```
    pub fn infer(width: u32, height: u32) -> Option<Detector> {
        let long = width.max(height) as f64;
        let short = width.min(height) as f64;
        if short == 0.0 {
            return None;
        }

        let ratio = long / short;
        if (ratio - K2_ASPECT).abs() <= ASPECT_TOLERANCE {
            Some(Detector::K2)
        } else if (ratio - K3_ASPECT).abs() <= ASPECT_TOLERANCE {
            Some(Detector::K3)
        } else {
            None
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detector::K2 => f.write_str("K2"),
            Detector::K3 => f.write_str("K3"),
        }
    }
}

impl FromStr for Detector {
    type Err = AssessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "K2" => Ok(Detector::K2),
            "K3" => Ok(Detector::K3),
            other => Err(AssessError::InvalidParameter(format!(
                "Unknown detector '{}' (expected K2 or K3)",
                other
            ))),
        }
    }
}

/// Validated parameters for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationParams {
    kind: AssessKind,
    /// Acceptance threshold in [0, 1]; higher rejects more
    pub threshold: f64,
    /// Images per prediction batch on the GPU
    pub batch_size: u32,
    /// Comma-separated GPU ids (micrographs only)
    pub gpus: Option<String>,
    /// CPU threads for preprocessing (micrographs only)
    pub threads: Option<usize>,
    pub detector: Option<Detector>,
    /// Box size of the class averages (2D only)
    pub box_size: Option<u32>,
}

impl ClassificationParams {
    /// Default parameters for `kind`.
    pub fn new(kind: AssessKind) -> Self {
        match kind {
            AssessKind::Micrograph => Self {
                kind,
                threshold: 0.1,
                batch_size: 32,
                gpus: Some("0".to_string()),
                threads: Some(1),
                detector: None,
                box_size: None,
            },
            AssessKind::TwoDClass => Self {
                kind,
                threshold: 0.5,
                batch_size: 32,
                gpus: None,
                threads: None,
                detector: None,
                box_size: None,
            },
        }
    }

    /// Builds parameters from loose options, rejecting anything unknown.
    ///
    /// Keys are case-insensitive and `-`/`_` are interchangeable.
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use cryorunner::assess::ClassificationParams;
    /// use cryorunner::AssessKind;
    ///
    /// let mut options = BTreeMap::new();
    /// options.insert("threshold".to_string(), "0.3".to_string());
    /// options.insert("gpus".to_string(), "0 1".to_string());
    ///
    /// let params = ClassificationParams::from_options(AssessKind::Micrograph, &options).unwrap();
    /// assert_eq!(params.threshold, 0.3);
    /// assert_eq!(params.gpus.as_deref(), Some("0,1"));
    /// ```
    pub fn from_options(kind: AssessKind, options: &BTreeMap<String, String>) -> Result<Self> {
        let allowed = match kind {
            AssessKind::Micrograph => MICROGRAPH_OPTIONS,
            AssessKind::TwoDClass => CLASS_OPTIONS,
        };

        let mut params = Self::new(kind);
        let mut dims = None;

        for (raw_key, value) in options {
            let key = raw_key.trim().to_ascii_lowercase().replace('-', "_");
            if !allowed.contains(&key.as_str()) {
                return Err(AssessError::InvalidParameter(format!(
                    "Unrecognized option '{}' for {} (allowed: {})",
                    raw_key,
                    kind.label(),
                    allowed.join(", ")
                )));
            }

            match key.as_str() {
                "threshold" => params.threshold = parse_value(&key, value)?,
                "batch_size" => params.batch_size = parse_value(&key, value)?,
                "gpus" => params.gpus = Some(parse_gpus(value)?),
                "threads" => params.threads = Some(parse_value(&key, value)?),
                "detector" => params.detector = Some(value.parse()?),
                "dims" => dims = Some(parse_dims(value)?),
                "box_size" => params.box_size = Some(parse_value(&key, value)?),
                _ => unreachable!("key checked against allowed options"),
            }
        }

        if params.detector.is_none() {
            if let Some((width, height)) = dims {
                params.detector = Detector::infer(width, height);
                if params.detector.is_none() {
                    warn!(
                        "Micrographs of {}x{} do not match a K2 or K3 camera; the model was trained only on K2/K3 data",
                        width, height
                    );
                }
            }
        }

        params.validate()?;
        Ok(params)
    }

    pub fn kind(&self) -> AssessKind {
        self.kind
    }

    /// Checks value ranges and clamps the thread count to the host.
    pub fn validate(&mut self) -> Result<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(AssessError::InvalidParameter(format!(
                "threshold must be between 0 and 1, got {}",
                self.threshold
            )));
        }

        if self.batch_size == 0 {
            return Err(AssessError::InvalidParameter(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if self.box_size == Some(0) {
            return Err(AssessError::InvalidParameter(
                "box_size must be at least 1".to_string(),
            ));
        }

        if let Some(threads) = self.threads {
            if threads == 0 {
                return Err(AssessError::InvalidParameter(
                    "threads must be at least 1".to_string(),
                ));
            }

            let max_threads = num_cpus::get();
            if threads > max_threads {
                warn!(
                    "Requested {} threads but only {} available - clamping",
                    threads, max_threads
                );
                self.threads = Some(max_threads);
            }
        }

        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        AssessError::InvalidParameter(format!("Invalid value for {}: '{}'", key, value))
    })
}

/// Normalizes a GPU list ("0 1", "0,1") to the comma form the tool expects.
fn parse_gpus(value: &str) -> Result<String> {
    let ids: Vec<&str> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();

    if ids.is_empty() || !ids.iter().all(|id| id.chars().all(|c| c.is_ascii_digit())) {
        return Err(AssessError::InvalidParameter(format!(
            "Invalid GPU list: '{}'",
            value
        )));
    }

    Ok(ids.join(","))
}

fn parse_dims(value: &str) -> Result<(u32, u32)> {
    let invalid = || AssessError::InvalidParameter(format!("Invalid dims '{}' (expected WxH)", value));

    let (w, h) = value
        .trim()
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(invalid)?;
    let width = w.trim().parse().map_err(|_| invalid())?;
    let height = h.trim().parse().map_err(|_| invalid())?;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_micrograph_defaults() {
        let params = ClassificationParams::from_options(AssessKind::Micrograph, &options(&[])).unwrap();
        assert_eq!(params.threshold, 0.1);
        assert_eq!(params.batch_size, 32);
        assert_eq!(params.gpus.as_deref(), Some("0"));
        assert_eq!(params.threads, Some(1));
        assert!(params.detector.is_none());
    }

    #[test]
    fn test_class_defaults() {
        let params = ClassificationParams::new(AssessKind::TwoDClass);
        assert_eq!(params.threshold, 0.5);
        assert!(params.gpus.is_none());
        assert!(params.box_size.is_none());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let result = ClassificationParams::from_options(
            AssessKind::Micrograph,
            &options(&[("sharpen", "yes")]),
        );
        assert!(matches!(result, Err(AssessError::InvalidParameter(_))));
    }

    #[test]
    fn test_kind_specific_options() {
        let result = ClassificationParams::from_options(
            AssessKind::TwoDClass,
            &options(&[("gpus", "0")]),
        );
        assert!(matches!(result, Err(AssessError::InvalidParameter(_))));

        let result = ClassificationParams::from_options(
            AssessKind::Micrograph,
            &options(&[("box_size", "64")]),
        );
        assert!(matches!(result, Err(AssessError::InvalidParameter(_))));

        let params = ClassificationParams::from_options(
            AssessKind::TwoDClass,
            &options(&[("box-size", "64"), ("Batch_Size", "8")]),
        )
        .unwrap();
        assert_eq!(params.box_size, Some(64));
        assert_eq!(params.batch_size, 8);
    }

    #[test]
    fn test_threshold_range() {
        for bad in ["1.5", "-0.1", "NaN", "abc"] {
            let result = ClassificationParams::from_options(
                AssessKind::Micrograph,
                &options(&[("threshold", bad)]),
            );
            assert!(
                matches!(result, Err(AssessError::InvalidParameter(_))),
                "threshold {} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_zero_batch_size() {
        let result = ClassificationParams::from_options(
            AssessKind::TwoDClass,
            &options(&[("batch_size", "0")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_gpu_list_normalized() {
        assert_eq!(parse_gpus("0 1 2").unwrap(), "0,1,2");
        assert_eq!(parse_gpus("0,1").unwrap(), "0,1");
        assert_eq!(parse_gpus(" 3 ").unwrap(), "3");
        assert!(parse_gpus("").is_err());
        assert!(parse_gpus("gpu0").is_err());
    }

    #[test]
    fn test_threads_clamped() {
        let params = ClassificationParams::from_options(
            AssessKind::Micrograph,
            &options(&[("threads", "100000")]),
        )
        .unwrap();
        assert_eq!(params.threads, Some(num_cpus::get()));
    }

    #[test]
    fn test_detector_from_dims() {
        let params = ClassificationParams::from_options(
            AssessKind::Micrograph,
            &options(&[("dims", "5760x4092")]),
        )
        .unwrap();
        assert_eq!(params.detector, Some(Detector::K3));
    }

    #[test]
    fn test_explicit_detector_wins_over_dims() {
        let params = ClassificationParams::from_options(
            AssessKind::Micrograph,
            &options(&[("dims", "5760x4092"), ("detector", "k2")]),
        )
        .unwrap();
        assert_eq!(params.detector, Some(Detector::K2));
    }

    #[test]
    fn test_bad_dims() {
        assert!(parse_dims("4096").is_err());
        assert!(parse_dims("axb").is_err());
        assert_eq!(parse_dims("3838 x 3710").unwrap(), (3838, 3710));
    }

    #[test]
    fn test_detector_infer_tolerance() {
        assert_eq!(Detector::infer(3710, 3838), Some(Detector::K2));
        assert_eq!(Detector::infer(0, 100), None);
        assert!("K4".parse::<Detector>().is_err());
    }
}
