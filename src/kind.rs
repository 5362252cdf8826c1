//! Assessment Kinds
//!
//! The external toolkit ships one classifier per image type. Each kind
//! selects a subcommand, a pretrained model and a staging strategy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Type of images being assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessKind {
    /// Motion-corrected micrographs (`micassess`)
    Micrograph,
    /// 2D class averages (`2dassess`)
    TwoDClass,
}

impl AssessKind {
    /// All kinds, in a stable order.
    pub const ALL: [AssessKind; 2] = [AssessKind::Micrograph, AssessKind::TwoDClass];

    /// Executable name of the classifier for this kind.
    pub fn subcommand(&self) -> &'static str {
        match self {
            AssessKind::Micrograph => "micassess",
            AssessKind::TwoDClass => "2dassess",
        }
    }

    /// Configuration variable holding the model path.
    pub fn model_var(&self) -> &'static str {
        match self {
            AssessKind::Micrograph => crate::environment::settings::CRYOASSESS_MODEL_MIC,
            AssessKind::TwoDClass => crate::environment::settings::CRYOASSESS_MODEL_2D,
        }
    }

    /// Default model location, relative to the installation root.
    pub fn default_model(&self) -> &'static str {
        match self {
            AssessKind::Micrograph => "cryoassess-models/micassess_051419.h5",
            AssessKind::TwoDClass => "cryoassess-models/2dassess_062119.h5",
        }
    }

    /// Human-readable plural used in logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            AssessKind::Micrograph => "micrographs",
            AssessKind::TwoDClass => "2D class averages",
        }
    }
}

impl fmt::Display for AssessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

impl FromStr for AssessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "micrographs" | "micrograph" | "mics" | "micassess" => Ok(AssessKind::Micrograph),
            "classes" | "averages" | "2d" | "2dassess" => Ok(AssessKind::TwoDClass),
            other => Err(format!(
                "Unknown assessment kind '{}' (expected 'micrographs' or 'classes')",
                other
            )),
        }
    }
}
