//! cryorunner - Batch Runner for cryoassess
//!
//! Runs the cryoassess deep-learning classifiers (`micassess` for
//! micrographs, `2dassess` for 2D class averages) as external jobs inside an
//! isolated runtime, and turns the directories they write into an
//! accept/reject partition of the inputs.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`environment`]: settings, conda activation and model resolution
//! - [`assess`]: staging, invocation, execution and output parsing
//! - [`monitoring`]: resource usage and job timeline
//! - [`error`]: the error type shared by all of the above
//!
//! # Example
//!
//! ```rust,no_run
//! use cryorunner::assess::{ClassificationParams, InputItem, Runner};
//! use cryorunner::environment::{resolve, Settings};
//! use cryorunner::AssessKind;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load()?;
//!     let env = resolve(&settings, &[AssessKind::Micrograph])?;
//!
//!     let runner = Runner::new(env, "/data/cryoassess");
//!     let inputs = vec![
//!         InputItem::new("/data/mics/m1.mrc"),
//!         InputItem::new("/data/mics/m2.mrc"),
//!     ];
//!     let params = ClassificationParams::new(AssessKind::Micrograph);
//!
//!     let report = runner.classify(AssessKind::Micrograph, &inputs, &params)?;
//!     println!("accepted: {:?}", report.accepted);
//!     Ok(())
//! }
//! ```

pub mod assess;
pub mod environment;
pub mod error;
pub mod kind;
pub mod monitoring;

// Re-export commonly used types
pub use assess::{ClassificationParams, ClassificationReport, InputItem, Runner};
pub use environment::{EnvironmentConfig, Settings};
pub use error::{AssessError, Result};
pub use kind::AssessKind;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "cryorunner";
