//! Batch Assessment Module
//!
//! Everything needed to push one batch of images through an external
//! classifier and read back its verdict.
//!
//! # Components
//!
//! - [`ClassificationParams`]: validated options for one batch
//! - [`staging`]: run directories and input placement
//! - [`mrc`]: class average stack headers
//! - [`JobInvocation`]: the command line for a staged batch
//! - [`CommandExecutor`]: subprocess execution seam
//! - [`parse_output`]: output layout to per-input results
//! - [`Runner`]: ties the steps together and tracks job state

pub mod executor;
pub mod invocation;
pub mod mrc;
pub mod output;
pub mod params;
pub mod report;
pub mod runner;
pub mod staging;
pub mod state;

pub use executor::{CommandExecutor, ExecutionOutcome, ShellExecutor};
pub use invocation::JobInvocation;
pub use output::{parse_output, Category, ClassificationResult};
pub use params::{ClassificationParams, Detector};
pub use report::ClassificationReport;
pub use runner::{PreparedJob, Runner};
pub use staging::{InputItem, RunLayout, StagedInput};
pub use state::{JobRecord, JobState};
