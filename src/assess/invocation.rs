//! Job Invocation
//!
//! Builds the single command line run for a batch:
//!
//! ```text
//! {activation} && {program} --model M --threshold T --input DIR --output DIR [kind options]
//! ```

use std::path::PathBuf;

use serde::Serialize;

use super::params::ClassificationParams;
use super::staging::RunLayout;
use crate::environment::EnvironmentConfig;
use crate::error::{AssessError, Result};
use crate::kind::AssessKind;

/// Description of one subprocess execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInvocation {
    pub kind: AssessKind,
    /// Shell prefix entering the runtime
    pub activation: Option<String>,
    pub program: String,
    pub args: Vec<String>,
    /// Directory the subprocess runs in (the run directory)
    pub working_dir: PathBuf,
    /// Value passed as `--input`: the staging directory or the class stack
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Variables removed from the inherited environment
    pub unset_env: Vec<String>,
}

impl JobInvocation {
    /// Builds the invocation for a staged run.
    ///
    /// # Errors
    ///
    /// [`AssessError::Configuration`] if the model for `params.kind()` is
    /// not on disk any more.
    pub fn build(
        params: &ClassificationParams,
        env: &EnvironmentConfig,
        layout: &RunLayout,
    ) -> Result<Self> {
        let kind = params.kind();
        let model = env.model_path(kind)?;

        // micassess reads a directory of images, 2dassess a single stack
        let input = match kind {
            AssessKind::Micrograph => layout.input_dir.clone(),
            AssessKind::TwoDClass => layout.class_stack_path(),
        };

        let mut args = vec![
            "--model".to_string(),
            model.display().to_string(),
            "--threshold".to_string(),
            params.threshold.to_string(),
            "--input".to_string(),
            input.display().to_string(),
            "--output".to_string(),
            layout.output_dir.display().to_string(),
            "--batch-size".to_string(),
            params.batch_size.to_string(),
        ];

        match kind {
            AssessKind::Micrograph => {
                if let Some(threads) = params.threads {
                    args.push("--threads".to_string());
                    args.push(threads.to_string());
                }
                if let Some(ref gpus) = params.gpus {
                    args.push("--gpus".to_string());
                    args.push(gpus.clone());
                }
                if let Some(detector) = params.detector {
                    args.push("--detector".to_string());
                    args.push(detector.to_string());
                }
            }
            AssessKind::TwoDClass => {
                if let Some(box_size) = params.box_size {
                    args.push("--box-size".to_string());
                    args.push(box_size.to_string());
                }
            }
        }

        let program = env.program(kind);
        if program.trim().is_empty() {
            return Err(AssessError::Configuration(format!(
                "No program configured for {}",
                kind.label()
            )));
        }

        Ok(Self {
            kind,
            activation: env.activation_prefix().map(str::to_string),
            program,
            args,
            working_dir: layout.root.clone(),
            input,
            output_dir: layout.output_dir.clone(),
            unset_env: env.unset_vars(),
        })
    }

    /// Full shell command line, arguments quoted where needed.
    pub fn command_line(&self) -> String {
        let mut parts = vec![shell_quote(&self.program)];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        let command = parts.join(" ");

        match self.activation {
            Some(ref prefix) => format!("{} && {}", prefix, command),
            None => command,
        }
    }
}

/// Quotes `value` for bash unless it only contains safe characters.
fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./,:=+@%".contains(c));

    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
