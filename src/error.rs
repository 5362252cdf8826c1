//! Error Types
//!
//! Every failure aborts the current batch. Nothing is retried and any
//! partially written run directory is left on disk for inspection.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving the environment or running a batch.
#[derive(Error, Debug)]
pub enum AssessError {
    /// Missing or invalid environment, tool or model file
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller supplied an unknown option or an out-of-range value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An input could not be linked or copied into the run directory
    #[error("Failed to stage '{}': {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external tool exited non-zero or was killed
    #[error("External tool failed ({}): {stderr}", describe_exit(*code))]
    ExternalTool { code: Option<i32>, stderr: String },

    /// The tool exited cleanly but left an output layout we cannot read
    #[error("Unreadable tool output at '{}': {reason}", path.display())]
    OutputParse { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AssessError {
    /// Shorthand for an [`AssessError::OutputParse`].
    pub fn output(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AssessError::OutputParse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, AssessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_tool_message_contains_stderr() {
        let err = AssessError::ExternalTool {
            code: Some(2),
            stderr: "CUDA out of memory".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 2"));
        assert!(msg.contains("CUDA out of memory"));
    }

    #[test]
    fn test_external_tool_signal() {
        let err = AssessError::ExternalTool {
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_output_parse_names_path() {
        let err = AssessError::output("/run/output/good", "missing category directory");
        let msg = err.to_string();
        assert!(msg.contains("/run/output/good"));
        assert!(msg.contains("missing category directory"));
    }
}
