//! Classification Report
//!
//! The caller-facing aggregate of one batch.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::output::{Category, ClassificationResult};
use crate::kind::AssessKind;

/// Accept/reject partition of a batch, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub kind: AssessKind,
    /// Ids of accepted inputs
    pub accepted: Vec<String>,
    /// Ids of rejected inputs
    pub rejected: Vec<String>,
    /// Score per id, when the tool wrote any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, f64>>,
    pub results: Vec<ClassificationResult>,
    /// Run directory the batch was executed in; `None` for an empty batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<PathBuf>,
}

impl ClassificationReport {
    /// Report for a batch with no inputs.
    pub fn empty(kind: AssessKind) -> Self {
        Self {
            kind,
            accepted: Vec::new(),
            rejected: Vec::new(),
            scores: None,
            results: Vec::new(),
            run_dir: None,
        }
    }

    /// Splits parsed results into the two partitions.
    pub fn from_results(
        kind: AssessKind,
        results: Vec<ClassificationResult>,
        run_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut scores = BTreeMap::new();

        for result in &results {
            match result.category {
                Category::Accepted => accepted.push(result.id.clone()),
                Category::Rejected => rejected.push(result.id.clone()),
            }
            if let Some(score) = result.score {
                scores.insert(result.id.clone(), score);
            }
        }

        Self {
            kind,
            accepted,
            rejected,
            scores: if scores.is_empty() { None } else { Some(scores) },
            results,
            run_dir: Some(run_dir.into()),
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
