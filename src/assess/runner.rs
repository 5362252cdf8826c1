//! Batch Classification Runner
//!
//! Drives one batch through stage, invoke, execute and parse. Every step
//! that fails marks the job record failed and leaves the run directory
//! behind; nothing is retried.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::executor::{CommandExecutor, ShellExecutor};
use super::invocation::JobInvocation;
use super::output::{parse_output, Category};
use super::params::ClassificationParams;
use super::report::ClassificationReport;
use super::staging::{check_inputs, stage_inputs, write_star, InputItem, RunLayout, StagedInput};
use super::state::{JobRecord, JobState};
use crate::environment::EnvironmentConfig;
use crate::error::{AssessError, Result};
use crate::kind::AssessKind;
use crate::monitoring::JobTimeline;

/// A staged batch, ready to execute.
#[derive(Debug)]
pub struct PreparedJob {
    pub layout: RunLayout,
    pub staged: Vec<StagedInput>,
    pub invocation: JobInvocation,
    pub record: JobRecord,
    pub timeline: JobTimeline,
}

impl PreparedJob {
    /// Records a failure and hands the error back for propagation.
    fn abort(&mut self, error: AssessError) -> AssessError {
        abort(&mut self.record, &mut self.timeline, error)
    }

    fn advance(&mut self, state: JobState) -> Result<()> {
        if self.record.transition(state) {
            self.timeline.record(state);
        }
        self.record.save()
    }
}

/// Runs classification batches against one resolved environment.
pub struct Runner {
    env: EnvironmentConfig,
    work_root: PathBuf,
    executor: Box<dyn CommandExecutor>,
}

impl Runner {
    /// Creates a runner that executes through `bash`.
    pub fn new(env: EnvironmentConfig, work_root: impl Into<PathBuf>) -> Self {
        Self::with_executor(env, work_root, Box::new(ShellExecutor::new()))
    }

    /// Creates a runner with a custom executor.
    pub fn with_executor(
        env: EnvironmentConfig,
        work_root: impl Into<PathBuf>,
        executor: Box<dyn CommandExecutor>,
    ) -> Self {
        Self {
            env,
            work_root: work_root.into(),
            executor,
        }
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.env
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Stages `inputs` into a fresh run directory and builds the invocation.
    ///
    /// The job ends in [`JobState::Staged`] and nothing is executed. A
    /// missing model or a bad input list is reported before any run
    /// directory is created.
    pub fn prepare(
        &self,
        inputs: &[InputItem],
        params: &ClassificationParams,
    ) -> Result<PreparedJob> {
        let kind = params.kind();
        self.env.model_path(kind)?;
        check_inputs(kind, inputs)?;

        let layout = RunLayout::create(&self.work_root, kind)?;
        let mut record = JobRecord::new(kind, &layout.root, inputs.len());
        let mut timeline = JobTimeline::new();
        record.save()?;

        let staged = match stage_inputs(kind, inputs, &layout) {
            Ok(staged) => staged,
            Err(e) => return Err(abort(&mut record, &mut timeline, e)),
        };
        info!(
            "Staged {} {} in {}",
            staged.len(),
            kind.label(),
            layout.root.display()
        );

        let invocation = match JobInvocation::build(params, &self.env, &layout) {
            Ok(invocation) => invocation,
            Err(e) => return Err(abort(&mut record, &mut timeline, e)),
        };
        record.command = Some(invocation.command_line());

        let mut job = PreparedJob {
            layout,
            staged,
            invocation,
            record,
            timeline,
        };
        job.advance(JobState::Staged)?;

        Ok(job)
    }

    /// Classifies one batch.
    ///
    /// Returns a partition in which every staged image (each micrograph, or
    /// each section of a class stack) appears exactly once, or an error and
    /// no results. An empty batch returns an empty report without
    /// touching the filesystem.
    ///
    /// # Errors
    ///
    /// - [`AssessError::InvalidParameter`] if `params` were built for another kind
    /// - [`AssessError::Configuration`] if the model is missing (nothing is spawned)
    /// - [`AssessError::Staging`] if an input cannot be placed in the run directory
    /// - [`AssessError::ExternalTool`] on a non-zero exit or signal termination
    /// - [`AssessError::OutputParse`] if the output layout does not cover the inputs
    pub fn classify(
        &self,
        kind: AssessKind,
        inputs: &[InputItem],
        params: &ClassificationParams,
    ) -> Result<ClassificationReport> {
        if params.kind() != kind {
            return Err(AssessError::InvalidParameter(format!(
                "parameters for {} passed to a {} batch",
                params.kind().label(),
                kind.label()
            )));
        }

        if inputs.is_empty() {
            info!("No {} to classify", kind.label());
            return Ok(ClassificationReport::empty(kind));
        }

        let mut job = self.prepare(inputs, params)?;

        if let Err(e) = job.advance(JobState::Running) {
            return Err(job.abort(e));
        }

        let outcome = match self.executor.execute(&job.invocation) {
            Ok(outcome) => outcome,
            Err(e) => return Err(job.abort(e)),
        };

        if !outcome.success() {
            let error = AssessError::ExternalTool {
                code: outcome.exit_code,
                stderr: outcome.stderr,
            };
            return Err(job.abort(error));
        }

        let results = match parse_output(kind, &job.layout.output_dir, &job.staged) {
            Ok(results) => results,
            Err(e) => return Err(job.abort(e)),
        };

        let accepted: Vec<String> = job
            .staged
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.category == Category::Accepted)
            .map(|(input, _)| star_name(input))
            .collect();
        if let Err(e) = write_star(&job.layout.accepted_path(), star_column(kind), &accepted) {
            return Err(job.abort(e));
        }

        let report = ClassificationReport::from_results(kind, results, &job.layout.root);

        job.record
            .mark_succeeded(report.accepted.len(), report.rejected.len());
        job.timeline.record(JobState::Succeeded);
        job.record.save()?;

        info!(
            "Classified {} {}: {} accepted, {} rejected",
            report.total(),
            kind.label(),
            report.accepted.len(),
            report.rejected.len()
        );
        debug!("{}", job.timeline.summary());

        Ok(report)
    }
}

/// STAR column naming the accepted inputs.
fn star_column(kind: AssessKind) -> &'static str {
    match kind {
        AssessKind::Micrograph => "rlnMicrographName",
        AssessKind::TwoDClass => "rlnImageName",
    }
}

/// RELION image name: the path, prefixed with `<section>@` inside a stack.
fn star_name(input: &StagedInput) -> String {
    match input.section {
        Some(section) => format!("{}@{}", section, input.source.display()),
        None => input.source.display().to_string(),
    }
}

fn abort(record: &mut JobRecord, timeline: &mut JobTimeline, error: AssessError) -> AssessError {
    record.mark_failed(&error);
    timeline.record(JobState::Failed);
    if let Err(save_error) = record.save() {
        warn!(
            "Could not record failure in {}: {}",
            record.path().display(),
            save_error
        );
    }
    debug!("{}", timeline.summary());
    error
}
