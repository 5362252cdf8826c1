//! Job Timeline
//!
//! Records when a job entered each state, for the timing report printed
//! after a batch.

use std::time::{Duration, Instant};

use crate::assess::state::JobState;

/// A single state change.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub state: JobState,
    pub timestamp: Instant,
}

/// Tracks the state changes of one job.
#[derive(Debug, Clone)]
pub struct JobTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl JobTimeline {
    /// Creates a timeline starting now, in [`JobState::Pending`].
    pub fn new() -> Self {
        let start_time = Instant::now();
        Self {
            events: vec![TimelineEvent {
                state: JobState::Pending,
                timestamp: start_time,
            }],
            start_time,
        }
    }

    /// Records entering `state`.
    pub fn record(&mut self, state: JobState) {
        self.events.push(TimelineEvent {
            state,
            timestamp: Instant::now(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time spent in each non-terminal state, in order.
    pub fn phase_durations(&self) -> Vec<(JobState, Duration)> {
        self.events
            .windows(2)
            .map(|pair| {
                (
                    pair[0].state,
                    pair[1].timestamp.duration_since(pair[0].timestamp),
                )
            })
            .collect()
    }

    /// Final state reached, if the job ended.
    pub fn outcome(&self) -> Option<JobState> {
        self.events
            .last()
            .map(|e| e.state)
            .filter(|state| state.is_terminal())
    }

    /// One line per phase, e.g. `  Running    12.40s`.
    pub fn summary(&self) -> String {
        let mut output = String::from("Job Timeline:\n");

        for (state, duration) in self.phase_durations() {
            output.push_str(&format!(
                "  {:<10} {:>8.2}s\n",
                format!("{:?}", state),
                duration.as_secs_f64()
            ));
        }

        match self.outcome() {
            Some(state) => output.push_str(&format!("  -> {:?}", state)),
            None => output.push_str("  -> (in progress)"),
        }

        output
    }
}

impl Default for JobTimeline {
    fn default() -> Self {
        Self::new()
    }
}
