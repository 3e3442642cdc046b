//! Finite state machine of a single build or deploy job

use serde::{Deserialize, Serialize};

/// How a job that ran ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Request accepted from the channel, not yet checked
    Received,

    /// Request passed validation
    Validated,

    /// Refused during validation; nothing was touched
    Rejected,

    /// Remote work running
    InProgress,

    /// Terminal status written
    Terminated(Outcome),
}

/// Job event
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Validation passed
    Accept,

    /// Validation failed
    Reject(String),

    /// Audit entry scheduled and in-progress status written
    Start,

    /// Every target succeeded
    Succeed,

    /// A target failed or the job raised an error
    Fail(String),
}

/// Job FSM
#[derive(Debug, Clone)]
pub struct JobFsm {
    state: JobState,
    error: Option<String>,
}

impl JobFsm {
    /// Create a new FSM in received state
    pub fn new() -> Self {
        Self {
            state: JobState::Received,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the job has run and written its terminal status
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, JobState::Terminated(_))
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Received
            (JobState::Received, JobEvent::Accept) => JobState::Validated,
            (JobState::Received, JobEvent::Reject(err)) => {
                self.error = Some(err.clone());
                JobState::Rejected
            }

            // From Validated
            (JobState::Validated, JobEvent::Start) => JobState::InProgress,

            // From InProgress
            (JobState::InProgress, JobEvent::Succeed) => JobState::Terminated(Outcome::Success),
            (JobState::InProgress, JobEvent::Fail(err)) => {
                self.error = Some(err.clone());
                JobState::Terminated(Outcome::Failure)
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for JobFsm {
    fn default() -> Self {
        Self::new()
    }
}
