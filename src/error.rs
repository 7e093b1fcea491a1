//! Error types for assessment runs and gateway calls.
//!
//! Domain errors implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator where callers work in `anyhow`.

use std::fmt;
use std::time::Duration;

use crate::model::{AssessmentStatus, DeviceState};

/// A failed remote call, normalized to one message.
///
/// The message is the remote's structured `error` field when it sent one,
/// otherwise the transport's status text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    pub message: String,
    pub status: Option<u16>,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// The remote call that was in flight when a gateway error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    GetDevice,
    LaunchApp,
    UploadWordlist,
    CreateAssessment,
    GetAssessment,
    StartMonitoring,
    SubmitInput,
    StopMonitoring,
    RunChecks,
    ListAssessments,
    DeleteAssessment,
    DownloadReport,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetDevice => "get device",
            Self::LaunchApp => "launch app",
            Self::UploadWordlist => "upload wordlist",
            Self::CreateAssessment => "create assessment",
            Self::GetAssessment => "get assessment",
            Self::StartMonitoring => "start monitoring",
            Self::SubmitInput => "submit device input",
            Self::StopMonitoring => "stop monitoring",
            Self::RunChecks => "run checks",
            Self::ListAssessments => "list assessments",
            Self::DeleteAssessment => "delete assessment",
            Self::DownloadReport => "download report",
        };
        f.write_str(name)
    }
}

/// A blocking phase of a run: the orchestrator waits for the assessment
/// to reach the phase's target status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Freshly created, waiting for `new`.
    Create,
    StartMonitoring,
    StopMonitoring,
    RunChecks,
}

impl Phase {
    pub fn target(self) -> AssessmentStatus {
        match self {
            Self::Create => AssessmentStatus::New,
            Self::StartMonitoring => AssessmentStatus::Monitoring,
            Self::StopMonitoring => AssessmentStatus::ReadyForTesting,
            Self::RunChecks => AssessmentStatus::Complete,
        }
    }

    fn failure(self) -> &'static str {
        match self {
            Self::Create => "assessment failed to start",
            Self::StartMonitoring => "monitoring failed to start",
            Self::StopMonitoring => "monitoring failed to stop",
            Self::RunChecks => "checks failed to complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::StartMonitoring => "start monitoring",
            Self::StopMonitoring => "stop monitoring",
            Self::RunChecks => "run checks",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device {instance_id} must be on to run a MATRIX assessment (state: {state})")]
    DeviceNotReady {
        instance_id: String,
        state: DeviceState,
    },

    #[error("{step} failed: {source}")]
    Gateway {
        step: Step,
        #[source]
        source: GatewayError,
    },

    #[error("assessment ID not returned from API")]
    MissingAssessmentId,

    #[error("assessment {assessment_id} reported unrecognized status {status:?}")]
    UnknownStatus {
        assessment_id: String,
        status: String,
    },

    #[error("{}", .phase.failure())]
    PhaseFailed { phase: Phase, assessment_id: String },

    #[error("assessment {assessment_id} did not reach {target} after {attempts} polls")]
    PollLimitReached {
        assessment_id: String,
        target: AssessmentStatus,
        attempts: usize,
    },

    #[error("assessment run timed out after {0:?}")]
    TimedOut(Duration),

    #[error("assessment run cancelled")]
    Cancelled,

    #[error("report is not valid JSON: {0}")]
    InvalidReport(#[from] serde_json::Error),
}

impl Error {
    /// Tag a gateway failure with the call that produced it.
    pub fn gateway(step: Step) -> impl FnOnce(GatewayError) -> Self {
        move |source| Self::Gateway { step, source }
    }

    /// The phase a remote-declared failure happened in.
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            Self::PhaseFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    const RUN_ORDER: [Phase; 4] = [
        Phase::Create,
        Phase::StartMonitoring,
        Phase::StopMonitoring,
        Phase::RunChecks,
    ];

    #[test]
    fn phase_failures_are_distinguishable() {
        let messages: Vec<String> = RUN_ORDER
            .into_iter()
            .map(|phase| {
                Error::PhaseFailed {
                    phase,
                    assessment_id: "A1".to_string(),
                }
                .to_string()
            })
            .collect();

        assert_eq!(
            messages,
            vec![
                "assessment failed to start",
                "monitoring failed to start",
                "monitoring failed to stop",
                "checks failed to complete",
            ]
        );
    }

    #[test]
    fn phase_targets_follow_run_order() {
        let targets: Vec<_> = RUN_ORDER.into_iter().map(Phase::target).collect();
        assert_eq!(
            targets,
            vec![
                AssessmentStatus::New,
                AssessmentStatus::Monitoring,
                AssessmentStatus::ReadyForTesting,
                AssessmentStatus::Complete,
            ]
        );
    }

    #[test]
    fn gateway_error_carries_step_context() {
        let err = Error::gateway(Step::LaunchApp)(GatewayError::with_status("Not Found", 404));
        assert_eq!(err.to_string(), "launch app failed: Not Found");
        match err {
            Error::Gateway { step, source } => {
                assert_eq!(step, Step::LaunchApp);
                assert_eq!(source.status, Some(404));
            }
            _ => panic!("expected Gateway"),
        }
    }

    #[test]
    fn device_not_ready_names_state() {
        let err = Error::DeviceNotReady {
            instance_id: "d1".to_string(),
            state: DeviceState::Off,
        };
        assert!(err.to_string().contains("must be on"));
        assert!(err.to_string().contains("off"));
    }

    #[test]
    fn converts_into_anyhow() {
        fn run() -> anyhow::Result<()> {
            Err::<(), _>(Error::Cancelled)?;
            Ok(())
        }
        assert_eq!(run().unwrap_err().to_string(), "assessment run cancelled");
    }
}
