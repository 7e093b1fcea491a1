//! The status poll loop shared by every blocking phase of a run.

use crate::cancel::CancelToken;
use crate::error::{Error, Phase, Result};
use crate::events::RunEvent;
use crate::model::{Assessment, AssessmentStatus};

use super::Orchestrator;

impl Orchestrator {
    /// Poll `assessment_id` until it reports the phase's target status.
    ///
    /// `failed` ends the loop with the phase-labelled error. Any other
    /// status, including one out of forward order or one this crate does
    /// not recognize, is still in transit and earns one `poll_interval`
    /// delay before the next fetch. Status is never cached: every decision
    /// comes from a fresh read.
    pub(super) async fn await_phase(
        &self,
        assessment_id: &str,
        phase: Phase,
        cancel: &CancelToken,
    ) -> Result<Assessment> {
        let target = phase.target();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let record = self
                .guard(cancel, self.assessments().fetch(assessment_id))
                .await??;

            match AssessmentStatus::parse(&record.status) {
                Some(status) => {
                    tracing::debug!(
                        instance_id = %self.instance_id,
                        assessment_id,
                        %phase,
                        %status,
                        attempt,
                        "polled assessment"
                    );
                    self.emit(RunEvent::StatusObserved {
                        assessment_id: assessment_id.to_string(),
                        phase,
                        status,
                        attempt,
                    });

                    if status == target {
                        return record.narrow();
                    }
                    if status == AssessmentStatus::Failed {
                        tracing::warn!(instance_id = %self.instance_id, assessment_id, %phase, "assessment failed");
                        return Err(Error::PhaseFailed {
                            phase,
                            assessment_id: assessment_id.to_string(),
                        });
                    }
                }
                None => tracing::warn!(
                    instance_id = %self.instance_id,
                    assessment_id,
                    %phase,
                    status = %record.status,
                    attempt,
                    "unrecognized assessment status, still waiting"
                ),
            }

            if let Some(max) = self.config.max_polls
                && attempt >= max
            {
                return Err(Error::PollLimitReached {
                    assessment_id: assessment_id.to_string(),
                    target,
                    attempts: attempt,
                });
            }

            self.guard(cancel, self.delay.wait(self.config.poll_interval))
                .await?;
        }
    }
}
