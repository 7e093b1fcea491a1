pub mod assessments;
mod poll;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::consts::DEFAULT_POLL_INTERVAL;
use crate::delay::{Delay, TokioDelay};
use crate::error::{Error, Phase, Result, Step};
use crate::events::{EventBus, RunEvent};
use crate::gateway::Gateway;
use crate::model::{Assessment, ArtifactUpload, CreateAssessment, DeviceState, RunParams};

pub use assessments::Assessments;

/// Pacing of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Fixed delay between polls. No backoff.
    pub poll_interval: Duration,
    /// Give up a phase after this many polls. `None` polls until the
    /// remote reports the target or `failed`.
    pub max_polls: Option<usize>,
    /// Upper bound on a whole run.
    pub run_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
            run_timeout: None,
        }
    }
}

/// Drives MATRIX assessments on one device to completion.
///
/// Holds no state between runs; concurrent runs against different
/// devices each get their own orchestrator.
pub struct Orchestrator {
    gateway: Arc<dyn Gateway>,
    delay: Arc<dyn Delay>,
    events: Option<Arc<EventBus>>,
    instance_id: String,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        instance_id: impl Into<String>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            delay: Arc::new(TokioDelay),
            events: None,
            instance_id: instance_id.into(),
            config,
        }
    }

    /// Replace the wall-clock delay, e.g. with a recording one in tests.
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    /// Publish progress on the given bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Operations on existing assessments of this device.
    pub fn assessments(&self) -> Assessments<'_> {
        Assessments::new(self)
    }

    /// Run an assessment to completion and return the final record.
    pub async fn run(&self, params: RunParams) -> Result<Assessment> {
        self.run_with_cancel(params, CancelToken::never()).await
    }

    /// Like [`run`](Self::run), abandoning the run as soon as `cancel`
    /// fires. Nothing already done remotely is rolled back.
    pub async fn run_with_cancel(
        &self,
        params: RunParams,
        cancel: CancelToken,
    ) -> Result<Assessment> {
        match self.config.run_timeout {
            Some(limit) => tokio::time::timeout(limit, self.drive(params, &cancel))
                .await
                .map_err(|_| Error::TimedOut(limit))?,
            None => self.drive(params, &cancel).await,
        }
    }

    async fn drive(&self, params: RunParams, cancel: &CancelToken) -> Result<Assessment> {
        let instance_id = self.instance_id.as_str();
        let gw = &self.gateway;

        let device = self
            .guard(cancel, gw.get_device(instance_id))
            .await?
            .map_err(Error::gateway(Step::GetDevice))?;

        if device.state != DeviceState::On {
            return Err(Error::DeviceNotReady {
                instance_id: instance_id.to_string(),
                state: device.state,
            });
        }

        tracing::info!(instance_id, bundle_id = %params.bundle_id, "launching app");
        self.guard(cancel, gw.run_app(instance_id, &params.bundle_id))
            .await?
            .map_err(Error::gateway(Step::LaunchApp))?;
        self.emit(RunEvent::AppLaunched {
            bundle_id: params.bundle_id.clone(),
        });

        let mut wordlist_id = None;
        if let Some(keywords) = &params.keywords {
            let upload = ArtifactUpload::wordlist(&device, keywords);
            let artifact = self
                .guard(cancel, gw.create_artifact(&upload))
                .await?
                .map_err(Error::gateway(Step::UploadWordlist))?;
            tracing::info!(instance_id, keywords = keywords.len(), artifact_id = ?artifact.id, "uploaded wordlist");
            self.emit(RunEvent::WordlistUploaded {
                artifact_id: artifact.id.clone(),
            });
            wordlist_id = artifact.id;
        }

        let body = CreateAssessment {
            bundle_id: params.bundle_id.clone(),
            wordlist_id,
            instance_id: instance_id.to_string(),
        };
        let created = self
            .guard(cancel, gw.create_assessment(instance_id, &body))
            .await?
            .map_err(Error::gateway(Step::CreateAssessment))?;
        let assessment_id = created.id.ok_or(Error::MissingAssessmentId)?;
        tracing::info!(instance_id, assessment_id = %assessment_id, "assessment created");
        self.emit(RunEvent::AssessmentCreated {
            assessment_id: assessment_id.clone(),
        });

        self.await_phase(&assessment_id, Phase::Create, cancel).await?;

        self.transition(&assessment_id, Phase::StartMonitoring, cancel)
            .await?;
        self.await_phase(&assessment_id, Phase::StartMonitoring, cancel)
            .await?;

        if let Some(input) = &params.input {
            let ack = self
                .guard(cancel, gw.submit_input(instance_id, input))
                .await?
                .map_err(Error::gateway(Step::SubmitInput))?;
            let eta = ack.eta();
            self.emit(RunEvent::InputSubmitted { eta });
            // The remote exposes no status for input playback, so wait out its ETA.
            if let Some(eta) = eta {
                tracing::debug!(instance_id, assessment_id = %assessment_id, ?eta, "waiting for input to finish");
                self.guard(cancel, self.delay.wait(eta)).await?;
            }
        }

        self.transition(&assessment_id, Phase::StopMonitoring, cancel)
            .await?;
        self.await_phase(&assessment_id, Phase::StopMonitoring, cancel)
            .await?;

        self.transition(&assessment_id, Phase::RunChecks, cancel)
            .await?;
        let done = self
            .await_phase(&assessment_id, Phase::RunChecks, cancel)
            .await?;

        tracing::info!(instance_id, assessment_id = %assessment_id, "assessment complete");
        self.emit(RunEvent::Completed {
            assessment_id: assessment_id.clone(),
        });
        Ok(done)
    }

    /// Issue the transition call that opens `phase`.
    async fn transition(&self, assessment_id: &str, phase: Phase, cancel: &CancelToken) -> Result<()> {
        let instance_id = self.instance_id.as_str();
        let gw = &self.gateway;

        let (step, call) = match phase {
            Phase::Create => return Ok(()),
            Phase::StartMonitoring => (
                Step::StartMonitoring,
                gw.start_monitoring(instance_id, assessment_id),
            ),
            Phase::StopMonitoring => (
                Step::StopMonitoring,
                gw.stop_monitoring(instance_id, assessment_id),
            ),
            Phase::RunChecks => (Step::RunChecks, gw.run_checks(instance_id, assessment_id)),
        };

        tracing::info!(instance_id, assessment_id, %phase, "requesting transition");
        self.guard(cancel, call)
            .await?
            .map_err(Error::gateway(step))?;

        self.emit(RunEvent::TransitionRequested {
            assessment_id: assessment_id.to_string(),
            step,
        });
        Ok(())
    }

    /// Race a suspend point against cancellation.
    async fn guard<T>(&self, cancel: &CancelToken, fut: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(instance_id = %self.instance_id, "run cancelled");
                Err(Error::Cancelled)
            }
            value = fut => Ok(value),
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}
