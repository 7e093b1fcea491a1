use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{GatewayError, Step};
use crate::model::{
    Artifact, ArtifactUpload, AssessmentRecord, CreateAssessment, Device, DeviceInput, InputAck,
    ReportFormat,
};

use super::{Gateway, GatewayResult};

/// One call received by a [`MockGateway`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetDevice {
        instance_id: String,
    },
    SubmitInput {
        instance_id: String,
        input: DeviceInput,
    },
    RunApp {
        instance_id: String,
        bundle_id: String,
    },
    CreateArtifact(ArtifactUpload),
    CreateAssessment {
        instance_id: String,
        body: CreateAssessment,
    },
    GetAssessment {
        instance_id: String,
        assessment_id: String,
    },
    ListAssessments {
        instance_id: String,
    },
    DeleteAssessment {
        instance_id: String,
        assessment_id: String,
    },
    DownloadReport {
        instance_id: String,
        assessment_id: String,
        format: ReportFormat,
    },
    StartMonitoring {
        instance_id: String,
        assessment_id: String,
    },
    StopMonitoring {
        instance_id: String,
        assessment_id: String,
    },
    RunChecks {
        instance_id: String,
        assessment_id: String,
    },
}

impl Call {
    pub fn step(&self) -> Step {
        match self {
            Self::GetDevice { .. } => Step::GetDevice,
            Self::SubmitInput { .. } => Step::SubmitInput,
            Self::RunApp { .. } => Step::LaunchApp,
            Self::CreateArtifact(_) => Step::UploadWordlist,
            Self::CreateAssessment { .. } => Step::CreateAssessment,
            Self::GetAssessment { .. } => Step::GetAssessment,
            Self::ListAssessments { .. } => Step::ListAssessments,
            Self::DeleteAssessment { .. } => Step::DeleteAssessment,
            Self::DownloadReport { .. } => Step::DownloadReport,
            Self::StartMonitoring { .. } => Step::StartMonitoring,
            Self::StopMonitoring { .. } => Step::StopMonitoring,
            Self::RunChecks { .. } => Step::RunChecks,
        }
    }

    /// Whether the call changes remote state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::GetDevice { .. }
                | Self::GetAssessment { .. }
                | Self::ListAssessments { .. }
                | Self::DownloadReport { .. }
        )
    }

    /// The assessment a call targets, if any.
    pub fn assessment_id(&self) -> Option<&str> {
        match self {
            Self::GetAssessment { assessment_id, .. }
            | Self::DeleteAssessment { assessment_id, .. }
            | Self::DownloadReport { assessment_id, .. }
            | Self::StartMonitoring { assessment_id, .. }
            | Self::StopMonitoring { assessment_id, .. }
            | Self::RunChecks { assessment_id, .. } => Some(assessment_id),
            _ => None,
        }
    }
}

/// A scripted gateway for tests. Serves a fixed device, hands out
/// assessment statuses from a queue, and records every call in order.
///
/// Running out of scripted statuses is an error, so a test that polls
/// more than expected fails instead of hanging.
pub struct MockGateway {
    device: Device,
    assessment_id: Option<String>,
    artifact_id: Option<String>,
    eta: Option<u64>,
    report: String,
    listing: Vec<AssessmentRecord>,
    failures: HashMap<Step, GatewayError>,
    statuses: Mutex<VecDeque<String>>,
    created: Mutex<Option<CreateAssessment>>,
    calls: Mutex<Vec<Call>>,
}

impl MockGateway {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            assessment_id: Some("A1".to_string()),
            artifact_id: Some("W1".to_string()),
            eta: None,
            report: String::new(),
            listing: Vec::new(),
            failures: HashMap::new(),
            statuses: Mutex::new(VecDeque::new()),
            created: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Statuses returned by successive `get_assessment` calls.
    pub fn with_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.statuses.lock().unwrap_or_else(PoisonError::into_inner) =
            statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Id handed out by `create_assessment`. `None` simulates a remote
    /// that forgets to assign one.
    pub fn with_assessment_id(mut self, id: Option<&str>) -> Self {
        self.assessment_id = id.map(str::to_string);
        self
    }

    pub fn with_artifact_id(mut self, id: Option<&str>) -> Self {
        self.artifact_id = id.map(str::to_string);
        self
    }

    /// ETA (milliseconds) reported for submitted input.
    pub fn with_eta(mut self, eta: Option<u64>) -> Self {
        self.eta = eta;
        self
    }

    /// Payload returned by `download_report`, for any format.
    pub fn with_report(mut self, report: impl Into<String>) -> Self {
        self.report = report.into();
        self
    }

    pub fn with_listing(mut self, listing: Vec<AssessmentRecord>) -> Self {
        self.listing = listing;
        self
    }

    /// Make every call of the given kind fail with `error`.
    pub fn failing(mut self, step: Step, error: GatewayError) -> Self {
        self.failures.insert(step, error);
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many calls of the given kind were received.
    pub fn count(&self, step: Step) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.step() == step)
            .count()
    }

    fn record(&self, call: Call) -> GatewayResult<()> {
        let step = call.step();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        match self.failures.get(&step) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn get_device(&self, instance_id: &str) -> GatewayResult<Device> {
        self.record(Call::GetDevice {
            instance_id: instance_id.to_string(),
        })?;
        Ok(self.device.clone())
    }

    async fn submit_input(
        &self,
        instance_id: &str,
        input: &DeviceInput,
    ) -> GatewayResult<InputAck> {
        self.record(Call::SubmitInput {
            instance_id: instance_id.to_string(),
            input: input.clone(),
        })?;
        Ok(InputAck { eta: self.eta })
    }

    async fn run_app(&self, instance_id: &str, bundle_id: &str) -> GatewayResult<()> {
        self.record(Call::RunApp {
            instance_id: instance_id.to_string(),
            bundle_id: bundle_id.to_string(),
        })
    }

    async fn create_artifact(&self, upload: &ArtifactUpload) -> GatewayResult<Artifact> {
        self.record(Call::CreateArtifact(upload.clone()))?;
        Ok(Artifact {
            id: self.artifact_id.clone(),
        })
    }

    async fn create_assessment(
        &self,
        instance_id: &str,
        body: &CreateAssessment,
    ) -> GatewayResult<AssessmentRecord> {
        self.record(Call::CreateAssessment {
            instance_id: instance_id.to_string(),
            body: body.clone(),
        })?;
        *self.created.lock().unwrap_or_else(PoisonError::into_inner) = Some(body.clone());
        Ok(AssessmentRecord {
            id: self.assessment_id.clone(),
            bundle_id: Some(body.bundle_id.clone()),
            wordlist_id: body.wordlist_id.clone(),
            instance_id: Some(body.instance_id.clone()),
            ..AssessmentRecord::default()
        })
    }

    async fn get_assessment(
        &self,
        instance_id: &str,
        assessment_id: &str,
    ) -> GatewayResult<AssessmentRecord> {
        self.record(Call::GetAssessment {
            instance_id: instance_id.to_string(),
            assessment_id: assessment_id.to_string(),
        })?;

        let status = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| {
                GatewayError::new(format!(
                    "MockGateway: no more scripted statuses (polled {} times)",
                    self.count(Step::GetAssessment)
                ))
            })?;

        let mut record = AssessmentRecord::new(assessment_id, status);
        record.instance_id = Some(instance_id.to_string());
        if let Some(body) = self
            .created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            record.bundle_id = Some(body.bundle_id.clone());
            record.wordlist_id = body.wordlist_id.clone();
        }
        Ok(record)
    }

    async fn list_assessments(&self, instance_id: &str) -> GatewayResult<Vec<AssessmentRecord>> {
        self.record(Call::ListAssessments {
            instance_id: instance_id.to_string(),
        })?;
        Ok(self.listing.clone())
    }

    async fn delete_assessment(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        self.record(Call::DeleteAssessment {
            instance_id: instance_id.to_string(),
            assessment_id: assessment_id.to_string(),
        })
    }

    async fn download_report(
        &self,
        instance_id: &str,
        assessment_id: &str,
        format: ReportFormat,
    ) -> GatewayResult<String> {
        self.record(Call::DownloadReport {
            instance_id: instance_id.to_string(),
            assessment_id: assessment_id.to_string(),
            format,
        })?;
        Ok(self.report.clone())
    }

    async fn start_monitoring(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        self.record(Call::StartMonitoring {
            instance_id: instance_id.to_string(),
            assessment_id: assessment_id.to_string(),
        })
    }

    async fn stop_monitoring(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        self.record(Call::StopMonitoring {
            instance_id: instance_id.to_string(),
            assessment_id: assessment_id.to_string(),
        })
    }

    async fn run_checks(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        self.record(Call::RunChecks {
            instance_id: instance_id.to_string(),
            assessment_id: assessment_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceState;

    fn device() -> Device {
        Device::new("d1", "p1", DeviceState::On)
    }

    #[tokio::test]
    async fn statuses_are_served_in_order_then_exhausted() {
        let gw = MockGateway::new(device()).with_statuses(["new", "monitoring"]);

        assert_eq!(gw.get_assessment("d1", "A1").await.unwrap().status, "new");
        assert_eq!(
            gw.get_assessment("d1", "A1").await.unwrap().status,
            "monitoring"
        );
        let err = gw.get_assessment("d1", "A1").await.unwrap_err();
        assert!(err.message.contains("no more scripted statuses"));
        assert_eq!(gw.count(Step::GetAssessment), 3);
    }

    #[tokio::test]
    async fn injected_failure_is_recorded_and_returned() {
        let gw = MockGateway::new(device()).failing(Step::LaunchApp, GatewayError::new("boom"));

        let err = gw.run_app("d1", "com.corellium.cafe").await.unwrap_err();
        assert_eq!(err.message, "boom");
        assert_eq!(
            gw.calls(),
            vec![Call::RunApp {
                instance_id: "d1".to_string(),
                bundle_id: "com.corellium.cafe".to_string(),
            }]
        );
    }

    #[test]
    fn reads_are_not_mutating() {
        let read = Call::GetAssessment {
            instance_id: "d1".to_string(),
            assessment_id: "A1".to_string(),
        };
        let write = Call::StartMonitoring {
            instance_id: "d1".to_string(),
            assessment_id: "A1".to_string(),
        };
        assert!(!read.is_mutating());
        assert!(write.is_mutating());
        assert_eq!(write.assessment_id(), Some("A1"));
    }
}
