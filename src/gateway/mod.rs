pub mod http;
pub mod mock;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::model::{
    Artifact, ArtifactUpload, AssessmentRecord, CreateAssessment, Device, DeviceInput, InputAck,
    ReportFormat,
};

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// The remote service, seen through the calls the orchestrator needs.
///
/// Every call either succeeds or reports one normalized [`GatewayError`].
/// Implementations never retry.
#[async_trait]
pub trait Gateway: Send + Sync {
    // Device lifecycle.
    async fn get_device(&self, instance_id: &str) -> GatewayResult<Device>;
    async fn submit_input(&self, instance_id: &str, input: &DeviceInput)
    -> GatewayResult<InputAck>;

    // Application launch.
    async fn run_app(&self, instance_id: &str, bundle_id: &str) -> GatewayResult<()>;

    // Artifact upload.
    async fn create_artifact(&self, upload: &ArtifactUpload) -> GatewayResult<Artifact>;

    // Assessments.
    async fn create_assessment(
        &self,
        instance_id: &str,
        body: &CreateAssessment,
    ) -> GatewayResult<AssessmentRecord>;
    async fn get_assessment(
        &self,
        instance_id: &str,
        assessment_id: &str,
    ) -> GatewayResult<AssessmentRecord>;
    async fn list_assessments(&self, instance_id: &str) -> GatewayResult<Vec<AssessmentRecord>>;
    async fn delete_assessment(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()>;

    /// The report payload as the remote sends it. For `json` this is still
    /// JSON text; decoding happens in the orchestrator.
    async fn download_report(
        &self,
        instance_id: &str,
        assessment_id: &str,
        format: ReportFormat,
    ) -> GatewayResult<String>;

    // Phase transitions.
    async fn start_monitoring(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()>;
    async fn stop_monitoring(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()>;
    async fn run_checks(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()>;
}
