//! Domain types shared by the gateway and the orchestrator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consts::{WORDLIST_ENCODING, WORDLIST_FILE_NAME, WORDLIST_IMAGE_TYPE};
use crate::error::{Error, Result};

/// Status of an assessment, as reported by the remote service.
///
/// The remote owns this state machine. Forward order is
/// `new → startingMonitoring → monitoring → stoppingMonitoring →
/// readyForTesting → testing → generatingReport → complete`, and `failed`
/// is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssessmentStatus {
    New,
    StartingMonitoring,
    Monitoring,
    StoppingMonitoring,
    ReadyForTesting,
    Testing,
    GeneratingReport,
    Complete,
    Failed,
}

impl AssessmentStatus {
    pub const ALL: [AssessmentStatus; 9] = [
        Self::New,
        Self::StartingMonitoring,
        Self::Monitoring,
        Self::StoppingMonitoring,
        Self::ReadyForTesting,
        Self::Testing,
        Self::GeneratingReport,
        Self::Complete,
        Self::Failed,
    ];

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::StartingMonitoring => "startingMonitoring",
            Self::Monitoring => "monitoring",
            Self::StoppingMonitoring => "stoppingMonitoring",
            Self::ReadyForTesting => "readyForTesting",
            Self::Testing => "testing",
            Self::GeneratingReport => "generatingReport",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Narrow a remote status string. Anything outside the nine known
    /// values is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

impl fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An assessment whose status has been validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub status: AssessmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Remote fields this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An assessment as the remote declares it: the id may be absent and the
/// status is a free string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AssessmentRecord {
    /// A bare record with just an id and a status, as returned by most
    /// calls the orchestrator cares about.
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: status.into(),
            ..Self::default()
        }
    }

    /// Validate the record at the read boundary.
    pub fn narrow(self) -> Result<Assessment> {
        let id = self.id.ok_or(Error::MissingAssessmentId)?;
        let Some(status) = AssessmentStatus::parse(&self.status) else {
            tracing::warn!(assessment_id = %id, status = %self.status, "rejecting unrecognized assessment status");
            return Err(Error::UnknownStatus {
                assessment_id: id,
                status: self.status,
            });
        };

        Ok(Assessment {
            id,
            status,
            bundle_id: self.bundle_id,
            wordlist_id: self.wordlist_id,
            instance_id: self.instance_id,
            extra: self.extra,
        })
    }
}

/// Power state of a virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceState {
    On,
    Off,
    Creating,
    Booting,
    Rebooting,
    Paused,
    Deleting,
    Error,
    /// A state this crate does not know about.
    Other(String),
}

impl DeviceState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Creating => "creating",
            Self::Booting => "booting",
            Self::Rebooting => "rebooting",
            Self::Paused => "paused",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for DeviceState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "on" => Self::On,
            "off" => Self::Off,
            "creating" => Self::Creating,
            "booting" => Self::Booting,
            "rebooting" => Self::Rebooting,
            "paused" => Self::Paused,
            "deleting" => Self::Deleting,
            "error" => Self::Error,
            _ => Self::Other(raw),
        }
    }
}

impl From<DeviceState> for String {
    fn from(state: DeviceState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A virtual device instance. Read-only from the orchestrator's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub state: DeviceState,
    #[serde(default)]
    pub project: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    pub fn new(id: impl Into<String>, project: impl Into<String>, state: DeviceState) -> Self {
        Self {
            id: id.into(),
            state,
            project: project.into(),
            extra: Map::new(),
        }
    }
}

/// Input events to inject into the device (touches, key presses, text).
/// Passed through to the remote untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInput(pub Value);

/// Acknowledgement of submitted input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputAck {
    /// Estimated time until the input finishes playing, in milliseconds.
    #[serde(default)]
    pub eta: Option<u64>,
}

impl InputAck {
    /// The ETA as a duration. A zero ETA means there is nothing to wait for.
    pub fn eta(&self) -> Option<Duration> {
        self.eta.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Body of the create-assessment call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssessment {
    pub bundle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordlist_id: Option<String>,
    pub instance_id: String,
}

/// A file uploaded through the image/artifact service.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactUpload {
    pub kind: String,
    pub encoding: String,
    pub name: String,
    pub project: String,
    pub instance: String,
    pub contents: Vec<u8>,
}

impl ArtifactUpload {
    /// Package keywords as a plain-text wordlist scoped to the device's
    /// project and instance. Keywords are concatenated exactly as given, so
    /// callers supply their own line endings.
    pub fn wordlist(device: &Device, keywords: &[String]) -> Self {
        let contents = keywords.concat();

        Self {
            kind: WORDLIST_IMAGE_TYPE.to_string(),
            encoding: WORDLIST_ENCODING.to_string(),
            name: WORDLIST_FILE_NAME.to_string(),
            project: device.project.clone(),
            instance: device.id.clone(),
            contents: contents.into_bytes(),
        }
    }
}

/// An uploaded artifact. The remote may omit the id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub id: Option<String>,
}

/// Rendering of a downloaded report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    #[default]
    Json,
}

impl ReportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downloaded report.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Html(String),
    Json(Value),
}

/// Parameters of a single assessment run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    /// Bundle identifier of the app under test.
    pub bundle_id: String,
    /// Input injected while the app is being monitored.
    pub input: Option<DeviceInput>,
    /// Keywords seeding the wordlist artifact. `Some` always uploads,
    /// even when empty.
    pub keywords: Option<Vec<String>>,
}

impl RunParams {
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            input: None,
            keywords: None,
        }
    }

    pub fn with_input(mut self, input: DeviceInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }
}
