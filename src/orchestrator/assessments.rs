//! Operations on assessments that already exist, outside the run loop.

use crate::error::{Error, Result, Step};
use crate::model::{Assessment, AssessmentRecord, Report, ReportFormat};

use super::Orchestrator;

/// Assessment operations scoped to the orchestrator's device.
pub struct Assessments<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> Assessments<'a> {
    pub(super) fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Fetch one assessment. The status is narrowed to the nine known
    /// values; anything else is an [`Error::UnknownStatus`].
    pub async fn get(&self, assessment_id: &str) -> Result<Assessment> {
        self.fetch(assessment_id).await?.narrow()
    }

    /// Fetch the record as the remote declares it, status unchecked. A
    /// missing id falls back to the requested one.
    pub(super) async fn fetch(&self, assessment_id: &str) -> Result<AssessmentRecord> {
        let o = self.orchestrator;
        let mut record = o
            .gateway
            .get_assessment(&o.instance_id, assessment_id)
            .await
            .map_err(Error::gateway(Step::GetAssessment))?;
        record.id.get_or_insert_with(|| assessment_id.to_string());
        Ok(record)
    }

    /// All assessments of the device.
    pub async fn list(&self) -> Result<Vec<Assessment>> {
        let o = self.orchestrator;
        o.gateway
            .list_assessments(&o.instance_id)
            .await
            .map_err(Error::gateway(Step::ListAssessments))?
            .into_iter()
            .map(|record| record.narrow())
            .collect()
    }

    pub async fn delete(&self, assessment_id: &str) -> Result<()> {
        let o = self.orchestrator;
        tracing::info!(instance_id = %o.instance_id, assessment_id, "deleting assessment");
        o.gateway
            .delete_assessment(&o.instance_id, assessment_id)
            .await
            .map_err(Error::gateway(Step::DeleteAssessment))
    }

    /// Download the rendered report.
    pub async fn download(&self, assessment_id: &str, format: ReportFormat) -> Result<Report> {
        let o = self.orchestrator;
        let payload = o
            .gateway
            .download_report(&o.instance_id, assessment_id, format)
            .await
            .map_err(Error::gateway(Step::DownloadReport))?;
        decode_report(format, payload)
    }
}

/// HTML reports are returned verbatim. JSON reports arrive as text and
/// are decoded here.
pub fn decode_report(format: ReportFormat, payload: String) -> Result<Report> {
    match format {
        ReportFormat::Html => Ok(Report::Html(payload)),
        ReportFormat::Json => Ok(Report::Json(serde_json::from_str(&payload)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_untouched() {
        let payload = "  <html>\n<p>{\"not\": \"json\"}</p></html>\n".to_string();
        assert_eq!(
            decode_report(ReportFormat::Html, payload.clone()).unwrap(),
            Report::Html(payload)
        );
    }

    #[test]
    fn json_is_decoded() {
        let report = decode_report(
            ReportFormat::Json,
            r#"{"id": "A1", "results": [{"check": "tls", "passed": true}]}"#.to_string(),
        )
        .unwrap();
        match report {
            Report::Json(value) => {
                assert_eq!(value["id"], "A1");
                assert_eq!(value["results"][0]["passed"], true);
            }
            Report::Html(_) => panic!("expected Json"),
        }
    }

    #[test]
    fn broken_json_is_an_error() {
        let err = decode_report(ReportFormat::Json, "{oops".to_string()).unwrap_err();
        assert!(matches!(err, Error::InvalidReport(_)));
    }
}
