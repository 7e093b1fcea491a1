use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::Settings;
use crate::error::GatewayError;
use crate::model::{
    Artifact, ArtifactUpload, AssessmentRecord, CreateAssessment, Device, DeviceInput, InputAck,
    ReportFormat,
};

use super::{Gateway, GatewayResult};

/// Gateway backed by the Corellium REST API.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpGateway {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: endpoint.into(),
            access_token: access_token.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.endpoint, &settings.access_token)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn assessment_url(&self, instance_id: &str, assessment_id: &str, suffix: &str) -> String {
        self.url(&format!(
            "/v1/services/matrix/{instance_id}/assessments/{assessment_id}{suffix}"
        ))
    }

    async fn send(&self, req: RequestBuilder) -> GatewayResult<Response> {
        let resp = req
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport_error)?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(normalize_error(status, &body))
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> GatewayResult<T> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| GatewayError::new(format!("invalid response body: {e}")))
    }

    async fn ack(&self, req: RequestBuilder) -> GatewayResult<()> {
        self.send(req).await.map(drop)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn get_device(&self, instance_id: &str) -> GatewayResult<Device> {
        let url = self.url(&format!("/v1/instances/{instance_id}"));
        self.fetch(self.client.get(url)).await
    }

    async fn submit_input(
        &self,
        instance_id: &str,
        input: &DeviceInput,
    ) -> GatewayResult<InputAck> {
        let url = self.url(&format!("/v1/instances/{instance_id}/input"));
        let resp = self.send(self.client.post(url).json(input)).await?;
        let body = resp.text().await.map_err(transport_error)?;
        parse_optional(&body)
    }

    async fn run_app(&self, instance_id: &str, bundle_id: &str) -> GatewayResult<()> {
        let url = self.url(&format!(
            "/v1/instances/{instance_id}/agent/v1/app/run/{bundle_id}"
        ));
        self.ack(self.client.post(url)).await
    }

    async fn create_artifact(&self, upload: &ArtifactUpload) -> GatewayResult<Artifact> {
        let file = multipart::Part::bytes(upload.contents.clone())
            .file_name(upload.name.clone())
            .mime_str("text/plain")
            .map_err(transport_error)?;
        let form = multipart::Form::new()
            .text("type", upload.kind.clone())
            .text("encoding", upload.encoding.clone())
            .text("name", upload.name.clone())
            .text("project", upload.project.clone())
            .text("instance", upload.instance.clone())
            .part("file", file);

        self.fetch(self.client.post(self.url("/v1/images")).multipart(form))
            .await
    }

    async fn create_assessment(
        &self,
        instance_id: &str,
        body: &CreateAssessment,
    ) -> GatewayResult<AssessmentRecord> {
        let url = self.url(&format!("/v1/services/matrix/{instance_id}/assessments"));
        self.fetch(self.client.post(url).json(body)).await
    }

    async fn get_assessment(
        &self,
        instance_id: &str,
        assessment_id: &str,
    ) -> GatewayResult<AssessmentRecord> {
        let url = self.assessment_url(instance_id, assessment_id, "");
        self.fetch(self.client.get(url)).await
    }

    async fn list_assessments(&self, instance_id: &str) -> GatewayResult<Vec<AssessmentRecord>> {
        let url = self.url(&format!(
            "/v1/services/matrix/{instance_id}/instances/{instance_id}/assessments"
        ));
        self.fetch(self.client.get(url)).await
    }

    async fn delete_assessment(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        let url = self.assessment_url(instance_id, assessment_id, "");
        self.ack(self.client.delete(url)).await
    }

    async fn download_report(
        &self,
        instance_id: &str,
        assessment_id: &str,
        format: ReportFormat,
    ) -> GatewayResult<String> {
        let suffix = format!("/download?format={format}");
        let url = self.assessment_url(instance_id, assessment_id, &suffix);
        let body = self
            .send(self.client.get(url))
            .await?
            .text()
            .await
            .map_err(transport_error)?;
        Ok(unwrap_string_payload(body))
    }

    async fn start_monitoring(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        let url = self.assessment_url(instance_id, assessment_id, "/start");
        self.ack(self.client.post(url)).await
    }

    async fn stop_monitoring(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        let url = self.assessment_url(instance_id, assessment_id, "/stop");
        self.ack(self.client.post(url)).await
    }

    async fn run_checks(&self, instance_id: &str, assessment_id: &str) -> GatewayResult<()> {
        let url = self.assessment_url(instance_id, assessment_id, "/test");
        self.ack(self.client.post(url)).await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Reduce a failed response to one message: the body's `error` field,
/// else the status text, else the bare status code.
fn normalize_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.is_empty())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| status.as_str().to_string());

    GatewayError::with_status(message, status.as_u16())
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError {
        message: err.to_string(),
        status: err.status().map(|s| s.as_u16()),
    }
}

/// The download endpoint wraps its payload in a JSON string literal.
/// Unwrap it; anything that is not a JSON string passes through as-is.
fn unwrap_string_payload(body: String) -> String {
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(serde_json::Value::String(inner)) => inner,
        _ => body,
    }
}

/// Parse a body that may legitimately be empty.
fn parse_optional<T: DeserializeOwned + Default>(body: &str) -> GatewayResult<T> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| GatewayError::new(format!("invalid response body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let gw = HttpGateway::new("https://app.corellium.com/", "token");
        assert_eq!(
            gw.url("/v1/instances/d1"),
            "https://app.corellium.com/v1/instances/d1"
        );

        let gw = HttpGateway::new("http://localhost:8080", "token");
        assert_eq!(gw.url("v1/images"), "http://localhost:8080/v1/images");
    }

    #[test]
    fn assessment_url_appends_suffix() {
        let gw = HttpGateway::new("https://app.corellium.com/", "token");
        assert_eq!(
            gw.assessment_url("d1", "A1", "/start"),
            "https://app.corellium.com/v1/services/matrix/d1/assessments/A1/start"
        );
    }

    #[test]
    fn normalize_prefers_error_field() {
        let err = normalize_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": "Instance is not running"}"#,
        );
        assert_eq!(err.message, "Instance is not running");
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn normalize_falls_back_to_status_text() {
        let err = normalize_error(StatusCode::NOT_FOUND, "<html>nope</html>");
        assert_eq!(err.message, "Not Found");
        assert_eq!(err.status, Some(404));
    }

    #[test]
    fn normalize_ignores_empty_error_field() {
        let err = normalize_error(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error": ""}"#);
        assert_eq!(err.message, "Internal Server Error");
    }

    #[test]
    fn normalize_uses_code_when_reason_unknown() {
        let status = StatusCode::from_u16(599).unwrap();
        let err = normalize_error(status, "");
        assert_eq!(err.message, "599");
    }

    #[test]
    fn unwrap_string_payload_decodes_json_string() {
        let body = r#""{\"id\":\"A1\",\"status\":\"complete\"}""#.to_string();
        assert_eq!(
            unwrap_string_payload(body),
            r#"{"id":"A1","status":"complete"}"#
        );
    }

    #[test]
    fn unwrap_string_payload_passes_raw_text_through() {
        let html = "<html><body>report</body></html>".to_string();
        assert_eq!(unwrap_string_payload(html.clone()), html);

        let object = r#"{"id":"A1"}"#.to_string();
        assert_eq!(unwrap_string_payload(object.clone()), object);
    }

    #[test]
    fn parse_optional_handles_empty_and_eta() {
        let ack: InputAck = parse_optional("").unwrap();
        assert_eq!(ack.eta, None);

        let ack: InputAck = parse_optional(r#"{"eta": 3000}"#).unwrap();
        assert_eq!(ack.eta, Some(3000));

        assert!(parse_optional::<InputAck>("not json").is_err());
    }
}
