//! Opik-compatible REST sink.
//!
//! Endpoints (relative to `base_url`):
//! - POST  /v1/private/traces                  — open a trace
//! - PATCH /v1/private/traces/{id}             — close a trace
//! - POST  /v1/private/spans                   — record a span
//! - PUT   /v1/private/traces/feedback-scores  — attach feedback scores

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use uuid::Uuid;

use super::{TelemetryError, TelemetrySink};
use crate::config::{TelemetryConfig, TelemetryCredentials};
use crate::models::{FeedbackScore, Span, Trace, TraceEnd};

#[derive(Debug, Clone)]
pub struct OpikClient {
    client: Client,
    base_url: String,
    api_key: String,
    workspace: String,
    project_name: String,
}

impl OpikClient {
    pub fn new(
        credentials: &TelemetryCredentials,
        config: &TelemetryConfig,
    ) -> Result<Self, TelemetryError> {
        Self::with_base_url(credentials, config.base_url.clone())
    }

    /// Create a client against a custom base URL (for testing / self-hosted Opik).
    pub fn with_base_url(
        credentials: &TelemetryCredentials,
        base_url: String,
    ) -> Result<Self, TelemetryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            workspace: credentials.workspace.clone(),
            project_name: credentials.project_name.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("authorization", &self.api_key)
            .header("Comet-Workspace", &self.workspace)
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), TelemetryError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(TelemetryError::Api {
            code: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TelemetrySink for OpikClient {
    async fn create_trace(&self, trace: &Trace) -> Result<(), TelemetryError> {
        let body = json!({
            "id": trace.id,
            "project_name": self.project_name,
            "name": trace.name,
            "start_time": trace.start_time,
            "input": trace.input,
            "metadata": trace.metadata,
        });
        let url = format!("{}/v1/private/traces", self.base_url);
        self.send(self.client.post(url).json(&body)).await
    }

    async fn end_trace(&self, trace_id: Uuid, end: &TraceEnd) -> Result<(), TelemetryError> {
        let mut body = json!({
            "project_name": self.project_name,
            "end_time": end.end_time,
            "output": end.output,
        });
        if let Some(usage) = &end.usage {
            body["metadata"] = json!({ "usage": usage });
        }
        let url = format!("{}/v1/private/traces/{}", self.base_url, trace_id);
        self.send(self.client.patch(url).json(&body)).await
    }

    async fn create_span(&self, span: &Span) -> Result<(), TelemetryError> {
        let mut body = json!({
            "id": span.id,
            "trace_id": span.trace_id,
            "project_name": self.project_name,
            "name": span.name,
            "type": span.span_type,
            "start_time": span.start_time,
            "end_time": span.end_time,
            "input": span.input,
            "output": span.output,
            "metadata": span.metadata,
        });
        if let Some(usage) = &span.usage {
            body["usage"] = json!(usage);
        }
        let url = format!("{}/v1/private/spans", self.base_url);
        self.send(self.client.post(url).json(&body)).await
    }

    async fn add_feedback_score(&self, score: &FeedbackScore) -> Result<(), TelemetryError> {
        let mut entry = json!({
            "id": score.trace_id,
            "project_name": self.project_name,
            "name": score.name,
            "value": score.value,
            "reason": score.reason,
            "source": "sdk",
        });
        if let Some(category) = &score.category_name {
            entry["category_name"] = json!(category);
        }
        let url = format!("{}/v1/private/traces/feedback-scores", self.base_url);
        self.send(self.client.put(url).json(&json!({ "scores": [entry] })))
            .await
    }

    fn name(&self) -> &str {
        "opik"
    }
}
