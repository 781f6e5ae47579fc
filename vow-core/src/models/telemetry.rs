use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Top-level record of one chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: Uuid,
    pub name: String,
    pub input: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Fields sent when a trace is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEnd {
    pub output: serde_json::Value,
    pub usage: Option<TokenUsage>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanType {
    General,
    Llm,
}

/// One external call made inside a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub span_type: SpanType,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackScore {
    pub trace_id: Uuid,
    pub name: String,
    pub value: f64,
    pub reason: String,
    pub category_name: Option<String>,
}

impl FeedbackScore {
    /// Values outside `[0, 1]` are clamped.
    pub fn new(
        trace_id: Uuid,
        name: impl Into<String>,
        value: f64,
        reason: impl Into<String>,
        category_name: Option<&str>,
    ) -> Self {
        Self {
            trace_id,
            name: name.into(),
            value: value.clamp(0.0, 1.0),
            reason: reason.into(),
            category_name: category_name.map(str::to_string),
        }
    }
}
