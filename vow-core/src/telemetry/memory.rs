//! In-process telemetry sink for local development and tests.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{TelemetryError, TelemetryEvent, TelemetrySink};
use crate::models::{FeedbackScore, Span, Trace, TraceEnd};

#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every submission.
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn push(&self, event: TelemetryEvent) -> Result<(), TelemetryError> {
        if self.fail {
            return Err(TelemetryError::Unavailable("memory sink set to fail".to_string()));
        }
        self.events
            .lock()
            .map_err(|_| TelemetryError::Unavailable("memory sink poisoned".to_string()))?
            .push(event);
        Ok(())
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn traces(&self) -> Vec<Trace> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::TraceStarted(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn trace_ends(&self) -> Vec<(Uuid, TraceEnd)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::TraceEnded { trace_id, end } => Some((trace_id, end)),
                _ => None,
            })
            .collect()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::SpanRecorded(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn scores(&self) -> Vec<FeedbackScore> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::ScoreAdded(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn scores_for(&self, trace_id: Uuid) -> Vec<FeedbackScore> {
        self.scores()
            .into_iter()
            .filter(|s| s.trace_id == trace_id)
            .collect()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn create_trace(&self, trace: &Trace) -> Result<(), TelemetryError> {
        self.push(TelemetryEvent::TraceStarted(trace.clone()))
    }

    async fn end_trace(&self, trace_id: Uuid, end: &TraceEnd) -> Result<(), TelemetryError> {
        self.push(TelemetryEvent::TraceEnded {
            trace_id,
            end: end.clone(),
        })
    }

    async fn create_span(&self, span: &Span) -> Result<(), TelemetryError> {
        self.push(TelemetryEvent::SpanRecorded(span.clone()))
    }

    async fn add_feedback_score(&self, score: &FeedbackScore) -> Result<(), TelemetryError> {
        self.push(TelemetryEvent::ScoreAdded(score.clone()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
