//! Telemetry recorder — traces, spans and feedback scores.
//!
//! Callers enqueue events without waiting; a single background worker
//! submits them to the configured [`TelemetrySink`] in submission order.
//! Delivery failures are logged and counted, never returned to the caller's
//! control flow. There is no local durability: events still queued when the
//! process dies are lost.

pub mod memory;
pub mod opik;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{FeedbackScore, Span, Trace, TraceEnd};

pub use memory::MemorySink;
pub use opik::OpikClient;

// ============================================================================
// Outcome of a best-effort call
// ============================================================================

/// Result of a best-effort external call. Callers pick the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T = ()> {
    Success(T),
    /// Nothing went wrong, but the call was skipped or only partly done.
    Degraded(String),
    Failed(String),
}

impl<T> CallOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Degraded(reason) | CallOutcome::Failed(reason) => Some(reason),
        }
    }
}

// ============================================================================
// Sink trait
// ============================================================================

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for telemetry events.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn create_trace(&self, trace: &Trace) -> Result<(), TelemetryError>;

    async fn end_trace(&self, trace_id: Uuid, end: &TraceEnd) -> Result<(), TelemetryError>;

    async fn create_span(&self, span: &Span) -> Result<(), TelemetryError>;

    async fn add_feedback_score(&self, score: &FeedbackScore) -> Result<(), TelemetryError>;

    /// Sink name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    TraceStarted(Trace),
    TraceEnded { trace_id: Uuid, end: TraceEnd },
    SpanRecorded(Span),
    ScoreAdded(FeedbackScore),
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::TraceStarted(_) => "trace_started",
            TelemetryEvent::TraceEnded { .. } => "trace_ended",
            TelemetryEvent::SpanRecorded(_) => "span_recorded",
            TelemetryEvent::ScoreAdded(_) => "score_added",
        }
    }
}

/// Submit one event directly to a sink.
pub async fn deliver(sink: &dyn TelemetrySink, event: &TelemetryEvent) -> CallOutcome {
    let result = match event {
        TelemetryEvent::TraceStarted(trace) => sink.create_trace(trace).await,
        TelemetryEvent::TraceEnded { trace_id, end } => sink.end_trace(*trace_id, end).await,
        TelemetryEvent::SpanRecorded(span) => sink.create_span(span).await,
        TelemetryEvent::ScoreAdded(score) => sink.add_feedback_score(score).await,
    };

    match result {
        Ok(()) => CallOutcome::Success(()),
        Err(e) => CallOutcome::Failed(e.to_string()),
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Default)]
pub struct TelemetryStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TelemetryStatsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl TelemetryStats {
    pub fn snapshot(&self) -> TelemetryStatsSnapshot {
        TelemetryStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Recorder
// ============================================================================

enum Command {
    Event(TelemetryEvent),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct RecorderInner {
    tx: mpsc::Sender<Command>,
    sink: Arc<dyn TelemetrySink>,
    stats: Arc<TelemetryStats>,
}

/// Cheap-to-clone handle used by the proxy, the judge and the HTTP layer.
#[derive(Clone)]
pub struct TelemetryRecorder {
    inner: Option<Arc<RecorderInner>>,
}

impl std::fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("sink", &self.sink_name())
            .finish()
    }
}

impl TelemetryRecorder {
    /// A recorder that accepts every call and records nothing.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Start the background worker. The returned handle resolves after
    /// [`TelemetryRecorder::shutdown`].
    pub fn spawn(sink: Arc<dyn TelemetrySink>, queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let stats = Arc::new(TelemetryStats::default());

        let handle = tokio::spawn(run_telemetry_worker(
            Arc::clone(&sink),
            rx,
            Arc::clone(&stats),
        ));

        tracing::info!(sink = sink.name(), queue_capacity, "Telemetry recorder started");

        let recorder = Self {
            inner: Some(Arc::new(RecorderInner { tx, sink, stats })),
        };
        (recorder, handle)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn sink_name(&self) -> &str {
        match &self.inner {
            Some(inner) => inner.sink.name(),
            None => "disabled",
        }
    }

    pub fn stats(&self) -> Option<TelemetryStatsSnapshot> {
        self.inner.as_ref().map(|i| i.stats.snapshot())
    }

    pub fn create_trace(&self, trace: Trace) -> CallOutcome {
        self.enqueue(TelemetryEvent::TraceStarted(trace))
    }

    pub fn end_trace(&self, trace_id: Uuid, end: TraceEnd) -> CallOutcome {
        self.enqueue(TelemetryEvent::TraceEnded { trace_id, end })
    }

    pub fn create_span(&self, span: Span) -> CallOutcome {
        self.enqueue(TelemetryEvent::SpanRecorded(span))
    }

    pub fn add_feedback_score(&self, score: FeedbackScore) -> CallOutcome {
        self.enqueue(TelemetryEvent::ScoreAdded(score))
    }

    fn enqueue(&self, event: TelemetryEvent) -> CallOutcome {
        let Some(inner) = &self.inner else {
            return CallOutcome::Degraded("telemetry disabled".to_string());
        };

        let kind = event.kind();
        match inner.tx.try_send(Command::Event(event)) {
            Ok(()) => {
                inner.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                CallOutcome::Success(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = kind, "Telemetry queue full, dropping event");
                CallOutcome::Degraded("telemetry queue full".to_string())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = kind, "Telemetry worker stopped, dropping event");
                CallOutcome::Failed("telemetry worker stopped".to_string())
            }
        }
    }

    /// Bypass the queue and submit straight to the sink.
    pub async fn submit_now(&self, event: TelemetryEvent) -> CallOutcome {
        let Some(inner) = &self.inner else {
            return CallOutcome::Degraded("telemetry disabled".to_string());
        };
        deliver(inner.sink.as_ref(), &event).await
    }

    /// Wait until every event enqueued before this call has been attempted.
    pub async fn flush(&self) -> CallOutcome {
        self.send_control(Command::Flush).await
    }

    /// Drain the queue and stop the worker. Later events are dropped.
    pub async fn shutdown(&self) -> CallOutcome {
        let outcome = self.send_control(Command::Shutdown).await;
        if outcome.is_success() {
            tracing::info!("Telemetry recorder shut down");
        }
        outcome
    }

    async fn send_control(&self, make: fn(oneshot::Sender<()>) -> Command) -> CallOutcome {
        let Some(inner) = &self.inner else {
            return CallOutcome::Degraded("telemetry disabled".to_string());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if inner.tx.send(make(ack_tx)).await.is_err() {
            return CallOutcome::Failed("telemetry worker stopped".to_string());
        }
        match ack_rx.await {
            Ok(()) => CallOutcome::Success(()),
            Err(_) => CallOutcome::Failed("telemetry worker stopped".to_string()),
        }
    }
}

async fn run_telemetry_worker(
    sink: Arc<dyn TelemetrySink>,
    mut rx: mpsc::Receiver<Command>,
    stats: Arc<TelemetryStats>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Event(event) => match deliver(sink.as_ref(), &event).await {
                CallOutcome::Success(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                outcome => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        sink = sink.name(),
                        event = event.kind(),
                        error = outcome.error().unwrap_or("unknown"),
                        "Telemetry delivery failed"
                    );
                }
            },
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
