//! Conversation proxy — one chat exchange, end to end.
//!
//! Every branch produces a user-facing reply; the caller never sees an
//! error. Telemetry and the judge are best-effort side channels.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::completion::{CompletionBackend, CompletionRequest};
use crate::config::CompletionConfig;
use crate::judge::{JudgeJob, JudgeQueue};
use crate::models::{FeedbackScore, Message, Role, Span, SpanType, Trace, TraceEnd};
use crate::prompt::{LoadedPrompt, PromptInfo};
use crate::scoring::heuristic_scores;
use crate::telemetry::TelemetryRecorder;

pub const UNAVAILABLE_REPLY: &str =
    "The advisor is not configured right now. Please try again later.";
pub const RETRY_REPLY: &str =
    "I'm having trouble reaching the advisor service. Please try again in a moment.";
pub const APOLOGY_REPLY: &str =
    "Sorry, something went wrong while preparing a reply. Please try again.";

pub const TRACE_NAME: &str = "chat_completion";
pub const COMPLETION_SPAN_NAME: &str = "gemini_completion";
pub const HEURISTIC_CATEGORY: &str = "heuristic";

/// Body returned by the chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub content: String,
    pub trace_id: Option<Uuid>,
}

impl ChatReply {
    fn untraced(content: &str) -> Self {
        Self {
            content: content.to_string(),
            trace_id: None,
        }
    }
}

pub struct ConversationProxy {
    completion: Option<Arc<dyn CompletionBackend>>,
    recorder: TelemetryRecorder,
    judge: Option<JudgeQueue>,
    prompt: LoadedPrompt,
    temperature: f32,
    max_output_tokens: u32,
}

impl ConversationProxy {
    /// `completion` is `None` when no API credential is configured.
    pub fn new(
        completion: Option<Arc<dyn CompletionBackend>>,
        recorder: TelemetryRecorder,
        prompt: LoadedPrompt,
        config: &CompletionConfig,
    ) -> Self {
        Self {
            completion,
            recorder,
            judge: None,
            prompt,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }

    pub fn with_judge(mut self, judge: JudgeQueue) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn is_available(&self) -> bool {
        self.completion.is_some()
    }

    pub fn model(&self) -> Option<&str> {
        self.completion.as_deref().map(|c| c.model())
    }

    pub fn recorder(&self) -> &TelemetryRecorder {
        &self.recorder
    }

    pub fn judge(&self) -> Option<&JudgeQueue> {
        self.judge.as_ref()
    }

    pub fn prompt_info(&self) -> PromptInfo {
        self.prompt.info()
    }

    pub async fn handle(&self, messages: Vec<Message>) -> ChatReply {
        let Some(completion) = &self.completion else {
            tracing::warn!("Chat request with no completion credential configured");
            return ChatReply::untraced(UNAVAILABLE_REPLY);
        };

        if messages.is_empty() {
            tracing::debug!("Chat request with no messages");
            return ChatReply::untraced(APOLOGY_REPLY);
        }

        let trace_id = Uuid::now_v7();
        let input = json!({ "messages": messages });
        self.recorder.create_trace(Trace {
            id: trace_id,
            name: TRACE_NAME.to_string(),
            input: input.clone(),
            start_time: Utc::now(),
            metadata: json!({
                "model": completion.model(),
                "prompt_version": self.prompt.version,
            }),
        });

        let request = CompletionRequest {
            system_instruction: self.prompt.text.clone(),
            messages: messages.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        };

        let start_time = Utc::now();
        let result = completion.complete(&request).await;
        let end_time = Utc::now();

        let mut span = Span {
            id: Uuid::now_v7(),
            trace_id,
            name: COMPLETION_SPAN_NAME.to_string(),
            span_type: SpanType::Llm,
            input,
            output: json!({}),
            start_time,
            end_time,
            metadata: json!({
                "model": completion.model(),
                "temperature": self.temperature,
                "max_output_tokens": self.max_output_tokens,
            }),
            usage: None,
        };

        match result {
            Ok(reply) => {
                span.output = json!({ "content": reply.text });
                span.usage = Some(reply.usage);
                self.recorder.create_span(span);
                self.recorder.end_trace(
                    trace_id,
                    TraceEnd {
                        output: json!({ "content": reply.text }),
                        usage: Some(reply.usage),
                        end_time: Utc::now(),
                    },
                );

                for score in heuristic_scores(&reply.text) {
                    self.recorder.add_feedback_score(FeedbackScore::new(
                        trace_id,
                        score.name,
                        score.value,
                        score.reason,
                        Some(HEURISTIC_CATEGORY),
                    ));
                }

                if let Some(judge) = &self.judge {
                    let user_message = messages
                        .iter()
                        .rev()
                        .find(|m| m.role == Role::User)
                        .map(|m| m.content.clone())
                        .unwrap_or_default();
                    judge.submit(JudgeJob {
                        trace_id,
                        user_message,
                        reply: reply.text.clone(),
                    });
                }

                tracing::info!(
                    %trace_id,
                    total_tokens = reply.usage.total_tokens,
                    "Chat reply generated"
                );

                ChatReply {
                    content: reply.text,
                    trace_id: Some(trace_id),
                }
            }
            Err(e) => {
                let fallback = if e.is_upstream_status() {
                    tracing::warn!(%trace_id, error = %e, "Completion endpoint rejected request");
                    RETRY_REPLY
                } else {
                    tracing::error!(%trace_id, error = %e, "Completion call failed");
                    APOLOGY_REPLY
                };

                let error_payload = json!({ "error": e.to_string() });
                span.output = error_payload.clone();
                self.recorder.create_span(span);
                self.recorder.end_trace(
                    trace_id,
                    TraceEnd {
                        output: error_payload,
                        usage: None,
                        end_time: Utc::now(),
                    },
                );

                ChatReply {
                    content: fallback.to_string(),
                    trace_id: Some(trace_id),
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{Completion, CompletionError};
    use crate::config::JudgeConfig;
    use crate::judge::ShutdownPolicy;
    use crate::models::TokenUsage;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Reply(&'static str),
        Upstream(u16),
        Empty,
    }

    struct ScriptedBackend {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Reply(text) => Ok(Completion {
                    text: text.to_string(),
                    usage: TokenUsage {
                        prompt_tokens: 12,
                        completion_tokens: 8,
                        total_tokens: 20,
                    },
                }),
                Script::Upstream(code) => Err(CompletionError::Api {
                    code: *code,
                    message: "upstream".to_string(),
                }),
                Script::Empty => Err(CompletionError::EmptyResponse),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn proxy(backend: Option<Arc<ScriptedBackend>>, recorder: TelemetryRecorder) -> ConversationProxy {
        ConversationProxy::new(
            backend.map(|b| b as Arc<dyn CompletionBackend>),
            recorder,
            LoadedPrompt::built_in(),
            &CompletionConfig::default(),
        )
    }

    fn ask(text: &str) -> Vec<Message> {
        vec![Message::user(text)]
    }

    #[tokio::test]
    async fn test_missing_credential_returns_unavailable_without_trace() {
        let sink = Arc::new(MemorySink::new());
        let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 16);
        let proxy = proxy(None, recorder.clone());

        let reply = proxy.handle(ask("hello")).await;
        recorder.flush().await;

        assert_eq!(reply.content, UNAVAILABLE_REPLY);
        assert_eq!(reply.trace_id, None);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_empty_messages_make_no_call() {
        let backend = ScriptedBackend::new(Script::Reply("unused"));
        let proxy = proxy(Some(backend.clone()), TelemetryRecorder::disabled());

        let reply = proxy.handle(Vec::new()).await;

        assert_eq!(reply.content, APOLOGY_REPLY);
        assert_eq!(reply.trace_id, None);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_records_trace_span_and_heuristic_scores() {
        let sink = Arc::new(MemorySink::new());
        let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 64);
        let backend = ScriptedBackend::new(Script::Reply("- Start one pomodoro now\n- Log it"));
        let proxy = proxy(Some(backend), recorder.clone());

        let reply = proxy.handle(ask("How do I start?")).await;
        recorder.flush().await;

        assert_eq!(reply.content, "- Start one pomodoro now\n- Log it");
        let trace_id = reply.trace_id.expect("trace id when telemetry is enabled");

        let traces = sink.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].id, trace_id);
        assert_eq!(traces[0].name, TRACE_NAME);

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, COMPLETION_SPAN_NAME);
        assert_eq!(spans[0].usage.map(|u| u.total_tokens), Some(20));

        let ends = sink.trace_ends();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].1.output["content"], "- Start one pomodoro now\n- Log it");

        let scores = sink.scores_for(trace_id);
        let named: Vec<(String, f64)> = scores.iter().map(|s| (s.name.clone(), s.value)).collect();
        assert_eq!(
            named,
            vec![
                ("response_length".to_string(), 8.0 / 200.0),
                ("actionability".to_string(), 1.0),
                ("topic_relevance".to_string(), 1.0),
            ]
        );
        assert!(scores
            .iter()
            .all(|s| s.category_name.as_deref() == Some(HEURISTIC_CATEGORY)));
    }

    #[tokio::test]
    async fn test_upstream_failure_returns_retry_with_trace() {
        let sink = Arc::new(MemorySink::new());
        let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 16);
        let proxy = proxy(Some(ScriptedBackend::new(Script::Upstream(503))), recorder.clone());

        let reply = proxy.handle(ask("hi")).await;
        recorder.flush().await;

        assert_eq!(reply.content, RETRY_REPLY);
        assert!(reply.trace_id.is_some());

        let ends = sink.trace_ends();
        assert_eq!(ends.len(), 1);
        assert!(ends[0].1.output["error"].as_str().unwrap().contains("503"));
        assert!(sink.scores().is_empty());
    }

    #[tokio::test]
    async fn test_other_failure_returns_apology() {
        let proxy = proxy(
            Some(ScriptedBackend::new(Script::Empty)),
            TelemetryRecorder::disabled(),
        );

        let reply = proxy.handle(ask("hi")).await;

        assert_eq!(reply.content, APOLOGY_REPLY);
        assert!(reply.trace_id.is_some());
    }

    #[tokio::test]
    async fn test_upstream_failure_keeps_trace_id_without_telemetry() {
        let proxy = proxy(
            Some(ScriptedBackend::new(Script::Upstream(500))),
            TelemetryRecorder::disabled(),
        );

        let reply = proxy.handle(ask("hi")).await;

        assert_eq!(reply.content, RETRY_REPLY);
        let trace_id = reply.trace_id.expect("locally generated trace id");
        assert_eq!(trace_id.get_version_num(), 7);
    }

    struct StalledJudge;

    #[async_trait]
    impl CompletionBackend for StalledJudge {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, CompletionError> {
            std::future::pending().await
        }

        fn model(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_reply_does_not_wait_for_judge() {
        let sink = Arc::new(MemorySink::new());
        let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 64);
        let judge = JudgeQueue::spawn(Arc::new(StalledJudge), recorder.clone(), JudgeConfig::default());
        let proxy = proxy(Some(ScriptedBackend::new(Script::Reply("Set a goal."))), recorder.clone())
            .with_judge(judge.clone());

        let reply = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            proxy.handle(ask("Plan my day")),
        )
        .await
        .expect("reply returned while the judge is still running");

        assert_eq!(reply.content, "Set a goal.");
        assert!(reply.trace_id.is_some());
        let stats = judge.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 0);

        judge.shutdown(ShutdownPolicy::Abandon).await;
    }

    #[tokio::test]
    async fn test_judge_receives_last_user_message() {
        let sink = Arc::new(MemorySink::new());
        let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 64);
        let judge_backend = ScriptedBackend::new(Script::Reply(
            "{\"helpfulness\": 0.9, \"specificity\": 0.6, \"safety\": 1.0, \"reason\": \"fine\"}",
        ));
        let judge = JudgeQueue::spawn(judge_backend.clone(), recorder.clone(), JudgeConfig::default());
        let proxy = proxy(Some(ScriptedBackend::new(Script::Reply("Set a goal."))), recorder.clone())
            .with_judge(judge.clone());

        let messages = vec![
            Message::user("first"),
            Message::assistant("ok"),
            Message::user("What next?"),
        ];
        let reply = proxy.handle(messages).await;
        judge.shutdown(ShutdownPolicy::Drain).await;
        recorder.flush().await;

        let trace_id = reply.trace_id.unwrap();
        assert_eq!(judge_backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.scores_for(trace_id).len(), 6);
        assert_eq!(judge.stats().completed, 1);

        let judge_span = sink
            .spans()
            .into_iter()
            .find(|s| s.name == crate::judge::JUDGE_SPAN_NAME)
            .expect("judge span");
        assert!(judge_span.input["prompt"].as_str().unwrap().contains("What next?"));
    }
}
