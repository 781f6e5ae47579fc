use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vow_core::config::CompletionConfig;
use vow_core::proxy::{APOLOGY_REPLY, RETRY_REPLY, UNAVAILABLE_REPLY};
use vow_core::{
    CompletionBackend, ConversationProxy, Credentials, GeminiCompletionClient, LoadedPrompt,
    MemorySink, TelemetryRecorder, VowConfig,
};
use vow_server::app::App;
use vow_server::http::{build_router, HttpState};

const GEMINI_PATH: &str = "/models/gemini-2.0-flash:generateContent";

fn gemini_reply(text: &str) -> Value {
    json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }],
        "usageMetadata": { "promptTokenCount": 40, "candidatesTokenCount": 9, "totalTokenCount": 49 }
    })
}

fn completion_config(base_url: &str) -> CompletionConfig {
    CompletionConfig {
        base_url: base_url.to_string(),
        ..CompletionConfig::default()
    }
}

/// Router wired to a wiremock Gemini endpoint and an in-memory sink.
fn router_with(
    gemini: Option<&MockServer>,
    recorder: TelemetryRecorder,
) -> axum::Router {
    let config = completion_config(&gemini.map(|g| g.uri()).unwrap_or_default());
    let completion: Option<Arc<dyn CompletionBackend>> = gemini.map(|_| {
        Arc::new(GeminiCompletionClient::new("test-key".to_string(), config.clone()).unwrap())
            as Arc<dyn CompletionBackend>
    });
    let proxy = ConversationProxy::new(completion, recorder, LoadedPrompt::built_in(), &config);
    build_router(Arc::new(HttpState::new(Arc::new(proxy), None)))
}

async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_chat_end_to_end_records_trace_span_and_scores() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(
            "Here is a plan:\n1. Pick one goal\n2. Run a pomodoro",
        )))
        .expect(1)
        .mount(&gemini)
        .await;

    let sink = Arc::new(MemorySink::new());
    let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 64);
    let router = router_with(Some(&gemini), recorder.clone());

    let (status, body) = send(
        router,
        chat_request(r#"{"messages":[{"role":"user","content":"Help me focus"}]}"#),
    )
    .await;
    recorder.flush().await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "Here is a plan:\n1. Pick one goal\n2. Run a pomodoro");
    let trace_id = body["traceId"].as_str().expect("traceId string");
    assert_eq!(trace_id.len(), 36);

    assert_eq!(sink.traces().len(), 1);
    let spans = sink.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].usage.map(|u| u.total_tokens), Some(49));

    let mut names: Vec<String> = sink.scores().into_iter().map(|s| s.name).collect();
    names.sort();
    assert_eq!(names, vec!["actionability", "response_length", "topic_relevance"]);
}

#[tokio::test]
async fn test_chat_without_credential_makes_no_call() {
    let sink = Arc::new(MemorySink::new());
    let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 8);
    let router = router_with(None, recorder.clone());

    let (status, body) = send(
        router,
        chat_request(r#"{"messages":[{"role":"user","content":"hi"}]}"#),
    )
    .await;
    recorder.flush().await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], UNAVAILABLE_REPLY);
    assert!(body["traceId"].is_null());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_chat_upstream_failure_returns_retry_text() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&gemini)
        .await;

    let sink = Arc::new(MemorySink::new());
    let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 8);
    let router = router_with(Some(&gemini), recorder.clone());

    let (status, body) = send(
        router,
        chat_request(r#"{"messages":[{"role":"user","content":"hi"}]}"#),
    )
    .await;
    recorder.flush().await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], RETRY_REPLY);
    assert!(body["traceId"].is_string());

    let ends = sink.trace_ends();
    assert_eq!(ends.len(), 1);
    assert!(ends[0].1.output["error"].is_string());
}

#[tokio::test]
async fn test_chat_malformed_body_is_still_200() {
    let router = router_with(None, TelemetryRecorder::disabled());

    let (status, body) = send(router, chat_request("not json at all")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], APOLOGY_REPLY);
    assert!(body["traceId"].is_null());
}

#[tokio::test]
async fn test_prompt_info_endpoint() {
    let router = router_with(None, TelemetryRecorder::disabled());

    let (status, body) = send(router, get("/api/prompt-info")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], "default");
    assert!(body.get("promptLength").is_some());
    assert!(body.get("optimizer").is_some());
}

#[tokio::test]
async fn test_diagnostic_endpoint_with_memory_sink() {
    let sink = Arc::new(MemorySink::new());
    let (recorder, _handle) = TelemetryRecorder::spawn(sink.clone(), 8);
    let router = router_with(None, recorder);

    let (status, body) = send(router, get("/api/telemetry/diagnostic")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(sink.traces().len(), 1);
}

#[tokio::test]
async fn test_version_and_health_endpoints() {
    let router = router_with(None, TelemetryRecorder::disabled());
    let (status, body) = send(router.clone(), get("/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());

    let (status, body) = send(router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["telemetry"]["enabled"], false);
}

#[tokio::test]
async fn test_composed_app_serves_chat_through_judge() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(
            "{\"helpfulness\": 0.7, \"specificity\": 0.4, \"safety\": 1.0, \"reason\": \"ok\"}",
        )))
        .expect(2)
        .mount(&gemini)
        .await;

    let mut config = VowConfig::default();
    config.completion.base_url = gemini.uri();
    config.telemetry.backend = "memory".to_string();
    let credentials = Credentials {
        completion_api_key: Some("test-key".to_string()),
        telemetry: None,
    };

    let app = App::build(config, &credentials).unwrap();
    let router = build_router(Arc::new(HttpState::new(Arc::clone(&app.proxy), None)));

    let (status, body) = send(
        router,
        chat_request(r#"{"messages":[{"role":"user","content":"grade me"}]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["traceId"].is_string());

    let judge = app.proxy.judge().expect("judge enabled").clone();
    app.shutdown().await;

    let stats = judge.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.completed, 1);
}
