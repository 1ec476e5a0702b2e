use std::sync::Arc;
use std::time::Duration;

use hookwright_core::*;
use hookwright_provider::HttpBackend;
use hookwright_schema::Role;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect::<String>()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn session_for(server: &MockServer) -> GenerationSession {
    let backend = HttpBackend::new(server.uri()).with_api_token("test-token");
    GenerationSession::new(Arc::new(backend))
}

#[tokio::test]
async fn generation_against_http_backend_builds_transcript() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"type": "conversation", "content": "Here are your hooks."}),
        serde_json::json!({"type": "chunk", "section": "hook", "content": "Stop "}),
        serde_json::json!({"type": "chunk", "section": "hook", "content": "scrolling."}),
        serde_json::json!({"type": "hook", "content": "Stop scrolling.", "index": 0}),
        serde_json::json!({"type": "chunk", "section": "hook", "content": "Nobody "}),
        serde_json::json!({"type": "hook", "content": "Nobody tells you this.", "index": 1}),
        serde_json::json!({"type": "complete"}),
    ]);

    Mock::given(method("POST"))
        .and(path("/api/hooks/generate-stream"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(serde_json::json!({"query": "hooks for a productivity app"})))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    let task = session.generate("hooks for a productivity app").unwrap();
    assert_eq!(task.wait().await, AttemptOutcome::Finished);

    let snapshot = session.snapshot();
    assert!(!snapshot.is_generating);
    assert!(snapshot.last_error.is_none());
    assert_eq!(snapshot.transcript.messages.len(), 2);
    assert_eq!(snapshot.transcript.messages[0].role, Role::User);
    assert_eq!(snapshot.transcript.messages[1].content, "Here are your hooks.");
    assert_eq!(snapshot.transcript.placeholders().count(), 0);

    let hooks: Vec<&str> = snapshot
        .transcript
        .hooks
        .iter()
        .map(|h| h.content.as_str())
        .collect();
    assert_eq!(hooks, vec!["Stop scrolling.", "Nobody tells you this."]);
}

#[tokio::test]
async fn rejected_request_surfaces_backend_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/hooks/generate-stream"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "Invalid token"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    let task = session.generate("anything").unwrap();
    let outcome = task.wait().await;

    let AttemptOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(message.contains("Invalid token"));

    let snapshot = session.snapshot();
    assert!(!snapshot.is_generating);
    assert!(snapshot.transcript.messages.is_empty());
    assert_eq!(snapshot.last_error.as_deref(), Some(message.as_str()));
}

#[tokio::test]
async fn backend_error_event_ends_generation() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"type": "chunk", "section": "hook", "content": "Half"}),
        serde_json::json!({"type": "error", "message": "model overloaded"}),
    ]);
    Mock::given(method("POST"))
        .and(path("/api/hooks/generate-stream"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let session = session_for(&server);
    let outcome = session.generate("q").unwrap().wait().await;

    assert_eq!(outcome, AttemptOutcome::Failed("model overloaded".into()));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.last_error.as_deref(), Some("model overloaded"));
    assert_eq!(snapshot.transcript.placeholders().count(), 0);
    assert!(snapshot.transcript.hooks.is_empty());
}

#[tokio::test]
async fn bookmark_round_trips_through_backend() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"type": "hook", "content": "Save this one.", "index": 0}),
        serde_json::json!({"type": "complete"}),
    ]);
    Mock::given(method("POST"))
        .and(path("/api/hooks/generate-stream"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/hooks/bookmark-hook"))
        .and(body_json(serde_json::json!({"hook": "Save this one."})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    session.generate("q").unwrap().wait().await;

    let hook_id = session.snapshot().transcript.hooks[0].id.clone();
    assert!(session.bookmark(&hook_id).await.unwrap());
    assert!(!session.bookmark(&hook_id).await.unwrap());
    assert!(session.snapshot().transcript.hooks[0].is_bookmarked);
}

#[tokio::test]
async fn cancel_while_waiting_for_headers() {
    let server = MockServer::start().await;
    let body = sse_body(&[serde_json::json!({"type": "conversation", "content": "late"})]);
    Mock::given(method("POST"))
        .and(path("/api/hooks/generate-stream"))
        .respond_with(sse_response(body).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let session = session_for(&server);
    let task = session.generate("q").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.cancel();

    assert_eq!(task.wait().await, AttemptOutcome::Cancelled);
    let snapshot = session.snapshot();
    assert!(!snapshot.is_generating);
    assert!(snapshot.last_error.is_none());
    assert!(snapshot.transcript.messages.is_empty());
}

#[tokio::test]
async fn config_fixture_drives_session() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"type": "conversation", "content": "ok"}),
        serde_json::json!({"type": "complete"}),
    ]);
    Mock::given(method("POST"))
        .and(path("/custom/stream"))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(MAIN_CONFIG_FILE),
        format!(
            "backend:\n  base_url: {}\n  stream_path: /custom/stream\ngeneration:\n  idle_timeout_secs: 5\n",
            server.uri()
        ),
    )
    .unwrap();

    let config = load_config(dir.path()).unwrap();
    let session =
        GenerationSession::with_options(Arc::new(config.build_backend()), config.session_options());
    let outcome = session.generate("q").unwrap().wait().await;

    assert_eq!(outcome, AttemptOutcome::Finished);
    assert_eq!(session.snapshot().transcript.messages[1].content, "ok");
}
