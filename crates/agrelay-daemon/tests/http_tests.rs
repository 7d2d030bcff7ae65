use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use agrelay_daemon::{AppState, router};
use agrelay_runtime::{Daemon, RuntimeConfig};

const TOKEN: &str = "test-token";

fn write_session(root: &Path, project: &str, session_id: &str, lines: &[String]) {
    let munged: String = project
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let dir = root.join("projects").join(munged);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("{}.jsonl", session_id)),
        lines.join("\n") + "\n",
    )
    .unwrap();
}

fn user_line(uuid: &str, cwd: &str, text: &str) -> String {
    serde_json::json!({
        "type": "user", "uuid": uuid, "timestamp": "2026-01-05T10:00:00Z", "cwd": cwd,
        "message": {"role": "user", "content": text},
    })
    .to_string()
}

fn assistant_tool_line(uuid: &str, msg_id: &str, tool_use_id: &str, name: &str) -> String {
    serde_json::json!({
        "type": "assistant", "uuid": uuid, "timestamp": "2026-01-05T10:00:01Z",
        "message": {"role": "assistant", "id": msg_id, "model": "test-model", "content": [
            {"type": "tool_use", "id": tool_use_id, "name": name, "input": {}},
        ]},
    })
    .to_string()
}

fn make_app(root: &Path) -> (Router, AppState) {
    let mut config = RuntimeConfig::new(root);
    // Keep the background poller quiet during request-level tests
    config.poll_interval = Duration::from_secs(3600);
    config.heartbeat_interval = Duration::from_secs(3600);

    let daemon = Arc::new(Daemon::start(config));
    let push = agrelay_daemon::PushStore::open(&root.join("data")).unwrap();
    let state = AppState::new(daemon, TOKEN.to_string(), push);
    (router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, with_token: bool) -> Request<Body> {
    let builder = Request::builder().uri(uri);
    let builder = if with_token {
        builder.header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
    } else {
        builder
    };
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_needs_no_token() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = make_app(tmp.path());

    let response = app.oneshot(get("/health", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = make_app(tmp.path());

    let response = app
        .clone()
        .oneshot(get("/api/claude/projects", false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(get("/api/claude/projects", true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The SSE client cannot set headers; the query parameter works too
    let response = app
        .oneshot(get(
            &format!("/api/claude/projects?token={}", TOKEN),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn projects_and_sessions_listing() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[user_line("u-1", "/work/repo", "first question")],
    );

    let (app, _state) = make_app(tmp.path());

    let response = app
        .clone()
        .oneshot(get("/api/claude/projects", true))
        .await
        .unwrap();
    let projects = body_json(response).await;
    assert_eq!(projects[0]["path"], "/work/repo");
    assert_eq!(projects[0]["session_count"], 1);

    let response = app
        .oneshot(get("/api/claude/projects/-work-repo/sessions", true))
        .await
        .unwrap();
    let sessions = body_json(response).await;
    assert_eq!(sessions[0]["session_id"], "sess-1");
    assert_eq!(sessions[0]["snippet"], "first question");
}

#[tokio::test]
async fn messages_paginate_from_the_tail() {
    let tmp = TempDir::new().unwrap();
    let lines: Vec<String> = (0..5)
        .map(|i| user_line(&format!("u-{}", i), "/work/repo", &format!("message {}", i)))
        .collect();
    write_session(tmp.path(), "/work/repo", "sess-1", &lines);

    let (app, _state) = make_app(tmp.path());

    let response = app
        .clone()
        .oneshot(get("/api/claude/sessions/sess-1?limit=2&offset=0", true))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert_eq!(page["total"], 5);
    let texts: Vec<&str> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"][0]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["message 3", "message 4"]);

    let response = app
        .clone()
        .oneshot(get("/api/claude/sessions/sess-1?limit=2&offset=2", true))
        .await
        .unwrap();
    let page = body_json(response).await;
    let texts: Vec<&str> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"][0]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["message 1", "message 2"]);

    let response = app
        .oneshot(get("/api/claude/sessions/unknown", true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metadata_endpoint_reports_model() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user_line("u-1", "/work/repo", "hi"),
            assistant_tool_line("a-1", "msg_1", "toolu_1", "Bash"),
        ],
    );

    let (app, _state) = make_app(tmp.path());
    let response = app
        .oneshot(get("/api/claude/sessions/sess-1/metadata", true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["model"], "test-model");
    assert_eq!(metadata["project_root"], "/work/repo");
}

#[tokio::test]
async fn hook_callback_registers_a_prompt() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("proj");
    std::fs::create_dir_all(&project).unwrap();
    let project_str = project.to_string_lossy().into_owned();

    write_session(
        tmp.path(),
        &project_str,
        "sess-h",
        &[
            user_line("u-1", &project_str, "run it"),
            assistant_tool_line("a-1", "msg_1", "toolu_1", "Bash"),
        ],
    );

    let (app, state) = make_app(tmp.path());

    let response = app
        .oneshot(post(
            "/api/claude-hook",
            serde_json::json!({
                "session_id": "sess-h",
                "notification_type": "permission_prompt",
                "message": "Claude needs your permission to use Bash",
                "cwd": project_str,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.daemon.coordinator().open_prompt_count("sess-h").await, 1);
}

#[tokio::test]
async fn permission_response_for_unknown_prompt_is_404() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = make_app(tmp.path());

    let response = app
        .oneshot(post(
            "/api/claude/sessions/sess-x/permission",
            serde_json::json!({"request_id": "nope", "allow": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn push_store_round_trip_over_http() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = make_app(tmp.path());

    let response = app
        .clone()
        .oneshot(post(
            "/api/push/subscribe",
            serde_json::json!({"endpoint": "https://push.example/a", "keys": {"auth": "x"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/api/push/subscriptions", true))
        .await
        .unwrap();
    let list = body_json(response).await;
    assert_eq!(list["subscriptions"].as_array().unwrap().len(), 1);

    let response = app
        .oneshot(post(
            "/api/push/unsubscribe",
            serde_json::json!({"endpoint": "https://push.example/a"}),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["removed"], true);
}
