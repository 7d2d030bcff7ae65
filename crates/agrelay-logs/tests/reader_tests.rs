use agrelay_logs::{LogReader, retry_sentinel};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Write a session log under `<root>/projects/<munged>/<session>.jsonl`
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

fn user(uuid: &str, cwd: &str, text: &str) -> String {
    serde_json::json!({
        "type": "user",
        "uuid": uuid,
        "timestamp": "2026-01-05T10:00:00Z",
        "cwd": cwd,
        "message": {"role": "user", "content": text},
    })
    .to_string()
}

fn assistant_text(uuid: &str, msg_id: &str, text: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "uuid": uuid,
        "timestamp": "2026-01-05T10:00:01Z",
        "message": {"role": "assistant", "id": msg_id, "model": "test-model",
                    "content": [{"type": "text", "text": text}]},
    })
    .to_string()
}

fn assistant_tool(uuid: &str, msg_id: &str, tool_use_id: &str, name: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "uuid": uuid,
        "timestamp": "2026-01-05T10:00:02Z",
        "message": {"role": "assistant", "id": msg_id, "model": "test-model",
                    "content": [{"type": "tool_use", "id": tool_use_id, "name": name,
                                 "input": {"command": "ls"}}]},
    })
    .to_string()
}

fn tool_result(uuid: &str, tool_use_id: &str, output: &str) -> String {
    serde_json::json!({
        "type": "user",
        "uuid": uuid,
        "timestamp": "2026-01-05T10:00:03Z",
        "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": tool_use_id, "content": output},
        ]},
    })
    .to_string()
}

#[test]
fn reads_messages_and_pending_from_disk() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user("u-1", "/work/repo", "list the files"),
            assistant_tool("a-1", "msg_1", "toolu_1", "Bash"),
        ],
    );

    let reader = LogReader::new(tmp.path());
    let log = reader.read("sess-1").unwrap();

    assert_eq!(log.messages.len(), 2);
    assert_eq!(log.pending_tool_calls.len(), 1);
    assert_eq!(log.pending_tool_calls[0].name, "Bash");
    assert_eq!(reader.message_count("sess-1").unwrap(), 2);
}

#[test]
fn matched_tool_result_is_never_pending() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user("u-1", "/work/repo", "list the files"),
            assistant_tool("a-1", "msg_1", "toolu_1", "Bash"),
            tool_result("u-2", "toolu_1", "Cargo.toml"),
        ],
    );

    let log = LogReader::new(tmp.path()).read("sess-1").unwrap();
    assert!(log.pending_tool_calls.is_empty());
    assert_eq!(
        log.messages[1].tool_calls[0].result.as_deref(),
        Some("Cargo.toml")
    );
}

#[test]
fn malformed_lines_do_not_interrupt_valid_ones() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user("u-1", "/work/repo", "first"),
            "{not json at all".to_string(),
            r#"{"type":"user","truncated"#.to_string(),
            assistant_text("a-1", "msg_1", "second"),
        ],
    );

    let log = LogReader::new(tmp.path()).read("sess-1").unwrap();
    assert_eq!(log.messages.len(), 2);
    assert_eq!(log.messages[0].text(), "first");
    assert_eq!(log.messages[1].text(), "second");
}

#[test]
fn retry_sentinel_never_surfaces() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user("u-1", "/work/repo", "do the thing"),
            assistant_tool("a-1", "msg_1", "toolu_orig", "WebFetch"),
            user("u-2", "/work/repo", &retry_sentinel("WebFetch")),
            assistant_tool("a-2", "msg_2", "toolu_retry", "WebFetch"),
        ],
    );

    let log = LogReader::new(tmp.path()).read("sess-1").unwrap();
    let texts: Vec<String> = log.messages.iter().map(|m| m.text()).collect();
    assert!(texts.iter().all(|t| !t.starts_with("Retry the")));
    assert!(log.messages.iter().all(|m| m.id != "msg_2"));

    // Original is replaced by the retry, not pending; the retried call is
    // the only live one
    let pending: Vec<&str> = log
        .pending_tool_calls
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(pending, vec!["toolu_retry"]);
}

#[test]
fn two_reads_of_unchanged_file_are_equal() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user("u-1", "/work/repo", "hi"),
            assistant_tool("a-1", "msg_1", "toolu_1", "Bash"),
        ],
    );

    let reader = LogReader::new(tmp.path());
    let first = reader.read("sess-1").unwrap();
    let second = reader.read("sess-1").unwrap();

    let ids = |log: &agrelay_logs::SessionLog| -> Vec<String> {
        log.messages.iter().map(|m| m.id.clone()).collect()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(
        first.pending_tool_calls.len(),
        second.pending_tool_calls.len()
    );
}

#[test]
fn unknown_session_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let reader = LogReader::new(tmp.path());
    assert!(reader.read("nope").is_err());
    assert!(reader.project_of_session("nope").is_err());
}

#[test]
fn project_of_session_uses_cwd_field() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[user("u-1", "/work/repo", "hello")],
    );

    let reader = LogReader::new(tmp.path());
    assert_eq!(
        reader.project_of_session("sess-1").unwrap(),
        Path::new("/work/repo")
    );
}

#[test]
fn recently_active_tracks_mtime() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[user("u-1", "/work/repo", "hello")],
    );

    let reader = LogReader::new(tmp.path());
    assert!(reader.is_recently_active("sess-1", Duration::from_secs(60)));
    assert!(!reader.is_recently_active("missing", Duration::from_secs(60)));
}

#[test]
fn listings_cover_projects_and_sessions() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user("u-1", "/work/repo", "first question"),
            assistant_text("a-1", "msg_1", "answer"),
        ],
    );
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-2",
        &[user("u-1", "/work/repo", "second question")],
    );
    // Auxiliary agent file must be ignored
    let dir = tmp.path().join("projects").join("-work-repo");
    std::fs::write(dir.join("agent-xyz.jsonl"), "{}\n").unwrap();

    let reader = LogReader::new(tmp.path());

    let projects = reader.list_projects().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].path, "/work/repo");
    assert_eq!(projects[0].session_count, 2);

    // Both the absolute path and the munged name resolve
    let sessions = reader.list_sessions("/work/repo").unwrap();
    assert_eq!(sessions.len(), 2);
    let sessions = reader.list_sessions("-work-repo").unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(
        sessions
            .iter()
            .any(|s| s.snippet.as_deref() == Some("first question"))
    );
}

#[test]
fn metadata_reports_model_and_counts() {
    let tmp = TempDir::new().unwrap();
    write_session(
        tmp.path(),
        "/work/repo",
        "sess-1",
        &[
            user("u-1", "/work/repo", "hello"),
            assistant_text("a-1", "msg_1", "hi there"),
        ],
    );

    let meta = LogReader::new(tmp.path()).session_metadata("sess-1").unwrap();
    assert_eq!(meta.model.as_deref(), Some("test-model"));
    assert_eq!(meta.message_count, 2);
    assert_eq!(meta.project_root.as_deref(), Some("/work/repo"));
}
