use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use agrelay_types::{ProjectSummary, SessionSummary};

use crate::error::{Error, Result};
use crate::schema::{ContentBlock, LogRecord};
use crate::sentinel::parse_retry_sentinel;

/// Directory name the agent derives from a project path
/// (`/home/me/repo` → `-home-me-repo`)
pub fn munge_project_path(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn projects_dir(log_root: &Path) -> PathBuf {
    log_root.join("projects")
}

/// True for `<sessionId>.jsonl` session files; `agent-*` files are
/// auxiliary sidechains and ignored
fn is_session_file(path: &Path) -> bool {
    if path.extension().is_none_or(|e| e != "jsonl") {
        return false;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| !name.starts_with("agent-"))
}

pub(crate) fn find_session_file(log_root: &Path, session_id: &str) -> Option<PathBuf> {
    let projects = projects_dir(log_root);
    let file_name = format!("{}.jsonl", session_id);

    let entries = std::fs::read_dir(&projects).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let candidate = entry.path().join(&file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// First `cwd` field in the log — the authoritative project directory
pub(crate) fn extract_cwd(path: &Path) -> Option<String> {
    for record in head_records(path, 10) {
        match record {
            LogRecord::User(chat) => {
                if chat.cwd.is_some() {
                    return chat.cwd;
                }
            }
            LogRecord::Assistant(chat) => {
                if chat.cwd.is_some() {
                    return chat.cwd;
                }
            }
            _ => continue,
        }
    }
    None
}

struct SessionHeader {
    started_at: Option<String>,
    cwd: Option<String>,
    snippet: Option<String>,
}

/// Scan the first lines of a session file for listing metadata
fn extract_header(path: &Path) -> SessionHeader {
    let mut started_at = None;
    let mut cwd = None;
    let mut snippet = None;

    for record in head_records(path, 200) {
        match &record {
            LogRecord::User(chat) => {
                if started_at.is_none() {
                    started_at = Some(chat.timestamp.clone());
                }
                if cwd.is_none() {
                    cwd = chat.cwd.clone();
                }
                if snippet.is_none() && !chat.is_meta {
                    snippet = chat.message.content.iter().find_map(|block| match block {
                        ContentBlock::Text { text } if parse_retry_sentinel(text).is_none() => {
                            Some(text.clone())
                        }
                        _ => None,
                    });
                }
            }
            LogRecord::Assistant(chat) => {
                if started_at.is_none() {
                    started_at = Some(chat.timestamp.clone());
                }
                if cwd.is_none() {
                    cwd = chat.cwd.clone();
                }
            }
            _ => {}
        }

        if started_at.is_some() && cwd.is_some() && snippet.is_some() {
            break;
        }
    }

    SessionHeader {
        started_at,
        cwd,
        snippet,
    }
}

fn head_records(path: &Path, limit: usize) -> Vec<LogRecord> {
    use std::io::{BufRead, BufReader};

    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };

    BufReader::new(file)
        .lines()
        .take(limit)
        .map_while(|line| line.ok())
        .filter_map(|line| serde_json::from_str::<LogRecord>(&line).ok())
        .collect()
}

fn mod_time_rfc3339(path: &Path) -> Option<String> {
    let modified = path.metadata().and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified).to_rfc3339())
}

pub(crate) fn list_projects(log_root: &Path) -> Result<Vec<ProjectSummary>> {
    let projects = projects_dir(log_root);
    if !projects.is_dir() {
        return Ok(Vec::new());
    }

    let mut summaries = Vec::new();

    for entry in std::fs::read_dir(&projects)?.filter_map(|e| e.ok()) {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let mut session_files: Vec<PathBuf> = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| is_session_file(p))
            .collect();

        if session_files.is_empty() {
            continue;
        }

        // Most recent file carries the project's latest activity and
        // the freshest cwd
        session_files.sort_by_key(|p| p.metadata().and_then(|m| m.modified()).ok());
        let Some(newest) = session_files.last() else {
            continue;
        };

        let path = extract_cwd(newest).unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        summaries.push(ProjectSummary {
            path,
            session_count: session_files.len(),
            last_active_at: mod_time_rfc3339(newest),
        });
    }

    summaries.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
    Ok(summaries)
}

pub(crate) fn list_sessions(log_root: &Path, project: &str) -> Result<Vec<SessionSummary>> {
    let projects = projects_dir(log_root);

    // The caller may pass either the munged directory name or the
    // absolute project path. An absolute path must be munged first so it
    // cannot escape the projects directory.
    let mut candidates = vec![munge_project_path(project)];
    if !project.contains('/') {
        candidates.insert(0, project.to_string());
    }
    let dir = candidates
        .iter()
        .map(|name| projects.join(name))
        .find(|p| p.is_dir())
        .ok_or_else(|| Error::ProjectNotFound(project.to_string()))?;

    let mut sessions: Vec<(SessionSummary, Option<String>)> = Vec::new();

    for entry in std::fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !is_session_file(&path) {
            continue;
        }

        let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let header = extract_header(&path);
        let last_active_at = mod_time_rfc3339(&path);

        sessions.push((
            SessionSummary {
                session_id: session_id.to_string(),
                project_root: header.cwd,
                started_at: header.started_at,
                snippet: header.snippet,
                last_active_at: last_active_at.clone(),
            },
            last_active_at,
        ));
    }

    sessions.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(sessions.into_iter().map(|(summary, _)| summary).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_munge_project_path() {
        assert_eq!(munge_project_path("/home/me/repo"), "-home-me-repo");
        assert_eq!(munge_project_path("/tmp/a.b_c"), "-tmp-a-b-c");
    }

    #[test]
    fn test_is_session_file() {
        assert!(is_session_file(Path::new("/x/abc-123.jsonl")));
        assert!(!is_session_file(Path::new("/x/agent-abc.jsonl")));
        assert!(!is_session_file(Path::new("/x/abc-123.json")));
    }
}
