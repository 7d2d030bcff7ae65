use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use agrelay_types::NormalizedMessage;

use crate::error::{Error, Result};
use crate::orphan::PERMISSION_PROMPT_FLAG;
use crate::protocol::{
    ControlRequestBody, StdoutFrame, normalize_chat, permission_response_frame, user_turn_frame,
};

/// How to launch the agent child
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Working directory the session is bound to
    pub cwd: PathBuf,
    /// Continue an existing session instead of minting a new one
    pub resume_session_id: Option<String>,
    pub permission_mode: Option<String>,
    pub model: Option<String>,
    /// Binary to exec; overridable so tests can substitute a fake agent
    pub binary: String,
}

impl SpawnConfig {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            resume_session_id: None,
            permission_mode: None,
            model: None,
            binary: "claude".to_string(),
        }
    }

    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session_id = Some(session_id.into());
        self
    }
}

/// Base64 image attached to a user turn
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub media_type: String,
    pub data: String,
}

/// Permission prompt raised by the child over stdio
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    pub tool_use_id: String,
    pub input: Value,
    pub suggestions: Option<Value>,
}

/// Everything the child reports upward, after triage
#[derive(Debug)]
pub enum ChildEvent {
    /// Session id from the init handshake; exactly once per child
    SessionId(String),
    /// Unwrapped chat message of role user/assistant
    Chat(NormalizedMessage),
    /// The child finished the current turn
    Result { is_error: bool },
    /// Permission prompt awaiting an answer over stdin
    Permission(PermissionRequest),
    /// Process ended
    Exited { code: Option<i32> },
}

/// Handle to one agent child process owned by this daemon.
///
/// The stdout reader task lives for the process lifetime and feeds the
/// event channel; the handle itself only writes stdin and signals.
pub struct AgentChild {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Arc<Mutex<Option<Child>>>,
    pid: Arc<AtomicU32>,
}

impl AgentChild {
    /// Launch the child and start its stdout/stderr pumps.
    ///
    /// Events arrive on `events_tx` in stdout order. Launch failure is the
    /// only error here; a child that dies later reports `Exited`.
    pub async fn spawn(config: SpawnConfig, events_tx: mpsc::Sender<ChildEvent>) -> Result<Self> {
        let mut cmd = Command::new(&config.binary);
        cmd.args([
            "-p",
            "--input-format",
            "stream-json",
            "--output-format",
            "stream-json",
            "--verbose",
            PERMISSION_PROMPT_FLAG,
            "stdio",
        ]);
        if let Some(session_id) = &config.resume_session_id {
            cmd.args(["--resume", session_id]);
        }
        if let Some(mode) = &config.permission_mode {
            cmd.args(["--permission-mode", mode]);
        }
        if let Some(model) = &config.model {
            cmd.args(["--model", model]);
        }

        let mut child = cmd
            .current_dir(&config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Spawn(format!(
                    "failed to launch `{}` — is it installed and on PATH? ({})",
                    config.binary, e
                ))
            })?;

        let stdin = child.stdin.take().ok_or(Error::ChildGone)?;
        let stdout = child.stdout.take().ok_or(Error::ChildGone)?;
        let stderr = child.stderr.take().ok_or(Error::ChildGone)?;

        let pid = Arc::new(AtomicU32::new(child.id().unwrap_or(0)));
        let child = Arc::new(Mutex::new(Some(child)));

        // Drain stderr at debug level so a wedged child is diagnosable
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "agent_stderr", "{}", line);
            }
        });

        let reader_child = Arc::clone(&child);
        let reader_pid = Arc::clone(&pid);
        tokio::spawn(async move {
            let mut session_id_sent = false;
            let mut lines = BufReader::new(stdout).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let frame: StdoutFrame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(_) => {
                        warn!(line = %line, "unparseable agent stdout frame");
                        continue;
                    }
                };

                let event = match frame {
                    StdoutFrame::System {
                        subtype,
                        session_id,
                    } => {
                        if subtype.as_deref() == Some("init")
                            && let Some(id) = session_id
                            && !session_id_sent
                        {
                            session_id_sent = true;
                            Some(ChildEvent::SessionId(id))
                        } else {
                            None
                        }
                    }
                    StdoutFrame::Assistant { message, uuid }
                    | StdoutFrame::User { message, uuid } => {
                        normalize_chat(&message, uuid.as_deref(), Utc::now())
                            .map(ChildEvent::Chat)
                    }
                    StdoutFrame::Result { is_error, .. } => {
                        Some(ChildEvent::Result { is_error })
                    }
                    StdoutFrame::ControlRequest {
                        request_id,
                        request,
                    } => match request {
                        ControlRequestBody::CanUseTool {
                            tool_name,
                            input,
                            tool_use_id,
                            permission_suggestions,
                        } => Some(ChildEvent::Permission(PermissionRequest {
                            tool_use_id: tool_use_id.unwrap_or_else(|| request_id.clone()),
                            request_id,
                            tool_name,
                            input,
                            suggestions: permission_suggestions,
                        })),
                        ControlRequestBody::Unknown => None,
                    },
                    StdoutFrame::Unknown => None,
                };

                if let Some(event) = event
                    && events_tx.send(event).await.is_err()
                {
                    // Receiver dropped; nobody cares about this child
                    break;
                }
            }

            // Reap and report exit
            let code = if let Some(mut child) = reader_child.lock().await.take() {
                child.wait().await.ok().and_then(|status| status.code())
            } else {
                None
            };
            reader_pid.store(0, Ordering::Relaxed);
            let _ = events_tx.send(ChildEvent::Exited { code }).await;
        });

        Ok(Self {
            stdin: Arc::new(Mutex::new(Some(stdin))),
            child,
            pid,
        })
    }

    /// Write a user turn to the child's stdin
    pub async fn send(&self, text: &str, images: &[ImagePayload]) -> Result<()> {
        self.write_frame(&serde_json::to_vec(&user_turn_frame(text, images))?)
            .await
    }

    /// Answer an open permission prompt
    pub async fn respond_permission(
        &self,
        request_id: &str,
        allow: bool,
        updated_input: Option<Value>,
        deny_message: Option<&str>,
    ) -> Result<()> {
        let frame = permission_response_frame(request_id, allow, updated_input, deny_message);
        self.write_frame(&serde_json::to_vec(&frame)?).await
    }

    async fn write_frame(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(Error::ChildGone)?;
        stdin.write_all(bytes).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    pub fn id(&self) -> Option<u32> {
        match self.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Deliver a Unix signal to the child (SIGINT for abort, SIGTERM for
    /// companion teardown). No-op if the process is gone.
    #[cfg(unix)]
    pub fn signal(&self, signal: i32) {
        if let Some(pid) = self.id() {
            // SAFETY: pid was obtained from our own spawned child
            unsafe {
                libc::kill(pid as libc::pid_t, signal);
            }
        }
    }

    #[cfg(not(unix))]
    pub fn signal(&self, _signal: i32) {}

    /// SIGINT — user-initiated abort of the current turn
    pub fn interrupt(&self) {
        #[cfg(unix)]
        self.signal(libc::SIGINT);
    }

    /// SIGTERM — teardown of a companion or stuck child
    pub fn terminate(&self) {
        #[cfg(unix)]
        self.signal(libc::SIGTERM);
    }

    /// Force-kill and reap the child
    pub async fn kill(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        self.pid.store(0, Ordering::Relaxed);
        *self.stdin.lock().await = None;
    }

    /// Whether the process has been reaped (by exit or kill)
    pub async fn is_finished(&self) -> bool {
        self.child.lock().await.is_none()
    }
}
