use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agrelay_agent::{AgentChild, ChildEvent, ImagePayload, SpawnConfig};
use agrelay_logs::{LogReader, retry_sentinel};
use agrelay_types::{EventPayload, PromptRecord, PromptSource, SessionEvent};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::prompts::{self, PromptDecision};
use crate::session::{ApprovalHint, Origin, SessionRecord, SessionState};
use crate::subscribers::{SubscriberRegistry, Subscription};

/// Out-of-band callback from a terminal agent
#[derive(Debug, Clone)]
pub struct HookNotification {
    pub session_id: String,
    pub notification_type: String,
    pub message: String,
    pub cwd: Option<String>,
}

/// Options carried by a send or new-session request
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub images: Vec<ImagePayload>,
    pub permission_mode: Option<String>,
    pub model: Option<String>,
}

pub(crate) struct SessionHandle {
    session_id: String,
    record: Mutex<SessionRecord>,
}

/// Per-session owner and state authority.
///
/// Three event sources funnel in — child stdout (pump tasks), the shared
/// poller, and hook callbacks — and every state transition happens under
/// the per-session lock. The session map itself sits behind a coarse
/// daemon lock that is never held across an await.
pub struct Coordinator {
    reader: LogReader,
    subscribers: Arc<SubscriberRegistry>,
    config: RuntimeConfig,
    sessions: StdMutex<HashMap<String, Arc<SessionHandle>>>,
}

impl Coordinator {
    pub fn new(config: RuntimeConfig, subscribers: Arc<SubscriberRegistry>) -> Arc<Self> {
        Arc::new(Self {
            reader: LogReader::new(&config.log_root),
            subscribers,
            config,
            sessions: StdMutex::new(HashMap::new()),
        })
    }

    pub fn reader(&self) -> &LogReader {
        &self.reader
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ─── session map ─────────────────────────────────────────────────────────

    fn handle(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    fn ensure_handle(
        &self,
        session_id: &str,
        origin: Origin,
        project_path: Option<PathBuf>,
    ) -> Arc<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, ?origin, "creating session record");
                Arc::new(SessionHandle {
                    session_id: session_id.to_string(),
                    record: Mutex::new(SessionRecord::new(origin, project_path)),
                })
            })
            .clone()
    }

    fn watched_handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    fn emit(&self, event: SessionEvent) {
        self.subscribers.broadcast(&event);
    }

    // ─── subscriptions (C5 entry points) ─────────────────────────────────────

    /// Register a client. The subscriber immediately receives `connected`,
    /// a `heartbeat`, and a replay of every open prompt it may have missed.
    pub async fn subscribe(self: &Arc<Self>, session_id: &str) -> Subscription {
        let handle = self.ensure_handle(session_id, Origin::Terminal, None);
        {
            let mut record = handle.record.lock().await;
            if record.project_path.is_none() {
                record.project_path = self.reader.project_of_session(session_id).ok();
            }
        }

        let sub = self.subscribers.subscribe(session_id);
        self.subscribers
            .send_to(sub.client_id, SessionEvent::new(session_id, EventPayload::Connected));
        self.subscribers
            .send_to(sub.client_id, SessionEvent::new(session_id, EventPayload::Heartbeat));

        let recently_active = self
            .reader
            .is_recently_active(session_id, self.config.activity_window);
        let record = handle.record.lock().await;
        for prompt in prompts::replayable(&record) {
            if prompt.source == PromptSource::File && !recently_active {
                continue;
            }
            self.subscribers.send_to(
                sub.client_id,
                SessionEvent::new(
                    session_id,
                    EventPayload::PermissionRequest {
                        prompt: prompt.clone(),
                    },
                ),
            );
        }

        sub
    }

    pub async fn unsubscribe(&self, client_id: Uuid) {
        if let Some(session_id) = self.subscribers.unsubscribe(client_id) {
            self.maybe_drop_session(&session_id).await;
        }
    }

    async fn maybe_drop_session(&self, session_id: &str) {
        let Some(handle) = self.handle(session_id) else {
            return;
        };
        let droppable = {
            let record = handle.record.lock().await;
            record.is_droppable(self.subscribers.subscriber_count(session_id))
        };
        if droppable {
            debug!(session_id, "dropping idle session record");
            self.sessions.lock().unwrap().remove(session_id);
        }
    }

    // ─── send flows (C4) ─────────────────────────────────────────────────────

    /// Resume an existing session with a user turn (spawned path)
    pub async fn send(
        self: &Arc<Self>,
        session_id: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<()> {
        let handle = self.ensure_handle(session_id, Origin::Terminal, None);
        let mut record = handle.record.lock().await;

        if record.active_child.is_some() {
            return Err(Error::ConcurrentSend(session_id.to_string()));
        }

        let project = match record.project_path.clone() {
            Some(path) => path,
            None => {
                let path = self.reader.project_of_session(session_id)?;
                record.project_path = Some(path.clone());
                path
            }
        };

        let (tx, rx) = mpsc::channel(64);
        let spawn_config = SpawnConfig {
            cwd: project,
            resume_session_id: Some(session_id.to_string()),
            permission_mode: options.permission_mode.clone(),
            model: options.model.clone(),
            binary: self.config.agent_binary.clone(),
        };
        let child = Arc::new(AgentChild::spawn(spawn_config, tx).await?);

        record.active_child = Some(Arc::clone(&child));
        record.enter_working();
        drop(record);

        if let Err(err) = child.send(text, &options.images).await {
            self.clear_child(session_id, &child).await;
            return Err(err.into());
        }

        self.spawn_pump(session_id.to_string(), child, rx);
        Ok(())
    }

    /// Start a brand-new spawned session in a project directory. The
    /// child mints the session id; a 10 s handshake bounds the wait.
    pub async fn new_session(
        self: &Arc<Self>,
        project_path: PathBuf,
        text: &str,
        options: SendOptions,
    ) -> Result<String> {
        let (tx, mut rx) = mpsc::channel(64);
        let spawn_config = SpawnConfig {
            cwd: project_path.clone(),
            resume_session_id: None,
            permission_mode: options.permission_mode.clone(),
            model: options.model.clone(),
            binary: self.config.agent_binary.clone(),
        };
        let child = Arc::new(AgentChild::spawn(spawn_config, tx).await?);

        // Session-id handshake; frames that race ahead of it are replayed
        // through the normal pipeline once the record exists
        let mut buffered = Vec::new();
        let deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(deadline);

        let session_id = loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ChildEvent::SessionId(id)) => break id,
                    Some(ChildEvent::Exited { code }) => {
                        return Err(Error::SpawnFailed(format!(
                            "agent exited before reporting a session id (code {:?})",
                            code
                        )));
                    }
                    Some(other) => buffered.push(other),
                    None => {
                        return Err(Error::SpawnFailed(
                            "agent closed stdout before reporting a session id".to_string(),
                        ));
                    }
                },
                _ = &mut deadline => {
                    child.kill().await;
                    return Err(Error::SpawnFailed(
                        "timed out waiting for the session-id handshake".to_string(),
                    ));
                }
            }
        };

        info!(%session_id, "new spawned session");
        let handle = self.ensure_handle(&session_id, Origin::Spawned, Some(project_path));
        {
            let mut record = handle.record.lock().await;
            record.active_child = Some(Arc::clone(&child));
            record.enter_working();
        }

        if let Err(err) = child.send(text, &options.images).await {
            self.clear_child(&session_id, &child).await;
            return Err(err.into());
        }

        for event in buffered {
            self.handle_child_event(&session_id, &child, event).await;
        }
        self.spawn_pump(session_id.clone(), child, rx);
        Ok(session_id)
    }

    /// Drive one child's events until result/exit or the send ceiling
    fn spawn_pump(
        self: &Arc<Self>,
        session_id: String,
        child: Arc<AgentChild>,
        mut rx: mpsc::Receiver<ChildEvent>,
    ) {
        let coordinator = Arc::clone(self);
        let ceiling = self.config.send_ceiling;
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(ceiling);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => {
                            let done = coordinator
                                .handle_child_event(&session_id, &child, event)
                                .await;
                            if done {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = &mut deadline => {
                        warn!(%session_id, "send ceiling reached; killing child");
                        child.kill().await;
                        break;
                    }
                }
            }

            coordinator.clear_child(&session_id, &child).await;
        });
    }

    /// One stdout event from an owned child. Returns true when the pump
    /// should stop (turn finished or process gone).
    async fn handle_child_event(
        self: &Arc<Self>,
        session_id: &str,
        child: &Arc<AgentChild>,
        event: ChildEvent,
    ) -> bool {
        match event {
            // Resume children echo the id they were given
            ChildEvent::SessionId(_) => false,

            ChildEvent::Chat(message) => {
                let Some(handle) = self.handle(session_id) else {
                    return false;
                };
                let mut record = handle.record.lock().await;
                record.last_activity_at = Instant::now();
                if record.emitted_message_ids.insert(message.id.clone()) {
                    self.emit(SessionEvent::new(
                        session_id,
                        EventPayload::Message { message },
                    ));
                }
                false
            }

            ChildEvent::Permission(request) => {
                let Some(handle) = self.handle(session_id) else {
                    return false;
                };
                let mut record = handle.record.lock().await;
                let prompt = prompts::make_prompt(
                    session_id,
                    &request.request_id,
                    &request.tool_use_id,
                    &request.tool_name,
                    request.input,
                    request.suggestions,
                    PromptSource::Spawned,
                    self.config.prompt_ttl,
                );
                self.admit_prompt(&mut record, prompt, Some(Arc::clone(child)))
                    .await;
                false
            }

            ChildEvent::Result { is_error } => {
                if let Some(handle) = self.handle(session_id) {
                    let mut record = handle.record.lock().await;
                    record.completion_emitted = true;
                    record.state = if record.prompts.is_empty() {
                        SessionState::Idle
                    } else {
                        SessionState::AwaitingUser
                    };
                    drop(record);
                    if is_error {
                        debug!(session_id, "turn completed with error result");
                    }
                    self.emit(SessionEvent::new(
                        session_id,
                        EventPayload::ProcessingComplete,
                    ));
                }
                true
            }

            ChildEvent::Exited { code } => {
                if let Some(handle) = self.handle(session_id) {
                    let mut record = handle.record.lock().await;
                    let is_current = record
                        .active_child
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, child));
                    if is_current {
                        record.state = SessionState::Closing;
                    }
                }
                debug!(session_id, ?code, "agent child exited");
                true
            }
        }
    }

    /// Detach a finished or dead child and settle the session state.
    /// A crash mid-turn downgrades to Idle with no synthetic error event.
    async fn clear_child(&self, session_id: &str, child: &Arc<AgentChild>) {
        child.kill().await;
        let Some(handle) = self.handle(session_id) else {
            return;
        };
        {
            let mut record = handle.record.lock().await;
            let is_current = record
                .active_child
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, child));
            if is_current {
                record.active_child = None;
            }
            if record.active_child.is_none() {
                record.state = if record.prompts.is_empty() {
                    SessionState::Idle
                } else {
                    SessionState::AwaitingUser
                };
            }
        }
        self.maybe_drop_session(session_id).await;
    }

    // ─── permission prompts (C3 + C4) ────────────────────────────────────────

    /// Apply the policy chain to a newly observed prompt and act on the
    /// outcome. Caller holds the session lock.
    async fn admit_prompt(
        self: &Arc<Self>,
        record: &mut SessionRecord,
        prompt: PromptRecord,
        child: Option<Arc<AgentChild>>,
    ) {
        match prompts::decide(record, &prompt, Utc::now()) {
            PromptDecision::Suppress => {}

            PromptDecision::AutoApprove => match prompt.source {
                PromptSource::Spawned => {
                    let target = child.or_else(|| record.active_child.clone());
                    if let Some(child) = target {
                        debug!(
                            session_id = %prompt.session_id,
                            tool = %prompt.tool_name,
                            "auto-approving prompt"
                        );
                        let _ = child
                            .respond_permission(&prompt.request_id, true, None, None)
                            .await;
                    }
                }
                PromptSource::Hook | PromptSource::File => {
                    record.retried_prompt_ids.insert(prompt.request_id.clone());
                    record.being_resumed_for_approval = true;
                    self.spawn_companion(prompt, None, false);
                }
            },

            PromptDecision::Surface => {
                let session_id = prompt.session_id.clone();
                let request_id = prompt.request_id.clone();
                record.prompts.push(prompt.clone());
                record.settle_after_prompts();
                self.emit(SessionEvent::new(
                    &session_id,
                    EventPayload::PermissionRequest { prompt },
                ));

                let coordinator = Arc::clone(self);
                let ttl = self.config.prompt_ttl;
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    coordinator.on_prompt_timeout(&session_id, &request_id).await;
                });
            }
        }
    }

    /// Answer an open prompt on behalf of the user
    pub async fn respond_permission(
        self: &Arc<Self>,
        session_id: &str,
        request_id: &str,
        allow: bool,
        allow_all: bool,
        tool_name: Option<String>,
        updated_input: Option<Value>,
    ) -> Result<()> {
        let handle = self
            .handle(session_id)
            .ok_or_else(|| Error::PromptNotFound(request_id.to_string()))?;
        let mut record = handle.record.lock().await;
        let Some(prompt) = record.open_prompt(request_id).cloned() else {
            // Repeating a denial is a no-op; anything else against a
            // closed prompt is the caller's error
            if !allow && record.denied_prompt_ids.contains(request_id) {
                return Ok(());
            }
            return Err(Error::PromptNotFound(request_id.to_string()));
        };

        if allow && allow_all {
            let name = tool_name.unwrap_or_else(|| prompt.tool_name.clone());
            record.allowed_tool_names.insert(name);
        }

        match prompt.source {
            PromptSource::Spawned => {
                let child = record.active_child.clone();
                if allow {
                    record.pending_approval_hint = Some(ApprovalHint {
                        tool_name: prompt.tool_name.clone(),
                        tool_input: prompt.tool_input.clone(),
                        expires_at: Utc::now()
                            + chrono::Duration::from_std(self.config.approval_hint_ttl)
                                .unwrap_or(chrono::Duration::seconds(30)),
                    });
                } else {
                    record.denied_prompt_ids.insert(request_id.to_string());
                }
                record.remove_prompt(request_id);
                record.settle_after_prompts();
                drop(record);

                if let Some(child) = child {
                    child
                        .respond_permission(request_id, allow, updated_input, None)
                        .await?;
                }
                self.emit(SessionEvent::new(
                    session_id,
                    EventPayload::PermissionResolved {
                        request_id: request_id.to_string(),
                        tool_use_id: prompt.tool_use_id.clone(),
                    },
                ));
                Ok(())
            }

            PromptSource::Hook | PromptSource::File => {
                if allow {
                    // The terminal agent cannot be answered directly; a
                    // resume companion re-raises the call and approves it.
                    record.retried_prompt_ids.insert(request_id.to_string());
                    record.remove_prompt(request_id);
                    record.being_resumed_for_approval = true;
                    record.settle_after_prompts();
                    drop(record);
                    self.spawn_companion(prompt, updated_input, true);
                } else {
                    // Advisory: the terminal agent stays blocked in its
                    // own terminal, but this prompt is done here.
                    record.denied_prompt_ids.insert(request_id.to_string());
                    record.remove_prompt(request_id);
                    record.settle_after_prompts();
                    drop(record);
                    self.emit(SessionEvent::new(
                        session_id,
                        EventPayload::PermissionResolved {
                            request_id: request_id.to_string(),
                            tool_use_id: prompt.tool_use_id.clone(),
                        },
                    ));
                }
                Ok(())
            }
        }
    }

    /// ApproveViaRetry: spawn a companion against the session, send the
    /// retry sentinel, silently approve the re-raised prompt, tear down.
    fn spawn_companion(
        self: &Arc<Self>,
        prompt: PromptRecord,
        updated_input: Option<Value>,
        announce_resolution: bool,
    ) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let session_id = prompt.session_id.clone();
            if let Err(err) = coordinator
                .run_companion(&prompt, updated_input)
                .await
            {
                warn!(%session_id, error = %err, "retry companion failed");
            }

            if let Some(handle) = coordinator.handle(&session_id) {
                let mut record = handle.record.lock().await;
                record.being_resumed_for_approval = false;
                // The original call is gone from the log's pending set by
                // now; forget it so the poller does not resolve it twice
                record.pending_prompt_ids.remove(&prompt.tool_use_id);
                record.settle_after_prompts();
            }

            if announce_resolution {
                coordinator.emit(SessionEvent::new(
                    &session_id,
                    EventPayload::PermissionResolved {
                        request_id: prompt.request_id.clone(),
                        tool_use_id: prompt.tool_use_id.clone(),
                    },
                ));
            }
            coordinator.maybe_drop_session(&session_id).await;
        });
    }

    async fn run_companion(
        self: &Arc<Self>,
        prompt: &PromptRecord,
        updated_input: Option<Value>,
    ) -> Result<()> {
        let session_id = &prompt.session_id;
        let handle = self
            .handle(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;

        let project = {
            let record = handle.record.lock().await;
            record.project_path.clone()
        };
        let project = match project {
            Some(path) => path,
            None => self.reader.project_of_session(session_id)?,
        };

        let (tx, mut rx) = mpsc::channel(64);
        let spawn_config = SpawnConfig {
            cwd: project,
            resume_session_id: Some(session_id.clone()),
            permission_mode: None,
            model: None,
            binary: self.config.agent_binary.clone(),
        };
        let child = Arc::new(AgentChild::spawn(spawn_config, tx).await?);

        {
            let mut record = handle.record.lock().await;
            record.active_child = Some(Arc::clone(&child));
        }

        let outcome = async {
            child.send(&retry_sentinel(&prompt.tool_name), &[]).await?;

            let budget = tokio::time::sleep(self.config.companion_budget);
            tokio::pin!(budget);

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(ChildEvent::Permission(request)) => {
                            if request.tool_name == prompt.tool_name {
                                // Hand the user's answer through for the
                                // question tool; every other tool re-runs
                                // with the agent's fresh input
                                let input = if prompts::file_prompt_eligible(&prompt.tool_name) {
                                    updated_input.clone()
                                } else {
                                    None
                                };
                                child
                                    .respond_permission(&request.request_id, true, input, None)
                                    .await?;
                            } else {
                                // Unrelated prompt raised mid-retry; the
                                // companion has no mandate to answer it
                                child
                                    .respond_permission(
                                        &request.request_id,
                                        false,
                                        None,
                                        Some("Not the retried tool call"),
                                    )
                                    .await?;
                            }
                        }
                        Some(ChildEvent::Result { .. }) | Some(ChildEvent::Exited { .. }) | None => {
                            break;
                        }
                        Some(_) => {}
                    },
                    _ = &mut budget => {
                        warn!(%session_id, "companion budget exhausted; terminating");
                        child.terminate();
                        break;
                    }
                }
            }
            Ok::<(), Error>(())
        }
        .await;

        child.kill().await;
        {
            let mut record = handle.record.lock().await;
            let is_current = record
                .active_child
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &child));
            if is_current {
                record.active_child = None;
            }
        }

        outcome
    }

    /// TTL expiry for a surfaced prompt
    async fn on_prompt_timeout(self: &Arc<Self>, session_id: &str, request_id: &str) {
        let Some(handle) = self.handle(session_id) else {
            return;
        };
        let mut record = handle.record.lock().await;
        let Some(prompt) = record.open_prompt(request_id).cloned() else {
            return; // already answered or resolved
        };

        self.emit(SessionEvent::new(
            session_id,
            EventPayload::PermissionTimeout {
                request_id: request_id.to_string(),
            },
        ));

        match prompt.source {
            PromptSource::Spawned => {
                // The child is stuck on a prompt nobody answered
                record.remove_prompt(request_id);
                let child = record.active_child.clone();
                record.settle_after_prompts();
                drop(record);

                self.emit(SessionEvent::new(
                    session_id,
                    EventPayload::PermissionResolved {
                        request_id: request_id.to_string(),
                        tool_use_id: prompt.tool_use_id.clone(),
                    },
                ));
                if let Some(child) = child {
                    warn!(session_id, "prompt timed out; killing stuck child");
                    child.kill().await;
                }
            }
            // Hook/file prompts stay answerable after the timeout; the
            // record survives for re-display on reconnect
            PromptSource::Hook | PromptSource::File => {}
        }
    }

    // ─── abort ───────────────────────────────────────────────────────────────

    pub async fn abort(&self, session_id: &str) -> Result<()> {
        let handle = self
            .handle(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let record = handle.record.lock().await;
        if let Some(child) = &record.active_child {
            child.interrupt();
            self.emit(SessionEvent::new(session_id, EventPayload::SessionAborted));
        }
        Ok(())
    }

    // ─── hook callbacks ──────────────────────────────────────────────────────

    pub async fn hook_notification(self: &Arc<Self>, note: HookNotification) -> Result<()> {
        let project = note.cwd.as_ref().map(PathBuf::from);
        let handle = self.ensure_handle(&note.session_id, Origin::Terminal, project);
        let mut record = handle.record.lock().await;

        if record.state == SessionState::Idle {
            record.enter_working();
        } else {
            record.last_activity_at = Instant::now();
        }

        if note.notification_type != "permission_prompt" {
            debug!(
                session_id = %note.session_id,
                kind = %note.notification_type,
                "hook notification (activity only)"
            );
            return Ok(());
        }

        let Some(tool_name) = tool_name_from_hook_message(&note.message) else {
            warn!(message = %note.message, "hook prompt without a parseable tool name");
            return Ok(());
        };

        // The log usually already carries the blocked tool_use; anchor the
        // prompt to it so out-of-band resolution works. If the log has not
        // caught up yet, mint an id and let the next poll reconcile.
        let anchored = self.reader.read(&note.session_id).ok().and_then(|log| {
            log.pending_tool_calls
                .iter()
                .rev()
                .find(|call| call.name == tool_name)
                .map(|call| (call.id.clone(), call.input.clone()))
        });
        let (tool_use_id, input) =
            anchored.unwrap_or_else(|| (Uuid::new_v4().to_string(), Value::Null));

        let prompt = prompts::make_prompt(
            &note.session_id,
            &tool_use_id,
            &tool_use_id,
            &tool_name,
            input,
            None,
            PromptSource::Hook,
            self.config.prompt_ttl,
        );
        self.admit_prompt(&mut record, prompt, None).await;
        Ok(())
    }

    // ─── polling loop (C4, 1 Hz) ─────────────────────────────────────────────

    /// One tick over every watched session. Each session's budget is
    /// independent; a session mid-retry is skipped entirely.
    pub async fn poll_tick(self: &Arc<Self>) {
        for handle in self.watched_handles() {
            self.poll_session(&handle).await;
        }

        // Lifecycle sweep: drop records nothing references anymore
        for handle in self.watched_handles() {
            self.maybe_drop_session(&handle.session_id).await;
        }
    }

    async fn poll_session(self: &Arc<Self>, handle: &Arc<SessionHandle>) {
        let session_id = handle.session_id.clone();

        {
            let record = handle.record.lock().await;
            if record.being_resumed_for_approval {
                return;
            }
        }

        let Ok(log) = self.reader.read(&session_id) else {
            return;
        };
        let recently_active = self
            .reader
            .is_recently_active(&session_id, self.config.activity_window);

        let mut record = handle.record.lock().await;
        if record.being_resumed_for_approval {
            return;
        }

        // New normalized messages since the last scan. The counter is
        // monotone: a shorter read (torn file) never re-emits. Messages
        // already delivered from child stdout advance the counter without
        // counting as fresh activity.
        let total = log.messages.len();
        if total > record.last_log_message_count {
            let fresh: Vec<_> = log.messages[record.last_log_message_count..].to_vec();
            record.last_log_message_count = total;

            let mut emitted_any = false;
            for message in fresh {
                if record.emitted_message_ids.insert(message.id.clone()) {
                    emitted_any = true;
                    self.emit(SessionEvent::new(
                        &session_id,
                        EventPayload::Message { message },
                    ));
                }
            }

            if emitted_any {
                if record.state == SessionState::Idle {
                    record.enter_working();
                }
                record.last_activity_at = Instant::now();
                record.completion_emitted = false;
            }
        }

        let current_pending: HashSet<String> = log
            .pending_tool_calls
            .iter()
            .map(|call| call.id.clone())
            .collect();

        // Prompts whose tool call completed out-of-band (typically the
        // user answered in the terminal)
        let resolved: Vec<PromptRecord> = record
            .prompts
            .iter()
            .filter(|p| {
                record.pending_prompt_ids.contains(&p.tool_use_id)
                    && !current_pending.contains(&p.tool_use_id)
            })
            .cloned()
            .collect();
        for prompt in resolved {
            record.remove_prompt(&prompt.request_id);
            self.emit(SessionEvent::new(
                &session_id,
                EventPayload::PermissionResolved {
                    request_id: prompt.request_id,
                    tool_use_id: prompt.tool_use_id,
                },
            ));
        }
        record.settle_after_prompts();

        // Edge-triggered file-source prompts for allowlisted tools
        if recently_active {
            let fresh_pending: Vec<_> = log
                .pending_tool_calls
                .iter()
                .filter(|call| {
                    prompts::file_prompt_eligible(&call.name)
                        && !record.pending_prompt_ids.contains(&call.id)
                })
                .cloned()
                .collect();
            for call in fresh_pending {
                let prompt = prompts::make_prompt(
                    &session_id,
                    &call.id,
                    &call.id,
                    &call.name,
                    call.input,
                    None,
                    PromptSource::File,
                    self.config.prompt_ttl,
                );
                self.admit_prompt(&mut record, prompt, None).await;
            }
        }

        record.pending_prompt_ids = current_pending;

        // Inactivity-completion heuristic: a terminal session whose log
        // went quiet with nothing open has finished its turn
        if record.state == SessionState::Working
            && record.prompts.is_empty()
            && record.active_child.is_none()
            && !record.completion_emitted
            && record.last_activity_at.elapsed() >= self.config.inactivity_window
        {
            record.completion_emitted = true;
            record.state = SessionState::Idle;
            self.emit(SessionEvent::new(
                &session_id,
                EventPayload::ProcessingComplete,
            ));
        }
    }

    // ─── shutdown ────────────────────────────────────────────────────────────

    /// Kill every owned child and close every subscriber stream
    pub async fn shutdown(&self) {
        for handle in self.watched_handles() {
            let child = {
                let mut record = handle.record.lock().await;
                record.active_child.take()
            };
            if let Some(child) = child {
                child.terminate();
                child.kill().await;
            }
        }
        self.subscribers.close_all();
    }

    /// Introspection for status endpoints and tests
    pub async fn session_state(&self, session_id: &str) -> Option<SessionState> {
        let handle = self.handle(session_id)?;
        let record = handle.record.lock().await;
        Some(record.state)
    }

    pub async fn open_prompt_count(&self, session_id: &str) -> usize {
        match self.handle(session_id) {
            Some(handle) => handle.record.lock().await.prompts.len(),
            None => 0,
        }
    }
}

/// Extract the tool name from a hook notification message, e.g.
/// "Claude needs your permission to use Bash"
fn tool_name_from_hook_message(message: &str) -> Option<String> {
    let name = match message.split_once("permission to use ") {
        Some((_, rest)) => rest,
        None => message.rsplit(char::is_whitespace).next()?,
    };
    let name = name.trim().trim_end_matches(['.', '!', ':']);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
