//! The per-session runner: a cooperative state machine that serializes
//! commands through a bounded queue, drives the model↔tool loop, parks tool
//! calls on the policy approval gate, and answers slash commands.
//!
//! One command is processed at a time. `stopped` is terminal; submissions
//! to a stopped runner fail, and a full queue pushes back on the submitter
//! instead of dropping anything.

use std::sync::Arc;
use std::sync::Mutex;

use async_channel::Receiver;
use async_channel::Sender;
use async_channel::TrySendError;
use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::activity::ActivityTracker;
use crate::audit::build_entry;
use crate::client::ChatRequest;
use crate::client::ModelClient;
use crate::config::CALL_ID_PARAM;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::error::StewardErr;
use crate::orchestrator::Orchestrator;
use crate::session::Session;
use crate::sinks::PushNotifier;
use crate::stores::ConversationStore;
use crate::stores::PolicyStore;
use crate::tools::ToolRegistry;
use steward_policy::PolicyEngine;
use steward_policy::ToolCallSpec;
use steward_protocol::ApprovalResponse;
use steward_protocol::ApprovalStatus;
use steward_protocol::AuditDecision;
use steward_protocol::CommandKind;
use steward_protocol::Event;
use steward_protocol::EventKind;
use steward_protocol::Message;
use steward_protocol::PendingApproval;
use steward_protocol::RunnerState;
use steward_protocol::SessionCommand;
use steward_protocol::SlashCommand;
use steward_protocol::SlashParse;
use steward_protocol::ToolCallRequest;
use steward_protocol::ToolResult;
use steward_protocol::parse_slash;

const EVENT_QUEUE_CAPACITY: usize = 64;
const TOOL_PREVIEW_BYTES: usize = 1024;

/// Collaborators a runner needs. All are shared; none are owned.
pub struct RunnerDeps {
    pub model: Arc<dyn ModelClient>,
    pub tools: Arc<ToolRegistry>,
    pub store: Arc<dyn ConversationStore>,
    pub policy_engine: Arc<PolicyEngine>,
    pub policy_store: Option<Arc<dyn PolicyStore>>,
    pub orchestrator: Option<Arc<dyn Orchestrator>>,
    pub push: Option<Arc<dyn PushNotifier>>,
}

pub struct SessionRunner {
    session: Mutex<Session>,
    session_id: String,
    config: RuntimeConfig,
    deps: RunnerDeps,

    conversation: Mutex<Vec<Message>>,
    state: Arc<Mutex<RunnerState>>,
    last_active: Mutex<DateTime<Utc>>,

    events_tx: Sender<Event>,
    cmd_tx: Sender<SessionCommand>,
    approval_tx: Sender<ApprovalResponse>,
    approval_rx: Receiver<ApprovalResponse>,

    /// Non-empty exactly while one tool call is parked on the policy gate.
    pending_approval: Mutex<Option<PendingApproval>>,
    /// Cancellation scope of the in-flight turn, if any.
    turn_cancel: Mutex<Option<CancellationToken>>,
    /// Cancelled once, on stop. Everything the runner spawned watches it.
    shutdown: CancellationToken,

    activity: ActivityTracker,
}

impl SessionRunner {
    /// Construct the runner, load (or start) its conversation, and spawn
    /// the command worker plus the max-runtime timer. The returned receiver
    /// carries every event the runner emits.
    pub async fn spawn(
        session: Session,
        config: RuntimeConfig,
        deps: RunnerDeps,
    ) -> (Arc<Self>, Receiver<Event>) {
        let (events_tx, events_rx) = async_channel::bounded(EVENT_QUEUE_CAPACITY);
        let (cmd_tx, cmd_rx) = async_channel::bounded(config.command_queue_capacity);
        // Capacity 1: a second response with no wait consuming the first
        // fails fast instead of queueing.
        let (approval_tx, approval_rx) = async_channel::bounded(1);

        let session_id = session.id.clone();
        let mut conversation = match deps.store.load(&session_id).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(%session_id, %err, "conversation load failed, starting fresh");
                Vec::new()
            }
        };
        if conversation.is_empty() {
            let system = Message::system(config.system_prompt.clone());
            if let Err(err) = deps.store.append(&session_id, &system).await {
                warn!(%session_id, %err, "failed to persist system prompt");
            }
            conversation.push(system);
        }

        let runner = Arc::new(Self {
            session: Mutex::new(session),
            session_id,
            conversation: Mutex::new(conversation),
            state: Arc::new(Mutex::new(RunnerState::Idle)),
            last_active: Mutex::new(Utc::now()),
            events_tx,
            cmd_tx,
            approval_tx,
            approval_rx,
            pending_approval: Mutex::new(None),
            turn_cancel: Mutex::new(None),
            shutdown: CancellationToken::new(),
            activity: ActivityTracker::new(),
            config,
            deps,
        });

        {
            let worker = Arc::clone(&runner);
            tokio::spawn(async move { worker.command_worker(cmd_rx).await });
        }
        if let Some(max_runtime) = runner.config.max_runtime {
            let timer = Arc::clone(&runner);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(max_runtime) => {
                        timer
                            .append_message(Message::system(format!(
                                "Session timed out after {max_runtime:?}"
                            )))
                            .await;
                        timer.stop().await;
                    }
                    _ = timer.shutdown.cancelled() => {}
                }
            });
        }

        (runner, events_rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session(&self) -> Session {
        self.session
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn state(&self) -> RunnerState {
        self.state.lock().map(|s| *s).unwrap_or(RunnerState::Error)
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
            .lock()
            .map(|t| *t)
            .unwrap_or_else(|_| Utc::now())
    }

    pub fn conversation(&self) -> Vec<Message> {
        self.conversation
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn timeline(&self) -> Vec<crate::activity::TimelineEntry> {
        self.activity.timeline()
    }

    /// Reapable: no activity for longer than the idle timeout, unless the
    /// session is deliberately paused.
    pub fn is_idle(&self) -> bool {
        if self.state() == RunnerState::Paused {
            return false;
        }
        match (Utc::now() - self.last_active()).to_std() {
            Ok(idle_for) => idle_for > self.config.idle_timeout,
            Err(_) => false,
        }
    }

    /// Enqueue a command. Fails on a stopped runner and on a full queue.
    pub fn submit(&self, command: SessionCommand) -> Result<()> {
        if self.state() == RunnerState::Stopped {
            return Err(StewardErr::SessionStopped(self.session_id.clone()));
        }
        self.touch();
        match self.cmd_tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(StewardErr::QueueFull(self.session_id.clone())),
            Err(TrySendError::Closed(_)) => {
                Err(StewardErr::SessionStopped(self.session_id.clone()))
            }
        }
    }

    /// Idempotent. Cancels the in-flight turn, expires any parked approval,
    /// and wakes every task watching the shutdown token.
    pub async fn stop(&self) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if *state == RunnerState::Stopped {
                return;
            }
            *state = RunnerState::Stopped;
        }
        info!(session_id = %self.session_id, "runner stopping");
        if let Ok(mut slot) = self.turn_cancel.lock()
            && let Some(token) = slot.take()
        {
            token.cancel();
        }
        self.expire_pending_approval().await;
        self.shutdown.cancel();
        self.emit(EventKind::StateChanged, json!({"state": RunnerState::Stopped}))
            .await;
    }

    /// The command worker. Turns (input, slash) run one at a time as
    /// spawned tasks; while one is in flight the worker keeps consuming
    /// control commands, because the turn itself may be blocked waiting
    /// for exactly such a command (an approval response). Turns queued
    /// behind an active one start strictly in arrival order.
    async fn command_worker(self: Arc<Self>, cmd_rx: Receiver<SessionCommand>) {
        let mut active: Option<tokio::task::JoinHandle<()>> = None;
        let mut backlog: std::collections::VecDeque<SessionCommand> =
            std::collections::VecDeque::new();

        loop {
            if active.as_ref().is_some_and(|turn| turn.is_finished()) {
                active = None;
            }
            if active.is_none()
                && let Some(next) = backlog.pop_front()
            {
                active = Some(self.spawn_turn(next));
                continue;
            }

            tokio::select! {
                received = cmd_rx.recv() => {
                    let Ok(command) = received else { break };
                    debug!(session_id = %self.session_id, kind = ?command.kind, "command");
                    self.touch();
                    match command.kind {
                        CommandKind::Approval | CommandKind::Pause | CommandKind::Resume => {
                            self.dispatch_control(command).await;
                        }
                        CommandKind::Input | CommandKind::Slash => {
                            if active.is_some() {
                                backlog.push_back(command);
                            } else {
                                active = Some(self.spawn_turn(command));
                            }
                        }
                    }
                }
                // Re-check the active turn at the same cadence the state
                // watcher uses.
                _ = tokio::time::sleep(self.config.state_watch_interval),
                    if active.is_some() || !backlog.is_empty() => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
        debug!(session_id = %self.session_id, "command worker exited");
    }

    fn spawn_turn(self: &Arc<Self>, command: SessionCommand) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match command.kind {
                CommandKind::Input => this.run_input(command.content).await,
                CommandKind::Slash => this.handle_slash(command.content).await,
                _ => {}
            }
        })
    }

    async fn dispatch_control(&self, command: SessionCommand) {
        match command.kind {
            CommandKind::Approval => self.handle_approval(&command.content).await,
            CommandKind::Pause => {
                if self.state() != RunnerState::Stopped {
                    self.set_state(RunnerState::Paused).await;
                }
            }
            CommandKind::Resume => {
                if self.state() == RunnerState::Paused {
                    self.set_state(RunnerState::Idle).await;
                } else {
                    self.emit(
                        EventKind::Warning,
                        json!({"message": "resume is only valid from paused"}),
                    )
                    .await;
                }
            }
            _ => {}
        }
    }

    async fn set_state(&self, next: RunnerState) {
        if let Ok(mut state) = self.state.lock() {
            if *state == next {
                return;
            }
            *state = next;
        }
        self.touch();
        self.emit(EventKind::StateChanged, json!({"state": next}))
            .await;
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = Utc::now();
        }
        if let Ok(mut session) = self.session.lock() {
            session.touch();
        }
    }

    async fn emit(&self, kind: EventKind, data: Value) {
        let event = Event::now(kind, self.session_id.clone(), data);
        // A dropped receiver must never wedge the runner.
        if self.events_tx.try_send(event).is_err() {
            debug!(session_id = %self.session_id, "event queue full or closed, dropping event");
        }
    }

    async fn append_message(&self, message: Message) {
        if let Ok(mut conversation) = self.conversation.lock() {
            conversation.push(message.clone());
        }
        if let Err(err) = self.deps.store.append(&self.session_id, &message).await {
            warn!(session_id = %self.session_id, %err, "failed to persist message");
        }
        self.emit(EventKind::MessageCreated, json!({"message": message}))
            .await;
    }

    // ------------------------------------------------------------------
    // The conversation loop
    // ------------------------------------------------------------------

    async fn run_input(&self, text: String) {
        self.append_message(Message::user(text)).await;
        self.set_state(RunnerState::Processing).await;

        let turn = self.shutdown.child_token();
        if let Ok(mut slot) = self.turn_cancel.lock() {
            *slot = Some(turn.clone());
        }
        let watcher = self.spawn_state_watcher(turn.clone());

        for iteration in 0..self.config.max_iterations {
            if turn.is_cancelled() {
                break;
            }
            let request = ChatRequest {
                messages: self.conversation(),
                tools: self.deps.tools.schemas(),
            };
            let reply = match self.deps.model.complete(&turn, request).await {
                Ok(reply) => reply,
                Err(err) => {
                    // A pause or stop cancels the scope mid-call; that is
                    // not a model failure.
                    if turn.is_cancelled() || matches!(err, StewardErr::Cancelled) {
                        debug!(session_id = %self.session_id, "turn cancelled");
                        break;
                    }
                    warn!(session_id = %self.session_id, %err, "model call failed");
                    self.emit(EventKind::Error, json!({"message": err.to_string()}))
                        .await;
                    self.set_state(RunnerState::Error).await;
                    break;
                }
            };

            if reply.tool_calls.is_empty() {
                self.append_message(Message::Assistant {
                    content: reply.content,
                    reasoning: reply.reasoning,
                    tool_calls: Vec::new(),
                })
                .await;
                break;
            }

            debug!(
                session_id = %self.session_id,
                iteration,
                calls = reply.tool_calls.len(),
                "model requested tools"
            );
            self.append_message(Message::Assistant {
                content: reply.content,
                reasoning: reply.reasoning,
                tool_calls: reply.tool_calls.clone(),
            })
            .await;
            for call in reply.tool_calls {
                if turn.is_cancelled() {
                    break;
                }
                self.handle_tool_call(call, &turn).await;
            }
        }

        turn.cancel();
        watcher.abort();
        if let Ok(mut slot) = self.turn_cancel.lock() {
            *slot = None;
        }
        if self.state() == RunnerState::Processing {
            self.set_state(RunnerState::Idle).await;
        }
    }

    /// Polls the runner state during a turn; pausing or stopping the
    /// session cancels the in-flight model/tool call cooperatively.
    fn spawn_state_watcher(&self, turn: CancellationToken) -> tokio::task::JoinHandle<()> {
        let interval = self.config.state_watch_interval;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = turn.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let current = state.lock().map(|s| *s).unwrap_or(RunnerState::Stopped);
                        if matches!(current, RunnerState::Paused | RunnerState::Stopped) {
                            turn.cancel();
                            break;
                        }
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Tool calls
    // ------------------------------------------------------------------

    async fn handle_tool_call(&self, call: ToolCallRequest, turn: &CancellationToken) {
        let started = std::time::Instant::now();
        self.emit(
            EventKind::ToolStarted,
            json!({"call_id": call.id, "tool": call.name, "arguments": call.arguments}),
        )
        .await;

        let mut params: Value = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| json!({"raw": call.arguments}));
        if !params.is_object() {
            params = json!({"raw": params});
        }

        // Interactive shells have no terminal to attach to; refuse before
        // the pipeline ever sees the call.
        if call.name == "run_shell"
            && params
                .get("interactive")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        {
            let message = "interactive shells are forbidden in headless mode";
            self.finish_tool_call(
                &call,
                ToolResult::failure(message),
                AuditDecision::Rejected,
                "system",
                None,
                0,
                started,
            )
            .await;
            return;
        }

        self.clamp_exec_timeout(&call.name, &mut params);

        let evaluation = self.deps.policy_engine.evaluate(&ToolCallSpec {
            name: call.name.clone(),
            input: params.clone(),
            session_id: self.session_id.clone(),
            category: None,
        });
        let forced = self.config.tool_policy.require_approval.contains(&call.name);

        let (decision, decided_by) = if evaluation.requires_approval || forced {
            match self.wait_for_approval(&call, &evaluation, turn).await {
                ApprovalOutcome::Approved => (AuditDecision::Approved, "operator".to_string()),
                ApprovalOutcome::Rejected(reason) => {
                    let message = match reason {
                        Some(reason) => format!("approval rejected: {reason}"),
                        None => "approval rejected by operator".to_string(),
                    };
                    self.finish_tool_call(
                        &call,
                        ToolResult::failure(message),
                        AuditDecision::Rejected,
                        "operator",
                        Some(&call.id),
                        evaluation.risk_score,
                        started,
                    )
                    .await;
                    return;
                }
                ApprovalOutcome::Expired => {
                    self.finish_tool_call(
                        &call,
                        ToolResult::failure("approval expired before a decision arrived"),
                        AuditDecision::Expired,
                        "system",
                        Some(&call.id),
                        evaluation.risk_score,
                        started,
                    )
                    .await;
                    return;
                }
            }
        } else {
            (AuditDecision::Auto, "policy".to_string())
        };

        if let Some(map) = params.as_object_mut() {
            map.insert(CALL_ID_PARAM.to_string(), json!(call.id));
        }
        let result = match self
            .deps
            .tools
            .execute(
                turn.child_token(),
                Some(self.session_id.clone()),
                &call.name,
                params,
            )
            .await
        {
            Ok(result) => result,
            Err(err) => ToolResult::failure(err.to_string()),
        };

        let approval_id = matches!(decision, AuditDecision::Approved).then_some(call.id.as_str());
        self.finish_tool_call(
            &call,
            result,
            decision,
            &decided_by,
            approval_id,
            evaluation.risk_score,
            started,
        )
        .await;
    }

    /// Clamp a model-provided `timeout_seconds` to the session's max exec
    /// time for the tools that honor it.
    fn clamp_exec_timeout(&self, tool: &str, params: &mut Value) {
        if !matches!(tool, "run_shell" | "run_tests") {
            return;
        }
        let max_secs = self.config.shell.max_exec_time.as_secs();
        if let Some(map) = params.as_object_mut()
            && let Some(requested) = map.get("timeout_seconds").and_then(Value::as_u64)
            && requested > max_secs
        {
            map.insert("timeout_seconds".to_string(), json!(max_secs));
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_tool_call(
        &self,
        call: &ToolCallRequest,
        result: ToolResult,
        decision: AuditDecision,
        decided_by: &str,
        approval_id: Option<&str>,
        risk_score: i64,
        started: std::time::Instant,
    ) {
        let serialized = serde_json::to_string(&result)
            .unwrap_or_else(|_| r#"{"success":false,"error":"unserializable result"}"#.to_string());
        self.append_message(Message::ToolResponse {
            call_id: call.id.clone(),
            content: serialized.clone(),
        })
        .await;

        let preview: String = serialized.chars().take(TOOL_PREVIEW_BYTES).collect();
        self.emit(
            EventKind::ToolCompleted,
            json!({
                "call_id": call.id,
                "tool": call.name,
                "success": result.success,
                "preview": preview,
            }),
        )
        .await;

        self.activity.record(
            &call.id,
            &call.name,
            result.error.as_deref().unwrap_or("ok"),
            result.success,
        );

        if let Some(store) = &self.deps.policy_store {
            let entry = build_entry(
                &self.session_id,
                approval_id,
                &call.name,
                &call.arguments,
                &serialized,
                risk_score,
                decision,
                decided_by,
                started.elapsed().as_millis() as u64,
            );
            if let Err(err) = store.log_tool_execution(&entry).await {
                warn!(session_id = %self.session_id, %err, "audit write failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------

    async fn wait_for_approval(
        &self,
        call: &ToolCallRequest,
        evaluation: &steward_policy::Evaluation,
        turn: &CancellationToken,
    ) -> ApprovalOutcome {
        let pending = PendingApproval {
            id: call.id.clone(),
            session_id: self.session_id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            risk_score: evaluation.risk_score,
            risk_reasons: evaluation.risk_reasons.clone(),
            status: ApprovalStatus::Pending,
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.config.approval_expiry)
                    .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        };
        if let Ok(mut slot) = self.pending_approval.lock() {
            *slot = Some(pending.clone());
        }
        if let Some(store) = &self.deps.policy_store
            && let Err(err) = store.create_pending_approval(&pending).await
        {
            warn!(session_id = %self.session_id, %err, "failed to record pending approval");
        }
        self.emit(
            EventKind::ApprovalRequired,
            json!({
                "id": pending.id,
                "tool": pending.tool_name,
                "risk_score": pending.risk_score,
                "risk_reasons": pending.risk_reasons,
                "expires_at": pending.expires_at,
            }),
        )
        .await;
        if let Some(push) = &self.deps.push {
            push.notify_approval(&pending);
        }

        let deadline = tokio::time::Instant::now() + self.config.approval_expiry;
        let outcome = loop {
            tokio::select! {
                received = self.approval_rx.recv() => match received {
                    Ok(response) if response.id == call.id => {
                        if response.approved {
                            break ApprovalOutcome::Approved;
                        }
                        break ApprovalOutcome::Rejected(response.reason);
                    }
                    Ok(response) => {
                        // Dispatch filters mismatches; anything here is a
                        // protocol violation worth surfacing.
                        self.emit(
                            EventKind::Error,
                            json!({"message": format!(
                                "approval id mismatch: expected {}, got {}",
                                call.id, response.id
                            )}),
                        )
                        .await;
                    }
                    Err(_) => break ApprovalOutcome::Expired,
                },
                _ = turn.cancelled() => break ApprovalOutcome::Expired,
                _ = tokio::time::sleep_until(deadline) => break ApprovalOutcome::Expired,
            }
        };

        // Clear the slot on every exit path.
        if let Ok(mut slot) = self.pending_approval.lock() {
            *slot = None;
        }
        let (status, decided_by) = match &outcome {
            ApprovalOutcome::Approved => (ApprovalStatus::Approved, Some("operator")),
            ApprovalOutcome::Rejected(_) => (ApprovalStatus::Rejected, Some("operator")),
            ApprovalOutcome::Expired => (ApprovalStatus::Expired, None),
        };
        if let Some(store) = &self.deps.policy_store
            && let Err(err) = store
                .update_pending_approval(&call.id, status, decided_by)
                .await
        {
            warn!(session_id = %self.session_id, %err, "failed to update approval status");
        }
        outcome
    }

    async fn handle_approval(&self, content: &str) {
        let pending_id = self
            .pending_approval
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|p| p.id.clone()));
        let Some(pending_id) = pending_id else {
            self.emit(
                EventKind::Error,
                json!({"message": "no approval is pending"}),
            )
            .await;
            return;
        };

        let Some(response) = ApprovalResponse::parse(content, Some(&pending_id)) else {
            self.emit(
                EventKind::Warning,
                json!({"message": "unparseable approval response"}),
            )
            .await;
            return;
        };
        if response.id != pending_id {
            self.emit(
                EventKind::Error,
                json!({"message": format!(
                    "approval id mismatch: expected {pending_id}, got {}",
                    response.id
                )}),
            )
            .await;
            return;
        }
        if self.approval_tx.try_send(response).is_err() {
            self.emit(
                EventKind::Warning,
                json!({"message": "approval already being processed"}),
            )
            .await;
        }
    }

    async fn expire_pending_approval(&self) {
        let pending = self
            .pending_approval
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(pending) = pending
            && let Some(store) = &self.deps.policy_store
            && let Err(err) = store
                .update_pending_approval(&pending.id, ApprovalStatus::Expired, None)
                .await
        {
            warn!(session_id = %self.session_id, %err, "failed to expire approval on stop");
        }
    }

    // ------------------------------------------------------------------
    // Slash commands
    // ------------------------------------------------------------------

    async fn handle_slash(&self, content: String) {
        match parse_slash(&content) {
            SlashParse::Input => self.run_input(content).await,
            SlashParse::Invalid(message) => {
                self.emit(EventKind::Error, json!({"message": message}))
                    .await;
            }
            SlashParse::Command(command) => {
                self.set_state(RunnerState::Processing).await;
                self.run_slash_command(command).await;
                if self.state() == RunnerState::Processing {
                    self.set_state(RunnerState::Idle).await;
                }
            }
        }
    }

    async fn run_slash_command(&self, command: SlashCommand) {
        match command {
            SlashCommand::Clear => {
                if let Err(err) = self.deps.store.clear(&self.session_id).await {
                    warn!(session_id = %self.session_id, %err, "failed to clear stored conversation");
                }
                if let Ok(mut conversation) = self.conversation.lock() {
                    conversation.clear();
                }
                self.append_message(Message::system(self.config.system_prompt.clone()))
                    .await;
                self.emit(EventKind::MessageUpdated, json!({"cleared": true}))
                    .await;
            }
            SlashCommand::Plan { name, description } => {
                self.orchestrate(|orch, sid| {
                    let name = name.clone();
                    let description = description.clone();
                    async move { orch.create_plan(&sid, &name, &description).await }
                })
                .await;
            }
            SlashCommand::Execute { task_id } => {
                self.orchestrate(|orch, sid| {
                    let task_id = task_id.clone();
                    async move { orch.execute(&sid, task_id.as_deref()).await }
                })
                .await;
            }
            SlashCommand::Status => {
                self.orchestrate(|orch, sid| async move { orch.status(&sid).await })
                    .await;
            }
            SlashCommand::Plans => {
                self.orchestrate(|orch, sid| async move { orch.list_plans(&sid).await })
                    .await;
            }
            SlashCommand::Resume { plan_id } => {
                self.orchestrate(|orch, sid| {
                    let plan_id = plan_id.clone();
                    async move { orch.resume_plan(&sid, &plan_id).await }
                })
                .await;
            }
            SlashCommand::Workflow(op) => {
                self.orchestrate(|orch, sid| async move { orch.workflow(&sid, op).await })
                    .await;
            }
        }
    }

    async fn orchestrate<F, Fut>(&self, f: F)
    where
        F: FnOnce(Arc<dyn Orchestrator>, String) -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        let Some(orchestrator) = self.deps.orchestrator.clone() else {
            self.emit(
                EventKind::Warning,
                json!({"message": "no orchestrator configured for this session"}),
            )
            .await;
            return;
        };
        match f(orchestrator, self.session_id.clone()).await {
            Ok(summary) => self.append_message(Message::system(summary)).await,
            Err(err) => {
                self.emit(EventKind::Error, json!({"message": err.to_string()}))
                    .await;
            }
        }
    }
}

enum ApprovalOutcome {
    Approved,
    Rejected(Option<String>),
    Expired,
}
