//! The session registry: provisions workspaces, builds per-session tool
//! registries, owns the runner map, routes commands, and reaps idle
//! runners on a timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use async_channel::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::client::ModelClient;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::error::StewardErr;
use crate::orchestrator::Orchestrator;
use crate::plugins::load_default_plugins;
use crate::runner::RunnerDeps;
use crate::runner::SessionRunner;
use crate::session::Session;
use crate::sinks::ProgressTracker;
use crate::sinks::PushNotifier;
use crate::sinks::TelemetrySink;
use crate::sinks::ToastSink;
use crate::stores::ConversationStore;
use crate::stores::MissionStore;
use crate::stores::PolicyStore;
use crate::tools::ToolRegistry;
use crate::tools::builtins::register_builtins;
use crate::tools::container::ContainerSettings;
use crate::tools::middleware::ChainDeps;
use crate::tools::middleware::HookRegistry;
use crate::tools::middleware::ValidatorSet;
use crate::tools::middleware::standard_chain;
use crate::watcher::FileWatcher;
use crate::workspace;
use crate::workspace::Workspace;
use steward_policy::PolicyEngine;
use steward_protocol::Event;
use steward_protocol::RunnerState;
use steward_protocol::SessionCommand;

pub struct CreateSessionRequest {
    /// Caller-chosen id; a UUID is generated when absent.
    pub session_id: Option<String>,
    pub principal: String,
    /// A git URL to clone or a filesystem path to work in.
    pub project: String,
    pub branch: Option<String>,
    /// Processed asynchronously once the runner is registered.
    pub initial_prompt: Option<String>,
    /// Remove the provisioned workspace when the session is removed.
    pub cleanup_workspace: bool,
}

/// Shared collaborators every session draws from.
pub struct RegistryDeps {
    pub model: Arc<dyn ModelClient>,
    pub conversation_store: Arc<dyn ConversationStore>,
    pub policy_engine: Arc<PolicyEngine>,
    pub policy_store: Option<Arc<dyn PolicyStore>>,
    pub mission_store: Option<Arc<dyn MissionStore>>,
    pub orchestrator: Option<Arc<dyn Orchestrator>>,
    pub push: Option<Arc<dyn PushNotifier>>,
    pub toast: Option<Arc<dyn ToastSink>>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub progress: Arc<dyn ProgressTracker>,
    pub hooks: Arc<HookRegistry>,
    pub watcher: Arc<FileWatcher>,
}

struct ManagedSession {
    runner: Arc<SessionRunner>,
    workspace: Workspace,
    cleanup_workspace: bool,
}

pub struct SessionRegistry {
    config: RuntimeConfig,
    deps: RegistryDeps,
    sessions: Arc<RwLock<HashMap<String, ManagedSession>>>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// Build the registry and start the periodic idle reaper.
    pub fn new(config: RuntimeConfig, deps: RegistryDeps) -> Arc<Self> {
        let registry = Arc::new(Self {
            config,
            deps,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        });

        {
            let reaper = Arc::clone(&registry);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(reaper.config.cleanup_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => reaper.reap_idle().await,
                        _ = reaper.shutdown.cancelled() => break,
                    }
                }
            });
        }
        registry
    }

    /// Create a session: provision its workspace, assemble its tool
    /// pipeline, spawn its runner, and (asynchronously) feed it the
    /// initial prompt.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<(Arc<SessionRunner>, Receiver<Event>)> {
        let session_id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        {
            let sessions = self.read_sessions()?;
            if sessions.contains_key(&session_id) {
                return Err(StewardErr::Workspace(format!(
                    "session {session_id} already exists"
                )));
            }
        }

        let workspace = workspace::provision(
            &self.config,
            &session_id,
            &request.project,
            request.branch.as_deref(),
        )
        .await?;
        let tools = self.build_tool_registry(&workspace).await?;

        let mut session = Session::new(&session_id, request.principal, workspace.path.clone());
        session.repo_url = workspace.repo_url.clone();
        session.branch = workspace.branch.clone();

        let deps = RunnerDeps {
            model: Arc::clone(&self.deps.model),
            tools,
            store: Arc::clone(&self.deps.conversation_store),
            policy_engine: Arc::clone(&self.deps.policy_engine),
            policy_store: self.deps.policy_store.clone(),
            orchestrator: self.deps.orchestrator.clone(),
            push: self.deps.push.clone(),
        };
        let (runner, events) = SessionRunner::spawn(session, self.config.clone(), deps).await;

        {
            let mut sessions = self.write_sessions()?;
            sessions.insert(
                session_id.clone(),
                ManagedSession {
                    runner: Arc::clone(&runner),
                    workspace,
                    cleanup_workspace: request.cleanup_workspace,
                },
            );
        }
        info!(%session_id, "session created");

        if let Some(prompt) = request.initial_prompt {
            let target = Arc::clone(&runner);
            let sid = session_id.clone();
            tokio::spawn(async move {
                let command = SessionCommand {
                    session_id: sid.clone(),
                    kind: steward_protocol::CommandKind::Input,
                    content: prompt,
                };
                if let Err(err) = target.submit(command) {
                    warn!(session_id = %sid, %err, "initial prompt submission failed");
                }
            });
        }

        Ok((runner, events))
    }

    /// One per-session tool pipeline: builtins, container wiring, the full
    /// middleware chain, capability fan-out, per-session filtering, and
    /// opt-in plugins.
    async fn build_tool_registry(&self, workspace: &Workspace) -> Result<Arc<ToolRegistry>> {
        let container = self
            .config
            .container
            .as_ref()
            .map(ContainerSettings::from_config);
        let registry = Arc::new(ToolRegistry::with_container(container));
        register_builtins(&registry)?;

        for middleware in standard_chain(ChainDeps {
            config: self.config.clone(),
            work_dir: workspace.path.clone(),
            telemetry: Arc::clone(&self.deps.telemetry),
            hooks: Arc::clone(&self.deps.hooks),
            mission_store: self.deps.mission_store.clone(),
            toast: self.deps.toast.clone(),
            validators: Arc::new(ValidatorSet::standard(&workspace.path)),
            progress: Arc::clone(&self.deps.progress),
            watcher: Arc::clone(&self.deps.watcher),
        }) {
            registry.use_middleware(middleware)?;
        }

        registry.set_work_dir(&workspace.path);
        registry.set_env(&self.config.env);
        registry.set_max_file_size_bytes(self.config.max_file_size_bytes);
        registry.set_max_exec_time_seconds(self.config.shell.max_exec_time.as_secs());
        registry.set_max_output_bytes(self.config.shell.max_output_bytes);
        registry.set_sandbox_config(&self.config.sandbox);

        let tool_policy = self.config.tool_policy.clone();
        registry.filter(move |name| tool_policy.permits(name))?;

        if self.config.load_default_plugins {
            let loaded = load_default_plugins(&registry, &workspace.path).await?;
            if loaded > 0 {
                info!(loaded, "plugins registered");
                registry.set_work_dir(&workspace.path);
            }
        }
        Ok(registry)
    }

    /// Route a command to its session's queue.
    pub fn dispatch(&self, command: SessionCommand) -> Result<()> {
        let runner = self
            .get(&command.session_id)
            .ok_or_else(|| StewardErr::SessionNotFound(command.session_id.clone()))?;
        runner.submit(command)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionRunner>> {
        self.read_sessions()
            .ok()?
            .get(session_id)
            .map(|managed| Arc::clone(&managed.runner))
    }

    pub fn list(&self) -> Vec<Session> {
        match self.read_sessions() {
            Ok(sessions) => sessions
                .values()
                .map(|managed| managed.runner.session())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Stop and deregister a session; optionally tear down its workspace.
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let managed = {
            let mut sessions = self.write_sessions()?;
            sessions
                .remove(session_id)
                .ok_or_else(|| StewardErr::SessionNotFound(session_id.to_string()))?
        };
        managed.runner.stop().await;
        if managed.cleanup_workspace {
            workspace::cleanup(&self.config, session_id, &managed.workspace).await?;
        }
        info!(%session_id, "session removed");
        Ok(())
    }

    /// Stop runners that have been idle past their timeout or are already
    /// stopped, then drop them from the map. Stopping is idempotent, so a
    /// runner stopping concurrently is harmless.
    pub async fn reap_idle(&self) {
        let reapable: Vec<String> = {
            let Ok(sessions) = self.read_sessions() else {
                return;
            };
            sessions
                .values()
                .filter(|managed| {
                    managed.runner.state() == RunnerState::Stopped || managed.runner.is_idle()
                })
                .map(|managed| managed.runner.session_id().to_string())
                .collect()
        };
        for session_id in reapable {
            info!(%session_id, "reaping idle session");
            let managed = {
                let Ok(mut sessions) = self.write_sessions() else {
                    return;
                };
                sessions.remove(&session_id)
            };
            if let Some(managed) = managed {
                managed.runner.stop().await;
                if managed.cleanup_workspace
                    && let Err(err) =
                        workspace::cleanup(&self.config, &session_id, &managed.workspace).await
                {
                    warn!(%session_id, %err, "workspace cleanup failed during reap");
                }
            }
        }
    }

    /// Stop everything. Used by hosts on shutdown and by tests.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let runners: Vec<Arc<SessionRunner>> = match self.read_sessions() {
            Ok(sessions) => sessions
                .values()
                .map(|managed| Arc::clone(&managed.runner))
                .collect(),
            Err(_) => Vec::new(),
        };
        for runner in runners {
            runner.stop().await;
        }
        if let Ok(mut sessions) = self.write_sessions() {
            sessions.clear();
        }
    }

    fn read_sessions(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, ManagedSession>>> {
        self.sessions
            .read()
            .map_err(|_| StewardErr::Store("session map lock poisoned".to_string()))
    }

    fn write_sessions(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, ManagedSession>>> {
        self.sessions
            .write()
            .map_err(|_| StewardErr::Store("session map lock poisoned".to_string()))
    }
}
