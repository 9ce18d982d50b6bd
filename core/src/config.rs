//! Runtime configuration for the registry, the runners, and the tool
//! pipeline. Everything has a sensible default so embedders only override
//! what they care about.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Reserved params key the runner uses to thread the model's tool call id
/// through to the middleware chain.
pub const CALL_ID_PARAM: &str = "_steward_call_id";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// A runner with no activity for this long becomes reapable.
    pub idle_timeout: Duration,
    /// Absolute wall-clock budget for a session; `None` disables the timer.
    pub max_runtime: Option<Duration>,
    /// How often the registry scans for reapable runners.
    pub cleanup_interval: Duration,
    /// Upper bound on model↔tool round trips per input.
    pub max_iterations: usize,
    pub command_queue_capacity: usize,
    /// How long a policy-gate approval stays decidable.
    pub approval_expiry: Duration,
    /// Poll cadence against the mission store while a change is parked.
    pub mission_poll_interval: Duration,
    /// Poll cadence of the pause/stop watcher during a turn.
    pub state_watch_interval: Duration,
    pub retry: RetryConfig,
    pub timeouts: ToolTimeouts,
    /// Serialized tool results above this size get truncated.
    pub max_result_bytes: usize,
    pub shell: ShellLimits,
    pub max_file_size_bytes: u64,
    pub container: Option<ContainerConfig>,
    /// Workspaces must resolve inside this root when set.
    pub project_root: Option<PathBuf>,
    pub clone_policy: ClonePolicy,
    pub tool_policy: SessionToolPolicy,
    pub mission: MissionConfig,
    /// Injected as the first message of an empty conversation.
    pub system_prompt: String,
    /// Tools that get an indeterminate progress entry while running.
    pub long_running_tools: HashSet<String>,
    /// Extra environment for tools that accept one (shell, plugins).
    pub env: HashMap<String, String>,
    pub sandbox: SandboxConfig,
    /// Scan the well-known plugin directories at session creation.
    pub load_default_plugins: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            max_runtime: None,
            cleanup_interval: Duration::from_secs(5 * 60),
            max_iterations: 50,
            command_queue_capacity: 64,
            approval_expiry: Duration::from_secs(5 * 60),
            mission_poll_interval: Duration::from_millis(750),
            state_watch_interval: Duration::from_millis(200),
            retry: RetryConfig::default(),
            timeouts: ToolTimeouts::default(),
            max_result_bytes: 64 * 1024,
            shell: ShellLimits::default(),
            max_file_size_bytes: 10 * 1024 * 1024,
            container: None,
            project_root: None,
            clone_policy: ClonePolicy::default(),
            tool_policy: SessionToolPolicy::default(),
            mission: MissionConfig::default(),
            system_prompt: "You are a coding assistant operating on the user's workspace. \
                            Use the available tools to read, modify, and verify code."
                .to_string(),
            long_running_tools: [
                "run_shell",
                "search_text",
                "search_replace",
                "find_files",
                "git_diff",
                "git_log",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            env: HashMap::new(),
            sandbox: SandboxConfig::default(),
            load_default_plugins: false,
        }
    }
}

/// Sandbox settings fanned out to tools that can honor them. Enforcement
/// itself is the sandbox collaborator's problem, not ours.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub writable_roots: Vec<PathBuf>,
    pub allow_network: bool,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Uniform jitter fraction applied to every back-off sleep.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolTimeouts {
    /// `None` (or zero) disables the default deadline.
    pub default: Option<Duration>,
    pub per_tool: HashMap<String, Duration>,
}

impl ToolTimeouts {
    pub fn for_tool(&self, name: &str) -> Option<Duration> {
        let timeout = self
            .per_tool
            .get(name)
            .copied()
            .or(self.default)?;
        (!timeout.is_zero()).then_some(timeout)
    }
}

#[derive(Debug, Clone)]
pub struct ShellLimits {
    pub max_output_bytes: usize,
    pub max_output_lines: usize,
    pub max_exec_time: Duration,
}

impl Default for ShellLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: 10 * 1024,
            max_output_lines: 256,
            max_exec_time: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// `docker` or `podman`.
    pub engine: String,
    pub compose_file: PathBuf,
    pub service: String,
}

/// What the registry will agree to `git clone`.
#[derive(Debug, Clone)]
pub struct ClonePolicy {
    pub allowed_schemes: Vec<String>,
    /// When set, only these hosts may be cloned from.
    pub allowed_hosts: Option<Vec<String>>,
    pub denied_hosts: Vec<String>,
    /// Refuse loopback and RFC-1918 hosts.
    pub deny_private_hosts: bool,
}

impl Default for ClonePolicy {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["https".to_string(), "http".to_string(), "ssh".to_string()],
            allowed_hosts: None,
            denied_hosts: Vec::new(),
            deny_private_hosts: true,
        }
    }
}

/// Per-session tool filtering and forced-approval set.
#[derive(Debug, Clone, Default)]
pub struct SessionToolPolicy {
    /// When set, only these tools stay registered.
    pub allow: Option<HashSet<String>>,
    pub deny: HashSet<String>,
    /// Tools that always park on the approval gate regardless of policy.
    pub require_approval: HashSet<String>,
}

impl SessionToolPolicy {
    pub fn permits(&self, name: &str) -> bool {
        if self.deny.contains(name) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(name),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MissionConfig {
    /// Arms the mission-control change gate.
    pub require_approval: bool,
    /// Recorded as the originating agent on pending changes.
    pub agent_id: String,
    /// How long a parked change waits for a reviewer.
    pub decision_timeout: Duration,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            require_approval: false,
            agent_id: "steward".to_string(),
            decision_timeout: Duration::from_secs(5 * 60),
        }
    }
}
