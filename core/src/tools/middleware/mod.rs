//! The middleware chain, outermost first:
//!
//! 1. telemetry, 2. hooks, 3. mission approval gate, 4. panic recovery,
//! 5. toast notifications, 6. validation, 7. result size limit, 8. retry
//! with back-off, 9. per-tool timeout, 10. progress tracking, 11. file-
//! change tracking.
//!
//! Each layer is a standalone `fn(...) -> MiddlewareFn`; `standard_chain`
//! assembles them in the canonical order from one dependency bundle.

pub mod approval_gate;
pub mod file_changes;
pub mod hooks;
pub mod progress;
pub mod recover;
pub mod retry;
pub mod size_limit;
pub mod telemetry;
pub mod timeout;
pub mod toast;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::sinks::ProgressTracker;
use crate::sinks::TelemetrySink;
use crate::sinks::ToastSink;
use crate::stores::MissionStore;
use crate::tools::MiddlewareFn;
use crate::watcher::FileWatcher;
pub use approval_gate::MissionGate;
pub use hooks::HookRegistry;
pub use hooks::PostHook;
pub use hooks::PreHook;
pub use hooks::PreHookOutcome;
pub use retry::RetryPredicate;
pub use validate::Validator;
pub use validate::ValidatorSet;

pub struct ChainDeps {
    pub config: RuntimeConfig,
    pub work_dir: PathBuf,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub hooks: Arc<HookRegistry>,
    pub mission_store: Option<Arc<dyn MissionStore>>,
    pub toast: Option<Arc<dyn ToastSink>>,
    pub validators: Arc<ValidatorSet>,
    pub progress: Arc<dyn ProgressTracker>,
    pub watcher: Arc<FileWatcher>,
}

pub fn standard_chain(deps: ChainDeps) -> Vec<MiddlewareFn> {
    let gate = deps.mission_store.map(|store| MissionGate {
        store,
        config: deps.config.mission.clone(),
        poll_interval: deps.config.mission_poll_interval,
        work_dir: deps.work_dir.clone(),
    });

    vec![
        telemetry::middleware(deps.telemetry),
        hooks::middleware(deps.hooks),
        approval_gate::middleware(gate),
        recover::middleware(),
        toast::middleware(deps.toast),
        validate::middleware(deps.validators),
        size_limit::middleware(deps.config.max_result_bytes, None),
        retry::middleware(deps.config.retry.clone(), None),
        timeout::middleware(deps.config.timeouts.clone()),
        progress::middleware(deps.progress, deps.config.long_running_tools.clone()),
        file_changes::middleware(deps.watcher, deps.work_dir),
    ]
}
