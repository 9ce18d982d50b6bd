//! Headless agent session runtime: a registry of per-session runners, each
//! driving one model↔tool conversation through a policy-gated, middleware-
//! wrapped tool pipeline.
//!
//! Transports, LLM provider clients, prompt content, and storage backends
//! live outside this crate; they connect through the narrow traits in
//! [`client`], [`stores`], [`orchestrator`], and [`sinks`].

pub mod activity;
pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod paths;
pub mod plugins;
pub mod registry;
pub mod runner;
pub mod session;
pub mod sinks;
pub mod stores;
pub mod tools;
pub mod watcher;
pub mod workspace;

pub use client::ChatReply;
pub use client::ChatRequest;
pub use client::ModelClient;
pub use client::ToolSchema;
pub use config::RuntimeConfig;
pub use config::SandboxConfig;
pub use error::Result;
pub use error::StewardErr;
pub use registry::CreateSessionRequest;
pub use registry::RegistryDeps;
pub use registry::SessionRegistry;
pub use runner::RunnerDeps;
pub use runner::SessionRunner;
pub use session::Session;
pub use tools::Tool;
pub use tools::ToolRegistry;
pub use watcher::FileWatcher;
