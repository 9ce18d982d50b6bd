//! Pure policy evaluation for tool calls: classify the call into a
//! category, accumulate a risk score from pattern-matched conditions, apply
//! the time-window threshold in force, and return an approve/auto/reject
//! decision.
//!
//! Evaluation never performs I/O and never fails; given the same policy,
//! call, and clock reading it always returns the same result.

mod conditions;
mod engine;
mod model;

pub use engine::Decision;
pub use engine::Evaluation;
pub use engine::PolicyEngine;
pub use engine::ToolCallSpec;
pub use engine::categorize;
pub use engine::evaluate_at;
pub use model::CategoryRule;
pub use model::Policy;
pub use model::PolicyDefaults;
pub use model::RiskRule;
pub use model::RuleAction;
pub use model::TimeWindow;
pub use model::ToolCategory;
