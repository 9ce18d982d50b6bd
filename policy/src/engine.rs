//! The evaluator. `evaluate_at` is a pure function of `(policy, call, now)`;
//! the engine adds nothing but an atomically swappable active policy.

use std::sync::Arc;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Datelike;
use chrono::NaiveTime;
use chrono::Timelike;
use chrono::Utc;
use chrono_tz::Tz;
use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use wildmatch::WildMatch;

use crate::conditions::condition_matches;
use crate::model::Policy;
use crate::model::RuleAction;
use crate::model::TimeWindow;
use crate::model::ToolCategory;

/// A tool call as the policy engine sees it. `category` may be pre-resolved
/// by the caller; otherwise it is inferred from the tool name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub name: String,
    pub input: Value,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ToolCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Auto,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub decision: Decision,
    pub requires_approval: bool,
    pub risk_score: i64,
    pub risk_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Holds the single active policy. Reads vastly outnumber updates, so the
/// policy lives behind an `RwLock<Arc<…>>`: readers clone the `Arc` and
/// evaluate without holding the lock.
pub struct PolicyEngine {
    active: RwLock<Arc<Policy>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Self {
        Self {
            active: RwLock::new(Arc::new(policy)),
        }
    }

    /// Swap in a new active policy. In-flight evaluations keep the document
    /// they started with.
    pub fn update(&self, policy: Policy) {
        match self.active.write() {
            Ok(mut guard) => *guard = Arc::new(policy),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(policy),
        }
    }

    pub fn active(&self) -> Arc<Policy> {
        match self.active.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn evaluate(&self, call: &ToolCallSpec) -> Evaluation {
        evaluate_at(&self.active(), call, Utc::now())
    }

    pub fn evaluate_with_now(&self, call: &ToolCallSpec, now: DateTime<Utc>) -> Evaluation {
        evaluate_at(&self.active(), call, now)
    }
}

/// Infer a category from the tool name by substring, first match wins.
pub fn categorize(name: &str) -> ToolCategory {
    const ORDER: [(&[&str], ToolCategory); 6] = [
        (&["read", "cat", "view"], ToolCategory::FileRead),
        (&["write", "edit", "create"], ToolCategory::FileWrite),
        (&["shell", "bash", "exec", "run_shell"], ToolCategory::Shell),
        (&["search", "grep", "find", "glob"], ToolCategory::Search),
        (&["git"], ToolCategory::Git),
        (&["fetch", "http", "curl", "request"], ToolCategory::Network),
    ];
    let name = name.to_ascii_lowercase();
    for (needles, category) in ORDER {
        if needles.iter().any(|needle| name.contains(needle)) {
            return category;
        }
    }
    ToolCategory::Unknown
}

/// The deterministic decision procedure from the policy document. Never
/// fails: pattern problems are skipped and the outcome degrades toward
/// `auto`, the default policy's default action.
pub fn evaluate_at(policy: &Policy, call: &ToolCallSpec, now: DateTime<Utc>) -> Evaluation {
    let category = call.category.unwrap_or_else(|| categorize(&call.name));
    let serialized = serde_json::to_string(&call.input).unwrap_or_default();
    let path = string_field(&call.input, &["path", "file_path"]);
    let command = string_field(&call.input, &["command"]);
    let url = string_field(&call.input, &["url"]);

    let expires_at = now
        + chrono::Duration::from_std(policy.defaults.approval_expiry)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

    // Step 1-2: the category rule, with exceptions inverting an approve.
    let mut category_decision: Option<RuleAction> = None;
    if let Some(rule) = policy.category_rules.get(&category) {
        let excepted = path.is_some_and(|p| any_glob_matches(&rule.path_exceptions, p))
            || command.is_some_and(|c| any_glob_matches(&rule.command_exceptions, c));
        if excepted {
            category_decision = Some(RuleAction::Auto);
        } else {
            category_decision = Some(rule.action);
        }
        if category_decision == Some(RuleAction::Reject) {
            return Evaluation {
                decision: Decision::Reject,
                requires_approval: false,
                risk_score: 0,
                risk_reasons: Vec::new(),
                matched_rule: Some(format!("category:{category:?}")),
                expires_at,
            };
        }
    }

    // Step 3: every risk rule runs, rejection or not upstream.
    let mut risk_score = 0;
    let mut risk_reasons = Vec::new();
    let mut rule_demands_approval = false;
    let mut matched_rule = None;
    for rule in &policy.risk_rules {
        let matched = match condition_matches(
            &rule.condition,
            &serialized,
            category,
            command,
            url,
        ) {
            Some(matched) => matched,
            None => rule
                .pattern
                .as_deref()
                .and_then(|pattern| Regex::new(&format!("(?i){pattern}")).ok())
                .is_some_and(|regex| regex.is_match(&serialized)),
        };
        if !matched {
            continue;
        }
        risk_score += rule.score;
        risk_reasons.push(rule.condition.clone());
        if rule.action == Some(RuleAction::Approve) {
            rule_demands_approval = true;
            matched_rule = Some(rule.condition.clone());
        }
    }

    // Step 4: the active threshold for this instant.
    let threshold = active_threshold(&policy.time_windows, now);

    // Step 5: first rule that fires wins.
    let decision = if rule_demands_approval {
        Decision::Approve
    } else if threshold > 0 && risk_score >= threshold {
        Decision::Approve
    } else if category_decision == Some(RuleAction::Approve) {
        Decision::Approve
    } else {
        Decision::Auto
    };

    Evaluation {
        requires_approval: decision == Decision::Approve,
        decision,
        risk_score,
        risk_reasons,
        matched_rule,
        expires_at,
    }
}

fn string_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| input.get(key)?.as_str())
}

fn any_glob_matches(globs: &[String], value: &str) -> bool {
    globs.iter().any(|glob| WildMatch::new(glob).matches(value))
}

/// Day windows take precedence over hour windows; with no match the
/// threshold falls back to 50.
fn active_threshold(windows: &[TimeWindow], now: DateTime<Utc>) -> i64 {
    for window in windows {
        let Some(days) = &window.days else { continue };
        let local = now.with_timezone(&window_tz(window));
        if days.contains(&local.weekday()) {
            return window.threshold;
        }
    }
    for window in windows {
        let Some(hours) = &window.hours else { continue };
        let Some((start, end)) = parse_hour_range(hours) else {
            continue;
        };
        let local = now.with_timezone(&window_tz(window)).time();
        let minutes = local.hour() * 60 + local.minute();
        let in_window = if start <= end {
            minutes >= start && minutes < end
        } else {
            // Wrap-around range such as 22:00-06:00.
            minutes >= start || minutes < end
        };
        if in_window {
            return window.threshold;
        }
    }
    50
}

fn window_tz(window: &TimeWindow) -> Tz {
    window.timezone.parse().unwrap_or(chrono_tz::UTC)
}

/// `HH:MM-HH:MM` → (start, end) in minutes since midnight.
fn parse_hour_range(hours: &str) -> Option<(u32, u32)> {
    let (start, end) = hours.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    Some((
        start.hour() * 60 + start.minute(),
        end.hour() * 60 + end.minute(),
    ))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn call(name: &str, input: Value) -> ToolCallSpec {
        ToolCallSpec {
            name: name.to_string(),
            input,
            session_id: "s1".to_string(),
            category: None,
        }
    }

    /// A Wednesday at noon UTC: business hours, threshold 50.
    fn weekday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn auto_approves_plain_read() {
        let policy = Policy::default();
        let evaluation = evaluate_at(
            &policy,
            &call("read_file", json!({"path": "README.md"})),
            weekday_noon(),
        );
        assert_eq!(evaluation.decision, Decision::Auto);
        assert!(!evaluation.requires_approval);
        assert_eq!(evaluation.risk_score, 0);
    }

    #[test]
    fn secret_write_needs_approval() {
        let policy = Policy::default();
        let evaluation = evaluate_at(
            &policy,
            &call(
                "write_file",
                json!({"path": ".env", "content": "API_KEY=abcd"}),
            ),
            weekday_noon(),
        );
        assert_eq!(evaluation.decision, Decision::Approve);
        assert!(evaluation.requires_approval);
        assert!(evaluation.risk_score >= 100);
        assert!(
            evaluation
                .risk_reasons
                .contains(&"touches_secrets".to_string())
        );
    }

    #[test]
    fn exception_inverts_write_approval() {
        let policy = Policy::default();
        let evaluation = evaluate_at(
            &policy,
            &call("write_file", json!({"path": "/tmp/out.log"})),
            weekday_noon(),
        );
        assert_eq!(evaluation.decision, Decision::Auto);
    }

    #[test]
    fn category_reject_short_circuits() {
        let mut policy = Policy::default();
        policy.category_rules.insert(
            ToolCategory::Network,
            crate::model::CategoryRule::new(RuleAction::Reject),
        );
        let evaluation = evaluate_at(
            &policy,
            &call("fetch_url", json!({"url": "https://example.com"})),
            weekday_noon(),
        );
        assert_eq!(evaluation.decision, Decision::Reject);
    }

    #[test]
    fn weekend_threshold_zero_disables_score_comparison() {
        let policy = Policy::default();
        // A Saturday: the weekend day-window wins with threshold 0, so even
        // a destructive shell command with no category approval sails
        // through on score alone.
        let saturday = Utc.with_ymd_and_hms(2025, 6, 7, 12, 0, 0).single().expect("valid timestamp");
        let evaluation = evaluate_at(
            &policy,
            &call("git_history", json!({"command": "git push --force"})),
            saturday,
        );
        // Score accrues (destructive + modifies_git) but never trips the
        // disabled threshold.
        assert!(evaluation.risk_score > 0);
        assert_eq!(evaluation.decision, Decision::Auto);
    }

    #[test]
    fn after_hours_window_wraps_midnight() {
        let windows = Policy::default().time_windows;
        let late = Utc.with_ymd_and_hms(2025, 6, 4, 23, 30, 0).single().expect("valid timestamp");
        let early = Utc.with_ymd_and_hms(2025, 6, 4, 5, 0, 0).single().expect("valid timestamp");
        assert_eq!(active_threshold(&windows, late), 30);
        assert_eq!(active_threshold(&windows, early), 30);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let policy = Policy::default();
        let spec = call("run_shell", json!({"command": "pip install requests"}));
        let now = weekday_noon();
        let first = evaluate_at(&policy, &spec, now);
        let second = evaluate_at(&policy, &spec, now);
        assert_eq!(first.decision, second.decision);
        assert_eq!(first.risk_score, second.risk_score);
        assert_eq!(first.risk_reasons, second.risk_reasons);
        assert_eq!(first.expires_at, second.expires_at);
    }

    #[test]
    fn categorize_uses_precedence_order() {
        assert_eq!(categorize("read_file"), ToolCategory::FileRead);
        assert_eq!(categorize("write_file"), ToolCategory::FileWrite);
        assert_eq!(categorize("run_shell"), ToolCategory::Shell);
        assert_eq!(categorize("search_text"), ToolCategory::Search);
        assert_eq!(categorize("git_diff"), ToolCategory::Git);
        assert_eq!(categorize("fetch_url"), ToolCategory::Network);
        assert_eq!(categorize("mystery"), ToolCategory::Unknown);
    }
}
