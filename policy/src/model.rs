//! The policy document: category rules, risk rules, time windows, defaults.
//!
//! A policy is immutable once loaded; the engine swaps whole documents
//! atomically, never mutating one in place.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Weekday;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub category_rules: HashMap<ToolCategory, CategoryRule>,
    /// Evaluated in order; every matching rule contributes its score.
    #[serde(default)]
    pub risk_rules: Vec<RiskRule>,
    #[serde(default)]
    pub time_windows: Vec<TimeWindow>,
    #[serde(default)]
    pub defaults: PolicyDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileRead,
    FileWrite,
    Shell,
    Search,
    Git,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Approve,
    Auto,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub action: RuleAction,
    /// Globs matched against `input.path` / `input.file_path`. A match
    /// inverts an `approve` action into `auto`.
    #[serde(default)]
    pub path_exceptions: Vec<String>,
    /// Globs matched against `input.command`, same inversion.
    #[serde(default)]
    pub command_exceptions: Vec<String>,
}

impl CategoryRule {
    pub fn new(action: RuleAction) -> Self {
        Self {
            action,
            path_exceptions: Vec::new(),
            command_exceptions: Vec::new(),
        }
    }
}

/// One scored condition. `condition` names a built-in matcher
/// (`touches_secrets`, `destructive`, …); `pattern` overrides it with a
/// custom case-insensitive regex applied to the serialized input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRule {
    pub condition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub score: i64,
    /// An explicit `approve` here forces an approval regardless of the
    /// threshold arithmetic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<RuleAction>,
}

/// Maps a slice of the week to a risk threshold. Day windows take precedence
/// over hour windows; hour ranges may wrap midnight (`22:00-06:00`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<Weekday>>,
    /// `HH:MM-HH:MM` in the window's timezone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,
    pub timezone: String,
    pub threshold: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefaults {
    pub default_action: RuleAction,
    /// How long a pending approval stays decidable.
    #[serde(with = "approval_expiry_secs")]
    pub approval_expiry: Duration,
    pub max_pending: usize,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            default_action: RuleAction::Auto,
            approval_expiry: Duration::from_secs(5 * 60),
            max_pending: 10,
        }
    }
}

mod approval_expiry_secs {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

impl Default for Policy {
    /// The built-in policy: reads and searches run free, writes and shells
    /// need approval outside a small set of innocuous exceptions, and the
    /// stock risk conditions feed the time-window thresholds.
    ///
    /// The weekend window deliberately carries `threshold: 0`, which turns
    /// the score comparison off on Saturdays and Sundays.
    fn default() -> Self {
        let mut category_rules = HashMap::new();
        category_rules.insert(ToolCategory::FileRead, CategoryRule::new(RuleAction::Auto));
        category_rules.insert(ToolCategory::Search, CategoryRule::new(RuleAction::Auto));
        category_rules.insert(
            ToolCategory::FileWrite,
            CategoryRule {
                action: RuleAction::Approve,
                path_exceptions: vec![
                    "*.log".to_string(),
                    "*.tmp".to_string(),
                    "/tmp/*".to_string(),
                ],
                command_exceptions: Vec::new(),
            },
        );
        category_rules.insert(
            ToolCategory::Shell,
            CategoryRule {
                action: RuleAction::Approve,
                path_exceptions: Vec::new(),
                command_exceptions: vec![
                    "ls *".to_string(),
                    "cat *".to_string(),
                    "git status".to_string(),
                    "git diff*".to_string(),
                    "git log*".to_string(),
                ],
            },
        );
        category_rules.insert(
            ToolCategory::Network,
            CategoryRule::new(RuleAction::Approve),
        );

        let risk_rules = vec![
            RiskRule {
                condition: "touches_secrets".to_string(),
                pattern: None,
                score: 100,
                action: None,
            },
            RiskRule {
                condition: "destructive".to_string(),
                pattern: None,
                score: 150,
                action: None,
            },
            RiskRule {
                condition: "external_network".to_string(),
                pattern: None,
                score: 60,
                action: None,
            },
            RiskRule {
                condition: "modifies_git".to_string(),
                pattern: None,
                score: 40,
                action: None,
            },
            RiskRule {
                condition: "writes_config".to_string(),
                pattern: None,
                score: 50,
                action: None,
            },
            RiskRule {
                condition: "installs_packages".to_string(),
                pattern: None,
                score: 70,
                action: None,
            },
        ];

        let time_windows = vec![
            TimeWindow {
                name: "business-hours".to_string(),
                days: None,
                hours: Some("09:00-18:00".to_string()),
                timezone: "UTC".to_string(),
                threshold: 50,
            },
            TimeWindow {
                name: "after-hours".to_string(),
                days: None,
                hours: Some("22:00-06:00".to_string()),
                timezone: "UTC".to_string(),
                threshold: 30,
            },
            TimeWindow {
                name: "weekend".to_string(),
                days: Some(vec![Weekday::Sat, Weekday::Sun]),
                hours: None,
                timezone: "UTC".to_string(),
                threshold: 0,
            },
        ];

        Self {
            name: "default".to_string(),
            active: true,
            category_rules,
            risk_rules,
            time_windows,
            defaults: PolicyDefaults::default(),
        }
    }
}
