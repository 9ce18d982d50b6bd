//! The built-in risk conditions. Each is a named predicate over a tool
//! call's serialized input; unknown names fall back to the rule's custom
//! pattern, so policies can ship conditions the engine has never heard of.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::model::ToolCategory;

static TOUCHES_SECRETS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)\.env|secret|credential|password|api.?key|token|private.?key|auth|\.pem|\.key")
});

static DESTRUCTIVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(
        r#"(?i)rm -rf|rm -r\b|rmdir|unlink|drop table|drop database|delete from|truncate|reset --hard|--force|(^|[\s"'])-f($|[\s"'])"#,
    )
});

static SHELL_NETWORK: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?i)\bcurl\b|\bwget\b|https?://"));

static MODIFIES_GIT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)git (commit|push|rebase|reset|merge|checkout -b|branch -d|tag)")
});

static WRITES_CONFIG: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?i)\.ya?ml|\.json|\.toml|config\.|\.config|settings\."));

static INSTALLS_PACKAGES: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)npm install|yarn add|go get|go install|pip install|apt install|brew install")
});

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::warn!(pattern, %err, "risk condition pattern failed to compile");
            None
        }
    }
}

fn is_match(regex: &LazyLock<Option<Regex>>, haystack: &str) -> bool {
    regex.as_ref().is_some_and(|r| r.is_match(haystack))
}

/// Evaluate a named condition against the call. `serialized` is the
/// JSON-encoded input, `category` the already-resolved tool category.
pub(crate) fn condition_matches(
    condition: &str,
    serialized: &str,
    category: ToolCategory,
    command: Option<&str>,
    url: Option<&str>,
) -> Option<bool> {
    let matched = match condition {
        "touches_secrets" => is_match(&TOUCHES_SECRETS, serialized),
        "destructive" => is_match(&DESTRUCTIVE, serialized),
        "external_network" => {
            let shell_reaches_out =
                command.is_some_and(|cmd| is_match(&SHELL_NETWORK, cmd)) || {
                    category == ToolCategory::Shell && is_match(&SHELL_NETWORK, serialized)
                };
            shell_reaches_out || url.is_some_and(|u| !is_loopback_url(u))
        }
        "modifies_git" => is_match(&MODIFIES_GIT, serialized),
        "writes_config" => {
            matches!(category, ToolCategory::FileWrite | ToolCategory::Shell)
                && is_match(&WRITES_CONFIG, serialized)
        }
        "installs_packages" => is_match(&INSTALLS_PACKAGES, serialized),
        _ => return None,
    };
    Some(matched)
}

/// True when the URL's host is plainly local: loopback addresses and
/// `localhost`. Anything unparseable counts as external.
fn is_loopback_url(url: &str) -> bool {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let host = if let Some(stripped) = host.strip_prefix('[') {
        stripped.split(']').next().unwrap_or(stripped)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    host.eq_ignore_ascii_case("localhost")
        || host == "::1"
        || host == "0.0.0.0"
        || host.starts_with("127.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(condition: &str, serialized: &str, category: ToolCategory) -> bool {
        condition_matches(condition, serialized, category, None, None).unwrap_or(false)
    }

    #[test]
    fn secrets_and_destructive_patterns() {
        assert!(check(
            "touches_secrets",
            r#"{"path":".env"}"#,
            ToolCategory::FileWrite
        ));
        assert!(check(
            "touches_secrets",
            r#"{"content":"API_KEY=x"}"#,
            ToolCategory::FileWrite
        ));
        assert!(check(
            "destructive",
            r#"{"command":"rm -rf /srv"}"#,
            ToolCategory::Shell
        ));
        assert!(check(
            "destructive",
            r#"{"command":"git clean -f"}"#,
            ToolCategory::Shell
        ));
        assert!(!check(
            "destructive",
            r#"{"command":"ls -la"}"#,
            ToolCategory::Shell
        ));
    }

    #[test]
    fn external_network_sees_urls_and_shell_fetches() {
        assert!(
            condition_matches(
                "external_network",
                r#"{"url":"https://example.com"}"#,
                ToolCategory::Network,
                None,
                Some("https://example.com"),
            )
            .unwrap_or(false)
        );
        assert!(
            !condition_matches(
                "external_network",
                r#"{"url":"http://127.0.0.1:8080/x"}"#,
                ToolCategory::Network,
                None,
                Some("http://127.0.0.1:8080/x"),
            )
            .unwrap_or(false)
        );
        assert!(
            condition_matches(
                "external_network",
                r#"{"command":"curl https://x.io"}"#,
                ToolCategory::Shell,
                Some("curl https://x.io"),
                None,
            )
            .unwrap_or(false)
        );
    }

    #[test]
    fn writes_config_requires_write_or_shell_category() {
        let serialized = r#"{"path":"app/config.yaml"}"#;
        assert!(check("writes_config", serialized, ToolCategory::FileWrite));
        assert!(!check("writes_config", serialized, ToolCategory::FileRead));
    }

    #[test]
    fn unknown_condition_defers_to_custom_pattern() {
        assert_eq!(
            condition_matches("made_up", "{}", ToolCategory::Unknown, None, None),
            None
        );
    }
}
