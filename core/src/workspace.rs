//! Workspace provisioning: clone a requested git URL under the managed
//! root, or validate a filesystem path (optionally pinning it to a branch
//! via a worktree), and tear either down again on removal.
//!
//! All git work shells out to the `git` CLI with timeouts so a wedged
//! remote cannot wedge session creation.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use tracing::warn;
use url::Url;

use crate::config::ClonePolicy;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::error::StewardErr;
use crate::paths;
use steward_protocol::looks_like_git_url;

const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);
const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the managed clones live, relative to the project root.
const WORKSPACES_SUBDIR: &str = ".steward/headless/workspaces";
/// Where per-session worktrees live, relative to the target repo.
const WORKTREES_SUBDIR: &str = ".steward/worktrees/headless";

#[derive(Debug, Clone)]
pub struct Workspace {
    /// The directory tools operate in.
    pub path: PathBuf,
    /// True when the registry cloned this workspace and owns its lifetime.
    pub cloned: bool,
    /// The repo the worktree belongs to, when one was created.
    pub worktree_of: Option<PathBuf>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

/// Resolve the `project` a session asked for into a working directory.
pub async fn provision(
    config: &RuntimeConfig,
    session_id: &str,
    project: &str,
    branch: Option<&str>,
) -> Result<Workspace> {
    if looks_like_git_url(project) {
        check_clone_policy(project, &config.clone_policy)?;
        let Some(project_root) = &config.project_root else {
            return Err(StewardErr::Workspace(
                "a project root must be configured before cloning".to_string(),
            ));
        };
        let dest = project_root
            .join(WORKSPACES_SUBDIR)
            .join(session_id)
            .join("source");
        clone_into(project, &dest, branch).await?;
        return Ok(Workspace {
            path: dest,
            cloned: true,
            worktree_of: None,
            repo_url: Some(project.to_string()),
            branch: branch.map(str::to_string),
        });
    }

    // Path mode: absolute, canonical, and inside the project root when one
    // is configured.
    let absolute = if Path::new(project).is_absolute() {
        PathBuf::from(project)
    } else {
        std::env::current_dir()?.join(project)
    };
    let canonical = tokio::fs::canonicalize(&absolute)
        .await
        .map_err(|err| StewardErr::Workspace(format!("{project}: {err}")))?;
    if let Some(project_root) = &config.project_root
        && !paths::is_within(project_root, &canonical)
    {
        return Err(StewardErr::Workspace(format!(
            "{} is outside the configured project root",
            canonical.display()
        )));
    }

    if let Some(branch) = branch
        && canonical.join(".git").exists()
    {
        let worktree = canonical.join(WORKTREES_SUBDIR).join(session_id);
        add_worktree(&canonical, &worktree, branch).await?;
        return Ok(Workspace {
            path: worktree,
            cloned: false,
            worktree_of: Some(canonical),
            repo_url: None,
            branch: Some(branch.to_string()),
        });
    }

    Ok(Workspace {
        path: canonical,
        cloned: false,
        worktree_of: None,
        repo_url: None,
        branch: None,
    })
}

/// Tear down whatever `provision` created. Path-mode workspaces without a
/// worktree are left untouched.
pub async fn cleanup(config: &RuntimeConfig, session_id: &str, workspace: &Workspace) -> Result<()> {
    if workspace.cloned {
        let Some(project_root) = &config.project_root else {
            return Ok(());
        };
        let session_dir = project_root.join(WORKSPACES_SUBDIR).join(session_id);
        // Re-verify containment before anything recursive happens.
        if !paths::is_within(project_root, &session_dir) {
            return Err(StewardErr::Workspace(format!(
                "refusing to remove {} outside the project root",
                session_dir.display()
            )));
        }
        info!(session_id, path = %session_dir.display(), "removing cloned workspace");
        match tokio::fs::remove_dir_all(&session_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        return Ok(());
    }

    if let Some(repo) = &workspace.worktree_of {
        let expected = repo.join(WORKTREES_SUBDIR).join(session_id);
        // Only remove the worktree we created, never one the user pointed
        // the session at.
        if paths::normalize(&workspace.path) != paths::normalize(&expected) {
            warn!(
                session_id,
                path = %workspace.path.display(),
                "session path does not match the expected worktree, leaving it in place"
            );
            return Ok(());
        }
        let path_arg = expected.to_string_lossy().into_owned();
        run_git(
            repo,
            &["worktree", "remove", "--force", &path_arg],
            GIT_COMMAND_TIMEOUT,
        )
        .await?;
    }
    Ok(())
}

fn check_clone_policy(candidate: &str, policy: &ClonePolicy) -> Result<()> {
    let Ok(parsed) = Url::parse(candidate) else {
        // Recognized as a git URL but not parseable with a scheme: that is
        // the SCP form, which the clone policy refuses outright.
        return Err(StewardErr::ClonePolicy(
            "scp-style addresses are not allowed; use an https:// or ssh:// URL".to_string(),
        ));
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    if !policy
        .allowed_schemes
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&scheme))
    {
        return Err(StewardErr::ClonePolicy(format!(
            "scheme {scheme:?} is not allowed"
        )));
    }

    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if host.is_empty() {
        return Err(StewardErr::ClonePolicy("URL has no host".to_string()));
    }
    if policy
        .denied_hosts
        .iter()
        .any(|denied| denied.eq_ignore_ascii_case(&host))
    {
        return Err(StewardErr::ClonePolicy(format!("host {host:?} is denied")));
    }
    if let Some(allowed) = &policy.allowed_hosts
        && !allowed.iter().any(|a| a.eq_ignore_ascii_case(&host))
    {
        return Err(StewardErr::ClonePolicy(format!(
            "host {host:?} is not on the allow list"
        )));
    }
    if policy.deny_private_hosts && is_private_host(&host) {
        return Err(StewardErr::ClonePolicy(format!(
            "host {host:?} resolves to a private or loopback network"
        )));
    }
    Ok(())
}

/// Loopback and RFC-1918/link-local style hosts, judged syntactically.
fn is_private_host(host: &str) -> bool {
    if host == "localhost" || host == "::1" || host.ends_with(".localhost") {
        return true;
    }
    if host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host.starts_with("169.254.")
        || host == "0.0.0.0"
    {
        return true;
    }
    // 172.16.0.0/12
    if let Some(rest) = host.strip_prefix("172.")
        && let Some(second) = rest.split('.').next()
        && let Ok(second) = second.parse::<u8>()
        && (16..=31).contains(&second)
    {
        return true;
    }
    // Unique-local / link-local IPv6.
    host.starts_with("fd") || host.starts_with("fe80")
}

async fn clone_into(url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
    if dest.exists() {
        if !dest.join(".git").exists() {
            return Err(StewardErr::Workspace(format!(
                "{} exists and is not a git repository",
                dest.display()
            )));
        }
    } else {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dest_arg = dest.to_string_lossy().into_owned();
        info!(%url, dest = %dest.display(), "cloning workspace");
        run_git(
            Path::new("."),
            &["clone", url, &dest_arg],
            GIT_CLONE_TIMEOUT,
        )
        .await?;
    }

    if let Some(branch) = branch {
        checkout_branch(dest, branch).await?;
    }
    Ok(())
}

/// Check out `branch`: a local branch if it exists, else a remote-tracking
/// one, else a new branch from HEAD.
async fn checkout_branch(repo: &Path, branch: &str) -> Result<()> {
    let local = format!("refs/heads/{branch}");
    if git_succeeds(repo, &["rev-parse", "--verify", "--quiet", &local]).await {
        run_git(repo, &["checkout", branch], GIT_COMMAND_TIMEOUT).await?;
        return Ok(());
    }
    let remote = format!("refs/remotes/origin/{branch}");
    if git_succeeds(repo, &["rev-parse", "--verify", "--quiet", &remote]).await {
        let upstream = format!("origin/{branch}");
        run_git(
            repo,
            &["checkout", "-b", branch, "--track", &upstream],
            GIT_COMMAND_TIMEOUT,
        )
        .await?;
        return Ok(());
    }
    run_git(repo, &["checkout", "-b", branch], GIT_COMMAND_TIMEOUT).await?;
    Ok(())
}

/// Add a worktree pinned to `branch`, resolving it local → remote → new.
async fn add_worktree(repo: &Path, worktree: &Path, branch: &str) -> Result<()> {
    if let Some(parent) = worktree.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let wt_arg = worktree.to_string_lossy().into_owned();

    let local = format!("refs/heads/{branch}");
    if git_succeeds(repo, &["rev-parse", "--verify", "--quiet", &local]).await {
        run_git(
            repo,
            &["worktree", "add", &wt_arg, branch],
            GIT_COMMAND_TIMEOUT,
        )
        .await?;
        return Ok(());
    }
    let remote = format!("refs/remotes/origin/{branch}");
    if git_succeeds(repo, &["rev-parse", "--verify", "--quiet", &remote]).await {
        let upstream = format!("origin/{branch}");
        run_git(
            repo,
            &[
                "worktree", "add", "--track", "-b", branch, &wt_arg, &upstream,
            ],
            GIT_COMMAND_TIMEOUT,
        )
        .await?;
        return Ok(());
    }
    run_git(
        repo,
        &["worktree", "add", "-b", branch, &wt_arg],
        GIT_COMMAND_TIMEOUT,
    )
    .await?;
    Ok(())
}

async fn git_succeeds(cwd: &Path, args: &[&str]) -> bool {
    matches!(try_run_git(cwd, args, GIT_COMMAND_TIMEOUT).await, Ok(output) if output.status.success())
}

async fn run_git(cwd: &Path, args: &[&str], timeout: Duration) -> Result<std::process::Output> {
    let output = try_run_git(cwd, args, timeout).await?;
    if !output.status.success() {
        return Err(StewardErr::Workspace(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

async fn try_run_git(
    cwd: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<std::process::Output> {
    let mut command = tokio::process::Command::new("git");
    command.args(args).current_dir(cwd).kill_on_drop(true);
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StewardErr::Workspace(format!(
            "git {} timed out after {timeout:?}",
            args.first().unwrap_or(&"")
        ))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    fn policy() -> ClonePolicy {
        ClonePolicy::default()
    }

    #[test]
    fn scp_syntax_is_denied_by_policy() {
        let err = check_clone_policy("git@github.com:org/repo.git", &policy())
            .expect_err("must be denied");
        assert!(matches!(err, StewardErr::ClonePolicy(_)));
    }

    #[test]
    fn loopback_and_private_hosts_are_denied() {
        for url in [
            "https://127.0.0.1/repo.git",
            "https://localhost/repo.git",
            "http://10.0.0.8/repo.git",
            "https://172.20.1.1/repo.git",
        ] {
            assert!(
                check_clone_policy(url, &policy()).is_err(),
                "{url} should be denied"
            );
        }
    }

    #[test]
    fn public_https_is_allowed() {
        check_clone_policy("https://github.com/org/repo.git", &policy()).expect("allowed");
    }

    #[test]
    fn scheme_and_host_lists_are_enforced() {
        let mut restrictive = policy();
        restrictive.allowed_schemes = vec!["https".to_string()];
        assert!(check_clone_policy("git://host.example/repo", &restrictive).is_err());

        restrictive.allowed_hosts = Some(vec!["git.corp.example".to_string()]);
        assert!(check_clone_policy("https://github.com/org/repo.git", &restrictive).is_err());
        check_clone_policy("https://git.corp.example/org/repo.git", &restrictive)
            .expect("allow-listed host");
    }

    #[tokio::test]
    async fn path_mode_requires_containment() {
        let root = tempfile::tempdir().expect("tempdir");
        let project = root.path().join("proj");
        std::fs::create_dir_all(&project).expect("mkdir");
        let outside = tempfile::tempdir().expect("tempdir");

        // Canonicalize so platforms with a symlinked temp dir compare the
        // same forms provision() produces.
        let config = RuntimeConfig {
            project_root: Some(root.path().canonicalize().expect("canonicalize root")),
            ..RuntimeConfig::default()
        };
        let workspace = provision(&config, "s1", &project.to_string_lossy(), None)
            .await
            .expect("inside root is fine");
        assert!(!workspace.cloned);

        let err = provision(&config, "s2", &outside.path().to_string_lossy(), None)
            .await
            .expect_err("outside root must fail");
        assert!(matches!(err, StewardErr::Workspace(_)));
    }
}
