//! Unified-diff plumbing for the steward runtime: parse a patch into
//! per-file operations, render a diff from an old/new pair, and apply a
//! parsed patch to a workspace directory.
//!
//! The mission-control gate records these diffs for review, the file-change
//! middleware extracts affected paths from them, and the `apply_patch`
//! builtin tool applies them.

mod parser;
mod seek;

use std::path::Path;
use std::path::PathBuf;

use similar::TextDiff;
use thiserror::Error;

pub use parser::FileOp;
pub use parser::FilePatch;
pub use parser::Hunk;
pub use parser::ParseError;
pub use parser::ParsedPatch;
pub use parser::parse_unified;
use seek::seek_lines;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: hunk starting near line {near} does not match file contents")]
    HunkMismatch { path: PathBuf, near: usize },
    #[error("patch escapes the workspace root: {0}")]
    OutsideRoot(PathBuf),
}

/// A single applied file operation, reported back to the caller so it can
/// notify watchers and build tool results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFile {
    pub path: PathBuf,
    pub op: FileOp,
}

/// Render a unified diff with three lines of context and `a/`/`b/` headers,
/// matching what `git diff` produces for a single file.
pub fn build_unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Diff stats: (added, removed) line counts, ignoring headers.
pub fn count_changed_lines(diff: &str) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }
    (added, removed)
}

/// Parse `patch` and apply it beneath `root`. All patch paths must stay
/// inside `root`; the patch is validated in full before the first write.
pub fn apply_patch_to_dir(patch: &str, root: &Path) -> Result<Vec<AppliedFile>, ApplyError> {
    let parsed = parse_unified(patch)?;

    // Resolve and containment-check every target first so a bad trailing
    // hunk cannot leave a half-applied patch behind.
    let mut staged: Vec<(PathBuf, Option<PathBuf>, &FilePatch)> = Vec::new();
    for file in &parsed.files {
        let target = resolve_under_root(root, &file.path)?;
        let old = file
            .old_path
            .as_ref()
            .map(|p| resolve_under_root(root, p))
            .transpose()?;
        staged.push((target, old, file));
    }

    let mut new_contents: Vec<(usize, Option<String>)> = Vec::new();
    for (index, (target, old, file)) in staged.iter().enumerate() {
        match file.op {
            FileOp::Add => {
                new_contents.push((index, Some(join_lines(&hunk_inserted(file)))));
            }
            FileOp::Delete => {
                new_contents.push((index, None));
            }
            FileOp::Update => {
                let source = old.as_ref().unwrap_or(target);
                let current = std::fs::read_to_string(source).map_err(|source| ApplyError::Io {
                    path: file.path.clone(),
                    source,
                })?;
                let updated = apply_hunks(&current, &file.hunks, &file.path)?;
                new_contents.push((index, Some(updated)));
            }
        }
    }

    let mut applied = Vec::new();
    for (index, contents) in new_contents {
        let (target, old, file) = &staged[index];
        match contents {
            Some(text) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                        path: file.path.clone(),
                        source,
                    })?;
                }
                std::fs::write(target, text).map_err(|source| ApplyError::Io {
                    path: file.path.clone(),
                    source,
                })?;
                if let Some(old) = old
                    && old != target
                {
                    std::fs::remove_file(old).map_err(|source| ApplyError::Io {
                        path: file.path.clone(),
                        source,
                    })?;
                }
            }
            None => {
                std::fs::remove_file(target).map_err(|source| ApplyError::Io {
                    path: file.path.clone(),
                    source,
                })?;
            }
        }
        applied.push(AppliedFile {
            path: file.path.clone(),
            op: file.op,
        });
    }
    Ok(applied)
}

fn apply_hunks(current: &str, hunks: &[Hunk], path: &Path) -> Result<String, ApplyError> {
    let mut lines: Vec<String> = current.lines().map(str::to_string).collect();
    let had_trailing_newline = current.ends_with('\n') || current.is_empty();
    let mut cursor = 0;

    for hunk in hunks {
        let found =
            seek_lines(&lines, &hunk.removed, cursor).ok_or_else(|| ApplyError::HunkMismatch {
                path: path.to_path_buf(),
                near: hunk.old_start,
            })?;
        lines.splice(found..found + hunk.removed.len(), hunk.inserted.clone());
        cursor = found + hunk.inserted.len();
    }

    let mut result = lines.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

fn hunk_inserted(file: &FilePatch) -> Vec<String> {
    file.hunks
        .iter()
        .flat_map(|h| h.inserted.iter().cloned())
        .collect()
}

fn join_lines(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Join `relative` onto `root` and reject any traversal that would escape it.
/// Purely lexical, so it also covers paths that do not exist yet.
fn resolve_under_root(root: &Path, relative: &Path) -> Result<PathBuf, ApplyError> {
    use std::path::Component;

    if relative.is_absolute() {
        return Err(ApplyError::OutsideRoot(relative.to_path_buf()));
    }
    let mut resolved = root.to_path_buf();
    let mut depth: usize = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ApplyError::OutsideRoot(relative.to_path_buf()));
                }
                resolved.pop();
                depth -= 1;
            }
            _ => return Err(ApplyError::OutsideRoot(relative.to_path_buf())),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn build_then_parse_round_trip() {
        let old = "one\ntwo\nthree\n";
        let new = "one\n2\nthree\n";
        let diff = build_unified_diff("notes.txt", old, new);
        let parsed = parse_unified(&diff).expect("parse generated diff");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, PathBuf::from("notes.txt"));
        assert_eq!(count_changed_lines(&diff), (1, 1));
    }

    #[test]
    fn applies_update_add_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("keep.txt"), "alpha\nbeta\n").expect("seed keep");
        std::fs::write(dir.path().join("gone.txt"), "bye\n").expect("seed gone");

        let patch = "\
--- a/keep.txt
+++ b/keep.txt
@@ -1,2 +1,2 @@
 alpha
-beta
+BETA
--- /dev/null
+++ b/fresh.txt
@@ -0,0 +1 @@
+hello
--- a/gone.txt
+++ /dev/null
@@ -1 +0,0 @@
-bye
";
        let applied = apply_patch_to_dir(patch, dir.path()).expect("apply");
        assert_eq!(applied.len(), 3);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("keep.txt")).expect("read keep"),
            "alpha\nBETA\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("fresh.txt")).expect("read fresh"),
            "hello\n"
        );
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[test]
    fn mismatched_hunk_leaves_files_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("file.txt"), "actual contents\n").expect("seed");

        let patch = "\
--- a/file.txt
+++ b/file.txt
@@ -1 +1 @@
-expected contents
+replacement
";
        let err = apply_patch_to_dir(patch, dir.path()).expect_err("must fail");
        assert!(matches!(err, ApplyError::HunkMismatch { .. }));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("file.txt")).expect("read"),
            "actual contents\n"
        );
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let patch = "\
--- /dev/null
+++ b/../escape.txt
@@ -0,0 +1 @@
+nope
";
        let err = apply_patch_to_dir(patch, dir.path()).expect_err("must fail");
        assert!(matches!(err, ApplyError::OutsideRoot(_)));
    }
}
