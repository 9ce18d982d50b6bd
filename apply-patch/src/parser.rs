//! Parses a unified diff into per-file operations.
//!
//! The parser accepts the output of `git diff` and of plain `diff -u`:
//! optional `diff --git` / `index` / `rename from` / `rename to` lines,
//! a `---` / `+++` header pair per file, then `@@` hunks. `/dev/null` on
//! either side marks an addition or a deletion. It validates structure only;
//! whether a patch applies to the filesystem is decided at apply time.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, PartialEq, Error)]
pub enum ParseError {
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    #[error("invalid hunk at line {line_number}: {message}")]
    InvalidHunk { message: String, line_number: usize },
}

/// The whole parsed patch, in file order.
#[derive(Debug, PartialEq)]
pub struct ParsedPatch {
    pub files: Vec<FilePatch>,
}

impl ParsedPatch {
    /// Every path the patch touches. Renames contribute both sides.
    pub fn affected_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for file in &self.files {
            if let Some(old) = &file.old_path
                && old != &file.path
            {
                paths.push(old.clone());
            }
            paths.push(file.path.clone());
        }
        paths
    }
}

#[derive(Debug, PartialEq)]
pub struct FilePatch {
    pub op: FileOp,
    /// Path after the patch applies (the pre-image path for deletions).
    pub path: PathBuf,
    /// Pre-image path when it differs from `path` (a rename).
    pub old_path: Option<PathBuf>,
    pub hunks: Vec<Hunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Add,
    Delete,
    Update,
}

/// One `@@` hunk. `removed` holds the pre-image lines (context plus `-`),
/// `inserted` the post-image lines (context plus `+`), both in order.
#[derive(Debug, PartialEq)]
pub struct Hunk {
    pub old_start: usize,
    pub removed: Vec<String>,
    pub inserted: Vec<String>,
}

pub fn parse_unified(patch: &str) -> Result<ParsedPatch, ParseError> {
    let lines: Vec<&str> = patch.lines().collect();
    let mut files = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];
        if line.starts_with("--- ") {
            let (file, consumed) = parse_file_section(&lines[index..], index + 1)?;
            files.push(file);
            index += consumed;
        } else if line.starts_with("rename from ") {
            // A pure rename carries no ---/+++ pair.
            let from = line["rename from ".len()..].trim();
            let to_line = lines.get(index + 1).copied().unwrap_or_default();
            let Some(to) = to_line.strip_prefix("rename to ") else {
                return Err(ParseError::InvalidHunk {
                    message: "rename from without rename to".to_string(),
                    line_number: index + 1,
                });
            };
            files.push(FilePatch {
                op: FileOp::Update,
                path: PathBuf::from(to.trim()),
                old_path: Some(PathBuf::from(from)),
                hunks: Vec::new(),
            });
            index += 2;
        } else {
            index += 1;
        }
    }

    if files.is_empty() {
        return Err(ParseError::InvalidPatch(
            "no file headers found (expected '---' / '+++' pairs)".to_string(),
        ));
    }
    Ok(ParsedPatch { files })
}

/// Parse one `---`/`+++` section starting at `lines[0]`. Returns the file
/// patch and the number of lines consumed.
fn parse_file_section(
    lines: &[&str],
    base_line_number: usize,
) -> Result<(FilePatch, usize), ParseError> {
    let old_name = lines[0]["--- ".len()..].trim();
    let Some(new_header) = lines.get(1) else {
        return Err(ParseError::InvalidPatch(
            "'---' header without matching '+++'".to_string(),
        ));
    };
    let Some(new_name) = new_header.strip_prefix("+++ ") else {
        return Err(ParseError::InvalidHunk {
            message: format!("expected '+++' after '---', found {new_header:?}"),
            line_number: base_line_number + 1,
        });
    };
    let new_name = new_name.trim();

    let old = normalize_header_path(old_name);
    let new = normalize_header_path(new_name);
    let (op, path, old_path) = match (old, new) {
        (None, Some(path)) => (FileOp::Add, path, None),
        (Some(path), None) => (FileOp::Delete, path, None),
        (Some(old), Some(new)) if old != new => (FileOp::Update, new, Some(old)),
        (Some(_), Some(new)) => (FileOp::Update, new, None),
        (None, None) => {
            return Err(ParseError::InvalidHunk {
                message: "both sides of the header are /dev/null".to_string(),
                line_number: base_line_number,
            });
        }
    };

    let mut hunks = Vec::new();
    let mut index = 2;
    while index < lines.len() && lines[index].starts_with("@@") {
        let (hunk, consumed) = parse_hunk(&lines[index..], base_line_number + index)?;
        hunks.push(hunk);
        index += consumed;
    }

    if hunks.is_empty() && op != FileOp::Delete {
        return Err(ParseError::InvalidHunk {
            message: format!("no hunks for {}", path.display()),
            line_number: base_line_number,
        });
    }
    Ok((
        FilePatch {
            op,
            path,
            old_path,
            hunks,
        },
        index,
    ))
}

fn parse_hunk(lines: &[&str], line_number: usize) -> Result<(Hunk, usize), ParseError> {
    let old_start = parse_hunk_header(lines[0]).ok_or_else(|| ParseError::InvalidHunk {
        message: format!("malformed hunk header {:?}", lines[0]),
        line_number,
    })?;

    let mut removed = Vec::new();
    let mut inserted = Vec::new();
    let mut index = 1;
    while index < lines.len() {
        let line = lines[index];
        if let Some(text) = line.strip_prefix('+') {
            inserted.push(text.to_string());
        } else if let Some(text) = line.strip_prefix('-') {
            removed.push(text.to_string());
        } else if let Some(text) = line.strip_prefix(' ') {
            removed.push(text.to_string());
            inserted.push(text.to_string());
        } else if line.is_empty() {
            // Some producers emit empty context lines without the leading
            // space.
            removed.push(String::new());
            inserted.push(String::new());
        } else if line == r"\ No newline at end of file" {
            // Metadata only; the apply step works line-wise.
        } else {
            break;
        }
        index += 1;
    }

    if removed.is_empty() && inserted.is_empty() {
        return Err(ParseError::InvalidHunk {
            message: "hunk has no content lines".to_string(),
            line_number,
        });
    }
    Ok((
        Hunk {
            old_start,
            removed,
            inserted,
        },
        index,
    ))
}

/// Extract the pre-image start line from `@@ -l[,c] +l[,c] @@`.
fn parse_hunk_header(header: &str) -> Option<usize> {
    let rest = header.strip_prefix("@@ -")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Strip the `a/`/`b/` prefixes git puts on header paths; `/dev/null` maps
/// to `None`.
fn normalize_header_path(name: &str) -> Option<PathBuf> {
    // `git diff` appends a tab plus timestamp in some configurations.
    let name = name.split('\t').next().unwrap_or(name);
    if name == "/dev/null" {
        return None;
    }
    let stripped = name
        .strip_prefix("a/")
        .or_else(|| name.strip_prefix("b/"))
        .unwrap_or(name);
    Some(PathBuf::from(stripped))
}
