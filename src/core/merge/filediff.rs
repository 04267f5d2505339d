// Unified diff of one local file against the tracked pack version. The
// requested path may be given as `config/...` or relative to `config/`;
// both spellings resolve to the same tracked file.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::core::downloader::Downloader;
use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::index::PackageIndex;

use super::hash_bytes;
use super::inspect::DiffStatus;
use super::text::split_lines;

/// One file diffed against the tracked pack baseline.
#[derive(Debug)]
pub struct FileDiffOutcome {
    pub requested_path: String,
    /// The candidate spelling that actually resolved on disk.
    pub resolved_path: String,
    pub status: DiffStatus,
    /// Unified-diff text; empty when the contents are identical.
    pub diff: String,
}

/// Downloads the pack archive for `config_version` and diffs the requested
/// file against it.
pub async fn diff_file_against_pack(
    downloader: &Downloader,
    game_dir: &Path,
    index: &PackageIndex,
    config_version: &str,
    requested_path: &str,
    cancel: &CancellationToken,
) -> UpdaterResult<FileDiffOutcome> {
    if config_version.trim().is_empty() {
        return Err(UpdaterError::Other(
            "missing config version in local state".to_string(),
        ));
    }

    let workspace = tempfile::tempdir().map_err(|e| UpdaterError::io("file diff tempdir", e))?;
    let pack_dir = super::download_and_extract_pack(
        downloader,
        index,
        config_version,
        &workspace.path().join("pack"),
        cancel,
    )
    .await
    .map_err(|e| UpdaterError::Other(format!("downloading pack baseline: {e}")))?;

    diff_file_in_tree(game_dir, &pack_dir, requested_path)
}

/// Diffs one file between the user's tree and an extracted pack tree.
fn diff_file_in_tree(
    game_dir: &Path,
    pack_dir: &Path,
    requested_path: &str,
) -> UpdaterResult<FileDiffOutcome> {
    let candidates = normalize_diff_path_candidates(requested_path)?;

    let Some((pack_path, pack_content)) = read_first_existing(pack_dir, &candidates)? else {
        // Not shipped by the pack; a local-only file diffs as added.
        let Some((local_path, local_content)) = read_first_existing(game_dir, &candidates)? else {
            return Err(UpdaterError::Other(format!(
                "file {requested_path:?} not found in tracked pack or local instance"
            )));
        };
        let diff = render_unified_line_diff(
            b"",
            &local_content,
            &format!("pack/{local_path}"),
            &format!("local/{local_path}"),
        );
        return Ok(FileDiffOutcome {
            requested_path: requested_path.to_string(),
            resolved_path: local_path,
            status: DiffStatus::Added,
            diff,
        });
    };

    let local_path = game_dir.join(&pack_path);
    let local_content = match std::fs::read(&local_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let diff = render_unified_line_diff(
                &pack_content,
                b"",
                &format!("pack/{pack_path}"),
                &format!("local/{pack_path}"),
            );
            return Ok(FileDiffOutcome {
                requested_path: requested_path.to_string(),
                resolved_path: pack_path,
                status: DiffStatus::Removed,
                diff,
            });
        }
        Err(e) => return Err(UpdaterError::io(&local_path, e)),
    };

    let status = if hash_bytes(&pack_content) == hash_bytes(&local_content) {
        DiffStatus::Unchanged
    } else {
        DiffStatus::Modified
    };
    let diff = render_unified_line_diff(
        &pack_content,
        &local_content,
        &format!("pack/{pack_path}"),
        &format!("local/{pack_path}"),
    );

    Ok(FileDiffOutcome {
        requested_path: requested_path.to_string(),
        resolved_path: pack_path,
        status,
        diff,
    })
}

/// Validates a user-supplied path and expands it into the spellings the pack
/// may track it under (`config/<rest>` and `<rest>`).
fn normalize_diff_path_candidates(requested_path: &str) -> UpdaterResult<Vec<String>> {
    let raw = requested_path.trim();
    if raw.is_empty() {
        return Err(UpdaterError::Other("path must not be empty".to_string()));
    }

    let raw = raw.replace('\\', "/");
    let clean = clean_slash_path(&raw);
    if clean == "." {
        return Err(UpdaterError::Other("path must reference a file".to_string()));
    }
    if clean.starts_with('/') {
        return Err(UpdaterError::Other(format!(
            "path must be relative, got {requested_path:?}"
        )));
    }
    if clean == ".." || clean.starts_with("../") {
        return Err(UpdaterError::Other(format!(
            "path traversal is not allowed: {requested_path:?}"
        )));
    }
    if clean.contains(':') {
        return Err(UpdaterError::Other(format!(
            "path must not contain a drive letter: {requested_path:?}"
        )));
    }

    let mut candidates = vec![clean.clone()];
    match clean.strip_prefix("config/") {
        Some(rest) => candidates.push(rest.to_string()),
        None => candidates.push(format!("config/{clean}")),
    }

    candidates.retain(|c| !c.is_empty() && c != ".");
    candidates.dedup();
    Ok(candidates)
}

/// Lexical path cleanup: collapses `.`, empty segments, and inner `..`.
fn clean_slash_path(p: &str) -> String {
    let rooted = p.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for segment in p.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|s| *s != "..") {
                    stack.pop();
                } else if !rooted {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }

    let joined = stack.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Reads the first candidate path that exists under `root`.
fn read_first_existing(
    root: &Path,
    candidates: &[String],
) -> UpdaterResult<Option<(String, Vec<u8>)>> {
    for rel in candidates {
        let full = root.join(rel);
        match std::fs::read(&full) {
            Ok(content) => return Ok(Some((rel.clone(), content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(UpdaterError::io(&full, e)),
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOpKind {
    Equal,
    Delete,
    Insert,
}

struct LineOp<'a> {
    kind: LineOpKind,
    line: &'a str,
}

/// Renders a minimal unified diff. Identical contents and binary inputs
/// short-circuit to an empty string or a one-line notice.
fn render_unified_line_diff(
    old_content: &[u8],
    new_content: &[u8],
    old_label: &str,
    new_label: &str,
) -> String {
    if old_content == new_content {
        return String::new();
    }
    if !is_likely_text(old_content) || !is_likely_text(new_content) {
        return format!("Binary files differ: {old_label} -> {new_label}");
    }

    let old_str = String::from_utf8_lossy(old_content);
    let new_str = String::from_utf8_lossy(new_content);
    let old_lines = split_lines(&old_str);
    let new_lines = split_lines(&new_str);
    let ops = diff_line_ops(&old_lines, &new_lines);

    if ops.iter().all(|op| op.kind == LineOpKind::Equal) {
        return String::new();
    }

    let mut out = String::new();
    out.push_str("--- ");
    out.push_str(old_label);
    out.push('\n');
    out.push_str("+++ ");
    out.push_str(new_label);
    out.push('\n');
    out.push_str("@@\n");
    for op in ops {
        out.push(match op.kind {
            LineOpKind::Equal => ' ',
            LineOpKind::Delete => '-',
            LineOpKind::Insert => '+',
        });
        out.push_str(op.line);
        out.push('\n');
    }
    out
}

fn is_likely_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return true;
    }
    if data.contains(&0) {
        return false;
    }
    std::str::from_utf8(data).is_ok()
}

/// Full edit script between the two line lists, LCS-anchored.
fn diff_line_ops<'a>(old_lines: &[&'a str], new_lines: &[&'a str]) -> Vec<LineOp<'a>> {
    let m = old_lines.len();
    let n = new_lines.len();

    // dp[i][j] = LCS length of old[i..] and new[j..].
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            dp[i][j] = if old_lines[i] == new_lines[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(m + n);
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if old_lines[i] == new_lines[j] {
            ops.push(LineOp {
                kind: LineOpKind::Equal,
                line: old_lines[i],
            });
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            ops.push(LineOp {
                kind: LineOpKind::Delete,
                line: old_lines[i],
            });
            i += 1;
        } else {
            ops.push(LineOp {
                kind: LineOpKind::Insert,
                line: new_lines[j],
            });
            j += 1;
        }
    }
    while i < m {
        ops.push(LineOp {
            kind: LineOpKind::Delete,
            line: old_lines[i],
        });
        i += 1;
    }
    while j < n {
        ops.push(LineOp {
            kind: LineOpKind::Insert,
            line: new_lines[j],
        });
        j += 1;
    }

    ops
}
