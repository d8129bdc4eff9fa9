use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::{Contributor, TraceConversation, TraceFile, TraceRange};
use crate::vcs::{AddedRange, VersionControl};

pub const FALLBACK_FILE_PATH: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFiles {
    pub files: Vec<TraceFile>,
    /// Set when no file had added lines and a placeholder `[1,1]` file stands in.
    pub used_fallback: bool,
}

/// Resolves the files and added line ranges a commit contributes.
///
/// Hints narrow the commit's changed files and never add to them. A commit
/// whose diff yields nothing gets one synthetic file so it is never left
/// without attribution; `used_fallback` marks that case.
pub fn resolve_trace_files(
    vcs: &dyn VersionControl,
    repo_root: &Path,
    commit_sha: &str,
    file_hints: &[String],
    model_id: Option<&str>,
) -> Result<ResolvedFiles> {
    let details = vcs
        .commit_details(repo_root, commit_sha)
        .with_context(|| format!("failed to read changed files for commit {commit_sha}"))?;

    let hints = file_hints
        .iter()
        .filter_map(|hint| normalize_hint(hint, repo_root))
        .collect::<Vec<_>>();

    let mut candidates: Vec<&str> = Vec::new();
    for path in details.changed_paths() {
        if candidates.contains(&path) {
            continue;
        }
        if hints.is_empty() || hints.iter().any(|hint| hint == path) {
            candidates.push(path);
        }
    }

    let contributor = Contributor::for_model(model_id);
    let mut files = Vec::new();
    for path in candidates {
        let ranges = vcs
            .commit_added_ranges(repo_root, commit_sha, path)
            .with_context(|| format!("failed to diff {path} in commit {commit_sha}"))?;
        if ranges.is_empty() {
            debug!(commit = commit_sha, path, "no added lines; skipping file");
            continue;
        }
        files.push(trace_file(path, &ranges, &contributor));
    }

    if !files.is_empty() {
        return Ok(ResolvedFiles {
            files,
            used_fallback: false,
        });
    }

    let path = hints
        .first()
        .map_or(FALLBACK_FILE_PATH, String::as_str)
        .to_string();
    Ok(ResolvedFiles {
        files: vec![trace_file(
            &path,
            &[AddedRange { start: 1, end: 1 }],
            &contributor,
        )],
        used_fallback: true,
    })
}

fn trace_file(path: &str, ranges: &[AddedRange], contributor: &Contributor) -> TraceFile {
    TraceFile {
        path: path.to_string(),
        conversations: vec![TraceConversation {
            url: None,
            contributor: Some(contributor.clone()),
            ranges: ranges
                .iter()
                .map(|range| TraceRange {
                    start_line: range.start,
                    end_line: range.end,
                    content_hash: None,
                    contributor: Some(contributor.clone()),
                })
                .collect(),
            related: Vec::new(),
        }],
    }
}

/// Telemetry reports paths as the tool saw them: `./src/a.rs`, absolute
/// paths inside the checkout, or plain repo-relative paths. Git reports
/// repo-relative paths with forward slashes.
fn normalize_hint(hint: &str, repo_root: &Path) -> Option<String> {
    let trimmed = hint.trim();
    if trimmed.is_empty() {
        return None;
    }
    let relative = Path::new(trimmed)
        .strip_prefix(repo_root)
        .ok()
        .and_then(Path::to_str)
        .unwrap_or(trimmed);
    let normalized = relative
        .replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string();
    (!normalized.is_empty()).then_some(normalized)
}
