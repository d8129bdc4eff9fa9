use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitDetails {
    pub sha: String,
    pub file_changes: Vec<FileChange>,
}

impl CommitDetails {
    #[must_use]
    pub fn changed_paths(&self) -> Vec<&str> {
        self.file_changes
            .iter()
            .map(|change| change.path.as_str())
            .collect()
    }
}

/// Inclusive run of lines added by a commit, 1-based, in the new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddedRange {
    pub start: u32,
    pub end: u32,
}

pub trait VersionControl {
    fn commit_details(&self, repo_root: &Path, sha: &str) -> Result<CommitDetails>;

    fn head_sha(&self, repo_root: &Path) -> Result<String>;

    fn commit_added_ranges(&self, repo_root: &Path, sha: &str, path: &str)
    -> Result<Vec<AddedRange>>;
}

/// [`VersionControl`] backed by the `git` executable on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl VersionControl for GitCli {
    fn commit_details(&self, repo_root: &Path, sha: &str) -> Result<CommitDetails> {
        let output = run_git(
            repo_root,
            &[
                "diff-tree",
                "-r",
                "--root",
                "--no-commit-id",
                "--name-status",
                "-M",
                sha,
            ],
        )?;
        Ok(CommitDetails {
            sha: sha.to_string(),
            file_changes: parse_name_status(&output),
        })
    }

    fn head_sha(&self, repo_root: &Path) -> Result<String> {
        let output = run_git(repo_root, &["rev-parse", "--verify", "HEAD"])?;
        let sha = output.trim();
        if sha.is_empty() {
            bail!("git rev-parse HEAD returned no revision");
        }
        Ok(sha.to_string())
    }

    fn commit_added_ranges(
        &self,
        repo_root: &Path,
        sha: &str,
        path: &str,
    ) -> Result<Vec<AddedRange>> {
        let output = run_git(
            repo_root,
            &[
                "diff-tree",
                "-p",
                "-U0",
                "--no-color",
                "--no-ext-diff",
                "--root",
                "--no-commit-id",
                "-r",
                sha,
                "--",
                path,
            ],
        )?;
        Ok(parse_added_ranges(&output))
    }
}

/// Runs `git -C <repo_root> <args>` and returns stdout, failing on a non-zero
/// exit with git's stderr in the error.
pub fn run_git(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .args(args)
        .output()
        .with_context(|| format!("failed to spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed ({}): {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[must_use]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// Parses `--name-status` lines. Renames and copies report the new path.
#[must_use]
pub fn parse_name_status(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let status = fields.next()?.trim();
            let path = fields.last()?.trim();
            if status.is_empty() || path.is_empty() {
                return None;
            }
            Some(FileChange {
                path: path.to_string(),
                status: status.chars().take(1).collect(),
            })
        })
        .collect()
}

fn hunk_header_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@")
            .expect("hunk header regex should compile")
    })
}

/// Reads added line spans from a zero-context unified diff. Each hunk's
/// `+start,count` becomes one range; pure deletions (`count == 0`) add nothing.
#[must_use]
pub fn parse_added_ranges(diff: &str) -> Vec<AddedRange> {
    let mut ranges: Vec<AddedRange> = Vec::new();
    for line in diff.lines() {
        let Some(captures) = hunk_header_regex().captures(line) else {
            continue;
        };
        let Some(start) = captures
            .get(1)
            .and_then(|value| value.as_str().parse::<u32>().ok())
        else {
            continue;
        };
        let count = captures
            .get(2)
            .map_or(Some(1), |value| value.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        if count == 0 || start == 0 {
            continue;
        }
        let end = start + count - 1;
        match ranges.last_mut() {
            Some(previous) if previous.end + 1 == start => previous.end = end,
            _ => ranges.push(AddedRange { start, end }),
        }
    }
    ranges
}
