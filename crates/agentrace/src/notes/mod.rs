use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::{ScanContext, scan};
use crate::models::TraceCommitSummary;
use crate::sqlite::trace_ids_for_revision;
use crate::utils::time::now_utc_iso;
use crate::vcs::run_git;

pub const DEFAULT_NOTES_NAMESPACE: &str = "agent";

/// Per-commit summary mirrored into git notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_percentage: Option<u8>,

    pub timestamp: String,
}

impl Note {
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }
}

/// The first model and first tool stand in for the whole commit.
#[must_use]
pub fn build_note(summary: &TraceCommitSummary, session_id: Option<&str>) -> Note {
    Note {
        session_id: session_id.map(str::to_string),
        trace_id: None,
        model: summary.model_ids.first().cloned(),
        tool: summary.tool_names.first().cloned(),
        confidence: None,
        ai_percentage: Some(summary.ai_percent),
        timestamp: now_utc_iso(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteEntry {
    pub note_object: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitNotes {
    namespace: String,
}

impl Default for GitNotes {
    fn default() -> Self {
        Self::new(DEFAULT_NOTES_NAMESPACE)
    }
}

impl GitNotes {
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn ref_arg(&self) -> String {
        format!("--ref={}", self.namespace)
    }

    /// Missing notes and git failures both read as `None`.
    #[must_use]
    pub fn read(&self, repo_root: &Path, commit_sha: &str) -> Option<Note> {
        let ref_arg = self.ref_arg();
        let raw = run_git(repo_root, &["notes", &ref_arg, "show", commit_sha]).ok()?;
        serde_json::from_str(raw.trim()).ok()
    }

    /// Overwrites any existing note on the commit.
    pub fn write(&self, repo_root: &Path, commit_sha: &str, note: &Note) -> Result<()> {
        let encoded = serde_json::to_string_pretty(note).context("failed to encode note")?;
        let ref_arg = self.ref_arg();
        run_git(
            repo_root,
            &["notes", &ref_arg, "add", "-f", "-m", &encoded, commit_sha],
        )
        .with_context(|| format!("failed to write note for {commit_sha}"))?;
        debug!(commit = commit_sha, namespace = %self.namespace, "note written");
        Ok(())
    }

    pub fn remove(&self, repo_root: &Path, commit_sha: &str) -> Result<()> {
        let ref_arg = self.ref_arg();
        run_git(
            repo_root,
            &["notes", &ref_arg, "remove", "--ignore-missing", commit_sha],
        )
        .with_context(|| format!("failed to remove note for {commit_sha}"))?;
        debug!(commit = commit_sha, namespace = %self.namespace, "note removed");
        Ok(())
    }

    pub fn list(&self, repo_root: &Path) -> Result<Vec<NoteEntry>> {
        let ref_arg = self.ref_arg();
        let output = run_git(repo_root, &["notes", &ref_arg, "list"])
            .with_context(|| format!("failed to list notes in {}", self.namespace))?;
        Ok(parse_notes_list(&output))
    }
}

/// Parses `<note-object> <commit>` lines.
#[must_use]
pub fn parse_notes_list(output: &str) -> Vec<NoteEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let note_object = fields.next()?;
            let commit_sha = fields.next()?;
            Some(NoteEntry {
                note_object: note_object.to_string(),
                commit_sha: commit_sha.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotesSyncReport {
    pub namespace: String,
    pub written: Vec<String>,
    pub skipped: Vec<String>,
}

/// Scans `commit_shas` and writes a note for each commit with attributed
/// lines. Commits without stored ranges are skipped.
pub fn sync_notes(
    connection: &mut Connection,
    context: ScanContext<'_>,
    notes: &GitNotes,
    repo_root: &Path,
    repo_id: i64,
    commit_shas: &[String],
    session_id: Option<&str>,
) -> Result<NotesSyncReport> {
    let result = scan(connection, context, repo_root, repo_id, commit_shas)?;
    let mut report = NotesSyncReport {
        namespace: notes.namespace().to_string(),
        ..NotesSyncReport::default()
    };

    for sha in commit_shas {
        let Some(summary) = result.by_commit.get(sha) else {
            report.skipped.push(sha.clone());
            continue;
        };
        if report.written.contains(sha) {
            continue;
        }
        let trace_id = trace_ids_for_revision(connection, repo_id, sha)?
            .into_iter()
            .next_back();
        let note = build_note(summary, session_id).with_trace_id(trace_id);
        notes.write(repo_root, sha, &note)?;
        report.written.push(sha.clone());
    }

    info!(
        written = report.written.len(),
        skipped = report.skipped.len(),
        namespace = %notes.namespace(),
        "notes synced"
    );
    Ok(report)
}
