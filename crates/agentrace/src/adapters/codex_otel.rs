use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Value, json};
use tracing::{info, warn};

use super::diff_ranges::{ResolvedFiles, resolve_trace_files};
use super::envelope::otel_envelope_to_codex_events;
use super::grouping::{CommitEventGroup, CommitGrouping, group_events_by_commit};
use crate::models::{
    CodexOtelEvent, IngestIssue, TRACE_SCHEMA_VERSION, TraceRecord, TraceTool, TraceVcs,
    VCS_TYPE_GIT,
};
use crate::utils::redaction::RedactionHit;
use crate::vcs::VersionControl;

pub const ADAPTER_NAME: &str = "codex-otel";
pub const DEFAULT_TOOL_NAME: &str = "codex";
pub const PROVENANCE_METADATA_KEY: &str = "agentrace.narrative";

pub const TOOL_NAME_KEYS: &[&str] = &["tool.name", "tool_name", "service.name"];
pub const TOOL_VERSION_KEYS: &[&str] = &["tool.version", "tool_version", "service.version"];
pub const MODEL_KEYS: &[&str] = &["model", "model_id", "gen_ai.request.model", "codex.model"];
pub const CONVERSATION_KEYS: &[&str] = &["conversation.id", "conversation_id", "session_id"];
pub const FILE_PATH_KEYS: &[&str] = &["file_paths", "file_path", "files"];

pub const ISSUE_MISSING_COMMIT_SHA: &str = "missing_commit_sha";
pub const ISSUE_ZERO_RANGES: &str = "zero_diff_ranges";
pub const ISSUE_DIFF_FAILED: &str = "diff_resolution_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSource {
    Diff,
    Fallback,
}

impl RangeSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Diff => "diff",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionOutput {
    pub records: Vec<TraceRecord>,
    pub issues: Vec<IngestIssue>,
    pub events_read: usize,
    pub commits_grouped: usize,
}

impl ConversionOutput {
    #[must_use]
    pub fn actionable_count(&self) -> usize {
        self.issues.iter().filter(|issue| issue.is_actionable()).count()
    }

    #[must_use]
    pub fn informational_count(&self) -> usize {
        self.issues.len() - self.actionable_count()
    }
}

/// Parses a raw envelope and converts it. Malformed input yields an empty
/// output with zero events read.
pub fn otel_envelope_to_trace_records(
    raw: &str,
    repo_root: &Path,
    vcs: &dyn VersionControl,
    redactions: &[RedactionHit],
) -> ConversionOutput {
    let events = otel_envelope_to_codex_events(raw);
    codex_events_to_trace_records(events, repo_root, vcs, redactions)
}

/// Groups events by commit and builds one record per commit, in the order
/// commits first appear. A failed diff skips only that commit.
pub fn codex_events_to_trace_records(
    events: Vec<CodexOtelEvent>,
    repo_root: &Path,
    vcs: &dyn VersionControl,
    redactions: &[RedactionHit],
) -> ConversionOutput {
    let events_read = events.len();
    let grouping = group_events_by_commit(events, repo_root, vcs);

    let mut output = ConversionOutput {
        events_read,
        commits_grouped: grouping.groups.len(),
        ..ConversionOutput::default()
    };
    output.issues.extend(missing_commit_issue(&grouping));

    for group in &grouping.groups {
        let hints = file_hints(&group.events);
        let model_id = first_attribute(&group.events, MODEL_KEYS);

        let resolved = match resolve_trace_files(
            vcs,
            repo_root,
            &group.commit_sha,
            &hints,
            model_id.as_deref(),
        ) {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(commit = %group.commit_sha, error = %error, "diff resolution failed; skipping commit");
                output.issues.push(
                    IngestIssue::actionable(
                        ISSUE_DIFF_FAILED,
                        format!("could not resolve changed lines: {error:#}"),
                    )
                    .for_commit(&group.commit_sha),
                );
                continue;
            }
        };

        if resolved.used_fallback {
            info!(commit = %group.commit_sha, "no added lines found; using placeholder file");
            output.issues.push(
                IngestIssue::informational(
                    ISSUE_ZERO_RANGES,
                    format!(
                        "commit {} has no diff-derived ranges; attributed to placeholder file {}",
                        group.commit_sha, resolved.files[0].path
                    ),
                )
                .for_commit(&group.commit_sha),
            );
        }

        output
            .records
            .push(build_trace_record(group, resolved, redactions));
    }

    output
}

/// Builds the record for one commit. `files` must already be resolved.
#[must_use]
pub fn build_trace_record(
    group: &CommitEventGroup,
    files: ResolvedFiles,
    redactions: &[RedactionHit],
) -> TraceRecord {
    let first = group.first_event();
    let first_timestamp = first.map_or_else(String::new, |event| event.timestamp_iso.clone());
    let tool_name = first
        .and_then(|event| event.first_value(TOOL_NAME_KEYS))
        .unwrap_or(DEFAULT_TOOL_NAME)
        .to_string();
    let tool_version = first
        .and_then(|event| event.first_value(TOOL_VERSION_KEYS))
        .map(str::to_string);
    let range_source = if files.used_fallback {
        RangeSource::Fallback
    } else {
        RangeSource::Diff
    };

    let provenance = json!({
        "derived": true,
        "source": ADAPTER_NAME,
        "conversationId": first_attribute(&group.events, CONVERSATION_KEYS),
        "redactions": redactions,
        "rangeSource": range_source.as_str(),
        "headFallback": group.used_head_fallback(),
        "eventCount": group.events.len(),
    });

    TraceRecord {
        id: format!("{tool_name}-otel-{}-{first_timestamp}", group.commit_sha),
        version: TRACE_SCHEMA_VERSION.to_string(),
        timestamp: first_timestamp,
        vcs: TraceVcs {
            vcs_type: VCS_TYPE_GIT.to_string(),
            revision: group.commit_sha.clone(),
        },
        tool: Some(TraceTool {
            name: Some(tool_name),
            version: tool_version,
        }),
        files: files.files,
        metadata: BTreeMap::from([(PROVENANCE_METADATA_KEY.to_string(), provenance)]),
    }
}

#[must_use]
pub fn provenance(record: &TraceRecord) -> Option<&Value> {
    record.metadata.get(PROVENANCE_METADATA_KEY)
}

fn missing_commit_issue(grouping: &CommitGrouping) -> Option<IngestIssue> {
    if grouping.missing_commit_events == 0 {
        return None;
    }
    let issue = match grouping.head_sha.as_deref() {
        Some(head) => IngestIssue::informational(
            ISSUE_MISSING_COMMIT_SHA,
            format!(
                "{} event(s) missing commit SHA; attributed to HEAD {head}",
                grouping.missing_commit_events
            ),
        )
        .for_commit(head),
        None => IngestIssue::informational(
            ISSUE_MISSING_COMMIT_SHA,
            format!(
                "{} event(s) missing commit SHA and HEAD could not be resolved; dropped",
                grouping.missing_commit_events
            ),
        ),
    };
    Some(issue)
}

/// Union of path hints across all events, first appearance wins.
fn file_hints(events: &[CodexOtelEvent]) -> Vec<String> {
    let mut hints: Vec<String> = Vec::new();
    for event in events {
        for key in FILE_PATH_KEYS {
            for value in event.values(key) {
                let value = value.trim();
                if !value.is_empty() && !hints.iter().any(|hint| hint == value) {
                    hints.push(value.to_string());
                }
            }
        }
    }
    hints
}

fn first_attribute(events: &[CodexOtelEvent], keys: &[&str]) -> Option<String> {
    events
        .iter()
        .find_map(|event| event.first_value(keys))
        .map(str::to_string)
}
