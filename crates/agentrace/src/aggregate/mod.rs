use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{LineBuckets, TraceCommitSummary, TraceFileSummary};
use crate::sqlite::{
    IngestOutcome, commit_file_row_counts, commit_line_tallies, ingest_trace_record, row_counts,
};
use crate::trace_files::{TraceFileStore, stored_trace_paths};
use crate::utils::redaction::RedactionFilter;
use crate::validate::parse_trace_record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTotals {
    pub commits: u64,
    pub files: u64,
    pub conversations: u64,
    pub ranges: u64,
    pub ai_lines: u64,
    pub human_lines: u64,
    pub mixed_lines: u64,
    pub unknown_lines: u64,
    pub ai_percent: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReingestStats {
    pub files_seen: usize,
    pub records_inserted: usize,
    pub already_present: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub by_commit: BTreeMap<String, TraceCommitSummary>,
    pub by_file_by_commit: BTreeMap<String, BTreeMap<String, TraceFileSummary>>,
    pub totals: ScanTotals,
    pub reingest: ReingestStats,
}

/// Where a scan finds stored trace files and how it scrubs their metadata.
#[derive(Clone, Copy)]
pub struct ScanContext<'a> {
    pub store: &'a dyn TraceFileStore,
    pub redaction: &'a RedactionFilter,
}

/// Re-ingests stored trace files, then summarizes attributed lines for each
/// requested commit. Commits with no stored ranges are omitted.
pub fn scan(
    connection: &mut Connection,
    context: ScanContext<'_>,
    repo_root: &Path,
    repo_id: i64,
    commit_shas: &[String],
) -> Result<ScanResult> {
    let reingest = reingest_trace_files(connection, context, repo_root, repo_id);
    let mut result = summarize_commits(connection, repo_id, commit_shas)?;
    result.reingest = reingest;
    Ok(result)
}

/// Best-effort: a file that cannot be read, parsed or stored is recorded and
/// skipped. Metadata is redacted before it reaches the store.
pub fn reingest_trace_files(
    connection: &mut Connection,
    context: ScanContext<'_>,
    repo_root: &Path,
    repo_id: i64,
) -> ReingestStats {
    let mut stats = ReingestStats::default();
    let store = context.store;
    let paths = match stored_trace_paths(store, repo_root) {
        Ok(paths) => paths,
        Err(error) => {
            warn!(error = %error, "could not list stored trace files");
            stats.failures.push(format!("list: {error:#}"));
            return stats;
        }
    };

    for path in paths {
        stats.files_seen += 1;
        let outcome = store.read(repo_root, &path).and_then(|raw| {
            let mut record = parse_trace_record(&raw)
                .ok_or_else(|| anyhow::anyhow!("not a valid trace record"))?;
            context.redaction.redact_metadata(&mut record.metadata);
            ingest_trace_record(connection, repo_id, &record)
        });
        match outcome {
            Ok(IngestOutcome::Inserted) => stats.records_inserted += 1,
            Ok(IngestOutcome::AlreadyPresent) => stats.already_present += 1,
            Err(error) => {
                warn!(path = %path, error = %error, "skipping stored trace file");
                stats.failures.push(format!("{path}: {error:#}"));
            }
        }
    }
    debug!(
        files = stats.files_seen,
        inserted = stats.records_inserted,
        "re-ingested stored trace files"
    );
    stats
}

/// Summaries from the relational store only.
pub fn summarize_commits(
    connection: &Connection,
    repo_id: i64,
    commit_shas: &[String],
) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut total_buckets = LineBuckets::default();

    for sha in commit_shas {
        if result.by_commit.contains_key(sha) {
            continue;
        }
        let tallies = commit_line_tallies(connection, repo_id, sha)?;
        if tallies.is_empty() {
            continue;
        }

        let mut commit_buckets = LineBuckets::default();
        let mut commit_models = Vec::new();
        let mut commit_tools = Vec::new();
        let mut files: BTreeMap<String, (LineBuckets, Vec<String>, Vec<String>)> = BTreeMap::new();

        for tally in &tallies {
            commit_buckets.add(tally.contributor_type, tally.lines);
            let file = files.entry(tally.path.clone()).or_default();
            file.0.add(tally.contributor_type, tally.lines);
            if let Some(model) = tally.model_id.as_deref() {
                push_unique(&mut commit_models, model);
                push_unique(&mut file.1, model);
            }
            if let Some(tool) = tally.tool_name.as_deref() {
                push_unique(&mut commit_tools, tool);
                push_unique(&mut file.2, tool);
            }
        }

        let counts = commit_file_row_counts(connection, repo_id, sha)?
            .into_iter()
            .collect::<BTreeMap<_, _>>();
        let file_summaries = files
            .into_iter()
            .map(|(path, (buckets, model_ids, tool_names))| {
                let file_counts = counts.get(&path).copied().unwrap_or_default();
                let summary = TraceFileSummary {
                    commit_sha: sha.clone(),
                    path: path.clone(),
                    ai_lines: buckets.ai_lines,
                    human_lines: buckets.human_lines,
                    mixed_lines: buckets.mixed_lines,
                    unknown_lines: buckets.unknown_lines,
                    ai_percent: buckets.ai_percent(),
                    model_ids,
                    tool_names,
                    conversations: file_counts.conversations,
                    ranges: file_counts.ranges,
                };
                (path, summary)
            })
            .collect::<BTreeMap<_, _>>();

        let commit_counts = row_counts(connection, repo_id, Some(sha))?;
        result.totals.commits += 1;
        result.totals.files += file_summaries.len() as u64;
        result.totals.conversations += commit_counts.conversations;
        result.totals.ranges += commit_counts.ranges;
        total_buckets.merge(&commit_buckets);

        result.by_commit.insert(
            sha.clone(),
            TraceCommitSummary {
                commit_sha: sha.clone(),
                ai_lines: commit_buckets.ai_lines,
                human_lines: commit_buckets.human_lines,
                mixed_lines: commit_buckets.mixed_lines,
                unknown_lines: commit_buckets.unknown_lines,
                ai_percent: commit_buckets.ai_percent(),
                model_ids: commit_models,
                tool_names: commit_tools,
            },
        );
        result.by_file_by_commit.insert(sha.clone(), file_summaries);
    }

    result.totals.ai_lines = total_buckets.ai_lines;
    result.totals.human_lines = total_buckets.human_lines;
    result.totals.mixed_lines = total_buckets.mixed_lines;
    result.totals.unknown_lines = total_buckets.unknown_lines;
    result.totals.ai_percent = total_buckets.ai_percent();
    Ok(result)
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}
