use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::otel_envelope_to_trace_records;
use crate::models::{IngestIssue, TraceRecord};
use crate::sqlite::{
    INGEST_RUNS_TABLE, IngestOutcome, ingest_trace_record, now_utc_rfc3339, to_i64,
};
use crate::trace_files::{TraceFileStore, export_trace_record};
use crate::utils::redaction::RedactionFilter;
use crate::validate::check_trace_record;
use crate::vcs::VersionControl;

pub const INGEST_REPORT_SCHEMA_VERSION: &str = "agentrace.ingest-report.v1";

pub const ISSUE_SOURCE_NOT_FOUND: &str = "source_not_found";
pub const ISSUE_SOURCE_UNREADABLE: &str = "source_unreadable";
pub const ISSUE_NO_EVENTS: &str = "no_events";
pub const ISSUE_INVALID_RECORD: &str = "invalid_record";
pub const ISSUE_STORE_FAILED: &str = "store_failed";
pub const ISSUE_EXPORT_FAILED: &str = "trace_export_failed";

#[derive(Debug, Error)]
pub enum IngestSourceError {
    #[error("telemetry source not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read telemetry source {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn read_envelope_source(path: &Path) -> Result<String, IngestSourceError> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            IngestSourceError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            IngestSourceError::Unreadable {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Inactive,
    Active,
    Partial,
    Error,
}

impl IngestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

/// Status of a run that read at least one event. `records_stored` counts
/// records written now or already present; informational issues never count.
#[must_use]
pub const fn derive_ingest_status(records_stored: usize, actionable_errors: usize) -> IngestStatus {
    if records_stored == 0 {
        IngestStatus::Error
    } else if actionable_errors == 0 {
        IngestStatus::Active
    } else {
        IngestStatus::Partial
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPlan {
    pub envelope_path: PathBuf,
    pub repo_root: PathBuf,
    pub repo_id: i64,
    pub export_trace_files: bool,
}

/// Collaborators an ingest run reaches through.
#[derive(Clone, Copy)]
pub struct IngestContext<'a> {
    pub vcs: &'a dyn VersionControl,
    pub store: &'a dyn TraceFileStore,
    pub redaction: &'a RedactionFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestRunReport {
    pub ingest_run_id: String,
    pub repo_id: i64,
    pub source: String,
    pub status: IngestStatus,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub duration_ms: u64,
    pub events_read: usize,
    pub commits_grouped: usize,
    pub records_written: usize,
    pub records_skipped: usize,
    pub actionable_errors: usize,
    pub informational_errors: usize,
    pub redactions: usize,
    pub trace_ids: Vec<String>,
    pub exported_paths: Vec<String>,
    pub issues: Vec<IngestIssue>,
}

#[derive(Debug, Default)]
struct RunTally {
    events_read: usize,
    commits_grouped: usize,
    records_written: usize,
    records_skipped: usize,
    redactions: usize,
    trace_ids: Vec<String>,
    exported_paths: Vec<String>,
    issues: Vec<IngestIssue>,
}

impl RunTally {
    fn actionable(&self) -> usize {
        self.issues.iter().filter(|issue| issue.is_actionable()).count()
    }
}

/// Reads one telemetry envelope, converts it and stores the resulting trace
/// records. Every run is recorded in the ingest ledger, whatever its status.
pub fn run_ingest(
    connection: &mut Connection,
    plan: &IngestPlan,
    context: IngestContext<'_>,
) -> Result<IngestRunReport> {
    let started_at_utc = now_utc_rfc3339()?;
    let started_at = std::time::Instant::now();
    let ingest_run_id = build_ingest_run_id();
    let source = plan.envelope_path.display().to_string();

    insert_ingest_run_started(
        connection,
        &ingest_run_id,
        plan.repo_id,
        &source,
        &started_at_utc,
    )?;

    let mut tally = RunTally::default();
    let status = match read_envelope_source(&plan.envelope_path) {
        Err(error @ IngestSourceError::NotFound { .. }) => {
            info!(source = %source, "telemetry source not found; nothing to ingest");
            tally
                .issues
                .push(IngestIssue::informational(ISSUE_SOURCE_NOT_FOUND, error.to_string()));
            IngestStatus::Inactive
        }
        Err(error) => {
            warn!(source = %source, error = %error, "telemetry source unreadable");
            tally
                .issues
                .push(IngestIssue::actionable(ISSUE_SOURCE_UNREADABLE, error.to_string()));
            IngestStatus::Error
        }
        Ok(raw) => ingest_envelope_text(connection, plan, context, &raw, &mut tally),
    };

    let finished_at_utc = now_utc_rfc3339()?;
    let actionable_errors = tally.actionable();
    let informational_errors = tally.issues.len() - actionable_errors;
    let issues_json =
        serde_json::to_string(&tally.issues).context("failed to encode ingest issues")?;
    finalize_ingest_run(
        connection,
        &ingest_run_id,
        status,
        &finished_at_utc,
        &tally,
        &issues_json,
    )?;

    info!(
        run = %ingest_run_id,
        status = status.as_str(),
        events = tally.events_read,
        written = tally.records_written,
        skipped = tally.records_skipped,
        actionable = actionable_errors,
        "ingest run finished"
    );

    Ok(IngestRunReport {
        ingest_run_id,
        repo_id: plan.repo_id,
        source,
        status,
        started_at_utc,
        finished_at_utc,
        duration_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        events_read: tally.events_read,
        commits_grouped: tally.commits_grouped,
        records_written: tally.records_written,
        records_skipped: tally.records_skipped,
        actionable_errors,
        informational_errors,
        redactions: tally.redactions,
        trace_ids: tally.trace_ids,
        exported_paths: tally.exported_paths,
        issues: tally.issues,
    })
}

fn ingest_envelope_text(
    connection: &mut Connection,
    plan: &IngestPlan,
    context: IngestContext<'_>,
    raw: &str,
    tally: &mut RunTally,
) -> IngestStatus {
    let redacted = context.redaction.redact(raw);
    tally.redactions = redacted.total();

    let conversion = otel_envelope_to_trace_records(
        &redacted.redacted,
        &plan.repo_root,
        context.vcs,
        &redacted.hits,
    );
    tally.events_read = conversion.events_read;
    tally.commits_grouped = conversion.commits_grouped;
    tally.issues.extend(conversion.issues);

    if tally.events_read == 0 {
        tally.issues.push(IngestIssue::informational(
            ISSUE_NO_EVENTS,
            "telemetry source contained no log records",
        ));
        return IngestStatus::Inactive;
    }

    for record in &conversion.records {
        store_record(connection, plan, context, record, tally);
    }

    derive_ingest_status(
        tally.records_written + tally.records_skipped,
        tally.actionable(),
    )
}

/// Re-validates a built record, stores it and exports its trace file.
fn store_record(
    connection: &mut Connection,
    plan: &IngestPlan,
    context: IngestContext<'_>,
    record: &TraceRecord,
    tally: &mut RunTally,
) {
    let commit = record.revision().to_string();
    let normalized = serde_json::to_string(record)
        .context("failed to encode trace record")
        .and_then(|encoded| check_trace_record(&encoded));
    let record = match normalized {
        Ok(record) => record,
        Err(error) => {
            tally.issues.push(
                IngestIssue::actionable(
                    ISSUE_INVALID_RECORD,
                    format!("built trace record failed validation: {error:#}"),
                )
                .for_commit(&commit),
            );
            return;
        }
    };

    match ingest_trace_record(connection, plan.repo_id, &record) {
        Ok(IngestOutcome::Inserted) => tally.records_written += 1,
        Ok(IngestOutcome::AlreadyPresent) => tally.records_skipped += 1,
        Err(error) => {
            warn!(commit = %commit, error = %error, "failed to store trace record");
            tally.issues.push(
                IngestIssue::actionable(ISSUE_STORE_FAILED, format!("{error:#}"))
                    .for_commit(&commit),
            );
            return;
        }
    }
    tally.trace_ids.push(record.id.clone());

    if !plan.export_trace_files {
        return;
    }
    match export_trace_record(context.store, &plan.repo_root, &record) {
        Ok(path) => tally.exported_paths.push(path),
        Err(error) => {
            warn!(commit = %commit, error = %error, "failed to export trace file");
            tally.issues.push(
                IngestIssue::actionable(ISSUE_EXPORT_FAILED, format!("{error:#}"))
                    .for_commit(&commit),
            );
        }
    }
}

fn insert_ingest_run_started(
    connection: &Connection,
    ingest_run_id: &str,
    repo_id: i64,
    source: &str,
    started_at_utc: &str,
) -> Result<()> {
    connection
        .execute(
            &format!(
                "INSERT INTO {INGEST_RUNS_TABLE} (ingest_run_id, repo_id, source, started_at_utc, status)
                 VALUES (?1, ?2, ?3, ?4, 'running')"
            ),
            params![ingest_run_id, repo_id, source, started_at_utc],
        )
        .with_context(|| format!("failed to insert ingest run start row: {ingest_run_id}"))?;
    Ok(())
}

fn finalize_ingest_run(
    connection: &Connection,
    ingest_run_id: &str,
    status: IngestStatus,
    finished_at_utc: &str,
    tally: &RunTally,
    issues_json: &str,
) -> Result<()> {
    let actionable_errors = tally.actionable();
    connection
        .execute(
            &format!(
                "UPDATE {INGEST_RUNS_TABLE}
                 SET finished_at_utc = ?2,
                     status = ?3,
                     events_read = ?4,
                     commits_grouped = ?5,
                     records_written = ?6,
                     records_skipped = ?7,
                     actionable_errors = ?8,
                     informational_errors = ?9,
                     issues_json = ?10
                 WHERE ingest_run_id = ?1"
            ),
            params![
                ingest_run_id,
                finished_at_utc,
                status.as_str(),
                to_i64(tally.events_read, "events_read")?,
                to_i64(tally.commits_grouped, "commits_grouped")?,
                to_i64(tally.records_written, "records_written")?,
                to_i64(tally.records_skipped, "records_skipped")?,
                to_i64(actionable_errors, "actionable_errors")?,
                to_i64(tally.issues.len() - actionable_errors, "informational_errors")?,
                issues_json,
            ],
        )
        .with_context(|| format!("failed to finalize ingest run row: {ingest_run_id}"))?;
    Ok(())
}

fn build_ingest_run_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos() as u64);
    format!("ingest-{nanos:016x}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReportArtifact<'a> {
    pub schema_version: &'static str,
    #[serde(flatten)]
    pub report: &'a IngestRunReport,
}

#[must_use]
pub fn ingest_report_artifact_path(out_dir: &Path) -> PathBuf {
    out_dir.join("ingest").join("report.json")
}

pub fn write_ingest_report_artifact(path: &Path, report: &IngestRunReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create ingest report artifact directory: {}",
                parent.display()
            )
        })?;
    }
    let artifact = IngestReportArtifact {
        schema_version: INGEST_REPORT_SCHEMA_VERSION,
        report,
    };
    let encoded =
        serde_json::to_vec_pretty(&artifact).context("failed to encode ingest report artifact")?;
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write ingest report artifact: {}", path.display()))
}
