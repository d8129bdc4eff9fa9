use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::models::{Contributor, ContributorType, TraceRecord};

pub const SQLITE_SCHEMA_VERSION: &str = "agentrace.trace.sqlite.v1";
pub const TRACE_RECORDS_TABLE: &str = "trace_records";
pub const TRACE_FILES_TABLE: &str = "trace_files";
pub const TRACE_CONVERSATIONS_TABLE: &str = "trace_conversations";
pub const TRACE_RANGES_TABLE: &str = "trace_ranges";
pub const INGEST_RUNS_TABLE: &str = "ingest_runs";
pub const SCHEMA_META_TABLE: &str = "agentrace_schema_meta";

const CREATE_TRACE_RECORDS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trace_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    trace_id TEXT NOT NULL,
    version TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    vcs_type TEXT NOT NULL,
    revision TEXT NOT NULL,
    tool_name TEXT,
    tool_version TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    ingested_at_utc TEXT NOT NULL,
    UNIQUE (repo_id, trace_id),
    CHECK (vcs_type = 'git')
);
"#;

const CREATE_INDEX_TRACE_RECORDS_REVISION_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_trace_records_repo_revision
ON trace_records (repo_id, revision);
"#;

const CREATE_TRACE_FILES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trace_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    FOREIGN KEY(record_id) REFERENCES trace_records(id) ON DELETE CASCADE
);
"#;

const CREATE_INDEX_TRACE_FILES_RECORD_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_trace_files_record
ON trace_files (record_id, path);
"#;

const CREATE_TRACE_CONVERSATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trace_conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    url TEXT,
    contributor_type TEXT NOT NULL,
    model_id TEXT,
    related_json TEXT NOT NULL DEFAULT '[]',
    CHECK (contributor_type IN ('human', 'ai', 'mixed', 'unknown')),
    FOREIGN KEY(file_id) REFERENCES trace_files(id) ON DELETE CASCADE
);
"#;

const CREATE_INDEX_TRACE_CONVERSATIONS_FILE_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_trace_conversations_file
ON trace_conversations (file_id);
"#;

const CREATE_TRACE_RANGES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trace_ranges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content_hash TEXT,
    contributor_type TEXT NOT NULL,
    model_id TEXT,
    CHECK (start_line >= 1),
    CHECK (end_line >= start_line),
    CHECK (contributor_type IN ('human', 'ai', 'mixed', 'unknown')),
    FOREIGN KEY(conversation_id) REFERENCES trace_conversations(id) ON DELETE CASCADE
);
"#;

const CREATE_INDEX_TRACE_RANGES_CONVERSATION_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_trace_ranges_conversation
ON trace_ranges (conversation_id);
"#;

const CREATE_INGEST_RUNS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ingest_runs (
    ingest_run_id TEXT NOT NULL PRIMARY KEY,
    repo_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    started_at_utc TEXT NOT NULL,
    finished_at_utc TEXT,
    status TEXT NOT NULL,
    events_read INTEGER NOT NULL DEFAULT 0,
    commits_grouped INTEGER NOT NULL DEFAULT 0,
    records_written INTEGER NOT NULL DEFAULT 0,
    records_skipped INTEGER NOT NULL DEFAULT 0,
    actionable_errors INTEGER NOT NULL DEFAULT 0,
    informational_errors INTEGER NOT NULL DEFAULT 0,
    issues_json TEXT NOT NULL DEFAULT '[]',
    CHECK (status IN ('running', 'inactive', 'active', 'partial', 'error')),
    CHECK (events_read >= 0),
    CHECK (records_written >= 0),
    CHECK (records_skipped >= 0)
);
"#;

const CREATE_INDEX_INGEST_RUNS_REPO_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ingest_runs_repo_time
ON ingest_runs (repo_id, started_at_utc);
"#;

const CREATE_META_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS agentrace_schema_meta (
    schema_version TEXT NOT NULL,
    applied_at_utc TEXT NOT NULL
);
"#;

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_TRACE_RECORDS_TABLE_SQL,
        CREATE_INDEX_TRACE_RECORDS_REVISION_SQL,
        CREATE_TRACE_FILES_TABLE_SQL,
        CREATE_INDEX_TRACE_FILES_RECORD_SQL,
        CREATE_TRACE_CONVERSATIONS_TABLE_SQL,
        CREATE_INDEX_TRACE_CONVERSATIONS_FILE_SQL,
        CREATE_TRACE_RANGES_TABLE_SQL,
        CREATE_INDEX_TRACE_RANGES_CONVERSATION_SQL,
        CREATE_INGEST_RUNS_TABLE_SQL,
        CREATE_INDEX_INGEST_RUNS_REPO_SQL,
        CREATE_META_TABLE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create sqlite parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

pub fn ensure_sqlite_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create sqlite schema")?;

    if schema_meta_has_version(connection, SQLITE_SCHEMA_VERSION)? {
        return Ok(());
    }

    let applied_at_utc = now_utc_rfc3339()?;
    connection
        .execute(
            &format!(
                "INSERT INTO {SCHEMA_META_TABLE} (schema_version, applied_at_utc) VALUES (?1, ?2)"
            ),
            params![SQLITE_SCHEMA_VERSION, applied_at_utc],
        )
        .context("failed to write sqlite schema meta row")?;

    Ok(())
}

fn schema_meta_has_version(connection: &Connection, schema_version: &str) -> Result<bool> {
    let query = format!(
        "SELECT EXISTS(SELECT 1 FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1 LIMIT 1)"
    );
    let exists = connection
        .query_row(&query, [schema_version], |row| row.get::<usize, i64>(0))
        .context("failed to query sqlite schema version metadata")?;
    Ok(exists != 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraceRowCounts {
    pub records: u64,
    pub files: u64,
    pub conversations: u64,
    pub ranges: u64,
}

pub fn trace_record_exists(connection: &Connection, repo_id: i64, trace_id: &str) -> Result<bool> {
    let exists = connection
        .query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {TRACE_RECORDS_TABLE} WHERE repo_id = ?1 AND trace_id = ?2 LIMIT 1)"
            ),
            params![repo_id, trace_id],
            |row| row.get::<usize, i64>(0),
        )
        .with_context(|| format!("failed to check trace record existence: {trace_id}"))?;
    Ok(exists != 0)
}

/// Persists a record and its file, conversation and range rows in one
/// transaction. A `(repo_id, id)` pair already stored is left untouched.
pub fn ingest_trace_record(
    connection: &mut Connection,
    repo_id: i64,
    record: &TraceRecord,
) -> Result<IngestOutcome> {
    let tx = connection
        .transaction()
        .context("failed to open sqlite transaction")?;

    if trace_record_exists(&tx, repo_id, &record.id)? {
        debug!(trace_id = %record.id, repo_id, "trace record already stored; skipping");
        return Ok(IngestOutcome::AlreadyPresent);
    }

    let record_row_id = insert_record_row(&tx, repo_id, record)?;
    for file in &record.files {
        let file_row_id: i64 = tx
            .query_row(
                &format!(
                    "INSERT INTO {TRACE_FILES_TABLE} (record_id, path) VALUES (?1, ?2) RETURNING id"
                ),
                params![record_row_id, file.path],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to insert trace file row: {}", file.path))?;

        for conversation in &file.conversations {
            let conversation_contributor = conversation.contributor.as_ref();
            let related_json = serde_json::to_string(&conversation.related)
                .context("failed to encode related links")?;
            let conversation_row_id: i64 = tx
                .query_row(
                    &format!(
                        "INSERT INTO {TRACE_CONVERSATIONS_TABLE} (file_id, url, contributor_type, model_id, related_json)
                         VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id"
                    ),
                    params![
                        file_row_id,
                        conversation.url,
                        contributor_type_of(conversation_contributor).as_str(),
                        conversation_contributor.and_then(|c| c.model_id.as_deref()),
                        related_json,
                    ],
                    |row| row.get(0),
                )
                .with_context(|| {
                    format!("failed to insert trace conversation row for {}", file.path)
                })?;

            for range in &conversation.ranges {
                let effective = range.contributor.as_ref().or(conversation_contributor);
                tx.execute(
                    &format!(
                        "INSERT INTO {TRACE_RANGES_TABLE} (conversation_id, start_line, end_line, content_hash, contributor_type, model_id)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                    ),
                    params![
                        conversation_row_id,
                        range.start_line,
                        range.end_line,
                        range.content_hash,
                        contributor_type_of(effective).as_str(),
                        effective.and_then(|c| c.model_id.as_deref()),
                    ],
                )
                .with_context(|| {
                    format!(
                        "failed to insert trace range {}-{} for {}",
                        range.start_line, range.end_line, file.path
                    )
                })?;
            }
        }
    }

    tx.commit()
        .with_context(|| format!("failed to commit trace record: {}", record.id))?;
    debug!(trace_id = %record.id, repo_id, files = record.files.len(), "trace record stored");
    Ok(IngestOutcome::Inserted)
}

fn insert_record_row(tx: &Transaction<'_>, repo_id: i64, record: &TraceRecord) -> Result<i64> {
    let metadata_json =
        serde_json::to_string(&record.metadata).context("failed to encode record metadata")?;
    tx.query_row(
        &format!(
            "INSERT INTO {TRACE_RECORDS_TABLE}
                 (repo_id, trace_id, version, timestamp, vcs_type, revision, tool_name, tool_version, metadata_json, ingested_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             RETURNING id"
        ),
        params![
            repo_id,
            record.id,
            record.version,
            record.timestamp,
            record.vcs.vcs_type,
            record.vcs.revision,
            record.tool_name(),
            record.tool.as_ref().and_then(|tool| tool.version.as_deref()),
            metadata_json,
            now_utc_rfc3339()?,
        ],
        |row| row.get(0),
    )
    .with_context(|| format!("failed to insert trace record row: {}", record.id))
}

fn contributor_type_of(contributor: Option<&Contributor>) -> ContributorType {
    contributor.map_or(ContributorType::Unknown, |c| c.contributor_type)
}

/// Row counts for one repository, or for one commit when `revision` is set.
pub fn row_counts(
    connection: &Connection,
    repo_id: i64,
    revision: Option<&str>,
) -> Result<TraceRowCounts> {
    let query = format!(
        "SELECT
             COUNT(DISTINCT r.id),
             COUNT(DISTINCT f.id),
             COUNT(DISTINCT c.id),
             COUNT(DISTINCT g.id)
         FROM {TRACE_RECORDS_TABLE} r
         LEFT JOIN {TRACE_FILES_TABLE} f ON f.record_id = r.id
         LEFT JOIN {TRACE_CONVERSATIONS_TABLE} c ON c.file_id = f.id
         LEFT JOIN {TRACE_RANGES_TABLE} g ON g.conversation_id = c.id
         WHERE r.repo_id = ?1 AND (?2 IS NULL OR r.revision = ?2)"
    );
    connection
        .query_row(&query, params![repo_id, revision], |row| {
            Ok((
                row.get::<usize, i64>(0)?,
                row.get::<usize, i64>(1)?,
                row.get::<usize, i64>(2)?,
                row.get::<usize, i64>(3)?,
            ))
        })
        .context("failed to query trace row counts")
        .and_then(|(records, files, conversations, ranges)| {
            Ok(TraceRowCounts {
                records: to_u64(records, "records")?,
                files: to_u64(files, "files")?,
                conversations: to_u64(conversations, "conversations")?,
                ranges: to_u64(ranges, "ranges")?,
            })
        })
}

/// Lines summed by `(path, contributor type, model, tool)` for one commit,
/// ordered by first stored range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTally {
    pub path: String,
    pub contributor_type: ContributorType,
    pub model_id: Option<String>,
    pub tool_name: Option<String>,
    pub lines: u64,
}

pub fn commit_line_tallies(
    connection: &Connection,
    repo_id: i64,
    revision: &str,
) -> Result<Vec<LineTally>> {
    let mut statement = connection
        .prepare_cached(&format!(
            "SELECT f.path, g.contributor_type, g.model_id, r.tool_name,
                    SUM(g.end_line - g.start_line + 1) AS lines
             FROM {TRACE_RANGES_TABLE} g
             JOIN {TRACE_CONVERSATIONS_TABLE} c ON g.conversation_id = c.id
             JOIN {TRACE_FILES_TABLE} f ON c.file_id = f.id
             JOIN {TRACE_RECORDS_TABLE} r ON f.record_id = r.id
             WHERE r.repo_id = ?1 AND r.revision = ?2
             GROUP BY f.path, g.contributor_type, g.model_id, r.tool_name
             ORDER BY MIN(g.id)"
        ))
        .context("failed to prepare line tally query")?;
    let rows = statement
        .query_map(params![repo_id, revision], |row| {
            Ok((
                row.get::<usize, String>(0)?,
                row.get::<usize, String>(1)?,
                row.get::<usize, Option<String>>(2)?,
                row.get::<usize, Option<String>>(3)?,
                row.get::<usize, i64>(4)?,
            ))
        })
        .with_context(|| format!("failed to query line tallies for {revision}"))?;

    let mut tallies = Vec::new();
    for row in rows {
        let (path, contributor_type, model_id, tool_name, lines) = row?;
        tallies.push(LineTally {
            path,
            contributor_type: ContributorType::normalize(Some(&contributor_type)),
            model_id,
            tool_name,
            lines: to_u64(lines, "lines")?,
        });
    }
    Ok(tallies)
}

/// Conversation and range counts per file path for one commit.
pub fn commit_file_row_counts(
    connection: &Connection,
    repo_id: i64,
    revision: &str,
) -> Result<Vec<(String, TraceRowCounts)>> {
    let mut statement = connection
        .prepare_cached(&format!(
            "SELECT f.path,
                    COUNT(DISTINCT r.id),
                    COUNT(DISTINCT f.id),
                    COUNT(DISTINCT c.id),
                    COUNT(DISTINCT g.id)
             FROM {TRACE_FILES_TABLE} f
             JOIN {TRACE_RECORDS_TABLE} r ON f.record_id = r.id
             LEFT JOIN {TRACE_CONVERSATIONS_TABLE} c ON c.file_id = f.id
             LEFT JOIN {TRACE_RANGES_TABLE} g ON g.conversation_id = c.id
             WHERE r.repo_id = ?1 AND r.revision = ?2
             GROUP BY f.path
             ORDER BY MIN(f.id)"
        ))
        .context("failed to prepare file row count query")?;
    let rows = statement
        .query_map(params![repo_id, revision], |row| {
            Ok((
                row.get::<usize, String>(0)?,
                [
                    row.get::<usize, i64>(1)?,
                    row.get::<usize, i64>(2)?,
                    row.get::<usize, i64>(3)?,
                    row.get::<usize, i64>(4)?,
                ],
            ))
        })
        .with_context(|| format!("failed to query file row counts for {revision}"))?;

    let mut counts = Vec::new();
    for row in rows {
        let (path, [records, files, conversations, ranges]) = row?;
        counts.push((
            path,
            TraceRowCounts {
                records: to_u64(records, "records")?,
                files: to_u64(files, "files")?,
                conversations: to_u64(conversations, "conversations")?,
                ranges: to_u64(ranges, "ranges")?,
            },
        ));
    }
    Ok(counts)
}

/// Stored trace ids for a commit, oldest first.
pub fn trace_ids_for_revision(
    connection: &Connection,
    repo_id: i64,
    revision: &str,
) -> Result<Vec<String>> {
    let mut statement = connection
        .prepare_cached(&format!(
            "SELECT trace_id FROM {TRACE_RECORDS_TABLE} WHERE repo_id = ?1 AND revision = ?2 ORDER BY id"
        ))
        .context("failed to prepare trace id query")?;
    let rows = statement
        .query_map(params![repo_id, revision], |row| row.get::<usize, String>(0))
        .with_context(|| format!("failed to query trace ids for {revision}"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read trace id rows")
}

pub fn latest_ingest_run_status(connection: &Connection, repo_id: i64) -> Result<Option<String>> {
    connection
        .query_row(
            &format!(
                "SELECT status FROM {INGEST_RUNS_TABLE} WHERE repo_id = ?1 ORDER BY started_at_utc DESC, rowid DESC LIMIT 1"
            ),
            [repo_id],
            |row| row.get::<usize, String>(0),
        )
        .optional()
        .context("failed to query latest ingest run")
}

pub(crate) fn now_utc_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format sqlite timestamp as RFC3339")
}

pub(crate) fn to_i64(value: usize, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{field} exceeds sqlite INTEGER range"))
}

fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} count is negative"))
}
