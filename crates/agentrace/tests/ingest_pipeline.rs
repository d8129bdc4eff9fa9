use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use agentrace::ingest::{
    INGEST_REPORT_SCHEMA_VERSION, ISSUE_NO_EVENTS, ISSUE_SOURCE_NOT_FOUND, ISSUE_SOURCE_UNREADABLE,
    IngestContext, IngestPlan, IngestRunReport, IngestStatus, ingest_report_artifact_path,
    run_ingest, write_ingest_report_artifact,
};
use agentrace::sqlite::{INGEST_RUNS_TABLE, ensure_sqlite_schema, row_counts};
use agentrace::trace_files::{FsTraceFileStore, TraceFileStore};
use agentrace::utils::redaction::default_filter;
use agentrace::validate::parse_trace_record;
use agentrace::vcs::{AddedRange, CommitDetails, FileChange, VersionControl};
use anyhow::{Result, anyhow, bail};
use rusqlite::Connection;
use serde_json::{Value, json};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

/// Every known commit changed `src/lib.rs`, adding lines 1..=3.
struct FixedVcs {
    known: Vec<&'static str>,
    head: Option<&'static str>,
}

impl VersionControl for FixedVcs {
    fn commit_details(&self, _repo_root: &Path, sha: &str) -> Result<CommitDetails> {
        if !self.known.contains(&sha) {
            bail!("unknown revision {sha}");
        }
        Ok(CommitDetails {
            sha: sha.to_string(),
            file_changes: vec![FileChange {
                path: "src/lib.rs".to_string(),
                status: "M".to_string(),
            }],
        })
    }

    fn head_sha(&self, _repo_root: &Path) -> Result<String> {
        self.head
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no HEAD"))
    }

    fn commit_added_ranges(&self, _repo_root: &Path, _sha: &str, _path: &str) -> Result<Vec<AddedRange>> {
        Ok(vec![AddedRange { start: 1, end: 3 }])
    }
}

struct Fixture {
    root: PathBuf,
    connection: Connection,
    store: FsTraceFileStore,
}

impl Fixture {
    fn new(prefix: &str) -> Self {
        let root = unique_temp_dir(prefix);
        std::fs::create_dir_all(root.join("repo")).expect("repo dir should be creatable");
        let connection = Connection::open_in_memory().expect("in-memory sqlite should open");
        ensure_sqlite_schema(&connection).expect("schema should apply");
        Self {
            root,
            connection,
            store: FsTraceFileStore::default(),
        }
    }

    fn repo(&self) -> PathBuf {
        self.root.join("repo")
    }

    fn write_envelope(&self, name: &str, commits: &[&str]) -> PathBuf {
        let records = commits
            .iter()
            .map(|sha| {
                json!({
                    "timeUnixNano": "1770274803000000000",
                    "attributes": [
                        {"key": "commit_sha", "value": {"stringValue": sha}},
                        {"key": "model", "value": {"stringValue": "gpt-5-codex"}},
                        {"key": "prompt", "value": {"stringValue": "use key sk-abcdefghijklmnopqrstuvwx"}}
                    ]
                })
            })
            .collect::<Vec<_>>();
        let path = self.root.join(name);
        let envelope = json!({"resourceLogs": [{"scopeLogs": [{"logRecords": records}]}]});
        std::fs::write(&path, envelope.to_string()).expect("envelope should be writable");
        path
    }

    fn ingest(&mut self, envelope_path: PathBuf, vcs: &FixedVcs) -> IngestRunReport {
        let plan = IngestPlan {
            envelope_path,
            repo_root: self.repo(),
            repo_id: 1,
            export_trace_files: true,
        };
        run_ingest(
            &mut self.connection,
            &plan,
            IngestContext {
                vcs,
                store: &self.store,
                redaction: default_filter(),
            },
        )
        .expect("ingest run should complete")
    }

    fn ledger(&self) -> Vec<BTreeMap<&'static str, Value>> {
        let mut statement = self
            .connection
            .prepare(&format!(
                "SELECT status, events_read, records_written, records_skipped, actionable_errors, finished_at_utc
                 FROM {INGEST_RUNS_TABLE} ORDER BY rowid"
            ))
            .expect("ledger query should prepare");
        statement
            .query_map([], |row| {
                Ok(BTreeMap::from([
                    ("status", json!(row.get::<usize, String>(0)?)),
                    ("events_read", json!(row.get::<usize, i64>(1)?)),
                    ("records_written", json!(row.get::<usize, i64>(2)?)),
                    ("records_skipped", json!(row.get::<usize, i64>(3)?)),
                    ("actionable_errors", json!(row.get::<usize, i64>(4)?)),
                    ("finished", json!(row.get::<usize, Option<String>>(5)?.is_some())),
                ]))
            })
            .expect("ledger query should run")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("ledger rows should decode")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

#[test]
fn missing_source_is_inactive_and_still_recorded() {
    let mut fixture = Fixture::new("agentrace-ingest-missing");
    let vcs = FixedVcs {
        known: vec![],
        head: None,
    };
    let missing = fixture.root.join("absent.json");

    let report = fixture.ingest(missing, &vcs);

    assert_eq!(report.status, IngestStatus::Inactive);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].code, ISSUE_SOURCE_NOT_FOUND);
    assert_eq!(report.actionable_errors, 0);
    let ledger = fixture.ledger();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0]["status"], "inactive");
    assert_eq!(ledger[0]["finished"], true);
}

#[test]
fn unreadable_source_is_an_error() {
    let mut fixture = Fixture::new("agentrace-ingest-unreadable");
    let vcs = FixedVcs {
        known: vec![],
        head: None,
    };
    let directory = fixture.repo();

    let report = fixture.ingest(directory, &vcs);

    assert_eq!(report.status, IngestStatus::Error);
    assert_eq!(report.issues[0].code, ISSUE_SOURCE_UNREADABLE);
    assert_eq!(report.actionable_errors, 1);
    assert_eq!(fixture.ledger()[0]["status"], "error");
}

#[test]
fn envelope_without_records_is_inactive() {
    let mut fixture = Fixture::new("agentrace-ingest-empty");
    let vcs = FixedVcs {
        known: vec!["abc123"],
        head: None,
    };
    let envelope = fixture.write_envelope("empty.json", &[]);

    let report = fixture.ingest(envelope, &vcs);

    assert_eq!(report.status, IngestStatus::Inactive);
    assert_eq!(report.events_read, 0);
    assert_eq!(report.issues[0].code, ISSUE_NO_EVENTS);
}

#[test]
fn clean_run_is_active_stores_exports_and_redacts() {
    let mut fixture = Fixture::new("agentrace-ingest-active");
    let vcs = FixedVcs {
        known: vec!["abc123"],
        head: None,
    };
    let envelope = fixture.write_envelope("envelope.json", &["abc123"]);

    let report = fixture.ingest(envelope, &vcs);

    assert_eq!(report.status, IngestStatus::Active);
    assert_eq!(report.events_read, 1);
    assert_eq!(report.commits_grouped, 1);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.records_skipped, 0);
    assert_eq!(report.actionable_errors, 0);
    assert_eq!(report.redactions, 1);
    assert_eq!(report.trace_ids, ["codex-otel-abc123-2026-02-05T07:00:03.000Z".to_string()]);
    assert_eq!(
        report.exported_paths,
        ["generated/codex-otel-abc123-2026-02-05T07_00_03.000Z.json".to_string()]
    );

    let counts = row_counts(&fixture.connection, 1, Some("abc123")).expect("counts");
    assert_eq!(counts.records, 1);
    assert_eq!(counts.ranges, 1);

    let exported = fixture
        .store
        .read(&fixture.repo(), &report.exported_paths[0])
        .expect("exported trace file should exist");
    let record = parse_trace_record(&exported).expect("exported file is a valid trace record");
    assert_eq!(record.vcs.revision, "abc123");
    let narrative = &record.metadata["agentrace.narrative"];
    assert_eq!(narrative["redactions"][0]["type"], "OPENAI_KEY");
    assert_eq!(narrative["redactions"][0]["count"], 1);

    let ledger = fixture.ledger();
    assert_eq!(ledger[0]["status"], "active");
    assert_eq!(ledger[0]["records_written"], 1);
}

#[test]
fn rerunning_the_same_envelope_skips_stored_records() {
    let mut fixture = Fixture::new("agentrace-ingest-rerun");
    let vcs = FixedVcs {
        known: vec!["abc123"],
        head: None,
    };
    let envelope = fixture.write_envelope("envelope.json", &["abc123"]);

    let first = fixture.ingest(envelope.clone(), &vcs);
    let second = fixture.ingest(envelope, &vcs);

    assert_eq!(first.records_written, 1);
    assert_eq!(second.status, IngestStatus::Active);
    assert_eq!(second.records_written, 0);
    assert_eq!(second.records_skipped, 1);
    assert_eq!(
        row_counts(&fixture.connection, 1, None).expect("counts").records,
        1
    );
    let ledger = fixture.ledger();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[1]["records_skipped"], 1);
}

#[test]
fn one_failed_commit_makes_the_run_partial() {
    let mut fixture = Fixture::new("agentrace-ingest-partial");
    let vcs = FixedVcs {
        known: vec!["good"],
        head: None,
    };
    let envelope = fixture.write_envelope("envelope.json", &["good", "gone"]);

    let report = fixture.ingest(envelope, &vcs);

    assert_eq!(report.status, IngestStatus::Partial);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.actionable_errors, 1);
    assert_eq!(report.issues[0].commit_sha.as_deref(), Some("gone"));
    assert_eq!(fixture.ledger()[0]["actionable_errors"], 1);
}

#[test]
fn events_without_any_storable_record_make_the_run_an_error() {
    let mut fixture = Fixture::new("agentrace-ingest-error");
    let vcs = FixedVcs {
        known: vec![],
        head: None,
    };
    let envelope = fixture.write_envelope("envelope.json", &["gone"]);

    let report = fixture.ingest(envelope, &vcs);

    assert_eq!(report.status, IngestStatus::Error);
    assert_eq!(report.events_read, 1);
    assert_eq!(report.records_written, 0);
    assert_eq!(fixture.ledger()[0]["status"], "error");
}

#[test]
fn report_artifact_carries_schema_version_and_counts() {
    let mut fixture = Fixture::new("agentrace-ingest-artifact");
    let vcs = FixedVcs {
        known: vec!["abc123"],
        head: None,
    };
    let envelope = fixture.write_envelope("envelope.json", &["abc123"]);
    let report = fixture.ingest(envelope, &vcs);

    let artifact_path = ingest_report_artifact_path(&fixture.root.join("out"));
    write_ingest_report_artifact(&artifact_path, &report).expect("artifact should write");

    assert!(artifact_path.ends_with("ingest/report.json"));
    let artifact: Value = serde_json::from_str(
        &std::fs::read_to_string(&artifact_path).expect("artifact should be readable"),
    )
    .expect("artifact should be json");
    assert_eq!(artifact["schema_version"], INGEST_REPORT_SCHEMA_VERSION);
    assert_eq!(artifact["status"], "active");
    assert_eq!(artifact["records_written"], 1);
    assert_eq!(artifact["repo_id"], 1);
}

#[test]
fn url_token_in_a_compact_envelope_keeps_the_run_intact() {
    let mut fixture = Fixture::new("agentrace-ingest-url-token");
    let vcs = FixedVcs {
        known: vec!["abc123"],
        head: None,
    };
    let envelope = json!({"resourceLogs": [{"scopeLogs": [{"logRecords": [{
        "timeUnixNano": "1770274803000000000",
        "attributes": [
            {"key": "commit_sha", "value": {"stringValue": "abc123"}},
            {"key": "prompt", "value": {"stringValue": "fetch https://api.example.com/x?token=s3cret"}}
        ]
    }]}]}]});
    let path = fixture.root.join("compact.json");
    std::fs::write(&path, envelope.to_string()).expect("envelope should be writable");

    let report = fixture.ingest(path, &vcs);

    assert_eq!(report.status, IngestStatus::Active);
    assert_eq!(report.events_read, 1);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.redactions, 1);
    let exported = fixture
        .store
        .read(&fixture.repo(), &report.exported_paths[0])
        .expect("exported trace file should exist");
    assert!(!exported.contains("s3cret"));
    assert_eq!(
        parse_trace_record(&exported).expect("valid trace record").metadata["agentrace.narrative"]
            ["redactions"][0]["type"],
        "URL_QUERY_TOKEN"
    );
}
