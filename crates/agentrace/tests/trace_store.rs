use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use agentrace::aggregate::{ScanContext, scan, summarize_commits};
use agentrace::models::{ContributorType, TraceRecord};
use agentrace::sqlite::{
    IngestOutcome, commit_line_tallies, ensure_sqlite_schema, ingest_trace_record, row_counts,
    trace_ids_for_revision,
};
use agentrace::trace_files::{TraceFileStore, export_trace_record};
use agentrace::utils::redaction::default_filter;
use agentrace::validate::parse_trace_record;
use anyhow::{Result, anyhow};
use rusqlite::Connection;
use serde_json::{Value, json};

#[derive(Default)]
struct MemoryStore {
    files: RefCell<BTreeMap<String, String>>,
}

impl TraceFileStore for MemoryStore {
    fn list(&self, _repo_root: &Path, dir: &str) -> Result<Vec<String>> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        Ok(self
            .files
            .borrow()
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn read(&self, _repo_root: &Path, path: &str) -> Result<String> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no such trace file: {path}"))
    }

    fn write(&self, _repo_root: &Path, path: &str, contents: &str) -> Result<()> {
        self.files
            .borrow_mut()
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }
}

fn open_store() -> Connection {
    let connection = Connection::open_in_memory().expect("in-memory sqlite should open");
    ensure_sqlite_schema(&connection).expect("schema should apply");
    connection
}

fn record(id: &str, revision: &str, files: Value) -> TraceRecord {
    let raw = json!({
        "id": id,
        "version": "0.1.0",
        "timestamp": "2026-02-05T07:00:03.000Z",
        "vcs": {"type": "git", "revision": revision},
        "tool": {"name": "codex"},
        "files": files
    });
    parse_trace_record(&raw.to_string()).expect("fixture record should parse")
}

fn ai_file(path: &str, model: &str, start: u32, end: u32) -> Value {
    json!({
        "path": path,
        "conversations": [{
            "contributor": {"type": "ai", "modelId": model},
            "ranges": [{"startLine": start, "endLine": end}]
        }]
    })
}

fn context(store: &MemoryStore) -> ScanContext<'_> {
    ScanContext {
        store,
        redaction: default_filter(),
    }
}

const REPO: &str = "/work/repo";

#[test]
fn storing_the_same_record_twice_inserts_nothing_the_second_time() {
    let mut connection = open_store();
    let store = MemoryStore::default();
    let trace = record("t-1", "abc123", json!([ai_file("src/App.tsx", "gpt-5", 1, 2)]));
    let shas = vec!["abc123".to_string()];

    let first = ingest_trace_record(&mut connection, 1, &trace).expect("first insert");
    let counts_after_first = row_counts(&connection, 1, None).expect("counts");
    let scan_after_first =
        scan(&mut connection, context(&store), Path::new(REPO), 1, &shas).expect("first scan");

    let second = ingest_trace_record(&mut connection, 1, &trace).expect("second insert");
    let counts_after_second = row_counts(&connection, 1, None).expect("counts");
    let scan_after_second =
        scan(&mut connection, context(&store), Path::new(REPO), 1, &shas).expect("second scan");

    assert_eq!(first, IngestOutcome::Inserted);
    assert_eq!(second, IngestOutcome::AlreadyPresent);
    assert_eq!(counts_after_first, counts_after_second);
    assert_eq!(counts_after_first.records, 1);
    assert_eq!(counts_after_first.ranges, 1);
    assert_eq!(scan_after_first.totals, scan_after_second.totals);
    assert_eq!(scan_after_second.totals.ai_lines, 2);
}

#[test]
fn same_trace_id_in_another_repo_is_stored_separately() {
    let mut connection = open_store();
    let trace = record("t-1", "abc123", json!([ai_file("a.rs", "gpt-5", 1, 1)]));

    assert_eq!(
        ingest_trace_record(&mut connection, 1, &trace).expect("repo 1"),
        IngestOutcome::Inserted
    );
    assert_eq!(
        ingest_trace_record(&mut connection, 2, &trace).expect("repo 2"),
        IngestOutcome::Inserted
    );
    assert_eq!(row_counts(&connection, 2, None).expect("counts").records, 1);
}

#[test]
fn range_contributor_falls_back_to_conversation_then_unknown() {
    let mut connection = open_store();
    let trace = record(
        "t-1",
        "abc123",
        json!([
            {
                "path": "a.rs",
                "conversations": [{
                    "contributor": {"type": "ai", "modelId": "gpt-5"},
                    "ranges": [
                        {"startLine": 1, "endLine": 3, "contributor": {"type": "human"}},
                        {"startLine": 10, "endLine": 11}
                    ]
                }]
            },
            {
                "path": "b.rs",
                "conversations": [{"ranges": [{"startLine": 1, "endLine": 4}]}]
            }
        ]),
    );
    ingest_trace_record(&mut connection, 1, &trace).expect("insert");

    let tallies = commit_line_tallies(&connection, 1, "abc123").expect("tallies");
    let summary = tallies
        .iter()
        .map(|tally| {
            (
                tally.path.as_str(),
                tally.contributor_type,
                tally.model_id.as_deref(),
                tally.lines,
            )
        })
        .collect::<Vec<_>>();

    assert_eq!(
        summary,
        [
            ("a.rs", ContributorType::Human, None, 3),
            ("a.rs", ContributorType::Ai, Some("gpt-5"), 2),
            ("b.rs", ContributorType::Unknown, None, 4),
        ]
    );
}

#[test]
fn even_ai_and_human_split_reports_fifty_percent() {
    let mut connection = open_store();
    let trace = record(
        "t-1",
        "abc123",
        json!([{
            "path": "a.rs",
            "conversations": [
                {"contributor": {"type": "ai", "modelId": "gpt-5"}, "ranges": [{"startLine": 1, "endLine": 10}]},
                {"contributor": {"type": "human"}, "ranges": [{"startLine": 11, "endLine": 20}]}
            ]
        }]),
    );
    ingest_trace_record(&mut connection, 1, &trace).expect("insert");

    let result = summarize_commits(&connection, 1, &["abc123".to_string()]).expect("summary");
    let commit = &result.by_commit["abc123"];

    assert_eq!(commit.ai_lines, 10);
    assert_eq!(commit.human_lines, 10);
    assert_eq!(commit.ai_percent, 50);
    assert_eq!(commit.model_ids, ["gpt-5".to_string()]);
    assert_eq!(commit.tool_names, ["codex".to_string()]);
    let file = &result.by_file_by_commit["abc123"]["a.rs"];
    assert_eq!(file.conversations, 2);
    assert_eq!(file.ranges, 2);
    assert_eq!(file.ai_percent, 50);
}

#[test]
fn scan_totals_span_commits_and_skip_unknown_ones() {
    let mut connection = open_store();
    let store = MemoryStore::default();
    ingest_trace_record(
        &mut connection,
        1,
        &record(
            "t-1",
            "c1",
            json!([ai_file("a.rs", "gpt-5", 1, 3), ai_file("b.rs", "o3", 1, 1)]),
        ),
    )
    .expect("c1");
    ingest_trace_record(
        &mut connection,
        1,
        &record(
            "t-2",
            "c2",
            json!([{
                "path": "c.rs",
                "conversations": [{"contributor": {"type": "mixed"}, "ranges": [{"startLine": 4, "endLine": 7}]}]
            }]),
        ),
    )
    .expect("c2");

    let shas = ["c1", "c2", "missing", "c1"].map(str::to_string);
    let result = scan(&mut connection, context(&store), Path::new(REPO), 1, &shas).expect("scan");

    assert_eq!(result.by_commit.len(), 2);
    assert!(!result.by_commit.contains_key("missing"));
    assert_eq!(result.totals.commits, 2);
    assert_eq!(result.totals.files, 3);
    assert_eq!(result.totals.conversations, 3);
    assert_eq!(result.totals.ranges, 3);
    assert_eq!(result.totals.ai_lines, 4);
    assert_eq!(result.totals.mixed_lines, 4);
    assert_eq!(result.totals.ai_percent, 50);
    assert_eq!(
        result.by_commit["c1"].model_ids,
        ["gpt-5".to_string(), "o3".to_string()]
    );
    assert!(result.totals.ai_percent <= 100);
}

#[test]
fn scan_reingests_exported_trace_files_once() {
    let mut connection = open_store();
    let store = MemoryStore::default();
    let trace = record("codex-otel-c9", "c9", json!([ai_file("a.rs", "gpt-5", 1, 5)]));
    let exported = export_trace_record(&store, Path::new(REPO), &trace).expect("export");
    store
        .write(Path::new(REPO), "broken.json", "{not json")
        .expect("broken fixture");
    store
        .write(Path::new(REPO), "notes.txt", "ignored")
        .expect("non-json fixture");
    let shas = vec!["c9".to_string()];

    let first = scan(&mut connection, context(&store), Path::new(REPO), 1, &shas).expect("first scan");
    let second = scan(&mut connection, context(&store), Path::new(REPO), 1, &shas).expect("second scan");

    assert_eq!(exported, "generated/codex-otel-c9.json");
    assert_eq!(first.reingest.files_seen, 2);
    assert_eq!(first.reingest.records_inserted, 1);
    assert_eq!(first.reingest.failures.len(), 1);
    assert_eq!(second.reingest.records_inserted, 0);
    assert_eq!(second.reingest.already_present, 1);
    assert_eq!(first.by_commit["c9"].ai_lines, 5);
    assert_eq!(first.totals, second.totals);
    assert_eq!(
        trace_ids_for_revision(&connection, 1, "c9").expect("ids"),
        ["codex-otel-c9".to_string()]
    );
}

#[test]
fn reingested_trace_files_have_their_metadata_redacted() {
    let mut connection = open_store();
    let store = MemoryStore::default();
    let key = ["ghp_", "abcdefghijklmnopqrstuvwxyz"].concat();
    let mut trace = record("t-secret", "c7", json!([ai_file("a.rs", "gpt-5", 1, 1)]));
    trace
        .metadata
        .insert("note".to_string(), json!(format!("pushed with {key}")));
    export_trace_record(&store, Path::new(REPO), &trace).expect("export");

    let result =
        scan(&mut connection, context(&store), Path::new(REPO), 1, &["c7".to_string()]).expect("scan");

    assert_eq!(result.reingest.records_inserted, 1);
    let metadata: String = connection
        .query_row(
            "SELECT metadata_json FROM trace_records WHERE trace_id = 't-secret'",
            [],
            |row| row.get(0),
        )
        .expect("record should be stored");
    assert!(!metadata.contains(&key), "secret leaked: {metadata}");
    assert!(metadata.contains("[REDACTED:GITHUB_TOKEN]"));
}
