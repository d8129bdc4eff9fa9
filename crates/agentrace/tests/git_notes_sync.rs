use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use agentrace::aggregate::ScanContext;
use agentrace::ingest::{IngestContext, IngestPlan, IngestStatus, run_ingest};
use agentrace::notes::{GitNotes, sync_notes};
use agentrace::sqlite::ensure_sqlite_schema;
use agentrace::trace_files::FsTraceFileStore;
use agentrace::utils::redaction::default_filter;
use agentrace::vcs::{AddedRange, GitCli, VersionControl, git_available, run_git};
use rusqlite::Connection;
use serde_json::json;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

/// Two commits: the first creates `src/lib.rs` with three lines, the second
/// appends two more. Returns `(first_sha, second_sha)`.
fn init_repo(repo: &Path) -> (String, String) {
    std::fs::create_dir_all(repo.join("src")).expect("repo dir should be creatable");
    run_git(repo, &["init", "--quiet"]).expect("git init");
    run_git(repo, &["config", "user.name", "Agentrace Tests"]).expect("git config name");
    run_git(repo, &["config", "user.email", "tests@agentrace.invalid"]).expect("git config email");
    run_git(repo, &["config", "commit.gpgsign", "false"]).expect("git config gpgsign");

    std::fs::write(repo.join("src/lib.rs"), "a\nb\nc\n").expect("first write");
    run_git(repo, &["add", "."]).expect("git add");
    run_git(repo, &["commit", "--quiet", "-m", "first"]).expect("first commit");
    let first = GitCli.head_sha(repo).expect("first sha");

    std::fs::write(repo.join("src/lib.rs"), "a\nb\nc\nd\ne\n").expect("second write");
    run_git(repo, &["commit", "--quiet", "-am", "second"]).expect("second commit");
    let second = GitCli.head_sha(repo).expect("second sha");
    (first, second)
}

#[test]
fn git_cli_reports_changed_files_and_added_ranges() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = unique_temp_dir("agentrace-git-ranges");
    let repo = root.join("repo");
    let (first, second) = init_repo(&repo);

    let root_commit = GitCli.commit_details(&repo, &first).expect("root commit details");
    assert_eq!(root_commit.changed_paths(), ["src/lib.rs"]);
    assert_eq!(
        GitCli
            .commit_added_ranges(&repo, &first, "src/lib.rs")
            .expect("root ranges"),
        [AddedRange { start: 1, end: 3 }]
    );
    assert_eq!(
        GitCli
            .commit_added_ranges(&repo, &second, "src/lib.rs")
            .expect("second ranges"),
        [AddedRange { start: 4, end: 5 }]
    );
    assert!(GitCli.commit_details(&repo, "0000000").is_err());

    std::fs::remove_dir_all(root).expect("temp dir cleanup");
}

#[test]
fn ingested_commit_is_mirrored_into_git_notes() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let root = unique_temp_dir("agentrace-git-notes");
    let repo = root.join("repo");
    let (first, second) = init_repo(&repo);

    let envelope_path = root.join("envelope.json");
    let envelope = json!({
        "resourceLogs": [{
            "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "codex"}}]},
            "scopeLogs": [{"logRecords": [
                {
                    "timeUnixNano": "1770274803000000000",
                    "attributes": [
                        {"key": "model", "value": {"stringValue": "gpt-5-codex"}},
                        {"key": "file_paths", "value": {"stringValue": "src/lib.rs"}}
                    ]
                }
            ]}]
        }]
    });
    std::fs::write(&envelope_path, envelope.to_string()).expect("envelope should be writable");

    let mut connection = Connection::open_in_memory().expect("in-memory sqlite should open");
    ensure_sqlite_schema(&connection).expect("schema should apply");
    let store = FsTraceFileStore::default();
    let report = run_ingest(
        &mut connection,
        &IngestPlan {
            envelope_path,
            repo_root: repo.clone(),
            repo_id: 1,
            export_trace_files: true,
        },
        IngestContext {
            vcs: &GitCli,
            store: &store,
            redaction: default_filter(),
        },
    )
    .expect("ingest should complete");

    assert_eq!(report.status, IngestStatus::Active);
    assert_eq!(report.informational_errors, 1, "commitless event pinned to HEAD");
    assert!(store.base_dir(&repo).join(&report.exported_paths[0]).is_file());

    let notes = GitNotes::default();
    let shas = vec![first.clone(), second.clone()];
    let context = ScanContext {
        store: &store,
        redaction: default_filter(),
    };
    let synced = sync_notes(&mut connection, context, &notes, &repo, 1, &shas, Some("session-9"))
        .expect("notes sync should succeed");
    assert_eq!(synced.written, [second.clone()]);
    assert_eq!(synced.skipped, [first.clone()]);

    let note = notes.read(&repo, &second).expect("note should exist");
    assert_eq!(note.ai_percentage, Some(100));
    assert_eq!(note.model.as_deref(), Some("gpt-5-codex"));
    assert_eq!(note.tool.as_deref(), Some("codex"));
    assert_eq!(note.session_id.as_deref(), Some("session-9"));
    assert_eq!(note.trace_id.as_deref(), Some(report.trace_ids[0].as_str()));
    assert!(notes.read(&repo, &first).is_none());

    let listed = notes.list(&repo).expect("notes list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].commit_sha, second);

    notes.remove(&repo, &second).expect("remove note");
    notes
        .remove(&repo, &second)
        .expect("removing a missing note is not an error");
    assert!(notes.read(&repo, &second).is_none());

    std::fs::remove_dir_all(root).expect("temp dir cleanup");
}
