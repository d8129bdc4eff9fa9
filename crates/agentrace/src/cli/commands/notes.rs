use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use super::{CommandEnv, emit, encode_data, failure};
use crate::cli::app::RepoArgs;
use crate::models::QueryEnvelope;
use crate::aggregate::ScanContext;
use crate::notes::{GitNotes, sync_notes};

#[derive(Debug, Clone, Args)]
pub struct NotesArgs {
    #[command(subcommand)]
    pub command: NotesCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum NotesCommand {
    /// Print the note attached to a commit.
    Show(NoteTargetArgs),
    /// List every commit carrying a note.
    List(NoteRepoArgs),
    /// Delete the note attached to a commit.
    Remove(NoteTargetArgs),
    /// Recompute summaries and write one note per attributed commit.
    Sync(NotesSyncArgs),
}

#[derive(Debug, Clone, Args)]
pub struct NoteRepoArgs {
    #[arg(long, value_name = "PATH")]
    pub repo: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct NoteTargetArgs {
    #[arg(long, value_name = "PATH")]
    pub repo: Option<PathBuf>,

    #[arg(value_name = "SHA")]
    pub commit: String,
}

#[derive(Debug, Clone, Args)]
pub struct NotesSyncArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,

    #[arg(value_name = "SHA", required = true)]
    pub commits: Vec<String>,
}

pub fn run(args: &NotesArgs, env: CommandEnv<'_>) -> Result<()> {
    let notes = GitNotes::new(&env.config.notes_namespace);
    match &args.command {
        NotesCommand::Show(target) => {
            const COMMAND: &str = "notes.show";
            let repo_root = env.repo_root(target.repo.as_deref())?;
            let note = notes.read(&repo_root, &target.commit);
            emit(
                &QueryEnvelope::ok(COMMAND, encode_data(COMMAND, &note)?)
                    .with_meta("commit", json!(target.commit))
                    .with_meta("namespace", json!(notes.namespace())),
            );
        }
        NotesCommand::List(repo) => {
            const COMMAND: &str = "notes.list";
            let repo_root = env.repo_root(repo.repo.as_deref())?;
            let entries = notes.list(&repo_root).map_err(|error| {
                failure(COMMAND, "notes_list_failed", "failed to list notes", &error).into_error()
            })?;
            emit(
                &QueryEnvelope::ok(COMMAND, encode_data(COMMAND, &entries)?)
                    .with_meta("namespace", json!(notes.namespace())),
            );
        }
        NotesCommand::Remove(target) => {
            const COMMAND: &str = "notes.remove";
            let repo_root = env.repo_root(target.repo.as_deref())?;
            notes.remove(&repo_root, &target.commit).map_err(|error| {
                failure(COMMAND, "notes_remove_failed", "failed to remove note", &error)
                    .into_error()
            })?;
            emit(
                &QueryEnvelope::ok(COMMAND, json!({ "removed": target.commit }))
                    .with_meta("namespace", json!(notes.namespace())),
            );
        }
        NotesCommand::Sync(sync) => {
            const COMMAND: &str = "notes.sync";
            let repo_root = env.repo_root(sync.repo.repo.as_deref())?;
            let store = env.trace_store();
            let redaction = env.config.redaction_filter()?;
            let mut connection = env.open_database(COMMAND)?;
            let report = sync_notes(
                &mut connection,
                ScanContext {
                    store: &store,
                    redaction: &redaction,
                },
                &notes,
                &repo_root,
                sync.repo.repo_id,
                &sync.commits,
                sync.session_id.as_deref(),
            )
            .map_err(|error| {
                failure(COMMAND, "notes_sync_failed", "failed to sync notes", &error).into_error()
            })?;
            emit(
                &QueryEnvelope::ok(COMMAND, encode_data(COMMAND, &report)?)
                    .with_meta("repo_id", json!(sync.repo.repo_id)),
            );
        }
    }
    Ok(())
}
