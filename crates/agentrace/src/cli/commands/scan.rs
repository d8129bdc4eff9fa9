use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{CommandEnv, emit, encode_data, failure};
use crate::aggregate::{ScanContext, scan};
use crate::cli::app::RepoArgs;
use crate::models::QueryEnvelope;
use crate::sqlite::latest_ingest_run_status;

const COMMAND: &str = "scan";

#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    #[arg(value_name = "SHA", required = true)]
    pub commits: Vec<String>,
}

pub fn run(args: &ScanArgs, env: CommandEnv<'_>) -> Result<()> {
    let repo_root = env.repo_root(args.repo.repo.as_deref())?;
    let store = env.trace_store();
    let redaction = env.config.redaction_filter()?;
    let mut connection = env.open_database(COMMAND)?;

    let result = scan(
        &mut connection,
        ScanContext {
            store: &store,
            redaction: &redaction,
        },
        &repo_root,
        args.repo.repo_id,
        &args.commits,
    )
    .map_err(|error| failure(COMMAND, "scan_failed", "failed to scan commits", &error).into_error())?;
    let last_ingest_status = latest_ingest_run_status(&connection, args.repo.repo_id)?;

    let mut envelope = QueryEnvelope::ok(COMMAND, encode_data(COMMAND, &result)?)
        .with_meta("repo_id", json!(args.repo.repo_id))
        .with_meta("requested_commits", json!(args.commits.len()))
        .with_meta("last_ingest_status", json!(last_ingest_status));
    for detail in &result.reingest.failures {
        envelope = envelope.with_warning("trace_file_reingest_failed", detail);
    }
    emit(&envelope);
    Ok(())
}
