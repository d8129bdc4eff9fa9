use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{CommandEnv, emit, encode_data, failure};
use crate::cli::app::RepoArgs;
use crate::ingest::{
    IngestContext, IngestPlan, IngestStatus, ingest_report_artifact_path, run_ingest,
    write_ingest_report_artifact,
};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::vcs::GitCli;

const COMMAND: &str = "ingest";

#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    /// OTLP/JSON logs envelope exported by the coding assistant.
    #[arg(value_name = "ENVELOPE")]
    pub envelope: PathBuf,

    #[command(flatten)]
    pub repo: RepoArgs,

    /// Skip writing trace-record JSON files into the repository.
    #[arg(long, default_value_t = false)]
    pub no_export: bool,
}

pub fn run(args: &IngestArgs, env: CommandEnv<'_>) -> Result<()> {
    let repo_root = env.repo_root(args.repo.repo.as_deref())?;
    let envelope_path = env.runtime_paths.resolve(&args.envelope)?;
    let redaction = env.config.redaction_filter()?;
    let store = env.trace_store();
    let mut connection = env.open_database(COMMAND)?;

    let plan = IngestPlan {
        envelope_path,
        repo_root,
        repo_id: args.repo.repo_id,
        export_trace_files: env.config.export_trace_files && !args.no_export,
    };
    let report = run_ingest(
        &mut connection,
        &plan,
        IngestContext {
            vcs: &GitCli,
            store: &store,
            redaction: &redaction,
        },
    )
    .map_err(|error| {
        failure(COMMAND, "ingest_failed", "ingest run failed", &error)
            .with_meta_path("envelope_path", &plan.envelope_path)
            .into_error()
    })?;

    let artifact_path = ingest_report_artifact_path(&env.runtime_paths.out_dir);
    write_ingest_report_artifact(&artifact_path, &report).map_err(|error| {
        failure(
            COMMAND,
            "ingest_report_artifact_write_failed",
            "failed to write ingest report artifact",
            &error,
        )
        .with_meta_path("artifact_path", &artifact_path)
        .into_error()
    })?;

    let data = encode_data(COMMAND, &report)?;
    let mut envelope = if report.status == IngestStatus::Error {
        QueryEnvelope::error(
            COMMAND,
            "ingest_no_records",
            "no trace records could be stored",
        )
        .with_data(data)
    } else {
        QueryEnvelope::ok(COMMAND, data)
    };
    envelope = envelope
        .with_meta("status", json!(report.status.as_str()))
        .with_meta("artifact_path", json!(artifact_path.display().to_string()))
        .with_meta("repo_root", json!(plan.repo_root.display().to_string()));
    for issue in report.issues.iter().filter(|issue| !issue.is_actionable()) {
        envelope = envelope.with_warning(&issue.code, &issue.message);
    }

    if report.status == IngestStatus::Error {
        return Err(QueryEnvelopeCommandFailure::new(envelope).into());
    }
    emit(&envelope);
    Ok(())
}
