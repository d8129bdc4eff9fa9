use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use super::{CommandEnv, emit, encode_data};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::sqlite::{IngestOutcome, ingest_trace_record};
use crate::validate::check_trace_record;

const COMMAND: &str = "import";

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    #[arg(value_name = "TRACE_JSON", required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(long, value_name = "N", default_value_t = 1)]
    pub repo_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportEntry {
    pub path: String,
    pub outcome: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub already_present: usize,
    pub rejected: usize,
    pub entries: Vec<ImportEntry>,
}

pub fn run(args: &ImportArgs, env: CommandEnv<'_>) -> Result<()> {
    let redaction = env.config.redaction_filter()?;
    let mut connection = env.open_database(COMMAND)?;
    let mut summary = ImportSummary::default();

    for input in &args.inputs {
        let path = env.runtime_paths.resolve(input)?;
        let label = path.display().to_string();
        let checked = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {label}"))
            .and_then(|raw| check_trace_record(&raw));
        let mut record = match checked {
            Ok(record) => record,
            Err(error) => {
                warn!(path = %label, "rejected trace record");
                summary.rejected += 1;
                summary.entries.push(ImportEntry {
                    path: label,
                    outcome: "rejected".to_string(),
                    trace_id: None,
                    detail: Some(format!("{error:#}")),
                });
                continue;
            }
        };
        redaction.redact_metadata(&mut record.metadata);

        let outcome = match ingest_trace_record(&mut connection, args.repo_id, &record) {
            Ok(IngestOutcome::Inserted) => {
                summary.inserted += 1;
                "inserted"
            }
            Ok(IngestOutcome::AlreadyPresent) => {
                summary.already_present += 1;
                "already_present"
            }
            Err(error) => {
                summary.rejected += 1;
                summary.entries.push(ImportEntry {
                    path: label,
                    outcome: "store_failed".to_string(),
                    trace_id: Some(record.id),
                    detail: Some(format!("{error:#}")),
                });
                continue;
            }
        };
        summary.entries.push(ImportEntry {
            path: label,
            outcome: outcome.to_string(),
            trace_id: Some(record.id),
            detail: None,
        });
    }

    let data = encode_data(COMMAND, &summary)?;
    if summary.rejected > 0 {
        let envelope = QueryEnvelope::error(
            COMMAND,
            "import_rejected_inputs",
            format!("{} input(s) could not be imported", summary.rejected),
        )
        .with_data(data)
        .with_meta("repo_id", json!(args.repo_id));
        return Err(QueryEnvelopeCommandFailure::new(envelope)
            .with_exit_code(2)
            .into());
    }

    emit(&QueryEnvelope::ok(COMMAND, data).with_meta("repo_id", json!(args.repo_id)));
    Ok(())
}
