use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{CommandEnv, emit, encode_data, failure};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::validate::{build_artifact_layout, validate_trace_files, write_report_artifact};

const COMMAND: &str = "validate";

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    #[arg(value_name = "TRACE_JSON", required = true)]
    pub inputs: Vec<PathBuf>,
}

pub fn run(args: &ValidateArgs, env: CommandEnv<'_>) -> Result<()> {
    let inputs = args
        .inputs
        .iter()
        .map(|input| env.runtime_paths.resolve(input))
        .collect::<Result<Vec<_>>>()?;
    let report = validate_trace_files(&inputs);

    let artifacts = build_artifact_layout(&env.runtime_paths.out_dir);
    write_report_artifact(&artifacts.report_json, &report).map_err(|error| {
        failure(
            COMMAND,
            "validate_report_artifact_write_failed",
            "failed to write validation report artifact",
            &error,
        )
        .with_meta_path("artifact_path", &artifacts.report_json)
        .into_error()
    })?;

    let data = encode_data(COMMAND, &report)?;
    let artifact_meta = json!(artifacts.report_json.display().to_string());
    if report.rejected > 0 {
        let envelope = QueryEnvelope::error(
            COMMAND,
            "validation_failed",
            format!("{} of {} input(s) rejected", report.rejected, report.total_inputs),
        )
        .with_data(data)
        .with_meta("artifact_path", artifact_meta);
        return Err(QueryEnvelopeCommandFailure::new(envelope)
            .with_exit_code(report.exit_code())
            .into());
    }

    emit(&QueryEnvelope::ok(COMMAND, data).with_meta("artifact_path", artifact_meta));
    Ok(())
}
