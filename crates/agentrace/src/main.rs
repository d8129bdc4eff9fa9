#![forbid(unsafe_code)]

use std::path::PathBuf;

use agentrace::cli::app::{Cli, Command, RuntimeArgs};
use agentrace::cli::commands::{self, CommandEnv};
use agentrace::config::{PipelineConfig, RuntimePaths, load_pipeline_config};
use agentrace::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use serde_json::json;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing();

    let command_name = cli.command.name();
    debug!(command = command_name, "starting");
    match execute(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(error) => report_failure(command_name, &error),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agentrace=info"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    if let Command::Schema(args) = &cli.command {
        return commands::schema::run(args);
    }

    let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
    let config = load_config(cli.command.name(), &runtime_paths, &cli.runtime)?;
    let env = CommandEnv {
        runtime_paths: &runtime_paths,
        config: &config,
    };

    match &cli.command {
        Command::Ingest(args) => commands::ingest::run(args, env),
        Command::Import(args) => commands::import::run(args, env),
        Command::Validate(args) => commands::validate::run(args, env),
        Command::Scan(args) => commands::scan::run(args, env),
        Command::Notes(args) => commands::notes::run(args, env),
        Command::Schema(args) => commands::schema::run(args),
    }
}

fn load_config(
    command_name: &str,
    runtime_paths: &RuntimePaths,
    args: &RuntimeArgs,
) -> Result<PipelineConfig> {
    load_pipeline_config(runtime_paths, args.config.as_deref()).map_err(|error| {
        let envelope = QueryEnvelope::error(command_name, "config_invalid", "failed to load pipeline config")
            .with_error_details(json!({ "cause": format!("{error:#}") }));
        QueryEnvelopeCommandFailure::new(envelope).into()
    })
}

/// Failures carrying an envelope print it as-is; anything else is wrapped in
/// a generic runtime-failure envelope.
fn report_failure(command_name: &str, error: &anyhow::Error) -> i32 {
    if let Some(failure) = error.downcast_ref::<QueryEnvelopeCommandFailure>() {
        error!(command = command_name, exit_code = failure.exit_code(), "command failed");
        println!("{}", failure.envelope().encode());
        return failure.exit_code();
    }

    error!(command = command_name, error = %format!("{error:#}"), "command failed");
    let envelope = QueryEnvelope::error(command_name, "runtime_failure", "command failed")
        .with_error_details(json!({ "cause": format!("{error:#}") }));
    println!("{}", envelope.encode());
    EXIT_RUNTIME_FAILURE
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    agentrace::config::resolve_runtime_paths(&home_dir, &cwd, args.out_dir.as_deref())
}
