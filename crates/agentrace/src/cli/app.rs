use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    import::ImportArgs, ingest::IngestArgs, notes::NotesArgs, scan::ScanArgs,
    schema::SchemaArgs, validate::ValidateArgs,
};

#[derive(Debug, Parser)]
#[command(
    name = "agentrace",
    version,
    about = "Line-level AI attribution from coding-assistant telemetry"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    /// Pipeline config JSON; defaults to `<out_dir>/config.json` when present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Which repository a command works against.
#[derive(Debug, Clone, Args)]
pub struct RepoArgs {
    /// Repository root; defaults to the working directory.
    #[arg(long, value_name = "PATH")]
    pub repo: Option<PathBuf>,

    #[arg(long, value_name = "N", default_value_t = 1)]
    pub repo_id: i64,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert an OTLP/JSON telemetry envelope into stored trace records.
    Ingest(IngestArgs),
    /// Store trace-record JSON files produced elsewhere.
    Import(ImportArgs),
    /// Check trace-record JSON files without storing them.
    Validate(ValidateArgs),
    /// Summarize attributed lines for commits.
    Scan(ScanArgs),
    /// Print the JSON Schema of a trace record.
    Schema(SchemaArgs),
    /// Read and write per-commit attribution notes.
    Notes(NotesArgs),
}

impl Command {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ingest(_) => "ingest",
            Self::Import(_) => "import",
            Self::Validate(_) => "validate",
            Self::Scan(_) => "scan",
            Self::Schema(_) => "schema",
            Self::Notes(_) => "notes",
        }
    }
}
