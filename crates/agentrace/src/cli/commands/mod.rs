pub mod import;
pub mod ingest;
pub mod notes;
pub mod scan;
pub mod schema;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Error, Result};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::{PipelineConfig, RuntimePaths};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::sqlite::{ensure_sqlite_schema, open_sqlite_connection};
use crate::trace_files::FsTraceFileStore;

/// Resolved paths and pipeline config shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct CommandEnv<'a> {
    pub runtime_paths: &'a RuntimePaths,
    pub config: &'a PipelineConfig,
}

impl CommandEnv<'_> {
    pub(crate) fn repo_root(&self, repo: Option<&Path>) -> Result<PathBuf> {
        match repo {
            Some(path) => self.runtime_paths.resolve(path),
            None => Ok(self.runtime_paths.cwd.clone()),
        }
    }

    pub(crate) fn open_database(&self, command: &str) -> Result<Connection> {
        let path = self.runtime_paths.database_path();
        open_sqlite_connection(&path)
            .and_then(|connection| ensure_sqlite_schema(&connection).map(|()| connection))
            .map_err(|error| {
                failure(command, "sqlite_open_failed", "failed to open attribution database", &error)
                    .with_meta_path("sqlite_path", &path)
                    .into_error()
            })
    }

    pub(crate) fn trace_store(&self) -> FsTraceFileStore {
        FsTraceFileStore::new(&self.config.trace_dir)
    }
}

pub(crate) struct FailureBuilder {
    envelope: QueryEnvelope,
}

impl FailureBuilder {
    pub(crate) fn with_meta_path(mut self, key: &str, path: &Path) -> Self {
        self.envelope = self
            .envelope
            .with_meta(key, json!(path.display().to_string()));
        self
    }

    pub(crate) fn into_error(self) -> Error {
        Error::new(QueryEnvelopeCommandFailure::new(self.envelope))
    }
}

pub(crate) fn failure(command: &str, code: &str, message: &str, cause: &Error) -> FailureBuilder {
    FailureBuilder {
        envelope: QueryEnvelope::error(command, code, message)
            .with_error_details(json!({ "cause": format!("{cause:#}") })),
    }
}

pub(crate) fn encode_data<T: Serialize>(command: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|error| {
        failure(
            command,
            "response_encode_failed",
            "failed to encode command response",
            &Error::new(error),
        )
        .into_error()
    })
}

pub(crate) fn emit(envelope: &QueryEnvelope) {
    println!("{}", envelope.encode());
}
