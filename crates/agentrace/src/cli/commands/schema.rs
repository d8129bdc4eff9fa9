use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::emit;
use crate::models::{QueryEnvelope, TRACE_SCHEMA_VERSION, trace_record_json_schema};

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {}

pub fn run(_args: &SchemaArgs) -> Result<()> {
    emit(
        &QueryEnvelope::ok("schema", trace_record_json_schema())
            .with_meta("trace_schema_version", json!(TRACE_SCHEMA_VERSION)),
    );
    Ok(())
}
