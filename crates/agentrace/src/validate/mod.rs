use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{
    Contributor, ContributorType, RelatedLink, TRACE_SCHEMA_VERSION, TraceConversation, TraceFile,
    TraceRange, TraceRecord, TraceTool, TraceVcs, VCS_TYPE_GIT,
};

/// Parses and normalizes trace-record JSON. Any structural problem yields
/// `None`; malformed files, ranges and related links are dropped instead.
#[must_use]
pub fn parse_trace_record(raw: &str) -> Option<TraceRecord> {
    check_trace_record(raw).ok()
}

/// Like [`parse_trace_record`] but says why a record was rejected.
pub fn check_trace_record(raw: &str) -> Result<TraceRecord> {
    let value = serde_json::from_str::<Value>(raw).context("invalid JSON")?;
    normalize_trace_record(&value)
}

pub fn normalize_trace_record(value: &Value) -> Result<TraceRecord> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("record is not a JSON object"))?;

    let id = required_string(object, &["id"])?;
    let version = required_string(object, &["version"])?;
    let timestamp = required_string(object, &["timestamp"])?;

    let vcs = object
        .get("vcs")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("missing vcs object"))?;
    let vcs_type = vcs.get("type").and_then(Value::as_str).unwrap_or_default();
    if vcs_type != VCS_TYPE_GIT {
        bail!("unsupported vcs.type `{vcs_type}`");
    }
    let revision =
        optional_string(vcs, &["revision"]).ok_or_else(|| anyhow!("missing vcs.revision"))?;

    let files = object
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("files must be a list"))?
        .iter()
        .filter_map(normalize_file)
        .collect();

    let tool = object
        .get("tool")
        .and_then(Value::as_object)
        .map(|tool| TraceTool {
            name: optional_string(tool, &["name"]),
            version: optional_string(tool, &["version"]),
        });

    let metadata = object
        .get("metadata")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    Ok(TraceRecord {
        id,
        version,
        timestamp,
        vcs: TraceVcs {
            vcs_type: VCS_TYPE_GIT.to_string(),
            revision,
        },
        tool,
        files,
        metadata,
    })
}

fn normalize_file(value: &Value) -> Option<TraceFile> {
    let object = value.as_object()?;
    let path = optional_string(object, &["path"])?;
    let conversations = object
        .get("conversations")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(normalize_conversation).collect())
        .unwrap_or_default();
    Some(TraceFile {
        path,
        conversations,
    })
}

fn normalize_conversation(value: &Value) -> Option<TraceConversation> {
    let object = value.as_object()?;
    Some(TraceConversation {
        url: optional_string(object, &["url"]),
        contributor: object.get("contributor").and_then(normalize_contributor),
        ranges: object
            .get("ranges")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(normalize_range).collect())
            .unwrap_or_default(),
        related: object
            .get("related")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(normalize_related).collect())
            .unwrap_or_default(),
    })
}

fn normalize_range(value: &Value) -> Option<TraceRange> {
    let object = value.as_object()?;
    let start_line = line_number(object, &["startLine", "start_line"])?;
    let end_line = line_number(object, &["endLine", "end_line"])?;
    if start_line < 1 || end_line < start_line {
        return None;
    }
    Some(TraceRange {
        start_line,
        end_line,
        content_hash: optional_string(object, &["contentHash", "content_hash"]),
        contributor: object.get("contributor").and_then(normalize_contributor),
    })
}

fn normalize_contributor(value: &Value) -> Option<Contributor> {
    let object = value.as_object()?;
    Some(Contributor {
        contributor_type: ContributorType::normalize(object.get("type").and_then(Value::as_str)),
        model_id: optional_string(object, &["modelId", "model_id"]),
    })
}

fn normalize_related(value: &Value) -> Option<RelatedLink> {
    let object = value.as_object()?;
    Some(RelatedLink {
        link_type: object.get("type")?.as_str()?.to_string(),
        url: object.get("url")?.as_str()?.to_string(),
    })
}

fn required_string(object: &Map<String, Value>, keys: &[&str]) -> Result<String> {
    optional_string(object, keys).ok_or_else(|| anyhow!("missing required field `{}`", keys[0]))
}

/// First key present with a non-blank string value.
fn optional_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find(|value| !value.trim().is_empty())
        .map(ToString::to_string)
}

fn line_number(object: &Map<String, Value>, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_u64))
        .and_then(|value| u32::try_from(value).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFileValidation {
    pub path: String,
    pub accepted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    pub files: usize,
    pub ranges: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_version: String,
    pub status: ValidationStatus,
    pub total_inputs: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub entries: Vec<TraceFileValidation>,
}

impl ValidationReport {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.rejected > 0 { 2 } else { 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationArtifactLayout {
    pub report_json: PathBuf,
}

#[must_use]
pub fn build_artifact_layout(out_dir: &Path) -> ValidationArtifactLayout {
    ValidationArtifactLayout {
        report_json: out_dir.join("validate").join("report.json"),
    }
}

pub fn write_report_artifact(path: &Path, report: &ValidationReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create validate artifact directory")?;
    }

    let encoded =
        serde_json::to_vec_pretty(report).context("failed to encode validation report json")?;
    std::fs::write(path, encoded).context("failed to write validation report artifact")
}

/// Validates already-loaded inputs, keyed by a display label.
#[must_use]
pub fn validate_trace_inputs(inputs: &[(String, Result<String, String>)]) -> ValidationReport {
    let entries = inputs
        .iter()
        .map(|(label, content)| {
            let checked = content
                .as_ref()
                .map_err(|detail| anyhow!("{detail}"))
                .and_then(|raw| check_trace_record(raw));
            match checked {
                Ok(record) => TraceFileValidation {
                    path: label.clone(),
                    accepted: true,
                    trace_id: Some(record.id.clone()),
                    revision: Some(record.vcs.revision.clone()),
                    files: record.files.len(),
                    ranges: record.range_count(),
                    detail: None,
                },
                Err(error) => TraceFileValidation {
                    path: label.clone(),
                    accepted: false,
                    trace_id: None,
                    revision: None,
                    files: 0,
                    ranges: 0,
                    detail: Some(format!("{error:#}")),
                },
            }
        })
        .collect::<Vec<_>>();

    let accepted = entries.iter().filter(|entry| entry.accepted).count();
    let rejected = entries.len() - accepted;
    ValidationReport {
        schema_version: TRACE_SCHEMA_VERSION.to_string(),
        status: if rejected == 0 {
            ValidationStatus::Pass
        } else {
            ValidationStatus::Fail
        },
        total_inputs: entries.len(),
        accepted,
        rejected,
        entries,
    }
}

/// Reads each path and validates it. Unreadable files count as rejected.
#[must_use]
pub fn validate_trace_files(paths: &[PathBuf]) -> ValidationReport {
    let inputs = paths
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .map_err(|error| format!("failed to read {}: {error}", path.display()));
            (path.display().to_string(), content)
        })
        .collect::<Vec<_>>();
    validate_trace_inputs(&inputs)
}
