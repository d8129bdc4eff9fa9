use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TRACE_SCHEMA_VERSION: &str = "0.1.0";
pub const VCS_TYPE_GIT: &str = "git";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContributorType {
    Human,
    Ai,
    Mixed,
    Unknown,
}

impl ContributorType {
    /// Folds any input onto the four known kinds; anything else is `Unknown`.
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("human") => Self::Human,
            Some("ai") => Self::Ai,
            Some("mixed") => Self::Mixed,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
            Self::Mixed => "mixed",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    #[serde(rename = "type")]
    pub contributor_type: ContributorType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl Contributor {
    #[must_use]
    pub fn for_model(model_id: Option<&str>) -> Self {
        match model_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Self {
                contributor_type: ContributorType::Ai,
                model_id: Some(id.to_string()),
            },
            None => Self {
                contributor_type: ContributorType::Unknown,
                model_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TraceRange {
    pub start_line: u32,
    pub end_line: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contributor: Option<Contributor>,
}

impl TraceRange {
    #[must_use]
    pub const fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RelatedLink {
    #[serde(rename = "type")]
    pub link_type: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TraceConversation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contributor: Option<Contributor>,

    pub ranges: Vec<TraceRange>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RelatedLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceFile {
    pub path: String,
    pub conversations: Vec<TraceConversation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceVcs {
    #[serde(rename = "type")]
    pub vcs_type: String,
    pub revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceTool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TraceRecord {
    pub id: String,
    pub version: String,
    pub timestamp: String,
    pub vcs: TraceVcs,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<TraceTool>,

    pub files: Vec<TraceFile>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl TraceRecord {
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.vcs.revision
    }

    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.tool.as_ref().and_then(|tool| tool.name.as_deref())
    }

    #[must_use]
    pub fn range_count(&self) -> usize {
        self.files
            .iter()
            .flat_map(|file| &file.conversations)
            .map(|conversation| conversation.ranges.len())
            .sum()
    }
}

#[must_use]
pub fn trace_record_json_schema() -> Value {
    let schema = schemars::schema_for!(TraceRecord);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}
