use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// A documented fallback was applied; nothing for the user to fix.
    Informational,
    /// Attribution data is missing or wrong in a way the user may act on.
    Actionable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestIssue {
    pub severity: IssueSeverity,
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    pub message: String,
}

impl IngestIssue {
    #[must_use]
    pub fn informational(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Informational,
            code: code.to_string(),
            commit_sha: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn actionable(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Actionable,
            code: code.to_string(),
            commit_sha: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn for_commit(mut self, commit_sha: &str) -> Self {
        self.commit_sha = Some(commit_sha.to_string());
        self
    }

    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.severity == IssueSeverity::Actionable
    }
}
