use serde::Serialize;

use crate::models::trace::ContributorType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineBuckets {
    pub ai_lines: u64,
    pub human_lines: u64,
    pub mixed_lines: u64,
    pub unknown_lines: u64,
}

impl LineBuckets {
    pub fn add(&mut self, contributor_type: ContributorType, lines: u64) {
        match contributor_type {
            ContributorType::Ai => self.ai_lines += lines,
            ContributorType::Human => self.human_lines += lines,
            ContributorType::Mixed => self.mixed_lines += lines,
            ContributorType::Unknown => self.unknown_lines += lines,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.ai_lines += other.ai_lines;
        self.human_lines += other.human_lines;
        self.mixed_lines += other.mixed_lines;
        self.unknown_lines += other.unknown_lines;
    }

    #[must_use]
    pub const fn total_lines(&self) -> u64 {
        self.ai_lines + self.human_lines + self.mixed_lines + self.unknown_lines
    }

    /// Rounded share of AI lines; `0` when nothing was attributed.
    #[must_use]
    pub fn ai_percent(&self) -> u8 {
        let total = self.total_lines();
        if total == 0 {
            return 0;
        }
        let percent = (self.ai_lines as f64 / total as f64 * 100.0).round();
        percent.clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceCommitSummary {
    pub commit_sha: String,
    pub ai_lines: u64,
    pub human_lines: u64,
    pub mixed_lines: u64,
    pub unknown_lines: u64,
    pub ai_percent: u8,
    pub model_ids: Vec<String>,
    pub tool_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFileSummary {
    pub commit_sha: String,
    pub path: String,
    pub ai_lines: u64,
    pub human_lines: u64,
    pub mixed_lines: u64,
    pub unknown_lines: u64,
    pub ai_percent: u8,
    pub model_ids: Vec<String>,
    pub tool_names: Vec<String>,
    pub conversations: u64,
    pub ranges: u64,
}
