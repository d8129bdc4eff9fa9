use std::path::Path;

use tracing::{debug, warn};

use crate::models::CodexOtelEvent;
use crate::vcs::VersionControl;

/// Attribute spellings that carry a commit SHA, scanned in order.
pub const COMMIT_SHA_KEYS: &[&str] = &[
    "commit_sha",
    "commitSha",
    "git.commit_sha",
    "git.commit.sha",
    "vcs.revision",
    "vcs.ref.head.revision",
    "codex.commit_sha",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEventGroup {
    pub commit_sha: String,
    pub events: Vec<CodexOtelEvent>,
    /// Events in this group that carried no commit key and were pinned to HEAD.
    pub head_fallback_events: usize,
}

impl CommitEventGroup {
    #[must_use]
    pub fn used_head_fallback(&self) -> bool {
        self.head_fallback_events > 0
    }

    #[must_use]
    pub fn first_event(&self) -> Option<&CodexOtelEvent> {
        self.events.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitGrouping {
    /// Groups in order of first appearance.
    pub groups: Vec<CommitEventGroup>,
    pub missing_commit_events: usize,
    pub dropped_events: usize,
    pub head_sha: Option<String>,
}

impl CommitGrouping {
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.groups.iter().map(|group| group.events.len()).sum()
    }
}

#[must_use]
pub fn commit_sha_for(event: &CodexOtelEvent) -> Option<&str> {
    event.first_value(COMMIT_SHA_KEYS)
}

/// Buckets events by commit. Events with no commit key are pinned to the
/// repository HEAD, resolved at most once; when HEAD cannot be resolved they
/// are dropped and only counted.
pub fn group_events_by_commit(
    events: Vec<CodexOtelEvent>,
    repo_root: &Path,
    vcs: &dyn VersionControl,
) -> CommitGrouping {
    let mut grouping = CommitGrouping::default();
    let mut head: Option<Option<String>> = None;

    for event in events {
        let (commit_sha, from_head) = if let Some(sha) = commit_sha_for(&event) {
            (sha.to_string(), false)
        } else {
            grouping.missing_commit_events += 1;
            let resolved = head.get_or_insert_with(|| match vcs.head_sha(repo_root) {
                Ok(sha) => {
                    debug!(head = %sha, "resolved HEAD for events without a commit sha");
                    Some(sha)
                }
                Err(error) => {
                    warn!(error = %error, "HEAD unavailable; dropping events without a commit sha");
                    None
                }
            });
            let Some(sha) = resolved.clone() else {
                grouping.dropped_events += 1;
                continue;
            };
            (sha, true)
        };

        let index = match grouping
            .groups
            .iter()
            .position(|group| group.commit_sha == commit_sha)
        {
            Some(index) => index,
            None => {
                grouping.groups.push(CommitEventGroup {
                    commit_sha,
                    events: Vec::new(),
                    head_fallback_events: 0,
                });
                grouping.groups.len() - 1
            }
        };
        let group = &mut grouping.groups[index];
        group.events.push(event);
        if from_head {
            group.head_fallback_events += 1;
        }
    }

    grouping.head_sha = head.flatten();
    grouping
}
