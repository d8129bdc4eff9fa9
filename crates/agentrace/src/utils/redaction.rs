use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REDACTION_TOKEN_PREFIX: &str = "[REDACTED:";
pub const REDACTION_TOKEN_SUFFIX: &str = "]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedactionPattern {
    pub kind: String,
    pub pattern: String,
}

impl RedactionPattern {
    #[must_use]
    pub fn new(kind: &str, pattern: &str) -> Self {
        Self {
            kind: kind.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionHit {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedactionOutcome {
    pub redacted: String,
    pub hits: Vec<RedactionHit>,
}

impl RedactionOutcome {
    #[must_use]
    pub fn total(&self) -> usize {
        self.hits.iter().map(|hit| hit.count).sum()
    }
}

struct CompiledPattern {
    kind: String,
    regex: Regex,
}

/// Ordered set of secret matchers. Earlier patterns win on overlapping text
/// because later ones only see the already-substituted placeholder.
pub struct RedactionFilter {
    patterns: Vec<CompiledPattern>,
}

impl std::fmt::Debug for RedactionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedactionFilter")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl RedactionFilter {
    pub fn from_patterns(patterns: &[RedactionPattern]) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|pattern| {
                Regex::new(&pattern.pattern)
                    .with_context(|| {
                        format!(
                            "invalid redaction pattern for kind `{}`: {}",
                            pattern.kind, pattern.pattern
                        )
                    })
                    .map(|regex| CompiledPattern {
                        kind: pattern.kind.clone(),
                        regex,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns: compiled })
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.patterns
            .iter()
            .map(|pattern| pattern.kind.as_str())
            .collect()
    }

    #[must_use]
    pub fn redact(&self, text: &str) -> RedactionOutcome {
        let mut redacted = text.to_string();
        let mut hits: Vec<RedactionHit> = Vec::new();

        for pattern in &self.patterns {
            let count = pattern.regex.find_iter(&redacted).count();
            if count == 0 {
                continue;
            }
            let placeholder = placeholder_for(&pattern.kind);
            redacted = pattern
                .regex
                .replace_all(&redacted, placeholder.as_str())
                .into_owned();
            merge_hit(&mut hits, &pattern.kind, count);
        }

        RedactionOutcome { redacted, hits }
    }

    /// Applies [`Self::redact`] to every string inside a JSON value.
    #[must_use]
    pub fn redact_value(&self, value: &Value) -> (Value, Vec<RedactionHit>) {
        let mut hits = Vec::new();
        let redacted = self.redact_value_into(value, &mut hits);
        (redacted, hits)
    }

    /// Redacts every metadata value in place and returns the number of hits.
    pub fn redact_metadata(&self, metadata: &mut BTreeMap<String, Value>) -> usize {
        let mut total = 0;
        for value in metadata.values_mut() {
            let (redacted, hits) = self.redact_value(value);
            total += hits.iter().map(|hit| hit.count).sum::<usize>();
            *value = redacted;
        }
        total
    }

    fn redact_value_into(&self, value: &Value, hits: &mut Vec<RedactionHit>) -> Value {
        match value {
            Value::String(text) => {
                let outcome = self.redact(text);
                for hit in outcome.hits {
                    merge_hit(hits, &hit.kind, hit.count);
                }
                Value::String(outcome.redacted)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.redact_value_into(item, hits))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.redact_value_into(item, hits)))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }
}

#[must_use]
pub fn placeholder_for(kind: &str) -> String {
    format!("{REDACTION_TOKEN_PREFIX}{kind}{REDACTION_TOKEN_SUFFIX}")
}

pub fn merge_hit(hits: &mut Vec<RedactionHit>, kind: &str, count: usize) {
    if let Some(existing) = hits.iter_mut().find(|hit| hit.kind == kind) {
        existing.count += count;
    } else {
        hits.push(RedactionHit {
            kind: kind.to_string(),
            count,
        });
    }
}

#[must_use]
pub fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern::new(
            "PRIVATE_KEY_BLOCK",
            r"(?s)-----BEGIN [A-Z0-9 ]*PRIVATE KEY-----.*?-----END [A-Z0-9 ]*PRIVATE KEY-----",
        ),
        RedactionPattern::new("BEARER_TOKEN", r"(?i)\bbearer\s+[A-Za-z0-9._=\-]{8,}"),
        RedactionPattern::new("OPENAI_KEY", r"\bsk-[A-Za-z0-9_\-]{20,}"),
        RedactionPattern::new("GITHUB_TOKEN", r"\bgh[pousr]_[A-Za-z0-9]{20,}\b"),
        RedactionPattern::new("AWS_ACCESS_KEY", r"\bAKIA[0-9A-Z]{16}\b"),
        RedactionPattern::new("SLACK_TOKEN", r"\bxox[baprs]-[A-Za-z0-9\-]{8,}"),
        RedactionPattern::new(
            "URL_QUERY_TOKEN",
            r#"(?i)[?&](?:access_token|token|api_key)=[^&\s"'\\}\]]+"#,
        ),
    ]
}

/// Filter built from [`default_redaction_patterns`], compiled once.
#[must_use]
pub fn default_filter() -> &'static RedactionFilter {
    static FILTER: OnceLock<RedactionFilter> = OnceLock::new();
    FILTER.get_or_init(|| {
        RedactionFilter::from_patterns(&default_redaction_patterns())
            .expect("built-in redaction patterns should compile")
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{RedactionFilter, RedactionPattern, default_filter};

    #[test]
    fn replaces_matches_with_kind_placeholders_and_counts_hits() {
        let key = ["sk-", "abcdefghijklmnopqrstuvwx"].concat();
        let input = format!("first {key} then {key}");
        let outcome = default_filter().redact(&input);

        assert!(!outcome.redacted.contains(&key));
        insta::assert_snapshot!(
            outcome.redacted,
            @"first [REDACTED:OPENAI_KEY] then [REDACTED:OPENAI_KEY]"
        );
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].kind, "OPENAI_KEY");
        assert_eq!(outcome.hits[0].count, 2);
        assert_eq!(outcome.total(), 2);
    }

    #[test]
    fn leaves_clean_text_untouched() {
        let outcome = default_filter().redact("commit abc123 touched src/App.tsx");
        assert_eq!(outcome.redacted, "commit abc123 touched src/App.tsx");
        assert!(outcome.hits.is_empty());
    }

    #[test]
    fn earlier_patterns_claim_overlapping_text() {
        let token = ["sk-", "abcdefghijklmnopqrstuvwxyz"].concat();
        let outcome = default_filter().redact(&format!("Authorization: Bearer {token}"));
        assert!(outcome.redacted.contains("[REDACTED:BEARER_TOKEN]"));
        assert!(outcome.hits.iter().all(|hit| hit.kind != "OPENAI_KEY"));
    }

    #[test]
    fn merges_hits_for_patterns_sharing_a_kind() {
        let filter = RedactionFilter::from_patterns(&[
            RedactionPattern::new("TICKET", r"T-\d+"),
            RedactionPattern::new("TICKET", r"JIRA-\d+"),
        ])
        .expect("patterns should compile");
        let outcome = filter.redact("T-1 JIRA-2 T-3");
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].count, 3);
    }

    #[test]
    fn rejects_invalid_patterns_with_kind_in_message() {
        let err = RedactionFilter::from_patterns(&[RedactionPattern::new("BROKEN", "(")])
            .expect_err("unbalanced group must fail");
        assert!(err.to_string().contains("BROKEN"), "unexpected error: {err}");
    }

    #[test]
    fn redacts_nested_json_strings() {
        let aws = ["AKIA", "ABCDEFGHIJKLMNOP"].concat();
        let (value, hits) = default_filter().redact_value(&json!({
            "payload": {"note": format!("key={aws}"), "n": 3}
        }));
        assert_eq!(
            value.pointer("/payload/note").and_then(|v| v.as_str()),
            Some("key=[REDACTED:AWS_ACCESS_KEY]")
        );
        assert_eq!(value.pointer("/payload/n"), Some(&json!(3)));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn url_token_stops_at_json_structure() {
        let envelope = r#"{"prompt":"fetch https://api.example.com/x?token=s3cret","n":1}"#;
        let outcome = default_filter().redact(envelope);
        assert_eq!(
            outcome.redacted,
            r#"{"prompt":"fetch https://api.example.com/x[REDACTED:URL_QUERY_TOKEN]","n":1}"#
        );
        serde_json::from_str::<serde_json::Value>(&outcome.redacted)
            .expect("redacted envelope should stay valid JSON");
    }

    #[test]
    fn redacts_metadata_values_in_place() {
        let key = ["sk-", "abcdefghijklmnopqrstuvwx"].concat();
        let mut metadata = BTreeMap::from([
            ("note".to_string(), json!(format!("my key is {key}"))),
            ("count".to_string(), json!(2)),
        ]);
        let hits = default_filter().redact_metadata(&mut metadata);
        assert_eq!(hits, 1);
        assert_eq!(metadata["note"], json!("my key is [REDACTED:OPENAI_KEY]"));
        assert_eq!(metadata["count"], json!(2));
    }
}
