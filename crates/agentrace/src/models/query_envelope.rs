use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::utils::time::now_utc_iso;

pub const QUERY_ENVELOPE_SCHEMA_VERSION: &str = "agentrace.query-envelope.v1";

pub type QueryEnvelopeMeta = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMessage {
    pub code: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl EnvelopeMessage {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// Stdout contract shared by every CLI command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    pub ok: bool,
    pub command: String,
    pub generated_at_utc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub meta: QueryEnvelopeMeta,
    pub warnings: Vec<EnvelopeMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeMessage>,
}

impl QueryEnvelope {
    #[must_use]
    pub fn ok(command: impl Into<String>, data: Value) -> Self {
        let mut envelope = Self::base(command.into(), true);
        envelope.data = Some(data);
        envelope
    }

    #[must_use]
    pub fn error(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::base(command.into(), false);
        envelope.error = Some(EnvelopeMessage::new(code, message));
        envelope
    }

    fn base(command: String, ok: bool) -> Self {
        Self {
            ok,
            command,
            generated_at_utc: now_utc_iso(),
            data: None,
            meta: QueryEnvelopeMeta::from([(
                "schema_version".to_string(),
                json!(QUERY_ENVELOPE_SCHEMA_VERSION),
            )]),
            warnings: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_warning(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.warnings.push(EnvelopeMessage::new(code, message));
        self
    }

    #[must_use]
    pub fn with_error_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }

    /// Encodes for stdout; falls back to a minimal literal if encoding fails.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"ok\":false,\"command\":{}}}",
                Value::String(self.command.clone())
            )
        })
    }
}

/// Carries a failure envelope through `anyhow` so `main` can print it and
/// pick the exit code.
#[derive(Debug, Clone)]
pub struct QueryEnvelopeCommandFailure {
    envelope: QueryEnvelope,
    exit_code: i32,
}

impl QueryEnvelopeCommandFailure {
    #[must_use]
    pub fn new(envelope: QueryEnvelope) -> Self {
        Self {
            envelope,
            exit_code: 1,
        }
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    #[must_use]
    pub fn envelope(&self) -> &QueryEnvelope {
        &self.envelope
    }

    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl Display for QueryEnvelopeCommandFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.envelope.encode())
    }
}

impl std::error::Error for QueryEnvelopeCommandFailure {}
