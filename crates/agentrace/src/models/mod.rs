pub mod issue;
pub mod otel;
pub mod query_envelope;
pub mod summary;
pub mod trace;

pub use issue::{IngestIssue, IssueSeverity};
pub use otel::{AttributeBag, AttributeValue, CodexOtelEvent, LogsEnvelope};
pub use query_envelope::{QUERY_ENVELOPE_SCHEMA_VERSION, QueryEnvelope, QueryEnvelopeCommandFailure};
pub use summary::{LineBuckets, TraceCommitSummary, TraceFileSummary};
pub use trace::{
    Contributor, ContributorType, RelatedLink, TRACE_SCHEMA_VERSION, TraceConversation, TraceFile,
    TraceRange, TraceRecord, TraceTool, TraceVcs, VCS_TYPE_GIT, trace_record_json_schema,
};
