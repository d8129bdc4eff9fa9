pub mod codex_otel;
pub mod diff_ranges;
pub mod envelope;
pub mod grouping;

pub use codex_otel::{
    ADAPTER_NAME, ConversionOutput, PROVENANCE_METADATA_KEY, build_trace_record,
    codex_events_to_trace_records, otel_envelope_to_trace_records,
};
pub use diff_ranges::{FALLBACK_FILE_PATH, ResolvedFiles, resolve_trace_files};
pub use envelope::otel_envelope_to_codex_events;
pub use grouping::{CommitEventGroup, CommitGrouping, group_events_by_commit};
