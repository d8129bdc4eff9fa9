use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::models::TraceRecord;

pub const DEFAULT_TRACE_DIR: &str = ".agentrace/trace";
pub const GENERATED_DIR: &str = "generated";

/// Repository-local store of trace-record JSON files. Paths are relative to
/// the store's base directory inside the repository.
pub trait TraceFileStore {
    /// File names directly under `dir`, sorted. A missing directory is empty.
    fn list(&self, repo_root: &Path, dir: &str) -> Result<Vec<String>>;

    fn read(&self, repo_root: &Path, path: &str) -> Result<String>;

    fn write(&self, repo_root: &Path, path: &str, contents: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsTraceFileStore {
    trace_dir: PathBuf,
}

impl Default for FsTraceFileStore {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_DIR)
    }
}

impl FsTraceFileStore {
    #[must_use]
    pub fn new(trace_dir: impl Into<PathBuf>) -> Self {
        Self {
            trace_dir: trace_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.trace_dir)
    }

    fn resolve(&self, repo_root: &Path, relative: &str) -> Result<PathBuf> {
        Ok(self.base_dir(repo_root).join(checked_relative_path(relative)?))
    }
}

impl TraceFileStore for FsTraceFileStore {
    fn list(&self, repo_root: &Path, dir: &str) -> Result<Vec<String>> {
        let path = self.resolve(repo_root, dir)?;
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&path)
            .with_context(|| format!("failed to list trace directory: {}", path.display()))?
        {
            let entry = entry
                .with_context(|| format!("failed to read trace directory: {}", path.display()))?;
            if entry.file_type().is_ok_and(|kind| kind.is_file()) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, repo_root: &Path, path: &str) -> Result<String> {
        let resolved = self.resolve(repo_root, path)?;
        std::fs::read_to_string(&resolved)
            .with_context(|| format!("failed to read trace file: {}", resolved.display()))
    }

    fn write(&self, repo_root: &Path, path: &str, contents: &str) -> Result<()> {
        let resolved = self.resolve(repo_root, path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create trace directory: {}", parent.display())
            })?;
        }
        std::fs::write(&resolved, contents)
            .with_context(|| format!("failed to write trace file: {}", resolved.display()))
    }
}

/// Rejects absolute paths and any `..` so store paths stay under the base.
pub fn checked_relative_path(relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let mut checked = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => checked.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("trace file path escapes the trace directory: {relative}")
            }
        }
    }
    Ok(checked)
}

#[must_use]
pub fn generated_path_for(trace_id: &str) -> String {
    let file_stem = trace_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("{GENERATED_DIR}/{file_stem}.json")
}

/// Writes a record as pretty JSON under `generated/` and returns its path.
pub fn export_trace_record(
    store: &dyn TraceFileStore,
    repo_root: &Path,
    record: &TraceRecord,
) -> Result<String> {
    let path = generated_path_for(&record.id);
    let encoded = serde_json::to_string_pretty(record)
        .with_context(|| format!("failed to encode trace record: {}", record.id))?;
    store.write(repo_root, &path, &encoded)?;
    Ok(path)
}

/// Every `*.json` at the top of the store and under `generated/`.
pub fn stored_trace_paths(store: &dyn TraceFileStore, repo_root: &Path) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for dir in ["", GENERATED_DIR] {
        for name in store.list(repo_root, dir)? {
            if !name.ends_with(".json") {
                continue;
            }
            paths.push(if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            });
        }
    }
    Ok(paths)
}
