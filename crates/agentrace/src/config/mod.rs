use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::notes::DEFAULT_NOTES_NAMESPACE;
use crate::trace_files::DEFAULT_TRACE_DIR;
use crate::utils::redaction::{RedactionFilter, RedactionPattern, default_redaction_patterns};

pub const DATABASE_FILE_NAME: &str = "attribution.sqlite";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    out_dir_override: Option<&Path>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let out_dir = match out_dir_override {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => home_dir.join(".agentrace").join("output"),
    };

    Ok(RuntimePaths {
        home_dir,
        cwd,
        out_dir: normalize_lexical(&out_dir),
    })
}

impl RuntimePaths {
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.out_dir.join(DATABASE_FILE_NAME)
    }

    #[must_use]
    pub fn default_config_path(&self) -> PathBuf {
        self.out_dir.join(CONFIG_FILE_NAME)
    }

    /// Resolves a user-supplied path (`~`, relative to cwd) the same way the
    /// out dir override is resolved.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_user_path(path, &self.home_dir, &self.cwd)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub redaction_patterns: Vec<RedactionPattern>,
    pub notes_namespace: String,
    pub trace_dir: String,
    pub export_trace_files: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redaction_patterns: default_redaction_patterns(),
            notes_namespace: DEFAULT_NOTES_NAMESPACE.to_string(),
            trace_dir: DEFAULT_TRACE_DIR.to_string(),
            export_trace_files: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.notes_namespace.trim().is_empty()
            || self.notes_namespace.chars().any(char::is_whitespace)
        {
            bail!("notes_namespace must be a non-empty ref name without whitespace");
        }
        let trace_dir = Path::new(&self.trace_dir);
        if self.trace_dir.trim().is_empty() || trace_dir.is_absolute() {
            bail!("trace_dir must be a relative path inside the repository");
        }
        if trace_dir
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            bail!("trace_dir may not leave the repository: {}", self.trace_dir);
        }
        self.redaction_filter().map(|_| ())
    }

    pub fn redaction_filter(&self) -> Result<RedactionFilter> {
        RedactionFilter::from_patterns(&self.redaction_patterns)
            .context("invalid redaction_patterns in pipeline config")
    }
}

/// Loads `explicit` when given (it must exist), otherwise the default config
/// file when present, otherwise built-in defaults.
pub fn load_pipeline_config(paths: &RuntimePaths, explicit: Option<&Path>) -> Result<PipelineConfig> {
    let path = match explicit {
        Some(path) => paths.resolve(path)?,
        None => {
            let default_path = paths.default_config_path();
            if !default_path.is_file() {
                return Ok(PipelineConfig::default());
            }
            default_path
        }
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read pipeline config: {}", path.display()))?;
    let config = serde_json::from_str::<PipelineConfig>(&raw)
        .with_context(|| format!("failed to parse pipeline config: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}
