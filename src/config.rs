use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the project settings file in the project directory
pub const PROJECT_FILE_NAME: &str = "strata.toml";

// ============================================================================
// Project Settings
// ============================================================================

/// Settings read from `strata.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project name, used as stack name prefix
    pub project: Option<String>,
    /// Regions stacks may be deployed to; empty allows any
    pub regions: Vec<String>,
    pub concurrent_stacks: usize,
    pub state_file: String,
    pub stacks_dir: String,
    pub templates_dir: String,
    pub modules_dir: String,
    /// Free-form variables exposed to configuration loading
    pub vars: BTreeMap<String, toml::Value>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project: None,
            regions: Vec::new(),
            concurrent_stacks: stacks::DEFAULT_CONCURRENT_STACKS,
            state_file: ".strata/state.json".to_string(),
            stacks_dir: "stacks".to_string(),
            templates_dir: "templates".to_string(),
            modules_dir: "modules".to_string(),
            vars: BTreeMap::new(),
        }
    }
}

impl ProjectConfig {
    /// Load settings from the project directory, defaults when the file is missing
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(PROJECT_FILE_NAME);
        if !path.exists() {
            log::debug!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid project settings in {}", path.display()))?;

        if config.concurrent_stacks == 0 {
            bail!("concurrent_stacks in {} must be at least 1", path.display());
        }

        log::debug!("Loaded project settings from {}", path.display());
        Ok(config)
    }

    /// Resolve a configured directory or file against the project directory
    ///
    /// `~` and environment variables are expanded first.
    pub fn resolve(&self, project_dir: &Path, value: &str) -> Result<PathBuf> {
        let expanded = shellexpand::full(value)
            .with_context(|| format!("Could not expand path: {value}"))?;
        let path = PathBuf::from(expanded.as_ref());
        Ok(if path.is_absolute() {
            path
        } else {
            project_dir.join(path)
        })
    }

    pub fn state_path(&self, project_dir: &Path) -> Result<PathBuf> {
        self.resolve(project_dir, &self.state_file)
    }

    /// Variables from the settings file with `--var` overrides applied
    pub fn variables(&self, overrides: &[(String, String)]) -> Result<serde_json::Value> {
        let mut vars = serde_json::Map::new();
        for (key, value) in &self.vars {
            let value = serde_json::to_value(value)
                .with_context(|| format!("Invalid value for variable {key}"))?;
            vars.insert(key.clone(), value);
        }
        for (key, value) in overrides {
            vars.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        Ok(serde_json::Value::Object(vars))
    }
}

/// Parse a `key=value` command line variable
pub fn parse_var(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Expected key=value, got '{arg}'")),
    }
}

// ============================================================================
// Tests
// ============================================================================
