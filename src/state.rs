//! Local stack provider
//!
//! Keeps "remote" stacks in a JSON state file so that projects can be
//! deployed and undeployed without a cloud account. Templates are YAML
//! documents; the values under their top-level `Outputs` map become the
//! stack outputs, with `${Param}` replaced by resolved parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stacks::{
    DeployRequest, OperationResult, RemoteStackSummary, Stack, StackClient, StackEvent,
    StackOperationType, StackStatus,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors reading or writing the state file
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<StateError> for stacks::Error {
    fn from(err: StateError) -> Self {
        Self::Provider(err.to_string())
    }
}

// ============================================================================
// State Structures
// ============================================================================

/// Contents of the state file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LocalState {
    /// Stacks keyed by `<region>/<name>`
    #[serde(default)]
    pub stacks: BTreeMap<String, StackRecord>,

    /// Last time the state was written
    pub last_updated: Option<DateTime<Utc>>,
}

/// One deployed stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRecord {
    pub path: String,
    pub region: String,
    pub summary: RemoteStackSummary,
    pub template: String,
    /// blake3 hash of template and parameters, empty after a failed create
    pub content_hash: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

fn record_key(stack: &Stack) -> String {
    format!("{}/{}", stack.region, stack.name)
}

fn content_hash(template: &str, parameters: &BTreeMap<String, String>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(template.as_bytes());
    for (key, value) in parameters {
        hasher.update(b"\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Read outputs from the `Outputs` map of a template
///
/// An output is either a scalar or a map with a `Value` key.
pub fn template_outputs(
    template: &str,
    parameters: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, String> {
    let document: serde_yaml::Value =
        serde_yaml::from_str(template).map_err(|e| format!("Template is not valid YAML: {e}"))?;

    let Some(outputs) = document.get("Outputs") else {
        return Ok(BTreeMap::new());
    };
    let outputs = outputs
        .as_mapping()
        .ok_or_else(|| "Template Outputs must be a map".to_string())?;

    let mut values = BTreeMap::new();
    for (key, output) in outputs {
        let key = key
            .as_str()
            .ok_or_else(|| "Template output names must be strings".to_string())?;
        let value = output.get("Value").unwrap_or(output);
        let value = match value {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            _ => return Err(format!("Output {key} must have a scalar value")),
        };
        values.insert(key.to_string(), substitute(&value, parameters));
    }
    Ok(values)
}

fn substitute(value: &str, parameters: &BTreeMap<String, String>) -> String {
    parameters
        .iter()
        .fold(value.to_string(), |acc, (name, resolved)| {
            acc.replace(&format!("${{{name}}}"), resolved)
        })
}

// ============================================================================
// LocalStackClient
// ============================================================================

/// Stack client persisting stacks in a local JSON file
pub struct LocalStackClient {
    path: PathBuf,
    state: Mutex<LocalState>,
}

impl LocalStackClient {
    /// Open the state file, starting empty when it does not exist
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let state = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| StateError::Read {
                path: path.display().to_string(),
                source,
            })?;
            let state = serde_json::from_str(&content).map_err(|source| StateError::Parse {
                path: path.display().to_string(),
                source,
            })?;
            log::debug!("Loaded state from {}", path.display());
            state
        } else {
            log::debug!("State file {} does not exist, starting empty", path.display());
            LocalState::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, state: &mut LocalState) -> Result<(), StateError> {
        state.last_updated = Some(Utc::now());
        let write_error = |source| StateError::Write {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(write_error)?;
        }
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| write_error(std::io::Error::other(e)))?;
        fs::write(&self.path, content).map_err(write_error)?;

        log::debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    fn deploy_failed(
        &self,
        state: &mut LocalState,
        request: &DeployRequest<'_>,
        message: String,
    ) -> stacks::Result<OperationResult> {
        let stack = request.stack;
        let key = record_key(stack);
        let status = match state.stacks.get(&key) {
            Some(_) if request.operation_type == StackOperationType::Update => {
                StackStatus::UpdateRollbackComplete
            }
            _ => StackStatus::CreateFailed,
        };

        let record = state.stacks.entry(key).or_insert_with(|| StackRecord {
            path: stack.path.clone(),
            region: stack.region.clone(),
            summary: RemoteStackSummary::new(&stack.name, status),
            template: String::new(),
            content_hash: String::new(),
            parameters: BTreeMap::new(),
        });
        record.summary.status = status;
        record.summary.status_reason = Some(message.clone());
        record.summary.last_updated_time = Some(Utc::now());
        self.save(state)?;

        let mut event = StackEvent::now(&stack.name, status.as_str());
        event.reason = Some(message.clone());
        Ok(OperationResult::failed(message, vec![event]))
    }
}

impl StackClient for LocalStackClient {
    fn get_current_status(&self, stack: &Stack) -> stacks::Result<Option<RemoteStackSummary>> {
        Ok(self
            .lock()
            .stacks
            .get(&record_key(stack))
            .map(|r| r.summary.clone()))
    }

    fn get_template(&self, stack: &Stack) -> stacks::Result<Option<String>> {
        Ok(self
            .lock()
            .stacks
            .get(&record_key(stack))
            .map(|r| r.template.clone()))
    }

    fn deploy(&self, request: &DeployRequest<'_>) -> stacks::Result<OperationResult> {
        let stack = request.stack;
        let key = record_key(stack);
        let hash = content_hash(request.template_body, request.parameters);
        let mut state = self.lock();

        let unchanged = state
            .stacks
            .get(&key)
            .is_some_and(|r| r.content_hash == hash);
        if unchanged && request.operation_type == StackOperationType::Update {
            log::debug!("Stack {} has no changes", stack.name);
            return Ok(OperationResult::unchanged());
        }
        if request.expect_no_changes {
            return Ok(OperationResult::would_change(format!(
                "Stack {} has changes",
                stack.name
            )));
        }

        let outputs = match template_outputs(request.template_body, request.parameters) {
            Ok(outputs) => outputs,
            Err(message) => return self.deploy_failed(&mut state, request, message),
        };

        let (in_progress, complete) = match request.operation_type {
            StackOperationType::Update => {
                (StackStatus::UpdateInProgress, StackStatus::UpdateComplete)
            }
            _ => (StackStatus::CreateInProgress, StackStatus::CreateComplete),
        };

        let now = Utc::now();
        let mut summary = match state.stacks.get(&key) {
            Some(existing) if complete == StackStatus::UpdateComplete => {
                let mut summary = existing.summary.clone();
                summary.last_updated_time = Some(now);
                summary
            }
            _ => RemoteStackSummary::new(&stack.name, complete),
        };
        summary.status = complete;
        summary.status_reason = None;
        summary.outputs = outputs;

        state.stacks.insert(
            key,
            StackRecord {
                path: stack.path.clone(),
                region: stack.region.clone(),
                summary,
                template: request.template_body.to_string(),
                content_hash: hash,
                parameters: request.parameters.clone(),
            },
        );
        self.save(&mut state)?;

        Ok(OperationResult::succeeded(
            format!("Stack {} {complete}", stack.name),
            vec![
                StackEvent::now(&stack.name, in_progress.as_str()),
                StackEvent::now(&stack.name, complete.as_str()),
            ],
        ))
    }

    fn destroy(&self, stack: &Stack) -> stacks::Result<OperationResult> {
        let mut state = self.lock();
        if state.stacks.remove(&record_key(stack)).is_none() {
            return Ok(OperationResult::unchanged());
        }
        self.save(&mut state)?;

        Ok(OperationResult::succeeded(
            format!("Stack {} deleted", stack.name),
            vec![
                StackEvent::now(&stack.name, StackStatus::DeleteInProgress.as_str()),
                StackEvent::now(&stack.name, StackStatus::DeleteComplete.as_str()),
            ],
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
