//! Lifecycle hooks run before and after stack operations
//!
//! Hooks are declared in stack and stack group configuration and matched
//! against the stage, operation and outcome of each stack operation.
//! Hook types are looked up by name in a [`HookRegistry`] which holds the
//! built-in types plus any registered by the caller.

use crate::error::{Error, Result};
use crate::model::Stack;
use crate::types::{CommandStatus, StackOperationType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use std::sync::Arc;

/// When a hook runs relative to the remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStage {
    Before,
    After,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Operation a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookOperation {
    Create,
    Update,
    Delete,
}

impl HookOperation {
    /// Map a planned operation to the hook operation it triggers
    ///
    /// A recreate is reported to hooks as a create. Skipped operations
    /// trigger no hooks.
    pub fn from_operation_type(operation_type: StackOperationType) -> Option<Self> {
        match operation_type {
            StackOperationType::Create | StackOperationType::Recreate => Some(Self::Create),
            StackOperationType::Update => Some(Self::Update),
            StackOperationType::Delete => Some(Self::Delete),
            StackOperationType::Skip => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Outcome of the operation, known to `after` hooks only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    Success,
    Failed,
    Cancelled,
    Skipped,
}

impl HookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }
}

impl From<CommandStatus> for HookStatus {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Success => Self::Success,
            CommandStatus::Failed => Self::Failed,
            CommandStatus::Cancelled => Self::Cancelled,
            CommandStatus::Skipped => Self::Skipped,
        }
    }
}

macro_rules! impl_display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display_as_str!(HookStage, HookOperation, HookStatus);

/// A hook as declared in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    /// Unique name within the declaring entity; a child hook with the
    /// same name replaces the inherited one
    pub name: String,
    /// Registered hook type
    #[serde(rename = "type")]
    pub hook_type: String,
    /// Stages to run in, all when absent
    pub stage: Option<Vec<HookStage>>,
    /// Operations to run for, all when absent
    pub operation: Option<Vec<HookOperation>>,
    /// Outcomes to run for (after stage only), all when absent
    pub status: Option<Vec<HookStatus>>,
    /// Type specific settings
    #[serde(default)]
    pub config: Value,
}

impl HookConfig {
    /// Create a hook running at every stage, operation and outcome
    pub fn new(name: impl Into<String>, hook_type: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            hook_type: hook_type.into(),
            stage: None,
            operation: None,
            status: None,
            config,
        }
    }

    /// Check whether the hook applies to the given stage, operation and outcome
    pub fn matches(
        &self,
        stage: HookStage,
        operation: HookOperation,
        status: Option<HookStatus>,
    ) -> bool {
        let stage_matches = self.stage.as_ref().is_none_or(|s| s.contains(&stage));
        let operation_matches = self
            .operation
            .as_ref()
            .is_none_or(|o| o.contains(&operation));
        let status_matches = match status {
            None => true,
            Some(status) => self.status.as_ref().is_none_or(|s| s.contains(&status)),
        };
        stage_matches && operation_matches && status_matches
    }
}

/// Everything a hook gets to see about the operation
pub struct HookInput<'a> {
    pub stack: &'a Stack,
    pub stage: HookStage,
    pub operation: HookOperation,
    pub status: Option<HookStatus>,
}

/// Result of running one hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutput {
    pub success: bool,
    pub message: String,
}

impl HookOutput {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A configured hook instance
pub trait Hook: Send + Sync {
    fn execute(&self, input: &HookInput<'_>) -> HookOutput;
}

/// Factory for hooks of one type
pub trait HookProvider: Send + Sync {
    /// Type name used in configuration
    fn hook_type(&self) -> &str;

    /// Build a hook from its configuration
    fn init(&self, name: &str, config: &Value) -> Result<Box<dyn Hook>>;
}

/// Hook types available to configuration
pub struct HookRegistry {
    providers: BTreeMap<String, Arc<dyn HookProvider>>,
}

impl HookRegistry {
    /// Registry without any hook types
    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// Registry with the built-in `cmd` and `fail` hook types
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert(Arc::new(CmdHookProvider));
        registry.insert(Arc::new(FailHookProvider));
        registry
    }

    fn insert(&mut self, provider: Arc<dyn HookProvider>) {
        self.providers
            .insert(provider.hook_type().to_string(), provider);
    }

    /// Register an additional hook type
    ///
    /// Fails if a hook type with the same name is already registered.
    pub fn register(&mut self, provider: Arc<dyn HookProvider>) -> Result<()> {
        if self.providers.contains_key(provider.hook_type()) {
            return Err(Error::DuplicateRegistration {
                kind: "Hook",
                name: provider.hook_type().to_string(),
            });
        }
        self.insert(provider);
        Ok(())
    }

    pub fn contains(&self, hook_type: &str) -> bool {
        self.providers.contains_key(hook_type)
    }

    /// Check that every declared hook has a registered type
    pub fn validate(&self, hooks: &[HookConfig], declared_in: &str) -> Result<()> {
        match hooks.iter().find(|h| !self.contains(&h.hook_type)) {
            Some(hook) => Err(Error::UnknownHook {
                hook_type: hook.hook_type.clone(),
                name: hook.name.clone(),
                declared_in: declared_in.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Instantiate a hook from its configuration
    pub fn init(&self, config: &HookConfig) -> Result<Box<dyn Hook>> {
        let provider = self
            .providers
            .get(&config.hook_type)
            .ok_or_else(|| Error::UnknownHook {
                hook_type: config.hook_type.clone(),
                name: config.name.clone(),
                declared_in: "hook configuration".to_string(),
            })?;
        provider.init(&config.name, &config.config)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The first hook that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub name: String,
    pub message: String,
}

/// Run every matching hook in declaration order, stopping at the first failure
pub fn run_hooks(
    registry: &HookRegistry,
    hooks: &[HookConfig],
    input: &HookInput<'_>,
) -> std::result::Result<(), HookFailure> {
    let matching = hooks
        .iter()
        .filter(|h| h.matches(input.stage, input.operation, input.status));

    for config in matching {
        log::debug!(
            "Running {} hook {} of stack {}",
            input.stage,
            config.name,
            input.stack.path
        );

        let hook = registry.init(config).map_err(|e| HookFailure {
            name: config.name.clone(),
            message: e.to_string(),
        })?;

        let output = hook.execute(input);
        if !output.success {
            log::warn!(
                "Hook {} of stack {} failed: {}",
                config.name,
                input.stack.path,
                output.message
            );
            return Err(HookFailure {
                name: config.name.clone(),
                message: output.message,
            });
        }
    }

    Ok(())
}

fn string_setting(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}

// ============================================================================
// Built-in: cmd
// ============================================================================

/// Runs a shell command with the operation exposed through environment variables
pub struct CmdHook {
    command: String,
    cwd: Option<String>,
}

impl Hook for CmdHook {
    fn execute(&self, input: &HookInput<'_>) -> HookOutput {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .env("STRATA_STACK_PATH", &input.stack.path)
            .env("STRATA_STACK_NAME", &input.stack.name)
            .env("STRATA_STACK_REGION", &input.stack.region)
            .env("STRATA_HOOK_STAGE", input.stage.as_str())
            .env("STRATA_HOOK_OPERATION", input.operation.as_str())
            .env(
                "STRATA_HOOK_STATUS",
                input.status.map(|s| s.as_str()).unwrap_or_default(),
            );
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        match command.output() {
            Ok(output) if output.status.success() => {
                HookOutput::success(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if stderr.is_empty() {
                    HookOutput::failure(format!("Command exited with {}", output.status))
                } else {
                    HookOutput::failure(stderr)
                }
            }
            Err(e) => HookOutput::failure(format!("Failed to run command: {e}")),
        }
    }
}

struct CmdHookProvider;

impl HookProvider for CmdHookProvider {
    fn hook_type(&self) -> &str {
        "cmd"
    }

    fn init(&self, name: &str, config: &Value) -> Result<Box<dyn Hook>> {
        let command = string_setting(config, "command").ok_or_else(|| Error::InvalidConfig {
            subject: format!("hook {name}"),
            message: "\"command\" is required".to_string(),
        })?;
        Ok(Box::new(CmdHook {
            command,
            cwd: string_setting(config, "cwd"),
        }))
    }
}

// ============================================================================
// Built-in: fail
// ============================================================================

/// Always fails with the configured message
pub struct FailHook {
    message: String,
}

impl Hook for FailHook {
    fn execute(&self, _input: &HookInput<'_>) -> HookOutput {
        HookOutput::failure(self.message.clone())
    }
}

struct FailHookProvider;

impl HookProvider for FailHookProvider {
    fn hook_type(&self) -> &str {
        "fail"
    }

    fn init(&self, _name: &str, config: &Value) -> Result<Box<dyn Hook>> {
        Ok(Box::new(FailHook {
            message: string_setting(config, "message").unwrap_or_else(|| "Hook failed".to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleInformation, Stack};
    use serde_json::json;

    fn stack() -> Stack {
        Stack::new("/a.yml/eu-west-1", "a", "eu-west-1", "/", ModuleInformation::root())
    }

    #[test]
    fn test_matches_filters() {
        let mut hook = HookConfig::new("h", "cmd", json!({}));
        assert!(hook.matches(HookStage::Before, HookOperation::Create, None));

        hook.stage = Some(vec![HookStage::After]);
        hook.status = Some(vec![HookStatus::Failed]);
        assert!(!hook.matches(HookStage::Before, HookOperation::Create, None));
        assert!(!hook.matches(HookStage::After, HookOperation::Create, Some(HookStatus::Success)));
        assert!(hook.matches(HookStage::After, HookOperation::Update, Some(HookStatus::Failed)));

        hook.operation = Some(vec![HookOperation::Delete]);
        assert!(!hook.matches(HookStage::After, HookOperation::Update, Some(HookStatus::Failed)));
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut registry = HookRegistry::new();
        let err = registry.register(Arc::new(FailHookProvider)).unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration { .. }));
    }

    #[test]
    fn test_validate_unknown_hook() {
        let registry = HookRegistry::new();
        let hooks = vec![HookConfig::new("notify", "slack", json!({}))];
        let err = registry.validate(&hooks, "/a.yml").unwrap_err();
        assert!(err.to_string().contains("Unknown hook type 'slack'"));
    }

    #[test]
    fn test_run_hooks_stops_at_first_failure() {
        let registry = HookRegistry::new();
        let stack = stack();
        let hooks = vec![
            HookConfig::new("first", "fail", json!({ "message": "Oh no!" })),
            HookConfig::new("second", "fail", json!({ "message": "never" })),
        ];
        let input = HookInput {
            stack: &stack,
            stage: HookStage::After,
            operation: HookOperation::Create,
            status: Some(HookStatus::Success),
        };

        let failure = run_hooks(&registry, &hooks, &input).unwrap_err();
        assert_eq!(failure.name, "first");
        assert_eq!(failure.message, "Oh no!");
    }

    #[test]
    fn test_cmd_hook_exit_code() {
        let registry = HookRegistry::new();
        let stack = stack();
        let input = HookInput {
            stack: &stack,
            stage: HookStage::Before,
            operation: HookOperation::Update,
            status: None,
        };

        let ok = HookConfig::new("ok", "cmd", json!({ "command": "test \"$STRATA_HOOK_OPERATION\" = update" }));
        assert!(run_hooks(&registry, &[ok], &input).is_ok());

        let bad = HookConfig::new("bad", "cmd", json!({ "command": "echo broken >&2; exit 3" }));
        let failure = run_hooks(&registry, &[bad], &input).unwrap_err();
        assert_eq!(failure.message, "broken");
    }

    #[test]
    fn test_cmd_hook_requires_command() {
        let registry = HookRegistry::new();
        let err = registry
            .init(&HookConfig::new("x", "cmd", json!({})))
            .err()
            .unwrap();
        assert!(err.to_string().contains("\"command\" is required"));
    }
}
