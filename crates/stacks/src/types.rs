//! Core types for stack operations and their results

use crate::client::StackEvent;
use crate::path::StackPath;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Status of a single stack operation or a whole command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Failed,
    Cancelled,
    Skipped,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of remote operation planned for a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackOperationType {
    /// Stack does not exist remotely
    Create,
    /// Stack exists and is healthy
    Update,
    /// Stack exists in a state that only allows delete and create
    Recreate,
    /// Stack is removed
    Delete,
    /// Nothing to do, e.g. undeploying a stack that does not exist
    Skip,
}

impl StackOperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Recreate => "RECREATE",
            Self::Delete => "DELETE",
            Self::Skip => "SKIP",
        }
    }

    /// Whether the operation deploys the stack
    pub fn is_deploy(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Recreate)
    }
}

impl fmt::Display for StackOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code attached to every stack result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultReason {
    Success,
    NoChanges,
    Skipped,
    Cancelled,
    DependenciesFailed,
    BeforeHooksFailed,
    AfterHooksFailed,
    ParameterResolutionFailed,
    TemplateNotFound,
    ProviderError,
    UnexpectedChanges,
}

impl ResultReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NoChanges => "NO_CHANGES",
            Self::Skipped => "SKIPPED",
            Self::Cancelled => "CANCELLED",
            Self::DependenciesFailed => "DEPENDENCIES_FAILED",
            Self::BeforeHooksFailed => "BEFORE_HOOKS_FAILED",
            Self::AfterHooksFailed => "AFTER_HOOKS_FAILED",
            Self::ParameterResolutionFailed => "PARAMETER_RESOLUTION_FAILED",
            Self::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::UnexpectedChanges => "UNEXPECTED_CHANGES",
        }
    }
}

impl fmt::Display for ResultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    serializer.serialize_u64(millis)
}

/// Result of one stack operation
#[derive(Debug, Clone, Serialize)]
pub struct StackResult {
    pub stack_path: StackPath,
    pub stack_name: String,
    pub operation_type: StackOperationType,
    pub status: CommandStatus,
    pub reason: ResultReason,
    pub message: String,
    /// `false` for failed and cancelled operations
    pub success: bool,
    pub stack_existed_before_operation: bool,
    pub events: Vec<StackEvent>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl StackResult {
    /// Check if the result ends a dependency chain
    pub fn is_failure(&self) -> bool {
        matches!(self.status, CommandStatus::Failed | CommandStatus::Cancelled)
    }
}

/// Aggregate result of a deploy or undeploy command
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub message: String,
    pub success: bool,
    /// One result per planned operation, in plan order
    pub results: Vec<StackResult>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Output for a plan declined before anything ran
    pub fn cancelled(elapsed: Duration) -> Self {
        Self {
            status: CommandStatus::Cancelled,
            message: "Cancelled".to_string(),
            success: false,
            results: Vec::new(),
            elapsed,
        }
    }

    /// Aggregate per-stack results
    pub fn from_results(results: Vec<StackResult>, elapsed: Duration) -> Self {
        let failed = results
            .iter()
            .any(|r| r.status == CommandStatus::Failed);
        let (status, message) = if failed {
            (CommandStatus::Failed, "Failed")
        } else {
            (CommandStatus::Success, "Success")
        };

        Self {
            status,
            message: message.to_string(),
            success: status == CommandStatus::Success,
            results,
            elapsed,
        }
    }

    /// Count results with the given status
    pub fn count(&self, status: CommandStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Options controlling plan execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of operations running at once in parallel mode
    pub concurrent_stacks: usize,
    /// Skip plan and per-operation confirmation
    pub auto_confirm: bool,
}

/// Default bound on concurrently executing stack operations
pub const DEFAULT_CONCURRENT_STACKS: usize = 20;

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrent_stacks: DEFAULT_CONCURRENT_STACKS,
            auto_confirm: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(path: &str, status: CommandStatus) -> StackResult {
        StackResult {
            stack_path: path.into(),
            stack_name: path.trim_start_matches('/').into(),
            operation_type: StackOperationType::Create,
            status,
            reason: ResultReason::Success,
            message: String::new(),
            success: status == CommandStatus::Success,
            stack_existed_before_operation: false,
            events: Vec::new(),
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_output_failed_when_any_result_failed() {
        let output = CommandOutput::from_results(
            vec![
                result("/a.yml/r", CommandStatus::Success),
                result("/b.yml/r", CommandStatus::Failed),
                result("/c.yml/r", CommandStatus::Cancelled),
            ],
            Duration::ZERO,
        );
        assert_eq!(output.status, CommandStatus::Failed);
        assert!(!output.success);
        assert_eq!(output.count(CommandStatus::Cancelled), 1);
    }

    #[test]
    fn test_output_success() {
        let output = CommandOutput::from_results(
            vec![result("/a.yml/r", CommandStatus::Success), result("/b.yml/r", CommandStatus::Skipped)],
            Duration::ZERO,
        );
        assert_eq!(output.status, CommandStatus::Success);
        assert!(output.success);
    }

    #[test]
    fn test_cancelled_output_has_no_results() {
        let output = CommandOutput::cancelled(Duration::ZERO);
        assert_eq!(output.status, CommandStatus::Cancelled);
        assert_eq!(output.message, "Cancelled");
        assert!(output.results.is_empty());
    }

    #[test]
    fn test_serialized_codes() {
        assert_eq!(
            serde_json::to_string(&ResultReason::AfterHooksFailed).unwrap(),
            "\"AFTER_HOOKS_FAILED\""
        );
        assert_eq!(
            serde_json::to_string(&StackOperationType::Recreate).unwrap(),
            "\"RECREATE\""
        );
        let json = serde_json::to_value(result("/a.yml/r", CommandStatus::Success)).unwrap();
        assert_eq!(json["elapsed_ms"], 5);
        assert_eq!(json["status"], "SUCCESS");
    }

    #[test]
    fn test_default_options() {
        let opts = ExecuteOptions::default();
        assert_eq!(opts.concurrent_stacks, 20);
        assert!(!opts.auto_confirm);
    }
}
