//! Remote provider boundary
//!
//! The engine never talks to a provider directly. Everything it needs to
//! know about remote stacks, and every change it makes, goes through a
//! [`StackClient`] supplied by the caller.

use crate::error::Result;
use crate::model::Stack;
use crate::types::StackOperationType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of a remote stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    CreateInProgress,
    CreateFailed,
    CreateComplete,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackComplete,
    ReviewInProgress,
}

impl StackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateFailed => "CREATE_FAILED",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            Self::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::ReviewInProgress => "REVIEW_IN_PROGRESS",
        }
    }

    /// The stack never finished creating and can only be deleted and created again
    pub fn requires_recreate(&self) -> bool {
        matches!(
            self,
            Self::CreateFailed | Self::RollbackComplete | Self::RollbackFailed
        )
    }

    /// The stack exists only as a placeholder and is treated as absent
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::ReviewInProgress | Self::DeleteComplete)
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of a remote stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStackSummary {
    pub name: String,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub last_updated_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl RemoteStackSummary {
    /// Summary of a stack created now, without outputs
    pub fn new(name: impl Into<String>, status: StackStatus) -> Self {
        Self {
            name: name.into(),
            status,
            status_reason: None,
            creation_time: Utc::now(),
            last_updated_time: None,
            outputs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

impl StackEvent {
    pub fn now(logical_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            logical_id: logical_id.into(),
            status: status.into(),
            reason: None,
        }
    }
}

/// One event reported by the provider while an operation ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
    pub timestamp: DateTime<Utc>,
    pub logical_id: String,
    pub status: String,
    pub reason: Option<String>,
}

/// Everything needed to create or update a remote stack
pub struct DeployRequest<'a> {
    pub stack: &'a Stack,
    pub operation_type: StackOperationType,
    pub template_body: &'a str,
    /// Resolved parameter values, keyed by parameter name
    pub parameters: &'a BTreeMap<String, String>,
    /// Only check for changes. A stack that would change is reported with
    /// [`OperationResult::would_change`] and left as it is.
    pub expect_no_changes: bool,
}

/// Outcome of a remote create, update or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    /// `false` when the provider detected nothing to change
    pub changed: bool,
    pub message: String,
    pub events: Vec<StackEvent>,
}

impl OperationResult {
    pub fn succeeded(message: impl Into<String>, events: Vec<StackEvent>) -> Self {
        Self {
            success: true,
            changed: true,
            message: message.into(),
            events,
        }
    }

    pub fn unchanged() -> Self {
        Self {
            success: true,
            changed: false,
            message: "No changes".to_string(),
            events: Vec::new(),
        }
    }

    /// The stack would change but nothing was applied
    pub fn would_change(message: impl Into<String>) -> Self {
        Self {
            success: false,
            changed: true,
            message: message.into(),
            events: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>, events: Vec<StackEvent>) -> Self {
        Self {
            success: false,
            changed: false,
            message: message.into(),
            events,
        }
    }
}

/// Provider of remote stack state and operations
///
/// Implementations must be safe to call from several worker threads at once.
pub trait StackClient: Send + Sync {
    /// Current remote state, `None` when the stack does not exist
    fn get_current_status(&self, stack: &Stack) -> Result<Option<RemoteStackSummary>>;

    /// Template currently deployed, used for review diffs
    fn get_template(&self, _stack: &Stack) -> Result<Option<String>> {
        Ok(None)
    }

    /// Create or update the stack
    fn deploy(&self, request: &DeployRequest<'_>) -> Result<OperationResult>;

    /// Delete the stack
    fn destroy(&self, stack: &Stack) -> Result<OperationResult>;
}
