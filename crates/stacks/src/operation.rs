//! Running a single stack operation
//!
//! The executor only sequences operations. What an operation actually does
//! is up to an [`OperationRunner`]; [`StackOperator`] is the default one,
//! which resolves parameters, loads the template, runs hooks and calls the
//! [`StackClient`].

use crate::client::{DeployRequest, OperationResult, StackClient, StackEvent};
use crate::context::OperationReview;
use crate::error::Result;
use crate::hooks::{run_hooks, HookInput, HookOperation, HookRegistry, HookStage, HookStatus};
use crate::model::{ParameterResolver, ParameterSpec, Stack, StacksContext};
use crate::planner::StackOperation;
use crate::resolvers::ResolverInput;
use crate::types::{CommandStatus, ResultReason, StackOperationType, StackResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Performs planned operations against the remote provider
pub trait OperationRunner: Send + Sync {
    /// Material for confirming the operation interactively
    fn review(&self, _operation: &StackOperation) -> OperationReview {
        OperationReview::default()
    }

    /// Run the operation to a terminal result
    ///
    /// Failures are reported in the result, never as a panic or error.
    fn run(&self, operation: &StackOperation) -> StackResult;
}

/// Build the result of an operation
pub fn operation_result(
    operation: &StackOperation,
    status: CommandStatus,
    reason: ResultReason,
    message: impl Into<String>,
    events: Vec<StackEvent>,
    elapsed: Duration,
) -> StackResult {
    StackResult {
        stack_path: operation.stack.path.clone(),
        stack_name: operation.stack.name.clone(),
        operation_type: operation.operation_type,
        status,
        reason,
        message: message.into(),
        success: !matches!(status, CommandStatus::Failed | CommandStatus::Cancelled),
        stack_existed_before_operation: operation.stack_existed(),
        events,
        elapsed,
    }
}

/// Result of an operation that never ran
pub fn cancelled_result(operation: &StackOperation, reason: ResultReason) -> StackResult {
    let message = match reason {
        ResultReason::DependenciesFailed => "Dependencies failed",
        _ => "Cancelled",
    };
    operation_result(
        operation,
        CommandStatus::Cancelled,
        reason,
        message,
        Vec::new(),
        Duration::ZERO,
    )
}

/// Default runner: parameters, template, hooks and the stack client
pub struct StackOperator {
    ctx: Arc<StacksContext>,
    client: Arc<dyn StackClient>,
    hooks: Arc<HookRegistry>,
    expect_no_changes: bool,
}

impl StackOperator {
    pub fn new(
        ctx: Arc<StacksContext>,
        client: Arc<dyn StackClient>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            ctx,
            client,
            hooks,
            expect_no_changes: false,
        }
    }

    /// Fail every deploy that would change a stack, without changing it
    pub fn with_expect_no_changes(mut self, expect_no_changes: bool) -> Self {
        self.expect_no_changes = expect_no_changes;
        self
    }

    fn resolve_value(
        &self,
        stack: &Stack,
        name: &str,
        list_index: Option<usize>,
        parameter: &ParameterResolver,
    ) -> Result<String> {
        let input = ResolverInput {
            stack,
            parameter_name: name,
            list_index,
            ctx: &self.ctx,
            client: self.client.as_ref(),
        };
        Ok(match parameter.resolver.resolve(&input)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Resolve every parameter in name order; lists are joined with commas
    pub fn resolve_parameters(&self, stack: &Stack) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for (name, spec) in &stack.parameters {
            let value = match spec {
                ParameterSpec::Single(parameter) => self.resolve_value(stack, name, None, parameter)?,
                ParameterSpec::List { items, .. } => items
                    .iter()
                    .enumerate()
                    .map(|(i, parameter)| self.resolve_value(stack, name, Some(i), parameter))
                    .collect::<Result<Vec<_>>>()?
                    .join(","),
            };
            values.insert(name.clone(), value);
        }
        Ok(values)
    }

    /// Template body from the config source of the stack's module
    pub fn load_template(&self, stack: &Stack) -> Result<String> {
        self.ctx
            .config_source(&stack.module.path)?
            .get_stack_template_contents(&stack.template)
    }

    /// Run hooks around a remote action and turn the outcome into a result
    fn with_hooks<F>(
        &self,
        operation: &StackOperation,
        hook_operation: HookOperation,
        started: Instant,
        action: F,
    ) -> StackResult
    where
        F: FnOnce() -> Result<OperationResult>,
    {
        let stack = operation.stack.as_ref();
        let before = HookInput {
            stack,
            stage: HookStage::Before,
            operation: hook_operation,
            status: None,
        };
        if let Err(failure) = run_hooks(&self.hooks, &stack.props.hooks, &before) {
            return operation_result(
                operation,
                CommandStatus::Failed,
                ResultReason::BeforeHooksFailed,
                failure.message,
                Vec::new(),
                started.elapsed(),
            );
        }

        let (status, reason, message, events) = match action() {
            Ok(outcome) if outcome.success && outcome.changed => (
                CommandStatus::Success,
                ResultReason::Success,
                outcome.message,
                outcome.events,
            ),
            Ok(outcome) if outcome.success => (
                CommandStatus::Success,
                ResultReason::NoChanges,
                outcome.message,
                outcome.events,
            ),
            Ok(outcome) if outcome.changed => (
                CommandStatus::Failed,
                ResultReason::UnexpectedChanges,
                outcome.message,
                outcome.events,
            ),
            Ok(outcome) => (
                CommandStatus::Failed,
                ResultReason::ProviderError,
                outcome.message,
                outcome.events,
            ),
            Err(e) => (
                CommandStatus::Failed,
                ResultReason::ProviderError,
                e.to_string(),
                Vec::new(),
            ),
        };

        let after = HookInput {
            stack,
            stage: HookStage::After,
            operation: hook_operation,
            status: Some(HookStatus::from(status)),
        };
        if let Err(failure) = run_hooks(&self.hooks, &stack.props.hooks, &after) {
            return operation_result(
                operation,
                CommandStatus::Failed,
                ResultReason::AfterHooksFailed,
                failure.message,
                events,
                started.elapsed(),
            );
        }

        operation_result(operation, status, reason, message, events, started.elapsed())
    }

    fn deploy(&self, operation: &StackOperation, hook_operation: HookOperation) -> StackResult {
        let started = Instant::now();
        let stack = operation.stack.as_ref();

        let parameters = match self.resolve_parameters(stack) {
            Ok(parameters) => parameters,
            Err(e) => {
                return operation_result(
                    operation,
                    CommandStatus::Failed,
                    ResultReason::ParameterResolutionFailed,
                    e.to_string(),
                    Vec::new(),
                    started.elapsed(),
                );
            }
        };

        let template = match self.load_template(stack) {
            Ok(template) => template,
            Err(e) => {
                return operation_result(
                    operation,
                    CommandStatus::Failed,
                    ResultReason::TemplateNotFound,
                    e.to_string(),
                    Vec::new(),
                    started.elapsed(),
                );
            }
        };

        self.with_hooks(operation, hook_operation, started, || {
            if self.expect_no_changes && operation.operation_type != StackOperationType::Update {
                return Ok(OperationResult::would_change(format!(
                    "Stack {} would be {}d",
                    stack.name,
                    operation.operation_type.as_str().to_lowercase()
                )));
            }
            if operation.operation_type == StackOperationType::Recreate {
                log::debug!("Removing stack {} before creating it again", stack.path);
                let removed = self.client.destroy(stack)?;
                if !removed.success {
                    return Ok(removed);
                }
            }
            self.client.deploy(&DeployRequest {
                stack,
                operation_type: operation.operation_type,
                template_body: &template,
                parameters: &parameters,
                expect_no_changes: self.expect_no_changes,
            })
        })
    }
}

impl OperationRunner for StackOperator {
    fn review(&self, operation: &StackOperation) -> OperationReview {
        let stack = operation.stack.as_ref();
        let current_template = if operation.stack_existed() {
            self.client.get_template(stack).ok().flatten()
        } else {
            None
        };
        let desired_template = if operation.operation_type.is_deploy() {
            self.load_template(stack).ok()
        } else {
            None
        };
        OperationReview {
            current_template,
            desired_template,
        }
    }

    fn run(&self, operation: &StackOperation) -> StackResult {
        log::debug!(
            "Running {} of stack {}",
            operation.operation_type,
            operation.path()
        );

        let Some(hook_operation) = HookOperation::from_operation_type(operation.operation_type)
        else {
            return operation_result(
                operation,
                CommandStatus::Skipped,
                ResultReason::Skipped,
                "Stack does not exist",
                Vec::new(),
                Duration::ZERO,
            );
        };

        if operation.operation_type == StackOperationType::Delete {
            let started = Instant::now();
            return self.with_hooks(operation, hook_operation, started, || {
                self.client.destroy(&operation.stack)
            });
        }

        self.deploy(operation, hook_operation)
    }
}
