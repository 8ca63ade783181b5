//! Confirmation and progress traits
//!
//! These traits let the executor ask for confirmation and report progress
//! without depending on a terminal, a prompt library or a progress bar.

use crate::error::Result;
use crate::planner::{ExecutionPlan, StackOperation};
use crate::types::StackResult;

/// Answer to the plan confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPlanAnswer {
    /// Run sequentially, confirming each operation
    ContinueWithReview,
    /// Run in parallel without further questions
    ContinueNoReview,
    /// Run nothing
    Cancel,
}

/// Answer to a single operation confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOperationAnswer {
    Yes,
    No,
    /// Run this one and everything after it without asking
    YesToAll,
}

/// Material shown to the user before an operation is confirmed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationReview {
    /// Template currently deployed
    pub current_template: Option<String>,
    /// Template that would be deployed
    pub desired_template: Option<String>,
}

/// Confirmation callback for user interaction
///
/// Implement this trait to handle user confirmations.
pub trait ConfirmCallback: Send {
    /// Ask whether and how to run the plan
    fn confirm_plan(&mut self, plan: &ExecutionPlan) -> Result<ConfirmPlanAnswer>;

    /// Ask whether to run a single operation
    ///
    /// # Arguments
    /// * `operation` - The operation about to run
    /// * `review` - Current and desired template, when available
    fn confirm_operation(
        &mut self,
        operation: &StackOperation,
        review: &OperationReview,
    ) -> Result<ConfirmOperationAnswer>;
}

/// Progress callback for plan execution
///
/// All methods are called from the thread that called the executor.
pub trait ProgressCallback: Send {
    /// Called once before the first operation
    fn on_plan_start(&mut self, count: usize);

    /// Called when an operation is submitted for execution
    fn on_operation_start(&mut self, operation: &StackOperation);

    /// Called when an operation has a result, including cancelled ones
    fn on_operation_complete(&mut self, result: &StackResult);

    /// Called once after the last result
    fn on_plan_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan_start(&mut self, _count: usize) {}
    fn on_operation_start(&mut self, _operation: &StackOperation) {}
    fn on_operation_complete(&mut self, _result: &StackResult) {}
    fn on_plan_complete(&mut self) {}
}

/// Auto-confirm callback (runs everything in parallel)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm_plan(&mut self, _plan: &ExecutionPlan) -> Result<ConfirmPlanAnswer> {
        Ok(ConfirmPlanAnswer::ContinueNoReview)
    }

    fn confirm_operation(
        &mut self,
        _operation: &StackOperation,
        _review: &OperationReview,
    ) -> Result<ConfirmOperationAnswer> {
        Ok(ConfirmOperationAnswer::Yes)
    }
}

/// Auto-decline callback (cancels the plan)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm_plan(&mut self, _plan: &ExecutionPlan) -> Result<ConfirmPlanAnswer> {
        Ok(ConfirmPlanAnswer::Cancel)
    }

    fn confirm_operation(
        &mut self,
        _operation: &StackOperation,
        _review: &OperationReview,
    ) -> Result<ConfirmOperationAnswer> {
        Ok(ConfirmOperationAnswer::No)
    }
}
