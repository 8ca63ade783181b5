//! Execution engine - runs plans with bounded concurrency and cancellation
//!
//! Operations move from pending to running to a terminal result. In
//! parallel mode a rayon pool of `concurrent_stacks` threads bounds how
//! many run at once, while the calling thread acts as scheduler: it
//! submits operations whose dependencies have all succeeded, collects
//! completions over a channel and resolves everything that can no longer
//! run. Once any operation fails or is cancelled, the [`ExecutionState`]
//! latch is set and nothing pending is started anymore.

use crate::context::{
    ConfirmCallback, ConfirmOperationAnswer, ConfirmPlanAnswer, ProgressCallback,
};
use crate::error::{Error, Result};
use crate::operation::{cancelled_result, operation_result, OperationRunner};
use crate::planner::{ExecutionPlan, StackOperation};
use crate::types::{CommandOutput, CommandStatus, ExecuteOptions, ResultReason, StackResult};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

/// Shared state of one plan execution
#[derive(Debug, Default)]
pub struct ExecutionState {
    cancelled: AtomicBool,
    auto_confirm: bool,
}

impl ExecutionState {
    pub fn new(auto_confirm: bool) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            auto_confirm,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Set the latch; it is never cleared
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_auto_confirm(&self) -> bool {
        self.auto_confirm
    }
}

/// Results collected so far, keyed by stack path
type Results = BTreeMap<String, StackResult>;

fn record<P: ProgressCallback>(results: &mut Results, result: StackResult, progress: &mut P) {
    progress.on_operation_complete(&result);
    results.insert(result.stack_path.clone(), result);
}

/// Why a pending operation can no longer run, if it can't
fn blocked_reason(
    operation: &StackOperation,
    results: &Results,
    state: &ExecutionState,
) -> Option<ResultReason> {
    let dependency_failed = operation
        .dependencies
        .iter()
        .any(|d| results.get(d).is_some_and(StackResult::is_failure));

    if dependency_failed {
        Some(ResultReason::DependenciesFailed)
    } else if state.is_cancelled() {
        Some(ResultReason::Cancelled)
    } else {
        None
    }
}

fn run_guarded(runner: &dyn OperationRunner, operation: &StackOperation) -> StackResult {
    panic::catch_unwind(AssertUnwindSafe(|| runner.run(operation))).unwrap_or_else(|_| {
        log::error!("Operation on stack {} panicked", operation.path());
        operation_result(
            operation,
            CommandStatus::Failed,
            ResultReason::ProviderError,
            "Operation panicked",
            Vec::new(),
            Duration::ZERO,
        )
    })
}

/// Execute a plan with the given options and callbacks
///
/// # Type Parameters
/// * `C` - Confirm callback type
/// * `P` - Progress callback type
///
/// # Arguments
/// * `plan` - The execution plan to run
/// * `options` - Concurrency limit and confirmation behaviour
/// * `runner` - Performs each operation
/// * `confirm` - Confirmation callback, not consulted with `auto_confirm`
/// * `progress` - Progress callback
///
/// # Returns
/// One result per operation in plan order. Failed operations are
/// reported in the output; only an invalid plan or a broken callback
/// make this return an error.
pub fn execute_plan<C, P>(
    plan: &ExecutionPlan,
    options: &ExecuteOptions,
    runner: Arc<dyn OperationRunner>,
    confirm: &mut C,
    progress: &mut P,
) -> Result<CommandOutput>
where
    C: ConfirmCallback,
    P: ProgressCallback,
{
    let started = Instant::now();
    plan.validate()?;

    let state = Arc::new(ExecutionState::new(options.auto_confirm));
    let answer = if state.is_auto_confirm() {
        ConfirmPlanAnswer::ContinueNoReview
    } else {
        confirm.confirm_plan(plan)?
    };

    if answer == ConfirmPlanAnswer::Cancel {
        log::info!("Plan for {} cancelled", plan.command_path);
        return Ok(CommandOutput::cancelled(started.elapsed()));
    }

    progress.on_plan_start(plan.len());
    let mut results = Results::new();

    match answer {
        ConfirmPlanAnswer::ContinueWithReview => {
            run_sequential(plan, options, &runner, &state, &mut results, confirm, progress)?;
        }
        _ => run_parallel(
            &plan.operations,
            options.concurrent_stacks,
            &runner,
            &state,
            &mut results,
            progress,
        )?,
    }

    progress.on_plan_complete();

    let ordered = plan
        .operations
        .iter()
        .filter_map(|o| results.remove(o.path()))
        .collect();
    Ok(CommandOutput::from_results(ordered, started.elapsed()))
}

/// One operation at a time in plan order, confirming each
fn run_sequential<C, P>(
    plan: &ExecutionPlan,
    options: &ExecuteOptions,
    runner: &Arc<dyn OperationRunner>,
    state: &Arc<ExecutionState>,
    results: &mut Results,
    confirm: &mut C,
    progress: &mut P,
) -> Result<()>
where
    C: ConfirmCallback,
    P: ProgressCallback,
{
    for (index, operation) in plan.operations.iter().enumerate() {
        if let Some(reason) = blocked_reason(operation, results, state) {
            record(results, cancelled_result(operation, reason), progress);
            continue;
        }

        let review = runner.review(operation);
        match confirm.confirm_operation(operation, &review)? {
            ConfirmOperationAnswer::No => {
                state.cancel();
                record(
                    results,
                    cancelled_result(operation, ResultReason::Cancelled),
                    progress,
                );
            }
            ConfirmOperationAnswer::Yes => {
                progress.on_operation_start(operation);
                let result = run_guarded(runner.as_ref(), operation);
                if result.is_failure() {
                    state.cancel();
                }
                record(results, result, progress);
            }
            ConfirmOperationAnswer::YesToAll => {
                log::debug!("Continuing without review from stack {}", operation.path());
                return run_parallel(
                    &plan.operations[index..],
                    options.concurrent_stacks,
                    runner,
                    state,
                    results,
                    progress,
                );
            }
        }
    }
    Ok(())
}

/// Schedule operations on a bounded pool
///
/// `results` may already hold results of earlier operations, which count
/// as resolved dependencies.
fn run_parallel<P: ProgressCallback>(
    operations: &[StackOperation],
    concurrency: usize,
    runner: &Arc<dyn OperationRunner>,
    state: &Arc<ExecutionState>,
    results: &mut Results,
    progress: &mut P,
) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .thread_name(|i| format!("stack-worker-{i}"))
        .build()
        .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

    let (sender, receiver) = mpsc::channel::<StackResult>();
    let mut pending: Vec<&StackOperation> = operations.iter().collect();
    let mut running = 0usize;

    loop {
        let mut waiting = Vec::with_capacity(pending.len());
        for operation in pending {
            if let Some(reason) = blocked_reason(operation, results, state) {
                record(results, cancelled_result(operation, reason), progress);
                continue;
            }

            let ready = operation
                .dependencies
                .iter()
                .all(|d| results.contains_key(d));
            if !ready {
                waiting.push(operation);
                continue;
            }

            progress.on_operation_start(operation);
            running += 1;

            let (sender, runner, state) = (sender.clone(), Arc::clone(runner), Arc::clone(state));
            let operation = operation.clone();
            pool.spawn(move || {
                let result = if state.is_cancelled() {
                    cancelled_result(&operation, ResultReason::Cancelled)
                } else {
                    run_guarded(runner.as_ref(), &operation)
                };
                // Latch before reporting so queued jobs see it when they start
                if result.is_failure() {
                    state.cancel();
                }
                // The scheduler only stops listening after every submitted operation reported.
                let _ = sender.send(result);
            });
        }
        pending = waiting;

        if running == 0 {
            for operation in pending.drain(..) {
                log::warn!("Stack {} has unresolvable dependencies", operation.path());
                record(
                    results,
                    cancelled_result(operation, ResultReason::DependenciesFailed),
                    progress,
                );
            }
            break;
        }

        let result = receiver
            .recv()
            .map_err(|e| Error::Other(format!("Worker channel closed: {e}")))?;
        running -= 1;
        if result.is_failure() {
            state.cancel();
        }
        record(results, result, progress);
    }

    Ok(())
}

/// Execute without confirmation or progress reporting
pub fn execute_simple(
    plan: &ExecutionPlan,
    options: &ExecuteOptions,
    runner: Arc<dyn OperationRunner>,
) -> Result<CommandOutput> {
    use crate::context::{AutoConfirm, NoProgress};

    execute_plan(plan, options, runner, &mut AutoConfirm, &mut NoProgress)
}
