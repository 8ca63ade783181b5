//! Deploy and undeploy planning
//!
//! A plan is the ordered list of operations the executor runs. Remote
//! status is fetched for every selected stack to decide between CREATE,
//! UPDATE and RECREATE (or DELETE and SKIP when undeploying).

use crate::client::{RemoteStackSummary, StackClient};
use crate::error::{Error, Result};
use crate::graph::{
    collect_all_dependencies, collect_all_dependents, sort_stacks_for_deploy,
    sort_stacks_for_undeploy,
};
use crate::model::{Stack, StacksContext};
use crate::path::{CommandPath, StackPath};
use crate::types::StackOperationType;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One planned operation on one stack
#[derive(Debug, Clone, Serialize)]
pub struct StackOperation {
    pub stack: Arc<Stack>,
    pub operation_type: StackOperationType,
    /// Remote state when the plan was built
    pub current_stack: Option<RemoteStackSummary>,
    /// Operations in the same plan that must finish first
    pub dependencies: Vec<StackPath>,
}

impl StackOperation {
    pub fn path(&self) -> &str {
        &self.stack.path
    }

    pub fn stack_existed(&self) -> bool {
        self.current_stack.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Deploy,
    Undeploy,
}

/// Ordered operations for one command
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub kind: PlanKind,
    pub command_path: CommandPath,
    /// Operations in execution order
    pub operations: Vec<StackOperation>,
    pub ignore_dependencies: bool,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operation(&self, path: &str) -> Option<&StackOperation> {
        self.operations.iter().find(|o| o.path() == path)
    }

    /// Count operations of the given type
    pub fn count(&self, operation_type: StackOperationType) -> usize {
        self.operations
            .iter()
            .filter(|o| o.operation_type == operation_type)
            .count()
    }

    pub fn validate(&self) -> Result<()> {
        validate_deploy_plan(&self.operations, self.ignore_dependencies)
    }
}

fn check_ignore_dependencies(paths: Vec<String>, ignore_dependencies: bool) -> Result<()> {
    if ignore_dependencies && paths.len() > 1 {
        return Err(Error::IncompatibleIgnoreDependencies { stacks: paths });
    }
    Ok(())
}

/// Ignoring dependencies is only sound for a single operation
pub fn validate_deploy_plan(operations: &[StackOperation], ignore_dependencies: bool) -> Result<()> {
    check_ignore_dependencies(
        operations.iter().map(|o| o.path().to_string()).collect(),
        ignore_dependencies,
    )
}

/// Decide how to deploy a stack given its remote state
pub fn classify(current: Option<&RemoteStackSummary>) -> StackOperationType {
    match current {
        None => StackOperationType::Create,
        Some(summary) if summary.status.is_placeholder() => StackOperationType::Create,
        Some(summary) if summary.status.requires_recreate() => StackOperationType::Recreate,
        Some(_) => StackOperationType::Update,
    }
}

/// Fetch remote status of every stack on a pool of `concurrency` threads
fn fetch_statuses(
    stacks: &[Arc<Stack>],
    client: &dyn StackClient,
    concurrency: usize,
) -> Result<Vec<Option<RemoteStackSummary>>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
        .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

    pool.install(|| {
        stacks
            .par_iter()
            .map(|stack| client.get_current_status(stack))
            .collect()
    })
}

/// Selected stacks plus what they pull in, keyed by path
fn select<F>(
    ctx: &StacksContext,
    command_path: &str,
    ignore_dependencies: bool,
    include: F,
    related: fn(&str, &StacksContext) -> Vec<StackPath>,
) -> Vec<Arc<Stack>>
where
    F: Fn(&Stack) -> bool,
{
    let mut selected: BTreeMap<StackPath, Arc<Stack>> = ctx
        .stacks_within(command_path)
        .into_iter()
        .filter(|s| include(s))
        .map(|s| (s.path.clone(), Arc::clone(s)))
        .collect();

    if !ignore_dependencies {
        let roots: Vec<StackPath> = selected.keys().cloned().collect();
        for root in roots {
            for path in related(&root, ctx) {
                if let Some(stack) = ctx.stack(&path).filter(|s| !s.is_ignored()) {
                    selected
                        .entry(path)
                        .or_insert_with(|| Arc::clone(stack));
                }
            }
        }
    }

    selected.into_values().collect()
}

/// Keep only edges to operations of the same plan
fn plan_edges(edges: &[StackPath], planned: &BTreeSet<&str>) -> Vec<StackPath> {
    edges
        .iter()
        .filter(|p| planned.contains(p.as_str()))
        .cloned()
        .collect()
}

/// Build the plan for deploying the stacks within the command path
///
/// Ignored and obsolete stacks are left out. Unless dependencies are
/// ignored, every transitive dependency is deployed too. The
/// `ignore_dependencies` check happens before the remote provider is
/// contacted.
///
/// # Arguments
/// * `ctx` - Resolved stacks
/// * `command_path` - Path selecting the stacks
/// * `ignore_dependencies` - Deploy only the selected stack
/// * `client` - Remote provider used to fetch current status
/// * `concurrency` - Number of status requests in flight at once
pub fn build_deploy_plan(
    ctx: &StacksContext,
    command_path: &str,
    ignore_dependencies: bool,
    client: &dyn StackClient,
    concurrency: usize,
) -> Result<ExecutionPlan> {
    let selected = select(
        ctx,
        command_path,
        ignore_dependencies,
        |s| !s.is_ignored() && !s.is_obsolete(),
        collect_all_dependencies,
    );
    check_ignore_dependencies(
        selected.iter().map(|s| s.path.clone()).collect(),
        ignore_dependencies,
    )?;

    let sorted = sort_stacks_for_deploy(&selected);
    let statuses = fetch_statuses(&sorted, client, concurrency)?;
    let planned: BTreeSet<&str> = sorted.iter().map(|s| s.path.as_str()).collect();

    let operations: Vec<StackOperation> = sorted
        .iter()
        .zip(statuses)
        .map(|(stack, current)| StackOperation {
            operation_type: classify(current.as_ref()),
            dependencies: plan_edges(&stack.dependencies, &planned),
            stack: Arc::clone(stack),
            current_stack: current,
        })
        .collect();

    log::debug!(
        "Deploy plan for {command_path}: {} operation(s)",
        operations.len()
    );

    Ok(ExecutionPlan {
        kind: PlanKind::Deploy,
        command_path: command_path.to_string(),
        operations,
        ignore_dependencies,
    })
}

/// Build the plan for removing the stacks within the command path
///
/// Obsolete stacks are included. Unless dependencies are ignored, every
/// transitive dependent is removed first. Stacks that do not exist
/// remotely get a SKIP operation.
pub fn build_undeploy_plan(
    ctx: &StacksContext,
    command_path: &str,
    ignore_dependencies: bool,
    client: &dyn StackClient,
    concurrency: usize,
) -> Result<ExecutionPlan> {
    let selected = select(
        ctx,
        command_path,
        ignore_dependencies,
        |s| !s.is_ignored(),
        collect_all_dependents,
    );
    check_ignore_dependencies(
        selected.iter().map(|s| s.path.clone()).collect(),
        ignore_dependencies,
    )?;

    let sorted = sort_stacks_for_undeploy(&selected);
    let statuses = fetch_statuses(&sorted, client, concurrency)?;
    let planned: BTreeSet<&str> = sorted.iter().map(|s| s.path.as_str()).collect();

    let operations: Vec<StackOperation> = sorted
        .iter()
        .zip(statuses)
        .map(|(stack, current)| StackOperation {
            operation_type: if current.is_some() {
                StackOperationType::Delete
            } else {
                StackOperationType::Skip
            },
            dependencies: plan_edges(&stack.dependents, &planned),
            stack: Arc::clone(stack),
            current_stack: current,
        })
        .collect();

    log::debug!(
        "Undeploy plan for {command_path}: {} operation(s)",
        operations.len()
    );

    Ok(ExecutionPlan {
        kind: PlanKind::Undeploy,
        command_path: command_path.to_string(),
        operations,
        ignore_dependencies,
    })
}
