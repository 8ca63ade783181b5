//! Deploy command and the plan execution shared with undeploy

use anyhow::Result;
use colored::Colorize;
use stacks::{
    CommandOutput, CommandStatus, ExecuteOptions, ExecutionPlan, PlanKind, StackClient,
    StackOperationType, StackOperator, build_deploy_plan, build_undeploy_plan, execute_plan,
    path::ROOT_STACK_GROUP_PATH,
};
use std::sync::Arc;

use super::{Project, Scope, print_structured};
use crate::Context;
use crate::cli::{DeployArgs, OperationArgs, OutputFormat};
use crate::prompt::{TerminalConfirm, TerminalProgress, progress_bar};
use crate::ui;

pub fn run(ctx: &Context, args: &DeployArgs) -> Result<CommandStatus> {
    run_plan(ctx, &args.operation, PlanKind::Deploy, args.expect_no_changes)
}

/// Build a plan of the given kind, confirm it and execute it
pub(super) fn run_plan(
    ctx: &Context,
    args: &OperationArgs,
    kind: PlanKind,
    expect_no_changes: bool,
) -> Result<CommandStatus> {
    let project = Project::load(ctx)?;
    let scope = match kind {
        PlanKind::Deploy => Scope::Dependencies,
        PlanKind::Undeploy => Scope::Dependents,
    };

    let bar = progress_bar();
    let mut confirm = TerminalConfirm::new(bar.clone());

    // Interactive choice needs the whole tree, which also covers the chosen path
    let (resolved, command_path) = if args.interactive {
        let resolved = project.resolve(ROOT_STACK_GROUP_PATH, Scope::Dependents, &args.common)?;
        let command_path = confirm.choose_command_path(&resolved.ctx)?;
        (resolved, command_path)
    } else {
        let resolved = project.resolve(&args.command_path, scope, &args.common)?;
        (resolved, args.command_path.clone())
    };
    let client: Arc<dyn StackClient> = Arc::new(project.client()?);

    let concurrency = args
        .concurrency
        .map_or(project.config.concurrent_stacks, usize::from);

    let plan = match kind {
        PlanKind::Deploy => build_deploy_plan(
            &resolved.ctx,
            &command_path,
            args.ignore_dependencies,
            client.as_ref(),
            concurrency,
        )?,
        PlanKind::Undeploy => build_undeploy_plan(
            &resolved.ctx,
            &command_path,
            args.ignore_dependencies,
            client.as_ref(),
            concurrency,
        )?,
    };

    let format = args.common.output;
    if format == OutputFormat::Text && !ctx.quiet {
        print_plan(&plan);
    }

    let options = ExecuteOptions {
        concurrent_stacks: concurrency,
        auto_confirm: args.yes || expect_no_changes,
    };
    let runner = Arc::new(
        StackOperator::new(Arc::clone(&resolved.ctx), client, Arc::clone(&resolved.hooks))
            .with_expect_no_changes(expect_no_changes),
    );

    let mut progress = TerminalProgress::new(bar, ctx.quiet || format != OutputFormat::Text);
    let output = execute_plan(&plan, &options, runner, &mut confirm, &mut progress)?;

    if !print_structured(format, &output)? {
        print_output(&output, ctx.quiet);
    }
    Ok(output.status)
}

// ============================================================================
// Display
// ============================================================================

fn print_plan(plan: &ExecutionPlan) {
    let title = match plan.kind {
        PlanKind::Deploy => "Stacks to deploy",
        PlanKind::Undeploy => "Stacks to undeploy",
    };
    ui::header(title);

    if plan.is_empty() {
        ui::info("Nothing to do");
        return;
    }

    for operation in &plan.operations {
        println!(
            "  {} {} {}",
            ui::operation_symbol(operation.operation_type),
            operation.path(),
            format!("({})", operation.stack.name).dimmed()
        );
        if !operation.dependencies.is_empty() {
            ui::dim(&format!("    after: {}", operation.dependencies.join(", ")));
        }
    }

    println!();
    let counts = [
        StackOperationType::Create,
        StackOperationType::Update,
        StackOperationType::Recreate,
        StackOperationType::Delete,
        StackOperationType::Skip,
    ]
    .into_iter()
    .map(|t| (t, plan.count(t)))
    .filter(|(_, count)| *count > 0)
    .map(|(t, count)| format!("{count} {}", t.as_str().to_lowercase()))
    .collect::<Vec<_>>()
    .join(", ");
    ui::kv("Command path", &plan.command_path);
    ui::kv("Operations", &counts);
}

/// Results table, provider events of failed stacks and the final status
pub(super) fn print_output(output: &CommandOutput, quiet: bool) {
    if !quiet && !output.results.is_empty() {
        ui::header("Results");
        let width = output
            .results
            .iter()
            .map(|r| r.stack_path.chars().count())
            .max()
            .unwrap_or(0);

        for result in &output.results {
            println!(
                "  {:<width$}  {:<9}  {}  {:<27}  {}",
                result.stack_path,
                result.operation_type.as_str(),
                ui::status(result.status, 9),
                result.reason.as_str(),
                ui::format_duration(result.elapsed).dimmed(),
            );
        }
    }

    for result in output.results.iter().filter(|r| r.status == CommandStatus::Failed) {
        ui::section(&format!("{} ({})", result.stack_path, result.stack_name));
        ui::kv("Reason", result.reason.as_str());
        ui::kv("Message", &result.message);
        for event in &result.events {
            ui::dim(&format!(
                "{}  {}  {}{}",
                event.timestamp.format("%H:%M:%S"),
                event.logical_id,
                event.status,
                event
                    .reason
                    .as_deref()
                    .map(|r| format!("  {r}"))
                    .unwrap_or_default()
            ));
        }
    }

    println!();
    let elapsed = ui::format_duration(output.elapsed);
    match output.status {
        CommandStatus::Success => ui::success(&format!("{} in {elapsed}", output.message)),
        CommandStatus::Cancelled => ui::warn(&format!("{} after {elapsed}", output.message)),
        _ => ui::error(&format!(
            "{} with {} failed and {} cancelled stacks in {elapsed}",
            output.message,
            output.count(CommandStatus::Failed),
            output.count(CommandStatus::Cancelled)
        )),
    }
}
