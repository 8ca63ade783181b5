//! Terminal confirmation and progress reporting for plan execution

use colored::Colorize;
use dialoguer::Select;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use similar::{ChangeTag, TextDiff};
use stacks::{
    CommandStatus, ConfirmCallback, ConfirmOperationAnswer, ConfirmPlanAnswer, ExecutionPlan,
    OperationReview, PlanKind, ProgressCallback, StackOperation, StackResult, StacksContext,
};

use crate::ui;

fn prompt_error(err: dialoguer::Error) -> stacks::Error {
    stacks::Error::Other(format!("Failed to read confirmation: {err}"))
}

// ============================================================================
// Confirmation
// ============================================================================

/// Asks for confirmation with interactive prompts
///
/// Shares the progress bar so prompts are drawn while it is suspended.
pub struct TerminalConfirm {
    bar: ProgressBar,
}

impl TerminalConfirm {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }

    /// Pick a stack group or stack configuration as the command path
    pub fn choose_command_path(&self, ctx: &StacksContext) -> stacks::Result<String> {
        let choices = command_path_choices(ctx)?;
        let items: Vec<String> = choices
            .iter()
            .map(|(depth, path)| format!("{}{path}", "  ".repeat(*depth)))
            .collect();

        let choice = self.bar.suspend(|| {
            Select::new()
                .with_prompt("Choose command path")
                .items(&items)
                .default(0)
                .interact()
        });

        let index = choice.map_err(prompt_error)?;
        Ok(choices
            .into_iter()
            .nth(index)
            .map(|(_, path)| path)
            .unwrap_or_else(|| stacks::path::ROOT_STACK_GROUP_PATH.to_string()))
    }
}

/// Stack groups and stack configurations in tree order, with their depth
pub fn command_path_choices(ctx: &StacksContext) -> stacks::Result<Vec<(usize, String)>> {
    fn walk(ctx: &StacksContext, path: &str, depth: usize, out: &mut Vec<(usize, String)>) {
        let Some(group) = ctx.stack_group(path) else {
            return;
        };
        out.push((depth, group.path.clone()));

        let mut configs: Vec<String> = group
            .stacks
            .iter()
            .filter_map(|p| ctx.stack(p))
            .map(|stack| stack.config_path())
            .collect();
        configs.dedup();
        out.extend(configs.into_iter().map(|config| (depth + 1, config)));

        for child in &group.children {
            walk(ctx, child, depth + 1, out);
        }
    }

    let root = ctx.root_stack_group()?;
    let mut out = Vec::new();
    walk(ctx, &root.path, 0, &mut out);
    Ok(out)
}

impl ConfirmCallback for TerminalConfirm {
    fn confirm_plan(&mut self, plan: &ExecutionPlan) -> stacks::Result<ConfirmPlanAnswer> {
        let verb = match plan.kind {
            PlanKind::Deploy => "deploy",
            PlanKind::Undeploy => "undeploy",
        };
        let items = [
            "continue, but let me review changes to each stack".to_string(),
            format!("continue, {verb} all stacks without reviewing changes"),
            "cancel".to_string(),
        ];

        let choice = self.bar.suspend(|| {
            Select::new()
                .with_prompt("How do you want to continue?")
                .items(&items)
                .default(0)
                .interact()
        });

        Ok(match choice.map_err(prompt_error)? {
            0 => ConfirmPlanAnswer::ContinueWithReview,
            1 => ConfirmPlanAnswer::ContinueNoReview,
            _ => ConfirmPlanAnswer::Cancel,
        })
    }

    fn confirm_operation(
        &mut self,
        operation: &StackOperation,
        review: &OperationReview,
    ) -> stacks::Result<ConfirmOperationAnswer> {
        let choice = self.bar.suspend(|| {
            ui::section(&format!(
                "{} {} ({})",
                operation.operation_type,
                operation.path(),
                operation.stack.name
            ));
            print_review(review);

            Select::new()
                .with_prompt(format!("Continue to {}?", operation.operation_type))
                .items(&["yes", "no", "yes to all remaining"])
                .default(0)
                .interact()
        });

        Ok(match choice.map_err(prompt_error)? {
            0 => ConfirmOperationAnswer::Yes,
            2 => ConfirmOperationAnswer::YesToAll,
            _ => ConfirmOperationAnswer::No,
        })
    }
}

fn print_review(review: &OperationReview) {
    match (&review.current_template, &review.desired_template) {
        (Some(current), Some(desired)) => match template_diff(current, desired) {
            Some(lines) => {
                for line in lines {
                    match line.chars().next() {
                        Some('-') => println!("    {}", line.red()),
                        Some('+') => println!("    {}", line.green()),
                        _ => println!("    {line}"),
                    }
                }
            }
            None => ui::dim("(template is unchanged)"),
        },
        (None, Some(desired)) => {
            ui::dim(&format!("new template, {} lines", desired.lines().count()));
        }
        (Some(_), None) => ui::dim("the deployed stack will be removed"),
        (None, None) => {}
    }
}

/// Changed lines between two templates, `None` when they are equal
pub fn template_diff(current: &str, desired: &str) -> Option<Vec<String>> {
    let diff = TextDiff::from_lines(current, desired);
    let lines: Vec<String> = diff
        .iter_all_changes()
        .filter_map(|change| {
            let text = change.to_string_lossy();
            let text = text.trim_end_matches('\n');
            match change.tag() {
                ChangeTag::Delete => Some(format!("- {text}")),
                ChangeTag::Insert => Some(format!("+ {text}")),
                ChangeTag::Equal => None,
            }
        })
        .collect();

    if lines.is_empty() { None } else { Some(lines) }
}

// ============================================================================
// Progress
// ============================================================================

/// Progress bar over the operations of a plan
pub struct TerminalProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl TerminalProgress {
    pub fn new(bar: ProgressBar, quiet: bool) -> Self {
        Self { bar, quiet }
    }
}

/// A bar that stays hidden until the plan starts
pub fn progress_bar() -> ProgressBar {
    ProgressBar::hidden()
}

impl ProgressCallback for TerminalProgress {
    fn on_plan_start(&mut self, count: usize) {
        self.bar.set_length(count as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            self.bar.set_style(style.progress_chars("=>-"));
        }
        if !self.quiet {
            self.bar.set_draw_target(ProgressDrawTarget::stderr());
        }
    }

    fn on_operation_start(&mut self, operation: &StackOperation) {
        self.bar.set_message(ui::truncate_path(operation.path(), 40));
    }

    fn on_operation_complete(&mut self, result: &StackResult) {
        self.bar.inc(1);
        if self.quiet {
            return;
        }
        let symbol = match result.status {
            CommandStatus::Success => "✓".green(),
            CommandStatus::Failed => "✗".red(),
            CommandStatus::Cancelled => "⚠".yellow(),
            CommandStatus::Skipped => "·".dimmed(),
        };
        self.bar.println(format!(
            "  {symbol} {} {} {}",
            result.stack_path,
            ui::status(result.status, 0),
            ui::format_duration(result.elapsed).dimmed()
        ));
    }

    fn on_plan_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use stacks::{
        BuildInput, EntityConfig, MemoryConfigSource, StackConfig, StackGroupConfig,
        build_stacks_context,
    };
    use std::sync::Arc;

    #[test]
    fn test_command_path_choices_follow_group_tree() {
        let source = MemoryConfigSource::new()
            .with_stack_group(
                "/",
                StackGroupConfig {
                    common: EntityConfig {
                        regions: vec!["eu-west-1".to_string(), "eu-north-1".to_string()],
                        ..EntityConfig::default()
                    },
                },
            )
            .with_stack("/dev/app.yml", StackConfig::default())
            .with_stack("/dev/vpc.yml", StackConfig::default())
            .with_stack("/shared/logs.yml", StackConfig::default());
        let ctx = build_stacks_context(&BuildInput::new(Arc::new(source))).unwrap();

        let choices = command_path_choices(&ctx).unwrap();
        let expected = [
            (0, "/"),
            (1, "/dev"),
            (2, "/dev/app.yml"),
            (2, "/dev/vpc.yml"),
            (1, "/shared"),
            (2, "/shared/logs.yml"),
        ];
        assert_eq!(
            choices,
            expected.map(|(d, p)| (d, p.to_string())).to_vec()
        );
    }

    #[test]
    fn test_template_diff_lists_changed_lines() {
        let current = "Resources:\n  Bucket: old\nOutputs: {}\n";
        let desired = "Resources:\n  Bucket: new\nOutputs: {}\n";
        let lines = template_diff(current, desired).unwrap();
        assert_eq!(lines, vec!["-   Bucket: old", "+   Bucket: new"]);
    }

    #[test]
    fn test_template_diff_equal() {
        assert!(template_diff("a\nb\n", "a\nb\n").is_none());
    }

    #[test]
    fn test_progress_counts_operations() {
        let bar = progress_bar();
        let mut progress = TerminalProgress::new(bar.clone(), true);
        progress.on_plan_start(3);
        assert_eq!(bar.length(), Some(3));
        progress.on_plan_complete();
        assert!(bar.is_finished());
    }
}
