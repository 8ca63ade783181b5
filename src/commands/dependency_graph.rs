use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use stacks::{CommandStatus, Stack, sort_stacks_for_deploy};
use std::sync::Arc;

use super::{Project, Scope, print_structured};
use crate::Context;
use crate::cli::InspectArgs;
use crate::ui;

/// A stack and its direct edges
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GraphNode {
    pub path: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

/// Nodes in deploy order
pub fn graph_nodes(stacks: &[Arc<Stack>]) -> Vec<GraphNode> {
    sort_stacks_for_deploy(stacks)
        .iter()
        .map(|stack| GraphNode {
            path: stack.path.clone(),
            dependencies: stack.dependencies.clone(),
            dependents: stack.dependents.clone(),
        })
        .collect()
}

pub fn run(ctx: &Context, args: &InspectArgs) -> Result<CommandStatus> {
    let project = Project::load(ctx)?;
    let resolved = project.resolve(&args.command_path, Scope::Dependents, &args.common)?;

    let stacks: Vec<Arc<Stack>> = resolved
        .ctx
        .stacks_within(&args.command_path)
        .into_iter()
        .cloned()
        .collect();
    let nodes = graph_nodes(&stacks);

    if print_structured(args.common.output, &nodes)? {
        return Ok(CommandStatus::Success);
    }

    ui::header(&format!("Dependency graph of {}", args.command_path));
    if nodes.is_empty() {
        ui::info("No stacks found");
    }
    for node in &nodes {
        println!("  {}", node.path.bold());
        for dependency in &node.dependencies {
            println!("    {} {dependency}", "depends on".dimmed());
        }
        for dependent in &node.dependents {
            println!("    {} {dependent}", "needed by ".dimmed());
        }
    }
    Ok(CommandStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacks::ModuleInformation;

    fn stack(name: &str, dependencies: &[&str], dependents: &[&str]) -> Arc<Stack> {
        let mut stack = Stack::new(
            format!("/{name}.yml/eu-west-1"),
            name,
            "eu-west-1",
            "/",
            ModuleInformation::root(),
        );
        stack.dependencies = dependencies.iter().map(|d| format!("/{d}.yml/eu-west-1")).collect();
        stack.dependents = dependents.iter().map(|d| format!("/{d}.yml/eu-west-1")).collect();
        Arc::new(stack)
    }

    #[test]
    fn test_nodes_follow_deploy_order() {
        let stacks = vec![
            stack("app", &["db", "vpc"], &[]),
            stack("db", &["vpc"], &["app"]),
            stack("vpc", &[], &["app", "db"]),
        ];

        let nodes = graph_nodes(&stacks);
        let order: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(
            order,
            vec!["/vpc.yml/eu-west-1", "/db.yml/eu-west-1", "/app.yml/eu-west-1"]
        );
        assert_eq!(nodes[0].dependents.len(), 2);
        assert_eq!(nodes[2].dependencies, vec!["/db.yml/eu-west-1", "/vpc.yml/eu-west-1"]);
    }
}
