use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use stacks::{CommandStatus, Stack, StackClient, StackStatus};

use super::{Project, Scope, print_structured};
use crate::Context;
use crate::cli::InspectArgs;
use crate::ui;

/// One row of the stack listing
#[derive(Debug, Serialize)]
pub struct StackListing {
    pub path: String,
    pub name: String,
    pub status: Option<StackStatus>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub ignored: bool,
    pub obsolete: bool,
}

/// Current status of every stack within the command path
pub fn collect(stacks: &[&Stack], client: &dyn StackClient) -> Result<Vec<StackListing>> {
    stacks
        .iter()
        .map(|stack| -> Result<StackListing> {
            let current = client.get_current_status(stack)?;
            Ok(StackListing {
                path: stack.path.clone(),
                name: stack.name.clone(),
                status: current.as_ref().map(|c| c.status),
                created: current.as_ref().map(|c| c.creation_time),
                updated: current.as_ref().and_then(|c| c.last_updated_time),
                ignored: stack.is_ignored(),
                obsolete: stack.is_obsolete(),
            })
        })
        .collect()
}

pub fn run(ctx: &Context, args: &InspectArgs) -> Result<CommandStatus> {
    let project = Project::load(ctx)?;
    let resolved = project.resolve(&args.command_path, Scope::Dependencies, &args.common)?;
    let client = project.client()?;

    let stacks: Vec<&Stack> = resolved
        .ctx
        .stacks_within(&args.command_path)
        .into_iter()
        .map(|s| &**s)
        .collect();
    let listing = collect(&stacks, &client)?;

    if print_structured(args.common.output, &listing)? {
        return Ok(CommandStatus::Success);
    }

    ui::header(&format!("Stacks within {}", args.command_path));
    if listing.is_empty() {
        ui::info("No stacks found");
        return Ok(CommandStatus::Success);
    }

    let width = listing.iter().map(|l| l.path.chars().count()).max().unwrap_or(0);
    for row in &listing {
        let status = match row.status {
            Some(status) => format!("{:<28}", status.as_str()).normal(),
            None => format!("{:<28}", "PENDING").dimmed(),
        };
        let updated = row
            .updated
            .or(row.created)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let mut flags = Vec::new();
        if row.ignored {
            flags.push("ignored");
        }
        if row.obsolete {
            flags.push("obsolete");
        }

        println!(
            "  {:<width$}  {}  {}  {}",
            row.path,
            status,
            updated.dimmed(),
            flags.join(", ").yellow()
        );
    }
    Ok(CommandStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacks::{MemoryStackClient, ModuleInformation, RemoteStackSummary};

    fn stack(path: &str, name: &str) -> Stack {
        Stack::new(path, name, "eu-west-1", "/dev", ModuleInformation::root())
    }

    #[test]
    fn test_collect_statuses() {
        let vpc = stack("/dev/vpc.yml/eu-west-1", "dev-vpc");
        let mut app = stack("/dev/app.yml/eu-west-1", "dev-app");
        app.props.obsolete = true;

        let client = MemoryStackClient::new().with_stack(
            "/dev/vpc.yml/eu-west-1",
            RemoteStackSummary::new("dev-vpc", StackStatus::CreateComplete),
        );

        let listing = collect(&[&vpc, &app], &client).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].status, Some(StackStatus::CreateComplete));
        assert!(listing[0].created.is_some());
        assert!(!listing[0].obsolete);
        assert_eq!(listing[1].status, None);
        assert!(listing[1].obsolete);
        assert_eq!(client.mutating_calls(), Vec::<String>::new());
    }
}
