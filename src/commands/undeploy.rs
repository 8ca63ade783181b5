use anyhow::Result;
use stacks::{CommandStatus, PlanKind};

use super::deploy::run_plan;
use crate::Context;
use crate::cli::OperationArgs;

pub fn run(ctx: &Context, args: &OperationArgs) -> Result<CommandStatus> {
    run_plan(ctx, args, PlanKind::Undeploy, false)
}
