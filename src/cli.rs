use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::parse_var;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy hierarchies of infrastructure stacks in dependency order", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project directory containing strata.toml
    #[arg(short, long, global = true, default_value = ".", env = "STRATA_DIR")]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or update stacks within the command path and their dependencies
    Deploy(DeployArgs),

    /// Remove stacks within the command path and everything depending on them
    Undeploy(OperationArgs),

    /// List stacks with their current status
    List(InspectArgs),

    /// Show dependencies and dependents of stacks
    DependencyGraph(InspectArgs),
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Args, Debug)]
pub struct OperationArgs {
    /// Command path selecting stacks, e.g. /dev or /dev/vpc.yml/eu-west-1
    #[arg(default_value = "/")]
    pub command_path: String,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum number of stacks processed at once
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Operate on a single stack without its dependencies
    #[arg(long)]
    pub ignore_dependencies: bool,

    /// Choose the command path from the stack group tree
    #[arg(short, long, conflicts_with = "command_path")]
    pub interactive: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub operation: OperationArgs,

    /// Fail every stack that would change instead of deploying it
    #[arg(long)]
    pub expect_no_changes: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Command path selecting stacks
    #[arg(default_value = "/")]
    pub command_path: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Set a variable, overriding strata.toml (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_args() {
        let cli = Cli::try_parse_from([
            "strata",
            "-vv",
            "deploy",
            "/dev",
            "--yes",
            "--concurrency",
            "4",
            "--var",
            "env=dev",
            "--output",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.dir, PathBuf::from("."));
        match cli.command {
            Command::Deploy(DeployArgs { operation: args, expect_no_changes }) => {
                assert_eq!(args.command_path, "/dev");
                assert!(args.yes);
                assert_eq!(args.concurrency, Some(4));
                assert!(!args.ignore_dependencies);
                assert!(!args.interactive);
                assert!(!expect_no_changes);
                assert_eq!(args.common.output, OutputFormat::Json);
                assert_eq!(args.common.vars, vec![("env".to_string(), "dev".to_string())]);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_expect_no_changes_and_interactive() {
        let cli = Cli::try_parse_from(["strata", "deploy", "-i", "--expect-no-changes"]).unwrap();
        match cli.command {
            Command::Deploy(args) => {
                assert!(args.expect_no_changes);
                assert!(args.operation.interactive);
                assert_eq!(args.operation.command_path, "/");
            }
            _ => panic!("expected deploy"),
        }

        let cli = Cli::try_parse_from(["strata", "undeploy", "--interactive"]).unwrap();
        assert!(matches!(cli.command, Command::Undeploy(OperationArgs { interactive: true, .. })));

        // Only deploy checks for changes
        assert!(Cli::try_parse_from(["strata", "undeploy", "--expect-no-changes"]).is_err());
        // A command path and interactive choice exclude each other
        assert!(Cli::try_parse_from(["strata", "deploy", "/dev", "--interactive"]).is_err());
    }

    #[test]
    fn test_defaults_and_global_flags() {
        let cli = Cli::try_parse_from(["strata", "list", "--dir", "/work", "-q"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.dir, PathBuf::from("/work"));
        match cli.command {
            Command::List(args) => {
                assert_eq!(args.command_path, "/");
                assert_eq!(args.common.output, OutputFormat::Text);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["strata", "deploy", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["strata", "deploy", "--var", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["strata", "undeploy", "--output", "xml"]).is_err());
    }

    #[test]
    fn test_dependency_graph_command_name() {
        let cli = Cli::try_parse_from(["strata", "dependency-graph", "/dev/app.yml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::DependencyGraph(InspectArgs { ref command_path, .. }) if command_path == "/dev/app.yml"
        ));
    }
}
