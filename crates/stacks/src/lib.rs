//! # Stacks
//!
//! An orchestration engine for infrastructure stacks organised in a
//! hierarchy of stack groups and reusable modules.
//!
//! This crate turns a configuration tree into resolved stacks, works out
//! what depends on what, plans the remote operations and runs them with
//! bounded concurrency.
//!
//! ## Core Concepts
//!
//! - **Stack group**: A directory-like node whose settings are inherited
//!   by everything below it
//! - **Stack**: A deployable unit in one region, addressed by
//!   `<config file path>/<region>`
//! - **Module**: A configuration tree of its own, mounted at a path and
//!   identified by id and version
//! - **Command path**: The path selecting what a command operates on
//! - **ExecutionPlan**: Ordered CREATE, UPDATE, RECREATE, DELETE or SKIP
//!   operations
//! - **Executor**: Runs a plan with a concurrency limit and cancels
//!   whatever depends on a failure
//!
//! ## Example
//!
//! ```ignore
//! use stacks::{
//!     build_deploy_plan, build_stacks_context, execute_simple, BuildInput,
//!     ExecuteOptions, MemoryConfigSource, MemoryStackClient, StackOperator,
//! };
//! use std::sync::Arc;
//!
//! let source = MemoryConfigSource::new()
//!     .with_stack_group("/", group_config)
//!     .with_stack("/vpc.yml", vpc_config)
//!     .with_template("vpc.yml", "Resources: {}");
//!
//! let input = BuildInput::new(Arc::new(source)).with_command_path("/vpc.yml");
//! let ctx = Arc::new(build_stacks_context(&input)?);
//!
//! let client = Arc::new(MemoryStackClient::new());
//! let plan = build_deploy_plan(&ctx, "/vpc.yml", false, client.as_ref(), 20)?;
//!
//! let runner = Arc::new(StackOperator::new(ctx, client, input.hooks.clone()));
//! let output = execute_simple(&plan, &ExecuteOptions::default(), runner)?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`ConfigSource`]: Provides the configuration tree and templates
//! - [`StackClient`]: Reads and changes remote stacks
//! - [`ResolverProvider`]: Adds parameter resolvers by name
//! - [`HookProvider`]: Adds hook types by name
//! - [`OperationRunner`]: Performs a single planned operation
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on a file
//! layout, a cloud provider or a terminal.

pub mod builder;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hooks;
pub mod memory;
pub mod model;
pub mod operation;
pub mod path;
pub mod planner;
pub mod resolvers;
pub mod types;

// Re-export main types at crate root
pub use client::{
    DeployRequest, OperationResult, RemoteStackSummary, StackClient, StackEvent, StackStatus,
};
pub use config::{
    parse_module_config, parse_stack_config, parse_stack_group_config, validate_command_path,
    ConfigSource, ConfigTree, EntityConfig, ModuleConfig, ModuleConfigNode, ParameterConfig,
    ParameterConfigs, StackConfig, StackConfigNode, StackGroupConfig, StackGroupConfigNode,
    TemplateConfig, Variables,
};
pub use context::{
    AutoConfirm, AutoDecline, ConfirmCallback, ConfirmOperationAnswer, ConfirmPlanAnswer,
    NoProgress, OperationReview, ProgressCallback,
};
pub use error::{Error, ErrorCategory, ObsoleteReference, Result};
pub use executor::{execute_plan, execute_simple, ExecutionState};
pub use graph::{
    build_stacks_context, collect_all_dependencies, collect_all_dependents,
    sort_stacks_for_deploy, sort_stacks_for_undeploy, BuildInput, ProcessStatus,
};
pub use hooks::{Hook, HookConfig, HookProvider, HookRegistry};
pub use memory::{MemoryConfigSource, MemoryStackClient};
pub use model::{InheritedProperties, Module, ModuleInformation, Stack, StackGroup, StacksContext};
pub use operation::{OperationRunner, StackOperator};
pub use planner::{build_deploy_plan, build_undeploy_plan, ExecutionPlan, PlanKind, StackOperation};
pub use resolvers::{Resolver, ResolverProvider, ResolverRegistry};
pub use types::{
    CommandOutput, CommandStatus, ExecuteOptions, ResultReason, StackOperationType, StackResult,
    DEFAULT_CONCURRENT_STACKS,
};
