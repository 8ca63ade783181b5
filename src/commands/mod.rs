pub mod dependency_graph;
pub mod deploy;
pub mod list;
pub mod undeploy;

use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use stacks::{
    BuildInput, HookRegistry, InheritedProperties, StacksContext, build_stacks_context,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Context;
use crate::cli::{CommonArgs, OutputFormat};
use crate::config::ProjectConfig;
use crate::source::FileSystemConfigSource;
use crate::state::LocalStackClient;

/// Project directory and its settings
pub struct Project {
    pub dir: PathBuf,
    pub config: ProjectConfig,
}

/// Which stacks outside the command path a command needs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Stacks the command path depends on
    Dependencies,
    /// Also every stack depending on the command path
    Dependents,
}

/// Resolved stacks and the registries they were built with
pub struct Resolved {
    pub ctx: Arc<StacksContext>,
    pub hooks: Arc<HookRegistry>,
}

impl Project {
    pub fn load(ctx: &Context) -> Result<Self> {
        let config = ProjectConfig::load(&ctx.dir)?;
        Ok(Self {
            dir: ctx.dir.clone(),
            config,
        })
    }

    pub fn source(&self) -> Result<FileSystemConfigSource> {
        let config = &self.config;
        Ok(FileSystemConfigSource::new(
            config.resolve(&self.dir, &config.stacks_dir)?,
            config.resolve(&self.dir, &config.templates_dir)?,
            config.resolve(&self.dir, &config.modules_dir)?,
        )
        .with_regions(config.regions.clone()))
    }

    pub fn client(&self) -> Result<LocalStackClient> {
        let path = self.config.state_path(&self.dir)?;
        Ok(LocalStackClient::open(&path)?)
    }

    /// Resolve every stack needed for the command path
    pub fn resolve(&self, command_path: &str, scope: Scope, common: &CommonArgs) -> Result<Resolved> {
        let defaults = InheritedProperties {
            project: self.config.project.clone(),
            ..InheritedProperties::default()
        };
        let mut input = BuildInput::new(Arc::new(self.source()?))
            .with_command_path(command_path)
            .with_defaults(defaults)
            .with_variables(self.config.variables(&common.vars)?);
        if scope == Scope::Dependents {
            input = input.with_dependents();
        }

        let ctx = build_stacks_context(&input)?;
        log::info!(
            "Resolved {} stacks for command path {command_path}",
            ctx.stacks().count()
        );
        Ok(Resolved {
            ctx: Arc::new(ctx),
            hooks: Arc::clone(&input.hooks),
        })
    }
}

/// Print a value as JSON or YAML, `false` for text output
pub fn print_structured<T: Serialize>(format: OutputFormat, value: &T) -> Result<bool> {
    match format {
        OutputFormat::Text => Ok(false),
        OutputFormat::Json => {
            let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
            println!("{out}");
            Ok(true)
        }
        OutputFormat::Yaml => {
            let out = serde_yaml::to_string(value).context("Failed to serialize output")?;
            print!("{out}");
            Ok(true)
        }
    }
}
