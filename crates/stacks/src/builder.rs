//! Entity builder
//!
//! Turns configuration nodes into resolved stack groups, modules and
//! stacks. Inheritable attributes flow from the root group down through
//! every child group, module and stack; see
//! [`InheritedProperties::apply`] for the overlay rules.

use crate::config::{
    ModuleConfigNode, ParameterConfig, ParameterConfigs, StackConfigNode, StackGroupConfig,
    StackGroupConfigNode, TemplateConfig, Variables,
};
use crate::error::{Error, Result};
use crate::hooks::HookRegistry;
use crate::model::{
    InheritedProperties, Module, ModuleInformation, ParameterResolver, ParameterSpec, Stack,
    StackGroup,
};
use crate::path::{last_segment, make_module_name, make_stack_name, segments};
use crate::resolvers::ResolverRegistry;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Shared inputs of every build step
pub struct BuildEnv<'a> {
    /// Project level variables
    pub variables: &'a Variables,
    pub resolvers: &'a ResolverRegistry,
    pub hooks: &'a HookRegistry,
}

impl BuildEnv<'_> {
    /// Project variables extended with entity specific ones
    fn variables_with(&self, extra: Value) -> Variables {
        let mut vars = match self.variables {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Value::Object(extra) = extra {
            vars.extend(extra);
        }
        Value::Object(vars)
    }
}

/// Create the root group of a configuration tree
///
/// # Arguments
/// * `path` - Absolute path of the group (`/` or the module path)
/// * `module` - Module the tree belongs to
/// * `parent_path` - Group referencing the module, `None` for the top level
/// * `defaults` - Values the tree inherits
pub fn create_root_stack_group(
    path: &str,
    module: &ModuleInformation,
    parent_path: Option<String>,
    defaults: &InheritedProperties,
) -> StackGroup {
    StackGroup {
        path: path.to_string(),
        name: last_segment(path).to_string(),
        parent_path,
        root: true,
        module: module.clone(),
        props: defaults.clone(),
        children: Vec::new(),
        stacks: Vec::new(),
        modules: Vec::new(),
    }
}

/// Create a child group carrying every inheritable attribute of its parent
pub fn create_stack_group_from_parent(path: &str, name: &str, parent: &StackGroup) -> StackGroup {
    StackGroup {
        path: path.to_string(),
        name: name.to_string(),
        parent_path: Some(parent.path.clone()),
        root: false,
        module: parent.module.clone(),
        props: parent.props.clone(),
        children: Vec::new(),
        stacks: Vec::new(),
        modules: Vec::new(),
    }
}

/// Overlay a group's own configuration on its inherited values
pub fn populate_stack_group(mut group: StackGroup, config: Option<&StackGroupConfig>) -> StackGroup {
    if let Some(config) = config {
        group.props = group.props.apply(&config.common);
    }
    group
}

/// Build a stack group from its node
///
/// `parent` is `None` for the root of a tree, in which case `defaults`
/// and `root_parent_path` describe what the tree inherits.
pub fn build_stack_group(
    env: &BuildEnv<'_>,
    node: &StackGroupConfigNode,
    module: &ModuleInformation,
    parent: Option<&StackGroup>,
    defaults: &InheritedProperties,
    root_parent_path: Option<String>,
) -> Result<StackGroup> {
    let path = module.absolute_path(&node.path);
    let group = match parent {
        Some(parent) => create_stack_group_from_parent(&path, &node.name, parent),
        None => create_root_stack_group(&path, module, root_parent_path, defaults),
    };

    let variables = env.variables_with(json!({
        "stackGroup": group.variables(),
        "parent": parent.map(StackGroup::variables),
    }));
    let config = node.get_config(&variables)?;
    if let Some(config) = &config {
        env.hooks.validate(&config.common.hooks, &path)?;
    }

    log::trace!("Built stack group {path}");
    Ok(populate_stack_group(group, config.as_ref()))
}

fn build_parameter(
    env: &BuildEnv<'_>,
    config: &ParameterConfig,
    parameter: &str,
    stack_path: &str,
) -> Result<ParameterResolver> {
    let resolver = env
        .resolvers
        .init(&config.resolver, &config.config, parameter, stack_path)?;
    Ok(ParameterResolver {
        resolver_name: config.resolver.clone(),
        config: config.config.clone(),
        confidential: config.confidential,
        immutable: config.immutable,
        resolver,
    })
}

fn build_parameters(
    env: &BuildEnv<'_>,
    parameters: &BTreeMap<String, ParameterConfigs>,
    stack_path: &str,
) -> Result<BTreeMap<String, ParameterSpec>> {
    parameters
        .iter()
        .map(|(name, config)| {
            let spec = match config {
                ParameterConfigs::Single(p) => {
                    ParameterSpec::Single(build_parameter(env, p, name, stack_path)?)
                }
                ParameterConfigs::List {
                    items,
                    confidential,
                    immutable,
                } => ParameterSpec::List {
                    items: items
                        .iter()
                        .map(|p| build_parameter(env, p, name, stack_path))
                        .collect::<Result<Vec<_>>>()?,
                    confidential: *confidential,
                    immutable: *immutable,
                },
            };
            Ok((name.clone(), spec))
        })
        .collect()
}

/// Build the stacks of one stack config node, one per region
///
/// Resolvers are instantiated but not invoked. `inherited_dependencies`
/// are the dependencies of the enclosing modules, added to every stack.
pub fn build_stacks(
    env: &BuildEnv<'_>,
    node: &StackConfigNode,
    group: &StackGroup,
    inherited_dependencies: &[String],
) -> Result<Vec<Stack>> {
    let module = &group.module;
    let config_path = module.absolute_path(&node.path);

    let variables = env.variables_with(json!({
        "stack": {
            "path": config_path,
            "pathSegments": segments(&config_path),
        },
        "parent": group.variables(),
    }));
    let config = node.get_config(&variables)?;
    let props = group.props.apply(&config.common);
    env.hooks.validate(&props.hooks, &config_path)?;

    if props.regions.is_empty() {
        return Err(Error::Validation {
            kind: "stack",
            file: config_path,
            messages: vec!["No regions defined for stack".to_string()],
        });
    }

    let default_template = node.path.trim_start_matches('/').to_string();
    let template = match config.template.clone() {
        Some(t) if t.filename.is_some() || t.inline.is_some() => t,
        Some(t) => TemplateConfig {
            filename: Some(default_template),
            ..t
        },
        None => TemplateConfig {
            filename: Some(default_template),
            ..TemplateConfig::default()
        },
    };

    let name = config.name.clone().unwrap_or_else(|| {
        make_stack_name(
            &node.path,
            props.project.as_deref(),
            &module.stack_name_prefix,
        )
    });

    let mut depends: Vec<String> = config
        .depends
        .iter()
        .map(|d| module.resolve_path(&group.path, d))
        .collect();
    for dependency in inherited_dependencies {
        if !depends.contains(dependency) {
            depends.push(dependency.clone());
        }
    }

    let parameters = build_parameters(env, &config.parameters, &config_path)?;

    let stacks = props
        .regions
        .iter()
        .map(|region| Stack {
            path: format!("{config_path}/{region}"),
            name: name.clone(),
            region: region.clone(),
            stack_group_path: group.path.clone(),
            module: module.clone(),
            template: template.clone(),
            parameters: parameters.clone(),
            props: props.clone(),
            depends: depends.clone(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        })
        .collect::<Vec<_>>();

    log::trace!("Built {} stack(s) from {config_path}", stacks.len());
    Ok(stacks)
}

/// Build a module reference
///
/// The returned module carries the defaults its tree inherits: the
/// referencing group's values overlaid with the module configuration.
pub fn build_module(
    env: &BuildEnv<'_>,
    node: &ModuleConfigNode,
    parent: &StackGroup,
) -> Result<Module> {
    let path = parent.module.absolute_path(&node.path);
    let variables = env.variables_with(json!({
        "module": {
            "path": path,
            "pathSegments": segments(&path),
        },
        "parent": parent.variables(),
    }));
    let config = node.get_config(&variables)?;
    env.hooks.validate(&config.common.hooks, &path)?;

    let name = config
        .name
        .clone()
        .unwrap_or_else(|| make_module_name(last_segment(&node.path)));
    let info = parent.module.child(&path, &name);
    let dependencies = config
        .depends
        .iter()
        .map(|d| parent.module.resolve_path(&parent.path, d))
        .collect();

    log::trace!("Built module {path} ({}@{})", config.id, config.version);
    Ok(Module {
        name: info.name.clone(),
        path,
        id: config.id.clone(),
        version: config.version.clone(),
        parent_path: parent.path.clone(),
        info,
        props: parent.props.apply(&config.common),
        dependencies,
    })
}
