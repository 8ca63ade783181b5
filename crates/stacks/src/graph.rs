//! Dependency graph resolution
//!
//! Starting from the command path, entities are built by walking the
//! configuration tree. Dependencies declared by freshly built stacks and
//! modules become the command paths of the next pass, until a pass builds
//! nothing new. The result is then validated (every dependency exists, no
//! cycles, nothing depends on obsolete stacks) and assembled into a
//! [`StacksContext`].

use crate::builder::{build_module, build_stack_group, build_stacks, BuildEnv};
use crate::config::{
    validate_command_path, ConfigSource, ConfigTree, ModuleConfigNode, StackGroupConfigNode,
    Variables,
};
use crate::error::{Error, ObsoleteReference, Result};
use crate::hooks::HookRegistry;
use crate::model::{InheritedProperties, Module, ModuleInformation, Stack, StackGroup, StacksContext};
use crate::path::{
    is_module_path, is_within_command_path, path_starts_with, ModulePath, StackGroupPath, StackPath,
    ROOT_STACK_GROUP_PATH,
};
use crate::resolvers::ResolverRegistry;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Everything needed to resolve a stacks context
pub struct BuildInput {
    pub source: Arc<dyn ConfigSource>,
    /// Path selecting what to build, the root when `None`
    pub command_path: Option<String>,
    /// Build the whole tree so that stacks depending on the command path
    /// are known too; the command path is still validated
    pub include_dependents: bool,
    /// Project variables exposed to configuration loaders
    pub variables: Variables,
    /// Values inherited by the root stack group
    pub defaults: InheritedProperties,
    pub resolvers: Arc<ResolverRegistry>,
    pub hooks: Arc<HookRegistry>,
}

impl BuildInput {
    /// Input with built-in resolvers and hooks and no defaults
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            command_path: None,
            include_dependents: false,
            variables: Value::Object(serde_json::Map::new()),
            defaults: InheritedProperties::default(),
            resolvers: Arc::new(ResolverRegistry::new()),
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    pub fn with_command_path(mut self, command_path: impl Into<String>) -> Self {
        self.command_path = Some(command_path.into());
        self
    }

    /// Needed by undeploy and graph inspection, which walk dependents
    pub fn with_dependents(mut self) -> Self {
        self.include_dependents = true;
        self
    }

    pub fn with_defaults(mut self, defaults: InheritedProperties) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

// ============================================================================
// Process status
// ============================================================================

/// Accumulator of everything built during one resolution
///
/// Tracks which paths have been built so that nothing is built twice,
/// and which entities were built since the last [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct ProcessStatus {
    stack_groups: BTreeMap<StackGroupPath, StackGroup>,
    stacks: BTreeMap<StackPath, Stack>,
    new_stacks: Vec<StackPath>,
    modules: BTreeMap<ModulePath, Module>,
    new_modules: Vec<ModulePath>,
}

impl ProcessStatus {
    pub fn is_stack_group_processed(&self, path: &str) -> bool {
        self.stack_groups.contains_key(path)
    }

    pub fn is_stack_processed(&self, path: &str) -> bool {
        self.stacks.contains_key(path)
    }

    pub fn is_module_processed(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    pub fn set_stack_group_processed(&mut self, group: StackGroup) {
        self.stack_groups.insert(group.path.clone(), group);
    }

    pub fn set_stack_processed(&mut self, stack: Stack) {
        self.new_stacks.push(stack.path.clone());
        self.stacks.insert(stack.path.clone(), stack);
    }

    pub fn set_module_processed(&mut self, module: Module) {
        self.new_modules.push(module.path.clone());
        self.modules.insert(module.path.clone(), module);
    }

    pub fn stack_group(&self, path: &str) -> Option<&StackGroup> {
        self.stack_groups.get(path)
    }

    /// Stacks built since the last reset
    pub fn newly_processed_stacks(&self) -> Vec<&Stack> {
        self.new_stacks
            .iter()
            .filter_map(|p| self.stacks.get(p))
            .collect()
    }

    /// Modules built since the last reset
    pub fn newly_processed_modules(&self) -> Vec<&Module> {
        self.new_modules
            .iter()
            .filter_map(|p| self.modules.get(p))
            .collect()
    }

    /// Start a new pass
    pub fn reset(&mut self) {
        self.new_stacks.clear();
        self.new_modules.clear();
    }

    #[allow(clippy::type_complexity)]
    fn into_parts(
        self,
    ) -> (
        BTreeMap<StackGroupPath, StackGroup>,
        BTreeMap<StackPath, Stack>,
        BTreeMap<ModulePath, Module>,
    ) {
        (self.stack_groups, self.stacks, self.modules)
    }
}

// ============================================================================
// Tree processing
// ============================================================================

/// A configuration tree together with what it inherits
struct ModuleTree {
    info: ModuleInformation,
    tree: Arc<ConfigTree>,
    source: Arc<dyn ConfigSource>,
    defaults: InheritedProperties,
    parent_path: Option<StackGroupPath>,
    /// Dependencies of the enclosing modules
    inherited_dependencies: Vec<String>,
}

struct GraphResolver<'a> {
    env: BuildEnv<'a>,
    status: ProcessStatus,
    trees: BTreeMap<ModulePath, ModuleTree>,
    /// Stacks built per config file, reused when a later pass selects another region
    stack_nodes: BTreeMap<String, Vec<Stack>>,
}

fn not_found(kind: &'static str, path: &str) -> Error {
    Error::NotFound {
        kind,
        path: path.to_string(),
    }
}

impl GraphResolver<'_> {
    fn process_group_node(
        &mut self,
        tree_key: &str,
        node: &StackGroupConfigNode,
        command_path: &str,
    ) -> Result<()> {
        let tree = self.trees.get(tree_key).ok_or_else(|| not_found("module", tree_key))?;
        let info = tree.info.clone();
        let path = info.absolute_path(&node.path);

        if !is_within_command_path(command_path, &path) {
            return Ok(());
        }

        if !self.status.is_stack_group_processed(&path) {
            let parent = match &node.parent_path {
                Some(parent_path) => {
                    let parent_path = info.absolute_path(parent_path);
                    Some(
                        self.status
                            .stack_group(&parent_path)
                            .cloned()
                            .ok_or_else(|| not_found("stack group", &parent_path))?,
                    )
                }
                None => None,
            };
            let group = build_stack_group(
                &self.env,
                node,
                &info,
                parent.as_ref(),
                &tree.defaults,
                tree.parent_path.clone(),
            )?;
            self.status.set_stack_group_processed(group);
        }

        let group = self
            .status
            .stack_group(&path)
            .cloned()
            .ok_or_else(|| not_found("stack group", &path))?;

        for module_node in &node.modules {
            let module_path = info.absolute_path(&module_node.path);
            if !is_within_command_path(command_path, &module_path) {
                continue;
            }
            if !self.status.is_module_processed(&module_path) {
                self.load_module(tree_key, module_node, &group)?;
            }
            let child_tree = self
                .trees
                .get(&module_path)
                .map(|t| Arc::clone(&t.tree))
                .ok_or_else(|| not_found("module", &module_path))?;
            self.process_group_node(&module_path, &child_tree.root, command_path)?;
        }

        for stack_node in &node.stacks {
            let config_path = info.absolute_path(&stack_node.path);
            if !is_within_command_path(command_path, &config_path) {
                continue;
            }
            if !self.stack_nodes.contains_key(&config_path) {
                let inherited = self
                    .trees
                    .get(tree_key)
                    .map(|t| t.inherited_dependencies.clone())
                    .unwrap_or_default();
                let stacks = build_stacks(&self.env, stack_node, &group, &inherited)?;
                self.stack_nodes.insert(config_path.clone(), stacks);
            }
            let selected: Vec<Stack> = self
                .stack_nodes
                .get(&config_path)
                .into_iter()
                .flatten()
                .filter(|s| {
                    is_within_command_path(command_path, &s.path)
                        && !self.status.is_stack_processed(&s.path)
                })
                .cloned()
                .collect();
            for stack in selected {
                self.status.set_stack_processed(stack);
            }
        }

        for child in &node.children {
            self.process_group_node(tree_key, child, command_path)?;
        }

        Ok(())
    }

    fn load_module(
        &mut self,
        tree_key: &str,
        node: &ModuleConfigNode,
        group: &StackGroup,
    ) -> Result<()> {
        let module = build_module(&self.env, node, group)?;
        let parent = self.trees.get(tree_key).ok_or_else(|| not_found("module", tree_key))?;

        let source = parent
            .source
            .config_source_for_module(&module.id, &module.version)?;
        let tree = source.build_config_tree()?;

        let mut inherited_dependencies = parent.inherited_dependencies.clone();
        for dependency in &module.dependencies {
            if !inherited_dependencies.contains(dependency) {
                inherited_dependencies.push(dependency.clone());
            }
        }

        log::debug!(
            "Loaded module {} ({}@{})",
            module.path,
            module.id,
            module.version
        );

        self.trees.insert(
            module.path.clone(),
            ModuleTree {
                info: module.info.clone(),
                tree: Arc::new(tree),
                source,
                defaults: module.props.clone(),
                parent_path: Some(group.path.clone()),
                inherited_dependencies,
            },
        );
        self.status.set_module_processed(module);
        Ok(())
    }

    /// Build everything the command path needs, following dependencies
    fn process_config_tree(&mut self, command_path: &str) -> Result<()> {
        let root = self
            .trees
            .get(ROOT_STACK_GROUP_PATH)
            .map(|t| Arc::clone(&t.tree))
            .ok_or_else(|| not_found("module", ROOT_STACK_GROUP_PATH))?;

        let mut command_paths = vec![command_path.to_string()];
        let mut pass = 0;

        while !command_paths.is_empty() {
            pass += 1;
            log::trace!(
                "Dependency resolution pass {pass}: {}",
                command_paths.join(", ")
            );

            self.status.reset();
            for path in &command_paths {
                self.process_group_node(ROOT_STACK_GROUP_PATH, &root.root, path)?;
            }

            let mut next = BTreeSet::new();
            for stack in self.status.newly_processed_stacks() {
                if !stack.is_ignored() {
                    next.extend(stack.declared_dependencies());
                }
            }
            for module in self.status.newly_processed_modules() {
                next.extend(module.dependencies.iter().cloned());
            }
            command_paths = next.into_iter().collect();
        }

        Ok(())
    }
}

// ============================================================================
// Dependencies
// ============================================================================

fn expand_dependency(
    dependency: &str,
    declared_in: &str,
    stack_paths: &[StackPath],
    modules: &BTreeMap<ModulePath, Module>,
) -> Result<Vec<StackPath>> {
    let missing = |target_kind| Error::MissingDependency {
        dependency: dependency.to_string(),
        declared_in: declared_in.to_string(),
        target_kind,
    };

    if is_module_path(dependency) && !modules.contains_key(dependency) {
        return Err(missing("module"));
    }

    let matches: Vec<StackPath> = stack_paths
        .iter()
        .filter(|p| path_starts_with(p, dependency))
        .cloned()
        .collect();

    if matches.is_empty() {
        return Err(missing("stack"));
    }
    Ok(matches)
}

/// Expand declared dependencies into stack paths
///
/// Module paths expand to every stack in the module and stack config
/// paths without region to every region. Self references are dropped.
/// Ignored stacks get no dependencies.
pub fn process_stack_dependencies(
    stacks: &mut BTreeMap<StackPath, Stack>,
    modules: &BTreeMap<ModulePath, Module>,
) -> Result<()> {
    let stack_paths: Vec<StackPath> = stacks.keys().cloned().collect();
    let mut expanded = BTreeMap::new();

    for stack in stacks.values().filter(|s| !s.is_ignored()) {
        let mut dependencies = BTreeSet::new();

        for dependency in &stack.depends {
            let declared_in = format!("stack {}", stack.path);
            dependencies.extend(expand_dependency(dependency, &declared_in, &stack_paths, modules)?);
        }

        for (name, spec) in &stack.parameters {
            for dependency in spec.dependencies() {
                let resolved = stack.resolve_path(&dependency);
                let declared_in = format!("parameter {name} of stack {}", stack.path);
                dependencies.extend(expand_dependency(&resolved, &declared_in, &stack_paths, modules)?);
            }
        }

        dependencies.remove(&stack.path);
        expanded.insert(stack.path.clone(), dependencies.into_iter().collect::<Vec<_>>());
    }

    for (path, dependencies) in expanded {
        if let Some(stack) = stacks.get_mut(&path) {
            stack.dependencies = dependencies;
        }
    }
    Ok(())
}

/// Fill in the reverse dependency edges
pub fn populate_dependents(stacks: &mut BTreeMap<StackPath, Stack>) {
    let mut dependents: BTreeMap<StackPath, Vec<StackPath>> = BTreeMap::new();
    for stack in stacks.values() {
        for dependency in &stack.dependencies {
            dependents
                .entry(dependency.clone())
                .or_default()
                .push(stack.path.clone());
        }
    }
    for (path, stack) in stacks.iter_mut() {
        stack.dependents = dependents.remove(path).unwrap_or_default();
    }
}

fn visit_for_cycles(
    path: &str,
    stacks: &BTreeMap<StackPath, Stack>,
    trail: &mut Vec<String>,
    done: &mut BTreeSet<String>,
) -> Result<()> {
    if done.contains(path) {
        return Ok(());
    }
    if let Some(position) = trail.iter().position(|p| p == path) {
        let mut chain = trail[position..].to_vec();
        chain.push(path.to_string());
        return Err(Error::CyclicDependency { chain });
    }

    trail.push(path.to_string());
    if let Some(stack) = stacks.get(path) {
        for dependency in &stack.dependencies {
            visit_for_cycles(dependency, stacks, trail, done)?;
        }
    }
    trail.pop();
    done.insert(path.to_string());
    Ok(())
}

/// Fail with the full chain when the dependencies contain a cycle
pub fn check_cyclic_dependencies(stacks: &BTreeMap<StackPath, Stack>) -> Result<()> {
    let mut done = BTreeSet::new();
    for path in stacks.keys() {
        let mut trail = Vec::new();
        visit_for_cycles(path, stacks, &mut trail, &mut done)?;
    }
    Ok(())
}

/// Fail when non-obsolete stacks depend on obsolete ones
///
/// Every offending pair is reported, not just the first one. Module
/// dependencies are carried by the stacks inside the module, so checking
/// stacks covers modules too.
pub fn check_obsolete_dependencies(stacks: &BTreeMap<StackPath, Stack>) -> Result<()> {
    let references: Vec<ObsoleteReference> = stacks
        .values()
        .filter(|s| !s.is_obsolete())
        .filter_map(|stack| {
            let to: Vec<String> = stack
                .dependencies
                .iter()
                .filter(|d| stacks.get(*d).is_some_and(Stack::is_obsolete))
                .cloned()
                .collect();
            (!to.is_empty()).then(|| ObsoleteReference {
                from: stack.path.clone(),
                to,
            })
        })
        .collect();

    if references.is_empty() {
        Ok(())
    } else {
        Err(Error::ObsoleteDependencies { references })
    }
}

fn sort_stacks<F>(stacks: &[Arc<Stack>], selector: F) -> Vec<Arc<Stack>>
where
    F: Fn(&Stack) -> &[StackPath],
{
    let mut unsorted: BTreeMap<&str, &Arc<Stack>> =
        stacks.iter().map(|s| (s.path.as_str(), s)).collect();
    let mut sorted = Vec::with_capacity(stacks.len());

    while !unsorted.is_empty() {
        let ready: Vec<String> = unsorted
            .values()
            .filter(|s| {
                selector(s)
                    .iter()
                    .all(|d| !unsorted.contains_key(d.as_str()))
            })
            .map(|s| s.path.clone())
            .collect();

        if ready.is_empty() {
            log::warn!("Unresolvable ordering among {} stacks", unsorted.len());
            sorted.extend(unsorted.values().map(|s| Arc::clone(s)));
            break;
        }

        for path in ready {
            if let Some(stack) = unsorted.remove(path.as_str()) {
                sorted.push(Arc::clone(stack));
            }
        }
    }

    sorted
}

/// Order stacks so that dependencies come before their dependents
///
/// Stacks become ready in layers; within a layer they are ordered by path.
pub fn sort_stacks_for_deploy(stacks: &[Arc<Stack>]) -> Vec<Arc<Stack>> {
    sort_stacks(stacks, |s| &s.dependencies)
}

/// Order stacks so that dependents come before their dependencies
pub fn sort_stacks_for_undeploy(stacks: &[Arc<Stack>]) -> Vec<Arc<Stack>> {
    sort_stacks(stacks, |s| &s.dependents)
}

fn collect_transitive<F>(path: &str, ctx: &StacksContext, selector: F) -> Vec<StackPath>
where
    F: Fn(&Stack) -> &[StackPath],
{
    let mut collected = BTreeSet::new();
    let mut queue = vec![path.to_string()];
    while let Some(current) = queue.pop() {
        if let Some(stack) = ctx.stack(&current) {
            for next in selector(stack) {
                if collected.insert(next.clone()) {
                    queue.push(next.clone());
                }
            }
        }
    }
    collected.remove(path);
    collected.into_iter().collect()
}

/// All direct and indirect dependencies of a stack
pub fn collect_all_dependencies(path: &str, ctx: &StacksContext) -> Vec<StackPath> {
    collect_transitive(path, ctx, |s| &s.dependencies)
}

/// All direct and indirect dependents of a stack
pub fn collect_all_dependents(path: &str, ctx: &StacksContext) -> Vec<StackPath> {
    collect_transitive(path, ctx, |s| &s.dependents)
}

// ============================================================================
// Assembly
// ============================================================================

/// Fill in group child lists; ignored stacks and modules are left out
fn populate_children_and_stacks(
    mut stack_groups: BTreeMap<StackGroupPath, StackGroup>,
    stacks: &BTreeMap<StackPath, Stack>,
    modules: &BTreeMap<ModulePath, Module>,
) -> BTreeMap<StackGroupPath, StackGroup> {
    let mut children: BTreeMap<StackGroupPath, Vec<StackGroupPath>> = BTreeMap::new();
    for group in stack_groups.values() {
        if let Some(parent_path) = &group.parent_path
            && !group.root
        {
            children
                .entry(parent_path.clone())
                .or_default()
                .push(group.path.clone());
        }
    }

    for group in stack_groups.values_mut() {
        group.children = children.remove(&group.path).unwrap_or_default();
        group.stacks = stacks
            .values()
            .filter(|s| s.stack_group_path == group.path && !s.is_ignored())
            .map(|s| s.path.clone())
            .collect();
        group.modules = modules
            .values()
            .filter(|m| m.parent_path == group.path && !m.props.ignore)
            .map(|m| m.path.clone())
            .collect();
    }

    stack_groups
}

/// Build, validate and assemble the stacks selected by the command path
pub fn build_stacks_context(input: &BuildInput) -> Result<StacksContext> {
    let command_path = input
        .command_path
        .clone()
        .unwrap_or_else(|| ROOT_STACK_GROUP_PATH.to_string());

    let tree = input.source.build_config_tree()?;
    validate_command_path(&tree, &command_path)?;

    let env = BuildEnv {
        variables: &input.variables,
        resolvers: &input.resolvers,
        hooks: &input.hooks,
    };

    let mut resolver = GraphResolver {
        env,
        status: ProcessStatus::default(),
        trees: BTreeMap::from([(
            ROOT_STACK_GROUP_PATH.to_string(),
            ModuleTree {
                info: ModuleInformation::root(),
                tree: Arc::new(tree),
                source: Arc::clone(&input.source),
                defaults: input.defaults.clone(),
                parent_path: None,
                inherited_dependencies: Vec::new(),
            },
        )]),
        stack_nodes: BTreeMap::new(),
    };

    if input.include_dependents {
        resolver.process_config_tree(ROOT_STACK_GROUP_PATH)?;
    } else {
        resolver.process_config_tree(&command_path)?;
    }

    let sources: BTreeMap<ModulePath, Arc<dyn ConfigSource>> = resolver
        .trees
        .iter()
        .map(|(path, tree)| (path.clone(), Arc::clone(&tree.source)))
        .collect();
    let (stack_groups, mut stacks, modules) = resolver.status.into_parts();

    process_stack_dependencies(&mut stacks, &modules)?;
    check_cyclic_dependencies(&stacks)?;
    check_obsolete_dependencies(&stacks)?;
    populate_dependents(&mut stacks);

    let stack_groups = populate_children_and_stacks(stack_groups, &stacks, &modules);

    log::debug!(
        "Resolved {} stack group(s), {} module(s) and {} stack(s) for {command_path}",
        stack_groups.len(),
        modules.len(),
        stacks.len()
    );

    let stacks = stacks
        .into_iter()
        .map(|(path, stack)| (path, Arc::new(stack)))
        .collect();

    Ok(StacksContext::new(stack_groups, stacks, modules, sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        EntityConfig, ModuleConfig, ParameterConfig, ParameterConfigs, StackConfig,
        StackGroupConfig,
    };
    use crate::memory::MemoryConfigSource;
    use serde_json::json;

    fn regions(regions: &[&str]) -> StackGroupConfig {
        StackGroupConfig {
            common: EntityConfig {
                regions: regions.iter().map(|r| (*r).to_string()).collect(),
                ..EntityConfig::default()
            },
        }
    }

    fn stack(depends: &[&str]) -> StackConfig {
        StackConfig {
            depends: depends.iter().map(|d| (*d).to_string()).collect(),
            ..StackConfig::default()
        }
    }

    fn obsolete_stack(depends: &[&str]) -> StackConfig {
        let mut config = stack(depends);
        config.common.obsolete = Some(true);
        config
    }

    fn build(source: MemoryConfigSource, command_path: &str) -> Result<StacksContext> {
        build_stacks_context(&BuildInput::new(Arc::new(source)).with_command_path(command_path))
    }

    fn paths(ctx: &StacksContext) -> Vec<String> {
        ctx.stacks().map(|s| s.path.clone()).collect()
    }

    fn arc_stack(path: &str, dependencies: &[&str]) -> Arc<Stack> {
        let mut stack = Stack::new(path, path, "eu-west-1", "/", ModuleInformation::root());
        stack.dependencies = dependencies.iter().map(|d| (*d).to_string()).collect();
        Arc::new(stack)
    }

    #[test]
    fn test_dependencies_outside_command_path_are_built() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/dev/app.yml", stack(&["/shared/logs.yml"]))
            .with_stack("/shared/logs.yml", stack(&[]))
            .with_stack("/shared/other.yml", stack(&[]));

        let ctx = build(source.clone(), "/dev").unwrap();
        assert_eq!(
            paths(&ctx),
            vec!["/dev/app.yml/eu-west-1", "/shared/logs.yml/eu-west-1"]
        );
        assert_eq!(source.load_count("/shared/other.yml"), 0);
        assert_eq!(source.load_count("/shared/logs.yml"), 1);

        let app = ctx.stack("/dev/app.yml/eu-west-1").unwrap();
        assert_eq!(app.dependencies, vec!["/shared/logs.yml/eu-west-1"]);
        let logs = ctx.stack("/shared/logs.yml/eu-west-1").unwrap();
        assert_eq!(logs.dependents, vec!["/dev/app.yml/eu-west-1"]);
    }

    #[test]
    fn test_scoped_build_with_dependents() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/dev/app.yml", stack(&["/shared/logs.yml"]))
            .with_stack("/shared/logs.yml", stack(&[]));

        let scoped = build(source.clone(), "/shared/logs.yml").unwrap();
        let logs = scoped.stack("/shared/logs.yml/eu-west-1").unwrap();
        assert!(logs.dependents.is_empty());

        let ctx = build_stacks_context(
            &BuildInput::new(Arc::new(source))
                .with_command_path("/shared/logs.yml")
                .with_dependents(),
        )
        .unwrap();
        let logs = ctx.stack("/shared/logs.yml/eu-west-1").unwrap();
        assert_eq!(logs.dependents, vec!["/dev/app.yml/eu-west-1"]);
        assert_eq!(
            collect_all_dependents("/shared/logs.yml/eu-west-1", &ctx),
            vec!["/dev/app.yml/eu-west-1"]
        );
    }

    #[test]
    fn test_parameter_dependencies_are_followed_transitively() {
        let mut app = stack(&[]);
        app.parameters.insert(
            "VpcId".into(),
            ParameterConfigs::Single(ParameterConfig::resolver(
                "stack-output",
                json!({ "stack": "vpc.yml", "output": "VpcId" }),
            )),
        );
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/dev/app.yml", app)
            .with_stack("/dev/vpc.yml", stack(&["/logs.yml"]))
            .with_stack("/logs.yml", stack(&[]));

        let ctx = build(source, "/dev/app.yml").unwrap();
        assert_eq!(
            paths(&ctx),
            vec![
                "/dev/app.yml/eu-west-1",
                "/dev/vpc.yml/eu-west-1",
                "/logs.yml/eu-west-1"
            ]
        );
        assert_eq!(
            ctx.stack("/dev/app.yml/eu-west-1").unwrap().dependencies,
            vec!["/dev/vpc.yml/eu-west-1"]
        );
    }

    #[test]
    fn test_region_selected_later_reuses_built_node() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1", "us-east-1"]))
            .with_stack("/app.yml", stack(&["/vpc.yml"]))
            .with_stack("/vpc.yml", stack(&[]));

        let ctx = build(source.clone(), "/vpc.yml/eu-west-1").unwrap();
        assert_eq!(paths(&ctx), vec!["/vpc.yml/eu-west-1"]);

        let ctx = build(source.clone(), "/app.yml/us-east-1").unwrap();
        assert_eq!(
            paths(&ctx),
            vec![
                "/app.yml/us-east-1",
                "/vpc.yml/eu-west-1",
                "/vpc.yml/us-east-1"
            ]
        );
        assert_eq!(source.load_count("/vpc.yml"), 2);
    }

    #[test]
    fn test_missing_dependency() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/app.yml", stack(&["/nope.yml"]));

        let err = build(source, "/").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dependency /nope.yml in stack /app.yml/eu-west-1 refers to a non-existing stack"
        );
    }

    #[test]
    fn test_cycle_reports_full_chain() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/a.yml", stack(&["/b.yml"]))
            .with_stack("/b.yml", stack(&["/c.yml"]))
            .with_stack("/c.yml", stack(&["/a.yml"]));

        match build(source, "/").unwrap_err() {
            Error::CyclicDependency { chain } => {
                assert_eq!(
                    chain,
                    vec![
                        "/a.yml/eu-west-1",
                        "/b.yml/eu-west-1",
                        "/c.yml/eu-west-1",
                        "/a.yml/eu-west-1"
                    ]
                );
                let unique: BTreeSet<&String> = chain.iter().collect();
                assert_eq!(unique.len(), chain.len() - 1);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_cycle_chain_excludes_entry_outside_cycle() {
        let mut stacks = BTreeMap::new();
        for (path, deps) in [("/x", vec!["/y"]), ("/y", vec!["/z"]), ("/z", vec!["/y"])] {
            let mut stack = Stack::new(path, path, "r", "/", ModuleInformation::root());
            stack.dependencies = deps.into_iter().map(String::from).collect();
            stacks.insert(path.to_string(), stack);
        }
        match check_cyclic_dependencies(&stacks).unwrap_err() {
            Error::CyclicDependency { chain } => assert_eq!(chain, vec!["/y", "/z", "/y"]),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_obsolete_dependencies_all_reported() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/s1.yml", stack(&["/s2.yml"]))
            .with_stack("/s2.yml", obsolete_stack(&[]))
            .with_stack("/s3.yml", stack(&["/s2.yml", "/s4.yml"]))
            .with_stack("/s4.yml", obsolete_stack(&[]))
            .with_stack("/s5.yml", obsolete_stack(&["/s4.yml"]));

        match build(source.clone(), "/").unwrap_err() {
            Error::ObsoleteDependencies { references } => {
                assert_eq!(
                    references,
                    vec![
                        ObsoleteReference {
                            from: "/s1.yml/eu-west-1".into(),
                            to: vec!["/s2.yml/eu-west-1".into()],
                        },
                        ObsoleteReference {
                            from: "/s3.yml/eu-west-1".into(),
                            to: vec!["/s2.yml/eu-west-1".into(), "/s4.yml/eu-west-1".into()],
                        },
                    ]
                );
            }
            other => panic!("unexpected {other}"),
        }

        let fixed = source
            .with_stack("/s1.yml", stack(&[]))
            .with_stack("/s3.yml", stack(&[]));
        assert!(build(fixed, "/").is_ok());
    }

    #[test]
    fn test_obsolete_inherited_from_group() {
        let mut legacy = regions(&["eu-west-1"]);
        legacy.common.obsolete = Some(true);
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack_group("/legacy", legacy)
            .with_stack("/legacy/old.yml", stack(&[]))
            .with_stack("/app.yml", stack(&["/legacy"]));

        assert!(matches!(
            build(source, "/").unwrap_err(),
            Error::ObsoleteDependencies { .. }
        ));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1", "us-east-1"]))
            .with_stack("/a.yml", stack(&["/b.yml"]))
            .with_stack("/b.yml", stack(&["/c.yml/eu-west-1"]))
            .with_stack("/c.yml", stack(&[]));

        let first = build(source.clone(), "/a.yml").unwrap();
        let second = build(source, "/a.yml").unwrap();
        assert_eq!(paths(&first), paths(&second));
        for stack in first.stacks() {
            let other = second.stack(&stack.path).unwrap();
            assert_eq!(stack.dependencies, other.dependencies);
            assert_eq!(stack.dependents, other.dependents);
        }
    }

    #[test]
    fn test_ignored_stacks_left_out_of_groups() {
        let mut ignored = stack(&[]);
        ignored.common.ignore = Some(true);
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/dev/a.yml", stack(&[]))
            .with_stack("/dev/b.yml", ignored);

        let ctx = build(source, "/").unwrap();
        let dev = ctx.stack_group("/dev").unwrap();
        assert_eq!(dev.stacks, vec!["/dev/a.yml/eu-west-1"]);
        assert_eq!(ctx.root_stack_group().unwrap().children, vec!["/dev"]);
        assert!(ctx.stack("/dev/b.yml/eu-west-1").unwrap().is_ignored());
    }

    #[test]
    fn test_modules_prefix_paths_and_names() {
        let network = MemoryConfigSource::new()
            .with_stack("/vpc.yml", stack(&[]))
            .with_stack("/subnets.yml", stack(&["/vpc.yml"]));

        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_module(
                "/dev/network.module.yml",
                ModuleConfig {
                    id: "network".into(),
                    version: "1.0".into(),
                    ..ModuleConfig::default()
                },
            )
            .with_stack("/dev/app.yml", stack(&["network.module.yml"]))
            .with_module_source("network", "1.0", network);

        let ctx = build(source, "/dev/app.yml").unwrap();
        assert_eq!(
            paths(&ctx),
            vec![
                "/dev/app.yml/eu-west-1",
                "/dev/network.module.yml/subnets.yml/eu-west-1",
                "/dev/network.module.yml/vpc.yml/eu-west-1",
            ]
        );

        let subnets = ctx
            .stack("/dev/network.module.yml/subnets.yml/eu-west-1")
            .unwrap();
        assert_eq!(subnets.name, "network-subnets");
        assert_eq!(
            subnets.dependencies,
            vec!["/dev/network.module.yml/vpc.yml/eu-west-1"]
        );

        let app = ctx.stack("/dev/app.yml/eu-west-1").unwrap();
        assert_eq!(app.dependencies.len(), 2);
        assert_eq!(ctx.stack_group("/dev").unwrap().modules, vec!["/dev/network.module.yml"]);
        assert!(ctx.config_source("/dev/network.module.yml").is_ok());
    }

    #[test]
    fn test_module_not_found() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_module(
                "/network.module.yml",
                ModuleConfig {
                    id: "network".into(),
                    version: "9.9".into(),
                    ..ModuleConfig::default()
                },
            );

        let err = build(source, "/").unwrap_err();
        assert_eq!(err.to_string(), "Module not found with id: network, version: 9.9");
    }

    #[test]
    fn test_command_path_matches_nothing() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/dev/a.yml", stack(&[]));
        assert!(matches!(
            build(source, "/prod").unwrap_err(),
            Error::CommandPathMatchesNoStacks { .. }
        ));
    }

    #[test]
    fn test_sort_respects_dependencies_with_path_tie_break() {
        let stacks = vec![
            arc_stack("/d", &["/b", "/c"]),
            arc_stack("/c", &["/a"]),
            arc_stack("/b", &[]),
            arc_stack("/a", &[]),
            arc_stack("/e", &[]),
        ];
        let sorted: Vec<String> = sort_stacks_for_deploy(&stacks)
            .iter()
            .map(|s| s.path.clone())
            .collect();
        assert_eq!(sorted, vec!["/a", "/b", "/e", "/c", "/d"]);

        for stack in &stacks {
            let position = sorted.iter().position(|p| *p == stack.path).unwrap();
            for dependency in &stack.dependencies {
                let dependency_position = sorted.iter().position(|p| p == dependency).unwrap();
                assert!(dependency_position < position);
            }
        }
    }

    #[test]
    fn test_sort_for_undeploy_reverses_direction() {
        let mut a = Stack::new("/a", "a", "r", "/", ModuleInformation::root());
        a.dependents = vec!["/b".into()];
        let b = Stack::new("/b", "b", "r", "/", ModuleInformation::root());
        let sorted: Vec<String> = sort_stacks_for_undeploy(&[Arc::new(a), Arc::new(b)])
            .iter()
            .map(|s| s.path.clone())
            .collect();
        assert_eq!(sorted, vec!["/b", "/a"]);
    }

    #[test]
    fn test_collect_transitive() {
        let source = MemoryConfigSource::new()
            .with_stack_group("/", regions(&["eu-west-1"]))
            .with_stack("/a.yml", stack(&["/b.yml"]))
            .with_stack("/b.yml", stack(&["/c.yml"]))
            .with_stack("/c.yml", stack(&[]));
        let ctx = build(source, "/").unwrap();

        assert_eq!(
            collect_all_dependencies("/a.yml/eu-west-1", &ctx),
            vec!["/b.yml/eu-west-1", "/c.yml/eu-west-1"]
        );
        assert_eq!(
            collect_all_dependents("/c.yml/eu-west-1", &ctx),
            vec!["/a.yml/eu-west-1", "/b.yml/eu-west-1"]
        );
    }

    #[test]
    fn test_process_status_tracks_new_entities() {
        let mut status = ProcessStatus::default();
        let stack = Stack::new("/a.yml/r", "a", "r", "/", ModuleInformation::root());
        status.set_stack_processed(stack);
        assert!(status.is_stack_processed("/a.yml/r"));
        assert_eq!(status.newly_processed_stacks().len(), 1);

        status.reset();
        assert!(status.newly_processed_stacks().is_empty());
        assert!(status.is_stack_processed("/a.yml/r"));
    }
}
