//! Resolved entities and the arena holding them
//!
//! After graph resolution every stack group, module and stack lives in a
//! [`StacksContext`], keyed by absolute path. Relationships are expressed
//! as paths (`parent_path`, `children`, `dependencies`, `dependents`)
//! rather than references, which keeps the entities plain data.

use crate::config::{ConfigSource, EntityConfig, Tags, TemplateBucketConfig, TemplateConfig, TimeoutConfig};
use crate::error::{Error, Result};
use crate::hooks::HookConfig;
use crate::path::{
    join_paths, normalize_stack_path, path_starts_with, segments, stack_config_path, ModulePath,
    StackGroupPath, StackPath, ROOT_STACK_GROUP_PATH,
};
use crate::resolvers::Resolver;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Where an entity sits in the module hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInformation {
    pub path: ModulePath,
    pub name: String,
    pub is_root: bool,
    /// Prepended to every module-relative path
    pub stack_path_prefix: String,
    /// Prepended to every stack name
    pub stack_name_prefix: String,
}

impl ModuleInformation {
    /// The top level configuration
    pub fn root() -> Self {
        Self {
            path: ROOT_STACK_GROUP_PATH.to_string(),
            name: String::new(),
            is_root: true,
            stack_path_prefix: String::new(),
            stack_name_prefix: String::new(),
        }
    }

    /// A module referenced from this one at the given absolute path
    pub fn child(&self, absolute_path: &str, name: &str) -> Self {
        let name = if self.is_root {
            name.to_string()
        } else {
            format!("{}-{name}", self.name)
        };
        Self {
            path: absolute_path.to_string(),
            stack_name_prefix: format!("{name}-"),
            name,
            is_root: false,
            stack_path_prefix: absolute_path.to_string(),
        }
    }

    /// Turn a module-relative path into an absolute one
    pub fn absolute_path(&self, relative: &str) -> String {
        join_paths(&self.stack_path_prefix, relative)
    }

    /// Turn an absolute path inside this module into a module-relative one
    pub fn relative_path(&self, absolute: &str) -> String {
        if self.is_root {
            return absolute.to_string();
        }
        match absolute.strip_prefix(&self.stack_path_prefix) {
            Some("") => ROOT_STACK_GROUP_PATH.to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => absolute.to_string(),
        }
    }

    /// Resolve a declared path against a group of this module
    ///
    /// Declared paths are module-relative: absolute ones start at the
    /// module root, relative ones at the declaring group.
    pub fn resolve_path(&self, group_path: &str, declared: &str) -> String {
        let group = self.relative_path(group_path);
        self.absolute_path(&normalize_stack_path(&group, declared))
    }
}

/// Attributes passed from a stack group to everything below it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InheritedProperties {
    pub project: Option<String>,
    pub regions: Vec<String>,
    pub account_ids: Option<Vec<String>>,
    pub command_role: Option<String>,
    pub template_bucket: Option<TemplateBucketConfig>,
    pub tags: Tags,
    pub timeout: Option<TimeoutConfig>,
    pub hooks: Vec<HookConfig>,
    pub data: Map<String, Value>,
    pub ignore: bool,
    pub obsolete: bool,
    pub termination_protection: bool,
    pub capabilities: Option<Vec<String>>,
    pub stack_policy: Option<String>,
    pub stack_policy_during_update: Option<String>,
    pub schemas: Option<Value>,
}

impl InheritedProperties {
    /// Overlay configuration on top of inherited values
    ///
    /// Unspecified attributes keep the inherited value. Tags start from the
    /// inherited tags only when `inherit_tags` is set, data is merged deeply
    /// and a hook replaces an inherited hook with the same name.
    pub fn apply(&self, config: &EntityConfig) -> Self {
        let mut tags = if config.inherit_tags {
            self.tags.clone()
        } else {
            Tags::new()
        };
        tags.extend(config.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            project: config.project.clone().or_else(|| self.project.clone()),
            regions: if config.regions.is_empty() {
                self.regions.clone()
            } else {
                config.regions.clone()
            },
            account_ids: config.account_ids.clone().or_else(|| self.account_ids.clone()),
            command_role: config.command_role.clone().or_else(|| self.command_role.clone()),
            template_bucket: config
                .template_bucket
                .clone()
                .or_else(|| self.template_bucket.clone()),
            tags,
            timeout: config.timeout.or(self.timeout),
            hooks: merge_hooks(&self.hooks, &config.hooks),
            data: merge_data(&self.data, &config.data),
            ignore: config.ignore.unwrap_or(self.ignore),
            obsolete: config.obsolete.unwrap_or(self.obsolete),
            termination_protection: config
                .termination_protection
                .unwrap_or(self.termination_protection),
            capabilities: config.capabilities.clone().or_else(|| self.capabilities.clone()),
            stack_policy: config.stack_policy.clone().or_else(|| self.stack_policy.clone()),
            stack_policy_during_update: config
                .stack_policy_during_update
                .clone()
                .or_else(|| self.stack_policy_during_update.clone()),
            schemas: config.schemas.clone().or_else(|| self.schemas.clone()),
        }
    }

    fn variables(&self) -> Value {
        json!({
            "project": self.project,
            "regions": self.regions,
            "tags": self.tags,
            "data": self.data,
            "ignore": self.ignore,
            "obsolete": self.obsolete,
            "terminationProtection": self.termination_protection,
        })
    }
}

fn merge_hooks(base: &[HookConfig], overlay: &[HookConfig]) -> Vec<HookConfig> {
    let mut hooks = base.to_vec();
    for hook in overlay {
        match hooks.iter_mut().find(|h| h.name == hook.name) {
            Some(existing) => *existing = hook.clone(),
            None => hooks.push(hook.clone()),
        }
    }
    hooks
}

fn merge_data(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in overlay {
        let combined = match (merged.get(key), value) {
            (Some(Value::Object(a)), Value::Object(b)) => Value::Object(merge_data(a, b)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

/// A resolved stack group
#[derive(Debug, Clone, Serialize)]
pub struct StackGroup {
    pub path: StackGroupPath,
    pub name: String,
    pub parent_path: Option<StackGroupPath>,
    pub root: bool,
    pub module: ModuleInformation,
    #[serde(flatten)]
    pub props: InheritedProperties,
    pub children: Vec<StackGroupPath>,
    pub stacks: Vec<StackPath>,
    pub modules: Vec<ModulePath>,
}

impl StackGroup {
    /// Variables describing this group to configuration loaders
    pub fn variables(&self) -> Value {
        let mut vars = self.props.variables();
        if let Some(map) = vars.as_object_mut() {
            map.insert("path".into(), json!(self.path));
            map.insert("pathSegments".into(), json!(segments(&self.path)));
            map.insert("name".into(), json!(self.name));
            map.insert("isRoot".into(), json!(self.root));
        }
        vars
    }
}

/// A resolved module reference
#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub path: ModulePath,
    pub name: String,
    pub id: String,
    pub version: String,
    /// Group that references the module
    pub parent_path: StackGroupPath,
    /// Information handed to everything inside the module
    pub info: ModuleInformation,
    #[serde(flatten)]
    pub props: InheritedProperties,
    /// Declared dependencies, as absolute paths
    pub dependencies: Vec<String>,
}

/// A parameter resolver bound to its configuration
#[derive(Clone)]
pub struct ParameterResolver {
    pub resolver_name: String,
    pub config: Value,
    pub confidential: bool,
    pub immutable: bool,
    pub resolver: Arc<dyn Resolver>,
}

impl fmt::Debug for ParameterResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterResolver")
            .field("resolver_name", &self.resolver_name)
            .field("confidential", &self.confidential)
            .field("immutable", &self.immutable)
            .finish_non_exhaustive()
    }
}

impl Serialize for ParameterResolver {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ParameterResolver", 3)?;
        state.serialize_field("resolver", &self.resolver_name)?;
        if self.confidential {
            state.serialize_field("config", "****")?;
        } else {
            state.serialize_field("config", &self.config)?;
        }
        state.serialize_field("immutable", &self.immutable)?;
        state.end()
    }
}

/// A stack parameter, single valued or a list
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ParameterSpec {
    Single(ParameterResolver),
    List {
        items: Vec<ParameterResolver>,
        confidential: bool,
        immutable: bool,
    },
}

impl ParameterSpec {
    /// Paths the resolvers of this parameter read from, as declared
    pub fn dependencies(&self) -> Vec<String> {
        match self {
            Self::Single(p) => p.resolver.dependencies(),
            Self::List { items, .. } => items.iter().flat_map(|p| p.resolver.dependencies()).collect(),
        }
    }

    pub fn is_confidential(&self) -> bool {
        match self {
            Self::Single(p) => p.confidential,
            Self::List { confidential, items, .. } => *confidential || items.iter().any(|p| p.confidential),
        }
    }
}

/// A deployable stack in one region
#[derive(Debug, Clone, Serialize)]
pub struct Stack {
    pub path: StackPath,
    pub name: String,
    pub region: String,
    pub stack_group_path: StackGroupPath,
    pub module: ModuleInformation,
    pub template: TemplateConfig,
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(flatten)]
    pub props: InheritedProperties,
    /// Explicitly declared dependencies, as absolute paths
    pub depends: Vec<String>,
    /// Expanded stack dependencies, filled in by graph resolution
    pub dependencies: Vec<StackPath>,
    /// Stacks depending on this one, filled in by graph resolution
    pub dependents: Vec<StackPath>,
}

impl Stack {
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
        stack_group_path: impl Into<String>,
        module: ModuleInformation,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            region: region.into(),
            stack_group_path: stack_group_path.into(),
            module,
            template: TemplateConfig::default(),
            parameters: BTreeMap::new(),
            props: InheritedProperties::default(),
            depends: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    pub fn is_obsolete(&self) -> bool {
        self.props.obsolete
    }

    pub fn is_ignored(&self) -> bool {
        self.props.ignore
    }

    /// Path of the config file this stack was built from
    pub fn config_path(&self) -> String {
        stack_config_path(&self.path)
    }

    /// Resolve a path declared in this stack's configuration
    pub fn resolve_path(&self, declared: &str) -> String {
        self.module.resolve_path(&self.stack_group_path, declared)
    }

    /// Explicit and parameter implied dependencies, as absolute paths
    pub fn declared_dependencies(&self) -> Vec<String> {
        let mut declared = self.depends.clone();
        for spec in self.parameters.values() {
            for dependency in spec.dependencies() {
                let resolved = self.resolve_path(&dependency);
                if !declared.contains(&resolved) {
                    declared.push(resolved);
                }
            }
        }
        declared
    }

    /// Variables describing this stack to hooks and templates
    pub fn variables(&self) -> Value {
        json!({
            "path": self.path,
            "pathSegments": segments(&self.path),
            "name": self.name,
            "region": self.region,
            "project": self.props.project,
            "tags": self.props.tags,
            "data": self.props.data,
        })
    }
}

/// Arena of every resolved entity
pub struct StacksContext {
    stack_groups: BTreeMap<StackGroupPath, StackGroup>,
    stacks: BTreeMap<StackPath, Arc<Stack>>,
    modules: BTreeMap<ModulePath, Module>,
    sources: BTreeMap<ModulePath, Arc<dyn ConfigSource>>,
}

impl StacksContext {
    pub(crate) fn new(
        stack_groups: BTreeMap<StackGroupPath, StackGroup>,
        stacks: BTreeMap<StackPath, Arc<Stack>>,
        modules: BTreeMap<ModulePath, Module>,
        sources: BTreeMap<ModulePath, Arc<dyn ConfigSource>>,
    ) -> Self {
        Self {
            stack_groups,
            stacks,
            modules,
            sources,
        }
    }

    pub fn root_stack_group(&self) -> Result<&StackGroup> {
        self.stack_group(ROOT_STACK_GROUP_PATH)
            .ok_or_else(|| Error::NotFound {
                kind: "stack group",
                path: ROOT_STACK_GROUP_PATH.to_string(),
            })
    }

    pub fn stack_group(&self, path: &str) -> Option<&StackGroup> {
        self.stack_groups.get(path)
    }

    pub fn stack_groups(&self) -> impl Iterator<Item = &StackGroup> {
        self.stack_groups.values()
    }

    pub fn stack(&self, path: &str) -> Option<&Arc<Stack>> {
        self.stacks.get(path)
    }

    /// All stacks ordered by path
    pub fn stacks(&self) -> impl Iterator<Item = &Arc<Stack>> {
        self.stacks.values()
    }

    /// Stacks whose path starts with the command path
    pub fn stacks_within(&self, command_path: &str) -> Vec<&Arc<Stack>> {
        self.stacks
            .values()
            .filter(|s| path_starts_with(&s.path, command_path))
            .collect()
    }

    /// Stacks matched by a path declared in another stack's configuration
    pub fn stacks_by_path(&self, declared: &str, from: &Stack) -> Vec<&Arc<Stack>> {
        let resolved = from.resolve_path(declared);
        self.stacks_within(&resolved)
    }

    pub fn module(&self, path: &str) -> Option<&Module> {
        self.modules.get(path)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Config source of the module a stack belongs to
    pub fn config_source(&self, module_path: &str) -> Result<&Arc<dyn ConfigSource>> {
        self.sources.get(module_path).ok_or_else(|| Error::NotFound {
            kind: "module",
            path: module_path.to_string(),
        })
    }
}

impl fmt::Debug for StacksContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StacksContext")
            .field("stack_groups", &self.stack_groups.keys().collect::<Vec<_>>())
            .field("stacks", &self.stacks.keys().collect::<Vec<_>>())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_information_paths() {
        let root = ModuleInformation::root();
        assert_eq!(root.absolute_path("/a.yml"), "/a.yml");
        assert_eq!(root.resolve_path("/dev", "b.yml"), "/dev/b.yml");

        let net = root.child("/env/net.module.yml", "net");
        assert_eq!(net.name, "net");
        assert_eq!(net.stack_name_prefix, "net-");
        assert_eq!(net.absolute_path("/sub/a.yml"), "/env/net.module.yml/sub/a.yml");
        assert_eq!(net.relative_path("/env/net.module.yml/sub"), "/sub");
        assert_eq!(net.relative_path("/env/net.module.yml"), "/");
        assert_eq!(
            net.resolve_path("/env/net.module.yml/sub", "../b.yml"),
            "/env/net.module.yml/b.yml"
        );

        let inner = net.child("/env/net.module.yml/dns.module.yml", "dns");
        assert_eq!(inner.name, "net-dns");
        assert_eq!(inner.stack_name_prefix, "net-dns-");
    }

    #[test]
    fn test_apply_inherits_unspecified() {
        let parent = InheritedProperties {
            regions: vec!["eu-west-1".into()],
            tags: Tags::from([("team".to_string(), "core".to_string())]),
            obsolete: true,
            command_role: Some("deployer".into()),
            ..InheritedProperties::default()
        };

        let child = parent.apply(&EntityConfig {
            tags: Tags::from([("env".to_string(), "dev".to_string())]),
            ..EntityConfig::default()
        });
        assert_eq!(child.regions, vec!["eu-west-1"]);
        assert!(child.obsolete);
        assert_eq!(child.command_role.as_deref(), Some("deployer"));
        assert_eq!(child.tags.len(), 2);

        let overridden = parent.apply(&EntityConfig {
            obsolete: Some(false),
            inherit_tags: false,
            regions: vec!["us-east-1".into()],
            ..EntityConfig::default()
        });
        assert!(!overridden.obsolete);
        assert!(overridden.tags.is_empty());
        assert_eq!(overridden.regions, vec!["us-east-1"]);
    }

    #[test]
    fn test_apply_merges_data_and_hooks() {
        let parent = InheritedProperties {
            data: json!({ "network": { "cidr": "10.0.0.0/8", "zones": 2 } })
                .as_object()
                .cloned()
                .unwrap(),
            hooks: vec![
                HookConfig::new("notify", "cmd", json!({ "command": "a" })),
                HookConfig::new("audit", "cmd", json!({ "command": "b" })),
            ],
            ..InheritedProperties::default()
        };

        let child = parent.apply(&EntityConfig {
            data: json!({ "network": { "zones": 3 } }).as_object().cloned().unwrap(),
            hooks: vec![HookConfig::new("notify", "cmd", json!({ "command": "c" }))],
            ..EntityConfig::default()
        });

        assert_eq!(child.data["network"]["cidr"], "10.0.0.0/8");
        assert_eq!(child.data["network"]["zones"], 3);
        assert_eq!(child.hooks.len(), 2);
        assert_eq!(child.hooks[0].config["command"], "c");
    }

    #[test]
    fn test_stack_resolve_path_inside_module() {
        let module = ModuleInformation::root().child("/env/net.module.yml", "net");
        let stack = Stack::new(
            "/env/net.module.yml/sub/a.yml/eu-west-1",
            "net-sub-a",
            "eu-west-1",
            "/env/net.module.yml/sub",
            module,
        );
        assert_eq!(stack.resolve_path("/b.yml"), "/env/net.module.yml/b.yml");
        assert_eq!(stack.resolve_path("c.yml"), "/env/net.module.yml/sub/c.yml");
        assert_eq!(stack.config_path(), "/env/net.module.yml/sub/a.yml");
    }
}
