//! Configuration tree and typed configuration records
//!
//! A [`ConfigSource`] exposes the hierarchy of stack groups, stacks and
//! module references as a [`ConfigTree`]. Node configuration is loaded
//! lazily: each node carries a loader that is called with the variables
//! of its surroundings once the entity builder reaches it.
//!
//! Raw records (parsed from YAML or built in memory) are turned into the
//! typed config structs by [`parse_stack_group_config`],
//! [`parse_stack_config`] and [`parse_module_config`]. Records are checked
//! against a JSON schema first, so every violated rule is reported instead
//! of only the first one.

use crate::error::{Error, Result};
use crate::hooks::{HookConfig, HookOperation, HookStage, HookStatus};
use crate::path::{
    is_stack_group_path, is_stack_path, path_starts_with, ModulePath, StackGroupPath, StackPath,
    ROOT_STACK_GROUP_PATH,
};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Variables available while loading node configuration
pub type Variables = Value;

/// Remote stack tags
pub type Tags = BTreeMap<String, String>;

/// Timeouts for remote operations, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub create: u64,
    pub update: u64,
}

/// Bucket used to upload templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TemplateBucketConfig {
    pub name: String,
    pub key_prefix: Option<String>,
}

/// Attributes shared by stack groups, modules and stacks
///
/// Every `Option` is "not specified here": the value is then inherited.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityConfig {
    pub project: Option<String>,
    pub regions: Vec<String>,
    pub account_ids: Option<Vec<String>>,
    pub command_role: Option<String>,
    pub template_bucket: Option<TemplateBucketConfig>,
    pub tags: Tags,
    pub inherit_tags: bool,
    pub timeout: Option<TimeoutConfig>,
    pub hooks: Vec<HookConfig>,
    pub data: Map<String, Value>,
    pub ignore: Option<bool>,
    pub obsolete: Option<bool>,
    pub termination_protection: Option<bool>,
    pub capabilities: Option<Vec<String>>,
    pub stack_policy: Option<String>,
    pub stack_policy_during_update: Option<String>,
    pub schemas: Option<Value>,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            project: None,
            regions: Vec::new(),
            account_ids: None,
            command_role: None,
            template_bucket: None,
            tags: Tags::new(),
            inherit_tags: true,
            timeout: None,
            hooks: Vec::new(),
            data: Map::new(),
            ignore: None,
            obsolete: None,
            termination_protection: None,
            capabilities: None,
            stack_policy: None,
            stack_policy_during_update: None,
            schemas: None,
        }
    }
}

/// Configuration of a stack group (`config.yml`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackGroupConfig {
    pub common: EntityConfig,
}

/// Where a stack's template comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateConfig {
    /// File relative to the templates directory
    pub filename: Option<String>,
    /// Template body given inline
    pub inline: Option<String>,
    /// Whether the template is rendered before use
    pub dynamic: bool,
}

/// One parameter resolver as configured
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterConfig {
    pub resolver: String,
    pub confidential: bool,
    pub immutable: bool,
    /// Resolver specific settings
    pub config: Value,
}

impl ParameterConfig {
    /// Parameter with a fixed value
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            resolver: "static".to_string(),
            confidential: false,
            immutable: false,
            config: serde_json::json!({ "value": value.into() }),
        }
    }

    /// Parameter resolved by the named resolver
    pub fn resolver(name: impl Into<String>, config: Value) -> Self {
        Self {
            resolver: name.into(),
            confidential: false,
            immutable: false,
            config,
        }
    }
}

/// Parameter configuration, single valued or a list
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterConfigs {
    Single(ParameterConfig),
    List {
        items: Vec<ParameterConfig>,
        confidential: bool,
        immutable: bool,
    },
}

/// Configuration of a stack
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackConfig {
    pub common: EntityConfig,
    pub name: Option<String>,
    pub template: Option<TemplateConfig>,
    pub depends: Vec<String>,
    pub parameters: BTreeMap<String, ParameterConfigs>,
}

/// Configuration of a module reference (`*.module.yml`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleConfig {
    pub common: EntityConfig,
    pub id: String,
    pub version: String,
    pub name: Option<String>,
    pub depends: Vec<String>,
}

// ============================================================================
// Record parsing
// ============================================================================
//
// Records are first checked against a JSON schema, which reports every
// violation at once, and then deserialized into the raw records below.

fn string_or_list() -> Value {
    json!({
        "oneOf": [
            { "type": "string" },
            { "type": "array", "items": { "type": "string" } }
        ]
    })
}

fn one_or_many_of(values: &[&str]) -> Value {
    json!({
        "oneOf": [
            { "enum": values },
            { "type": "array", "items": { "enum": values } }
        ]
    })
}

fn entity_properties() -> Map<String, Value> {
    let text = json!({ "type": "string", "minLength": 1 });
    let flag = json!({ "type": "boolean" });
    let seconds = json!({ "type": "integer", "minimum": 0 });

    let hook = json!({
        "type": "object",
        "required": ["name", "type"],
        "properties": {
            "name": text,
            "type": text,
            "stage": one_or_many_of(&["before", "after"]),
            "operation": one_or_many_of(&["create", "update", "delete"]),
            "status": one_or_many_of(&["success", "failed", "cancelled", "skipped"])
        }
    });

    let properties = json!({
        "project": text,
        "regions": string_or_list(),
        "accountIds": string_or_list(),
        "commandRole": text,
        "templateBucket": {
            "type": "object",
            "required": ["name"],
            "properties": { "name": text, "keyPrefix": { "type": "string" } },
            "additionalProperties": false
        },
        "tags": {
            "type": "object",
            "additionalProperties": { "type": ["string", "number", "boolean"] }
        },
        "inheritTags": flag,
        "timeout": {
            "oneOf": [
                seconds,
                {
                    "type": "object",
                    "properties": { "create": seconds, "update": seconds },
                    "additionalProperties": false
                }
            ]
        },
        "hooks": { "type": "array", "items": hook },
        "data": { "type": "object" },
        "ignore": flag,
        "obsolete": flag,
        "terminationProtection": flag,
        "capabilities": string_or_list(),
        "stackPolicy": text,
        "stackPolicyDuringUpdate": text,
        "schemas": {}
    });

    match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn record_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = entity_properties();
    if let Value::Object(extra) = extra {
        properties.extend(extra);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn stack_group_schema() -> Value {
    record_schema(json!({}), &[])
}

fn stack_schema() -> Value {
    let scalar = json!({ "type": ["string", "number", "boolean"] });
    let resolver = json!({
        "type": "object",
        "anyOf": [{ "required": ["resolver"] }, { "required": ["value"] }],
        "properties": {
            "resolver": { "type": "string", "minLength": 1 },
            "confidential": { "type": "boolean" },
            "immutable": { "type": "boolean" }
        }
    });
    let item = json!({ "anyOf": [scalar, resolver] });
    let parameter = json!({
        "anyOf": [item, { "type": "array", "items": item }]
    });

    record_schema(
        json!({
            "name": { "type": "string", "minLength": 1 },
            "template": {
                "oneOf": [
                    { "type": "string", "minLength": 1 },
                    {
                        "type": "object",
                        "properties": {
                            "filename": { "type": "string", "minLength": 1 },
                            "inline": { "type": "string" },
                            "dynamic": { "type": "boolean" }
                        },
                        "additionalProperties": false,
                        "not": { "required": ["filename", "inline"] }
                    }
                ]
            },
            "depends": string_or_list(),
            "parameters": { "type": "object", "additionalProperties": parameter }
        }),
        &[],
    )
}

fn module_schema() -> Value {
    let text = json!({ "type": "string", "minLength": 1 });
    record_schema(
        json!({
            "id": text,
            "version": text,
            "name": text,
            "depends": string_or_list()
        }),
        &["id", "version"],
    )
}

static STACK_GROUP_SCHEMA: LazyLock<Value> = LazyLock::new(stack_group_schema);
static STACK_SCHEMA: LazyLock<Value> = LazyLock::new(stack_schema);
static MODULE_SCHEMA: LazyLock<Value> = LazyLock::new(module_schema);

/// Every schema violation of a record, prefixed with its location
fn schema_violations(schema: &Value, record: &Value) -> Vec<String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(e) => return vec![format!("invalid configuration schema: {e}")],
    };
    validator
        .iter_errors(record)
        .map(|e| {
            let location = e.instance_path.to_string();
            if location.is_empty() {
                e.to_string()
            } else {
                format!("{location}: {e}")
            }
        })
        .collect()
}

/// Validate a record and deserialize it
///
/// An empty document is an empty record and keys without a value count
/// as not specified.
fn parse_record<R: DeserializeOwned>(schema: &Value, value: &Value) -> std::result::Result<R, Vec<String>> {
    let record = match value {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    };

    let violations = schema_violations(schema, &record);
    if !violations.is_empty() {
        return Err(violations);
    }
    serde_json::from_value(record).map_err(|e| vec![e.to_string()])
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

fn many<T>(value: Option<OneOrMany<T>>) -> Option<Vec<T>> {
    value.map(Vec::from)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl From<TagValue> for String {
    fn from(value: TagValue) -> Self {
        match value {
            TagValue::Text(s) => s,
            TagValue::Number(n) => n.to_string(),
            TagValue::Flag(b) => b.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Seconds(u64),
    Split {
        #[serde(default)]
        create: u64,
        #[serde(default)]
        update: u64,
    },
}

impl From<RawTimeout> for TimeoutConfig {
    fn from(value: RawTimeout) -> Self {
        match value {
            RawTimeout::Seconds(seconds) => Self {
                create: seconds,
                update: seconds,
            },
            RawTimeout::Split { create, update } => Self { create, update },
        }
    }
}

#[derive(Deserialize)]
struct RawHook {
    name: String,
    #[serde(rename = "type")]
    hook_type: String,
    stage: Option<OneOrMany<HookStage>>,
    operation: Option<OneOrMany<HookOperation>>,
    status: Option<OneOrMany<HookStatus>>,
    /// Everything else configures the hook type
    #[serde(flatten)]
    config: Map<String, Value>,
}

impl From<RawHook> for HookConfig {
    fn from(raw: RawHook) -> Self {
        Self {
            name: raw.name,
            hook_type: raw.hook_type,
            stage: many(raw.stage),
            operation: many(raw.operation),
            status: many(raw.status),
            config: Value::Object(raw.config),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawEntity {
    project: Option<String>,
    regions: Option<OneOrMany<String>>,
    account_ids: Option<OneOrMany<String>>,
    command_role: Option<String>,
    template_bucket: Option<TemplateBucketConfig>,
    tags: BTreeMap<String, TagValue>,
    inherit_tags: Option<bool>,
    timeout: Option<RawTimeout>,
    hooks: Vec<RawHook>,
    data: Map<String, Value>,
    ignore: Option<bool>,
    obsolete: Option<bool>,
    termination_protection: Option<bool>,
    capabilities: Option<OneOrMany<String>>,
    stack_policy: Option<String>,
    stack_policy_during_update: Option<String>,
    schemas: Option<Value>,
}

impl From<RawEntity> for EntityConfig {
    fn from(raw: RawEntity) -> Self {
        Self {
            project: raw.project,
            regions: many(raw.regions).unwrap_or_default(),
            account_ids: many(raw.account_ids),
            command_role: raw.command_role,
            template_bucket: raw.template_bucket,
            tags: raw.tags.into_iter().map(|(k, v)| (k, v.into())).collect(),
            inherit_tags: raw.inherit_tags.unwrap_or(true),
            timeout: raw.timeout.map(TimeoutConfig::from),
            hooks: raw.hooks.into_iter().map(HookConfig::from).collect(),
            data: raw.data,
            ignore: raw.ignore,
            obsolete: raw.obsolete,
            termination_protection: raw.termination_protection,
            capabilities: many(raw.capabilities),
            stack_policy: raw.stack_policy,
            stack_policy_during_update: raw.stack_policy_during_update,
            schemas: raw.schemas,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTemplate {
    Filename(String),
    Spec(TemplateConfig),
}

impl From<RawTemplate> for TemplateConfig {
    fn from(raw: RawTemplate) -> Self {
        match raw {
            RawTemplate::Filename(filename) => Self {
                filename: Some(filename),
                ..Self::default()
            },
            RawTemplate::Spec(spec) => spec,
        }
    }
}

/// Parameter given as an object; keys other than the flags configure
/// the resolver
#[derive(Deserialize)]
struct RawResolverParameter {
    resolver: Option<String>,
    #[serde(default)]
    confidential: bool,
    #[serde(default)]
    immutable: bool,
    #[serde(default, rename = "schema")]
    _schema: Option<IgnoredAny>,
    #[serde(flatten)]
    config: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParameterItem {
    Resolver(RawResolverParameter),
    Value(Value),
}

impl From<RawParameterItem> for ParameterConfig {
    fn from(raw: RawParameterItem) -> Self {
        match raw {
            RawParameterItem::Value(value) => Self::value(value),
            RawParameterItem::Resolver(raw) => Self {
                resolver: raw.resolver.unwrap_or_else(|| "static".to_string()),
                confidential: raw.confidential,
                immutable: raw.immutable,
                config: Value::Object(raw.config),
            },
        }
    }
}

/// List parameter with flags, `{ value: [...], confidential: true }`
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParameterList {
    value: Vec<RawParameterItem>,
    #[serde(default)]
    confidential: bool,
    #[serde(default)]
    immutable: bool,
    #[serde(default, rename = "schema")]
    _schema: Option<IgnoredAny>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParameter {
    List(Vec<RawParameterItem>),
    FlaggedList(RawParameterList),
    Single(RawParameterItem),
}

impl From<RawParameter> for ParameterConfigs {
    fn from(raw: RawParameter) -> Self {
        let items = |items: Vec<RawParameterItem>| items.into_iter().map(ParameterConfig::from).collect();
        match raw {
            RawParameter::List(list) => Self::List {
                items: items(list),
                confidential: false,
                immutable: false,
            },
            RawParameter::FlaggedList(list) => Self::List {
                items: items(list.value),
                confidential: list.confidential,
                immutable: list.immutable,
            },
            RawParameter::Single(item) => Self::Single(item.into()),
        }
    }
}

#[derive(Deserialize)]
struct RawStack {
    #[serde(flatten)]
    common: RawEntity,
    name: Option<String>,
    template: Option<RawTemplate>,
    depends: Option<OneOrMany<String>>,
    #[serde(default)]
    parameters: BTreeMap<String, RawParameter>,
}

#[derive(Deserialize)]
struct RawModule {
    #[serde(flatten)]
    common: RawEntity,
    id: String,
    version: String,
    name: Option<String>,
    depends: Option<OneOrMany<String>>,
}

/// Parse a stack group record
pub fn parse_stack_group_config(value: &Value) -> std::result::Result<StackGroupConfig, Vec<String>> {
    let raw: RawEntity = parse_record(&STACK_GROUP_SCHEMA, value)?;
    Ok(StackGroupConfig { common: raw.into() })
}

/// Parse a stack record
pub fn parse_stack_config(value: &Value) -> std::result::Result<StackConfig, Vec<String>> {
    let raw: RawStack = parse_record(&STACK_SCHEMA, value)?;
    Ok(StackConfig {
        common: raw.common.into(),
        name: raw.name,
        template: raw.template.map(TemplateConfig::from),
        depends: many(raw.depends).unwrap_or_default(),
        parameters: raw
            .parameters
            .into_iter()
            .map(|(name, parameter)| (name, parameter.into()))
            .collect(),
    })
}

/// Parse a module reference record
pub fn parse_module_config(value: &Value) -> std::result::Result<ModuleConfig, Vec<String>> {
    let raw: RawModule = parse_record(&MODULE_SCHEMA, value)?;
    Ok(ModuleConfig {
        common: raw.common.into(),
        id: raw.id,
        version: raw.version,
        name: raw.name,
        depends: many(raw.depends).unwrap_or_default(),
    })
}

// ============================================================================
// Configuration tree
// ============================================================================

/// Deferred configuration loader supplied by a config source
pub type ConfigLoader<T> = Arc<dyn Fn(&Variables) -> Result<T> + Send + Sync>;

/// A stack config file in the tree
#[derive(Clone)]
pub struct StackConfigNode {
    /// Path of the config file, without region
    pub path: StackPath,
    loader: ConfigLoader<StackConfig>,
}

impl StackConfigNode {
    pub fn new(
        path: impl Into<String>,
        loader: impl Fn(&Variables) -> Result<StackConfig> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            loader: Arc::new(loader),
        }
    }

    pub fn get_config(&self, variables: &Variables) -> Result<StackConfig> {
        (self.loader)(variables)
    }
}

impl fmt::Debug for StackConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackConfigNode").field("path", &self.path).finish()
    }
}

/// A module reference file in the tree
#[derive(Clone)]
pub struct ModuleConfigNode {
    pub path: ModulePath,
    loader: ConfigLoader<ModuleConfig>,
}

impl ModuleConfigNode {
    pub fn new(
        path: impl Into<String>,
        loader: impl Fn(&Variables) -> Result<ModuleConfig> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            loader: Arc::new(loader),
        }
    }

    pub fn get_config(&self, variables: &Variables) -> Result<ModuleConfig> {
        (self.loader)(variables)
    }
}

impl fmt::Debug for ModuleConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleConfigNode").field("path", &self.path).finish()
    }
}

/// A stack group directory in the tree
#[derive(Clone)]
pub struct StackGroupConfigNode {
    pub path: StackGroupPath,
    pub name: String,
    pub parent_path: Option<StackGroupPath>,
    pub children: Vec<StackGroupConfigNode>,
    pub stacks: Vec<StackConfigNode>,
    pub modules: Vec<ModuleConfigNode>,
    loader: ConfigLoader<Option<StackGroupConfig>>,
}

impl StackGroupConfigNode {
    pub fn new(
        path: impl Into<String>,
        parent_path: Option<String>,
        loader: impl Fn(&Variables) -> Result<Option<StackGroupConfig>> + Send + Sync + 'static,
    ) -> Self {
        let path = path.into();
        let name = crate::path::last_segment(&path).to_string();
        Self {
            path,
            name,
            parent_path,
            children: Vec::new(),
            stacks: Vec::new(),
            modules: Vec::new(),
            loader: Arc::new(loader),
        }
    }

    /// Load the group configuration, `None` when the group has no config file
    pub fn get_config(&self, variables: &Variables) -> Result<Option<StackGroupConfig>> {
        (self.loader)(variables)
    }

    fn collect<'a>(&'a self, groups: &mut Vec<&'a StackGroupConfigNode>) {
        groups.push(self);
        for child in &self.children {
            child.collect(groups);
        }
    }
}

impl fmt::Debug for StackGroupConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackGroupConfigNode")
            .field("path", &self.path)
            .field("children", &self.children)
            .field("stacks", &self.stacks)
            .field("modules", &self.modules)
            .finish()
    }
}

/// Root of a configuration hierarchy
#[derive(Debug, Clone)]
pub struct ConfigTree {
    pub root: StackGroupConfigNode,
}

impl ConfigTree {
    /// All group nodes, depth first
    pub fn stack_groups(&self) -> Vec<&StackGroupConfigNode> {
        let mut groups = Vec::new();
        self.root.collect(&mut groups);
        groups
    }

    /// Paths of all stack config files
    pub fn stack_config_paths(&self) -> Vec<StackPath> {
        self.stack_groups()
            .iter()
            .flat_map(|g| g.stacks.iter().map(|s| s.path.clone()))
            .collect()
    }

    /// Paths of all module references
    pub fn module_paths(&self) -> Vec<ModulePath> {
        self.stack_groups()
            .iter()
            .flat_map(|g| g.modules.iter().map(|m| m.path.clone()))
            .collect()
    }
}

/// Provider of configuration trees and templates
pub trait ConfigSource: Send + Sync {
    /// Build the full hierarchy; node configuration stays unloaded
    fn build_config_tree(&self) -> Result<ConfigTree>;

    /// Contents of a stack template
    fn get_stack_template_contents(&self, template: &TemplateConfig) -> Result<String>;

    /// Source of a module's own configuration tree
    ///
    /// Fails with [`Error::ModuleNotFound`] naming both coordinates.
    fn config_source_for_module(&self, id: &str, version: &str) -> Result<Arc<dyn ConfigSource>>;
}

/// Check that a command path selects something in the tree
///
/// A group path must name an existing group and a stack path must have an
/// existing stack config file as prefix. Paths that lead into a module are
/// accepted here and resolved against the module's own tree later.
pub fn validate_command_path(tree: &ConfigTree, command_path: &str) -> Result<()> {
    if command_path == ROOT_STACK_GROUP_PATH {
        return Ok(());
    }

    if tree
        .module_paths()
        .iter()
        .any(|m| path_starts_with(command_path, m))
    {
        return Ok(());
    }

    let stack_paths = tree.stack_config_paths();
    let found = if is_stack_group_path(command_path) {
        tree.stack_groups()
            .iter()
            .any(|g| g.path == command_path)
    } else if is_stack_path(command_path) {
        stack_paths.iter().any(|s| path_starts_with(command_path, s))
    } else {
        false
    };

    if found {
        Ok(())
    } else {
        Err(Error::CommandPathMatchesNoStacks {
            command_path: command_path.to_string(),
            available: stack_paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stack_config() {
        let config = parse_stack_config(&json!({
            "name": "vpc",
            "regions": ["eu-west-1", "us-east-1"],
            "depends": "/dev/logs.yml",
            "template": "network/vpc.yml",
            "tags": { "env": "dev", "cost": 12 },
            "inheritTags": false,
            "parameters": {
                "Cidr": "10.0.0.0/16",
                "LogBucket": { "resolver": "stack-output", "stack": "/dev/logs.yml", "output": "Bucket" },
                "Zones": ["a", "b"]
            }
        }))
        .unwrap();

        assert_eq!(config.name.as_deref(), Some("vpc"));
        assert_eq!(config.common.regions, vec!["eu-west-1", "us-east-1"]);
        assert_eq!(config.depends, vec!["/dev/logs.yml"]);
        assert_eq!(config.common.tags.get("cost").map(String::as_str), Some("12"));
        assert!(!config.common.inherit_tags);
        assert_eq!(
            config.template.and_then(|t| t.filename).as_deref(),
            Some("network/vpc.yml")
        );

        match &config.parameters["LogBucket"] {
            ParameterConfigs::Single(p) => {
                assert_eq!(p.resolver, "stack-output");
                assert_eq!(p.config["output"], "Bucket");
                assert!(p.config.get("resolver").is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&config.parameters["Zones"], ParameterConfigs::List { items, .. } if items.len() == 2));
        assert!(matches!(&config.parameters["Cidr"], ParameterConfigs::Single(p) if p.resolver == "static"));
    }

    #[test]
    fn test_parse_collects_every_error() {
        let errors = parse_stack_config(&json!({
            "regions": 5,
            "ignore": "yes",
            "unknown": true,
            "hooks": [{ "name": "h" }]
        }))
        .unwrap_err();

        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("/regions:")));
        assert!(errors.iter().any(|e| e.starts_with("/ignore:") && e.contains("boolean")));
        assert!(errors.iter().any(|e| e.contains("'unknown' was unexpected")));
        assert!(errors.iter().any(|e| e.starts_with("/hooks/0:") && e.contains("\"type\"")));
    }

    #[test]
    fn test_parse_rejects_bad_nested_values() {
        let errors = parse_stack_config(&json!({
            "template": { "filename": "a.yml", "inline": "Resources: {}" },
            "timeout": { "create": -1 },
            "tags": { "env": ["dev"] },
            "parameters": { "Size": { "confidential": true } }
        }))
        .unwrap_err();

        assert!(errors.iter().any(|e| e.starts_with("/template:")), "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("/timeout:")), "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("/tags/env:")), "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("/parameters/Size:")), "{errors:?}");
    }

    #[test]
    fn test_parse_parameter_forms() {
        let config = parse_stack_config(&json!({
            "timeout": 300,
            "templateBucket": { "name": "templates", "keyPrefix": "dev/" },
            "parameters": {
                "Count": 3,
                "Secret": { "value": "hunter2", "confidential": true },
                "Subnets": { "value": ["a", { "resolver": "env", "name": "SUBNET" }], "immutable": true },
                "Cidr": { "resolver": "static", "value": "10.0.0.0/16", "schema": { "name": "cidr" } }
            }
        }))
        .unwrap();

        assert_eq!(config.common.timeout, Some(TimeoutConfig { create: 300, update: 300 }));
        assert_eq!(
            config.common.template_bucket.and_then(|b| b.key_prefix).as_deref(),
            Some("dev/")
        );
        match &config.parameters["Secret"] {
            ParameterConfigs::Single(p) => {
                assert_eq!(p.resolver, "static");
                assert!(p.confidential);
                assert_eq!(p.config, json!({ "value": "hunter2" }));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &config.parameters["Subnets"] {
            ParameterConfigs::List { items, immutable, .. } => {
                assert!(*immutable);
                assert_eq!(items[1].resolver, "env");
                assert_eq!(items[1].config, json!({ "name": "SUBNET" }));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &config.parameters["Cidr"] {
            ParameterConfigs::Single(p) => assert_eq!(p.config, json!({ "value": "10.0.0.0/16" })),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&config.parameters["Count"], ParameterConfigs::Single(p) if p.config["value"] == 3));
    }

    #[test]
    fn test_parse_hooks() {
        let config = parse_stack_group_config(&json!({
            "hooks": [{
                "name": "notify",
                "type": "cmd",
                "stage": "after",
                "status": ["failed", "cancelled"],
                "command": "echo done"
            }]
        }))
        .unwrap();

        let hook = &config.common.hooks[0];
        assert_eq!(hook.hook_type, "cmd");
        assert_eq!(hook.stage, Some(vec![HookStage::After]));
        assert_eq!(hook.status, Some(vec![HookStatus::Failed, HookStatus::Cancelled]));
        assert_eq!(hook.config["command"], "echo done");
    }

    #[test]
    fn test_parse_module_requires_coordinates() {
        let errors = parse_module_config(&json!({ "name": "network" })).unwrap_err();
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("\"id\"")));
        assert!(errors.iter().any(|e| e.contains("\"version\"")));

        let module = parse_module_config(&json!({ "id": "network", "version": "1.0", "obsolete": true })).unwrap();
        assert_eq!(module.id, "network");
        assert_eq!(module.common.obsolete, Some(true));
    }

    #[test]
    fn test_empty_record_is_default() {
        let config = parse_stack_group_config(&Value::Null).unwrap();
        assert_eq!(config, StackGroupConfig::default());
        assert!(config.common.inherit_tags);
    }

    fn tree() -> ConfigTree {
        let mut root = StackGroupConfigNode::new("/", None, |_| Ok(None));
        let mut dev = StackGroupConfigNode::new("/dev", Some("/".into()), |_| Ok(None));
        dev.stacks
            .push(StackConfigNode::new("/dev/vpc.yml", |_| Ok(StackConfig::default())));
        dev.modules
            .push(ModuleConfigNode::new("/dev/net.module.yml", |_| Ok(ModuleConfig::default())));
        root.children.push(dev);
        ConfigTree { root }
    }

    #[test]
    fn test_validate_command_path() {
        let tree = tree();
        assert!(validate_command_path(&tree, "/").is_ok());
        assert!(validate_command_path(&tree, "/dev").is_ok());
        assert!(validate_command_path(&tree, "/dev/vpc.yml").is_ok());
        assert!(validate_command_path(&tree, "/dev/vpc.yml/eu-west-1").is_ok());
        assert!(validate_command_path(&tree, "/dev/net.module.yml/a.yml").is_ok());

        let err = validate_command_path(&tree, "/prod").unwrap_err();
        match err {
            Error::CommandPathMatchesNoStacks { available, .. } => {
                assert_eq!(available, vec!["/dev/vpc.yml"]);
            }
            other => panic!("unexpected {other}"),
        }
        assert!(validate_command_path(&tree, "/dev/db.yml").is_err());
    }
}
