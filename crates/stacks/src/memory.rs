//! In-memory configuration source and stack client
//!
//! [`MemoryConfigSource`] holds typed configuration keyed by path. Group
//! nodes are created for every ancestor of a registered stack or module.
//! [`MemoryStackClient`] keeps remote state in a map and records every
//! call made to it. Both are useful for embedding the engine and for tests.

use crate::client::{
    DeployRequest, OperationResult, RemoteStackSummary, StackClient, StackEvent, StackStatus,
};
use crate::config::{
    ConfigSource, ConfigTree, ModuleConfig, ModuleConfigNode, StackConfig, StackConfigNode,
    StackGroupConfig, StackGroupConfigNode, TemplateConfig,
};
use crate::error::{Error, Result};
use crate::model::Stack;
use crate::path::{parent_path, ROOT_STACK_GROUP_PATH};
use crate::types::StackOperationType;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type LoadCounter = Arc<Mutex<BTreeMap<String, usize>>>;

/// Configuration source backed by maps
#[derive(Clone, Default)]
pub struct MemoryConfigSource {
    groups: BTreeMap<String, StackGroupConfig>,
    stacks: BTreeMap<String, StackConfig>,
    modules: BTreeMap<String, ModuleConfig>,
    templates: BTreeMap<String, String>,
    module_sources: BTreeMap<(String, String), Arc<dyn ConfigSource>>,
    loads: LoadCounter,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record_load(loads: &LoadCounter, path: &str) {
    *lock(loads).entry(path.to_string()).or_default() += 1;
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add configuration for a stack group
    pub fn with_stack_group(mut self, path: &str, config: StackGroupConfig) -> Self {
        self.groups.insert(path.to_string(), config);
        self
    }

    /// Add a stack config file
    pub fn with_stack(mut self, path: &str, config: StackConfig) -> Self {
        self.stacks.insert(path.to_string(), config);
        self
    }

    /// Add a module reference
    pub fn with_module(mut self, path: &str, config: ModuleConfig) -> Self {
        self.modules.insert(path.to_string(), config);
        self
    }

    /// Add a template by file name
    pub fn with_template(mut self, filename: &str, body: &str) -> Self {
        self.templates.insert(filename.to_string(), body.to_string());
        self
    }

    /// Make a module available under the given coordinates
    pub fn with_module_source(
        mut self,
        id: &str,
        version: &str,
        source: impl ConfigSource + 'static,
    ) -> Self {
        self.module_sources
            .insert((id.to_string(), version.to_string()), Arc::new(source));
        self
    }

    /// How many times the configuration of a path has been loaded
    pub fn load_count(&self, path: &str) -> usize {
        lock(&self.loads)
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn group_paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::from([ROOT_STACK_GROUP_PATH.to_string()]);
        let declared = self
            .groups
            .keys()
            .cloned()
            .chain(self.stacks.keys().filter_map(|p| parent_path(p)))
            .chain(self.modules.keys().filter_map(|p| parent_path(p)));

        for path in declared {
            let mut current = Some(path);
            while let Some(path) = current {
                current = parent_path(&path);
                paths.insert(path);
            }
        }
        paths
    }

    fn build_node(&self, path: &str, group_paths: &BTreeSet<String>) -> StackGroupConfigNode {
        let config = self.groups.get(path).cloned();
        let loads = Arc::clone(&self.loads);
        let key = path.to_string();
        let mut node = StackGroupConfigNode::new(path, parent_path(path), move |_| {
            record_load(&loads, &key);
            Ok(config.clone())
        });

        let is_child = |p: &str| parent_path(p).as_deref() == Some(path);

        node.children = group_paths
            .iter()
            .filter(|g| is_child(g))
            .map(|g| self.build_node(g, group_paths))
            .collect();

        node.stacks = self
            .stacks
            .iter()
            .filter(|(p, _)| is_child(p))
            .map(|(p, config)| {
                let (config, loads, key) = (config.clone(), Arc::clone(&self.loads), p.clone());
                StackConfigNode::new(p.clone(), move |_| {
                    record_load(&loads, &key);
                    Ok(config.clone())
                })
            })
            .collect();

        node.modules = self
            .modules
            .iter()
            .filter(|(p, _)| is_child(p))
            .map(|(p, config)| {
                let (config, loads, key) = (config.clone(), Arc::clone(&self.loads), p.clone());
                ModuleConfigNode::new(p.clone(), move |_| {
                    record_load(&loads, &key);
                    Ok(config.clone())
                })
            })
            .collect();

        node
    }
}

impl ConfigSource for MemoryConfigSource {
    fn build_config_tree(&self) -> Result<ConfigTree> {
        let group_paths = self.group_paths();
        Ok(ConfigTree {
            root: self.build_node(ROOT_STACK_GROUP_PATH, &group_paths),
        })
    }

    fn get_stack_template_contents(&self, template: &TemplateConfig) -> Result<String> {
        if let Some(inline) = &template.inline {
            return Ok(inline.clone());
        }
        let filename = template.filename.clone().unwrap_or_default();
        self.templates
            .get(&filename)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "template",
                path: filename,
            })
    }

    fn config_source_for_module(&self, id: &str, version: &str) -> Result<Arc<dyn ConfigSource>> {
        self.module_sources
            .get(&(id.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| Error::ModuleNotFound {
                id: id.to_string(),
                version: version.to_string(),
            })
    }
}

// ============================================================================
// Stack client
// ============================================================================

/// Stack client keeping remote state in memory, keyed by stack path
#[derive(Default)]
pub struct MemoryStackClient {
    stacks: Mutex<BTreeMap<String, RemoteStackSummary>>,
    templates: Mutex<BTreeMap<String, String>>,
    deploy_failures: BTreeMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MemoryStackClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing remote stack
    #[must_use]
    pub fn with_stack(self, path: &str, summary: RemoteStackSummary) -> Self {
        lock(&self.stacks).insert(path.to_string(), summary);
        self
    }

    /// Make deploys of the stack fail with the given message
    #[must_use]
    pub fn with_deploy_failure(mut self, path: &str, message: &str) -> Self {
        self.deploy_failures
            .insert(path.to_string(), message.to_string());
        self
    }

    /// Every call made so far, as `<method> <stack path>`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Calls that changed remote state (`deploy` and `destroy`)
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("status ") && !c.starts_with("template "))
            .collect()
    }

    pub fn current(&self, path: &str) -> Option<RemoteStackSummary> {
        lock(&self.stacks).get(path).cloned()
    }

    fn record(&self, method: &str, stack: &Stack) {
        lock(&self.calls).push(format!("{method} {}", stack.path));
    }
}

impl StackClient for MemoryStackClient {
    fn get_current_status(&self, stack: &Stack) -> Result<Option<RemoteStackSummary>> {
        self.record("status", stack);
        Ok(self.current(&stack.path))
    }

    fn get_template(&self, stack: &Stack) -> Result<Option<String>> {
        self.record("template", stack);
        Ok(lock(&self.templates).get(&stack.path).cloned())
    }

    fn deploy(&self, request: &DeployRequest<'_>) -> Result<OperationResult> {
        let stack = request.stack;
        self.record("deploy", stack);

        if let Some(message) = self.deploy_failures.get(&stack.path) {
            let event = StackEvent::now(&stack.name, "CREATE_FAILED");
            return Ok(OperationResult::failed(message.clone(), vec![event]));
        }

        let unchanged = lock(&self.templates)
            .get(&stack.path)
            .is_some_and(|t| t == request.template_body);
        if unchanged && request.operation_type == StackOperationType::Update {
            return Ok(OperationResult::unchanged());
        }
        if request.expect_no_changes {
            return Ok(OperationResult::would_change(format!(
                "Stack {} has changes",
                stack.name
            )));
        }

        let status = match request.operation_type {
            StackOperationType::Update => StackStatus::UpdateComplete,
            _ => StackStatus::CreateComplete,
        };
        let mut stacks = lock(&self.stacks);
        let summary = stacks
            .entry(stack.path.clone())
            .or_insert_with(|| RemoteStackSummary::new(&stack.name, status));
        summary.status = status;
        lock(&self.templates).insert(stack.path.clone(), request.template_body.to_string());

        Ok(OperationResult::succeeded(
            format!("Stack {} {}", stack.name, status),
            vec![StackEvent::now(&stack.name, status.as_str())],
        ))
    }

    fn destroy(&self, stack: &Stack) -> Result<OperationResult> {
        self.record("destroy", stack);
        lock(&self.templates).remove(&stack.path);
        match lock(&self.stacks).remove(&stack.path) {
            Some(_) => Ok(OperationResult::succeeded(
                format!("Stack {} deleted", stack.name),
                vec![StackEvent::now(&stack.name, StackStatus::DeleteComplete.as_str())],
            )),
            None => Ok(OperationResult::unchanged()),
        }
    }
}
