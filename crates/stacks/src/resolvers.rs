//! Parameter resolvers
//!
//! A parameter's value is produced by a resolver chosen by name from a
//! [`ResolverRegistry`]. Resolvers are instantiated while stacks are
//! built, which is also when their [`Resolver::dependencies`] feed the
//! dependency graph. They are only invoked when the stack is deployed.

use crate::client::StackClient;
use crate::error::{Error, Result};
use crate::model::{Stack, StacksContext};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a resolver can look at while resolving a value
pub struct ResolverInput<'a> {
    /// Stack whose parameter is being resolved
    pub stack: &'a Stack,
    pub parameter_name: &'a str,
    /// Position within a list parameter
    pub list_index: Option<usize>,
    pub ctx: &'a StacksContext,
    pub client: &'a dyn StackClient,
}

/// Produces the value of one parameter
pub trait Resolver: Send + Sync {
    /// Stack paths this resolver reads from, as declared in configuration
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn resolve(&self, input: &ResolverInput<'_>) -> Result<Value>;
}

/// Factory for resolvers of one kind
pub trait ResolverProvider: Send + Sync {
    /// Name used in configuration
    fn name(&self) -> &str;

    /// Build a resolver from its configuration
    fn init(&self, config: &Value) -> Result<Arc<dyn Resolver>>;
}

/// Resolver kinds available to configuration
pub struct ResolverRegistry {
    providers: BTreeMap<String, Arc<dyn ResolverProvider>>,
}

impl ResolverRegistry {
    /// Registry without any resolvers
    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// Registry with the built-in `static`, `stack-output` and `env` resolvers
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert(Arc::new(StaticResolverProvider));
        registry.insert(Arc::new(StackOutputResolverProvider));
        registry.insert(Arc::new(EnvResolverProvider));
        registry
    }

    fn insert(&mut self, provider: Arc<dyn ResolverProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Register an additional resolver
    ///
    /// Fails if a resolver with the same name is already registered.
    pub fn register(&mut self, provider: Arc<dyn ResolverProvider>) -> Result<()> {
        if self.providers.contains_key(provider.name()) {
            return Err(Error::DuplicateRegistration {
                kind: "Resolver",
                name: provider.name().to_string(),
            });
        }
        self.insert(provider);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Names of all registered resolvers
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Instantiate the named resolver for a parameter of a stack
    pub fn init(
        &self,
        name: &str,
        config: &Value,
        parameter: &str,
        stack: &str,
    ) -> Result<Arc<dyn Resolver>> {
        let provider = self.providers.get(name).ok_or_else(|| Error::UnknownResolver {
            name: name.to_string(),
            parameter: parameter.to_string(),
            stack: stack.to_string(),
        })?;
        provider.init(config)
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn required_string(config: &Value, key: &str, resolver: &str) -> Result<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidConfig {
            subject: format!("{resolver} resolver"),
            message: format!("\"{key}\" is required"),
        })
}

fn resolution_error(input: &ResolverInput<'_>, message: impl Into<String>) -> Error {
    Error::Resolver {
        parameter: input.parameter_name.to_string(),
        stack: input.stack.path.clone(),
        message: message.into(),
    }
}

// ============================================================================
// Built-in: static
// ============================================================================

/// Returns the configured value as is
pub struct StaticResolver {
    value: Value,
}

impl Resolver for StaticResolver {
    fn resolve(&self, _input: &ResolverInput<'_>) -> Result<Value> {
        Ok(self.value.clone())
    }
}

struct StaticResolverProvider;

impl ResolverProvider for StaticResolverProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn init(&self, config: &Value) -> Result<Arc<dyn Resolver>> {
        let value = config.get("value").cloned().ok_or_else(|| Error::InvalidConfig {
            subject: "static resolver".to_string(),
            message: "\"value\" is required".to_string(),
        })?;
        Ok(Arc::new(StaticResolver { value }))
    }
}

// ============================================================================
// Built-in: stack-output
// ============================================================================

/// Reads an output of another stack
pub struct StackOutputResolver {
    stack: String,
    output: String,
}

impl Resolver for StackOutputResolver {
    fn dependencies(&self) -> Vec<String> {
        vec![self.stack.clone()]
    }

    fn resolve(&self, input: &ResolverInput<'_>) -> Result<Value> {
        log::debug!(
            "Resolving parameter {} of stack {} from output {} of {}",
            input.parameter_name,
            input.stack.path,
            self.output,
            self.stack
        );

        let referenced = match input.ctx.stacks_by_path(&self.stack, input.stack).as_slice() {
            [] => {
                return Err(resolution_error(
                    input,
                    format!("Stack not found with path: {}", self.stack),
                ));
            }
            [single] => Arc::clone(single),
            _ => {
                return Err(resolution_error(
                    input,
                    format!("More than one stack found with path: {}", self.stack),
                ));
            }
        };

        let summary = input
            .client
            .get_current_status(&referenced)?
            .ok_or_else(|| resolution_error(input, format!("No such stack: {}", referenced.name)))?;

        summary
            .outputs
            .get(&self.output)
            .map(|v| Value::String(v.clone()))
            .ok_or_else(|| {
                resolution_error(
                    input,
                    format!("Stack {} does not have output {}", referenced.name, self.output),
                )
            })
    }
}

struct StackOutputResolverProvider;

impl ResolverProvider for StackOutputResolverProvider {
    fn name(&self) -> &str {
        "stack-output"
    }

    fn init(&self, config: &Value) -> Result<Arc<dyn Resolver>> {
        Ok(Arc::new(StackOutputResolver {
            stack: required_string(config, "stack", "stack-output")?,
            output: required_string(config, "output", "stack-output")?,
        }))
    }
}

// ============================================================================
// Built-in: env
// ============================================================================

/// Reads an environment variable of the running process
pub struct EnvResolver {
    name: String,
    default: Option<Value>,
}

impl Resolver for EnvResolver {
    fn resolve(&self, input: &ResolverInput<'_>) -> Result<Value> {
        match std::env::var(&self.name) {
            Ok(value) => Ok(Value::String(value)),
            Err(_) => self.default.clone().ok_or_else(|| {
                resolution_error(
                    input,
                    format!("Environment variable {} is not set", self.name),
                )
            }),
        }
    }
}

struct EnvResolverProvider;

impl ResolverProvider for EnvResolverProvider {
    fn name(&self) -> &str {
        "env"
    }

    fn init(&self, config: &Value) -> Result<Arc<dyn Resolver>> {
        Ok(Arc::new(EnvResolver {
            name: required_string(config, "name", "env")?,
            default: config.get("default").cloned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_names() {
        let registry = ResolverRegistry::new();
        assert_eq!(registry.names(), vec!["env", "stack-output", "static"]);
    }

    #[test]
    fn test_unknown_resolver() {
        let registry = ResolverRegistry::new();
        let err = registry
            .init("ssm", &json!({}), "Password", "/db.yml/eu-west-1")
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown parameter resolver 'ssm' in parameter Password of stack /db.yml/eu-west-1"
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ResolverRegistry::new();
        let err = registry.register(Arc::new(EnvResolverProvider)).unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration { kind: "Resolver", .. }));

        let mut empty = ResolverRegistry::empty();
        assert!(empty.register(Arc::new(EnvResolverProvider)).is_ok());
    }

    #[test]
    fn test_stack_output_dependencies() {
        let registry = ResolverRegistry::new();
        let resolver = registry
            .init(
                "stack-output",
                &json!({ "stack": "../vpc.yml", "output": "VpcId" }),
                "VpcId",
                "/dev/app.yml/eu-west-1",
            )
            .unwrap();
        assert_eq!(resolver.dependencies(), vec!["../vpc.yml"]);
    }

    #[test]
    fn test_invalid_config() {
        let registry = ResolverRegistry::new();
        let err = registry
            .init("stack-output", &json!({ "stack": "/vpc.yml" }), "VpcId", "/app.yml/r")
            .err()
            .unwrap();
        assert!(err.to_string().contains("\"output\" is required"));
        assert!(registry.init("static", &json!({}), "X", "/app.yml/r").is_err());
    }
}
