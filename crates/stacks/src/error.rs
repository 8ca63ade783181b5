//! Error types for stack configuration, graph resolution and execution.
//!
//! Errors are categorized so that callers can present a short description
//! and actionable advice next to the detailed message. Per-stack remote
//! failures never surface as an [`Error`] from the executor: they become
//! failed results instead.

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of errors for user feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid or inconsistent configuration
    Configuration,
    /// The dependency graph is not executable
    Graph,
    /// The remote provider failed
    Remote,
    /// File system or process IO failed
    Io,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Invalid configuration",
            Self::Graph => "Invalid dependency graph",
            Self::Remote => "Remote provider error",
            Self::Io => "IO error",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Configuration => "Fix the reported configuration files and run the command again",
            Self::Graph => "Review the dependencies declared by the reported stacks",
            Self::Remote => "Check provider credentials and the state of the remote stacks",
            Self::Io => "Check that the files exist and are readable",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// A stack or module that depends on entities marked as obsolete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObsoleteReference {
    /// Path of the non-obsolete stack declaring the dependencies
    pub from: String,
    /// Paths of the obsolete dependency targets
    pub to: Vec<String>,
}

/// Errors that can occur while building, validating or executing stacks.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration file failed validation
    #[error("Validation errors in {kind} configuration file {file}:\n{}", bullet_list(.messages))]
    Validation {
        /// Kind of configuration (stack, stack group, module, project)
        kind: &'static str,
        /// File the messages are attributed to
        file: String,
        /// Every violated rule, not just the first one
        messages: Vec<String>,
    },

    /// A module referenced from the configuration does not exist
    #[error("Module not found with id: {id}, version: {version}")]
    ModuleNotFound {
        /// Module id
        id: String,
        /// Module version
        version: String,
    },

    /// The command path selects nothing
    #[error("No stacks found within the given command path: {command_path}\n\nAvailable stack paths:\n{}", bullet_list(.available))]
    CommandPathMatchesNoStacks {
        /// The command path given by the user
        command_path: String,
        /// Stack config paths known to the configuration tree
        available: Vec<String>,
    },

    /// The dependency graph contains a cycle
    #[error("Cyclic dependency detected: {}", .chain.join(" -> "))]
    CyclicDependency {
        /// The cycle, starting and ending with the same stack path
        chain: Vec<String>,
    },

    /// Non-obsolete stacks depend on obsolete ones
    #[error("{}", obsolete_message(.references))]
    ObsoleteDependencies {
        /// Every offending reference, grouped by source
        references: Vec<ObsoleteReference>,
    },

    /// A declared dependency matches no stack or module
    #[error("Dependency {dependency} in {declared_in} refers to a non-existing {target_kind}")]
    MissingDependency {
        /// The dependency as declared
        dependency: String,
        /// Where the dependency was declared
        declared_in: String,
        /// "stack" or "module"
        target_kind: &'static str,
    },

    /// Ignoring dependencies is only allowed for a single stack
    #[error(
        "Ignoring dependencies is only allowed when exactly one stack is selected, but {} stacks were selected:\n{}",
        .stacks.len(),
        bullet_list(.stacks)
    )]
    IncompatibleIgnoreDependencies {
        /// Paths of the stacks in the plan
        stacks: Vec<String>,
    },

    /// A parameter refers to a resolver that is not registered
    #[error("Unknown parameter resolver '{name}' in parameter {parameter} of stack {stack}")]
    UnknownResolver {
        /// Resolver name as written in the configuration
        name: String,
        /// Parameter name
        parameter: String,
        /// Stack path
        stack: String,
    },

    /// A hook refers to a hook type that is not registered
    #[error("Unknown hook type '{hook_type}' in hook {name} of {declared_in}")]
    UnknownHook {
        /// Hook type as written in the configuration
        hook_type: String,
        /// Hook name
        name: String,
        /// Stack or stack group path
        declared_in: String,
    },

    /// A provider with the same name is already registered
    #[error("{kind} '{name}' is already registered")]
    DuplicateRegistration {
        /// "Resolver" or "Hook"
        kind: &'static str,
        /// The duplicated name
        name: String,
    },

    /// A resolver or hook was initialised with invalid configuration
    #[error("Invalid configuration for {subject}: {message}")]
    InvalidConfig {
        /// What was being configured
        subject: String,
        /// What is wrong with it
        message: String,
    },

    /// A parameter value could not be resolved
    #[error("Failed to resolve parameter {parameter} of stack {stack}: {message}")]
    Resolver {
        /// Parameter name
        parameter: String,
        /// Stack path
        stack: String,
        /// Failure detail
        message: String,
    },

    /// A hook failed to run
    #[error("Hook {name} failed: {message}")]
    Hook {
        /// Hook name
        name: String,
        /// Failure detail
        message: String,
    },

    /// The remote provider returned an error
    #[error("Remote provider error: {0}")]
    Provider(String),

    /// An entity expected to exist in the resolved graph is missing
    #[error("Expected {kind} to exist with path: {path}")]
    NotFound {
        /// "stack", "stack group" or "module"
        kind: &'static str,
        /// The missing path
        path: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. }
            | Self::ModuleNotFound { .. }
            | Self::CommandPathMatchesNoStacks { .. }
            | Self::IncompatibleIgnoreDependencies { .. }
            | Self::UnknownResolver { .. }
            | Self::UnknownHook { .. }
            | Self::DuplicateRegistration { .. }
            | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::CyclicDependency { .. }
            | Self::ObsoleteDependencies { .. }
            | Self::MissingDependency { .. }
            | Self::NotFound { .. } => ErrorCategory::Graph,
            Self::Resolver { .. } | Self::Provider(_) => ErrorCategory::Remote,
            Self::Io(_) => ErrorCategory::Io,
            Self::Hook { .. } | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Advice specific to this error, falling back to the category advice.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::ObsoleteDependencies { .. } => "Remove dependencies to obsolete stacks/modules.",
            Self::IncompatibleIgnoreDependencies { .. } => {
                "Narrow the command path so that it selects exactly one stack, or drop the ignore dependencies option."
            }
            Self::CommandPathMatchesNoStacks { .. } => {
                "Give a command path that matches a stack group or a stack configuration file."
            }
            _ => self.category().advice(),
        }
    }

    /// Whether the error was caused by the user's configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Graph
        )
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn obsolete_message(references: &[ObsoleteReference]) -> String {
    let details = references
        .iter()
        .map(|reference| {
            let targets = reference
                .to
                .iter()
                .map(|to| format!("    - {to} (marked as obsolete)"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("  {}:\n{targets}", reference.from)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Dependencies to obsolete stacks/modules detected.\n\n\
         The following {} stack(s) depend on stacks/modules marked as obsolete:\n\n{details}\n\n\
         Stacks can't have dependencies on stacks or modules marked as obsolete.",
        references.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_dependency_message() {
        let err = Error::CyclicDependency {
            chain: vec!["/a.yml/r".into(), "/b.yml/r".into(), "/a.yml/r".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency detected: /a.yml/r -> /b.yml/r -> /a.yml/r"
        );
        assert_eq!(err.category(), ErrorCategory::Graph);
    }

    #[test]
    fn test_obsolete_message_lists_every_reference() {
        let err = Error::ObsoleteDependencies {
            references: vec![
                ObsoleteReference {
                    from: "/s1.yml/eu-west-1".into(),
                    to: vec!["/s2.yml/eu-west-1".into()],
                },
                ObsoleteReference {
                    from: "/s3.yml/eu-west-1".into(),
                    to: vec!["/s2.yml/eu-west-1".into(), "/s4.yml/eu-west-1".into()],
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("The following 2 stack(s)"));
        assert!(message.contains("  /s1.yml/eu-west-1:\n    - /s2.yml/eu-west-1 (marked as obsolete)"));
        assert!(message.contains("    - /s4.yml/eu-west-1 (marked as obsolete)"));
        assert_eq!(err.advice(), "Remove dependencies to obsolete stacks/modules.");
    }

    #[test]
    fn test_validation_message_contains_all_messages() {
        let err = Error::Validation {
            kind: "stack",
            file: "/dev/vpc.yml".into(),
            messages: vec!["\"regions\" must be an array".into(), "\"foo\" is not allowed".into()],
        };
        let message = err.to_string();
        assert!(message.starts_with("Validation errors in stack configuration file /dev/vpc.yml"));
        assert!(message.contains("  - \"regions\" must be an array"));
        assert!(message.contains("  - \"foo\" is not allowed"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_category_advice() {
        assert_eq!(ErrorCategory::Remote.description(), "Remote provider error");
        let err = Error::Provider("throttled".into());
        assert_eq!(err.category(), ErrorCategory::Remote);
        assert!(!err.is_configuration());
    }
}
