//! Configuration tree read from a directory of YAML files
//!
//! Every directory under the stacks directory is a stack group with an
//! optional `config.yml`. Files ending with `.module.yml` reference
//! modules and every other `.yml` file configures a stack. Modules live
//! under `<modules_dir>/<id>/<version>/` with their own stacks and
//! templates directories.

use regex::Regex;
use stacks::path::{
    CONFIG_FILE_EXTENSION, MODULE_FILE_EXTENSION, STACK_GROUP_CONFIG_FILE_NAME, from_segments,
};
use stacks::{
    ConfigSource, ConfigTree, EntityConfig, Error, ModuleConfigNode, Result, StackConfig,
    StackConfigNode, StackGroupConfigNode, TemplateConfig, parse_module_config,
    parse_stack_config, parse_stack_group_config,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use walkdir::WalkDir;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]{0,127}$").expect("valid name pattern"));

static REGION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").expect("valid region pattern"));

/// Config source backed by the file system
#[derive(Clone)]
pub struct FileSystemConfigSource {
    stacks_dir: PathBuf,
    templates_dir: PathBuf,
    modules_dir: PathBuf,
    /// Regions allowed by the project, any region when empty
    regions: Vec<String>,
    /// Source that referenced this module, consulted for unknown modules
    parent: Option<Arc<dyn ConfigSource>>,
}

impl FileSystemConfigSource {
    pub fn new(stacks_dir: PathBuf, templates_dir: PathBuf, modules_dir: PathBuf) -> Self {
        Self {
            stacks_dir,
            templates_dir,
            modules_dir,
            regions: Vec::new(),
            parent: None,
        }
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    fn rules(&self) -> Rules {
        Rules {
            regions: self.regions.clone(),
            templates_dir: self.templates_dir.clone(),
        }
    }

    fn build_group(
        &self,
        dir: &Path,
        segments: &[String],
        parent_path: Option<String>,
    ) -> Result<StackGroupConfigNode> {
        let path = from_segments(segments);
        let rules = self.rules();

        let config_file = dir.join(STACK_GROUP_CONFIG_FILE_NAME);
        let mut node = StackGroupConfigNode::new(path.clone(), parent_path, move |_| {
            if !config_file.is_file() {
                return Ok(None);
            }
            let value = read_yaml(&config_file, "stack group")?;
            let config = parse_stack_group_config(&value)
                .map_err(|messages| validation("stack group", &config_file, messages))?;
            let mut messages = Vec::new();
            rules.check_entity(&config.common, &mut messages);
            finish("stack group", &config_file, messages, Some(config))
        });

        let entries = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in entries {
            let entry = entry.map_err(std::io::Error::from)?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') {
                continue;
            }

            let mut child_segments = segments.to_vec();
            child_segments.push(file_name.clone());
            let child_path = from_segments(&child_segments);
            let file = entry.path().to_path_buf();

            if entry.file_type().is_dir() {
                node.children
                    .push(self.build_group(&file, &child_segments, Some(path.clone()))?);
            } else if file_name.ends_with(MODULE_FILE_EXTENSION) {
                let rules = self.rules();
                node.modules.push(ModuleConfigNode::new(child_path, move |_| {
                    let value = read_yaml(&file, "module")?;
                    let config = parse_module_config(&value)
                        .map_err(|messages| validation("module", &file, messages))?;
                    let mut messages = Vec::new();
                    rules.check_entity(&config.common, &mut messages);
                    rules.check_name(config.name.as_deref(), &mut messages);
                    finish("module", &file, messages, config)
                }));
            } else if file_name.ends_with(CONFIG_FILE_EXTENSION)
                && file_name != STACK_GROUP_CONFIG_FILE_NAME
            {
                let rules = self.rules();
                let default_template = child_path.trim_start_matches('/').to_string();
                node.stacks.push(StackConfigNode::new(child_path, move |_| {
                    let value = read_yaml(&file, "stack")?;
                    let config = parse_stack_config(&value)
                        .map_err(|messages| validation("stack", &file, messages))?;
                    let mut messages = Vec::new();
                    rules.check_stack(&config, &default_template, &mut messages);
                    finish("stack", &file, messages, config)
                }));
            } else {
                log::trace!("Ignoring {}", entry.path().display());
            }
        }

        Ok(node)
    }
}

impl ConfigSource for FileSystemConfigSource {
    fn build_config_tree(&self) -> Result<ConfigTree> {
        if !self.stacks_dir.is_dir() {
            return Err(Error::NotFound {
                kind: "stacks directory",
                path: self.stacks_dir.display().to_string(),
            });
        }
        log::debug!("Reading configuration from {}", self.stacks_dir.display());
        Ok(ConfigTree {
            root: self.build_group(&self.stacks_dir, &[], None)?,
        })
    }

    fn get_stack_template_contents(&self, template: &TemplateConfig) -> Result<String> {
        if let Some(inline) = &template.inline {
            return Ok(inline.clone());
        }
        let filename = template.filename.clone().unwrap_or_default();
        let file = self.templates_dir.join(&filename);
        if !file.is_file() {
            return Err(Error::NotFound {
                kind: "template",
                path: file.display().to_string(),
            });
        }
        Ok(fs::read_to_string(&file)?)
    }

    fn config_source_for_module(&self, id: &str, version: &str) -> Result<Arc<dyn ConfigSource>> {
        let module_dir = self.modules_dir.join(id).join(version);
        if module_dir.is_dir() {
            log::debug!("Module {id}@{version} found in {}", module_dir.display());
            let mut source = Self::new(
                module_dir.join("stacks"),
                module_dir.join("templates"),
                self.modules_dir.clone(),
            )
            .with_regions(self.regions.clone());
            source.parent = Some(Arc::new(self.clone()));
            return Ok(Arc::new(source));
        }

        match &self.parent {
            Some(parent) => parent.config_source_for_module(id, version),
            None => Err(Error::ModuleNotFound {
                id: id.to_string(),
                version: version.to_string(),
            }),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Checks that need project settings or the file system
struct Rules {
    regions: Vec<String>,
    templates_dir: PathBuf,
}

impl Rules {
    fn check_entity(&self, common: &EntityConfig, messages: &mut Vec<String>) {
        for region in &common.regions {
            if !REGION_PATTERN.is_match(region) {
                messages.push(format!("\"regions\" contains invalid region '{region}'"));
            } else if !self.regions.is_empty() && !self.regions.contains(region) {
                messages.push(format!(
                    "\"regions\" contains '{region}' which is not one of the project regions: {}",
                    self.regions.join(", ")
                ));
            }
        }
    }

    fn check_name(&self, name: Option<&str>, messages: &mut Vec<String>) {
        if let Some(name) = name
            && !NAME_PATTERN.is_match(name)
        {
            messages.push(format!(
                "\"name\" '{name}' must start with a letter and contain only letters, digits and dashes (max 128 characters)"
            ));
        }
    }

    fn check_stack(&self, config: &StackConfig, default_template: &str, messages: &mut Vec<String>) {
        self.check_entity(&config.common, messages);
        self.check_name(config.name.as_deref(), messages);

        let filename = match &config.template {
            Some(TemplateConfig { inline: Some(_), .. }) => None,
            Some(TemplateConfig {
                filename: Some(filename),
                ..
            }) => Some(filename.as_str()),
            _ => Some(default_template),
        };
        if let Some(filename) = filename
            && !self.templates_dir.join(filename).is_file()
        {
            messages.push(format!(
                "\"template\" file '{filename}' not found in {}",
                self.templates_dir.display()
            ));
        }
    }
}

fn read_yaml(file: &Path, kind: &'static str) -> Result<serde_json::Value> {
    let content = fs::read_to_string(file)?;
    if content.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_yaml::from_str(&content).map_err(|e| validation(kind, file, vec![e.to_string()]))
}

fn validation(kind: &'static str, file: &Path, messages: Vec<String>) -> Error {
    Error::Validation {
        kind,
        file: file.display().to_string(),
        messages,
    }
}

fn finish<T>(kind: &'static str, file: &Path, messages: Vec<String>, value: T) -> Result<T> {
    if messages.is_empty() {
        Ok(value)
    } else {
        Err(validation(kind, file, messages))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project() -> (TempDir, FileSystemConfigSource) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "stacks/config.yml", "regions: eu-west-1\n");
        write(root, "stacks/dev/vpc.yml", "");
        write(
            root,
            "stacks/dev/app.yml",
            "depends: vpc.yml\nparameters:\n  Size: 2\n",
        );
        write(root, "stacks/dev/network.module.yml", "id: network\nversion: \"1.0\"\n");
        write(root, "stacks/dev/notes.txt", "not configuration");
        write(root, "templates/dev/vpc.yml", "Resources: {}\n");
        write(root, "templates/dev/app.yml", "Resources: {}\n");
        write(root, "modules/network/1.0/stacks/subnets.yml", "");
        write(root, "modules/network/1.0/templates/subnets.yml", "Resources: {}\n");

        let source = FileSystemConfigSource::new(
            root.join("stacks"),
            root.join("templates"),
            root.join("modules"),
        )
        .with_regions(vec!["eu-west-1".to_string(), "us-east-1".to_string()]);
        (dir, source)
    }

    #[test]
    fn test_tree_layout() {
        let (_dir, source) = project();
        let tree = source.build_config_tree().unwrap();

        assert_eq!(tree.root.path, "/");
        assert_eq!(tree.root.children.len(), 1);
        let dev = &tree.root.children[0];
        assert_eq!(dev.path, "/dev");
        assert_eq!(dev.parent_path.as_deref(), Some("/"));
        assert_eq!(
            tree.stack_config_paths(),
            vec!["/dev/app.yml", "/dev/vpc.yml"]
        );
        assert_eq!(tree.module_paths(), vec!["/dev/network.module.yml"]);
    }

    #[test]
    fn test_loaders_parse_yaml() {
        let (_dir, source) = project();
        let tree = source.build_config_tree().unwrap();

        let group = tree.root.get_config(&json!({})).unwrap().unwrap();
        assert_eq!(group.common.regions, vec!["eu-west-1"]);

        let dev = &tree.root.children[0];
        assert!(dev.get_config(&json!({})).unwrap().is_none());

        let app = dev.stacks.iter().find(|s| s.path == "/dev/app.yml").unwrap();
        let config = app.get_config(&json!({})).unwrap();
        assert_eq!(config.depends, vec!["vpc.yml"]);
        assert!(config.parameters.contains_key("Size"));

        let module = dev.modules[0].get_config(&json!({})).unwrap();
        assert_eq!((module.id.as_str(), module.version.as_str()), ("network", "1.0"));
    }

    #[test]
    fn test_validation_collects_messages_for_the_file() {
        let (dir, source) = project();
        write(
            dir.path(),
            "stacks/dev/bad.yml",
            "name: 9lives\nregions: [ap-south-1]\ntemplate: missing.yml\ncolour: blue\n",
        );
        let tree = source.build_config_tree().unwrap();
        let bad = tree.root.children[0]
            .stacks
            .iter()
            .find(|s| s.path == "/dev/bad.yml")
            .unwrap();

        // Unknown keys stop parsing before the file system checks run
        let err = bad.get_config(&json!({})).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad.yml"));
        assert!(message.contains("colour"));

        write(
            dir.path(),
            "stacks/dev/bad.yml",
            "name: 9lives\nregions: [ap-south-1]\ntemplate: missing.yml\n",
        );
        let err = bad.get_config(&json!({})).unwrap_err();
        match err {
            Error::Validation { kind, file, messages } => {
                assert_eq!(kind, "stack");
                assert!(file.ends_with("bad.yml"));
                assert_eq!(messages.len(), 3, "{messages:?}");
                assert!(messages.iter().any(|m| m.contains("9lives")));
                assert!(messages.iter().any(|m| m.contains("ap-south-1")));
                assert!(messages.iter().any(|m| m.contains("missing.yml")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_yaml_is_attributed_to_file() {
        let (dir, source) = project();
        write(dir.path(), "stacks/dev/vpc.yml", "regions: [eu-west-1\n");
        let tree = source.build_config_tree().unwrap();
        let vpc = tree.root.children[0]
            .stacks
            .iter()
            .find(|s| s.path == "/dev/vpc.yml")
            .unwrap();
        let err = vpc.get_config(&json!({})).unwrap_err();
        assert!(matches!(err, Error::Validation { kind: "stack", .. }));
        assert!(err.to_string().contains("vpc.yml"));
    }

    #[test]
    fn test_templates() {
        let (_dir, source) = project();
        let body = source
            .get_stack_template_contents(&TemplateConfig {
                filename: Some("dev/vpc.yml".to_string()),
                ..TemplateConfig::default()
            })
            .unwrap();
        assert_eq!(body, "Resources: {}\n");

        let inline = source
            .get_stack_template_contents(&TemplateConfig {
                inline: Some("Outputs: {}".to_string()),
                ..TemplateConfig::default()
            })
            .unwrap();
        assert_eq!(inline, "Outputs: {}");

        let missing = source.get_stack_template_contents(&TemplateConfig {
            filename: Some("nope.yml".to_string()),
            ..TemplateConfig::default()
        });
        assert!(matches!(missing, Err(Error::NotFound { kind: "template", .. })));
    }

    #[test]
    fn test_module_sources() {
        let (_dir, source) = project();
        let module = source.config_source_for_module("network", "1.0").unwrap();
        let tree = module.build_config_tree().unwrap();
        assert_eq!(tree.stack_config_paths(), vec!["/subnets.yml"]);

        // Nested lookups reach the same modules directory
        assert!(module.config_source_for_module("network", "1.0").is_ok());

        let err = source
            .config_source_for_module("network", "2.0")
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Module not found with id: network, version: 2.0"
        );
    }

    #[test]
    fn test_missing_stacks_dir() {
        let dir = TempDir::new().unwrap();
        let source = FileSystemConfigSource::new(
            dir.path().join("stacks"),
            dir.path().join("templates"),
            dir.path().join("modules"),
        );
        assert!(matches!(
            source.build_config_tree(),
            Err(Error::NotFound { kind: "stacks directory", .. })
        ));
    }

    #[test]
    fn test_end_to_end_context() {
        let (_dir, source) = project();
        let input = stacks::BuildInput::new(Arc::new(source));
        let ctx = stacks::build_stacks_context(&input).unwrap();

        let app = ctx.stack("/dev/app.yml/eu-west-1").unwrap();
        assert_eq!(app.dependencies, vec!["/dev/vpc.yml/eu-west-1"]);
        assert!(ctx.stack("/dev/network.module.yml/subnets.yml/eu-west-1").is_some());
    }
}
