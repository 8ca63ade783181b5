//! Command path algebra
//!
//! Every entity is addressed by a slash-separated path. Stack groups are
//! directories (`/dev/eu`), stack config files end with `.yml`
//! (`/dev/eu/vpc.yml`), modules end with `.module.yml` and a deployable
//! stack path carries its region as the last segment
//! (`/dev/eu/vpc.yml/eu-west-1`).
//!
//! Path comparisons work on whole segments, so `/dev` never matches
//! `/development`.

/// Any path that may be given as a command path
pub type CommandPath = String;
/// Path of a stack, including its region segment
pub type StackPath = String;
/// Path of a stack group
pub type StackGroupPath = String;
/// Path of a module reference
pub type ModulePath = String;

/// Path of the root stack group
pub const ROOT_STACK_GROUP_PATH: &str = "/";

/// Extension of stack configuration files
pub const CONFIG_FILE_EXTENSION: &str = ".yml";

/// Extension of module reference files
pub const MODULE_FILE_EXTENSION: &str = ".module.yml";

/// Name of the optional stack group configuration file
pub const STACK_GROUP_CONFIG_FILE_NAME: &str = "config.yml";

/// Split a path into its non-empty segments
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_stack_file_segment(segment: &str) -> bool {
    segment.ends_with(CONFIG_FILE_EXTENSION) && !segment.ends_with(MODULE_FILE_EXTENSION)
}

/// Check if the path points to a module reference file
pub fn is_module_path(path: &str) -> bool {
    path.ends_with(MODULE_FILE_EXTENSION)
}

/// Check if the path points to a stack config file, with or without region
pub fn is_stack_path(path: &str) -> bool {
    match segments(path).as_slice() {
        [.., last] if is_stack_file_segment(last) => true,
        [.., file, _region] => is_stack_file_segment(file),
        _ => false,
    }
}

/// Check if the path points to a stack group
pub fn is_stack_group_path(path: &str) -> bool {
    !is_module_path(path) && !is_stack_path(path)
}

/// Check whether `other` lies on the way to, or underneath, `command_path`
///
/// Holds when either path is a segment prefix of the other. This is used
/// both to select everything under a command path and to descend from the
/// root toward a deep command path.
pub fn is_within_command_path(command_path: &str, other: &str) -> bool {
    let a = segments(command_path);
    let b = segments(other);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Check whether `prefix` is a segment prefix of `path`
pub fn path_starts_with(path: &str, prefix: &str) -> bool {
    let path = segments(path);
    let prefix = segments(prefix);
    prefix.len() <= path.len() && path.iter().zip(prefix.iter()).all(|(x, y)| x == y)
}

/// Build an absolute path from segments
pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> String {
    if segments.is_empty() {
        return ROOT_STACK_GROUP_PATH.to_string();
    }
    segments
        .iter()
        .map(|s| format!("/{}", s.as_ref()))
        .collect()
}

/// Parent path, or `None` for the root
pub fn parent_path(path: &str) -> Option<String> {
    let segs = segments(path);
    if segs.is_empty() {
        None
    } else {
        Some(from_segments(&segs[..segs.len() - 1]))
    }
}

/// Last segment of the path, empty for the root
pub fn last_segment(path: &str) -> &str {
    segments(path).last().copied().unwrap_or_default()
}

/// Append a module-relative path to a module path prefix
///
/// An empty prefix belongs to the root module and leaves the path untouched.
pub fn join_paths(prefix: &str, path: &str) -> String {
    if prefix.is_empty() || prefix == ROOT_STACK_GROUP_PATH {
        return path.to_string();
    }
    if path == ROOT_STACK_GROUP_PATH || path.is_empty() {
        return prefix.to_string();
    }
    format!("{}/{}", prefix.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Resolve a possibly relative path against a stack group path
///
/// Absolute paths are returned as given. `.` and `..` segments are
/// collapsed; `..` never climbs above the root.
pub fn normalize_stack_path(stack_group_path: &str, path: &str) -> String {
    let mut resolved: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        segments(stack_group_path)
    };

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match segment {
            "." => {}
            ".." => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }

    from_segments(&resolved)
}

/// Strip the region segment from a stack path
pub fn stack_config_path(stack_path: &str) -> String {
    let segs = segments(stack_path);
    match segs.as_slice() {
        [.., last] if is_stack_file_segment(last) => stack_path.to_string(),
        [rest @ .., file, _region] if is_stack_file_segment(file) => {
            let mut out: Vec<&str> = rest.to_vec();
            out.push(*file);
            from_segments(&out)
        }
        _ => stack_path.to_string(),
    }
}

/// Derive a remote stack name from a stack config path
///
/// The region segment and `.yml` extension are dropped, slashes become
/// dashes and the project and module name prefixes are prepended.
pub fn make_stack_name(path: &str, project: Option<&str>, name_prefix: &str) -> String {
    let config_path = stack_config_path(path);
    let body = config_path
        .trim_start_matches('/')
        .trim_end_matches(CONFIG_FILE_EXTENSION)
        .replace('/', "-");

    match project {
        Some(project) if !project.is_empty() => format!("{project}-{name_prefix}{body}"),
        _ => format!("{name_prefix}{body}"),
    }
}

/// Derive a module name from its reference file path
pub fn make_module_name(path: &str) -> String {
    path.trim_start_matches('/')
        .trim_end_matches(MODULE_FILE_EXTENSION)
        .replace('/', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_kinds() {
        assert!(is_stack_path("/dev.yml"));
        assert!(is_stack_path("/dev.yml/eu-west-1"));
        assert!(is_stack_path("/env/prod/vpc.module.yml/sub/stack.yml/eu-west-1"));
        assert!(!is_stack_path("/env/prod/vpc.module.yml/sub"));
        assert!(!is_stack_path("/"));

        assert!(is_module_path("/env/prod/vpc.module.yml"));
        assert!(!is_module_path("/env/prod/vpc.yml"));

        assert!(is_stack_group_path("/"));
        assert!(is_stack_group_path("/env/prod"));
        assert!(is_stack_group_path("/env/prod/vpc.module.yml/sub"));
        assert!(!is_stack_group_path("/env/prod/vpc.module.yml"));
    }

    #[test]
    fn test_is_within_command_path() {
        assert!(is_within_command_path("/", "/dev/a.yml/eu-west-1"));
        assert!(is_within_command_path("/dev", "/dev/a.yml/eu-west-1"));
        assert!(is_within_command_path("/dev/a.yml/eu-west-1", "/dev"));
        assert!(is_within_command_path("/dev/a.yml", "/dev/a.yml/eu-west-1"));
        assert!(!is_within_command_path("/dev/a.yml/eu-west-1", "/dev/a.yml/us-east-1"));
        assert!(!is_within_command_path("/dev", "/development"));
        assert!(!is_within_command_path("/prod", "/dev/a.yml"));
    }

    #[test]
    fn test_path_starts_with() {
        assert!(path_starts_with("/dev/a.yml/eu-west-1", "/dev/a.yml"));
        assert!(path_starts_with("/dev/a.yml/eu-west-1", "/"));
        assert!(!path_starts_with("/dev", "/dev/a.yml"));
        assert!(!path_starts_with("/dev/ab.yml/eu-west-1", "/dev/a"));
    }

    #[test]
    fn test_normalize_stack_path() {
        assert_eq!(normalize_stack_path("/dev", "/prod/a.yml"), "/prod/a.yml");
        assert_eq!(normalize_stack_path("/dev", "a.yml"), "/dev/a.yml");
        assert_eq!(normalize_stack_path("/dev", "./a.yml"), "/dev/a.yml");
        assert_eq!(normalize_stack_path("/dev/eu", "../a.yml"), "/dev/a.yml");
        assert_eq!(normalize_stack_path("/", "../../a.yml"), "/a.yml");
    }

    #[test]
    fn test_parent_and_join() {
        assert_eq!(parent_path("/dev/a.yml"), Some("/dev".to_string()));
        assert_eq!(parent_path("/dev"), Some("/".to_string()));
        assert_eq!(parent_path("/"), None);
        assert_eq!(join_paths("", "/a.yml"), "/a.yml");
        assert_eq!(join_paths("/env/net.module.yml", "/a.yml"), "/env/net.module.yml/a.yml");
        assert_eq!(join_paths("/env/net.module.yml", "/"), "/env/net.module.yml");
    }

    #[test]
    fn test_stack_config_path() {
        assert_eq!(stack_config_path("/dev/a.yml/eu-west-1"), "/dev/a.yml");
        assert_eq!(stack_config_path("/dev/a.yml"), "/dev/a.yml");
    }

    #[test]
    fn test_make_stack_name() {
        assert_eq!(make_stack_name("/dev/vpc.yml/eu-west-1", None, ""), "dev-vpc");
        assert_eq!(make_stack_name("/dev/vpc.yml", Some("acme"), ""), "acme-dev-vpc");
        assert_eq!(make_stack_name("/vpc.yml", Some("acme"), "network-"), "acme-network-vpc");
        assert_eq!(make_module_name("/env/network.module.yml"), "env-network");
    }
}
