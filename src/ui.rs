use colored::{ColoredString, Colorize};
use stacks::{CommandStatus, StackOperationType};
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Status Formatting
// ============================================================================

/// Status name padded to `width` and coloured by outcome
pub fn status(status: CommandStatus, width: usize) -> ColoredString {
    let text = format!("{:<width$}", status.as_str());
    match status {
        CommandStatus::Success => text.green(),
        CommandStatus::Failed => text.red(),
        CommandStatus::Cancelled => text.yellow(),
        CommandStatus::Skipped => text.dimmed(),
    }
}

/// Plan symbol for an operation, as in a diff
pub fn operation_symbol(operation_type: StackOperationType) -> ColoredString {
    match operation_type {
        StackOperationType::Create => "+".green(),
        StackOperationType::Update => "~".yellow(),
        StackOperationType::Recreate => "±".magenta(),
        StackOperationType::Delete => "-".red(),
        StackOperationType::Skip => "·".dimmed(),
    }
}

// ============================================================================
// Duration Formatting
// ============================================================================

/// Format a duration as a short human-readable string
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Truncate a path string for display, keeping the end
pub fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        path.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let keep: String = path
            .chars()
            .rev()
            .take(max_len - 3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{keep}")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_millis() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    }

    #[test]
    fn test_format_duration_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1000)), "1.0s");
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
    }

    #[test]
    fn test_format_duration_minutes() {
        assert_eq!(format_duration(Duration::from_secs(60)), "1m 0s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_truncate_path_short() {
        assert_eq!(truncate_path("/dev/vpc.yml", 20), "/dev/vpc.yml");
        assert_eq!(truncate_path("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_path_long() {
        assert_eq!(
            truncate_path("/dev/eu/network/vpc.yml/eu-west-1", 15),
            "...ml/eu-west-1"
        );
    }

    #[test]
    fn test_truncate_path_edge_cases() {
        assert_eq!(truncate_path("test", 3), "...");
        assert_eq!(truncate_path("test", 2), "...");
        assert_eq!(truncate_path("", 10), "");
    }

    #[test]
    fn test_status_text() {
        colored::control::set_override(false);
        assert_eq!(status(CommandStatus::Failed, 9).to_string(), "FAILED   ");
        assert_eq!(status(CommandStatus::Success, 0).to_string(), "SUCCESS");
    }
}
