use colored::Colorize;
use declarative::{ApplyResult, ApplySummary};

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

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print one apply result
pub fn result(result: &ApplyResult) {
    let label = format!("{} {}", result.action(), result.resource());
    match result.error() {
        Some(err) => error(&format!("{label}: {err:#}")),
        None => success(&label),
    }
}

/// One-line description of an apply summary
pub fn summary_line(summary: &ApplySummary) -> String {
    format!(
        "{} created, {} updated, {} failed",
        summary.created, summary.updated, summary.failed
    )
}
