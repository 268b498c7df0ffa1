//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX

use colored::Colorize;
use serde_json::Value;

use crate::engine::adapter::Record;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.chars().count()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print a stored document with its id and revision above the body
    pub fn record(record: &Record) {
        Self::kv("id", record.id().unwrap_or("-"));
        Self::kv("rev", record.rev().unwrap_or("-"));
        println!("{}", indent(&pretty(&Value::Object(record.doc.clone())), 2));
    }

    /// Print a bare JSON document
    pub fn document(doc: &Value) {
        println!("{}", indent(&pretty(doc), 2));
    }
}

/// Pretty JSON, falling back to compact output
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `Record` as the JSON shape printed in `--format json` mode
pub fn record_json(record: &Record) -> Value {
    serde_json::json!({
        "id": record.id(),
        "rev": record.rev(),
        "doc": Value::Object(record.doc.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::assign_metadata;
    use serde_json::json;

    #[test]
    fn test_indent() {
        assert_eq!(indent("a\nb", 2), "  a\n  b");
    }

    #[test]
    fn test_record_json() {
        let doc = json!({"_id": "t__1", "name": "x"}).as_object().cloned().unwrap();
        let value = record_json(&assign_metadata(doc, "1-abc"));
        assert_eq!(value["id"], "t__1");
        assert_eq!(value["rev"], "1-abc");
        assert_eq!(value["doc"]["name"], "x");
    }
}
