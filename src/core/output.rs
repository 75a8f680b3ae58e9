//! Terminal rendering helpers shared by every CLI surface.
//!
//! Diagnostics stay on one line: record previews are collapsed and bounded,
//! warning lists are summarised.

use colored::Colorize;

/// Global `--format` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }
}

/// Collapse whitespace and bound length so a trace line fits a diagnostic.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Join up to `max_items` messages with `" | "`, noting how many were dropped.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

/// Print a success line: `<PREFIX> OK: <message>`.
pub fn print_ok(prefix: &str, message: &str) {
    println!("{} {} OK: {}", "✓".bright_green(), prefix, message);
}

/// Print non-fatal findings, one per line: `<PREFIX> WARN: <message>`.
pub fn print_warnings(prefix: &str, warnings: &[String]) {
    for w in warnings {
        println!("{} {} WARN: {}", "⚠".bright_yellow(), prefix, w);
    }
}

/// Print a JSON value for `--format json`.
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_line_collapses_and_truncates() {
        assert_eq!(compact_line("a  b\n c", 10), "a b c");
        assert_eq!(compact_line("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn preview_reports_hidden_count() {
        let msgs = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(preview_messages(&msgs, 2, 20), "one | two (+1 more)");
        assert_eq!(preview_messages(&[], 2, 20), "");
    }
}
