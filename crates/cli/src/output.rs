//! Output formatting utilities

use anomaly_engine::Severity;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T]) {
    if items.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a decision score
pub fn format_score(score: f64) -> String {
    format!("{:.4}", score)
}

/// Format a percentage that is already scaled to 0-100
pub fn format_rate(rate: f64) -> String {
    format!("{:.2}%", rate)
}

/// Color severity by how urgent it is
pub fn color_severity(severity: Severity) -> String {
    let label = severity.as_str();
    match severity {
        Severity::Critical => label.red().bold().to_string(),
        Severity::High => label.red().to_string(),
        Severity::Medium => label.yellow().to_string(),
        Severity::Low => label.blue().to_string(),
        Severity::Normal => label.green().to_string(),
    }
}

/// Color an ack/nack disposition
pub fn color_disposition(disposition: &str) -> String {
    match disposition {
        "ack" => disposition.green().to_string(),
        "nack" => disposition.red().to_string(),
        _ => disposition.to_string(),
    }
}
