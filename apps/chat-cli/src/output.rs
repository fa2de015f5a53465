//! Output formatting for the CLI.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;

const DIVIDER_WIDTH: usize = 60;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Pretty-print any serializable value as JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to encode output: {}", e),
    }
}

fn status_line(status: &str, message: &str) -> String {
    json!({ "status": status, "message": message }).to_string()
}

/// Confirmation on stdout.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => println!("{}", status_line("success", message)),
    }
}

/// Failure on stderr; the exit status is left to the caller.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => eprintln!("{}", status_line("error", message)),
    }
}

/// `  Label:          value`
pub fn print_row(label: &str, value: &str) {
    let label = format!("{}:", label);
    println!("  {:<16} {}", label, value);
}

pub fn print_divider() {
    println!("{}", "-".repeat(DIVIDER_WIDTH));
}

pub fn print_heading(text: &str) {
    println!();
    println!("{}", text);
    print_divider();
}

/// Shorten `text` to `width` characters, marking the cut with `…`.
pub fn truncate(text: &str, width: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= width {
        return single_line;
    }
    let kept: String = single_line.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}
