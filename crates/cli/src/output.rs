//! CLI output formatting utilities.
//!
//! Colored status messages and record statuses for terminal output.

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use cairn_lib::state::Status;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Status padded to a fixed width and colored by how settled it is.
pub fn format_status(status: Status) -> String {
  let text = format!("{:<15}", status.as_str());
  match status {
    Status::Created | Status::Updated => text.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    Status::Creating | Status::Updating => text.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    Status::DeletedPending => text.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
  }
}
