//! Terminal color support for CLI output.
//!
//! Colors are only used when the stream is a terminal, so piped output stays
//! plain.

use owo_colors::OwoColorize;
use std::io::IsTerminal;

/// Pad a string to a minimum width (left-aligned), then apply a color function.
/// Padding happens first so ANSI codes don't count toward the width.
pub fn pad_left<F>(msg: &str, width: usize, color_fn: F) -> String
where
    F: FnOnce(&str) -> String,
{
    let padded = format!("{:<width$}", msg);
    color_fn(&padded)
}

pub fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}

pub fn is_stderr_interactive() -> bool {
    std::io::stderr().is_terminal()
}

pub fn error(msg: &str) -> String {
    if is_stderr_interactive() {
        format!("{} {}", "error:".red().bold(), msg)
    } else {
        format!("error: {}", msg)
    }
}

pub fn warning(msg: &str) -> String {
    if is_stderr_interactive() {
        format!("{} {}", "warning:".yellow().bold(), msg)
    } else {
        format!("warning: {}", msg)
    }
}

/// Informational line on stderr (key feedback, shutdown notices).
pub fn notice(msg: &str) -> String {
    if is_stderr_interactive() {
        format!("{}", msg.cyan())
    } else {
        msg.to_string()
    }
}

pub fn success(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.green())
    } else {
        msg.to_string()
    }
}

pub fn dim(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.dimmed())
    } else {
        msg.to_string()
    }
}

pub fn bold(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.bold())
    } else {
        msg.to_string()
    }
}

pub fn header(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.bold().blue())
    } else {
        msg.to_string()
    }
}

pub fn path(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.underline())
    } else {
        msg.to_string()
    }
}

pub fn number(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.cyan())
    } else {
        msg.to_string()
    }
}

/// Color a status line by run state name.
pub fn status_line(state: &str, line: &str) -> String {
    if !is_interactive() {
        return line.to_string();
    }

    match state {
        "recording" => format!("{}", line.red().bold()),
        "paused" => format!("{}", line.yellow()),
        "stopping" => format!("{}", line.dimmed()),
        _ => line.to_string(),
    }
}
