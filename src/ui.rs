//! Terminal output mirrored into the run log.

use colored::*;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Step,
    Success,
    Warn,
    Error,
}

pub const SEPARATOR_HEAVY: &str = "━";
pub const SEPARATOR_LIGHT: &str = "─";

fn colorize(level: Level, s: &str) -> String {
    match level {
        Level::Info => s.normal().to_string(),
        Level::Step => format!("{} {}", "==>".cyan().bold(), s.bold()),
        Level::Success => s.green().bold().to_string(),
        Level::Warn => s.yellow().bold().to_string(),
        Level::Error => format!("{} {}", "Error:".red().bold(), s.red()),
    }
}

pub(crate) fn strip_ansi(input: &str) -> String {
    // Remove common ANSI escape sequences like \x1b[0m, \x1b[1;32m, and similar
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x1b && i + 1 < bytes.len() && bytes[i + 1] == b'[' {
            i += 2;
            while i < bytes.len() {
                let b = bytes[i];
                i += 1;
                if (b'@'..=b'~').contains(&b) {
                    break;
                }
            }
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn mirror(level: Level, message: &str) {
    let clean = strip_ansi(message);
    match level {
        Level::Warn => tracing::warn!("{clean}"),
        Level::Error => tracing::error!("{clean}"),
        _ => tracing::info!("{clean}"),
    }
}

pub fn emit(level: Level, message: &str) {
    let line = colorize(level, message);
    let mut out: Box<dyn Write> = match level {
        Level::Error | Level::Warn => Box::new(io::stderr()),
        _ => Box::new(io::stdout()),
    };
    let _ = writeln!(out, "{}", line);
    mirror(level, message);
}

pub fn info(message: impl AsRef<str>) {
    emit(Level::Info, message.as_ref());
}

pub fn step(message: impl AsRef<str>) {
    emit(Level::Step, message.as_ref());
}

pub fn success(message: impl AsRef<str>) {
    emit(Level::Success, message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    emit(Level::Warn, message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    emit(Level::Error, message.as_ref());
}

/// Print a block of preformatted text (tables, summaries) line by line.
pub fn block(text: &str) {
    for line in text.lines() {
        info(line);
    }
}

pub fn separator(light: bool) {
    let glyph = if light {
        SEPARATOR_LIGHT
    } else {
        SEPARATOR_HEAVY
    };
    let line = glyph.repeat(60);
    println!("{}", line.bright_black());
}
