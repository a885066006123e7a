//! Trait-based diagnostics output.
//!
//! The front end never prints directly; everything goes through a
//! [`Logger`] owned by the session. [`ConsoleLogger`] is the production
//! default, [`RecordingLogger`] captures entries for tests, and
//! [`NoopLogger`] discards everything.

use strum::Display;

use crate::lexer::RowCol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Info,
    Debug,
    Message,
    Warning,
    Error,
    Critical,
}

pub trait Logger {
    /// Reports one diagnostic. `file` may be `None` and `loc.row` may be 0,
    /// both meaning "no location". The message carries no terminator.
    fn log(&mut self, level: LogLevel, file: Option<&str>, loc: RowCol, message: &str);
}

/// Writes warnings and above to stderr, everything else to stdout.
#[derive(Debug, Default)]
pub struct ConsoleLogger {
    /// Suppress levels below `Message` when set.
    pub quiet: bool,
}

impl Logger for ConsoleLogger {
    fn log(&mut self, level: LogLevel, file: Option<&str>, loc: RowCol, message: &str) {
        if self.quiet && level < LogLevel::Message {
            return;
        }
        let rendered = match file {
            Some(file) if loc.row != 0 => format!("{file}:{}:{}: {message}", loc.row, loc.col),
            Some(file) => format!("{file}: {message}"),
            None => message.to_string(),
        };
        if level >= LogLevel::Warning {
            eprintln!("{rendered}");
        } else {
            println!("{rendered}");
        }
    }
}

/// Collects log entries; used by tests to assert on diagnostics.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    pub entries: Vec<(LogLevel, Option<String>, RowCol, String)>,
}

impl RecordingLogger {
    pub fn messages(&self, level: LogLevel) -> Vec<&str> {
        self.entries.iter().filter(|e| e.0 == level).map(|e| e.3.as_str()).collect()
    }
}

impl Logger for RecordingLogger {
    fn log(&mut self, level: LogLevel, file: Option<&str>, loc: RowCol, message: &str) {
        self.entries.push((level, file.map(str::to_string), loc, message.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&mut self, _level: LogLevel, _file: Option<&str>, _loc: RowCol, _message: &str) {}
}
