//! Host configuration and the external-command boundary.
//!
//! The build description is parsed and visited entirely in-process; the
//! only thing that ever leaves the process is a command line handed to a
//! [`CommandHost`]. The default host refuses to run anything, which keeps
//! the core deterministic; the CLI installs [`ProcessHost`].

use std::process::Command;

use strum::{Display, EnumString};

/// Toolchains the visitor knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Toolchain {
    Gcc,
    Clang,
    Msvc,
}

/// Host operating-system family, as coarse as the emitted artifacts need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HostOs {
    Win32,
    Mac,
    Linux,
    Bsd,
    Unix,
}

impl HostOs {
    pub fn is_windows(self) -> bool {
        self == Self::Win32
    }
}

/// Values melted into the builtins instance before parsing. The bootstrap
/// assumption of the original applies: products are built with the same
/// toolchain that built the tool, so these are known at startup and
/// overridable through the parameter table.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub os: HostOs,
    pub toolchain: Toolchain,
    pub cpu: String,
    pub wordsize: i64,
}

impl Default for HostConfig {
    fn default() -> Self {
        let os = if cfg!(windows) {
            HostOs::Win32
        } else if cfg!(target_os = "macos") {
            HostOs::Mac
        } else if cfg!(any(target_os = "freebsd", target_os = "openbsd", target_os = "netbsd")) {
            HostOs::Bsd
        } else {
            HostOs::Linux
        };
        let toolchain = if cfg!(windows) { Toolchain::Msvc } else { Toolchain::Gcc };
        Self {
            os,
            toolchain,
            cpu: std::env::consts::ARCH.to_string(),
            wordsize: (usize::BITS / 8).into(),
        }
    }
}

/// Executes command lines on behalf of `trycompile`.
pub trait CommandHost {
    /// Runs one shell command line; returns the exit status (0 = success).
    fn exec(&mut self, cmd: &str) -> i32;
}

/// Never runs anything; every probe fails.
#[derive(Debug, Default)]
pub struct NullHost;

impl CommandHost for NullHost {
    fn exec(&mut self, _cmd: &str) -> i32 {
        -1
    }
}

/// Runs commands through the platform shell.
#[derive(Debug, Default)]
pub struct ProcessHost;

impl CommandHost for ProcessHost {
    fn exec(&mut self, cmd: &str) -> i32 {
        let status = if cfg!(windows) {
            Command::new("cmd").args(["/C", cmd]).status()
        } else {
            Command::new("sh").args(["-c", cmd]).status()
        };
        match status {
            Ok(s) => s.code().unwrap_or(-1),
            Err(_) => -1,
        }
    }
}

/// Records submitted command lines and answers with a fixed status.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub commands: Vec<String>,
    pub status: i32,
}

impl CommandHost for RecordingHost {
    fn exec(&mut self, cmd: &str) -> i32 {
        self.commands.push(cmd.to_string());
        self.status
    }
}
