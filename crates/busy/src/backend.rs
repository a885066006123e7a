//! The backend facade: the stable wire between the build-graph visitor and
//! whatever consumes it.
//!
//! A [`Backend`] receives a normalized stream of abstract operations
//! through the begin-op / param / end-op / fork quartet. All methods have
//! no-op defaults, so a consumer only implements the hooks it cares about.
//! [`LoggingBackend`] renders the stream as text (the dry-run generator);
//! [`RecordingBackend`] captures it for assertions.

use std::io::Write;

use strum::{Display, IntoStaticStr};

use crate::host::{HostOs, Toolchain};

/// Operations a visitor walk can emit. `EnteringProduct` is informational
/// and has no matching `end_op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BuildOperation {
    Compile,
    LinkExe,
    LinkDll,
    LinkLib,
    RunMoc,
    RunRcc,
    RunUic,
    RunLua,
    Copy,
    EnteringProduct,
}

/// Parameters attached to the currently open operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BuildParam {
    Infile,
    Outfile,
    Cflag,
    Define,
    IncludeDir,
    Ldflag,
    LibDir,
    LibName,
    LibFile,
    Framework,
    DefFile,
    Name,
    Arg,
}

pub trait Backend {
    /// Opens an operation. Returning `false` cancels the walk.
    fn begin_op(
        &mut self,
        _op: BuildOperation,
        _command: &str,
        _toolchain: Option<Toolchain>,
        _os: Option<HostOs>,
    ) -> bool {
        true
    }

    fn op_param(&mut self, _param: BuildParam, _value: &str) {}

    fn end_op(&mut self) {}

    /// Parallelism hint: `n >= 0` opens a group of `n` subordinate
    /// operations, `n < 0` closes the current group. Advisory only.
    fn fork_group(&mut self, _n: i32) {}
}

/// Discards the stream.
#[derive(Debug, Default)]
pub struct NullBackend;

impl Backend for NullBackend {}

/// Renders the operation stream as indented text lines.
pub struct LoggingBackend<W: Write> {
    out: W,
}

impl<W: Write> LoggingBackend<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Backend for LoggingBackend<W> {
    fn begin_op(
        &mut self,
        op: BuildOperation,
        command: &str,
        _toolchain: Option<Toolchain>,
        _os: Option<HostOs>,
    ) -> bool {
        let tag = match op {
            BuildOperation::Compile => "COMPILE",
            BuildOperation::LinkExe | BuildOperation::LinkDll | BuildOperation::LinkLib => "LINK",
            BuildOperation::RunMoc => "MOC",
            BuildOperation::RunRcc => "RCC",
            BuildOperation::RunUic => "UIC",
            BuildOperation::RunLua => "SCRIPT",
            BuildOperation::Copy => "COPY",
            BuildOperation::EnteringProduct => "PRODUCT",
        };
        let _ = writeln!(self.out, "{tag}: {command}");
        true
    }

    fn op_param(&mut self, param: BuildParam, value: &str) {
        let name: &'static str = param.into();
        let _ = writeln!(self.out, "  {}: {value}", name.to_uppercase());
    }

    fn fork_group(&mut self, n: i32) {
        if n >= 0 {
            let _ = writeln!(self.out, "BEGIN PARALLEL: {n}");
        } else {
            let _ = writeln!(self.out, "END PARALLEL");
        }
    }
}

/// One captured backend event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Begin { op: BuildOperation, command: String },
    Param { param: BuildParam, value: String },
    End,
    Fork(i32),
}

/// Captures the stream for tests; optionally cancels on a chosen
/// operation.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub events: Vec<BackendEvent>,
    pub cancel_on: Option<BuildOperation>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `Begin` events of the given operation, in emission order.
    pub fn begins(&self, op: BuildOperation) -> Vec<&BackendEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, BackendEvent::Begin { op: o, .. } if *o == op))
            .collect()
    }

    /// The parameters of the `idx`-th operation of the given kind, up to
    /// its `End`.
    pub fn params_of(&self, op: BuildOperation, idx: usize) -> Vec<(BuildParam, &str)> {
        let mut seen = 0usize;
        let mut collecting = false;
        let mut out = Vec::new();
        for event in &self.events {
            match event {
                BackendEvent::Begin { op: o, .. } => {
                    if collecting {
                        break;
                    }
                    if *o == op {
                        if seen == idx {
                            collecting = true;
                        }
                        seen += 1;
                    }
                }
                BackendEvent::Param { param, value } if collecting => out.push((*param, value.as_str())),
                BackendEvent::End if collecting => break,
                _ => {}
            }
        }
        out
    }

    /// The commands of all `EnteringProduct` events.
    pub fn entered_products(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Begin { op: BuildOperation::EnteringProduct, command } => Some(command.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Backend for RecordingBackend {
    fn begin_op(
        &mut self,
        op: BuildOperation,
        command: &str,
        _toolchain: Option<Toolchain>,
        _os: Option<HostOs>,
    ) -> bool {
        self.events.push(BackendEvent::Begin { op, command: command.to_string() });
        self.cancel_on != Some(op)
    }

    fn op_param(&mut self, param: BuildParam, value: &str) {
        self.events.push(BackendEvent::Param { param, value: value.to_string() });
    }

    fn end_op(&mut self) {
        self.events.push(BackendEvent::End);
    }

    fn fork_group(&mut self, n: i32) {
        self.events.push(BackendEvent::Fork(n));
    }
}
