//! Fatal-error propagation.
//!
//! All front-end failures unwind as a single [`Error`] value carrying the
//! proximate diagnostic and, when the failure happened inside a macro
//! expansion, one "instantiated from here" frame per active lexer level.
//! The driver performs one unwind at the outer boundary and maps the error
//! to a process exit status.

use std::fmt;
use std::rc::Rc;

use crate::lexer::RowCol;

/// A macro-instantiation site recorded at the error location.
#[derive(Debug, Clone)]
pub struct Frame {
    pub source: Rc<str>,
    pub loc: RowCol,
}

#[derive(Debug, Clone)]
pub struct Error {
    /// Source label or file of the proximate cause; `None` means
    /// "no location".
    pub source: Option<Rc<str>>,
    pub loc: RowCol,
    pub message: String,
    /// Innermost frame first.
    pub frames: Vec<Frame>,
}

impl Error {
    pub fn new(source: Option<Rc<str>>, loc: RowCol, message: impl Into<String>) -> Self {
        Self { source, loc, message: message.into(), frames: Vec::new() }
    }

    /// An error with no source position.
    pub fn plain(message: impl Into<String>) -> Self {
        Self::new(None, RowCol::default(), message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) if self.loc.row != 0 => {
                write!(f, "{source}:{}:{}: {}", self.loc.row, self.loc.col, self.message)?;
            }
            Some(source) => write!(f, "{source}: {}", self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        for frame in &self.frames {
            write!(f, "\n{}:{}:{}:    instantiated from here", frame.source, frame.loc.row, frame.loc.col)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
