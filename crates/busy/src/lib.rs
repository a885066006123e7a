//! BUSY — a self-contained, bootstrap-capable build system for C/C++
//! projects.
//!
//! A project describes its products in declarative `BUSY` files, one per
//! source subdirectory. This crate is the front-end pipeline: the path
//! model, the lexer with its macro-expansion layer, the single-pass
//! evaluating parser over a typed expression language with modules,
//! classes, enums, parameters and macros, the product selector, and the
//! build-graph visitor that turns resolved products into a normalized
//! stream of toolchain operations consumed through the [`Backend`] trait.

mod backend;
mod builtins;
mod error;
mod hilex;
mod host;
mod lexer;
mod logger;
mod model;
mod params;
mod parser;
mod path;
mod procs;
mod select;
mod session;
mod unicode;
mod visitor;

pub use crate::{
    backend::{Backend, BackendEvent, BuildOperation, BuildParam, LoggingBackend, NullBackend, RecordingBackend},
    builtins::Builtins,
    error::{Error, Frame, Result},
    host::{CommandHost, HostConfig, HostOs, NullHost, ProcessHost, RecordingHost, Toolchain},
    lexer::{Lexer, RowCol, Token, TokenKind},
    logger::{ConsoleLogger, LogLevel, Logger, NoopLogger, RecordingLogger},
    model::{
        BaseType, ClassDecl, Decl, DeclId, DeclKind, EnumDecl, FieldDecl, InstId, Instance, ListId, MacroDef,
        ModuleDef, OutValue, ProcKind, Rw, Type, Value, VarDecl, Visibility, World,
    },
    params::{ParamEntry, ParamTable},
    path::{PathError, PathPart, apply_expansion, denormalize, exists, join, make_relative, normalize, path_part},
    select::find_products,
    session::Session,
    visitor::{Visitor, reset_outputs},
};
