//! Implementations of the built-in procedures callable from expressions.
//!
//! Signature checks happen here against the evaluated arguments. The
//! side-effecting ones (`readstring`, `trycompile`, `set_defaults`, the
//! message family) still validate their arguments in skip mode but perform
//! no effect.

use crate::error::Result;
use crate::lexer::RowCol;
use crate::logger::LogLevel;
use crate::model::{BaseType, DeclId, DeclKind, ProcKind, Type, Value};
use crate::parser::{Evaluated, Parser};
use crate::path;

/// Largest file `readstring` accepts, in bytes.
const MAX_READSTRING_LEN: usize = 16_000;

impl Parser<'_> {
    pub(crate) fn eval_proc(&mut self, proc: ProcKind, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        match proc {
            ProcKind::SameList => self.proc_same_list(args, loc),
            ProcKind::SameSet => self.proc_same_set(args, loc),
            ProcKind::Toint => self.proc_toint(args, loc),
            ProcKind::Toreal => self.proc_toreal(args, loc),
            ProcKind::Tostring => self.proc_tostring(args, loc),
            ProcKind::Topath => self.proc_topath(args, loc),
            ProcKind::Error => self.proc_print(args, loc, LogLevel::Error),
            ProcKind::Warning => self.proc_print(args, loc, LogLevel::Warning),
            ProcKind::Message => self.proc_print(args, loc, LogLevel::Message),
            ProcKind::Dump => self.proc_dump(args, loc),
            ProcKind::Abspath => self.proc_abspath(args, loc),
            ProcKind::Relpath => self.proc_relpath(args, loc),
            ProcKind::Readstring => self.proc_readstring(args, loc),
            ProcKind::Trycompile => self.proc_trycompile(args, loc),
            ProcKind::BuildDir => self.proc_build_dir(args, loc),
            ProcKind::Modname => self.proc_modname(args, loc),
            ProcKind::SetDefaults => self.proc_set_defaults(args, loc),
        }
    }

    // ------------------------------------------------------------------
    // helpers

    /// The module declaration behind a module-valued argument, if it is
    /// one.
    fn module_arg(&self, e: &Evaluated) -> Option<DeclId> {
        if e.ty.is_some() {
            return None;
        }
        let Value::Inst(inst) = &e.value else {
            return None;
        };
        let meta = self.world.inst(*inst).meta;
        matches!(self.world.decl(meta).kind, DeclKind::Module(_)).then_some(meta)
    }

    fn current_dir(&self) -> String {
        self.world.decl(self.module).module().expect("current module").dir.clone()
    }

    fn builtins_value(&self, name: &str) -> Value {
        let inst = self.world.decl(self.builtins.module).module().and_then(|m| m.inst).expect("builtins instance");
        self.world.inst(inst).get(name).cloned().unwrap_or(Value::Nil)
    }

    fn builtins_str(&self, name: &str) -> String {
        self.builtins_value(name).as_str().unwrap_or_default().to_string()
    }

    fn expect_base(&self, e: &Evaluated, base: BaseType, loc: RowCol, message: &str) -> Result<()> {
        if !e.ty.as_ref().is_some_and(|t| t.is_base(base)) {
            return Err(self.err(loc, message));
        }
        Ok(())
    }

    fn is_list_of(&self, e: &Evaluated, base: BaseType) -> bool {
        matches!(e.ty.as_ref().and_then(Type::elem), Some(t) if t.is_base(base))
    }

    /// Makes a relative path argument absolute against the current module.
    fn absolute(&self, p: &str, loc: RowCol, context: &str) -> Result<String> {
        if p.starts_with('/') {
            Ok(p.to_string())
        } else {
            path::join(&self.current_dir(), p).map_err(|_| self.err(loc, context))
        }
    }

    // ------------------------------------------------------------------
    // list predicates

    fn check_same_list_args(&self, args: &[Evaluated], loc: RowCol) -> Result<()> {
        if args.len() != 2 {
            return Err(self.err(loc, "expecting two arguments"));
        }
        let (a, b) = (&args[0], &args[1]);
        if !matches!(a.ty, Some(Type::List(_))) || !matches!(b.ty, Some(Type::List(_))) {
            return Err(self.err(loc, "expecting two arguments of list type"));
        }
        if a.ty != b.ty {
            return Err(self.err(loc, "expecting two arguments of same list type"));
        }
        Ok(())
    }

    fn proc_same_list(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        self.check_same_list_args(args, loc)?;
        let (Value::List(a), Value::List(b)) = (&args[0].value, &args[1].value) else {
            return Err(self.err(loc, "expecting two arguments of list type"));
        };
        let eq = self.world.list(*a) == self.world.list(*b);
        Ok(Evaluated::new(Value::Bool(eq), Type::Base(BaseType::Bool)))
    }

    fn proc_same_set(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        self.check_same_list_args(args, loc)?;
        let (Value::List(a), Value::List(b)) = (&args[0].value, &args[1].value) else {
            return Err(self.err(loc, "expecting two arguments of list type"));
        };
        let left = self.world.list(*a);
        let right = self.world.list(*b);
        let eq = left.iter().all(|item| right.contains(item)) && right.iter().all(|item| left.contains(item));
        Ok(Evaluated::new(Value::Bool(eq), Type::Base(BaseType::Bool)))
    }

    // ------------------------------------------------------------------
    // conversions

    fn proc_toint(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.len() != 1 {
            return Err(self.err(loc, "expecting one argument"));
        }
        self.expect_base(&args[0], BaseType::Real, loc, "expecting one argument of type real")?;
        let Value::Real(r) = args[0].value else {
            return Err(self.err(loc, "expecting one argument of type real"));
        };
        Ok(Evaluated::new(Value::Int(r as i64), Type::Base(BaseType::Int)))
    }

    fn proc_toreal(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.len() != 1 {
            return Err(self.err(loc, "expecting one argument"));
        }
        self.expect_base(&args[0], BaseType::Int, loc, "expecting one argument of type integer")?;
        let Value::Int(i) = args[0].value else {
            return Err(self.err(loc, "expecting one argument of type integer"));
        };
        Ok(Evaluated::new(Value::Real(i as f64), Type::Base(BaseType::Real)))
    }

    fn proc_tostring(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.len() != 1 {
            return Err(self.err(loc, "expecting one argument"));
        }
        let arg = &args[0];
        if !matches!(arg.ty, Some(Type::Base(_) | Type::Enum(_))) {
            return Err(self.err(loc, "expecting one argument of a base type"));
        }
        let text = match &arg.value {
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Path(p) => path::denormalize(p).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Real(r) => ryu::Buffer::new().format(*r).to_string(),
            Value::Str(s) | Value::Symbol(s) => s.clone(),
            _ => return Err(self.err(loc, "expecting one argument of a base type")),
        };
        Ok(Evaluated::new(Value::Str(text), Type::Base(BaseType::String)))
    }

    fn proc_topath(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.len() != 1 {
            return Err(self.err(loc, "expecting one argument"));
        }
        self.expect_base(&args[0], BaseType::String, loc, "expecting one argument of string type")?;
        let Value::Str(s) = &args[0].value else {
            return Err(self.err(loc, "expecting one argument of string type"));
        };
        let normalized = match path::normalize(s) {
            Ok(p) => p,
            Err(path::PathError::NotSupported) => return Err(self.err(loc, "this path format is not supported")),
            Err(path::PathError::InvalidFormat) => return Err(self.err(loc, "this path format is invalid")),
            Err(path::PathError::OutOfSpace) => return Err(self.err(loc, "this path is too long to be handled")),
        };
        Ok(Evaluated::new(Value::Path(normalized), Type::Base(BaseType::Path)))
    }

    // ------------------------------------------------------------------
    // diagnostics

    fn proc_print(&mut self, args: &[Evaluated], loc: RowCol, level: LogLevel) -> Result<Evaluated> {
        if args.is_empty() {
            return Err(self.err(loc, "expecting at least one argument"));
        }
        let mut text = String::new();
        for arg in args {
            self.expect_base(arg, BaseType::String, loc, "expecting one or more arguments of type string")?;
            if let Value::Str(s) = &arg.value {
                text.push_str(s);
            }
        }
        if !self.skip {
            if level == LogLevel::Error {
                return Err(self.err(loc, text));
            }
            let source = self.lex.source();
            self.logger.log(level, Some(source.as_ref()), loc, &text);
        }
        Ok(Self::no_result())
    }

    fn proc_dump(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.is_empty() || args.len() > 2 {
            return Err(self.err(loc, "expecting one or two arguments"));
        }
        if !self.skip {
            let json = self.world.value_to_json(&args[0].value);
            let rendered = serde_json::to_string_pretty(&json).unwrap_or_else(|_| "<unprintable>".to_string());
            let text = match args.get(1).map(|t| &t.value) {
                Some(Value::Str(title)) => format!("{title}: {rendered}"),
                _ => rendered,
            };
            let source = self.lex.source();
            self.logger.log(LogLevel::Debug, Some(source.as_ref()), loc, &text);
        }
        Ok(Self::no_result())
    }

    // ------------------------------------------------------------------
    // path queries

    fn proc_abspath(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        let path_ty = Type::Base(BaseType::Path);
        match args {
            [] => Ok(Evaluated::new(Value::Path(self.current_dir()), path_ty)),
            [single] => {
                if let Some(module) = self.module_arg(single) {
                    let dir = self.world.decl(module).module().expect("module argument").dir.clone();
                    return Ok(Evaluated::new(Value::Path(dir), path_ty));
                }
                self.expect_base(single, BaseType::Path, loc, "expecting argument of type path")?;
                let Value::Path(p) = &single.value else {
                    return Err(self.err(loc, "expecting argument of type path"));
                };
                let abs = self.absolute(p, loc, "cannot convert this path (5)")?;
                Ok(Evaluated::new(Value::Path(abs), path_ty))
            }
            [first, second] => {
                let Some(module) = self.module_arg(first) else {
                    return Err(self.err(loc, "expecting first argument of module type"));
                };
                self.expect_base(second, BaseType::Path, loc, "expecting second argument of type path")?;
                let Value::Path(p) = &second.value else {
                    return Err(self.err(loc, "expecting second argument of type path"));
                };
                let abs = if p.starts_with('/') {
                    p.clone()
                } else {
                    let dir = self.world.decl(module).module().expect("module argument").dir.clone();
                    path::join(&dir, p).map_err(|_| self.err(loc, "cannot convert this path (6)"))?
                };
                Ok(Evaluated::new(Value::Path(abs), path_ty))
            }
            _ => Err(self.err(loc, "expecting zero, one or two arguments")),
        }
    }

    fn proc_relpath(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        let module = match args {
            [] => self.module,
            [single] => self.module_arg(single).ok_or_else(|| self.err(loc, "invalid argument type"))?,
            _ => return Err(self.err(loc, "expecting zero or one arguments")),
        };
        let rdir = self.world.decl(module).module().expect("module argument").rdir.clone();
        Ok(Evaluated::new(Value::Path(rdir), Type::Base(BaseType::Path)))
    }

    fn proc_build_dir(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if !args.is_empty() {
            return Err(self.err(loc, "expecting zero arguments"));
        }
        let root = self.builtins_str("root_build_dir");
        let rdir = self.world.decl(self.module).module().expect("current module").rdir.clone();
        let dir = path::join(&root, &rdir).map_err(|_| self.err(loc, "cannot convert this path (2)"))?;
        Ok(Evaluated::new(Value::Path(dir), Type::Base(BaseType::Path)))
    }

    fn proc_modname(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        let module = match args {
            [] => self.module,
            [single] => self.module_arg(single).ok_or_else(|| self.err(loc, "invalid argument type"))?,
            _ => return Err(self.err(loc, "expecting zero or one arguments")),
        };
        let label = self.world.decl(module).module().expect("module argument").label.clone();
        Ok(Evaluated::new(Value::Str(label), Type::Base(BaseType::String)))
    }

    // ------------------------------------------------------------------
    // file probes

    fn proc_readstring(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.len() != 1 {
            return Err(self.err(loc, "expecting one argument"));
        }
        self.expect_base(&args[0], BaseType::Path, loc, "expecting one argument of type path")?;
        let Value::Path(p) = &args[0].value else {
            return Err(self.err(loc, "expecting one argument of type path"));
        };
        let abs = self.absolute(p, loc, "cannot convert this path (7)")?;

        if self.skip {
            return Ok(Evaluated::new(Value::Str(String::new()), Type::Base(BaseType::String)));
        }

        let bytes = std::fs::read(path::denormalize(&abs))
            .map_err(|_| self.err(loc, format!("cannot open file for reading: {abs}")))?;
        if bytes.len() > MAX_READSTRING_LEN {
            return Err(self.err(loc, format!("file is too big to be read: {abs}")));
        }
        let text = std::str::from_utf8(&bytes).map_err(|_| self.err(loc, format!("invalid utf-8 format: {abs}")))?;

        // collapse line breaks and tabs to spaces, escape backslash and
        // quote, strip leading and trailing whitespace
        let mut out = String::with_capacity(text.len());
        let mut last_solid = 0usize;
        for ch in text.chars() {
            if out.is_empty() && ch.is_whitespace() {
                continue;
            }
            match ch {
                '\n' | '\r' | '\u{8}' | '\u{c}' | '\t' | '\u{b}' => out.push(' '),
                '\\' => {
                    out.push_str("\\\\");
                    last_solid = out.len();
                }
                '"' => {
                    out.push_str("\\\"");
                    last_solid = out.len();
                }
                _ => {
                    out.push(ch);
                    if !ch.is_whitespace() {
                        last_solid = out.len();
                    }
                }
            }
        }
        out.truncate(last_solid);
        Ok(Evaluated::new(Value::Str(out), Type::Base(BaseType::String)))
    }

    fn proc_trycompile(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.is_empty() || args.len() > 4 {
            return Err(self.err(loc, "expecting one to four arguments"));
        }
        self.expect_base(&args[0], BaseType::String, loc, "expecting at least one argument of string type")?;
        let Value::Str(code) = &args[0].value else {
            return Err(self.err(loc, "expecting at least one argument of string type"));
        };

        let root_build = self.builtins_str("root_build_dir");
        let tmp = path::join(&root_build, "./_trycompile_.c")
            .map_err(|_| self.err(loc, "cannot build temporary file path"))?;

        if !self.skip {
            std::fs::create_dir_all(path::denormalize(&root_build))
                .map_err(|_| self.err(loc, format!("error creating directory {root_build}")))?;
            std::fs::write(path::denormalize(&tmp), code)
                .map_err(|_| self.err(loc, format!("cannot create temporary file {tmp}")))?;
        }

        let toolchain = self.builtins_str("target_toolchain");
        let os = self.builtins_str("host_os");

        let mut defines = String::new();
        if let Some(arg) = args.get(1) {
            if !self.is_list_of(arg, BaseType::String) {
                return Err(self.err(loc, "expecting argument 2 of string list type"));
            }
            let Value::List(list) = &arg.value else { unreachable!("checked list type") };
            for item in self.world.list(*list).clone() {
                let Some(def) = item.as_str() else { continue };
                if def.contains("\\\"") {
                    // quoted because the define value may contain spaces
                    defines.push_str(&format!(" \"-D{def}\" "));
                } else {
                    defines.push_str(&format!(" -D{def} "));
                }
            }
        }

        let mut includes = String::new();
        if let Some(arg) = args.get(2) {
            if !self.is_list_of(arg, BaseType::Path) {
                return Err(self.err(loc, "expecting argument 3 of path list type"));
            }
            let Value::List(list) = &arg.value else { unreachable!("checked list type") };
            for item in self.world.list(*list).clone() {
                let Some(p) = item.as_str() else { continue };
                let abs = self.absolute(p, loc, "error converting to absolute path")?;
                includes.push_str(&format!(" -I\"{}\" ", path::denormalize(&abs)));
            }
        }

        let mut cflags = String::new();
        if let Some(arg) = args.get(3) {
            if !self.is_list_of(arg, BaseType::String) {
                return Err(self.err(loc, "expecting argument 4 of string list type"));
            }
            let Value::List(list) = &arg.value else { unreachable!("checked list type") };
            for item in self.world.list(*list).clone() {
                if let Some(flag) = item.as_str() {
                    cflags.push(' ');
                    cflags.push_str(flag);
                }
            }
        }

        let base = if toolchain == "msvc" { "cl /nologo /c ".to_string() } else { format!("{toolchain} -c ") };
        let silence = if matches!(os.as_str(), "win32" | "msdos" | "winrt") { " 2> nul" } else { " 2>/dev/null" };
        let cmd = format!("{base}{cflags}{includes}{defines} {}{silence}", path::denormalize(&tmp));

        let ok = if self.skip { false } else { self.host.exec(&cmd) == 0 };
        Ok(Evaluated::new(Value::Bool(ok), Type::Base(BaseType::Bool)))
    }

    // ------------------------------------------------------------------
    // toolchain defaults

    fn proc_set_defaults(&mut self, args: &[Evaluated], loc: RowCol) -> Result<Evaluated> {
        if args.len() != 2 {
            return Err(self.err(loc, "expecting two arguments"));
        }
        let key = &args[0];
        let key_ok = matches!(key.ty, Some(Type::Enum(e)) if e == self.builtins.compiler_type)
            || (key.ty.as_ref().is_some_and(|t| t.is_base(BaseType::Symbol))
                && self.world.enum_contains(self.builtins.compiler_type, &key.value));
        if !key_ok {
            return Err(self.err(loc, "first argument must be a CompilerType"));
        }
        let Value::Symbol(toolchain) = &key.value else {
            return Err(self.err(loc, "first argument must be a CompilerType"));
        };

        let config_ok = matches!(&args[1].ty, Some(Type::Class(c)) if self.world.is_subclass(*c, self.builtins.config));
        let Value::Inst(config) = &args[1].value else {
            return Err(self.err(loc, "second argument must be a Config instance"));
        };
        if !config_ok {
            return Err(self.err(loc, "second argument must be a Config instance"));
        }

        if !self.skip {
            self.world.ctdefaults.insert(toolchain.clone(), *config);
        }
        Ok(Self::no_result())
    }
}
