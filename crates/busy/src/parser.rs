//! The single-pass evaluating parser.
//!
//! There is no separate execute phase: as tokens are consumed the parser
//! builds declaration nodes, computes initialization values into the
//! enclosing instance, runs statements, expands macros through the
//! hierarchical lexer, and recurses into submodules. `if` branches that are
//! not taken are still parsed and type-checked under skip mode, which
//! suppresses side effects only.

use std::rc::Rc;

use crate::builtins::{Builtins, default_value};
use crate::error::{Error, Result};
use crate::hilex::{HiLex, TokenChain};
use crate::host::CommandHost;
use crate::lexer::{RowCol, Token, TokenKind};
use crate::logger::{LogLevel, Logger};
use crate::model::{
    BaseType, BlockDef, ClassDecl, Decl, DeclId, DeclKind, EnumDecl, InstId, Instance, MacroDef, ModuleDef, Rw, Type,
    Value, VarDecl, Visibility, World,
};
use crate::params::ParamTable;
use crate::path;

/// A computed expression result: the value together with its static type.
/// `ty` is `None` for things without one (module references, procedures
/// without a result).
#[derive(Debug, Clone)]
pub(crate) struct Evaluated {
    pub value: Value,
    pub ty: Option<Type>,
}

impl Evaluated {
    pub(crate) fn new(value: Value, ty: Type) -> Self {
        Self { value, ty: Some(ty) }
    }

    fn none() -> Self {
        Self { value: Value::Nil, ty: None }
    }
}

/// Read-only classification of a resolved designator, mirroring how it may
/// be used on the left of an assignment: `-1` rvalue, `0` read-write, `1`
/// read-only, `2` constructor-bound (`.field`).
type Ro = i8;

struct IdentDef {
    name: String,
    visi: Visibility,
    loc: RowCol,
}

pub(crate) struct Parser<'a> {
    pub(crate) world: &'a mut World,
    pub(crate) builtins: &'a Builtins,
    pub(crate) params: &'a mut ParamTable,
    pub(crate) logger: &'a mut dyn Logger,
    pub(crate) host: &'a mut dyn CommandHost,
    pub(crate) lex: HiLex,
    pub(crate) module: DeclId,
    pub(crate) skip: bool,
}

/// Short display label for a module directory: its last `level + 1` path
/// segments.
fn calc_label(dir: &str, levels: usize) -> &str {
    let mut remaining = levels;
    let bytes = dir.as_bytes();
    let mut i = bytes.len();
    while i > 0 {
        i -= 1;
        if bytes[i] == b'/' {
            remaining -= 1;
            if remaining == 0 {
                return &dir[i + 1..];
            }
        }
    }
    dir
}

/// Parses one module's `BUSY` file into an already-created module
/// declaration, recursing into submodules.
pub(crate) fn parse_module(
    world: &mut World,
    builtins: &Builtins,
    params: &mut ParamTable,
    logger: &mut dyn Logger,
    host: &mut dyn CommandHost,
    module: DeclId,
) -> Result<()> {
    let inst = world.add_inst(Instance::new(module));

    let (dir, altpath, level) = {
        let mut level = 0usize;
        let mut cur = world.decl(module).module().and_then(|m| m.outer);
        while let Some(outer) = cur {
            level += 1;
            cur = world.decl(outer).module().and_then(|m| m.outer);
        }
        let m = world.decl(module).module().expect("module declaration");
        (m.dir.clone(), m.altpath.clone(), level)
    };
    let label = calc_label(&dir, level + 1).to_string();

    let busy_file = path::join(&dir, "./BUSY")
        .map_err(|_| Error::plain(format!("cannot build BUSY file path below {dir}")))?;
    let mut dummy = false;
    let file = if path::exists(&busy_file).is_some() {
        busy_file
    } else if let Some(alt) = altpath {
        if path::exists(&alt).is_none() {
            return Err(Error::new(
                Some(Rc::from(label.as_str())),
                world.decl(module).loc,
                format!(
                    "neither can find '{}' nor alternative path '{}'",
                    path::denormalize(&busy_file),
                    path::denormalize(&alt)
                ),
            ));
        }
        dummy = true;
        alt
    } else {
        return Err(Error::new(
            Some(Rc::from(label.as_str())),
            world.decl(module).loc,
            format!("cannot open file for reading: {}", path::denormalize(&busy_file)),
        ));
    };

    if let DeclKind::Module(m) = &mut world.decl_mut(module).kind {
        m.inst = Some(inst);
        m.label.clone_from(&label);
        m.file = Some(file.clone());
        m.dummy = dummy;
    }

    if !dummy {
        logger.log(
            LogLevel::Message,
            None,
            RowCol::default(),
            &format!("# analyzing {}", path::denormalize(&file)),
        );
    }

    let text = std::fs::read_to_string(path::denormalize(&file))
        .map_err(|_| Error::plain(format!("cannot open file for reading: {}", path::denormalize(&file))))?;
    let source: Rc<str> = Rc::from(label.as_str());

    let mut parser = Parser {
        world,
        builtins,
        params,
        logger,
        host,
        lex: HiLex::new(&text, source),
        module,
        skip: false,
    };
    parser.block(module, false, None)
}

impl Parser<'_> {
    // ------------------------------------------------------------------
    // token plumbing and diagnostics

    pub(crate) fn err(&self, loc: RowCol, message: impl Into<String>) -> Error {
        self.lex.trail(Error::new(Some(self.lex.source()), loc, message))
    }

    fn err_at(&self, tok: &Token, message: impl Into<String>) -> Error {
        self.lex.trail(Error::new(Some(tok.source.clone()), tok.loc, message))
    }

    pub(crate) fn warn(&mut self, loc: RowCol, message: &str) {
        let source = self.lex.source();
        self.logger.log(LogLevel::Warning, Some(source.as_ref()), loc, message);
    }

    fn next(&mut self) -> Result<Token> {
        let tok = self.lex.next_token();
        if tok.is(TokenKind::Invalid) {
            return Err(self.err_at(&tok, tok.text.clone()));
        }
        Ok(tok)
    }

    fn peek(&mut self, off: usize) -> Token {
        self.lex.peek(off)
    }

    fn unexpected<T>(&self, tok: &Token, context: &str) -> Result<T> {
        if tok.is(TokenKind::Invalid) {
            Err(self.err_at(tok, tok.text.clone()))
        } else {
            Err(self.err_at(tok, format!("unexpected '{}' {context}", tok.kind)))
        }
    }

    // ------------------------------------------------------------------
    // scopes and shared predicates

    fn module_def(&self) -> &ModuleDef {
        self.world.decl(self.module).module().expect("current module")
    }

    fn scope_up(&self, scope: DeclId) -> Option<DeclId> {
        match &self.world.decl(scope).kind {
            DeclKind::Block(b) => b.up,
            _ => None,
        }
    }

    /// The `#this` instance visible from a scope, searching outward
    /// through enclosing blocks.
    fn this_of(&self, scope: DeclId) -> Option<InstId> {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if let DeclKind::Block(b) = &self.world.decl(s).kind {
                if b.this.is_some() {
                    return b.this;
                }
            }
            cur = self.scope_up(s);
        }
        None
    }

    fn same_type(&self, a: Option<&Type>, b: Option<&Type>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Whether a value of type `rhs` may initialize a slot of class-typed
    /// `lhs` (same class or a subclass of it).
    fn class_assignable(&self, lhs: Option<&Type>, rhs: Option<&Type>) -> bool {
        match (lhs, rhs) {
            (Some(Type::Class(l)), Some(Type::Class(r))) => self.world.is_subclass(*r, *l),
            _ => false,
        }
    }

    fn in_enum(&self, ty: Option<&Type>, value: &Value) -> bool {
        match ty {
            Some(Type::Enum(id)) => self.world.enum_contains(*id, value),
            _ => false,
        }
    }

    /// List/element relation of two operand types: 0 none, 1 both lists of
    /// the same type, 2 left list + right element, 3 right list + left
    /// element.
    fn list_relation(&self, lt: Option<&Type>, rt: Option<&Type>, lv: &Value, rv: &Value) -> u8 {
        let l_list = matches!(lt, Some(Type::List(_)));
        let r_list = matches!(rt, Some(Type::List(_)));
        if !l_list && !r_list {
            return 0;
        }
        if l_list && r_list && self.same_type(lt, rt) {
            return 1;
        }
        if l_list {
            let elem = lt.and_then(Type::elem);
            if self.same_type(elem, rt) || self.class_assignable(elem, rt) || self.in_enum(elem, rv) {
                return 2;
            }
            return 0;
        }
        let elem = rt.and_then(Type::elem);
        if self.same_type(lt, elem) || self.class_assignable(lt, elem) || self.in_enum(elem, lv) {
            return 3;
        }
        0
    }

    // ------------------------------------------------------------------
    // identdef and declarations

    fn identdef(&mut self, scope: DeclId) -> Result<IdentDef> {
        let t = self.next()?;
        if !t.is(TokenKind::Ident) {
            return Err(self.err_at(&t, "expecting an ident"));
        }
        if self.world.scope_get(scope, &t.text).is_some() {
            return Err(self.err_at(&t, format!("the name is already declared in this scope: {}", t.text)));
        }
        let visi = match self.peek(1).kind {
            TokenKind::Bang => {
                self.next()?;
                Visibility::PublicDefault
            }
            TokenKind::Star => {
                self.next()?;
                Visibility::Public
            }
            TokenKind::Minus => {
                self.next()?;
                Visibility::Protected
            }
            _ => Visibility::Private,
        };
        Ok(IdentDef { name: t.text, visi, loc: t.loc })
    }

    fn add_to_scope(&mut self, scope: DeclId, id: &IdentDef, kind: DeclKind) -> DeclId {
        let decl = self.world.add_decl(Decl {
            kind,
            name: id.name.clone(),
            visi: id.visi,
            owner: Some(scope),
            loc: id.loc,
        });
        self.world.scope_insert(scope, &id.name, decl);
        decl
    }

    // ------------------------------------------------------------------
    // blocks and statements

    fn end_of_block(tok: &Token, pascal: bool) -> bool {
        if pascal {
            matches!(tok.kind, TokenKind::KwEnd | TokenKind::KwElsif | TokenKind::KwElse)
        } else {
            tok.is(TokenKind::Rbrace)
        }
    }

    pub(crate) fn block(&mut self, scope: DeclId, pascal: bool, in_brace: Option<RowCol>) -> Result<()> {
        let mut t = self.peek(1);
        while !Self::end_of_block(&t, pascal) && !t.is(TokenKind::Eof) {
            let module_level = scope == self.module;
            match t.kind {
                TokenKind::KwSubdir | TokenKind::KwSubmod | TokenKind::KwSubmodule if module_level => {
                    self.submodule(t.is(TokenKind::KwSubdir))?;
                }
                TokenKind::KwDefine if module_level => self.macrodef()?,
                TokenKind::KwVar | TokenKind::KwLet | TokenKind::KwParam => self.vardecl(scope)?,
                TokenKind::KwType => self.typedecl(scope)?,
                TokenKind::KwIf => self.condition(scope)?,
                TokenKind::Hat | TokenKind::Dot | TokenKind::Ident => self.assig_or_call(scope)?,
                _ => return self.unexpected(&t, "in block body"),
            }
            t = self.peek(1);
            if t.is(TokenKind::Semi) {
                self.next()?;
                t = self.peek(1);
            }
        }
        if Self::end_of_block(&t, pascal) {
            match in_brace {
                None => return self.unexpected(&t, "at module level"),
                Some(_) if !pascal => {
                    self.next()?; // eat '}'
                }
                Some(_) => {}
            }
        } else if t.is(TokenKind::Eof) {
            if let Some(open_loc) = in_brace {
                return Err(self.err(open_loc, "non-terminated block"));
            }
        }
        Ok(())
    }

    /// Creates a temporary block scope for a nested body and parses it.
    fn nested_block(&mut self, scope: DeclId, this: Option<InstId>, open: &Token, pascal: bool) -> Result<()> {
        let inst = self.world.add_inst(Instance::new(DeclId::new(0)));
        let block = self.world.add_decl(Decl {
            kind: DeclKind::Block(BlockDef { up: Some(scope), inst: Some(inst), this, ..Default::default() }),
            name: String::new(),
            visi: Visibility::Private,
            owner: Some(scope),
            loc: open.loc,
        });
        self.world.inst_mut(inst).meta = block;
        self.block(block, pascal, Some(open.loc))
    }

    // ------------------------------------------------------------------
    // submodules

    /// The dotted parameter-table prefix for a child of the current module.
    fn param_prefix(&self) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(self.module);
        while let Some(id) = cur {
            let decl = self.world.decl(id);
            if decl.name.is_empty() {
                break;
            }
            parts.push(decl.name.clone());
            cur = decl.owner;
        }
        parts.reverse();
        parts.join(".")
    }

    fn submodule(&mut self, subdir: bool) -> Result<()> {
        self.next()?; // keyword
        let id = self.identdef(self.module)?;
        if self.module_def().dummy {
            return Err(self.err(id.loc, "submod declarations not allowed here"));
        }
        if id.visi == Visibility::PublicDefault {
            return Err(self.err(id.loc, "'!' is not applicable here"));
        }

        let mut rel = id.name.clone();
        let mut path_tok_loc = id.loc;
        let mut t = self.peek(1);
        if t.is(TokenKind::Eq) || t.is(TokenKind::ColonEq) {
            self.next()?;
            let pt = self.next()?;
            if !pt.is(TokenKind::LitPath) && !pt.is(TokenKind::Ident) {
                return Err(self.err_at(&pt, "expecting a path or an ident"));
            }
            rel = pt.text.clone();
            path_tok_loc = pt.loc;
            if pt.is(TokenKind::LitPath) {
                if rel.starts_with('\'') {
                    rel = rel[1..rel.len() - 1].to_string();
                }
                if subdir {
                    // `subdir` keeps the legacy restriction to an immediate
                    // subdirectory
                    if rel.starts_with("//") || rel.starts_with("..") {
                        return Err(self.err(pt.loc, "this path is not supported here"));
                    }
                    let plain = rel.strip_prefix("./").unwrap_or(&rel);
                    if plain.contains('/') {
                        return Err(self.err(pt.loc, "expecting an immediate subdirectory"));
                    }
                }
            }
            t = self.peek(1);
        }

        let mut altpath_raw: Option<String> = None;
        if t.is(TokenKind::KwElse) {
            self.next()?;
            let at = self.next()?;
            if !at.is(TokenKind::LitPath) {
                return Err(self.err_at(&at, "expecting a path after 'else'"));
            }
            altpath_raw = Some(at.text);
            t = self.peek(1);
        }

        // module-parameter bindings, evaluated in the outer scope and
        // seeded into the parameter table before the submodule is parsed
        let mut bindings: Vec<(String, String, RowCol)> = Vec::new();
        if t.is(TokenKind::Lpar) {
            self.next()?;
            let mut t = self.peek(1);
            while !t.is(TokenKind::Rpar) && !t.is(TokenKind::Eof) {
                if !t.is(TokenKind::Ident) {
                    return self.unexpected(&t, "in module parameter list");
                }
                self.next()?;
                let pname = t.clone();
                t = self.peek(1);
                let value = if t.is(TokenKind::Eq) || t.is(TokenKind::ColonEq) {
                    self.next()?;
                    let vt = self.peek(1);
                    let e = self.expression(self.module, None)?.0;
                    let rendered = match (&e.ty, &e.value) {
                        (Some(Type::Base(_)), Value::Bool(b)) => if *b { "true" } else { "false" }.to_string(),
                        (Some(Type::Base(_)), Value::Int(i)) => i.to_string(),
                        (Some(Type::Base(_)), Value::Real(r)) => ryu::Buffer::new().format(*r).to_string(),
                        (Some(Type::Base(BaseType::Symbol)) | Some(Type::Enum(_)), Value::Symbol(s)) => {
                            format!("`{s}")
                        }
                        (Some(Type::Base(_)), Value::Str(s) | Value::Path(s)) => s.clone(),
                        _ => return Err(self.err(vt.loc, "parameter value must be of basic type")),
                    };
                    t = self.peek(1);
                    rendered
                } else {
                    "true".to_string()
                };
                bindings.push((pname.text, value, pname.loc));
                if t.is(TokenKind::Comma) {
                    self.next()?;
                    t = self.peek(1);
                }
            }
            if t.is(TokenKind::Eof) {
                return Err(self.err_at(&t, "non-terminated module parameter list"));
            }
            self.next()?; // ')'
        }

        let cur_dir = self.module_def().dir.clone();
        let cur_rdir = self.module_def().rdir.clone();

        // absolute fallback path
        let altpath = match altpath_raw {
            None => None,
            Some(mut raw) => {
                if raw.starts_with('\'') {
                    raw = raw[1..raw.len() - 1].to_string();
                }
                let abs = if raw.starts_with('/') {
                    raw
                } else if raw.starts_with('.') {
                    path::join(&cur_dir, &raw).map_err(|_| self.err(path_tok_loc, "cannot convert this path (1)"))?
                } else {
                    format!("{cur_dir}/{raw}")
                };
                Some(abs)
            }
        };

        // absolute directory of the submodule
        let new_dir = if rel.starts_with('/') {
            rel.clone()
        } else if rel.starts_with('.') {
            path::join(&cur_dir, &rel).map_err(|_| self.err(path_tok_loc, "cannot convert this path (4)"))?
        } else {
            format!("{cur_dir}/{rel}")
        };

        // filesystem-relative dir against the root module
        let fsrdir = {
            let mut root = self.module;
            while let Some(outer) = self.world.decl(root).module().and_then(|m| m.outer) {
                root = outer;
            }
            let root_dir = self.world.decl(root).module().expect("root module").dir.clone();
            path::make_relative(&root_dir, &new_dir)
                .map_err(|_| self.err(path_tok_loc, "error creating relative file system path"))?
        };

        // a module must not include a directory already on its ancestor
        // chain
        let mut cur = Some(self.module);
        while let Some(m) = cur {
            let def = self.world.decl(m).module().expect("ancestors are modules");
            if def.dir == new_dir {
                return Err(self.err(path_tok_loc, "path points to the same directory as current or outer module"));
            }
            cur = def.outer;
        }

        let submod = self.add_to_scope(
            self.module,
            &id,
            DeclKind::Module(ModuleDef {
                outer: Some(self.module),
                dir: new_dir,
                rdir: format!("{cur_rdir}/{}", id.name),
                fsrdir,
                dirname: id.name.clone(),
                altpath,
                ..Default::default()
            }),
        );

        let prefix = self.param_prefix();
        for (pname, value, ploc) in bindings {
            let key = if prefix.is_empty() {
                format!("{}.{pname}", id.name)
            } else {
                format!("{prefix}.{}.{pname}", id.name)
            };
            if self.params.seed(&key, value) {
                self.warn(ploc, &format!("parameter {key} is overridden by outer value"));
            }
        }

        parse_module(self.world, self.builtins, self.params, self.logger, self.host, submod)?;

        // the outer instance points to the nested instance by name
        let nested_inst = self.world.decl(submod).module().and_then(|m| m.inst).expect("parsed module instance");
        let outer_inst = self.module_def().inst.expect("current module instance");
        self.world.inst_mut(outer_inst).set(id.name, Value::Inst(nested_inst));
        Ok(())
    }

    // ------------------------------------------------------------------
    // macros

    fn macrodef(&mut self) -> Result<()> {
        self.next()?; // keyword
        let id = self.identdef(self.module)?;

        let mut t = self.next()?;
        let mut macro_params: Vec<String> = Vec::new();
        if t.is(TokenKind::Lpar) {
            let lpar = t.clone();
            t = self.next()?;
            while !t.is(TokenKind::Rpar) {
                if t.is(TokenKind::Eof) {
                    return Err(self.err(lpar.loc, "non-terminated argument list"));
                }
                if t.is(TokenKind::Ident) {
                    if macro_params.contains(&t.text) {
                        return Err(self.err_at(&t, "duplicate argument name"));
                    }
                    macro_params.push(t.text.clone());
                } else if !t.is(TokenKind::Comma) {
                    return Err(self.err_at(&t, "expecting an identifier or ')'"));
                }
                t = self.next()?;
            }
            t = self.next()?;
        }
        if !t.is(TokenKind::Lbrace) {
            return Err(self.err_at(&t, "expecting '{'"));
        }
        let lbrace = t;

        let mut depth = 0usize;
        let rbrace = loop {
            let t = self.next()?;
            match t.kind {
                TokenKind::Lbrace => depth += 1,
                TokenKind::Rbrace => {
                    if depth == 0 {
                        break t;
                    }
                    depth -= 1;
                }
                TokenKind::Eof => return Err(self.err(lbrace.loc, "non-terminated macro body")),
                _ => {}
            }
        };
        let code = self.lex.slice_top(lbrace.offset, rbrace.offset + 1);

        self.add_to_scope(
            self.module,
            &id,
            DeclKind::Macro(MacroDef {
                params: macro_params,
                code,
                body_loc: lbrace.loc,
                source: self.lex.source(),
            }),
        );
        Ok(())
    }

    /// Expands a macro call: captures the actual arguments as token
    /// chains, re-enters the statement parser over the body text.
    fn eval_inst(&mut self, scope: DeclId, macro_decl: DeclId) -> Result<()> {
        let t = self.next()?;
        if !t.is(TokenKind::Lpar) {
            return Err(self.err_at(&t, "expecting '('"));
        }
        let lpar = t;
        self.lex.set_cur_ref();

        let (formal_count, code, body_loc, macro_source) = {
            let DeclKind::Macro(m) = &self.world.decl(macro_decl).kind else {
                return Err(self.err(lpar.loc, "the designated object is not callable"));
            };
            (m.params.len(), m.code.clone(), m.body_loc, m.source.clone())
        };

        let mut chains: Vec<TokenChain> = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let mut carrier = lpar.clone();
        let mut level = 1i32;
        let rpar = loop {
            let t = self.next()?;
            match t.kind {
                TokenKind::Lpar => level += 1,
                TokenKind::Rpar => level -= 1,
                _ => {}
            }
            let closes = level == 0 && t.is(TokenKind::Rpar);
            if !closes && !t.is(TokenKind::Comma) {
                if t.is(TokenKind::Eof) {
                    return Err(self.err(lpar.loc, "argument list not terminated"));
                }
                current.push(t);
                continue;
            }
            if !current.is_empty() {
                chains.push(TokenChain {
                    source: carrier.source.clone(),
                    origin: carrier.loc,
                    tokens: std::mem::take(&mut current),
                });
            }
            if closes {
                break t;
            }
            carrier = t;
        };
        if chains.len() != formal_count {
            return Err(self.err(rpar.loc, "number of actual doesn't fit number of formal arguments"));
        }

        if self.skip {
            return Ok(());
        }

        self.lex.open(&code, macro_source, body_loc).map_err(|e| self.lex.trail(e))?;
        let t = self.next()?;
        if !t.is(TokenKind::Lbrace) {
            return Err(self.err_at(&t, "internal error"));
        }
        {
            let DeclKind::Macro(m) = &self.world.decl(macro_decl).kind else { unreachable!() };
            let names: Vec<String> = m.params.clone();
            for (name, chain) in names.into_iter().zip(chains) {
                self.lex.add_arg(name, chain);
            }
        }

        let mut t = self.peek(1);
        while !t.is(TokenKind::Rbrace) && !t.is(TokenKind::Eof) {
            let module_level = scope == self.module;
            match t.kind {
                TokenKind::KwSubdir | TokenKind::KwSubmod | TokenKind::KwSubmodule if module_level => {
                    self.submodule(t.is(TokenKind::KwSubdir))?;
                }
                TokenKind::KwVar | TokenKind::KwLet | TokenKind::KwParam => self.vardecl(scope)?,
                TokenKind::KwType => self.typedecl(scope)?,
                TokenKind::KwIf => self.condition(scope)?,
                TokenKind::Hat | TokenKind::Dot | TokenKind::Ident => self.assig_or_call(scope)?,
                _ => return self.unexpected(&t, "in macro body"),
            }
            t = self.peek(1);
            if t.is(TokenKind::Semi) {
                self.next()?;
                t = self.peek(1);
            }
        }
        let t = self.next()?;
        if !t.is(TokenKind::Rbrace) {
            return Err(self.err_at(&t, "internal error"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // type declarations

    fn typedecl(&mut self, scope: DeclId) -> Result<()> {
        self.next()?; // keyword
        let id = self.identdef(scope)?;
        if id.visi == Visibility::PublicDefault {
            return Err(self.err(id.loc, "'!' is not applicable here"));
        }
        let t = self.next()?;
        if !t.is(TokenKind::Eq) {
            return Err(self.err_at(&t, "expecting '='"));
        }
        let t = self.peek(1);
        match t.kind {
            TokenKind::Lpar => self.enumdecl(scope, id),
            TokenKind::KwClass => self.classdecl(scope, id),
            _ => Err(self.err_at(&t, "invalid type declaration")),
        }
    }

    fn enumdecl(&mut self, scope: DeclId, id: IdentDef) -> Result<()> {
        let lpar = self.next()?;
        let mut symbols: Vec<String> = Vec::new();
        let mut t = self.next()?;
        while !t.is(TokenKind::Rpar) {
            if t.is(TokenKind::Eof) {
                return Err(self.err(lpar.loc, "non-terminated enum type declaration"));
            }
            if t.is(TokenKind::LitSymbol) {
                let name = t.text[1..].to_string();
                if symbols.contains(&name) {
                    return Err(self.err_at(&t, "duplicate enum symbol"));
                }
                symbols.push(name);
            } else if !t.is(TokenKind::Comma) {
                return Err(self.err_at(&t, "expecting a symbol or ')'"));
            }
            t = self.next()?;
        }
        if symbols.is_empty() {
            return Err(self.err_at(&t, "enum type cannot be empty"));
        }
        let default = symbols[0].clone();
        self.add_to_scope(scope, &id, DeclKind::Enum(EnumDecl { symbols, default }));
        Ok(())
    }

    fn classdecl(&mut self, scope: DeclId, id: IdentDef) -> Result<()> {
        let cls_tok = self.next()?; // 'class'
        let mut t = self.peek(1);

        let mut class = ClassDecl::default();
        if t.is(TokenKind::Lpar) {
            self.next()?;
            let super_decl = self.resolve_decl(scope)?;
            if !matches!(self.world.decl(super_decl).kind, DeclKind::Class(_)) {
                return Err(self.err(t.loc, "invalid superclass"));
            }
            class.super_class = Some(super_decl);
            // copy down all inherited fields, by name and position
            let super_class = self.world.decl(super_decl).class().expect("checked above");
            class.names.extend(super_class.names.iter().map(|(n, d)| (n.clone(), *d)));
            class.order.extend(super_class.order.iter().copied());

            let t2 = self.next()?;
            if !t2.is(TokenKind::Rpar) {
                return Err(self.err_at(&t2, "expecting ')'"));
            }
            t = self.peek(1);
        }
        let pascal = !t.is(TokenKind::Lbrace);
        if !pascal {
            self.next()?;
        }

        let class_id = self.add_to_scope(scope, &id, DeclKind::Class(class));

        let mut t = self.next()?;
        while !(if pascal { t.is(TokenKind::KwEnd) } else { t.is(TokenKind::Rbrace) }) {
            if t.is(TokenKind::Eof) {
                return Err(self.err(cls_tok.loc, "non-terminated class declaration"));
            }
            if !t.is(TokenKind::Ident) {
                return Err(self.err_at(&t, "expecting identifier"));
            }
            if self.world.scope_get(class_id, &t.text).is_some() {
                return Err(self.err_at(&t, "duplicate field name"));
            }
            let field_name = t.text.clone();
            let field_loc = t.loc;

            let colon = self.next()?;
            if !colon.is(TokenKind::Colon) {
                return Err(self.err_at(&colon, "expecting ':'"));
            }
            let ty_tok = self.peek(1);
            let ty = self.typeref(scope)?;
            if matches!(ty, Type::Class(_)) {
                return Err(self.err(ty_tok.loc, "fields cannot be of class type; use a list instead"));
            }
            let field = self.world.add_decl(Decl {
                kind: DeclKind::Field(crate::model::FieldDecl { ty }),
                name: field_name.clone(),
                visi: Visibility::Public,
                owner: Some(class_id),
                loc: field_loc,
            });
            self.world.scope_insert(class_id, &field_name, field);

            t = self.next()?;
            if t.is(TokenKind::Semi) {
                t = self.next()?;
            }
        }
        Ok(())
    }

    /// Resolves a designator to a declaration (type position).
    fn resolve_decl(&mut self, scope: DeclId) -> Result<DeclId> {
        let (_, decl, _) = self.resolve_instance(scope)?;
        Ok(decl)
    }

    fn typeref(&mut self, scope: DeclId) -> Result<Type> {
        let t = self.peek(1);
        let decl = self.resolve_decl(scope)?;
        let Some(base) = self.world.type_of_decl(decl) else {
            return Err(self.err(t.loc, "designator doesn't point to a valid type"));
        };
        if self.peek(1).is(TokenKind::LbrackRbrack) {
            self.next()?;
            // element types are base, enum or class; never another list
            return Ok(Type::list_of(base));
        }
        Ok(base)
    }

    // ------------------------------------------------------------------
    // variable declarations

    fn vardecl(&mut self, scope: DeclId) -> Result<()> {
        let kw = self.next()?;
        let rw = match kw.kind {
            TokenKind::KwVar => Rw::Var,
            TokenKind::KwLet => Rw::Let,
            TokenKind::KwParam => Rw::Param,
            _ => return Err(self.err_at(&kw, "expecting 'var', 'let' or 'param'")),
        };
        let mut id = self.identdef(scope)?;

        if rw == Rw::Param {
            if id.visi != Visibility::Private {
                return Err(self.err(id.loc, "visibility cannot be set for parameters (assumed to be public)"));
            }
            id.visi = Visibility::Public;
            if scope != self.module {
                return Err(self.err(kw.loc, "parameters are only supported on module level"));
            }
        }

        let mut t = self.peek(1);
        let mut explicit_ty: Option<Type> = None;
        if t.is(TokenKind::Colon) {
            self.next()?;
            explicit_ty = Some(self.typeref(scope)?);
        }

        let var = self.add_to_scope(
            scope,
            &id,
            DeclKind::Var(VarDecl { rw, ty: explicit_ty.clone(), inst: None }),
        );

        t = self.next()?;
        if t.is(TokenKind::Lbrace) || t.is(TokenKind::KwBegin) {
            // constructor body
            let pascal = t.is(TokenKind::KwBegin);
            let Some(Type::Class(class_id)) = explicit_ty else {
                if explicit_ty.is_none() {
                    return Err(self.err_at(&t, "class instance variables require an explicit type"));
                }
                return Err(self.err_at(&t, "constructors are only supported for class instances"));
            };
            if scope != self.module {
                return Err(self.err_at(&t, "class instance variables only supported on module level"));
            }
            if rw == Rw::Param {
                return Err(self.err_at(&t, "parameter can only be of basic type"));
            }

            let inst = self.world.add_inst(Instance::new(class_id));
            self.world.inst_mut(inst).decl = Some(var);
            if let DeclKind::Var(v) = &mut self.world.decl_mut(var).kind {
                v.inst = Some(inst);
            }
            let scope_inst = self.world.scope_inst(scope).expect("scope has an instance");
            self.world.inst_mut(scope_inst).set(id.name.clone(), Value::Inst(inst));

            // initialize fields with their type defaults before the body
            // runs
            let fields: Vec<(String, Type)> = {
                let class = self.world.decl(class_id).class().expect("class type");
                class
                    .order
                    .iter()
                    .filter_map(|f| match &self.world.decl(*f).kind {
                        DeclKind::Field(fd) => Some((self.world.decl(*f).name.clone(), fd.ty.clone())),
                        _ => None,
                    })
                    .collect()
            };
            for (name, ty) in fields {
                let value = default_value(self.world, &ty);
                self.world.inst_mut(inst).set(name, value);
            }

            self.nested_block(scope, Some(inst), &t, pascal)?;
            if pascal {
                let e = self.next()?;
                if !e.is(TokenKind::KwEnd) {
                    return Err(self.err(id.loc, "expecting 'end'"));
                }
            }
            Ok(())
        } else if t.is(TokenKind::Eq) || t.is(TokenKind::ColonEq) {
            let (e, ro) = self.expression(scope, explicit_ty.as_ref())?;
            let ty = if let Some(explicit) = &explicit_ty {
                let compatible = self.same_type(Some(explicit), e.ty.as_ref())
                    || self.class_assignable(Some(explicit), e.ty.as_ref())
                    || self.in_enum(Some(explicit), &e.value);
                if !compatible {
                    return Err(self.err_at(&t, "type of the right hand expression is not compatible"));
                }
                explicit.clone()
            } else {
                let Some(inferred) = e.ty.clone() else {
                    return Err(self.err_at(&t, "type of the right hand expression cannot be infered"));
                };
                if let DeclKind::Var(v) = &mut self.world.decl_mut(var).kind {
                    v.ty = Some(inferred.clone());
                }
                inferred
            };

            let structured = matches!(ty, Type::Class(_) | Type::List(_));
            if structured {
                if rw == Rw::Param {
                    return Err(self.err_at(&t, "parameter can only be of basic type"));
                }
                if rw == Rw::Var && ro > 0 {
                    return Err(self.err_at(&t, "cannot assign immutable object to var"));
                }
            }
            if !matches!(ty, Type::Class(_)) && id.visi == Visibility::PublicDefault {
                return Err(self.err(id.loc, "'!' is not applicable here"));
            }

            // a class-typed let aliases the instance; record it so the
            // declaration can serve as a product
            if let (Type::Class(_), Value::Inst(inst)) = (&ty, &e.value) {
                if let DeclKind::Var(v) = &mut self.world.decl_mut(var).kind {
                    v.inst = Some(*inst);
                }
            }

            let scope_inst = self.world.scope_inst(scope).expect("scope has an instance");
            self.world.inst_mut(scope_inst).set(id.name.clone(), e.value);

            if rw == Rw::Param {
                self.apply_param_override(scope, var, &id, &t)?;
            }
            Ok(())
        } else {
            Err(self.err_at(&t, "expecting '{' or '='"))
        }
    }

    /// Consumes a parameter-table entry for a freshly declared `param`,
    /// re-lexing the externally supplied string against the declared type.
    fn apply_param_override(&mut self, scope: DeclId, var: DeclId, id: &IdentDef, at: &Token) -> Result<()> {
        let (key, accessible) = self.world.qualified_name(var);
        let Some(entry) = self.params.take(&key) else {
            return Ok(());
        };
        if !entry.seeded && !accessible {
            return Err(self.err(
                id.loc,
                format!("the parameter {key} cannot be set because it is not visible from the root directory"),
            ));
        }

        let raw = entry.value;
        let evaluated = self.convert_param_value(&raw, &key, id.loc)?;
        let declared = self.world.decl(var).var().and_then(|v| v.ty.clone());
        let compatible = self.same_type(declared.as_ref(), evaluated.ty.as_ref())
            || self.in_enum(declared.as_ref(), &evaluated.value);
        if !compatible {
            return Err(self.err_at(at, format!("value passed in for parameter '{key}' is incompatible")));
        }
        let scope_inst = self.world.scope_inst(scope).expect("scope has an instance");
        self.world.inst_mut(scope_inst).set(id.name.clone(), evaluated.value);
        Ok(())
    }

    fn convert_param_value(&mut self, raw: &str, key: &str, loc: RowCol) -> Result<Evaluated> {
        match classify_param_value(raw) {
            Ok(e) => Ok(e),
            Err(Some(message)) => Err(self.err(loc, message)),
            Err(None) => Err(self.err(loc, format!("unexpected parameter value type {key}: {raw}"))),
        }
    }

    // ------------------------------------------------------------------
    // conditions

    fn condition(&mut self, scope: DeclId) -> Result<()> {
        self.next()?; // 'if'
        let ct = self.peek(1);
        let cond = self.bool_condition(scope, &ct)?;

        let skipping = self.skip;
        if !skipping {
            self.skip = !cond;
        }
        let t = self.next()?;
        if t.is(TokenKind::KwThen) {
            self.nested_block(scope, None, &t, true)?;
            if !skipping {
                self.skip = false;
            }
            let mut t = self.next()?;
            let mut done = cond;
            while t.is(TokenKind::KwElsif) {
                let ct = self.peek(1);
                let cond = self.bool_condition(scope, &ct)?;
                let then = self.next()?;
                if !then.is(TokenKind::KwThen) {
                    return Err(self.err_at(&then, "expecting 'then'"));
                }
                if !skipping {
                    self.skip = !(cond && !done);
                }
                self.nested_block(scope, None, &then, true)?;
                if !skipping {
                    self.skip = false;
                }
                t = self.next()?;
                if cond && !done {
                    done = true;
                }
            }
            if t.is(TokenKind::KwElse) {
                if !skipping {
                    self.skip = done;
                }
                self.nested_block(scope, None, &t, true)?;
                if !skipping {
                    self.skip = false;
                }
                t = self.next()?;
            }
            if !t.is(TokenKind::KwEnd) {
                return Err(self.err_at(&t, "expecting 'end'"));
            }
        } else {
            if !t.is(TokenKind::Lbrace) {
                return Err(self.err_at(&t, "expecting '{'"));
            }
            self.nested_block(scope, None, &t, false)?;
            if !skipping {
                self.skip = false;
            }
            let t = self.peek(1);
            if t.is(TokenKind::KwElse) {
                if !skipping {
                    self.skip = cond;
                }
                self.next()?;
                let t = self.peek(1);
                match t.kind {
                    TokenKind::KwIf => self.condition(scope)?,
                    TokenKind::Lbrace => {
                        self.next()?;
                        self.nested_block(scope, None, &t, false)?;
                    }
                    _ => return Err(self.err_at(&t, "expecting 'if' or '{'")),
                }
                if !skipping {
                    self.skip = false;
                }
            }
        }
        Ok(())
    }

    fn bool_condition(&mut self, scope: DeclId, at: &Token) -> Result<bool> {
        let (e, _) = self.expression(scope, None)?;
        if !e.ty.as_ref().is_some_and(|t| t.is_base(BaseType::Bool)) {
            return Err(self.err(at.loc, "expecting a boolean if expression"));
        }
        Ok(e.value.as_bool())
    }

    // ------------------------------------------------------------------
    // designators

    /// Resolves a designator to its container instance and dereferenced
    /// declaration. The declaration-order rule applies: a name cannot be
    /// used before its declaration appears in the text.
    fn resolve_instance(&mut self, scope: DeclId) -> Result<(InstId, DeclId, Ro)> {
        #[derive(PartialEq)]
        enum Method {
            LocalOnly,
            LocalOuter,
            Field,
        }

        let mut t = self.next()?;
        let mut ro: Ro = 0;
        let method;
        let mut container: Option<InstId> = None;
        let mut found: Option<DeclId> = None;

        match t.kind {
            TokenKind::Dot => {
                method = Method::Field;
                let Some(this) = self.this_of(scope) else {
                    return Err(self.err_at(&t, "designator cannot start with '.' here"));
                };
                container = Some(this);
                ro = 2;
                t = self.next()?;
            }
            TokenKind::Hat => {
                method = Method::LocalOuter;
                t = self.next()?;
            }
            TokenKind::Ident => {
                method = Method::LocalOnly;
            }
            _ => return Err(self.err_at(&t, "designator must start with a '^', '.' or identifier")),
        }
        if !t.is(TokenKind::Ident) {
            return Err(self.err_at(&t, "expecting an identifier here"));
        }

        match method {
            Method::LocalOuter => {
                let mut cur = self.module_def().outer;
                while let Some(m) = cur {
                    if let Some(decl) = self.world.scope_get(m, &t.text) {
                        if self.world.decl(decl).visi == Visibility::Private {
                            return Err(self.err_at(&t, "the identifier is not visible from here"));
                        }
                        container = self.world.decl(m).module().and_then(|d| d.inst);
                        found = Some(decl);
                        break;
                    }
                    cur = self.world.decl(m).module().and_then(|d| d.outer);
                }
            }
            Method::Field => {
                let meta = self.world.inst(container.expect("constructor container")).meta;
                found = self.world.scope_get(meta, &t.text);
            }
            Method::LocalOnly => {
                let mut s = Some(scope);
                while let Some(cur) = s {
                    if let Some(decl) = self.world.scope_get(cur, &t.text) {
                        container = self.world.scope_inst(cur);
                        found = Some(decl);
                        break;
                    }
                    s = self.scope_up(cur);
                }
                if found.is_none() {
                    // builtins are reachable without a prefix
                    if let Some(decl) = self.world.scope_get(self.builtins.module, &t.text) {
                        container = self.world.decl(self.builtins.module).module().and_then(|m| m.inst);
                        found = Some(decl);
                    }
                }
            }
        }

        let Some(mut decl) = found else {
            return Err(self.err_at(&t, "identifier doesn't reference a declaration; check spelling and declaration order"));
        };
        let mut container =
            container.ok_or_else(|| self.err_at(&t, "identifier doesn't reference a declaration; check spelling and declaration order"))?;

        if method != Method::Field {
            if let DeclKind::Var(v) = &self.world.decl(decl).kind {
                if v.rw == Rw::Let || (method != Method::LocalOnly && v.rw == Rw::Param) {
                    ro = 1;
                }
            }
        }

        // dotted continuation across fields and submodules
        let mut line = t.loc.row;
        let mut look = self.peek(1);
        while look.is(TokenKind::Dot) {
            let dot = self.next()?;

            let value = self.world.inst(container).get(&self.world.decl(decl).name).cloned();
            let next_scope = match &self.world.decl(decl).kind {
                DeclKind::Field(f) => match &f.ty {
                    Type::Class(c) => *c,
                    _ => {
                        self.wrap_warning(dot.loc, line);
                        return Err(self.err_at(&dot, "can only dereference fields or variables of class type"));
                    }
                },
                DeclKind::Var(v) => match &v.ty {
                    Some(Type::Class(c)) => *c,
                    _ => {
                        self.wrap_warning(dot.loc, line);
                        return Err(self.err_at(&dot, "can only dereference fields or variables of class type"));
                    }
                },
                DeclKind::Module(_) => decl,
                _ => return Err(self.err_at(&dot, "cannot dereference a type declaration or procedure")),
            };
            let Some(Value::Inst(next_container)) = value else {
                return Err(self.err_at(&dot, "dereferencing a nil value"));
            };

            let t = self.next()?;
            if !t.is(TokenKind::Ident) {
                return Err(self.err_at(&t, "expecting an ident"));
            }
            if t.loc.row != line {
                self.warn(t.loc, "designator wraps around the next line; did you miss a semicolon?");
                line = t.loc.row;
            }
            let Some(next_decl) = self.world.scope_get(next_scope, &t.text) else {
                return Err(self.err_at(&t, "unknown identifier"));
            };
            container = next_container;
            decl = next_decl;

            match &self.world.decl(decl).kind {
                DeclKind::Module(_) | DeclKind::Var(_) => {
                    if self.world.decl(decl).visi < Visibility::Public {
                        return Err(self.err_at(&t, "the identifier is not visible from here"));
                    }
                }
                _ => {}
            }
            look = self.peek(1);
        }

        Ok((container, decl, ro))
    }

    fn wrap_warning(&mut self, loc: RowCol, line: u32) {
        if loc.row != line {
            self.warn(loc, "designator has wrapped around from the previous line; did you miss a semicolon?");
        }
    }

    // ------------------------------------------------------------------
    // statements

    fn assig_or_call(&mut self, scope: DeclId) -> Result<()> {
        let start = self.peek(1);
        let (container, decl, lro) = self.resolve_instance(scope)?;

        let t = self.peek(1);
        match t.kind {
            TokenKind::Eq | TokenKind::ColonEq | TokenKind::PlusEq | TokenKind::MinusEq | TokenKind::StarEq => {
                if lro == 1 {
                    return Err(self.err(start.loc, "cannot modify immutable object"));
                }
                self.assignment(scope, container, decl, lro)
            }
            TokenKind::Lpar => {
                if matches!(self.world.decl(decl).kind, DeclKind::Macro(_)) {
                    self.eval_inst(scope, decl)
                } else {
                    self.eval_call(scope, decl).map(|_| ())
                }
            }
            _ => Err(self.err(start.loc, "looks like an assignment or a call, but next token doesn't fit")),
        }
    }

    fn assignment(&mut self, scope: DeclId, container: InstId, decl: DeclId, lro: Ro) -> Result<()> {
        let op = self.next()?;

        let lt: Option<Type> = match &self.world.decl(decl).kind {
            DeclKind::Var(v) => v.ty.clone(),
            DeclKind::Field(f) => Some(f.ty.clone()),
            _ => None,
        };
        let (rhs, rro) = self.expression(scope, lt.as_ref())?;

        let l = self.list_relation(lt.as_ref(), rhs.ty.as_ref(), &Value::Nil, &rhs.value);
        let sub = self.class_assignable(lt.as_ref(), rhs.ty.as_ref());
        let same = self.same_type(lt.as_ref(), rhs.ty.as_ref());
        let inenum = self.in_enum(lt.as_ref(), &rhs.value);
        if !same && !(l == 1 || l == 2) && !sub && !inenum {
            return Err(self.err_at(&op, "left and right side are not assignment compatible"));
        }
        if l == 2 && op.is(TokenKind::Eq) {
            return Err(self.err_at(&op, "cannot assign an element to a list; use += instead"));
        }

        if matches!(lt, Some(Type::Class(_) | Type::List(_))) {
            let plain_assign = op.is(TokenKind::Eq) || op.is(TokenKind::ColonEq);
            if lro == 0 && rro != 0 && plain_assign {
                return Err(self.err_at(&op, "cannot assign immutable object to var"));
            }
            if lro == 2 && rro == 1 && plain_assign {
                return Err(self.err_at(&op, "cannot assign immutable object to field; use += instead"));
            }
        }

        let base = match &lt {
            Some(Type::Base(b)) => Some(*b),
            _ => None,
        };
        let name = self.world.decl(decl).name.clone();

        if self.skip {
            // still check operator applicability against the static types
            match op.kind {
                TokenKind::PlusEq if l == 0 => {
                    if !matches!(base, Some(BaseType::Int | BaseType::Real | BaseType::String | BaseType::Path)) {
                        return Err(self.err_at(&op, "operator is not applicable to given operand type"));
                    }
                }
                TokenKind::MinusEq | TokenKind::StarEq if l == 0 => {
                    if !matches!(base, Some(BaseType::Int | BaseType::Real)) {
                        return Err(self.err_at(&op, "operator is not applicable to given operand type"));
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        match op.kind {
            TokenKind::Eq | TokenKind::ColonEq => {
                self.world.inst_mut(container).set(name, rhs.value);
            }
            TokenKind::PlusEq => {
                if l == 1 || l == 2 {
                    let Some(Value::List(target)) = self.world.inst(container).get(&name).cloned() else {
                        return Err(self.err_at(&op, "left side is not a list"));
                    };
                    let additions: Vec<Value> = if l == 1 {
                        let Value::List(src) = rhs.value else { unreachable!("list relation 1") };
                        self.world.list(src).clone()
                    } else {
                        vec![rhs.value]
                    };
                    self.world.list_mut(target).extend(additions);
                    return Ok(());
                }
                let old = self.world.inst(container).get(&name).cloned().unwrap_or(Value::Nil);
                let new = match (base, old, &rhs.value) {
                    (Some(BaseType::Int), Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
                    (Some(BaseType::Real), Value::Real(a), Value::Real(b)) => Value::Real(a + b),
                    (Some(BaseType::String), Value::Str(a), Value::Str(b)) => Value::Str(a + b),
                    (Some(BaseType::Path), Value::Path(a), Value::Path(b)) => {
                        Value::Path(self.join_paths(&op, &a, b)?)
                    }
                    _ => return Err(self.err_at(&op, "operator is not applicable to given operand type")),
                };
                self.world.inst_mut(container).set(name, new);
            }
            TokenKind::MinusEq => {
                if l == 1 || l == 2 {
                    let Some(Value::List(target)) = self.world.inst(container).get(&name).cloned() else {
                        return Err(self.err_at(&op, "left side is not a list"));
                    };
                    let removals: Vec<Value> = if l == 1 {
                        let Value::List(src) = rhs.value else { unreachable!("list relation 1") };
                        self.world.list(src).clone()
                    } else {
                        vec![rhs.value]
                    };
                    self.world.list_mut(target).retain(|item| !removals.contains(item));
                    return Ok(());
                }
                let old = self.world.inst(container).get(&name).cloned().unwrap_or(Value::Nil);
                let new = match (base, old, &rhs.value) {
                    (Some(BaseType::Int), Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(*b)),
                    (Some(BaseType::Real), Value::Real(a), Value::Real(b)) => Value::Real(a - b),
                    _ => return Err(self.err_at(&op, "operator is not applicable to given operand type")),
                };
                self.world.inst_mut(container).set(name, new);
            }
            TokenKind::StarEq => {
                if l == 1 {
                    let Some(Value::List(target)) = self.world.inst(container).get(&name).cloned() else {
                        return Err(self.err_at(&op, "left side is not a list"));
                    };
                    let Value::List(src) = rhs.value else { unreachable!("list relation 1") };
                    let keep = self.world.list(src).clone();
                    self.world.list_mut(target).retain(|item| keep.contains(item));
                    return Ok(());
                }
                if l == 2 {
                    let Some(Value::List(target)) = self.world.inst(container).get(&name).cloned() else {
                        return Err(self.err_at(&op, "left side is not a list"));
                    };
                    let present = self.world.list(target).contains(&rhs.value);
                    if !present {
                        self.world.list_mut(target).push(rhs.value);
                    }
                    return Ok(());
                }
                let old = self.world.inst(container).get(&name).cloned().unwrap_or(Value::Nil);
                let new = match (base, old, &rhs.value) {
                    (Some(BaseType::Int), Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(*b)),
                    (Some(BaseType::Real), Value::Real(a), Value::Real(b)) => Value::Real(a * b),
                    _ => return Err(self.err_at(&op, "operator is not applicable to given operand type")),
                };
                self.world.inst_mut(container).set(name, new);
            }
            _ => return Err(self.err_at(&op, "expecting '=', '+=', '-=' or '*='")),
        }
        Ok(())
    }

    fn join_paths(&self, at: &Token, lhs: &str, rhs: &str) -> Result<String> {
        match path::join(lhs, rhs) {
            Ok(p) => Ok(p),
            Err(path::PathError::NotSupported) => Err(self.err_at(at, "right side cannot be an absolute path")),
            Err(_) => Err(self.err_at(at, "right side cannot be appended to given left side")),
        }
    }

    // ------------------------------------------------------------------
    // expressions

    pub(crate) fn expression(&mut self, scope: DeclId, lhs_ty: Option<&Type>) -> Result<(Evaluated, Ro)> {
        let (mut e, mut ro) = self.simple_expression(scope, lhs_ty)?;
        let t = self.peek(1);
        if matches!(
            t.kind,
            TokenKind::Eq2
                | TokenKind::BangEq
                | TokenKind::Lt
                | TokenKind::Leq
                | TokenKind::Gt
                | TokenKind::Geq
                | TokenKind::KwIn
        ) {
            self.next()?;
            let (rhs, _) = self.simple_expression(scope, lhs_ty)?;
            e = self.eval_relation(&t, e, rhs)?;
            ro = -1;
        }
        Ok((e, ro))
    }

    fn simple_expression(&mut self, scope: DeclId, lhs_ty: Option<&Type>) -> Result<(Evaluated, Ro)> {
        let (mut e, mut ro) = self.term(scope, lhs_ty)?;
        let mut t = self.peek(1);
        while matches!(t.kind, TokenKind::Plus | TokenKind::Minus | TokenKind::Bar2) {
            self.next()?;
            let (rhs, _) = self.term(scope, lhs_ty)?;
            e = self.eval_add_op(&t, e, rhs)?;
            ro = -1;
            t = self.peek(1);
        }
        Ok((e, ro))
    }

    fn term(&mut self, scope: DeclId, lhs_ty: Option<&Type>) -> Result<(Evaluated, Ro)> {
        let (mut e, mut ro) = self.factor(scope, lhs_ty)?;
        let mut t = self.peek(1);
        while matches!(t.kind, TokenKind::Star | TokenKind::Slash | TokenKind::Amp2 | TokenKind::Percent) {
            self.next()?;
            let (rhs, _) = self.factor(scope, lhs_ty)?;
            e = self.eval_mul_op(&t, e, rhs)?;
            ro = -1;
            t = self.peek(1);
        }
        Ok((e, ro))
    }

    fn factor(&mut self, scope: DeclId, lhs_ty: Option<&Type>) -> Result<(Evaluated, Ro)> {
        let t = self.peek(1);
        match t.kind {
            TokenKind::LitInteger => {
                self.next()?;
                Ok((Evaluated::new(Value::Int(parse_int(&t.text)), Type::Base(BaseType::Int)), -1))
            }
            TokenKind::LitReal => {
                self.next()?;
                let value: f64 = t.text.parse().unwrap_or(0.0);
                Ok((Evaluated::new(Value::Real(value), Type::Base(BaseType::Real)), -1))
            }
            TokenKind::KwTrue | TokenKind::KwFalse => {
                self.next()?;
                Ok((Evaluated::new(Value::Bool(t.is(TokenKind::KwTrue)), Type::Base(BaseType::Bool)), -1))
            }
            TokenKind::LitString => {
                self.next()?;
                // escapes stay verbatim; they are passed through to the
                // build tools unchanged
                let inner = t.text[1..t.text.len() - 1].to_string();
                Ok((Evaluated::new(Value::Str(inner), Type::Base(BaseType::String)), -1))
            }
            TokenKind::LitSymbol => {
                self.next()?;
                Ok((Evaluated::new(Value::Symbol(t.text[1..].to_string()), Type::Base(BaseType::Symbol)), -1))
            }
            TokenKind::LitPath => {
                self.next()?;
                let mut text = t.text.clone();
                if text.starts_with('\'') {
                    text = text[1..text.len() - 1].to_string();
                }
                if !text.starts_with('/') && !text.starts_with('.') {
                    text = format!("./{text}");
                }
                Ok((Evaluated::new(Value::Path(text), Type::Base(BaseType::Path)), -1))
            }
            TokenKind::Hat | TokenKind::Dot | TokenKind::Ident => {
                let (container, decl, ro) = self.resolve_instance(scope)?;
                if self.peek(1).is(TokenKind::Lpar) {
                    let result = self.eval_call(scope, decl)?;
                    if result.ty.is_none() && matches!(result.value, Value::Nil) {
                        return Err(self.err(t.loc, "cannot call this procedure like a function"));
                    }
                    Ok((result, -1))
                } else {
                    let name = &self.world.decl(decl).name;
                    let value = self.world.inst(container).get(name).cloned().unwrap_or(Value::Nil);
                    let ty = match &self.world.decl(decl).kind {
                        DeclKind::Var(v) => v.ty.clone(),
                        DeclKind::Field(f) => Some(f.ty.clone()),
                        _ => None,
                    };
                    Ok((Evaluated { value, ty }, ro))
                }
            }
            TokenKind::Lpar => {
                self.next()?;
                let (mut e, _) = self.expression(scope, lhs_ty)?;
                let q = self.peek(1);
                if q.is(TokenKind::Qmark) {
                    self.next()?;
                    e = self.eval_if_expr(scope, &q, lhs_ty, e)?;
                }
                let r = self.next()?;
                if !r.is(TokenKind::Rpar) {
                    return Err(self.err_at(&r, "expecting ')' here"));
                }
                Ok((e, -1))
            }
            TokenKind::Plus | TokenKind::Minus | TokenKind::Bang => {
                self.next()?;
                let (e, _) = self.factor(scope, lhs_ty)?;
                if t.is(TokenKind::Bang) {
                    if !e.ty.as_ref().is_some_and(|ty| ty.is_base(BaseType::Bool)) {
                        return Err(self.err_at(&t, "unary operator only applicable to boolean types"));
                    }
                    Ok((Evaluated::new(Value::Bool(!e.value.as_bool()), Type::Base(BaseType::Bool)), -1))
                } else {
                    let numeric = e
                        .ty
                        .as_ref()
                        .is_some_and(|ty| ty.is_base(BaseType::Int) || ty.is_base(BaseType::Real));
                    if !numeric {
                        return Err(self.err_at(&t, "unary operator only applicable to integer or real types"));
                    }
                    if t.is(TokenKind::Minus) {
                        let value = match e.value {
                            Value::Int(i) => Value::Int(i.wrapping_neg()),
                            Value::Real(r) => Value::Real(-r),
                            _ => e.value,
                        };
                        Ok((Evaluated { value, ty: e.ty }, -1))
                    } else {
                        Ok((e, -1))
                    }
                }
            }
            TokenKind::Lbrack | TokenKind::LbrackRbrack => {
                self.next()?;
                let e = self.eval_list_literal(scope, &t, lhs_ty)?;
                Ok((e, -1))
            }
            _ => self.unexpected(&t, "in factor"),
        }
    }

    fn eval_mul_op(&mut self, op: &Token, lhs: Evaluated, rhs: Evaluated) -> Result<Evaluated> {
        let l = self.list_relation(lhs.ty.as_ref(), rhs.ty.as_ref(), &lhs.value, &rhs.value);
        if l != 0 {
            if !op.is(TokenKind::Star) {
                return Err(self.err_at(op, "operator is not applicable to list operand type"));
            }
            if l == 3 {
                return Err(self.err_at(op, "only list * list or list * element supported"));
            }
            let Value::List(left) = lhs.value else { unreachable!("list relation") };
            let items = if l == 2 {
                // union with a scalar: append unless already present
                let mut items = self.world.list(left).clone();
                if !items.contains(&rhs.value) {
                    items.push(rhs.value);
                }
                items
            } else {
                // intersection, left order preserved
                let Value::List(right) = rhs.value else { unreachable!("list relation") };
                let keep = self.world.list(right).clone();
                self.world.list(left).iter().filter(|item| keep.contains(item)).cloned().collect()
            };
            let id = self.world.add_list(items);
            return Ok(Evaluated { value: Value::List(id), ty: lhs.ty });
        }
        if !self.same_type(lhs.ty.as_ref(), rhs.ty.as_ref()) {
            return Err(self.err_at(op, "operator requires the same type on both sides"));
        }
        match (&lhs.ty, &lhs.value, &rhs.value) {
            (Some(Type::Base(BaseType::Bool)), Value::Bool(a), Value::Bool(b)) => {
                if !op.is(TokenKind::Amp2) {
                    return Err(self.err_at(op, "operator is not applicable to boolean operands"));
                }
                // both operands are always evaluated; '&&' does not
                // short-circuit
                Ok(Evaluated::new(Value::Bool(*a && *b), Type::Base(BaseType::Bool)))
            }
            (Some(Type::Base(BaseType::Int)), Value::Int(a), Value::Int(b)) => {
                let value = match op.kind {
                    TokenKind::Star => Value::Int(a.wrapping_mul(*b)),
                    TokenKind::Slash => {
                        if *b == 0 {
                            if self.skip {
                                Value::Int(0)
                            } else {
                                return Err(self.err_at(op, "division by zero"));
                            }
                        } else {
                            Value::Int(a.wrapping_div(*b))
                        }
                    }
                    TokenKind::Percent => {
                        if *b == 0 {
                            if self.skip {
                                Value::Int(0)
                            } else {
                                return Err(self.err_at(op, "division by zero"));
                            }
                        } else {
                            Value::Int(a.wrapping_rem(*b))
                        }
                    }
                    _ => return Err(self.err_at(op, "operator is not applicable to number operands")),
                };
                Ok(Evaluated::new(value, Type::Base(BaseType::Int)))
            }
            (Some(Type::Base(BaseType::Real)), Value::Real(a), Value::Real(b)) => {
                let value = match op.kind {
                    TokenKind::Star => Value::Real(a * b),
                    TokenKind::Slash => Value::Real(a / b),
                    TokenKind::Percent => Value::Real(a % b),
                    _ => return Err(self.err_at(op, "operator is not applicable to number operands")),
                };
                Ok(Evaluated::new(value, Type::Base(BaseType::Real)))
            }
            _ => Err(self.err_at(op, "operator is not applicable to given operand type")),
        }
    }

    fn eval_add_op(&mut self, op: &Token, lhs: Evaluated, rhs: Evaluated) -> Result<Evaluated> {
        let l = self.list_relation(lhs.ty.as_ref(), rhs.ty.as_ref(), &lhs.value, &rhs.value);
        if l != 0 {
            match op.kind {
                TokenKind::Plus => {
                    // union, order preserving; a scalar right side is
                    // appended only when not already present
                    let mut items: Vec<Value> = Vec::new();
                    match l {
                        1 => {
                            let (Value::List(a), Value::List(b)) = (&lhs.value, &rhs.value) else {
                                unreachable!("list relation")
                            };
                            items.extend(self.world.list(*a).iter().cloned());
                            items.extend(self.world.list(*b).iter().cloned());
                        }
                        2 => {
                            let Value::List(a) = &lhs.value else { unreachable!("list relation") };
                            items.extend(self.world.list(*a).iter().cloned());
                            if !items.contains(&rhs.value) {
                                items.push(rhs.value.clone());
                            }
                        }
                        _ => {
                            let Value::List(b) = &rhs.value else { unreachable!("list relation") };
                            items.push(lhs.value.clone());
                            items.extend(self.world.list(*b).iter().cloned());
                        }
                    }
                    let ty = if l == 3 { rhs.ty } else { lhs.ty };
                    let id = self.world.add_list(items);
                    Ok(Evaluated { value: Value::List(id), ty })
                }
                TokenKind::Minus => {
                    if l == 3 {
                        return Err(self.err_at(op, "only list minus list or list minus element supported"));
                    }
                    let Value::List(a) = &lhs.value else { unreachable!("list relation") };
                    let removals: Vec<Value> = if l == 1 {
                        let Value::List(b) = &rhs.value else { unreachable!("list relation") };
                        self.world.list(*b).clone()
                    } else {
                        vec![rhs.value.clone()]
                    };
                    let items: Vec<Value> =
                        self.world.list(*a).iter().filter(|item| !removals.contains(item)).cloned().collect();
                    let id = self.world.add_list(items);
                    Ok(Evaluated { value: Value::List(id), ty: lhs.ty })
                }
                _ => Err(self.err_at(op, "operator is not applicable to list operand type")),
            }
        } else {
            if !self.same_type(lhs.ty.as_ref(), rhs.ty.as_ref()) {
                return Err(self.err_at(op, "operator requires the same type on both sides"));
            }
            match (&lhs.ty, &lhs.value, &rhs.value) {
                (Some(Type::Base(BaseType::Bool)), Value::Bool(a), Value::Bool(b)) => {
                    if !op.is(TokenKind::Bar2) {
                        return Err(self.err_at(op, "operator is not applicable to boolean operands"));
                    }
                    // no short-circuit; see '&&'
                    Ok(Evaluated::new(Value::Bool(*a || *b), Type::Base(BaseType::Bool)))
                }
                (Some(Type::Base(BaseType::Int)), Value::Int(a), Value::Int(b)) => {
                    let value = match op.kind {
                        TokenKind::Plus => Value::Int(a.wrapping_add(*b)),
                        TokenKind::Minus => Value::Int(a.wrapping_sub(*b)),
                        _ => return Err(self.err_at(op, "operator is not applicable to number operands")),
                    };
                    Ok(Evaluated::new(value, Type::Base(BaseType::Int)))
                }
                (Some(Type::Base(BaseType::Real)), Value::Real(a), Value::Real(b)) => {
                    let value = match op.kind {
                        TokenKind::Plus => Value::Real(a + b),
                        TokenKind::Minus => Value::Real(a - b),
                        _ => return Err(self.err_at(op, "operator is not applicable to number operands")),
                    };
                    Ok(Evaluated::new(value, Type::Base(BaseType::Real)))
                }
                (Some(Type::Base(BaseType::String)), Value::Str(a), Value::Str(b)) => {
                    if !op.is(TokenKind::Plus) {
                        return Err(self.err_at(op, "operator is not applicable to string operands"));
                    }
                    Ok(Evaluated::new(Value::Str(format!("{a}{b}")), Type::Base(BaseType::String)))
                }
                (Some(Type::Base(BaseType::Path)), Value::Path(a), Value::Path(b)) => {
                    if !op.is(TokenKind::Plus) {
                        return Err(self.err_at(op, "operator is not applicable to path operands"));
                    }
                    let joined = self.join_paths(op, a, b)?;
                    Ok(Evaluated::new(Value::Path(joined), Type::Base(BaseType::Path)))
                }
                _ => Err(self.err_at(op, "operator is not applicable to given operand type")),
            }
        }
    }

    fn eval_relation(&mut self, op: &Token, lhs: Evaluated, rhs: Evaluated) -> Result<Evaluated> {
        let bool_ty = Type::Base(BaseType::Bool);
        let l = self.list_relation(lhs.ty.as_ref(), rhs.ty.as_ref(), &lhs.value, &rhs.value);
        if l != 0 {
            if l == 3 && op.is(TokenKind::KwIn) {
                let Value::List(list) = &rhs.value else { unreachable!("list relation") };
                let found = self.world.list(*list).contains(&lhs.value);
                return Ok(Evaluated::new(Value::Bool(found), bool_ty));
            }
            if l == 1 && (op.is(TokenKind::Eq2) || op.is(TokenKind::BangEq)) {
                // lists compare by reference
                let eq = lhs.value == rhs.value;
                return Ok(Evaluated::new(Value::Bool(if op.is(TokenKind::Eq2) { eq } else { !eq }), bool_ty));
            }
            return Err(self.err_at(op, "operator is not applicable to operand types"));
        }
        let compatible = self.same_type(lhs.ty.as_ref(), rhs.ty.as_ref())
            || self.in_enum(lhs.ty.as_ref(), &rhs.value)
            || self.in_enum(rhs.ty.as_ref(), &lhs.value);
        if !compatible {
            return Err(self.err_at(op, "operator requires the same base type on both sides"));
        }

        // identity comparison for modules, class instances and enum values
        let identity_only = matches!(lhs.ty, None | Some(Type::Class(_) | Type::Enum(_)))
            || matches!(rhs.ty, None | Some(Type::Class(_) | Type::Enum(_)));
        if identity_only {
            if op.is(TokenKind::Eq2) || op.is(TokenKind::BangEq) {
                let eq = lhs.value == rhs.value;
                return Ok(Evaluated::new(Value::Bool(if op.is(TokenKind::Eq2) { eq } else { !eq }), bool_ty));
            }
            return Err(self.err_at(op, "operator is not applicable to given operand type"));
        }

        let Some(Type::Base(base)) = &lhs.ty else {
            return Err(self.err_at(op, "operator is not applicable to given operand type"));
        };
        let result = match base {
            BaseType::Bool | BaseType::Symbol | BaseType::Path => match op.kind {
                TokenKind::Eq2 => lhs.value == rhs.value,
                TokenKind::BangEq => lhs.value != rhs.value,
                _ => return Err(self.err_at(op, "operator is not applicable to operand type")),
            },
            BaseType::Int | BaseType::Real => {
                let (a, b) = (lhs.value.as_f64(), rhs.value.as_f64());
                match op.kind {
                    TokenKind::Eq2 => lhs.value == rhs.value,
                    TokenKind::BangEq => lhs.value != rhs.value,
                    TokenKind::Lt => a < b,
                    TokenKind::Leq => a <= b,
                    TokenKind::Gt => a > b,
                    TokenKind::Geq => a >= b,
                    _ => return Err(self.err_at(op, "operator is not applicable to number type")),
                }
            }
            BaseType::String => {
                let a = lhs.value.as_str().unwrap_or("");
                let b = rhs.value.as_str().unwrap_or("");
                match op.kind {
                    TokenKind::Eq2 => a == b,
                    TokenKind::BangEq => a != b,
                    TokenKind::Lt | TokenKind::Leq | TokenKind::Gt | TokenKind::Geq => {
                        if !a.is_ascii() || !b.is_ascii() {
                            return Err(self.err_at(op, "comparison operator only applicable to ASCII strings"));
                        }
                        match op.kind {
                            TokenKind::Lt => a < b,
                            TokenKind::Leq => a <= b,
                            TokenKind::Gt => a > b,
                            _ => a >= b,
                        }
                    }
                    _ => return Err(self.err_at(op, "operator is not applicable to string type")),
                }
            }
        };
        Ok(Evaluated::new(Value::Bool(result), bool_ty))
    }

    /// `cond ? a : b` inside parentheses. The inactive arm is evaluated
    /// under skip mode and must still type-check against the active arm.
    fn eval_if_expr(
        &mut self,
        scope: DeclId,
        qmark: &Token,
        lhs_ty: Option<&Type>,
        cond: Evaluated,
    ) -> Result<Evaluated> {
        if !cond.ty.as_ref().is_some_and(|t| t.is_base(BaseType::Bool)) {
            return Err(self.err_at(qmark, "expecting a boolean expression left of '?'"));
        }
        if self.skip {
            let (a, _) = self.expression(scope, lhs_ty)?;
            let colon = self.next()?;
            if !colon.is(TokenKind::Colon) {
                return Err(self.err_at(&colon, "expecting ':'"));
            }
            let (b, _) = self.expression(scope, lhs_ty)?;
            if !self.same_type(a.ty.as_ref(), b.ty.as_ref()) {
                return Err(self.err_at(&colon, "expression left and right of ':' must be of same type"));
            }
            return Ok(a);
        }
        if cond.value.as_bool() {
            let (a, _) = self.expression(scope, lhs_ty)?;
            let colon = self.next()?;
            if !colon.is(TokenKind::Colon) {
                return Err(self.err_at(&colon, "expecting ':'"));
            }
            self.skip = true;
            let b = self.expression(scope, lhs_ty);
            self.skip = false;
            let (b, _) = b?;
            if !self.same_type(a.ty.as_ref(), b.ty.as_ref()) {
                return Err(self.err_at(&colon, "expression left and right of ':' must be of same type"));
            }
            Ok(a)
        } else {
            self.skip = true;
            let a = self.expression(scope, lhs_ty);
            self.skip = false;
            let (a, _) = a?;
            let colon = self.next()?;
            if !colon.is(TokenKind::Colon) {
                return Err(self.err_at(&colon, "expecting ':'"));
            }
            let (b, _) = self.expression(scope, lhs_ty)?;
            if !self.same_type(a.ty.as_ref(), b.ty.as_ref()) {
                return Err(self.err_at(&colon, "expression left and right of ':' must be of same type"));
            }
            Ok(b)
        }
    }

    fn eval_list_literal(&mut self, scope: DeclId, lbrack: &Token, lhs_ty: Option<&Type>) -> Result<Evaluated> {
        let t = self.peek(1);
        if t.is(TokenKind::Rbrack) || lbrack.is(TokenKind::LbrackRbrack) {
            if !lbrack.is(TokenKind::LbrackRbrack) {
                self.next()?;
            }
            let Some(list_ty @ Type::List(_)) = lhs_ty else {
                if lhs_ty.is_some() {
                    return Err(self.err(lbrack.loc, "incompatible type"));
                }
                return Err(self.err(lbrack.loc, "cannot determine list type"));
            };
            let id = self.world.add_list(Vec::new());
            return Ok(Evaluated::new(Value::List(id), list_ty.clone()));
        }

        let (first, _) = self.expression(scope, None)?;
        let Some(mut ref_ty) = first.ty.clone() else {
            return Err(self.err(lbrack.loc, "cannot determine list type"));
        };
        if let Some(Type::List(elem)) = lhs_ty {
            let compatible = self.same_type(Some(elem), Some(&ref_ty))
                || self.class_assignable(Some(elem), Some(&ref_ty))
                || self.in_enum(Some(elem), &first.value);
            if !compatible {
                return Err(self.err(t.loc, "the element is not compatible with the list type"));
            }
            ref_ty = (**elem).clone();
        }
        let mut items = vec![first.value];

        let mut t = self.peek(1);
        if t.is(TokenKind::Comma) {
            self.next()?;
            t = self.peek(1);
        }
        while !t.is(TokenKind::Rbrack) && !t.is(TokenKind::Eof) {
            let (e, _) = self.expression(scope, None)?;
            let compatible = self.same_type(Some(&ref_ty), e.ty.as_ref())
                || self.class_assignable(Some(&ref_ty), e.ty.as_ref())
                || self.in_enum(Some(&ref_ty), &e.value);
            if !compatible {
                return Err(self.err(t.loc, "all elements of the list literal must have compatible types"));
            }
            items.push(e.value);
            t = self.peek(1);
            if t.is(TokenKind::Comma) {
                self.next()?;
                t = self.peek(1);
            }
        }
        if t.is(TokenKind::Eof) {
            return Err(self.err(lbrack.loc, "non terminated array literal"));
        }
        self.next()?; // ']'
        let id = self.world.add_list(items);
        Ok(Evaluated::new(Value::List(id), Type::list_of(ref_ty)))
    }

    /// Calls a built-in procedure: parses the argument list, checks the
    /// signature and dispatches (implemented in `procs.rs`).
    fn eval_call(&mut self, scope: DeclId, decl: DeclId) -> Result<Evaluated> {
        let lpar = self.next()?;
        if !lpar.is(TokenKind::Lpar) {
            return Err(self.err_at(&lpar, "expecting '('"));
        }
        let DeclKind::Proc(proc) = self.world.decl(decl).kind else {
            return Err(self.err(lpar.loc, "the designated object is not callable"));
        };

        let mut args: Vec<Evaluated> = Vec::new();
        let mut t = self.peek(1);
        while !t.is(TokenKind::Rpar) && !t.is(TokenKind::Eof) {
            let (e, _) = self.expression(scope, None)?;
            args.push(e);
            t = self.peek(1);
            if t.is(TokenKind::Comma) {
                self.next()?;
                t = self.peek(1);
            }
        }
        if !t.is(TokenKind::Rpar) {
            return Err(self.err(lpar.loc, "argument list not terminated"));
        }
        self.next()?;

        self.eval_proc(proc, &args, lpar.loc)
    }

    /// Convenience used by the procedure implementations: a result that
    /// carries neither value nor type (statement-only procedures).
    pub(crate) fn no_result() -> Evaluated {
        Evaluated::none()
    }
}

/// Re-lexes an externally supplied parameter string into a typed value.
/// `Err(Some(msg))` is a lexical failure, `Err(None)` an unexpected token
/// category.
pub(crate) fn classify_param_value(raw: &str) -> std::result::Result<Evaluated, Option<String>> {
    let first = raw.chars().next().unwrap_or('\0');
    if first.is_ascii_digit() || matches!(first, '`' | '$' | '/' | '.' | '\'' | '"') {
        let mut lexer = crate::lexer::Lexer::new(raw, Rc::from("parameter"));
        let t = lexer.next_token();
        return match t.kind {
            TokenKind::LitInteger => Ok(Evaluated::new(Value::Int(parse_int(&t.text)), Type::Base(BaseType::Int))),
            TokenKind::LitReal => {
                Ok(Evaluated::new(Value::Real(t.text.parse().unwrap_or(0.0)), Type::Base(BaseType::Real)))
            }
            TokenKind::LitPath => {
                let text =
                    if t.text.starts_with('\'') { t.text[1..t.text.len() - 1].to_string() } else { raw.to_string() };
                Ok(Evaluated::new(Value::Path(text), Type::Base(BaseType::Path)))
            }
            TokenKind::LitSymbol => {
                Ok(Evaluated::new(Value::Symbol(raw[1..].to_string()), Type::Base(BaseType::Symbol)))
            }
            TokenKind::LitString => Ok(Evaluated::new(
                Value::Str(t.text[1..t.text.len() - 1].to_string()),
                Type::Base(BaseType::String),
            )),
            TokenKind::Invalid => Err(Some(t.text)),
            _ => Err(None),
        };
    }
    match raw {
        "true" => Ok(Evaluated::new(Value::Bool(true), Type::Base(BaseType::Bool))),
        "false" => Ok(Evaluated::new(Value::Bool(false), Type::Base(BaseType::Bool))),
        _ => Ok(Evaluated::new(Value::Str(raw.to_string()), Type::Base(BaseType::String))),
    }
}

/// Parses a decimal or `0x` hexadecimal integer literal.
pub(crate) fn parse_int(text: &str) -> i64 {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        text.parse().unwrap_or(0)
    }
}
