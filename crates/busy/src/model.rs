//! Declarations, types, values and instances.
//!
//! The evaluated tree lives in three arenas owned by [`World`]:
//! declarations, instances and list storage, addressed by `u32` ids. All
//! cross-links (owner, instance companion, superclass, scope chain) are
//! ids, never owning pointers, so the evaluator can mutate instance state
//! while walking declarations without holding long-lived borrows.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

use crate::lexer::RowCol;

/// Index into [`World::decls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclId(u32);

/// Index into [`World::insts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(u32);

/// Index into [`World::lists`]. Lists are values with reference identity:
/// two list values are `==` iff they are the same storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(u32);

macro_rules! id_impl {
    ($name:ident) => {
        impl $name {
            pub fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect("arena index fits in u32"))
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

id_impl!(DeclId);
id_impl!(InstId);
id_impl!(ListId);

/// Visibility attribute of a declaration. The ordering matters: transit
/// through submodules requires `Public` or better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    Private,
    Protected,
    Public,
    /// `!` — public, and selected when the user names no targets. Only
    /// legal on product declarations.
    PublicDefault,
}

/// Mutability class of a variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Rw {
    Var,
    Let,
    Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BaseType {
    Bool,
    Int,
    Real,
    String,
    Path,
    Symbol,
}

/// A resolved type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Base(BaseType),
    Enum(DeclId),
    Class(DeclId),
    /// Element type is base, enum or class; list-of-list is rejected at
    /// construction.
    List(Box<Type>),
}

impl Type {
    pub fn list_of(elem: Self) -> Self {
        debug_assert!(!matches!(elem, Self::List(_)));
        Self::List(Box::new(elem))
    }

    pub fn elem(&self) -> Option<&Self> {
        match self {
            Self::List(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_base(&self, base: BaseType) -> bool {
        matches!(self, Self::Base(b) if *b == base)
    }
}

/// Built-in procedures, identified by their stable ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ProcKind {
    SameList = 1,
    SameSet = 2,
    Toint = 3,
    Toreal = 4,
    Tostring = 5,
    Topath = 6,
    Error = 8,
    Warning = 9,
    Message = 10,
    Dump = 11,
    Abspath = 12,
    Relpath = 13,
    Readstring = 14,
    Trycompile = 15,
    BuildDir = 16,
    Modname = 17,
    SetDefaults = 18,
}

/// A runtime value. Lists and instances have reference identity.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    Path(String),
    Symbol(String),
    List(ListId),
    Inst(InstId),
}

impl Value {
    pub fn as_bool(&self) -> bool {
        matches!(self, Self::Bool(true))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Path(s) | Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Real(r) => *r,
            _ => 0.0,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Int(a), Self::Real(b)) | (Self::Real(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b))
            | (Self::Path(a), Self::Path(b))
            | (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Inst(a), Self::Inst(b)) => a == b,
            _ => false,
        }
    }
}

/// What a visited product contributes to its dependents (the `#out` memo).
#[derive(Debug, Clone, PartialEq)]
pub enum OutValue {
    Nothing,
    /// Flattened; elements are never `Mixed` themselves.
    Mixed(Vec<OutValue>),
    ObjectFiles(Vec<String>),
    StaticLib(String),
    DynamicLib(String),
    Executable(String),
    SourceFiles(Vec<String>),
    /// Only produced by the qmake back-end, which is out of scope; kept so
    /// the output alphabet is complete.
    SourceSetLib(String),
}

/// A value-carrying companion of a declaration: a module instance, class
/// instance or block instance. `meta` points back at the declaration
/// describing its shape.
#[derive(Debug)]
pub struct Instance {
    pub meta: DeclId,
    /// For class instances: the `VarDecl` this instance initializes. The
    /// visitor derives the product name and owning module from it.
    pub decl: Option<DeclId>,
    pub fields: IndexMap<String, Value>,
    /// Build-visitor memo; `None` until the product is visited.
    pub out: Option<OutValue>,
}

impl Instance {
    pub fn new(meta: DeclId) -> Self {
        Self { meta, decl: None, fields: IndexMap::new(), out: None }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }
}

#[derive(Debug, Default)]
pub struct ModuleDef {
    /// The enclosing module (`^`); `None` for the root and for builtins.
    pub outer: Option<DeclId>,
    pub names: IndexMap<String, DeclId>,
    /// Positional children in declaration order.
    pub order: Vec<DeclId>,
    pub inst: Option<InstId>,
    /// Absolute directory (canonical).
    pub dir: String,
    /// Logical directory relative to the root, assembled from submodule
    /// identifiers.
    pub rdir: String,
    /// Filesystem directory relative to the root.
    pub fsrdir: String,
    /// Leaf identifier of the logical dir segment.
    pub dirname: String,
    /// The `BUSY` file backing this module, if one was found.
    pub file: Option<String>,
    /// Short path label used in log messages.
    pub label: String,
    /// Absolute fallback path from an `else` clause, probed when `BUSY`
    /// is missing.
    pub altpath: Option<String>,
    /// No `BUSY` file; only the altpath resolved.
    pub dummy: bool,
}

#[derive(Debug, Default)]
pub struct ClassDecl {
    pub super_class: Option<DeclId>,
    pub names: IndexMap<String, DeclId>,
    /// Field order, inherited fields first.
    pub order: Vec<DeclId>,
}

#[derive(Debug)]
pub struct EnumDecl {
    pub symbols: Vec<String>,
    /// The first symbol; initial value of fields of this enum type.
    pub default: String,
}

#[derive(Debug)]
pub struct VarDecl {
    pub rw: Rw,
    pub ty: Option<Type>,
    /// Companion class instance for constructor-initialized variables.
    pub inst: Option<InstId>,
}

#[derive(Debug)]
pub struct FieldDecl {
    pub ty: Type,
}

#[derive(Debug)]
pub struct MacroDef {
    pub params: Vec<String>,
    /// Verbatim body text from `{` through the matching `}`.
    pub code: String,
    /// Location of the `{` within the defining file.
    pub body_loc: RowCol,
    /// Label of the defining module; reported for expansion-site errors.
    pub source: Rc<str>,
}

#[derive(Debug, Default)]
pub struct BlockDef {
    /// Enclosing scope (block or module).
    pub up: Option<DeclId>,
    pub names: IndexMap<String, DeclId>,
    pub order: Vec<DeclId>,
    pub inst: Option<InstId>,
    /// The class instance a constructor block initializes; `.field`
    /// designators resolve against it.
    pub this: Option<InstId>,
}

#[derive(Debug)]
pub enum DeclKind {
    BaseType(BaseType),
    Module(ModuleDef),
    Class(ClassDecl),
    Enum(EnumDecl),
    Var(VarDecl),
    Field(FieldDecl),
    Macro(MacroDef),
    Proc(ProcKind),
    Block(BlockDef),
}

#[derive(Debug)]
pub struct Decl {
    pub kind: DeclKind,
    pub name: String,
    pub visi: Visibility,
    pub owner: Option<DeclId>,
    pub loc: RowCol,
}

impl Decl {
    pub fn module(&self) -> Option<&ModuleDef> {
        match &self.kind {
            DeclKind::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn class(&self) -> Option<&ClassDecl> {
        match &self.kind {
            DeclKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn var(&self) -> Option<&VarDecl> {
        match &self.kind {
            DeclKind::Var(v) => Some(v),
            _ => None,
        }
    }
}

/// The arenas plus the tables that are global to one parse.
#[derive(Default)]
pub struct World {
    decls: Vec<Decl>,
    insts: Vec<Instance>,
    lists: Vec<Vec<Value>>,
    /// Compile-time default configs per toolchain symbol, installed by
    /// `set_defaults` and consumed by the visitor.
    pub ctdefaults: AHashMap<String, InstId>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_decl(&mut self, decl: Decl) -> DeclId {
        let id = DeclId::new(self.decls.len());
        self.decls.push(decl);
        id
    }

    pub fn add_inst(&mut self, inst: Instance) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(inst);
        id
    }

    pub fn add_list(&mut self, items: Vec<Value>) -> ListId {
        let id = ListId::new(self.lists.len());
        self.lists.push(items);
        id
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.index()]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.index()]
    }

    pub fn inst(&self, id: InstId) -> &Instance {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instance {
        &mut self.insts[id.index()]
    }

    pub fn list(&self, id: ListId) -> &Vec<Value> {
        &self.lists[id.index()]
    }

    pub fn list_mut(&mut self, id: ListId) -> &mut Vec<Value> {
        &mut self.lists[id.index()]
    }

    /// Shallow copy of a list's items into a fresh slot.
    pub fn clone_list(&mut self, id: ListId) -> ListId {
        let items = self.lists[id.index()].clone();
        self.add_list(items)
    }

    /// Looks a name up in a scope declaration (module, class or block).
    pub fn scope_get(&self, scope: DeclId, name: &str) -> Option<DeclId> {
        match &self.decl(scope).kind {
            DeclKind::Module(m) => m.names.get(name).copied(),
            DeclKind::Class(c) => c.names.get(name).copied(),
            DeclKind::Block(b) => b.names.get(name).copied(),
            _ => None,
        }
    }

    /// Inserts a declaration into a scope's name map and positional list.
    pub fn scope_insert(&mut self, scope: DeclId, name: &str, decl: DeclId) {
        match &mut self.decl_mut(scope).kind {
            DeclKind::Module(m) => {
                m.names.insert(name.to_string(), decl);
                m.order.push(decl);
            }
            DeclKind::Class(c) => {
                c.names.insert(name.to_string(), decl);
                c.order.push(decl);
            }
            DeclKind::Block(b) => {
                b.names.insert(name.to_string(), decl);
                b.order.push(decl);
            }
            _ => unreachable!("not a scope declaration"),
        }
    }

    /// The instance companion of a scope declaration.
    pub fn scope_inst(&self, scope: DeclId) -> Option<InstId> {
        match &self.decl(scope).kind {
            DeclKind::Module(m) => m.inst,
            DeclKind::Block(b) => b.inst,
            DeclKind::Var(v) => v.inst,
            _ => None,
        }
    }

    /// The type a type-declaration denotes, if it is one.
    pub fn type_of_decl(&self, id: DeclId) -> Option<Type> {
        match &self.decl(id).kind {
            DeclKind::BaseType(b) => Some(Type::Base(*b)),
            DeclKind::Enum(_) => Some(Type::Enum(id)),
            DeclKind::Class(_) => Some(Type::Class(id)),
            _ => None,
        }
    }

    /// Whether `sub` equals `super_class` or transitively inherits from it.
    pub fn is_subclass(&self, sub: DeclId, super_class: DeclId) -> bool {
        let mut cur = Some(sub);
        while let Some(id) = cur {
            if id == super_class {
                return true;
            }
            cur = self.decl(id).class().and_then(|c| c.super_class);
        }
        false
    }

    /// Whether a symbol value belongs to an enum declaration.
    pub fn enum_contains(&self, enum_decl: DeclId, value: &Value) -> bool {
        let DeclKind::Enum(e) = &self.decl(enum_decl).kind else {
            return false;
        };
        match value {
            Value::Symbol(s) => e.symbols.iter().any(|sym| sym == s),
            _ => false,
        }
    }

    /// The dotted qualified name of a declaration, assembled by walking the
    /// owner chain up to the root; also reports whether every module on the
    /// chain is `Public` (required to set the parameter from outside).
    pub fn qualified_name(&self, id: DeclId) -> (String, bool) {
        let mut name = self.decl(id).name.clone();
        let mut accessible = true;
        let mut cur = self.decl(id).owner;
        while let Some(owner) = cur {
            let decl = self.decl(owner);
            if decl.name.is_empty() {
                break;
            }
            if decl.visi != Visibility::Public {
                accessible = false;
            }
            name = format!("{}.{}", decl.name, name);
            cur = decl.owner;
        }
        (name, accessible)
    }

    /// Renders a value as JSON for the `dump` built-in.
    pub fn value_to_json(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Real(r) => serde_json::Value::from(*r),
            Value::Str(s) => serde_json::Value::from(s.clone()),
            Value::Path(p) => serde_json::Value::from(p.clone()),
            Value::Symbol(s) => serde_json::Value::from(format!("`{s}")),
            Value::List(id) => {
                serde_json::Value::Array(self.list(*id).iter().map(|v| self.value_to_json(v)).collect())
            }
            Value::Inst(id) => {
                let inst = self.inst(*id);
                let mut map = serde_json::Map::new();
                map.insert("#class".to_string(), serde_json::Value::from(self.decl(inst.meta).name.clone()));
                for (name, val) in &inst.fields {
                    map.insert(name.clone(), self.value_to_json(val));
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_decl(name: &str, kind: DeclKind) -> Decl {
        Decl { kind, name: name.to_string(), visi: Visibility::Private, owner: None, loc: RowCol::default() }
    }

    #[test]
    fn list_values_compare_by_reference() {
        let mut world = World::new();
        let a = world.add_list(vec![Value::Int(1)]);
        let b = world.add_list(vec![Value::Int(1)]);
        assert_ne!(Value::List(a), Value::List(b));
        assert_eq!(Value::List(a), Value::List(a));
    }

    #[test]
    fn subclass_chain() {
        let mut world = World::new();
        let base = world.add_decl(dummy_decl("Product", DeclKind::Class(ClassDecl::default())));
        let mid = world.add_decl(dummy_decl(
            "CompiledProduct",
            DeclKind::Class(ClassDecl { super_class: Some(base), ..Default::default() }),
        ));
        let leaf = world.add_decl(dummy_decl(
            "Library",
            DeclKind::Class(ClassDecl { super_class: Some(mid), ..Default::default() }),
        ));
        assert!(world.is_subclass(leaf, base));
        assert!(world.is_subclass(leaf, leaf));
        assert!(!world.is_subclass(base, leaf));
    }

    #[test]
    fn qualified_name_walks_owner_chain() {
        let mut world = World::new();
        let root = world.add_decl(dummy_decl("", DeclKind::Module(ModuleDef::default())));
        let mut sub = dummy_decl("gui", DeclKind::Module(ModuleDef::default()));
        sub.owner = Some(root);
        sub.visi = Visibility::Public;
        let sub = world.add_decl(sub);
        let mut var = dummy_decl("debug", DeclKind::Var(VarDecl { rw: Rw::Param, ty: None, inst: None }));
        var.owner = Some(sub);
        let var = world.add_decl(var);
        let (name, accessible) = world.qualified_name(var);
        assert_eq!(name, "gui.debug");
        assert!(accessible);
    }

    #[test]
    fn qualified_name_reports_inaccessible_chain() {
        let mut world = World::new();
        let root = world.add_decl(dummy_decl("", DeclKind::Module(ModuleDef::default())));
        let mut sub = dummy_decl("hidden", DeclKind::Module(ModuleDef::default()));
        sub.owner = Some(root);
        sub.visi = Visibility::Private;
        let sub = world.add_decl(sub);
        let mut var = dummy_decl("p", DeclKind::Var(VarDecl { rw: Rw::Param, ty: None, inst: None }));
        var.owner = Some(sub);
        let var = world.add_decl(var);
        let (name, accessible) = world.qualified_name(var);
        assert_eq!(name, "hidden.p");
        assert!(!accessible);
    }

    #[test]
    fn type_equality() {
        let mut world = World::new();
        let e = world.add_decl(dummy_decl(
            "E",
            DeclKind::Enum(EnumDecl { symbols: vec!["a".into()], default: "a".into() }),
        ));
        assert_eq!(Type::Base(BaseType::Int), Type::Base(BaseType::Int));
        assert_ne!(Type::Base(BaseType::Int), Type::Base(BaseType::Real));
        assert_eq!(Type::Enum(e), Type::Enum(e));
        assert_eq!(
            Type::list_of(Type::Base(BaseType::String)),
            Type::list_of(Type::Base(BaseType::String))
        );
    }
}
