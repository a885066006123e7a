//! The preloaded `builtins` module.
//!
//! Installed into the [`World`] before any `BUSY` file is parsed. It
//! carries the base-type declarations, the product class hierarchy, the
//! built-in enums, the host/toolchain variables and the built-in procedure
//! declarations. User code reaches these without a `^` prefix: name lookup
//! falls back to this module after the local scope chain is exhausted.

use indexmap::IndexMap;

use crate::host::HostConfig;
use crate::lexer::RowCol;
use crate::model::{
    BaseType, ClassDecl, Decl, DeclId, DeclKind, EnumDecl, FieldDecl, Instance, ModuleDef, ProcKind, Type, Value,
    VarDecl, Visibility, World,
};

/// Field names of the compile/link flag bags, shared between `Config` and
/// the compiled products. The visitor iterates these by name.
pub const FLAG_FIELDS: &[(&str, BaseType)] = &[
    ("cflags", BaseType::String),
    ("cflags_c", BaseType::String),
    ("cflags_cc", BaseType::String),
    ("cflags_objc", BaseType::String),
    ("cflags_objcc", BaseType::String),
    ("defines", BaseType::String),
    ("include_dirs", BaseType::Path),
    ("ldflags", BaseType::String),
    ("lib_dirs", BaseType::Path),
    ("lib_names", BaseType::String),
    ("lib_files", BaseType::Path),
    ("frameworks", BaseType::String),
];

pub struct Builtins {
    pub module: DeclId,
    pub product: DeclId,
    pub config: DeclId,
    pub compiled: DeclId,
    pub library: DeclId,
    pub executable: DeclId,
    pub source_set: DeclId,
    pub group: DeclId,
    pub copy: DeclId,
    pub message: DeclId,
    pub moc: DeclId,
    pub rcc: DeclId,
    pub uic: DeclId,
    pub lua_script: DeclId,
    pub lua_script_foreach: DeclId,
    pub compiler_type: DeclId,
}

struct Installer<'w> {
    world: &'w mut World,
    module: DeclId,
}

impl Installer<'_> {
    fn add(&mut self, name: &str, kind: DeclKind) -> DeclId {
        let id = self.world.add_decl(Decl {
            kind,
            name: name.to_string(),
            visi: Visibility::Public,
            owner: Some(self.module),
            loc: RowCol::default(),
        });
        self.world.scope_insert(self.module, name, id);
        id
    }

    fn base_type(&mut self, base: BaseType) {
        self.add(&base.to_string(), DeclKind::BaseType(base));
    }

    fn enum_decl(&mut self, name: &str, symbols: &[&str]) -> DeclId {
        self.add(
            name,
            DeclKind::Enum(EnumDecl {
                symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
                default: symbols[0].to_string(),
            }),
        )
    }

    fn class(&mut self, name: &str, super_class: Option<DeclId>, fields: &[(&str, Type)]) -> DeclId {
        let mut names = IndexMap::new();
        let mut order = Vec::new();
        // inherited fields come first, copied down by name and position
        if let Some(superclass) = super_class {
            let super_decl = self.world.decl(superclass).class().expect("superclass is a class");
            names.extend(super_decl.names.iter().map(|(n, id)| (n.clone(), *id)));
            order.extend(super_decl.order.iter().copied());
        }
        let class = self.world.add_decl(Decl {
            kind: DeclKind::Class(ClassDecl { super_class, names, order }),
            name: name.to_string(),
            visi: Visibility::Public,
            owner: Some(self.module),
            loc: RowCol::default(),
        });
        for (field_name, ty) in fields {
            let field = self.world.add_decl(Decl {
                kind: DeclKind::Field(FieldDecl { ty: ty.clone() }),
                name: (*field_name).to_string(),
                visi: Visibility::Public,
                owner: Some(class),
                loc: RowCol::default(),
            });
            self.world.scope_insert(class, field_name, field);
        }
        self.world.scope_insert(self.module, name, class);
        class
    }

    fn var(&mut self, name: &str, ty: Type, value: Value) -> DeclId {
        let id = self.add(
            name,
            DeclKind::Var(VarDecl { rw: crate::model::Rw::Param, ty: Some(ty), inst: None }),
        );
        let inst = self.world.decl(self.module).module().and_then(|m| m.inst).expect("builtins instance");
        self.world.inst_mut(inst).set(name, value);
        id
    }

    fn proc(&mut self, kind: ProcKind) {
        self.add(kind.into(), DeclKind::Proc(kind));
    }
}

/// Builds the builtins module and returns the ids the selector and visitor
/// dispatch on.
pub fn install(world: &mut World, host: &HostConfig) -> Builtins {
    let module = world.add_decl(Decl {
        kind: DeclKind::Module(ModuleDef {
            dir: ".".to_string(),
            rdir: ".".to_string(),
            fsrdir: ".".to_string(),
            label: "builtins".to_string(),
            ..Default::default()
        }),
        name: "builtins".to_string(),
        visi: Visibility::Public,
        owner: None,
        loc: RowCol::default(),
    });
    let inst = world.add_inst(Instance::new(module));
    if let DeclKind::Module(m) = &mut world.decl_mut(module).kind {
        m.inst = Some(inst);
    }

    let mut b = Installer { world, module };

    for base in [BaseType::Bool, BaseType::Int, BaseType::Real, BaseType::String, BaseType::Path, BaseType::Symbol] {
        b.base_type(base);
    }

    let compiler_type = b.enum_decl("CompilerType", &["gcc", "clang", "msvc"]);
    let library_type = b.enum_decl("LibraryType", &["static", "shared"]);
    let message_type = b.enum_decl("MessageType", &["message", "warning", "error"]);
    let dependency_type = b.enum_decl(
        "DependencyType",
        &["object_file", "source_file", "static_lib", "shared_lib", "executable"],
    );

    let string_list = Type::list_of(Type::Base(BaseType::String));
    let path_list = Type::list_of(Type::Base(BaseType::Path));

    let product = b.class("Product", None, &[("to_host", Type::Base(BaseType::Bool))]);
    // deps is declared after the class exists so the element type can refer
    // to Product itself
    {
        let deps_field = b.world.add_decl(Decl {
            kind: DeclKind::Field(FieldDecl { ty: Type::list_of(Type::Class(product)) }),
            name: "deps".to_string(),
            visi: Visibility::Public,
            owner: Some(product),
            loc: RowCol::default(),
        });
        b.world.scope_insert(product, "deps", deps_field);
    }

    let mut config_fields: Vec<(&str, Type)> =
        FLAG_FIELDS.iter().map(|(n, base)| (*n, Type::list_of(Type::Base(*base)))).collect();
    let config = b.class("Config", None, &config_fields);
    {
        let configs_field = b.world.add_decl(Decl {
            kind: DeclKind::Field(FieldDecl { ty: Type::list_of(Type::Class(config)) }),
            name: "configs".to_string(),
            visi: Visibility::Public,
            owner: Some(config),
            loc: RowCol::default(),
        });
        b.world.scope_insert(config, "configs", configs_field);
    }

    config_fields.insert(0, ("sources", path_list.clone()));
    config_fields.push(("configs", Type::list_of(Type::Class(config))));
    config_fields.push(("name", Type::Base(BaseType::String)));
    let compiled = b.class("CompiledProduct", Some(product), &config_fields);

    let library = b.class(
        "Library",
        Some(compiled),
        &[("lib_type", Type::Enum(library_type)), ("def_file", Type::Base(BaseType::Path))],
    );
    let executable = b.class("Executable", Some(compiled), &[]);
    let source_set = b.class("SourceSet", Some(compiled), &[]);
    let group = b.class("Group", Some(product), &[]);
    let copy = b.class(
        "Copy",
        Some(product),
        &[
            ("sources", path_list.clone()),
            ("use_deps", Type::list_of(Type::Enum(dependency_type))),
            // expansion templates, not paths: entries may carry {{…}}
            // placeholders
            ("outputs", string_list.clone()),
        ],
    );
    let message = b.class(
        "Message",
        Some(product),
        &[("msg_type", Type::Enum(message_type)), ("text", Type::Base(BaseType::String))],
    );
    let moc = b.class(
        "Moc",
        Some(product),
        &[
            ("sources", path_list.clone()),
            ("defines", string_list.clone()),
            ("tool_dir", Type::Base(BaseType::Path)),
        ],
    );
    let rcc = b.class(
        "Rcc",
        Some(product),
        &[("sources", path_list.clone()), ("tool_dir", Type::Base(BaseType::Path))],
    );
    let uic = b.class(
        "Uic",
        Some(product),
        &[("sources", path_list.clone()), ("tool_dir", Type::Base(BaseType::Path))],
    );
    let lua_script = b.class(
        "LuaScript",
        Some(product),
        &[
            ("script", Type::Base(BaseType::Path)),
            ("args", string_list.clone()),
            ("outputs", path_list.clone()),
        ],
    );
    let lua_script_foreach = b.class(
        "LuaScriptForeach",
        Some(product),
        &[("script", Type::Base(BaseType::Path)), ("args", string_list), ("sources", path_list)],
    );

    b.var("root_build_dir", Type::Base(BaseType::Path), Value::Path("./output".to_string()));
    b.var("root_source_dir", Type::Base(BaseType::Path), Value::Path(".".to_string()));
    b.var("host_os", Type::Base(BaseType::Symbol), Value::Symbol(host.os.to_string()));
    b.var("host_cpu", Type::Base(BaseType::Symbol), Value::Symbol(host.cpu.clone()));
    b.var("host_wordsize", Type::Base(BaseType::Int), Value::Int(host.wordsize));
    b.var("host_toolchain", Type::Enum(compiler_type), Value::Symbol(host.toolchain.to_string()));
    b.var("target_toolchain", Type::Enum(compiler_type), Value::Symbol(host.toolchain.to_string()));
    b.var("target_toolchain_prefix", Type::Base(BaseType::String), Value::Str(String::new()));
    b.var("target_toolchain_path", Type::Base(BaseType::Path), Value::Path(".".to_string()));
    b.var("moc_path", Type::Base(BaseType::Path), Value::Path(".".to_string()));
    b.var("rcc_path", Type::Base(BaseType::Path), Value::Path(".".to_string()));
    b.var("uic_path", Type::Base(BaseType::Path), Value::Path(".".to_string()));

    for proc in [
        ProcKind::SameList,
        ProcKind::SameSet,
        ProcKind::Toint,
        ProcKind::Toreal,
        ProcKind::Tostring,
        ProcKind::Topath,
        ProcKind::Error,
        ProcKind::Warning,
        ProcKind::Message,
        ProcKind::Dump,
        ProcKind::Abspath,
        ProcKind::Relpath,
        ProcKind::Readstring,
        ProcKind::Trycompile,
        ProcKind::BuildDir,
        ProcKind::Modname,
        ProcKind::SetDefaults,
    ] {
        b.proc(proc);
    }

    Builtins {
        module,
        product,
        config,
        compiled,
        library,
        executable,
        source_set,
        group,
        copy,
        message,
        moc,
        rcc,
        uic,
        lua_script,
        lua_script_foreach,
        compiler_type,
    }
}

/// The initial value of a field or variable of the given type: empty list,
/// enum default, `false`/`0`/`0.0`/`""`/`.` per base type.
pub fn default_value(world: &mut World, ty: &Type) -> Value {
    match ty {
        Type::Base(BaseType::Bool) => Value::Bool(false),
        Type::Base(BaseType::Int) => Value::Int(0),
        Type::Base(BaseType::Real) => Value::Real(0.0),
        Type::Base(BaseType::String | BaseType::Symbol) => Value::Str(String::new()),
        Type::Base(BaseType::Path) => Value::Path(".".to_string()),
        Type::Enum(id) => match &world.decl(*id).kind {
            DeclKind::Enum(e) => Value::Symbol(e.default.clone()),
            _ => Value::Nil,
        },
        Type::Class(_) => Value::Nil,
        Type::List(_) => Value::List(world.add_list(Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_hierarchy_is_wired() {
        let mut world = World::new();
        let b = install(&mut world, &HostConfig::default());
        assert!(world.is_subclass(b.library, b.compiled));
        assert!(world.is_subclass(b.library, b.product));
        assert!(world.is_subclass(b.copy, b.product));
        assert!(!world.is_subclass(b.config, b.product));
    }

    #[test]
    fn library_inherits_compiled_fields() {
        let mut world = World::new();
        let b = install(&mut world, &HostConfig::default());
        assert!(world.scope_get(b.library, "sources").is_some());
        assert!(world.scope_get(b.library, "name").is_some());
        assert!(world.scope_get(b.library, "lib_type").is_some());
        assert!(world.scope_get(b.library, "deps").is_some());
        assert!(world.scope_get(b.executable, "lib_type").is_none());
    }

    #[test]
    fn base_types_and_procs_resolvable() {
        let mut world = World::new();
        let b = install(&mut world, &HostConfig::default());
        for name in ["bool", "int", "real", "string", "path", "symbol", "tostring", "same_set", "build_dir"] {
            assert!(world.scope_get(b.module, name).is_some(), "{name}");
        }
    }

    #[test]
    fn host_values_are_seeded() {
        let mut world = World::new();
        let b = install(&mut world, &HostConfig::default());
        let inst = world.decl(b.module).module().and_then(|m| m.inst).unwrap();
        assert!(matches!(world.inst(inst).get("host_os"), Some(Value::Symbol(_))));
        assert!(matches!(world.inst(inst).get("root_build_dir"), Some(Value::Path(_))));
    }
}
