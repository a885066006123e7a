//! The driver-facing entry point.
//!
//! A [`Session`] owns everything one parse-and-visit cycle needs: the
//! arenas, the parameter table, the logger and the command host. There is
//! no ambient global state; drivers construct a session, seed parameters,
//! load the root `BUSY` tree, select products and visit them against a
//! backend.

use crate::backend::Backend;
use crate::builtins::{self, Builtins};
use crate::error::{Error, Result};
use crate::host::{CommandHost, HostConfig, NullHost};
use crate::lexer::RowCol;
use crate::logger::{ConsoleLogger, LogLevel, Logger};
use crate::model::{Decl, DeclId, DeclKind, InstId, ModuleDef, Rw, Type, Value, Visibility, World};
use crate::params::ParamTable;
use crate::parser::{self, classify_param_value};
use crate::path;
use crate::select;
use crate::visitor::{self, Visitor};

pub struct Session {
    pub world: World,
    pub params: ParamTable,
    pub logger: Box<dyn Logger>,
    pub host: Box<dyn CommandHost>,
    builtins: Builtins,
    root: Option<DeclId>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_host_config(&HostConfig::default())
    }

    pub fn with_host_config(config: &HostConfig) -> Self {
        let mut world = World::new();
        let builtins = builtins::install(&mut world, config);
        Self {
            world,
            params: ParamTable::new(),
            logger: Box::new(ConsoleLogger::default()),
            host: Box::new(NullHost),
            builtins,
            root: None,
        }
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn root(&self) -> Option<DeclId> {
        self.root
    }

    /// Seeds one `key=value` parameter before loading.
    pub fn set_param(&mut self, key: &str, value: &str) {
        self.params.set(key, value);
    }

    /// Normalizes a directory argument, resolving relative inputs against
    /// the current working directory.
    fn normalize_dir(input: &str) -> Result<String> {
        let normalized = path::normalize(input).map_err(|e| match e {
            path::PathError::NotSupported => Error::plain(format!("path format is not supported: {input}")),
            path::PathError::InvalidFormat => Error::plain(format!("path format is invalid: {input}")),
            path::PathError::OutOfSpace => Error::plain(format!("path is too long to be handled: {input}")),
        })?;
        if normalized.starts_with("//") {
            return Ok(normalized);
        }
        let cwd = std::env::current_dir()
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .ok_or_else(|| Error::plain("getcwd: received non supported path from OS"))?;
        let cwd = path::normalize(&cwd)
            .map_err(|_| Error::plain("getcwd: received non supported path from OS"))?;
        path::join(&cwd, &normalized)
            .map_err(|_| Error::plain(format!("creating absolute path from provided root gives an error: {input}")))
    }

    /// Applies parameter-table entries whose keys name builtins `param`
    /// variables (toolchain selection and the like) before parsing.
    fn apply_builtin_params(&mut self) -> Result<()> {
        let candidates: Vec<String> = self.params.keys().iter().map(|k| (*k).to_string()).collect();
        for key in candidates {
            let Some(decl) = self.world.scope_get(self.builtins.module, &key) else {
                continue;
            };
            let declared = match &self.world.decl(decl).kind {
                DeclKind::Var(v) if v.rw == Rw::Param => v.ty.clone(),
                _ => continue,
            };
            let entry = self.params.take(&key).expect("key taken from the table's own list");
            let evaluated = classify_param_value(&entry.value)
                .map_err(|_| Error::plain(format!("invalid value for parameter {key}: {}", entry.value)))?;
            let compatible = match (&declared, &evaluated.ty) {
                (Some(d), Some(t)) => {
                    d == t
                        || matches!(d, Type::Enum(e) if self.world.enum_contains(*e, &evaluated.value))
                }
                _ => false,
            };
            if !compatible {
                return Err(Error::plain(format!("value passed in for parameter '{key}' is incompatible")));
            }
            let inst = self.world.decl(self.builtins.module).module().and_then(|m| m.inst).expect("builtins instance");
            self.world.inst_mut(inst).set(key, evaluated.value);
        }
        Ok(())
    }

    /// Parses the `BUSY` tree below `source_dir`, producing the root
    /// module. Build artifacts are rooted at `build_dir`.
    pub fn load(&mut self, source_dir: &str, build_dir: &str) -> Result<DeclId> {
        let source_dir = Self::normalize_dir(source_dir)?;
        let build_dir = Self::normalize_dir(build_dir)?;

        {
            let inst = self.world.decl(self.builtins.module).module().and_then(|m| m.inst).expect("builtins instance");
            self.world.inst_mut(inst).set("root_build_dir", Value::Path(build_dir));
            self.world.inst_mut(inst).set("root_source_dir", Value::Path(source_dir.clone()));
        }
        self.apply_builtin_params()?;

        self.logger.log(
            LogLevel::Message,
            None,
            RowCol::default(),
            &format!("# running parser\n# root source directory is {source_dir}"),
        );

        let root = self.world.add_decl(Decl {
            kind: DeclKind::Module(ModuleDef {
                dir: source_dir,
                rdir: ".".to_string(),
                fsrdir: ".".to_string(),
                ..Default::default()
            }),
            name: String::new(),
            visi: Visibility::Public,
            owner: None,
            loc: RowCol::default(),
        });

        parser::parse_module(
            &mut self.world,
            &self.builtins,
            &mut self.params,
            self.logger.as_mut(),
            self.host.as_mut(),
            root,
        )?;

        if !self.params.is_empty() {
            let key = self.params.keys().first().map_or_else(String::new, |k| (*k).to_string());
            return Err(Error::plain(format!("cannot set unknown parameter: {key}")));
        }

        self.root = Some(root);
        Ok(root)
    }

    /// Enumerates the product instances to build: explicit dotted
    /// designators, or the root module's default products.
    pub fn select(&self, designators: Option<&[String]>) -> Result<Vec<InstId>> {
        let root = self.root.ok_or_else(|| Error::plain("no module loaded"))?;
        select::find_products(&self.world, &self.builtins, root, designators)
    }

    /// Walks the selected products through the visitor, emitting to the
    /// backend. Error messages in the dependency closure abort before
    /// anything is emitted.
    pub fn visit(&mut self, products: &[InstId], backend: &mut dyn Backend) -> Result<()> {
        {
            let mut visitor = Visitor::new(&mut self.world, &self.builtins, backend, self.logger.as_mut());
            for product in products {
                visitor.precheck(*product)?;
            }
            for product in products {
                visitor.visit(*product)?;
            }
        }
        Ok(())
    }

    /// Clears all `out` memos so the tree can be walked again.
    pub fn reset_outputs(&mut self) {
        if let Some(root) = self.root {
            visitor::reset_outputs(&mut self.world, root);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
