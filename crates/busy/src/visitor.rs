//! The build-graph visitor.
//!
//! Walks selected product instances depth-first in post-order, memoizing
//! each product's contribution on the instance (`out`), and emits a
//! normalized operation stream to a [`Backend`]. Dependency outputs are
//! flattened into a single mixed list whose elements are never mixed
//! themselves, then dispatched per product class.

use std::str::FromStr;

use crate::backend::{Backend, BuildOperation, BuildParam};
use crate::builtins::Builtins;
use crate::error::{Error, Result};
use crate::host::{HostOs, Toolchain};
use crate::lexer::RowCol;
use crate::logger::{LogLevel, Logger};
use crate::model::{DeclId, DeclKind, InstId, OutValue, Value, World};
use crate::path::{self, ExpansionDirs, PathPart};

/// Source-language classification by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    C,
    Cpp,
    ObjC,
    ObjCpp,
    Header,
}

fn guess_lang(file: &str) -> Option<Lang> {
    match path::path_part(file, PathPart::Extension) {
        "c" => Some(Lang::C),
        "cc" | "cpp" | "cxx" => Some(Lang::Cpp),
        "m" => Some(Lang::ObjC),
        "mm" => Some(Lang::ObjCpp),
        "h" | "hh" | "hpp" | "hxx" => Some(Lang::Header),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Static,
    Dynamic,
    Exe,
}

pub struct Visitor<'a> {
    world: &'a mut World,
    builtins: &'a Builtins,
    backend: &'a mut dyn Backend,
    logger: &'a mut dyn Logger,
}

impl<'a> Visitor<'a> {
    pub fn new(
        world: &'a mut World,
        builtins: &'a Builtins,
        backend: &'a mut dyn Backend,
        logger: &'a mut dyn Logger,
    ) -> Self {
        Self { world, builtins, backend, logger }
    }

    // ------------------------------------------------------------------
    // queries against the builtins instance

    fn builtins_str(&self, name: &str) -> String {
        let inst = self.world.decl(self.builtins.module).module().and_then(|m| m.inst).expect("builtins instance");
        self.world.inst(inst).get(name).and_then(Value::as_str).unwrap_or_default().to_string()
    }

    fn toolchain_for(&self, inst: InstId) -> Toolchain {
        let to_host = matches!(self.world.inst(inst).get("to_host"), Some(Value::Bool(true)));
        let field = if to_host { "host_toolchain" } else { "target_toolchain" };
        Toolchain::from_str(&self.builtins_str(field)).unwrap_or(Toolchain::Gcc)
    }

    fn host_os(&self) -> HostOs {
        HostOs::from_str(&self.builtins_str("host_os")).unwrap_or(HostOs::Linux)
    }

    fn ctdefaults_for(&self, toolchain: Toolchain) -> Option<InstId> {
        self.world.ctdefaults.get(&toolchain.to_string()).copied()
    }

    fn prefix_cmd(&self, cmd: &str, to_host: bool) -> String {
        if to_host {
            return cmd.to_string();
        }
        let mut cmd = cmd.to_string();
        let prefix = self.builtins_str("target_toolchain_prefix");
        if !prefix.is_empty() {
            cmd = format!("{prefix}{cmd}");
        }
        let tool_path = self.builtins_str("target_toolchain_path");
        if !tool_path.is_empty() && tool_path != "." {
            cmd = format!("{}/{cmd}", path::denormalize(&tool_path));
        }
        cmd
    }

    // ------------------------------------------------------------------
    // instance topology

    /// The module a product instance was declared in.
    fn module_of(&self, inst: InstId) -> Result<DeclId> {
        let mut cur = self.world.inst(inst).decl.and_then(|d| self.world.decl(d).owner);
        while let Some(id) = cur {
            if matches!(self.world.decl(id).kind, DeclKind::Module(_)) {
                return Ok(id);
            }
            cur = self.world.decl(id).owner;
        }
        Err(Error::plain("product instance is not anchored in a module"))
    }

    fn module_dir(&self, inst: InstId) -> Result<String> {
        let module = self.module_of(inst)?;
        Ok(self.world.decl(module).module().expect("module declaration").dir.clone())
    }

    /// `<root_build_dir>/<rdir>` of the instance's module.
    fn build_dir(&self, inst: InstId) -> Result<String> {
        let module = self.module_of(inst)?;
        let rdir = self.world.decl(module).module().expect("module declaration").rdir.clone();
        let root = self.builtins_str("root_build_dir");
        path::join(&root, &rdir).map_err(|_| Error::plain("cannot derive build directory"))
    }

    fn designator_of(&self, inst: InstId) -> String {
        match self.world.inst(inst).decl {
            Some(decl) => self.world.qualified_name(decl).0,
            None => self.world.decl(self.world.inst(inst).meta).name.clone(),
        }
    }

    /// The product's declaration name. The `name` field plays no role
    /// here: two products in the same module may share a `name`, and the
    /// object-file directory keyed on this must stay distinct per product.
    fn decl_name(&self, inst: InstId) -> String {
        match self.world.inst(inst).decl {
            Some(decl) => self.world.decl(decl).name.clone(),
            None => self.world.decl(self.world.inst(inst).meta).name.clone(),
        }
    }

    /// The product artifact base name: the `name` field when set, else the
    /// declaration name.
    fn product_name(&self, inst: InstId) -> String {
        match self.world.inst(inst).get("name") {
            Some(Value::Str(s)) if !s.is_empty() => s.clone(),
            _ => self.decl_name(inst),
        }
    }

    fn string_list(&self, inst: InstId, field: &str) -> Vec<String> {
        match self.world.inst(inst).get(field) {
            Some(Value::List(id)) => {
                self.world.list(*id).iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            }
            _ => Vec::new(),
        }
    }

    fn field_str(&self, inst: InstId, field: &str) -> Option<String> {
        self.world.inst(inst).get(field).and_then(Value::as_str).map(str::to_string)
    }

    fn abs_source(&self, inst: InstId, source: &str) -> Result<String> {
        if source.starts_with('/') {
            Ok(source.to_string())
        } else {
            let dir = self.module_dir(inst)?;
            path::join(&dir, source).map_err(|_| {
                Error::plain(format!("creating absolute path from provided root gives an error: {dir} {source}"))
            })
        }
    }

    fn isa(&self, inst: InstId, class: DeclId) -> bool {
        self.world.is_subclass(self.world.inst(inst).meta, class)
    }

    // ------------------------------------------------------------------
    // output collection

    fn collect_files(out: &OutValue, want: fn(&OutValue) -> Option<&[String]>, into: &mut Vec<String>) {
        match out {
            OutValue::Mixed(items) => {
                for item in items {
                    Self::collect_files(item, want, into);
                }
            }
            other => {
                if let Some(files) = want(other) {
                    into.extend(files.iter().cloned());
                }
            }
        }
    }

    fn object_files(out: &OutValue) -> Vec<String> {
        let mut files = Vec::new();
        Self::collect_files(
            out,
            |o| match o {
                OutValue::ObjectFiles(f) => Some(f),
                _ => None,
            },
            &mut files,
        );
        files
    }

    fn source_files(out: &OutValue) -> Vec<String> {
        let mut files = Vec::new();
        Self::collect_files(
            out,
            |o| match o {
                OutValue::SourceFiles(f) => Some(f),
                _ => None,
            },
            &mut files,
        );
        files
    }

    /// The library artifacts contained in a mixed input, in order.
    fn libs_of(out: &OutValue) -> Vec<OutValue> {
        match out {
            OutValue::Mixed(items) => items
                .iter()
                .filter(|i| matches!(i, OutValue::StaticLib(_) | OutValue::DynamicLib(_)))
                .cloned()
                .collect(),
            OutValue::StaticLib(_) | OutValue::DynamicLib(_) => vec![out.clone()],
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // backend plumbing

    fn begin(
        &mut self,
        op: BuildOperation,
        command: &str,
        toolchain: Option<Toolchain>,
        os: Option<HostOs>,
    ) -> Result<()> {
        if !self.backend.begin_op(op, command, toolchain, os) {
            return Err(Error::plain("operation canceled by backend"));
        }
        Ok(())
    }

    /// Emits one flag-list field, config contributions first.
    fn emit_flags(&mut self, inst: InstId, param: BuildParam, field: &str) {
        if let Some(Value::List(configs)) = self.world.inst(inst).get("configs").cloned() {
            for item in self.world.list(configs).clone() {
                if let Value::Inst(config) = item {
                    self.emit_flags(config, param, field);
                }
            }
        }
        for flag in self.string_list(inst, field) {
            self.backend.op_param(param, &flag);
        }
    }

    /// Emits one path-list field; relative entries resolve against the
    /// owning instance's module directory.
    fn emit_paths(&mut self, inst: InstId, param: BuildParam, field: &str) -> Result<()> {
        if let Some(Value::List(configs)) = self.world.inst(inst).get("configs").cloned() {
            for item in self.world.list(configs).clone() {
                if let Value::Inst(config) = item {
                    self.emit_paths(config, param, field)?;
                }
            }
        }
        for p in self.string_list(inst, field) {
            let abs = self.abs_source(inst, &p)?;
            self.backend.op_param(param, path::denormalize(&abs));
        }
        Ok(())
    }

    fn emit_defaults_and_flags(&mut self, ct: Option<InstId>, inst: InstId, param: BuildParam, field: &str) {
        if let Some(ct) = ct {
            self.emit_flags(ct, param, field);
        }
        self.emit_flags(inst, param, field);
    }

    fn emit_defaults_and_paths(
        &mut self,
        ct: Option<InstId>,
        inst: InstId,
        param: BuildParam,
        field: &str,
    ) -> Result<()> {
        if let Some(ct) = ct {
            self.emit_paths(ct, param, field)?;
        }
        self.emit_paths(inst, param, field)
    }

    // ------------------------------------------------------------------
    // walk

    /// Fails on any `Message` product with `msg_type == error` in the
    /// dependency closure, before anything is emitted.
    pub fn precheck(&mut self, inst: InstId) -> Result<()> {
        if let Some(Value::List(deps)) = self.world.inst(inst).get("deps").cloned() {
            for item in self.world.list(deps).clone() {
                if let Value::Inst(dep) = item {
                    self.precheck(dep)?;
                }
            }
        }
        if self.isa(inst, self.builtins.message) {
            let msg_type = self.field_str(inst, "msg_type").unwrap_or_default();
            if msg_type == "error" {
                let text = self.field_str(inst, "text").unwrap_or_default();
                return Err(Error::plain(text));
            }
        }
        Ok(())
    }

    pub fn visit(&mut self, inst: InstId) -> Result<()> {
        if self.world.inst(inst).out.is_some() {
            // memoized: visiting again emits nothing
            return Ok(());
        }
        let inlist = self.build_deps(inst)?;
        self.world.inst_mut(inst).out = Some(inlist.clone());

        let desig = self.designator_of(inst);
        self.begin(BuildOperation::EnteringProduct, &desig, None, None)?;

        let b = self.builtins;
        if self.isa(inst, b.library) {
            self.library(inst, &inlist)
        } else if self.isa(inst, b.executable) {
            self.executable(inst, &inlist)
        } else if self.isa(inst, b.source_set) {
            self.source_set(inst, &inlist)
        } else if self.isa(inst, b.group) || self.isa(inst, b.config) {
            // groups and configs forward their dependencies' output
            // verbatim
            Ok(())
        } else if self.isa(inst, b.lua_script) {
            self.script(inst)
        } else if self.isa(inst, b.lua_script_foreach) {
            self.script_foreach(inst)
        } else if self.isa(inst, b.copy) {
            self.copy(inst, &inlist)
        } else if self.isa(inst, b.message) {
            self.message(inst)
        } else if self.isa(inst, b.moc) {
            self.run_moc(inst)
        } else if self.isa(inst, b.rcc) {
            self.run_rcc(inst)
        } else if self.isa(inst, b.uic) {
            self.run_uic(inst)
        } else {
            let class = self.world.decl(self.world.inst(inst).meta).name.clone();
            Err(Error::plain(format!("don't know how to build instances of class '{class}'")))
        }
    }

    /// Visits all dependencies (post-order) and flattens their outputs
    /// into one mixed list whose elements are never mixed themselves.
    fn build_deps(&mut self, inst: InstId) -> Result<OutValue> {
        let mut flat: Vec<OutValue> = Vec::new();
        if let Some(Value::List(deps)) = self.world.inst(inst).get("deps").cloned() {
            for item in self.world.list(deps).clone() {
                let Value::Inst(dep) = item else { continue };
                self.visit(dep)?;
                match self.world.inst(dep).out.clone() {
                    Some(OutValue::Mixed(items)) => flat.extend(items),
                    Some(OutValue::Nothing) | None => {}
                    Some(other) => flat.push(other),
                }
            }
        }
        Ok(OutValue::Mixed(flat))
    }

    // ------------------------------------------------------------------
    // compiled products

    /// Compiles every non-header source, returning the produced object
    /// files (dependency object files pass through in front).
    fn compile_sources(&mut self, inst: InstId, inlist: &OutValue) -> Result<Vec<String>> {
        let toolchain = self.toolchain_for(inst);
        let os = self.host_os();
        let to_host = matches!(self.world.inst(inst).get("to_host"), Some(Value::Bool(true)));
        let ct = self.ctdefaults_for(toolchain);
        let out_dir = self.build_dir(inst)?;
        // the directory segment is the declaration name, never the `name`
        // field: that override only applies to the link artifact
        let prod_segment = self.decl_name(inst);
        let obj_ext = if toolchain == Toolchain::Msvc { ".obj" } else { ".o" };

        // generated sources received over the dependency chain come first
        let mut sources = Self::source_files(inlist);
        sources.extend(self.string_list(inst, "sources"));

        let mut objects = Self::object_files(inlist);

        self.backend.fork_group(i32::try_from(sources.len()).unwrap_or(i32::MAX));
        for source in &sources {
            let Some(lang) = guess_lang(source) else {
                return Err(Error::plain(format!("source file type not supported: {source}")));
            };
            if lang == Lang::Header {
                continue;
            }
            let abs = self.abs_source(inst, source)?;

            // object files of separate products in the same module get
            // their own directory, and sources collected from other
            // directories an underscore prefix, to avoid collisions
            let stem = path::path_part(source, PathPart::BaseName);
            let object = format!("{out_dir}/{prod_segment}/_{stem}{obj_ext}");
            objects.push(object.clone());

            let cmd = match toolchain {
                Toolchain::Gcc => "gcc",
                Toolchain::Clang => "clang",
                Toolchain::Msvc => "cl",
            };
            let cmd = self.prefix_cmd(cmd, to_host);
            self.begin(BuildOperation::Compile, &cmd, Some(toolchain), Some(os))?;

            self.emit_defaults_and_flags(ct, inst, BuildParam::Cflag, "cflags");
            let lang_field = match lang {
                Lang::C => "cflags_c",
                Lang::Cpp => "cflags_cc",
                Lang::ObjC => "cflags_objc",
                Lang::ObjCpp => "cflags_objcc",
                Lang::Header => unreachable!("headers are skipped"),
            };
            self.emit_defaults_and_flags(ct, inst, BuildParam::Cflag, lang_field);
            self.emit_defaults_and_flags(ct, inst, BuildParam::Define, "defines");
            self.emit_defaults_and_paths(ct, inst, BuildParam::IncludeDir, "include_dirs")?;

            self.backend.op_param(BuildParam::Outfile, path::denormalize(&object));
            self.backend.op_param(BuildParam::Infile, path::denormalize(&abs));
            self.backend.end_op();
        }
        self.backend.fork_group(-1);
        Ok(objects)
    }

    fn link(&mut self, inst: InstId, inputs: &OutValue, kind: LinkKind) -> Result<OutValue> {
        let toolchain = self.toolchain_for(inst);
        let os = self.host_os();
        let windows = os.is_windows();
        let to_host = matches!(self.world.inst(inst).get("to_host"), Some(Value::Bool(true)));
        let ct = self.ctdefaults_for(toolchain);
        let out_dir = self.build_dir(inst)?;

        let lib_prefix = if !windows && kind != LinkKind::Exe { "lib" } else { "" };
        let ext = match kind {
            LinkKind::Dynamic => {
                if windows {
                    ".dll"
                } else if os == HostOs::Mac {
                    ".dylib"
                } else {
                    ".so"
                }
            }
            LinkKind::Exe => {
                if windows {
                    ".exe"
                } else {
                    ""
                }
            }
            LinkKind::Static => {
                if windows {
                    ".lib"
                } else {
                    ".a"
                }
            }
        };
        let outfile = format!("{out_dir}/{lib_prefix}{}{ext}", self.product_name(inst));

        let cmd = match (toolchain, kind) {
            (Toolchain::Gcc, LinkKind::Static) => "ar",
            (Toolchain::Gcc, _) => "gcc",
            (Toolchain::Clang, LinkKind::Static) => {
                if windows {
                    "llvm-lib"
                } else {
                    "ar"
                }
            }
            (Toolchain::Clang, _) => "clang",
            (Toolchain::Msvc, LinkKind::Static) => "lib",
            (Toolchain::Msvc, _) => "link",
        };
        let cmd = self.prefix_cmd(cmd, to_host);

        let op = match kind {
            LinkKind::Exe => BuildOperation::LinkExe,
            LinkKind::Dynamic => BuildOperation::LinkDll,
            LinkKind::Static => BuildOperation::LinkLib,
        };
        self.begin(op, &cmd, Some(toolchain), Some(os))?;

        self.emit_defaults_and_flags(ct, inst, BuildParam::Ldflag, "ldflags");
        self.emit_defaults_and_flags(ct, inst, BuildParam::LibName, "lib_names");
        self.emit_defaults_and_flags(ct, inst, BuildParam::Framework, "frameworks");
        self.emit_defaults_and_paths(ct, inst, BuildParam::LibDir, "lib_dirs")?;
        self.emit_defaults_and_paths(ct, inst, BuildParam::LibFile, "lib_files")?;
        if let Some(def_file) = self.field_str(inst, "def_file") {
            if def_file != "." && !def_file.is_empty() {
                let abs = self.abs_source(inst, &def_file)?;
                self.backend.op_param(BuildParam::DefFile, path::denormalize(&abs));
            }
        }

        self.backend.op_param(BuildParam::Outfile, path::denormalize(&outfile));
        self.render_link_inputs(inputs, kind, toolchain);
        self.backend.end_op();

        Ok(match kind {
            LinkKind::Static => OutValue::StaticLib(outfile),
            LinkKind::Dynamic => OutValue::DynamicLib(outfile),
            LinkKind::Exe => OutValue::Executable(outfile),
        })
    }

    /// Emits the linker inputs. Mixed lists render in reverse so that
    /// dependents precede their dependencies on the link line; inherited
    /// libraries are consumed only when producing a dynamic library or an
    /// executable.
    fn render_link_inputs(&mut self, inputs: &OutValue, kind: LinkKind, toolchain: Toolchain) {
        match inputs {
            OutValue::Mixed(items) => {
                for item in items.iter().rev() {
                    self.render_link_inputs(item, kind, toolchain);
                }
            }
            OutValue::ObjectFiles(files) => {
                for file in files {
                    self.backend.op_param(BuildParam::Infile, path::denormalize(file));
                }
            }
            OutValue::StaticLib(file) | OutValue::DynamicLib(file) => {
                if kind != LinkKind::Static {
                    let rendered = if toolchain == Toolchain::Msvc && matches!(inputs, OutValue::DynamicLib(_)) {
                        // msvc links against the dll's import library
                        format!("{file}.lib")
                    } else {
                        file.clone()
                    };
                    self.backend.op_param(BuildParam::Infile, path::denormalize(&rendered));
                }
            }
            _ => {}
        }
    }

    fn library(&mut self, inst: InstId, inlist: &OutValue) -> Result<()> {
        let objects = self.compile_sources(inst, inlist)?;
        let compiler_out = OutValue::ObjectFiles(objects);
        let libs = Self::libs_of(inlist);
        let kind = if self.field_str(inst, "lib_type").as_deref() == Some("shared") {
            LinkKind::Dynamic
        } else {
            LinkKind::Static
        };
        let inputs = if libs.is_empty() {
            compiler_out
        } else {
            let mut items = libs.clone();
            items.push(compiler_out);
            OutValue::Mixed(items)
        };
        let artifact = self.link(inst, &inputs, kind)?;
        // a static archive cannot absorb other archives, so inherited libs
        // pass through alongside it
        let out = if kind == LinkKind::Static && !libs.is_empty() {
            let mut items = libs;
            items.push(artifact);
            OutValue::Mixed(items)
        } else {
            artifact
        };
        self.world.inst_mut(inst).out = Some(out);
        Ok(())
    }

    fn executable(&mut self, inst: InstId, inlist: &OutValue) -> Result<()> {
        let objects = self.compile_sources(inst, inlist)?;
        let compiler_out = OutValue::ObjectFiles(objects);
        let libs = Self::libs_of(inlist);
        let inputs = if libs.is_empty() {
            compiler_out
        } else {
            let mut items = libs;
            items.push(compiler_out);
            OutValue::Mixed(items)
        };
        let artifact = self.link(inst, &inputs, LinkKind::Exe)?;
        self.world.inst_mut(inst).out = Some(artifact);
        Ok(())
    }

    /// Like a static library, but the object files pass on directly so a
    /// downstream executable links them without an intermediate archive.
    fn source_set(&mut self, inst: InstId, inlist: &OutValue) -> Result<()> {
        let objects = self.compile_sources(inst, inlist)?;
        let libs = Self::libs_of(inlist);
        let out = if libs.is_empty() {
            OutValue::ObjectFiles(objects)
        } else {
            let mut items = libs;
            items.push(OutValue::ObjectFiles(objects));
            OutValue::Mixed(items)
        };
        self.world.inst_mut(inst).out = Some(out);
        Ok(())
    }

    // ------------------------------------------------------------------
    // tool products

    fn tool_command(&self, inst: InstId, builtin_field: &str, tool: &str) -> Result<String> {
        let mut dir = self.field_str(inst, "tool_dir").unwrap_or_default();
        if dir.is_empty() || dir == "." {
            dir = self.builtins_str(builtin_field);
        }
        if dir.is_empty() || dir == "." {
            return Ok(tool.to_string());
        }
        if !dir.starts_with('/') {
            return Err(Error::plain(format!("{builtin_field} cannot be relative: {dir}")));
        }
        Ok(format!("{dir}/{tool}"))
    }

    fn run_moc(&mut self, inst: InstId) -> Result<()> {
        let out_dir = self.build_dir(inst)?;
        let tool = self.tool_command(inst, "moc_path", "moc")?;
        let defines = self.string_list(inst, "defines");
        let sources = self.string_list(inst, "sources");

        let mut outputs = Vec::new();
        self.backend.fork_group(i32::try_from(sources.len()).unwrap_or(i32::MAX));
        for source in &sources {
            let header = guess_lang(source) == Some(Lang::Header);
            let abs = self.abs_source(inst, source)?;
            let stem = path::path_part(source, PathPart::BaseName);
            // header inputs feed the compiler downstream; cpp inputs are
            // included at the bottom of the translation unit, so they use
            // the naming from the Qt documentation
            let outfile = if header {
                format!("{out_dir}/moc_{stem}.cpp")
            } else {
                format!("{out_dir}/{stem}.moc")
            };

            self.begin(BuildOperation::RunMoc, path::denormalize(&tool), None, None)?;
            self.backend.op_param(BuildParam::Infile, path::denormalize(&abs));
            self.backend.op_param(BuildParam::Outfile, path::denormalize(&outfile));
            for define in &defines {
                self.backend.op_param(BuildParam::Define, define);
            }
            self.backend.end_op();

            if header {
                outputs.push(outfile);
            }
        }
        self.backend.fork_group(-1);
        self.world.inst_mut(inst).out = Some(OutValue::SourceFiles(outputs));
        Ok(())
    }

    fn run_rcc(&mut self, inst: InstId) -> Result<()> {
        let out_dir = self.build_dir(inst)?;
        let tool = self.tool_command(inst, "rcc_path", "rcc")?;
        let sources = self.string_list(inst, "sources");

        let mut outputs = Vec::new();
        self.backend.fork_group(i32::try_from(sources.len()).unwrap_or(i32::MAX));
        for source in &sources {
            let abs = self.abs_source(inst, source)?;
            let file_name = path::path_part(source, PathPart::FileName);
            let outfile = format!("{out_dir}/qrc_{file_name}.cpp");
            outputs.push(outfile.clone());

            self.begin(BuildOperation::RunRcc, path::denormalize(&tool), None, None)?;
            self.backend.op_param(BuildParam::Name, path::path_part(source, PathPart::BaseName));
            self.backend.op_param(BuildParam::Infile, path::denormalize(&abs));
            self.backend.op_param(BuildParam::Outfile, path::denormalize(&outfile));
            self.backend.end_op();
        }
        self.backend.fork_group(-1);
        self.world.inst_mut(inst).out = Some(OutValue::SourceFiles(outputs));
        Ok(())
    }

    fn run_uic(&mut self, inst: InstId) -> Result<()> {
        let out_dir = self.build_dir(inst)?;
        let tool = self.tool_command(inst, "uic_path", "uic")?;
        let sources = self.string_list(inst, "sources");

        let mut outputs = Vec::new();
        self.backend.fork_group(i32::try_from(sources.len()).unwrap_or(i32::MAX));
        for source in &sources {
            let abs = self.abs_source(inst, source)?;
            let stem = path::path_part(source, PathPart::BaseName);
            let outfile = format!("{out_dir}/ui_{stem}.h");
            outputs.push(outfile.clone());

            self.begin(BuildOperation::RunUic, path::denormalize(&tool), None, None)?;
            self.backend.op_param(BuildParam::Infile, path::denormalize(&abs));
            self.backend.op_param(BuildParam::Outfile, path::denormalize(&outfile));
            self.backend.end_op();
        }
        self.backend.fork_group(-1);
        self.world.inst_mut(inst).out = Some(OutValue::SourceFiles(outputs));
        Ok(())
    }

    // ------------------------------------------------------------------
    // scripted steps

    fn script_runner(&self) -> String {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .unwrap_or_else(|| "busy".to_string())
    }

    fn expand_arg(&self, inst: InstId, source: Option<&str>, arg: &str) -> Result<String> {
        if source.is_none() && arg.contains("{{source") {
            return Err(Error::plain(format!(
                "cannot do source expansion, invalid placeholders in string: {arg}"
            )));
        }
        let root = self.builtins_str("root_build_dir");
        let current = self.build_dir(inst)?;
        let dirs = ExpansionDirs { root_build_dir: &root, current_build_dir: &current };
        path::apply_expansion(source.unwrap_or(""), arg, false, Some(dirs))
            .map_err(|_| Error::plain(format!("cannot do source expansion, invalid placeholders in string: {arg}")))
    }

    fn call_script(&mut self, inst: InstId, app: &str, script: &str, source: Option<&str>) -> Result<()> {
        self.begin(BuildOperation::RunLua, app, None, None)?;
        for arg in self.string_list(inst, "args") {
            let expanded = self.expand_arg(inst, source, &arg)?;
            self.backend.op_param(BuildParam::Arg, &expanded);
        }
        self.backend.op_param(BuildParam::Infile, path::denormalize(script));
        self.backend.end_op();
        Ok(())
    }

    fn script(&mut self, inst: InstId) -> Result<()> {
        let out_dir = self.build_dir(inst)?;
        let mut outputs = Vec::new();
        for output in self.string_list(inst, "outputs") {
            if output.starts_with('/') {
                return Err(Error::plain("the 'outputs' field requires relative paths"));
            }
            let abs = path::join(&out_dir, &output)
                .map_err(|_| Error::plain("the 'outputs' field requires relative paths"))?;
            outputs.push(abs);
        }

        let script = self.field_str(inst, "script").unwrap_or_default();
        let script = self.abs_source(inst, &script)?;
        let app = self.script_runner();
        self.call_script(inst, &app, &script, None)?;

        self.world.inst_mut(inst).out = Some(OutValue::SourceFiles(outputs));
        Ok(())
    }

    fn script_foreach(&mut self, inst: InstId) -> Result<()> {
        self.world.inst_mut(inst).out = Some(OutValue::Nothing);

        let script = self.field_str(inst, "script").unwrap_or_default();
        let script = self.abs_source(inst, &script)?;
        let app = self.script_runner();

        let sources = self.string_list(inst, "sources");
        self.backend.fork_group(i32::try_from(sources.len()).unwrap_or(i32::MAX));
        for source in &sources {
            let abs = self.abs_source(inst, source)?;
            self.call_script(inst, &app, &script, Some(&abs))?;
        }
        self.backend.fork_group(-1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // copies and messages

    fn copy(&mut self, inst: InstId, inlist: &OutValue) -> Result<()> {
        self.world.inst_mut(inst).out = Some(OutValue::Nothing);

        let root_build = self.builtins_str("root_build_dir");

        let mut sources = self.string_list(inst, "sources");
        for selector in self.string_list(inst, "use_deps") {
            match selector.as_str() {
                "object_file" => sources.extend(Self::object_files(inlist)),
                "source_file" => sources.extend(Self::source_files(inlist)),
                "static_lib" => {
                    Self::collect_files(
                        inlist,
                        |o| match o {
                            OutValue::StaticLib(f) => Some(std::slice::from_ref(f)),
                            _ => None,
                        },
                        &mut sources,
                    );
                }
                "shared_lib" => {
                    Self::collect_files(
                        inlist,
                        |o| match o {
                            OutValue::DynamicLib(f) => Some(std::slice::from_ref(f)),
                            _ => None,
                        },
                        &mut sources,
                    );
                }
                "executable" => {
                    Self::collect_files(
                        inlist,
                        |o| match o {
                            OutValue::Executable(f) => Some(std::slice::from_ref(f)),
                            _ => None,
                        },
                        &mut sources,
                    );
                }
                _ => {}
            }
        }

        let outputs = self.string_list(inst, "outputs");
        if outputs.is_empty() {
            let desig = self.designator_of(inst);
            return Err(Error::plain(format!("outputs in Copy instance '{desig}' cannot be empty")));
        }

        self.backend.fork_group(i32::try_from(sources.len()).unwrap_or(i32::MAX));
        for source in &sources {
            let from = self.abs_source(inst, source)?;
            for output in &outputs {
                let expanded = path::apply_expansion(&from, output, true, None).map_err(|_| {
                    Error::plain(format!("cannot do source expansion, invalid placeholders in path: {output}"))
                })?;
                if expanded.starts_with('/') {
                    let desig = self.designator_of(inst);
                    return Err(Error::plain(format!(
                        "outputs in Copy instance '{desig}' require relative paths"
                    )));
                }
                let rel = if expanded.starts_with('.') { expanded } else { format!("./{expanded}") };
                let to = path::join(&root_build, &rel)
                    .map_err(|_| Error::plain(format!("cannot derive copy target for {rel}")))?;

                self.begin(BuildOperation::Copy, "copy", None, None)?;
                self.backend.op_param(BuildParam::Infile, path::denormalize(&from));
                self.backend.op_param(BuildParam::Outfile, path::denormalize(&to));
                self.backend.end_op();
            }
        }
        self.backend.fork_group(-1);
        Ok(())
    }

    fn message(&mut self, inst: InstId) -> Result<()> {
        let msg_type = self.field_str(inst, "msg_type").unwrap_or_default();
        let text = self.field_str(inst, "text").unwrap_or_default();
        match msg_type.as_str() {
            "error" => Err(Error::plain(text)),
            "warning" => {
                self.logger.log(LogLevel::Warning, None, RowCol::default(), &text);
                Ok(())
            }
            _ => {
                self.logger.log(LogLevel::Message, None, RowCol::default(), &text);
                Ok(())
            }
        }
    }
}

/// Clears every product's `out` memo below a module, enabling a second
/// walk over the same tree.
pub fn reset_outputs(world: &mut World, module: DeclId) {
    let order = match &world.decl(module).kind {
        DeclKind::Module(m) => m.order.clone(),
        _ => return,
    };
    for decl in order {
        match &world.decl(decl).kind {
            DeclKind::Module(_) => reset_outputs(world, decl),
            DeclKind::Var(v) => {
                if let Some(inst) = v.inst {
                    world.inst_mut(inst).out = None;
                }
            }
            _ => {}
        }
    }
}
