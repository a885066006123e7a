//! Tests for the build-graph visitor: the emitted operation stream, path
//! conventions, memoization and post-order.

use busy::{
    BackendEvent, BuildOperation, BuildParam, HostConfig, HostOs, NoopLogger, RecordingBackend, Session, Toolchain,
};
use tempfile::TempDir;

/// A fixed host so the expected artifact names do not depend on the
/// machine running the tests.
fn test_host() -> HostConfig {
    HostConfig { os: HostOs::Linux, toolchain: Toolchain::Gcc, cpu: "x86_64".to_string(), wordsize: 8 }
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    for (rel, content) in files {
        let target = dir.path().join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(target, content).expect("write file");
    }
    dir
}

/// Loads a project, selects the given products (or the defaults) and
/// returns the recorded op stream together with source and build dirs.
fn run(
    files: &[(&str, &str)],
    products: Option<&[&str]>,
) -> (busy::Result<()>, RecordingBackend, String, String, TempDir) {
    let dir = project(files);
    let mut session = Session::with_host_config(&test_host());
    session.logger = Box::new(NoopLogger);
    let out = dir.path().join("out");
    let src_dir = dir.path().to_str().expect("utf-8 path").to_string();
    let build_dir = out.to_str().expect("utf-8 path").to_string();
    let mut backend = RecordingBackend::new();
    let result = (|| {
        session.load(&src_dir, &build_dir)?;
        let designators: Option<Vec<String>> =
            products.map(|p| p.iter().map(|s| (*s).to_string()).collect());
        let selected = session.select(designators.as_deref())?;
        session.visit(&selected, &mut backend)
    })();
    (result, backend, src_dir, build_dir, dir)
}

fn param<'e>(params: &'e [(BuildParam, &str)], which: BuildParam) -> Vec<&'e str> {
    params.iter().filter(|(p, _)| *p == which).map(|(_, v)| *v).collect()
}

// ---------------------------------------------------------------------
// compiled products

#[test]
fn minimal_library_emits_compile_and_archive() {
    let (result, backend, src, build, _dir) = run(
        &[("BUSY", "let lib * : Library = { .sources += ./a.c  .name = \"foo\" }\n")],
        Some(&["lib"]),
    );
    result.expect("visit succeeds");

    // the object directory carries the declaration name; the `name` field
    // only renames the link artifact
    assert_eq!(backend.begins(BuildOperation::Compile).len(), 1);
    let compile = backend.params_of(BuildOperation::Compile, 0);
    assert_eq!(param(&compile, BuildParam::Outfile), vec![format!("{build}/lib/_a.o")]);
    assert_eq!(param(&compile, BuildParam::Infile), vec![format!("{src}/a.c")]);

    assert_eq!(backend.begins(BuildOperation::LinkLib).len(), 1);
    let link = backend.params_of(BuildOperation::LinkLib, 0);
    assert_eq!(param(&link, BuildParam::Outfile), vec![format!("{build}/libfoo.a")]);
    assert_eq!(param(&link, BuildParam::Infile), vec![format!("{build}/lib/_a.o")]);
}

#[test]
fn products_sharing_a_name_keep_distinct_object_dirs() {
    // both products compile the same source and render the same artifact
    // name; their object files must still land in per-declaration
    // directories
    let (result, backend, _src, build, _dir) = run(
        &[(
            "BUSY",
            "let debug * : Library = { .sources += ./a.c  .name = \"core\" }\n\
             let release * : Library = { .sources += ./a.c  .name = \"core\" }\n",
        )],
        Some(&["debug", "release"]),
    );
    result.expect("visit succeeds");

    let first = backend.params_of(BuildOperation::Compile, 0);
    let second = backend.params_of(BuildOperation::Compile, 1);
    assert_eq!(param(&first, BuildParam::Outfile), vec![format!("{build}/debug/_a.o")]);
    assert_eq!(param(&second, BuildParam::Outfile), vec![format!("{build}/release/_a.o")]);
}

#[test]
fn executable_links_dependency_archive() {
    let (result, backend, _src, build, _dir) = run(
        &[(
            "BUSY",
            "let core * : Library = { .sources += ./core.c }\n\
             let app ! : Executable = { .sources += ./main.c  .deps += core }\n",
        )],
        None, // default selection picks the '!' product
    );
    result.expect("visit succeeds");

    // post-order: the library is entered before the executable
    assert_eq!(backend.entered_products(), vec!["core", "app"]);

    let link = backend.params_of(BuildOperation::LinkExe, 0);
    let infiles = param(&link, BuildParam::Infile);
    assert!(infiles.contains(&format!("{build}/app/_main.o").as_str()), "{infiles:?}");
    assert!(infiles.contains(&format!("{build}/libcore.a").as_str()), "{infiles:?}");
    assert_eq!(param(&link, BuildParam::Outfile), vec![format!("{build}/app")]);
}

#[test]
fn shared_dependency_is_visited_once() {
    let (result, backend, _src, _build, _dir) = run(
        &[(
            "BUSY",
            "let base * : Library = { .sources += ./b.c }\n\
             let one * : Executable = { .sources += ./one.c  .deps += base }\n\
             let two * : Executable = { .sources += ./two.c  .deps += base }\n",
        )],
        Some(&["one", "two"]),
    );
    result.expect("visit succeeds");

    assert_eq!(backend.entered_products(), vec!["base", "one", "two"]);
    // the shared library is compiled and archived exactly once
    assert_eq!(backend.begins(BuildOperation::LinkLib).len(), 1);
    assert_eq!(backend.begins(BuildOperation::Compile).len(), 3);
}

#[test]
fn source_set_objects_link_into_dependents() {
    let (result, backend, _src, build, _dir) = run(
        &[(
            "BUSY",
            "let parts * : SourceSet = { .sources += ./p.c }\n\
             let app ! : Executable = { .sources += ./main.c  .deps += parts }\n",
        )],
        None,
    );
    result.expect("visit succeeds");

    // no archive in between: the source set's objects feed the link
    assert!(backend.begins(BuildOperation::LinkLib).is_empty());
    let link = backend.params_of(BuildOperation::LinkExe, 0);
    let infiles = param(&link, BuildParam::Infile);
    assert!(infiles.contains(&format!("{build}/parts/_p.o").as_str()), "{infiles:?}");
    assert!(infiles.contains(&format!("{build}/app/_main.o").as_str()), "{infiles:?}");
}

#[test]
fn group_forwards_dependencies() {
    let (result, backend, _src, build, _dir) = run(
        &[(
            "BUSY",
            "let core * : Library = { .sources += ./core.c }\n\
             let all * : Group = { .deps += core }\n\
             let app ! : Executable = { .sources += ./main.c  .deps += all }\n",
        )],
        None,
    );
    result.expect("visit succeeds");

    let link = backend.params_of(BuildOperation::LinkExe, 0);
    assert!(
        param(&link, BuildParam::Infile).contains(&format!("{build}/libcore.a").as_str()),
        "group must forward the library"
    );
}

#[test]
fn config_flags_are_aggregated() {
    let (result, backend, _src, _build, _dir) = run(
        &[(
            "BUSY",
            "let warnings * : Config = { .cflags += \"-Wall\"  .defines += \"NDEBUG\" }\n\
             let lib ! : Library = { .sources += ./a.c  .configs += warnings  .cflags += \"-O2\" }\n",
        )],
        None,
    );
    result.expect("visit succeeds");

    let compile = backend.params_of(BuildOperation::Compile, 0);
    let cflags = param(&compile, BuildParam::Cflag);
    // config contributions come before the product's own flags
    assert_eq!(cflags, vec!["-Wall", "-O2"]);
    assert_eq!(param(&compile, BuildParam::Define), vec!["NDEBUG"]);
}

#[test]
fn fork_hints_wrap_compile_groups() {
    let (result, backend, _src, _build, _dir) = run(
        &[("BUSY", "let lib * : Library = { .sources += ./a.c  .sources += ./b.c }\n")],
        Some(&["lib"]),
    );
    result.expect("visit succeeds");

    let forks: Vec<i32> = backend
        .events
        .iter()
        .filter_map(|e| match e {
            BackendEvent::Fork(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(forks, vec![2, -1]);
}

#[test]
fn headers_are_not_compiled() {
    let (result, backend, _src, _build, _dir) = run(
        &[("BUSY", "let lib * : Library = { .sources += ./a.c  .sources += ./a.h }\n")],
        Some(&["lib"]),
    );
    result.expect("visit succeeds");
    assert_eq!(backend.begins(BuildOperation::Compile).len(), 1);
}

#[test]
fn unknown_source_type_is_fatal() {
    let (result, _, _, _, _dir) = run(
        &[("BUSY", "let lib * : Library = { .sources += ./a.rs }\n")],
        Some(&["lib"]),
    );
    let err = result.expect_err("unsupported source").to_string();
    assert!(err.contains("source file type not supported"), "{err}");
}

// ---------------------------------------------------------------------
// copies, scripts, messages

#[test]
fn copy_applies_source_expansion() {
    let (result, backend, src, build, _dir) = run(
        &[(
            "BUSY",
            "let c * : Copy = { .sources += ./src/app.txt  .outputs += \"{{source_name_part}}.copy\" }\n",
        )],
        Some(&["c"]),
    );
    result.expect("visit succeeds");

    let copy = backend.params_of(BuildOperation::Copy, 0);
    assert_eq!(param(&copy, BuildParam::Infile), vec![format!("{src}/src/app.txt")]);
    assert_eq!(param(&copy, BuildParam::Outfile), vec![format!("{build}/app.copy")]);
}

#[test]
fn copy_imports_dependency_artifacts() {
    let (result, backend, _src, build, _dir) = run(
        &[(
            "BUSY",
            "let core * : Library = { .sources += ./core.c }\n\
             let c ! : Copy = { .deps += core  .use_deps += `static_lib  .outputs += \"{{source_file_part}}\" }\n",
        )],
        None,
    );
    result.expect("visit succeeds");

    let copy = backend.params_of(BuildOperation::Copy, 0);
    assert_eq!(param(&copy, BuildParam::Infile), vec![format!("{build}/libcore.a")]);
    assert_eq!(param(&copy, BuildParam::Outfile), vec![format!("{build}/libcore.a")]);
}

#[test]
fn copy_without_outputs_is_fatal() {
    let (result, _, _, _, _dir) = run(
        &[("BUSY", "let c * : Copy = { .sources += ./a.txt }\n")],
        Some(&["c"]),
    );
    let err = result.expect_err("empty outputs").to_string();
    assert!(err.contains("cannot be empty"), "{err}");
}

#[test]
fn error_message_product_fails_precheck() {
    let (result, backend, _src, _build, _dir) = run(
        &[(
            "BUSY",
            "let bad * : Message = { .msg_type = `error  .text = \"unsupported platform\" }\n\
             let app ! : Executable = { .sources += ./main.c  .deps += bad }\n",
        )],
        None,
    );
    let err = result.expect_err("precheck fails").to_string();
    assert!(err.contains("unsupported platform"), "{err}");
    // precheck fires before anything is emitted
    assert!(backend.events.is_empty());
}

#[test]
fn script_emits_expanded_args() {
    let (result, backend, src, build, _dir) = run(
        &[(
            "BUSY",
            "let gen * : LuaScript = { .script = ./gen.lua  .args += \"-o\"  .args += \"{{current_build_dir}}\"  .outputs += ./gen.c }\n",
        )],
        Some(&["gen"]),
    );
    result.expect("visit succeeds");

    let lua = backend.params_of(BuildOperation::RunLua, 0);
    assert_eq!(param(&lua, BuildParam::Arg), vec!["-o", format!("//{}", build.trim_start_matches('/')).as_str()]);
    assert_eq!(param(&lua, BuildParam::Infile), vec![format!("{src}/gen.lua")]);
}

// ---------------------------------------------------------------------
// qt tool products

#[test]
fn moc_distinguishes_headers_from_sources() {
    let (result, backend, _src, build, _dir) = run(
        &[(
            "BUSY",
            "let m * : Moc = { .sources += ./widget.h  .sources += ./main.cpp  .defines += \"QT_CORE\" }\n\
             let lib ! : Library = { .sources += ./widget.cpp  .deps += m }\n",
        )],
        None,
    );
    result.expect("visit succeeds");

    let first = backend.params_of(BuildOperation::RunMoc, 0);
    assert_eq!(param(&first, BuildParam::Outfile), vec![format!("{build}/moc_widget.cpp")]);
    assert_eq!(param(&first, BuildParam::Define), vec!["QT_CORE"]);
    let second = backend.params_of(BuildOperation::RunMoc, 1);
    assert_eq!(param(&second, BuildParam::Outfile), vec![format!("{build}/main.moc")]);

    // only the header-derived cpp reaches the dependent compiler, in
    // front of the product's own sources
    let compiles = backend.begins(BuildOperation::Compile);
    assert_eq!(compiles.len(), 2);
    let generated = backend.params_of(BuildOperation::Compile, 0);
    assert_eq!(param(&generated, BuildParam::Infile), vec![format!("{build}/moc_widget.cpp")]);
}

#[test]
fn rcc_and_uic_emit_generated_names() {
    let (result, backend, _src, build, _dir) = run(
        &[(
            "BUSY",
            "let r * : Rcc = { .sources += ./res.qrc }\n\
             let u * : Uic = { .sources += ./form.ui }\n",
        )],
        Some(&["r", "u"]),
    );
    result.expect("visit succeeds");

    let rcc = backend.params_of(BuildOperation::RunRcc, 0);
    assert_eq!(param(&rcc, BuildParam::Outfile), vec![format!("{build}/qrc_res.qrc.cpp")]);
    assert_eq!(param(&rcc, BuildParam::Name), vec!["res"]);
    let uic = backend.params_of(BuildOperation::RunUic, 0);
    assert_eq!(param(&uic, BuildParam::Outfile), vec![format!("{build}/ui_form.h")]);
}

// ---------------------------------------------------------------------
// selection, cancellation and reruns

#[test]
fn default_selection_requires_a_default_product() {
    let (result, _, _, _, _dir) = run(
        &[("BUSY", "let lib * : Library = { .sources += ./a.c }\n")],
        None,
    );
    let err = result.expect_err("no default products").to_string();
    assert!(err.contains("default product"), "{err}");
}

#[test]
fn selection_enforces_public_transit() {
    let (result, _, _, _, _dir) = run(
        &[
            ("BUSY", "submod hidden = ./hidden\n"),
            ("hidden/BUSY", "let lib * : Library = { .sources += ./a.c }\n"),
        ],
        Some(&["hidden.lib"]),
    );
    let err = result.expect_err("private transit").to_string();
    assert!(err.contains("not public"), "{err}");
}

#[test]
fn products_in_submodules_are_selectable() {
    let (result, backend, _src, build, _dir) = run(
        &[
            ("BUSY", "submod gui * = ./gui\n"),
            ("gui/BUSY", "let lib * : Library = { .sources += ./w.c }\n"),
        ],
        Some(&["gui.lib"]),
    );
    result.expect("visit succeeds");
    assert_eq!(backend.entered_products(), vec!["gui.lib"]);
    let link = backend.params_of(BuildOperation::LinkLib, 0);
    assert_eq!(param(&link, BuildParam::Outfile), vec![format!("{build}/gui/liblib.a")]);
}

#[test]
fn backend_cancel_aborts_the_walk() {
    let dir = project(&[("BUSY", "let lib * : Library = { .sources += ./a.c }\n")]);
    let mut session = Session::with_host_config(&test_host());
    session.logger = Box::new(NoopLogger);
    let out = dir.path().join("out");
    session
        .load(dir.path().to_str().unwrap(), out.to_str().unwrap())
        .expect("parse succeeds");
    let selected = session.select(Some(&["lib".to_string()])).expect("selection");

    let mut backend = RecordingBackend { cancel_on: Some(BuildOperation::Compile), ..Default::default() };
    let err = session.visit(&selected, &mut backend).expect_err("canceled");
    assert!(err.to_string().contains("canceled"), "{err}");
}

#[test]
fn reset_outputs_allows_a_second_walk() {
    let dir = project(&[("BUSY", "let lib * : Library = { .sources += ./a.c }\n")]);
    let mut session = Session::with_host_config(&test_host());
    session.logger = Box::new(NoopLogger);
    let out = dir.path().join("out");
    session
        .load(dir.path().to_str().unwrap(), out.to_str().unwrap())
        .expect("parse succeeds");
    let selected = session.select(Some(&["lib".to_string()])).expect("selection");

    let mut first = RecordingBackend::new();
    session.visit(&selected, &mut first).expect("first walk");
    let first_compiles = first.begins(BuildOperation::Compile).len();

    // a second walk without reset is fully memoized
    let mut second = RecordingBackend::new();
    session.visit(&selected, &mut second).expect("second walk");
    assert!(second.begins(BuildOperation::Compile).is_empty());

    session.reset_outputs();
    let mut third = RecordingBackend::new();
    session.visit(&selected, &mut third).expect("third walk");
    assert_eq!(third.begins(BuildOperation::Compile).len(), first_compiles);
}
