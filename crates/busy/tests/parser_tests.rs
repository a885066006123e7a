//! End-to-end tests for the evaluating parser: declarations, expressions,
//! conditions, macros, submodules and parameters, driven through on-disk
//! `BUSY` trees.

use busy::{NoopLogger, Session, Value};
use tempfile::TempDir;

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

fn try_load(files: &[(&str, &str)], params: &[(&str, &str)]) -> (busy::Result<busy::DeclId>, Session, TempDir) {
    let dir = project(files);
    let mut session = Session::new();
    session.logger = Box::new(NoopLogger);
    for (key, value) in params {
        session.set_param(key, value);
    }
    let out = dir.path().join("out");
    let result = session.load(dir.path().to_str().expect("utf-8 path"), out.to_str().expect("utf-8 path"));
    (result, session, dir)
}

fn load(text: &str) -> (Session, TempDir) {
    let (result, session, dir) = try_load(&[("BUSY", text)], &[]);
    result.expect("parse succeeds");
    (session, dir)
}

fn load_err(text: &str) -> String {
    let (result, _, _) = try_load(&[("BUSY", text)], &[]);
    result.expect_err("parse fails").to_string()
}

fn root_value(session: &Session, name: &str) -> Value {
    let root = session.root().expect("loaded root");
    let inst = session.world.decl(root).module().expect("module").inst.expect("instance");
    session.world.inst(inst).get(name).cloned().unwrap_or(Value::Nil)
}

fn string_items(session: &Session, value: &Value) -> Vec<String> {
    match value {
        Value::List(id) => session
            .world
            .list(*id)
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect(),
        _ => panic!("expected a list value, got {value:?}"),
    }
}

// ---------------------------------------------------------------------
// declarations and scalars

#[test]
fn scalar_declarations() {
    let (session, _dir) = load(
        "let i : int = 40 + 2\n\
         let r : real = 1.5 * 2.0\n\
         let s = \"ab\" + \"cd\"\n\
         let b = !false\n\
         let y : symbol = `gold\n",
    );
    assert_eq!(root_value(&session, "i"), Value::Int(42));
    assert_eq!(root_value(&session, "r"), Value::Real(3.0));
    assert_eq!(root_value(&session, "s"), Value::Str("abcd".to_string()));
    assert_eq!(root_value(&session, "b"), Value::Bool(true));
    assert_eq!(root_value(&session, "y"), Value::Symbol("gold".to_string()));
}

#[test]
fn hex_integers_and_comparisons() {
    let (session, _dir) = load(
        "let h = 0x10\n\
         let lt = 1 < 2\n\
         let ge = 2 >= 2\n\
         let se = \"abc\" < \"abd\"\n",
    );
    assert_eq!(root_value(&session, "h"), Value::Int(16));
    assert_eq!(root_value(&session, "lt"), Value::Bool(true));
    assert_eq!(root_value(&session, "ge"), Value::Bool(true));
    assert_eq!(root_value(&session, "se"), Value::Bool(true));
}

#[test]
fn path_literals_and_join() {
    let (session, _dir) = load(
        "let p = ./src/a.c\n\
         let q = ./src + ./b.c\n\
         let up = ./src/deep + ../c.c\n",
    );
    assert_eq!(root_value(&session, "p"), Value::Path("./src/a.c".to_string()));
    assert_eq!(root_value(&session, "q"), Value::Path("./src/b.c".to_string()));
    assert_eq!(root_value(&session, "up"), Value::Path("./src/c.c".to_string()));
}

#[test]
fn duplicate_name_is_rejected() {
    let err = load_err("let x = 1\nlet x = 2\n");
    assert!(err.contains("already declared"), "{err}");
}

#[test]
fn use_before_declaration_is_rejected() {
    let err = load_err("let y = x + 1\nlet x = 1\n");
    assert!(err.contains("check spelling and declaration order"), "{err}");
}

// ---------------------------------------------------------------------
// lists

#[test]
fn list_difference_and_union_preserve_order() {
    let (session, _dir) = load(
        "let a : string[] = [ \"x\" \"y\" \"z\" ]\n\
         let b : string[] = a - [ \"y\" ] + \"w\"\n",
    );
    let b = root_value(&session, "b");
    assert_eq!(string_items(&session, &b), vec!["x", "z", "w"]);
}

#[test]
fn list_intersection_and_membership() {
    let (session, _dir) = load(
        "let a : string[] = [ \"x\" \"y\" \"z\" ]\n\
         let b = a * [ \"z\" \"x\" ]\n\
         let has = \"y\" in a\n\
         let missing = \"q\" in a\n",
    );
    let b = root_value(&session, "b");
    assert_eq!(string_items(&session, &b), vec!["x", "z"]);
    assert_eq!(root_value(&session, "has"), Value::Bool(true));
    assert_eq!(root_value(&session, "missing"), Value::Bool(false));
}

#[test]
fn scalar_union_suppresses_duplicates() {
    let (session, _dir) = load(
        "let a : string[] = [ \"x\" ]\n\
         let b = a + \"x\"\n\
         let c = a + \"y\"\n",
    );
    assert_eq!(string_items(&session, &root_value(&session, "b")), vec!["x"]);
    assert_eq!(string_items(&session, &root_value(&session, "c")), vec!["x", "y"]);
}

#[test]
fn lists_compare_by_reference() {
    let (session, _dir) = load(
        "let a : string[] = [ \"x\" ]\n\
         let b : string[] = [ \"x\" ]\n\
         let same = a == a\n\
         let different = a == b\n\
         let eq = same_list(a, b)\n",
    );
    assert_eq!(root_value(&session, "same"), Value::Bool(true));
    assert_eq!(root_value(&session, "different"), Value::Bool(false));
    assert_eq!(root_value(&session, "eq"), Value::Bool(true));
}

#[test]
fn same_set_ignores_order() {
    let (session, _dir) = load(
        "let a : int[] = [ 1 2 3 ]\n\
         let b : int[] = [ 3 1 2 ]\n\
         let c : int[] = [ 1 2 ]\n\
         let ab = same_set(a, b)\n\
         let ac = same_set(a, c)\n",
    );
    assert_eq!(root_value(&session, "ab"), Value::Bool(true));
    assert_eq!(root_value(&session, "ac"), Value::Bool(false));
}

#[test]
fn list_of_list_is_rejected() {
    let err = load_err("type T = class { x : int } \nlet l : T[][] = []\n");
    assert!(!err.is_empty());
}

// ---------------------------------------------------------------------
// conditions and skip mode

#[test]
fn skipped_branch_suppresses_effects() {
    // division by zero in the dead branch must not raise
    let (session, _dir) = load(
        "param p : bool = false\n\
         if p then let x : int = 1/0 end\n\
         let done = true\n",
    );
    assert_eq!(root_value(&session, "done"), Value::Bool(true));
}

#[test]
fn taken_branch_raises_division_by_zero() {
    let (result, _, _) = try_load(
        &[("BUSY", "param p : bool = false\nif p then let x : int = 1/0 end\n")],
        &[("p", "true")],
    );
    let err = result.expect_err("division by zero").to_string();
    assert!(err.contains("division by zero"), "{err}");
}

#[test]
fn elsif_and_else_branches() {
    let (session, _dir) = load(
        "var tag = \"\"\n\
         let n = 2\n\
         if n == 1 then tag = \"one\"\n\
         elsif n == 2 then tag = \"two\"\n\
         else tag = \"many\" end\n",
    );
    assert_eq!(root_value(&session, "tag"), Value::Str("two".to_string()));
}

#[test]
fn brace_condition_with_else_chain() {
    let (session, _dir) = load(
        "var tag = \"\"\n\
         let n = 3\n\
         if n == 1 { tag = \"one\" } else if n == 2 { tag = \"two\" } else { tag = \"many\" }\n",
    );
    assert_eq!(root_value(&session, "tag"), Value::Str("many".to_string()));
}

#[test]
fn skipped_branch_is_still_type_checked() {
    let err = load_err("if false then let x : string = 1 end\n");
    assert!(err.contains("not compatible"), "{err}");
}

#[test]
fn ternary_selects_active_arm() {
    let (session, _dir) = load("let x = (true ? 1 : 2)\nlet y = (false ? 1 : 2)\n");
    assert_eq!(root_value(&session, "x"), Value::Int(1));
    assert_eq!(root_value(&session, "y"), Value::Int(2));
}

#[test]
fn ternary_inactive_arm_still_type_checks() {
    let err = load_err("let x = (true ? 1 : \"two\")\n");
    assert!(err.contains("same type"), "{err}");
}

#[test]
fn boolean_operators_do_not_short_circuit() {
    // both operands are evaluated; a zero divide on the right raises even
    // though the left side already decides the result
    let err = load_err("let b = false && (1/0 == 1)\n");
    assert!(err.contains("division by zero"), "{err}");
}

// ---------------------------------------------------------------------
// assignments

#[test]
fn compound_assignment_on_lists_mutates_in_place() {
    let (session, _dir) = load(
        "var l : string[] = [ \"a\" \"b\" \"c\" ]\n\
         l += \"d\"\n\
         l -= [ \"b\" ]\n\
         l *= [ \"a\" \"c\" \"d\" \"x\" ]\n",
    );
    let l = root_value(&session, "l");
    assert_eq!(string_items(&session, &l), vec!["a", "c", "d"]);
}

#[test]
fn let_is_immutable() {
    let err = load_err("let x = 1\nx = 2\n");
    assert!(err.contains("immutable"), "{err}");
}

#[test]
fn numeric_compound_assignment() {
    let (session, _dir) = load("var n = 10\nn += 4\nn -= 2\nn *= 3\n");
    assert_eq!(root_value(&session, "n"), Value::Int(36));
}

// ---------------------------------------------------------------------
// enums and classes

#[test]
fn enum_declaration_and_default() {
    let (session, _dir) = load(
        "type Color = (`red `green `blue)\n\
         let c : Color = `green\n\
         let is_green = c == `green\n",
    );
    assert_eq!(root_value(&session, "c"), Value::Symbol("green".to_string()));
    assert_eq!(root_value(&session, "is_green"), Value::Bool(true));
}

#[test]
fn enum_rejects_foreign_symbol() {
    let err = load_err("type Color = (`red `green)\nlet c : Color = `cyan\n");
    assert!(err.contains("not compatible"), "{err}");
}

#[test]
fn class_with_inheritance_and_constructor() {
    let (session, _dir) = load(
        "type Base = class { flags : string[] }\n\
         type Derived = class (Base) { level : int }\n\
         let d : Derived = { .flags += \"x\"  .level = 3 }\n\
         let lv = d.level\n",
    );
    assert_eq!(root_value(&session, "lv"), Value::Int(3));
    let d = root_value(&session, "d");
    let Value::Inst(inst) = d else { panic!("expected instance") };
    let flags = session.world.inst(inst).get("flags").cloned().expect("field");
    assert_eq!(string_items(&session, &flags), vec!["x"]);
}

#[test]
fn class_field_of_class_type_is_rejected() {
    let err = load_err("type A = class { x : int }\ntype B = class { a : A }\n");
    assert!(err.contains("fields cannot be of class type"), "{err}");
}

#[test]
fn constructor_fields_get_type_defaults() {
    let (session, _dir) = load(
        "type Cfg = (`debug `release)\n\
         type T = class { n : int; s : string; p : path; mode : Cfg }\n\
         let t : T = { }\n\
         let n = t.n\nlet s = t.s\nlet p = t.p\nlet mode = t.mode\n",
    );
    assert_eq!(root_value(&session, "n"), Value::Int(0));
    assert_eq!(root_value(&session, "s"), Value::Str(String::new()));
    assert_eq!(root_value(&session, "p"), Value::Path(".".to_string()));
    assert_eq!(root_value(&session, "mode"), Value::Symbol("debug".to_string()));
}

// ---------------------------------------------------------------------
// macros

#[test]
fn macro_expansion_with_ident_concat() {
    let (session, _dir) = load(
        "define id(x) { let x&_v : int = 1 }\n\
         id(foo)\n",
    );
    assert_eq!(root_value(&session, "foo_v"), Value::Int(1));
}

#[test]
fn macro_arguments_substitute_expressions() {
    let (session, _dir) = load(
        "define mk(name, value) { let name : int = value + 1 }\n\
         mk(a, 41)\n\
         mk(b, a)\n",
    );
    assert_eq!(root_value(&session, "a"), Value::Int(42));
    assert_eq!(root_value(&session, "b"), Value::Int(43));
}

#[test]
fn macro_argument_count_is_checked() {
    let err = load_err("define two(a, b) { let a : int = b }\ntwo(1)\n");
    assert!(err.contains("number of actual"), "{err}");
}

#[test]
fn macro_error_reports_instantiation_site() {
    let err = load_err("define bad() { let x : int = nosuch }\nbad()\n");
    assert!(err.contains("instantiated from here"), "{err}");
}

#[test]
fn skipped_macro_call_expands_nothing() {
    let (session, _dir) = load(
        "define mk(name) { let name : int = 1 }\n\
         if false then mk(ghost) end\n\
         let done = true\n",
    );
    assert_eq!(root_value(&session, "done"), Value::Bool(true));
    assert_eq!(root_value(&session, "ghost"), Value::Nil);
}

// ---------------------------------------------------------------------
// parameters

#[test]
fn param_overridden_from_outside() {
    let (result, session, _dir) = try_load(
        &[("BUSY", "param level : int = 1\nlet doubled = level * 2\n")],
        &[("level", "21")],
    );
    result.expect("parse succeeds");
    assert_eq!(root_value(&session, "doubled"), Value::Int(42));
}

#[test]
fn param_type_mismatch_is_fatal() {
    let (result, _, _) = try_load(&[("BUSY", "param level : int = 1\n")], &[("level", "high")]);
    let err = result.expect_err("incompatible").to_string();
    assert!(err.contains("incompatible"), "{err}");
}

#[test]
fn unused_parameter_is_fatal() {
    let (result, _, _) = try_load(&[("BUSY", "let x = 1\n")], &[("nosuch", "1")]);
    let err = result.expect_err("unused parameter").to_string();
    assert!(err.contains("cannot set unknown parameter"), "{err}");
}

#[test]
fn param_table_empty_after_successful_parse() {
    let (result, session, _dir) = try_load(&[("BUSY", "param p : bool = false\n")], &[("p", "true")]);
    result.expect("parse succeeds");
    assert!(session.params.is_empty());
    assert_eq!(root_value(&session, "p"), Value::Bool(true));
}

#[test]
fn param_reaches_submodule_by_dotted_name() {
    let (result, session, _dir) = try_load(
        &[
            ("BUSY", "submod sub * = ./sub\nlet v = sub.exported\n"),
            ("sub/BUSY", "param p : int = 0\nlet exported * = p\n"),
        ],
        &[("sub.p", "7")],
    );
    result.expect("parse succeeds");
    assert_eq!(root_value(&session, "v"), Value::Int(7));
}

#[test]
fn param_behind_private_submodule_is_unreachable() {
    let (result, _, _) = try_load(
        &[("BUSY", "submod sub = ./sub\n"), ("sub/BUSY", "param p : int = 0\n")],
        &[("sub.p", "7")],
    );
    let err = result.expect_err("inaccessible").to_string();
    assert!(err.contains("not visible from the root directory"), "{err}");
}

#[test]
fn submodule_bindings_seed_parameters() {
    let (result, session, _dir) = try_load(
        &[
            ("BUSY", "submod sub * = ./sub (p = 5, q)\nlet v = sub.exported\nlet w = sub.flag\n"),
            ("sub/BUSY", "param p : int = 0\nparam q : bool = false\nlet exported * = p\nlet flag * = q\n"),
        ],
        &[],
    );
    result.expect("parse succeeds");
    assert_eq!(root_value(&session, "v"), Value::Int(5));
    assert_eq!(root_value(&session, "w"), Value::Bool(true));
}

#[test]
fn outer_parameter_value_shadows_binding() {
    let (result, session, _dir) = try_load(
        &[
            ("BUSY", "submod sub * = ./sub (p = 5)\nlet v = sub.exported\n"),
            ("sub/BUSY", "param p : int = 0\nlet exported * = p\n"),
        ],
        &[("sub.p", "9")],
    );
    result.expect("parse succeeds");
    assert_eq!(root_value(&session, "v"), Value::Int(9));
}

// ---------------------------------------------------------------------
// submodules and visibility

#[test]
fn submodule_members_resolve_through_dots() {
    let (result, session, _dir) = try_load(
        &[
            ("BUSY", "submod sub * = ./sub\nlet v = sub.answer\n"),
            ("sub/BUSY", "let answer * : int = 42\n"),
        ],
        &[],
    );
    result.expect("parse succeeds");
    assert_eq!(root_value(&session, "v"), Value::Int(42));
}

#[test]
fn private_member_is_not_visible_across_modules() {
    let (result, _, _) = try_load(
        &[("BUSY", "submod sub * = ./sub\nlet v = sub.answer\n"), ("sub/BUSY", "let answer : int = 42\n")],
        &[],
    );
    let err = result.expect_err("private member").to_string();
    assert!(err.contains("not visible"), "{err}");
}

#[test]
fn outer_scope_reachable_with_hat() {
    let (result, session, _dir) = try_load(
        &[
            ("BUSY", "let base * : int = 40\nsubmod sub * = ./sub\nlet v = sub.derived\n"),
            ("sub/BUSY", "let derived * = ^base + 2\n"),
        ],
        &[],
    );
    result.expect("parse succeeds");
    assert_eq!(root_value(&session, "v"), Value::Int(42));
}

#[test]
fn recursive_submodule_include_is_detected() {
    let err = load_err("submod self = .\n");
    assert!(err.contains("same directory as current or outer module"), "{err}");
}

#[test]
fn missing_busy_without_fallback_is_fatal() {
    let (result, _, _) = try_load(&[("BUSY", "submod sub = ./nowhere\n")], &[]);
    let err = result.expect_err("missing BUSY").to_string();
    assert!(err.contains("cannot open file for reading"), "{err}");
}

#[test]
fn else_fallback_path_is_probed() {
    let (result, session, _dir) = try_load(
        &[
            ("BUSY", "submod sub * = ./nowhere else ./alt/OTHER\nlet v = sub.answer\n"),
            ("alt/OTHER", "let answer * : int = 7\n"),
        ],
        &[],
    );
    result.expect("parse succeeds");
    assert_eq!(root_value(&session, "v"), Value::Int(7));
}

// ---------------------------------------------------------------------
// built-in procedures

#[test]
fn conversions() {
    let (session, _dir) = load(
        "let i = toint(3.9)\n\
         let r = toreal(2)\n\
         let s = tostring(true)\n\
         let n = tostring(42)\n\
         let p = topath(\"src/x\")\n",
    );
    assert_eq!(root_value(&session, "i"), Value::Int(3));
    assert_eq!(root_value(&session, "r"), Value::Real(2.0));
    assert_eq!(root_value(&session, "s"), Value::Str("true".to_string()));
    assert_eq!(root_value(&session, "n"), Value::Str("42".to_string()));
    assert_eq!(root_value(&session, "p"), Value::Path("./src/x".to_string()));
}

#[test]
fn error_builtin_is_fatal() {
    let err = load_err("error(\"boom: \", \"detail\")\n");
    assert!(err.contains("boom: detail"), "{err}");
}

#[test]
fn readstring_normalizes_whitespace_and_escapes() {
    let (result, session, _dir) = try_load(
        &[("BUSY", "let s = readstring(./data.txt)\n"), ("data.txt", "  line \"one\"\nline\\two  \n")],
        &[],
    );
    result.expect("parse succeeds");
    assert_eq!(
        root_value(&session, "s"),
        Value::Str("line \\\"one\\\" line\\\\two".to_string())
    );
}

#[test]
fn readstring_in_dead_branch_reads_nothing() {
    // the file does not exist; skip mode must not try to open it
    let (session, _dir) = load("if false then let s = readstring(./missing.txt) end\nlet ok = true\n");
    assert_eq!(root_value(&session, "ok"), Value::Bool(true));
}

#[test]
fn abspath_and_relpath_report_module_dirs() {
    let (result, session, dir) = try_load(
        &[
            ("BUSY", "submod sub * = ./sub\nlet a = abspath()\nlet r = relpath(sub)\nlet s = abspath(sub, ./x)\n"),
            ("sub/BUSY", "let unused = 1\n"),
        ],
        &[],
    );
    result.expect("parse succeeds");
    let base = format!("//{}", dir.path().to_str().unwrap().trim_start_matches('/'));
    assert_eq!(root_value(&session, "a"), Value::Path(base.clone()));
    assert_eq!(root_value(&session, "r"), Value::Path("./sub".to_string()));
    assert_eq!(root_value(&session, "s"), Value::Path(format!("{base}/sub/x")));
}

#[test]
fn build_dir_joins_root_and_rdir() {
    let (result, session, dir) = try_load(
        &[("BUSY", "submod sub * = ./sub\n"), ("sub/BUSY", "let d * = build_dir()\n")],
        &[],
    );
    result.expect("parse succeeds");
    let root = session.root().unwrap();
    let sub = session.world.scope_get(root, "sub").unwrap();
    let sub_inst = session.world.decl(sub).module().unwrap().inst.unwrap();
    let d = session.world.inst(sub_inst).get("d").cloned().unwrap();
    let expected = format!("//{}/out/sub", dir.path().to_str().unwrap().trim_start_matches('/'));
    assert_eq!(d, Value::Path(expected));
}
