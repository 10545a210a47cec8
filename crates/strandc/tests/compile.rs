//! End-to-end compilation over on-disk module trees.

use std::path::Path;

use serde_json::{json, Value};

use strandc::compile::{compile, CompileErrorKind};
use strandc::modfile::{parse_module_json, DURABLE_TAG, STRAND_AST_SCHEMA_VERSION};
use strandc::project::PROJECT_SCHEMA_VERSION;

fn write_manifest(root: &Path) {
    let manifest = json!({
        "schema_version": PROJECT_SCHEMA_VERSION,
        "module": "demo",
        "roots": ["."],
    });
    std::fs::write(root.join("strand.json"), manifest.to_string()).unwrap();
}

fn write_module(root: &Path, rel: &str, module_id: &str, imports: Value, decls: Value) {
    let doc = json!({
        "schema_version": STRAND_AST_SCHEMA_VERSION,
        "module_id": module_id,
        "imports": imports,
        "tags": [],
        "decls": decls,
    });
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, doc.to_string()).unwrap();
}

fn counter_decls() -> Value {
    json!([{
        "kind": "defn",
        "name": "main.counter",
        "params": [{"name": "n", "ty": "i64"}],
        "result": "unit",
        "body": [
            ["for", ["var", "i", "i64", 0], ["<", "i", "n"], ["set", "i", ["+", "i", 1]],
                ["block", ["strand.yield", "i"]]]
        ]
    }])
}

#[test]
fn emits_a_durable_sibling_guarded_by_the_build_tag() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_manifest(root);
    write_module(root, "main.strand.json", "main", json!(["strand"]), counter_decls());

    let report = compile(root.to_str().unwrap()).unwrap();
    assert_eq!(report.colored_functions, 1);

    let gen_path = root.join("main_durable.strand.json");
    assert!(gen_path.is_file(), "missing {}", gen_path.display());
    let gen = parse_module_json(&std::fs::read_to_string(&gen_path).unwrap()).unwrap();
    assert!(gen.tags.iter().any(|t| t == DURABLE_TAG));
    assert!(gen.imports_module("strand"));

    // The rewritten module carries the synthesized frame struct and the
    // non-inlinable rewritten procedure.
    let func = gen.funcs().find(|f| f.name == "main.counter").unwrap();
    assert!(func.attrs.iter().any(|a| a == "noinline"));
    let gen_src = std::fs::read_to_string(&gen_path).unwrap();
    assert!(gen_src.contains("main.counter_Frame0"), "no frame struct in output");
    assert!(gen_src.contains("strand.load_context"), "no context load in output");

    // The original is re-emitted without the durable tag.
    let orig = parse_module_json(&std::fs::read_to_string(root.join("main.strand.json")).unwrap())
        .unwrap();
    assert!(orig.tags.is_empty());
    assert_eq!(orig.funcs().count(), 1);
}

#[test]
fn no_strand_import_means_nothing_to_do() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_manifest(root);
    write_module(
        root,
        "main.strand.json",
        "main",
        json!([]),
        json!([{
            "kind": "defn", "name": "main.id", "params": [{"name": "x", "ty": "i64"}],
            "result": "i64", "body": [["return", "x"]]
        }]),
    );

    let report = compile(root.to_str().unwrap()).unwrap();
    assert!(report.written.is_empty());
    assert!(!root.join("main_durable.strand.json").exists());
}

#[test]
fn s6_mixed_yield_types_produce_no_output_files() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_manifest(root);
    write_module(
        root,
        "main.strand.json",
        "main",
        json!(["strand"]),
        json!([
            {
                "kind": "defn", "name": "main.ints", "params": [], "result": "unit",
                "body": [["tapp", "strand.yield", ["i64", "i64"], 1]]
            },
            {
                "kind": "defn", "name": "main.strs", "params": [], "result": "unit",
                "body": [["tapp", "strand.yield", ["str", "str"], ["str", "x"]]]
            },
            {
                "kind": "defn", "name": "main.both", "params": [], "result": "unit",
                "body": [["main.ints"], ["main.strs"]]
            }
        ]),
    );

    let err = compile(root.to_str().unwrap()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::MixedYieldTypes);
    assert!(!root.join("main_durable.strand.json").exists());
}

#[test]
fn builtin_std_modules_are_vendored_into_stdroot_before_mutation() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_manifest(root);
    write_module(
        root,
        "main.strand.json",
        "main",
        json!(["strand", "std.iter"]),
        json!([{
            "kind": "defn", "name": "main.run", "params": [{"name": "xs", "ty": ["slice", "i64"]}],
            "result": "unit",
            "body": [["std.iter.emit_all", "xs"]]
        }]),
    );

    compile(root.to_str().unwrap()).unwrap();

    let vendored = root.join("stdroot/std/iter.strand.json");
    assert!(vendored.is_file(), "std.iter was not vendored");
    let vendored_durable = root.join("stdroot/std/iter_durable.strand.json");
    assert!(vendored_durable.is_file(), "vendored std.iter was not compiled");
    assert!(root.join("main_durable.strand.json").is_file());
}

#[test]
fn recursive_patterns_compile_nested_packages() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_manifest(root);
    write_module(root, "app/main.strand.json", "app.main", json!(["strand"]), json!([{
        "kind": "defn",
        "name": "app.main.gen",
        "params": [],
        "result": "unit",
        "body": [["strand.yield", 1]]
    }]));

    let pattern = format!("{}/...", root.display());
    compile(&pattern).unwrap();
    assert!(root.join("app/main_durable.strand.json").is_file());
}

#[test]
fn conflicting_import_aliases_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_manifest(root);
    // The alias "strand" collides with the import the rewriter has to
    // synthesize for the runtime intrinsics.
    write_module(
        root,
        "std/iter.strand.json",
        "std.iter",
        json!(["strand"]),
        json!([{
            "kind": "defn", "name": "std.iter.noop", "params": [], "result": "unit",
            "body": []
        }]),
    );
    write_module(
        root,
        "main.strand.json",
        "main",
        json!([{"module": "std.iter", "as": "strand"}, "strand"]),
        counter_decls(),
    );

    let err = compile(root.to_str().unwrap()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::ConflictingImport);
}

#[test]
fn modules_outside_the_project_are_rejected_as_unvendored() {
    let outside = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_manifest(root);

    // A colored module resolved through a root that points outside the
    // project tree cannot be mutated safely.
    let manifest = json!({
        "schema_version": PROJECT_SCHEMA_VERSION,
        "module": "demo",
        "roots": [".", outside.path().to_str().unwrap()],
    });
    std::fs::write(root.join("strand.json"), manifest.to_string()).unwrap();

    write_module(
        outside.path(),
        "lib.strand.json",
        "lib",
        json!(["strand"]),
        json!([{
            "kind": "defn", "name": "lib.gen", "params": [], "result": "unit",
            "body": [["strand.yield", 9]]
        }]),
    );
    write_module(
        root,
        "main.strand.json",
        "main",
        json!(["strand", "lib"]),
        json!([{
            "kind": "defn", "name": "main.run", "params": [], "result": "unit",
            "body": [["lib.gen"]]
        }]),
    );

    let err = compile(root.to_str().unwrap()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Unvendored);
}
