//! Builtin modules shipped with the compiler.
//!
//! `strand` itself is header-only: its operations (the yield primitive and
//! the runtime intrinsics emitted by the rewriter) are typed intrinsically
//! by the checker. `std.iter` is ordinary Strand source; when its
//! procedures end up colored they are vendored into the project's
//! `stdroot/` directory before mutation.

pub fn builtin_module_source(module_id: &str) -> Option<&'static str> {
    match module_id {
        "strand" => Some(
            r#"{
  "schema_version": "strand.ast@0.1.0",
  "module_id": "strand",
  "imports": [],
  "tags": [],
  "decls": []
}
"#,
        ),
        "std.iter" => Some(
            r#"{
  "schema_version": "strand.ast@0.1.0",
  "module_id": "std.iter",
  "imports": ["strand"],
  "tags": [],
  "decls": [
    {
      "kind": "defn",
      "name": "std.iter.emit_all",
      "params": [{"name": "xs", "ty": ["slice", "i64"]}],
      "result": "unit",
      "body": [
        ["range", "_", "x", "xs", ["block", ["strand.yield", "x"]]]
      ]
    },
    {
      "kind": "defn",
      "name": "std.iter.emit_range",
      "params": [{"name": "lo", "ty": "i64"}, {"name": "hi", "ty": "i64"}],
      "result": "unit",
      "body": [
        ["for", ["var", "i", "i64", "lo"], ["<", "i", "hi"], ["set", "i", ["+", "i", 1]],
          ["block", ["strand.yield", "i"]]]
      ]
    }
  ]
}
"#,
        ),
        _ => None,
    }
}

/// Names of the runtime intrinsics the rewriter emits. They live in the
/// `strand` module's namespace and are never user-callable source
/// constructs except for `strand.yield`.
pub const YIELD: &str = "strand.yield";
pub const LOAD_CONTEXT: &str = "strand.load_context";
pub const PUSH: &str = "strand.push";
pub const POP: &str = "strand.pop";
pub const UNWINDING: &str = "strand.unwinding";
pub const DEFER: &str = "strand.defer";
