//! Strand module documents.
//!
//! A module is a JSON file: a schema-versioned header (`module_id`,
//! `imports`, `tags`) and a list of declarations whose function bodies are
//! S-expression statement arrays. `to_value` is lossless over everything
//! the compiler preserves, so re-emitting an unchanged module is a
//! canonical rewrite of the same program.

use serde_json::{json, Map, Value};

use crate::ast::{expr_from_json, expr_to_value, Expr};
use crate::types::Ty;

pub const STRAND_AST_SCHEMA_VERSION: &str = "strand.ast@0.1.0";

/// Build tag carried by generated files; stripped from re-emitted
/// originals.
pub const DURABLE_TAG: &str = "durable";

/// The coroutine library module; its import marks a module as eligible for
/// compilation.
pub const STRAND_MODULE: &str = "strand";

/// Suffix appended to a source file's stem for the rewritten output.
pub const DURABLE_SUFFIX: &str = "_durable";

/// File extension of Strand modules.
pub const MODULE_EXT: &str = ".strand.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub alias: Option<String>,
}

impl Import {
    /// The name this import binds in the module's scope.
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.module)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub result: Ty,
    pub body: Vec<Expr>,
    pub attrs: Vec<String>,
    pub ptr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Func(FuncDecl),
    Struct(StructDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleFile {
    pub schema_version: String,
    pub module_id: String,
    pub imports: Vec<Import>,
    pub tags: Vec<String>,
    pub decls: Vec<Decl>,
}

impl ModuleFile {
    pub fn imports_module(&self, id: &str) -> bool {
        self.imports.iter().any(|i| i.module == id)
    }

    pub fn funcs(&self) -> impl Iterator<Item = &FuncDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Func(f) => Some(f),
            Decl::Struct(_) => None,
        })
    }
}

fn field_str(obj: &Map<String, Value>, key: &str, ptr: &str) -> Result<String, String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("{ptr}: missing or non-string {key:?}"))
}

fn parse_params(v: Option<&Value>, ptr: &str) -> Result<Vec<Param>, String> {
    let mut out = Vec::new();
    let Some(items) = v.and_then(Value::as_array) else {
        return Ok(out);
    };
    for (i, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| format!("{ptr}/{i}: parameter must be an object"))?;
        let name = field_str(obj, "name", &format!("{ptr}/{i}"))?;
        let ty_val = obj
            .get("ty")
            .ok_or_else(|| format!("{ptr}/{i}: missing \"ty\""))?;
        let ty_expr = expr_from_json(ty_val, &format!("{ptr}/{i}/ty"))?;
        let ty = Ty::parse(&ty_expr)?;
        out.push(Param { name, ty });
    }
    Ok(out)
}

pub fn parse_module_json(src: &str) -> Result<ModuleFile, String> {
    let doc: Value = serde_json::from_str(src).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = doc
        .as_object()
        .ok_or_else(|| "module document must be a JSON object".to_string())?;

    let schema_version = field_str(obj, "schema_version", "")?;
    if schema_version != STRAND_AST_SCHEMA_VERSION {
        return Err(format!(
            "unsupported schema_version {schema_version:?} (expected {STRAND_AST_SCHEMA_VERSION:?})"
        ));
    }
    let module_id = field_str(obj, "module_id", "")?;

    let mut imports = Vec::new();
    if let Some(items) = obj.get("imports").and_then(Value::as_array) {
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::String(s) => imports.push(Import {
                    module: s.clone(),
                    alias: None,
                }),
                Value::Object(o) => imports.push(Import {
                    module: field_str(o, "module", &format!("/imports/{i}"))?,
                    alias: o.get("as").and_then(Value::as_str).map(str::to_string),
                }),
                _ => return Err(format!("/imports/{i}: import must be a string or object")),
            }
        }
    }

    let mut tags = Vec::new();
    if let Some(items) = obj.get("tags").and_then(Value::as_array) {
        for item in items {
            if let Some(s) = item.as_str() {
                tags.push(s.to_string());
            }
        }
    }

    let mut decls = Vec::new();
    if let Some(items) = obj.get("decls").and_then(Value::as_array) {
        for (i, item) in items.iter().enumerate() {
            let ptr = format!("/decls/{i}");
            let o = item
                .as_object()
                .ok_or_else(|| format!("{ptr}: declaration must be an object"))?;
            match field_str(o, "kind", &ptr)?.as_str() {
                "defn" => {
                    let name = field_str(o, "name", &ptr)?;
                    let params = parse_params(o.get("params"), &format!("{ptr}/params"))?;
                    let result = match o.get("result") {
                        None => Ty::Unit,
                        Some(v) => Ty::parse(&expr_from_json(v, &format!("{ptr}/result"))?)?,
                    };
                    let mut body = Vec::new();
                    if let Some(stmts) = o.get("body").and_then(Value::as_array) {
                        for (j, stmt) in stmts.iter().enumerate() {
                            body.push(expr_from_json(stmt, &format!("{ptr}/body/{j}"))?);
                        }
                    }
                    let mut attrs = Vec::new();
                    if let Some(a) = o.get("attrs").and_then(Value::as_array) {
                        for item in a {
                            if let Some(s) = item.as_str() {
                                attrs.push(s.to_string());
                            }
                        }
                    }
                    decls.push(Decl::Func(FuncDecl {
                        name,
                        params,
                        result,
                        body,
                        attrs,
                        ptr,
                    }));
                }
                "struct" => {
                    let name = field_str(o, "name", &ptr)?;
                    let fields = parse_params(o.get("fields"), &format!("{ptr}/fields"))?;
                    decls.push(Decl::Struct(StructDecl { name, fields }));
                }
                kind => return Err(format!("{ptr}: unknown declaration kind {kind:?}")),
            }
        }
    }

    Ok(ModuleFile {
        schema_version,
        module_id,
        imports,
        tags,
        decls,
    })
}

pub fn module_to_value(m: &ModuleFile) -> Value {
    let imports: Vec<Value> = m
        .imports
        .iter()
        .map(|i| match &i.alias {
            None => Value::from(i.module.as_str()),
            Some(a) => json!({ "module": i.module, "as": a }),
        })
        .collect();

    let decls: Vec<Value> = m
        .decls
        .iter()
        .map(|d| match d {
            Decl::Func(f) => {
                let params: Vec<Value> = f
                    .params
                    .iter()
                    .map(|p| json!({ "name": p.name, "ty": expr_to_value(&p.ty.to_expr()) }))
                    .collect();
                let body: Vec<Value> = f.body.iter().map(expr_to_value).collect();
                let mut obj = json!({
                    "kind": "defn",
                    "name": f.name,
                    "params": params,
                    "result": expr_to_value(&f.result.to_expr()),
                    "body": body,
                });
                if !f.attrs.is_empty() {
                    obj["attrs"] = Value::from(f.attrs.clone());
                }
                obj
            }
            Decl::Struct(s) => {
                let fields: Vec<Value> = s
                    .fields
                    .iter()
                    .map(|p| json!({ "name": p.name, "ty": expr_to_value(&p.ty.to_expr()) }))
                    .collect();
                json!({ "kind": "struct", "name": s.name, "fields": fields })
            }
        })
        .collect();

    json!({
        "schema_version": m.schema_version,
        "module_id": m.module_id,
        "imports": imports,
        "tags": m.tags,
        "decls": decls,
    })
}

pub fn module_to_string(m: &ModuleFile) -> String {
    let mut out = serde_json::to_string_pretty(&module_to_value(m))
        .expect("module document serializes to JSON");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> String {
        json!({
            "schema_version": STRAND_AST_SCHEMA_VERSION,
            "module_id": "main",
            "imports": ["strand", {"module": "std.iter", "as": "it"}],
            "tags": [],
            "decls": [
                {
                    "kind": "defn",
                    "name": "main.counter",
                    "params": [{"name": "n", "ty": "i64"}],
                    "result": "unit",
                    "body": [
                        ["for", ["var", "i", "i64", 0], ["<", "i", "n"], ["set", "i", ["+", "i", 1]],
                            ["block", ["strand.yield", "i"]]]
                    ]
                },
                {
                    "kind": "struct",
                    "name": "main.Point",
                    "fields": [{"name": "x", "ty": "i64"}, {"name": "y", "ty": "i64"}]
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn parses_and_re_emits_losslessly() {
        let m = parse_module_json(&sample()).unwrap();
        assert_eq!(m.module_id, "main");
        assert!(m.imports_module(STRAND_MODULE));
        assert_eq!(m.imports[1].local_name(), "it");
        assert_eq!(m.funcs().count(), 1);

        let m2 = parse_module_json(&module_to_string(&m)).unwrap();
        assert_eq!(m, m2);
    }

    #[test]
    fn rejects_unknown_schema() {
        let src = sample().replace(STRAND_AST_SCHEMA_VERSION, "strand.ast@9.9.9");
        assert!(parse_module_json(&src).is_err());
    }

    #[test]
    fn body_pointers_track_document_positions() {
        let m = parse_module_json(&sample()).unwrap();
        let f = m.funcs().next().unwrap();
        assert_eq!(f.body[0].ptr(), "/decls/0/body/0");
    }
}
