//! Frame extraction: declaration hoisting, shadow-free renaming, and the
//! synthesized frame struct.
//!
//! Types, constants and variables can be declared in any scope of a
//! procedure and can shadow earlier declarations. The dispatch rewrite
//! introduces new scopes, which would change what a declaration is visible
//! to, so every declaration is lifted into a single frame record under a
//! unique name and every reference is rewritten into a frame field access.
//! Inline declarations downgrade to assignments; constants are hoisted and
//! re-assigned in the prologue. Function literals keep their own
//! declarations (they have their own frames when colored), but their free
//! references into the enclosing procedure still resolve through the frame.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{ident, list, Expr};
use crate::compile::{CompileErrorKind, CompilerError};
use crate::modfile::{Param, StructDecl};
use crate::types::Ty;

pub struct Extraction {
    pub frame_struct: StructDecl,
    pub frame_init: Expr,
    /// Prologue assignments for hoisted constant declarations.
    pub const_inits: Vec<Expr>,
    pub body: Vec<Expr>,
}

#[derive(Clone)]
enum Binding {
    /// Hoisted into the frame under a unique field name.
    Frame(String),
    /// Declared inside a function literal; stays where it is.
    Local,
}

pub fn extract_decls(
    params: &[Param],
    body: Vec<Expr>,
    frame_name: &str,
    struct_name: &str,
) -> Result<Extraction, CompilerError> {
    let mut x = Extractor {
        frame: frame_name.to_string(),
        fields: Vec::new(),
        used: ["ip", "resume", "deferred"]
            .into_iter()
            .map(str::to_string)
            .collect(),
        scopes: vec![BTreeMap::new()],
        const_inits: Vec::new(),
        literal_depth: 0,
    };
    x.used.insert(frame_name.to_string());
    x.used.insert("_c".to_string());

    let mut init_fields = Vec::new();
    for p in params {
        let unique = x.declare(&p.name, p.ty.clone());
        init_fields.push(list(vec![ident(unique), ident(p.name.clone())]));
    }

    let body = x.rewrite_stmts(body)?;

    let mut init = vec![ident("struct-lit"), ident(struct_name)];
    init.extend(init_fields);

    Ok(Extraction {
        frame_struct: StructDecl {
            name: struct_name.to_string(),
            fields: x.fields,
        },
        frame_init: list(init),
        const_inits: x.const_inits,
        body,
    })
}

struct Extractor {
    frame: String,
    fields: Vec<Param>,
    used: BTreeSet<String>,
    scopes: Vec<BTreeMap<String, Binding>>,
    const_inits: Vec<Expr>,
    literal_depth: usize,
}

impl Extractor {
    fn unique_name(&mut self, name: &str) -> String {
        let mut candidate = name.to_string();
        let mut k = 1;
        while self.used.contains(&candidate) {
            candidate = format!("{name}{k}");
            k += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }

    /// Binds `name` in the current scope as a frame field, returning the
    /// shadow-free field name.
    fn declare(&mut self, name: &str, ty: Ty) -> String {
        let unique = self.unique_name(name);
        self.fields.push(Param {
            name: unique.clone(),
            ty,
        });
        self.bind(name, Binding::Frame(unique.clone()));
        unique
    }

    fn bind(&mut self, name: &str, b: Binding) {
        if name == "_" {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), b);
        }
    }

    fn resolve(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn field_ref(&self, unique: &str) -> Expr {
        list(vec![
            ident("field"),
            ident(self.frame.clone()),
            ident(unique),
        ])
    }

    fn rewrite_stmts(&mut self, stmts: Vec<Expr>) -> Result<Vec<Expr>, CompilerError> {
        let mut out = Vec::with_capacity(stmts.len());
        for s in stmts {
            if let Some(s) = self.rewrite_stmt(s)? {
                out.push(s);
            }
        }
        Ok(out)
    }

    fn rewrite_block(&mut self, e: Expr) -> Result<Expr, CompilerError> {
        match e {
            Expr::List { items, ptr } if items.first().and_then(Expr::as_ident) == Some("block") => {
                self.scopes.push(BTreeMap::new());
                let rest = self.rewrite_stmts(items.into_iter().skip(1).collect())?;
                self.scopes.pop();
                let mut out = vec![ident("block")];
                out.extend(rest);
                Ok(Expr::List { items: out, ptr })
            }
            other => match self.rewrite_stmt(other)? {
                Some(s) => Ok(s),
                None => Ok(crate::ast::block(Vec::new())),
            },
        }
    }

    fn rewrite_stmt(&mut self, stmt: Expr) -> Result<Option<Expr>, CompilerError> {
        let head = stmt.head().map(str::to_string);
        let (mut items, ptr) = match stmt {
            Expr::List { items, ptr } => (items, ptr),
            other => return Ok(Some(other)),
        };
        match head.as_deref() {
            Some("var") if items.len() >= 3 => {
                let init = if items.len() > 3 {
                    Some(self.rewrite_expr(items.remove(3))?)
                } else {
                    None
                };
                let ty = Ty::parse(&items[2]).map_err(internal)?;
                let name = items[1].as_ident().unwrap_or("_").to_string();
                if self.literal_depth > 0 {
                    self.bind(&name, Binding::Local);
                    let mut out = vec![ident("var"), ident(name), items.remove(2)];
                    if let Some(init) = init {
                        out.push(init);
                    }
                    return Ok(Some(list(out)));
                }
                let unique = self.declare(&name, ty.clone());
                let value = init.unwrap_or_else(|| ty.zero_expr());
                Ok(Some(list(vec![
                    ident("set"),
                    self.field_ref(&unique),
                    value,
                ])))
            }
            Some("const") if items.len() >= 4 => {
                let value = self.rewrite_expr(items.remove(3))?;
                let ty = Ty::parse(&items[2]).map_err(internal)?;
                let name = items[1].as_ident().unwrap_or("_").to_string();
                if self.literal_depth > 0 {
                    self.bind(&name, Binding::Local);
                    let out = vec![ident("const"), ident(name), items.remove(2), value];
                    return Ok(Some(list(out)));
                }
                let unique = self.declare(&name, ty);
                let assign = list(vec![ident("set"), self.field_ref(&unique), value]);
                self.const_inits.push(assign);
                Ok(None)
            }
            Some("set") if items.len() == 3 => {
                let rhs = self.rewrite_expr(items.remove(2))?;
                let lhs = self.rewrite_expr(items.remove(1))?;
                Ok(Some(list(vec![ident("set"), lhs, rhs])))
            }
            Some("if") if items.len() == 4 => {
                let els = items.remove(3);
                let then = items.remove(2);
                let cond = self.rewrite_expr(items.remove(1))?;
                let then = self.rewrite_block(then)?;
                let els = if els.is_nil() {
                    els
                } else if els.head() == Some("if") {
                    self.rewrite_stmt(els)?.unwrap_or_else(|| ident("nil"))
                } else {
                    self.rewrite_block(els)?
                };
                Ok(Some(list(vec![ident("if"), cond, then, els])))
            }
            Some("for") if items.len() == 5 => {
                self.scopes.push(BTreeMap::new());
                let body = items.remove(4);
                let post = items.remove(3);
                let cond = items.remove(2);
                let init = items.remove(1);
                let init = match self.pass_through_nil(init)? {
                    Some(e) => e,
                    None => ident("nil"),
                };
                let cond = if cond.is_nil() {
                    cond
                } else {
                    self.rewrite_expr(cond)?
                };
                let post = match self.pass_through_nil(post)? {
                    Some(e) => e,
                    None => ident("nil"),
                };
                let body = self.rewrite_block(body)?;
                self.scopes.pop();
                Ok(Some(list(vec![ident("for"), init, cond, post, body])))
            }
            Some("range") if items.len() == 5 => {
                let body = items.remove(4);
                let subject = self.rewrite_expr(items.remove(3))?;
                let value = items.remove(2);
                let key = items.remove(1);
                self.scopes.push(BTreeMap::new());
                let key = self.rewrite_range_binding(key, &subject, RangeSlot::Key)?;
                let value = self.rewrite_range_binding(value, &subject, RangeSlot::Value)?;
                let body = self.rewrite_block(body)?;
                self.scopes.pop();
                Ok(Some(list(vec![
                    ident("range"),
                    key,
                    value,
                    subject,
                    body,
                ])))
            }
            Some("switch") if items.len() >= 2 => {
                let arms = items.split_off(2);
                let tag = items.remove(1);
                let tag = if tag.is_nil() {
                    tag
                } else {
                    self.rewrite_expr(tag)?
                };
                let mut out = vec![ident("switch"), tag];
                for arm in arms {
                    let arm_head = arm.head().map(str::to_string);
                    let (mut arm_items, arm_ptr) = match arm {
                        Expr::List { items, ptr } => (items, ptr),
                        other => {
                            out.push(other);
                            continue;
                        }
                    };
                    self.scopes.push(BTreeMap::new());
                    match arm_head.as_deref() {
                        Some("case") if arm_items.len() >= 2 => {
                            let body = arm_items.split_off(2);
                            let exprs = arm_items.remove(1);
                            let exprs = match exprs {
                                Expr::List { items, ptr } => {
                                    let mut rewritten = Vec::with_capacity(items.len());
                                    for e in items {
                                        rewritten.push(self.rewrite_expr(e)?);
                                    }
                                    Expr::List {
                                        items: rewritten,
                                        ptr,
                                    }
                                }
                                other => other,
                            };
                            let mut arm_out = vec![ident("case"), exprs];
                            arm_out.extend(self.rewrite_stmts(body)?);
                            out.push(Expr::List {
                                items: arm_out,
                                ptr: arm_ptr,
                            });
                        }
                        Some("default") => {
                            let body = arm_items.split_off(1);
                            let mut arm_out = vec![ident("default")];
                            arm_out.extend(self.rewrite_stmts(body)?);
                            out.push(Expr::List {
                                items: arm_out,
                                ptr: arm_ptr,
                            });
                        }
                        _ => out.push(Expr::List {
                            items: arm_items,
                            ptr: arm_ptr,
                        }),
                    }
                    self.scopes.pop();
                }
                Ok(Some(list(out)))
            }
            Some("label") if items.len() == 3 => {
                let inner = items.remove(2);
                let label = items.remove(1);
                let inner = self.rewrite_stmt(inner)?.unwrap_or_else(|| crate::ast::block(Vec::new()));
                Ok(Some(list(vec![ident("label"), label, inner])))
            }
            Some("break") | Some("continue") => Ok(Some(Expr::List { items, ptr })),
            Some("block") => Ok(Some(self.rewrite_block(Expr::List { items, ptr })?)),
            Some("return") => {
                if items.len() > 1 {
                    let e = self.rewrite_expr(items.remove(1))?;
                    Ok(Some(list(vec![ident("return"), e])))
                } else {
                    Ok(Some(Expr::List { items, ptr }))
                }
            }
            _ => {
                // Expression statement (including rewritten defers).
                Ok(Some(self.rewrite_expr(Expr::List { items, ptr })?))
            }
        }
    }

    fn pass_through_nil(&mut self, e: Expr) -> Result<Option<Expr>, CompilerError> {
        if e.is_nil() {
            return Ok(None);
        }
        self.rewrite_stmt(e)
    }

    /// A hoisted range binding becomes an assignment target on the frame;
    /// bindings inside literals stay local declarations.
    fn rewrite_range_binding(
        &mut self,
        binding: Expr,
        subject: &Expr,
        slot: RangeSlot,
    ) -> Result<Expr, CompilerError> {
        let Some(name) = binding.as_ident() else {
            return Ok(binding);
        };
        if name == "_" || name == "nil" {
            return Ok(binding);
        }
        let name = name.to_string();
        if self.literal_depth > 0 {
            self.bind(&name, Binding::Local);
            return Ok(ident(name));
        }
        let ty = self
            .binding_ty(subject, slot)
            .ok_or_else(|| {
                CompilerError::new(
                    CompileErrorKind::Internal,
                    format!("cannot type range binding {name:?}"),
                )
            })?;
        let unique = self.declare(&name, ty);
        Ok(self.field_ref(&unique))
    }

    fn binding_ty(&self, subject: &Expr, slot: RangeSlot) -> Option<Ty> {
        let field = match subject.head() {
            Some("field") => subject.items()?.get(2)?.as_ident()?,
            _ => subject.as_ident()?,
        };
        let ty = self.fields.iter().find(|p| p.name == field)?.ty.clone();
        match (ty, slot) {
            (Ty::Slice(_), RangeSlot::Key) => Some(Ty::I64),
            (Ty::Slice(elem), RangeSlot::Value) => Some(*elem),
            (Ty::Map(k, _), RangeSlot::Key) => Some(*k),
            (Ty::Map(_, v), RangeSlot::Value) => Some(*v),
            _ => None,
        }
    }

    fn rewrite_expr(&mut self, e: Expr) -> Result<Expr, CompilerError> {
        match e {
            Expr::Ident { ref name, .. } => Ok(match self.resolve(name) {
                Some(Binding::Frame(unique)) => {
                    let unique = unique.clone();
                    self.field_ref(&unique)
                }
                _ => e,
            }),
            Expr::Int { .. } | Expr::Float { .. } => Ok(e),
            Expr::List { items, ptr } => self.rewrite_list(items, ptr),
        }
    }

    fn rewrite_list(&mut self, mut items: Vec<Expr>, ptr: String) -> Result<Expr, CompilerError> {
        let head = items.first().and_then(Expr::as_ident).map(str::to_string);
        match head.as_deref() {
            Some("str") => Ok(Expr::List { items, ptr }),
            Some("field") if items.len() == 3 => {
                let base = self.rewrite_expr(items.remove(1))?;
                items.insert(1, base);
                Ok(Expr::List { items, ptr })
            }
            Some("struct-lit") => {
                let mut out = vec![items.remove(0), items.remove(0)];
                for pair in items {
                    match pair {
                        Expr::List {
                            items: mut kv,
                            ptr: kv_ptr,
                        } if kv.len() == 2 => {
                            let v = self.rewrite_expr(kv.remove(1))?;
                            kv.push(v);
                            out.push(Expr::List {
                                items: kv,
                                ptr: kv_ptr,
                            });
                        }
                        other => out.push(other),
                    }
                }
                Ok(Expr::List { items: out, ptr })
            }
            Some("make") => {
                let mut out = vec![items.remove(0), items.remove(0)];
                for dim in items {
                    out.push(self.rewrite_expr(dim)?);
                }
                Ok(Expr::List { items: out, ptr })
            }
            Some("tapp") if items.len() >= 3 => {
                let mut out = vec![items.remove(0), items.remove(0), items.remove(0)];
                for arg in items {
                    out.push(self.rewrite_expr(arg)?);
                }
                Ok(Expr::List { items: out, ptr })
            }
            Some("fn") if items.len() == 4 => {
                let body = items.remove(3);
                let ret = items.remove(2);
                let params = items.remove(1);
                self.literal_depth += 1;
                self.scopes.push(BTreeMap::new());
                if let Some(pairs) = params.items() {
                    for pair in pairs {
                        if let Some([name, _ty]) = pair.items() {
                            if let Some(n) = name.as_ident() {
                                let n = n.to_string();
                                self.bind(&n, Binding::Local);
                            }
                        }
                    }
                }
                let body = self.rewrite_block(body)?;
                self.scopes.pop();
                self.literal_depth -= 1;
                Ok(list(vec![ident("fn"), params, ret, body]))
            }
            _ => {
                let mut out = Vec::with_capacity(items.len());
                let mut iter = items.into_iter();
                if let Some(first) = iter.next() {
                    // The head of a call resolves like any value: a call
                    // through a hoisted function-typed variable becomes a
                    // call through its frame field.
                    out.push(self.rewrite_expr(first)?);
                }
                for item in iter {
                    out.push(self.rewrite_expr(item)?);
                }
                Ok(Expr::List { items: out, ptr })
            }
        }
    }
}

#[derive(Clone, Copy)]
enum RangeSlot {
    Key,
    Value,
}

fn internal(msg: String) -> CompilerError {
    CompilerError::new(CompileErrorKind::Internal, msg)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ast::{expr_from_json, expr_to_value};

    use super::*;

    fn stmts(v: serde_json::Value) -> Vec<Expr> {
        v.as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, s)| expr_from_json(s, &format!("/body/{i}")).unwrap())
            .collect()
    }

    fn as_json(stmts: &[Expr]) -> serde_json::Value {
        serde_json::Value::Array(stmts.iter().map(expr_to_value).collect())
    }

    fn params(v: serde_json::Value) -> Vec<Param> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|p| Param {
                name: p["name"].as_str().unwrap().to_string(),
                ty: Ty::parse(&expr_from_json(&p["ty"], "").unwrap()).unwrap(),
            })
            .collect()
    }

    #[test]
    fn declarations_become_frame_assignments() {
        let body = stmts(json!([
            ["var", "i", "i64", 0],
            ["set", "i", ["+", "i", 1]]
        ]));
        let x = extract_decls(&params(json!([{"name": "n", "ty": "i64"}])), body, "_f0", "main.f_Frame0").unwrap();

        assert_eq!(
            as_json(&x.body),
            json!([
                ["set", ["field", "_f0", "i"], 0],
                ["set", ["field", "_f0", "i"], ["+", ["field", "_f0", "i"], 1]]
            ])
        );
        let names: Vec<&str> = x.frame_struct.fields.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["n", "i"]);
        assert_eq!(
            expr_to_value(&x.frame_init),
            json!(["struct-lit", "main.f_Frame0", ["n", "n"]])
        );
    }

    #[test]
    fn shadowed_names_get_shadow_free_fields() {
        let body = stmts(json!([
            ["var", "x", "i64", 1],
            ["block",
                ["var", "x", "bool", "true"],
                ["set", "x", "false"]],
            ["set", "x", 2]
        ]));
        let x = extract_decls(&[], body, "_f0", "F").unwrap();

        assert_eq!(
            as_json(&x.body),
            json!([
                ["set", ["field", "_f0", "x"], 1],
                ["block",
                    ["set", ["field", "_f0", "x1"], "true"],
                    ["set", ["field", "_f0", "x1"], "false"]],
                ["set", ["field", "_f0", "x"], 2]
            ])
        );
        let names: Vec<&str> = x.frame_struct.fields.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["x", "x1"]);
    }

    #[test]
    fn constants_hoist_into_the_prologue() {
        let body = stmts(json!([
            ["const", "limit", "i64", 10],
            ["set", "limit", "limit"]
        ]));
        let x = extract_decls(&[], body, "_f0", "F").unwrap();
        assert_eq!(
            as_json(&x.const_inits),
            json!([["set", ["field", "_f0", "limit"], 10]])
        );
        assert_eq!(
            as_json(&x.body),
            json!([["set", ["field", "_f0", "limit"], ["field", "_f0", "limit"]]])
        );
    }

    #[test]
    fn reserved_frame_field_names_are_avoided() {
        let body = stmts(json!([["var", "ip", "i64", 0]]));
        let x = extract_decls(&[], body, "_f0", "F").unwrap();
        assert_eq!(x.frame_struct.fields[0].name, "ip1");
    }

    #[test]
    fn literal_locals_stay_local_but_free_refs_go_through_the_frame() {
        let body = stmts(json!([
            ["var", "total", "i64", 0],
            ["var", "add", ["func", ["i64"], "unit"],
                ["fn", [["d", "i64"]], "unit", ["block",
                    ["var", "tmp", "i64", "d"],
                    ["set", "total", ["+", "total", "tmp"]]]]],
            [["field", "_f0", "add"], 1]
        ]));
        let x = extract_decls(&[], body, "_f0", "F").unwrap();
        let rendered = as_json(&x.body);
        assert_eq!(
            rendered,
            json!([
                ["set", ["field", "_f0", "total"], 0],
                ["set", ["field", "_f0", "add"],
                    ["fn", [["d", "i64"]], "unit", ["block",
                        ["var", "tmp", "i64", "d"],
                        ["set", ["field", "_f0", "total"], ["+", ["field", "_f0", "total"], "tmp"]]]]],
                [["field", "_f0", "add"], 1]
            ])
        );
    }

    #[test]
    fn kept_range_bindings_are_assigned_through_the_frame() {
        let body = stmts(json!([
            ["var", "m", ["map", "str", "i64"], ["make", ["map", "str", "i64"]]],
            ["var", "keys", ["slice", "str"], ["make", ["slice", "str"], 0, 0]],
            ["range", "k", "_", "m", ["block",
                ["set", "keys", ["append", "keys", "k"]]]]
        ]));
        let x = extract_decls(&[], body, "_f0", "F").unwrap();
        let rendered = as_json(&x.body);
        assert_eq!(
            rendered[2],
            json!(["range", ["field", "_f0", "k"], "_", ["field", "_f0", "m"], ["block",
                ["set", ["field", "_f0", "keys"],
                    ["append", ["field", "_f0", "keys"], ["field", "_f0", "k"]]]]])
        );
        let k_field = x.frame_struct.fields.iter().find(|p| p.name == "k").unwrap();
        assert_eq!(k_field.ty, Ty::Str);
    }
}
