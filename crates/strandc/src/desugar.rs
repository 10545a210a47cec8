//! Statement desugaring.
//!
//! Recursively replaces sugared statements with simpler constructs. The
//! goals: hoist initialization out of branch and loop headers so resuming
//! inside a body never re-runs it; lower `range` to explicit indexed
//! iteration (with mapping iteration split into a key-collection loop and
//! a presence-checked lookup loop, since mapping order is unstable across
//! resumption); make implicit break/continue targets explicit through
//! generated labels; and hoist the scrutinee of any yield-containing
//! `if`/`switch` into a frame-resident temporary so branch re-selection on
//! resumption never re-evaluates user code.
//!
//! The pass works at statement level and does not walk into function
//! literals; the dispatch rewriter desugars colored literals when it
//! compiles them.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{block, ident, int, list, Expr};
use crate::builtins;
use crate::callgraph::ColorTable;
use crate::compile::{CompileErrorKind, CompilerError};
use crate::typecheck::TypeInfo;
use crate::types::Ty;

pub fn desugar(
    body: Vec<Expr>,
    info: &TypeInfo,
    colors: &ColorTable,
    module: &str,
) -> Result<Vec<Expr>, CompilerError> {
    let mut d = Desugarer {
        info,
        colors,
        module,
        vars: 0,
        labels: 0,
        unused_labels: BTreeSet::new(),
        user_labels: BTreeMap::new(),
    };
    let out = d.desugar_list(body, None, None)?;

    // Unused labels would be "defined and not used" diagnostics in the
    // target language, so a second pass deletes them.
    Ok(out.into_iter().map(|s| d.elide_unused_labels(s)).collect())
}

struct Desugarer<'a> {
    info: &'a TypeInfo,
    colors: &'a ColorTable,
    module: &'a str,
    vars: usize,
    labels: usize,
    unused_labels: BTreeSet<String>,
    user_labels: BTreeMap<String, String>,
}

impl Desugarer<'_> {
    fn new_var(&mut self) -> String {
        let v = format!("_v{}", self.vars);
        self.vars += 1;
        v
    }

    fn new_label(&mut self) -> String {
        let l = format!("_l{}", self.labels);
        self.labels += 1;
        self.unused_labels.insert(l.clone());
        l
    }

    fn use_label(&mut self, label: &str) {
        self.unused_labels.remove(label);
    }

    fn desugar_list(
        &mut self,
        stmts: Vec<Expr>,
        break_to: Option<&str>,
        continue_to: Option<&str>,
    ) -> Result<Vec<Expr>, CompilerError> {
        stmts
            .into_iter()
            .map(|s| self.desugar_stmt(s, break_to, continue_to, None))
            .collect()
    }

    fn desugar_block(
        &mut self,
        e: Expr,
        break_to: Option<&str>,
        continue_to: Option<&str>,
    ) -> Result<Expr, CompilerError> {
        match e {
            Expr::List { items, .. } if items.first().and_then(Expr::as_ident) == Some("block") => {
                let mut out = vec![ident("block")];
                out.extend(self.desugar_list(items.into_iter().skip(1).collect(), break_to, continue_to)?);
                Ok(list(out))
            }
            other => self.desugar_stmt(other, break_to, continue_to, None),
        }
    }

    fn desugar_stmt(
        &mut self,
        stmt: Expr,
        break_to: Option<&str>,
        continue_to: Option<&str>,
        user_label: Option<String>,
    ) -> Result<Expr, CompilerError> {
        if !matches!(stmt, Expr::List { .. }) {
            return Ok(stmt);
        }
        let head = stmt.head().map(str::to_string);
        match head.as_deref() {
            Some("block") => self.desugar_block(stmt, break_to, continue_to),

            Some("if") => {
                let may = self.may_yield(&stmt);
                let mut items = into_items(stmt);
                let els = if items.len() > 3 { Some(items.remove(3)) } else { None };
                let then = items.remove(2);
                let cond = items.remove(1);
                self.desugar_if(cond, then, els, may, break_to, continue_to)
            }

            Some("if-init") => {
                // `if init; cond {}` => `{ init; if cond {} }`
                let may = self.may_yield(&stmt);
                let mut items = into_items(stmt);
                let els = if items.len() > 4 { Some(items.remove(4)) } else { None };
                let then = items.remove(3);
                let cond = items.remove(2);
                let init = items.remove(1);
                let init = self.desugar_stmt(init, None, None, None)?;
                let rest = self.desugar_if(cond, then, els, may, break_to, continue_to)?;
                Ok(block(vec![init, rest]))
            }

            Some("for") => {
                // `for init; cond; post {}` => `{ init; for ; cond; post {} }`
                let mut items = into_items(stmt);
                let body = items.remove(4);
                let post = items.remove(3);
                let cond = items.remove(2);
                let init = items.remove(1);
                let init = if init.is_nil() {
                    None
                } else {
                    Some(self.desugar_stmt(init, None, None, None)?)
                };
                let for_label = self.new_label();
                if let Some(user) = user_label {
                    self.user_labels.insert(user, for_label.clone());
                }
                let body = self.desugar_block(body, Some(&for_label), Some(&for_label))?;
                let post = if post.is_nil() {
                    post
                } else {
                    self.desugar_stmt(post, None, None, None)?
                };
                let labeled = list(vec![
                    ident("label"),
                    ident(for_label),
                    list(vec![ident("for"), ident("nil"), cond, post, body]),
                ]);
                Ok(match init {
                    Some(init) => block(vec![init, labeled]),
                    None => labeled,
                })
            }

            Some("range") => {
                let mut items = into_items(stmt);
                let body = items.remove(4);
                let subject = items.remove(3);
                let value = items.remove(2);
                let key = items.remove(1);
                let subject_ty = self.info.ty_of(self.module, &subject).cloned().ok_or_else(|| {
                    CompilerError::new(
                        CompileErrorKind::Internal,
                        format!("no type recorded for range subject at {}", subject.ptr()),
                    )
                })?;
                let key = key.as_ident().unwrap_or("_").to_string();
                let value = value.as_ident().unwrap_or("_").to_string();
                self.desugar_range(
                    key, value, subject, subject_ty, body, break_to, continue_to, user_label,
                )
            }

            Some("switch") | Some("switch-init") => {
                let is_init = head.as_deref() == Some("switch-init");
                let may = self.may_yield(&stmt);
                let mut items = into_items(stmt);
                let mut prologue = Vec::new();
                let mut rest: Vec<Expr> = if is_init {
                    let init = items.remove(1);
                    let init = self.desugar_stmt(init, None, None, None)?;
                    prologue.push(init);
                    items.split_off(1)
                } else {
                    items.split_off(1)
                };
                let mut tag = rest.remove(0);
                if may && !tag.is_nil() {
                    // Hoist the tag so arm re-selection on resumption reads
                    // the frame instead of re-evaluating the scrutinee.
                    let tag_ty = self.info.ty_of(self.module, &tag).cloned().unwrap_or(Ty::Bool);
                    let tv = self.new_var();
                    prologue.push(list(vec![
                        ident("var"),
                        ident(tv.clone()),
                        tag_ty.to_expr(),
                        tag,
                    ]));
                    tag = ident(tv);
                }
                let switch_label = self.new_label();
                if let Some(user) = user_label {
                    self.user_labels.insert(user, switch_label.clone());
                }
                let mut arms = Vec::new();
                for case in rest {
                    let case_head = case.head().map(str::to_string);
                    let mut case_items = into_items(case);
                    match case_head.as_deref() {
                        Some("case") if case_items.len() >= 2 => {
                            let body = case_items.split_off(2);
                            let exprs = case_items.remove(1);
                            let mut out = vec![ident("case"), exprs];
                            out.extend(self.desugar_list(body, Some(&switch_label), continue_to)?);
                            arms.push(list(out));
                        }
                        Some("default") => {
                            let body = case_items.split_off(1);
                            let mut out = vec![ident("default")];
                            out.extend(self.desugar_list(body, Some(&switch_label), continue_to)?);
                            arms.push(list(out));
                        }
                        _ => {
                            return Err(CompilerError::new(
                                CompileErrorKind::Parse,
                                "switch arms must be case or default clauses".to_string(),
                            ))
                        }
                    }
                }
                let mut switch = vec![ident("switch"), tag];
                switch.extend(arms);
                let labeled = list(vec![
                    ident("label"),
                    ident(switch_label),
                    list(switch),
                ]);
                if prologue.is_empty() {
                    Ok(labeled)
                } else {
                    prologue.push(labeled);
                    Ok(block(prologue))
                }
            }

            Some("label") => {
                // Strip the user's label; the generated replacement is
                // recorded so branch statements can be retargeted.
                let mut items = into_items(stmt);
                let inner = items.remove(2);
                let name = items.remove(1);
                let name = name.as_ident().unwrap_or("").to_string();
                self.desugar_stmt(inner, break_to, continue_to, Some(name))
            }

            Some("break") | Some("continue") => {
                let tok = head.as_deref().map(str::to_string).unwrap_or_default();
                let mut items = into_items(stmt);
                let target = if items.len() > 1 {
                    let user = items.remove(1);
                    let user = user.as_ident().unwrap_or("").to_string();
                    self.user_labels.get(&user).cloned().ok_or_else(|| {
                        CompilerError::new(
                            CompileErrorKind::Internal,
                            format!("label not found: {user}"),
                        )
                    })?
                } else {
                    let implicit = if tok == "break" { break_to } else { continue_to };
                    implicit
                        .ok_or_else(|| {
                            CompilerError::new(
                                CompileErrorKind::Parse,
                                format!("{tok} outside of a loop or switch"),
                            )
                        })?
                        .to_string()
                };
                self.use_label(&target);
                Ok(list(vec![ident(tok), ident(target)]))
            }

            Some("select") | Some("send") | Some("recv") | Some("goto") | Some("fallthrough") => {
                Err(CompilerError::new(
                    CompileErrorKind::Unsupported,
                    format!(
                        "{:?} is not supported in a yielding procedure",
                        head.as_deref().unwrap_or("")
                    ),
                ))
            }

            // Assignments, declarations, defers, returns, and expression
            // statements pass through unchanged.
            _ => Ok(stmt),
        }
    }

    fn desugar_if(
        &mut self,
        cond: Expr,
        then: Expr,
        els: Option<Expr>,
        may_yield: bool,
        break_to: Option<&str>,
        continue_to: Option<&str>,
    ) -> Result<Expr, CompilerError> {
        let mut hoist = None;
        let cond = if may_yield {
            let v = self.new_var();
            hoist = Some(list(vec![
                ident("var"),
                ident(v.clone()),
                ident("bool"),
                cond,
            ]));
            ident(v)
        } else {
            cond
        };
        let then = self.desugar_block(then, break_to, continue_to)?;
        let els = match els {
            None => ident("nil"),
            Some(e) if e.is_nil() => ident("nil"),
            Some(e) => {
                if e.head() == Some("if") || e.head() == Some("if-init") {
                    self.desugar_stmt(e, break_to, continue_to, None)?
                } else {
                    self.desugar_block(e, break_to, continue_to)?
                }
            }
        };
        let out = list(vec![ident("if"), cond, then, els]);
        Ok(match hoist {
            Some(h) => block(vec![h, out]),
            None => out,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn desugar_range(
        &mut self,
        key: String,
        value: String,
        subject: Expr,
        subject_ty: Ty,
        body: Expr,
        break_to: Option<&str>,
        continue_to: Option<&str>,
        user_label: Option<String>,
    ) -> Result<Expr, CompilerError> {
        let xv = self.new_var();
        let init = list(vec![
            ident("var"),
            ident(xv.clone()),
            subject_ty.to_expr(),
            subject,
        ]);
        match subject_ty {
            Ty::Slice(elem) => {
                let loop_stmt = self.indexed_loop(&xv, &key, &value, Some(*elem), body);
                let lowered =
                    self.desugar_stmt(loop_stmt, break_to, continue_to, user_label)?;
                Ok(block(vec![init, lowered]))
            }
            Ty::Map(k, v) => {
                if key == "_" && value == "_" {
                    // No bindings: only the iteration count is observable.
                    let loop_stmt = self.indexed_loop(&xv, "_", "_", None, body);
                    let lowered =
                        self.desugar_stmt(loop_stmt, break_to, continue_to, user_label)?;
                    return Ok(block(vec![init, lowered]));
                }

                // Mapping iteration order is unspecified and would be
                // unstable across resumption: collect the keys first (this
                // loop is deliberately not desugared and never yields),
                // then iterate the snapshot, re-looking each value up.
                let keys = self.new_var();
                let kv = self.new_var();
                let key_slice_ty = Ty::Slice(k.clone());
                let collect = block(vec![
                    list(vec![
                        ident("var"),
                        ident(keys.clone()),
                        key_slice_ty.to_expr(),
                        list(vec![
                            ident("make"),
                            key_slice_ty.to_expr(),
                            int(0),
                            list(vec![ident("len"), ident(xv.clone())]),
                        ]),
                    ]),
                    list(vec![
                        ident("range"),
                        ident(kv.clone()),
                        ident("_"),
                        ident(xv.clone()),
                        block(vec![list(vec![
                            ident("set"),
                            ident(keys.clone()),
                            list(vec![
                                ident("append"),
                                ident(keys.clone()),
                                ident(kv),
                            ]),
                        ])]),
                    ]),
                ]);

                let map_key = if key == "_" { self.new_var() } else { key };
                let mut guarded_body = vec![ident("block")];
                if value != "_" {
                    guarded_body.push(list(vec![
                        ident("var"),
                        ident(value),
                        v.to_expr(),
                        list(vec![
                            ident("index"),
                            ident(xv.clone()),
                            ident(map_key.clone()),
                        ]),
                    ]));
                }
                guarded_body.extend(into_items(body).into_iter().skip(1));
                let guarded = list(vec![
                    ident("if"),
                    list(vec![
                        ident("contains"),
                        ident(xv.clone()),
                        ident(map_key.clone()),
                    ]),
                    list(guarded_body),
                    ident("nil"),
                ]);

                let iter = self.desugar_range(
                    "_".to_string(),
                    map_key,
                    ident(keys),
                    key_slice_ty,
                    block(vec![guarded]),
                    break_to,
                    continue_to,
                    user_label,
                )?;
                Ok(block(vec![init, collect, iter]))
            }
            other => Err(CompilerError::new(
                CompileErrorKind::Internal,
                format!("cannot lower range over {other}"),
            )),
        }
    }

    /// `{ for i := 0; i < len(xv); i++ { v := xv[i]; … } }` with fresh
    /// variables standing in for discarded bindings.
    fn indexed_loop(
        &mut self,
        xv: &str,
        key: &str,
        value: &str,
        elem: Option<Ty>,
        body: Expr,
    ) -> Expr {
        let i = if key == "_" {
            self.new_var()
        } else {
            key.to_string()
        };
        let mut body_stmts = vec![ident("block")];
        if value != "_" {
            if let Some(elem) = elem {
                body_stmts.push(list(vec![
                    ident("var"),
                    ident(value),
                    elem.to_expr(),
                    list(vec![ident("index"), ident(xv), ident(i.clone())]),
                ]));
            }
        }
        body_stmts.extend(into_items(body).into_iter().skip(1));
        list(vec![
            ident("for"),
            list(vec![ident("var"), ident(i.clone()), ident("i64"), int(0)]),
            list(vec![
                ident("<"),
                ident(i.clone()),
                list(vec![ident("len"), ident(xv)]),
            ]),
            list(vec![
                ident("set"),
                ident(i.clone()),
                list(vec![ident("+"), ident(i), int(1)]),
            ]),
            list(body_stmts),
        ])
    }

    fn may_yield(&self, e: &Expr) -> bool {
        let Expr::List { items, ptr } = e else { return false };
        match e.head() {
            Some(builtins::YIELD) => return true,
            Some("tapp") if items.get(1).and_then(Expr::as_ident) == Some(builtins::YIELD) => {
                return true
            }
            Some("fn") => return self.colors.lit(self.module, ptr).is_some(),
            Some(name) if self.colors.decl(name).is_some() => return true,
            _ => {}
        }
        items.iter().any(|i| self.may_yield(i))
    }

    fn elide_unused_labels(&self, e: Expr) -> Expr {
        let Expr::List { items, ptr } = e else { return e };
        let mut items: Vec<Expr> = items
            .into_iter()
            .map(|i| self.elide_unused_labels(i))
            .collect();
        let is_unused_label = items.first().and_then(Expr::as_ident) == Some("label")
            && items.len() == 3
            && items[1]
                .as_ident()
                .is_some_and(|l| self.unused_labels.contains(l));
        if is_unused_label {
            items.remove(2)
        } else {
            Expr::List { items, ptr }
        }
    }
}

fn into_items(e: Expr) -> Vec<Expr> {
    match e {
        Expr::List { items, .. } => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ast::{expr_from_json, expr_to_value};
    use crate::callgraph::color_functions;
    use crate::modfile::{parse_module_json, ModuleFile, STRAND_AST_SCHEMA_VERSION};
    use crate::typecheck::{typecheck_modules, Sigs, TypeInfo};

    use super::*;

    fn module(body: serde_json::Value, params: serde_json::Value) -> ModuleFile {
        let doc = json!({
            "schema_version": STRAND_AST_SCHEMA_VERSION,
            "module_id": "main",
            "imports": ["strand"],
            "tags": [],
            "decls": [{
                "kind": "defn",
                "name": "main.f",
                "params": params,
                "result": "unit",
                "body": body,
            }],
        });
        parse_module_json(&doc.to_string()).unwrap()
    }

    fn lower(m: &ModuleFile) -> (Vec<Expr>, TypeInfo, ColorTable) {
        let mut sigs = Sigs::default();
        sigs.add_module(m);
        let (info, diags) = typecheck_modules(&[m], &sigs);
        assert!(diags.is_empty(), "unexpected diags: {diags:?}");
        let colors = color_functions(&[m], &info).unwrap();
        let body = m.funcs().next().unwrap().body.clone();
        let out = desugar(body, &info, &colors, "main").unwrap();
        (out, info, colors)
    }

    fn as_json(stmts: &[Expr]) -> serde_json::Value {
        serde_json::Value::Array(stmts.iter().map(expr_to_value).collect())
    }

    #[test]
    fn if_init_is_hoisted_out_of_the_branch() {
        let m = module(
            json!([["if-init", ["var", "x", "i64", 1], ["<", "x", 2], ["block"], "nil"]]),
            json!([]),
        );
        let (out, _, _) = lower(&m);
        assert_eq!(
            as_json(&out),
            json!([["block",
                ["var", "x", "i64", 1],
                ["if", ["<", "x", 2], ["block"], "nil"]]])
        );
    }

    #[test]
    fn slice_range_becomes_indexed_iteration_with_body_binding() {
        let m = module(
            json!([["range", "_", "x", "xs", ["block", ["strand.yield", "x"]]]]),
            json!([{"name": "xs", "ty": ["slice", "i64"]}]),
        );
        let (out, _, _) = lower(&m);
        assert_eq!(
            as_json(&out),
            json!([["block",
                ["var", "_v0", ["slice", "i64"], "xs"],
                ["block",
                    ["var", "_v1", "i64", 0],
                    ["for",
                        "nil",
                        ["<", "_v1", ["len", "_v0"]],
                        ["set", "_v1", ["+", "_v1", 1]],
                        ["block",
                            ["var", "x", "i64", ["index", "_v0", "_v1"]],
                            ["strand.yield", "x"]]]]]])
        );
    }

    #[test]
    fn map_range_splits_into_key_collection_and_checked_lookup() {
        let m = module(
            json!([["range", "k", "v", "m", ["block", ["strand.yield", "v"]]]]),
            json!([{"name": "m", "ty": ["map", "str", "i64"]}]),
        );
        let (out, _, _) = lower(&m);
        let rendered = as_json(&out).to_string();

        // The collection loop survives as a raw (undesugared) range over
        // the mapping, appending into the fresh key slice.
        assert!(rendered.contains(r#"["range","#), "no raw range in {rendered}");
        assert!(rendered.contains(r#"["append","#), "no key append in {rendered}");
        // The iteration loop re-looks values up behind a presence check.
        assert!(rendered.contains(r#"["contains","#), "no presence check in {rendered}");
        assert!(rendered.contains(r#"["index","#), "no re-lookup in {rendered}");
        // The user bindings survive.
        assert!(rendered.contains(r#"["var","v","#), "no value binding in {rendered}");
    }

    #[test]
    fn unadorned_break_gets_an_explicit_generated_label() {
        let m = module(
            json!([["for", "nil", "true", "nil", ["block",
                ["strand.yield", 1],
                ["break"]]]]),
            json!([]),
        );
        let (out, _, _) = lower(&m);
        assert_eq!(
            as_json(&out),
            json!([["label", "_l0",
                ["for", "nil", "true", "nil", ["block",
                    ["strand.yield", 1],
                    ["break", "_l0"]]]]])
        );
    }

    #[test]
    fn unused_labels_are_elided() {
        let m = module(
            json!([["for", "nil", "true", "nil", ["block", ["strand.yield", 1]]]]),
            json!([]),
        );
        let (out, _, _) = lower(&m);
        assert_eq!(
            as_json(&out),
            json!([["for", "nil", "true", "nil", ["block", ["strand.yield", 1]]]])
        );
    }

    #[test]
    fn user_labels_are_remapped_onto_generated_ones() {
        let m = module(
            json!([["label", "outer", ["for", "nil", "true", "nil", ["block",
                ["for", "nil", "true", "nil", ["block",
                    ["strand.yield", 1],
                    ["break", "outer"]]]]]]]),
            json!([]),
        );
        let (out, _, _) = lower(&m);
        let rendered = as_json(&out).to_string();
        assert!(
            rendered.contains(r#"["break","_l0"]"#),
            "break did not retarget the generated outer label: {rendered}"
        );
    }

    #[test]
    fn yielding_if_condition_is_hoisted_into_a_temporary() {
        let m = module(
            json!([["if", ["==", "n", 0], ["block", ["strand.yield", 1]], "nil"]]),
            json!([{"name": "n", "ty": "i64"}]),
        );
        let (out, _, _) = lower(&m);
        assert_eq!(
            as_json(&out),
            json!([["block",
                ["var", "_v0", "bool", ["==", "n", 0]],
                ["if", "_v0", ["block", ["strand.yield", 1]], "nil"]]])
        );
    }

    #[test]
    fn non_yielding_if_condition_is_left_alone() {
        let m = module(
            json!([["if", ["==", "n", 0], ["block", ["set", "n", 1]], "nil"]]),
            json!([{"name": "n", "ty": "i64"}]),
        );
        let (out, _, _) = lower(&m);
        assert_eq!(
            as_json(&out),
            json!([["if", ["==", "n", 0], ["block", ["set", "n", 1]], "nil"]])
        );
    }

    #[test]
    fn select_is_rejected() {
        let m = module(json!([["select"]]), json!([]));
        let mut sigs = Sigs::default();
        sigs.add_module(&m);
        let (info, _) = typecheck_modules(&[&m], &sigs);
        let colors = color_functions(&[&m], &info).unwrap();
        let body = m.funcs().next().unwrap().body.clone();
        let err = desugar(body, &info, &colors, "main").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Unsupported);
    }
}
