//! The dispatch rewrite.
//!
//! Produces the final body of a colored procedure: a prologue that loads
//! the context, pushes the typed frame and runs the initializer on first
//! entry; a scoped-exit epilogue that runs deferred calls and pops the
//! frame unless the procedure is unwinding; and the body partitioned into
//! ip-guarded dispatch spans. Each call that may yield is preceded by
//! `frame.ip = <span>` and starts a new span, so a resumption re-enters
//! exactly the call it suspended in. Loop bodies reset the ip in the loop
//! post so later iterations run in full.

use crate::ast::{block, ident, int, list, Expr};
use crate::builtins;
use crate::callgraph::{ColorTable, YieldSignature};
use crate::compile::{CompileErrorKind, CompilerError};
use crate::decls::extract_decls;
use crate::desugar::desugar;
use crate::modfile::{FuncDecl, Param, StructDecl};
use crate::typecheck::TypeInfo;
use crate::types::Ty;

/// Attribute marking rewritten procedures as non-inlinable: the runtime
/// frame registry keys on symbol names, which inlining would fuse.
pub const NOINLINE_ATTR: &str = "noinline";

const STMT_HEADS: &[&str] = &[
    "var", "const", "set", "if", "if-init", "for", "range", "switch", "switch-init", "label",
    "break", "continue", "defer", "return", "block",
];

pub struct RewriteScope<'a> {
    pub info: &'a TypeInfo,
    pub colors: &'a ColorTable,
    pub module: &'a str,
    /// Unique frame identifiers within one top-level procedure; closures
    /// get their own frames and need distinct names.
    frame_index: usize,
    has_colored_literals: bool,
    pub struct_decls: Vec<StructDecl>,
}

impl<'a> RewriteScope<'a> {
    pub fn new(info: &'a TypeInfo, colors: &'a ColorTable, module: &'a str) -> Self {
        RewriteScope {
            info,
            colors,
            module,
            frame_index: 0,
            has_colored_literals: false,
            struct_decls: Vec::new(),
        }
    }
}

pub fn compile_func_decl(
    scope: &mut RewriteScope<'_>,
    f: &FuncDecl,
    color: &YieldSignature,
) -> Result<FuncDecl, CompilerError> {
    scope.frame_index = 0;
    scope.has_colored_literals = false;
    let body = compile_func_body(scope, &f.name, &f.params, &f.result, f.body.clone(), color)?;
    let mut attrs = f.attrs.clone();
    if !attrs.iter().any(|a| a == NOINLINE_ATTR) {
        attrs.push(NOINLINE_ATTR.to_string());
    }
    Ok(FuncDecl {
        name: f.name.clone(),
        params: f.params.clone(),
        result: f.result.clone(),
        body,
        attrs,
        ptr: f.ptr.clone(),
    })
}

fn compile_func_body(
    scope: &mut RewriteScope<'_>,
    base: &str,
    params: &[Param],
    result: &Ty,
    body: Vec<Expr>,
    color: &YieldSignature,
) -> Result<Vec<Expr>, CompilerError> {
    let body = desugar(body, scope.info, scope.colors, scope.module)?;

    let mut had_defers = false;
    let body = body
        .into_iter()
        .map(|s| rewrite_literals_and_defers(scope, base, s, &mut had_defers))
        .collect::<Result<Vec<_>, _>>()?;

    // A single-expression body has no internal call boundary to dispatch
    // into; it is left untransformed.
    if is_expr(&body) {
        return Ok(body);
    }

    let idx = scope.frame_index;
    scope.frame_index += 1;
    let frame = format!("_f{idx}");
    let struct_name = format!("{base}_Frame{idx}");

    let ext = extract_decls(params, body, &frame, &struct_name)?;
    scope.struct_decls.push(ext.frame_struct);

    let (recv, send) = color;
    let mut gen = vec![
        list(vec![
            ident("var"),
            ident("_c"),
            Ty::Ctx(Box::new(recv.clone()), Box::new(send.clone())).to_expr(),
            list(vec![
                ident("tapp"),
                ident(builtins::LOAD_CONTEXT),
                list(vec![recv.to_expr(), send.to_expr()]),
            ]),
        ]),
        list(vec![
            ident("var"),
            ident(frame.clone()),
            Ty::Frame(struct_name.clone()).to_expr(),
            list(vec![
                ident("tapp"),
                ident(builtins::PUSH),
                list(vec![ident(struct_name.clone())]),
                ident("_c"),
            ]),
        ]),
        list(vec![
            ident("if"),
            list(vec![ident("=="), ip_field(&frame), int(0)]),
            block(vec![list(vec![
                ident("set"),
                list(vec![ident("deref"), ident(frame.clone())]),
                ext.frame_init,
            ])]),
            ident("nil"),
        ]),
    ];
    gen.extend(ext.const_inits);
    gen.push(epilogue(&frame, had_defers));

    let mut tracker = SpanTracker {
        scope,
        frame: frame.clone(),
        counter: 0,
    };
    gen.extend(tracker.compile_list(flatten_blocks(ext.body))?);

    if *result != Ty::Unit {
        let ends_with_return = gen.last().map(|s| s.head() == Some("return")).unwrap_or(false);
        if !ends_with_return {
            gen.push(list(vec![ident("return"), result.zero_expr()]));
        }
    }

    Ok(gen)
}

/// The scoped-exit action: on every exit path, run the deferred calls in
/// reverse and pop the frame, unless the stack is unwinding toward a
/// suspension (then the frame is retained for resumption).
fn epilogue(frame: &str, had_defers: bool) -> Expr {
    let pop = list(vec![ident(builtins::POP), ident("_c")]);
    let on_exit = if had_defers {
        vec![
            list(vec![ident("defer"), pop]),
            list(vec![
                ident("range"),
                ident("_"),
                ident("f"),
                list(vec![
                    ident("field"),
                    ident(frame),
                    ident("deferred"),
                ]),
                block(vec![list(vec![ident("defer"), list(vec![ident("f")])])]),
            ]),
        ]
    } else {
        vec![pop]
    };
    list(vec![
        ident("defer"),
        list(vec![list(vec![
            ident("fn"),
            list(Vec::new()),
            ident("unit"),
            block(vec![list(vec![
                ident("if"),
                list(vec![
                    ident("not"),
                    list(vec![ident(builtins::UNWINDING), ident("_c")]),
                ]),
                block(on_exit),
                ident("nil"),
            ])]),
        ])]),
    ])
}

fn rewrite_literals_and_defers(
    scope: &mut RewriteScope<'_>,
    base: &str,
    e: Expr,
    had_defers: &mut bool,
) -> Result<Expr, CompilerError> {
    let (items, ptr) = match e {
        Expr::List { items, ptr } => (items, ptr),
        other => return Ok(other),
    };
    let head = items.first().and_then(Expr::as_ident).map(str::to_string);
    match head.as_deref() {
        Some("fn") if items.len() == 4 => {
            match scope.colors.lit(scope.module, &ptr).cloned() {
                Some(color) => {
                    scope.has_colored_literals = true;
                    compile_func_lit(scope, base, items, &color)
                }
                // An uncolored literal is its own scope and its own
                // (native) defer domain; nothing inside it is rewritten.
                None => Ok(Expr::List { items, ptr }),
            }
        }
        Some("defer") if items.len() == 2 => {
            *had_defers = true;
            let mut items = items;
            let call = items.remove(1);
            Ok(list(vec![
                ident(builtins::DEFER),
                ident("_c"),
                list(vec![ident("fn"), list(Vec::new()), ident("unit"), block(vec![call])]),
            ]))
        }
        _ => {
            let items = items
                .into_iter()
                .map(|i| rewrite_literals_and_defers(scope, base, i, had_defers))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::List { items, ptr })
        }
    }
}

fn compile_func_lit(
    scope: &mut RewriteScope<'_>,
    base: &str,
    mut items: Vec<Expr>,
    color: &YieldSignature,
) -> Result<Expr, CompilerError> {
    let body = items.remove(3);
    let ret = items.remove(2);
    let params_expr = items.remove(1);

    let mut params = Vec::new();
    if let Some(pairs) = params_expr.items() {
        for pair in pairs {
            if let Some([name, ty]) = pair.items() {
                params.push(Param {
                    name: name.as_ident().unwrap_or("_").to_string(),
                    ty: Ty::parse(ty)
                        .map_err(|m| CompilerError::new(CompileErrorKind::Internal, m))?,
                });
            }
        }
    }
    let result = Ty::parse(&ret).map_err(|m| CompilerError::new(CompileErrorKind::Internal, m))?;
    let body_stmts: Vec<Expr> = match body {
        Expr::List { items, .. } if items.first().and_then(Expr::as_ident) == Some("block") => {
            items.into_iter().skip(1).collect()
        }
        other => vec![other],
    };

    let compiled = compile_func_body(scope, base, &params, &result, body_stmts, color)?;
    Ok(list(vec![
        ident("fn"),
        params_expr,
        ret,
        block(compiled),
    ]))
}

fn is_expr(body: &[Expr]) -> bool {
    match body {
        [] => true,
        [only] => !matches!(only.head(), Some(h) if STMT_HEADS.contains(&h)),
        _ => false,
    }
}

/// Splices directly nested blocks into the statement list. After
/// extraction, block scoping carries no meaning, and splicing keeps the
/// dispatch guards flat.
fn flatten_blocks(stmts: Vec<Expr>) -> Vec<Expr> {
    let mut out = Vec::with_capacity(stmts.len());
    for s in stmts {
        match s {
            Expr::List { items, .. }
                if items.first().and_then(Expr::as_ident) == Some("block") =>
            {
                out.extend(flatten_blocks(items.into_iter().skip(1).collect()));
            }
            other => out.push(other),
        }
    }
    out
}

struct SpanTracker<'a, 'b> {
    scope: &'b RewriteScope<'a>,
    frame: String,
    counter: u64,
}

fn ip_field(frame: &str) -> Expr {
    list(vec![ident("field"), ident(frame), ident("ip")])
}

impl SpanTracker<'_, '_> {
    /// True for an expression that is a call which may unwind: the yield
    /// primitive, a call to a colored declaration, or an indirect call
    /// when the procedure holds colored literals.
    fn may_yield_call(&self, e: &Expr) -> bool {
        let Expr::List { items, .. } = e else {
            return false;
        };
        match items.first() {
            Some(Expr::Ident { name, .. }) => match name.as_str() {
                builtins::YIELD => true,
                "tapp" => items.get(1).and_then(Expr::as_ident) == Some(builtins::YIELD),
                _ => self.scope.colors.decl(name).is_some(),
            },
            // Indirect call (through a frame field or an immediately
            // invoked literal). Precision would need value tracking; a
            // false positive only costs a harmless extra span boundary.
            Some(Expr::List { .. }) => self.scope.has_colored_literals,
            Some(Expr::Int { .. }) | Some(Expr::Float { .. }) | None => false,
        }
    }

    fn contains_boundary(&self, e: &Expr) -> bool {
        let Expr::List { items, .. } = e else {
            return false;
        };
        if e.head() == Some("fn") {
            // A literal's yields unwind through its own frame, at its call
            // sites.
            return false;
        }
        if self.may_yield_call(e) {
            return true;
        }
        items.iter().any(|i| self.contains_boundary(i))
    }

    fn compile_list(&mut self, stmts: Vec<Expr>) -> Result<Vec<Expr>, CompilerError> {
        if !stmts.iter().any(|s| self.contains_boundary(s)) {
            return Ok(stmts);
        }
        let mut groups: Vec<(u64, Vec<Expr>)> = Vec::new();
        for stmt in stmts {
            let compiled = self.compile_stmt(stmt)?;
            let end = self.counter + 1;
            match groups.last_mut() {
                Some((e, g)) if *e == end => g.extend(compiled),
                _ => groups.push((end, compiled)),
            }
        }
        Ok(groups
            .into_iter()
            .map(|(end, stmts)| {
                list(vec![
                    ident("if"),
                    list(vec![ident("<"), ip_field(&self.frame), int(end as i64)]),
                    block(stmts),
                    ident("nil"),
                ])
            })
            .collect())
    }

    fn compile_stmt(&mut self, stmt: Expr) -> Result<Vec<Expr>, CompilerError> {
        if !self.contains_boundary(&stmt) {
            return Ok(vec![stmt]);
        }
        if self.is_boundary_stmt(&stmt) {
            self.counter += 1;
            let set_ip = list(vec![
                ident("set"),
                ip_field(&self.frame),
                int(self.counter as i64),
            ]);
            return Ok(vec![set_ip, stmt]);
        }

        let head = stmt.head().map(str::to_string);
        let (mut items, ptr) = match stmt {
            Expr::List { items, ptr } => (items, ptr),
            other => return Ok(vec![other]),
        };
        match head.as_deref() {
            Some("label") if items.len() == 3 => {
                let inner = items.remove(2);
                let label = items.remove(1);
                let mut compiled = self.compile_stmt(inner)?;
                let wrapped = if compiled.len() == 1 {
                    compiled.remove(0)
                } else {
                    block(compiled)
                };
                Ok(vec![list(vec![ident("label"), label, wrapped])])
            }
            Some("for") if items.len() == 5 => {
                let body = items.remove(4);
                let post = items.remove(3);
                let cond = items.remove(2);
                let init = items.remove(1);
                if self.contains_boundary(&cond) || self.contains_boundary(&post) {
                    return Err(self.unsupported_position(&ptr));
                }
                let body_start = self.counter;
                let body = self.compile_block(body)?;
                let reset = list(vec![
                    ident("set"),
                    ip_field(&self.frame),
                    int(body_start as i64),
                ]);
                let post = if post.is_nil() {
                    reset
                } else {
                    block(vec![post, reset])
                };
                Ok(vec![list(vec![ident("for"), init, cond, post, body])])
            }
            Some("if") if items.len() == 4 => {
                let els = items.remove(3);
                let then = items.remove(2);
                let cond = items.remove(1);
                if self.contains_boundary(&cond) {
                    return Err(self.unsupported_position(&ptr));
                }
                let then = self.compile_block(then)?;
                let els = if els.is_nil() {
                    els
                } else if els.head() == Some("if") {
                    let mut compiled = self.compile_stmt(els)?;
                    if compiled.len() == 1 {
                        compiled.remove(0)
                    } else {
                        block(compiled)
                    }
                } else {
                    self.compile_block(els)?
                };
                Ok(vec![list(vec![ident("if"), cond, then, els])])
            }
            Some("switch") if items.len() >= 2 => {
                let arms = items.split_off(2);
                let tag = items.remove(1);
                if self.contains_boundary(&tag) {
                    return Err(self.unsupported_position(&ptr));
                }
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
                    let split_at = if arm_head.as_deref() == Some("case") { 2 } else { 1 };
                    if arm_items.len() < split_at {
                        out.push(Expr::List {
                            items: arm_items,
                            ptr: arm_ptr,
                        });
                        continue;
                    }
                    let body = arm_items.split_off(split_at);
                    arm_items.extend(self.compile_list(body)?);
                    out.push(Expr::List {
                        items: arm_items,
                        ptr: arm_ptr,
                    });
                }
                Ok(vec![list(out)])
            }
            Some("block") => {
                let compiled = self.compile_list(items.into_iter().skip(1).collect())?;
                Ok(vec![block(compiled)])
            }
            _ => Err(self.unsupported_position(&ptr)),
        }
    }

    fn compile_block(&mut self, e: Expr) -> Result<Expr, CompilerError> {
        match e {
            Expr::List { items, .. }
                if items.first().and_then(Expr::as_ident) == Some("block") =>
            {
                let compiled = self.compile_list(items.into_iter().skip(1).collect())?;
                Ok(block(compiled))
            }
            other => {
                let mut compiled = self.compile_stmt(other)?;
                if compiled.len() == 1 {
                    Ok(compiled.remove(0))
                } else {
                    Ok(block(compiled))
                }
            }
        }
    }

    fn is_boundary_stmt(&self, stmt: &Expr) -> bool {
        if self.may_yield_call(stmt) {
            return true;
        }
        let Some(items) = stmt.items() else {
            return false;
        };
        match stmt.head() {
            Some("set") if items.len() == 3 => {
                self.may_yield_call(&items[2]) && !self.contains_boundary(&items[1])
            }
            Some("return") if items.len() == 2 => self.may_yield_call(&items[1]),
            _ => false,
        }
    }

    fn unsupported_position(&self, ptr: &str) -> CompilerError {
        CompilerError::new(
            CompileErrorKind::Unsupported,
            format!(
                "a call that may yield must be an expression statement, an initializer, \
                 or the right-hand side of an assignment (at {ptr})"
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ast::expr_to_value;
    use crate::callgraph::color_functions;
    use crate::modfile::{parse_module_json, ModuleFile, STRAND_AST_SCHEMA_VERSION};
    use crate::typecheck::{typecheck_modules, Sigs};

    use super::*;

    fn module(decls: serde_json::Value) -> ModuleFile {
        let doc = json!({
            "schema_version": STRAND_AST_SCHEMA_VERSION,
            "module_id": "main",
            "imports": ["strand"],
            "tags": [],
            "decls": decls,
        });
        parse_module_json(&doc.to_string()).unwrap()
    }

    fn compile_first(m: &ModuleFile) -> (FuncDecl, Vec<StructDecl>) {
        let mut sigs = Sigs::default();
        sigs.add_module(m);
        let (info, diags) = typecheck_modules(&[m], &sigs);
        assert!(diags.is_empty(), "unexpected diags: {diags:?}");
        let colors = color_functions(&[m], &info).unwrap();
        let mut scope = RewriteScope::new(&info, &colors, "main");
        let f = m.funcs().next().unwrap();
        let color = colors.decl(&f.name).cloned().expect("function is colored");
        let out = compile_func_decl(&mut scope, f, &color).unwrap();
        (out, scope.struct_decls)
    }

    fn body_json(f: &FuncDecl) -> serde_json::Value {
        serde_json::Value::Array(f.body.iter().map(expr_to_value).collect())
    }

    #[test]
    fn counter_is_rewritten_into_prologue_dispatch_epilogue() {
        let m = module(json!([{
            "kind": "defn",
            "name": "main.counter",
            "params": [{"name": "n", "ty": "i64"}],
            "result": "unit",
            "body": [
                ["for", ["var", "i", "i64", 0], ["<", "i", "n"], ["set", "i", ["+", "i", 1]],
                    ["block", ["strand.yield", "i"]]]
            ]
        }]));
        let (f, structs) = compile_first(&m);

        assert!(f.attrs.iter().any(|a| a == NOINLINE_ATTR));
        assert_eq!(structs.len(), 1);
        assert_eq!(structs[0].name, "main.counter_Frame0");
        let field_names: Vec<&str> = structs[0].fields.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(field_names, vec!["n", "i"]);

        assert_eq!(
            body_json(&f),
            json!([
                ["var", "_c", ["ctx", "i64", "unit"],
                    ["tapp", "strand.load_context", ["i64", "unit"]]],
                ["var", "_f0", ["frame", "main.counter_Frame0"],
                    ["tapp", "strand.push", ["main.counter_Frame0"], "_c"]],
                ["if", ["==", ["field", "_f0", "ip"], 0],
                    ["block", ["set", ["deref", "_f0"],
                        ["struct-lit", "main.counter_Frame0", ["n", "n"]]]],
                    "nil"],
                ["defer", [["fn", [], "unit", ["block",
                    ["if", ["not", ["strand.unwinding", "_c"]],
                        ["block", ["strand.pop", "_c"]],
                        "nil"]]]]],
                ["if", ["<", ["field", "_f0", "ip"], 1],
                    ["block", ["set", ["field", "_f0", "i"], 0]],
                    "nil"],
                ["if", ["<", ["field", "_f0", "ip"], 2],
                    ["block",
                        ["for", "nil",
                            ["<", ["field", "_f0", "i"], ["field", "_f0", "n"]],
                            ["block",
                                ["set", ["field", "_f0", "i"], ["+", ["field", "_f0", "i"], 1]],
                                ["set", ["field", "_f0", "ip"], 0]],
                            ["block",
                                ["if", ["<", ["field", "_f0", "ip"], 2],
                                    ["block",
                                        ["set", ["field", "_f0", "ip"], 1],
                                        ["strand.yield", ["field", "_f0", "i"]]],
                                    "nil"]]]],
                    "nil"]
            ])
        );
    }

    #[test]
    fn single_expression_bodies_are_left_untransformed() {
        let m = module(json!([
            {
                "kind": "defn", "name": "main.leaf", "params": [], "result": "unit",
                "body": [["strand.yield", 1]]
            },
            {
                "kind": "defn", "name": "main.thin", "params": [], "result": "unit",
                "body": [["main.leaf"]]
            }
        ]));
        let mut sigs = Sigs::default();
        sigs.add_module(&m);
        let (info, _) = typecheck_modules(&[&m], &sigs);
        let colors = color_functions(&[&m], &info).unwrap();
        let mut scope = RewriteScope::new(&info, &colors, "main");
        let thin = m.funcs().nth(1).unwrap();
        let color = colors.decl("main.thin").cloned().unwrap();
        let out = compile_func_decl(&mut scope, thin, &color).unwrap();

        assert_eq!(body_json(&out), json!([["main.leaf"]]));
        assert!(out.attrs.iter().any(|a| a == NOINLINE_ATTR));
        assert!(scope.struct_decls.is_empty());
    }

    #[test]
    fn non_void_procedures_get_an_injected_final_return() {
        let m = module(json!([{
            "kind": "defn",
            "name": "main.sum",
            "params": [],
            "result": "i64",
            "body": [
                ["var", "acc", "i64", 0],
                ["strand.yield", 1],
                ["set", "acc", 2]
            ]
        }]));
        let (f, _) = compile_first(&m);
        let body = body_json(&f);
        let last = body.as_array().unwrap().last().unwrap();
        assert_eq!(last, &json!(["return", 0]));
    }

    #[test]
    fn nested_colored_calls_are_span_boundaries() {
        let m = module(json!([
            {
                "kind": "defn", "name": "main.inner", "params": [], "result": "i64",
                "body": [["strand.yield", 1], ["return", 5]]
            },
            {
                "kind": "defn", "name": "main.outer", "params": [], "result": "unit",
                "body": [
                    ["var", "a", "i64", 0],
                    ["set", "a", ["main.inner"]],
                    ["strand.yield", "a"]
                ]
            }
        ]));
        let mut sigs = Sigs::default();
        sigs.add_module(&m);
        let (info, diags) = typecheck_modules(&[&m], &sigs);
        assert!(diags.is_empty(), "unexpected diags: {diags:?}");
        let colors = color_functions(&[&m], &info).unwrap();
        let mut scope = RewriteScope::new(&info, &colors, "main");
        let outer = m.funcs().nth(1).unwrap();
        let color = colors.decl("main.outer").cloned().unwrap();
        let out = compile_func_decl(&mut scope, outer, &color).unwrap();
        let rendered = body_json(&out).to_string();

        // The colored call and the yield each get their own span: the call
        // records span 1, the yield span 2.
        assert!(rendered.contains(r#"["set",["field","_f0","ip"],1],["set",["field","_f0","a"],["main.inner"]]"#),
            "colored call is not its own span: {rendered}");
        assert!(rendered.contains(r#"["set",["field","_f0","ip"],2],["strand.yield",["field","_f0","a"]]"#),
            "yield did not start span 2: {rendered}");
    }

    #[test]
    fn defers_are_rewritten_and_run_by_the_epilogue() {
        let m = module(json!([{
            "kind": "defn",
            "name": "main.f",
            "params": [],
            "result": "unit",
            "body": [
                ["defer", ["main.cleanup"]],
                ["strand.yield", 1]
            ]
        },
        {
            "kind": "defn", "name": "main.cleanup", "params": [], "result": "unit",
            "body": []
        }]));
        let (f, _) = compile_first(&m);
        let rendered = body_json(&f).to_string();

        assert!(
            rendered.contains(r#"["strand.defer","_c",["fn",[],"unit",["block",["main.cleanup"]]]]"#),
            "defer was not rewritten onto the frame: {rendered}"
        );
        assert!(
            rendered.contains(r#"["range","_","f",["field","_f0","deferred"]"#),
            "epilogue does not run the deferred list: {rendered}"
        );
        assert!(
            rendered.contains(r#"["defer",["strand.pop","_c"]]"#),
            "epilogue does not pop after defers: {rendered}"
        );
    }

    #[test]
    fn yield_nested_inside_an_expression_is_rejected() {
        let m = module(json!([{
            "kind": "defn",
            "name": "main.f",
            "params": [],
            "result": "unit",
            "body": [
                ["var", "x", "i64", ["+", ["tapp", "strand.yield", ["i64", "i64"], 1], 1]]
            ]
        }]));
        let mut sigs = Sigs::default();
        sigs.add_module(&m);
        let (info, _) = typecheck_modules(&[&m], &sigs);
        let colors = color_functions(&[&m], &info).unwrap();
        let mut scope = RewriteScope::new(&info, &colors, "main");
        let f = m.funcs().next().unwrap();
        let color = colors.decl("main.f").cloned().unwrap();
        let err = compile_func_decl(&mut scope, f, &color).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Unsupported);
    }

    #[test]
    fn colored_literals_are_rewritten_with_their_own_frames() {
        let m = module(json!([{
            "kind": "defn",
            "name": "main.f",
            "params": [],
            "result": "unit",
            "body": [
                ["var", "g", ["func", [], "unit"],
                    ["fn", [], "unit", ["block", ["strand.yield", 7]]]],
                ["g"]
            ]
        }]));
        let (f, structs) = compile_first(&m);
        let names: Vec<&str> = structs.iter().map(|s| s.name.as_str()).collect();
        // Literals are compiled before the enclosing body takes its frame
        // index, so the literal owns Frame0 and the outer procedure Frame1.
        assert!(names.contains(&"main.f_Frame0"), "missing literal frame: {names:?}");
        assert!(names.contains(&"main.f_Frame1"), "missing outer frame: {names:?}");
        let rendered = body_json(&f).to_string();
        assert!(rendered.contains("_f1"), "outer body does not use its own frame: {rendered}");
    }
}
