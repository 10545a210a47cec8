use std::collections::BTreeMap;
use std::fmt;

use crate::ast::Expr;
use crate::builtins;
use crate::diagnostics::{Diagnostic, Stage};
use crate::modfile::{Decl, ModuleFile};
use crate::types::{assignable, Ty};

/// Identity of a procedure instantiation: a top-level declaration by
/// qualified name, or a function literal by its source position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FuncId {
    Decl(String),
    Lit { module: String, ptr: String },
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncId::Decl(name) => write!(f, "{name}"),
            FuncId::Lit { module, ptr } => write!(f, "{module} literal at {ptr}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FnSig {
    pub name: String,
    pub module: String,
    pub params: Vec<Ty>,
    pub result: Ty,
}

/// Signature and struct tables collected from every loaded module.
#[derive(Debug, Default, Clone)]
pub struct Sigs {
    pub fns: BTreeMap<String, FnSig>,
    pub structs: BTreeMap<String, Vec<(String, Ty)>>,
}

impl Sigs {
    pub fn add_module(&mut self, m: &ModuleFile) {
        for decl in &m.decls {
            match decl {
                Decl::Func(f) => {
                    self.fns.insert(
                        f.name.clone(),
                        FnSig {
                            name: f.name.clone(),
                            module: m.module_id.clone(),
                            params: f.params.iter().map(|p| p.ty.clone()).collect(),
                            result: f.result.clone(),
                        },
                    );
                }
                Decl::Struct(s) => {
                    self.structs.insert(
                        s.name.clone(),
                        s.fields.iter().map(|p| (p.name.clone(), p.ty.clone())).collect(),
                    );
                }
            }
        }
    }
}

/// One instantiation of the yield primitive: the seed of call-graph
/// coloring, carrying its concrete recv/send types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YieldSite {
    pub func: FuncId,
    pub ptr: String,
    pub recv: Ty,
    pub send: Ty,
}

/// Types captured before desugaring: expression types keyed by module id
/// and JSON pointer, plus every yield instantiation. Later passes resolve
/// identifiers against this instead of re-checking rewritten trees.
#[derive(Debug, Default)]
pub struct TypeInfo {
    pub expr_types: BTreeMap<(String, String), Ty>,
    pub yield_sites: Vec<YieldSite>,
}

impl TypeInfo {
    pub fn ty_of(&self, module: &str, e: &Expr) -> Option<&Ty> {
        self.expr_types
            .get(&(module.to_string(), e.ptr().to_string()))
    }
}

pub fn typecheck_modules(modules: &[&ModuleFile], sigs: &Sigs) -> (TypeInfo, Vec<Diagnostic>) {
    let mut info = TypeInfo::default();
    let mut diags = Vec::new();
    for &m in modules {
        let mut checker = Checker {
            sigs,
            module: m,
            info: &mut info,
            diags: &mut diags,
            scopes: Vec::new(),
            funcs: Vec::new(),
        };
        checker.check_module();
    }
    (info, diags)
}

struct Checker<'a> {
    sigs: &'a Sigs,
    module: &'a ModuleFile,
    info: &'a mut TypeInfo,
    diags: &'a mut Vec<Diagnostic>,
    scopes: Vec<BTreeMap<String, Ty>>,
    funcs: Vec<(FuncId, Ty)>,
}

impl Checker<'_> {
    fn check_module(&mut self) {
        for decl in &self.module.decls {
            if let Decl::Func(f) = decl {
                self.scopes.clear();
                let mut top = BTreeMap::new();
                for p in &f.params {
                    top.insert(p.name.clone(), p.ty.clone());
                }
                self.scopes.push(top);
                self.funcs.push((FuncId::Decl(f.name.clone()), f.result.clone()));
                for stmt in &f.body {
                    self.check_stmt(stmt);
                }
                self.funcs.pop();
                self.scopes.pop();
            }
        }
    }

    fn error(&mut self, code: &str, message: String, ptr: &str) {
        let mut d = Diagnostic::error(Stage::Type, code, message)
            .with_module(self.module.module_id.clone());
        if !ptr.is_empty() {
            d = d.with_ptr(ptr);
        }
        self.diags.push(d);
    }

    fn bind(&mut self, name: &str, ty: Ty) {
        if name == "_" {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Ty> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn parse_ty(&mut self, e: &Expr) -> Ty {
        match Ty::parse(e) {
            Ok(t) => t,
            Err(msg) => {
                self.error("SC-TYPE-0001", msg, e.ptr());
                Ty::Unit
            }
        }
    }

    fn check_assignable(&mut self, want: &Ty, found: &Ty, ptr: &str) {
        if !assignable(want, found) {
            self.error(
                "SC-TYPE-0002",
                format!("expected {want}, found {found}"),
                ptr,
            );
        }
    }

    fn check_block(&mut self, e: &Expr) {
        let Some(items) = e.items().filter(|_| e.head() == Some("block")) else {
            self.error("SC-TYPE-0003", "expected a block".to_string(), e.ptr());
            return;
        };
        self.scopes.push(BTreeMap::new());
        for stmt in &items[1..] {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &Expr) {
        let Some(items) = stmt.items() else {
            // A bare literal or identifier in statement position is inert.
            return;
        };
        match stmt.head() {
            Some("var") | Some("const") if items.len() >= 3 => {
                let ty = self.parse_ty(&items[2]);
                if let Some(init) = items.get(3) {
                    let found = self.infer(init, Some(&ty));
                    self.check_assignable(&ty, &found, init.ptr());
                }
                if let Some(name) = items[1].as_ident() {
                    self.bind(name, ty);
                }
            }
            Some("set") if items.len() == 3 => {
                let want = self.infer(&items[1], None);
                let found = self.infer(&items[2], Some(&want.clone()));
                self.check_assignable(&want, &found, items[2].ptr());
            }
            Some("if") if items.len() >= 3 => {
                let cond = self.infer(&items[1], Some(&Ty::Bool));
                self.check_assignable(&Ty::Bool, &cond, items[1].ptr());
                self.check_block(&items[2]);
                if let Some(els) = items.get(3) {
                    if !els.is_nil() {
                        if els.head() == Some("if") || els.head() == Some("if-init") {
                            self.check_stmt(els);
                        } else {
                            self.check_block(els);
                        }
                    }
                }
            }
            Some("if-init") if items.len() >= 4 => {
                self.scopes.push(BTreeMap::new());
                self.check_stmt(&items[1]);
                let cond = self.infer(&items[2], Some(&Ty::Bool));
                self.check_assignable(&Ty::Bool, &cond, items[2].ptr());
                self.check_block(&items[3]);
                if let Some(els) = items.get(4) {
                    if !els.is_nil() {
                        self.check_block(els);
                    }
                }
                self.scopes.pop();
            }
            Some("for") if items.len() == 5 => {
                self.scopes.push(BTreeMap::new());
                if !items[1].is_nil() {
                    self.check_stmt(&items[1]);
                }
                if !items[2].is_nil() {
                    let cond = self.infer(&items[2], Some(&Ty::Bool));
                    self.check_assignable(&Ty::Bool, &cond, items[2].ptr());
                }
                if !items[3].is_nil() {
                    self.check_stmt(&items[3]);
                }
                self.check_block(&items[4]);
                self.scopes.pop();
            }
            Some("range") if items.len() == 5 => {
                let subject = self.infer(&items[3], None);
                self.scopes.push(BTreeMap::new());
                let (key_ty, value_ty) = match &subject {
                    Ty::Slice(elem) => (Ty::I64, (**elem).clone()),
                    Ty::Map(k, v) => ((**k).clone(), (**v).clone()),
                    other => {
                        self.error(
                            "SC-TYPE-0004",
                            format!("cannot range over {other}"),
                            items[3].ptr(),
                        );
                        (Ty::Unit, Ty::Unit)
                    }
                };
                if let Some(name) = items[1].as_ident() {
                    self.bind(name, key_ty);
                }
                if let Some(name) = items[2].as_ident() {
                    self.bind(name, value_ty);
                }
                self.check_block(&items[4]);
                self.scopes.pop();
            }
            Some("switch") | Some("switch-init") => {
                let (tag_idx, init) = if stmt.head() == Some("switch-init") {
                    (2, Some(&items[1]))
                } else {
                    (1, None)
                };
                self.scopes.push(BTreeMap::new());
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                let tag_ty = match items.get(tag_idx) {
                    Some(tag) if !tag.is_nil() => self.infer(tag, None),
                    _ => Ty::Bool,
                };
                for case in items.iter().skip(tag_idx + 1) {
                    let Some(case_items) = case.items() else { continue };
                    match case.head() {
                        Some("case") if case_items.len() >= 2 => {
                            if let Some(exprs) = case_items[1].items() {
                                for e in exprs {
                                    let found = self.infer(e, Some(&tag_ty.clone()));
                                    self.check_assignable(&tag_ty, &found, e.ptr());
                                }
                            }
                            self.scopes.push(BTreeMap::new());
                            for s in &case_items[2..] {
                                self.check_stmt(s);
                            }
                            self.scopes.pop();
                        }
                        Some("default") => {
                            self.scopes.push(BTreeMap::new());
                            for s in &case_items[1..] {
                                self.check_stmt(s);
                            }
                            self.scopes.pop();
                        }
                        _ => self.error(
                            "SC-TYPE-0005",
                            "switch arms must be case or default clauses".to_string(),
                            case.ptr(),
                        ),
                    }
                }
                self.scopes.pop();
            }
            Some("label") if items.len() == 3 => {
                self.check_stmt(&items[2]);
            }
            Some("break") | Some("continue") => {}
            Some("defer") if items.len() == 2 => {
                self.infer(&items[1], None);
            }
            Some("return") => {
                let result = self.funcs.last().map(|(_, r)| r.clone()).unwrap_or(Ty::Unit);
                match items.get(1) {
                    Some(e) => {
                        let found = self.infer(e, Some(&result));
                        self.check_assignable(&result, &found, e.ptr());
                    }
                    None => {
                        if result != Ty::Unit {
                            self.error(
                                "SC-TYPE-0006",
                                format!("return needs a {result} value"),
                                stmt.ptr(),
                            );
                        }
                    }
                }
            }
            Some("block") => self.check_block(stmt),
            // Channel operations, goto, and fallthrough type as no-ops here;
            // the compiler rejects them later if they appear in a colored
            // procedure.
            Some("send") | Some("recv") | Some("select") | Some("goto") | Some("fallthrough") => {}
            _ => {
                self.infer(stmt, None);
            }
        }
    }

    fn record(&mut self, e: &Expr, ty: Ty) -> Ty {
        if !e.ptr().is_empty() {
            self.info.expr_types.insert(
                (self.module.module_id.clone(), e.ptr().to_string()),
                ty.clone(),
            );
        }
        ty
    }

    fn infer(&mut self, e: &Expr, want: Option<&Ty>) -> Ty {
        let ty = self.infer_inner(e, want);
        self.record(e, ty)
    }

    fn infer_inner(&mut self, e: &Expr, want: Option<&Ty>) -> Ty {
        match e {
            Expr::Int { .. } => Ty::I64,
            Expr::Float { .. } => Ty::F64,
            Expr::Ident { name, ptr } => match name.as_str() {
                "true" | "false" => Ty::Bool,
                "nil" => Ty::Nil,
                _ => {
                    if let Some(t) = self.lookup(name) {
                        return t.clone();
                    }
                    if let Some(sig) = self.sigs.fns.get(name) {
                        return Ty::Func(sig.params.clone(), Box::new(sig.result.clone()));
                    }
                    self.error("SC-TYPE-0007", format!("unknown identifier {name:?}"), ptr);
                    want.cloned().unwrap_or(Ty::Unit)
                }
            },
            Expr::List { items, ptr } => {
                if items.is_empty() {
                    self.error("SC-TYPE-0008", "empty expression".to_string(), ptr);
                    return Ty::Unit;
                }
                self.infer_form(e, items, want)
            }
        }
    }

    fn infer_form(&mut self, e: &Expr, items: &[Expr], want: Option<&Ty>) -> Ty {
        let head = items[0].as_ident();
        match head {
            Some("str") if items.len() == 2 => Ty::Str,
            Some("+") | Some("-") | Some("*") | Some("/") | Some("%") if items.len() == 3 => {
                let a = self.infer(&items[1], want);
                let b = self.infer(&items[2], Some(&a.clone()));
                if a != b || !matches!(a, Ty::I64 | Ty::F64) {
                    self.error(
                        "SC-TYPE-0009",
                        format!("arithmetic on {a} and {b}"),
                        e.ptr(),
                    );
                }
                a
            }
            Some("==") | Some("!=") | Some("<") | Some("<=") | Some(">") | Some(">=")
                if items.len() == 3 =>
            {
                let a = self.infer(&items[1], None);
                let b = self.infer(&items[2], Some(&a.clone()));
                if !assignable(&a, &b) && !assignable(&b, &a) {
                    self.error(
                        "SC-TYPE-0010",
                        format!("comparison of {a} and {b}"),
                        e.ptr(),
                    );
                }
                Ty::Bool
            }
            Some("and") | Some("or") if items.len() == 3 => {
                for operand in &items[1..] {
                    let t = self.infer(operand, Some(&Ty::Bool));
                    self.check_assignable(&Ty::Bool, &t, operand.ptr());
                }
                Ty::Bool
            }
            Some("not") if items.len() == 2 => {
                let t = self.infer(&items[1], Some(&Ty::Bool));
                self.check_assignable(&Ty::Bool, &t, items[1].ptr());
                Ty::Bool
            }
            Some("len") if items.len() == 2 => {
                let t = self.infer(&items[1], None);
                if !matches!(t, Ty::Slice(_) | Ty::Map(_, _) | Ty::Str) {
                    self.error("SC-TYPE-0011", format!("len of {t}"), e.ptr());
                }
                Ty::I64
            }
            Some("append") if items.len() == 3 => {
                let s = self.infer(&items[1], None);
                match &s {
                    Ty::Slice(elem) => {
                        let elem = (**elem).clone();
                        let v = self.infer(&items[2], Some(&elem));
                        self.check_assignable(&elem, &v, items[2].ptr());
                    }
                    other => self.error("SC-TYPE-0012", format!("append to {other}"), e.ptr()),
                }
                s
            }
            Some("make") if items.len() >= 2 => {
                let ty = self.parse_ty(&items[1]);
                if !matches!(ty, Ty::Slice(_) | Ty::Map(_, _)) {
                    self.error("SC-TYPE-0013", format!("make of {ty}"), e.ptr());
                }
                for dim in &items[2..] {
                    let t = self.infer(dim, Some(&Ty::I64));
                    self.check_assignable(&Ty::I64, &t, dim.ptr());
                }
                ty
            }
            Some("subslice") if items.len() == 4 => {
                let s = self.infer(&items[1], None);
                if !matches!(s, Ty::Slice(_)) {
                    self.error("SC-TYPE-0014", format!("subslice of {s}"), e.ptr());
                }
                for bound in &items[2..4] {
                    let t = self.infer(bound, Some(&Ty::I64));
                    self.check_assignable(&Ty::I64, &t, bound.ptr());
                }
                s
            }
            Some("index") if items.len() == 3 => {
                let container = self.infer(&items[1], None);
                match container {
                    Ty::Slice(elem) => {
                        let i = self.infer(&items[2], Some(&Ty::I64));
                        self.check_assignable(&Ty::I64, &i, items[2].ptr());
                        *elem
                    }
                    Ty::Map(k, v) => {
                        let i = self.infer(&items[2], Some(&k));
                        self.check_assignable(&k, &i, items[2].ptr());
                        *v
                    }
                    other => {
                        self.error("SC-TYPE-0015", format!("index into {other}"), e.ptr());
                        Ty::Unit
                    }
                }
            }
            Some("contains") if items.len() == 3 => {
                let container = self.infer(&items[1], None);
                match container {
                    Ty::Map(k, _) => {
                        let i = self.infer(&items[2], Some(&k));
                        self.check_assignable(&k, &i, items[2].ptr());
                    }
                    other => self.error("SC-TYPE-0016", format!("contains on {other}"), e.ptr()),
                }
                Ty::Bool
            }
            Some("field") if items.len() == 3 => {
                let base = self.infer(&items[1], None);
                let field = items[2].as_ident().unwrap_or("");
                let struct_name = match &base {
                    Ty::Named(n) => Some(n.clone()),
                    Ty::Ptr(inner) => match &**inner {
                        Ty::Named(n) => Some(n.clone()),
                        _ => None,
                    },
                    _ => None,
                };
                match struct_name.and_then(|n| self.sigs.structs.get(&n).cloned()) {
                    Some(fields) => match fields.iter().find(|(n, _)| n == field) {
                        Some((_, t)) => t.clone(),
                        None => {
                            self.error(
                                "SC-TYPE-0017",
                                format!("{base} has no field {field:?}"),
                                e.ptr(),
                            );
                            Ty::Unit
                        }
                    },
                    None => {
                        self.error("SC-TYPE-0017", format!("field access on {base}"), e.ptr());
                        Ty::Unit
                    }
                }
            }
            Some("addr") if items.len() == 2 => {
                let t = self.infer(&items[1], None);
                Ty::Ptr(Box::new(t))
            }
            Some("deref") if items.len() == 2 => {
                let t = self.infer(&items[1], None);
                match t {
                    Ty::Ptr(inner) => *inner,
                    other => {
                        self.error("SC-TYPE-0018", format!("deref of {other}"), e.ptr());
                        Ty::Unit
                    }
                }
            }
            Some("struct-lit") if items.len() >= 2 => {
                let name = items[1].as_ident().unwrap_or("").to_string();
                let fields = self.sigs.structs.get(&name).cloned();
                match fields {
                    Some(fields) => {
                        for fv in &items[2..] {
                            let pair = fv.items().filter(|p| p.len() == 2);
                            let Some(pair) = pair else {
                                self.error(
                                    "SC-TYPE-0019",
                                    "struct literal fields are [name, value] pairs".to_string(),
                                    fv.ptr(),
                                );
                                continue;
                            };
                            let fname = pair[0].as_ident().unwrap_or("");
                            match fields.iter().find(|(n, _)| n == fname) {
                                Some((_, ft)) => {
                                    let ft = ft.clone();
                                    let found = self.infer(&pair[1], Some(&ft));
                                    self.check_assignable(&ft, &found, pair[1].ptr());
                                }
                                None => self.error(
                                    "SC-TYPE-0019",
                                    format!("{name} has no field {fname:?}"),
                                    pair[0].ptr(),
                                ),
                            }
                        }
                        Ty::Named(name)
                    }
                    None => {
                        self.error("SC-TYPE-0020", format!("unknown struct {name:?}"), e.ptr());
                        Ty::Named(name)
                    }
                }
            }
            Some("fn") if items.len() == 4 => self.infer_fn_literal(e, items),
            Some("tapp") if items.len() >= 3 => self.infer_tapp(e, items),
            Some(builtins::YIELD) if items.len() == 2 => {
                let recv = self.infer(&items[1], None);
                self.yield_site(e, recv, Ty::Unit)
            }
            _ => self.infer_call(e, items),
        }
    }

    fn infer_fn_literal(&mut self, e: &Expr, items: &[Expr]) -> Ty {
        let mut params = Vec::new();
        let mut scope = BTreeMap::new();
        if let Some(pairs) = items[1].items() {
            for pair in pairs {
                match pair.items() {
                    Some([name, ty]) => {
                        let t = self.parse_ty(ty);
                        if let Some(n) = name.as_ident() {
                            scope.insert(n.to_string(), t.clone());
                        }
                        params.push(t);
                    }
                    _ => self.error(
                        "SC-TYPE-0021",
                        "literal parameters are [name, type] pairs".to_string(),
                        pair.ptr(),
                    ),
                }
            }
        }
        let result = self.parse_ty(&items[2]);
        self.funcs.push((
            FuncId::Lit {
                module: self.module.module_id.clone(),
                ptr: e.ptr().to_string(),
            },
            result.clone(),
        ));
        self.scopes.push(scope);
        self.check_block(&items[3]);
        self.scopes.pop();
        self.funcs.pop();
        Ty::Func(params, Box::new(result))
    }

    fn infer_tapp(&mut self, e: &Expr, items: &[Expr]) -> Ty {
        let callee = items[1].as_ident().unwrap_or("");
        if callee != builtins::YIELD {
            self.error(
                "SC-TYPE-0022",
                format!("explicit instantiation of {callee:?} is not supported"),
                e.ptr(),
            );
            return Ty::Unit;
        }
        let (recv, send) = match items[2].items() {
            Some([r, s]) => (self.parse_ty(r), self.parse_ty(s)),
            _ => {
                self.error(
                    "SC-TYPE-0022",
                    "yield instantiation needs [recv, send] type arguments".to_string(),
                    items[2].ptr(),
                );
                (Ty::Unit, Ty::Unit)
            }
        };
        if let Some(arg) = items.get(3) {
            let found = self.infer(arg, Some(&recv.clone()));
            self.check_assignable(&recv, &found, arg.ptr());
        }
        self.yield_site(e, recv, send)
    }

    fn yield_site(&mut self, e: &Expr, recv: Ty, send: Ty) -> Ty {
        if !self.module.imports_module(crate::modfile::STRAND_MODULE) {
            self.error(
                "SC-TYPE-0023",
                "yield requires importing the strand module".to_string(),
                e.ptr(),
            );
        }
        let func = self
            .funcs
            .last()
            .map(|(id, _)| id.clone())
            .unwrap_or(FuncId::Decl(String::new()));
        self.info.yield_sites.push(YieldSite {
            func,
            ptr: e.ptr().to_string(),
            recv,
            send: send.clone(),
        });
        send
    }

    fn infer_call(&mut self, e: &Expr, items: &[Expr]) -> Ty {
        let (params, result) = match items[0].as_ident() {
            Some(name) => {
                if let Some(t) = self.lookup(name).cloned() {
                    match t {
                        Ty::Func(p, r) => (p, *r),
                        other => {
                            self.error("SC-TYPE-0024", format!("call of {other}"), e.ptr());
                            return Ty::Unit;
                        }
                    }
                } else if let Some(sig) = self.sigs.fns.get(name).cloned() {
                    self.check_callee_visible(name, &sig.module, e.ptr());
                    (sig.params, sig.result)
                } else {
                    self.error(
                        "SC-TYPE-0025",
                        format!("unknown callee {name:?}"),
                        e.ptr(),
                    );
                    return Ty::Unit;
                }
            }
            None => {
                let t = self.infer(&items[0], None);
                match t {
                    Ty::Func(p, r) => (p, *r),
                    other => {
                        self.error("SC-TYPE-0024", format!("call of {other}"), e.ptr());
                        return Ty::Unit;
                    }
                }
            }
        };
        let args = &items[1..];
        if args.len() != params.len() {
            self.error(
                "SC-TYPE-0026",
                format!("expected {} arguments, found {}", params.len(), args.len()),
                e.ptr(),
            );
        }
        for (arg, want) in args.iter().zip(params.iter()) {
            let found = self.infer(arg, Some(&want.clone()));
            self.check_assignable(want, &found, arg.ptr());
        }
        result
    }

    fn check_callee_visible(&mut self, name: &str, owner: &str, ptr: &str) {
        if owner == self.module.module_id || self.module.imports_module(owner) {
            return;
        }
        self.error(
            "SC-TYPE-0027",
            format!("calling {name:?} requires importing {owner:?}"),
            ptr,
        );
    }
}
