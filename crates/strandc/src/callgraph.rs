//! Whole-program call-graph coloring.
//!
//! Yield instantiations seed the coloring with their concrete recv/send
//! types; reverse reachability propagates a signature unchanged through
//! every caller. A procedure reaching two instantiations with different
//! signatures is a compile error, and a procedure reaching none stays
//! uncolored and untouched by the rewrite.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ast::Expr;
use crate::compile::{CompileErrorKind, CompilerError};
use crate::modfile::{Decl, ModuleFile};
use crate::typecheck::{FuncId, TypeInfo};
use crate::types::Ty;

/// The (recv, send) type pair of a colored procedure.
pub type YieldSignature = (Ty, Ty);

#[derive(Debug, Default, Clone)]
pub struct ColorTable {
    map: BTreeMap<FuncId, YieldSignature>,
}

impl ColorTable {
    pub fn get(&self, id: &FuncId) -> Option<&YieldSignature> {
        self.map.get(id)
    }

    pub fn decl(&self, name: &str) -> Option<&YieldSignature> {
        self.map.get(&FuncId::Decl(name.to_string()))
    }

    pub fn lit(&self, module: &str, ptr: &str) -> Option<&YieldSignature> {
        self.map.get(&FuncId::Lit {
            module: module.to_string(),
            ptr: ptr.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FuncId, &YieldSignature)> {
        self.map.iter()
    }
}

struct GraphBuilder<'a> {
    decl_names: &'a BTreeSet<String>,
    module: String,
    /// callee -> callers
    reverse: BTreeMap<FuncId, BTreeSet<FuncId>>,
    current: Vec<FuncId>,
}

impl GraphBuilder<'_> {
    fn edge_to(&mut self, callee: FuncId) {
        if let Some(caller) = self.current.last() {
            self.reverse.entry(callee).or_default().insert(caller.clone());
        }
    }

    fn walk(&mut self, e: &Expr) {
        let Expr::List { items, ptr } = e else { return };
        if let Some(head) = e.head() {
            if head == "fn" && items.len() == 4 {
                let lit = FuncId::Lit {
                    module: self.module.clone(),
                    ptr: ptr.clone(),
                };
                // The literal is reachable from its enclosing procedure; a
                // finer-grained answer would need value tracking.
                self.edge_to(lit.clone());
                self.current.push(lit);
                self.walk(&items[3]);
                self.current.pop();
                return;
            }
            if self.decl_names.contains(head) {
                self.edge_to(FuncId::Decl(head.to_string()));
            }
        }
        for item in items {
            self.walk(item);
        }
    }
}

pub fn color_functions(
    modules: &[&ModuleFile],
    info: &TypeInfo,
) -> Result<ColorTable, CompilerError> {
    let decl_names: BTreeSet<String> = modules
        .iter()
        .flat_map(|m| m.decls.iter())
        .filter_map(|d| match d {
            Decl::Func(f) => Some(f.name.clone()),
            Decl::Struct(_) => None,
        })
        .collect();

    let mut reverse: BTreeMap<FuncId, BTreeSet<FuncId>> = BTreeMap::new();
    for m in modules {
        for decl in &m.decls {
            let Decl::Func(f) = decl else { continue };
            let mut builder = GraphBuilder {
                decl_names: &decl_names,
                module: m.module_id.clone(),
                reverse: std::mem::take(&mut reverse),
                current: vec![FuncId::Decl(f.name.clone())],
            };
            for stmt in &f.body {
                builder.walk(stmt);
            }
            reverse = builder.reverse;
        }
    }

    let mut table = ColorTable::default();
    let mut queue: VecDeque<FuncId> = VecDeque::new();

    let mut paint = |table: &mut ColorTable,
                     queue: &mut VecDeque<FuncId>,
                     id: &FuncId,
                     sig: &YieldSignature|
     -> Result<(), CompilerError> {
        match table.map.get(id) {
            Some(existing) if existing == sig => Ok(()),
            Some(existing) => Err(CompilerError::new(
                CompileErrorKind::MixedYieldTypes,
                format!(
                    "{id} reaches yield instantiations with conflicting signatures: \
                     (recv {}, send {}) vs (recv {}, send {})",
                    existing.0, existing.1, sig.0, sig.1
                ),
            )),
            None => {
                table.map.insert(id.clone(), sig.clone());
                queue.push_back(id.clone());
                Ok(())
            }
        }
    };

    for site in &info.yield_sites {
        let sig = (site.recv.clone(), site.send.clone());
        paint(&mut table, &mut queue, &site.func, &sig)?;
    }

    while let Some(id) = queue.pop_front() {
        let sig = table.map[&id].clone();
        let callers: Vec<FuncId> = reverse
            .get(&id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for caller in callers {
            paint(&mut table, &mut queue, &caller, &sig)?;
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::modfile::{parse_module_json, STRAND_AST_SCHEMA_VERSION};
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

    fn color(m: &ModuleFile) -> Result<ColorTable, CompilerError> {
        let mut sigs = Sigs::default();
        sigs.add_module(m);
        let (info, diags) = typecheck_modules(&[m], &sigs);
        assert!(diags.is_empty(), "unexpected diags: {diags:?}");
        color_functions(&[m], &info)
    }

    #[test]
    fn yield_types_propagate_through_the_call_graph() {
        let m = module(json!([
            {
                "kind": "defn", "name": "main.leaf", "params": [], "result": "unit",
                "body": [["strand.yield", 1]]
            },
            {
                "kind": "defn", "name": "main.mid", "params": [], "result": "unit",
                "body": [["main.leaf"]]
            },
            {
                "kind": "defn", "name": "main.root", "params": [], "result": "unit",
                "body": [["main.mid"]]
            },
            {
                "kind": "defn", "name": "main.plain", "params": [], "result": "i64",
                "body": [["return", 7]]
            }
        ]));
        let table = color(&m).unwrap();
        let sig = (Ty::I64, Ty::Unit);
        assert_eq!(table.decl("main.leaf"), Some(&sig));
        assert_eq!(table.decl("main.mid"), Some(&sig));
        assert_eq!(table.decl("main.root"), Some(&sig));
        assert_eq!(table.decl("main.plain"), None);
    }

    #[test]
    fn s6_mixed_yield_types_are_rejected() {
        let m = module(json!([
            {
                "kind": "defn", "name": "main.ints", "params": [], "result": "unit",
                "body": [["strand.yield", 1]]
            },
            {
                "kind": "defn", "name": "main.strs", "params": [], "result": "unit",
                "body": [["tapp", "strand.yield", ["str", "unit"], ["str", "x"]]]
            },
            {
                "kind": "defn", "name": "main.both", "params": [], "result": "unit",
                "body": [["main.ints"], ["main.strs"]]
            }
        ]));
        let err = color(&m).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::MixedYieldTypes);
    }

    #[test]
    fn colored_literals_color_their_host() {
        let m = module(json!([
            {
                "kind": "defn", "name": "main.f", "params": [], "result": "unit",
                "body": [
                    ["var", "g", ["func", [], "unit"],
                        ["fn", [], "unit", ["block", ["strand.yield", 1]]]],
                    ["g"]
                ]
            }
        ]));
        let table = color(&m).unwrap();
        assert!(table.decl("main.f").is_some());
        assert!(table.lit("main", "/decls/0/body/0/3").is_some());
    }
}
