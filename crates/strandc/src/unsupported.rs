//! Rejection of constructs the rewrite cannot carry across a suspension.
//!
//! Only colored procedures are checked: channel operations, `select`,
//! `goto`, and `fallthrough` compile fine in code that provably never
//! yields.

use crate::ast::Expr;
use crate::compile::{CompileErrorKind, CompilerError};
use crate::modfile::FuncDecl;

const REJECTED: &[&str] = &["send", "recv", "select", "goto", "fallthrough"];

pub fn unsupported(f: &FuncDecl) -> Result<(), CompilerError> {
    for stmt in &f.body {
        check(f, stmt)?;
    }
    Ok(())
}

fn check(f: &FuncDecl, e: &Expr) -> Result<(), CompilerError> {
    if let Expr::List { items, ptr } = e {
        if let Some(head) = e.head() {
            if REJECTED.contains(&head) {
                return Err(CompilerError::new(
                    CompileErrorKind::Unsupported,
                    format!("{}: {head:?} is not supported in a yielding procedure (at {ptr})", f.name),
                ));
            }
        }
        for item in items {
            check(f, item)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::ast::{ident, list};
    use crate::types::Ty;

    use super::*;

    fn func_with(stmt: Expr) -> FuncDecl {
        FuncDecl {
            name: "main.f".to_string(),
            params: Vec::new(),
            result: Ty::Unit,
            body: vec![stmt],
            attrs: Vec::new(),
            ptr: "/decls/0".to_string(),
        }
    }

    #[test]
    fn select_is_rejected() {
        let f = func_with(list(vec![ident("select")]));
        let err = unsupported(&f).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Unsupported);
    }

    #[test]
    fn goto_nested_in_a_loop_is_rejected() {
        let f = func_with(list(vec![
            ident("for"),
            ident("nil"),
            ident("nil"),
            ident("nil"),
            crate::ast::block(vec![list(vec![ident("goto"), ident("out")])]),
        ]));
        assert!(unsupported(&f).is_err());
    }

    #[test]
    fn ordinary_control_flow_passes() {
        let f = func_with(list(vec![
            ident("if"),
            ident("true"),
            crate::ast::block(vec![list(vec![ident("strand.yield"), crate::ast::int(1)])]),
            ident("nil"),
        ]));
        assert!(unsupported(&f).is_ok());
    }
}
