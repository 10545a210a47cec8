use std::fmt;

use crate::ast::{self, Expr};

/// The Strand type universe.
///
/// `Ctx` and `Frame` only ever appear in compiler-generated code (the
/// rewritten prologue); source programs cannot name them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    I64,
    F64,
    Bool,
    Str,
    Unit,
    Slice(Box<Ty>),
    Map(Box<Ty>, Box<Ty>),
    Ptr(Box<Ty>),
    Func(Vec<Ty>, Box<Ty>),
    /// A declared struct type, by qualified name.
    Named(String),
    /// The untyped nil literal; assignable to any pointer-shaped type.
    Nil,
    /// Coroutine context handle in generated code.
    Ctx(Box<Ty>, Box<Ty>),
    /// Frame handle in generated code, naming its locals struct.
    Frame(String),
}

impl Ty {
    /// Parses a type expression: `"i64"`, `["slice", T]`, `["map", K, V]`,
    /// `["ptr", T]`, `["func", [params…], R]`, or a qualified struct name.
    pub fn parse(e: &Expr) -> Result<Ty, String> {
        match e {
            Expr::Ident { name, .. } => match name.as_str() {
                "i64" => Ok(Ty::I64),
                "f64" => Ok(Ty::F64),
                "bool" => Ok(Ty::Bool),
                "str" => Ok(Ty::Str),
                "unit" => Ok(Ty::Unit),
                "nil" => Err(format!("nil is not a type (at {})", e.ptr())),
                _ => Ok(Ty::Named(name.clone())),
            },
            Expr::List { items, .. } => {
                let head = e
                    .head()
                    .ok_or_else(|| format!("malformed type expression at {}", e.ptr()))?;
                match (head, items.len()) {
                    ("slice", 2) => Ok(Ty::Slice(Box::new(Ty::parse(&items[1])?))),
                    ("map", 3) => Ok(Ty::Map(
                        Box::new(Ty::parse(&items[1])?),
                        Box::new(Ty::parse(&items[2])?),
                    )),
                    ("ptr", 2) => Ok(Ty::Ptr(Box::new(Ty::parse(&items[1])?))),
                    ("func", 3) => {
                        let params = items[1]
                            .items()
                            .ok_or_else(|| format!("func type needs a parameter list at {}", e.ptr()))?
                            .iter()
                            .map(Ty::parse)
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Ty::Func(params, Box::new(Ty::parse(&items[2])?)))
                    }
                    _ => Err(format!("unknown type constructor {head:?} at {}", e.ptr())),
                }
            }
            _ => Err(format!("malformed type expression at {}", e.ptr())),
        }
    }

    /// The type expression naming this type in emitted source.
    pub fn to_expr(&self) -> Expr {
        match self {
            Ty::I64 => ast::ident("i64"),
            Ty::F64 => ast::ident("f64"),
            Ty::Bool => ast::ident("bool"),
            Ty::Str => ast::ident("str"),
            Ty::Unit | Ty::Nil => ast::ident("unit"),
            Ty::Slice(t) => ast::list(vec![ast::ident("slice"), t.to_expr()]),
            Ty::Map(k, v) => ast::list(vec![ast::ident("map"), k.to_expr(), v.to_expr()]),
            Ty::Ptr(t) => ast::list(vec![ast::ident("ptr"), t.to_expr()]),
            Ty::Func(params, r) => ast::list(vec![
                ast::ident("func"),
                ast::list(params.iter().map(Ty::to_expr).collect()),
                r.to_expr(),
            ]),
            Ty::Named(n) => ast::ident(n.clone()),
            Ty::Ctx(r, s) => ast::list(vec![ast::ident("ctx"), r.to_expr(), s.to_expr()]),
            Ty::Frame(n) => ast::list(vec![ast::ident("frame"), ast::ident(n.clone())]),
        }
    }

    /// The zero-value literal of this type, used by the injected final
    /// return of rewritten non-void procedures.
    pub fn zero_expr(&self) -> Expr {
        match self {
            Ty::I64 => ast::int(0),
            Ty::F64 => Expr::Float {
                value: 0.0,
                ptr: String::new(),
            },
            Ty::Bool => ast::ident("false"),
            Ty::Str => ast::list(vec![ast::ident("str"), ast::ident("")]),
            Ty::Named(n) => ast::list(vec![ast::ident("struct-lit"), ast::ident(n.clone())]),
            _ => ast::ident("nil"),
        }
    }

    /// True for types a `nil` literal can stand in for.
    pub fn is_nilable(&self) -> bool {
        matches!(
            self,
            Ty::Slice(_) | Ty::Map(_, _) | Ty::Ptr(_) | Ty::Func(_, _)
        )
    }
}

/// Assignability: exact match, or nil into a pointer-shaped slot.
pub fn assignable(want: &Ty, found: &Ty) -> bool {
    if want == found {
        return true;
    }
    matches!(found, Ty::Nil) && want.is_nilable()
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::I64 => write!(f, "i64"),
            Ty::F64 => write!(f, "f64"),
            Ty::Bool => write!(f, "bool"),
            Ty::Str => write!(f, "str"),
            Ty::Unit => write!(f, "unit"),
            Ty::Nil => write!(f, "nil"),
            Ty::Slice(t) => write!(f, "slice[{t}]"),
            Ty::Map(k, v) => write!(f, "map[{k}, {v}]"),
            Ty::Ptr(t) => write!(f, "ptr[{t}]"),
            Ty::Func(params, r) => {
                write!(f, "func(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") {r}")
            }
            Ty::Named(n) => write!(f, "{n}"),
            Ty::Ctx(r, s) => write!(f, "ctx[{r}, {s}]"),
            Ty::Frame(n) => write!(f, "frame[{n}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ast::expr_from_json;

    use super::*;

    #[test]
    fn parses_nested_constructors() {
        let e = expr_from_json(&json!(["map", "str", ["slice", "i64"]]), "").unwrap();
        let ty = Ty::parse(&e).unwrap();
        assert_eq!(
            ty,
            Ty::Map(Box::new(Ty::Str), Box::new(Ty::Slice(Box::new(Ty::I64))))
        );
        assert_eq!(Ty::parse(&ty.to_expr()).unwrap(), ty);
    }

    #[test]
    fn nil_assigns_into_pointer_shapes_only() {
        assert!(assignable(&Ty::Ptr(Box::new(Ty::I64)), &Ty::Nil));
        assert!(assignable(&Ty::Slice(Box::new(Ty::I64)), &Ty::Nil));
        assert!(!assignable(&Ty::I64, &Ty::Nil));
    }
}
