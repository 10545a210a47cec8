use serde_json::Value;

/// An S-expression node of a Strand module body.
///
/// JSON numbers parse to `Int`/`Float`, JSON strings to `Ident` (string
/// literals are spelled `["str", text]`), JSON arrays to `List`, and JSON
/// `null` to the `nil` identifier. Each node carries the JSON pointer of
/// its position in the source document.
#[derive(Debug, Clone)]
pub enum Expr {
    Int { value: i64, ptr: String },
    Float { value: f64, ptr: String },
    Ident { name: String, ptr: String },
    List { items: Vec<Expr>, ptr: String },
}

impl Expr {
    pub fn ptr(&self) -> &str {
        match self {
            Expr::Int { ptr, .. }
            | Expr::Float { ptr, .. }
            | Expr::Ident { ptr, .. }
            | Expr::List { ptr, .. } => ptr,
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[Expr]> {
        match self {
            Expr::List { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Head identifier of a list form, e.g. `Some("if")` for `["if", …]`.
    pub fn head(&self) -> Option<&str> {
        self.items().and_then(|items| items.first()).and_then(Expr::as_ident)
    }

    pub fn is_nil(&self) -> bool {
        self.as_ident() == Some("nil")
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Int { value: a, .. }, Expr::Int { value: b, .. }) => a == b,
            (Expr::Float { value: a, .. }, Expr::Float { value: b, .. }) => a == b,
            (Expr::Ident { name: a, .. }, Expr::Ident { name: b, .. }) => a == b,
            (Expr::List { items: a, .. }, Expr::List { items: b, .. }) => a == b,
            _ => false,
        }
    }
}

pub fn ident(name: impl Into<String>) -> Expr {
    Expr::Ident {
        name: name.into(),
        ptr: String::new(),
    }
}

pub fn int(value: i64) -> Expr {
    Expr::Int {
        value,
        ptr: String::new(),
    }
}

pub fn list(items: Vec<Expr>) -> Expr {
    Expr::List {
        items,
        ptr: String::new(),
    }
}

/// `["block", …]`, the only statement-list carrier in the language.
pub fn block(stmts: Vec<Expr>) -> Expr {
    let mut items = vec![ident("block")];
    items.extend(stmts);
    list(items)
}

pub fn expr_from_json(v: &Value, ptr: &str) -> Result<Expr, String> {
    match v {
        Value::Null => Ok(Expr::Ident {
            name: "nil".to_string(),
            ptr: ptr.to_string(),
        }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Expr::Int {
                    value: i,
                    ptr: ptr.to_string(),
                })
            } else if let Some(f) = n.as_f64() {
                Ok(Expr::Float {
                    value: f,
                    ptr: ptr.to_string(),
                })
            } else {
                Err(format!("unrepresentable number at {ptr}: {n}"))
            }
        }
        Value::String(s) => Ok(Expr::Ident {
            name: s.to_string(),
            ptr: ptr.to_string(),
        }),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(expr_from_json(item, &format!("{ptr}/{i}"))?);
            }
            Ok(Expr::List {
                items: out,
                ptr: ptr.to_string(),
            })
        }
        _ => Err(format!("unsupported JSON value in body at {ptr}: {v}")),
    }
}

pub fn expr_to_value(e: &Expr) -> Value {
    match e {
        Expr::Int { value, .. } => Value::from(*value),
        Expr::Float { value, .. } => Value::from(*value),
        Expr::Ident { name, .. } => Value::from(name.as_str()),
        Expr::List { items, .. } => Value::Array(items.iter().map(expr_to_value).collect()),
    }
}
