pub mod ast;
pub mod builtins;
pub mod callgraph;
pub mod compile;
pub mod decls;
pub mod desugar;
pub mod diagnostics;
pub mod dispatch;
pub mod modfile;
pub mod project;
pub mod typecheck;
pub mod types;
pub mod unsupported;

pub const STRANDC_VERSION: &str = env!("CARGO_PKG_VERSION");
