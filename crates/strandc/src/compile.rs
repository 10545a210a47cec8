//! Whole-program compilation.
//!
//! Loads the module closure of a package path (or a `...` pattern),
//! type-checks it, colors the call graph from the yield instantiations,
//! and rewrites every colored procedure. For each module holding colored
//! procedures, two files are written: the original re-emitted without the
//! durable tag, and a `_durable` sibling carrying the rewritten
//! declarations under the durable tag. Modules that cannot be mutated
//! safely are rejected; builtin std modules are vendored into `stdroot/`
//! first.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::ast::Expr;
use crate::callgraph::{color_functions, ColorTable};
use crate::diagnostics::{render, Severity};
use crate::dispatch::{compile_func_decl, RewriteScope};
use crate::modfile::{
    module_to_string, parse_module_json, Decl, Import, ModuleFile, DURABLE_TAG, STRAND_MODULE,
};
use crate::project::{self, Manifest, ModuleLocation};
use crate::typecheck::{typecheck_modules, FuncId, Sigs, TypeInfo};
use crate::unsupported::unsupported;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Parse,
    Typing,
    Unsupported,
    MixedYieldTypes,
    Unvendored,
    ConflictingImport,
    Io,
    Internal,
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompilerError {
    pub fn new(kind: CompileErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CompilerError {}

#[derive(Debug, Default)]
pub struct CompileReport {
    pub written: Vec<PathBuf>,
    pub colored_functions: usize,
}

struct LoadedModule {
    file: ModuleFile,
    path: Option<PathBuf>,
    builtin: bool,
}

/// Compiles coroutines in a module tree.
///
/// The path can name a package directory within the project, a single
/// module file, or a recursive pattern (`dir/...`); the nearest enclosing
/// manifest defines the project.
pub fn compile(path: &str) -> Result<CompileReport, CompilerError> {
    let (dir, recursive) = split_pattern(path);
    let abs = dir.canonicalize().map_err(|e| {
        CompilerError::new(
            CompileErrorKind::Parse,
            format!("{}: {e}", dir.display()),
        )
    })?;
    let abs = if abs.is_file() {
        abs.parent().map(Path::to_path_buf).unwrap_or(abs)
    } else {
        abs
    };

    info!("reading, parsing and type-checking");
    let (root, manifest) = project::find_module_root(&abs)?;
    let mut loaded = load_closure(&root, &manifest, &abs, recursive)?;

    let mut sigs = Sigs::default();
    for lm in loaded.values() {
        sigs.add_module(&lm.file);
    }
    let files: Vec<&ModuleFile> = loaded.values().map(|lm| &lm.file).collect();
    let (type_info, diags) = typecheck_modules(&files, &sigs);
    if diags.iter().any(|d| d.severity == Severity::Error) {
        return Err(CompilerError::new(CompileErrorKind::Typing, render(&diags)));
    }

    if !loaded.values().any(|lm| lm.file.imports_module(STRAND_MODULE)) {
        info!("{STRAND_MODULE} not imported by the module. Nothing to do");
        return Ok(CompileReport::default());
    }

    info!("coloring functions");
    let colors = color_functions(&files, &type_info)?;
    if colors.is_empty() {
        info!("no yielding procedures found");
        return Ok(CompileReport::default());
    }

    let colored_modules = group_by_module(&colors, &sigs)?;

    // Before mutating modules, make sure every one of them lives where a
    // mutation is safe: inside the project, inside ./vendor, or (for
    // builtin std modules) copied into ./stdroot first.
    let mut vendored_std = false;
    for module_id in colored_modules.keys() {
        let lm = loaded.get_mut(module_id).ok_or_else(|| {
            CompilerError::new(
                CompileErrorKind::Internal,
                format!("colored module {module_id:?} was never loaded"),
            )
        })?;
        if lm.builtin {
            if !vendored_std {
                info!("vendoring std modules");
                vendored_std = true;
            }
            let src = crate::builtins::builtin_module_source(module_id).ok_or_else(|| {
                CompilerError::new(
                    CompileErrorKind::Internal,
                    format!("builtin module {module_id:?} has no source"),
                )
            })?;
            lm.path = Some(project::vendor_std_module(&root, module_id, src)?);
            continue;
        }
        let path = lm.path.as_ref().ok_or_else(|| {
            CompilerError::new(
                CompileErrorKind::Internal,
                format!("module {module_id:?} has no source path"),
            )
        })?;
        if !path.starts_with(&root) {
            return Err(CompilerError::new(
                CompileErrorKind::Unvendored,
                format!(
                    "cannot mutate module {module_id} ({}) safely; vendor dependencies under {}",
                    path.display(),
                    root.join(project::VENDOR_DIR).display()
                ),
            ));
        }
    }

    let known_modules: BTreeSet<String> = loaded.keys().cloned().collect();
    let mut report = CompileReport {
        written: Vec::new(),
        colored_functions: colors.iter().count(),
    };
    for (module_id, _) in &colored_modules {
        let lm = &loaded[module_id];
        let written = compile_module(lm, &colors, &type_info, &known_modules)?;
        report.written.extend(written);
    }

    info!("done");
    Ok(report)
}

fn split_pattern(path: &str) -> (PathBuf, bool) {
    match path.strip_suffix("...") {
        Some(prefix) => {
            let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
            let prefix = if prefix.is_empty() { "." } else { prefix };
            (PathBuf::from(prefix), true)
        }
        None => (PathBuf::from(path), false),
    }
}

fn load_closure(
    root: &Path,
    manifest: &Manifest,
    dir: &Path,
    recursive: bool,
) -> Result<BTreeMap<String, LoadedModule>, CompilerError> {
    let mut loaded: BTreeMap<String, LoadedModule> = BTreeMap::new();
    let mut queue: Vec<String> = Vec::new();

    for path in project::module_files_under(dir, recursive) {
        let file = project::load_module_file(&path)?;
        queue.extend(file.imports.iter().map(|i| i.module.clone()));
        let id = file.module_id.clone();
        let prev = loaded.insert(
            id.clone(),
            LoadedModule {
                file,
                path: Some(path.clone()),
                builtin: false,
            },
        );
        if let Some(prev) = prev {
            return Err(CompilerError::new(
                CompileErrorKind::Parse,
                format!(
                    "module {id:?} is defined by both {} and {}",
                    prev.path.as_deref().unwrap_or(Path::new("<builtin>")).display(),
                    path.display()
                ),
            ));
        }
    }

    while let Some(id) = queue.pop() {
        if loaded.contains_key(&id) {
            continue;
        }
        match project::resolve_import(root, manifest, &id) {
            Some(ModuleLocation::File(path)) => {
                let file = project::load_module_file(&path)?;
                queue.extend(file.imports.iter().map(|i| i.module.clone()));
                loaded.insert(
                    id,
                    LoadedModule {
                        file,
                        path: Some(path),
                        builtin: false,
                    },
                );
            }
            Some(ModuleLocation::Builtin(src)) => {
                let file = parse_module_json(src).map_err(|msg| {
                    CompilerError::new(
                        CompileErrorKind::Internal,
                        format!("builtin module {id:?}: {msg}"),
                    )
                })?;
                queue.extend(file.imports.iter().map(|i| i.module.clone()));
                loaded.insert(
                    id,
                    LoadedModule {
                        file,
                        path: None,
                        builtin: true,
                    },
                );
            }
            None => {
                return Err(CompilerError::new(
                    CompileErrorKind::Parse,
                    format!("unknown module: {id:?}"),
                ))
            }
        }
    }
    Ok(loaded)
}

fn group_by_module(
    colors: &ColorTable,
    sigs: &Sigs,
) -> Result<BTreeMap<String, Vec<FuncId>>, CompilerError> {
    let mut out: BTreeMap<String, Vec<FuncId>> = BTreeMap::new();
    for (id, _) in colors.iter() {
        let module = match id {
            FuncId::Decl(name) => sigs
                .fns
                .get(name)
                .map(|s| s.module.clone())
                .ok_or_else(|| {
                    CompilerError::new(
                        CompileErrorKind::Internal,
                        format!("colored function {name:?} has no signature"),
                    )
                })?,
            FuncId::Lit { module, .. } => module.clone(),
        };
        out.entry(module).or_default().push(id.clone());
    }
    Ok(out)
}

fn compile_module(
    lm: &LoadedModule,
    colors: &ColorTable,
    type_info: &TypeInfo,
    known_modules: &BTreeSet<String>,
) -> Result<Vec<PathBuf>, CompilerError> {
    let original = &lm.file;
    let module_id = original.module_id.as_str();
    info!("compiling module {module_id}");
    let src_path = lm.path.as_ref().ok_or_else(|| {
        CompilerError::new(
            CompileErrorKind::Internal,
            format!("module {module_id:?} has no mutable location"),
        )
    })?;

    let mut gen_decls: Vec<Decl> = Vec::new();
    let mut scope = RewriteScope::new(type_info, colors, module_id);
    for decl in &original.decls {
        match decl {
            Decl::Struct(_) => gen_decls.push(decl.clone()),
            Decl::Func(f) => match colors.decl(&f.name) {
                None => gen_decls.push(decl.clone()),
                Some(color) => {
                    unsupported(f)?;
                    info!("compiling function {module_id} {}", f.name);
                    let compiled = compile_func_decl(&mut scope, f, color)?;
                    gen_decls.push(Decl::Func(compiled));
                    for s in scope.struct_decls.drain(..) {
                        gen_decls.push(Decl::Struct(s));
                    }
                }
            },
        }
    }

    let mut tags = original.tags.clone();
    if !tags.iter().any(|t| t == DURABLE_TAG) {
        tags.push(DURABLE_TAG.to_string());
    }
    let mut gen = ModuleFile {
        schema_version: original.schema_version.clone(),
        module_id: original.module_id.clone(),
        imports: original.imports.clone(),
        tags,
        decls: gen_decls,
    };
    synthesize_imports(&mut gen, known_modules)?;

    // The original is re-emitted without the durable tag so only one of
    // the two files is selected by any given build.
    let mut orig_out = original.clone();
    orig_out.tags.retain(|t| t != DURABLE_TAG);

    let gen_path = project::durable_output_path(src_path);
    write_file(src_path, &module_to_string(&orig_out))?;
    write_file(&gen_path, &module_to_string(&gen))?;
    Ok(vec![src_path.clone(), gen_path])
}

fn write_file(path: &Path, contents: &str) -> Result<(), CompilerError> {
    std::fs::write(path, contents).map_err(|e| {
        CompilerError::new(CompileErrorKind::Io, format!("write {}: {e}", path.display()))
    })
}

/// Ensures every module referenced by a qualified name in the generated
/// declarations appears in the import list exactly once. Binding two
/// modules to one local name is an error.
fn synthesize_imports(
    gen: &mut ModuleFile,
    known_modules: &BTreeSet<String>,
) -> Result<(), CompilerError> {
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    for decl in &gen.decls {
        if let Decl::Func(f) = decl {
            for stmt in &f.body {
                collect_module_refs(stmt, known_modules, &mut referenced);
            }
        }
    }
    referenced.insert(STRAND_MODULE.to_string());
    referenced.remove(&gen.module_id);

    let mut bound: BTreeMap<String, String> = BTreeMap::new();
    for import in &gen.imports {
        let local = import.local_name().to_string();
        if let Some(prev) = bound.get(&local) {
            if *prev != import.module {
                return Err(conflicting_import(&local, prev, &import.module));
            }
        }
        bound.insert(local, import.module.clone());
    }
    for module in referenced {
        if let Some(prev) = bound.get(&module) {
            if *prev != module {
                return Err(conflicting_import(&module, prev, &module));
            }
            continue;
        }
        if gen.imports.iter().any(|i| i.module == module) {
            continue;
        }
        bound.insert(module.clone(), module.clone());
        gen.imports.push(Import {
            module,
            alias: None,
        });
    }
    Ok(())
}

fn conflicting_import(local: &str, first: &str, second: &str) -> CompilerError {
    CompilerError::new(
        CompileErrorKind::ConflictingImport,
        format!("import name {local:?} is bound to both {first:?} and {second:?}"),
    )
}

fn collect_module_refs(e: &Expr, known: &BTreeSet<String>, out: &mut BTreeSet<String>) {
    match e {
        Expr::Ident { name, .. } if name.contains('.') => {
            if let Some(module) = owning_module(name, known) {
                out.insert(module);
            }
        }
        Expr::List { items, .. } => {
            for item in items {
                collect_module_refs(item, known, out);
            }
        }
        _ => {}
    }
}

/// Longest known module id that is a proper dotted prefix of `name`.
fn owning_module(name: &str, known: &BTreeSet<String>) -> Option<String> {
    let mut best: Option<&str> = None;
    for id in known {
        if name.len() > id.len()
            && name.starts_with(id)
            && name.as_bytes()[id.len()] == b'.'
            && best.map_or(true, |b| id.len() > b.len())
        {
            best = Some(id);
        }
    }
    if best.is_none() && name.starts_with(&format!("{STRAND_MODULE}.")) {
        return Some(STRAND_MODULE.to_string());
    }
    best.map(str::to_string)
}
