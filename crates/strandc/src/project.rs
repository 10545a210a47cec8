//! Project manifests, module discovery, and import resolution.
//!
//! A Strand project is the directory tree under the nearest `strand.json`
//! manifest. Modules resolve by path convention: module id `std.iter`
//! lives at `std/iter.strand.json` under one of the manifest's roots, the
//! `vendor/` tree for third-party modules, or the `stdroot/` tree for
//! builtin std modules vendored before mutation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::builtins;
use crate::compile::{CompileErrorKind, CompilerError};
use crate::modfile::{parse_module_json, ModuleFile, DURABLE_SUFFIX, MODULE_EXT};

pub const PROJECT_MANIFEST: &str = "strand.json";
pub const PROJECT_SCHEMA_VERSION: &str = "strand.project@0.1.0";
pub const VENDOR_DIR: &str = "vendor";
pub const STDROOT_DIR: &str = "stdroot";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub module: String,
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,
}

fn default_roots() -> Vec<String> {
    vec![".".to_string()]
}

/// Walks upward from `start` to the nearest directory holding a project
/// manifest.
pub fn find_module_root(start: &Path) -> Result<(PathBuf, Manifest), CompilerError> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let manifest_path = d.join(PROJECT_MANIFEST);
        if manifest_path.is_file() {
            let src = std::fs::read_to_string(&manifest_path).map_err(|e| {
                CompilerError::new(
                    CompileErrorKind::Io,
                    format!("read {}: {e}", manifest_path.display()),
                )
            })?;
            let manifest: Manifest = serde_json::from_str(&src).map_err(|e| {
                CompilerError::new(
                    CompileErrorKind::Parse,
                    format!("{}: {e}", manifest_path.display()),
                )
            })?;
            if manifest.schema_version != PROJECT_SCHEMA_VERSION {
                return Err(CompilerError::new(
                    CompileErrorKind::Parse,
                    format!(
                        "{}: unsupported schema_version {:?}",
                        manifest_path.display(),
                        manifest.schema_version
                    ),
                ));
            }
            return Ok((d.to_path_buf(), manifest));
        }
        dir = d.parent();
    }
    Err(CompilerError::new(
        CompileErrorKind::Parse,
        format!("{} is not part of a module (no {PROJECT_MANIFEST} found)", start.display()),
    ))
}

/// True for Strand source files, excluding generated `_durable` outputs.
pub fn is_module_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match name.strip_suffix(MODULE_EXT) {
        Some(stem) => !stem.ends_with(DURABLE_SUFFIX),
        None => false,
    }
}

pub fn module_files_under(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(dir).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    walker
        .into_iter()
        .filter_map(Result::ok)
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_module_file(p))
        .collect()
}

pub fn load_module_file(path: &Path) -> Result<ModuleFile, CompilerError> {
    let src = std::fs::read_to_string(path).map_err(|e| {
        CompilerError::new(CompileErrorKind::Io, format!("read {}: {e}", path.display()))
    })?;
    parse_module_json(&src).map_err(|msg| {
        CompilerError::new(
            CompileErrorKind::Parse,
            format!("{}: {msg}", path.display()),
        )
    })
}

pub enum ModuleLocation {
    File(PathBuf),
    Builtin(&'static str),
}

fn rel_path_for(id: &str) -> PathBuf {
    let mut p = PathBuf::new();
    for seg in id.split('.') {
        p.push(seg);
    }
    let file = format!(
        "{}{MODULE_EXT}",
        p.file_name().and_then(|n| n.to_str()).unwrap_or(id)
    );
    p.set_file_name(file);
    p
}

/// Resolves an import id against the project roots, the vendor tree, the
/// stdroot tree, and finally the builtin modules.
pub fn resolve_import(root: &Path, manifest: &Manifest, id: &str) -> Option<ModuleLocation> {
    let rel = rel_path_for(id);
    for r in &manifest.roots {
        let candidate = root.join(r).join(&rel);
        if candidate.is_file() {
            return Some(ModuleLocation::File(candidate));
        }
    }
    for tree in [VENDOR_DIR, STDROOT_DIR] {
        let candidate = root.join(tree).join(&rel);
        if candidate.is_file() {
            return Some(ModuleLocation::File(candidate));
        }
    }
    builtins::builtin_module_source(id).map(ModuleLocation::Builtin)
}

/// Copies a builtin std module into `<root>/stdroot/` so it can be mutated
/// without affecting other builds.
pub fn vendor_std_module(root: &Path, id: &str, src: &str) -> Result<PathBuf, CompilerError> {
    let path = root.join(STDROOT_DIR).join(rel_path_for(id));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CompilerError::new(
                CompileErrorKind::Io,
                format!("create {}: {e}", parent.display()),
            )
        })?;
    }
    std::fs::write(&path, src).map_err(|e| {
        CompilerError::new(CompileErrorKind::Io, format!("write {}: {e}", path.display()))
    })?;
    Ok(path)
}

/// `foo.strand.json` → `foo_durable.strand.json`, next to the original.
pub fn durable_output_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(MODULE_EXT).unwrap_or(name);
    path.with_file_name(format!("{stem}{DURABLE_SUFFIX}{MODULE_EXT}"))
}
