//! Copy the root package and everything it imports from the source GOPATHs.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ObfuscateError, ObfuscateResult};
use crate::syntax::SourceUnit;
use crate::workspace::{vendor_candidates, Workspace};

#[derive(Debug, Clone, Default)]
pub struct ReplicateOptions {
    /// Source GOPATH roots, searched in order.
    pub gopaths: Vec<PathBuf>,
    /// Copy `_test.go` files as well.
    pub keep_tests: bool,
}

/// `$GOPATH` (split like `PATH`) or `~/go`.
pub fn default_gopaths(env: &dyn Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    if let Some(gopath) = env("GOPATH").filter(|v| !v.is_empty()) {
        return std::env::split_paths(&gopath).collect();
    }
    env("HOME").map(|home| vec![PathBuf::from(home).join("go")]).unwrap_or_default()
}

fn has_go_files(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|e| {
                e.file_type().map(|t| t.is_file()).unwrap_or(false)
                    && e.file_name().to_string_lossy().ends_with(".go")
            })
        })
        .unwrap_or(false)
}

fn locate(gopaths: &[PathBuf], importer: &str, import: &str) -> Option<(String, PathBuf)> {
    let candidates = vendor_candidates(importer, import);
    gopaths.iter().find_map(|gopath| {
        let src = gopath.join("src");
        candidates.iter().find_map(|candidate| {
            let dir = candidate.split('/').fold(src.clone(), |dir, segment| dir.join(segment));
            has_go_files(&dir).then(|| (candidate.clone(), dir))
        })
    })
}

/// Copy the regular files of one package directory; returns the imports of the copied units.
fn copy_package(source: &Path, dest: &Path, keep_tests: bool) -> ObfuscateResult<BTreeSet<String>> {
    fs::create_dir_all(dest).map_err(|e| ObfuscateError::io(dest, e))?;
    let mut imports = BTreeSet::new();
    for entry in WalkDir::new(source).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ObfuscateError::Workspace(format!("failed to read {}: {e}", source.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !keep_tests && name.ends_with("_test.go") {
            continue;
        }
        let target = dest.join(&name);
        fs::copy(entry.path(), &target).map_err(|e| ObfuscateError::io(entry.path(), e))?;
        if name.ends_with(".go") {
            let header = SourceUnit::read_header(&target)?;
            imports.extend(header.imports.into_iter().map(|imp| imp.path));
        }
    }
    Ok(imports)
}

/// Copy `root` and its transitive imports into `ws`.
///
/// Imports that no GOPATH provides are taken to be standard library or
/// otherwise external and are not copied. Returns the copied import paths in
/// visit order.
pub fn replicate(root: &str, ws: &Workspace, options: &ReplicateOptions) -> ObfuscateResult<Vec<String>> {
    let mut copied = Vec::new();
    let mut seen = HashSet::new();
    let mut requested = HashSet::new();
    let mut queue = VecDeque::from([(root.to_string(), String::new())]);

    while let Some((import, importer)) = queue.pop_front() {
        let Some((import_path, source)) = locate(&options.gopaths, &importer, &import) else {
            if import == root {
                let searched: Vec<String> =
                    options.gopaths.iter().map(|p| p.display().to_string()).collect();
                return Err(ObfuscateError::Workspace(format!(
                    "cannot find package {root} in GOPATH [{}]",
                    searched.join(", ")
                )));
            }
            debug!(%import, "not found in any GOPATH; leaving as external");
            continue;
        };
        if !seen.insert(import_path.clone()) {
            continue;
        }

        let imports = copy_package(&source, &ws.package_dir(&import_path), options.keep_tests)?;
        debug!(package = %import_path, from = %source.display(), "copied package");
        for next in imports {
            if next != "C" && requested.insert((next.clone(), import_path.clone())) {
                queue.push_back((next, import_path.clone()));
            }
        }
        copied.push(import_path);
    }

    info!(packages = copied.len(), "replicated source tree");
    Ok(copied)
}
