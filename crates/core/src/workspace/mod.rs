//! Isolated GOPATH workspace owned by one run, and the package records found in it.

pub mod replicate;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{ObfuscateError, ObfuscateResult};
use crate::syntax::SourceUnit;

/// Root directory of a run, laid out as `<root>/src/<import path>/*.go`.
///
/// A temporary workspace is removed when dropped. A persisted one (created for
/// `--outdir`) is removed too unless [`Workspace::keep`] was called, so a failed
/// run leaves nothing at the destination.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    temp: Option<TempDir>,
    discard: bool,
}

impl Workspace {
    /// Fresh temporary workspace.
    pub fn create() -> ObfuscateResult<Self> {
        let temp = tempfile::Builder::new()
            .prefix("gobfuscate-")
            .tempdir()
            .map_err(|e| ObfuscateError::Workspace(format!("failed to create temp dir: {e}")))?;
        Ok(Self { root: temp.path().to_path_buf(), temp: Some(temp), discard: false })
    }

    /// Workspace at `path`, which must not exist yet.
    pub fn persist(path: &Path) -> ObfuscateResult<Self> {
        fs::create_dir(path).map_err(|e| {
            ObfuscateError::Workspace(format!(
                "failed to create destination {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { root: path.to_path_buf(), temp: None, discard: true })
    }

    /// Existing workspace directory (not removed on drop).
    pub fn open(path: &Path) -> ObfuscateResult<Self> {
        if !path.is_dir() {
            return Err(ObfuscateError::Workspace(format!(
                "workspace does not exist: {}",
                path.display()
            )));
        }
        Ok(Self { root: path.to_path_buf(), temp: None, discard: false })
    }

    /// Leave a persisted workspace in place when this value is dropped.
    pub fn keep(&mut self) {
        self.discard = false;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn package_dir(&self, import_path: &str) -> PathBuf {
        import_path.split('/').fold(self.src_dir(), |dir, segment| dir.join(segment))
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.discard {
            return;
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "removed unfinished workspace"),
            Err(e) => warn!(path = %self.root.display(), error = %e, "failed to remove unfinished workspace"),
        }
    }
}

/// Who a package belongs to, which decides what may be rewritten in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// The program being obfuscated.
    Root,
    Owned,
    /// Inside a `vendor/` directory.
    Vendored,
    /// Matches a configured foreign prefix.
    Foreign,
}

/// One package directory of the workspace.
#[derive(Debug, Clone, Serialize)]
pub struct PackageRecord {
    pub import_path: String,
    pub dir: PathBuf,
    /// Package clause name (ignoring the external `_test` package).
    pub name: String,
    pub go_files: Vec<PathBuf>,
    /// Import paths of workspace packages this one imports, after vendor lookup.
    pub imports: BTreeSet<String>,
    pub has_cgo: bool,
    pub has_asm: bool,
    pub ownership: Ownership,
}

impl PackageRecord {
    pub fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Root | Ownership::Owned)
    }

    /// Owned and free of cgo and assembly, whose symbols are bound outside Go.
    pub fn symbols_renamable(&self) -> bool {
        self.is_owned() && !self.has_cgo && !self.has_asm
    }
}

/// Every package of a workspace, keyed by import path.
#[derive(Debug, Clone, Default)]
pub struct PackageSet {
    root: String,
    packages: BTreeMap<String, PackageRecord>,
}

impl PackageSet {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, import_path: &str) -> Option<&PackageRecord> {
        self.packages.get(import_path)
    }

    pub fn contains(&self, import_path: &str) -> bool {
        self.packages.contains_key(import_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Resolve `import` as seen from package `importer`, honouring `vendor/`
    /// directories of the importer and its ancestors.
    pub fn resolve_import(&self, importer: &str, import: &str) -> Option<&PackageRecord> {
        vendor_candidates(importer, import).into_iter().find_map(|candidate| self.packages.get(&candidate))
    }
}

/// Import paths to try for `import` from `importer`, nearest vendor directory first.
pub fn vendor_candidates(importer: &str, import: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut dir = importer;
    while !dir.is_empty() {
        out.push(format!("{dir}/vendor/{import}"));
        dir = dir.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
    }
    out.push(format!("vendor/{import}"));
    out.push(import.to_string());
    out
}

pub fn is_vendored(import_path: &str) -> bool {
    import_path.split('/').any(|segment| segment == "vendor")
}

pub fn matches_prefix(import_path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    !prefix.is_empty()
        && (import_path == prefix
            || import_path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/')))
}

/// Directories the go tool never treats as packages.
fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name.starts_with('_') || name == "testdata")
}

fn import_path_of(src: &Path, dir: &Path) -> Option<String> {
    let rel = dir.strip_prefix(src).ok()?;
    let segments: Vec<String> =
        rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    (!segments.is_empty()).then(|| segments.join("/"))
}

#[derive(Default)]
struct DirScan {
    go_files: Vec<PathBuf>,
    has_asm: bool,
}

/// Walk `<workspace>/src` and build a record for every package directory.
pub fn discover_packages(ws: &Workspace, root: &str, foreign: &[String]) -> ObfuscateResult<PackageSet> {
    let src = ws.src_dir();
    if !src.is_dir() {
        return Err(ObfuscateError::Workspace(format!("no src directory in {}", ws.root().display())));
    }

    let mut dirs: BTreeMap<String, (PathBuf, DirScan)> = BTreeMap::new();
    let walker = WalkDir::new(&src).min_depth(1).sort_by_file_name().into_iter();
    for entry in walker.filter_entry(|e| !is_ignored_dir(e)) {
        let entry = entry.map_err(|e| {
            ObfuscateError::Workspace(format!("failed to walk {}: {e}", src.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let is_go = file_name.ends_with(".go");
        let is_asm = file_name.ends_with(".s") || file_name.ends_with(".S");
        if !is_go && !is_asm {
            continue;
        }
        let Some(dir) = entry.path().parent() else { continue };
        let Some(import_path) = import_path_of(&src, dir) else { continue };
        let (_, scan) = dirs.entry(import_path).or_insert_with(|| (dir.to_path_buf(), DirScan::default()));
        if is_go {
            scan.go_files.push(entry.path().to_path_buf());
        } else {
            scan.has_asm = true;
        }
    }

    let mut packages = BTreeMap::new();
    let mut raw_imports = BTreeMap::new();
    for (import_path, (dir, scan)) in dirs {
        if scan.go_files.is_empty() {
            continue;
        }
        let headers = scan
            .go_files
            .iter()
            .map(|path| SourceUnit::read_header(path))
            .collect::<ObfuscateResult<Vec<_>>>()?;

        let name = package_name(&import_path, &headers);
        let has_cgo = headers.iter().any(SourceUnit::has_cgo);
        let imports: BTreeSet<String> =
            headers.iter().flat_map(|u| u.imports.iter().map(|i| i.path.clone())).collect();

        let ownership = if import_path == root {
            Ownership::Root
        } else if is_vendored(&import_path) {
            Ownership::Vendored
        } else if foreign.iter().any(|prefix| matches_prefix(&import_path, prefix)) {
            Ownership::Foreign
        } else {
            Ownership::Owned
        };
        debug!(package = %import_path, ?ownership, files = scan.go_files.len(), "discovered package");

        raw_imports.insert(import_path.clone(), imports);
        packages.insert(
            import_path.clone(),
            PackageRecord {
                import_path,
                dir,
                name,
                go_files: scan.go_files,
                imports: BTreeSet::new(),
                has_cgo,
                has_asm: scan.has_asm,
                ownership,
            },
        );
    }

    let mut set = PackageSet { root: root.to_string(), packages };
    let resolved: BTreeMap<String, BTreeSet<String>> = raw_imports
        .into_iter()
        .map(|(importer, imports)| {
            let keys = imports
                .iter()
                .filter_map(|imp| set.resolve_import(&importer, imp))
                .map(|record| record.import_path.clone())
                .collect();
            (importer, keys)
        })
        .collect();
    for (importer, keys) in resolved {
        if let Some(record) = set.packages.get_mut(&importer) {
            record.imports = keys;
        }
    }
    Ok(set)
}

fn package_name(import_path: &str, headers: &[SourceUnit]) -> String {
    headers
        .iter()
        .filter(|u| !u.is_test())
        .chain(headers.iter())
        .map(|u| u.package.name.as_str())
        .find(|name| !name.ends_with("_test"))
        .or_else(|| headers.first().map(|u| u.package.name.trim_end_matches("_test")))
        .map(str::to_string)
        .unwrap_or_else(|| import_path.rsplit('/').next().unwrap_or(import_path).to_string())
}

/// Parse every `.go` file of `records` on the rayon pool; one vector per record.
pub fn load_units(records: &[&PackageRecord]) -> ObfuscateResult<Vec<Vec<SourceUnit>>> {
    load_with(records, SourceUnit::read)
}

/// Like [`load_units`] but only the package clause and imports are parsed.
pub fn load_headers(records: &[&PackageRecord]) -> ObfuscateResult<Vec<Vec<SourceUnit>>> {
    load_with(records, SourceUnit::read_header)
}

fn load_with(
    records: &[&PackageRecord],
    read: fn(&Path) -> ObfuscateResult<SourceUnit>,
) -> ObfuscateResult<Vec<Vec<SourceUnit>>> {
    let jobs: Vec<(usize, &PathBuf)> = records
        .iter()
        .enumerate()
        .flat_map(|(i, record)| record.go_files.iter().map(move |path| (i, path)))
        .collect();
    let parsed = jobs
        .par_iter()
        .map(|(i, path)| read(path).map(|unit| (*i, unit)))
        .collect::<ObfuscateResult<Vec<_>>>()?;

    let mut out: Vec<Vec<SourceUnit>> = records.iter().map(|_| Vec::new()).collect();
    for (i, unit) in parsed {
        out[i].push(unit);
    }
    Ok(out)
}

/// Write back every modified unit at its own path. Returns the number written.
pub fn write_units<'a>(units: impl IntoIterator<Item = &'a SourceUnit>) -> ObfuscateResult<usize> {
    let mut written = 0;
    for unit in units.into_iter().filter(|u| u.is_dirty()) {
        unit.write_to(&unit.path)?;
        written += 1;
    }
    Ok(written)
}
