//! Package path rewriting: hash every owned import path, move the package
//! directories and rewrite every import spec that names them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ObfuscateError, ObfuscateResult};
use crate::hasher::{encrypt_components, Hasher};
use crate::syntax::SourceUnit;
use crate::workspace::{load_headers, write_units, Ownership, PackageRecord, PackageSet, Workspace};

/// Old import path -> new import path, computed before anything moves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PathPlan {
    moves: BTreeMap<String, String>,
}

impl PathPlan {
    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.moves.insert(old.into(), new.into());
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.moves.get(old).map(String::as_str)
    }

    /// Reverse lookup: the import path a package had before the move.
    pub fn original_of(&self, new: &str) -> Option<&str> {
        self.moves.iter().find(|(_, n)| n.as_str() == new).map(|(old, _)| old.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.moves.iter().map(|(old, new)| (old.as_str(), new.as_str()))
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn merge(&mut self, other: PathPlan) {
        self.moves.extend(other.moves);
    }
}

/// Plan a new path for every owned non-root package.
pub fn plan_package_paths(set: &PackageSet, hasher: &dyn Hasher) -> ObfuscateResult<PathPlan> {
    let mut plan = PathPlan::default();
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();
    for record in set.iter().filter(|r| r.ownership == Ownership::Owned) {
        let new = encrypt_components(&record.import_path, hasher);
        if let Some(first) = claimed.insert(new.clone(), record.import_path.clone()) {
            return Err(ObfuscateError::PlanCollision {
                first,
                second: record.import_path.clone(),
                name: new,
            });
        }
        plan.insert(record.import_path.clone(), new);
    }
    check_destinations(set, &plan)?;
    Ok(plan)
}

/// A destination may not be a package that stays where it is.
pub(crate) fn check_destinations(set: &PackageSet, plan: &PathPlan) -> ObfuscateResult<()> {
    for (old, new) in plan.iter() {
        if let Some(existing) = set.get(new) {
            if plan.get(new).is_none() {
                return Err(ObfuscateError::PlanCollision {
                    first: old.to_string(),
                    second: existing.import_path.clone(),
                    name: new.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn quote(path: &str) -> String {
    format!("\"{path}\"")
}

fn rewrite_imports(unit: &mut SourceUnit, importer: &str, set: &PackageSet, plan: &PathPlan) -> usize {
    let edits: Vec<(usize, String)> = unit
        .imports
        .iter()
        .filter_map(|imp| {
            let target = set.resolve_import(importer, &imp.path)?;
            plan.get(&target.import_path).map(|new| (imp.path_token, quote(new)))
        })
        .collect();
    let count = edits.len();
    for (token, text) in edits {
        unit.replace_token(token, text);
    }
    count
}

/// Move the files of one package. Subdirectories stay: they are other
/// packages, planned on their own, or `vendor/` trees handled by
/// [`carry_vendor_dirs`].
fn move_package(ws: &Workspace, old: &str, new: &str) -> ObfuscateResult<()> {
    let from = ws.package_dir(old);
    let to = ws.package_dir(new);
    fs::create_dir_all(&to).map_err(|e| ObfuscateError::io(&to, e))?;
    for entry in fs::read_dir(&from).map_err(|e| ObfuscateError::io(&from, e))? {
        let entry = entry.map_err(|e| ObfuscateError::io(&from, e))?;
        let file_type = entry.file_type().map_err(|e| ObfuscateError::io(entry.path(), e))?;
        if file_type.is_file() {
            let dest = to.join(entry.file_name());
            fs::rename(entry.path(), &dest).map_err(|e| ObfuscateError::io(entry.path(), e))?;
        }
    }
    debug!(from = %old, to = %new, "moved package");
    Ok(())
}

/// Directory whose `vendor/` holds `import_path`; `""` for `src/vendor`.
fn vendor_owner(import_path: &str) -> Option<&str> {
    if import_path.starts_with("vendor/") {
        return Some("");
    }
    import_path.find("/vendor/").map(|at| &import_path[..at])
}

fn within(import_path: &str, dir: &str) -> bool {
    import_path == dir || import_path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

fn copy_tree(from: &Path, to: &Path) -> ObfuscateResult<()> {
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(|e| ObfuscateError::Workspace(format!("failed to walk {}: {e}", from.display())))?;
        let Ok(rel) = entry.path().strip_prefix(from) else { continue };
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| ObfuscateError::io(&dest, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest).map_err(|e| ObfuscateError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Give every moved package the `vendor/` trees it could see before the move.
///
/// Hashing is per component, so a moved package below `owner` lands below the
/// hashed `owner`, and the tree is copied there. The original tree is removed
/// once no package that stays below `owner` can use it. `src/vendor` is
/// visible from everywhere and never moves.
fn carry_vendor_dirs(ws: &Workspace, set: &PackageSet, plan: &PathPlan) -> ObfuscateResult<()> {
    let owners: BTreeSet<&str> = set
        .iter()
        .filter(|r| r.ownership == Ownership::Vendored)
        .filter_map(|r| vendor_owner(&r.import_path))
        .filter(|owner| !owner.is_empty())
        .collect();
    for owner in owners {
        let from = ws.package_dir(owner).join("vendor");
        if !from.is_dir() {
            continue;
        }
        let depth = owner.split('/').count();
        let targets: BTreeSet<String> = plan
            .iter()
            .filter(|(old, _)| within(old, owner))
            .map(|(_, new)| new.split('/').take(depth).collect::<Vec<_>>().join("/"))
            .collect();
        if targets.is_empty() || targets.contains(owner) {
            continue;
        }
        for target in &targets {
            let to = ws.package_dir(target).join("vendor");
            if to.exists() {
                continue;
            }
            copy_tree(&from, &to)?;
            debug!(from = %owner, to = %target, "copied vendor directory");
        }
        let still_used = set.iter().any(|r| {
            r.ownership != Ownership::Vendored && plan.get(&r.import_path).is_none() && within(&r.import_path, owner)
        });
        if !still_used {
            fs::remove_dir_all(&from).map_err(|e| ObfuscateError::io(&from, e))?;
            debug!(owner = %owner, "removed vendor directory left behind");
        }
    }
    Ok(())
}

/// Remove directories left empty under `src` after the moves.
fn prune_empty_dirs(ws: &Workspace) {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(ws.src_dir()).min_depth(1).contents_first(true) {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => dirs.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "skipping unreadable entry while pruning"),
        }
    }
    for dir in dirs {
        let empty = match fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "skipping unreadable directory while pruning");
                false
            }
        };
        if empty {
            if let Err(e) = fs::remove_dir(&dir) {
                debug!(path = %dir.display(), error = %e, "failed to prune empty directory");
            }
        }
    }
}

/// Rewrite imports everywhere, then move the planned packages.
///
/// Moved packages also lose their `// import "..."` comment, which would pin
/// the old path.
pub fn apply_path_plan(ws: &Workspace, set: &PackageSet, plan: &PathPlan) -> ObfuscateResult<usize> {
    if plan.is_empty() {
        return Ok(0);
    }
    let records: Vec<&PackageRecord> = set.iter().collect();
    let mut units = load_headers(&records)?;

    let mut rewritten = 0;
    for (record, units) in records.iter().zip(units.iter_mut()) {
        let moving = plan.get(&record.import_path).is_some();
        for unit in units.iter_mut() {
            rewritten += rewrite_imports(unit, &record.import_path, set, plan);
            if let (true, Some(comment)) = (moving, unit.package.import_comment) {
                unit.replace_token(comment, "");
            }
        }
    }
    write_units(units.iter().flatten())?;

    carry_vendor_dirs(ws, set, plan)?;
    for (old, new) in plan.iter() {
        move_package(ws, old, new)?;
    }
    prune_empty_dirs(ws);
    Ok(rewritten)
}

/// Plan and apply the package path rewrite for the whole workspace.
pub fn obfuscate_package_names(
    ws: &Workspace,
    set: &PackageSet,
    hasher: &dyn Hasher,
) -> ObfuscateResult<PathPlan> {
    let plan = plan_package_paths(set, hasher)?;
    let rewritten = apply_path_plan(ws, set, &plan)?;
    info!(packages = plan.len(), imports = rewritten, "obfuscated package paths");
    Ok(plan)
}
