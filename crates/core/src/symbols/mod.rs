//! Scope-aware symbol renaming across every owned package.
//!
//! All units are parsed first, every identifier occurrence is bound to a
//! symbol key (or explicitly kept), one [`RenamePlan`] is built for the whole
//! workspace, and only then are tokens replaced. Each unit is written once.

pub mod plan;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{info, warn};

pub use plan::{RenameKey, RenamePlan};

use crate::error::{ObfuscateError, ObfuscateResult, UnresolvedReference};
use crate::hasher::{is_exported, match_visibility, Hasher};
use crate::pkgpath::PathPlan;
use crate::syntax::{DeclKind, IdentRole, SourceUnit, TypeExpr};
use crate::workspace::{load_units, write_units, PackageRecord, PackageSet};

/// Identifiers of Go's universe scope.
pub const UNIVERSE: &[&str] = &[
    "any", "append", "bool", "byte", "cap", "clear", "close", "comparable", "complex",
    "complex128", "complex64", "copy", "delete", "error", "false", "float32", "float64", "imag",
    "int", "int16", "int32", "int64", "int8", "iota", "len", "make", "max", "min", "new", "nil",
    "panic", "print", "println", "real", "recover", "rune", "string", "true", "uint", "uint16",
    "uint32", "uint64", "uint8", "uintptr",
];

const MAX_TYPE_DEPTH: usize = 32;

/// Names that must keep their spelling: bare `Name` or `import/path.Name`.
#[derive(Debug, Clone, Default)]
pub struct KeepList {
    names: HashSet<String>,
    qualified: HashSet<(String, String)>,
}

impl KeepList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            match entry.rsplit_once('.') {
                Some((package, name)) if !package.is_empty() && !name.is_empty() => {
                    list.qualified.insert((package.to_string(), name.to_string()));
                }
                _ if !entry.is_empty() => {
                    list.names.insert(entry.to_string());
                }
                _ => {}
            }
        }
        list
    }

    pub fn matches(&self, package: &str, name: &str) -> bool {
        self.names.contains(name) || self.qualified.contains(&(package.to_string(), name.to_string()))
    }
}

/// The units of one directory that share a package clause.
#[derive(Debug)]
pub struct CompiledPackage {
    /// Namespace part of every [`RenameKey`] declared here.
    pub namespace: String,
    pub import_path: String,
    /// Import path before the path rewrite, for keep-list matching.
    pub original_path: String,
    pub clause: String,
    pub renamable: bool,
    pub units: Vec<SourceUnit>,
}

/// Split a directory's units by package clause (the external `_test` package
/// gets its own namespace).
pub fn group_units(
    record: &PackageRecord,
    units: Vec<SourceUnit>,
    original_path: &str,
) -> Vec<CompiledPackage> {
    let mut by_clause: BTreeMap<String, Vec<SourceUnit>> = BTreeMap::new();
    for unit in units {
        by_clause.entry(unit.package.name.clone()).or_default().push(unit);
    }
    by_clause
        .into_iter()
        .map(|(clause, units)| {
            let namespace = if clause == record.name {
                record.import_path.clone()
            } else if clause == format!("{}_test", record.name) {
                format!("{}_test", record.import_path)
            } else {
                format!("{}#{clause}", record.import_path)
            };
            CompiledPackage {
                namespace,
                import_path: record.import_path.clone(),
                original_path: original_path.to_string(),
                clause,
                renamable: record.symbols_renamable(),
                units,
            }
        })
        .collect()
}

/// Best guess at the package name of an import that is not in the workspace.
pub fn guess_package_name(import_path: &str) -> String {
    let mut segments: Vec<&str> = import_path.split('/').collect();
    let mut last = segments.pop().unwrap_or(import_path);
    let is_major = |s: &str| s.len() > 1 && s.starts_with('v') && s[1..].chars().all(|c| c.is_ascii_digit());
    if is_major(last) {
        if let Some(prev) = segments.pop() {
            last = prev;
        }
    }
    if let Some((base, version)) = last.rsplit_once(".v") {
        if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()) {
            last = base;
        }
    }
    let last = last.strip_prefix("go-").or_else(|| last.strip_prefix("go.")).unwrap_or(last);
    let last = last.strip_suffix("-go").or_else(|| last.strip_suffix(".go")).unwrap_or(last);
    last.split(['-', '.']).next().unwrap_or(last).to_string()
}

/// `Test*`, `Benchmark*`, `Example*`, `Fuzz*` and `TestMain`.
pub fn is_test_entry(name: &str) -> bool {
    name == "TestMain"
        || ["Test", "Benchmark", "Example", "Fuzz"].iter().any(|prefix| {
            name.strip_prefix(prefix)
                .is_some_and(|rest| rest.chars().next().map_or(true, |c| !c.is_lowercase()))
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Symbol(RenameKey),
    Keep,
    /// Leave the occurrence alone and withdraw `poison` from the plan.
    Unresolved { reason: &'static str, poison: Vec<RenameKey> },
}

/// Import names visible in one unit.
#[derive(Debug, Default)]
struct FileScope {
    /// Local name -> loaded package index (`None` for packages outside the load set).
    imports: HashMap<String, Option<usize>>,
    dots: Vec<usize>,
}

#[derive(Debug, Default)]
struct Tables<'a> {
    decls: HashSet<&'a str>,
    /// Type name -> (underlying type, declaring unit).
    types: HashMap<&'a str, (&'a TypeExpr, usize)>,
}

#[derive(Debug, Clone, Copy)]
struct Ctx {
    pkg: usize,
    unit: usize,
}

/// Where names inside a type expression are looked up.
#[derive(Debug, Clone, Copy)]
struct TypeScope {
    pkg: usize,
    unit: usize,
    /// Function-local types of `unit` are visible (only at the literal itself).
    locals: bool,
}

struct Resolver<'a> {
    packages: &'a [CompiledPackage],
    tables: Vec<Tables<'a>>,
    files: Vec<Vec<FileScope>>,
}

impl<'a> Resolver<'a> {
    fn new(packages: &'a [CompiledPackage], set: &PackageSet) -> Self {
        let primary: HashMap<&str, usize> = packages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.namespace == p.import_path)
            .map(|(i, p)| (p.import_path.as_str(), i))
            .collect();

        let tables = packages
            .iter()
            .map(|pkg| {
                let mut tables = Tables::default();
                for (u, unit) in pkg.units.iter().enumerate() {
                    for decl in &unit.decls {
                        if !matches!(decl.kind, DeclKind::Method { .. }) && decl.name != "_" {
                            tables.decls.insert(decl.name.as_str());
                        }
                    }
                    for ty in &unit.types {
                        tables.types.insert(ty.name.as_str(), (&ty.underlying, u));
                    }
                }
                tables
            })
            .collect();

        let files = packages
            .iter()
            .map(|pkg| {
                pkg.units
                    .iter()
                    .map(|unit| file_scope(unit, &pkg.import_path, set, &primary))
                    .collect()
            })
            .collect();

        Self { packages, tables, files }
    }

    fn unit(&self, ctx: Ctx) -> &'a SourceUnit {
        &self.packages[ctx.pkg].units[ctx.unit]
    }

    fn key(&self, pkg: usize, name: &str) -> RenameKey {
        RenameKey::new(self.packages[pkg].namespace.clone(), name)
    }

    fn resolve(&self, ctx: Ctx, occ: usize) -> Binding {
        let occurrence = &self.unit(ctx).idents[occ];
        let name = occurrence.name.as_str();
        match &occurrence.role {
            IdentRole::PackageName | IdentRole::Label => Binding::Keep,
            IdentRole::PackageDecl | IdentRole::LocalDecl | IdentRole::Local => self.own(ctx, name),
            IdentRole::Free => self.free(ctx, name),
            IdentRole::MemberDecl => self.member(ctx, name),
            IdentRole::Selector { base } => match base.and_then(|b| self.qualifier(ctx, b)) {
                Some(target) => self.qualified(target, name),
                None => self.member(ctx, name),
            },
            IdentRole::Key { literal, local } => self.literal_key(ctx, literal.as_ref(), *local, name),
        }
    }

    /// A name of the current package namespace.
    fn own(&self, ctx: Ctx, name: &str) -> Binding {
        if name == "_" || !self.packages[ctx.pkg].renamable {
            Binding::Keep
        } else {
            Binding::Symbol(self.key(ctx.pkg, name))
        }
    }

    fn free(&self, ctx: Ctx, name: &str) -> Binding {
        if self.tables[ctx.pkg].decls.contains(name) {
            return self.own(ctx, name);
        }
        let file = &self.files[ctx.pkg][ctx.unit];
        if file.imports.contains_key(name) {
            return Binding::Keep;
        }
        if let Some(&dot) = file.dots.iter().find(|&&d| self.tables[d].decls.contains(name)) {
            return self.qualified(Some(dot), name);
        }
        if UNIVERSE.contains(&name) || name == "_" || !self.packages[ctx.pkg].renamable {
            return Binding::Keep;
        }
        Binding::Unresolved {
            reason: "not declared in the package, its imports or the universe",
            poison: vec![self.key(ctx.pkg, name)],
        }
    }

    /// Field, method or interface method name. Exported members stay.
    fn member(&self, ctx: Ctx, name: &str) -> Binding {
        if is_exported(name) {
            Binding::Keep
        } else {
            self.own(ctx, name)
        }
    }

    /// `Some(target)` when occurrence `base` names an imported package.
    fn qualifier(&self, ctx: Ctx, base: usize) -> Option<Option<usize>> {
        let occurrence = &self.unit(ctx).idents[base];
        if occurrence.role != IdentRole::Free || self.tables[ctx.pkg].decls.contains(occurrence.name.as_str()) {
            return None;
        }
        self.files[ctx.pkg][ctx.unit].imports.get(&occurrence.name).copied()
    }

    fn qualified(&self, target: Option<usize>, name: &str) -> Binding {
        match target {
            Some(pkg) if self.packages[pkg].renamable => {
                if self.tables[pkg].decls.contains(name) {
                    Binding::Symbol(self.key(pkg, name))
                } else {
                    Binding::Unresolved {
                        reason: "not declared in the imported package",
                        poison: vec![self.key(pkg, name)],
                    }
                }
            }
            _ => Binding::Keep,
        }
    }

    fn literal_key(&self, ctx: Ctx, literal: Option<&'a TypeExpr>, local: bool, name: &str) -> Binding {
        let scope = TypeScope { pkg: ctx.pkg, unit: ctx.unit, locals: true };
        let underlying = literal.and_then(|ty| self.underlying(scope, ty, 0)).map(|(ty, _)| ty);
        let as_expr = || if local { self.own(ctx, name) } else { self.free(ctx, name) };
        match underlying {
            Some(TypeExpr::Struct) => self.member(ctx, name),
            Some(TypeExpr::Map { .. } | TypeExpr::Slice(_) | TypeExpr::Array(_)) => as_expr(),
            _ => {
                let as_member = self.member(ctx, name);
                match as_expr() {
                    // A compiling program cannot use an undeclared name as a value.
                    Binding::Unresolved { .. } => as_member,
                    expr if expr == as_member => as_member,
                    expr => {
                        let poison = [as_member, expr]
                            .into_iter()
                            .filter_map(|b| match b {
                                Binding::Symbol(key) => Some(key),
                                _ => None,
                            })
                            .collect();
                        Binding::Unresolved { reason: "ambiguous composite literal key", poison }
                    }
                }
            }
        }
    }

    /// Follow named types (and element/pointer wrappers) to a structural type.
    fn underlying(&self, scope: TypeScope, ty: &'a TypeExpr, depth: usize) -> Option<(&'a TypeExpr, TypeScope)> {
        if depth > MAX_TYPE_DEPTH {
            return None;
        }
        match ty {
            TypeExpr::Named { .. } => {
                let (next, scope) = self.lookup_named(scope, ty)?;
                self.underlying(scope, next, depth + 1)
            }
            TypeExpr::Element(outer) => {
                let (outer, scope) = self.underlying(scope, outer, depth + 1)?;
                match outer {
                    TypeExpr::Map { value, .. } => self.underlying(scope, value, depth + 1),
                    TypeExpr::Slice(elem) | TypeExpr::Array(elem) => self.underlying(scope, elem, depth + 1),
                    _ => None,
                }
            }
            TypeExpr::Pointer(inner) => self.underlying(scope, inner, depth + 1),
            other => Some((other, scope)),
        }
    }

    fn lookup_named(&self, scope: TypeScope, ty: &'a TypeExpr) -> Option<(&'a TypeExpr, TypeScope)> {
        let TypeExpr::Named { qualifier, name, local } = ty else { return None };
        match qualifier {
            None if *local => {
                if !scope.locals {
                    return None;
                }
                let unit = &self.packages[scope.pkg].units[scope.unit];
                let mut found = unit.local_types.iter().filter(|d| &d.name == name);
                let first = found.next()?;
                if found.any(|d| d.underlying != first.underlying) {
                    return None;
                }
                Some((&first.underlying, TypeScope { locals: false, ..scope }))
            }
            None => {
                let (underlying, unit) = self.tables[scope.pkg].types.get(name.as_str())?;
                Some((*underlying, TypeScope { pkg: scope.pkg, unit: *unit, locals: false }))
            }
            Some(qualifier) => {
                let pkg = (*self.files[scope.pkg][scope.unit].imports.get(qualifier)?)?;
                let (underlying, unit) = self.tables[pkg].types.get(name.as_str())?;
                Some((*underlying, TypeScope { pkg, unit: *unit, locals: false }))
            }
        }
    }
}

fn file_scope(unit: &SourceUnit, importer: &str, set: &PackageSet, primary: &HashMap<&str, usize>) -> FileScope {
    let mut scope = FileScope::default();
    for imp in unit.imports.iter().filter(|imp| !imp.is_blank()) {
        let record = set.resolve_import(importer, &imp.path);
        let target = record.and_then(|r| primary.get(r.import_path.as_str()).copied());
        if imp.is_dot() {
            scope.dots.extend(target);
            continue;
        }
        let name = imp
            .alias
            .clone()
            .or_else(|| record.map(|r| r.name.clone()))
            .unwrap_or_else(|| guess_package_name(&imp.path));
        scope.imports.insert(name, target);
    }
    scope
}

/// Occurrences bound to symbols, per package, per unit: `(occurrence index, key)`.
pub type Bindings = Vec<Vec<Vec<(usize, RenameKey)>>>;

/// Everything decided before a single token changes.
#[derive(Debug, Default)]
pub struct SymbolPlan {
    pub plan: RenamePlan,
    pub bindings: Bindings,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Resolve every occurrence and allocate a new name for each surviving symbol.
pub fn build_rename_plan(
    packages: &[CompiledPackage],
    set: &PackageSet,
    hasher: &dyn Hasher,
    keep: &KeepList,
) -> ObfuscateResult<SymbolPlan> {
    let resolver = Resolver::new(packages, set);
    let namespaces: HashMap<&str, &CompiledPackage> =
        packages.iter().map(|p| (p.namespace.as_str(), p)).collect();

    let mut bindings: Bindings = Vec::with_capacity(packages.len());
    let mut candidates: BTreeSet<RenameKey> = BTreeSet::new();
    let mut excluded: BTreeSet<RenameKey> = BTreeSet::new();
    let mut poisoned: BTreeSet<RenameKey> = BTreeSet::new();
    let mut unresolved = Vec::new();
    let mut existing: HashSet<&str> = HashSet::new();

    for (p, pkg) in packages.iter().enumerate() {
        let mut pkg_bindings = Vec::with_capacity(pkg.units.len());
        for (u, unit) in pkg.units.iter().enumerate() {
            let ctx = Ctx { pkg: p, unit: u };
            let mut unit_bindings = Vec::new();
            for (i, occurrence) in unit.idents.iter().enumerate() {
                existing.insert(occurrence.name.as_str());
                match resolver.resolve(ctx, i) {
                    Binding::Symbol(key) => {
                        candidates.insert(key.clone());
                        unit_bindings.push((i, key));
                    }
                    Binding::Keep => {}
                    Binding::Unresolved { reason, poison } => {
                        let (line, column) = unit.position(occurrence.token);
                        let reference = UnresolvedReference {
                            path: unit.path.clone(),
                            line,
                            column,
                            name: occurrence.name.clone(),
                            reason: reason.to_string(),
                        };
                        warn!(%reference, "unresolved reference");
                        unresolved.push(reference);
                        poisoned.extend(poison);
                    }
                }
            }
            pkg_bindings.push(unit_bindings);

            if !pkg.renamable {
                continue;
            }
            if unit.is_test() {
                for decl in &unit.decls {
                    if decl.kind == DeclKind::Func && is_test_entry(&decl.name) {
                        excluded.insert(RenameKey::new(pkg.namespace.clone(), decl.name.clone()));
                    }
                }
            }
            // Embedded exported types name a promoted field that selectors reach by name.
            for embedded in unit.embedded.iter().filter(|e| is_exported(&e.name)) {
                let owner = match &embedded.qualifier {
                    None => Some(p),
                    Some(q) => resolver.files[p][u].imports.get(q).copied().flatten(),
                };
                if let Some(owner) = owner {
                    excluded.insert(RenameKey::new(packages[owner].namespace.clone(), embedded.name.clone()));
                }
            }
        }
        bindings.push(pkg_bindings);
    }

    let mut plan = RenamePlan::new();
    for key in &candidates {
        let Some(pkg) = namespaces.get(key.package.as_str()) else { continue };
        let fixed = key.name == "init"
            || (key.name == "main" && pkg.clause == "main")
            || keep.matches(&pkg.original_path, &key.name);
        if fixed || excluded.contains(key) || poisoned.contains(key) {
            continue;
        }
        let new_name = match_visibility(&hasher.hash(&format!("{}.{}", key.package, key.name)), &key.name);
        if existing.contains(new_name.as_str()) {
            return Err(ObfuscateError::PlanCollision {
                first: key.to_string(),
                second: format!("existing identifier {new_name}"),
                name: new_name,
            });
        }
        plan.insert(key.clone(), new_name)?;
    }

    Ok(SymbolPlan { plan, bindings, unresolved })
}

/// Replace every bound occurrence whose symbol made it into the plan.
pub fn apply_rename_plan(packages: &mut [CompiledPackage], plan: &SymbolPlan) -> usize {
    let mut renamed = 0;
    for (pkg, pkg_bindings) in packages.iter_mut().zip(&plan.bindings) {
        for (unit, unit_bindings) in pkg.units.iter_mut().zip(pkg_bindings) {
            for (occ, key) in unit_bindings {
                if let Some(new_name) = plan.plan.get(key) {
                    let token = unit.idents[*occ].token;
                    unit.replace_token(token, new_name);
                    renamed += 1;
                }
            }
        }
    }
    renamed
}

#[derive(Debug, Default)]
pub struct SymbolReport {
    pub plan: RenamePlan,
    pub unresolved: Vec<UnresolvedReference>,
    /// Occurrences rewritten.
    pub renamed: usize,
}

/// Rename symbols in every owned package without cgo or assembly.
///
/// `paths` maps the rewritten import paths back to the original ones so the
/// keep list can be written against the paths the user knows.
pub fn obfuscate_symbols(
    set: &PackageSet,
    hasher: &dyn Hasher,
    keep: &KeepList,
    paths: &PathPlan,
) -> ObfuscateResult<SymbolReport> {
    for record in set.iter().filter(|r| r.is_owned() && !r.symbols_renamable()) {
        info!(package = %record.import_path, "skipping symbols of package with cgo or assembly");
    }
    let renamable: HashSet<&str> =
        set.iter().filter(|r| r.symbols_renamable()).map(|r| r.import_path.as_str()).collect();
    let records: Vec<&PackageRecord> = set
        .iter()
        .filter(|r| {
            renamable.contains(r.import_path.as_str())
                || r.imports.iter().any(|i| renamable.contains(i.as_str()))
        })
        .collect();

    let loaded = load_units(&records)?;
    let mut packages = Vec::new();
    for (record, units) in records.iter().zip(loaded) {
        let original = paths.original_of(&record.import_path).unwrap_or(&record.import_path);
        packages.extend(group_units(record, units, original));
    }

    let symbol_plan = build_rename_plan(&packages, set, hasher, keep)?;
    let renamed = apply_rename_plan(&mut packages, &symbol_plan);
    write_units(packages.iter().flat_map(|p| p.units.iter()))?;

    info!(
        symbols = symbol_plan.plan.len(),
        occurrences = renamed,
        unresolved = symbol_plan.unresolved.len(),
        "obfuscated symbols"
    );
    Ok(SymbolReport { plan: symbol_plan.plan, unresolved: symbol_plan.unresolved, renamed })
}
