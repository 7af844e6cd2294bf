//! End-to-end run: replicate, rewrite package paths, strings and symbols, then
//! build the target matrix.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ObfuscateConfig;
use crate::error::{ObfuscateError, ObfuscateResult, UnresolvedReference};
use crate::hasher::Hasher;
use crate::matrix::{encrypt_root_package, run_matrix, BuildInvocation, BuildSettings, Target, Toolchain};
use crate::pkgpath::{obfuscate_package_names, PathPlan};
use crate::strings::{obfuscate_strings, StringReport};
use crate::symbols::{obfuscate_symbols, KeepList, RenamePlan};
use crate::workspace::replicate::{default_gopaths, replicate, ReplicateOptions};
use crate::workspace::{discover_packages, Workspace};

/// What to obfuscate and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscateOptions {
    /// Import path of the program to obfuscate.
    pub package: String,
    /// Output binary path, or the workspace directory with `outdir`.
    pub output: PathBuf,
    /// Stop after rewriting and leave the workspace at `output`.
    pub outdir: bool,
    pub keep_tests: bool,
    pub winhide: bool,
    pub nostatic: bool,
    pub noencrypt: bool,
    pub tags: String,
    pub targets: Vec<Target>,
    pub keep: Vec<String>,
    pub foreign: Vec<String>,
    pub jobs: usize,
    /// Source GOPATH roots; `$GOPATH` or `~/go` when empty.
    pub gopaths: Vec<PathBuf>,
    /// Write the path and symbol plans here as JSON.
    pub emit_plan: Option<PathBuf>,
}

impl ObfuscateOptions {
    pub fn new(package: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            package: package.into(),
            output: output.into(),
            outdir: false,
            keep_tests: false,
            winhide: false,
            nostatic: false,
            noencrypt: false,
            tags: String::new(),
            targets: vec![Target::host()],
            keep: Vec::new(),
            foreign: Vec::new(),
            jobs: 1,
            gopaths: Vec::new(),
            emit_plan: None,
        }
    }

    pub fn from_config(package: impl Into<String>, output: impl Into<PathBuf>, config: &ObfuscateConfig) -> Self {
        Self {
            keep_tests: config.keep_tests,
            winhide: config.winhide,
            nostatic: config.nostatic,
            noencrypt: config.noencrypt,
            tags: config.tags.clone().unwrap_or_default(),
            targets: Target::parse_matrix(&config.goos.join(" "), &config.goarch.join(" ")),
            keep: config.keep.clone(),
            foreign: config.foreign.clone(),
            jobs: config.jobs.unwrap_or(1),
            gopaths: config.gopath.clone(),
            ..Self::new(package, output)
        }
    }
}

/// Summary of a run, also the document written by `emit_plan`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub workspace: PathBuf,
    /// Import path that was (or would be) built.
    pub root_package: String,
    pub packages: usize,
    pub paths: PathPlan,
    pub symbols: RenamePlan,
    pub strings: StringReport,
    pub unresolved: Vec<UnresolvedReference>,
    pub artifacts: Vec<PathBuf>,
}

/// Runs the stages in order over one workspace, with one hasher and one toolchain.
pub struct Obfuscator<'a> {
    pub options: &'a ObfuscateOptions,
    pub hasher: &'a dyn Hasher,
    pub toolchain: &'a dyn Toolchain,
}

impl<'a> Obfuscator<'a> {
    pub fn new(options: &'a ObfuscateOptions, hasher: &'a dyn Hasher, toolchain: &'a dyn Toolchain) -> Self {
        Self { options, hasher, toolchain }
    }

    /// Run against the process environment.
    pub fn run(&self) -> ObfuscateResult<RunReport> {
        self.run_with_env(&|key| std::env::var(key).ok())
    }

    /// Run with `env` standing in for the process environment (GOPATH lookup,
    /// per-target compiler variables).
    pub fn run_with_env(&self, env: &dyn Fn(&str) -> Option<String>) -> ObfuscateResult<RunReport> {
        let options = self.options;
        let mut ws = if options.outdir { Workspace::persist(&options.output)? } else { Workspace::create()? };
        debug!(path = %ws.root().display(), temporary = ws.is_temporary(), "workspace");

        info!(package = %options.package, "copying GOPATH");
        let gopaths = if options.gopaths.is_empty() { default_gopaths(env) } else { options.gopaths.clone() };
        replicate(
            &options.package,
            &ws,
            &ReplicateOptions { gopaths, keep_tests: options.keep_tests },
        )?;

        let set = discover_packages(&ws, &options.package, &options.foreign)?;
        info!(packages = set.len(), "obfuscating package names");
        let paths = obfuscate_package_names(&ws, &set, self.hasher)?;

        let set = discover_packages(&ws, &options.package, &options.foreign)?;
        info!("obfuscating strings");
        let strings = obfuscate_strings(&set, self.hasher)?;

        info!("obfuscating symbols");
        let keep = KeepList::new(&options.keep);
        let symbols = obfuscate_symbols(&set, self.hasher, &keep, &paths)?;

        let mut report = RunReport {
            workspace: ws.root().to_path_buf(),
            root_package: options.package.clone(),
            packages: set.len(),
            paths,
            symbols: symbols.plan,
            strings,
            unresolved: symbols.unresolved,
            artifacts: Vec::new(),
        };

        if options.outdir {
            self.emit_plan(&report)?;
            ws.keep();
            info!(path = %ws.root().display(), "wrote obfuscated GOPATH");
            return Ok(report);
        }

        if !options.noencrypt {
            report.root_package = encrypt_root_package(&ws, &set, self.hasher)?;
            report.paths.insert(options.package.clone(), report.root_package.clone());
        }
        self.emit_plan(&report)?;

        let cache = ws.cache_dir();
        fs::create_dir_all(&cache).map_err(|e| ObfuscateError::io(&cache, e))?;
        let goroot = self.toolchain.goroot(env).map_err(|e| ObfuscateError::Toolchain(e.to_string()))?;
        let settings = BuildSettings {
            package: report.root_package.clone(),
            output: options.output.clone(),
            tags: options.tags.clone(),
            winhide: options.winhide,
            nostatic: options.nostatic,
            goroot,
            workspace: ws.root().to_path_buf(),
        };
        let multiple = options.targets.len() > 1;
        let invocations: Vec<BuildInvocation> = options
            .targets
            .iter()
            .map(|target| BuildInvocation::new(&settings, target, multiple, env))
            .collect();
        report.artifacts = run_matrix(self.toolchain, &invocations, options.jobs)?;
        info!(artifacts = report.artifacts.len(), "build finished");
        Ok(report)
    }

    fn emit_plan(&self, report: &RunReport) -> ObfuscateResult<()> {
        let Some(path) = self.options.emit_plan.as_deref() else { return Ok(()) };
        write_report(path, report)
    }
}

fn write_report(path: &Path, report: &RunReport) -> ObfuscateResult<()> {
    let file = File::create(path).map_err(|e| ObfuscateError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report).map_err(|e| ObfuscateError::io(path, e.into()))?;
    debug!(path = %path.display(), "wrote plan");
    Ok(())
}
