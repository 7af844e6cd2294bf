use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use gobfuscate_core::config::ObfuscateConfig;
use gobfuscate_core::hasher::NameHasher;
use gobfuscate_core::matrix::{split_list, GoToolchain};
use gobfuscate_core::pipeline::{ObfuscateOptions, Obfuscator, RunReport};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Obfuscate a Go program and build it for one or more platforms.
///
/// This CLI is a thin wrapper around `gobfuscate-core`; all substantive logic
/// lives in the library.
#[derive(Parser, Debug, Clone)]
#[command(name = "gobfuscate", version, about = "Obfuscate and build a Go program", long_about = None)]
pub struct Cli {
    /// Import path of the main package (as found under GOPATH/src).
    pub pkg_name: String,

    /// Output binary, or the output GOPATH with `--outdir`.
    pub out_path: String,

    /// Salt for the name hasher. A random salt is used when omitted.
    #[arg(long)]
    pub padding: Option<String>,

    /// Write the obfuscated GOPATH to `out_path` instead of building.
    #[arg(long, default_value_t = false)]
    pub outdir: bool,

    /// Keep `_test.go` files.
    #[arg(long, default_value_t = false)]
    pub keeptests: bool,

    /// Hide the console window on windows builds.
    #[arg(long, default_value_t = false)]
    pub winhide: bool,

    /// Do not statically link.
    #[arg(long, default_value_t = false)]
    pub nostatic: bool,

    /// Keep the root package path as is (needed when the main package uses cgo).
    #[arg(long, default_value_t = false)]
    pub noencrypt: bool,

    /// Log the workspace, build commands and environments.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,

    /// Build tags passed to `go build`.
    #[arg(long)]
    pub tags: Option<String>,

    /// Target operating systems (space or comma separated).
    #[arg(long)]
    pub goos: Option<String>,

    /// Target architectures (space or comma separated).
    #[arg(long)]
    pub goarch: Option<String>,

    /// YAML or JSON settings file; flags override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Never rename this identifier (`Name` or `import/path.Name`). Repeatable.
    #[arg(long = "keep", value_name = "NAME")]
    pub keep: Vec<String>,

    /// Import path prefix to leave untouched. Repeatable.
    #[arg(long = "foreign", value_name = "PREFIX")]
    pub foreign: Vec<String>,

    /// Parallel builds.
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Go toolchain binary.
    #[arg(long)]
    pub go: Option<PathBuf>,

    /// Source GOPATH root. Repeatable; defaults to $GOPATH or ~/go.
    #[arg(long = "gopath", value_name = "DIR")]
    pub gopath: Vec<PathBuf>,

    /// Write the path and symbol plans to this file as JSON.
    #[arg(long, value_name = "FILE")]
    pub emit_plan: Option<PathBuf>,
}

impl Cli {
    /// Settings given on the command line, in config form.
    pub fn to_config(&self) -> ObfuscateConfig {
        ObfuscateConfig {
            padding: self.padding.clone(),
            keep_tests: self.keeptests,
            winhide: self.winhide,
            nostatic: self.nostatic,
            noencrypt: self.noencrypt,
            tags: self.tags.clone(),
            goos: self.goos.as_deref().map(split_list).unwrap_or_default(),
            goarch: self.goarch.as_deref().map(split_list).unwrap_or_default(),
            keep: self.keep.clone(),
            foreign: self.foreign.clone(),
            jobs: self.jobs,
            go: self.go.clone(),
            gopath: self.gopath.clone(),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins; otherwise `info`, or
/// `debug` with `--verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    // A second call (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}

/// Canonicalize the root path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        // Try to canonicalize; if it fails (e.g., path does not yet exist),
        // join it with the current dir to get an absolute path.
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Merge the config file (if any) with the flags and run the pipeline.
pub fn run(cli: &Cli) -> Result<RunReport> {
    let file_config = match &cli.config {
        Some(path) => ObfuscateConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ObfuscateConfig::default(),
    };
    let config = file_config.merge(cli.to_config());

    let output = canonicalize_or_current(&cli.out_path)?;
    let mut options = ObfuscateOptions::from_config(&cli.pkg_name, output, &config);
    options.outdir = cli.outdir;
    options.emit_plan = cli.emit_plan.clone();
    debug!(?options, "resolved options");

    let hasher = NameHasher::from_padding(config.padding.as_deref());
    let toolchain = GoToolchain::new(config.go.clone().unwrap_or_else(|| PathBuf::from("go")));
    let report = Obfuscator::new(&options, &hasher, &toolchain)
        .run()
        .with_context(|| format!("Failed to obfuscate {}", cli.pkg_name))?;
    Ok(report)
}

/// One line per produced artifact (or the workspace with `--outdir`).
pub fn print_summary(cli: &Cli, report: &RunReport) {
    if cli.outdir {
        println!("Obfuscated GOPATH: {}", report.workspace.display());
    }
    for artifact in &report.artifacts {
        println!("Built: {}", artifact.display());
    }
    println!(
        "Renamed {} packages, {} symbols, {} string literals ({} unresolved references)",
        report.paths.len(),
        report.symbols.len(),
        report.strings.literals,
        report.unresolved.len()
    );
}
