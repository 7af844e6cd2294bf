//! Build matrix: one `go build` per GOOS/GOARCH pair against the rewritten
//! workspace.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::error::{ObfuscateError, ObfuscateResult};
use crate::hasher::{encrypt_components, Hasher};
use crate::pkgpath::{apply_path_plan, PathPlan};
use crate::workspace::{PackageSet, Workspace};

/// One GOOS/GOARCH pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Target {
    pub goos: String,
    pub goarch: String,
}

impl Target {
    pub fn new(goos: impl Into<String>, goarch: impl Into<String>) -> Self {
        Self { goos: goos.into(), goarch: goarch.into() }
    }

    /// The platform this binary runs on, in Go's spelling.
    pub fn host() -> Self {
        let goos = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let goarch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64",
            other => other,
        };
        Self::new(goos, goarch)
    }

    /// Cartesian product of two space- or comma-separated lists, OS-major.
    /// An empty list falls back to the host value.
    pub fn parse_matrix(goos: &str, goarch: &str) -> Vec<Target> {
        let host = Self::host();
        let or_host = |list: Vec<String>, fallback: &str| {
            if list.is_empty() {
                vec![fallback.to_string()]
            } else {
                list
            }
        };
        let systems = or_host(split_list(goos), &host.goos);
        let arches = or_host(split_list(goarch), &host.goarch);
        systems
            .iter()
            .flat_map(|os| arches.iter().map(move |arch| Target::new(os.clone(), arch.clone())))
            .collect()
    }

    /// `out` for a single-target matrix, `out-<os>-<arch>` otherwise; `.exe` on windows.
    pub fn output_path(&self, out: &Path, multiple: bool) -> PathBuf {
        let mut name = out.as_os_str().to_os_string();
        if multiple {
            name.push(format!("-{}-{}", self.goos, self.goarch));
        }
        if self.goos == "windows" {
            name.push(".exe");
        }
        PathBuf::from(name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.goos, self.goarch)
    }
}

/// Split on whitespace and commas, dropping empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Linker flags: stripped, optionally GUI subsystem on windows, static unless disabled.
pub fn ldflags(winhide: bool, nostatic: bool) -> String {
    let mut flags = String::from("-s -w");
    if winhide {
        flags.push_str(" -H=windowsgui");
    }
    if !nostatic {
        flags.push_str(" -extldflags '-static'");
    }
    flags
}

/// Everything that is the same for every target of a run.
#[derive(Debug, Clone, Default)]
pub struct BuildSettings {
    /// Import path handed to `go build`.
    pub package: String,
    pub output: PathBuf,
    pub tags: String,
    pub winhide: bool,
    pub nostatic: bool,
    pub goroot: String,
    pub workspace: PathBuf,
}

/// A fully prepared toolchain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInvocation {
    pub target: Target,
    pub args: Vec<String>,
    /// The complete environment; nothing is inherited.
    pub env: Vec<(String, String)>,
    pub output: PathBuf,
}

impl BuildInvocation {
    /// Arguments and a cleared environment for one target. Per-target cgo and
    /// compiler settings come from `CGO_ENABLED_<os>_<arch>`, `CC_<os>_<arch>`
    /// and `CXX_<os>_<arch>` in `env`.
    pub fn new(
        settings: &BuildSettings,
        target: &Target,
        multiple: bool,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let output = target.output_path(&settings.output, multiple);
        let suffix = format!("{}_{}", target.goos, target.goarch);
        let lookup = |key: &str| env(key).unwrap_or_default();
        let cgo = env(&format!("CGO_ENABLED_{suffix}")).filter(|v| !v.is_empty()).unwrap_or_else(|| "0".into());

        let args = vec![
            "build".to_string(),
            "-ldflags".to_string(),
            ldflags(settings.winhide, settings.nostatic),
            "-tags".to_string(),
            settings.tags.clone(),
            "-o".to_string(),
            output.display().to_string(),
            settings.package.clone(),
        ];
        let env = vec![
            ("GOROOT".to_string(), settings.goroot.clone()),
            ("GOARCH".to_string(), target.goarch.clone()),
            ("GOOS".to_string(), target.goos.clone()),
            ("GOPATH".to_string(), settings.workspace.display().to_string()),
            ("PATH".to_string(), lookup("PATH")),
            ("GOCACHE".to_string(), settings.workspace.join("cache").display().to_string()),
            ("GO111MODULE".to_string(), "off".to_string()),
            ("CGO_ENABLED".to_string(), cgo),
            ("CC".to_string(), lookup(&format!("CC_{suffix}"))),
            ("CXX".to_string(), lookup(&format!("CXX_{suffix}"))),
            ("MACOSX_DEPLOYMENT_TARGET".to_string(), lookup("MACOSX_DEPLOYMENT_TARGET")),
        ];
        Self { target: target.clone(), args, env, output }
    }

    pub fn command_line(&self, program: &str) -> String {
        std::iter::once(program).chain(self.args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{target}: {program} exited with {status}")]
    Failed { target: Target, program: String, status: String },
    #[error("cannot determine GOROOT: {0}")]
    Goroot(String),
}

/// External compiler driver.
pub trait Toolchain: Send + Sync {
    fn name(&self) -> &str;

    /// GOROOT to place in every build environment.
    fn goroot(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<String, ToolchainError>;

    fn build(&self, invocation: &BuildInvocation) -> Result<(), ToolchainError>;
}

/// The `go` command (or another binary with the same interface).
#[derive(Debug, Clone)]
pub struct GoToolchain {
    program: PathBuf,
}

impl GoToolchain {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self::new("go")
    }
}

impl Toolchain for GoToolchain {
    fn name(&self) -> &str {
        self.program.to_str().unwrap_or("go")
    }

    fn goroot(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<String, ToolchainError> {
        if let Some(goroot) = env("GOROOT").filter(|v| !v.is_empty()) {
            return Ok(goroot);
        }
        let output = Command::new(&self.program)
            .args(["env", "GOROOT"])
            .output()
            .map_err(|source| ToolchainError::Spawn { program: self.program_name(), source })?;
        if !output.status.success() {
            return Err(ToolchainError::Goroot(format!("{} env GOROOT exited with {}", self.program_name(), output.status)));
        }
        let goroot = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if goroot.is_empty() {
            return Err(ToolchainError::Goroot("go env GOROOT printed nothing".into()));
        }
        Ok(goroot)
    }

    fn build(&self, invocation: &BuildInvocation) -> Result<(), ToolchainError> {
        let status = Command::new(&self.program)
            .args(&invocation.args)
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .status()
            .map_err(|source| ToolchainError::Spawn { program: self.program_name(), source })?;
        if !status.success() {
            return Err(ToolchainError::Failed {
                target: invocation.target.clone(),
                program: self.program_name(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Run every invocation on a pool of `jobs` workers.
///
/// Every target is attempted; if any failed the errors are aggregated into one
/// [`ObfuscateError::Toolchain`]. Returns the produced artifacts in matrix order.
pub fn run_matrix(
    toolchain: &dyn Toolchain,
    invocations: &[BuildInvocation],
    jobs: usize,
) -> ObfuscateResult<Vec<PathBuf>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .thread_name(|idx| format!("gobfuscate-build-{idx}"))
        .build()
        .map_err(|e| ObfuscateError::Toolchain(format!("failed to start build pool: {e}")))?;

    let results: Vec<Result<PathBuf, ToolchainError>> = pool.install(|| {
        invocations
            .par_iter()
            .map(|invocation| {
                info!(platform = %invocation.target, output = %invocation.output.display(), "building");
                debug!(command = %invocation.command_line(toolchain.name()), "go build command");
                for (key, value) in &invocation.env {
                    debug!("{key}={value}");
                }
                toolchain.build(invocation).map(|()| invocation.output.clone())
            })
            .collect()
    });

    let mut artifacts = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(path) => artifacts.push(path),
            Err(e) => {
                error!(error = %e, "build failed");
                failures.push(e.to_string());
            }
        }
    }
    if !failures.is_empty() {
        return Err(ObfuscateError::Toolchain(failures.join("; ")));
    }
    Ok(artifacts)
}

/// Move the root program package to its hashed path so the import path does
/// not survive in the binary. Returns the new import path.
pub fn encrypt_root_package(ws: &Workspace, set: &PackageSet, hasher: &dyn Hasher) -> ObfuscateResult<String> {
    let root = set.root();
    let new = encrypt_components(root, hasher);
    if let Some(existing) = set.get(&new) {
        return Err(ObfuscateError::PlanCollision {
            first: root.to_string(),
            second: existing.import_path.clone(),
            name: new,
        });
    }
    let mut plan = PathPlan::default();
    plan.insert(root, new.clone());
    apply_path_plan(ws, set, &plan)?;
    info!(from = %root, to = %new, "encrypted root package path");
    Ok(new)
}
