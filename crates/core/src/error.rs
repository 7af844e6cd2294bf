//! Error types shared by every obfuscation stage.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal error raised by a pipeline stage.
///
/// Any of these aborts the run; the temporary workspace is dropped with it, so a
/// half-rewritten tree is never handed back to the caller.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    /// Replication or isolation of the workspace failed.
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// A compilation unit is not syntactically valid.
    #[error("Parse error in {path}:{line}:{column}: {message}")]
    Parse { path: PathBuf, line: u32, column: u32, message: String },

    /// Two distinct symbols or package paths were assigned the same obfuscated name.
    #[error("Rename collision: {first} and {second} both map to {name}")]
    PlanCollision { first: String, second: String, name: String },

    /// A configuration file could not be read or decoded.
    #[error("Config error: {0}")]
    Config(String),

    /// At least one external toolchain invocation failed.
    #[error("Build failed: {0}")]
    Toolchain(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ObfuscateError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Convenience result type for pipeline stages.
pub type ObfuscateResult<T> = Result<T, ObfuscateError>;

/// An identifier occurrence the renamer could not attribute to a declaration.
///
/// Non-fatal: the occurrence (and every other occurrence of the same name in the
/// same package) is left untouched and the record is logged.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UnresolvedReference {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub name: String,
    pub reason: String,
}

impl std::fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: left `{}` unrenamed ({})",
            self.path.display(),
            self.line,
            self.column,
            self.name,
            self.reason
        )
    }
}
