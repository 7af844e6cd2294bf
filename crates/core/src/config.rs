use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ObfuscateError, ObfuscateResult};

/// Run settings that can live in a YAML or JSON file.
///
/// Every field is optional in the file; command-line flags are merged on top
/// with [`ObfuscateConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObfuscateConfig {
    /// Salt for the name hasher; random when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<String>,
    pub keep_tests: bool,
    pub winhide: bool,
    pub nostatic: bool,
    pub noencrypt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    pub goos: Vec<String>,
    pub goarch: Vec<String>,
    /// Do-not-rename entries (`Name` or `import/path.Name`).
    pub keep: Vec<String>,
    /// Import path prefixes that are never rewritten.
    pub foreign: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    /// Go toolchain binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub go: Option<PathBuf>,
    /// Source GOPATH roots.
    pub gopath: Vec<PathBuf>,
}

impl ObfuscateConfig {
    /// Read a config file; `.yaml` / `.yml` are YAML, anything else JSON.
    pub fn load(path: &Path) -> ObfuscateResult<Self> {
        let body = fs::read_to_string(path).map_err(|e| ObfuscateError::io(path, e))?;
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"));
        let parsed = if is_yaml {
            serde_yaml::from_str(&body).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&body).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| ObfuscateError::Config(format!("{}: {e}", path.display())))
    }

    /// Overlay `other` on `self`: set options and non-empty lists in `other`
    /// win, flags are enabled by either side.
    pub fn merge(self, other: ObfuscateConfig) -> ObfuscateConfig {
        fn list<T>(base: Vec<T>, over: Vec<T>) -> Vec<T> {
            if over.is_empty() {
                base
            } else {
                over
            }
        }
        ObfuscateConfig {
            padding: other.padding.or(self.padding),
            keep_tests: self.keep_tests || other.keep_tests,
            winhide: self.winhide || other.winhide,
            nostatic: self.nostatic || other.nostatic,
            noencrypt: self.noencrypt || other.noencrypt,
            tags: other.tags.or(self.tags),
            goos: list(self.goos, other.goos),
            goarch: list(self.goarch, other.goarch),
            keep: list(self.keep, other.keep),
            foreign: list(self.foreign, other.foreign),
            jobs: other.jobs.or(self.jobs),
            go: other.go.or(self.go),
            gopath: list(self.gopath, other.gopath),
        }
    }
}
