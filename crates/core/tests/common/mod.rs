#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use gobfuscate_core::hasher::Hasher;
use gobfuscate_core::workspace::{discover_packages, PackageSet, Workspace};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Write `body` to `root/rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, body: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    path
}

/// A GOPATH-shaped tree: every `(import path/file, body)` lands under `src/`.
pub fn gopath(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, body) in files {
        write(dir.path(), &format!("src/{rel}"), body);
    }
    dir
}

/// Open a fixture tree as a workspace and discover its packages.
pub fn workspace(dir: &TempDir, root: &str, foreign: &[String]) -> (Workspace, PackageSet) {
    let ws = Workspace::open(dir.path()).unwrap();
    let set = discover_packages(&ws, root, foreign).unwrap();
    (ws, set)
}

pub fn read(ws: &Workspace, import_path: &str, file: &str) -> String {
    fs::read_to_string(ws.package_dir(import_path).join(file)).unwrap()
}

/// Every file below `root` with its contents, in path order.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, String)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(Result::unwrap)
        .filter(|e| e.file_type().is_file())
        .map(|e| (e.path().to_path_buf(), fs::read_to_string(e.path()).unwrap()))
        .collect()
}

/// Returns the same name for every input.
pub struct ConstHasher(pub &'static str);

impl Hasher for ConstHasher {
    fn hash(&self, _input: &str) -> String {
        self.0.to_string()
    }

    fn derive_key(&self, _context: &[u8], len: usize) -> Vec<u8> {
        vec![0x5a; len]
    }
}

/// Readable names: `h_` plus the input with separators replaced.
pub struct SpellingHasher;

impl Hasher for SpellingHasher {
    fn hash(&self, input: &str) -> String {
        let body: String = input.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect();
        format!("h_{body}")
    }

    fn derive_key(&self, context: &[u8], len: usize) -> Vec<u8> {
        (0..len).map(|i| context.get(i % context.len().max(1)).copied().unwrap_or(1) | 1).collect()
    }
}

pub const APP_MAIN: &str = r#"package main

import (
	"fmt"

	"example.com/app/helper"
)

type config struct {
	name  string
	Count int
}

func main() {
	c := config{name: "demo", Count: 2}
	fmt.Println(helper.Greet(c.name), c.Count)
}
"#;

pub const HELPER: &str = r#"package helper

import "strings"

const prefix = "hello, "

// Greet builds a greeting.
func Greet(name string) string {
	return join(prefix, name)
}

func join(a, b string) string {
	return strings.TrimSpace(a + b)
}
"#;

/// The two-package program: `example.com/app` importing `example.com/app/helper`.
pub fn helper_program() -> TempDir {
    gopath(&[("example.com/app/main.go", APP_MAIN), ("example.com/app/helper/helper.go", HELPER)])
}
