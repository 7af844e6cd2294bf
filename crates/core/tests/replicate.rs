mod common;

use std::path::PathBuf;

use common::{gopath, write};
use gobfuscate_core::workspace::replicate::{default_gopaths, replicate, ReplicateOptions};
use gobfuscate_core::workspace::Workspace;
use gobfuscate_core::ObfuscateError;

fn source() -> tempfile::TempDir {
    let dir = gopath(&[
        (
            "example.com/app/main.go",
            "package main\n\nimport (\n\t\"fmt\"\n\t\"example.com/app/util\"\n\t\"example.com/dep\"\n)\n\nfunc main() { fmt.Println(util.X, dep.Y) }\n",
        ),
        ("example.com/app/main_test.go", "package main\n\nimport \"example.com/testonly\"\n\nvar _ = testonly.T\n"),
        ("example.com/app/README.md", "docs\n"),
        ("example.com/app/util/util.go", "package util\n\n// #include <stdio.h>\nimport \"C\"\n\nconst X = 1\n"),
        ("example.com/app/vendor/example.com/dep/dep.go", "package dep\n\nconst Y = 1\n"),
        ("example.com/dep/dep.go", "package dep\n\nconst Y = 2\n"),
        ("example.com/testonly/t.go", "package testonly\n\nconst T = 1\n"),
        ("example.com/unrelated/u.go", "package unrelated\n"),
    ]);
    write(dir.path(), "src/example.com/app/util/nested/n.go", "package nested\n");
    dir
}

fn options(src: &tempfile::TempDir, keep_tests: bool) -> ReplicateOptions {
    ReplicateOptions { gopaths: vec![src.path().to_path_buf()], keep_tests }
}

#[test]
fn copies_the_import_closure_only() {
    let src = source();
    let ws = Workspace::create().unwrap();
    let copied = replicate("example.com/app", &ws, &options(&src, false)).unwrap();

    assert_eq!(copied, ["example.com/app", "example.com/app/util", "example.com/app/vendor/example.com/dep"]);
    let app = ws.package_dir("example.com/app");
    assert!(app.join("main.go").is_file());
    assert!(app.join("README.md").is_file());
    assert!(!app.join("main_test.go").exists());
    assert!(!ws.package_dir("example.com/dep").exists(), "vendored copy wins");
    assert!(!ws.package_dir("example.com/testonly").exists());
    assert!(!ws.package_dir("example.com/unrelated").exists());
    assert!(!ws.package_dir("example.com/app/util/nested").exists());
}

#[test]
fn keep_tests_follows_test_imports() {
    let src = source();
    let ws = Workspace::create().unwrap();
    let copied = replicate("example.com/app", &ws, &options(&src, true)).unwrap();
    assert!(copied.contains(&"example.com/testonly".to_string()));
    assert!(ws.package_dir("example.com/app").join("main_test.go").is_file());
}

#[test]
fn later_gopaths_are_searched_too() {
    let first = gopath(&[("example.com/app/main.go", "package main\n\nimport \"example.com/extra\"\n")]);
    let second = gopath(&[("example.com/extra/e.go", "package extra\n")]);
    let ws = Workspace::create().unwrap();
    let copied = replicate(
        "example.com/app",
        &ws,
        &ReplicateOptions { gopaths: vec![first.path().into(), second.path().into()], keep_tests: false },
    )
    .unwrap();
    assert_eq!(copied, ["example.com/app", "example.com/extra"]);
}

#[test]
fn missing_root_is_a_workspace_error() {
    let src = source();
    let ws = Workspace::create().unwrap();
    let err = replicate("example.com/nothing", &ws, &options(&src, false)).unwrap_err();
    assert!(matches!(err, ObfuscateError::Workspace(ref msg) if msg.contains("cannot find package example.com/nothing")));
}

#[test]
fn default_gopaths_from_environment() {
    let env = |key: &str| match key {
        "GOPATH" => Some(std::env::join_paths(["/a", "/b"]).unwrap().into_string().unwrap()),
        _ => None,
    };
    assert_eq!(default_gopaths(&env), [PathBuf::from("/a"), PathBuf::from("/b")]);

    let home = |key: &str| (key == "HOME").then(|| "/home/gopher".to_string());
    assert_eq!(default_gopaths(&home), [PathBuf::from("/home/gopher/go")]);
    assert!(default_gopaths(&|_: &str| None::<String>).is_empty());
}
