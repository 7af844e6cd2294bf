use std::fs;
use std::path::PathBuf;

use clap::Parser;
use gobfuscate::{canonicalize_or_current, Cli};
use gobfuscate_core::config::ObfuscateConfig;
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_resolves_dot_and_relative_paths() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let dot = canonicalize_or_current(".").expect("canonicalize").canonicalize().expect("canon");
    let nested = canonicalize_or_current("nested").expect("canonicalize nested");
    let missing = canonicalize_or_current("bin/app").expect("missing path");

    std::env::set_current_dir(original).expect("restore cwd");
    let expected = tmp.path().canonicalize().expect("canon tmp");
    assert_eq!(dot, expected);
    assert_eq!(nested, subdir.canonicalize().expect("canonicalize subdir"));
    assert!(missing.is_absolute());
    assert!(missing.ends_with("bin/app"));
}

#[test]
fn flags_become_config() {
    let cli = Cli::parse_from([
        "gobfuscate",
        "--goos",
        "linux,windows",
        "--goarch",
        "amd64 arm64",
        "--keep",
        "Handler",
        "--keep",
        "example.com/app/api.Serve",
        "--keeptests",
        "--jobs",
        "3",
        "example.com/app",
        "out/app",
    ]);
    assert_eq!(cli.pkg_name, "example.com/app");
    assert_eq!(cli.out_path, "out/app");

    let config = cli.to_config();
    assert_eq!(config.goos, ["linux", "windows"]);
    assert_eq!(config.goarch, ["amd64", "arm64"]);
    assert_eq!(config.keep, ["Handler", "example.com/app/api.Serve"]);
    assert!(config.keep_tests);
    assert_eq!(config.jobs, Some(3));
    assert!(config.padding.is_none());

    let file = ObfuscateConfig {
        padding: Some("from-file".into()),
        gopath: vec![PathBuf::from("/src/go")],
        goos: vec!["darwin".into()],
        ..ObfuscateConfig::default()
    };
    let merged = file.merge(config);
    assert_eq!(merged.padding.as_deref(), Some("from-file"));
    assert_eq!(merged.gopath, [PathBuf::from("/src/go")]);
    assert_eq!(merged.goos, ["linux", "windows"]);
}
