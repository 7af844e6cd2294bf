mod common;

use std::path::PathBuf;

use common::write;
use gobfuscate_core::config::ObfuscateConfig;
use gobfuscate_core::matrix::Target;
use gobfuscate_core::pipeline::ObfuscateOptions;
use gobfuscate_core::ObfuscateError;

#[test]
fn loads_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "gobfuscate.yaml",
        "padding: pepper\nwinhide: true\ngoos: [linux, darwin]\ngoarch: [amd64]\nkeep:\n  - Handler\n  - example.com/app/api.Serve\njobs: 4\ngopath: [/src/go]\n",
    );
    let config = ObfuscateConfig::load(&path).unwrap();
    assert_eq!(config.padding.as_deref(), Some("pepper"));
    assert!(config.winhide);
    assert!(!config.noencrypt);
    assert_eq!(config.goos, ["linux", "darwin"]);
    assert_eq!(config.keep, ["Handler", "example.com/app/api.Serve"]);
    assert_eq!(config.jobs, Some(4));
    assert_eq!(config.gopath, [PathBuf::from("/src/go")]);
}

#[test]
fn loads_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "gobfuscate.json", r#"{"noencrypt": true, "tags": "netgo", "foreign": ["github.com/acme"]}"#);
    let config = ObfuscateConfig::load(&path).unwrap();
    assert!(config.noencrypt);
    assert_eq!(config.tags.as_deref(), Some("netgo"));
    assert_eq!(config.foreign, ["github.com/acme"]);
    assert!(config.goos.is_empty());
}

#[test]
fn unknown_fields_and_bad_files_are_config_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "bad.yml", "paddin: typo\n");
    let err = ObfuscateConfig::load(&path).unwrap_err();
    assert!(matches!(err, ObfuscateError::Config(ref msg) if msg.contains("bad.yml") && msg.contains("paddin")));

    let path = write(dir.path(), "bad.json", "{ not json");
    assert!(matches!(ObfuscateConfig::load(&path), Err(ObfuscateError::Config(_))));

    let missing = dir.path().join("missing.json");
    assert!(matches!(ObfuscateConfig::load(&missing), Err(ObfuscateError::Io { .. })));
}

#[test]
fn flags_overlay_the_file() {
    let file = ObfuscateConfig {
        padding: Some("file".into()),
        winhide: true,
        goos: vec!["linux".into()],
        keep: vec!["Handler".into()],
        jobs: Some(2),
        ..ObfuscateConfig::default()
    };
    let flags = ObfuscateConfig {
        padding: Some("flag".into()),
        nostatic: true,
        goarch: vec!["arm64".into()],
        ..ObfuscateConfig::default()
    };
    let merged = file.merge(flags);
    assert_eq!(merged.padding.as_deref(), Some("flag"));
    assert!(merged.winhide && merged.nostatic);
    assert_eq!(merged.goos, ["linux"]);
    assert_eq!(merged.goarch, ["arm64"]);
    assert_eq!(merged.keep, ["Handler"]);
    assert_eq!(merged.jobs, Some(2));

    assert_eq!(ObfuscateConfig::default().merge(ObfuscateConfig::default()), ObfuscateConfig::default());
}

#[test]
fn options_from_config() {
    let config = ObfuscateConfig {
        goos: vec!["linux".into(), "windows".into()],
        goarch: vec!["amd64".into()],
        tags: Some("netgo".into()),
        keep_tests: true,
        ..ObfuscateConfig::default()
    };
    let options = ObfuscateOptions::from_config("example.com/app", "/out/app", &config);
    assert_eq!(options.package, "example.com/app");
    assert_eq!(options.targets, [Target::new("linux", "amd64"), Target::new("windows", "amd64")]);
    assert_eq!(options.tags, "netgo");
    assert_eq!(options.jobs, 1);
    assert!(options.keep_tests);
    assert!(!options.outdir);

    let defaults = ObfuscateOptions::new("example.com/app", "/out/app");
    assert_eq!(defaults.targets, [Target::host()]);
}
