use std::fs;
use std::path::Path;

use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, body).expect("write file");
}

/// A GOPATH holding `example.com/app` and one helper package.
fn source_gopath() -> TempDir {
    let dir = tempdir().expect("tempdir");
    write(
        dir.path(),
        "src/example.com/app/main.go",
        "package main\n\nimport (\n\t\"fmt\"\n\n\t\"example.com/app/helper\"\n)\n\nfunc main() {\n\tfmt.Println(helper.Greet(\"world\"))\n}\n",
    );
    write(
        dir.path(),
        "src/example.com/app/helper/helper.go",
        "package helper\n\nfunc Greet(name string) string {\n\treturn \"hello, \" + name\n}\n",
    );
    dir
}

fn gobfuscate() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("gobfuscate");
    cmd.env_remove("RUST_LOG").env_remove("GOPATH");
    cmd
}

#[test]
fn missing_arguments_print_usage() {
    gobfuscate()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_the_flags() {
    gobfuscate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--outdir"))
        .stdout(predicate::str::contains("--padding"))
        .stdout(predicate::str::contains("--noencrypt"))
        .stdout(predicate::str::contains("--goos"));
}

#[test]
fn outdir_writes_an_obfuscated_gopath() {
    let src = source_gopath();
    let out = tempdir().expect("tempdir");
    let dest = out.path().join("obf");
    let plan = out.path().join("plan.json");

    gobfuscate()
        .arg("--outdir")
        .arg("--padding")
        .arg("pepper")
        .arg("--gopath")
        .arg(src.path())
        .arg("--emit-plan")
        .arg(&plan)
        .arg("example.com/app")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Obfuscated GOPATH:"))
        .stdout(predicate::str::contains("Renamed 1 packages"));

    let main = fs::read_to_string(dest.join("src/example.com/app/main.go")).expect("read main.go");
    assert!(!main.contains("example.com/app/helper"));
    assert!(!main.contains("\"world\""));
    assert!(!main.contains("Greet"));
    assert!(main.contains("func main()"));

    let report = fs::read_to_string(&plan).expect("read plan");
    assert!(report.contains("\"example.com/app/helper\""));
    assert!(report.contains("\"Greet\""));
}

#[test]
fn same_padding_gives_the_same_tree() {
    let src = source_gopath();
    let out = tempdir().expect("tempdir");
    let run = |name: &str| {
        let dest = out.path().join(name);
        gobfuscate()
            .args(["--outdir", "--padding", "fixed", "--gopath"])
            .arg(src.path())
            .arg("example.com/app")
            .arg(&dest)
            .assert()
            .success();
        fs::read_to_string(dest.join("src/example.com/app/main.go")).expect("read main.go")
    };
    assert_eq!(run("first"), run("second"));
}

#[test]
fn config_file_supplies_settings() {
    let src = source_gopath();
    let out = tempdir().expect("tempdir");
    let config = out.path().join("gobfuscate.yaml");
    fs::write(
        &config,
        format!("padding: pepper\nkeep: [example.com/app/helper.Greet]\ngopath: [{}]\n", src.path().display()),
    )
    .expect("write config");
    let dest = out.path().join("obf");

    gobfuscate()
        .arg("--outdir")
        .arg("--config")
        .arg(&config)
        .arg("example.com/app")
        .arg(&dest)
        .assert()
        .success();

    let main = fs::read_to_string(dest.join("src/example.com/app/main.go")).expect("read main.go");
    assert!(main.contains(".Greet("));
}

#[test]
fn bad_config_is_reported() {
    let out = tempdir().expect("tempdir");
    let config = out.path().join("gobfuscate.yaml");
    fs::write(&config, "colour: blue\n").expect("write config");

    gobfuscate()
        .arg("--config")
        .arg(&config)
        .arg("example.com/app")
        .arg(out.path().join("app"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"))
        .stderr(predicate::str::contains("colour"));
}

#[test]
fn unknown_package_fails() {
    let src = source_gopath();
    let out = tempdir().expect("tempdir");
    gobfuscate()
        .arg("--gopath")
        .arg(src.path())
        .arg("example.com/nothing")
        .arg(out.path().join("app"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to obfuscate example.com/nothing"))
        .stderr(predicate::str::contains("cannot find package"));
}

#[test]
fn missing_toolchain_fails_the_build() {
    let src = source_gopath();
    let out = tempdir().expect("tempdir");
    gobfuscate()
        .env("GOROOT", out.path())
        .arg("--go")
        .arg(out.path().join("no-such-go"))
        .arg("--gopath")
        .arg(src.path())
        .arg("example.com/app")
        .arg(out.path().join("app"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Build failed"))
        .stderr(predicate::str::contains("failed to spawn"));
}
