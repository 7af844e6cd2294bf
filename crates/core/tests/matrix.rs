mod common;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::{gopath, helper_program, read, workspace, ConstHasher, SpellingHasher};
use gobfuscate_core::matrix::{
    encrypt_root_package, ldflags, run_matrix, split_list, BuildInvocation, BuildSettings, Target, Toolchain,
    ToolchainError,
};
use gobfuscate_core::workspace::discover_packages;
use gobfuscate_core::ObfuscateError;

fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
}

fn lookup<'a>(inv: &'a BuildInvocation, key: &str) -> &'a str {
    inv.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str()).unwrap()
}

fn settings() -> BuildSettings {
    BuildSettings {
        package: "h_example_com/h_app".into(),
        output: PathBuf::from("/out/app"),
        tags: "netgo".into(),
        goroot: "/usr/local/go".into(),
        workspace: PathBuf::from("/tmp/ws"),
        ..BuildSettings::default()
    }
}

#[test]
fn matrix_is_os_major_and_defaults_to_host() {
    let targets = Target::parse_matrix("linux, windows", "amd64 arm64");
    let rendered: Vec<String> = targets.iter().map(Target::to_string).collect();
    assert_eq!(rendered, ["linux/amd64", "linux/arm64", "windows/amd64", "windows/arm64"]);

    let host = Target::host();
    assert_eq!(Target::parse_matrix("", ""), [host.clone()]);
    assert_eq!(Target::parse_matrix("plan9", " "), [Target::new("plan9", host.goarch)]);
    assert_eq!(split_list(" a,,b  c "), ["a", "b", "c"]);
}

#[test]
fn output_names() {
    let out = Path::new("/out/app");
    assert_eq!(Target::new("linux", "amd64").output_path(out, false), PathBuf::from("/out/app"));
    assert_eq!(Target::new("linux", "amd64").output_path(out, true), PathBuf::from("/out/app-linux-amd64"));
    assert_eq!(Target::new("windows", "386").output_path(out, false), PathBuf::from("/out/app.exe"));
    assert_eq!(Target::new("windows", "386").output_path(out, true), PathBuf::from("/out/app-windows-386.exe"));
}

#[test]
fn linker_flags() {
    assert_eq!(ldflags(false, false), "-s -w -extldflags '-static'");
    assert_eq!(ldflags(true, false), "-s -w -H=windowsgui -extldflags '-static'");
    assert_eq!(ldflags(false, true), "-s -w");
}

#[test]
fn invocation_environment_is_complete_and_closed() {
    let env = env_of(&[("PATH", "/usr/bin"), ("HOME", "/home/gopher"), ("CC_linux_arm64", "aarch64-gcc")]);
    let inv = BuildInvocation::new(&settings(), &Target::new("linux", "arm64"), true, &env);

    assert_eq!(
        inv.args,
        ["build", "-ldflags", "-s -w -extldflags '-static'", "-tags", "netgo", "-o", "/out/app-linux-arm64", "h_example_com/h_app"]
    );
    assert_eq!(inv.output, PathBuf::from("/out/app-linux-arm64"));
    assert_eq!(lookup(&inv, "GOROOT"), "/usr/local/go");
    assert_eq!(lookup(&inv, "GOOS"), "linux");
    assert_eq!(lookup(&inv, "GOARCH"), "arm64");
    assert_eq!(lookup(&inv, "GOPATH"), "/tmp/ws");
    assert_eq!(lookup(&inv, "GOCACHE"), Path::new("/tmp/ws").join("cache").display().to_string());
    assert_eq!(lookup(&inv, "GO111MODULE"), "off");
    assert_eq!(lookup(&inv, "PATH"), "/usr/bin");
    assert_eq!(lookup(&inv, "CGO_ENABLED"), "0");
    assert_eq!(lookup(&inv, "CC"), "aarch64-gcc");
    assert_eq!(lookup(&inv, "CXX"), "");
    assert!(inv.env.iter().all(|(k, _)| k != "HOME"), "nothing else is inherited");
    assert!(inv.command_line("go").starts_with("go build -ldflags"));
}

#[test]
fn cgo_can_be_enabled_per_target() {
    let env = env_of(&[("CGO_ENABLED_darwin_amd64", "1")]);
    let darwin = BuildInvocation::new(&settings(), &Target::new("darwin", "amd64"), false, &env);
    let linux = BuildInvocation::new(&settings(), &Target::new("linux", "amd64"), false, &env);
    assert_eq!(lookup(&darwin, "CGO_ENABLED"), "1");
    assert_eq!(lookup(&linux, "CGO_ENABLED"), "0");
}

/// Records invocations; fails for the listed targets.
#[derive(Default)]
struct FakeToolchain {
    fail: Vec<Target>,
    seen: Mutex<Vec<Target>>,
}

impl Toolchain for FakeToolchain {
    fn name(&self) -> &str {
        "fake-go"
    }

    fn goroot(&self, _env: &dyn Fn(&str) -> Option<String>) -> Result<String, ToolchainError> {
        Ok("/fake/root".into())
    }

    fn build(&self, invocation: &BuildInvocation) -> Result<(), ToolchainError> {
        self.seen.lock().unwrap().push(invocation.target.clone());
        if self.fail.contains(&invocation.target) {
            return Err(ToolchainError::Failed {
                target: invocation.target.clone(),
                program: "fake-go".into(),
                status: "exit status: 2".into(),
            });
        }
        Ok(())
    }
}

fn invocations(targets: &[Target]) -> Vec<BuildInvocation> {
    let env = env_of(&[]);
    targets.iter().map(|t| BuildInvocation::new(&settings(), t, targets.len() > 1, &env)).collect()
}

#[test]
fn matrix_runs_every_target_in_order() {
    let targets = Target::parse_matrix("linux darwin windows", "amd64");
    let toolchain = FakeToolchain::default();
    let artifacts = run_matrix(&toolchain, &invocations(&targets), 2).unwrap();
    assert_eq!(
        artifacts,
        [
            PathBuf::from("/out/app-linux-amd64"),
            PathBuf::from("/out/app-darwin-amd64"),
            PathBuf::from("/out/app-windows-amd64.exe"),
        ]
    );
    assert_eq!(toolchain.seen.lock().unwrap().len(), 3);
}

#[test]
fn failures_are_aggregated_after_all_targets_ran() {
    let targets = Target::parse_matrix("linux darwin windows", "amd64");
    let toolchain = FakeToolchain {
        fail: vec![Target::new("linux", "amd64"), Target::new("windows", "amd64")],
        ..FakeToolchain::default()
    };
    let err = run_matrix(&toolchain, &invocations(&targets), 0).unwrap_err();
    assert_eq!(toolchain.seen.lock().unwrap().len(), 3);
    match err {
        ObfuscateError::Toolchain(message) => {
            assert!(message.contains("linux/amd64: fake-go exited with exit status: 2"));
            assert!(message.contains("windows/amd64"));
            assert!(!message.contains("darwin"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn root_package_moves_to_its_hashed_path() {
    let dir = helper_program();
    let (ws, set) = workspace(&dir, "example.com/app", &[]);
    let new = encrypt_root_package(&ws, &set, &SpellingHasher).unwrap();
    assert_eq!(new, "h_example_com/h_app");
    assert!(ws.package_dir(&new).join("main.go").is_file());

    let set = discover_packages(&ws, &new, &[]).unwrap();
    assert!(set.get(&new).is_some());
    // The helper still lives at its original path and is still imported from there.
    assert!(read(&ws, &new, "main.go").contains("\"example.com/app/helper\""));
}

#[test]
fn root_package_may_not_land_on_an_existing_package() {
    let dir = gopath(&[("app/main.go", "package main\n"), ("x/x.go", "package x\n")]);
    let (ws, set) = workspace(&dir, "app", &[]);
    let err = encrypt_root_package(&ws, &set, &ConstHasher("x")).unwrap_err();
    assert!(matches!(err, ObfuscateError::PlanCollision { ref name, .. } if name == "x"));
}
