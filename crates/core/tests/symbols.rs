mod common;

use common::{gopath, helper_program, read, snapshot, workspace, ConstHasher, SpellingHasher};
use gobfuscate_core::hasher::NameHasher;
use gobfuscate_core::pkgpath::PathPlan;
use gobfuscate_core::symbols::{
    guess_package_name, is_test_entry, obfuscate_symbols, KeepList, RenameKey, RenamePlan,
};
use gobfuscate_core::syntax::SourceUnit;
use gobfuscate_core::ObfuscateError;

const APP: &str = "example.com/app";
const HELPER: &str = "example.com/app/helper";

fn renamed(plan: &RenamePlan, package: &str, name: &str) -> Option<String> {
    plan.get(&RenameKey::new(package, name)).map(str::to_string)
}

/// Whether `name` occurs as a whole identifier anywhere in `src`.
fn has_ident(src: &str, name: &str) -> bool {
    src.split(|c: char| !(c.is_alphanumeric() || c == '_')).any(|word| word == name)
}

#[test]
fn helper_program_is_renamed_consistently() {
    let dir = helper_program();
    let (ws, set) = workspace(&dir, APP, &[]);
    let report = obfuscate_symbols(&set, &SpellingHasher, &KeepList::default(), &PathPlan::default()).unwrap();
    assert!(report.unresolved.is_empty(), "{:?}", report.unresolved);

    let plan = &report.plan;
    assert_eq!(renamed(plan, HELPER, "Greet").as_deref(), Some("H_example_com_app_helper_Greet"));
    assert_eq!(renamed(plan, HELPER, "join").as_deref(), Some("h_example_com_app_helper_join"));
    assert!(renamed(plan, HELPER, "prefix").is_some());
    assert!(renamed(plan, APP, "config").is_some());
    assert!(renamed(plan, APP, "name").is_some());
    assert!(renamed(plan, APP, "main").is_none());
    assert!(renamed(plan, APP, "Count").is_none());
    assert!(renamed(plan, APP, "fmt").is_none());

    let main = read(&ws, APP, "main.go");
    assert!(main.contains("helper.H_example_com_app_helper_Greet("));
    assert!(main.contains("func main()"));
    assert!(main.contains("fmt.Println("));
    assert!(main.contains("Count: 2"));
    assert!(main.contains(".Count)"));
    assert!(!has_ident(&main, "name"), "field, key and selector all renamed:\n{main}");
    assert!(!has_ident(&main, "config"));

    let helper = read(&ws, HELPER, "helper.go");
    assert!(helper.contains("func H_example_com_app_helper_Greet("));
    assert!(helper.contains("strings.TrimSpace("));
    assert!(!has_ident(&helper, "join"));
    assert!(!has_ident(&helper, "prefix"));
    // Comments are not code.
    assert!(helper.contains("// Greet builds a greeting."));

    SourceUnit::parse("main.go", &main).unwrap();
    SourceUnit::parse("helper.go", &helper).unwrap();
}

#[test]
fn plans_are_deterministic_for_a_salt() {
    let run = |salt: &str| {
        let dir = helper_program();
        let (ws, set) = workspace(&dir, APP, &[]);
        let report =
            obfuscate_symbols(&set, &NameHasher::new(salt), &KeepList::default(), &PathPlan::default()).unwrap();
        let entries: Vec<(RenameKey, String)> =
            report.plan.entries().map(|(k, v)| (k.clone(), v.to_string())).collect();
        (entries, read(&ws, APP, "main.go"))
    };
    let (first, first_src) = run("fixed");
    let (second, second_src) = run("fixed");
    assert_eq!(first, second);
    assert_eq!(first_src, second_src);
    let (other, _) = run("other");
    assert_ne!(first, other);
}

#[test]
fn keep_list_and_exclusions() {
    let dir = gopath(&[
        ("example.com/app/main.go", common::APP_MAIN),
        ("example.com/app/helper/helper.go", common::HELPER),
        (
            "example.com/app/helper/helper_test.go",
            "package helper\n\nimport \"testing\"\n\nfunc TestGreet(t *testing.T) { fixture(t) }\n\nfunc BenchmarkJoin(b *testing.B) {}\n\nfunc Testify() {}\n\nfunc fixture(t *testing.T) { t.Helper() }\n\nfunc init() {}\n",
        ),
    ]);
    let (ws, set) = workspace(&dir, APP, &[]);
    let keep = KeepList::new(["example.com/app/helper.Greet", "prefix"]);
    let report = obfuscate_symbols(&set, &SpellingHasher, &keep, &PathPlan::default()).unwrap();
    let plan = &report.plan;

    assert!(renamed(plan, HELPER, "Greet").is_none());
    assert!(renamed(plan, HELPER, "prefix").is_none());
    assert!(renamed(plan, HELPER, "join").is_some());
    assert!(renamed(plan, HELPER, "TestGreet").is_none());
    assert!(renamed(plan, HELPER, "BenchmarkJoin").is_none());
    assert!(renamed(plan, HELPER, "Testify").is_some());
    assert!(renamed(plan, HELPER, "fixture").is_some());
    assert!(renamed(plan, HELPER, "init").is_none());
    assert!(renamed(plan, HELPER, "t").is_some());

    let test = read(&ws, HELPER, "helper_test.go");
    assert!(test.contains("func TestGreet(h_example_com_app_helper_t *testing.T)"));
    assert!(test.contains(".Helper()"));
    assert!(read(&ws, APP, "main.go").contains("helper.Greet("));
}

#[test]
fn keep_list_matches_original_paths_after_moves() {
    let dir = gopath(&[
        ("example.com/app/main.go", &common::APP_MAIN.replace("example.com/app/helper", "h/moved")),
        ("h/moved/helper.go", common::HELPER),
    ]);
    let (_ws, set) = workspace(&dir, APP, &[]);
    let mut paths = PathPlan::default();
    paths.insert(HELPER, "h/moved");
    let keep = KeepList::new(["example.com/app/helper.join"]);
    let report = obfuscate_symbols(&set, &SpellingHasher, &keep, &paths).unwrap();
    assert!(renamed(&report.plan, "h/moved", "join").is_none());
    assert!(renamed(&report.plan, "h/moved", "Greet").is_some());
}

#[test]
fn unresolved_names_are_never_renamed() {
    let dir = gopath(&[(
        "example.com/lib/lib.go",
        "package lib\n\nimport . \"strings\"\n\nfunc shout(s string) string {\n\treturn ToUpper(s)\n}\n",
    )]);
    let (ws, set) = workspace(&dir, "example.com/lib", &[]);
    let report = obfuscate_symbols(&set, &SpellingHasher, &KeepList::default(), &PathPlan::default()).unwrap();
    assert_eq!(report.unresolved.len(), 1);
    let unresolved = &report.unresolved[0];
    assert_eq!(unresolved.name, "ToUpper");
    assert_eq!((unresolved.line, unresolved.column), (6, 9));
    assert!(renamed(&report.plan, "example.com/lib", "ToUpper").is_none());
    assert!(renamed(&report.plan, "example.com/lib", "shout").is_some());
    let src = read(&ws, "example.com/lib", "lib.go");
    assert!(src.contains("return ToUpper("));
}

#[test]
fn embedded_and_literal_keys() {
    let dir = gopath(&[
        (
            "example.com/app/main.go",
            r#"package main

import (
	"net/http"

	"example.com/app/model"
)

type Base struct{ id int }

type wrapper struct {
	Base
	*model.Item
	label string
}

type registry map[string]wrapper

const limit = "k"

func main() {
	type pair struct{ left, right int }
	p := pair{left: 1, right: 2}
	w := wrapper{Base: Base{id: 1}, label: "x"}
	r := registry{limit: w}
	items := []wrapper{{label: "y"}}
	srv := &http.Server{Addr: ":80"}
	_ = []model.Item{{Title: "t"}}
	println(p.left+p.right, w.id, w.Item.Title, r[limit].label, items[0].Base.id, srv.Addr)
}
"#,
        ),
        ("example.com/app/model/model.go", "package model\n\ntype Item struct {\n\tTitle string\n\tsecret int\n}\n\nfunc (i *Item) touch() { i.secret++ }\n"),
    ]);
    let (ws, set) = workspace(&dir, APP, &[]);
    let report = obfuscate_symbols(&set, &SpellingHasher, &KeepList::default(), &PathPlan::default()).unwrap();
    assert!(report.unresolved.is_empty(), "{:?}", report.unresolved);
    let plan = &report.plan;

    // Embedded exported types name a field and keep their spelling.
    assert!(renamed(plan, APP, "Base").is_none());
    assert!(renamed(plan, "example.com/app/model", "Item").is_none());
    assert!(renamed(plan, "example.com/app/model", "secret").is_some());
    assert!(renamed(plan, "example.com/app/model", "touch").is_some());
    for name in ["left", "right", "label", "id", "limit", "registry", "pair", "wrapper"] {
        assert!(renamed(plan, APP, name).is_some(), "{name} should be renamed");
    }

    let main = read(&ws, APP, "main.go");
    for gone in ["left", "right", "label", "limit", "pair", "wrapper", "registry"] {
        assert!(!has_ident(&main, gone), "{gone} left in:\n{main}");
    }
    assert!(main.contains("Addr: \":80\""));
    assert!(main.contains("Title: \"t\""));
    assert!(main.contains("w.Item.Title"));
    assert!(main.contains("Base: Base{"));
}

#[test]
fn colliding_names_abort_planning() {
    let dir = helper_program();
    let (_ws, set) = workspace(&dir, APP, &[]);
    let before = snapshot(dir.path());
    let err = obfuscate_symbols(&set, &ConstHasher("zz"), &KeepList::default(), &PathPlan::default()).unwrap_err();
    assert!(matches!(err, ObfuscateError::PlanCollision { ref name, .. } if name == "zz" || name == "Zz"));
    assert_eq!(snapshot(dir.path()), before, "no unit is written when planning fails");

    // A new name that already exists as an identifier is a collision too.
    let dir = helper_program();
    let (_ws, set) = workspace(&dir, APP, &[]);
    let before = snapshot(dir.path());
    let err = obfuscate_symbols(&set, &ConstHasher("c"), &KeepList::default(), &PathPlan::default()).unwrap_err();
    assert_eq!(snapshot(dir.path()), before);
    match err {
        ObfuscateError::PlanCollision { second, name, .. } => {
            assert_eq!(name, "c");
            assert!(second.contains("existing identifier"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn rename_plan_rejects_duplicate_names() {
    let mut plan = RenamePlan::new();
    plan.insert(RenameKey::new("p", "a"), "x".into()).unwrap();
    plan.insert(RenameKey::new("p", "a"), "x".into()).unwrap();
    let err = plan.insert(RenameKey::new("q", "a"), "x".into()).unwrap_err();
    assert!(matches!(err, ObfuscateError::PlanCollision { .. }));
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.get(&RenameKey::new("p", "a")), Some("x"));

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json, serde_json::json!([{ "package": "p", "name": "a", "new_name": "x" }]));
}

#[test]
fn helpers() {
    assert!(is_test_entry("TestMain"));
    assert!(is_test_entry("Test"));
    assert!(is_test_entry("Test_under"));
    assert!(is_test_entry("ExampleGreet"));
    assert!(is_test_entry("FuzzParse"));
    assert!(!is_test_entry("Testify"));
    assert!(!is_test_entry("helper"));

    assert_eq!(guess_package_name("gopkg.in/yaml.v3"), "yaml");
    assert_eq!(guess_package_name("github.com/mattn/go-sqlite3"), "sqlite3");
    assert_eq!(guess_package_name("github.com/x/y/v2"), "y");
    assert_eq!(guess_package_name("fmt"), "fmt");

    let keep = KeepList::new(["Exact", "a/b.Name", ""]);
    assert!(keep.matches("anything", "Exact"));
    assert!(keep.matches("a/b", "Name"));
    assert!(!keep.matches("a/c", "Name"));
}
