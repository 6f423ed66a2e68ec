use std::collections::HashMap;
use std::fs;

use l0_compiler::{Loader, SearchPaths};
use tempfile::tempdir;

fn loader_for(root: &std::path::Path) -> Loader {
    let mut search = SearchPaths::new();
    search.add_project_root(root);
    Loader::new(search, HashMap::new())
}

#[test]
fn dotted_names_map_to_path_segments() {
    assert_eq!(
        SearchPaths::module_relpath("std.io"),
        std::path::PathBuf::from("std/io.l0")
    );
    assert_eq!(
        SearchPaths::module_relpath("main"),
        std::path::PathBuf::from("main.l0")
    );
}

#[test]
fn builds_transitive_closure_leaves_first() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("app.l0"),
        "module app;\nimport util;\nfunc main() -> int { return 0; }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("util.l0"),
        "module util;\nimport base;\nfunc helper() -> int { return 1; }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("base.l0"),
        "module base;\nfunc bottom() -> int { return 2; }\n",
    )
    .unwrap();

    let mut loader = loader_for(dir.path());
    let cu = loader.build_compilation_unit("app").expect("unit builds");

    assert_eq!(cu.len(), 3);
    let order: Vec<&str> = cu.iter().map(|m| m.name.as_str()).collect();
    // Imports precede their importers.
    assert_eq!(order, ["base", "util", "app"]);
    assert_eq!(cu.entry_name, "app");
}

#[test]
fn system_roots_take_precedence() {
    let system = tempdir().expect("tempdir");
    let project = tempdir().expect("tempdir");
    fs::write(
        system.path().join("shared.l0"),
        "module shared;\nfunc from_system() -> int { return 1; }\n",
    )
    .unwrap();
    fs::write(
        project.path().join("shared.l0"),
        "module shared;\nfunc from_project() -> int { return 2; }\n",
    )
    .unwrap();

    let mut search = SearchPaths::new();
    search.add_system_root(system.path());
    search.add_project_root(project.path());
    let resolved = search.resolve("shared").expect("resolves");
    assert!(resolved.starts_with(system.path()));
}

#[test]
fn missing_module_is_a_drv_error() {
    let dir = tempdir().expect("tempdir");
    let mut loader = loader_for(dir.path());
    assert!(loader.build_compilation_unit("nope").is_err());
    assert!(loader
        .diagnostics
        .entries()
        .iter()
        .any(|d| d.code == "DRV-0010"));
}

#[test]
fn declared_name_must_match_load_name() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alpha.l0"), "module beta;\n").unwrap();

    let mut loader = loader_for(dir.path());
    assert!(loader.build_compilation_unit("alpha").is_err());
    assert!(loader
        .diagnostics
        .entries()
        .iter()
        .any(|d| d.code == "DRV-0020"));
}

#[test]
fn import_cycle_names_every_module_on_the_cycle() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("a.l0"), "module a;\nimport b;\n").unwrap();
    fs::write(dir.path().join("b.l0"), "module b;\nimport c;\n").unwrap();
    fs::write(dir.path().join("c.l0"), "module c;\nimport a;\n").unwrap();

    let mut loader = loader_for(dir.path());
    assert!(loader.build_compilation_unit("a").is_err());

    let cycle: Vec<&l0_compiler::Diagnostic> = loader
        .diagnostics
        .entries()
        .iter()
        .filter(|d| d.code == "DRV-0030")
        .collect();
    assert_eq!(cycle.len(), 1, "exactly one cycle diagnostic");
    let message = &cycle[0].message;
    assert!(message.contains("a -> b -> c -> a"), "got: {message}");
}

#[test]
fn modules_are_cached_across_shared_imports() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("app.l0"),
        "module app;\nimport left;\nimport right;\n",
    )
    .unwrap();
    fs::write(dir.path().join("left.l0"), "module left;\nimport base;\n").unwrap();
    fs::write(dir.path().join("right.l0"), "module right;\nimport base;\n").unwrap();
    fs::write(
        dir.path().join("base.l0"),
        "module base;\nfunc shared() -> int { return 3; }\n",
    )
    .unwrap();

    let mut loader = loader_for(dir.path());
    let cu = loader.build_compilation_unit("app").expect("unit builds");
    // The diamond collapses to one entry for base.
    assert_eq!(cu.len(), 4);
    assert_eq!(cu.iter().filter(|m| m.name == "base").count(), 1);
}

#[test]
fn overrides_bypass_the_filesystem() {
    let mut overrides = HashMap::new();
    overrides.insert(
        "mem".to_string(),
        "module mem;\nfunc f() -> int { return 7; }\n".to_string(),
    );
    let mut loader = Loader::new(SearchPaths::new(), overrides);
    let cu = loader.build_compilation_unit("mem").expect("unit builds");
    assert!(cu.contains("mem"));
}
