use l0_compiler::{AnalysisResult, CompileOptions, Compiler, Severity};

fn analyze(modules: &[(&str, &str)]) -> AnalysisResult {
    let mut options = CompileOptions::default();
    for (name, source) in modules {
        options
            .module_overrides
            .insert(name.to_string(), source.to_string());
    }
    Compiler::new(options).analyze(modules[0].0)
}

fn codes(analysis: &AnalysisResult) -> Vec<String> {
    analysis
        .diagnostics
        .entries()
        .iter()
        .map(|d| d.code.clone())
        .collect()
}

#[test]
fn duplicate_top_level_definition_is_an_error() {
    let analysis = analyze(&[(
        "m",
        "module m;\nfunc f() -> int { return 1; }\nfunc f() -> int { return 2; }\n",
    )]);
    assert!(codes(&analysis).contains(&"NAM-0010".to_string()));
}

#[test]
fn enum_variants_are_module_level_symbols() {
    let analysis = analyze(&[(
        "m",
        "module m;\nenum Color { Red(); Green(); }\nfunc f() -> Color { return Red(); }\n",
    )]);
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
    let env = &analysis.module_envs["m"];
    assert!(env.locals.contains_key("Red"));
    assert!(env.locals.contains_key("Green"));
}

#[test]
fn open_imports_bring_symbols_in_unqualified() {
    let analysis = analyze(&[
        (
            "app",
            "module app;\nimport util;\nfunc main() -> int { return helper(); }\n",
        ),
        (
            "util",
            "module util;\nfunc helper() -> int { return 5; }\n",
        ),
    ]);
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
    assert!(analysis.module_envs["app"].imported.contains_key("helper"));
}

#[test]
fn local_definition_shadows_import_with_warning() {
    let analysis = analyze(&[
        (
            "app",
            "module app;\nimport util;\nfunc helper() -> int { return 1; }\n\
             func main() -> int { return helper(); }\n",
        ),
        (
            "util",
            "module util;\nfunc helper() -> int { return 2; }\n",
        ),
    ]);
    assert!(!analysis.has_errors());
    let warning = analysis
        .diagnostics
        .entries()
        .iter()
        .find(|d| d.code == "NAM-0021")
        .expect("shadowing warning");
    assert_eq!(warning.severity, Severity::Warning);
}

#[test]
fn compatible_extern_redeclaration_warns_differently() {
    let analysis = analyze(&[
        (
            "app",
            "module app;\nimport util;\nextern func rt_print_int(x: int);\n\
             func main() { rt_print_int(1); }\n",
        ),
        ("util", "module util;\nextern func rt_print_int(x: int);\n"),
    ]);
    assert!(!analysis.has_errors());
    assert!(codes(&analysis).contains(&"NAM-0020".to_string()));
}

#[test]
fn name_from_two_modules_is_ambiguous_at_use_site() {
    let analysis = analyze(&[
        (
            "app",
            "module app;\nimport left;\nimport right;\n\
             func main() -> int { return thing(); }\n",
        ),
        ("left", "module left;\nfunc thing() -> int { return 1; }\n"),
        ("right", "module right;\nfunc thing() -> int { return 2; }\n"),
    ]);
    // The import itself warns; the use errors.
    assert!(codes(&analysis).contains(&"NAM-0022".to_string()));
    assert!(analysis.has_errors());
    assert!(analysis
        .diagnostics
        .entries()
        .iter()
        .any(|d| d.code == "TYP-0189" && d.message.contains("ambiguous")));
}

#[test]
fn qualified_reference_disambiguates() {
    let analysis = analyze(&[
        (
            "app",
            "module app;\nimport left;\nimport right;\n\
             func main() -> int { return left::thing(); }\n",
        ),
        ("left", "module left;\nfunc thing() -> int { return 1; }\n"),
        ("right", "module right;\nfunc thing() -> int { return 2; }\n"),
    ]);
    assert!(
        !analysis.has_errors(),
        "got: {:?}",
        analysis.diagnostics.entries()
    );
}

#[test]
fn qualified_reference_requires_the_import() {
    let analysis = analyze(&[
        (
            "app",
            "module app;\nfunc main() -> int { return util::helper(); }\n",
        ),
        ("util", "module util;\nfunc helper() -> int { return 5; }\n"),
    ]);
    // util is never imported by app, and never loaded at all.
    assert!(analysis.has_errors());
}
