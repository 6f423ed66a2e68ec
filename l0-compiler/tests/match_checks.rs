use l0_compiler::{AnalysisResult, CompileOptions, Compiler, Severity};

fn analyze(source: &str) -> AnalysisResult {
    let mut options = CompileOptions::default();
    options
        .module_overrides
        .insert("m".to_string(), source.to_string());
    Compiler::new(options).analyze("m")
}

fn codes(analysis: &AnalysisResult) -> Vec<String> {
    analysis
        .diagnostics
        .entries()
        .iter()
        .map(|d| d.code.clone())
        .collect()
}

const COLOR: &str = "module m;\nenum Color { Red(); Green(); Blue(); }\n";

#[test]
fn exhaustive_match_passes() {
    let analysis = analyze(&format!(
        "{COLOR}func f(c: Color) -> int {{ match (c) {{ \
         Red() => {{ return 1; }} Green() => {{ return 2; }} Blue() => {{ return 3; }} }} }}\n"
    ));
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn missing_variant_is_non_exhaustive() {
    let analysis = analyze(&format!(
        "{COLOR}func f(c: Color) -> int {{ match (c) {{ \
         Red() => {{ return 1; }} Green() => {{ return 2; }} }} }}\n"
    ));
    let diagnostic = analysis
        .diagnostics
        .entries()
        .iter()
        .find(|d| d.code == "MTC-0104")
        .expect("non-exhaustive diagnostic");
    assert_eq!(diagnostic.severity, Severity::Error);
    assert!(diagnostic.message.contains("Blue"), "got: {}", diagnostic.message);
    // The diagnostic points at the match statement itself.
    assert_eq!(diagnostic.line(), Some(3));
}

#[test]
fn wildcard_makes_a_match_exhaustive() {
    let analysis = analyze(&format!(
        "{COLOR}func f(c: Color) -> int {{ match (c) {{ \
         Red() => {{ return 1; }} _ => {{ return 0; }} }} }}\n"
    ));
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn redundant_wildcard_warns() {
    let analysis = analyze(&format!(
        "{COLOR}func f(c: Color) -> int {{ match (c) {{ \
         Red() => {{ return 1; }} Green() => {{ return 2; }} Blue() => {{ return 3; }} \
         _ => {{ return 0; }} }} }}\n"
    ));
    assert!(!analysis.has_errors());
    let warning = analysis
        .diagnostics
        .entries()
        .iter()
        .find(|d| d.code == "MTC-0105")
        .expect("redundant wildcard warning");
    assert_eq!(warning.severity, Severity::Warning);
}

#[test]
fn unknown_variant_is_reported() {
    let analysis = analyze(&format!(
        "{COLOR}func f(c: Color) {{ match (c) {{ Purple() => {{ }} _ => {{ }} }} }}\n"
    ));
    assert!(codes(&analysis).contains(&"MTC-0102".to_string()));
}

#[test]
fn pattern_arity_must_match_payload() {
    let analysis = analyze(
        "module m;\nenum E { V(a: int, b: int); }\n\
         func f(e: E) { match (e) { V(x) => { } } }\n",
    );
    assert!(codes(&analysis).contains(&"MTC-0101".to_string()));
}

#[test]
fn pattern_variables_bind_payload_types() {
    let analysis = analyze(
        "module m;\nenum E { V(a: int, b: bool); }\n\
         func f(e: E) -> int { match (e) { V(x, y) => { if (y) { return x; } return 0; } } }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn scrutinee_must_be_an_enum() {
    let analysis = analyze("module m;\nfunc f(x: int) { match (x) { _ => { } } }\n");
    assert!(codes(&analysis).contains(&"MTC-0100".to_string()));
}

#[test]
fn scrutinee_auto_dereferences_one_pointer_hop() {
    let analysis = analyze(&format!(
        "{COLOR}func f(c: Color*) -> int {{ match (c) {{ \
         Red() => {{ return 1; }} _ => {{ return 0; }} }} }}\n"
    ));
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn match_counts_as_returning_when_exhaustive() {
    let analysis = analyze(&format!(
        "{COLOR}func f(c: Color) -> int {{ match (c) {{ \
         Red() => {{ return 1; }} _ => {{ return 0; }} }} }}\n"
    ));
    assert!(!analysis.has_errors());

    // Non-exhaustive arms cannot carry the whole function's return.
    let analysis = analyze(
        "module m;\nenum E { A(); B(); }\n\
         func f(e: E) -> int { match (e) { A() => { return 1; } B() => { } } }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0010".to_string()));
}
