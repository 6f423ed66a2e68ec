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

#[test]
fn accepts_a_well_typed_module() {
    let analysis = analyze(
        "module m;\n\
         struct Point { x: int; y: int; }\n\
         func dist2(p: Point) -> int { return p.x * p.x + p.y * p.y; }\n\
         func main() -> int { return dist2(Point(3, 4)); }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn every_checked_expression_has_a_type() {
    let analysis = analyze(
        "module m;\n\
         func f(a: int, b: int) -> int { let c = a + b; return c * 2; }\n\
         func main() -> int { return f(1, 2); }\n",
    );
    assert!(!analysis.has_errors());
    // Property: an error-free analysis types every expression it visited.
    assert!(!analysis.expr_types.is_empty());
}

#[test]
fn if_condition_must_be_bool() {
    let analysis = analyze("module m;\nfunc f(x: int) { if (x) { } }\n");
    assert!(codes(&analysis).contains(&"TYP-0070".to_string()));
}

#[test]
fn while_condition_must_be_bool() {
    let analysis = analyze("module m;\nfunc f(x: int) { while (x) { } }\n");
    assert!(codes(&analysis).contains(&"TYP-0080".to_string()));
}

#[test]
fn non_void_functions_must_return_on_every_path() {
    let analysis = analyze(
        "module m;\nfunc f(c: bool) -> int { if (c) { return 1; } }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0010".to_string()));

    let analysis = analyze(
        "module m;\nfunc f(c: bool) -> int { if (c) { return 1; } else { return 2; } }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn loops_do_not_guarantee_returns() {
    let analysis = analyze(
        "module m;\nfunc f(c: bool) -> int { while (c) { return 1; } }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0010".to_string()));
}

#[test]
fn arithmetic_requires_numeric_operands() {
    let analysis = analyze("module m;\nfunc f() -> int { return 1 + true; }\n");
    assert!(codes(&analysis).contains(&"TYP-0170".to_string()));
}

#[test]
fn mixed_int_byte_arithmetic_is_allowed() {
    let analysis = analyze("module m;\nfunc f(b: byte) -> int { return b + 1; }\n");
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn logical_operators_require_bools() {
    let analysis = analyze("module m;\nfunc f() -> bool { return 1 && true; }\n");
    assert!(codes(&analysis).contains(&"TYP-0171".to_string()));
}

#[test]
fn equality_is_restricted_to_scalars_and_null_checks() {
    let analysis = analyze(
        "module m;\nfunc f(a: string, b: string) -> bool { return a == b; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0173".to_string()));

    let analysis = analyze(
        "module m;\nfunc f(a: int?) -> bool { return a == null; }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn call_arity_is_checked() {
    let analysis = analyze(
        "module m;\nfunc g(a: int) -> int { return a; }\nfunc f() -> int { return g(1, 2); }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0183".to_string()));
}

#[test]
fn nullable_widening_is_accepted_in_calls() {
    let analysis = analyze(
        "module m;\nfunc g(a: int?) -> int { return 0; }\nfunc f() -> int { return g(1); }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn field_access_dereferences_one_pointer_hop() {
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\nfunc f(p: P*) -> int { return p.x; }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());

    let analysis = analyze(
        "module m;\nstruct P { x: int; }\nfunc f(p: P*?) -> int { return p.x; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0220".to_string()));
}

#[test]
fn unknown_field_is_reported() {
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\nfunc f(p: P) -> int { return p.z; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0221".to_string()));
}

#[test]
fn indexing_is_rejected_for_now() {
    let analysis = analyze("module m;\nfunc f(p: int*) -> int { return p[0]; }\n");
    assert!(codes(&analysis).contains(&"TYP-0212".to_string()));
}

#[test]
fn deref_requires_a_non_nullable_pointer() {
    let analysis = analyze("module m;\nfunc f(p: int*) -> int { return *p; }\n");
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());

    let analysis = analyze("module m;\nfunc f(p: int*?) -> int { return *p; }\n");
    assert!(codes(&analysis).contains(&"TYP-0162".to_string()));
}

#[test]
fn cast_rules() {
    // T? as T unwraps.
    let analysis = analyze("module m;\nfunc f(o: int?) -> int { return o as int; }\n");
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());

    // T as T? wraps.
    let analysis = analyze("module m;\nfunc f(x: int) -> int? { return x as int?; }\n");
    assert!(!analysis.has_errors());

    // int -> byte narrows (checked at runtime).
    let analysis = analyze("module m;\nfunc f(x: int) -> byte { return x as byte; }\n");
    assert!(!analysis.has_errors());

    // Unrelated casts are rejected.
    let analysis = analyze("module m;\nfunc f(s: string) -> int { return s as int; }\n");
    assert!(codes(&analysis).contains(&"TYP-0230".to_string()));
}

#[test]
fn try_requires_nullable_operand_and_nullable_function() {
    let analysis = analyze("module m;\nfunc f(x: int) -> int? { return x?; }\n");
    assert!(codes(&analysis).contains(&"TYP-0250".to_string()));

    let analysis = analyze("module m;\nfunc f(x: int?) -> int { return x?; }\n");
    assert!(codes(&analysis).contains(&"TYP-0251".to_string()));

    let analysis = analyze("module m;\nfunc f(x: int?) -> int? { return x? + 1; }\n");
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn null_needs_a_nullable_context() {
    let analysis = analyze("module m;\nfunc f() { let x = null; }\n");
    assert!(codes(&analysis).contains(&"TYP-0052".to_string()));

    let analysis = analyze("module m;\nfunc f() { let x: int? = null; }\n");
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn variables_cannot_be_void() {
    let analysis = analyze(
        "module m;\nfunc g() { }\nfunc f() { let x = g(); }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0053".to_string()));
}

#[test]
fn drop_tracks_liveness() {
    // Use after drop.
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\n\
         func f() -> int { let p = new P(1); drop p; return p.x; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0150".to_string()));

    // Double drop.
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\n\
         func f() { let p = new P(1); drop p; drop p; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0062".to_string()));

    // Reassignment restores usability.
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\n\
         func f() -> int { let p = new P(1); drop p; p = new P(2); let v = p.x; drop p; return v; }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn drop_requires_a_pointer() {
    let analysis = analyze("module m;\nfunc f(x: int) { drop x; }\n");
    assert!(codes(&analysis).contains(&"TYP-0061".to_string()));
}

#[test]
fn dropping_in_one_branch_poisons_the_merge() {
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\n\
         func f(c: bool) -> int { let p = new P(1); if (c) { drop p; } return p.x; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0150".to_string()));
}

#[test]
fn assignment_target_must_be_a_place() {
    let analysis = analyze(
        "module m;\nfunc g() -> int { return 1; }\nfunc f() { g() = 2; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0141".to_string()));
}

#[test]
fn shadowing_warns_but_does_not_error() {
    let analysis = analyze(
        "module m;\nfunc f() -> int { let x = 1; { let x = 2; let y = x; } return x; }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
    let warning = analysis
        .diagnostics
        .entries()
        .iter()
        .find(|d| d.code == "TYP-0021")
        .expect("shadow warning");
    assert_eq!(warning.severity, Severity::Warning);
}

#[test]
fn duplicate_locals_in_one_scope_are_structural_errors() {
    let analysis = analyze("module m;\nfunc f() { let x = 1; let x = 2; }\n");
    assert!(codes(&analysis).contains(&"LOC-0010".to_string()));
}

#[test]
fn break_outside_loop_is_rejected() {
    let analysis = analyze("module m;\nfunc f() { break; }\n");
    assert!(codes(&analysis).contains(&"TYP-0110".to_string()));
}

#[test]
fn unreachable_code_after_return_warns() {
    let analysis = analyze(
        "module m;\nfunc f() -> int { return 1; let x = 2; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0031".to_string()));
}

#[test]
fn case_literals_must_match_scrutinee_type() {
    let analysis = analyze(
        "module m;\nfunc f(x: int) { case (x) { \"a\" => { } else { } } }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0132".to_string()));
}

#[test]
fn duplicate_case_literals_are_rejected() {
    let analysis = analyze(
        "module m;\nfunc f(x: int) { case (x) { 1 => { } 1 => { } } }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0133".to_string()));
}

#[test]
fn case_scrutinee_must_be_scalar_or_string() {
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\nfunc f(p: P) { case (p) { else { } } }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0131".to_string()));
}

#[test]
fn sizeof_and_ord_intrinsics_type_check() {
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\n\
         func f() -> int { return sizeof(P*); }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
    assert!(!analysis.intrinsic_targets.is_empty());

    let analysis = analyze(
        "module m;\nenum Color { Red(); Blue(); }\n\
         func f(c: Color) -> int { return ord(c); }\n",
    );
    assert!(!analysis.has_errors());

    let analysis = analyze("module m;\nfunc f(x: int) -> int { return ord(x); }\n");
    assert!(codes(&analysis).contains(&"TYP-0243".to_string()));
}

#[test]
fn overqualified_paths_are_rejected() {
    let analysis = analyze(
        "module m;\nenum Color { Red(); }\n\
         func f() -> Color { return m::Color::Red(); }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0158".to_string()));
}

#[test]
fn bare_zero_arg_variants_are_values() {
    let analysis = analyze(
        "module m;\nenum Color { Red(); Blue(); }\n\
         func f() -> Color { return Red; }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());

    let analysis = analyze(
        "module m;\nenum E { V(x: int); }\nfunc f() -> E { return V; }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0152".to_string()));
}

#[test]
fn new_rules() {
    // Zero-arg new zero-initializes.
    let analysis = analyze(
        "module m;\nstruct P { x: int; }\nfunc f() -> P* { return new P(); }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());

    // Bare enum type cannot be allocated.
    let analysis = analyze(
        "module m;\nenum E { V(); }\nfunc f() -> E* { return new E(); }\n",
    );
    assert!(codes(&analysis).contains(&"TYP-0281".to_string()));

    // Variant constructor allocation works.
    let analysis = analyze(
        "module m;\nenum E { V(x: int); }\nfunc f() -> E* { return new V(42); }\n",
    );
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());

    // Builtin with one initializer.
    let analysis = analyze("module m;\nfunc f() -> int* { return new int(7); }\n");
    assert!(!analysis.has_errors());
}
