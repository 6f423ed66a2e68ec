use l0_compiler::{AnalysisResult, CompileOptions, Compiler, Type};

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
fn resolves_function_struct_and_enum_signatures() {
    let analysis = analyze(&[(
        "m",
        "module m;\n\
         struct Point { x: int; y: int; }\n\
         enum Shape { Dot(); Line(a: Point, b: Point); }\n\
         func mk(x: int, y: int) -> Point { return Point(x, y); }\n",
    )]);
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());

    let func = &analysis.func_types[&("m".to_string(), "mk".to_string())];
    assert_eq!(func.params, vec![Type::Int, Type::Int]);
    assert!(matches!(&func.result, Type::Struct { name, .. } if name == "Point"));

    let info = &analysis.struct_infos[&("m".to_string(), "Point".to_string())];
    assert_eq!(info.fields.len(), 2);

    let info = &analysis.enum_infos[&("m".to_string(), "Shape".to_string())];
    assert_eq!(info.variants.len(), 2);
    assert_eq!(info.variant("Line").unwrap().field_types.len(), 2);
}

#[test]
fn unknown_type_in_signature() {
    let analysis = analyze(&[("m", "module m;\nfunc f(x: Missing) { }\n")]);
    assert!(codes(&analysis).contains(&"SIG-0019".to_string()));
}

#[test]
fn non_type_symbol_used_as_type() {
    let analysis = analyze(&[(
        "m",
        "module m;\nfunc g() { }\nfunc f(x: g) { }\n",
    )]);
    assert!(codes(&analysis).contains(&"SIG-0010".to_string()));
}

#[test]
fn nullable_void_is_rejected() {
    let analysis = analyze(&[("m", "module m;\nfunc f() -> void? { return null; }\n")]);
    assert!(codes(&analysis).contains(&"SIG-0011".to_string()));
}

#[test]
fn alias_cycles_are_detected() {
    let analysis = analyze(&[(
        "m",
        "module m;\ntype A = B;\ntype B = A;\n",
    )]);
    assert!(codes(&analysis).contains(&"SIG-0020".to_string()));
}

#[test]
fn alias_chains_resolve_through_modules() {
    let analysis = analyze(&[
        (
            "app",
            "module app;\nimport geom;\ntype P = Point;\n\
             func f(p: P) -> int { return p.x; }\n",
        ),
        ("geom", "module geom;\nstruct Point { x: int; }\n"),
    ]);
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
    let alias_target = &analysis.func_types[&("app".to_string(), "f".to_string())].params[0];
    assert!(matches!(alias_target, Type::Struct { module, name } if module == "geom" && name == "Point"));
}

#[test]
fn value_type_cycle_is_detected() {
    let analysis = analyze(&[(
        "m",
        "module m;\nstruct A { b: B; }\nstruct B { a: A; }\n",
    )]);
    assert!(codes(&analysis).contains(&"SIG-0040".to_string()));
}

#[test]
fn pointer_fields_break_value_cycles() {
    let analysis = analyze(&[(
        "m",
        "module m;\nstruct Node { next: Node*; value: int; }\n",
    )]);
    assert!(!analysis.has_errors(), "got: {:?}", analysis.diagnostics.entries());
}

#[test]
fn top_level_let_infers_literal_types() {
    let analysis = analyze(&[(
        "m",
        "module m;\nlet count = 42;\nlet name = \"l0\";\nlet flag = true;\n",
    )]);
    assert!(!analysis.has_errors());
    assert_eq!(
        analysis.let_types[&("m".to_string(), "count".to_string())],
        Type::Int
    );
    assert_eq!(
        analysis.let_types[&("m".to_string(), "name".to_string())],
        Type::String
    );
    assert_eq!(
        analysis.let_types[&("m".to_string(), "flag".to_string())],
        Type::Bool
    );
}

#[test]
fn top_level_let_requires_annotation_for_non_literals() {
    let analysis = analyze(&[(
        "m",
        "module m;\nfunc f() -> int { return 1; }\nlet x = f() ;\n",
    )]);
    assert!(codes(&analysis).contains(&"SIG-0030".to_string()));
}

#[test]
fn variant_symbols_get_constructor_types() {
    let analysis = analyze(&[(
        "m",
        "module m;\nenum Opt { NoneV(); SomeV(value: int); }\n",
    )]);
    assert!(!analysis.has_errors());
    let env = &analysis.module_envs["m"];
    let some_sym = env.locals["SomeV"];
    let ty = analysis.symbols.get(some_sym).ty.clone().expect("typed");
    assert!(matches!(ty, Type::Func { ref params, .. } if params == &[Type::Int]));
}
