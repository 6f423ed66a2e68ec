use l0_compiler::{
    Diagnostics, ExprKind, Lexer, Module, NodeIdGen, Parser, Pattern, SourceFile, SourceId, Stmt,
    TopDecl,
};

fn parse(source: &str) -> (Module, Diagnostics) {
    let file = SourceFile::new(SourceId(0), "test.l0".into(), source.to_string());
    let tokens = Lexer::new(&file).tokenize().expect("lexing should succeed");
    let mut ids = NodeIdGen::new();
    let mut parser = Parser::new(tokens, Some(file.path.clone()), &mut ids);
    let module = parser.parse_module();
    (module, parser.into_diagnostics())
}

fn parse_ok(source: &str) -> Module {
    let (module, diagnostics) = parse(source);
    assert!(
        !diagnostics.has_errors(),
        "unexpected parse errors: {:?}",
        diagnostics.entries()
    );
    module
}

fn codes(diagnostics: &Diagnostics) -> Vec<String> {
    diagnostics.entries().iter().map(|d| d.code.clone()).collect()
}

#[test]
fn parses_module_header_and_imports() {
    let module = parse_ok("module app.main;\nimport std.io;\nimport util;\n");
    assert_eq!(module.name, "app.main");
    let imports: Vec<&str> = module.imports.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(imports, ["std.io", "util"]);
}

#[test]
fn parses_declaration_kinds() {
    let module = parse_ok(
        "module m;\n\
         extern func rt_print(s: string);\n\
         func add(a: int, b: int) -> int { return a + b; }\n\
         struct Point { x: int; y: int; }\n\
         enum Color { Red(); Green(); Blue(); }\n\
         type Alias = Point*;\n\
         let answer = 42;\n",
    );
    assert_eq!(module.decls.len(), 6);
    assert!(matches!(&module.decls[0], TopDecl::Func(f) if f.is_extern));
    assert!(matches!(&module.decls[2], TopDecl::Struct(s) if s.fields.len() == 2));
    assert!(matches!(&module.decls[3], TopDecl::Enum(e) if e.variants.len() == 3));
    assert!(matches!(&module.decls[4], TopDecl::TypeAlias(_)));
    assert!(matches!(&module.decls[5], TopDecl::Let(_)));
}

#[test]
fn missing_return_type_defaults_to_void() {
    let module = parse_ok("module m;\nfunc f() { }\n");
    let TopDecl::Func(func) = &module.decls[0] else {
        panic!("expected function");
    };
    assert_eq!(func.return_type.name, "void");
}

#[test]
fn precedence_follows_the_ladder() {
    let module = parse_ok("module m;\nfunc f() -> int { return 2 + 3 * 4; }\n");
    let TopDecl::Func(func) = &module.decls[0] else {
        panic!("expected function");
    };
    let Stmt::Return(ret) = &func.body.stmts[0] else {
        panic!("expected return");
    };
    let value = ret.value.as_ref().expect("return value");
    // The addition is the root; the multiplication nests on the right.
    let ExprKind::Binary { op, right, .. } = &value.kind else {
        panic!("expected binary expression");
    };
    assert_eq!(op.symbol(), "+");
    assert!(matches!(&right.kind, ExprKind::Binary { op, .. } if op.symbol() == "*"));
}

#[test]
fn type_suffixes_parse() {
    let module = parse_ok("module m;\nfunc f(p: Point*?, q: int?) { }\n");
    let TopDecl::Func(func) = &module.decls[0] else {
        panic!("expected function");
    };
    assert_eq!(func.params[0].type_ref.pointer_depth, 1);
    assert!(func.params[0].type_ref.nullable);
    assert_eq!(func.params[1].type_ref.pointer_depth, 0);
    assert!(func.params[1].type_ref.nullable);
}

#[test]
fn builtin_name_in_argument_position_parses_as_type() {
    let module = parse_ok("module m;\nfunc f() -> int { return sizeof(int*); }\n");
    let TopDecl::Func(func) = &module.decls[0] else {
        panic!("expected function");
    };
    let Stmt::Return(ret) = &func.body.stmts[0] else {
        panic!("expected return");
    };
    let ExprKind::Call { args, .. } = &ret.value.as_ref().unwrap().kind else {
        panic!("expected call");
    };
    assert!(matches!(&args[0].kind, ExprKind::TypeArg(t) if t.pointer_depth == 1));
}

#[test]
fn ambiguous_product_in_argument_position_stays_an_expression() {
    let module = parse_ok("module m;\nfunc f(a: int, b: int) -> int { return g(a * b); }\n");
    let TopDecl::Func(func) = &module.decls[0] else {
        panic!("expected function");
    };
    let Stmt::Return(ret) = &func.body.stmts[0] else {
        panic!("expected return");
    };
    let ExprKind::Call { args, .. } = &ret.value.as_ref().unwrap().kind else {
        panic!("expected call");
    };
    assert!(matches!(&args[0].kind, ExprKind::Binary { .. }));
}

#[test]
fn reserved_binary_operator_is_rejected() {
    let (_, diagnostics) = parse("module m;\nfunc f(a: int) -> int { return a & 1; }\n");
    assert!(codes(&diagnostics).contains(&"PAR-0226".to_string()));
}

#[test]
fn match_requires_arms_and_unique_patterns() {
    let (_, diagnostics) = parse(
        "module m;\nfunc f(c: Color) { match (c) { Red() => { } Red() => { } } }\n",
    );
    assert!(codes(&diagnostics).contains(&"PAR-0176".to_string()));

    let (_, diagnostics) = parse("module m;\nfunc f(c: Color) { match (c) { } }\n");
    assert!(codes(&diagnostics).contains(&"PAR-0177".to_string()));
}

#[test]
fn match_patterns_bind_variables() {
    let module = parse_ok(
        "module m;\nfunc f(e: Expr) { match (e) { Add(l, r) => { } _ => { } } }\n",
    );
    let TopDecl::Func(func) = &module.decls[0] else {
        panic!("expected function");
    };
    let Stmt::Match(stmt) = &func.body.stmts[0] else {
        panic!("expected match");
    };
    let Pattern::Variant(pattern) = &stmt.arms[0].pattern else {
        panic!("expected variant pattern");
    };
    assert_eq!(pattern.vars, ["l", "r"]);
    assert!(matches!(stmt.arms[1].pattern, Pattern::Wildcard { .. }));
}

#[test]
fn with_items_must_agree_on_cleanup_style() {
    let (_, diagnostics) = parse(
        "module m;\nfunc f() { with (let a = open() => close(a), let b = open()) { } }\n",
    );
    assert!(codes(&diagnostics).contains(&"PAR-0503".to_string()));

    let (_, diagnostics) =
        parse("module m;\nfunc f() { with (let a = open() => close(a)) { } cleanup { } }\n");
    // A cleanup block alongside inline arrows is invalid.
    assert!(codes(&diagnostics).contains(&"PAR-0504".to_string()));

    let (_, diagnostics) = parse("module m;\nfunc f() { with (let a = open()) { } }\n");
    assert!(codes(&diagnostics).contains(&"PAR-0505".to_string()));
}

#[test]
fn case_arms_follow_else_rules() {
    let (_, diagnostics) =
        parse("module m;\nfunc f(x: int) { case (x) { else { } 1 => { } } }\n");
    assert!(codes(&diagnostics).contains(&"PAR-0234".to_string()));

    let (_, diagnostics) = parse("module m;\nfunc f(x: int) { case (x) { } }\n");
    assert!(codes(&diagnostics).contains(&"PAR-0240".to_string()));
}

#[test]
fn reserved_words_are_invalid_variable_names() {
    let (_, diagnostics) = parse("module m;\nfunc f() { let const = 1; }\n");
    assert!(codes(&diagnostics).contains(&"PAR-0010".to_string()));

    let (_, diagnostics) = parse("module m;\nfunc f() { let int = 1; }\n");
    assert!(codes(&diagnostics).contains(&"PAR-0011".to_string()));
}

#[test]
fn array_types_are_rejected() {
    let (_, diagnostics) = parse("module m;\nfunc f(xs: int[]) { }\n");
    assert!(codes(&diagnostics).contains(&"PAR-9401".to_string()));
}

#[test]
fn parser_recovers_at_statement_boundaries() {
    let (module, diagnostics) = parse(
        "module m;\n\
         func f() { let = 1; let y = 2; let x = ; let z = 3; }\n\
         func g() { }\n",
    );
    // More than one diagnostic: recovery continued past the first error.
    assert!(diagnostics.error_count() >= 2);
    // The second function still parsed.
    assert!(module
        .decls
        .iter()
        .any(|decl| matches!(decl, TopDecl::Func(f) if f.name == "g")));
}

#[test]
fn parse_errors_carry_spans() {
    let (_, diagnostics) = parse("module m;\nfunc f() { let x = ; }\n");
    let diagnostic = diagnostics
        .entries()
        .iter()
        .find(|d| d.code.starts_with("PAR-"))
        .expect("parse diagnostic");
    assert_eq!(diagnostic.line(), Some(2));
}
