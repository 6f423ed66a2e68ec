use l0_compiler::{print_module, Lexer, Module, NodeIdGen, Parser, SourceFile, SourceId};

fn parse(source: &str) -> Module {
    let file = SourceFile::new(SourceId(0), "test.l0".into(), source.to_string());
    let tokens = Lexer::new(&file).tokenize().expect("lexing should succeed");
    let mut ids = NodeIdGen::new();
    let mut parser = Parser::new(tokens, Some(file.path.clone()), &mut ids);
    let module = parser.parse_module();
    let diagnostics = parser.into_diagnostics();
    assert!(
        !diagnostics.has_errors(),
        "unexpected parse errors: {:?}",
        diagnostics.entries()
    );
    module
}

/// Printing a module and re-parsing the output must reach a fixed point:
/// the second print equals the first, whitespace normalized.
fn assert_roundtrip(source: &str) {
    let first = print_module(&parse(source));
    let second = print_module(&parse(&first));
    assert_eq!(first, second, "printer did not reach a fixed point");
}

#[test]
fn roundtrips_declarations() {
    assert_roundtrip(
        "module app.main;\nimport std.io;\n\
         extern func rt_print(s: string);\n\
         struct Point { x: int; y: int; }\n\
         enum Shape { Dot(); Line(a: Point, b: Point); }\n\
         type Alias = Point*;\n\
         let answer: int = 42;\n\
         func main() -> int { return 0; }\n",
    );
}

#[test]
fn roundtrips_statements() {
    assert_roundtrip(
        "module m;\n\
         func f(c: bool, n: int) -> int {\n\
             let total = 0;\n\
             for (let i = 0; i < n; i = i + 1) { total = total + i; }\n\
             while (c) { break; }\n\
             if (total > 10) { return total; } else { total = 0; }\n\
             return total;\n\
         }\n",
    );
}

#[test]
fn roundtrips_match_and_case() {
    assert_roundtrip(
        "module m;\n\
         enum E { V(a: int); W(); }\n\
         func f(e: E, x: int) -> int {\n\
             match (e) { V(a) => { return a; } _ => { } }\n\
             case (x) { 1 => { return 1; } else { return 0; } }\n\
         }\n",
    );
}

#[test]
fn roundtrips_with_statements() {
    assert_roundtrip(
        "module m;\n\
         func f() {\n\
             with (let a = open() => close(a)) { use(a); }\n\
             with (let b = open()) { use(b); } cleanup { close(b); }\n\
         }\n",
    );
}

#[test]
fn roundtrips_expressions() {
    assert_roundtrip(
        "module m;\n\
         func f(p: P*, o: int?) -> int? {\n\
             let a = (1 + 2) * 3 - 4 / 5 % 6;\n\
             let b = !(a == 7) && a < 8 || a >= 9;\n\
             let c = *p;\n\
             let d = o? + (a as int);\n\
             let e = new P(a, d);\n\
             let s = \"text\\n\";\n\
             let ch = 'x';\n\
             drop p;\n\
             return d as int?;\n\
         }\n",
    );
}

#[test]
fn roundtrips_qualified_names() {
    assert_roundtrip(
        "module m;\nimport geo.shapes;\n\
         func f(p: geo.shapes::Point) -> int { return geo.shapes::area(p); }\n",
    );
}
