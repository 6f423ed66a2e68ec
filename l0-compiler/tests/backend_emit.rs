use l0_compiler::{Compilation, CompileOptions, Compiler};

fn compile_with(source: &str, configure: impl FnOnce(&mut CompileOptions)) -> Compilation {
    let mut options = CompileOptions::default();
    options
        .module_overrides
        .insert("m".to_string(), source.to_string());
    configure(&mut options);
    Compiler::new(options).compile("m")
}

fn compile(source: &str) -> String {
    let compilation = compile_with(source, |_| {});
    assert!(
        !compilation.had_errors,
        "compilation failed: {:?}",
        compilation.analysis.diagnostics.entries()
    );
    compilation.c_source
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn arithmetic_lowers_through_checked_helpers() {
    let c = compile("module m;\nfunc main() -> int { return 2 + 3 * 4; }\n");
    assert!(c.contains("_rt_iadd"), "missing checked add:\n{c}");
    assert!(c.contains("_rt_imul"), "missing checked mul:\n{c}");
    assert!(c.contains("_rt_idiv") == false);
}

#[test]
fn entry_wrapper_is_emitted_for_main() {
    let c = compile("module m;\nfunc main() -> int { return 0; }\n");
    assert!(c.contains("int main(int argc, char **argv)"));
    assert!(c.contains("_rt_init_args(argc, argv);"));
    assert!(c.contains("return (int) l0_m_main();"));
}

#[test]
fn no_entry_wrapper_without_main() {
    let c = compile("module m;\nfunc helper() -> int { return 0; }\n");
    assert!(!c.contains("int main(int argc, char **argv)"));
}

#[test]
fn function_names_are_mangled_and_externs_stay_verbatim() {
    let c = compile(
        "module m;\nextern func rt_print_int(x: int);\n\
         func show(x: int) { rt_print_int(x); }\n",
    );
    assert!(c.contains("void l0_m_show(l0_int x)"));
    assert!(c.contains("rt_print_int(x)"));
    assert!(!c.contains("l0_m_rt_print_int"));
}

#[test]
fn runtime_include_follows_trace_defines() {
    let compilation = compile_with(
        "module m;\nfunc main() -> int { return 0; }\n",
        |options| {
            options.trace_arc = true;
            options.trace_memory = true;
        },
    );
    let c = compilation.c_source;
    let arc = c.find("#define L0_TRACE_ARC 1").expect("arc define");
    let mem = c.find("#define L0_TRACE_MEMORY 1").expect("mem define");
    let include = c.find("#include \"l0_runtime.h\"").expect("runtime include");
    assert!(arc < include && mem < include);
}

#[test]
fn line_directives_are_on_by_default_and_can_be_disabled() {
    let source = "module m;\nfunc main() -> int { return 0; }\n";
    let with_lines = compile(source);
    assert!(with_lines.contains("#line 2 \"m.l0\""));

    let without = compile_with(source, |options| options.emit_line_directives = false);
    assert!(!without.c_source.contains("#line"));
}

#[test]
fn structs_and_enums_lower_to_c99_shapes() {
    let c = compile(
        "module m;\n\
         struct Empty { }\n\
         struct Point { x: int; y: int; }\n\
         enum Color { Red(); Green(); Blue(); }\n\
         func main() -> int { let p = Point(1, 2); return p.x; }\n",
    );
    // Zero-field structs get a dummy member for C99 conformance.
    assert!(c.contains("char __dummy__;"));
    assert!(c.contains("struct l0_m_Point {"));
    assert!(c.contains("enum l0_m_Color_tag {"));
    assert!(c.contains("l0_m_Color_Red,"));
    assert!(c.contains("} data;"));
    assert!(c.contains("struct l0_m_Empty;"), "forward declarations expected");
}

#[test]
fn match_lowers_to_a_tag_switch() {
    let c = compile(
        "module m;\nenum Color { Red(); Green(); Blue(); }\n\
         func pick(c: Color) -> int { match (c) { \
         Red() => { return 1; } Green() => { return 2; } Blue() => { return 3; } } }\n",
    );
    assert!(c.contains("switch (_scrutinee.tag)"));
    assert!(c.contains("case l0_m_Color_Red:"));
    assert!(c.contains("case l0_m_Color_Blue:"));
}

#[test]
fn pattern_bindings_read_the_payload_by_name() {
    let c = compile(
        "module m;\nenum E { V(a: int, b: int); W(); }\n\
         func f(e: E) -> int { match (e) { V(x, y) => { return x + y; } W() => { return 0; } } }\n",
    );
    assert!(c.contains("l0_int x = _scrutinee.data.V.a;"));
    assert!(c.contains("l0_int y = _scrutinee.data.V.b;"));
}

#[test]
fn scalar_case_lowers_to_switch_and_string_case_to_equality_chain() {
    let c = compile(
        "module m;\nfunc f(x: int) -> int { case (x) { 1 => { return 10; } else { return 0; } } }\n",
    );
    assert!(c.contains("switch (_scrutinee)"));
    assert!(c.contains("case 1:"));
    assert!(c.contains("default:"));

    let c = compile(
        "module m;\nfunc f(s: string) -> int { case (s) { \"a\" => { return 1; } else { return 0; } } }\n",
    );
    assert!(c.contains("rt_string_equals(_scrutinee,"));
}

#[test]
fn nullable_value_types_get_wrapper_typedefs() {
    let c = compile(
        "module m;\nfunc f(o: int?) -> int? { return o; }\nfunc main() -> int { return 0; }\n",
    );
    assert!(c.contains("typedef struct { l0_bool has_value; l0_int value; } l0_opt_int;"));
}

#[test]
fn nullable_pointers_use_the_null_niche() {
    let c = compile(
        "module m;\nstruct P { x: int; }\n\
         func f(p: P*?) -> bool { return p == null; }\n",
    );
    // T*? is a bare pointer; the null check compares against NULL.
    assert!(c.contains("(p == NULL)"));
    assert!(!c.contains("l0_opt_p_"));
}

#[test]
fn try_lowers_to_check_and_early_return() {
    let c = compile("module m;\nfunc g(o: int?) -> int? { let v = o?; return v; }\n");
    assert!(c.contains(".has_value) return"), "missing try check:\n{c}");
    assert!(c.contains("l0_opt_int"));
}

#[test]
fn checked_narrowing_uses_the_runtime_helper() {
    let c = compile("module m;\nfunc f(x: int) -> byte { return x as byte; }\n");
    assert!(c.contains("_rt_narrow_l0_byte"));
}

#[test]
fn unwrap_cast_goes_through_the_checked_helper() {
    let c = compile("module m;\nfunc f(o: int?) -> int { return o as int; }\n");
    assert!(c.contains("_unwrap_opt"), "missing checked unwrap:\n{c}");
}

#[test]
fn new_and_drop_lower_through_the_tracker() {
    let c = compile(
        "module m;\nstruct P { x: int; }\nfunc f() { let p = new P(7); drop p; }\n",
    );
    assert!(c.contains("_rt_alloc_obj((l0_int)sizeof(struct l0_m_P))"));
    assert!(c.contains("_rt_drop((void*)p);"));
    assert!(c.contains("p = NULL;"));
}

#[test]
fn string_literals_use_the_const_form() {
    let c = compile(
        "module m;\nextern func rt_print(s: string);\nfunc f() { rt_print(\"hi\\n\"); }\n",
    );
    assert!(c.contains("L0_STRING_CONST(\"hi\\n\", 3)"), "got:\n{c}");
}

#[test]
fn copying_a_place_string_retains_and_scope_exit_releases() {
    let c = compile(
        "module m;\nfunc copy(a: string) -> string { let t = a; let u = t; return u; }\n",
    );
    // Two retain-copies; the returned binding moves, so exactly one
    // release remains for the non-returned local.
    assert_eq!(count(&c, "rt_string_retain("), 2, "got:\n{c}");
    assert_eq!(count(&c, "rt_string_release("), 1, "got:\n{c}");
}

#[test]
fn fresh_rvalue_strings_are_not_retained() {
    let c = compile(
        "module m;\nextern func rt_string_concat(a: string, b: string) -> string;\n\
         func join(a: string, b: string) -> string { let t = rt_string_concat(a, b); return t; }\n",
    );
    // The concat result is already fresh: no retain; the move on return
    // leaves no release either.
    assert_eq!(count(&c, "rt_string_retain("), 0, "got:\n{c}");
    assert_eq!(count(&c, "rt_string_release("), 0, "got:\n{c}");
}

#[test]
fn discarded_fresh_string_is_materialized_and_released() {
    let c = compile(
        "module m;\nextern func rt_string_concat(a: string, b: string) -> string;\n\
         func leak_check(a: string, b: string) { rt_string_concat(a, b); }\n",
    );
    // The ExprStmt result lands in an owned temp released at scope exit.
    assert_eq!(count(&c, "rt_string_release("), 1, "got:\n{c}");
}

#[test]
fn unwrapped_optional_string_is_retain_copied() {
    let c = compile(
        "module m;\nfunc take(opt: string?) -> string { let x = opt as string; return x; }\n",
    );
    assert!(c.contains("_unwrap_opt"), "got:\n{c}");
    // Place-like unwrap: the copy retains, so the unwrapped value's
    // lifetime is independent of the optional's cleanup.
    assert_eq!(count(&c, "rt_string_retain("), 1, "got:\n{c}");
}

#[test]
fn with_inline_cleanup_runs_on_both_exit_paths() {
    let c = compile(
        "module m;\nextern func open_res() -> int;\nextern func close_res(h: int);\n\
         func f(cond: bool) -> int { \
         with (let h = open_res() => close_res(h)) { if (cond) { return 1; } } \
         return 0; }\n",
    );
    // Once before the early return, once on the normal path.
    assert_eq!(count(&c, "close_res(h)"), 2, "got:\n{c}");
}

#[test]
fn with_cleanup_block_predeclares_nullable_headers() {
    let c = compile(
        "module m;\nextern func rt_read_file_all(path: string) -> string?;\n\
         func f(p: string) -> int { \
         with (let data = rt_read_file_all(p)) { } cleanup { } \
         return 0; }\n",
    );
    // The nullable header let is predeclared null so cleanup always sees
    // an initialized value.
    assert!(c.contains("l0_opt_string data = {0};"), "got:\n{c}");
}

#[test]
fn break_and_continue_run_loop_cleanup_through_gotos() {
    let c = compile(
        "module m;\nfunc f() -> int { \
         let i = 0; while (i < 10) { if (i == 5) { break; } i = i + 1; } return i; }\n",
    );
    assert!(c.contains("goto __lbrk_"), "got:\n{c}");
    assert!(c.contains("__lbrk_1: ;"), "got:\n{c}");
}

#[test]
fn top_level_lets_become_static_globals() {
    let c = compile(
        "module m;\nlet answer = 42;\nfunc main() -> int { return answer; }\n",
    );
    assert!(c.contains("static l0_int l0_m_answer = 42;"));
    assert!(c.contains("return") && c.contains("l0_m_answer"));
}

#[test]
fn c_keyword_locals_are_renamed() {
    let c = compile("module m;\nfunc f() -> int { let register = 1; return register; }\n");
    assert!(c.contains("l0_int register__v = 1;"), "got:\n{c}");
}

#[test]
fn sizeof_and_ord_lower_inline() {
    let c = compile(
        "module m;\nstruct P { x: int; }\nenum E { A(); B(); }\n\
         func f(e: E) -> int { return sizeof(P*) + ord(e); }\n",
    );
    assert!(c.contains("sizeof(struct l0_m_P*)"), "got:\n{c}");
    assert!(c.contains("((l0_int)((e).tag))"), "got:\n{c}");
}

#[test]
fn backend_refuses_to_emit_on_errors() {
    let compilation = compile_with("module m;\nfunc f() -> int { return true; }\n", |_| {});
    assert!(compilation.had_errors);
    assert!(compilation.c_source.is_empty());
}

#[test]
fn dependency_ordered_type_emission() {
    let c = compile(
        "module m;\n\
         struct Inner { v: int; }\n\
         struct Outer { inner: Inner; }\n\
         func main() -> int { let o = Outer(Inner(1)); return o.inner.v; }\n",
    );
    let inner = c.find("struct l0_m_Inner {").expect("inner definition");
    let outer = c.find("struct l0_m_Outer {").expect("outer definition");
    assert!(inner < outer, "value dependency must be defined first");
}
