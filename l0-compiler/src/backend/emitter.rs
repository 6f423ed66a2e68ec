//! C-specific code emission: C syntax, name mangling, and type lowering.
//! Decisions about what to emit and when live in the backend orchestrator.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::analysis::AnalysisResult;
use crate::ast::{EnumVariant, SourceSpan, TopDecl};
use crate::escape;
use crate::types::Type;

/// Helper for building C code with indentation tracking.
#[derive(Debug, Default)]
pub struct CCodeBuilder {
    lines: Vec<String>,
    indent_level: usize,
}

impl CCodeBuilder {
    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        debug_assert!(self.indent_level > 0, "dedent below zero");
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    pub fn emit(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        if line.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{line}", "    ".repeat(self.indent_level)));
        }
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    pub fn to_string(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn is_c_keyword(name: &str) -> bool {
    matches!(
        name,
        "auto" | "break" | "case" | "char" | "const" | "continue" | "default" | "do" | "double"
            | "else" | "enum" | "extern" | "float" | "for" | "goto" | "if" | "inline" | "int"
            | "long" | "register" | "restrict" | "return" | "short" | "signed" | "sizeof"
            | "static" | "struct" | "switch" | "typedef" | "union" | "unsigned" | "void"
            | "volatile" | "while" | "alignas" | "alignof" | "atomic" | "bool" | "complex"
            | "imaginary" | "NULL" | "null" | "true" | "false" | "asm" | "offsetof" | "typeof"
    )
}

pub fn mangle_struct_name(module: &str, name: &str) -> String {
    format!("l0_{}_{name}", module.replace('.', "_"))
}

pub fn mangle_enum_name(module: &str, name: &str) -> String {
    format!("l0_{}_{name}", module.replace('.', "_"))
}

pub fn mangle_function_name(module: &str, name: &str) -> String {
    format!("l0_{}_{name}", module.replace('.', "_"))
}

pub fn mangle_let_name(module: &str, name: &str) -> String {
    let safe_name = if is_c_keyword(name) {
        format!("l0_kw_{name}")
    } else {
        name.to_string()
    };
    format!("l0_{}_{safe_name}", module.replace('.', "_"))
}

/// Mangle a local identifier when it would collide with a C keyword or
/// with emitter-reserved names (`l0_` temps, `_`-prefixed runtime names).
pub fn mangle_identifier(name: &str) -> String {
    if is_c_keyword(name) || name.ends_with("__v") || name.starts_with("l0_") || name.starts_with('_')
    {
        format!("{name}__v")
    } else {
        name.to_string()
    }
}

#[derive(Debug, Default)]
pub struct CEmitter {
    pub out: CCodeBuilder,
    pub emit_line_directives: bool,
    tmp_counter: u32,
    opt_wrappers: BTreeMap<String, Type>,
    opt_emitted: HashSet<String>,
}

impl CEmitter {
    pub fn new(emit_line_directives: bool) -> Self {
        Self {
            emit_line_directives,
            ..Self::default()
        }
    }

    pub fn fresh_tmp(&mut self, kind: &str) -> String {
        self.tmp_counter += 1;
        format!("l0_{kind}_{}", self.tmp_counter)
    }

    // ========================================================================
    // Type emission
    // ========================================================================

    pub fn emit_type(&self, ty: &Type) -> String {
        match ty {
            Type::Int => "l0_int".to_string(),
            Type::Byte => "l0_byte".to_string(),
            Type::Bool => "l0_bool".to_string(),
            Type::String => "l0_string".to_string(),
            Type::Void => "void".to_string(),
            Type::Struct { module, name } => format!("struct {}", mangle_struct_name(module, name)),
            Type::Enum { module, name } => format!("struct {}", mangle_enum_name(module, name)),
            Type::Pointer(inner) => format!("{}*", self.emit_type(inner)),
            Type::Nullable(inner) => {
                // Niche-optimize pointer-shaped optionals: T*? is T*.
                if matches!(**inner, Type::Pointer(_)) {
                    self.emit_type(inner)
                } else {
                    self.opt_wrapper_name(inner)
                }
            }
            Type::Null | Type::Func { .. } => {
                // Not directly representable; callers never lower these.
                "void".to_string()
            }
        }
    }

    pub fn emit_pointer_type(&self, base: &Type) -> String {
        format!("{}*", self.emit_type(base))
    }

    fn opt_key_for_type(&self, ty: &Type) -> String {
        match ty {
            Type::Int => "int".to_string(),
            Type::Byte => "byte".to_string(),
            Type::Bool => "bool".to_string(),
            Type::String => "string".to_string(),
            Type::Void => "void".to_string(),
            Type::Struct { module, name } => format!("s_{}", mangle_struct_name(module, name)),
            Type::Enum { module, name } => format!("e_{}", mangle_enum_name(module, name)),
            Type::Pointer(inner) => format!("p_{}", self.opt_key_for_type(inner)),
            Type::Nullable(inner) => format!("n_{}", self.opt_key_for_type(inner)),
            Type::Func { .. } => "fn".to_string(),
            Type::Null => "unk".to_string(),
        }
    }

    pub fn opt_wrapper_name(&self, inner: &Type) -> String {
        format!("l0_opt_{}", self.opt_key_for_type(inner))
    }

    pub fn emit_none_value(&self, nullable: &Type) -> String {
        match nullable {
            Type::Nullable(inner) if matches!(**inner, Type::Pointer(_)) => "NULL".to_string(),
            Type::Nullable(inner) => {
                format!("(({}){{.has_value = 0}})", self.opt_wrapper_name(inner))
            }
            _ => "NULL".to_string(),
        }
    }

    pub fn emit_some_value(&self, nullable: &Type, c_inner: &str) -> String {
        match nullable {
            Type::Nullable(inner) if matches!(**inner, Type::Pointer(_)) => c_inner.to_string(),
            Type::Nullable(inner) => format!(
                "(({}){{.has_value = 1, .value = {c_inner}}})",
                self.opt_wrapper_name(inner)
            ),
            _ => c_inner.to_string(),
        }
    }

    pub fn emit_null_literal(&self, expected: &Type, for_initializer: bool) -> String {
        match expected {
            Type::Nullable(inner) => {
                if matches!(**inner, Type::Pointer(_)) {
                    "NULL".to_string()
                } else if for_initializer {
                    "{0}".to_string()
                } else {
                    self.emit_none_value(expected)
                }
            }
            Type::Pointer(_) => "NULL".to_string(),
            _ => "NULL".to_string(),
        }
    }

    pub fn emit_enum_tag(&self, enum_ty: &Type, variant_name: &str) -> String {
        match enum_ty {
            Type::Enum { module, name } => {
                format!("{}_{variant_name}", mangle_enum_name(module, name))
            }
            _ => String::new(),
        }
    }

    // ========================================================================
    // Structure and layout
    // ========================================================================

    pub fn emit_section_comment(&mut self, text: &str) {
        self.out.emit(format!("/* {text} */"));
    }

    pub fn emit_module_comment(&mut self, module_name: &str) {
        self.out.emit(format!("/* Module: {module_name} */"));
    }

    pub fn emit_module_separator(&mut self, module_name: &str) {
        self.out.emit("/* -------------------------------- */");
        self.out.emit(format!("/* Module: {module_name} */"));
        self.out.emit("/* -------------------------------- */");
    }

    pub fn emit_header(&mut self, trace_arc: bool, trace_memory: bool) {
        self.out.emit("/* Generated by the L0 compiler */");
        self.out.blank();
        self.out.emit("#include <stdint.h>");
        self.out.emit("#include <stdbool.h>");
        self.out.emit("#include <stddef.h>");
        self.out.blank();
        if trace_arc {
            self.out.emit("#define L0_TRACE_ARC 1");
        }
        if trace_memory {
            self.out.emit("#define L0_TRACE_MEMORY 1");
        }
        self.out.emit("/* L0 runtime header */");
        self.out.emit("#include \"l0_runtime.h\"");
        self.out.blank();
    }

    pub fn emit_line_directive(&mut self, span: Option<SourceSpan>, file: Option<&Path>) {
        if !self.emit_line_directives {
            return;
        }
        let Some(span) = span else { return };
        if span.line == 0 {
            return;
        }
        let Some(file) = file else { return };
        self.out
            .emit(format!("#line {} \"{}\"", span.line, file.display()));
    }

    pub fn emit_forward_decls(&mut self, analysis: &AnalysisResult) {
        self.out.emit("/* Forward declarations */");
        let Some(cu) = &analysis.cu else { return };
        for module in cu.iter() {
            for decl in &module.decls {
                match decl {
                    TopDecl::Struct(decl) => {
                        self.out.emit(format!(
                            "struct {};",
                            mangle_struct_name(&module.name, &decl.name)
                        ));
                    }
                    TopDecl::Enum(decl) => {
                        self.out.emit(format!(
                            "struct {};",
                            mangle_enum_name(&module.name, &decl.name)
                        ));
                    }
                    _ => {}
                }
            }
        }
        self.out.blank();
    }

    pub fn emit_struct_def(
        &mut self,
        module_name: &str,
        struct_name: &str,
        fields: &[(String, Type)],
    ) {
        let c_name = mangle_struct_name(module_name, struct_name);
        self.out.emit(format!("struct {c_name} {{"));
        self.out.indent();
        for (field_name, field_ty) in fields {
            let c_type = self.emit_type(field_ty);
            self.out.emit(format!("{c_type} {field_name};"));
        }
        if fields.is_empty() {
            // Empty structs are not allowed in C99.
            self.out.emit("char __dummy__;");
        }
        self.out.dedent();
        self.out.emit("};");
        self.out.blank();
    }

    pub fn emit_enum_def(
        &mut self,
        module_name: &str,
        enum_name: &str,
        variants: &[(String, Vec<(String, Type)>)],
    ) {
        let c_name = mangle_enum_name(module_name, enum_name);
        let tag_name = format!("{c_name}_tag");

        self.out.emit(format!("enum {tag_name} {{"));
        self.out.indent();
        if variants.is_empty() {
            self.out.emit(format!("{c_name}__empty,"));
        }
        for (variant_name, _) in variants {
            self.out.emit(format!("{c_name}_{variant_name},"));
        }
        self.out.dedent();
        self.out.emit("};");
        self.out.blank();

        self.out.emit(format!("struct {c_name} {{"));
        self.out.indent();
        self.out.emit(format!("enum {tag_name} tag;"));
        if !variants.is_empty() {
            self.out.emit("union {");
            self.out.indent();
            for (variant_name, fields) in variants {
                if fields.is_empty() {
                    self.out
                        .emit(format!("struct {{ char __dummy__; }} {variant_name};"));
                } else {
                    let field_decls = fields
                        .iter()
                        .map(|(name, ty)| format!("{} {name}", self.emit_type(ty)))
                        .collect::<Vec<_>>()
                        .join("; ");
                    self.out
                        .emit(format!("struct {{ {field_decls}; }} {variant_name};"));
                }
            }
            self.out.dedent();
            self.out.emit("} data;");
        }
        self.out.dedent();
        self.out.emit("};");
        self.out.blank();
    }

    // ========================================================================
    // Optional wrapper emission
    // ========================================================================

    fn collect_opt_wrappers_from_type(&mut self, ty: &Type) {
        match ty {
            Type::Nullable(inner) => {
                if !matches!(**inner, Type::Pointer(_)) {
                    let name = self.opt_wrapper_name(inner);
                    self.opt_wrappers.insert(name, (**inner).clone());
                }
                self.collect_opt_wrappers_from_type(inner);
            }
            Type::Pointer(inner) => self.collect_opt_wrappers_from_type(inner),
            Type::Func { params, result } => {
                for param in params {
                    self.collect_opt_wrappers_from_type(param);
                }
                self.collect_opt_wrappers_from_type(result);
            }
            _ => {}
        }
    }

    /// Scan every type the analysis produced and collect the optional
    /// wrapper typedefs the translation unit needs.
    pub fn prepare_optional_wrappers(&mut self, analysis: &AnalysisResult) {
        self.opt_wrappers.clear();
        self.opt_emitted.clear();

        let func_types: Vec<Type> = analysis
            .func_types
            .values()
            .map(|ft| ft.as_type())
            .collect();
        for ty in &func_types {
            self.collect_opt_wrappers_from_type(ty);
        }
        let field_types: Vec<Type> = analysis
            .struct_infos
            .values()
            .flat_map(|info| info.fields.iter().map(|field| field.ty.clone()))
            .collect();
        for ty in &field_types {
            self.collect_opt_wrappers_from_type(ty);
        }
        let payload_types: Vec<Type> = analysis
            .enum_infos
            .values()
            .flat_map(|info| {
                info.variants
                    .iter()
                    .flat_map(|variant| variant.field_types.clone())
            })
            .collect();
        for ty in &payload_types {
            self.collect_opt_wrappers_from_type(ty);
        }
        let let_types: Vec<Type> = analysis.let_types.values().cloned().collect();
        for ty in &let_types {
            self.collect_opt_wrappers_from_type(ty);
        }
        // Inferred expression types cover locals and temporaries that never
        // appear in a signature.
        let expr_types: Vec<Type> = analysis.expr_types.values().cloned().collect();
        for ty in &expr_types {
            self.collect_opt_wrappers_from_type(ty);
        }
    }

    /// Whether a wrapper's inner type can be defined before user types.
    fn is_early_inner(inner: &Type) -> bool {
        match inner {
            Type::Int | Type::Byte | Type::Bool | Type::String => true,
            Type::Nullable(inner) if !matches!(**inner, Type::Pointer(_)) => {
                Self::is_early_inner(inner)
            }
            _ => false,
        }
    }

    pub fn emit_optional_wrappers(&mut self, early: bool) {
        let items: Vec<(String, Type)> = self
            .opt_wrappers
            .iter()
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();
        for (name, inner) in items {
            if self.opt_emitted.contains(&name) {
                continue;
            }
            if Self::is_early_inner(&inner) != early {
                continue;
            }
            let c_inner = self.emit_type(&inner);
            let guard = format!("{}_DEFINED", name.to_uppercase());
            self.out.emit(format!("#ifndef {guard}"));
            self.out.emit(format!("#define {guard}"));
            self.out.emit(format!(
                "typedef struct {{ l0_bool has_value; {c_inner} value; }} {name};"
            ));
            self.out.emit(format!("#endif /* {guard} */"));
            self.out.blank();
            self.opt_emitted.insert(name);
        }
    }

    // ========================================================================
    // Cleanup emission
    // ========================================================================

    /// Release the ARC payloads reachable by value from `c_expr`.
    pub fn emit_value_cleanup(&mut self, analysis: &AnalysisResult, c_expr: &str, ty: &Type) {
        match ty {
            Type::String => {
                self.out.emit(format!("rt_string_release({c_expr});"));
            }
            Type::Nullable(inner) => {
                if matches!(**inner, Type::Pointer(_)) || !analysis.has_arc_data(inner) {
                    return;
                }
                self.out.emit(format!("if (({c_expr}).has_value) {{"));
                self.out.indent();
                let inner_expr = format!("({c_expr}).value");
                self.emit_value_cleanup(analysis, &inner_expr, inner);
                self.out.dedent();
                self.out.emit("}");
            }
            Type::Struct { module, name } => {
                let Some(info) = analysis.struct_infos.get(&(module.clone(), name.clone())) else {
                    return;
                };
                let fields: Vec<(String, Type)> = info
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.ty.clone()))
                    .collect();
                for (field_name, field_ty) in fields {
                    let field_expr = format!("({c_expr}).{field_name}");
                    self.emit_value_cleanup(analysis, &field_expr, &field_ty);
                }
            }
            Type::Enum { .. } => self.emit_enum_value_cleanup(analysis, c_expr, ty),
            _ => {}
        }
    }

    /// Switch on the tag and release only the active variant's payloads.
    fn emit_enum_value_cleanup(&mut self, analysis: &AnalysisResult, c_expr: &str, enum_ty: &Type) {
        let Type::Enum { module, name } = enum_ty else {
            return;
        };
        if !analysis.has_arc_data(enum_ty) {
            return;
        }
        let Some(info) = analysis.enum_infos.get(&(module.clone(), name.clone())) else {
            return;
        };

        let variants: Vec<(String, Vec<Type>)> = info
            .variants
            .iter()
            .map(|variant| (variant.name.clone(), variant.field_types.clone()))
            .collect();

        self.out.emit(format!("switch (({c_expr}).tag) {{"));
        for (variant_name, field_types) in variants {
            if !field_types.iter().any(|ty| analysis.has_arc_data(ty)) {
                continue;
            }
            let tag = self.emit_enum_tag(enum_ty, &variant_name);
            self.out.emit(format!("case {tag}: {{"));
            self.out.indent();
            if let Some(variant_decl) = find_variant_decl(analysis, module, name, &variant_name) {
                let field_names: Vec<String> = variant_decl
                    .fields
                    .iter()
                    .map(|field| field.name.clone())
                    .collect();
                for (field_name, field_ty) in field_names.iter().zip(&field_types) {
                    let field_expr = format!("({c_expr}).data.{variant_name}.{field_name}");
                    self.emit_value_cleanup(analysis, &field_expr, field_ty);
                }
            }
            self.out.emit("break;");
            self.out.dedent();
            self.out.emit("}");
        }
        self.out.emit("default: break;");
        self.out.emit("}");
    }

    /// Cleanup for the pointee of a dropped struct pointer.
    pub fn emit_struct_cleanup(&mut self, analysis: &AnalysisResult, c_ptr: &str, struct_ty: &Type) {
        let Type::Struct { module, name } = struct_ty else {
            return;
        };
        if !analysis.has_arc_data(struct_ty) {
            return;
        }
        let Some(info) = analysis.struct_infos.get(&(module.clone(), name.clone())) else {
            return;
        };
        let fields: Vec<(String, Type)> = info
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.ty.clone()))
            .collect();

        self.out.emit(format!("if ({c_ptr} != NULL) {{"));
        self.out.indent();
        for (field_name, field_ty) in fields {
            let field_expr = format!("{c_ptr}->{field_name}");
            self.emit_value_cleanup(analysis, &field_expr, &field_ty);
        }
        self.out.dedent();
        self.out.emit("}");
    }

    /// Cleanup for the pointee of a dropped enum pointer.
    pub fn emit_enum_cleanup(&mut self, analysis: &AnalysisResult, c_ptr: &str, enum_ty: &Type) {
        if !analysis.has_arc_data(enum_ty) {
            return;
        }
        self.out.emit(format!("if ({c_ptr} != NULL) {{"));
        self.out.indent();
        let deref = format!("(*{c_ptr})");
        self.emit_enum_value_cleanup(analysis, &deref, enum_ty);
        self.out.dedent();
        self.out.emit("}");
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn emit_int_literal(&self, value: i32) -> String {
        // INT32_MIN has no literal form in C; -2147483648 parses as a
        // negated out-of-range constant.
        if value == i32::MIN {
            "(-2147483647 - 1)".to_string()
        } else {
            value.to_string()
        }
    }

    pub fn emit_byte_literal(&self, payload: &str) -> String {
        let byte = escape::decode_byte_token(payload);
        format!("((l0_byte)'{}')", escape::encode_c_char_byte(byte))
    }

    pub fn emit_string_literal(&self, payload: &str) -> String {
        let bytes = escape::decode_string_token(payload);
        let body = escape::encode_c_string_bytes(&bytes);
        format!(
            "((l0_string) L0_STRING_CONST(\"{body}\", {}))",
            bytes.len()
        )
    }

    pub fn emit_const_string_literal(&self, payload: &str) -> String {
        let bytes = escape::decode_string_token(payload);
        let body = escape::encode_c_string_bytes(&bytes);
        format!(
            "{{ .kind = L0_STRING_K_STATIC, .data = {{ .s_str = {{ .len = {}, .bytes = \"{body}\" }} }} }}",
            bytes.len()
        )
    }

    pub fn emit_bool_literal(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }

    pub fn emit_binary_op(&self, op: &str, left: &str, right: &str) -> String {
        format!("({left} {op} {right})")
    }

    pub fn emit_checked_int_div(&self, left: &str, right: &str) -> String {
        format!("(_rt_idiv({left}, {right}))")
    }

    pub fn emit_checked_int_mod(&self, left: &str, right: &str) -> String {
        format!("(_rt_imod({left}, {right}))")
    }

    pub fn emit_checked_int_mul(&self, left: &str, right: &str) -> String {
        format!("(_rt_imul({left}, {right}))")
    }

    pub fn emit_checked_int_add(&self, left: &str, right: &str) -> String {
        format!("(_rt_iadd({left}, {right}))")
    }

    pub fn emit_checked_int_sub(&self, left: &str, right: &str) -> String {
        format!("(_rt_isub({left}, {right}))")
    }

    pub fn emit_checked_narrow_cast(&self, c_dst_type: &str, inner: &str) -> String {
        format!("(_rt_narrow_{c_dst_type}({inner}))")
    }

    pub fn emit_unwrap_ptr(&self, c_dst_type: &str, inner: &str, type_str: &str) -> String {
        format!("(({c_dst_type}) _unwrap_ptr({inner}, \"{type_str}\"))")
    }

    pub fn emit_unwrap_opt(&self, c_src_type: &str, inner: &str, type_str: &str) -> String {
        format!("((({c_src_type}*) _unwrap_opt(&({inner}), \"{type_str}\"))->value)")
    }

    pub fn emit_sizeof_type(&self, ty: &Type) -> String {
        format!("((l0_int)sizeof({}))", self.emit_type(ty))
    }

    pub fn emit_ord(&self, c_enum_expr: &str) -> String {
        format!("((l0_int)(({c_enum_expr}).tag))")
    }

    pub fn emit_field_access(&self, c_obj: &str, field: &str, is_pointer: bool) -> String {
        if is_pointer {
            format!("({c_obj})->{field}")
        } else {
            format!("({c_obj}).{field}")
        }
    }

    pub fn emit_cast(&self, c_type: &str, inner: &str) -> String {
        format!("(({c_type})({inner}))")
    }

    pub fn emit_null_check_eq(&self, c_expr: &str) -> String {
        format!("(!(({c_expr}).has_value))")
    }

    pub fn emit_null_check_ne(&self, c_expr: &str) -> String {
        format!("((({c_expr}).has_value))")
    }

    pub fn emit_pointer_null_check(&self, c_expr: &str, op: &str) -> String {
        format!("({c_expr} {op} NULL)")
    }

    pub fn emit_struct_constructor(&self, struct_ty: &Type, field_inits: &[(String, String)]) -> String {
        let Type::Struct { module, name } = struct_ty else {
            return String::new();
        };
        let c_name = mangle_struct_name(module, name);
        if field_inits.is_empty() {
            return format!("(struct {c_name}){{ 0 }}");
        }
        let inits = field_inits
            .iter()
            .map(|(name, value)| format!(".{name} = {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("(struct {c_name}){{ {inits} }}")
    }

    pub fn emit_variant_constructor(
        &self,
        enum_ty: &Type,
        variant_name: &str,
        payload_inits: &[(String, String)],
    ) -> String {
        let Type::Enum { module, name } = enum_ty else {
            return String::new();
        };
        let c_name = mangle_enum_name(module, name);
        let tag = self.emit_enum_tag(enum_ty, variant_name);
        if payload_inits.is_empty() {
            return format!("(struct {c_name}){{ .tag = {tag} }}");
        }
        let payload = payload_inits
            .iter()
            .map(|(name, value)| format!(".{name} = {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "(struct {c_name}){{ .tag = {tag}, .data = {{ .{variant_name} = {{ {payload} }} }} }}"
        )
    }

    pub fn emit_pattern_binding_init(&self, scrutinee: &str, variant: &str, field: &str) -> String {
        format!("{scrutinee}.data.{variant}.{field}")
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub fn emit_expr_stmt(&mut self, c_expr: &str) {
        self.out.emit(format!("{c_expr};"));
    }

    pub fn emit_return_stmt(&mut self, c_value: Option<&str>) {
        match c_value {
            Some(value) => self.out.emit(format!("return {value};")),
            None => self.out.emit("return;"),
        }
    }

    pub fn emit_block_start(&mut self) {
        self.out.emit("{");
        self.out.indent();
    }

    pub fn emit_block_end(&mut self) {
        self.out.dedent();
        self.out.emit("}");
    }

    pub fn emit_while_header(&mut self, c_cond: &str) {
        self.out.emit(format!("while ({c_cond})"));
    }

    pub fn emit_if_header(&mut self, c_cond: &str) {
        self.out.emit(format!("if ({c_cond})"));
    }

    pub fn emit_else(&mut self) {
        self.out.emit("else");
    }

    pub fn emit_let_decl(&mut self, c_type: &str, c_name: &str, c_init: &str) {
        self.out.emit(format!("{c_type} {c_name} = {c_init};"));
    }

    pub fn emit_assignment(&mut self, c_target: &str, c_value: &str) {
        self.out.emit(format!("{c_target} = {c_value};"));
    }

    pub fn emit_pointer_store(&mut self, c_ptr: &str, c_value: &str) {
        self.out.emit(format!("*{c_ptr} = {c_value};"));
    }

    pub fn emit_temp_decl(&mut self, c_type: &str, c_name: &str, c_value: &str) {
        self.out.emit(format!("{c_type} {c_name} = {c_value};"));
    }

    pub fn emit_string_retain(&mut self, c_expr: &str) {
        self.out.emit(format!("rt_string_retain({c_expr});"));
    }

    pub fn emit_string_release(&mut self, c_expr: &str) {
        self.out.emit(format!("rt_string_release({c_expr});"));
    }

    pub fn emit_comment(&mut self, comment: &str) {
        self.out.emit(format!("/* {comment} */"));
    }

    pub fn emit_label(&mut self, label: &str) {
        self.out.emit(format!("{label}: ;"));
    }

    pub fn emit_goto(&mut self, label: &str) {
        self.out.emit(format!("goto {label};"));
    }

    pub fn emit_switch_start(&mut self, c_expr: &str) {
        self.out.emit(format!("switch ({c_expr}) {{"));
    }

    pub fn emit_switch_end(&mut self) {
        self.out.emit("}");
    }

    pub fn emit_case_label(&mut self, c_value: &str) {
        self.out.emit(format!("case {c_value}:"));
    }

    pub fn emit_default_label(&mut self) {
        self.out.emit("default:");
    }

    pub fn emit_exit_switch(&mut self) {
        self.out.emit("break;");
    }

    pub fn emit_drop_call(&mut self, c_ptr: &str) {
        self.out.emit(format!("_rt_drop((void*){c_ptr});"));
    }

    pub fn emit_null_assignment(&mut self, c_var: &str) {
        self.out.emit(format!("{c_var} = NULL;"));
    }

    pub fn emit_alloc_obj(&mut self, c_ptr_type: &str, c_base_type: &str, c_temp: &str) {
        self.out.emit(format!(
            "{c_ptr_type} {c_temp} = ({c_ptr_type})_rt_alloc_obj((l0_int)sizeof({c_base_type}));"
        ));
    }

    pub fn emit_struct_init(&mut self, c_temp: &str, c_base_type: &str, c_init: &str) {
        self.out
            .emit(format!("*{c_temp} = ({c_base_type}){{ {c_init} }};"));
    }

    pub fn emit_zero_init(&mut self, c_temp: &str, c_base_type: &str) {
        self.out.emit(format!("*{c_temp} = ({c_base_type}){{ 0 }};"));
    }

    pub fn emit_try_check_niche(&mut self, c_tmp: &str, ret_none: &str) {
        self.out
            .emit(format!("if ({c_tmp} == NULL) return {ret_none};"));
    }

    pub fn emit_try_check_value(&mut self, c_tmp: &str, ret_none: &str) {
        self.out
            .emit(format!("if (!{c_tmp}.has_value) return {ret_none};"));
    }

    pub fn emit_try_extract_value(&self, c_tmp: &str) -> String {
        format!("({c_tmp}.value)")
    }

    // ========================================================================
    // Functions and the entry wrapper
    // ========================================================================

    pub fn emit_function_declaration(
        &mut self,
        module_name: &str,
        func_name: &str,
        is_extern: bool,
        param_names: &[String],
        params: &[Type],
        result: &Type,
    ) {
        // Extern functions keep their C names verbatim: the FFI boundary.
        let c_name = if is_extern {
            func_name.to_string()
        } else {
            mangle_function_name(module_name, func_name)
        };
        let c_result = self.emit_type(result);
        let params_str = self.format_params(param_names, params);
        self.out.emit(format!("{c_result} {c_name}({params_str});"));
    }

    pub fn emit_function_definition_header(
        &mut self,
        module_name: &str,
        func_name: &str,
        param_names: &[String],
        params: &[Type],
        result: &Type,
    ) {
        let c_name = mangle_function_name(module_name, func_name);
        let c_result = self.emit_type(result);
        let params_str = self.format_params(param_names, params);
        self.out.emit(format!("{c_result} {c_name}({params_str})"));
        self.out.emit("{");
        self.out.indent();
    }

    fn format_params(&self, param_names: &[String], params: &[Type]) -> String {
        if params.is_empty() {
            return "void".to_string();
        }
        param_names
            .iter()
            .zip(params)
            .map(|(name, ty)| format!("{} {}", self.emit_type(ty), mangle_identifier(name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn emit_function_definition_footer(&mut self) {
        self.out.dedent();
        self.out.emit("}");
        self.out.blank();
    }

    pub fn emit_main_wrapper(&mut self, entry_module: &str, result: &Type) {
        self.out.emit("/* C entry point wrapper */");
        self.out.emit("int main(int argc, char **argv)");
        self.out.emit("{");
        self.out.indent();
        self.out.emit("_rt_init_args(argc, argv);");

        let mangled = mangle_function_name(entry_module, "main");
        match result {
            Type::Int => {
                self.out.emit(format!("return (int) {mangled}();"));
            }
            Type::Bool => {
                self.out.emit(format!("l0_bool result = {mangled}();"));
                self.out.emit("return result ? 1 : 0;");
            }
            _ => {
                self.out.emit(format!("{mangled}();"));
                self.out.emit("return 0;");
            }
        }

        self.out.dedent();
        self.out.emit("}");
        self.out.blank();
    }
}

/// Look up an enum variant's AST declaration; pattern bindings are
/// positional but the C payload fields are accessed by name.
pub fn find_variant_decl<'a>(
    analysis: &'a AnalysisResult,
    module_name: &str,
    enum_name: &str,
    variant_name: &str,
) -> Option<&'a EnumVariant> {
    let cu = analysis.cu.as_ref()?;
    let module = cu.get(module_name)?;
    for decl in &module.decls {
        if let TopDecl::Enum(decl) = decl {
            if decl.name == enum_name {
                return decl
                    .variants
                    .iter()
                    .find(|variant| variant.name == variant_name);
            }
        }
    }
    None
}
