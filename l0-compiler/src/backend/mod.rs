//! C99 lowering backend.
//!
//! The orchestrator decides what to emit and when: emission order, scope
//! and lifetime tracking, ARC retain/release scheduling, and cleanup on
//! every exit path. The C syntax itself lives in `emitter`.

pub mod emitter;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::analysis::{AnalysisResult, VarRefResolution};
use crate::ast::{
    AssignStmt, BinaryOp, Block, CaseStmt, DropStmt, Expr, ExprKind, ForStmt, FuncDecl, IfStmt,
    LetDecl, LetStmt, MatchStmt, Pattern, ReturnStmt, SourceSpan, Stmt, TopDecl, UnaryOp, VarRef,
    WhileStmt, WithStmt,
};
use crate::loader::CompilationUnit;
use crate::resolve::{resolve_symbol, resolve_type_ref};
use crate::symbols::{SymbolId, SymbolKind};
use crate::typecheck::is_place_expr;
use crate::types::Type;

use emitter::{find_variant_decl, mangle_function_name, mangle_identifier, mangle_let_name, CEmitter};

/// Internal consistency failure: a violated pipeline invariant, fatal to
/// the translation unit but not the process.
#[derive(Debug, Clone)]
pub struct Ice {
    pub code: String,
    pub message: String,
    pub span: Option<SourceSpan>,
}

impl Ice {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            span: None,
        }
    }

    fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Display for Ice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "internal compiler error: [{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Ice {}

pub type BResult<T> = Result<T, Ice>;

/// Per-scope lifetime tracking: which bindings this scope owns (release
/// at exit), which are merely declared (type lookup only), and any
/// pending `with` cleanup attached to the scope.
#[derive(Debug, Default)]
struct ScopeCtx {
    owned_vars: Vec<(String, Type)>,
    declared_vars: Vec<(String, Type)>,
    with_cleanup_block: Option<Block>,
    with_cleanup_inline: Option<Vec<Stmt>>,
    with_cleanup_in_progress: bool,
}

pub struct Backend<'a> {
    analysis: &'a AnalysisResult,
    emitter: CEmitter,
    trace_arc: bool,
    trace_memory: bool,
    current_module: String,
    current_file: Option<PathBuf>,
    current_func_result: Option<Type>,
    scopes: Vec<ScopeCtx>,
    loop_scope_stack: Vec<usize>,
    loop_label_stack: Vec<(String, String)>,
    label_counter: u32,
    next_stmt_unreachable: bool,
}

impl<'a> Backend<'a> {
    pub fn new(
        analysis: &'a AnalysisResult,
        emit_line_directives: bool,
        trace_arc: bool,
        trace_memory: bool,
    ) -> Self {
        Self {
            analysis,
            emitter: CEmitter::new(emit_line_directives),
            trace_arc,
            trace_memory,
            current_module: String::new(),
            current_file: None,
            current_func_result: None,
            scopes: Vec::new(),
            loop_scope_stack: Vec::new(),
            loop_label_stack: Vec::new(),
            label_counter: 0,
            next_stmt_unreachable: false,
        }
    }

    fn ice<T>(&self, code: &str, message: impl Into<String>) -> BResult<T> {
        Err(Ice::new(code, message))
    }

    fn cu(&self) -> BResult<&'a CompilationUnit> {
        match &self.analysis.cu {
            Some(cu) => Ok(cu),
            None => Err(Ice::new(
                "ICE-1000",
                "cannot generate code without a compilation unit",
            )),
        }
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("__{prefix}_{}", self.label_counter)
    }

    fn push_scope(&mut self) -> usize {
        self.scopes.push(ScopeCtx::default());
        self.scopes.len() - 1
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn expect_expr_type(&self, expr: &Expr) -> BResult<Type> {
        match self.analysis.expr_types.get(&expr.id) {
            Some(ty) => Ok(ty.clone()),
            None => Err(Ice::new("ICE-1310", "missing inferred type for expression")
                .with_span(expr.span)),
        }
    }

    fn emit_line_directive(&mut self, span: SourceSpan) {
        let file = self.current_file.clone();
        self.emitter.emit_line_directive(Some(span), file.as_deref());
    }

    // ------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------

    /// Emit the complete C99 translation unit for the analyzed unit.
    pub fn generate(mut self) -> BResult<String> {
        if self.analysis.has_errors() {
            return self.ice("ICE-1001", "cannot generate code with semantic errors");
        }
        let cu = self.cu()?;

        self.emitter.prepare_optional_wrappers(self.analysis);
        self.emitter.emit_header(self.trace_arc, self.trace_memory);
        self.emitter.emit_forward_decls(self.analysis);

        // Value-optionals of builtins must exist before structs that use them.
        self.emitter
            .emit_section_comment("Optional wrapper types (builtins / early)");
        self.emitter.emit_optional_wrappers(true);

        self.emitter
            .emit_section_comment("Type definitions (dependency-ordered)");
        let sorted = self.sorted_type_definitions()?;
        for (module_name, type_name) in sorted {
            self.emit_type_definition(&module_name, &type_name)?;
        }

        self.emitter
            .emit_section_comment("Optional wrapper types (late)");
        self.emitter.emit_optional_wrappers(false);

        self.emit_let_declarations()?;
        self.emit_function_declarations()?;
        self.emit_function_definitions()?;
        self.emit_main_wrapper_if_needed(cu)?;

        Ok(self.emitter.out.to_string())
    }

    // ------------------------------------------------------------------
    // Type definitions in dependency order
    // ------------------------------------------------------------------

    fn value_type_dependencies(ty: &Type, out: &mut Vec<(String, String)>) {
        match ty {
            Type::Pointer(_) => {}
            Type::Nullable(inner) => {
                if !matches!(**inner, Type::Pointer(_)) {
                    Self::value_type_dependencies(inner, out);
                }
            }
            Type::Struct { module, name } | Type::Enum { module, name } => {
                out.push((module.clone(), name.clone()));
            }
            _ => {}
        }
    }

    /// Topological sort over by-value type references; ties break by
    /// (module, name) lexicographically.
    fn sorted_type_definitions(&self) -> BResult<Vec<(String, String)>> {
        let mut graph: BTreeMap<(String, String), Vec<(String, String)>> = BTreeMap::new();

        for ((module, name), info) in &self.analysis.struct_infos {
            let mut deps = Vec::new();
            for field in &info.fields {
                Self::value_type_dependencies(&field.ty, &mut deps);
            }
            graph.insert((module.clone(), name.clone()), deps);
        }
        for ((module, name), info) in &self.analysis.enum_infos {
            let mut deps = Vec::new();
            for variant in &info.variants {
                for ty in &variant.field_types {
                    Self::value_type_dependencies(ty, &mut deps);
                }
            }
            graph.insert((module.clone(), name.clone()), deps);
        }

        let mut emitted: Vec<(String, String)> = Vec::new();
        while emitted.len() < graph.len() {
            let mut progressed = false;
            for (node, deps) in &graph {
                if emitted.contains(node) {
                    continue;
                }
                let ready = deps
                    .iter()
                    .all(|dep| !graph.contains_key(dep) || emitted.contains(dep));
                if ready {
                    emitted.push(node.clone());
                    progressed = true;
                }
            }
            if !progressed {
                let unresolved: Vec<String> = graph
                    .keys()
                    .filter(|node| !emitted.contains(node))
                    .map(|(m, n)| format!("{m}::{n}"))
                    .collect();
                return self.ice(
                    "ICE-1340",
                    format!(
                        "value-type cycle detected in type definitions: {}",
                        unresolved.join(", ")
                    ),
                );
            }
        }
        Ok(emitted)
    }

    fn emit_type_definition(&mut self, module_name: &str, type_name: &str) -> BResult<()> {
        let key = (module_name.to_string(), type_name.to_string());
        if let Some(info) = self.analysis.struct_infos.get(&key) {
            let fields: Vec<(String, Type)> = info
                .fields
                .iter()
                .map(|field| (field.name.clone(), field.ty.clone()))
                .collect();
            self.emitter.emit_struct_def(module_name, type_name, &fields);
            return Ok(());
        }
        if let Some(info) = self.analysis.enum_infos.get(&key) {
            let mut variants: Vec<(String, Vec<(String, Type)>)> = Vec::new();
            for variant in &info.variants {
                let Some(decl) =
                    find_variant_decl(self.analysis, module_name, type_name, &variant.name)
                else {
                    return self.ice(
                        "ICE-1271",
                        format!("missing variant decl for {module_name}.{type_name}.{}", variant.name),
                    );
                };
                let fields: Vec<(String, Type)> = decl
                    .fields
                    .iter()
                    .map(|field| field.name.clone())
                    .zip(variant.field_types.iter().cloned())
                    .collect();
                variants.push((variant.name.clone(), fields));
            }
            self.emitter.emit_enum_def(module_name, type_name, &variants);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Top-level let declarations
    // ------------------------------------------------------------------

    fn emit_let_declarations(&mut self) -> BResult<()> {
        if self.analysis.let_types.is_empty() {
            return Ok(());
        }
        self.emitter
            .emit_section_comment("Top-level let declarations");

        let cu = self.cu()?;
        for module in cu.iter() {
            self.current_module = module.name.clone();
            self.current_file = module.file.clone();
            let mut module_has_lets = false;
            let lets: Vec<LetDecl> = module
                .decls
                .iter()
                .filter_map(|decl| match decl {
                    TopDecl::Let(decl) => Some(decl.clone()),
                    _ => None,
                })
                .collect();
            for decl in lets {
                let key = (module.name.clone(), decl.name.clone());
                let Some(let_type) = self.analysis.let_types.get(&key).cloned() else {
                    continue;
                };
                if !module_has_lets {
                    self.emitter.emit_module_comment(&module.name);
                    module_has_lets = true;
                }
                let c_type = self.emitter.emit_type(&let_type);
                let c_name = mangle_let_name(&module.name, &decl.name);
                let c_init = self.emit_let_initializer(&decl.value, &let_type)?;
                self.emitter
                    .out
                    .emit(format!("static {c_type} {c_name} = {c_init};"));
            }
        }
        self.emitter.out.blank();
        Ok(())
    }

    /// Compile-time constant initializer for a top-level let.
    fn emit_let_initializer(&mut self, expr: &Expr, expected: &Type) -> BResult<String> {
        match &expr.kind {
            ExprKind::Int(value) => Ok(self.emitter.emit_int_literal(*value)),
            ExprKind::Bool(value) => Ok(if *value { "true" } else { "false" }.to_string()),
            ExprKind::Byte(payload) => Ok(self.emitter.emit_byte_literal(payload)),
            ExprKind::Str(payload) => Ok(self.emitter.emit_const_string_literal(payload)),
            ExprKind::Null => Ok(self.emitter.emit_null_literal(expected, true)),
            ExprKind::Call { callee, args } => {
                let ExprKind::Var(var) = &callee.kind else {
                    return self.ice("ICE-1034", "call expression is not a constructor");
                };
                self.emit_const_constructor(expr, var, args, expected)
            }
            ExprKind::New { .. } => self.ice(
                "ICE-1180",
                "new expressions are not allowed in top-level let initializers",
            ),
            other => self.ice(
                "ICE-1181",
                format!("unsupported top-level let initializer: {other:?}"),
            ),
        }
    }

    fn emit_const_constructor(
        &mut self,
        expr: &Expr,
        var: &VarRef,
        args: &[Expr],
        expected: &Type,
    ) -> BResult<String> {
        let sym = self.lookup_symbol(&var.name, var.module_path.as_deref());
        let Some(sym_id) = sym else {
            return self.ice("ICE-1031", format!("unknown constructor name: {}", var.name));
        };
        let kind = self.analysis.symbols.get(sym_id).kind;

        match kind {
            SymbolKind::Struct | SymbolKind::TypeAlias => {
                let Type::Struct { module, name } = expected else {
                    return self.ice(
                        "ICE-1032",
                        "struct constructor but expected type is not a struct",
                    );
                };
                let key = (module.clone(), name.clone());
                let Some(info) = self.analysis.struct_infos.get(&key) else {
                    return self.ice("ICE-1040", format!("missing struct info for {module}.{name}"));
                };
                if info.fields.len() != args.len() {
                    return self.ice(
                        "ICE-1041",
                        format!(
                            "argument count mismatch in struct constructor: expected {}, got {}",
                            info.fields.len(),
                            args.len()
                        ),
                    );
                }
                let fields: Vec<(String, Type)> = info
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.ty.clone()))
                    .collect();
                let mut inits = Vec::new();
                for ((field_name, field_ty), arg) in fields.iter().zip(args) {
                    let c_arg = self.emit_let_initializer(arg, field_ty)?;
                    inits.push((field_name.clone(), c_arg));
                }
                Ok(self.emitter.emit_struct_constructor(expected, &inits))
            }
            SymbolKind::EnumVariant => {
                let Type::Enum { module, name } = expected else {
                    return self.ice(
                        "ICE-1033",
                        "enum variant constructor but expected type is not an enum",
                    );
                };
                let key = (module.clone(), name.clone());
                let Some(info) = self.analysis.enum_infos.get(&key) else {
                    return self.ice("ICE-1050", format!("missing enum info for {module}.{name}"));
                };
                let Some(variant) = info.variant(&var.name) else {
                    return self.ice("ICE-1051", format!("missing variant info for {}", var.name));
                };
                if variant.field_types.is_empty() {
                    return Ok(self.emitter.emit_variant_constructor(expected, &var.name, &[]));
                }
                let field_types = variant.field_types.clone();
                let Some(decl) = find_variant_decl(self.analysis, module, name, &var.name) else {
                    return self.ice(
                        "ICE-1052",
                        format!("missing variant decl for {module}.{name}.{}", var.name),
                    );
                };
                if decl.fields.len() != args.len() {
                    return self.ice(
                        "ICE-1053",
                        format!("arity mismatch in variant constructor {}", var.name),
                    );
                }
                let field_names: Vec<String> =
                    decl.fields.iter().map(|field| field.name.clone()).collect();
                let mut inits = Vec::new();
                for ((field_name, field_ty), arg) in
                    field_names.iter().zip(&field_types).zip(args)
                {
                    let c_arg = self.emit_let_initializer(arg, field_ty)?;
                    inits.push((field_name.clone(), c_arg));
                }
                Ok(self
                    .emitter
                    .emit_variant_constructor(expected, &var.name, &inits))
            }
            _ => Err(Ice::new("ICE-1034", "call expression is not a constructor")
                .with_span(expr.span)),
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn emit_function_declarations(&mut self) -> BResult<()> {
        self.emitter.emit_section_comment("Function declarations");
        let cu = self.cu()?;
        for module in cu.iter() {
            self.current_module = module.name.clone();
            self.current_file = module.file.clone();
            self.emitter.emit_module_comment(&module.name);
            for decl in &module.decls {
                if let TopDecl::Func(func) = decl {
                    let key = (module.name.clone(), func.name.clone());
                    let Some(func_type) = self.analysis.func_types.get(&key) else {
                        return self.ice(
                            "ICE-1150",
                            format!("missing function type for {}.{}", module.name, func.name),
                        );
                    };
                    let param_names: Vec<String> =
                        func.params.iter().map(|p| p.name.clone()).collect();
                    self.emitter.emit_function_declaration(
                        &module.name,
                        &func.name,
                        func.is_extern,
                        &param_names,
                        &func_type.params,
                        &func_type.result,
                    );
                }
            }
        }
        self.emitter.out.blank();
        Ok(())
    }

    fn emit_function_definitions(&mut self) -> BResult<()> {
        self.emitter.emit_section_comment("Function definitions");
        let cu = self.cu()?;
        for module in cu.iter() {
            self.current_module = module.name.clone();
            self.current_file = module.file.clone();
            self.emitter.emit_module_separator(&module.name);
            for decl in &module.decls {
                if let TopDecl::Func(func) = decl {
                    if !func.is_extern {
                        self.emit_function_definition(&module.name.clone(), func)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_function_definition(&mut self, module_name: &str, func: &FuncDecl) -> BResult<()> {
        if !self.scopes.is_empty() {
            return self.ice(
                "ICE-1160",
                format!("scope not reset before function {module_name}.{}", func.name),
            );
        }

        self.emit_line_directive(func.span);

        let key = (module_name.to_string(), func.name.clone());
        let Some(func_type) = self.analysis.func_types.get(&key).cloned() else {
            return Ok(());
        };

        let param_names: Vec<String> = func.params.iter().map(|p| p.name.clone()).collect();
        self.emitter.emit_function_definition_header(
            module_name,
            &func.name,
            &param_names,
            &func_type.params,
            &func_type.result,
        );

        let func_scope = self.push_scope();
        self.next_stmt_unreachable = false;

        // Parameters are declared for type lookup only: the caller owns
        // them, so no cleanup is scheduled.
        for (param, ptype) in func.params.iter().zip(&func_type.params) {
            let c_name = mangle_identifier(&param.name);
            self.scopes[func_scope]
                .declared_vars
                .push((c_name, ptype.clone()));
        }

        let saved = self.current_func_result.take();
        self.current_func_result = Some(func_type.result.clone());
        let result = self.emit_block_sequence(&func.body);
        self.current_func_result = saved;
        result?;

        if !self.next_stmt_unreachable {
            self.emit_cleanup_at_scope_exit(func_scope);
        }
        self.pop_scope();
        self.emitter.emit_function_definition_footer();
        Ok(())
    }

    fn emit_main_wrapper_if_needed(&mut self, cu: &CompilationUnit) -> BResult<()> {
        let Some(entry_env) = self.analysis.module_envs.get(&cu.entry_name) else {
            return Ok(());
        };
        let Some(&main_sym) = entry_env.locals.get("main") else {
            return Ok(());
        };
        if self.analysis.symbols.get(main_sym).kind != SymbolKind::Func {
            return Ok(());
        }
        let key = (cu.entry_name.clone(), "main".to_string());
        let Some(func_type) = self.analysis.func_types.get(&key) else {
            return Ok(());
        };
        self.emitter
            .emit_main_wrapper(&cu.entry_name, &func_type.result);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    fn scope_has_pending_with_cleanup(&self, index: usize) -> bool {
        let scope = &self.scopes[index];
        (scope.with_cleanup_block.is_some() || scope.with_cleanup_inline.is_some())
            && !scope.with_cleanup_in_progress
    }

    fn scope_chain_has_cleanup(&self) -> bool {
        for (index, scope) in self.scopes.iter().enumerate() {
            if self.scope_has_pending_with_cleanup(index) {
                return true;
            }
            for (_, var_type) in &scope.owned_vars {
                if self.analysis.has_arc_data(var_type) {
                    return true;
                }
            }
        }
        false
    }

    /// Cleanup for `return`: walk up the whole scope chain, run pending
    /// `with` cleanup, then release owned ARC bindings in reverse
    /// declaration order, skipping a moved return value.
    fn emit_cleanup_for_return(&mut self, returned_var: Option<&str>) -> BResult<()> {
        let mut index = self.scopes.len();
        while index > 0 {
            index -= 1;
            if self.scope_has_pending_with_cleanup(index) {
                self.scopes[index].with_cleanup_in_progress = true;
                let result = self.emit_with_cleanup_from_scope(index);
                self.scopes[index].with_cleanup_in_progress = false;
                result?;
            }
            let owned: Vec<(String, Type)> = self.scopes[index].owned_vars.clone();
            for (var_name, var_type) in owned.iter().rev() {
                if Some(var_name.as_str()) == returned_var {
                    continue;
                }
                if self.analysis.has_arc_data(var_type) {
                    self.emitter
                        .emit_value_cleanup(self.analysis, var_name, var_type);
                }
            }
        }
        Ok(())
    }

    /// Cleanup for `break`/`continue`: like a return, but stops at the
    /// innermost loop body scope.
    fn emit_cleanup_for_loop_exit(&mut self) -> BResult<()> {
        let Some(&loop_scope) = self.loop_scope_stack.last() else {
            return self.ice("ICE-1020", "break/continue outside of loop");
        };

        let mut index = self.scopes.len();
        while index > 0 {
            index -= 1;
            if self.scope_has_pending_with_cleanup(index) {
                self.scopes[index].with_cleanup_in_progress = true;
                let result = self.emit_with_cleanup_from_scope(index);
                self.scopes[index].with_cleanup_in_progress = false;
                result?;
            }
            let owned: Vec<(String, Type)> = self.scopes[index].owned_vars.clone();
            for (var_name, var_type) in owned.iter().rev() {
                if self.analysis.has_arc_data(var_type) {
                    self.emitter
                        .emit_value_cleanup(self.analysis, var_name, var_type);
                }
            }
            if index == loop_scope {
                break;
            }
        }
        Ok(())
    }

    /// Release bindings owned by one scope (normal fallthrough exit).
    fn emit_cleanup_at_scope_exit(&mut self, scope_index: usize) {
        let owned: Vec<(String, Type)> = self.scopes[scope_index].owned_vars.clone();
        for (var_name, var_type) in owned.iter().rev() {
            if self.analysis.has_arc_data(var_type) {
                self.emitter
                    .emit_value_cleanup(self.analysis, var_name, var_type);
            }
        }
    }

    /// Run a scope's `with` cleanup inside its own nested C block, so
    /// declarations in cleanup code do not collide with the header scope.
    fn emit_with_cleanup_from_scope(&mut self, scope_index: usize) -> BResult<()> {
        let block = self.scopes[scope_index].with_cleanup_block.clone();
        let inline = self.scopes[scope_index].with_cleanup_inline.clone();
        if block.is_none() && inline.is_none() {
            return Ok(());
        }

        let was_in_progress = self.scopes[scope_index].with_cleanup_in_progress;
        self.scopes[scope_index].with_cleanup_in_progress = true;

        self.emitter.emit_block_start();
        let cleanup_scope = self.push_scope();
        let result = (|| -> BResult<()> {
            if let Some(block) = &block {
                self.emit_block_sequence(block)?;
            } else if let Some(stmts) = &inline {
                for stmt in stmts {
                    self.emit_stmt(stmt)?;
                }
            }
            Ok(())
        })();
        if result.is_ok() && !self.next_stmt_unreachable {
            self.emit_cleanup_at_scope_exit(cleanup_scope);
        }
        self.pop_scope();
        self.emitter.emit_block_end();

        self.scopes[scope_index].with_cleanup_in_progress = was_in_progress;
        result
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn emit_block_sequence(&mut self, block: &Block) -> BResult<()> {
        for stmt in &block.stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> BResult<()> {
        self.emit_line_directive(stmt.span());

        if self.next_stmt_unreachable {
            self.emitter.emit_comment("unreachable code here");
        }

        match stmt {
            Stmt::Let(stmt) => self.emit_let(stmt),
            Stmt::Assign(stmt) => self.emit_reassignment(stmt),
            Stmt::Expr(stmt) => {
                let c_expr = self.emit_expr_in_stmt(&stmt.expr)?;
                if !c_expr.is_empty() {
                    let expr_ty = self.analysis.expr_types.get(&stmt.expr.id).cloned();
                    if let Some(ty) = expr_ty {
                        if self.analysis.has_arc_data(&ty)
                            && !self.is_place_like(&stmt.expr)
                            && needs_arc_temp(&stmt.expr)
                        {
                            self.materialize_arc_temp(&c_expr, &ty);
                            return Ok(());
                        }
                    }
                    self.emitter.emit_expr_stmt(&c_expr);
                }
                Ok(())
            }
            Stmt::If(stmt) => self.emit_if_else(stmt),
            Stmt::While(stmt) => self.emit_while(stmt),
            Stmt::For(stmt) => self.emit_for(stmt),
            Stmt::Return(stmt) => self.emit_return(stmt),
            Stmt::Drop(stmt) => self.emit_drop(stmt),
            Stmt::Match(stmt) => self.emit_match(stmt),
            Stmt::With(stmt) => self.emit_with(stmt),
            Stmt::Case(stmt) => self.emit_case(stmt),
            Stmt::Block(block) => self.emit_nested_block(block),
            Stmt::Break(_) => {
                self.emit_cleanup_for_loop_exit()?;
                let Some((break_label, _)) = self.loop_label_stack.last().cloned() else {
                    return self.ice("ICE-1020", "break outside of loop");
                };
                self.emitter.emit_goto(&break_label);
                self.next_stmt_unreachable = true;
                Ok(())
            }
            Stmt::Continue(_) => {
                self.emit_cleanup_for_loop_exit()?;
                let Some((_, continue_label)) = self.loop_label_stack.last().cloned() else {
                    return self.ice("ICE-1020", "continue outside of loop");
                };
                self.emitter.emit_goto(&continue_label);
                self.next_stmt_unreachable = true;
                Ok(())
            }
        }
    }

    fn emit_nested_block(&mut self, block: &Block) -> BResult<()> {
        self.emitter.emit_block_start();
        let block_scope = self.push_scope();
        let result = self.emit_block_sequence(block);
        if result.is_ok() && !self.next_stmt_unreachable {
            self.emit_cleanup_at_scope_exit(block_scope);
        }
        self.pop_scope();
        self.emitter.emit_block_end();
        result
    }

    fn emit_return(&mut self, stmt: &ReturnStmt) -> BResult<()> {
        match &stmt.value {
            None => {
                self.emit_cleanup_for_return(None)?;
                self.emitter.emit_return_stmt(None);
            }
            Some(value) => {
                let result_ty = match &self.current_func_result {
                    Some(ty) => ty.clone(),
                    None => return self.ice("ICE-1161", "return outside of function"),
                };

                // Returning an owned local directly is a move: skip the
                // retain and exclude the binding from cleanup.
                let returned_var = match &value.kind {
                    ExprKind::Var(var) => self.lookup_owned_local_name(value, var),
                    _ => None,
                };
                let use_move = returned_var.is_some();

                let needs_cleanup = self.scope_chain_has_cleanup();
                if needs_cleanup {
                    // Evaluate the return value before cleanup releases
                    // anything it may reference.
                    let c_value = if use_move {
                        self.emit_expr_with_expected_type(value, &result_ty)?
                    } else {
                        self.emit_owned_expr_with_expected_type(value, &result_ty)?
                    };
                    let ret_tmp = self.emitter.fresh_tmp("ret");
                    let c_ret_type = self.emitter.emit_type(&result_ty);
                    self.emitter.emit_temp_decl(&c_ret_type, &ret_tmp, &c_value);
                    self.emit_cleanup_for_return(returned_var.as_deref())?;
                    self.emitter.emit_return_stmt(Some(&ret_tmp));
                } else {
                    self.emit_cleanup_for_return(returned_var.as_deref())?;
                    let c_value = if use_move {
                        self.emit_expr_with_expected_type(value, &result_ty)?
                    } else {
                        self.emit_owned_expr_with_expected_type(value, &result_ty)?
                    };
                    self.emitter.emit_return_stmt(Some(&c_value));
                }
            }
        }
        self.next_stmt_unreachable = true;
        Ok(())
    }

    fn emit_while(&mut self, stmt: &WhileStmt) -> BResult<()> {
        let break_label = self.fresh_label("lbrk");
        let continue_label = self.fresh_label("lcont");
        self.loop_label_stack
            .push((break_label.clone(), continue_label.clone()));

        let c_cond = self.emit_expr(&stmt.cond)?;
        self.emitter.emit_while_header(&c_cond);
        self.emitter.emit_block_start();

        let loop_scope = self.push_scope();
        self.loop_scope_stack.push(loop_scope);

        let result = self.emit_block_sequence(&stmt.body);

        if result.is_ok() && !self.next_stmt_unreachable {
            self.emit_cleanup_at_scope_exit(loop_scope);
        }
        self.emitter.emit_label(&continue_label);

        self.loop_scope_stack.pop();
        self.pop_scope();
        self.emitter.emit_block_end();

        self.emitter.emit_label(&break_label);
        self.loop_label_stack.pop();
        self.next_stmt_unreachable = false;
        result
    }

    fn emit_for(&mut self, stmt: &ForStmt) -> BResult<()> {
        let break_label = self.fresh_label("lbrk");
        let continue_label = self.fresh_label("lcont");
        self.loop_label_stack
            .push((break_label.clone(), continue_label.clone()));

        let outer_scope = self.push_scope();
        self.emitter.emit_comment("for loop");
        self.emitter.emit_block_start();

        let result = (|| -> BResult<()> {
            if let Some(init) = &stmt.init {
                self.emit_stmt(init)?;
            }

            let c_cond = match &stmt.cond {
                Some(cond) => self.emit_expr(cond)?,
                None => "1".to_string(),
            };
            self.emitter.emit_while_header(&c_cond);
            self.emitter.emit_block_start();

            let loop_scope = self.push_scope();
            self.loop_scope_stack.push(loop_scope);

            let body_result = self.emit_block_sequence(&stmt.body);

            self.emitter.emit_label(&continue_label);
            if body_result.is_ok() {
                if let Some(step) = &stmt.step {
                    if !self.next_stmt_unreachable {
                        self.emit_stmt(step)?;
                    }
                }
                if !self.next_stmt_unreachable {
                    self.emit_cleanup_at_scope_exit(loop_scope);
                }
            }

            self.loop_scope_stack.pop();
            self.pop_scope();
            self.emitter.emit_block_end();
            body_result
        })();

        if result.is_ok() && !self.next_stmt_unreachable {
            self.emit_cleanup_at_scope_exit(outer_scope);
        }
        self.pop_scope();
        self.emitter.emit_block_end();

        self.emitter.emit_label(&break_label);
        self.loop_label_stack.pop();
        self.next_stmt_unreachable = false;
        result
    }

    fn emit_if_else(&mut self, stmt: &IfStmt) -> BResult<()> {
        let c_cond = self.emit_expr(&stmt.cond)?;
        self.emitter.emit_if_header(&c_cond);

        self.next_stmt_unreachable = false;
        self.emit_branch(&stmt.then_branch)?;
        let then_unreachable = self.next_stmt_unreachable;

        if let Some(else_branch) = &stmt.else_branch {
            self.emitter.emit_else();
            self.next_stmt_unreachable = false;
            self.emit_branch(else_branch)?;
            let else_unreachable = self.next_stmt_unreachable;
            self.next_stmt_unreachable = then_unreachable && else_unreachable;
        } else {
            self.next_stmt_unreachable = false;
        }
        Ok(())
    }

    /// One branch of an if/else, always emitted as a real C block.
    fn emit_branch(&mut self, stmt: &Stmt) -> BResult<()> {
        match stmt {
            Stmt::Block(block) => self.emit_nested_block(block),
            other => {
                self.emitter.emit_block_start();
                let branch_scope = self.push_scope();
                let result = self.emit_stmt(other);
                if result.is_ok() && !self.next_stmt_unreachable {
                    self.emit_cleanup_at_scope_exit(branch_scope);
                }
                self.pop_scope();
                self.emitter.emit_block_end();
                result
            }
        }
    }

    fn emit_let(&mut self, stmt: &LetStmt) -> BResult<()> {
        let var_ty = self.resolve_let_type(stmt)?;
        let c_name = mangle_identifier(&stmt.name);
        let c_type = self.emitter.emit_type(&var_ty);
        let c_init = self.emit_owned_expr_with_expected_type(&stmt.value, &var_ty)?;
        self.emitter.emit_let_decl(&c_type, &c_name, &c_init);

        if let Some(scope) = self.scopes.last_mut() {
            scope.owned_vars.push((c_name.clone(), var_ty.clone()));
            scope.declared_vars.push((c_name, var_ty));
        }
        Ok(())
    }

    fn resolve_let_type(&mut self, stmt: &LetStmt) -> BResult<Type> {
        if let Some(tref) = &stmt.type_ref {
            let resolved = resolve_type_ref(
                &self.analysis.module_envs,
                &self.analysis.symbols,
                &self.current_module,
                tref,
            );
            if let Some(ty) = resolved.ty {
                return Ok(ty);
            }
        }
        match self.analysis.expr_types.get(&stmt.value.id) {
            Some(ty) => Ok(ty.clone()),
            None => Err(Ice::new(
                "ICE-1170",
                format!("missing inferred type for let initializer '{}'", stmt.name),
            )
            .with_span(stmt.span)),
        }
    }

    fn emit_reassignment(&mut self, stmt: &AssignStmt) -> BResult<()> {
        let Some(dst_ty) = self.analysis.expr_types.get(&stmt.target.id).cloned() else {
            return Err(
                Ice::new("ICE-1240", "missing inferred type for assignment").with_span(stmt.span)
            );
        };

        let c_target = self.emit_lvalue_with_caching(&stmt.target)?;
        let c_value = self.emit_owned_expr_with_expected_type(&stmt.value, &dst_ty)?;

        if self.analysis.has_arc_data(&dst_ty) {
            if let Some(declaring_scope) = self.borrowed_arc_param_scope(&stmt.target, &dst_ty) {
                // Reassigned borrowed parameter: the old value belongs to
                // the caller (no release); the new value is owned here.
                self.emitter.emit_assignment(&c_target, &c_value);
                if let ExprKind::Var(var) = &stmt.target.kind {
                    let mangled = mangle_identifier(&var.name);
                    self.scopes[declaring_scope]
                        .owned_vars
                        .push((mangled, dst_ty));
                }
            } else {
                let temp = self.emitter.fresh_tmp("tmp");
                let c_type = self.emitter.emit_type(&dst_ty);
                self.emitter.emit_temp_decl(&c_type, &temp, &c_value);
                self.emitter
                    .emit_value_cleanup(self.analysis, &c_target, &dst_ty);
                self.emitter.emit_assignment(&c_target, &temp);
            }
        } else {
            self.emitter.emit_assignment(&c_target, &c_value);
        }
        Ok(())
    }

    /// Scope index of a borrowed ARC parameter, or None when the target
    /// is owned somewhere (or is not a simple variable).
    fn borrowed_arc_param_scope(&self, target: &Expr, dst_ty: &Type) -> Option<usize> {
        let ExprKind::Var(var) = &target.kind else {
            return None;
        };
        if !self.analysis.has_arc_data(dst_ty) {
            return None;
        }
        let mangled = mangle_identifier(&var.name);
        for scope in &self.scopes {
            if scope.owned_vars.iter().any(|(name, _)| *name == mangled) {
                return None;
            }
        }
        self.find_declaring_scope(&mangled)
    }

    fn find_declaring_scope(&self, mangled_name: &str) -> Option<usize> {
        for (index, scope) in self.scopes.iter().enumerate().rev() {
            if scope
                .declared_vars
                .iter()
                .any(|(name, _)| name == mangled_name)
            {
                return Some(index);
            }
        }
        None
    }

    fn lookup_local_var_type(&self, var_name: &str) -> Option<Type> {
        let mangled = mangle_identifier(var_name);
        for scope in self.scopes.iter().rev() {
            for (name, ty) in &scope.declared_vars {
                if *name == mangled {
                    return Some(ty.clone());
                }
            }
        }
        None
    }

    /// Mangled name when a VarRef resolves to an owned local binding.
    /// Parameters are local but borrowed, so they are not owned and
    /// return None.
    fn lookup_owned_local_name(&self, expr: &Expr, var: &VarRef) -> Option<String> {
        if self.analysis.var_ref_resolution.get(&expr.id) != Some(&VarRefResolution::Local) {
            return None;
        }
        let mangled = mangle_identifier(&var.name);
        for scope in &self.scopes {
            if scope.owned_vars.iter().any(|(name, _)| *name == mangled) {
                return Some(mangled);
            }
        }
        None
    }

    /// Cache side-effecting sub-expressions of an lvalue so the
    /// release/assign sequence evaluates them exactly once.
    fn emit_lvalue_with_caching(&mut self, target: &Expr) -> BResult<String> {
        match &target.kind {
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } if has_side_effects(operand) => {
                let Some(ptr_ty) = self.analysis.expr_types.get(&operand.id).cloned() else {
                    return Err(Ice::new("ICE-1242", "missing type for dereference operand")
                        .with_span(operand.span));
                };
                let ptr_temp = self.emitter.fresh_tmp("ptr");
                let c_ptr = self.emit_expr(operand)?;
                let c_type = self.emitter.emit_type(&ptr_ty);
                self.emitter.emit_temp_decl(&c_type, &ptr_temp, &c_ptr);
                Ok(format!("(*{ptr_temp})"))
            }
            ExprKind::Field { object, field } if has_side_effects(object) => {
                let Some(obj_ty) = self.analysis.expr_types.get(&object.id).cloned() else {
                    return Err(Ice::new("ICE-1243", "missing type for field access object")
                        .with_span(object.span));
                };
                let obj_temp = self.emitter.fresh_tmp("obj");
                let c_obj = self.emit_expr(object)?;
                let c_type = self.emitter.emit_type(&obj_ty);
                self.emitter.emit_temp_decl(&c_type, &obj_temp, &c_obj);
                let is_pointer = matches!(obj_ty, Type::Pointer(_));
                Ok(if is_pointer {
                    format!("{obj_temp}->{field}")
                } else {
                    format!("{obj_temp}.{field}")
                })
            }
            ExprKind::Paren(inner) => self.emit_lvalue_with_caching(inner),
            _ => self.emit_expr(target),
        }
    }

    fn emit_drop(&mut self, stmt: &DropStmt) -> BResult<()> {
        let c_name = mangle_identifier(&stmt.name);

        let var_type = match self.lookup_local_var_type(&stmt.name) {
            Some(ty) => ty,
            None => {
                let sym = self.lookup_symbol(&stmt.name, None);
                let ty = sym.and_then(|id| self.analysis.symbols.get(id).ty.clone());
                match ty {
                    Some(ty) => ty,
                    None => {
                        return Err(Ice::new(
                            "ICE-1060",
                            format!("undefined variable in drop: {}", stmt.name),
                        )
                        .with_span(stmt.span));
                    }
                }
            }
        };

        let inner_type = match &var_type {
            Type::Pointer(inner) => (**inner).clone(),
            Type::Nullable(outer) => match &**outer {
                Type::Pointer(inner) => (**inner).clone(),
                _ => {
                    return Err(Ice::new(
                        "ICE-1061",
                        format!("drop requires pointer type, got '{var_type}'"),
                    )
                    .with_span(stmt.span));
                }
            },
            _ => {
                return Err(Ice::new(
                    "ICE-1061",
                    format!("drop requires pointer type, got '{var_type}'"),
                )
                .with_span(stmt.span));
            }
        };

        // Owned-field cleanup of the pointee before the memory is freed.
        match &inner_type {
            Type::Struct { .. } => {
                self.emitter
                    .emit_struct_cleanup(self.analysis, &c_name, &inner_type);
            }
            Type::Enum { .. } => {
                self.emitter
                    .emit_enum_cleanup(self.analysis, &c_name, &inner_type);
            }
            Type::String => {
                let c_cond = self.emitter.emit_pointer_null_check(&c_name, "!=");
                self.emitter.emit_if_header(&c_cond);
                self.emitter.emit_block_start();
                self.emitter.emit_string_release(&format!("*{c_name}"));
                self.emitter.emit_block_end();
            }
            _ => {}
        }

        self.emitter.emit_drop_call(&c_name);
        self.emitter.emit_null_assignment(&c_name);
        Ok(())
    }

    fn emit_match(&mut self, stmt: &MatchStmt) -> BResult<()> {
        let Some(scrutinee_ty) = self.analysis.expr_types.get(&stmt.scrutinee.id).cloned() else {
            return Err(Ice::new("ICE-1190", "missing inferred type for match scrutinee")
                .with_span(stmt.scrutinee.span));
        };

        let mut c_scrutinee = self.emit_expr(&stmt.scrutinee)?;
        // One implicit deref: `match` over Enum* switches on the pointee.
        let enum_ty = match &scrutinee_ty {
            Type::Pointer(inner) if matches!(**inner, Type::Enum { .. }) => {
                c_scrutinee = format!("(*({c_scrutinee}))");
                (**inner).clone()
            }
            other => other.clone(),
        };
        let c_scrutinee_type = self.emitter.emit_type(&enum_ty);

        self.emitter.emit_block_start();
        let outer_scope = self.push_scope();
        self.emitter
            .emit_temp_decl(&c_scrutinee_type, "_scrutinee", &c_scrutinee);

        // Fresh rvalue scrutinees with ARC payloads are owned by this scope.
        if !self.is_place_like(&stmt.scrutinee) && self.analysis.has_arc_data(&enum_ty) {
            self.scopes[outer_scope]
                .owned_vars
                .push(("_scrutinee".to_string(), enum_ty.clone()));
        }

        self.emitter.emit_switch_start("_scrutinee.tag");

        let mut arms_unreachable = 0usize;
        let result = (|| -> BResult<()> {
            for arm in &stmt.arms {
                match &arm.pattern {
                    Pattern::Wildcard { .. } => self.emitter.emit_default_label(),
                    Pattern::Variant(pattern) => {
                        let tag = self.emitter.emit_enum_tag(&enum_ty, &pattern.name);
                        if tag.is_empty() {
                            return self
                                .ice("ICE-1191", "match arm cannot be lowered to a C switch case");
                        }
                        self.emitter.emit_case_label(&tag);
                    }
                }

                self.emitter.emit_block_start();
                let arm_scope = self.push_scope();
                self.next_stmt_unreachable = false;

                if let Pattern::Variant(pattern) = &arm.pattern {
                    self.emit_pattern_bindings(pattern, &enum_ty, arm_scope)?;
                }

                let arm_result = self.emit_block_sequence(&arm.body);
                if arm_result.is_ok() && !self.next_stmt_unreachable {
                    self.emit_cleanup_at_scope_exit(arm_scope);
                }
                if self.next_stmt_unreachable {
                    arms_unreachable += 1;
                }
                self.pop_scope();
                self.emitter.emit_exit_switch();
                self.emitter.emit_block_end();
                arm_result?;
            }
            Ok(())
        })();

        self.emitter.emit_switch_end();

        self.next_stmt_unreachable = arms_unreachable == stmt.arms.len();
        if result.is_ok() && !self.next_stmt_unreachable {
            self.emit_cleanup_at_scope_exit(outer_scope);
        }
        self.pop_scope();
        self.emitter.emit_block_end();
        result
    }

    fn emit_pattern_bindings(
        &mut self,
        pattern: &crate::ast::VariantPattern,
        enum_ty: &Type,
        arm_scope: usize,
    ) -> BResult<()> {
        let Type::Enum { module, name } = enum_ty else {
            return Ok(());
        };
        let Some(info) = self.analysis.enum_infos.get(&(module.clone(), name.clone())) else {
            return Ok(());
        };
        let Some(variant) = info.variant(&pattern.name) else {
            return Ok(());
        };
        let field_types = variant.field_types.clone();
        let Some(decl) = find_variant_decl(self.analysis, module, name, &pattern.name) else {
            return Ok(());
        };
        if pattern.vars.len() != decl.fields.len() {
            return Ok(()); // Arity mismatch already diagnosed.
        }
        let field_names: Vec<String> = decl.fields.iter().map(|field| field.name.clone()).collect();

        for ((pat_var, field_name), field_ty) in
            pattern.vars.iter().zip(&field_names).zip(&field_types)
        {
            let c_type = self.emitter.emit_type(field_ty);
            let c_var = mangle_identifier(pat_var);
            let c_init = self
                .emitter
                .emit_pattern_binding_init("_scrutinee", &pattern.name, field_name);
            self.emitter.emit_let_decl(&c_type, &c_var, &c_init);
            // Pattern variables borrow from the scrutinee: declared, not
            // owned.
            self.scopes[arm_scope]
                .declared_vars
                .push((c_var, field_ty.clone()));
        }
        Ok(())
    }

    fn emit_case(&mut self, stmt: &CaseStmt) -> BResult<()> {
        let Some(scrutinee_ty) = self.analysis.expr_types.get(&stmt.scrutinee.id).cloned() else {
            return Err(Ice::new("ICE-1193", "missing inferred type for case scrutinee")
                .with_span(stmt.scrutinee.span));
        };

        let c_scrutinee_type = self.emitter.emit_type(&scrutinee_ty);
        let c_scrutinee = self.emit_expr(&stmt.scrutinee)?;

        let total_arms = stmt.arms.len() + usize::from(stmt.else_arm.is_some());
        let mut arms_unreachable = 0usize;

        self.emitter.emit_block_start();
        let outer_scope = self.push_scope();
        self.emitter
            .emit_temp_decl(&c_scrutinee_type, "_scrutinee", &c_scrutinee);

        if !self.is_place_like(&stmt.scrutinee) && self.analysis.has_arc_data(&scrutinee_ty) {
            self.scopes[outer_scope]
                .owned_vars
                .push(("_scrutinee".to_string(), scrutinee_ty.clone()));
        }

        let result = (|| -> BResult<()> {
            if scrutinee_ty.is_string() {
                // String dispatch lowers to an if/else chain over runtime
                // equality.
                if stmt.arms.is_empty() {
                    if let Some(else_arm) = &stmt.else_arm {
                        let arm_scope = self.push_scope();
                        self.next_stmt_unreachable = false;
                        let arm_result = self.emit_stmt(&else_arm.body);
                        if arm_result.is_ok() && !self.next_stmt_unreachable {
                            self.emit_cleanup_at_scope_exit(arm_scope);
                        }
                        if self.next_stmt_unreachable {
                            arms_unreachable += 1;
                        }
                        self.pop_scope();
                        arm_result?;
                    }
                    return Ok(());
                }

                for (index, arm) in stmt.arms.iter().enumerate() {
                    let c_literal = self.emit_case_literal(&arm.literal)?;
                    let condition = format!("rt_string_equals(_scrutinee, {c_literal})");
                    if index > 0 {
                        self.emitter.emit_else();
                    }
                    self.emitter.emit_if_header(&condition);
                    self.emitter.emit_block_start();

                    let arm_scope = self.push_scope();
                    self.next_stmt_unreachable = false;
                    let arm_result = self.emit_stmt(&arm.body);
                    if arm_result.is_ok() && !self.next_stmt_unreachable {
                        self.emit_cleanup_at_scope_exit(arm_scope);
                    }
                    if self.next_stmt_unreachable {
                        arms_unreachable += 1;
                    }
                    self.pop_scope();
                    self.emitter.emit_block_end();
                    arm_result?;
                }

                if let Some(else_arm) = &stmt.else_arm {
                    self.emitter.emit_else();
                    self.emitter.emit_block_start();
                    let arm_scope = self.push_scope();
                    self.next_stmt_unreachable = false;
                    let arm_result = self.emit_stmt(&else_arm.body);
                    if arm_result.is_ok() && !self.next_stmt_unreachable {
                        self.emit_cleanup_at_scope_exit(arm_scope);
                    }
                    if self.next_stmt_unreachable {
                        arms_unreachable += 1;
                    }
                    self.pop_scope();
                    self.emitter.emit_block_end();
                    arm_result?;
                }
                Ok(())
            } else {
                self.emitter.emit_switch_start("_scrutinee");

                for arm in &stmt.arms {
                    let c_literal = self.emit_case_literal(&arm.literal)?;
                    self.emitter.emit_case_label(&c_literal);
                    self.emitter.emit_block_start();

                    let arm_scope = self.push_scope();
                    self.next_stmt_unreachable = false;
                    let arm_result = self.emit_stmt(&arm.body);
                    if arm_result.is_ok() && !self.next_stmt_unreachable {
                        self.emit_cleanup_at_scope_exit(arm_scope);
                    }
                    if self.next_stmt_unreachable {
                        arms_unreachable += 1;
                    }
                    self.pop_scope();
                    self.emitter.emit_exit_switch();
                    self.emitter.emit_block_end();
                    arm_result?;
                }

                if let Some(else_arm) = &stmt.else_arm {
                    self.emitter.emit_default_label();
                    self.emitter.emit_block_start();
                    let arm_scope = self.push_scope();
                    self.next_stmt_unreachable = false;
                    let arm_result = self.emit_stmt(&else_arm.body);
                    if arm_result.is_ok() && !self.next_stmt_unreachable {
                        self.emit_cleanup_at_scope_exit(arm_scope);
                    }
                    if self.next_stmt_unreachable {
                        arms_unreachable += 1;
                    }
                    self.pop_scope();
                    self.emitter.emit_exit_switch();
                    self.emitter.emit_block_end();
                    arm_result?;
                }

                self.emitter.emit_switch_end();
                Ok(())
            }
        })();

        if total_arms == 0 {
            self.next_stmt_unreachable = false;
        } else {
            // Without an else some value may not match any arm.
            self.next_stmt_unreachable =
                stmt.else_arm.is_some() && arms_unreachable == total_arms;
        }

        if result.is_ok() && !self.next_stmt_unreachable {
            self.emit_cleanup_at_scope_exit(outer_scope);
        }
        self.pop_scope();
        self.emitter.emit_block_end();
        result
    }

    fn emit_case_literal(&mut self, expr: &Expr) -> BResult<String> {
        match &expr.kind {
            ExprKind::Int(value) => Ok(self.emitter.emit_int_literal(*value)),
            ExprKind::Byte(payload) => Ok(self.emitter.emit_byte_literal(payload)),
            ExprKind::Bool(value) => Ok(self.emitter.emit_bool_literal(*value)),
            ExprKind::Str(payload) => Ok(self.emitter.emit_string_literal(payload)),
            _ => Err(Ice::new("ICE-1194", "unsupported case literal type").with_span(expr.span)),
        }
    }

    fn emit_with(&mut self, stmt: &WithStmt) -> BResult<()> {
        self.emitter.emit_block_start();
        let with_scope = self.push_scope();

        if let Some(cleanup) = &stmt.cleanup {
            self.scopes[with_scope].with_cleanup_block = Some(cleanup.clone());
        } else {
            // Inline cleanups register incrementally, so a `?` failure in
            // header item N still cleans items 0..N-1.
            self.scopes[with_scope].with_cleanup_inline = Some(Vec::new());
        }

        let result = (|| -> BResult<()> {
            // Cleanup-block form: predeclare nullable header lets to null
            // so the cleanup block always sees an initialized value, even
            // when a header `?` fails before a later item initializes.
            let mut predeclared: Vec<Option<Type>> = Vec::new();
            if stmt.cleanup.is_some() {
                for item in &stmt.items {
                    if let Stmt::Let(let_stmt) = &item.init {
                        predeclared.push(self.predeclare_nullable_with_let(let_stmt)?);
                    } else {
                        predeclared.push(None);
                    }
                }
            } else {
                predeclared.resize(stmt.items.len(), None);
            }

            for (index, item) in stmt.items.iter().enumerate() {
                match (&item.init, &predeclared[index]) {
                    (Stmt::Let(let_stmt), Some(var_ty)) => {
                        let c_name = mangle_identifier(&let_stmt.name);
                        let c_value =
                            self.emit_owned_expr_with_expected_type(&let_stmt.value, var_ty)?;
                        self.emitter.emit_assignment(&c_name, &c_value);
                    }
                    _ => self.emit_stmt(&item.init)?,
                }

                if stmt.cleanup.is_none() {
                    if let Some(cleanup) = &item.cleanup {
                        if let Some(inline) = &mut self.scopes[with_scope].with_cleanup_inline {
                            // LIFO: the latest successful item cleans first.
                            inline.insert(0, cleanup.clone());
                        }
                    }
                }
            }

            // The body gets its own C scope so its declarations can
            // legally shadow header names.
            self.emitter.emit_block_start();
            let body_scope = self.push_scope();
            let body_result = self.emit_block_sequence(&stmt.body);
            if body_result.is_ok() && !self.next_stmt_unreachable {
                self.emit_cleanup_at_scope_exit(body_scope);
            }
            let body_unreachable = self.next_stmt_unreachable;
            self.pop_scope();
            self.emitter.emit_block_end();
            body_result?;

            // Normal exit: user cleanup runs before automatic owned-var
            // cleanup so cleanup code can still use the header variables.
            if !body_unreachable {
                self.emit_with_cleanup_from_scope(with_scope)?;
                self.emit_cleanup_at_scope_exit(with_scope);
            }
            Ok(())
        })();

        self.pop_scope();
        self.emitter.emit_block_end();
        result
    }

    /// Predeclare a nullable `with`-header let as null; returns its type,
    /// or None when the let is not nullable (normal declaration path).
    fn predeclare_nullable_with_let(&mut self, stmt: &LetStmt) -> BResult<Option<Type>> {
        let var_ty = self.resolve_let_type(stmt)?;
        if !matches!(var_ty, Type::Nullable(_)) {
            return Ok(None);
        }
        let c_name = mangle_identifier(&stmt.name);
        let c_type = self.emitter.emit_type(&var_ty);
        let c_zero = self.emitter.emit_null_literal(&var_ty, true);
        self.emitter.emit_let_decl(&c_type, &c_name, &c_zero);
        if let Some(scope) = self.scopes.last_mut() {
            scope.owned_vars.push((c_name.clone(), var_ty.clone()));
            scope.declared_vars.push((c_name, var_ty.clone()));
        }
        Ok(Some(var_ty))
    }

    // ------------------------------------------------------------------
    // Ownership classification
    // ------------------------------------------------------------------

    /// Place-like for ownership decisions: plain place expressions, plus
    /// `opt as T` unwrap casts whose operand is a nullable place. The
    /// unwrapped value aliases the optional's payload, so ownership sites
    /// retain-copy it instead of treating it as a fresh rvalue.
    fn is_place_like(&self, expr: &Expr) -> bool {
        if is_place_expr(expr) {
            return true;
        }
        match &expr.kind {
            ExprKind::Paren(inner) => self.is_place_like(inner),
            ExprKind::Cast { operand, .. } => {
                if !is_place_expr(operand) {
                    return false;
                }
                let Some(src_ty) = self.analysis.expr_types.get(&operand.id) else {
                    return false;
                };
                let Some(dst_ty) = self.analysis.expr_types.get(&expr.id) else {
                    return false;
                };
                matches!(src_ty, Type::Nullable(inner) if **inner == *dst_ty)
            }
            _ => false,
        }
    }

    /// Materialize a fresh ARC rvalue into an anonymous owned temporary so
    /// scope-exit cleanup releases it.
    fn materialize_arc_temp(&mut self, c_expr: &str, expr_ty: &Type) -> String {
        let temp = self.emitter.fresh_tmp("arc");
        let c_type = self.emitter.emit_type(expr_ty);
        self.emitter.emit_temp_decl(&c_type, &temp, c_expr);
        if let Some(scope) = self.scopes.last_mut() {
            scope.owned_vars.push((temp.clone(), expr_ty.clone()));
            scope.declared_vars.push((temp.clone(), expr_ty.clone()));
        }
        temp
    }

    /// Retain every ARC payload of a copied value so the source and the
    /// destination own independent references.
    fn emit_retain_for_copied_value(&mut self, c_expr: &str, ty: &Type) -> BResult<()> {
        if self.analysis.is_arc_type(ty) {
            self.emitter.emit_string_retain(c_expr);
            return Ok(());
        }

        match ty {
            Type::Nullable(inner) => {
                if matches!(**inner, Type::Pointer(_)) || !self.analysis.has_arc_data(inner) {
                    return Ok(());
                }
                self.emitter
                    .emit_if_header(&format!("({c_expr}).has_value"));
                self.emitter.emit_block_start();
                let inner_expr = format!("({c_expr}).value");
                self.emit_retain_for_copied_value(&inner_expr, inner)?;
                self.emitter.emit_block_end();
                Ok(())
            }
            Type::Struct { module, name } => {
                let Some(info) = self.analysis.struct_infos.get(&(module.clone(), name.clone()))
                else {
                    return Ok(());
                };
                let fields: Vec<(String, Type)> = info
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.ty.clone()))
                    .collect();
                for (field_name, field_ty) in fields {
                    let field_expr = format!("({c_expr}).{field_name}");
                    self.emit_retain_for_copied_value(&field_expr, &field_ty)?;
                }
                Ok(())
            }
            Type::Enum { module, name } => {
                let Some(info) = self.analysis.enum_infos.get(&(module.clone(), name.clone()))
                else {
                    return Ok(());
                };
                let variants: Vec<(String, Vec<Type>)> = info
                    .variants
                    .iter()
                    .map(|variant| (variant.name.clone(), variant.field_types.clone()))
                    .collect();

                self.emitter.emit_switch_start(&format!("({c_expr}).tag"));
                for (variant_name, field_types) in variants {
                    if !field_types.iter().any(|t| self.analysis.has_arc_data(t)) {
                        continue;
                    }
                    let tag = self.emitter.emit_enum_tag(ty, &variant_name);
                    self.emitter.emit_case_label(&tag);
                    self.emitter.emit_block_start();

                    let Some(decl) = find_variant_decl(self.analysis, module, name, &variant_name)
                    else {
                        return self.ice(
                            "ICE-1304",
                            format!("missing variant decl for {module}.{name}.{variant_name}"),
                        );
                    };
                    let field_names: Vec<String> =
                        decl.fields.iter().map(|field| field.name.clone()).collect();
                    for (field_name, field_ty) in field_names.iter().zip(&field_types) {
                        let field_expr = format!("({c_expr}).data.{variant_name}.{field_name}");
                        self.emit_retain_for_copied_value(&field_expr, field_ty)?;
                    }

                    self.emitter.emit_exit_switch();
                    self.emitter.emit_block_end();
                }
                self.emitter.emit_default_label();
                self.emitter.emit_exit_switch();
                self.emitter.emit_switch_end();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Copy a place value into a temp and retain its ARC payloads.
    fn emit_copy_expr_with_retains(&mut self, c_expr: &str, ty: &Type) -> BResult<String> {
        if !self.analysis.has_arc_data(ty) {
            return Ok(c_expr.to_string());
        }
        let temp = self.emitter.fresh_tmp("copy");
        let c_type = self.emitter.emit_type(ty);
        self.emitter.emit_temp_decl(&c_type, &temp, c_expr);
        self.emit_retain_for_copied_value(&temp, ty)?;
        Ok(temp)
    }

    // ------------------------------------------------------------------
    // Expression emission
    // ------------------------------------------------------------------

    fn convert_expr_with_expected_type(
        &mut self,
        c_expr: String,
        natural_ty: Option<&Type>,
        expected: &Type,
    ) -> String {
        let Some(natural) = natural_ty else {
            return c_expr;
        };
        if natural == expected {
            return c_expr;
        }

        // T -> T? wrap.
        if let Type::Nullable(inner) = expected {
            if **inner == *natural {
                if expected.is_niche_nullable() {
                    return c_expr;
                }
                return self.emitter.emit_some_value(expected, &c_expr);
            }
        }

        // byte -> int widening.
        if matches!(natural, Type::Byte) && matches!(expected, Type::Int) {
            return self.emitter.emit_cast("l0_int", &c_expr);
        }

        c_expr
    }

    fn emit_expr_with_expected_type(&mut self, expr: &Expr, expected: &Type) -> BResult<String> {
        if matches!(expr.kind, ExprKind::Null) {
            if matches!(expected, Type::Nullable(_) | Type::Pointer(_)) {
                return Ok(self.emitter.emit_null_literal(expected, false));
            }
            return Err(Ice::new(
                "ICE-1090",
                format!("invalid expected type for null literal: '{expected}'"),
            )
            .with_span(expr.span));
        }

        let natural_ty = self.analysis.expr_types.get(&expr.id).cloned();
        let c_expr = self.emit_expr(expr)?;
        Ok(self.convert_expr_with_expected_type(c_expr, natural_ty.as_ref(), expected))
    }

    /// Emit an expression for a context that creates a new owner: copies
    /// from place expressions retain their ARC payloads.
    fn emit_owned_expr_with_expected_type(&mut self, expr: &Expr, expected: &Type) -> BResult<String> {
        if matches!(expr.kind, ExprKind::Null) {
            return self.emit_expr_with_expected_type(expr, expected);
        }

        let natural_ty = self.analysis.expr_types.get(&expr.id).cloned();
        let c_expr = self.emit_expr(expr)?;

        let Some(natural) = natural_ty else {
            return Ok(self.convert_expr_with_expected_type(c_expr, None, expected));
        };
        if !self.is_place_like(expr) {
            return Ok(self.convert_expr_with_expected_type(c_expr, Some(&natural), expected));
        }

        if natural == *expected {
            return self.emit_copy_expr_with_retains(&c_expr, expected);
        }

        if let Type::Nullable(inner) = expected {
            if **inner == natural {
                if expected.is_niche_nullable() {
                    return Ok(c_expr);
                }
                let retained = self.emit_copy_expr_with_retains(&c_expr, inner)?;
                return Ok(self.emitter.emit_some_value(expected, &retained));
            }
        }

        Ok(self.convert_expr_with_expected_type(c_expr, Some(&natural), expected))
    }

    fn emit_expr(&mut self, expr: &Expr) -> BResult<String> {
        self.emit_expr_impl(expr, false)
    }

    fn emit_expr_in_stmt(&mut self, expr: &Expr) -> BResult<String> {
        self.emit_expr_impl(expr, true)
    }

    fn emit_expr_impl(&mut self, expr: &Expr, is_statement: bool) -> BResult<String> {
        match &expr.kind {
            ExprKind::Int(value) => {
                if is_statement {
                    self.emitter.emit_comment(&format!("int literal {value}"));
                    return Ok(String::new());
                }
                Ok(self.emitter.emit_int_literal(*value))
            }
            ExprKind::Byte(payload) => {
                if is_statement {
                    self.emitter.emit_comment(&format!("byte literal '{payload}'"));
                    return Ok(String::new());
                }
                Ok(self.emitter.emit_byte_literal(payload))
            }
            ExprKind::Str(payload) => {
                if is_statement {
                    self.emitter
                        .emit_comment(&format!("string literal \"{payload}\""));
                    return Ok(String::new());
                }
                Ok(self.emitter.emit_string_literal(payload))
            }
            ExprKind::Bool(value) => {
                if is_statement {
                    self.emitter.emit_comment(&format!("bool literal {value}"));
                    return Ok(String::new());
                }
                Ok(self.emitter.emit_bool_literal(*value))
            }
            ExprKind::Null => {
                if is_statement {
                    self.emitter.emit_comment("null literal");
                    return Ok(String::new());
                }
                let Some(expected) = self.analysis.expr_types.get(&expr.id).cloned() else {
                    return Err(Ice::new("ICE-1091", "missing expected type for null literal")
                        .with_span(expr.span));
                };
                if matches!(expected, Type::Nullable(_) | Type::Pointer(_)) {
                    return Ok(self.emitter.emit_null_literal(&expected, false));
                }
                Err(Ice::new(
                    "ICE-1090",
                    format!("invalid expected type for null literal: '{expected}'"),
                )
                .with_span(expr.span))
            }
            ExprKind::Var(var) => self.emit_var_ref(expr, var, is_statement),
            ExprKind::Unary { op, operand } => {
                let c_operand = self.emit_expr(operand)?;
                Ok(format!("({}{c_operand})", op.symbol()))
            }
            ExprKind::Binary { op, left, right } => self.emit_binary(expr, *op, left, right),
            ExprKind::Call { callee, args } => self.emit_call(expr, callee, args),
            ExprKind::Index { .. } => {
                Err(Ice::new("ICE-1899", "index expressions are not lowered yet")
                    .with_span(expr.span))
            }
            ExprKind::Field { object, field } => {
                let c_obj = self.emit_expr(object)?;
                let obj_ty = self.analysis.expr_types.get(&object.id);
                let is_pointer = matches!(obj_ty, Some(Type::Pointer(_)));
                Ok(self.emitter.emit_field_access(&c_obj, field, is_pointer))
            }
            ExprKind::Paren(inner) => {
                let c_inner = self.emit_expr(inner)?;
                Ok(format!("({c_inner})"))
            }
            ExprKind::Cast { operand, target } => self.emit_cast_expr(expr, operand, target),
            ExprKind::New { .. } => self.emit_new_expr(expr),
            ExprKind::Try(inner) => self.emit_try_expr(expr, inner, is_statement),
            ExprKind::TypeArg(_) => Err(Ice::new(
                "ICE-9149",
                "type expression reached the backend outside an intrinsic",
            )
            .with_span(expr.span)),
        }
    }

    fn emit_var_ref(&mut self, expr: &Expr, var: &VarRef, is_statement: bool) -> BResult<String> {
        let resolution = self.analysis.var_ref_resolution.get(&expr.id).copied();
        let Some(resolution) = resolution else {
            return Err(Ice::new(
                "ICE-1102",
                format!("missing variable resolution for '{}'", var.name),
            )
            .with_span(expr.span));
        };

        if resolution == VarRefResolution::Local {
            if is_statement {
                self.emitter.emit_comment(&format!("var ref {}", var.name));
                return Ok(String::new());
            }
            return Ok(mangle_identifier(&var.name));
        }

        let Some(sym_id) = self.lookup_symbol(&var.name, var.module_path.as_deref()) else {
            return Err(Ice::new(
                "ICE-1103",
                format!("unresolved variable reference '{}' after type checking", var.name),
            )
            .with_span(expr.span));
        };
        let symbol = self.analysis.symbols.get(sym_id);
        match symbol.kind {
            SymbolKind::Func => {
                if self.is_extern_function(sym_id) {
                    Ok(var.name.clone())
                } else {
                    Ok(mangle_function_name(&symbol.module, &var.name))
                }
            }
            SymbolKind::Let => Ok(mangle_let_name(&symbol.module, &var.name)),
            SymbolKind::EnumVariant => {
                // Bare zero-arg variant constructor.
                let Some(expr_ty) = self.analysis.expr_types.get(&expr.id) else {
                    return Err(Ice::new(
                        "ICE-1103",
                        format!("unresolved variable reference '{}' after type checking", var.name),
                    )
                    .with_span(expr.span));
                };
                Ok(self
                    .emitter
                    .emit_variant_constructor(expr_ty, &var.name, &[]))
            }
            _ => Err(Ice::new(
                "ICE-1103",
                format!("unresolved variable reference '{}' after type checking", var.name),
            )
            .with_span(expr.span)),
        }
    }

    fn emit_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> BResult<String> {
        // Nullable compared with null.
        if op.is_equality()
            && (matches!(left.kind, ExprKind::Null) || matches!(right.kind, ExprKind::Null))
        {
            let other = if matches!(left.kind, ExprKind::Null) {
                right
            } else {
                left
            };
            let other_ty = self.analysis.expr_types.get(&other.id).cloned();
            let c_other = self.emit_expr(other)?;

            if let Some(ty @ Type::Nullable(_)) = &other_ty {
                if !ty.is_niche_nullable() {
                    return Ok(if op == BinaryOp::Eq {
                        self.emitter.emit_null_check_eq(&c_other)
                    } else {
                        self.emitter.emit_null_check_ne(&c_other)
                    });
                }
            }

            if !matches!(other_ty, Some(Type::Pointer(_) | Type::Nullable(_))) {
                return self.ice(
                    "ICE-1010",
                    format!("invalid null comparison: {c_other} {} NULL", op.symbol()),
                );
            }
            return Ok(self.emitter.emit_pointer_null_check(&c_other, op.symbol()));
        }

        let c_left = self.emit_expr(left)?;
        let c_right = self.emit_expr(right)?;

        let left_ty = self.analysis.expr_types.get(&left.id).cloned();
        let right_ty = self.analysis.expr_types.get(&right.id).cloned();

        if op.is_arithmetic() {
            let both_int = matches!(&left_ty, Some(ty) if ty.is_int_assignable())
                && matches!(&right_ty, Some(ty) if ty.is_int_assignable());
            if !both_int {
                return self.ice(
                    "ICE-1011",
                    format!("non-integer '{}' lowering not implemented", op.symbol()),
                );
            }
            return Ok(match op {
                BinaryOp::Div => self.emitter.emit_checked_int_div(&c_left, &c_right),
                BinaryOp::Rem => self.emitter.emit_checked_int_mod(&c_left, &c_right),
                BinaryOp::Mul => self.emitter.emit_checked_int_mul(&c_left, &c_right),
                BinaryOp::Add => self.emitter.emit_checked_int_add(&c_left, &c_right),
                _ => self.emitter.emit_checked_int_sub(&c_left, &c_right),
            });
        }

        let (Some(left_ty), Some(right_ty)) = (left_ty, right_ty) else {
            return Err(Ice::new("ICE-1013", "missing inferred type for binary operation")
                .with_span(expr.span));
        };

        // Comparisons and equality permit mixed int/byte; C promotion
        // handles the width difference.
        let mixed_numeric = left_ty.is_int_assignable() && right_ty.is_int_assignable();
        if left_ty != right_ty && !mixed_numeric {
            return Err(Ice::new("ICE-1014", "type mismatch in binary operation")
                .with_span(expr.span));
        }
        if !(mixed_numeric || left_ty.is_bool()) {
            return Err(Ice::new(
                "ICE-1015",
                format!("'{}' lowering not implemented for type '{left_ty}'", op.symbol()),
            )
            .with_span(expr.span));
        }

        Ok(self.emitter.emit_binary_op(op.symbol(), &c_left, &c_right))
    }

    fn emit_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> BResult<String> {
        let ExprKind::Var(var) = &callee.kind else {
            return self.ice("ICE-1100", "unresolved function call target after type checking");
        };

        if var.module_path.is_none() {
            if var.name == "sizeof" {
                return self.emit_sizeof_intrinsic(expr);
            }
            if var.name == "ord" {
                return self.emit_ord_intrinsic(expr, args);
            }
        }

        if let Some(constructor) = self.try_emit_constructor(expr, var, args)? {
            return Ok(constructor);
        }

        let Some(sym_id) = self.lookup_symbol(&var.name, var.module_path.as_deref()) else {
            return self.ice("ICE-1100", "unresolved function call target after type checking");
        };
        let symbol = self.analysis.symbols.get(sym_id);
        if symbol.kind != SymbolKind::Func {
            return self.ice("ICE-1100", "unresolved function call target after type checking");
        }

        let c_func_name = if self.is_extern_function(sym_id) {
            var.name.clone()
        } else {
            mangle_function_name(&symbol.module, &var.name)
        };

        let param_types: Option<Vec<Type>> = match &symbol.ty {
            Some(Type::Func { params, .. }) if params.len() == args.len() => Some(params.clone()),
            _ => None,
        };

        let mut c_args = Vec::new();
        for (index, arg) in args.iter().enumerate() {
            let mut c_arg = match &param_types {
                Some(params) => self.emit_expr_with_expected_type(arg, &params[index])?,
                None => self.emit_expr(arg)?,
            };
            // Fresh ARC rvalue arguments outlive the call via an owned
            // temporary released at scope exit.
            if let Some(arg_ty) = self.analysis.expr_types.get(&arg.id).cloned() {
                if self.analysis.has_arc_data(&arg_ty)
                    && !self.is_place_like(arg)
                    && needs_arc_temp(arg)
                {
                    c_arg = self.materialize_arc_temp(&c_arg, &arg_ty);
                }
            }
            c_args.push(c_arg);
        }

        Ok(format!("{c_func_name}({})", c_args.join(", ")))
    }

    fn emit_sizeof_intrinsic(&mut self, expr: &Expr) -> BResult<String> {
        let Some(target) = self.analysis.intrinsic_targets.get(&expr.id) else {
            return Err(Ice::new("ICE-1120", "failed to resolve sizeof target type")
                .with_span(expr.span));
        };
        Ok(self.emitter.emit_sizeof_type(target))
    }

    fn emit_ord_intrinsic(&mut self, expr: &Expr, args: &[Expr]) -> BResult<String> {
        let [arg] = args else {
            return Err(Ice::new("ICE-1121", "ord expects exactly 1 argument").with_span(expr.span));
        };
        let c_arg = self.emit_expr(arg)?;
        Ok(self.emitter.emit_ord(&c_arg))
    }

    /// Emit struct and enum-variant constructors as C compound literals.
    fn try_emit_constructor(
        &mut self,
        expr: &Expr,
        var: &VarRef,
        args: &[Expr],
    ) -> BResult<Option<String>> {
        let Some(sym_id) = self.lookup_symbol(&var.name, var.module_path.as_deref()) else {
            return Ok(None);
        };
        let kind = self.analysis.symbols.get(sym_id).kind;
        let expr_ty = self.analysis.expr_types.get(&expr.id).cloned();

        match (kind, expr_ty) {
            (SymbolKind::Struct, Some(ty @ Type::Struct { .. }))
            | (SymbolKind::TypeAlias, Some(ty @ Type::Struct { .. })) => {
                let Type::Struct { module, name } = &ty else {
                    return Ok(None);
                };
                let key = (module.clone(), name.clone());
                let Some(info) = self.analysis.struct_infos.get(&key) else {
                    return Err(Ice::new(
                        "ICE-1280",
                        format!("missing struct info for {module}.{name}"),
                    )
                    .with_span(expr.span));
                };
                if info.fields.len() != args.len() {
                    return Err(Ice::new(
                        "ICE-1281",
                        format!(
                            "argument count mismatch in struct constructor for {module}.{name}: \
                             expected {}, got {}",
                            info.fields.len(),
                            args.len()
                        ),
                    )
                    .with_span(expr.span));
                }
                let fields: Vec<(String, Type)> = info
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.ty.clone()))
                    .collect();
                let mut inits = Vec::new();
                for ((field_name, field_ty), arg) in fields.iter().zip(args) {
                    let c_arg = self.emit_owned_expr_with_expected_type(arg, field_ty)?;
                    inits.push((field_name.clone(), c_arg));
                }
                Ok(Some(self.emitter.emit_struct_constructor(&ty, &inits)))
            }
            (SymbolKind::EnumVariant, Some(ty @ Type::Enum { .. })) => {
                let Type::Enum { module, name } = &ty else {
                    return Ok(None);
                };
                let key = (module.clone(), name.clone());
                let Some(info) = self.analysis.enum_infos.get(&key) else {
                    return Err(Ice::new(
                        "ICE-1300",
                        format!("missing enum info for {module}.{name}"),
                    )
                    .with_span(expr.span));
                };
                let Some(variant) = info.variant(&var.name) else {
                    return Err(Ice::new(
                        "ICE-1301",
                        format!("missing variant info for {}", var.name),
                    )
                    .with_span(expr.span));
                };
                if variant.field_types.is_empty() {
                    return Ok(Some(self.emitter.emit_variant_constructor(
                        &ty,
                        &var.name,
                        &[],
                    )));
                }
                let field_types = variant.field_types.clone();
                let Some(decl) = find_variant_decl(self.analysis, module, name, &var.name) else {
                    return Err(Ice::new(
                        "ICE-1302",
                        format!("missing variant decl for {module}.{name}.{}", var.name),
                    )
                    .with_span(expr.span));
                };
                if decl.fields.len() != args.len() {
                    return Err(Ice::new(
                        "ICE-1303",
                        format!("arity mismatch in variant constructor {}", var.name),
                    )
                    .with_span(expr.span));
                }
                let field_names: Vec<String> =
                    decl.fields.iter().map(|field| field.name.clone()).collect();
                let mut inits = Vec::new();
                for ((field_name, field_ty), arg) in
                    field_names.iter().zip(&field_types).zip(args)
                {
                    let c_arg = self.emit_owned_expr_with_expected_type(arg, field_ty)?;
                    inits.push((field_name.clone(), c_arg));
                }
                Ok(Some(self.emitter.emit_variant_constructor(
                    &ty,
                    &var.name,
                    &inits,
                )))
            }
            _ => Ok(None),
        }
    }

    fn emit_cast_expr(
        &mut self,
        expr: &Expr,
        operand: &Expr,
        target: &crate::ast::TypeRef,
    ) -> BResult<String> {
        let c_inner = self.emit_expr(operand)?;

        let src_ty = self.analysis.expr_types.get(&operand.id).cloned();
        let resolved = resolve_type_ref(
            &self.analysis.module_envs,
            &self.analysis.symbols,
            &self.current_module,
            target,
        );
        let Some(dst_ty) = resolved.ty else {
            return Err(Ice::new("ICE-1110", "failed to resolve cast target type")
                .with_span(target.span));
        };
        let c_dst = self.emitter.emit_type(&dst_ty);

        // Checked narrowing: int -> byte through the runtime helper.
        if matches!(src_ty, Some(Type::Int)) && matches!(dst_ty, Type::Byte) {
            return Ok(self.emitter.emit_checked_narrow_cast(&c_dst, &c_inner));
        }

        // T -> T? wrap.
        if let Type::Nullable(inner) = &dst_ty {
            if dst_ty.is_niche_nullable() {
                return Ok(self.emitter.emit_cast(&c_dst, &c_inner));
            }
            if matches!(operand.kind, ExprKind::Null) {
                return Ok(self.emitter.emit_null_literal(&dst_ty, false));
            }
            if is_place_expr(operand) && self.analysis.has_arc_data(inner) {
                let retained = self.emit_copy_expr_with_retains(&c_inner, inner)?;
                return Ok(self.emitter.emit_some_value(&dst_ty, &retained));
            }
            return Ok(self.emitter.emit_some_value(&dst_ty, &c_inner));
        }

        // T? -> T checked unwrap.
        if let Some(src @ Type::Nullable(inner)) = &src_ty {
            if **inner == dst_ty {
                if src.is_niche_nullable() {
                    return Ok(self
                        .emitter
                        .emit_unwrap_ptr(&c_dst, &c_inner, &src.to_string()));
                }
                let c_src = self.emitter.emit_type(src);
                return Ok(self
                    .emitter
                    .emit_unwrap_opt(&c_src, &c_inner, &src.to_string()));
            }
        }

        Ok(self.emitter.emit_cast(&c_dst, &c_inner))
    }

    fn emit_new_expr(&mut self, expr: &Expr) -> BResult<String> {
        let ExprKind::New { type_ref, args } = &expr.kind else {
            return self.ice("ICE-1200", "missing inferred pointer type for new expression");
        };
        let Some(Type::Pointer(base_ty)) = self.analysis.expr_types.get(&expr.id).cloned() else {
            return Err(Ice::new(
                "ICE-1200",
                "missing inferred pointer type for new expression",
            )
            .with_span(expr.span));
        };
        let base_ty = *base_ty;

        let c_base = self.emitter.emit_type(&base_ty);
        let c_ptr_ty = self.emitter.emit_pointer_type(&base_ty);
        let tmp = self.emitter.fresh_tmp("new");

        self.emitter.emit_alloc_obj(&c_ptr_ty, &c_base, &tmp);
        // Fresh heap objects are tracked for `drop`; registration happens
        // inside _rt_alloc_obj.
        if let Some(scope) = self.scopes.last_mut() {
            scope
                .declared_vars
                .push((tmp.clone(), Type::pointer(base_ty.clone())));
        }

        if args.is_empty() && !matches!(base_ty, Type::Enum { .. }) {
            self.emitter.emit_zero_init(&tmp, &c_base);
            return Ok(tmp);
        }

        match &base_ty {
            Type::Struct { module, name } => {
                let key = (module.clone(), name.clone());
                let Some(info) = self.analysis.struct_infos.get(&key) else {
                    return Err(Ice::new(
                        "ICE-1210",
                        format!("missing struct info for {module}.{name}"),
                    )
                    .with_span(expr.span));
                };
                let fields: Vec<(String, Type)> = info
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.ty.clone()))
                    .collect();
                let mut inits = Vec::new();
                for ((field_name, field_ty), arg) in fields.iter().zip(args) {
                    let c_arg = self.emit_owned_expr_with_expected_type(arg, field_ty)?;
                    inits.push(format!(".{field_name} = {c_arg}"));
                }
                self.emitter.emit_struct_init(&tmp, &c_base, &inits.join(", "));
            }
            Type::Enum { module, name } => {
                // `new` for enums goes through a variant constructor name.
                let variant_name = &type_ref.name;
                let Some(sym_id) =
                    self.lookup_symbol(variant_name, type_ref.module_path.as_deref())
                else {
                    return self.ice(
                        "ICE-1220",
                        "new enum allocation missing variant symbol (type checker invariant \
                         violated)",
                    );
                };
                if self.analysis.symbols.get(sym_id).kind != SymbolKind::EnumVariant {
                    return self.ice(
                        "ICE-1220",
                        "new enum allocation missing variant symbol (type checker invariant \
                         violated)",
                    );
                }

                let key = (module.clone(), name.clone());
                let Some(info) = self.analysis.enum_infos.get(&key) else {
                    return Err(Ice::new(
                        "ICE-1221",
                        format!("missing enum info for {module}.{name}"),
                    )
                    .with_span(expr.span));
                };
                let Some(variant) = info.variant(variant_name) else {
                    return Err(Ice::new(
                        "ICE-1222",
                        format!("unknown enum variant '{variant_name}' for {module}.{name}"),
                    )
                    .with_span(expr.span));
                };

                let tag = self.emitter.emit_enum_tag(&base_ty, variant_name);
                if variant.field_types.is_empty() {
                    self.emitter
                        .emit_struct_init(&tmp, &c_base, &format!(".tag = {tag}"));
                } else {
                    let field_types = variant.field_types.clone();
                    let Some(decl) = find_variant_decl(self.analysis, module, name, variant_name)
                    else {
                        return Err(Ice::new(
                            "ICE-1223",
                            format!("missing variant decl for {module}.{name}.{variant_name}"),
                        )
                        .with_span(expr.span));
                    };
                    if decl.fields.len() != args.len() {
                        return Err(Ice::new(
                            "ICE-1224",
                            format!(
                                "arity mismatch in new {variant_name}: expected {}, got {}",
                                decl.fields.len(),
                                args.len()
                            ),
                        )
                        .with_span(expr.span));
                    }
                    let field_names: Vec<String> =
                        decl.fields.iter().map(|field| field.name.clone()).collect();
                    let mut payload = Vec::new();
                    for ((field_name, field_ty), arg) in
                        field_names.iter().zip(&field_types).zip(args)
                    {
                        let c_arg = self.emit_owned_expr_with_expected_type(arg, field_ty)?;
                        payload.push(format!(".{field_name} = {c_arg}"));
                    }
                    let variant_name_c = variant_name.clone();
                    self.emitter.emit_struct_init(
                        &tmp,
                        &c_base,
                        &format!(
                            ".tag = {tag}, .data = {{ .{variant_name_c} = {{ {} }} }}",
                            payload.join(", ")
                        ),
                    );
                }
            }
            _ => {
                if args.len() == 1 {
                    let c_arg = self.emit_owned_expr_with_expected_type(&args[0], &base_ty)?;
                    self.emitter.emit_pointer_store(&tmp, &c_arg);
                } else {
                    return Err(Ice::new(
                        "ICE-1230",
                        format!(
                            "new expression with multiple args not supported for type '{base_ty}'"
                        ),
                    )
                    .with_span(expr.span));
                }
            }
        }

        Ok(tmp)
    }

    /// `e?` lowers to: evaluate once; when empty, run pending cleanups and
    /// return the enclosing function's none value; otherwise unwrap.
    fn emit_try_expr(&mut self, expr: &Expr, inner: &Expr, is_statement: bool) -> BResult<String> {
        let c_inner = self.emit_expr(inner)?;
        let Some(src_ty) = self.analysis.expr_types.get(&inner.id).cloned() else {
            return Err(
                Ice::new("ICE-1130", "missing inferred type for try operand").with_span(expr.span)
            );
        };
        let Type::Nullable(payload_ty) = &src_ty else {
            return Err(Ice::new(
                "ICE-1130",
                "try operand is not nullable (type checker invariant violated)",
            )
            .with_span(expr.span));
        };

        let tmp = self.emitter.fresh_tmp("try");
        let c_tmp_ty = self.emitter.emit_type(&src_ty);
        self.emitter.emit_temp_decl(&c_tmp_ty, &tmp, &c_inner);

        let Some(result_ty @ Type::Nullable(_)) = self.current_func_result.clone() else {
            return Err(Ice::new(
                "ICE-1131",
                "try used in non-nullable function (type checker invariant violated)",
            )
            .with_span(expr.span));
        };
        let ret_none = self.emitter.emit_null_literal(&result_ty, false);

        let needs_cleanup = self.scope_chain_has_cleanup();

        if src_ty.is_niche_nullable() {
            if needs_cleanup {
                self.emitter.emit_if_header(&format!("{tmp} == NULL"));
                self.emitter.emit_block_start();
                self.emit_cleanup_for_return(None)?;
                self.emitter.emit_return_stmt(Some(&ret_none));
                self.emitter.emit_block_end();
            } else {
                self.emitter.emit_try_check_niche(&tmp, &ret_none);
            }
            return Ok(tmp); // Unwraps to the pointer itself.
        }

        if needs_cleanup {
            self.emitter.emit_if_header(&format!("!{tmp}.has_value"));
            self.emitter.emit_block_start();
            self.emit_cleanup_for_return(None)?;
            self.emitter.emit_return_stmt(Some(&ret_none));
            self.emitter.emit_block_end();
        } else {
            self.emitter.emit_try_check_value(&tmp, &ret_none);
        }

        let extracted = self.emitter.emit_try_extract_value(&tmp);
        if is_statement && !self.analysis.has_arc_data(payload_ty) {
            return Ok(format!("(void)({extracted})"));
        }
        Ok(extracted)
    }

    // ------------------------------------------------------------------
    // Symbol lookup helpers
    // ------------------------------------------------------------------

    fn lookup_symbol(&self, name: &str, module_path: Option<&[String]>) -> Option<SymbolId> {
        resolve_symbol(
            &self.analysis.module_envs,
            &self.current_module,
            name,
            module_path,
        )
        .symbol
    }

    fn is_extern_function(&self, sym_id: SymbolId) -> bool {
        let symbol = self.analysis.symbols.get(sym_id);
        if symbol.kind != SymbolKind::Func {
            return false;
        }
        let Some(cu) = &self.analysis.cu else {
            return false;
        };
        match cu
            .get(&symbol.module)
            .and_then(|module| module.decls.get(symbol.decl_index))
        {
            Some(TopDecl::Func(func)) => func.is_extern,
            _ => false,
        }
    }
}

/// Fresh ARC rvalues need a scope-owned temporary, except string literals,
/// which are static constants.
fn needs_arc_temp(expr: &Expr) -> bool {
    !matches!(expr.kind, ExprKind::Str(_))
}

/// Whether an expression may have side effects or contains calls, in
/// which case lvalue sub-expressions must be cached in a temporary.
fn has_side_effects(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_)
        | ExprKind::Byte(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Null
        | ExprKind::Var(_)
        | ExprKind::TypeArg(_) => false,
        ExprKind::Call { .. } | ExprKind::New { .. } => true,
        ExprKind::Unary { operand, .. } => has_side_effects(operand),
        ExprKind::Binary { left, right, .. } => has_side_effects(left) || has_side_effects(right),
        ExprKind::Cast { operand, .. } => has_side_effects(operand),
        ExprKind::Paren(inner) => has_side_effects(inner),
        ExprKind::Field { object, .. } => has_side_effects(object),
        ExprKind::Index { target, index } => has_side_effects(target) || has_side_effects(index),
        ExprKind::Try(inner) => has_side_effects(inner),
    }
}
