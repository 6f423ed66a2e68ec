use std::collections::HashMap;
use std::path::PathBuf;

use crate::analysis::{AnalysisResult, EnumInfo, StructInfo, VarRefResolution};
use crate::ast::{
    AssignStmt, BinaryOp, Block, CaseStmt, DropStmt, Expr, ExprKind, FuncDecl, LetStmt, MatchStmt,
    NodeId, Pattern, ReturnStmt, SourceSpan, Stmt, TopDecl, TypeRef, UnaryOp, VarRef, WithStmt,
};
use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
use crate::escape;
use crate::loader::CompilationUnit;
use crate::locals::FunctionEnv;
use crate::resolve::{resolve_symbol, resolve_type_ref, ResolveErrorKind, TypeResolveErrorKind};
use crate::symbols::{ModuleEnv, SymbolKind, SymbolTable};
use crate::types::{FuncType, Type};

/// Expression and statement type checking.
///
/// Records a type for every expression by `NodeId`, resolves variable
/// references to their binding site, enforces control-flow return rules,
/// match exhaustiveness, flow-sensitive drop tracking, and the nullable
/// and cast rules. Diagnostics accumulate; checking continues after
/// local failures for better coverage.
pub struct TypeChecker<'a> {
    cu: &'a CompilationUnit,
    module_envs: &'a HashMap<String, ModuleEnv>,
    symbols: &'a SymbolTable,
    func_types: &'a HashMap<(String, String), FuncType>,
    struct_infos: &'a HashMap<(String, String), StructInfo>,
    enum_infos: &'a HashMap<(String, String), EnumInfo>,

    pub expr_types: HashMap<NodeId, Type>,
    pub var_ref_resolution: HashMap<NodeId, VarRefResolution>,
    pub intrinsic_targets: HashMap<NodeId, Type>,
    pub diagnostics: Diagnostics,

    current_module: String,
    current_file: Option<PathBuf>,
    current_func: Option<FuncType>,
    local_scopes: Vec<HashMap<String, Type>>,
    alive_scopes: Vec<HashMap<String, bool>>,
    return_paths: bool,
    loop_depth: usize,
    next_stmt_unreachable: bool,
}

impl<'a> TypeChecker<'a> {
    pub fn new(analysis: &'a AnalysisResult) -> Option<Self> {
        let cu = analysis.cu.as_ref()?;
        Some(Self {
            cu,
            module_envs: &analysis.module_envs,
            symbols: &analysis.symbols,
            func_types: &analysis.func_types,
            struct_infos: &analysis.struct_infos,
            enum_infos: &analysis.enum_infos,
            expr_types: HashMap::new(),
            var_ref_resolution: HashMap::new(),
            intrinsic_targets: HashMap::new(),
            diagnostics: Diagnostics::new(),
            current_module: String::new(),
            current_file: None,
            current_func: None,
            local_scopes: Vec::new(),
            alive_scopes: Vec::new(),
            return_paths: false,
            loop_depth: 0,
            next_stmt_unreachable: false,
        })
    }

    pub fn check(&mut self, functions: &[FunctionEnv]) {
        for env in functions {
            let key = (env.module_name.clone(), env.func_name.clone());
            let Some(func_type) = self.func_types.get(&key).cloned() else {
                self.diagnostic(
                    Severity::Error,
                    None,
                    "TYP-0002",
                    format!(
                        "missing function type for '{}::{}'; skipping type check",
                        env.module_name, env.func_name
                    ),
                );
                continue;
            };
            let Some(TopDecl::Func(func)) = self
                .cu
                .get(&env.module_name)
                .and_then(|module| module.decls.get(env.decl_index))
            else {
                continue;
            };
            if func.is_extern {
                continue;
            }
            self.current_module = env.module_name.clone();
            self.current_file = self
                .cu
                .get(&env.module_name)
                .and_then(|module| module.file.clone());
            self.check_function(func, &func_type);
        }
    }

    // ------------------------------------------------------------------
    // Function / block / statement traversal
    // ------------------------------------------------------------------

    fn check_function(&mut self, func: &FuncDecl, func_type: &FuncType) {
        self.current_func = Some(func_type.clone());

        let mut param_scope = HashMap::new();
        let mut param_alive = HashMap::new();
        for (param, ty) in func.params.iter().zip(&func_type.params) {
            param_scope.insert(param.name.clone(), ty.clone());
            param_alive.insert(param.name.clone(), true);
        }
        self.local_scopes = vec![param_scope];
        self.alive_scopes = vec![param_alive];
        self.return_paths = false;
        self.loop_depth = 0;
        self.next_stmt_unreachable = false;

        self.check_block(&func.body, true, false);
        let guarantees_return = self.return_paths;

        if !func_type.result.is_void() && !guarantees_return {
            self.error(
                Some(func.span),
                "TYP-0010",
                format!(
                    "not all control paths return a value of type '{}'",
                    func_type.result
                ),
            );
        }

        self.local_scopes.clear();
        self.alive_scopes.clear();
        self.current_func = None;
    }

    fn check_block(&mut self, block: &Block, check_return_paths: bool, push_new_scope: bool) {
        if push_new_scope {
            self.push_scope();
        }

        let mut unreachable_warning_issued = false;
        let mut guarantees_return = false;
        let mut keep_checking_returns = check_return_paths;

        for stmt in &block.stmts {
            if guarantees_return && !unreachable_warning_issued {
                self.warn(Some(stmt.span()), "TYP-0031", "unreachable code after 'return'");
                unreachable_warning_issued = true;
            }
            if self.next_stmt_unreachable && !unreachable_warning_issued {
                self.warn(Some(stmt.span()), "TYP-0030", "unreachable code");
                unreachable_warning_issued = true;
            }
            self.check_stmt(stmt, keep_checking_returns);
            if check_return_paths {
                guarantees_return = guarantees_return || self.return_paths;
                if guarantees_return {
                    keep_checking_returns = false;
                }
            }
        }

        if check_return_paths {
            self.return_paths = guarantees_return;
        }

        self.next_stmt_unreachable = false;
        if push_new_scope {
            self.pop_scope();
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, check_return_paths: bool) {
        if check_return_paths {
            self.return_paths = false;
        }

        match stmt {
            Stmt::Return(stmt) => {
                self.check_return(stmt);
                if check_return_paths {
                    self.return_paths = true;
                }
            }
            Stmt::Expr(stmt) => {
                self.infer_expr(&stmt.expr, None, "expression");
            }
            Stmt::Let(stmt) => self.check_let(stmt),
            Stmt::Assign(stmt) => self.check_assign(stmt),
            Stmt::Drop(stmt) => self.check_drop(stmt),
            Stmt::If(stmt) => {
                let cond_ty = self.infer_expr(&stmt.cond, None, "condition in if statement");
                if let Some(ty) = cond_ty {
                    if !ty.is_bool() {
                        self.error(Some(stmt.span), "TYP-0070", "if condition must have type 'bool'");
                    }
                }

                let pre_alive = self.alive_scopes.clone();
                self.check_stmt(&stmt.then_branch, check_return_paths);
                let then_alive = self.alive_scopes.clone();
                let then_returns = self.return_paths;

                let mut else_returns = false;
                if let Some(else_branch) = &stmt.else_branch {
                    self.alive_scopes = pre_alive;
                    self.check_stmt(else_branch, check_return_paths);
                    else_returns = self.return_paths;
                    let else_alive = self.alive_scopes.clone();

                    // A variable stays usable only when both branches kept it.
                    for (scope_index, scope) in self.alive_scopes.iter_mut().enumerate() {
                        for (name, alive) in scope.iter_mut() {
                            let then_var = then_alive
                                .get(scope_index)
                                .and_then(|s| s.get(name))
                                .copied()
                                .unwrap_or(true);
                            let else_var = else_alive
                                .get(scope_index)
                                .and_then(|s| s.get(name))
                                .copied()
                                .unwrap_or(true);
                            *alive = then_var && else_var;
                        }
                    }
                } else {
                    self.alive_scopes = then_alive;
                }

                if check_return_paths {
                    self.return_paths = then_returns && else_returns;
                }
            }
            Stmt::While(stmt) => {
                let cond_ty = self.infer_expr(&stmt.cond, None, "condition in while loop");
                if let Some(ty) = cond_ty {
                    if !ty.is_bool() {
                        self.error(
                            Some(stmt.span),
                            "TYP-0080",
                            "while condition must have type 'bool'",
                        );
                    }
                }
                self.loop_depth += 1;
                self.check_block(&stmt.body, check_return_paths, true);
                self.loop_depth -= 1;
                // The loop body may never run, so a while never guarantees
                // a return on its own.
                if check_return_paths {
                    self.return_paths = false;
                }
            }
            Stmt::For(stmt) => {
                self.push_scope();
                if let Some(init) = &stmt.init {
                    self.check_stmt(init, false);
                }
                if let Some(cond) = &stmt.cond {
                    let cond_ty = self.infer_expr(cond, None, "condition in for loop");
                    if let Some(ty) = cond_ty {
                        if !ty.is_bool() {
                            self.error(
                                Some(stmt.span),
                                "TYP-0090",
                                "for loop condition must have type 'bool'",
                            );
                        }
                    }
                }
                if let Some(step) = &stmt.step {
                    self.check_stmt(step, false);
                }
                self.loop_depth += 1;
                self.check_block(&stmt.body, check_return_paths, true);
                self.loop_depth -= 1;
                self.pop_scope();
                if check_return_paths {
                    self.return_paths = false;
                }
            }
            Stmt::Match(stmt) => self.check_match(stmt, check_return_paths),
            Stmt::Case(stmt) => self.check_case(stmt, check_return_paths),
            Stmt::With(stmt) => self.check_with(stmt, check_return_paths),
            Stmt::Block(block) => self.check_block(block, check_return_paths, true),
            Stmt::Break(span) => {
                if self.loop_depth < 1 {
                    self.error(Some(*span), "TYP-0110", "'break' statement not within a loop");
                }
                self.next_stmt_unreachable = true;
            }
            Stmt::Continue(span) => {
                if self.loop_depth < 1 {
                    self.error(Some(*span), "TYP-0120", "'continue' statement not within a loop");
                }
                self.next_stmt_unreachable = true;
            }
        }
    }

    fn check_let(&mut self, stmt: &LetStmt) {
        if let Some(tref) = &stmt.type_ref {
            let Some(annot_ty) = self.resolve_type_ref_checked(tref) else {
                self.error(
                    Some(tref.span),
                    "TYP-0040",
                    format!("cannot resolve type annotation for variable '{}'", stmt.name),
                );
                return;
            };
            if annot_ty.is_void() {
                self.error(Some(stmt.span), "TYP-0050", "variable cannot have type 'void'");
                return;
            }
            let context = format!("initializer for variable '{}'", stmt.name);
            let value_ty = self.infer_expr(&stmt.value, Some(&annot_ty), &context);
            if value_ty.is_none() {
                return;
            }
            self.declare_local(&stmt.name, annot_ty, stmt.span);
            return;
        }

        let context = format!("initializer for variable '{}'", stmt.name);
        let value_ty = self.infer_expr(&stmt.value, None, &context);
        match value_ty {
            None => {
                self.error(
                    Some(stmt.span),
                    "TYP-0051",
                    format!("initializer for '{}' type mismatch", stmt.name),
                );
            }
            Some(Type::Null) => {
                self.error(
                    Some(stmt.span),
                    "TYP-0052",
                    "cannot infer type from 'null'; explicit type required",
                );
            }
            Some(ty) if ty.is_void() => {
                self.error(
                    Some(stmt.value.span),
                    "TYP-0053",
                    "initializer is 'void', cannot assign to variable",
                );
            }
            Some(ty) => {
                self.declare_local(&stmt.name, ty, stmt.span);
            }
        }
    }

    fn check_assign(&mut self, stmt: &AssignStmt) {
        if !is_place_expr(&stmt.target) {
            self.error(
                Some(stmt.target.span),
                "TYP-0141",
                "assignment target is not a place expression",
            );
        }

        // Flow-sensitive: assignment re-validates a dropped variable.
        if let ExprKind::Var(var) = &stmt.target.kind {
            self.set_alive(&var.name, true);
        }

        let target_ty = self.infer_expr(&stmt.target, None, "assignment target");
        if let Some(target_ty) = target_ty {
            let context = format!("assignment to {}", describe_lvalue(&stmt.target));
            self.infer_expr(&stmt.value, Some(&target_ty), &context);
        } else {
            self.infer_expr(&stmt.value, None, "assignment value");
        }
    }

    fn check_drop(&mut self, stmt: &DropStmt) {
        let Some(var_ty) = self.lookup_local(&stmt.name) else {
            self.error(
                Some(stmt.span),
                "TYP-0060",
                format!("unknown variable '{}'", stmt.name),
            );
            return;
        };

        let is_ptr = matches!(var_ty, Type::Pointer(_));
        let is_opt_ptr = var_ty.is_niche_nullable();
        if !(is_ptr || is_opt_ptr) {
            self.error(
                Some(stmt.span),
                "TYP-0061",
                format!("cannot drop non-pointer type '{var_ty}'"),
            );
            return;
        }

        if self.lookup_alive(&stmt.name) == Some(false) {
            self.error(
                Some(stmt.span),
                "TYP-0062",
                format!("use of dropped variable '{}'", stmt.name),
            );
            return;
        }

        self.set_alive(&stmt.name, false);
    }

    fn check_return(&mut self, stmt: &ReturnStmt) {
        let Some(func) = self.current_func.clone() else {
            self.error(Some(stmt.span), "TYP-0260", "return statement outside of function");
            return;
        };

        match &stmt.value {
            None => {
                if !func.result.is_void() {
                    self.error(
                        Some(stmt.span),
                        "TYP-0261",
                        format!(
                            "return without a value in a function returning '{}'",
                            func.result
                        ),
                    );
                }
            }
            Some(value) => {
                self.infer_expr(value, Some(&func.result), "return value");
            }
        }
    }

    fn check_match(&mut self, stmt: &MatchStmt, check_return_paths: bool) {
        let scrutinee_ty = self.infer_expr(&stmt.scrutinee, None, "match scrutinee");

        // One implicit dereference: `match` accepts Enum and Enum*.
        let enum_ty = match &scrutinee_ty {
            Some(ty @ Type::Enum { .. }) => Some(ty.clone()),
            Some(Type::Pointer(inner)) if matches!(**inner, Type::Enum { .. }) => {
                Some((**inner).clone())
            }
            _ => None,
        };

        let Some(Type::Enum { module, name }) = enum_ty else {
            let shown = scrutinee_ty
                .map(|ty| ty.to_string())
                .unwrap_or_else(|| "<none>".to_string());
            self.error(
                Some(stmt.span),
                "MTC-0100",
                format!("match expression must have enum type, got '{shown}'"),
            );
            return;
        };

        let enum_info = self.enum_infos.get(&(module.clone(), name.clone())).cloned();
        let enum_ty = Type::Enum {
            module: module.clone(),
            name: name.clone(),
        };

        let mut all_arms_return = !stmt.arms.is_empty();

        for arm in &stmt.arms {
            self.push_scope();

            if let Pattern::Variant(pattern) = &arm.pattern {
                let mut invalid_variant = self.reject_name_qualifier(
                    pattern.span,
                    &pattern.name,
                    pattern.name_qualifier.as_deref(),
                    pattern.module_path.as_deref(),
                );

                if !invalid_variant {
                    if let Some(path) = &pattern.module_path {
                        let result = resolve_symbol(
                            self.module_envs,
                            &self.current_module,
                            &pattern.name,
                            Some(path),
                        );
                        let qualified = format!("{}::{}", path.join("."), pattern.name);
                        let bad = match result.symbol {
                            None => true,
                            Some(id) => {
                                let symbol = self.symbols.get(id);
                                symbol.kind != SymbolKind::EnumVariant || symbol.module != module
                            }
                        };
                        if bad {
                            self.error(
                                Some(pattern.span),
                                "MTC-0102",
                                format!("unknown variant '{qualified}' for enum '{enum_ty}'"),
                            );
                            invalid_variant = true;
                        }
                    }
                }

                if let Some(info) = &enum_info {
                    if !invalid_variant {
                        match info.variant(&pattern.name) {
                            Some(variant) => {
                                if pattern.vars.len() == variant.field_types.len() {
                                    for (var, field_ty) in
                                        pattern.vars.iter().zip(&variant.field_types)
                                    {
                                        self.declare_local(var, field_ty.clone(), pattern.span);
                                    }
                                } else {
                                    self.error(
                                        Some(pattern.span),
                                        "MTC-0101",
                                        format!(
                                            "pattern variable count mismatch: variant '{}' has {} \
                                             fields but pattern has {} variables",
                                            pattern.name,
                                            variant.field_types.len(),
                                            pattern.vars.len()
                                        ),
                                    );
                                }
                            }
                            None => {
                                self.error(
                                    Some(pattern.span),
                                    "MTC-0102",
                                    format!(
                                        "unknown variant '{}' for enum '{enum_ty}'",
                                        pattern.name
                                    ),
                                );
                            }
                        }
                    }
                }
            }

            self.check_block(&arm.body, check_return_paths, false);
            let arm_returns = self.return_paths;
            all_arms_return = all_arms_return && arm_returns;

            self.pop_scope();
        }

        let Some(enum_info) = enum_info else {
            self.error(
                Some(stmt.span),
                "MTC-0103",
                format!("no type information for enum '{enum_ty}'"),
            );
            return;
        };

        let arm_variants: Vec<&str> = stmt
            .arms
            .iter()
            .filter_map(|arm| match &arm.pattern {
                Pattern::Variant(pattern) => Some(pattern.name.as_str()),
                Pattern::Wildcard { .. } => None,
            })
            .collect();
        let wildcard_present = stmt
            .arms
            .iter()
            .any(|arm| matches!(arm.pattern, Pattern::Wildcard { .. }));

        let mut is_exhaustive = wildcard_present;
        if !wildcard_present {
            let missing: Vec<&str> = enum_info
                .variants
                .iter()
                .map(|variant| variant.name.as_str())
                .filter(|name| !arm_variants.contains(name))
                .collect();
            if missing.is_empty() {
                is_exhaustive = true;
            } else {
                self.error(
                    Some(stmt.span),
                    "MTC-0104",
                    format!(
                        "non-exhaustive match: missing variants ({}) for enum '{enum_ty}'",
                        missing.join(", ")
                    ),
                );
            }
        } else if arm_variants.len() == enum_info.variants.len() {
            self.warn(
                Some(stmt.span),
                "MTC-0105",
                format!(
                    "unreachable wildcard pattern in match: all variants of enum '{enum_ty}' \
                     are already covered"
                ),
            );
        }

        if check_return_paths {
            self.return_paths = is_exhaustive && all_arms_return;
        }
    }

    fn check_case(&mut self, stmt: &CaseStmt, check_return_paths: bool) {
        let scrutinee_ty = self.infer_expr(&stmt.scrutinee, None, "case scrutinee");
        let scrutinee_ty = match scrutinee_ty {
            Some(ty) => {
                if !matches!(ty, Type::Int | Type::Byte | Type::Bool | Type::String) {
                    self.error(
                        Some(stmt.span),
                        "TYP-0131",
                        format!("'case' scrutinee must be int, byte, bool, or string, got '{ty}'"),
                    );
                    return;
                }
                ty
            }
            None => return,
        };

        let mut all_arms_return = true;
        let mut seen: Vec<CaseKey> = Vec::new();

        for arm in &stmt.arms {
            let literal_ty = self.infer_expr(&arm.literal, None, "case literal");
            if let Some(literal_ty) = literal_ty {
                let compatible = match (&scrutinee_ty, &literal_ty) {
                    (Type::Int, Type::Int | Type::Byte)
                    | (Type::Byte, Type::Int | Type::Byte)
                    | (Type::Bool, Type::Bool)
                    | (Type::String, Type::String) => true,
                    _ => false,
                };
                if !compatible {
                    self.error(
                        Some(arm.span),
                        "TYP-0132",
                        format!(
                            "'case' arm literal type '{literal_ty}' does not match scrutinee \
                             type '{scrutinee_ty}'"
                        ),
                    );
                }
            }

            if let Some(key) = case_key(&arm.literal) {
                if seen.contains(&key) {
                    self.error(
                        Some(arm.span),
                        "TYP-0133",
                        "duplicate literal arm in 'case' statement",
                    );
                } else {
                    seen.push(key);
                }
            }

            self.check_stmt(&arm.body, check_return_paths);
            all_arms_return = all_arms_return && self.return_paths;
            self.next_stmt_unreachable = false;
        }

        let mut else_returns = false;
        if let Some(else_arm) = &stmt.else_arm {
            self.check_stmt(&else_arm.body, check_return_paths);
            else_returns = self.return_paths;
            self.next_stmt_unreachable = false;
        }

        if check_return_paths {
            // Without an else, some value may not match any arm.
            self.return_paths = stmt.else_arm.is_some() && all_arms_return && else_returns;
        }
    }

    fn check_with(&mut self, stmt: &WithStmt, check_return_paths: bool) {
        self.push_scope();

        for item in &stmt.items {
            self.check_stmt(&item.init, false);
        }
        for item in &stmt.items {
            if let Some(cleanup) = &item.cleanup {
                self.check_stmt(cleanup, false);
            }
        }

        self.check_block(&stmt.body, check_return_paths, true);
        let body_returns = self.return_paths;

        if let Some(cleanup) = &stmt.cleanup {
            self.check_block(cleanup, false, true);
        }

        self.pop_scope();

        if check_return_paths {
            self.return_paths = body_returns;
        }
    }

    // ------------------------------------------------------------------
    // Expression typing
    // ------------------------------------------------------------------

    fn infer_expr(
        &mut self,
        expr: &Expr,
        widening_type: Option<&Type>,
        context_descriptor: &str,
    ) -> Option<Type> {
        if let Some(existing) = self.expr_types.get(&expr.id) {
            return Some(existing.clone());
        }

        let result = match &expr.kind {
            ExprKind::Int(_) => Some(Type::Int),
            ExprKind::Byte(_) => Some(Type::Byte),
            ExprKind::Str(_) => Some(Type::String),
            ExprKind::Bool(_) => Some(Type::Bool),
            ExprKind::Null => Some(Type::Null),
            ExprKind::Var(var) => self.infer_var_ref(expr, var),
            ExprKind::Unary { op, operand } => self.infer_unary(expr, *op, operand),
            ExprKind::Binary { op, left, right } => self.infer_binary(expr, *op, left, right),
            ExprKind::Call { callee, args } => self.infer_call(expr, callee, args),
            ExprKind::Index { target, index } => self.infer_index(expr, target, index),
            ExprKind::Field { object, field } => self.infer_field_access(expr, object, field),
            ExprKind::Paren(inner) => self.infer_expr(inner, None, context_descriptor),
            ExprKind::Cast { operand, target } => self.infer_cast(expr, operand, target),
            ExprKind::New { .. } => self.infer_new(expr),
            ExprKind::Try(inner) => self.infer_try(expr, inner),
            ExprKind::TypeArg(_) => {
                self.error(
                    Some(expr.span),
                    "TYP-0290",
                    "type expression is only valid as argument to type-accepting intrinsics \
                     such as 'sizeof'",
                );
                None
            }
        };

        if let Some(ty) = &result {
            self.expr_types.insert(expr.id, ty.clone());
        }

        if let (Some(ty), Some(expected)) = (&result, widening_type) {
            if !self.can_assign(expected, ty, false) {
                self.error(
                    Some(expr.span),
                    "TYP-0100",
                    format!("{context_descriptor} type mismatch: expected '{expected}', got '{ty}'"),
                );
                return None;
            }
        }

        result
    }

    fn infer_var_ref(&mut self, expr: &Expr, var: &VarRef) -> Option<Type> {
        if self.reject_name_qualifier(
            expr.span,
            &var.name,
            var.name_qualifier.as_deref(),
            var.module_path.as_deref(),
        ) {
            return None;
        }

        if var.module_path.is_none() {
            if let Some(local_ty) = self.lookup_local(&var.name) {
                self.var_ref_resolution
                    .insert(expr.id, VarRefResolution::Local);
                if self.lookup_alive(&var.name) == Some(false) {
                    self.error(
                        Some(expr.span),
                        "TYP-0150",
                        format!("use of dropped variable '{}'", var.name),
                    );
                }
                return Some(local_ty);
            }
        }

        let result = resolve_symbol(
            self.module_envs,
            &self.current_module,
            &var.name,
            var.module_path.as_deref(),
        );
        let Some(sym_id) = result.symbol else {
            let qualified = var.qualified_name();
            match result.error {
                Some(ResolveErrorKind::UnknownModule) => self.error(
                    Some(expr.span),
                    "TYP-0153",
                    format!(
                        "unknown identifier '{qualified}' (unknown module '{}')",
                        result.module_name
                    ),
                ),
                Some(ResolveErrorKind::ModuleNotImported) => self.error(
                    Some(expr.span),
                    "TYP-0154",
                    format!(
                        "unknown identifier '{qualified}' (module '{}' not imported)",
                        result.module_name
                    ),
                ),
                Some(ResolveErrorKind::AmbiguousSymbol) => {
                    let modules = result.ambiguous_modules.join("', '");
                    let hints = result
                        .ambiguous_modules
                        .iter()
                        .map(|m| format!("'{m}::{}'", var.name))
                        .collect::<Vec<_>>()
                        .join(" or ");
                    self.error(
                        Some(expr.span),
                        "TYP-0155",
                        format!(
                            "ambiguous identifier '{}' (imported from modules '{modules}'); \
                             use {hints} to disambiguate",
                            var.name
                        ),
                    );
                }
                _ => self.error(
                    Some(expr.span),
                    "TYP-0159",
                    format!("unknown identifier '{qualified}'"),
                ),
            }
            return None;
        };

        let symbol = self.symbols.get(sym_id);
        match symbol.kind {
            SymbolKind::Func | SymbolKind::Let => {
                let ty = symbol.ty.clone()?;
                self.var_ref_resolution
                    .insert(expr.id, VarRefResolution::Module);
                Some(ty)
            }
            SymbolKind::EnumVariant => {
                self.var_ref_resolution
                    .insert(expr.id, VarRefResolution::Module);
                // Zero-arg variants may appear bare (`Red` for `Red()`).
                if let Some(Type::Func { params, result }) = &symbol.ty {
                    if params.is_empty() {
                        if let Type::Enum { .. } = **result {
                            return Some((**result).clone());
                        }
                    }
                    self.error(
                        Some(expr.span),
                        "TYP-0152",
                        format!(
                            "variant '{}' requires arguments; use '{}(...)' constructor syntax",
                            var.name, var.name
                        ),
                    );
                }
                None
            }
            _ => {
                self.error(
                    Some(expr.span),
                    "TYP-0151",
                    format!("symbol '{}' is not a value", var.name),
                );
                None
            }
        }
    }

    fn infer_unary(&mut self, expr: &Expr, op: UnaryOp, operand: &Expr) -> Option<Type> {
        let operand_ty = self.infer_expr(operand, None, "operand");

        match op {
            UnaryOp::Neg => match operand_ty {
                Some(ty) if ty.is_int_assignable() => Some(ty),
                Some(ty) => {
                    self.error(
                        Some(expr.span),
                        "TYP-0160",
                        format!("unary '-' expects operand of type 'int', got '{ty}'"),
                    );
                    None
                }
                None => None,
            },
            UnaryOp::Not => match operand_ty {
                Some(ty) if ty.is_bool() => Some(Type::Bool),
                Some(ty) => {
                    self.error(
                        Some(expr.span),
                        "TYP-0161",
                        format!("unary '!' expects operand of type 'bool', got '{ty}'"),
                    );
                    None
                }
                None => None,
            },
            UnaryOp::Deref => match operand_ty {
                Some(Type::Pointer(inner)) => Some(*inner),
                Some(ty) => {
                    self.error(
                        Some(expr.span),
                        "TYP-0162",
                        format!(
                            "cannot dereference expression of type '{ty}'; expected a \
                             non-nullable pointer type"
                        ),
                    );
                    None
                }
                None => None,
            },
        }
    }

    fn infer_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Option<Type> {
        let left_ty = self.infer_expr(left, None, "operand");
        let right_ty = self.infer_expr(right, None, "operand");

        if op.is_arithmetic() {
            return self.binary_expect_both_int(expr, op, &left_ty, &right_ty, Type::Int);
        }
        if op.is_comparison() {
            return self.binary_expect_both_int(expr, op, &left_ty, &right_ty, Type::Bool);
        }
        if op.is_equality() {
            return self.binary_equality(expr, op, &left_ty, &right_ty);
        }
        if op.is_logical() {
            let (Some(lt), Some(rt)) = (&left_ty, &right_ty) else {
                return None;
            };
            if lt.is_bool() && rt.is_bool() {
                return Some(Type::Bool);
            }
            self.error(
                Some(expr.span),
                "TYP-0171",
                format!(
                    "operator '{}' expects operands of type 'bool', got '{lt}' and '{rt}'",
                    op.symbol()
                ),
            );
            return None;
        }
        None
    }

    fn binary_expect_both_int(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        left: &Option<Type>,
        right: &Option<Type>,
        result: Type,
    ) -> Option<Type> {
        match (left, right) {
            (Some(lt), Some(rt)) if lt.is_int_assignable() && rt.is_int_assignable() => {
                Some(result)
            }
            (Some(lt), Some(rt)) => {
                self.error(
                    Some(expr.span),
                    "TYP-0170",
                    format!(
                        "operator '{}' expects operands of type 'int', got '{lt}' and '{rt}'",
                        op.symbol()
                    ),
                );
                None
            }
            _ => None,
        }
    }

    fn binary_equality(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        left: &Option<Type>,
        right: &Option<Type>,
    ) -> Option<Type> {
        let (Some(lt), Some(rt)) = (left, right) else {
            return None;
        };

        let is_null_check = (matches!(lt, Type::Null) && rt.is_nullable_or_pointer())
            || (matches!(rt, Type::Null) && lt.is_nullable_or_pointer());

        if !is_null_check && !(self.can_assign(lt, rt, false) || self.can_assign(rt, lt, false)) {
            self.error(
                Some(expr.span),
                "TYP-0172",
                format!(
                    "equality operator '{}' requires both operands to have the same type \
                     (or be a valid null check), got '{lt}' and '{rt}'",
                    op.symbol()
                ),
            );
            return None;
        }

        if !is_null_check && !(lt.is_int_assignable() || lt.is_bool()) {
            self.error(
                Some(expr.span),
                "TYP-0173",
                format!("equality not supported for type '{lt}' in this stage"),
            );
            return None;
        }

        Some(Type::Bool)
    }

    fn infer_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Option<Type> {
        let ExprKind::Var(var) = &callee.kind else {
            self.error(Some(expr.span), "TYP-0180", "callee must be a function name");
            for arg in args {
                self.infer_expr(arg, None, "argument");
            }
            return None;
        };

        // Intrinsics resolve before user symbols.
        if var.module_path.is_none() {
            if var.name == "sizeof" {
                return Some(self.infer_sizeof(expr, args));
            }
            if var.name == "ord" {
                return Some(self.infer_ord(expr, args));
            }
        }

        if self.reject_name_qualifier(
            expr.span,
            &var.name,
            var.name_qualifier.as_deref(),
            var.module_path.as_deref(),
        ) {
            return None;
        }

        let result = resolve_symbol(
            self.module_envs,
            &self.current_module,
            &var.name,
            var.module_path.as_deref(),
        );
        let Some(sym_id) = result.symbol else {
            let qualified = var.qualified_name();
            let message = match result.error {
                Some(ResolveErrorKind::UnknownModule) => format!(
                    "unknown identifier '{qualified}' (unknown module '{}')",
                    result.module_name
                ),
                Some(ResolveErrorKind::ModuleNotImported) => format!(
                    "unknown identifier '{qualified}' (module '{}' not imported)",
                    result.module_name
                ),
                Some(ResolveErrorKind::AmbiguousSymbol) => {
                    let modules = result.ambiguous_modules.join("', '");
                    format!(
                        "ambiguous identifier '{}' (imported from modules '{modules}')",
                        var.name
                    )
                }
                _ => format!("unknown identifier '{qualified}'"),
            };
            self.error(Some(expr.span), "TYP-0189", message);
            return None;
        };

        let symbol = self.symbols.get(sym_id);
        let symbol_kind = symbol.kind;
        let symbol_ty = symbol.ty.clone();

        if symbol_kind == SymbolKind::Struct {
            let struct_ty = Type::Struct {
                module: symbol.module.clone(),
                name: symbol.name.clone(),
            };
            return self.infer_struct_constructor(expr, args, &struct_ty);
        }
        if symbol_kind == SymbolKind::TypeAlias {
            if let Some(ty @ Type::Struct { .. }) = &symbol_ty {
                let struct_ty = ty.clone();
                return self.infer_struct_constructor(expr, args, &struct_ty);
            }
        }

        if symbol_kind == SymbolKind::EnumVariant {
            return self.infer_variant_constructor(expr, args, &var.name, symbol_ty.as_ref());
        }

        if symbol_kind != SymbolKind::Func {
            self.error(
                Some(expr.span),
                "TYP-0181",
                format!("symbol '{}' is not callable", var.name),
            );
            return None;
        }

        let Some(Type::Func { params, result }) = symbol_ty else {
            self.error(Some(expr.span), "TYP-0182", "callee is not a function");
            return None;
        };

        if params.len() != args.len() {
            self.error(
                Some(expr.span),
                "TYP-0183",
                format!(
                    "function call has wrong number of arguments: expected {}, got {}",
                    params.len(),
                    args.len()
                ),
            );
        }

        for (index, arg) in args.iter().enumerate() {
            if let Some(param_ty) = params.get(index) {
                let context = format!("argument {} to function '{}'", index + 1, var.name);
                self.infer_expr(arg, Some(param_ty), &context);
            }
        }

        Some(*result)
    }

    fn infer_struct_constructor(
        &mut self,
        expr: &Expr,
        args: &[Expr],
        struct_ty: &Type,
    ) -> Option<Type> {
        let Type::Struct { module, name } = struct_ty else {
            return None;
        };
        let Some(info) = self.struct_infos.get(&(module.clone(), name.clone())).cloned() else {
            self.error(
                Some(expr.span),
                "TYP-0190",
                format!("no type information for struct '{name}'"),
            );
            return None;
        };

        if info.fields.len() != args.len() {
            self.error(
                Some(expr.span),
                "TYP-0191",
                format!(
                    "struct constructor '{name}' expects {} argument(s), got {}",
                    info.fields.len(),
                    args.len()
                ),
            );
        }

        for (index, arg) in args.iter().enumerate() {
            if let Some(field) = info.fields.get(index) {
                let context = format!(
                    "argument {} to struct constructor '{name}' for field '{}'",
                    index + 1,
                    field.name
                );
                self.infer_expr(arg, Some(&field.ty), &context);
            }
        }

        Some(struct_ty.clone())
    }

    fn infer_variant_constructor(
        &mut self,
        expr: &Expr,
        args: &[Expr],
        variant_name: &str,
        variant_ty: Option<&Type>,
    ) -> Option<Type> {
        let Some(Type::Func { params, result }) = variant_ty else {
            self.error(
                Some(expr.span),
                "TYP-0200",
                format!("variant '{variant_name}' has no type information"),
            );
            return None;
        };

        let Type::Enum { .. } = **result else {
            self.error(
                Some(expr.span),
                "TYP-9209",
                format!("internal error: variant '{variant_name}' does not produce enum type"),
            );
            return None;
        };

        if params.len() != args.len() {
            self.error(
                Some(expr.span),
                "TYP-0201",
                format!(
                    "variant constructor '{variant_name}' expects {} argument(s), got {}",
                    params.len(),
                    args.len()
                ),
            );
        }

        let params = params.clone();
        let result = (**result).clone();
        for (index, arg) in args.iter().enumerate() {
            if let Some(param_ty) = params.get(index) {
                let context = format!("argument {} to variant constructor '{variant_name}'", index + 1);
                self.infer_expr(arg, Some(param_ty), &context);
            }
        }

        Some(result)
    }

    fn infer_sizeof(&mut self, expr: &Expr, args: &[Expr]) -> Type {
        if args.len() != 1 {
            self.error(Some(expr.span), "TYP-0241", "sizeof expects exactly 1 argument");
            return Type::Int;
        }
        let arg = &args[0];

        if let ExprKind::TypeArg(tref) = &arg.kind {
            if let Some(target) = self.resolve_type_ref_checked(tref) {
                if target.is_void() {
                    self.error(Some(expr.span), "TYP-0240", "cannot take sizeof(void)");
                }
                self.intrinsic_targets.insert(expr.id, target);
            }
            return Type::Int;
        }

        if let ExprKind::Var(var) = &arg.kind {
            if let Some(target) = self.try_resolve_type_name(arg, var) {
                if target.is_void() {
                    self.error(Some(expr.span), "TYP-0240", "cannot take sizeof(void)");
                }
                self.intrinsic_targets.insert(expr.id, target);
                return Type::Int;
            }
        }

        if let Some(arg_ty) = self.infer_expr(arg, None, "sizeof argument") {
            if arg_ty.is_void() {
                self.error(Some(expr.span), "TYP-0240", "cannot take sizeof(void)");
            }
            self.intrinsic_targets.insert(expr.id, arg_ty);
        }
        Type::Int
    }

    fn infer_ord(&mut self, expr: &Expr, args: &[Expr]) -> Type {
        if args.len() != 1 {
            self.error(Some(expr.span), "TYP-0242", "ord expects exactly 1 argument");
            return Type::Int;
        }
        if let Some(arg_ty) = self.infer_expr(&args[0], None, "ord argument") {
            if !matches!(arg_ty, Type::Enum { .. }) {
                self.error(
                    Some(expr.span),
                    "TYP-0243",
                    format!("ord expects an enum value, got '{arg_ty}'"),
                );
            }
        }
        Type::Int
    }

    /// Try resolving an identifier as a type name; `None` when it is not
    /// one (the caller falls back to expression typing).
    fn try_resolve_type_name(&mut self, node: &Expr, var: &VarRef) -> Option<Type> {
        if var.module_path.is_none() {
            if let Some(ty) = Type::builtin(&var.name) {
                return Some(ty);
            }
        }
        let result = resolve_symbol(
            self.module_envs,
            &self.current_module,
            &var.name,
            var.module_path.as_deref(),
        );
        let Some(sym_id) = result.symbol else {
            if var.module_path.is_some() {
                let qualified = var.qualified_name();
                match result.error {
                    Some(ResolveErrorKind::UnknownModule) => {
                        self.error(
                            Some(node.span),
                            "TYP-0300",
                            format!(
                                "unknown type '{qualified}' (unknown module '{}')",
                                result.module_name
                            ),
                        );
                    }
                    Some(ResolveErrorKind::ModuleNotImported) => {
                        self.error(
                            Some(node.span),
                            "TYP-0301",
                            format!(
                                "unknown type '{qualified}' (module '{}' not imported)",
                                result.module_name
                            ),
                        );
                    }
                    _ => {}
                }
            }
            return None;
        };

        let symbol = self.symbols.get(sym_id);
        match symbol.kind {
            SymbolKind::Struct => Some(Type::Struct {
                module: symbol.module.clone(),
                name: symbol.name.clone(),
            }),
            SymbolKind::Enum => Some(Type::Enum {
                module: symbol.module.clone(),
                name: symbol.name.clone(),
            }),
            SymbolKind::TypeAlias => symbol.ty.clone(),
            _ => None,
        }
    }

    fn infer_index(&mut self, expr: &Expr, target: &Expr, index: &Expr) -> Option<Type> {
        let target_ty = self.infer_expr(target, None, "indexed expression");
        let index_ty = self.infer_expr(index, None, "index expression");

        if let Some(ty) = index_ty {
            if !ty.is_int_assignable() {
                self.error(
                    Some(expr.span),
                    "TYP-0210",
                    format!("index expression must have type 'int', got '{ty}'"),
                );
            }
        }

        match target_ty {
            Some(Type::Nullable(inner)) => {
                self.error(
                    Some(expr.span),
                    "TYP-0211",
                    format!(
                        "cannot index into nullable type '{}?'; expected a non-null array",
                        inner
                    ),
                );
                None
            }
            Some(ty) => {
                self.error(
                    Some(expr.span),
                    "TYP-0212",
                    format!("cannot index into expression of type '{ty}'; expected an array type"),
                );
                None
            }
            None => None,
        }
    }

    fn infer_field_access(&mut self, expr: &Expr, object: &Expr, field: &str) -> Option<Type> {
        let obj_ty = self.infer_expr(object, None, "field access object")?;

        // `T?` and `T*?` must be narrowed before member access.
        if let Type::Nullable(inner) = &obj_ty {
            let points_at_struct = match &**inner {
                Type::Struct { .. } => true,
                Type::Pointer(pointee) => matches!(**pointee, Type::Struct { .. }),
                _ => false,
            };
            if points_at_struct {
                self.error(
                    Some(expr.span),
                    "TYP-0220",
                    format!(
                        "cannot access field '{field}' on nullable type '{obj_ty}'; narrow it first"
                    ),
                );
                return None;
            }
        }

        // Exactly one implicit pointer hop.
        let obj_ty = match obj_ty {
            Type::Pointer(inner) if matches!(*inner, Type::Struct { .. }) => *inner,
            other => other,
        };

        if let Type::Struct { module, name } = &obj_ty {
            let info = self.struct_infos.get(&(module.clone(), name.clone()))?;
            for field_info in &info.fields {
                if field_info.name == field {
                    return Some(field_info.ty.clone());
                }
            }
            self.error(
                Some(expr.span),
                "TYP-0221",
                format!("struct '{obj_ty}' has no field '{field}'"),
            );
            return None;
        }

        self.error(
            Some(expr.span),
            "TYP-0222",
            format!("cannot access field '{field}' on non-struct type '{obj_ty}'"),
        );
        None
    }

    fn infer_cast(&mut self, expr: &Expr, operand: &Expr, target: &TypeRef) -> Option<Type> {
        let operand_ty = self.infer_expr(operand, None, "cast operand")?;
        let target_ty = self.resolve_type_ref_checked(target)?;

        if self.can_assign(&target_ty, &operand_ty, true) {
            return Some(target_ty);
        }

        self.error(
            Some(expr.span),
            "TYP-0230",
            format!("cannot cast from '{operand_ty}' to '{target_ty}'"),
        );
        None
    }

    fn infer_try(&mut self, expr: &Expr, inner: &Expr) -> Option<Type> {
        let func = self.current_func.clone()?;
        let inner_ty = self.infer_expr(inner, None, "try operand")?;

        let Type::Nullable(payload) = inner_ty else {
            self.error(
                Some(expr.span),
                "TYP-0250",
                format!("cannot apply '?' to non-nullable type '{inner_ty}'"),
            );
            return None;
        };

        if !matches!(func.result, Type::Nullable(_)) {
            self.error(
                Some(expr.span),
                "TYP-0251",
                "cannot use '?' in a function that does not return a nullable type (T?)",
            );
            return None;
        }

        Some(*payload)
    }

    fn infer_new(&mut self, expr: &Expr) -> Option<Type> {
        let ExprKind::New { type_ref, args } = &expr.kind else {
            return None;
        };

        let base_ty = self.resolve_type_ref_quiet(type_ref);

        let Some(base_ty) = base_ty else {
            // Not a type: maybe an enum variant constructor (new CaseA(42)).
            let result = resolve_symbol(
                self.module_envs,
                &self.current_module,
                &type_ref.name,
                type_ref.module_path.as_deref(),
            );
            if let Some(sym_id) = result.symbol {
                let symbol = self.symbols.get(sym_id);
                if symbol.kind == SymbolKind::EnumVariant {
                    let variant_ty = symbol.ty.clone();
                    let enum_ty = self.infer_variant_constructor(
                        expr,
                        args,
                        &type_ref.name,
                        variant_ty.as_ref(),
                    )?;
                    return Some(Type::pointer(enum_ty));
                }
            }
            self.error(Some(expr.span), "TYP-0280", "unknown type in 'new' expression");
            return None;
        };

        if let Type::Enum { .. } = base_ty {
            self.error(
                Some(expr.span),
                "TYP-0281",
                format!("cannot allocate enum type '{base_ty}' without a variant"),
            );
            return None;
        }

        if let Type::Struct { module, name } = &base_ty {
            let Some(info) = self.struct_infos.get(&(module.clone(), name.clone())).cloned()
            else {
                self.error(
                    Some(expr.span),
                    "TYP-0282",
                    format!("missing struct info for {module}::{name}"),
                );
                return None;
            };
            if !args.is_empty() {
                if args.len() != info.fields.len() {
                    self.error(
                        Some(expr.span),
                        "TYP-0283",
                        format!(
                            "struct '{name}' expects {} argument(s), got {}",
                            info.fields.len(),
                            args.len()
                        ),
                    );
                }
                for (field, arg) in info.fields.iter().zip(args) {
                    let context = format!("field '{}' of struct '{name}'", field.name);
                    self.infer_expr(arg, Some(&field.ty), &context);
                }
            }
        } else {
            // Builtins, pointers, nullables: zero or one initializer.
            if args.len() > 1 {
                self.error(
                    Some(expr.span),
                    "TYP-0285",
                    format!("'new {base_ty}' expects at most 1 argument, got {}", args.len()),
                );
            } else if let Some(arg) = args.first() {
                if let Some(arg_ty) = self.infer_expr(arg, None, "new initializer") {
                    if !self.can_assign(&base_ty, &arg_ty, false) {
                        self.error(
                            Some(arg.span),
                            "TYP-0286",
                            format!("cannot initialize '{base_ty}' with value of type '{arg_ty}'"),
                        );
                    }
                }
            }
        }

        Some(Type::pointer(base_ty))
    }

    // ------------------------------------------------------------------
    // Type resolution and compatibility
    // ------------------------------------------------------------------

    fn resolve_type_ref_quiet(&mut self, tref: &TypeRef) -> Option<Type> {
        if tref.name_qualifier.is_some() {
            return None;
        }
        resolve_type_ref(self.module_envs, self.symbols, &self.current_module, tref).ty
    }

    fn resolve_type_ref_checked(&mut self, tref: &TypeRef) -> Option<Type> {
        if self.reject_name_qualifier(
            tref.span,
            &tref.name,
            tref.name_qualifier.as_deref(),
            tref.module_path.as_deref(),
        ) {
            return None;
        }

        let result = resolve_type_ref(self.module_envs, self.symbols, &self.current_module, tref);
        if let Some(ty) = result.ty {
            return Some(ty);
        }

        match result.error {
            Some(TypeResolveErrorKind::InvalidNullableVoid) => {
                self.error(Some(tref.span), "TYP-0278", "type 'void' cannot be nullable");
            }
            Some(TypeResolveErrorKind::VariantAsType) => {}
            Some(TypeResolveErrorKind::AmbiguousType) => {
                let modules = result.ambiguous_modules.join("', '");
                let hints = result
                    .ambiguous_modules
                    .iter()
                    .map(|m| format!("'{m}::{}'", result.name))
                    .collect::<Vec<_>>()
                    .join(" or ");
                self.error(
                    Some(tref.span),
                    "TYP-0279",
                    format!(
                        "ambiguous type '{}' (imported from modules '{modules}'); use {hints} \
                         to disambiguate",
                        result.name
                    ),
                );
            }
            Some(TypeResolveErrorKind::UnresolvedAlias) => {
                self.error(
                    Some(tref.span),
                    "TYP-0270",
                    format!(
                        "type alias '{}' in module '{}' does not have a resolved type",
                        result.name, self.current_module
                    ),
                );
            }
            Some(TypeResolveErrorKind::NotAType) => {
                self.error(
                    Some(tref.span),
                    "TYP-0271",
                    format!(
                        "symbol '{}' in module '{}' is not a type",
                        result.name, self.current_module
                    ),
                );
            }
            _ => {
                self.error(
                    Some(tref.span),
                    "TYP-0279",
                    format!(
                        "unknown type '{}' in module '{}'",
                        result.name, result.module_name
                    ),
                );
            }
        }
        None
    }

    /// Whether `source` can be assigned to `target`. `allow_promotion`
    /// additionally permits the checked conversions reserved for casts
    /// (`int -> byte` narrowing and `T? -> T` unwrapping).
    fn can_assign(&self, target: &Type, source: &Type, allow_promotion: bool) -> bool {
        if target == source {
            return true;
        }

        // null -> T?
        if matches!(source, Type::Null) && matches!(target, Type::Nullable(_)) {
            return true;
        }

        // byte -> int widening.
        if matches!(source, Type::Byte) && matches!(target, Type::Int) {
            return true;
        }

        // int -> byte narrowing only in checked contexts.
        if allow_promotion && matches!(source, Type::Int) && matches!(target, Type::Byte) {
            return true;
        }

        // T -> T? widening.
        if let Type::Nullable(target_inner) = target {
            if self.can_assign(target_inner, source, false) {
                return true;
            }
        }

        // T? -> T demotion only in checked contexts.
        if allow_promotion && !matches!(target, Type::Nullable(_)) {
            if let Type::Nullable(source_inner) = source {
                if self.can_assign(target, source_inner, false) {
                    return true;
                }
            }
        }

        if let (Type::Nullable(target_inner), Type::Nullable(source_inner)) = (target, source) {
            return self.can_assign(target_inner, source_inner, false);
        }

        if let (Type::Pointer(target_inner), Type::Pointer(source_inner)) = (target, source) {
            if target_inner.is_void() || source_inner.is_void() {
                return true;
            }
            return self.can_assign(target_inner, source_inner, false);
        }

        false
    }

    fn reject_name_qualifier(
        &mut self,
        span: SourceSpan,
        name: &str,
        name_qualifier: Option<&[String]>,
        module_path: Option<&[String]>,
    ) -> bool {
        let Some(qualifier) = name_qualifier else {
            return false;
        };
        let mut full = qualifier.join("::");
        full.push_str("::");
        full.push_str(name);
        let mut simple = name.to_string();
        if let Some(path) = module_path {
            full = format!("{}::{full}", path.join("."));
            simple = format!("{}::{name}", path.join("."));
        }
        self.error(
            span.into(),
            "TYP-0158",
            format!(
                "qualified symbol paths ('{full}') are not supported; use '{simple}' to refer \
                 to the symbol directly"
            ),
        );
        true
    }

    // ------------------------------------------------------------------
    // Scope helpers
    // ------------------------------------------------------------------

    fn push_scope(&mut self) {
        self.local_scopes.push(HashMap::new());
        self.alive_scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.local_scopes.pop();
        self.alive_scopes.pop();
    }

    fn declare_local(&mut self, name: &str, ty: Type, span: SourceSpan) {
        if self
            .local_scopes
            .last()
            .map(|scope| scope.contains_key(name))
            .unwrap_or(false)
        {
            // Duplicate in the same scope: reported by the local scope
            // resolver; the first binding stays authoritative here.
            return;
        }

        if self.lookup_local(name).is_some() {
            self.warn(
                Some(span),
                "TYP-0021",
                format!("local variable '{name}' shadows variable from outer scope"),
            );
        }

        let result = resolve_symbol(self.module_envs, &self.current_module, name, None);
        match result.symbol {
            Some(sym_id) => {
                let symbol = self.symbols.get(sym_id);
                match symbol.kind {
                    SymbolKind::EnumVariant => {
                        let (code, origin) = if symbol.module != self.current_module {
                            ("TYP-0023", "imported enum variant")
                        } else {
                            ("TYP-0022", "enum variant")
                        };
                        let message = format!(
                            "local variable '{name}' shadows {origin} '{}::{name}'",
                            symbol.module
                        );
                        self.warn(Some(span), code, message);
                    }
                    SymbolKind::Func
                    | SymbolKind::Struct
                    | SymbolKind::Enum
                    | SymbolKind::TypeAlias => {
                        let message = format!(
                            "local variable '{name}' shadows {} '{}::{name}'",
                            symbol.kind.describe(),
                            symbol.module
                        );
                        self.warn(Some(span), "TYP-0025", message);
                    }
                    SymbolKind::Let => {}
                }
            }
            None => {
                if result.error == Some(ResolveErrorKind::AmbiguousSymbol) {
                    let modules = result.ambiguous_modules.join("', '");
                    self.warn(
                        Some(span),
                        "TYP-0024",
                        format!(
                            "local variable '{name}' shadows ambiguous imported symbol \
                             (from modules '{modules}')"
                        ),
                    );
                }
            }
        }

        if let Some(scope) = self.local_scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
        if let Some(scope) = self.alive_scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn lookup_local(&self, name: &str) -> Option<Type> {
        for scope in self.local_scopes.iter().rev() {
            if let Some(ty) = scope.get(name) {
                return Some(ty.clone());
            }
        }
        None
    }

    fn lookup_alive(&self, name: &str) -> Option<bool> {
        for scope in self.alive_scopes.iter().rev() {
            if let Some(&alive) = scope.get(name) {
                return Some(alive);
            }
        }
        None
    }

    fn set_alive(&mut self, name: &str, alive: bool) {
        for scope in self.alive_scopes.iter_mut().rev() {
            if let Some(entry) = scope.get_mut(name) {
                *entry = alive;
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    fn error(&mut self, span: Option<SourceSpan>, code: &str, message: impl Into<String>) {
        self.diagnostic(Severity::Error, span, code, message.into());
    }

    fn warn(&mut self, span: Option<SourceSpan>, code: &str, message: impl Into<String>) {
        self.diagnostic(Severity::Warning, span, code, message.into());
    }

    fn diagnostic(
        &mut self,
        severity: Severity,
        span: Option<SourceSpan>,
        code: &str,
        message: String,
    ) {
        let mut diagnostic = Diagnostic::new(severity, code, message);
        if !self.current_module.is_empty() {
            diagnostic = diagnostic.with_module(self.current_module.clone());
        }
        if let Some(file) = &self.current_file {
            diagnostic = diagnostic.with_file(file.clone());
        }
        if let Some(span) = span {
            diagnostic = diagnostic.with_span(span);
        }
        self.diagnostics.push(diagnostic);
    }
}

/// A place expression denotes a storage location: a variable, a
/// dereference, an index, or a field access (possibly parenthesized).
pub fn is_place_expr(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Var(_) => true,
        ExprKind::Unary {
            op: UnaryOp::Deref, ..
        } => true,
        ExprKind::Index { .. } => true,
        ExprKind::Field { .. } => true,
        ExprKind::Paren(inner) => is_place_expr(inner),
        _ => false,
    }
}

fn describe_lvalue(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Var(var) => format!("variable '{}'", var.name),
        ExprKind::Field { field, .. } => format!("field '{field}'"),
        ExprKind::Index { .. } => "array element".to_string(),
        ExprKind::Unary {
            op: UnaryOp::Deref, ..
        } => "dereferenced pointer".to_string(),
        _ => "expression".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CaseKey {
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

fn case_key(expr: &Expr) -> Option<CaseKey> {
    match &expr.kind {
        ExprKind::Int(value) => Some(CaseKey::Int(*value as i64)),
        ExprKind::Byte(payload) => Some(CaseKey::Int(escape::decode_byte_token(payload) as i64)),
        ExprKind::Bool(value) => Some(CaseKey::Bool(*value)),
        ExprKind::Str(payload) => Some(CaseKey::Bytes(escape::decode_string_token(payload))),
        _ => None,
    }
}
