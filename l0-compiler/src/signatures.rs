use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::analysis::{EnumInfo, EnumVariantInfo, StructFieldInfo, StructInfo};
use crate::ast::{EnumDecl, Expr, ExprKind, SourceSpan, StructDecl, TopDecl, TypeAliasDecl, TypeRef};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::loader::CompilationUnit;
use crate::resolve::{resolve_symbol, ResolveErrorKind};
use crate::symbols::{ModuleEnv, SymbolId, SymbolKind, SymbolTable};
use crate::types::{FuncType, Type};

/// Resolves top-level signatures: function parameter and return types,
/// struct fields, enum variant payloads, alias targets, and top-level
/// `let` types. Detects alias cycles and value-type dependency cycles.
pub struct SignatureResolver<'a> {
    cu: &'a CompilationUnit,
    module_envs: &'a HashMap<String, ModuleEnv>,
    symbols: &'a mut SymbolTable,
    diagnostics: Diagnostics,

    pub func_types: HashMap<(String, String), FuncType>,
    pub struct_infos: HashMap<(String, String), StructInfo>,
    pub enum_infos: HashMap<(String, String), EnumInfo>,
    pub let_types: HashMap<(String, String), Type>,
}

impl<'a> SignatureResolver<'a> {
    pub fn new(
        cu: &'a CompilationUnit,
        module_envs: &'a HashMap<String, ModuleEnv>,
        symbols: &'a mut SymbolTable,
    ) -> Self {
        Self {
            cu,
            module_envs,
            symbols,
            diagnostics: Diagnostics::new(),
            func_types: HashMap::new(),
            struct_infos: HashMap::new(),
            enum_infos: HashMap::new(),
            let_types: HashMap::new(),
        }
    }

    pub fn resolve(&mut self) {
        for module in self.cu.iter() {
            for decl in &module.decls {
                match decl {
                    TopDecl::Struct(decl) => self.resolve_struct(&module.name, decl),
                    TopDecl::Enum(decl) => self.resolve_enum(&module.name, decl),
                    TopDecl::Func(func) => self.resolve_func(&module.name, func),
                    TopDecl::TypeAlias(decl) => self.resolve_alias_decl(&module.name, decl),
                    TopDecl::Let(decl) => self.resolve_let(&module.name, decl),
                }
            }
        }

        // Value-type cycles would create infinite-size types.
        self.detect_value_type_cycles();
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    fn emit(&mut self, module_name: &str, diagnostic: Diagnostic) {
        let mut diagnostic = diagnostic.with_module(module_name.to_string());
        if let Some(file) = self.cu.get(module_name).and_then(|m| m.file.clone()) {
            diagnostic = diagnostic.with_file(file);
        }
        self.diagnostics.push(diagnostic);
    }

    // --- type resolution core ---

    fn resolve_type_ref(
        &mut self,
        module_name: &str,
        tref: &TypeRef,
        alias_stack: &mut HashSet<(String, String)>,
    ) -> Option<Type> {
        if tref.name_qualifier.is_some() {
            self.emit(
                module_name,
                Diagnostic::error(
                    "SIG-0018",
                    format!(
                        "qualified symbol paths are not supported in type position ('{}')",
                        tref.name
                    ),
                )
                .with_span(tref.span),
            );
            return None;
        }

        let base = if tref.module_path.is_none() {
            Type::builtin(&tref.name)
        } else {
            None
        };

        let base = match base {
            Some(base) => base,
            None => {
                let result = resolve_symbol(
                    self.module_envs,
                    module_name,
                    &tref.name,
                    tref.module_path.as_deref(),
                );
                let Some(sym_id) = result.symbol else {
                    let detail = match result.error {
                        Some(ResolveErrorKind::AmbiguousSymbol) => {
                            format!(
                                " (imported from modules '{}')",
                                result.ambiguous_modules.join("', '")
                            )
                        }
                        _ => String::new(),
                    };
                    self.emit(
                        module_name,
                        Diagnostic::error(
                            "SIG-0019",
                            format!(
                                "unknown type '{}' in module '{}'{detail}",
                                tref.name, result.module_name
                            ),
                        )
                        .with_span(tref.span),
                    );
                    return None;
                };

                let symbol = self.symbols.get(sym_id);
                match symbol.kind {
                    SymbolKind::Struct => Type::Struct {
                        module: symbol.module.clone(),
                        name: symbol.name.clone(),
                    },
                    SymbolKind::Enum => Type::Enum {
                        module: symbol.module.clone(),
                        name: symbol.name.clone(),
                    },
                    SymbolKind::TypeAlias => {
                        self.resolve_alias_symbol(module_name, sym_id, alias_stack)?
                    }
                    kind => {
                        self.emit(
                            module_name,
                            Diagnostic::error(
                                "SIG-0010",
                                format!(
                                    "symbol '{}' in module '{}' is not a type (kind={})",
                                    tref.name,
                                    module_name,
                                    kind.describe()
                                ),
                            )
                            .with_span(tref.span),
                        );
                        return None;
                    }
                }
            }
        };

        let mut ty = base;
        for _ in 0..tref.pointer_depth {
            ty = Type::pointer(ty);
        }
        if tref.nullable {
            if ty.is_void() {
                self.emit(
                    module_name,
                    Diagnostic::error("SIG-0011", "type 'void' cannot be nullable")
                        .with_span(tref.span),
                );
                return None;
            }
            ty = Type::nullable(ty);
        }
        Some(ty)
    }

    /// Resolve a TYPE_ALIAS symbol to its target type, caching the result
    /// on the symbol. `alias_stack` detects cycles.
    fn resolve_alias_symbol(
        &mut self,
        module_name: &str,
        sym_id: SymbolId,
        alias_stack: &mut HashSet<(String, String)>,
    ) -> Option<Type> {
        if let Some(ty) = self.symbols.ty(sym_id) {
            return Some(ty.clone());
        }

        let symbol = self.symbols.get(sym_id);
        let key = (symbol.module.clone(), symbol.name.clone());
        let alias_module = symbol.module.clone();
        let decl_index = symbol.decl_index;

        if alias_stack.contains(&key) {
            self.emit(
                module_name,
                Diagnostic::error(
                    "SIG-0020",
                    format!(
                        "cyclic type alias involving '{}' in module '{}'",
                        key.1, key.0
                    ),
                ),
            );
            return None;
        }

        let alias_decl = self
            .cu
            .get(&alias_module)
            .and_then(|module| module.decls.get(decl_index))
            .cloned();
        let Some(TopDecl::TypeAlias(decl)) = alias_decl else {
            self.emit(
                module_name,
                Diagnostic::error(
                    "SIG-9029",
                    format!(
                        "internal error: type alias symbol '{}' does not reference an alias \
                         declaration",
                        key.1
                    ),
                ),
            );
            return None;
        };

        alias_stack.insert(key.clone());
        let target = self.resolve_type_ref(&alias_module, &decl.target, alias_stack);
        alias_stack.remove(&key);

        if let Some(ty) = &target {
            self.symbols.set_type(sym_id, ty.clone());
        }
        target
    }

    // --- per declaration kind ---

    fn resolve_struct(&mut self, module_name: &str, decl: &StructDecl) {
        let Some(&struct_sym) = self.module_envs[module_name].locals.get(&decl.name) else {
            return;
        };
        let struct_ty = Type::Struct {
            module: module_name.to_string(),
            name: decl.name.clone(),
        };
        self.symbols.set_type(struct_sym, struct_ty.clone());

        let mut fields = Vec::new();
        for field in &decl.fields {
            let Some(ty) = self.resolve_type_ref(module_name, &field.type_ref, &mut HashSet::new())
            else {
                continue;
            };
            fields.push(StructFieldInfo {
                name: field.name.clone(),
                ty,
            });
        }

        self.struct_infos.insert(
            (module_name.to_string(), decl.name.clone()),
            StructInfo {
                struct_type: struct_ty,
                fields,
            },
        );
    }

    fn resolve_enum(&mut self, module_name: &str, decl: &EnumDecl) {
        let Some(&enum_sym) = self.module_envs[module_name].locals.get(&decl.name) else {
            return;
        };
        let enum_ty = Type::Enum {
            module: module_name.to_string(),
            name: decl.name.clone(),
        };
        self.symbols.set_type(enum_sym, enum_ty.clone());

        let mut variants = Vec::new();
        for variant in &decl.variants {
            let mut field_types = Vec::new();
            for field in &variant.fields {
                if let Some(ty) =
                    self.resolve_type_ref(module_name, &field.type_ref, &mut HashSet::new())
                {
                    field_types.push(ty);
                }
            }
            variants.push(EnumVariantInfo {
                name: variant.name.clone(),
                field_types,
            });
        }

        // Variant symbols get a function-shaped type: (payload...) -> Enum.
        for variant in &variants {
            if let Some(&variant_sym) = self.module_envs[module_name].locals.get(&variant.name) {
                if self.symbols.get(variant_sym).kind == SymbolKind::EnumVariant {
                    self.symbols.set_type(
                        variant_sym,
                        Type::Func {
                            params: variant.field_types.clone(),
                            result: Box::new(enum_ty.clone()),
                        },
                    );
                }
            }
        }

        self.enum_infos.insert(
            (module_name.to_string(), decl.name.clone()),
            EnumInfo {
                enum_type: enum_ty,
                variants,
            },
        );
    }

    fn resolve_func(&mut self, module_name: &str, func: &crate::ast::FuncDecl) {
        let Some(&func_sym) = self.module_envs[module_name].locals.get(&func.name) else {
            return;
        };

        let mut params = Vec::new();
        let mut ok = true;
        for param in &func.params {
            match self.resolve_type_ref(module_name, &param.type_ref, &mut HashSet::new()) {
                Some(ty) => params.push(ty),
                None => ok = false,
            }
        }
        let result = match self.resolve_type_ref(module_name, &func.return_type, &mut HashSet::new())
        {
            Some(ty) => ty,
            None => {
                ok = false;
                Type::Void
            }
        };
        if !ok {
            return;
        }

        let func_type = FuncType { params, result };
        self.symbols.set_type(func_sym, func_type.as_type());
        self.func_types
            .insert((module_name.to_string(), func.name.clone()), func_type);
    }

    fn resolve_alias_decl(&mut self, module_name: &str, decl: &TypeAliasDecl) {
        let Some(&alias_sym) = self.module_envs[module_name].locals.get(&decl.name) else {
            return;
        };
        self.resolve_alias_symbol(module_name, alias_sym, &mut HashSet::new());
    }

    fn resolve_let(&mut self, module_name: &str, decl: &crate::ast::LetDecl) {
        let Some(&let_sym) = self.module_envs[module_name].locals.get(&decl.name) else {
            return;
        };

        let let_type = if let Some(tref) = &decl.type_ref {
            match self.resolve_type_ref(module_name, tref, &mut HashSet::new()) {
                Some(ty) => ty,
                None => return,
            }
        } else {
            match self.infer_literal_type(module_name, &decl.value) {
                Some(ty) => ty,
                None => {
                    self.emit(
                        module_name,
                        Diagnostic::error(
                            "SIG-0030",
                            format!(
                                "cannot infer type for let '{}': type annotation required for \
                                 non-literal initializers",
                                decl.name
                            ),
                        )
                        .with_span(decl.span),
                    );
                    return;
                }
            }
        };

        self.symbols.set_type(let_sym, let_type.clone());
        self.let_types
            .insert((module_name.to_string(), decl.name.clone()), let_type);
    }

    /// Infer a top-level let type from literal or constructor initializers.
    fn infer_literal_type(&mut self, module_name: &str, expr: &Expr) -> Option<Type> {
        match &expr.kind {
            ExprKind::Int(_) => Some(Type::Int),
            ExprKind::Bool(_) => Some(Type::Bool),
            ExprKind::Byte(_) => Some(Type::Byte),
            ExprKind::Str(_) => Some(Type::String),
            ExprKind::Null => None,
            ExprKind::Call { callee, .. } => {
                let ExprKind::Var(var) = &callee.kind else {
                    return None;
                };
                let env = self.module_envs.get(module_name)?;
                let &sym_id = env.merged.get(&var.name)?;
                let symbol = self.symbols.get(sym_id);
                match symbol.kind {
                    SymbolKind::Struct => Some(Type::Struct {
                        module: symbol.module.clone(),
                        name: symbol.name.clone(),
                    }),
                    SymbolKind::TypeAlias => match &symbol.ty {
                        Some(ty @ Type::Struct { .. }) => Some(ty.clone()),
                        _ => None,
                    },
                    SymbolKind::EnumVariant => {
                        // Find the enum this variant belongs to.
                        let variant_name = symbol.name.clone();
                        let mut found = None;
                        let mut candidates: Vec<SymbolId> = env.merged.values().copied().collect();
                        candidates.sort_by_key(|id| id.0);
                        for candidate in candidates {
                            let candidate_sym = self.symbols.get(candidate);
                            if candidate_sym.kind != SymbolKind::Enum {
                                continue;
                            }
                            let owner_module = candidate_sym.module.clone();
                            let decl_index = candidate_sym.decl_index;
                            if let Some(TopDecl::Enum(decl)) = self
                                .cu
                                .get(&owner_module)
                                .and_then(|module| module.decls.get(decl_index))
                            {
                                if decl.variants.iter().any(|v| v.name == variant_name) {
                                    found = Some(Type::Enum {
                                        module: owner_module,
                                        name: decl.name.clone(),
                                    });
                                    break;
                                }
                            }
                        }
                        found
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    // --- value-type dependency cycles ---

    fn value_type_dependencies(ty: &Type, out: &mut BTreeSet<(String, String)>) {
        match ty {
            // Pointer fields never create definition-order dependencies;
            // forward declarations cover them.
            Type::Pointer(_) => {}
            Type::Nullable(inner) => {
                if !matches!(**inner, Type::Pointer(_)) {
                    Self::value_type_dependencies(inner, out);
                }
            }
            Type::Struct { module, name } | Type::Enum { module, name } => {
                out.insert((module.clone(), name.clone()));
            }
            _ => {}
        }
    }

    fn build_dependency_graph(&self) -> BTreeMap<(String, String), BTreeSet<(String, String)>> {
        let mut graph = BTreeMap::new();

        for ((module, name), info) in &self.struct_infos {
            let mut deps = BTreeSet::new();
            for field in &info.fields {
                Self::value_type_dependencies(&field.ty, &mut deps);
            }
            graph.insert((module.clone(), name.clone()), deps);
        }
        for ((module, name), info) in &self.enum_infos {
            let mut deps = BTreeSet::new();
            for variant in &info.variants {
                for ty in &variant.field_types {
                    Self::value_type_dependencies(ty, &mut deps);
                }
            }
            graph.insert((module.clone(), name.clone()), deps);
        }
        graph
    }

    fn detect_value_type_cycles(&mut self) {
        let graph = self.build_dependency_graph();

        let mut in_degree: BTreeMap<_, usize> = graph
            .iter()
            .map(|(node, deps)| {
                let counted = deps.iter().filter(|dep| graph.contains_key(*dep)).count();
                (node.clone(), counted)
            })
            .collect();
        let mut queue: VecDeque<_> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| node.clone())
            .collect();
        let mut processed = 0usize;

        while let Some(node) = queue.pop_front() {
            processed += 1;
            for (dependent, deps) in &graph {
                if deps.contains(&node) {
                    let entry = in_degree.get_mut(dependent).expect("graph node");
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }

        if processed == graph.len() {
            return;
        }

        let unresolved: Vec<_> = graph
            .keys()
            .filter(|node| in_degree.get(*node).copied().unwrap_or(0) > 0)
            .cloned()
            .collect();
        let mut parts = Vec::new();
        for node in unresolved.iter().take(3) {
            let deps: Vec<String> = graph[node]
                .iter()
                .filter(|dep| unresolved.contains(dep))
                .map(|(m, n)| format!("{m}::{n}"))
                .collect();
            if !deps.is_empty() {
                parts.push(format!("{}::{} depends on {}", node.0, node.1, deps.join(", ")));
            }
        }

        let first = &unresolved[0];
        let span = self.decl_span(&first.0, &first.1);
        let mut diagnostic = Diagnostic::error(
            "SIG-0040",
            format!(
                "value-type cycle detected: {}; this creates infinite-size types; use pointers \
                 to break the cycle",
                parts.join("; ")
            ),
        );
        if let Some(span) = span {
            diagnostic = diagnostic.with_span(span);
        }
        self.emit(&first.0.clone(), diagnostic);
    }

    fn decl_span(&self, module_name: &str, decl_name: &str) -> Option<SourceSpan> {
        let module = self.cu.get(module_name)?;
        for decl in &module.decls {
            match decl {
                TopDecl::Struct(decl) if decl.name == decl_name => return Some(decl.span),
                TopDecl::Enum(decl) if decl.name == decl_name => return Some(decl.span),
                _ => {}
            }
        }
        None
    }
}
