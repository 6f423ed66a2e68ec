use std::collections::HashMap;

use crate::ast::{FuncDecl, Module, SourceSpan, TopDecl, TypeRef};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::loader::CompilationUnit;
use crate::symbols::{ModuleEnv, Symbol, SymbolId, SymbolKind, SymbolTable};

/// Module-level name resolution with open-import semantics.
///
/// Builds a `ModuleEnv` per module in two phases: collect locally defined
/// symbols (with duplicate detection), then open every import by
/// injecting the imported module's locals into the importer. Collisions
/// are resolved in favor of locals; a name imported from two modules is
/// removed from the merged view and flagged at use sites.
pub struct NameResolver {
    symbols: SymbolTable,
    module_envs: HashMap<String, ModuleEnv>,
    diagnostics: Diagnostics,
}

pub struct ResolverOutput {
    pub symbols: SymbolTable,
    pub module_envs: HashMap<String, ModuleEnv>,
    pub diagnostics: Diagnostics,
}

impl NameResolver {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            module_envs: HashMap::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn resolve(mut self, cu: &CompilationUnit) -> ResolverOutput {
        for module in cu.iter() {
            let mut env = ModuleEnv {
                module_name: module.name.clone(),
                file: module.file.clone(),
                imports: module.imports.iter().map(|imp| imp.name.clone()).collect(),
                ..ModuleEnv::default()
            };
            self.collect_locals(module, &mut env);
            self.module_envs.insert(module.name.clone(), env);
        }

        for module in cu.iter() {
            self.open_imports(cu, &module.name);
        }

        ResolverOutput {
            symbols: self.symbols,
            module_envs: self.module_envs,
            diagnostics: self.diagnostics,
        }
    }

    fn collect_locals(&mut self, module: &Module, env: &mut ModuleEnv) {
        for (decl_index, decl) in module.decls.iter().enumerate() {
            match decl {
                TopDecl::Func(func) => {
                    self.define_local(env, &func.name, SymbolKind::Func, decl_index, None, func.span);
                }
                TopDecl::Struct(decl) => {
                    self.define_local(env, &decl.name, SymbolKind::Struct, decl_index, None, decl.span);
                }
                TopDecl::Enum(decl) => {
                    self.define_local(env, &decl.name, SymbolKind::Enum, decl_index, None, decl.span);
                    for (variant_index, variant) in decl.variants.iter().enumerate() {
                        self.define_local(
                            env,
                            &variant.name,
                            SymbolKind::EnumVariant,
                            decl_index,
                            Some(variant_index),
                            variant.span,
                        );
                    }
                }
                TopDecl::TypeAlias(decl) => {
                    self.define_local(
                        env,
                        &decl.name,
                        SymbolKind::TypeAlias,
                        decl_index,
                        None,
                        decl.span,
                    );
                }
                TopDecl::Let(decl) => {
                    self.define_local(env, &decl.name, SymbolKind::Let, decl_index, None, decl.span);
                }
            }
        }
    }

    fn define_local(
        &mut self,
        env: &mut ModuleEnv,
        name: &str,
        kind: SymbolKind,
        decl_index: usize,
        variant_index: Option<usize>,
        span: SourceSpan,
    ) {
        if env.locals.contains_key(name) {
            let mut diagnostic = Diagnostic::error(
                "NAM-0010",
                format!(
                    "duplicate top-level definition of '{}' in module '{}'",
                    name, env.module_name
                ),
            )
            .with_module(env.module_name.clone())
            .with_span(span);
            if let Some(file) = &env.file {
                diagnostic = diagnostic.with_file(file.clone());
            }
            self.diagnostics.push(diagnostic);
            // Keep the first definition; ignore the duplicate.
            return;
        }

        let id = self.symbols.insert(Symbol {
            name: name.to_string(),
            kind,
            module: env.module_name.clone(),
            decl_index,
            variant_index,
            ty: None,
        });
        env.locals.insert(name.to_string(), id);
        env.merged.insert(name.to_string(), id);
    }

    fn open_imports(&mut self, cu: &CompilationUnit, module_name: &str) {
        let imports = self.module_envs[module_name].imports.clone();
        let file = self.module_envs[module_name].file.clone();

        for imported_module in imports {
            if !self.module_envs.contains_key(&imported_module) {
                // The loader should have already loaded every import; a
                // missing env means the unit is malformed.
                let mut diagnostic = Diagnostic::error(
                    "NAM-0029",
                    format!(
                        "unknown imported module '{imported_module}' in module '{module_name}'"
                    ),
                )
                .with_module(module_name.to_string());
                if let Some(file) = &file {
                    diagnostic = diagnostic.with_file(file.clone());
                }
                self.diagnostics.push(diagnostic);
                continue;
            }

            let mut exported: Vec<(String, SymbolId)> = self.module_envs[&imported_module]
                .locals
                .iter()
                .map(|(name, &id)| (name.clone(), id))
                .collect();
            exported.sort_by(|a, b| a.0.cmp(&b.0));

            for (name, sym_id) in exported {
                if let Some(&local_id) = self.module_envs[module_name].locals.get(&name) {
                    let compatible = self.extern_signatures_compatible(cu, local_id, sym_id);
                    let (code, message) = if compatible {
                        (
                            "NAM-0020",
                            format!(
                                "imported extern function '{imported_module}::{name}' will be \
                                 shadowed by a compatible local extern declaration in module \
                                 '{module_name}'"
                            ),
                        )
                    } else {
                        (
                            "NAM-0021",
                            format!(
                                "imported symbol '{imported_module}::{name}' will be shadowed \
                                 by a local definition in module '{module_name}'"
                            ),
                        )
                    };
                    let mut diagnostic =
                        Diagnostic::warning(code, message).with_module(module_name.to_string());
                    if let Some(file) = &file {
                        diagnostic = diagnostic.with_file(file.clone());
                    }
                    self.diagnostics.push(diagnostic);
                    continue;
                }

                let Some(env) = self.module_envs.get_mut(module_name) else {
                    continue;
                };
                match env.imported.get(&name).copied() {
                    Some(previous) if previous != sym_id => {
                        let prev_module = self.symbols.get(previous).module.clone();
                        // Ambiguous: drop from the merged view so the name
                        // becomes unusable without qualification.
                        if env.merged.get(&name) == Some(&previous) {
                            env.merged.remove(&name);
                        }
                        env.ambiguous_imports
                            .entry(name.clone())
                            .or_insert_with(|| vec![prev_module.clone()])
                            .push(imported_module.clone());
                        let mut diagnostic = Diagnostic::warning(
                            "NAM-0022",
                            format!(
                                "symbol '{name}' imported from multiple modules ('{prev_module}', \
                                 '{imported_module}') into '{module_name}'; unqualified '{name}' \
                                 will be ambiguous; qualify as '<module>::{name}'"
                            ),
                        )
                        .with_module(module_name.to_string());
                        if let Some(file) = &file {
                            diagnostic = diagnostic.with_file(file.clone());
                        }
                        self.diagnostics.push(diagnostic);
                    }
                    Some(_) => {}
                    None => {
                        env.imported.insert(name.clone(), sym_id);
                        env.merged.entry(name.clone()).or_insert(sym_id);
                    }
                }
            }
        }
    }

    /// Two extern function declarations are compatible when their
    /// parameter and return type references agree syntactically.
    fn extern_signatures_compatible(
        &self,
        cu: &CompilationUnit,
        local: SymbolId,
        imported: SymbolId,
    ) -> bool {
        let local_sym = self.symbols.get(local);
        let imported_sym = self.symbols.get(imported);
        if local_sym.kind != SymbolKind::Func || imported_sym.kind != SymbolKind::Func {
            return false;
        }
        let (Some(a), Some(b)) = (
            func_decl(cu, &local_sym.module, local_sym.decl_index),
            func_decl(cu, &imported_sym.module, imported_sym.decl_index),
        ) else {
            return false;
        };
        if !a.is_extern || !b.is_extern {
            return false;
        }
        if a.params.len() != b.params.len() {
            return false;
        }
        for (pa, pb) in a.params.iter().zip(&b.params) {
            if !type_refs_equal(&pa.type_ref, &pb.type_ref) {
                return false;
            }
        }
        type_refs_equal(&a.return_type, &b.return_type)
    }
}

fn func_decl<'a>(cu: &'a CompilationUnit, module: &str, decl_index: usize) -> Option<&'a FuncDecl> {
    match cu.get(module)?.decls.get(decl_index)? {
        TopDecl::Func(func) => Some(func),
        _ => None,
    }
}

/// Syntactic type-reference equality, ignoring spans.
fn type_refs_equal(a: &TypeRef, b: &TypeRef) -> bool {
    a.name == b.name
        && a.module_path == b.module_path
        && a.name_qualifier == b.name_qualifier
        && a.pointer_depth == b.pointer_depth
        && a.nullable == b.nullable
}
