//! Symbol and type-reference resolution helpers shared by the signature
//! resolver, the type checker, and the backend.

use std::collections::HashMap;

use crate::ast::TypeRef;
use crate::symbols::{ModuleEnv, SymbolId, SymbolKind, SymbolTable};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    UnknownModule,
    ModuleNotImported,
    UnknownSymbol,
    AmbiguousSymbol,
}

#[derive(Debug, Clone)]
pub struct SymbolResolution {
    pub symbol: Option<SymbolId>,
    pub error: Option<ResolveErrorKind>,
    pub module_name: String,
    pub name: String,
    pub ambiguous_modules: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeResolveErrorKind {
    UnknownType,
    NotAType,
    UnresolvedAlias,
    VariantAsType,
    UnknownModule,
    ModuleNotImported,
    AmbiguousType,
    InvalidNullableVoid,
}

#[derive(Debug, Clone)]
pub struct TypeResolution {
    pub ty: Option<Type>,
    pub error: Option<TypeResolveErrorKind>,
    pub module_name: String,
    pub name: String,
    pub symbol: Option<SymbolId>,
    pub ambiguous_modules: Vec<String>,
}

/// Resolve an identifier, optionally qualified with a module path.
///
/// Qualified lookups consult the named module's `locals` and require the
/// module to be imported by the current one; unqualified lookups go
/// through the current module's merged view, where ambiguous imports have
/// been removed.
pub fn resolve_symbol(
    module_envs: &HashMap<String, ModuleEnv>,
    current_module: &str,
    name: &str,
    module_path: Option<&[String]>,
) -> SymbolResolution {
    let target_module = match module_path {
        Some(path) => path.join("."),
        None => current_module.to_string(),
    };

    let missing = |error: ResolveErrorKind, ambiguous: Vec<String>| SymbolResolution {
        symbol: None,
        error: Some(error),
        module_name: target_module.clone(),
        name: name.to_string(),
        ambiguous_modules: ambiguous,
    };

    if module_path.is_some() {
        let Some(current_env) = module_envs.get(current_module) else {
            return missing(ResolveErrorKind::UnknownModule, Vec::new());
        };
        if target_module != current_module
            && !current_env.imports.iter().any(|imp| *imp == target_module)
        {
            return missing(ResolveErrorKind::ModuleNotImported, Vec::new());
        }
    }

    let Some(env) = module_envs.get(&target_module) else {
        return missing(ResolveErrorKind::UnknownModule, Vec::new());
    };

    let symbol = if module_path.is_some() {
        env.locals.get(name)
    } else {
        env.merged.get(name)
    };

    match symbol {
        Some(&id) => SymbolResolution {
            symbol: Some(id),
            error: None,
            module_name: target_module.clone(),
            name: name.to_string(),
            ambiguous_modules: Vec::new(),
        },
        None => {
            if module_path.is_none() {
                if let Some(sources) = env.ambiguous_imports.get(name) {
                    return missing(ResolveErrorKind::AmbiguousSymbol, sources.clone());
                }
            }
            missing(ResolveErrorKind::UnknownSymbol, Vec::new())
        }
    }
}

/// Resolve a syntactic type reference into a semantic type, using alias
/// targets already computed by the signature resolver.
pub fn resolve_type_ref(
    module_envs: &HashMap<String, ModuleEnv>,
    symbols: &SymbolTable,
    current_module: &str,
    tref: &TypeRef,
) -> TypeResolution {
    let base_name = tref.name.as_str();

    let finish = |base: Type, module_name: String, symbol: Option<SymbolId>| {
        if tref.nullable && base.is_void() && tref.pointer_depth == 0 {
            return TypeResolution {
                ty: None,
                error: Some(TypeResolveErrorKind::InvalidNullableVoid),
                module_name,
                name: base_name.to_string(),
                symbol,
                ambiguous_modules: Vec::new(),
            };
        }
        let mut ty = base;
        for _ in 0..tref.pointer_depth {
            ty = Type::pointer(ty);
        }
        if tref.nullable {
            ty = Type::nullable(ty);
        }
        TypeResolution {
            ty: Some(ty),
            error: None,
            module_name,
            name: base_name.to_string(),
            symbol,
            ambiguous_modules: Vec::new(),
        }
    };

    if tref.module_path.is_none() {
        if let Some(base) = Type::builtin(base_name) {
            return finish(base, current_module.to_string(), None);
        }
    }

    let sym_result = resolve_symbol(
        module_envs,
        current_module,
        base_name,
        tref.module_path.as_deref(),
    );

    let Some(sym_id) = sym_result.symbol else {
        let error = match sym_result.error {
            Some(ResolveErrorKind::UnknownModule) => TypeResolveErrorKind::UnknownModule,
            Some(ResolveErrorKind::ModuleNotImported) => TypeResolveErrorKind::ModuleNotImported,
            Some(ResolveErrorKind::AmbiguousSymbol) => TypeResolveErrorKind::AmbiguousType,
            _ => TypeResolveErrorKind::UnknownType,
        };
        return TypeResolution {
            ty: None,
            error: Some(error),
            module_name: sym_result.module_name,
            name: base_name.to_string(),
            symbol: None,
            ambiguous_modules: sym_result.ambiguous_modules,
        };
    };

    let symbol = symbols.get(sym_id);
    let base = match symbol.kind {
        SymbolKind::Struct => Type::Struct {
            module: symbol.module.clone(),
            name: symbol.name.clone(),
        },
        SymbolKind::Enum => Type::Enum {
            module: symbol.module.clone(),
            name: symbol.name.clone(),
        },
        SymbolKind::TypeAlias => match &symbol.ty {
            Some(ty) => ty.clone(),
            None => {
                return TypeResolution {
                    ty: None,
                    error: Some(TypeResolveErrorKind::UnresolvedAlias),
                    module_name: sym_result.module_name,
                    name: base_name.to_string(),
                    symbol: Some(sym_id),
                    ambiguous_modules: Vec::new(),
                };
            }
        },
        SymbolKind::EnumVariant => {
            return TypeResolution {
                ty: None,
                error: Some(TypeResolveErrorKind::VariantAsType),
                module_name: sym_result.module_name,
                name: base_name.to_string(),
                symbol: Some(sym_id),
                ambiguous_modules: Vec::new(),
            };
        }
        _ => {
            return TypeResolution {
                ty: None,
                error: Some(TypeResolveErrorKind::NotAType),
                module_name: sym_result.module_name,
                name: base_name.to_string(),
                symbol: Some(sym_id),
                ambiguous_modules: Vec::new(),
            };
        }
    };

    finish(base, sym_result.module_name, Some(sym_id))
}
