use std::collections::HashMap;

use crate::ast::NodeId;
use crate::diagnostics::Diagnostics;
use crate::loader::CompilationUnit;
use crate::locals::FunctionEnvs;
use crate::symbols::{ModuleEnv, SymbolTable};
use crate::types::{FuncType, Type};

#[derive(Debug, Clone)]
pub struct StructFieldInfo {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct StructInfo {
    pub struct_type: Type,
    pub fields: Vec<StructFieldInfo>,
}

#[derive(Debug, Clone)]
pub struct EnumVariantInfo {
    pub name: String,
    pub field_types: Vec<Type>,
}

#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub enum_type: Type,
    pub variants: Vec<EnumVariantInfo>,
}

impl EnumInfo {
    pub fn variant(&self, name: &str) -> Option<&EnumVariantInfo> {
        self.variants.iter().find(|variant| variant.name == name)
    }
}

/// How a `VarRef` resolved: to a local binding or a module-level symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRefResolution {
    Local,
    Module,
}

/// Full front-end analysis result for an entry module: the compilation
/// unit, symbol environments, top-level type tables, per-expression types,
/// and every diagnostic the passes produced.
#[derive(Debug, Default)]
pub struct AnalysisResult {
    pub cu: Option<CompilationUnit>,
    pub module_envs: HashMap<String, ModuleEnv>,
    pub symbols: SymbolTable,

    // Keys are (module_name, decl_name).
    pub func_types: HashMap<(String, String), FuncType>,
    pub struct_infos: HashMap<(String, String), StructInfo>,
    pub enum_infos: HashMap<(String, String), EnumInfo>,
    pub let_types: HashMap<(String, String), Type>,
    pub func_envs: FunctionEnvs,

    pub expr_types: HashMap<NodeId, Type>,
    pub var_ref_resolution: HashMap<NodeId, VarRefResolution>,
    pub intrinsic_targets: HashMap<NodeId, Type>,

    pub diagnostics: Diagnostics,
}

impl AnalysisResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Whether a type is itself ARC-managed. Currently only `string`.
    pub fn is_arc_type(&self, ty: &Type) -> bool {
        ty.is_string()
    }

    /// Whether a value of this type transitively contains ARC payloads
    /// that scope-exit cleanup must release. Pointers never do: what they
    /// point at is owned by `new`/`drop`, not by the binding.
    pub fn has_arc_data(&self, ty: &Type) -> bool {
        match ty {
            Type::String => true,
            Type::Nullable(inner) => {
                if matches!(**inner, Type::Pointer(_)) {
                    false
                } else {
                    self.has_arc_data(inner)
                }
            }
            Type::Struct { module, name } => self
                .struct_infos
                .get(&(module.clone(), name.clone()))
                .map(|info| info.fields.iter().any(|field| self.has_arc_data(&field.ty)))
                .unwrap_or(false),
            Type::Enum { module, name } => self
                .enum_infos
                .get(&(module.clone(), name.clone()))
                .map(|info| {
                    info.variants
                        .iter()
                        .any(|variant| variant.field_types.iter().any(|ty| self.has_arc_data(ty)))
                })
                .unwrap_or(false),
            _ => false,
        }
    }
}
