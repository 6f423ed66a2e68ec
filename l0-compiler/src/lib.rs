mod analysis;
mod ast;
mod backend;
mod compiler;
mod diagnostics;
mod escape;
mod lexer;
mod loader;
mod locals;
mod parser;
mod printer;
mod render;
mod resolve;
mod resolver;
mod signatures;
mod source;
mod symbols;
mod typecheck;
mod types;

pub mod runtime;

pub use crate::analysis::{
    AnalysisResult, EnumInfo, EnumVariantInfo, StructFieldInfo, StructInfo, VarRefResolution,
};
pub use crate::ast::{
    AssignStmt, BinaryOp, Block, CaseArm, CaseElse, CaseStmt, DropStmt, EnumDecl, EnumVariant,
    Expr, ExprKind, ExprStmt, FieldDecl, ForStmt, FuncDecl, IfStmt, Import, LetDecl, LetStmt,
    MatchArm, MatchStmt, Module, NodeId, NodeIdGen, Param, Pattern, ReturnStmt, SourceSpan, Stmt,
    StructDecl, TopDecl, TypeAliasDecl, TypeRef, UnaryOp, VarRef, VariantPattern, WhileStmt,
    WithItem, WithStmt,
};
pub use crate::backend::{Backend, Ice};
pub use crate::compiler::{Compilation, CompileOptions, Compiler};
pub use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
pub use crate::escape::{decode_byte_token, decode_string_token, encode_c_string_bytes};
pub use crate::lexer::{Keyword, LexError, Lexer, Token, TokenKind};
pub use crate::loader::{CompilationUnit, Loader, SearchPaths};
pub use crate::locals::{FunctionEnv, FunctionEnvs, LocalKind, LocalScopeResolver};
pub use crate::parser::Parser;
pub use crate::printer::print_module;
pub use crate::render::{render, render_header};
pub use crate::resolver::{NameResolver, ResolverOutput};
pub use crate::signatures::SignatureResolver;
pub use crate::source::{SourceFile, SourceId};
pub use crate::symbols::{ModuleEnv, Symbol, SymbolId, SymbolKind, SymbolTable};
pub use crate::typecheck::TypeChecker;
pub use crate::types::{FuncType, Type};
