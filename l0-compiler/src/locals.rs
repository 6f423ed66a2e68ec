use std::collections::HashMap;

use crate::ast::{Block, FuncDecl, Module, NodeId, Pattern, SourceSpan, Stmt, TopDecl};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::loader::CompilationUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Param,
    Local,
    PatternVar,
}

impl LocalKind {
    fn describe(self) -> &'static str {
        match self {
            LocalKind::Param => "parameter",
            LocalKind::Local => "variable",
            LocalKind::PatternVar => "pattern variable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalSymbol {
    pub name: String,
    pub kind: LocalKind,
    pub span: SourceSpan,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    symbols: HashMap<String, LocalSymbol>,
}

#[derive(Debug, Clone)]
pub struct FunctionEnv {
    pub module_name: String,
    pub func_name: String,
    pub decl_index: usize,
    pub root_scope: usize,
}

/// Lexical scope trees for every non-extern function in a compilation
/// unit. Scopes live in one arena; blocks and match arms map to their
/// scope by `NodeId`.
#[derive(Debug, Default)]
pub struct FunctionEnvs {
    scopes: Vec<Scope>,
    block_scopes: HashMap<NodeId, usize>,
    arm_scopes: HashMap<NodeId, usize>,
    pub functions: Vec<FunctionEnv>,
}

impl FunctionEnvs {
    pub fn block_scope(&self, block: NodeId) -> Option<usize> {
        self.block_scopes.get(&block).copied()
    }

    pub fn arm_scope(&self, arm: NodeId) -> Option<usize> {
        self.arm_scopes.get(&arm).copied()
    }

    /// Look a name up through the scope chain starting at `scope`.
    pub fn lookup(&self, scope: usize, name: &str) -> Option<&LocalSymbol> {
        let mut current = Some(scope);
        while let Some(index) = current {
            let scope = &self.scopes[index];
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol);
            }
            current = scope.parent;
        }
        None
    }

    pub fn function(&self, module: &str, func: &str) -> Option<&FunctionEnv> {
        self.functions
            .iter()
            .find(|env| env.module_name == module && env.func_name == func)
    }
}

pub struct LocalScopeResolver {
    envs: FunctionEnvs,
    diagnostics: Diagnostics,
    current_module: String,
    current_file: Option<std::path::PathBuf>,
}

impl LocalScopeResolver {
    pub fn new() -> Self {
        Self {
            envs: FunctionEnvs::default(),
            diagnostics: Diagnostics::new(),
            current_module: String::new(),
            current_file: None,
        }
    }

    pub fn resolve(mut self, cu: &CompilationUnit) -> (FunctionEnvs, Diagnostics) {
        for module in cu.iter() {
            self.current_module = module.name.clone();
            self.current_file = module.file.clone();
            for (decl_index, decl) in module.decls.iter().enumerate() {
                if let TopDecl::Func(func) = decl {
                    if !func.is_extern {
                        self.build_function_env(module, decl_index, func);
                    }
                }
            }
        }
        (self.envs, self.diagnostics)
    }

    fn build_function_env(&mut self, module: &Module, decl_index: usize, func: &FuncDecl) {
        let root = self.new_scope(None);
        for param in &func.params {
            self.declare(root, &param.name, LocalKind::Param, param.span);
        }

        // The function body shares the root scope with the parameters.
        self.envs.block_scopes.insert(func.body.id, root);
        self.visit_block(&func.body, root);

        self.envs.functions.push(FunctionEnv {
            module_name: module.name.clone(),
            func_name: func.name.clone(),
            decl_index,
            root_scope: root,
        });
    }

    fn visit_block(&mut self, block: &Block, scope: usize) {
        for stmt in &block.stmts {
            self.visit_stmt(stmt, scope);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt, scope: usize) {
        match stmt {
            Stmt::Let(stmt) => {
                self.declare(scope, &stmt.name, LocalKind::Local, stmt.span);
            }
            Stmt::If(stmt) => {
                self.visit_stmt(&stmt.then_branch, scope);
                if let Some(else_branch) = &stmt.else_branch {
                    self.visit_stmt(else_branch, scope);
                }
            }
            Stmt::While(stmt) => {
                let body_scope = self.new_scope(Some(scope));
                self.envs.block_scopes.insert(stmt.body.id, body_scope);
                self.visit_block(&stmt.body, body_scope);
            }
            Stmt::For(stmt) => {
                // The for header introduces its own scope; the body nests
                // inside it.
                let header_scope = self.new_scope(Some(scope));
                if let Some(init) = &stmt.init {
                    self.visit_stmt(init, header_scope);
                }
                if let Some(step) = &stmt.step {
                    self.visit_stmt(step, header_scope);
                }
                let body_scope = self.new_scope(Some(header_scope));
                self.envs.block_scopes.insert(stmt.body.id, body_scope);
                self.visit_block(&stmt.body, body_scope);
            }
            Stmt::With(stmt) => {
                let header_scope = self.new_scope(Some(scope));
                for item in &stmt.items {
                    self.visit_stmt(&item.init, header_scope);
                    if let Some(cleanup) = &item.cleanup {
                        self.visit_stmt(cleanup, header_scope);
                    }
                }
                let body_scope = self.new_scope(Some(header_scope));
                self.envs.block_scopes.insert(stmt.body.id, body_scope);
                self.visit_block(&stmt.body, body_scope);
                if let Some(cleanup) = &stmt.cleanup {
                    let cleanup_scope = self.new_scope(Some(header_scope));
                    self.envs.block_scopes.insert(cleanup.id, cleanup_scope);
                    self.visit_block(cleanup, cleanup_scope);
                }
            }
            Stmt::Match(stmt) => {
                for arm in &stmt.arms {
                    let arm_scope = self.new_scope(Some(scope));
                    self.envs.arm_scopes.insert(arm.id, arm_scope);
                    self.envs.block_scopes.insert(arm.body.id, arm_scope);
                    if let Pattern::Variant(pattern) = &arm.pattern {
                        for var in &pattern.vars {
                            self.declare(arm_scope, var, LocalKind::PatternVar, pattern.span);
                        }
                    }
                    self.visit_block(&arm.body, arm_scope);
                }
            }
            Stmt::Case(stmt) => {
                for arm in &stmt.arms {
                    self.visit_stmt(&arm.body, scope);
                }
                if let Some(else_arm) = &stmt.else_arm {
                    self.visit_stmt(&else_arm.body, scope);
                }
            }
            Stmt::Block(block) => {
                let block_scope = self.new_scope(Some(scope));
                self.envs.block_scopes.insert(block.id, block_scope);
                self.visit_block(block, block_scope);
            }
            Stmt::Assign(_)
            | Stmt::Expr(_)
            | Stmt::Drop(_)
            | Stmt::Break(_)
            | Stmt::Continue(_)
            | Stmt::Return(_) => {}
        }
    }

    fn new_scope(&mut self, parent: Option<usize>) -> usize {
        self.envs.scopes.push(Scope {
            parent,
            symbols: HashMap::new(),
        });
        self.envs.scopes.len() - 1
    }

    fn declare(&mut self, scope: usize, name: &str, kind: LocalKind, span: SourceSpan) {
        if let Some(existing) = self.envs.scopes[scope].symbols.get(name) {
            let mut diagnostic = Diagnostic::error(
                "LOC-0010",
                format!(
                    "duplicate {} '{}' in this scope (first declared as {} at line {}, column {})",
                    kind.describe(),
                    name,
                    existing.kind.describe(),
                    existing.span.line,
                    existing.span.column
                ),
            )
            .with_span(span)
            .with_module(self.current_module.clone());
            if let Some(file) = &self.current_file {
                diagnostic = diagnostic.with_file(file.clone());
            }
            self.diagnostics.push(diagnostic);
            return;
        }
        self.envs.scopes[scope].symbols.insert(
            name.to_string(),
            LocalSymbol {
                name: name.to_string(),
                kind,
                span,
            },
        );
    }
}
