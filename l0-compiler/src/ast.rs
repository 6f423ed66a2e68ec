use std::path::PathBuf;

/// Identity of an AST node that side tables key on (expression types,
/// scope maps, intrinsic targets). Dense per compilation, assigned by the
/// parser; unique across every module of a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Default)]
pub struct NodeIdGen {
    next: u32,
}

impl NodeIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl SourceSpan {
    pub fn new(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    pub fn single_point(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }
}

impl Default for SourceSpan {
    fn default() -> Self {
        Self {
            line: 0,
            column: 0,
            end_line: 0,
            end_column: 0,
        }
    }
}

/// A syntactic type reference: qualified name, pointer depth, trailing `?`.
///
/// `name_qualifier` holds extra `::`-segments of overqualified paths; the
/// parser consumes them so no stray tokens remain, and the type checker
/// rejects them.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: String,
    pub module_path: Option<Vec<String>>,
    pub name_qualifier: Option<Vec<String>>,
    pub pointer_depth: usize,
    pub nullable: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub name: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub type_ref: TypeRef,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub body: Block,
    pub is_extern: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub type_ref: TypeRef,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct EnumVariant {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct TypeAliasDecl {
    pub name: String,
    pub target: TypeRef,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct LetDecl {
    pub name: String,
    pub type_ref: Option<TypeRef>,
    pub value: Expr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum TopDecl {
    Func(FuncDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    TypeAlias(TypeAliasDecl),
    Let(LetDecl),
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub imports: Vec<Import>,
    pub decls: Vec<TopDecl>,
    pub file: Option<PathBuf>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: NodeId,
    pub stmts: Vec<Stmt>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block(Block),
    Let(LetStmt),
    Assign(AssignStmt),
    Expr(ExprStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    With(WithStmt),
    Match(MatchStmt),
    Case(CaseStmt),
    Drop(DropStmt),
    Break(SourceSpan),
    Continue(SourceSpan),
    Return(ReturnStmt),
}

impl Stmt {
    pub fn span(&self) -> SourceSpan {
        match self {
            Stmt::Block(block) => block.span,
            Stmt::Let(stmt) => stmt.span,
            Stmt::Assign(stmt) => stmt.span,
            Stmt::Expr(stmt) => stmt.span,
            Stmt::If(stmt) => stmt.span,
            Stmt::While(stmt) => stmt.span,
            Stmt::For(stmt) => stmt.span,
            Stmt::With(stmt) => stmt.span,
            Stmt::Match(stmt) => stmt.span,
            Stmt::Case(stmt) => stmt.span,
            Stmt::Drop(stmt) => stmt.span,
            Stmt::Break(span) | Stmt::Continue(span) => *span,
            Stmt::Return(stmt) => stmt.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LetStmt {
    pub name: String,
    pub type_ref: Option<TypeRef>,
    pub value: Expr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct AssignStmt {
    pub target: Expr,
    pub value: Expr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_branch: Box<Stmt>,
    pub else_branch: Option<Box<Stmt>>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Block,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub cond: Option<Expr>,
    pub step: Option<Box<Stmt>>,
    pub body: Block,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct WithItem {
    pub init: Stmt,
    pub cleanup: Option<Stmt>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct WithStmt {
    pub items: Vec<WithItem>,
    pub body: Block,
    pub cleanup: Option<Block>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub id: NodeId,
    pub pattern: Pattern,
    pub body: Block,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct MatchStmt {
    pub scrutinee: Expr,
    pub arms: Vec<MatchArm>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct CaseArm {
    pub literal: Expr,
    pub body: Box<Stmt>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct CaseElse {
    pub body: Box<Stmt>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct CaseStmt {
    pub scrutinee: Expr,
    pub arms: Vec<CaseArm>,
    pub else_arm: Option<CaseElse>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct DropStmt {
    pub name: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Wildcard { span: SourceSpan },
    Variant(VariantPattern),
}

impl Pattern {
    pub fn span(&self) -> SourceSpan {
        match self {
            Pattern::Wildcard { span } => *span,
            Pattern::Variant(pattern) => pattern.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VariantPattern {
    pub name: String,
    pub module_path: Option<Vec<String>>,
    pub name_qualifier: Option<Vec<String>>,
    pub vars: Vec<String>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Deref,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Deref => "*",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone)]
pub struct VarRef {
    pub name: String,
    pub module_path: Option<Vec<String>>,
    pub name_qualifier: Option<Vec<String>>,
}

impl VarRef {
    pub fn qualified_name(&self) -> String {
        match &self.module_path {
            Some(path) => format!("{}::{}", path.join("."), self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub span: SourceSpan,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i32),
    /// Byte literal payload with escapes preserved.
    Byte(String),
    /// String literal payload with escapes preserved.
    Str(String),
    Bool(bool),
    Null,
    Var(VarRef),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        object: Box<Expr>,
        field: String,
    },
    Paren(Box<Expr>),
    Cast {
        operand: Box<Expr>,
        target: TypeRef,
    },
    Try(Box<Expr>),
    New {
        type_ref: TypeRef,
        args: Vec<Expr>,
    },
    /// A type used in argument position (e.g. `sizeof(int*)`).
    TypeArg(TypeRef),
}
