use std::path::PathBuf;

use crate::ast::{
    AssignStmt, BinaryOp, Block, CaseArm, CaseElse, CaseStmt, DropStmt, EnumDecl, EnumVariant,
    Expr, ExprKind, ExprStmt, FieldDecl, ForStmt, FuncDecl, IfStmt, Import, LetDecl, LetStmt,
    MatchArm, MatchStmt, Module, NodeIdGen, Param, Pattern, ReturnStmt, SourceSpan, Stmt,
    StructDecl, TopDecl, TypeAliasDecl, TypeRef, UnaryOp, VarRef, VariantPattern, WhileStmt,
    WithItem, WithStmt,
};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::lexer::{is_reserved_word, Keyword, Token, TokenKind};

/// Parse-level failure; converted to a `PAR-` diagnostic at the recovery
/// boundary (statement or declaration).
#[derive(Debug, Clone)]
struct ParseError {
    code: &'static str,
    message: String,
    line: usize,
    column: usize,
}

type PResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    index: usize,
    file: Option<PathBuf>,
    ids: &'a mut NodeIdGen,
    diagnostics: Diagnostics,
    module_name: String,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, file: Option<PathBuf>, ids: &'a mut NodeIdGen) -> Self {
        Self {
            tokens,
            index: 0,
            file,
            ids,
            diagnostics: Diagnostics::new(),
            module_name: String::new(),
        }
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    // --- token utilities ---

    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn last(&self) -> &Token {
        let index = self.index.saturating_sub(1);
        &self.tokens[index]
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.at_end() {
            self.index += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(keyword)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn error_here(&self, code: &'static str, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError {
            code,
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }

    fn expect(&mut self, kind: &TokenKind, code: &'static str, what: &str) -> PResult<Token> {
        if !self.check(kind) {
            return Err(self.error_here(code, format!("{what}, got {} instead", self.peek().describe())));
        }
        Ok(self.advance())
    }

    fn expect_keyword(&mut self, keyword: Keyword, code: &'static str, what: &str) -> PResult<Token> {
        self.expect(&TokenKind::Keyword(keyword), code, what)
    }

    fn expect_identifier(&mut self, code: &'static str, what: &str) -> PResult<Token> {
        self.expect(&TokenKind::Identifier, code, what)
    }

    fn expect_variable_name(&mut self, code: &'static str, what: &str) -> PResult<Token> {
        if self.peek().kind == TokenKind::FutureReserved {
            let text = self.peek().lexeme.clone();
            return Err(self.error_here(
                "PAR-0010",
                format!("invalid variable name '{text}': reserved keyword"),
            ));
        }
        let token = self.expect_identifier(code, what)?;
        if is_reserved_word(&token.lexeme) {
            return Err(ParseError {
                code: "PAR-0011",
                message: format!("invalid variable name '{}': reserved identifier", token.lexeme),
                line: token.line,
                column: token.column,
            });
        }
        Ok(token)
    }

    fn record(&mut self, error: ParseError) {
        let mut diagnostic = Diagnostic::error(error.code, error.message)
            .with_span(SourceSpan::single_point(error.line, error.column));
        if let Some(file) = &self.file {
            diagnostic = diagnostic.with_file(file.clone());
        }
        if !self.module_name.is_empty() {
            diagnostic = diagnostic.with_module(self.module_name.clone());
        }
        self.diagnostics.push(diagnostic);
    }

    fn span_start(&self) -> SourceSpan {
        let here = self.peek();
        SourceSpan::single_point(here.line, here.column)
    }

    fn extend_span(&self, start: SourceSpan) -> SourceSpan {
        let here = self.last();
        SourceSpan::new(
            start.line,
            start.column,
            here.line,
            here.column + here.lexeme.chars().count(),
        )
    }

    fn mk_expr(&mut self, kind: ExprKind, span: SourceSpan) -> Expr {
        Expr {
            id: self.ids.fresh(),
            span,
            kind,
        }
    }

    // --- recovery ---

    /// Skip forward to a plausible declaration boundary after a top-level
    /// parse error.
    fn sync_top_level(&mut self) {
        if !self.at_end() {
            self.advance();
        }
        while !self.at_end() {
            match &self.peek().kind {
                TokenKind::Keyword(Keyword::Func)
                | TokenKind::Keyword(Keyword::Extern)
                | TokenKind::Keyword(Keyword::Struct)
                | TokenKind::Keyword(Keyword::Enum)
                | TokenKind::Keyword(Keyword::Type)
                | TokenKind::Keyword(Keyword::Let) => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Skip forward to the next statement boundary inside a block, keeping
    /// brace nesting balanced so an inner `}` does not end the enclosing
    /// block early.
    fn sync_statement(&mut self) {
        let mut depth = 0usize;
        while !self.at_end() {
            match &self.peek().kind {
                TokenKind::Semi if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenKind::LBrace => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.advance();
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // --- entry point ---

    pub fn parse_module(&mut self) -> Module {
        let start = self.span_start();

        let header = self.parse_module_header();
        let (name, imports) = match header {
            Ok(parts) => parts,
            Err(error) => {
                self.record(error);
                // Without a module header nothing downstream can anchor;
                // consume the rest of the token stream.
                while !self.at_end() {
                    self.advance();
                }
                return Module {
                    name: String::new(),
                    imports: Vec::new(),
                    decls: Vec::new(),
                    file: self.file.clone(),
                    span: self.extend_span(start),
                };
            }
        };
        self.module_name = name.clone();

        let mut decls = Vec::new();
        while !self.at_end() {
            match self.parse_top_decl() {
                Ok(decl) => decls.push(decl),
                Err(error) => {
                    self.record(error);
                    self.sync_top_level();
                }
            }
        }

        Module {
            name,
            imports,
            decls,
            file: self.file.clone(),
            span: self.extend_span(start),
        }
    }

    fn parse_module_header(&mut self) -> PResult<(String, Vec<Import>)> {
        self.expect_keyword(Keyword::Module, "PAR-0310", "expected 'module'")?;
        let first = self.expect_identifier("PAR-0311", "expected module name")?;
        let parts = self.parse_dotted_name(first)?;
        self.expect(&TokenKind::Semi, "PAR-0312", "expected ';' after module name")?;
        let name = parts.join(".");

        let mut imports = Vec::new();
        while self.eat_keyword(Keyword::Import) {
            let start = self.span_start();
            let first = self.expect_identifier("PAR-0320", "expected imported module name")?;
            let parts = self.parse_dotted_name(first)?;
            self.expect(&TokenKind::Semi, "PAR-0321", "expected ';' after import")?;
            imports.push(Import {
                name: parts.join("."),
                span: self.extend_span(start),
            });
        }

        Ok((name, imports))
    }

    fn parse_dotted_name(&mut self, first: Token) -> PResult<Vec<String>> {
        let mut parts = vec![first.lexeme];
        while self.eat(&TokenKind::Dot) {
            let part =
                self.expect_identifier("PAR-0300", "expected identifier after '.' in module name")?;
            parts.push(part.lexeme);
        }
        Ok(parts)
    }

    /// Try to parse `seg(.seg)*::Name(::Name)*`; restores the cursor and
    /// returns `None` when the shape does not match.
    fn try_parse_qualified_name(
        &mut self,
    ) -> PResult<Option<(Vec<String>, Option<Vec<String>>, Token)>> {
        if !self.check(&TokenKind::Identifier) {
            return Ok(None);
        }
        let saved = self.index;
        let first = self.advance();
        let mut parts = vec![first.lexeme];
        while self.eat(&TokenKind::Dot) {
            if !self.check(&TokenKind::Identifier) {
                self.index = saved;
                return Ok(None);
            }
            parts.push(self.advance().lexeme);
        }
        if !self.eat(&TokenKind::DoubleColon) {
            self.index = saved;
            return Ok(None);
        }
        let mut name = self.expect_identifier("PAR-0401", "expected identifier after '::'")?;
        // Collect additional ::Ident segments (overqualified names such as
        // color::Color::Red); rejected during type checking.
        let mut qualifier: Vec<String> = Vec::new();
        while self.eat(&TokenKind::DoubleColon) {
            qualifier.push(name.lexeme.clone());
            name = self.expect_identifier("PAR-0401", "expected identifier after '::'")?;
        }
        let qualifier = if qualifier.is_empty() {
            None
        } else {
            Some(qualifier)
        };
        Ok(Some((parts, qualifier, name)))
    }

    // --- top-level declarations ---

    fn parse_top_decl(&mut self) -> PResult<TopDecl> {
        if self.check_keyword(Keyword::Extern) {
            self.advance();
            return Ok(TopDecl::Func(self.parse_function(true)?));
        }
        if self.check_keyword(Keyword::Func) {
            return Ok(TopDecl::Func(self.parse_function(false)?));
        }
        if self.check_keyword(Keyword::Struct) {
            return Ok(TopDecl::Struct(self.parse_struct()?));
        }
        if self.check_keyword(Keyword::Enum) {
            return Ok(TopDecl::Enum(self.parse_enum()?));
        }
        if self.check_keyword(Keyword::Type) {
            return Ok(TopDecl::TypeAlias(self.parse_type_alias()?));
        }
        if self.check_keyword(Keyword::Let) {
            return Ok(TopDecl::Let(self.parse_top_level_let()?));
        }
        Err(self.error_here(
            "PAR-0020",
            format!("unexpected token in top level: {}", self.peek().describe()),
        ))
    }

    fn parse_function(&mut self, is_extern: bool) -> PResult<FuncDecl> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Func, "PAR-0040", "expected 'func'")?;
        let name = self.expect_identifier("PAR-0041", "expected function name")?;
        self.expect(&TokenKind::LParen, "PAR-0042", "expected '('")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let param_start = self.span_start();
                let param_name = self.expect_identifier("PAR-0043", "expected parameter name")?;
                self.expect(&TokenKind::Colon, "PAR-0044", "expected ':' after parameter name")?;
                let param_type = self.parse_type()?;
                params.push(Param {
                    name: param_name.lexeme,
                    type_ref: param_type,
                    span: self.extend_span(param_start),
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "PAR-0045", "expected ')' after parameters")?;

        let return_type = if self.eat(&TokenKind::Arrow) {
            self.parse_type()?
        } else {
            TypeRef {
                name: "void".to_string(),
                module_path: None,
                name_qualifier: None,
                pointer_depth: 0,
                nullable: false,
                span: self.extend_span(start),
            }
        };

        if is_extern {
            self.expect(
                &TokenKind::Semi,
                "PAR-0046",
                "expected ';' after extern function decl",
            )?;
            return Ok(FuncDecl {
                name: name.lexeme,
                params,
                return_type,
                body: Block {
                    id: self.ids.fresh(),
                    stmts: Vec::new(),
                    span: SourceSpan::default(),
                },
                is_extern: true,
                span: self.extend_span(start),
            });
        }

        let body = self.parse_block()?;
        Ok(FuncDecl {
            name: name.lexeme,
            params,
            return_type,
            body,
            is_extern: false,
            span: self.extend_span(start),
        })
    }

    fn parse_struct(&mut self) -> PResult<StructDecl> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Struct, "PAR-0050", "expected 'struct'")?;
        let name = self.expect_identifier("PAR-0051", "expected struct name")?;
        self.expect(&TokenKind::LBrace, "PAR-0052", "expected '{' after struct name")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_end() {
            let field_start = self.span_start();
            let field_name = self.expect_identifier("PAR-0053", "expected field name")?;
            self.expect(&TokenKind::Colon, "PAR-0054", "expected ':' after field name")?;
            let field_type = self.parse_type()?;
            self.expect(&TokenKind::Semi, "PAR-0055", "expected ';' after field declaration")?;
            fields.push(FieldDecl {
                name: field_name.lexeme,
                type_ref: field_type,
                span: self.extend_span(field_start),
            });
        }
        self.expect(&TokenKind::RBrace, "PAR-0056", "expected '}' after struct body")?;
        Ok(StructDecl {
            name: name.lexeme,
            fields,
            span: self.extend_span(start),
        })
    }

    fn parse_enum(&mut self) -> PResult<EnumDecl> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Enum, "PAR-0060", "expected 'enum'")?;
        let name = self.expect_identifier("PAR-0061", "expected enum name")?;
        self.expect(&TokenKind::LBrace, "PAR-0062", "expected '{' after enum name")?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_end() {
            let variant_start = self.span_start();
            let variant_name = self.expect_identifier("PAR-0063", "expected variant name")?;
            let mut fields = Vec::new();
            if self.eat(&TokenKind::LParen) {
                if !self.check(&TokenKind::RParen) {
                    loop {
                        let field_start = self.span_start();
                        let field_name =
                            self.expect_identifier("PAR-0064", "expected variant field name")?;
                        self.expect(&TokenKind::Colon, "PAR-0065", "expected ':'")?;
                        let field_type = self.parse_type()?;
                        fields.push(FieldDecl {
                            name: field_name.lexeme,
                            type_ref: field_type,
                            span: self.extend_span(field_start),
                        });
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "PAR-0066", "expected ')' after variant payload")?;
            }
            self.expect(&TokenKind::Semi, "PAR-0067", "expected ';' after variant")?;
            variants.push(EnumVariant {
                name: variant_name.lexeme,
                fields,
                span: self.extend_span(variant_start),
            });
        }
        self.expect(&TokenKind::RBrace, "PAR-0068", "expected '}' after enum body")?;
        Ok(EnumDecl {
            name: name.lexeme,
            variants,
            span: self.extend_span(start),
        })
    }

    fn parse_type_alias(&mut self) -> PResult<TypeAliasDecl> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Type, "PAR-0070", "expected 'type'")?;
        let name = self.expect_identifier("PAR-0071", "expected type alias name")?;
        self.expect(&TokenKind::Eq, "PAR-0072", "expected '=' in type alias")?;
        let target = self.parse_type()?;
        self.expect(&TokenKind::Semi, "PAR-0073", "expected ';' after type alias")?;
        Ok(TypeAliasDecl {
            name: name.lexeme,
            target,
            span: self.extend_span(start),
        })
    }

    fn parse_top_level_let(&mut self) -> PResult<LetDecl> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Let, "PAR-0080", "expected 'let'")?;
        let name = self.expect_variable_name("PAR-0081", "expected variable name")?;
        let type_ref = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Eq, "PAR-0082", "expected '=' in let binding")?;
        let value = self.parse_expr()?;
        self.expect(&TokenKind::Semi, "PAR-0083", "expected ';' after let declaration")?;
        Ok(LetDecl {
            name: name.lexeme,
            type_ref,
            value,
            span: self.extend_span(start),
        })
    }

    // --- types ---

    fn parse_type(&mut self) -> PResult<TypeRef> {
        let start = self.span_start();
        let (module_path, name_qualifier, name) = match self.try_parse_qualified_name()? {
            Some((path, qualifier, name)) => (Some(path), qualifier, name),
            None => {
                let name = self.expect_identifier("PAR-0400", "expected type name")?;
                (None, None, name)
            }
        };

        let mut pointer_depth = 0;
        while self.eat(&TokenKind::Star) {
            pointer_depth += 1;
        }
        let nullable = self.eat(&TokenKind::Question);

        if self.check(&TokenKind::LBracket) {
            return Err(self.error_here(
                "PAR-9401",
                "array types not yet supported: use pointers and [] indexing in expressions",
            ));
        }

        Ok(TypeRef {
            name: name.lexeme,
            module_path,
            name_qualifier,
            pointer_depth,
            nullable,
            span: self.extend_span(start),
        })
    }

    // --- blocks and statements ---

    fn parse_block(&mut self) -> PResult<Block> {
        let start = self.span_start();
        self.expect(&TokenKind::LBrace, "PAR-0090", "expected '{' to start block")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_end() {
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(error) => {
                    self.record(error);
                    self.sync_statement();
                }
            }
        }
        self.expect(&TokenKind::RBrace, "PAR-0091", "expected '}' after block")?;
        Ok(Block {
            id: self.ids.fresh(),
            stmts,
            span: self.extend_span(start),
        })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        if self.check(&TokenKind::LBrace) {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if self.check_keyword(Keyword::If) {
            return self.parse_if_stmt();
        }
        if self.check_keyword(Keyword::Match) {
            return self.parse_match_stmt();
        }
        if self.check_keyword(Keyword::Case) {
            return self.parse_case_stmt();
        }
        if self.check_keyword(Keyword::While) {
            return self.parse_while_stmt();
        }
        if self.check_keyword(Keyword::For) {
            return self.parse_for_stmt();
        }
        if self.check_keyword(Keyword::With) {
            return self.parse_with_stmt();
        }

        let stmt = self.parse_simple_stmt()?;
        self.expect(&TokenKind::Semi, "PAR-0100", "expected ';' after statement")?;
        Ok(stmt)
    }

    fn parse_simple_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();

        if self.check_keyword(Keyword::Let) {
            return self.parse_let_stmt();
        }
        if self.eat_keyword(Keyword::Break) {
            return Ok(Stmt::Break(self.extend_span(start)));
        }
        if self.eat_keyword(Keyword::Continue) {
            return Ok(Stmt::Continue(self.extend_span(start)));
        }
        if self.check_keyword(Keyword::Return) {
            return self.parse_return_stmt();
        }
        if self.check_keyword(Keyword::Drop) {
            return self.parse_drop_stmt();
        }

        let expr = self.parse_expr()?;
        if self.eat(&TokenKind::Eq) {
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign(AssignStmt {
                target: expr,
                value,
                span: self.extend_span(start),
            }));
        }
        Ok(Stmt::Expr(ExprStmt {
            expr,
            span: self.extend_span(start),
        }))
    }

    fn parse_let_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Let, "PAR-0110", "expected 'let'")?;
        let name = self.expect_variable_name("PAR-0111", "expected variable name")?;
        let type_ref = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Eq, "PAR-0112", "expected '=' in let binding")?;
        let value = self.parse_expr()?;
        Ok(Stmt::Let(LetStmt {
            name: name.lexeme,
            type_ref,
            value,
            span: self.extend_span(start),
        }))
    }

    fn parse_if_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::If, "PAR-0120", "expected 'if'")?;
        self.expect(&TokenKind::LParen, "PAR-0121", "expected '(' after 'if'")?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "PAR-0122", "expected ')' after condition")?;
        let then_branch = Box::new(self.parse_stmt()?);
        let else_branch = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If(IfStmt {
            cond,
            then_branch,
            else_branch,
            span: self.extend_span(start),
        }))
    }

    fn parse_while_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::While, "PAR-0130", "expected 'while'")?;
        self.expect(&TokenKind::LParen, "PAR-0131", "expected '('")?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "PAR-0132", "expected ')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::While(WhileStmt {
            cond,
            body,
            span: self.extend_span(start),
        }))
    }

    fn parse_for_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::For, "PAR-0140", "expected 'for'")?;
        self.expect(&TokenKind::LParen, "PAR-0141", "expected '(' after 'for'")?;

        let init = if self.eat(&TokenKind::Semi) {
            None
        } else {
            let stmt = self.parse_simple_stmt()?;
            self.expect(
                &TokenKind::Semi,
                "PAR-0142",
                "expected ';' after for loop initialization",
            )?;
            Some(Box::new(stmt))
        };

        let cond = if self.eat(&TokenKind::Semi) {
            None
        } else {
            let expr = self.parse_expr()?;
            self.expect(
                &TokenKind::Semi,
                "PAR-0143",
                "expected ';' after for loop condition",
            )?;
            Some(expr)
        };

        let step = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };

        self.expect(&TokenKind::RParen, "PAR-0144", "expected ')' after for loop clauses")?;
        let body = self.parse_block()?;
        Ok(Stmt::For(ForStmt {
            init,
            cond,
            step,
            body,
            span: self.extend_span(start),
        }))
    }

    fn parse_return_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Return, "PAR-0150", "expected 'return'")?;
        if self.check(&TokenKind::Semi) {
            return Ok(Stmt::Return(ReturnStmt {
                value: None,
                span: self.extend_span(start),
            }));
        }
        let value = self.parse_expr()?;
        Ok(Stmt::Return(ReturnStmt {
            value: Some(value),
            span: self.extend_span(start),
        }))
    }

    fn parse_drop_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Drop, "PAR-0160", "expected 'drop'")?;
        let name = self.expect_variable_name("PAR-0161", "expected variable name after 'drop'")?;
        Ok(Stmt::Drop(DropStmt {
            name: name.lexeme,
            span: self.extend_span(start),
        }))
    }

    fn parse_match_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Match, "PAR-0170", "expected 'match'")?;
        self.expect(&TokenKind::LParen, "PAR-0171", "expected '('")?;
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "PAR-0172", "expected ')'")?;
        self.expect(&TokenKind::LBrace, "PAR-0173", "expected '{' after match expression")?;

        let mut arms = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_end() {
            let arm_start = self.span_start();
            let pattern = self.parse_pattern()?;
            self.expect(&TokenKind::FatArrow, "PAR-0174", "expected '=>' in match arm")?;
            let body = self.parse_block()?;
            arms.push(MatchArm {
                id: self.ids.fresh(),
                pattern,
                body,
                span: self.extend_span(arm_start),
            });
        }
        self.expect(&TokenKind::RBrace, "PAR-0175", "expected '}' after match")?;

        let mut seen: Vec<&str> = Vec::new();
        let mut duplicate = false;
        for arm in &arms {
            let key = match &arm.pattern {
                Pattern::Wildcard { .. } => "_",
                Pattern::Variant(pattern) => pattern.name.as_str(),
            };
            if seen.contains(&key) {
                duplicate = true;
                break;
            }
            seen.push(key);
        }
        if duplicate {
            return Err(self.error_here("PAR-0176", "duplicate variant patterns in match statement"));
        }
        if arms.is_empty() {
            return Err(self.error_here("PAR-0177", "match statement must have at least one arm"));
        }

        Ok(Stmt::Match(MatchStmt {
            scrutinee,
            arms,
            span: self.extend_span(start),
        }))
    }

    fn parse_with_item(&mut self) -> PResult<WithItem> {
        let start = self.span_start();
        let init = self.parse_simple_stmt()?;
        let cleanup = if self.eat(&TokenKind::FatArrow) {
            Some(self.parse_simple_stmt()?)
        } else {
            None
        };
        Ok(WithItem {
            init,
            cleanup,
            span: self.extend_span(start),
        })
    }

    fn parse_with_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::With, "PAR-0500", "expected 'with'")?;
        self.expect(&TokenKind::LParen, "PAR-0501", "expected '(' after 'with'")?;
        let mut items = Vec::new();
        loop {
            items.push(self.parse_with_item()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "PAR-0502", "expected ')' after with items")?;
        let body = self.parse_block()?;
        let cleanup = if self.eat_keyword(Keyword::Cleanup) {
            Some(self.parse_block()?)
        } else {
            None
        };

        let has_arrows = items.iter().any(|item| item.cleanup.is_some());
        let has_bare = items.iter().any(|item| item.cleanup.is_none());
        if has_arrows && has_bare {
            return Err(self.error_here("PAR-0503", "'with': all items must use '=>' or none"));
        }
        if has_arrows && cleanup.is_some() {
            return Err(
                self.error_here("PAR-0504", "'with': cannot have both '=>' and cleanup block")
            );
        }
        if !has_arrows && cleanup.is_none() {
            return Err(self.error_here(
                "PAR-0505",
                "'with': cleanup block required when '=>' is not used",
            ));
        }

        Ok(Stmt::With(WithStmt {
            items,
            body,
            cleanup,
            span: self.extend_span(start),
        }))
    }

    fn parse_case_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span_start();
        self.expect_keyword(Keyword::Case, "PAR-0230", "expected 'case'")?;
        self.expect(&TokenKind::LParen, "PAR-0231", "expected '('")?;
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "PAR-0232", "expected ')'")?;
        self.expect(&TokenKind::LBrace, "PAR-0233", "expected '{' after 'case' expression")?;

        let mut arms = Vec::new();
        let mut else_arm: Option<CaseElse> = None;

        while !self.check(&TokenKind::RBrace) && !self.at_end() {
            if self.check_keyword(Keyword::Else) {
                if else_arm.is_some() {
                    return Err(
                        self.error_here("PAR-0236", "duplicate 'else' arm in 'case' statement")
                    );
                }
                self.advance();
                let else_start = self.span_start();
                if self.check(&TokenKind::FatArrow) {
                    return Err(self.error_here("PAR-0237", "'=>' not allowed in 'else' arm"));
                }
                let body = self.parse_stmt()?;
                else_arm = Some(CaseElse {
                    body: Box::new(body),
                    span: self.extend_span(else_start),
                });
                continue;
            }
            if else_arm.is_some() {
                return Err(self.error_here(
                    "PAR-0234",
                    "value arm cannot appear after 'else' in 'case' statement",
                ));
            }
            let arm_start = self.span_start();
            let literal = self.parse_case_literal()?;
            self.expect(&TokenKind::FatArrow, "PAR-0235", "expected '=>' in 'case' arm")?;
            let body = self.parse_stmt()?;
            arms.push(CaseArm {
                literal,
                body: Box::new(body),
                span: self.extend_span(arm_start),
            });
        }

        self.expect(&TokenKind::RBrace, "PAR-0239", "expected '}' after 'case' statement")?;

        if arms.is_empty() && else_arm.is_none() {
            return Err(self.error_here("PAR-0240", "'case' statement must have at least one arm"));
        }

        Ok(Stmt::Case(CaseStmt {
            scrutinee,
            arms,
            else_arm,
            span: self.extend_span(start),
        }))
    }

    fn parse_case_literal(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let token = self.peek().clone();
        let kind = match &token.kind {
            TokenKind::Int(value) => ExprKind::Int(*value),
            TokenKind::Byte(payload) => ExprKind::Byte(payload.clone()),
            TokenKind::Str(payload) => ExprKind::Str(payload.clone()),
            TokenKind::Bool(value) => ExprKind::Bool(*value),
            _ => {
                return Err(self.error_here("PAR-0241", "expected literal in 'case' arm"));
            }
        };
        self.advance();
        let span = self.extend_span(start);
        Ok(self.mk_expr(kind, span))
    }

    fn parse_pattern(&mut self) -> PResult<Pattern> {
        let start = self.span_start();
        if self.eat(&TokenKind::Wildcard) {
            return Ok(Pattern::Wildcard {
                span: self.extend_span(start),
            });
        }
        if self.check(&TokenKind::Identifier) {
            let (module_path, name_qualifier, name) = match self.try_parse_qualified_name()? {
                Some((path, qualifier, name)) => (Some(path), qualifier, name),
                None => (None, None, self.advance()),
            };
            let mut vars = Vec::new();
            if self.eat(&TokenKind::LParen) {
                if !self.check(&TokenKind::RParen) {
                    loop {
                        let var =
                            self.expect_variable_name("PAR-0180", "expected pattern variable name")?;
                        vars.push(var.lexeme);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "PAR-0181", "expected ')' in pattern")?;
            }
            return Ok(Pattern::Variant(VariantPattern {
                name: name.lexeme,
                module_path,
                name_qualifier,
                vars,
                span: self.extend_span(start),
            }));
        }
        Err(self.error_here(
            "PAR-0182",
            format!("unexpected token in pattern: {}", self.peek().describe()),
        ))
    }

    // --- expressions with precedence ---

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or_expr()
    }

    fn check_reserved_binary_op(&self) -> PResult<()> {
        let description = match &self.peek().kind {
            TokenKind::Amp => "'&' (bitwise AND)",
            TokenKind::Pipe => "'|' (bitwise OR)",
            TokenKind::Caret => "'^' (bitwise XOR)",
            TokenKind::Shl => "'<<' (left shift)",
            TokenKind::Shr => "'>>' (right shift)",
            _ => return Ok(()),
        };
        Err(self.error_here(
            "PAR-0226",
            format!("{description} operator is not yet supported"),
        ))
    }

    fn parse_or_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let mut expr = self.parse_and_expr()?;
        self.check_reserved_binary_op()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and_expr()?;
            self.check_reserved_binary_op()?;
            let span = self.extend_span(start);
            expr = self.mk_expr(
                ExprKind::Binary {
                    op: BinaryOp::Or,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_and_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let mut expr = self.parse_equality_expr()?;
        self.check_reserved_binary_op()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_equality_expr()?;
            self.check_reserved_binary_op()?;
            let span = self.extend_span(start);
            expr = self.mk_expr(
                ExprKind::Binary {
                    op: BinaryOp::And,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_equality_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let mut expr = self.parse_rel_expr()?;
        loop {
            let op = if self.eat(&TokenKind::EqEq) {
                BinaryOp::Eq
            } else if self.eat(&TokenKind::Ne) {
                BinaryOp::Ne
            } else {
                break;
            };
            let right = self.parse_rel_expr()?;
            let span = self.extend_span(start);
            expr = self.mk_expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_rel_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let mut expr = self.parse_add_expr()?;
        loop {
            let op = if self.eat(&TokenKind::Lt) {
                BinaryOp::Lt
            } else if self.eat(&TokenKind::Le) {
                BinaryOp::Le
            } else if self.eat(&TokenKind::Gt) {
                BinaryOp::Gt
            } else if self.eat(&TokenKind::Ge) {
                BinaryOp::Ge
            } else {
                break;
            };
            let right = self.parse_add_expr()?;
            let span = self.extend_span(start);
            expr = self.mk_expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_add_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let mut expr = self.parse_mul_expr()?;
        loop {
            let op = if self.eat(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.eat(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_mul_expr()?;
            let span = self.extend_span(start);
            expr = self.mk_expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_mul_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let mut expr = self.parse_unary_expr()?;
        loop {
            let op = if self.eat(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.eat(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.eat(&TokenKind::Percent) {
                BinaryOp::Rem
            } else {
                break;
            };
            let right = self.parse_unary_expr()?;
            let span = self.extend_span(start);
            expr = self.mk_expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn parse_unary_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let op = if self.eat(&TokenKind::Bang) {
            Some(UnaryOp::Not)
        } else if self.eat(&TokenKind::Minus) {
            Some(UnaryOp::Neg)
        } else if self.eat(&TokenKind::Star) {
            Some(UnaryOp::Deref)
        } else {
            None
        };
        if let Some(op) = op {
            let operand = self.parse_unary_expr()?;
            let span = self.extend_span(start);
            return Ok(self.mk_expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        if self.check(&TokenKind::Tilde) {
            return Err(self.error_here("PAR-0226", "'~' (bitwise NOT) operator is not yet supported"));
        }
        self.parse_cast_expr()
    }

    fn parse_cast_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let expr = self.parse_postfix_expr()?;
        if self.eat_keyword(Keyword::As) {
            let target = self.parse_type()?;
            let span = self.extend_span(start);
            return Ok(self.mk_expr(
                ExprKind::Cast {
                    operand: Box::new(expr),
                    target,
                },
                span,
            ));
        }
        Ok(expr)
    }

    fn parse_postfix_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        let mut expr = self.parse_primary_expr()?;
        loop {
            if self.eat(&TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_call_argument()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "PAR-0210", "expected ')' after arguments")?;
                let span = self.extend_span(start);
                expr = self.mk_expr(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
                continue;
            }
            if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "PAR-0211", "expected ']' after index")?;
                let span = self.extend_span(start);
                expr = self.mk_expr(
                    ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
                continue;
            }
            if self.eat(&TokenKind::Dot) {
                let field = self.expect_identifier("PAR-0212", "expected field name after '.'")?;
                let span = self.extend_span(start);
                expr = self.mk_expr(
                    ExprKind::Field {
                        object: Box::new(expr),
                        field: field.lexeme,
                    },
                    span,
                );
                continue;
            }
            if self.eat(&TokenKind::Question) {
                let span = self.extend_span(start);
                expr = self.mk_expr(ExprKind::Try(Box::new(expr)), span);
                continue;
            }
            break;
        }
        Ok(expr)
    }

    /// Parse a call argument: a `TypeArg` when syntactically unambiguous,
    /// an expression otherwise.
    fn parse_call_argument(&mut self) -> PResult<Expr> {
        let start = self.span_start();
        if self.is_unambiguous_type_start() {
            let type_ref = self.parse_type()?;
            let span = self.extend_span(start);
            return Ok(self.mk_expr(ExprKind::TypeArg(type_ref), span));
        }
        self.parse_expr()
    }

    fn is_builtin_type_name(&self) -> bool {
        self.check(&TokenKind::Identifier)
            && matches!(
                self.peek().lexeme.as_str(),
                "int" | "byte" | "bool" | "string" | "void"
            )
    }

    /// In call-argument position, decide whether the upcoming tokens are
    /// unambiguously a type:
    ///   - a builtin type name is always a type here;
    ///   - `Ident` followed by one or more `*`/`?` ending at `,` or `)`.
    ///
    /// `sizeof(a * b)` stays an expression because `b` is not an argument
    /// boundary.
    fn is_unambiguous_type_start(&mut self) -> bool {
        if self.is_builtin_type_name() {
            return true;
        }
        if !self.check(&TokenKind::Identifier) {
            return false;
        }
        let saved = self.index;
        self.index += 1;
        let mut has_suffix = false;
        while self.check(&TokenKind::Star) || self.check(&TokenKind::Question) {
            has_suffix = true;
            self.index += 1;
        }
        let at_boundary = self.check(&TokenKind::RParen) || self.check(&TokenKind::Comma);
        self.index = saved;
        has_suffix && at_boundary
    }

    fn parse_primary_expr(&mut self) -> PResult<Expr> {
        let start = self.span_start();

        if self.eat_keyword(Keyword::New) {
            let type_ref = self.parse_type()?;
            let mut args = Vec::new();
            if self.eat(&TokenKind::LParen) {
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_call_argument()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(
                    &TokenKind::RParen,
                    "PAR-0223",
                    "expected ')' after arguments to 'new'",
                )?;
            }
            let span = self.extend_span(start);
            return Ok(self.mk_expr(ExprKind::New { type_ref, args }, span));
        }

        let token = self.peek().clone();
        let literal = match &token.kind {
            TokenKind::Int(value) => Some(ExprKind::Int(*value)),
            TokenKind::Byte(payload) => Some(ExprKind::Byte(payload.clone())),
            TokenKind::Str(payload) => Some(ExprKind::Str(payload.clone())),
            TokenKind::Bool(value) => Some(ExprKind::Bool(*value)),
            TokenKind::Null => Some(ExprKind::Null),
            _ => None,
        };
        if let Some(kind) = literal {
            self.advance();
            let span = self.extend_span(start);
            return Ok(self.mk_expr(kind, span));
        }

        if self.check(&TokenKind::Identifier) {
            let (module_path, name_qualifier, name) = match self.try_parse_qualified_name()? {
                Some((path, qualifier, name)) => (Some(path), qualifier, name),
                None => (None, None, self.advance()),
            };
            let span = self.extend_span(start);
            return Ok(self.mk_expr(
                ExprKind::Var(VarRef {
                    name: name.lexeme,
                    module_path,
                    name_qualifier,
                }),
                span,
            ));
        }

        if self.eat(&TokenKind::LParen) {
            let inner = self.parse_expr()?;
            self.expect(&TokenKind::RParen, "PAR-0224", "expected ')' after expression")?;
            let span = self.extend_span(start);
            return Ok(self.mk_expr(ExprKind::Paren(Box::new(inner)), span));
        }

        Err(self.error_here(
            "PAR-0225",
            format!("unexpected token in expression: {}", self.peek().describe()),
        ))
    }
}
