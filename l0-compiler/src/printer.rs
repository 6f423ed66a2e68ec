//! AST pretty printer: renders a parsed module back to canonical source
//! text. Whitespace is normalized; semantics are preserved.

use std::fmt::Write as _;

use crate::ast::{
    Block, CaseStmt, Expr, ExprKind, FuncDecl, MatchStmt, Module, Pattern, Stmt, TopDecl, TypeRef,
    WithStmt,
};

pub fn print_module(module: &Module) -> String {
    let mut printer = Printer::default();
    printer.module(module);
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn module(&mut self, module: &Module) {
        self.line(&format!("module {};", module.name));
        for import in &module.imports {
            self.line(&format!("import {};", import.name));
        }
        if !module.decls.is_empty() {
            self.out.push('\n');
        }
        for decl in &module.decls {
            self.top_decl(decl);
        }
    }

    fn top_decl(&mut self, decl: &TopDecl) {
        match decl {
            TopDecl::Func(func) => self.func_decl(func),
            TopDecl::Struct(decl) => {
                self.line(&format!("struct {} {{", decl.name));
                self.indent += 1;
                for field in &decl.fields {
                    let ty = type_ref(&field.type_ref);
                    self.line(&format!("{}: {ty};", field.name));
                }
                self.indent -= 1;
                self.line("}");
            }
            TopDecl::Enum(decl) => {
                self.line(&format!("enum {} {{", decl.name));
                self.indent += 1;
                for variant in &decl.variants {
                    let fields = variant
                        .fields
                        .iter()
                        .map(|field| format!("{}: {}", field.name, type_ref(&field.type_ref)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.line(&format!("{}({fields});", variant.name));
                }
                self.indent -= 1;
                self.line("}");
            }
            TopDecl::TypeAlias(decl) => {
                self.line(&format!("type {} = {};", decl.name, type_ref(&decl.target)));
            }
            TopDecl::Let(decl) => {
                let annotation = decl
                    .type_ref
                    .as_ref()
                    .map(|ty| format!(": {}", type_ref(ty)))
                    .unwrap_or_default();
                self.line(&format!("let {}{annotation} = {};", decl.name, expr(&decl.value)));
            }
        }
    }

    fn func_decl(&mut self, func: &FuncDecl) {
        let params = func
            .params
            .iter()
            .map(|param| format!("{}: {}", param.name, type_ref(&param.type_ref)))
            .collect::<Vec<_>>()
            .join(", ");
        let ret = if func.return_type.name == "void"
            && func.return_type.pointer_depth == 0
            && !func.return_type.nullable
        {
            String::new()
        } else {
            format!(" -> {}", type_ref(&func.return_type))
        };

        if func.is_extern {
            self.line(&format!("extern func {}({params}){ret};", func.name));
            return;
        }
        self.line(&format!("func {}({params}){ret} {{", func.name));
        self.indent += 1;
        for stmt in &func.body.stmts {
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn block(&mut self, block: &Block) {
        self.line("{");
        self.indent += 1;
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => self.block(block),
            Stmt::Let(stmt) => {
                let annotation = stmt
                    .type_ref
                    .as_ref()
                    .map(|ty| format!(": {}", type_ref(ty)))
                    .unwrap_or_default();
                self.line(&format!("let {}{annotation} = {};", stmt.name, expr(&stmt.value)));
            }
            Stmt::Assign(stmt) => {
                self.line(&format!("{} = {};", expr(&stmt.target), expr(&stmt.value)));
            }
            Stmt::Expr(stmt) => self.line(&format!("{};", expr(&stmt.expr))),
            Stmt::If(stmt) => {
                self.line(&format!("if ({})", expr(&stmt.cond)));
                self.indented_stmt(&stmt.then_branch);
                if let Some(else_branch) = &stmt.else_branch {
                    self.line("else");
                    self.indented_stmt(else_branch);
                }
            }
            Stmt::While(stmt) => {
                self.line(&format!("while ({})", expr(&stmt.cond)));
                self.block(&stmt.body);
            }
            Stmt::For(stmt) => {
                let init = stmt
                    .init
                    .as_ref()
                    .map(|init| simple_stmt(init))
                    .unwrap_or_default();
                let cond = stmt.cond.as_ref().map(expr).unwrap_or_default();
                let step = stmt
                    .step
                    .as_ref()
                    .map(|step| simple_stmt(step))
                    .unwrap_or_default();
                self.line(&format!("for ({init}; {cond}; {step})"));
                self.block(&stmt.body);
            }
            Stmt::With(stmt) => self.with_stmt(stmt),
            Stmt::Match(stmt) => self.match_stmt(stmt),
            Stmt::Case(stmt) => self.case_stmt(stmt),
            Stmt::Drop(stmt) => self.line(&format!("drop {};", stmt.name)),
            Stmt::Break(_) => self.line("break;"),
            Stmt::Continue(_) => self.line("continue;"),
            Stmt::Return(stmt) => match &stmt.value {
                Some(value) => self.line(&format!("return {};", expr(value))),
                None => self.line("return;"),
            },
        }
    }

    fn indented_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => self.block(block),
            other => {
                self.indent += 1;
                self.stmt(other);
                self.indent -= 1;
            }
        }
    }

    fn with_stmt(&mut self, stmt: &WithStmt) {
        let items = stmt
            .items
            .iter()
            .map(|item| {
                let mut text = simple_stmt(&item.init);
                if let Some(cleanup) = &item.cleanup {
                    let _ = write!(text, " => {}", simple_stmt(cleanup));
                }
                text
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.line(&format!("with ({items})"));
        self.block(&stmt.body);
        if let Some(cleanup) = &stmt.cleanup {
            self.line("cleanup");
            self.block(cleanup);
        }
    }

    fn match_stmt(&mut self, stmt: &MatchStmt) {
        self.line(&format!("match ({}) {{", expr(&stmt.scrutinee)));
        self.indent += 1;
        for arm in &stmt.arms {
            let pattern = match &arm.pattern {
                Pattern::Wildcard { .. } => "_".to_string(),
                Pattern::Variant(pattern) => {
                    let prefix = pattern
                        .module_path
                        .as_ref()
                        .map(|path| format!("{}::", path.join(".")))
                        .unwrap_or_default();
                    format!("{prefix}{}({})", pattern.name, pattern.vars.join(", "))
                }
            };
            self.line(&format!("{pattern} =>"));
            self.block(&arm.body);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn case_stmt(&mut self, stmt: &CaseStmt) {
        self.line(&format!("case ({}) {{", expr(&stmt.scrutinee)));
        self.indent += 1;
        for arm in &stmt.arms {
            self.line(&format!("{} =>", expr(&arm.literal)));
            self.indented_stmt(&arm.body);
        }
        if let Some(else_arm) = &stmt.else_arm {
            self.line("else");
            self.indented_stmt(&else_arm.body);
        }
        self.indent -= 1;
        self.line("}");
    }
}

fn simple_stmt(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Let(stmt) => {
            let annotation = stmt
                .type_ref
                .as_ref()
                .map(|ty| format!(": {}", type_ref(ty)))
                .unwrap_or_default();
            format!("let {}{annotation} = {}", stmt.name, expr(&stmt.value))
        }
        Stmt::Assign(stmt) => format!("{} = {}", expr(&stmt.target), expr(&stmt.value)),
        Stmt::Expr(stmt) => expr(&stmt.expr),
        Stmt::Return(stmt) => match &stmt.value {
            Some(value) => format!("return {}", expr(value)),
            None => "return".to_string(),
        },
        Stmt::Drop(stmt) => format!("drop {}", stmt.name),
        Stmt::Break(_) => "break".to_string(),
        Stmt::Continue(_) => "continue".to_string(),
        _ => String::new(),
    }
}

fn type_ref(tref: &TypeRef) -> String {
    let mut out = String::new();
    if let Some(path) = &tref.module_path {
        let _ = write!(out, "{}::", path.join("."));
    }
    out.push_str(&tref.name);
    for _ in 0..tref.pointer_depth {
        out.push('*');
    }
    if tref.nullable {
        out.push('?');
    }
    out
}

fn expr(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Int(value) => value.to_string(),
        ExprKind::Byte(payload) => format!("'{payload}'"),
        ExprKind::Str(payload) => format!("\"{payload}\""),
        ExprKind::Bool(value) => value.to_string(),
        ExprKind::Null => "null".to_string(),
        ExprKind::Var(var) => {
            let mut out = String::new();
            if let Some(path) = &var.module_path {
                let _ = write!(out, "{}::", path.join("."));
            }
            out.push_str(&var.name);
            out
        }
        ExprKind::Unary { op, operand } => format!("{}{}", op.symbol(), expr(operand)),
        ExprKind::Binary { op, left, right } => {
            format!("{} {} {}", expr(left), op.symbol(), expr(right))
        }
        ExprKind::Call { callee, args } => {
            let args = args.iter().map(expr).collect::<Vec<_>>().join(", ");
            format!("{}({args})", expr(callee))
        }
        ExprKind::Index { target, index } => format!("{}[{}]", expr(target), expr(index)),
        ExprKind::Field { object, field } => format!("{}.{field}", expr(object)),
        ExprKind::Paren(inner) => format!("({})", expr(inner)),
        ExprKind::Cast { operand, target } => {
            format!("{} as {}", expr(operand), type_ref(target))
        }
        ExprKind::Try(inner) => format!("{}?", expr(inner)),
        ExprKind::New { type_ref: tref, args } => {
            let args = args.iter().map(expr).collect::<Vec<_>>().join(", ");
            format!("new {}({args})", type_ref(tref))
        }
        ExprKind::TypeArg(tref) => type_ref(tref),
    }
}
