//! Shared AST construction helpers for integration tests.
//!
//! The parser is an external collaborator, so tests build the `Program`
//! nodes it would produce by hand.

// Each test binary compiles this module; not every binary uses every helper.
#![allow(dead_code)]

use lumen_engine::ast::*;
use lumen_engine::{Program, Span};

pub fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, Span::line(1))
}

pub fn expr_at(kind: ExprKind, line: u32) -> Expr {
    Expr::new(kind, Span::line(line))
}

pub fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Span::line(1))
}

pub fn stmt_at(kind: StmtKind, line: u32) -> Stmt {
    Stmt::new(kind, Span::line(line))
}

pub fn int_lit(v: i64) -> Expr {
    expr(ExprKind::Int(v))
}

pub fn ident(name: &str) -> Expr {
    expr(ExprKind::Ident(name.to_string()))
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        callee: Box::new(ident(name)),
        args,
        named_args: vec![],
    })
}

pub fn param(name: &str, ty: &str) -> Param {
    Param {
        name: name.to_string(),
        ty: Some(TypeExpr::Named(ty.to_string())),
        default: None,
        span: Span::line(1),
    }
}

pub fn int_error_union(errors: &[&str]) -> TypeExpr {
    TypeExpr::ErrorUnion {
        success: Box::new(TypeExpr::Named("int".to_string())),
        errors: errors.iter().map(|e| e.to_string()).collect(),
        is_generic: errors.is_empty(),
    }
}

pub fn throws(errors: &[&str]) -> ThrowsSpec {
    ThrowsSpec {
        error_types: errors.iter().map(|e| e.to_string()).collect(),
        is_generic: errors.is_empty(),
    }
}

/// fn divide(a: int, b: int): int?DivisionByZero {
///   if (b == 0) { return err(DivisionByZero); }
///   return ok(a / b);
/// }
pub fn divide_decl() -> FunctionDecl {
    FunctionDecl {
        name: "divide".to_string(),
        params: vec![param("a", "int"), param("b", "int")],
        return_ty: Some(int_error_union(&["DivisionByZero"])),
        throws: Some(throws(&["DivisionByZero"])),
        body: vec![
            stmt(StmtKind::If {
                condition: expr(ExprKind::Binary {
                    op: BinaryOp::Eq,
                    left: Box::new(ident("b")),
                    right: Box::new(int_lit(0)),
                }),
                then_branch: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Err {
                    error_type: "DivisionByZero".to_string(),
                    args: vec![],
                }))))],
                else_branch: None,
            }),
            stmt(StmtKind::Return(Some(expr(ExprKind::Ok(Box::new(expr(
                ExprKind::Binary {
                    op: BinaryOp::Div,
                    left: Box::new(ident("a")),
                    right: Box::new(ident("b")),
                },
            ))))))),
        ],
        visibility: Visibility::Public,
        span: Span::line(1),
    }
}

/// fn main(): int {
///   match divide(10, 2) {
///     val v => return v;
///     err DivisionByZero => return -1;
///   }
/// }
pub fn main_decl() -> FunctionDecl {
    FunctionDecl {
        name: "main".to_string(),
        params: vec![],
        return_ty: Some(TypeExpr::Named("int".to_string())),
        throws: None,
        body: vec![stmt(StmtKind::Match {
            scrutinee: call("divide", vec![int_lit(10), int_lit(2)]),
            arms: vec![
                MatchArm {
                    pattern: Pattern::Val(Some("v".to_string())),
                    guard: None,
                    body: vec![stmt(StmtKind::Return(Some(ident("v"))))],
                    span: Span::line(1),
                },
                MatchArm {
                    pattern: Pattern::Err {
                        error_type: Some("DivisionByZero".to_string()),
                        binding: None,
                    },
                    guard: None,
                    body: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(int_lit(1)),
                    }))))],
                    span: Span::line(1),
                },
            ],
        })],
        visibility: Visibility::Public,
        span: Span::line(1),
    }
}

pub fn program(statements: Vec<Stmt>) -> Program {
    Program { statements }
}
