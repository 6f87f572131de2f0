//! Parser-facing contract: source spans and the AST consumed by the core.
//!
//! The lexer and surface parser are external collaborators. This module
//! defines the `Program` shape they hand to the type checker and bytecode
//! generator, plus source-location types shared by every diagnostic.

pub mod ast;
pub mod span;

pub use ast::{
    BinaryOp, ClassDecl, EnumDecl, EnumVariant, Expr, ExprId, ExprKind, FieldDecl, FunctionDecl,
    InterpPart, MatchArm, Param, ParallelMode, Pattern, Program, Stmt, StmtKind, ThrowsSpec,
    TypeExpr, UnaryOp, Visibility,
};
pub use span::Span;
