//! AST node definitions
//!
//! The parser produces a `Program`: an ordered list of statements. Statement
//! and expression kinds are closed sum types; every downstream pass (type
//! checker, bytecode generator, LIR builder) dispatches by exhaustive match,
//! so adding a node kind forces every visitor to be updated.
//!
//! Nodes may share subtrees (type annotations reused across parameters); the
//! owner is the parent, everything else borrows.

use super::span::Span;
use std::sync::atomic::{AtomicU32, Ordering};

/// Visibility of a declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visible everywhere
    Public,
    /// Visible to the declaring class and subclasses
    Protected,
    /// Visible only inside the declaring class or module
    Private,
}

impl Visibility {
    /// Numeric encoding used by the bytecode DECLARE_VAR/DEFINE_FIELD operand
    pub fn as_i64(self) -> i64 {
        match self {
            Visibility::Public => 0,
            Visibility::Protected => 1,
            Visibility::Private => 2,
        }
    }
}

/// A type annotation as written in source, resolved by the type checker
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// A named type: primitive, enum, class, or error type
    Named(String),
    /// `[T]`
    List(Box<TypeExpr>),
    /// `{K: V}`
    Dict(Box<TypeExpr>, Box<TypeExpr>),
    /// `(T1, T2, ...)`
    Tuple(Vec<TypeExpr>),
    /// `fn(T1, T2) -> R`
    Function(Vec<TypeExpr>, Box<TypeExpr>),
    /// `T1 | T2 | ...`
    Union(Vec<TypeExpr>),
    /// `S?E1,E2` or the generic `S?`
    ErrorUnion {
        /// Success type
        success: Box<TypeExpr>,
        /// Declared error type names (empty when generic)
        errors: Vec<String>,
        /// True for the unconstrained `S?` form
        is_generic: bool,
    },
}

/// A function or lambda parameter
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Declared type (None for inferred lambda parameters)
    pub ty: Option<TypeExpr>,
    /// Default value; presence makes the parameter optional
    pub default: Option<Expr>,
    /// Source location
    pub span: Span,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Logical not
    Not,
}

/// Binary operators
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Whether this operator yields a boolean result
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Whether this operator is `&&` or `||`
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unique identifier for an expression node.
///
/// The type checker records each expression's inferred type in a side table
/// keyed by this id; the bytecode generator and LIR builder query it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

static NEXT_EXPR_ID: AtomicU32 = AtomicU32::new(0);

/// An expression node
#[derive(Debug, Clone)]
pub struct Expr {
    /// Unique node id
    pub id: ExprId,
    /// The expression kind
    pub kind: ExprKind,
    /// Source location
    pub span: Span,
}

impl Expr {
    /// Create an expression with a fresh id
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            id: ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            span,
        }
    }

    /// The line this expression starts on
    pub fn line(&self) -> u32 {
        self.span.line
    }
}

/// A piece of an interpolated string
#[derive(Debug, Clone)]
pub enum InterpPart {
    /// Literal text
    Text(String),
    /// An embedded expression
    Expr(Expr),
}

/// Expression kinds
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Signed integer literal
    Int(i64),
    /// Unsigned 64-bit literal (values above `i64::MAX`)
    UInt(u64),
    /// Float literal
    Float(f64),
    /// String literal
    Str(String),
    /// Boolean literal
    Bool(bool),
    /// `nil`
    Nil,
    /// Interpolated string: `"a {x} b"`
    Interpolation(Vec<InterpPart>),
    /// Identifier reference (variable or function name)
    Ident(String),
    /// Binary operation, including short-circuit `&&`/`||`
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Assignment to a variable, index, or member
    Assign { target: Box<Expr>, value: Box<Expr> },
    /// Compound assignment: `x += e` and friends
    CompoundAssign {
        op: BinaryOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// Function, method, or higher-order call
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        named_args: Vec<(String, Expr)>,
    },
    /// Property access: `obj.name`
    Member { object: Box<Expr>, name: String },
    /// Index access: `c[i]`
    Index { object: Box<Expr>, index: Box<Expr> },
    /// Lambda expression
    Lambda {
        params: Vec<Param>,
        return_ty: Option<TypeExpr>,
        body: Vec<Stmt>,
    },
    /// List literal
    ListLit(Vec<Expr>),
    /// Tuple literal
    TupleLit(Vec<Expr>),
    /// Dict literal
    DictLit(Vec<(Expr, Expr)>),
    /// Range: `a..b` / `a..=b`, optionally with `step`
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
        inclusive: bool,
    },
    /// `ok(e)` — success variant of the enclosing error union
    Ok(Box<Expr>),
    /// `err(E, args...)` — error variant construction
    Err { error_type: String, args: Vec<Expr> },
    /// `e?` with an optional `else` handler expression
    Fallible {
        inner: Box<Expr>,
        handler: Option<Box<Expr>>,
    },
    /// `await e`
    Await(Box<Expr>),
    /// `this`
    This,
    /// `super`
    Super,
}

/// A match arm
#[derive(Debug, Clone)]
pub struct MatchArm {
    /// The pattern
    pub pattern: Pattern,
    /// Optional guard, evaluated with pattern bindings in scope
    pub guard: Option<Expr>,
    /// Arm body
    pub body: Vec<Stmt>,
    /// Source location
    pub span: Span,
}

/// Match patterns
#[derive(Debug, Clone)]
pub enum Pattern {
    /// `val` / `val v` — the success variant of an error union
    Val(Option<String>),
    /// `err E(b)` / `err E` / the generic `err` covering all errors
    Err {
        /// Named error type; None is the generic error pattern
        error_type: Option<String>,
        /// Optional binding for the error value
        binding: Option<String>,
    },
    /// Literal pattern
    Literal(Expr),
    /// Tuple destructuring pattern
    Tuple(Vec<Pattern>),
    /// List destructuring pattern
    List(Vec<Pattern>),
    /// Dict pattern over named keys
    Dict(Vec<(String, Pattern)>),
    /// Enum or sum variant pattern, optionally destructuring the payload
    Variant {
        name: String,
        inner: Option<Box<Pattern>>,
    },
    /// Irrefutable binding
    Binding(String),
    /// `_`
    Wildcard,
}

/// `throws` declaration attached to a function
#[derive(Debug, Clone, PartialEq)]
pub struct ThrowsSpec {
    /// Declared error type names (empty when generic)
    pub error_types: Vec<String>,
    /// True for an unconstrained `throws`
    pub is_generic: bool,
}

/// A function declaration
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    /// Function name
    pub name: String,
    /// Parameters; optional parameters (with defaults) are trailing
    pub params: Vec<Param>,
    /// Declared return type
    pub return_ty: Option<TypeExpr>,
    /// Declared error set (populated from the `?E1,E2` return suffix)
    pub throws: Option<ThrowsSpec>,
    /// Body statements
    pub body: Vec<Stmt>,
    /// Visibility
    pub visibility: Visibility,
    /// Source location
    pub span: Span,
}

/// A class field declaration
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Visibility
    pub visibility: Visibility,
    /// Declared type
    pub ty: Option<TypeExpr>,
    /// Initialiser
    pub init: Option<Expr>,
    /// Source location
    pub span: Span,
}

/// A class declaration
#[derive(Debug, Clone)]
pub struct ClassDecl {
    /// Class name
    pub name: String,
    /// Superclass name
    pub superclass: Option<String>,
    /// Fields
    pub fields: Vec<FieldDecl>,
    /// Methods
    pub methods: Vec<FunctionDecl>,
    /// Source location
    pub span: Span,
}

/// One variant of an enum declaration
#[derive(Debug, Clone)]
pub struct EnumVariant {
    /// Variant name
    pub name: String,
    /// Payload type for typed variants
    pub payload: Option<TypeExpr>,
}

/// An enum declaration
#[derive(Debug, Clone)]
pub struct EnumDecl {
    /// Enum name
    pub name: String,
    /// Ordered variants
    pub variants: Vec<EnumVariant>,
    /// Source location
    pub span: Span,
}

/// Core-count mode for a `parallel` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    /// Resolve the worker count from the host CPU count
    Auto,
    /// Explicit worker count
    Explicit,
}

/// A statement node
#[derive(Debug, Clone)]
pub struct Stmt {
    /// The statement kind
    pub kind: StmtKind,
    /// Source location
    pub span: Span,
}

impl Stmt {
    /// Create a statement
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt { kind, span }
    }

    /// The line this statement starts on
    pub fn line(&self) -> u32 {
        self.span.line
    }
}

/// Statement kinds
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Expression evaluated for effect
    Expression(Expr),
    /// Variable declaration
    VarDecl {
        name: String,
        visibility: Visibility,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
    },
    /// Tuple destructuring declaration: `var (a, b) = e`
    TupleDestructure { names: Vec<String>, value: Expr },
    /// Function declaration
    Function(FunctionDecl),
    /// Class declaration
    Class(ClassDecl),
    /// Enum declaration
    Enum(EnumDecl),
    /// If statement
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    /// While loop
    While { condition: Expr, body: Vec<Stmt> },
    /// Traditional for loop
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// Iterator loop: `for x in e` / `for k, v in e`
    Iter {
        bindings: Vec<String>,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    /// Match statement
    Match { scrutinee: Expr, arms: Vec<MatchArm> },
    /// Break out of the innermost loop
    Break,
    /// Continue the innermost loop
    Continue,
    /// Return from the enclosing function
    Return(Option<Expr>),
    /// Block scope
    Block(Vec<Stmt>),
    /// Print statement
    Print(Vec<Expr>),
    /// Contract statement: `contract(cond, msg)`
    Contract { condition: Expr, message: Expr },
    /// Parallel block
    Parallel {
        mode: ParallelMode,
        cores: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// Concurrent block
    Concurrent { body: Vec<Stmt> },
    /// Task block
    Task { body: Vec<Stmt> },
    /// Worker block
    Worker { body: Vec<Stmt> },
    /// Atomic variable declaration
    AtomicDecl { name: String, init: Option<Expr> },
}

/// The parser's output: an ordered list of top-level statements
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Top-level statements in source order
    pub statements: Vec<Stmt>,
}

impl Program {
    /// Create an empty program
    pub fn new() -> Self {
        Program { statements: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_ids_are_unique() {
        let a = Expr::new(ExprKind::Int(1), Span::none());
        let b = Expr::new(ExprKind::Int(1), Span::none());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_binary_op_classification() {
        assert!(BinaryOp::Lt.is_comparison());
        assert!(!BinaryOp::Add.is_comparison());
        assert!(BinaryOp::And.is_logical());
        assert!(!BinaryOp::Eq.is_logical());
    }

    #[test]
    fn test_visibility_encoding() {
        assert_eq!(Visibility::Public.as_i64(), 0);
        assert_eq!(Visibility::Protected.as_i64(), 1);
        assert_eq!(Visibility::Private.as_i64(), 2);
    }
}
