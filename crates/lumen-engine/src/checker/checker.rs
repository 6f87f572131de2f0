//! The type checker
//!
//! Walks the AST twice: pass one collects every function signature into the
//! top scope, pass two checks statements and expressions, attaching inferred
//! types to expression nodes and accumulating diagnostics. Checking never
//! aborts: downstream passes run so a single compile surfaces every error.
//!
//! The error-handling discipline lives here: `ok`/`err` construction typing,
//! `?` propagation against the enclosing function's declared error set,
//! declared-set/return-type agreement, reachability of declared errors, and
//! exhaustiveness of matches over error unions.

use super::builtins::find_builtin;
use super::error::TypeCheckError;
use super::symbols::{FunctionSignature, SymbolTable, VariableSymbol};
use crate::parser::ast::*;
use crate::parser::Span;
use crate::types::{Type, TypePtr, TypeSystem};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Per-function context used while checking a body
#[derive(Clone)]
struct FunctionContext {
    signature: FunctionSignature,
    /// Error types produced by `err(...)` or propagated by `?` in the body
    produced_errors: FxHashSet<String>,
}

/// Static semantic analysis over a parsed program
pub struct TypeChecker {
    types: TypeSystem,
    symbols: SymbolTable,
    errors: Vec<TypeCheckError>,
    /// Inferred type of every checked expression, keyed by node id
    expr_types: FxHashMap<ExprId, TypePtr>,
    /// Named user types (enums, classes)
    named_types: FxHashMap<String, TypePtr>,
    current_function: Option<FunctionContext>,
    current_class: Option<String>,
    loop_depth: usize,
}

impl TypeChecker {
    /// Create a checker with a fresh type system
    pub fn new() -> Self {
        TypeChecker {
            types: TypeSystem::new(),
            symbols: SymbolTable::new(),
            errors: Vec::new(),
            expr_types: FxHashMap::default(),
            named_types: FxHashMap::default(),
            current_function: None,
            current_class: None,
            loop_depth: 0,
        }
    }

    /// The type system in use
    pub fn types(&self) -> &TypeSystem {
        &self.types
    }

    /// The inferred type of a checked expression
    pub fn expr_type(&self, id: ExprId) -> Option<TypePtr> {
        self.expr_types.get(&id).cloned()
    }

    /// The collected signature of a declared function
    pub fn find_signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.symbols.find_function(name)
    }

    /// All diagnostics accumulated so far
    pub fn errors(&self) -> &[TypeCheckError] {
        &self.errors
    }

    /// Whether any diagnostics were emitted
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Check a whole program. Returns the diagnostic list.
    pub fn check_program(&mut self, program: &Program) -> Vec<TypeCheckError> {
        // Pass 1: collect signatures and named types so forward references work.
        for stmt in &program.statements {
            self.collect_declarations(stmt);
        }
        // Pass 2: check everything.
        for stmt in &program.statements {
            self.check_statement(stmt);
        }
        self.errors.clone()
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.errors
            .push(TypeCheckError::new(message, span.line, span.column));
    }

    fn error_with(&mut self, err: TypeCheckError) {
        self.errors.push(err);
    }

    // ========================================================================
    // Pass 1: declaration collection
    // ========================================================================

    fn collect_declarations(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Function(decl) => {
                let signature = self.build_signature(decl);
                self.symbols.declare_global_function(signature);
            }
            StmtKind::Enum(decl) => {
                let ty = Arc::new(Type::Enum {
                    name: decl.name.clone(),
                    variants: decl.variants.iter().map(|v| v.name.clone()).collect(),
                });
                self.named_types.insert(decl.name.clone(), ty);
            }
            StmtKind::Class(decl) => {
                let fields = decl
                    .fields
                    .iter()
                    .map(|f| {
                        let ty = f
                            .ty
                            .as_ref()
                            .map(|t| self.resolve_type_expr(t, f.span))
                            .unwrap_or_else(|| self.types.any_type());
                        (f.name.clone(), ty)
                    })
                    .collect();
                let ty = Arc::new(Type::UserDefined { name: decl.name.clone(), fields });
                self.named_types.insert(decl.name.clone(), ty);
            }
            _ => {}
        }
    }

    /// Build a callable signature from a declaration, validating the
    /// `throws` clause against the return type.
    fn build_signature(&mut self, decl: &FunctionDecl) -> FunctionSignature {
        let mut params = Vec::with_capacity(decl.params.len());
        let mut first_optional = None;
        for (i, param) in decl.params.iter().enumerate() {
            let ty = param
                .ty
                .as_ref()
                .map(|t| self.resolve_type_expr(t, param.span))
                .unwrap_or_else(|| self.types.any_type());
            if param.default.is_some() {
                if first_optional.is_none() {
                    first_optional = Some(i);
                }
            } else if first_optional.is_some() {
                self.error(
                    format!(
                        "required parameter `{}` cannot follow an optional parameter",
                        param.name
                    ),
                    param.span,
                );
            }
            params.push(ty);
        }

        let declared_return = decl
            .return_ty
            .as_ref()
            .map(|t| self.resolve_type_expr(t, decl.span))
            .unwrap_or_else(|| self.types.nil_type());

        let mut can_fail = false;
        let mut error_types = Vec::new();
        let mut is_generic_error = false;

        if let Some(throws) = &decl.throws {
            can_fail = true;
            is_generic_error = throws.is_generic;
            error_types = throws.error_types.clone();
            for e in &error_types {
                if !self.types.is_error_type(e) {
                    self.error(
                        format!("unknown error type `{}` in declaration of `{}`", e, decl.name),
                        decl.span,
                    );
                }
            }
            match declared_return.as_ref() {
                Type::ErrorUnion { errors, is_generic, .. } => {
                    // The declared set and the return-type set must agree exactly.
                    if !throws.is_generic {
                        let declared: FxHashSet<&String> = throws.error_types.iter().collect();
                        let in_return: FxHashSet<&String> = errors.iter().collect();
                        if *is_generic || declared != in_return {
                            self.error(
                                format!(
                                    "declared error set of `{}` does not match its return type",
                                    decl.name
                                ),
                                decl.span,
                            );
                        }
                    }
                }
                _ => {
                    self.error(
                        format!(
                            "function `{}` declares error types but its return type is not an error union",
                            decl.name
                        ),
                        decl.span,
                    );
                }
            }
        } else if let Type::ErrorUnion { errors, is_generic, .. } = declared_return.as_ref() {
            // A `S?E` return annotation is itself the declaration.
            can_fail = true;
            error_types = errors.clone();
            is_generic_error = *is_generic;
        }

        FunctionSignature {
            name: decl.name.clone(),
            params,
            first_optional,
            return_type: declared_return,
            can_fail,
            error_types,
            is_generic_error,
        }
    }

    // ========================================================================
    // Type annotation resolution
    // ========================================================================

    fn resolve_type_expr(&mut self, expr: &TypeExpr, span: Span) -> TypePtr {
        match expr {
            TypeExpr::Named(name) => {
                if let Some(ty) = self.named_types.get(name) {
                    return Arc::clone(ty);
                }
                let ty = self.types.get_type(name);
                if matches!(ty.as_ref(), Type::Nil) && name != "nil" {
                    self.error(format!("undefined type `{}`", name), span);
                }
                ty
            }
            TypeExpr::List(elem) => {
                Arc::new(Type::List(self.resolve_type_expr(elem, span)))
            }
            TypeExpr::Dict(k, v) => Arc::new(Type::Dict(
                self.resolve_type_expr(k, span),
                self.resolve_type_expr(v, span),
            )),
            TypeExpr::Tuple(elems) => Arc::new(Type::Tuple(
                elems.iter().map(|e| self.resolve_type_expr(e, span)).collect(),
            )),
            TypeExpr::Function(params, ret) => Arc::new(Type::Function {
                params: params.iter().map(|p| self.resolve_type_expr(p, span)).collect(),
                ret: self.resolve_type_expr(ret, span),
            }),
            TypeExpr::Union(variants) => {
                let resolved =
                    variants.iter().map(|v| self.resolve_type_expr(v, span)).collect();
                self.types.create_union_type(resolved)
            }
            TypeExpr::ErrorUnion { success, errors, is_generic } => {
                for e in errors {
                    if !self.types.is_error_type(e) {
                        self.error(format!("unknown error type `{}`", e), span);
                    }
                }
                let success = self.resolve_type_expr(success, span);
                self.types
                    .create_error_union_type(success, errors.clone(), *is_generic)
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn check_statement(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                let ty = self.check_expression(expr);
                self.check_unhandled_fallible(expr, &ty);
            }
            StmtKind::VarDecl { name, ty, init, .. } => {
                self.check_var_decl(name, ty.as_ref(), init.as_ref(), stmt.span);
            }
            StmtKind::TupleDestructure { names, value } => {
                let value_ty = self.check_expression(value);
                match value_ty.as_ref() {
                    Type::Tuple(elems) if elems.len() == names.len() => {
                        for (name, elem) in names.iter().zip(elems) {
                            self.declare_var(name, Arc::clone(elem), stmt.span);
                        }
                    }
                    Type::Tuple(elems) => {
                        self.error(
                            format!(
                                "cannot destructure {}-element tuple into {} names",
                                elems.len(),
                                names.len()
                            ),
                            stmt.span,
                        );
                    }
                    _ => {
                        self.error(
                            format!("cannot destructure non-tuple type `{}`", value_ty),
                            stmt.span,
                        );
                        for name in names {
                            let any = self.types.any_type();
                            self.declare_var(name, any, stmt.span);
                        }
                    }
                }
            }
            StmtKind::Function(decl) => self.check_function(decl),
            StmtKind::Class(decl) => self.check_class(decl),
            StmtKind::Enum(_) => {}
            StmtKind::If { condition, then_branch, else_branch } => {
                self.expect_bool(condition, "if condition");
                self.check_block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_block(else_branch);
                }
            }
            StmtKind::While { condition, body } => {
                self.expect_bool(condition, "while condition");
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            StmtKind::For { init, condition, increment, body } => {
                self.symbols.begin_scope();
                if let Some(init) = init {
                    self.check_statement(init);
                }
                if let Some(condition) = condition {
                    self.expect_bool(condition, "for condition");
                }
                if let Some(increment) = increment {
                    self.check_expression(increment);
                }
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
                self.symbols.end_scope();
            }
            StmtKind::Iter { bindings, iterable, body } => {
                self.check_iter(bindings, iterable, body, stmt.span);
            }
            StmtKind::Match { scrutinee, arms } => {
                self.check_match(scrutinee, arms, stmt.span);
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.error("break statement outside of loop", stmt.span);
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error("continue statement outside of loop", stmt.span);
                }
            }
            StmtKind::Return(value) => self.check_return(value.as_ref(), stmt.span),
            StmtKind::Block(body) => self.check_block(body),
            StmtKind::Print(args) => {
                for arg in args {
                    self.check_expression(arg);
                }
            }
            StmtKind::Contract { condition, message } => {
                let cond_ty = self.check_expression(condition);
                if !matches!(cond_ty.as_ref(), Type::Bool) {
                    self.error(
                        format!("contract condition must be bool, got `{}`", cond_ty),
                        condition.span,
                    );
                }
                let msg_ty = self.check_expression(message);
                if !matches!(msg_ty.as_ref(), Type::String) {
                    self.error(
                        format!("contract message must be str, got `{}`", msg_ty),
                        message.span,
                    );
                }
            }
            StmtKind::Parallel { cores, body, .. } => {
                if let Some(cores) = cores {
                    let ty = self.check_expression(cores);
                    if !ty.is_numeric() {
                        self.error(
                            format!("parallel core count must be numeric, got `{}`", ty),
                            cores.span,
                        );
                    }
                }
                self.check_block(body);
            }
            StmtKind::Concurrent { body }
            | StmtKind::Task { body }
            | StmtKind::Worker { body } => self.check_block(body),
            StmtKind::AtomicDecl { name, init } => {
                if let Some(init) = init {
                    let ty = self.check_expression(init);
                    if !ty.is_numeric() {
                        self.error(
                            format!("atomic variable `{}` must be numeric, got `{}`", name, ty),
                            stmt.span,
                        );
                    }
                }
                let int = self.types.int_type();
                self.declare_var(name, int, stmt.span);
            }
        }
    }

    fn check_block(&mut self, body: &[Stmt]) {
        self.symbols.begin_scope();
        for stmt in body {
            self.check_statement(stmt);
        }
        self.symbols.end_scope();
    }

    fn declare_var(&mut self, name: &str, ty: TypePtr, span: Span) {
        if self.symbols.declared_in_current_scope(name) {
            self.error_with(
                TypeCheckError::new(format!("duplicate declaration of `{}`", name), span.line, span.column)
                    .with_lexeme(name),
            );
            return;
        }
        self.symbols.declare_variable(name, VariableSymbol { ty, span });
    }

    fn check_var_decl(
        &mut self,
        name: &str,
        annotation: Option<&TypeExpr>,
        init: Option<&Expr>,
        span: Span,
    ) {
        let annotated = annotation.map(|t| self.resolve_type_expr(t, span));
        let var_ty = match (annotated, init) {
            (Some(annotated), Some(init)) => {
                let init_ty = self.check_expression(init);
                if !annotated.is_error_union() {
                    self.check_unhandled_fallible(init, &init_ty);
                }
                if !self.types.is_compatible(&init_ty, &annotated) {
                    self.error_with(
                        TypeCheckError::new(
                            format!(
                                "cannot initialise `{}: {}` with value of type `{}`",
                                name, annotated, init_ty
                            ),
                            span.line,
                            span.column,
                        )
                        .with_lexeme(name)
                        .with_expected(annotated.to_string()),
                    );
                }
                annotated
            }
            (Some(annotated), None) => annotated,
            (None, Some(init)) => {
                let init_ty = self.check_expression(init);
                self.check_unhandled_fallible(init, &init_ty);
                init_ty
            }
            (None, None) => self.types.nil_type(),
        };
        self.declare_var(name, var_ty, span);
    }

    /// Report a fallible expression whose error side nothing consumes
    fn check_unhandled_fallible(&mut self, expr: &Expr, ty: &TypePtr) {
        if !ty.is_error_union() {
            return;
        }
        let callee = callee_name(expr);
        let message = match &callee {
            Some(name) => format!(
                "unhandled fallible expression: call to `{}` returns `{}`",
                name, ty
            ),
            None => format!("unhandled fallible expression of type `{}`", ty),
        };
        let mut err = TypeCheckError::new(message, expr.span.line, expr.span.column)
            .with_expected("`?`, `? else`, or a match over the result".to_string());
        if let Some(name) = callee {
            err = err.with_lexeme(name);
        }
        self.error_with(err);
    }

    fn check_iter(&mut self, bindings: &[String], iterable: &Expr, body: &[Stmt], span: Span) {
        let iter_ty = self.check_expression(iterable);
        let binding_types: Vec<TypePtr> = match iter_ty.as_ref() {
            Type::List(elem) => vec![Arc::clone(elem)],
            Type::Dict(k, v) => vec![Arc::clone(k), Arc::clone(v)],
            Type::Range => vec![self.types.int_type()],
            Type::String => vec![self.types.string_type()],
            Type::Any => vec![self.types.any_type(); bindings.len()],
            _ => {
                self.error(format!("type `{}` is not iterable", iter_ty), iterable.span);
                vec![self.types.any_type(); bindings.len()]
            }
        };
        if bindings.len() > binding_types.len() {
            self.error(
                format!(
                    "iterator yields {} value(s) but {} bindings given",
                    binding_types.len(),
                    bindings.len()
                ),
                span,
            );
        }
        self.symbols.begin_scope();
        for (name, ty) in bindings.iter().zip(binding_types) {
            self.declare_var(name, ty, span);
        }
        self.loop_depth += 1;
        for stmt in body {
            self.check_statement(stmt);
        }
        self.loop_depth -= 1;
        self.symbols.end_scope();
    }

    fn check_return(&mut self, value: Option<&Expr>, span: Span) {
        let Some(ctx) = self.current_function.clone() else {
            self.error("return statement outside of function", span);
            if let Some(value) = value {
                self.check_expression(value);
            }
            return;
        };
        match value {
            Some(value) => {
                let value_ty = self.check_expression(value);
                if !self.types.is_compatible(&value_ty, &ctx.signature.return_type) {
                    self.error_with(
                        TypeCheckError::new(
                            format!(
                                "return type mismatch in `{}`: expected `{}`, got `{}`",
                                ctx.signature.name, ctx.signature.return_type, value_ty
                            ),
                            span.line,
                            span.column,
                        )
                        .with_expected(ctx.signature.return_type.to_string()),
                    );
                }
            }
            None => {
                let ret = &ctx.signature.return_type;
                if !matches!(ret.as_ref(), Type::Nil | Type::Any) {
                    self.error(
                        format!(
                            "function `{}` must return a value of type `{}`",
                            ctx.signature.name, ret
                        ),
                        span,
                    );
                }
            }
        }
    }

    fn check_function(&mut self, decl: &FunctionDecl) {
        // Top-level signatures were collected (and validated) in pass one;
        // nested functions get built and registered here.
        let signature = if self.symbols.depth() == 1 {
            match self.symbols.find_function(&decl.name) {
                Some(sig) => sig.clone(),
                None => self.build_signature(decl),
            }
        } else {
            self.build_signature(decl)
        };
        self.symbols.declare_function(signature.clone());

        let outer = self.current_function.replace(FunctionContext {
            signature: signature.clone(),
            produced_errors: FxHashSet::default(),
        });
        let outer_loop_depth = std::mem::take(&mut self.loop_depth);

        self.symbols.begin_scope();
        for (param, ty) in decl.params.iter().zip(&signature.params) {
            if let Some(default) = &param.default {
                let default_ty = self.check_expression(default);
                if !self.types.is_compatible(&default_ty, ty) {
                    self.error(
                        format!(
                            "default value of `{}` has type `{}`, expected `{}`",
                            param.name, default_ty, ty
                        ),
                        param.span,
                    );
                }
            }
            self.declare_var(&param.name, Arc::clone(ty), param.span);
        }
        for stmt in &decl.body {
            self.check_statement(stmt);
        }
        self.symbols.end_scope();

        // Cross-check the declared error set against what the body produces.
        let ctx = self.current_function.take();
        if let Some(ctx) = ctx {
            if ctx.signature.can_fail && !ctx.signature.is_generic_error {
                for declared in &ctx.signature.error_types {
                    if !ctx.produced_errors.contains(declared) {
                        self.error(
                            format!(
                                "declared error type `{}` is never produced by function `{}`",
                                declared, decl.name
                            ),
                            decl.span,
                        );
                    }
                }
            }
        }
        self.current_function = outer;
        self.loop_depth = outer_loop_depth;
    }

    fn check_class(&mut self, decl: &ClassDecl) {
        if let Some(superclass) = &decl.superclass {
            if !self.named_types.contains_key(superclass) {
                self.error(
                    format!("unknown superclass `{}` for class `{}`", superclass, decl.name),
                    decl.span,
                );
            }
        }
        let outer_class = self.current_class.replace(decl.name.clone());
        self.symbols.begin_scope();
        for field in &decl.fields {
            let ty = field
                .ty
                .as_ref()
                .map(|t| self.resolve_type_expr(t, field.span))
                .unwrap_or_else(|| self.types.any_type());
            if let Some(init) = &field.init {
                let init_ty = self.check_expression(init);
                if !self.types.is_compatible(&init_ty, &ty) {
                    self.error(
                        format!(
                            "field `{}.{}` initialiser has type `{}`, expected `{}`",
                            decl.name, field.name, init_ty, ty
                        ),
                        field.span,
                    );
                }
            }
            self.declare_var(&field.name, ty, field.span);
        }
        for method in &decl.methods {
            self.check_function(method);
        }
        self.symbols.end_scope();
        self.current_class = outer_class;
    }

    // ========================================================================
    // Match checking and exhaustiveness
    // ========================================================================

    fn check_match(&mut self, scrutinee: &Expr, arms: &[MatchArm], span: Span) {
        let scrutinee_ty = self.check_expression(scrutinee);

        for arm in arms {
            self.symbols.begin_scope();
            self.bind_pattern(&arm.pattern, &scrutinee_ty, arm.span);
            if let Some(guard) = &arm.guard {
                let guard_ty = self.check_expression(guard);
                if !matches!(guard_ty.as_ref(), Type::Bool) {
                    self.error(
                        format!("match guard must be bool, got `{}`", guard_ty),
                        guard.span,
                    );
                }
            }
            for stmt in &arm.body {
                self.check_statement(stmt);
            }
            self.symbols.end_scope();
        }

        match scrutinee_ty.as_ref() {
            Type::ErrorUnion { errors, is_generic, .. } => {
                self.check_error_union_exhaustiveness(arms, errors, *is_generic, span);
            }
            Type::Enum { name, variants } => {
                self.check_enum_exhaustiveness(arms, name, variants, span);
            }
            _ => {}
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, scrutinee_ty: &TypePtr, span: Span) {
        match pattern {
            Pattern::Val(binding) => {
                let success = match scrutinee_ty.as_ref() {
                    Type::ErrorUnion { success, .. } => Arc::clone(success),
                    _ => {
                        self.error(
                            format!("`val` pattern on non-fallible type `{}`", scrutinee_ty),
                            span,
                        );
                        self.types.any_type()
                    }
                };
                if let Some(name) = binding {
                    self.declare_var(name, success, span);
                }
            }
            Pattern::Err { error_type, binding } => {
                if !scrutinee_ty.is_error_union() {
                    self.error(
                        format!("`err` pattern on non-fallible type `{}`", scrutinee_ty),
                        span,
                    );
                }
                if let Some(name) = error_type {
                    if !self.types.is_error_type(name) {
                        self.error(format!("unknown error type `{}`", name), span);
                    } else if let Some((declared, generic)) = scrutinee_ty.error_set() {
                        if !generic && !declared.iter().any(|e| e == name) {
                            self.error(
                                format!(
                                    "error type `{}` is not part of `{}`",
                                    name, scrutinee_ty
                                ),
                                span,
                            );
                        }
                    }
                }
                if let Some(name) = binding {
                    let any = self.types.any_type();
                    self.declare_var(name, any, span);
                }
            }
            Pattern::Literal(lit) => {
                let lit_ty = self.check_expression(lit);
                if !self.types.is_compatible(&lit_ty, scrutinee_ty)
                    && !self.types.is_compatible(scrutinee_ty, &lit_ty)
                {
                    self.error(
                        format!(
                            "pattern of type `{}` cannot match scrutinee of type `{}`",
                            lit_ty, scrutinee_ty
                        ),
                        span,
                    );
                }
            }
            Pattern::Tuple(patterns) => match scrutinee_ty.as_ref() {
                Type::Tuple(elems) if elems.len() == patterns.len() => {
                    for (p, e) in patterns.iter().zip(elems) {
                        self.bind_pattern(p, e, span);
                    }
                }
                _ => {
                    self.error(
                        format!("tuple pattern cannot match type `{}`", scrutinee_ty),
                        span,
                    );
                }
            },
            Pattern::List(patterns) => match scrutinee_ty.as_ref() {
                Type::List(elem) => {
                    for p in patterns {
                        self.bind_pattern(p, elem, span);
                    }
                }
                _ => {
                    self.error(
                        format!("list pattern cannot match type `{}`", scrutinee_ty),
                        span,
                    );
                }
            },
            Pattern::Dict(entries) => match scrutinee_ty.as_ref() {
                Type::Dict(_, value) => {
                    for (_, p) in entries {
                        self.bind_pattern(p, value, span);
                    }
                }
                _ => {
                    self.error(
                        format!("dict pattern cannot match type `{}`", scrutinee_ty),
                        span,
                    );
                }
            },
            Pattern::Variant { name, inner } => {
                match scrutinee_ty.as_ref() {
                    Type::Enum { variants, .. } => {
                        if !variants.iter().any(|v| v == name) {
                            self.error(
                                format!("`{}` is not a variant of `{}`", name, scrutinee_ty),
                                span,
                            );
                        }
                    }
                    Type::Sum { .. } | Type::Union(_) | Type::Any => {}
                    _ => {
                        self.error(
                            format!("variant pattern cannot match type `{}`", scrutinee_ty),
                            span,
                        );
                    }
                }
                if let Some(inner) = inner {
                    let any = self.types.any_type();
                    self.bind_pattern(inner, &any, span);
                }
            }
            Pattern::Binding(name) => {
                self.declare_var(name, Arc::clone(scrutinee_ty), span);
            }
            Pattern::Wildcard => {}
        }
    }

    /// The pattern set over an error union must cover the success variant and
    /// every declared error; a generic `err` pattern covers all errors, a
    /// `val` pattern covers the success side.
    fn check_error_union_exhaustiveness(
        &mut self,
        arms: &[MatchArm],
        errors: &[String],
        is_generic: bool,
        span: Span,
    ) {
        let mut success_covered = false;
        let mut generic_err_covered = false;
        let mut covered_errors: FxHashSet<&str> = FxHashSet::default();

        for arm in arms {
            if arm.guard.is_some() {
                // A guarded arm may fail at runtime; it never counts.
                continue;
            }
            match &arm.pattern {
                Pattern::Val(_) => success_covered = true,
                Pattern::Err { error_type: None, .. } => generic_err_covered = true,
                Pattern::Err { error_type: Some(name), .. } => {
                    covered_errors.insert(name.as_str());
                }
                Pattern::Wildcard | Pattern::Binding(_) => {
                    success_covered = true;
                    generic_err_covered = true;
                }
                _ => {}
            }
        }

        let mut missing: Vec<String> = Vec::new();
        if !success_covered {
            missing.push("val".to_string());
        }
        if !generic_err_covered {
            if is_generic {
                missing.push("err".to_string());
            } else {
                for e in errors {
                    if !covered_errors.contains(e.as_str()) {
                        missing.push(e.clone());
                    }
                }
            }
        }
        if !missing.is_empty() {
            self.error(
                format!("non-exhaustive match: missing {}", missing.join(", ")),
                span,
            );
        }
    }

    fn check_enum_exhaustiveness(
        &mut self,
        arms: &[MatchArm],
        name: &str,
        variants: &[String],
        span: Span,
    ) {
        let mut covered: FxHashSet<&str> = FxHashSet::default();
        let mut has_catchall = false;
        for arm in arms {
            if arm.guard.is_some() {
                continue;
            }
            match &arm.pattern {
                Pattern::Variant { name, .. } => {
                    covered.insert(name.as_str());
                }
                Pattern::Wildcard | Pattern::Binding(_) => has_catchall = true,
                _ => {}
            }
        }
        if has_catchall {
            return;
        }
        let missing: Vec<&str> = variants
            .iter()
            .map(|v| v.as_str())
            .filter(|v| !covered.contains(v))
            .collect();
        if !missing.is_empty() {
            self.error(
                format!(
                    "non-exhaustive match on `{}`: missing {}",
                    name,
                    missing.join(", ")
                ),
                span,
            );
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expect_bool(&mut self, expr: &Expr, what: &str) {
        let ty = self.check_expression(expr);
        if !matches!(ty.as_ref(), Type::Bool | Type::Any) {
            self.error(format!("{} must be bool, got `{}`", what, ty), expr.span);
        }
    }

    /// Check an expression, record its inferred type, and return it
    pub fn check_expression(&mut self, expr: &Expr) -> TypePtr {
        let ty = self.check_expression_inner(expr);
        self.expr_types.insert(expr.id, Arc::clone(&ty));
        ty
    }

    fn check_expression_inner(&mut self, expr: &Expr) -> TypePtr {
        match &expr.kind {
            ExprKind::Int(_) => self.types.int_type(),
            ExprKind::UInt(_) => self.types.get_type("u64"),
            ExprKind::Float(_) => self.types.float_type(),
            ExprKind::Str(_) => self.types.string_type(),
            ExprKind::Bool(_) => self.types.bool_type(),
            ExprKind::Nil => self.types.nil_type(),
            ExprKind::Interpolation(parts) => {
                for part in parts {
                    if let InterpPart::Expr(e) = part {
                        self.check_expression(e);
                    }
                }
                self.types.string_type()
            }
            ExprKind::Ident(name) => self.check_identifier(name, expr.span),
            ExprKind::Binary { op, left, right } => {
                self.check_binary(*op, left, right, expr.span)
            }
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.check_expression(operand);
                match op {
                    UnaryOp::Neg => {
                        if !operand_ty.is_numeric() && !matches!(operand_ty.as_ref(), Type::Any) {
                            self.error(
                                format!("cannot negate value of type `{}`", operand_ty),
                                expr.span,
                            );
                        }
                        operand_ty
                    }
                    UnaryOp::Not => {
                        if !matches!(operand_ty.as_ref(), Type::Bool | Type::Any) {
                            self.error(
                                format!("cannot apply `!` to type `{}`", operand_ty),
                                expr.span,
                            );
                        }
                        self.types.bool_type()
                    }
                }
            }
            ExprKind::Assign { target, value } => self.check_assign(target, value, expr.span),
            ExprKind::CompoundAssign { op, target, value } => {
                // Typing is the same as target = target op value.
                let target_ty = self.check_expression(target);
                let value_ty = self.check_expression(value);
                let combined = self.binary_result(*op, &target_ty, &value_ty, expr.span);
                if !self.types.is_compatible(&combined, &target_ty) {
                    self.error(
                        format!(
                            "compound assignment result `{}` is not convertible to `{}`",
                            combined, target_ty
                        ),
                        expr.span,
                    );
                }
                target_ty
            }
            ExprKind::Call { callee, args, named_args } => {
                self.check_call(callee, args, named_args, expr.span)
            }
            ExprKind::Member { object, name } => self.check_member(object, name, expr.span),
            ExprKind::Index { object, index } => self.check_index(object, index, expr.span),
            ExprKind::Lambda { params, return_ty, body } => {
                self.check_lambda(params, return_ty.as_ref(), body, expr.span)
            }
            ExprKind::ListLit(items) => {
                let mut elem_ty: Option<TypePtr> = None;
                for item in items {
                    let ty = self.check_expression(item);
                    elem_ty = Some(match elem_ty {
                        Some(prev) => self.types.get_common_type(&prev, &ty),
                        None => ty,
                    });
                }
                Arc::new(Type::List(elem_ty.unwrap_or_else(|| self.types.any_type())))
            }
            ExprKind::TupleLit(items) => Arc::new(Type::Tuple(
                items.iter().map(|e| self.check_expression(e)).collect(),
            )),
            ExprKind::DictLit(entries) => {
                let mut key_ty: Option<TypePtr> = None;
                let mut value_ty: Option<TypePtr> = None;
                for (k, v) in entries {
                    let kt = self.check_expression(k);
                    let vt = self.check_expression(v);
                    key_ty = Some(match key_ty {
                        Some(prev) => self.types.get_common_type(&prev, &kt),
                        None => kt,
                    });
                    value_ty = Some(match value_ty {
                        Some(prev) => self.types.get_common_type(&prev, &vt),
                        None => vt,
                    });
                }
                Arc::new(Type::Dict(
                    key_ty.unwrap_or_else(|| self.types.any_type()),
                    value_ty.unwrap_or_else(|| self.types.any_type()),
                ))
            }
            ExprKind::Range { start, end, step, .. } => {
                for bound in [Some(start), Some(end), step.as_ref()].into_iter().flatten() {
                    let ty = self.check_expression(bound);
                    if !ty.is_numeric() && !matches!(ty.as_ref(), Type::Any) {
                        self.error(
                            format!("range bound must be numeric, got `{}`", ty),
                            bound.span,
                        );
                    }
                }
                self.types.get_type("range")
            }
            ExprKind::Ok(inner) => self.check_ok(inner, expr.span),
            ExprKind::Err { error_type, args } => {
                self.check_err(error_type, args, expr.span)
            }
            ExprKind::Fallible { inner, handler } => {
                self.check_fallible(inner, handler.as_deref(), expr.span)
            }
            ExprKind::Await(inner) => self.check_expression(inner),
            ExprKind::This => match &self.current_class {
                Some(name) => self
                    .named_types
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.types.any_type()),
                None => {
                    self.error("`this` outside of a class", expr.span);
                    self.types.any_type()
                }
            },
            ExprKind::Super => {
                if self.current_class.is_none() {
                    self.error("`super` outside of a class", expr.span);
                }
                self.types.any_type()
            }
        }
    }

    fn check_identifier(&mut self, name: &str, span: Span) -> TypePtr {
        if let Some(var) = self.symbols.find_variable(name) {
            return Arc::clone(&var.ty);
        }
        if let Some(sig) = self.symbols.find_function(name) {
            return Arc::new(Type::Function {
                params: sig.params.clone(),
                ret: Arc::clone(&sig.return_type),
            });
        }
        if let Some(builtin) = find_builtin(name) {
            let params = builtin
                .param_types
                .iter()
                .map(|t| self.types.get_type(t))
                .collect();
            return Arc::new(Type::Function {
                params,
                ret: self.types.get_type(builtin.return_type),
            });
        }
        if let Some(ty) = self.named_types.get(name) {
            return Arc::clone(ty);
        }
        self.error_with(
            TypeCheckError::new(format!("undeclared identifier `{}`", name), span.line, span.column)
                .with_lexeme(name),
        );
        self.types.any_type()
    }

    fn check_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> TypePtr {
        let left_ty = self.check_expression(left);
        let right_ty = self.check_expression(right);
        self.binary_result(op, &left_ty, &right_ty, span)
    }

    fn binary_result(
        &mut self,
        op: BinaryOp,
        left_ty: &TypePtr,
        right_ty: &TypePtr,
        span: Span,
    ) -> TypePtr {
        if op.is_logical() {
            for ty in [left_ty, right_ty] {
                if !matches!(ty.as_ref(), Type::Bool | Type::Any) {
                    self.error(
                        format!("logical operand must be bool, got `{}`", ty),
                        span,
                    );
                }
            }
            return self.types.bool_type();
        }
        if op.is_comparison() {
            let comparable = left_ty == right_ty
                || (left_ty.is_numeric() && right_ty.is_numeric())
                || matches!(left_ty.as_ref(), Type::Any)
                || matches!(right_ty.as_ref(), Type::Any);
            if !comparable {
                self.error(
                    format!("cannot compare `{}` with `{}`", left_ty, right_ty),
                    span,
                );
            }
            return self.types.bool_type();
        }
        // Arithmetic. String + string is concatenation.
        if op == BinaryOp::Add
            && matches!(left_ty.as_ref(), Type::String)
            && matches!(right_ty.as_ref(), Type::String)
        {
            return self.types.string_type();
        }
        if matches!(left_ty.as_ref(), Type::Any) || matches!(right_ty.as_ref(), Type::Any) {
            return self.types.any_type();
        }
        if left_ty.is_numeric() && right_ty.is_numeric() {
            return self.types.get_common_type(left_ty, right_ty);
        }
        self.error(
            format!(
                "invalid operands `{}` and `{}` for arithmetic operator",
                left_ty, right_ty
            ),
            span,
        );
        self.types.any_type()
    }

    fn check_assign(&mut self, target: &Expr, value: &Expr, span: Span) -> TypePtr {
        let value_ty = self.check_expression(value);
        match &target.kind {
            ExprKind::Ident(name) => {
                let Some(var) = self.symbols.find_variable(name) else {
                    self.error_with(
                        TypeCheckError::new(
                            format!("assignment to undeclared variable `{}`", name),
                            span.line,
                            span.column,
                        )
                        .with_lexeme(name),
                    );
                    return value_ty;
                };
                let var_ty = Arc::clone(&var.ty);
                self.expr_types.insert(target.id, Arc::clone(&var_ty));
                if !self.types.is_compatible(&value_ty, &var_ty) {
                    self.error_with(
                        TypeCheckError::new(
                            format!(
                                "cannot assign value of type `{}` to `{}: {}`",
                                value_ty, name, var_ty
                            ),
                            span.line,
                            span.column,
                        )
                        .with_lexeme(name)
                        .with_expected(var_ty.to_string()),
                    );
                }
                var_ty
            }
            ExprKind::Index { object, index } => {
                self.check_index(object, index, target.span);
                value_ty
            }
            ExprKind::Member { object, name } => {
                self.check_member(object, name, target.span);
                value_ty
            }
            _ => {
                self.error("invalid assignment target", span);
                value_ty
            }
        }
    }

    fn check_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        named_args: &[(String, Expr)],
        span: Span,
    ) -> TypePtr {
        let arg_types: Vec<TypePtr> = args.iter().map(|a| self.check_expression(a)).collect();
        for (_, value) in named_args {
            self.check_expression(value);
        }
        let total_args = args.len() + named_args.len();

        // Direct call to a declared function or builtin.
        if let ExprKind::Ident(name) = &callee.kind {
            if let Some(sig) = self.symbols.find_function(name).cloned() {
                self.expr_types.insert(
                    callee.id,
                    Arc::new(Type::Function {
                        params: sig.params.clone(),
                        ret: Arc::clone(&sig.return_type),
                    }),
                );
                self.check_args_against(&sig, &arg_types, total_args, span);
                return Arc::clone(&sig.return_type);
            }
            if let Some(builtin) = find_builtin(name) {
                let params: Vec<TypePtr> = builtin
                    .param_types
                    .iter()
                    .map(|t| self.types.get_type(t))
                    .collect();
                let ret = self.types.get_type(builtin.return_type);
                let sig = FunctionSignature {
                    name: builtin.name.to_string(),
                    params,
                    first_optional: builtin.first_optional,
                    return_type: Arc::clone(&ret),
                    can_fail: false,
                    error_types: vec![],
                    is_generic_error: false,
                };
                self.check_args_against(&sig, &arg_types, total_args, span);
                return ret;
            }
        }

        // Higher-order call through a function-typed value.
        let callee_ty = self.check_expression(callee);
        match callee_ty.as_ref() {
            Type::Function { params, ret } => {
                if params.len() != total_args {
                    self.error(
                        format!(
                            "wrong number of arguments: expected {}, got {}",
                            params.len(),
                            total_args
                        ),
                        span,
                    );
                }
                for (arg, (given, expected)) in
                    args.iter().zip(arg_types.iter().zip(params.iter()))
                {
                    if !self.types.is_compatible(given, expected) {
                        self.error_with(
                            TypeCheckError::new(
                                format!(
                                    "argument of type `{}` is not convertible to `{}`",
                                    given, expected
                                ),
                                arg.span.line,
                                arg.span.column,
                            )
                            .with_expected(expected.to_string()),
                        );
                    }
                }
                Arc::clone(ret)
            }
            Type::Any => self.types.any_type(),
            other => {
                self.error(format!("cannot call non-function type `{}`", other), span);
                self.types.any_type()
            }
        }
    }

    fn check_args_against(
        &mut self,
        sig: &FunctionSignature,
        arg_types: &[TypePtr],
        total_args: usize,
        span: Span,
    ) {
        if !sig.is_valid_arg_count(total_args) {
            self.error_with(
                TypeCheckError::new(
                    format!(
                        "wrong number of arguments to `{}`: expected {}..={}, got {}",
                        sig.name,
                        sig.min_required_args(),
                        sig.params.len(),
                        total_args
                    ),
                    span.line,
                    span.column,
                )
                .with_lexeme(sig.name.as_str()),
            );
        }
        for (given, expected) in arg_types.iter().zip(sig.params.iter()) {
            if !self.types.is_compatible(given, expected) {
                self.error_with(
                    TypeCheckError::new(
                        format!(
                            "argument to `{}` has type `{}`, expected `{}`",
                            sig.name, given, expected
                        ),
                        span.line,
                        span.column,
                    )
                    .with_lexeme(sig.name.as_str())
                    .with_expected(expected.to_string()),
                );
            }
        }
    }

    fn check_member(&mut self, object: &Expr, name: &str, span: Span) -> TypePtr {
        // Enum variant access by enum name.
        if let ExprKind::Ident(type_name) = &object.kind {
            if let Some(ty) = self.named_types.get(type_name).cloned() {
                if let Type::Enum { variants, .. } = ty.as_ref() {
                    self.expr_types.insert(object.id, Arc::clone(&ty));
                    if !variants.iter().any(|v| v == name) {
                        self.error(
                            format!("`{}` is not a variant of `{}`", name, type_name),
                            span,
                        );
                    }
                    return ty;
                }
            }
        }
        let object_ty = self.check_expression(object);
        match object_ty.as_ref() {
            Type::UserDefined { fields, .. } => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, ty)| Arc::clone(ty))
                .unwrap_or_else(|| {
                    self.error(
                        format!("no field `{}` on type `{}`", name, object_ty),
                        span,
                    );
                    self.types.any_type()
                }),
            _ => self.types.any_type(),
        }
    }

    fn check_index(&mut self, object: &Expr, index: &Expr, span: Span) -> TypePtr {
        let object_ty = self.check_expression(object);
        let index_ty = self.check_expression(index);
        match object_ty.as_ref() {
            Type::List(elem) => {
                if !index_ty.is_numeric() && !matches!(index_ty.as_ref(), Type::Any) {
                    self.error(
                        format!("list index must be numeric, got `{}`", index_ty),
                        span,
                    );
                }
                Arc::clone(elem)
            }
            Type::Dict(key, value) => {
                if !self.types.is_compatible(&index_ty, key) {
                    self.error(
                        format!("dict key has type `{}`, expected `{}`", index_ty, key),
                        span,
                    );
                }
                Arc::clone(value)
            }
            Type::Tuple(elems) => {
                if let ExprKind::Int(i) = &index.kind {
                    let i = *i;
                    if i >= 0 && (i as usize) < elems.len() {
                        return Arc::clone(&elems[i as usize]);
                    }
                    self.error(format!("tuple index {} out of bounds", i), span);
                }
                self.types.any_type()
            }
            Type::String => self.types.string_type(),
            _ => self.types.any_type(),
        }
    }

    fn check_lambda(
        &mut self,
        params: &[Param],
        return_ty: Option<&TypeExpr>,
        body: &[Stmt],
        span: Span,
    ) -> TypePtr {
        let param_types: Vec<TypePtr> = params
            .iter()
            .map(|p| {
                p.ty.as_ref()
                    .map(|t| self.resolve_type_expr(t, p.span))
                    .unwrap_or_else(|| self.types.any_type())
            })
            .collect();

        self.symbols.begin_scope();
        for (param, ty) in params.iter().zip(&param_types) {
            self.declare_var(&param.name, Arc::clone(ty), param.span);
        }
        for stmt in body {
            self.check_statement(stmt);
        }
        let inferred = self.infer_block_return_type(body);
        self.symbols.end_scope();

        let ret = match return_ty {
            Some(t) => {
                let declared = self.resolve_type_expr(t, span);
                if !self.types.is_compatible(&inferred, &declared) {
                    self.error(
                        format!(
                            "lambda body returns `{}`, declared `{}`",
                            inferred, declared
                        ),
                        span,
                    );
                }
                declared
            }
            None => inferred,
        };
        Arc::new(Type::Function { params: param_types, ret })
    }

    /// Infer a body's return type from its (already checked) return statements
    fn infer_block_return_type(&self, body: &[Stmt]) -> TypePtr {
        fn walk(checker: &TypeChecker, stmts: &[Stmt], found: &mut Option<TypePtr>) {
            for stmt in stmts {
                match &stmt.kind {
                    StmtKind::Return(Some(expr)) => {
                        if let Some(ty) = checker.expr_type(expr.id) {
                            *found = Some(match found.take() {
                                Some(prev) => checker.types.get_common_type(&prev, &ty),
                                None => ty,
                            });
                        }
                    }
                    StmtKind::Return(None) => {}
                    StmtKind::If { then_branch, else_branch, .. } => {
                        walk(checker, then_branch, found);
                        if let Some(else_branch) = else_branch {
                            walk(checker, else_branch, found);
                        }
                    }
                    StmtKind::While { body, .. }
                    | StmtKind::Iter { body, .. }
                    | StmtKind::For { body, .. }
                    | StmtKind::Block(body) => walk(checker, body, found),
                    StmtKind::Match { arms, .. } => {
                        for arm in arms {
                            walk(checker, &arm.body, found);
                        }
                    }
                    _ => {}
                }
            }
        }
        let mut found = None;
        walk(self, body, &mut found);
        found.unwrap_or_else(|| self.types.nil_type())
    }

    // ========================================================================
    // Error-handling expressions
    // ========================================================================

    fn check_ok(&mut self, inner: &Expr, span: Span) -> TypePtr {
        let inner_ty = self.check_expression(inner);
        let Some(ctx) = self.current_function.clone() else {
            self.error("`ok(...)` outside of a fallible function", span);
            return self
                .types
                .create_error_union_type(inner_ty, vec![], true);
        };
        if !ctx.signature.can_fail {
            self.error(
                format!(
                    "`ok(...)` in function `{}` which does not declare error types",
                    ctx.signature.name
                ),
                span,
            );
            return self.types.create_error_union_type(inner_ty, vec![], true);
        }
        if let Type::ErrorUnion { success, .. } = ctx.signature.return_type.as_ref() {
            if !self.types.is_compatible(&inner_ty, success) {
                self.error(
                    format!(
                        "`ok(...)` value has type `{}`, expected `{}`",
                        inner_ty, success
                    ),
                    span,
                );
            }
        }
        Arc::clone(&ctx.signature.return_type)
    }

    fn check_err(&mut self, error_type: &str, args: &[Expr], span: Span) -> TypePtr {
        for arg in args {
            self.check_expression(arg);
        }
        if !self.types.is_error_type(error_type) {
            self.error_with(
                TypeCheckError::new(
                    format!("unknown error type `{}`", error_type),
                    span.line,
                    span.column,
                )
                .with_lexeme(error_type),
            );
        }
        if self.current_function.is_none() {
            self.error(
                format!("`err({})` outside of a fallible function", error_type),
                span,
            );
            let nil = self.types.nil_type();
            return self
                .types
                .create_error_union_type(nil, vec![error_type.to_string()], false);
        }
        if let Some(ctx) = self.current_function.as_mut() {
            ctx.produced_errors.insert(error_type.to_string());
        }
        let ctx = self
            .current_function
            .clone()
            .unwrap_or_else(|| unreachable!("checked above"));
        if !ctx.signature.can_fail {
            self.error(
                format!(
                    "`err({})` in function `{}` which does not declare error types",
                    error_type, ctx.signature.name
                ),
                span,
            );
        } else if !ctx.signature.is_generic_error
            && self.types.is_error_type(error_type)
            && !ctx.signature.error_types.iter().any(|e| e == error_type)
        {
            self.error(
                format!(
                    "error type `{}` is not declared by function `{}`",
                    error_type, ctx.signature.name
                ),
                span,
            );
        }
        if ctx.signature.can_fail {
            Arc::clone(&ctx.signature.return_type)
        } else {
            let nil = self.types.nil_type();
            self.types
                .create_error_union_type(nil, vec![error_type.to_string()], false)
        }
    }

    fn check_fallible(
        &mut self,
        inner: &Expr,
        handler: Option<&Expr>,
        span: Span,
    ) -> TypePtr {
        let inner_ty = self.check_expression(inner);
        let Type::ErrorUnion { success, errors, is_generic } = inner_ty.as_ref() else {
            self.error(
                format!("`?` applied to non-fallible expression of type `{}`", inner_ty),
                span,
            );
            return inner_ty;
        };
        let success = Arc::clone(success);

        if let Some(handler) = handler {
            // Locally handled: the error never escapes.
            let handler_ty = self.check_expression(handler);
            if !self.types.is_compatible(&handler_ty, &success) {
                self.error(
                    format!(
                        "`else` handler has type `{}`, expected `{}`",
                        handler_ty, success
                    ),
                    handler.span,
                );
            }
            return success;
        }

        // Propagation: the enclosing function must be fallible and its
        // declared set must cover everything this expression can produce.
        let Some(ctx) = self.current_function.clone() else {
            self.error("`?` outside of a function cannot propagate errors", span);
            return success;
        };
        if !ctx.signature.can_fail {
            self.error(
                format!(
                    "`?` in function `{}` which does not declare error types; error types must be declared",
                    ctx.signature.name
                ),
                span,
            );
            return success;
        }
        if !ctx.signature.is_generic_error {
            if *is_generic {
                self.error(
                    format!(
                        "generic error set cannot be propagated by function `{}` with a specific error set",
                        ctx.signature.name
                    ),
                    span,
                );
            } else {
                for e in errors {
                    if !ctx.signature.error_types.iter().any(|d| d == e) {
                        self.error(
                            format!(
                                "error type `{}` cannot be propagated by function `{}`",
                                e, ctx.signature.name
                            ),
                            span,
                        );
                    }
                }
            }
        }
        if let Some(ctx) = self.current_function.as_mut() {
            for e in errors {
                ctx.produced_errors.insert(e.clone());
            }
        }
        success
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort callee name for unhandled-fallible diagnostics
fn callee_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Call { callee, .. } => match &callee.kind {
            ExprKind::Ident(name) => Some(name.clone()),
            ExprKind::Member { name, .. } => Some(name.clone()),
            _ => None,
        },
        _ => None,
    }
}
