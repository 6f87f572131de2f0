//! End-to-end JIT tests: checked AST → LIR → native code, executed
//! in-process and cross-checked against the register VM.

#![cfg(feature = "jit")]

mod common;

use common::*;
use lumen_engine::ast::*;
use lumen_engine::{
    CompileMode, JitBackend, LirBuilder, LirFunction, LirInterpreter, RegValue, Span, TypeChecker,
};

fn build(program: &lumen_engine::Program) -> Vec<LirFunction> {
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(program);
    assert!(errors.is_empty(), "checker errors: {:?}", errors);
    let mut builder = LirBuilder::new(&checker);
    let functions = builder.build_program(program);
    assert!(builder.diagnostics().is_empty(), "{:?}", builder.diagnostics());
    functions
}

/// Seed scenario: safe division through the whole stack. The program
/// type-checks clean and the JIT-compiled `main` returns 5.
#[test]
fn safe_division_end_to_end() {
    let program = program(vec![
        stmt(StmtKind::Function(divide_decl())),
        stmt(StmtKind::Function(main_decl())),
    ]);
    let functions = build(&program);

    let mut backend = JitBackend::new();
    for func in functions {
        backend.process_function(func);
    }
    let outcome = backend.compile(CompileMode::ToMemory, None);
    assert!(outcome.success, "{}", outcome.error_message);
    assert!(outcome.function_ptr.is_some());

    // `main` was processed last, so it is the executable entry.
    assert_eq!(backend.execute_compiled_function(&[]), 5);

    let stats = backend.get_stats();
    assert_eq!(stats.functions_compiled, 2);
    assert!(stats.instructions_compiled > 0);
}

#[test]
fn error_arm_taken_on_division_by_zero() {
    // main_zero matches divide(10, 0) and lands in the err arm.
    let main_zero = FunctionDecl {
        name: "main_zero".to_string(),
        params: vec![],
        return_ty: Some(TypeExpr::Named("int".to_string())),
        throws: None,
        body: vec![stmt(StmtKind::Match {
            scrutinee: call("divide", vec![int_lit(10), int_lit(0)]),
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
    };
    let program = program(vec![
        stmt(StmtKind::Function(divide_decl())),
        stmt(StmtKind::Function(main_zero)),
    ]);
    let functions = build(&program);

    let mut backend = JitBackend::new();
    for func in functions {
        backend.process_function(func);
    }
    let outcome = backend.compile(CompileMode::ToMemory, None);
    assert!(outcome.success, "{}", outcome.error_message);
    assert_eq!(backend.execute_compiled_function(&[]), -1);
}

#[test]
fn propagation_returns_the_error_to_the_caller() {
    // fn relay(a: int, b: int): int?DivisionByZero { return ok(divide(a, b)?); }
    // fn check(): int { match relay(9, 0) { val v => return v; err ... => return -3 } }
    let relay = FunctionDecl {
        name: "relay".to_string(),
        params: vec![param("a", "int"), param("b", "int")],
        return_ty: Some(int_error_union(&["DivisionByZero"])),
        throws: Some(throws(&["DivisionByZero"])),
        body: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Ok(Box::new(
            expr(ExprKind::Fallible {
                inner: Box::new(call("divide", vec![ident("a"), ident("b")])),
                handler: None,
            }),
        ))))))],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let check = FunctionDecl {
        name: "check".to_string(),
        params: vec![],
        return_ty: Some(TypeExpr::Named("int".to_string())),
        throws: None,
        body: vec![stmt(StmtKind::Match {
            scrutinee: call("relay", vec![int_lit(9), int_lit(0)]),
            arms: vec![
                MatchArm {
                    pattern: Pattern::Val(Some("v".to_string())),
                    guard: None,
                    body: vec![stmt(StmtKind::Return(Some(ident("v"))))],
                    span: Span::line(1),
                },
                MatchArm {
                    pattern: Pattern::Err { error_type: None, binding: None },
                    guard: None,
                    body: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(int_lit(3)),
                    }))))],
                    span: Span::line(1),
                },
            ],
        })],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let program = program(vec![
        stmt(StmtKind::Function(divide_decl())),
        stmt(StmtKind::Function(relay)),
        stmt(StmtKind::Function(check)),
    ]);
    let functions = build(&program);

    let mut backend = JitBackend::new();
    for func in functions {
        backend.process_function(func);
    }
    let outcome = backend.compile(CompileMode::ToMemory, None);
    assert!(outcome.success, "{}", outcome.error_message);
    assert_eq!(backend.execute_compiled_function(&[]), -3);
}

#[test]
fn jit_agrees_with_register_vm_oracle() {
    // fn poly(a: int, b: int): int { if (a < b) { return a * 3 + b; } return a - b; }
    let poly = FunctionDecl {
        name: "poly".to_string(),
        params: vec![param("a", "int"), param("b", "int")],
        return_ty: Some(TypeExpr::Named("int".to_string())),
        throws: None,
        body: vec![
            stmt(StmtKind::If {
                condition: expr(ExprKind::Binary {
                    op: BinaryOp::Lt,
                    left: Box::new(ident("a")),
                    right: Box::new(ident("b")),
                }),
                then_branch: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(expr(ExprKind::Binary {
                        op: BinaryOp::Mul,
                        left: Box::new(ident("a")),
                        right: Box::new(int_lit(3)),
                    })),
                    right: Box::new(ident("b")),
                }))))],
                else_branch: None,
            }),
            stmt(StmtKind::Return(Some(expr(ExprKind::Binary {
                op: BinaryOp::Sub,
                left: Box::new(ident("a")),
                right: Box::new(ident("b")),
            })))),
        ],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let functions = build(&program(vec![stmt(StmtKind::Function(poly))]));
    let poly_lir = functions[0].clone();

    let mut backend = JitBackend::new();
    backend.process_function(functions.into_iter().next().unwrap());
    let outcome = backend.compile(CompileMode::ToMemory, None);
    assert!(outcome.success, "{}", outcome.error_message);

    for (a, b) in [(1, 5), (5, 1), (0, 0), (-4, 2), (7, -9)] {
        let jit_result = backend.execute_compiled_function(&[a, b]);
        let mut interp = LirInterpreter::new();
        let oracle = interp
            .execute(&poly_lir, &[RegValue::Int(a), RegValue::Int(b)])
            .unwrap();
        assert_eq!(RegValue::Int(jit_result), oracle, "a={}, b={}", a, b);
    }
}

#[test]
fn adder_function_returns_seven() {
    // fn add(a: int, b: int): int { return a + b; } — add(3, 4) == 7
    let add = FunctionDecl {
        name: "add".to_string(),
        params: vec![param("a", "int"), param("b", "int")],
        return_ty: Some(TypeExpr::Named("int".to_string())),
        throws: None,
        body: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(ident("a")),
            right: Box::new(ident("b")),
        }))))],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let functions = build(&program(vec![stmt(StmtKind::Function(add))]));

    let mut backend = JitBackend::new();
    backend.process_function(functions.into_iter().next().unwrap());
    let outcome = backend.compile(CompileMode::ToMemory, None);
    assert!(outcome.success, "{}", outcome.error_message);
    assert_eq!(backend.execute_compiled_function(&[3, 4]), 7);
}

#[test]
fn optimizations_do_not_change_results() {
    let make_backend = |optimize: bool| {
        let program = program(vec![
            stmt(StmtKind::Function(divide_decl())),
            stmt(StmtKind::Function(main_decl())),
        ]);
        let functions = build(&program);
        let mut backend = JitBackend::new();
        backend.enable_optimizations(optimize);
        for func in functions {
            backend.process_function(func);
        }
        let outcome = backend.compile(CompileMode::ToMemory, None);
        assert!(outcome.success, "{}", outcome.error_message);
        backend.execute_compiled_function(&[])
    };
    assert_eq!(make_backend(true), make_backend(false));
}

#[cfg(feature = "aot")]
mod aot {
    use super::*;

    #[test]
    fn to_file_emits_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("divide.o");

        let program = program(vec![stmt(StmtKind::Function(divide_decl()))]);
        let functions = build(&program);
        let mut backend = JitBackend::new();
        for func in functions {
            backend.process_function(func);
        }
        let outcome = backend.compile(CompileMode::ToFile, Some(&path));
        assert!(outcome.success, "{}", outcome.error_message);
        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.is_empty());
    }
}
