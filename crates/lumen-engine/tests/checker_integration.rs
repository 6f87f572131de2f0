//! Type checker integration tests: the error-handling discipline across
//! whole programs.

mod common;

use common::*;
use lumen_engine::ast::*;
use lumen_engine::{Span, TypeChecker};

#[test]
fn safe_division_program_checks_clean() {
    let program = program(vec![
        stmt(StmtKind::Function(divide_decl())),
        stmt(StmtKind::Function(main_decl())),
    ]);
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program);
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
}

#[test]
fn unhandled_fallible_emits_exactly_one_semantic_error() {
    // fn f() { divide(1, 2); }
    let f = FunctionDecl {
        name: "f".to_string(),
        params: vec![],
        return_ty: None,
        throws: None,
        body: vec![stmt_at(
            StmtKind::Expression(call("divide", vec![int_lit(1), int_lit(2)])),
            4,
        )],
        visibility: Visibility::Public,
        span: Span::line(3),
    };
    let program = program(vec![
        stmt(StmtKind::Function(divide_decl())),
        stmt(StmtKind::Function(f)),
    ]);
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program);
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].message.contains("unhandled fallible expression"));
    assert!(errors[0].message.contains("divide"));

    // The catalogue classifies it into the semantic (E2xx) range.
    let diag = lumen_engine::global_catalog().read().report(
        lumen_engine::ErrorStage::Semantic,
        &errors[0].message,
        "main.lm",
        errors[0].line,
        errors[0].column,
        errors[0].lexeme.as_deref(),
        None,
    );
    let number: u32 = diag.code[1..].parse().unwrap();
    assert!((200..300).contains(&number), "code {} not in E2xx", diag.code);
}

#[test]
fn propagation_with_incompatible_set_names_both() {
    // fn g(): int?IndexOutOfBounds { var x = divide(1, 0)?; return ok(x); }
    let g = FunctionDecl {
        name: "g".to_string(),
        params: vec![],
        return_ty: Some(int_error_union(&["IndexOutOfBounds"])),
        throws: Some(throws(&["IndexOutOfBounds"])),
        body: vec![
            stmt(StmtKind::VarDecl {
                name: "x".to_string(),
                visibility: Visibility::Private,
                ty: None,
                init: Some(expr(ExprKind::Fallible {
                    inner: Box::new(call("divide", vec![int_lit(1), int_lit(0)])),
                    handler: None,
                })),
            }),
            stmt(StmtKind::Return(Some(expr(ExprKind::Ok(Box::new(ident(
                "x",
            ))))))),
        ],
        visibility: Visibility::Public,
        span: Span::line(2),
    };
    let program = program(vec![
        stmt(StmtKind::Function(divide_decl())),
        stmt(StmtKind::Function(g)),
    ]);
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program);
    assert!(
        errors.iter().any(|e| e
            .message
            .contains("error type `DivisionByZero` cannot be propagated by function `g`")),
        "{:?}",
        errors
    );
}

#[test]
fn exhaustive_match_missing_variant_is_named_and_fixable() {
    // fn two(): int?DivisionByZero,IndexOutOfBounds producing both errors.
    let two = FunctionDecl {
        name: "two".to_string(),
        params: vec![param("k", "int")],
        return_ty: Some(int_error_union(&["DivisionByZero", "IndexOutOfBounds"])),
        throws: Some(throws(&["DivisionByZero", "IndexOutOfBounds"])),
        body: vec![
            stmt(StmtKind::If {
                condition: expr(ExprKind::Binary {
                    op: BinaryOp::Eq,
                    left: Box::new(ident("k")),
                    right: Box::new(int_lit(0)),
                }),
                then_branch: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Err {
                    error_type: "DivisionByZero".to_string(),
                    args: vec![],
                }))))],
                else_branch: Some(vec![stmt(StmtKind::If {
                    condition: expr(ExprKind::Binary {
                        op: BinaryOp::Eq,
                        left: Box::new(ident("k")),
                        right: Box::new(int_lit(1)),
                    }),
                    then_branch: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Err {
                        error_type: "IndexOutOfBounds".to_string(),
                        args: vec![],
                    }))))],
                    else_branch: None,
                })]),
            }),
            stmt(StmtKind::Return(Some(expr(ExprKind::Ok(Box::new(ident(
                "k",
            ))))))),
        ],
        visibility: Visibility::Public,
        span: Span::line(1),
    };

    let match_missing_one = |arms: Vec<MatchArm>| {
        program(vec![
            stmt(StmtKind::Function(two.clone())),
            stmt(StmtKind::Match {
                scrutinee: call("two", vec![int_lit(0)]),
                arms,
            }),
        ])
    };

    let val_arm = MatchArm {
        pattern: Pattern::Val(Some("v".to_string())),
        guard: None,
        body: vec![],
        span: Span::line(1),
    };
    let err_a = MatchArm {
        pattern: Pattern::Err {
            error_type: Some("DivisionByZero".to_string()),
            binding: None,
        },
        guard: None,
        body: vec![],
        span: Span::line(1),
    };

    // Missing IndexOutOfBounds: rejected, and the message names it.
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&match_missing_one(vec![val_arm.clone(), err_a.clone()]));
    assert!(
        errors
            .iter()
            .any(|e| e.message.contains("non-exhaustive match")
                && e.message.contains("IndexOutOfBounds")),
        "{:?}",
        errors
    );

    // Adding the missing arm makes it accept.
    let err_b = MatchArm {
        pattern: Pattern::Err {
            error_type: Some("IndexOutOfBounds".to_string()),
            binding: None,
        },
        guard: None,
        body: vec![],
        span: Span::line(1),
    };
    let mut checker = TypeChecker::new();
    let errors =
        checker.check_program(&match_missing_one(vec![val_arm.clone(), err_a.clone(), err_b]));
    assert!(errors.is_empty(), "{:?}", errors);

    // A generic err arm also covers everything.
    let generic = MatchArm {
        pattern: Pattern::Err { error_type: None, binding: Some("e".to_string()) },
        guard: None,
        body: vec![],
        span: Span::line(1),
    };
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&match_missing_one(vec![val_arm, generic]));
    assert!(errors.is_empty(), "{:?}", errors);
}

#[test]
fn throws_without_error_union_return_is_rejected() {
    let f = FunctionDecl {
        name: "f".to_string(),
        params: vec![],
        return_ty: Some(TypeExpr::Named("int".to_string())),
        throws: Some(throws(&["DivisionByZero"])),
        body: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Err {
            error_type: "DivisionByZero".to_string(),
            args: vec![],
        }))))],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![stmt(StmtKind::Function(f))]));
    assert!(
        errors
            .iter()
            .any(|e| e.message.contains("not an error union")),
        "{:?}",
        errors
    );
}

#[test]
fn declared_set_must_match_return_type_set() {
    // throws DivisionByZero but return type declares IndexOutOfBounds
    let f = FunctionDecl {
        name: "f".to_string(),
        params: vec![],
        return_ty: Some(int_error_union(&["IndexOutOfBounds"])),
        throws: Some(throws(&["DivisionByZero"])),
        body: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Err {
            error_type: "DivisionByZero".to_string(),
            args: vec![],
        }))))],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![stmt(StmtKind::Function(f))]));
    assert!(
        errors
            .iter()
            .any(|e| e.message.contains("does not match its return type")),
        "{:?}",
        errors
    );
}

#[test]
fn widening_enforced_on_declarations() {
    // var ok: i64 = <i8 value by annotation chain> works through calls;
    // assigning an int literal (platform word) to an i8 variable does not.
    let narrow = stmt(StmtKind::VarDecl {
        name: "narrow".to_string(),
        visibility: Visibility::Private,
        ty: Some(TypeExpr::Named("i8".to_string())),
        init: Some(int_lit(1)),
    });
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![narrow]));
    assert_eq!(errors.len(), 1, "{:?}", errors);

    let widen = stmt(StmtKind::VarDecl {
        name: "wide".to_string(),
        visibility: Visibility::Private,
        ty: Some(TypeExpr::Named("i64".to_string())),
        init: Some(int_lit(1)),
    });
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![widen]));
    assert!(errors.is_empty(), "{:?}", errors);

    // Float64 -> Float32 never narrows.
    let narrow_float = stmt(StmtKind::VarDecl {
        name: "nf".to_string(),
        visibility: Visibility::Private,
        ty: Some(TypeExpr::Named("f32".to_string())),
        init: Some(expr(ExprKind::Float(1.5))),
    });
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![narrow_float]));
    assert_eq!(errors.len(), 1, "{:?}", errors);
}

#[test]
fn enum_match_exhaustiveness() {
    let color = EnumDecl {
        name: "Color".to_string(),
        variants: vec![
            EnumVariant { name: "Red".to_string(), payload: None },
            EnumVariant { name: "Green".to_string(), payload: None },
            EnumVariant { name: "Blue".to_string(), payload: None },
        ],
        span: Span::line(1),
    };
    let arm = |name: &str| MatchArm {
        pattern: Pattern::Variant { name: name.to_string(), inner: None },
        guard: None,
        body: vec![],
        span: Span::line(2),
    };
    let program_with = |arms: Vec<MatchArm>| {
        program(vec![
            stmt(StmtKind::Enum(color.clone())),
            stmt(StmtKind::VarDecl {
                name: "c".to_string(),
                visibility: Visibility::Private,
                ty: Some(TypeExpr::Named("Color".to_string())),
                init: None,
            }),
            stmt(StmtKind::Match { scrutinee: ident("c"), arms }),
        ])
    };

    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program_with(vec![arm("Red"), arm("Green")]));
    assert!(
        errors.iter().any(|e| e.message.contains("Blue")),
        "{:?}",
        errors
    );

    let mut checker = TypeChecker::new();
    let errors =
        checker.check_program(&program_with(vec![arm("Red"), arm("Green"), arm("Blue")]));
    assert!(errors.is_empty(), "{:?}", errors);
}

#[test]
fn higher_order_call_uses_checker_types() {
    // fn apply(f: fn(int) -> int, x: int): int { return f(x); }
    let apply = FunctionDecl {
        name: "apply".to_string(),
        params: vec![
            Param {
                name: "f".to_string(),
                ty: Some(TypeExpr::Function(
                    vec![TypeExpr::Named("int".to_string())],
                    Box::new(TypeExpr::Named("int".to_string())),
                )),
                default: None,
                span: Span::line(1),
            },
            param("x", "int"),
        ],
        return_ty: Some(TypeExpr::Named("int".to_string())),
        throws: None,
        body: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Call {
            callee: Box::new(ident("f")),
            args: vec![ident("x")],
            named_args: vec![],
        }))))],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![stmt(StmtKind::Function(apply))]));
    assert!(errors.is_empty(), "{:?}", errors);
}

#[test]
fn optional_parameters_relax_arity() {
    // fn greet(name: str, punct: str = "!") : str
    let greet = FunctionDecl {
        name: "greet".to_string(),
        params: vec![
            param("name", "str"),
            Param {
                name: "punct".to_string(),
                ty: Some(TypeExpr::Named("str".to_string())),
                default: Some(expr(ExprKind::Str("!".to_string()))),
                span: Span::line(1),
            },
        ],
        return_ty: Some(TypeExpr::Named("str".to_string())),
        throws: None,
        body: vec![stmt(StmtKind::Return(Some(ident("name"))))],
        visibility: Visibility::Public,
        span: Span::line(1),
    };
    let one_arg = stmt(StmtKind::Expression(expr(ExprKind::Call {
        callee: Box::new(ident("greet")),
        args: vec![expr(ExprKind::Str("lumen".to_string()))],
        named_args: vec![],
    })));
    let three_args = stmt(StmtKind::Expression(expr(ExprKind::Call {
        callee: Box::new(ident("greet")),
        args: vec![
            expr(ExprKind::Str("a".to_string())),
            expr(ExprKind::Str("b".to_string())),
            expr(ExprKind::Str("c".to_string())),
        ],
        named_args: vec![],
    })));

    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![
        stmt(StmtKind::Function(greet.clone())),
        one_arg,
    ]));
    assert!(errors.is_empty(), "{:?}", errors);

    let mut checker = TypeChecker::new();
    let errors = checker.check_program(&program(vec![stmt(StmtKind::Function(greet)), three_args]));
    assert!(
        errors
            .iter()
            .any(|e| e.message.contains("wrong number of arguments")),
        "{:?}",
        errors
    );
}
