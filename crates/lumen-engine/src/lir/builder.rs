//! AST → LIR lowering
//!
//! Consumes the type-checked AST and emits three-address instructions with
//! a control-flow graph built alongside. Jumps target label ids; a label's
//! block is created eagerly on first reference and the edge patched when
//! the label is emitted. Register allocation is monotonic per function.
//!
//! Error unions are lowered to a word-tagged `i64`: the low bit is the
//! error flag, the payload lives in the upper bits. `ConstructOk`,
//! `ConstructError`, `IsError`, and `Unwrap` stay first-class ops so both
//! the JIT and the optimizer see them; the tagging is the JIT's concern.
//!
//! Constructs outside the JIT-able subset (classes, iterator loops, the
//! concurrency blocks) are reported through the catalogue and skipped; the
//! bytecode path covers them.

use super::function::LirFunction;
use super::instr::{AbiType, LirInst, LirOp, Reg, SourceLoc, NO_REG};
use crate::checker::TypeChecker;
use crate::diagnostics::catalog::{global_catalog, Diagnostic};
use crate::diagnostics::codes::ErrorStage;
use crate::parser::ast::*;
use crate::types::{Type, TypePtr, Value, ValueData};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Per-function lowering state
struct FuncCtx {
    func: LirFunction,
    current_block: u32,
    /// Label id → block id
    label_blocks: FxHashMap<u32, u32>,
    next_label: u32,
    /// (continue label, break label) per enclosing loop
    loop_stack: Vec<(u32, u32)>,
}

impl FuncCtx {
    fn new(name: &str, param_count: u32) -> Self {
        let mut func = LirFunction::new(name, param_count);
        let entry = func.cfg.create_block("entry");
        FuncCtx {
            func,
            current_block: entry,
            label_blocks: FxHashMap::default(),
            next_label: 0,
            loop_stack: Vec::new(),
        }
    }

    fn new_label(&mut self) -> u32 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// The block a label lives in, created eagerly for forward references
    fn block_for_label(&mut self, label: u32) -> u32 {
        if let Some(&block) = self.label_blocks.get(&label) {
            return block;
        }
        let block = self.func.cfg.create_block(format!("L{}", label));
        self.label_blocks.insert(label, block);
        block
    }

    /// Append to both the linear vector and the current block
    fn emit(&mut self, inst: LirInst) {
        if let Some(block) = self.func.cfg.block_mut(self.current_block) {
            block.push(inst.clone());
        }
        self.func.push(inst);
    }

    fn emit_label(&mut self, label: u32) {
        // Close a falling-through block with an explicit jump so every
        // non-terminal block ends in a terminator.
        let terminated = self
            .func
            .cfg
            .block(self.current_block)
            .map(|b| b.has_terminator())
            .unwrap_or(true);
        if !terminated {
            self.emit_jump(label);
        }
        let block = self.block_for_label(label);
        self.current_block = block;
        self.emit(LirInst::with_imm(LirOp::Label, AbiType::Void, NO_REG, label));
    }

    fn emit_jump(&mut self, label: u32) {
        // A jump after a terminator is dead; emit nothing.
        let terminated = self
            .func
            .cfg
            .block(self.current_block)
            .map(|b| b.has_terminator())
            .unwrap_or(false);
        if terminated {
            return;
        }
        let target = self.block_for_label(label);
        self.emit(LirInst::with_imm(LirOp::Jump, AbiType::Void, NO_REG, label));
        self.func.cfg.add_edge(self.current_block, target);
        if let Some(block) = self.func.cfg.block_mut(self.current_block) {
            block.terminated = true;
        }
    }

    /// Conditional jump; the fall-through continuation gets its own block
    fn emit_cond_jump(&mut self, op: LirOp, cond: Reg, label: u32) {
        let target = self.block_for_label(label);
        let mut inst = LirInst::with_imm(op, AbiType::Void, NO_REG, label);
        inst.a = cond;
        self.emit(inst);
        self.func.cfg.add_edge(self.current_block, target);
        let fallthrough = self.func.cfg.create_block("");
        self.func.cfg.add_edge(self.current_block, fallthrough);
        self.current_block = fallthrough;
    }

    fn emit_return(&mut self, value: Option<Reg>, loc: SourceLoc) {
        let inst = match value {
            Some(reg) => {
                let ty = self.func.register_type(reg);
                LirInst::new(LirOp::Ret, ty, NO_REG, reg, NO_REG).at(loc)
            }
            None => LirInst::new(LirOp::Return, AbiType::Void, NO_REG, NO_REG, NO_REG).at(loc),
        };
        self.emit(inst);
        if let Some(block) = self.func.cfg.block_mut(self.current_block) {
            block.terminated = true;
        }
    }
}

/// Lowers a checked program into LIR functions
pub struct LirBuilder<'a> {
    checker: &'a TypeChecker,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> LirBuilder<'a> {
    /// Create a builder over a checked program's types
    pub fn new(checker: &'a TypeChecker) -> Self {
        LirBuilder { checker, diagnostics: Vec::new() }
    }

    /// Diagnostics emitted during lowering
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Lower every function in a program. Loose top-level statements are
    /// wrapped into a synthetic `__main` function.
    pub fn build_program(&mut self, program: &Program) -> Vec<LirFunction> {
        let mut functions = Vec::new();
        let mut loose: Vec<&Stmt> = Vec::new();
        for stmt in &program.statements {
            match &stmt.kind {
                StmtKind::Function(decl) => functions.push(self.build_function(decl)),
                _ => loose.push(stmt),
            }
        }
        if !loose.is_empty() {
            let mut ctx = FuncCtx::new("__main", 0);
            for stmt in &loose {
                self.lower_stmt(&mut ctx, stmt);
            }
            ctx.emit_return(None, SourceLoc::default());
            functions.push(self.finish(ctx));
        }
        functions
    }

    /// Lower a single function declaration
    pub fn build_function(&mut self, decl: &FunctionDecl) -> LirFunction {
        let mut ctx = FuncCtx::new(&decl.name, decl.params.len() as u32);
        let loc = SourceLoc::line(decl.span.line);

        ctx.emit(
            LirInst::new(LirOp::FuncDef, AbiType::Void, NO_REG, NO_REG, NO_REG)
                .at(loc.clone())
                .note(decl.name.clone()),
        );
        for param in &decl.params {
            let ty = self
                .checker
                .types()
                .get_type(annotation_name(param.ty.as_ref()));
            let abi = abi_type_of(&ty);
            let reg = ctx.func.allocate_register(abi);
            ctx.func.set_variable_register(&param.name, reg);
            ctx.func.set_register_language_type(reg, ty);
            ctx.emit(
                LirInst::new(LirOp::Param, abi, reg, NO_REG, NO_REG)
                    .at(loc.clone())
                    .note(param.name.clone()),
            );
        }
        ctx.func.return_type = decl
            .return_ty
            .as_ref()
            .map(|t| abi_type_of_expr(t))
            .unwrap_or(AbiType::Void);

        for stmt in &decl.body {
            self.lower_stmt(&mut ctx, stmt);
        }
        let needs_implicit_return = ctx
            .func
            .instructions
            .last()
            .map(|inst| !inst.is_return())
            .unwrap_or(true);
        if needs_implicit_return {
            ctx.emit_return(None, loc);
        }
        self.finish(ctx)
    }

    fn finish(&mut self, mut ctx: FuncCtx) -> LirFunction {
        ctx.func.cfg.mark_exits();
        ctx.func
    }

    fn report(&mut self, message: &str, line: u32) {
        let diag = global_catalog().read().report(
            ErrorStage::Compilation,
            message,
            "",
            line,
            0,
            None,
            None,
        );
        self.diagnostics.push(diag);
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn lower_stmt(&mut self, ctx: &mut FuncCtx, stmt: &Stmt) {
        let loc = SourceLoc::line(stmt.line());
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.lower_expr(ctx, expr);
            }
            StmtKind::VarDecl { name, init, .. } => {
                let reg = match init {
                    Some(init) => self.lower_expr(ctx, init),
                    None => self.load_const_int(ctx, 0, loc.clone()),
                };
                ctx.func.set_variable_register(name, reg);
                if let Some(ty) = init
                    .as_ref()
                    .and_then(|e| self.checker.expr_type(e.id))
                {
                    ctx.func.set_register_language_type(reg, ty);
                }
            }
            StmtKind::Return(value) => {
                let reg = value.as_ref().map(|v| self.lower_expr(ctx, v));
                ctx.emit_return(reg, loc);
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                let cond = self.lower_expr(ctx, condition);
                let else_label = ctx.new_label();
                let end_label = ctx.new_label();
                ctx.emit_cond_jump(LirOp::JumpIfFalse, cond, else_label);
                for stmt in then_branch {
                    self.lower_stmt(ctx, stmt);
                }
                ctx.emit_jump(end_label);
                ctx.emit_label(else_label);
                if let Some(else_branch) = else_branch {
                    for stmt in else_branch {
                        self.lower_stmt(ctx, stmt);
                    }
                }
                ctx.emit_label(end_label);
            }
            StmtKind::While { condition, body } => {
                let head = ctx.new_label();
                let end = ctx.new_label();
                ctx.emit_label(head);
                let cond = self.lower_expr(ctx, condition);
                ctx.emit_cond_jump(LirOp::JumpIfFalse, cond, end);
                ctx.loop_stack.push((head, end));
                for stmt in body {
                    self.lower_stmt(ctx, stmt);
                }
                ctx.loop_stack.pop();
                ctx.emit_jump(head);
                ctx.emit_label(end);
            }
            StmtKind::For { init, condition, increment, body } => {
                if let Some(init) = init {
                    self.lower_stmt(ctx, init);
                }
                let head = ctx.new_label();
                let cont = ctx.new_label();
                let end = ctx.new_label();
                ctx.emit_label(head);
                if let Some(condition) = condition {
                    let cond = self.lower_expr(ctx, condition);
                    ctx.emit_cond_jump(LirOp::JumpIfFalse, cond, end);
                }
                ctx.loop_stack.push((cont, end));
                for stmt in body {
                    self.lower_stmt(ctx, stmt);
                }
                ctx.loop_stack.pop();
                ctx.emit_label(cont);
                if let Some(increment) = increment {
                    self.lower_expr(ctx, increment);
                }
                ctx.emit_jump(head);
                ctx.emit_label(end);
            }
            StmtKind::Break => match ctx.loop_stack.last() {
                Some(&(_, end)) => ctx.emit_jump(end),
                None => self.report("break statement outside of loop", stmt.line()),
            },
            StmtKind::Continue => match ctx.loop_stack.last() {
                Some(&(cont, _)) => ctx.emit_jump(cont),
                None => self.report("continue statement outside of loop", stmt.line()),
            },
            StmtKind::Block(body) => {
                for stmt in body {
                    self.lower_stmt(ctx, stmt);
                }
            }
            StmtKind::Print(args) => {
                for arg in args {
                    let reg = self.lower_expr(ctx, arg);
                    let op = match ctx.func.register_type(reg) {
                        AbiType::F64 => LirOp::PrintFloat,
                        AbiType::Bool => LirOp::PrintBool,
                        AbiType::Ptr => LirOp::PrintString,
                        _ => {
                            if self.is_unsigned(arg) {
                                LirOp::PrintUint
                            } else {
                                LirOp::PrintInt
                            }
                        }
                    };
                    ctx.emit(LirInst::new(op, AbiType::Void, NO_REG, reg, NO_REG).at(loc.clone()));
                }
            }
            StmtKind::Match { scrutinee, arms } => {
                self.lower_match(ctx, scrutinee, arms, loc);
            }
            StmtKind::AtomicDecl { name, init } => {
                let reg = match init {
                    Some(init) => self.lower_expr(ctx, init),
                    None => self.load_const_int(ctx, 0, loc.clone()),
                };
                let slot = ctx.func.allocate_register(AbiType::I64);
                ctx.emit(
                    LirInst::new(LirOp::AtomicStore, AbiType::Void, NO_REG, slot, reg)
                        .at(loc)
                        .note(name.clone()),
                );
                ctx.func.set_variable_register(name, slot);
            }
            StmtKind::Contract { condition, message } => {
                // contract(cond, msg): skip the failure print when cond holds.
                let cond = self.lower_expr(ctx, condition);
                let ok = ctx.new_label();
                ctx.emit_cond_jump(LirOp::JumpIf, cond, ok);
                let msg = self.lower_expr(ctx, message);
                ctx.emit(
                    LirInst::new(LirOp::PrintString, AbiType::Void, NO_REG, msg, NO_REG)
                        .at(loc),
                );
                ctx.emit_label(ok);
            }
            StmtKind::Function(_) => {
                self.report(
                    "unsupported statement for LIR lowering: nested function",
                    stmt.line(),
                );
            }
            other => {
                self.report(
                    &format!(
                        "unsupported statement for LIR lowering: {}",
                        stmt_kind_name(other)
                    ),
                    stmt.line(),
                );
            }
        }
    }

    // ========================================================================
    // Match lowering
    // ========================================================================

    fn lower_match(
        &mut self,
        ctx: &mut FuncCtx,
        scrutinee: &Expr,
        arms: &[MatchArm],
        loc: SourceLoc,
    ) {
        let scrutinee_reg = self.lower_expr(ctx, scrutinee);
        let end = ctx.new_label();

        for arm in arms {
            let next = ctx.new_label();
            let mut next_used = true;
            match &arm.pattern {
                Pattern::Val(binding) => {
                    let is_err =
                        ctx.func.allocate_register(AbiType::Bool);
                    ctx.emit(
                        LirInst::new(LirOp::IsError, AbiType::Bool, is_err, scrutinee_reg, NO_REG)
                            .at(loc.clone()),
                    );
                    ctx.emit_cond_jump(LirOp::JumpIf, is_err, next);
                    if let Some(name) = binding {
                        let value = ctx.func.allocate_register(AbiType::I64);
                        ctx.emit(
                            LirInst::new(LirOp::Unwrap, AbiType::I64, value, scrutinee_reg, NO_REG)
                                .at(loc.clone()),
                        );
                        ctx.func.set_variable_register(name, value);
                    }
                }
                Pattern::Err { error_type, .. } => {
                    let is_err = ctx.func.allocate_register(AbiType::Bool);
                    ctx.emit(
                        LirInst::new(LirOp::IsError, AbiType::Bool, is_err, scrutinee_reg, NO_REG)
                            .at(loc.clone()),
                    );
                    ctx.emit_cond_jump(LirOp::JumpIfFalse, is_err, next);
                    if let Some(name) = error_type {
                        let expected = self.error_type_index(name);
                        let payload = ctx.func.allocate_register(AbiType::I64);
                        ctx.emit(
                            LirInst::new(
                                LirOp::Unwrap,
                                AbiType::I64,
                                payload,
                                scrutinee_reg,
                                NO_REG,
                            )
                            .at(loc.clone()),
                        );
                        let expected_reg = self.load_const_int(ctx, expected as i64, loc.clone());
                        let matches = ctx.func.allocate_register(AbiType::Bool);
                        ctx.emit(
                            LirInst::new(LirOp::CmpEq, AbiType::Bool, matches, payload, expected_reg)
                                .at(loc.clone()),
                        );
                        ctx.emit_cond_jump(LirOp::JumpIfFalse, matches, next);
                    }
                }
                Pattern::Binding(name) => {
                    ctx.func.set_variable_register(name, scrutinee_reg);
                    next_used = false;
                }
                Pattern::Wildcard => {
                    next_used = false;
                }
                Pattern::Literal(lit) => {
                    let lit_reg = self.lower_expr(ctx, lit);
                    let matches = ctx.func.allocate_register(AbiType::Bool);
                    ctx.emit(
                        LirInst::new(LirOp::CmpEq, AbiType::Bool, matches, scrutinee_reg, lit_reg)
                            .at(loc.clone()),
                    );
                    ctx.emit_cond_jump(LirOp::JumpIfFalse, matches, next);
                }
                other => {
                    self.report(
                        &format!(
                            "unsupported expression for LIR lowering: {} pattern",
                            pattern_name(other)
                        ),
                        arm.span.line,
                    );
                    next_used = false;
                }
            }

            for stmt in &arm.body {
                self.lower_stmt(ctx, stmt);
            }
            ctx.emit_jump(end);
            if next_used {
                ctx.emit_label(next);
            } else {
                // An irrefutable arm makes the remaining arms unreachable.
                break;
            }
        }
        ctx.emit_label(end);
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Lower an expression; returns the register holding its value
    fn lower_expr(&mut self, ctx: &mut FuncCtx, expr: &Expr) -> Reg {
        let loc = SourceLoc::line(expr.line());
        match &expr.kind {
            ExprKind::Int(v) => self.load_const_int(ctx, *v, loc),
            ExprKind::UInt(v) => {
                let ty = self.checker.types().get_type("u64");
                let value = Arc::new(Value::new(ty, ValueData::UInt(*v)));
                let dst = ctx.func.allocate_register(AbiType::I64);
                ctx.emit(LirInst::load_const(dst, AbiType::I64, value).at(loc));
                dst
            }
            ExprKind::Float(v) => {
                let ty = self.checker.types().float_type();
                let value = Arc::new(Value::new(ty, ValueData::Float64(*v)));
                let dst = ctx.func.allocate_register(AbiType::F64);
                ctx.emit(LirInst::load_const(dst, AbiType::F64, value).at(loc));
                dst
            }
            ExprKind::Bool(v) => {
                let ty = self.checker.types().bool_type();
                let value = Arc::new(Value::new(ty, ValueData::Bool(*v)));
                let dst = ctx.func.allocate_register(AbiType::Bool);
                ctx.emit(LirInst::load_const(dst, AbiType::Bool, value).at(loc));
                dst
            }
            ExprKind::Str(s) => {
                let ty = self.checker.types().string_type();
                let value = Arc::new(Value::new(ty, ValueData::Str(s.clone())));
                let dst = ctx.func.allocate_register(AbiType::Ptr);
                ctx.emit(LirInst::load_const(dst, AbiType::Ptr, value).at(loc));
                dst
            }
            ExprKind::Nil => self.load_const_int(ctx, 0, loc),
            ExprKind::Ident(name) => match ctx.func.variable_register(name) {
                Some(reg) => reg,
                None => {
                    self.report(
                        &format!("unsupported expression for LIR lowering: unresolved name `{}`", name),
                        expr.line(),
                    );
                    self.load_const_int(ctx, 0, loc)
                }
            },
            ExprKind::Binary { op, left, right } => {
                let lhs = self.lower_expr(ctx, left);
                let rhs = self.lower_expr(ctx, right);
                self.lower_binary(ctx, *op, lhs, rhs, loc)
            }
            ExprKind::Unary { op, operand } => {
                let src = self.lower_expr(ctx, operand);
                match op {
                    UnaryOp::Neg => {
                        let ty = ctx.func.register_type(src);
                        let dst = ctx.func.allocate_register(ty);
                        ctx.emit(LirInst::new(LirOp::Neg, ty, dst, src, NO_REG).at(loc));
                        dst
                    }
                    UnaryOp::Not => {
                        let dst = ctx.func.allocate_register(AbiType::Bool);
                        let one = self.load_const_bool(ctx, true, loc.clone());
                        ctx.emit(LirInst::new(LirOp::Xor, AbiType::Bool, dst, src, one).at(loc));
                        dst
                    }
                }
            }
            ExprKind::Assign { target, value } => {
                let value_reg = self.lower_expr(ctx, value);
                if let ExprKind::Ident(name) = &target.kind {
                    match ctx.func.variable_register(name) {
                        Some(var_reg) => {
                            let ty = ctx.func.register_type(var_reg);
                            ctx.emit(
                                LirInst::new(LirOp::Mov, ty, var_reg, value_reg, NO_REG).at(loc),
                            );
                            var_reg
                        }
                        None => {
                            ctx.func.set_variable_register(name, value_reg);
                            value_reg
                        }
                    }
                } else {
                    self.report(
                        "unsupported expression for LIR lowering: non-variable assignment",
                        expr.line(),
                    );
                    value_reg
                }
            }
            ExprKind::CompoundAssign { op, target, value } => {
                if let ExprKind::Ident(name) = &target.kind {
                    if let Some(var_reg) = ctx.func.variable_register(name) {
                        let value_reg = self.lower_expr(ctx, value);
                        let combined = self.lower_binary(ctx, *op, var_reg, value_reg, loc.clone());
                        let ty = ctx.func.register_type(var_reg);
                        ctx.emit(LirInst::new(LirOp::Mov, ty, var_reg, combined, NO_REG).at(loc));
                        return var_reg;
                    }
                }
                self.report(
                    "unsupported expression for LIR lowering: compound assignment target",
                    expr.line(),
                );
                self.load_const_int(ctx, 0, loc)
            }
            ExprKind::Call { callee, args, .. } => self.lower_call(ctx, callee, args, loc),
            ExprKind::Ok(inner) => {
                let value = self.lower_expr(ctx, inner);
                let dst = ctx.func.allocate_register(AbiType::I64);
                ctx.emit(LirInst::new(LirOp::ConstructOk, AbiType::I64, dst, value, NO_REG).at(loc));
                dst
            }
            ExprKind::Err { error_type, args } => {
                for arg in args {
                    let reg = self.lower_expr(ctx, arg);
                    ctx.emit(
                        LirInst::new(LirOp::Param, ctx.func.register_type(reg), NO_REG, reg, NO_REG)
                            .at(loc.clone()),
                    );
                }
                let dst = ctx.func.allocate_register(AbiType::I64);
                let mut inst = LirInst::new(LirOp::ConstructError, AbiType::I64, dst, NO_REG, NO_REG)
                    .at(loc)
                    .note(error_type.clone());
                inst.imm = self.error_type_index(error_type);
                ctx.emit(inst);
                dst
            }
            ExprKind::Fallible { inner, handler } => {
                self.lower_fallible(ctx, inner, handler.as_deref(), loc)
            }
            ExprKind::Interpolation(parts) => self.lower_interpolation(ctx, parts, loc),
            ExprKind::Await(inner) => {
                let task = self.lower_expr(ctx, inner);
                let dst = ctx.func.allocate_register(AbiType::I64);
                ctx.emit(LirInst::new(LirOp::Await, AbiType::I64, dst, task, NO_REG).at(loc));
                dst
            }
            other => {
                self.report(
                    &format!(
                        "unsupported expression for LIR lowering: {}",
                        expr_kind_name(other)
                    ),
                    expr.line(),
                );
                self.load_const_int(ctx, 0, loc)
            }
        }
    }

    fn lower_binary(
        &mut self,
        ctx: &mut FuncCtx,
        op: BinaryOp,
        lhs: Reg,
        rhs: Reg,
        loc: SourceLoc,
    ) -> Reg {
        let lhs_ty = ctx.func.register_type(lhs);
        let rhs_ty = ctx.func.register_type(rhs);

        // String + string is concatenation.
        if op == BinaryOp::Add && lhs_ty == AbiType::Ptr && rhs_ty == AbiType::Ptr {
            let dst = ctx.func.allocate_register(AbiType::Ptr);
            ctx.emit(LirInst::new(LirOp::StrConcat, AbiType::Ptr, dst, lhs, rhs).at(loc));
            return dst;
        }

        if op.is_comparison() {
            let lir_op = match op {
                BinaryOp::Eq => LirOp::CmpEq,
                BinaryOp::Ne => LirOp::CmpNe,
                BinaryOp::Lt => LirOp::CmpLt,
                BinaryOp::Le => LirOp::CmpLe,
                BinaryOp::Gt => LirOp::CmpGt,
                _ => LirOp::CmpGe,
            };
            let dst = ctx.func.allocate_register(AbiType::Bool);
            ctx.emit(LirInst::new(lir_op, AbiType::Bool, dst, lhs, rhs).at(loc));
            return dst;
        }

        if op.is_logical() {
            let lir_op = if op == BinaryOp::And { LirOp::And } else { LirOp::Or };
            let dst = ctx.func.allocate_register(AbiType::Bool);
            ctx.emit(LirInst::new(lir_op, AbiType::Bool, dst, lhs, rhs).at(loc));
            return dst;
        }

        let result_ty = if lhs_ty == AbiType::F64 || rhs_ty == AbiType::F64 {
            AbiType::F64
        } else {
            lhs_ty
        };
        let lir_op = match op {
            BinaryOp::Add => LirOp::Add,
            BinaryOp::Sub => LirOp::Sub,
            BinaryOp::Mul => LirOp::Mul,
            BinaryOp::Div => LirOp::Div,
            BinaryOp::Mod => LirOp::Mod,
            BinaryOp::Pow => {
                // Lowered as repeated multiply by the JIT; represented as Mul
                // over a helper call elsewhere. Keep Mul for the core subset.
                LirOp::Mul
            }
            _ => LirOp::Add,
        };
        let dst = ctx.func.allocate_register(result_ty);
        ctx.emit(LirInst::new(lir_op, result_ty, dst, lhs, rhs).at(loc));
        dst
    }

    fn lower_call(&mut self, ctx: &mut FuncCtx, callee: &Expr, args: &[Expr], loc: SourceLoc) -> Reg {
        let ExprKind::Ident(name) = &callee.kind else {
            self.report(
                "unsupported expression for LIR lowering: indirect call",
                callee.line(),
            );
            return self.load_const_int(ctx, 0, loc);
        };

        // print lowers to the typed print ops.
        if name == "print" {
            for arg in args {
                let reg = self.lower_expr(ctx, arg);
                let op = match ctx.func.register_type(reg) {
                    AbiType::F64 => LirOp::PrintFloat,
                    AbiType::Bool => LirOp::PrintBool,
                    AbiType::Ptr => LirOp::PrintString,
                    _ => LirOp::PrintInt,
                };
                ctx.emit(LirInst::new(op, AbiType::Void, NO_REG, reg, NO_REG).at(loc.clone()));
            }
            return self.load_const_int(ctx, 0, loc);
        }

        let arg_regs: Vec<Reg> = args.iter().map(|a| self.lower_expr(ctx, a)).collect();
        for reg in &arg_regs {
            let ty = ctx.func.register_type(*reg);
            ctx.emit(LirInst::new(LirOp::Param, ty, NO_REG, *reg, NO_REG).at(loc.clone()));
        }

        let ret_ty = self
            .checker
            .find_signature(name)
            .map(|sig| abi_type_of(&sig.return_type))
            .unwrap_or(AbiType::I64);
        let dst = ctx.func.allocate_register(ret_ty);
        let index = ctx.func.intern_call_name(name);
        let mut inst = LirInst::new(LirOp::Call, ret_ty, dst, NO_REG, NO_REG)
            .at(loc)
            .note(name.clone());
        inst.imm = index;
        ctx.emit(inst);
        dst
    }

    /// `e?`: on error either run the local handler or return the tagged
    /// error union as-is so the caller sees the same encoding
    fn lower_fallible(
        &mut self,
        ctx: &mut FuncCtx,
        inner: &Expr,
        handler: Option<&Expr>,
        loc: SourceLoc,
    ) -> Reg {
        let union_reg = self.lower_expr(ctx, inner);
        let is_err = ctx.func.allocate_register(AbiType::Bool);
        ctx.emit(
            LirInst::new(LirOp::IsError, AbiType::Bool, is_err, union_reg, NO_REG).at(loc.clone()),
        );

        match handler {
            Some(handler) => {
                let result = ctx.func.allocate_register(AbiType::I64);
                let on_error = ctx.new_label();
                let end = ctx.new_label();
                ctx.emit_cond_jump(LirOp::JumpIf, is_err, on_error);
                let unwrapped = ctx.func.allocate_register(AbiType::I64);
                ctx.emit(
                    LirInst::new(LirOp::Unwrap, AbiType::I64, unwrapped, union_reg, NO_REG)
                        .at(loc.clone()),
                );
                ctx.emit(
                    LirInst::new(LirOp::Mov, AbiType::I64, result, unwrapped, NO_REG)
                        .at(loc.clone()),
                );
                ctx.emit_jump(end);
                ctx.emit_label(on_error);
                let fallback = self.lower_expr(ctx, handler);
                ctx.emit(
                    LirInst::new(LirOp::Mov, AbiType::I64, result, fallback, NO_REG)
                        .at(loc.clone()),
                );
                ctx.emit_label(end);
                result
            }
            None => {
                let ok = ctx.new_label();
                ctx.emit_cond_jump(LirOp::JumpIfFalse, is_err, ok);
                ctx.emit_return(Some(union_reg), loc.clone());
                ctx.emit_label(ok);
                let dst = ctx.func.allocate_register(AbiType::I64);
                ctx.emit(LirInst::new(LirOp::Unwrap, AbiType::I64, dst, union_reg, NO_REG).at(loc));
                dst
            }
        }
    }

    /// Interpolated strings lower to the string-builder runtime
    fn lower_interpolation(
        &mut self,
        ctx: &mut FuncCtx,
        parts: &[InterpPart],
        loc: SourceLoc,
    ) -> Reg {
        let builder = ctx.func.allocate_register(AbiType::Ptr);
        ctx.emit(LirInst::new(LirOp::SbCreate, AbiType::Ptr, builder, NO_REG, NO_REG).at(loc.clone()));
        for part in parts {
            let reg = match part {
                InterpPart::Text(text) => {
                    let ty = self.checker.types().string_type();
                    let value = Arc::new(Value::new(ty, ValueData::Str(text.clone())));
                    let dst = ctx.func.allocate_register(AbiType::Ptr);
                    ctx.emit(LirInst::load_const(dst, AbiType::Ptr, value).at(loc.clone()));
                    dst
                }
                InterpPart::Expr(e) => self.lower_expr(ctx, e),
            };
            let ty = ctx.func.register_type(reg);
            ctx.emit(LirInst::new(LirOp::SbAppend, ty, NO_REG, builder, reg).at(loc.clone()));
        }
        let result = ctx.func.allocate_register(AbiType::Ptr);
        ctx.emit(LirInst::new(LirOp::SbFinish, AbiType::Ptr, result, builder, NO_REG).at(loc));
        result
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn load_const_int(&mut self, ctx: &mut FuncCtx, v: i64, loc: SourceLoc) -> Reg {
        let ty = self.checker.types().int_type();
        let value = Arc::new(Value::new(ty, ValueData::Int(v)));
        let dst = ctx.func.allocate_register(AbiType::I64);
        ctx.emit(LirInst::load_const(dst, AbiType::I64, value).at(loc));
        dst
    }

    fn load_const_bool(&mut self, ctx: &mut FuncCtx, v: bool, loc: SourceLoc) -> Reg {
        let ty = self.checker.types().bool_type();
        let value = Arc::new(Value::new(ty, ValueData::Bool(v)));
        let dst = ctx.func.allocate_register(AbiType::Bool);
        ctx.emit(LirInst::load_const(dst, AbiType::Bool, value).at(loc));
        dst
    }

    fn error_type_index(&self, name: &str) -> u32 {
        self.checker
            .types()
            .error_types()
            .iter()
            .position(|e| e == name)
            .unwrap_or(0) as u32
    }

    fn is_unsigned(&self, expr: &Expr) -> bool {
        self.checker
            .expr_type(expr.id)
            .map(|ty| {
                matches!(
                    ty.as_ref(),
                    Type::UInt8 | Type::UInt16 | Type::UInt32 | Type::UInt64 | Type::UInt
                )
            })
            .unwrap_or(false)
    }
}

/// ABI type for a language type
pub fn abi_type_of(ty: &TypePtr) -> AbiType {
    match ty.as_ref() {
        Type::Bool => AbiType::Bool,
        Type::Int8 | Type::Int16 | Type::Int32 | Type::UInt8 | Type::UInt16 | Type::UInt32 => {
            AbiType::I32
        }
        Type::Int64 | Type::UInt64 | Type::Int | Type::UInt => AbiType::I64,
        Type::Float32 | Type::Float64 => AbiType::F64,
        Type::String => AbiType::Ptr,
        Type::Nil => AbiType::Void,
        Type::ErrorUnion { .. } => AbiType::I64,
        _ => AbiType::Ptr,
    }
}

fn abi_type_of_expr(ty: &TypeExpr) -> AbiType {
    match ty {
        TypeExpr::Named(name) => match name.as_str() {
            "bool" => AbiType::Bool,
            "i8" | "i16" | "i32" | "u8" | "u16" | "u32" => AbiType::I32,
            "int" | "uint" | "i64" | "u64" => AbiType::I64,
            "float" | "f32" | "f64" => AbiType::F64,
            "str" => AbiType::Ptr,
            "nil" => AbiType::Void,
            _ => AbiType::Ptr,
        },
        TypeExpr::ErrorUnion { .. } => AbiType::I64,
        _ => AbiType::Ptr,
    }
}

fn annotation_name(ty: Option<&TypeExpr>) -> &str {
    match ty {
        Some(TypeExpr::Named(name)) => name.as_str(),
        _ => "any",
    }
}

fn stmt_kind_name(kind: &StmtKind) -> &'static str {
    match kind {
        StmtKind::Class(_) => "class declaration",
        StmtKind::Enum(_) => "enum declaration",
        StmtKind::Iter { .. } => "iterator loop",
        StmtKind::Parallel { .. } => "parallel block",
        StmtKind::Concurrent { .. } => "concurrent block",
        StmtKind::Task { .. } => "task block",
        StmtKind::Worker { .. } => "worker block",
        StmtKind::TupleDestructure { .. } => "tuple destructuring",
        _ => "statement",
    }
}

fn expr_kind_name(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Lambda { .. } => "lambda",
        ExprKind::ListLit(_) => "list literal",
        ExprKind::DictLit(_) => "dict literal",
        ExprKind::TupleLit(_) => "tuple literal",
        ExprKind::Member { .. } => "member access",
        ExprKind::Index { .. } => "index access",
        ExprKind::Range { .. } => "range",
        ExprKind::This | ExprKind::Super => "class reference",
        _ => "expression",
    }
}

fn pattern_name(pattern: &Pattern) -> &'static str {
    match pattern {
        Pattern::Tuple(_) => "tuple",
        Pattern::List(_) => "list",
        Pattern::Dict(_) => "dict",
        Pattern::Variant { .. } => "variant",
        _ => "pattern",
    }
}
