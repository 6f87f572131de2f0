//! The bytecode generator
//!
//! Tree-walks a type-checked program and emits a flat stack-VM instruction
//! stream. Jump operands are relative offsets, patched after the target is
//! known as `target - site - 1` (measured from the instruction after the
//! jump). Loop contexts carry break/continue patch lists; lambdas are lifted
//! to named functions with their free variables captured explicitly.
//!
//! Structural errors (break outside a loop, unsupported constructs) are
//! reported through the diagnostics catalogue; the offending construct emits
//! nothing and generation continues.

use crate::bytecode::{Instruction, Opcode};
use crate::checker::builtins::find_builtin;
use crate::checker::TypeChecker;
use crate::diagnostics::catalog::{global_catalog, Diagnostic};
use crate::diagnostics::codes::ErrorStage;
use crate::parser::ast::*;
use crate::types::Type;
use rustc_hash::FxHashSet;

/// Loop state while a loop body is being emitted
struct LoopContext {
    /// Jump sites (instruction indices) emitted by `break`
    break_sites: Vec<usize>,
    /// Jump sites emitted by `continue`
    continue_sites: Vec<usize>,
    /// Scope depth when the loop was entered; break/continue close any
    /// scopes opened past it before jumping
    entry_depth: usize,
}

/// AST → stack bytecode
pub struct BytecodeGenerator<'a> {
    checker: &'a TypeChecker,
    instructions: Vec<Instruction>,
    loop_stack: Vec<LoopContext>,
    /// Open BEGIN_SCOPEs at the current emission point
    scope_depth: usize,
    temp_counter: i64,
    lambda_counter: u32,
    in_class: bool,
    current_class: Option<String>,
    /// Names that compile to PUSH_FUNCTION_REF instead of LOAD_VAR
    declared_functions: FxHashSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> BytecodeGenerator<'a> {
    /// Create a generator over a checked program's type information
    pub fn new(checker: &'a TypeChecker) -> Self {
        BytecodeGenerator {
            checker,
            instructions: Vec::new(),
            loop_stack: Vec::new(),
            scope_depth: 0,
            temp_counter: 0,
            lambda_counter: 0,
            in_class: false,
            current_class: None,
            declared_functions: FxHashSet::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Generate bytecode for a whole program
    pub fn process(&mut self, program: &Program) {
        collect_function_names(&program.statements, &mut self.declared_functions);
        for stmt in &program.statements {
            self.visit_stmt(stmt);
        }
        self.emit(Instruction::new(Opcode::Halt, 0));
    }

    /// The generated instruction stream, valid for the generator's lifetime
    pub fn bytecode(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Diagnostics emitted during generation
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    // ========================================================================
    // Emission helpers
    // ========================================================================

    fn emit(&mut self, inst: Instruction) {
        match inst.opcode {
            Opcode::BeginScope => self.scope_depth += 1,
            Opcode::EndScope => self.scope_depth = self.scope_depth.saturating_sub(1),
            _ => {}
        }
        self.instructions.push(inst);
    }

    /// Close every scope opened since the innermost loop was entered, for
    /// the path a break/continue jump leaves on. The fall-through path
    /// keeps its scopes, so the tracked depth is restored afterwards.
    fn emit_loop_scope_cleanup(&mut self, line: u32) {
        let entry_depth = self
            .loop_stack
            .last()
            .map(|ctx| ctx.entry_depth)
            .unwrap_or(0);
        let depth_now = self.scope_depth;
        for _ in entry_depth..depth_now {
            self.emit_op(Opcode::EndScope, line);
        }
        self.scope_depth = depth_now;
    }

    fn emit_op(&mut self, opcode: Opcode, line: u32) {
        self.emit(Instruction::new(opcode, line));
    }

    /// Emit a jump with a placeholder offset; returns the site for patching
    fn emit_jump(&mut self, opcode: Opcode, line: u32) -> usize {
        let site = self.instructions.len();
        self.emit(Instruction::with_int(opcode, line, 0));
        site
    }

    /// Patch a jump site to land at the next emitted instruction
    fn patch_jump(&mut self, site: usize) {
        let target = self.instructions.len();
        self.patch_jump_to(site, target);
    }

    /// Patch a jump site to land at an absolute instruction index
    fn patch_jump_to(&mut self, site: usize, target: usize) {
        self.instructions[site].imm = target as i64 - site as i64 - 1;
    }

    /// Emit a jump that lands at an already-known absolute index
    fn emit_jump_back(&mut self, opcode: Opcode, line: u32, target: usize) {
        let site = self.instructions.len();
        self.emit(Instruction::with_int(
            opcode,
            line,
            target as i64 - site as i64 - 1,
        ));
    }

    fn fresh_temp(&mut self) -> i64 {
        let t = self.temp_counter;
        self.temp_counter += 1;
        t
    }

    fn report(&mut self, stage: ErrorStage, message: &str, line: u32) {
        let diag = global_catalog()
            .read()
            .report(stage, message, "", line, 0, None, None);
        self.diagnostics.push(diag);
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn visit_stmt(&mut self, stmt: &Stmt) {
        let line = stmt.line();
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.visit_expr(expr);
                self.emit_op(Opcode::Pop, line);
            }
            StmtKind::VarDecl { name, visibility, ty, init } => {
                match init {
                    Some(init) => self.visit_expr(init),
                    None => self.emit_default_value(ty.as_ref(), line),
                }
                self.emit(Instruction::with_int_str(
                    Opcode::DeclareVar,
                    line,
                    visibility.as_i64(),
                    name,
                ));
            }
            StmtKind::TupleDestructure { names, value } => {
                self.visit_expr(value);
                for (i, name) in names.iter().enumerate() {
                    self.emit_op(Opcode::Dup, line);
                    self.emit(Instruction::with_int(Opcode::PushInt, line, i as i64));
                    self.emit_op(Opcode::GetIndex, line);
                    self.emit(Instruction::with_int_str(Opcode::DeclareVar, line, 0, name));
                }
                self.emit_op(Opcode::Pop, line);
            }
            StmtKind::Function(decl) => self.visit_function(decl),
            StmtKind::Class(decl) => self.visit_class(decl),
            StmtKind::Enum(decl) => {
                self.emit(Instruction::with_str(Opcode::BeginEnum, line, &decl.name));
                for variant in &decl.variants {
                    let opcode = if variant.payload.is_some() {
                        Opcode::DefineEnumVariantWithType
                    } else {
                        Opcode::DefineEnumVariant
                    };
                    self.emit(Instruction::with_str(opcode, line, &variant.name));
                }
                self.emit_op(Opcode::EndEnum, line);
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                self.visit_expr(condition);
                let else_site = self.emit_jump(Opcode::JumpIfFalse, line);
                self.visit_scoped_block(then_branch, line);
                match else_branch {
                    Some(else_branch) => {
                        let end_site = self.emit_jump(Opcode::Jump, line);
                        self.patch_jump(else_site);
                        self.visit_scoped_block(else_branch, line);
                        self.patch_jump(end_site);
                    }
                    None => self.patch_jump(else_site),
                }
            }
            StmtKind::While { condition, body } => {
                let loop_start = self.instructions.len();
                self.visit_expr(condition);
                let exit_site = self.emit_jump(Opcode::JumpIfFalse, line);
                self.loop_stack.push(LoopContext {
                    break_sites: Vec::new(),
                    continue_sites: Vec::new(),
                    entry_depth: self.scope_depth,
                });
                self.visit_scoped_block(body, line);
                self.emit_jump_back(Opcode::Jump, line, loop_start);
                self.patch_jump(exit_site);
                self.finish_loop(loop_start);
            }
            StmtKind::For { init, condition, increment, body } => {
                self.emit_op(Opcode::BeginScope, line);
                if let Some(init) = init {
                    self.visit_stmt(init);
                }
                let cond_start = self.instructions.len();
                let exit_site = condition.as_ref().map(|condition| {
                    self.visit_expr(condition);
                    self.emit_jump(Opcode::JumpIfFalse, line)
                });
                self.loop_stack.push(LoopContext {
                    break_sites: Vec::new(),
                    continue_sites: Vec::new(),
                    entry_depth: self.scope_depth,
                });
                self.visit_scoped_block(body, line);
                // Continue lands on the increment block.
                let continue_target = self.instructions.len();
                if let Some(increment) = increment {
                    self.visit_expr(increment);
                    self.emit_op(Opcode::Pop, line);
                }
                self.emit_jump_back(Opcode::Jump, line, cond_start);
                if let Some(site) = exit_site {
                    self.patch_jump(site);
                }
                self.finish_loop(continue_target);
                self.emit_op(Opcode::EndScope, line);
            }
            StmtKind::Iter { bindings, iterable, body } => {
                self.visit_iter(bindings, iterable, body, line);
            }
            StmtKind::Match { scrutinee, arms } => self.visit_match(scrutinee, arms, line),
            StmtKind::Break => {
                if self.loop_stack.is_empty() {
                    self.report(ErrorStage::Semantic, "break statement outside of loop", line);
                    return;
                }
                self.emit_loop_scope_cleanup(line);
                let site = self.emit_jump(Opcode::Jump, line);
                if let Some(ctx) = self.loop_stack.last_mut() {
                    ctx.break_sites.push(site);
                }
            }
            StmtKind::Continue => {
                if self.loop_stack.is_empty() {
                    self.report(
                        ErrorStage::Semantic,
                        "continue statement outside of loop",
                        line,
                    );
                    return;
                }
                self.emit_loop_scope_cleanup(line);
                let site = self.emit_jump(Opcode::Jump, line);
                if let Some(ctx) = self.loop_stack.last_mut() {
                    ctx.continue_sites.push(site);
                }
            }
            StmtKind::Return(value) => {
                match value {
                    Some(value) => self.visit_expr(value),
                    None => self.emit_op(Opcode::PushNull, line),
                }
                self.emit_op(Opcode::Return, line);
            }
            StmtKind::Block(body) => self.visit_scoped_block(body, line),
            StmtKind::Print(args) => {
                for arg in args {
                    self.visit_expr(arg);
                }
                self.emit(Instruction::with_int(Opcode::Print, line, args.len() as i64));
            }
            StmtKind::Contract { condition, message } => {
                self.visit_expr(condition);
                self.visit_expr(message);
                self.emit_op(Opcode::Contract, line);
            }
            StmtKind::Parallel { mode, cores, body } => {
                let resolved_cores = match (mode, cores) {
                    (ParallelMode::Auto, _) => num_cpus::get() as i64,
                    (ParallelMode::Explicit, Some(expr)) => match &expr.kind {
                        ExprKind::Int(n) => *n,
                        _ => 0,
                    },
                    (ParallelMode::Explicit, None) => 0,
                };
                let mode_name = match mode {
                    ParallelMode::Auto => "auto",
                    ParallelMode::Explicit => "explicit",
                };
                self.emit(Instruction::with_int_str(
                    Opcode::BeginParallel,
                    line,
                    resolved_cores,
                    mode_name,
                ));
                for stmt in body {
                    self.visit_stmt(stmt);
                }
                self.emit_op(Opcode::EndParallel, line);
            }
            StmtKind::Concurrent { body } => {
                self.emit_op(Opcode::BeginConcurrent, line);
                for stmt in body {
                    self.visit_stmt(stmt);
                }
                self.emit_op(Opcode::EndConcurrent, line);
            }
            StmtKind::Task { body } => {
                self.emit_op(Opcode::BeginTask, line);
                for stmt in body {
                    self.visit_stmt(stmt);
                }
                self.emit_op(Opcode::EndTask, line);
            }
            StmtKind::Worker { body } => {
                self.emit_op(Opcode::BeginWorker, line);
                for stmt in body {
                    self.visit_stmt(stmt);
                }
                self.emit_op(Opcode::EndWorker, line);
            }
            StmtKind::AtomicDecl { name, init } => {
                match init {
                    Some(init) => self.visit_expr(init),
                    None => self.emit(Instruction::with_int(Opcode::PushInt, line, 0)),
                }
                self.emit(Instruction::with_str(Opcode::DefineAtomic, line, name));
            }
        }
    }

    fn visit_scoped_block(&mut self, body: &[Stmt], line: u32) {
        self.emit_op(Opcode::BeginScope, line);
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.emit_op(Opcode::EndScope, line);
    }

    /// Patch break sites to the current position and continue sites to the
    /// loop's continue target, then pop the loop context
    fn finish_loop(&mut self, continue_target: usize) {
        if let Some(ctx) = self.loop_stack.pop() {
            for site in ctx.break_sites {
                self.patch_jump(site);
            }
            for site in ctx.continue_sites {
                self.patch_jump_to(site, continue_target);
            }
        }
    }

    /// Push the zero value for a declared-but-uninitialised variable
    fn emit_default_value(&mut self, ty: Option<&TypeExpr>, line: u32) {
        match ty {
            Some(TypeExpr::Named(name)) => match name.as_str() {
                "int" | "uint" | "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32"
                | "u64" => self.emit(Instruction::with_int(Opcode::PushInt, line, 0)),
                "float" | "f32" | "f64" => {
                    self.emit(Instruction::with_float(Opcode::PushFloat, line, 0.0))
                }
                "str" => self.emit(Instruction::with_str(Opcode::PushString, line, "")),
                "bool" => self.emit(Instruction::with_bool(Opcode::PushBool, line, false)),
                _ => self.emit_op(Opcode::PushNull, line),
            },
            _ => self.emit_op(Opcode::PushNull, line),
        }
    }

    fn visit_function(&mut self, decl: &FunctionDecl) {
        let line = decl.span.line;
        self.declared_functions.insert(decl.name.clone());
        // The body is a fresh frame: loops and scopes do not leak across.
        let outer_loops = std::mem::take(&mut self.loop_stack);
        let outer_depth = std::mem::take(&mut self.scope_depth);
        self.emit(Instruction::with_str(Opcode::BeginFunction, line, &decl.name));
        for param in &decl.params {
            match &param.default {
                Some(default) => {
                    self.emit(Instruction::with_str(
                        Opcode::DefineOptionalParam,
                        line,
                        &param.name,
                    ));
                    self.visit_expr(default);
                    self.emit_op(Opcode::SetDefaultValue, line);
                }
                None => {
                    self.emit(Instruction::with_str(Opcode::DefineParam, line, &param.name));
                }
            }
        }
        for stmt in &decl.body {
            self.visit_stmt(stmt);
        }
        // Implicit nil return when the body can fall off the end.
        if !matches!(decl.body.last().map(|s| &s.kind), Some(StmtKind::Return(_))) {
            self.emit_op(Opcode::PushNull, line);
            self.emit_op(Opcode::Return, line);
        }
        self.emit_op(Opcode::EndFunction, line);
        self.loop_stack = outer_loops;
        self.scope_depth = outer_depth;
    }

    fn visit_class(&mut self, decl: &ClassDecl) {
        let line = decl.span.line;
        self.emit(Instruction::with_str(Opcode::BeginClass, line, &decl.name));
        let was_in_class = self.in_class;
        let previous_class = self.current_class.replace(decl.name.clone());
        self.in_class = true;

        if let Some(superclass) = &decl.superclass {
            self.emit(Instruction::with_str(Opcode::SetSuperclass, line, superclass));
        }
        for field in &decl.fields {
            match &field.init {
                Some(init) => self.visit_expr(init),
                None => self.emit_op(Opcode::PushNull, line),
            }
            self.emit(Instruction::with_int_str(
                Opcode::DefineField,
                field.span.line,
                field.visibility.as_i64(),
                &field.name,
            ));
        }
        for method in &decl.methods {
            self.visit_function(method);
        }

        self.in_class = was_in_class;
        self.current_class = previous_class;
        self.emit_op(Opcode::EndClass, line);
    }

    fn visit_iter(&mut self, bindings: &[String], iterable: &Expr, body: &[Stmt], line: u32) {
        self.emit_op(Opcode::BeginScope, line);
        // Pre-declare the loop variables so they are lexically bound.
        for name in bindings {
            self.emit_op(Opcode::PushNull, line);
            self.emit(Instruction::with_int_str(Opcode::DeclareVar, line, 0, name));
        }
        self.visit_expr(iterable);
        self.emit_op(Opcode::GetIterator, line);

        let loop_start = self.instructions.len();
        self.emit_op(Opcode::IteratorHasNext, line);
        let exit_site = self.emit_jump(Opcode::JumpIfFalse, line);
        self.emit_op(Opcode::IteratorNext, line);
        // `for k, v in ...` stores the value then the key.
        for name in bindings.iter().rev() {
            self.emit(Instruction::with_str(Opcode::StoreVar, line, name));
        }

        self.loop_stack.push(LoopContext {
            break_sites: Vec::new(),
            continue_sites: Vec::new(),
            entry_depth: self.scope_depth,
        });
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.emit_jump_back(Opcode::Jump, line, loop_start);
        self.patch_jump(exit_site);
        self.finish_loop(loop_start);
        self.emit_op(Opcode::Pop, line); // the iterator
        self.emit_op(Opcode::EndScope, line);
    }

    // ========================================================================
    // Match lowering
    // ========================================================================

    fn visit_match(&mut self, scrutinee: &Expr, arms: &[MatchArm], line: u32) {
        self.visit_expr(scrutinee);
        let temp = self.fresh_temp();
        self.emit(Instruction::with_int(Opcode::StoreTemp, line, temp));

        let mut end_sites = Vec::new();
        for arm in arms {
            let arm_line = arm.span.line;
            self.emit(Instruction::with_int(Opcode::LoadTemp, arm_line, temp));
            self.emit_pattern(&arm.pattern, arm_line);
            let next_site = self.emit_jump(Opcode::JumpIfFalse, arm_line);

            self.emit_op(Opcode::BeginScope, arm_line);
            self.emit_pattern_bindings(&arm.pattern, temp, arm_line);

            match &arm.guard {
                Some(guard) => {
                    // The guard runs with bindings in scope. Its result is
                    // parked in a temp so both outcomes leave through the
                    // single END_SCOPE below; a failing guard then falls
                    // through to the next arm.
                    let guard_temp = self.fresh_temp();
                    self.visit_expr(guard);
                    self.emit(Instruction::with_int(Opcode::StoreTemp, arm_line, guard_temp));
                    self.emit(Instruction::with_int(Opcode::LoadTemp, arm_line, guard_temp));
                    let skip_body = self.emit_jump(Opcode::JumpIfFalse, arm_line);
                    for stmt in &arm.body {
                        self.visit_stmt(stmt);
                    }
                    self.patch_jump(skip_body);
                    self.emit_op(Opcode::EndScope, arm_line);
                    self.emit(Instruction::with_int(Opcode::LoadTemp, arm_line, guard_temp));
                    self.emit(Instruction::with_int(Opcode::ClearTemp, arm_line, guard_temp));
                    end_sites.push(self.emit_jump(Opcode::JumpIfTrue, arm_line));
                }
                None => {
                    for stmt in &arm.body {
                        self.visit_stmt(stmt);
                    }
                    self.emit_op(Opcode::EndScope, arm_line);
                    end_sites.push(self.emit_jump(Opcode::Jump, arm_line));
                }
            }
            self.patch_jump(next_site);
        }

        for site in end_sites {
            self.patch_jump(site);
        }
        self.emit(Instruction::with_int(Opcode::ClearTemp, line, temp));
    }

    /// Push a pattern's marker string and parameter block, then MATCH_PATTERN.
    /// The VM consumes marker + parameters in this order.
    fn emit_pattern(&mut self, pattern: &Pattern, line: u32) {
        match pattern {
            Pattern::Val(_) => {
                self.emit(Instruction::with_str(Opcode::PushString, line, "val"));
                self.emit(Instruction::with_int_str(Opcode::MatchPattern, line, 0, "val"));
            }
            Pattern::Err { error_type, .. } => {
                let marker = match error_type {
                    Some(name) => format!("err:{}", name),
                    None => "err".to_string(),
                };
                self.emit(Instruction::with_str(Opcode::PushString, line, &marker));
                self.emit(Instruction::with_int_str(Opcode::MatchPattern, line, 0, &marker));
            }
            Pattern::Literal(expr) => {
                self.emit(Instruction::with_str(Opcode::PushString, line, "literal"));
                self.visit_expr(expr);
                self.emit(Instruction::with_int_str(
                    Opcode::MatchPattern,
                    line,
                    1,
                    "literal",
                ));
            }
            Pattern::Tuple(patterns) => {
                self.emit(Instruction::with_str(Opcode::PushString, line, "tuple"));
                self.emit(Instruction::with_int(
                    Opcode::PushInt,
                    line,
                    patterns.len() as i64,
                ));
                self.emit(Instruction::with_int_str(
                    Opcode::MatchPattern,
                    line,
                    1,
                    "tuple",
                ));
            }
            Pattern::List(patterns) => {
                self.emit(Instruction::with_str(Opcode::PushString, line, "list"));
                self.emit(Instruction::with_int(
                    Opcode::PushInt,
                    line,
                    patterns.len() as i64,
                ));
                self.emit(Instruction::with_int_str(Opcode::MatchPattern, line, 1, "list"));
            }
            Pattern::Dict(entries) => {
                self.emit(Instruction::with_str(Opcode::PushString, line, "dict"));
                for (key, _) in entries {
                    self.emit(Instruction::with_str(Opcode::PushString, line, key));
                }
                self.emit(Instruction::with_int_str(
                    Opcode::MatchPattern,
                    line,
                    entries.len() as i64,
                    "dict",
                ));
            }
            Pattern::Variant { name, .. } => {
                let marker = format!("variant:{}", name);
                self.emit(Instruction::with_str(Opcode::PushString, line, &marker));
                self.emit(Instruction::with_int_str(
                    Opcode::MatchPattern,
                    line,
                    0,
                    &marker,
                ));
            }
            Pattern::Binding(_) | Pattern::Wildcard => {
                self.emit(Instruction::with_str(Opcode::PushString, line, "any"));
                self.emit(Instruction::with_int_str(Opcode::MatchPattern, line, 0, "any"));
            }
        }
    }

    /// Declare the variables a matched pattern binds, reloading the
    /// scrutinee from its temp
    fn emit_pattern_bindings(&mut self, pattern: &Pattern, temp: i64, line: u32) {
        match pattern {
            Pattern::Val(Some(name)) => {
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, temp));
                self.emit_op(Opcode::UnwrapValue, line);
                self.emit(Instruction::with_int_str(Opcode::DeclareVar, line, 0, name));
            }
            Pattern::Err { binding: Some(name), .. } => {
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, temp));
                self.emit(Instruction::with_int_str(Opcode::DeclareVar, line, 0, name));
            }
            Pattern::Binding(name) => {
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, temp));
                self.emit(Instruction::with_int_str(Opcode::DeclareVar, line, 0, name));
            }
            _ => {}
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn visit_expr(&mut self, expr: &Expr) {
        let line = expr.line();
        match &expr.kind {
            ExprKind::Int(v) => self.emit(Instruction::with_int(Opcode::PushInt, line, *v)),
            ExprKind::UInt(v) => self.emit(Instruction::with_uint(Opcode::PushUInt64, line, *v)),
            ExprKind::Float(v) => {
                self.emit(Instruction::with_float(Opcode::PushFloat, line, *v as f32))
            }
            ExprKind::Str(s) => self.emit(Instruction::with_str(Opcode::PushString, line, s)),
            ExprKind::Bool(b) => self.emit(Instruction::with_bool(Opcode::PushBool, line, *b)),
            ExprKind::Nil => self.emit_op(Opcode::PushNull, line),
            ExprKind::Interpolation(parts) => {
                for part in parts {
                    match part {
                        InterpPart::Text(text) => {
                            self.emit(Instruction::with_str(Opcode::PushString, line, text))
                        }
                        InterpPart::Expr(e) => self.visit_expr(e),
                    }
                }
                self.emit(Instruction::with_int(
                    Opcode::InterpolateString,
                    line,
                    parts.len() as i64,
                ));
            }
            ExprKind::Ident(name) => {
                if self.declared_functions.contains(name) {
                    self.emit(Instruction::with_str(Opcode::PushFunctionRef, line, name));
                } else {
                    self.emit(Instruction::with_str(Opcode::LoadVar, line, name));
                }
            }
            ExprKind::Binary { op, left, right } => {
                if op.is_logical() {
                    self.visit_logical(*op, left, right, line);
                } else {
                    self.visit_expr(left);
                    self.visit_expr(right);
                    self.emit_op(binary_opcode(*op), line);
                }
            }
            ExprKind::Unary { op, operand } => {
                self.visit_expr(operand);
                let opcode = match op {
                    UnaryOp::Neg => Opcode::Negate,
                    UnaryOp::Not => Opcode::Not,
                };
                self.emit_op(opcode, line);
            }
            ExprKind::Assign { target, value } => self.visit_assign(target, value, line),
            ExprKind::CompoundAssign { op, target, value } => {
                self.visit_compound_assign(*op, target, value, line)
            }
            ExprKind::Call { callee, args, named_args } => {
                self.visit_call(callee, args, named_args, line)
            }
            ExprKind::Member { object, name } => {
                self.visit_expr(object);
                self.emit(Instruction::with_str(Opcode::GetProperty, line, name));
            }
            ExprKind::Index { object, index } => {
                self.visit_expr(object);
                self.visit_expr(index);
                self.emit_op(Opcode::GetIndex, line);
            }
            ExprKind::Lambda { params, body, .. } => self.visit_lambda(params, body, line),
            ExprKind::ListLit(items) => {
                for item in items {
                    self.visit_expr(item);
                }
                self.emit(Instruction::with_int(
                    Opcode::CreateList,
                    line,
                    items.len() as i64,
                ));
            }
            ExprKind::TupleLit(items) => {
                for item in items {
                    self.visit_expr(item);
                }
                self.emit(Instruction::with_int(
                    Opcode::CreateTuple,
                    line,
                    items.len() as i64,
                ));
            }
            ExprKind::DictLit(entries) => {
                for (key, value) in entries {
                    self.visit_expr(key);
                    self.visit_expr(value);
                }
                self.emit(Instruction::with_int(
                    Opcode::CreateDict,
                    line,
                    entries.len() as i64,
                ));
            }
            ExprKind::Range { start, end, step, inclusive } => {
                self.visit_expr(start);
                self.visit_expr(end);
                self.emit(Instruction::with_bool(Opcode::CreateRange, line, *inclusive));
                if let Some(step) = step {
                    self.visit_expr(step);
                    self.emit_op(Opcode::SetRangeStep, line);
                }
            }
            ExprKind::Ok(inner) => {
                self.visit_expr(inner);
                self.emit_op(Opcode::ConstructOk, line);
            }
            ExprKind::Err { error_type, args } => {
                for arg in args {
                    self.visit_expr(arg);
                }
                self.emit(Instruction::with_int_str(
                    Opcode::ConstructError,
                    line,
                    args.len() as i64,
                    error_type,
                ));
            }
            ExprKind::Fallible { inner, handler } => {
                self.visit_fallible(inner, handler.as_deref(), line)
            }
            ExprKind::Await(inner) => {
                self.visit_expr(inner);
                self.emit_op(Opcode::Await, line);
            }
            ExprKind::This => self.emit_op(Opcode::LoadThis, line),
            ExprKind::Super => self.emit_op(Opcode::LoadSuper, line),
        }
    }

    /// Short-circuit `&&`/`||`: evaluate left, duplicate, jump past the right
    /// operand on the deciding value, otherwise pop and evaluate right
    fn visit_logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr, line: u32) {
        self.visit_expr(left);
        self.emit_op(Opcode::Dup, line);
        let short_circuit = match op {
            BinaryOp::And => self.emit_jump(Opcode::JumpIfFalse, line),
            _ => self.emit_jump(Opcode::JumpIfTrue, line),
        };
        self.emit_op(Opcode::Pop, line);
        self.visit_expr(right);
        self.patch_jump(short_circuit);
    }

    fn visit_assign(&mut self, target: &Expr, value: &Expr, line: u32) {
        match &target.kind {
            ExprKind::Ident(name) => {
                self.visit_expr(value);
                self.emit_op(Opcode::Dup, line);
                self.emit(Instruction::with_str(Opcode::StoreVar, line, name));
            }
            ExprKind::Index { object, index } => {
                self.visit_expr(object);
                self.visit_expr(index);
                self.visit_expr(value);
                self.emit_op(Opcode::SetIndex, line);
                self.emit_op(Opcode::PushNull, line);
            }
            ExprKind::Member { object, name } => {
                self.visit_expr(object);
                self.visit_expr(value);
                self.emit(Instruction::with_str(Opcode::SetProperty, line, name));
                self.emit_op(Opcode::PushNull, line);
            }
            _ => {
                self.report(ErrorStage::Bytecode, "unsupported expression: invalid assignment target", line);
            }
        }
    }

    /// Compound assignment: exactly one evaluation of the target, a combined
    /// op, and one store
    fn visit_compound_assign(&mut self, op: BinaryOp, target: &Expr, value: &Expr, line: u32) {
        let opcode = binary_opcode(op);
        match &target.kind {
            ExprKind::Ident(name) => {
                self.emit(Instruction::with_str(Opcode::LoadVar, line, name));
                self.visit_expr(value);
                self.emit_op(opcode, line);
                self.emit_op(Opcode::Dup, line);
                self.emit(Instruction::with_str(Opcode::StoreVar, line, name));
            }
            ExprKind::Index { object, index } => {
                let obj_temp = self.fresh_temp();
                let idx_temp = self.fresh_temp();
                self.visit_expr(object);
                self.emit(Instruction::with_int(Opcode::StoreTemp, line, obj_temp));
                self.visit_expr(index);
                self.emit(Instruction::with_int(Opcode::StoreTemp, line, idx_temp));
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, obj_temp));
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, idx_temp));
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, obj_temp));
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, idx_temp));
                self.emit_op(Opcode::GetIndex, line);
                self.visit_expr(value);
                self.emit_op(opcode, line);
                self.emit_op(Opcode::SetIndex, line);
                self.emit(Instruction::with_int(Opcode::ClearTemp, line, idx_temp));
                self.emit(Instruction::with_int(Opcode::ClearTemp, line, obj_temp));
                self.emit_op(Opcode::PushNull, line);
            }
            ExprKind::Member { object, name } => {
                let obj_temp = self.fresh_temp();
                self.visit_expr(object);
                self.emit(Instruction::with_int(Opcode::StoreTemp, line, obj_temp));
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, obj_temp));
                self.emit(Instruction::with_int(Opcode::LoadTemp, line, obj_temp));
                self.emit(Instruction::with_str(Opcode::GetProperty, line, name));
                self.visit_expr(value);
                self.emit_op(opcode, line);
                self.emit(Instruction::with_str(Opcode::SetProperty, line, name));
                self.emit(Instruction::with_int(Opcode::ClearTemp, line, obj_temp));
                self.emit_op(Opcode::PushNull, line);
            }
            _ => {
                self.report(
                    ErrorStage::Bytecode,
                    "unsupported expression: invalid compound assignment target",
                    line,
                );
            }
        }
    }

    fn visit_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        named_args: &[(String, Expr)],
        line: u32,
    ) {
        // Method call: push the object, fetch the property, then arguments;
        // an empty callee name makes the VM use the top-of-stack callable.
        if let ExprKind::Member { object, name } = &callee.kind {
            self.visit_expr(object);
            self.emit(Instruction::with_str(Opcode::GetProperty, line, name));
            for arg in args {
                self.visit_expr(arg);
            }
            self.emit(Instruction::with_int_str(
                Opcode::Call,
                line,
                args.len() as i64,
                "",
            ));
            return;
        }

        if let ExprKind::Ident(name) = &callee.kind {
            let is_known_function =
                self.declared_functions.contains(name) || find_builtin(name).is_some();
            let is_function_variable = self
                .checker
                .expr_type(callee.id)
                .map(|ty| matches!(ty.as_ref(), Type::Function { .. }))
                .unwrap_or(false);

            if name == "print" && !self.declared_functions.contains(name) {
                for arg in args {
                    self.visit_expr(arg);
                }
                self.emit(Instruction::with_int(Opcode::Print, line, args.len() as i64));
                // Print produces no value; expression position expects one.
                self.emit_op(Opcode::PushNull, line);
                return;
            }

            if is_known_function {
                for arg in args {
                    self.visit_expr(arg);
                }
                let mut inst = Instruction::with_int_str(
                    Opcode::Call,
                    line,
                    args.len() as i64,
                    name,
                );
                if !named_args.is_empty() {
                    for (arg_name, value) in named_args {
                        self.emit(Instruction::with_str(Opcode::PushString, line, arg_name));
                        self.visit_expr(value);
                    }
                    inst.uimm = named_args.len() as u64;
                }
                self.emit(inst);
                return;
            }

            // Higher-order: the checker proved the callee is function-typed.
            if is_function_variable {
                self.emit(Instruction::with_str(Opcode::LoadVar, line, name));
                for arg in args {
                    self.visit_expr(arg);
                }
                self.emit(Instruction::with_int(
                    Opcode::CallHigherOrder,
                    line,
                    args.len() as i64,
                ));
                return;
            }
        }

        // Arbitrary callee expression (lambda call result, etc.).
        self.visit_expr(callee);
        for arg in args {
            self.visit_expr(arg);
        }
        self.emit(Instruction::with_int(
            Opcode::CallHigherOrder,
            line,
            args.len() as i64,
        ));
    }

    /// Lift a lambda to a named function, then emit the closure creation
    /// sequence capturing each free variable
    fn visit_lambda(&mut self, params: &[Param], body: &[Stmt], line: u32) {
        let name = format!("__lambda_{}", self.lambda_counter);
        self.lambda_counter += 1;

        let free_vars = self.free_variables(params, body);

        // The lambda body, delimited like any function; it only executes
        // when called.
        let outer_loops = std::mem::take(&mut self.loop_stack);
        let outer_depth = std::mem::take(&mut self.scope_depth);
        self.emit(Instruction::with_str(Opcode::BeginFunction, line, &name));
        for param in params {
            match &param.default {
                Some(default) => {
                    self.emit(Instruction::with_str(
                        Opcode::DefineOptionalParam,
                        line,
                        &param.name,
                    ));
                    self.visit_expr(default);
                    self.emit_op(Opcode::SetDefaultValue, line);
                }
                None => self.emit(Instruction::with_str(Opcode::DefineParam, line, &param.name)),
            }
        }
        for stmt in body {
            self.visit_stmt(stmt);
        }
        if !matches!(body.last().map(|s| &s.kind), Some(StmtKind::Return(_))) {
            self.emit_op(Opcode::PushNull, line);
            self.emit_op(Opcode::Return, line);
        }
        self.emit_op(Opcode::EndFunction, line);
        self.loop_stack = outer_loops;
        self.scope_depth = outer_depth;

        self.emit(Instruction::with_str(Opcode::PushLambda, line, &name));
        for var in &free_vars {
            self.emit(Instruction::with_str(Opcode::CaptureVar, line, var));
        }
        self.emit(Instruction::with_int(
            Opcode::PushInt,
            line,
            free_vars.len() as i64,
        ));
        self.emit(Instruction::with_str(Opcode::CreateClosure, line, &name));
    }

    /// Names read in the body that are neither parameters nor locally
    /// declared nor known functions
    fn free_variables(&self, params: &[Param], body: &[Stmt]) -> Vec<String> {
        let mut bound: FxHashSet<String> =
            params.iter().map(|p| p.name.clone()).collect();
        collect_locals(body, &mut bound);

        let mut free = Vec::new();
        let mut seen = FxHashSet::default();
        let mut idents = Vec::new();
        collect_idents(body, &mut idents);
        for name in idents {
            if bound.contains(&name)
                || self.declared_functions.contains(&name)
                || find_builtin(&name).is_some()
            {
                continue;
            }
            if seen.insert(name.clone()) {
                free.push(name);
            }
        }
        free
    }

    /// `e?`: duplicate-free error check with either a local handler or
    /// propagation out of the enclosing function
    fn visit_fallible(&mut self, inner: &Expr, handler: Option<&Expr>, line: u32) {
        self.visit_expr(inner);
        self.emit_op(Opcode::CheckError, line);
        match handler {
            Some(handler) => {
                let on_error = self.emit_jump(Opcode::JumpIfTrue, line);
                self.emit_op(Opcode::UnwrapValue, line);
                let end = self.emit_jump(Opcode::Jump, line);
                self.patch_jump(on_error);
                self.emit_op(Opcode::Pop, line);
                self.visit_expr(handler);
                self.patch_jump(end);
            }
            None => {
                let ok = self.emit_jump(Opcode::JumpIfFalse, line);
                self.emit_op(Opcode::PropagateError, line);
                self.patch_jump(ok);
                self.emit_op(Opcode::UnwrapValue, line);
            }
        }
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Subtract,
        BinaryOp::Mul => Opcode::Multiply,
        BinaryOp::Div => Opcode::Divide,
        BinaryOp::Mod => Opcode::Modulo,
        BinaryOp::Pow => Opcode::Power,
        BinaryOp::Eq => Opcode::Equal,
        BinaryOp::Ne => Opcode::NotEqual,
        BinaryOp::Lt => Opcode::Less,
        BinaryOp::Le => Opcode::LessEqual,
        BinaryOp::Gt => Opcode::Greater,
        BinaryOp::Ge => Opcode::GreaterEqual,
        // && and || never reach here; they lower to short-circuit jumps.
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators are short-circuited"),
    }
}

/// Collect every function name declared anywhere in a statement list
fn collect_function_names(stmts: &[Stmt], names: &mut FxHashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Function(decl) => {
                names.insert(decl.name.clone());
                collect_function_names(&decl.body, names);
            }
            StmtKind::If { then_branch, else_branch, .. } => {
                collect_function_names(then_branch, names);
                if let Some(else_branch) = else_branch {
                    collect_function_names(else_branch, names);
                }
            }
            StmtKind::While { body, .. }
            | StmtKind::Iter { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::Block(body)
            | StmtKind::Parallel { body, .. }
            | StmtKind::Concurrent { body }
            | StmtKind::Task { body }
            | StmtKind::Worker { body } => collect_function_names(body, names),
            StmtKind::Match { arms, .. } => {
                for arm in arms {
                    collect_function_names(&arm.body, names);
                }
            }
            _ => {}
        }
    }
}

/// Collect names declared by statements (for free-variable exclusion)
fn collect_locals(stmts: &[Stmt], locals: &mut FxHashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::VarDecl { name, .. } | StmtKind::AtomicDecl { name, .. } => {
                locals.insert(name.clone());
            }
            StmtKind::TupleDestructure { names, .. } => {
                for name in names {
                    locals.insert(name.clone());
                }
            }
            StmtKind::Function(decl) => {
                locals.insert(decl.name.clone());
            }
            StmtKind::Iter { bindings, body, .. } => {
                for binding in bindings {
                    locals.insert(binding.clone());
                }
                collect_locals(body, locals);
            }
            StmtKind::If { then_branch, else_branch, .. } => {
                collect_locals(then_branch, locals);
                if let Some(else_branch) = else_branch {
                    collect_locals(else_branch, locals);
                }
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::Block(body) => collect_locals(body, locals),
            _ => {}
        }
    }
}

/// Collect identifier reads from statements
fn collect_idents(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Expression(e) | StmtKind::Return(Some(e)) => collect_expr_idents(e, out),
            StmtKind::VarDecl { init: Some(e), .. } => collect_expr_idents(e, out),
            StmtKind::TupleDestructure { value, .. } => collect_expr_idents(value, out),
            StmtKind::If { condition, then_branch, else_branch } => {
                collect_expr_idents(condition, out);
                collect_idents(then_branch, out);
                if let Some(else_branch) = else_branch {
                    collect_idents(else_branch, out);
                }
            }
            StmtKind::While { condition, body } => {
                collect_expr_idents(condition, out);
                collect_idents(body, out);
            }
            StmtKind::For { init, condition, increment, body } => {
                if let Some(init) = init {
                    collect_idents(std::slice::from_ref(init), out);
                }
                if let Some(condition) = condition {
                    collect_expr_idents(condition, out);
                }
                if let Some(increment) = increment {
                    collect_expr_idents(increment, out);
                }
                collect_idents(body, out);
            }
            StmtKind::Iter { iterable, body, .. } => {
                collect_expr_idents(iterable, out);
                collect_idents(body, out);
            }
            StmtKind::Match { scrutinee, arms } => {
                collect_expr_idents(scrutinee, out);
                for arm in arms {
                    if let Some(guard) = &arm.guard {
                        collect_expr_idents(guard, out);
                    }
                    collect_idents(&arm.body, out);
                }
            }
            StmtKind::Print(args) => {
                for arg in args {
                    collect_expr_idents(arg, out);
                }
            }
            StmtKind::Contract { condition, message } => {
                collect_expr_idents(condition, out);
                collect_expr_idents(message, out);
            }
            StmtKind::Block(body) => collect_idents(body, out),
            StmtKind::Function(decl) => collect_idents(&decl.body, out),
            _ => {}
        }
    }
}

fn collect_expr_idents(expr: &Expr, out: &mut Vec<String>) {
    match &expr.kind {
        ExprKind::Ident(name) => out.push(name.clone()),
        ExprKind::Binary { left, right, .. } => {
            collect_expr_idents(left, out);
            collect_expr_idents(right, out);
        }
        ExprKind::Unary { operand, .. } => collect_expr_idents(operand, out),
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            collect_expr_idents(target, out);
            collect_expr_idents(value, out);
        }
        ExprKind::Call { callee, args, named_args } => {
            collect_expr_idents(callee, out);
            for arg in args {
                collect_expr_idents(arg, out);
            }
            for (_, value) in named_args {
                collect_expr_idents(value, out);
            }
        }
        ExprKind::Member { object, .. } => collect_expr_idents(object, out),
        ExprKind::Index { object, index } => {
            collect_expr_idents(object, out);
            collect_expr_idents(index, out);
        }
        ExprKind::Lambda { body, .. } => collect_idents(body, out),
        ExprKind::ListLit(items) | ExprKind::TupleLit(items) => {
            for item in items {
                collect_expr_idents(item, out);
            }
        }
        ExprKind::DictLit(entries) => {
            for (k, v) in entries {
                collect_expr_idents(k, out);
                collect_expr_idents(v, out);
            }
        }
        ExprKind::Range { start, end, step, .. } => {
            collect_expr_idents(start, out);
            collect_expr_idents(end, out);
            if let Some(step) = step {
                collect_expr_idents(step, out);
            }
        }
        ExprKind::Interpolation(parts) => {
            for part in parts {
                if let InterpPart::Expr(e) = part {
                    collect_expr_idents(e, out);
                }
            }
        }
        ExprKind::Ok(inner) | ExprKind::Fallible { inner, .. } | ExprKind::Await(inner) => {
            collect_expr_idents(inner, out);
            if let ExprKind::Fallible { handler: Some(handler), .. } = &expr.kind {
                collect_expr_idents(handler, out);
            }
        }
        ExprKind::Err { args, .. } => {
            for arg in args {
                collect_expr_idents(arg, out);
            }
        }
        _ => {}
    }
}
