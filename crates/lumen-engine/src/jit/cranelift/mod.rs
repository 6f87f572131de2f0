//! Cranelift code emitter
//!
//! Lowers LIR functions to native code in a single pass over each linear
//! instruction vector: registers become Cranelift variables created on
//! demand, `Label` instructions switch (or create) blocks, conditional
//! jumps get explicit continuation blocks, and instructions arriving after
//! a terminator without a label open a synthetic fall-through block.
//! Writes into an already-terminated block are logged and skipped.
//!
//! Error unions use a word-tagged i64: `(payload << 1) | is_error`.

use cranelift_codegen::ir::{self, condcodes::FloatCC, condcodes::IntCC, types, AbiParam, InstBuilder, MemFlags, Signature};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, FuncId, Linkage, Module};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::emitter::{CodeEmitter, CompileMode, EmitError, EmittedModule};
use super::runtime;
use crate::lir::instr::{AbiType, LirOp, Reg, NO_REG};
use crate::lir::LirFunction;
use crate::types::ValueData;

/// The in-tree emitter
#[derive(Debug, Default)]
pub struct CraneliftEmitter {
    debug: bool,
}

impl CraneliftEmitter {
    /// Create an emitter
    pub fn new() -> Self {
        CraneliftEmitter { debug: false }
    }

    /// Log the generated IR per function
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    fn compile_to_memory(
        &mut self,
        functions: &[Arc<LirFunction>],
    ) -> Result<EmittedModule, EmitError> {
        let mut builder = JITBuilder::new(cranelift_module::default_libcall_names())
            .map_err(|e| EmitError::Backend(e.to_string()))?;
        for (name, ptr) in runtime::runtime_symbols() {
            builder.symbol(name, ptr);
        }
        let mut module = JITModule::new(builder);

        let (func_ids, signatures) = declare_functions(&mut module, functions)?;
        let mut import_cache = FxHashMap::default();
        let mut string_counter = 0u32;
        for func in functions {
            define_function(
                &mut module,
                &func_ids,
                &signatures,
                &mut import_cache,
                func,
                &mut string_counter,
                self.debug,
            )?;
        }
        module
            .finalize_definitions()
            .map_err(|e| EmitError::Backend(e.to_string()))?;

        let mut symbols = FxHashMap::default();
        for func in functions {
            if let Some(&id) = func_ids.get(&func.name) {
                symbols.insert(func.name.clone(), module.get_finalized_function(id));
            }
        }
        Ok(EmittedModule::new(symbols, Box::new(module)))
    }

    #[cfg(feature = "aot")]
    fn compile_to_object(
        &mut self,
        functions: &[Arc<LirFunction>],
        mode: CompileMode,
        output_path: &std::path::Path,
    ) -> Result<EmittedModule, EmitError> {
        use cranelift_codegen::settings::{self, Configurable};
        use cranelift_object::{ObjectBuilder, ObjectModule};

        let mut flag_builder = settings::builder();
        flag_builder
            .set("is_pic", "true")
            .map_err(|e| EmitError::Backend(e.to_string()))?;
        let isa = cranelift_native::builder()
            .map_err(|e| EmitError::Backend(e.to_string()))?
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| EmitError::Backend(e.to_string()))?;
        let obj_builder =
            ObjectBuilder::new(isa, "lumen", cranelift_module::default_libcall_names())
                .map_err(|e| EmitError::Backend(e.to_string()))?;
        let mut module = ObjectModule::new(obj_builder);

        let (func_ids, signatures) = declare_functions(&mut module, functions)?;
        let mut import_cache = FxHashMap::default();
        let mut string_counter = 0u32;
        for func in functions {
            define_function(
                &mut module,
                &func_ids,
                &signatures,
                &mut import_cache,
                func,
                &mut string_counter,
                self.debug,
            )?;
        }

        let product = module.finish();
        let bytes = product
            .emit()
            .map_err(|e| EmitError::Backend(e.to_string()))?;

        match mode {
            CompileMode::ToFile => {
                std::fs::write(output_path, bytes)?;
            }
            _ => {
                // Link through the system compiler driver; the runtime
                // helpers resolve from the host C library at link time.
                let object_path = output_path.with_extension("o");
                std::fs::write(&object_path, bytes)?;
                let status = std::process::Command::new("cc")
                    .arg(&object_path)
                    .arg("-o")
                    .arg(output_path)
                    .status()?;
                if !status.success() {
                    return Err(EmitError::Backend(format!(
                        "linker exited with {}",
                        status
                    )));
                }
            }
        }
        Ok(EmittedModule::new(FxHashMap::default(), Box::new(())))
    }
}

impl CodeEmitter for CraneliftEmitter {
    fn name(&self) -> &str {
        "cranelift"
    }

    fn compile(
        &mut self,
        functions: &[Arc<LirFunction>],
        mode: CompileMode,
        output_path: Option<&std::path::Path>,
    ) -> Result<EmittedModule, EmitError> {
        match mode {
            CompileMode::ToMemory => self.compile_to_memory(functions),
            #[cfg(feature = "aot")]
            CompileMode::ToFile | CompileMode::ToExecutable => {
                let path = output_path
                    .ok_or_else(|| EmitError::Backend("output path required".to_string()))?;
                self.compile_to_object(functions, mode, path)
            }
            #[cfg(not(feature = "aot"))]
            CompileMode::ToFile | CompileMode::ToExecutable => {
                let _ = output_path;
                Err(EmitError::UnsupportedMode(mode))
            }
        }
    }
}

/// Cranelift type for an ABI type; `None` for void
fn cl_type(ty: AbiType, ptr: types::Type) -> Option<types::Type> {
    match ty {
        AbiType::I32 => Some(types::I32),
        AbiType::I64 => Some(types::I64),
        AbiType::F64 => Some(types::F64),
        AbiType::Bool => Some(types::I8),
        AbiType::Ptr => Some(ptr),
        AbiType::Void => None,
    }
}

fn make_signature<M: Module>(module: &M, func: &LirFunction) -> Signature {
    let ptr = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    for reg in 0..func.param_count {
        let ty = cl_type(func.register_type(reg), ptr).unwrap_or(types::I64);
        sig.params.push(AbiParam::new(ty));
    }
    if let Some(ret) = cl_type(func.return_type, ptr) {
        sig.returns.push(AbiParam::new(ret));
    }
    sig
}

type DeclaredFunctions = (FxHashMap<String, FuncId>, FxHashMap<String, Signature>);

fn declare_functions<M: Module>(
    module: &mut M,
    functions: &[Arc<LirFunction>],
) -> Result<DeclaredFunctions, EmitError> {
    let mut ids = FxHashMap::default();
    let mut signatures = FxHashMap::default();
    for func in functions {
        let sig = make_signature(module, func);
        let id = module
            .declare_function(&func.name, Linkage::Export, &sig)
            .map_err(|e| EmitError::Backend(e.to_string()))?;
        ids.insert(func.name.clone(), id);
        signatures.insert(func.name.clone(), sig);
    }
    Ok((ids, signatures))
}

/// Declare (or reuse) an imported host symbol
fn import<M: Module>(
    module: &mut M,
    cache: &mut FxHashMap<String, FuncId>,
    name: &str,
    params: &[types::Type],
    ret: Option<types::Type>,
) -> Result<FuncId, EmitError> {
    if let Some(&id) = cache.get(name) {
        return Ok(id);
    }
    let mut sig = module.make_signature();
    for &p in params {
        sig.params.push(AbiParam::new(p));
    }
    if let Some(r) = ret {
        sig.returns.push(AbiParam::new(r));
    }
    let id = module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| EmitError::Backend(e.to_string()))?;
    cache.insert(name.to_string(), id);
    Ok(id)
}

#[allow(clippy::too_many_arguments)]
fn define_function<M: Module>(
    module: &mut M,
    func_ids: &FxHashMap<String, FuncId>,
    signatures: &FxHashMap<String, Signature>,
    import_cache: &mut FxHashMap<String, FuncId>,
    func: &LirFunction,
    string_counter: &mut u32,
    debug: bool,
) -> Result<(), EmitError> {
    let ptr_ty = module.target_config().pointer_type();
    let mut cctx = module.make_context();
    cctx.func.signature = make_signature(module, func);
    let func_id = func_ids
        .get(&func.name)
        .copied()
        .ok_or_else(|| EmitError::MissingSymbol(func.name.clone()))?;

    let mut fb_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut cctx.func, &mut fb_ctx);

    // One Cranelift variable per LIR register, zero-initialised in the
    // entry block so every use is dominated by a definition.
    let mut vars: FxHashMap<Reg, (Variable, types::Type)> = FxHashMap::default();
    for reg in 0..func.register_count {
        let ty = cl_type(func.register_type(reg), ptr_ty).unwrap_or(types::I64);
        let var = builder.declare_var(ty);
        vars.insert(reg, (var, ty));
    }

    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);

    for reg in 0..func.register_count {
        let (var, ty) = vars[&reg];
        let zero = if ty == types::F64 {
            builder.ins().f64const(0.0)
        } else {
            builder.ins().iconst(ty, 0)
        };
        builder.def_var(var, zero);
    }
    for reg in 0..func.param_count {
        let (var, _) = vars[&reg];
        let value = builder.block_params(entry)[reg as usize];
        builder.def_var(var, value);
    }

    let mut lower = Lowerer {
        module: &mut *module,
        func_ids,
        signatures,
        import_cache,
        func,
        vars,
        blocks: FxHashMap::default(),
        terminated: false,
        pending_args: Vec::new(),
        string_counter,
        ptr_ty,
    };
    lower.walk(&mut builder)?;

    builder.seal_all_blocks();
    builder.finalize();

    if debug {
        debug!(function = %func.name, ir = %cctx.func.display(), "lowered");
    }

    module
        .define_function(func_id, &mut cctx)
        .map_err(|e| EmitError::Backend(format!("{}: {}", func.name, e)))?;
    module.clear_context(&mut cctx);
    Ok(())
}

struct Lowerer<'a, M: Module> {
    module: &'a mut M,
    func_ids: &'a FxHashMap<String, FuncId>,
    signatures: &'a FxHashMap<String, Signature>,
    import_cache: &'a mut FxHashMap<String, FuncId>,
    func: &'a LirFunction,
    vars: FxHashMap<Reg, (Variable, types::Type)>,
    blocks: FxHashMap<u32, ir::Block>,
    terminated: bool,
    pending_args: Vec<Reg>,
    string_counter: &'a mut u32,
    ptr_ty: types::Type,
}

impl<'a, M: Module> Lowerer<'a, M> {
    fn block_for_label(&mut self, builder: &mut FunctionBuilder<'_>, label: u32) -> ir::Block {
        *self
            .blocks
            .entry(label)
            .or_insert_with(|| builder.create_block())
    }

    fn use_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg) -> ir::Value {
        let (var, _) = self.vars[&reg];
        builder.use_var(var)
    }

    fn def_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg, value: ir::Value) {
        if reg == NO_REG {
            return;
        }
        let (var, _) = self.vars[&reg];
        builder.def_var(var, value);
    }

    fn reg_cl_type(&self, reg: Reg) -> types::Type {
        self.vars.get(&reg).map(|(_, ty)| *ty).unwrap_or(types::I64)
    }

    /// Convert a value between Cranelift types
    fn coerce(
        &self,
        builder: &mut FunctionBuilder<'_>,
        value: ir::Value,
        from: types::Type,
        to: types::Type,
    ) -> ir::Value {
        if from == to {
            return value;
        }
        match (from, to) {
            (types::F64, _) => builder.ins().fcvt_to_sint(to, value),
            (_, types::F64) => builder.ins().fcvt_from_sint(types::F64, value),
            (types::I8, _) => builder.ins().uextend(to, value),
            (_, types::I8) => {
                let zero = builder.ins().iconst(from, 0);
                builder.ins().icmp(IntCC::NotEqual, value, zero)
            }
            (a, b) if a.bits() < b.bits() => builder.ins().sextend(to, value),
            _ => builder.ins().ireduce(to, value),
        }
    }

    /// Read two operands, promoting to a common type (F64 wins)
    fn binary_operands(
        &self,
        builder: &mut FunctionBuilder<'_>,
        a: Reg,
        b: Reg,
    ) -> (ir::Value, ir::Value, types::Type) {
        let ta = self.reg_cl_type(a);
        let tb = self.reg_cl_type(b);
        let common = if ta == types::F64 || tb == types::F64 {
            types::F64
        } else if ta.bits() >= tb.bits() {
            ta
        } else {
            tb
        };
        let va = self.use_reg(builder, a);
        let vb = self.use_reg(builder, b);
        (
            self.coerce(builder, va, ta, common),
            self.coerce(builder, vb, tb, common),
            common,
        )
    }

    fn call_import(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        name: &str,
        params: &[types::Type],
        ret: Option<types::Type>,
        args: &[ir::Value],
    ) -> Result<Option<ir::Value>, EmitError> {
        let id = import(self.module, self.import_cache, name, params, ret)?;
        let func_ref = self.module.declare_func_in_func(id, builder.func);
        let call = builder.ins().call(func_ref, args);
        Ok(builder.inst_results(call).first().copied())
    }

    fn string_data(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        text: &str,
    ) -> Result<ir::Value, EmitError> {
        let name = format!("str.{}.{}", self.func.name, self.string_counter);
        *self.string_counter += 1;
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let data_id = self
            .module
            .declare_data(&name, Linkage::Local, false, false)
            .map_err(|e| EmitError::Backend(e.to_string()))?;
        let mut desc = DataDescription::new();
        desc.define(bytes.into_boxed_slice());
        self.module
            .define_data(data_id, &desc)
            .map_err(|e| EmitError::Backend(e.to_string()))?;
        let gv = self.module.declare_data_in_func(data_id, builder.func);
        Ok(builder.ins().symbol_value(self.ptr_ty, gv))
    }

    fn emit_return(&mut self, builder: &mut FunctionBuilder<'_>, value: Option<(ir::Value, types::Type)>) {
        let ret_ty = cl_type(self.func.return_type, self.ptr_ty);
        match (ret_ty, value) {
            (Some(expected), Some((value, actual))) => {
                let value = self.coerce(builder, value, actual, expected);
                builder.ins().return_(&[value]);
            }
            (Some(expected), None) => {
                let zero = if expected == types::F64 {
                    builder.ins().f64const(0.0)
                } else {
                    builder.ins().iconst(expected, 0)
                };
                builder.ins().return_(&[zero]);
            }
            (None, _) => {
                builder.ins().return_(&[]);
            }
        }
        self.terminated = true;
    }

    fn walk(&mut self, builder: &mut FunctionBuilder<'_>) -> Result<(), EmitError> {
        // Copy the function reference out so iterating does not hold `self`.
        let func: &LirFunction = self.func;
        for (pc, inst) in func.instructions.iter().enumerate() {
            if inst.op == LirOp::Label {
                let target = self.block_for_label(builder, inst.imm);
                if !self.terminated {
                    builder.ins().jump(target, &[]);
                }
                builder.switch_to_block(target);
                self.terminated = false;
                continue;
            }
            if self.terminated {
                // Dead code after a terminator without a label gets its own
                // synthetic fall-through block.
                let synth = builder.create_block();
                builder.switch_to_block(synth);
                self.terminated = false;
            }
            self.lower_inst(builder, inst, pc)?;
        }
        if !self.terminated {
            self.emit_return(builder, None);
        }
        Ok(())
    }

    fn lower_inst(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        inst: &crate::lir::LirInst,
        pc: usize,
    ) -> Result<(), EmitError> {
        match inst.op {
            LirOp::FuncDef | LirOp::Nop => {}
            LirOp::Param => {
                if inst.dst == NO_REG && inst.a != NO_REG {
                    self.pending_args.push(inst.a);
                }
            }
            LirOp::Mov => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let to = self.reg_cl_type(inst.dst);
                let value = self.coerce(builder, value, from, to);
                self.def_reg(builder, inst.dst, value);
            }
            LirOp::LoadConst => {
                let ty = self.reg_cl_type(inst.dst);
                let value = match inst.const_val.as_ref().map(|v| &v.data) {
                    Some(ValueData::Int(v)) => builder.ins().iconst(ty, *v),
                    Some(ValueData::UInt(v)) => {
                        // Out-of-range u64 literals fall back to zero.
                        let v = i64::try_from(*v).unwrap_or(0);
                        builder.ins().iconst(ty, v)
                    }
                    Some(ValueData::Float32(v)) => builder.ins().f64const(*v as f64),
                    Some(ValueData::Float64(v)) => builder.ins().f64const(*v),
                    Some(ValueData::Bool(v)) => builder.ins().iconst(types::I8, *v as i64),
                    Some(ValueData::Str(s)) => {
                        let s = s.clone();
                        self.string_data(builder, &s)?
                    }
                    Some(ValueData::Nil) | None => builder.ins().iconst(ty, 0),
                    Some(other) => {
                        return Err(EmitError::Unsupported(format!(
                            "constant kind {:?} at pc {}",
                            std::mem::discriminant(other),
                            pc
                        )))
                    }
                };
                self.def_reg(builder, inst.dst, value);
            }
            LirOp::Add | LirOp::Sub | LirOp::Mul | LirOp::Div => {
                let (a, b, ty) = self.binary_operands(builder, inst.a, inst.b);
                let result = if ty == types::F64 {
                    match inst.op {
                        LirOp::Add => builder.ins().fadd(a, b),
                        LirOp::Sub => builder.ins().fsub(a, b),
                        LirOp::Mul => builder.ins().fmul(a, b),
                        _ => builder.ins().fdiv(a, b),
                    }
                } else {
                    match inst.op {
                        LirOp::Add => builder.ins().iadd(a, b),
                        LirOp::Sub => builder.ins().isub(a, b),
                        LirOp::Mul => builder.ins().imul(a, b),
                        _ => builder.ins().sdiv(a, b),
                    }
                };
                let result = self.coerce(builder, result, ty, self.reg_cl_type(inst.dst));
                self.def_reg(builder, inst.dst, result);
            }
            LirOp::Mod => {
                // Modulo is integer-only.
                let (a, b, ty) = self.binary_operands(builder, inst.a, inst.b);
                if ty == types::F64 {
                    return Err(EmitError::Unsupported(format!(
                        "float modulo at pc {}",
                        pc
                    )));
                }
                let result = builder.ins().srem(a, b);
                let result = self.coerce(builder, result, ty, self.reg_cl_type(inst.dst));
                self.def_reg(builder, inst.dst, result);
            }
            LirOp::Neg => {
                let value = self.use_reg(builder, inst.a);
                let ty = self.reg_cl_type(inst.a);
                let result = if ty == types::F64 {
                    builder.ins().fneg(value)
                } else {
                    builder.ins().ineg(value)
                };
                self.def_reg(builder, inst.dst, result);
            }
            LirOp::And | LirOp::Or | LirOp::Xor => {
                let a = self.use_reg(builder, inst.a);
                let b = self.use_reg(builder, inst.b);
                let result = match inst.op {
                    LirOp::And => builder.ins().band(a, b),
                    LirOp::Or => builder.ins().bor(a, b),
                    _ => builder.ins().bxor(a, b),
                };
                self.def_reg(builder, inst.dst, result);
            }
            LirOp::Shl | LirOp::Shr => {
                let a = self.use_reg(builder, inst.a);
                let b = self.use_reg(builder, inst.b);
                let result = if inst.op == LirOp::Shl {
                    builder.ins().ishl(a, b)
                } else {
                    builder.ins().sshr(a, b)
                };
                self.def_reg(builder, inst.dst, result);
            }
            LirOp::CmpEq | LirOp::CmpNe | LirOp::CmpLt | LirOp::CmpLe | LirOp::CmpGt
            | LirOp::CmpGe => {
                let (a, b, ty) = self.binary_operands(builder, inst.a, inst.b);
                let result = if ty == types::F64 {
                    let cc = match inst.op {
                        LirOp::CmpEq => FloatCC::Equal,
                        LirOp::CmpNe => FloatCC::NotEqual,
                        LirOp::CmpLt => FloatCC::LessThan,
                        LirOp::CmpLe => FloatCC::LessThanOrEqual,
                        LirOp::CmpGt => FloatCC::GreaterThan,
                        _ => FloatCC::GreaterThanOrEqual,
                    };
                    builder.ins().fcmp(cc, a, b)
                } else {
                    let cc = match inst.op {
                        LirOp::CmpEq => IntCC::Equal,
                        LirOp::CmpNe => IntCC::NotEqual,
                        LirOp::CmpLt => IntCC::SignedLessThan,
                        LirOp::CmpLe => IntCC::SignedLessThanOrEqual,
                        LirOp::CmpGt => IntCC::SignedGreaterThan,
                        _ => IntCC::SignedGreaterThanOrEqual,
                    };
                    builder.ins().icmp(cc, a, b)
                };
                self.def_reg(builder, inst.dst, result);
            }
            LirOp::Jump => {
                if self.terminated {
                    warn!(function = %self.func.name, pc, "jump in terminated block skipped");
                    return Ok(());
                }
                let target = self.block_for_label(builder, inst.imm);
                builder.ins().jump(target, &[]);
                self.terminated = true;
            }
            LirOp::JumpIfFalse | LirOp::JumpIf => {
                let cond = self.use_reg(builder, inst.a);
                let target = self.block_for_label(builder, inst.imm);
                // The continuation block must exist so the other branch has
                // somewhere to go.
                let continuation = builder.create_block();
                if inst.op == LirOp::JumpIfFalse {
                    builder.ins().brif(cond, continuation, &[], target, &[]);
                } else {
                    builder.ins().brif(cond, target, &[], continuation, &[]);
                }
                builder.switch_to_block(continuation);
                self.terminated = false;
            }
            LirOp::Ret => {
                if self.func.return_type == AbiType::Void || inst.a == NO_REG {
                    self.emit_return(builder, None);
                } else {
                    let value = self.use_reg(builder, inst.a);
                    let ty = self.reg_cl_type(inst.a);
                    self.emit_return(builder, Some((value, ty)));
                }
            }
            LirOp::Return => {
                self.emit_return(builder, None);
            }
            LirOp::Call => {
                let name = self
                    .func
                    .call_names
                    .get(inst.imm as usize)
                    .cloned()
                    .ok_or_else(|| {
                        EmitError::MissingSymbol(format!("call #{} in {}", inst.imm, self.func.name))
                    })?;
                let callee_id = self
                    .func_ids
                    .get(&name)
                    .copied()
                    .ok_or_else(|| EmitError::MissingSymbol(name.clone()))?;
                let sig = self
                    .signatures
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| EmitError::MissingSymbol(name.clone()))?;
                let args: Vec<Reg> = std::mem::take(&mut self.pending_args);
                let mut arg_values = Vec::with_capacity(args.len());
                for (i, reg) in args.iter().enumerate() {
                    let value = self.use_reg(builder, *reg);
                    let from = self.reg_cl_type(*reg);
                    let to = sig
                        .params
                        .get(i)
                        .map(|p| p.value_type)
                        .unwrap_or(types::I64);
                    arg_values.push(self.coerce(builder, value, from, to));
                }
                let func_ref = self.module.declare_func_in_func(callee_id, builder.func);
                let call = builder.ins().call(func_ref, &arg_values);
                if let Some(&result) = builder.inst_results(call).first() {
                    let from = sig
                        .returns
                        .first()
                        .map(|r| r.value_type)
                        .unwrap_or(types::I64);
                    let to = self.reg_cl_type(inst.dst);
                    let result = self.coerce(builder, result, from, to);
                    self.def_reg(builder, inst.dst, result);
                }
            }
            LirOp::PrintInt => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let value = self.coerce(builder, value, from, types::I64);
                self.call_import(builder, "jit_print_int", &[types::I64], None, &[value])?;
            }
            LirOp::PrintUint => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let value = self.coerce(builder, value, from, types::I64);
                self.call_import(builder, "jit_print_uint", &[types::I64], None, &[value])?;
            }
            LirOp::PrintFloat => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let value = self.coerce(builder, value, from, types::F64);
                self.call_import(builder, "jit_print_float", &[types::F64], None, &[value])?;
            }
            LirOp::PrintBool => {
                // Writes the literal "true" or "false".
                let cond = self.use_reg(builder, inst.a);
                let true_ptr = self.string_data(builder, "true")?;
                let false_ptr = self.string_data(builder, "false")?;
                let text = builder.ins().select(cond, true_ptr, false_ptr);
                self.call_import(
                    builder,
                    "puts",
                    &[self.ptr_ty],
                    Some(types::I32),
                    &[text],
                )?;
            }
            LirOp::PrintString => {
                let value = self.use_reg(builder, inst.a);
                self.call_import(
                    builder,
                    "puts",
                    &[self.ptr_ty],
                    Some(types::I32),
                    &[value],
                )?;
            }
            LirOp::Load => {
                let addr = self.use_reg(builder, inst.a);
                let ty = self.reg_cl_type(inst.dst);
                let value = builder.ins().load(ty, MemFlags::trusted(), addr, 0);
                self.def_reg(builder, inst.dst, value);
            }
            LirOp::Store => {
                let addr = self.use_reg(builder, inst.a);
                let value = self.use_reg(builder, inst.b);
                builder.ins().store(MemFlags::trusted(), value, addr, 0);
            }
            LirOp::Cast => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let to = self.reg_cl_type(inst.dst);
                let value = self.coerce(builder, value, from, to);
                self.def_reg(builder, inst.dst, value);
            }
            LirOp::ToString => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let result = if from == types::F64 {
                    self.call_import(
                        builder,
                        "jit_float_to_string",
                        &[types::F64],
                        Some(self.ptr_ty),
                        &[value],
                    )?
                } else if from == types::I8 {
                    self.call_import(
                        builder,
                        "jit_bool_to_string",
                        &[types::I8],
                        Some(self.ptr_ty),
                        &[value],
                    )?
                } else {
                    let value = self.coerce(builder, value, from, types::I64);
                    self.call_import(
                        builder,
                        "jit_int_to_string",
                        &[types::I64],
                        Some(self.ptr_ty),
                        &[value],
                    )?
                };
                if let Some(result) = result {
                    self.def_reg(builder, inst.dst, result);
                }
            }
            LirOp::Concat | LirOp::StrConcat => {
                // strlen both, allocate the sum plus the terminator through
                // the memory manager, then copy both halves.
                let a = self.use_reg(builder, inst.a);
                let b = self.use_reg(builder, inst.b);
                let len_a = self
                    .call_import(builder, "strlen", &[self.ptr_ty], Some(types::I64), &[a])?
                    .ok_or_else(|| EmitError::Backend("strlen returned nothing".into()))?;
                let len_b = self
                    .call_import(builder, "strlen", &[self.ptr_ty], Some(types::I64), &[b])?
                    .ok_or_else(|| EmitError::Backend("strlen returned nothing".into()))?;
                let total = builder.ins().iadd(len_a, len_b);
                let size = builder.ins().iadd_imm(total, 1);
                let buf = self
                    .call_import(
                        builder,
                        "mem_allocate",
                        &[types::I64],
                        Some(self.ptr_ty),
                        &[size],
                    )?
                    .ok_or_else(|| EmitError::Backend("mem_allocate returned nothing".into()))?;
                self.call_import(
                    builder,
                    "memcpy",
                    &[self.ptr_ty, self.ptr_ty, types::I64],
                    Some(self.ptr_ty),
                    &[buf, a, len_a],
                )?;
                let tail = builder.ins().iadd(buf, len_a);
                let len_b1 = builder.ins().iadd_imm(len_b, 1);
                self.call_import(
                    builder,
                    "memcpy",
                    &[self.ptr_ty, self.ptr_ty, types::I64],
                    Some(self.ptr_ty),
                    &[tail, b, len_b1],
                )?;
                self.def_reg(builder, inst.dst, buf);
            }
            LirOp::SbCreate => {
                let sb = self
                    .call_import(builder, "jit_sb_create", &[], Some(self.ptr_ty), &[])?
                    .ok_or_else(|| EmitError::Backend("jit_sb_create returned nothing".into()))?;
                self.def_reg(builder, inst.dst, sb);
            }
            LirOp::SbAppend => {
                // Dispatch on the appended register's type.
                let sb = self.use_reg(builder, inst.a);
                let value = self.use_reg(builder, inst.b);
                let ty = self.reg_cl_type(inst.b);
                if ty == types::F64 {
                    self.call_import(
                        builder,
                        "jit_sb_append_float",
                        &[self.ptr_ty, types::F64],
                        None,
                        &[sb, value],
                    )?;
                } else if ty == types::I8 {
                    self.call_import(
                        builder,
                        "jit_sb_append_bool",
                        &[self.ptr_ty, types::I8],
                        None,
                        &[sb, value],
                    )?;
                } else if self.func.register_type(inst.b) == AbiType::Ptr {
                    self.call_import(
                        builder,
                        "jit_sb_append_cstr",
                        &[self.ptr_ty, self.ptr_ty],
                        None,
                        &[sb, value],
                    )?;
                } else {
                    let value = self.coerce(builder, value, ty, types::I64);
                    self.call_import(
                        builder,
                        "jit_sb_append_int",
                        &[self.ptr_ty, types::I64],
                        None,
                        &[sb, value],
                    )?;
                }
            }
            LirOp::SbFinish => {
                let sb = self.use_reg(builder, inst.a);
                let out = self
                    .call_import(
                        builder,
                        "jit_sb_finish",
                        &[self.ptr_ty],
                        Some(self.ptr_ty),
                        &[sb],
                    )?
                    .ok_or_else(|| EmitError::Backend("jit_sb_finish returned nothing".into()))?;
                self.def_reg(builder, inst.dst, out);
            }
            LirOp::ConstructOk => {
                // (payload << 1) | 0
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let value = self.coerce(builder, value, from, types::I64);
                let tagged = builder.ins().ishl_imm(value, 1);
                self.def_reg(builder, inst.dst, tagged);
            }
            LirOp::ConstructError => {
                // Constructor arguments arrive as pending params; the tagged
                // word only carries the error index.
                self.pending_args.clear();
                // (error index << 1) | 1
                let tagged = ((inst.imm as i64) << 1) | 1;
                let value = builder.ins().iconst(types::I64, tagged);
                self.def_reg(builder, inst.dst, value);
            }
            LirOp::IsError => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let value = self.coerce(builder, value, from, types::I64);
                let bit = builder.ins().band_imm(value, 1);
                let zero = builder.ins().iconst(types::I64, 0);
                let result = builder.ins().icmp(IntCC::NotEqual, bit, zero);
                self.def_reg(builder, inst.dst, result);
            }
            LirOp::Unwrap => {
                let value = self.use_reg(builder, inst.a);
                let from = self.reg_cl_type(inst.a);
                let value = self.coerce(builder, value, from, types::I64);
                let payload = builder.ins().sshr_imm(value, 1);
                self.def_reg(builder, inst.dst, payload);
            }
            LirOp::UnwrapOr => {
                let value = self.use_reg(builder, inst.a);
                let fallback = self.use_reg(builder, inst.b);
                let from = self.reg_cl_type(inst.a);
                let value = self.coerce(builder, value, from, types::I64);
                let bit = builder.ins().band_imm(value, 1);
                let zero = builder.ins().iconst(types::I64, 0);
                let is_err = builder.ins().icmp(IntCC::NotEqual, bit, zero);
                let payload = builder.ins().sshr_imm(value, 1);
                let fb_ty = self.reg_cl_type(inst.b);
                let fallback = self.coerce(builder, fallback, fb_ty, types::I64);
                let result = builder.ins().select(is_err, fallback, payload);
                self.def_reg(builder, inst.dst, result);
            }
            other => {
                return Err(EmitError::Unsupported(format!(
                    "{:?} at pc {} in {}",
                    other, pc, self.func.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::instr::LirInst;
    use crate::lir::OptimizationFlags;
    use crate::types::{Type, Value, ValueData};

    fn int_const(func: &mut LirFunction, v: i64) -> Reg {
        let dst = func.allocate_register(AbiType::I64);
        let value = Arc::new(Value::new(Arc::new(Type::Int), ValueData::Int(v)));
        func.push(LirInst::load_const(dst, AbiType::I64, value));
        dst
    }

    fn ret(func: &mut LirFunction, reg: Reg) {
        func.push(LirInst::new(LirOp::Ret, AbiType::I64, NO_REG, reg, NO_REG));
    }

    fn compile_one(func: LirFunction) -> EmittedModule {
        let name = func.name.clone();
        let mut emitter = CraneliftEmitter::new();
        let module = emitter
            .compile(&[Arc::new(func)], CompileMode::ToMemory, None)
            .unwrap();
        assert!(module.symbol(&name).is_some());
        module
    }

    fn run_i64(module: &EmittedModule, name: &str) -> i64 {
        let ptr = module.symbol(name).unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(ptr) };
        f()
    }

    #[test]
    fn test_compile_constant_return() {
        let mut func = LirFunction::new("const42", 0);
        func.return_type = AbiType::I64;
        let r = int_const(&mut func, 42);
        ret(&mut func, r);
        let module = compile_one(func);
        assert_eq!(run_i64(&module, "const42"), 42);
    }

    #[test]
    fn test_compile_arithmetic() {
        let mut func = LirFunction::new("arith", 0);
        func.return_type = AbiType::I64;
        let a = int_const(&mut func, 3);
        let b = int_const(&mut func, 5);
        let dst = func.allocate_register(AbiType::I64);
        func.push(LirInst::new(LirOp::Add, AbiType::I64, dst, a, b));
        ret(&mut func, dst);
        let module = compile_one(func);
        assert_eq!(run_i64(&module, "arith"), 8);
    }

    #[test]
    fn test_compile_branch() {
        // return 7 < 9 ? 1 : 2
        let mut func = LirFunction::new("branch", 0);
        func.return_type = AbiType::I64;
        let a = int_const(&mut func, 7);
        let b = int_const(&mut func, 9);
        let cond = func.allocate_register(AbiType::Bool);
        func.push(LirInst::new(LirOp::CmpLt, AbiType::Bool, cond, a, b));
        let mut jf = LirInst::with_imm(LirOp::JumpIfFalse, AbiType::Void, NO_REG, 0);
        jf.a = cond;
        func.push(jf);
        let one = int_const(&mut func, 1);
        ret(&mut func, one);
        func.push(LirInst::with_imm(LirOp::Label, AbiType::Void, NO_REG, 0));
        let two = int_const(&mut func, 2);
        ret(&mut func, two);

        let module = compile_one(func);
        assert_eq!(run_i64(&module, "branch"), 1);
    }

    #[test]
    fn test_compile_loop() {
        // sum = 0; i = 0; while (i < 5) { sum += i; i += 1 } return sum
        let mut func = LirFunction::new("sum5", 0);
        func.return_type = AbiType::I64;
        let sum = int_const(&mut func, 0);
        let i = int_const(&mut func, 0);
        let five = int_const(&mut func, 5);
        let one = int_const(&mut func, 1);
        func.push(LirInst::with_imm(LirOp::Label, AbiType::Void, NO_REG, 0));
        let cond = func.allocate_register(AbiType::Bool);
        func.push(LirInst::new(LirOp::CmpLt, AbiType::Bool, cond, i, five));
        let mut jf = LirInst::with_imm(LirOp::JumpIfFalse, AbiType::Void, NO_REG, 1);
        jf.a = cond;
        func.push(jf);
        func.push(LirInst::new(LirOp::Add, AbiType::I64, sum, sum, i));
        func.push(LirInst::new(LirOp::Add, AbiType::I64, i, i, one));
        func.push(LirInst::with_imm(LirOp::Jump, AbiType::Void, NO_REG, 0));
        func.push(LirInst::with_imm(LirOp::Label, AbiType::Void, NO_REG, 1));
        ret(&mut func, sum);

        let module = compile_one(func);
        assert_eq!(run_i64(&module, "sum5"), 10);
    }

    #[test]
    fn test_compile_error_union_tagging() {
        // ok_path() { v = ConstructOk(21); return Unwrap(v) }
        let mut func = LirFunction::new("okpath", 0);
        func.return_type = AbiType::I64;
        let v = int_const(&mut func, 21);
        let tagged = func.allocate_register(AbiType::I64);
        func.push(LirInst::new(LirOp::ConstructOk, AbiType::I64, tagged, v, NO_REG));
        let unwrapped = func.allocate_register(AbiType::I64);
        func.push(LirInst::new(LirOp::Unwrap, AbiType::I64, unwrapped, tagged, NO_REG));
        ret(&mut func, unwrapped);

        let module = compile_one(func);
        assert_eq!(run_i64(&module, "okpath"), 21);
    }

    #[test]
    fn test_compile_is_error_on_constructed_error() {
        // err_flag() { e = ConstructError(#2); return IsError(e) ? 1 : 0 }
        let mut func = LirFunction::new("errflag", 0);
        func.return_type = AbiType::I64;
        let e = func.allocate_register(AbiType::I64);
        let mut construct = LirInst::new(LirOp::ConstructError, AbiType::I64, e, NO_REG, NO_REG);
        construct.imm = 2;
        func.push(construct);
        let flag = func.allocate_register(AbiType::Bool);
        func.push(LirInst::new(LirOp::IsError, AbiType::Bool, flag, e, NO_REG));
        let mut jf = LirInst::with_imm(LirOp::JumpIfFalse, AbiType::Void, NO_REG, 0);
        jf.a = flag;
        func.push(jf);
        let one = int_const(&mut func, 1);
        ret(&mut func, one);
        func.push(LirInst::with_imm(LirOp::Label, AbiType::Void, NO_REG, 0));
        let zero = int_const(&mut func, 0);
        ret(&mut func, zero);

        let module = compile_one(func);
        assert_eq!(run_i64(&module, "errflag"), 1);
    }

    #[test]
    fn test_compile_call_between_functions() {
        // callee(a) { return a * 2 }  caller() { return callee(21) }
        let mut callee = LirFunction::new("dbl", 1);
        callee.return_type = AbiType::I64;
        let param = callee.allocate_register(AbiType::I64);
        callee.push(LirInst::new(LirOp::Param, AbiType::I64, param, NO_REG, NO_REG));
        let two = int_const(&mut callee, 2);
        let result = callee.allocate_register(AbiType::I64);
        callee.push(LirInst::new(LirOp::Mul, AbiType::I64, result, param, two));
        ret(&mut callee, result);

        let mut caller = LirFunction::new("caller", 0);
        caller.return_type = AbiType::I64;
        let arg = int_const(&mut caller, 21);
        caller.push(LirInst::new(LirOp::Param, AbiType::I64, NO_REG, arg, NO_REG));
        let dst = caller.allocate_register(AbiType::I64);
        let index = caller.intern_call_name("dbl");
        let mut call = LirInst::new(LirOp::Call, AbiType::I64, dst, NO_REG, NO_REG);
        call.imm = index;
        caller.push(call);
        ret(&mut caller, dst);

        let mut emitter = CraneliftEmitter::new();
        let module = emitter
            .compile(
                &[Arc::new(callee), Arc::new(caller)],
                CompileMode::ToMemory,
                None,
            )
            .unwrap();
        assert_eq!(run_i64(&module, "caller"), 42);
    }

    #[test]
    fn test_missing_call_target_is_reported() {
        let mut func = LirFunction::new("broken", 0);
        func.return_type = AbiType::I64;
        let dst = func.allocate_register(AbiType::I64);
        let index = func.intern_call_name("nowhere");
        let mut call = LirInst::new(LirOp::Call, AbiType::I64, dst, NO_REG, NO_REG);
        call.imm = index;
        func.push(call);
        ret(&mut func, dst);

        let mut emitter = CraneliftEmitter::new();
        let result = emitter.compile(&[Arc::new(func)], CompileMode::ToMemory, None);
        assert!(matches!(result, Err(EmitError::MissingSymbol(name)) if name == "nowhere"));
    }

    #[test]
    fn test_unsupported_opcode_is_reported() {
        let mut func = LirFunction::new("sched", 0);
        func.push(LirInst::new(
            LirOp::SchedulerRun,
            AbiType::Void,
            NO_REG,
            NO_REG,
            NO_REG,
        ));
        let mut emitter = CraneliftEmitter::new();
        let result = emitter.compile(&[Arc::new(func)], CompileMode::ToMemory, None);
        assert!(matches!(result, Err(EmitError::Unsupported(_))));
    }

    #[test]
    fn test_optimized_function_still_compiles() {
        let mut func = LirFunction::new("folded", 0);
        func.return_type = AbiType::I64;
        func.optimizations = OptimizationFlags::all();
        let a = int_const(&mut func, 20);
        let b = int_const(&mut func, 22);
        let dst = func.allocate_register(AbiType::I64);
        func.push(LirInst::new(LirOp::Add, AbiType::I64, dst, a, b));
        ret(&mut func, dst);
        crate::lir::Optimizer::optimize(&mut func);

        let module = compile_one(func);
        assert_eq!(run_i64(&module, "folded"), 42);
    }
}
