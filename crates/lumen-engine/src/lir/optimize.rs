//! LIR optimization passes
//!
//! Small, opt-in, and per-function: a peephole pass, constant folding, and
//! dead-code elimination. Passes rewrite the linear instruction vector and
//! rebuild the CFG afterwards; jumps target labels, so deleting
//! instructions never invalidates control flow.

use super::cfg::Cfg;
use super::function::LirFunction;
use super::instr::{AbiType, LirInst, LirOp, Reg, NO_REG};
use crate::types::{Value, ValueData};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::debug;

/// Runs the enabled passes on one function
pub struct Optimizer;

impl Optimizer {
    /// Run all passes the function's flags enable.
    ///
    /// Returns true when anything changed.
    pub fn optimize(func: &mut LirFunction) -> bool {
        let mut changed = false;
        if func.optimizations.peephole {
            changed |= Self::peephole(func);
        }
        if func.optimizations.constant_folding {
            changed |= Self::constant_folding(func);
        }
        if func.optimizations.dead_code_elimination {
            changed |= Self::dead_code_elimination(func);
        }
        if changed {
            func.cfg = Cfg::from_instructions(&func.instructions);
            debug!(function = %func.name, "optimized, cfg rebuilt");
        }
        changed
    }

    /// Remove `Mov r, r` and fold `x + 0` / `x * 1` into moves
    pub fn peephole(func: &mut LirFunction) -> bool {
        let consts = int_constants(func);
        let before = func.instructions.len();
        let mut changed = false;

        for inst in func.instructions.iter_mut() {
            let survivor = match inst.op {
                LirOp::Add => {
                    if const_of(&consts, inst.b) == Some(0) {
                        Some(inst.a)
                    } else if const_of(&consts, inst.a) == Some(0) {
                        Some(inst.b)
                    } else {
                        None
                    }
                }
                LirOp::Mul => {
                    if const_of(&consts, inst.b) == Some(1) {
                        Some(inst.a)
                    } else if const_of(&consts, inst.a) == Some(1) {
                        Some(inst.b)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some(src) = survivor {
                inst.op = LirOp::Mov;
                inst.a = src;
                inst.b = NO_REG;
                changed = true;
            }
        }

        func.instructions
            .retain(|inst| !(inst.op == LirOp::Mov && inst.dst == inst.a));
        changed || func.instructions.len() != before
    }

    /// Replace arithmetic and comparisons over known constants with
    /// `LoadConst`. Running the pass twice produces the same stream.
    pub fn constant_folding(func: &mut LirFunction) -> bool {
        let mut ints: FxHashMap<Reg, i64> = FxHashMap::default();
        let mut floats: FxHashMap<Reg, f64> = FxHashMap::default();
        let mut changed = false;

        // Registers written more than once are not constant.
        let mut writes: FxHashMap<Reg, usize> = FxHashMap::default();
        for inst in &func.instructions {
            if inst.dst != NO_REG {
                *writes.entry(inst.dst).or_default() += 1;
            }
        }
        let single = |reg: Reg| writes.get(&reg).copied() == Some(1);

        for inst in &func.instructions {
            if inst.op == LirOp::LoadConst && single(inst.dst) {
                match inst.const_val.as_ref().map(|v| &v.data) {
                    Some(ValueData::Int(v)) => {
                        ints.insert(inst.dst, *v);
                    }
                    Some(ValueData::UInt(v)) => {
                        ints.insert(inst.dst, *v as i64);
                    }
                    Some(ValueData::Float64(v)) => {
                        floats.insert(inst.dst, *v);
                    }
                    _ => {}
                }
            }
        }

        let int_ty = {
            // Folded integers keep the platform-word type.
            use crate::types::Type;
            Arc::new(Type::Int)
        };
        let float_ty = Arc::new(crate::types::Type::Float64);
        let bool_ty = Arc::new(crate::types::Type::Bool);

        let mut folded: Vec<LirInst> = Vec::with_capacity(func.instructions.len());
        for inst in &func.instructions {
            let mut replacement = None;

            if inst.op.is_binary_arith() && single(inst.dst) {
                if let (Some(&a), Some(&b)) = (ints.get(&inst.a), ints.get(&inst.b)) {
                    let result = match inst.op {
                        LirOp::Add => Some(a.wrapping_add(b)),
                        LirOp::Sub => Some(a.wrapping_sub(b)),
                        LirOp::Mul => Some(a.wrapping_mul(b)),
                        LirOp::Div if b != 0 => Some(a.wrapping_div(b)),
                        LirOp::Mod if b != 0 => Some(a.wrapping_rem(b)),
                        _ => None,
                    };
                    if let Some(result) = result {
                        ints.insert(inst.dst, result);
                        let value =
                            Arc::new(Value::new(Arc::clone(&int_ty), ValueData::Int(result)));
                        replacement = Some(
                            LirInst::load_const(inst.dst, inst.ty, value).at(inst.loc.clone()),
                        );
                    }
                } else if let (Some(&a), Some(&b)) = (floats.get(&inst.a), floats.get(&inst.b)) {
                    let result = match inst.op {
                        LirOp::Add => Some(a + b),
                        LirOp::Sub => Some(a - b),
                        LirOp::Mul => Some(a * b),
                        LirOp::Div => Some(a / b),
                        _ => None,
                    };
                    if let Some(result) = result {
                        floats.insert(inst.dst, result);
                        let value = Arc::new(Value::new(
                            Arc::clone(&float_ty),
                            ValueData::Float64(result),
                        ));
                        replacement = Some(
                            LirInst::load_const(inst.dst, AbiType::F64, value)
                                .at(inst.loc.clone()),
                        );
                    }
                }
            } else if inst.op.is_comparison() && single(inst.dst) {
                if let (Some(&a), Some(&b)) = (ints.get(&inst.a), ints.get(&inst.b)) {
                    let result = match inst.op {
                        LirOp::CmpEq => a == b,
                        LirOp::CmpNe => a != b,
                        LirOp::CmpLt => a < b,
                        LirOp::CmpLe => a <= b,
                        LirOp::CmpGt => a > b,
                        _ => a >= b,
                    };
                    let value =
                        Arc::new(Value::new(Arc::clone(&bool_ty), ValueData::Bool(result)));
                    replacement = Some(
                        LirInst::load_const(inst.dst, AbiType::Bool, value).at(inst.loc.clone()),
                    );
                }
            }

            match replacement {
                Some(new_inst) => {
                    changed = true;
                    folded.push(new_inst);
                }
                None => folded.push(inst.clone()),
            }
        }
        func.instructions = folded;
        changed
    }

    /// Delete pure instructions whose destination register is never read
    pub fn dead_code_elimination(func: &mut LirFunction) -> bool {
        let mut used: FxHashSet<Reg> = FxHashSet::default();
        for inst in &func.instructions {
            for src in inst.sources() {
                used.insert(src);
            }
        }
        let before = func.instructions.len();
        func.instructions.retain(|inst| {
            if !inst.op.is_pure() {
                return true;
            }
            if inst.op == LirOp::Nop {
                return false;
            }
            inst.dst == NO_REG || used.contains(&inst.dst)
        });
        before != func.instructions.len()
    }
}

fn int_constants(func: &LirFunction) -> FxHashMap<Reg, i64> {
    let mut consts = FxHashMap::default();
    for inst in &func.instructions {
        if inst.op == LirOp::LoadConst {
            if let Some(ValueData::Int(v)) = inst.const_val.as_ref().map(|v| &v.data) {
                consts.insert(inst.dst, *v);
            }
        }
    }
    consts
}

fn const_of(consts: &FxHashMap<Reg, i64>, reg: Reg) -> Option<i64> {
    if reg == NO_REG {
        return None;
    }
    consts.get(&reg).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::function::OptimizationFlags;
    use crate::types::Type;

    fn int_const(dst: Reg, v: i64) -> LirInst {
        let value = Arc::new(Value::new(Arc::new(Type::Int), ValueData::Int(v)));
        LirInst::load_const(dst, AbiType::I64, value)
    }

    fn ret(reg: Reg) -> LirInst {
        LirInst::new(LirOp::Ret, AbiType::I64, NO_REG, reg, NO_REG)
    }

    fn const_int_of(inst: &LirInst) -> Option<i64> {
        match inst.const_val.as_ref().map(|v| &v.data) {
            Some(ValueData::Int(v)) => Some(*v),
            _ => None,
        }
    }

    #[test]
    fn test_constant_folding_collapses_add() {
        // LoadConst r0, 2 ; LoadConst r1, 3 ; Add r2, r0, r1 ; Ret r2
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let r2 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 2));
        func.push(int_const(r1, 3));
        func.push(LirInst::new(LirOp::Add, AbiType::I64, r2, r0, r1));
        func.push(ret(r2));
        func.optimizations = OptimizationFlags {
            constant_folding: true,
            ..OptimizationFlags::default()
        };

        assert!(Optimizer::optimize(&mut func));
        let add_replaced = func
            .instructions
            .iter()
            .find(|i| i.dst == r2 && i.op == LirOp::LoadConst)
            .expect("Add collapsed to LoadConst");
        assert_eq!(const_int_of(add_replaced), Some(5));
        assert!(!func.instructions.iter().any(|i| i.op == LirOp::Add));
    }

    #[test]
    fn test_folding_disabled_preserves_stream() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let r2 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 2));
        func.push(int_const(r1, 3));
        func.push(LirInst::new(LirOp::Add, AbiType::I64, r2, r0, r1));
        func.push(ret(r2));
        // No flags set: nothing runs.
        assert!(!Optimizer::optimize(&mut func));
        assert!(func.instructions.iter().any(|i| i.op == LirOp::Add));
    }

    #[test]
    fn test_constant_folding_is_idempotent() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let r2 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 4));
        func.push(int_const(r1, 6));
        func.push(LirInst::new(LirOp::Mul, AbiType::I64, r2, r0, r1));
        func.push(ret(r2));

        Optimizer::constant_folding(&mut func);
        let first: Vec<(LirOp, Reg)> =
            func.instructions.iter().map(|i| (i.op, i.dst)).collect();
        Optimizer::constant_folding(&mut func);
        let second: Vec<(LirOp, Reg)> =
            func.instructions.iter().map(|i| (i.op, i.dst)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let r2 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 1));
        func.push(int_const(r1, 0));
        func.push(LirInst::new(LirOp::Div, AbiType::I64, r2, r0, r1));
        func.push(ret(r2));
        Optimizer::constant_folding(&mut func);
        assert!(func.instructions.iter().any(|i| i.op == LirOp::Div));
    }

    #[test]
    fn test_peephole_removes_self_move_and_identities() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let r2 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 7));
        func.push(int_const(r1, 0));
        // r2 = r0 + 0 becomes Mov r2, r0
        func.push(LirInst::new(LirOp::Add, AbiType::I64, r2, r0, r1));
        // Mov r0, r0 disappears
        func.push(LirInst::new(LirOp::Mov, AbiType::I64, r0, r0, NO_REG));
        func.push(ret(r2));

        assert!(Optimizer::peephole(&mut func));
        assert!(func
            .instructions
            .iter()
            .any(|i| i.op == LirOp::Mov && i.dst == r2 && i.a == r0));
        assert!(!func
            .instructions
            .iter()
            .any(|i| i.op == LirOp::Mov && i.dst == i.a));
    }

    #[test]
    fn test_dce_removes_unused_pure_results() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 1));
        func.push(int_const(r1, 99)); // dead
        func.push(ret(r0));
        assert!(Optimizer::dead_code_elimination(&mut func));
        assert_eq!(func.instructions.len(), 2);
        assert!(!func.instructions.iter().any(|i| i.dst == r1));
    }

    #[test]
    fn test_dce_keeps_side_effects() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 1));
        func.push(LirInst::new(LirOp::PrintInt, AbiType::Void, NO_REG, r0, NO_REG));
        func.push(LirInst::new(LirOp::Return, AbiType::Void, NO_REG, NO_REG, NO_REG));
        assert!(!Optimizer::dead_code_elimination(&mut func));
        assert_eq!(func.instructions.len(), 3);
    }
}
