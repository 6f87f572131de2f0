//! Reference register VM
//!
//! Executes a LIR function by stepping a program counter over the linear
//! instruction vector. Supports the core subset (moves, constants,
//! arithmetic, comparisons, jumps, return, print, concat, cast) and serves
//! as the oracle the JIT is validated against.

use super::function::LirFunction;
use super::instr::{LirInst, LirOp, Reg, NO_REG};
use crate::types::ValueData;
use rustc_hash::FxHashMap;
use std::fmt;
use thiserror::Error;

/// A value in the register file
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum RegValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    Nil,
}

impl RegValue {
    /// Boolean coercion, defined for every kind
    pub fn truthy(&self) -> bool {
        match self {
            RegValue::Int(v) => *v != 0,
            RegValue::UInt(v) => *v != 0,
            RegValue::Float(v) => *v != 0.0,
            RegValue::Bool(v) => *v,
            RegValue::Str(v) => !v.is_empty(),
            RegValue::Nil => false,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            RegValue::Int(v) => Some(*v as f64),
            RegValue::UInt(v) => Some(*v as f64),
            RegValue::Float(v) => Some(*v),
            RegValue::Bool(v) => Some(*v as i64 as f64),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            RegValue::Int(v) => Some(*v),
            RegValue::UInt(v) => Some(*v as i64),
            RegValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegValue::Int(v) => write!(f, "{}", v),
            RegValue::UInt(v) => write!(f, "{}", v),
            RegValue::Float(v) => write!(f, "{}", v),
            RegValue::Bool(v) => write!(f, "{}", v),
            RegValue::Str(v) => write!(f, "{}", v),
            RegValue::Nil => write!(f, "nil"),
        }
    }
}

/// Interpretation failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterpError {
    /// An opcode outside the supported subset
    #[error("unsupported opcode {0:?} at pc {1}")]
    Unsupported(LirOp, usize),

    /// Jump to a label that does not exist
    #[error("jump to undefined label L{0}")]
    UndefinedLabel(u32),

    /// An operand with the wrong kind
    #[error("type error at pc {0}")]
    TypeError(usize),

    /// Integer division or modulo by zero
    #[error("division by zero at pc {0}")]
    DivisionByZero(usize),
}

/// The reference interpreter
pub struct LirInterpreter {
    registers: FxHashMap<Reg, RegValue>,
    /// Everything the program printed, one entry per print
    pub output: Vec<String>,
}

impl LirInterpreter {
    /// Create an interpreter with an empty register file
    pub fn new() -> Self {
        LirInterpreter {
            registers: FxHashMap::default(),
            output: Vec::new(),
        }
    }

    fn get(&self, reg: Reg) -> RegValue {
        self.registers.get(&reg).cloned().unwrap_or(RegValue::Nil)
    }

    fn set(&mut self, reg: Reg, value: RegValue) {
        if reg != NO_REG {
            self.registers.insert(reg, value);
        }
    }

    /// Execute a function with arguments bound to the parameter registers.
    ///
    /// Returns the value of the `Ret` register, or `Nil` for a void return.
    pub fn execute(
        &mut self,
        func: &LirFunction,
        args: &[RegValue],
    ) -> Result<RegValue, InterpError> {
        // Labels are scanned up front so jumps resolve in O(1).
        let mut labels: FxHashMap<u32, usize> = FxHashMap::default();
        for (pc, inst) in func.instructions.iter().enumerate() {
            if inst.op == LirOp::Label {
                labels.insert(inst.imm, pc);
            }
        }

        for (i, arg) in args.iter().enumerate() {
            self.set(i as Reg, arg.clone());
        }

        let mut pc = 0usize;
        while pc < func.instructions.len() {
            let inst = &func.instructions[pc];
            match inst.op {
                LirOp::Label | LirOp::Nop | LirOp::FuncDef | LirOp::Param => {}
                LirOp::Mov => {
                    let value = self.get(inst.a);
                    self.set(inst.dst, value);
                }
                LirOp::LoadConst => {
                    let value = match inst.const_val.as_ref().map(|v| &v.data) {
                        Some(ValueData::Int(v)) => RegValue::Int(*v),
                        Some(ValueData::UInt(v)) => RegValue::UInt(*v),
                        Some(ValueData::Float32(v)) => RegValue::Float(*v as f64),
                        Some(ValueData::Float64(v)) => RegValue::Float(*v),
                        Some(ValueData::Bool(v)) => RegValue::Bool(*v),
                        Some(ValueData::Str(v)) => RegValue::Str(v.clone()),
                        _ => RegValue::Nil,
                    };
                    self.set(inst.dst, value);
                }
                LirOp::Add | LirOp::Sub | LirOp::Mul | LirOp::Div | LirOp::Mod => {
                    let result = self.arith(inst, pc)?;
                    self.set(inst.dst, result);
                }
                LirOp::Neg => {
                    let result = match self.get(inst.a) {
                        RegValue::Int(v) => RegValue::Int(-v),
                        RegValue::Float(v) => RegValue::Float(-v),
                        _ => return Err(InterpError::TypeError(pc)),
                    };
                    self.set(inst.dst, result);
                }
                LirOp::And | LirOp::Or | LirOp::Xor => {
                    let a = self.get(inst.a).truthy();
                    let b = self.get(inst.b).truthy();
                    let result = match inst.op {
                        LirOp::And => a && b,
                        LirOp::Or => a || b,
                        _ => a != b,
                    };
                    self.set(inst.dst, RegValue::Bool(result));
                }
                LirOp::CmpEq
                | LirOp::CmpNe
                | LirOp::CmpLt
                | LirOp::CmpLe
                | LirOp::CmpGt
                | LirOp::CmpGe => {
                    let result = self.compare(inst, pc)?;
                    self.set(inst.dst, RegValue::Bool(result));
                }
                LirOp::Jump => {
                    pc = Self::resolve(&labels, inst.imm)?;
                    continue;
                }
                LirOp::JumpIfFalse => {
                    if !self.get(inst.a).truthy() {
                        pc = Self::resolve(&labels, inst.imm)?;
                        continue;
                    }
                }
                LirOp::JumpIf => {
                    if self.get(inst.a).truthy() {
                        pc = Self::resolve(&labels, inst.imm)?;
                        continue;
                    }
                }
                LirOp::Ret => return Ok(self.get(inst.a)),
                LirOp::Return => return Ok(RegValue::Nil),
                LirOp::PrintInt
                | LirOp::PrintUint
                | LirOp::PrintFloat
                | LirOp::PrintBool
                | LirOp::PrintString => {
                    let value = self.get(inst.a);
                    self.output.push(format!("{}", value));
                }
                LirOp::Concat | LirOp::StrConcat => {
                    let a = format!("{}", self.get(inst.a));
                    let b = format!("{}", self.get(inst.b));
                    self.set(inst.dst, RegValue::Str(a + &b));
                }
                LirOp::Cast => {
                    let value = self.get(inst.a);
                    self.set(inst.dst, value);
                }
                LirOp::ToString => {
                    let value = format!("{}", self.get(inst.a));
                    self.set(inst.dst, RegValue::Str(value));
                }
                other => return Err(InterpError::Unsupported(other, pc)),
            }
            pc += 1;
        }
        Ok(RegValue::Nil)
    }

    fn resolve(labels: &FxHashMap<u32, usize>, label: u32) -> Result<usize, InterpError> {
        labels
            .get(&label)
            .copied()
            .ok_or(InterpError::UndefinedLabel(label))
    }

    /// Numeric binary ops promote to float on mixed input
    fn arith(&self, inst: &LirInst, pc: usize) -> Result<RegValue, InterpError> {
        let a = self.get(inst.a);
        let b = self.get(inst.b);
        let both_int = matches!(a, RegValue::Int(_) | RegValue::UInt(_))
            && matches!(b, RegValue::Int(_) | RegValue::UInt(_));
        if both_int {
            let x = a.as_int().ok_or(InterpError::TypeError(pc))?;
            let y = b.as_int().ok_or(InterpError::TypeError(pc))?;
            let result = match inst.op {
                LirOp::Add => x.wrapping_add(y),
                LirOp::Sub => x.wrapping_sub(y),
                LirOp::Mul => x.wrapping_mul(y),
                LirOp::Div => {
                    if y == 0 {
                        return Err(InterpError::DivisionByZero(pc));
                    }
                    x.wrapping_div(y)
                }
                _ => {
                    if y == 0 {
                        return Err(InterpError::DivisionByZero(pc));
                    }
                    x.wrapping_rem(y)
                }
            };
            return Ok(RegValue::Int(result));
        }
        let x = a.as_float().ok_or(InterpError::TypeError(pc))?;
        let y = b.as_float().ok_or(InterpError::TypeError(pc))?;
        let result = match inst.op {
            LirOp::Add => x + y,
            LirOp::Sub => x - y,
            LirOp::Mul => x * y,
            LirOp::Div => x / y,
            _ => x % y,
        };
        Ok(RegValue::Float(result))
    }

    /// String comparisons are lexicographic; numerics promote to float
    fn compare(&self, inst: &LirInst, pc: usize) -> Result<bool, InterpError> {
        let a = self.get(inst.a);
        let b = self.get(inst.b);
        let ordering = match (&a, &b) {
            (RegValue::Str(x), RegValue::Str(y)) => x.cmp(y),
            (RegValue::Bool(x), RegValue::Bool(y)) => x.cmp(y),
            (RegValue::Nil, RegValue::Nil) => std::cmp::Ordering::Equal,
            _ => {
                let x = a.as_float().ok_or(InterpError::TypeError(pc))?;
                let y = b.as_float().ok_or(InterpError::TypeError(pc))?;
                x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
            }
        };
        Ok(match inst.op {
            LirOp::CmpEq => ordering.is_eq(),
            LirOp::CmpNe => !ordering.is_eq(),
            LirOp::CmpLt => ordering.is_lt(),
            LirOp::CmpLe => ordering.is_le(),
            LirOp::CmpGt => ordering.is_gt(),
            _ => ordering.is_ge(),
        })
    }
}

impl Default for LirInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::instr::AbiType;
    use crate::types::{Type, Value, ValueData};
    use std::sync::Arc;

    fn int_const(dst: Reg, v: i64) -> LirInst {
        let value = Arc::new(Value::new(Arc::new(Type::Int), ValueData::Int(v)));
        LirInst::load_const(dst, AbiType::I64, value)
    }

    fn str_const(dst: Reg, s: &str) -> LirInst {
        let value = Arc::new(Value::new(
            Arc::new(Type::String),
            ValueData::Str(s.to_string()),
        ));
        LirInst::load_const(dst, AbiType::Ptr, value)
    }

    #[test]
    fn test_arithmetic() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let r2 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 10));
        func.push(int_const(r1, 4));
        func.push(LirInst::new(LirOp::Sub, AbiType::I64, r2, r0, r1));
        func.push(LirInst::new(LirOp::Ret, AbiType::I64, NO_REG, r2, NO_REG));

        let mut interp = LirInterpreter::new();
        assert_eq!(interp.execute(&func, &[]).unwrap(), RegValue::Int(6));
    }

    #[test]
    fn test_mixed_arithmetic_promotes_to_float() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::F64);
        let r2 = func.allocate_register(AbiType::F64);
        func.push(int_const(r0, 3));
        let half = Arc::new(Value::new(Arc::new(Type::Float64), ValueData::Float64(0.5)));
        func.push(LirInst::load_const(r1, AbiType::F64, half));
        func.push(LirInst::new(LirOp::Add, AbiType::F64, r2, r0, r1));
        func.push(LirInst::new(LirOp::Ret, AbiType::F64, NO_REG, r2, NO_REG));

        let mut interp = LirInterpreter::new();
        assert_eq!(interp.execute(&func, &[]).unwrap(), RegValue::Float(3.5));
    }

    #[test]
    fn test_jump_and_labels() {
        // if r0 < r1 return 1 else return 0, with args
        let mut func = LirFunction::new("lt", 2);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let cond = func.allocate_register(AbiType::Bool);
        let one = func.allocate_register(AbiType::I64);
        let zero = func.allocate_register(AbiType::I64);
        func.push(LirInst::new(LirOp::CmpLt, AbiType::Bool, cond, r0, r1));
        let mut jf = LirInst::with_imm(LirOp::JumpIfFalse, AbiType::Void, NO_REG, 0);
        jf.a = cond;
        func.push(jf);
        func.push(int_const(one, 1));
        func.push(LirInst::new(LirOp::Ret, AbiType::I64, NO_REG, one, NO_REG));
        func.push(LirInst::with_imm(LirOp::Label, AbiType::Void, NO_REG, 0));
        func.push(int_const(zero, 0));
        func.push(LirInst::new(LirOp::Ret, AbiType::I64, NO_REG, zero, NO_REG));

        let mut interp = LirInterpreter::new();
        assert_eq!(
            interp
                .execute(&func, &[RegValue::Int(1), RegValue::Int(2)])
                .unwrap(),
            RegValue::Int(1)
        );
        let mut interp = LirInterpreter::new();
        assert_eq!(
            interp
                .execute(&func, &[RegValue::Int(5), RegValue::Int(2)])
                .unwrap(),
            RegValue::Int(0)
        );
    }

    #[test]
    fn test_string_compare_is_lexicographic() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::Ptr);
        let r1 = func.allocate_register(AbiType::Ptr);
        let r2 = func.allocate_register(AbiType::Bool);
        func.push(str_const(r0, "apple"));
        func.push(str_const(r1, "banana"));
        func.push(LirInst::new(LirOp::CmpLt, AbiType::Bool, r2, r0, r1));
        func.push(LirInst::new(LirOp::Ret, AbiType::Bool, NO_REG, r2, NO_REG));

        let mut interp = LirInterpreter::new();
        assert_eq!(interp.execute(&func, &[]).unwrap(), RegValue::Bool(true));
    }

    #[test]
    fn test_concat_and_print() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::Ptr);
        let r1 = func.allocate_register(AbiType::Ptr);
        let r2 = func.allocate_register(AbiType::Ptr);
        func.push(str_const(r0, "he"));
        func.push(str_const(r1, "llo"));
        func.push(LirInst::new(LirOp::StrConcat, AbiType::Ptr, r2, r0, r1));
        func.push(LirInst::new(
            LirOp::PrintString,
            AbiType::Void,
            NO_REG,
            r2,
            NO_REG,
        ));
        func.push(LirInst::new(LirOp::Return, AbiType::Void, NO_REG, NO_REG, NO_REG));

        let mut interp = LirInterpreter::new();
        interp.execute(&func, &[]).unwrap();
        assert_eq!(interp.output, vec!["hello".to_string()]);
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let mut func = LirFunction::new("f", 0);
        let r0 = func.allocate_register(AbiType::I64);
        let r1 = func.allocate_register(AbiType::I64);
        let r2 = func.allocate_register(AbiType::I64);
        func.push(int_const(r0, 1));
        func.push(int_const(r1, 0));
        func.push(LirInst::new(LirOp::Div, AbiType::I64, r2, r0, r1));
        func.push(LirInst::new(LirOp::Ret, AbiType::I64, NO_REG, r2, NO_REG));

        let mut interp = LirInterpreter::new();
        assert!(matches!(
            interp.execute(&func, &[]),
            Err(InterpError::DivisionByZero(2))
        ));
    }

    #[test]
    fn test_unsupported_opcode_reported() {
        let mut func = LirFunction::new("f", 0);
        func.push(LirInst::new(
            LirOp::SchedulerRun,
            AbiType::Void,
            NO_REG,
            NO_REG,
            NO_REG,
        ));
        let mut interp = LirInterpreter::new();
        assert!(matches!(
            interp.execute(&func, &[]),
            Err(InterpError::Unsupported(LirOp::SchedulerRun, 0))
        ));
    }
}
