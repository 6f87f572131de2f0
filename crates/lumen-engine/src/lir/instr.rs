//! LIR instructions
//!
//! Three-address instructions over an infinite register file. Each
//! instruction carries the ABI type of its destination register; language
//! types are lowered to ABI types when LIR is built. Control flow targets
//! label ids (`Label` instructions), not raw instruction indices, so
//! optimization passes may delete instructions freely.

use crate::types::ValuePtr;
use std::fmt;

/// A virtual register id
pub type Reg = u32;

/// Register id used for "no register"
pub const NO_REG: Reg = u32::MAX;

/// ABI-level types carried by registers
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AbiType {
    I32,
    I64,
    F64,
    Bool,
    Ptr,
    #[default]
    Void,
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AbiType::I32 => "i32",
            AbiType::I64 => "i64",
            AbiType::F64 => "f64",
            AbiType::Bool => "bool",
            AbiType::Ptr => "ptr",
            AbiType::Void => "void",
        };
        write!(f, "{}", name)
    }
}

/// LIR operations
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LirOp {
    // Move and constants
    Mov,
    LoadConst,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // Bitwise / logical
    And,
    Or,
    Xor,
    Shl,
    Shr,

    // Comparisons
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,

    // Control flow
    Jump,
    JumpIfFalse,
    JumpIf,
    Label,
    Call,
    Return,

    // Function definition
    FuncDef,
    Param,
    Ret,

    // Typed prints
    PrintInt,
    PrintUint,
    PrintFloat,
    PrintBool,
    PrintString,

    Nop,

    // Memory
    Load,
    Store,

    // Type ops
    Cast,
    ToString,

    // Strings
    Concat,
    StrConcat,
    StrFormat,

    // String builder
    SbCreate,
    SbAppend,
    SbFinish,

    // Error handling
    ConstructError,
    ConstructOk,
    IsError,
    Unwrap,
    UnwrapOr,

    // Atomics
    AtomicLoad,
    AtomicStore,
    AtomicFetchAdd,

    // Async
    Await,
    AsyncCall,

    // Threadless concurrency: task contexts
    TaskContextAlloc,
    TaskContextInit,
    TaskGetState,
    TaskSetState,
    TaskSetField,
    TaskGetField,

    // Single-threaded channels
    ChannelAlloc,
    ChannelPush,
    ChannelPop,
    ChannelHasData,

    // Scheduler control
    SchedulerInit,
    SchedulerRun,
    SchedulerTick,

    // Time
    GetTickCount,
    DelayUntil,

    // Lock-free parallel operations
    WorkQueueAlloc,
    WorkQueuePush,
    WorkQueuePop,
    ParallelWaitComplete,
    WorkerSignal,
    WorkerJoin,

    // Collections
    ListCreate,
    ListAppend,
    ListIndex,

    // Objects
    NewObject,
    GetField,
    SetField,

    // Modules
    ImportModule,
    ExportSymbol,
    BeginModule,
    EndModule,
}

impl LirOp {
    /// Whether this op ends a basic block
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            LirOp::Jump | LirOp::JumpIfFalse | LirOp::JumpIf | LirOp::Return | LirOp::Ret
        )
    }

    /// Whether this op may be removed when its destination is dead.
    /// Stores, calls, prints, returns, and control flow must stay.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            LirOp::Mov
                | LirOp::LoadConst
                | LirOp::Add
                | LirOp::Sub
                | LirOp::Mul
                | LirOp::Div
                | LirOp::Mod
                | LirOp::Neg
                | LirOp::And
                | LirOp::Or
                | LirOp::Xor
                | LirOp::Shl
                | LirOp::Shr
                | LirOp::CmpEq
                | LirOp::CmpNe
                | LirOp::CmpLt
                | LirOp::CmpLe
                | LirOp::CmpGt
                | LirOp::CmpGe
                | LirOp::Load
                | LirOp::Cast
                | LirOp::Nop
                | LirOp::IsError
                | LirOp::Unwrap
                | LirOp::ConstructOk
        )
    }

    /// Whether this is an arithmetic op over two sources
    pub fn is_binary_arith(self) -> bool {
        matches!(
            self,
            LirOp::Add | LirOp::Sub | LirOp::Mul | LirOp::Div | LirOp::Mod
        )
    }

    /// Whether this is a comparison
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            LirOp::CmpEq
                | LirOp::CmpNe
                | LirOp::CmpLt
                | LirOp::CmpLe
                | LirOp::CmpGt
                | LirOp::CmpGe
        )
    }
}

/// Source location carried by instructions for debugging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLoc {
    /// Source file
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl SourceLoc {
    /// Location with only a line
    pub fn line(line: u32) -> Self {
        SourceLoc { file: String::new(), line, column: 0 }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}", self.line)
        } else if self.column > 0 {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}

/// One LIR instruction
#[derive(Debug, Clone)]
pub struct LirInst {
    /// Operation
    pub op: LirOp,
    /// ABI type of the destination register
    pub ty: AbiType,
    /// Destination register (`NO_REG` when none)
    pub dst: Reg,
    /// First source register
    pub a: Reg,
    /// Second source register
    pub b: Reg,
    /// Immediate (label ids for jumps, call target ids, field offsets)
    pub imm: u32,
    /// Constant value for `LoadConst`
    pub const_val: Option<ValuePtr>,
    /// Source location
    pub loc: SourceLoc,
    /// Free-form comment shown by the disassembler
    pub comment: String,
}

impl LirInst {
    /// An instruction with destination and two sources
    pub fn new(op: LirOp, ty: AbiType, dst: Reg, a: Reg, b: Reg) -> Self {
        LirInst {
            op,
            ty,
            dst,
            a,
            b,
            imm: 0,
            const_val: None,
            loc: SourceLoc::default(),
            comment: String::new(),
        }
    }

    /// An instruction carrying only an immediate (labels, jumps)
    pub fn with_imm(op: LirOp, ty: AbiType, dst: Reg, imm: u32) -> Self {
        LirInst { imm, ..LirInst::new(op, ty, dst, NO_REG, NO_REG) }
    }

    /// A `LoadConst` of a value
    pub fn load_const(dst: Reg, ty: AbiType, value: ValuePtr) -> Self {
        LirInst {
            const_val: Some(value),
            ..LirInst::new(LirOp::LoadConst, ty, dst, NO_REG, NO_REG)
        }
    }

    /// Attach a source location
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }

    /// Attach a comment
    pub fn note(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Whether this instruction is a return
    pub fn is_return(&self) -> bool {
        matches!(self.op, LirOp::Return | LirOp::Ret)
    }

    /// The source registers this instruction reads
    pub fn sources(&self) -> impl Iterator<Item = Reg> {
        [self.a, self.b].into_iter().filter(|&r| r != NO_REG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(LirOp::Jump.is_terminator());
        assert!(LirOp::JumpIfFalse.is_terminator());
        assert!(LirOp::Return.is_terminator());
        assert!(LirOp::Ret.is_terminator());
        assert!(!LirOp::Add.is_terminator());
        assert!(!LirOp::Label.is_terminator());
    }

    #[test]
    fn test_purity() {
        assert!(LirOp::Add.is_pure());
        assert!(LirOp::LoadConst.is_pure());
        assert!(!LirOp::Store.is_pure());
        assert!(!LirOp::Call.is_pure());
        assert!(!LirOp::PrintInt.is_pure());
        assert!(!LirOp::Return.is_pure());
    }

    #[test]
    fn test_sources_skip_no_reg() {
        let inst = LirInst::new(LirOp::Neg, AbiType::I64, 2, 1, NO_REG);
        let sources: Vec<Reg> = inst.sources().collect();
        assert_eq!(sources, vec![1]);
    }
}
