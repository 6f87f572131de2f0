//! The Linear Intermediate Representation: an infinite-register, typed
//! three-address IR with basic blocks, a small optimizer, a disassembler,
//! a reference interpreter, and the process-wide function registry.

pub mod builder;
pub mod cfg;
pub mod display;
pub mod function;
pub mod instr;
pub mod interp;
pub mod optimize;
pub mod registry;

pub use builder::LirBuilder;
pub use cfg::{BasicBlock, Cfg, CfgError};
pub use function::{LirFunction, OptimizationFlags};
pub use instr::{AbiType, LirInst, LirOp, Reg, SourceLoc};
pub use interp::{LirInterpreter, RegValue};
pub use optimize::Optimizer;
pub use registry::function_registry;
