//! Lumen Language Engine
//!
//! The core of the Lumen compiler and runtime stack:
//! - **Types**: canonical type descriptors, values, conversion policy (`types`)
//! - **Checker**: symbol table and the error-union type checker (`checker`)
//! - **Bytecode**: the stack-VM instruction set and generator (`bytecode`, `codegen`)
//! - **LIR**: typed three-address IR, optimizer, and register VM (`lir`)
//! - **JIT**: LIR → native code through Cranelift (`jit`, behind the `jit` feature)
//! - **Diagnostics**: the error catalogue and rendering (`diagnostics`)
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_engine::{BytecodeGenerator, TypeChecker};
//!
//! let program = parse(source)?; // external parser
//!
//! let mut checker = TypeChecker::new();
//! let errors = checker.check_program(&program);
//! assert!(errors.is_empty());
//!
//! let mut generator = BytecodeGenerator::new(&checker);
//! generator.process(&program);
//! let bytecode = generator.bytecode();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_large_err)]

// ============================================================================
// Core Modules
// ============================================================================

/// Parser contract: spans and the AST the core consumes
pub mod parser;

/// Type system: descriptors, values, region, conversion policy
pub mod types;

/// Semantic analysis: symbol table and the type checker
pub mod checker;

/// Bytecode: opcodes, instructions, verifier
pub mod bytecode;

/// Bytecode generation from the checked AST
pub mod codegen;

/// Linear IR: builder, optimizer, interpreter, registry
pub mod lir;

/// JIT compilation (optional, behind the "jit" feature)
#[cfg(feature = "jit")]
pub mod jit;

/// Diagnostics: error catalogue, code generation, rendering
pub mod diagnostics;

// ============================================================================
// Re-exports
// ============================================================================

pub use parser::{ast, Program, Span};

pub use types::{Region, Type, TypePtr, TypeSystem, Value, ValueData, ValuePtr};

pub use checker::{FunctionSignature, SymbolTable, TypeCheckError, TypeChecker};

pub use bytecode::{verify_program, Instruction, Opcode, VerifyError};

pub use codegen::BytecodeGenerator;

pub use lir::{
    function_registry, AbiType, BasicBlock, Cfg, LirBuilder, LirFunction, LirInst,
    LirInterpreter, LirOp, Optimizer, RegValue,
};

#[cfg(feature = "jit")]
pub use jit::{CompileMode, CompileOutcome, JitBackend, JitStats};

pub use diagnostics::{generate_error_code, global_catalog, Diagnostic, ErrorStage};
