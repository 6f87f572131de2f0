//! Bytecode generation from the checked AST.

pub mod generator;

pub use generator::BytecodeGenerator;
