//! The stack-oriented bytecode: opcode set, instruction encoding, and the
//! well-formedness verifier.

pub mod instruction;
pub mod opcode;
pub mod verify;

pub use instruction::Instruction;
pub use opcode::Opcode;
pub use verify::{verify_program, VerifyError};
