//! The JIT backend: LIR → native code through a pluggable code emitter.
//!
//! `ToMemory` compilation returns callable function pointers backed by
//! Cranelift; `ToFile`/`ToExecutable` (behind the `aot` feature) emit object
//! files and linked executables.

pub mod backend;
pub mod cranelift;
pub mod emitter;
pub mod runtime;

pub use backend::JitBackend;
pub use cranelift::CraneliftEmitter;
pub use emitter::{CodeEmitter, CompileMode, CompileOutcome, EmitError, EmittedModule, JitStats};
