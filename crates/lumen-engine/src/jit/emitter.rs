//! The code-emitter abstraction
//!
//! The backend drives an emitter with a small set of capabilities: compile a
//! set of LIR functions in one of three modes and resolve symbols to
//! callable pointers. Any emitter providing these is acceptable; the
//! in-tree one is Cranelift.

use crate::lir::LirFunction;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Where compiled code goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Keep in memory for immediate execution
    ToMemory,
    /// Emit an object file
    ToFile,
    /// Emit a linked executable
    ToExecutable,
}

/// Errors from the emitter
#[derive(Debug, Error)]
pub enum EmitError {
    /// The underlying code generator failed
    #[error("compilation failed: {0}")]
    Backend(String),

    /// An opcode the emitter cannot lower
    #[error("unsupported instruction: {0}")]
    Unsupported(String),

    /// A call target that is neither compiled nor importable
    #[error("missing function symbol `{0}`")]
    MissingSymbol(String),

    /// The requested mode needs a feature that is not enabled
    #[error("compile mode {0:?} is not available in this build")]
    UnsupportedMode(CompileMode),

    /// Writing an output file failed
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// The result of a successful in-memory compile.
///
/// Owns the emitter's runtime so the returned pointers stay valid; dropping
/// the module invalidates every pointer resolved from it.
pub struct EmittedModule {
    symbols: FxHashMap<String, *const u8>,
    #[allow(dead_code)]
    keepalive: Box<dyn Any>,
}

impl EmittedModule {
    /// Build a module from resolved symbols and the emitter state backing
    /// them
    pub fn new(symbols: FxHashMap<String, *const u8>, keepalive: Box<dyn Any>) -> Self {
        EmittedModule { symbols, keepalive }
    }

    /// Resolve a compiled function's entry point
    pub fn symbol(&self, name: &str) -> Option<*const u8> {
        self.symbols.get(name).copied()
    }

    /// Names of every compiled function
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }
}

/// What `JitBackend::compile` hands back to callers
#[derive(Debug, Default)]
pub struct CompileOutcome {
    /// Whether compilation succeeded
    pub success: bool,
    /// Error description when it did not
    pub error_message: String,
    /// Entry pointer of the last processed function (`ToMemory` only)
    pub function_ptr: Option<*const u8>,
    /// Path of the emitted artifact (`ToFile`/`ToExecutable`)
    pub output_path: Option<PathBuf>,
}

/// Compilation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JitStats {
    /// Functions compiled so far
    pub functions_compiled: usize,
    /// LIR instructions consumed
    pub instructions_compiled: usize,
    /// Wall-clock time spent compiling
    pub compilation_time_ms: f64,
}

/// A pluggable native-code emitter
pub trait CodeEmitter {
    /// Emitter name, for diagnostics
    fn name(&self) -> &str;

    /// Compile a set of functions. For `ToMemory` the returned module
    /// resolves each function name to a callable pointer; for the file
    /// modes the artifact is written to `output_path`.
    fn compile(
        &mut self,
        functions: &[Arc<LirFunction>],
        mode: CompileMode,
        output_path: Option<&std::path::Path>,
    ) -> Result<EmittedModule, EmitError>;
}
