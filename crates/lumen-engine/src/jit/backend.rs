//! The JIT backend facade
//!
//! Collects processed LIR functions, drives the emitter, and owns the
//! compiled module for the lifetime of every pointer it hands out. A failed
//! compile reports an error and leaves previously compiled code valid.

use super::emitter::{CodeEmitter, CompileMode, CompileOutcome, EmittedModule, JitStats};
use crate::lir::{function_registry, LirFunction, Optimizer};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// LIR → native code driver
pub struct JitBackend {
    emitter: Box<dyn CodeEmitter>,
    processed: Vec<Arc<LirFunction>>,
    module: Option<EmittedModule>,
    last_function: Option<String>,
    stats: JitStats,
    optimizations_enabled: bool,
    debug_mode: bool,
}

impl JitBackend {
    /// Create a backend over the Cranelift emitter
    pub fn new() -> Self {
        JitBackend {
            emitter: Box::new(super::cranelift::CraneliftEmitter::new()),
            processed: Vec::new(),
            module: None,
            last_function: None,
            stats: JitStats::default(),
            optimizations_enabled: true,
            debug_mode: false,
        }
    }

    /// Create a backend over a custom emitter
    pub fn with_emitter(emitter: Box<dyn CodeEmitter>) -> Self {
        JitBackend {
            emitter,
            processed: Vec::new(),
            module: None,
            last_function: None,
            stats: JitStats::default(),
            optimizations_enabled: true,
            debug_mode: false,
        }
    }

    /// Toggle the optimizer run before emission
    pub fn enable_optimizations(&mut self, enable: bool) {
        self.optimizations_enabled = enable;
    }

    /// Toggle debug logging
    pub fn set_debug_mode(&mut self, debug: bool) {
        self.debug_mode = debug;
    }

    /// Queue a function for the next compile and register it for lookup
    pub fn process_function(&mut self, mut func: LirFunction) {
        if self.optimizations_enabled {
            func.optimizations = crate::lir::OptimizationFlags::all();
            Optimizer::optimize(&mut func);
        }
        self.last_function = Some(func.name.clone());
        let shared = function_registry().register(func);
        self.processed.push(shared);
    }

    /// Functions queued so far
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Compile every processed function.
    ///
    /// `ToMemory` resolves the most recently processed function to a
    /// callable pointer; the file modes write to `output_path`.
    pub fn compile(&mut self, mode: CompileMode, output_path: Option<&Path>) -> CompileOutcome {
        let started = Instant::now();
        match self.emitter.compile(&self.processed, mode, output_path) {
            Ok(module) => {
                let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                self.stats.functions_compiled += self.processed.len();
                self.stats.instructions_compiled +=
                    self.processed.iter().map(|f| f.len()).sum::<usize>();
                self.stats.compilation_time_ms += elapsed;
                if self.debug_mode {
                    debug!(
                        functions = self.processed.len(),
                        elapsed_ms = elapsed,
                        "jit compile finished"
                    );
                }
                let function_ptr = self
                    .last_function
                    .as_deref()
                    .and_then(|name| module.symbol(name));
                let outcome = CompileOutcome {
                    success: true,
                    error_message: String::new(),
                    function_ptr,
                    output_path: output_path.map(Path::to_path_buf),
                };
                if mode == CompileMode::ToMemory {
                    self.module = Some(module);
                }
                outcome
            }
            Err(err) => CompileOutcome {
                success: false,
                error_message: err.to_string(),
                function_ptr: None,
                output_path: None,
            },
        }
    }

    /// Entry pointer of a compiled function by name
    pub fn compiled_function(&self, name: &str) -> Option<*const u8> {
        self.module.as_ref().and_then(|m| m.symbol(name))
    }

    /// Invoke the most recently processed function with integer arguments.
    ///
    /// Supports up to four arguments; returns 0 when nothing is compiled.
    pub fn execute_compiled_function(&self, args: &[i64]) -> i64 {
        let Some(name) = self.last_function.as_deref() else {
            return 0;
        };
        let Some(ptr) = self.compiled_function(name) else {
            return 0;
        };
        unsafe {
            match args.len() {
                0 => {
                    let f: extern "C" fn() -> i64 = std::mem::transmute(ptr);
                    f()
                }
                1 => {
                    let f: extern "C" fn(i64) -> i64 = std::mem::transmute(ptr);
                    f(args[0])
                }
                2 => {
                    let f: extern "C" fn(i64, i64) -> i64 = std::mem::transmute(ptr);
                    f(args[0], args[1])
                }
                3 => {
                    let f: extern "C" fn(i64, i64, i64) -> i64 = std::mem::transmute(ptr);
                    f(args[0], args[1], args[2])
                }
                _ => {
                    let f: extern "C" fn(i64, i64, i64, i64) -> i64 = std::mem::transmute(ptr);
                    f(args[0], args[1], args[2], args[3])
                }
            }
        }
    }

    /// Compilation statistics
    pub fn get_stats(&self) -> JitStats {
        self.stats
    }
}

impl Default for JitBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::instr::{AbiType, LirInst, LirOp, NO_REG};
    use crate::types::{Type, Value, ValueData};

    fn const_return(name: &str, v: i64) -> LirFunction {
        let mut func = LirFunction::new(name, 0);
        func.return_type = AbiType::I64;
        let r = func.allocate_register(AbiType::I64);
        let value = Arc::new(Value::new(Arc::new(Type::Int), ValueData::Int(v)));
        func.push(LirInst::load_const(r, AbiType::I64, value));
        func.push(LirInst::new(LirOp::Ret, AbiType::I64, NO_REG, r, NO_REG));
        func
    }

    #[test]
    fn test_compile_and_execute() {
        let mut backend = JitBackend::new();
        backend.process_function(const_return("backend_const_a", 7));
        let outcome = backend.compile(CompileMode::ToMemory, None);
        assert!(outcome.success, "{}", outcome.error_message);
        assert!(outcome.function_ptr.is_some());
        assert_eq!(backend.execute_compiled_function(&[]), 7);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut backend = JitBackend::new();
        backend.process_function(const_return("backend_const_b", 1));
        assert_eq!(backend.get_stats().functions_compiled, 0);
        let outcome = backend.compile(CompileMode::ToMemory, None);
        assert!(outcome.success, "{}", outcome.error_message);
        let stats = backend.get_stats();
        assert_eq!(stats.functions_compiled, 1);
        assert!(stats.instructions_compiled >= 2);
        assert!(stats.compilation_time_ms >= 0.0);
    }

    #[test]
    fn test_failed_compile_keeps_previous_module() {
        let mut backend = JitBackend::new();
        backend.process_function(const_return("backend_const_c", 3));
        assert!(backend.compile(CompileMode::ToMemory, None).success);
        assert_eq!(backend.execute_compiled_function(&[]), 3);

        // An unsupported function fails the next compile.
        let mut broken = LirFunction::new("backend_broken", 0);
        broken.push(LirInst::new(
            LirOp::SchedulerRun,
            AbiType::Void,
            NO_REG,
            NO_REG,
            NO_REG,
        ));
        backend.process_function(broken);
        let outcome = backend.compile(CompileMode::ToMemory, None);
        assert!(!outcome.success);
        assert!(!outcome.error_message.is_empty());
        // The earlier module is still callable.
        assert!(backend.compiled_function("backend_const_c").is_some());
    }

    #[test]
    fn test_processed_functions_are_registered() {
        let mut backend = JitBackend::new();
        backend.process_function(const_return("backend_registered", 9));
        assert!(function_registry().contains("backend_registered"));
        assert_eq!(backend.processed_count(), 1);
    }

    #[cfg(not(feature = "aot"))]
    #[test]
    fn test_file_mode_requires_aot_feature() {
        let mut backend = JitBackend::new();
        backend.process_function(const_return("backend_const_d", 2));
        let outcome = backend.compile(
            CompileMode::ToFile,
            Some(Path::new("/tmp/lumen-test.o")),
        );
        assert!(!outcome.success);
        assert!(outcome.error_message.contains("not available"));
    }
}
