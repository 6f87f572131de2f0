//! The process-wide LIR function registry
//!
//! Maps function names to their built LIR so the JIT can resolve `Call`
//! targets. Lazily initialised; mutation is concurrent-safe. Callers that
//! need isolation between compilations clear it per compile or wrap it in a
//! facade.

use super::function::LirFunction;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Name → function table
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<LirFunction>>,
}

impl FunctionRegistry {
    fn new() -> Self {
        FunctionRegistry { functions: DashMap::new() }
    }

    /// Register (or replace) a function
    pub fn register(&self, func: LirFunction) -> Arc<LirFunction> {
        let name = func.name.clone();
        let shared = Arc::new(func);
        self.functions.insert(name, Arc::clone(&shared));
        shared
    }

    /// Look up a function by name
    pub fn lookup(&self, name: &str) -> Option<Arc<LirFunction>> {
        self.functions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a function is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Remove every registered function
    pub fn clear(&self) {
        self.functions.clear();
    }
}

static REGISTRY: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::new);

/// Access the process-wide registry
pub fn function_registry() -> &'static FunctionRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = FunctionRegistry::new();
        assert!(registry.is_empty());
        registry.register(LirFunction::new("alpha", 1));
        assert!(registry.contains("alpha"));
        assert_eq!(registry.lookup("alpha").unwrap().param_count, 1);
        assert!(registry.lookup("beta").is_none());
    }

    #[test]
    fn test_replace_keeps_latest() {
        let registry = FunctionRegistry::new();
        registry.register(LirFunction::new("f", 1));
        registry.register(LirFunction::new("f", 2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("f").unwrap().param_count, 2);
    }

    #[test]
    fn test_global_registry_is_shared() {
        let name = "registry_smoke_test_fn";
        function_registry().register(LirFunction::new(name, 0));
        assert!(function_registry().contains(name));
        function_registry().lookup(name).unwrap();
    }
}
