//! Builtin function registry
//!
//! Process-wide table of the functions every program can call without
//! declaring them. Lazily initialised; read-mostly, so a `RwLock` guards the
//! rare registrations from embedders.

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Arity and fallibility of a builtin function
#[derive(Debug, Clone)]
pub struct BuiltinFunction {
    /// Builtin name
    pub name: &'static str,
    /// Parameter type names, resolved against the type system at check time
    pub param_types: Vec<&'static str>,
    /// Return type name
    pub return_type: &'static str,
    /// Index of the first optional parameter
    pub first_optional: Option<usize>,
}

static REGISTRY: Lazy<RwLock<Vec<BuiltinFunction>>> = Lazy::new(|| {
    RwLock::new(vec![
        BuiltinFunction {
            name: "print",
            param_types: vec!["any"],
            return_type: "nil",
            first_optional: None,
        },
        BuiltinFunction {
            name: "len",
            param_types: vec!["any"],
            return_type: "int",
            first_optional: None,
        },
        BuiltinFunction {
            name: "str",
            param_types: vec!["any"],
            return_type: "str",
            first_optional: None,
        },
        BuiltinFunction {
            name: "assert",
            param_types: vec!["bool", "str"],
            return_type: "nil",
            first_optional: Some(1),
        },
        BuiltinFunction {
            name: "range",
            param_types: vec!["int", "int", "int"],
            return_type: "range",
            first_optional: Some(2),
        },
    ])
});

/// Snapshot of the registered builtin signatures
pub fn builtin_signatures() -> Vec<BuiltinFunction> {
    REGISTRY.read().clone()
}

/// Look up one builtin by name
pub fn find_builtin(name: &str) -> Option<BuiltinFunction> {
    REGISTRY.read().iter().find(|b| b.name == name).cloned()
}
