//! Symbol table
//!
//! Variable and function scopes are maintained on parallel stacks. A scope is
//! pushed on function and block entry and popped on exit; lookup walks from
//! the innermost scope outward.

use crate::parser::Span;
use crate::types::TypePtr;
use rustc_hash::FxHashMap;

/// A declared variable
#[derive(Debug, Clone)]
pub struct VariableSymbol {
    /// Declared or inferred type
    pub ty: TypePtr,
    /// Declaration site
    pub span: Span,
}

/// A function signature as seen by callers
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    /// Function name
    pub name: String,
    /// Parameter types in order
    pub params: Vec<TypePtr>,
    /// Index of the first optional (defaulted) parameter, if any.
    /// Optional parameters are trailing.
    pub first_optional: Option<usize>,
    /// Return type
    pub return_type: TypePtr,
    /// Whether the function can fail (returns an error union)
    pub can_fail: bool,
    /// Declared error type names (empty when not fallible or generic)
    pub error_types: Vec<String>,
    /// Whether the declared error set is the generic one
    pub is_generic_error: bool,
}

impl FunctionSignature {
    /// Number of arguments a call must supply at minimum
    pub fn min_required_args(&self) -> usize {
        self.first_optional.unwrap_or(self.params.len())
    }

    /// Whether `n` arguments is an acceptable call arity
    pub fn is_valid_arg_count(&self, n: usize) -> bool {
        n >= self.min_required_args() && n <= self.params.len()
    }
}

/// Lexically scoped symbol table over parallel variable and function stacks
pub struct SymbolTable {
    variable_scopes: Vec<FxHashMap<String, VariableSymbol>>,
    function_scopes: Vec<FxHashMap<String, FunctionSignature>>,
}

impl SymbolTable {
    /// Create a table with the global scope in place
    pub fn new() -> Self {
        SymbolTable {
            variable_scopes: vec![FxHashMap::default()],
            function_scopes: vec![FxHashMap::default()],
        }
    }

    /// Push a new scope
    pub fn begin_scope(&mut self) {
        self.variable_scopes.push(FxHashMap::default());
        self.function_scopes.push(FxHashMap::default());
    }

    /// Pop the innermost scope; the global scope is never popped
    pub fn end_scope(&mut self) {
        if self.variable_scopes.len() > 1 {
            self.variable_scopes.pop();
            self.function_scopes.pop();
        }
    }

    /// Current nesting depth (1 = global only)
    pub fn depth(&self) -> usize {
        self.variable_scopes.len()
    }

    /// Declare a variable in the innermost scope.
    ///
    /// Returns the previous symbol if the name was already declared in this
    /// scope (the caller reports the duplicate).
    pub fn declare_variable(
        &mut self,
        name: &str,
        symbol: VariableSymbol,
    ) -> Option<VariableSymbol> {
        self.variable_scopes
            .last_mut()
            .and_then(|scope| scope.insert(name.to_string(), symbol))
    }

    /// Look up a variable from the innermost scope outward
    pub fn find_variable(&self, name: &str) -> Option<&VariableSymbol> {
        self.variable_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
    }

    /// Whether the name is declared in the innermost scope specifically
    pub fn declared_in_current_scope(&self, name: &str) -> bool {
        self.variable_scopes
            .last()
            .map(|scope| scope.contains_key(name))
            .unwrap_or(false)
    }

    /// Replace the type of an existing variable (innermost match wins)
    pub fn update_variable_type(&mut self, name: &str, ty: TypePtr) -> bool {
        for scope in self.variable_scopes.iter_mut().rev() {
            if let Some(sym) = scope.get_mut(name) {
                sym.ty = ty;
                return true;
            }
        }
        false
    }

    /// Declare a function in the innermost function scope
    pub fn declare_function(&mut self, signature: FunctionSignature) {
        if let Some(scope) = self.function_scopes.last_mut() {
            scope.insert(signature.name.clone(), signature);
        }
    }

    /// Declare a function in the global (top) scope
    pub fn declare_global_function(&mut self, signature: FunctionSignature) {
        self.function_scopes[0].insert(signature.name.clone(), signature);
    }

    /// Look up a function signature from the innermost scope outward
    pub fn find_function(&self, name: &str) -> Option<&FunctionSignature> {
        self.function_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
