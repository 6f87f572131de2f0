//! Runtime values and the per-compilation region
//!
//! A value couples a type descriptor with its payload. Values are
//! reference-counted and owned by a `Region`: the arena hands out shared
//! handles and releases everything at once when it goes out of scope.
//! Ownership contract: the region is the single owning holder; every other
//! handle is a borrow of the shared allocation.

use super::ty::{Type, TypePtr};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a value
pub type ValuePtr = Arc<Value>;

/// Value payloads
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    /// The unit value
    Nil,
    /// Boolean
    Bool(bool),
    /// Signed integer (width carried by the value's type)
    Int(i64),
    /// Unsigned integer (width carried by the value's type)
    UInt(u64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
    /// Immutable string
    Str(String),
    /// List elements
    List(Vec<ValuePtr>),
    /// Dict entries in insertion order
    Dict(Vec<(ValuePtr, ValuePtr)>),
    /// Tuple elements
    Tuple(Vec<ValuePtr>),
    /// Reference to a named function
    FunctionRef(String),
    /// Closure: function reference plus captured environment
    Closure {
        /// Lifted function name
        function: String,
        /// Captured variables by name
        captured: Vec<(String, ValuePtr)>,
    },
    /// Sum variant: tag index plus inner value
    SumVariant {
        /// Variant index
        tag: usize,
        /// Inner value
        value: ValuePtr,
    },
    /// User-defined instance: variant name plus named fields
    UserInstance {
        /// Variant name
        variant: String,
        /// Named fields
        fields: Vec<(String, ValuePtr)>,
    },
    /// Error value: error type name plus constructor arguments
    Error {
        /// Error type name
        error_type: String,
        /// Constructor arguments
        args: Vec<ValuePtr>,
    },
    /// Range value
    Range {
        start: i64,
        end: i64,
        step: i64,
        inclusive: bool,
    },
}

/// A typed value
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// The value's type
    pub ty: TypePtr,
    /// The payload
    pub data: ValueData,
}

impl Value {
    /// Create a value
    pub fn new(ty: TypePtr, data: ValueData) -> Self {
        Value { ty, data }
    }

    /// Whether this value's payload matches the given type descriptor
    pub fn check_type(&self, ty: &Type) -> bool {
        self.ty.as_ref() == ty
    }

    /// Boolean coercion, defined for every payload kind
    pub fn truthy(&self) -> bool {
        match &self.data {
            ValueData::Nil => false,
            ValueData::Bool(b) => *b,
            ValueData::Int(i) => *i != 0,
            ValueData::UInt(u) => *u != 0,
            ValueData::Float32(f) => *f != 0.0,
            ValueData::Float64(f) => *f != 0.0,
            ValueData::Str(s) => !s.is_empty(),
            ValueData::List(items) => !items.is_empty(),
            ValueData::Dict(entries) => !entries.is_empty(),
            ValueData::Tuple(items) => !items.is_empty(),
            ValueData::Error { .. } => false,
            _ => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ValueData::Nil => write!(f, "nil"),
            ValueData::Bool(b) => write!(f, "{}", b),
            ValueData::Int(i) => write!(f, "{}", i),
            ValueData::UInt(u) => write!(f, "{}", u),
            ValueData::Float32(v) => write!(f, "{}", v),
            ValueData::Float64(v) => write!(f, "{}", v),
            ValueData::Str(s) => write!(f, "{}", s),
            ValueData::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            ValueData::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            ValueData::Tuple(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            ValueData::FunctionRef(name) => write!(f, "<fn {}>", name),
            ValueData::Closure { function, .. } => write!(f, "<closure {}>", function),
            ValueData::SumVariant { tag, value } => write!(f, "#{}({})", tag, value),
            ValueData::UserInstance { variant, .. } => write!(f, "<{}>", variant),
            ValueData::Error { error_type, .. } => write!(f, "err({})", error_type),
            ValueData::Range { start, end, inclusive, .. } => {
                write!(f, "{}..{}{}", start, if *inclusive { "=" } else { "" }, end)
            }
        }
    }
}

/// Per-compilation allocation region.
///
/// All values materialised during a compilation are owned here and released
/// together when the region is dropped. Individual values are never freed
/// before region teardown.
#[derive(Debug, Default)]
pub struct Region {
    values: Vec<ValuePtr>,
}

impl Region {
    /// Create an empty region
    pub fn new() -> Self {
        Region { values: Vec::new() }
    }

    /// Allocate a value in this region and return a shared handle
    pub fn allocate(&mut self, value: Value) -> ValuePtr {
        let ptr = Arc::new(value);
        self.values.push(Arc::clone(&ptr));
        ptr
    }

    /// Number of values the region owns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the region is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Release every value at once (also happens on drop)
    pub fn release(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_region_owns_allocations() {
        let mut region = Region::new();
        assert!(region.is_empty());
        let v = region.allocate(Value::new(Arc::new(Type::Int), ValueData::Int(42)));
        assert_eq!(region.len(), 1);
        assert_eq!(v.data, ValueData::Int(42));
        region.release();
        assert!(region.is_empty());
        // Outstanding handles stay valid after release.
        assert_eq!(v.data, ValueData::Int(42));
    }

    #[test]
    fn test_truthiness() {
        let int_ty = Arc::new(Type::Int);
        assert!(Value::new(int_ty.clone(), ValueData::Int(1)).truthy());
        assert!(!Value::new(int_ty.clone(), ValueData::Int(0)).truthy());
        assert!(!Value::new(Arc::new(Type::Nil), ValueData::Nil).truthy());
        assert!(!Value::new(
            Arc::new(Type::String),
            ValueData::Str(String::new())
        )
        .truthy());
        assert!(Value::new(int_ty, ValueData::FunctionRef("f".into())).truthy());
    }

    #[test]
    fn test_check_type() {
        let v = Value::new(Arc::new(Type::Bool), ValueData::Bool(true));
        assert!(v.check_type(&Type::Bool));
        assert!(!v.check_type(&Type::Int));
    }
}
