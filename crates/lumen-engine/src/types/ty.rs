//! Core type descriptors
//!
//! A `Type` is a tagged descriptor; composite types carry their component
//! types as `TypePtr` (shared, immutable). Equality is structural.

use std::fmt;
use std::sync::Arc;

/// Shared, immutable handle to a type descriptor
pub type TypePtr = Arc<Type>;

/// The tag of a type descriptor, used for rank tables and quick dispatch
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Nil,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// Platform-word signed integer
    Int,
    /// Platform-word unsigned integer
    UInt,
    Float32,
    Float64,
    String,
    List,
    Dict,
    Tuple,
    Function,
    Enum,
    Sum,
    Union,
    ErrorUnion,
    UserDefined,
    Any,
    Range,
}

/// A canonical type descriptor
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// The unit type
    Nil,
    /// Booleans
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// Platform-word signed integer
    Int,
    /// Platform-word unsigned integer
    UInt,
    Float32,
    Float64,
    /// Immutable UTF-8 string
    String,
    /// Homogeneous list
    List(TypePtr),
    /// Homogeneous dict (key, value)
    Dict(TypePtr, TypePtr),
    /// Fixed-arity tuple
    Tuple(Vec<TypePtr>),
    /// Function type
    Function {
        /// Parameter types
        params: Vec<TypePtr>,
        /// Return type
        ret: TypePtr,
    },
    /// Enum over named variants
    Enum {
        /// Enum name
        name: String,
        /// Ordered variant names
        variants: Vec<String>,
    },
    /// Sum type tagged by variant index
    Sum {
        /// Ordered variant types
        variants: Vec<TypePtr>,
    },
    /// Flattened, de-duplicated union (always >= 2 variants)
    Union(Vec<TypePtr>),
    /// Error union: success type plus an error set (or the generic error)
    ErrorUnion {
        /// Success type
        success: TypePtr,
        /// Declared error type names; empty when `is_generic`
        errors: Vec<String>,
        /// True when the error set is unconstrained
        is_generic: bool,
    },
    /// User-defined nominal type with named fields
    UserDefined {
        /// Type name
        name: String,
        /// Named fields
        fields: Vec<(String, TypePtr)>,
    },
    /// Top type
    Any,
    /// Range with optional step
    Range,
}

impl Type {
    /// The tag of this descriptor
    pub fn tag(&self) -> TypeTag {
        match self {
            Type::Nil => TypeTag::Nil,
            Type::Bool => TypeTag::Bool,
            Type::Int8 => TypeTag::Int8,
            Type::Int16 => TypeTag::Int16,
            Type::Int32 => TypeTag::Int32,
            Type::Int64 => TypeTag::Int64,
            Type::UInt8 => TypeTag::UInt8,
            Type::UInt16 => TypeTag::UInt16,
            Type::UInt32 => TypeTag::UInt32,
            Type::UInt64 => TypeTag::UInt64,
            Type::Int => TypeTag::Int,
            Type::UInt => TypeTag::UInt,
            Type::Float32 => TypeTag::Float32,
            Type::Float64 => TypeTag::Float64,
            Type::String => TypeTag::String,
            Type::List(_) => TypeTag::List,
            Type::Dict(_, _) => TypeTag::Dict,
            Type::Tuple(_) => TypeTag::Tuple,
            Type::Function { .. } => TypeTag::Function,
            Type::Enum { .. } => TypeTag::Enum,
            Type::Sum { .. } => TypeTag::Sum,
            Type::Union(_) => TypeTag::Union,
            Type::ErrorUnion { .. } => TypeTag::ErrorUnion,
            Type::UserDefined { .. } => TypeTag::UserDefined,
            Type::Any => TypeTag::Any,
            Type::Range => TypeTag::Range,
        }
    }

    /// Whether this is one of the integer or float types
    pub fn is_numeric(&self) -> bool {
        super::convert::is_numeric(self.tag())
    }

    /// Whether this is an error union
    pub fn is_error_union(&self) -> bool {
        matches!(self, Type::ErrorUnion { .. })
    }

    /// Whether this is a union
    pub fn is_union(&self) -> bool {
        matches!(self, Type::Union(_))
    }

    /// Whether this is a function type
    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function { .. })
    }

    /// The error set of an error union, if this is one
    pub fn error_set(&self) -> Option<(&[String], bool)> {
        match self {
            Type::ErrorUnion { errors, is_generic, .. } => Some((errors, *is_generic)),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Nil => write!(f, "nil"),
            Type::Bool => write!(f, "bool"),
            Type::Int8 => write!(f, "i8"),
            Type::Int16 => write!(f, "i16"),
            Type::Int32 => write!(f, "i32"),
            Type::Int64 => write!(f, "i64"),
            Type::UInt8 => write!(f, "u8"),
            Type::UInt16 => write!(f, "u16"),
            Type::UInt32 => write!(f, "u32"),
            Type::UInt64 => write!(f, "u64"),
            Type::Int => write!(f, "int"),
            Type::UInt => write!(f, "uint"),
            Type::Float32 => write!(f, "f32"),
            Type::Float64 => write!(f, "float"),
            Type::String => write!(f, "str"),
            Type::List(elem) => write!(f, "[{}]", elem),
            Type::Dict(k, v) => write!(f, "{{{}: {}}}", k, v),
            Type::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            Type::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ret)
            }
            Type::Enum { name, .. } => write!(f, "{}", name),
            Type::Sum { variants } => {
                for (i, v) in variants.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
            Type::Union(variants) => {
                for (i, v) in variants.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
            Type::ErrorUnion { success, errors, is_generic } => {
                write!(f, "{}?", success)?;
                if !is_generic {
                    for (i, e) in errors.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", e)?;
                    }
                }
                Ok(())
            }
            Type::UserDefined { name, .. } => write!(f, "{}", name),
            Type::Any => write!(f, "any"),
            Type::Range => write!(f, "range"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tag_mapping() {
        assert_eq!(Type::Int64.tag(), TypeTag::Int64);
        assert_eq!(Type::Any.tag(), TypeTag::Any);
        assert_eq!(Type::List(Arc::new(Type::Int)).tag(), TypeTag::List);
    }

    #[test]
    fn test_structural_equality() {
        let a = Type::List(Arc::new(Type::Int));
        let b = Type::List(Arc::new(Type::Int));
        let c = Type::List(Arc::new(Type::Float64));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_error_union_display() {
        let eu = Type::ErrorUnion {
            success: Arc::new(Type::Int),
            errors: vec!["DivisionByZero".to_string()],
            is_generic: false,
        };
        assert_eq!(format!("{}", eu), "int?DivisionByZero");

        let generic = Type::ErrorUnion {
            success: Arc::new(Type::Int),
            errors: vec![],
            is_generic: true,
        };
        assert_eq!(format!("{}", generic), "int?");
    }

    #[test]
    fn test_generic_error_union_distinct_from_explicit() {
        let explicit = Type::ErrorUnion {
            success: Arc::new(Type::Int),
            errors: vec![],
            is_generic: false,
        };
        let generic = Type::ErrorUnion {
            success: Arc::new(Type::Int),
            errors: vec![],
            is_generic: true,
        };
        assert_ne!(explicit, generic);
    }
}
