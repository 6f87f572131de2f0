//! The type system facade
//!
//! Owns the primitive singletons, the registered error types, the
//! per-compilation value region, and the union/error-union algebra.

use super::convert;
use super::ty::{Type, TypePtr};
use super::value::{Region, Value, ValueData, ValuePtr};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Error types registered at startup
pub const BUILTIN_ERROR_TYPES: &[&str] = &[
    "DivisionByZero",
    "IndexOutOfBounds",
    "NullReference",
    "TypeConversion",
    "IOError",
    "ParseError",
    "NetworkError",
];

/// Canonical types, conversion policy, and value creation for one compilation
pub struct TypeSystem {
    primitives: FxHashMap<&'static str, TypePtr>,
    error_types: Vec<String>,
    region: Region,
}

impl TypeSystem {
    /// Create a type system with the primitive singletons and built-in
    /// error types registered
    pub fn new() -> Self {
        let mut primitives = FxHashMap::default();
        let entries: [(&'static str, Type); 17] = [
            ("nil", Type::Nil),
            ("bool", Type::Bool),
            ("i8", Type::Int8),
            ("i16", Type::Int16),
            ("i32", Type::Int32),
            ("i64", Type::Int64),
            ("u8", Type::UInt8),
            ("u16", Type::UInt16),
            ("u32", Type::UInt32),
            ("u64", Type::UInt64),
            ("int", Type::Int),
            ("uint", Type::UInt),
            ("f32", Type::Float32),
            ("f64", Type::Float64),
            ("float", Type::Float64),
            ("str", Type::String),
            ("any", Type::Any),
        ];
        for (name, ty) in entries {
            primitives.insert(name, Arc::new(ty));
        }

        TypeSystem {
            primitives,
            error_types: BUILTIN_ERROR_TYPES.iter().map(|s| s.to_string()).collect(),
            region: Region::new(),
        }
    }

    /// Look up a named primitive type; unknown names yield `nil`
    pub fn get_type(&self, name: &str) -> TypePtr {
        self.primitives
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.nil_type())
    }

    /// The `nil` singleton
    pub fn nil_type(&self) -> TypePtr {
        Arc::clone(&self.primitives["nil"])
    }

    /// The `bool` singleton
    pub fn bool_type(&self) -> TypePtr {
        Arc::clone(&self.primitives["bool"])
    }

    /// The platform-word `int` singleton
    pub fn int_type(&self) -> TypePtr {
        Arc::clone(&self.primitives["int"])
    }

    /// The `f64` singleton
    pub fn float_type(&self) -> TypePtr {
        Arc::clone(&self.primitives["f64"])
    }

    /// The `str` singleton
    pub fn string_type(&self) -> TypePtr {
        Arc::clone(&self.primitives["str"])
    }

    /// The `any` singleton
    pub fn any_type(&self) -> TypePtr {
        Arc::clone(&self.primitives["any"])
    }

    /// Register an additional error type name
    pub fn register_error_type(&mut self, name: &str) {
        if !self.is_error_type(name) {
            self.error_types.push(name.to_string());
        }
    }

    /// Whether a name denotes a registered error type
    pub fn is_error_type(&self, name: &str) -> bool {
        self.error_types.iter().any(|e| e == name)
    }

    /// All registered error type names
    pub fn error_types(&self) -> &[String] {
        &self.error_types
    }

    /// The per-compilation region (for inspection)
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Materialise the zero value of a type in this compilation's region.
    ///
    /// Composite types get empty containers; sums and enums pick the first
    /// variant; error unions get the zero value of their success type.
    pub fn create_value(&mut self, ty: &TypePtr) -> ValuePtr {
        let data = match ty.as_ref() {
            Type::Nil => ValueData::Nil,
            Type::Bool => ValueData::Bool(false),
            Type::Int8
            | Type::Int16
            | Type::Int32
            | Type::Int64
            | Type::Int => ValueData::Int(0),
            Type::UInt8
            | Type::UInt16
            | Type::UInt32
            | Type::UInt64
            | Type::UInt => ValueData::UInt(0),
            Type::Float32 => ValueData::Float32(0.0),
            Type::Float64 => ValueData::Float64(0.0),
            Type::String => ValueData::Str(String::new()),
            Type::List(_) => ValueData::List(Vec::new()),
            Type::Dict(_, _) => ValueData::Dict(Vec::new()),
            Type::Tuple(elems) => {
                let items = elems.iter().map(|e| self.create_value(e)).collect();
                ValueData::Tuple(items)
            }
            Type::Function { .. } => ValueData::FunctionRef(String::new()),
            Type::Enum { variants, .. } => {
                let first = variants.first().cloned().unwrap_or_default();
                let name = self
                    .region
                    .allocate(Value::new(self.string_type(), ValueData::Str(first)));
                ValueData::SumVariant { tag: 0, value: name }
            }
            Type::Sum { variants } => {
                let inner = variants
                    .first()
                    .map(|v| self.create_value(v))
                    .unwrap_or_else(|| {
                        self.region.allocate(Value::new(self.nil_type(), ValueData::Nil))
                    });
                ValueData::SumVariant { tag: 0, value: inner }
            }
            Type::Union(variants) => {
                let first = variants
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.nil_type());
                return self.create_value(&first);
            }
            Type::ErrorUnion { success, .. } => {
                let success = success.clone();
                return self.create_value(&success);
            }
            Type::UserDefined { name, fields } => {
                let fields = fields
                    .iter()
                    .map(|(n, t)| (n.clone(), self.create_value(t)))
                    .collect::<Vec<_>>();
                ValueData::UserInstance {
                    variant: name.clone(),
                    fields,
                }
            }
            Type::Any => ValueData::Nil,
            Type::Range => ValueData::Range {
                start: 0,
                end: 0,
                step: 1,
                inclusive: false,
            },
        };
        self.region.allocate(Value::new(Arc::clone(ty), data))
    }

    /// Convertibility: identity, `any` as target, numeric widening, covariant
    /// containers, and existential union conversion
    pub fn is_compatible(&self, from: &TypePtr, to: &TypePtr) -> bool {
        if from == to || matches!(to.as_ref(), Type::Any) {
            return true;
        }

        if from.is_numeric() && to.is_numeric() {
            return convert::widens_to(from.tag(), to.tag());
        }

        match (from.as_ref(), to.as_ref()) {
            (Type::List(fe), Type::List(te)) => self.is_compatible(fe, te),
            (Type::Dict(fk, fv), Type::Dict(tk, tv)) => {
                self.is_compatible(fk, tk) && self.is_compatible(fv, tv)
            }
            (Type::Tuple(fs), Type::Tuple(ts)) => {
                fs.len() == ts.len()
                    && fs.iter().zip(ts).all(|(f, t)| self.is_compatible(f, t))
            }
            (Type::Function { params: fp, ret: fr }, Type::Function { params: tp, ret: tr }) => {
                fp.len() == tp.len()
                    && fp.iter().zip(tp).all(|(f, t)| self.is_compatible(t, f))
                    && self.is_compatible(fr, tr)
            }
            // A union converts to a target when every variant does.
            (Type::Union(variants), _) => {
                variants.iter().all(|v| self.is_compatible(v, to))
            }
            // A value converts into a union when it converts to some variant.
            (_, Type::Union(variants)) => {
                variants.iter().any(|v| self.is_compatible(from, v))
            }
            (
                Type::ErrorUnion { success: fs, errors: fe, is_generic: fg },
                Type::ErrorUnion { success: ts, errors: te, is_generic: tg },
            ) => {
                if !self.is_compatible(fs, ts) {
                    return false;
                }
                // A generic error set only converts into another generic one;
                // an explicit set converts when the target covers it.
                if *fg {
                    *tg
                } else {
                    *tg || fe.iter().all(|e| te.contains(e))
                }
            }
            // The success type converts into an error union over it.
            (_, Type::ErrorUnion { success, .. }) => self.is_compatible(from, success),
            _ => false,
        }
    }

    /// Numeric promotion by rank; mixed non-numeric operands form a union;
    /// `any` is absorbing
    pub fn get_common_type(&self, a: &TypePtr, b: &TypePtr) -> TypePtr {
        if matches!(a.as_ref(), Type::Any) || matches!(b.as_ref(), Type::Any) {
            return self.any_type();
        }
        if a == b {
            return Arc::clone(a);
        }
        if let Some(tag) = convert::common_numeric_type(a.tag(), b.tag()) {
            let promoted = if tag == a.tag() { a } else { b };
            return Arc::clone(promoted);
        }
        self.create_union_type(vec![Arc::clone(a), Arc::clone(b)])
    }

    /// Union construction: flatten nested unions, drop structural duplicates,
    /// and collapse a single-variant result to that variant
    pub fn create_union_type(&self, variants: Vec<TypePtr>) -> TypePtr {
        let mut flat: Vec<TypePtr> = Vec::new();
        let mut stack: Vec<TypePtr> = variants.into_iter().rev().collect();
        while let Some(v) = stack.pop() {
            match v.as_ref() {
                Type::Union(inner) => {
                    for t in inner.iter().rev() {
                        stack.push(Arc::clone(t));
                    }
                }
                _ => {
                    if !flat.iter().any(|seen| seen == &v) {
                        flat.push(v);
                    }
                }
            }
        }
        match flat.len() {
            0 => self.nil_type(),
            1 => flat.pop().unwrap_or_else(|| self.nil_type()),
            _ => Arc::new(Type::Union(flat)),
        }
    }

    /// Construct an error union; a generic one carries an opaque error set
    pub fn create_error_union_type(
        &self,
        success: TypePtr,
        errors: Vec<String>,
        is_generic: bool,
    ) -> TypePtr {
        let mut errors = errors;
        if is_generic {
            errors.clear();
        } else {
            errors.dedup();
        }
        Arc::new(Type::ErrorUnion { success, errors, is_generic })
    }
}

impl Default for TypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_type_unknown_is_nil() {
        let ts = TypeSystem::new();
        assert_eq!(ts.get_type("no-such-type").as_ref(), &Type::Nil);
        assert_eq!(ts.get_type("int").as_ref(), &Type::Int);
        assert_eq!(ts.get_type("float").as_ref(), &Type::Float64);
    }

    #[test]
    fn test_builtin_error_types_registered() {
        let ts = TypeSystem::new();
        for name in BUILTIN_ERROR_TYPES {
            assert!(ts.is_error_type(name));
        }
        assert!(!ts.is_error_type("SomethingElse"));
    }

    #[test]
    fn test_create_value_round_trip() {
        let mut ts = TypeSystem::new();
        for name in ["nil", "bool", "int", "uint", "f32", "f64", "str"] {
            let ty = ts.get_type(name);
            let v = ts.create_value(&ty);
            assert!(v.check_type(ty.as_ref()), "zero value of {} has its type", name);
        }
        let list_ty: TypePtr = Arc::new(Type::List(ts.int_type()));
        let v = ts.create_value(&list_ty);
        assert_eq!(v.data, ValueData::List(vec![]));
    }

    #[test]
    fn test_union_flatten_dedupe_collapse() {
        let ts = TypeSystem::new();
        let int = ts.int_type();
        let float = ts.float_type();
        let nested = ts.create_union_type(vec![int.clone(), float.clone()]);
        let u = ts.create_union_type(vec![nested.clone(), int.clone(), float.clone()]);
        match u.as_ref() {
            Type::Union(vs) => assert_eq!(vs.len(), 2),
            other => panic!("expected union, got {}", other),
        }
        // Flattening first changes nothing.
        let flattened = ts.create_union_type(vec![int.clone(), float.clone()]);
        assert_eq!(u, ts.create_union_type(vec![flattened, nested]));
        // Single variant collapses.
        let single = ts.create_union_type(vec![int.clone()]);
        assert_eq!(single, int);
    }

    #[test]
    fn test_compatibility_rules() {
        let ts = TypeSystem::new();
        let i8t = ts.get_type("i8");
        let i64t = ts.get_type("i64");
        let f32t = ts.get_type("f32");
        let any = ts.any_type();
        assert!(ts.is_compatible(&i8t, &i64t));
        assert!(!ts.is_compatible(&i64t, &i8t));
        assert!(!ts.is_compatible(&i64t, &f32t));
        assert!(ts.is_compatible(&i64t, &any));

        let list_i8: TypePtr = Arc::new(Type::List(i8t.clone()));
        let list_i64: TypePtr = Arc::new(Type::List(i64t.clone()));
        assert!(ts.is_compatible(&list_i8, &list_i64));
        assert!(!ts.is_compatible(&list_i64, &list_i8));

        let u = ts.create_union_type(vec![i64t.clone(), ts.string_type()]);
        assert!(ts.is_compatible(&i64t, &u));
        assert!(!ts.is_compatible(&u, &i64t));
    }

    #[test]
    fn test_error_union_compatibility() {
        let ts = TypeSystem::new();
        let int = ts.int_type();
        let small = ts.create_error_union_type(
            int.clone(),
            vec!["DivisionByZero".to_string()],
            false,
        );
        let big = ts.create_error_union_type(
            int.clone(),
            vec!["DivisionByZero".to_string(), "IndexOutOfBounds".to_string()],
            false,
        );
        let generic = ts.create_error_union_type(int.clone(), vec![], true);
        assert!(ts.is_compatible(&small, &big));
        assert!(!ts.is_compatible(&big, &small));
        assert!(ts.is_compatible(&small, &generic));
        assert!(!ts.is_compatible(&generic, &small));
        // Success type converts into the union.
        assert!(ts.is_compatible(&int, &small));
    }

    #[test]
    fn test_common_type() {
        let ts = TypeSystem::new();
        let i8t = ts.get_type("i8");
        let i32t = ts.get_type("i32");
        assert_eq!(ts.get_common_type(&i8t, &i32t), i32t);
        assert_eq!(ts.get_common_type(&i32t, &ts.any_type()), ts.any_type());
        let mixed = ts.get_common_type(&i32t, &ts.string_type());
        assert!(mixed.is_union());
    }
}
