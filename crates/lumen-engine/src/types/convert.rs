//! Numeric conversion policy
//!
//! The widening matrix is enumerated per (from, to) pair and is part of the
//! language contract:
//!
//! - signed widens to signed of greater or equal width
//! - unsigned widens to unsigned of greater or equal width, and to signed of
//!   strictly greater width
//! - integers widen to a float with sufficient range: 8/16/32-bit integers to
//!   both floats, 64-bit and platform-word integers only to `f64`
//! - `f32` widens to `f64`; `f64` never narrows
//!
//! Platform-word `int`/`uint` are treated as 64-bit for widening purposes.

use super::ty::TypeTag;

/// Whether a tag denotes a numeric type
pub fn is_numeric(tag: TypeTag) -> bool {
    numeric_rank(tag).is_some()
}

/// Whether a tag denotes a signed integer type
pub fn is_signed_int(tag: TypeTag) -> bool {
    matches!(
        tag,
        TypeTag::Int8 | TypeTag::Int16 | TypeTag::Int32 | TypeTag::Int64 | TypeTag::Int
    )
}

/// Whether a tag denotes an unsigned integer type
pub fn is_unsigned_int(tag: TypeTag) -> bool {
    matches!(
        tag,
        TypeTag::UInt8 | TypeTag::UInt16 | TypeTag::UInt32 | TypeTag::UInt64 | TypeTag::UInt
    )
}

/// Whether a tag denotes a float type
pub fn is_float(tag: TypeTag) -> bool {
    matches!(tag, TypeTag::Float32 | TypeTag::Float64)
}

/// Bit width of an integer tag (platform words count as 64)
fn int_width(tag: TypeTag) -> Option<u32> {
    Some(match tag {
        TypeTag::Int8 | TypeTag::UInt8 => 8,
        TypeTag::Int16 | TypeTag::UInt16 => 16,
        TypeTag::Int32 | TypeTag::UInt32 => 32,
        TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Int | TypeTag::UInt => 64,
        _ => return None,
    })
}

/// Promotion rank used by `get_common_type`; higher rank wins.
///
/// Ordered: i8 < u8 < i16 < u16 < i32 < u32 < i64 < u64 < f32 < f64, with
/// the platform words ranking alongside their 64-bit counterparts.
pub fn numeric_rank(tag: TypeTag) -> Option<u32> {
    Some(match tag {
        TypeTag::Int8 => 0,
        TypeTag::UInt8 => 1,
        TypeTag::Int16 => 2,
        TypeTag::UInt16 => 3,
        TypeTag::Int32 => 4,
        TypeTag::UInt32 => 5,
        TypeTag::Int64 | TypeTag::Int => 6,
        TypeTag::UInt64 | TypeTag::UInt => 7,
        TypeTag::Float32 => 8,
        TypeTag::Float64 => 9,
        _ => return None,
    })
}

/// The enumerated widening matrix: can a value of `from` convert to `to`
/// without loss of range?
pub fn widens_to(from: TypeTag, to: TypeTag) -> bool {
    if from == to {
        return is_numeric(from);
    }

    // Integer → float: must fit the float's exactly-representable range.
    if is_float(to) {
        if is_float(from) {
            // f32 → f64 only.
            return from == TypeTag::Float32 && to == TypeTag::Float64;
        }
        return match (int_width(from), to) {
            (Some(w), TypeTag::Float32) => w <= 32,
            (Some(_), TypeTag::Float64) => true,
            _ => false,
        };
    }

    // Float → integer is never a widening.
    if is_float(from) {
        return false;
    }

    let (fw, tw) = match (int_width(from), int_width(to)) {
        (Some(f), Some(t)) => (f, t),
        _ => return false,
    };

    if is_signed_int(from) && is_signed_int(to) {
        return tw >= fw;
    }
    if is_unsigned_int(from) && is_unsigned_int(to) {
        return tw >= fw;
    }
    // Unsigned widens into signed of strictly greater width.
    if is_unsigned_int(from) && is_signed_int(to) {
        return tw > fw;
    }
    // Signed never widens into unsigned.
    false
}

/// Pick the common numeric type of two numeric tags by promotion rank.
///
/// Returns None when either tag is non-numeric.
pub fn common_numeric_type(a: TypeTag, b: TypeTag) -> Option<TypeTag> {
    let ra = numeric_rank(a)?;
    let rb = numeric_rank(b)?;
    Some(if ra >= rb { a } else { b })
}

#[cfg(test)]
mod tests {
    use super::*;
    use TypeTag::*;

    const INTS: [TypeTag; 10] =
        [Int8, Int16, Int32, Int64, UInt8, UInt16, UInt32, UInt64, Int, UInt];

    #[test]
    fn test_signed_widening_chain() {
        assert!(widens_to(Int8, Int16));
        assert!(widens_to(Int8, Int32));
        assert!(widens_to(Int8, Int64));
        assert!(widens_to(Int16, Int64));
        assert!(widens_to(Int32, Int));
        assert!(!widens_to(Int16, Int8));
        assert!(!widens_to(Int64, Int32));
    }

    #[test]
    fn test_unsigned_widening_chain() {
        assert!(widens_to(UInt8, UInt16));
        assert!(widens_to(UInt8, UInt64));
        assert!(widens_to(UInt32, UInt));
        assert!(!widens_to(UInt16, UInt8));
    }

    #[test]
    fn test_unsigned_to_signed_strictly_greater() {
        assert!(widens_to(UInt8, Int16));
        assert!(widens_to(UInt8, Int64));
        assert!(widens_to(UInt32, Int64));
        assert!(!widens_to(UInt8, Int8));
        assert!(!widens_to(UInt32, Int32));
        assert!(!widens_to(UInt64, Int64));
    }

    #[test]
    fn test_signed_never_to_unsigned() {
        for from in [Int8, Int16, Int32, Int64, Int] {
            for to in [UInt8, UInt16, UInt32, UInt64, UInt] {
                assert!(!widens_to(from, to), "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn test_integer_to_float() {
        assert!(widens_to(Int8, Float32));
        assert!(widens_to(Int32, Float32));
        assert!(widens_to(UInt16, Float64));
        assert!(widens_to(Int64, Float64));
        assert!(widens_to(UInt64, Float64));
        // 64-bit integers do not fit f32.
        assert!(!widens_to(Int64, Float32));
        assert!(!widens_to(UInt64, Float32));
        assert!(!widens_to(Int, Float32));
    }

    #[test]
    fn test_float_rules() {
        assert!(widens_to(Float32, Float64));
        assert!(!widens_to(Float64, Float32));
        assert!(!widens_to(Float64, Int64));
        assert!(!widens_to(Float32, Int32));
    }

    #[test]
    fn test_matrix_is_reflexive_on_numerics() {
        for t in INTS.iter().chain([Float32, Float64].iter()) {
            assert!(widens_to(*t, *t));
        }
        assert!(!widens_to(Bool, Bool));
    }

    #[test]
    fn test_matrix_is_transitive() {
        let all: Vec<TypeTag> =
            INTS.iter().chain([Float32, Float64].iter()).copied().collect();
        for &a in &all {
            for &b in &all {
                for &c in &all {
                    if widens_to(a, b) && widens_to(b, c) {
                        assert!(widens_to(a, c), "{:?} -> {:?} -> {:?}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_matrix_is_antisymmetric_up_to_rank() {
        let all: Vec<TypeTag> =
            INTS.iter().chain([Float32, Float64].iter()).copied().collect();
        for &a in &all {
            for &b in &all {
                if a != b && widens_to(a, b) && widens_to(b, a) {
                    // Only the platform-word aliases share both directions.
                    assert_eq!(numeric_rank(a), numeric_rank(b));
                }
            }
        }
    }

    #[test]
    fn test_common_numeric_type() {
        assert_eq!(common_numeric_type(Int8, Int32), Some(Int32));
        assert_eq!(common_numeric_type(Int64, Float32), Some(Float32));
        assert_eq!(common_numeric_type(UInt8, Float64), Some(Float64));
        assert_eq!(common_numeric_type(Bool, Int8), None);
    }
}
