//! Tagged value variant, the type lattice and numeric<->string conversions.
//!
//! Mirrors `b1types.h`'s `B1_TYPE_*` tag set and promotion rules, replacing
//! the original's byte tag plus flag bits with a real Rust sum type per the
//! design notes: `Value = Null | Bool | I32 | I16 | U16 | U8 | F32 | F64 |
//! Str(..) | TabFn | SpcFn | RpnLiteral`.

use crate::errors::{Error, ErrorKind};
use crate::memory::{BlockId, MemoryManager};

/// Maximum length of a string stored inline in a `Value` without going
/// through the memory manager (mirrors `B1_TYPE_STRING_IMM_MAX_LEN`).
pub const INLINE_STRING_MAX: usize = 15;

/// A BASIC string payload: either inlined in the `Value` or a block in the
/// memory manager. `owned` strings must be freed by whoever pops them off
/// the evaluation stack or overwrites the variable slot holding them;
/// `owned == false` marks a reference that must never be freed by the
/// consumer (e.g. a borrowed array element).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringPayload {
    Inline { bytes: [u8; INLINE_STRING_MAX], len: u8 },
    Block(BlockId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicString {
    pub payload: StringPayload,
    pub owned: bool,
}

impl BasicString {
    pub fn inline(s: &str) -> Self {
        assert!(s.len() <= INLINE_STRING_MAX);
        let mut bytes = [0u8; INLINE_STRING_MAX];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        BasicString {
            payload: StringPayload::Inline { bytes, len: s.len() as u8 },
            owned: true,
        }
    }

    pub fn block(id: BlockId, owned: bool) -> Self {
        BasicString {
            payload: StringPayload::Block(id),
            owned,
        }
    }

    /// Builds a fresh owned string, inline when it fits in
    /// `INLINE_STRING_MAX` bytes and out-of-line in `mm` otherwise. The
    /// allocating counterpart to a fixed-size inline slot, needed anywhere a
    /// result (a literal, a concatenation, a built-in's return value) might
    /// exceed it.
    pub fn owned(s: &str, mm: &mut MemoryManager) -> Result<Self, Error> {
        if s.len() <= INLINE_STRING_MAX {
            Ok(BasicString::inline(s))
        } else {
            Ok(BasicString::block(mm.store_string(s.as_bytes())?, true))
        }
    }

    /// Resolves this string's text regardless of where it lives: inline, or
    /// out-of-line in a memory manager block.
    pub fn text(&self, mm: &MemoryManager) -> Result<String, Error> {
        match &self.payload {
            StringPayload::Inline { bytes, len } => {
                Ok(String::from_utf8_lossy(&bytes[..*len as usize]).into_owned())
            }
            StringPayload::Block(id) => Ok(String::from_utf8_lossy(mm.read(*id)?).into_owned()),
        }
    }
}

/// A BASIC value. `Value::Str` is resolved against a memory manager when its
/// textual content is needed; everything else is self-contained.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I16(i16),
    U16(u16),
    U8(u8),
    F32(f32),
    F64(f64),
    Str(BasicString),
    /// `PRINT ... TAB(n) ...` marker, carrying the column argument.
    TabFn(i32),
    /// `PRINT ... SPC(n) ...` marker, carrying the space count argument.
    SpcFn(i32),
    /// An unresolved RPN literal still pointing into the RPN record; the
    /// evaluator resolves this lazily against the token it references.
    RpnLiteral(u32),
}

/// Type tag without a payload, used for declared variable/argument/return
/// types and for the type lattice's ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeTag {
    U8,
    U16,
    I16,
    I32,
    F32,
    F64,
    Str,
}

impl TypeTag {
    /// `B1_TYPE_ANY` equivalent: no coercion should be performed against this
    /// tag. Modeled as `Option<TypeTag>` at call sites instead of a tag
    /// variant, since "any" isn't a real rank in the lattice.
    pub fn rank(self) -> u8 {
        // STRING > DOUBLE > SINGLE > INT32 > INT16 > UINT16 > UINT8
        match self {
            TypeTag::U8 => 0,
            TypeTag::U16 => 1,
            TypeTag::I16 => 2,
            TypeTag::I32 => 3,
            TypeTag::F32 => 4,
            TypeTag::F64 => 5,
            TypeTag::Str => 6,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, TypeTag::U8 | TypeTag::U16 | TypeTag::I16 | TypeTag::I32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeTag::F32 | TypeTag::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl Value {
    pub fn type_tag(&self) -> Option<TypeTag> {
        match self {
            Value::Bool(_) => Some(TypeTag::I32),
            Value::I32(_) => Some(TypeTag::I32),
            Value::I16(_) => Some(TypeTag::I16),
            Value::U16(_) => Some(TypeTag::U16),
            Value::U8(_) => Some(TypeTag::U8),
            Value::F32(_) => Some(TypeTag::F32),
            Value::F64(_) => Some(TypeTag::F64),
            Value::Str(_) => Some(TypeTag::Str),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.type_tag().map(|t| t.is_numeric()).unwrap_or(false)
    }

    /// Converts a numeric value to `f64`, the widest representation, losing
    /// no precision for anything up to `F32`.
    pub fn as_f64(&self) -> Result<f64, Error> {
        Ok(match self {
            Value::Bool(b) => {
                if *b {
                    -1.0
                } else {
                    0.0
                }
            }
            Value::I32(i) => *i as f64,
            Value::I16(i) => *i as f64,
            Value::U16(i) => *i as f64,
            Value::U8(i) => *i as f64,
            Value::F32(f) => *f as f64,
            Value::F64(f) => *f,
            _ => return Err(ErrorKind::TypeMismatch.into()),
        })
    }

    /// Converts a numeric value to `i32`, for integer-only contexts
    /// (subscripts, bitwise operands, loop counters declared as INT32).
    pub fn as_i32(&self) -> Result<i32, Error> {
        Ok(match self {
            Value::Bool(b) => {
                if *b {
                    -1
                } else {
                    0
                }
            }
            Value::I32(i) => *i,
            Value::I16(i) => *i as i32,
            Value::U16(i) => *i as i32,
            Value::U8(i) => *i as i32,
            Value::F32(f) => round_half_away_from_zero(*f as f64) as i32,
            Value::F64(f) => round_half_away_from_zero(*f) as i32,
            _ => return Err(ErrorKind::TypeMismatch.into()),
        })
    }
}

/// Round-half-away-from-zero, used for float-to-integer narrowing (spec
/// §3 and the Open Question 3 fix for `b1_eval_pow`).
pub fn round_half_away_from_zero(v: f64) -> f64 {
    if v >= 0.0 {
        (v + 0.5).floor()
    } else {
        (v - 0.5).ceil()
    }
}

/// Returns the common type both operands promote to, per the lattice
/// ranking STRING > DOUBLE > SINGLE > INT32 > INT16 > UINT16 > UINT8.
pub fn common_type(a: TypeTag, b: TypeTag) -> TypeTag {
    if a.rank() >= b.rank() {
        a
    } else {
        b
    }
}

/// Narrows an `f64` into the target integer tag, erroring with
/// `ENUMOVF`-equivalent `NumericOverflow` if the rounded magnitude doesn't
/// fit (Open Question 3: no silent narrowing overflow).
pub fn narrow_float_to_int(v: f64, target: TypeTag) -> Result<Value, Error> {
    let rounded = round_half_away_from_zero(v);
    match target {
        TypeTag::I32 => {
            if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
                Err(ErrorKind::NumericOverflow.into())
            } else {
                Ok(Value::I32(rounded as i32))
            }
        }
        TypeTag::I16 => {
            if rounded < i16::MIN as f64 || rounded > i16::MAX as f64 {
                Err(ErrorKind::NumericOverflow.into())
            } else {
                Ok(Value::I16(rounded as i16))
            }
        }
        TypeTag::U16 => {
            if rounded < 0.0 || rounded > u16::MAX as f64 {
                Err(ErrorKind::NumericOverflow.into())
            } else {
                Ok(Value::U16(rounded as u16))
            }
        }
        TypeTag::U8 => {
            if rounded < 0.0 || rounded > u8::MAX as f64 {
                Err(ErrorKind::NumericOverflow.into())
            } else {
                Ok(Value::U8(rounded as u8))
            }
        }
        _ => unreachable!("narrow_float_to_int called with non-integer target"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_ranks_string_highest() {
        assert_eq!(common_type(TypeTag::Str, TypeTag::F64), TypeTag::Str);
        assert_eq!(common_type(TypeTag::F64, TypeTag::F32), TypeTag::F64);
        assert_eq!(common_type(TypeTag::I32, TypeTag::U8), TypeTag::I32);
    }

    #[test]
    fn round_half_away_from_zero_matches_sign() {
        assert_eq!(round_half_away_from_zero(2.5), 3.0);
        assert_eq!(round_half_away_from_zero(-2.5), -3.0);
        assert_eq!(round_half_away_from_zero(2.4), 2.0);
    }

    #[test]
    fn narrow_overflow_is_an_error() {
        assert!(narrow_float_to_int(1e10, TypeTag::I32).is_err());
        assert!(narrow_float_to_int(100.0, TypeTag::U8).is_ok());
    }

    #[test]
    fn inline_string_roundtrips() {
        let s = BasicString::inline("hello");
        match s.payload {
            StringPayload::Inline { bytes, len } => {
                assert_eq!(&bytes[..len as usize], b"hello");
            }
            _ => panic!("expected inline payload"),
        }
    }
}
