//! Built-in function dispatch: string, math-basic, math-extra and standard
//! functions (LEN, MID$, IIF, STR$, VAL, RND, ...). A static table maps
//! function-hash to a dispatcher tag, matched with a `match` rather than an
//! indirect function pointer (design notes).

use crate::errors::{Error, ErrorKind};
use crate::features::Features;
use crate::iface::RandomSource;
use crate::memory::MemoryManager;
use crate::types::{round_half_away_from_zero, BasicString, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    Len,
    Mid,
    Left,
    Right,
    Instr,
    Chr,
    Asc,
    Str,
    Val,
    UCase,
    LCase,
    Abs,
    Sgn,
    Int,
    Sqr,
    Sin,
    Cos,
    Atn,
    Exp,
    Log,
    Rnd,
}

/// (name, argument count range, tag), used both for identifier-table
/// registration and for error reporting.
pub const TABLE: &[(&str, (u8, u8), BuiltinFn)] = &[
    ("LEN", (1, 1), BuiltinFn::Len),
    ("MID$", (2, 3), BuiltinFn::Mid),
    ("LEFT$", (2, 2), BuiltinFn::Left),
    ("RIGHT$", (2, 2), BuiltinFn::Right),
    ("INSTR", (2, 3), BuiltinFn::Instr),
    ("CHR$", (1, 1), BuiltinFn::Chr),
    ("ASC", (1, 1), BuiltinFn::Asc),
    ("STR$", (1, 1), BuiltinFn::Str),
    ("VAL", (1, 1), BuiltinFn::Val),
    ("UCASE$", (1, 1), BuiltinFn::UCase),
    ("LCASE$", (1, 1), BuiltinFn::LCase),
    ("ABS", (1, 1), BuiltinFn::Abs),
    ("SGN", (1, 1), BuiltinFn::Sgn),
    ("INT", (1, 1), BuiltinFn::Int),
    ("SQR", (1, 1), BuiltinFn::Sqr),
    ("SIN", (1, 1), BuiltinFn::Sin),
    ("COS", (1, 1), BuiltinFn::Cos),
    ("ATN", (1, 1), BuiltinFn::Atn),
    ("EXP", (1, 1), BuiltinFn::Exp),
    ("LOG", (1, 1), BuiltinFn::Log),
    ("RND", (0, 1), BuiltinFn::Rnd),
];

pub fn lookup(name: &str) -> Option<(BuiltinFn, (u8, u8))> {
    TABLE
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, range, tag)| (*tag, *range))
}

/// Resolves a call-site identifier hash against the built-in table by
/// hashing each table entry's name with the configured hash width. The
/// table is small enough (two dozen names) that this linear scan beats
/// maintaining a second sorted-by-hash table in lockstep with `TABLE`.
pub fn lookup_by_hash(hash: u32, use_32bit: bool) -> Option<(BuiltinFn, (u8, u8))> {
    TABLE
        .iter()
        .find(|(name, _, _)| crate::hash::hash(name.as_bytes(), use_32bit) == hash)
        .map(|(_, range, tag)| (*tag, *range))
}

fn as_text(v: &Value, mm: &MemoryManager) -> Result<String, Error> {
    match v {
        Value::Str(s) => s.text(mm),
        _ => Err(ErrorKind::TypeMismatch.into()),
    }
}

/// `b1_fn_bltin_instr` per Open Question 4: empty haystack returns 0 unless
/// needle is also empty; empty needle returns the (clamped) start index.
fn instr(haystack: &str, needle: &str, start: usize) -> i32 {
    let start = start.max(1);
    if haystack.is_empty() {
        return if needle.is_empty() { start as i32 } else { 0 };
    }
    if needle.is_empty() {
        return start.min(haystack.len() + 1) as i32;
    }
    let from = (start - 1).min(haystack.len());
    match haystack.get(from..).and_then(|s| s.find(needle)) {
        Some(rel) => (from + rel + 1) as i32,
        None => 0,
    }
}

/// Dispatches a built-in call. `args` have already been evaluated and
/// type-coerced by the caller; `rng` is only consulted by `RND`.
pub fn call(
    f: BuiltinFn,
    args: &[Value],
    features: &Features,
    rng: &mut dyn RandomSource,
    mm: &mut MemoryManager,
) -> Result<Value, Error> {
    use BuiltinFn::*;
    Ok(match f {
        Len => Value::I32(as_text(&args[0], mm)?.len() as i32),
        Mid => {
            let s = as_text(&args[0], mm)?;
            let start = args[1].as_i32()?.max(1) as usize;
            let len = match args.get(2) {
                Some(Value::Null) | None => s.len(),
                Some(v) => v.as_i32()?.max(0) as usize,
            };
            let from = (start - 1).min(s.len());
            let to = (from + len).min(s.len());
            Value::Str(BasicString::owned(&s[from..to], mm)?)
        }
        Left => {
            let s = as_text(&args[0], mm)?;
            let n = args[1].as_i32()?.max(0) as usize;
            let n = n.min(s.len());
            Value::Str(BasicString::owned(&s[..n], mm)?)
        }
        Right => {
            let s = as_text(&args[0], mm)?;
            let n = args[1].as_i32()?.max(0) as usize;
            let n = n.min(s.len());
            Value::Str(BasicString::owned(&s[s.len() - n..], mm)?)
        }
        Instr => {
            let a = as_text(&args[0], mm)?;
            let b = as_text(&args[1], mm)?;
            let start = match args.get(2) {
                Some(Value::Null) | None => 1,
                Some(v) => v.as_i32()?.max(1) as usize,
            };
            Value::I32(instr(&a, &b, start))
        }
        Chr => {
            let code = args[0].as_i32()?;
            if !(0..=255).contains(&code) {
                return Err(ErrorKind::InvalidArgument.into());
            }
            Value::Str(BasicString::owned(&(code as u8 as char).to_string(), mm)?)
        }
        Asc => {
            let s = as_text(&args[0], mm)?;
            let b = s.as_bytes().first().ok_or(ErrorKind::InvalidArgument)?;
            Value::I32(*b as i32)
        }
        Str => Value::Str(BasicString::owned(&format_number(&args[0])?, mm)?),
        Val => {
            let s = as_text(&args[0], mm)?;
            let trimmed = s.trim();
            match trimmed.parse::<f64>() {
                Ok(v) if features.has_fractional() => Value::F64(v),
                _ => match trimmed.parse::<i32>() {
                    Ok(v) => Value::I32(v),
                    Err(_) => return Err(ErrorKind::InvalidNumber.into()),
                },
            }
        }
        UCase => Value::Str(BasicString::owned(&as_text(&args[0], mm)?.to_uppercase(), mm)?),
        LCase => Value::Str(BasicString::owned(&as_text(&args[0], mm)?.to_lowercase(), mm)?),
        Abs => match &args[0] {
            Value::F64(v) => Value::F64(v.abs()),
            Value::F32(v) => Value::F32(v.abs()),
            v => Value::I32(v.as_i32()?.abs()),
        },
        Sgn => {
            let v = args[0].as_f64()?;
            Value::I32(if v > 0.0 {
                1
            } else if v < 0.0 {
                -1
            } else {
                0
            })
        }
        Int => {
            if !features.has_fractional() {
                return Err(ErrorKind::InvalidArgument.into());
            }
            Value::I32(round_half_away_from_zero(args[0].as_f64()?.floor()) as i32)
        }
        Sqr => math1(args, f64::sqrt, features)?,
        Sin => math1(args, f64::sin, features)?,
        Cos => math1(args, f64::cos, features)?,
        Atn => math1(args, f64::atan, features)?,
        Exp => math1(args, f64::exp, features)?,
        Log => math1(args, f64::ln, features)?,
        Rnd => {
            let max = match args.first() {
                Some(v) => v.as_i32()?,
                None => i32::MAX,
            };
            Value::I32(rng.next_seed(max))
        }
    })
}

fn math1(args: &[Value], f: fn(f64) -> f64, features: &Features) -> Result<Value, Error> {
    if !features.has_fractional() {
        return Err(ErrorKind::InvalidArgument.into());
    }
    let v = f(args[0].as_f64()?);
    if features.has_double {
        Ok(Value::F64(v))
    } else {
        Ok(Value::F32(v as f32))
    }
}

fn format_number(v: &Value) -> Result<String, Error> {
    Ok(match v {
        Value::I32(i) => i.to_string(),
        Value::I16(i) => i.to_string(),
        Value::U16(i) => i.to_string(),
        Value::U8(i) => i.to_string(),
        Value::F32(f) => format!("{f}"),
        Value::F64(f) => format!("{f}"),
        Value::Bool(b) => (if *b { "-1" } else { "0" }).to_string(),
        _ => return Err(ErrorKind::TypeMismatch.into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRng(i32);
    impl RandomSource for FixedRng {
        fn randomize(&mut self, _seed: Option<i32>) {}
        fn next_seed(&mut self, max: i32) -> i32 {
            self.0.min(max)
        }
    }

    #[test]
    fn instr_empty_needle_and_haystack_per_open_question_4() {
        assert_eq!(instr("", "x", 1), 0);
        assert_eq!(instr("", "", 1), 1);
        assert_eq!(instr("abc", "", 2), 2);
    }

    #[test]
    fn mid_clamps_length_to_remaining() {
        let f = Features::full();
        let mut rng = FixedRng(7);
        let mut mm = crate::memory::MemoryManager::new();
        let r = call(
            BuiltinFn::Mid,
            &[
                Value::Str(BasicString::inline("hello")),
                Value::I32(2),
                Value::I32(100),
            ],
            &f,
            &mut rng,
            &mut mm,
        )
        .unwrap();
        assert_eq!(r, Value::Str(BasicString::inline("ello")));
    }

    #[test]
    fn len_counts_bytes() {
        let f = Features::full();
        let mut rng = FixedRng(0);
        let mut mm = crate::memory::MemoryManager::new();
        let r = call(
            BuiltinFn::Len,
            &[Value::Str(BasicString::inline("foobar"))],
            &f,
            &mut rng,
            &mut mm,
        )
        .unwrap();
        assert_eq!(r, Value::I32(6));
    }

    #[test]
    fn ucase_past_inline_capacity_goes_out_of_line() {
        let f = Features::full();
        let mut rng = FixedRng(0);
        let mut mm = crate::memory::MemoryManager::new();
        let r = call(
            BuiltinFn::UCase,
            &[Value::Str(BasicString::owned("this is definitely over fifteen bytes", &mut mm).unwrap())],
            &f,
            &mut rng,
            &mut mm,
        )
        .unwrap();
        let Value::Str(s) = r else { panic!("expected a string") };
        assert_eq!(s.text(&mm).unwrap(), "THIS IS DEFINITELY OVER FIFTEEN BYTES");
    }

    #[test]
    fn len_reads_block_backed_argument() {
        let f = Features::full();
        let mut rng = FixedRng(0);
        let mut mm = crate::memory::MemoryManager::new();
        let s = BasicString::owned("well over the fifteen byte inline limit", &mut mm).unwrap();
        let r = call(BuiltinFn::Len, &[Value::Str(s)], &f, &mut rng, &mut mm).unwrap();
        assert_eq!(r, Value::I32(39));
    }
}
