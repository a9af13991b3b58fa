//! RPN evaluator: walks a compiled record sequence over a bounded
//! evaluation stack, resolving identifiers, promoting operand types and
//! dispatching operators and functions (spec §4.4).

use std::collections::HashMap;

use crate::builtins;
use crate::errors::{Error, ErrorKind};
use crate::features::Features;
use crate::iface::RandomSource;
use crate::memory::MemoryManager;
use crate::rpn::{Operator, RpnRecord};
use crate::types::{common_type, narrow_float_to_int, round_half_away_from_zero, BasicString, TypeTag, Value};
use crate::vars::{VarSlot, VariableStore};

/// Bound on the evaluation stack depth (`ETMPSTKOVF`'s trigger).
pub const MAX_EVAL_STACK: usize = 256;
/// Bound on the user-function call stack (`EUDEFOVF`'s trigger).
pub const MAX_USER_FN_DEPTH: usize = 32;

/// A registered `DEF FN...` body: parameter hashes in declaration order
/// plus its compiled RPN, built once during the prepass (spec §4.7).
#[derive(Debug, Clone)]
pub struct UserFunction {
    pub params: Vec<u32>,
    pub body: Vec<RpnRecord>,
    pub body_line: Vec<u8>,
    pub return_type: TypeTag,
}

#[derive(Default)]
pub struct UserFunctionTable {
    pub functions: HashMap<u32, UserFunction>,
}

impl UserFunctionTable {
    pub fn new() -> Self {
        Self::default()
    }
}

struct CallFrame<'a> {
    params: &'a [u32],
    args: &'a [Value],
}

pub struct EvalContext<'a> {
    pub vars: &'a mut VariableStore,
    pub mm: &'a mut MemoryManager,
    pub features: &'a Features,
    pub rng: &'a mut dyn RandomSource,
    pub user_fns: &'a UserFunctionTable,
}

pub struct Evaluator {
    stack: Vec<Value>,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator { stack: Vec::new() }
    }

    fn push(&mut self, v: Value) -> Result<(), Error> {
        if self.stack.len() >= MAX_EVAL_STACK {
            return Err(ErrorKind::EvalStackOverflow.into());
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.stack.pop().ok_or_else(|| ErrorKind::Syntax.into())
    }

    /// Evaluates one compiled expression to a single `Value`. `line` is the
    /// program line text the RPN's literal records point back into.
    pub fn evaluate(
        &mut self,
        records: &[RpnRecord],
        line: &[u8],
        ctx: &mut EvalContext,
    ) -> Result<Value, Error> {
        self.evaluate_inner(records, line, ctx, &[], 0)
    }

    fn evaluate_inner(
        &mut self,
        records: &[RpnRecord],
        line: &[u8],
        ctx: &mut EvalContext,
        frames: &[CallFrame],
        depth: usize,
    ) -> Result<Value, Error> {
        let depth_before = self.stack.len();
        let mut i = 0usize;
        while i < records.len() {
            match &records[i] {
                RpnRecord::Literal { offset, len, hex } => {
                    self.push(resolve_literal(line, *offset, *len, *hex, ctx.features, ctx.mm)?)?;
                }
                RpnRecord::NullArg => self.push(Value::Null)?,
                RpnRecord::TabFn => {
                    let v = self.pop()?;
                    self.push(Value::TabFn(v.as_i32()?))?;
                }
                RpnRecord::SpcFn => {
                    let v = self.pop()?;
                    self.push(Value::SpcFn(v.as_i32()?))?;
                }
                RpnRecord::Variable { hash } => {
                    self.push(resolve_variable(*hash, ctx, frames)?)?;
                }
                RpnRecord::Call { hash, argnum } => {
                    let mut args = Vec::with_capacity(*argnum as usize);
                    for _ in 0..*argnum {
                        args.push(self.pop()?);
                    }
                    args.reverse();
                    let result = dispatch_call(*hash, &args, ctx, depth)?;
                    self.push(result)?;
                }
                RpnRecord::Operator(op) => {
                    let result = if op.is_unary() {
                        let v = self.pop()?;
                        apply_unary(*op, v)?
                    } else {
                        let b = self.pop()?;
                        let a = self.pop()?;
                        apply_binary(*op, a, b, ctx.mm)?
                    };
                    self.push(result)?;
                }
            }
            i += 1;
        }

        if self.stack.len() != depth_before + 1 {
            return Err(ErrorKind::WrongArgCount.into());
        }
        self.pop()
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_literal(
    line: &[u8],
    offset: usize,
    len: usize,
    hex: bool,
    features: &Features,
    mm: &mut MemoryManager,
) -> Result<Value, Error> {
    let text = &line[offset..offset + len];
    if text.first() == Some(&b'"') {
        let inner = &text[1..text.len() - 1];
        let s = String::from_utf8_lossy(inner).replace("\"\"", "\"");
        return Ok(Value::Str(BasicString::owned(&s, mm)?));
    }

    if hex {
        let digits = std::str::from_utf8(&text[2..]).map_err(|_| ErrorKind::InvalidToken)?;
        let v = i32::from_str_radix(digits, 16).map_err(|_| ErrorKind::InvalidNumber)?;
        return Ok(Value::I32(v));
    }

    let s = std::str::from_utf8(text).map_err(|_| ErrorKind::InvalidToken)?;
    let (numeric_part, sigil) = match s.chars().last() {
        Some(c @ ('%' | '!' | '#')) => (&s[..s.len() - 1], Some(c)),
        _ => (s, None),
    };

    if numeric_part.contains('.') || numeric_part.contains(['e', 'E']) || sigil == Some('!') || sigil == Some('#') {
        if !features.has_fractional() {
            return Err(ErrorKind::InvalidNumber.into());
        }
        let v: f64 = numeric_part.parse().map_err(|_| ErrorKind::InvalidNumber)?;
        return Ok(if sigil == Some('!') || (!features.has_double && sigil != Some('#')) {
            Value::F32(v as f32)
        } else {
            Value::F64(v)
        });
    }

    let v: i64 = numeric_part.parse().map_err(|_| ErrorKind::InvalidNumber)?;
    if !(i32::MIN as i64..=i32::MAX as i64).contains(&v) {
        return Err(ErrorKind::NumericOverflow.into());
    }
    Ok(Value::I32(v as i32))
}

fn resolve_variable(hash: u32, ctx: &mut EvalContext, frames: &[CallFrame]) -> Result<Value, Error> {
    for frame in frames.iter().rev() {
        if let Some(pos) = frame.params.iter().position(|&p| p == hash) {
            return Ok(frame.args[pos].clone());
        }
    }
    match ctx.vars.get(hash) {
        Some(v) => match &v.slot {
            // The variable's slot keeps the real, owned copy; a read onto
            // the eval stack is always a borrow, same as an array element
            // read in `dispatch_call` below, so only the variable itself
            // (via `set_scalar`/`erase`) ever frees its string's block.
            VarSlot::Scalar(Value::Str(s)) => Ok(Value::Str(BasicString {
                payload: s.payload.clone(),
                owned: false,
            })),
            VarSlot::Scalar(val) => Ok(val.clone()),
            VarSlot::Array(_) => Err(ErrorKind::WrongSubscriptCount.into()),
        },
        None => Err(ErrorKind::UnknownIdentifier.into()),
    }
}

fn dispatch_call(hash: u32, args: &[Value], ctx: &mut EvalContext, depth: usize) -> Result<Value, Error> {
    // IIF/IIF$: a marker hash, like TAB_MARKER/SPC_MARKER, never a real
    // identifier, so it's checked before the array/builtin/user-function
    // lookup chain rather than through `builtins::lookup_by_hash`.
    if hash == crate::rpn::IIF_MARKER {
        if args.len() != 3 {
            return Err(ErrorKind::WrongArgCount.into());
        }
        return Ok(if args[0].as_i32()? != 0 { args[1].clone() } else { args[2].clone() });
    }

    // Array subscript: an existing array variable with this hash.
    if let Some(var) = ctx.vars.get_mut(hash) {
        if let VarSlot::Array(arr) = &mut var.slot {
            let subs: Result<Vec<i32>, Error> = args.iter().map(|v| v.as_i32()).collect();
            let subs = subs?;
            let offset = arr.linear_offset(&subs)?;
            let id = arr.ensure_allocated(ctx.mm)?;
            return match arr.element_type {
                TypeTag::I32 => Ok(Value::I32(ctx.mm.read_u32(id, offset * 4)? as i32)),
                TypeTag::F64 => Ok(Value::F64(ctx.mm.read_f64(id, offset * 8)?)),
                TypeTag::Str => {
                    let s = match ctx.mm.read_block_ref(id, offset * 8)? {
                        // Borrowed: the array still owns this block, so the
                        // caller must not free it (spec §6).
                        Some(block) => BasicString::block(block, false),
                        None => BasicString::inline(""),
                    };
                    Ok(Value::Str(s))
                }
                _ => Ok(Value::I32(ctx.mm.read_u32(id, offset * 4)? as i32)),
            };
        }
    }

    if let Some((tag, range)) = builtins::lookup_by_hash(hash, ctx.features.hash32) {
        if (args.len() as u8) < range.0 || (args.len() as u8) > range.1 {
            return Err(ErrorKind::WrongArgCount.into());
        }
        return builtins::call(tag, args, ctx.features, ctx.rng, ctx.mm);
    }

    call_user_function(hash, args, ctx, depth)
}

/// Calls a `DEF FN`-registered function. `depth` is the live user-function
/// call nesting depth, threaded explicitly rather than inferred from a
/// frames list: each nested call gets a fresh single-frame parameter scope
/// (BASIC's `DEF FN` bodies don't see an enclosing call's parameters), so
/// the frame count alone can't double as the recursion guard.
fn call_user_function(hash: u32, args: &[Value], ctx: &mut EvalContext, depth: usize) -> Result<Value, Error> {
    if depth >= MAX_USER_FN_DEPTH {
        return Err(ErrorKind::UserFnStackOverflow.into());
    }
    let func = ctx
        .user_fns
        .functions
        .get(&hash)
        .ok_or(ErrorKind::UnknownIdentifier)?;
    if args.len() != func.params.len() {
        return Err(ErrorKind::WrongArgCount.into());
    }

    let body = func.body.clone();
    let body_line = func.body_line.clone();
    let return_type = func.return_type;
    let frame = CallFrame {
        params: &func.params,
        args,
    };
    let mut nested = Evaluator::new();
    let owned_frames = [frame];
    let result = nested.evaluate_inner(&body, &body_line, ctx, &owned_frames, depth + 1)?;
    coerce_to_type(result, return_type)
}

fn coerce_to_type(v: Value, target: TypeTag) -> Result<Value, Error> {
    if v.type_tag() == Some(target) {
        return Ok(v);
    }
    match target {
        TypeTag::Str => match v {
            Value::Str(_) => Ok(v),
            _ => Err(ErrorKind::TypeMismatch.into()),
        },
        TypeTag::F64 => Ok(Value::F64(v.as_f64()?)),
        TypeTag::F32 => Ok(Value::F32(v.as_f64()? as f32)),
        int_ty => narrow_float_to_int(v.as_f64()?, int_ty),
    }
}

fn apply_unary(op: Operator, v: Value) -> Result<Value, Error> {
    match op {
        Operator::Pos => {
            if !v.is_numeric() {
                return Err(ErrorKind::TypeMismatch.into());
            }
            Ok(v)
        }
        Operator::Neg => match v {
            Value::I32(i) => Ok(Value::I32(i.checked_neg().ok_or(ErrorKind::NumericOverflow)?)),
            Value::F64(f) => Ok(Value::F64(-f)),
            Value::F32(f) => Ok(Value::F32(-f)),
            other if other.is_numeric() => Ok(Value::I32(-other.as_i32()?)),
            _ => Err(ErrorKind::TypeMismatch.into()),
        },
        Operator::Not => {
            let i = v.as_i32()?;
            Ok(Value::I32(!i))
        }
        _ => unreachable!("apply_unary called with a binary operator"),
    }
}

fn apply_binary(op: Operator, a: Value, b: Value, mm: &mut MemoryManager) -> Result<Value, Error> {
    use Operator::*;

    if matches!(op, Eq | Lt | Le | Gt | Ge | Ne) {
        return compare(op, &a, &b, mm);
    }

    if op == Add {
        if let (Value::Str(_), Value::Str(_)) = (&a, &b) {
            return concat(a, b, mm);
        }
    }

    let ta = a.type_tag().ok_or(ErrorKind::TypeMismatch)?;
    let tb = b.type_tag().ok_or(ErrorKind::TypeMismatch)?;
    if ta == TypeTag::Str || tb == TypeTag::Str {
        return Err(ErrorKind::TypeMismatch.into());
    }
    let common = common_type(ta, tb);

    match op {
        Shl | Shr | And | Or | Xor => {
            let x = a.as_i32()?;
            let y = b.as_i32()?;
            let r = match op {
                Shl => x.wrapping_shl(y as u32),
                Shr => x.wrapping_shr(y as u32),
                And => x & y,
                Or => x | y,
                Xor => x ^ y,
                _ => unreachable!(),
            };
            Ok(Value::I32(r))
        }
        Mod => {
            let x = a.as_i32()?;
            let y = b.as_i32()?;
            if y == 0 {
                return Err(ErrorKind::DivideByZero.into());
            }
            Ok(Value::I32(x.wrapping_rem(y)))
        }
        Add | Sub | Mul | Div | Pow => arith(op, common, &a, &b),
        _ => unreachable!(),
    }
}

fn arith(op: Operator, common: TypeTag, a: &Value, b: &Value) -> Result<Value, Error> {
    use Operator::*;
    if common.is_float() {
        let x = a.as_f64()?;
        let y = b.as_f64()?;
        let r = match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => {
                if y == 0.0 {
                    return Err(ErrorKind::DivideByZero.into());
                }
                x / y
            }
            Pow => x.powf(y),
            _ => unreachable!(),
        };
        return Ok(if common == TypeTag::F32 {
            Value::F32(r as f32)
        } else {
            Value::F64(r)
        });
    }

    let x = a.as_i32()?;
    let y = b.as_i32()?;
    let r: i32 = match op {
        Add => x.checked_add(y).ok_or(ErrorKind::NumericOverflow)?,
        Sub => x.checked_sub(y).ok_or(ErrorKind::NumericOverflow)?,
        Mul => x.checked_mul(y).ok_or(ErrorKind::NumericOverflow)?,
        Div => {
            if y == 0 {
                return Err(ErrorKind::DivideByZero.into());
            }
            if x == i32::MIN && y == -1 {
                return Err(ErrorKind::NumericOverflow.into());
            }
            x / y
        }
        Pow => {
            if y < 0 {
                return Err(ErrorKind::WrongArgType.into());
            }
            let f = (x as f64).powi(y);
            return narrow_float_to_int(round_half_away_from_zero(f), TypeTag::I32);
        }
        _ => unreachable!(),
    };
    Ok(Value::I32(r))
}

fn concat(a: Value, b: Value, mm: &mut MemoryManager) -> Result<Value, Error> {
    let (Value::Str(sa), Value::Str(sb)) = (a, b) else {
        return Err(ErrorKind::TypeMismatch.into());
    };
    let ta = sa.text(mm)?;
    let tb = sb.text(mm)?;
    let joined = format!("{ta}{tb}");
    Ok(Value::Str(BasicString::owned(&joined, mm)?))
}

fn compare(op: Operator, a: &Value, b: &Value, mm: &MemoryManager) -> Result<Value, Error> {
    use Operator::*;
    let ordering = if let (Value::Str(sa), Value::Str(sb)) = (a, b) {
        sa.text(mm)?.cmp(&sb.text(mm)?)
    } else {
        a.as_f64()?
            .partial_cmp(&b.as_f64()?)
            .ok_or(ErrorKind::TypeMismatch)?
    };
    let result = match op {
        Eq => ordering.is_eq(),
        Ne => ordering.is_ne(),
        Lt => ordering.is_lt(),
        Le => ordering.is_le(),
        Gt => ordering.is_gt(),
        Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpn::build;

    struct FixedRng;
    impl RandomSource for FixedRng {
        fn randomize(&mut self, _seed: Option<i32>) {}
        fn next_seed(&mut self, max: i32) -> i32 {
            max / 2
        }
    }

    fn eval_expr(src: &[u8]) -> Value {
        let features = Features::full();
        let (records, _) = build(src, 0, &features, &[]).unwrap();
        let mut vars = VariableStore::new();
        let mut mm = MemoryManager::new();
        let mut rng = FixedRng;
        let user_fns = UserFunctionTable::new();
        let mut ctx = EvalContext {
            vars: &mut vars,
            mm: &mut mm,
            features: &features,
            rng: &mut rng,
            user_fns: &user_fns,
        };
        Evaluator::new().evaluate(&records, src, &mut ctx).unwrap()
    }

    #[test]
    fn arithmetic_with_precedence() {
        assert_eq!(eval_expr(b"2 + 3 * 4"), Value::I32(14));
    }

    #[test]
    fn iif_picks_true_arm() {
        assert_eq!(eval_expr(b"IIF(1 = 1, 10, 20)"), Value::I32(10));
    }

    #[test]
    fn iif_picks_false_arm() {
        assert_eq!(eval_expr(b"IIF(1 = 2, 10, 20)"), Value::I32(20));
    }

    #[test]
    fn iif_dollar_picks_string_arm() {
        assert_eq!(
            eval_expr(br#"IIF$(0, "yes", "no")"#),
            Value::Str(BasicString::inline("no"))
        );
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            eval_expr(br#""foo" + "bar""#),
            Value::Str(BasicString::inline("foobar"))
        );
    }

    #[test]
    fn division_by_zero_errors() {
        let features = Features::full();
        let (records, _) = build(b"1 / 0", 0, &features, &[]).unwrap();
        let mut vars = VariableStore::new();
        let mut mm = MemoryManager::new();
        let mut rng = FixedRng;
        let user_fns = UserFunctionTable::new();
        let mut ctx = EvalContext {
            vars: &mut vars,
            mm: &mut mm,
            features: &features,
            rng: &mut rng,
            user_fns: &user_fns,
        };
        let err = Evaluator::new().evaluate(&records, b"1 / 0", &mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivideByZero);
    }

    #[test]
    fn comparisons_yield_bool() {
        assert_eq!(eval_expr(b"3 > 2"), Value::Bool(true));
    }

    #[test]
    fn long_string_literal_does_not_panic() {
        let s = eval_expr(br#""this literal is longer than fifteen bytes""#);
        let Value::Str(s) = s else { panic!("expected a string") };
        assert!(matches!(s.payload, crate::types::StringPayload::Block(_)));
    }

    #[test]
    fn concat_past_inline_capacity_goes_out_of_line() {
        let features = Features::full();
        let src = br#""0123456789" + "0123456789""#;
        let (records, _) = build(src, 0, &features, &[]).unwrap();
        let mut vars = VariableStore::new();
        let mut mm = MemoryManager::new();
        let mut rng = FixedRng;
        let user_fns = UserFunctionTable::new();
        let mut ctx = EvalContext {
            vars: &mut vars,
            mm: &mut mm,
            features: &features,
            rng: &mut rng,
            user_fns: &user_fns,
        };
        let result = Evaluator::new().evaluate(&records, src, &mut ctx).unwrap();
        let Value::Str(s) = result else { panic!("expected a string") };
        assert!(matches!(s.payload, crate::types::StringPayload::Block(_)));
        assert_eq!(s.text(&mm).unwrap(), "01234567890123456789");
    }
}
