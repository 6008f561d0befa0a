use super::trap::TrapKind;
use super::val::Val;
use crate::lang::ast::{CmpOp, Ty};

type Result<T> = std::result::Result<T, TrapKind>;

/// Arithmetic, comparison, and logic over [`Val`] pairs. The emitter
/// already aligns operand types, but mixed kinds still coerce here per
/// the widening lattice so tagged dispatch stays sound.
pub struct Operation;

/// Kind both operands promote to before an arithmetic op.
fn join(lhs: &Val, rhs: &Val) -> Result<Ty> {
    let (a, b) = match (lhs.ty(), rhs.ty()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(TrapKind::TypeMismatch),
    };
    Ty::widen(a, b).ok_or(TrapKind::TypeMismatch)
}

impl Operation {
    pub fn negate(val: Val) -> Result<Val> {
        match val {
            Val::Int16(n) => n.checked_neg().map(Val::Int16).ok_or(TrapKind::Overflow),
            Val::Int32(n) => n.checked_neg().map(Val::Int32).ok_or(TrapKind::Overflow),
            Val::Int64(n) => n.checked_neg().map(Val::Int64).ok_or(TrapKind::Overflow),
            Val::UInt32(n) => Ok(Val::Int64(-(n as i64))),
            Val::Single(n) => Ok(Val::Single(-n)),
            Val::Double(n) => Ok(Val::Double(-n)),
            _ => Err(TrapKind::TypeMismatch),
        }
    }

    pub fn add(lhs: Val, rhs: Val) -> Result<Val> {
        if lhs.ty().map(Ty::is_string) == Some(true) && rhs.ty().map(Ty::is_string) == Some(true) {
            return Self::concat(lhs, rhs);
        }
        match join(&lhs, &rhs)? {
            Ty::Int16 => checked(lhs, rhs, i16::checked_add, Val::Int16),
            Ty::Int32 => checked(lhs, rhs, i32::checked_add, Val::Int32),
            Ty::Int64 => checked64(lhs, rhs, i64::checked_add),
            Ty::UInt32 => checked_u32(lhs, rhs, u32::checked_add),
            Ty::Single => float32(lhs, rhs, |a, b| a + b),
            _ => float64(lhs, rhs, |a, b| a + b),
        }
    }

    pub fn subtract(lhs: Val, rhs: Val) -> Result<Val> {
        match join(&lhs, &rhs)? {
            Ty::Int16 => checked(lhs, rhs, i16::checked_sub, Val::Int16),
            Ty::Int32 => checked(lhs, rhs, i32::checked_sub, Val::Int32),
            Ty::Int64 => checked64(lhs, rhs, i64::checked_sub),
            Ty::UInt32 => checked_u32(lhs, rhs, u32::checked_sub),
            Ty::Single => float32(lhs, rhs, |a, b| a - b),
            _ => float64(lhs, rhs, |a, b| a - b),
        }
    }

    pub fn multiply(lhs: Val, rhs: Val) -> Result<Val> {
        match join(&lhs, &rhs)? {
            Ty::Int16 => checked(lhs, rhs, i16::checked_mul, Val::Int16),
            Ty::Int32 => checked(lhs, rhs, i32::checked_mul, Val::Int32),
            Ty::Int64 => checked64(lhs, rhs, i64::checked_mul),
            Ty::UInt32 => checked_u32(lhs, rhs, u32::checked_mul),
            Ty::Single => float32(lhs, rhs, |a, b| a * b),
            _ => float64(lhs, rhs, |a, b| a * b),
        }
    }

    /// `/` always divides in floating point; `1 / 2` is `.5`.
    pub fn divide(lhs: Val, rhs: Val) -> Result<Val> {
        let wide = join(&lhs, &rhs)? == Ty::Double;
        let a = lhs.as_f64()?;
        let b = rhs.as_f64()?;
        if b == 0.0 {
            return Err(TrapKind::DivideByZero);
        }
        if wide {
            Ok(Val::Double(a / b))
        } else {
            Ok(Val::Single((a / b) as f32))
        }
    }

    /// `\` truncates toward zero.
    pub fn int_divide(lhs: Val, rhs: Val) -> Result<Val> {
        let kind = join(&lhs, &rhs)?;
        let a = lhs.as_i64()?;
        let b = rhs.as_i64()?;
        if b == 0 {
            return Err(TrapKind::DivideByZero);
        }
        let q = a.checked_div(b).ok_or(TrapKind::Overflow)?;
        narrow_int(q, kind)
    }

    /// `MOD` takes the sign of the dividend.
    pub fn modulo(lhs: Val, rhs: Val) -> Result<Val> {
        let kind = join(&lhs, &rhs)?;
        let a = lhs.as_i64()?;
        let b = rhs.as_i64()?;
        if b == 0 {
            return Err(TrapKind::DivideByZero);
        }
        let r = a.checked_rem(b).ok_or(TrapKind::Overflow)?;
        narrow_int(r, kind)
    }

    /// `^` is computed in DOUBLE; the destination narrows afterwards.
    pub fn power(lhs: Val, rhs: Val) -> Result<Val> {
        let a = lhs.as_f64()?;
        let b = rhs.as_f64()?;
        Ok(Val::Double(a.powf(b)))
    }

    pub fn concat(lhs: Val, rhs: Val) -> Result<Val> {
        let mut s = lhs.into_string()?;
        s.push_str(rhs.as_str()?);
        Ok(Val::Str(s))
    }

    /// Comparison yields INTEGER true (-1) or false (0).
    pub fn compare(op: CmpOp, lhs: Val, rhs: Val) -> Result<Val> {
        let ordering = match (&lhs, &rhs) {
            (Val::Str(_), _) | (Val::FixedStr(_, _), _) => {
                lhs.as_str()?.cmp(rhs.as_str()?)
            }
            _ => {
                if lhs.ty().map(Ty::is_integer) == Some(true)
                    && rhs.ty().map(Ty::is_integer) == Some(true)
                {
                    lhs.as_i64()?.cmp(&rhs.as_i64()?)
                } else {
                    let a = lhs.as_f64()?;
                    let b = rhs.as_f64()?;
                    a.partial_cmp(&b).ok_or(TrapKind::TypeMismatch)?
                }
            }
        };
        let truth = match op {
            CmpOp::Eq => ordering.is_eq(),
            CmpOp::Ne => ordering.is_ne(),
            CmpOp::Lt => ordering.is_lt(),
            CmpOp::Le => ordering.is_le(),
            CmpOp::Gt => ordering.is_gt(),
            CmpOp::Ge => ordering.is_ge(),
        };
        Ok(Val::Int16(if truth { -1 } else { 0 }))
    }

    /// Bitwise AND; both operands evaluate eagerly, never short-circuit.
    pub fn and(lhs: Val, rhs: Val) -> Result<Val> {
        bitwise(lhs, rhs, |a, b| a & b)
    }

    pub fn or(lhs: Val, rhs: Val) -> Result<Val> {
        bitwise(lhs, rhs, |a, b| a | b)
    }

    pub fn not(val: Val) -> Result<Val> {
        match val {
            Val::Int16(n) => Ok(Val::Int16(!n)),
            Val::Int32(n) => Ok(Val::Int32(!n)),
            Val::Int64(n) => Ok(Val::Int64(!n)),
            Val::UInt32(n) => Ok(Val::UInt32(!n)),
            other => Ok(Val::Int32(!other.as_i64()? as i32)),
        }
    }
}

fn checked<T>(
    lhs: Val,
    rhs: Val,
    op: impl Fn(T, T) -> Option<T>,
    wrap: impl Fn(T) -> Val,
) -> Result<Val>
where
    T: TryFrom<i64>,
{
    let a = T::try_from(lhs.as_i64()?).map_err(|_| TrapKind::Overflow)?;
    let b = T::try_from(rhs.as_i64()?).map_err(|_| TrapKind::Overflow)?;
    op(a, b).map(wrap).ok_or(TrapKind::Overflow)
}

fn checked64(lhs: Val, rhs: Val, op: impl Fn(i64, i64) -> Option<i64>) -> Result<Val> {
    op(lhs.as_i64()?, rhs.as_i64()?)
        .map(Val::Int64)
        .ok_or(TrapKind::Overflow)
}

fn checked_u32(lhs: Val, rhs: Val, op: impl Fn(u32, u32) -> Option<u32>) -> Result<Val> {
    let a = u32::try_from(lhs.as_i64()?).map_err(|_| TrapKind::Overflow)?;
    let b = u32::try_from(rhs.as_i64()?).map_err(|_| TrapKind::Overflow)?;
    op(a, b).map(Val::UInt32).ok_or(TrapKind::Overflow)
}

fn float32(lhs: Val, rhs: Val, op: impl Fn(f32, f32) -> f32) -> Result<Val> {
    Ok(Val::Single(op(lhs.as_f64()? as f32, rhs.as_f64()? as f32)))
}

fn float64(lhs: Val, rhs: Val, op: impl Fn(f64, f64) -> f64) -> Result<Val> {
    Ok(Val::Double(op(lhs.as_f64()?, rhs.as_f64()?)))
}

fn narrow_int(n: i64, kind: Ty) -> Result<Val> {
    match kind {
        Ty::Int16 => i16::try_from(n)
            .map(Val::Int16)
            .map_err(|_| TrapKind::Overflow),
        Ty::UInt32 => u32::try_from(n)
            .map(Val::UInt32)
            .map_err(|_| TrapKind::Overflow),
        Ty::Int64 => Ok(Val::Int64(n)),
        // Singles and doubles land in LONG for the integer operators.
        _ => i32::try_from(n)
            .map(Val::Int32)
            .map_err(|_| TrapKind::Overflow),
    }
}

fn bitwise(lhs: Val, rhs: Val, op: impl Fn(i64, i64) -> i64) -> Result<Val> {
    let kind = join(&lhs, &rhs)?;
    let n = op(lhs.as_i64()?, rhs.as_i64()?);
    narrow_int(n, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_overflow() {
        assert_eq!(
            Operation::add(Val::Int16(i16::MAX), Val::Int16(1)),
            Err(TrapKind::Overflow)
        );
        assert_eq!(
            Operation::add(Val::Int32(1), Val::Int16(1)),
            Ok(Val::Int32(2))
        );
    }

    #[test]
    fn test_divide_is_floating() {
        assert_eq!(
            Operation::divide(Val::Int16(1), Val::Int16(2)),
            Ok(Val::Single(0.5))
        );
        assert_eq!(
            Operation::divide(Val::Int16(1), Val::Int16(0)),
            Err(TrapKind::DivideByZero)
        );
    }

    #[test]
    fn test_int_divide_truncates_toward_zero() {
        assert_eq!(
            Operation::int_divide(Val::Int16(-7), Val::Int16(2)),
            Ok(Val::Int16(-3))
        );
        assert_eq!(
            Operation::int_divide(Val::Int16(7), Val::Int16(2)),
            Ok(Val::Int16(3))
        );
    }

    #[test]
    fn test_mod_sign_follows_dividend() {
        assert_eq!(
            Operation::modulo(Val::Int16(-7), Val::Int16(3)),
            Ok(Val::Int16(-1))
        );
        assert_eq!(
            Operation::modulo(Val::Int16(7), Val::Int16(-3)),
            Ok(Val::Int16(1))
        );
    }

    #[test]
    fn test_power_in_double() {
        assert_eq!(
            Operation::power(Val::Int16(2), Val::Int16(10)),
            Ok(Val::Double(1024.0))
        );
    }

    #[test]
    fn test_string_compare() {
        assert_eq!(
            Operation::compare(
                CmpOp::Lt,
                Val::Str("ABC".to_string()),
                Val::Str("ABD".to_string())
            ),
            Ok(Val::Int16(-1))
        );
    }

    #[test]
    fn test_logic_is_bitwise() {
        assert_eq!(
            Operation::and(Val::Int16(6), Val::Int16(3)),
            Ok(Val::Int16(2))
        );
        assert_eq!(
            Operation::or(Val::Int16(-1), Val::Int16(0)),
            Ok(Val::Int16(-1))
        );
        assert_eq!(Operation::not(Val::Int16(0)).unwrap(), Val::Int16(-1));
    }
}
