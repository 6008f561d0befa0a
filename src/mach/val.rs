use super::trap::TrapKind;
use crate::lang::ast::Ty;
use crate::lang::RecordDef;

type Result<T> = std::result::Result<T, TrapKind>;

/// A runtime value. Slots carry a compile-time type, so most transitions
/// are monomorphic; the tag is still checked on every operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    Single(f32),
    Double(f64),
    Str(String),
    FixedStr(u16, String),
    Record(u16, Vec<Val>),
    Array(Array),
    /// Uninitialized slot sentinel; reads replace it with the slot
    /// type's default.
    Empty,
}

impl Default for Val {
    fn default() -> Val {
        Val::Empty
    }
}

/// Contiguous row-major array storage with inclusive per-dimension bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub elem: Ty,
    pub bounds: Vec<(i32, i32)>,
    pub data: Vec<Val>,
}

impl Array {
    pub fn new(elem: Ty, bounds: Vec<(i32, i32)>, records: &[RecordDef]) -> Result<Array> {
        let mut len = 1usize;
        for &(lo, hi) in &bounds {
            if hi < lo {
                return Err(TrapKind::BoundsViolation);
            }
            len = len
                .checked_mul((hi - lo) as usize + 1)
                .ok_or(TrapKind::Overflow)?;
        }
        if len > 16 * 1024 * 1024 {
            return Err(TrapKind::Overflow);
        }
        let fill = default_val(elem, records);
        Ok(Array {
            elem,
            bounds,
            data: vec![fill; len],
        })
    }

    /// Row-major flat offset, bounds-checked.
    pub fn offset(&self, indices: &[i64]) -> Result<usize> {
        if indices.len() != self.bounds.len() {
            return Err(TrapKind::BoundsViolation);
        }
        let mut flat = 0usize;
        for (&index, &(lo, hi)) in indices.iter().zip(&self.bounds) {
            if index < lo as i64 || index > hi as i64 {
                return Err(TrapKind::BoundsViolation);
            }
            let width = (hi - lo) as usize + 1;
            flat = flat * width + (index - lo as i64) as usize;
        }
        Ok(flat)
    }
}

/// The default value a slot of type `ty` holds before assignment.
pub fn default_val(ty: Ty, records: &[RecordDef]) -> Val {
    match ty {
        Ty::Int16 => Val::Int16(0),
        Ty::Int32 => Val::Int32(0),
        Ty::Int64 => Val::Int64(0),
        Ty::UInt32 => Val::UInt32(0),
        Ty::Single => Val::Single(0.0),
        Ty::Double => Val::Double(0.0),
        Ty::Str => Val::Str(String::new()),
        Ty::FixedStr(n) => Val::FixedStr(n, " ".repeat(n as usize)),
        Ty::Record(id) => {
            let def = &records[id as usize];
            let fields = def
                .fields
                .iter()
                .map(|f| default_val(f.ty, records))
                .collect();
            Val::Record(id, fields)
        }
    }
}

/// Round-to-nearest-even, the narrowing rule for implicit assignments.
fn round_even(x: f64) -> f64 {
    let floor = x.floor();
    let diff = x - floor;
    if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

impl Val {
    pub fn ty(&self) -> Option<Ty> {
        match self {
            Val::Int16(_) => Some(Ty::Int16),
            Val::Int32(_) => Some(Ty::Int32),
            Val::Int64(_) => Some(Ty::Int64),
            Val::UInt32(_) => Some(Ty::UInt32),
            Val::Single(_) => Some(Ty::Single),
            Val::Double(_) => Some(Ty::Double),
            Val::Str(_) => Some(Ty::Str),
            Val::FixedStr(n, _) => Some(Ty::FixedStr(*n)),
            Val::Record(id, _) => Some(Ty::Record(*id)),
            Val::Array(_) | Val::Empty => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Val::Int16(_)
                | Val::Int32(_)
                | Val::Int64(_)
                | Val::UInt32(_)
                | Val::Single(_)
                | Val::Double(_)
        )
    }

    pub fn truthy(&self) -> Result<bool> {
        match self {
            Val::Int16(n) => Ok(*n != 0),
            Val::Int32(n) => Ok(*n != 0),
            Val::Int64(n) => Ok(*n != 0),
            Val::UInt32(n) => Ok(*n != 0),
            Val::Single(n) => Ok(*n != 0.0),
            Val::Double(n) => Ok(*n != 0.0),
            _ => Err(TrapKind::TypeMismatch),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Val::Int16(n) => Ok(*n as f64),
            Val::Int32(n) => Ok(*n as f64),
            Val::Int64(n) => Ok(*n as f64),
            Val::UInt32(n) => Ok(*n as f64),
            Val::Single(n) => Ok(*n as f64),
            Val::Double(n) => Ok(*n),
            _ => Err(TrapKind::TypeMismatch),
        }
    }

    /// Integer view, rounding floats half-to-even; `Overflow` outside i64.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Val::Int16(n) => Ok(*n as i64),
            Val::Int32(n) => Ok(*n as i64),
            Val::Int64(n) => Ok(*n),
            Val::UInt32(n) => Ok(*n as i64),
            Val::Single(n) => float_to_i64(*n as f64),
            Val::Double(n) => float_to_i64(*n),
            _ => Err(TrapKind::TypeMismatch),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Val::Str(s) => Ok(s),
            Val::FixedStr(_, s) => Ok(s),
            _ => Err(TrapKind::TypeMismatch),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Val::Str(s) => Ok(s),
            Val::FixedStr(_, s) => Ok(s),
            _ => Err(TrapKind::TypeMismatch),
        }
    }

    /// Convert to `ty`, applying the implicit-assignment rules: numeric
    /// widening is lossless, narrowing rounds half-to-even and traps on
    /// overflow, fixed strings pad or truncate.
    pub fn coerce_to(self, ty: Ty) -> Result<Val> {
        if self.ty() == Some(ty) {
            return Ok(self);
        }
        match ty {
            Ty::Int16 => {
                let n = self.as_i64()?;
                i16::try_from(n)
                    .map(Val::Int16)
                    .map_err(|_| TrapKind::Overflow)
            }
            Ty::Int32 => {
                let n = self.as_i64()?;
                i32::try_from(n)
                    .map(Val::Int32)
                    .map_err(|_| TrapKind::Overflow)
            }
            Ty::Int64 => match self {
                Val::UInt32(n) => Ok(Val::Int64(n as i64)),
                other => other.as_i64().map(Val::Int64),
            },
            Ty::UInt32 => {
                let n = self.as_i64()?;
                u32::try_from(n)
                    .map(Val::UInt32)
                    .map_err(|_| TrapKind::Overflow)
            }
            Ty::Single => {
                let n = self.as_f64()?;
                if n.is_finite() && n.abs() > f32::MAX as f64 {
                    return Err(TrapKind::Overflow);
                }
                Ok(Val::Single(n as f32))
            }
            Ty::Double => Ok(Val::Double(self.as_f64()?)),
            Ty::Str => self.into_string().map(Val::Str),
            Ty::FixedStr(len) => {
                let mut s = self.into_string()?;
                let len_usize = len as usize;
                if s.len() > len_usize {
                    s.truncate(len_usize);
                } else {
                    while s.len() < len_usize {
                        s.push(' ');
                    }
                }
                Ok(Val::FixedStr(len, s))
            }
            Ty::Record(_) => Err(TrapKind::TypeMismatch),
        }
    }

    /// PRINT rendering: numbers carry a leading space when non-negative
    /// and always a trailing space; strings print verbatim.
    pub fn print_form(&self) -> Result<String> {
        Ok(match self {
            Val::Str(s) => s.clone(),
            Val::FixedStr(_, s) => s.clone(),
            other => {
                let body = other.number_form()?;
                if body.starts_with('-') {
                    format!("{} ", body)
                } else {
                    format!(" {} ", body)
                }
            }
        })
    }

    /// WRITE rendering: strings quoted, numbers bare.
    pub fn write_form(&self) -> Result<String> {
        Ok(match self {
            Val::Str(s) => format!("\"{}\"", s),
            Val::FixedStr(_, s) => format!("\"{}\"", s),
            other => other.number_form()?,
        })
    }

    /// Canonical text for a number; integers never switch to exponent
    /// notation.
    pub fn number_form(&self) -> Result<String> {
        Ok(match self {
            Val::Int16(n) => n.to_string(),
            Val::Int32(n) => n.to_string(),
            Val::Int64(n) => n.to_string(),
            Val::UInt32(n) => n.to_string(),
            Val::Single(n) => n.to_string(),
            Val::Double(n) => n.to_string(),
            _ => return Err(TrapKind::TypeMismatch),
        })
    }
}

fn float_to_i64(x: f64) -> Result<i64> {
    if !x.is_finite() {
        return Err(TrapKind::Overflow);
    }
    let rounded = round_even(x);
    if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return Err(TrapKind::Overflow);
    }
    Ok(rounded as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even_narrowing() {
        assert_eq!(
            Val::Double(2.5).coerce_to(Ty::Int16).unwrap(),
            Val::Int16(2)
        );
        assert_eq!(
            Val::Double(3.5).coerce_to(Ty::Int16).unwrap(),
            Val::Int16(4)
        );
        assert_eq!(
            Val::Double(-2.5).coerce_to(Ty::Int16).unwrap(),
            Val::Int16(-2)
        );
    }

    #[test]
    fn test_narrowing_overflow() {
        assert_eq!(
            Val::Int32(40000).coerce_to(Ty::Int16),
            Err(TrapKind::Overflow)
        );
        assert_eq!(
            Val::Int64(-1).coerce_to(Ty::UInt32),
            Err(TrapKind::Overflow)
        );
    }

    #[test]
    fn test_fixed_string_pads_and_truncates() {
        assert_eq!(
            Val::Str("AB".to_string()).coerce_to(Ty::FixedStr(4)).unwrap(),
            Val::FixedStr(4, "AB  ".to_string())
        );
        assert_eq!(
            Val::Str("ABCDEF".to_string())
                .coerce_to(Ty::FixedStr(3))
                .unwrap(),
            Val::FixedStr(3, "ABC".to_string())
        );
    }

    #[test]
    fn test_print_form() {
        assert_eq!(Val::Int16(2).print_form().unwrap(), " 2 ");
        assert_eq!(Val::Int16(-4).print_form().unwrap(), "-4 ");
        assert_eq!(Val::Single(1.5).print_form().unwrap(), " 1.5 ");
        assert_eq!(
            Val::Str("hi".to_string()).print_form().unwrap(),
            "hi".to_string()
        );
    }

    #[test]
    fn test_array_offsets() {
        let arr = Array::new(Ty::Int16, vec![(0, 2), (0, 3)], &[]).unwrap();
        assert_eq!(arr.data.len(), 12);
        assert_eq!(arr.offset(&[0, 0]).unwrap(), 0);
        assert_eq!(arr.offset(&[1, 0]).unwrap(), 4);
        assert_eq!(arr.offset(&[2, 3]).unwrap(), 11);
        assert_eq!(arr.offset(&[3, 0]), Err(TrapKind::BoundsViolation));
    }
}
