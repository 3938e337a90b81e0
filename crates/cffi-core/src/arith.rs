//! C arithmetic on 64-bit promoted operands.
//!
//! Every binary operation first promotes both operands: `long` collapses
//! into `long long` where the two have the same width, an `unsigned long
//! long` on either side makes the whole expression unsigned, and everything
//! else widens to signed 64 bits. Floating operands truncate toward zero.
//! Arithmetic wraps on overflow.

use crate::ctype::Primitive;
use crate::errors::{FfiError, Result};

/// A raw scalar value as read from native memory or a host number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(i) => i,
            Scalar::UInt(u) => u as i64,
            Scalar::Float(f) => f as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Scalar::Int(i) => i as u64,
            Scalar::UInt(u) => u,
            Scalar::Float(f) if f < 0.0 => f as i64 as u64,
            Scalar::Float(f) => f as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(i) => i as f64,
            Scalar::UInt(u) => u as f64,
            Scalar::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Scalar::Int(i) => i == 0,
            Scalar::UInt(u) => u == 0,
            Scalar::Float(f) => f == 0.0,
        }
    }
}

/// The type tag an operand carries through an expression, after integer
/// promotion of the narrow types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    Int,
    UInt,
    Long,
    ULong,
    LLong,
    ULLong,
    Float,
    Double,
}

impl ExprType {
    pub fn from_primitive(p: Primitive) -> ExprType {
        match p {
            Primitive::Bool
            | Primitive::Char
            | Primitive::SChar
            | Primitive::UChar
            | Primitive::Short
            | Primitive::UShort
            | Primitive::Int => ExprType::Int,
            Primitive::UInt => ExprType::UInt,
            Primitive::Long => ExprType::Long,
            Primitive::ULong => ExprType::ULong,
            Primitive::LLong => ExprType::LLong,
            Primitive::ULLong => ExprType::ULLong,
            Primitive::Float => ExprType::Float,
            Primitive::Double => ExprType::Double,
        }
    }

    pub fn primitive(self) -> Primitive {
        match self {
            ExprType::Int => Primitive::Int,
            ExprType::UInt => Primitive::UInt,
            ExprType::Long => Primitive::Long,
            ExprType::ULong => Primitive::ULong,
            ExprType::LLong => Primitive::LLong,
            ExprType::ULLong => Primitive::ULLong,
            ExprType::Float => Primitive::Float,
            ExprType::Double => Primitive::Double,
        }
    }

    fn promote_long(self, collapse_long: bool) -> ExprType {
        match self {
            ExprType::Long if collapse_long => ExprType::LLong,
            ExprType::ULong if collapse_long => ExprType::ULLong,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Operand {
    pub ty: ExprType,
    pub val: Scalar,
}

impl Operand {
    pub fn new(ty: ExprType, val: Scalar) -> Self {
        Operand { ty, val }
    }

    /// A host integer, which behaves like a `long long`
    pub fn host_integer(i: i64) -> Self {
        Operand::new(ExprType::LLong, Scalar::Int(i))
    }

    /// A host float, which behaves like a `double`
    pub fn host_number(n: f64) -> Self {
        Operand::new(ExprType::Double, Scalar::Float(n))
    }

    /// Widen to 64 bits: `unsigned long long` stays unsigned, everything
    /// else becomes `long long`
    pub fn promote_unary(self, collapse_long: bool) -> Operand {
        match self.ty.promote_long(collapse_long) {
            ExprType::ULLong => Operand::new(ExprType::ULLong, Scalar::UInt(self.val.as_u64())),
            _ => Operand::new(ExprType::LLong, Scalar::Int(self.val.as_i64())),
        }
    }
}

/// Bring two operands to a common 64-bit type
pub fn promote(lhs: Operand, rhs: Operand, collapse_long: bool) -> (Operand, Operand) {
    let lt = lhs.ty.promote_long(collapse_long);
    let rt = rhs.ty.promote_long(collapse_long);
    if lt == ExprType::ULLong || rt == ExprType::ULLong {
        (
            Operand::new(ExprType::ULLong, Scalar::UInt(lhs.val.as_u64())),
            Operand::new(ExprType::ULLong, Scalar::UInt(rhs.val.as_u64())),
        )
    } else {
        (
            Operand::new(ExprType::LLong, Scalar::Int(lhs.val.as_i64())),
            Operand::new(ExprType::LLong, Scalar::Int(rhs.val.as_i64())),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
}

fn pow_signed(mut base: i64, mut exp: i64) -> i64 {
    if exp < 0 {
        return 0;
    }
    let mut ret: i64 = 1;
    loop {
        if exp & 1 != 0 {
            ret = ret.wrapping_mul(base);
        }
        exp >>= 1;
        if exp == 0 {
            break;
        }
        base = base.wrapping_mul(base);
    }
    ret
}

fn pow_unsigned(mut base: u64, mut exp: u64) -> u64 {
    let mut ret: u64 = 1;
    loop {
        if exp & 1 != 0 {
            ret = ret.wrapping_mul(base);
        }
        exp >>= 1;
        if exp == 0 {
            break;
        }
        base = base.wrapping_mul(base);
    }
    ret
}

fn division_by_zero() -> FfiError {
    FfiError::Arithmetic("division by zero".to_string())
}

/// Evaluate a binary operator. The result type is the promoted type, or
/// the promoted left type for shifts.
pub fn eval_binary(op: BinOp, lhs: Operand, rhs: Operand, collapse_long: bool) -> Result<Operand> {
    if matches!(op, BinOp::Shl | BinOp::Shr) {
        let lhs = lhs.promote_unary(collapse_long);
        let count = (rhs.promote_unary(collapse_long).val.as_u64() & 63) as u32;
        let val = match (op, lhs.val) {
            (BinOp::Shl, Scalar::Int(a)) => Scalar::Int(a.wrapping_shl(count)),
            (BinOp::Shl, v) => Scalar::UInt(v.as_u64().wrapping_shl(count)),
            (_, Scalar::Int(a)) => Scalar::Int(a.wrapping_shr(count)),
            (_, v) => Scalar::UInt(v.as_u64().wrapping_shr(count)),
        };
        return Ok(Operand::new(lhs.ty, val));
    }

    let (lhs, rhs) = promote(lhs, rhs, collapse_long);
    let val = match (lhs.val, rhs.val) {
        (Scalar::UInt(a), Scalar::UInt(b)) => Scalar::UInt(match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div | BinOp::IDiv => a.checked_div(b).ok_or_else(division_by_zero)?,
            BinOp::Mod => a.checked_rem(b).ok_or_else(division_by_zero)?,
            BinOp::Pow => pow_unsigned(a, b),
            BinOp::BAnd => a & b,
            BinOp::BOr => a | b,
            BinOp::BXor => a ^ b,
            BinOp::Shl | BinOp::Shr => unreachable!("shifts are handled above"),
        }),
        (a, b) => {
            let (a, b) = (a.as_i64(), b.as_i64());
            Scalar::Int(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div | BinOp::IDiv => {
                    if b == 0 {
                        return Err(division_by_zero());
                    }
                    a.wrapping_div(b)
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err(division_by_zero());
                    }
                    a.wrapping_rem(b)
                }
                BinOp::Pow => pow_signed(a, b),
                BinOp::BAnd => a & b,
                BinOp::BOr => a | b,
                BinOp::BXor => a ^ b,
                BinOp::Shl | BinOp::Shr => unreachable!("shifts are handled above"),
            })
        }
    };
    Ok(Operand::new(lhs.ty, val))
}

pub fn eval_unary(op: UnOp, operand: Operand, collapse_long: bool) -> Operand {
    let operand = operand.promote_unary(collapse_long);
    let val = match (op, operand.val) {
        (UnOp::Neg, Scalar::Int(a)) => Scalar::Int(a.wrapping_neg()),
        (UnOp::Neg, v) => Scalar::UInt(v.as_u64().wrapping_neg()),
        (UnOp::BNot, Scalar::Int(a)) => Scalar::Int(!a),
        (UnOp::BNot, v) => Scalar::UInt(!v.as_u64()),
    };
    Operand::new(operand.ty, val)
}

pub fn compare(op: CmpOp, lhs: Operand, rhs: Operand, collapse_long: bool) -> bool {
    let (lhs, rhs) = promote(lhs, rhs, collapse_long);
    match (lhs.val, rhs.val) {
        (Scalar::UInt(a), Scalar::UInt(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
        },
        (a, b) => {
            let (a, b) = (a.as_i64(), b.as_i64());
            match op {
                CmpOp::Eq => a == b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
            }
        }
    }
}
