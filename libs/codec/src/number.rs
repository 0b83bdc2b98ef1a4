//! Arbitrary precision numbers
//!
//! Integers are always stored in the narrowest variant that holds them
//! exactly: `I32`, then `I64`, then `Big`. Constructors normalise, so two
//! integers with the same value compare equal regardless of how they were
//! built. Anything written with a decimal point or exponent becomes a
//! `Decimal` keyed by `(unscaled, scale)`, meaning `unscaled × 10^-scale`.
//! Decimal equality is structural: `1.50` and `1.5` are different values.

use crate::constants::NAN_LITERAL;
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive};
use std::fmt;

/// Decoded numeric value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Number {
    I32(i32),
    I64(i64),
    Big(BigInt),
    Decimal { unscaled: BigInt, scale: i32 },
    /// `NaN` float sentinel
    NaN,
}

impl Number {
    /// Integer in its narrowest representation
    pub fn from_i64(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(small) => Self::I32(small),
            Err(_) => Self::I64(value),
        }
    }

    /// Integer in its narrowest representation
    pub fn from_big(value: BigInt) -> Self {
        match value.to_i64() {
            Some(fits) => Self::from_i64(fits),
            None => Self::Big(value),
        }
    }

    pub fn decimal(unscaled: impl Into<BigInt>, scale: i32) -> Self {
        Self::Decimal {
            unscaled: unscaled.into(),
            scale,
        }
    }

    /// Convert a float through its shortest round-trip representation.
    ///
    /// Returns `None` for infinities, which have no wire form.
    pub fn from_f64(value: f64) -> Option<Self> {
        if value.is_nan() {
            return Some(Self::NaN);
        }
        if !value.is_finite() {
            return None;
        }
        // Debug always includes a fraction or exponent ("3.0", "1e-7")
        Self::parse_literal(&format!("{value:?}"))
    }

    /// Parse a literal following the wire number grammar
    ///
    /// `['-'] digits ['.' digits] [('e'|'E') ['+'|'-'] digits] | 'NaN'`
    pub fn parse_literal(literal: &str) -> Option<Self> {
        if literal == NAN_LITERAL {
            return Some(Self::NaN);
        }

        let (negative, body) = match literal.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, literal),
        };

        let (mantissa, exponent) = match body.find(['e', 'E']) {
            Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
            None => (body, None),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((int_part, frac)) => (int_part, Some(frac)),
            None => (mantissa, None),
        };

        if !is_digits(int_part) {
            return None;
        }
        if let Some(frac) = frac_part {
            if !is_digits(frac) {
                return None;
            }
        }

        let exponent = match exponent {
            Some(exp) => {
                let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
                if !is_digits(digits) {
                    return None;
                }
                Some(exp.parse::<i64>().ok()?)
            }
            None => None,
        };

        if frac_part.is_none() && exponent.is_none() {
            if let Ok(small) = literal.parse::<i64>() {
                return Some(Self::from_i64(small));
            }
            let magnitude = BigInt::parse_bytes(int_part.as_bytes(), 10)?;
            return Some(Self::from_big(if negative { -magnitude } else { magnitude }));
        }

        let frac = frac_part.unwrap_or("");
        let mut digits = String::with_capacity(int_part.len() + frac.len());
        digits.push_str(int_part);
        digits.push_str(frac);
        let magnitude = BigInt::parse_bytes(digits.as_bytes(), 10)?;

        let scale = i64::try_from(frac.len()).ok()? - exponent.unwrap_or(0);
        let scale = i32::try_from(scale).ok()?;

        Some(Self::Decimal {
            unscaled: if negative { -magnitude } else { magnitude },
            scale,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::I32(_) | Self::I64(_) | Self::Big(_))
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::I32(v) => u64::try_from(*v).ok(),
            Self::I64(v) => u64::try_from(*v).ok(),
            Self::Big(v) => v.to_u64(),
            _ => None,
        }
    }

    pub fn as_big(&self) -> Option<BigInt> {
        match self {
            Self::I32(v) => Some(BigInt::from(*v)),
            Self::I64(v) => Some(BigInt::from(*v)),
            Self::Big(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Lossy conversion for display and arithmetic by callers
    pub fn to_f64(&self) -> f64 {
        match self {
            Self::I32(v) => f64::from(*v),
            Self::I64(v) => *v as f64,
            Self::Big(v) => v.to_f64().unwrap_or(f64::NAN),
            Self::Decimal { .. } => self.to_string().parse().unwrap_or(f64::NAN),
            Self::NaN => f64::NAN,
        }
    }
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::Big(v) => write!(f, "{v}"),
            Self::NaN => f.write_str(NAN_LITERAL),
            Self::Decimal { unscaled, scale } if *scale > 0 => {
                // scale > 0 so the conversion cannot fail
                let scale = usize::try_from(*scale).unwrap_or(usize::MAX);
                let mut digits = unscaled.abs().to_string();
                if digits.len() <= scale {
                    let pad = scale + 1 - digits.len();
                    digits.insert_str(0, &"0".repeat(pad));
                }
                let point = digits.len() - scale;
                if unscaled.sign() == Sign::Minus {
                    f.write_str("-")?;
                }
                write!(f, "{}.{}", &digits[..point], &digits[point..])
            }
            // Non-positive scale keeps an exponent so the value re-decodes
            // to the same (unscaled, scale) pair instead of an integer
            Self::Decimal { unscaled, scale } => {
                write!(f, "{unscaled}E{}", -i64::from(*scale))
            }
        }
    }
}

macro_rules! number_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Number {
            fn from(value: $t) -> Self {
                Self::from_i64(i64::from(value))
            }
        })*
    };
}

number_from_signed!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => Self::from_i64(v),
            Err(_) => Self::Big(BigInt::from(value)),
        }
    }
}

impl From<usize> for Number {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<i128> for Number {
    fn from(value: i128) -> Self {
        Self::from_big(BigInt::from(value))
    }
}

impl From<BigInt> for Number {
    fn from(value: BigInt) -> Self {
        Self::from_big(value)
    }
}
