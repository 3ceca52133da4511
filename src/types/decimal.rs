use std::{fmt, str::FromStr};

use thiserror::Error;

/// Widest precision a [`Decimal`] can carry; the unscaled value is an `i128`.
pub const MAX_PRECISION: u8 = 38;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("invalid decimal literal '{0}'")]
    Invalid(String),

    #[error("decimal scale {0} exceeds the maximum of {MAX_PRECISION}")]
    Scale(i64),

    #[error("decimal value does not fit in {MAX_PRECISION} digits")]
    Overflow,
}

/// Fixed-point number stored as an unscaled integer and a base-10 scale.
///
/// `Decimal::new(12345, 2)` is `123.45`. Equality is structural, so `1.50`
/// and `1.5` are different values; this is what keeps the textual form
/// stable across an encode/decode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    unscaled: i128,
    scale: u8,
}

impl Decimal {
    pub fn new(unscaled: i128, scale: u8) -> Result<Self, DecimalError> {
        if scale > MAX_PRECISION {
            return Err(DecimalError::Scale(scale.into()));
        }
        Ok(Self { unscaled, scale })
    }

    pub fn unscaled(&self) -> i128 {
        self.unscaled
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Number of significant base-10 digits in the unscaled value.
    pub fn digits(&self) -> u8 {
        let mut n = self.unscaled.unsigned_abs();
        let mut digits = 1;
        while n >= 10 {
            n /= 10;
            digits += 1;
        }
        digits
    }

    /// Whether the value can be stored in a `DECIMAL(precision, scale)`
    /// column with this value's scale.
    pub fn fits(&self, precision: u8) -> bool {
        self.unscaled == 0 || self.digits() <= precision
    }

    /// Re-express the value with a different scale, rounding half away from
    /// zero when digits are dropped.
    pub fn rescale(&self, scale: u8) -> Option<Self> {
        if scale > MAX_PRECISION {
            return None;
        }
        let unscaled = if scale >= self.scale {
            let factor = pow10(scale - self.scale)?;
            self.unscaled.checked_mul(factor)?
        } else {
            let factor = pow10(self.scale - scale)?;
            let quotient = self.unscaled / factor;
            let remainder = (self.unscaled % factor).unsigned_abs();
            if remainder * 2 >= factor.unsigned_abs() {
                quotient.checked_add(self.unscaled.signum())?
            } else {
                quotient
            }
        };
        Some(Self { unscaled, scale })
    }

    /// Integer value, if the fractional part is zero.
    pub fn to_integer(&self) -> Option<i128> {
        let factor = pow10(self.scale)?;
        if self.unscaled % factor == 0 {
            Some(self.unscaled / factor)
        } else {
            None
        }
    }

    pub fn to_f64(&self) -> f64 {
        // Going through the text form avoids compounding rounding errors.
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        value.to_string().parse().ok()
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self {
            unscaled: value.into(),
            scale: 0,
        }
    }
}

fn pow10(exp: u8) -> Option<i128> {
    10i128.checked_pow(exp.into())
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecimalError::Invalid(s.to_string());
        let text = s.trim();

        let (mantissa, exponent) = match text.find(['e', 'E']) {
            Some(at) => {
                let exp = text[at + 1..].parse::<i64>().map_err(|_| invalid())?;
                (&text[..at], exp)
            }
            None => (text, 0),
        };

        let (negative, digits) = match mantissa.as_bytes().first() {
            Some(b'-') => (true, &mantissa[1..]),
            Some(b'+') => (false, &mantissa[1..]),
            _ => (false, mantissa),
        };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut unscaled: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            unscaled = unscaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(b - b'0')))
                .ok_or(DecimalError::Overflow)?;
        }
        if negative {
            unscaled = -unscaled;
        }

        let mut scale = frac_part.len() as i64 - exponent;
        if scale < 0 {
            let factor = u8::try_from(-scale)
                .ok()
                .and_then(pow10)
                .ok_or(DecimalError::Overflow)?;
            unscaled = unscaled.checked_mul(factor).ok_or(DecimalError::Overflow)?;
            scale = 0;
        }
        if scale > i64::from(MAX_PRECISION) {
            return Err(DecimalError::Scale(scale));
        }

        Ok(Self {
            unscaled,
            scale: scale as u8,
        })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.unscaled.unsigned_abs().to_string();
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let scale = self.scale as usize;

        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{sign}{int_part}.{frac_part}")
        } else {
            write!(f, "{sign}0.{digits:0>scale$}")
        }
    }
}
