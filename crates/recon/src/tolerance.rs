//! Amount comparison in integer minor units.
//!
//! Everything here is pure and works in `i128`, so no product of two `i64`
//! amounts and a divisor power can overflow.

use serde::Serialize;

use crate::config::ToleranceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparison {
    Equal,
    WithinTolerance,
    Mismatch,
}

impl Comparison {
    /// Equal or within tolerance.
    pub fn is_equivalent(self) -> bool {
        !matches!(self, Comparison::Mismatch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    epsilon: i64,
    shift_divisor: i64,
    max_shift_exponent: u32,
}

impl Tolerance {
    pub fn new(epsilon: i64, shift_divisor: i64, max_shift_exponent: u32) -> Self {
        Self {
            epsilon,
            shift_divisor,
            max_shift_exponent,
        }
    }

    pub fn from_config(config: &ToleranceConfig) -> Self {
        Self::new(
            config.amount_epsilon,
            config.shift_divisor,
            config.max_shift_exponent,
        )
    }

    pub fn compare(&self, a: i64, b: i64) -> Comparison {
        if a == b {
            return Comparison::Equal;
        }
        let diff = (a as i128 - b as i128).abs();
        if diff <= self.epsilon as i128 {
            Comparison::WithinTolerance
        } else {
            Comparison::Mismatch
        }
    }

    /// True when `pos` and `processor` differ by a power-of-divisor scaling.
    ///
    /// Amounts that compare as equivalent are never a shift.
    pub fn is_decimal_shift(&self, pos: i64, processor: i64) -> bool {
        if self.compare(pos, processor).is_equivalent() {
            return false;
        }
        let a = pos as i128;
        let b = processor as i128;
        let eps = self.epsilon as i128;
        let within = |scaled: Option<i128>, other: i128| {
            scaled
                .and_then(|s| s.checked_sub(other))
                .map_or(false, |d| d.unsigned_abs() <= eps as u128)
        };
        let mut factor: i128 = 1;
        for _ in 0..self.max_shift_exponent {
            factor = match factor.checked_mul(self.shift_divisor as i128) {
                Some(f) => f,
                None => break,
            };
            if within(b.checked_mul(factor), a) || within(a.checked_mul(factor), b) {
                return true;
            }
        }
        false
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::from_config(&ToleranceConfig::default())
    }
}
