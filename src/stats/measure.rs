//! Measure: a value carried together with its uncertainty
//!
//! The number of significant digits shown for a value follows from the gap
//! between the decimal order of the value and that of its error, so that a
//! latency of `1.0537 ms +/- 0.0021 ms` is never printed as `1.053712894`.

use std::fmt;

/// Significant digits kept on an error.
pub const DEFAULT_ERROR_PRECISION: i32 = 2;
/// Significant digits kept on a value that has no error attached.
pub const DEFAULT_PRECISION: i32 = 3;
/// An f64 cannot carry more significant decimal digits than this.
pub const MAX_PRECISION: i32 = 17;

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    value: f64,
    error: f64,
    unit: String,
    precision: i32,
    error_precision: i32,
}

impl Measure {
    /// Measure with an error. The error is taken in absolute value; a
    /// non-finite error is treated as no error at all.
    pub fn new(value: f64, error: f64, unit: impl Into<String>) -> Self {
        let error = if error.is_finite() { error.abs() } else { 0.0 };
        let precision = if error > 0.0 && value.is_finite() && value != 0.0 {
            (signed_digits(value.abs()) - signed_digits(error) + 1).clamp(1, MAX_PRECISION)
        } else {
            DEFAULT_PRECISION
        };

        Self {
            value,
            error,
            unit: unit.into(),
            precision,
            error_precision: DEFAULT_ERROR_PRECISION,
        }
    }

    /// Measure whose error never falls below `floor`.
    pub fn floored(value: f64, error: f64, floor: f64, unit: impl Into<String>) -> Self {
        let error = if error.is_finite() { error.abs() } else { 0.0 };
        Self::new(value, error.max(floor), unit)
    }

    /// Exact quantity (counts, dimensionless diagnostics).
    pub fn exact(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            error: 0.0,
            unit: unit.into(),
            precision: DEFAULT_PRECISION,
            error_precision: 0,
        }
    }

    /// Value rounded to its significant digits.
    pub fn value(&self) -> f64 {
        round_significant(self.value, self.precision)
    }

    /// Error rounded to its significant digits, 0 when there is none.
    pub fn error(&self) -> f64 {
        if self.error > 0.0 {
            round_significant(self.error, self.error_precision)
        } else {
            0.0
        }
    }

    /// `|error / value|`, or 0 when either side is zero.
    pub fn relerr(&self) -> f64 {
        let value = self.value();
        if self.error > 0.0 && value != 0.0 && value.is_finite() {
            (self.error() / value).abs()
        } else {
            0.0
        }
    }

    pub fn raw_value(&self) -> f64 {
        self.value
    }

    pub fn raw_error(&self) -> f64 {
        self.error
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn precision(&self) -> i32 {
        self.precision
    }

    pub fn error_precision(&self) -> i32 {
        self.error_precision
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} +/- {}",
            format_significant(self.value(), self.precision),
            self.unit,
            format_significant(self.error(), self.error_precision)
        )
    }
}

/// Print `n` with `digits` significant digits. Fixed notation for orders of
/// magnitude between 1e-4 and 1e15, scientific otherwise.
pub fn format_significant(n: f64, digits: i32) -> String {
    if !n.is_finite() || n == 0.0 {
        return "0".to_string();
    }
    let digits = digits.clamp(1, MAX_PRECISION);
    // digits before the decimal point, 10^k counted as k + 1
    let integer_digits = n.abs().log10().floor() as i32 + 1;
    if (-3..=15).contains(&integer_digits) {
        let decimals = (digits - integer_digits).max(0) as usize;
        format!("{:.*}", decimals, n)
    } else {
        format!("{:.*e}", (digits - 1) as usize, n)
    }
}

/// Decimal order of magnitude: `ceil(log10(|n|))`, 0 for 0 and non-finite input.
pub fn decimal_order(n: f64) -> i32 {
    if n.is_finite() && n != 0.0 {
        n.abs().log10().ceil() as i32
    } else {
        0
    }
}

/// `ceil(|log10 n|)` carrying the sign of `log10 n`. Defined as 0 for n <= 0.
fn signed_digits(n: f64) -> i32 {
    if !(n.is_finite() && n > 0.0) {
        return 0;
    }
    let l = n.log10();
    (l.abs().ceil() * l.signum()) as i32
}

/// Keep `digits` significant digits of `n`.
///
/// Zero is returned unchanged and non-finite input maps to 0.
pub fn round_significant(n: f64, digits: i32) -> f64 {
    if !n.is_finite() {
        return 0.0;
    }
    if n == 0.0 {
        return n;
    }

    let shift = digits.clamp(1, MAX_PRECISION) - decimal_order(n);
    // a negative power of ten is inexact, so scale down by dividing instead
    let rounded = if shift >= 0 {
        let factor = 10f64.powi(shift);
        (n * factor).round() / factor
    } else {
        let factor = 10f64.powi(-shift);
        (n / factor).round() * factor
    };

    if rounded.is_finite() {
        rounded
    } else {
        n
    }
}
