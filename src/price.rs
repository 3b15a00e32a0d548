//! Fixed-point price representation.
//!
//! The wire format already delivers prices as integer hundredths of the quote
//! currency (Kite sends paise). We keep them that way end to end and only
//! convert to a decimal string at the render boundary, so no tick decode,
//! snapshot diff, or alert-threshold comparison ever touches a float.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Price(pub i64);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Build a `Price` directly from the raw big-endian i32 the wire sends;
    /// it is already hundredths, so no scaling happens here.
    pub fn from_wire(raw: i32) -> Self {
        Price(raw as i64)
    }

    pub fn hundredths(self) -> i64 {
        self.0
    }

    pub fn sub(self, other: Price) -> Price {
        Price(self.0 - other.0)
    }

    /// Percentage change of `self` relative to `base`, as `100*(self-base)/base`.
    /// Returns `None` when `base` is zero (undefined).
    pub fn pct_change_from(self, base: Price) -> Option<f64> {
        if base.0 == 0 {
            return None;
        }
        Some(100.0 * (self.0 - base.0) as f64 / base.0 as f64)
    }

    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let whole = abs / 100;
        let frac = abs % 100;
        if negative {
            write!(f, "-{whole}.{frac:02}")
        } else {
            write!(f, "{whole}.{frac:02}")
        }
    }
}
