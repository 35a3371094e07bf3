use crate::currency::Unit;
use primitive_types::U256;
use std::{
    cmp::Ordering,
    fmt::{Display, Error, Formatter},
    sync::Arc,
};

// Largest double that still fits a 256-bit magnitude
const F64_OVERFLOW_BOUND: f64 = 1.157920892373162e77;

// A signed 256-bit quantity of some currency, always accounted in base
// units, displayed in whatever unit it was created with. Immutable;
// arithmetic returns fresh amounts and fails (None) on unit mismatch or
// overflow, matching how callers probe rather than panic.
#[derive(Debug, Clone)]
pub struct Amount {
    value: U256,
    negative: bool,
    unit: Arc<Unit>,
}

impl Amount {
    // `value` is denominated in base units
    pub fn from_base(unit: &Arc<Unit>, value: impl Into<U256>) -> Self {
        Self {
            value: value.into(),
            negative: false,
            unit: Arc::clone(unit),
        }
    }

    pub fn from_base_signed(unit: &Arc<Unit>, value: U256, negative: bool) -> Self {
        Self {
            // Zero has no sign
            negative: negative && !value.is_zero(),
            value,
            unit: Arc::clone(unit),
        }
    }

    pub fn zero(unit: &Arc<Unit>) -> Self {
        Self::from_base(unit, 0u64)
    }

    // `value` is denominated in `unit` itself, so a unit with decimal
    // offset 8 scales it by 10^8 base units
    pub fn from_integer(unit: &Arc<Unit>, value: u64) -> Option<Self> {
        let scale = U256::from(10u64).checked_pow(U256::from(unit.decimals()))?;
        let base = U256::from(value).checked_mul(scale)?;
        Some(Self::from_base(unit, base))
    }

    // Doubles lose precision against base units by design; the value is
    // truncated to the base-unit grid. Fails on non-finite input and on
    // anything that cannot fit 256 bits.
    pub fn from_f64(unit: &Arc<Unit>, value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }

        let scaled = value * 10f64.powi(unit.decimals() as i32);
        if !scaled.is_finite() || !(scaled.abs() < F64_OVERFLOW_BOUND) {
            return None;
        }

        let rendered = format!("{:.0}", scaled.abs());
        let magnitude = U256::from_dec_str(&rendered).ok()?;
        Some(Self::from_base_signed(unit, magnitude, value < 0.0))
    }

    // Decimal integer string denominated in base units, optionally signed
    pub fn from_base_string(unit: &Arc<Unit>, s: &str) -> Option<Self> {
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let value = U256::from_dec_str(digits).ok()?;
        Some(Self::from_base_signed(unit, value, negative))
    }

    pub fn unit(&self) -> &Arc<Unit> {
        &self.unit
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_compatible(&self, other: &Amount) -> bool {
        self.unit.is_compatible(&other.unit)
    }

    // Magnitude and sign in base units
    pub fn to_base(&self) -> (U256, bool) {
        (self.value, self.negative)
    }

    pub fn to_u64_base(&self) -> Option<u64> {
        if self.negative || self.value > U256::from(u64::MAX) {
            return None;
        }
        Some(self.value.as_u64())
    }

    // Read back as a double denominated in `unit`
    pub fn to_f64(&self, unit: &Arc<Unit>) -> Option<f64> {
        if !self.unit.is_compatible(unit) {
            return None;
        }

        let magnitude = u256_to_f64(self.value) / 10f64.powi(unit.decimals() as i32);
        Some(if self.negative { -magnitude } else { magnitude })
    }

    // Same quantity displayed in another compatible unit
    pub fn in_unit(&self, unit: &Arc<Unit>) -> Option<Self> {
        if !self.unit.is_compatible(unit) {
            return None;
        }
        Some(Self {
            value: self.value,
            negative: self.negative,
            unit: Arc::clone(unit),
        })
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Self> {
        if !self.is_compatible(other) {
            return None;
        }
        let (value, negative) = add_signed(
            (self.value, self.negative),
            (other.value, other.negative),
        )?;
        Some(Self::from_base_signed(&self.unit, value, negative))
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Self> {
        self.checked_add(&other.negated())
    }

    pub fn negated(&self) -> Self {
        Self::from_base_signed(&self.unit, self.value, !self.negative)
    }

    // Scale by an unsigned integer factor
    pub fn checked_mul_u64(&self, factor: u64) -> Option<Self> {
        let value = self.value.checked_mul(U256::from(factor))?;
        Some(Self::from_base_signed(&self.unit, value, self.negative))
    }

    pub fn compare(&self, other: &Amount) -> Option<Ordering> {
        if !self.is_compatible(other) {
            return None;
        }
        Some(match (self.negative, other.negative) {
            (false, false) => self.value.cmp(&other.value),
            (true, true) => other.value.cmp(&self.value),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        })
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.is_compatible(other) && self.negative == other.negative && self.value == other.value
    }
}

impl Eq for Amount {}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let scale = U256::from(10u64)
            .checked_pow(U256::from(self.unit.decimals()))
            .unwrap_or_else(U256::max_value);
        let integer = self.value / scale;
        let frac = self.value % scale;

        if self.negative {
            write!(f, "-")?;
        }

        if self.unit.decimals() == 0 || frac.is_zero() {
            write!(f, "{} {}", integer, self.unit.code())
        } else {
            let frac_str = frac.to_string();
            let padding = "0".repeat(self.unit.decimals() as usize - frac_str.len());
            let digits = format!("{}{}", padding, frac_str);
            write!(f, "{}.{} {}", integer, digits.trim_end_matches('0'), self.unit.code())
        }
    }
}

// Signed addition over (magnitude, negative) pairs
fn add_signed(a: (U256, bool), b: (U256, bool)) -> Option<(U256, bool)> {
    match (a.1, b.1) {
        (false, false) => Some((a.0.checked_add(b.0)?, false)),
        (true, true) => Some((a.0.checked_add(b.0)?, true)),
        _ => {
            if a.0 >= b.0 {
                Some((a.0 - b.0, a.1))
            } else {
                Some((b.0 - a.0, b.1))
            }
        }
    }
}

fn u256_to_f64(value: U256) -> f64 {
    let limbs = value.0;
    let mut result = 0f64;
    for (i, limb) in limbs.iter().enumerate() {
        result += (*limb as f64) * 2f64.powi(64 * i as i32);
    }
    result
}
