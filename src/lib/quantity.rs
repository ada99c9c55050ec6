//! Exact Kubernetes resource quantities.
//!
//! Every quantity is held as an `i128` count of nano-units, so CPU strings
//! reported by metrics-server in nanocores (`"123456789n"`) and memory in
//! binary suffixes (`"1.5Gi"`) both add up without rounding error.

use std::iter::Sum;
use std::ops::Add;

use log::warn;
use thiserror::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;
const NANOS_PER_MILLI: i128 = 1_000_000;
const KIB: i128 = 1024;
const MIB: i128 = 1024 * 1024;

/// Largest decimal exponent accepted in `1e<exp>` form
const MAX_EXPONENT: i32 = 60;

/// Why a quantity string was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("negative quantity: {0}")]
    Negative(String),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("unknown suffix '{suffix}' in {input}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity out of range: {0}")]
    Overflow(String),
}

/// The two resources a capacity report tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    /// Key used in Kubernetes resource maps
    pub fn key(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
        }
    }

    /// Render a quantity in this resource's customary unit
    pub fn format(&self, quantity: ResourceQuantity) -> String {
        match self {
            ResourceKind::Cpu => format_cpu(quantity),
            ResourceKind::Memory => format_memory(quantity),
        }
    }
}

/// A non-negative CPU or memory amount in nano-units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceQuantity(i128);

impl ResourceQuantity {
    pub const ZERO: ResourceQuantity = ResourceQuantity(0);

    pub fn from_nanos(nanos: i128) -> Self {
        Self(nanos.max(0))
    }

    pub fn nanos(&self) -> i128 {
        self.0
    }

    /// Millicores (or millibytes), rounded up
    pub fn millis(&self) -> i128 {
        ceil_div(self.0, NANOS_PER_MILLI)
    }

    /// Whole cores (or bytes), rounded up
    pub fn units(&self) -> i128 {
        ceil_div(self.0, NANOS_PER_UNIT)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a Kubernetes quantity string such as `250m`, `1.5Gi` or `1e3`.
    ///
    /// Precision below one nano-unit is rounded up, matching how the API
    /// server canonicalises quantities.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }
        if trimmed.starts_with('-') {
            return Err(QuantityError::Negative(input.to_string()));
        }
        let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }
        if frac_part.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let overflow = || QuantityError::Overflow(input.to_string());

        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(overflow)?;
        }

        let (pow10, pow1024) = suffix_exponents(input, suffix)?;

        let mut nanos = mantissa
            .checked_mul(KIB.pow(pow1024))
            .ok_or_else(overflow)?;

        let scale = frac_part.len() as i64;
        let exponent = i64::from(pow10) + 9 - scale;
        if exponent >= 0 {
            let factor = u32::try_from(exponent)
                .ok()
                .and_then(|e| 10i128.checked_pow(e))
                .ok_or_else(overflow)?;
            nanos = nanos.checked_mul(factor).ok_or_else(overflow)?;
        } else {
            nanos = match u32::try_from(-exponent).ok().and_then(|e| 10i128.checked_pow(e)) {
                Some(divisor) => ceil_div(nanos, divisor),
                // divisor exceeds any representable mantissa
                None => i128::from(nanos > 0),
            };
        }

        Ok(Self(nanos))
    }

    /// Exact sum; saturates (with a warning) instead of wrapping.
    pub fn add(self, other: Self) -> Self {
        match self.0.checked_add(other.0) {
            Some(sum) => Self(sum),
            None => {
                warn!("Resource quantity overflow while adding {} and {}", self.0, other.0);
                Self(i128::MAX)
            }
        }
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0).max(0))
    }
}

impl Add for ResourceQuantity {
    type Output = ResourceQuantity;

    fn add(self, rhs: Self) -> Self::Output {
        ResourceQuantity::add(self, rhs)
    }
}

impl Sum for ResourceQuantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ResourceQuantity::ZERO, ResourceQuantity::add)
    }
}

/// Sum two optional quantities. Absent only when both sides are absent.
pub fn sum_optional(
    a: Option<ResourceQuantity>,
    b: Option<ResourceQuantity>,
) -> Option<ResourceQuantity> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// `used` as a percentage of `total`.
///
/// Returns `None` when either value is absent or `total` is zero, so a
/// caller never sees infinity or NaN.
pub fn percentage(used: Option<ResourceQuantity>, total: Option<ResourceQuantity>) -> Option<f64> {
    let used = used?;
    let total = total?;
    if total.is_zero() {
        return None;
    }
    Some(used.0 as f64 / total.0 as f64 * 100.0)
}

/// CPU always renders in millicores
pub fn format_cpu(quantity: ResourceQuantity) -> String {
    format!("{}m", quantity.millis())
}

/// Memory renders in Mi, falling back to Ki and bytes for tiny values
pub fn format_memory(quantity: ResourceQuantity) -> String {
    let bytes = quantity.units();
    if bytes >= MIB {
        format!("{}Mi", ceil_div(bytes, MIB))
    } else if bytes >= KIB {
        format!("{}Ki", ceil_div(bytes, KIB))
    } else {
        bytes.to_string()
    }
}

fn suffix_exponents(input: &str, suffix: &str) -> Result<(i32, u32), QuantityError> {
    let exponents = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 1),
        "Mi" => (0, 2),
        "Gi" => (0, 3),
        "Ti" => (0, 4),
        "Pi" => (0, 5),
        "Ei" => (0, 6),
        other => {
            let unknown = || QuantityError::UnknownSuffix {
                input: input.to_string(),
                suffix: other.to_string(),
            };
            let digits = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))
                .ok_or_else(unknown)?;
            let exponent: i32 = digits.parse().map_err(|_| unknown())?;
            if exponent.abs() > MAX_EXPONENT {
                return Err(QuantityError::Overflow(input.to_string()));
            }
            (exponent, 0)
        }
    };
    Ok(exponents)
}

fn ceil_div(value: i128, divisor: i128) -> i128 {
    value / divisor + i128::from(value % divisor != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> ResourceQuantity {
        ResourceQuantity::parse(s).unwrap()
    }

    #[test]
    fn parses_cpu_forms() {
        assert_eq!(q("250m").millis(), 250);
        assert_eq!(q("2").millis(), 2000);
        assert_eq!(q("0.5").millis(), 500);
        assert_eq!(q("1.25").millis(), 1250);
        assert_eq!(q("123456789n").nanos(), 123_456_789);
        assert_eq!(q("150u").nanos(), 150_000);
        assert_eq!(q("+100m").millis(), 100);
    }

    #[test]
    fn parses_memory_forms() {
        assert_eq!(q("128Mi").units(), 128 * 1024 * 1024);
        assert_eq!(q("1.5Gi").units(), 1536 * 1024 * 1024);
        assert_eq!(q("1G").units(), 1_000_000_000);
        assert_eq!(q("500k").units(), 500_000);
        assert_eq!(q("1e3").units(), 1000);
        assert_eq!(q("12E-1").millis(), 1200);
        assert_eq!(q("1Ei").units(), 1i128 << 60);
    }

    #[test]
    fn rounds_sub_nano_precision_up() {
        assert_eq!(q("0.0000000001").nanos(), 1);
        assert_eq!(q("1e-30").nanos(), 1);
        assert_eq!(q("0e-50").nanos(), 0);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(ResourceQuantity::parse(""), Err(QuantityError::Empty));
        assert!(matches!(
            ResourceQuantity::parse("-1"),
            Err(QuantityError::Negative(_))
        ));
        assert!(matches!(
            ResourceQuantity::parse("abc"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            ResourceQuantity::parse("1.2.3"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            ResourceQuantity::parse("10Xi"),
            Err(QuantityError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            ResourceQuantity::parse("1e999"),
            Err(QuantityError::Overflow(_))
        ));
    }

    #[test]
    fn addition_is_exact_across_many_values() {
        let total: ResourceQuantity = (0..10_000).map(|_| q("1n")).sum();
        assert_eq!(total.nanos(), 10_000);

        let cluster: ResourceQuantity = (0..5_000).map(|_| q("64Gi")).sum();
        assert_eq!(cluster.units(), 5_000 * 64 * 1024 * 1024 * 1024);
    }

    #[test]
    fn addition_saturates_instead_of_wrapping() {
        let big = ResourceQuantity::from_nanos(i128::MAX - 1);
        assert_eq!((big + q("1")).nanos(), i128::MAX);
    }

    #[test]
    fn optional_sum_keeps_absence() {
        assert_eq!(sum_optional(None, None), None);
        assert_eq!(sum_optional(Some(q("1")), None), Some(q("1")));
        assert_eq!(sum_optional(None, Some(q("2"))), Some(q("2")));
        assert_eq!(sum_optional(Some(q("1")), Some(q("2"))), Some(q("3")));
    }

    #[test]
    fn percentage_guards_zero_and_absent_totals() {
        assert_eq!(percentage(Some(q("1")), None), None);
        assert_eq!(percentage(Some(q("1")), Some(ResourceQuantity::ZERO)), None);
        assert_eq!(percentage(None, Some(q("1"))), None);
        assert_eq!(percentage(Some(q("500m")), Some(q("2"))), Some(25.0));
    }

    #[test]
    fn formats_in_customary_units() {
        assert_eq!(format_cpu(q("1.5")), "1500m");
        assert_eq!(format_cpu(q("1n")), "1m");
        assert_eq!(format_memory(q("1Gi")), "1024Mi");
        assert_eq!(format_memory(q("1500Ki")), "2Mi");
        assert_eq!(format_memory(q("2048")), "2Ki");
        assert_eq!(format_memory(q("512")), "512");
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        assert_eq!(q("1").saturating_sub(q("2")), ResourceQuantity::ZERO);
        assert_eq!(q("2").saturating_sub(q("500m")).millis(), 1500);
    }
}
