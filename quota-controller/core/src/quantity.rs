//! Fixed-point arithmetic over Kubernetes resource quantities.
//!
//! Quantities reach us as opaque strings (`"10"`, `"500m"`, `"1.5Gi"`).
//! Accounting needs exact addition and semantic comparison, so quantities are
//! parsed into thousandths of a unit before any arithmetic happens. A
//! quantity's formatting preference (decimal vs binary suffixes) survives the
//! round trip so that `"256Mi" + "256Mi"` reads back as `"512Mi"` and not a
//! ten-digit byte count.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::{cmp::Ordering, fmt, str::FromStr};

/// A quantity held as an exact count of milli-units.
#[derive(Copy, Clone, Debug)]
pub struct ParsedQuantity {
    millis: i128,
    format: Format,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Format {
    DecimalSI,
    BinarySI,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),

    #[error("invalid suffix in quantity {0:?}")]
    InvalidSuffix(String),

    #[error("quantity {0:?} is finer than milli precision")]
    TooPrecise(String),

    #[error("quantity {0:?} overflows the supported range")]
    Overflow(String),
}

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, i32); 6] = [
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

// === impl ParsedQuantity ===

impl ParsedQuantity {
    pub fn zero() -> Self {
        Self {
            millis: 0,
            format: Format::DecimalSI,
        }
    }

    /// One whole unit, e.g. a single counted object.
    pub fn one() -> Self {
        Self {
            millis: 1000,
            format: Format::DecimalSI,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Exact addition. The left operand's formatting preference wins unless
    /// it is zero, so zero-seeded accumulators adopt the format of whatever
    /// they first absorb.
    pub fn add(self, other: Self) -> Self {
        let format = if self.millis == 0 {
            other.format
        } else {
            self.format
        };
        Self {
            millis: self.millis.saturating_add(other.millis),
            format,
        }
    }

    pub fn parse(q: &Quantity) -> Result<Self, ParseError> {
        q.0.parse()
    }

    pub fn to_quantity(self) -> Quantity {
        Quantity(self.to_string())
    }
}

/// Compares two wire quantities by value, falling back to string equality
/// when either side does not parse.
pub fn semantic_eq(a: &Quantity, b: &Quantity) -> bool {
    match (ParsedQuantity::parse(a), ParsedQuantity::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.0 == b.0,
    }
}

impl PartialEq for ParsedQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl Eq for ParsedQuantity {}

impl PartialOrd for ParsedQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis.cmp(&other.millis)
    }
}

impl FromStr for ParsedQuantity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);
        if number.is_empty() {
            return Err(ParseError::InvalidNumber(s.to_string()));
        }

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseError::InvalidNumber(s.to_string()));
        }

        let mut mantissa: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| ParseError::InvalidNumber(s.to_string()))?;
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(digit as i128))
                .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
        }

        // The scale is the power of ten still owed to the mantissa after
        // accounting for fraction digits and the milli fixed point.
        let mut scale: i32 = 3 - frac_part.len() as i32;
        let mut binary_multiplier: i128 = 1;
        let mut format = Format::DecimalSI;

        if let Some(&(_, pow)) = BINARY_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
            binary_multiplier = 1024i128
                .checked_pow(pow)
                .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
            format = Format::BinarySI;
        } else if let Some(&(_, pow)) = DECIMAL_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
            scale += pow;
        } else if suffix == "m" {
            scale -= 3;
        } else if suffix.len() > 1 && suffix.starts_with(['e', 'E']) {
            // `e`/`E` followed by digits is an exponent; a lone `E` was
            // already consumed above as the exa suffix.
            let exp: i32 = suffix[1..]
                .parse()
                .map_err(|_| ParseError::InvalidSuffix(s.to_string()))?;
            scale += exp;
        } else if !suffix.is_empty() {
            return Err(ParseError::InvalidSuffix(s.to_string()));
        }

        let mut millis = mantissa
            .checked_mul(binary_multiplier)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
        if scale >= 0 {
            let pow = 10i128
                .checked_pow(scale as u32)
                .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
            millis = millis
                .checked_mul(pow)
                .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
        } else {
            let pow = 10i128
                .checked_pow(-scale as u32)
                .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
            if millis % pow != 0 {
                return Err(ParseError::TooPrecise(s.to_string()));
            }
            millis /= pow;
        }

        Ok(Self {
            millis: if negative { -millis } else { millis },
            format,
        })
    }
}

impl fmt::Display for ParsedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.millis;
        if millis % 1000 != 0 {
            return write!(f, "{}m", millis);
        }
        let units = millis / 1000;
        if self.format == Format::BinarySI && units != 0 {
            for (suffix, pow) in BINARY_SUFFIXES.iter().rev() {
                let step = 1024i128.pow(*pow);
                if units % step == 0 {
                    return write!(f, "{}{}", units / step, suffix);
                }
            }
        }
        write!(f, "{}", units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ParsedQuantity {
        s.parse().unwrap()
    }

    #[test]
    fn parses_whole_and_milli_values() {
        assert_eq!(parse("0").millis, 0);
        assert_eq!(parse("10").millis, 10_000);
        assert_eq!(parse("100m").millis, 100);
        assert_eq!(parse("1.5").millis, 1_500);
        assert_eq!(parse("-2").millis, -2_000);
        assert_eq!(parse("+2").millis, 2_000);
    }

    #[test]
    fn parses_suffixed_values() {
        assert_eq!(parse("1k").millis, 1_000_000);
        assert_eq!(parse("2M").millis, 2_000_000_000);
        assert_eq!(parse("1Ki").millis, 1_024_000);
        assert_eq!(parse("1.5Gi").millis, 1_610_612_736_000);
        assert_eq!(parse("12e3").millis, 12_000_000);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("".parse::<ParsedQuantity>(), Err(ParseError::Empty));
        assert!(matches!(
            "pods".parse::<ParsedQuantity>(),
            Err(ParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            "1x".parse::<ParsedQuantity>(),
            Err(ParseError::InvalidSuffix(_))
        ));
        assert!(matches!(
            "0.0001".parse::<ParsedQuantity>(),
            Err(ParseError::TooPrecise(_))
        ));
    }

    #[test]
    fn addition_is_exact_and_keeps_format() {
        let sum = parse("100m").add(parse("200m"));
        assert_eq!(sum.to_string(), "300m");

        let sum = parse("256Mi").add(parse("256Mi"));
        assert_eq!(sum.to_string(), "512Mi");

        let sum = ParsedQuantity::zero().add(parse("128Mi"));
        assert_eq!(sum.to_string(), "128Mi");

        let sum = parse("1").add(parse("1"));
        assert_eq!(sum.to_string(), "2");
    }

    #[test]
    fn equality_is_semantic() {
        assert_eq!(parse("1Ki"), parse("1024"));
        assert_eq!(parse("1500m"), parse("1.5"));
        assert!(semantic_eq(
            &Quantity("1Gi".to_string()),
            &Quantity("1073741824".to_string())
        ));
        assert!(!semantic_eq(
            &Quantity("1".to_string()),
            &Quantity("2".to_string())
        ));
    }

    #[test]
    fn formats_canonically() {
        assert_eq!(parse("1.5").to_string(), "1500m");
        assert_eq!(parse("0").to_string(), "0");
        assert_eq!(parse("1048576Ki").to_string(), "1Gi");
        assert_eq!(parse("1500").to_string(), "1500");
    }
}
