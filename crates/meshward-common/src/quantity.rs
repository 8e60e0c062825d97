//! Kubernetes resource quantity parsing
//!
//! `k8s_openapi` keeps quantities as the raw strings the API server returned,
//! so `100m` and `0.1` (or `1Gi` and `1024Mi`) compare unequal as strings. The
//! sidecar resource check needs semantic equality, so quantities are reduced
//! to an exact integer number of nano-units before comparing.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{Error, Result};

/// Nano-units per whole unit
const NANOS_PER_UNIT_EXP: i32 = 9;

/// Parse a quantity string into nano-units.
///
/// Accepts the canonical Kubernetes forms: plain decimals (`2`, `0.5`),
/// binary SI suffixes (`Ki` .. `Ei`), decimal SI suffixes (`n`, `u`, `m`,
/// `k`, `M` .. `E`) and decimal exponents (`1e3`, `5E-2`). Values finer than
/// a nano-unit are rounded up, matching the API server's canonicalisation.
pub fn parse_quantity(value: &str) -> Result<i128> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation("empty quantity"));
    }

    let (negative, rest) = match value.as_bytes()[0] {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };

    let number_end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(number_end);

    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(Error::validation(format!("invalid quantity: {value}")));
    }

    let digits = format!("{whole}{fraction}");
    let mantissa: i128 = digits
        .parse()
        .map_err(|_| Error::validation(format!("invalid quantity: {value}")))?;

    let (decimal_exp, binary_multiplier) = parse_suffix(suffix)
        .ok_or_else(|| Error::validation(format!("invalid quantity suffix in: {value}")))?;

    let overflow = || Error::validation(format!("quantity out of range: {value}"));

    let scaled = mantissa
        .checked_mul(binary_multiplier)
        .ok_or_else(overflow)?;
    if scaled == 0 {
        return Ok(0);
    }
    let fraction_len = i32::try_from(fraction.len()).map_err(|_| overflow())?;
    let exp = NANOS_PER_UNIT_EXP
        .checked_add(decimal_exp)
        .and_then(|e| e.checked_sub(fraction_len))
        .ok_or_else(overflow)?;

    let nanos = if exp >= 0 {
        10i128
            .checked_pow(exp.unsigned_abs())
            .and_then(|m| scaled.checked_mul(m))
            .ok_or_else(overflow)?
    } else {
        let divisor = 10i128.checked_pow(exp.unsigned_abs());
        match divisor {
            // Round up to the next nano-unit
            Some(divisor) => scaled.checked_add(divisor - 1).ok_or_else(overflow)? / divisor,
            // Smaller than any representable divisor: a non-zero value rounds up to one
            None => 1,
        }
    };

    Ok(if negative { -nanos } else { nanos })
}

/// Map a suffix to (decimal exponent, binary multiplier).
fn parse_suffix(suffix: &str) -> Option<(i32, i128)> {
    let binary = |power: u32| Some((0, 1024i128.pow(power)));
    match suffix {
        "" => Some((0, 1)),
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        "n" => Some((-9, 1)),
        "u" => Some((-6, 1)),
        "m" => Some((-3, 1)),
        "k" => Some((3, 1)),
        "M" => Some((6, 1)),
        "G" => Some((9, 1)),
        "T" => Some((12, 1)),
        "P" => Some((15, 1)),
        "E" => Some((18, 1)),
        s if s.starts_with('e') || s.starts_with('E') => {
            let exp: i32 = s[1..].parse().ok()?;
            Some((exp, 1))
        }
        _ => None,
    }
}

/// Compare two optional quantities semantically.
///
/// A missing quantity equals zero. If either side does not parse, the raw
/// strings are compared instead so malformed values only match themselves.
pub fn quantities_equal(left: Option<&Quantity>, right: Option<&Quantity>) -> bool {
    let parse = |q: Option<&Quantity>| match q {
        None => Ok(0),
        Some(q) => parse_quantity(&q.0),
    };
    match (parse(left), parse(right)) {
        (Ok(l), Ok(r)) => l == r,
        _ => left.map(|q| q.0.as_str()) == right.map(|q| q.0.as_str()),
    }
}
