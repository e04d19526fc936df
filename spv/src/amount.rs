//! Exact decimal BTC → satoshi conversion.
//!
//! Bitcoin Core's JSON encodes output values as decimal BTC; going through
//! an `f64` silently corrupts them (`0.1 * 1e8 = 9999999.999…`). The
//! conversion here stays in integer arithmetic over the decimal digits and
//! rejects anything finer than one satoshi.

use thiserror::Error;

pub const SATS_PER_BTC: u64 = 100_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid BTC amount `{0}`")]
    Invalid(String),
    #[error("BTC amount `{0}` yields fractional satoshis")]
    FractionalSatoshi(String),
    #[error("BTC amount `{0}` overflows the satoshi range")]
    Overflow(String),
}

/// Convert a decimal BTC string (plain or scientific notation) to satoshis.
pub fn btc_to_sats(value: &str) -> Result<u64, AmountError> {
    let invalid = || AmountError::Invalid(value.to_string());

    let s = value.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.is_empty() || s.starts_with('-') {
        return Err(invalid());
    }

    // Split off a scientific-notation exponent if present.
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(pos) => {
            let exp: i32 = s[pos + 1..].parse().map_err(|_| invalid())?;
            (&s[..pos], exp)
        }
        None => (s, 0),
    };

    let (int_part, frac_part) = match mantissa.find('.') {
        Some(pos) => (&mantissa[..pos], &mantissa[pos + 1..]),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    // value = digits * 10^(exponent - frac_len) BTC
    //       = digits * 10^(8 + exponent - frac_len) sats
    let mut digits: u128 = 0;
    for b in int_part.bytes().chain(frac_part.bytes()) {
        digits = digits
            .checked_mul(10)
            .and_then(|d| d.checked_add((b - b'0') as u128))
            .ok_or_else(|| AmountError::Overflow(value.to_string()))?;
    }

    let shift = 8i64 + exponent as i64 - frac_part.len() as i64;
    let sats = if shift >= 0 {
        let factor = 10u128
            .checked_pow(u32::try_from(shift).map_err(|_| invalid())?)
            .ok_or_else(|| AmountError::Overflow(value.to_string()))?;
        digits
            .checked_mul(factor)
            .ok_or_else(|| AmountError::Overflow(value.to_string()))?
    } else {
        // Digits below the satoshi must all be zero.
        let k = u32::try_from(-shift).map_err(|_| invalid())?;
        match 10u128.checked_pow(k) {
            Some(divisor) => {
                if digits % divisor != 0 {
                    return Err(AmountError::FractionalSatoshi(value.to_string()));
                }
                digits / divisor
            }
            None => {
                if digits != 0 {
                    return Err(AmountError::FractionalSatoshi(value.to_string()));
                }
                0
            }
        }
    };

    u64::try_from(sats).map_err(|_| AmountError::Overflow(value.to_string()))
}
