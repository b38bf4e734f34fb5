//! Koinu amount conversions. One DOGE is 10^8 koinu; amounts travel as
//! `u64` koinu and render as fixed-point decimal strings.

use crate::error::ParseError;

pub const KOINU_PER_COIN: u64 = 100_000_000;

/// Render an amount as a decimal coin string with eight fraction digits.
pub fn koinu_to_coins_string(koinu: u64) -> String {
    let whole = koinu / KOINU_PER_COIN;
    let frac = koinu % KOINU_PER_COIN;
    format!("{whole}.{frac:08}")
}

/// Parse a coin string back to koinu. At most eight fraction digits;
/// amounts beyond `u64` range are rejected.
pub fn coins_string_to_koinu(s: &str) -> Result<u64, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::InvalidEncoding);
    }
    let (whole_str, frac_str) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole_str.is_empty() && frac_str.is_empty() {
        return Err(ParseError::InvalidEncoding);
    }
    if frac_str.len() > 8 {
        return Err(ParseError::InvalidEncoding);
    }
    if !whole_str.chars().all(|c| c.is_ascii_digit())
        || !frac_str.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ParseError::InvalidEncoding);
    }
    let whole: u64 = if whole_str.is_empty() {
        0
    } else {
        whole_str.parse().map_err(|_| ParseError::InvalidEncoding)?
    };
    let mut frac: u64 = 0;
    if !frac_str.is_empty() {
        frac = frac_str.parse().map_err(|_| ParseError::InvalidEncoding)?;
        frac *= 10u64.pow(8 - frac_str.len() as u32);
    }
    whole
        .checked_mul(KOINU_PER_COIN)
        .and_then(|k| k.checked_add(frac))
        .ok_or(ParseError::InvalidEncoding)
}
