//! Byte-quantity parsing and human-readable formatting.

use thiserror::Error;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitParseError {
    #[error("byte quantity `{0}` has no leading numeral")]
    MissingNumber(String),
    #[error("byte quantity `{0}` has no unit suffix (expected B, K/KiB, M/MiB or G/GiB)")]
    MissingUnit(String),
    #[error("unknown byte unit `{0}`")]
    UnknownUnit(String),
    #[error("byte quantity `{0}` overflows")]
    Overflow(String),
}

/// Parses a decimal numeral followed by a binary byte unit, e.g. `512M` or
/// `8GiB`.
pub fn parse_byte_size(text: &str) -> Result<u64, UnitParseError> {
    let text = text.trim();
    let digits: usize = text.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Err(UnitParseError::MissingNumber(text.to_string()));
    }
    let number: u64 = text[..digits]
        .parse()
        .map_err(|_| UnitParseError::Overflow(text.to_string()))?;
    let factor = match &text[digits..] {
        "" => return Err(UnitParseError::MissingUnit(text.to_string())),
        "B" => 1,
        "K" | "KiB" => KIB,
        "M" | "MiB" => MIB,
        "G" | "GiB" => GIB,
        unit => return Err(UnitParseError::UnknownUnit(unit.to_string())),
    };
    number
        .checked_mul(factor)
        .ok_or_else(|| UnitParseError::Overflow(text.to_string()))
}

/// Formats a byte count with binary prefixes.
pub fn pretty_bytes(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Formats a nanosecond duration as milliseconds.
pub fn pretty_nanos(duration: u64) -> String {
    format!("{:.3} ms", duration as f64 / 1e6)
}
