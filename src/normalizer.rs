//! Turns raw element text into a decimal string a float parser accepts.
//!
//! Commas become periods, and when more than one period remains only the last
//! one survives as the decimal point. A value with a single separator is always
//! read as a decimal, so `"1,234"` becomes `"1.234"` and not `"1234"`.

use regex::Regex;

use crate::utils::error::AppError;
use crate::Result;

/// Default extraction pattern used when a target has none.
pub const DEFAULT_PRICE_PATTERN: &str = r"[-+]?\d+(?:[.,]\d{3})*(?:[.,]\d+)?";

/// A compiled extraction pattern.
#[derive(Debug, Clone)]
pub struct PricePattern {
    regex: Regex,
}

impl PricePattern {
    /// Compiles `pattern`, falling back to `default_pattern` when it is blank.
    pub fn compile(pattern: &str, default_pattern: &str) -> Result<Self> {
        let source = if pattern.trim().is_empty() {
            default_pattern
        } else {
            pattern
        };
        Ok(Self {
            regex: Regex::new(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn normalize(&self, text: &str) -> Option<String> {
        normalize_price(text, &self.regex)
    }
}

/// Searches `text` for the first match of `pattern` and normalizes its
/// separators. Returns `None` when nothing matches.
pub fn normalize_price(text: &str, pattern: &Regex) -> Option<String> {
    let matched = pattern.find(text)?;
    Some(collapse_separators(matched.as_str()))
}

/// Byte-oriented variant for element content that did not arrive as UTF-8.
pub fn normalize_price_bytes(raw: &[u8], pattern: &regex::bytes::Regex) -> Option<String> {
    let matched = pattern.find(raw)?;
    let text = String::from_utf8_lossy(matched.as_bytes());
    Some(collapse_separators(&text))
}

fn collapse_separators(matched: &str) -> String {
    let unified = matched.replace(',', ".");

    let Some(decimal_point) = unified.rfind('.') else {
        return unified;
    };

    unified
        .char_indices()
        .filter(|&(index, c)| c != '.' || index == decimal_point)
        .map(|(_, c)| c)
        .collect()
}

/// Parses a normalized string as a price. NaN and infinities are rejected.
pub fn parse_price(normalized: &str) -> Result<f64> {
    let value: f64 = normalized
        .trim()
        .parse()
        .map_err(|e| AppError::parse(format!("'{}' is not a number: {}", normalized, e)))?;

    if !value.is_finite() {
        return Err(AppError::parse(format!("'{}' is not a finite number", normalized)));
    }
    Ok(value)
}
