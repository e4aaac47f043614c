//! Shared field lookup and numeric coercion helpers.
//!
//! Upstream records are loosely typed: the same metric may arrive as a
//! number, a string with thousands separators, or an empty string. These
//! helpers never fail; anything unusable degrades to `0` or `None`.

use serde_json::{Map, Value};

/// Coerces a raw field value to `f64`.
///
/// Numbers pass through. Strings have thousands separators stripped and are
/// read up to the end of their leading number, so `"7.5%"` is `7.5`.
/// Anything else, and any non-finite result, yields `0`.
#[must_use]
pub fn parse_number(value: Option<&Value>) -> f64 {
    value.and_then(numeric_value).unwrap_or(0.0)
}

/// Returns the numeric reading of `value` if it looks like a number.
///
/// Strings only need a leading number: `"1,234 crore"` reads as `1234`.
/// Booleans, nulls, arrays, objects, and strings that don't start with a
/// number are `None`.
#[must_use]
pub fn numeric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let cleaned = s.replace(',', "");
            leading_number(cleaned.trim())?
        }
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

/// Parses the longest numeric prefix of `s`: an optional sign, digits with
/// at most one decimal point, and an optional exponent.
fn leading_number(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let digits_from = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_digits = digits_from(end);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits_from(end + 1);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_start = end + 1;
        if matches!(bytes.get(exp_start), Some(b'+' | b'-')) {
            exp_start += 1;
        }
        let exp_digits = digits_from(exp_start);
        if exp_digits > 0 {
            end = exp_start + exp_digits;
        }
    }

    s[..end].parse().ok()
}

/// Returns the value of the first alias that is present, non-null, and not
/// an empty string.
///
/// A numeric `0` counts as present.
#[must_use]
pub fn first_present<'a>(record: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| record.get(*alias))
        .find(|value| is_present(value))
}

/// Returns the first present alias rendered as a string label.
///
/// Numbers are rendered without a trailing `.0` for integral values, so a
/// year of `2024` becomes `"2024"`.
#[must_use]
pub fn first_label(record: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    first_present(record, aliases).and_then(label)
}

/// Renders a scalar as a trimmed label.
#[must_use]
pub fn label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(match n.as_f64() {
            Some(v) if n.is_f64() && v.is_finite() && v.fract().abs() < f64::EPSILON => {
                format!("{v:.0}")
            }
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Turns a raw field name into a display name.
///
/// Underscores become spaces and the first letter of every word is
/// uppercased: `gross_value_added` becomes `Gross Value Added`.
#[must_use]
pub fn humanize(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut word_start = true;
    for c in field.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphanumeric() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    out
}
