//! Numeric parsing and formatting for financial answer strings
//!
//! Handles thousands separators, currency signs, percent signs and
//! parenthesized negatives. Parse failures are `None`, never errors.

use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_ABS_TOL: f64 = 1e-4;
pub const DEFAULT_REL_TOL: f64 = 0.01;

/// Divisor magnitude below which a percentage change is reported as +inf
const NEAR_ZERO: f64 = 1e-12;

lazy_static! {
    static ref NUMBER_TOKEN: Regex = Regex::new(
        r"(?P<open>\()?\s*(?P<sign>[-+])?(?:\$\s*)?(?P<num>(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?|\.\d+)(?P<pct>%)?\s*(?P<close>\))?"
    )
    .expect("number token pattern is valid");
}

/// Parse the first numeric token in `s`.
///
/// `"(1,234.5)"` is `-1234.5`, `"12.5%"` is `0.125`, `"$1,000"` is `1000`.
pub fn parse_number(s: &str) -> Option<f64> {
    let caps = NUMBER_TOKEN.captures(s)?;
    let digits = caps.name("num")?.as_str().replace(',', "");
    let mut value: f64 = digits.parse().ok()?;

    if caps.name("pct").is_some() {
        value /= 100.0;
    }

    let parenthesized = caps.name("open").is_some() && caps.name("close").is_some();
    let signed_negative = caps.name("sign").map(|m| m.as_str()) == Some("-");
    if parenthesized || signed_negative {
        value = -value;
    }

    Some(value)
}

/// Absolute and relative change from `prev` to `curr`.
///
/// The relative change is `+inf` when `prev` is (nearly) zero.
pub fn compute_change(curr: f64, prev: f64) -> (f64, f64) {
    let delta = curr - prev;
    let pct = if prev.abs() > NEAR_ZERO {
        delta / prev
    } else {
        f64::INFINITY
    };
    (delta, pct)
}

/// Render as `"<delta> (<pct>%)"`: delta with 4 significant digits,
/// pct as a percentage with 2 decimals.
pub fn format_change(delta: f64, pct: f64) -> String {
    format!("{} ({:.2}%)", format_significant(delta, 4), pct * 100.0)
}

/// Parse both strings and format the change from `prev` to `curr`.
pub fn change_between(curr: &str, prev: &str) -> Option<String> {
    let curr = parse_number(curr)?;
    let prev = parse_number(prev)?;
    let (delta, pct) = compute_change(curr, prev);
    Some(format_change(delta, pct))
}

/// `numeric_match_with` using the default tolerances.
pub fn numeric_match(pred: &str, gold: &str) -> bool {
    numeric_match_with(pred, gold, DEFAULT_ABS_TOL, DEFAULT_REL_TOL)
}

/// Tolerant numeric comparison, falling back to case-insensitive string
/// equality when either side is not numeric.
pub fn numeric_match_with(pred: &str, gold: &str, abs_tol: f64, rel_tol: f64) -> bool {
    match (parse_number(pred), parse_number(gold)) {
        (Some(p), Some(g)) => {
            let diff = (p - g).abs();
            if diff <= abs_tol {
                return true;
            }
            diff / g.abs().max(1e-9) <= rel_tol
        }
        _ => pred.trim().to_lowercase() == gold.trim().to_lowercase(),
    }
}

/// General-format rendering with `precision` significant digits:
/// fixed notation for moderate exponents, scientific otherwise,
/// trailing zeros removed.
pub fn format_significant(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if exponent < -4 || exponent >= precision as i32 {
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}
