//! Response value parsing and significant-digit formatting.

/// Parses the leading numeric token of an instrument response.
///
/// The response is split on runs of whitespace and commas and the first
/// non-empty token is parsed as `f64`. Blank responses and non-numeric
/// leading tokens yield `None`; this never fails.
pub fn parse_primary_value(raw_response: &str) -> Option<f64> {
    raw_response
        .split(|c: char| c.is_whitespace() || c == ',')
        .find(|token| !token.is_empty())
        .and_then(|token| token.parse::<f64>().ok())
}

/// Formats `value` with `digits` significant digits in general notation.
///
/// Fixed notation is used when the decimal exponent lies in
/// `-4..digits`, scientific notation (`1.5e-05`) otherwise. Trailing zeros
/// are removed in both cases.
pub fn format_significant(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let digits = digits.max(1);
    let scientific = format!("{:.*e}", digits - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            sign,
            exponent.unsigned_abs()
        )
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}
