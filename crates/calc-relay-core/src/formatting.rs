//! Formatting utilities for relay messages.

/// Render a number the way a JavaScript runtime prints it.
///
/// Integers have no fractional part, non-finite values use `Infinity`/`NaN`,
/// and magnitudes outside `[1e-6, 1e21)` switch to exponent form with an
/// explicit sign (`1e+21`, `1.5e-7`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        // Also covers -0.
        return "0".to_string();
    }

    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{n}");
    }

    let exp = format!("{n:e}");
    match exp.split_once('e') {
        Some((mantissa, e)) if !e.starts_with('-') => format!("{mantissa}e+{e}"),
        _ => exp,
    }
}

/// Relay text for one applied operation.
///
/// With `show_process` the whole equation is shown; otherwise only the new value.
pub fn format_result(old: f64, token: char, operand: f64, new: f64, show_process: bool) -> String {
    if show_process {
        format!(
            "{} {} {} = {}",
            format_number(old),
            token,
            format_number(operand),
            format_number(new)
        )
    } else {
        format!("当前值: {}", format_number(new))
    }
}
