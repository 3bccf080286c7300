//! Number rendering and parsing
//!
//! INDI number elements carry a printf-style format. The `m` conversion is an
//! INDI extension for sexagesimal values (hours or degrees), where `%<w>.<f>m`
//! selects the precision by `f`:
//!
//! | f | output      |
//! |---|-------------|
//! | 3 | `H:MM`      |
//! | 5 | `H:MM.m`    |
//! | 6 | `H:MM:SS`   |
//! | 8 | `H:MM:SS.s` |
//! | 9 | `H:MM:SS.ss`|
//!
//! Width is parsed but never used for padding.

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Directive {
    plus: bool,
    space: bool,
    alternate: bool,
    precision: Option<usize>,
    conversion: char,
}

/// Split `format` into literal prefix, conversion directive and literal suffix
fn parse_directive(format: &str) -> Option<(&str, Directive, &str)> {
    let start = format.find('%')?;
    let rest = &format[start + 1..];
    let mut directive = Directive::default();
    let mut chars = rest.char_indices().peekable();

    while let Some(&(_, c)) = chars.peek() {
        match c {
            '+' => directive.plus = true,
            ' ' => directive.space = true,
            '#' => directive.alternate = true,
            '-' | '0' => {}
            _ => break,
        }
        chars.next();
    }
    while matches!(chars.peek(), Some(&(_, c)) if c.is_ascii_digit()) {
        chars.next();
    }
    if matches!(chars.peek(), Some(&(_, '.'))) {
        chars.next();
        let mut precision = 0usize;
        while let Some(&(_, c)) = chars.peek() {
            match c.to_digit(10) {
                Some(d) => precision = precision * 10 + d as usize,
                None => break,
            }
            chars.next();
        }
        directive.precision = Some(precision);
    }
    // length modifiers are accepted and ignored
    while matches!(chars.peek(), Some(&(_, 'l' | 'h' | 'L'))) {
        chars.next();
    }
    let (idx, conversion) = chars.next()?;
    if !matches!(conversion, 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'd' | 'i' | 'm') {
        return None;
    }
    directive.conversion = conversion;
    let end = start + 1 + idx + conversion.len_utf8();
    Some((&format[..start], directive, &format[end..]))
}

/// Render `value` according to an INDI number format
pub fn format_number(value: f64, format: &str) -> String {
    let Some((prefix, directive, suffix)) = parse_directive(format) else {
        return value.to_string();
    };
    if !value.is_finite() {
        return format!("{}{}{}", prefix, value, suffix);
    }
    let body = match directive.conversion {
        'm' => sexagesimal(value, directive.precision.unwrap_or(6)),
        'f' | 'F' => format!("{:.*}", directive.precision.unwrap_or(6), value),
        'e' | 'E' => {
            let s = exponential(value, directive.precision.unwrap_or(6));
            if directive.conversion == 'E' {
                s.to_uppercase()
            } else {
                s
            }
        }
        'g' | 'G' => {
            let s = general(value, directive.precision.unwrap_or(6), directive.alternate);
            if directive.conversion == 'G' {
                s.to_uppercase()
            } else {
                s
            }
        }
        _ => format!("{}", value.round() as i64),
    };
    let sign = if body.starts_with('-') || directive.conversion == 'm' {
        ""
    } else if directive.plus {
        "+"
    } else if directive.space {
        " "
    } else {
        ""
    };
    format!("{}{}{}{}", prefix, sign, body, suffix)
}

/// `H:MM[:SS][.frac]` with the last unit rounded
fn sexagesimal(value: f64, fraction: usize) -> String {
    // units per hour and the layout of the trailing fields
    let (scale, with_seconds, decimals): (f64, bool, u32) = match fraction {
        0..=3 => (60.0, false, 0),
        4 | 5 => (600.0, false, 1),
        6 | 7 => (3600.0, true, 0),
        8 => (36000.0, true, 1),
        _ => (360000.0, true, 2),
    };
    let total = (value.abs() * scale).round() as u64;
    let sign = if value < 0.0 && total != 0 { "-" } else { "" };
    let sub = 10u64.pow(decimals);

    let per_minute = if with_seconds { 60 * sub } else { sub };
    let per_hour = 60 * per_minute;
    let hours = total / per_hour;
    let minutes = (total % per_hour) / per_minute;
    let rest = total % per_minute;

    if with_seconds {
        let seconds = rest / sub;
        let frac = rest % sub;
        match decimals {
            0 => format!("{}{}:{:02}:{:02}", sign, hours, minutes, seconds),
            d => format!(
                "{}{}:{:02}:{:02}.{:0width$}",
                sign,
                hours,
                minutes,
                seconds,
                frac,
                width = d as usize
            ),
        }
    } else {
        match decimals {
            0 => format!("{}{}:{:02}", sign, hours, minutes),
            _ => format!("{}{}:{:02}.{}", sign, hours, minutes, rest),
        }
    }
}

/// C-style `%e`: mantissa, `e`, signed exponent of at least two digits
fn exponential(value: f64, precision: usize) -> String {
    let s = format!("{:.*e}", precision, value);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => s,
    }
}

/// C-style `%g`
fn general(value: f64, precision: usize, alternate: bool) -> String {
    let p = precision.max(1);
    if value == 0.0 {
        return if alternate {
            format!("{:.*}", p - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    // exponent after rounding to p significant digits
    let rounded = format!("{:.*e}", p - 1, value);
    let exp: i32 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    let s = if exp < -4 || exp >= p as i32 {
        exponential(value, p - 1)
    } else {
        format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, value)
    };
    if alternate {
        return s;
    }
    strip_trailing_zeros(&s)
}

fn strip_trailing_zeros(s: &str) -> String {
    let (mantissa, exp) = match s.find('e') {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    if !mantissa.contains('.') {
        return s.to_string();
    }
    let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", trimmed, exp)
}

/// Parse decimal or sexagesimal text ("12:30:00", "-0 30", "12.5")
pub fn parse_sexagesimal(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let parts: Vec<&str> = text
        .split(|c: char| c == ':' || c == ';' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let negative = parts[0].starts_with('-');
    let mut total = 0.0;
    let mut divisor = 1.0;
    for part in &parts {
        let v: f64 = part.parse().ok()?;
        if !v.is_finite() {
            return None;
        }
        total += v.abs() / divisor;
        divisor *= 60.0;
    }
    Some(if negative { -total } else { total })
}
