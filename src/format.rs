//! Rendering raw numeric cell values through number-format codes
//!
//! Covers what worksheets use in practice: `General`, fixed and grouped
//! decimals, percent, scientific, simple fractions, quoted literals,
//! `;`-separated sections and date/time codes on Excel serial dates.
//! Conditions (`[>100]`), colors (`[Red]`) and locale tags (`[$-409]`) are
//! recognised and skipped.

use crate::styles::{is_date_format, NumberFormat};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

/// Separators and date system used when a format applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Decimal separator, `.` by default
    pub decimal_separator: char,
    /// Grouping separator, `,` by default
    pub thousands_separator: char,
    /// Workbook uses the 1904 date system
    pub date_1904: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            decimal_separator: '.',
            thousands_separator: ',',
            date_1904: false,
        }
    }
}

impl FormatOptions {
    /// Separators for a two-letter language code (`EN`, `FR`, ...)
    ///
    /// Unknown codes fall back to the English separators.
    pub fn from_lang(lang: &str) -> Self {
        match lang.to_ascii_uppercase().as_str() {
            "FR" | "DE" | "ES" | "IT" | "PT" | "NL" => FormatOptions {
                decimal_separator: ',',
                thousands_separator: '\u{a0}',
                date_1904: false,
            },
            _ => FormatOptions::default(),
        }
    }

    /// Use the 1904 date system (builder style)
    pub fn with_date_1904(mut self, date_1904: bool) -> Self {
        self.date_1904 = date_1904;
        self
    }
}

/// Formats raw cell numbers through format codes
#[derive(Debug, Clone, Copy, Default)]
pub struct DataFormatter {
    options: FormatOptions,
}

impl DataFormatter {
    /// Create a formatter with the given options
    pub fn new(options: FormatOptions) -> Self {
        DataFormatter { options }
    }

    /// Options in effect
    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    /// Render `value` through `format`
    pub fn format_raw(&self, value: f64, format: NumberFormat<'_>) -> String {
        if !value.is_finite() {
            return value.to_string();
        }

        let sections = split_sections(format.code);
        let (section, auto_minus) = pick_section(&sections, value);
        let body = strip_brackets(section);

        if body.trim().eq_ignore_ascii_case("general") || body.trim() == "@" || body.trim().is_empty() {
            return self.general(value);
        }

        if format.is_date_format() && (is_date_format(section) || format.is_builtin()) {
            if let Some(text) = self.date(value, section) {
                return text;
            }
            return self.general(value);
        }

        let mut out = self.number(value.abs(), section);
        if auto_minus && value < 0.0 && out.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
            out.insert(0, '-');
        }
        out
    }

    /// `General`: integers as-is, up to 10 significant digits otherwise,
    /// scientific for very large or very small magnitudes
    pub fn general(&self, value: f64) -> String {
        if value == 0.0 {
            return "0".to_string();
        }
        let abs = value.abs();
        let text = if abs >= 1e11 || abs < 1e-9 {
            let s = format!("{:.5E}", value);
            let (mantissa, exp) = s.split_once('E').unwrap_or((s.as_str(), "0"));
            let mantissa = trim_fraction(mantissa);
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{}E{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
        } else if value.fract() == 0.0 {
            format!("{:.0}", value)
        } else {
            let magnitude = abs.log10().floor() as i32 + 1;
            let decimals = (10 - magnitude).clamp(0, 15) as usize;
            trim_fraction(&format!("{:.*}", decimals, round_half_away(value, decimals))).to_string()
        };

        if self.options.decimal_separator == '.' {
            text
        } else {
            text.replace('.', &self.options.decimal_separator.to_string())
        }
    }

    fn number(&self, abs: f64, section: &str) -> String {
        let layout = NumberLayout::parse(section);

        let mut v = abs;
        for _ in 0..layout.percent {
            v *= 100.0;
        }
        for _ in 0..layout.scale_thousands {
            v /= 1000.0;
        }

        let digits = if !layout.has_placeholders() {
            String::new()
        } else if let Some(exp_digits) = layout.exponent_digits {
            self.scientific(v, &layout, exp_digits)
        } else if layout.is_fraction() {
            self.fraction(v, &layout)
        } else {
            self.fixed(v, &layout)
        };

        format!("{}{}{}", layout.prefix, digits, layout.suffix)
    }

    fn fixed(&self, v: f64, layout: &NumberLayout) -> String {
        let rounded = round_half_away(v, layout.max_decimals);
        let text = format!("{:.*}", layout.max_decimals, rounded);
        let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));

        let mut out = self.integer_digits(int_part, layout);
        if layout.has_decimal_point {
            let mut frac = frac_part.to_string();
            while frac.len() > layout.min_decimals && frac.ends_with('0') {
                frac.pop();
            }
            out.push(self.options.decimal_separator);
            out.push_str(&frac);
        }
        out
    }

    fn integer_digits(&self, int_part: &str, layout: &NumberLayout) -> String {
        let mut digits = if int_part == "0" && layout.min_integer == 0 {
            String::new()
        } else {
            int_part.to_string()
        };
        while digits.len() < layout.min_integer {
            digits.insert(0, '0');
        }
        if layout.grouping {
            group_thousands(&digits, self.options.thousands_separator)
        } else {
            digits
        }
    }

    fn scientific(&self, v: f64, layout: &NumberLayout, exp_digits: usize) -> String {
        let int_width = layout.integer_placeholders.max(1) as i32;
        let mut exp = if v == 0.0 { 0 } else { v.log10().floor() as i32 };
        if int_width > 1 && layout.min_integer < layout.integer_placeholders {
            // engineering style: exponent is a multiple of the integer width
            exp = exp.div_euclid(int_width) * int_width;
        }
        let mut mantissa = v / 10f64.powi(exp);
        mantissa = round_half_away(mantissa, layout.max_decimals);
        if int_width == 1 && mantissa >= 10.0 {
            mantissa /= 10.0;
            exp += 1;
        }

        let mut out = self.fixed(mantissa, layout);
        out.push('E');
        if exp < 0 {
            out.push('-');
        } else if layout.exponent_plus {
            out.push('+');
        }
        let exp_text = exp.abs().to_string();
        for _ in exp_text.len()..exp_digits {
            out.push('0');
        }
        out.push_str(&exp_text);
        out
    }

    fn fraction(&self, v: f64, layout: &NumberLayout) -> String {
        let whole = if layout.integer_placeholders > 0 { v.trunc() } else { 0.0 };
        let rest = v - whole;

        let (mut num, den) = match layout.fixed_denominator {
            Some(den) => ((rest * den as f64).round() as u64, den),
            None => {
                let max_den = 10u64
                    .checked_pow(layout.fraction_digits as u32)
                    .map_or(u64::MAX, |p| p - 1);
                best_rational(rest, max_den)
            }
        };

        let mut whole = whole as u64;
        if num == den {
            whole += 1;
            num = 0;
        }

        let mut out = String::new();
        if layout.integer_placeholders > 0 && (whole > 0 || num == 0) {
            out.push_str(&whole.to_string());
        }
        if num > 0 {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!("{}/{}", num, den));
        }
        if out.is_empty() {
            out.push('0');
        }
        out
    }

    fn date(&self, serial: f64, section: &str) -> Option<String> {
        let tokens = tokenize_date(section);
        let has_ampm = tokens.iter().any(|t| matches!(t, DatePart::AmPm(_)));
        let sub_second_digits = tokens
            .iter()
            .find_map(|t| match t {
                DatePart::SubSecond(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0);

        let dt = serial_to_datetime(serial, self.options.date_1904, sub_second_digits)?;
        let mut out = String::new();

        for token in &tokens {
            match token {
                DatePart::Literal(s) => out.push_str(s),
                DatePart::Year(n) if *n <= 2 => out.push_str(&format!("{:02}", dt.year() % 100)),
                DatePart::Year(_) => out.push_str(&format!("{:04}", dt.year())),
                DatePart::Month(1) => out.push_str(&dt.month().to_string()),
                DatePart::Month(2) => out.push_str(&format!("{:02}", dt.month())),
                DatePart::Month(3) => out.push_str(&dt.format("%b").to_string()),
                DatePart::Month(5) => out.push_str(&dt.format("%B").to_string()[..1]),
                DatePart::Month(_) => out.push_str(&dt.format("%B").to_string()),
                DatePart::Day(1) => out.push_str(&dt.day().to_string()),
                DatePart::Day(2) => out.push_str(&format!("{:02}", dt.day())),
                DatePart::Day(3) => out.push_str(&dt.format("%a").to_string()),
                DatePart::Day(_) => out.push_str(&dt.format("%A").to_string()),
                DatePart::Hour(n) => {
                    let mut hour = dt.hour();
                    if has_ampm {
                        hour %= 12;
                        if hour == 0 {
                            hour = 12;
                        }
                    }
                    push_padded(&mut out, hour as u64, *n);
                }
                DatePart::Minute(n) => push_padded(&mut out, dt.minute() as u64, *n),
                DatePart::Second(n) => push_padded(&mut out, dt.second() as u64, *n),
                DatePart::SubSecond(n) => {
                    let millis = dt.nanosecond() / 1_000_000;
                    let frac = format!("{:03}", millis);
                    out.push(self.options.decimal_separator);
                    out.push_str(&frac[..(*n).min(3)]);
                }
                DatePart::Elapsed(unit, n) => {
                    let seconds = (serial * 86_400.0).round() as i64;
                    let value = match *unit {
                        'h' => seconds / 3600,
                        'm' => seconds / 60,
                        _ => seconds,
                    };
                    push_padded(&mut out, value.unsigned_abs(), *n);
                }
                DatePart::AmPm(long) => {
                    let pm = dt.hour() >= 12;
                    out.push_str(match (long, pm) {
                        (true, false) => "AM",
                        (true, true) => "PM",
                        (false, false) => "A",
                        (false, true) => "P",
                    });
                }
            }
        }
        Some(out)
    }
}

fn push_padded(out: &mut String, value: u64, width: usize) {
    let text = value.to_string();
    for _ in text.len()..width {
        out.push('0');
    }
    out.push_str(&text);
}

/// Excel serial date to calendar time
///
/// Serial 60 is the non-existent 1900-02-29 and renders as 1900-02-28.
pub fn serial_to_datetime(serial: f64, date_1904: bool, sub_second_digits: usize) -> Option<NaiveDateTime> {
    if serial < 0.0 || serial > 2_958_465.999_999 {
        return None;
    }
    let mut days = serial.floor() as i64;
    let day_fraction = serial - serial.floor();

    let base = if date_1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else {
        if days >= 60 {
            days -= 1;
        }
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    };

    let millis = if sub_second_digits > 0 {
        (day_fraction * 86_400_000.0).round() as i64
    } else {
        (day_fraction * 86_400.0).round() as i64 * 1000
    };

    let midnight = base.checked_add_signed(Duration::days(days))?.and_hms_opt(0, 0, 0)?;
    midnight.checked_add_signed(Duration::milliseconds(millis))
}

fn round_half_away(v: f64, decimals: usize) -> f64 {
    if decimals > 15 {
        return v;
    }
    let factor = 10f64.powi(decimals as i32);
    let scaled = v * factor;
    if !scaled.is_finite() || scaled.abs() >= 1e17 {
        return v;
    }
    scaled.round() / factor
}

/// Closest `num/den` to `x` (non-negative) with `den <= max_den`
///
/// Walks the continued fraction of `x`; when the next convergent's
/// denominator is too large, the best semiconvergent below the bound is
/// compared with the last convergent.
fn best_rational(x: f64, max_den: u64) -> (u64, u64) {
    let max_den = max_den.max(1);
    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let mut rest = x;

    for _ in 0..64 {
        if rest > 1e15 {
            break;
        }
        let a = rest.floor() as u64;
        let next = a
            .checked_mul(p1)
            .and_then(|p| p.checked_add(p0))
            .zip(a.checked_mul(q1).and_then(|q| q.checked_add(q0)));

        match next {
            Some((p2, q2)) if q2 <= max_den => {
                (p0, q0, p1, q1) = (p1, q1, p2, q2);
            }
            _ => {
                let k = (max_den - q0) / q1;
                let (ps, qs) = (k.saturating_mul(p1).saturating_add(p0), k * q1 + q0);
                let err = |p: u64, q: u64| (x - p as f64 / q as f64).abs();
                if err(ps, qs) < err(p1, q1) {
                    return (ps, qs);
                }
                return (p1, q1);
            }
        }

        let frac = rest - a as f64;
        if frac <= f64::EPSILON || (x - p1 as f64 / q1 as f64).abs() <= f64::EPSILON * x.max(1.0) {
            break;
        }
        rest = 1.0 / frac;
    }

    if q1 == 0 {
        return (x.round() as u64, 1);
    }
    (p1, q1)
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn group_thousands(digits: &str, separator: char) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let len = digits.len();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}

/// Split a format code on `;` outside quotes, escapes and brackets
fn split_sections(code: &str) -> Vec<&str> {
    let mut sections = Vec::with_capacity(4);
    let mut start = 0;
    let mut escaped = false;
    let mut in_quote = false;
    let mut in_bracket = false;

    for (idx, ch) in code.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '"' if !in_bracket => in_quote = !in_quote,
            _ if in_quote => {}
            '\\' => escaped = true,
            '[' => in_bracket = true,
            ']' => in_bracket = false,
            ';' if !in_bracket => {
                sections.push(&code[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    sections.push(&code[start..]);
    sections
}

/// Pick the section for `value`; the flag tells whether a minus sign must be added
fn pick_section<'a>(sections: &[&'a str], value: f64) -> (&'a str, bool) {
    match sections.len() {
        0 => ("General", true),
        1 => (sections[0], true),
        2 => {
            if value < 0.0 {
                (sections[1], false)
            } else {
                (sections[0], true)
            }
        }
        _ => {
            if value < 0.0 {
                (sections[1], false)
            } else if value == 0.0 {
                (sections[2], true)
            } else {
                (sections[0], true)
            }
        }
    }
}

fn strip_brackets(section: &str) -> String {
    let mut out = String::with_capacity(section.len());
    let mut depth = 0u32;
    for ch in section.chars() {
        match ch {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Numeric section layout: literals around one placeholder run
#[derive(Debug, Default)]
struct NumberLayout {
    prefix: String,
    suffix: String,
    integer_placeholders: usize,
    min_integer: usize,
    max_decimals: usize,
    min_decimals: usize,
    has_decimal_point: bool,
    grouping: bool,
    scale_thousands: usize,
    percent: usize,
    exponent_digits: Option<usize>,
    exponent_plus: bool,
    fraction_digits: usize,
    fixed_denominator: Option<u64>,
}

/// Widest `?/???` denominator honoured; wider codes are clamped
const MAX_FRACTION_DIGITS: usize = 15;

impl NumberLayout {
    fn has_placeholders(&self) -> bool {
        self.integer_placeholders > 0
            || self.max_decimals > 0
            || self.has_decimal_point
            || self.is_fraction()
    }

    fn is_fraction(&self) -> bool {
        self.fraction_digits > 0 || self.fixed_denominator.is_some()
    }

    fn parse(section: &str) -> Self {
        let mut layout = NumberLayout::default();
        let chars: Vec<char> = section.chars().collect();
        let mut seen_number = false;
        let mut after_point = false;
        let mut in_exponent = false;
        let mut in_fraction = false;
        let mut pending_commas = 0usize;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            let mut literal: Option<String> = None;
            match ch {
                '"' => {
                    let mut text = String::new();
                    i += 1;
                    while i < chars.len() && chars[i] != '"' {
                        text.push(chars[i]);
                        i += 1;
                    }
                    literal = Some(text);
                }
                '\\' => {
                    i += 1;
                    literal = chars.get(i).map(|c| c.to_string());
                }
                '_' => {
                    i += 1;
                    literal = Some(" ".to_string());
                }
                '*' => {
                    i += 1;
                }
                '[' => {
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                }
                '1'..='9' if in_fraction && layout.fraction_digits == 0 && layout.fixed_denominator.is_none() => {
                    // "# ?/16": a literal denominator
                    let mut den = 0u64;
                    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
                        den = den.saturating_mul(10).saturating_add(u64::from(d));
                        i += 1;
                    }
                    i -= 1;
                    layout.fixed_denominator = Some(den);
                }
                '0' | '#' | '?' => {
                    if pending_commas > 0 {
                        layout.grouping = true;
                        pending_commas = 0;
                    }
                    seen_number = true;
                    if in_exponent {
                        *layout.exponent_digits.get_or_insert(0) += 1;
                    } else if in_fraction {
                        layout.fraction_digits = (layout.fraction_digits + 1).min(MAX_FRACTION_DIGITS);
                    } else if after_point {
                        layout.max_decimals += 1;
                        if ch == '0' {
                            layout.min_decimals = layout.max_decimals;
                        }
                    } else {
                        layout.integer_placeholders += 1;
                        if ch == '0' || layout.min_integer > 0 {
                            layout.min_integer += 1;
                        }
                    }
                }
                '.' if !in_exponent && !after_point && (seen_number || next_is_placeholder(&chars, i)) => {
                    seen_number = true;
                    after_point = true;
                    layout.has_decimal_point = true;
                }
                ',' if seen_number && !in_exponent => pending_commas += 1,
                'E' | 'e' if seen_number && matches!(chars.get(i + 1), Some('+') | Some('-')) => {
                    in_exponent = true;
                    layout.exponent_plus = chars[i + 1] == '+';
                    layout.exponent_digits = Some(0);
                    i += 1;
                }
                '/' if seen_number && !after_point => {
                    // the digits before '/' are the numerator, not a whole part
                    in_fraction = true;
                    layout.integer_placeholders = layout.integer_placeholders.saturating_sub(1).min(1);
                    layout.min_integer = 0;
                }
                '%' => {
                    layout.percent += 1;
                    literal = Some("%".to_string());
                }
                ' ' if seen_number && in_fraction => {}
                ' ' if seen_number && next_is_placeholder(&chars, i) && !after_point => {
                    // "# ?/?" separates the whole part from the fraction
                }
                other => literal = Some(other.to_string()),
            }

            if let Some(text) = literal {
                if pending_commas > 0 {
                    layout.scale_thousands += pending_commas;
                    pending_commas = 0;
                }
                if seen_number {
                    layout.suffix.push_str(&text);
                } else {
                    layout.prefix.push_str(&text);
                }
            }
            i += 1;
        }

        layout.scale_thousands += pending_commas;
        if layout.is_fraction() && layout.integer_placeholders == 0 {
            layout.min_integer = 0;
        }
        layout
    }
}

fn next_is_placeholder(chars: &[char], i: usize) -> bool {
    matches!(chars.get(i + 1), Some('0') | Some('#') | Some('?'))
}

#[derive(Debug, Clone, PartialEq)]
enum DatePart {
    Literal(String),
    Year(usize),
    Month(usize),
    Day(usize),
    Hour(usize),
    Minute(usize),
    Second(usize),
    SubSecond(usize),
    Elapsed(char, usize),
    AmPm(bool),
}

fn tokenize_date(section: &str) -> Vec<DatePart> {
    let chars: Vec<char> = section.chars().collect();
    let mut parts = Vec::new();
    let mut i = 0;

    let run = |i: usize, target: char| -> usize {
        chars[i..]
            .iter()
            .take_while(|c| c.eq_ignore_ascii_case(&target))
            .count()
    };

    while i < chars.len() {
        let ch = chars[i];
        let lower = ch.to_ascii_lowercase();
        let rest: String = chars[i..].iter().take(5).collect::<String>().to_ascii_uppercase();

        if rest.starts_with("AM/PM") {
            parts.push(DatePart::AmPm(true));
            i += 5;
            continue;
        }
        if rest.starts_with("A/P") {
            parts.push(DatePart::AmPm(false));
            i += 3;
            continue;
        }

        match lower {
            '"' => {
                let mut text = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    text.push(chars[i]);
                    i += 1;
                }
                parts.push(DatePart::Literal(text));
                i += 1;
            }
            '\\' => {
                if let Some(c) = chars.get(i + 1) {
                    parts.push(DatePart::Literal(c.to_string()));
                }
                i += 2;
            }
            '_' => {
                parts.push(DatePart::Literal(" ".to_string()));
                i += 2;
            }
            '*' => i += 2,
            '[' => {
                let end = chars[i..].iter().position(|&c| c == ']').map_or(chars.len(), |p| i + p);
                let inner: String = chars[i + 1..end].iter().collect::<String>().to_ascii_lowercase();
                if let Some(unit) = inner.chars().next().filter(|u| matches!(u, 'h' | 'm' | 's')) {
                    if inner.chars().all(|c| c == unit) {
                        parts.push(DatePart::Elapsed(unit, inner.len()));
                    }
                }
                i = end + 1;
            }
            'y' | 'd' | 'h' | 's' | 'm' => {
                let n = run(i, lower);
                parts.push(match lower {
                    'y' => DatePart::Year(n),
                    'd' => DatePart::Day(n),
                    'h' => DatePart::Hour(n),
                    's' => DatePart::Second(n),
                    _ => DatePart::Month(n),
                });
                i += n;
            }
            '.' if matches!(parts.last(), Some(DatePart::Second(_)) | Some(DatePart::Elapsed('s', _)))
                && chars.get(i + 1) == Some(&'0') =>
            {
                let n = run(i + 1, '0');
                parts.push(DatePart::SubSecond(n));
                i += n + 1;
            }
            _ => {
                parts.push(DatePart::Literal(ch.to_string()));
                i += 1;
            }
        }
    }

    resolve_minutes(&mut parts);
    parts
}

/// `m`/`mm` means minutes right after an hour or right before a second
fn resolve_minutes(parts: &mut [DatePart]) {
    let fields: Vec<usize> = parts
        .iter()
        .enumerate()
        .filter(|(_, p)| !matches!(p, DatePart::Literal(_)))
        .map(|(i, _)| i)
        .collect();

    for (pos, &idx) in fields.iter().enumerate() {
        let DatePart::Month(n) = parts[idx] else { continue };
        if n > 2 {
            continue;
        }
        let after_hour = pos > 0
            && matches!(parts[fields[pos - 1]], DatePart::Hour(_) | DatePart::Elapsed('h', _));
        let before_second = fields
            .get(pos + 1)
            .is_some_and(|&next| matches!(parts[next], DatePart::Second(_) | DatePart::Elapsed('s', _)));
        if after_hour || before_second {
            parts[idx] = DatePart::Minute(n);
        }
    }
}
