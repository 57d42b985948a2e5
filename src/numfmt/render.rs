//! Rendering of numeric cell values through ECMA-376 format codes.
//!
//! A code holds up to four clauses separated by `;`
//! (positive; negative; zero; text). Rendering is locale-neutral:
//! period decimal separator, comma grouping only when the code asks
//! for it.

use chrono::{Datelike, Timelike};

use super::Formatter;

const MONTHS_ABBR: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const MONTHS_FULL: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];
const DAYS_ABBR: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const DAYS_FULL: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Split a format code into clauses on unquoted, unescaped `;`.
pub(super) fn split_clauses(code: &str) -> Vec<&str> {
    let mut clauses = Vec::with_capacity(2);
    let mut start = 0;
    let mut in_quotes = false;
    let mut escape = false;
    for (i, c) in code.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                clauses.push(&code[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    clauses.push(&code[start..]);
    clauses
}

/// Render a number through a non-date format code.
pub(super) fn render_number(v: f64, code: &str) -> String {
    if code == "General" || code == "@" {
        return render_general(v);
    }
    let clauses = split_clauses(code);
    let mut value = v;
    let mut prefix_minus = false;
    let clause = if v < 0.0 {
        value = -v;
        if clauses.len() >= 2 {
            clauses[1]
        } else {
            prefix_minus = true;
            clauses[0]
        }
    } else if v == 0.0 && clauses.len() >= 3 {
        clauses[2]
    } else {
        clauses[0]
    };
    let out = render_clause(value, clause);
    if prefix_minus {
        format!("-{out}")
    } else {
        out
    }
}

/// Shortest locale-neutral rendering, used by `General`.
pub(super) fn render_general(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[derive(Default)]
struct ClauseSpec {
    percent: bool,
    group: bool,
    int_min: usize,
    dec_max: usize,
    dec_min: usize,
    has_placeholder: bool,
    /// (sign always shown, minimum exponent digits)
    sci: Option<(bool, usize)>,
}

fn analyze_clause(clause: &str) -> ClauseSpec {
    let mut spec = ClauseSpec::default();
    let mut in_frac = false;
    let mut in_exp = false;
    let mut chars = clause.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                }
            }
            '\\' | '_' | '*' => {
                chars.next();
            }
            '[' => {
                for b in chars.by_ref() {
                    if b == ']' {
                        break;
                    }
                }
            }
            '0' | '#' | '?' => {
                spec.has_placeholder = true;
                if in_exp {
                    if let Some((_, digits)) = spec.sci.as_mut() {
                        *digits += 1;
                    }
                } else if in_frac {
                    spec.dec_max += 1;
                    if c == '0' {
                        spec.dec_min += 1;
                    }
                } else if c == '0' {
                    spec.int_min += 1;
                }
            }
            '.' => in_frac = true,
            ',' if spec.has_placeholder && !in_frac => spec.group = true,
            '%' => spec.percent = true,
            'E' | 'e' => {
                if let Some(&sign) = chars.peek()
                    && (sign == '+' || sign == '-')
                {
                    chars.next();
                    spec.sci = Some((sign == '+', 0));
                    in_exp = true;
                }
            }
            _ => {}
        }
    }
    spec
}

fn format_fixed(v: f64, spec: &ClauseSpec) -> String {
    let s = format!("{:.*}", spec.dec_max, v);
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (s, String::new()),
    };
    let mut int_digits = int_part;
    while int_digits.len() < spec.int_min {
        int_digits.insert(0, '0');
    }
    if spec.group {
        int_digits = group_thousands(&int_digits);
    }
    let mut frac = frac_part;
    while frac.len() > spec.dec_min && frac.ends_with('0') {
        frac.pop();
    }
    if frac.is_empty() {
        int_digits
    } else {
        format!("{int_digits}.{frac}")
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let n = digits.len();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (n - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn format_scientific(v: f64, spec: &ClauseSpec) -> String {
    let (always_sign, min_digits) = spec.sci.unwrap_or((true, 2));
    if v == 0.0 {
        let zeros = "0".repeat(min_digits.max(1));
        return format!("{:.*}E+{}", spec.dec_max, 0.0, zeros);
    }
    let mut exp = v.abs().log10().floor() as i32;
    let mut mantissa = v / 10f64.powi(exp);
    // rounding the mantissa can carry it to 10.0
    let rounded = format!("{:.*}", spec.dec_max, mantissa);
    if rounded.parse::<f64>().map(f64::abs).unwrap_or(0.0) >= 10.0 {
        exp += 1;
        mantissa = v / 10f64.powi(exp);
    }
    let sign = if exp < 0 {
        "-"
    } else if always_sign {
        "+"
    } else {
        ""
    };
    let mut digits = exp.unsigned_abs().to_string();
    while digits.len() < min_digits {
        digits.insert(0, '0');
    }
    format!("{:.*}E{}{}", spec.dec_max, mantissa, sign, digits)
}

fn render_clause(v: f64, clause: &str) -> String {
    let spec = analyze_clause(clause);
    let scaled = if spec.percent { v * 100.0 } else { v };
    let number = if spec.sci.is_some() {
        format_scientific(scaled, &spec)
    } else {
        format_fixed(scaled, &spec)
    };

    let mut out = String::with_capacity(clause.len() + number.len());
    let mut emitted = false;
    let mut chars = clause.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                    out.push(q);
                }
            }
            '\\' => {
                if let Some(n) = chars.next() {
                    out.push(n);
                }
            }
            '_' => {
                chars.next();
                out.push(' ');
            }
            '*' => {
                chars.next();
            }
            '[' => {
                for b in chars.by_ref() {
                    if b == ']' {
                        break;
                    }
                }
            }
            '0' | '#' | '?' => {
                if !emitted {
                    out.push_str(&number);
                    emitted = true;
                }
                // swallow the rest of the contiguous placeholder run,
                // including grouping commas, the decimal point and any
                // exponent part
                while let Some(&n) = chars.peek() {
                    match n {
                        '0' | '#' | '?' | ',' | '.' => {
                            chars.next();
                        }
                        'E' | 'e' => {
                            chars.next();
                            if let Some(&s) = chars.peek()
                                && (s == '+' || s == '-')
                            {
                                chars.next();
                            }
                        }
                        _ => break,
                    }
                }
            }
            '%' => out.push('%'),
            '@' => {}
            _ => out.push(c),
        }
    }
    out
}

/// One token of a date/time format clause.
enum DateTok {
    Lit(String),
    /// run of y/m/d/h/s with its length; `m` resolved later
    Field(char, usize),
    Minutes(usize),
    /// elapsed-time block, `[h]`/`[m]`/`[s]` with run length
    Elapsed(char, usize),
    AmPm(bool),
    /// fractional-second digits after `s.`
    Frac(usize),
}

fn tokenize_date(clause: &str) -> Vec<DateTok> {
    let mut toks: Vec<DateTok> = Vec::new();
    let chars: Vec<char> = clause.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                i += 1;
                let mut lit = String::new();
                while i < chars.len() && chars[i] != '"' {
                    lit.push(chars[i]);
                    i += 1;
                }
                i += 1;
                toks.push(DateTok::Lit(lit));
            }
            '\\' => {
                if i + 1 < chars.len() {
                    toks.push(DateTok::Lit(chars[i + 1].to_string()));
                }
                i += 2;
            }
            '[' => {
                let mut block = String::new();
                i += 1;
                while i < chars.len() && chars[i] != ']' {
                    block.push(chars[i]);
                    i += 1;
                }
                i += 1;
                let lower = block.to_ascii_lowercase();
                if !lower.is_empty()
                    && lower.chars().all(|b| b == 'h' || b == 'm' || b == 's')
                {
                    toks.push(DateTok::Elapsed(
                        lower.chars().next().unwrap_or('h'),
                        lower.len(),
                    ));
                }
            }
            'A' | 'a' => {
                let rest: String = chars[i..].iter().collect::<String>().to_ascii_uppercase();
                if rest.starts_with("AM/PM") {
                    toks.push(DateTok::AmPm(true));
                    i += 5;
                } else if rest.starts_with("A/P") {
                    toks.push(DateTok::AmPm(false));
                    i += 3;
                } else {
                    toks.push(DateTok::Lit(c.to_string()));
                    i += 1;
                }
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => {
                let lower = c.to_ascii_lowercase();
                let mut len = 0;
                while i < chars.len() && chars[i].to_ascii_lowercase() == lower {
                    len += 1;
                    i += 1;
                }
                toks.push(DateTok::Field(lower, len));
                // fractional seconds directly after a seconds run
                if lower == 's' && i < chars.len() && chars[i] == '.' {
                    let mut digits = 0;
                    let mut j = i + 1;
                    while j < chars.len() && chars[j] == '0' {
                        digits += 1;
                        j += 1;
                    }
                    if digits > 0 {
                        toks.push(DateTok::Frac(digits));
                        i = j;
                    }
                }
            }
            _ => {
                toks.push(DateTok::Lit(c.to_string()));
                i += 1;
            }
        }
    }

    // resolve m runs: minutes when the nearest field before is hours or
    // the nearest field after is seconds, months otherwise
    let fields: Vec<(usize, char)> = toks
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t {
            DateTok::Field(c, _) | DateTok::Elapsed(c, _) => Some((i, *c)),
            _ => None,
        })
        .collect();
    for fi in 0..fields.len() {
        let (idx, kind) = fields[fi];
        if kind != 'm' {
            continue;
        }
        let prev = fi.checked_sub(1).map(|p| fields[p].1);
        let next = fields.get(fi + 1).map(|n| n.1);
        let minutes = prev == Some('h') || next == Some('s');
        if minutes && let DateTok::Field(_, len) = &toks[idx] {
            let len = *len;
            toks[idx] = DateTok::Minutes(len);
        }
    }
    toks
}

/// Render a serial date through a date/time format clause.
pub(super) fn render_date(fmt: &Formatter, serial: f64, code: &str) -> String {
    let clause = *split_clauses(code).first().unwrap_or(&code);

    // calendar parts; the 1900 phantom leap day renders as written in
    // the file even though no real calendar holds it
    let phantom = !fmt.date1904() && (60.0..61.0).contains(&serial);
    let (year, month, day, weekday, hour, minute, second) = if phantom {
        let secs = ((serial - 60.0) * 86400.0).round() as u32;
        (1900, 2, 29, 4usize, secs / 3600, (secs / 60) % 60, secs % 60)
    } else {
        match fmt.serial_to_datetime(serial) {
            Some(dt) => (
                dt.year(),
                dt.month(),
                dt.day(),
                dt.weekday().num_days_from_sunday() as usize,
                dt.hour(),
                dt.minute(),
                dt.second(),
            ),
            None => return render_general(serial),
        }
    };

    let toks = tokenize_date(clause);
    let ampm = toks.iter().any(|t| matches!(t, DateTok::AmPm(_)));
    let mut out = String::with_capacity(clause.len());
    for tok in &toks {
        match tok {
            DateTok::Lit(s) => out.push_str(s),
            DateTok::Field('y', len) => {
                if *len > 2 {
                    out.push_str(&format!("{year:04}"));
                } else {
                    out.push_str(&format!("{:02}", year.rem_euclid(100)));
                }
            }
            DateTok::Field('m', len) => match *len {
                1 => out.push_str(&month.to_string()),
                2 => out.push_str(&format!("{month:02}")),
                3 => out.push_str(MONTHS_ABBR[(month - 1) as usize]),
                _ => out.push_str(MONTHS_FULL[(month - 1) as usize]),
            },
            DateTok::Field('d', len) => match *len {
                1 => out.push_str(&day.to_string()),
                2 => out.push_str(&format!("{day:02}")),
                3 => out.push_str(DAYS_ABBR[weekday]),
                _ => out.push_str(DAYS_FULL[weekday]),
            },
            DateTok::Field('h', len) => {
                let h = if ampm {
                    match hour % 12 {
                        0 => 12,
                        other => other,
                    }
                } else {
                    hour
                };
                if *len > 1 {
                    out.push_str(&format!("{h:02}"));
                } else {
                    out.push_str(&h.to_string());
                }
            }
            DateTok::Field('s', len) => {
                if *len > 1 {
                    out.push_str(&format!("{second:02}"));
                } else {
                    out.push_str(&second.to_string());
                }
            }
            DateTok::Field(_, _) => {}
            DateTok::Minutes(len) => {
                if *len > 1 {
                    out.push_str(&format!("{minute:02}"));
                } else {
                    out.push_str(&minute.to_string());
                }
            }
            DateTok::Elapsed(kind, len) => {
                let total = match *kind {
                    'h' => (serial * 24.0).floor() as i64,
                    'm' => (serial * 1440.0).floor() as i64,
                    _ => (serial * 86400.0).round() as i64,
                };
                out.push_str(&format!("{:0width$}", total, width = *len));
            }
            DateTok::AmPm(long) => {
                let half = if hour >= 12 { "PM" } else { "AM" };
                if *long {
                    out.push_str(half);
                } else {
                    out.push_str(&half[..1]);
                }
            }
            DateTok::Frac(digits) => {
                out.push('.');
                out.push_str(&"0".repeat(*digits));
            }
        }
    }
    out
}
