//! Number format codes and cell rendering shared by the xls and xlsx
//! decoders.
//!
//! A workbook carries three layers of format information: built-in
//! ECMA-376 format IDs (0-49), custom FORMAT/`<numFmt>` overlays keyed
//! by the same ID space, and an XF table mapping a cell's style index
//! to a format ID. [`Formatter`] owns all three and renders typed cell
//! values to locale-neutral strings.

mod render;

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::table::{Value, ValueType};

/// Built-in number formats defined by ECMA-376 part 1, §18.8.30.
/// IDs 14-22 and 45-47 are date/time formats.
static BUILTIN_FORMATS: phf::Map<u16, &'static str> = phf::phf_map! {
    0u16 => "General",
    1u16 => "0",
    2u16 => "0.00",
    3u16 => "#,##0",
    4u16 => "#,##0.00",
    9u16 => "0%",
    10u16 => "0.00%",
    11u16 => "0.00E+00",
    12u16 => "# ?/?",
    13u16 => "# ??/??",
    14u16 => "m/d/yyyy",
    15u16 => "d-mmm-yy",
    16u16 => "d-mmm",
    17u16 => "mmm-yy",
    18u16 => "h:mm AM/PM",
    19u16 => "h:mm:ss AM/PM",
    20u16 => "h:mm",
    21u16 => "h:mm:ss",
    22u16 => "m/d/yy h:mm",
    37u16 => "#,##0 ;(#,##0)",
    38u16 => "#,##0 ;[Red](#,##0)",
    39u16 => "#,##0.00;(#,##0.00)",
    40u16 => "#,##0.00;[Red](#,##0.00)",
    45u16 => "mm:ss",
    46u16 => "[h]:mm:ss",
    47u16 => "mmss.0",
    48u16 => "##0.0E+0",
    49u16 => "@",
};

/// Formats and type-infers cell values for one workbook.
///
/// Immutable after workbook globals are parsed; derived sheets read it
/// concurrently through an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct Formatter {
    /// Custom format codes keyed by format ID, overlaid on the built-ins.
    formats: HashMap<u16, String>,
    /// XF index -> format ID, in workbook order.
    xfs: Vec<u16>,
    /// 1904 epoch mode flag from workbook globals.
    date1904: bool,
}

impl Formatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a custom format code. Later insertions win.
    pub fn add_format(&mut self, id: u16, code: &str) {
        self.formats.insert(id, code.to_string());
    }

    /// Append an XF entry mapping the next XF index to `format_id`.
    pub fn add_xf(&mut self, format_id: u16) {
        self.xfs.push(format_id);
    }

    pub fn set_date1904(&mut self, enabled: bool) {
        self.date1904 = enabled;
    }

    pub fn date1904(&self) -> bool {
        self.date1904
    }

    pub fn xf_count(&self) -> usize {
        self.xfs.len()
    }

    /// Format code string for an XF index. Unknown indexes fall back to
    /// `General`, matching how consumers treat unstyled cells.
    pub fn format_code(&self, xf: u16) -> &str {
        let id = match self.xfs.get(xf as usize) {
            Some(&id) => id,
            None => return "General",
        };
        self.code_for_id(id)
    }

    /// Format code string for a raw format ID.
    pub fn code_for_id(&self, id: u16) -> &str {
        if let Some(code) = self.formats.get(&id) {
            return code;
        }
        BUILTIN_FORMATS.get(&id).copied().unwrap_or("General")
    }

    /// Derive the semantic type of a cell from its value and the format
    /// code attached to its XF index.
    pub fn infer(&self, value: &Value, xf: u16) -> ValueType {
        match value {
            Value::Blank => ValueType::Blank,
            Value::Bool(_) => ValueType::Boolean,
            Value::Text(_) => ValueType::Text,
            Value::Merged(_) => ValueType::Text,
            Value::Hyperlink { .. } => ValueType::Hyperlink,
            Value::Int(_) => {
                if is_date_code(self.format_code(xf)) {
                    ValueType::Date
                } else {
                    ValueType::Integer
                }
            }
            Value::Float(f) => {
                let code = self.format_code(xf);
                if is_date_code(code) {
                    ValueType::Date
                } else if f.fract() == 0.0 && is_integral_code(code) {
                    ValueType::Integer
                } else {
                    ValueType::Float
                }
            }
        }
    }

    /// Render a cell value through the format code at `xf`.
    pub fn render(&self, value: &Value, xf: u16) -> String {
        match value {
            Value::Blank => String::new(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Text(s) => s.clone(),
            Value::Merged(glyph) => (*glyph).to_string(),
            Value::Hyperlink { display, target } => {
                if display.is_empty() { target } else { display }.clone()
            }
            Value::Int(i) => self.render_number(*i as f64, xf),
            Value::Float(f) => self.render_number(*f, xf),
        }
    }

    fn render_number(&self, v: f64, xf: u16) -> String {
        let code = self.format_code(xf);
        if is_date_code(code) {
            render::render_date(self, v, code)
        } else {
            render::render_number(v, code)
        }
    }

    /// Convert a serial date to a datetime in this workbook's epoch mode.
    ///
    /// 1900 mode carries the legacy leap-year quirk: serial 60 is the
    /// phantom 1900-02-29, which has no `chrono` representation and
    /// collapses onto 1900-02-28 here, although date rendering still
    /// shows the phantom day. Serials 61 and up are shifted past the
    /// phantom day.
    pub fn serial_to_datetime(&self, serial: f64) -> Option<NaiveDateTime> {
        let mut days = serial.floor() as i64;
        let secs = ((serial - serial.floor()) * 86400.0).round() as i64;
        let base = if self.date1904 {
            NaiveDate::from_ymd_opt(1904, 1, 1)?
        } else if days >= 61 {
            NaiveDate::from_ymd_opt(1899, 12, 30)?
        } else {
            if days == 60 {
                days = 59;
            }
            NaiveDate::from_ymd_opt(1899, 12, 31)?
        };
        let date = base.checked_add_signed(TimeDelta::days(days))?;
        let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
        Some(date.and_time(midnight) + TimeDelta::seconds(secs))
    }

    /// Inverse of [`serial_to_datetime`](Self::serial_to_datetime) in
    /// the same epoch mode, exact to the second.
    pub fn datetime_to_serial(&self, dt: &NaiveDateTime) -> f64 {
        let date = dt.date();
        let base = if self.date1904 {
            NaiveDate::from_ymd_opt(1904, 1, 1).unwrap_or(date)
        } else if date >= NaiveDate::from_ymd_opt(1900, 3, 1).unwrap_or(date) {
            NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(date)
        } else {
            NaiveDate::from_ymd_opt(1899, 12, 31).unwrap_or(date)
        };
        let days = (date - base).num_days() as f64;
        let secs = dt.time().num_seconds_from_midnight() as f64;
        days + secs / 86400.0
    }
}

/// True if the code renders a serial number as a date or time.
///
/// Date letters are significant only outside quoted runs and outside
/// `[...]` blocks (so `[Red]` does not read as a day token), and only
/// when the code has no general digit placeholders. A `0` after a `.`
/// is allowed: it denotes fractional seconds (`mmss.0`).
pub fn is_date_code(code: &str) -> bool {
    if code == "General" {
        return false;
    }
    let mut has_date_letter = false;
    let mut after_point = false;
    let mut chars = code.chars().peekable();
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
                // elapsed-time blocks ([h], [mm], [s]) count as date
                // tokens; color and condition blocks do not
                let mut block = String::new();
                for b in chars.by_ref() {
                    if b == ']' {
                        break;
                    }
                    block.push(b);
                }
                let lower = block.to_ascii_lowercase();
                if !lower.is_empty()
                    && lower.chars().all(|b| b == 'h' || b == 'm' || b == 's')
                {
                    has_date_letter = true;
                }
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => {
                has_date_letter = true;
            }
            'a' | 'A' | 'p' | 'P' | '/' | ':' | ' ' | '-' | ',' => {}
            '.' => after_point = true,
            '0' => {
                if !after_point {
                    return false;
                }
            }
            '#' | '?' | '@' | 'E' | 'e' | '%' => return false,
            _ => {}
        }
    }
    has_date_letter
}

/// True if the code renders integral values without a fraction:
/// `General` or a code whose decimal placeholders are absent.
fn is_integral_code(code: &str) -> bool {
    if code == "General" {
        return true;
    }
    let mut chars = code.chars().peekable();
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
            '.' | 'E' | 'e' | '%' | '@' => return false,
            ';' => break,
            _ => {}
        }
    }
    true
}
