//! Delimited plain-text backend.
//!
//! [`Table`] adapts rows that are already split into fields onto the
//! Collection contract: every non-empty cell is a string, every format
//! is `General`, and `scan` parses the common primitives. A thin
//! content-probing opener tokenizes tab- or comma-separated files so
//! the default registry has a text fallback.

use std::any::Any;
use std::fs;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::errors::{Error, Result};
use crate::registry::Probe;
use crate::table::{Collection, Source, ValueType};

/// A single delimited-text table. The source and its only collection
/// are the same object: `get` answers any name with the table itself.
#[derive(Debug)]
pub struct Table {
    name: String,
    rows: Vec<Vec<String>>,
    cur: isize,
}

impl Table {
    /// Wrap rows that are already tokenized into fields.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Table {
            name: name.into(),
            rows,
            cur: -1,
        }
    }

    fn current(&self) -> Option<&[String]> {
        if self.cur < 0 {
            return None;
        }
        self.rows.get(self.cur as usize).map(|r| r.as_slice())
    }
}

impl Source for Table {
    fn list(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn get(&mut self, _name: &str) -> Result<&mut dyn Collection> {
        self.cur = -1;
        Ok(self)
    }

    fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

impl Collection for Table {
    fn next_row(&mut self) -> bool {
        self.cur += 1;
        (self.cur as usize) < self.rows.len()
    }

    fn strings(&self) -> Vec<String> {
        self.current().map(|r| r.to_vec()).unwrap_or_default()
    }

    fn types(&self) -> Vec<ValueType> {
        match self.current() {
            Some(row) => row
                .iter()
                .map(|v| {
                    if v.is_empty() {
                        ValueType::Blank
                    } else {
                        ValueType::Text
                    }
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn formats(&self) -> Vec<String> {
        match self.current() {
            Some(row) => row.iter().map(|_| "General".to_string()).collect(),
            None => Vec::new(),
        }
    }

    fn scan(&self, dests: &mut [&mut dyn Any]) -> Result<()> {
        let row = self.current().ok_or(Error::Scan {
            col: 0,
            message: "no current row; call next_row first".to_string(),
        })?;
        if row.len() != dests.len() {
            return Err(Error::Scan {
                col: 0,
                message: format!("expected {} scan destinations, got {}", row.len(), dests.len()),
            });
        }
        for (col, (field, dest)) in row.iter().zip(dests.iter_mut()).enumerate() {
            scan_field(col, field, *dest)?;
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn err(&self) -> Option<&Error> {
        None
    }
}

fn scan_field(col: usize, field: &str, dest: &mut dyn Any) -> Result<()> {
    if let Some(out) = dest.downcast_mut::<bool>() {
        *out = matches!(
            field.to_ascii_lowercase().as_str(),
            "1" | "t" | "true" | "y" | "yes"
        );
        return Ok(());
    }
    if let Some(out) = dest.downcast_mut::<i64>() {
        *out = field.parse().map_err(|e: std::num::ParseIntError| Error::Scan {
            col,
            message: e.to_string(),
        })?;
        return Ok(());
    }
    if let Some(out) = dest.downcast_mut::<f64>() {
        *out = field.parse().map_err(|e: std::num::ParseFloatError| Error::Scan {
            col,
            message: e.to_string(),
        })?;
        return Ok(());
    }
    if let Some(out) = dest.downcast_mut::<String>() {
        *out = field.to_string();
        return Ok(());
    }
    // dates are not parsed from delimited text
    Err(Error::InvalidScanType { index: col })
}

/// Open a delimited text file from a path.
pub fn open_path(path: &Path) -> Result<Probe> {
    let data = fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());
    from_bytes(&name, data)
}

/// Open delimited text from a reader. The reader is drained before
/// this returns.
pub fn open_reader(mut reader: Box<dyn Read>) -> Result<Probe> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    from_bytes("table", data)
}

fn from_bytes(name: &str, data: Vec<u8>) -> Result<Probe> {
    let text = match String::from_utf8(data) {
        Ok(text) => text,
        Err(_) => {
            debug!("input is not valid UTF-8 text");
            return Ok(Probe::Rejected);
        }
    };
    if text.bytes().any(|b| b < 0x09) {
        debug!("input holds control bytes; not delimited text");
        return Ok(Probe::Rejected);
    }

    let delimiter = if text.lines().next().is_some_and(|l| l.contains('\t')) {
        '\t'
    } else {
        ','
    };
    let rows = text
        .lines()
        .map(|line| split_line(line, delimiter))
        .collect();
    Ok(Probe::Matched(Box::new(Table::from_rows(name, rows))))
}

/// Split one line on the delimiter, honoring double-quoted fields with
/// doubled-quote escapes.
fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' && field.is_empty() {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }
    fields.push(field);
    fields
}
