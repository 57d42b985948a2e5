//! Materialized row buffer shared by the binary decoders.

use std::any::Any;
use std::sync::Arc;

use chrono::NaiveDateTime;

use super::{
    CONTINUE_COLUMN_MERGED, CONTINUE_ROW_MERGED, Collection, END_COLUMN_MERGED, END_ROW_MERGED,
    Value, ValueType,
};
use crate::errors::{Error, Result};
use crate::numfmt::Formatter;

#[derive(Debug, Clone)]
struct Cell {
    value: Value,
    xf: u16,
    forced: Option<ValueType>,
}

impl Cell {
    fn blank() -> Self {
        Cell {
            value: Value::Blank,
            xf: 0,
            forced: None,
        }
    }
}

/// One materialized sheet. Rows are ragged: a row's width is the
/// maximum column index observed while decoding it.
#[derive(Debug, Clone)]
pub struct Sheet {
    name: String,
    fmt: Arc<Formatter>,
    rows: Vec<Vec<Cell>>,
    cur: isize,
    err: Option<Arc<Error>>,
}

impl Sheet {
    pub(crate) fn new(name: impl Into<String>, fmt: Arc<Formatter>) -> Self {
        Sheet {
            name: name.into(),
            fmt,
            rows: Vec::new(),
            cur: -1,
            err: None,
        }
    }

    /// Sheet display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn reserve_rows(&mut self, n: usize) {
        if n > self.rows.len() && n < 1 << 21 {
            self.rows.reserve(n - self.rows.len());
        }
    }

    /// Place a value at (row, col), growing the buffer as needed.
    pub(crate) fn put(&mut self, row: usize, col: usize, value: Value, xf: u16) {
        self.put_cell(
            row,
            col,
            Cell {
                value,
                xf,
                forced: None,
            },
        );
    }

    /// Place a value whose semantic type is fixed regardless of its
    /// format code (ISO date literals, error strings).
    pub(crate) fn put_typed(
        &mut self,
        row: usize,
        col: usize,
        value: Value,
        xf: u16,
        forced: ValueType,
    ) {
        self.put_cell(
            row,
            col,
            Cell {
                value,
                xf,
                forced: Some(forced),
            },
        );
    }

    fn put_cell(&mut self, row: usize, col: usize, cell: Cell) {
        if row >= self.rows.len() {
            self.rows.resize(row + 1, Vec::new());
        }
        let r = &mut self.rows[row];
        if col >= r.len() {
            r.resize(col + 1, Cell::blank());
        }
        r[col] = cell;
    }

    /// Tag every cell of an inclusive (row, col) range as a hyperlink.
    /// The top-left display text is kept when present; empty cells show
    /// the target itself.
    pub(crate) fn link(&mut self, r1: usize, r2: usize, c1: usize, c2: usize, target: &str) {
        for row in r1..=r2 {
            for col in c1..=c2 {
                let display = match self.cell(row, col) {
                    Some(cell) => match &cell.value {
                        Value::Text(s) => s.clone(),
                        Value::Merged(_) => continue,
                        _ => String::new(),
                    },
                    None => String::new(),
                };
                let xf = self.cell(row, col).map(|c| c.xf).unwrap_or(0);
                self.put_cell(
                    row,
                    col,
                    Cell {
                        value: Value::Hyperlink {
                            display,
                            target: target.to_string(),
                        },
                        xf,
                        forced: Some(ValueType::Hyperlink),
                    },
                );
            }
        }
    }

    /// Fill the continuation cells of merged ranges with the sentinel
    /// glyphs. Ranges are inclusive (first_row, last_row, first_col,
    /// last_col); the top-left cell keeps the value.
    pub(crate) fn merge(&mut self, ranges: &[(usize, usize, usize, usize)]) {
        for &(r1, r2, c1, c2) in ranges {
            for row in r1..=r2 {
                for col in c1..=c2 {
                    if row == r1 && col == c1 {
                        continue;
                    }
                    let glyph = if row == r1 {
                        if col == c2 {
                            END_COLUMN_MERGED
                        } else {
                            CONTINUE_COLUMN_MERGED
                        }
                    } else if row == r2 {
                        if col == c2 {
                            END_ROW_MERGED
                        } else if col == c1 {
                            CONTINUE_ROW_MERGED
                        } else {
                            CONTINUE_COLUMN_MERGED
                        }
                    } else if col == c1 {
                        CONTINUE_ROW_MERGED
                    } else if col == c2 {
                        END_COLUMN_MERGED
                    } else {
                        CONTINUE_COLUMN_MERGED
                    };
                    let xf = self.cell(row, col).map(|c| c.xf).unwrap_or(0);
                    self.put(row, col, Value::Merged(glyph), xf);
                }
            }
        }
    }

    pub(crate) fn set_err(&mut self, err: Error) {
        if self.err.is_none() {
            self.err = Some(Arc::new(err));
        }
    }

    /// Reset the cursor so a cached sheet iterates from the top again.
    pub(crate) fn rewind(&mut self) {
        self.cur = -1;
    }

    fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    fn current(&self) -> Option<&[Cell]> {
        if self.cur < 0 {
            return None;
        }
        self.rows.get(self.cur as usize).map(|r| r.as_slice())
    }

    fn scan_cell(&self, col: usize, cell: &Cell, dest: &mut dyn Any) -> Result<()> {
        if let Some(out) = dest.downcast_mut::<bool>() {
            *out = match &cell.value {
                Value::Bool(b) => *b,
                Value::Int(i) => *i != 0,
                Value::Float(f) => *f != 0.0,
                Value::Text(s) => truthy(s),
                Value::Hyperlink { display, .. } => truthy(display),
                _ => false,
            };
            return Ok(());
        }
        if let Some(out) = dest.downcast_mut::<i64>() {
            *out = match &cell.value {
                Value::Int(i) => *i,
                Value::Float(f) if f.fract() == 0.0 => *f as i64,
                Value::Text(s) => s.parse::<i64>().map_err(|e| Error::Scan {
                    col,
                    message: e.to_string(),
                })?,
                other => {
                    return Err(Error::Scan {
                        col,
                        message: format!("cannot read {other:?} as integer"),
                    });
                }
            };
            return Ok(());
        }
        if let Some(out) = dest.downcast_mut::<f64>() {
            *out = match &cell.value {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                Value::Text(s) => s.parse::<f64>().map_err(|e| Error::Scan {
                    col,
                    message: e.to_string(),
                })?,
                other => {
                    return Err(Error::Scan {
                        col,
                        message: format!("cannot read {other:?} as float"),
                    });
                }
            };
            return Ok(());
        }
        if let Some(out) = dest.downcast_mut::<String>() {
            *out = self.fmt.render(&cell.value, cell.xf);
            return Ok(());
        }
        if let Some(out) = dest.downcast_mut::<NaiveDateTime>() {
            *out = match &cell.value {
                Value::Int(i) => self.fmt.serial_to_datetime(*i as f64),
                Value::Float(f) => self.fmt.serial_to_datetime(*f),
                Value::Text(s) => parse_iso_datetime(s),
                _ => None,
            }
            .ok_or_else(|| Error::Scan {
                col,
                message: "cannot read cell as datetime".to_string(),
            })?;
            return Ok(());
        }
        Err(Error::InvalidScanType { index: col })
    }
}

fn truthy(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes"
    )
}

fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

impl Collection for Sheet {
    fn next_row(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        self.cur += 1;
        (self.cur as usize) < self.rows.len()
    }

    fn strings(&self) -> Vec<String> {
        match self.current() {
            Some(row) => row
                .iter()
                .map(|c| self.fmt.render(&c.value, c.xf))
                .collect(),
            None => Vec::new(),
        }
    }

    fn types(&self) -> Vec<ValueType> {
        match self.current() {
            Some(row) => row
                .iter()
                .map(|c| c.forced.unwrap_or_else(|| self.fmt.infer(&c.value, c.xf)))
                .collect(),
            None => Vec::new(),
        }
    }

    fn formats(&self) -> Vec<String> {
        match self.current() {
            Some(row) => row
                .iter()
                .map(|c| self.fmt.format_code(c.xf).to_string())
                .collect(),
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
        for (col, (cell, dest)) in row.iter().zip(dests.iter_mut()).enumerate() {
            self.scan_cell(col, cell, *dest)?;
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn err(&self) -> Option<&Error> {
        self.err.as_deref()
    }
}
