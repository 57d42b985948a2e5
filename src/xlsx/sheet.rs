//! Streaming worksheet part parser.

use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{Relationship, attr_value};
use crate::errors::{Error, Result};
use crate::numfmt::Formatter;
use crate::table::{Sheet, Value, ValueType};

/// Decode `A..Z, AA..` column letters to a zero-based index.
pub fn col_letters_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for c in letters.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        n = n * 26 + (c as usize - 'A' as usize + 1);
    }
    Some(n - 1)
}

/// Encode a zero-based column index as `A..Z, AA..` letters.
pub fn col_index_to_letters(index: usize) -> String {
    let mut out = String::new();
    let mut n = index + 1;
    while n > 0 {
        n -= 1;
        out.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    out
}

/// `"B3"` -> zero-based (row, col).
fn parse_cell_ref(r: &str) -> Option<(usize, usize)> {
    let split = r.find(|c: char| c.is_ascii_digit())?;
    let col = col_letters_to_index(&r[..split])?;
    let row: usize = r[split..].parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col))
}

/// `"A1:C2"` (or a single ref) -> zero-based (r1, r2, c1, c2).
fn parse_range(r: &str) -> Option<(usize, usize, usize, usize)> {
    match r.split_once(':') {
        Some((a, b)) => {
            let (r1, c1) = parse_cell_ref(a)?;
            let (r2, c2) = parse_cell_ref(b)?;
            Some((r1, r2, c1, c2))
        }
        None => {
            let (row, col) = parse_cell_ref(r)?;
            Some((row, row, col, col))
        }
    }
}

/// Cell `t` attribute values.
#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Number,
    Shared,
    FormulaString,
    Bool,
    Error,
    Inline,
    IsoDate,
}

impl CellKind {
    fn from_attr(t: Option<&str>) -> Result<Self> {
        match t {
            None | Some("n") => Ok(CellKind::Number),
            Some("s") => Ok(CellKind::Shared),
            Some("str") => Ok(CellKind::FormulaString),
            Some("b") => Ok(CellKind::Bool),
            Some("e") => Ok(CellKind::Error),
            Some("inlineStr") => Ok(CellKind::Inline),
            Some("d") => Ok(CellKind::IsoDate),
            Some(other) => Err(Error::Malformed(format!("unknown cell type '{other}'"))),
        }
    }
}

struct PendingCell {
    row: usize,
    col: usize,
    xf: u16,
    kind: CellKind,
}

/// Parse one worksheet part into a materialized sheet.
pub(super) fn parse_worksheet(
    content: &str,
    name: &str,
    fmt: Arc<Formatter>,
    strings: &[String],
    rels: &[Relationship],
) -> Result<Sheet> {
    let mut reader = Reader::from_str(content);
    let mut sheet = Sheet::new(name, fmt);
    let mut merged: Vec<(usize, usize, usize, usize)> = Vec::new();
    let mut links: Vec<(usize, usize, usize, usize, String)> = Vec::new();

    let mut row_counter = 0usize;
    let mut cur_row = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut value_text = String::new();
    let mut inline_text = String::new();
    let mut in_value = false;
    let mut in_inline = false;
    let mut in_text = false;
    let mut in_formula = false;

    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                cur_row = match attr_value(&e, &reader, b"r") {
                    Some(r) => r
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .ok_or_else(|| Error::Malformed(format!("bad row reference '{r}'")))?,
                    None => row_counter,
                };
                row_counter = cur_row + 1;
                next_col = 0;
            }
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"c" => {
                let pending = pending_cell(&e, &reader, cur_row, next_col)?;
                next_col = pending.col + 1;
                value_text.clear();
                inline_text.clear();
                cell = Some(pending);
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                let pending = pending_cell(&e, &reader, cur_row, next_col)?;
                next_col = pending.col + 1;
                finish_cell(&mut sheet, &pending, "", "", strings)?;
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"mergeCell" =>
            {
                if let Some(range) =
                    attr_value(&e, &reader, b"ref").as_deref().and_then(parse_range)
                {
                    merged.push(range);
                }
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"hyperlink" =>
            {
                if let Some(link) = parse_hyperlink_element(&e, &reader, rels) {
                    links.push(link);
                }
            }
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"v" if cell.is_some() => in_value = true,
                b"is" if cell.is_some() => in_inline = true,
                b"t" if in_inline => in_text = true,
                b"f" => in_formula = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_formula {
                    // cached value only; the expression text is skipped
                } else if in_value {
                    value_text.push_str(&e.unescape()?);
                } else if in_text {
                    inline_text.push_str(&e.unescape()?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"is" => in_inline = false,
                b"t" => in_text = false,
                b"f" => in_formula = false,
                b"c" => {
                    if let Some(pending) = cell.take() {
                        finish_cell(&mut sheet, &pending, &value_text, &inline_text, strings)?;
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    for (r1, r2, c1, c2, target) in links {
        sheet.link(r1, r2, c1, c2, &target);
    }
    sheet.merge(&merged);
    Ok(sheet)
}

fn pending_cell(
    e: &quick_xml::events::BytesStart,
    reader: &Reader<&[u8]>,
    cur_row: usize,
    next_col: usize,
) -> Result<PendingCell> {
    let (row, col) = match attr_value(e, reader, b"r") {
        Some(r) => parse_cell_ref(&r)
            .ok_or_else(|| Error::Malformed(format!("bad cell reference '{r}'")))?,
        None => (cur_row, next_col),
    };
    let xf = attr_value(e, reader, b"s")
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    let kind = CellKind::from_attr(attr_value(e, reader, b"t").as_deref())?;
    Ok(PendingCell { row, col, xf, kind })
}

fn finish_cell(
    sheet: &mut Sheet,
    cell: &PendingCell,
    value: &str,
    inline: &str,
    strings: &[String],
) -> Result<()> {
    match cell.kind {
        CellKind::Number => {
            if value.is_empty() {
                sheet.put(cell.row, cell.col, Value::Blank, cell.xf);
            } else {
                let v: f64 = value.trim().parse().map_err(|_| {
                    Error::Malformed(format!("bad numeric cell value '{value}'"))
                })?;
                sheet.put(cell.row, cell.col, Value::Float(v), cell.xf);
            }
        }
        CellKind::Shared => {
            let idx: usize = value.trim().parse().map_err(|_| {
                Error::Malformed(format!("bad shared string index '{value}'"))
            })?;
            let text = strings.get(idx).ok_or_else(|| {
                Error::Malformed(format!(
                    "shared string index {idx} out of range ({} strings)",
                    strings.len()
                ))
            })?;
            sheet.put(cell.row, cell.col, Value::Text(text.clone()), cell.xf);
        }
        CellKind::FormulaString => {
            sheet.put(cell.row, cell.col, Value::Text(value.to_string()), cell.xf);
        }
        CellKind::Bool => {
            let b = value.trim() == "1" || value.trim().eq_ignore_ascii_case("true");
            sheet.put(cell.row, cell.col, Value::Bool(b), cell.xf);
        }
        CellKind::Error => {
            sheet.put_typed(
                cell.row,
                cell.col,
                Value::Text(value.to_string()),
                cell.xf,
                ValueType::Text,
            );
        }
        CellKind::Inline => {
            sheet.put(cell.row, cell.col, Value::Text(inline.to_string()), cell.xf);
        }
        CellKind::IsoDate => {
            sheet.put_typed(
                cell.row,
                cell.col,
                Value::Text(value.to_string()),
                cell.xf,
                ValueType::Date,
            );
        }
    }
    Ok(())
}

fn parse_hyperlink_element(
    e: &quick_xml::events::BytesStart,
    reader: &Reader<&[u8]>,
    rels: &[Relationship],
) -> Option<(usize, usize, usize, usize, String)> {
    let (r1, r2, c1, c2) = attr_value(e, reader, b"ref").as_deref().and_then(parse_range)?;
    let target = attr_value(e, reader, b"id")
        .and_then(|rid| rels.iter().find(|r| r.id == rid).map(|r| r.target.clone()))
        .or_else(|| attr_value(e, reader, b"location"))
        .or_else(|| attr_value(e, reader, b"display"))?;
    Some((r1, r2, c1, c2, target))
}
