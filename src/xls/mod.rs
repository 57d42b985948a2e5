//! Legacy BIFF8 workbook (.xls) backend.
//!
//! The workbook lives in a single CFB stream named `Workbook` (or
//! `Book` in older writers). Its globals substream carries the shared
//! string table, the XF table and the sheet directory; each sheet is a
//! second substream addressed by the absolute offset recorded in its
//! BOUNDSHEET entry.

mod records;
mod strings;

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::cfb;
use crate::errors::{Error, Result};
use crate::numfmt::Formatter;
use crate::registry::Probe;
use crate::table::{Collection, Sheet, Source, Value, ValueType};
use records::*;
use strings::{XlsEncoding, parse_short_string, parse_sst, parse_unicode_string};

/// Open a BIFF8 workbook from a path.
pub fn open_path(path: &Path) -> Result<Probe> {
    let file = File::open(path)?;
    open_file(file)
}

/// Open a BIFF8 workbook from an already opened file.
pub fn open_file(file: File) -> Result<Probe> {
    open_seekable(file)
}

/// Open a BIFF8 workbook from a reader. The reader is drained before
/// this returns.
pub fn open_reader(mut reader: Box<dyn Read>) -> Result<Probe> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    open_seekable(Cursor::new(data))
}

fn open_seekable<R: Read + Seek>(mut input: R) -> Result<Probe> {
    if !cfb::sniff(&mut input)? {
        return Ok(Probe::Rejected);
    }
    let mut doc = cfb::Document::open(input)?;
    let stream = if doc.has_stream("Workbook") {
        doc.open_stream("Workbook")?
    } else if doc.has_stream("Book") {
        doc.open_stream("Book")?
    } else {
        debug!("CFB container holds no workbook stream");
        return Ok(Probe::Rejected);
    };
    let wb = Workbook::parse(stream.into_inner())?;
    Ok(Probe::Matched(Box::new(wb)))
}

#[derive(Debug)]
struct SheetInfo {
    name: String,
    offset: u32,
}

/// An open BIFF8 workbook.
#[derive(Debug)]
pub struct Workbook {
    stream: Vec<u8>,
    sheets: Vec<SheetInfo>,
    cache: Vec<Option<Sheet>>,
    strings: Vec<String>,
    fmt: Arc<Formatter>,
    enc: XlsEncoding,
}

impl Workbook {
    /// Decode the workbook globals substream and index the sheets.
    fn parse(stream: Vec<u8>) -> Result<Self> {
        let mut rs = RecordStream::new(&stream);
        let mut fmt = Formatter::new();
        let mut enc = XlsEncoding::default();
        let mut sheets = Vec::new();
        let mut shared = Vec::new();

        match rs.next_record()? {
            Some(rec) if rec.typ == RT_BOF => {}
            _ => return Err(Error::Malformed("workbook stream does not start with BOF".into())),
        }

        while let Some(rec) = rs.next_record()? {
            match rec.typ {
                RT_EOF => break,
                RT_CODEPAGE => {
                    enc = XlsEncoding::from_codepage(read_u16(&rec.data, 0)?);
                }
                RT_DATE1904 => {
                    fmt.set_date1904(read_u16(&rec.data, 0)? == 1);
                }
                RT_BOUNDSHEET => {
                    let offset = read_u32(&rec.data, 0)?;
                    let name_data = rec
                        .data
                        .get(6..)
                        .ok_or_else(|| Error::Malformed("BOUNDSHEET record too short".into()))?;
                    let name = parse_short_string(name_data, enc)?;
                    sheets.push(SheetInfo { name, offset });
                }
                RT_FORMAT => {
                    let id = read_u16(&rec.data, 0)?;
                    let (code, _) = parse_unicode_string(&rec.data[2..], enc)?;
                    fmt.add_format(id, &code);
                }
                RT_XF => {
                    fmt.add_xf(read_u16(&rec.data, 2)?);
                }
                RT_SST => {
                    shared = parse_sst(&rec, enc)?;
                }
                _ => {}
            }
        }

        debug!(
            "xls: {} sheets, {} shared strings, {} xf entries",
            sheets.len(),
            shared.len(),
            fmt.xf_count()
        );
        let cache = sheets.iter().map(|_| None).collect();
        Ok(Workbook {
            stream,
            sheets,
            cache,
            strings: shared,
            fmt: Arc::new(fmt),
            enc,
        })
    }

    /// Decode one sheet substream into a materialized row buffer.
    fn parse_sheet(&self, info: &SheetInfo) -> Result<Sheet> {
        let mut rs = RecordStream::new(&self.stream);
        rs.seek(info.offset as usize);
        match rs.next_record()? {
            Some(rec) if rec.typ == RT_BOF => {}
            _ => {
                return Err(Error::Malformed(format!(
                    "sheet '{}' substream does not start with BOF",
                    info.name
                )));
            }
        }

        let mut sheet = Sheet::new(&info.name, self.fmt.clone());
        let mut merged: Vec<(usize, usize, usize, usize)> = Vec::new();
        let mut links: Vec<(usize, usize, usize, usize, String)> = Vec::new();
        // (row, col, xf) of a FORMULA whose string result trails in a
        // STRING record
        let mut pending_string: Option<(usize, usize, u16)> = None;

        while let Some(rec) = rs.next_record()? {
            match rec.typ {
                RT_EOF | RT_BOF => break,
                RT_DIMENSION => {
                    if rec.data.len() >= 8 {
                        let last_row = read_u32(&rec.data, 4)?;
                        sheet.reserve_rows(last_row as usize);
                    }
                }
                RT_ROW => {}
                RT_BLANK => {
                    let (row, col, xf) = cell_header(&rec.data)?;
                    sheet.put(row, col, Value::Blank, xf);
                }
                RT_NUMBER => {
                    let (row, col, xf) = cell_header(&rec.data)?;
                    sheet.put(row, col, Value::Float(read_f64(&rec.data, 6)?), xf);
                }
                RT_RK => {
                    let (row, col, xf) = cell_header(&rec.data)?;
                    let v = rk_to_f64(read_u32(&rec.data, 6)?);
                    sheet.put(row, col, Value::Float(v), xf);
                }
                RT_MULRK => {
                    let row = read_u16(&rec.data, 0)? as usize;
                    let first_col = read_u16(&rec.data, 2)? as usize;
                    let count = (rec.data.len().saturating_sub(6)) / 6;
                    for i in 0..count {
                        let xf = read_u16(&rec.data, 4 + i * 6)?;
                        let v = rk_to_f64(read_u32(&rec.data, 6 + i * 6)?);
                        sheet.put(row, first_col + i, Value::Float(v), xf);
                    }
                }
                RT_MULBLANK => {
                    let row = read_u16(&rec.data, 0)? as usize;
                    let first_col = read_u16(&rec.data, 2)? as usize;
                    let count = (rec.data.len().saturating_sub(6)) / 2;
                    for i in 0..count {
                        let xf = read_u16(&rec.data, 4 + i * 2)?;
                        sheet.put(row, first_col + i, Value::Blank, xf);
                    }
                }
                RT_LABELSST => {
                    let (row, col, xf) = cell_header(&rec.data)?;
                    let isst = read_u32(&rec.data, 6)? as usize;
                    let text = self.strings.get(isst).ok_or_else(|| {
                        Error::Malformed(format!(
                            "SST index {isst} out of range ({} strings)",
                            self.strings.len()
                        ))
                    })?;
                    sheet.put(row, col, Value::Text(text.clone()), xf);
                }
                RT_LABEL => {
                    let (row, col, xf) = cell_header(&rec.data)?;
                    let (text, _) = parse_unicode_string(&rec.data[6..], self.enc)?;
                    sheet.put(row, col, Value::Text(text), xf);
                }
                RT_BOOLERR => {
                    let (row, col, xf) = cell_header(&rec.data)?;
                    if rec.data.len() < 8 {
                        return Err(Error::Malformed("BOOLERR record too short".into()));
                    }
                    if rec.data[7] == 0 {
                        sheet.put(row, col, Value::Bool(rec.data[6] != 0), xf);
                    } else {
                        sheet.put_typed(
                            row,
                            col,
                            Value::Text(error_text(rec.data[6]).to_string()),
                            xf,
                            ValueType::Text,
                        );
                    }
                }
                RT_FORMULA => {
                    let (row, col, xf) = cell_header(&rec.data)?;
                    match formula_value(&rec.data)? {
                        FormulaValue::Number(v) => sheet.put(row, col, Value::Float(v), xf),
                        FormulaValue::Bool(b) => sheet.put(row, col, Value::Bool(b), xf),
                        FormulaValue::Error(code) => sheet.put_typed(
                            row,
                            col,
                            Value::Text(error_text(code).to_string()),
                            xf,
                            ValueType::Text,
                        ),
                        FormulaValue::EmptyString => {
                            sheet.put(row, col, Value::Text(String::new()), xf)
                        }
                        FormulaValue::PendingString => pending_string = Some((row, col, xf)),
                    }
                }
                RT_STRING => {
                    if let Some((row, col, xf)) = pending_string.take() {
                        let (text, _) = parse_unicode_string(&rec.data, self.enc)?;
                        sheet.put(row, col, Value::Text(text), xf);
                    }
                }
                RT_HYPERLINK => match parse_hyperlink(&rec.data) {
                    Some(link) => links.push(link),
                    None => warn!("skipping undecodable HYPERLINK record"),
                },
                RT_MERGEDCELLS => {
                    let count = read_u16(&rec.data, 0)? as usize;
                    for i in 0..count {
                        let base = 2 + i * 8;
                        if rec.data.len() < base + 8 {
                            break;
                        }
                        let r1 = read_u16(&rec.data, base)? as usize;
                        let r2 = read_u16(&rec.data, base + 2)? as usize;
                        let c1 = read_u16(&rec.data, base + 4)? as usize;
                        let c2 = read_u16(&rec.data, base + 6)? as usize;
                        merged.push((r1, r2, c1, c2));
                    }
                }
                _ => {}
            }
        }

        for (r1, r2, c1, c2, target) in links {
            sheet.link(r1, r2, c1, c2, &target);
        }
        sheet.merge(&merged);
        Ok(sheet)
    }
}

impl Source for Workbook {
    fn list(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn get(&mut self, name: &str) -> Result<&mut dyn Collection> {
        let idx = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::SheetNotFound(name.to_string()))?;
        if self.cache[idx].is_none() {
            // a corrupt sheet substream poisons this collection, not
            // the whole source
            let sheet = match self.parse_sheet(&self.sheets[idx]) {
                Ok(sheet) => sheet,
                Err(err) => {
                    let mut sheet = Sheet::new(self.sheets[idx].name.clone(), self.fmt.clone());
                    sheet.set_err(err);
                    sheet
                }
            };
            self.cache[idx] = Some(sheet);
        }
        let sheet = self.cache[idx]
            .as_mut()
            .ok_or_else(|| Error::SheetNotFound(name.to_string()))?;
        sheet.rewind();
        Ok(sheet)
    }

    fn close(&mut self) -> Result<()> {
        self.cache.iter_mut().for_each(|c| *c = None);
        self.stream.clear();
        self.strings.clear();
        Ok(())
    }
}

fn cell_header(data: &[u8]) -> Result<(usize, usize, u16)> {
    Ok((
        read_u16(data, 0)? as usize,
        read_u16(data, 2)? as usize,
        read_u16(data, 4)?,
    ))
}

enum FormulaValue {
    Number(f64),
    Bool(bool),
    Error(u8),
    EmptyString,
    /// string result trails in the following STRING record
    PendingString,
}

fn formula_value(data: &[u8]) -> Result<FormulaValue> {
    if data.len() < 14 {
        return Err(Error::Malformed("FORMULA record too short".into()));
    }
    let num = &data[6..14];
    if num[6] == 0xFF && num[7] == 0xFF {
        match num[0] {
            0x00 => Ok(FormulaValue::PendingString),
            0x01 => Ok(FormulaValue::Bool(num[2] != 0)),
            0x02 => Ok(FormulaValue::Error(num[2])),
            _ => Ok(FormulaValue::EmptyString),
        }
    } else {
        Ok(FormulaValue::Number(read_f64(data, 6)?))
    }
}

fn error_text(code: u8) -> &'static str {
    match code {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        _ => "#ERR!",
    }
}

const HL_HAS_MONIKER: u32 = 0x01;
const HL_HAS_LOCATION: u32 = 0x08;
const HL_HAS_DISPLAY: u32 = 0x10;
const HL_HAS_FRAME: u32 = 0x20;
const HL_MONIKER_AS_STR: u32 = 0x40;

const URL_MONIKER: [u8; 16] = [
    0xE0, 0xC9, 0xEA, 0x79, 0xF9, 0xBA, 0xCE, 0x11, 0x8C, 0x82, 0x00, 0xAA, 0x00, 0x4B, 0xA9, 0x0B,
];
const FILE_MONIKER: [u8; 16] = [
    0x03, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
];

/// Decode a HLINK record into its cell range and target. Malformed
/// link payloads are skipped rather than failing the sheet.
fn parse_hyperlink(data: &[u8]) -> Option<(usize, usize, usize, usize, String)> {
    if data.len() < 32 {
        return None;
    }
    let r1 = read_u16(data, 0).ok()? as usize;
    let r2 = read_u16(data, 2).ok()? as usize;
    let c1 = read_u16(data, 4).ok()? as usize;
    let c2 = read_u16(data, 6).ok()? as usize;
    let flags = read_u32(data, 28).ok()?;
    let mut pos = 32;

    let mut display = None;
    if flags & HL_HAS_DISPLAY != 0 {
        display = Some(read_hyperlink_string(data, &mut pos)?);
    }
    if flags & HL_HAS_FRAME != 0 {
        read_hyperlink_string(data, &mut pos)?;
    }

    let mut target = None;
    if flags & HL_HAS_MONIKER != 0 {
        if flags & HL_MONIKER_AS_STR != 0 {
            target = Some(read_hyperlink_string(data, &mut pos)?);
        } else {
            let guid = data.get(pos..pos + 16)?;
            pos += 16;
            if guid == URL_MONIKER {
                let nbytes = read_u32(data, pos).ok()? as usize;
                pos += 4;
                let body = data.get(pos..pos + nbytes)?;
                pos += nbytes;
                let units: Vec<u16> = body
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                target = Some(String::from_utf16_lossy(&units));
            } else if guid == FILE_MONIKER {
                pos += 2; // up-level count
                let nbytes = read_u32(data, pos).ok()? as usize;
                pos += 4;
                let body = data.get(pos..pos + nbytes)?;
                pos += nbytes;
                let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                target = Some(String::from_utf8_lossy(&body[..end]).into_owned());
            } else {
                return None;
            }
        }
    }
    if flags & HL_HAS_LOCATION != 0 {
        let location = read_hyperlink_string(data, &mut pos)?;
        if target.is_none() {
            target = Some(location);
        }
    }

    let target = target.or(display)?;
    Some((r1, r2, c1, c2, target))
}

/// A length-prefixed UTF-16 string (count includes the terminator).
fn read_hyperlink_string(data: &[u8], pos: &mut usize) -> Option<String> {
    let count = read_u32(data, *pos).ok()? as usize;
    *pos += 4;
    let body = data.get(*pos..*pos + count * 2)?;
    *pos += count * 2;
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Some(String::from_utf16_lossy(&units))
}
