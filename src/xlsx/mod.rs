//! Office Open XML spreadsheet (.xlsx) backend.
//!
//! An xlsx file is a ZIP archive of XML parts wired together by
//! relationship files: `_rels/.rels` names the primary document, whose
//! own rels file names the shared-string part, the styles part and one
//! worksheet part per sheet. All parts are parsed with a streaming XML
//! reader; worksheet rows land in the shared row buffer.

mod sheet;

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::errors::{Error, Result};
use crate::numfmt::Formatter;
use crate::registry::Probe;
use crate::table::{Collection, Sheet, Source};

pub use sheet::{col_index_to_letters, col_letters_to_index};

/// Open an xlsx document from a path.
pub fn open_path(path: &Path) -> Result<Probe> {
    let file = File::open(path)?;
    open_file(file)
}

/// Open an xlsx document from an already opened file.
pub fn open_file(file: File) -> Result<Probe> {
    open_seekable(file)
}

/// Open an xlsx document from a reader. The reader is drained into
/// memory before this returns.
pub fn open_reader(mut reader: Box<dyn Read>) -> Result<Probe> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    open_seekable(Cursor::new(data))
}

fn open_seekable<R: Read + Seek + 'static>(input: R) -> Result<Probe> {
    let mut archive = match ZipArchive::new(input) {
        Ok(z) => z,
        Err(ZipError::Io(e)) => return Err(e.into()),
        Err(e) => {
            debug!("not a zip archive: {e}");
            return Ok(Probe::Rejected);
        }
    };

    // a zip without package relationships is some other archive, not a
    // malformed spreadsheet
    let root_rels = match read_part(&mut archive, "_rels/.rels")? {
        Some(content) => content,
        None => {
            debug!("zip archive has no _rels/.rels part");
            return Ok(Probe::Rejected);
        }
    };
    let rels = parse_rels(&root_rels, "")?;
    let primary = match rels
        .iter()
        .find(|r| r.reltype.ends_with("/officeDocument"))
    {
        Some(rel) => rel.target.clone(),
        None => {
            debug!("package has no officeDocument relationship");
            return Ok(Probe::Rejected);
        }
    };

    let doc = Document::build(archive, &primary)?;
    Ok(Probe::Matched(Box::new(doc)))
}

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    reltype: String,
    target: String,
}

#[derive(Debug)]
struct SheetMeta {
    name: String,
    path: String,
}

/// An open xlsx document.
pub struct Document<R: Read + Seek> {
    archive: ZipArchive<R>,
    sheets: Vec<SheetMeta>,
    cache: Vec<Option<Sheet>>,
    strings: Vec<String>,
    fmt: Arc<Formatter>,
}

impl<R: Read + Seek> std::fmt::Debug for Document<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").field("sheets", &self.sheets).finish()
    }
}

impl<R: Read + Seek> Document<R> {
    fn build(mut archive: ZipArchive<R>, primary: &str) -> Result<Self> {
        // secondary rels sit next to the primary document
        let (dir, base) = split_part_path(primary);
        let rels_path = if dir.is_empty() {
            format!("_rels/{base}.rels")
        } else {
            format!("{dir}/_rels/{base}.rels")
        };
        let secondary = match read_part(&mut archive, &rels_path)? {
            Some(content) => parse_rels(&content, dir)?,
            None => Vec::new(),
        };

        let mut fmt = Formatter::new();
        if let Some(rel) = secondary.iter().find(|r| r.reltype.ends_with("/styles"))
            && let Some(content) = read_part(&mut archive, &rel.target)?
        {
            parse_styles(&content, &mut fmt)?;
        }

        let mut strings = Vec::new();
        if let Some(rel) = secondary
            .iter()
            .find(|r| r.reltype.ends_with("/sharedStrings"))
            && let Some(content) = read_part(&mut archive, &rel.target)?
        {
            strings = parse_shared_strings(&content)?;
        }

        let workbook = read_part(&mut archive, primary)?
            .ok_or_else(|| Error::Malformed(format!("missing workbook part '{primary}'")))?;
        let (sheets, date1904) = parse_workbook(&workbook, &secondary)?;
        fmt.set_date1904(date1904);
        debug!(
            "xlsx: {} sheets, {} shared strings",
            sheets.len(),
            strings.len()
        );

        let cache = sheets.iter().map(|_| None).collect();
        Ok(Document {
            archive,
            sheets,
            cache,
            strings,
            fmt: Arc::new(fmt),
        })
    }

    fn load_sheet(&mut self, idx: usize) -> Result<Sheet> {
        let meta = &self.sheets[idx];
        let content = read_part(&mut self.archive, &meta.path)?
            .ok_or_else(|| Error::Malformed(format!("missing worksheet part '{}'", meta.path)))?;

        // the sheet's own rels resolve hyperlink r:id targets
        let (dir, base) = split_part_path(&meta.path);
        let rels_path = if dir.is_empty() {
            format!("_rels/{base}.rels")
        } else {
            format!("{dir}/_rels/{base}.rels")
        };
        let sheet_rels = match read_part(&mut self.archive, &rels_path)? {
            Some(content) => parse_rels(&content, dir)?,
            None => Vec::new(),
        };

        sheet::parse_worksheet(
            &content,
            &self.sheets[idx].name,
            self.fmt.clone(),
            &self.strings,
            &sheet_rels,
        )
    }
}

impl<R: Read + Seek> Source for Document<R> {
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
            // a corrupt worksheet part poisons this collection, not
            // the whole source
            let sheet = match self.load_sheet(idx) {
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
        self.strings.clear();
        Ok(())
    }
}

/// Read a named part into a string, or `None` when the part is absent.
fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(Some(content))
}

fn split_part_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", path),
    }
}

/// Resolve a relationship target against the directory of its rels
/// file's owner. Absolute targets are package-rooted.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        return stripped.to_string();
    }
    let mut segments: Vec<&str> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').collect()
    };
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn parse_rels(content: &str, base_dir: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut rels = Vec::new();
    let mut buf = Vec::with_capacity(512);
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let id = attr_value(&e, &reader, b"Id").unwrap_or_default();
                let reltype = attr_value(&e, &reader, b"Type").unwrap_or_default();
                let raw_target = attr_value(&e, &reader, b"Target").unwrap_or_default();
                let external = attr_value(&e, &reader, b"TargetMode")
                    .is_some_and(|m| m.eq_ignore_ascii_case("External"));
                let target = if external {
                    raw_target
                } else {
                    resolve_target(base_dir, &raw_target)
                };
                rels.push(Relationship {
                    id,
                    reltype,
                    target,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }
    Ok(rels)
}

/// Extract the ordered sheet list and the 1904 epoch flag from the
/// workbook part, resolving each sheet's relationship id to its
/// worksheet part path.
fn parse_workbook(content: &str, rels: &[Relationship]) -> Result<(Vec<SheetMeta>, bool)> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut sheets = Vec::new();
    let mut date1904 = false;
    let mut buf = Vec::with_capacity(512);
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"sheet" => {
                    let name = attr_value(&e, &reader, b"name").unwrap_or_default();
                    let rid = attr_value(&e, &reader, b"id").unwrap_or_default();
                    let rel = rels
                        .iter()
                        .find(|r| r.id == rid && r.reltype.ends_with("/worksheet"))
                        .ok_or_else(|| {
                            Error::Malformed(format!(
                                "sheet '{name}' has no worksheet relationship"
                            ))
                        })?;
                    sheets.push(SheetMeta {
                        name,
                        path: rel.target.clone(),
                    });
                }
                b"workbookPr" => {
                    date1904 = attr_value(&e, &reader, b"date1904")
                        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }
    Ok((sheets, date1904))
}

/// Pull custom number formats and the cellXfs table out of the styles
/// part.
fn parse_styles(content: &str, fmt: &mut Formatter) -> Result<()> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut in_cell_xfs = false;
    let mut buf = Vec::with_capacity(512);
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"numFmt" => {
                    let id = attr_value(&e, &reader, b"numFmtId")
                        .and_then(|v| v.parse::<u16>().ok());
                    let code = attr_value(&e, &reader, b"formatCode");
                    if let (Some(id), Some(code)) = (id, code) {
                        fmt.add_format(id, &code);
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let id = attr_value(&e, &reader, b"numFmtId")
                        .and_then(|v| v.parse::<u16>().ok())
                        .unwrap_or(0);
                    fmt.add_xf(id);
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }
    Ok(())
}

/// Parse the shared string table. Each `<si>` is either a single `<t>`
/// or a sequence of rich `<r><t>` runs concatenated in order; phonetic
/// `<rPh>` runs are excluded. Text is taken verbatim, so
/// `xml:space="preserve"` content survives.
fn parse_shared_strings(content: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(content);
    let mut strings = Vec::new();
    let mut buf = Vec::with_capacity(1024);
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" if in_si && !in_phonetic => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(e)) if in_t => {
                current.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }
    Ok(strings)
}

/// Decoded value of a named attribute, matched by local name.
fn attr_value(e: &BytesStart, reader: &Reader<&[u8]>, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == name
            && let Ok(value) = attr.decode_and_unescape_value(reader.decoder())
        {
            return Some(value.to_string());
        }
    }
    None
}
