//! Builders for synthetic test files: CFB containers, BIFF8 workbook
//! streams, and xlsx archives assembled in memory.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const ENDOFCHAIN: u32 = 0xFFFFFFFE;
const FREESECT: u32 = 0xFFFFFFFF;
const FATSECT: u32 = 0xFFFFFFFD;
const NOSTREAM: u32 = 0xFFFFFFFF;

const SECTOR: usize = 512;
const MINI_SECTOR: usize = 64;
const MINI_CUTOFF: u32 = 4096;

/// Assemble a CFB container holding the named streams. Streams below
/// the mini-stream cutoff land in the mini-stream; larger ones chain
/// through the FAT directly.
pub fn build_cfb(streams: &[(&str, &[u8])]) -> Vec<u8> {
    // mini-stream assembly: concatenated 64-byte sectors
    let mut ministream: Vec<u8> = Vec::new();
    let mut minifat: Vec<u32> = Vec::new();
    let mut mini_starts: Vec<Option<u32>> = Vec::new();
    for (_, data) in streams {
        if (data.len() as u32) < MINI_CUTOFF {
            let first = minifat.len() as u32;
            let sectors = data.len().div_ceil(MINI_SECTOR).max(1);
            for i in 0..sectors {
                if i + 1 == sectors {
                    minifat.push(ENDOFCHAIN);
                } else {
                    minifat.push(minifat.len() as u32 + 1);
                }
            }
            ministream.extend_from_slice(data);
            let pad = sectors * MINI_SECTOR - data.len();
            ministream.extend(std::iter::repeat_n(0u8, pad));
            mini_starts.push(Some(first));
        } else {
            mini_starts.push(None);
        }
    }

    // sector layout: 0 = FAT, then directory, mini-FAT, the
    // mini-stream container, then each regular stream
    let dir_entries = 1 + streams.len();
    let dir_sectors = (dir_entries * 128).div_ceil(SECTOR).max(1);
    let minifat_sectors = if minifat.is_empty() {
        0
    } else {
        (minifat.len() * 4).div_ceil(SECTOR)
    };
    let ministream_sectors = ministream.len().div_ceil(SECTOR);

    let first_dir = 1u32;
    let first_minifat = first_dir + dir_sectors as u32;
    let first_ministream = first_minifat + minifat_sectors as u32;
    let mut next_free = first_ministream + ministream_sectors as u32;

    let mut regular_starts: Vec<Option<u32>> = Vec::new();
    let mut fat: Vec<u32> = vec![FREESECT; SECTOR / 4];
    fat[0] = FATSECT;
    chain(&mut fat, first_dir, dir_sectors);
    if minifat_sectors > 0 {
        chain(&mut fat, first_minifat, minifat_sectors);
    }
    if ministream_sectors > 0 {
        chain(&mut fat, first_ministream, ministream_sectors);
    }
    for (i, (_, data)) in streams.iter().enumerate() {
        if mini_starts[i].is_some() {
            regular_starts.push(None);
            continue;
        }
        let sectors = data.len().div_ceil(SECTOR);
        regular_starts.push(Some(next_free));
        chain(&mut fat, next_free, sectors);
        next_free += sectors as u32;
    }

    // directory
    let mut dir = Vec::with_capacity(dir_sectors * SECTOR);
    let root_start = if ministream_sectors > 0 {
        first_ministream
    } else {
        ENDOFCHAIN
    };
    let root_child = if streams.is_empty() { NOSTREAM } else { 1 };
    dir.extend(dir_entry(
        "Root Entry",
        5,
        root_child,
        root_start,
        ministream.len() as u64,
    ));
    for (i, (name, data)) in streams.iter().enumerate() {
        let start = mini_starts[i].unwrap_or_else(|| regular_starts[i].unwrap_or(ENDOFCHAIN));
        dir.extend(dir_entry(name, 2, NOSTREAM, start, data.len() as u64));
    }
    dir.resize(dir_sectors * SECTOR, 0);
    // unused directory slots must read as free entries
    for slot in dir_entries..(dir_sectors * SECTOR / 128) {
        let base = slot * 128;
        dir[base + 68..base + 80].fill(0xFF); // sibling/child = NOSTREAM
    }

    // header
    let mut out = Vec::new();
    out.extend_from_slice(b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1");
    out.extend_from_slice(&[0u8; 16]); // clsid
    out.extend_from_slice(&0x003Eu16.to_le_bytes()); // minor version
    out.extend_from_slice(&3u16.to_le_bytes()); // major version
    out.extend_from_slice(&0xFFFEu16.to_le_bytes()); // byte order
    out.extend_from_slice(&9u16.to_le_bytes()); // sector shift
    out.extend_from_slice(&6u16.to_le_bytes()); // mini sector shift
    out.extend_from_slice(&[0u8; 6]); // reserved
    out.extend_from_slice(&0u32.to_le_bytes()); // dir sector count (v3: 0)
    out.extend_from_slice(&1u32.to_le_bytes()); // FAT sector count
    out.extend_from_slice(&first_dir.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // transaction signature
    out.extend_from_slice(&MINI_CUTOFF.to_le_bytes());
    if minifat_sectors > 0 {
        out.extend_from_slice(&first_minifat.to_le_bytes());
        out.extend_from_slice(&(minifat_sectors as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&ENDOFCHAIN.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
    }
    out.extend_from_slice(&ENDOFCHAIN.to_le_bytes()); // first DIFAT sector
    out.extend_from_slice(&0u32.to_le_bytes()); // DIFAT sector count
    out.extend_from_slice(&0u32.to_le_bytes()); // DIFAT[0] = FAT sector 0
    for _ in 1..109 {
        out.extend_from_slice(&FREESECT.to_le_bytes());
    }
    assert_eq!(out.len(), 512);

    // sectors
    for id in &fat {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out.extend_from_slice(&dir);
    if minifat_sectors > 0 {
        let mut mf = Vec::with_capacity(minifat_sectors * SECTOR);
        for id in &minifat {
            mf.extend_from_slice(&id.to_le_bytes());
        }
        mf.resize(minifat_sectors * SECTOR, 0xFF);
        out.extend_from_slice(&mf);
    }
    if ministream_sectors > 0 {
        let mut ms = ministream.clone();
        ms.resize(ministream_sectors * SECTOR, 0);
        out.extend_from_slice(&ms);
    }
    for (i, (_, data)) in streams.iter().enumerate() {
        if regular_starts[i].is_some() {
            let sectors = data.len().div_ceil(SECTOR);
            let mut padded = data.to_vec();
            padded.resize(sectors * SECTOR, 0);
            out.extend_from_slice(&padded);
        }
    }
    out
}

fn chain(fat: &mut [u32], start: u32, sectors: usize) {
    for i in 0..sectors {
        let idx = start as usize + i;
        fat[idx] = if i + 1 == sectors {
            ENDOFCHAIN
        } else {
            (idx + 1) as u32
        };
    }
}

fn dir_entry(name: &str, object_type: u8, child: u32, start: u32, size: u64) -> Vec<u8> {
    let mut entry = Vec::with_capacity(128);
    let units: Vec<u16> = name.encode_utf16().collect();
    for u in &units {
        entry.extend_from_slice(&u.to_le_bytes());
    }
    entry.resize(64, 0);
    entry.extend_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
    entry.push(object_type);
    entry.push(1); // color: black
    entry.extend_from_slice(&NOSTREAM.to_le_bytes()); // left
    entry.extend_from_slice(&NOSTREAM.to_le_bytes()); // right
    entry.extend_from_slice(&child.to_le_bytes());
    entry.extend_from_slice(&[0u8; 16]); // clsid
    entry.extend_from_slice(&[0u8; 4]); // state bits
    entry.extend_from_slice(&[0u8; 16]); // timestamps
    entry.extend_from_slice(&start.to_le_bytes());
    entry.extend_from_slice(&size.to_le_bytes());
    assert_eq!(entry.len(), 128);
    entry
}

// ---- BIFF record builders ----

pub fn rec(typ: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = typ.to_le_bytes().to_vec();
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn bof(substream_type: u16) -> Vec<u8> {
    let mut payload = vec![0x00, 0x06];
    payload.extend_from_slice(&substream_type.to_le_bytes());
    payload.extend_from_slice(&[0u8; 12]);
    rec(0x0809, &payload)
}

pub fn eof() -> Vec<u8> {
    rec(0x000A, &[])
}

pub fn xf(ifmt: u16) -> Vec<u8> {
    let mut payload = vec![0u8; 20];
    payload[2..4].copy_from_slice(&ifmt.to_le_bytes());
    rec(0x00E0, &payload)
}

pub fn format_record(id: u16, code: &str) -> Vec<u8> {
    let mut payload = id.to_le_bytes().to_vec();
    payload.extend_from_slice(&(code.len() as u16).to_le_bytes());
    payload.push(0); // compressed
    payload.extend_from_slice(code.as_bytes());
    rec(0x041E, &payload)
}

pub fn date1904(enabled: bool) -> Vec<u8> {
    rec(0x0022, &(enabled as u16).to_le_bytes())
}

pub fn boundsheet(offset: u32, name: &str) -> Vec<u8> {
    let mut payload = offset.to_le_bytes().to_vec();
    payload.push(0); // visible
    payload.push(0); // worksheet
    payload.push(name.len() as u8);
    payload.push(0); // compressed
    payload.extend_from_slice(name.as_bytes());
    rec(0x0085, &payload)
}

pub fn sst(strings: &[&str]) -> Vec<u8> {
    let mut payload = (strings.len() as u32).to_le_bytes().to_vec();
    payload.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    for s in strings {
        payload.extend_from_slice(&(s.chars().count() as u16).to_le_bytes());
        payload.push(0); // compressed, no rich runs
        payload.extend_from_slice(s.as_bytes());
    }
    rec(0x00FC, &payload)
}

fn cell_header(row: u16, col: u16, xf: u16) -> Vec<u8> {
    let mut out = row.to_le_bytes().to_vec();
    out.extend_from_slice(&col.to_le_bytes());
    out.extend_from_slice(&xf.to_le_bytes());
    out
}

pub fn label_sst(row: u16, col: u16, xf: u16, isst: u32) -> Vec<u8> {
    let mut payload = cell_header(row, col, xf);
    payload.extend_from_slice(&isst.to_le_bytes());
    rec(0x00FD, &payload)
}

pub fn number(row: u16, col: u16, xf: u16, value: f64) -> Vec<u8> {
    let mut payload = cell_header(row, col, xf);
    payload.extend_from_slice(&value.to_le_bytes());
    rec(0x0203, &payload)
}

pub fn rk_int(row: u16, col: u16, xf: u16, value: i32) -> Vec<u8> {
    let mut payload = cell_header(row, col, xf);
    payload.extend_from_slice(&(((value << 2) as u32) | 0x02).to_le_bytes());
    rec(0x027E, &payload)
}

pub fn boolerr_bool(row: u16, col: u16, xf: u16, value: bool) -> Vec<u8> {
    let mut payload = cell_header(row, col, xf);
    payload.push(value as u8);
    payload.push(0);
    rec(0x0205, &payload)
}

pub fn merged_cells(ranges: &[(u16, u16, u16, u16)]) -> Vec<u8> {
    let mut payload = (ranges.len() as u16).to_le_bytes().to_vec();
    for &(r1, r2, c1, c2) in ranges {
        payload.extend_from_slice(&r1.to_le_bytes());
        payload.extend_from_slice(&r2.to_le_bytes());
        payload.extend_from_slice(&c1.to_le_bytes());
        payload.extend_from_slice(&c2.to_le_bytes());
    }
    rec(0x00E5, &payload)
}

/// Assemble a workbook stream: globals (XFs, SST, sheet directory)
/// followed by one substream per sheet. BOUNDSHEET offsets are
/// resolved with a sizing pass.
pub fn build_workbook_stream(
    globals: &[Vec<u8>],
    sheets: &[(&str, Vec<Vec<u8>>)],
) -> Vec<u8> {
    let assemble = |offsets: &[u32]| -> Vec<u8> {
        let mut out = bof(0x0005);
        for g in globals {
            out.extend_from_slice(g);
        }
        for (i, (name, _)) in sheets.iter().enumerate() {
            out.extend_from_slice(&boundsheet(offsets[i], name));
        }
        out.extend_from_slice(&eof());
        out
    };

    // sizing pass with dummy offsets
    let dummy = vec![0u32; sheets.len()];
    let globals_len = assemble(&dummy).len();

    let mut offsets = Vec::with_capacity(sheets.len());
    let mut pos = globals_len;
    let mut substreams = Vec::with_capacity(sheets.len());
    for (_, records) in sheets {
        offsets.push(pos as u32);
        let mut sub = bof(0x0010);
        for r in records {
            sub.extend_from_slice(r);
        }
        sub.extend_from_slice(&eof());
        pos += sub.len();
        substreams.push(sub);
    }

    let mut out = assemble(&offsets);
    for sub in substreams {
        out.extend_from_slice(&sub);
    }
    out
}

// ---- xlsx builder ----

/// Assemble an xlsx archive from (part name, content) pairs.
pub fn build_zip(parts: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in parts {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A minimal single-sheet xlsx with the given styles and sheet XML.
pub fn build_xlsx(styles_xml: &str, shared_strings: Option<&str>, sheet_xml: &str) -> Vec<u8> {
    let mut parts: Vec<(&str, &str)> = vec![
        (
            "_rels/.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#,
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>
</Relationships>"#,
        ),
        (
            "xl/workbook.xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
        ),
        ("xl/styles.xml", styles_xml),
        ("xl/worksheets/sheet1.xml", sheet_xml),
    ];
    if let Some(sst) = shared_strings {
        parts.push(("xl/sharedStrings.xml", sst));
    }
    build_zip(&parts)
}
