//! BIFF8 string decoding.
//!
//! BIFF8 strings carry a per-string option byte: bit 0 selects wide
//! UTF-16LE over compressed single-byte text, bit 3 prefixes rich-text
//! run counts and bit 2 an extended (phonetic) block. Strings inside
//! the SST may spill across CONTINUE records, and every spill restarts
//! the option byte for the remaining characters.

use encoding_rs::Encoding;

use super::records::Record;
use crate::errors::{Error, Result};

const F_HIGH_BYTE: u8 = 0x01;
const F_EXT_ST: u8 = 0x04;
const F_RICH_ST: u8 = 0x08;

/// Text encoding for compressed (single-byte) BIFF strings, selected
/// by the workbook's CODEPAGE record.
#[derive(Debug, Clone, Copy)]
pub struct XlsEncoding {
    encoding: &'static Encoding,
}

impl Default for XlsEncoding {
    fn default() -> Self {
        XlsEncoding {
            encoding: encoding_rs::WINDOWS_1252,
        }
    }
}

impl XlsEncoding {
    pub fn from_codepage(codepage: u16) -> Self {
        let encoding = match codepage {
            874 => encoding_rs::WINDOWS_874,
            932 => encoding_rs::SHIFT_JIS,
            936 => encoding_rs::GBK,
            949 => encoding_rs::EUC_KR,
            950 => encoding_rs::BIG5,
            1250 => encoding_rs::WINDOWS_1250,
            1251 => encoding_rs::WINDOWS_1251,
            1253 => encoding_rs::WINDOWS_1253,
            1254 => encoding_rs::WINDOWS_1254,
            1255 => encoding_rs::WINDOWS_1255,
            1256 => encoding_rs::WINDOWS_1256,
            1257 => encoding_rs::WINDOWS_1257,
            1258 => encoding_rs::WINDOWS_1258,
            10000 => encoding_rs::MACINTOSH,
            _ => encoding_rs::WINDOWS_1252,
        };
        XlsEncoding { encoding }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        self.encoding.decode(bytes).0.into_owned()
    }
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Short string with an 8-bit character count (sheet names).
pub fn parse_short_string(data: &[u8], enc: XlsEncoding) -> Result<String> {
    if data.len() < 2 {
        return Err(Error::Malformed("short string header truncated".into()));
    }
    let cch = data[0] as usize;
    let wide = data[1] & F_HIGH_BYTE != 0;
    let nbytes = if wide { cch * 2 } else { cch };
    if data.len() < 2 + nbytes {
        return Err(Error::Malformed("short string body truncated".into()));
    }
    let body = &data[2..2 + nbytes];
    Ok(if wide {
        decode_utf16le(body)
    } else {
        enc.decode(body)
    })
}

/// XLUnicodeString with a 16-bit character count (LABEL cells, FORMAT
/// codes, STRING records). Returns the text and bytes consumed.
pub fn parse_unicode_string(data: &[u8], enc: XlsEncoding) -> Result<(String, usize)> {
    if data.len() < 3 {
        return Err(Error::Malformed("unicode string header truncated".into()));
    }
    let cch = u16::from_le_bytes([data[0], data[1]]) as usize;
    let flags = data[2];
    let wide = flags & F_HIGH_BYTE != 0;
    let mut pos = 3;
    // rich-run and extended blocks trail the characters; only their
    // counts precede them
    let runs = if flags & F_RICH_ST != 0 {
        let runs = read_u16_at(data, pos)? as usize;
        pos += 2;
        runs
    } else {
        0
    };
    let ext = if flags & F_EXT_ST != 0 {
        let cb = read_u32_at(data, pos)? as usize;
        pos += 4;
        cb
    } else {
        0
    };
    let nbytes = if wide { cch * 2 } else { cch };
    if data.len() < pos + nbytes {
        return Err(Error::Malformed("unicode string body truncated".into()));
    }
    let body = &data[pos..pos + nbytes];
    let text = if wide {
        decode_utf16le(body)
    } else {
        enc.decode(body)
    };
    Ok((text, pos + nbytes + 4 * runs + ext))
}

/// Cursor over a spliced logical record that knows where each CONTINUE
/// spill begins.
pub struct SegCursor<'a> {
    data: &'a [u8],
    boundaries: &'a [usize],
    pos: usize,
}

impl<'a> SegCursor<'a> {
    pub fn new(record: &'a Record) -> Self {
        SegCursor {
            data: &record.data,
            boundaries: &record.boundaries,
            pos: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn at_boundary(&self) -> bool {
        self.boundaries.contains(&self.pos)
    }

    fn next_boundary(&self) -> usize {
        self.boundaries
            .iter()
            .copied()
            .find(|&b| b > self.pos)
            .unwrap_or(self.data.len())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(Error::Malformed("string table truncated".into()));
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(Error::Malformed("string table truncated".into()));
        }
        let v = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::Malformed("string table truncated".into()));
        }
        let v = u32::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::Malformed("string table truncated".into()));
        }
        self.pos += n;
        Ok(())
    }

    /// Read `cch` characters, re-reading the option byte whenever the
    /// character data crosses into a CONTINUE spill.
    fn read_chars(&mut self, cch: usize, mut wide: bool, enc: XlsEncoding) -> Result<String> {
        let mut out = String::with_capacity(cch);
        let mut remaining = cch;
        while remaining > 0 {
            if self.at_boundary() {
                wide = self.read_u8()? & F_HIGH_BYTE != 0;
            }
            let char_bytes = if wide { 2 } else { 1 };
            let avail = (self.next_boundary() - self.pos) / char_bytes;
            if avail == 0 {
                return Err(Error::Malformed("string spans spill mid-character".into()));
            }
            let take = remaining.min(avail);
            let body = &self.data[self.pos..self.pos + take * char_bytes];
            if wide {
                out.push_str(&decode_utf16le(body));
            } else {
                out.push_str(&enc.decode(body));
            }
            self.pos += take * char_bytes;
            remaining -= take;
        }
        Ok(out)
    }

    /// Read one XLUnicodeRichExtendedString, skipping rich-text runs
    /// and the extended block.
    pub fn read_rich_string(&mut self, enc: XlsEncoding) -> Result<String> {
        let cch = self.read_u16()? as usize;
        let flags = self.read_u8()?;
        let wide = flags & F_HIGH_BYTE != 0;
        let runs = if flags & F_RICH_ST != 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let ext = if flags & F_EXT_ST != 0 {
            self.read_u32()? as usize
        } else {
            0
        };
        let text = self.read_chars(cch, wide, enc)?;
        self.skip(4 * runs + ext)?;
        Ok(text)
    }
}

/// Parse the shared string table out of a spliced SST record.
pub fn parse_sst(record: &Record, enc: XlsEncoding) -> Result<Vec<String>> {
    let mut cur = SegCursor::new(record);
    let _total = cur.read_u32()?;
    let unique = cur.read_u32()? as usize;
    let mut strings = Vec::with_capacity(unique.min(1 << 20));
    for _ in 0..unique {
        if cur.remaining() < 3 {
            break;
        }
        strings.push(cur.read_rich_string(enc)?);
    }
    Ok(strings)
}

fn read_u16_at(data: &[u8], offset: usize) -> Result<u16> {
    if offset + 2 > data.len() {
        return Err(Error::Malformed("string header truncated".into()));
    }
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

fn read_u32_at(data: &[u8], offset: usize) -> Result<u32> {
    if offset + 4 > data.len() {
        return Err(Error::Malformed("string header truncated".into()));
    }
    Ok(u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xls::records::RT_SST;

    fn sst_record(data: Vec<u8>, boundaries: Vec<usize>) -> Record {
        Record {
            typ: RT_SST,
            data,
            boundaries,
        }
    }

    fn sst_header(total: u32, unique: u32) -> Vec<u8> {
        let mut out = total.to_le_bytes().to_vec();
        out.extend_from_slice(&unique.to_le_bytes());
        out
    }

    #[test]
    fn compressed_strings() {
        let mut data = sst_header(2, 2);
        data.extend_from_slice(&[5, 0, 0]);
        data.extend_from_slice(b"Hello");
        data.extend_from_slice(&[2, 0, 0]);
        data.extend_from_slice(b"hi");
        let strings = sst_record(data, vec![]);
        assert_eq!(
            parse_sst(&strings, XlsEncoding::default()).unwrap(),
            vec!["Hello", "hi"]
        );
    }

    #[test]
    fn wide_string() {
        let mut data = sst_header(1, 1);
        data.extend_from_slice(&[2, 0, F_HIGH_BYTE]);
        for u in "héllo".encode_utf16().take(2) {
            data.extend_from_slice(&u.to_le_bytes());
        }
        let strings = sst_record(data, vec![]);
        assert_eq!(
            parse_sst(&strings, XlsEncoding::default()).unwrap(),
            vec!["hé"]
        );
    }

    #[test]
    fn spilled_string_restarts_option_byte() {
        // one 8-char compressed string; the last 3 chars spill into a
        // CONTINUE whose payload restarts with its own option byte
        let mut data = sst_header(1, 1);
        data.extend_from_slice(&[8, 0, 0]);
        data.extend_from_slice(b"abcde");
        let boundary = data.len();
        data.push(0); // option byte of the spill: still compressed
        data.extend_from_slice(b"fgh");
        let strings = sst_record(data, vec![boundary]);
        assert_eq!(
            parse_sst(&strings, XlsEncoding::default()).unwrap(),
            vec!["abcdefgh"]
        );
    }

    #[test]
    fn spill_can_switch_width() {
        // compressed start, wide continuation
        let mut data = sst_header(1, 1);
        data.extend_from_slice(&[4, 0, 0]);
        data.extend_from_slice(b"ab");
        let boundary = data.len();
        data.push(F_HIGH_BYTE);
        for u in "éß".encode_utf16() {
            data.extend_from_slice(&u.to_le_bytes());
        }
        let strings = sst_record(data, vec![boundary]);
        assert_eq!(
            parse_sst(&strings, XlsEncoding::default()).unwrap(),
            vec!["abéß"]
        );
    }

    #[test]
    fn rich_runs_are_skipped() {
        let mut data = sst_header(1, 1);
        data.extend_from_slice(&[3, 0, F_RICH_ST]);
        data.extend_from_slice(&2u16.to_le_bytes()); // two runs
        data.extend_from_slice(b"abc");
        data.extend_from_slice(&[0u8; 8]); // run data trails the text
        let strings = sst_record(data, vec![]);
        assert_eq!(
            parse_sst(&strings, XlsEncoding::default()).unwrap(),
            vec!["abc"]
        );
    }

    #[test]
    fn short_and_unicode_strings() {
        let enc = XlsEncoding::default();
        assert_eq!(
            parse_short_string(&[6, 0, b'S', b'h', b'e', b'e', b't', b'1'], enc).unwrap(),
            "Sheet1"
        );
        let (s, consumed) = parse_unicode_string(&[3, 0, 0, b'a', b'b', b'c'], enc).unwrap();
        assert_eq!(s, "abc");
        assert_eq!(consumed, 6);
    }
}
