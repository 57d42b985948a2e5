//! Compound File Binary (OLE2) container reader.
//!
//! A CFB file is a miniature filesystem: a header, a File Allocation
//! Table mapping each sector to the next one in its chain, a directory
//! of named entries, and a secondary mini-FAT for streams smaller than
//! the mini-stream cutoff. Legacy spreadsheets store their BIFF record
//! stream in a directory entry named `Workbook` (or `Book`).

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use zerocopy::{FromBytes, LE, U16, U32, U64};
use zerocopy_derive::FromBytes as DeriveFromBytes;

use crate::errors::{Error, Result};

/// Magic bytes at the start of every CFB file.
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// End of a sector chain.
const ENDOFCHAIN: u32 = 0xFFFFFFFE;
/// Unallocated sector.
const FREESECT: u32 = 0xFFFFFFFF;
/// Unallocated directory entry reference.
const NOSTREAM: u32 = 0xFFFFFFFF;

const STGTY_STORAGE: u8 = 1;
const STGTY_STREAM: u8 = 2;
const STGTY_ROOT: u8 = 5;

const HEADER_SIZE: usize = 512;
const DIRENTRY_SIZE: usize = 128;

/// On-disk CFB header (512 bytes, little-endian).
#[derive(DeriveFromBytes)]
#[repr(C)]
struct RawHeader {
    signature: [u8; 8],
    clsid: [u8; 16],
    minor_version: U16<LE>,
    major_version: U16<LE>,
    byte_order: U16<LE>,
    sector_shift: U16<LE>,
    mini_sector_shift: U16<LE>,
    reserved: [u8; 6],
    num_dir_sectors: U32<LE>,
    num_fat_sectors: U32<LE>,
    first_dir_sector: U32<LE>,
    transaction_signature: U32<LE>,
    mini_stream_cutoff: U32<LE>,
    first_minifat_sector: U32<LE>,
    num_minifat_sectors: U32<LE>,
    first_difat_sector: U32<LE>,
    num_difat_sectors: U32<LE>,
    difat: [U32<LE>; 109],
}

/// On-disk directory entry (128 bytes).
#[derive(DeriveFromBytes)]
#[repr(C)]
struct RawDirEntry {
    /// UTF-16LE name, null-padded
    name: [u8; 64],
    /// name length in bytes, including the trailing null
    name_len: U16<LE>,
    object_type: u8,
    color: u8,
    left_sibling: U32<LE>,
    right_sibling: U32<LE>,
    child: U32<LE>,
    clsid: [u8; 16],
    state_bits: U32<LE>,
    created: U64<LE>,
    modified: U64<LE>,
    start_sector: U32<LE>,
    stream_size: U64<LE>,
}

/// A directory entry, flattened out of the on-disk red-black tree.
/// Sibling/child indices are retained as data only; enumeration is
/// linear over the directory array.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub object_type: u8,
    pub left_sibling: u32,
    pub right_sibling: u32,
    pub child: u32,
    pub start_sector: u32,
    pub size: u64,
}

impl DirEntry {
    pub fn is_stream(&self) -> bool {
        self.object_type == STGTY_STREAM
    }
}

/// A parsed CFB document over a seekable byte source.
#[derive(Debug)]
pub struct Document<R: Read + Seek> {
    reader: R,
    sector_size: usize,
    mini_sector_size: usize,
    mini_stream_cutoff: u32,
    fat: Vec<u32>,
    minifat: Vec<u32>,
    dir: Vec<DirEntry>,
    /// Root storage payload, loaded on first mini-stream read.
    ministream: Option<Vec<u8>>,
}

/// Check the CFB magic without consuming the reader position.
pub fn sniff<R: Read + Seek>(reader: &mut R) -> io::Result<bool> {
    let mut magic = [0u8; 8];
    reader.seek(SeekFrom::Start(0))?;
    let ok = match reader.read_exact(&mut magic) {
        Ok(()) => &magic == MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    reader.seek(SeekFrom::Start(0))?;
    Ok(ok)
}

impl<R: Read + Seek> Document<R> {
    /// Parse the container structure: header, DIFAT, FAT, directory
    /// and mini-FAT. Callers probe the magic with [`sniff`] first; a
    /// bad signature here is a hard [`Error::Malformed`].
    pub fn open(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut header_buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;

        let header = RawHeader::read_from_bytes(&header_buf)
            .map_err(|_| Error::Malformed("short CFB header".into()))?;
        if &header.signature != MAGIC {
            return Err(Error::Malformed("bad CFB signature".into()));
        }
        if header.byte_order.get() != 0xFFFE {
            return Err(Error::Malformed("bad CFB byte order mark".into()));
        }

        let sector_shift = header.sector_shift.get();
        if !(7..=16).contains(&sector_shift) {
            return Err(Error::Malformed(format!(
                "implausible sector shift {sector_shift}"
            )));
        }
        let sector_size = 1usize << sector_shift;

        let mini_sector_shift = header.mini_sector_shift.get();
        if !(4..=sector_shift).contains(&mini_sector_shift) {
            return Err(Error::Malformed(format!(
                "implausible mini sector shift {mini_sector_shift}"
            )));
        }
        let mini_sector_size = 1usize << mini_sector_shift;

        let mut doc = Document {
            reader,
            sector_size,
            mini_sector_size,
            mini_stream_cutoff: header.mini_stream_cutoff.get(),
            fat: Vec::new(),
            minifat: Vec::new(),
            dir: Vec::new(),
            ministream: None,
        };

        doc.load_fat(&header)?;
        doc.load_directory(header.first_dir_sector.get())?;
        if header.num_minifat_sectors.get() > 0 {
            let minifat_data = doc.read_chain(header.first_minifat_sector.get())?;
            doc.minifat = parse_sector_ids(&minifat_data);
        }
        Ok(doc)
    }

    /// Assemble the FAT from the 109 header DIFAT entries plus any
    /// DIFAT extension sectors.
    fn load_fat(&mut self, header: &RawHeader) -> Result<()> {
        let mut fat_sectors: Vec<u32> = header
            .difat
            .iter()
            .map(|s| s.get())
            .take_while(|&s| s != FREESECT && s != ENDOFCHAIN)
            .collect();

        let mut difat_sector = header.first_difat_sector.get();
        let entries_per_sector = self.sector_size / 4 - 1;
        let mut seen = 0u32;
        while difat_sector != ENDOFCHAIN && difat_sector != FREESECT {
            seen += 1;
            if seen > header.num_difat_sectors.get().saturating_add(1) {
                return Err(Error::Malformed("DIFAT chain cycle".into()));
            }
            let data = self.read_sector(difat_sector)?;
            for i in 0..entries_per_sector {
                let sector = read_u32(&data, i * 4);
                if sector == FREESECT || sector == ENDOFCHAIN {
                    break;
                }
                fat_sectors.push(sector);
            }
            difat_sector = read_u32(&data, entries_per_sector * 4);
        }

        self.fat.reserve(fat_sectors.len() * (self.sector_size / 4));
        for sector_id in fat_sectors {
            let data = self.read_sector(sector_id)?;
            self.fat.extend(parse_sector_ids(&data));
        }
        Ok(())
    }

    fn load_directory(&mut self, first_dir_sector: u32) -> Result<()> {
        let dir_data = self.read_chain(first_dir_sector)?;
        for chunk in dir_data.chunks_exact(DIRENTRY_SIZE) {
            let raw = RawDirEntry::read_from_bytes(chunk)
                .map_err(|_| Error::Malformed("short directory entry".into()))?;
            if raw.object_type != STGTY_STORAGE
                && raw.object_type != STGTY_STREAM
                && raw.object_type != STGTY_ROOT
            {
                // free entry; keep the slot so sibling indexes stay valid
                self.dir.push(DirEntry {
                    name: String::new(),
                    object_type: raw.object_type,
                    left_sibling: NOSTREAM,
                    right_sibling: NOSTREAM,
                    child: NOSTREAM,
                    start_sector: 0,
                    size: 0,
                });
                continue;
            }
            let name_len = (raw.name_len.get() as usize).min(64);
            let name = decode_utf16le(&raw.name[..name_len.saturating_sub(2)]);
            // 512-byte-sector writers only maintain the low 32 bits
            let size = if self.sector_size == 512 {
                raw.stream_size.get() & 0xFFFF_FFFF
            } else {
                raw.stream_size.get()
            };
            self.dir.push(DirEntry {
                name,
                object_type: raw.object_type,
                left_sibling: raw.left_sibling.get(),
                right_sibling: raw.right_sibling.get(),
                child: raw.child.get(),
                start_sector: raw.start_sector.get(),
                size,
            });
        }
        if self.dir.is_empty() {
            return Err(Error::Malformed("empty CFB directory".into()));
        }
        Ok(())
    }

    fn read_sector(&mut self, sector_id: u32) -> Result<Vec<u8>> {
        let position = (sector_id as u64 + 1) * self.sector_size as u64;
        self.reader.seek(SeekFrom::Start(position))?;
        let mut buf = vec![0u8; self.sector_size];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a whole FAT chain. Visiting more sectors than the FAT holds
    /// means the chain loops.
    fn read_chain(&mut self, start_sector: u32) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut sector = start_sector;
        let mut steps = 0usize;
        while sector != ENDOFCHAIN {
            if sector as usize >= self.fat.len() {
                return Err(Error::Malformed(format!(
                    "sector {sector} out of FAT range"
                )));
            }
            steps += 1;
            if steps > self.fat.len() {
                return Err(Error::Malformed("FAT chain cycle".into()));
            }
            let sector_data = self.read_sector(sector)?;
            data.extend_from_slice(&sector_data);
            sector = self.fat[sector as usize];
        }
        Ok(data)
    }

    fn read_mini_chain(&mut self, start_sector: u32, size: u64) -> Result<Vec<u8>> {
        if self.ministream.is_none() {
            let root = self
                .dir
                .iter()
                .find(|e| e.object_type == STGTY_ROOT)
                .ok_or_else(|| Error::Malformed("no root storage entry".into()))?;
            let start = root.start_sector;
            let root_size = root.size;
            let mut data = self.read_chain(start)?;
            data.truncate(root_size as usize);
            self.ministream = Some(data);
        }

        let ministream = self
            .ministream
            .as_ref()
            .ok_or_else(|| Error::Malformed("mini-stream unavailable".into()))?;

        let mut data = Vec::with_capacity(size as usize);
        let mut sector = start_sector;
        let mut steps = 0usize;
        while sector != ENDOFCHAIN {
            if sector as usize >= self.minifat.len() {
                return Err(Error::Malformed(format!(
                    "mini sector {sector} out of mini-FAT range"
                )));
            }
            steps += 1;
            if steps > self.minifat.len() {
                return Err(Error::Malformed("mini-FAT chain cycle".into()));
            }
            let offset = sector as usize * self.mini_sector_size;
            if offset + self.mini_sector_size > ministream.len() {
                return Err(Error::Malformed("mini sector out of bounds".into()));
            }
            data.extend_from_slice(&ministream[offset..offset + self.mini_sector_size]);
            sector = self.minifat[sector as usize];
        }
        data.truncate(size as usize);
        Ok(data)
    }

    /// Names of the stream entries, in directory order.
    pub fn list_streams(&self) -> Vec<String> {
        self.dir
            .iter()
            .filter(|e| e.is_stream())
            .map(|e| e.name.clone())
            .collect()
    }

    /// Directory entries, including storages and the root.
    pub fn entries(&self) -> &[DirEntry] {
        &self.dir
    }

    /// Open the named stream as a seekable byte reader bounded by the
    /// entry's declared size. Name matching is case-insensitive.
    pub fn open_stream(&mut self, name: &str) -> Result<Cursor<Vec<u8>>> {
        let entry = self
            .dir
            .iter()
            .find(|e| e.is_stream() && e.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| Error::Malformed(format!("stream '{name}' not found")))?;
        let data = if entry.size < self.mini_stream_cutoff as u64 {
            self.read_mini_chain(entry.start_sector, entry.size)?
        } else {
            let mut data = self.read_chain(entry.start_sector)?;
            data.truncate(entry.size as usize);
            data
        };
        Ok(Cursor::new(data))
    }

    /// True if the document holds a stream with this name.
    pub fn has_stream(&self, name: &str) -> bool {
        self.dir
            .iter()
            .any(|e| e.is_stream() && e.name.eq_ignore_ascii_case(name))
    }
}

fn parse_sector_ids(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    U32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .unwrap_or(FREESECT)
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}
