//! Format registry and priority-ordered probe dispatch.
//!
//! Each backend exposes openers for three input shapes: a filesystem
//! path, an already opened file, and a plain byte reader. A probe
//! either matches and yields a source, rejects the input as not its
//! format, or fails hard; the registry folds this three-way outcome
//! across its table in ascending priority order.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::errors::{Error, Result};
use crate::table::Source;

/// Outcome of one format probe.
pub enum Probe {
    /// The backend recognized the bytes and opened them.
    Matched(Box<dyn Source>),
    /// The bytes are not in this backend's format; try the next one.
    Rejected,
}

/// Opens a source from a filesystem path.
pub type PathOpener = fn(&Path) -> Result<Probe>;
/// Opens a source from an already opened file.
pub type FileOpener = fn(File) -> Result<Probe>;
/// Opens a source from a byte reader, draining it fully.
pub type ReaderOpener = fn(Box<dyn Read>) -> Result<Probe>;

struct Entry<T> {
    name: &'static str,
    priority: i32,
    open: T,
}

/// An explicitly wired set of format backends.
///
/// Probing is deterministic: entries are tried in ascending priority,
/// insertion order within equal priorities. Registering a name twice
/// in the same table replaces the earlier entry.
#[derive(Default)]
pub struct Registry {
    by_path: Vec<Entry<PathOpener>>,
    by_file: Vec<Entry<FileOpener>>,
    by_reader: Vec<Entry<ReaderOpener>>,
}

impl Registry {
    /// An empty registry; callers install backends themselves.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in backends installed: xls at
    /// priority 1, xlsx at 5 and delimited text at 100.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register_path("xls", 1, crate::xls::open_path);
        reg.register_file("xls", 1, crate::xls::open_file);
        reg.register_reader("xls", 1, crate::xls::open_reader);
        reg.register_path("xlsx", 5, crate::xlsx::open_path);
        reg.register_file("xlsx", 5, crate::xlsx::open_file);
        reg.register_reader("xlsx", 5, crate::xlsx::open_reader);
        reg.register_path("text", 100, crate::simple::open_path);
        reg.register_reader("text", 100, crate::simple::open_reader);
        reg
    }

    pub fn register_path(&mut self, name: &'static str, priority: i32, open: PathOpener) {
        register(&mut self.by_path, name, priority, open);
    }

    pub fn register_file(&mut self, name: &'static str, priority: i32, open: FileOpener) {
        register(&mut self.by_file, name, priority, open);
    }

    pub fn register_reader(&mut self, name: &'static str, priority: i32, open: ReaderOpener) {
        register(&mut self.by_reader, name, priority, open);
    }

    /// Probe a file on disk through the path table.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Box<dyn Source>> {
        let path = path.as_ref();
        for entry in &self.by_path {
            match (entry.open)(path)? {
                Probe::Matched(source) => return Ok(source),
                Probe::Rejected => {
                    debug!("{} is not in {} format", path.display(), entry.name);
                }
            }
        }
        Err(Error::UnknownFormat)
    }

    /// Probe an already opened file through the file table. Each probe
    /// receives its own handle onto the same description; openers seek
    /// to the start themselves.
    pub fn open_file(&self, file: File) -> Result<Box<dyn Source>> {
        for entry in &self.by_file {
            let probe_file = file.try_clone()?;
            match (entry.open)(probe_file)? {
                Probe::Matched(source) => return Ok(source),
                Probe::Rejected => debug!("file is not in {} format", entry.name),
            }
        }
        Err(Error::UnknownFormat)
    }

    /// Probe a byte reader. The stream is drained once up front so
    /// every backend can inspect it from the start.
    pub fn open_reader(&self, mut reader: impl Read) -> Result<Box<dyn Source>> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        for entry in &self.by_reader {
            let cursor: Box<dyn Read> = Box::new(std::io::Cursor::new(data.clone()));
            match (entry.open)(cursor)? {
                Probe::Matched(source) => return Ok(source),
                Probe::Rejected => {
                    debug!("reader content is not in {} format", entry.name);
                }
            }
        }
        Err(Error::UnknownFormat)
    }
}

fn register<T>(table: &mut Vec<Entry<T>>, name: &'static str, priority: i32, open: T) {
    table.retain(|e| e.name != name);
    table.push(Entry {
        name,
        priority,
        open,
    });
    table.sort_by_key(|e| e.priority);
}
