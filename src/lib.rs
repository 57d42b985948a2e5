//! Loquat - a Rust library for reading tabular data files
//!
//! Loquat opens spreadsheets and delimited plaintext files and exposes
//! their contents through one streaming interface: list the named
//! tables, get one by name, iterate its rows, and read each row as
//! strings, inferred types, format codes or typed field bindings.
//!
//! # Supported formats
//!
//! - **xls**: legacy BIFF8 workbooks inside an OLE2/Compound File
//!   Binary container
//! - **xlsx**: Office Open XML spreadsheets (a ZIP archive of XML
//!   parts)
//! - **delimited text**: tab- or comma-separated files
//!
//! This is a read-only library: formulas surface their cached values,
//! and nothing is ever written back.
//!
//! # Example
//!
//! ```no_run
//! use loquat::{Collection, Source};
//!
//! # fn main() -> loquat::Result<()> {
//! let mut source = loquat::open("report.xlsx")?;
//! for name in source.list() {
//!     let sheet = source.get(&name)?;
//!     while sheet.next_row() {
//!         println!("{}", sheet.strings().join("\t"));
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - typed access
//!
//! ```no_run
//! use loquat::{Collection, Source};
//!
//! # fn main() -> loquat::Result<()> {
//! let mut source = loquat::open("people.csv")?;
//! let names = source.list();
//! let rows = source.get(&names[0])?;
//! while rows.next_row() {
//!     let mut name = String::new();
//!     let mut age = 0i64;
//!     rows.scan(&mut [&mut name, &mut age])?;
//!     println!("{name} is {age}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Format dispatch
//!
//! [`open`] probes the built-in backends in priority order and returns
//! the first match; a file nobody recognizes yields
//! [`Error::UnknownFormat`]. Callers who want explicit wiring build
//! their own [`Registry`] and install only the backends they need.

pub mod cfb;
mod errors;
pub mod numfmt;
mod registry;
pub mod simple;
mod table;
pub mod xls;
pub mod xlsx;

use once_cell::sync::Lazy;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub use errors::{Error, Result};
pub use registry::{FileOpener, PathOpener, Probe, ReaderOpener, Registry};
pub use table::{
    CONTINUE_COLUMN_MERGED, CONTINUE_ROW_MERGED, Collection, END_COLUMN_MERGED, END_ROW_MERGED,
    Sheet, Source, Value, ValueType,
};

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(Registry::with_defaults);

/// Open a tabular data file through the default registry.
pub fn open(path: impl AsRef<Path>) -> Result<Box<dyn Source>> {
    DEFAULT_REGISTRY.open(path)
}

/// Open a tabular data file from an already opened file.
pub fn open_file(file: File) -> Result<Box<dyn Source>> {
    DEFAULT_REGISTRY.open_file(file)
}

/// Open a tabular data file from a byte reader. The reader is fully
/// drained before this returns; the source owns the buffered bytes.
pub fn open_reader(reader: impl Read) -> Result<Box<dyn Source>> {
    DEFAULT_REGISTRY.open_reader(reader)
}
