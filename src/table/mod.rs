//! Uniform access to tabular data collections.
//!
//! Every backend exposes its contents through the same two traits: a
//! [`Source`] is a named set of collections (a workbook, a delimited
//! file), and a [`Collection`] is one iterable table of rows (a sheet).
//! The binary decoders materialize rows into the shared [`Sheet`]
//! buffer; the delimited backend implements the traits directly.

mod sheet;
mod value;

pub use sheet::Sheet;
pub use value::{Value, ValueType};

use std::any::Any;

use crate::errors::Result;

/// Marks a continuation column within a merged cell.
pub const CONTINUE_COLUMN_MERGED: &str = "→";
/// Marks the last column of a merged cell.
pub const END_COLUMN_MERGED: &str = "⇥";
/// Marks a continuation row within a merged cell.
pub const CONTINUE_ROW_MERGED: &str = "↓";
/// Marks the last row of a merged cell.
pub const END_ROW_MERGED: &str = "⤓";

/// A set of data collections.
pub trait Source: std::fmt::Debug {
    /// List the individual data tables within this source, in document
    /// order and without duplicates.
    fn list(&self) -> Vec<String>;

    /// Get a collection from the source by name. The first call
    /// materializes the collection; later calls return the cached rows
    /// with the cursor reset.
    fn get(&mut self, name: &str) -> Result<&mut dyn Collection>;

    /// Release buffered collections. The backing file handle, if any,
    /// is released when the source is dropped.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An iterable collection of records.
pub trait Collection {
    /// Advance to the next record of content. Must be called before
    /// the first `strings`/`types`/`formats`/`scan`.
    fn next_row(&mut self) -> bool;

    /// Values of the current record, rendered through each cell's
    /// format code.
    fn strings(&self) -> Vec<String>;

    /// Semantic types of the current record's cells.
    fn types(&self) -> Vec<ValueType>;

    /// Format codes of the current record's cells.
    fn formats(&self) -> Vec<String>;

    /// Bind the current record into typed destinations. Supported
    /// destination types are `bool`, `i64`, `f64`, `String` and
    /// `chrono::NaiveDateTime`; anything else yields
    /// [`Error::InvalidScanType`](crate::Error::InvalidScanType).
    /// A cell that fails to parse yields
    /// [`Error::Scan`](crate::Error::Scan) carrying the column index;
    /// the iterator itself stays usable.
    fn scan(&self, dests: &mut [&mut dyn Any]) -> Result<()>;

    /// True if the collection holds no rows.
    fn is_empty(&self) -> bool;

    /// The sticky iteration error, if one occurred.
    fn err(&self) -> Option<&crate::errors::Error>;
}
