//! WARC Writer.
//!
//! An explicit [`Writer`] trait in place of an inheritance-based writer
//! hierarchy. The single implementation here is a single-writer task that
//! drains a channel of captures and appends gzip-framed records to files
//! managed by [`FileManager`].

pub mod file_manager;

pub use file_manager::FileManager;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// What the writer needs to append one captured transaction: the
/// already gzip-framed bytes for each record, in the order they should
/// land in the file.
pub struct PreparedWrite {
    pub destination_key: String,
    pub record_bytes: Vec<Vec<u8>>,
}

/// The write-path contract, as an explicit trait rather than an
/// inheritance-based writer hierarchy.
pub trait Writer: Send + Sync {
    /// Appends every record in `write` to its destination file, returning
    /// the byte offset the first record landed at (for the CDX entry).
    fn write_pair(&self, write: PreparedWrite) -> Result<u64>;

    /// Ensures a `warcinfo` record has been written to `destination_key`
    /// before any other record, writing one now if this is the first call
    /// for that destination.
    fn ensure_warcinfo(&self, destination_key: &str, filename: &str, date: DateTime<Utc>) -> Result<()>;

    /// Flushes and closes every open file.
    fn close(&self) -> Result<()>;

    /// Closes any file that has sat idle past the configured rollover
    /// window, to be called periodically by a maintenance task.
    fn close_idle(&self) -> Result<()>;
}
