//! Per-record gzip framing.
//!
//! Each WARC record is compressed as its own gzip member, rather than the
//! whole file being one gzip stream. This lets a reader seek to a byte
//! offset recorded in a CDX entry and decode exactly one record without
//! touching anything before or after it.

use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::Compression;

use super::WarcRecord;

/// Serializes `record` and wraps it in its own gzip member, ready to be
/// appended directly to an open WARC file.
pub fn gzip_member(record: &WarcRecord) -> std::io::Result<Vec<u8>> {
    let bytes = record.to_bytes();
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len()), Compression::default());
    encoder.write_all(&bytes)?;
    return encoder.finish();
}
