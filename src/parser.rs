//! Record Loader/Parser.
//!
//! Reads WARC records back out of a file written by this crate's own
//! writer: one gzip member per record, seekable by byte offset. Used both
//! to verify a dedup-index hit still points at readable bytes and to
//! rebuild a CDXJ index offline from an existing file.
//!
//! The header parsing loop is a hand-rolled header reader: read line by
//! line until a bare `\r\n`, then split each line on the first `:`.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::bufread::GzDecoder;

use crate::dedup::CdxEntry;
use crate::error::{RecorderError, Result};
use crate::surt::create_surt;

/// One WARC record as read back from disk, with enough of the HTTP layer
/// parsed out to rebuild a CDX row.
#[derive(Debug, Clone)]
pub struct ParsedRecordHead {
    pub offset: u64,
    pub warc_type: String,
    pub target_uri: Option<String>,
    pub date: Option<String>,
    pub payload_digest: Option<String>,
    pub content_length: usize,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
}

/// Iterates the gzip-member-per-record WARC file at `path`, yielding one
/// [`ParsedRecordHead`] per record in file order.
pub fn parse_file(path: &Path) -> Result<Vec<ParsedRecordHead>> {
    let file = File::open(path).map_err(RecorderError::Io)?;
    let file_size = file.metadata().map_err(RecorderError::Io)?.len();
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut offset = 0u64;

    while offset < file_size {
        reader.seek(SeekFrom::Start(offset)).map_err(RecorderError::Io)?;

        let mut decoder = GzDecoder::new(&mut reader);
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .map_err(RecorderError::Io)?;
        // GzDecoder reads from its BufRead only as far as the gzip member
        // extends, so the underlying reader's position is the offset of
        // the next member.
        let next_offset = decoder.get_mut().stream_position().map_err(RecorderError::Io)?;

        let record = parse_one_record(offset, &decoded)?;
        records.push(record);

        offset = next_offset;
    }

    return Ok(records);
}

/// Rebuilds the CDX rows a WARC file would have produced at capture time,
/// straight from the file on disk: one row per `response` or `revisit`
/// record, in file order. Used to confirm an offline rebuild agrees with
/// the index a live capture populated.
pub fn reindex_file(path: &Path) -> Result<Vec<CdxEntry>> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let records = parse_file(path)?;
    let mut entries = Vec::new();

    for record in &records {
        if !matches!(record.warc_type.as_str(), "response" | "revisit") {
            continue;
        }
        let Some(target_uri) = &record.target_uri else {
            continue;
        };
        let Some(date) = &record.date else { continue };

        let urlkey = create_surt(target_uri).map_err(|error| RecorderError::ParseFailure(error.to_string()))?;
        let timestamp = date
            .replace(['-', ':', 'T', 'Z'], "")
            .chars()
            .take(14)
            .collect::<String>();

        entries.push(CdxEntry {
            urlkey,
            timestamp,
            url: target_uri.clone(),
            mime: if record.warc_type == "revisit" {
                "warc/revisit".to_owned()
            } else {
                record.content_type.clone().unwrap_or_default()
            },
            status: record.http_status.unwrap_or_default(),
            digest: record.payload_digest.clone().unwrap_or_default(),
            redirect: None,
            meta: None,
            length: record.content_length as u64,
            offset: record.offset,
            filename: filename.clone(),
        });
    }

    return Ok(entries);
}

fn parse_one_record(offset: u64, bytes: &[u8]) -> Result<ParsedRecordHead> {
    let mut cursor = bytes;

    let warc_head = read_header_block(&mut cursor)?;
    if !warc_head.starts_with("WARC/1.0") {
        return Err(RecorderError::ParseFailure(
            "record does not start with WARC/1.0".to_owned(),
        ));
    }

    let mut record = ParsedRecordHead {
        offset,
        warc_type: String::new(),
        target_uri: None,
        date: None,
        payload_digest: None,
        content_length: 0,
        http_status: None,
        content_type: None,
    };

    let mut is_http = false;
    for line in warc_head.trim_end().lines().skip(1) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "warc-type" => record.warc_type = value.to_owned(),
            "warc-target-uri" => record.target_uri = Some(value.to_owned()),
            "warc-date" => record.date = Some(value.to_owned()),
            "warc-payload-digest" => record.payload_digest = Some(value.to_owned()),
            "content-length" => {
                record.content_length = value.parse().unwrap_or_default();
            }
            "content-type" if value.starts_with("application/http") => is_http = true,
            _ => {}
        }
    }

    if is_http && matches!(record.warc_type.as_str(), "response" | "request" | "revisit") {
        if let Ok(http_head) = read_header_block(&mut cursor) {
            parse_http_head(&http_head, &mut record);
        }
    }

    return Ok(record);
}

fn parse_http_head(buffer: &str, record: &mut ParsedRecordHead) {
    let mut lines = buffer.trim_end().lines();
    if let Some(status_line) = lines.next() {
        if let Some(code) = status_line.split_whitespace().nth(1) {
            record.http_status = code.parse().ok();
        }
    }
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("content-type") {
            record.content_type = Some(value.trim().to_owned());
        }
    }
}

/// Reads lines from `reader` until a bare `\r\n`, returning everything
/// read including that terminator line.
fn read_header_block<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut buffer = String::with_capacity(512);
    loop {
        let start = buffer.len();
        let bytes_read = reader.read_line(&mut buffer).map_err(RecorderError::Io)?;
        if bytes_read == 0 {
            return Err(RecorderError::ParseFailure(
                "unexpected end of record while reading headers".to_owned(),
            ));
        }
        if buffer[start..] == *"\r\n" {
            return Ok(buffer);
        }
    }
}
