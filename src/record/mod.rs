//! WARC record construction and serialization.
//!
//! A [`WarcRecord`] is the serialized unit: one `WARC/1.0` block with an
//! ordered header list and a payload. Headers are
//! kept as an ordered `Vec` (not a map) because WARC allows repeated
//! header names and readers are expected to preserve field order.

mod gzip;

pub use gzip::gzip_member;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::digest::digest_bytes;
use crate::filter::HeaderFilter;

/// `WARC-Type` values this crate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Response,
    Request,
    Revisit,
    WarcInfo,
}

impl RecordType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Response => return "response",
            Self::Request => return "request",
            Self::Revisit => return "revisit",
            Self::WarcInfo => return "warcinfo",
        }
    }
}

/// A single WARC record, header block plus payload, ready to be framed
/// into its own gzip member and appended to a file.
#[derive(Debug, Clone)]
pub struct WarcRecord {
    pub record_type: RecordType,
    pub record_id: String,
    /// Ordered, duplicates allowed, in the order they should be written.
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl WarcRecord {
    fn new(record_type: RecordType, payload: Vec<u8>) -> Self {
        return Self {
            record_type,
            record_id: new_record_id(),
            headers: Vec::new(),
            payload,
        };
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        return self;
    }

    /// Serializes the record to its wire bytes: `WARC/1.0\r\n`, header
    /// lines, a blank line, the payload, then a trailing `\r\n\r\n` record
    /// terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 256);
        out.extend_from_slice(b"WARC/1.0\r\n");
        out.extend_from_slice(format!("WARC-Type: {}\r\n", self.record_type.as_str()).as_bytes());
        out.extend_from_slice(format!("WARC-Record-ID: {}\r\n", self.record_id).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.payload.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(b"\r\n\r\n");
        return out;
    }
}

fn new_record_id() -> String {
    return format!("<urn:uuid:{}>", Uuid::new_v4());
}

fn format_date(date: DateTime<Utc>) -> String {
    return date.format("%Y-%m-%dT%H:%M:%SZ").to_string();
}

fn format_http_head(status_line: &str, headers: &[(String, String)], filter: &HeaderFilter) -> Vec<u8> {
    let mut head = String::new();
    head.push_str(status_line.trim_end_matches("\r\n"));
    head.push_str("\r\n");
    for (name, value) in headers {
        if filter.is_excluded(name) {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    return head.into_bytes();
}

/// Inputs shared by the response and request record of one capture.
pub struct PairContext<'a> {
    pub target_uri: &'a str,
    pub date: DateTime<Utc>,
    pub remote_ip: Option<&'a str>,
    pub truncated: Option<&'a str>,
}

/// Builds the `response` record. Returns the record plus its computed
/// payload digest, so the caller (the dedup policy engine) doesn't have to
/// re-hash the body.
pub fn build_response(
    status_line: &str,
    headers: &[(String, String)],
    body: &[u8],
    filter: &HeaderFilter,
    ctx: &PairContext<'_>,
) -> (WarcRecord, String) {
    let mut http_block = format_http_head(status_line, headers, filter);
    http_block.extend_from_slice(body);

    let digest = digest_bytes(body);

    let mut record = WarcRecord::new(RecordType::Response, http_block)
        .header("WARC-Date", format_date(ctx.date))
        .header("WARC-Target-URI", ctx.target_uri)
        .header("Content-Type", "application/http; msgtype=response")
        .header("WARC-Payload-Digest", digest.clone());

    if let Some(ip) = ctx.remote_ip {
        record = record.header("WARC-IP-Address", ip);
    }
    if let Some(reason) = ctx.truncated {
        record = record.header("WARC-Truncated", reason);
    }

    return (record, digest);
}

/// Builds the `request` record, concurrent to the already-built response
/// record: response is written first, then request, and the response's
/// `WARC-Record-ID` becomes the request's `WARC-Concurrent-To`.
pub fn build_request(
    status_line: &str,
    headers: &[(String, String)],
    body: &[u8],
    filter: &HeaderFilter,
    ctx: &PairContext<'_>,
    concurrent_to: &str,
) -> WarcRecord {
    let mut http_block = format_http_head(status_line, headers, filter);
    http_block.extend_from_slice(body);

    return WarcRecord::new(RecordType::Request, http_block)
        .header("WARC-Date", format_date(ctx.date))
        .header("WARC-Target-URI", ctx.target_uri)
        .header("Content-Type", "application/http; msgtype=request")
        .header("WARC-Concurrent-To", concurrent_to);
}

/// Builds a `revisit` record standing in for a response whose payload has
/// already been stored. The original status line and (filtered) headers
/// are kept as the record's payload, with the body omitted, so a reader
/// going only off the bytes on disk can still recover the response status.
#[allow(clippy::too_many_arguments)]
pub fn build_revisit(
    status_line: &str,
    headers: &[(String, String)],
    filter: &HeaderFilter,
    target_uri: &str,
    date: DateTime<Utc>,
    payload_digest: &str,
    refers_to_target_uri: &str,
    refers_to_date: DateTime<Utc>,
) -> WarcRecord {
    let http_block = format_http_head(status_line, headers, filter);

    return WarcRecord::new(RecordType::Revisit, http_block)
        .header("WARC-Date", format_date(date))
        .header("WARC-Target-URI", target_uri)
        .header("Content-Type", "application/http; msgtype=response")
        .header(
            "WARC-Profile",
            "http://netpreserve.org/warc/1.0/revisit/identical-payload-digest",
        )
        .header("WARC-Refers-To-Target-URI", refers_to_target_uri)
        .header("WARC-Refers-To-Date", format_date(refers_to_date))
        .header("WARC-Payload-Digest", payload_digest);
}

/// Builds the `warcinfo` record emitted on first open of a WARC file:
/// `key: value\r\n` lines for `software`, `format`, `json-metadata`, plus
/// any caller-provided fields.
pub fn build_warcinfo(filename: &str, fields: &std::collections::BTreeMap<String, String>) -> WarcRecord {
    let mut body = String::new();
    for (key, value) in fields {
        body.push_str(key);
        body.push_str(": ");
        body.push_str(value);
        body.push_str("\r\n");
    }

    return WarcRecord::new(RecordType::WarcInfo, body.into_bytes())
        .header("WARC-Date", format_date(Utc::now()))
        .header("Content-Type", "application/warc-fields")
        .header("WARC-Filename", filename);
}
