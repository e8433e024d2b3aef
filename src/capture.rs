//! Capture Pipeline.
//!
//! Proxies one HTTP transaction to the configured upstream, forwards the
//! response to the client as it arrives, and simultaneously tees the body
//! into a [`SpillBuffer`] and a running [`PayloadDigester`] so the whole
//! response never has to be held in memory before it can be written out.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt as _;
use tokio::sync::{mpsc, oneshot};

use crate::digest::PayloadDigester;
use crate::error::{RecorderError, Result};
use crate::spill::SpillBuffer;

/// The upstream status line and headers, sent to the caller as soon as
/// they're known so the client-facing response can be built with the
/// real status and headers before the body starts streaming.
pub struct ResponseHead {
    pub status_line: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// The capture timestamp, stamped once here and reused for the
    /// eventual `CapturedTransaction` so `Memento-Datetime` and
    /// `WARC-Date` agree.
    pub date: DateTime<Utc>,
}

/// One fully captured request/response pair, ready for the dedup policy
/// engine and the writer.
pub struct CapturedTransaction {
    pub request_line: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Vec<u8>,

    pub status_line: String,
    pub response_headers: Vec<(String, String)>,
    pub response_body: Vec<u8>,
    pub payload_digest: String,

    pub target_uri: String,
    pub date: DateTime<Utc>,
    pub remote_ip: Option<String>,
    pub truncated: Option<&'static str>,

    pub user: Option<String>,
    pub coll: Option<String>,
}

/// A chunk of the upstream response, forwarded to the client as it's
/// captured. The last chunk in the stream is always accompanied, out of
/// band, by the finished [`CapturedTransaction`] sent over `result_tx`.
pub type BodyChunk = Result<Bytes, RecorderError>;

/// Parameters identifying one proxied request.
pub struct CaptureRequest {
    pub method: String,
    pub target_uri: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Vec<u8>,
    pub remote_ip: Option<String>,
    pub user: Option<String>,
    pub coll: Option<String>,
}

/// Streams the upstream response back to the caller over `body_tx` while
/// teeing it into a spill buffer and digester, then sends the assembled
/// [`CapturedTransaction`] over `result_tx` once the body is fully read.
///
/// A connect failure never sends anything on `result_tx` (nothing is
/// recorded), while a failure partway through the body still sends a
/// transaction, marked `WARC-Truncated: unspecified`.
pub async fn capture(
    client: &reqwest::Client,
    request: CaptureRequest,
    spill_threshold_bytes: usize,
    spill_dir: &std::path::Path,
    upstream_timeout: std::time::Duration,
    head_tx: oneshot::Sender<Result<ResponseHead>>,
    body_tx: mpsc::Sender<BodyChunk>,
    result_tx: mpsc::Sender<CapturedTransaction>,
) -> Result<()> {
    let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
        Ok(method) => method,
        Err(error) => {
            let message = error.to_string();
            let _ = head_tx.send(Err(RecorderError::MalformedRequest(message.clone())));
            return Err(RecorderError::MalformedRequest(message));
        }
    };

    let mut builder = client.request(method.clone(), &request.target_uri).timeout(upstream_timeout);
    for (name, value) in &request.request_headers {
        builder = builder.header(name, value);
    }
    if !request.request_body.is_empty() {
        builder = builder.body(request.request_body.clone());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(error) => {
            let recorder_error = RecorderError::from(error);
            let head_error = if recorder_error.is_timeout() {
                RecorderError::UpstreamTimeout(upstream_timeout.as_secs())
            } else {
                RecorderError::UpstreamUnreachable(recorder_error.to_string())
            };
            let _ = head_tx.send(Err(head_error));
            return Err(recorder_error);
        }
    };

    let status_line = format!(
        "HTTP/1.1 {} {}",
        response.status().as_u16(),
        response.status().canonical_reason().unwrap_or("")
    );
    let response_headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_owned()))
        .collect();
    let date = Utc::now();

    if head_tx
        .send(Ok(ResponseHead {
            status_line: status_line.clone(),
            status: response.status().as_u16(),
            headers: response_headers.clone(),
            date,
        }))
        .is_err()
    {
        return Err(RecorderError::ClientDisconnect);
    }

    let mut spill = SpillBuffer::new();
    let mut digester = PayloadDigester::new();
    let mut truncated = None;

    let mut stream = response.bytes_stream();
    while let Some(chunk_result) = stream.next().await {
        match chunk_result {
            Ok(chunk) => {
                digester.update(&chunk);
                if spill.push(&chunk, spill_threshold_bytes, spill_dir).is_err() {
                    truncated = Some("unspecified");
                }
                if body_tx.send(Ok(chunk)).await.is_err() {
                    return Err(RecorderError::ClientDisconnect);
                }
            }
            Err(error) => {
                truncated = Some("unspecified");
                let _ = body_tx.send(Err(RecorderError::from(error))).await;
                break;
            }
        }
    }

    let response_body = spill.into_vec().map_err(RecorderError::Io)?;
    let payload_digest = digester.finish();

    let transaction = CapturedTransaction {
        request_line: format!("{} {} HTTP/1.1", request.method, request_line_path(&request.target_uri)),
        request_headers: request.request_headers,
        request_body: request.request_body,
        status_line,
        response_headers,
        response_body,
        payload_digest,
        target_uri: request.target_uri,
        date,
        remote_ip: request.remote_ip,
        truncated,
        user: request.user,
        coll: request.coll,
    };

    let _ = result_tx.send(transaction).await;
    return Ok(());
}

/// Parses the raw HTTP/1.1 request embedded in a `postreq` POST body: a
/// status line, headers, a blank line, then whatever bytes remain are the
/// request body to forward upstream.
pub fn parse_embedded_request(raw: &[u8]) -> Result<(String, Vec<(String, String)>, Vec<u8>)> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_storage);
    let status = parsed
        .parse(raw)
        .map_err(|error| RecorderError::MalformedRequest(error.to_string()))?;

    let httparse::Status::Complete(offset) = status else {
        return Err(RecorderError::MalformedRequest(
            "incomplete request head in postreq body".to_owned(),
        ));
    };

    let method = parsed.method.unwrap_or("GET").to_owned();
    let headers = parsed
        .headers
        .iter()
        .map(|header| (header.name.to_owned(), String::from_utf8_lossy(header.value).into_owned()))
        .collect();

    return Ok((method, headers, raw[offset..].to_vec()));
}

fn request_line_path(target_uri: &str) -> String {
    return url::Url::parse(target_uri)
        .map(|parsed| {
            let mut path = parsed.path().to_owned();
            if let Some(query) = parsed.query() {
                path.push('?');
                path.push_str(query);
            }
            path
        })
        .unwrap_or_else(|_| target_uri.to_owned());
}
