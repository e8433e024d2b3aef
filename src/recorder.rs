//! Recorder Service: the axum routes tying the capture pipeline, header
//! filter, dedup policy engine, and writer together.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt as _;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::capture::{capture, parse_embedded_request, CaptureRequest, ResponseHead};
use crate::config::Config;
use crate::dedup::{decide, CdxEntry, Decision, Index, Original, Scope};
use crate::digest::format_digest;
use crate::error::{IndexFailureMode, RecorderError, Result};
use crate::filter::HeaderFilter;
use crate::record::{build_request, build_response, build_revisit, gzip_member, PairContext};
use crate::router::{effective_source, extract_params, route, RouteDecision};
use crate::surt::create_surt;
use crate::template::TemplateContext;
use crate::writer::{PreparedWrite, Writer};

/// Shared state handed to every axum handler.
pub struct RecorderState {
    pub config: Config,
    pub http_client: reqwest::Client,
    pub writer: Arc<dyn Writer>,
    pub index: Arc<dyn Index>,
    pub header_filter: HeaderFilter,
    pub spill_dir: std::path::PathBuf,
}

/// Builds the axum [`Router`] exposing the recorder's two routes.
pub fn build_router(state: Arc<RecorderState>) -> Router {
    return Router::new()
        .route("/{source}/resource", get(handle_get))
        .route("/{source}/resource/postreq", post(handle_postreq))
        .with_state(state);
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    return headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_owned()))
        .collect();
}

/// `GET` convenience form: no embedded request to parse, the client's own
/// headers are the request head to capture.
async fn handle_get(
    axum::extract::Path(source): axum::extract::Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<RecorderState>>,
    headers: HeaderMap,
) -> Response {
    let outer_headers = header_pairs(&headers);
    let proxy_headers = outer_headers.clone();
    return handle(state, source, "GET".to_owned(), query, outer_headers, proxy_headers, Vec::new()).await;
}

/// `POST .../postreq`: the POST body is itself a raw HTTP/1.1 request
/// (status line, headers, blank line, body) to be parsed out and proxied,
/// not the request body directly.
async fn handle_postreq(
    axum::extract::Path(source): axum::extract::Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<RecorderState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let outer_headers = header_pairs(&headers);

    let (method, proxy_headers, proxy_body) = match parse_embedded_request(&body) {
        Ok(parsed) => parsed,
        Err(error) => return error_response(StatusCode::BAD_REQUEST, &error.to_string()),
    };

    return handle(state, source, method, query, outer_headers, proxy_headers, proxy_body).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle(
    state: Arc<RecorderState>,
    source: String,
    method: String,
    query: HashMap<String, String>,
    outer_headers: Vec<(String, String)>,
    proxy_headers: Vec<(String, String)>,
    proxy_body: Vec<u8>,
) -> Response {
    let Some(target_uri) = query.get("url").cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "missing url query parameter");
    };
    tracing::debug!(%source, %target_uri, %method, "routing capture request");

    let route_params = extract_params(&query);
    let source = effective_source(&source, &outer_headers);
    let decision = route(route_params, &source, &state.config.accept_colls);
    let route_params = match decision {
        RouteDecision::Record(params) => params,
        RouteDecision::FilterRejection => {
            return proxy_without_recording(&state, &method, &target_uri, proxy_headers, proxy_body).await;
        }
    };

    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(16);
    let (result_tx, mut result_rx) = mpsc::channel(1);

    let client = state.http_client.clone();
    let spill_dir = state.spill_dir.clone();
    let spill_threshold_bytes = state.config.spill_threshold_bytes;
    let upstream_timeout = std::time::Duration::from_secs(state.config.upstream_timeout_seconds);
    let capture_request = CaptureRequest {
        method: method.clone(),
        target_uri: target_uri.clone(),
        request_headers: proxy_headers,
        request_body: proxy_body,
        remote_ip: None,
        user: route_params.user.clone(),
        coll: route_params.coll.clone(),
    };

    let capture_task = tokio::spawn(async move {
        capture(
            &client,
            capture_request,
            spill_threshold_bytes,
            &spill_dir,
            upstream_timeout,
            head_tx,
            body_tx,
            result_tx,
        )
        .await
    });

    let write_task = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Some(transaction) = result_rx.recv().await {
                if let Err(error) = finish_capture(&state, transaction).await {
                    tracing::error!(%error, "failed to finish capture");
                }
            }
        })
    };

    let head = match head_rx.await {
        Ok(Ok(head)) => head,
        Ok(Err(error)) => {
            let _ = capture_task.await;
            let _ = write_task.await;
            return upstream_error_response(&error);
        }
        Err(_) => {
            let _ = capture_task.await;
            let _ = write_task.await;
            return error_response(StatusCode::BAD_REQUEST, "capture ended before a response head arrived");
        }
    };

    let response = build_client_response(&target_uri, head, body_rx);

    // The response (headers included) must reach the client without
    // waiting for the body to finish; watch the rest of the capture to
    // completion in the background instead of awaiting it here.
    tokio::spawn(async move {
        match capture_task.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(%error, "capture ended with an error after headers were sent");
            }
            Err(error) => {
                tracing::error!(%error, "capture task panicked");
            }
        }
        let _ = write_task.await;
    });

    return response;
}

/// Builds the client-facing response: the proxied status code, the
/// upstream's own headers, plus a `Link`/`Memento-Datetime` pair,
/// streaming the body as it's captured.
fn build_client_response(target_uri: &str, head: ResponseHead, body_rx: mpsc::Receiver<crate::capture::BodyChunk>) -> Response {
    let stream = ReceiverStream::new(body_rx).map(|chunk| chunk.map_err(std::io::Error::other));

    let mut builder = Response::builder().status(StatusCode::from_u16(head.status).unwrap_or(StatusCode::OK));
    for (name, value) in &head.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = builder
        .header("Link", format!("<{target_uri}>; rel=\"original\""))
        .header("Memento-Datetime", format_rfc1123(head.date));

    return builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response"));
}

fn format_rfc1123(date: DateTime<Utc>) -> String {
    return date.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
}

/// Maps an upstream-side failure to the client response: `UpstreamUnreachable`,
/// `UpstreamTimeout`, and `MalformedRequest` are all reported as `400` with a
/// JSON error body; nothing is enqueued for any of them.
fn upstream_error_response(error: &RecorderError) -> Response {
    match error {
        RecorderError::UpstreamUnreachable(message) => return error_response(StatusCode::BAD_REQUEST, message),
        RecorderError::UpstreamTimeout(seconds) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("upstream timed out after {seconds}s"));
        }
        RecorderError::MalformedRequest(message) => return error_response(StatusCode::BAD_REQUEST, message),
        other => return error_response(StatusCode::BAD_REQUEST, &other.to_string()),
    }
}

async fn finish_capture(state: &RecorderState, transaction: crate::capture::CapturedTransaction) -> Result<()> {
    let scope = Scope {
        user: transaction.user.clone().unwrap_or_default(),
        coll: transaction.coll.clone().unwrap_or_default(),
    };

    let (lookup, skip_index) = match state.index.lookup(&scope, &transaction.payload_digest) {
        Ok(found) => (found, false),
        Err(error) => match state.config.index_failure_mode {
            IndexFailureMode::Strict => return Err(error),
            IndexFailureMode::Lenient => {
                tracing::warn!(%error, "dedup index unreachable, writing without a dedup check");
                (None, true)
            }
        },
    };
    let decision = decide(state.config.dedup_policy, lookup);

    let ctx = PairContext {
        target_uri: &transaction.target_uri,
        date: transaction.date,
        remote_ip: transaction.remote_ip.as_deref(),
        truncated: transaction.truncated,
    };

    let template_ctx = TemplateContext {
        user: transaction.user.clone(),
        coll: transaction.coll.clone(),
        hostname: url::Url::parse(&transaction.target_uri)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_owned)),
        timestamp: Some(transaction.date.format("%Y%m%d%H%M%S").to_string()),
    };
    let destination_key = crate::template::PathTemplate::compile(&state.config.archive_paths).resolve(&template_ctx);

    state
        .writer
        .ensure_warcinfo(&destination_key, &destination_key, transaction.date)?;

    let status: u16 = transaction
        .status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let content_type = transaction
        .response_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    match decision {
        Decision::Skip => return Ok(()),
        Decision::WriteFull { also_revisit } => {
            let (response_record, digest) = build_response(
                &transaction.status_line,
                &transaction.response_headers,
                &transaction.response_body,
                &state.header_filter,
                &ctx,
            );
            let request_record = build_request(
                &transaction.request_line,
                &transaction.request_headers,
                &transaction.request_body,
                &state.header_filter,
                &ctx,
                &response_record.record_id,
            );

            let record_bytes = vec![
                gzip_member(&response_record).map_err(RecorderError::Io)?,
                gzip_member(&request_record).map_err(RecorderError::Io)?,
            ];
            let offset = state.writer.write_pair(PreparedWrite {
                destination_key: destination_key.clone(),
                record_bytes,
            })?;

            if !skip_index {
                let length = response_record.payload.len() as u64;
                store_cdx_entry(
                    state, &scope, &transaction, &digest, status, &content_type, length, offset, &destination_key,
                )?;

                if let Some(original) = also_revisit {
                    store_revisit_cdx_row(state, &scope, &digest, status, length, &original, offset, &destination_key)?;
                }
            }

            return Ok(());
        }
        Decision::WriteRevisit(original) => {
            let revisit_record = build_revisit(
                &transaction.status_line,
                &transaction.response_headers,
                &state.header_filter,
                &transaction.target_uri,
                transaction.date,
                &transaction.payload_digest,
                &original.target_uri,
                original.date,
            );
            let request_record = build_request(
                &transaction.request_line,
                &transaction.request_headers,
                &transaction.request_body,
                &state.header_filter,
                &ctx,
                &revisit_record.record_id,
            );

            let record_bytes = vec![
                gzip_member(&revisit_record).map_err(RecorderError::Io)?,
                gzip_member(&request_record).map_err(RecorderError::Io)?,
            ];
            let offset = state.writer.write_pair(PreparedWrite {
                destination_key: destination_key.clone(),
                record_bytes,
            })?;

            if !skip_index {
                // mime is `warc/revisit` by convention, not the original
                // content type, even though the status line is preserved.
                let length = revisit_record.payload.len() as u64;
                store_cdx_entry(
                    state,
                    &scope,
                    &transaction,
                    &transaction.payload_digest,
                    status,
                    "warc/revisit",
                    length,
                    offset,
                    &destination_key,
                )?;
            }

            return Ok(());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn store_cdx_entry(
    state: &RecorderState,
    scope: &Scope,
    transaction: &crate::capture::CapturedTransaction,
    digest: &str,
    status: u16,
    content_type: &str,
    length: u64,
    offset: u64,
    destination_key: &str,
) -> Result<()> {
    let urlkey = create_surt(&transaction.target_uri).map_err(|error| RecorderError::ParseFailure(error.to_string()))?;
    let entry = CdxEntry {
        urlkey,
        timestamp: transaction.date.format("%Y%m%d%H%M%S").to_string(),
        url: transaction.target_uri.clone(),
        mime: content_type.to_owned(),
        status,
        digest: digest.to_owned(),
        redirect: None,
        meta: None,
        length,
        offset,
        filename: warc_basename(destination_key),
    };

    let original = Original {
        target_uri: transaction.target_uri.clone(),
        date: transaction.date,
    };
    return state.index.insert(scope, &transaction.payload_digest, original, entry);
}

/// Under `WriteDupe`, a digest hit inserts a second CDX row alongside the
/// new `response` row: `mime = warc/revisit`, referencing the *original*
/// capture's URI and date rather than the just-written one. No second
/// record is written to disk for this row, it shares the response
/// record's offset and file.
#[allow(clippy::too_many_arguments)]
fn store_revisit_cdx_row(
    state: &RecorderState,
    scope: &Scope,
    digest: &str,
    status: u16,
    length: u64,
    original: &Original,
    offset: u64,
    destination_key: &str,
) -> Result<()> {
    let urlkey = create_surt(&original.target_uri).map_err(|error| RecorderError::ParseFailure(error.to_string()))?;
    let entry = CdxEntry {
        urlkey,
        timestamp: original.date.format("%Y%m%d%H%M%S").to_string(),
        url: original.target_uri.clone(),
        mime: "warc/revisit".to_owned(),
        status,
        digest: digest.to_owned(),
        redirect: None,
        meta: None,
        length,
        offset,
        filename: warc_basename(destination_key),
    };
    return state.index.insert(scope, digest, original.clone(), entry);
}

/// The CDX `filename` field is a bare basename, not the destination
/// template's relative directory structure: an offline reindex tool only
/// ever sees the file it was handed, never the template that produced its
/// path.
fn warc_basename(destination_key: &str) -> String {
    return std::path::Path::new(destination_key)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| destination_key.to_owned());
}

async fn proxy_without_recording(
    state: &RecorderState,
    method: &str,
    target_uri: &str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
) -> Response {
    let Ok(reqwest_method) = reqwest::Method::from_bytes(method.as_bytes()) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid method");
    };

    let mut builder = state.http_client.request(reqwest_method, target_uri);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }

    match builder.send().await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let bytes = upstream.bytes().await.unwrap_or_default();
            return (status, bytes).into_response();
        }
        Err(error) => return error_response(StatusCode::BAD_REQUEST, &error.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    return (status, Json(serde_json::json!({ "error": message }))).into_response();
}

/// Formats a payload digest into the `sha1:<base32>` form used by
/// `WARC-Payload-Digest`; re-exported here so callers outside `digest`
/// never have to know the raw-bytes encoding.
pub fn format_payload_digest(raw: &[u8]) -> String {
    return format_digest(raw);
}
