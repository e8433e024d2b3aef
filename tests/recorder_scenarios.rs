//! End-to-end scenarios against a real TCP listener: an axum stub upstream
//! plays the role of the site being archived, and the recorder's own axum
//! router plays the role of the system under test. Modeled after the
//! bind-to-127.0.0.1:0-then-connect pattern used elsewhere in the corpus
//! for exercising a full network round trip in a test.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Query;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;

use warc_recorder::config::Config;
use warc_recorder::dedup::{DedupPolicyKind, Index, InMemoryIndex, Scope};
use warc_recorder::filter::HeaderFilter;
use warc_recorder::parser::{parse_file, reindex_file};
use warc_recorder::recorder::{build_router, RecorderState};
use warc_recorder::writer::{FileManager, Writer as _};

async fn spawn_stub_upstream() -> SocketAddr {
    async fn get_handler(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
        let foo = params.get("foo").cloned().unwrap_or_default();
        (
            [("content-type", "application/json")],
            format!(r#"{{"foo": "{foo}"}}"#),
        )
    }

    async fn cookies_set() -> impl IntoResponse {
        let mut headers = HeaderMap::new();
        headers.insert("set-cookie", "session=abc".parse().unwrap());
        (headers, "cookies set")
    }

    let app = Router::new()
        .route("/get", get(get_handler))
        .route("/cookies/set", get(cookies_set));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_recorder(config: Config, archive_root: std::path::PathBuf) -> (SocketAddr, Arc<RecorderState>) {
    let spill_dir = archive_root.join("spill");
    std::fs::create_dir_all(&spill_dir).unwrap();

    let writer = Arc::new(FileManager::new(
        archive_root,
        &config.archive_paths,
        config.warcinfo_fields.clone(),
        config.rollover_idle_seconds,
    ));
    let index: Arc<dyn Index> = Arc::new(InMemoryIndex::new());
    let header_filter = HeaderFilter::new(&config.exclude_headers);

    let state = Arc::new(RecorderState {
        config,
        http_client: reqwest::Client::new(),
        writer,
        index,
        header_filter,
        spill_dir,
    });

    let app = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// Builds the raw HTTP/1.1 request text a `postreq` POST body carries: the
/// embedded request the recorder parses out and proxies, not the POST
/// body itself.
fn raw_request(method: &str, path_and_query: &str, extra_headers: &[(&str, &str)]) -> Vec<u8> {
    let mut text = format!("{method} {path_and_query} HTTP/1.1\r\n");
    for (name, value) in extra_headers {
        text.push_str(&format!("{name}: {value}\r\n"));
    }
    text.push_str("\r\n");
    text.into_bytes()
}

/// The SURT prefix range covering every capture of `127.0.0.1` regardless
/// of port or path: `create_surt` reverses the dotted octets the same way
/// it reverses hostname labels, so `127.0.0.1` sorts as `1,0,0,127)`.
fn loopback_surt_range() -> (&'static str, &'static str) {
    ("1,0,0,127)/", "1,0,0,127,")
}

fn warc_gz_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(warc_gz_files(&path));
            } else if path.extension().is_some_and(|extension| extension == "gz") {
                files.push(path);
            }
        }
    }
    files
}

#[tokio::test]
async fn s1_basic_record_creates_exactly_one_warc_file() {
    let upstream_addr = spawn_stub_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        archive_paths: "warcs/rec-{timestamp}.warc.gz".to_owned(),
        ..Config::default()
    };
    let (recorder_addr, _state) = spawn_recorder(config, dir.path().to_path_buf()).await;

    let url = format!("http://127.0.0.1:{}/get?foo=bar", upstream_addr.port());
    let client = reqwest::Client::new();
    let response = client
        .post(format!(
            "http://{recorder_addr}/live/resource/postreq?url={}",
            urlencoding(&url)
        ))
        .body(raw_request("GET", "/get?foo=bar", &[]))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(body.contains("\"foo\": \"bar\""));

    // give the background write task a moment to finish
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let files = warc_gz_files(&dir.path().join("warcs"));
    assert_eq!(files.len(), 1, "expected exactly one warc.gz file, found {files:?}");
}

#[tokio::test]
async fn s2_wrong_collection_filter_proxies_without_recording() {
    let upstream_addr = spawn_stub_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        archive_paths: "warcs/rec-{timestamp}.warc.gz".to_owned(),
        accept_colls: ["not-live".to_owned()].into_iter().collect(),
        ..Config::default()
    };
    let (recorder_addr, _state) = spawn_recorder(config, dir.path().to_path_buf()).await;

    let url = format!("http://127.0.0.1:{}/get?foo=bar", upstream_addr.port());
    let client = reqwest::Client::new();
    let response = client
        .post(format!(
            "http://{recorder_addr}/live/resource/postreq?url={}",
            urlencoding(&url)
        ))
        .body(raw_request("GET", "/get?foo=bar", &[]))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let files = warc_gz_files(&dir.path().join("warcs"));
    assert!(files.is_empty(), "expected no warc file, found {files:?}");
}

#[tokio::test]
async fn s3_cookie_headers_are_stripped_from_stored_records_only() {
    let upstream_addr = spawn_stub_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        archive_paths: "warcs/rec-{timestamp}.warc.gz".to_owned(),
        exclude_headers: vec!["Set-Cookie".to_owned(), "Cookie".to_owned()],
        ..Config::default()
    };
    let (recorder_addr, _state) = spawn_recorder(config, dir.path().to_path_buf()).await;

    let url = format!("http://127.0.0.1:{}/cookies/set?foo=1", upstream_addr.port());
    let client = reqwest::Client::new();
    let response = client
        .post(format!(
            "http://{recorder_addr}/live/resource/postreq?url={}",
            urlencoding(&url)
        ))
        .body(raw_request(
            "GET",
            "/cookies/set?foo=1",
            &[("Cookie", "session=xyz"), ("X-Other", "foo")],
        ))
        .send()
        .await
        .unwrap();

    assert!(response.headers().contains_key("set-cookie"));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let files = warc_gz_files(&dir.path().join("warcs"));
    assert_eq!(files.len(), 1);
    let parsed = parse_file(&files[0]).unwrap();
    assert!(parsed.iter().any(|record| record.warc_type == "response"));

    let raw = std::fs::read(&files[0]).unwrap();
    let mut decoder = flate2::read::MultiGzDecoder::new(raw.as_slice());
    let mut decoded = Vec::new();
    std::io::Read::read_to_end(&mut decoder, &mut decoded).unwrap();
    let text = String::from_utf8_lossy(&decoded).to_lowercase();
    assert!(!text.contains("set-cookie"));
    assert!(!text.contains("\r\ncookie:"));
    assert!(text.contains("x-other: foo"));
}

#[tokio::test]
async fn s4_write_revisit_policy_records_a_revisit_on_second_capture() {
    let upstream_addr = spawn_stub_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        archive_paths: "warcs/{user}/{coll}/rec-{timestamp}.warc.gz".to_owned(),
        dedup_policy: DedupPolicyKind::WriteRevisit,
        ..Config::default()
    };
    let (recorder_addr, state) = spawn_recorder(config, dir.path().to_path_buf()).await;

    let url = format!("http://127.0.0.1:{}/get?foo=bar", upstream_addr.port());
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .post(format!(
                "http://{recorder_addr}/live/resource/postreq?url={}&param.recorder.user=USER&param.recorder.coll=COLL",
                urlencoding(&url)
            ))
            .body(raw_request("GET", "/get?foo=bar", &[]))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    }

    let scope = Scope {
        user: "USER".to_owned(),
        coll: "COLL".to_owned(),
    };
    let rows = state
        .index
        .range(&scope, loopback_surt_range().0, loopback_surt_range().1)
        .unwrap();
    assert_eq!(rows.len(), 2, "expected two CDX rows, got {rows:?}");

    let second = rows
        .iter()
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
        .unwrap();
    assert!(second.digest.starts_with("sha1:"));

    let files = warc_gz_files(&dir.path().join("warcs").join("USER").join("COLL"));
    assert_eq!(files.len(), 2);
}

#[tokio::test]
async fn s5_offline_reindex_agrees_with_the_live_index_on_a_kept_open_file() {
    let upstream_addr = spawn_stub_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        // No {timestamp} segment: both captures below land in the same
        // file, exercising the writer's keep-open/rollover path rather
        // than opening a fresh file per request.
        archive_paths: "warcs/USER/COLL/keep-open.warc.gz".to_owned(),
        dedup_policy: DedupPolicyKind::WriteRevisit,
        ..Config::default()
    };
    let (recorder_addr, state) = spawn_recorder(config, dir.path().to_path_buf()).await;

    let url = format!("http://127.0.0.1:{}/get?foo=bar", upstream_addr.port());
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .post(format!(
                "http://{recorder_addr}/live/resource/postreq?url={}&param.recorder.user=USER&param.recorder.coll=COLL",
                urlencoding(&url)
            ))
            .body(raw_request("GET", "/get?foo=bar", &[]))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    }

    let files = warc_gz_files(&dir.path().join("warcs").join("USER").join("COLL"));
    assert_eq!(files.len(), 1, "both captures should share one kept-open file, found {files:?}");

    let scope = Scope {
        user: "USER".to_owned(),
        coll: "COLL".to_owned(),
    };
    let mut live_rows = state
        .index
        .range(&scope, loopback_surt_range().0, loopback_surt_range().1)
        .unwrap();
    live_rows.sort_by_key(|entry| entry.offset);

    let mut rebuilt_rows = reindex_file(&files[0]).unwrap();
    rebuilt_rows.sort_by_key(|entry| entry.offset);

    assert_eq!(live_rows.len(), 2, "expected a response row and a revisit row, got {live_rows:?}");
    assert_eq!(
        rebuilt_rows.len(),
        live_rows.len(),
        "offline reindex should recover one CDX row per response/revisit record on disk"
    );

    for (live, rebuilt) in live_rows.iter().zip(rebuilt_rows.iter()) {
        assert_eq!(rebuilt, live, "offline reindex should agree on every CDX field");
    }
    assert_eq!(rebuilt_rows[1].mime, "warc/revisit");
}

#[tokio::test]
async fn s6_warcinfo_round_trips_through_parser() {
    let dir = tempfile::tempdir().unwrap();
    let mut fields = BTreeMap::new();
    fields.insert("software".to_owned(), "recorder test".to_owned());
    fields.insert("format".to_owned(), "WARC File Format 1.0".to_owned());
    fields.insert("json-metadata".to_owned(), r#"{"foo":"bar"}"#.to_owned());

    let manager = FileManager::new(dir.path(), "testfile.warc.gz", fields, 300);
    manager
        .ensure_warcinfo("testfile.warc.gz", "testfile.warc.gz", chrono::Utc::now())
        .unwrap();

    let parsed = parse_file(&dir.path().join("testfile.warc.gz")).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].warc_type, "warcinfo");
}

fn urlencoding(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => ch.to_string(),
            _ => format!("%{:02X}", ch as u32),
        })
        .collect()
}
