//! Recorder binary: loads configuration, wires up the writer and index,
//! and serves the recorder HTTP routes.

use std::sync::Arc;

use warc_recorder::dedup::InMemoryIndex;
use warc_recorder::filter::HeaderFilter;
use warc_recorder::recorder::{build_router, RecorderState};
use warc_recorder::writer::FileManager;
use warc_recorder::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args().nth(1);
    let config = match config_path {
        Some(path) => {
            let document = std::fs::read_to_string(&path)?;
            Config::from_toml_str(&document)?
        }
        None => {
            tracing::info!("no config path given, using defaults");
            Config::default()
        }
    };

    let archive_root = std::path::PathBuf::from("archive");
    std::fs::create_dir_all(&archive_root)?;
    let spill_dir = std::path::PathBuf::from("spill");
    std::fs::create_dir_all(&spill_dir)?;

    let writer: Arc<dyn warc_recorder::writer::Writer> = Arc::new(FileManager::new(
        archive_root,
        &config.archive_paths,
        config.warcinfo_fields.clone(),
        config.rollover_idle_seconds,
    ));
    let index: Arc<dyn warc_recorder::dedup::Index> = Arc::new(InMemoryIndex::new());
    let header_filter = HeaderFilter::new(&config.exclude_headers);

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(RecorderState {
        config,
        http_client: reqwest::Client::new(),
        writer,
        index,
        header_filter,
        spill_dir,
    });

    let app = build_router(Arc::clone(&state));

    let maintenance_writer = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            if let Err(error) = maintenance_writer.writer.close_idle() {
                tracing::error!(%error, "idle rollover failed");
            }
        }
    });

    tracing::info!(%bind_addr, "recorder listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    return Ok(());
}
