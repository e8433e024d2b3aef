//! A WARC recording engine: an HTTP intermediary that durably captures
//! proxied transactions as WARC 1.0 records, with optional
//! content-addressed deduplication against a pluggable index.
//!
//! See [`recorder`] for the HTTP transport, [`capture`] for the streaming
//! tee pipeline, [`writer`] for the per-file append path, [`dedup`] for
//! the policy engine, and [`record`] for the wire format itself.

pub mod capture;
pub mod config;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod filter;
pub mod parser;
pub mod record;
pub mod recorder;
pub mod router;
pub mod spill;
pub mod surt;
pub mod template;
pub mod writer;

pub use config::Config;
pub use error::{RecorderError, Result};
