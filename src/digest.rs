//! Payload digests.
//!
//! WARC records carry a `WARC-Payload-Digest` header of the form
//! `sha1:<base32-uppercase>`. This module is the one place that knows the
//! exact encoding so the capture pipeline, the writer, and the parser agree
//! on it.

use data_encoding::BASE32;
use sha1::{Digest as _, Sha1};

/// A running SHA1 digest, fed chunk by chunk as a response body streams
/// through the capture pipeline.
#[derive(Default)]
pub struct PayloadDigester {
    hasher: Sha1,
}

impl PayloadDigester {
    pub fn new() -> Self {
        return Self::default();
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Finalizes the digest and formats it as `sha1:<BASE32>`.
    pub fn finish(self) -> String {
        return format_digest(&self.hasher.finalize());
    }
}

/// Formats raw SHA1 bytes as a WARC payload digest string.
pub fn format_digest(raw: &[u8]) -> String {
    return format!("sha1:{}", BASE32.encode(raw));
}

/// Digests a single buffer in one shot; used for request bodies and other
/// already-materialized payloads.
pub fn digest_bytes(payload: &[u8]) -> String {
    return format_digest(&Sha1::digest(payload));
}
