//! Recorder configuration.
//!
//! Parsing of command-line flags and the shape of the config file on disk
//! are outside this crate's scope; this module only defines the keys and
//! how to turn a TOML document into a [`Config`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dedup::DedupPolicyKind;
use crate::error::IndexFailureMode;

/// Everything the recorder needs to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Destination path template for WARC files, e.g.
    /// `warcs/{user}/{coll}/rec-{timestamp}-{hostname}.warc.gz`.
    pub archive_paths: String,

    /// Source collections accepted for recording; empty means accept all.
    pub accept_colls: HashSet<String>,

    /// Dedup policy selected at configuration time.
    pub dedup_policy: DedupPolicyKind,

    /// Request/response header names to drop before serialization.
    pub exclude_headers: Vec<String>,

    /// Seconds a file handle may sit idle before the next maintenance tick
    /// closes it.
    pub rollover_idle_seconds: u64,

    /// Byte threshold past which a captured body spills to a temp file.
    pub spill_threshold_bytes: usize,

    /// Arbitrary caller-supplied `key: value` fields folded into every
    /// warcinfo record, alongside the recognized `software`/`format`/
    /// `json-metadata` keys.
    pub warcinfo_fields: std::collections::BTreeMap<String, String>,

    /// How to react when the dedup index itself is unreachable.
    pub index_failure_mode: IndexFailureMode,

    /// Upstream read timeout in seconds (default 60).
    pub upstream_timeout_seconds: u64,

    /// Address the HTTP transport binds to.
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        return Self {
            archive_paths: "warcs/rec-{timestamp}-{hostname}.warc.gz".to_owned(),
            accept_colls: HashSet::new(),
            dedup_policy: DedupPolicyKind::Skip,
            exclude_headers: Vec::new(),
            rollover_idle_seconds: 300,
            spill_threshold_bytes: 1024 * 1024,
            warcinfo_fields: std::collections::BTreeMap::new(),
            index_failure_mode: IndexFailureMode::default(),
            upstream_timeout_seconds: 60,
            bind_addr: "127.0.0.1:8080".to_owned(),
        };
    }
}

impl Config {
    /// Parses a TOML document into a `Config`, filling in defaults for any
    /// key left unspecified.
    ///
    /// # Errors
    ///
    /// Returns a `toml::de::Error` if the document is not valid TOML or a
    /// field has the wrong type.
    pub fn from_toml_str(document: &str) -> Result<Self, toml::de::Error> {
        return toml::from_str(document);
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.rollover_idle_seconds, 300);
        assert_eq!(config.spill_threshold_bytes, 1024 * 1024);
        assert!(config.accept_colls.is_empty());
    }

    #[test]
    fn parses_partial_document() {
        let document = r#"
            archive_paths = "warcs/{coll}/data.warc.gz"
            accept_colls = ["live"]
        "#;
        let config = Config::from_toml_str(document).unwrap();
        assert_eq!(config.archive_paths, "warcs/{coll}/data.warc.gz");
        assert!(config.accept_colls.contains("live"));
        // untouched keys keep their defaults
        assert_eq!(config.upstream_timeout_seconds, 60);
    }
}
