//! Sort-friendly URI Reordering Transform (SURT / urlkey).
//!
//! Follows [the example in the CDXJ spec](https://specs.webrecorder.net/cdxj/0.1.0/#searchable-url):
//! lowercase the URL, drop the scheme, reverse the host labels and join them
//! with commas, close with `)`, then append path and query unchanged.

use url::{Position, Url};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SurtError {
    #[error("could not parse url: {0}")]
    Parse(#[from] url::ParseError),
    #[error("url has no host component: {0}")]
    NoHost(String),
}

/// Builds a urlkey for `url`, suitable as the sort-key prefix of a CDX row.
///
/// # Errors
///
/// Returns [`SurtError::Parse`] if `url` is not a valid URL, or
/// [`SurtError::NoHost`] for schemes without an authority (e.g. `urn:`).
pub fn create_surt(url: &str) -> Result<String, SurtError> {
    let parsed = Url::parse(url)?;
    let Some(host) = parsed.host_str() else {
        return Err(SurtError::NoHost(url.to_owned()));
    };

    let mut labels: Vec<&str> = host.split('.').collect();
    labels.reverse();
    let host_reversed = labels.join(",");

    let rest = &parsed[Position::BeforePath..];

    return Ok(format!("{host_reversed}){rest}").to_lowercase());
}
