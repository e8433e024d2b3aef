//! CDXJ entry model and serialization.

use serde::{Deserialize, Serialize};

/// One row of a CDXJ index: `{urlkey} {timestamp} {json}`.
///
/// Sorted by `urlkey` then `timestamp`, which is why those two fields are
/// kept outside the JSON blob rather than folded into it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdxEntry {
    pub urlkey: String,
    /// 14-digit `YYYYMMDDHHMMSS` capture timestamp.
    pub timestamp: String,
    pub url: String,
    pub mime: String,
    pub status: u16,
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    pub length: u64,
    pub offset: u64,
    pub filename: String,
}

impl CdxEntry {
    /// The lexicographic sort key used both to order the index file and to
    /// scope a `range` query: `urlkey + ' ' + timestamp`.
    pub fn sort_key(&self) -> String {
        return format!("{} {}", self.urlkey, self.timestamp);
    }

    /// Renders one line of a `.cdxj` file, without a trailing newline.
    pub fn to_cdxj_line(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(&CdxJson {
            url: &self.url,
            mime: &self.mime,
            status: self.status,
            digest: &self.digest,
            redirect: self.redirect.as_deref(),
            meta: self.meta.as_deref(),
            length: self.length,
            offset: self.offset,
            filename: &self.filename,
        })?;
        return Ok(format!("{} {} {json}", self.urlkey, self.timestamp));
    }
}

#[derive(Serialize)]
struct CdxJson<'a> {
    url: &'a str,
    mime: &'a str,
    status: u16,
    digest: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<&'a str>,
    length: u64,
    offset: u64,
    filename: &'a str,
}
