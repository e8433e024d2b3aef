//! Header filtering.
//!
//! A case-insensitive predicate over header names, applied independently
//! to request and response headers before they're serialized into a WARC
//! record. It never touches body bytes, so payload digests are computed
//! before filtering runs.

/// A set of header names to drop, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct HeaderFilter {
    excluded: Vec<String>,
}

impl HeaderFilter {
    /// Builds a filter from a list of header names (e.g. `Cookie`,
    /// `Set-Cookie`, `Authorization`).
    pub fn new(names: &[String]) -> Self {
        return Self {
            excluded: names.iter().map(|name| name.to_lowercase()).collect(),
        };
    }

    pub fn is_excluded(&self, header_name: &str) -> bool {
        let lower = header_name.to_lowercase();
        return self.excluded.iter().any(|excluded| *excluded == lower);
    }
}
