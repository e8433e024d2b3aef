//! Reference in-memory [`Index`] implementation.
//!
//! Index storage is deliberately pluggable; production deployments bring
//! their own. This implementation exists for tests and for running the
//! recorder standalone without an external store, backed by a `BTreeMap`
//! so `range` queries come back already sorted by urlkey.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{CdxEntry, Index, Original, Scope};
use crate::error::Result;

#[derive(Default)]
pub struct InMemoryIndex {
    // keyed by (scope, digest) for lookup; value is the first-known
    // original plus every CDX row ever inserted under that digest.
    by_digest: Mutex<BTreeMap<(String, String), (Original, Vec<CdxEntry>)>>,
    // keyed by (scope, sort_key) for range scans.
    by_sort_key: Mutex<BTreeMap<(String, String), CdxEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        return Self::default();
    }

    fn scope_key(scope: &Scope) -> String {
        return format!("{}:{}", scope.user, scope.coll);
    }
}

impl Index for InMemoryIndex {
    fn lookup(&self, scope: &Scope, digest: &str) -> Result<Option<Original>> {
        let by_digest = self.by_digest.lock().expect("index mutex poisoned");
        let key = (Self::scope_key(scope), digest.to_owned());
        let found = by_digest.get(&key).map(|(original, _)| original.clone());
        return Ok(found);
    }

    fn insert(&self, scope: &Scope, digest: &str, original: Original, entry: CdxEntry) -> Result<()> {
        let scope_key = Self::scope_key(scope);

        let mut by_digest = self.by_digest.lock().expect("index mutex poisoned");
        by_digest
            .entry((scope_key.clone(), digest.to_owned()))
            .or_insert_with(|| (original, Vec::new()))
            .1
            .push(entry.clone());
        drop(by_digest);

        let mut by_sort_key = self.by_sort_key.lock().expect("index mutex poisoned");
        by_sort_key.insert((scope_key, entry.sort_key()), entry);
        return Ok(());
    }

    fn range(&self, scope: &Scope, from: &str, to: &str) -> Result<Vec<CdxEntry>> {
        let scope_key = Self::scope_key(scope);
        let by_sort_key = self.by_sort_key.lock().expect("index mutex poisoned");
        let entries = by_sort_key
            .range((scope_key.clone(), from.to_owned())..(scope_key, to.to_owned()))
            .map(|(_, entry)| entry.clone())
            .collect();
        return Ok(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryIndex;
    use crate::dedup::{CdxEntry, Index, Original, Scope};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn scope() -> Scope {
        Scope {
            user: "USER".to_owned(),
            coll: "COLL".to_owned(),
        }
    }

    fn entry(urlkey: &str, timestamp: &str) -> CdxEntry {
        CdxEntry {
            urlkey: urlkey.to_owned(),
            timestamp: timestamp.to_owned(),
            url: "http://httpbin.org/get".to_owned(),
            mime: "application/json".to_owned(),
            status: 200,
            digest: "sha1:3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ".to_owned(),
            redirect: None,
            meta: None,
            length: 1,
            offset: 0,
            filename: "a.warc.gz".to_owned(),
        }
    }

    #[test]
    fn lookup_misses_before_insert_and_hits_after() {
        let index = InMemoryIndex::new();
        let digest = "sha1:3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ";
        assert!(index.lookup(&scope(), digest).unwrap().is_none());

        let original = Original {
            target_uri: "http://httpbin.org/get".to_owned(),
            date: Utc::now(),
        };
        index
            .insert(&scope(), digest, original, entry("org,httpbin)/get", "20260101000000"))
            .unwrap();

        assert!(index.lookup(&scope(), digest).unwrap().is_some());
    }

    #[test]
    fn lookup_is_scoped_per_user_and_collection() {
        let index = InMemoryIndex::new();
        let digest = "sha1:3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ";
        let original = Original {
            target_uri: "http://httpbin.org/get".to_owned(),
            date: Utc::now(),
        };
        index
            .insert(&scope(), digest, original, entry("org,httpbin)/get", "20260101000000"))
            .unwrap();

        let other = Scope {
            user: "OTHER".to_owned(),
            coll: "COLL".to_owned(),
        };
        assert!(index.lookup(&other, digest).unwrap().is_none());
    }

    #[test]
    fn range_returns_entries_sorted_by_urlkey_and_timestamp() {
        let index = InMemoryIndex::new();
        let original = Original {
            target_uri: "http://httpbin.org/get".to_owned(),
            date: Utc::now(),
        };
        index
            .insert(
                &scope(),
                "d1",
                original.clone(),
                entry("org,httpbin)/get", "20260102000000"),
            )
            .unwrap();
        index
            .insert(&scope(), "d2", original, entry("org,httpbin)/get", "20260101000000"))
            .unwrap();

        let rows = index
            .range(&scope(), "org,httpbin)/", "org,httpbin,")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "20260101000000");
        assert_eq!(rows[1].timestamp, "20260102000000");
    }
}
