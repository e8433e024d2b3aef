//! Dedup policy engine and index contract.
//!
//! A payload digest is checked against a sorted set in an external store
//! through an explicit [`Index`] trait, and the three possible outcomes
//! are an explicit enum, so a caller can never observe a fourth,
//! undocumented behavior.

mod cdx;
mod memory;

pub use cdx::CdxEntry;
pub use memory::InMemoryIndex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which dedup behavior a destination is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicyKind {
    /// Do not record a payload already present in the index; write
    /// nothing at all for that response.
    Skip,
    /// Write a `revisit` record referencing the original capture.
    WriteRevisit,
    /// Ignore the index and always write a full `response` record.
    WriteDupe,
}

/// A scope within the index: dedup lookups and inserts never cross a
/// (user, collection) boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub user: String,
    pub coll: String,
}

/// The record of a previously captured payload, as needed to build a
/// revisit record referencing it.
#[derive(Debug, Clone)]
pub struct Original {
    pub target_uri: String,
    pub date: DateTime<Utc>,
}

/// Pluggable dedup index contract. Implementations may be backed by
/// anything that can answer a digest lookup within a scope; this crate
/// ships only [`InMemoryIndex`], a reference implementation for tests.
pub trait Index: Send + Sync {
    /// Looks up the most recent capture of `digest` within `scope`, if any.
    fn lookup(&self, scope: &Scope, digest: &str) -> Result<Option<Original>>;

    /// Records that `digest` was captured for `target_uri` at `date`,
    /// plus the full CDX row describing where it landed.
    fn insert(&self, scope: &Scope, digest: &str, original: Original, entry: CdxEntry) -> Result<()>;

    /// Returns every entry in `scope` whose urlkey falls in
    /// `[from, to)`, sorted by `urlkey + ' ' + timestamp`.
    fn range(&self, scope: &Scope, from: &str, to: &str) -> Result<Vec<CdxEntry>>;
}

/// What the policy engine decided to do with one captured transaction.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Write nothing; an identical payload already exists in the index.
    Skip,
    /// Write a revisit record referencing `original`.
    WriteRevisit(Original),
    /// Write the full response and request records. Under `WriteDupe`, a
    /// digest hit additionally requires a second, `warc/revisit`-mime CDX
    /// row referencing `also_revisit`'s original date and URI to be
    /// inserted alongside the new response row.
    WriteFull { also_revisit: Option<Original> },
}

/// Applies `policy` to a payload digest lookup, implementing the
/// Skip / WriteRevisit / WriteDupe semantics.
pub fn decide(policy: DedupPolicyKind, lookup: Option<Original>) -> Decision {
    match (policy, lookup) {
        (DedupPolicyKind::WriteDupe, Some(original)) => {
            return Decision::WriteFull {
                also_revisit: Some(original),
            };
        }
        (_, None) => return Decision::WriteFull { also_revisit: None },
        (DedupPolicyKind::Skip, Some(_)) => return Decision::Skip,
        (DedupPolicyKind::WriteRevisit, Some(original)) => return Decision::WriteRevisit(original),
    }
}

#[cfg(test)]
mod tests {
    use super::{decide, DedupPolicyKind, Decision, Original};
    use chrono::Utc;

    fn original() -> Original {
        Original {
            target_uri: "http://httpbin.org/get".to_owned(),
            date: Utc::now(),
        }
    }

    #[test]
    fn skip_policy_skips_on_hit_and_writes_on_miss() {
        assert!(matches!(
            decide(DedupPolicyKind::Skip, Some(original())),
            Decision::Skip
        ));
        assert!(matches!(
            decide(DedupPolicyKind::Skip, None),
            Decision::WriteFull { also_revisit: None }
        ));
    }

    #[test]
    fn write_revisit_policy_references_the_original_on_hit() {
        assert!(matches!(
            decide(DedupPolicyKind::WriteRevisit, Some(original())),
            Decision::WriteRevisit(_)
        ));
        assert!(matches!(
            decide(DedupPolicyKind::WriteRevisit, None),
            Decision::WriteFull { also_revisit: None }
        ));
    }

    #[test]
    fn write_dupe_policy_always_writes_full_and_marks_a_hit_for_the_extra_revisit_row() {
        assert!(matches!(
            decide(DedupPolicyKind::WriteDupe, Some(original())),
            Decision::WriteFull {
                also_revisit: Some(_)
            }
        ));
        assert!(matches!(
            decide(DedupPolicyKind::WriteDupe, None),
            Decision::WriteFull { also_revisit: None }
        ));
    }
}
