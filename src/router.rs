//! Collection Router.
//!
//! Resolves which (user, collection) a request belongs to from
//! `param.recorder.user` / `param.recorder.coll` query parameters, and
//! separately resolve the *source* collection the proxied transaction came
//! from (the `{source}` path segment, optionally overridden by an
//! upstream-supplied `WebAgg-Source-Coll` header) to apply the
//! `accept_colls` allow-list. The two are not the same thing: `coll` names
//! where a capture is archived, `source` names where it came from.

use std::collections::HashSet;

/// The (user, collection) a request is routed to for storage, if supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    pub user: Option<String>,
    pub coll: Option<String>,
}

/// What the router decided about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Record the transaction under this scope.
    Record(RouteParams),
    /// Proxy the request but do not record it.
    FilterRejection,
}

/// Extracts destination routing params from `param.recorder.user` and
/// `param.recorder.coll` query parameters.
pub fn extract_params(query: &std::collections::HashMap<String, String>) -> RouteParams {
    return RouteParams {
        user: query.get("param.recorder.user").cloned(),
        coll: query.get("param.recorder.coll").cloned(),
    };
}

/// Resolves the source collection a transaction came from: the
/// `WebAgg-Source-Coll` header if an upstream fetcher supplied one,
/// otherwise the `{source}` path segment the recorder was invoked under.
pub fn effective_source(path_source: &str, headers: &[(String, String)]) -> String {
    return headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("WebAgg-Source-Coll"))
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| path_source.to_owned());
}

/// Applies the `accept_colls` allow-list to a source collection: empty
/// accepts everything, otherwise the source must be named explicitly.
pub fn is_source_accepted(source: &str, accept_colls: &HashSet<String>) -> bool {
    return accept_colls.is_empty() || accept_colls.contains(source);
}

/// Combines the allow-list check with the destination params: a rejected
/// source is proxied but never recorded.
pub fn route(params: RouteParams, source: &str, accept_colls: &HashSet<String>) -> RouteDecision {
    if is_source_accepted(source, accept_colls) {
        return RouteDecision::Record(params);
    } else {
        return RouteDecision::FilterRejection;
    }
}
