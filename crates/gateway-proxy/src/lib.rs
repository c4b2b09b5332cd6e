//! Reverse-proxy terminal stage (§4.8): target URL construction, header
//! shaping, client-flavor selection, and the cache/stream decision for
//! proxied responses.

use std::collections::HashSet;
use std::time::Duration;

use gateway_core::cache::{is_excluded_from_cache_replay, OrderedHeaders, ProxyCacheEntry};
use gateway_core::error::{Error, Result};
use once_cell::sync::Lazy;
use reqwest::Client;

/// Headers whose values are the *content* of the request/response rather
/// than transport metadata. Overrides targeting these names replace the
/// content-header set; everything else replaces the plain header set.
static CONTENT_HEADER_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "content-type",
        "content-length",
        "content-encoding",
        "content-language",
        "content-disposition",
    ]
    .into_iter()
    .collect()
});

pub fn is_content_header(name: &str) -> bool {
    CONTENT_HEADER_NAMES.contains(name.to_ascii_lowercase().as_str())
}

/// Per-route proxy settings resolved against §4.8's inputs.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub url_template: String,
    pub excluded_headers: HashSet<String>,
    pub header_overrides: Vec<(String, String)>,
    pub ignore_certificate_errors: bool,
    pub target_timeout_seconds: u64,
    pub exclude_status_codes_from_cache: HashSet<u16>,
}

/// Insert `remaining_path` before any `?` in the template URL (or append if
/// none), then append the caller's query string using `?` or `&`.
pub fn build_target_url(
    target: &ProxyTarget,
    remaining_path: Option<&str>,
    caller_query: Option<&str>,
) -> Result<String> {
    let remaining = remaining_path.unwrap_or("");

    let (base, existing_query) = match target.url_template.split_once('?') {
        Some((b, q)) => (b.to_string(), Some(q.to_string())),
        None => (target.url_template.clone(), None),
    };

    let mut url = format!("{base}{remaining}");
    if let Some(existing_query) = existing_query {
        url.push('?');
        url.push_str(&existing_query);
    }

    if let Some(caller_query) = caller_query.filter(|q| !q.is_empty()) {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(caller_query);
    }

    url::Url::parse(&url).map_err(|e| Error::proxy(format!("invalid proxy target URL: {e}")))?;
    Ok(url)
}

/// Partition header overrides into plain-header vs content-header sets,
/// and compute the final outbound header list: overrides first, then the
/// caller's headers that are neither excluded nor already overridden.
pub fn shape_request_headers(
    target: &ProxyTarget,
    caller_headers: &[(String, String)],
) -> OrderedHeaders {
    let mut out: OrderedHeaders = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (name, value) in &target.header_overrides {
        out.push((name.clone(), value.clone()));
        seen.insert(name.to_ascii_lowercase());
    }

    for (name, value) in caller_headers {
        let lower = name.to_ascii_lowercase();
        if target.excluded_headers.contains(&lower) || seen.contains(&lower) {
            continue;
        }
        out.push((name.clone(), value.clone()));
    }

    out
}

/// Build an HTTP client for the given certificate-ignore flavor. Two clients
/// (strict / insecure) are cheap to construct once at startup and reused;
/// this helper exists to keep the selection rule in one place.
pub fn build_client(ignore_certificate_errors: bool) -> Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(ignore_certificate_errors)
        .build()
        .map_err(|e| Error::proxy(format!("failed to build proxy HTTP client: {e}")))
}

/// `min(request-cancellation, target_timeout_seconds)` — modeled here as
/// just the target-side bound; the request-cancellation side is applied by
/// the caller via `tokio::select!` against the context's cancellation token.
pub fn target_timeout(target: &ProxyTarget) -> Duration {
    Duration::from_secs(target.target_timeout_seconds)
}

/// Whether a response's status should be materialized into the cache
/// (true) or bypass caching entirely and stream (false).
pub fn is_cacheable_status(target: &ProxyTarget, status: u16) -> bool {
    !target.exclude_status_codes_from_cache.contains(&status)
}

/// Build a `ProxyCacheEntry` from a fetched response's parts, filtering out
/// the headers that must never be replayed (§3, §4.8).
pub fn materialize_cache_entry(
    status_code: u16,
    headers: OrderedHeaders,
    content_headers: OrderedHeaders,
    body: Vec<u8>,
) -> ProxyCacheEntry {
    let filtered_headers = headers
        .into_iter()
        .filter(|(name, _)| !is_excluded_from_cache_replay(name))
        .collect();
    let filtered_content_headers = content_headers
        .into_iter()
        .filter(|(name, _)| !is_excluded_from_cache_replay(name))
        .collect();

    ProxyCacheEntry {
        status_code,
        headers: filtered_headers,
        content_headers: filtered_content_headers,
        body,
    }
}
