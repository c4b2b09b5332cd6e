//! Proxy Stage wiring (§4.8): executes the forward request against a
//! [`gateway_proxy::ProxyTarget`], applying the cache-or-stream decision.
//! URL construction, header shaping, and cache-entry shape all live in
//! `gateway-proxy`; this module owns the actual `reqwest` round trip and
//! the axum response it produces.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use gateway_core::cache::{ProxyCacheEntry, SingleflightCache};
use gateway_core::error::{Error, Result};
use gateway_proxy::{
    build_client, build_target_url, is_cacheable_status, materialize_cache_entry, shape_request_headers,
    target_timeout, ProxyTarget,
};

/// Dispatch a proxied request, consulting the response cache first when a
/// cache key is present. `cache_ttl` is the route's cache-policy duration;
/// `None` cache_key means no cache is configured for this route.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    target: &ProxyTarget,
    cache: &SingleflightCache<String, ProxyCacheEntry>,
    cache_key: Option<String>,
    cache_ttl: Option<Duration>,
    remaining_path: Option<&str>,
    caller_query: Option<&str>,
    caller_headers: Vec<(String, String)>,
    method: axum::http::Method,
    body: Bytes,
) -> Result<Response> {
    if let Some(key) = &cache_key {
        if let Some(entry) = cache.peek(key) {
            return Ok(replay(entry));
        }
    }

    let url = build_target_url(target, remaining_path, caller_query)?;
    let outbound_headers = shape_request_headers(target, &caller_headers);
    let client = build_client(target.ignore_certificate_errors)?;

    let mut request = client.request(method, &url);
    for (name, value) in &outbound_headers {
        request = request.header(name, value);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = tokio::time::timeout(target_timeout(target), request.send())
        .await
        .map_err(|_| Error::upstream("proxy target timed out", 502))?
        .map_err(|e| Error::upstream(format!("proxy target unreachable: {e}"), 502))?;

    let status = response.status().as_u16();
    let mut headers = Vec::new();
    let mut content_headers = Vec::new();
    for (name, value) in response.headers() {
        let value = value.to_str().unwrap_or_default().to_string();
        if gateway_proxy::is_content_header(name.as_str()) {
            content_headers.push((name.to_string(), value));
        } else {
            headers.push((name.to_string(), value));
        }
    }

    let body_bytes = response.bytes().await.map_err(|e| Error::upstream(format!("failed reading upstream body: {e}"), 502))?;

    if let Some(key) = cache_key {
        if is_cacheable_status(target, status) {
            let entry = materialize_cache_entry(status, headers.clone(), content_headers.clone(), body_bytes.to_vec());
            cache.insert(key, entry.clone(), cache_ttl);
            return Ok(replay(entry));
        }
    }

    Ok(stream_response(status, headers, content_headers, body_bytes.to_vec()))
}

fn replay(entry: ProxyCacheEntry) -> Response {
    stream_response(entry.status_code, entry.headers, entry.content_headers, entry.body)
}

fn stream_response(
    status: u16,
    headers: Vec<(String, String)>,
    content_headers: Vec<(String, String)>,
    body: Vec<u8>,
) -> Response {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers.into_iter().chain(content_headers) {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::try_from(name),
            axum::http::HeaderValue::try_from(value),
        ) {
            header_map.append(name, value);
        }
    }
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, header_map, body).into_response()
}
