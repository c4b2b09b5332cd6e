//! UserInfo fallback fetch/cache (§4.4 step 6). Only called when the
//! token is missing claims the route declares in `userinfo_fallback_claims`;
//! a failure here is infrastructure-grade (§7) and must not fail the
//! request — the caller proceeds with token-derived claims alone.

use std::time::Duration;

use base64::Engine;
use gateway_core::cache::{SingleflightCache, UserInfoCacheEntry};
use sha2::{Digest, Sha256};

/// Inputs resolved for one UserInfo call.
pub struct UserInfoRequest<'a> {
    pub userinfo_endpoint: &'a str,
    pub access_token: &'a str,
    pub configured_max_ttl: Duration,
    pub token_expires_in: Option<Duration>,
    pub timeout: Duration,
}

pub struct UserInfoCache {
    cache: SingleflightCache<String, Option<UserInfoCacheEntry>>,
    client: reqwest::Client,
}

impl UserInfoCache {
    pub fn new(client: reqwest::Client) -> Self {
        Self { cache: SingleflightCache::new(), client }
    }

    /// Fetch (or replay) the UserInfo claims for this request. Returns
    /// `None` on any failure (transport, timeout, non-2xx, malformed body)
    /// rather than propagating an error — per §7 this is non-fatal.
    pub async fn get_or_fetch(&self, request: UserInfoRequest<'_>) -> Option<serde_json::Map<String, serde_json::Value>> {
        let Some(token_expires_in) = request.token_expires_in else {
            return None;
        };
        if token_expires_in.is_zero() {
            return None;
        }

        let ttl = request.configured_max_ttl.min(token_expires_in);
        let key = format!("userinfo_claims:{}", cache_key_for_token(request.access_token));

        let client = self.client.clone();
        let endpoint = request.userinfo_endpoint.to_string();
        let token = request.access_token.to_string();
        let timeout = request.timeout;

        let result = self
            .cache
            .get_or_build(key.clone(), Some(ttl), move || async move {
                fetch_userinfo(&client, &endpoint, &token, timeout).await
            })
            .await;

        if result.is_none() {
            self.cache.invalidate(&key);
        }

        result.map(|entry| entry.claims)
    }
}

async fn fetch_userinfo(
    client: &reqwest::Client,
    endpoint: &str,
    access_token: &str,
    timeout: Duration,
) -> Option<UserInfoCacheEntry> {
    let response = tokio::time::timeout(
        timeout,
        client.get(endpoint).bearer_auth(access_token).send(),
    )
    .await
    .ok()?
    .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let claims: serde_json::Value = response.json().await.ok()?;
    Some(UserInfoCacheEntry { claims: claims.as_object()?.clone() })
}

/// Merge UserInfo claims into the token-derived claims without overwriting
/// any claim the token already carries (§4.4 step 6, last sentence).
pub fn merge_without_overwrite(
    token_claims: &mut serde_json::Map<String, serde_json::Value>,
    userinfo_claims: serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in userinfo_claims {
        token_claims.entry(key).or_insert(value);
    }
}

/// `base64(sha256(access_token))`, per the UserInfo cache entry's key
/// derivation (§3).
fn cache_key_for_token(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}
