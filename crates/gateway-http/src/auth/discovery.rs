//! OIDC discovery-document and JWKS fetch/cache (§4.4 step 2).
//!
//! Grounded on `r2e-security`'s `JwksCache`: a TTL-bounded fetch of a
//! provider's signing keys, refreshed at most once per cache miss. That
//! cache keeps reconstituted `DecodingKey`s directly; this one cannot,
//! because the shared cache layer (`gateway_core::cache`) round-trips
//! every entry through a generic store, and `DecodingKey` does not survive
//! that. So the raw JWKS JSON is what's cached, and keys are rebuilt from
//! it on every read — the design the OIDC cache entry exists for.

use std::sync::Arc;
use std::time::Duration;

use gateway_core::cache::{OidcDiscoveryEntry, SingleflightCache};
use gateway_core::error::{Error, Result};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;

const DISCOVERY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
    userinfo_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    y: Option<String>,
    crv: Option<String>,
    #[serde(rename = "alg")]
    _alg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// A signing key keyed by `kid`, ready to hand to `jsonwebtoken::decode`.
pub struct ReconstitutedKey {
    pub kid: Option<String>,
    pub decoding_key: DecodingKey,
    pub algorithm_family: KeyFamily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
}

/// The discovery cache, shared across every provider this process validates
/// tokens against. Cached values are `Result<_, String>` rather than the
/// bare entry: §7 requires a failed discovery fetch to leave the cache
/// empty so the next request retries, but `get_or_build` always installs a
/// slot before its build future resolves. An `Err` result is immediately
/// evicted after the singleflight wait completes, so every concurrent
/// waiter on a failed fetch still shares the one attempt, while the next
/// distinct request sees a clean miss.
pub struct DiscoveryCache {
    cache: SingleflightCache<String, Result<OidcDiscoveryEntry, String>>,
    client: reqwest::Client,
}

impl DiscoveryCache {
    pub fn new(client: reqwest::Client) -> Self {
        Self { cache: SingleflightCache::new(), client }
    }

    /// Fetch (or replay) the discovery document and JWKS for `authority`,
    /// keyed `oidc_discovery:<trimmed-authority>` per spec.
    pub async fn get(&self, authority: &str) -> Result<OidcDiscoveryEntry> {
        let trimmed = authority.trim_end_matches('/').to_string();
        let key = format!("oidc_discovery:{trimmed}");
        let client = self.client.clone();
        let fetch_authority = trimmed.clone();

        let result = self
            .cache
            .get_or_build(key.clone(), Some(DISCOVERY_TTL), move || async move {
                fetch_discovery_entry(&client, &fetch_authority).await
            })
            .await;

        if result.is_err() {
            self.cache.invalidate(&key);
        }

        result.map_err(Error::config)
    }
}

async fn fetch_discovery_entry(
    client: &reqwest::Client,
    trimmed_authority: &str,
) -> Result<OidcDiscoveryEntry, String> {
    let discovery_url = format!("{trimmed_authority}/.well-known/openid-configuration");
    let document: DiscoveryDocument = client
        .get(&discovery_url)
        .send()
        .await
        .map_err(|e| format!("discovery fetch failed: {e}"))?
        .error_for_status()
        .map_err(|e| format!("discovery endpoint returned an error: {e}"))?
        .json()
        .await
        .map_err(|e| format!("malformed discovery document: {e}"))?;

    let raw_jwks_json = client
        .get(&document.jwks_uri)
        .send()
        .await
        .map_err(|e| format!("JWKS fetch failed: {e}"))?
        .error_for_status()
        .map_err(|e| format!("JWKS endpoint returned an error: {e}"))?
        .text()
        .await
        .map_err(|e| format!("failed to read JWKS response body: {e}"))?;

    Ok(OidcDiscoveryEntry {
        issuer: document.issuer,
        jwks_uri: document.jwks_uri,
        userinfo_endpoint: document.userinfo_endpoint,
        raw_jwks_json,
    })
}

/// Reconstitute usable signing keys from a discovery entry's raw JWKS JSON.
pub fn reconstitute_keys(entry: &OidcDiscoveryEntry) -> Result<Vec<ReconstitutedKey>> {
    let parsed: JwksResponse = serde_json::from_str(&entry.raw_jwks_json)
        .map_err(|e| Error::config(format!("malformed JWKS document: {e}")))?;

    if parsed.keys.is_empty() {
        return Err(Error::config("OIDC provider returned no signing keys"));
    }

    parsed
        .keys
        .into_iter()
        .map(|jwk| {
            let decoding_key = match jwk.kty.as_str() {
                "RSA" => {
                    let n = jwk.n.as_deref().ok_or_else(|| Error::config("JWKS RSA key missing 'n'"))?;
                    let e = jwk.e.as_deref().ok_or_else(|| Error::config("JWKS RSA key missing 'e'"))?;
                    DecodingKey::from_rsa_components(n, e)
                        .map_err(|err| Error::config(format!("invalid RSA JWK: {err}")))?
                }
                "EC" => {
                    let x = jwk.x.as_deref().ok_or_else(|| Error::config("JWKS EC key missing 'x'"))?;
                    let y = jwk.y.as_deref().ok_or_else(|| Error::config("JWKS EC key missing 'y'"))?;
                    DecodingKey::from_ec_components(x, y)
                        .map_err(|err| Error::config(format!("invalid EC JWK: {err}")))?
                }
                other => return Err(Error::config(format!("unsupported JWK key type '{other}'"))),
            };
            let algorithm_family = if jwk.kty == "RSA" { KeyFamily::Rsa } else { KeyFamily::Ec };
            Ok(ReconstitutedKey { kid: jwk.kid, decoding_key, algorithm_family })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_JWKS: &str = r#"{"keys":[{"kty":"RSA","kid":"k1","n":"AQAB","e":"AQAB"}]}"#;

    #[test]
    fn reconstitutes_rsa_keys_from_raw_json() {
        let entry = OidcDiscoveryEntry {
            issuer: "https://issuer.example.com".to_string(),
            jwks_uri: "https://issuer.example.com/jwks".to_string(),
            userinfo_endpoint: None,
            raw_jwks_json: RSA_JWKS.to_string(),
        };
        let keys = reconstitute_keys(&entry).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].kid.as_deref(), Some("k1"));
        assert_eq!(keys[0].algorithm_family, KeyFamily::Rsa);
    }

    #[test]
    fn empty_key_set_is_an_error() {
        let entry = OidcDiscoveryEntry {
            issuer: "https://issuer.example.com".to_string(),
            jwks_uri: "https://issuer.example.com/jwks".to_string(),
            userinfo_endpoint: None,
            raw_jwks_json: r#"{"keys":[]}"#.to_string(),
        };
        assert!(reconstitute_keys(&entry).is_err());
    }
}
