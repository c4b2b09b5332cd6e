//! JWT Authorizer stage (§4.4): OIDC discovery + JWKS caching, token
//! validation, and the conditional UserInfo fallback, composed into one
//! entry point the dispatch handler calls for any route carrying an
//! `auth_policy`.

pub mod discovery;
pub mod userinfo;
pub mod validator;

use std::time::Duration;

use gateway_config::OidcProviderConfig;
use gateway_core::error::{Error, Result};
use serde_json::{Map, Value};

use discovery::DiscoveryCache;
use userinfo::{UserInfoCache, UserInfoRequest};
use validator::JwtPolicy;

/// The outcome of a successful authorization: the merged claim set plus
/// the identity fields extracted from it (§4.4 steps 5, 6, 8).
pub struct AuthenticatedIdentity {
    pub claims: Map<String, Value>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Run the full JWT Authorizer stage for one request (§4.4 steps 1-8):
/// extract the bearer token, fetch/validate against the provider's cached
/// discovery document and JWKS, enforce required scopes/roles, then fall
/// back to UserInfo when the token is missing the configured claims.
pub async fn authenticate(
    discovery_cache: &DiscoveryCache,
    userinfo_cache: &UserInfoCache,
    provider: &OidcProviderConfig,
    authorization_header: Option<&str>,
) -> Result<AuthenticatedIdentity> {
    let authority = provider
        .authority
        .as_deref()
        .ok_or_else(|| Error::config("auth_policy provider has no configured authority"))?;

    let token = validator::extract_bearer_token(authorization_header)?;

    let discovery_entry = discovery_cache.get(authority).await?;
    let keys = discovery::reconstitute_keys(&discovery_entry)?;

    let policy = JwtPolicy {
        audience: provider.audience.clone(),
        issuer: provider.issuer.clone().or_else(|| Some(discovery_entry.issuer.clone())),
        validate_issuer: provider.validate_issuer,
        validate_audience: provider.validate_audience,
        validate_lifetime: provider.validate_lifetime,
        clock_skew_seconds: provider.clock_skew_seconds,
        required_scopes: provider.required_scopes.clone(),
        required_roles: provider.required_roles.clone(),
    };

    let mut claims = validator::validate_token(token, &keys, &policy)?;

    let missing_fallback_claims = provider
        .userinfo_fallback_claims
        .iter()
        .any(|name| !claims.contains_key(name));

    if missing_fallback_claims {
        if let Some(userinfo_endpoint) = &discovery_entry.userinfo_endpoint {
            let token_expires_in = claims
                .get("exp")
                .and_then(Value::as_i64)
                .map(|exp| exp - chrono::Utc::now().timestamp())
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs as u64));

            let request = UserInfoRequest {
                userinfo_endpoint,
                access_token: token,
                configured_max_ttl: provider
                    .userinfo_cache_duration_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(300)),
                token_expires_in,
                timeout: Duration::from_secs(provider.userinfo_timeout_seconds),
            };

            if let Some(userinfo_claims) = userinfo_cache.get_or_fetch(request).await {
                userinfo::merge_without_overwrite(&mut claims, userinfo_claims);
            }
        }
    }

    validator::enforce_required_scopes_and_roles(&claims, &policy)?;
    let (user_id, email, name) = validator::extract_identity(&claims);

    Ok(AuthenticatedIdentity { claims, user_id, email, name })
}
