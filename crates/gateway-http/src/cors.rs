//! CORS Stage (§4.3). Implemented as a set of pure functions rather than a
//! `tower_http::cors::CorsLayer`: that layer's origin predicate can't see
//! the matched route's method set or its auth-policy presence, both of
//! which this stage's rules key off, so the decision is made directly
//! against the resolved [`gateway_config::CorsPolicyConfig`] instead.

use gateway_config::CorsPolicyConfig;
use regex::Regex;

/// The computed CORS response headers for one request.
#[derive(Debug, Clone, Default)]
pub struct CorsDecision {
    pub allow_origin: Option<String>,
    pub allow_credentials: bool,
    pub allow_methods: Option<String>,
    pub allow_headers: Option<String>,
    pub max_age: Option<u64>,
}

/// A conservative fallback used when no CORS policy resolves at all
/// (route → global → this).
pub fn permissive_default() -> CorsPolicyConfig {
    CorsPolicyConfig {
        origin_regex: ".*".to_string(),
        fallback_origin: "*".to_string(),
        max_age: 600,
        allow_credentials: false,
        allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
    }
}

/// Decide the CORS headers for a request, given whether the matched route
/// carries an auth policy (which forces `allow_credentials = true` and
/// forbids a literal `*` origin).
pub fn decide(
    policy: &CorsPolicyConfig,
    origin_header: Option<&str>,
    route_has_auth_policy: bool,
) -> CorsDecision {
    let allow_credentials = route_has_auth_policy || policy.allow_credentials;

    let allow_origin = origin_header.and_then(|origin| {
        let matches = Regex::new(&policy.origin_regex).is_ok_and(|re| re.is_match(origin));
        if matches {
            Some(origin.to_string())
        } else if allow_credentials && policy.fallback_origin == "*" {
            None
        } else {
            Some(policy.fallback_origin.clone())
        }
    });

    CorsDecision {
        allow_origin,
        allow_credentials,
        allow_methods: None,
        allow_headers: (!policy.allowed_headers.is_empty()).then(|| policy.allowed_headers.join(", ")),
        max_age: Some(policy.max_age),
    }
}

/// Synthesize the `Access-Control-Allow-Methods` value for an `OPTIONS`
/// preflight from the matched route's method set, or a conservative
/// default when the route matches any method.
pub fn preflight_allow_methods(route_methods: &std::collections::HashSet<String>) -> String {
    if route_methods.is_empty() {
        "GET, POST, PUT, PATCH, DELETE, OPTIONS".to_string()
    } else {
        let mut methods: Vec<String> = route_methods.iter().map(|m| m.to_ascii_uppercase()).collect();
        methods.sort();
        methods.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CorsPolicyConfig {
        CorsPolicyConfig {
            origin_regex: r"^https://.*\.example\.com$".to_string(),
            fallback_origin: "https://fallback.example.com".to_string(),
            max_age: 3600,
            allow_credentials: false,
            allowed_headers: vec!["Content-Type".to_string()],
        }
    }

    #[test]
    fn matching_origin_is_echoed_back() {
        let decision = decide(&policy(), Some("https://app.example.com"), false);
        assert_eq!(decision.allow_origin.as_deref(), Some("https://app.example.com"));
    }

    #[test]
    fn non_matching_origin_uses_fallback() {
        let decision = decide(&policy(), Some("https://evil.com"), false);
        assert_eq!(decision.allow_origin.as_deref(), Some("https://fallback.example.com"));
    }

    #[test]
    fn auth_policy_forces_credentials_and_forbids_wildcard() {
        let mut p = policy();
        p.fallback_origin = "*".to_string();
        let decision = decide(&p, Some("https://evil.com"), true);
        assert!(decision.allow_credentials);
        assert_ne!(decision.allow_origin.as_deref(), Some("*"));
    }

    #[test]
    fn preflight_methods_default_when_route_accepts_any() {
        let methods = preflight_allow_methods(&std::collections::HashSet::new());
        assert!(methods.contains("GET"));
    }

    #[test]
    fn preflight_methods_reflect_declared_set() {
        let mut set = std::collections::HashSet::new();
        set.insert("post".to_string());
        set.insert("get".to_string());
        assert_eq!(preflight_allow_methods(&set), "GET, POST");
    }
}
