//! Route resolution: exact-path and longest-wildcard-prefix matching.
//!
//! Two indexes are maintained: an exact `(method, path) -> route` map, and a
//! wildcard index grouped by static prefix. A match first tries the exact
//! index; on miss it finds the longest wildcard prefix that is a prefix of
//! the request path and whose method set contains (or is empty for) the
//! request method. Ambiguous registrations — two wildcard routes sharing
//! the same longest prefix with overlapping methods — are rejected when the
//! table is built, not at request time.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// HTTP methods a route may be registered under. An empty set means "any
/// method".
pub type MethodSet = HashSet<String>;

/// One registered route's resolution-relevant shape. The full route
/// definition (service type, query definitions, policies, ...) lives in
/// `gateway-config`; the resolver only needs identity, path, and methods.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub route_id: String,
    pub path: String,
    pub methods: MethodSet,
}

impl RouteEntry {
    fn accepts(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    fn is_wildcard(&self) -> bool {
        self.path.ends_with('*')
    }

    fn static_prefix(&self) -> &str {
        self.path.trim_end_matches('*')
    }
}

/// The result of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolvedRoute<'a> {
    pub route: &'a RouteEntry,
    /// Characters of the request path after the matched static prefix,
    /// preserving a leading separator. `None` for exact matches.
    pub remaining_path: Option<String>,
}

/// The built, query-ready route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    exact: HashMap<(String, String), RouteEntry>,
    /// Wildcard entries sorted by descending prefix length so the first
    /// matching entry is always the longest prefix.
    wildcards: Vec<RouteEntry>,
}

impl RouteTable {
    /// Build a route table from a flat list of entries, validating the
    /// no-ambiguous-registration invariant.
    pub fn build(entries: Vec<RouteEntry>) -> Result<Self> {
        let mut table = Self::default();

        for entry in entries {
            if entry.is_wildcard() {
                table.insert_wildcard(entry)?;
            } else {
                table.insert_exact(entry)?;
            }
        }

        table.wildcards.sort_by(|a, b| b.static_prefix().len().cmp(&a.static_prefix().len()));
        Ok(table)
    }

    fn insert_exact(&mut self, entry: RouteEntry) -> Result<()> {
        for method in Self::effective_methods(&entry.methods) {
            let key = (method.clone(), entry.path.clone());
            if self.exact.contains_key(&key) {
                return Err(Error::config(format!(
                    "ambiguous route registration: {method} {} is declared more than once",
                    entry.path
                )));
            }
            self.exact.insert(key, entry.clone());
        }
        Ok(())
    }

    fn insert_wildcard(&mut self, entry: RouteEntry) -> Result<()> {
        let prefix = entry.static_prefix().to_string();
        for existing in &self.wildcards {
            if existing.static_prefix() == prefix
                && Self::methods_overlap(&existing.methods, &entry.methods)
            {
                return Err(Error::config(format!(
                    "ambiguous wildcard route registration: prefix '{prefix}' is claimed by overlapping method sets"
                )));
            }
        }
        self.wildcards.push(entry);
        Ok(())
    }

    fn methods_overlap(a: &MethodSet, b: &MethodSet) -> bool {
        if a.is_empty() || b.is_empty() {
            return true;
        }
        a.iter().any(|m| b.iter().any(|n| m.eq_ignore_ascii_case(n)))
    }

    fn effective_methods(methods: &MethodSet) -> Vec<String> {
        if methods.is_empty() {
            vec!["*".to_string()]
        } else {
            methods.iter().map(|m| m.to_ascii_uppercase()).collect()
        }
    }

    /// Resolve `(method, path)` against this table.
    pub fn resolve(&self, method: &str, path: &str) -> Option<ResolvedRoute<'_>> {
        if let Some(route) = self
            .exact
            .get(&(method.to_ascii_uppercase(), path.to_string()))
            .or_else(|| self.exact.get(&("*".to_string(), path.to_string())))
        {
            return Some(ResolvedRoute { route, remaining_path: None });
        }

        for route in &self.wildcards {
            let prefix = route.static_prefix();
            if path.starts_with(prefix) && route.accepts(method) {
                let remaining = &path[prefix.len()..];
                let remaining = if remaining.is_empty() || remaining.starts_with('/') {
                    remaining.to_string()
                } else {
                    format!("/{remaining}")
                };
                return Some(ResolvedRoute { route, remaining_path: Some(remaining) });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(route_id: &str, path: &str, methods: &[&str]) -> RouteEntry {
        RouteEntry {
            route_id: route_id.to_string(),
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn exact_beats_wildcard() {
        let table = RouteTable::build(vec![
            entry("wild", "/api/*", &[]),
            entry("exact", "/api/orders", &["GET"]),
        ])
        .unwrap();

        let resolved = table.resolve("GET", "/api/orders").unwrap();
        assert_eq!(resolved.route.route_id, "exact");
        assert!(resolved.remaining_path.is_none());
    }

    #[test]
    fn longest_wildcard_prefix_wins() {
        let table = RouteTable::build(vec![
            entry("short", "/api/*", &[]),
            entry("long", "/api/orders/*", &[]),
        ])
        .unwrap();

        let resolved = table.resolve("GET", "/api/orders/42").unwrap();
        assert_eq!(resolved.route.route_id, "long");
        assert_eq!(resolved.remaining_path.as_deref(), Some("/42"));
    }

    #[test]
    fn missing_route_is_none() {
        let table = RouteTable::build(vec![entry("a", "/a", &["GET"])]).unwrap();
        assert!(table.resolve("GET", "/b").is_none());
    }

    #[test]
    fn ambiguous_exact_registration_rejected_at_build_time() {
        let err = RouteTable::build(vec![
            entry("a", "/dup", &["GET"]),
            entry("b", "/dup", &["GET"]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn ambiguous_wildcard_registration_rejected_at_build_time() {
        let err = RouteTable::build(vec![
            entry("a", "/files/*", &["GET"]),
            entry("b", "/files/*", &[]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn empty_method_set_matches_any_method() {
        let table = RouteTable::build(vec![entry("any", "/hook", &[])]).unwrap();
        assert!(table.resolve("POST", "/hook").is_some());
        assert!(table.resolve("DELETE", "/hook").is_some());
    }
}
