//! SQL query-chain execution: per-connection driver factory, marker
//! lowering to bound parameters, and threading one query's result set into
//! the next query's parameter space.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
#[cfg(feature = "database")]
use sqlx::any::AnyPoolOptions;
#[cfg(feature = "database")]
use sqlx::AnyPool;

use crate::error::{Error, Result};
use crate::param_bundle::ParameterBundle;

/// Process-wide count of currently-open gateway connections, incremented on
/// create and decremented on dispose. Exposed for diagnostics; the
/// invariant this backs is "every request that opens a connection disposes
/// it" (net delta zero once the request completes).
pub static OPEN_CONNECTION_COUNT: AtomicI64 = AtomicI64::new(0);

/// A guard returned by the connection factory. Decrements
/// [`OPEN_CONNECTION_COUNT`] on drop, regardless of how the scope exits.
pub struct TrackedConnection {
    #[cfg(feature = "database")]
    pub pool: AnyPool,
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        OPEN_CONNECTION_COUNT.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Memoizes the driver/provider resolved for each connection-string name so
/// repeated queries against the same name reuse one pool.
#[derive(Default)]
pub struct ConnectionFactory {
    pools: DashMap<String, Arc<TrackedConnectionPool>>,
}

#[cfg(feature = "database")]
struct TrackedConnectionPool {
    pool: AnyPool,
}

#[cfg(not(feature = "database"))]
struct TrackedConnectionPool;

impl ConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infer the sqlx driver scheme from a connection-string's shape when no
    /// explicit provider is configured, per spec §6's auto-detection rule.
    pub fn infer_provider(connection_string: &str) -> Result<&'static str> {
        let lower = connection_string.to_ascii_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Ok("postgres")
        } else if lower.starts_with("mysql://") {
            Ok("mysql")
        } else if lower.starts_with("sqlite://") || lower.ends_with(".db") || lower.ends_with(".sqlite")
        {
            Ok("sqlite")
        } else {
            Err(Error::config(format!(
                "cannot infer a supported database provider from connection string '{connection_string}'"
            )))
        }
    }

    #[cfg(feature = "database")]
    pub async fn acquire(
        &self,
        connection_string_name: &str,
        connection_string: &str,
    ) -> Result<TrackedConnection> {
        Self::infer_provider(connection_string)?;

        let pool = if let Some(existing) = self.pools.get(connection_string_name) {
            existing.pool.clone()
        } else {
            let pool = AnyPoolOptions::new()
                .max_connections(10)
                .connect(connection_string)
                .await
                .map_err(|e| Error::database(e.to_string(), 500))?;
            self.pools
                .insert(connection_string_name.to_string(), Arc::new(TrackedConnectionPool { pool: pool.clone() }));
            pool
        };

        OPEN_CONNECTION_COUNT.fetch_add(1, Ordering::SeqCst);
        Ok(TrackedConnection { pool })
    }
}

/// One query in a chain, in declaration order.
#[derive(Debug, Clone)]
pub struct QueryDefinition {
    pub index: u32,
    pub is_last_in_chain: bool,
    pub sql_text: String,
    pub connection_string_name: String,
    pub json_variable_name: String,
}

impl Default for QueryDefinition {
    fn default() -> Self {
        Self {
            index: 0,
            is_last_in_chain: true,
            sql_text: String::new(),
            connection_string_name: "default".to_string(),
            json_variable_name: "json".to_string(),
        }
    }
}

/// A lowered marker found in SQL text: the optional source prefix (`None`
/// for the generic `{{...}}` form) and the parameter name it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub prefix: Option<String>,
    pub name: String,
    pub full_match: String,
}

static MARKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(?P<prefix>[a-zA-Z]+)?\{(?P<name>[^{}]*?)\}\}").unwrap());

/// Scan SQL text for every `{prefix{name}}` / `{{name}}` marker.
pub fn scan_markers(sql: &str) -> Vec<Marker> {
    MARKER_PATTERN
        .captures_iter(sql)
        .map(|c| Marker {
            prefix: c.name("prefix").map(|m| m.as_str().to_string()),
            name: c.name("name").map(|m| m.as_str().to_string()).unwrap_or_default(),
            full_match: c.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
        .collect()
}

/// A single query's result set, after column extraction.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub rows: Vec<HashMap<String, Value>>,
}

impl RowSet {
    pub fn is_single_row(&self) -> bool {
        self.rows.len() == 1
    }

    /// Rows as a JSON array, used when threading a multi-row (or
    /// zero-row) result into the next query's `json_variable_name`.
    pub fn as_json_array(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
                .collect(),
        )
    }
}

/// Threads query `n`'s result into query `n+1`'s named-parameter space,
/// per the single-row vs multi-row rule. Returns the (name -> value) pairs
/// to make resolvable as bound parameters for the next query, plus, for the
/// multi-row case, the JSON-array binding under the receiving query's
/// `json_variable_name`.
pub fn thread_result_forward(
    prior: &RowSet,
    next_json_variable_name: &str,
) -> HashMap<String, Value> {
    let mut carried = HashMap::new();
    if prior.is_single_row() {
        if let Some(row) = prior.rows.first() {
            for (col, val) in row {
                carried.insert(col.clone(), val.clone());
            }
        }
    } else {
        carried.insert(next_json_variable_name.to_string(), prior.as_json_array());
    }
    carried
}

/// Resolves a [`Marker`] against the running parameter bundle plus any
/// values threaded forward from earlier queries in the chain. Earlier
/// queries' carried values never overwrite each other: each is kept under
/// its own name.
pub fn resolve_marker(
    marker: &Marker,
    bundle: &ParameterBundle,
    carried: &HashMap<String, Value>,
) -> Option<Value> {
    if let Some(value) = carried.get(&marker.name) {
        return Some(value.clone());
    }
    bundle
        .resolve(marker.prefix.as_deref(), &marker.name)
        .map(|v| match v {
            crate::param_bundle::ParamValue::String(s) => Value::String(s),
            crate::param_bundle::ParamValue::Number(n) => Value::Number(n),
            crate::param_bundle::ParamValue::Bool(b) => Value::Bool(b),
            crate::param_bundle::ParamValue::Null => Value::Null,
        })
}

/// Scan `sql` using every group's own pattern (each group may carry an
/// operator-configured override per §4.6, falling back to the per-source
/// default otherwise), returning each match's byte span alongside the
/// [`Marker`] it names. The shared generic `{{name}}` alternative matches
/// under several sources' default patterns at once; matches are merged by
/// byte span so each occurrence in the text is only lowered once.
fn scan_bundle_markers(sql: &str, bundle: &ParameterBundle) -> Vec<(usize, usize, Marker)> {
    let mut found: Vec<(usize, usize, Marker)> = Vec::new();
    for group in bundle.groups() {
        for caps in group.pattern.captures_iter(sql) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            let open = caps.name("open").map(|m| m.as_str()).unwrap_or("");
            let name = caps
                .name("param")
                .or_else(|| caps.name("name"))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            // The bare `{{...}}` form always resolves generically, last
            // group wins; anything else is this group's own namespace,
            // regardless of what literal prefix its pattern captured.
            let prefix = if open == "{{" {
                None
            } else {
                group.source.own_marker_names().first().map(|s| s.to_string())
            };
            found.push((whole.start(), whole.end(), Marker { prefix, name, full_match: whole.as_str().to_string() }));
        }
    }
    found.sort_by_key(|(start, end, _)| (*start, *end));
    found.dedup_by_key(|(start, end, _)| (*start, *end));
    found
}

/// Lower every marker in `sql` to a driver-agnostic `?` placeholder in one
/// pass, returning the rewritten SQL text alongside the resolved bound
/// values in occurrence order. `sqlx::Any` accepts `?` uniformly and
/// rewrites it for the underlying driver, so no per-provider placeholder
/// syntax needs to be known here — this is the only place SQL text is
/// rewritten, and it never substitutes a value directly into the string.
///
/// Each group's own `pattern` (route→global→default override per §4.6) is
/// consulted here rather than a single hardcoded marker shape, so an
/// operator-configured `regex:` override actually changes what this scan
/// recognizes as a marker.
pub fn lower_markers(
    sql: &str,
    bundle: &ParameterBundle,
    carried: &HashMap<String, Value>,
) -> (String, Vec<Value>) {
    let spans = scan_bundle_markers(sql, bundle);
    let mut bound = Vec::with_capacity(spans.len());
    let mut lowered = String::with_capacity(sql.len());
    let mut cursor = 0;
    for (start, end, marker) in &spans {
        lowered.push_str(&sql[cursor..*start]);
        lowered.push('?');
        bound.push(resolve_marker(marker, bundle, carried).unwrap_or(Value::Null));
        cursor = *end;
    }
    lowered.push_str(&sql[cursor..]);
    (lowered, bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_generic_and_prefixed_markers() {
        let markers = scan_markers("SELECT 'hello '+{{name}} AS message, {j{age}} AS age_col");
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].prefix, None);
        assert_eq!(markers[0].name, "name");
        assert_eq!(markers[1].prefix.as_deref(), Some("j"));
        assert_eq!(markers[1].name, "age");
    }

    #[test]
    fn single_row_threads_named_columns() {
        let mut row = HashMap::new();
        row.insert("customer_email".to_string(), Value::String("a@x".to_string()));
        row.insert("total".to_string(), Value::from(129.99));
        let prior = RowSet { rows: vec![row] };

        let carried = thread_result_forward(&prior, "json");
        assert_eq!(carried.get("customer_email"), Some(&Value::String("a@x".to_string())));
        assert_eq!(carried.get("total"), Some(&Value::from(129.99)));
    }

    #[test]
    fn multi_row_threads_as_json_array_under_receiving_name() {
        let mut row1 = HashMap::new();
        row1.insert("id".to_string(), Value::from(1));
        let mut row2 = HashMap::new();
        row2.insert("id".to_string(), Value::from(2));
        let prior = RowSet { rows: vec![row1, row2] };

        let carried = thread_result_forward(&prior, "orders_json");
        let arr = carried.get("orders_json").unwrap();
        assert!(arr.as_array().unwrap().len() == 2);
    }

    #[test]
    fn zero_rows_threads_empty_json_array() {
        let prior = RowSet::default();
        let carried = thread_result_forward(&prior, "json");
        assert_eq!(carried.get("json"), Some(&Value::Array(vec![])));
    }

    #[test]
    fn lower_markers_replaces_every_marker_with_a_placeholder_in_order() {
        let mut bundle = ParameterBundle::new();
        bundle.push(crate::param_bundle::ParameterGroup {
            source: crate::param_bundle::Source::Route,
            pattern: crate::param_bundle::default_pattern(crate::param_bundle::Source::Route),
            data_model: crate::param_bundle::DataModel::Map(HashMap::from([(
                "id".to_string(),
                crate::param_bundle::ParamValue::Number(serde_json::Number::from(42)),
            )])),
        });

        let (lowered, bound) = lower_markers("SELECT * FROM orders WHERE id = {{id}}", &bundle, &HashMap::new());
        assert_eq!(lowered, "SELECT * FROM orders WHERE id = ?");
        assert_eq!(bound, vec![Value::from(42)]);
    }

    #[test]
    fn lower_markers_never_strands_a_brace_on_the_generic_form() {
        let mut bundle = ParameterBundle::new();
        bundle.push(crate::param_bundle::ParameterGroup {
            source: crate::param_bundle::Source::Route,
            pattern: crate::param_bundle::default_pattern(crate::param_bundle::Source::Route),
            data_model: crate::param_bundle::DataModel::Map(HashMap::from([(
                "id".to_string(),
                crate::param_bundle::ParamValue::Number(serde_json::Number::from(7)),
            )])),
        });

        let (lowered, _) = lower_markers("WHERE id = {{id}}", &bundle, &HashMap::new());
        assert_eq!(lowered, "WHERE id = ?");
        assert!(!lowered.contains('{') && !lowered.contains('}'));
    }

    #[test]
    fn lower_markers_honors_a_group_specific_regex_override() {
        // An operator override that replaces the default `{{...}}`/`{j{...}}`
        // shape entirely for the json source with a `[[...]]` form.
        let overridden =
            regex::Regex::new(r"(?P<open>\[\[)(?P<param>.*?)(?P<close>\]\])").unwrap();
        let mut bundle = ParameterBundle::new();
        bundle.push(crate::param_bundle::ParameterGroup {
            source: crate::param_bundle::Source::Json,
            pattern: overridden,
            data_model: crate::param_bundle::DataModel::Map(HashMap::from([(
                "name".to_string(),
                crate::param_bundle::ParamValue::String("Alice".to_string()),
            )])),
        });

        // The default `{{name}}` form no longer matches once overridden...
        let (lowered, bound) = lower_markers("SELECT {{name}}", &bundle, &HashMap::new());
        assert_eq!(lowered, "SELECT {{name}}");
        assert!(bound.is_empty());

        // ...but the operator's own `[[name]]` form does, and binds against
        // this group's own data model since the override's `open` text isn't
        // the generic `{{` literal.
        let (lowered, bound) = lower_markers("SELECT [[name]]", &bundle, &HashMap::new());
        assert_eq!(lowered, "SELECT ?");
        assert_eq!(bound, vec![Value::String("Alice".to_string())]);
    }

    #[test]
    fn infer_provider_recognizes_known_schemes() {
        assert_eq!(ConnectionFactory::infer_provider("postgres://x").unwrap(), "postgres");
        assert_eq!(ConnectionFactory::infer_provider("mysql://x").unwrap(), "mysql");
        assert_eq!(ConnectionFactory::infer_provider("file.sqlite").unwrap(), "sqlite");
        assert!(ConnectionFactory::infer_provider("oracle://x").is_err());
    }
}
