//! Query Chain Stage (§4.9) and Response Shaping (§4.10).
//!
//! Marker scanning/lowering and result-threading live in
//! `gateway_core::query_chain`; this module runs the lowered SQL through
//! `sqlx::Any` (one pool per connection-string name, via
//! `gateway_core::query_chain::ConnectionFactory`) and shapes the final
//! row-set into a response per the route's `response_structure`.

use std::collections::HashMap;

use gateway_config::ResponseStructure;
use gateway_core::error::{Error, Result};
use gateway_core::param_bundle::ParameterBundle;
use gateway_core::query_chain::{lower_markers, thread_result_forward, QueryDefinition, RowSet};
use serde_json::Value;

/// Run every query in the chain, in declaration order, threading each
/// result into the next query's parameter space (§4.9).
#[cfg(feature = "database")]
pub async fn execute_chain(
    factory: &gateway_core::query_chain::ConnectionFactory,
    connection_strings: &HashMap<String, String>,
    queries: &[QueryDefinition],
    bundle: &ParameterBundle,
) -> Result<RowSet> {
    let mut carried: HashMap<String, Value> = HashMap::new();
    let mut last_result = RowSet::default();

    for query in queries {
        let connection_string = connection_strings
            .get(&query.connection_string_name)
            .ok_or_else(|| Error::config(format!("unknown connection string '{}'", query.connection_string_name)))?;

        let connection = factory.acquire(&query.connection_string_name, connection_string).await?;
        let (lowered_sql, bound_values) = lower_markers(&query.sql_text, bundle, &carried);
        let rows = run_sql(&connection.pool, &lowered_sql, bound_values).await?;

        carried.extend(thread_result_forward(&rows, &query.json_variable_name));
        last_result = rows;
    }

    Ok(last_result)
}

/// Run the route's `count_query`, if any, in isolation — it never
/// participates in the main chain's result-threading (§4.10).
#[cfg(feature = "database")]
pub async fn execute_count_query(
    factory: &gateway_core::query_chain::ConnectionFactory,
    connection_strings: &HashMap<String, String>,
    count_query: &QueryDefinition,
    bundle: &ParameterBundle,
) -> Result<RowSet> {
    let connection_string = connection_strings
        .get(&count_query.connection_string_name)
        .ok_or_else(|| Error::config(format!("unknown connection string '{}'", count_query.connection_string_name)))?;
    let connection = factory.acquire(&count_query.connection_string_name, connection_string).await?;
    let (lowered_sql, bound_values) = lower_markers(&count_query.sql_text, bundle, &HashMap::new());
    run_sql(&connection.pool, &lowered_sql, bound_values).await
}

#[cfg(feature = "database")]
async fn run_sql(pool: &sqlx::AnyPool, sql: &str, bound_values: Vec<Value>) -> Result<RowSet> {
    use sqlx::{Column, Row};

    let mut query = sqlx::query(sql);
    for value in bound_values {
        query = bind_value(query, value);
    }

    let rows = query.fetch_all(pool).await.map_err(|e| Error::database(e.to_string(), 500))?;

    let mut result = RowSet::default();
    for row in &rows {
        let mut record = HashMap::new();
        for (idx, column) in row.columns().iter().enumerate() {
            record.insert(column.name().to_string(), any_column_value(row, idx));
        }
        result.rows.push(record);
    }
    Ok(result)
}

#[cfg(feature = "database")]
fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s),
        other => query.bind(other.to_string()),
    }
}

#[cfg(feature = "database")]
fn any_column_value(row: &sqlx::any::AnyRow, idx: usize) -> Value {
    use sqlx::Row;

    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::from(v);
    }
    Value::Null
}

/// The shaped terminal body, distinct from its HTTP framing (§4.10).
pub enum ShapedBody {
    /// A JSON value to serialize as the response body.
    Json(Value),
    /// A file response: the first row described a file via one of the
    /// three sources (§4.10's `file` structure), resolved by the caller.
    File { row: HashMap<String, Value> },
}

/// Shape the final row-set per `response_structure`, or per the
/// `count_query` override when present (§4.10: count mode ignores
/// `response_structure` entirely).
pub fn shape_response(
    final_rows: &RowSet,
    count_rows: Option<&RowSet>,
    response_structure: ResponseStructure,
) -> ShapedBody {
    if let Some(count_rows) = count_rows {
        let count = count_rows
            .rows
            .first()
            .and_then(|row| row.values().next())
            .cloned()
            .unwrap_or(Value::Null);
        return ShapedBody::Json(serde_json::json!({ "count": count, "data": final_rows.as_json_array() }));
    }

    match response_structure {
        ResponseStructure::Array => ShapedBody::Json(final_rows.as_json_array()),
        ResponseStructure::Single => {
            let value = final_rows
                .rows
                .first()
                .map(|row| Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
                .unwrap_or(Value::Null);
            ShapedBody::Json(value)
        }
        ResponseStructure::Auto => {
            if final_rows.is_single_row() {
                let row = final_rows.rows.first().expect("is_single_row implies one row");
                ShapedBody::Json(Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
            } else {
                ShapedBody::Json(final_rows.as_json_array())
            }
        }
        ResponseStructure::File => match final_rows.rows.first() {
            Some(row) => ShapedBody::File { row: row.clone() },
            None => ShapedBody::Json(Value::Null),
        },
    }
}

/// The three sources a `file` row may describe a file through, checked in
/// priority order (§4.10).
pub enum FileSource {
    Base64Content(String),
    RelativePath(String),
    Http(String),
}

pub fn resolve_file_source(row: &HashMap<String, Value>) -> Result<(FileSource, Option<String>)> {
    let content_type = row.get("content_type").and_then(Value::as_str).map(str::to_string);

    if let Some(content) = row.get("base64_content").and_then(Value::as_str) {
        return Ok((FileSource::Base64Content(content.to_string()), content_type));
    }
    if let Some(path) = row.get("relative_path").and_then(Value::as_str) {
        return Ok((FileSource::RelativePath(path.to_string()), content_type));
    }
    if let Some(url) = row.get("http").and_then(Value::as_str) {
        return Ok((FileSource::Http(url.to_string()), content_type));
    }
    Err(Error::config("file-structured response row has none of base64_content, relative_path, or http"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rowset(rows: Vec<HashMap<String, Value>>) -> RowSet {
        RowSet { rows }
    }

    #[test]
    fn auto_structure_is_object_for_single_row() {
        let mut row = HashMap::new();
        row.insert("id".to_string(), Value::from(1));
        let shaped = shape_response(&rowset(vec![row]), None, ResponseStructure::Auto);
        assert!(matches!(shaped, ShapedBody::Json(Value::Object(_))));
    }

    #[test]
    fn auto_structure_is_array_for_zero_or_many_rows() {
        let shaped = shape_response(&rowset(vec![]), None, ResponseStructure::Auto);
        assert!(matches!(shaped, ShapedBody::Json(Value::Array(_))));
    }

    #[test]
    fn count_query_presence_ignores_response_structure() {
        let mut row = HashMap::new();
        row.insert("total".to_string(), Value::from(7));
        let count = rowset(vec![row]);
        let data = rowset(vec![]);

        let shaped = shape_response(&data, Some(&count), ResponseStructure::Single);
        match shaped {
            ShapedBody::Json(value) => {
                assert_eq!(value["count"], Value::from(7));
                assert_eq!(value["data"], Value::Array(vec![]));
            }
            ShapedBody::File { .. } => panic!("expected json"),
        }
    }

    #[test]
    fn file_source_priority_is_base64_then_path_then_http() {
        let mut row = HashMap::new();
        row.insert("relative_path".to_string(), Value::from("docs/a.pdf"));
        row.insert("http".to_string(), Value::from("https://example.com/a.pdf"));
        let (source, _) = resolve_file_source(&row).unwrap();
        assert!(matches!(source, FileSource::RelativePath(_)));
    }

    #[test]
    fn file_row_with_no_source_is_a_config_error() {
        let row = HashMap::new();
        assert!(resolve_file_source(&row).is_err());
    }
}
