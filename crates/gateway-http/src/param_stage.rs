//! Parameter Builder wiring (§4.6): assembles the seven-source
//! [`ParameterBundle`] in the mandated append order. Idempotent at the
//! call site — `lib.rs` only calls this once per request and stores the
//! result on the [`crate::context::RequestContext`].
//!
//! Body extraction itself (reading and buffering the axum request body,
//! detecting multipart vs url-encoded) is done by the caller in `lib.rs`,
//! which already needs the raw bytes for other reasons (streaming to a
//! proxy target, computing a cache key); this module only turns already
//! extracted source data into the bundle.

use std::collections::HashMap;

use gateway_core::error::Result;
use gateway_core::param_bundle::{
    default_pattern, join_multivalued, DataModel, ParamValue, ParameterBundle, ParameterGroup, Source,
};
use regex::Regex;
use serde_json::Value;

/// Per-source regex override strings, already resolved route → global (the
/// precedence itself is `Option::or` at the call site in `lib.rs`).
#[derive(Debug, Clone, Default)]
pub struct PatternOverrides {
    pub json: Option<String>,
    pub header: Option<String>,
    pub query_string: Option<String>,
    pub route: Option<String>,
    pub form: Option<String>,
    pub auth: Option<String>,
    pub settings: Option<String>,
}

fn pattern_for(source: Source, overrides: &PatternOverrides) -> Result<Regex> {
    let raw = match source {
        Source::Json => &overrides.json,
        Source::Header => &overrides.header,
        Source::QueryString => &overrides.query_string,
        Source::Route => &overrides.route,
        Source::Form => &overrides.form,
        Source::Auth => &overrides.auth,
        Source::Settings => &overrides.settings,
    };
    Ok(match raw {
        Some(pattern) => Regex::new(pattern)?,
        None => default_pattern(source),
    })
}

fn map_from_pairs(pairs: HashMap<String, String>) -> DataModel {
    if pairs.is_empty() {
        return DataModel::Null;
    }
    DataModel::Map(pairs.into_iter().map(|(k, v)| (k, ParamValue::String(v))).collect())
}

fn map_from_multivalued(pairs: HashMap<String, Vec<String>>) -> DataModel {
    if pairs.is_empty() {
        return DataModel::Null;
    }
    DataModel::Map(
        pairs
            .into_iter()
            .map(|(k, values)| (k, ParamValue::String(join_multivalued(&values))))
            .collect(),
    )
}

/// Build the full bundle in the mandated append order: headers, JSON body,
/// form body, query string, auth claims, route bindings, settings vars.
#[allow(clippy::too_many_arguments)]
pub fn build_parameter_bundle(
    headers: HashMap<String, String>,
    json_body: Option<Value>,
    form_body: HashMap<String, Vec<String>>,
    query_string: HashMap<String, Vec<String>>,
    auth_claims: Option<serde_json::Map<String, Value>>,
    route_bindings: HashMap<String, String>,
    settings_vars: HashMap<String, String>,
    overrides: &PatternOverrides,
) -> Result<ParameterBundle> {
    let mut bundle = ParameterBundle::new();

    bundle.push(ParameterGroup {
        source: Source::Header,
        pattern: pattern_for(Source::Header, overrides)?,
        data_model: map_from_pairs(headers),
    });

    bundle.push(ParameterGroup {
        source: Source::Json,
        pattern: pattern_for(Source::Json, overrides)?,
        data_model: match json_body {
            Some(value) => DataModel::RawJson(value.to_string()),
            None => DataModel::Null,
        },
    });

    bundle.push(ParameterGroup {
        source: Source::Form,
        pattern: pattern_for(Source::Form, overrides)?,
        data_model: map_from_multivalued(form_body),
    });

    bundle.push(ParameterGroup {
        source: Source::QueryString,
        pattern: pattern_for(Source::QueryString, overrides)?,
        data_model: map_from_multivalued(query_string),
    });

    bundle.push(ParameterGroup {
        source: Source::Auth,
        pattern: pattern_for(Source::Auth, overrides)?,
        data_model: match auth_claims {
            Some(claims) => DataModel::RawJson(Value::Object(claims).to_string()),
            None => DataModel::Null,
        },
    });

    bundle.push(ParameterGroup {
        source: Source::Route,
        pattern: pattern_for(Source::Route, overrides)?,
        data_model: map_from_pairs(route_bindings),
    });

    bundle.push(ParameterGroup {
        source: Source::Settings,
        pattern: pattern_for(Source::Settings, overrides)?,
        data_model: map_from_pairs(settings_vars),
    });

    Ok(bundle)
}
