//! Mandatory-Fields Check: a route may declare `mandatory_parameter_names`
//! that must resolve to a non-null value in the parameter bundle before the
//! terminal stage runs. Missing ones are a validation error (§7: 400).

use gateway_core::error::{Error, Result};
use gateway_core::param_bundle::ParameterBundle;

pub fn check_mandatory_parameters(bundle: &ParameterBundle, mandatory: &[String]) -> Result<()> {
    let missing: Vec<&str> = mandatory
        .iter()
        .filter(|name| bundle.resolve(None, name).is_none())
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(format!("missing required parameter(s): {}", missing.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::param_bundle::{default_pattern, DataModel, ParamValue, ParameterGroup, Source};
    use std::collections::HashMap;

    fn bundle_with(pairs: &[(&str, &str)]) -> ParameterBundle {
        let mut map = HashMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), ParamValue::String(v.to_string()));
        }
        let mut bundle = ParameterBundle::new();
        bundle.push(ParameterGroup { source: Source::Route, pattern: default_pattern(Source::Route), data_model: DataModel::Map(map) });
        bundle
    }

    #[test]
    fn passes_when_all_mandatory_fields_resolve() {
        let bundle = bundle_with(&[("customer_id", "42")]);
        assert!(check_mandatory_parameters(&bundle, &["customer_id".to_string()]).is_ok());
    }

    #[test]
    fn fails_when_a_mandatory_field_is_missing() {
        let bundle = bundle_with(&[("customer_id", "42")]);
        let err = check_mandatory_parameters(&bundle, &["customer_id".to_string(), "order_id".to_string()])
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
