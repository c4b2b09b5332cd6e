//! API-Key Authorizer (§4.5): independent of JWT — when a section declares
//! key collections, `x-api-key` must match a key in their union.

use std::collections::HashSet;

use gateway_core::error::{Error, Result};

pub fn authorize_api_key(
    declared_collections: &[String],
    collections: &std::collections::HashMap<String, Vec<String>>,
    header_value: Option<&str>,
) -> Result<()> {
    if declared_collections.is_empty() {
        return Ok(());
    }

    let valid_keys: HashSet<&str> = declared_collections
        .iter()
        .filter_map(|name| collections.get(name))
        .flat_map(|keys| keys.iter().map(String::as_str))
        .collect();

    match header_value {
        Some(key) if valid_keys.contains(key) => Ok(()),
        _ => Err(Error::authentication("Missing or invalid API key")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collections() -> std::collections::HashMap<String, Vec<String>> {
        let mut map = std::collections::HashMap::new();
        map.insert("partners".to_string(), vec!["key-a".to_string(), "key-b".to_string()]);
        map.insert("internal".to_string(), vec!["key-c".to_string()]);
        map
    }

    #[test]
    fn no_declared_collections_is_a_no_op() {
        assert!(authorize_api_key(&[], &collections(), None).is_ok());
    }

    #[test]
    fn accepts_a_key_from_the_union_of_declared_collections() {
        let declared = vec!["partners".to_string(), "internal".to_string()];
        assert!(authorize_api_key(&declared, &collections(), Some("key-c")).is_ok());
    }

    #[test]
    fn rejects_missing_or_mismatched_key() {
        let declared = vec!["partners".to_string()];
        assert!(authorize_api_key(&declared, &collections(), None).is_err());
        assert!(authorize_api_key(&declared, &collections(), Some("key-c")).is_err());
    }
}
