//! Parameter resolution across the five-plus request sources.
//!
//! A [`ParameterBundle`] is an ordered sequence of [`ParameterGroup`]s, one
//! per source, each carrying its own marker pattern. Later groups win for
//! the generic `{{...}}` marker; source-specific markers (`{j{...}}`,
//! `{qs{...}}`, ...) only ever bind to their own group. Every source is
//! always appended — with a `null` data model when the source produced
//! nothing — so an unresolved marker of that source binds to SQL null
//! instead of surviving as literal text.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// A value a parameter resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

impl ParamValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::String(s.clone()),
            Value::Number(n) => Self::Number(n.clone()),
            Value::Bool(b) => Self::Bool(*b),
            _ => Self::Null,
        }
    }
}

/// The data carried by one parameter group.
#[derive(Debug, Clone)]
pub enum DataModel {
    /// A flat mapping from key to value.
    Map(HashMap<String, ParamValue>),
    /// Raw JSON text; object fields supply keys lazily.
    RawJson(String),
    /// No data; the group still contributes its pattern.
    Null,
}

impl DataModel {
    fn get(&self, key: &str) -> Option<ParamValue> {
        match self {
            Self::Map(map) => map.get(key).cloned(),
            Self::RawJson(text) => {
                let parsed: Value = serde_json::from_str(text).ok()?;
                let obj = parsed.as_object()?;
                obj.get(key).map(ParamValue::from_json)
            }
            Self::Null => None,
        }
    }
}

/// One `(pattern, data_model)` group in the bundle, named after its source.
#[derive(Debug, Clone)]
pub struct ParameterGroup {
    pub source: Source,
    pub pattern: Regex,
    pub data_model: DataModel,
}

/// The seven built-in source namespaces, in the spec's append order
/// (headers first, settings last — later groups win ties on the generic
/// pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Header,
    Json,
    Form,
    QueryString,
    Auth,
    Route,
    Settings,
}

impl Source {
    /// The append order mandated by the parameter-builder contract.
    pub const ORDER: [Source; 7] = [
        Source::Header,
        Source::Json,
        Source::Form,
        Source::QueryString,
        Source::Auth,
        Source::Route,
        Source::Settings,
    ];

    /// Whether `pattern_name` (as written inside `{name{...}}`) belongs to
    /// this source's own namespace (as opposed to only the generic one).
    fn own_marker_names(self) -> &'static [&'static str] {
        match self {
            Source::Header => &["h"],
            Source::Json => &["j"],
            Source::Form => &["f"],
            Source::QueryString => &["qs"],
            Source::Auth => &["auth"],
            Source::Route => &["r"],
            Source::Settings => &["s", "settings"],
        }
    }
}

/// Default regex literals, one per source, as specified. All but `auth` and
/// `settings` also accept the bare generic `{{...}}` form.
pub fn default_pattern(source: Source) -> Regex {
    static JSON: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<open>\{\{|\{j\{)(?P<param>.*?)(?P<close>\}\})").unwrap());
    static HEADER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<open>\{\{|\{h\{)(?P<param>.*?)(?P<close>\}\})").unwrap());
    static QS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<open>\{\{|\{qs\{)(?P<param>.*?)(?P<close>\}\})").unwrap());
    static ROUTE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<open>\{\{|\{r\{)(?P<param>.*?)(?P<close>\}\})").unwrap());
    static FORM: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<open>\{\{|\{f\{)(?P<param>.*?)(?P<close>\}\})").unwrap());
    static AUTH: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<open>\{auth\{)(?P<param>.*?)(?P<close>\}\})").unwrap());
    static SETTINGS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<open>\{s\{|\{settings\{)(?P<param>.*?)(?P<close>\}\})").unwrap());

    match source {
        Source::Json => JSON.clone(),
        Source::Header => HEADER.clone(),
        Source::QueryString => QS.clone(),
        Source::Route => ROUTE.clone(),
        Source::Form => FORM.clone(),
        Source::Auth => AUTH.clone(),
        Source::Settings => SETTINGS.clone(),
    }
}

/// The full, ordered bundle for one request.
#[derive(Debug, Clone, Default)]
pub struct ParameterBundle {
    groups: Vec<ParameterGroup>,
}

impl ParameterBundle {
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// Append a group. Call sites must follow [`Source::ORDER`] so that
    /// later-added groups correctly take priority on the generic pattern.
    pub fn push(&mut self, group: ParameterGroup) {
        self.groups.push(group);
    }

    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    /// Resolve a marker of the form `prefix{name}` against this bundle: the
    /// generic pattern binds against the *last* group (by append order)
    /// whose data model contains `name`; a source-specific prefix only
    /// considers that source's own group(s). Returns `None` (-> SQL null)
    /// when unresolved.
    pub fn resolve(&self, prefix: Option<&str>, name: &str) -> Option<ParamValue> {
        match prefix {
            None => {
                // Generic `{{name}}`: later groups override earlier ones.
                self.groups.iter().rev().find_map(|g| g.data_model.get(name))
            }
            Some(prefix) => self
                .groups
                .iter()
                .rev()
                .filter(|g| g.source.own_marker_names().contains(&prefix))
                .find_map(|g| g.data_model.get(name)),
        }
    }
}

/// Multi-valued query-string/form values are pipe-joined per the spec's
/// multi-value rule.
pub fn join_multivalued(values: &[String]) -> String {
    values.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_group(source: Source, pairs: &[(&str, &str)]) -> ParameterGroup {
        let mut map = HashMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), ParamValue::String(v.to_string()));
        }
        ParameterGroup { source, pattern: default_pattern(source), data_model: DataModel::Map(map) }
    }

    #[test]
    fn later_group_wins_generic_pattern() {
        let mut bundle = ParameterBundle::new();
        bundle.push(map_group(Source::Header, &[("name", "from-header")]));
        bundle.push(map_group(Source::Route, &[("name", "from-route")]));

        assert_eq!(
            bundle.resolve(None, "name"),
            Some(ParamValue::String("from-route".to_string()))
        );
    }

    #[test]
    fn source_specific_marker_only_binds_its_own_group() {
        let mut bundle = ParameterBundle::new();
        bundle.push(map_group(Source::Header, &[("name", "from-header")]));
        bundle.push(map_group(Source::Route, &[("name", "from-route")]));

        assert_eq!(
            bundle.resolve(Some("h"), "name"),
            Some(ParamValue::String("from-header".to_string()))
        );
    }

    #[test]
    fn unresolved_marker_is_none() {
        let bundle = ParameterBundle::new();
        assert_eq!(bundle.resolve(None, "missing"), None);
    }

    #[test]
    fn null_data_model_still_contributes_pattern() {
        let group = ParameterGroup {
            source: Source::Form,
            pattern: default_pattern(Source::Form),
            data_model: DataModel::Null,
        };
        let mut bundle = ParameterBundle::new();
        bundle.push(group);
        assert_eq!(bundle.resolve(Some("f"), "anything"), None);
    }

    #[test]
    fn multivalued_join_uses_pipe() {
        assert_eq!(
            join_multivalued(&["a".to_string(), "b".to_string()]),
            "a|b"
        );
    }

    #[test]
    fn raw_json_data_model_resolves_object_fields() {
        let group = ParameterGroup {
            source: Source::Json,
            pattern: default_pattern(Source::Json),
            data_model: DataModel::RawJson(r#"{"name":"Alice"}"#.to_string()),
        };
        let mut bundle = ParameterBundle::new();
        bundle.push(group);
        assert_eq!(
            bundle.resolve(Some("j"), "name"),
            Some(ParamValue::String("Alice".to_string()))
        );
    }
}
