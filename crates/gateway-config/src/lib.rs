//! Declarative configuration schema for the config-driven gateway.
//!
//! These types describe the shape of the configuration tree (§6): connection
//! strings, the route catalog, API-key collections, OIDC provider settings,
//! file-store pools, and the global cache/CORS/vars/regex sections. Parsing
//! the on-disk representation (file layout, hot-reload, at-rest decryption)
//! is an external collaborator — this crate only defines what a fully
//! resolved, decrypted configuration tree looks like once loaded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[cfg(feature = "schema")]
use schemars::JsonSchema;

/// The root configuration tree, as seen after file-layout resolution,
/// env-override application, and at-rest decryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct GatewayConfig {
    #[serde(default, rename = "ConnectionStrings")]
    pub connection_strings: HashMap<String, ConnectionStringEntry>,
    #[serde(default)]
    pub routes: HashMap<String, RouteDefinition>,
    #[serde(default)]
    pub api_keys_collections: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub authorize: AuthorizeSection,
    #[serde(default)]
    pub file_management: FileManagementSection,
    #[serde(default)]
    pub cache: GlobalCachePolicy,
    #[serde(default)]
    pub cors: GlobalCorsPolicy,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(default)]
    pub regex: RegexOverrides,
    /// `An additional, free-form top-level "generic_error_message" /
    /// "debug_header_name" pair, per §7's configurable customer-facing
    /// message behavior.
    #[serde(default)]
    pub errors: ErrorPresentationSection,
}

/// A database provider a connection string may target. Only the drivers
/// actually available (`postgres`, `mysql`, `sqlite`) can be *used*; the
/// other variants are accepted in configuration (per §6's documented
/// provider set) but resolving a route against one fails at connection
/// time with a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum DbProvider {
    Sqlserver,
    Postgres,
    Mysql,
    Sqlite,
    Oracle,
    Db2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct ConnectionStringEntry {
    pub provider: Option<DbProvider>,
    pub value: String,
}

/// `service_type` discriminant (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    DbQuery,
    ApiGateway,
}

/// `response_structure` discriminant (§3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum ResponseStructure {
    Auto,
    Single,
    Array,
    File,
}

impl Default for ResponseStructure {
    fn default() -> Self {
        Self::Auto
    }
}

fn default_success_status() -> u16 {
    200
}

fn default_connection_string_name() -> String {
    "default".to_string()
}

/// One query in a route's chain (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct QueryDefinitionConfig {
    pub index: u32,
    pub is_last_in_chain: bool,
    pub sql_text: String,
    #[serde(default = "default_connection_string_name")]
    pub connection_string_name: String,
    #[serde(default = "default_json_variable_name")]
    pub json_variable_name: String,
}

fn default_json_variable_name() -> String {
    "json".to_string()
}

/// Proxy-target settings for `service_type = api_gateway` (§4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct ProxyTargetConfig {
    pub url: String,
    #[serde(default)]
    pub excluded_headers: Vec<String>,
    #[serde(default)]
    pub header_overrides: HashMap<String, String>,
    #[serde(default)]
    pub ignore_certificate_errors: bool,
    #[serde(default = "default_target_timeout_seconds")]
    pub target_timeout_seconds: u64,
    #[serde(default)]
    pub exclude_status_codes_from_cache: Vec<u16>,
}

fn default_target_timeout_seconds() -> u64 {
    30
}

/// A named OIDC provider's settings (§4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct OidcProviderConfig {
    pub authority: Option<String>,
    pub audience: Option<String>,
    pub issuer: Option<String>,
    #[serde(default = "default_true")]
    pub validate_issuer: bool,
    #[serde(default = "default_true")]
    pub validate_audience: bool,
    #[serde(default = "default_true")]
    pub validate_lifetime: bool,
    #[serde(default)]
    pub clock_skew_seconds: u64,
    #[serde(default)]
    pub userinfo_fallback_claims: Vec<String>,
    pub userinfo_cache_duration_seconds: Option<u64>,
    #[serde(default = "default_userinfo_timeout_seconds")]
    pub userinfo_timeout_seconds: u64,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub required_roles: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_userinfo_timeout_seconds() -> u64 {
    5
}

/// Per-route auth policy: which named provider (if any) applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct AuthPolicyConfig {
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct AuthorizeSection {
    #[serde(default)]
    pub providers: HashMap<String, OidcProviderConfig>,
}

/// CORS policy (§4.3), resolvable per-route → global → permissive default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct CorsPolicyConfig {
    pub origin_regex: String,
    pub fallback_origin: String,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
}

fn default_cors_max_age() -> u64 {
    600
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct GlobalCorsPolicy {
    pub default: Option<CorsPolicyConfig>,
}

/// Cache policy: TTL plus the invalidator parameter names contributing to
/// the cache key (§3, §4.8, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct CachePolicyConfig {
    pub duration_seconds: u64,
    #[serde(default)]
    pub invalidator_names: Vec<String>,
    #[serde(default = "default_max_invalidator_value_len")]
    pub max_invalidator_value_length: usize,
}

fn default_max_invalidator_value_len() -> usize {
    256
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct GlobalCachePolicy {
    pub default: Option<CachePolicyConfig>,
}

/// File-upload validation policy, resolved route → global (§4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct FileManagementPolicyConfig {
    pub files_data_field: Option<String>,
    pub permitted_extensions: Option<Vec<String>>,
    pub max_file_size_in_bytes: Option<u64>,
    pub max_number_of_files: Option<usize>,
    pub relative_path_template: Option<String>,
    pub allow_caller_supplied_id: Option<bool>,
    pub enable_query_consumption: Option<bool>,
}

/// One named local or SFTP destination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileStoreConfig {
    Local { base_path: String },
    Sftp { host: String, port: u16, username: String, password: String, base_path: String },
}

/// The global `file_management` section: shared settings plus the two
/// store pools (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct FileManagementSection {
    #[serde(default)]
    pub stores: HashMap<String, FileStoreConfig>,
    #[serde(default)]
    pub default_policy: FileManagementPolicyConfig,
    /// Global fallback for §4.11 when a route declares no `file_commit_policy`
    /// of its own.
    pub default_commit_policy: Option<FileCommitPolicyConfig>,
}

/// Per-route file-commit policy (§4.11).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct FileCommitPolicyConfig {
    pub stores: Vec<String>,
    #[serde(default)]
    pub overwrite_existing_files: bool,
    #[serde(default)]
    pub optional_stores: Vec<String>,
}

/// Per-route or global override of one of the seven source patterns
/// (§4.6). Absent fields fall back to the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct RegexOverrides {
    pub json: Option<String>,
    pub header: Option<String>,
    pub query_string: Option<String>,
    pub route: Option<String>,
    pub form: Option<String>,
    pub auth: Option<String>,
    pub settings: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct ErrorPresentationSection {
    #[serde(default = "default_generic_error_message")]
    pub generic_error_message: String,
    pub debug_header_name: Option<String>,
}

fn default_generic_error_message() -> String {
    "An unexpected error occurred".to_string()
}

/// One route definition (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct RouteDefinition {
    pub path: String,
    #[serde(default)]
    pub methods: Vec<String>,
    pub service_type: ServiceType,
    #[serde(default = "default_connection_string_name")]
    pub connection_string_name: String,
    #[serde(default)]
    pub mandatory_parameter_names: Vec<String>,
    #[serde(default = "default_success_status")]
    pub success_status_code: u16,
    #[serde(default)]
    pub response_structure: ResponseStructure,
    pub count_query: Option<QueryDefinitionConfig>,
    pub cache_policy: Option<CachePolicyConfig>,
    pub cors_policy: Option<CorsPolicyConfig>,
    pub auth_policy: Option<AuthPolicyConfig>,
    #[serde(default)]
    pub api_key_collections: Vec<String>,
    pub file_management_policy: Option<FileManagementPolicyConfig>,
    pub file_commit_policy: Option<FileCommitPolicyConfig>,
    #[serde(default)]
    pub query_definitions: Vec<QueryDefinitionConfig>,
    pub proxy_target: Option<ProxyTargetConfig>,
}

impl RouteDefinition {
    /// The invariant from §3: `response_structure=file` cannot be combined
    /// with a `count_query`.
    pub fn validate(&self) -> Result<(), String> {
        if matches!(self.response_structure, ResponseStructure::File) && self.count_query.is_some()
        {
            return Err(format!(
                "route declares response_structure=file together with a count_query, which is mutually exclusive"
            ));
        }
        match self.service_type {
            ServiceType::DbQuery if self.query_definitions.is_empty() => {
                Err("db_query route must declare at least one query_definition".to_string())
            }
            ServiceType::ApiGateway if self.proxy_target.is_none() => {
                Err("api_gateway route must declare a proxy_target".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_structure_rejects_count_query() {
        let route = RouteDefinition {
            path: "/x".to_string(),
            methods: vec![],
            service_type: ServiceType::DbQuery,
            connection_string_name: "default".to_string(),
            mandatory_parameter_names: vec![],
            success_status_code: 200,
            response_structure: ResponseStructure::File,
            count_query: Some(QueryDefinitionConfig {
                index: 0,
                is_last_in_chain: true,
                sql_text: "SELECT 1".to_string(),
                connection_string_name: "default".to_string(),
                json_variable_name: "json".to_string(),
            }),
            cache_policy: None,
            cors_policy: None,
            auth_policy: None,
            api_key_collections: vec![],
            file_management_policy: None,
            file_commit_policy: None,
            query_definitions: vec![QueryDefinitionConfig {
                index: 0,
                is_last_in_chain: true,
                sql_text: "SELECT 1".to_string(),
                connection_string_name: "default".to_string(),
                json_variable_name: "json".to_string(),
            }],
            proxy_target: None,
        };
        assert!(route.validate().is_err());
    }

    #[test]
    fn deserializes_minimal_config_from_yaml() {
        let yaml = r#"
routes:
  hello_world:
    path: /hello_world
    service_type: db_query
    query_definitions:
      - index: 0
        is_last_in_chain: true
        sql_text: "SELECT 'hello '+{{name}} AS message_from_db;"
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        let route = config.routes.get("hello_world").unwrap();
        assert_eq!(route.path, "/hello_world");
        assert_eq!(route.connection_string_name, "default");
        assert_eq!(route.response_structure, ResponseStructure::Auto);
    }
}
