//! # gateway-http
//!
//! The HTTP surface of the config-driven gateway: resolves every inbound
//! request against the configured route catalog and runs it through the
//! ten-stage pipeline (§4) — route resolution, service-type
//! classification, CORS, JWT authorization, API-key authorization,
//! parameter building, mandatory-field checks, file-upload staging,
//! terminal dispatch (proxy or query chain), and file-store commit.
//!
//! Each stage lives in its own module; this crate's only job is to wire
//! them together in the mandated order and translate the result into an
//! `axum` response.

pub mod api_key;
pub mod auth;
pub mod classifier;
pub mod cors;
pub mod file_commit_stage;
pub mod file_upload_stage;
pub mod mandatory_fields;
pub mod param_stage;
pub mod proxy_stage;
pub mod query_stage;
pub mod state;

use std::collections::HashMap;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use gateway_config::{GatewayConfig, RouteDefinition, ServiceType};
use gateway_core::cache::derive_cache_key;
use gateway_core::error::{Error, Result};
use gateway_core::file_stage::{FileValidationPolicy, TempFileTracker};
use gateway_core::file_store::FileCommitPolicy;
use gateway_core::route_resolver::{RouteEntry, RouteTable};
use serde_json::Value;

use classifier::ContentKind;
use cors::CorsDecision;
use file_upload_stage::{FileUploadPolicy, IncomingFileEntry, IncomingFilePayload};
use param_stage::PatternOverrides;
use query_stage::ShapedBody;
use state::AppState;

/// Build the process's one `axum::Router`: every route is resolved at
/// request time against the config-driven table, so the router itself is
/// just a catch-all fallback.
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(any(dispatch)).with_state(state)
}

/// Build the route table from the parsed config (§4.1). Route IDs are the
/// map keys in `config.routes`.
pub fn build_route_table(config: &GatewayConfig) -> Result<RouteTable> {
    let entries = config
        .routes
        .iter()
        .map(|(route_id, route)| RouteEntry {
            route_id: route_id.clone(),
            path: route.path.clone(),
            methods: route.methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
        })
        .collect();
    RouteTable::build(entries)
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    match run_pipeline(&state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn run_pipeline(state: &AppState, request: Request) -> Result<Response> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();

    // Stage 1: Route Resolver (§4.1).
    let resolved = state
        .routes
        .resolve(method.as_str(), uri.path())
        .ok_or_else(|| Error::routing(format!("no route matches {method} {}", uri.path())))?;
    let route_id = resolved.route.route_id.clone();
    let remaining_path = resolved.remaining_path.clone();
    let route = state
        .config
        .routes
        .get(&route_id)
        .ok_or_else(|| Error::config(format!("route '{route_id}' resolved but is absent from config")))?;

    // Stage 2: Service-Type Classifier (§4.2).
    let service_type = classifier::require_service_type(Some(route.service_type))?;

    // Stage 3: CORS (§4.3).
    let cors_policy = route
        .cors_policy
        .clone()
        .or_else(|| state.config.cors.default.clone())
        .unwrap_or_else(cors::permissive_default);
    let origin_header = header_value(&headers, "origin");
    let cors_decision = cors::decide(&cors_policy, origin_header.as_deref(), route.auth_policy.is_some());

    if method == Method::OPTIONS {
        return Ok(preflight_response(&cors_decision, route));
    }

    // Stage 4: JWT Authorizer (§4.4).
    let mut auth_claims: Option<serde_json::Map<String, Value>> = None;
    if let Some(auth_policy) = &route.auth_policy {
        let provider_name = auth_policy
            .provider
            .as_deref()
            .ok_or_else(|| Error::config(format!("route '{route_id}' has an auth_policy with no provider")))?;
        let provider = state
            .config
            .authorize
            .providers
            .get(provider_name)
            .ok_or_else(|| Error::config(format!("unknown auth provider '{provider_name}'")))?;

        let authorization_header = header_value(&headers, "authorization");
        let identity = auth::authenticate(
            &state.discovery_cache,
            &state.userinfo_cache,
            provider,
            authorization_header.as_deref(),
        )
        .await?;
        auth_claims = Some(identity.claims);
    }

    // Stage 5: API-Key Authorizer (§4.5).
    let api_key_header = header_value(&headers, "x-api-key");
    api_key::authorize_api_key(&route.api_key_collections, &state.config.api_keys_collections, api_key_header.as_deref())?;

    // Read and classify the body.
    let content_kind = classifier::classify_content_type(header_value(&headers, "content-type").as_deref());
    let (json_body, form_body, file_entries, raw_body) = extract_body(content_kind, request, route).await?;

    // Stage 6: Parameter Builder (§4.6).
    let headers_map = header_map_to_single_valued(&headers);
    let query_string = query_pairs(uri.query());
    let route_bindings = remaining_path
        .as_ref()
        .map(|remaining| HashMap::from([("remaining_path".to_string(), remaining.clone())]))
        .unwrap_or_default();
    let overrides = pattern_overrides(&state.config.regex);

    let bundle = param_stage::build_parameter_bundle(
        headers_map,
        json_body,
        form_body,
        query_string,
        auth_claims,
        route_bindings,
        state.config.vars.clone(),
        &overrides,
    )?;

    // Stage 7: Mandatory-Fields Check (§4.6 final step).
    mandatory_fields::check_mandatory_parameters(&bundle, &route.mandatory_parameter_names)?;

    // Stage 8: File-Upload Stager (§4.7).
    let tracker = TempFileTracker::new();
    if let Some(policy) = file_upload_policy(state, route) {
        let temp_dir = std::env::temp_dir();
        let store_base_path = std::env::temp_dir();
        file_upload_stage::stage_files(&policy, &temp_dir, &store_base_path, &tracker, file_entries).await?;
    }

    // Stage 9: Terminal Dispatcher.
    let response = match service_type {
        ServiceType::ApiGateway => {
            dispatch_proxy(
                state,
                &route_id,
                route,
                method.as_str(),
                &bundle,
                remaining_path.as_deref(),
                uri.query(),
                &headers,
                method.clone(),
                raw_body,
            )
            .await?
        }
        ServiceType::DbQuery => dispatch_query(state, route, &bundle).await?,
    };

    // Stage 10: File-Store Committer (§4.11).
    if let Some(policy) = file_commit_policy(state, route) {
        file_commit_stage::commit(&state.store_pool, &policy, &tracker).await?;
    } else {
        tracker.cleanup().await;
    }

    Ok(apply_cors_headers(response, &cors_decision))
}

async fn extract_body(
    content_kind: ContentKind,
    request: Request,
    route: &RouteDefinition,
) -> Result<(Option<Value>, HashMap<String, Vec<String>>, Vec<IncomingFileEntry>, Bytes)> {
    match content_kind {
        ContentKind::Json => {
            let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .map_err(|e| Error::validation(format!("failed reading request body: {e}")))?;
            let json_body = if bytes.is_empty() {
                None
            } else {
                Some(serde_json::from_slice(&bytes).map_err(|e| Error::validation(format!("invalid JSON body: {e}")))?)
            };

            let files_field = route.file_management_policy.as_ref().and_then(|p| p.files_data_field.as_deref());
            let file_entries = match (&json_body, files_field) {
                (Some(Value::Object(obj)), Some(field)) => extract_files_from_json(obj.get(field)),
                _ => Vec::new(),
            };

            Ok((json_body, HashMap::new(), file_entries, bytes))
        }
        ContentKind::FormUrlEncoded => {
            let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .map_err(|e| Error::validation(format!("failed reading request body: {e}")))?;
            let form_body = query_pairs(Some(std::str::from_utf8(&bytes).unwrap_or_default()));
            Ok((None, form_body, Vec::new(), bytes))
        }
        ContentKind::Multipart => {
            let (form_body, file_entries) = extract_multipart(request).await?;
            Ok((None, form_body, file_entries, Bytes::new()))
        }
        ContentKind::Passthrough => {
            let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .map_err(|e| Error::validation(format!("failed reading request body: {e}")))?;
            Ok((None, HashMap::new(), Vec::new(), bytes))
        }
    }
}

fn extract_files_from_json(value: Option<&Value>) -> Vec<IncomingFileEntry> {
    let Some(Value::Array(items)) = value else { return Vec::new() };
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let file_name = obj.get("file_name").and_then(Value::as_str)?.to_string();
            let caller_supplied_id = obj.get("id").and_then(Value::as_str).map(str::to_string);
            let mime_type_hint = obj.get("mime_type").and_then(Value::as_str).map(str::to_string);
            let payload = match obj.get("base64_content").and_then(Value::as_str) {
                Some(content) => IncomingFilePayload::Base64(content.to_string()),
                None => IncomingFilePayload::NoNewContent {
                    relative_path: obj.get("relative_path").and_then(Value::as_str).unwrap_or_default().to_string(),
                    extension: obj.get("extension").and_then(Value::as_str).unwrap_or_default().to_string(),
                    mime_type: obj.get("mime_type").and_then(Value::as_str).unwrap_or_default().to_string(),
                    size: obj.get("size").and_then(Value::as_u64).unwrap_or_default(),
                },
            };
            Some(IncomingFileEntry { caller_supplied_id, file_name, mime_type_hint, payload })
        })
        .collect()
}

async fn extract_multipart(request: Request) -> Result<(HashMap<String, Vec<String>>, Vec<IncomingFileEntry>)> {
    use axum::extract::Multipart;

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| Error::validation(format!("invalid multipart body: {e}")))?;

    let mut form_fields: HashMap<String, Vec<String>> = HashMap::new();
    let mut file_entries = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("failed reading multipart field: {e}")))?
    {
        let file_name = field.file_name().map(str::to_string);
        let mime_type_hint = field.content_type().map(str::to_string);
        let field_name = field.name().unwrap_or_default().to_string();

        if let Some(file_name) = file_name {
            let bytes = field.bytes().await.map_err(|e| Error::validation(format!("failed reading file field: {e}")))?;
            let temp_path = std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), &file_name));
            tokio::fs::write(&temp_path, &bytes).await?;
            file_entries.push(IncomingFileEntry {
                caller_supplied_id: None,
                file_name,
                mime_type_hint,
                payload: IncomingFilePayload::AlreadyStaged { temp_path, size: bytes.len() as u64 },
            });
        } else {
            let text = field.text().await.map_err(|e| Error::validation(format!("failed reading form field: {e}")))?;
            form_fields.entry(field_name).or_default().push(text);
        }
    }

    Ok((form_fields, file_entries))
}

fn file_upload_policy(state: &AppState, route: &RouteDefinition) -> Option<FileUploadPolicy> {
    let global = &state.config.file_management.default_policy;
    let route_policy = route.file_management_policy.as_ref();
    let policy = route_policy.unwrap_or(global);

    policy.files_data_field.as_ref().or(global.files_data_field.as_ref())?;

    Some(FileUploadPolicy {
        validation: FileValidationPolicy {
            permitted_extensions: policy
                .permitted_extensions
                .clone()
                .or_else(|| global.permitted_extensions.clone())
                .map(|exts| exts.into_iter().collect()),
            max_file_size_in_bytes: policy.max_file_size_in_bytes.or(global.max_file_size_in_bytes),
            max_number_of_files: policy.max_number_of_files.or(global.max_number_of_files),
        },
        relative_path_template: policy
            .relative_path_template
            .clone()
            .or_else(|| global.relative_path_template.clone())
            .unwrap_or_else(|| "uploads/{{guid}}/{file{name}}".to_string()),
        allow_caller_supplied_id: policy.allow_caller_supplied_id.or(global.allow_caller_supplied_id).unwrap_or(false),
        enable_query_consumption: policy.enable_query_consumption.or(global.enable_query_consumption).unwrap_or(false),
    })
}

fn file_commit_policy(state: &AppState, route: &RouteDefinition) -> Option<FileCommitPolicy> {
    let global = state.config.file_management.default_commit_policy.as_ref();
    let policy = route.file_commit_policy.as_ref().or(global)?;
    Some(FileCommitPolicy {
        stores: policy.stores.clone(),
        overwrite_existing_files: policy.overwrite_existing_files,
        optional_stores: policy.optional_stores.iter().cloned().collect(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_proxy(
    state: &AppState,
    route_id: &str,
    route: &RouteDefinition,
    method_str: &str,
    bundle: &gateway_core::param_bundle::ParameterBundle,
    remaining_path: Option<&str>,
    caller_query: Option<&str>,
    headers: &HeaderMap,
    method: Method,
    body: Bytes,
) -> Result<Response> {
    let target_config = route
        .proxy_target
        .as_ref()
        .ok_or_else(|| Error::config("api_gateway route has no proxy_target"))?;
    let target = gateway_proxy::ProxyTarget {
        url_template: target_config.url.clone(),
        excluded_headers: target_config.excluded_headers.iter().cloned().collect(),
        header_overrides: target_config.header_overrides.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ignore_certificate_errors: target_config.ignore_certificate_errors,
        target_timeout_seconds: target_config.target_timeout_seconds,
        exclude_status_codes_from_cache: target_config.exclude_status_codes_from_cache.iter().copied().collect(),
    };

    let (cache_key, cache_ttl) = cache_key_for_route(route_id, method_str, route, bundle);
    let caller_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();

    proxy_stage::dispatch(
        &target,
        &state.proxy_cache,
        cache_key,
        cache_ttl,
        remaining_path,
        caller_query,
        caller_headers,
        method,
        body,
    )
    .await
}

async fn dispatch_query(
    state: &AppState,
    route: &RouteDefinition,
    bundle: &gateway_core::param_bundle::ParameterBundle,
) -> Result<Response> {
    #[cfg(feature = "database")]
    {
        let queries: Vec<gateway_core::query_chain::QueryDefinition> = route
            .query_definitions
            .iter()
            .map(|q| gateway_core::query_chain::QueryDefinition {
                index: q.index,
                is_last_in_chain: q.is_last_in_chain,
                sql_text: q.sql_text.clone(),
                connection_string_name: q.connection_string_name.clone(),
                json_variable_name: q.json_variable_name.clone(),
            })
            .collect();

        let final_rows =
            query_stage::execute_chain(&state.connection_factory, &state.connection_strings, &queries, bundle).await?;

        let count_rows = match &route.count_query {
            Some(count_query) => {
                let count_query = gateway_core::query_chain::QueryDefinition {
                    index: count_query.index,
                    is_last_in_chain: count_query.is_last_in_chain,
                    sql_text: count_query.sql_text.clone(),
                    connection_string_name: count_query.connection_string_name.clone(),
                    json_variable_name: count_query.json_variable_name.clone(),
                };
                Some(
                    query_stage::execute_count_query(
                        &state.connection_factory,
                        &state.connection_strings,
                        &count_query,
                        bundle,
                    )
                    .await?,
                )
            }
            None => None,
        };

        let status = StatusCode::from_u16(route.success_status_code).unwrap_or(StatusCode::OK);
        match query_stage::shape_response(&final_rows, count_rows.as_ref(), route.response_structure) {
            ShapedBody::Json(value) => Ok((status, axum::Json(value)).into_response()),
            ShapedBody::File { row } => render_file_response(state, &row).await,
        }
    }

    #[cfg(not(feature = "database"))]
    {
        let _ = (state, route, bundle);
        Err(Error::config("this build was compiled without the 'database' feature"))
    }
}

/// The store a `relative_path` row reads back through, when the row itself
/// names no `store` column: the single store named `"default"` in the
/// configured pool, per the route-side upload convention of the same name
/// (see `file_upload_stage.rs`'s default store handling).
const DEFAULT_FILE_STORE: &str = "default";

#[cfg(feature = "database")]
async fn render_file_response(state: &AppState, row: &HashMap<String, Value>) -> Result<Response> {
    use base64::Engine;

    let (source, content_type) = query_stage::resolve_file_source(row)?;
    let file_name = row.get("file_name").and_then(Value::as_str);

    let body = match &source {
        query_stage::FileSource::Base64Content(content) => base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| Error::validation(format!("invalid base64 file content: {e}")))?,
        query_stage::FileSource::RelativePath(path) => {
            let store_name = row.get("store").and_then(Value::as_str).unwrap_or(DEFAULT_FILE_STORE);
            let store = state.store_pool.store(store_name)?;
            store.get(path).await?
        }
        query_stage::FileSource::Http(url) => {
            let response = state
                .http_client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::database(format!("file response fetch failed: {e}"), 502))?;
            if !response.status().is_success() {
                return Err(Error::database(
                    format!("file response fetch returned {}", response.status()),
                    502,
                ));
            }
            response
                .bytes()
                .await
                .map_err(|e| Error::database(format!("file response fetch failed: {e}"), 502))?
                .to_vec()
        }
    };

    let content_type = content_type.unwrap_or_else(|| {
        let guessed_from = file_name.or(match &source {
            query_stage::FileSource::RelativePath(path) => Some(path.as_str()),
            _ => None,
        });
        guessed_from
            .and_then(|name| name.rsplit('.').next())
            .map(|ext| mime_guess::from_ext(ext).first_or_octet_stream().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    });

    let disposition = match file_name {
        Some(name) => format!("attachment; filename=\"{name}\""),
        None => "attachment".to_string(),
    };

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, content_type), (axum::http::header::CONTENT_DISPOSITION, disposition)],
        Body::from(body),
    )
        .into_response())
}

fn cache_key_for_route(
    route_id: &str,
    method: &str,
    route: &RouteDefinition,
    bundle: &gateway_core::param_bundle::ParameterBundle,
) -> (Option<String>, Option<std::time::Duration>) {
    match &route.cache_policy {
        Some(policy) => {
            let invalidators: std::collections::BTreeMap<String, String> = policy
                .invalidator_names
                .iter()
                .filter_map(|name| {
                    let value = bundle.resolve(None, name)?;
                    Some((name.clone(), param_value_to_string(value)))
                })
                .collect();
            let key = derive_cache_key(route_id, method, &route.path, &invalidators, policy.max_invalidator_value_length);
            (Some(key), Some(std::time::Duration::from_secs(policy.duration_seconds)))
        }
        None => (None, None),
    }
}

fn param_value_to_string(value: gateway_core::param_bundle::ParamValue) -> String {
    use gateway_core::param_bundle::ParamValue;
    match value {
        ParamValue::String(s) => s,
        ParamValue::Number(n) => n.to_string(),
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Null => String::new(),
    }
}

fn pattern_overrides(overrides: &gateway_config::RegexOverrides) -> PatternOverrides {
    PatternOverrides {
        json: overrides.json.clone(),
        header: overrides.header.clone(),
        query_string: overrides.query_string.clone(),
        route: overrides.route.clone(),
        form: overrides.form.clone(),
        auth: overrides.auth.clone(),
        settings: overrides.settings.clone(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn header_map_to_single_valued(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

fn query_pairs(query: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut pairs: HashMap<String, Vec<String>> = HashMap::new();
    let Some(query) = query else { return pairs };
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        pairs.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    pairs
}

fn preflight_response(decision: &CorsDecision, route: &RouteDefinition) -> Response {
    let allow_methods = cors::preflight_allow_methods(&route.methods.iter().cloned().collect());
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_cors_header_values(response.headers_mut(), decision, Some(&allow_methods));
    response
}

fn apply_cors_headers(mut response: Response, decision: &CorsDecision) -> Response {
    apply_cors_header_values(response.headers_mut(), decision, None);
    response
}

fn apply_cors_header_values(headers: &mut HeaderMap, decision: &CorsDecision, allow_methods_override: Option<&str>) {
    if let Some(origin) = &decision.allow_origin {
        if let Ok(value) = axum::http::HeaderValue::from_str(origin) {
            headers.insert("access-control-allow-origin", value);
        }
    }
    if decision.allow_credentials {
        headers.insert("access-control-allow-credentials", axum::http::HeaderValue::from_static("true"));
    }
    if let Some(allow_headers) = &decision.allow_headers {
        if let Ok(value) = axum::http::HeaderValue::from_str(allow_headers) {
            headers.insert("access-control-allow-headers", value);
        }
    }
    if let Some(methods) = allow_methods_override.or(decision.allow_methods.as_deref()) {
        if let Ok(value) = axum::http::HeaderValue::from_str(methods) {
            headers.insert("access-control-allow-methods", value);
        }
    }
    if let Some(max_age) = decision.max_age {
        headers.insert("access-control-max-age", axum::http::HeaderValue::from(max_age));
    }
}
