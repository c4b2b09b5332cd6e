//! # gateway-core
//!
//! Shared logic for the config-driven HTTP gateway: route resolution,
//! parameter resolution across request sources, the SQL query-chain engine,
//! file-upload staging, file-store commit/rollback, and the process-wide
//! caches the pipeline stages share.
//!
//! This crate has no HTTP surface of its own — `gateway-http` wires these
//! building blocks into an `axum::Router`, and `gateway-proxy` builds on
//! [`cache`] for the reverse-proxy terminal stage.

pub mod cache;
pub mod error;
pub mod file_stage;
pub mod file_store;
pub mod param_bundle;
pub mod query_chain;
pub mod route_resolver;

pub use cache::{
    derive_cache_key, DbCacheEntry, OidcDiscoveryEntry, ProxyCacheEntry, SingleflightCache,
    UserInfoCacheEntry,
};
pub use error::{Error, Result};
pub use file_stage::{
    guarded_join, render_relative_path_template, stage_base64_payload, validate_file_constraints,
    validate_file_count, validate_filename, FileValidationPolicy, StagedFile, TempFileRecord,
    TempFileTracker,
};
pub use file_store::{
    commit_staged_files, CommitOutcome, FileCommitPolicy, FileStore, LocalStore, SftpGroupKey,
    StorePool,
};
pub use param_bundle::{
    default_pattern, join_multivalued, DataModel, ParamValue, ParameterBundle, ParameterGroup,
    Source,
};
pub use query_chain::{
    lower_markers, resolve_marker, scan_markers, thread_result_forward, ConnectionFactory, Marker,
    QueryDefinition, RowSet, TrackedConnection, OPEN_CONNECTION_COUNT,
};
pub use route_resolver::{MethodSet, ResolvedRoute, RouteEntry, RouteTable};
