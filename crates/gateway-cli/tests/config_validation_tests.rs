//! `gateway validate` failure scenarios: malformed YAML and routes that
//! violate the invariants checked by `RouteDefinition::validate`.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_config_validate_malformed_yaml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("malformed.yaml");

    fs::write(
        &config_path,
        r#"
routes:
  broken:
    path: "/x"
    badly: [formed yaml
"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.args(["validate", "--config", config_path.to_str().unwrap()]);
    cmd.assert().failure().stderr(predicate::str::contains("failed to parse config file"));
}

#[test]
fn test_config_validate_rejects_db_query_route_without_queries() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("gateway.yaml");

    fs::write(
        &config_path,
        r#"
routes:
  list_users:
    path: "/users"
    methods: ["GET"]
    service_type: db_query
    query_definitions: []
"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.args(["validate", "--config", config_path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("must declare at least one query_definition"));
}

#[test]
fn test_config_validate_rejects_api_gateway_route_without_target() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("gateway.yaml");

    fs::write(
        &config_path,
        r#"
routes:
  proxy_orders:
    path: "/orders/*"
    methods: ["GET"]
    service_type: api_gateway
"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.args(["validate", "--config", config_path.to_str().unwrap()]);
    cmd.assert().failure().stderr(predicate::str::contains("must declare a proxy_target"));
}

#[test]
fn test_config_validate_accepts_well_formed_query_route() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("gateway.yaml");

    fs::write(
        &config_path,
        r#"
routes:
  list_users:
    path: "/users"
    methods: ["GET"]
    service_type: db_query
    query_definitions:
      - index: 0
        is_last_in_chain: true
        sql_text: "SELECT * FROM users"
        connection_string_name: "default"
"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.args(["validate", "--config", config_path.to_str().unwrap()]);
    cmd.assert().success().stdout(predicate::str::contains("config is valid"));
}
