//! End-to-end tests.
//!
//! Each test loads a TOML config from disk, seeds the in-memory directory
//! from it and drives the assembled router with `oneshot` requests.

use std::io::Write;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::{
    AppState, build_app,
    config::{BridgeConfig, ConfigError},
    scim::{SCHEMA_GROUP, SCHEMA_PATCH_OP, SCHEMA_USER},
};

const PUBLIC_URL_VAR: &str = "SCIM_BRIDGE_E2E_PUBLIC_URL";
const PUBLIC_URL: &str = "https://idm.example.com/scim/v2";

const CONFIG: &str = r#"
[server]
base_path = "/scim/v2"
public_url = "${SCIM_BRIDGE_E2E_PUBLIC_URL}"
body_limit_bytes = 4096
max_results = 1

[observability.logging]
format = "compact"

[directory]
binary_attributes = ["jpegPhoto"]

[[directory.constraints]]
object_class = "groupOfNames"
attribute = "member"

[[directory.entries]]
dn = "uid=bjensen,ou=people,dc=example,dc=com"
attributes = { objectClass = ["top", "inetOrgPerson"], entryUUID = "u-bjensen", uid = "bjensen", cn = "Barbara Jensen", sn = "Jensen", mail = "bjensen@example.com" }

[[directory.entries]]
dn = "uid=jsmith,ou=people,dc=example,dc=com"
attributes = { objectClass = ["top", "inetOrgPerson"], entryUUID = "u-jsmith", uid = "jsmith", cn = "John Smith", sn = "Smith" }

[[directory.entries]]
dn = "cn=staff,ou=groups,dc=example,dc=com"
attributes = { objectClass = ["top", "groupOfNames"], entryUUID = "g-staff", cn = "staff", member = "uid=bjensen,ou=people,dc=example,dc=com" }

[[mapping.resource_types]]
name = "User"
endpoint = "/Users"
schema = "urn:ietf:params:scim:schemas:core:2.0:User"
base_dn = "ou=people,dc=example,dc=com"
filter = "(objectClass=inetOrgPerson)"
object_classes = ["top", "inetOrgPerson"]
rdn_attribute = "uid"
display_attribute = "cn"

[[mapping.resource_types.schemas]]
uri = "urn:ietf:params:scim:schemas:core:2.0:User"
attributes = [
  { name = "userName", attribute = "uid" },
  { name = "displayName", attribute = "cn" },
  { name = "name", sub_attributes = [{ name = "familyName", attribute = "sn" }] },
  { name = "emails", multi_valued = true, types = [{ type = "work", sub_attributes = [{ name = "value", attribute = "mail" }] }] },
  { name = "active", dynamic = true, handler = "active" },
  { name = "groups", dynamic = true, handler = "groups", multi_valued = true, read_only = true, secondary_base_dn = "ou=groups,dc=example,dc=com", secondary_filter = "(&(objectClass=groupOfNames)(member=$dn))" },
]

[[mapping.resource_types]]
name = "Group"
endpoint = "/Groups"
schema = "urn:ietf:params:scim:schemas:core:2.0:Group"
base_dn = "ou=groups,dc=example,dc=com"
filter = "(objectClass=groupOfNames)"
object_classes = ["top", "groupOfNames"]
rdn_attribute = "cn"
display_attribute = "cn"

[[mapping.resource_types.schemas]]
uri = "urn:ietf:params:scim:schemas:core:2.0:Group"
attributes = [
  { name = "displayName", attribute = "cn" },
  { name = "members", dynamic = true, handler = "members", attribute = "member", multi_valued = true },
]
"#;

fn load(contents: &str) -> Result<BridgeConfig, ConfigError> {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    temp_env::with_var(PUBLIC_URL_VAR, Some(PUBLIC_URL), || {
        BridgeConfig::from_file(file.path())
    })
}

fn app() -> Router {
    let config = load(CONFIG).expect("config should load");
    build_app(AppState::from_config(config).expect("state should build"))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/scim+json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn test_missing_env_var_fails_to_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let result = temp_env::with_var_unset(PUBLIC_URL_VAR, || BridgeConfig::from_file(file.path()));
    assert!(matches!(
        result,
        Err(ConfigError::EnvVarNotFound(name)) if name == PUBLIC_URL_VAR
    ));
}

#[test]
fn test_config_sections_load() {
    let config = load(CONFIG).unwrap();
    assert_eq!(config.server.public_base_url(), PUBLIC_URL);
    assert_eq!(config.directory.entries.len(), 3);
    assert_eq!(config.mapping.resource_types.len(), 2);
    assert_eq!(config.mapping.resource_types[0].schemas[0].attributes.len(), 6);
    assert_eq!(config.mapping.resource_types[0].id_attribute, "entryUUID");
}

#[test]
fn test_example_config_builds() {
    let config = BridgeConfig::from_str(include_str!("../../bridge.example.toml")).unwrap();
    let state = AppState::from_config(config).unwrap();
    let names: Vec<&str> = state
        .engine
        .schema()
        .resource_types()
        .iter()
        .map(|rt| rt.name.as_str())
        .collect();
    assert_eq!(names, vec!["User", "Group"]);
}

#[test]
fn test_invalid_seed_is_rejected() {
    let config = load(
        r#"
[directory]
binary_attributes = ["jpegPhoto"]

[[directory.entries]]
dn = "uid=x,ou=people,dc=example,dc=com"
attributes = { jpegPhoto = "%%%" }
"#,
    )
    .unwrap();
    assert!(matches!(
        AppState::from_config(config),
        Err(ConfigError::Validation(_))
    ));
}

#[tokio::test]
async fn test_read_seeded_user() {
    let app = app();

    let response = send(&app, "GET", "/scim/v2/Users/u-bjensen", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], "u-bjensen");
    assert_eq!(body["userName"], "bjensen");
    assert_eq!(body["name"]["familyName"], "Jensen");
    assert_eq!(body["emails"][0]["value"], "bjensen@example.com");
    assert_eq!(body["emails"][0]["type"], "work");
    assert_eq!(body["active"], true);
    assert_eq!(body["groups"][0]["value"], "g-staff");
    assert_eq!(body["groups"][0]["display"], "staff");

    // Routes live under the base path only.
    let response = send(&app, "GET", "/Users/u-bjensen", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_is_paged_by_max_results() {
    let app = app();

    let response = send(&app, "GET", "/scim/v2/Users?count=10", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["totalResults"], 2);
    assert_eq!(body["itemsPerPage"], 1);
    assert_eq!(body["Resources"][0]["userName"], "bjensen");

    let response = send(&app, "GET", "/scim/v2/Users?startIndex=2", None).await;
    let body = json_body(response).await;
    assert_eq!(body["startIndex"], 2);
    assert_eq!(body["Resources"][0]["userName"], "jsmith");
}

#[tokio::test]
async fn test_user_lifecycle() {
    let app = app();

    let response = send(
        &app,
        "POST",
        "/scim/v2/Users",
        Some(json!({
            "schemas": [SCHEMA_USER],
            "userName": "alee",
            "displayName": "Ada Lee",
            "name": {"familyName": "Lee"},
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string();
    let body = json_body(response).await;
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(location, format!("{}/Users/{}", PUBLIC_URL, id));
    assert_eq!(body["name"]["familyName"], "Lee");

    let response = send(
        &app,
        "PATCH",
        &format!("/scim/v2/Users/{}", id),
        Some(json!({
            "schemas": [SCHEMA_PATCH_OP],
            "Operations": [
                {"op": "replace", "path": "displayName", "value": "Ada B. Lee"},
                {"op": "add", "path": "emails", "value": [{"type": "work", "value": "alee@example.com"}]},
            ]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["displayName"], "Ada B. Lee");
    assert_eq!(body["emails"][0]["value"], "alee@example.com");

    let response = send(
        &app,
        "GET",
        "/scim/v2/Users?filter=emails.value%20ew%20%22@example.com%22%20and%20displayName%20sw%20%22Ada%22",
        None,
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["totalResults"], 1);
    assert_eq!(body["Resources"][0]["id"], id.as_str());

    let response = send(&app, "DELETE", &format!("/scim/v2/Users/{}", id), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = send(&app, "GET", &format!("/scim/v2/Users/{}", id), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["Errors"][0]["status"], "404");
}

#[tokio::test]
async fn test_group_membership_round_trip() {
    let app = app();

    let response = send(
        &app,
        "PATCH",
        "/scim/v2/Groups/g-staff",
        Some(json!({
            "schemas": [SCHEMA_PATCH_OP],
            "Operations": [
                {"op": "add", "path": "members", "value": [{"value": "u-jsmith"}]},
            ]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let mut members: Vec<&str> = body["members"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["value"].as_str())
        .collect();
    members.sort();
    assert_eq!(members, vec!["u-bjensen", "u-jsmith"]);

    let body = json_body(send(&app, "GET", "/scim/v2/Users/u-jsmith", None).await).await;
    assert_eq!(body["groups"][0]["display"], "staff");

    // Removing every member leaves the group readable with no members.
    let response = send(
        &app,
        "PATCH",
        "/scim/v2/Groups/g-staff",
        Some(json!({
            "schemas": [SCHEMA_PATCH_OP],
            "Operations": [{"op": "remove", "path": "members"}]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(
        body.get("members")
            .and_then(Value::as_array)
            .is_none_or(|m| m.is_empty())
    );
}

#[tokio::test]
async fn test_create_group_with_members() {
    let app = app();

    let response = send(
        &app,
        "POST",
        "/scim/v2/Groups",
        Some(json!({
            "schemas": [SCHEMA_GROUP],
            "displayName": "ops",
            "members": [{"value": "u-bjensen"}],
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["displayName"], "ops");
    assert_eq!(body["members"][0]["value"], "u-bjensen");

    let body = json_body(send(&app, "GET", "/scim/v2/Users/u-bjensen", None).await).await;
    let groups: Vec<&str> = body["groups"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|g| g["display"].as_str())
        .collect();
    assert!(groups.contains(&"ops"));
    assert!(groups.contains(&"staff"));
}

#[tokio::test]
async fn test_discovery_under_base_path() {
    let app = app();

    let body = json_body(send(&app, "GET", "/scim/v2/ResourceTypes", None).await).await;
    assert_eq!(body["totalResults"], 2);
    assert_eq!(body["Resources"][1]["name"], "Group");
    assert_eq!(body["Resources"][1]["endpoint"], "/Groups");
}

#[tokio::test]
async fn test_body_limit() {
    let app = app();

    let padding = "x".repeat(8192);
    let body = json!({"schemas": [SCHEMA_USER], "userName": "big", "displayName": padding}).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/scim/v2/Users")
        .header(header::CONTENT_TYPE, "application/scim+json")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
