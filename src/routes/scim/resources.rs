//! SCIM 2.0 Resource Endpoints
//!
//! Implements RFC 7644 Section 3 CRUD operations for every configured
//! resource type:
//! - POST /{endpoint}: Create resource
//! - GET /{endpoint}: List/search resources
//! - GET /{endpoint}/{id}: Get resource by ID
//! - PUT /{endpoint}/{id}: Replace resource
//! - PATCH /{endpoint}/{id}: Partial update
//! - DELETE /{endpoint}/{id}: Delete resource
//! - GET /{endpoint}/{id}/binary/{attribute}/{index}: Binary attribute value

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;

use super::ScimJson;
use crate::{
    AppState, codec,
    engine::{TranslationError, TranslationResult},
    scim::{ScimListParams, parse_attribute_list},
};

/// Query parameters accepted on single-resource reads.
#[derive(Debug, Default, Deserialize)]
pub struct ResourceQuery {
    /// Comma-separated attributes to include in the response
    #[serde(default)]
    pub attributes: Option<String>,
}

fn parse_body(bytes: &Bytes) -> TranslationResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| TranslationError::InvalidSyntax(format!("Invalid JSON: {}", e)))
}

/// List resources with optional filter and pagination.
///
/// `GET /{endpoint}`
///
/// Query parameters:
/// - `filter`: SCIM filter expression (e.g., `userName eq "bjensen"`)
/// - `startIndex`: 1-based pagination start (default: 1)
/// - `count`: Results per page (capped by `server.max_results`)
/// - `attributes`: Comma-separated projection
#[tracing::instrument(name = "scim.resources.list", skip_all, fields(%resource))]
pub async fn list_resources(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<ScimListParams>,
) -> TranslationResult<Response> {
    let rt = state.engine.resource_type(&resource)?;
    let page = state.engine.search(rt, &params).await?;
    tracing::debug!(
        total = page.total_results,
        returned = page.items_per_page,
        "Listed resources"
    );
    Ok(ScimJson::ok(page.map(|r| codec::encode(&r))).into_response())
}

/// Create a resource.
///
/// `POST /{endpoint}`
///
/// Returns 201 Created with the stored resource and its `Location`.
#[tracing::instrument(name = "scim.resources.create", skip_all, fields(%resource))]
pub async fn create_resource(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    body: Bytes,
) -> TranslationResult<Response> {
    let rt = state.engine.resource_type(&resource)?;
    let created = state.engine.create(rt, &parse_body(&body)?).await?;
    let location = format!(
        "{}{}/{}",
        state.engine.base_url(),
        rt.endpoint,
        created.id.as_deref().unwrap_or_default()
    );
    Ok(ScimJson::created(codec::encode(&created), location).into_response())
}

/// Get a resource by ID.
///
/// `GET /{endpoint}/{id}`
#[tracing::instrument(name = "scim.resources.get", skip_all, fields(%resource, %id))]
pub async fn get_resource(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> TranslationResult<Response> {
    let rt = state.engine.resource_type(&resource)?;
    let projection = parse_attribute_list(query.attributes.as_deref());
    let found = state.engine.get(rt, &id, projection.as_deref()).await?;
    Ok(ScimJson::ok(codec::encode(&found)).into_response())
}

/// Replace a resource.
///
/// `PUT /{endpoint}/{id}`
///
/// Attributes absent from the body are left as they are.
#[tracing::instrument(name = "scim.resources.replace", skip_all, fields(%resource, %id))]
pub async fn replace_resource(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    body: Bytes,
) -> TranslationResult<Response> {
    let rt = state.engine.resource_type(&resource)?;
    let replaced = state.engine.replace(rt, &id, &parse_body(&body)?).await?;
    Ok(ScimJson::ok(codec::encode(&replaced)).into_response())
}

/// Partially update a resource.
///
/// `PATCH /{endpoint}/{id}`
///
/// Accepts a `PatchOp` message or a partial resource.
#[tracing::instrument(name = "scim.resources.patch", skip_all, fields(%resource, %id))]
pub async fn patch_resource(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    body: Bytes,
) -> TranslationResult<Response> {
    let rt = state.engine.resource_type(&resource)?;
    let patched = state.engine.patch(rt, &id, &parse_body(&body)?).await?;
    Ok(ScimJson::ok(codec::encode(&patched)).into_response())
}

/// Delete a resource.
///
/// `DELETE /{endpoint}/{id}`
#[tracing::instrument(name = "scim.resources.delete", skip_all, fields(%resource, %id))]
pub async fn delete_resource(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
) -> TranslationResult<StatusCode> {
    let rt = state.engine.resource_type(&resource)?;
    state.engine.delete(rt, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Serve one binary attribute value.
///
/// `GET /{endpoint}/{id}/binary/{attribute}/{index}`
#[tracing::instrument(
    name = "scim.resources.binary",
    skip_all,
    fields(%resource, %id, %attribute, index = index)
)]
pub async fn get_binary(
    State(state): State<AppState>,
    Path((resource, id, attribute, index)): Path<(String, String, String, usize)>,
) -> TranslationResult<Response> {
    let rt = state.engine.resource_type(&resource)?;
    let bytes = state
        .engine
        .fetch_binary(rt, &id, &attribute, index)
        .await?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )],
        bytes,
    )
        .into_response())
}
