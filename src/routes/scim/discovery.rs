//! SCIM 2.0 Discovery Endpoints
//!
//! Implements the RFC 7644 Section 4 `ResourceTypes` endpoint from the
//! configured mapping.

use axum::extract::{Path, State};

use super::ScimJson;
use crate::{
    AppState,
    engine::{TranslationError, TranslationResult},
    scim::{ResourceTypeDescriptor, ScimListResponse},
};

/// List all configured resource types.
///
/// `GET /ResourceTypes`
#[tracing::instrument(name = "scim.discovery.resource_types", skip_all)]
pub async fn resource_types(
    State(state): State<AppState>,
) -> ScimJson<ScimListResponse<ResourceTypeDescriptor>> {
    let descriptors = state.engine.resource_types();
    let total = descriptors.len() as u32;
    ScimJson::ok(ScimListResponse::new(descriptors, total, 1))
}

/// Get a resource type by its id (the resource type name).
///
/// `GET /ResourceTypes/{id}`
#[tracing::instrument(name = "scim.discovery.resource_type", skip_all, fields(%id))]
pub async fn resource_type(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> TranslationResult<ScimJson<ResourceTypeDescriptor>> {
    state
        .engine
        .resource_types()
        .into_iter()
        .find(|rt| rt.id.eq_ignore_ascii_case(&id))
        .map(ScimJson::ok)
        .ok_or_else(|| TranslationError::NotFound(format!("Resource type '{}' not found", id)))
}
