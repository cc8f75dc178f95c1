//! SCIM 2.0 Protocol Routes
//!
//! Resource endpoints are generic over the configured resource types; the
//! first path segment selects the type by its endpoint.
//!
//! ## Endpoint Structure
//!
//! **Discovery Endpoints:**
//! - `GET /ResourceTypes` - List configured resource types
//! - `GET /ResourceTypes/{id}` - Get one resource type
//!
//! **Resource Endpoints:**
//! - `GET/POST /{endpoint}` - List/create resources
//! - `GET/PUT/PATCH/DELETE /{endpoint}/{id}` - Resource operations
//! - `GET /{endpoint}/{id}/binary/{attribute}/{index}` - Binary attribute value

pub mod discovery;
pub mod resources;

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use crate::{AppState, scim::ScimErrorResponse};

/// Media type of every SCIM response body.
pub const SCIM_CONTENT_TYPE: &str = "application/scim+json";

/// Build the SCIM routes.
pub fn scim_routes() -> Router<AppState> {
    Router::new()
        // Discovery endpoints
        .route("/ResourceTypes", get(discovery::resource_types))
        .route("/ResourceTypes/{id}", get(discovery::resource_type))
        // Resource endpoints
        .route(
            "/{resource}",
            get(resources::list_resources).post(resources::create_resource),
        )
        .route(
            "/{resource}/{id}",
            get(resources::get_resource)
                .put(resources::replace_resource)
                .patch(resources::patch_resource)
                .delete(resources::delete_resource),
        )
        .route(
            "/{resource}/{id}/binary/{attribute}/{index}",
            get(resources::get_binary),
        )
}

/// SCIM JSON response with correct Content-Type and status code.
pub struct ScimJson<T> {
    body: T,
    status: StatusCode,
    location: Option<String>,
}

impl<T: Serialize> ScimJson<T> {
    pub fn ok(body: T) -> Self {
        Self {
            body,
            status: StatusCode::OK,
            location: None,
        }
    }

    pub fn created(body: T, location: String) -> Self {
        Self {
            body,
            status: StatusCode::CREATED,
            location: Some(location),
        }
    }
}

impl<T: Serialize> IntoResponse for ScimJson<T> {
    fn into_response(self) -> Response {
        let body = match serde_json::to_vec(&self.body) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to serialize SCIM response: {}", e);
                return ScimErrorResponse::internal("Failed to serialize response")
                    .into_response();
            }
        };

        let mut response = (
            self.status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(SCIM_CONTENT_TYPE),
            )],
            Body::from(body),
        )
            .into_response();
        if let Some(location) = self.location
            && let Ok(value) = HeaderValue::from_str(&location)
        {
            response.headers_mut().insert(header::LOCATION, value);
        }
        response
    }
}
