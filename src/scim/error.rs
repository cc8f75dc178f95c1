//! SCIM Error Responses
//!
//! Errors leave the service as `{"Errors": [{"status", "scimType"?, "detail"}]}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// SCIM error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimErrorResponse {
    #[serde(rename = "Errors")]
    pub errors: Vec<ScimErrorDetail>,
}

/// One entry of the `Errors` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimErrorDetail {
    /// HTTP status code as a string (e.g., "400", "404")
    pub status: String,

    /// SCIM-specific error type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scim_type: Option<ScimErrorType>,

    /// Human-readable error detail
    pub detail: String,
}

impl ScimErrorResponse {
    /// Create an error with an explicit status
    pub fn new(
        status: StatusCode,
        scim_type: Option<ScimErrorType>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            errors: vec![ScimErrorDetail {
                status: status.as_u16().to_string(),
                scim_type,
                detail: detail.into(),
            }],
        }
    }

    /// Invalid filter syntax error (400)
    pub fn invalid_filter(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            Some(ScimErrorType::InvalidFilter),
            detail,
        )
    }

    /// Invalid JSON syntax error (400)
    pub fn invalid_syntax(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            Some(ScimErrorType::InvalidSyntax),
            detail,
        )
    }

    /// Invalid attribute value (400)
    pub fn invalid_value(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            Some(ScimErrorType::InvalidValue),
            detail,
        )
    }

    /// Resource not found (404)
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, None, detail)
    }

    /// Internal server error (500)
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, None, detail)
    }

    /// Get the HTTP status code of the first error
    pub fn status_code(&self) -> StatusCode {
        self.errors
            .first()
            .and_then(|e| e.status.parse::<u16>().ok())
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ScimErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

/// SCIM error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScimErrorType {
    /// Filter syntax is invalid or unsupported
    InvalidFilter,

    /// Request body has invalid JSON syntax
    InvalidSyntax,

    /// Attribute value is invalid for its type
    InvalidValue,

    /// Uniqueness constraint violated (e.g., duplicate userName)
    Uniqueness,

    /// PATCH remove operation missing a path
    NoTarget,
}

impl std::fmt::Display for ScimErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScimErrorType::InvalidFilter => write!(f, "invalidFilter"),
            ScimErrorType::InvalidSyntax => write!(f, "invalidSyntax"),
            ScimErrorType::InvalidValue => write!(f, "invalidValue"),
            ScimErrorType::Uniqueness => write!(f, "uniqueness"),
            ScimErrorType::NoTarget => write!(f, "noTarget"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
