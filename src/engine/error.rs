use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    codec::CodecError,
    directory::DirectoryError,
    scim::{FilterParseError, PatchError, ScimErrorResponse, ScimErrorType},
};

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Invalid filter: {0}")]
    Syntax(#[from] FilterParseError),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{0}")]
    InvalidSyntax(String),

    #[error("{0}")]
    InvalidValue(String),

    #[error("Attribute '{0}' has no directory mapping and no handler")]
    UnmappedAttribute(String),

    #[error("Filter attribute '{0}' does not map to a directory attribute")]
    UnknownFilterAttribute(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Directory error: {0}")]
    Directory(DirectoryError),
}

pub type TranslationResult<T> = Result<T, TranslationError>;

/// Error categories with a fixed wire mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    InvalidSyntax,
    InvalidValue,
    UnmappedAttribute,
    UnknownFilterAttribute,
    NotFound,
    Conflict,
    Directory,
}

/// Status and `scimType` for every error kind.
const STATUS_TABLE: [(ErrorKind, StatusCode, Option<ScimErrorType>); 8] = [
    (
        ErrorKind::Syntax,
        StatusCode::BAD_REQUEST,
        Some(ScimErrorType::InvalidFilter),
    ),
    (
        ErrorKind::InvalidSyntax,
        StatusCode::BAD_REQUEST,
        Some(ScimErrorType::InvalidSyntax),
    ),
    (
        ErrorKind::InvalidValue,
        StatusCode::BAD_REQUEST,
        Some(ScimErrorType::InvalidValue),
    ),
    (
        ErrorKind::UnmappedAttribute,
        StatusCode::INTERNAL_SERVER_ERROR,
        None,
    ),
    (
        ErrorKind::UnknownFilterAttribute,
        StatusCode::INTERNAL_SERVER_ERROR,
        None,
    ),
    (ErrorKind::NotFound, StatusCode::NOT_FOUND, None),
    (
        ErrorKind::Conflict,
        StatusCode::CONFLICT,
        Some(ScimErrorType::Uniqueness),
    ),
    (ErrorKind::Directory, StatusCode::INTERNAL_SERVER_ERROR, None),
];

impl ErrorKind {
    fn lookup(self) -> (StatusCode, Option<ScimErrorType>) {
        STATUS_TABLE
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, status, scim_type)| (*status, *scim_type))
            .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, None))
    }

    pub fn status(self) -> StatusCode {
        self.lookup().0
    }

    pub fn scim_type(self) -> Option<ScimErrorType> {
        self.lookup().1
    }
}

impl TranslationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslationError::Syntax(_) | TranslationError::InvalidFilter(_) => ErrorKind::Syntax,
            TranslationError::InvalidSyntax(_) => ErrorKind::InvalidSyntax,
            TranslationError::InvalidValue(_) => ErrorKind::InvalidValue,
            TranslationError::UnmappedAttribute(_) => ErrorKind::UnmappedAttribute,
            TranslationError::UnknownFilterAttribute(_) => ErrorKind::UnknownFilterAttribute,
            TranslationError::NotFound(_) => ErrorKind::NotFound,
            TranslationError::Conflict(_) => ErrorKind::Conflict,
            TranslationError::Directory(_) => ErrorKind::Directory,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }
}

impl From<DirectoryError> for TranslationError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::AlreadyExists(dn) => {
                TranslationError::Conflict(format!("Resource already exists: {}", dn))
            }
            DirectoryError::NoSuchObject(dn) => {
                TranslationError::NotFound(format!("Resource not found: {}", dn))
            }
            DirectoryError::ConstraintViolation(msg) => TranslationError::InvalidValue(msg),
            other => TranslationError::Directory(other),
        }
    }
}

impl From<CodecError> for TranslationError {
    fn from(e: CodecError) -> Self {
        TranslationError::InvalidSyntax(e.to_string())
    }
}

impl From<PatchError> for TranslationError {
    fn from(e: PatchError) -> Self {
        match e {
            PatchError::InvalidValue(_) | PatchError::NoTarget => {
                TranslationError::InvalidValue(e.to_string())
            }
            _ => TranslationError::InvalidSyntax(e.to_string()),
        }
    }
}

impl From<&TranslationError> for ScimErrorResponse {
    fn from(e: &TranslationError) -> Self {
        let kind = e.kind();
        ScimErrorResponse::new(kind.status(), kind.scim_type(), e.to_string())
    }
}

impl IntoResponse for TranslationError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, kind = ?self.kind(), "SCIM request failed");
        } else {
            tracing::debug!(error = %self, kind = ?self.kind(), "SCIM request rejected");
        }
        ScimErrorResponse::from(&self).into_response()
    }
}
