use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DirectoryError {
    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Directory error: {0}")]
    Other(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;
