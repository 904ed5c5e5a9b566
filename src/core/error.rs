//! Errors surfaced by the expense and report services.
//!
//! Business-rule violations ([`NotFound`], [`Forbidden`], [`InvalidState`],
//! [`InvalidArgument`], [`Conflict`]) are returned as typed values. Failures of the
//! upstream rate source become [`Unavailable`]; anything unexpected from the
//! repositories or the cache store becomes [`Internal`].
//!
//!  [`NotFound`]: ServiceError::NotFound
//!  [`Forbidden`]: ServiceError::Forbidden
//!  [`InvalidState`]: ServiceError::InvalidState
//!  [`InvalidArgument`]: ServiceError::InvalidArgument
//!  [`Conflict`]: ServiceError::Conflict
//!  [`Unavailable`]: ServiceError::Unavailable
//!  [`Internal`]: ServiceError::Internal
use crate::core::repository::RepositoryError;
use thiserror::Error;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Exchange rate unavailable: {0:#}")]
    Unavailable(anyhow::Error),
    #[error("Internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl ServiceError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable identifier for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Conflict(_) => "conflict",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            RepositoryError::Duplicate(msg)
            | RepositoryError::Conflict(msg)
            | RepositoryError::Stale(msg) => Self::Conflict(msg),
            RepositoryError::Storage(e) => Self::Internal(e),
        }
    }
}
