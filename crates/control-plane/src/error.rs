use consul_client::{ClientError, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotImplemented,
    AlreadyExists,
    NotFound,
    InvalidInput,
    InternalError,
    PermissionDenied,
    MultipleErrors,
    Unknown,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    NotImplemented(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Multiple(String),
    #[error("{0}")]
    Unknown(String),
}

impl DomainError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::NotImplemented(_) => ErrorCode::NotImplemented,
            DomainError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            DomainError::NotFound(_) => ErrorCode::NotFound,
            DomainError::InvalidInput(_) => ErrorCode::InvalidInput,
            DomainError::Internal(_) => ErrorCode::InternalError,
            DomainError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            DomainError::Multiple(_) => ErrorCode::MultipleErrors,
            DomainError::Unknown(_) => ErrorCode::Unknown,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound(_))
    }

    pub fn connection_failed() -> Self {
        DomainError::Internal("failed to connect to consul".to_string())
    }

    pub fn parse_failed() -> Self {
        DomainError::Internal("failed to parse value".to_string())
    }

    pub fn permission_denied() -> Self {
        DomainError::PermissionDenied("permission denied".to_string())
    }

    pub fn admin_required() -> Self {
        DomainError::PermissionDenied("token should have admin permission".to_string())
    }

    pub fn not_implemented() -> Self {
        DomainError::NotImplemented("service function not implemented".to_string())
    }

    pub fn unknown() -> Self {
        DomainError::Unknown("unknown error".to_string())
    }
}

impl From<ClientError> for DomainError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(_) => DomainError::connection_failed(),
            ClientError::InvalidRequest(message) => DomainError::InvalidInput(message),
        }
    }
}

pub(crate) fn check_response<T>(response: &Response<T>, missing: &str) -> Result<(), DomainError> {
    match response.status {
        200..=299 => {}
        400 => return Err(DomainError::InvalidInput(response.message())),
        403 => return Err(DomainError::permission_denied()),
        404 => return Err(DomainError::NotFound(missing.to_string())),
        status => {
            error!(status, message = %response.message(), "unexpected consul status");
            return Err(DomainError::unknown());
        }
    }
    if let Some(reason) = &response.decode_error {
        error!(error = %reason, "failed to decode consul response");
        return Err(DomainError::parse_failed());
    }
    Ok(())
}

pub(crate) fn take_body<T>(response: Response<T>, missing: &str) -> Result<T, DomainError> {
    check_response(&response, missing)?;
    response.body.ok_or_else(DomainError::parse_failed)
}
