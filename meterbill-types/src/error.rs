use thiserror::Error;

/// Flat error taxonomy shared by every component in the metering core.
///
/// Matches the error kinds named in the specification one-for-one so that
/// request-initiated callers (the metering/invoice services) and the
/// billing-period monitor can pattern-match on `kind()` without reaching
/// into component-specific sub-enums.
#[derive(Error, Debug)]
pub enum MeteringError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl MeteringError {
    pub fn kind(&self) -> &'static str {
        match self {
            MeteringError::InvalidArgument(_) => "INVALID_ARGUMENT",
            MeteringError::Unauthenticated(_) => "UNAUTHENTICATED",
            MeteringError::NotFound(_) => "NOT_FOUND",
            MeteringError::InvalidState(_) => "INVALID_STATE",
            MeteringError::AlreadyExists(_) => "ALREADY_EXISTS",
            MeteringError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            MeteringError::StorageError(_) => "STORAGE_ERROR",
        }
    }
}

pub type MeteringResult<T> = Result<T, MeteringError>;
