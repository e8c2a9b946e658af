//! Error taxonomy for the Clavum core.

use thiserror::Error;

use crate::models::ApprovalStatus;

pub type Result<T> = std::result::Result<T, ClavumError>;

/// The closed set of error kinds that cross any trust boundary in Clavum.
///
/// Every fallible core operation returns one of these. Handlers pattern
/// match exhaustively; there is no wildcard catch-all variant.
#[derive(Error, Debug)]
pub enum ClavumError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("approval already resolved: {0:?}")]
    AlreadyResolved(ApprovalStatus),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signature already observed")]
    Replayed,

    #[error("approval expired")]
    Expired,

    #[error("cryptographic failure")]
    CryptoFailure,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClavumError {
    /// HTTP status code per spec.md §7's mapping table. The core itself is
    /// transport-agnostic; this exists so an HTTP adapter has a single
    /// source of truth instead of re-deriving the mapping.
    pub fn status_code(&self) -> u16 {
        match self {
            ClavumError::BadRequest(_) => 400,
            ClavumError::Unauthenticated => 401,
            ClavumError::Forbidden => 403,
            ClavumError::NotFound(_) => 404,
            ClavumError::Conflict(_) => 409,
            ClavumError::AlreadyResolved(_) => 409,
            ClavumError::InvalidSignature => 400,
            ClavumError::Replayed => 409,
            ClavumError::Expired => 410,
            ClavumError::CryptoFailure => 500,
            ClavumError::Internal(_) => 500,
        }
    }

    /// True for kinds a caller might reasonably retry (storage hiccups),
    /// false for anything that reflects a stable fact about the request.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ClavumError::Internal(_))
    }

    /// Coarsen a crypto-layer failure so it never leaks a library-specific
    /// error type across the primitives boundary (spec.md §4.1).
    pub fn crypto_failure() -> Self {
        ClavumError::CryptoFailure
    }
}

impl From<base64::DecodeError> for ClavumError {
    fn from(err: base64::DecodeError) -> Self {
        ClavumError::BadRequest(format!("invalid base64url: {err}"))
    }
}
