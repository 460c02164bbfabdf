use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// An I/O error from the key-value snapshot or the blob store.
    #[error("IO error: {0}")]
    Io(std::io::Error),

    /// A snapshot could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A key-value or blob entry does not exist.
    #[error("not found")]
    NotFound,

    /// A blob key is empty, absolute, or escapes the store root.
    #[error("invalid key")]
    InvalidKey,

    /// A session cookie could not be decoded or decrypted.
    #[error("invalid cookie")]
    InvalidCookie,

    /// A bearer token is malformed or its signature does not verify.
    #[error("invalid token")]
    InvalidToken,

    /// A share link carries a signature that does not match.
    #[error("invalid signature")]
    InvalidSignature,

    /// A share link carries no signature at all.
    #[error("no signature")]
    NoSignature,

    /// A share link is past its expiration.
    #[error("expired")]
    Expired,

    /// An AEAD tag did not verify.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Username or password rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The caller is not allowed to do this.
    #[error("Authorization failed")]
    Unauthorized,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    /// Unwraps an `AppError` that was smuggled through an `io::Read` or
    /// `io::Write` impl; anything else becomes `AppError::Io`.
    fn from(e: std::io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<AppError>()) {
            return match e.into_inner().map(|inner| inner.downcast::<AppError>()) {
                Some(Ok(app)) => *app,
                _ => AppError::Internal("lost wrapped error".to_string()),
            };
        }
        AppError::Io(e)
    }
}

impl From<AppError> for std::io::Error {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Io(e) => e,
            not_found @ AppError::NotFound => {
                std::io::Error::new(std::io::ErrorKind::NotFound, not_found)
            }
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<sonic_rs::Error> for AppError {
    fn from(e: sonic_rs::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "File system error".to_string())
            }

            AppError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::InvalidKey => {
                tracing::debug!("Invalid object key");
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            AppError::InvalidCookie | AppError::InvalidToken => {
                tracing::warn!("Rejected credential: {}", self);
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            AppError::InvalidSignature | AppError::Expired => {
                tracing::warn!("Rejected share link: {}", self);
                (StatusCode::FORBIDDEN, self.to_string())
            }

            AppError::NoSignature => {
                tracing::debug!("Unsigned share link");
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            AppError::AuthenticationFailed => {
                tracing::error!("Stored object failed authentication");
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}
