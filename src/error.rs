use hyper::StatusCode;
use thiserror::Error;
pub use tokio_postgres::Error as DbError;

use crate::auth::AuthError;
use crate::validators::ValidationFailed;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("A database error occurred while {operation}")]
    Storage {
        operation: &'static str,
        #[source]
        source: DbError,
    },
    #[error("Authentication failed: {0}")]
    Unauthenticated(#[from] AuthError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Permission denied")]
    NoPermission,
    #[error("Validation failed: {0}")]
    ValidationFail(String),
    #[error("An unexpected error occurred")]
    Unexpected(anyhow::Error),
    #[error("Wrong request format: {0}")]
    BadRequest(String),
    #[error("{0} already exists")]
    AlreadyExists(&'static str),
    #[error("The request body is larger than {0} bytes")]
    BodyTooLarge(usize),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        use AppError::*;
        match self {
            Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            NotFound(_) => StatusCode::NOT_FOUND,
            NoPermission => StatusCode::FORBIDDEN,
            ValidationFail(_) | BadRequest(_) => StatusCode::BAD_REQUEST,
            AlreadyExists(_) => StatusCode::CONFLICT,
            BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        use AppError::*;
        match self {
            Storage { .. } => "STORAGE",
            Unauthenticated(_) => "UNAUTHENTICATED",
            NotFound(_) => "NOT_FOUND",
            NoPermission => "NO_PERMISSION",
            ValidationFail(_) => "VALIDATION_FAIL",
            BadRequest(_) => "BAD_REQUEST",
            AlreadyExists(_) => "ALREADY_EXISTS",
            BodyTooLarge(_) => "BODY_TOO_LARGE",
            _ => "UNEXPECTED",
        }
    }

    pub fn missing() -> AppError {
        AppError::BadRequest("The request was sent with the wrong path or method".to_string())
    }
}

impl From<ValidationFailed> for AppError {
    fn from(ValidationFailed(message): ValidationFailed) -> AppError {
        AppError::ValidationFail(message.to_string())
    }
}

/// Names the logical operation a database error came from.
pub trait StorageContext<T> {
    fn context(self, operation: &'static str) -> Result<T, AppError>;
}

impl<T> StorageContext<T> for Result<T, DbError> {
    fn context(self, operation: &'static str) -> Result<T, AppError> {
        self.map_err(|source| AppError::Storage { operation, source })
    }
}

macro_rules! unexpected {
    () => {
        |e| {
            ::log::error!("Unexpected error: [{}][{}]{}", file!(), line!(), e);
            crate::error::AppError::Unexpected(e.into())
        }
    };
    ($msg: expr) => {{
        let msg = $msg.to_string();
        ::log::error!("Unexpected error: [{}][{}]{}", file!(), line!(), msg);
        crate::error::AppError::Unexpected(::anyhow::anyhow!(msg))
    }};
}

#[test]
fn status_mapping_test() {
    assert_eq!(AppError::NotFound("user").status_code(), StatusCode::NOT_FOUND);
    assert_eq!(AppError::NotFound("user").to_string(), "user not found");
    assert_eq!(
        AppError::from(AuthError::Expired).status_code(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(AppError::AlreadyExists("chat member").error_code(), "ALREADY_EXISTS");
    assert_eq!(AppError::missing().status_code(), StatusCode::BAD_REQUEST);
    let invalid: AppError = ValidationFailed("Text is empty.").into();
    assert_eq!(invalid.to_string(), "Validation failed: Text is empty.");
}
