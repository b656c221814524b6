use rusqlite::ffi::ErrorCode;

/// Errors surfaced by the persistence layer. Transactional failures roll
/// back fully; callers never observe partial effects.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique violation: {0}")]
    UniqueViolation(String),

    #[error("invalid column: {0}")]
    InvalidColumn(String),

    #[error("integrity error: {0}")]
    IntegrityError(String),

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    #[error("sqlite: {0}")]
    Sqlite(rusqlite::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            match failure.code {
                ErrorCode::ConstraintViolation => {
                    let detail = message.clone().unwrap_or_else(|| failure.to_string());
                    return if detail.contains("UNIQUE") {
                        StoreError::UniqueViolation(detail)
                    } else {
                        StoreError::IntegrityError(detail)
                    };
                }
                ErrorCode::DatabaseCorrupt => {
                    return StoreError::IntegrityError(message.clone().unwrap_or_default());
                }
                _ => {}
            }
        }
        StoreError::Sqlite(err)
    }
}

impl From<StoreError> for engram_domain::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => engram_domain::Error::NotFound(what),
            StoreError::UniqueViolation(detail) => engram_domain::Error::IntegrityError(detail),
            StoreError::InvalidColumn(col) => engram_domain::Error::InvalidColumn(col),
            StoreError::IntegrityError(detail) => engram_domain::Error::IntegrityError(detail),
            StoreError::MigrationFailed(detail) => engram_domain::Error::MigrationFailed(detail),
            StoreError::Sqlite(e) => engram_domain::Error::IntegrityError(e.to_string()),
            StoreError::Json(e) => engram_domain::Error::Json(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
