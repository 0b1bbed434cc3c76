use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("inconsistent: {0}")]
    Inconsistent(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("codec error: {0}")]
    Wire(#[from] silt_wire::CodecError),

    #[error("postgres error: {0}")]
    Postgres(tokio_postgres::Error),
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        classify(e)
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Backend(e) => classify(e),
            other => Error::Pool(other.to_string()),
        }
    }
}

/// Map a driver error onto the stable error taxonomy.
///
/// Unique violations become `AlreadyExists` (create paths may remap),
/// connection and shutdown classes become `Unavailable`, and statement
/// syntax errors surface as `BadRequest` carrying the engine's message:
/// they indicate a bug in generated SQL, not a transient condition.
pub(crate) fn classify(e: tokio_postgres::Error) -> Error {
    if let Some(db) = e.as_db_error() {
        let code = db.code().code();
        if *db.code() == SqlState::UNIQUE_VIOLATION {
            return Error::AlreadyExists(db.message().to_owned());
        }
        // 08 connection exception, 53 insufficient resources,
        // 57 operator intervention (includes statement timeout)
        if code.starts_with("08") || code.starts_with("53") || code.starts_with("57") {
            return Error::Unavailable(db.message().to_owned());
        }
        // 42 syntax error or access rule violation
        if code.starts_with("42") {
            return Error::BadRequest(db.message().to_owned());
        }
        return Error::Postgres(e);
    }
    if e.is_closed() {
        return Error::Unavailable(e.to_string());
    }
    Error::Postgres(e)
}

pub(crate) fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

pub(crate) fn is_foreign_key_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION)
}

/// Result type for datastore operations.
pub type Result<T> = std::result::Result<T, Error>;
