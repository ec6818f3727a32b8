//! Database error types
//!
//! PostgreSQL failures are classified by SQLSTATE so that callers can tell a
//! duplicate external claim apart from a lost connection. Adapters convert
//! these errors into `PortError` before they reach the domain crates.

use thiserror::Error;

use core_kernel::PortError;

/// A failed database operation, classified by cause
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Cannot reach database: {0}")]
    ConnectionFailed(String),

    #[error("Query rejected: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// SQLSTATE 23505
    #[error("Already exists: {0}")]
    DuplicateEntry(String),

    /// SQLSTATE 23503
    #[error("Missing referenced row: {0}")]
    ForeignKeyViolation(String),

    /// SQLSTATE 23514, or an invariant checked inside a transaction
    #[error("Invariant violated: {0}")]
    ConstraintViolation(String),

    /// The identifier block a write targets is no longer reserved
    #[error("Reservation closed: {0}")]
    ReservationClosed(String),

    #[error("Cannot apply migrations: {0}")]
    MigrationFailed(String),

    /// A stored value has no domain counterpart
    #[error("Undecodable column {0}")]
    Decode(String),

    #[error("No free connection in the pool")]
    PoolExhausted,

    #[error(transparent)]
    SqlError(sqlx::Error),
}

impl DatabaseError {
    /// ```rust
    /// use infra_db::DatabaseError;
    ///
    /// let error = DatabaseError::not_found("StagedClaim", "STC-12");
    /// assert_eq!(error.to_string(), "Not found: StagedClaim STC-12");
    /// ```
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound(format!("{entity} {id}"))
    }

    pub fn duplicate(entity: &str, field: &str, value: impl std::fmt::Display) -> Self {
        DatabaseError::DuplicateEntry(format!("{entity} {field}={value}"))
    }

    pub fn decode(column: &str, message: impl std::fmt::Display) -> Self {
        DatabaseError::Decode(format!("'{column}': {message}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_))
    }

    /// Whether retrying against a healthy database may succeed
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted)
    }
}

/// Classification by SQLSTATE
/// (<https://www.postgresql.org/docs/current/errcodes-appendix.html>)
impl From<&sqlx::Error> for DatabaseError {
    fn from(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Io(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => DatabaseError::DuplicateEntry(db_err.message().to_string()),
                Some("23503") => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                Some("23514") => DatabaseError::ConstraintViolation(db_err.message().to_string()),
                _ => DatabaseError::Query(db_err.message().to_string()),
            },
            _ => DatabaseError::Query(error.to_string()),
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match DatabaseError::from(&error) {
            DatabaseError::Query(_) => DatabaseError::SqlError(error),
            classified => classified,
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(error.to_string())
    }
}

/// Translates database failures into the port error vocabulary
///
/// - `NotFound` -> `PortError::NotFound`
/// - unique and foreign key violations, closed reservations -> `PortError::Conflict`
/// - check violations -> `PortError::Validation`
/// - connection and pool failures -> `PortError::Connection`
/// - everything else -> `PortError::Internal`
impl From<DatabaseError> for PortError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound(message) => PortError::NotFound {
                entity_type: "record".to_string(),
                id: message,
            },
            DatabaseError::DuplicateEntry(message)
            | DatabaseError::ForeignKeyViolation(message)
            | DatabaseError::ReservationClosed(message) => PortError::conflict(message),
            DatabaseError::ConstraintViolation(message) => PortError::validation(message),
            DatabaseError::ConnectionFailed(message) => PortError::connection(message),
            DatabaseError::PoolExhausted => PortError::connection("connection pool exhausted"),
            DatabaseError::SqlError(source) => PortError::internal_from(source),
            other => PortError::internal(other.to_string()),
        }
    }
}
