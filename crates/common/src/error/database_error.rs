//! Database error types
//!
//! Everything related to connections, queries and transactions.

use thiserror::Error;

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Query failed: {query}")]
    QueryFailed { query: String },

    #[error("Constraint violation: {constraint}")]
    ConstraintViolation { constraint: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}
