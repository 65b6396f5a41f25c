//! Error types for the relational store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying SQLite error
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Malformed or unexpected stored data
    #[error("invalid data: {0}")]
    InvalidData(String),
}
