//! Directory error types.

use thiserror::Error;

/// Errors from identity or pending-item lookups.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// The blocking query task panicked or was cancelled.
    #[error("directory task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A row could not be mapped to a domain value.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Convenience type alias for directory results.
pub type Result<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_row_display() {
        let err = DirectoryError::CorruptRow("users.id=3 has role 'admin'".into());
        assert_eq!(err.to_string(), "corrupt row: users.id=3 has role 'admin'");
    }

    #[test]
    fn sqlite_error_from_conversion() {
        let err: DirectoryError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, DirectoryError::Sqlite(_)));
    }
}
