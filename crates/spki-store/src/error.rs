use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors which can occur while reading from or writing to the credential
/// store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to build the database connection pool"))]
    BuildPool { source: r2d2::Error },

    #[snafu(display("failed to get a database connection from the pool"))]
    GetConnection { source: r2d2::Error },

    #[snafu(display("failed to migrate the database schema"))]
    MigrateSchema { source: rusqlite::Error },

    #[snafu(display(
        "database schema version {found} is newer than the supported version {supported}"
    ))]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    #[snafu(display("failed to {operation}"))]
    Query {
        source: rusqlite::Error,
        operation: &'static str,
    },

    #[snafu(display("failed to commit the transaction to {operation}"))]
    Commit {
        source: rusqlite::Error,
        operation: &'static str,
    },
}

impl Error {
    /// Returns `true` if retrying the operation later may succeed, which is
    /// the case for pool exhaustion and lock contention.
    ///
    /// The store itself never retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::GetConnection { .. } => true,
            Error::Query { source, .. } | Error::Commit { source, .. } => is_busy(source),
            Error::BuildPool { .. }
            | Error::MigrateSchema { .. }
            | Error::UnsupportedSchemaVersion { .. } => false,
        }
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use rusqlite::ffi;

    use super::*;

    fn sqlite_error(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn lock_contention_is_transient() {
        let error = Error::Query {
            source: sqlite_error(ffi::SQLITE_BUSY),
            operation: "insert the certificate",
        };
        assert!(error.is_transient());
    }

    #[test]
    fn constraint_violations_are_permanent() {
        let error = Error::Query {
            source: sqlite_error(ffi::SQLITE_CONSTRAINT),
            operation: "insert the certificate",
        };
        assert!(!error.is_transient());
        assert_eq!(error.to_string(), "failed to insert the certificate");
    }
}
