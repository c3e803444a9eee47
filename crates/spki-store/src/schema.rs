use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use snafu::{ResultExt, ensure};
use tracing::{debug, info};

use crate::{MigrateSchemaSnafu, Result, UnsupportedSchemaVersionSnafu};

/// The schema version this crate reads and writes.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE creator (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL UNIQUE,
    name TEXT
);

CREATE TABLE certificate (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    certid TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL REFERENCES creator (user_id),
    title TEXT,
    state TEXT NOT NULL,
    subject TEXT NOT NULL,
    parent_id TEXT REFERENCES certificate (certid),
    pathlev INTEGER NOT NULL,
    genre INTEGER NOT NULL,
    cert_req TEXT
);

CREATE TABLE private_key (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyid TEXT NOT NULL UNIQUE,
    private_key TEXT NOT NULL,
    create_time INTEGER NOT NULL
);

CREATE TABLE version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    certid TEXT NOT NULL REFERENCES certificate (certid),
    keyid TEXT NOT NULL REFERENCES private_key (keyid),
    serial TEXT NOT NULL,
    cert TEXT NOT NULL,
    effective_time INTEGER NOT NULL,
    expiration_time INTEGER NOT NULL,
    revocation_time INTEGER,
    alarm INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX certificate_user_id ON certificate (user_id);
CREATE INDEX version_certid ON version (certid);
";

/// Creates the schema on an empty database and refuses databases written by
/// a newer release.
pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context(MigrateSchemaSnafu)?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .context(MigrateSchemaSnafu)?;

    let current: i64 = tx
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .optional()
        .context(MigrateSchemaSnafu)?
        .flatten()
        .unwrap_or(0);

    ensure!(
        current <= SCHEMA_VERSION,
        UnsupportedSchemaVersionSnafu {
            found: current,
            supported: SCHEMA_VERSION,
        }
    );

    if current == SCHEMA_VERSION {
        debug!(schema.version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        schema.from = current,
        schema.to = SCHEMA_VERSION,
        "creating database schema"
    );
    tx.execute_batch(SCHEMA_V1).context(MigrateSchemaSnafu)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )
    .context(MigrateSchemaSnafu)?;

    tx.commit().context(MigrateSchemaSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn newer_schemas_are_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", [])
            .unwrap();

        let err = migrate(&mut conn).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedSchemaVersion {
                found: 99,
                supported: SCHEMA_VERSION
            }
        ));
    }
}
