use std::{path::PathBuf, time::Duration};

use bon::Builder;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use snafu::ResultExt;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use crate::{
    BuildPoolSnafu, CertificateRecord, CommitSnafu, Creator, GetConnectionSnafu, Issuance,
    PrivateKeyRecord, QuerySnafu, Result, VersionRecord, schema,
};

pub const DEFAULT_POOL_SIZE: u32 = 8;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options used to open a [`Store`].
#[derive(Builder, Clone)]
pub struct StoreOptions {
    /// Path of the SQLite database file. The database lives in memory if this
    /// is not set, which also limits the pool to a single connection.
    #[builder(into)]
    path: Option<PathBuf>,

    /// Applied with `PRAGMA key` to every new connection.
    #[builder(into)]
    key: Option<Zeroizing<String>>,

    /// Maximum number of pooled connections.
    #[builder(default = DEFAULT_POOL_SIZE)]
    pool_size: u32,

    /// How long to wait for a free connection before giving up.
    #[builder(default = DEFAULT_CONNECTION_TIMEOUT)]
    connection_timeout: Duration,

    /// How long a statement waits for a lock held by another connection.
    #[builder(default = DEFAULT_BUSY_TIMEOUT)]
    busy_timeout: Duration,
}

/// The credential store.
///
/// Cloning is cheap, all clones share the same connection pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Opens (and if required creates) the database and migrates its schema.
    #[instrument(name = "open_credential_store", skip(options), fields(path = ?options.path))]
    pub fn open(options: &StoreOptions) -> Result<Self> {
        let (manager, pool_size) = match &options.path {
            Some(path) => (SqliteConnectionManager::file(path), options.pool_size),
            None => (SqliteConnectionManager::memory(), 1),
        };

        let file_backed = options.path.is_some();
        let key = options.key.clone();
        let busy_timeout = options.busy_timeout;
        let manager = manager.with_init(move |conn| {
            if let Some(key) = &key {
                conn.pragma_update(None, "key", key.as_str())?;
            }
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            if file_backed {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(options.connection_timeout)
            .build(manager)
            .context(BuildPoolSnafu)?;

        let store = Self { pool };
        schema::migrate(&mut *store.connection()?)?;

        info!(pool.size = pool_size, "opened credential store");
        Ok(store)
    }

    /// Opens a fresh in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreOptions::builder().build())
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context(GetConnectionSnafu)
    }

    /// Returns the creator with the given user ID, creating it first if it
    /// does not exist yet.
    ///
    /// Concurrent first-time registrations of the same user ID result in a
    /// single row. An existing creator keeps its name.
    #[instrument(skip(self))]
    pub fn register_creator_if_absent(&self, user_id: &str, name: &str) -> Result<Creator> {
        let operation = "register the creator";
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(QuerySnafu { operation })?;

        let inserted = tx
            .execute(
                "INSERT INTO creator (user_id, name) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO NOTHING",
                params![user_id, name],
            )
            .context(QuerySnafu { operation })?;
        let creator = tx
            .query_row(
                "SELECT id, user_id, name FROM creator WHERE user_id = ?1",
                [user_id],
                Creator::from_row,
            )
            .context(QuerySnafu { operation })?;

        tx.commit().context(CommitSnafu { operation })?;

        debug!(creator.id = creator.id, created = inserted > 0, "registered creator");
        Ok(creator)
    }

    /// Writes the certificate, private key and version rows of an issuance.
    ///
    /// Either all three rows are written or none of them are.
    #[instrument(
        skip_all,
        fields(
            certificate.id = %issuance.certificate.certid,
            key.id = %issuance.private_key.keyid,
        )
    )]
    pub fn record_issuance(&self, issuance: &Issuance) -> Result<()> {
        let Issuance {
            certificate,
            private_key,
            version,
        } = issuance;

        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(QuerySnafu {
                operation: "begin the issuance transaction",
            })?;

        tx.execute(
            "INSERT INTO certificate
                (certid, user_id, title, state, subject, parent_id, pathlev, genre, cert_req)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                certificate.certid,
                certificate.user_id,
                certificate.title,
                certificate.state,
                certificate.subject,
                certificate.parent_id,
                certificate.pathlev,
                certificate.genre,
                certificate.cert_req,
            ],
        )
        .context(QuerySnafu {
            operation: "insert the certificate",
        })?;

        tx.execute(
            "INSERT INTO private_key (keyid, private_key, create_time) VALUES (?1, ?2, ?3)",
            params![
                private_key.keyid,
                private_key.private_key.as_str(),
                private_key.create_time,
            ],
        )
        .context(QuerySnafu {
            operation: "insert the private key",
        })?;

        tx.execute(
            "INSERT INTO version
                (certid, keyid, serial, cert, effective_time, expiration_time, revocation_time, alarm)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                version.certid,
                version.keyid,
                version.serial,
                version.cert,
                version.effective_time,
                version.expiration_time,
                version.revocation_time,
                version.alarm,
            ],
        )
        .context(QuerySnafu {
            operation: "insert the certificate version",
        })?;

        tx.commit().context(CommitSnafu {
            operation: "record the issuance",
        })?;

        debug!(certificate.serial = %version.serial, "recorded issuance");
        Ok(())
    }

    pub fn find_creator(&self, user_id: &str) -> Result<Option<Creator>> {
        self.connection()?
            .query_row(
                "SELECT id, user_id, name FROM creator WHERE user_id = ?1",
                [user_id],
                Creator::from_row,
            )
            .optional()
            .context(QuerySnafu {
                operation: "find the creator",
            })
    }

    pub fn find_certificate(&self, certid: &str) -> Result<Option<CertificateRecord>> {
        self.connection()?
            .query_row(
                "SELECT certid, user_id, title, state, subject, parent_id, pathlev, genre, cert_req
                 FROM certificate WHERE certid = ?1",
                [certid],
                CertificateRecord::from_row,
            )
            .optional()
            .context(QuerySnafu {
                operation: "find the certificate",
            })
    }

    /// Lists the certificates of a creator in the order they were issued.
    pub fn list_certificates(&self, user_id: &str) -> Result<Vec<CertificateRecord>> {
        let operation = "list the certificates";
        let conn = self.connection()?;
        let mut statement = conn
            .prepare(
                "SELECT certid, user_id, title, state, subject, parent_id, pathlev, genre, cert_req
                 FROM certificate WHERE user_id = ?1 ORDER BY id",
            )
            .context(QuerySnafu { operation })?;

        statement
            .query_map([user_id], CertificateRecord::from_row)
            .context(QuerySnafu { operation })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context(QuerySnafu { operation })
    }

    /// Returns the most recently written version of a certificate.
    pub fn latest_version(&self, certid: &str) -> Result<Option<VersionRecord>> {
        self.connection()?
            .query_row(
                "SELECT certid, keyid, serial, cert, effective_time, expiration_time,
                        revocation_time, alarm
                 FROM version WHERE certid = ?1 ORDER BY id DESC LIMIT 1",
                [certid],
                VersionRecord::from_row,
            )
            .optional()
            .context(QuerySnafu {
                operation: "find the latest certificate version",
            })
    }

    pub fn find_private_key(&self, keyid: &str) -> Result<Option<PrivateKeyRecord>> {
        self.connection()?
            .query_row(
                "SELECT keyid, private_key, create_time FROM private_key WHERE keyid = ?1",
                [keyid],
                PrivateKeyRecord::from_row,
            )
            .optional()
            .context(QuerySnafu {
                operation: "find the private key",
            })
    }
}
