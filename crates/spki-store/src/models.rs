use std::fmt;

use rusqlite::{
    Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use time::OffsetDateTime;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Generates a new 32 hex digit identifier for certificates and private keys.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The current time in unix milliseconds, as stored in timestamp columns.
pub fn now_millis() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}

pub fn unix_millis(timestamp: OffsetDateTime) -> i64 {
    (timestamp.unix_timestamp_nanos() / 1_000_000) as i64
}

/// The user on whose behalf certificates are issued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Creator {
    pub id: i64,
    pub user_id: String,
    pub name: Option<String>,
}

impl Creator {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
        })
    }
}

/// Lifecycle state of a certificate, stored as a single letter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum CertificateState {
    #[default]
    #[strum(serialize = "V")]
    Valid,

    #[strum(serialize = "R")]
    Revoked,
}

impl ToSql for CertificateState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for CertificateState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/// Distinguishes self-signed roots from the leaves they sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Genre {
    Root,
    Leaf,
}

impl Genre {
    fn code(self) -> i64 {
        match self {
            Genre::Root => 1,
            Genre::Leaf => 2,
        }
    }
}

impl ToSql for Genre {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Genre {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_i64()? {
            1 => Ok(Genre::Root),
            2 => Ok(Genre::Leaf),
            other => Err(FromSqlError::OutOfRange(other)),
        }
    }
}

/// A row of the `certificate` table. The signed material lives in
/// [`VersionRecord`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateRecord {
    pub certid: String,
    pub user_id: String,
    pub title: Option<String>,
    pub state: CertificateState,

    /// Slash-rendered subject, like `/C=DE/O=Example/CN=Example Root`.
    pub subject: String,

    /// The certificate ID of the issuer, [`None`] for roots.
    pub parent_id: Option<String>,

    /// The distance to the root, roots have path level 0.
    pub pathlev: u32,
    pub genre: Genre,

    /// The PEM-encoded CSR a leaf was issued for.
    pub cert_req: Option<String>,
}

impl CertificateRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            certid: row.get("certid")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            state: row.get("state")?,
            subject: row.get("subject")?,
            parent_id: row.get("parent_id")?,
            pathlev: row.get("pathlev")?,
            genre: row.get("genre")?,
            cert_req: row.get("cert_req")?,
        })
    }
}

/// A row of the `private_key` table.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKeyRecord {
    pub keyid: String,
    pub private_key: Zeroizing<String>,
    pub create_time: i64,
}

impl PrivateKeyRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            keyid: row.get("keyid")?,
            private_key: Zeroizing::new(row.get("private_key")?),
            create_time: row.get("create_time")?,
        })
    }
}

impl fmt::Debug for PrivateKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyRecord")
            .field("keyid", &self.keyid)
            .field("private_key", &"<redacted>")
            .field("create_time", &self.create_time)
            .finish()
    }
}

/// One signed instance of a certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionRecord {
    pub certid: String,
    pub keyid: String,

    /// Upper-case hex digits of the serial number.
    pub serial: String,

    /// The PEM-encoded certificate.
    pub cert: String,
    pub effective_time: i64,
    pub expiration_time: i64,
    pub revocation_time: Option<i64>,
    pub alarm: bool,
}

impl VersionRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            certid: row.get("certid")?,
            keyid: row.get("keyid")?,
            serial: row.get("serial")?,
            cert: row.get("cert")?,
            effective_time: row.get("effective_time")?,
            expiration_time: row.get("expiration_time")?,
            revocation_time: row.get("revocation_time")?,
            alarm: row.get("alarm")?,
        })
    }
}

/// Everything persisted for a single issuance, written atomically by
/// [`Store::record_issuance`](crate::Store::record_issuance).
#[derive(Clone, Debug)]
pub struct Issuance {
    pub certificate: CertificateRecord,
    pub private_key: PrivateKeyRecord,
    pub version: VersionRecord,
}
