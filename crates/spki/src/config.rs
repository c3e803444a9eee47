//! The YAML configuration file of the service.
//!
//! ```yaml
//! spki:
//!   database:
//!     path: /var/lib/spki/spki.db
//!     passwd: <hex ciphertext produced by `spki encrypt`>
//!     pool_size: 8
//!     connection_timeout_secs: 5
//!   log:
//!     level: info
//!   issuance:
//!     min_rsa_bits: 2048
//!     default_skid_policy: sha256
//!     leaf_validity_days: 365
//! ```
//!
//! Every section and field is optional. A missing database path keeps the
//! credential store in memory.
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};
use spki_certs::{
    ca::DEFAULT_CERTIFICATE_VALIDITY_DAYS,
    keys::{DEFAULT_MIN_RSA_KEY_SIZE, KeyPolicy},
    skid::SkidPolicy,
};
use spki_store::{DEFAULT_POOL_SIZE, StoreOptions};
use tracing::{info, level_filters::LevelFilter};
use zeroize::Zeroizing;

use crate::cipher::{self, SecretCipher};

/// The path used if none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "spki.yaml";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read the configuration file {}", path.display()))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse the configuration"))]
    Parse { source: serde_yaml::Error },

    #[snafu(display(
        "the database password is encrypted, but no secret key was provided through {}",
        cipher::SECRET_KEY_ENV
    ))]
    MissingSecretKey,

    #[snafu(display("failed to decrypt the database password"))]
    DecryptPassword { source: cipher::Error },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    spki: Config,
}

/// The parsed configuration.
///
/// It is constructed once at startup and handed to the components which
/// need it.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub issuance: IssuanceConfig,
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,

    /// The database password, encrypted with the secret cipher.
    #[serde(rename = "passwd")]
    encrypted_password: Option<String>,

    #[serde(skip)]
    password: Option<Zeroizing<String>>,

    pub pool_size: u32,
    pub connection_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            encrypted_password: None,
            password: None,
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout_secs: 5,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("path", &self.path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pool_size", &self.pool_size)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::builder()
            .maybe_path(self.path.clone())
            .maybe_key(self.password.clone())
            .pool_size(self.pool_size)
            .connection_timeout(Duration::from_secs(self.connection_timeout_secs))
            .build()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: LogLevel,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IssuanceConfig {
    /// RSA keys shorter than this are rejected.
    pub min_rsa_bits: usize,

    /// Used when a request does not name a subject key identifier policy.
    pub default_skid_policy: SkidPolicy,

    /// Used when a leaf request does not specify its validity.
    pub leaf_validity_days: u64,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            min_rsa_bits: DEFAULT_MIN_RSA_KEY_SIZE,
            default_skid_policy: SkidPolicy::default(),
            leaf_validity_days: DEFAULT_CERTIFICATE_VALIDITY_DAYS,
        }
    }
}

impl IssuanceConfig {
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            min_rsa_bits: self.min_rsa_bits,
        }
    }
}

impl Config {
    /// Reads and parses the configuration file at `path`.
    ///
    /// An encrypted database password is decrypted right away, which requires
    /// the `cipher`.
    pub fn load(path: &Path, cipher: Option<&SecretCipher>) -> Result<Self> {
        info!(path = %path.display(), "reading configuration file");
        let contents = fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_yaml(&contents, cipher)
    }

    pub fn from_yaml(contents: &str, cipher: Option<&SecretCipher>) -> Result<Self> {
        let ConfigFile { spki: mut config } =
            serde_yaml::from_str(contents).context(ParseSnafu)?;

        if let Some(encrypted) = config.database.encrypted_password.take() {
            let cipher = cipher.context(MissingSecretKeySnafu)?;
            let password = cipher.decrypt(&encrypted).context(DecryptPasswordSnafu)?;
            config.database.password = Some(password);
        }

        Ok(config)
    }
}
