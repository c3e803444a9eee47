//! Command line arguments of the `spki` binary.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use spki_telemetry::tracing::TelemetryOptions;

use crate::{cipher::SECRET_KEY_ENV, config::DEFAULT_CONFIG_PATH};

#[derive(Debug, Parser)]
#[command(name = "spki", author, version, about, long_about = None)]
pub struct Cli {
    /// Path of the YAML configuration file.
    ///
    /// If not given, `spki.yaml` in the working directory is read if it exists,
    /// otherwise built-in defaults are used.
    #[arg(short, long, env = "SPKI_CONFIG", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The 256-bit secret key as 64 hex digits.
    ///
    /// Required to encrypt and decrypt configuration secrets.
    #[arg(long, env = SECRET_KEY_ENV, hide_env_values = true, global = true)]
    pub secret_key: Option<String>,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// The explicitly passed configuration file, or the default one if it
    /// exists.
    pub fn config_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(path.clone()),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                path.is_file().then_some(path)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypts a secret for the configuration file and prints the hex
    /// ciphertext.
    Encrypt {
        /// The secret to encrypt.
        plain: String,
    },

    /// Decrypts a hex ciphertext produced by `encrypt`.
    Decrypt { ciphertext: String },

    /// Bootstraps a self-signed root CA into a certificate and a private key
    /// file, without touching the credential store.
    InitCa(InitCaArgs),

    /// Issues a root CA for a user and stores it in the credential store.
    IssueCa(IssueArgs),

    /// Issues a leaf certificate signed by one of the user's root CAs.
    IssueLeaf(IssueArgs),
}

#[derive(Debug, Args)]
pub struct InitCaArgs {
    /// JSON file containing the root request.
    #[arg(long, value_name = "FILE")]
    pub request: PathBuf,

    #[arg(long, value_name = "FILE", default_value = "ca.pem")]
    pub cert_out: PathBuf,

    #[arg(long, value_name = "FILE", default_value = "ca-key.pem")]
    pub key_out: PathBuf,
}

#[derive(Debug, Args)]
pub struct IssueArgs {
    /// JSON file containing the issuance request.
    #[arg(long, value_name = "FILE")]
    pub request: PathBuf,

    /// The user the certificate is issued for.
    #[arg(long, env = "SPKI_USER_ID")]
    pub user_id: String,

    /// Display name of the user, recorded when the user issues their first
    /// certificate.
    #[arg(long, env = "SPKI_ACCOUNT")]
    pub account: String,
}
