//! A small public key infrastructure service.
//!
//! Users obtain self-signed root certificate authorities and leaf
//! certificates signed by them. Every issued certificate is stored together
//! with its private key in the credential store, see [`spki_store`].
//!
//! - [`issuance`]: The issuance workflow behind an [`access::AccessCheck`].
//! - [`config`]: The YAML configuration file.
//! - [`cipher`]: Encryption of configuration secrets.
pub mod access;
pub mod cipher;
pub mod cli;
pub mod config;
pub mod error;
pub mod issuance;
pub mod request;

pub use error::{ErrorBody, ErrorCode};
pub use issuance::IssuanceService;
