//! Subject key identifiers (SKIDs) derived from public keys.
//!
//! RFC 5280, section 4.2.1.2 outlines the SHA-1 hash of the public key as one
//! method to generate key identifiers. Some CA tooling instead expects the
//! full-length SHA-256 digest. Both are supported and selected per issuance
//! via [`SkidPolicy`]. The digest is computed over the complete DER-encoded
//! SubjectPublicKeyInfo.
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use snafu::{OptionExt, ResultExt, Snafu};
use x509_cert::{
    der::{Encode, asn1::OctetString},
    ext::pkix::SubjectKeyIdentifier,
    spki::SubjectPublicKeyInfoOwned,
};

use crate::ErrorKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unsupported subject key identifier policy {policy:?}, expected hash or sha256"))]
    UnsupportedPolicy { policy: String },

    #[snafu(display("failed to encode the SubjectPublicKeyInfo"))]
    EncodePublicKeyInfo { source: x509_cert::der::Error },

    #[snafu(display("failed to wrap the key identifier in an OCTET STRING"))]
    EncodeKeyIdentifier { source: x509_cert::der::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedPolicy { .. } => ErrorKind::UnsupportedPolicy,
            Error::EncodePublicKeyInfo { .. } | Error::EncodeKeyIdentifier { .. } => {
                ErrorKind::SigningError
            }
        }
    }
}

/// Selects the digest used to derive a subject key identifier.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
pub enum SkidPolicy {
    /// The legacy 160-bit SHA-1 digest (20 bytes).
    #[serde(rename = "hash")]
    #[strum(serialize = "hash")]
    ShortHash,

    /// The 256-bit SHA-256 digest (32 bytes).
    #[default]
    #[serde(rename = "sha256")]
    #[strum(serialize = "sha256")]
    FullHash,
}

impl SkidPolicy {
    /// Parses the policy name as sent by clients, `hash` or `sha256`.
    pub fn parse(policy: &str) -> Result<Self> {
        Self::from_str(policy)
            .ok()
            .context(UnsupportedPolicySnafu { policy })
    }

    /// The length of derived identifiers in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            SkidPolicy::ShortHash => 20,
            SkidPolicy::FullHash => 32,
        }
    }
}

/// Derives the key identifier from a DER-encoded SubjectPublicKeyInfo.
pub fn derive(public_key_der: &[u8], policy: SkidPolicy) -> Vec<u8> {
    match policy {
        SkidPolicy::ShortHash => Sha1::digest(public_key_der).to_vec(),
        SkidPolicy::FullHash => Sha256::digest(public_key_der).to_vec(),
    }
}

/// Same as [`derive`], but takes the policy by name.
pub fn derive_with_policy_name(public_key_der: &[u8], policy: &str) -> Result<Vec<u8>> {
    SkidPolicy::parse(policy).map(|policy| derive(public_key_der, policy))
}

/// Builds the SubjectKeyIdentifier extension for the given public key.
pub fn subject_key_identifier(
    public_key_info: &SubjectPublicKeyInfoOwned,
    policy: SkidPolicy,
) -> Result<SubjectKeyIdentifier> {
    let der = public_key_info.to_der().context(EncodePublicKeyInfoSnafu)?;
    let key_identifier =
        OctetString::new(derive(&der, policy)).context(EncodeKeyIdentifierSnafu)?;

    Ok(SubjectKeyIdentifier(key_identifier))
}
