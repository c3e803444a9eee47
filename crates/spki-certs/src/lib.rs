//! This crate provides types, traits and functions to work with X.509
//! certificates. It can be used to create self-signed root certificate
//! authorities (CAs) which can sign leaf certificates requested through
//! PKCS#10 certificate signing requests (CSRs).
//!
//! The building blocks are, from the bottom up:
//!
//! - [`keys`]: RSA, ECDSA (P-256, P-384, P-521) and Ed25519 key pairs and
//!   their PEM encodings.
//! - [`skid`]: Subject key identifiers derived from public keys.
//! - [`profile`]: The subject name and subject alternative names requested
//!   for a certificate.
//! - [`csr`]: Building and verifying certificate signing requests.
//! - [`ca`]: Self-signed root CAs.
//! - [`cert_builder`]: Leaf certificates signed by a CA.
//!
//! ## References
//!
//! - <https://cabforum.org/uploads/CA-Browser-Forum-TLS-BRs-v2.0.2.pdf>
//! - <https://datatracker.ietf.org/doc/html/rfc5280>
//! - <https://datatracker.ietf.org/doc/html/rfc2986>
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};

use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{
    Certificate,
    der::{DecodePem, EncodePem, pem::LineEnding},
};

use crate::keys::KeyPair;

pub mod ca;
pub mod cert_builder;
pub mod certificate;
pub mod csr;
pub mod keys;
pub mod profile;
pub mod skid;

mod template;

pub use certificate::CertificateExt;

/// Coarse classification of every failure this crate can produce.
///
/// Callers which need to surface a stable error code, like the issuance
/// service, only have to look at this instead of matching every variant of
/// every module-level error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    /// A key algorithm, key size, validity or naming parameter was rejected.
    UnsupportedParameter,

    /// The subject key identifier policy is unknown.
    UnsupportedPolicy,

    /// A certificate signing request failed signature verification.
    SignatureInvalid,

    /// A request which already crossed a trust boundary failed to verify
    /// right before signing.
    UntrustedRequest,

    /// The underlying cryptographic or encoding operation failed.
    SigningError,

    /// The key material has a shape no signature algorithm is known for.
    UnsupportedKeyType,
}

/// Error variants which can be encountered when reading or writing a
/// [`CertificatePair`].
#[derive(Debug, Snafu)]
pub enum CertificatePairError {
    #[snafu(display("failed to serialize certificate as PEM"))]
    SerializeCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to deserialize certificate from PEM"))]
    DeserializeCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to serialize private key as PEM"))]
    SerializePrivateKey { source: keys::Error },

    #[snafu(display("failed to deserialize private key from PEM"))]
    DeserializePrivateKey { source: keys::Error },

    #[snafu(display("failed to encode the public key of the private key"))]
    EncodePublicKey { source: keys::Error },

    #[snafu(display("the private key does not belong to the certificate"))]
    KeyMismatch,

    #[snafu(display("failed to write file {path:?}"))]
    WriteFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to read file {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
}

/// Custom implementation of [`std::cmp::PartialEq`] because [`std::io::Error`] doesn't implement it, but [`std::io::ErrorKind`] does.
impl PartialEq for CertificatePairError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::WriteFile {
                    source: lhs_source,
                    path: lhs_path,
                },
                Self::WriteFile {
                    source: rhs_source,
                    path: rhs_path,
                },
            )
            | (
                Self::ReadFile {
                    source: lhs_source,
                    path: lhs_path,
                },
                Self::ReadFile {
                    source: rhs_source,
                    path: rhs_path,
                },
            ) => lhs_source.kind() == rhs_source.kind() && lhs_path == rhs_path,
            (Self::KeyMismatch, Self::KeyMismatch) => true,
            _ => false,
        }
    }
}

/// Contains the certificate and the signing / embedded key pair.
///
/// A [`CertificateAuthority`](crate::ca::CertificateAuthority) uses this struct
/// internally to store the signing key pair which is used to sign the CA
/// itself (self-signed) and all leaf certificates.
#[derive(Debug)]
pub struct CertificatePair {
    certificate: Certificate,
    key_pair: KeyPair,
}

impl CertificatePair {
    /// Bundles a certificate with its key pair, making sure the key pair
    /// actually belongs to the certificate.
    pub fn new(certificate: Certificate, key_pair: KeyPair) -> Result<Self, CertificatePairError> {
        let spki = key_pair.public_key_info().context(EncodePublicKeySnafu)?;
        ensure!(
            spki == certificate.tbs_certificate.subject_public_key_info,
            KeyMismatchSnafu
        );

        Ok(Self {
            certificate,
            key_pair,
        })
    }

    /// Returns a reference to the [`Certificate`].
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns a reference to the (signing) key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Reads in a PEM-encoded certificate from `certificate_path` and private
    /// key file from `private_key_path` and finally constructs the pair from
    /// the contents.
    #[instrument(name = "read_certificate_pair", skip_all, fields(
        certificate_path = %certificate_path.as_ref().display(),
    ))]
    pub fn from_files(
        certificate_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
    ) -> Result<Self, CertificatePairError> {
        let certificate_path = certificate_path.as_ref();
        let private_key_path = private_key_path.as_ref();

        let certificate_pem = fs::read_to_string(certificate_path).context(ReadFileSnafu {
            path: certificate_path,
        })?;
        let private_key_pem = zeroize::Zeroizing::new(
            fs::read_to_string(private_key_path).context(ReadFileSnafu {
                path: private_key_path,
            })?,
        );

        let certificate =
            Certificate::from_pem(certificate_pem.as_bytes()).context(DeserializeCertificateSnafu)?;
        let key_pair = KeyPair::from_pem(&private_key_pem).context(DeserializePrivateKeySnafu)?;

        Self::new(certificate, key_pair)
    }

    /// Writes the certificate and private key as a PEM-encoded file to
    /// `certificate_path` and `private_key_path` respectively.
    ///
    /// On Unix systems the private key file is only readable and writable by
    /// its owner.
    #[instrument(name = "write_certificate_pair", skip_all, fields(
        certificate_path = %certificate_path.as_ref().display(),
    ))]
    pub fn to_files(
        &self,
        certificate_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
        line_ending: LineEnding,
    ) -> Result<(), CertificatePairError> {
        let certificate_path = certificate_path.as_ref();
        let private_key_path = private_key_path.as_ref();

        let certificate_pem = self
            .certificate
            .to_pem(line_ending)
            .context(SerializeCertificateSnafu)?;
        let private_key_pem = self
            .key_pair
            .to_pem(line_ending)
            .context(SerializePrivateKeySnafu)?;

        fs::write(certificate_path, certificate_pem).context(WriteFileSnafu {
            path: certificate_path,
        })?;
        write_private_file(private_key_path, private_key_pem.as_bytes()).context(
            WriteFileSnafu {
                path: private_key_path,
            },
        )?;

        debug!(
            private_key_path = %private_key_path.display(),
            "wrote certificate and private key"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        ca::CertificateAuthority,
        keys::{KeyAlgorithm, KeyPolicy},
        profile::Profile,
    };

    fn ca(algorithm: KeyAlgorithm, size: u32) -> CertificateAuthority {
        let policy = KeyPolicy { min_rsa_bits: 1024 };
        let profile = Profile::builder().common_name("Files Test CA").build();

        CertificateAuthority::builder()
            .profile(&profile)
            .signing_key_pair(KeyPair::generate(algorithm, size, &policy).unwrap())
            .build()
            .unwrap()
    }

    #[rstest]
    #[case(KeyAlgorithm::Rsa, 1024)]
    #[case(KeyAlgorithm::Ecdsa, 384)]
    #[case(KeyAlgorithm::Ed25519, 0)]
    fn files_round_trip(#[case] algorithm: KeyAlgorithm, #[case] size: u32) {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.pem");
        let key_path = dir.path().join("ca-key.pem");

        let ca = ca(algorithm, size);
        ca.certificate_pair()
            .to_files(&cert_path, &key_path, LineEnding::LF)
            .unwrap();

        let pair = CertificatePair::from_files(&cert_path, &key_path).unwrap();
        assert_eq!(pair.certificate(), ca.ca_cert());
        assert_eq!(pair.key_pair().algorithm(), algorithm);
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.pem");
        let key_path = dir.path().join("ca-key.pem");

        ca(KeyAlgorithm::Ed25519, 0)
            .certificate_pair()
            .to_files(&cert_path, &key_path, LineEnding::LF)
            .unwrap();

        let mode = fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn mismatching_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.pem");
        let key_path = dir.path().join("ca-key.pem");
        let other_key_path = dir.path().join("other-key.pem");

        ca(KeyAlgorithm::Ecdsa, 256)
            .certificate_pair()
            .to_files(&cert_path, &key_path, LineEnding::LF)
            .unwrap();
        ca(KeyAlgorithm::Ecdsa, 256)
            .certificate_pair()
            .to_files(dir.path().join("other.pem"), &other_key_path, LineEnding::LF)
            .unwrap();

        let err = CertificatePair::from_files(&cert_path, &other_key_path).unwrap_err();
        assert_eq!(err, CertificatePairError::KeyMismatch);
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");

        let err = CertificatePair::from_files(&missing, &missing).unwrap_err();
        assert!(matches!(err, CertificatePairError::ReadFile { .. }));
    }
}
