//! Contains types and functions to generate self-signed root certificate
//! authorities (CAs) and to load them back from their PEM encoding.
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::{
    Certificate, der::DecodePem, name::Name, serial_number::SerialNumber, time::Validity,
};

use crate::{
    CertificateExt, CertificatePair, CertificatePairError, ErrorKind,
    cert_builder::{CertificateBuilder, CreateCertificateError},
    csr::SigningRequest,
    keys::{self, KeyPair},
};

mod ca_builder;
mod consts;
pub use ca_builder::*;
pub use consts::*;

/// Errors which can occur when loading an existing CA.
#[derive(Debug, Snafu)]
pub enum LoadCertificateAuthorityError {
    #[snafu(display("failed to decode the CA certificate from PEM"))]
    DecodeCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to decode the CA private key from PEM"))]
    DecodePrivateKey { source: keys::Error },

    #[snafu(display("failed to pair the CA certificate with its private key"))]
    PairCertificate { source: CertificatePairError },

    #[snafu(display("certificate {subject} is not a certificate authority"))]
    NotCertificateAuthority { subject: String },
}

impl LoadCertificateAuthorityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DecodePrivateKey { source } => source.kind(),
            Self::DecodeCertificate { .. }
            | Self::PairCertificate { .. }
            | Self::NotCertificateAuthority { .. } => ErrorKind::UnsupportedParameter,
        }
    }
}

/// A certificate authority (CA) which is used to sign leaf certificates.
///
/// The certificate always carries `CA=true` in its BasicConstraints and the
/// key pair always matches the certificate's public key.
///
/// Use [`CertificateAuthorityBuilder`] to create new CAs.
#[derive(Debug)]
pub struct CertificateAuthority {
    certificate_pair: CertificatePair,
}

impl CertificateAuthority {
    /// Wraps an existing certificate pair, which must be a CA.
    pub fn new(certificate_pair: CertificatePair) -> Result<Self, LoadCertificateAuthorityError> {
        let certificate = certificate_pair.certificate();
        ensure!(
            certificate.is_ca(),
            NotCertificateAuthoritySnafu {
                subject: certificate.tbs_certificate.subject.to_string()
            }
        );

        Ok(Self { certificate_pair })
    }

    /// Loads a CA from its PEM-encoded certificate and private key, like they
    /// are kept in the credential store.
    #[instrument(name = "load_certificate_authority", skip_all)]
    pub fn from_pem(
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<Self, LoadCertificateAuthorityError> {
        let certificate =
            Certificate::from_pem(certificate_pem.as_bytes()).context(DecodeCertificateSnafu)?;
        let key_pair = KeyPair::from_pem(private_key_pem).context(DecodePrivateKeySnafu)?;
        let certificate_pair =
            CertificatePair::new(certificate, key_pair).context(PairCertificateSnafu)?;

        Self::new(certificate_pair)
    }

    /// Use this function in combination with [`CertificateAuthorityBuilder`] to create new CAs.
    pub fn builder<'a>() -> CertificateAuthorityBuilderBuilder<'a> {
        CertificateAuthorityBuilder::start_builder()
    }

    /// Signs a leaf certificate for the (re-verified) request with the
    /// default validity.
    pub fn sign_request(
        &self,
        request: &SigningRequest,
    ) -> Result<Certificate, CreateCertificateError> {
        CertificateBuilder::builder()
            .request(request)
            .signed_by(self)
            .build()
    }

    pub fn ca_cert(&self) -> &Certificate {
        self.certificate_pair.certificate()
    }

    pub fn key_pair(&self) -> &KeyPair {
        self.certificate_pair.key_pair()
    }

    pub fn certificate_pair(&self) -> &CertificatePair {
        &self.certificate_pair
    }

    /// The subject of the CA, which is the issuer of all certificates it
    /// signs.
    pub fn subject_name(&self) -> &Name {
        &self.ca_cert().tbs_certificate.subject
    }

    pub fn serial_number(&self) -> &SerialNumber {
        &self.ca_cert().tbs_certificate.serial_number
    }

    pub fn validity(&self) -> &Validity {
        &self.ca_cert().tbs_certificate.validity
    }

    pub fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        self.ca_cert().subject_key_identifier()
    }
}
