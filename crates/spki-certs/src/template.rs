//! Signing of certificate and request templates with any supported
//! [`KeyPair`].
//!
//! The [`x509_cert::builder`] is generic over the signing key and the
//! signature type. The key pairs in this crate are a closed enum, so this
//! module is the single place which maps every variant to its concrete
//! signer and signature types.
use std::time::Duration;

use p256::NistP256;
use p384::NistP384;
use p521::NistP521;
use signature::{Keypair, Signer};
use snafu::{ResultExt, Snafu};
use x509_cert::{
    Certificate,
    builder::{Builder, CertificateBuilder, Profile, RequestBuilder},
    ext::pkix::{
        AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAltName,
        SubjectKeyIdentifier,
    },
    name::Name,
    request::CertReq,
    serial_number::SerialNumber,
    spki::{
        DynSignatureAlgorithmIdentifier, EncodePublicKey, SignatureBitStringEncoding,
        SubjectPublicKeyInfoOwned,
    },
    time::{Time, Validity},
};

use crate::{
    ErrorKind,
    keys::{KeyPair, ecdsa, ed25519},
};

/// Seconds per day, validity windows are requested in days.
pub(crate) const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("validity must be at least one day"))]
    ZeroValidity,

    #[snafu(display("failed to compute a validity of {days} days from now"))]
    ComputeValidity {
        source: x509_cert::der::Error,
        days: u64,
    },

    #[snafu(display("failed to encode the serial number"))]
    EncodeSerialNumber { source: x509_cert::der::Error },

    #[snafu(display("failed to create the certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to create the request builder"))]
    CreateRequestBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add the {extension} extension"))]
    AddExtension {
        source: x509_cert::builder::Error,
        extension: &'static str,
    },

    #[snafu(display("failed to sign the certificate"))]
    SignCertificate { source: x509_cert::builder::Error },

    #[snafu(display("failed to sign the certificate signing request"))]
    SignRequest { source: x509_cert::builder::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ZeroValidity => ErrorKind::UnsupportedParameter,
            _ => ErrorKind::SigningError,
        }
    }
}

/// Extensions placed into a certificate template.
///
/// The builder only accepts concrete extension types, this enum keeps them
/// in one list in the order they are added.
#[derive(Debug)]
pub(crate) enum TemplateExtension {
    BasicConstraints(BasicConstraints),
    KeyUsage(KeyUsage),
    ExtendedKeyUsage(ExtendedKeyUsage),
    SubjectKeyIdentifier(SubjectKeyIdentifier),
    AuthorityKeyIdentifier(AuthorityKeyIdentifier),
    SubjectAltName(SubjectAltName),
}

impl TemplateExtension {
    fn name(&self) -> &'static str {
        match self {
            TemplateExtension::BasicConstraints(_) => "BasicConstraints",
            TemplateExtension::KeyUsage(_) => "KeyUsage",
            TemplateExtension::ExtendedKeyUsage(_) => "ExtendedKeyUsage",
            TemplateExtension::SubjectKeyIdentifier(_) => "SubjectKeyIdentifier",
            TemplateExtension::AuthorityKeyIdentifier(_) => "AuthorityKeyIdentifier",
            TemplateExtension::SubjectAltName(_) => "SubjectAltName",
        }
    }

    fn add_to<S>(&self, builder: &mut CertificateBuilder<'_, S>) -> Result<()>
    where
        S: Keypair + DynSignatureAlgorithmIdentifier,
        S::VerifyingKey: EncodePublicKey,
    {
        match self {
            TemplateExtension::BasicConstraints(ext) => builder.add_extension(ext),
            TemplateExtension::KeyUsage(ext) => builder.add_extension(ext),
            TemplateExtension::ExtendedKeyUsage(ext) => builder.add_extension(ext),
            TemplateExtension::SubjectKeyIdentifier(ext) => builder.add_extension(ext),
            TemplateExtension::AuthorityKeyIdentifier(ext) => builder.add_extension(ext),
            TemplateExtension::SubjectAltName(ext) => builder.add_extension(ext),
        }
        .context(AddExtensionSnafu {
            extension: self.name(),
        })
    }
}

/// Everything needed to sign a certificate, except for the signing key.
#[derive(Debug)]
pub(crate) struct CertificateTemplate {
    /// The issuer name, [`None`] for self-signed certificates.
    pub issuer: Option<Name>,
    pub serial_number: SerialNumber,
    pub validity: Validity,
    pub subject: Name,
    pub public_key_info: SubjectPublicKeyInfoOwned,
    pub extensions: Vec<TemplateExtension>,
}

/// Generates a random serial number, uniformly distributed over
/// `[0, 2^127)`. Keeping the top bit clear keeps the DER encoding positive
/// without a padding byte.
pub(crate) fn random_serial_number() -> Result<SerialNumber> {
    let value = rand::random::<u128>() >> 1;
    SerialNumber::new(&value.to_be_bytes()).context(EncodeSerialNumberSnafu)
}

/// Returns the validity window `[now, now + days)`.
pub(crate) fn validity_from_now(days: u64) -> Result<Validity> {
    snafu::ensure!(days > 0, ZeroValiditySnafu);

    let duration = Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY));
    Validity::from_now(duration).context(ComputeValiditySnafu { days })
}

/// Moves `not_after` back to `limit` if it lies beyond it. Returns `true` if
/// the validity was shortened.
pub(crate) fn clamp_not_after(validity: &mut Validity, limit: Time) -> bool {
    if validity.not_after.to_unix_duration() <= limit.to_unix_duration() {
        return false;
    }

    validity.not_after = limit;
    true
}

fn build_certificate<S, Sig>(template: CertificateTemplate, signer: &S) -> Result<Certificate>
where
    S: Keypair + DynSignatureAlgorithmIdentifier + Signer<Sig>,
    S::VerifyingKey: EncodePublicKey,
    Sig: SignatureBitStringEncoding,
{
    let CertificateTemplate {
        issuer,
        serial_number,
        validity,
        subject,
        public_key_info,
        extensions,
    } = template;

    // The manual profile adds no extensions on its own, all of them are
    // taken from the template.
    let mut builder = CertificateBuilder::new(
        Profile::Manual { issuer },
        serial_number,
        validity,
        subject,
        public_key_info,
        signer,
    )
    .context(CreateCertificateBuilderSnafu)?;

    for extension in &extensions {
        extension.add_to(&mut builder)?;
    }

    builder.build::<Sig>().context(SignCertificateSnafu)
}

fn build_request<S, Sig>(
    subject: Name,
    subject_alt_name: Option<&SubjectAltName>,
    signer: &S,
) -> Result<CertReq>
where
    S: Keypair + DynSignatureAlgorithmIdentifier + Signer<Sig>,
    S::VerifyingKey: EncodePublicKey,
    Sig: SignatureBitStringEncoding,
{
    let mut builder = RequestBuilder::new(subject, signer).context(CreateRequestBuilderSnafu)?;

    if let Some(subject_alt_name) = subject_alt_name {
        builder
            .add_extension(subject_alt_name)
            .context(AddExtensionSnafu {
                extension: "SubjectAltName",
            })?;
    }

    builder.build::<Sig>().context(SignRequestSnafu)
}

/// Signs the template with the given key pair, picking the signature
/// algorithm matching the key: SHA-256 with RSA (PKCS#1 v1.5), ECDSA with the
/// SHA-2 digest of the curve size, or Ed25519.
pub(crate) fn sign_certificate(
    key_pair: &KeyPair,
    template: CertificateTemplate,
) -> Result<Certificate> {
    match key_pair {
        KeyPair::Rsa(key) => {
            build_certificate::<_, rsa::pkcs1v15::Signature>(template, key.signing_key())
        }
        KeyPair::Ecdsa(ecdsa::SigningKey::P256(key)) => {
            build_certificate::<_, ::ecdsa::der::Signature<NistP256>>(template, key)
        }
        KeyPair::Ecdsa(ecdsa::SigningKey::P384(key)) => {
            build_certificate::<_, ::ecdsa::der::Signature<NistP384>>(template, key)
        }
        KeyPair::Ecdsa(ecdsa::SigningKey::P521(key)) => {
            build_certificate::<_, ::ecdsa::der::Signature<NistP521>>(template, key)
        }
        KeyPair::Ed25519(key) => build_certificate::<_, ed25519::Signature>(template, key),
    }
}

/// Builds and signs a PKCS#10 request for `subject` with the given key pair.
pub(crate) fn sign_request(
    key_pair: &KeyPair,
    subject: Name,
    subject_alt_name: Option<&SubjectAltName>,
) -> Result<CertReq> {
    match key_pair {
        KeyPair::Rsa(key) => build_request::<_, rsa::pkcs1v15::Signature>(
            subject,
            subject_alt_name,
            key.signing_key(),
        ),
        KeyPair::Ecdsa(ecdsa::SigningKey::P256(key)) => {
            build_request::<_, ::ecdsa::der::Signature<NistP256>>(subject, subject_alt_name, key)
        }
        KeyPair::Ecdsa(ecdsa::SigningKey::P384(key)) => {
            build_request::<_, ::ecdsa::der::Signature<NistP384>>(subject, subject_alt_name, key)
        }
        KeyPair::Ecdsa(ecdsa::SigningKey::P521(key)) => {
            build_request::<_, ::ecdsa::der::Signature<NistP521>>(subject, subject_alt_name, key)
        }
        KeyPair::Ed25519(key) => {
            build_request::<_, ed25519::Signature>(subject, subject_alt_name, key)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn serial_numbers_are_positive_and_distinct() {
        let serials = (0..64)
            .map(|_| random_serial_number().unwrap())
            .collect::<Vec<_>>();

        for serial in &serials {
            assert!(serial.as_bytes().len() <= 16);
            assert!(serial.as_bytes()[0] & 0x80 == 0);
        }

        let unique = serials
            .iter()
            .map(|serial| serial.as_bytes().to_vec())
            .collect::<HashSet<_>>();
        assert_eq!(unique.len(), serials.len());
    }

    #[test]
    fn zero_day_validity() {
        let err = validity_from_now(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedParameter);
    }

    #[test]
    fn validity_spans_whole_days() {
        let validity = validity_from_now(365).unwrap();
        let span = validity.not_after.to_unix_duration() - validity.not_before.to_unix_duration();
        assert_eq!(span, Duration::from_secs(365 * SECONDS_PER_DAY));
    }

    #[test]
    fn clamping() {
        let limit = validity_from_now(10).unwrap().not_after;

        let mut long = validity_from_now(365).unwrap();
        assert!(clamp_not_after(&mut long, limit));
        assert_eq!(long.not_after, limit);

        let mut short = validity_from_now(5).unwrap();
        let before = short.not_after;
        assert!(!clamp_not_after(&mut short, limit));
        assert_eq!(short.not_after, before);
    }
}
