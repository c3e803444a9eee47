//! PKCS#10 certificate signing requests (CSRs).
//!
//! A [`SigningRequest`] binds a [`Profile`] to a public key and is signed by
//! the matching private key. The contents of a request must not be trusted
//! before [`SigningRequest::verify`] succeeded.
use const_oid::{
    AssociatedOid, ObjectIdentifier,
    db::{
        rfc5912::{
            ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ECDSA_WITH_SHA_512, ID_EC_PUBLIC_KEY,
            RSA_ENCRYPTION, SHA_256_WITH_RSA_ENCRYPTION,
        },
        rfc8410::ID_ED_25519,
    },
};
use p256::NistP256;
use p384::NistP384;
use p521::NistP521;
use signature::Verifier;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument, warn};
use x509_cert::{
    der::{Decode, DecodePem, Encode, EncodePem, pem::LineEnding},
    ext::pkix::SubjectAltName,
    name::Name,
    request::{CertReq, ExtensionReq},
    spki::{DecodePublicKey, SubjectPublicKeyInfoOwned},
};

use crate::{
    ErrorKind,
    keys::{KeyPair, ecdsa::Curve},
    profile::{self, Profile},
    template,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to build the request subject"))]
    Profile { source: profile::Error },

    #[snafu(display("failed to sign the request"))]
    Sign { source: template::Error },

    #[snafu(display("failed to encode the request as {format}"))]
    Encode {
        source: x509_cert::der::Error,
        format: &'static str,
    },

    #[snafu(display("failed to decode the request from {format}"))]
    Decode {
        source: x509_cert::der::Error,
        format: &'static str,
    },

    #[snafu(display("failed to decode the requested extensions"))]
    DecodeExtensions { source: x509_cert::der::Error },

    #[snafu(display("public key algorithm {oid} is not supported"))]
    UnsupportedKeyType { oid: ObjectIdentifier },

    #[snafu(display(
        "signature algorithm {signature_algorithm} does not match the {key_algorithm} public key"
    ))]
    AlgorithmMismatch {
        signature_algorithm: ObjectIdentifier,
        key_algorithm: String,
    },

    #[snafu(display("the request signature does not verify against the embedded public key"))]
    SignatureInvalid,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Profile { source } => source.kind(),
            Error::Sign { source } => source.kind(),
            Error::Decode { .. } | Error::DecodeExtensions { .. } => ErrorKind::UnsupportedParameter,
            Error::Encode { .. } => ErrorKind::SigningError,
            Error::UnsupportedKeyType { .. } => ErrorKind::UnsupportedKeyType,
            Error::AlgorithmMismatch { .. } | Error::SignatureInvalid => {
                ErrorKind::SignatureInvalid
            }
        }
    }
}

/// Verifies a DER encoded ECDSA signature for the given curve. Any decoding
/// failure counts as an invalid signature.
macro_rules! verify_ecdsa {
    ($curve:ty, $public_key_der:expr, $message:expr, $signature:expr) => {{
        let key = ::ecdsa::VerifyingKey::<$curve>::from_public_key_der($public_key_der).ok();
        let signature = ::ecdsa::der::Signature::<$curve>::from_bytes($signature).ok();

        key.zip(signature)
            .is_some_and(|(key, signature)| key.verify($message, &signature).is_ok())
    }};
}

/// A PKCS#10 certificate signing request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningRequest(CertReq);

impl SigningRequest {
    /// Builds a request for the subject and alternative names of `profile`
    /// and signs it with `key_pair`.
    ///
    /// The alternative names are placed into an extensionRequest attribute.
    #[instrument(name = "build_signing_request", skip_all, fields(
        subject = %profile.subject_string(),
        key.algorithm = %key_pair.algorithm(),
    ))]
    pub fn build(profile: &Profile, key_pair: &KeyPair) -> Result<Self> {
        let subject = profile.subject().context(ProfileSnafu)?;
        let subject_alt_name = profile.subject_alt_name().context(ProfileSnafu)?;

        let request = template::sign_request(key_pair, subject, subject_alt_name.as_ref())
            .context(SignSnafu)?;

        debug!(
            request.signature_algorithm = %request.algorithm.oid,
            "built certificate signing request"
        );
        Ok(Self(request))
    }

    /// Verifies the self-signature of the request against its embedded
    /// public key.
    ///
    /// Supported are sha256WithRSAEncryption, ecdsa-with-SHA256/384/512 (the
    /// digest must match the curve) and Ed25519.
    #[instrument(name = "verify_signing_request", skip_all, fields(subject = %self.subject()))]
    pub fn verify(&self) -> Result<()> {
        let message = self.0.info.to_der().context(EncodeSnafu { format: "DER" })?;
        let signature = self.0.signature.raw_bytes();
        let signature_algorithm = self.0.algorithm.oid;

        let public_key_info = self.public_key_info();
        let public_key_der = public_key_info
            .to_der()
            .context(EncodeSnafu { format: "DER" })?;

        let valid = match public_key_info.algorithm.oid {
            RSA_ENCRYPTION => {
                ensure!(
                    signature_algorithm == SHA_256_WITH_RSA_ENCRYPTION,
                    AlgorithmMismatchSnafu {
                        signature_algorithm,
                        key_algorithm: "RSA"
                    }
                );
                verify_rsa(&public_key_der, &message, signature)
            }
            ID_EC_PUBLIC_KEY => {
                let curve = public_key_info
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|parameters| parameters.decode_as::<ObjectIdentifier>().ok())
                    .and_then(|oid| Curve::from_oid(&oid))
                    .context(UnsupportedKeyTypeSnafu {
                        oid: public_key_info.algorithm.oid,
                    })?;

                let expected = match curve {
                    Curve::P256 => ECDSA_WITH_SHA_256,
                    Curve::P384 => ECDSA_WITH_SHA_384,
                    Curve::P521 => ECDSA_WITH_SHA_512,
                };
                ensure!(
                    signature_algorithm == expected,
                    AlgorithmMismatchSnafu {
                        signature_algorithm,
                        key_algorithm: curve.to_string()
                    }
                );

                match curve {
                    Curve::P256 => verify_ecdsa!(NistP256, &public_key_der, &message, signature),
                    Curve::P384 => verify_ecdsa!(NistP384, &public_key_der, &message, signature),
                    Curve::P521 => verify_p521(&public_key_der, &message, signature),
                }
            }
            ID_ED_25519 => {
                ensure!(
                    signature_algorithm == ID_ED_25519,
                    AlgorithmMismatchSnafu {
                        signature_algorithm,
                        key_algorithm: "Ed25519"
                    }
                );
                verify_ed25519(&public_key_der, &message, signature)
            }
            oid => return UnsupportedKeyTypeSnafu { oid }.fail(),
        };

        if !valid {
            warn!("rejecting certificate signing request with an invalid signature");
        }
        ensure!(valid, SignatureInvalidSnafu);

        Ok(())
    }

    pub fn subject(&self) -> &Name {
        &self.0.info.subject
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.0.info.public_key
    }

    /// Returns the SubjectAltName extension requested in the
    /// extensionRequest attribute, if any.
    pub fn subject_alt_name(&self) -> Result<Option<SubjectAltName>> {
        for attribute in self.0.info.attributes.iter() {
            if attribute.oid != ExtensionReq::OID {
                continue;
            }

            for value in attribute.values.iter() {
                let der = value.to_der().context(DecodeExtensionsSnafu)?;
                let extensions = ExtensionReq::from_der(&der).context(DecodeExtensionsSnafu)?;

                if let Some(extension) = extensions
                    .0
                    .iter()
                    .find(|extension| extension.extn_id == SubjectAltName::OID)
                {
                    let subject_alt_name =
                        SubjectAltName::from_der(extension.extn_value.as_bytes())
                            .context(DecodeExtensionsSnafu)?;
                    return Ok(Some(subject_alt_name));
                }
            }
        }

        Ok(None)
    }

    /// Recovers the subject profile (subject attributes and alternative
    /// names) from the request.
    pub fn profile(&self) -> Result<Profile> {
        let subject_alt_name = self.subject_alt_name()?;
        Ok(Profile::from_name(self.subject(), subject_alt_name.as_ref()))
    }

    pub fn as_cert_req(&self) -> &CertReq {
        &self.0
    }

    pub fn to_pem(&self, line_ending: LineEnding) -> Result<String> {
        self.0.to_pem(line_ending).context(EncodeSnafu { format: "PEM" })
    }

    pub fn from_pem(input: &str) -> Result<Self> {
        CertReq::from_pem(input.as_bytes())
            .map(Self)
            .context(DecodeSnafu { format: "PEM" })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.0.to_der().context(EncodeSnafu { format: "DER" })
    }

    pub fn from_der(input: &[u8]) -> Result<Self> {
        CertReq::from_der(input)
            .map(Self)
            .context(DecodeSnafu { format: "DER" })
    }
}

impl From<CertReq> for SigningRequest {
    fn from(request: CertReq) -> Self {
        Self(request)
    }
}

fn verify_rsa(public_key_der: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = rsa::RsaPublicKey::from_public_key_der(public_key_der) else {
        return false;
    };
    let Ok(signature) = rsa::pkcs1v15::Signature::try_from(signature) else {
        return false;
    };

    rsa::pkcs1v15::VerifyingKey::<sha2::Sha256>::new(public_key)
        .verify(message, &signature)
        .is_ok()
}

/// P-521 has no default digest, the curve crate verifies with SHA-512.
fn verify_p521(public_key_der: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let key = ::ecdsa::VerifyingKey::<NistP521>::from_public_key_der(public_key_der)
        .ok()
        .map(p521::ecdsa::VerifyingKey::from);
    let signature = p521::ecdsa::Signature::from_der(signature).ok();

    key.zip(signature)
        .is_some_and(|(key, signature)| key.verify(message, &signature).is_ok())
}

fn verify_ed25519(public_key_der: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = ed25519_dalek::VerifyingKey::from_public_key_der(public_key_der) else {
        return false;
    };
    let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
        return false;
    };

    public_key.verify(message, &signature).is_ok()
}
