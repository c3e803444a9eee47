//! Abstraction layer around the [`ecdsa`] crate. This module provides types
//! which abstract away the generation of ECDSA keys used for signing of CAs
//! and other certificates.
//!
//! The NIST curves P-256, P-384 and P-521 are supported. Each curve signs with
//! the matching SHA-2 digest (SHA-256, SHA-384 and SHA-512 respectively).
use const_oid::{
    ObjectIdentifier,
    db::rfc5912::{ECDSA_WITH_SHA_512, SECP_256_R_1, SECP_384_R_1, SECP_521_R_1},
};
use p256::pkcs8::DecodePrivateKey;
use p521::NistP521;
use rand_core::{CryptoRngCore, OsRng};
use signature::{Keypair, Signer};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;
use x509_cert::{
    der::{Document, pem::LineEnding},
    spki::{AlgorithmIdentifierOwned, DynSignatureAlgorithmIdentifier, EncodePublicKey},
};
use zeroize::Zeroizing;

/// The PEM label of SEC1 encoded EC private keys.
pub const SEC1_PEM_LABEL: &str = "EC PRIVATE KEY";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unsupported ECDSA key size {size}, expected one of 256, 384 or 521"))]
    UnsupportedCurveSize { size: u32 },

    #[snafu(display("failed to serialize ECDSA key as PEM-encoded SEC1"))]
    SerializeKeyToPem { source: p256::elliptic_curve::Error },

    #[snafu(display("failed to deserialize ECDSA key from PEM, no supported curve matched"))]
    DeserializeKeyFromPem,
}

impl Error {
    pub(crate) fn is_unsupported_size(&self) -> bool {
        matches!(self, Error::UnsupportedCurveSize { .. })
    }
}

/// The NIST curves usable for ECDSA keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Curve {
    #[strum(serialize = "P-256")]
    P256,

    #[strum(serialize = "P-384")]
    P384,

    #[strum(serialize = "P-521")]
    P521,
}

impl Curve {
    /// Selects the curve by its key size in bits.
    pub fn from_size(size: u32) -> Result<Self> {
        match size {
            256 => Ok(Self::P256),
            384 => Ok(Self::P384),
            521 => Ok(Self::P521),
            _ => UnsupportedCurveSizeSnafu { size }.fail(),
        }
    }

    /// Selects the curve by the named curve OID found in public key
    /// parameters.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::P256, Self::P384, Self::P521]
            .into_iter()
            .find(|curve| curve.oid() == *oid)
    }

    /// The key size in bits.
    pub fn size(self) -> usize {
        match self {
            Curve::P256 => 256,
            Curve::P384 => 384,
            Curve::P521 => 521,
        }
    }

    /// The named curve OID.
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            Curve::P256 => SECP_256_R_1,
            Curve::P384 => SECP_384_R_1,
            Curve::P521 => SECP_521_R_1,
        }
    }
}

/// An ECDSA signing key on one of the supported [`Curve`]s.
#[derive(Debug)]
pub enum SigningKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(P521SigningKey),
}

/// A P-521 signing key usable with the [`x509_cert::builder`].
///
/// The generic [`::ecdsa::SigningKey`] cannot sign on P-521 because the curve
/// has no default digest. Signing goes through [`p521::ecdsa::SigningKey`],
/// which hashes with SHA-512, and the signature is DER encoded afterwards.
#[derive(Clone, Debug)]
pub struct P521SigningKey(::ecdsa::SigningKey<NistP521>);

impl P521SigningKey {
    pub fn random(csprng: &mut impl CryptoRngCore) -> Self {
        Self(::ecdsa::SigningKey::random(csprng))
    }

    pub fn verifying_key(&self) -> &::ecdsa::VerifyingKey<NistP521> {
        self.0.verifying_key()
    }
}

impl From<::ecdsa::SigningKey<NistP521>> for P521SigningKey {
    fn from(key: ::ecdsa::SigningKey<NistP521>) -> Self {
        Self(key)
    }
}

impl From<&P521SigningKey> for p521::SecretKey {
    fn from(key: &P521SigningKey) -> Self {
        Self::from(&key.0)
    }
}

impl Keypair for P521SigningKey {
    type VerifyingKey = ::ecdsa::VerifyingKey<NistP521>;

    fn verifying_key(&self) -> Self::VerifyingKey {
        *self.0.verifying_key()
    }
}

impl DynSignatureAlgorithmIdentifier for P521SigningKey {
    fn signature_algorithm_identifier(&self) -> x509_cert::spki::Result<AlgorithmIdentifierOwned> {
        Ok(AlgorithmIdentifierOwned {
            oid: ECDSA_WITH_SHA_512,
            parameters: None,
        })
    }
}

impl Signer<::ecdsa::der::Signature<NistP521>> for P521SigningKey {
    fn try_sign(
        &self,
        msg: &[u8],
    ) -> Result<::ecdsa::der::Signature<NistP521>, signature::Error> {
        let signing_key = p521::ecdsa::SigningKey::from(self.0.clone());
        let fixed: p521::ecdsa::Signature = signing_key.try_sign(msg)?;
        Ok(fixed.to_der())
    }
}

/// Runs the same expression for every curve, binding the inner signing key.
macro_rules! for_each_curve {
    ($key:expr, $inner:ident => $body:expr) => {
        match $key {
            SigningKey::P256($inner) => $body,
            SigningKey::P384($inner) => $body,
            SigningKey::P521($inner) => $body,
        }
    };
}

impl SigningKey {
    #[instrument(name = "create_ecdsa_signing_key")]
    pub fn new(curve: Curve) -> Self {
        let mut csprng = OsRng;
        Self::new_with_rng(&mut csprng, curve)
    }

    #[instrument(name = "create_ecdsa_signing_key_custom_rng", skip(csprng))]
    pub fn new_with_rng<R>(csprng: &mut R, curve: Curve) -> Self
    where
        R: CryptoRngCore + Sized,
    {
        match curve {
            Curve::P256 => Self::P256(p256::ecdsa::SigningKey::random(csprng)),
            Curve::P384 => Self::P384(p384::ecdsa::SigningKey::random(csprng)),
            Curve::P521 => Self::P521(P521SigningKey::random(csprng)),
        }
    }

    pub fn curve(&self) -> Curve {
        match self {
            SigningKey::P256(_) => Curve::P256,
            SigningKey::P384(_) => Curve::P384,
            SigningKey::P521(_) => Curve::P521,
        }
    }

    /// Returns the DER-encoded SubjectPublicKeyInfo of the verifying key.
    pub fn to_public_key_der(&self) -> x509_cert::spki::Result<Document> {
        for_each_curve!(self, key => key.verifying_key().to_public_key_der())
    }

    pub fn to_sec1_pem(&self, line_ending: LineEnding) -> Result<Zeroizing<String>> {
        match self {
            SigningKey::P256(key) => p256::SecretKey::from(key).to_sec1_pem(line_ending),
            SigningKey::P384(key) => p384::SecretKey::from(key).to_sec1_pem(line_ending),
            SigningKey::P521(key) => p521::SecretKey::from(key).to_sec1_pem(line_ending),
        }
        .context(SerializeKeyToPemSnafu)
    }

    /// Parses a SEC1 encoded key. The curve is taken from the key itself.
    #[instrument(name = "create_ecdsa_signing_key_from_sec1_pem", skip_all)]
    pub fn from_sec1_pem(input: &str) -> Result<Self> {
        p256::SecretKey::from_sec1_pem(input)
            .ok()
            .map(|key| Self::P256(key.into()))
            .or_else(|| {
                p384::SecretKey::from_sec1_pem(input)
                    .ok()
                    .map(|key| Self::P384(key.into()))
            })
            .or_else(|| {
                p521::SecretKey::from_sec1_pem(input)
                    .ok()
                    .map(|key| Self::P521(::ecdsa::SigningKey::from(key).into()))
            })
            .context(DeserializeKeyFromPemSnafu)
    }

    #[instrument(name = "create_ecdsa_signing_key_from_pkcs8_pem", skip_all)]
    pub fn from_pkcs8_pem(input: &str) -> Result<Self> {
        p256::ecdsa::SigningKey::from_pkcs8_pem(input)
            .ok()
            .map(Self::P256)
            .or_else(|| {
                p384::ecdsa::SigningKey::from_pkcs8_pem(input)
                    .ok()
                    .map(Self::P384)
            })
            .or_else(|| {
                ::ecdsa::SigningKey::<NistP521>::from_pkcs8_pem(input)
                    .ok()
                    .map(|key| Self::P521(key.into()))
            })
            .context(DeserializeKeyFromPemSnafu)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Curve::P256)]
    #[case(Curve::P384)]
    #[case(Curve::P521)]
    fn sec1_round_trip(#[case] curve: Curve) {
        let key = SigningKey::new(curve);
        let pem = key.to_sec1_pem(LineEnding::LF).unwrap();

        let parsed = SigningKey::from_sec1_pem(&pem).unwrap();
        assert_eq!(parsed.curve(), curve);
        assert_eq!(
            parsed.to_public_key_der().unwrap(),
            key.to_public_key_der().unwrap()
        );
    }

    #[rstest]
    #[case(Curve::P256)]
    #[case(Curve::P384)]
    #[case(Curve::P521)]
    fn curve_oid_round_trip(#[case] curve: Curve) {
        assert_eq!(Curve::from_oid(&curve.oid()), Some(curve));
        assert_eq!(Curve::from_size(curve.size() as u32).unwrap(), curve);
    }

    #[test]
    fn p521_signatures_verify_with_sha512() {
        let SigningKey::P521(key) = SigningKey::new(Curve::P521) else {
            panic!("expected a P-521 key");
        };
        let message = b"to be signed";

        let der: ::ecdsa::der::Signature<NistP521> = key.try_sign(message).unwrap();
        let fixed = p521::ecdsa::Signature::from_der(der.as_bytes()).unwrap();
        let verifying_key = p521::ecdsa::VerifyingKey::from(Keypair::verifying_key(&key));

        signature::Verifier::verify(&verifying_key, message, &fixed).unwrap();
        assert!(signature::Verifier::verify(&verifying_key, b"something else", &fixed).is_err());
        assert_eq!(
            key.signature_algorithm_identifier().unwrap().oid,
            ECDSA_WITH_SHA_512
        );
    }

    #[test]
    fn unsupported_size() {
        assert!(matches!(
            Curve::from_size(192),
            Err(Error::UnsupportedCurveSize { size: 192 })
        ));
    }
}
