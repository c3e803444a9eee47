//! Abstraction layer around the [`rsa`] crate. This module provides types
//! which abstract away the generation of RSA keys used for signing of CAs
//! and other certificates.
use rand_core::{CryptoRngCore, OsRng};
use rsa::{
    RsaPrivateKey,
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    pkcs8::DecodePrivateKey,
    traits::PublicKeyParts,
};
use signature::Keypair;
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::der::pem::LineEnding;
use zeroize::Zeroizing;

use crate::keys::MAX_RSA_KEY_SIZE;

/// The PEM label of PKCS#1 encoded RSA private keys.
pub const PKCS1_PEM_LABEL: &str = "RSA PRIVATE KEY";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("RSA key size must be positive"))]
    ZeroKeySize,

    #[snafu(display("RSA key size of {bits} bits exceeds the maximum of {MAX_RSA_KEY_SIZE} bits"))]
    KeySizeTooLarge { bits: usize },

    #[snafu(display("failed to create RSA key"))]
    CreateKey { source: rsa::Error },

    #[snafu(display("failed to serialize the signing (private) key as PEM-encoded PKCS1"))]
    SerializeSigningKey { source: rsa::pkcs1::Error },

    #[snafu(display("failed to deserialize the signing (private) key from PEM-encoded PKCS1"))]
    DeserializeSigningKeyPkcs1 { source: rsa::pkcs1::Error },

    #[snafu(display("failed to deserialize the signing (private) key from PEM-encoded PKCS8"))]
    DeserializeSigningKeyPkcs8 { source: rsa::pkcs8::Error },
}

impl Error {
    pub(crate) fn is_unsupported_size(&self) -> bool {
        matches!(self, Error::ZeroKeySize | Error::KeySizeTooLarge { .. })
    }
}

/// An RSA key which signs using PKCS#1 v1.5 padding and SHA-256.
#[derive(Debug)]
pub struct SigningKey(rsa::pkcs1v15::SigningKey<sha2::Sha256>);

impl SigningKey {
    /// Generates a new RSA key with the default random-number generator
    /// [`OsRng`].
    ///
    /// It should be noted that the generation of the key takes longer for
    /// larger key sizes. The generation of an RSA key with a key size of
    /// `4096` can take up to multiple seconds.
    #[instrument(name = "create_rsa_signing_key")]
    pub fn new(bits: usize) -> Result<Self> {
        let mut csprng = OsRng;
        Self::new_with_rng(&mut csprng, bits)
    }

    /// Generates a new RSA key with a custom random-number generator.
    #[instrument(name = "create_rsa_signing_key_custom_rng", skip(rng))]
    pub fn new_with_rng<Rng>(rng: &mut Rng, bits: usize) -> Result<Self>
    where
        Rng: CryptoRngCore + Sized,
    {
        ensure!(bits > 0, ZeroKeySizeSnafu);
        ensure!(bits <= MAX_RSA_KEY_SIZE, KeySizeTooLargeSnafu { bits });

        let private_key = RsaPrivateKey::new(rng, bits).context(CreateKeySnafu)?;
        let signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(private_key);

        Ok(Self(signing_key))
    }

    pub fn signing_key(&self) -> &rsa::pkcs1v15::SigningKey<sha2::Sha256> {
        &self.0
    }

    pub fn verifying_key(&self) -> rsa::pkcs1v15::VerifyingKey<sha2::Sha256> {
        self.0.verifying_key()
    }

    /// The modulus length in bits.
    pub fn key_size(&self) -> usize {
        self.private_key().size() * 8
    }

    fn private_key(&self) -> &RsaPrivateKey {
        self.0.as_ref()
    }

    pub fn to_pkcs1_pem(&self, line_ending: LineEnding) -> Result<Zeroizing<String>> {
        self.private_key()
            .to_pkcs1_pem(line_ending)
            .context(SerializeSigningKeySnafu)
    }

    #[instrument(name = "create_rsa_signing_key_from_pkcs1_pem", skip_all)]
    pub fn from_pkcs1_pem(input: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs1_pem(input).context(DeserializeSigningKeyPkcs1Snafu)?;
        Ok(Self(rsa::pkcs1v15::SigningKey::new(private_key)))
    }

    #[instrument(name = "create_rsa_signing_key_from_pkcs8_pem", skip_all)]
    pub fn from_pkcs8_pem(input: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(input).context(DeserializeSigningKeyPkcs8Snafu)?;
        Ok(Self(rsa::pkcs1v15::SigningKey::new(private_key)))
    }
}
