//! Abstraction layer around the [`ed25519_dalek`] crate.
//!
//! The dalek types neither know their X.509 signature algorithm identifier
//! nor how their signatures are placed into a certificate. Both are provided
//! by the thin wrappers in this module, so that Ed25519 keys can be used with
//! the [`x509_cert::builder`] just like the RustCrypto RSA and ECDSA keys.
use const_oid::db::rfc8410::ID_ED_25519;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand_core::{CryptoRngCore, OsRng};
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use x509_cert::{
    der::{AnyRef, asn1::BitString, pem::LineEnding},
    spki::{AlgorithmIdentifier, SignatureAlgorithmIdentifier, SignatureBitStringEncoding},
};
use zeroize::Zeroizing;

/// The PEM label of PKCS#8 encoded private keys.
pub const PKCS8_PEM_LABEL: &str = "PRIVATE KEY";

/// Ed25519 keys always have 256 bits.
pub const KEY_SIZE: usize = 256;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize Ed25519 key as PEM-encoded PKCS8"))]
    SerializeKeyToPem { source: ed25519_dalek::pkcs8::Error },

    #[snafu(display("failed to deserialize Ed25519 key from PEM-encoded PKCS8"))]
    DeserializeKeyFromPem { source: ed25519_dalek::pkcs8::Error },
}

#[derive(Debug)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    #[instrument(name = "create_ed25519_signing_key")]
    pub fn new() -> Self {
        let mut csprng = OsRng;
        Self::new_with_rng(&mut csprng)
    }

    #[instrument(name = "create_ed25519_signing_key_custom_rng", skip_all)]
    pub fn new_with_rng<R>(csprng: &mut R) -> Self
    where
        R: CryptoRngCore + Sized,
    {
        Self(ed25519_dalek::SigningKey::generate(csprng))
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.0.verifying_key()
    }

    pub fn to_pkcs8_pem(&self, line_ending: LineEnding) -> Result<Zeroizing<String>> {
        self.0
            .to_pkcs8_pem(line_ending)
            .context(SerializeKeyToPemSnafu)
    }

    #[instrument(name = "create_ed25519_signing_key_from_pkcs8_pem", skip_all)]
    pub fn from_pkcs8_pem(input: &str) -> Result<Self> {
        let signing_key =
            ed25519_dalek::SigningKey::from_pkcs8_pem(input).context(DeserializeKeyFromPemSnafu)?;

        Ok(Self(signing_key))
    }
}

impl Default for SigningKey {
    fn default() -> Self {
        Self::new()
    }
}

impl signature::Keypair for SigningKey {
    type VerifyingKey = ed25519_dalek::VerifyingKey;

    fn verifying_key(&self) -> Self::VerifyingKey {
        self.0.verifying_key()
    }
}

impl signature::Signer<Signature> for SigningKey {
    fn try_sign(&self, msg: &[u8]) -> std::result::Result<Signature, signature::Error> {
        signature::Signer::<ed25519_dalek::Signature>::try_sign(&self.0, msg).map(Signature)
    }
}

/// Ed25519 (RFC 8410) uses the bare algorithm OID without parameters.
impl SignatureAlgorithmIdentifier for SigningKey {
    type Params = AnyRef<'static>;

    const SIGNATURE_ALGORITHM_IDENTIFIER: AlgorithmIdentifier<Self::Params> = AlgorithmIdentifier {
        oid: ID_ED_25519,
        parameters: None,
    };
}

/// An Ed25519 signature which can be embedded into certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl SignatureBitStringEncoding for Signature {
    fn to_bitstring(&self) -> x509_cert::der::Result<BitString> {
        BitString::from_bytes(&self.0.to_bytes())
    }
}
