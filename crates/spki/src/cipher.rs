//! Symmetric encryption of configuration secrets, like the database
//! password, so they do not have to be stored in plain text.
//!
//! Secrets are encrypted with AES-256-GCM. A fresh random 96-bit nonce is
//! prepended to every ciphertext and the result is hex encoded. The key is
//! never compiled in, it has to be provided at runtime through
//! [`SECRET_KEY_ENV`] or the `--secret-key` argument.
use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use snafu::{ResultExt, Snafu, ensure};
use zeroize::Zeroizing;

/// The environment variable the secret key is read from.
pub const SECRET_KEY_ENV: &str = "SPKI_SECRET_KEY";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the secret key must be {expected} hex digits, got {actual}"))]
    InvalidKeyLength { expected: usize, actual: usize },

    #[snafu(display("the secret key is not valid hex"))]
    DecodeKey { source: hex::FromHexError },

    #[snafu(display("failed to encrypt the secret"))]
    Encrypt,

    #[snafu(display("the ciphertext is not valid hex"))]
    DecodeCiphertext { source: hex::FromHexError },

    #[snafu(display("the ciphertext is {len} bytes long, which is too short to be valid"))]
    CiphertextTooShort { len: usize },

    #[snafu(display("failed to decrypt the secret, the key is wrong or the ciphertext was altered"))]
    Decrypt,

    #[snafu(display("the decrypted secret is not valid UTF-8"))]
    InvalidUtf8 { source: std::string::FromUtf8Error },
}

/// Encrypts and decrypts secrets with a deployment-wide key.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Creates the cipher from a key given as 64 hex digits.
    pub fn from_hex(key: &str) -> Result<Self> {
        let key = key.trim();
        ensure!(
            key.len() == KEY_LEN * 2,
            InvalidKeyLengthSnafu {
                expected: KEY_LEN * 2,
                actual: key.len()
            }
        );

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        hex::decode_to_slice(key, bytes.as_mut_slice()).context(DecodeKeySnafu)?;
        Ok(Self::new(&bytes))
    }

    /// Encrypts `plaintext` and returns the hex encoded nonce and ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Encrypt)?;

        let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&ciphertext);
        Ok(hex::encode(output))
    }

    /// Decrypts a value produced by [`SecretCipher::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<String>> {
        let data = hex::decode(ciphertext.trim()).context(DecodeCiphertextSnafu)?;
        ensure!(
            data.len() >= NONCE_LEN + TAG_LEN,
            CiphertextTooShortSnafu { len: data.len() }
        );

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decrypt)?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .context(InvalidUtf8Snafu)
    }
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn cipher() -> SecretCipher {
        SecretCipher::from_hex(KEY).unwrap()
    }

    #[rstest]
    #[case("")]
    #[case("hunter2")]
    #[case("数据库密码 🔐")]
    #[case("a\nmulti-line\nsecret")]
    fn round_trip(#[case] plaintext: &str) {
        let cipher = cipher();
        let ciphertext = cipher.encrypt(plaintext).unwrap();

        assert!(ciphertext.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(cipher.decrypt(&ciphertext).unwrap().as_str(), plaintext);
    }

    #[test]
    fn nonces_are_random() {
        let cipher = cipher();
        assert_ne!(
            cipher.encrypt("secret").unwrap(),
            cipher.encrypt("secret").unwrap()
        );
    }

    #[rstest]
    #[case("not hex at all")]
    #[case("abc")]
    fn malformed_hex_is_a_decode_error(#[case] input: &str) {
        let err = cipher().decrypt(input).unwrap_err();
        assert!(matches!(err, Error::DecodeCiphertext { .. }));
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let err = cipher().decrypt("00112233").unwrap_err();
        assert!(matches!(err, Error::CiphertextTooShort { len: 4 }));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = cipher();
        let mut ciphertext = hex::decode(cipher.encrypt("secret").unwrap()).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        let err = cipher.decrypt(&hex::encode(ciphertext)).unwrap_err();
        assert!(matches!(err, Error::Decrypt));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let ciphertext = cipher().encrypt("secret").unwrap();
        let other = SecretCipher::new(&[7; 32]);

        assert!(matches!(other.decrypt(&ciphertext), Err(Error::Decrypt)));
    }

    #[rstest]
    #[case("0011")]
    #[case("zz0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")]
    fn invalid_keys_are_rejected(#[case] key: &str) {
        assert!(SecretCipher::from_hex(key).is_err());
    }
}
