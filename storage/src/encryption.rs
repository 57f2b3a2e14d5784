//! AES-256-GCM sealing of client database passwords.
//!
//! Stored format is `base64(nonce || ciphertext || tag)` with a fresh random
//! 96-bit nonce per encryption. Any stored value that fails to decode, is too
//! short, or fails tag verification is reported as
//! [`AccessError::CorruptCiphertext`]; no partial plaintext is ever returned.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use config::EncryptionConfig;
use errors::AccessError;
use std::fmt;
use zeroize::Zeroizing;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

fn corrupt(reason: impl Into<String>) -> AccessError {
    AccessError::CorruptCiphertext {
        reason: reason.into(),
    }
}

impl CredentialCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Builds the cipher from the process-wide encryption key.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, AccessError> {
        let key = config
            .key_bytes()
            .map_err(|e| AccessError::Configuration {
                message: e.to_string(),
            })?;
        Ok(Self::new(&key))
    }

    /// Fresh random key, base64 encoded, suitable for `ATTEST_ENCRYPTION_KEY`.
    pub fn generate_key() -> Zeroizing<String> {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Zeroizing::new(general_purpose::STANDARD.encode(key.as_slice()))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AccessError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AccessError::Configuration {
                message: format!("Encryption failed: {e}"),
            })?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Zeroizing<String>, AccessError> {
        let raw = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| corrupt(format!("invalid base64: {e}")))?,
        );

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(corrupt(format!(
                "sealed value is {} bytes, shorter than nonce and tag",
                raw.len()
            )));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| corrupt("authentication tag mismatch"))?,
        );

        let text = std::str::from_utf8(&plaintext).map_err(|_| corrupt("plaintext is not UTF-8"))?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new(&[7u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = cipher();
        let sealed = cipher.encrypt("s3cr3t-password").unwrap();
        assert_ne!(sealed, "s3cr3t-password");
        assert_eq!(cipher.decrypt(&sealed).unwrap().as_str(), "s3cr3t-password");
    }

    #[test]
    fn test_encryption_uses_fresh_nonce() {
        let cipher = cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_every_single_bit_flip_is_rejected() {
        let cipher = cipher();
        let sealed = cipher.encrypt("pw").unwrap();
        let raw = general_purpose::STANDARD.decode(&sealed).unwrap();

        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut tampered = raw.clone();
                tampered[byte] ^= 1 << bit;
                let encoded = general_purpose::STANDARD.encode(&tampered);
                assert!(
                    matches!(
                        cipher.decrypt(&encoded),
                        Err(AccessError::CorruptCiphertext { .. })
                    ),
                    "flip at byte {byte} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn test_truncated_and_garbage_input() {
        let cipher = cipher();
        let short = general_purpose::STANDARD.encode([0u8; NONCE_LEN + TAG_LEN - 1]);
        assert!(matches!(
            cipher.decrypt(&short),
            Err(AccessError::CorruptCiphertext { .. })
        ));
        assert!(matches!(
            cipher.decrypt("%%% not base64 %%%"),
            Err(AccessError::CorruptCiphertext { .. })
        ));
        assert!(cipher.decrypt("").is_err());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let sealed = cipher().encrypt("pw").unwrap();
        let other = CredentialCipher::new(&[8u8; 32]);
        assert!(matches!(
            other.decrypt(&sealed),
            Err(AccessError::CorruptCiphertext { .. })
        ));
    }

    #[test]
    fn test_from_config_requires_key() {
        assert!(CredentialCipher::from_config(&EncryptionConfig::default()).is_err());

        let generated = CredentialCipher::generate_key();
        let config = EncryptionConfig::with_key(generated.as_str());
        let cipher = CredentialCipher::from_config(&config).unwrap();
        let sealed = cipher.encrypt("pw").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap().as_str(), "pw");
    }
}
