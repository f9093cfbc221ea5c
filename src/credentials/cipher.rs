//! AES-256-GCM encryption for OAuth tokens at rest.
//!
//! Each token is encrypted with a fresh random nonce. The ciphertext blob is
//! self-describing (`base64(nonce) ":" base64(ciphertext || tag)`), so decrypt
//! needs nothing beyond the blob and the key. The 256-bit key is derived once
//! at startup from the configured secret; the raw secret is never used as key
//! material directly.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Domain-separation prefix for key derivation
const KEY_CONTEXT: &[u8] = b"hlproxy/token-cipher/v1";

/// Errors from decryption. Encryption failures are not tenant-recoverable and
/// surface as plain `anyhow` errors at the call site.
#[derive(Debug)]
pub enum CipherError {
    /// Blob is not in the `nonce:ciphertext` base64 format
    Malformed(String),
    /// Authentication tag did not verify (wrong key, corrupted or tampered data)
    Integrity,
}

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherError::Malformed(detail) => write!(f, "malformed ciphertext blob: {}", detail),
            CipherError::Integrity => write!(f, "ciphertext failed integrity verification"),
        }
    }
}

impl std::error::Error for CipherError {}

/// Encrypts and decrypts token material with a key derived from a secret.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Derives the AES-256 key from `secret` and builds the cipher.
    ///
    /// Key = SHA-256(context || secret). Two processes configured with the
    /// same secret derive the same key, so blobs are portable across restarts.
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(secret.as_bytes());
        let key = hasher.finalize();

        Self {
            // Safe: SHA-256 output is exactly the 32 bytes Aes256Gcm expects
            cipher: Aes256Gcm::new_from_slice(&key).unwrap(),
        }
    }

    /// Encrypts plaintext with a fresh random nonce.
    ///
    /// Returns the self-describing blob `base64(nonce) ":" base64(ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("encryption failed: {}", e))?;

        Ok(format!("{}:{}", BASE64.encode(nonce), BASE64.encode(ciphertext)))
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails closed: a tampered or truncated blob yields `CipherError`, never
    /// altered plaintext.
    pub fn decrypt(&self, blob: &str) -> Result<String, CipherError> {
        let (nonce_b64, ciphertext_b64) = blob
            .split_once(':')
            .ok_or_else(|| CipherError::Malformed("missing nonce separator".to_string()))?;

        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|e| CipherError::Malformed(format!("nonce: {}", e)))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CipherError::Malformed(format!(
                "nonce is {} bytes, expected {}",
                nonce_bytes.len(),
                NONCE_SIZE
            )));
        }

        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| CipherError::Malformed(format!("ciphertext: {}", e)))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CipherError::Integrity)?;

        String::from_utf8(plaintext).map_err(|e| CipherError::Malformed(format!("utf-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = TokenCipher::new("test-secret");
        let plaintext = "my-secret-access-token-12345";

        let blob = cipher.encrypt(plaintext).expect("Encryption failed");
        assert_ne!(blob, plaintext);

        let decrypted = cipher.decrypt(&blob).expect("Decryption failed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_roundtrip_empty_and_unicode() {
        let cipher = TokenCipher::new("test-secret");
        for plaintext in ["", "a", "tökén-ünïcødé-✓", &"x".repeat(4096)] {
            let blob = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = TokenCipher::new("test-secret");

        let blob1 = cipher.encrypt("same-plaintext").unwrap();
        let blob2 = cipher.encrypt("same-plaintext").unwrap();

        // Random nonces: same plaintext never encrypts to the same blob
        assert_ne!(blob1, blob2);
        assert_eq!(cipher.decrypt(&blob1).unwrap(), "same-plaintext");
        assert_eq!(cipher.decrypt(&blob2).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let blob = TokenCipher::new("secret-a").encrypt("secret").unwrap();

        let result = TokenCipher::new("secret-b").decrypt(&blob);
        assert!(matches!(result, Err(CipherError::Integrity)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = TokenCipher::new("test-secret");
        let blob = cipher.encrypt("secret").unwrap();

        // Flip a character in the ciphertext portion
        let (nonce, ct) = blob.split_once(':').unwrap();
        let mut bytes = BASE64.decode(ct).unwrap();
        bytes[0] ^= 0x01;
        let tampered = format!("{}:{}", nonce, BASE64.encode(bytes));

        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CipherError::Integrity)
        ));
    }

    #[test]
    fn test_malformed_blob_rejected() {
        let cipher = TokenCipher::new("test-secret");

        assert!(matches!(
            cipher.decrypt("no-separator"),
            Err(CipherError::Malformed(_))
        ));
        assert!(matches!(
            cipher.decrypt("!!!:also-not-base64"),
            Err(CipherError::Malformed(_))
        ));
        // Valid base64 but wrong nonce length
        let short = format!("{}:{}", BASE64.encode([0u8; 4]), BASE64.encode([0u8; 20]));
        assert!(matches!(
            cipher.decrypt(&short),
            Err(CipherError::Malformed(_))
        ));
    }
}
