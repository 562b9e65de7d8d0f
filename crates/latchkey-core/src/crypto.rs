//! Sealed-blob encryption and master password hashing
//!
//! Everything Latchkey persists at rest travels through the same sealed-blob
//! format: a JSON envelope `{salt, iv, authTag, encrypted}` with base64
//! fields, itself base64-encoded. The key is derived from the passphrase
//! with PBKDF2-HMAC-SHA256 and the payload is encrypted with AES-256-GCM.
//!
//! Tag verification failures surface as [`CoreError::DecryptionFailed`]; no
//! partial plaintext ever escapes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CoreError, Result};

/// PBKDF2 iteration count for blob key derivation
pub const KDF_ITERATIONS: u32 = 100_000;

/// Size of the derived AES-256 key
pub const KEY_SIZE: usize = 32;

/// Size of the random salt
pub const SALT_SIZE: usize = 32;

/// Size of the AES-GCM nonce
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// PBKDF2 iteration count for master password hashing
pub const PASSWORD_HASH_ITERATIONS: u32 = 10_000;

/// Size of the derived master password hash
pub const PASSWORD_HASH_SIZE: usize = 64;

/// A passphrase-sealed blob in its structured form
///
/// The JSON field names are part of the at-rest format and must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBlob {
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(rename = "authTag", with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub encrypted: Vec<u8>,
}

impl SealedBlob {
    /// Encrypt `plaintext` under a key derived from `passphrase`
    pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<Self> {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let mut iv = vec![0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let mut key = derive_key(passphrase, &salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CoreError::Crypto(format!("Invalid key: {}", e)))?;
        key.zeroize();

        let nonce = Nonce::from_slice(&iv);
        let mut ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CoreError::Crypto(format!("Encryption failed: {}", e)))?;

        // The cipher appends the 16-byte tag to the ciphertext; the blob
        // format carries it in its own field
        let tag_at = ciphertext.len() - TAG_SIZE;
        let auth_tag = ciphertext.split_off(tag_at);

        Ok(Self {
            salt,
            iv,
            auth_tag,
            encrypted: ciphertext,
        })
    }

    /// Decrypt and authenticate the payload
    pub fn open(&self, passphrase: &str) -> Result<Vec<u8>> {
        if self.iv.len() != NONCE_SIZE {
            return Err(CoreError::InvalidBlob(format!(
                "iv must be {} bytes, got {}",
                NONCE_SIZE,
                self.iv.len()
            )));
        }
        if self.auth_tag.len() != TAG_SIZE {
            return Err(CoreError::InvalidBlob(format!(
                "authTag must be {} bytes, got {}",
                TAG_SIZE,
                self.auth_tag.len()
            )));
        }

        let mut key = derive_key(passphrase, &self.salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CoreError::Crypto(format!("Invalid key: {}", e)))?;
        key.zeroize();

        let mut ciphertext = Vec::with_capacity(self.encrypted.len() + TAG_SIZE);
        ciphertext.extend_from_slice(&self.encrypted);
        ciphertext.extend_from_slice(&self.auth_tag);

        let nonce = Nonce::from_slice(&self.iv);
        cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CoreError::DecryptionFailed)
    }

    /// Base64-of-JSON transport form
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(BASE64.encode(json))
    }

    /// Parse the transport form produced by [`SealedBlob::encode`]
    pub fn decode(data: &str) -> Result<Self> {
        let json = BASE64
            .decode(data.trim())
            .map_err(|e| CoreError::InvalidBlob(format!("Base64 decode failed: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| CoreError::InvalidBlob(format!("Envelope parse failed: {}", e)))
    }
}

/// Seal `plaintext` under `passphrase` into the transportable string form
pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<String> {
    SealedBlob::seal(plaintext, passphrase)?.encode()
}

/// Open a sealed blob produced by [`seal`]
pub fn open(data: &str, passphrase: &str) -> Result<Vec<u8>> {
    SealedBlob::decode(data)?.open(passphrase)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    key
}

/// Stored master password hash (PBKDF2-HMAC-SHA512, hex-encoded)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordHash {
    pub hash: String,
    pub salt: String,
}

/// Hash a master password with a fresh random salt
pub fn hash_password(password: &str) -> PasswordHash {
    let mut salt_bytes = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    let hash = hex::encode(derive_password_hash(password, &salt));
    PasswordHash { hash, salt }
}

/// Constant-time verification against a stored hash
pub fn verify_password(password: &str, stored: &PasswordHash) -> bool {
    let expected = match hex::decode(&stored.hash) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if expected.len() != PASSWORD_HASH_SIZE {
        return false;
    }
    let candidate = derive_password_hash(password, &stored.salt);
    candidate.as_slice().ct_eq(expected.as_slice()).into()
}

fn derive_password_hash(password: &str, salt: &str) -> [u8; PASSWORD_HASH_SIZE] {
    // The hex salt string itself is the KDF salt input
    let mut out = [0u8; PASSWORD_HASH_SIZE];
    pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        PASSWORD_HASH_ITERATIONS,
        &mut out,
    );
    out
}

/// Serde helper for byte buffers as base64 strings
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}
