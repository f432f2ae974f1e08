//! Credential sealing.
//!
//! The API token is the only credential at rest. It is sealed with
//! AES-256-GCM under a key derived from a password and a profile-local
//! random salt via PBKDF2-HMAC-SHA256. The sealed payload carries a format
//! version so the iteration count can be raised without breaking existing
//! profiles; the parameters themselves stay implicit in the code.

use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{CoreError, CoreResult};

/// Version 1: PBKDF2-HMAC-SHA256, 100,000 iterations.
const VERSION_1_ITERATIONS: u32 = 100_000;

/// Current sealed-token format version.
pub const CURRENT_SEAL_VERSION: u32 = 1;

const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const KEY_LENGTH: usize = 32; // AES-256

/// PBKDF2 iteration count for a given format version.
#[must_use]
pub const fn iterations_for(version: u32) -> Option<u32> {
    match version {
        1 => Some(VERSION_1_ITERATIONS),
        _ => None,
    }
}

/// An API token encrypted for storage inside `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedToken {
    pub version: u32,
    /// Base64-encoded AES-GCM nonce.
    pub nonce: String,
    /// Base64-encoded ciphertext (includes the GCM tag).
    pub ciphertext: String,
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LENGTH] {
    pbkdf2_hmac_array::<Sha256, KEY_LENGTH>(password.as_bytes(), salt, iterations)
}

/// Reads the profile's key-derivation salt, creating it on first use.
pub fn ensure_salt(path: &Path) -> CoreResult<Vec<u8>> {
    if path.exists() {
        let salt = std::fs::read(path)?;
        if salt.len() == SALT_LENGTH {
            return Ok(salt);
        }
        log::warn!(
            "Salt file {} has unexpected length {}; regenerating",
            path.display(),
            salt.len()
        );
    }
    let mut salt = [0u8; SALT_LENGTH];
    rand::rng().fill_bytes(&mut salt);
    crate::util::fs::atomic_write(path, &salt)?;
    Ok(salt.to_vec())
}

/// Seals a token with password-based AES-256-GCM.
pub fn seal(token: &str, password: &str, salt: &[u8]) -> CoreResult<SealedToken> {
    let iterations = iterations_for(CURRENT_SEAL_VERSION)
        .ok_or_else(|| CoreError::CredentialError("unknown seal version".to_string()))?;
    let key = derive_key(password, salt, iterations);

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CoreError::CredentialError(format!("Failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, token.as_bytes())
        .map_err(|e| CoreError::CredentialError(format!("Encryption failed: {e}")))?;

    Ok(SealedToken {
        version: CURRENT_SEAL_VERSION,
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Unseals a token.
///
/// # Errors
/// `CredentialError` on a wrong password or corrupted payload; the plaintext
/// is never partially revealed.
pub fn unseal(sealed: &SealedToken, password: &str, salt: &[u8]) -> CoreResult<String> {
    let iterations = iterations_for(sealed.version).ok_or_else(|| {
        CoreError::CredentialError(format!("unsupported seal version {}", sealed.version))
    })?;

    let nonce_bytes = BASE64
        .decode(&sealed.nonce)
        .map_err(|e| CoreError::CredentialError(format!("Invalid nonce: {e}")))?;
    let ciphertext = BASE64
        .decode(&sealed.ciphertext)
        .map_err(|e| CoreError::CredentialError(format!("Invalid ciphertext: {e}")))?;

    let key = derive_key(password, salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CoreError::CredentialError(format!("Failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = cipher.decrypt(nonce, ciphertext.as_ref()).map_err(|_| {
        CoreError::CredentialError("Decryption failed: invalid password or corrupted data".into())
    })?;

    String::from_utf8(plaintext)
        .map_err(|_| CoreError::CredentialError("Decrypted token is not valid UTF-8".into()))
}

/// Machine-local passphrase used when no user password is configured.
///
/// Derived from the home directory so sealed tokens do not travel between
/// machines as-is.
#[must_use]
pub fn machine_passphrase() -> String {
    let home = dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    format!("desec-desk:{home}:{}", std::env::consts::OS)
}
