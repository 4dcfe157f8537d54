//! Credential vault and secret resolution.
//!
//! Stored credentials (IMAP passwords, OAuth client secrets and tokens) are
//! encrypted at rest with a single process-wide AES-256-GCM key. The key
//! itself is resolved from one of:
//!
//! 1. **Direct value** - For quick local testing
//! 2. **File reference** - For Docker secrets pattern (e.g. `/run/secrets/master_key`)
//! 3. **Env var reference** - For Kubernetes/production (`MAILSTASH_MASTER_KEY`)

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;
use std::fs;

/// Error type for vault and secret-resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// No encryption key is configured. Accounts that need decryption are
    /// skipped with a recorded error; the worker itself keeps running.
    #[error("No encryption key configured (set {0})")]
    KeyMissing(&'static str),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption error: {0}")]
    EncryptionFailed(String),

    /// Ciphertext is corrupt or the key was rotated without re-encryption.
    /// Reported per account, never fatal to the scheduler.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Encryption key environment variable name.
pub const MASTER_KEY_ENV_VAR: &str = "MAILSTASH_MASTER_KEY";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Resolves a secret from multiple sources in priority order:
/// direct value, then file contents, then environment variable.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(Some(SecretString::from(value.to_string())));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            match fs::read_to_string(path) {
                Ok(content) => return Ok(Some(SecretString::from(content.trim().to_string()))),
                Err(e) => {
                    return Err(SecretError::FileReadError {
                        path: path.to_string(),
                        source: e,
                    })
                }
            }
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            match std::env::var(var_name) {
                // Trim whitespace for consistency (env vars may have trailing newlines)
                Ok(value) => return Ok(Some(SecretString::from(value.trim()))),
                Err(_) => return Ok(None),
            }
        }
    }

    Ok(None)
}

/// Process-wide credential vault using AES-256-GCM.
///
/// The key must be a 64-character hex string (32 bytes). Ciphertext format:
/// `hex(nonce || ct)` with a random 12-byte nonce per encryption.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Creates a vault from the `MAILSTASH_MASTER_KEY` environment variable.
    ///
    /// Returns `KeyMissing` when the variable is unset so callers can skip
    /// affected accounts instead of crashing.
    pub fn from_env() -> Result<Self> {
        let key_hex = std::env::var(MASTER_KEY_ENV_VAR)
            .map_err(|_| SecretError::KeyMissing(MASTER_KEY_ENV_VAR))?;

        Self::from_hex_key(key_hex.trim())
    }

    /// Creates a vault from a hex-encoded 32-byte key.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex)
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypts plaintext and returns hex-encoded ciphertext with prepended nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::EncryptionFailed(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(hex_encode(&combined))
    }

    /// Decrypts hex-encoded ciphertext (with prepended nonce) and returns the
    /// plaintext wrapped in `SecretString`.
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<SecretString> {
        let combined = hex_decode(ciphertext_hex)
            .map_err(|e| SecretError::DecryptionFailed(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionFailed(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionFailed(e.to_string()))?;

        let plaintext = String::from_utf8(plaintext_bytes)
            .map_err(|e| SecretError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))?;

        Ok(SecretString::from(plaintext))
    }
}

/// Encodes bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

/// Decodes hex string to bytes.
fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

/// Generates random bytes using getrandom.
fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        SecretError::EncryptionFailed(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}
