// Encryption Service
// At-rest protection for OAuth tokens and API keys using AES-256-GCM

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

// Prefix identifying encrypted values in the settings file
const TOKEN_PREFIX: &str = "ENC::";

/// Encryption service for sensitive settings fields
pub struct Encryption;

impl Encryption {
    /// Get or create the machine-specific encryption key
    fn get_or_create_machine_key(app_data_dir: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
        let key_file = app_data_dir.join(".machine_key");

        if key_file.exists() {
            let mut key_data = std::fs::read(&key_file)
                .map_err(|e| format!("Failed to read machine key: {e}"))?;

            if key_data.len() != KEY_LEN {
                key_data.zeroize();
                return Err("Invalid machine key file".to_string());
            }

            // Ensure restrictive permissions on existing key file
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                std::fs::set_permissions(&key_file, perms)
                    .map_err(|e| format!("Failed to set key file permissions: {e}"))?;
            }

            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&key_data);
            key_data.zeroize();

            Ok(key)
        } else {
            if let Some(parent) = key_file.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create key directory: {e}"))?;
            }

            let mut rng = rand::thread_rng();
            let key = Zeroizing::new(rng.gen::<[u8; KEY_LEN]>());

            std::fs::write(&key_file, *key)
                .map_err(|e| format!("Failed to save machine key: {e}"))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                std::fs::set_permissions(&key_file, perms)
                    .map_err(|e| format!("Failed to set key file permissions: {e}"))?;
            }

            Ok(key)
        }
    }

    /// Encrypt a sensitive token for storage (OAuth tokens, API keys)
    /// Returns base64-encoded ciphertext with the ENC:: prefix
    pub fn encrypt_token(token: &str, app_data_dir: &Path) -> Result<String, String> {
        // Don't encrypt empty values or already encrypted values
        if token.is_empty() || token.starts_with(TOKEN_PREFIX) {
            return Ok(token.to_string());
        }

        let machine_key = Self::get_or_create_machine_key(app_data_dir)?;

        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; NONCE_LEN] = rng.gen();

        let cipher = Aes256Gcm::new_from_slice(&*machine_key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, token.as_bytes())
            .map_err(|e| format!("Token encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", TOKEN_PREFIX, BASE64.encode(combined)))
    }

    /// Decrypt a sensitive token from storage
    pub fn decrypt_token(encrypted: &str, app_data_dir: &Path) -> Result<String, String> {
        // If not encrypted, return as-is
        if !encrypted.starts_with(TOKEN_PREFIX) {
            return Ok(encrypted.to_string());
        }

        let machine_key = Self::get_or_create_machine_key(app_data_dir)?;

        let encoded = &encrypted[TOKEN_PREFIX.len()..];
        let mut combined = BASE64
            .decode(encoded)
            .map_err(|e| format!("Failed to decode encrypted token: {e}"))?;

        if combined.len() < NONCE_LEN {
            combined.zeroize();
            return Err("Invalid encrypted token".to_string());
        }

        let nonce_bytes = &combined[..NONCE_LEN];
        let ciphertext = &combined[NONCE_LEN..];

        let cipher = Aes256Gcm::new_from_slice(&*machine_key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("Token decryption failed: {e}"))?;

        let result = String::from_utf8(plaintext.clone())
            .map_err(|e| format!("Invalid UTF-8 in decrypted token: {e}"));

        plaintext.zeroize();
        combined.zeroize();

        result
    }

    /// Check if a value is encrypted
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(TOKEN_PREFIX)
    }
}
