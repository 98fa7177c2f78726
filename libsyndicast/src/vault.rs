//! Token vault: encryption of stored platform credentials
//!
//! Credentials are serialized to JSON and encrypted with age passphrase
//! encryption before they touch the database. Encode and decode happen only
//! at the persistence boundary in `db.rs`; nothing decrypts implicitly on
//! field access.

use std::io::{Read, Write};
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{Result, SyndicastError, VaultError};
use crate::types::Credentials;

#[derive(Clone)]
pub struct TokenVault {
    passphrase: SecretString,
}

impl TokenVault {
    pub fn new(passphrase: SecretString) -> Self {
        Self { passphrase }
    }

    /// Load the vault passphrase from a file (trailing whitespace stripped).
    pub fn from_passphrase_file(path: &Path) -> Result<Self> {
        let mut raw = std::fs::read_to_string(path).map_err(|e| {
            SyndicastError::InvalidInput(format!(
                "Failed to read vault passphrase file {}: {}",
                path.display(),
                e
            ))
        })?;
        let trimmed = raw.trim_end().to_string();
        raw.zeroize();

        if trimmed.is_empty() {
            return Err(SyndicastError::InvalidInput(
                "Vault passphrase file is empty".to_string(),
            ));
        }

        Ok(Self::new(SecretString::from(trimmed)))
    }

    /// Encrypt a plaintext string into an age ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_user_passphrase(age::secrecy::Secret::new(
            self.passphrase.expose_secret().to_string(),
        ));

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        writer
            .write_all(plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        Ok(encrypted)
    }

    /// Decrypt an age ciphertext back to the plaintext string.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<String> {
        let decryptor = match age::Decryptor::new(ciphertext) {
            Ok(age::Decryptor::Passphrase(d)) => d,
            Ok(_) => {
                return Err(VaultError::Encryption(
                    "Invalid encryption format (expected passphrase)".to_string(),
                )
                .into())
            }
            Err(e) => return Err(VaultError::Encryption(e.to_string()).into()),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(
                &age::secrecy::Secret::new(self.passphrase.expose_secret().to_string()),
                None,
            )
            .map_err(|e| {
                if e.to_string().contains("decryption") || e.to_string().contains("MAC") {
                    VaultError::DecryptionFailed
                } else {
                    VaultError::Encryption(e.to_string())
                }
            })?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        String::from_utf8(decrypted)
            .map_err(|e| VaultError::Encryption(format!("Invalid UTF-8: {}", e)).into())
    }

    /// Serialize and encrypt a credential tuple for storage.
    pub fn encode_credentials(&self, credentials: &Credentials) -> Result<Vec<u8>> {
        let json = serde_json::to_string(credentials)
            .map_err(|e| VaultError::Malformed(e.to_string()))?;
        self.encrypt(&json)
    }

    /// Decrypt and deserialize a stored credential tuple.
    pub fn decode_credentials(&self, ciphertext: &[u8]) -> Result<Credentials> {
        let json = self.decrypt(ciphertext)?;
        serde_json::from_str(&json).map_err(|e| VaultError::Malformed(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> TokenVault {
        TokenVault::new(SecretString::from("correct horse battery staple".to_string()))
    }

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let vault = test_vault();
        for plaintext in ["", "token-123", "ünïcödé ✓", "a\nmulti\nline\nsecret"] {
            let ciphertext = vault.encrypt(plaintext).unwrap();
            assert_eq!(vault.decrypt(&ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_ciphertext_is_not_plaintext() {
        let vault = test_vault();
        let ciphertext = vault.encrypt("super-secret-access-token").unwrap();
        let haystack = String::from_utf8_lossy(&ciphertext);
        assert!(!haystack.contains("super-secret-access-token"));
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let vault = test_vault();
        let ciphertext = vault.encrypt("secret").unwrap();

        let other = TokenVault::new(SecretString::from("different passphrase".to_string()));
        let result = other.decrypt(&ciphertext);
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_ciphertext_fails() {
        let vault = test_vault();
        assert!(vault.decrypt(b"this is not an age ciphertext").is_err());
    }

    #[test]
    fn test_credential_round_trip() {
        let vault = test_vault();
        let creds = Credentials::expiring(
            "access-abc".to_string(),
            "refresh-def".to_string(),
            1_800_000_000,
        );

        let blob = vault.encode_credentials(&creds).unwrap();
        let back = vault.decode_credentials(&blob).unwrap();
        assert_eq!(back, creds);
    }

    #[test]
    fn test_passphrase_file_loading() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vault.passphrase");
        std::fs::write(&path, "file passphrase\n").unwrap();

        let vault = TokenVault::from_passphrase_file(&path).unwrap();
        let ciphertext = vault.encrypt("x").unwrap();
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "x");
    }

    #[test]
    fn test_empty_passphrase_file_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vault.passphrase");
        std::fs::write(&path, "\n").unwrap();

        assert!(TokenVault::from_passphrase_file(&path).is_err());
    }
}
