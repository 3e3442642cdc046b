//! Server credentials at rest.
//!
//! Secrets are stored as `base64(nonce || ciphertext)` under AES-256-GCM and
//! decrypted only when a job is about to open a session.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::DeckhandError;
use crate::remote::session::Target;
use crate::store::Store;

const NONCE_LEN: usize = 12;

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// The cipher key is the SHA-256 of `key_material`
    pub fn new(key_material: &SecretString) -> Result<Self, DeckhandError> {
        let key = Sha256::digest(key_material.expose_secret().as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| DeckhandError::CredentialError(format!("Invalid key: {}", e)))?;
        Ok(Self { cipher })
    }

    /// At-rest form of `plaintext`
    pub fn encrypt(&self, plaintext: &str) -> Result<String, DeckhandError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| DeckhandError::CredentialError("Encryption failed".to_string()))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<SecretString, DeckhandError> {
        let bytes = STANDARD
            .decode(sealed.trim())
            .map_err(|e| DeckhandError::CredentialError(format!("Malformed secret: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(DeckhandError::CredentialError(
                "Malformed secret: too short".to_string(),
            ));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                DeckhandError::CredentialError(
                    "Secret does not match the configured key".to_string(),
                )
            })?;

        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| DeckhandError::CredentialError("Secret is not UTF-8".to_string()))?;
        Ok(SecretString::from(plaintext))
    }

    /// Look up server `server_id` and decrypt its credential
    pub async fn resolve(
        &self,
        store: &dyn Store,
        server_id: i64,
    ) -> Result<Target, DeckhandError> {
        let server = store
            .server(server_id)
            .await?
            .ok_or_else(|| DeckhandError::NotFound(format!("server {}", server_id)))?;

        debug!("Resolved credentials for server {} ({})", server.id, server.public_ip);
        Ok(Target {
            server_id: server.id,
            host: server.public_ip,
            port: server.port,
            username: server.username,
            credential: self.decrypt(&server.secret)?,
        })
    }
}
