use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::Mac;
use rusqlite::{Connection, params};
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::store::Storage;

type HmacSha256 = hmac::Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Google,
    Hubspot,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Google => "google",
            Service::Hubspot => "hubspot",
        }
    }

    pub fn from_service(value: &str) -> Option<Self> {
        match value {
            "google" => Some(Service::Google),
            "hubspot" => Some(Service::Hubspot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: String,
    pub service: Service,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Per-user, per-service OAuth token records. Access and refresh tokens are
/// encrypted at rest with AES-256-GCM under a machine-derived key, so a
/// copied database file is useless off-host.
pub struct CredentialStore {
    db: Arc<Mutex<Connection>>,
    cipher: Aes256Gcm,
}

/// Derive a 256-bit encryption key from machine-specific identifiers.
/// HMAC-SHA256(hostname + username, "steward-credentials-v1") is stable
/// across restarts but tied to the local machine/user.
fn derive_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    let input = format!("{}{}", hostname, username);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"steward-credentials-v1")
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    let result = mac.finalize();
    let bytes = result.into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

impl CredentialStore {
    pub fn new(storage: &Storage) -> Self {
        let key = derive_key();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is valid for AES-256");
        Self {
            db: storage.get_db(),
            cipher,
        }
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Returns plaintext.
    fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }

    pub async fn upsert(
        &self,
        user_id: &str,
        service: Service,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let access = self.encrypt(access_token)?;
        let refresh = match refresh_token {
            Some(token) => Some(self.encrypt(token)?),
            None => None,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO credentials (user_id, service, access_token, refresh_token, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, service) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at",
            params![
                user_id,
                service.as_str(),
                access,
                refresh,
                expires_at.map(|at| at.timestamp()),
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str, service: Service) -> Result<Option<Credential>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT access_token, refresh_token, expires_at
             FROM credentials WHERE user_id = ?1 AND service = ?2",
        )?;
        let mut rows = stmt.query(params![user_id, service.as_str()])?;

        match rows.next()? {
            Some(row) => {
                let access: String = row.get(0)?;
                let refresh: Option<String> = row.get(1)?;
                let expires_at: Option<i64> = row.get(2)?;
                drop(rows);
                drop(stmt);

                let refresh_token = match refresh {
                    Some(enc) => Some(self.decrypt(&enc)?),
                    None => None,
                };
                Ok(Some(Credential {
                    user_id: user_id.to_string(),
                    service,
                    access_token: self.decrypt(&access)?,
                    refresh_token,
                    expires_at: expires_at.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
                }))
            }
            None => Ok(None),
        }
    }

    /// Users holding a non-expired token for `service`. The poll cycles
    /// enumerate this set.
    pub async fn users_with_valid(&self, service: Service) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT user_id FROM credentials
             WHERE service = ?1 AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![service.as_str(), Utc::now().timestamp()], |row| {
            row.get(0)
        })?;

        let mut users = Vec::new();
        for user in rows {
            users.push(user?);
        }
        Ok(users)
    }

    pub async fn remove(&self, user_id: &str, service: Service) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM credentials WHERE user_id = ?1 AND service = ?2",
            params![user_id, service.as_str()],
        )?;
        Ok(deleted > 0)
    }
}
