//! Auth / Token Store (§4.7).
//!
//! Two pieces: [`JwtHandler`] mints and verifies the session JWTs returned to
//! callers after OAuth, and [`TokenStore`] holds the upstream hub token (plus
//! an optional extra provider API key) per user, encrypted at rest in
//! memory. Neither survives a restart unless `jwt_secret`/
//! `token_encryption_key` are set in config — the generated fallback keys
//! are process-lifetime only, matching the Python original.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ak_domain::config::AuthConfig;
use ak_domain::error::{Error, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Decoded, verified JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub user_id: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_lifetime_secs: i64,
    revoked: RwLock<HashMap<String, i64>>,
}

impl JwtHandler {
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.clone().unwrap_or_else(random_secret);
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
            token_lifetime_secs: config.token_lifetime_hours_or_default() * 3600,
            revoked: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_token(&self, user_id: &str) -> Result<String> {
        let now = now_epoch();
        let payload = TokenPayload {
            user_id: user_id.to_string(),
            iat: now,
            exp: now + self.token_lifetime_secs,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(&Header::default(), &payload, &self.encoding_key)
            .map_err(|e| Error::Auth(format!("failed to mint session token: {e}")))
    }

    /// Verify signature and expiry, then reject if the jti was revoked.
    pub fn verify_token(&self, token: &str) -> Option<TokenPayload> {
        let data = decode::<TokenPayload>(token, &self.decoding_key, &self.validation).ok()?;
        let payload = data.claims;
        if self.revoked.read().contains_key(&payload.jti) {
            return None;
        }
        Some(payload)
    }

    pub fn revoke_token(&self, token: &str) -> bool {
        match self.verify_token(token) {
            Some(payload) => {
                self.revoked.write().insert(payload.jti, now_epoch());
                true
            }
            None => false,
        }
    }

    /// Drop revoked jtis whose tokens would have expired anyway.
    pub fn cleanup_revoked(&self) -> usize {
        let cutoff = now_epoch() - self.token_lifetime_secs;
        let mut revoked = self.revoked.write();
        let before = revoked.len();
        revoked.retain(|_, revoked_at| *revoked_at >= cutoff);
        before - revoked.len()
    }
}

fn now_epoch() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Decrypted token record for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTokens {
    pub hub_token: String,
    #[serde(default)]
    pub provider_api_key: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_accessed: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Encrypted in-memory storage for user tokens (§4.7). Never written to
/// disk; process restart loses the store entirely.
pub struct TokenStore {
    cipher: Aes256Gcm,
    token_lifetime: chrono::Duration,
    store: RwLock<HashMap<String, Vec<u8>>>,
}

impl TokenStore {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let key_bytes = match &config.token_encryption_key {
            Some(encoded) => {
                let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
                    .map_err(|e| Error::Config(format!("invalid token_encryption_key: {e}")))?;
                if decoded.len() != 32 {
                    return Err(Error::Config("token_encryption_key must decode to 32 bytes".into()));
                }
                decoded
            }
            None => {
                let mut bytes = vec![0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                bytes
            }
        };
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        Ok(Self {
            cipher,
            token_lifetime: chrono::Duration::hours(config.token_lifetime_hours_or_default()),
            store: RwLock::new(HashMap::new()),
        })
    }

    fn encrypt(&self, tokens: &UserTokens) -> Result<Vec<u8>> {
        let plaintext = serde_json::to_vec(tokens)?;
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| Error::Auth(format!("token encryption failed: {e}")))?;
        let mut blob = nonce_bytes.to_vec();
        blob.extend(ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<UserTokens> {
        if blob.len() < 12 {
            return Err(Error::Auth("corrupt token blob".into()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::Auth(format!("token decryption failed: {e}")))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn store_tokens(
        &self,
        user_id: &str,
        hub_token: &str,
        username: &str,
        display_name: Option<String>,
        picture: Option<String>,
        provider_api_key: Option<String>,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let tokens = UserTokens {
            hub_token: hub_token.to_string(),
            provider_api_key,
            created_at: now,
            last_accessed: now,
            username: username.to_string(),
            display_name,
            picture,
        };
        let blob = self.encrypt(&tokens)?;
        self.store.write().insert(user_id.to_string(), blob);
        Ok(())
    }

    /// Returns `None` if absent, corrupt, or past `token_lifetime`. Touches
    /// `last_accessed` on a successful read.
    pub fn get_tokens(&self, user_id: &str) -> Option<UserTokens> {
        let blob = self.store.read().get(user_id).cloned()?;
        let mut tokens = self.decrypt(&blob).ok()?;
        if chrono::Utc::now() - tokens.created_at > self.token_lifetime {
            self.store.write().remove(user_id);
            return None;
        }
        tokens.last_accessed = chrono::Utc::now();
        if let Ok(refreshed) = self.encrypt(&tokens) {
            self.store.write().insert(user_id.to_string(), refreshed);
        }
        Some(tokens)
    }

    pub fn get_hub_token(&self, user_id: &str) -> Option<String> {
        self.get_tokens(user_id).map(|t| t.hub_token)
    }

    pub fn get_provider_api_key(&self, user_id: &str) -> Option<String> {
        self.get_tokens(user_id).and_then(|t| t.provider_api_key)
    }

    pub fn set_provider_api_key(&self, user_id: &str, key: &str) -> bool {
        let Some(mut tokens) = self.get_tokens(user_id) else { return false };
        tokens.provider_api_key = Some(key.to_string());
        match self.encrypt(&tokens) {
            Ok(blob) => {
                self.store.write().insert(user_id.to_string(), blob);
                true
            }
            Err(_) => false,
        }
    }

    pub fn remove_tokens(&self, user_id: &str) -> bool {
        self.store.write().remove(user_id).is_some()
    }

    pub fn has_tokens(&self, user_id: &str) -> bool {
        self.store.read().contains_key(user_id)
    }

    /// Remove entries whose `created_at` has aged past `token_lifetime`.
    pub fn cleanup_expired(&self) -> usize {
        let expired: Vec<String> = self
            .store
            .read()
            .iter()
            .filter_map(|(user_id, blob)| match self.decrypt(blob) {
                Ok(tokens) if chrono::Utc::now() - tokens.created_at > self.token_lifetime => Some(user_id.clone()),
                Err(_) => Some(user_id.clone()),
                _ => None,
            })
            .collect();
        let mut store = self.store.write();
        for user_id in &expired {
            store.remove(user_id);
        }
        expired.len()
    }

    pub fn active_user_count(&self) -> usize {
        self.store.read().len()
    }
}
