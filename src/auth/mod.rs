//! Credential store and bearer token mint.
//!
//! A simplified stand-in for a full identity provider: an in-memory
//! `client_id -> api_key` map loaded from a JSON file (or a "skip checks" dev
//! mode), minting short-lived HS256 bearer tokens on successful validation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 4 hours, matching the original service's token lifetime.
pub const TOKEN_TTL_SECONDS: i64 = 4 * 60 * 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("cannot open credentials file {path}: {source}")]
    CredentialsFileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("credentials file must contain a JSON object")]
    CredentialsNotAnObject,
    #[error("client_id must be non-empty")]
    EmptyClientId,
    #[error("invalid credentials for client_id")]
    InvalidCredentials,
    #[error("token generation failed: {0}")]
    TokenGeneration(String),
    #[error("unauthorized")]
    Unauthorized,
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    client_id: String,
    iat: i64,
    exp: i64,
}

/// In-memory `client_id -> api_key` store plus the JWT secret used to sign and
/// verify bearer tokens.
pub struct ClientCredentialStore {
    credentials: HashMap<String, String>,
    skip_credential_check: bool,
    jwt_secret: String,
}

impl ClientCredentialStore {
    pub fn empty(jwt_secret: impl Into<String>) -> Self {
        ClientCredentialStore {
            credentials: HashMap::new(),
            skip_credential_check: false,
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn with_skip_credential_check(jwt_secret: impl Into<String>, skip: bool) -> Self {
        let mut store = Self::empty(jwt_secret);
        store.skip_credential_check = skip;
        store
    }

    pub fn from_map(credentials: HashMap<String, String>, jwt_secret: impl Into<String>) -> Self {
        let mut store = Self::empty(jwt_secret);
        store.credentials = credentials;
        store
    }

    /// Loads `client_id -> api_key` pairs from a JSON object file.
    pub fn from_file(path: impl AsRef<Path>, jwt_secret: impl Into<String>) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|source| AuthError::CredentialsFileUnreadable {
            path: path_ref.display().to_string(),
            source,
        })?;
        let json: serde_json::Value = serde_json::from_str(&contents).map_err(|_| AuthError::CredentialsNotAnObject)?;
        let obj = json.as_object().ok_or(AuthError::CredentialsNotAnObject)?;
        let mut credentials = HashMap::new();
        let mut skipped = 0usize;
        for (client_id, value) in obj {
            match value.as_str() {
                Some(api_key) => {
                    credentials.insert(client_id.clone(), api_key.to_string());
                }
                None => skipped += 1,
            }
        }
        tracing::info!(
            loaded = credentials.len(),
            skipped,
            "loaded client credentials from {}",
            path_ref.display()
        );
        Ok(Self::from_map(credentials, jwt_secret))
    }

    pub fn skip_credential_check(&self) -> bool {
        self.skip_credential_check
    }

    fn validate_credential(&self, client_id: &str, api_key: &str) -> bool {
        self.credentials.get(client_id).map(String::as_str) == Some(api_key)
    }

    /// Mints a bearer token for `client_id`/`api_key` after validating them
    /// (unless skip-credential-check mode is active).
    pub fn mint_token(&self, client_id: &str, api_key: &str) -> Result<String> {
        if client_id.is_empty() {
            return Err(AuthError::EmptyClientId);
        }
        if !self.skip_credential_check && !self.validate_credential(client_id, api_key) {
            return Err(AuthError::InvalidCredentials);
        }
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            client_id: client_id.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECONDS,
        };
        encode(
            &Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))
    }

    /// Verifies an `Authorization` header value for a protected endpoint.
    pub fn verify_for_endpoint(&self, authorization_header: &str) -> Result<()> {
        if self.skip_credential_check {
            return Ok(());
        }
        let token = authorization_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::Unauthorized)?;
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(jsonwebtoken::Algorithm::HS256),
        )
        .map_err(|_| AuthError::Unauthorized)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub client_id: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ClientCredentialStore {
        let mut creds = HashMap::new();
        creds.insert("client-a".to_string(), "secret-a".to_string());
        ClientCredentialStore::from_map(creds, "test-secret")
    }

    #[test]
    fn mint_token_rejects_bad_credentials() {
        let s = store();
        assert!(s.mint_token("client-a", "wrong").is_err());
    }

    #[test]
    fn mint_token_rejects_empty_client_id() {
        let s = store();
        assert!(matches!(s.mint_token("", "secret-a"), Err(AuthError::EmptyClientId)));
    }

    #[test]
    fn mint_and_verify_round_trips() {
        let s = store();
        let token = s.mint_token("client-a", "secret-a").unwrap();
        assert!(s.verify_for_endpoint(&format!("Bearer {token}")).is_ok());
    }

    #[test]
    fn verify_rejects_malformed_header() {
        let s = store();
        assert!(s.verify_for_endpoint("not-a-bearer-token").is_err());
    }

    #[test]
    fn skip_credential_check_bypasses_validation() {
        let s = ClientCredentialStore::with_skip_credential_check("test-secret", true);
        assert!(s.mint_token("anyone", "anything").is_ok());
        assert!(s.verify_for_endpoint("garbage").is_ok());
    }
}
