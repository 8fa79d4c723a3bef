//! Local and Remote agent facades — the public library surface.
//!
//! Both expose `encrypt`/`decrypt` that never propagate a `Result` to the
//! caller: failures are folded into a result object's `success`/`error_*`
//! fields, matching the original service's `EncryptionResult`/`DecryptionResult`
//! contract.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;

use crate::compression::CompressionCodec;
use crate::page::{DataType, Encoding};
use crate::pool::{ConnectionPoolRegistry, PoolConfig};
use crate::sequencer::{DataBatchEncryptionSequencer, SequencerParams};
use crate::transport::{PooledTaskClient, PooledTaskClientRegistry};

/// Result object returned by every agent operation. Never a `Result<T, E>` at
/// the public boundary — diagnostics travel in `error_message`/`error_fields`.
#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub success: bool,
    pub payload: Vec<u8>,
    pub encryption_metadata: Option<HashMap<String, String>>,
    pub error_message: Option<String>,
    pub error_fields: HashMap<String, String>,
}

impl AgentResult {
    fn ok(payload: Vec<u8>, encryption_metadata: Option<HashMap<String, String>>) -> Self {
        AgentResult {
            success: true,
            payload,
            encryption_metadata,
            error_message: None,
            error_fields: HashMap::new(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        AgentResult {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Shared construction arguments for both facades.
pub struct AgentInit {
    pub column_name: String,
    pub application_context: String,
    pub key_id: String,
    pub datatype: DataType,
    pub datatype_length: Option<u32>,
    pub compression: CompressionCodec,
    pub encoding_attributes: HashMap<String, String>,
    pub format: Encoding,
    pub column_encryption_metadata: Option<HashMap<String, String>>,
}

fn user_id_from_context(application_context: &str) -> String {
    serde_json::from_str::<serde_json::Value>(application_context)
        .ok()
        .and_then(|v| v.get("user_id").and_then(|u| u.as_str().map(String::from)))
        .unwrap_or_default()
}

/// Constructs a sequencer directly in-process.
pub struct LocalDataBatchProtectionAgent {
    init: AgentInit,
    user_id: String,
}

impl LocalDataBatchProtectionAgent {
    pub fn init(init: AgentInit) -> Self {
        let user_id = user_id_from_context(&init.application_context);
        LocalDataBatchProtectionAgent { init, user_id }
    }

    fn build_sequencer(&self, encrypted_compression: CompressionCodec) -> crate::sequencer::Result<DataBatchEncryptionSequencer> {
        DataBatchEncryptionSequencer::new(SequencerParams {
            column_name: self.init.column_name.clone(),
            datatype: self.init.datatype,
            datatype_length: self.init.datatype_length,
            compression: self.init.compression,
            format: self.init.format,
            encoding_attributes: self.init.encoding_attributes.clone(),
            encrypted_compression,
            key_id: self.init.key_id.clone(),
            user_id: self.user_id.clone(),
            application_context: self.init.application_context.clone(),
            encryption_metadata: self.init.column_encryption_metadata.clone().unwrap_or_default(),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8], encrypted_compression: CompressionCodec) -> AgentResult {
        let mut sequencer = match self.build_sequencer(encrypted_compression) {
            Ok(s) => s,
            Err(e) => return AgentResult::failure(e.to_string()),
        };
        match sequencer.convert_and_encrypt(plaintext) {
            Ok(ciphertext) => AgentResult::ok(ciphertext, Some(sequencer.encryption_metadata)),
            Err(e) => AgentResult::failure(e.to_string()),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8], encrypted_compression: CompressionCodec) -> AgentResult {
        let mut sequencer = match self.build_sequencer(encrypted_compression) {
            Ok(s) => s,
            Err(e) => return AgentResult::failure(e.to_string()),
        };
        match sequencer.convert_and_decrypt(ciphertext) {
            Ok(plaintext) => AgentResult::ok(plaintext, None),
            Err(e) => AgentResult::failure(e.to_string()),
        }
    }
}

/// The connection-config file is a single flat JSON object: every key is a
/// top-level dotted string, never a nested object (e.g.
/// `"connection_pool.max_pool_size"`, `"credentials.client_id"`).
/// `server_url` is the one plain top-level key.
#[derive(Debug, Deserialize)]
struct ConnectionConfigFile {
    #[serde(flatten)]
    raw: HashMap<String, serde_json::Value>,
}

impl ConnectionConfigFile {
    fn server_url(&self) -> Result<&str, RemoteInitError> {
        match self.raw.get("server_url").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(RemoteInitError::ConfigMalformed("missing or empty server_url".into())),
        }
    }

    /// Reads `connection_pool.<key>` as a non-negative integer, defaulting to
    /// `default_value` when the key is absent and failing when present but
    /// not a non-negative integer.
    fn get_int_or_default(&self, key: &str, default_value: u64) -> Result<u64, RemoteInitError> {
        let full_key = format!("connection_pool.{key}");
        match self.raw.get(&full_key) {
            None => Ok(default_value),
            Some(v) => match v.as_u64() {
                Some(n) => Ok(n),
                None => Err(RemoteInitError::ConfigMalformed(format!(
                    "invalid non-integer or negative value for key [{full_key}]: {v}"
                ))),
            },
        }
    }

    /// Every key with a `"credentials."` prefix becomes a credential, keyed
    /// by the stripped remainder; an empty remainder (`"credentials."`
    /// itself) is ignored, and keys outside the prefix are ignored entirely.
    fn extract_client_credentials(&self) -> HashMap<String, String> {
        self.raw
            .iter()
            .filter_map(|(k, v)| {
                let stripped = k.strip_prefix("credentials.")?;
                if stripped.is_empty() {
                    return None;
                }
                Some((stripped.to_string(), v.as_str()?.to_string()))
            })
            .collect()
    }
}

#[derive(Debug)]
pub enum RemoteInitError {
    ConfigFileUnreadable(String),
    ConfigMalformed(String),
    HealthCheckFailed(String),
}

impl std::fmt::Display for RemoteInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteInitError::ConfigFileUnreadable(e) => write!(f, "cannot read connection config: {e}"),
            RemoteInitError::ConfigMalformed(e) => write!(f, "malformed connection config: {e}"),
            RemoteInitError::HealthCheckFailed(e) => write!(f, "/healthz probe failed: {e}"),
        }
    }
}

/// Forwards encrypt/decrypt over the pooled HTTP transport to a DBPS API server.
pub struct RemoteDataBatchProtectionAgent {
    init: AgentInit,
    user_id: String,
    client: Arc<PooledTaskClient>,
    encryption_metadata: std::sync::Mutex<Option<HashMap<String, String>>>,
}

impl RemoteDataBatchProtectionAgent {
    /// Reads the connection configuration file, probes `/healthz`, and builds
    /// the pooled transport.
    pub fn init(init: AgentInit, connection_config_path: impl AsRef<Path>) -> Result<Self, RemoteInitError> {
        let contents = fs::read_to_string(connection_config_path.as_ref())
            .map_err(|e| RemoteInitError::ConfigFileUnreadable(e.to_string()))?;
        let config: ConnectionConfigFile =
            serde_json::from_str(&contents).map_err(|e| RemoteInitError::ConfigMalformed(e.to_string()))?;
        let server_url = config.server_url()?;

        let pool_config = PoolConfig {
            max_pool_size: config.get_int_or_default("max_pool_size", 8)? as usize,
            borrow_timeout: Duration::from_millis(config.get_int_or_default("borrow_timeout_milliseconds", 100)?),
            max_idle_time: Duration::from_millis(config.get_int_or_default("max_idle_time_milliseconds", 60_000)?),
            connect_timeout: Duration::from_secs(config.get_int_or_default("connect_timeout_seconds", 5)?),
            read_timeout: Duration::from_secs(config.get_int_or_default("read_timeout_seconds", 20)?),
            write_timeout: Duration::from_secs(config.get_int_or_default("write_timeout_seconds", 20)?),
        };
        let num_worker_threads = config.get_int_or_default("num_worker_threads", 0)? as usize;
        tracing::info!(
            max_pool_size = pool_config.max_pool_size,
            borrow_timeout_ms = pool_config.borrow_timeout.as_millis() as u64,
            max_idle_time_ms = pool_config.max_idle_time.as_millis() as u64,
            connect_timeout_s = pool_config.connect_timeout.as_secs(),
            read_timeout_s = pool_config.read_timeout.as_secs(),
            write_timeout_s = pool_config.write_timeout.as_secs(),
            "RemoteDataBatchProtectionAgent::init() - HTTP pool config"
        );

        let pool = Arc::new(ConnectionPoolRegistry::new());
        pool.set_config(server_url, pool_config);
        let registry = PooledTaskClientRegistry::new(pool);

        let credentials_map = config.extract_client_credentials();
        let credentials = match (credentials_map.get("client_id"), credentials_map.get("api_key")) {
            (Some(id), Some(key)) => Some(("/auth".to_string(), id.clone(), key.clone())),
            _ => None,
        };
        let client = registry.acquire(server_url, num_worker_threads, credentials);

        let health = client.get("/healthz", false);
        if health.body.trim() != "OK" {
            return Err(RemoteInitError::HealthCheckFailed(
                health.error.unwrap_or_else(|| format!("unexpected body: {}", health.body)),
            ));
        }

        let user_id = user_id_from_context(&init.application_context);
        let encryption_metadata = init.column_encryption_metadata.clone();
        Ok(RemoteDataBatchProtectionAgent {
            init,
            user_id,
            client,
            encryption_metadata: std::sync::Mutex::new(encryption_metadata),
        })
    }

    /// Replaces stored encryption metadata, letting a caller supply metadata
    /// produced by a prior `encrypt` call (possibly on a different agent
    /// instance) before calling `decrypt`.
    pub fn update_encryption_metadata(&self, metadata: HashMap<String, String>) {
        *self.encryption_metadata.lock().unwrap() = Some(metadata);
    }

    pub fn encrypt(&self, plaintext: &[u8], encrypted_compression: CompressionCodec) -> AgentResult {
        let request = self.build_request(plaintext, encrypted_compression, None);
        let response = self.client.post("/encrypt", request, true);
        self.parse_encrypt_response(response)
    }

    pub fn decrypt(&self, ciphertext: &[u8], encrypted_compression: CompressionCodec) -> AgentResult {
        let metadata = self.encryption_metadata.lock().unwrap().clone();
        let request = self.build_request(ciphertext, encrypted_compression, metadata);
        let response = self.client.post("/decrypt", request, true);
        self.parse_decrypt_response(response)
    }

    fn build_request(
        &self,
        payload: &[u8],
        encrypted_compression: CompressionCodec,
        encryption_metadata: Option<HashMap<String, String>>,
    ) -> String {
        serde_json::json!({
            "column_reference": { "name": self.init.column_name },
            "data_batch": {
                "datatype_info": { "datatype": format!("{:?}", self.init.datatype), "length": self.init.datatype_length },
                "value": crate::schema::encode_base64(payload),
                "value_format": {
                    "compression": format!("{:?}", self.init.compression),
                    "format": format!("{:?}", self.init.format),
                    "encoding_attributes": self.init.encoding_attributes,
                },
            },
            "data_batch_encrypted": {
                "value_format": { "compression": format!("{:?}", encrypted_compression) },
            },
            "encryption": { "key_id": self.init.key_id },
            "access": { "user_id": self.user_id },
            "application_context": self.init.application_context,
            "debug": { "reference_id": uuid::Uuid::new_v4().to_string() },
            "encryption_metadata": encryption_metadata,
        })
        .to_string()
    }

    fn parse_encrypt_response(&self, response: crate::transport::HttpResponse) -> AgentResult {
        if !response.is_success() {
            return AgentResult::failure(response.error.unwrap_or_else(|| response.body));
        }
        let parsed: serde_json::Value = match serde_json::from_str(&response.body) {
            Ok(v) => v,
            Err(e) => return AgentResult::failure(format!("malformed encrypt response: {e}")),
        };
        let ciphertext_b64 = parsed
            .pointer("/data_batch_encrypted/value")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let ciphertext = match STANDARD.decode(ciphertext_b64) {
            Ok(b) => b,
            Err(e) => return AgentResult::failure(format!("invalid base64 ciphertext: {e}")),
        };
        let metadata = parsed.get("encryption_metadata").and_then(|v| v.as_object()).map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect::<HashMap<_, _>>()
        });
        AgentResult::ok(ciphertext, metadata)
    }

    fn parse_decrypt_response(&self, response: crate::transport::HttpResponse) -> AgentResult {
        if !response.is_success() {
            return AgentResult::failure(response.error.unwrap_or_else(|| response.body));
        }
        let parsed: serde_json::Value = match serde_json::from_str(&response.body) {
            Ok(v) => v,
            Err(e) => return AgentResult::failure(format!("malformed decrypt response: {e}")),
        };
        let plaintext_b64 = parsed
            .pointer("/data_batch/value")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        match STANDARD.decode(plaintext_b64) {
            Ok(b) => AgentResult::ok(b, None),
            Err(e) => AgentResult::failure(format!("invalid base64 plaintext: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(datatype: DataType) -> AgentInit {
        let mut attrs = HashMap::new();
        attrs.insert("page_type".into(), "DICTIONARY_PAGE".into());
        attrs.insert("page_encoding".into(), "PLAIN".into());
        AgentInit {
            column_name: "col".into(),
            application_context: r#"{"user_id":"u1"}"#.into(),
            key_id: "key-1".into(),
            datatype,
            datatype_length: None,
            compression: CompressionCodec::Snappy,
            encoding_attributes: attrs,
            format: Encoding::Plain,
            column_encryption_metadata: None,
        }
    }

    #[test]
    fn local_agent_round_trips() {
        let mut raw = Vec::new();
        crate::bytes::append_u32_le(&mut raw, 3);
        raw.extend_from_slice(b"abc");
        let plaintext = crate::compression::compress(&raw, CompressionCodec::Snappy).unwrap();

        let agent = LocalDataBatchProtectionAgent::init(init(DataType::ByteArray));
        let encrypted = agent.encrypt(&plaintext, CompressionCodec::Snappy);
        assert!(encrypted.success);

        let decrypt_agent = LocalDataBatchProtectionAgent::init(AgentInit {
            column_encryption_metadata: encrypted.encryption_metadata,
            ..init(DataType::ByteArray)
        });
        let decrypted = decrypt_agent.decrypt(&encrypted.payload, CompressionCodec::Snappy);
        assert!(decrypted.success);
        assert_eq!(decrypted.payload, plaintext);
    }

    #[test]
    fn user_id_extracted_from_application_context() {
        assert_eq!(user_id_from_context(r#"{"user_id":"abc"}"#), "abc");
        assert_eq!(user_id_from_context("not json"), "");
    }
}
