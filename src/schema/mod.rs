//! JSON request/response schemas for the encrypt/decrypt wire protocol.
//!
//! These types are dumb data carriers: structural validation (required fields,
//! base64 decoding) lives here; every semantic check belongs to the sequencer.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid base64 in field {field}: {source}")]
    InvalidBase64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
}

pub type Result<T> = std::result::Result<T, SchemaError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatatypeInfo {
    pub datatype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueFormat {
    pub compression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnReference {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessInfo {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_control: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugInfo {
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBatch {
    pub datatype_info: DatatypeInfo,
    pub value: String,
    pub value_format: ValueFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBatchEncryptedRequest {
    pub value_format: ValueFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptJsonRequest {
    pub column_reference: ColumnReference,
    pub data_batch: DataBatch,
    pub data_batch_encrypted: DataBatchEncryptedRequest,
    pub encryption: EncryptionInfo,
    pub access: AccessInfo,
    pub application_context: String,
    pub debug: DebugInfo,
}

impl EncryptJsonRequest {
    pub fn plaintext_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data_batch.value)
            .map_err(|source| SchemaError::InvalidBase64 {
                field: "data_batch.value",
                source,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBatchEncryptedResponse {
    pub value_format: ValueFormat,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptJsonResponse {
    pub data_batch_encrypted: DataBatchEncryptedResponse,
    pub access: AccessInfo,
    pub debug: DebugInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBatchEncryptedValue {
    pub value_format: ValueFormat,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptJsonRequest {
    pub column_reference: ColumnReference,
    pub data_batch: DatatypeInfoOnly,
    pub data_batch_encrypted: DataBatchEncryptedValue,
    pub encryption: EncryptionInfo,
    pub access: AccessInfo,
    pub application_context: String,
    pub debug: DebugInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatatypeInfoOnly {
    pub datatype_info: DatatypeInfo,
    pub value_format: ValueFormat,
}

impl DecryptJsonRequest {
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data_batch_encrypted.value)
            .map_err(|source| SchemaError::InvalidBase64 {
                field: "data_batch_encrypted.value",
                source,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptJsonResponse {
    pub data_batch: DataBatch,
    pub access: AccessInfo,
    pub debug: DebugInfo,
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_request_decodes_base64_plaintext() {
        let req = EncryptJsonRequest {
            column_reference: ColumnReference { name: "col".into() },
            data_batch: DataBatch {
                datatype_info: DatatypeInfo {
                    datatype: "BYTE_ARRAY".into(),
                    length: None,
                },
                value: encode_base64(b"hello"),
                value_format: ValueFormat {
                    compression: "UNCOMPRESSED".into(),
                    format: Some("PLAIN".into()),
                    encoding_attributes: None,
                },
            },
            data_batch_encrypted: DataBatchEncryptedRequest {
                value_format: ValueFormat {
                    compression: "UNCOMPRESSED".into(),
                    format: None,
                    encoding_attributes: None,
                },
            },
            encryption: EncryptionInfo { key_id: "k1".into() },
            access: AccessInfo {
                user_id: "u1".into(),
                role: None,
                access_control: None,
            },
            application_context: "{}".into(),
            debug: DebugInfo {
                reference_id: "r1".into(),
            },
        };
        assert_eq!(req.plaintext_bytes().unwrap(), b"hello");
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let mut req_value = "not-valid-base64-!!".to_string();
        req_value.push('@');
        assert!(STANDARD.decode(&req_value).is_err());
    }
}
