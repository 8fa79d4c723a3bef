//! Encryption Sequencer — the central page-transformation state machine.
//!
//! Orchestrates validate -> decompress-and-split -> parse-values -> encrypt ->
//! join -> compress (and the symmetric inverse for decryption), falling back to
//! whole-block encryption whenever the page/datatype/encoding combination is
//! genuinely unsupported at per-value granularity. That fallback is the only
//! legitimate use of the `Unsupported` error; any other `Unsupported` surfacing
//! out of the per-value path here is a bug and must be rethrown.

use std::collections::HashMap;

use thiserror::Error;

use crate::bytes::{self, BytesError};
use crate::compression::{CompressionCodec, CompressionError};
use crate::crypto::{BasicEncryptor, CryptoError, EncryptionContext, Encryptor};
use crate::page::{self, DataType, Encoding, EncodingAttributes, PageCodecError};

const DBPS_AGENT_VERSION: &str = "v0.01";
const KEY_AGENT_VERSION: &str = "dbps_agent_version";
const KEY_ENCRYPTION_MODE: &str = "encryption_mode";
const MODE_PER_VALUE: &str = "per_value";
const MODE_PER_BLOCK: &str = "per_block";

/// A stage label attached to every sequencer error, matching the stage taxonomy
/// callers use to render diagnostics without inspecting the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Validation,
    EncodingAttributeConversion,
    ParameterValidation,
    Encryption,
    Decryption,
    DecryptVersionCheck,
    DecryptEncryptionModeValidation,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Validation => "validation",
            ErrorStage::EncodingAttributeConversion => "encoding_attribute_conversion",
            ErrorStage::ParameterValidation => "parameter_validation",
            ErrorStage::Encryption => "encryption",
            ErrorStage::Decryption => "decryption",
            ErrorStage::DecryptVersionCheck => "decrypt_version_check",
            ErrorStage::DecryptEncryptionModeValidation => "decrypt_encryption_mode_validation",
        }
    }
}

#[derive(Debug, Error)]
#[error("{stage_str}: {message}", stage_str = stage.as_str())]
pub struct SequencerError {
    pub stage: ErrorStage,
    pub message: String,
}

impl SequencerError {
    fn new(stage: ErrorStage, message: impl Into<String>) -> Self {
        SequencerError {
            stage,
            message: message.into(),
        }
    }
}

impl From<BytesError> for SequencerError {
    fn from(e: BytesError) -> Self {
        SequencerError::new(ErrorStage::Encryption, e.to_string())
    }
}

impl From<CompressionError> for SequencerError {
    fn from(e: CompressionError) -> Self {
        SequencerError::new(ErrorStage::Encryption, e.to_string())
    }
}

impl From<CryptoError> for SequencerError {
    fn from(e: CryptoError) -> Self {
        SequencerError::new(ErrorStage::Encryption, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;

/// Construction parameters for a single encrypt or decrypt call.
pub struct SequencerParams {
    pub column_name: String,
    pub datatype: DataType,
    pub datatype_length: Option<u32>,
    pub compression: CompressionCodec,
    pub format: Encoding,
    pub encoding_attributes: HashMap<String, String>,
    pub encrypted_compression: CompressionCodec,
    pub key_id: String,
    pub user_id: String,
    pub application_context: String,
    pub encryption_metadata: HashMap<String, String>,
}

/// Stateful sequencer instance bound to one set of parameters.
pub struct DataBatchEncryptionSequencer {
    params: SequencerParams,
    attrs: EncodingAttributes,
    encryptor: Box<dyn Encryptor>,
    pub encryption_metadata: HashMap<String, String>,
}

impl DataBatchEncryptionSequencer {
    pub fn new(params: SequencerParams) -> Result<Self> {
        validate_parameters(&params)?;
        let attrs = EncodingAttributes::from_map(&params.encoding_attributes).map_err(|e| {
            log::error!("encoding attribute conversion failed: {e}");
            SequencerError::new(ErrorStage::EncodingAttributeConversion, e.to_string())
        })?;
        let ctx = EncryptionContext {
            key_id: params.key_id.clone(),
            column_name: params.column_name.clone(),
            user_id: params.user_id.clone(),
            application_context: params.application_context.clone(),
            datatype: params.datatype,
        };
        let encryptor = Box::new(BasicEncryptor::new(&ctx)?);
        let encryption_metadata = params.encryption_metadata.clone();
        Ok(DataBatchEncryptionSequencer {
            params,
            attrs,
            encryptor,
            encryption_metadata,
        })
    }

    /// Encrypts `plaintext`, returning the encrypted payload. Populates
    /// `self.encryption_metadata` with the mode actually used.
    pub fn convert_and_encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(SequencerError::new(ErrorStage::Validation, "plaintext must be non-empty"));
        }
        match self.try_per_value_encrypt(plaintext) {
            Ok(encrypted) => {
                self.encryption_metadata.insert(KEY_ENCRYPTION_MODE.into(), MODE_PER_VALUE.into());
                self.encryption_metadata
                    .insert(KEY_AGENT_VERSION.into(), DBPS_AGENT_VERSION.into());
                Ok(encrypted)
            }
            Err(PerValueOutcome::Unsupported(reason)) => {
                if self.claims_full_support() {
                    log::error!("per-value path claims support but raised Unsupported: {reason}");
                    return Err(SequencerError::new(
                        ErrorStage::Encryption,
                        format!("per-value path claims support but raised Unsupported: {reason}"),
                    ));
                }
                log::debug!("falling back to per-block encryption: {reason}");
                let encrypted = self.encryptor.encrypt_block(plaintext)?;
                self.encryption_metadata.insert(KEY_ENCRYPTION_MODE.into(), MODE_PER_BLOCK.into());
                self.encryption_metadata
                    .insert(KEY_AGENT_VERSION.into(), DBPS_AGENT_VERSION.into());
                Ok(encrypted)
            }
            Err(PerValueOutcome::Fatal(e)) => Err(e),
        }
    }

    fn try_per_value_encrypt(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, PerValueOutcome> {
        if self.params.datatype == DataType::Boolean {
            return Err(PerValueOutcome::Unsupported("BOOLEAN datatype".into()));
        }
        if self.attrs.page_encoding == page::Encoding::RleDictionary {
            return Err(PerValueOutcome::Unsupported("RLE_DICTIONARY encoding".into()));
        }
        let (levels, values) = page::decompress_and_split(plaintext, self.params.compression, &self.attrs)
            .map_err(|e| classify_page_error(e))?;
        let typed = page::parse_value_bytes_into_typed_list(
            &values,
            self.params.datatype,
            self.params.datatype_length,
            self.params.format,
        )
        .map_err(|e| classify_page_error(e))?;
        let enc_values = self
            .encryptor
            .encrypt_value_list(typed)
            .map_err(|e| PerValueOutcome::Fatal(e.into()))?;
        let enc_levels = self
            .encryptor
            .encrypt_block(&levels)
            .map_err(|e| PerValueOutcome::Fatal(e.into()))?;
        let joined = bytes::join_with_length_prefix(&enc_levels, &enc_values)
            .map_err(|e| PerValueOutcome::Fatal(e.into()))?;
        let compressed = crate::compression::compress(&joined, self.params.encrypted_compression)
            .map_err(|e| PerValueOutcome::Fatal(e.into()))?;
        Ok(compressed)
    }

    fn claims_full_support(&self) -> bool {
        let codec_ok = matches!(
            self.params.compression,
            CompressionCodec::Uncompressed | CompressionCodec::Snappy
        );
        let format_ok = self.params.format == Encoding::Plain;
        let datatype_ok = self.params.datatype != DataType::Boolean;
        let page_type_ok = self.attrs.page_type.is_some();
        codec_ok && format_ok && datatype_ok && page_type_ok
    }

    /// Decrypts `ciphertext`, requiring `encryption_metadata` (set at
    /// construction or via [`update_encryption_metadata`](Self::update_encryption_metadata))
    /// to carry a compatible `dbps_agent_version` and a recognised `encryption_mode`.
    pub fn convert_and_decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(SequencerError::new(ErrorStage::Validation, "ciphertext must be non-empty"));
        }
        let version = self
            .encryption_metadata
            .get(KEY_AGENT_VERSION)
            .ok_or_else(|| SequencerError::new(ErrorStage::DecryptVersionCheck, "missing dbps_agent_version"))?;
        if !version.starts_with(DBPS_AGENT_VERSION) {
            return Err(SequencerError::new(
                ErrorStage::DecryptVersionCheck,
                format!("unsupported dbps_agent_version: {version}"),
            ));
        }
        let mode = self
            .encryption_metadata
            .get(KEY_ENCRYPTION_MODE)
            .cloned()
            .ok_or_else(|| {
                SequencerError::new(ErrorStage::DecryptEncryptionModeValidation, "missing encryption_mode")
            })?;
        match mode.as_str() {
            MODE_PER_VALUE => {
                let decompressed = crate::compression::decompress(ciphertext, self.params.encrypted_compression)?;
                let (enc_levels, enc_values) = bytes::split_with_length_prefix(&decompressed)?;
                let levels = self.encryptor.decrypt_block(enc_levels)?;
                let typed = self.encryptor.decrypt_value_list(enc_values)?;
                let values = page::get_typed_list_as_value_bytes(
                    typed,
                    self.params.datatype,
                    self.params.datatype_length,
                    self.params.format,
                )
                .map_err(|e| SequencerError::new(ErrorStage::Decryption, e.to_string()))?;
                let joined = page::compress_and_join(&levels, &values, self.params.compression, &self.attrs)
                    .map_err(|e| SequencerError::new(ErrorStage::Decryption, e.to_string()))?;
                Ok(joined)
            }
            MODE_PER_BLOCK => Ok(self.encryptor.decrypt_block(ciphertext)?),
            other => Err(SequencerError::new(
                ErrorStage::DecryptEncryptionModeValidation,
                format!("unrecognised encryption_mode: {other}"),
            )),
        }
    }

    /// Replaces the sequencer's encryption metadata, letting a caller supply
    /// metadata produced by a prior `encrypt` call before decrypting.
    pub fn update_encryption_metadata(&mut self, metadata: HashMap<String, String>) {
        self.encryption_metadata = metadata;
    }
}

enum PerValueOutcome {
    Unsupported(String),
    Fatal(SequencerError),
}

fn classify_page_error(e: PageCodecError) -> PerValueOutcome {
    match e {
        PageCodecError::UnsupportedPageType(_) | PageCodecError::UnsupportedEncoding(_) => {
            PerValueOutcome::Unsupported(e.to_string())
        }
        other => PerValueOutcome::Fatal(SequencerError::new(ErrorStage::Encryption, other.to_string())),
    }
}

fn validate_parameters(params: &SequencerParams) -> Result<()> {
    if params.key_id.is_empty() {
        return Err(SequencerError::new(ErrorStage::ParameterValidation, "key_id must be non-empty"));
    }
    if params.datatype == DataType::FixedLenByteArray {
        match params.datatype_length {
            Some(l) if l > 0 => {}
            _ => {
                return Err(SequencerError::new(
                    ErrorStage::ParameterValidation,
                    "datatype_length must be positive for FIXED_LEN_BYTE_ARRAY",
                ))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::append_u32_le;
    use crate::compression;

    fn base_attrs(page_type: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("page_type".into(), page_type.into());
        m.insert("page_encoding".into(), "PLAIN".into());
        m
    }

    fn params(
        datatype: DataType,
        datatype_length: Option<u32>,
        attrs: HashMap<String, String>,
    ) -> SequencerParams {
        SequencerParams {
            column_name: "col".into(),
            datatype,
            datatype_length,
            compression: CompressionCodec::Snappy,
            format: Encoding::Plain,
            encoding_attributes: attrs,
            encrypted_compression: CompressionCodec::Snappy,
            key_id: "key-1".into(),
            user_id: "user-1".into(),
            application_context: "app".into(),
            encryption_metadata: HashMap::new(),
        }
    }

    #[test]
    fn dictionary_page_byte_array_round_trips_per_value() {
        let mut raw = Vec::new();
        append_u32_le(&mut raw, 5);
        raw.extend_from_slice(b"apple");
        append_u32_le(&mut raw, 6);
        raw.extend_from_slice(b"banana");
        let plaintext = compression::compress(&raw, CompressionCodec::Snappy).unwrap();

        let attrs = base_attrs("DICTIONARY_PAGE");
        let mut seq = DataBatchEncryptionSequencer::new(params(DataType::ByteArray, None, attrs)).unwrap();
        let encrypted = seq.convert_and_encrypt(&plaintext).unwrap();
        assert_eq!(seq.encryption_metadata.get("encryption_mode").unwrap(), "per_value");

        let mut decrypt_seq =
            DataBatchEncryptionSequencer::new(params(DataType::ByteArray, None, seq.encryption_metadata.clone()))
                .unwrap();
        let decrypted = decrypt_seq.convert_and_decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn rle_dictionary_forces_per_block_fallback() {
        let mut attrs = base_attrs("DICTIONARY_PAGE");
        attrs.insert("page_encoding".into(), "RLE_DICTIONARY".into());
        let plaintext = b"opaque-dictionary-bytes".to_vec();
        let mut seq = DataBatchEncryptionSequencer::new(params(DataType::ByteArray, None, attrs)).unwrap();
        let encrypted = seq.convert_and_encrypt(&plaintext).unwrap();
        assert_eq!(seq.encryption_metadata.get("encryption_mode").unwrap(), "per_block");

        let mut decrypt_seq =
            DataBatchEncryptionSequencer::new(params(DataType::ByteArray, None, seq.encryption_metadata.clone()))
                .unwrap();
        assert_eq!(decrypt_seq.convert_and_decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        let attrs = base_attrs("DICTIONARY_PAGE");
        let mut seq = DataBatchEncryptionSequencer::new(params(DataType::ByteArray, None, attrs)).unwrap();
        assert!(seq.convert_and_encrypt(&[]).is_err());
    }

    #[test]
    fn fixed_len_byte_array_without_length_fails_validation() {
        let attrs = base_attrs("DICTIONARY_PAGE");
        assert!(DataBatchEncryptionSequencer::new(params(DataType::FixedLenByteArray, None, attrs)).is_err());
    }

    #[test]
    fn decrypt_rejects_unknown_agent_version() {
        let attrs = base_attrs("DICTIONARY_PAGE");
        let mut seq = DataBatchEncryptionSequencer::new(params(DataType::ByteArray, None, attrs)).unwrap();
        let mut metadata = HashMap::new();
        metadata.insert("dbps_agent_version".into(), "v9.99".into());
        metadata.insert("encryption_mode".into(), "per_block".into());
        seq.update_encryption_metadata(metadata);
        assert!(seq.convert_and_decrypt(b"ciphertext").is_err());
    }
}
