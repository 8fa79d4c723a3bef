//! Parquet page codec.
//!
//! Splits a page payload into level bytes and value bytes (and joins them back)
//! according to the rules for each page variant, and slices/combines value bytes
//! into per-element chunks according to datatype. This is the component the
//! encryption sequencer leans on most heavily.

use std::collections::HashMap;

use thiserror::Error;

use crate::bytes::{self, BytesError};
use crate::compression::{self, CompressionCodec, CompressionError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageCodecError {
    #[error("unsupported page type: {0:?}")]
    UnsupportedPageType(PageType),
    #[error("unsupported value encoding for per-value access: {0:?}")]
    UnsupportedEncoding(Encoding),
    #[error("level byte encoding must be RLE, found {0:?}")]
    InvalidLevelEncoding(String),
    #[error("level bytes length mismatch: computed {computed}, supplied {supplied}")]
    LevelLengthMismatch { computed: usize, supplied: usize },
    #[error("value byte length {len} is not a multiple of element width {width}")]
    NotAMultipleOfWidth { len: usize, width: usize },
    #[error("byte array record truncated")]
    TruncatedByteArrayRecord,
    #[error("fixed length byte array requires a positive datatype_length")]
    MissingFixedLength,
    #[error("unrecognised page_type: {0}")]
    UnrecognisedPageType(String),
    #[error("unrecognised page_encoding: {0}")]
    UnrecognisedPageEncoding(String),
    #[error("malformed integer encoding attribute {key}: {value}")]
    InvalidIntegerAttribute { key: &'static str, value: String },
    #[error("malformed boolean encoding attribute {key}: {value}")]
    InvalidBooleanAttribute { key: &'static str, value: String },
    #[error(transparent)]
    Bytes(#[from] BytesError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

pub type Result<T> = std::result::Result<T, PageCodecError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int32,
    Int64,
    Int96,
    Float,
    Double,
    ByteArray,
    FixedLenByteArray,
    Boolean,
}

impl DataType {
    /// Fixed element width in bytes, or `None` for `ByteArray` (variable width).
    pub fn fixed_width(&self, datatype_length: Option<u32>) -> Option<usize> {
        match self {
            DataType::Int32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::Double => Some(8),
            DataType::Int96 => Some(12),
            DataType::FixedLenByteArray => datatype_length.map(|l| l as usize),
            DataType::Boolean => Some(1),
            DataType::ByteArray => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    DataPageV1,
    DataPageV2,
    DictionaryPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    RleDictionary,
    Other,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Other
    }
}

/// Parsed subset of a page's encoding attributes relevant to level/value splitting.
#[derive(Debug, Clone, Default)]
pub struct EncodingAttributes {
    pub page_type: Option<PageType>,
    pub data_page_max_definition_level: u32,
    pub data_page_max_repetition_level: u32,
    pub page_v1_definition_level_encoding: String,
    pub page_v1_repetition_level_encoding: String,
    pub page_v2_definition_levels_byte_length: u32,
    pub page_v2_repetition_levels_byte_length: u32,
    pub page_v2_is_compressed: bool,
    pub page_encoding: Encoding,
}

/// Parquet value encodings recognised as legitimate `page_encoding` values
/// beyond the two this module special-cases (`PLAIN`, `RLE_DICTIONARY`).
/// Anything outside this set is treated as a malformed attribute rather than
/// silently falling through to `Other`.
const KNOWN_PAGE_ENCODINGS: &[&str] = &[
    "PLAIN",
    "PLAIN_DICTIONARY",
    "RLE",
    "BIT_PACKED",
    "DELTA_BINARY_PACKED",
    "DELTA_LENGTH_BYTE_ARRAY",
    "DELTA_BYTE_ARRAY",
    "RLE_DICTIONARY",
    "BYTE_STREAM_SPLIT",
];

impl EncodingAttributes {
    /// Builds attributes from a raw string map, as received over the wire.
    /// Every recognised key is validated; a key present but unparseable
    /// fails with the matching `PageCodecError` variant rather than silently
    /// defaulting, since a silently-wrong attribute would corrupt level/value
    /// splitting downstream without ever surfacing.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let page_type = match map.get("page_type").map(String::as_str) {
            Some("DATA_PAGE_V1") => Some(PageType::DataPageV1),
            Some("DATA_PAGE_V2") => Some(PageType::DataPageV2),
            Some("DICTIONARY_PAGE") => Some(PageType::DictionaryPage),
            Some(other) => return Err(PageCodecError::UnrecognisedPageType(other.to_string())),
            None => None,
        };
        let page_encoding = match map.get("page_encoding").map(String::as_str) {
            Some("PLAIN") => Encoding::Plain,
            Some("RLE_DICTIONARY") => Encoding::RleDictionary,
            Some(other) if KNOWN_PAGE_ENCODINGS.contains(&other) => Encoding::Other,
            Some(other) => return Err(PageCodecError::UnrecognisedPageEncoding(other.to_string())),
            None => Encoding::Other,
        };
        Ok(EncodingAttributes {
            page_type,
            data_page_max_definition_level: parse_u32(map, "data_page_max_definition_level")?,
            data_page_max_repetition_level: parse_u32(map, "data_page_max_repetition_level")?,
            page_v1_definition_level_encoding: map
                .get("page_v1_definition_level_encoding")
                .cloned()
                .unwrap_or_default(),
            page_v1_repetition_level_encoding: map
                .get("page_v1_repetition_level_encoding")
                .cloned()
                .unwrap_or_default(),
            page_v2_definition_levels_byte_length: parse_u32(map, "page_v2_definition_levels_byte_length")?,
            page_v2_repetition_levels_byte_length: parse_u32(map, "page_v2_repetition_levels_byte_length")?,
            page_v2_is_compressed: parse_bool(map, "page_v2_is_compressed")?,
            page_encoding,
        })
    }
}

fn parse_u32(map: &HashMap<String, String>, key: &'static str) -> Result<u32> {
    match map.get(key) {
        None => Ok(0),
        Some(v) => v.parse().map_err(|_| PageCodecError::InvalidIntegerAttribute { key, value: v.clone() }),
    }
}

fn parse_bool(map: &HashMap<String, String>, key: &'static str) -> Result<bool> {
    match map.get(key).map(String::as_str) {
        None => Ok(false),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(PageCodecError::InvalidBooleanAttribute { key, value: other.to_string() }),
    }
}

/// Computes the length, in bytes, of the level-byte prefix of `raw`.
pub fn calculate_level_bytes_length(raw: &[u8], attrs: &EncodingAttributes) -> Result<usize> {
    match attrs.page_type {
        Some(PageType::DictionaryPage) => Ok(0),
        Some(PageType::DataPageV2) => Ok((attrs.page_v2_definition_levels_byte_length
            + attrs.page_v2_repetition_levels_byte_length) as usize),
        Some(PageType::DataPageV1) => {
            let mut offset = 0usize;
            if attrs.data_page_max_repetition_level > 0 {
                validate_rle(&attrs.page_v1_repetition_level_encoding)?;
                offset += consume_rle_block(raw, offset)?;
            }
            if attrs.data_page_max_definition_level > 0 {
                validate_rle(&attrs.page_v1_definition_level_encoding)?;
                offset += consume_rle_block(raw, offset)?;
            }
            Ok(offset)
        }
        None => Err(PageCodecError::UnsupportedPageType(PageType::DataPageV1)),
    }
}

fn validate_rle(encoding: &str) -> Result<()> {
    if encoding != "RLE" {
        return Err(PageCodecError::InvalidLevelEncoding(encoding.to_string()));
    }
    Ok(())
}

fn consume_rle_block(raw: &[u8], offset: usize) -> Result<usize> {
    let len = bytes::read_u32_le(&raw[offset..])? as usize;
    if offset + 4 + len > raw.len() {
        return Err(PageCodecError::Bytes(BytesError::TruncatedLengthPrefix {
            expected: offset + 4 + len,
            found: raw.len(),
        }));
    }
    Ok(4 + len)
}

/// Splits a (possibly compressed) page payload into `(level_bytes, value_bytes)`,
/// decompressing exactly the span each page variant specifies.
pub fn decompress_and_split(
    payload: &[u8],
    codec: CompressionCodec,
    attrs: &EncodingAttributes,
) -> Result<(Vec<u8>, Vec<u8>)> {
    log::debug!("decompress_and_split: page_type={:?}, payload_len={}", attrs.page_type, payload.len());
    match attrs.page_type {
        Some(PageType::DataPageV1) => {
            let decompressed = compression::decompress(payload, codec)?;
            let level_len = calculate_level_bytes_length(&decompressed, attrs)?;
            let (levels, values) = bytes::split(&decompressed, level_len)?;
            Ok((levels.to_vec(), values.to_vec()))
        }
        Some(PageType::DataPageV2) => {
            let level_len = calculate_level_bytes_length(payload, attrs)?;
            let (levels, rest) = bytes::split(payload, level_len)?;
            let values = if attrs.page_v2_is_compressed {
                compression::decompress(rest, codec)?
            } else {
                rest.to_vec()
            };
            Ok((levels.to_vec(), values))
        }
        Some(PageType::DictionaryPage) => {
            let values = compression::decompress(payload, codec)?;
            Ok((Vec::new(), values))
        }
        None => Err(PageCodecError::UnsupportedPageType(PageType::DataPageV1)),
    }
}

/// Inverse of [`decompress_and_split`].
pub fn compress_and_join(
    level_bytes: &[u8],
    value_bytes: &[u8],
    codec: CompressionCodec,
    attrs: &EncodingAttributes,
) -> Result<Vec<u8>> {
    let computed = calculate_level_bytes_length(level_bytes, attrs)?;
    if attrs.page_type != Some(PageType::DictionaryPage) && computed != level_bytes.len() {
        log::error!(
            "level bytes length mismatch: computed {computed}, supplied {}",
            level_bytes.len()
        );
        return Err(PageCodecError::LevelLengthMismatch {
            computed,
            supplied: level_bytes.len(),
        });
    }
    match attrs.page_type {
        Some(PageType::DataPageV1) => {
            let joined = bytes::join(level_bytes, value_bytes);
            Ok(compression::compress(&joined, codec)?)
        }
        Some(PageType::DataPageV2) => {
            if attrs.page_v2_is_compressed {
                let compressed_values = compression::compress(value_bytes, codec)?;
                Ok(bytes::join(level_bytes, &compressed_values))
            } else {
                Ok(bytes::join(level_bytes, value_bytes))
            }
        }
        Some(PageType::DictionaryPage) => Ok(compression::compress(value_bytes, codec)?),
        None => Err(PageCodecError::UnsupportedPageType(PageType::DataPageV1)),
    }
}

/// Slices `value_bytes` into per-element raw byte chunks. Only `PLAIN` encoding
/// is supported; anything else (notably `RLE_DICTIONARY`) is rejected so callers
/// can fall back to per-block handling.
pub fn slice_value_bytes(
    value_bytes: &[u8],
    datatype: DataType,
    datatype_length: Option<u32>,
    encoding: Encoding,
) -> Result<Vec<Vec<u8>>> {
    if encoding != Encoding::Plain {
        return Err(PageCodecError::UnsupportedEncoding(encoding));
    }
    if datatype == DataType::Boolean {
        return Err(PageCodecError::UnsupportedEncoding(encoding));
    }
    match datatype.fixed_width(datatype_length) {
        Some(width) if datatype != DataType::ByteArray => {
            if datatype == DataType::FixedLenByteArray && width == 0 {
                return Err(PageCodecError::MissingFixedLength);
            }
            if value_bytes.len() % width != 0 {
                return Err(PageCodecError::NotAMultipleOfWidth {
                    len: value_bytes.len(),
                    width,
                });
            }
            Ok(value_bytes.chunks(width).map(|c| c.to_vec()).collect())
        }
        _ => {
            let mut out = Vec::new();
            let mut offset = 0usize;
            while offset < value_bytes.len() {
                let len = bytes::read_u32_le(&value_bytes[offset..])? as usize;
                offset += 4;
                if offset + len > value_bytes.len() {
                    return Err(PageCodecError::TruncatedByteArrayRecord);
                }
                out.push(value_bytes[offset..offset + len].to_vec());
                offset += len;
            }
            Ok(out)
        }
    }
}

/// Inverse of [`slice_value_bytes`].
pub fn combine_raw_bytes(
    elements: &[Vec<u8>],
    datatype: DataType,
    datatype_length: Option<u32>,
    encoding: Encoding,
) -> Result<Vec<u8>> {
    if encoding != Encoding::Plain {
        return Err(PageCodecError::UnsupportedEncoding(encoding));
    }
    match datatype.fixed_width(datatype_length) {
        Some(width) if datatype != DataType::ByteArray => {
            let mut out = Vec::with_capacity(elements.len() * width);
            for e in elements {
                if e.len() != width {
                    return Err(PageCodecError::NotAMultipleOfWidth { len: e.len(), width });
                }
                out.extend_from_slice(e);
            }
            Ok(out)
        }
        _ => {
            let mut out = Vec::new();
            for e in elements {
                bytes::append_u32_le(&mut out, e.len() as u32);
                out.extend_from_slice(e);
            }
            Ok(out)
        }
    }
}

pub fn parse_value_bytes_into_typed_list(
    value_bytes: &[u8],
    datatype: DataType,
    datatype_length: Option<u32>,
    encoding: Encoding,
) -> Result<crate::bytes::TypedList> {
    let elements = slice_value_bytes(value_bytes, datatype, datatype_length, encoding)?;
    Ok(crate::bytes::build_typed_list_from_raw_bytes(datatype, elements)?)
}

pub fn get_typed_list_as_value_bytes(
    list: crate::bytes::TypedList,
    datatype: DataType,
    datatype_length: Option<u32>,
    encoding: Encoding,
) -> Result<Vec<u8>> {
    let elements = crate::bytes::build_raw_bytes_from_typed_list(list);
    combine_raw_bytes(&elements, datatype, datatype_length, encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_attrs(max_rep: u32, max_def: u32) -> EncodingAttributes {
        EncodingAttributes {
            page_type: Some(PageType::DataPageV1),
            data_page_max_repetition_level: max_rep,
            data_page_max_definition_level: max_def,
            page_v1_definition_level_encoding: "RLE".into(),
            page_v1_repetition_level_encoding: "RLE".into(),
            page_encoding: Encoding::Plain,
            ..Default::default()
        }
    }

    #[test]
    fn v1_with_no_levels_has_zero_level_bytes() {
        let attrs = v1_attrs(0, 0);
        let raw = b"values-only".to_vec();
        assert_eq!(calculate_level_bytes_length(&raw, &attrs).unwrap(), 0);
    }

    #[test]
    fn v1_level_bytes_sum_both_rle_blocks() {
        let attrs = v1_attrs(1, 1);
        let mut raw = Vec::new();
        bytes::append_u32_le(&mut raw, 1);
        raw.push(0xAA);
        bytes::append_u32_le(&mut raw, 2);
        raw.extend_from_slice(&[0xBB, 0xCC]);
        raw.extend_from_slice(b"value-bytes");
        assert_eq!(calculate_level_bytes_length(&raw, &attrs).unwrap(), 4 + 1 + 4 + 2);
    }

    #[test]
    fn v2_value_bytes_pass_through_when_not_compressed() {
        let attrs = EncodingAttributes {
            page_type: Some(PageType::DataPageV2),
            page_v2_definition_levels_byte_length: 2,
            page_v2_repetition_levels_byte_length: 1,
            page_v2_is_compressed: false,
            page_encoding: Encoding::Plain,
            ..Default::default()
        };
        let payload = bytes::join(&[0, 0, 0], b"raw-values");
        let (levels, values) = decompress_and_split(&payload, CompressionCodec::Uncompressed, &attrs).unwrap();
        assert_eq!(levels, vec![0, 0, 0]);
        assert_eq!(values, b"raw-values");
    }

    #[test]
    fn fixed_len_byte_array_requires_length() {
        let err = slice_value_bytes(b"12345678", DataType::FixedLenByteArray, None, Encoding::Plain);
        assert!(matches!(err, Err(PageCodecError::MissingFixedLength)));
    }

    #[test]
    fn rle_dictionary_encoding_is_rejected_for_per_value_access() {
        let err = slice_value_bytes(b"abcd", DataType::Int32, None, Encoding::RleDictionary);
        assert!(matches!(err, Err(PageCodecError::UnsupportedEncoding(_))));
    }

    #[test]
    fn byte_array_slice_and_combine_round_trip() {
        let mut raw = Vec::new();
        bytes::append_u32_le(&mut raw, 5);
        raw.extend_from_slice(b"apple");
        bytes::append_u32_le(&mut raw, 6);
        raw.extend_from_slice(b"banana");
        let elements = slice_value_bytes(&raw, DataType::ByteArray, None, Encoding::Plain).unwrap();
        assert_eq!(elements, vec![b"apple".to_vec(), b"banana".to_vec()]);
        let combined = combine_raw_bytes(&elements, DataType::ByteArray, None, Encoding::Plain).unwrap();
        assert_eq!(combined, raw);
    }
}
