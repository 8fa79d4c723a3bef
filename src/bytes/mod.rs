//! Little-endian byte encoding and length-prefixed framing helpers.
//!
//! Every multi-byte numeric value that crosses a page boundary in this crate is
//! little-endian, matching the Parquet wire format. This module also carries the
//! typed value list: the tagged union the page codec slices raw value bytes into.

use thiserror::Error;

use crate::page::DataType;

/// Errors raised while encoding, decoding, or framing raw bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytesError {
    #[error("split index {index} out of bounds for buffer of length {len}")]
    SplitOutOfBounds { index: usize, len: usize },
    #[error("length prefix {0} exceeds u32::MAX")]
    LengthPrefixOverflow(usize),
    #[error("truncated length-prefixed buffer: expected {expected} bytes, found {found}")]
    TruncatedLengthPrefix { expected: usize, found: usize },
    #[error("buffer of length {len} is not a multiple of element width {width}")]
    NotAMultipleOfWidth { len: usize, width: usize },
    #[error("unsupported datatype for raw byte conversion: {0:?}")]
    UnsupportedDatatype(DataType),
}

pub type Result<T> = std::result::Result<T, BytesError>;

pub fn append_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_i32_le(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_u64_le(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_i64_le(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_f32_le(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_bits().to_le_bytes());
}

pub fn append_f64_le(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_bits().to_le_bytes());
}

pub fn read_u32_le(bytes: &[u8]) -> Result<u32> {
    let arr: [u8; 4] = bytes
        .get(0..4)
        .ok_or(BytesError::TruncatedLengthPrefix {
            expected: 4,
            found: bytes.len(),
        })?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(arr))
}

/// Concatenates two buffers.
pub fn join(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

/// Splits `bytes` at `index`, failing if `index` is out of bounds.
pub fn split(bytes: &[u8], index: usize) -> Result<(&[u8], &[u8])> {
    if index > bytes.len() {
        return Err(BytesError::SplitOutOfBounds {
            index,
            len: bytes.len(),
        });
    }
    Ok((&bytes[..index], &bytes[index..]))
}

/// Joins `leading` and `trailing` as `[u32_le len(leading)][leading][trailing]`.
pub fn join_with_length_prefix(leading: &[u8], trailing: &[u8]) -> Result<Vec<u8>> {
    if leading.len() > u32::MAX as usize {
        return Err(BytesError::LengthPrefixOverflow(leading.len()));
    }
    let mut out = Vec::with_capacity(4 + leading.len() + trailing.len());
    append_u32_le(&mut out, leading.len() as u32);
    out.extend_from_slice(leading);
    out.extend_from_slice(trailing);
    Ok(out)
}

/// Inverse of [`join_with_length_prefix`].
pub fn split_with_length_prefix(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let len = read_u32_le(bytes)? as usize;
    let body = &bytes[4..];
    if len > body.len() {
        log::error!("truncated length-prefixed buffer: expected {len} bytes, found {}", body.len());
        return Err(BytesError::TruncatedLengthPrefix {
            expected: len,
            found: body.len(),
        });
    }
    Ok((&body[..len], &body[len..]))
}

/// A tagged union over the value variants the page codec produces.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedList {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Int96(Vec<[u32; 3]>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Bytes(Vec<Vec<u8>>),
}

/// Builds a [`TypedList`] from per-element raw byte slices, validating widths.
pub fn build_typed_list_from_raw_bytes(datatype: DataType, elements: Vec<Vec<u8>>) -> Result<TypedList> {
    log::debug!("build_typed_list_from_raw_bytes: datatype={datatype:?}, elements={}", elements.len());
    match datatype {
        DataType::Int32 => {
            let mut out = Vec::with_capacity(elements.len());
            for e in &elements {
                let arr: [u8; 4] = e
                    .as_slice()
                    .try_into()
                    .map_err(|_| BytesError::NotAMultipleOfWidth { len: e.len(), width: 4 })?;
                out.push(i32::from_le_bytes(arr));
            }
            Ok(TypedList::Int32(out))
        }
        DataType::Int64 => {
            let mut out = Vec::with_capacity(elements.len());
            for e in &elements {
                let arr: [u8; 8] = e
                    .as_slice()
                    .try_into()
                    .map_err(|_| BytesError::NotAMultipleOfWidth { len: e.len(), width: 8 })?;
                out.push(i64::from_le_bytes(arr));
            }
            Ok(TypedList::Int64(out))
        }
        DataType::Int96 => {
            let mut out = Vec::with_capacity(elements.len());
            for e in &elements {
                if e.len() != 12 {
                    return Err(BytesError::NotAMultipleOfWidth { len: e.len(), width: 12 });
                }
                let a = u32::from_le_bytes(e[0..4].try_into().unwrap());
                let b = u32::from_le_bytes(e[4..8].try_into().unwrap());
                let c = u32::from_le_bytes(e[8..12].try_into().unwrap());
                out.push([a, b, c]);
            }
            Ok(TypedList::Int96(out))
        }
        DataType::Float => {
            let mut out = Vec::with_capacity(elements.len());
            for e in &elements {
                let arr: [u8; 4] = e
                    .as_slice()
                    .try_into()
                    .map_err(|_| BytesError::NotAMultipleOfWidth { len: e.len(), width: 4 })?;
                out.push(f32::from_bits(u32::from_le_bytes(arr)));
            }
            Ok(TypedList::Float(out))
        }
        DataType::Double => {
            let mut out = Vec::with_capacity(elements.len());
            for e in &elements {
                let arr: [u8; 8] = e
                    .as_slice()
                    .try_into()
                    .map_err(|_| BytesError::NotAMultipleOfWidth { len: e.len(), width: 8 })?;
                out.push(f64::from_bits(u64::from_le_bytes(arr)));
            }
            Ok(TypedList::Double(out))
        }
        DataType::ByteArray | DataType::FixedLenByteArray => Ok(TypedList::Bytes(elements)),
        DataType::Boolean => Err(BytesError::UnsupportedDatatype(datatype)),
    }
}

/// Inverse of [`build_typed_list_from_raw_bytes`].
pub fn build_raw_bytes_from_typed_list(list: TypedList) -> Vec<Vec<u8>> {
    match list {
        TypedList::Int32(v) => v.into_iter().map(|x| x.to_le_bytes().to_vec()).collect(),
        TypedList::Int64(v) => v.into_iter().map(|x| x.to_le_bytes().to_vec()).collect(),
        TypedList::Int96(v) => v
            .into_iter()
            .map(|[a, b, c]| {
                let mut out = Vec::with_capacity(12);
                out.extend_from_slice(&a.to_le_bytes());
                out.extend_from_slice(&b.to_le_bytes());
                out.extend_from_slice(&c.to_le_bytes());
                out
            })
            .collect(),
        TypedList::Float(v) => v.into_iter().map(|x| x.to_bits().to_le_bytes().to_vec()).collect(),
        TypedList::Double(v) => v.into_iter().map(|x| x.to_bits().to_le_bytes().to_vec()).collect(),
        TypedList::Bytes(v) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_with_length_prefix_round_trips() {
        let leading = b"abc".to_vec();
        let trailing = b"defgh".to_vec();
        let framed = join_with_length_prefix(&leading, &trailing).unwrap();
        let (a, b) = split_with_length_prefix(&framed).unwrap();
        assert_eq!(a, leading.as_slice());
        assert_eq!(b, trailing.as_slice());
    }

    #[test]
    fn split_with_length_prefix_rejects_truncation() {
        let mut bad = Vec::new();
        append_u32_le(&mut bad, 100);
        bad.extend_from_slice(b"short");
        assert!(split_with_length_prefix(&bad).is_err());
    }

    #[test]
    fn split_rejects_out_of_bounds_index() {
        let buf = b"hello".to_vec();
        assert!(split(&buf, 10).is_err());
        let (a, b) = split(&buf, 2).unwrap();
        assert_eq!(a, b"he");
        assert_eq!(b, b"llo");
    }

    #[test]
    fn typed_list_int32_round_trips() {
        let elements = vec![1i32.to_le_bytes().to_vec(), (-7i32).to_le_bytes().to_vec()];
        let list = build_typed_list_from_raw_bytes(DataType::Int32, elements.clone()).unwrap();
        assert_eq!(list, TypedList::Int32(vec![1, -7]));
        assert_eq!(build_raw_bytes_from_typed_list(list), elements);
    }

    #[test]
    fn typed_list_rejects_boolean() {
        assert!(build_typed_list_from_raw_bytes(DataType::Boolean, vec![vec![1]]).is_err());
    }
}
