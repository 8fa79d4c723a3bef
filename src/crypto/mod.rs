//! Encryptor interface and the reference implementation.
//!
//! The sequencer is deliberately ignorant of which cryptographic primitive is in
//! use: it only ever calls through this trait, bound once at construction time to
//! a `(key_id, column_name, user_id, application_context, datatype)` tuple.
//! Production deployments swap in a real primitive; the `BasicEncryptor` here is
//! an XOR keystream, good enough to prove the sequencer's data flow round-trips.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::bytes::TypedList;
use crate::page::DataType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryptor key_id must be non-empty")]
    EmptyKeyId,
    #[error("malformed value list payload")]
    MalformedValueList,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Binds an encryptor instance to the context it was constructed for.
#[derive(Debug, Clone)]
pub struct EncryptionContext {
    pub key_id: String,
    pub column_name: String,
    pub user_id: String,
    pub application_context: String,
    pub datatype: DataType,
}

/// Abstract block/value encryptor. Implementations must satisfy
/// `decrypt_block(encrypt_block(x)) == x` and
/// `decrypt_value_list(encrypt_value_list(x)) == x`.
pub trait Encryptor: Send + Sync {
    fn encrypt_block(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt_block(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
    fn encrypt_value_list(&self, values: TypedList) -> Result<Vec<u8>>;
    fn decrypt_value_list(&self, bytes: &[u8]) -> Result<TypedList>;
}

/// XOR-keystream reference encryptor. The keystream is derived from a SHA-256
/// digest of the key id plus the binding context, so two different bindings
/// never share a keystream even with the same `key_id`.
pub struct BasicEncryptor {
    keystream_seed: [u8; 32],
}

impl BasicEncryptor {
    pub fn new(ctx: &EncryptionContext) -> Result<Self> {
        if ctx.key_id.is_empty() {
            return Err(CryptoError::EmptyKeyId);
        }
        let mut hasher = Sha256::new();
        hasher.update(ctx.key_id.as_bytes());
        hasher.update(b"|");
        hasher.update(ctx.column_name.as_bytes());
        hasher.update(b"|");
        hasher.update(ctx.user_id.as_bytes());
        hasher.update(b"|");
        hasher.update(ctx.application_context.as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", ctx.datatype).as_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        Ok(BasicEncryptor { keystream_seed: seed })
    }

    fn keystream_byte(&self, index: usize) -> u8 {
        self.keystream_seed[index % self.keystream_seed.len()]
    }

    fn xor(&self, bytes: &[u8]) -> Vec<u8> {
        bytes
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ self.keystream_byte(i))
            .collect()
    }
}

impl Encryptor for BasicEncryptor {
    fn encrypt_block(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.xor(plaintext))
    }

    fn decrypt_block(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.xor(ciphertext))
    }

    fn encrypt_value_list(&self, values: TypedList) -> Result<Vec<u8>> {
        let serialized = serialize_typed_list(&values);
        Ok(self.xor(&serialized))
    }

    fn decrypt_value_list(&self, bytes: &[u8]) -> Result<TypedList> {
        let plain = self.xor(bytes);
        deserialize_typed_list(&plain)
    }
}

const TAG_INT32: u8 = 0;
const TAG_INT64: u8 = 1;
const TAG_INT96: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_BYTES: u8 = 5;

/// Self-describing serialisation: `[tag:u8][count:u32_le][elements...]`.
fn serialize_typed_list(list: &TypedList) -> Vec<u8> {
    let mut out = Vec::new();
    match list {
        TypedList::Int32(v) => {
            out.push(TAG_INT32);
            crate::bytes::append_u32_le(&mut out, v.len() as u32);
            for x in v {
                crate::bytes::append_i32_le(&mut out, *x);
            }
        }
        TypedList::Int64(v) => {
            out.push(TAG_INT64);
            crate::bytes::append_u32_le(&mut out, v.len() as u32);
            for x in v {
                crate::bytes::append_i64_le(&mut out, *x);
            }
        }
        TypedList::Int96(v) => {
            out.push(TAG_INT96);
            crate::bytes::append_u32_le(&mut out, v.len() as u32);
            for [a, b, c] in v {
                crate::bytes::append_u32_le(&mut out, *a);
                crate::bytes::append_u32_le(&mut out, *b);
                crate::bytes::append_u32_le(&mut out, *c);
            }
        }
        TypedList::Float(v) => {
            out.push(TAG_FLOAT);
            crate::bytes::append_u32_le(&mut out, v.len() as u32);
            for x in v {
                crate::bytes::append_f32_le(&mut out, *x);
            }
        }
        TypedList::Double(v) => {
            out.push(TAG_DOUBLE);
            crate::bytes::append_u32_le(&mut out, v.len() as u32);
            for x in v {
                crate::bytes::append_f64_le(&mut out, *x);
            }
        }
        TypedList::Bytes(v) => {
            out.push(TAG_BYTES);
            crate::bytes::append_u32_le(&mut out, v.len() as u32);
            for e in v {
                crate::bytes::append_u32_le(&mut out, e.len() as u32);
                out.extend_from_slice(e);
            }
        }
    }
    out
}

fn deserialize_typed_list(bytes: &[u8]) -> Result<TypedList> {
    if bytes.is_empty() {
        return Err(CryptoError::MalformedValueList);
    }
    let tag = bytes[0];
    let count = crate::bytes::read_u32_le(&bytes[1..]).map_err(|_| CryptoError::MalformedValueList)? as usize;
    let mut offset = 5usize;
    let read = |offset: &mut usize, n: usize| -> Result<&[u8]> {
        let slice = bytes.get(*offset..*offset + n).ok_or(CryptoError::MalformedValueList)?;
        *offset += n;
        Ok(slice)
    };
    match tag {
        TAG_INT32 => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let s = read(&mut offset, 4)?;
                out.push(i32::from_le_bytes(s.try_into().unwrap()));
            }
            Ok(TypedList::Int32(out))
        }
        TAG_INT64 => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let s = read(&mut offset, 8)?;
                out.push(i64::from_le_bytes(s.try_into().unwrap()));
            }
            Ok(TypedList::Int64(out))
        }
        TAG_INT96 => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let s = read(&mut offset, 12)?;
                let a = u32::from_le_bytes(s[0..4].try_into().unwrap());
                let b = u32::from_le_bytes(s[4..8].try_into().unwrap());
                let c = u32::from_le_bytes(s[8..12].try_into().unwrap());
                out.push([a, b, c]);
            }
            Ok(TypedList::Int96(out))
        }
        TAG_FLOAT => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let s = read(&mut offset, 4)?;
                out.push(f32::from_bits(u32::from_le_bytes(s.try_into().unwrap())));
            }
            Ok(TypedList::Float(out))
        }
        TAG_DOUBLE => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let s = read(&mut offset, 8)?;
                out.push(f64::from_bits(u64::from_le_bytes(s.try_into().unwrap())));
            }
            Ok(TypedList::Double(out))
        }
        TAG_BYTES => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let len = u32::from_le_bytes(read(&mut offset, 4)?.try_into().unwrap()) as usize;
                let s = read(&mut offset, len)?;
                out.push(s.to_vec());
            }
            Ok(TypedList::Bytes(out))
        }
        _ => Err(CryptoError::MalformedValueList),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EncryptionContext {
        EncryptionContext {
            key_id: "key-1".into(),
            column_name: "col".into(),
            user_id: "user-1".into(),
            application_context: "app".into(),
            datatype: DataType::Int32,
        }
    }

    #[test]
    fn block_round_trips() {
        let enc = BasicEncryptor::new(&ctx()).unwrap();
        let plaintext = b"hello world".to_vec();
        let ciphertext = enc.encrypt_block(&plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(enc.decrypt_block(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn value_list_round_trips() {
        let enc = BasicEncryptor::new(&ctx()).unwrap();
        let list = TypedList::Int32(vec![1, -2, 3]);
        let ciphertext = enc.encrypt_value_list(list.clone()).unwrap();
        assert_eq!(enc.decrypt_value_list(&ciphertext).unwrap(), list);
    }

    #[test]
    fn empty_key_id_is_rejected() {
        let mut c = ctx();
        c.key_id = String::new();
        assert!(BasicEncryptor::new(&c).is_err());
    }
}
