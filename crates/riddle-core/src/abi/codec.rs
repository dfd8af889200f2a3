//! Head/tail ABI encoding for call arguments, return data and log data.

use super::types::{AbiType, AbiValue};
use crate::domain::value_objects::{keccak256, Address, Hash, U256};
use crate::errors::AbiError;

/// ABI word size in bytes.
pub const WORD: usize = 32;

/// Encodes a tuple of values.
#[must_use]
pub fn encode(values: &[AbiValue]) -> Vec<u8> {
    let head_size = WORD * values.len();
    let mut head = Vec::with_capacity(head_size);
    let mut tail = Vec::new();

    for value in values {
        match value {
            AbiValue::String(s) => {
                head.extend_from_slice(&usize_word(head_size + tail.len()));
                push_dynamic(&mut tail, s.as_bytes());
            }
            AbiValue::Bytes(b) => {
                head.extend_from_slice(&usize_word(head_size + tail.len()));
                push_dynamic(&mut tail, b);
            }
            other => head.extend_from_slice(&static_word(other)),
        }
    }

    head.extend(tail);
    head
}

/// Decodes a tuple of `types` from `data`.
pub fn decode(types: &[AbiType], data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
    types
        .iter()
        .enumerate()
        .map(|(index, ty)| {
            let word = word_at(data, index * WORD)?;
            if ty.is_dynamic() {
                decode_dynamic(*ty, data, word_to_usize(word)?)
            } else {
                decode_word(*ty, word)
            }
        })
        .collect()
}

/// Decodes a single static value from one word (also used for topics).
pub fn decode_word(ty: AbiType, word: &[u8; WORD]) -> Result<AbiValue, AbiError> {
    match ty {
        AbiType::Address => {
            if word[..12].iter().any(|b| *b != 0) {
                return Err(AbiError::InvalidAddress);
            }
            Ok(AbiValue::Address(Address::from_slice(&word[12..])))
        }
        AbiType::Bool => {
            if word[..31].iter().any(|b| *b != 0) {
                return Err(AbiError::InvalidBool);
            }
            match word[31] {
                0 => Ok(AbiValue::Bool(false)),
                1 => Ok(AbiValue::Bool(true)),
                _ => Err(AbiError::InvalidBool),
            }
        }
        AbiType::Uint256 => Ok(AbiValue::Uint(U256::from_big_endian(word))),
        AbiType::FixedBytes32 => Ok(AbiValue::FixedBytes(Hash::from(*word))),
        AbiType::String | AbiType::Bytes => Err(AbiError::UnsupportedType(format!(
            "{ty} cannot be decoded from a single word"
        ))),
    }
}

/// Topic representation of an indexed value.
///
/// Dynamic values are indexed by their keccak256 hash.
#[must_use]
pub fn encode_topic(value: &AbiValue) -> Hash {
    match value {
        AbiValue::String(s) => keccak256(s.as_bytes()),
        AbiValue::Bytes(b) => keccak256(b),
        other => Hash::from(static_word(other)),
    }
}

fn static_word(value: &AbiValue) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    match value {
        AbiValue::Address(a) => word[12..].copy_from_slice(a.as_bytes()),
        AbiValue::Bool(b) => word[31] = u8::from(*b),
        AbiValue::Uint(u) => u.to_big_endian(&mut word),
        AbiValue::FixedBytes(h) => word.copy_from_slice(h.as_bytes()),
        // encoded out of line
        AbiValue::String(_) | AbiValue::Bytes(_) => {}
    }
    word
}

fn push_dynamic(tail: &mut Vec<u8>, bytes: &[u8]) {
    tail.extend_from_slice(&usize_word(bytes.len()));
    tail.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    tail.resize(tail.len() + padding, 0);
}

fn usize_word(n: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&(n as u64).to_be_bytes());
    word
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8; WORD], AbiError> {
    let end = offset.checked_add(WORD).ok_or(AbiError::InvalidOffset)?;
    data.get(offset..end)
        .and_then(|slice| <&[u8; WORD]>::try_from(slice).ok())
        .ok_or(AbiError::DataTooShort {
            needed: end,
            available: data.len(),
        })
}

fn word_to_usize(word: &[u8; WORD]) -> Result<usize, AbiError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::InvalidOffset);
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(low)).map_err(|_| AbiError::InvalidOffset)
}

fn decode_dynamic(ty: AbiType, data: &[u8], offset: usize) -> Result<AbiValue, AbiError> {
    let len = word_to_usize(word_at(data, offset)?)?;
    let start = offset.checked_add(WORD).ok_or(AbiError::InvalidOffset)?;
    let end = start.checked_add(len).ok_or(AbiError::InvalidOffset)?;
    let bytes = data.get(start..end).ok_or(AbiError::DataTooShort {
        needed: end,
        available: data.len(),
    })?;

    match ty {
        AbiType::String => String::from_utf8(bytes.to_vec())
            .map(AbiValue::String)
            .map_err(|_| AbiError::InvalidUtf8),
        AbiType::Bytes => Ok(AbiValue::Bytes(bytes.to_vec())),
        other => Err(AbiError::UnsupportedType(other.to_string())),
    }
}
