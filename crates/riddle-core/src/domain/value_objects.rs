//! # Value Objects
//!
//! Ledger primitives with JSON-RPC hex serialization.

use crate::errors::ValueError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

// Re-export primitive types for convenience
pub use primitive_types::{H160 as Address, H256 as Hash, U256};

/// Transaction hash returned by `eth_sendTransaction`.
pub type TxHash = Hash;

/// Computes keccak256 hash of data.
#[must_use]
pub fn keccak256(data: &[u8]) -> Hash {
    let digest: [u8; 32] = Keccak256::digest(data).into();
    Hash::from(digest)
}

/// Parses a `0x`-prefixed (or bare) 40 hex digit address.
pub fn parse_address(value: &str) -> Result<Address, ValueError> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 20 {
        return Err(ValueError::InvalidLength {
            expected: 20,
            actual: bytes.len(),
        });
    }
    Ok(Address::from_slice(&bytes))
}

/// Parses a `0x`-prefixed (or bare) 64 hex digit hash.
pub fn parse_hash(value: &str) -> Result<Hash, ValueError> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 32 {
        return Err(ValueError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    Ok(Hash::from_slice(&bytes))
}

/// Full lowercase hex form of an address (`H160`'s `Display` abbreviates).
#[must_use]
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// EIP-55 mixed-case checksum form of an address, as wallets display it.
#[must_use]
pub fn checksum_address(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let digest = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest.as_bytes()[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Full lowercase hex form of a hash.
#[must_use]
pub fn hash_hex(hash: &Hash) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

fn decode_hex(value: &str) -> Result<Vec<u8>, ValueError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|_| ValueError::InvalidHex(value.to_string()))
}

// =============================================================================
// BYTES
// =============================================================================

/// Bytes wrapper with hex serialization
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn new() -> Self {
        Bytes(Vec::new())
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        Bytes(slice.to_vec())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(v: &[u8]) -> Self {
        Bytes(v.to_vec())
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl Serialize for Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s)
            .map(Bytes)
            .map_err(|_| de::Error::custom("invalid hex bytes"))
    }
}

// =============================================================================
// HEX QUANTITIES
// =============================================================================

/// Serde adapter for JSON-RPC quantities (`"0x1a"`) stored as `u64`.
pub mod hex_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{value:x}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(de::Error::custom)
    }

    /// Parse a hex quantity, with or without the `0x` prefix.
    pub fn parse(value: &str) -> Result<u64, String> {
        let digits = value.trim_start_matches("0x");
        if digits.is_empty() {
            return Ok(0);
        }
        u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex quantity {value}: {e}"))
    }

    /// Same adapter for `Option<u64>` fields; `null` and missing map to `None`.
    pub mod option {
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(v) => serializer.serialize_str(&format!("0x{v:x}")),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| super::parse(&s).map_err(de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            hash_hex(&keccak256(&[])),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_parse_address_accepts_mixed_case() {
        let lower = parse_address("0x00000000000000000000000000000000000abcde").unwrap();
        let upper = parse_address("0x00000000000000000000000000000000000ABCDE").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(address_hex(&lower), "0x00000000000000000000000000000000000abcde");
    }

    #[test]
    fn test_checksum_address_vectors() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0x52908400098527886E0F7030069857D2E4169EE7",
            "0xde709f2102306220921060314715629080e2fb77",
        ] {
            let address = parse_address(expected).unwrap();
            assert_eq!(checksum_address(&address), expected);
        }
    }

    #[test]
    fn test_parse_address_rejects_wrong_length() {
        assert!(matches!(
            parse_address("0xabc"),
            Err(ValueError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_address("0xabcd"),
            Err(ValueError::InvalidLength { expected: 20, actual: 2 })
        ));
    }

    #[test]
    fn test_bytes_serde() {
        let bytes = Bytes::from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&bytes).unwrap();
        assert_eq!(json, "\"0xdeadbeef\"");
        let back: Bytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_hex_u64_parse() {
        assert_eq!(hex_u64::parse("0x0").unwrap(), 0);
        assert_eq!(hex_u64::parse("0x12d687").unwrap(), 1_234_567);
        assert!(hex_u64::parse("0xzz").is_err());
    }
}
