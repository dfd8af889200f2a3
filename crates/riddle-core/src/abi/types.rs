//! ABI types and values supported by the client.
//!
//! Only the shapes the riddle contract uses are modelled; anything else is
//! rejected as `AbiError::UnsupportedType`.

use crate::domain::value_objects::{address_hex, hash_hex, Address, Hash, U256};
use crate::errors::AbiError;
use std::fmt;
use std::str::FromStr;

/// A Solidity ABI type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiType {
    Address,
    Bool,
    String,
    Bytes,
    FixedBytes32,
    Uint256,
}

impl AbiType {
    /// Canonical name used in signatures.
    pub fn as_str(&self) -> &'static str {
        match self {
            AbiType::Address => "address",
            AbiType::Bool => "bool",
            AbiType::String => "string",
            AbiType::Bytes => "bytes",
            AbiType::FixedBytes32 => "bytes32",
            AbiType::Uint256 => "uint256",
        }
    }

    /// Dynamic types are encoded out of line (offset + length + data).
    pub fn is_dynamic(&self) -> bool {
        matches!(self, AbiType::String | AbiType::Bytes)
    }
}

impl FromStr for AbiType {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "address" => Ok(AbiType::Address),
            "bool" => Ok(AbiType::Bool),
            "string" => Ok(AbiType::String),
            "bytes" => Ok(AbiType::Bytes),
            "bytes32" => Ok(AbiType::FixedBytes32),
            "uint256" | "uint" => Ok(AbiType::Uint256),
            other => Err(AbiError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded (or to-be-encoded) ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    FixedBytes(Hash),
    Uint(U256),
}

impl AbiValue {
    /// The ABI type of this value.
    pub fn kind(&self) -> AbiType {
        match self {
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Bool(_) => AbiType::Bool,
            AbiValue::String(_) => AbiType::String,
            AbiValue::Bytes(_) => AbiType::Bytes,
            AbiValue::FixedBytes(_) => AbiType::FixedBytes32,
            AbiValue::Uint(_) => AbiType::Uint256,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbiValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            AbiValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AbiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiValue::Address(a) => f.write_str(&address_hex(a)),
            AbiValue::Bool(b) => write!(f, "{b}"),
            AbiValue::String(s) => write!(f, "{s:?}"),
            AbiValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            AbiValue::FixedBytes(h) => f.write_str(&hash_hex(h)),
            AbiValue::Uint(u) => write!(f, "{u}"),
        }
    }
}
