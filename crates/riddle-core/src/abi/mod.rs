//! # Contract ABI
//!
//! Descriptor loading, head/tail codec and log decoding for the riddle
//! contract.

pub mod codec;
pub mod decoder;
pub mod descriptor;
pub mod types;

pub use decoder::{DecodedFields, LogDecoder};
pub use descriptor::{ContractDescriptor, FunctionSchema, LogSchema, Param, ONCHAIN_RIDDLE_ABI};
pub use types::{AbiType, AbiValue};

use crate::domain::value_objects::{keccak256, Hash};

/// Commitment stored by `setRiddle`: keccak256 of the answer's UTF-8 bytes.
#[must_use]
pub fn answer_hash(answer: &str) -> Hash {
    keccak256(answer.as_bytes())
}
