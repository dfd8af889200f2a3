//! # Contract Descriptor
//!
//! Function and event schemas loaded from a JSON ABI document, either a
//! bare entry array or a build artifact with an `abi` field.

use super::codec;
use super::types::{AbiType, AbiValue};
use crate::domain::entities::RawLog;
use crate::domain::value_objects::{keccak256, Address, Bytes, Hash};
use crate::errors::AbiError;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// ABI of the deployed OnchainRiddle contract.
pub const ONCHAIN_RIDDLE_ABI: &str = include_str!("../../abi/OnchainRiddle.json");

// =============================================================================
// SCHEMAS
// =============================================================================

/// A named, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: AbiType,
    /// Only meaningful for event parameters.
    pub indexed: bool,
}

/// Callable function entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSchema {
    pub name: String,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
    /// `view` or `pure`.
    pub read_only: bool,
}

impl FunctionSchema {
    /// Canonical signature, e.g. `submitAnswer(string)`.
    #[must_use]
    pub fn signature(&self) -> String {
        canonical_signature(&self.name, &self.inputs)
    }

    /// First four bytes of the signature hash.
    #[must_use]
    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.signature().as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash.as_bytes()[..4]);
        selector
    }

    /// Builds calldata: selector followed by the encoded arguments.
    pub fn encode_call(&self, args: &[AbiValue]) -> Result<Bytes, AbiError> {
        if args.len() != self.inputs.len() {
            return Err(AbiError::ArgumentCount {
                expected: self.inputs.len(),
                actual: args.len(),
            });
        }
        for (index, (arg, param)) in args.iter().zip(&self.inputs).enumerate() {
            if arg.kind() != param.kind {
                return Err(AbiError::ArgumentType {
                    index,
                    expected: param.kind.to_string(),
                });
            }
        }

        let mut calldata = self.selector().to_vec();
        calldata.extend(codec::encode(args));
        Ok(Bytes(calldata))
    }

    /// Decodes calldata produced by [`encode_call`](Self::encode_call).
    pub fn decode_input(&self, calldata: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
        let args = calldata.get(4..).ok_or(AbiError::DataTooShort {
            needed: 4,
            available: calldata.len(),
        })?;
        let types: Vec<AbiType> = self.inputs.iter().map(|p| p.kind).collect();
        codec::decode(&types, args)
    }

    /// Decodes the return data of an `eth_call`.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
        let types: Vec<AbiType> = self.outputs.iter().map(|p| p.kind).collect();
        codec::decode(&types, data)
    }
}

/// Event entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSchema {
    pub name: String,
    pub params: Vec<Param>,
    pub anonymous: bool,
    topic0: Hash,
}

impl LogSchema {
    pub fn new(name: impl Into<String>, params: Vec<Param>, anonymous: bool) -> Self {
        let name = name.into();
        let topic0 = keccak256(canonical_signature(&name, &params).as_bytes());
        Self {
            name,
            params,
            anonymous,
            topic0,
        }
    }

    /// Canonical signature, e.g. `AnswerAttempt(address,bool)`.
    #[must_use]
    pub fn signature(&self) -> String {
        canonical_signature(&self.name, &self.params)
    }

    /// Hash of the signature, carried as the first log topic.
    #[must_use]
    pub fn topic0(&self) -> Hash {
        self.topic0
    }

    /// Number of indexed parameters.
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        self.params.iter().filter(|p| p.indexed).count()
    }

    /// Number of topics a conforming log carries.
    #[must_use]
    pub fn expected_topics(&self) -> usize {
        self.indexed_count() + usize::from(!self.anonymous)
    }

    /// Builds the log `emitter` would produce for this event.
    pub fn encode_log(&self, emitter: Address, values: &[AbiValue]) -> Result<RawLog, AbiError> {
        if values.len() != self.params.len() {
            return Err(AbiError::ArgumentCount {
                expected: self.params.len(),
                actual: values.len(),
            });
        }

        let mut topics = Vec::with_capacity(self.expected_topics());
        if !self.anonymous {
            topics.push(self.topic0);
        }
        let mut data = Vec::new();
        for (index, (param, value)) in self.params.iter().zip(values).enumerate() {
            if value.kind() != param.kind {
                return Err(AbiError::ArgumentType {
                    index,
                    expected: param.kind.to_string(),
                });
            }
            if param.indexed {
                topics.push(codec::encode_topic(value));
            } else {
                data.push(value.clone());
            }
        }
        Ok(RawLog::new(emitter, topics, Bytes(codec::encode(&data))))
    }
}

fn canonical_signature(name: &str, params: &[Param]) -> String {
    let types: Vec<&str> = params.iter().map(|p| p.kind.as_str()).collect();
    format!("{name}({})", types.join(","))
}

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// The subset of a contract ABI this client understands.
#[derive(Debug, Clone, Default)]
pub struct ContractDescriptor {
    functions: HashMap<String, FunctionSchema>,
    events: HashMap<String, LogSchema>,
}

impl ContractDescriptor {
    /// Descriptor of the OnchainRiddle contract.
    pub fn onchain_riddle() -> Result<Self, AbiError> {
        Self::from_json(ONCHAIN_RIDDLE_ABI)
    }

    /// Parses a JSON ABI document.
    ///
    /// Entries using types outside the supported set are skipped.
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let document: AbiDocument =
            serde_json::from_str(json).map_err(|e| AbiError::Descriptor(e.to_string()))?;
        let entries = match document {
            AbiDocument::Bare(entries) => entries,
            AbiDocument::Artifact { abi } => abi,
        };

        let mut descriptor = Self::default();
        for entry in entries {
            match entry {
                AbiEntry::Function(raw) => match raw.into_schema() {
                    Ok(schema) => {
                        descriptor.functions.insert(schema.name.clone(), schema);
                    }
                    Err(e) => debug!("Skipping ABI function: {e}"),
                },
                AbiEntry::Event(raw) => match raw.into_schema() {
                    Ok(schema) => {
                        descriptor.events.insert(schema.name.clone(), schema);
                    }
                    Err(e) => debug!("Skipping ABI event: {e}"),
                },
                AbiEntry::Other => {}
            }
        }
        Ok(descriptor)
    }

    pub fn function(&self, name: &str) -> Result<&FunctionSchema, AbiError> {
        self.functions
            .get(name)
            .ok_or_else(|| AbiError::UnknownFunction(name.to_string()))
    }

    pub fn event(&self, name: &str) -> Result<&LogSchema, AbiError> {
        self.events
            .get(name)
            .ok_or_else(|| AbiError::UnknownEvent(name.to_string()))
    }

    /// Looks up a non-anonymous event by its signature topic.
    pub fn event_by_topic(&self, topic0: &Hash) -> Option<&LogSchema> {
        self.events
            .values()
            .find(|schema| !schema.anonymous && &schema.topic0 == topic0)
    }

    /// Looks up a function by the first four bytes of calldata.
    pub fn function_by_selector(&self, calldata: &[u8]) -> Option<&FunctionSchema> {
        let selector = calldata.get(..4)?;
        self.functions
            .values()
            .find(|schema| schema.selector() == selector)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionSchema> {
        self.functions.values()
    }

    pub fn events(&self) -> impl Iterator<Item = &LogSchema> {
        self.events.values()
    }
}

// =============================================================================
// JSON SHAPES
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum AbiDocument {
    Bare(Vec<AbiEntry>),
    Artifact { abi: Vec<AbiEntry> },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AbiEntry {
    Function(RawFunction),
    Event(RawEvent),
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFunction {
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    outputs: Vec<RawParam>,
    #[serde(default)]
    state_mutability: Option<String>,
    #[serde(default)]
    constant: bool,
}

impl RawFunction {
    fn into_schema(self) -> Result<FunctionSchema, AbiError> {
        let read_only = self.constant
            || matches!(self.state_mutability.as_deref(), Some("view" | "pure"));
        Ok(FunctionSchema {
            inputs: convert_params(self.inputs)?,
            outputs: convert_params(self.outputs)?,
            name: self.name,
            read_only,
        })
    }
}

#[derive(Deserialize)]
struct RawEvent {
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    anonymous: bool,
}

impl RawEvent {
    fn into_schema(self) -> Result<LogSchema, AbiError> {
        Ok(LogSchema::new(
            self.name,
            convert_params(self.inputs)?,
            self.anonymous,
        ))
    }
}

#[derive(Deserialize)]
struct RawParam {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    indexed: bool,
}

fn convert_params(raw: Vec<RawParam>) -> Result<Vec<Param>, AbiError> {
    raw.into_iter()
        .map(|p| {
            Ok(Param {
                kind: p.kind.parse()?,
                name: p.name,
                indexed: p.indexed,
            })
        })
        .collect()
}
