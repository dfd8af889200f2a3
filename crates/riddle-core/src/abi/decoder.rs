//! # Log Decoder
//!
//! Decodes raw logs into [`DecodedEvent`]s. Indexed parameters are read
//! from the topics, the rest from the data payload. Decoding is pure and
//! deterministic; a failure is reported per log and never aborts the
//! caller's stream.

use super::codec;
use super::descriptor::{ContractDescriptor, LogSchema};
use super::types::{AbiType, AbiValue};
use crate::domain::entities::RawLog;
use crate::domain::events::{names, DecodedEvent};
use crate::domain::value_objects::{address_hex, Address};
use crate::errors::DecodeError;

/// Named field values of a decoded log, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFields(Vec<(String, AbiValue)>);

impl DecodedFields {
    /// The field called `name`, if it exists and has type `kind`.
    pub fn get(&self, name: &str, kind: AbiType) -> Option<&AbiValue> {
        self.0
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
            .filter(|value| value.kind() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AbiValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Stateless log decoder, optionally pinned to one emitting contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDecoder {
    emitter: Option<Address>,
}

impl LogDecoder {
    /// Decoder that accepts logs from any emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that rejects logs not emitted by `address`.
    #[must_use]
    pub fn for_contract(address: Address) -> Self {
        Self {
            emitter: Some(address),
        }
    }

    /// Decodes `log` against `schema`.
    pub fn decode(&self, schema: &LogSchema, log: &RawLog) -> Result<DecodedEvent, DecodeError> {
        let fields = self.decode_fields(schema, log)?;
        typed_event(schema, &fields)
    }

    /// Decodes `log` against `schema` into untyped field values.
    pub fn decode_fields(
        &self,
        schema: &LogSchema,
        log: &RawLog,
    ) -> Result<DecodedFields, DecodeError> {
        if let Some(expected) = self.emitter {
            if log.address != expected {
                return Err(DecodeError::ForeignEmitter {
                    expected: address_hex(&expected),
                    found: address_hex(&log.address),
                });
            }
        }
        if log.removed {
            return Err(DecodeError::Removed);
        }

        let topics = if schema.anonymous {
            &log.topics[..]
        } else {
            let topic0 = log.topic0().ok_or(DecodeError::MissingSignature)?;
            if *topic0 != schema.topic0() {
                return Err(DecodeError::SignatureMismatch {
                    event: schema.name.clone(),
                });
            }
            &log.topics[1..]
        };
        if log.topics.len() != schema.expected_topics() {
            return Err(DecodeError::TopicCount {
                event: schema.name.clone(),
                expected: schema.expected_topics(),
                found: log.topics.len(),
            });
        }

        let data_types: Vec<AbiType> = schema
            .params
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.kind)
            .collect();
        let mut data_values = codec::decode(&data_types, log.data.as_slice())?.into_iter();
        let mut topic_values = topics.iter();

        let mut fields = Vec::with_capacity(schema.params.len());
        for param in &schema.params {
            let missing = || DecodeError::Field {
                event: schema.name.clone(),
                field: param.name.clone(),
            };
            let value = if param.indexed {
                let topic = topic_values.next().ok_or_else(missing)?;
                if param.kind.is_dynamic() {
                    // only the hash of an indexed dynamic value is on chain
                    AbiValue::FixedBytes(*topic)
                } else {
                    codec::decode_word(param.kind, topic.as_fixed_bytes())?
                }
            } else {
                data_values.next().ok_or_else(missing)?
            };
            fields.push((param.name.clone(), value));
        }
        Ok(DecodedFields(fields))
    }

    /// Matches `log` against every event in `descriptor` by signature topic.
    ///
    /// Anything that does not decode yields [`DecodedEvent::Unrecognized`].
    #[must_use]
    pub fn decode_any(&self, descriptor: &ContractDescriptor, log: &RawLog) -> DecodedEvent {
        let Some(schema) = log.topic0().and_then(|t| descriptor.event_by_topic(t)) else {
            return DecodedEvent::Unrecognized { name: None };
        };
        self.decode(schema, log)
            .unwrap_or_else(|_| DecodedEvent::Unrecognized {
                name: Some(schema.name.clone()),
            })
    }
}

fn typed_event(schema: &LogSchema, fields: &DecodedFields) -> Result<DecodedEvent, DecodeError> {
    let field = |name: &str| DecodeError::Field {
        event: schema.name.clone(),
        field: name.to_string(),
    };

    match schema.name.as_str() {
        names::ANSWER_ATTEMPT => Ok(DecodedEvent::AnswerAttempt {
            user: fields
                .get("user", AbiType::Address)
                .and_then(AbiValue::as_address)
                .ok_or_else(|| field("user"))?,
            correct: fields
                .get("correct", AbiType::Bool)
                .and_then(AbiValue::as_bool)
                .ok_or_else(|| field("correct"))?,
        }),
        names::RIDDLE_SET => Ok(DecodedEvent::RiddleSet {
            riddle: fields
                .get("riddle", AbiType::String)
                .and_then(AbiValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| field("riddle"))?,
        }),
        other => Ok(DecodedEvent::Unrecognized {
            name: Some(other.to_string()),
        }),
    }
}
