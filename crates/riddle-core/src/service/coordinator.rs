//! # Submission Coordinator
//!
//! Send → await finalization → decode → verdict.
//!
//! Publishing a riddle follows the same send and finalize path without a
//! verdict.
//!
//! Failures while sending or waiting are returned as [`SubmissionError`];
//! nothing about the receipt's logs is ever an error. A receipt without a
//! matching `AnswerAttempt` is simply a `false` verdict.

use super::contract::ContractHandle;
use crate::abi::{answer_hash, AbiValue, LogDecoder, LogSchema};
use crate::domain::entities::{
    FinalizedRecord, Identity, PublishRequest, RawLog, SubmissionRequest,
};
use crate::domain::events::DecodedEvent;
use crate::domain::value_objects::{address_hex, hash_hex, TxHash};
use crate::errors::{AbiError, SubmissionError};
use crate::ports::outbound::{FinalizationSource, LedgerWriter};
use riddle_telemetry::{time_histogram, FINALIZATION_DURATION, PUBLICATIONS, SUBMISSIONS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Message shown for an accepted answer.
pub const CORRECT_MESSAGE: &str = "Oh, you got it right!";
/// Message shown for a rejected answer.
pub const INCORRECT_MESSAGE: &str = "Sorry, that's not the right answer.";
/// Message shown when the submission itself failed.
pub const FAILURE_MESSAGE: &str = "Something went wrong... Check the logs for more details.";

/// User-facing text for a verdict.
#[must_use]
pub fn verdict_message(correct: bool) -> &'static str {
    if correct {
        CORRECT_MESSAGE
    } else {
        INCORRECT_MESSAGE
    }
}

/// Submits answers and reconciles their receipts into a verdict.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    writer: Arc<dyn LedgerWriter>,
    finality: Arc<dyn FinalizationSource>,
    contract: ContractHandle,
    decoder: LogDecoder,
    finalization_timeout: Option<Duration>,
}

impl SubmissionCoordinator {
    pub fn new(
        writer: Arc<dyn LedgerWriter>,
        finality: Arc<dyn FinalizationSource>,
        contract: ContractHandle,
    ) -> Self {
        Self {
            writer,
            finality,
            decoder: LogDecoder::for_contract(contract.address()),
            contract,
            finalization_timeout: None,
        }
    }

    /// Bounds the finalization wait. `None` waits indefinitely.
    #[must_use]
    pub fn with_finalization_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.finalization_timeout = timeout;
        self
    }

    /// Submits `request.answer` from `request.identity`.
    ///
    /// Resolves to `true` only if the finalized receipt carries an
    /// `AnswerAttempt` for this identity with `correct == true`.
    #[instrument(skip(self, request), fields(identity = %address_hex(&request.identity)))]
    pub async fn submit_answer(&self, request: &SubmissionRequest) -> Result<bool, SubmissionError> {
        let result = self.submit(request).await;
        let outcome = match &result {
            Ok(true) => "correct",
            Ok(false) => "incorrect",
            Err(SubmissionError::InvalidRequest(_)) => "invalid",
            Err(_) => "failed",
        };
        SUBMISSIONS.with_label_values(&[outcome]).inc();
        if let Err(e) = &result {
            warn!(error = %e, "Submission failed");
        }
        result
    }

    async fn submit(&self, request: &SubmissionRequest) -> Result<bool, SubmissionError> {
        request.validate()?;

        let calldata = self
            .contract
            .submit_answer()
            .encode_call(&[AbiValue::String(request.answer.clone())])?;
        let tx_hash = self
            .writer
            .send_transaction(request.identity, self.contract.address(), calldata)
            .await
            .map_err(SubmissionError::Rejected)?;
        info!(tx_hash = %hash_hex(&tx_hash), "Answer submitted");

        let record = self.finalize(tx_hash).await?;
        if !record.succeeded {
            return Err(SubmissionError::Reverted {
                tx_hash: hash_hex(&tx_hash),
            });
        }

        let correct = verdict_for(
            &self.decoder,
            self.contract.answer_attempt(),
            &request.identity,
            &record.logs,
        );
        info!(
            tx_hash = %hash_hex(&tx_hash),
            block = record.block_number,
            correct,
            "Answer finalized"
        );
        Ok(correct)
    }

    /// Publishes `request.riddle` with the hash of `request.answer`.
    ///
    /// The contract accepts it only from its bot account and only while no
    /// riddle is open; a refusal surfaces as `Rejected` or `Reverted`.
    #[instrument(skip(self, request), fields(publisher = %address_hex(&request.publisher)))]
    pub async fn publish_riddle(&self, request: &PublishRequest) -> Result<TxHash, SubmissionError> {
        let result = self.publish(request).await;
        let outcome = match &result {
            Ok(_) => "published",
            Err(SubmissionError::InvalidRequest(_)) => "invalid",
            Err(_) => "failed",
        };
        PUBLICATIONS.with_label_values(&[outcome]).inc();
        if let Err(e) = &result {
            warn!(error = %e, "Publication failed");
        }
        result
    }

    async fn publish(&self, request: &PublishRequest) -> Result<TxHash, SubmissionError> {
        request.validate()?;

        let set_riddle = self
            .contract
            .set_riddle()
            .ok_or_else(|| AbiError::UnknownFunction("setRiddle".into()))?;
        let calldata = set_riddle.encode_call(&[
            AbiValue::String(request.riddle.clone()),
            AbiValue::FixedBytes(answer_hash(&request.answer)),
        ])?;
        let tx_hash = self
            .writer
            .send_transaction(request.publisher, self.contract.address(), calldata)
            .await
            .map_err(SubmissionError::Rejected)?;
        debug!(tx_hash = %hash_hex(&tx_hash), "Riddle sent");

        let record = self.finalize(tx_hash).await?;
        if !record.succeeded {
            return Err(SubmissionError::Reverted {
                tx_hash: hash_hex(&tx_hash),
            });
        }
        info!(tx_hash = %hash_hex(&tx_hash), block = record.block_number, "Riddle published");
        Ok(tx_hash)
    }

    async fn finalize(&self, tx_hash: TxHash) -> Result<FinalizedRecord, SubmissionError> {
        let _timer = time_histogram!(FINALIZATION_DURATION);
        let wait = self.finality.await_finalization(tx_hash);

        let result = match self.finalization_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                SubmissionError::FinalizationTimeout {
                    tx_hash: hash_hex(&tx_hash),
                    waited: limit,
                }
            })?,
            None => wait.await,
        };
        result.map_err(|source| SubmissionError::Finalization {
            tx_hash: hash_hex(&tx_hash),
            source,
        })
    }
}

/// Whether any log decodes to an `AnswerAttempt` by `identity` marked
/// correct.
///
/// Logs that do not decode against `schema` are skipped. More than one
/// attempt in a receipt is tolerated: a single match suffices.
#[must_use]
pub fn verdict_for(
    decoder: &LogDecoder,
    schema: &LogSchema,
    identity: &Identity,
    logs: &[RawLog],
) -> bool {
    logs.iter()
        .filter_map(|log| match decoder.decode(schema, log) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "Skipping receipt log");
                None
            }
        })
        .any(|event| {
            matches!(event, DecodedEvent::AnswerAttempt { user, correct: true } if user == *identity)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ContractDescriptor;
    use crate::domain::events::names;
    use crate::domain::value_objects::{Address, Bytes, Hash};

    fn contract() -> Address {
        Address::from_low_u64_be(0xC0DE)
    }

    fn attempt(user: Address, correct: bool) -> RawLog {
        ContractDescriptor::onchain_riddle()
            .unwrap()
            .event(names::ANSWER_ATTEMPT)
            .unwrap()
            .encode_log(contract(), &[AbiValue::Address(user), AbiValue::Bool(correct)])
            .unwrap()
    }

    fn verdict(identity: Address, logs: &[RawLog]) -> bool {
        let handle = ContractHandle::onchain_riddle(contract()).unwrap();
        verdict_for(
            &LogDecoder::for_contract(contract()),
            handle.answer_attempt(),
            &identity,
            logs,
        )
    }

    #[test]
    fn test_verdict_requires_identity_and_correct() {
        let me = Address::from_low_u64_be(0xABC);
        let other = Address::from_low_u64_be(0xDEF);

        assert!(verdict(me, &[attempt(me, true)]));
        assert!(!verdict(me, &[attempt(other, true)]));
        assert!(!verdict(me, &[attempt(me, false)]));
        assert!(!verdict(me, &[]));
    }

    #[test]
    fn test_verdict_is_existential() {
        let me = Address::from_low_u64_be(0xABC);
        let other = Address::from_low_u64_be(0xDEF);
        let logs = [attempt(other, true), attempt(me, false), attempt(me, true)];
        assert!(verdict(me, &logs));
    }

    #[test]
    fn test_verdict_skips_undecodable_logs() {
        let me = Address::from_low_u64_be(0xABC);
        let garbage = RawLog::new(contract(), vec![Hash::repeat_byte(1)], Bytes(vec![1, 2, 3]));
        let mut corrupt = attempt(me, true);
        corrupt.data = Bytes(vec![0xff; 32]);
        let mut foreign = attempt(me, true);
        foreign.address = Address::from_low_u64_be(0xBAD);

        assert!(!verdict(me, &[garbage.clone(), corrupt, foreign]));
        assert!(verdict(me, &[garbage, attempt(me, true)]));
    }

    #[test]
    fn test_verdict_messages() {
        assert_eq!(verdict_message(true), "Oh, you got it right!");
        assert_eq!(verdict_message(false), "Sorry, that's not the right answer.");
    }
}
