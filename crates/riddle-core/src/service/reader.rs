//! # Remote State Reader
//!
//! Read-only queries of the published puzzle. No caching and no retries:
//! every call goes to the ledger and is safe to repeat.

use super::contract::ContractHandle;
use crate::abi::{AbiValue, FunctionSchema};
use crate::domain::entities::PuzzleState;
use crate::domain::value_objects::Address;
use crate::errors::RemoteReadError;
use crate::ports::outbound::LedgerReader;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Reads `riddle()`, `isActive()` and `winner()` from the contract.
#[derive(Clone)]
pub struct PuzzleReader {
    ledger: Arc<dyn LedgerReader>,
    contract: ContractHandle,
}

impl PuzzleReader {
    pub fn new(ledger: Arc<dyn LedgerReader>, contract: ContractHandle) -> Self {
        Self { ledger, contract }
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    /// Current riddle text.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_puzzle_text(&self) -> Result<String, RemoteReadError> {
        let function = self.contract.riddle();
        self.call_view(function)
            .await?
            .into_string()
            .ok_or_else(|| unexpected(function))
    }

    /// Whether the riddle still accepts answers.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_is_open(&self) -> Result<bool, RemoteReadError> {
        let function = self.contract.is_active();
        self.call_view(function)
            .await?
            .as_bool()
            .ok_or_else(|| unexpected(function))
    }

    /// Both fields, queried concurrently.
    pub async fn read_state(&self) -> Result<PuzzleState, RemoteReadError> {
        let (text, is_open) = tokio::try_join!(self.read_puzzle_text(), self.read_is_open())?;
        Ok(PuzzleState { text, is_open })
    }

    /// The solver of the current riddle; `None` while unsolved.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_winner(&self) -> Result<Option<Address>, RemoteReadError> {
        let function = self
            .contract
            .winner()
            .ok_or_else(|| RemoteReadError::UnexpectedOutput {
                function: "winner".into(),
            })?;
        let winner = self
            .call_view(function)
            .await?
            .as_address()
            .ok_or_else(|| unexpected(function))?;
        Ok((!winner.is_zero()).then_some(winner))
    }

    async fn call_view(&self, function: &FunctionSchema) -> Result<AbiValue, RemoteReadError> {
        let calldata = function
            .encode_call(&[])
            .map_err(|source| RemoteReadError::Output {
                function: function.name.clone(),
                source,
            })?;
        let output = self
            .ledger
            .call(self.contract.address(), calldata)
            .await
            .map_err(|source| RemoteReadError::Ledger {
                function: function.name.clone(),
                source,
            })?;
        debug!(function = %function.name, bytes = output.len(), "View call returned");

        function
            .decode_output(output.as_slice())
            .map_err(|source| RemoteReadError::Output {
                function: function.name.clone(),
                source,
            })?
            .into_iter()
            .next()
            .ok_or_else(|| unexpected(function))
    }
}

fn unexpected(function: &FunctionSchema) -> RemoteReadError {
    RemoteReadError::UnexpectedOutput {
        function: function.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::errors::{AbiError, LedgerError};

    fn setup() -> (Arc<InMemoryLedger>, PuzzleReader) {
        let ledger = Arc::new(
            InMemoryLedger::new(Address::from_low_u64_be(0xC0DE), Address::from_low_u64_be(0xB07))
                .unwrap(),
        );
        let contract = ContractHandle::onchain_riddle(ledger.contract()).unwrap();
        let reader = PuzzleReader::new(ledger.clone(), contract);
        (ledger, reader)
    }

    #[tokio::test]
    async fn test_read_state_queries_both_fields_once() {
        let (ledger, reader) = setup();
        ledger.publish_riddle("What has keys?", "piano").unwrap();

        let state = reader.read_state().await.unwrap();
        assert_eq!(
            state,
            PuzzleState {
                text: "What has keys?".into(),
                is_open: true
            }
        );
        assert_eq!(ledger.call_count("riddle"), 1);
        assert_eq!(ledger.call_count("isActive"), 1);
    }

    #[tokio::test]
    async fn test_read_winner_maps_zero_to_none() {
        let (ledger, reader) = setup();
        ledger.publish_riddle("q", "a").unwrap();
        assert_eq!(reader.read_winner().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ledger_failure_names_function() {
        let (ledger, reader) = setup();
        ledger.fail_next_call(LedgerError::Transport("connection refused".into()));
        let err = reader.read_is_open().await.unwrap_err();
        assert_eq!(
            err,
            RemoteReadError::Ledger {
                function: "isActive".into(),
                source: LedgerError::Transport("connection refused".into()),
            }
        );
        // reads are independent; the next one succeeds
        tokio_test::assert_ok!(reader.read_is_open().await);
    }

    #[tokio::test]
    async fn test_empty_return_data_is_an_output_error() {
        let (_ledger, reader) = setup();
        let wrong = PuzzleReader::new(
            Arc::new(
                InMemoryLedger::new(Address::from_low_u64_be(0xDEAD), Address::zero()).unwrap(),
            ),
            reader.contract().clone(),
        );
        assert!(matches!(
            wrong.read_puzzle_text().await,
            Err(RemoteReadError::Output {
                source: AbiError::DataTooShort { .. },
                ..
            })
        ));
    }
}
