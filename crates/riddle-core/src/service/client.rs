//! Client facade wiring the reader, coordinator and subscription manager
//! to one set of ledger ports.

use super::contract::ContractHandle;
use super::coordinator::SubmissionCoordinator;
use super::reader::PuzzleReader;
use super::subscriptions::LifecycleSubscriptionManager;
use crate::config::ClientConfig;
use crate::domain::entities::{PublishRequest, PuzzleState, SubmissionRequest};
use crate::domain::events::EventFeed;
use crate::domain::value_objects::{Address, TxHash};
use crate::errors::{ConfigError, RemoteReadError, SubmissionError};
use crate::ports::inbound::RiddleApi;
use crate::ports::outbound::{FinalizationSource, LedgerReader, LedgerWriter, NotificationSource};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The four outbound ports, usually backed by the same ledger.
#[derive(Clone)]
pub struct LedgerPorts {
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
    pub finality: Arc<dyn FinalizationSource>,
    pub notifications: Arc<dyn NotificationSource>,
}

impl LedgerPorts {
    /// All four ports served by one adapter.
    pub fn from_ledger<L>(ledger: Arc<L>) -> Self
    where
        L: LedgerReader + LedgerWriter + FinalizationSource + NotificationSource + 'static,
    {
        Self {
            reader: ledger.clone(),
            writer: ledger.clone(),
            finality: ledger.clone(),
            notifications: ledger,
        }
    }
}

/// Explicitly constructed client for one contract deployment.
#[derive(Clone)]
pub struct RiddleClient {
    contract: ContractHandle,
    reader: Arc<PuzzleReader>,
    coordinator: SubmissionCoordinator,
    notifications: Arc<dyn NotificationSource>,
}

impl RiddleClient {
    pub fn new(contract: ContractHandle, ports: LedgerPorts) -> Self {
        let reader = Arc::new(PuzzleReader::new(ports.reader, contract.clone()));
        let coordinator = SubmissionCoordinator::new(ports.writer, ports.finality, contract.clone());
        Self {
            contract,
            reader,
            coordinator,
            notifications: ports.notifications,
        }
    }

    /// Validates `config`, loads the contract descriptor and wires `ports`.
    pub fn from_config(config: &ClientConfig, ports: LedgerPorts) -> Result<Self, ConfigError> {
        config.validate()?;
        let contract = config.contract_handle()?;
        Ok(Self::new(contract, ports).with_finalization_timeout(config.finalization_timeout))
    }

    #[must_use]
    pub fn with_finalization_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.coordinator = self.coordinator.with_finalization_timeout(timeout);
        self
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    pub fn reader(&self) -> &PuzzleReader {
        &self.reader
    }

    pub fn coordinator(&self) -> &SubmissionCoordinator {
        &self.coordinator
    }

    /// A subscription manager for a new session, appending to `feed`.
    pub fn subscription_manager(&self, feed: EventFeed) -> LifecycleSubscriptionManager {
        LifecycleSubscriptionManager::new(self.notifications.clone(), self.reader.clone(), feed)
    }
}

#[async_trait]
impl RiddleApi for RiddleClient {
    async fn puzzle_state(&self) -> Result<PuzzleState, RemoteReadError> {
        self.reader.read_state().await
    }

    async fn winner(&self) -> Result<Option<Address>, RemoteReadError> {
        self.reader.read_winner().await
    }

    async fn submit_answer(&self, request: &SubmissionRequest) -> Result<bool, SubmissionError> {
        self.coordinator.submit_answer(request).await
    }

    async fn publish_riddle(&self, request: &PublishRequest) -> Result<TxHash, SubmissionError> {
        self.coordinator.publish_riddle(request).await
    }
}
