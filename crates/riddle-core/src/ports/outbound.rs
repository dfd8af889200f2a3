//! # Driven Ports (SPI - Outbound)
//!
//! The ledger capabilities the client depends on. Adapters implement these
//! traits: `riddle-rpc` over JSON-RPC and WebSocket, and
//! [`InMemoryLedger`](crate::adapters::InMemoryLedger) for tests.
//!
//! - Dependencies point INWARD (adapters implement these traits)
//! - Adapters map their own failures into [`LedgerError`] or
//!   [`SubscriptionTransportError`] at this boundary

use crate::domain::entities::{FinalizedRecord, LogFilter, RawLog};
use crate::domain::value_objects::{Address, Bytes, TxHash};
use crate::errors::{LedgerError, SubscriptionTransportError};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// READ / WRITE
// =============================================================================

/// Read-only contract calls (`eth_call` against `latest`).
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Executes `calldata` against `contract` without creating a transaction.
    ///
    /// Returns the raw ABI-encoded return data.
    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, LedgerError>;
}

/// State-changing transactions (`eth_sendTransaction`).
///
/// Signing happens outside the client: the node or an external signer owns
/// the key for `from`.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Sends a transaction and returns its hash once the node accepted it.
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        calldata: Bytes,
    ) -> Result<TxHash, LedgerError>;
}

/// Waits for a transaction to be included in the canonical chain.
#[async_trait]
pub trait FinalizationSource: Send + Sync {
    /// Resolves once a receipt for `tx_hash` exists.
    ///
    /// Implementations do not impose a deadline; callers that want one wrap
    /// this future in a timeout.
    async fn await_finalization(&self, tx_hash: TxHash) -> Result<FinalizedRecord, LedgerError>;
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// One item of a notification stream.
pub type TransportEvent = Result<RawLog, SubscriptionTransportError>;

/// Live log subscriptions (`eth_subscribe("logs", filter)`).
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Opens a subscription for logs matching `filter`.
    ///
    /// Logs arrive in emission order. Transport errors are delivered in-band
    /// and do not end the stream; the stream ends when the transport gives
    /// up or the subscription is cancelled.
    async fn subscribe(&self, filter: LogFilter) -> Result<TransportSubscription, LedgerError>;
}

/// An open notification stream handed out by a [`NotificationSource`].
#[derive(Debug)]
pub struct TransportSubscription {
    /// Transport-assigned subscription id.
    pub id: String,
    /// Incoming logs and in-band transport errors.
    pub events: mpsc::Receiver<TransportEvent>,
    /// Tells the transport to stop delivering and release the stream.
    pub cancel: CancelToken,
}

impl TransportSubscription {
    /// Creates a subscription. The adapter keeps the receiving half of the
    /// cancel channel and stops when it resolves.
    pub fn new(
        id: impl Into<String>,
        events: mpsc::Receiver<TransportEvent>,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id: id.into(),
            events,
            cancel: CancelToken(Some(cancel)),
        }
    }
}

/// Fires at most once, on [`cancel`](CancelToken::cancel) or on drop.
#[derive(Debug)]
pub struct CancelToken(Option<oneshot::Sender<()>>);

impl CancelToken {
    /// Signals cancellation. Later calls do nothing.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_none()
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.cancel();
    }
}
