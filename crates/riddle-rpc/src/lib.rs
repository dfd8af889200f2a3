//! # Riddle RPC - Ledger Adapters
//!
//! Implements the `riddle-core` outbound ports against an Ethereum node.
//!
//! | Port | Adapter | Transport |
//! |------|---------|-----------|
//! | `LedgerReader` | `RpcClient` | `eth_call` over HTTP |
//! | `LedgerWriter` | `RpcClient` | `eth_sendTransaction` over HTTP |
//! | `FinalizationSource` | `RpcClient` | `eth_getTransactionReceipt` polling |
//! | `NotificationSource` | `WsNotificationSource` | `eth_subscribe("logs")` over WebSocket |
//!
//! Transactions are signed by the node (`eth_sendTransaction`); no keys are
//! handled here.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod ws;

pub use client::{RpcClient, TransactionReceipt};
pub use error::{JsonRpcError, RpcError};
pub use ws::{ReconnectPolicy, WsNotificationSource};

use riddle_core::config::ClientConfig;
use riddle_core::service::LedgerPorts;
use std::sync::Arc;

/// All four ports for the configured endpoints.
pub fn ledger_ports(config: &ClientConfig) -> LedgerPorts {
    let rpc = Arc::new(RpcClient::from_config(config));
    LedgerPorts {
        reader: rpc.clone(),
        writer: rpc.clone(),
        finality: rpc,
        notifications: Arc::new(WsNotificationSource::from_config(config)),
    }
}
