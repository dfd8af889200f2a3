//! # Riddle Core - OnchainRiddle Client Logic
//!
//! Reads the published riddle, submits answers, reconciles finalized
//! receipts into verdicts and mirrors the contract's lifecycle events into
//! an append-only feed.
//!
//! ## Components
//!
//! | Component | Location | Purpose |
//! |-----------|----------|---------|
//! | Remote State Reader | `service/reader.rs` | `riddle()`, `isActive()`, `winner()` |
//! | Log Decoder | `abi/decoder.rs` | Raw log + schema → typed event |
//! | Submission Coordinator | `service/coordinator.rs` | Send → finalize → verdict |
//! | Lifecycle Subscriptions | `service/subscriptions.rs` | Feed and state refresh |
//! | Contract ABI | `abi/` | Descriptor, head/tail codec |
//!
//! ## Guarantees
//!
//! | Guarantee | Enforcement |
//! |-----------|-------------|
//! | Verdict is `true` only for a matching correct `AnswerAttempt` | `coordinator.rs` - `verdict_for()` |
//! | Undecodable logs never fail a submission | `coordinator.rs` - `verdict_for()` |
//! | No feed mutation after unsubscribe returns | `subscriptions.rs` - `Gate::close_with()` |
//! | Feed entries are append-only and ordered | `domain/events.rs` - `EventFeed` |
//! | Transport errors never end a subscription | `subscriptions.rs` - `Dispatcher::on_transport_error()` |
//!
//! ## Outbound Ports
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | `LedgerReader` | Read-only contract calls |
//! | `LedgerWriter` | Transaction submission |
//! | `FinalizationSource` | Receipt of a sent transaction |
//! | `NotificationSource` | Push log subscriptions |
//!
//! ## Usage Example
//!
//! ```ignore
//! use riddle_core::prelude::*;
//!
//! let client = RiddleClient::from_config(&config, LedgerPorts::from_ledger(ledger))?;
//! let state = client.puzzle_state().await?;
//!
//! let request = SubmissionRequest::checked("paris", Some(me))?;
//! println!("{}", verdict_message(client.submit_answer(&request).await?));
//! ```

// Crate-level lints
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

// =============================================================================
// MODULES
// =============================================================================

pub mod abi;
pub mod adapters;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod service;

// =============================================================================
// PRELUDE
// =============================================================================

/// Convenient re-exports for common usage.
pub mod prelude {
    // Domain
    pub use crate::domain::entities::{
        FinalizedRecord, Identity, LogFilter, PublishRequest, PuzzleState, RawLog,
        SubmissionRequest,
    };
    pub use crate::domain::events::{names, DecodedEvent, EventFeed, FeedEntry, FeedSource};
    pub use crate::domain::value_objects::{
        address_hex, checksum_address, hash_hex, keccak256, parse_address, parse_hash, Address,
        Bytes, Hash, TxHash, U256,
    };

    // ABI
    pub use crate::abi::{
        answer_hash, AbiType, AbiValue, ContractDescriptor, DecodedFields, FunctionSchema,
        LogDecoder, LogSchema,
    };

    // Ports
    pub use crate::ports::inbound::RiddleApi;
    pub use crate::ports::outbound::{
        CancelToken, FinalizationSource, LedgerReader, LedgerWriter, NotificationSource,
        TransportEvent, TransportSubscription,
    };

    // Errors
    pub use crate::errors::{
        AbiError, ConfigError, DecodeError, LedgerError, RemoteReadError, SubmissionError,
        SubscriptionTransportError,
    };

    // Adapters
    pub use crate::adapters::InMemoryLedger;

    // Service
    pub use crate::config::ClientConfig;
    pub use crate::service::{
        verdict_message, ContractHandle, LedgerPorts, LifecycleStream,
        LifecycleSubscriptionManager, PuzzleReader, RiddleClient, SubmissionCoordinator,
        SubscriptionState,
    };
}

// =============================================================================
// CRATE INFO
// =============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
