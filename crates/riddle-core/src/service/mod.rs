//! # Service Layer
//!
//! The reader, the submission coordinator and the lifecycle subscription
//! manager, plus the client facade that wires them to ledger ports.

pub mod client;
pub mod contract;
pub mod coordinator;
pub mod reader;
pub mod subscriptions;

pub use client::{LedgerPorts, RiddleClient};
pub use contract::ContractHandle;
pub use coordinator::{verdict_for, verdict_message, SubmissionCoordinator};
pub use reader::PuzzleReader;
pub use subscriptions::{
    LifecycleStream, LifecycleSubscriptionManager, SubscriptionHandle, SubscriptionState,
};
