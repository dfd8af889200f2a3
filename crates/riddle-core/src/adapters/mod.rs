//! # Adapters Layer (Outer Hexagon)
//!
//! Network adapters live in `riddle-rpc`; this crate only ships the
//! in-memory ledger.

pub mod in_memory;

pub use in_memory::InMemoryLedger;
