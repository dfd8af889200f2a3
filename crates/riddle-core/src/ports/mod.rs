//! # Ports Layer (Middle Hexagon)
//!
//! - **Driving Ports (Inbound)**: `RiddleApi`
//! - **Driven Ports (Outbound)**: `LedgerReader`, `LedgerWriter`,
//!   `FinalizationSource`, `NotificationSource`
//! - No concrete implementations in this module

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
