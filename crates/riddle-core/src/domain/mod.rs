//! # Domain Layer
//!
//! Pure types with no I/O: value objects, ledger entities, decoded events
//! and the event feed.

pub mod entities;
pub mod events;
pub mod value_objects;
