//! # Decoded Events and the Event Feed
//!
//! Typed lifecycle events and the append-only feed they are mirrored into.

use super::entities::Identity;
use super::value_objects::{checksum_address, Address};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Event names as they appear in the contract descriptor.
pub mod names {
    pub const ANSWER_ATTEMPT: &str = "AnswerAttempt";
    pub const RIDDLE_SET: &str = "RiddleSet";
    pub const WINNER: &str = "Winner";
}

/// A log entry decoded against a known schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// `AnswerAttempt(address indexed user, bool correct)`
    AnswerAttempt { user: Address, correct: bool },
    /// `RiddleSet(string riddle)`
    RiddleSet { riddle: String },
    /// A well-formed log of an event this client has no typed view of.
    Unrecognized { name: Option<String> },
}

impl DecodedEvent {
    /// Event name, if known.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::AnswerAttempt { .. } => Some(names::ANSWER_ATTEMPT),
            Self::RiddleSet { .. } => Some(names::RIDDLE_SET),
            Self::Unrecognized { name } => name.as_deref(),
        }
    }

    /// One-line summary in the `Name: {args}` form shown in the feed.
    ///
    /// Attempts by `viewer` are marked with `(you)`.
    #[must_use]
    pub fn summary(&self, viewer: Option<&Identity>) -> String {
        match self {
            Self::AnswerAttempt { user, correct } => {
                // field order follows the event signature
                let mine = if viewer == Some(user) { " (you)" } else { "" };
                format!(
                    "{}: {{\"user\":\"{}\",\"correct\":{correct}}}{mine}",
                    names::ANSWER_ATTEMPT,
                    checksum_address(user)
                )
            }
            Self::RiddleSet { riddle } => {
                let args = serde_json::json!({ "riddle": riddle });
                format!("{}: {args}", names::RIDDLE_SET)
            }
            Self::Unrecognized { name } => {
                format!("{}: {{}}", name.as_deref().unwrap_or("Unknown"))
            }
        }
    }
}

// =============================================================================
// FEED
// =============================================================================

/// Which subscription (or diagnostic path) produced a feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    RiddleSet,
    AnswerAttempt,
    Diagnostic,
}

/// One human-readable line in the event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub source: FeedSource,
    pub text: String,
}

impl FeedEntry {
    pub fn new(source: FeedSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

impl fmt::Display for FeedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Ordered, append-only event feed shared by both subscriptions.
///
/// Entries are never reordered, deduplicated or evicted. Clones share the
/// same underlying sequence.
#[derive(Debug, Clone, Default)]
pub struct EventFeed {
    entries: Arc<Mutex<Vec<FeedEntry>>>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its position.
    pub fn push(&self, entry: FeedEntry) -> usize {
        let mut entries = self.entries.lock();
        entries.push(entry);
        entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<FeedEntry> {
        self.entries.lock().clone()
    }

    /// Copy of the entries at positions `from..`.
    pub fn since(&self, from: usize) -> Vec<FeedEntry> {
        let entries = self.entries.lock();
        entries.get(from..).map(<[FeedEntry]>::to_vec).unwrap_or_default()
    }
}
