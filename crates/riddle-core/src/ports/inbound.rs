//! # Driving Ports (API - Inbound)
//!
//! What a presentation binding calls. [`RiddleClient`](crate::service::RiddleClient)
//! is the implementation.

use crate::domain::entities::{PublishRequest, PuzzleState, SubmissionRequest};
use crate::domain::value_objects::{Address, TxHash};
use crate::errors::{RemoteReadError, SubmissionError};
use async_trait::async_trait;

/// Request/response surface of the riddle client.
#[async_trait]
pub trait RiddleApi: Send + Sync {
    /// Reads the riddle text and open flag.
    async fn puzzle_state(&self) -> Result<PuzzleState, RemoteReadError>;

    /// Reads the recorded winner, if the riddle has been solved.
    async fn winner(&self) -> Result<Option<Address>, RemoteReadError>;

    /// Submits an answer and resolves to whether it was accepted as correct.
    async fn submit_answer(&self, request: &SubmissionRequest) -> Result<bool, SubmissionError>;

    /// Publishes a new riddle from the bot account and waits for it to
    /// finalize.
    async fn publish_riddle(&self, request: &PublishRequest) -> Result<TxHash, SubmissionError>;
}
