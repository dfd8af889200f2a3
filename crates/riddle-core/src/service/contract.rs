//! Handle on the deployed riddle contract.

use crate::abi::{ContractDescriptor, FunctionSchema, LogSchema};
use crate::domain::events::names;
use crate::domain::value_objects::Address;
use crate::errors::AbiError;
use std::sync::Arc;

/// Address plus the schemas the client needs, resolved once.
///
/// Cheap to clone; immutable for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    inner: Arc<Resolved>,
}

#[derive(Debug)]
struct Resolved {
    address: Address,
    descriptor: ContractDescriptor,
    riddle: FunctionSchema,
    is_active: FunctionSchema,
    winner: Option<FunctionSchema>,
    submit_answer: FunctionSchema,
    set_riddle: Option<FunctionSchema>,
    riddle_set: LogSchema,
    answer_attempt: LogSchema,
}

impl ContractHandle {
    /// Resolves the required entries of `descriptor`.
    ///
    /// Fails if any of `riddle`, `isActive`, `submitAnswer`, `RiddleSet` or
    /// `AnswerAttempt` is missing. `winner` and `setRiddle` are optional.
    pub fn new(address: Address, descriptor: ContractDescriptor) -> Result<Self, AbiError> {
        let resolved = Resolved {
            address,
            riddle: descriptor.function("riddle")?.clone(),
            is_active: descriptor.function("isActive")?.clone(),
            winner: descriptor.function("winner").ok().cloned(),
            submit_answer: descriptor.function("submitAnswer")?.clone(),
            set_riddle: descriptor.function("setRiddle").ok().cloned(),
            riddle_set: descriptor.event(names::RIDDLE_SET)?.clone(),
            answer_attempt: descriptor.event(names::ANSWER_ATTEMPT)?.clone(),
            descriptor,
        };
        Ok(Self {
            inner: Arc::new(resolved),
        })
    }

    /// Handle using the embedded OnchainRiddle ABI.
    pub fn onchain_riddle(address: Address) -> Result<Self, AbiError> {
        Self::new(address, ContractDescriptor::onchain_riddle()?)
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.inner.descriptor
    }

    pub fn riddle(&self) -> &FunctionSchema {
        &self.inner.riddle
    }

    pub fn is_active(&self) -> &FunctionSchema {
        &self.inner.is_active
    }

    pub fn winner(&self) -> Option<&FunctionSchema> {
        self.inner.winner.as_ref()
    }

    pub fn submit_answer(&self) -> &FunctionSchema {
        &self.inner.submit_answer
    }

    /// `setRiddle(string,bytes32)`, when the ABI declares it.
    pub fn set_riddle(&self) -> Option<&FunctionSchema> {
        self.inner.set_riddle.as_ref()
    }

    pub fn riddle_set(&self) -> &LogSchema {
        &self.inner.riddle_set
    }

    pub fn answer_attempt(&self) -> &LogSchema {
        &self.inner.answer_attempt
    }
}
