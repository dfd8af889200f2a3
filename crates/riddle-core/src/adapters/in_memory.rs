//! # In-Memory Ledger
//!
//! An in-process `OnchainRiddle` contract implementing every outbound port.
//! Used by tests and by the console binding's `--demo` mode.
//!
//! Behaviour follows the deployed contract:
//! - `submitAnswer` reverts with `Riddle not active` once solved; otherwise
//!   emits `AnswerAttempt(user, correct)` and, when correct, `Winner(user)`
//!   and closes the riddle
//! - `setRiddle` is restricted to the bot and emits `RiddleSet(riddle)`
//!
//! Transactions are mined immediately; subscribers receive the logs before
//! `send_transaction` returns. Hooks allow scripting failures, receipts and
//! transport errors.

use crate::abi::{answer_hash, codec, AbiValue, ContractDescriptor};
use crate::domain::entities::{FinalizedRecord, LogFilter, PuzzleState, RawLog};
use crate::domain::events::names;
use crate::domain::value_objects::{hash_hex, keccak256, Address, Bytes, Hash, TxHash};
use crate::errors::{AbiError, LedgerError, SubscriptionTransportError};
use crate::ports::outbound::{
    FinalizationSource, LedgerReader, LedgerWriter, NotificationSource, TransportEvent,
    TransportSubscription,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

/// Buffered notifications per subscriber.
const SUBSCRIPTION_BUFFER: usize = 256;

/// JSON-RPC error code nodes use for reverted execution.
const REVERT_CODE: i64 = 3;

/// In-memory `OnchainRiddle` deployment.
#[derive(Debug)]
pub struct InMemoryLedger {
    contract: Address,
    descriptor: ContractDescriptor,
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    riddle: String,
    answer_hash: Hash,
    is_active: bool,
    winner: Address,
    bot: Address,

    block_number: u64,
    nonce: u64,
    receipts: HashMap<TxHash, FinalizedRecord>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,

    calls: HashMap<String, usize>,
    sent: usize,
    call_latency: Option<Duration>,
    hold_finalization: bool,
    deliver_after_cancel: bool,
    scripted_receipt: Option<(Vec<RawLog>, bool)>,
    fail_call: Option<LedgerError>,
    fail_send: Option<LedgerError>,
    fail_finalization: Option<LedgerError>,
    fail_subscribe: Option<LedgerError>,
}

#[derive(Debug)]
struct Subscriber {
    filter: LogFilter,
    tx: mpsc::Sender<TransportEvent>,
    cancelled: oneshot::Receiver<()>,
}

impl Subscriber {
    fn is_cancelled(&mut self) -> bool {
        self.tx.is_closed() || !matches!(self.cancelled.try_recv(), Err(TryRecvError::Empty))
    }
}

impl InMemoryLedger {
    /// Deploys an empty, inactive riddle at `contract` controlled by `bot`.
    pub fn new(contract: Address, bot: Address) -> Result<Self, AbiError> {
        Ok(Self {
            contract,
            descriptor: ContractDescriptor::onchain_riddle()?,
            state: Mutex::new(LedgerState {
                bot,
                ..LedgerState::default()
            }),
        })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn bot(&self) -> Address {
        self.state.lock().bot
    }

    /// Current contract storage, read without going through the ports.
    pub fn puzzle_state(&self) -> PuzzleState {
        let state = self.state.lock();
        PuzzleState {
            text: state.riddle.clone(),
            is_open: state.is_active,
        }
    }

    /// Recorded winner, zero while unsolved.
    pub fn winner(&self) -> Address {
        self.state.lock().winner
    }

    /// Publishes a riddle as the bot, as the riddle robot does.
    pub fn publish_riddle(&self, riddle: &str, answer: &str) -> Result<TxHash, LedgerError> {
        let calldata = self
            .descriptor
            .function("setRiddle")
            .and_then(|f| {
                f.encode_call(&[
                    AbiValue::String(riddle.to_string()),
                    AbiValue::FixedBytes(answer_hash(answer)),
                ])
            })
            .map_err(malformed)?;
        let bot = self.bot();
        self.execute(bot, self.contract, calldata.as_slice())
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Number of `eth_call`s made for `function`.
    pub fn call_count(&self, function: &str) -> usize {
        self.state.lock().calls.get(function).copied().unwrap_or(0)
    }

    /// Number of transactions accepted by `send_transaction`.
    pub fn sent_transactions(&self) -> usize {
        self.state.lock().sent
    }

    /// Subscriptions that have not been cancelled or dropped.
    pub fn active_subscriptions(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain_mut(|sub| !sub.is_cancelled());
        state.subscribers.len()
    }

    // -------------------------------------------------------------------------
    // Scripting hooks
    // -------------------------------------------------------------------------

    /// Delays every `eth_call` response.
    pub fn set_call_latency(&self, latency: Duration) {
        self.state.lock().call_latency = Some(latency);
    }

    /// When set, `await_finalization` never resolves.
    pub fn hold_finalization(&self, hold: bool) {
        self.state.lock().hold_finalization = hold;
    }

    /// Keeps delivering to subscribers after they cancel, like a transport
    /// that has not yet processed the unsubscribe.
    pub fn deliver_after_cancel(&self, deliver: bool) {
        self.state.lock().deliver_after_cancel = deliver;
    }

    /// The next transaction mines with exactly these logs and status and
    /// does not touch contract storage.
    pub fn script_next_receipt(&self, logs: Vec<RawLog>, succeeded: bool) {
        self.state.lock().scripted_receipt = Some((logs, succeeded));
    }

    pub fn fail_next_call(&self, error: LedgerError) {
        self.state.lock().fail_call = Some(error);
    }

    pub fn fail_next_send(&self, error: LedgerError) {
        self.state.lock().fail_send = Some(error);
    }

    pub fn fail_next_finalization(&self, error: LedgerError) {
        self.state.lock().fail_finalization = Some(error);
    }

    pub fn fail_next_subscribe(&self, error: LedgerError) {
        self.state.lock().fail_subscribe = Some(error);
    }

    /// Builds a log of `event` emitted by this contract.
    pub fn event_log(&self, event: &str, values: &[AbiValue]) -> Result<RawLog, AbiError> {
        self.descriptor.event(event)?.encode_log(self.contract, values)
    }

    /// Delivers `log` to every matching subscriber, as a mined block would.
    pub fn emit(&self, mut log: RawLog) {
        let mut state = self.state.lock();
        state.block_number += 1;
        log.block_number = Some(state.block_number);
        deliver(&mut state, &log);
    }

    /// Delivers a transport error to every live subscriber.
    pub fn inject_transport_error(&self, error: SubscriptionTransportError) {
        let mut state = self.state.lock();
        prune(&mut state);
        for sub in &state.subscribers {
            let _ = sub.tx.try_send(Err(error.clone()));
        }
    }

    /// Ends every open notification stream, as a transport that gave up.
    pub fn end_streams(&self) {
        self.state.lock().subscribers.clear();
    }

    // -------------------------------------------------------------------------
    // Contract execution
    // -------------------------------------------------------------------------

    fn execute(&self, from: Address, to: Address, calldata: &[u8]) -> Result<TxHash, LedgerError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_send.take() {
            return Err(error);
        }

        let (mut logs, succeeded, broadcast) = match state.scripted_receipt.take() {
            Some((logs, succeeded)) => (logs, succeeded, false),
            None if to == self.contract => (self.apply(&mut state, from, calldata)?, true, true),
            None => (Vec::new(), true, false),
        };

        state.nonce += 1;
        state.block_number += 1;
        state.sent += 1;
        let mut preimage = from.as_bytes().to_vec();
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        preimage.extend_from_slice(calldata);
        let tx_hash = keccak256(&preimage);

        for (index, log) in logs.iter_mut().enumerate() {
            log.block_number = Some(state.block_number);
            log.transaction_hash = Some(tx_hash);
            log.log_index = Some(index as u64);
        }
        if broadcast {
            for log in &logs {
                deliver(&mut state, log);
            }
        }

        let record = FinalizedRecord {
            tx_hash,
            block_number: state.block_number,
            succeeded,
            logs,
        };
        state.receipts.insert(tx_hash, record);
        Ok(tx_hash)
    }

    fn apply(
        &self,
        state: &mut LedgerState,
        from: Address,
        calldata: &[u8],
    ) -> Result<Vec<RawLog>, LedgerError> {
        let function = self
            .descriptor
            .function_by_selector(calldata)
            .ok_or_else(|| revert("unknown function selector"))?;
        let args = function.decode_input(calldata).map_err(malformed)?;

        match (function.name.as_str(), args.as_slice()) {
            ("submitAnswer", [AbiValue::String(answer)]) => {
                if !state.is_active {
                    return Err(revert("Riddle not active"));
                }
                let correct = answer_hash(answer) == state.answer_hash;
                let mut logs = vec![self
                    .event_log(
                        names::ANSWER_ATTEMPT,
                        &[AbiValue::Address(from), AbiValue::Bool(correct)],
                    )
                    .map_err(malformed)?];
                if correct {
                    state.is_active = false;
                    state.winner = from;
                    logs.push(
                        self.event_log(names::WINNER, &[AbiValue::Address(from)])
                            .map_err(malformed)?,
                    );
                }
                Ok(logs)
            }
            ("setRiddle", [AbiValue::String(riddle), AbiValue::FixedBytes(hash)]) => {
                if from != state.bot {
                    return Err(revert("Only bot can call this function"));
                }
                if state.is_active {
                    return Err(revert("Riddle already active"));
                }
                state.riddle.clone_from(riddle);
                state.answer_hash = *hash;
                state.is_active = true;
                state.winner = Address::zero();
                Ok(vec![self
                    .event_log(names::RIDDLE_SET, &[AbiValue::String(riddle.clone())])
                    .map_err(malformed)?])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn view(&self, state: &LedgerState, function: &str) -> Result<Bytes, LedgerError> {
        let value = match function {
            "riddle" => AbiValue::String(state.riddle.clone()),
            "isActive" => AbiValue::Bool(state.is_active),
            "winner" => AbiValue::Address(state.winner),
            "bot" => AbiValue::Address(state.bot),
            other => return Err(revert(&format!("{other} is not a view function"))),
        };
        Ok(Bytes(codec::encode(&[value])))
    }
}

fn prune(state: &mut LedgerState) {
    if !state.deliver_after_cancel {
        state.subscribers.retain_mut(|sub| !sub.is_cancelled());
    }
}

fn deliver(state: &mut LedgerState, log: &RawLog) {
    prune(state);
    for sub in &state.subscribers {
        if sub.filter.matches(log) {
            let _ = sub.tx.try_send(Ok(log.clone()));
        }
    }
}

fn revert(reason: &str) -> LedgerError {
    LedgerError::Rpc {
        code: REVERT_CODE,
        message: format!("execution reverted: {reason}"),
    }
}

fn malformed(error: AbiError) -> LedgerError {
    LedgerError::Malformed(error.to_string())
}

// =============================================================================
// PORTS
// =============================================================================

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, LedgerError> {
        let (result, latency) = {
            let mut state = self.state.lock();
            let function = self
                .descriptor
                .function_by_selector(calldata.as_slice())
                .map(|f| f.name.clone());
            if let Some(name) = &function {
                *state.calls.entry(name.clone()).or_default() += 1;
            }

            let result = match (state.fail_call.take(), function) {
                (Some(error), _) => Err(error),
                // calling an address without code returns empty data
                _ if contract != self.contract => Ok(Bytes::new()),
                (None, Some(name)) => self.view(&state, &name),
                (None, None) => Err(revert("unknown function selector")),
            };
            (result, state.call_latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        result
    }
}

#[async_trait]
impl LedgerWriter for InMemoryLedger {
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        calldata: Bytes,
    ) -> Result<TxHash, LedgerError> {
        self.execute(from, to, calldata.as_slice())
    }
}

#[async_trait]
impl FinalizationSource for InMemoryLedger {
    async fn await_finalization(&self, tx_hash: TxHash) -> Result<FinalizedRecord, LedgerError> {
        let lookup = {
            let mut state = self.state.lock();
            if let Some(error) = state.fail_finalization.take() {
                return Err(error);
            }
            if state.hold_finalization {
                None
            } else {
                Some(state.receipts.get(&tx_hash).cloned())
            }
        };

        match lookup {
            None => std::future::pending().await,
            Some(Some(record)) => Ok(record),
            Some(None) => Err(LedgerError::Malformed(format!(
                "unknown transaction {}",
                hash_hex(&tx_hash)
            ))),
        }
    }
}

#[async_trait]
impl NotificationSource for InMemoryLedger {
    async fn subscribe(&self, filter: LogFilter) -> Result<TransportSubscription, LedgerError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_subscribe.take() {
            return Err(error);
        }

        state.next_subscription += 1;
        let id = format!("0x{:x}", state.next_subscription);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.subscribers.push(Subscriber {
            filter,
            tx,
            cancelled: cancel_rx,
        });
        Ok(TransportSubscription::new(id, rx, cancel_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::LogDecoder;
    use crate::domain::events::DecodedEvent;

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::new(
            Address::from_low_u64_be(0xC0DE),
            Address::from_low_u64_be(0xB07),
        )
        .unwrap()
    }

    fn submit_calldata(ledger: &InMemoryLedger, answer: &str) -> Bytes {
        ledger
            .descriptor
            .function("submitAnswer")
            .unwrap()
            .encode_call(&[AbiValue::String(answer.into())])
            .unwrap()
    }

    #[tokio::test]
    async fn test_views_reflect_published_riddle() {
        let ledger = ledger();
        ledger.publish_riddle("What has keys?", "piano").unwrap();

        let riddle = ledger.descriptor.function("riddle").unwrap();
        let out = ledger
            .call(ledger.contract(), riddle.encode_call(&[]).unwrap())
            .await
            .unwrap();
        assert_eq!(
            riddle.decode_output(out.as_slice()).unwrap(),
            vec![AbiValue::String("What has keys?".into())]
        );
        assert_eq!(ledger.call_count("riddle"), 1);
        assert!(ledger.puzzle_state().is_open);
    }

    #[tokio::test]
    async fn test_correct_answer_closes_riddle() {
        let ledger = ledger();
        ledger.publish_riddle("Capital of France?", "paris").unwrap();
        let player = Address::from_low_u64_be(0xABC);

        let tx = ledger
            .send_transaction(player, ledger.contract(), submit_calldata(&ledger, "paris"))
            .await
            .unwrap();
        let record = ledger.await_finalization(tx).await.unwrap();

        assert!(record.succeeded);
        assert_eq!(record.logs.len(), 2);
        let schema = ledger.descriptor.event(names::ANSWER_ATTEMPT).unwrap();
        assert_eq!(
            LogDecoder::new().decode(schema, &record.logs[0]).unwrap(),
            DecodedEvent::AnswerAttempt { user: player, correct: true }
        );
        assert!(!ledger.puzzle_state().is_open);
        assert_eq!(ledger.winner(), player);

        let again = ledger
            .send_transaction(player, ledger.contract(), submit_calldata(&ledger, "paris"))
            .await;
        assert!(matches!(again, Err(LedgerError::Rpc { code: REVERT_CODE, .. })));
    }

    #[tokio::test]
    async fn test_only_bot_sets_riddle() {
        let ledger = ledger();
        let calldata = ledger
            .descriptor
            .function("setRiddle")
            .unwrap()
            .encode_call(&[
                AbiValue::String("x".into()),
                AbiValue::FixedBytes(answer_hash("y")),
            ])
            .unwrap();
        let err = ledger
            .send_transaction(Address::from_low_u64_be(1), ledger.contract(), calldata)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Rpc {
                code: REVERT_CODE,
                message: "execution reverted: Only bot can call this function".into()
            }
        );
    }

    #[tokio::test]
    async fn test_subscribers_receive_matching_logs() {
        let ledger = ledger();
        let topic = ledger.descriptor.event(names::RIDDLE_SET).unwrap().topic0();
        let mut sub = ledger
            .subscribe(LogFilter::event(ledger.contract(), topic))
            .await
            .unwrap();

        ledger.publish_riddle("first", "a").unwrap();
        let log = sub.events.recv().await.unwrap().unwrap();
        assert_eq!(log.topics[0], topic);
        assert!(log.block_number.is_some());

        sub.cancel.cancel();
        assert_eq!(ledger.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_scripted_receipt_and_failures() {
        let ledger = ledger();
        ledger.script_next_receipt(Vec::new(), false);
        let tx = ledger
            .send_transaction(Address::from_low_u64_be(1), ledger.contract(), Bytes::new())
            .await
            .unwrap();
        assert!(!ledger.await_finalization(tx).await.unwrap().succeeded);

        ledger.fail_next_send(LedgerError::Transport("down".into()));
        assert!(ledger
            .send_transaction(Address::from_low_u64_be(1), ledger.contract(), Bytes::new())
            .await
            .is_err());
        assert_eq!(ledger.sent_transactions(), 1);
    }
}
