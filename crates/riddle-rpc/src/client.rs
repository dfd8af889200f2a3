//! JSON-RPC client over HTTP implementing the read, write and finalization
//! ports.

use crate::error::{JsonRpcError, RpcError};
use async_trait::async_trait;
use riddle_core::config::ClientConfig;
use riddle_core::domain::entities::{FinalizedRecord, RawLog};
use riddle_core::domain::value_objects::{hash_hex, hex_u64, Address, Bytes, TxHash};
use riddle_core::errors::LedgerError;
use riddle_core::ports::outbound::{FinalizationSource, LedgerReader, LedgerWriter};
use riddle_telemetry::RPC_REQUESTS;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive transient failures tolerated while polling for a receipt.
const MAX_POLL_FAILURES: u32 = 5;

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a, T: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: T,
    pub id: u64,
}

impl<'a, T: Serialize> JsonRpcRequest<'a, T> {
    pub(crate) fn new(id: u64, method: &'a str, params: T) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id,
        }
    }
}

/// JSON-RPC response structure.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// Call object for `eth_call` and `eth_sendTransaction`.
#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<Address>,
    to: Address,
    data: &'a Bytes,
}

/// Receipt from `eth_getTransactionReceipt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(with = "hex_u64")]
    pub block_number: u64,
    /// `0x1` success, `0x0` reverted; absent before Byzantium.
    #[serde(default, with = "hex_u64::option")]
    pub status: Option<u64>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status != Some(0)
    }

    pub fn into_record(self) -> FinalizedRecord {
        FinalizedRecord {
            tx_hash: self.transaction_hash,
            block_number: self.block_number,
            succeeded: self.succeeded(),
            logs: self.logs,
        }
    }
}

/// RPC client for an Ethereum-compatible node.
pub struct RpcClient {
    http_client: reqwest::Client,
    rpc_url: String,
    request_id: AtomicU64,
    timeout: Duration,
    poll_interval: Duration,
}

impl RpcClient {
    /// Create a new RPC client.
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self::with_timeout(rpc_url, DEFAULT_TIMEOUT)
    }

    /// Create a new RPC client with custom timeout.
    pub fn with_timeout(rpc_url: impl Into<String>, timeout: Duration) -> Self {
        // reqwest::Client::new() is infallible
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            rpc_url: rpc_url.into(),
            request_id: AtomicU64::new(1),
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Client for the configured HTTP endpoint.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_timeout(config.rpc_endpoint_url.clone(), config.request_timeout)
            .with_poll_interval(config.receipt_poll_interval)
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Make a JSON-RPC call.
    async fn call<P: Serialize + Send, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let result = self.send(JsonRpcRequest::new(id, method, params)).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        RPC_REQUESTS.with_label_values(&[method, outcome]).inc();
        result
    }

    async fn send<P: Serialize + Send, R: DeserializeOwned>(
        &self,
        request: JsonRpcRequest<'_, P>,
    ) -> Result<R, RpcError> {
        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        let body: JsonRpcResponse<R> = response.json().await.map_err(|e| self.http_error(e))?;
        parse_response(body)
    }

    fn http_error(&self, error: reqwest::Error) -> RpcError {
        if error.is_timeout() {
            RpcError::Timeout(self.timeout)
        } else if error.is_decode() {
            RpcError::Decode(error.to_string())
        } else {
            RpcError::Http(error)
        }
    }

    /// eth_chainId - Get chain ID.
    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result: String = self.call("eth_chainId", Vec::<()>::new()).await?;
        hex_u64::parse(&result).map_err(RpcError::Decode)
    }

    /// eth_accounts - Accounts the node can sign for.
    pub async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.call("eth_accounts", Vec::<()>::new()).await
    }

    /// eth_call - Execute a read-only call against `latest`.
    pub async fn eth_call(&self, to: Address, data: &Bytes) -> Result<Bytes, RpcError> {
        let call = CallRequest {
            from: None,
            to,
            data,
        };
        self.call("eth_call", (call, "latest")).await
    }

    /// eth_sendTransaction - Submit a transaction signed by the node.
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: &Bytes,
    ) -> Result<TxHash, RpcError> {
        let tx = CallRequest {
            from: Some(from),
            to,
            data,
        };
        self.call("eth_sendTransaction", [tx]).await
    }

    /// eth_getTransactionReceipt - `None` while the transaction is pending.
    pub async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let value: serde_json::Value = self
            .call("eth_getTransactionReceipt", [tx_hash])
            .await
            .or_else(|e| match e {
                // nodes answer `null` for unknown transactions
                RpcError::MissingResult => Ok(serde_json::Value::Null),
                other => Err(other),
            })?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some).map_err(RpcError::from)
    }

    /// Polls for the receipt until it exists.
    async fn poll_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, RpcError> {
        let mut failures = 0u32;
        loop {
            match self.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {
                    failures = 0;
                    debug!(tx_hash = %hash_hex(&tx_hash), "Receipt pending");
                }
                Err(e @ (RpcError::Http(_) | RpcError::Timeout(_))) => {
                    failures += 1;
                    if failures >= MAX_POLL_FAILURES {
                        return Err(e);
                    }
                    warn!(tx_hash = %hash_hex(&tx_hash), error = %e, failures, "Receipt poll failed");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn parse_response<R>(response: JsonRpcResponse<R>) -> Result<R, RpcError> {
    if let Some(error) = response.error {
        return Err(error.into());
    }
    response.result.ok_or(RpcError::MissingResult)
}

// =============================================================================
// PORTS
// =============================================================================

#[async_trait]
impl LedgerReader for RpcClient {
    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, LedgerError> {
        Ok(self.eth_call(contract, &calldata).await?)
    }
}

#[async_trait]
impl LedgerWriter for RpcClient {
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        calldata: Bytes,
    ) -> Result<TxHash, LedgerError> {
        Ok(RpcClient::send_transaction(self, from, to, &calldata).await?)
    }
}

#[async_trait]
impl FinalizationSource for RpcClient {
    async fn await_finalization(&self, tx_hash: TxHash) -> Result<FinalizedRecord, LedgerError> {
        let receipt = self.poll_receipt(tx_hash).await?;
        Ok(receipt.into_record())
    }
}
