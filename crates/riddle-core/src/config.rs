//! Client configuration with validation.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RIDDLE_CONTRACT_ADDRESS` / `CONTRACT_ADDRESS` | (required) | Deployed contract |
//! | `RIDDLE_RPC_URL` / `RPC_URL` | `http://localhost:8545` | JSON-RPC endpoint |
//! | `RIDDLE_WS_URL` | derived from the RPC URL | Subscription endpoint |
//! | `RIDDLE_ABI_PATH` | embedded ABI | Contract ABI JSON override |
//! | `RIDDLE_POLL_MS` | `1000` | Receipt polling interval |
//! | `RIDDLE_FINALIZATION_TIMEOUT_SECS` | none | Bound on waiting for a receipt |
//! | `CHAIN_ID` | `8453` | Expected chain |

use crate::abi::ContractDescriptor;
use crate::domain::value_objects::{parse_address, Address};
use crate::errors::ConfigError;
use crate::service::ContractHandle;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default JSON-RPC endpoint (a local node).
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// Base mainnet.
pub const DEFAULT_CHAIN_ID: u64 = 8453;

/// Connection settings for one contract deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the deployed riddle contract
    pub contract_address: Option<Address>,
    /// HTTP(S) JSON-RPC endpoint
    pub rpc_endpoint_url: String,
    /// WS(S) endpoint for `eth_subscribe`
    pub ws_endpoint_url: Option<String>,
    /// ABI JSON to use instead of the embedded one
    pub abi_path: Option<PathBuf>,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Delay between `eth_getTransactionReceipt` polls
    #[serde(with = "humantime_serde")]
    pub receipt_poll_interval: Duration,
    /// Optional bound on waiting for finalization
    #[serde(with = "humantime_serde")]
    pub finalization_timeout: Option<Duration>,
    /// Chain the contract lives on
    pub chain_id: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            contract_address: None,
            rpc_endpoint_url: DEFAULT_RPC_URL.to_string(),
            ws_endpoint_url: None,
            abi_path: None,
            request_timeout: Duration::from_secs(10),
            receipt_poll_interval: Duration::from_secs(1),
            finalization_timeout: None,
            chain_id: DEFAULT_CHAIN_ID,
        }
    }
}

impl ClientConfig {
    /// Config for `contract_address` with default endpoints.
    #[must_use]
    pub fn new(contract_address: Address) -> Self {
        Self {
            contract_address: Some(contract_address),
            ..Self::default()
        }
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(value) = get(&["RIDDLE_CONTRACT_ADDRESS", "CONTRACT_ADDRESS"]) {
            config.contract_address =
                Some(parse_address(&value).map_err(|e| ConfigError::Invalid {
                    field: "contract_address",
                    reason: e.to_string(),
                })?);
        }
        if let Some(value) = get(&["RIDDLE_RPC_URL", "RPC_URL"]) {
            config.rpc_endpoint_url = value;
        }
        config.ws_endpoint_url = get(&["RIDDLE_WS_URL"]);
        config.abi_path = get(&["RIDDLE_ABI_PATH"]).map(PathBuf::from);
        if let Some(value) = get(&["RIDDLE_POLL_MS"]) {
            config.receipt_poll_interval =
                Duration::from_millis(parse_number("receipt_poll_interval", &value)?);
        }
        if let Some(value) = get(&["RIDDLE_FINALIZATION_TIMEOUT_SECS"]) {
            config.finalization_timeout =
                Some(Duration::from_secs(parse_number("finalization_timeout", &value)?));
        }
        if let Some(value) = get(&["CHAIN_ID"]) {
            config.chain_id = parse_number("chain_id", &value)?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let contract = self.contract()?;
        if contract.is_zero() {
            return Err(ConfigError::Invalid {
                field: "contract_address",
                reason: "zero address".into(),
            });
        }

        if !has_scheme(&self.rpc_endpoint_url, &["http://", "https://"]) {
            return Err(ConfigError::Invalid {
                field: "rpc_endpoint_url",
                reason: format!("expected http(s) URL, got {}", self.rpc_endpoint_url),
            });
        }
        if let Some(ws) = &self.ws_endpoint_url {
            if !has_scheme(ws, &["ws://", "wss://"]) {
                return Err(ConfigError::Invalid {
                    field: "ws_endpoint_url",
                    reason: format!("expected ws(s) URL, got {ws}"),
                });
            }
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "request_timeout",
                reason: "cannot be 0".into(),
            });
        }
        if self.receipt_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "receipt_poll_interval",
                reason: "cannot be 0".into(),
            });
        }

        Ok(())
    }

    /// The configured contract address.
    pub fn contract(&self) -> Result<Address, ConfigError> {
        self.contract_address
            .ok_or(ConfigError::Missing("contract_address"))
    }

    /// Subscription endpoint, derived from the RPC URL when not set.
    #[must_use]
    pub fn ws_endpoint(&self) -> String {
        if let Some(ws) = &self.ws_endpoint_url {
            return ws.clone();
        }
        let rpc = &self.rpc_endpoint_url;
        if let Some(rest) = rpc.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = rpc.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            rpc.clone()
        }
    }

    /// Loads the ABI override, or the embedded OnchainRiddle ABI.
    pub fn load_descriptor(&self) -> Result<ContractDescriptor, ConfigError> {
        match &self.abi_path {
            Some(path) => {
                let json = std::fs::read_to_string(path)?;
                Ok(ContractDescriptor::from_json(&json)?)
            }
            None => Ok(ContractDescriptor::onchain_riddle()?),
        }
    }

    /// Resolved handle on the configured contract.
    pub fn contract_handle(&self) -> Result<ContractHandle, ConfigError> {
        Ok(ContractHandle::new(self.contract()?, self.load_descriptor()?)?)
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    schemes
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme))
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("not a number: {value}"),
    })
}
